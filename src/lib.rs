//! # ALICE-Physics2D
//!
//! **Deterministic 2D Rigid-Body & Particle Dynamics**
//!
//! A Rust library providing an impulse-based 2D physics engine with
//! continuous collision detection and a position-based particle fluid
//! solver, built for reproducible simulation.
//!
//! ## Features
//!
//! | Feature | Description | Cost |
//! |---------|-------------|------|
//! | **Dynamic AABB Tree** | Incremental broad-phase with fat AABBs | O(log N) per move |
//! | **GJK Distance** | Convex distance with warm-started simplex cache | O(1) amortized |
//! | **Sequential Impulses** | Warm-started velocity/position solver | O(iters × contacts) |
//! | **Conservative Advancement** | Tunnel-free bullets via time of impact | O(log 1/ε) |
//! | **Joints** | Revolute, prismatic, distance, pulley, gear, and more | O(1) each |
//! | **Particles** | SPH-style fluid with groups and Voronoi clustering | O(N) per step |
//!
//! ## Design Principles
//!
//! - **Deterministic**: identical inputs produce bit-identical runs;
//!   iteration follows slot order, never hash order
//! - **Handle-Based**: bodies, fixtures, joints, and contacts are stable
//!   `u32` handles into slot arenas, no reference cycles
//! - **Explicit Errors**: structural mutation during a step returns
//!   `PhysicsError::WorldLocked` instead of corrupting state
//! - **Zero Dependencies**: the engine is pure `std` Rust
//!
//! ## Quick Start
//!
//! ```rust
//! use alice_physics2d::prelude::*;
//!
//! let mut world = World::new(Vec2::new(0.0, -10.0));
//!
//! // Static ground slab
//! let ground = world.create_body(&BodyDef::default()).unwrap();
//! let slab = Shape::Polygon(PolygonShape::new_box(50.0, 1.0).unwrap());
//! world.create_fixture(ground, &FixtureDef::new(slab)).unwrap();
//!
//! // Dynamic box dropped from above
//! let body = world
//!     .create_body(&BodyDef {
//!         body_type: BodyType::Dynamic,
//!         position: Vec2::new(0.0, 10.0),
//!         ..BodyDef::default()
//!     })
//!     .unwrap();
//! let mut fixture = FixtureDef::new(Shape::Polygon(PolygonShape::new_box(0.5, 0.5).unwrap()));
//! fixture.density = 1.0;
//! world.create_fixture(body, &fixture).unwrap();
//!
//! for _ in 0..180 {
//!     world.step(1.0 / 60.0, 8, 3).unwrap();
//! }
//! // Resting on the slab: ground top at y=1, box half-height 0.5
//! let y = world.body(body).unwrap().position().y;
//! assert!((y - 1.5).abs() < 0.05, "settled at y = {y}");
//! ```
//!
//! ## Particle Fluids
//!
//! ```rust
//! use alice_physics2d::prelude::*;
//!
//! let mut world = World::new(Vec2::new(0.0, -10.0));
//! let mut group = ParticleGroupDef::new(Shape::Polygon(
//!     PolygonShape::new_box(2.0, 2.0).unwrap(),
//! ));
//! group.position = Vec2::new(0.0, 5.0);
//! let _handle = world.particles_mut().create_particle_group(&group);
//! assert!(world.particles().particle_count() > 0);
//! ```
//!
//! ## Queries
//!
//! ```rust
//! use alice_physics2d::prelude::*;
//!
//! let mut world = World::new(Vec2::ZERO);
//! let body = world.create_body(&BodyDef::default()).unwrap();
//! let circle = Shape::Circle(CircleShape::new(1.0).unwrap());
//! world.create_fixture(body, &FixtureDef::new(circle)).unwrap();
//!
//! let mut hits = Vec::new();
//! world.ray_cast(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0), |fixture, point, _normal, fraction| {
//!     hits.push((fixture, point));
//!     fraction // clip: closest-hit search
//! });
//! assert_eq!(hits.len(), 1);
//! ```

pub mod body;
pub mod broad_phase;
pub mod callbacks;
pub mod contact;
pub mod contact_solver;
pub mod distance;
pub mod dynamic_tree;
pub mod error;
pub mod fixture;
pub mod island;
pub mod joint;
mod joint_extra;
pub mod manifold;
pub mod math;
pub mod particle;
pub mod settings;
pub mod shape;
pub mod toi;
pub mod voronoi;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::body::{Body, BodyDef, BodyHandle, BodyType, FixtureHandle};
    pub use crate::callbacks::{
        ContactImpulse, ContactInfo, ContactListener, DebugDraw, DestructionListener,
        NullContactListener, NullDestructionListener,
    };
    pub use crate::contact::{Contact, ContactHandle};
    pub use crate::error::PhysicsError;
    pub use crate::fixture::{Filter, Fixture, FixtureDef};
    pub use crate::joint::{
        DistanceJointDef, GearJointDef, Joint, JointDef, JointHandle, MotorJointDef,
        MouseJointDef, PrismaticJointDef, PulleyJointDef, RevoluteJointDef, RopeJointDef,
        WeldJointDef, WheelJointDef,
    };
    pub use crate::manifold::Manifold;
    pub use crate::math::{Aabb, Mat22, Rot, Transform, Vec2};
    pub use crate::particle::{
        ParticleColor, ParticleDef, ParticleFlags, ParticleGroupDef, ParticleGroupHandle,
        ParticleSystem,
    };
    pub use crate::shape::{
        ChainShape, CircleShape, EdgeShape, MassData, PolygonShape, RayCastInput, RayCastOutput,
        Shape,
    };
    pub use crate::world::{StepProfile, World};
}

// Re-export main types at crate root
pub use prelude::*;

// ============================================================================
// Integration Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::prelude::*;

    fn step_n(world: &mut World, n: usize) {
        for _ in 0..n {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
    }

    #[test]
    fn test_pyramid_stack_is_stable() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let ground = world.create_body(&BodyDef::default()).unwrap();
        let slab = Shape::Polygon(PolygonShape::new_box(50.0, 1.0).unwrap());
        world.create_fixture(ground, &FixtureDef::new(slab)).unwrap();

        let mut boxes = Vec::new();
        for row in 0..4 {
            for col in 0..(4 - row) {
                let x = (col as f32) - (4 - row) as f32 * 0.5 + 0.5;
                let y = 1.55 + row as f32 * 1.1;
                let body = world
                    .create_body(&BodyDef {
                        body_type: BodyType::Dynamic,
                        position: Vec2::new(x, y),
                        ..BodyDef::default()
                    })
                    .unwrap();
                let mut def =
                    FixtureDef::new(Shape::Polygon(PolygonShape::new_box(0.5, 0.5).unwrap()));
                def.density = 1.0;
                def.friction = 0.5;
                world.create_fixture(body, &def).unwrap();
                boxes.push((body, x));
            }
        }
        step_n(&mut world, 240);
        for (body, x0) in boxes {
            let p = world.body(body).unwrap().position();
            assert!((p.x - x0).abs() < 0.2, "Stacked box drifted from {x0} to {}", p.x);
            assert!(p.y > 1.0, "Stacked box fell through the pile, y = {}", p.y);
        }
    }

    #[test]
    fn test_distance_joint_holds_pendulum_length() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let pivot = world.create_body(&BodyDef::default()).unwrap();
        let bob = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(3.0, 0.0),
                ..BodyDef::default()
            })
            .unwrap();
        let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(0.3).unwrap()));
        def.density = 1.0;
        world.create_fixture(bob, &def).unwrap();
        world
            .create_joint(&JointDef::Distance(DistanceJointDef::new(pivot, bob, 3.0)))
            .unwrap();

        step_n(&mut world, 120);
        let d = world.body(bob).unwrap().position().length();
        assert!((d - 3.0).abs() < 0.1, "Pendulum length held at 3, got {d}");
    }

    #[test]
    fn test_particles_rest_inside_container() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let basin = world.create_body(&BodyDef::default()).unwrap();
        let floor = Shape::Edge(EdgeShape::new(Vec2::new(-4.0, 0.0), Vec2::new(4.0, 0.0)).unwrap());
        world.create_fixture(basin, &FixtureDef::new(floor)).unwrap();

        let mut group =
            ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(1.5, 1.5).unwrap()));
        group.position = Vec2::new(0.0, 3.0);
        world.particles_mut().create_particle_group(&group);
        let before = world.particles().particle_count();
        assert!(before > 0);

        step_n(&mut world, 120);
        assert_eq!(world.particles().particle_count(), before, "No particle lost");
        for p in world.particles().position_buffer() {
            assert!(p.y > -2.0, "Particle fell through the floor, y = {}", p.y);
        }
    }
}
