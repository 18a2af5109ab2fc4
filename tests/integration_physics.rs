//! Integration tests for ALICE-Physics2D
//!
//! These tests verify end-to-end behaviour of the engine using only the
//! public API re-exported from the crate root. Every scenario is
//! deterministic: same inputs, bit-identical trajectories.

use alice_physics2d::prelude::*;

// ============================================================================
// Helpers
// ============================================================================

const DT: f32 = 1.0 / 60.0;

fn run_world(world: &mut World, steps: usize) {
    for _ in 0..steps {
        world.step(DT, 8, 3).unwrap();
    }
}

fn ground_edge(world: &mut World) -> BodyHandle {
    let ground = world.create_body(&BodyDef::default()).unwrap();
    let edge = Shape::Edge(EdgeShape::new(Vec2::new(-40.0, 0.0), Vec2::new(40.0, 0.0)).unwrap());
    world.create_fixture(ground, &FixtureDef::new(edge)).unwrap();
    ground
}

fn dynamic_box(world: &mut World, x: f32, y: f32, half: f32) -> BodyHandle {
    let body = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(x, y),
            ..BodyDef::default()
        })
        .unwrap();
    let mut def = FixtureDef::new(Shape::Polygon(PolygonShape::new_box(half, half).unwrap()));
    def.density = 1.0;
    def.friction = 0.5;
    world.create_fixture(body, &def).unwrap();
    body
}

// ============================================================================
// Test 1 — Dropped circle comes to rest on an edge
// ============================================================================

/// A 5-radius circle dropped from y=20 onto a ground edge at y=0 with zero
/// restitution must settle with its center one radius above the edge.
#[test]
fn test_dropped_circle_rests_on_edge() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    ground_edge(&mut world);

    let body = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 20.0),
            ..BodyDef::default()
        })
        .unwrap();
    let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(5.0).unwrap()));
    def.density = 1.0;
    def.restitution = 0.0;
    world.create_fixture(body, &def).unwrap();

    run_world(&mut world, 300);

    let p = world.body(body).unwrap().position();
    assert!(
        (p.y - 5.0).abs() < 0.05,
        "Circle center should rest one radius above the edge, got y = {}",
        p.y
    );
    let v = world.body(body).unwrap().linear_velocity();
    assert!(v.length() < 0.05, "Resting circle should be still, |v| = {}", v.length());
}

// ============================================================================
// Test 2 — Determinism
// ============================================================================

/// Two identical runs of a 20-box pile must produce bit-exact states.
#[test]
fn test_identical_runs_bit_exact() {
    fn simulate() -> Vec<(u32, u32, u32)> {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        ground_edge(&mut world);
        let mut bodies = Vec::new();
        for i in 0..20 {
            let x = (i % 5) as f32 * 1.1 - 2.2;
            let y = 1.0 + (i / 5) as f32 * 1.1;
            bodies.push(dynamic_box(&mut world, x, y, 0.5));
        }
        run_world(&mut world, 180);
        bodies
            .into_iter()
            .map(|b| {
                let body = world.body(b).unwrap();
                (
                    body.position().x.to_bits(),
                    body.position().y.to_bits(),
                    body.angle().to_bits(),
                )
            })
            .collect()
    }

    assert_eq!(simulate(), simulate(), "Runs diverged: simulation is not deterministic");
}

// ============================================================================
// Test 3 — Sensor lifecycle
// ============================================================================

/// A body falling through a sensor must fire begin_contact on entry and
/// end_contact on exit, without ever being deflected.
#[test]
fn test_sensor_begin_and_end() {
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Events {
        begins: usize,
        ends: usize,
    }
    struct Listener(Rc<RefCell<Events>>);
    impl ContactListener for Listener {
        fn begin_contact(&mut self, _c: &ContactInfo) {
            self.0.borrow_mut().begins += 1;
        }
        fn end_contact(&mut self, _c: &ContactInfo) {
            self.0.borrow_mut().ends += 1;
        }
    }

    let events = Rc::new(RefCell::new(Events::default()));
    let mut world = World::new(Vec2::new(0.0, -10.0));
    world.set_contact_listener(Box::new(Listener(events.clone())));

    let gate = world.create_body(&BodyDef::default()).unwrap();
    let mut sensor = FixtureDef::new(Shape::Polygon(PolygonShape::new_box(3.0, 0.5).unwrap()));
    sensor.is_sensor = true;
    world.create_fixture(gate, &sensor).unwrap();

    let faller = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 5.0),
            ..BodyDef::default()
        })
        .unwrap();
    let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(0.3).unwrap()));
    def.density = 1.0;
    world.create_fixture(faller, &def).unwrap();

    run_world(&mut world, 180);

    assert_eq!(events.borrow().begins, 1, "Exactly one entry into the sensor");
    assert_eq!(events.borrow().ends, 1, "Exactly one exit from the sensor");
    assert!(
        world.body(faller).unwrap().position().y < -3.0,
        "Sensor must not deflect the falling body"
    );
}

// ============================================================================
// Test 4 — Revolute motor drives a wheel
// ============================================================================

/// A motorized revolute joint should spin its wheel toward the motor speed.
#[test]
fn test_revolute_motor_spins_wheel() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    let anchor = world.create_body(&BodyDef::default()).unwrap();
    let wheel = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(0.0, 0.0),
            ..BodyDef::default()
        })
        .unwrap();
    let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap()));
    def.density = 1.0;
    world.create_fixture(wheel, &def).unwrap();

    let mut joint = RevoluteJointDef::new(anchor, wheel);
    joint.enable_motor = true;
    joint.motor_speed = 5.0;
    joint.max_motor_torque = 1000.0;
    world.create_joint(&JointDef::Revolute(joint)).unwrap();

    run_world(&mut world, 120);
    let w = world.body(wheel).unwrap().angular_velocity();
    assert!(
        (w - 5.0).abs() < 0.1,
        "Motor should reach its target speed, got omega = {w}"
    );
}

// ============================================================================
// Test 5 — Pulley conservation
// ============================================================================

/// On a 1:1 pulley, one side descending lifts the other by the same amount.
#[test]
fn test_pulley_transfers_motion() {
    let mut world = World::new(Vec2::new(0.0, -10.0));

    let heavy = dynamic_box(&mut world, -5.0, 5.0, 1.0);
    let light = dynamic_box(&mut world, 5.0, 5.0, 0.5);

    let mut def = PulleyJointDef::new(heavy, light);
    def.ground_anchor_a = Vec2::new(-5.0, 10.0);
    def.ground_anchor_b = Vec2::new(5.0, 10.0);
    def.local_anchor_a = Vec2::ZERO;
    def.local_anchor_b = Vec2::ZERO;
    def.length_a = 5.0;
    def.length_b = 5.0;
    def.ratio = 1.0;
    world.create_joint(&JointDef::Pulley(def)).unwrap();

    run_world(&mut world, 120);
    let y_heavy = world.body(heavy).unwrap().position().y;
    let y_light = world.body(light).unwrap().position().y;
    assert!(y_heavy < 5.0, "Heavy side should descend, y = {y_heavy}");
    assert!(y_light > 5.0, "Light side should rise, y = {y_light}");
    let total = (5.0 - y_heavy) - (y_light - 5.0);
    assert!(
        total.abs() < 0.1,
        "Rope length must be conserved, imbalance = {total}"
    );
}

// ============================================================================
// Test 6 — Particle conservation and containment
// ============================================================================

/// Particles poured into a basin must neither vanish nor escape.
#[test]
fn test_particle_count_conserved_in_basin() {
    let mut world = World::new(Vec2::new(0.0, -10.0));

    let basin = world.create_body(&BodyDef::default()).unwrap();
    let walls = Shape::Chain(
        ChainShape::new_chain(&[
            Vec2::new(-4.0, 6.0),
            Vec2::new(-4.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 6.0),
        ])
        .unwrap(),
    );
    world.create_fixture(basin, &FixtureDef::new(walls)).unwrap();

    let mut group = ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(2.0, 2.0).unwrap()));
    group.position = Vec2::new(0.0, 3.5);
    world.particles_mut().create_particle_group(&group);
    let count = world.particles().particle_count();
    assert!(count > 0, "Group creation fills the shape with particles");

    run_world(&mut world, 240);

    assert_eq!(
        world.particles().particle_count(),
        count,
        "No particle created or destroyed during settling"
    );
    for p in world.particles().position_buffer() {
        assert!(p.y > -1.0, "Particle escaped below the basin floor, y = {}", p.y);
        assert!(p.x.abs() < 5.5, "Particle escaped sideways, x = {}", p.x);
    }
}

// ============================================================================
// Test 7 — Destroying a particle group's particles notifies the listener
// ============================================================================

#[test]
fn test_particle_destruction_reported() {
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder(Rc<RefCell<usize>>);
    impl DestructionListener for Recorder {
        fn particle_destroyed(&mut self, _index: usize) {
            *self.0.borrow_mut() += 1;
        }
    }

    let destroyed = Rc::new(RefCell::new(0usize));
    let mut world = World::new(Vec2::ZERO);
    world.set_destruction_listener(Box::new(Recorder(destroyed.clone())));

    let mut group = ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(1.5, 1.5).unwrap()));
    group.position = Vec2::ZERO;
    world.particles_mut().create_particle_group(&group);
    let count = world.particles().particle_count();
    assert!(count > 0);

    let zone = Shape::Polygon(PolygonShape::new_box(10.0, 10.0).unwrap());
    let hit = world
        .particles_mut()
        .destroy_particles_in_shape(&zone, &Transform::IDENTITY);
    assert_eq!(hit, count, "Every particle lies inside the destruction zone");

    // Zombies are compacted on the next step
    world.step(DT, 8, 3).unwrap();
    assert_eq!(world.particles().particle_count(), 0);
    assert_eq!(*destroyed.borrow(), count, "Each destruction is reported once");
}

// ============================================================================
// Test 8 — Bullet vs. thin static wall
// ============================================================================

/// A fast bullet must be stopped by a thin wall instead of tunnelling.
#[test]
fn test_bullet_stopped_by_thin_wall() {
    let mut world = World::new(Vec2::ZERO);

    let wall = world.create_body(&BodyDef::default()).unwrap();
    let blade = Shape::Polygon(PolygonShape::new_box(0.05, 5.0).unwrap());
    world.create_fixture(wall, &FixtureDef::new(blade)).unwrap();

    let bullet = world
        .create_body(&BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(-10.0, 0.0),
            linear_velocity: Vec2::new(500.0, 0.0),
            bullet: true,
            ..BodyDef::default()
        })
        .unwrap();
    let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(0.25).unwrap()));
    def.density = 1.0;
    def.restitution = 0.0;
    world.create_fixture(bullet, &def).unwrap();

    run_world(&mut world, 30);

    let x = world.body(bullet).unwrap().position().x;
    assert!(x < 0.0, "Bullet must stop at the wall, got x = {x}");
}

// ============================================================================
// Test 9 — World queries
// ============================================================================

#[test]
fn test_ray_cast_reports_normal_and_point() {
    let mut world = World::new(Vec2::ZERO);
    let body = world
        .create_body(&BodyDef {
            position: Vec2::new(4.0, 0.0),
            ..BodyDef::default()
        })
        .unwrap();
    world
        .create_fixture(
            body,
            &FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap())),
        )
        .unwrap();

    let mut hit = None;
    world.ray_cast(Vec2::ZERO, Vec2::new(10.0, 0.0), |fixture, point, normal, fraction| {
        hit = Some((fixture, point, normal, fraction));
        fraction
    });
    let (_, point, normal, fraction) = hit.expect("ray must hit the circle");
    assert!((point.x - 3.0).abs() < 1e-3, "Hit point on the near rim, x = {}", point.x);
    assert!((normal.x + 1.0).abs() < 1e-3, "Surface normal faces the ray origin");
    assert!((fraction - 0.3).abs() < 1e-3, "Hit at 3 of 10 units, fraction = {fraction}");
}

#[test]
fn test_query_aabb_filters_by_region() {
    let mut world = World::new(Vec2::ZERO);
    let mut fixtures = Vec::new();
    for x in [0.0f32, 10.0, 20.0] {
        let body = world
            .create_body(&BodyDef {
                position: Vec2::new(x, 0.0),
                ..BodyDef::default()
            })
            .unwrap();
        let fh = world
            .create_fixture(
                body,
                &FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap())),
            )
            .unwrap();
        fixtures.push(fh);
    }

    let mut found = Vec::new();
    world.query_aabb(&Aabb::new(Vec2::new(8.0, -2.0), Vec2::new(12.0, 2.0)), |f| {
        found.push(f);
        true
    });
    assert_eq!(found, vec![fixtures[1]], "Only the middle circle is in the region");
}

// ============================================================================
// Test 10 — Collision filtering
// ============================================================================

/// Fixtures in the same negative group never collide.
#[test]
fn test_negative_group_never_collides() {
    let mut world = World::new(Vec2::new(0.0, -10.0));
    ground_edge(&mut world);

    let make = |world: &mut World, x: f32| {
        let body = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(x, 0.6),
                ..BodyDef::default()
            })
            .unwrap();
        let mut def = FixtureDef::new(Shape::Polygon(PolygonShape::new_box(0.5, 0.5).unwrap()));
        def.density = 1.0;
        def.filter.group_index = -3;
        world.create_fixture(body, &def).unwrap();
        body
    };
    // Overlapping spawn positions: they would push apart if colliding
    let a = make(&mut world, 0.0);
    let b = make(&mut world, 0.4);

    run_world(&mut world, 60);
    let pa = world.body(a).unwrap().position();
    let pb = world.body(b).unwrap().position();
    assert!(
        (pb.x - pa.x - 0.4).abs() < 0.05,
        "Same negative group must not push apart, spacing = {}",
        pb.x - pa.x
    );
}

// ============================================================================
// Test 11 — Partial particle destruction keeps a spring group stepping
// ============================================================================

/// Removing a subset of a spring group's particles (including the highest
/// index) must remap the surviving springs so later steps stay in bounds.
#[test]
fn test_partial_destruction_of_spring_group_keeps_stepping() {
    let mut world = World::new(Vec2::new(0.0, -10.0));

    let basin = world.create_body(&BodyDef::default()).unwrap();
    let walls = Shape::Chain(
        ChainShape::new_chain(&[
            Vec2::new(-4.0, 6.0),
            Vec2::new(-4.0, 0.0),
            Vec2::new(4.0, 0.0),
            Vec2::new(4.0, 6.0),
        ])
        .unwrap(),
    );
    world.create_fixture(basin, &FixtureDef::new(walls)).unwrap();

    let mut group = ParticleGroupDef::new(Shape::Polygon(PolygonShape::new_box(1.5, 1.5).unwrap()));
    group.position = Vec2::new(0.0, 2.5);
    group.flags = ParticleFlags::SPRING;
    world.particles_mut().create_particle_group(&group);
    let count = world.particles().particle_count();
    assert!(count > 4, "Group creation fills the shape with particles");

    // A strict subset: the last index, the first, and one in the middle.
    world.particles_mut().destroy_particle(count - 1);
    world.particles_mut().destroy_particle(0);
    world.particles_mut().destroy_particle(count / 2);

    run_world(&mut world, 120);

    assert_eq!(
        world.particles().particle_count(),
        count - 3,
        "Exactly the flagged particles are removed"
    );
    for p in world.particles().position_buffer() {
        assert!(p.x.is_finite() && p.y.is_finite(), "Survivor diverged at {p:?}");
        assert!(p.y > -1.0, "Survivor escaped below the basin floor, y = {}", p.y);
    }
}
