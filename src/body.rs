//! Rigid Bodies
//!
//! Body state lives in a slot arena owned by the world and is addressed
//! by [`BodyHandle`]. A body carries its transform, sweep (for
//! continuous collision), velocities, mass data aggregated from its
//! fixtures, and damping/sleep bookkeeping.
//!
//! # Features
//!
//! - **Three body types**: static (infinite mass, never moves),
//!   kinematic (infinite mass, moves by velocity), dynamic (full
//!   simulation)
//! - **Automatic mass**: density-weighted aggregation over fixtures,
//!   with an override for user-specified mass
//! - **Sleeping**: idle bodies are excluded from the solver until
//!   disturbed
//!
//! Author: Moroya Sakamoto

use crate::math::{Sweep, Transform, Vec2};
use crate::settings::TIME_TO_SLEEP;

/// Handle to a body slot in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyHandle(pub u32);

/// Handle to a fixture slot in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixtureHandle(pub u32);

/// How a body participates in simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyType {
    /// Zero velocity, infinite mass; may be moved manually
    #[default]
    Static,
    /// Infinite mass, moves under its velocity; unaffected by forces
    Kinematic,
    /// Finite mass, fully simulated
    Dynamic,
}

/// Body construction parameters.
#[derive(Clone, Copy, Debug)]
pub struct BodyDef {
    pub body_type: BodyType,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    /// Velocity decay per second (0 = none)
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// May this body sleep when idle?
    pub allow_sleep: bool,
    /// Start awake?
    pub awake: bool,
    /// Lock rotation entirely
    pub fixed_rotation: bool,
    /// Use continuous collision against other dynamic bodies
    pub bullet: bool,
    pub enabled: bool,
    /// Scales the world gravity for this body
    pub gravity_scale: f32,
    /// Opaque user tag
    pub user_data: u64,
}

impl Default for BodyDef {
    fn default() -> Self {
        Self {
            body_type: BodyType::Static,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            allow_sleep: true,
            awake: true,
            fixed_rotation: false,
            bullet: false,
            enabled: true,
            gravity_scale: 1.0,
            user_data: 0,
        }
    }
}

// Body flags
pub(crate) const BODY_FLAG_ISLAND: u16 = 0x0001;
pub(crate) const BODY_FLAG_AWAKE: u16 = 0x0002;
pub(crate) const BODY_FLAG_AUTO_SLEEP: u16 = 0x0004;
pub(crate) const BODY_FLAG_BULLET: u16 = 0x0008;
pub(crate) const BODY_FLAG_FIXED_ROTATION: u16 = 0x0010;
pub(crate) const BODY_FLAG_ENABLED: u16 = 0x0020;
pub(crate) const BODY_FLAG_TOI: u16 = 0x0040;

/// A rigid body. Fields are crate-visible; the world's methods are the
/// public mutation surface because moves must be mirrored into the
/// broadphase.
#[derive(Clone, Debug)]
pub struct Body {
    pub(crate) body_type: BodyType,
    pub(crate) flags: u16,

    /// Origin transform (not the center of mass)
    pub(crate) transform: Transform,
    /// Center-of-mass sweep for TOI
    pub(crate) sweep: Sweep,

    pub(crate) linear_velocity: Vec2,
    pub(crate) angular_velocity: f32,

    /// Force accumulator, cleared each step
    pub(crate) force: Vec2,
    pub(crate) torque: f32,

    pub(crate) mass: f32,
    pub(crate) inv_mass: f32,
    /// Rotational inertia about the center of mass
    pub(crate) inertia: f32,
    pub(crate) inv_inertia: f32,

    pub(crate) linear_damping: f32,
    pub(crate) angular_damping: f32,
    pub(crate) gravity_scale: f32,

    pub(crate) sleep_time: f32,
    pub(crate) user_data: u64,

    /// Fixtures attached to this body
    pub(crate) fixtures: Vec<FixtureHandle>,
    /// Index into the island being built (solver scratch)
    pub(crate) island_index: usize,
}

impl Body {
    pub(crate) fn new(def: &BodyDef) -> Self {
        let mut flags = 0u16;
        if def.bullet {
            flags |= BODY_FLAG_BULLET;
        }
        if def.fixed_rotation {
            flags |= BODY_FLAG_FIXED_ROTATION;
        }
        if def.allow_sleep {
            flags |= BODY_FLAG_AUTO_SLEEP;
        }
        if def.awake && def.body_type != BodyType::Static {
            flags |= BODY_FLAG_AWAKE;
        }
        if def.enabled {
            flags |= BODY_FLAG_ENABLED;
        }

        let transform = Transform::new(def.position, def.angle);
        let sweep = Sweep {
            local_center: Vec2::ZERO,
            c0: def.position,
            c: def.position,
            a0: def.angle,
            a: def.angle,
            alpha0: 0.0,
        };

        let (mass, inv_mass) = if def.body_type == BodyType::Dynamic {
            (1.0, 1.0)
        } else {
            (0.0, 0.0)
        };

        Self {
            body_type: def.body_type,
            flags,
            transform,
            sweep,
            linear_velocity: def.linear_velocity,
            angular_velocity: def.angular_velocity,
            force: Vec2::ZERO,
            torque: 0.0,
            mass,
            inv_mass,
            inertia: 0.0,
            inv_inertia: 0.0,
            linear_damping: def.linear_damping,
            angular_damping: def.angular_damping,
            gravity_scale: def.gravity_scale,
            sleep_time: 0.0,
            user_data: def.user_data,
            fixtures: Vec::new(),
            island_index: 0,
        }
    }

    // =========== Read accessors ===========

    #[inline]
    #[must_use]
    pub fn body_type(&self) -> BodyType {
        self.body_type
    }

    #[inline]
    #[must_use]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.transform.p
    }

    #[inline]
    #[must_use]
    pub fn angle(&self) -> f32 {
        self.sweep.a
    }

    /// World-space center of mass.
    #[inline]
    #[must_use]
    pub fn world_center(&self) -> Vec2 {
        self.sweep.c
    }

    /// Local-space center of mass.
    #[inline]
    #[must_use]
    pub fn local_center(&self) -> Vec2 {
        self.sweep.local_center
    }

    #[inline]
    #[must_use]
    pub fn linear_velocity(&self) -> Vec2 {
        self.linear_velocity
    }

    #[inline]
    #[must_use]
    pub fn angular_velocity(&self) -> f32 {
        self.angular_velocity
    }

    #[inline]
    #[must_use]
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Rotational inertia about the center of mass.
    #[inline]
    #[must_use]
    pub fn inertia(&self) -> f32 {
        self.inertia
    }

    #[inline]
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.flags & BODY_FLAG_AWAKE != 0
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags & BODY_FLAG_ENABLED != 0
    }

    #[inline]
    #[must_use]
    pub fn is_bullet(&self) -> bool {
        self.flags & BODY_FLAG_BULLET != 0
    }

    #[inline]
    #[must_use]
    pub fn is_fixed_rotation(&self) -> bool {
        self.flags & BODY_FLAG_FIXED_ROTATION != 0
    }

    #[inline]
    #[must_use]
    pub fn is_sleep_allowed(&self) -> bool {
        self.flags & BODY_FLAG_AUTO_SLEEP != 0
    }

    #[inline]
    #[must_use]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    #[inline]
    #[must_use]
    pub fn fixtures(&self) -> &[FixtureHandle] {
        &self.fixtures
    }

    /// World point of a local point.
    #[inline]
    #[must_use]
    pub fn world_point(&self, local: Vec2) -> Vec2 {
        self.transform.mul_vec2(local)
    }

    /// Local point of a world point.
    #[inline]
    #[must_use]
    pub fn local_point(&self, world: Vec2) -> Vec2 {
        self.transform.mul_t_vec2(world)
    }

    /// World direction of a local vector.
    #[inline]
    #[must_use]
    pub fn world_vector(&self, local: Vec2) -> Vec2 {
        self.transform.q.apply(local)
    }

    /// Velocity of a world point attached to this body.
    #[inline]
    #[must_use]
    pub fn velocity_at_world_point(&self, world_point: Vec2) -> Vec2 {
        self.linear_velocity
            + Vec2::cross_sv(self.angular_velocity, world_point - self.sweep.c)
    }

    // =========== Crate-internal mutation ===========

    pub(crate) fn set_awake(&mut self, awake: bool) {
        if self.body_type == BodyType::Static {
            return;
        }
        if awake {
            self.flags |= BODY_FLAG_AWAKE;
            self.sleep_time = 0.0;
        } else {
            self.flags &= !BODY_FLAG_AWAKE;
            self.sleep_time = 0.0;
            self.linear_velocity = Vec2::ZERO;
            self.angular_velocity = 0.0;
            self.force = Vec2::ZERO;
            self.torque = 0.0;
        }
    }

    /// Apply a force at a world point; off-center forces add torque.
    pub(crate) fn apply_force(&mut self, force: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.force += force;
        self.torque += (point - self.sweep.c).cross(force);
    }

    pub(crate) fn apply_torque(&mut self, torque: f32) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.torque += torque;
    }

    /// Apply a linear impulse at a world point, changing velocity
    /// immediately.
    pub(crate) fn apply_linear_impulse(&mut self, impulse: Vec2, point: Vec2) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.linear_velocity += impulse * self.inv_mass;
        self.angular_velocity += self.inv_inertia * (point - self.sweep.c).cross(impulse);
    }

    pub(crate) fn apply_angular_impulse(&mut self, impulse: f32) {
        if self.body_type != BodyType::Dynamic {
            return;
        }
        self.angular_velocity += self.inv_inertia * impulse;
    }

    /// Advance the sleep clock; returns the updated idle time.
    pub(crate) fn update_sleep_time(&mut self, dt: f32, below_tolerance: bool) -> f32 {
        if below_tolerance && self.is_sleep_allowed() {
            self.sleep_time += dt;
        } else {
            self.sleep_time = 0.0;
        }
        self.sleep_time
    }

    /// Should this body fall asleep now?
    #[must_use]
    pub(crate) fn ready_to_sleep(&self) -> bool {
        self.is_sleep_allowed() && self.sleep_time >= TIME_TO_SLEEP
    }

    /// Keep the transform in sync with the sweep after integration.
    pub(crate) fn synchronize_transform(&mut self) {
        self.transform = Transform::new(Vec2::ZERO, self.sweep.a);
        self.transform.p = self.sweep.c - self.transform.q.apply(self.sweep.local_center);
    }
}

// ============================================================================
// Tests
// ============================================================================
