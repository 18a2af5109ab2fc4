//! Engine Tunables
//!
//! Collision and solver constants shared across the pipeline. These trade
//! accuracy against stability and are expressed in meters / radians /
//! seconds; the engine is tuned for objects between roughly 0.1 and 10
//! meters.

/// Small length used as a collision/constraint tolerance. Chosen to be
/// significant but small enough not to be visible.
pub const LINEAR_SLOP: f32 = 0.005;

/// Small angle tolerance (radians).
pub const ANGULAR_SLOP: f32 = 2.0 / 180.0 * core::f32::consts::PI;

/// Radius of the polygon/edge shape skin. Keeps polygons from being
/// squeezed to zero separation by the position solver.
pub const POLYGON_RADIUS: f32 = 2.0 * LINEAR_SLOP;

/// Maximum vertices a convex polygon may carry.
pub const MAX_POLYGON_VERTICES: usize = 8;

/// Maximum contact points in a manifold.
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Broadphase fat-AABB margin. Lets proxies move a little without
/// triggering a tree reinsert.
pub const AABB_EXTENSION: f32 = 0.1;

/// Broadphase displacement prediction multiplier.
pub const AABB_MULTIPLIER: f32 = 2.0;

/// Maximum penetration recovered per position iteration.
pub const MAX_LINEAR_CORRECTION: f32 = 0.2;

/// Maximum angular error recovered per position iteration (radians).
pub const MAX_ANGULAR_CORRECTION: f32 = 8.0 / 180.0 * core::f32::consts::PI;

/// Position-correction factor for the TOI sub-solver.
pub const TOI_BAUMGARTE: f32 = 0.75;

/// Plain position-correction factor used by joints.
pub const BAUMGARTE: f32 = 0.2;

/// Maximum translation per step. Large motion is clamped to keep the
/// solver numerics sane; CCD handles legitimately fast bodies.
pub const MAX_TRANSLATION: f32 = 2.0;

/// Squared form of [`MAX_TRANSLATION`].
pub const MAX_TRANSLATION_SQUARED: f32 = MAX_TRANSLATION * MAX_TRANSLATION;

/// Maximum rotation per step (half a turn).
pub const MAX_ROTATION: f32 = 0.5 * core::f32::consts::PI;

/// Squared form of [`MAX_ROTATION`].
pub const MAX_ROTATION_SQUARED: f32 = MAX_ROTATION * MAX_ROTATION;

/// Relative normal velocity below which restitution is ignored.
pub const VELOCITY_THRESHOLD: f32 = 1.0;

/// Seconds a body must stay under the sleep tolerances before sleeping.
pub const TIME_TO_SLEEP: f32 = 0.5;

/// Linear speed under which a body counts as idle (m/s).
pub const LINEAR_SLEEP_TOLERANCE: f32 = 0.01;

/// Angular speed under which a body counts as idle (rad/s).
pub const ANGULAR_SLEEP_TOLERANCE: f32 = 2.0 / 180.0 * core::f32::consts::PI;

/// Maximum GJK iterations before returning the best estimate.
pub const MAX_DISTANCE_ITERATIONS: usize = 20;

/// Maximum conservative-advancement outer iterations.
pub const MAX_TOI_ITERATIONS: usize = 20;

/// Maximum root-finder iterations per TOI outer iteration.
pub const MAX_TOI_ROOT_ITERATIONS: usize = 50;

/// Maximum TOI sub-steps per frame for one bullet body.
pub const MAX_SUB_STEPS: usize = 8;

/// Maximum contacts handled per TOI mini-island.
pub const MAX_TOI_CONTACTS: usize = 32;

/// Mix friction of two fixtures. Geometric mean, so one slippery surface
/// dominates.
#[inline]
#[must_use]
pub fn mix_friction(friction_a: f32, friction_b: f32) -> f32 {
    (friction_a * friction_b).sqrt()
}

/// Mix restitution of two fixtures. The bouncier surface wins.
#[inline]
#[must_use]
pub fn mix_restitution(restitution_a: f32, restitution_b: f32) -> f32 {
    restitution_a.max(restitution_b)
}
