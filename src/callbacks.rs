//! World Callbacks
//!
//! Listener traits for contact lifecycle, destruction cascades, and
//! debug rendering. All methods have no-op defaults, so implementors
//! override only what they consume. One-shot queries (AABB, ray cast)
//! take closures directly on the world methods instead.

use crate::body::{BodyHandle, FixtureHandle};
use crate::contact::ContactHandle;
use crate::joint::JointHandle;
use crate::manifold::Manifold;
use crate::math::{Transform, Vec2};
use crate::settings::MAX_MANIFOLD_POINTS;

/// Snapshot describing a contact to a listener. Plain data, so the
/// listener never borrows the world mid-step.
#[derive(Clone, Copy, Debug)]
pub struct ContactInfo {
    pub contact: ContactHandle,
    pub fixture_a: FixtureHandle,
    pub fixture_b: FixtureHandle,
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
}

/// Impulses applied at each manifold point during one solve, reported
/// to `post_solve`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContactImpulse {
    pub normal_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub tangent_impulses: [f32; MAX_MANIFOLD_POINTS],
    pub count: usize,
}

/// Contact lifecycle events, fired during `World::step`.
pub trait ContactListener {
    /// Two fixtures began touching.
    fn begin_contact(&mut self, _contact: &ContactInfo) {}

    /// Two fixtures stopped touching. Also fired when a touching contact
    /// is destroyed (fixture or body removal).
    fn end_contact(&mut self, _contact: &ContactInfo) {}

    /// The manifold is about to be solved. Return `false` to disable the
    /// contact for this step (one-sided platforms).
    fn pre_solve(&mut self, _contact: &ContactInfo, _manifold: &Manifold) -> bool {
        true
    }

    /// The solver finished with this contact; impulses are final.
    fn post_solve(&mut self, _contact: &ContactInfo, _impulse: &ContactImpulse) {}
}

/// Default listener: ignores everything.
#[derive(Default)]
pub struct NullContactListener;

impl ContactListener for NullContactListener {}

/// Notified when destroying one object implicitly destroys others.
pub trait DestructionListener {
    /// A joint was destroyed because one of its bodies was destroyed.
    fn joint_destroyed(&mut self, _joint: JointHandle) {}

    /// A fixture was destroyed because its body was destroyed.
    fn fixture_destroyed(&mut self, _fixture: FixtureHandle) {}

    /// A particle was destroyed (zombie compaction or explicit call).
    fn particle_destroyed(&mut self, _index: usize) {}
}

/// Default destruction listener: ignores everything.
#[derive(Default)]
pub struct NullDestructionListener;

impl DestructionListener for NullDestructionListener {}

/// Debug rendering hooks. The world walks its geometry and calls these;
/// colors are RGB in [0, 1].
pub trait DebugDraw {
    fn draw_polygon(&mut self, vertices: &[Vec2], color: [f32; 3]);
    fn draw_solid_polygon(&mut self, vertices: &[Vec2], color: [f32; 3]);
    fn draw_circle(&mut self, center: Vec2, radius: f32, color: [f32; 3]);
    fn draw_solid_circle(&mut self, center: Vec2, radius: f32, axis: Vec2, color: [f32; 3]);
    fn draw_segment(&mut self, p1: Vec2, p2: Vec2, color: [f32; 3]);
    fn draw_transform(&mut self, xf: &Transform);
    fn draw_particles(&mut self, centers: &[Vec2], radius: f32);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        begins: usize,
        ends: usize,
    }

    impl ContactListener for Counter {
        fn begin_contact(&mut self, _c: &ContactInfo) {
            self.begins += 1;
        }
        fn end_contact(&mut self, _c: &ContactInfo) {
            self.ends += 1;
        }
    }

    #[test]
    fn test_default_methods_are_noops() {
        let mut l = NullContactListener;
        let info = ContactInfo {
            contact: ContactHandle(0),
            fixture_a: FixtureHandle(0),
            fixture_b: FixtureHandle(1),
            body_a: BodyHandle(0),
            body_b: BodyHandle(1),
        };
        l.begin_contact(&info);
        assert!(l.pre_solve(&info, &Manifold::default()), "Default keeps contacts enabled");
    }

    #[test]
    fn test_custom_listener_receives_events() {
        let mut counter = Counter { begins: 0, ends: 0 };
        let info = ContactInfo {
            contact: ContactHandle(0),
            fixture_a: FixtureHandle(0),
            fixture_b: FixtureHandle(1),
            body_a: BodyHandle(0),
            body_b: BodyHandle(1),
        };
        counter.begin_contact(&info);
        counter.begin_contact(&info);
        counter.end_contact(&info);
        assert_eq!(counter.begins, 2);
        assert_eq!(counter.ends, 1);
    }
}
