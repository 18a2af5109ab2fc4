//! Persistent Contacts
//!
//! One [`Contact`] exists per overlapping fixture pair that passes
//! filtering, created by the broadphase and destroyed when the fat
//! AABBs separate. The contact caches its manifold between steps so
//! accumulated impulses can warm-start the solver, and carries the TOI
//! cache used by the continuous-collision sub-pass.
//!
//! # Features
//!
//! - **Warm-start carry-over**: new manifolds inherit impulses from
//!   points with matching contact ids
//! - **Sensor pairs**: report touching without generating a manifold
//! - **Begin/end events**: dispatched through the contact listener
//!
//! Author: Moroya Sakamoto

use crate::body::{Body, BodyHandle, BodyType, FixtureHandle};
use crate::broad_phase::BroadPhase;
use crate::callbacks::{ContactInfo, ContactListener};
use crate::fixture::Fixture;
use crate::manifold::{
    collide_circles, collide_edge_and_circle, collide_edge_and_polygon,
    collide_polygon_and_circle, collide_polygons, match_points, Manifold,
};
use crate::math::Transform;
use crate::settings::{mix_friction, mix_restitution};
use crate::shape::Shape;

/// Handle to a contact slot in the contact manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactHandle(pub u32);

pub(crate) const CONTACT_FLAG_ISLAND: u8 = 0x01;
pub(crate) const CONTACT_FLAG_TOUCHING: u8 = 0x02;
pub(crate) const CONTACT_FLAG_ENABLED: u8 = 0x04;
pub(crate) const CONTACT_FLAG_FILTER: u8 = 0x08;
pub(crate) const CONTACT_FLAG_BULLET_HIT: u8 = 0x10;
pub(crate) const CONTACT_FLAG_TOI: u8 = 0x20;

/// A persistent contact between two fixture children.
#[derive(Clone, Debug)]
pub struct Contact {
    pub(crate) fixture_a: FixtureHandle,
    pub(crate) fixture_b: FixtureHandle,
    /// Chain child on side A
    pub(crate) child_a: usize,
    /// Chain child on side B
    pub(crate) child_b: usize,
    pub(crate) manifold: Manifold,
    pub(crate) flags: u8,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    /// Surface translation speed (conveyor belts), along the tangent
    pub(crate) tangent_speed: f32,
    /// TOI sub-steps consumed this frame
    pub(crate) toi_count: usize,
    /// Cached TOI for the current frame, valid when `CONTACT_FLAG_TOI`
    pub(crate) toi: f32,
}

impl Contact {
    pub(crate) fn new(
        fixture_a: FixtureHandle,
        child_a: usize,
        fixture_b: FixtureHandle,
        child_b: usize,
        friction: f32,
        restitution: f32,
    ) -> Self {
        Self {
            fixture_a,
            fixture_b,
            child_a,
            child_b,
            manifold: Manifold::default(),
            flags: CONTACT_FLAG_ENABLED,
            friction,
            restitution,
            tangent_speed: 0.0,
            toi_count: 0,
            toi: 0.0,
        }
    }

    #[inline]
    #[must_use]
    pub fn fixture_a(&self) -> FixtureHandle {
        self.fixture_a
    }

    #[inline]
    #[must_use]
    pub fn fixture_b(&self) -> FixtureHandle {
        self.fixture_b
    }

    #[inline]
    #[must_use]
    pub fn child_a(&self) -> usize {
        self.child_a
    }

    #[inline]
    #[must_use]
    pub fn child_b(&self) -> usize {
        self.child_b
    }

    #[inline]
    #[must_use]
    pub fn manifold(&self) -> &Manifold {
        &self.manifold
    }

    #[inline]
    #[must_use]
    pub fn is_touching(&self) -> bool {
        self.flags & CONTACT_FLAG_TOUCHING != 0
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.flags & CONTACT_FLAG_ENABLED != 0
    }

    /// Disable the contact for this step only (re-enabled on update).
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.flags |= CONTACT_FLAG_ENABLED;
        } else {
            self.flags &= !CONTACT_FLAG_ENABLED;
        }
    }

    #[inline]
    #[must_use]
    pub fn friction(&self) -> f32 {
        self.friction
    }

    #[inline]
    #[must_use]
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    /// Schedule a filter re-check for the next collide pass.
    pub(crate) fn flag_for_filtering(&mut self) {
        self.flags |= CONTACT_FLAG_FILTER;
    }

    /// Narrow-phase dispatch for the fixture pair.
    pub(crate) fn evaluate(
        &self,
        manifold: &mut Manifold,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
    ) {
        match (shape_a, shape_b) {
            (Shape::Circle(a), Shape::Circle(b)) => collide_circles(manifold, a, xf_a, b, xf_b),
            (Shape::Polygon(a), Shape::Circle(b)) => {
                collide_polygon_and_circle(manifold, a, xf_a, b, xf_b)
            }
            (Shape::Polygon(a), Shape::Polygon(b)) => collide_polygons(manifold, a, xf_a, b, xf_b),
            (Shape::Edge(a), Shape::Circle(b)) => {
                collide_edge_and_circle(manifold, a, xf_a, b, xf_b)
            }
            (Shape::Edge(a), Shape::Polygon(b)) => {
                collide_edge_and_polygon(manifold, a, xf_a, b, xf_b)
            }
            (Shape::Chain(a), Shape::Circle(b)) => {
                let edge = a.child_edge(self.child_a);
                collide_edge_and_circle(manifold, &edge, xf_a, b, xf_b)
            }
            (Shape::Chain(a), Shape::Polygon(b)) => {
                let edge = a.child_edge(self.child_a);
                collide_edge_and_polygon(manifold, &edge, xf_a, b, xf_b)
            }
            // Remaining pairs only occur if registration ordering broke;
            // they produce no contact points
            _ => {
                manifold.point_count = 0;
            }
        }
    }

    /// Recompute the manifold, carry impulses over, manage the touching
    /// flag, and fire begin/end events.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn update(
        &mut self,
        shape_a: &Shape,
        xf_a: &Transform,
        shape_b: &Shape,
        xf_b: &Transform,
        sensor: bool,
        info: &ContactInfo,
        listener: &mut dyn ContactListener,
    ) {
        // Re-enable: pre_solve may have disabled it last step
        self.flags |= CONTACT_FLAG_ENABLED;

        let was_touching = self.is_touching();
        let touching;

        if sensor {
            // Sensors report overlap without contact points
            touching = crate::distance::test_overlap(
                &crate::shape::DistanceProxy::from_shape(shape_a, self.child_a),
                &crate::shape::DistanceProxy::from_shape(shape_b, self.child_b),
                xf_a,
                xf_b,
            );
            self.manifold.point_count = 0;
        } else {
            let old_manifold = self.manifold;
            let mut new_manifold = Manifold::default();
            self.evaluate(&mut new_manifold, shape_a, xf_a, shape_b, xf_b);
            touching = new_manifold.point_count > 0;
            match_points(&old_manifold, &mut new_manifold);
            self.manifold = new_manifold;
        }

        if touching {
            self.flags |= CONTACT_FLAG_TOUCHING;
        } else {
            self.flags &= !CONTACT_FLAG_TOUCHING;
        }

        if touching && !was_touching {
            listener.begin_contact(info);
        }
        if !touching && was_touching {
            listener.end_contact(info);
        }
    }
}

// ============================================================================
// Contact manager
// ============================================================================

/// Shape pair ordering: which side of a contact each fixture lands on.
/// Edges and chains must be shape A for the narrow phase dispatch.
fn primary_shape(shape: &Shape) -> u8 {
    match shape {
        Shape::Circle(_) => 2,
        Shape::Polygon(_) => 1,
        Shape::Edge(_) | Shape::Chain(_) => 0,
    }
}

/// Owns the broadphase and the contact arena; creates contacts from
/// broadphase pairs and destroys stale ones in the collide pass.
pub struct ContactManager {
    pub(crate) broad_phase: BroadPhase,
    pub(crate) contacts: Vec<Option<Contact>>,
    free_list: Vec<u32>,
    /// Lookup from proxy pair to contact, for duplicate suppression.
    /// Used only for point lookups, never iterated, so the hash order
    /// cannot leak into simulation results.
    pair_map: std::collections::HashMap<(u32, u32), ContactHandle>,
}

impl ContactManager {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            broad_phase: BroadPhase::new(),
            contacts: Vec::new(),
            free_list: Vec::new(),
            pair_map: std::collections::HashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn contact(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contacts.get(handle.0 as usize).and_then(|c| c.as_ref())
    }

    #[inline]
    pub(crate) fn contact_mut(&mut self, handle: ContactHandle) -> Option<&mut Contact> {
        self.contacts
            .get_mut(handle.0 as usize)
            .and_then(|c| c.as_mut())
    }

    /// Live contact count.
    #[must_use]
    pub(crate) fn contact_count(&self) -> usize {
        self.contacts.iter().filter(|c| c.is_some()).count()
    }

    /// Iterate live contact handles in slot order (deterministic).
    pub(crate) fn handles(&self) -> impl Iterator<Item = ContactHandle> + '_ {
        self.contacts
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|_| ContactHandle(i as u32)))
    }

    /// Process broadphase pairs into new contacts.
    pub(crate) fn find_new_contacts(
        &mut self,
        fixtures: &[Option<Fixture>],
        bodies: &[Option<Body>],
        joint_filter: &dyn Fn(BodyHandle, BodyHandle) -> bool,
    ) {
        // update_pairs borrows the broadphase mutably; stage pairs first
        let mut pairs: Vec<(u32, u32)> = Vec::new();
        self.broad_phase.update_pairs(|a, b| pairs.push((a, b)));

        for (proxy_a, proxy_b) in pairs {
            self.add_pair(proxy_a, proxy_b, fixtures, bodies, joint_filter);
        }
    }

    fn add_pair(
        &mut self,
        proxy_a: u32,
        proxy_b: u32,
        fixtures: &[Option<Fixture>],
        bodies: &[Option<Body>],
        joint_filter: &dyn Fn(BodyHandle, BodyHandle) -> bool,
    ) {
        if self.pair_map.contains_key(&(proxy_a, proxy_b)) {
            return;
        }

        let data_a = self.broad_phase.user_data(proxy_a);
        let data_b = self.broad_phase.user_data(proxy_b);
        let (fh_a, child_a) = unpack_proxy(data_a);
        let (fh_b, child_b) = unpack_proxy(data_b);

        let Some(fixture_a) = fixtures.get(fh_a.0 as usize).and_then(|f| f.as_ref()) else {
            return;
        };
        let Some(fixture_b) = fixtures.get(fh_b.0 as usize).and_then(|f| f.as_ref()) else {
            return;
        };

        let body_a = fixture_a.body;
        let body_b = fixture_b.body;
        if body_a == body_b {
            return;
        }

        // At least one body must be dynamic
        let type_a = bodies[body_a.0 as usize].as_ref().map(|b| b.body_type());
        let type_b = bodies[body_b.0 as usize].as_ref().map(|b| b.body_type());
        if type_a != Some(BodyType::Dynamic) && type_b != Some(BodyType::Dynamic) {
            return;
        }

        // Jointed bodies may opt out of collision
        if !joint_filter(body_a, body_b) {
            return;
        }

        if !fixture_a.filter.should_collide(&fixture_b.filter) {
            return;
        }

        // Order so edge/chain shapes sit on side A
        let (fh_a, child_a, fh_b, child_b, fixture_a, fixture_b) =
            if primary_shape(&fixture_a.shape) <= primary_shape(&fixture_b.shape) {
                (fh_a, child_a, fh_b, child_b, fixture_a, fixture_b)
            } else {
                (fh_b, child_b, fh_a, child_a, fixture_b, fixture_a)
            };

        let friction = mix_friction(fixture_a.friction, fixture_b.friction);
        let restitution = mix_restitution(fixture_a.restitution, fixture_b.restitution);
        let contact = Contact::new(fh_a, child_a, fh_b, child_b, friction, restitution);

        let handle = if let Some(slot) = self.free_list.pop() {
            self.contacts[slot as usize] = Some(contact);
            ContactHandle(slot)
        } else {
            self.contacts.push(Some(contact));
            ContactHandle((self.contacts.len() - 1) as u32)
        };
        self.pair_map.insert((proxy_a, proxy_b), handle);

        // New contacts wake both bodies so the pair gets solved
        // (the world performs the wake; flagged via the bullet-hit slot
        // being fresh). Waking is handled by the collide pass.
    }

    /// Destroy a contact and forget its pair.
    pub(crate) fn destroy(&mut self, handle: ContactHandle, fixtures: &[Option<Fixture>]) {
        let Some(contact) = self.contacts[handle.0 as usize].take() else {
            return;
        };
        self.free_list.push(handle.0);

        // Drop the pair-map entry keyed by the two proxies
        let proxy_a = fixtures[contact.fixture_a.0 as usize]
            .as_ref()
            .and_then(|f| f.proxies.get(contact.child_a).map(|p| p.proxy_id));
        let proxy_b = fixtures[contact.fixture_b.0 as usize]
            .as_ref()
            .and_then(|f| f.proxies.get(contact.child_b).map(|p| p.proxy_id));
        if let (Some(a), Some(b)) = (proxy_a, proxy_b) {
            let key = if a < b { (a, b) } else { (b, a) };
            self.pair_map.remove(&key);
        } else {
            // Fixture already gone: scan for the stale entry
            self.pair_map.retain(|_, &mut v| v != handle);
        }
    }

}

/// Broadphase user data packs fixture handle and chain child index.
#[inline]
#[must_use]
pub(crate) fn pack_proxy(fixture: FixtureHandle, child: usize) -> u32 {
    debug_assert!(fixture.0 < (1 << 24));
    debug_assert!(child < (1 << 8));
    (fixture.0 << 8) | child as u32
}

#[inline]
#[must_use]
pub(crate) fn unpack_proxy(data: u32) -> (FixtureHandle, usize) {
    (FixtureHandle(data >> 8), (data & 0xFF) as usize)
}

// ============================================================================
// Tests
// ============================================================================
