//! Physics World
//!
//! The world owns every body, fixture, joint, and contact, and drives the
//! simulation step: collide, island solve, continuous sub-step, particle
//! solve. Objects live in slot arenas with free lists, so handles stay
//! stable across destruction and iteration order is slot order, which
//! keeps runs reproducible.
//!
//! Features:
//! - Structural mutation is rejected with `WorldLocked` while a step runs
//! - Destruction cascades (body -> joints, fixtures, contacts) with
//!   `DestructionListener` notification
//! - Continuous collision: bullets swept against static geometry and each
//!   other, earliest impact resolved in a mini island
//! - AABB and ray-cast queries over the broad-phase tree
//! - Per-step timing and counters in `StepProfile`
//!
//! Author: Moroya Sakamoto

use std::time::Instant;

use crate::body::{
    Body, BodyDef, BodyHandle, BodyType, FixtureHandle, BODY_FLAG_ISLAND,
};
use crate::broad_phase::BroadPhase;
use crate::callbacks::{
    ContactInfo, ContactListener, DebugDraw, DestructionListener, NullContactListener,
    NullDestructionListener,
};
use crate::contact::{
    pack_proxy, unpack_proxy, Contact, ContactHandle, ContactManager, CONTACT_FLAG_FILTER,
    CONTACT_FLAG_ISLAND, CONTACT_FLAG_TOI,
};
use crate::error::PhysicsError;
use crate::fixture::{Fixture, FixtureDef, FixtureProxy};
use crate::island::Island;
use crate::joint::{Joint, JointDef, JointHandle, SolverStep};
use crate::joint_extra::{GearAxis, GearResolution};
use crate::math::{Aabb, Transform, Vec2};
use crate::particle::ParticleSystem;
use crate::settings::{MAX_SUB_STEPS, MAX_TOI_CONTACTS};
use crate::shape::{DistanceProxy, RayCastInput, Shape};
use crate::toi::{time_of_impact, ToiInput, ToiState};

// ============================================================================
// Step profile
// ============================================================================

/// Wall-clock timings (milliseconds) and counters for one step.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepProfile {
    pub step_ms: f32,
    pub collide_ms: f32,
    pub solve_ms: f32,
    pub solve_toi_ms: f32,
    pub broad_phase_ms: f32,
    pub particle_ms: f32,
    /// Islands solved this step.
    pub islands: usize,
    /// Touching contacts after the collide pass.
    pub contacts: usize,
    /// Continuous sub-steps resolved.
    pub toi_events: usize,
}

#[inline]
fn elapsed_ms(start: Instant) -> f32 {
    start.elapsed().as_secs_f32() * 1000.0
}

// ============================================================================
// World
// ============================================================================

/// The simulation container. All object lifetimes and the step loop run
/// through here.
pub struct World {
    gravity: Vec2,

    bodies: Vec<Option<Body>>,
    body_free: Vec<u32>,
    fixtures: Vec<Option<Fixture>>,
    fixture_free: Vec<u32>,
    joints: Vec<Option<Joint>>,
    joint_free: Vec<u32>,

    contact_manager: ContactManager,
    island: Island,
    particles: ParticleSystem,

    listener: Box<dyn ContactListener>,
    destruction_listener: Box<dyn DestructionListener>,

    locked: bool,
    new_fixtures: bool,
    step_complete: bool,
    allow_sleep: bool,
    warm_starting: bool,
    continuous_physics: bool,
    auto_clear_forces: bool,
    /// Inverse dt of the previous step, for warm-start impulse scaling.
    inv_dt0: f32,
    profile: StepProfile,
}

impl World {
    #[must_use]
    pub fn new(gravity: Vec2) -> Self {
        Self {
            gravity,
            bodies: Vec::new(),
            body_free: Vec::new(),
            fixtures: Vec::new(),
            fixture_free: Vec::new(),
            joints: Vec::new(),
            joint_free: Vec::new(),
            contact_manager: ContactManager::new(),
            island: Island::new(),
            particles: ParticleSystem::new(),
            listener: Box::new(NullContactListener),
            destruction_listener: Box::new(NullDestructionListener),
            locked: false,
            new_fixtures: false,
            step_complete: true,
            allow_sleep: true,
            warm_starting: true,
            continuous_physics: true,
            auto_clear_forces: true,
            inv_dt0: 0.0,
            profile: StepProfile::default(),
        }
    }

    // =========== Configuration ===========

    pub fn gravity(&self) -> Vec2 {
        self.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec2) {
        self.gravity = gravity;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_contact_listener(&mut self, listener: Box<dyn ContactListener>) {
        self.listener = listener;
    }

    pub fn set_destruction_listener(&mut self, listener: Box<dyn DestructionListener>) {
        self.destruction_listener = listener;
    }

    pub fn set_allow_sleeping(&mut self, allow: bool) {
        if allow != self.allow_sleep {
            self.allow_sleep = allow;
            if !allow {
                for body in self.bodies.iter_mut().flatten() {
                    body.set_awake(true);
                }
            }
        }
    }

    pub fn set_warm_starting(&mut self, warm: bool) {
        self.warm_starting = warm;
    }

    pub fn set_continuous_physics(&mut self, continuous: bool) {
        self.continuous_physics = continuous;
    }

    pub fn set_auto_clear_forces(&mut self, clear: bool) {
        self.auto_clear_forces = clear;
    }

    /// Timings and counters from the most recent step.
    pub fn profile(&self) -> &StepProfile {
        &self.profile
    }

    // =========== Bodies ===========

    pub fn create_body(&mut self, def: &BodyDef) -> Result<BodyHandle, PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "create_body",
            });
        }
        let body = Body::new(def);
        let handle = if let Some(slot) = self.body_free.pop() {
            self.bodies[slot as usize] = Some(body);
            BodyHandle(slot)
        } else {
            self.bodies.push(Some(body));
            BodyHandle((self.bodies.len() - 1) as u32)
        };
        Ok(handle)
    }

    /// Destroy a body and everything attached to it. Joints and fixtures
    /// are reported to the destruction listener before removal.
    pub fn destroy_body(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "destroy_body",
            });
        }
        self.check_body(handle)?;

        let dead_joints: Vec<JointHandle> = self
            .joints
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let joint = slot.as_ref()?;
                let touches = match joint {
                    Joint::Gear(g) => g.bodies().contains(&handle),
                    _ => joint.body_a() == handle || joint.body_b() == handle,
                };
                touches.then_some(JointHandle(i as u32))
            })
            .collect();
        for jh in dead_joints {
            self.destruction_listener.joint_destroyed(jh);
            self.remove_joint_slot(jh);
        }

        let fixtures: Vec<FixtureHandle> = self.bodies[handle.0 as usize]
            .as_ref()
            .expect("checked body")
            .fixtures
            .clone();
        for fh in fixtures {
            self.destroy_fixture_contact_list(fh);
            self.destroy_proxies(fh);
            self.destruction_listener.fixture_destroyed(fh);
            self.fixtures[fh.0 as usize] = None;
            self.fixture_free.push(fh.0);
        }

        self.bodies[handle.0 as usize] = None;
        self.body_free.push(handle.0);
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle.0 as usize)?.as_ref()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.iter().filter(|b| b.is_some()).count()
    }

    pub fn body_handles(&self) -> impl Iterator<Item = BodyHandle> + '_ {
        self.bodies
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| BodyHandle(i as u32)))
    }

    fn check_body(&self, handle: BodyHandle) -> Result<(), PhysicsError> {
        if self.body(handle).is_none() {
            return Err(PhysicsError::InvalidHandle {
                index: handle.0 as usize,
                count: self.bodies.len(),
            });
        }
        Ok(())
    }

    /// Move a body to a new pose. Proxies update immediately; contacts
    /// refresh on the next step.
    pub fn set_transform(
        &mut self,
        handle: BodyHandle,
        position: Vec2,
        angle: f32,
    ) -> Result<(), PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "set_transform",
            });
        }
        self.check_body(handle)?;
        {
            let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
            body.transform = Transform::new(position, angle);
            body.sweep.c = body.transform.mul_vec2(body.sweep.local_center);
            body.sweep.a = angle;
            body.sweep.c0 = body.sweep.c;
            body.sweep.a0 = angle;
        }
        self.synchronize_fixtures(handle);
        Ok(())
    }

    pub fn set_linear_velocity(&mut self, handle: BodyHandle, v: Vec2) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        if body.body_type() == BodyType::Static {
            return Ok(());
        }
        if v.length_squared() > 0.0 {
            body.set_awake(true);
        }
        body.linear_velocity = v;
        Ok(())
    }

    pub fn set_angular_velocity(&mut self, handle: BodyHandle, w: f32) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        if body.body_type() == BodyType::Static {
            return Ok(());
        }
        if w * w > 0.0 {
            body.set_awake(true);
        }
        body.angular_velocity = w;
        Ok(())
    }

    pub fn apply_force(
        &mut self,
        handle: BodyHandle,
        force: Vec2,
        point: Vec2,
    ) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        body.set_awake(true);
        body.apply_force(force, point);
        Ok(())
    }

    pub fn apply_force_to_center(
        &mut self,
        handle: BodyHandle,
        force: Vec2,
    ) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        body.set_awake(true);
        let center = body.world_center();
        body.apply_force(force, center);
        Ok(())
    }

    pub fn apply_torque(&mut self, handle: BodyHandle, torque: f32) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        body.set_awake(true);
        body.apply_torque(torque);
        Ok(())
    }

    pub fn apply_linear_impulse(
        &mut self,
        handle: BodyHandle,
        impulse: Vec2,
        point: Vec2,
    ) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        body.set_awake(true);
        body.apply_linear_impulse(impulse, point);
        Ok(())
    }

    pub fn apply_angular_impulse(
        &mut self,
        handle: BodyHandle,
        impulse: f32,
    ) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        let body = self.bodies[handle.0 as usize].as_mut().expect("checked body");
        body.set_awake(true);
        body.apply_angular_impulse(impulse);
        Ok(())
    }

    pub fn set_awake(&mut self, handle: BodyHandle, awake: bool) -> Result<(), PhysicsError> {
        self.check_body(handle)?;
        self.bodies[handle.0 as usize]
            .as_mut()
            .expect("checked body")
            .set_awake(awake);
        Ok(())
    }

    // =========== Fixtures ===========

    pub fn create_fixture(
        &mut self,
        body: BodyHandle,
        def: &FixtureDef,
    ) -> Result<FixtureHandle, PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "create_fixture",
            });
        }
        self.check_body(body)?;

        let fixture = Fixture::new(body, def);
        let handle = if let Some(slot) = self.fixture_free.pop() {
            self.fixtures[slot as usize] = Some(fixture);
            FixtureHandle(slot)
        } else {
            self.fixtures.push(Some(fixture));
            FixtureHandle((self.fixtures.len() - 1) as u32)
        };

        let enabled = self.bodies[body.0 as usize]
            .as_ref()
            .expect("checked body")
            .is_enabled();
        if enabled {
            self.create_proxies(handle);
        }
        self.bodies[body.0 as usize]
            .as_mut()
            .expect("checked body")
            .fixtures
            .push(handle);

        if def.density > 0.0 {
            self.reset_mass_data(body);
        }
        // New proxies need a broad-phase pass before the next collide
        self.new_fixtures = true;
        Ok(handle)
    }

    pub fn destroy_fixture(&mut self, handle: FixtureHandle) -> Result<(), PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "destroy_fixture",
            });
        }
        let Some(fixture) = self.fixtures.get(handle.0 as usize).and_then(Option::as_ref) else {
            return Err(PhysicsError::InvalidHandle {
                index: handle.0 as usize,
                count: self.fixtures.len(),
            });
        };
        let body = fixture.body();

        self.destroy_fixture_contact_list(handle);
        self.destroy_proxies(handle);

        if let Some(owner) = self.bodies[body.0 as usize].as_mut() {
            owner.fixtures.retain(|&f| f != handle);
        }
        self.fixtures[handle.0 as usize] = None;
        self.fixture_free.push(handle.0);
        self.reset_mass_data(body);
        Ok(())
    }

    pub fn fixture(&self, handle: FixtureHandle) -> Option<&Fixture> {
        self.fixtures.get(handle.0 as usize)?.as_ref()
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.iter().filter(|f| f.is_some()).count()
    }

    fn create_proxies(&mut self, handle: FixtureHandle) {
        let (body, child_count) = {
            let fixture = self.fixtures[handle.0 as usize].as_ref().expect("fixture");
            (fixture.body(), fixture.shape().child_count())
        };
        let xf = *self.bodies[body.0 as usize]
            .as_ref()
            .expect("fixture body")
            .transform();
        for child in 0..child_count {
            let aabb = {
                let fixture = self.fixtures[handle.0 as usize].as_ref().expect("fixture");
                fixture.compute_aabb(&xf, child)
            };
            let proxy_id = self
                .contact_manager
                .broad_phase
                .create_proxy(aabb, pack_proxy(handle, child));
            self.fixtures[handle.0 as usize]
                .as_mut()
                .expect("fixture")
                .proxies
                .push(FixtureProxy {
                    aabb,
                    proxy_id,
                    child_index: child,
                });
        }
    }

    fn destroy_proxies(&mut self, handle: FixtureHandle) {
        let Some(fixture) = self.fixtures.get_mut(handle.0 as usize).and_then(Option::as_mut)
        else {
            return;
        };
        for proxy in fixture.proxies.drain(..) {
            self.contact_manager.broad_phase.destroy_proxy(proxy.proxy_id);
        }
    }

    /// Re-fit the broad-phase proxies of every fixture on `handle` after
    /// the body moved, using the swept AABB over the step.
    fn synchronize_fixtures(&mut self, handle: BodyHandle) {
        let (xf1, xf2, fixtures) = {
            let body = self.bodies[handle.0 as usize].as_ref().expect("body");
            (
                body.sweep.transform_at(0.0),
                *body.transform(),
                body.fixtures.clone(),
            )
        };
        for fh in fixtures {
            let Some(fixture) = self.fixtures.get_mut(fh.0 as usize).and_then(Option::as_mut)
            else {
                continue;
            };
            for i in 0..fixture.proxies.len() {
                let child = fixture.proxies[i].child_index;
                let aabb1 = fixture.shape.compute_aabb(&xf1, child);
                let aabb2 = fixture.shape.compute_aabb(&xf2, child);
                let aabb = aabb1.union(&aabb2);
                let displacement = aabb2.center() - aabb1.center();
                fixture.proxies[i].aabb = aabb;
                self.contact_manager.broad_phase.move_proxy(
                    fixture.proxies[i].proxy_id,
                    aabb,
                    displacement,
                );
            }
        }
    }

    /// Recompute mass, center of mass, and rotational inertia from the
    /// body's fixtures.
    fn reset_mass_data(&mut self, handle: BodyHandle) {
        let fixture_handles = self.bodies[handle.0 as usize]
            .as_ref()
            .expect("body")
            .fixtures
            .clone();

        let mut mass = 0.0f32;
        let mut center = Vec2::ZERO;
        let mut inertia = 0.0f32;
        for fh in &fixture_handles {
            let Some(fixture) = self.fixtures.get(fh.0 as usize).and_then(Option::as_ref) else {
                continue;
            };
            if fixture.density() == 0.0 {
                continue;
            }
            let data = fixture.mass_data();
            mass += data.mass;
            center += data.center * data.mass;
            inertia += data.inertia;
        }

        let body = self.bodies[handle.0 as usize].as_mut().expect("body");
        if body.body_type() != BodyType::Dynamic {
            body.mass = 0.0;
            body.inv_mass = 0.0;
            body.inertia = 0.0;
            body.inv_inertia = 0.0;
            body.sweep.local_center = Vec2::ZERO;
            body.sweep.c0 = body.transform.p;
            body.sweep.c = body.transform.p;
            return;
        }

        if mass > 0.0 {
            body.inv_mass = 1.0 / mass;
            center = center * body.inv_mass;
        } else {
            // Dynamic bodies need mass; fall back to one unit
            mass = 1.0;
            body.inv_mass = 1.0;
        }
        body.mass = mass;

        if inertia > 0.0 && !body.is_fixed_rotation() {
            // Shift to the center of mass
            inertia -= mass * center.dot(center);
            debug_assert!(inertia > 0.0, "inertia must stay positive");
            body.inertia = inertia;
            body.inv_inertia = 1.0 / inertia;
        } else {
            body.inertia = 0.0;
            body.inv_inertia = 0.0;
        }

        let old_center = body.sweep.c;
        body.sweep.local_center = center;
        body.sweep.c = body.transform.mul_vec2(center);
        body.sweep.c0 = body.sweep.c;
        // The center moved; update the velocity measured there
        body.linear_velocity +=
            Vec2::cross_sv(body.angular_velocity, body.sweep.c - old_center);
    }

    // =========== Joints ===========

    pub fn create_joint(&mut self, def: &JointDef) -> Result<JointHandle, PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "create_joint",
            });
        }
        let mut joint = Joint::from_def(def);
        if let JointDef::Gear(gear_def) = def {
            let resolution = self.resolve_gear(gear_def.joint_a, gear_def.joint_b, gear_def.ratio)?;
            match &mut joint {
                Joint::Gear(g) => g.resolve(resolution),
                _ => unreachable!("gear def builds a gear joint"),
            }
        }
        let body_a = joint.body_a();
        let body_b = joint.body_b();
        self.check_body(body_a)?;
        self.check_body(body_b)?;

        let collide_connected = joint.collide_connected();
        let handle = if let Some(slot) = self.joint_free.pop() {
            self.joints[slot as usize] = Some(joint);
            JointHandle(slot)
        } else {
            self.joints.push(Some(joint));
            JointHandle((self.joints.len() - 1) as u32)
        };

        self.bodies[body_a.0 as usize]
            .as_mut()
            .expect("joint body")
            .set_awake(true);
        self.bodies[body_b.0 as usize]
            .as_mut()
            .expect("joint body")
            .set_awake(true);

        // Existing contacts between the pair must re-run the filter
        if !collide_connected {
            self.flag_contacts_for_filtering(body_a, body_b);
        }
        Ok(handle)
    }

    pub fn destroy_joint(&mut self, handle: JointHandle) -> Result<(), PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked {
                operation: "destroy_joint",
            });
        }
        if self.joints.get(handle.0 as usize).map_or(true, Option::is_none) {
            return Err(PhysicsError::InvalidHandle {
                index: handle.0 as usize,
                count: self.joints.len(),
            });
        }
        self.remove_joint_slot(handle);
        Ok(())
    }

    fn remove_joint_slot(&mut self, handle: JointHandle) {
        let Some(joint) = self.joints[handle.0 as usize].take() else {
            return;
        };
        self.joint_free.push(handle.0);
        let body_a = joint.body_a();
        let body_b = joint.body_b();
        if let Some(body) = self.bodies.get_mut(body_a.0 as usize).and_then(Option::as_mut) {
            body.set_awake(true);
        }
        if let Some(body) = self.bodies.get_mut(body_b.0 as usize).and_then(Option::as_mut) {
            body.set_awake(true);
        }
        // The pair may collide again now; re-run the filter
        if !joint.collide_connected() {
            self.flag_contacts_for_filtering(body_a, body_b);
        }
    }

    pub fn joint(&self, handle: JointHandle) -> Option<&Joint> {
        self.joints.get(handle.0 as usize)?.as_ref()
    }

    /// Mutable joint access for runtime parameters (motor speeds, mouse
    /// targets). Structure cannot change through this.
    pub fn joint_mut(&mut self, handle: JointHandle) -> Option<&mut Joint> {
        self.joints.get_mut(handle.0 as usize)?.as_mut()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.iter().filter(|j| j.is_some()).count()
    }

    fn flag_contacts_for_filtering(&mut self, body_a: BodyHandle, body_b: BodyHandle) {
        let handles: Vec<ContactHandle> = self.contact_manager.handles().collect();
        for handle in handles {
            let touches = {
                let contact = self.contact_manager.contact(handle).expect("live handle");
                let fa = contact.fixture_a();
                let fb = contact.fixture_b();
                let owner = |fh: FixtureHandle| {
                    self.fixtures
                        .get(fh.0 as usize)
                        .and_then(Option::as_ref)
                        .map(Fixture::body)
                };
                match (owner(fa), owner(fb)) {
                    (Some(a), Some(b)) => {
                        (a == body_a && b == body_b) || (a == body_b && b == body_a)
                    }
                    _ => false,
                }
            };
            if touches {
                self.contact_manager
                    .contact_mut(handle)
                    .expect("live handle")
                    .flag_for_filtering();
            }
        }
    }

    /// Extract the gear endpoint data from two existing revolute or
    /// prismatic joints.
    fn resolve_gear(
        &self,
        joint_a: JointHandle,
        joint_b: JointHandle,
        ratio: f32,
    ) -> Result<GearResolution, PhysicsError> {
        let endpoint = |handle: JointHandle| -> Result<_, PhysicsError> {
            let joint = self.joint(handle).ok_or(PhysicsError::InvalidHandle {
                index: handle.0 as usize,
                count: self.joints.len(),
            })?;
            match joint {
                Joint::Revolute(r) => {
                    let body_c = r.body_a;
                    let body_a = r.body_b;
                    let coord = {
                        let ba = self.body(body_a).ok_or(PhysicsError::InvalidHandle {
                            index: body_a.0 as usize,
                            count: self.bodies.len(),
                        })?;
                        let bc = self.body(body_c).ok_or(PhysicsError::InvalidHandle {
                            index: body_c.0 as usize,
                            count: self.bodies.len(),
                        })?;
                        ba.angle() - bc.angle() - r.reference_angle()
                    };
                    Ok((
                        body_c,
                        body_a,
                        r.local_anchor_a(),
                        r.local_anchor_b(),
                        GearAxis::Revolute {
                            reference_angle: r.reference_angle(),
                        },
                        coord,
                    ))
                }
                Joint::Prismatic(p) => {
                    let body_c = p.body_a;
                    let body_a = p.body_b;
                    let coord = {
                        let ba = self.body(body_a).ok_or(PhysicsError::InvalidHandle {
                            index: body_a.0 as usize,
                            count: self.bodies.len(),
                        })?;
                        let bc = self.body(body_c).ok_or(PhysicsError::InvalidHandle {
                            index: body_c.0 as usize,
                            count: self.bodies.len(),
                        })?;
                        let xf_a = ba.transform();
                        let xf_c = bc.transform();
                        // Anchor of body A expressed in body C's frame
                        let anchor_in_c = xf_c
                            .q
                            .apply_t(xf_a.q.apply(p.local_anchor_b()) + (xf_a.p - xf_c.p));
                        (anchor_in_c - p.local_anchor_a()).dot(p.local_axis_a())
                    };
                    Ok((
                        body_c,
                        body_a,
                        p.local_anchor_a(),
                        p.local_anchor_b(),
                        GearAxis::Prismatic {
                            local_axis: p.local_axis_a(),
                        },
                        coord,
                    ))
                }
                _ => Err(PhysicsError::InvalidConfiguration {
                    reason: "gear joint sources must be revolute or prismatic",
                }),
            }
        };

        let (body_c, body_a, anchor_c, anchor_a, axis_a, coordinate_a) = endpoint(joint_a)?;
        let (body_d, body_b, anchor_d, anchor_b, axis_b, coordinate_b) = endpoint(joint_b)?;

        Ok(GearResolution {
            body_a,
            body_b,
            body_c,
            body_d,
            local_anchor_a: anchor_a,
            local_anchor_b: anchor_b,
            local_anchor_c: anchor_c,
            local_anchor_d: anchor_d,
            axis_a,
            axis_b,
            constant: coordinate_a + ratio * coordinate_b,
        })
    }

    // =========== Contacts ===========

    pub fn contact(&self, handle: ContactHandle) -> Option<&Contact> {
        self.contact_manager.contact(handle)
    }

    pub fn contact_count(&self) -> usize {
        self.contact_manager.contact_count()
    }

    pub fn contact_handles(&self) -> Vec<ContactHandle> {
        self.contact_manager.handles().collect()
    }

    // =========== Particles ===========

    pub fn particles(&self) -> &ParticleSystem {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSystem {
        &mut self.particles
    }

    // =========== Step ===========

    /// Advance the simulation by `dt` seconds.
    pub fn step(
        &mut self,
        dt: f32,
        velocity_iterations: usize,
        position_iterations: usize,
    ) -> Result<StepProfile, PhysicsError> {
        if self.locked {
            return Err(PhysicsError::WorldLocked { operation: "step" });
        }
        let step_start = Instant::now();
        let mut profile = StepProfile::default();

        if self.new_fixtures {
            let t = Instant::now();
            self.find_new_contacts();
            self.new_fixtures = false;
            profile.broad_phase_ms += elapsed_ms(t);
        }

        self.locked = true;
        let step = SolverStep {
            dt,
            inv_dt: if dt > 0.0 { 1.0 / dt } else { 0.0 },
            dt_ratio: self.inv_dt0 * dt,
            velocity_iterations,
            position_iterations,
            warm_starting: self.warm_starting,
        };

        let t = Instant::now();
        self.collide(&mut profile);
        profile.collide_ms = elapsed_ms(t);

        if self.step_complete && step.dt > 0.0 {
            let t = Instant::now();
            self.solve(&step, &mut profile);
            profile.solve_ms = elapsed_ms(t);
        }

        if self.continuous_physics && step.dt > 0.0 {
            let t = Instant::now();
            self.solve_toi(&step, &mut profile);
            profile.solve_toi_ms = elapsed_ms(t);
        }

        if step.dt > 0.0 {
            let t = Instant::now();
            self.particles.solve(
                &step,
                self.gravity,
                &mut self.bodies,
                &self.fixtures,
                &self.contact_manager.broad_phase,
                &mut *self.destruction_listener,
            );
            profile.particle_ms = elapsed_ms(t);
            self.inv_dt0 = step.inv_dt;
        }

        if self.auto_clear_forces {
            self.clear_forces();
        }
        self.locked = false;

        profile.step_ms = elapsed_ms(step_start);
        self.profile = profile;
        Ok(profile)
    }

    /// Zero accumulated forces; called automatically at the end of a step
    /// unless `set_auto_clear_forces(false)`.
    pub fn clear_forces(&mut self) {
        for body in self.bodies.iter_mut().flatten() {
            body.force = Vec2::ZERO;
            body.torque = 0.0;
        }
    }

    /// Destroy one contact, firing `end_contact` first when it was
    /// touching.
    fn destroy_contact(&mut self, handle: ContactHandle) {
        let info = {
            let Some(contact) = self.contact_manager.contact(handle) else {
                return;
            };
            if contact.is_touching() {
                let fa = contact.fixture_a();
                let fb = contact.fixture_b();
                let owner = |fh: FixtureHandle| {
                    self.fixtures
                        .get(fh.0 as usize)
                        .and_then(Option::as_ref)
                        .map(Fixture::body)
                };
                match (owner(fa), owner(fb)) {
                    (Some(body_a), Some(body_b)) => Some(ContactInfo {
                        contact: handle,
                        fixture_a: fa,
                        fixture_b: fb,
                        body_a,
                        body_b,
                    }),
                    _ => None,
                }
            } else {
                None
            }
        };
        if let Some(info) = info {
            self.listener.end_contact(&info);
        }
        self.contact_manager.destroy(handle, &self.fixtures);
    }

    /// Destroy every contact touching `fixture`, with events.
    fn destroy_fixture_contact_list(&mut self, fixture: FixtureHandle) {
        let stale: Vec<ContactHandle> = self
            .contact_manager
            .handles()
            .filter(|&h| {
                let contact = self.contact_manager.contact(h).expect("live handle");
                contact.fixture_a() == fixture || contact.fixture_b() == fixture
            })
            .collect();
        for handle in stale {
            self.destroy_contact(handle);
        }
    }

    fn find_new_contacts(&mut self) {
        let joints = &self.joints;
        self.contact_manager.find_new_contacts(
            &self.fixtures,
            &self.bodies,
            &|a, b| joints_allow_collision(joints, a, b),
        );
    }

    /// Refresh every contact: destroy stale pairs, re-run filters, and
    /// update manifolds with begin/end/pre-solve events.
    fn collide(&mut self, profile: &mut StepProfile) {
        let handles: Vec<ContactHandle> = self.contact_manager.handles().collect();
        for handle in handles {
            let (fa, fb, child_a, child_b, needs_filter) = {
                let contact = self.contact_manager.contact(handle).expect("live handle");
                (
                    contact.fixture_a(),
                    contact.fixture_b(),
                    contact.child_a(),
                    contact.child_b(),
                    contact.flags & CONTACT_FLAG_FILTER != 0,
                )
            };
            let (Some(fixture_a), Some(fixture_b)) = (
                self.fixtures.get(fa.0 as usize).and_then(Option::as_ref),
                self.fixtures.get(fb.0 as usize).and_then(Option::as_ref),
            ) else {
                self.destroy_contact(handle);
                continue;
            };
            let body_a = fixture_a.body();
            let body_b = fixture_b.body();
            let (Some(ba), Some(bb)) = (
                self.bodies.get(body_a.0 as usize).and_then(Option::as_ref),
                self.bodies.get(body_b.0 as usize).and_then(Option::as_ref),
            ) else {
                self.destroy_contact(handle);
                continue;
            };

            if needs_filter {
                let keep = fixture_a.filter().should_collide(&fixture_b.filter())
                    && joints_allow_collision(&self.joints, body_a, body_b);
                if !keep {
                    self.destroy_contact(handle);
                    continue;
                }
            }

            let active_a = ba.is_awake() && ba.body_type() != BodyType::Static;
            let active_b = bb.is_awake() && bb.body_type() != BodyType::Static;
            if !active_a && !active_b {
                continue;
            }

            let proxy_a = fixture_a.proxies[child_a].proxy_id;
            let proxy_b = fixture_b.proxies[child_b].proxy_id;
            if !self.contact_manager.broad_phase.test_overlap(proxy_a, proxy_b) {
                // Fat AABBs separated; the pair is gone
                self.destroy_contact(handle);
                continue;
            }

            let xf_a = *ba.transform();
            let xf_b = *bb.transform();
            let sensor = fixture_a.is_sensor() || fixture_b.is_sensor();
            let info = ContactInfo {
                contact: handle,
                fixture_a: fa,
                fixture_b: fb,
                body_a,
                body_b,
            };

            let fixtures = &self.fixtures;
            let listener = &mut *self.listener;
            let contact = self.contact_manager.contacts[handle.0 as usize]
                .as_mut()
                .expect("live handle");
            if needs_filter {
                contact.flags &= !CONTACT_FLAG_FILTER;
            }
            let shape_a = fixtures[fa.0 as usize].as_ref().expect("fixture").shape();
            let shape_b = fixtures[fb.0 as usize].as_ref().expect("fixture").shape();
            contact.update(shape_a, &xf_a, shape_b, &xf_b, sensor, &info, listener);

            if contact.is_touching() {
                profile.contacts += 1;
                if !sensor && contact.manifold.point_count > 0 {
                    let manifold = contact.manifold;
                    if !listener.pre_solve(&info, &manifold) {
                        contact.set_enabled(false);
                    }
                }
            }
        }
    }

    /// Build sleep/wake islands by flood fill over touching contacts and
    /// joints, then solve each island independently.
    fn solve(&mut self, step: &SolverStep, profile: &mut StepProfile) {
        let body_slots = self.bodies.len();

        for body in self.bodies.iter_mut().flatten() {
            body.flags &= !BODY_FLAG_ISLAND;
        }
        for contact in self.contact_manager.contacts.iter_mut().flatten() {
            contact.flags &= !CONTACT_FLAG_ISLAND;
        }
        let mut joint_in_island = vec![false; self.joints.len()];

        // Adjacency in slot order so island composition is reproducible
        let mut contact_adj: Vec<Vec<(ContactHandle, BodyHandle)>> = vec![Vec::new(); body_slots];
        let contact_handles: Vec<ContactHandle> = self.contact_manager.handles().collect();
        for handle in contact_handles {
            let contact = self.contact_manager.contact(handle).expect("live handle");
            if !contact.is_enabled() || !contact.is_touching() {
                continue;
            }
            let fa = contact.fixture_a();
            let fb = contact.fixture_b();
            let (Some(fixture_a), Some(fixture_b)) = (
                self.fixtures.get(fa.0 as usize).and_then(Option::as_ref),
                self.fixtures.get(fb.0 as usize).and_then(Option::as_ref),
            ) else {
                continue;
            };
            if fixture_a.is_sensor() || fixture_b.is_sensor() {
                continue;
            }
            let body_a = fixture_a.body();
            let body_b = fixture_b.body();
            contact_adj[body_a.0 as usize].push((handle, body_b));
            contact_adj[body_b.0 as usize].push((handle, body_a));
        }

        let mut joint_adj: Vec<Vec<(JointHandle, BodyHandle)>> = vec![Vec::new(); body_slots];
        for (i, slot) in self.joints.iter().enumerate() {
            let Some(joint) = slot.as_ref() else { continue };
            let handle = JointHandle(i as u32);
            // Gears constrain four bodies; all must land in one island
            let connected: Vec<BodyHandle> = match joint {
                Joint::Gear(g) => g.bodies().to_vec(),
                _ => vec![joint.body_a(), joint.body_b()],
            };
            for &a in &connected {
                for &b in &connected {
                    if a != b {
                        joint_adj[a.0 as usize].push((handle, b));
                    }
                }
            }
        }

        let seeds: Vec<BodyHandle> = self.body_handles().collect();
        let mut stack: Vec<BodyHandle> = Vec::with_capacity(body_slots);
        for seed in seeds {
            {
                let body = self.bodies[seed.0 as usize].as_ref().expect("seed body");
                if body.flags & BODY_FLAG_ISLAND != 0
                    || !body.is_awake()
                    || !body.is_enabled()
                    || body.body_type() == BodyType::Static
                {
                    continue;
                }
            }

            self.island.clear();
            stack.clear();
            stack.push(seed);
            self.bodies[seed.0 as usize].as_mut().expect("seed body").flags |= BODY_FLAG_ISLAND;

            while let Some(bh) = stack.pop() {
                let is_static = {
                    let body = self.bodies[bh.0 as usize].as_mut().expect("island body");
                    body.set_awake(true);
                    body.body_type() == BodyType::Static
                };
                self.island
                    .add_body(bh, self.bodies[bh.0 as usize].as_mut().expect("island body"));
                // Static bodies anchor islands but never join them
                if is_static {
                    continue;
                }

                for &(ch, other) in &contact_adj[bh.0 as usize] {
                    {
                        let contact = self
                            .contact_manager
                            .contact_mut(ch)
                            .expect("adjacent contact");
                        if contact.flags & CONTACT_FLAG_ISLAND != 0 {
                            continue;
                        }
                        contact.flags |= CONTACT_FLAG_ISLAND;
                    }
                    self.island.add_contact(ch);
                    let body = self.bodies[other.0 as usize].as_mut().expect("other body");
                    if body.flags & BODY_FLAG_ISLAND != 0 {
                        continue;
                    }
                    body.flags |= BODY_FLAG_ISLAND;
                    stack.push(other);
                }

                for &(jh, other) in &joint_adj[bh.0 as usize] {
                    let enabled = self.bodies[other.0 as usize]
                        .as_ref()
                        .map_or(false, Body::is_enabled);
                    if !enabled {
                        continue;
                    }
                    if !joint_in_island[jh.0 as usize] {
                        joint_in_island[jh.0 as usize] = true;
                        self.island.add_joint(jh);
                    }
                    let body = self.bodies[other.0 as usize].as_mut().expect("other body");
                    if body.flags & BODY_FLAG_ISLAND != 0 {
                        continue;
                    }
                    body.flags |= BODY_FLAG_ISLAND;
                    stack.push(other);
                }
            }

            self.island.solve(
                step,
                self.gravity,
                &mut self.bodies,
                &self.fixtures,
                &mut self.contact_manager,
                &mut self.joints,
                &mut *self.listener,
                self.allow_sleep,
            );
            profile.islands += 1;

            // Statics can seed many islands; release them
            let members = self.island.bodies.clone();
            for bh in members {
                let body = self.bodies[bh.0 as usize].as_mut().expect("island body");
                if body.body_type() == BodyType::Static {
                    body.flags &= !BODY_FLAG_ISLAND;
                }
            }
        }

        // Moved bodies need fresh proxies, then a broad-phase pass
        let t = Instant::now();
        let moved: Vec<BodyHandle> = self
            .body_handles()
            .filter(|&bh| {
                let body = self.bodies[bh.0 as usize].as_ref().expect("body");
                body.flags & BODY_FLAG_ISLAND != 0 && body.body_type() != BodyType::Static
            })
            .collect();
        for bh in moved {
            self.synchronize_fixtures(bh);
        }
        self.find_new_contacts();
        profile.broad_phase_ms += elapsed_ms(t);
    }

    // =========== Continuous collision ===========

    /// Sweep fast bodies through the step: find the earliest time of
    /// impact, advance the pair there, solve a mini island, and repeat
    /// until the interval is clean.
    fn solve_toi(&mut self, step: &SolverStep, profile: &mut StepProfile) {
        if self.step_complete {
            for body in self.bodies.iter_mut().flatten() {
                body.flags &= !BODY_FLAG_ISLAND;
                body.sweep.alpha0 = 0.0;
            }
            for contact in self.contact_manager.contacts.iter_mut().flatten() {
                contact.flags &= !(CONTACT_FLAG_TOI | CONTACT_FLAG_ISLAND);
                contact.toi_count = 0;
                contact.toi = 1.0;
            }
        }

        loop {
            let (min_contact, min_alpha) = self.find_min_toi();

            let Some(handle) = min_contact else {
                self.step_complete = true;
                break;
            };
            if min_alpha >= 1.0 - 10.0 * f32::EPSILON {
                self.step_complete = true;
                break;
            }

            let (fa, fb, body_a, body_b) = {
                let contact = self.contact_manager.contact(handle).expect("toi contact");
                let fa = contact.fixture_a();
                let fb = contact.fixture_b();
                let body_a = self.fixtures[fa.0 as usize].as_ref().expect("fixture").body();
                let body_b = self.fixtures[fb.0 as usize].as_ref().expect("fixture").body();
                (fa, fb, body_a, body_b)
            };

            let backup_a = self.bodies[body_a.0 as usize].as_ref().expect("body").sweep;
            let backup_b = self.bodies[body_b.0 as usize].as_ref().expect("body").sweep;
            self.advance_body(body_a, min_alpha);
            self.advance_body(body_b, min_alpha);

            // Narrow phase at the impact time
            self.update_contact(handle, fa, fb, body_a, body_b);
            {
                let contact = self
                    .contact_manager
                    .contact_mut(handle)
                    .expect("toi contact");
                contact.flags &= !CONTACT_FLAG_TOI;
                contact.toi_count += 1;
                if !contact.is_enabled() || !contact.is_touching() {
                    // Speculative impact did not materialize; rewind
                    contact.set_enabled(false);
                    let ba = self.bodies[body_a.0 as usize].as_mut().expect("body");
                    ba.sweep = backup_a;
                    ba.synchronize_transform();
                    let bb = self.bodies[body_b.0 as usize].as_mut().expect("body");
                    bb.sweep = backup_b;
                    bb.synchronize_transform();
                    continue;
                }
            }
            self.bodies[body_a.0 as usize].as_mut().expect("body").set_awake(true);
            self.bodies[body_b.0 as usize].as_mut().expect("body").set_awake(true);
            profile.toi_events += 1;

            // Mini island around the impact pair
            self.island.clear();
            self.island
                .add_body(body_a, self.bodies[body_a.0 as usize].as_mut().expect("body"));
            self.island
                .add_body(body_b, self.bodies[body_b.0 as usize].as_mut().expect("body"));
            self.island.add_contact(handle);
            self.bodies[body_a.0 as usize].as_mut().expect("body").flags |= BODY_FLAG_ISLAND;
            self.bodies[body_b.0 as usize].as_mut().expect("body").flags |= BODY_FLAG_ISLAND;
            self.contact_manager
                .contact_mut(handle)
                .expect("toi contact")
                .flags |= CONTACT_FLAG_ISLAND;

            for anchor in [body_a, body_b] {
                if self.bodies[anchor.0 as usize].as_ref().expect("body").body_type()
                    == BodyType::Dynamic
                {
                    self.grow_toi_island(anchor, min_alpha);
                }
            }

            let sub_dt = (1.0 - min_alpha) * step.dt;
            let sub_step = SolverStep {
                dt: sub_dt,
                inv_dt: if sub_dt > 0.0 { 1.0 / sub_dt } else { 0.0 },
                dt_ratio: 1.0,
                velocity_iterations: step.velocity_iterations,
                position_iterations: 20,
                warm_starting: false,
            };
            self.island.solve_toi(
                &sub_step,
                &mut self.bodies,
                &self.fixtures,
                &mut self.contact_manager,
                0,
                1,
            );

            // Invalidate cached TOIs touching moved bodies and re-pair
            let members = self.island.bodies.clone();
            for bh in &members {
                let is_dynamic = {
                    let body = self.bodies[bh.0 as usize].as_mut().expect("body");
                    body.flags &= !BODY_FLAG_ISLAND;
                    body.body_type() == BodyType::Dynamic
                };
                if !is_dynamic {
                    continue;
                }
                self.synchronize_fixtures(*bh);
                let stale: Vec<ContactHandle> = self
                    .contact_manager
                    .handles()
                    .filter(|&ch| {
                        let contact = self.contact_manager.contact(ch).expect("live handle");
                        let fa = contact.fixture_a();
                        let fb = contact.fixture_b();
                        let owner = |fh: FixtureHandle| {
                            self.fixtures
                                .get(fh.0 as usize)
                                .and_then(Option::as_ref)
                                .map(Fixture::body)
                        };
                        owner(fa) == Some(*bh) || owner(fb) == Some(*bh)
                    })
                    .collect();
                for ch in stale {
                    let contact = self.contact_manager.contact_mut(ch).expect("live handle");
                    contact.flags &= !(CONTACT_FLAG_TOI | CONTACT_FLAG_ISLAND);
                }
            }
            self.find_new_contacts();
        }
    }

    /// Scan every contact for the earliest time of impact in the
    /// remaining step interval.
    fn find_min_toi(&mut self) -> (Option<ContactHandle>, f32) {
        let mut min_contact = None;
        let mut min_alpha = 1.0f32;

        let handles: Vec<ContactHandle> = self.contact_manager.handles().collect();
        for handle in handles {
            let (fa, fb, child_a, child_b, enabled, toi_count, cached) = {
                let contact = self.contact_manager.contact(handle).expect("live handle");
                (
                    contact.fixture_a(),
                    contact.fixture_b(),
                    contact.child_a(),
                    contact.child_b(),
                    contact.is_enabled(),
                    contact.toi_count,
                    (contact.flags & CONTACT_FLAG_TOI != 0).then_some(contact.toi),
                )
            };
            if !enabled || toi_count > MAX_SUB_STEPS {
                continue;
            }

            let alpha = if let Some(toi) = cached {
                toi
            } else {
                let (Some(fixture_a), Some(fixture_b)) = (
                    self.fixtures.get(fa.0 as usize).and_then(Option::as_ref),
                    self.fixtures.get(fb.0 as usize).and_then(Option::as_ref),
                ) else {
                    continue;
                };
                if fixture_a.is_sensor() || fixture_b.is_sensor() {
                    continue;
                }
                let body_a = fixture_a.body();
                let body_b = fixture_b.body();
                let (Some(ba), Some(bb)) = (
                    self.bodies.get(body_a.0 as usize).and_then(Option::as_ref),
                    self.bodies.get(body_b.0 as usize).and_then(Option::as_ref),
                ) else {
                    continue;
                };

                let type_a = ba.body_type();
                let type_b = bb.body_type();
                if type_a != BodyType::Dynamic && type_b != BodyType::Dynamic {
                    continue;
                }
                let active_a = ba.is_awake() && type_a != BodyType::Static;
                let active_b = bb.is_awake() && type_b != BodyType::Static;
                if !active_a && !active_b {
                    continue;
                }
                // Non-bullet dynamic pairs tunnel-check against statics only
                let collide_a = ba.is_bullet() || type_a != BodyType::Dynamic;
                let collide_b = bb.is_bullet() || type_b != BodyType::Dynamic;
                if !collide_a && !collide_b {
                    continue;
                }

                // Bring both sweeps to a common start time
                let alpha0 = ba.sweep.alpha0.max(bb.sweep.alpha0);
                if alpha0 >= 1.0 {
                    continue;
                }
                let proxy_a = DistanceProxy::from_shape(fixture_a.shape(), child_a);
                let proxy_b = DistanceProxy::from_shape(fixture_b.shape(), child_b);
                {
                    let body = self.bodies[body_a.0 as usize].as_mut().expect("body");
                    if body.sweep.alpha0 < alpha0 {
                        body.sweep.advance(alpha0);
                    }
                }
                {
                    let body = self.bodies[body_b.0 as usize].as_mut().expect("body");
                    if body.sweep.alpha0 < alpha0 {
                        body.sweep.advance(alpha0);
                    }
                }
                let input = ToiInput {
                    proxy_a,
                    proxy_b,
                    sweep_a: self.bodies[body_a.0 as usize].as_ref().expect("body").sweep,
                    sweep_b: self.bodies[body_b.0 as usize].as_ref().expect("body").sweep,
                    t_max: 1.0,
                };
                let output = time_of_impact(&input);
                let alpha = if output.state == ToiState::Touching {
                    (alpha0 + (1.0 - alpha0) * output.t).min(1.0)
                } else {
                    1.0
                };
                let contact = self.contact_manager.contact_mut(handle).expect("live handle");
                contact.toi = alpha;
                contact.flags |= CONTACT_FLAG_TOI;
                alpha
            };

            if alpha < min_alpha {
                min_alpha = alpha;
                min_contact = Some(handle);
            }
        }
        (min_contact, min_alpha)
    }

    /// Pull the contacts around a TOI body into the mini island so the
    /// impact response sees its local neighborhood.
    fn grow_toi_island(&mut self, anchor: BodyHandle, min_alpha: f32) {
        let anchor_bullet = self.bodies[anchor.0 as usize]
            .as_ref()
            .expect("body")
            .is_bullet();
        let handles: Vec<ContactHandle> = self.contact_manager.handles().collect();
        for ch in handles {
            if self.island.contacts.len() == MAX_TOI_CONTACTS {
                break;
            }
            let (fa, fb, flags) = {
                let contact = self.contact_manager.contact(ch).expect("live handle");
                (contact.fixture_a(), contact.fixture_b(), contact.flags)
            };
            if flags & CONTACT_FLAG_ISLAND != 0 {
                continue;
            }
            let (Some(fixture_a), Some(fixture_b)) = (
                self.fixtures.get(fa.0 as usize).and_then(Option::as_ref),
                self.fixtures.get(fb.0 as usize).and_then(Option::as_ref),
            ) else {
                continue;
            };
            if fixture_a.is_sensor() || fixture_b.is_sensor() {
                continue;
            }
            let body_a = fixture_a.body();
            let body_b = fixture_b.body();
            let other = if body_a == anchor {
                body_b
            } else if body_b == anchor {
                body_a
            } else {
                continue;
            };
            let (other_type, other_bullet) = {
                let body = self.bodies[other.0 as usize].as_ref().expect("body");
                (body.body_type(), body.is_bullet())
            };
            // Only statics, kinematics, and bullets join a non-bullet
            // impact neighborhood
            if other_type == BodyType::Dynamic && !anchor_bullet && !other_bullet {
                continue;
            }

            let backup = self.bodies[other.0 as usize].as_ref().expect("body").sweep;
            if backup.alpha0 < min_alpha {
                self.advance_body(other, min_alpha);
            }
            self.update_contact(ch, fa, fb, body_a, body_b);
            let ok = {
                let contact = self.contact_manager.contact(ch).expect("live handle");
                contact.is_enabled() && contact.is_touching()
            };
            if !ok {
                let body = self.bodies[other.0 as usize].as_mut().expect("body");
                body.sweep = backup;
                body.synchronize_transform();
                continue;
            }
            self.contact_manager.contact_mut(ch).expect("live handle").flags |=
                CONTACT_FLAG_ISLAND;
            self.island.add_contact(ch);

            let body = self.bodies[other.0 as usize].as_mut().expect("body");
            if body.flags & BODY_FLAG_ISLAND != 0 {
                continue;
            }
            body.flags |= BODY_FLAG_ISLAND;
            body.set_awake(true);
            self.island
                .add_body(other, self.bodies[other.0 as usize].as_mut().expect("body"));
        }
    }

    fn advance_body(&mut self, handle: BodyHandle, alpha: f32) {
        let body = self.bodies[handle.0 as usize].as_mut().expect("body");
        body.sweep.advance(alpha);
        body.sweep.c = body.sweep.c0;
        body.sweep.a = body.sweep.a0;
        body.synchronize_transform();
    }

    /// Narrow-phase refresh of one contact at the bodies' current
    /// transforms, with listener events.
    fn update_contact(
        &mut self,
        handle: ContactHandle,
        fa: FixtureHandle,
        fb: FixtureHandle,
        body_a: BodyHandle,
        body_b: BodyHandle,
    ) {
        let xf_a = *self.bodies[body_a.0 as usize].as_ref().expect("body").transform();
        let xf_b = *self.bodies[body_b.0 as usize].as_ref().expect("body").transform();
        let info = ContactInfo {
            contact: handle,
            fixture_a: fa,
            fixture_b: fb,
            body_a,
            body_b,
        };
        let fixtures = &self.fixtures;
        let sensor = fixtures[fa.0 as usize].as_ref().expect("fixture").is_sensor()
            || fixtures[fb.0 as usize].as_ref().expect("fixture").is_sensor();
        let listener = &mut *self.listener;
        let contact = self.contact_manager.contacts[handle.0 as usize]
            .as_mut()
            .expect("live handle");
        let shape_a = fixtures[fa.0 as usize].as_ref().expect("fixture").shape();
        let shape_b = fixtures[fb.0 as usize].as_ref().expect("fixture").shape();
        contact.update(shape_a, &xf_a, shape_b, &xf_b, sensor, &info, listener);
    }

    // =========== Queries ===========

    /// Call `callback` for every fixture whose fat AABB overlaps `aabb`.
    /// Return `false` from the callback to stop early.
    pub fn query_aabb<F: FnMut(FixtureHandle) -> bool>(&self, aabb: &Aabb, mut callback: F) {
        let broad_phase: &BroadPhase = &self.contact_manager.broad_phase;
        broad_phase.query(aabb, |proxy_id| {
            let (fixture, _child) = unpack_proxy(broad_phase.user_data(proxy_id));
            callback(fixture)
        });
    }

    /// Cast a ray from `p1` to `p2`. The callback receives the fixture,
    /// hit point, surface normal, and fraction; its return value steers
    /// the traversal: 0 stops, the fraction clips the ray (closest-hit
    /// search), 1 continues unclipped, and a negative value ignores the
    /// fixture.
    pub fn ray_cast<F: FnMut(FixtureHandle, Vec2, Vec2, f32) -> f32>(
        &self,
        p1: Vec2,
        p2: Vec2,
        mut callback: F,
    ) {
        let input = RayCastInput {
            p1,
            p2,
            max_fraction: 1.0,
        };
        let broad_phase: &BroadPhase = &self.contact_manager.broad_phase;
        broad_phase.ray_cast(&input, |sub_input, proxy_id| {
            let (fh, child) = unpack_proxy(broad_phase.user_data(proxy_id));
            let Some(fixture) = self.fixtures.get(fh.0 as usize).and_then(Option::as_ref) else {
                return sub_input.max_fraction;
            };
            let Some(body) = self.bodies.get(fixture.body().0 as usize).and_then(Option::as_ref)
            else {
                return sub_input.max_fraction;
            };
            if let Some(output) = fixture.shape().ray_cast(sub_input, body.transform(), child) {
                let point = sub_input.p1 + (sub_input.p2 - sub_input.p1) * output.fraction;
                return callback(fh, point, output.normal, output.fraction);
            }
            sub_input.max_fraction
        });
    }

    // =========== Debug draw ===========

    /// Walk all geometry and render it through the hooks.
    pub fn debug_draw(&self, draw: &mut dyn DebugDraw) {
        for body in self.bodies.iter().flatten() {
            let xf = body.transform();
            let color = match body.body_type() {
                BodyType::Static => [0.5, 0.9, 0.5],
                BodyType::Kinematic => [0.5, 0.5, 0.9],
                BodyType::Dynamic if !body.is_awake() => [0.6, 0.6, 0.6],
                BodyType::Dynamic => [0.9, 0.7, 0.7],
            };
            for &fh in &body.fixtures {
                let Some(fixture) = self.fixtures.get(fh.0 as usize).and_then(Option::as_ref)
                else {
                    continue;
                };
                match fixture.shape() {
                    Shape::Circle(c) => {
                        let center = xf.mul_vec2(c.position);
                        let axis = xf.q.apply(Vec2::new(1.0, 0.0));
                        draw.draw_solid_circle(center, c.radius, axis, color);
                    }
                    Shape::Polygon(p) => {
                        let vertices: Vec<Vec2> =
                            p.verts().iter().map(|&v| xf.mul_vec2(v)).collect();
                        draw.draw_solid_polygon(&vertices, color);
                    }
                    Shape::Edge(e) => {
                        draw.draw_segment(xf.mul_vec2(e.vertex1), xf.mul_vec2(e.vertex2), color);
                    }
                    Shape::Chain(chain) => {
                        for child in 0..chain.child_count() {
                            let e = chain.child_edge(child);
                            draw.draw_segment(
                                xf.mul_vec2(e.vertex1),
                                xf.mul_vec2(e.vertex2),
                                color,
                            );
                        }
                    }
                }
            }
            draw.draw_transform(xf);
        }
        if self.particles.particle_count() > 0 {
            draw.draw_particles(self.particles.position_buffer(), self.particles.radius());
        }
    }
}

/// False when a joint between the pair disables their collision.
fn joints_allow_collision(joints: &[Option<Joint>], a: BodyHandle, b: BodyHandle) -> bool {
    for joint in joints.iter().flatten() {
        if joint.collide_connected() {
            continue;
        }
        let ja = joint.body_a();
        let jb = joint.body_b();
        if (ja == a && jb == b) || (ja == b && jb == a) {
            return false;
        }
    }
    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{CircleShape, PolygonShape};

    fn dynamic_body(world: &mut World, x: f32, y: f32) -> BodyHandle {
        let def = BodyDef {
            body_type: BodyType::Dynamic,
            position: Vec2::new(x, y),
            ..BodyDef::default()
        };
        world.create_body(&def).unwrap()
    }

    fn ground(world: &mut World) -> BodyHandle {
        let body = world.create_body(&BodyDef::default()).unwrap();
        let shape = Shape::Polygon(PolygonShape::new_box(50.0, 1.0).unwrap());
        world.create_fixture(body, &FixtureDef::new(shape)).unwrap();
        body
    }

    fn boxed(world: &mut World, body: BodyHandle, half: f32) {
        let shape = Shape::Polygon(PolygonShape::new_box(half, half).unwrap());
        let mut def = FixtureDef::new(shape);
        def.density = 1.0;
        world.create_fixture(body, &def).unwrap();
    }

    #[test]
    fn test_create_body_reuses_free_slots() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let a = world.create_body(&BodyDef::default()).unwrap();
        let b = world.create_body(&BodyDef::default()).unwrap();
        world.destroy_body(a).unwrap();
        let c = world.create_body(&BodyDef::default()).unwrap();
        assert_eq!(c, a, "Freed slot is reused");
        assert_ne!(b, c);
        assert_eq!(world.body_count(), 2);
    }

    #[test]
    fn test_fixture_gives_dynamic_body_mass() {
        let mut world = World::new(Vec2::ZERO);
        let body = dynamic_body(&mut world, 0.0, 0.0);
        assert!((world.body(body).unwrap().mass() - 1.0).abs() < 1e-6, "Fixture-less default");
        boxed(&mut world, body, 1.0);
        let mass = world.body(body).unwrap().mass();
        assert!((mass - 4.0).abs() < 1e-4, "2x2 box at density 1 weighs 4, got {mass}");
        assert!(world.body(body).unwrap().inertia() > 0.0);
    }

    #[test]
    fn test_free_fall_matches_gravity() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        let body = dynamic_body(&mut world, 0.0, 100.0);
        boxed(&mut world, body, 0.5);
        let dt = 1.0 / 60.0;
        world.step(dt, 8, 3).unwrap();
        let v = world.body(body).unwrap().linear_velocity();
        assert!((v.y + 10.0 * dt).abs() < 1e-5, "One step of gravity, got {}", v.y);
    }

    #[test]
    fn test_box_settles_on_ground() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        ground(&mut world);
        let body = dynamic_body(&mut world, 0.0, 4.0);
        boxed(&mut world, body, 0.5);
        for _ in 0..120 {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
        let p = world.body(body).unwrap().position();
        // Resting on top of the 1-half-height ground slab
        assert!((p.y - 1.5).abs() < 0.05, "Box rests at y=1.5, got {}", p.y);
        let v = world.body(body).unwrap().linear_velocity();
        assert!(v.length() < 0.1, "Settled box is nearly still, got {:?}", v);
    }

    #[test]
    fn test_settled_box_falls_asleep() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        ground(&mut world);
        let body = dynamic_body(&mut world, 0.0, 2.0);
        boxed(&mut world, body, 0.5);
        for _ in 0..300 {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
        assert!(!world.body(body).unwrap().is_awake(), "Resting body sleeps");
    }

    #[test]
    fn test_destroy_body_cascades_to_joints_and_fixtures() {
        struct Recorder {
            joints: usize,
            fixtures: usize,
        }
        impl DestructionListener for Recorder {
            fn joint_destroyed(&mut self, _j: JointHandle) {
                self.joints += 1;
            }
            fn fixture_destroyed(&mut self, _f: FixtureHandle) {
                self.fixtures += 1;
            }
        }
        // Leak-free sharing of counters across the Box<dyn> boundary
        use std::cell::RefCell;
        use std::rc::Rc;
        struct Shared(Rc<RefCell<Recorder>>);
        impl DestructionListener for Shared {
            fn joint_destroyed(&mut self, j: JointHandle) {
                self.0.borrow_mut().joint_destroyed(j);
            }
            fn fixture_destroyed(&mut self, f: FixtureHandle) {
                self.0.borrow_mut().fixture_destroyed(f);
            }
        }
        let counts = Rc::new(RefCell::new(Recorder {
            joints: 0,
            fixtures: 0,
        }));
        let mut world = World::new(Vec2::ZERO);
        world.set_destruction_listener(Box::new(Shared(counts.clone())));

        let a = dynamic_body(&mut world, 0.0, 0.0);
        boxed(&mut world, a, 0.5);
        let b = dynamic_body(&mut world, 2.0, 0.0);
        boxed(&mut world, b, 0.5);
        let def = crate::joint::DistanceJointDef::new(a, b, 2.0);
        let joint = world.create_joint(&JointDef::Distance(def)).unwrap();

        world.destroy_body(a).unwrap();
        assert_eq!(counts.borrow().joints, 1, "Joint destruction reported");
        assert_eq!(counts.borrow().fixtures, 1, "Fixture destruction reported");
        assert!(world.joint(joint).is_none());
        assert!(world.body(a).is_none());
        assert!(world.body(b).is_some());
    }

    #[test]
    fn test_sensor_reports_overlap_without_response() {
        use std::cell::RefCell;
        use std::rc::Rc;
        #[derive(Default)]
        struct Events {
            begins: usize,
        }
        struct Listener(Rc<RefCell<Events>>);
        impl ContactListener for Listener {
            fn begin_contact(&mut self, _c: &ContactInfo) {
                self.0.borrow_mut().begins += 1;
            }
        }
        let events = Rc::new(RefCell::new(Events::default()));
        let mut world = World::new(Vec2::new(0.0, -10.0));
        world.set_contact_listener(Box::new(Listener(events.clone())));

        let sensor_body = world.create_body(&BodyDef::default()).unwrap();
        let mut sensor_def =
            FixtureDef::new(Shape::Polygon(PolygonShape::new_box(5.0, 5.0).unwrap()));
        sensor_def.is_sensor = true;
        world.create_fixture(sensor_body, &sensor_def).unwrap();

        let faller = dynamic_body(&mut world, 0.0, 3.0);
        boxed(&mut world, faller, 0.5);
        for _ in 0..60 {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
        assert!(events.borrow().begins > 0, "Sensor fired begin_contact");
        let v = world.body(faller).unwrap().linear_velocity();
        assert!(v.y < -1.0, "Sensor never blocks motion, vy={}", v.y);
    }

    #[test]
    fn test_joined_bodies_do_not_collide_by_default() {
        let mut world = World::new(Vec2::ZERO);
        let a = dynamic_body(&mut world, 0.0, 0.0);
        boxed(&mut world, a, 1.0);
        let b = dynamic_body(&mut world, 0.5, 0.0);
        boxed(&mut world, b, 1.0);
        let mut def = crate::joint::RevoluteJointDef::new(a, b);
        def.local_anchor_a = Vec2::new(0.25, 0.0);
        def.local_anchor_b = Vec2::new(-0.25, 0.0);
        world.create_joint(&JointDef::Revolute(def)).unwrap();
        for _ in 0..10 {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
        let touching = world
            .contact_handles()
            .iter()
            .filter_map(|&h| world.contact(h))
            .filter(|c| c.is_touching())
            .count();
        assert_eq!(touching, 0, "Joint suppresses collision between its bodies");
    }

    #[test]
    fn test_query_aabb_finds_fixture() {
        let mut world = World::new(Vec2::ZERO);
        let body = world.create_body(&BodyDef::default()).unwrap();
        let fh = world
            .create_fixture(
                body,
                &FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap())),
            )
            .unwrap();
        // Proxies exist immediately; no step needed
        let mut found = Vec::new();
        world.query_aabb(
            &Aabb::new(Vec2::new(-2.0, -2.0), Vec2::new(2.0, 2.0)),
            |f| {
                found.push(f);
                true
            },
        );
        assert_eq!(found, vec![fh]);
        found.clear();
        world.query_aabb(
            &Aabb::new(Vec2::new(50.0, 50.0), Vec2::new(60.0, 60.0)),
            |f| {
                found.push(f);
                true
            },
        );
        assert!(found.is_empty(), "Distant query finds nothing");
    }

    #[test]
    fn test_ray_cast_closest_hit() {
        let mut world = World::new(Vec2::ZERO);
        let near = world
            .create_body(&BodyDef {
                position: Vec2::new(5.0, 0.0),
                ..BodyDef::default()
            })
            .unwrap();
        let near_fixture = world
            .create_fixture(
                near,
                &FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap())),
            )
            .unwrap();
        let far = world
            .create_body(&BodyDef {
                position: Vec2::new(10.0, 0.0),
                ..BodyDef::default()
            })
            .unwrap();
        world
            .create_fixture(
                far,
                &FixtureDef::new(Shape::Circle(CircleShape::new(1.0).unwrap())),
            )
            .unwrap();

        let mut closest: Option<(FixtureHandle, f32)> = None;
        world.ray_cast(Vec2::ZERO, Vec2::new(20.0, 0.0), |f, _point, _normal, fraction| {
            closest = Some((f, fraction));
            fraction
        });
        let (hit, fraction) = closest.expect("ray hit something");
        assert_eq!(hit, near_fixture, "Closest-hit search ends on the near circle");
        assert!((fraction - 0.2).abs() < 1e-3, "Hit at x=4, fraction 0.2, got {fraction}");
    }

    #[test]
    fn test_lock_released_after_step() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        ground(&mut world);
        let body = dynamic_body(&mut world, 0.0, 1.4);
        boxed(&mut world, body, 0.5);
        world.step(1.0 / 60.0, 8, 3).unwrap();
        assert!(!world.is_locked(), "Lock released after step");
        assert!(world.create_body(&BodyDef::default()).is_ok());
    }

    #[test]
    fn test_bullet_does_not_tunnel_through_thin_wall() {
        let mut world = World::new(Vec2::ZERO);
        let wall = world.create_body(&BodyDef::default()).unwrap();
        let wall_shape = Shape::Polygon(PolygonShape::new_box(0.1, 10.0).unwrap());
        world.create_fixture(wall, &FixtureDef::new(wall_shape)).unwrap();

        let bullet = world
            .create_body(&BodyDef {
                body_type: BodyType::Dynamic,
                position: Vec2::new(-5.0, 0.0),
                linear_velocity: Vec2::new(300.0, 0.0),
                bullet: true,
                ..BodyDef::default()
            })
            .unwrap();
        let mut def = FixtureDef::new(Shape::Circle(CircleShape::new(0.2).unwrap()));
        def.density = 1.0;
        def.restitution = 0.0;
        world.create_fixture(bullet, &def).unwrap();

        for _ in 0..10 {
            world.step(1.0 / 60.0, 8, 3).unwrap();
        }
        let x = world.body(bullet).unwrap().position().x;
        assert!(x < 0.0, "Bullet stopped at the wall, got x={x}");
    }

    #[test]
    fn test_identical_runs_are_bit_identical() {
        let run = || {
            let mut world = World::new(Vec2::new(0.0, -10.0));
            ground(&mut world);
            for i in 0..10 {
                let body = dynamic_body(&mut world, (i as f32) * 0.9 - 4.0, 2.0 + i as f32);
                boxed(&mut world, body, 0.45);
            }
            for _ in 0..120 {
                world.step(1.0 / 60.0, 8, 3).unwrap();
            }
            world
                .body_handles()
                .map(|h| {
                    let b = world.body(h).unwrap();
                    (b.position().x.to_bits(), b.position().y.to_bits(), b.angle().to_bits())
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run(), "Same inputs produce bit-identical states");
    }

    #[test]
    fn test_step_profile_counts_islands() {
        let mut world = World::new(Vec2::new(0.0, -10.0));
        ground(&mut world);
        // Two separated stacks form two islands
        for x in [-20.0, 20.0] {
            let body = dynamic_body(&mut world, x, 1.6);
            boxed(&mut world, body, 0.5);
        }
        let profile = world.step(1.0 / 60.0, 8, 3).unwrap();
        assert_eq!(profile.islands, 2, "Disjoint stacks solve as separate islands");
    }
}
