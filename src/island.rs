//! Solver Islands
//!
//! An island is a connected set of awake dynamic bodies, the contacts
//! and joints linking them, and the scratch position/velocity arrays
//! the solvers iterate over. Islands are rebuilt every step by flood
//! fill over the constraint graph; static bodies participate but do not
//! propagate the fill, so two stacks on one ground solve independently.
//!
//! Solve order per island: integrate forces, warm start, velocity
//! iterations (joints then contacts), integrate positions with
//! translation/rotation clamps, position iterations (NGS), write back,
//! sleep bookkeeping.
//!
//! Author: Moroya Sakamoto

use crate::body::{Body, BodyHandle, BodyType};
use crate::callbacks::{ContactImpulse, ContactInfo, ContactListener};
use crate::contact::{ContactHandle, ContactManager};
use crate::contact_solver::{
    ContactConstraintSource, ContactSolver, Position, Velocity,
};
use crate::fixture::Fixture;
use crate::joint::{Joint, JointBodyData, JointHandle, SolverData, SolverStep};
use crate::math::Vec2;
use crate::settings::{
    ANGULAR_SLEEP_TOLERANCE, LINEAR_SLEEP_TOLERANCE, MAX_ROTATION, MAX_ROTATION_SQUARED,
    MAX_TRANSLATION, MAX_TRANSLATION_SQUARED, TIME_TO_SLEEP,
};

/// Reusable island buffers.
pub(crate) struct Island {
    pub bodies: Vec<BodyHandle>,
    pub contacts: Vec<ContactHandle>,
    pub joints: Vec<JointHandle>,
    positions: Vec<Position>,
    velocities: Vec<Velocity>,
}

impl Island {
    pub(crate) fn new() -> Self {
        Self {
            bodies: Vec::new(),
            contacts: Vec::new(),
            joints: Vec::new(),
            positions: Vec::new(),
            velocities: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.bodies.clear();
        self.contacts.clear();
        self.joints.clear();
        self.positions.clear();
        self.velocities.clear();
    }

    /// Add a body; records its island index in the body.
    pub(crate) fn add_body(&mut self, handle: BodyHandle, body: &mut Body) {
        body.island_index = self.bodies.len();
        self.bodies.push(handle);
    }

    pub(crate) fn add_contact(&mut self, handle: ContactHandle) {
        self.contacts.push(handle);
    }

    pub(crate) fn add_joint(&mut self, handle: JointHandle) {
        self.joints.push(handle);
    }

    /// Full solve for one regular step.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn solve(
        &mut self,
        step: &SolverStep,
        gravity: Vec2,
        bodies: &mut [Option<Body>],
        fixtures: &[Option<Fixture>],
        contact_manager: &mut ContactManager,
        joints: &mut [Option<Joint>],
        listener: &mut dyn ContactListener,
        allow_sleep: bool,
    ) {
        let h = step.dt;

        // Integrate forces and stage solver state
        self.positions.clear();
        self.velocities.clear();
        for &handle in &self.bodies {
            let body = bodies[handle.0 as usize].as_mut().expect("island body");

            let c = body.sweep.c;
            let a = body.sweep.a;
            let mut v = body.linear_velocity;
            let mut w = body.angular_velocity;

            // Store the swept state for TOI
            body.sweep.c0 = c;
            body.sweep.a0 = a;

            if body.body_type == BodyType::Dynamic {
                v += (gravity * body.gravity_scale + body.force * body.inv_mass) * h;
                w += h * body.inv_inertia * body.torque;

                // Implicit damping: v2 = v1 / (1 + h * d)
                v *= 1.0 / (1.0 + h * body.linear_damping);
                w *= 1.0 / (1.0 + h * body.angular_damping);
            }

            self.positions.push(Position { c, a });
            self.velocities.push(Velocity { v, w });
        }

        // Contact constraint sources
        let sources = self.collect_contact_sources(bodies, fixtures, contact_manager);
        let warm_scale = if step.warm_starting { step.dt_ratio } else { 0.0 };
        let mut contact_solver =
            ContactSolver::new(&sources, &self.positions, &self.velocities, warm_scale);
        if step.warm_starting {
            contact_solver.warm_start(&mut self.velocities);
        }

        // Joint setup + warm start
        for &jh in &self.joints {
            let joint = joints[jh.0 as usize].as_mut().expect("island joint");
            joint.prepare(&|handle| joint_body_data(bodies, handle));
            let mut data = SolverData {
                step: *step,
                positions: &mut self.positions,
                velocities: &mut self.velocities,
            };
            joint.init_velocity_constraints(&mut data);
        }

        // Velocity iterations
        for _ in 0..step.velocity_iterations {
            for &jh in &self.joints {
                let joint = joints[jh.0 as usize].as_mut().expect("island joint");
                let mut data = SolverData {
                    step: *step,
                    positions: &mut self.positions,
                    velocities: &mut self.velocities,
                };
                joint.solve_velocity_constraints(&mut data);
            }
            contact_solver.solve_velocity_constraints(&mut self.velocities);
        }

        // Persist impulses for next step's warm start
        let impulses = contact_solver.impulses();
        for s in &impulses {
            let handle = self.contacts[s.contact_index];
            if let Some(contact) = contact_manager.contact_mut(handle) {
                for j in 0..s.count {
                    contact.manifold.points[j].normal_impulse = s.normal[j];
                    contact.manifold.points[j].tangent_impulse = s.tangent[j];
                }
            }
        }

        // Integrate positions, clamping runaway motion
        for i in 0..self.positions.len() {
            let mut c = self.positions[i].c;
            let mut a = self.positions[i].a;
            let mut v = self.velocities[i].v;
            let mut w = self.velocities[i].w;

            let translation = v * h;
            if translation.length_squared() > MAX_TRANSLATION_SQUARED {
                v *= MAX_TRANSLATION / translation.length();
            }
            let rotation = h * w;
            if rotation * rotation > MAX_ROTATION_SQUARED {
                w *= MAX_ROTATION / rotation.abs();
            }

            c += v * h;
            a += h * w;

            self.positions[i] = Position { c, a };
            self.velocities[i] = Velocity { v, w };
        }

        // Position iterations
        let mut position_solved = false;
        for _ in 0..step.position_iterations {
            let contacts_okay = contact_solver.solve_position_constraints(&mut self.positions);
            let mut joints_okay = true;
            for &jh in &self.joints {
                let joint = joints[jh.0 as usize].as_mut().expect("island joint");
                let mut data = SolverData {
                    step: *step,
                    positions: &mut self.positions,
                    velocities: &mut self.velocities,
                };
                let ok = joint.solve_position_constraints(&mut data);
                joints_okay = joints_okay && ok;
            }
            if contacts_okay && joints_okay {
                position_solved = true;
                break;
            }
        }

        // Write back
        for (i, &handle) in self.bodies.iter().enumerate() {
            let body = bodies[handle.0 as usize].as_mut().expect("island body");
            body.sweep.c = self.positions[i].c;
            body.sweep.a = self.positions[i].a;
            body.linear_velocity = self.velocities[i].v;
            body.angular_velocity = self.velocities[i].w;
            body.synchronize_transform();
        }

        // Post-solve report
        for s in &impulses {
            let handle = self.contacts[s.contact_index];
            if let Some(contact) = contact_manager.contact(handle) {
                let info = contact_info(handle, contact, fixtures);
                let impulse = ContactImpulse {
                    normal_impulses: s.normal,
                    tangent_impulses: s.tangent,
                    count: s.count,
                };
                listener.post_solve(&info, &impulse);
            }
        }

        // Sleep: the whole island sleeps together or not at all
        if allow_sleep {
            let mut min_sleep_time = f32::MAX;
            let lin_tol_sqr = LINEAR_SLEEP_TOLERANCE * LINEAR_SLEEP_TOLERANCE;
            let ang_tol_sqr = ANGULAR_SLEEP_TOLERANCE * ANGULAR_SLEEP_TOLERANCE;

            for &handle in &self.bodies {
                let body = bodies[handle.0 as usize].as_mut().expect("island body");
                if body.body_type == BodyType::Static {
                    continue;
                }
                let idle = body.angular_velocity * body.angular_velocity <= ang_tol_sqr
                    && body.linear_velocity.length_squared() <= lin_tol_sqr;
                let t = body.update_sleep_time(h, idle);
                min_sleep_time = min_sleep_time.min(if body.is_sleep_allowed() {
                    t
                } else {
                    0.0
                });
            }

            if min_sleep_time >= TIME_TO_SLEEP && position_solved {
                for &handle in &self.bodies {
                    let body = bodies[handle.0 as usize].as_mut().expect("island body");
                    body.set_awake(false);
                }
            }
        }
    }

    /// Mini-island solve for one TOI sub-step. The first two island
    /// bodies are the advancing pair; everything else is frozen for the
    /// position pass.
    pub(crate) fn solve_toi(
        &mut self,
        step: &SolverStep,
        bodies: &mut [Option<Body>],
        fixtures: &[Option<Fixture>],
        contact_manager: &mut ContactManager,
        toi_index_a: usize,
        toi_index_b: usize,
    ) {
        debug_assert!(toi_index_a < self.bodies.len());
        debug_assert!(toi_index_b < self.bodies.len());

        self.positions.clear();
        self.velocities.clear();
        for &handle in &self.bodies {
            let body = bodies[handle.0 as usize].as_ref().expect("island body");
            self.positions.push(Position {
                c: body.sweep.c,
                a: body.sweep.a,
            });
            self.velocities.push(Velocity {
                v: body.linear_velocity,
                w: body.angular_velocity,
            });
        }

        let sources = self.collect_contact_sources(bodies, fixtures, contact_manager);
        // No warm starting in the sub-step: impulses belong to the full step
        let mut contact_solver =
            ContactSolver::new(&sources, &self.positions, &self.velocities, 0.0);

        // Resolve penetration at the TOI before integrating velocities
        for _ in 0..step.position_iterations {
            if contact_solver.solve_toi_position_constraints(
                &mut self.positions,
                toi_index_a,
                toi_index_b,
            ) {
                break;
            }
        }

        // The advancing pair's sweep origin becomes the resolved position
        let ha = self.bodies[toi_index_a];
        let hb = self.bodies[toi_index_b];
        if let Some(body) = bodies[ha.0 as usize].as_mut() {
            body.sweep.c0 = self.positions[toi_index_a].c;
            body.sweep.a0 = self.positions[toi_index_a].a;
        }
        if let Some(body) = bodies[hb.0 as usize].as_mut() {
            body.sweep.c0 = self.positions[toi_index_b].c;
            body.sweep.a0 = self.positions[toi_index_b].a;
        }

        for _ in 0..step.velocity_iterations {
            contact_solver.solve_velocity_constraints(&mut self.velocities);
        }

        // Integrate the remainder of the step
        let h = step.dt;
        for i in 0..self.positions.len() {
            let mut c = self.positions[i].c;
            let mut a = self.positions[i].a;
            let mut v = self.velocities[i].v;
            let mut w = self.velocities[i].w;

            let translation = v * h;
            if translation.length_squared() > MAX_TRANSLATION_SQUARED {
                v *= MAX_TRANSLATION / translation.length();
            }
            let rotation = h * w;
            if rotation * rotation > MAX_ROTATION_SQUARED {
                w *= MAX_ROTATION / rotation.abs();
            }

            c += v * h;
            a += h * w;

            self.positions[i] = Position { c, a };
            self.velocities[i] = Velocity { v, w };

            let body = bodies[self.bodies[i].0 as usize]
                .as_mut()
                .expect("island body");
            body.sweep.c = c;
            body.sweep.a = a;
            body.linear_velocity = v;
            body.angular_velocity = w;
            body.synchronize_transform();
        }
    }

    fn collect_contact_sources(
        &self,
        bodies: &[Option<Body>],
        fixtures: &[Option<Fixture>],
        contact_manager: &ContactManager,
    ) -> Vec<ContactConstraintSource> {
        let mut sources = Vec::with_capacity(self.contacts.len());
        for (ci, &handle) in self.contacts.iter().enumerate() {
            let Some(contact) = contact_manager.contact(handle) else {
                continue;
            };
            let Some(fixture_a) = fixtures[contact.fixture_a.0 as usize].as_ref() else {
                continue;
            };
            let Some(fixture_b) = fixtures[contact.fixture_b.0 as usize].as_ref() else {
                continue;
            };
            let body_a = bodies[fixture_a.body.0 as usize].as_ref().expect("body a");
            let body_b = bodies[fixture_b.body.0 as usize].as_ref().expect("body b");

            let radius_a = fixture_a.shape().radius();
            let radius_b = fixture_b.shape().radius();

            sources.push(ContactConstraintSource {
                manifold: contact.manifold,
                index_a: body_a.island_index,
                index_b: body_b.island_index,
                inv_mass_a: body_a.inv_mass,
                inv_mass_b: body_b.inv_mass,
                inv_i_a: body_a.inv_inertia,
                inv_i_b: body_b.inv_inertia,
                local_center_a: body_a.sweep.local_center,
                local_center_b: body_b.sweep.local_center,
                radius_a,
                radius_b,
                friction: contact.friction,
                restitution: contact.restitution,
                tangent_speed: contact.tangent_speed,
                contact_index: ci,
            });
        }
        sources
    }
}

fn joint_body_data(bodies: &[Option<Body>], handle: BodyHandle) -> JointBodyData {
    let body = bodies[handle.0 as usize].as_ref().expect("joint body");
    JointBodyData {
        index: body.island_index,
        local_center: body.sweep.local_center,
        inv_mass: body.inv_mass,
        inv_i: body.inv_inertia,
    }
}

pub(crate) fn contact_info(
    handle: ContactHandle,
    contact: &crate::contact::Contact,
    fixtures: &[Option<Fixture>],
) -> ContactInfo {
    let body_a = fixtures[contact.fixture_a.0 as usize]
        .as_ref()
        .map(|f| f.body)
        .unwrap_or(BodyHandle(u32::MAX));
    let body_b = fixtures[contact.fixture_b.0 as usize]
        .as_ref()
        .map(|f| f.body)
        .unwrap_or(BodyHandle(u32::MAX));
    ContactInfo {
        contact: handle,
        fixture_a: contact.fixture_a,
        fixture_b: contact.fixture_b,
        body_a,
        body_b,
    }
}
