//! Joints: Extended Types
//!
//! The remaining joint family: pulley (two-rope block and tackle), gear
//! (couples two revolute/prismatic joints), weld (rigid or soft glue),
//! rope (upper distance bound), wheel (suspension: point-to-line with a
//! spring and motor), and motor (drives a relative pose directly).
//!
//! All follow the same three-phase protocol as the core joints in
//! `joint.rs`: cache effective masses, warm start, iterate.
//!
//! Author: Moroya Sakamoto

use crate::body::BodyHandle;
use crate::contact_solver::{Position, Velocity};
use crate::joint::{JointBodyData, JointHandle, LimitState, SolverData};
use crate::math::{Mat22, Mat33, Rot, Vec2, Vec3};
use crate::settings::{ANGULAR_SLOP, LINEAR_SLOP, MAX_LINEAR_CORRECTION};

// ============================================================================
// Pulley joint
// ============================================================================

/// Two bodies hang from ground anchors over an idealized pulley:
/// `length_a + ratio * length_b` is held constant.
#[derive(Clone, Debug)]
pub struct PulleyJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// First rope's fixed end, in world coordinates
    pub ground_anchor_a: Vec2,
    /// Second rope's fixed end, in world coordinates
    pub ground_anchor_b: Vec2,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Rest length of the first rope
    pub length_a: f32,
    /// Rest length of the second rope
    pub length_b: f32,
    /// Block-and-tackle ratio; must be positive
    pub ratio: f32,
    pub collide_connected: bool,
}

impl PulleyJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            ground_anchor_a: Vec2::new(-1.0, 1.0),
            ground_anchor_b: Vec2::new(1.0, 1.0),
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            length_a: 0.0,
            length_b: 0.0,
            ratio: 1.0,
            collide_connected: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PulleyJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    ground_anchor_a: Vec2,
    ground_anchor_b: Vec2,
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    ratio: f32,
    constant: f32,

    impulse: f32,

    // Solver cache
    u_a: Vec2,
    u_b: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    mass: f32,
}

impl PulleyJoint {
    #[must_use]
    pub fn new(def: &PulleyJointDef) -> Self {
        debug_assert!(def.ratio > f32::EPSILON);
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            ground_anchor_a: def.ground_anchor_a,
            ground_anchor_b: def.ground_anchor_b,
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            ratio: def.ratio,
            constant: def.length_a + def.ratio * def.length_b,
            impulse: 0.0,
            u_a: Vec2::ZERO,
            u_b: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: 0.0,
        }
    }

    #[must_use]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let c_a = data.positions[ia].c;
        let q_a = Rot::from_angle(data.positions[ia].a);
        let c_b = data.positions[ib].c;
        let q_b = Rot::from_angle(data.positions[ib].a);

        self.r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        self.r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        self.u_a = c_a + self.r_a - self.ground_anchor_a;
        self.u_b = c_b + self.r_b - self.ground_anchor_b;

        // Short rope segments give no usable direction
        if self.u_a.normalize_and_length() <= 10.0 * LINEAR_SLOP {
            self.u_a = Vec2::ZERO;
        }
        if self.u_b.normalize_and_length() <= 10.0 * LINEAR_SLOP {
            self.u_b = Vec2::ZERO;
        }

        let ru_a = self.r_a.cross(self.u_a);
        let ru_b = self.r_b.cross(self.u_b);
        let mass_a = m_a + i_a * ru_a * ru_a;
        let mass_b = m_b + i_b * ru_b * ru_b;
        let total = mass_a + self.ratio * self.ratio * mass_b;
        self.mass = if total > 0.0 { 1.0 / total } else { 0.0 };

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            let p_a = self.u_a * -self.impulse;
            let p_b = self.u_b * (-self.ratio * self.impulse);

            data.velocities[ia].v += p_a * m_a;
            data.velocities[ia].w += i_a * self.r_a.cross(p_a);
            data.velocities[ib].v += p_b * m_b;
            data.velocities[ib].w += i_b * self.r_b.cross(p_b);
        } else {
            self.impulse = 0.0;
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let vp_a = v_a + Vec2::cross_sv(w_a, self.r_a);
        let vp_b = v_b + Vec2::cross_sv(w_b, self.r_b);

        let cdot = -self.u_a.dot(vp_a) - self.ratio * self.u_b.dot(vp_b);
        let impulse = -self.mass * cdot;
        self.impulse += impulse;

        let p_a = self.u_a * -impulse;
        let p_b = self.u_b * (-self.ratio * impulse);
        v_a += p_a * m_a;
        w_a += i_a * self.r_a.cross(p_a);
        v_b += p_b * m_b;
        w_b += i_b * self.r_b.cross(p_b);

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut c_a = data.positions[ia].c;
        let mut a_a = data.positions[ia].a;
        let mut c_b = data.positions[ib].c;
        let mut a_b = data.positions[ib].a;

        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        let mut u_a = c_a + r_a - self.ground_anchor_a;
        let mut u_b = c_b + r_b - self.ground_anchor_b;

        let length_a = u_a.normalize_and_length();
        let length_b = u_b.normalize_and_length();
        if length_a <= 10.0 * LINEAR_SLOP {
            u_a = Vec2::ZERO;
        }
        if length_b <= 10.0 * LINEAR_SLOP {
            u_b = Vec2::ZERO;
        }

        let ru_a = r_a.cross(u_a);
        let ru_b = r_b.cross(u_b);
        let mass_a = m_a + i_a * ru_a * ru_a;
        let mass_b = m_b + i_b * ru_b * ru_b;
        let total = mass_a + self.ratio * self.ratio * mass_b;
        let mass = if total > 0.0 { 1.0 / total } else { 0.0 };

        let c = self.constant - length_a - self.ratio * length_b;
        let linear_error = c.abs();

        let impulse = -mass * c;
        let p_a = u_a * -impulse;
        let p_b = u_b * (-self.ratio * impulse);

        c_a += p_a * m_a;
        a_a += i_a * r_a.cross(p_a);
        c_b += p_b * m_b;
        a_b += i_b * r_b.cross(p_b);

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        linear_error < LINEAR_SLOP
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.u_b * (self.impulse * inv_dt)
    }

    pub(crate) fn reaction_torque(&self, _inv_dt: f32) -> f32 {
        0.0
    }
}

// ============================================================================
// Gear joint
// ============================================================================

/// How a gear endpoint attaches to its source joint's coordinate.
#[derive(Clone, Copy, Debug)]
pub(crate) enum GearAxis {
    /// Source is a revolute joint; the coordinate is the joint angle
    Revolute { reference_angle: f32 },
    /// Source is a prismatic joint; the coordinate is the translation
    /// along this axis (local to the first body of the source joint)
    Prismatic { local_axis: Vec2 },
}

/// Couples the coordinates of two revolute/prismatic joints:
/// `coordinate_a + ratio * coordinate_b == constant`.
#[derive(Clone, Debug)]
pub struct GearJointDef {
    /// First source joint; must be revolute or prismatic
    pub joint_a: JointHandle,
    /// Second source joint; must be revolute or prismatic
    pub joint_b: JointHandle,
    pub ratio: f32,
}

impl GearJointDef {
    #[must_use]
    pub fn new(joint_a: JointHandle, joint_b: JointHandle, ratio: f32) -> Self {
        Self {
            joint_a,
            joint_b,
            ratio,
        }
    }
}

/// Resolved source-joint data, filled in by the world at creation.
#[derive(Clone, Debug)]
pub(crate) struct GearResolution {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub body_c: BodyHandle,
    pub body_d: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub local_anchor_c: Vec2,
    pub local_anchor_d: Vec2,
    pub axis_a: GearAxis,
    pub axis_b: GearAxis,
    pub constant: f32,
}

#[derive(Clone, Debug)]
pub struct GearJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,
    pub(crate) prep_c: JointBodyData,
    pub(crate) prep_d: JointBodyData,

    joint_a: JointHandle,
    joint_b: JointHandle,
    // C is the first body of joint A's source; D of joint B's
    body_c: BodyHandle,
    body_d: BodyHandle,
    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    local_anchor_c: Vec2,
    local_anchor_d: Vec2,
    axis_a: GearAxis,
    axis_b: GearAxis,
    ratio: f32,
    constant: f32,

    impulse: f32,

    // Solver cache: Jacobian rows for the AC and BD pairs
    jv_ac: Vec2,
    jv_bd: Vec2,
    jw_a: f32,
    jw_b: f32,
    jw_c: f32,
    jw_d: f32,
    mass: f32,
}

impl GearJoint {
    #[must_use]
    pub fn new(def: &GearJointDef) -> Self {
        Self {
            body_a: BodyHandle(u32::MAX),
            body_b: BodyHandle(u32::MAX),
            collide_connected: false,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            prep_c: JointBodyData::default(),
            prep_d: JointBodyData::default(),
            joint_a: def.joint_a,
            joint_b: def.joint_b,
            body_c: BodyHandle(u32::MAX),
            body_d: BodyHandle(u32::MAX),
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_anchor_c: Vec2::ZERO,
            local_anchor_d: Vec2::ZERO,
            axis_a: GearAxis::Revolute {
                reference_angle: 0.0,
            },
            axis_b: GearAxis::Revolute {
                reference_angle: 0.0,
            },
            ratio: def.ratio,
            constant: 0.0,
            impulse: 0.0,
            jv_ac: Vec2::ZERO,
            jv_bd: Vec2::ZERO,
            jw_a: 0.0,
            jw_b: 0.0,
            jw_c: 0.0,
            jw_d: 0.0,
            mass: 0.0,
        }
    }

    /// Fill in the data extracted from the source joints.
    pub(crate) fn resolve(&mut self, r: GearResolution) {
        self.body_a = r.body_a;
        self.body_b = r.body_b;
        self.body_c = r.body_c;
        self.body_d = r.body_d;
        self.local_anchor_a = r.local_anchor_a;
        self.local_anchor_b = r.local_anchor_b;
        self.local_anchor_c = r.local_anchor_c;
        self.local_anchor_d = r.local_anchor_d;
        self.axis_a = r.axis_a;
        self.axis_b = r.axis_b;
        self.constant = r.constant;
    }

    #[must_use]
    pub fn joint_a(&self) -> JointHandle {
        self.joint_a
    }

    #[must_use]
    pub fn joint_b(&self) -> JointHandle {
        self.joint_b
    }

    #[must_use]
    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// All four bodies this constraint touches, AC pair then BD pair.
    #[must_use]
    pub fn bodies(&self) -> [BodyHandle; 4] {
        [self.body_a, self.body_b, self.body_c, self.body_d]
    }

    pub(crate) fn prepare(&mut self, lookup: &dyn Fn(BodyHandle) -> JointBodyData) {
        self.prep_a = lookup(self.body_a);
        self.prep_b = lookup(self.body_b);
        self.prep_c = lookup(self.body_c);
        self.prep_d = lookup(self.body_d);
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib, ic, id) = (
            self.prep_a.index,
            self.prep_b.index,
            self.prep_c.index,
            self.prep_d.index,
        );

        let q_a = Rot::from_angle(data.positions[ia].a);
        let q_b = Rot::from_angle(data.positions[ib].a);
        let q_c = Rot::from_angle(data.positions[ic].a);
        let q_d = Rot::from_angle(data.positions[id].a);

        let mut mass = 0.0f32;

        match self.axis_a {
            GearAxis::Revolute { .. } => {
                self.jv_ac = Vec2::ZERO;
                self.jw_a = 1.0;
                self.jw_c = 1.0;
                mass += self.prep_a.inv_i + self.prep_c.inv_i;
            }
            GearAxis::Prismatic { local_axis } => {
                let u = q_c.apply(local_axis);
                let r_c = q_c.apply(self.local_anchor_c - self.prep_c.local_center);
                let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
                self.jv_ac = u;
                self.jw_c = r_c.cross(u);
                self.jw_a = r_a.cross(u);
                mass += self.prep_c.inv_mass
                    + self.prep_a.inv_mass
                    + self.prep_c.inv_i * self.jw_c * self.jw_c
                    + self.prep_a.inv_i * self.jw_a * self.jw_a;
            }
        }

        match self.axis_b {
            GearAxis::Revolute { .. } => {
                self.jv_bd = Vec2::ZERO;
                self.jw_b = self.ratio;
                self.jw_d = self.ratio;
                mass += self.ratio * self.ratio * (self.prep_b.inv_i + self.prep_d.inv_i);
            }
            GearAxis::Prismatic { local_axis } => {
                let u = q_d.apply(local_axis);
                let r_d = q_d.apply(self.local_anchor_d - self.prep_d.local_center);
                let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
                self.jv_bd = u * self.ratio;
                self.jw_d = self.ratio * r_d.cross(u);
                self.jw_b = self.ratio * r_b.cross(u);
                mass += self.ratio * self.ratio * (self.prep_d.inv_mass + self.prep_b.inv_mass)
                    + self.prep_d.inv_i * self.jw_d * self.jw_d
                    + self.prep_b.inv_i * self.jw_b * self.jw_b;
            }
        }

        self.mass = if mass > 0.0 { 1.0 / mass } else { 0.0 };

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            self.apply_impulse(data, self.impulse);
        } else {
            self.impulse = 0.0;
        }
    }

    fn apply_impulse(&self, data: &mut SolverData<'_>, impulse: f32) {
        let (ia, ib, ic, id) = (
            self.prep_a.index,
            self.prep_b.index,
            self.prep_c.index,
            self.prep_d.index,
        );
        data.velocities[ia].v += self.jv_ac * (self.prep_a.inv_mass * impulse);
        data.velocities[ia].w += self.prep_a.inv_i * impulse * self.jw_a;
        data.velocities[ib].v += self.jv_bd * (self.prep_b.inv_mass * impulse);
        data.velocities[ib].w += self.prep_b.inv_i * impulse * self.jw_b;
        data.velocities[ic].v -= self.jv_ac * (self.prep_c.inv_mass * impulse);
        data.velocities[ic].w -= self.prep_c.inv_i * impulse * self.jw_c;
        data.velocities[id].v -= self.jv_bd * (self.prep_d.inv_mass * impulse);
        data.velocities[id].w -= self.prep_d.inv_i * impulse * self.jw_d;
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib, ic, id) = (
            self.prep_a.index,
            self.prep_b.index,
            self.prep_c.index,
            self.prep_d.index,
        );

        let va = data.velocities[ia];
        let vb = data.velocities[ib];
        let vc = data.velocities[ic];
        let vd = data.velocities[id];

        let cdot = self.jv_ac.dot(va.v - vc.v)
            + self.jv_bd.dot(vb.v - vd.v)
            + self.jw_a * va.w
            - self.jw_c * vc.w
            + self.jw_b * vb.w
            - self.jw_d * vd.w;

        let impulse = -self.mass * cdot;
        self.impulse += impulse;
        self.apply_impulse(data, impulse);
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib, ic, id) = (
            self.prep_a.index,
            self.prep_b.index,
            self.prep_c.index,
            self.prep_d.index,
        );

        let mut pa = data.positions[ia];
        let mut pb = data.positions[ib];
        let mut pc = data.positions[ic];
        let mut pd = data.positions[id];

        let q_a = Rot::from_angle(pa.a);
        let q_b = Rot::from_angle(pb.a);
        let q_c = Rot::from_angle(pc.a);
        let q_d = Rot::from_angle(pd.a);

        let mut mass = 0.0f32;

        let (jv_ac, jw_a, jw_c, coordinate_a) = match self.axis_a {
            GearAxis::Revolute { reference_angle } => {
                mass += self.prep_a.inv_i + self.prep_c.inv_i;
                (Vec2::ZERO, 1.0, 1.0, pa.a - pc.a - reference_angle)
            }
            GearAxis::Prismatic { local_axis } => {
                let u = q_c.apply(local_axis);
                let r_c = q_c.apply(self.local_anchor_c - self.prep_c.local_center);
                let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
                let jw_c = r_c.cross(u);
                let jw_a = r_a.cross(u);
                mass += self.prep_c.inv_mass
                    + self.prep_a.inv_mass
                    + self.prep_c.inv_i * jw_c * jw_c
                    + self.prep_a.inv_i * jw_a * jw_a;
                let p_c = self.local_anchor_c - self.prep_c.local_center;
                let p_a = q_c.apply_t(r_a + (pa.c - pc.c));
                (u, jw_a, jw_c, (p_a - p_c).dot(local_axis))
            }
        };

        let (jv_bd, jw_b, jw_d, coordinate_b) = match self.axis_b {
            GearAxis::Revolute { reference_angle } => {
                mass += self.ratio * self.ratio * (self.prep_b.inv_i + self.prep_d.inv_i);
                (
                    Vec2::ZERO,
                    self.ratio,
                    self.ratio,
                    pb.a - pd.a - reference_angle,
                )
            }
            GearAxis::Prismatic { local_axis } => {
                let u = q_d.apply(local_axis);
                let r_d = q_d.apply(self.local_anchor_d - self.prep_d.local_center);
                let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
                let jw_d = self.ratio * r_d.cross(u);
                let jw_b = self.ratio * r_b.cross(u);
                mass += self.ratio * self.ratio * (self.prep_d.inv_mass + self.prep_b.inv_mass)
                    + self.prep_d.inv_i * jw_d * jw_d
                    + self.prep_b.inv_i * jw_b * jw_b;
                let p_d = self.local_anchor_d - self.prep_d.local_center;
                let p_b = q_d.apply_t(r_b + (pb.c - pd.c));
                (u * self.ratio, jw_b, jw_d, (p_b - p_d).dot(local_axis))
            }
        };

        let c = (coordinate_a + self.ratio * coordinate_b) - self.constant;
        let impulse = if mass > 0.0 { -c / mass } else { 0.0 };

        pa.c += jv_ac * (self.prep_a.inv_mass * impulse);
        pa.a += self.prep_a.inv_i * impulse * jw_a;
        pb.c += jv_bd * (self.prep_b.inv_mass * impulse);
        pb.a += self.prep_b.inv_i * impulse * jw_b;
        pc.c -= jv_ac * (self.prep_c.inv_mass * impulse);
        pc.a -= self.prep_c.inv_i * impulse * jw_c;
        pd.c -= jv_bd * (self.prep_d.inv_mass * impulse);
        pd.a -= self.prep_d.inv_i * impulse * jw_d;

        data.positions[ia] = pa;
        data.positions[ib] = pb;
        data.positions[ic] = pc;
        data.positions[id] = pd;

        // The gear constraint has no position tolerance of its own
        true
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.jv_ac * (self.impulse * inv_dt)
    }

    pub(crate) fn reaction_torque(&self, inv_dt: f32) -> f32 {
        self.impulse * self.jw_a * inv_dt
    }
}

// ============================================================================
// Weld joint
// ============================================================================

/// Glue two bodies together. With `frequency_hz > 0` the angular part
/// becomes a damped spring, giving a slightly flexible weld.
#[derive(Clone, Debug)]
pub struct WeldJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub reference_angle: f32,
    pub frequency_hz: f32,
    pub damping_ratio: f32,
    pub collide_connected: bool,
}

impl WeldJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            reference_angle: 0.0,
            frequency_hz: 0.0,
            damping_ratio: 0.0,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WeldJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    reference_angle: f32,
    frequency_hz: f32,
    damping_ratio: f32,

    /// (point x, point y, angular) impulses
    impulse: Vec3,
    gamma: f32,
    bias: f32,

    // Solver cache
    r_a: Vec2,
    r_b: Vec2,
    k: Mat33,
    axial_mass: f32,
}

impl WeldJoint {
    #[must_use]
    pub fn new(def: &WeldJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            reference_angle: def.reference_angle,
            frequency_hz: def.frequency_hz,
            damping_ratio: def.damping_ratio,
            impulse: Vec3::ZERO,
            gamma: 0.0,
            bias: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            k: Mat33::default(),
            axial_mass: 0.0,
        }
    }

    fn stiffness_matrix(
        r_a: Vec2,
        r_b: Vec2,
        m_a: f32,
        m_b: f32,
        i_a: f32,
        i_b: f32,
    ) -> Mat33 {
        let k11 = m_a + m_b + r_a.y * r_a.y * i_a + r_b.y * r_b.y * i_b;
        let k12 = -r_a.y * r_a.x * i_a - r_b.y * r_b.x * i_b;
        let k13 = -r_a.y * i_a - r_b.y * i_b;
        let k22 = m_a + m_b + r_a.x * r_a.x * i_a + r_b.x * r_b.x * i_b;
        let k23 = r_a.x * i_a + r_b.x * i_b;
        let k33 = i_a + i_b;
        Mat33 {
            ex: Vec3::new(k11, k12, k13),
            ey: Vec3::new(k12, k22, k23),
            ez: Vec3::new(k13, k23, k33),
        }
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let q_a = Rot::from_angle(data.positions[ia].a);
        let q_b = Rot::from_angle(data.positions[ib].a);

        self.r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        self.r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        self.k = Self::stiffness_matrix(self.r_a, self.r_b, m_a, m_b, i_a, i_b);

        if self.frequency_hz > 0.0 {
            let inv_i = i_a + i_b;
            let m = if inv_i > 0.0 { 1.0 / inv_i } else { 0.0 };

            let c = data.positions[ib].a - data.positions[ia].a - self.reference_angle;
            let omega = 2.0 * core::f32::consts::PI * self.frequency_hz;
            let d = 2.0 * m * self.damping_ratio * omega;
            let k = m * omega * omega;

            let h = data.step.dt;
            self.gamma = h * (d + h * k);
            self.gamma = if self.gamma != 0.0 { 1.0 / self.gamma } else { 0.0 };
            self.bias = c * h * k * self.gamma;

            let soft = inv_i + self.gamma;
            self.axial_mass = if soft != 0.0 { 1.0 / soft } else { 0.0 };
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
            self.axial_mass = 0.0;
        }

        if data.step.warm_starting {
            self.impulse = self.impulse * data.step.dt_ratio;
            let p = Vec2::new(self.impulse.x, self.impulse.y);

            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * (self.r_a.cross(p) + self.impulse.z);
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * (self.r_b.cross(p) + self.impulse.z);
        } else {
            self.impulse = Vec3::ZERO;
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        if self.frequency_hz > 0.0 {
            // Soft angular row first
            let cdot2 = w_b - w_a;
            let impulse2 =
                -self.axial_mass * (cdot2 + self.bias + self.gamma * self.impulse.z);
            self.impulse.z += impulse2;
            w_a -= i_a * impulse2;
            w_b += i_b * impulse2;

            // Rigid point row
            let cdot1 =
                v_b + Vec2::cross_sv(w_b, self.r_b) - v_a - Vec2::cross_sv(w_a, self.r_a);
            let impulse1 = -self.k.solve22(cdot1);
            self.impulse.x += impulse1.x;
            self.impulse.y += impulse1.y;

            v_a -= impulse1 * m_a;
            w_a -= i_a * self.r_a.cross(impulse1);
            v_b += impulse1 * m_b;
            w_b += i_b * self.r_b.cross(impulse1);
        } else {
            let cdot1 =
                v_b + Vec2::cross_sv(w_b, self.r_b) - v_a - Vec2::cross_sv(w_a, self.r_a);
            let cdot = Vec3::new(cdot1.x, cdot1.y, w_b - w_a);
            let impulse = -self.k.solve33(cdot);
            self.impulse = self.impulse + impulse;

            let p = Vec2::new(impulse.x, impulse.y);
            v_a -= p * m_a;
            w_a -= i_a * (self.r_a.cross(p) + impulse.z);
            v_b += p * m_b;
            w_b += i_b * (self.r_b.cross(p) + impulse.z);
        }

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut c_a = data.positions[ia].c;
        let mut a_a = data.positions[ia].a;
        let mut c_b = data.positions[ib].c;
        let mut a_b = data.positions[ib].a;

        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        let k = Self::stiffness_matrix(r_a, r_b, m_a, m_b, i_a, i_b);

        let (position_error, angular_error);

        if self.frequency_hz > 0.0 {
            let c1 = c_b + r_b - c_a - r_a;
            position_error = c1.length();
            angular_error = 0.0;

            let p = -k.solve22(c1);
            c_a -= p * m_a;
            a_a -= i_a * r_a.cross(p);
            c_b += p * m_b;
            a_b += i_b * r_b.cross(p);
        } else {
            let c1 = c_b + r_b - c_a - r_a;
            let c2 = a_b - a_a - self.reference_angle;
            position_error = c1.length();
            angular_error = c2.abs();

            let c = Vec3::new(c1.x, c1.y, c2);
            let impulse = if k.ez.z > 0.0 {
                -k.solve33(c)
            } else {
                let p = -k.solve22(c1);
                Vec3::new(p.x, p.y, 0.0)
            };

            let p = Vec2::new(impulse.x, impulse.y);
            c_a -= p * m_a;
            a_a -= i_a * (r_a.cross(p) + impulse.z);
            c_b += p * m_b;
            a_b += i_b * (r_b.cross(p) + impulse.z);
        }

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        position_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        Vec2::new(self.impulse.x, self.impulse.y) * inv_dt
    }

    pub(crate) fn reaction_torque(&self, inv_dt: f32) -> f32 {
        self.impulse.z * inv_dt
    }
}

// ============================================================================
// Rope joint
// ============================================================================

/// Upper bound on the distance between two anchors. Slack inside the
/// bound, rigid at it. Useful to keep chains of other joints from
/// stretching under load.
#[derive(Clone, Debug)]
pub struct RopeJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    pub max_length: f32,
    pub collide_connected: bool,
}

impl RopeJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, max_length: f32) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            max_length,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RopeJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    max_length: f32,

    impulse: f32,
    state: LimitState,

    // Solver cache
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    length: f32,
    mass: f32,
}

impl RopeJoint {
    #[must_use]
    pub fn new(def: &RopeJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            max_length: def.max_length,
            impulse: 0.0,
            state: LimitState::Inactive,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            length: 0.0,
            mass: 0.0,
        }
    }

    #[must_use]
    pub fn max_length(&self) -> f32 {
        self.max_length
    }

    /// Whether the rope is currently taut.
    #[must_use]
    pub fn limit_state(&self) -> LimitState {
        self.state
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let c_a = data.positions[ia].c;
        let q_a = Rot::from_angle(data.positions[ia].a);
        let c_b = data.positions[ib].c;
        let q_b = Rot::from_angle(data.positions[ib].a);

        self.r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        self.r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
        self.u = c_b + self.r_b - c_a - self.r_a;

        self.length = self.u.normalize_and_length();
        self.state = if self.length - self.max_length > 0.0 {
            LimitState::AtUpper
        } else {
            LimitState::Inactive
        };

        if self.length <= LINEAR_SLOP {
            self.u = Vec2::ZERO;
            self.mass = 0.0;
            self.impulse = 0.0;
            return;
        }

        let cr_a = self.r_a.cross(self.u);
        let cr_b = self.r_b.cross(self.u);
        let inv_mass = m_a + m_b + i_a * cr_a * cr_a + i_b * cr_b * cr_b;
        self.mass = if inv_mass != 0.0 { 1.0 / inv_mass } else { 0.0 };

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            let p = self.u * self.impulse;
            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * self.r_a.cross(p);
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * self.r_b.cross(p);
        } else {
            self.impulse = 0.0;
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let vp_a = v_a + Vec2::cross_sv(w_a, self.r_a);
        let vp_b = v_b + Vec2::cross_sv(w_b, self.r_b);
        let c = self.length - self.max_length;
        let mut cdot = self.u.dot(vp_b - vp_a);

        // Predictive: slow down before the rope goes taut
        if c < 0.0 {
            cdot += data.step.inv_dt * c;
        }

        let mut impulse = -self.mass * cdot;
        let old = self.impulse;
        self.impulse = (old + impulse).min(0.0);
        impulse = self.impulse - old;

        let p = self.u * impulse;
        v_a -= p * m_a;
        w_a -= i_a * self.r_a.cross(p);
        v_b += p * m_b;
        w_b += i_b * self.r_b.cross(p);

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut c_a = data.positions[ia].c;
        let mut a_a = data.positions[ia].a;
        let mut c_b = data.positions[ib].c;
        let mut a_b = data.positions[ib].a;

        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
        let mut u = c_b + r_b - c_a - r_a;

        let length = u.normalize_and_length();
        let c = (length - self.max_length).clamp(0.0, MAX_LINEAR_CORRECTION);

        let impulse = -self.mass * c;
        let p = u * impulse;

        c_a -= p * m_a;
        a_a -= i_a * r_a.cross(p);
        c_b += p * m_b;
        a_b += i_b * r_b.cross(p);

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        length - self.max_length < LINEAR_SLOP
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.u * (self.impulse * inv_dt)
    }

    pub(crate) fn reaction_torque(&self, _inv_dt: f32) -> f32 {
        0.0
    }
}

// ============================================================================
// Wheel joint
// ============================================================================

/// Vehicle suspension: body B slides along an axis fixed in body A,
/// with a damped spring along the axis and an optional drive motor on
/// the wheel's rotation.
#[derive(Clone, Debug)]
pub struct WheelJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Suspension axis in body A's local frame
    pub local_axis_a: Vec2,
    pub enable_motor: bool,
    pub max_motor_torque: f32,
    pub motor_speed: f32,
    /// Suspension frequency; 0 locks the axis rigid
    pub frequency_hz: f32,
    pub damping_ratio: f32,
    pub collide_connected: bool,
}

impl WheelJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, axis: Vec2) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_axis_a: axis.normalize(),
            enable_motor: false,
            max_motor_torque: 0.0,
            motor_speed: 0.0,
            frequency_hz: 2.0,
            damping_ratio: 0.7,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WheelJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    local_x_axis_a: Vec2,
    local_y_axis_a: Vec2,

    impulse: f32,
    motor_impulse: f32,
    spring_impulse: f32,

    enable_motor: bool,
    max_motor_torque: f32,
    motor_speed: f32,
    frequency_hz: f32,
    damping_ratio: f32,

    // Solver cache
    ax: Vec2,
    ay: Vec2,
    s_ax: f32,
    s_bx: f32,
    s_ay: f32,
    s_by: f32,
    mass: f32,
    motor_mass: f32,
    spring_mass: f32,
    bias: f32,
    gamma: f32,
}

impl WheelJoint {
    #[must_use]
    pub fn new(def: &WheelJointDef) -> Self {
        let axis = def.local_axis_a.normalize();
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            local_x_axis_a: axis,
            local_y_axis_a: axis.skew(),
            impulse: 0.0,
            motor_impulse: 0.0,
            spring_impulse: 0.0,
            enable_motor: def.enable_motor,
            max_motor_torque: def.max_motor_torque,
            motor_speed: def.motor_speed,
            frequency_hz: def.frequency_hz,
            damping_ratio: def.damping_ratio,
            ax: Vec2::ZERO,
            ay: Vec2::ZERO,
            s_ax: 0.0,
            s_bx: 0.0,
            s_ay: 0.0,
            s_by: 0.0,
            mass: 0.0,
            motor_mass: 0.0,
            spring_mass: 0.0,
            bias: 0.0,
            gamma: 0.0,
        }
    }

    pub fn set_motor_speed(&mut self, speed: f32) {
        self.motor_speed = speed;
    }

    pub fn enable_motor(&mut self, enable: bool) {
        self.enable_motor = enable;
    }

    #[must_use]
    pub fn motor_speed(&self) -> f32 {
        self.motor_speed
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let c_a = data.positions[ia].c;
        let q_a = Rot::from_angle(data.positions[ia].a);
        let c_b = data.positions[ib].c;
        let q_b = Rot::from_angle(data.positions[ib].a);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
        let d = c_b + r_b - c_a - r_a;

        // Point-to-line constraint perpendicular to the axis
        self.ay = q_a.apply(self.local_y_axis_a);
        self.s_ay = (d + r_a).cross(self.ay);
        self.s_by = r_b.cross(self.ay);
        let inv_mass = m_a + m_b + i_a * self.s_ay * self.s_ay + i_b * self.s_by * self.s_by;
        self.mass = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };

        // Suspension spring along the axis
        self.spring_mass = 0.0;
        self.bias = 0.0;
        self.gamma = 0.0;
        if self.frequency_hz > 0.0 {
            self.ax = q_a.apply(self.local_x_axis_a);
            self.s_ax = (d + r_a).cross(self.ax);
            self.s_bx = r_b.cross(self.ax);

            let inv_mass =
                m_a + m_b + i_a * self.s_ax * self.s_ax + i_b * self.s_bx * self.s_bx;
            if inv_mass > 0.0 {
                self.spring_mass = 1.0 / inv_mass;

                let c = d.dot(self.ax);
                let omega = 2.0 * core::f32::consts::PI * self.frequency_hz;
                let damp = 2.0 * self.spring_mass * self.damping_ratio * omega;
                let k = self.spring_mass * omega * omega;

                let h = data.step.dt;
                self.gamma = h * (damp + h * k);
                if self.gamma > 0.0 {
                    self.gamma = 1.0 / self.gamma;
                }
                self.bias = c * h * k * self.gamma;

                let soft = inv_mass + self.gamma;
                self.spring_mass = if soft > 0.0 { 1.0 / soft } else { 0.0 };
            }
        } else {
            self.spring_impulse = 0.0;
        }

        // Rotational motor
        if self.enable_motor {
            let inv_i = i_a + i_b;
            self.motor_mass = if inv_i > 0.0 { 1.0 / inv_i } else { 0.0 };
        } else {
            self.motor_mass = 0.0;
            self.motor_impulse = 0.0;
        }

        if data.step.warm_starting {
            let ratio = data.step.dt_ratio;
            self.impulse *= ratio;
            self.spring_impulse *= ratio;
            self.motor_impulse *= ratio;

            let p = self.ay * self.impulse + self.ax * self.spring_impulse;
            let l_a = self.impulse * self.s_ay + self.spring_impulse * self.s_ax
                + self.motor_impulse;
            let l_b = self.impulse * self.s_by + self.spring_impulse * self.s_bx
                + self.motor_impulse;

            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * l_a;
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * l_b;
        } else {
            self.impulse = 0.0;
            self.spring_impulse = 0.0;
            self.motor_impulse = 0.0;
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        // Spring
        {
            let cdot = self.ax.dot(v_b - v_a) + self.s_bx * w_b - self.s_ax * w_a;
            let impulse =
                -self.spring_mass * (cdot + self.bias + self.gamma * self.spring_impulse);
            self.spring_impulse += impulse;

            let p = self.ax * impulse;
            v_a -= p * m_a;
            w_a -= i_a * impulse * self.s_ax;
            v_b += p * m_b;
            w_b += i_b * impulse * self.s_bx;
        }

        // Motor
        {
            let cdot = w_b - w_a - self.motor_speed;
            let mut impulse = -self.motor_mass * cdot;
            let old = self.motor_impulse;
            let max_impulse = self.max_motor_torque * data.step.dt;
            self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            impulse = self.motor_impulse - old;

            w_a -= i_a * impulse;
            w_b += i_b * impulse;
        }

        // Point-to-line
        {
            let cdot = self.ay.dot(v_b - v_a) + self.s_by * w_b - self.s_ay * w_a;
            let impulse = -self.mass * cdot;
            self.impulse += impulse;

            let p = self.ay * impulse;
            v_a -= p * m_a;
            w_a -= i_a * impulse * self.s_ay;
            v_b += p * m_b;
            w_b += i_b * impulse * self.s_by;
        }

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut c_a = data.positions[ia].c;
        let mut a_a = data.positions[ia].a;
        let mut c_b = data.positions[ib].c;
        let mut a_b = data.positions[ib].a;

        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
        let d = c_b + r_b - c_a - r_a;

        let ay = q_a.apply(self.local_y_axis_a);
        let s_ay = (d + r_a).cross(ay);
        let s_by = r_b.cross(ay);

        let c = d.dot(ay);
        let k = m_a + m_b + i_a * s_ay * s_ay + i_b * s_by * s_by;
        let impulse = if k != 0.0 { -c / k } else { 0.0 };

        let p = ay * impulse;
        c_a -= p * m_a;
        a_a -= i_a * impulse * s_ay;
        c_b += p * m_b;
        a_b += i_b * impulse * s_by;

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        c.abs() <= LINEAR_SLOP
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        (self.ay * self.impulse + self.ax * self.spring_impulse) * inv_dt
    }

    pub(crate) fn reaction_torque(&self, inv_dt: f32) -> f32 {
        self.motor_impulse * inv_dt
    }
}

// ============================================================================
// Motor joint
// ============================================================================

/// Drives body B's position and rotation toward an offset from body A
/// without rigid coupling. Useful for animated or player-steered bodies
/// that should still respond to collisions.
#[derive(Clone, Debug)]
pub struct MotorJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Target position of B in A's local frame
    pub linear_offset: Vec2,
    /// Target relative angle
    pub angular_offset: f32,
    pub max_force: f32,
    pub max_torque: f32,
    /// Fraction of the pose error corrected per step, in [0, 1]
    pub correction_factor: f32,
    pub collide_connected: bool,
}

impl MotorJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            linear_offset: Vec2::ZERO,
            angular_offset: 0.0,
            max_force: 1.0,
            max_torque: 1.0,
            correction_factor: 0.3,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MotorJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    linear_offset: Vec2,
    angular_offset: f32,
    max_force: f32,
    max_torque: f32,
    correction_factor: f32,

    linear_impulse: Vec2,
    angular_impulse: f32,

    // Solver cache
    r_a: Vec2,
    r_b: Vec2,
    linear_error: Vec2,
    angular_error: f32,
    linear_mass: Mat22,
    angular_mass: f32,
}

impl MotorJoint {
    #[must_use]
    pub fn new(def: &MotorJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            linear_offset: def.linear_offset,
            angular_offset: def.angular_offset,
            max_force: def.max_force,
            max_torque: def.max_torque,
            correction_factor: def.correction_factor.clamp(0.0, 1.0),
            linear_impulse: Vec2::ZERO,
            angular_impulse: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            linear_error: Vec2::ZERO,
            angular_error: 0.0,
            linear_mass: Mat22::default(),
            angular_mass: 0.0,
        }
    }

    pub fn set_linear_offset(&mut self, offset: Vec2) {
        self.linear_offset = offset;
    }

    pub fn set_angular_offset(&mut self, offset: f32) {
        self.angular_offset = offset;
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let c_a = data.positions[ia].c;
        let a_a = data.positions[ia].a;
        let c_b = data.positions[ib].c;
        let a_b = data.positions[ib].a;
        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        self.r_a = q_a.apply(self.linear_offset - self.prep_a.local_center);
        self.r_b = q_b.apply(-self.prep_b.local_center);

        self.linear_error = c_b + self.r_b - c_a - self.r_a;
        self.angular_error = a_b - a_a - self.angular_offset;

        let k11 = m_a + m_b + i_a * self.r_a.y * self.r_a.y + i_b * self.r_b.y * self.r_b.y;
        let k12 = -i_a * self.r_a.x * self.r_a.y - i_b * self.r_b.x * self.r_b.y;
        let k22 = m_a + m_b + i_a * self.r_a.x * self.r_a.x + i_b * self.r_b.x * self.r_b.x;
        self.linear_mass = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22)).inverse();

        let inv_i = i_a + i_b;
        self.angular_mass = if inv_i > 0.0 { 1.0 / inv_i } else { 0.0 };

        if data.step.warm_starting {
            let ratio = data.step.dt_ratio;
            self.linear_impulse *= ratio;
            self.angular_impulse *= ratio;

            let p = self.linear_impulse;
            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * (self.r_a.cross(p) + self.angular_impulse);
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * (self.r_b.cross(p) + self.angular_impulse);
        } else {
            self.linear_impulse = Vec2::ZERO;
            self.angular_impulse = 0.0;
        }
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let h = data.step.dt;
        let inv_h = data.step.inv_dt;

        // Angular
        {
            let cdot = w_b - w_a + inv_h * self.correction_factor * self.angular_error;
            let mut impulse = -self.angular_mass * cdot;
            let old = self.angular_impulse;
            let max_impulse = self.max_torque * h;
            self.angular_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            impulse = self.angular_impulse - old;

            w_a -= i_a * impulse;
            w_b += i_b * impulse;
        }

        // Linear
        {
            let cdot = v_b + Vec2::cross_sv(w_b, self.r_b)
                - v_a
                - Vec2::cross_sv(w_a, self.r_a)
                + self.linear_error * (inv_h * self.correction_factor);

            let mut impulse = -self.linear_mass.mul_vec2(cdot);
            let old = self.linear_impulse;
            self.linear_impulse += impulse;

            let max_impulse = self.max_force * h;
            if self.linear_impulse.length_squared() > max_impulse * max_impulse {
                self.linear_impulse =
                    self.linear_impulse * (max_impulse / self.linear_impulse.length());
            }
            impulse = self.linear_impulse - old;

            v_a -= impulse * m_a;
            w_a -= i_a * self.r_a.cross(impulse);
            v_b += impulse * m_b;
            w_b += i_b * self.r_b.cross(impulse);
        }

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    pub(crate) fn solve_position_constraints(&mut self, _data: &mut SolverData<'_>) -> bool {
        // Pose error is consumed as a velocity bias instead
        true
    }

    pub(crate) fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.linear_impulse * inv_dt
    }

    pub(crate) fn reaction_torque(&self, inv_dt: f32) -> f32 {
        self.angular_impulse * inv_dt
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joint::SolverStep;

    fn step() -> SolverStep {
        SolverStep {
            dt: 1.0 / 60.0,
            inv_dt: 60.0,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
        }
    }

    fn unit_data(index: usize) -> JointBodyData {
        JointBodyData {
            index,
            local_center: Vec2::ZERO,
            inv_mass: 1.0,
            inv_i: 1.0,
        }
    }

    fn static_data(index: usize) -> JointBodyData {
        JointBodyData {
            index,
            local_center: Vec2::ZERO,
            inv_mass: 0.0,
            inv_i: 0.0,
        }
    }

    #[test]
    fn test_pulley_couples_rope_speeds() {
        // Both bodies hang 1m below their ground anchors; pulling A down
        // must lift B at the coupled rate
        let mut def = PulleyJointDef::new(BodyHandle(0), BodyHandle(1));
        def.ground_anchor_a = Vec2::new(-2.0, 2.0);
        def.ground_anchor_b = Vec2::new(2.0, 2.0);
        def.length_a = 1.0;
        def.length_b = 1.0;
        def.ratio = 1.0;
        let mut joint = PulleyJoint::new(&def);
        joint.prep_a = unit_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![
            Position {
                c: Vec2::new(-2.0, 1.0),
                a: 0.0,
            },
            Position {
                c: Vec2::new(2.0, 1.0),
                a: 0.0,
            },
        ];
        // A moving down, B at rest: taut ropes force B upward
        let mut velocities = vec![
            Velocity {
                v: Vec2::new(0.0, -2.0),
                w: 0.0,
            },
            Velocity::default(),
        ];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }

        let rope_a_rate = -data.velocities[0].v.y; // paying out
        let rope_b_rate = -data.velocities[1].v.y;
        assert!(
            (rope_a_rate + rope_b_rate).abs() < 1e-3,
            "Total rope length rate must vanish: a={rope_a_rate}, b={rope_b_rate}"
        );
        assert!(
            data.velocities[1].v.y > 0.0,
            "B must rise as A descends, got {}",
            data.velocities[1].v.y
        );
    }

    #[test]
    fn test_weld_locks_both_dof() {
        let def = WeldJointDef::new(BodyHandle(0), BodyHandle(1));
        let mut joint = WeldJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(1.0, -2.0),
                w: 3.0,
            },
        ];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }

        assert!(
            data.velocities[1].v.length() < 1e-3,
            "Weld removes linear motion, got {:?}",
            data.velocities[1].v
        );
        assert!(
            data.velocities[1].w.abs() < 1e-3,
            "Weld removes angular motion, got {}",
            data.velocities[1].w
        );
    }

    #[test]
    fn test_rope_slack_does_nothing() {
        let def = RopeJointDef::new(BodyHandle(0), BodyHandle(1), 5.0);
        let mut joint = RopeJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        // Well inside the bound
        let mut positions = vec![
            Position::default(),
            Position {
                c: Vec2::new(2.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(1.0, 0.0),
                w: 0.0,
            },
        ];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        assert_eq!(joint.limit_state(), LimitState::Inactive);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        // Predictive braking may shave a little speed but must not stop it
        assert!(
            data.velocities[1].v.x > 0.5,
            "Slack rope leaves motion essentially free, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_rope_taut_stops_stretch() {
        let def = RopeJointDef::new(BodyHandle(0), BodyHandle(1), 2.0);
        let mut joint = RopeJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        // At max length, still moving outward
        let mut positions = vec![
            Position::default(),
            Position {
                c: Vec2::new(2.0, 0.0),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(3.0, 0.0),
                w: 0.0,
            },
        ];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        assert!(
            data.velocities[1].v.x < 1e-3,
            "Taut rope must stop outward motion, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_wheel_constrains_perpendicular_motion() {
        // Vertical suspension axis: sideways slip must be removed, the
        // spring only softens motion along the axis
        let def = WheelJointDef::new(BodyHandle(0), BodyHandle(1), Vec2::new(0.0, 1.0));
        let mut joint = WheelJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(2.0, -1.0),
                w: 0.0,
            },
        ];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        assert!(
            data.velocities[1].v.x.abs() < 1e-3,
            "Perpendicular slip must vanish, got {}",
            data.velocities[1].v.x
        );
        assert!(
            data.velocities[1].v.y < -0.5,
            "Axis motion stays mostly free through the spring, got {}",
            data.velocities[1].v.y
        );
    }

    #[test]
    fn test_wheel_motor_spins_wheel() {
        let mut def = WheelJointDef::new(BodyHandle(0), BodyHandle(1), Vec2::new(0.0, 1.0));
        def.enable_motor = true;
        def.motor_speed = 10.0;
        def.max_motor_torque = 50.0;
        let mut joint = WheelJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![Velocity::default(), Velocity::default()];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        assert!(
            data.velocities[1].w > 5.0,
            "Motor accelerates the wheel, got w={}",
            data.velocities[1].w
        );
    }

    #[test]
    fn test_motor_joint_seeks_offset() {
        let mut def = MotorJointDef::new(BodyHandle(0), BodyHandle(1));
        def.linear_offset = Vec2::new(1.0, 0.0);
        def.max_force = 100.0;
        def.max_torque = 100.0;
        let mut joint = MotorJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        // B sits at the origin, so it trails the target by 1m in x
        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![Velocity::default(), Velocity::default()];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        assert!(
            data.velocities[1].v.x > 0.0,
            "Motor joint pushes B toward the offset, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_motor_joint_force_budget() {
        let mut def = MotorJointDef::new(BodyHandle(0), BodyHandle(1));
        def.linear_offset = Vec2::new(100.0, 0.0);
        def.max_force = 1.0;
        let mut joint = MotorJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![Velocity::default(), Velocity::default()];

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..20 {
            joint.solve_velocity_constraints(&mut data);
        }
        // Total impulse is capped at max_force * dt; with unit mass the
        // speed can never exceed that
        let cap = 1.0 * (1.0 / 60.0);
        assert!(
            data.velocities[1].v.x <= cap + 1e-5,
            "Impulse must respect the force budget: v={} cap={cap}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_gear_couples_two_revolutes() {
        // Gear over two revolute joints with ratio 2: wA + 2*wB is conserved
        let def = GearJointDef::new(JointHandle(0), JointHandle(1), 2.0);
        let mut joint = GearJoint::new(&def);
        joint.resolve(GearResolution {
            body_a: BodyHandle(1),
            body_b: BodyHandle(3),
            body_c: BodyHandle(0),
            body_d: BodyHandle(2),
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_anchor_c: Vec2::ZERO,
            local_anchor_d: Vec2::ZERO,
            axis_a: GearAxis::Revolute {
                reference_angle: 0.0,
            },
            axis_b: GearAxis::Revolute {
                reference_angle: 0.0,
            },
            constant: 0.0,
        });
        // Grounds C and D are static; gears A and B are dynamic
        joint.prep_a = unit_data(1);
        joint.prep_b = unit_data(3);
        joint.prep_c = static_data(0);
        joint.prep_d = static_data(2);

        let mut positions = vec![Position::default(); 4];
        let mut velocities = vec![Velocity::default(); 4];
        velocities[1].w = 4.0;

        let s = step();
        let mut data = SolverData {
            step: s,
            positions: &mut positions,
            velocities: &mut velocities,
        };
        joint.init_velocity_constraints(&mut data);
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }
        let coupled = data.velocities[1].w + 2.0 * data.velocities[3].w;
        assert!(
            coupled.abs() < 1e-3,
            "Gear coordinate rate must vanish, got {coupled}"
        );
        assert!(
            data.velocities[3].w < 0.0,
            "Driven gear turns opposite in coordinate space, got {}",
            data.velocities[3].w
        );
    }
}
