//! Joints: Core Types
//!
//! Constraint infrastructure shared by all joint types plus the four
//! workhorse joints: revolute (pin), prismatic (slider), distance
//! (rod/spring), and mouse (soft target drag). The remaining types live
//! in `joint_extra.rs`.
//!
//! Joints are solved inside islands: `init_velocity_constraints`
//! computes effective masses and warm-starts with last step's impulses
//! (scaled by the dt ratio), `solve_velocity_constraints` runs once per
//! velocity iteration, and `solve_position_constraints` runs in the NGS
//! loop and reports convergence.
//!
//! # Features
//!
//! - **Motors**: revolute and prismatic drive toward a target speed
//!   under a maximum torque/force budget
//! - **Limits**: lower/upper bounds solved as one-sided constraints
//!   with separate accumulated impulses
//! - **Soft constraints**: distance and mouse use frequency/damping
//!   converted to gamma/bias terms
//!
//! Author: Moroya Sakamoto

use crate::body::BodyHandle;
use crate::contact_solver::{Position, Velocity};
use crate::math::{Mat22, Rot, Vec2};
use crate::settings::{
    ANGULAR_SLOP, LINEAR_SLOP, MAX_ANGULAR_CORRECTION, MAX_LINEAR_CORRECTION,
};

pub use crate::joint_extra::{
    GearJoint, GearJointDef, MotorJoint, MotorJointDef, PulleyJoint, PulleyJointDef, RopeJoint,
    RopeJointDef, WeldJoint, WeldJointDef, WheelJoint, WheelJointDef,
};

/// Handle to a joint slot in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JointHandle(pub u32);

/// Per-step solver parameters.
#[derive(Clone, Copy, Debug)]
pub struct SolverStep {
    pub dt: f32,
    pub inv_dt: f32,
    /// dt / previous dt, scales warm-start impulses
    pub dt_ratio: f32,
    pub velocity_iterations: usize,
    pub position_iterations: usize,
    pub warm_starting: bool,
}

/// Island scratch state handed to joint solvers.
pub struct SolverData<'a> {
    pub step: SolverStep,
    pub positions: &'a mut [Position],
    pub velocities: &'a mut [Velocity],
}

/// Mass data a joint caches about one of its bodies before solving.
#[derive(Clone, Copy, Debug, Default)]
pub struct JointBodyData {
    /// Island-local index into the position/velocity arrays
    pub index: usize,
    pub local_center: Vec2,
    pub inv_mass: f32,
    pub inv_i: f32,
}

/// Limit/motor constraint activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LimitState {
    #[default]
    Inactive,
    AtLower,
    AtUpper,
    /// Lower and upper coincide: the constraint is an equality
    Equal,
}

// ============================================================================
// Joint enum
// ============================================================================

/// Construction parameters for any joint type.
#[derive(Clone, Debug)]
pub enum JointDef {
    Revolute(RevoluteJointDef),
    Prismatic(PrismaticJointDef),
    Distance(DistanceJointDef),
    Mouse(MouseJointDef),
    Motor(MotorJointDef),
    Pulley(PulleyJointDef),
    Gear(GearJointDef),
    Weld(WeldJointDef),
    Rope(RopeJointDef),
    Wheel(WheelJointDef),
}

/// A constraint between two bodies. Closed set with match dispatch.
#[derive(Clone, Debug)]
pub enum Joint {
    Revolute(RevoluteJoint),
    Prismatic(PrismaticJoint),
    Distance(DistanceJoint),
    Mouse(MouseJoint),
    Motor(MotorJoint),
    Pulley(PulleyJoint),
    Gear(GearJoint),
    Weld(WeldJoint),
    Rope(RopeJoint),
    Wheel(WheelJoint),
}

macro_rules! dispatch {
    ($self:expr, $j:ident => $body:expr) => {
        match $self {
            Joint::Revolute($j) => $body,
            Joint::Prismatic($j) => $body,
            Joint::Distance($j) => $body,
            Joint::Mouse($j) => $body,
            Joint::Motor($j) => $body,
            Joint::Pulley($j) => $body,
            Joint::Gear($j) => $body,
            Joint::Weld($j) => $body,
            Joint::Rope($j) => $body,
            Joint::Wheel($j) => $body,
        }
    };
}

impl Joint {
    pub(crate) fn from_def(def: &JointDef) -> Self {
        match def {
            JointDef::Revolute(d) => Joint::Revolute(RevoluteJoint::new(d)),
            JointDef::Prismatic(d) => Joint::Prismatic(PrismaticJoint::new(d)),
            JointDef::Distance(d) => Joint::Distance(DistanceJoint::new(d)),
            JointDef::Mouse(d) => Joint::Mouse(MouseJoint::new(d)),
            JointDef::Motor(d) => Joint::Motor(MotorJoint::new(d)),
            JointDef::Pulley(d) => Joint::Pulley(PulleyJoint::new(d)),
            JointDef::Gear(d) => Joint::Gear(GearJoint::new(d)),
            JointDef::Weld(d) => Joint::Weld(WeldJoint::new(d)),
            JointDef::Rope(d) => Joint::Rope(RopeJoint::new(d)),
            JointDef::Wheel(d) => Joint::Wheel(WheelJoint::new(d)),
        }
    }

    #[must_use]
    pub fn body_a(&self) -> BodyHandle {
        dispatch!(self, j => j.body_a)
    }

    #[must_use]
    pub fn body_b(&self) -> BodyHandle {
        dispatch!(self, j => j.body_b)
    }

    /// May the two connected bodies still collide with each other?
    #[must_use]
    pub fn collide_connected(&self) -> bool {
        dispatch!(self, j => j.collide_connected)
    }

    /// Cache island indices and mass data before solving.
    pub(crate) fn prepare(&mut self, lookup: &dyn Fn(BodyHandle) -> JointBodyData) {
        match self {
            Joint::Gear(j) => j.prepare(lookup),
            _ => dispatch!(self, j => {
                j.prep_a = lookup(j.body_a);
                j.prep_b = lookup(j.body_b);
            }),
        }
    }

    pub(crate) fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        dispatch!(self, j => j.init_velocity_constraints(data))
    }

    pub(crate) fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        dispatch!(self, j => j.solve_velocity_constraints(data))
    }

    /// One NGS iteration; true when within tolerance.
    pub(crate) fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        dispatch!(self, j => j.solve_position_constraints(data))
    }

    /// Accumulated reaction force on body B at the anchor.
    #[must_use]
    pub fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        dispatch!(self, j => j.reaction_force(inv_dt))
    }

    /// Accumulated reaction torque on body B.
    #[must_use]
    pub fn reaction_torque(&self, inv_dt: f32) -> f32 {
        dispatch!(self, j => j.reaction_torque(inv_dt))
    }
}

// ============================================================================
// Revolute joint
// ============================================================================

/// Pin two bodies at a point; optional motor and angle limits.
#[derive(Clone, Debug)]
pub struct RevoluteJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Anchor in body A's local frame
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local frame
    pub local_anchor_b: Vec2,
    /// `angle_b - angle_a` at rest
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_angle: f32,
    pub upper_angle: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_torque: f32,
    pub collide_connected: bool,
}

impl RevoluteJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            reference_angle: 0.0,
            enable_limit: false,
            lower_angle: 0.0,
            upper_angle: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_torque: 0.0,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RevoluteJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    reference_angle: f32,

    // Accumulated impulses
    impulse: Vec2,
    motor_impulse: f32,
    lower_impulse: f32,
    upper_impulse: f32,

    enable_limit: bool,
    lower_angle: f32,
    upper_angle: f32,
    enable_motor: bool,
    motor_speed: f32,
    max_motor_torque: f32,

    // Solver cache
    r_a: Vec2,
    r_b: Vec2,
    k: Mat22,
    axial_mass: f32,
    angle: f32,
}

impl RevoluteJoint {
    #[must_use]
    pub fn new(def: &RevoluteJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            reference_angle: def.reference_angle,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            enable_limit: def.enable_limit,
            lower_angle: def.lower_angle,
            upper_angle: def.upper_angle,
            enable_motor: def.enable_motor,
            motor_speed: def.motor_speed,
            max_motor_torque: def.max_motor_torque,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            k: Mat22::default(),
            axial_mass: 0.0,
            angle: 0.0,
        }
    }

    /// Current joint angle.
    #[must_use]
    pub fn joint_angle(&self) -> f32 {
        self.angle
    }

    #[must_use]
    pub fn local_anchor_a(&self) -> Vec2 {
        self.local_anchor_a
    }

    #[must_use]
    pub fn local_anchor_b(&self) -> Vec2 {
        self.local_anchor_b
    }

    #[must_use]
    pub fn reference_angle(&self) -> f32 {
        self.reference_angle
    }

    #[must_use]
    pub fn motor_impulse(&self) -> f32 {
        self.motor_impulse
    }

    pub fn set_motor_speed(&mut self, speed: f32) {
        self.motor_speed = speed;
    }

    pub fn enable_motor(&mut self, enable: bool) {
        self.enable_motor = enable;
    }

    pub fn set_limits(&mut self, lower: f32, upper: f32) {
        debug_assert!(lower <= upper);
        if lower != self.lower_angle || upper != self.upper_angle {
            self.lower_angle = lower;
            self.upper_angle = upper;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
    }

    fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let q_a = Rot::from_angle(data.positions[ia].a);
        let q_b = Rot::from_angle(data.positions[ib].a);
        self.r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        self.r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        let k11 = m_a + m_b + i_a * self.r_a.y * self.r_a.y + i_b * self.r_b.y * self.r_b.y;
        let k12 = -i_a * self.r_a.x * self.r_a.y - i_b * self.r_b.x * self.r_b.y;
        let k22 = m_a + m_b + i_a * self.r_a.x * self.r_a.x + i_b * self.r_b.x * self.r_b.x;
        self.k = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22));

        let axial = i_a + i_b;
        self.axial_mass = if axial > 0.0 { 1.0 / axial } else { 0.0 };
        self.angle = data.positions[ib].a - data.positions[ia].a - self.reference_angle;

        if !self.enable_limit {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }

        if data.step.warm_starting {
            let ratio = data.step.dt_ratio;
            self.impulse *= ratio;
            self.motor_impulse *= ratio;
            self.lower_impulse *= ratio;
            self.upper_impulse *= ratio;

            let axial_impulse = self.motor_impulse + self.lower_impulse - self.upper_impulse;
            let p = self.impulse;

            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * (self.r_a.cross(p) + axial_impulse);
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * (self.r_b.cross(p) + axial_impulse);
        } else {
            self.impulse = Vec2::ZERO;
            self.motor_impulse = 0.0;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let fixed = i_a + i_b == 0.0;

        // Motor
        if self.enable_motor && !fixed {
            let cdot = w_b - w_a - self.motor_speed;
            let mut impulse = -self.axial_mass * cdot;
            let old = self.motor_impulse;
            let max_impulse = self.max_motor_torque * data.step.dt;
            self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            impulse = self.motor_impulse - old;

            w_a -= i_a * impulse;
            w_b += i_b * impulse;
        }

        // Limits as one-sided constraints
        if self.enable_limit && !fixed {
            // Lower
            {
                let c = self.angle - self.lower_angle;
                let cdot = w_b - w_a;
                let mut impulse = -self.axial_mass * (cdot + c.min(0.0) * data.step.inv_dt);
                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                impulse = self.lower_impulse - old;

                w_a -= i_a * impulse;
                w_b += i_b * impulse;
            }
            // Upper (signs reversed)
            {
                let c = self.upper_angle - self.angle;
                let cdot = w_a - w_b;
                let mut impulse = -self.axial_mass * (cdot + c.min(0.0) * data.step.inv_dt);
                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                impulse = self.upper_impulse - old;

                w_a += i_a * impulse;
                w_b -= i_b * impulse;
            }
        }

        // Point-to-point
        {
            let cdot =
                v_b + Vec2::cross_sv(w_b, self.r_b) - v_a - Vec2::cross_sv(w_a, self.r_a);
            let impulse = self.k.solve(-cdot);
            self.impulse += impulse;

            v_a -= impulse * m_a;
            w_a -= i_a * self.r_a.cross(impulse);
            v_b += impulse * m_b;
            w_b += i_b * self.r_b.cross(impulse);
        }

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut c_a = data.positions[ia].c;
        let mut a_a = data.positions[ia].a;
        let mut c_b = data.positions[ib].c;
        let mut a_b = data.positions[ib].a;

        let mut angular_error = 0.0f32;

        // Angular limit correction
        let fixed = i_a + i_b == 0.0;
        if self.enable_limit && !fixed {
            let angle = a_b - a_a - self.reference_angle;
            let mut c = 0.0f32;
            if (self.upper_angle - self.lower_angle).abs() < 2.0 * ANGULAR_SLOP {
                c = (angle - self.lower_angle)
                    .clamp(-MAX_ANGULAR_CORRECTION, MAX_ANGULAR_CORRECTION);
            } else if angle <= self.lower_angle {
                c = (angle - self.lower_angle + ANGULAR_SLOP)
                    .clamp(-MAX_ANGULAR_CORRECTION, 0.0);
            } else if angle >= self.upper_angle {
                c = (angle - self.upper_angle - ANGULAR_SLOP)
                    .clamp(0.0, MAX_ANGULAR_CORRECTION);
            }
            let limit_impulse = -self.axial_mass * c;
            a_a -= i_a * limit_impulse;
            a_b += i_b * limit_impulse;
            angular_error = c.abs();
        }

        // Point correction
        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);
        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        let c = c_b + r_b - c_a - r_a;
        let position_error = c.length();

        let k11 = m_a + m_b + i_a * r_a.y * r_a.y + i_b * r_b.y * r_b.y;
        let k12 = -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y;
        let k22 = m_a + m_b + i_a * r_a.x * r_a.x + i_b * r_b.x * r_b.x;
        let k = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22));
        let impulse = -k.solve(c);

        c_a -= impulse * m_a;
        a_a -= i_a * r_a.cross(impulse);
        c_b += impulse * m_b;
        a_b += i_b * r_b.cross(impulse);

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        position_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
    }

    fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.impulse * inv_dt
    }

    fn reaction_torque(&self, inv_dt: f32) -> f32 {
        (self.motor_impulse + self.lower_impulse - self.upper_impulse) * inv_dt
    }
}

// ============================================================================
// Prismatic joint
// ============================================================================

/// Slider: relative motion restricted to one axis, rotation locked;
/// optional motor and translation limits.
#[derive(Clone, Debug)]
pub struct PrismaticJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Slide axis in body A's local frame (unit)
    pub local_axis_a: Vec2,
    pub reference_angle: f32,
    pub enable_limit: bool,
    pub lower_translation: f32,
    pub upper_translation: f32,
    pub enable_motor: bool,
    pub motor_speed: f32,
    pub max_motor_force: f32,
    pub collide_connected: bool,
}

impl PrismaticJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, axis: Vec2) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            local_axis_a: axis.normalize(),
            reference_angle: 0.0,
            enable_limit: false,
            lower_translation: 0.0,
            upper_translation: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PrismaticJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    local_axis_a: Vec2,
    local_y_axis_a: Vec2,
    reference_angle: f32,

    /// (perp, angular) impulses
    impulse: Vec2,
    motor_impulse: f32,
    lower_impulse: f32,
    upper_impulse: f32,

    enable_limit: bool,
    lower_translation: f32,
    upper_translation: f32,
    enable_motor: bool,
    motor_speed: f32,
    max_motor_force: f32,

    // Solver cache
    axis: Vec2,
    perp: Vec2,
    s1: f32,
    s2: f32,
    a1: f32,
    a2: f32,
    k: Mat22,
    axial_mass: f32,
    translation: f32,
}

impl PrismaticJoint {
    #[must_use]
    pub fn new(def: &PrismaticJointDef) -> Self {
        let axis = def.local_axis_a.normalize();
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            local_axis_a: axis,
            local_y_axis_a: axis.skew(),
            reference_angle: def.reference_angle,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            lower_impulse: 0.0,
            upper_impulse: 0.0,
            enable_limit: def.enable_limit,
            lower_translation: def.lower_translation,
            upper_translation: def.upper_translation,
            enable_motor: def.enable_motor,
            motor_speed: def.motor_speed,
            max_motor_force: def.max_motor_force,
            axis: Vec2::ZERO,
            perp: Vec2::ZERO,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            k: Mat22::default(),
            axial_mass: 0.0,
            translation: 0.0,
        }
    }

    /// Current translation along the slide axis.
    #[must_use]
    pub fn joint_translation(&self) -> f32 {
        self.translation
    }

    #[must_use]
    pub fn local_anchor_a(&self) -> Vec2 {
        self.local_anchor_a
    }

    #[must_use]
    pub fn local_anchor_b(&self) -> Vec2 {
        self.local_anchor_b
    }

    #[must_use]
    pub fn local_axis_a(&self) -> Vec2 {
        self.local_axis_a
    }

    #[must_use]
    pub fn reference_angle(&self) -> f32 {
        self.reference_angle
    }

    pub fn set_motor_speed(&mut self, speed: f32) {
        self.motor_speed = speed;
    }

    pub fn enable_motor(&mut self, enable: bool) {
        self.enable_motor = enable;
    }

    pub fn set_limits(&mut self, lower: f32, upper: f32) {
        debug_assert!(lower <= upper);
        if lower != self.lower_translation || upper != self.upper_translation {
            self.lower_translation = lower;
            self.upper_translation = upper;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
    }

    fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let c_a = data.positions[ia].c;
        let a_a = data.positions[ia].a;
        let c_b = data.positions[ib].c;
        let a_b = data.positions[ib].a;
        let q_a = Rot::from_angle(a_a);
        let q_b = Rot::from_angle(a_b);

        let r_a = q_a.apply(self.local_anchor_a - self.prep_a.local_center);
        let r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);
        let d = (c_b - c_a) + r_b - r_a;

        self.axis = q_a.apply(self.local_axis_a);
        self.a1 = (d + r_a).cross(self.axis);
        self.a2 = r_b.cross(self.axis);
        let axial = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;
        self.axial_mass = if axial > 0.0 { 1.0 / axial } else { 0.0 };

        self.perp = q_a.apply(self.local_y_axis_a);
        self.s1 = (d + r_a).cross(self.perp);
        self.s2 = r_b.cross(self.perp);

        let k11 = m_a + m_b + i_a * self.s1 * self.s1 + i_b * self.s2 * self.s2;
        let k12 = i_a * self.s1 + i_b * self.s2;
        // Both bodies fixed-rotation: use 1 so solve stays well-defined
        let k22 = {
            let k = i_a + i_b;
            if k == 0.0 {
                1.0
            } else {
                k
            }
        };
        self.k = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22));

        self.translation = self.axis.dot(d);

        if !self.enable_limit {
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }

        if data.step.warm_starting {
            let ratio = data.step.dt_ratio;
            self.impulse *= ratio;
            self.motor_impulse *= ratio;
            self.lower_impulse *= ratio;
            self.upper_impulse *= ratio;

            let axial_impulse = self.motor_impulse + self.lower_impulse - self.upper_impulse;
            let p = self.perp * self.impulse.x + self.axis * axial_impulse;
            let l_a = self.impulse.x * self.s1 + self.impulse.y + axial_impulse * self.a1;
            let l_b = self.impulse.x * self.s2 + self.impulse.y + axial_impulse * self.a2;

            data.velocities[ia].v -= p * m_a;
            data.velocities[ia].w -= i_a * l_a;
            data.velocities[ib].v += p * m_b;
            data.velocities[ib].w += i_b * l_b;
        } else {
            self.impulse = Vec2::ZERO;
            self.motor_impulse = 0.0;
            self.lower_impulse = 0.0;
            self.upper_impulse = 0.0;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        // Motor
        if self.enable_motor {
            let cdot = self.axis.dot(v_b - v_a) + self.a2 * w_b - self.a1 * w_a;
            let mut impulse = self.axial_mass * (self.motor_speed - cdot);
            let old = self.motor_impulse;
            let max_impulse = self.max_motor_force * data.step.dt;
            self.motor_impulse = (old + impulse).clamp(-max_impulse, max_impulse);
            impulse = self.motor_impulse - old;

            let p = self.axis * impulse;
            v_a -= p * m_a;
            w_a -= i_a * impulse * self.a1;
            v_b += p * m_b;
            w_b += i_b * impulse * self.a2;
        }

        // Limits
        if self.enable_limit {
            // Lower
            {
                let c = self.translation - self.lower_translation;
                let cdot = self.axis.dot(v_b - v_a) + self.a2 * w_b - self.a1 * w_a;
                let mut impulse = -self.axial_mass * (cdot + c.min(0.0) * data.step.inv_dt);
                let old = self.lower_impulse;
                self.lower_impulse = (old + impulse).max(0.0);
                impulse = self.lower_impulse - old;

                let p = self.axis * impulse;
                v_a -= p * m_a;
                w_a -= i_a * impulse * self.a1;
                v_b += p * m_b;
                w_b += i_b * impulse * self.a2;
            }
            // Upper
            {
                let c = self.upper_translation - self.translation;
                let cdot = self.axis.dot(v_a - v_b) + self.a1 * w_a - self.a2 * w_b;
                let mut impulse = -self.axial_mass * (cdot + c.min(0.0) * data.step.inv_dt);
                let old = self.upper_impulse;
                self.upper_impulse = (old + impulse).max(0.0);
                impulse = self.upper_impulse - old;

                let p = self.axis * impulse;
                v_a += p * m_a;
                w_a += i_a * impulse * self.a1;
                v_b -= p * m_b;
                w_b -= i_b * impulse * self.a2;
            }
        }

        // Perpendicular + angular lock
        {
            let cdot = Vec2::new(
                self.perp.dot(v_b - v_a) + self.s2 * w_b - self.s1 * w_a,
                w_b - w_a,
            );
            let df = self.k.solve(-cdot);
            self.impulse += df;

            let p = self.perp * df.x;
            let l_a = df.x * self.s1 + df.y;
            let l_b = df.x * self.s2 + df.y;

            v_a -= p * m_a;
            w_a -= i_a * l_a;
            v_b += p * m_b;
            w_b += i_b * l_b;
        }

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
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

        let axis = q_a.apply(self.local_axis_a);
        let a1 = (d + r_a).cross(axis);
        let a2 = r_b.cross(axis);
        let perp = q_a.apply(self.local_y_axis_a);
        let s1 = (d + r_a).cross(perp);
        let s2 = r_b.cross(perp);

        let c1 = Vec2::new(perp.dot(d), a_b - a_a - self.reference_angle);
        let mut position_error = c1.x.abs();
        let angular_error = c1.y.abs();

        // Axial limit correction
        let mut c2 = 0.0f32;
        if self.enable_limit {
            let translation = axis.dot(d);
            if (self.upper_translation - self.lower_translation).abs() < 2.0 * LINEAR_SLOP {
                c2 = translation.clamp(-MAX_LINEAR_CORRECTION, MAX_LINEAR_CORRECTION);
            } else if translation <= self.lower_translation {
                c2 = (translation - self.lower_translation + LINEAR_SLOP)
                    .clamp(-MAX_LINEAR_CORRECTION, 0.0);
            } else if translation >= self.upper_translation {
                c2 = (translation - self.upper_translation - LINEAR_SLOP)
                    .clamp(0.0, MAX_LINEAR_CORRECTION);
            }
            position_error = position_error.max(c2.abs());
        }

        let k11 = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
        let k12 = i_a * s1 + i_b * s2;
        let k22 = {
            let k = i_a + i_b;
            if k == 0.0 {
                1.0
            } else {
                k
            }
        };

        let (impulse_x, impulse_y, impulse_z) = if c2 != 0.0 {
            // Active limit: solve the full 3x3 system
            let k13 = i_a * s1 * a1 + i_b * s2 * a2;
            let k23 = i_a * a1 + i_b * a2;
            let k33 = m_a + m_b + i_a * a1 * a1 + i_b * a2 * a2;

            let k = crate::math::Mat33 {
                ex: crate::math::Vec3::new(k11, k12, k13),
                ey: crate::math::Vec3::new(k12, k22, k23),
                ez: crate::math::Vec3::new(k13, k23, k33),
            };
            let c = crate::math::Vec3::new(c1.x, c1.y, c2);
            let imp = k.solve33(-c);
            (imp.x, imp.y, imp.z)
        } else {
            let k = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22));
            let imp = k.solve(-c1);
            (imp.x, imp.y, 0.0)
        };

        let p = perp * impulse_x + axis * impulse_z;
        let l_a = impulse_x * s1 + impulse_y + impulse_z * a1;
        let l_b = impulse_x * s2 + impulse_y + impulse_z * a2;

        c_a -= p * m_a;
        a_a -= i_a * l_a;
        c_b += p * m_b;
        a_b += i_b * l_b;

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        position_error <= LINEAR_SLOP && angular_error <= ANGULAR_SLOP
    }

    fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        (self.perp * self.impulse.x
            + self.axis * (self.motor_impulse + self.lower_impulse - self.upper_impulse))
            * inv_dt
    }

    fn reaction_torque(&self, inv_dt: f32) -> f32 {
        self.impulse.y * inv_dt
    }
}

// ============================================================================
// Distance joint
// ============================================================================

/// Hold two anchors at a fixed distance; optionally a damped spring
/// (frequency > 0).
#[derive(Clone, Debug)]
pub struct DistanceJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    pub local_anchor_a: Vec2,
    pub local_anchor_b: Vec2,
    /// Rest length
    pub length: f32,
    /// Oscillations per second; 0 means rigid
    pub frequency_hz: f32,
    /// 0 = undamped, 1 = critically damped
    pub damping_ratio: f32,
    pub collide_connected: bool,
}

impl DistanceJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, length: f32) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a: Vec2::ZERO,
            local_anchor_b: Vec2::ZERO,
            length: length.max(LINEAR_SLOP),
            frequency_hz: 0.0,
            damping_ratio: 0.0,
            collide_connected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DistanceJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_a: Vec2,
    local_anchor_b: Vec2,
    length: f32,
    frequency_hz: f32,
    damping_ratio: f32,

    impulse: f32,
    gamma: f32,
    bias: f32,

    // Solver cache
    u: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    mass: f32,
}

impl DistanceJoint {
    #[must_use]
    pub fn new(def: &DistanceJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: def.collide_connected,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_a: def.local_anchor_a,
            local_anchor_b: def.local_anchor_b,
            length: def.length,
            frequency_hz: def.frequency_hz,
            damping_ratio: def.damping_ratio,
            impulse: 0.0,
            gamma: 0.0,
            bias: 0.0,
            u: Vec2::ZERO,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            mass: 0.0,
        }
    }

    #[must_use]
    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn set_length(&mut self, length: f32) {
        self.length = length.max(LINEAR_SLOP);
    }

    fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
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

        let current_length = self.u.normalize_and_length();
        if current_length <= LINEAR_SLOP {
            self.u = Vec2::ZERO;
        }

        let cr_a = self.r_a.cross(self.u);
        let cr_b = self.r_b.cross(self.u);
        let mut inv_mass = m_a + m_b + i_a * cr_a * cr_a + i_b * cr_b * cr_b;

        if self.frequency_hz > 0.0 {
            let c = current_length - self.length;
            let omega = 2.0 * core::f32::consts::PI * self.frequency_hz;
            let m = if inv_mass > 0.0 { 1.0 / inv_mass } else { 0.0 };
            // Spring constants from frequency and damping ratio
            let d = 2.0 * m * self.damping_ratio * omega;
            let k = m * omega * omega;

            let h = data.step.dt;
            self.gamma = h * (d + h * k);
            self.gamma = if self.gamma != 0.0 { 1.0 / self.gamma } else { 0.0 };
            self.bias = c * h * k * self.gamma;

            inv_mass += self.gamma;
        } else {
            self.gamma = 0.0;
            self.bias = 0.0;
        }
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

    fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let (ia, ib) = (self.prep_a.index, self.prep_b.index);
        let (m_a, m_b) = (self.prep_a.inv_mass, self.prep_b.inv_mass);
        let (i_a, i_b) = (self.prep_a.inv_i, self.prep_b.inv_i);

        let mut v_a = data.velocities[ia].v;
        let mut w_a = data.velocities[ia].w;
        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let vp_a = v_a + Vec2::cross_sv(w_a, self.r_a);
        let vp_b = v_b + Vec2::cross_sv(w_b, self.r_b);
        let cdot = self.u.dot(vp_b - vp_a);

        let impulse = -self.mass * (cdot + self.bias + self.gamma * self.impulse);
        self.impulse += impulse;

        let p = self.u * impulse;
        v_a -= p * m_a;
        w_a -= i_a * self.r_a.cross(p);
        v_b += p * m_b;
        w_b += i_b * self.r_b.cross(p);

        data.velocities[ia] = Velocity { v: v_a, w: w_a };
        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    fn solve_position_constraints(&mut self, data: &mut SolverData<'_>) -> bool {
        // A spring never fights the position solver
        if self.frequency_hz > 0.0 {
            return true;
        }

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
        let c = (length - self.length).clamp(-MAX_LINEAR_CORRECTION, MAX_LINEAR_CORRECTION);

        let impulse = -self.mass * c;
        let p = u * impulse;

        c_a -= p * m_a;
        a_a -= i_a * r_a.cross(p);
        c_b += p * m_b;
        a_b += i_b * r_b.cross(p);

        data.positions[ia] = Position { c: c_a, a: a_a };
        data.positions[ib] = Position { c: c_b, a: a_b };

        c.abs() < LINEAR_SLOP
    }

    fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.u * (self.impulse * inv_dt)
    }

    fn reaction_torque(&self, _inv_dt: f32) -> f32 {
        0.0
    }
}

// ============================================================================
// Mouse joint
// ============================================================================

/// Soft constraint dragging body B's anchor toward a world target.
/// Body A is unused by the dynamics (conventionally a static body).
#[derive(Clone, Debug)]
pub struct MouseJointDef {
    pub body_a: BodyHandle,
    pub body_b: BodyHandle,
    /// Initial world target; also defines the local anchor on B
    pub target: Vec2,
    /// Anchor on body B in local coordinates
    pub local_anchor_b: Vec2,
    pub max_force: f32,
    pub frequency_hz: f32,
    pub damping_ratio: f32,
}

impl MouseJointDef {
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, target: Vec2, local_anchor_b: Vec2) -> Self {
        Self {
            body_a,
            body_b,
            target,
            local_anchor_b,
            max_force: 0.0,
            frequency_hz: 5.0,
            damping_ratio: 0.7,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MouseJoint {
    pub(crate) body_a: BodyHandle,
    pub(crate) body_b: BodyHandle,
    pub(crate) collide_connected: bool,
    pub(crate) prep_a: JointBodyData,
    pub(crate) prep_b: JointBodyData,

    local_anchor_b: Vec2,
    target: Vec2,
    max_force: f32,
    frequency_hz: f32,
    damping_ratio: f32,

    impulse: Vec2,
    gamma: f32,
    beta: f32,

    // Solver cache
    r_b: Vec2,
    mass: Mat22,
    c: Vec2,
}

impl MouseJoint {
    #[must_use]
    pub fn new(def: &MouseJointDef) -> Self {
        Self {
            body_a: def.body_a,
            body_b: def.body_b,
            collide_connected: false,
            prep_a: JointBodyData::default(),
            prep_b: JointBodyData::default(),
            local_anchor_b: def.local_anchor_b,
            target: def.target,
            max_force: def.max_force,
            frequency_hz: def.frequency_hz,
            damping_ratio: def.damping_ratio,
            impulse: Vec2::ZERO,
            gamma: 0.0,
            beta: 0.0,
            r_b: Vec2::ZERO,
            mass: Mat22::default(),
            c: Vec2::ZERO,
        }
    }

    /// Move the drag target.
    pub fn set_target(&mut self, target: Vec2) {
        self.target = target;
    }

    #[must_use]
    pub fn target(&self) -> Vec2 {
        self.target
    }

    fn init_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let ib = self.prep_b.index;
        let m_b = self.prep_b.inv_mass;
        let i_b = self.prep_b.inv_i;

        let c_b = data.positions[ib].c;
        let q_b = Rot::from_angle(data.positions[ib].a);

        let mass = if m_b > 0.0 { 1.0 / m_b } else { 0.0 };
        let omega = 2.0 * core::f32::consts::PI * self.frequency_hz;
        let d = 2.0 * mass * self.damping_ratio * omega;
        let k = mass * omega * omega;

        let h = data.step.dt;
        self.gamma = h * (d + h * k);
        self.gamma = if self.gamma != 0.0 { 1.0 / self.gamma } else { 0.0 };
        self.beta = h * k * self.gamma;

        self.r_b = q_b.apply(self.local_anchor_b - self.prep_b.local_center);

        let k11 = m_b + i_b * self.r_b.y * self.r_b.y + self.gamma;
        let k12 = -i_b * self.r_b.x * self.r_b.y;
        let k22 = m_b + i_b * self.r_b.x * self.r_b.x + self.gamma;
        // Effective mass is the inverse of this K
        self.mass = Mat22::new(Vec2::new(k11, k12), Vec2::new(k12, k22)).inverse();

        self.c = (c_b + self.r_b - self.target) * self.beta;

        // Extra rotational damping keeps the drag from spinning the body
        data.velocities[ib].w *= 0.98;

        if data.step.warm_starting {
            self.impulse *= data.step.dt_ratio;
            data.velocities[ib].v += self.impulse * m_b;
            data.velocities[ib].w += i_b * self.r_b.cross(self.impulse);
        } else {
            self.impulse = Vec2::ZERO;
        }
    }

    fn solve_velocity_constraints(&mut self, data: &mut SolverData<'_>) {
        let ib = self.prep_b.index;
        let m_b = self.prep_b.inv_mass;
        let i_b = self.prep_b.inv_i;

        let mut v_b = data.velocities[ib].v;
        let mut w_b = data.velocities[ib].w;

        let cdot = v_b + Vec2::cross_sv(w_b, self.r_b);
        let mut impulse = self
            .mass
            .mul_vec2(-(cdot + self.c + self.impulse * self.gamma));

        // Budget the total impulse by the maximum force
        let old_impulse = self.impulse;
        self.impulse += impulse;
        let max_impulse = data.step.dt * self.max_force;
        if self.impulse.length_squared() > max_impulse * max_impulse {
            self.impulse = self.impulse * (max_impulse / self.impulse.length());
        }
        impulse = self.impulse - old_impulse;

        v_b += impulse * m_b;
        w_b += i_b * self.r_b.cross(impulse);

        data.velocities[ib] = Velocity { v: v_b, w: w_b };
    }

    fn solve_position_constraints(&mut self, _data: &mut SolverData<'_>) -> bool {
        // Soft constraint only; nothing to correct
        true
    }

    fn reaction_force(&self, inv_dt: f32) -> Vec2 {
        self.impulse * inv_dt
    }

    fn reaction_torque(&self, _inv_dt: f32) -> f32 {
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_revolute_pins_relative_motion() {
        // Body 1 hangs from static body 0; anchor at body 1's top edge
        let mut def = RevoluteJointDef::new(BodyHandle(0), BodyHandle(1));
        def.local_anchor_a = Vec2::new(0.0, -0.5);
        def.local_anchor_b = Vec2::new(0.0, 0.5);
        let mut joint = RevoluteJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![
            Position { c: Vec2::ZERO, a: 0.0 },
            Position {
                c: Vec2::new(0.0, -1.0),
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
        for _ in 0..8 {
            joint.solve_velocity_constraints(&mut data);
        }

        // The anchor point on B must not translate relative to A; only
        // pendulum swing (rotation about the anchor) survives
        let anchor_vel = data.velocities[1].v
            + Vec2::cross_sv(data.velocities[1].w, Vec2::new(0.0, 0.5));
        assert!(
            anchor_vel.length() < 1e-3,
            "Anchor velocity must vanish, got {:?}",
            anchor_vel
        );
    }

    #[test]
    fn test_revolute_motor_drives_spin() {
        let mut def = RevoluteJointDef::new(BodyHandle(0), BodyHandle(1));
        def.enable_motor = true;
        def.motor_speed = 2.0;
        def.max_motor_torque = 100.0;
        let mut joint = RevoluteJoint::new(&def);
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
            (data.velocities[1].w - 2.0).abs() < 1e-3,
            "Motor should reach target speed, got {}",
            data.velocities[1].w
        );
    }

    #[test]
    fn test_revolute_limit_blocks_rotation() {
        let mut def = RevoluteJointDef::new(BodyHandle(0), BodyHandle(1));
        def.enable_limit = true;
        def.lower_angle = -0.1;
        def.upper_angle = 0.1;
        let mut joint = RevoluteJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        // Already at the upper limit and spinning further into it
        let mut positions = vec![
            Position::default(),
            Position {
                c: Vec2::ZERO,
                a: 0.1,
            },
        ];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::ZERO,
                w: 5.0,
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
            data.velocities[1].w < 0.05,
            "Upper limit must stop the spin, got w={}",
            data.velocities[1].w
        );
    }

    #[test]
    fn test_prismatic_restricts_to_axis() {
        // Horizontal slider: vertical velocity must be removed
        let def = PrismaticJointDef::new(BodyHandle(0), BodyHandle(1), Vec2::new(1.0, 0.0));
        let mut joint = PrismaticJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        let mut positions = vec![Position::default(), Position::default()];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(3.0, 2.0),
                w: 1.0,
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
            data.velocities[1].v.y.abs() < 1e-3,
            "Off-axis velocity must be removed, got {}",
            data.velocities[1].v.y
        );
        assert!(
            data.velocities[1].w.abs() < 1e-3,
            "Slider locks rotation, got w={}",
            data.velocities[1].w
        );
        assert!(
            (data.velocities[1].v.x - 3.0).abs() < 1e-3,
            "On-axis velocity must be untouched, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_distance_rigid_stops_stretch() {
        let mut def = DistanceJointDef::new(BodyHandle(0), BodyHandle(1), 2.0);
        def.local_anchor_a = Vec2::ZERO;
        def.local_anchor_b = Vec2::ZERO;
        let mut joint = DistanceJoint::new(&def);
        joint.prep_a = static_data(0);
        joint.prep_b = unit_data(1);

        // At rest length, moving straight away
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
                v: Vec2::new(4.0, 0.0),
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
            "Radial velocity must vanish on a rigid rod, got {}",
            data.velocities[1].v.x
        );
    }

    #[test]
    fn test_distance_spring_is_softer_than_rod() {
        let run = |frequency: f32| {
            let mut def = DistanceJointDef::new(BodyHandle(0), BodyHandle(1), 2.0);
            def.frequency_hz = frequency;
            def.damping_ratio = 0.5;
            let mut joint = DistanceJoint::new(&def);
            joint.prep_a = static_data(0);
            joint.prep_b = unit_data(1);

            // Stretched past rest length
            let mut positions = vec![
                Position::default(),
                Position {
                    c: Vec2::new(3.0, 0.0),
                    a: 0.0,
                },
            ];
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
            data.velocities[1].v.x
        };

        let soft = run(1.0);
        let stiff = run(30.0);
        assert!(soft < 0.0 && stiff < 0.0, "Both springs pull back");
        assert!(
            stiff < soft,
            "Higher frequency pulls harder: stiff={stiff}, soft={soft}"
        );
    }

    #[test]
    fn test_mouse_joint_pulls_toward_target() {
        let mut def = MouseJointDef::new(BodyHandle(0), BodyHandle(1), Vec2::new(5.0, 0.0), Vec2::ZERO);
        def.max_force = 1000.0;
        let mut joint = MouseJoint::new(&def);
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
            data.velocities[1].v.x > 0.0,
            "Body must accelerate toward the target"
        );
        assert!(
            joint.solve_position_constraints(&mut data),
            "Mouse joint never blocks position convergence"
        );
    }

    #[test]
    fn test_joint_enum_dispatch() {
        let def = JointDef::Distance(DistanceJointDef::new(BodyHandle(3), BodyHandle(7), 1.0));
        let joint = Joint::from_def(&def);
        assert_eq!(joint.body_a(), BodyHandle(3));
        assert_eq!(joint.body_b(), BodyHandle(7));
        assert!(!joint.collide_connected());
    }
}
