//! 2D Math Kernel
//!
//! Value-type vectors, rotations, transforms, small matrix solves, and swept
//! body state. Everything is `f32`, `Copy`, and branch-stable: zero-length
//! normalization and singular matrix solves return zero instead of NaN so a
//! simulation step always produces a usable next state.
//!
//! # Types
//!
//! - **Vec2**: 2D vector with full operator overloading
//! - **Rot**: rotation stored as (sin, cos) pair
//! - **Transform**: rotation + translation
//! - **Mat22 / Mat33**: effective-mass solves for the constraint solver
//! - **Sweep**: interpolated center/angle for continuous collision
//! - **AABB**: axis-aligned bounding box
//!
//! Author: Moroya Sakamoto

use core::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

// ============================================================================
// Vec2
// ============================================================================

/// 2D vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct Vec2 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
}

impl Vec2 {
    /// Zero vector (0, 0)
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Unit X vector (1, 0)
    pub const UNIT_X: Self = Self { x: 1.0, y: 0.0 };

    /// Unit Y vector (0, 1)
    pub const UNIT_Y: Self = Self { x: 0.0, y: 1.0 };

    /// Create a new vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared length (avoids sqrt).
    #[inline]
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Length (magnitude).
    #[inline]
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Normalize to unit length. Returns `ZERO` for near-zero vectors.
    #[inline]
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len < f32::EPSILON {
            Self::ZERO
        } else {
            self / len
        }
    }

    /// Normalize in place and return the original length.
    #[inline]
    pub fn normalize_and_length(&mut self) -> f32 {
        let len = self.length();
        if len < f32::EPSILON {
            *self = Self::ZERO;
            return 0.0;
        }
        let inv = 1.0 / len;
        self.x *= inv;
        self.y *= inv;
        len
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    /// 2D cross product (scalar): `a.x * b.y - a.y * b.x`.
    ///
    /// This is the z-component of the 3D cross product when both vectors are
    /// embedded in the XY plane.
    #[inline]
    #[must_use]
    pub fn cross(self, rhs: Self) -> f32 {
        self.x * rhs.y - self.y * rhs.x
    }

    /// Cross a scalar with this vector: `s × v = (-s * v.y, s * v.x)`.
    #[inline]
    #[must_use]
    pub fn cross_sv(s: f32, v: Self) -> Self {
        Self::new(-s * v.y, s * v.x)
    }

    /// Cross this vector with a scalar: `v × s = (s * v.y, -s * v.x)`.
    #[inline]
    #[must_use]
    pub fn cross_vs(v: Self, s: f32) -> Self {
        Self::new(s * v.y, -s * v.x)
    }

    /// Perpendicular vector, 90 degrees counter-clockwise: `(-y, x)`.
    #[inline]
    #[must_use]
    pub fn skew(self) -> Self {
        Self::new(-self.y, self.x)
    }

    /// Right perpendicular, 90 degrees clockwise: `(y, -x)`.
    #[inline]
    #[must_use]
    pub fn right_perp(self) -> Self {
        Self::new(self.y, -self.x)
    }

    /// Distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_to(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Squared distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f32 {
        (other - self).length_squared()
    }

    /// Linear interpolation: `self + (other - self) * t`.
    #[inline]
    #[must_use]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        self + (other - self) * t
    }

    /// Component-wise minimum.
    #[inline]
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        Self::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    #[inline]
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self::new(self.x.max(other.x), self.y.max(other.y))
    }

    /// Component-wise absolute value.
    #[inline]
    #[must_use]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs())
    }

    /// All components finite (not NaN/inf).
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Mul<Vec2> for f32 {
    type Output = Vec2;

    #[inline]
    fn mul(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self * rhs.x, self * rhs.y)
    }
}

impl MulAssign<f32> for Vec2 {
    #[inline]
    fn mul_assign(&mut self, rhs: f32) {
        self.x *= rhs;
        self.y *= rhs;
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;

    #[inline]
    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

// ============================================================================
// Rot
// ============================================================================

/// Rotation stored as a (sin, cos) pair.
///
/// Cheaper to apply repeatedly than recomputing trig from an angle, and
/// composable without accumulating angle wrap error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rot {
    /// Sine of the angle
    pub s: f32,
    /// Cosine of the angle
    pub c: f32,
}

impl Rot {
    /// Identity rotation (angle 0)
    pub const IDENTITY: Self = Self { s: 0.0, c: 1.0 };

    /// Create from an angle in radians.
    #[inline]
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self { s, c }
    }

    /// Angle in radians.
    #[inline]
    #[must_use]
    pub fn angle(self) -> f32 {
        self.s.atan2(self.c)
    }

    /// Local X axis `(c, s)`.
    #[inline]
    #[must_use]
    pub fn x_axis(self) -> Vec2 {
        Vec2::new(self.c, self.s)
    }

    /// Local Y axis `(-s, c)`.
    #[inline]
    #[must_use]
    pub fn y_axis(self) -> Vec2 {
        Vec2::new(-self.s, self.c)
    }

    /// Rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x - self.s * v.y, self.s * v.x + self.c * v.y)
    }

    /// Inverse-rotate a vector.
    #[inline]
    #[must_use]
    pub fn apply_t(self, v: Vec2) -> Vec2 {
        Vec2::new(self.c * v.x + self.s * v.y, -self.s * v.x + self.c * v.y)
    }

    /// Compose: `self * rhs` (apply `rhs` first, then `self`).
    #[inline]
    #[must_use]
    pub fn mul(self, rhs: Self) -> Self {
        Self {
            s: self.s * rhs.c + self.c * rhs.s,
            c: self.c * rhs.c - self.s * rhs.s,
        }
    }

    /// Compose with the inverse of `self`: `self^T * rhs`.
    #[inline]
    #[must_use]
    pub fn mul_t(self, rhs: Self) -> Self {
        Self {
            s: self.c * rhs.s - self.s * rhs.c,
            c: self.c * rhs.c + self.s * rhs.s,
        }
    }
}

impl Default for Rot {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Rigid transform: rotation followed by translation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Translation
    pub p: Vec2,
    /// Rotation
    pub q: Rot,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        p: Vec2::ZERO,
        q: Rot::IDENTITY,
    };

    /// Create from a position and an angle in radians.
    #[inline]
    #[must_use]
    pub fn new(position: Vec2, angle: f32) -> Self {
        Self {
            p: position,
            q: Rot::from_angle(angle),
        }
    }

    /// Transform a local point to world space.
    #[inline]
    #[must_use]
    pub fn mul_vec2(self, v: Vec2) -> Vec2 {
        self.q.apply(v) + self.p
    }

    /// Transform a world point to local space.
    #[inline]
    #[must_use]
    pub fn mul_t_vec2(self, v: Vec2) -> Vec2 {
        self.q.apply_t(v - self.p)
    }

    /// Compose: `self * rhs` maps rhs-local coordinates through both frames.
    #[inline]
    #[must_use]
    pub fn mul(self, rhs: Self) -> Self {
        Self {
            p: self.q.apply(rhs.p) + self.p,
            q: self.q.mul(rhs.q),
        }
    }

    /// Relative transform `self^-1 * rhs`, mapping rhs-local points into
    /// self-local space.
    #[inline]
    #[must_use]
    pub fn mul_t(self, rhs: Self) -> Self {
        Self {
            p: self.q.apply_t(rhs.p - self.p),
            q: self.q.mul_t(rhs.q),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ============================================================================
// Mat22
// ============================================================================

/// 2x2 matrix, stored as two column vectors.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat22 {
    /// First column
    pub ex: Vec2,
    /// Second column
    pub ey: Vec2,
}

impl Mat22 {
    /// Create from column vectors.
    #[inline]
    #[must_use]
    pub const fn new(ex: Vec2, ey: Vec2) -> Self {
        Self { ex, ey }
    }

    /// Multiply by a vector.
    #[inline]
    #[must_use]
    pub fn mul_vec2(self, v: Vec2) -> Vec2 {
        Vec2::new(
            self.ex.x * v.x + self.ey.x * v.y,
            self.ex.y * v.x + self.ey.y * v.y,
        )
    }

    /// Solve `A * x = b`. Returns zero for singular matrices.
    #[inline]
    #[must_use]
    pub fn solve(self, b: Vec2) -> Vec2 {
        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a21 = self.ex.y;
        let a22 = self.ey.y;
        let mut det = a11 * a22 - a12 * a21;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
    }

    /// Inverse. Returns the zero matrix for singular input.
    #[must_use]
    pub fn inverse(self) -> Self {
        let a = self.ex.x;
        let b = self.ey.x;
        let c = self.ex.y;
        let d = self.ey.y;
        let mut det = a * d - b * c;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Self {
            ex: Vec2::new(det * d, -det * c),
            ey: Vec2::new(-det * b, det * a),
        }
    }
}

// ============================================================================
// Vec3 / Mat33
// ============================================================================

/// 3D vector used only by `Mat33` solves (joint effective masses).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Create a new vector.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Cross product.
    #[inline]
    #[must_use]
    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// 3x3 matrix, stored as three column vectors.
///
/// Used by joints that couple a 2D point constraint with an angular row
/// (weld, prismatic, revolute with a locked limit).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat33 {
    /// First column
    pub ex: Vec3,
    /// Second column
    pub ey: Vec3,
    /// Third column
    pub ez: Vec3,
}

impl Mat33 {
    /// Multiply by a vector.
    #[inline]
    #[must_use]
    pub fn mul_vec3(self, v: Vec3) -> Vec3 {
        self.ex * v.x + self.ey * v.y + self.ez * v.z
    }

    /// Solve `A * x = b` for the full 3x3 system. Returns zero for singular
    /// matrices.
    #[must_use]
    pub fn solve33(self, b: Vec3) -> Vec3 {
        let mut det = self.ex.dot(self.ey.cross(self.ez));
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec3::new(
            det * b.dot(self.ey.cross(self.ez)),
            det * self.ex.dot(b.cross(self.ez)),
            det * self.ex.dot(self.ey.cross(b)),
        )
    }

    /// Solve the upper-left 2x2 block of `A * x = b`. Returns zero for
    /// singular matrices.
    #[must_use]
    pub fn solve22(self, b: Vec2) -> Vec2 {
        let a11 = self.ex.x;
        let a12 = self.ey.x;
        let a21 = self.ex.y;
        let a22 = self.ey.y;
        let mut det = a11 * a22 - a12 * a21;
        if det != 0.0 {
            det = 1.0 / det;
        }
        Vec2::new(det * (a22 * b.x - a12 * b.y), det * (a11 * b.y - a21 * b.x))
    }
}

// ============================================================================
// Sweep
// ============================================================================

/// Swept body motion over one step: center-of-mass positions and angles at
/// the start and end, plus the local center offset.
///
/// `alpha0` is the normalized time of the stored initial state; the TOI
/// solver advances it as bodies are moved to their time of first impact.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sweep {
    /// Local center of mass offset from the body origin
    pub local_center: Vec2,
    /// Center of mass at the start of the step
    pub c0: Vec2,
    /// Center of mass at the end of the step
    pub c: Vec2,
    /// Angle at the start of the step
    pub a0: f32,
    /// Angle at the end of the step
    pub a: f32,
    /// Normalized time of c0/a0 within the current step, in [0, 1)
    pub alpha0: f32,
}

impl Sweep {
    /// Interpolated transform at normalized time `beta` in [0, 1].
    #[must_use]
    pub fn transform_at(&self, beta: f32) -> Transform {
        let c = self.c0 * (1.0 - beta) + self.c * beta;
        let a = self.a0 * (1.0 - beta) + self.a * beta;
        let q = Rot::from_angle(a);
        Transform {
            p: c - q.apply(self.local_center),
            q,
        }
    }

    /// Advance the stored initial state to time `alpha` (`alpha0 <= alpha < 1`).
    pub fn advance(&mut self, alpha: f32) {
        debug_assert!(self.alpha0 < 1.0);
        let beta = (alpha - self.alpha0) / (1.0 - self.alpha0);
        self.c0 += (self.c - self.c0) * beta;
        self.a0 += (self.a - self.a0) * beta;
        self.alpha0 = alpha;
    }

    /// Wrap the angles to one revolution to keep trig stable over long runs.
    pub fn normalize_angle(&mut self) {
        let two_pi = 2.0 * core::f32::consts::PI;
        let d = two_pi * (self.a0 / two_pi).floor();
        self.a0 -= d;
        self.a -= d;
    }
}

// ============================================================================
// AABB
// ============================================================================

/// Axis-aligned bounding box. Invariant: `lower <= upper` componentwise.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub lower: Vec2,
    /// Maximum corner
    pub upper: Vec2,
}

impl Aabb {
    /// Create from corners.
    #[inline]
    #[must_use]
    pub const fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Bounds are ordered and finite.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let d = self.upper - self.lower;
        d.x >= 0.0 && d.y >= 0.0 && self.lower.is_valid() && self.upper.is_valid()
    }

    /// Center point.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec2 {
        (self.lower + self.upper) * 0.5
    }

    /// Half-widths.
    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec2 {
        (self.upper - self.lower) * 0.5
    }

    /// Perimeter (2D surface-area heuristic measure).
    #[inline]
    #[must_use]
    pub fn perimeter(&self) -> f32 {
        let d = self.upper - self.lower;
        2.0 * (d.x + d.y)
    }

    /// Union with another box.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            lower: self.lower.min(other.lower),
            upper: self.upper.max(other.upper),
        }
    }

    /// This box fully contains `other`.
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.lower.x <= other.lower.x
            && self.lower.y <= other.lower.y
            && other.upper.x <= self.upper.x
            && other.upper.y <= self.upper.y
    }

    /// Boxes overlap (touching counts as overlap).
    #[inline]
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        other.lower.x <= self.upper.x
            && other.lower.y <= self.upper.y
            && self.lower.x <= other.upper.x
            && self.lower.y <= other.upper.y
    }

    /// Grow by `margin` in every direction.
    #[inline]
    #[must_use]
    pub fn extend(&self, margin: f32) -> Self {
        let m = Vec2::new(margin, margin);
        Self {
            lower: self.lower - m,
            upper: self.upper + m,
        }
    }

    /// Slab test against a segment `p1 -> p1 + max_fraction * (p2 - p1)`.
    /// Returns the entry fraction if the segment hits the box.
    #[must_use]
    pub fn ray_cast(&self, p1: Vec2, p2: Vec2, max_fraction: f32) -> Option<f32> {
        let mut tmin = -f32::MAX;
        let mut tmax = f32::MAX;
        let d = p2 - p1;

        for axis in 0..2 {
            let (origin, dir, lo, hi) = if axis == 0 {
                (p1.x, d.x, self.lower.x, self.upper.x)
            } else {
                (p1.y, d.y, self.lower.y, self.upper.y)
            };

            if dir.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return None;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t1 = (lo - origin) * inv;
                let mut t2 = (hi - origin) * inv;
                if t1 > t2 {
                    core::mem::swap(&mut t1, &mut t2);
                }
                tmin = tmin.max(t1);
                tmax = tmax.min(t2);
                if tmin > tmax {
                    return None;
                }
            }
        }

        if tmin < 0.0 || tmin > max_fraction {
            return None;
        }
        Some(tmin)
    }
}

/// Clamp a scalar to `[lo, hi]`.
#[inline]
#[must_use]
pub fn clamp(v: f32, lo: f32, hi: f32) -> f32 {
    v.max(lo).min(hi)
}

// ============================================================================
// Tests
// ============================================================================
