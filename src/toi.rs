//! Time of Impact
//!
//! Conservative advancement: repeatedly compute the closest distance
//! between two swept shapes, build a separation function on the closest
//! features, and advance time until the separation drops to the target
//! (surface contact plus slop) or the interval is exhausted.
//!
//! Never commits to times beyond the first potential contact, so
//! fast-moving bodies cannot tunnel through thin geometry.
//!
//! Author: Moroya Sakamoto

use crate::distance::{distance, DistanceInput, SimplexCache};
use crate::math::{Sweep, Transform, Vec2};
use crate::settings::{LINEAR_SLOP, MAX_TOI_ITERATIONS, MAX_TOI_ROOT_ITERATIONS};
use crate::shape::DistanceProxy;

/// Input to the TOI query. Sweeps are local-center relative and must
/// share the same time interval.
#[derive(Clone, Copy, Debug)]
pub struct ToiInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub sweep_a: Sweep,
    pub sweep_b: Sweep,
    /// Fraction of the sweep interval to consider (usually 1.0)
    pub t_max: f32,
}

/// Classification of the TOI result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToiState {
    /// Solver gave up before converging; `t` is the best bound
    Unknown,
    /// Shapes overlap at t=0; no separating time exists
    Overlapped,
    /// Shapes reach the target separation at `t`
    Touching,
    /// Shapes stay separated through the whole interval
    Separated,
    /// Iteration budget exhausted mid-advance
    Failed,
}

/// Output of the TOI query.
#[derive(Clone, Copy, Debug)]
pub struct ToiOutput {
    pub state: ToiState,
    /// Normalized time of impact in `[0, t_max]`
    pub t: f32,
    /// Outer iterations used (instrumentation)
    pub iterations: usize,
}

// ============================================================================
// Separation function
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SeparationType {
    /// Closest features are vertices on both shapes
    Points,
    /// Closest feature is a face on A
    FaceA,
    /// Closest feature is a face on B
    FaceB,
}

/// Signed separation of the witness features along a fixed axis,
/// evaluated at arbitrary sweep times.
struct SeparationFunction<'a> {
    proxy_a: &'a DistanceProxy,
    proxy_b: &'a DistanceProxy,
    sweep_a: Sweep,
    sweep_b: Sweep,
    kind: SeparationType,
    local_point: Vec2,
    axis: Vec2,
}

impl<'a> SeparationFunction<'a> {
    fn new(
        cache: &SimplexCache,
        proxy_a: &'a DistanceProxy,
        sweep_a: Sweep,
        proxy_b: &'a DistanceProxy,
        sweep_b: Sweep,
        t1: f32,
    ) -> Self {
        debug_assert!(cache.count > 0 && cache.count < 3);

        let xf_a = sweep_a.transform_at(t1);
        let xf_b = sweep_b.transform_at(t1);

        if cache.count == 1 {
            // Vertex-vertex
            let local_point_a = proxy_a.vertex(cache.index_a[0] as usize);
            let local_point_b = proxy_b.vertex(cache.index_b[0] as usize);
            let point_a = xf_a.mul_vec2(local_point_a);
            let point_b = xf_b.mul_vec2(local_point_b);
            let mut axis = point_b - point_a;
            axis.normalize_and_length();
            Self {
                proxy_a,
                proxy_b,
                sweep_a,
                sweep_b,
                kind: SeparationType::Points,
                local_point: Vec2::ZERO,
                axis,
            }
        } else if cache.index_a[0] == cache.index_a[1] {
            // Two witness points on B: face on B
            let local_point_b1 = proxy_b.vertex(cache.index_b[0] as usize);
            let local_point_b2 = proxy_b.vertex(cache.index_b[1] as usize);
            let mut axis = (local_point_b2 - local_point_b1).right_perp();
            axis.normalize_and_length();
            let normal = xf_b.q.apply(axis);

            let local_point = (local_point_b1 + local_point_b2) * 0.5;
            let point_b = xf_b.mul_vec2(local_point);
            let local_point_a = proxy_a.vertex(cache.index_a[0] as usize);
            let point_a = xf_a.mul_vec2(local_point_a);

            let s = (point_a - point_b).dot(normal);
            let axis = if s < 0.0 { -axis } else { axis };
            Self {
                proxy_a,
                proxy_b,
                sweep_a,
                sweep_b,
                kind: SeparationType::FaceB,
                local_point,
                axis,
            }
        } else {
            // Face on A
            let local_point_a1 = proxy_a.vertex(cache.index_a[0] as usize);
            let local_point_a2 = proxy_a.vertex(cache.index_a[1] as usize);
            let mut axis = (local_point_a2 - local_point_a1).right_perp();
            axis.normalize_and_length();
            let normal = xf_a.q.apply(axis);

            let local_point = (local_point_a1 + local_point_a2) * 0.5;
            let point_a = xf_a.mul_vec2(local_point);
            let local_point_b = proxy_b.vertex(cache.index_b[0] as usize);
            let point_b = xf_b.mul_vec2(local_point_b);

            let s = (point_b - point_a).dot(normal);
            let axis = if s < 0.0 { -axis } else { axis };
            Self {
                proxy_a,
                proxy_b,
                sweep_a,
                sweep_b,
                kind: SeparationType::FaceA,
                local_point,
                axis,
            }
        }
    }

    /// Minimum separation over all support points at time `t`; also
    /// returns the support indices for later re-evaluation.
    fn find_min_separation(&self, t: f32) -> (f32, usize, usize) {
        let xf_a = self.sweep_a.transform_at(t);
        let xf_b = self.sweep_b.transform_at(t);

        match self.kind {
            SeparationType::Points => {
                let axis_a = xf_a.q.apply_t(self.axis);
                let axis_b = xf_b.q.apply_t(-self.axis);

                let index_a = self.proxy_a.support(axis_a);
                let index_b = self.proxy_b.support(axis_b);

                let point_a = xf_a.mul_vec2(self.proxy_a.vertex(index_a));
                let point_b = xf_b.mul_vec2(self.proxy_b.vertex(index_b));
                ((point_b - point_a).dot(self.axis), index_a, index_b)
            }
            SeparationType::FaceA => {
                let normal = xf_a.q.apply(self.axis);
                let point_a = xf_a.mul_vec2(self.local_point);

                let axis_b = xf_b.q.apply_t(-normal);
                let index_b = self.proxy_b.support(axis_b);
                let point_b = xf_b.mul_vec2(self.proxy_b.vertex(index_b));
                ((point_b - point_a).dot(normal), usize::MAX, index_b)
            }
            SeparationType::FaceB => {
                let normal = xf_b.q.apply(self.axis);
                let point_b = xf_b.mul_vec2(self.local_point);

                let axis_a = xf_a.q.apply_t(-normal);
                let index_a = self.proxy_a.support(axis_a);
                let point_a = xf_a.mul_vec2(self.proxy_a.vertex(index_a));
                ((point_a - point_b).dot(normal), index_a, usize::MAX)
            }
        }
    }

    /// Separation of a fixed witness pair at time `t`.
    fn evaluate(&self, index_a: usize, index_b: usize, t: f32) -> f32 {
        let xf_a = self.sweep_a.transform_at(t);
        let xf_b = self.sweep_b.transform_at(t);

        match self.kind {
            SeparationType::Points => {
                let point_a = xf_a.mul_vec2(self.proxy_a.vertex(index_a));
                let point_b = xf_b.mul_vec2(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(self.axis)
            }
            SeparationType::FaceA => {
                let normal = xf_a.q.apply(self.axis);
                let point_a = xf_a.mul_vec2(self.local_point);
                let point_b = xf_b.mul_vec2(self.proxy_b.vertex(index_b));
                (point_b - point_a).dot(normal)
            }
            SeparationType::FaceB => {
                let normal = xf_b.q.apply(self.axis);
                let point_b = xf_b.mul_vec2(self.local_point);
                let point_a = xf_a.mul_vec2(self.proxy_a.vertex(index_a));
                (point_a - point_b).dot(normal)
            }
        }
    }
}

// ============================================================================
// Conservative advancement
// ============================================================================

/// Compute the time of impact of two swept shapes.
#[must_use]
pub fn time_of_impact(input: &ToiInput) -> ToiOutput {
    let mut output = ToiOutput {
        state: ToiState::Unknown,
        t: input.t_max,
        iterations: 0,
    };

    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;

    let mut sweep_a = input.sweep_a;
    let mut sweep_b = input.sweep_b;
    // Large rotations make the root finder chase a moving target
    sweep_a.normalize_angle();
    sweep_b.normalize_angle();

    let t_max = input.t_max;

    let total_radius = proxy_a.radius + proxy_b.radius;
    // Target separation: surface contact with slop to spare, but never
    // negative
    let target = LINEAR_SLOP.max(total_radius - 3.0 * LINEAR_SLOP);
    let tolerance = 0.25 * LINEAR_SLOP;
    debug_assert!(target > tolerance);

    let mut t1 = 0.0f32;
    let mut cache = SimplexCache::default();

    // Outer loop: advance t1 until touching or the interval ends
    loop {
        let xf_a = sweep_a.transform_at(t1);
        let xf_b = sweep_b.transform_at(t1);

        // Core distance at t1
        let dist_input = DistanceInput {
            proxy_a: *proxy_a,
            proxy_b: *proxy_b,
            transform_a: xf_a,
            transform_b: xf_b,
            use_radii: false,
        };
        let dist = distance(&mut cache, &dist_input);

        if dist.distance <= 0.0 {
            // Cores overlap
            output.state = ToiState::Overlapped;
            output.t = 0.0;
            break;
        }

        if dist.distance < target + tolerance {
            output.state = ToiState::Touching;
            output.t = t1;
            break;
        }

        let sep = SeparationFunction::new(&cache, proxy_a, sweep_a, proxy_b, sweep_b, t1);

        // Inner loop: resolve the deepest support pair at t2, pulling t2
        // down from t_max
        let mut done = false;
        let mut t2 = t_max;
        let mut push_back_iterations = 0;
        loop {
            let (mut s2, index_a, index_b) = sep.find_min_separation(t2);

            if s2 > target + tolerance {
                // Separated over the whole remaining interval
                output.state = ToiState::Separated;
                output.t = t_max;
                done = true;
                break;
            }

            if s2 > target - tolerance {
                // Advance the interval start
                t1 = t2;
                break;
            }

            let mut s1 = sep.evaluate(index_a, index_b, t1);

            if s1 < target - tolerance {
                // The interval start is already past the target; TOI
                // precision was violated upstream
                output.state = ToiState::Failed;
                output.t = t1;
                done = true;
                break;
            }

            if s1 <= target + tolerance {
                // Touching exactly at t1
                output.state = ToiState::Touching;
                output.t = t1;
                done = true;
                break;
            }

            // Root find on [t1, t2]: mixed secant/bisection
            let mut root_iters = 0;
            let mut a1 = t1;
            let mut a2 = t2;
            loop {
                let t = if root_iters & 1 == 1 {
                    // Secant
                    a1 + (target - s1) * (a2 - a1) / (s2 - s1)
                } else {
                    // Bisection
                    0.5 * (a1 + a2)
                };
                root_iters += 1;

                let s = sep.evaluate(index_a, index_b, t);

                if (s - target).abs() < tolerance {
                    t2 = t;
                    break;
                }

                if s > target {
                    a1 = t;
                    s1 = s;
                } else {
                    a2 = t;
                    s2 = s;
                }

                if root_iters >= MAX_TOI_ROOT_ITERATIONS {
                    t2 = t;
                    break;
                }
            }

            push_back_iterations += 1;
            if push_back_iterations >= crate::settings::MAX_POLYGON_VERTICES {
                break;
            }
        }

        output.iterations += 1;
        if done {
            break;
        }

        if output.iterations >= MAX_TOI_ITERATIONS {
            // Root finder got stuck; report the best bound found
            output.state = ToiState::Failed;
            output.t = t1;
            break;
        }
    }

    output
}

/// Convenience: evaluate both transforms of a sweep pair at a time.
#[must_use]
pub fn transforms_at(sweep_a: &Sweep, sweep_b: &Sweep, t: f32) -> (Transform, Transform) {
    (sweep_a.transform_at(t), sweep_b.transform_at(t))
}

// ============================================================================
// Tests
// ============================================================================
