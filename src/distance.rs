//! GJK Closest-Distance Query
//!
//! Computes the distance between two convex shapes using the
//! Gilbert-Johnson-Keerthi algorithm on the Minkowski difference, with a
//! simplex cache for temporal coherence across frames.
//!
//! # Features
//!
//! - **Simplex cache**: warm-starts the search from last frame's simplex,
//!   usually converging in one or two iterations
//! - **Barycentric solver**: closed-form closest point on a 1/2/3-simplex
//! - **Radius peeling**: optionally subtracts shape radii from the core
//!   distance so rounded shapes report surface distance
//!
//! Author: Moroya Sakamoto

use crate::math::{Transform, Vec2};
use crate::settings::{LINEAR_SLOP, MAX_DISTANCE_ITERATIONS};
use crate::shape::DistanceProxy;

/// Warm-start data carried between distance calls for one shape pair.
#[derive(Clone, Copy, Debug)]
pub struct SimplexCache {
    /// Length/area metric of the cached simplex, used to detect collapse
    pub metric: f32,
    /// Number of cached support points (0 = cold)
    pub count: usize,
    /// Support vertex indices on proxy A
    pub index_a: [u8; 3],
    /// Support vertex indices on proxy B
    pub index_b: [u8; 3],
}

impl Default for SimplexCache {
    fn default() -> Self {
        Self {
            metric: 0.0,
            count: 0,
            index_a: [0; 3],
            index_b: [0; 3],
        }
    }
}

/// Input to the distance query.
#[derive(Clone, Copy, Debug)]
pub struct DistanceInput {
    pub proxy_a: DistanceProxy,
    pub proxy_b: DistanceProxy,
    pub transform_a: Transform,
    pub transform_b: Transform,
    /// Subtract shape radii from the core distance
    pub use_radii: bool,
}

/// Output of the distance query.
#[derive(Clone, Copy, Debug)]
pub struct DistanceOutput {
    /// Closest point on shape A, world coordinates
    pub point_a: Vec2,
    /// Closest point on shape B, world coordinates
    pub point_b: Vec2,
    pub distance: f32,
    /// GJK iterations used (instrumentation)
    pub iterations: usize,
}

/// One vertex of the simplex on the Minkowski difference.
#[derive(Clone, Copy, Debug, Default)]
struct SimplexVertex {
    /// Support on A, world
    wa: Vec2,
    /// Support on B, world
    wb: Vec2,
    /// wb - wa
    w: Vec2,
    /// Barycentric weight
    a: f32,
    index_a: usize,
    index_b: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct Simplex {
    v: [SimplexVertex; 3],
    count: usize,
}

impl Simplex {
    fn read_cache(
        cache: &SimplexCache,
        proxy_a: &DistanceProxy,
        xf_a: &Transform,
        proxy_b: &DistanceProxy,
        xf_b: &Transform,
    ) -> Self {
        let mut s = Simplex::default();
        s.count = cache.count;

        for i in 0..s.count {
            let ia = cache.index_a[i] as usize;
            let ib = cache.index_b[i] as usize;
            let wa = xf_a.mul_vec2(proxy_a.vertex(ia.min(proxy_a.count() - 1)));
            let wb = xf_b.mul_vec2(proxy_b.vertex(ib.min(proxy_b.count() - 1)));
            s.v[i] = SimplexVertex {
                wa,
                wb,
                w: wb - wa,
                a: 0.0,
                index_a: ia,
                index_b: ib,
            };
        }

        // Reject a stale cache whose metric changed too much (the shapes
        // were modified between calls)
        if s.count > 1 {
            let metric1 = cache.metric;
            let metric2 = s.metric();
            if metric2 < 0.5 * metric1 || 2.0 * metric1 < metric2 || metric2 < f32::EPSILON {
                s.count = 0;
            }
        }

        if s.count == 0 {
            let wa = xf_a.mul_vec2(proxy_a.vertex(0));
            let wb = xf_b.mul_vec2(proxy_b.vertex(0));
            s.v[0] = SimplexVertex {
                wa,
                wb,
                w: wb - wa,
                a: 1.0,
                index_a: 0,
                index_b: 0,
            };
            s.count = 1;
        }
        s
    }

    fn write_cache(&self, cache: &mut SimplexCache) {
        cache.metric = self.metric();
        cache.count = self.count;
        for i in 0..self.count {
            cache.index_a[i] = self.v[i].index_a as u8;
            cache.index_b[i] = self.v[i].index_b as u8;
        }
    }

    fn metric(&self) -> f32 {
        match self.count {
            1 => 0.0,
            2 => (self.v[1].w - self.v[0].w).length(),
            3 => (self.v[1].w - self.v[0].w).cross(self.v[2].w - self.v[0].w),
            _ => 0.0,
        }
    }

    /// Direction from the simplex toward the origin.
    fn search_direction(&self) -> Vec2 {
        match self.count {
            1 => -self.v[0].w,
            2 => {
                let e = self.v[1].w - self.v[0].w;
                let sgn = e.cross(-self.v[0].w);
                if sgn > 0.0 {
                    // Origin is left of e
                    Vec2::new(-e.y, e.x)
                } else {
                    Vec2::new(e.y, -e.x)
                }
            }
            _ => Vec2::ZERO,
        }
    }

    /// Closest point on the simplex to the origin.
    fn closest_point(&self) -> Vec2 {
        match self.count {
            1 => self.v[0].w,
            2 => self.v[0].w * self.v[0].a + self.v[1].w * self.v[1].a,
            // Origin enclosed
            _ => Vec2::ZERO,
        }
    }

    fn witness_points(&self) -> (Vec2, Vec2) {
        match self.count {
            1 => (self.v[0].wa, self.v[0].wb),
            2 => (
                self.v[0].wa * self.v[0].a + self.v[1].wa * self.v[1].a,
                self.v[0].wb * self.v[0].a + self.v[1].wb * self.v[1].a,
            ),
            _ => {
                let p = self.v[0].wa * self.v[0].a
                    + self.v[1].wa * self.v[1].a
                    + self.v[2].wa * self.v[2].a;
                (p, p)
            }
        }
    }

    /// Closest point on a segment to the origin, expressed with
    /// barycentric coordinates. Drops the vertex that does not
    /// contribute.
    fn solve2(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let e12 = w2 - w1;

        let d12_2 = -w1.dot(e12);
        if d12_2 <= 0.0 {
            // Region w1
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }
        let d12_1 = w2.dot(e12);
        if d12_1 <= 0.0 {
            // Region w2
            self.v[1].a = 1.0;
            self.v[0] = self.v[1];
            self.count = 1;
            return;
        }
        // Interior
        let inv = 1.0 / (d12_1 + d12_2);
        self.v[0].a = d12_1 * inv;
        self.v[1].a = d12_2 * inv;
        self.count = 2;
    }

    /// Closest point on a triangle to the origin; keeps the supporting
    /// feature (vertex, edge, or the full triangle when the origin is
    /// inside).
    fn solve3(&mut self) {
        let w1 = self.v[0].w;
        let w2 = self.v[1].w;
        let w3 = self.v[2].w;

        let e12 = w2 - w1;
        let d12_1 = w2.dot(e12);
        let d12_2 = -w1.dot(e12);

        let e13 = w3 - w1;
        let d13_1 = w3.dot(e13);
        let d13_2 = -w1.dot(e13);

        let e23 = w3 - w2;
        let d23_1 = w3.dot(e23);
        let d23_2 = -w2.dot(e23);

        let n123 = e12.cross(e13);
        let d123_1 = n123 * w2.cross(w3);
        let d123_2 = n123 * w3.cross(w1);
        let d123_3 = n123 * w1.cross(w2);

        // Vertex regions
        if d12_2 <= 0.0 && d13_2 <= 0.0 {
            self.v[0].a = 1.0;
            self.count = 1;
            return;
        }
        if d12_1 <= 0.0 && d23_2 <= 0.0 {
            self.v[1].a = 1.0;
            self.v[0] = self.v[1];
            self.count = 1;
            return;
        }
        if d13_1 <= 0.0 && d23_1 <= 0.0 {
            self.v[2].a = 1.0;
            self.v[0] = self.v[2];
            self.count = 1;
            return;
        }

        // Edge regions
        if d12_1 > 0.0 && d12_2 > 0.0 && d123_3 <= 0.0 {
            let inv = 1.0 / (d12_1 + d12_2);
            self.v[0].a = d12_1 * inv;
            self.v[1].a = d12_2 * inv;
            self.count = 2;
            return;
        }
        if d13_1 > 0.0 && d13_2 > 0.0 && d123_2 <= 0.0 {
            let inv = 1.0 / (d13_1 + d13_2);
            self.v[0].a = d13_1 * inv;
            self.v[2].a = d13_2 * inv;
            self.v[1] = self.v[2];
            self.count = 2;
            return;
        }
        if d23_1 > 0.0 && d23_2 > 0.0 && d123_1 <= 0.0 {
            let inv = 1.0 / (d23_1 + d23_2);
            self.v[1].a = d23_1 * inv;
            self.v[2].a = d23_2 * inv;
            self.v[0] = self.v[2];
            self.count = 2;
            return;
        }

        // Interior: origin enclosed
        let inv = 1.0 / (d123_1 + d123_2 + d123_3);
        self.v[0].a = d123_1 * inv;
        self.v[1].a = d123_2 * inv;
        self.v[2].a = d123_3 * inv;
        self.count = 3;
    }
}

/// Compute the closest distance between two convex shapes. The cache is
/// read for warm starting and written back with the final simplex.
pub fn distance(cache: &mut SimplexCache, input: &DistanceInput) -> DistanceOutput {
    let proxy_a = &input.proxy_a;
    let proxy_b = &input.proxy_b;
    let xf_a = input.transform_a;
    let xf_b = input.transform_b;

    let mut simplex = Simplex::read_cache(cache, proxy_a, &xf_a, proxy_b, &xf_b);

    let mut iterations = 0;
    // Support indices already in the simplex, used to detect cycling
    let mut save_a = [0usize; 3];
    let mut save_b = [0usize; 3];

    while iterations < MAX_DISTANCE_ITERATIONS {
        let save_count = simplex.count;
        for i in 0..save_count {
            save_a[i] = simplex.v[i].index_a;
            save_b[i] = simplex.v[i].index_b;
        }

        match simplex.count {
            2 => simplex.solve2(),
            3 => simplex.solve3(),
            _ => {}
        }

        // Origin enclosed: the shapes overlap
        if simplex.count == 3 {
            break;
        }

        let d = simplex.search_direction();
        if d.length_squared() < f32::EPSILON * f32::EPSILON {
            // The origin is on a simplex feature. Overlap is marginal
            // rather than certain; witness points are still usable.
            break;
        }

        // New support point on the Minkowski difference
        let ia = proxy_a.support(xf_a.q.apply_t(-d));
        let ib = proxy_b.support(xf_b.q.apply_t(d));
        let wa = xf_a.mul_vec2(proxy_a.vertex(ia));
        let wb = xf_b.mul_vec2(proxy_b.vertex(ib));

        iterations += 1;

        // Main termination: the support point is already in the simplex
        let mut duplicate = false;
        for i in 0..save_count {
            if ia == save_a[i] && ib == save_b[i] {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            break;
        }

        let v = &mut simplex.v[simplex.count];
        *v = SimplexVertex {
            wa,
            wb,
            w: wb - wa,
            a: 0.0,
            index_a: ia,
            index_b: ib,
        };
        simplex.count += 1;
    }

    simplex.write_cache(cache);

    let (mut point_a, mut point_b) = simplex.witness_points();
    let mut dist = simplex.closest_point().length();
    if simplex.count == 3 {
        dist = 0.0;
    }

    if input.use_radii {
        let ra = proxy_a.radius;
        let rb = proxy_b.radius;
        if dist > ra + rb && dist > f32::EPSILON {
            // Shapes still separated: move witnesses to the surfaces
            dist -= ra + rb;
            let mut normal = point_b - point_a;
            normal.normalize_and_length();
            point_a += normal * ra;
            point_b -= normal * rb;
        } else {
            // Cores overlap once radii are counted: collapse witnesses to
            // the midpoint
            let p = (point_a + point_b) * 0.5;
            point_a = p;
            point_b = p;
            dist = 0.0;
        }
    }

    DistanceOutput {
        point_a,
        point_b,
        distance: dist,
        iterations,
    }
}

/// True when the shapes are closer than a slop-scaled tolerance.
#[must_use]
pub fn test_overlap(
    proxy_a: &DistanceProxy,
    proxy_b: &DistanceProxy,
    xf_a: &Transform,
    xf_b: &Transform,
) -> bool {
    let input = DistanceInput {
        proxy_a: *proxy_a,
        proxy_b: *proxy_b,
        transform_a: *xf_a,
        transform_b: *xf_b,
        use_radii: true,
    };
    let mut cache = SimplexCache::default();
    let output = distance(&mut cache, &input);
    output.distance < 10.0 * f32::EPSILON.max(LINEAR_SLOP * 1e-3)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::shape::{CircleShape, PolygonShape, Shape};

    fn proxy(shape: &Shape) -> DistanceProxy {
        DistanceProxy::from_shape(shape, 0)
    }

    fn run(
        a: &Shape,
        b: &Shape,
        xf_a: Transform,
        xf_b: Transform,
        use_radii: bool,
    ) -> DistanceOutput {
        let input = DistanceInput {
            proxy_a: proxy(a),
            proxy_b: proxy(b),
            transform_a: xf_a,
            transform_b: xf_b,
            use_radii,
        };
        let mut cache = SimplexCache::default();
        distance(&mut cache, &input)
    }

    #[test]
    fn test_circle_circle_distance() {
        let a = Shape::Circle(CircleShape::new(1.0).unwrap());
        let b = Shape::Circle(CircleShape::new(1.0).unwrap());
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(5.0, 0.0), 0.0);

        let out = run(&a, &b, xf_a, xf_b, true);
        assert!(
            (out.distance - 3.0).abs() < 1e-4,
            "Centers 5 apart, radii 1+1: surface distance 3, got {}",
            out.distance
        );
        assert!((out.point_a.x - 1.0).abs() < 1e-4);
        assert!((out.point_b.x - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_box_box_distance() {
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(5.0, 0.0), 0.0);

        let out = run(&a, &b, xf_a, xf_b, false);
        assert!(
            (out.distance - 3.0).abs() < 1e-4,
            "Unit boxes 5 apart: face gap 3, got {}",
            out.distance
        );
    }

    #[test]
    fn test_overlapping_boxes_zero_distance() {
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(0.5, 0.5), 0.3);

        let out = run(&a, &b, xf_a, xf_b, false);
        assert!(
            out.distance < 1e-4,
            "Overlapping boxes must report zero distance, got {}",
            out.distance
        );
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 0.5).unwrap());
        let b = Shape::Circle(CircleShape::new(0.5).unwrap());
        let xf_a = Transform::new(Vec2::new(-1.0, 2.0), 0.4);
        let xf_b = Transform::new(Vec2::new(3.0, -1.0), 0.0);

        let ab = run(&a, &b, xf_a, xf_b, true);
        let ba = run(&b, &a, xf_b, xf_a, true);
        assert!(
            (ab.distance - ba.distance).abs() < 1e-4,
            "d(A,B)={} but d(B,A)={}",
            ab.distance,
            ba.distance
        );
    }

    #[test]
    fn test_vertex_region_closest_point() {
        // Box corner closest to a diagonal point
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let b = Shape::Circle(CircleShape::new(0.1).unwrap());
        let xf_a = Transform::IDENTITY;
        let xf_b = Transform::new(Vec2::new(4.0, 4.0), 0.0);

        let out = run(&a, &b, xf_a, xf_b, false);
        assert!((out.point_a.x - 1.0).abs() < 1e-3, "Corner x");
        assert!((out.point_a.y - 1.0).abs() < 1e-3, "Corner y");
        let expected = (2.0f32 * 9.0).sqrt(); // |(3,3)|
        assert!((out.distance - expected).abs() < 1e-3);
    }

    #[test]
    fn test_warm_cache_converges_fast() {
        let a = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let xf_a = Transform::IDENTITY;
        let mut xf_b = Transform::new(Vec2::new(5.0, 0.0), 0.0);

        let input_of = |xf_b: Transform| DistanceInput {
            proxy_a: proxy(&a),
            proxy_b: proxy(&b),
            transform_a: xf_a,
            transform_b: xf_b,
            use_radii: false,
        };

        let mut cache = SimplexCache::default();
        let cold = distance(&mut cache, &input_of(xf_b));

        // Small motion: the cached simplex should still be the answer
        xf_b.p.x += 0.01;
        let warm = distance(&mut cache, &input_of(xf_b));
        assert!(warm.iterations <= cold.iterations);
        assert!((warm.distance - (cold.distance + 0.01)).abs() < 1e-3);
    }

    #[test]
    fn test_test_overlap() {
        let a = Shape::Circle(CircleShape::new(1.0).unwrap());
        let b = Shape::Circle(CircleShape::new(1.0).unwrap());
        let close = Transform::new(Vec2::new(1.5, 0.0), 0.0);
        let far = Transform::new(Vec2::new(3.0, 0.0), 0.0);
        let id = Transform::IDENTITY;

        assert!(test_overlap(&proxy(&a), &proxy(&b), &id, &close));
        assert!(!test_overlap(&proxy(&a), &proxy(&b), &id, &far));
    }
}
