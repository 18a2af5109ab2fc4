//! Collision Shapes
//!
//! Circle, convex polygon, edge, and chain geometry with the operations the
//! rest of the pipeline needs: AABB computation, mass properties, point
//! tests, ray casts, and distance-proxy extraction for GJK.
//!
//! All shapes are defined in body-local space. Invalid geometry (zero
//! radius, degenerate polygons) is rejected at construction — nothing deep
//! in the solver ever validates a shape again.
//!
//! # Ghost vertices
//!
//! Edge and chain shapes carry optional neighbour ("ghost") vertices. The
//! narrow phase uses them to suppress false contacts at shared vertices of
//! adjacent segments, so bodies slide over a chain without snagging.

use crate::error::PhysicsError;
use crate::math::{clamp, Aabb, Transform, Vec2};
use crate::settings::{MAX_POLYGON_VERTICES, POLYGON_RADIUS};

// ============================================================================
// Common Types
// ============================================================================

/// Mass, center of mass, and rotational inertia about the body origin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MassData {
    /// Total mass (kg)
    pub mass: f32,
    /// Center of mass in local coordinates
    pub center: Vec2,
    /// Rotational inertia about the local origin (kg·m²)
    pub inertia: f32,
}

/// Ray cast input: a segment from `p1` toward `p2`, truncated by
/// `max_fraction`.
#[derive(Clone, Copy, Debug)]
pub struct RayCastInput {
    /// Segment start
    pub p1: Vec2,
    /// Segment end direction point
    pub p2: Vec2,
    /// Fraction of the segment to consider, in (0, 1]
    pub max_fraction: f32,
}

/// Ray cast hit: surface normal and hit fraction along the input segment.
#[derive(Clone, Copy, Debug)]
pub struct RayCastOutput {
    /// Outward surface normal at the hit point
    pub normal: Vec2,
    /// Fraction along `p1 -> p2` of the hit
    pub fraction: f32,
}

// ============================================================================
// Circle
// ============================================================================

/// Circle shape with a local-space center offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircleShape {
    /// Center in local coordinates
    pub position: Vec2,
    /// Radius (> 0)
    pub radius: f32,
}

impl CircleShape {
    /// Create a circle at the local origin.
    pub fn new(radius: f32) -> Result<Self, PhysicsError> {
        Self::with_offset(Vec2::ZERO, radius)
    }

    /// Create a circle offset from the body origin.
    pub fn with_offset(position: Vec2, radius: f32) -> Result<Self, PhysicsError> {
        if !(radius > 0.0 && radius.is_finite()) {
            return Err(PhysicsError::InvalidShape {
                reason: "circle radius must be positive and finite",
            });
        }
        Ok(Self { position, radius })
    }
}

// ============================================================================
// Polygon
// ============================================================================

/// Convex polygon with up to [`MAX_POLYGON_VERTICES`] vertices in CCW order.
///
/// Vertices and outward edge normals are precomputed; the polygon also
/// carries the skin radius used by the narrow phase.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolygonShape {
    /// Vertices in counter-clockwise order
    pub vertices: [Vec2; MAX_POLYGON_VERTICES],
    /// Outward normal of edge `i -> i+1`
    pub normals: [Vec2; MAX_POLYGON_VERTICES],
    /// Area centroid in local coordinates
    pub centroid: Vec2,
    /// Number of valid vertices (3..=MAX_POLYGON_VERTICES)
    pub count: usize,
    /// Skin radius
    pub radius: f32,
}

impl PolygonShape {
    /// Axis-aligned box with the given half-extents, centered at the origin.
    pub fn new_box(half_width: f32, half_height: f32) -> Result<Self, PhysicsError> {
        if !(half_width > 0.0 && half_height > 0.0) {
            return Err(PhysicsError::InvalidShape {
                reason: "box half-extents must be positive",
            });
        }
        let hx = half_width;
        let hy = half_height;
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        vertices[0] = Vec2::new(-hx, -hy);
        vertices[1] = Vec2::new(hx, -hy);
        vertices[2] = Vec2::new(hx, hy);
        vertices[3] = Vec2::new(-hx, hy);
        normals[0] = Vec2::new(0.0, -1.0);
        normals[1] = Vec2::new(1.0, 0.0);
        normals[2] = Vec2::new(0.0, 1.0);
        normals[3] = Vec2::new(-1.0, 0.0);
        Ok(Self {
            vertices,
            normals,
            centroid: Vec2::ZERO,
            count: 4,
            radius: POLYGON_RADIUS,
        })
    }

    /// Box with the given half-extents, offset and rotated in local space.
    pub fn new_box_at(
        half_width: f32,
        half_height: f32,
        center: Vec2,
        angle: f32,
    ) -> Result<Self, PhysicsError> {
        let mut poly = Self::new_box(half_width, half_height)?;
        let xf = Transform::new(center, angle);
        for i in 0..poly.count {
            poly.vertices[i] = xf.mul_vec2(poly.vertices[i]);
            poly.normals[i] = xf.q.apply(poly.normals[i]);
        }
        poly.centroid = center;
        Ok(poly)
    }

    /// Build a convex polygon from an arbitrary point cloud.
    ///
    /// Computes the convex hull (gift wrapping), welds vertices closer than
    /// half a linear slop, and rejects results with fewer than 3 unique
    /// vertices. Winding of the input does not matter.
    pub fn from_vertices(points: &[Vec2]) -> Result<Self, PhysicsError> {
        if points.len() < 3 {
            return Err(PhysicsError::InvalidShape {
                reason: "polygon needs at least 3 vertices",
            });
        }
        if points.len() > MAX_POLYGON_VERTICES {
            return Err(PhysicsError::CapacityExceeded {
                resource: "polygon vertices",
                limit: MAX_POLYGON_VERTICES,
            });
        }

        // Weld nearly-coincident points
        let weld_sq = (0.5 * crate::settings::LINEAR_SLOP).powi(2);
        let mut unique: [Vec2; MAX_POLYGON_VERTICES] = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut n = 0;
        for &p in points {
            if !p.is_valid() {
                return Err(PhysicsError::InvalidShape {
                    reason: "polygon vertex is not finite",
                });
            }
            let mut duplicate = false;
            for &q in unique.iter().take(n) {
                if p.distance_squared(q) < weld_sq {
                    duplicate = true;
                    break;
                }
            }
            if !duplicate {
                unique[n] = p;
                n += 1;
            }
        }
        if n < 3 {
            return Err(PhysicsError::InvalidShape {
                reason: "polygon vertices are degenerate (coincident)",
            });
        }

        // Gift-wrap hull starting from the rightmost point
        let mut start = 0;
        for i in 1..n {
            if unique[i].x > unique[start].x
                || (unique[i].x == unique[start].x && unique[i].y < unique[start].y)
            {
                start = i;
            }
        }

        let mut hull = [0usize; MAX_POLYGON_VERTICES];
        let mut hull_count = 0;
        let mut index = start;
        loop {
            hull[hull_count] = index;
            hull_count += 1;

            let mut next = (index + 1) % n;
            for i in 0..n {
                if i == index {
                    continue;
                }
                let r = unique[next] - unique[index];
                let v = unique[i] - unique[index];
                let c = r.cross(v);
                // Take the most counter-clockwise candidate; break length
                // ties with the farther point
                if c < 0.0 || (c == 0.0 && v.length_squared() > r.length_squared()) {
                    next = i;
                }
            }

            index = next;
            if index == start || hull_count == MAX_POLYGON_VERTICES {
                break;
            }
        }
        if hull_count < 3 {
            return Err(PhysicsError::InvalidShape {
                reason: "polygon vertices are collinear",
            });
        }

        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let mut normals = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        for i in 0..hull_count {
            vertices[i] = unique[hull[i]];
        }
        for i in 0..hull_count {
            let edge = vertices[(i + 1) % hull_count] - vertices[i];
            if edge.length_squared() < f32::EPSILON * f32::EPSILON {
                return Err(PhysicsError::InvalidShape {
                    reason: "polygon has a zero-length edge",
                });
            }
            normals[i] = edge.right_perp().normalize();
        }

        let centroid = compute_centroid(&vertices[..hull_count]);
        Ok(Self {
            vertices,
            normals,
            centroid,
            count: hull_count,
            radius: POLYGON_RADIUS,
        })
    }

    /// Valid vertex slice.
    #[inline]
    #[must_use]
    pub fn verts(&self) -> &[Vec2] {
        &self.vertices[..self.count]
    }
}

/// Area centroid of a convex polygon.
fn compute_centroid(verts: &[Vec2]) -> Vec2 {
    let n = verts.len();
    let mut c = Vec2::ZERO;
    let mut area = 0.0;
    // Triangulate about the first vertex
    let origin = verts[0];
    let third = 1.0 / 3.0;
    for i in 1..n - 1 {
        let e1 = verts[i] - origin;
        let e2 = verts[i + 1] - origin;
        let a = 0.5 * e1.cross(e2);
        area += a;
        c += (e1 + e2) * (a * third);
    }
    if area.abs() > f32::EPSILON {
        c = c * (1.0 / area) + origin;
    } else {
        c = origin;
    }
    c
}

// ============================================================================
// Edge
// ============================================================================

/// Line segment shape with optional ghost vertices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeShape {
    /// Segment start
    pub vertex1: Vec2,
    /// Segment end
    pub vertex2: Vec2,
    /// Ghost vertex preceding `vertex1` on the connected chain
    pub ghost1: Option<Vec2>,
    /// Ghost vertex following `vertex2` on the connected chain
    pub ghost2: Option<Vec2>,
    /// Skin radius
    pub radius: f32,
}

impl EdgeShape {
    /// Create an isolated two-sided edge.
    pub fn new(v1: Vec2, v2: Vec2) -> Result<Self, PhysicsError> {
        if v1.distance_squared(v2) < f32::EPSILON {
            return Err(PhysicsError::InvalidShape {
                reason: "edge vertices are coincident",
            });
        }
        Ok(Self {
            vertex1: v1,
            vertex2: v2,
            ghost1: None,
            ghost2: None,
            radius: POLYGON_RADIUS,
        })
    }

    /// Create an edge with chain neighbours for one-sided collision.
    pub fn with_ghosts(
        v1: Vec2,
        v2: Vec2,
        ghost1: Option<Vec2>,
        ghost2: Option<Vec2>,
    ) -> Result<Self, PhysicsError> {
        let mut e = Self::new(v1, v2)?;
        e.ghost1 = ghost1;
        e.ghost2 = ghost2;
        Ok(e)
    }
}

// ============================================================================
// Chain
// ============================================================================

/// Polyline shape: one edge child per segment, with ghost vertices derived
/// from segment adjacency. Chains are static terrain; they have no mass.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainShape {
    /// Chain vertices (at least 2 for an open chain, 3 for a loop)
    pub vertices: Vec<Vec2>,
    /// Closed loop: an implicit segment connects last back to first
    pub is_loop: bool,
    /// Skin radius
    pub radius: f32,
}

impl ChainShape {
    /// Open chain through the given vertices.
    pub fn new_chain(vertices: &[Vec2]) -> Result<Self, PhysicsError> {
        if vertices.len() < 2 {
            return Err(PhysicsError::InvalidShape {
                reason: "chain needs at least 2 vertices",
            });
        }
        Self::validate_spacing(vertices)?;
        Ok(Self {
            vertices: vertices.to_vec(),
            is_loop: false,
            radius: POLYGON_RADIUS,
        })
    }

    /// Closed loop through the given vertices.
    pub fn new_loop(vertices: &[Vec2]) -> Result<Self, PhysicsError> {
        if vertices.len() < 3 {
            return Err(PhysicsError::InvalidShape {
                reason: "chain loop needs at least 3 vertices",
            });
        }
        Self::validate_spacing(vertices)?;
        Ok(Self {
            vertices: vertices.to_vec(),
            is_loop: true,
            radius: POLYGON_RADIUS,
        })
    }

    fn validate_spacing(vertices: &[Vec2]) -> Result<(), PhysicsError> {
        let min_sq = (0.5 * crate::settings::LINEAR_SLOP).powi(2);
        for w in vertices.windows(2) {
            if w[0].distance_squared(w[1]) < min_sq {
                return Err(PhysicsError::InvalidShape {
                    reason: "chain vertices are too close together",
                });
            }
        }
        Ok(())
    }

    /// Number of edge children.
    #[inline]
    #[must_use]
    pub fn child_count(&self) -> usize {
        if self.is_loop {
            self.vertices.len()
        } else {
            self.vertices.len() - 1
        }
    }

    /// Edge child `index`, with ghost vertices filled in from the
    /// neighbouring segments.
    #[must_use]
    pub fn child_edge(&self, index: usize) -> EdgeShape {
        let n = self.vertices.len();
        debug_assert!(index < self.child_count());
        let v1 = self.vertices[index];
        let v2 = self.vertices[(index + 1) % n];

        let ghost1 = if index > 0 {
            Some(self.vertices[index - 1])
        } else if self.is_loop {
            Some(self.vertices[n - 1])
        } else {
            None
        };
        let ghost2 = if index + 2 < n {
            Some(self.vertices[index + 2])
        } else if self.is_loop {
            Some(self.vertices[(index + 2) % n])
        } else {
            None
        };

        EdgeShape {
            vertex1: v1,
            vertex2: v2,
            ghost1,
            ghost2,
            radius: self.radius,
        }
    }
}

// ============================================================================
// Shape
// ============================================================================

/// Closed set of collision shapes. Every operation dispatches with a match;
/// there is no open-ended subclassing.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Circle
    Circle(CircleShape),
    /// Convex polygon
    Polygon(PolygonShape),
    /// Single segment
    Edge(EdgeShape),
    /// Segment chain
    Chain(ChainShape),
}

impl Shape {
    /// Number of broadphase children (chains have one per segment).
    #[must_use]
    pub fn child_count(&self) -> usize {
        match self {
            Shape::Circle(_) | Shape::Polygon(_) | Shape::Edge(_) => 1,
            Shape::Chain(chain) => chain.child_count(),
        }
    }

    /// Shape skin radius.
    #[must_use]
    pub fn radius(&self) -> f32 {
        match self {
            Shape::Circle(c) => c.radius,
            Shape::Polygon(p) => p.radius,
            Shape::Edge(e) => e.radius,
            Shape::Chain(c) => c.radius,
        }
    }

    /// Tight AABB of child `child` under `xf`.
    #[must_use]
    pub fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb {
        match self {
            Shape::Circle(c) => {
                let p = xf.mul_vec2(c.position);
                let r = Vec2::new(c.radius, c.radius);
                Aabb::new(p - r, p + r)
            }
            Shape::Polygon(p) => {
                let mut lower = xf.mul_vec2(p.vertices[0]);
                let mut upper = lower;
                for v in p.verts().iter().skip(1) {
                    let w = xf.mul_vec2(*v);
                    lower = lower.min(w);
                    upper = upper.max(w);
                }
                Aabb::new(lower, upper).extend(p.radius)
            }
            Shape::Edge(e) => {
                let v1 = xf.mul_vec2(e.vertex1);
                let v2 = xf.mul_vec2(e.vertex2);
                Aabb::new(v1.min(v2), v1.max(v2)).extend(e.radius)
            }
            Shape::Chain(chain) => {
                let e = chain.child_edge(child);
                let v1 = xf.mul_vec2(e.vertex1);
                let v2 = xf.mul_vec2(e.vertex2);
                Aabb::new(v1.min(v2), v1.max(v2)).extend(chain.radius)
            }
        }
    }

    /// Mass properties for the given density. Edges and chains are
    /// massless terrain; a zero density yields a zero-mass fixture.
    #[must_use]
    pub fn compute_mass(&self, density: f32) -> MassData {
        match self {
            Shape::Circle(c) => {
                let mass = density * core::f32::consts::PI * c.radius * c.radius;
                // Inertia about the body origin via parallel axis
                let inertia =
                    mass * (0.5 * c.radius * c.radius + c.position.dot(c.position));
                MassData {
                    mass,
                    center: c.position,
                    inertia,
                }
            }
            Shape::Polygon(p) => polygon_mass(p, density),
            Shape::Edge(e) => MassData {
                mass: 0.0,
                center: (e.vertex1 + e.vertex2) * 0.5,
                inertia: 0.0,
            },
            Shape::Chain(_) => MassData::default(),
        }
    }

    /// Point containment test in world space. Edges and chains have no
    /// interior and always return false.
    #[must_use]
    pub fn test_point(&self, xf: &Transform, point: Vec2) -> bool {
        match self {
            Shape::Circle(c) => {
                let center = xf.mul_vec2(c.position);
                point.distance_squared(center) <= c.radius * c.radius
            }
            Shape::Polygon(p) => {
                let local = xf.mul_t_vec2(point);
                for i in 0..p.count {
                    if p.normals[i].dot(local - p.vertices[i]) > 0.0 {
                        return false;
                    }
                }
                true
            }
            Shape::Edge(_) | Shape::Chain(_) => false,
        }
    }

    /// Ray cast child `child` in world space.
    #[must_use]
    pub fn ray_cast(
        &self,
        input: &RayCastInput,
        xf: &Transform,
        child: usize,
    ) -> Option<RayCastOutput> {
        match self {
            Shape::Circle(c) => ray_cast_circle(c, input, xf),
            Shape::Polygon(p) => ray_cast_polygon(p, input, xf),
            Shape::Edge(e) => ray_cast_edge(e.vertex1, e.vertex2, input, xf),
            Shape::Chain(chain) => {
                let e = chain.child_edge(child);
                ray_cast_edge(e.vertex1, e.vertex2, input, xf)
            }
        }
    }
}

fn polygon_mass(p: &PolygonShape, density: f32) -> MassData {
    let n = p.count;
    let origin = p.vertices[0];
    let third = 1.0 / 3.0;

    let mut area = 0.0;
    let mut center = Vec2::ZERO;
    let mut inertia = 0.0;

    for i in 1..n - 1 {
        let e1 = p.vertices[i] - origin;
        let e2 = p.vertices[i + 1] - origin;
        let d = e1.cross(e2);
        let tri_area = 0.5 * d;
        area += tri_area;
        center += (e1 + e2) * (tri_area * third);

        let intx2 = e1.x * e1.x + e2.x * e1.x + e2.x * e2.x;
        let inty2 = e1.y * e1.y + e2.y * e1.y + e2.y * e2.y;
        inertia += (0.25 * third * d) * (intx2 + inty2);
    }

    let mass = density * area;
    if area > f32::EPSILON {
        center = center * (1.0 / area);
    }
    let center_world = center + origin;
    // Shift inertia from the triangulation origin to the body origin
    let inertia_about_origin = density * inertia + mass * (center_world.dot(center_world) - center.dot(center));

    MassData {
        mass,
        center: center_world,
        inertia: inertia_about_origin,
    }
}

fn ray_cast_circle(
    c: &CircleShape,
    input: &RayCastInput,
    xf: &Transform,
) -> Option<RayCastOutput> {
    let center = xf.mul_vec2(c.position);
    let s = input.p1 - center;
    let b = s.length_squared() - c.radius * c.radius;

    let r = input.p2 - input.p1;
    let cc = s.dot(r);
    let rr = r.length_squared();
    let sigma = cc * cc - rr * b;

    if sigma < 0.0 || rr < f32::EPSILON {
        return None;
    }

    let t = -(cc + sigma.sqrt());
    if t >= 0.0 && t <= input.max_fraction * rr {
        let fraction = t / rr;
        let normal = (s + r * fraction).normalize();
        return Some(RayCastOutput { normal, fraction });
    }
    None
}

fn ray_cast_polygon(
    p: &PolygonShape,
    input: &RayCastInput,
    xf: &Transform,
) -> Option<RayCastOutput> {
    // Work in the polygon's local frame
    let p1 = xf.mul_t_vec2(input.p1);
    let p2 = xf.mul_t_vec2(input.p2);
    let d = p2 - p1;

    let mut lower = 0.0_f32;
    let mut upper = input.max_fraction;
    let mut index = None;

    for i in 0..p.count {
        // p = p1 + t * d; dot(normal, p - v) = 0
        let numerator = p.normals[i].dot(p.vertices[i] - p1);
        let denominator = p.normals[i].dot(d);

        if denominator == 0.0 {
            if numerator < 0.0 {
                return None;
            }
        } else {
            let t = numerator / denominator;
            if denominator < 0.0 && t > lower {
                // Entering the half-plane
                lower = t;
                index = Some(i);
            } else if denominator > 0.0 && t < upper {
                // Leaving the half-plane
                upper = t;
            }
        }
        if upper < lower {
            return None;
        }
    }

    index.map(|i| RayCastOutput {
        normal: xf.q.apply(p.normals[i]),
        fraction: lower,
    })
}

fn ray_cast_edge(
    v1: Vec2,
    v2: Vec2,
    input: &RayCastInput,
    xf: &Transform,
) -> Option<RayCastOutput> {
    // Work in the edge's local frame
    let p1 = xf.mul_t_vec2(input.p1);
    let p2 = xf.mul_t_vec2(input.p2);
    let d = p2 - p1;

    let e = v2 - v1;
    let mut normal = Vec2::new(e.y, -e.x).normalize();

    // Solve p1 + t * d = v1 + s * e
    let denominator = normal.dot(d);
    if denominator == 0.0 {
        return None;
    }

    let t = normal.dot(v1 - p1) / denominator;
    if t < 0.0 || t > input.max_fraction {
        return None;
    }

    let q = p1 + d * t;
    let rr = e.length_squared();
    if rr == 0.0 {
        return None;
    }
    let s = (q - v1).dot(e) / rr;
    if !(0.0..=1.0).contains(&s) {
        return None;
    }

    if denominator > 0.0 {
        normal = -normal;
    }
    Some(RayCastOutput {
        normal: xf.q.apply(normal),
        fraction: t,
    })
}

// ============================================================================
// Distance Proxy
// ============================================================================

/// Uniform geometry view used by GJK and TOI: a small vertex cloud plus a
/// radius. Every shape child reduces to this.
#[derive(Clone, Copy, Debug)]
pub struct DistanceProxy {
    vertices: [Vec2; MAX_POLYGON_VERTICES],
    count: usize,
    /// Shape radius around the vertex cloud
    pub radius: f32,
}

impl DistanceProxy {
    /// Extract the proxy for `child` of `shape`.
    #[must_use]
    pub fn from_shape(shape: &Shape, child: usize) -> Self {
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        match shape {
            Shape::Circle(c) => {
                vertices[0] = c.position;
                Self {
                    vertices,
                    count: 1,
                    radius: c.radius,
                }
            }
            Shape::Polygon(p) => {
                vertices[..p.count].copy_from_slice(p.verts());
                Self {
                    vertices,
                    count: p.count,
                    radius: p.radius,
                }
            }
            Shape::Edge(e) => {
                vertices[0] = e.vertex1;
                vertices[1] = e.vertex2;
                Self {
                    vertices,
                    count: 2,
                    radius: e.radius,
                }
            }
            Shape::Chain(chain) => {
                let e = chain.child_edge(child);
                vertices[0] = e.vertex1;
                vertices[1] = e.vertex2;
                Self {
                    vertices,
                    count: 2,
                    radius: chain.radius,
                }
            }
        }
    }

    /// Build directly from a vertex slice (tests, shape casting).
    #[must_use]
    pub fn from_vertices(verts: &[Vec2], radius: f32) -> Self {
        debug_assert!(!verts.is_empty() && verts.len() <= MAX_POLYGON_VERTICES);
        let mut vertices = [Vec2::ZERO; MAX_POLYGON_VERTICES];
        let count = verts.len().min(MAX_POLYGON_VERTICES);
        vertices[..count].copy_from_slice(&verts[..count]);
        Self {
            vertices,
            count,
            radius,
        }
    }

    /// Number of proxy vertices.
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }

    /// Vertex `i`.
    #[inline]
    #[must_use]
    pub fn vertex(&self, i: usize) -> Vec2 {
        self.vertices[i]
    }

    /// Index of the support vertex in direction `d`.
    #[must_use]
    pub fn support(&self, d: Vec2) -> usize {
        let mut best = 0;
        let mut best_value = self.vertices[0].dot(d);
        for i in 1..self.count {
            let value = self.vertices[i].dot(d);
            if value > best_value {
                best = i;
                best_value = value;
            }
        }
        best
    }
}

/// Clamp helper shared by segment math in the narrow phase.
#[inline]
#[must_use]
pub fn closest_point_on_segment(a: Vec2, b: Vec2, p: Vec2) -> Vec2 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq < f32::EPSILON {
        return a;
    }
    let t = clamp((p - a).dot(ab) / len_sq, 0.0, 1.0);
    a + ab * t
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_validation() {
        assert!(CircleShape::new(1.0).is_ok());
        assert!(CircleShape::new(0.0).is_err());
        assert!(CircleShape::new(-2.0).is_err());
        assert!(CircleShape::new(f32::NAN).is_err());
    }

    #[test]
    fn test_box_geometry() {
        let b = PolygonShape::new_box(2.0, 1.0).unwrap();
        assert_eq!(b.count, 4);
        assert_eq!(b.centroid, Vec2::ZERO);
        // CCW winding: successive edge cross products positive
        for i in 0..4 {
            let e1 = b.vertices[(i + 1) % 4] - b.vertices[i];
            let e2 = b.vertices[(i + 2) % 4] - b.vertices[(i + 1) % 4];
            assert!(e1.cross(e2) > 0.0, "Box winding must be CCW");
        }
    }

    #[test]
    fn test_from_vertices_hull() {
        // A square plus an interior point; the hull must drop the interior
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
            Vec2::new(1.0, 1.0),
        ];
        let p = PolygonShape::from_vertices(&pts).unwrap();
        assert_eq!(p.count, 4, "Interior point should be dropped by the hull");
        assert!((p.centroid.x - 1.0).abs() < 1e-5);
        assert!((p.centroid.y - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_from_vertices_rejects_degenerate() {
        let collinear = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
        ];
        assert!(PolygonShape::from_vertices(&collinear).is_err());

        let coincident = [Vec2::ZERO, Vec2::ZERO, Vec2::ZERO];
        assert!(PolygonShape::from_vertices(&coincident).is_err());

        assert!(PolygonShape::from_vertices(&[Vec2::ZERO]).is_err());
    }

    #[test]
    fn test_circle_mass() {
        let c = Shape::Circle(CircleShape::new(2.0).unwrap());
        let md = c.compute_mass(1.0);
        let expected = core::f32::consts::PI * 4.0;
        assert!((md.mass - expected).abs() < 1e-4);
        assert_eq!(md.center, Vec2::ZERO);
        // I = 0.5 m r^2 about the center
        assert!((md.inertia - 0.5 * expected * 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_box_mass() {
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let md = b.compute_mass(1.0);
        // 2x2 box, area 4
        assert!((md.mass - 4.0).abs() < 1e-4);
        assert!(md.center.length() < 1e-5);
        // I = m (w^2 + h^2) / 12 = 4 * 8 / 12
        assert!((md.inertia - 4.0 * 8.0 / 12.0).abs() < 1e-3);
    }

    #[test]
    fn test_zero_density_zero_mass() {
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let md = b.compute_mass(0.0);
        assert_eq!(md.mass, 0.0);
        assert_eq!(md.inertia, 0.0);
    }

    #[test]
    fn test_edge_has_no_mass() {
        let e = Shape::Edge(EdgeShape::new(Vec2::ZERO, Vec2::new(5.0, 0.0)).unwrap());
        let md = e.compute_mass(1.0);
        assert_eq!(md.mass, 0.0);
    }

    #[test]
    fn test_compute_aabb() {
        let c = Shape::Circle(CircleShape::new(1.5).unwrap());
        let xf = Transform::new(Vec2::new(10.0, 5.0), 0.0);
        let aabb = c.compute_aabb(&xf, 0);
        assert_eq!(aabb.lower, Vec2::new(8.5, 3.5));
        assert_eq!(aabb.upper, Vec2::new(11.5, 6.5));

        let b = Shape::Polygon(PolygonShape::new_box(1.0, 2.0).unwrap());
        let aabb = b.compute_aabb(&Transform::IDENTITY, 0);
        // Skin radius expands the tight box
        assert!(aabb.lower.x <= -1.0 && aabb.upper.y >= 2.0);
    }

    #[test]
    fn test_test_point() {
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let xf = Transform::IDENTITY;
        assert!(b.test_point(&xf, Vec2::ZERO));
        assert!(b.test_point(&xf, Vec2::new(0.99, 0.99)));
        assert!(!b.test_point(&xf, Vec2::new(1.5, 0.0)));

        // Rotated 45 degrees, the former corner is now outside reach on x
        let xf = Transform::new(Vec2::ZERO, core::f32::consts::FRAC_PI_4);
        assert!(!b.test_point(&xf, Vec2::new(1.2, 1.2)));

        let e = Shape::Edge(EdgeShape::new(Vec2::ZERO, Vec2::UNIT_X).unwrap());
        assert!(!e.test_point(&Transform::IDENTITY, Vec2::ZERO));
    }

    #[test]
    fn test_ray_cast_circle() {
        let c = Shape::Circle(CircleShape::new(1.0).unwrap());
        let xf = Transform::new(Vec2::new(5.0, 0.0), 0.0);
        let input = RayCastInput {
            p1: Vec2::ZERO,
            p2: Vec2::new(10.0, 0.0),
            max_fraction: 1.0,
        };
        let hit = c.ray_cast(&input, &xf, 0).expect("ray should hit circle");
        assert!((hit.fraction - 0.4).abs() < 1e-4);
        assert!((hit.normal.x + 1.0).abs() < 1e-4, "Normal faces the ray");

        // Miss
        let input = RayCastInput {
            p1: Vec2::new(0.0, 5.0),
            p2: Vec2::new(10.0, 5.0),
            max_fraction: 1.0,
        };
        assert!(c.ray_cast(&input, &xf, 0).is_none());
    }

    #[test]
    fn test_ray_cast_polygon() {
        let b = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let xf = Transform::new(Vec2::new(5.0, 0.0), 0.0);
        let input = RayCastInput {
            p1: Vec2::ZERO,
            p2: Vec2::new(10.0, 0.0),
            max_fraction: 1.0,
        };
        let hit = b.ray_cast(&input, &xf, 0).expect("ray should hit box");
        assert!((hit.fraction - 0.4).abs() < 1e-4);
        assert!((hit.normal.x + 1.0).abs() < 1e-4);

        // From inside: no surface is entered, no hit reported
        let inside = RayCastInput {
            p1: Vec2::new(5.0, 0.0),
            p2: Vec2::new(10.0, 0.0),
            max_fraction: 1.0,
        };
        assert!(b.ray_cast(&inside, &xf, 0).is_none());
    }

    #[test]
    fn test_ray_cast_edge() {
        let e = Shape::Edge(EdgeShape::new(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0)).unwrap());
        let input = RayCastInput {
            p1: Vec2::new(0.0, 2.0),
            p2: Vec2::new(0.0, -2.0),
            max_fraction: 1.0,
        };
        let hit = e
            .ray_cast(&input, &Transform::IDENTITY, 0)
            .expect("ray should hit edge");
        assert!((hit.fraction - 0.5).abs() < 1e-4);
        assert!(hit.normal.y > 0.0, "Normal faces the incoming ray");

        // Past the segment end
        let input = RayCastInput {
            p1: Vec2::new(6.0, 2.0),
            p2: Vec2::new(6.0, -2.0),
            max_fraction: 1.0,
        };
        assert!(e.ray_cast(&input, &Transform::IDENTITY, 0).is_none());
    }

    #[test]
    fn test_chain_children_and_ghosts() {
        let verts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(3.0, 1.0),
        ];
        let chain = ChainShape::new_chain(&verts).unwrap();
        assert_eq!(chain.child_count(), 3);

        let first = chain.child_edge(0);
        assert_eq!(first.ghost1, None);
        assert_eq!(first.ghost2, Some(verts[2]));

        let middle = chain.child_edge(1);
        assert_eq!(middle.ghost1, Some(verts[0]));
        assert_eq!(middle.ghost2, Some(verts[3]));

        let looped = ChainShape::new_loop(&verts).unwrap();
        assert_eq!(looped.child_count(), 4);
        let closing = looped.child_edge(3);
        assert_eq!(closing.vertex1, verts[3]);
        assert_eq!(closing.vertex2, verts[0]);
        assert_eq!(closing.ghost1, Some(verts[2]));
        assert_eq!(closing.ghost2, Some(verts[1]));
    }

    #[test]
    fn test_distance_proxy_support() {
        let b = PolygonShape::new_box(1.0, 1.0).unwrap();
        let proxy = DistanceProxy::from_shape(&Shape::Polygon(b), 0);
        assert_eq!(proxy.count(), 4);
        let i = proxy.support(Vec2::new(1.0, 1.0));
        assert_eq!(proxy.vertex(i), Vec2::new(1.0, 1.0));
        let i = proxy.support(Vec2::new(-1.0, 0.0));
        assert!((proxy.vertex(i).x + 1.0).abs() < 1e-6);
    }
}
