//! Contact Manifold Generation
//!
//! Computes up to two contact points for every supported shape pair.
//! Polygon pairs use reference/incident face clipping; circles use
//! center projection; edges clamp their normals into the arc allowed by
//! their ghost vertices so chains do not catch on internal seams.
//!
//! Manifold points are stored in the reference frame of one shape so
//! they stay valid while bodies move; [`WorldManifold`] rebuilds world
//! points and penetrations on demand.
//!
//! Author: Moroya Sakamoto

use crate::math::{Transform, Vec2};
use crate::settings::MAX_MANIFOLD_POINTS;
use crate::shape::{CircleShape, EdgeShape, PolygonShape};

// ============================================================================
// Contact IDs
// ============================================================================

/// Feature classification for one side of a contact point.
pub const FEATURE_VERTEX: u8 = 0;
/// Feature classification for one side of a contact point.
pub const FEATURE_FACE: u8 = 1;

/// Identifies which features of the two shapes produced a contact point.
/// Equal ids across frames mean "same point", which is what warm
/// starting keys on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactFeature {
    pub index_a: u8,
    pub index_b: u8,
    pub type_a: u8,
    pub type_b: u8,
}

impl ContactFeature {
    #[must_use]
    pub fn new(index_a: u8, index_b: u8, type_a: u8, type_b: u8) -> Self {
        Self {
            index_a,
            index_b,
            type_a,
            type_b,
        }
    }

    /// Swap the A/B sides, used when the shape order flips.
    #[must_use]
    pub fn flipped(self) -> Self {
        Self {
            index_a: self.index_b,
            index_b: self.index_a,
            type_a: self.type_b,
            type_b: self.type_a,
        }
    }
}

// ============================================================================
// Manifold
// ============================================================================

/// How the manifold's local data is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ManifoldType {
    /// Circle vs circle: local_point is A's center, points hold B's center
    #[default]
    Circles,
    /// local_normal/local_point are A's reference face; points live on B
    FaceA,
    /// local_normal/local_point are B's reference face; points live on A
    FaceB,
}

/// One contact point plus its accumulated impulses.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifoldPoint {
    /// Meaning depends on the manifold type (see [`ManifoldType`])
    pub local_point: Vec2,
    /// Warm-start normal impulse
    pub normal_impulse: f32,
    /// Warm-start friction impulse
    pub tangent_impulse: f32,
    /// Feature id used to match points across frames
    pub id: ContactFeature,
}

/// Up to two contact points between a pair of shapes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Manifold {
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    pub local_normal: Vec2,
    pub local_point: Vec2,
    pub kind: ManifoldType,
    pub point_count: usize,
}

/// World-space view of a manifold.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorldManifold {
    /// World normal, pointing from A to B
    pub normal: Vec2,
    /// World contact points (midway between the surfaces)
    pub points: [Vec2; MAX_MANIFOLD_POINTS],
    /// Negative separations (penetration depths)
    pub separations: [f32; MAX_MANIFOLD_POINTS],
}

impl WorldManifold {
    /// Evaluate a manifold at the given transforms and radii.
    #[must_use]
    pub fn new(
        manifold: &Manifold,
        xf_a: &Transform,
        radius_a: f32,
        xf_b: &Transform,
        radius_b: f32,
    ) -> Self {
        let mut wm = WorldManifold::default();
        if manifold.point_count == 0 {
            return wm;
        }

        match manifold.kind {
            ManifoldType::Circles => {
                wm.normal = Vec2::UNIT_X;
                let point_a = xf_a.mul_vec2(manifold.local_point);
                let point_b = xf_b.mul_vec2(manifold.points[0].local_point);
                if (point_b - point_a).length_squared() > f32::EPSILON * f32::EPSILON {
                    let mut n = point_b - point_a;
                    n.normalize_and_length();
                    wm.normal = n;
                }
                let c_a = point_a + wm.normal * radius_a;
                let c_b = point_b - wm.normal * radius_b;
                wm.points[0] = (c_a + c_b) * 0.5;
                wm.separations[0] = (c_b - c_a).dot(wm.normal);
            }
            ManifoldType::FaceA => {
                wm.normal = xf_a.q.apply(manifold.local_normal);
                let plane_point = xf_a.mul_vec2(manifold.local_point);
                for i in 0..manifold.point_count {
                    let clip_point = xf_b.mul_vec2(manifold.points[i].local_point);
                    let c_a =
                        clip_point + wm.normal * (radius_a - (clip_point - plane_point).dot(wm.normal));
                    let c_b = clip_point - wm.normal * radius_b;
                    wm.points[i] = (c_a + c_b) * 0.5;
                    wm.separations[i] = (c_b - c_a).dot(wm.normal);
                }
            }
            ManifoldType::FaceB => {
                wm.normal = xf_b.q.apply(manifold.local_normal);
                let plane_point = xf_b.mul_vec2(manifold.local_point);
                for i in 0..manifold.point_count {
                    let clip_point = xf_a.mul_vec2(manifold.points[i].local_point);
                    let c_b =
                        clip_point + wm.normal * (radius_b - (clip_point - plane_point).dot(wm.normal));
                    let c_a = clip_point - wm.normal * radius_a;
                    wm.points[i] = (c_a + c_b) * 0.5;
                    wm.separations[i] = (c_a - c_b).dot(wm.normal);
                }
                // Normal convention: from A to B
                wm.normal = -wm.normal;
            }
        }
        wm
    }
}

/// Classify how each point of `manifold2` relates to `manifold1`:
/// persisted points keep their accumulated impulses.
pub fn match_points(
    manifold1: &Manifold,
    manifold2: &mut Manifold,
) {
    for i in 0..manifold2.point_count {
        let id = manifold2.points[i].id;
        for j in 0..manifold1.point_count {
            if manifold1.points[j].id == id {
                manifold2.points[i].normal_impulse = manifold1.points[j].normal_impulse;
                manifold2.points[i].tangent_impulse = manifold1.points[j].tangent_impulse;
                break;
            }
        }
    }
}

// ============================================================================
// Clipping
// ============================================================================

/// A clip vertex: point plus the feature id that produced it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClipVertex {
    pub v: Vec2,
    pub id: ContactFeature,
}

/// Sutherland-Hodgman clip of a two-point segment against a half-plane
/// `dot(normal, v) - offset <= 0`. Returns the number of output points.
pub fn clip_segment_to_line(
    out: &mut [ClipVertex; 2],
    input: &[ClipVertex; 2],
    normal: Vec2,
    offset: f32,
    vertex_index_a: usize,
) -> usize {
    let mut count = 0;

    let distance0 = normal.dot(input[0].v) - offset;
    let distance1 = normal.dot(input[1].v) - offset;

    if distance0 <= 0.0 {
        out[count] = input[0];
        count += 1;
    }
    if distance1 <= 0.0 {
        out[count] = input[1];
        count += 1;
    }

    // The segment crosses the plane: emit the intersection
    if distance0 * distance1 < 0.0 {
        let interp = distance0 / (distance0 - distance1);
        out[count].v = input[0].v + (input[1].v - input[0].v) * interp;
        out[count].id = ContactFeature::new(
            vertex_index_a as u8,
            input[0].id.index_b,
            FEATURE_VERTEX,
            FEATURE_FACE,
        );
        count += 1;
    }

    count
}

// ============================================================================
// Circle collisions
// ============================================================================

/// Circle vs circle.
pub fn collide_circles(
    manifold: &mut Manifold,
    circle_a: &CircleShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) {
    manifold.point_count = 0;

    let p_a = xf_a.mul_vec2(circle_a.position);
    let p_b = xf_b.mul_vec2(circle_b.position);
    let d = p_b - p_a;
    let dist_sqr = d.length_squared();
    let r = circle_a.radius + circle_b.radius;
    if dist_sqr > r * r {
        return;
    }

    manifold.kind = ManifoldType::Circles;
    manifold.local_point = circle_a.position;
    manifold.local_normal = Vec2::ZERO;
    manifold.point_count = 1;
    manifold.points[0] = ManifoldPoint {
        local_point: circle_b.position,
        ..Default::default()
    };
}

/// Polygon vs circle.
pub fn collide_polygon_and_circle(
    manifold: &mut Manifold,
    polygon_a: &PolygonShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) {
    manifold.point_count = 0;

    // Circle center in the polygon's frame
    let c = xf_b.mul_vec2(circle_b.position);
    let c_local = xf_a.mul_t_vec2(c);

    let r = polygon_a.radius + circle_b.radius;
    let count = polygon_a.count;

    // Face of maximum separation
    let mut normal_index = 0;
    let mut separation = f32::MIN;
    for i in 0..count {
        let s = polygon_a.normals[i].dot(c_local - polygon_a.vertices[i]);
        if s > r {
            return;
        }
        if s > separation {
            separation = s;
            normal_index = i;
        }
    }

    let i1 = normal_index;
    let i2 = (i1 + 1) % count;
    let v1 = polygon_a.vertices[i1];
    let v2 = polygon_a.vertices[i2];

    if separation < f32::EPSILON {
        // Center inside the polygon: use the deepest face normal
        manifold.kind = ManifoldType::FaceA;
        manifold.local_normal = polygon_a.normals[i1];
        manifold.local_point = (v1 + v2) * 0.5;
    } else {
        // Voronoi regions of the face
        let u1 = (c_local - v1).dot(v2 - v1);
        let u2 = (c_local - v2).dot(v1 - v2);
        manifold.kind = ManifoldType::FaceA;
        if u1 <= 0.0 {
            if (c_local - v1).length_squared() > r * r {
                return;
            }
            let mut n = c_local - v1;
            n.normalize_and_length();
            manifold.local_normal = n;
            manifold.local_point = v1;
        } else if u2 <= 0.0 {
            if (c_local - v2).length_squared() > r * r {
                return;
            }
            let mut n = c_local - v2;
            n.normalize_and_length();
            manifold.local_normal = n;
            manifold.local_point = v2;
        } else {
            let face_center = (v1 + v2) * 0.5;
            if (c_local - face_center).dot(polygon_a.normals[i1]) > r {
                return;
            }
            manifold.local_normal = polygon_a.normals[i1];
            manifold.local_point = face_center;
        }
    }

    manifold.point_count = 1;
    manifold.points[0] = ManifoldPoint {
        local_point: circle_b.position,
        ..Default::default()
    };
}

// ============================================================================
// Polygon vs polygon
// ============================================================================

/// Maximum separation of B's vertices from A's faces, and the face index.
fn max_separation(
    poly1: &PolygonShape,
    xf1: &Transform,
    poly2: &PolygonShape,
    xf2: &Transform,
) -> (f32, usize) {
    let count1 = poly1.count;
    let count2 = poly2.count;
    // B's frame relative to A's
    let xf = xf2.mul_t(*xf1);

    let mut best_index = 0;
    let mut max_sep = f32::MIN;
    for i in 0..count1 {
        // A's face data in B's frame
        let n = xf.q.apply(poly1.normals[i]);
        let v1 = xf.mul_vec2(poly1.vertices[i]);

        // Deepest vertex of B against that face
        let mut si = f32::MAX;
        for j in 0..count2 {
            let sij = n.dot(poly2.vertices[j] - v1);
            if sij < si {
                si = sij;
            }
        }

        if si > max_sep {
            max_sep = si;
            best_index = i;
        }
    }
    (max_sep, best_index)
}

/// The edge of `poly2` most anti-parallel to the reference face normal.
fn find_incident_edge(
    c: &mut [ClipVertex; 2],
    poly1: &PolygonShape,
    xf1: &Transform,
    edge1: usize,
    poly2: &PolygonShape,
    xf2: &Transform,
) {
    let count2 = poly2.count;
    debug_assert!(edge1 < poly1.count);

    // Reference normal in poly2's frame
    let normal1 = xf2.q.apply_t(xf1.q.apply(poly1.normals[edge1]));

    let mut index = 0;
    let mut min_dot = f32::MAX;
    for i in 0..count2 {
        let dot = normal1.dot(poly2.normals[i]);
        if dot < min_dot {
            min_dot = dot;
            index = i;
        }
    }

    let i1 = index;
    let i2 = (i1 + 1) % count2;

    c[0] = ClipVertex {
        v: xf2.mul_vec2(poly2.vertices[i1]),
        id: ContactFeature::new(edge1 as u8, i1 as u8, FEATURE_FACE, FEATURE_VERTEX),
    };
    c[1] = ClipVertex {
        v: xf2.mul_vec2(poly2.vertices[i2]),
        id: ContactFeature::new(edge1 as u8, i2 as u8, FEATURE_FACE, FEATURE_VERTEX),
    };
}

/// Polygon vs polygon via reference/incident face clipping.
pub fn collide_polygons(
    manifold: &mut Manifold,
    poly_a: &PolygonShape,
    xf_a: &Transform,
    poly_b: &PolygonShape,
    xf_b: &Transform,
) {
    manifold.point_count = 0;
    let total_radius = poly_a.radius + poly_b.radius;

    let (separation_a, edge_a) = max_separation(poly_a, xf_a, poly_b, xf_b);
    if separation_a > total_radius {
        return;
    }
    let (separation_b, edge_b) = max_separation(poly_b, xf_b, poly_a, xf_a);
    if separation_b > total_radius {
        return;
    }

    // Prefer the face with greater separation; the tolerance keeps the
    // choice stable between frames so warm starting holds up
    const RELATIVE_TOL: f32 = 0.98;
    const ABSOLUTE_TOL: f32 = 0.001;

    let (poly1, poly2, xf1, xf2, edge1, flip);
    if separation_b > RELATIVE_TOL * separation_a + ABSOLUTE_TOL {
        poly1 = poly_b;
        poly2 = poly_a;
        xf1 = xf_b;
        xf2 = xf_a;
        edge1 = edge_b;
        manifold.kind = ManifoldType::FaceB;
        flip = true;
    } else {
        poly1 = poly_a;
        poly2 = poly_b;
        xf1 = xf_a;
        xf2 = xf_b;
        edge1 = edge_a;
        manifold.kind = ManifoldType::FaceA;
        flip = false;
    }

    let mut incident_edge = [ClipVertex::default(); 2];
    find_incident_edge(&mut incident_edge, poly1, xf1, edge1, poly2, xf2);

    let count1 = poly1.count;
    let iv1 = edge1;
    let iv2 = (edge1 + 1) % count1;

    let mut v11 = poly1.vertices[iv1];
    let mut v12 = poly1.vertices[iv2];

    let local_tangent = {
        let mut t = v12 - v11;
        t.normalize_and_length();
        t
    };
    let local_normal = local_tangent.right_perp();
    let plane_point = (v11 + v12) * 0.5;

    let tangent = xf1.q.apply(local_tangent);
    let normal = tangent.right_perp();

    v11 = xf1.mul_vec2(v11);
    v12 = xf1.mul_vec2(v12);

    let front_offset = normal.dot(v11);
    // Side offsets, extended by the skin radius
    let side_offset1 = -tangent.dot(v11) + total_radius;
    let side_offset2 = tangent.dot(v12) + total_radius;

    let mut clip_points1 = [ClipVertex::default(); 2];
    let mut clip_points2 = [ClipVertex::default(); 2];

    let np = clip_segment_to_line(&mut clip_points1, &incident_edge, -tangent, side_offset1, iv1);
    if np < 2 {
        return;
    }
    let np = clip_segment_to_line(&mut clip_points2, &clip_points1, tangent, side_offset2, iv2);
    if np < 2 {
        return;
    }

    manifold.local_normal = local_normal;
    manifold.local_point = plane_point;

    let mut point_count = 0;
    for cp in &clip_points2 {
        let separation = normal.dot(cp.v) - front_offset;
        if separation <= total_radius {
            let mp = &mut manifold.points[point_count];
            mp.local_point = xf2.mul_t_vec2(cp.v);
            mp.id = if flip { cp.id.flipped() } else { cp.id };
            mp.normal_impulse = 0.0;
            mp.tangent_impulse = 0.0;
            point_count += 1;
        }
    }
    manifold.point_count = point_count;
}

// ============================================================================
// Edge collisions
// ============================================================================

/// Edge vs circle, with ghost-vertex region culling: contact at an edge
/// endpoint is suppressed when the adjacent (ghost) segment owns that
/// region, so circles roll across chain seams smoothly.
pub fn collide_edge_and_circle(
    manifold: &mut Manifold,
    edge_a: &EdgeShape,
    xf_a: &Transform,
    circle_b: &CircleShape,
    xf_b: &Transform,
) {
    manifold.point_count = 0;

    // Circle center in the edge frame
    let q = xf_a.mul_t_vec2(xf_b.mul_vec2(circle_b.position));

    let a = edge_a.vertex1;
    let b = edge_a.vertex2;
    let e = b - a;

    // Barycentric coordinates along the edge
    let u = e.dot(b - q);
    let v = e.dot(q - a);
    let radius = edge_a.radius + circle_b.radius;

    // Region A (behind vertex1)
    if v <= 0.0 {
        let d = q - a;
        if d.length_squared() > radius * radius {
            return;
        }
        // The previous segment owns this region when its far vertex lies
        // beyond our first vertex
        if let Some(g1) = edge_a.ghost1 {
            let e1 = a - g1;
            if e1.dot(a - q) > 0.0 {
                return;
            }
        }
        manifold.kind = ManifoldType::Circles;
        manifold.local_normal = Vec2::ZERO;
        manifold.local_point = a;
        manifold.point_count = 1;
        manifold.points[0] = ManifoldPoint {
            local_point: circle_b.position,
            id: ContactFeature::new(0, 0, FEATURE_VERTEX, FEATURE_VERTEX),
            ..Default::default()
        };
        return;
    }

    // Region B (beyond vertex2)
    if u <= 0.0 {
        let d = q - b;
        if d.length_squared() > radius * radius {
            return;
        }
        if let Some(g2) = edge_a.ghost2 {
            let e2 = g2 - b;
            if e2.dot(q - b) > 0.0 {
                return;
            }
        }
        manifold.kind = ManifoldType::Circles;
        manifold.local_normal = Vec2::ZERO;
        manifold.local_point = b;
        manifold.point_count = 1;
        manifold.points[0] = ManifoldPoint {
            local_point: circle_b.position,
            id: ContactFeature::new(1, 0, FEATURE_VERTEX, FEATURE_VERTEX),
            ..Default::default()
        };
        return;
    }

    // Region AB (the face)
    let den = e.length_squared();
    debug_assert!(den > 0.0);
    let p = (a * u + b * v) * (1.0 / den);
    let d = q - p;
    if d.length_squared() > radius * radius {
        return;
    }

    // Face normal oriented toward the circle
    let mut n = Vec2::new(-e.y, e.x);
    if n.dot(q - a) < 0.0 {
        n = -n;
    }
    n.normalize_and_length();

    manifold.kind = ManifoldType::FaceA;
    manifold.local_normal = n;
    manifold.local_point = a;
    manifold.point_count = 1;
    manifold.points[0] = ManifoldPoint {
        local_point: circle_b.position,
        id: ContactFeature::new(0, 0, FEATURE_FACE, FEATURE_VERTEX),
        ..Default::default()
    };
}

/// Edge vs polygon. The edge acts as a one-sided reference face whose
/// normal is clamped into the arc permitted by the ghost vertices; the
/// polygon contributes the incident edge, clipped as in the polygon
/// pair case.
pub fn collide_edge_and_polygon(
    manifold: &mut Manifold,
    edge_a: &EdgeShape,
    xf_a: &Transform,
    poly_b: &PolygonShape,
    xf_b: &Transform,
) {
    manifold.point_count = 0;

    // Work in the edge's frame
    let xf = xf_a.mul_t(*xf_b);
    let centroid_b = xf.mul_vec2(poly_b.centroid);

    let v1 = edge_a.vertex1;
    let v2 = edge_a.vertex2;
    let mut edge = v2 - v1;
    if edge.normalize_and_length() == 0.0 {
        return;
    }

    // Edge normal with the polygon on its front side
    let mut normal = Vec2::new(edge.y, -edge.x);
    let offset = normal.dot(centroid_b - v1);
    if offset < 0.0 {
        normal = -normal;
    }

    let radius = edge_a.radius + poly_b.radius;

    // Separation of the polygon from the edge face
    let mut edge_separation = f32::MAX;
    for i in 0..poly_b.count {
        let s = normal.dot(xf.mul_vec2(poly_b.vertices[i]) - v1);
        if s < edge_separation {
            edge_separation = s;
        }
    }
    if edge_separation > radius {
        return;
    }

    // Separation of the edge from the polygon's faces
    let mut polygon_separation = f32::MIN;
    let mut polygon_index = 0;
    for i in 0..poly_b.count {
        let n = xf.q.apply(poly_b.normals[i]);
        let vi = xf.mul_vec2(poly_b.vertices[i]);
        let s = (n.dot(v1 - vi)).min(n.dot(v2 - vi));
        if s > polygon_separation {
            polygon_separation = s;
            polygon_index = i;
        }
    }
    if polygon_separation > radius {
        return;
    }

    const RELATIVE_TOL: f32 = 0.98;
    const ABSOLUTE_TOL: f32 = 0.001;

    // One-sided edge: the polygon's face may only be the reference when
    // it is clearly deeper; a reference face on the back side of the
    // edge is never allowed
    let use_polygon_face =
        polygon_separation > RELATIVE_TOL * edge_separation + ABSOLUTE_TOL;

    let mut incident = [ClipVertex::default(); 2];
    let (ref_v1, ref_v2, ref_normal, ref_index, flip);

    if use_polygon_face {
        // Reference face on the polygon (manifold type FaceB)
        manifold.kind = ManifoldType::FaceB;
        let i1 = polygon_index;
        let i2 = (i1 + 1) % poly_b.count;
        ref_v1 = xf.mul_vec2(poly_b.vertices[i1]);
        ref_v2 = xf.mul_vec2(poly_b.vertices[i2]);
        ref_normal = xf.q.apply(poly_b.normals[i1]);
        ref_index = i1;
        flip = true;

        // Incident edge is the edge segment itself; order so clipping is
        // consistent with the reference tangent
        incident[0] = ClipVertex {
            v: v1,
            id: ContactFeature::new(0, i1 as u8, FEATURE_VERTEX, FEATURE_FACE),
        };
        incident[1] = ClipVertex {
            v: v2,
            id: ContactFeature::new(1, i1 as u8, FEATURE_VERTEX, FEATURE_FACE),
        };
    } else {
        // Reference face on the edge (manifold type FaceA)
        manifold.kind = ManifoldType::FaceA;
        ref_v1 = v1;
        ref_v2 = v2;
        ref_normal = normal;
        ref_index = 0;
        flip = false;

        // Incident edge: polygon face most anti-parallel to the normal
        let mut best = 0;
        let mut min_dot = f32::MAX;
        for i in 0..poly_b.count {
            let dot = normal.dot(xf.q.apply(poly_b.normals[i]));
            if dot < min_dot {
                min_dot = dot;
                best = i;
            }
        }
        let i1 = best;
        let i2 = (i1 + 1) % poly_b.count;
        incident[0] = ClipVertex {
            v: xf.mul_vec2(poly_b.vertices[i1]),
            id: ContactFeature::new(0, i1 as u8, FEATURE_FACE, FEATURE_VERTEX),
        };
        incident[1] = ClipVertex {
            v: xf.mul_vec2(poly_b.vertices[i2]),
            id: ContactFeature::new(0, i2 as u8, FEATURE_FACE, FEATURE_VERTEX),
        };
    }

    let mut tangent = ref_v2 - ref_v1;
    tangent.normalize_and_length();

    let side_offset1 = -tangent.dot(ref_v1) + radius;
    let side_offset2 = tangent.dot(ref_v2) + radius;
    let front_offset = ref_normal.dot(ref_v1);

    let mut clip1 = [ClipVertex::default(); 2];
    let mut clip2 = [ClipVertex::default(); 2];
    if clip_segment_to_line(&mut clip1, &incident, -tangent, side_offset1, ref_index) < 2 {
        return;
    }
    if clip_segment_to_line(&mut clip2, &clip1, tangent, side_offset2, ref_index + 1) < 2 {
        return;
    }

    // Manifold data is stored in the frame of the reference shape; for
    // FaceA that is the edge (we are already in its frame), for FaceB it
    // is the polygon
    if use_polygon_face {
        manifold.local_normal = poly_b.normals[ref_index];
        manifold.local_point = (poly_b.vertices[ref_index]
            + poly_b.vertices[(ref_index + 1) % poly_b.count])
            * 0.5;
    } else {
        manifold.local_normal = ref_normal;
        manifold.local_point = ref_v1;
    }

    let mut point_count = 0;
    for cp in &clip2 {
        let separation = ref_normal.dot(cp.v) - front_offset;
        if separation <= radius {
            let mp = &mut manifold.points[point_count];
            // FaceA points live on B (the polygon), FaceB points on A
            // (the edge, whose local frame we are already in)
            mp.local_point = if flip { cp.v } else { xf.mul_t_vec2(cp.v) };
            mp.id = if flip { cp.id.flipped() } else { cp.id };
            point_count += 1;
        }
    }
    manifold.point_count = point_count;
}

// ============================================================================
// Tests
// ============================================================================
