//! Sequential-Impulse Contact Solver
//!
//! Velocity constraints: one normal and one tangent impulse per contact
//! point, solved iteratively with accumulated-impulse clamping. Warm
//! starting re-applies last frame's impulses before iterating, which is
//! what makes stacks converge within a handful of iterations.
//!
//! Position constraints: non-linear Gauss-Seidel on the transforms
//! after velocity integration, recomputing the world manifold every
//! iteration so the correction never feeds energy back into velocity.
//!
//! Author: Moroya Sakamoto

use crate::manifold::{Manifold, ManifoldType};
use crate::math::{Rot, Transform, Vec2};
use crate::settings::{
    BAUMGARTE, LINEAR_SLOP, MAX_LINEAR_CORRECTION, MAX_MANIFOLD_POINTS, TOI_BAUMGARTE,
    VELOCITY_THRESHOLD,
};

/// Center-of-mass position state used by the solver.
#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub c: Vec2,
    pub a: f32,
}

/// Velocity state used by the solver.
#[derive(Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub v: Vec2,
    pub w: f32,
}

/// Everything the solver needs to know about one island contact.
#[derive(Clone, Debug)]
pub struct ContactConstraintSource {
    pub manifold: Manifold,
    /// Island-local body indices
    pub index_a: usize,
    pub index_b: usize,
    pub inv_mass_a: f32,
    pub inv_mass_b: f32,
    pub inv_i_a: f32,
    pub inv_i_b: f32,
    pub local_center_a: Vec2,
    pub local_center_b: Vec2,
    pub radius_a: f32,
    pub radius_b: f32,
    pub friction: f32,
    pub restitution: f32,
    pub tangent_speed: f32,
    /// Index of the originating contact in the island's contact list
    pub contact_index: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct VelocityConstraintPoint {
    r_a: Vec2,
    r_b: Vec2,
    normal_impulse: f32,
    tangent_impulse: f32,
    normal_mass: f32,
    tangent_mass: f32,
    velocity_bias: f32,
}

#[derive(Clone, Debug)]
struct VelocityConstraint {
    points: [VelocityConstraintPoint; MAX_MANIFOLD_POINTS],
    normal: Vec2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    friction: f32,
    restitution: f32,
    tangent_speed: f32,
    point_count: usize,
    contact_index: usize,
}

#[derive(Clone, Debug)]
struct PositionConstraint {
    local_points: [Vec2; MAX_MANIFOLD_POINTS],
    local_normal: Vec2,
    local_point: Vec2,
    index_a: usize,
    index_b: usize,
    inv_mass_a: f32,
    inv_mass_b: f32,
    inv_i_a: f32,
    inv_i_b: f32,
    local_center_a: Vec2,
    local_center_b: Vec2,
    kind: ManifoldType,
    radius_a: f32,
    radius_b: f32,
    point_count: usize,
}

/// Final impulses for one contact, read back after the solve.
#[derive(Clone, Copy, Debug, Default)]
pub struct SolvedImpulses {
    pub normal: [f32; MAX_MANIFOLD_POINTS],
    pub tangent: [f32; MAX_MANIFOLD_POINTS],
    pub count: usize,
    pub contact_index: usize,
}

/// Reference-face manifold re-evaluated in world space for one position
/// iteration.
struct PositionSolverManifold {
    normal: Vec2,
    point: Vec2,
    separation: f32,
}

impl PositionSolverManifold {
    fn new(pc: &PositionConstraint, xf_a: &Transform, xf_b: &Transform, index: usize) -> Self {
        debug_assert!(pc.point_count > 0);

        match pc.kind {
            ManifoldType::Circles => {
                let point_a = xf_a.mul_vec2(pc.local_point);
                let point_b = xf_b.mul_vec2(pc.local_points[0]);
                let mut normal = point_b - point_a;
                normal.normalize_and_length();
                Self {
                    normal,
                    point: (point_a + point_b) * 0.5,
                    separation: (point_b - point_a).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
            ManifoldType::FaceA => {
                let normal = xf_a.q.apply(pc.local_normal);
                let plane_point = xf_a.mul_vec2(pc.local_point);
                let clip_point = xf_b.mul_vec2(pc.local_points[index]);
                Self {
                    normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
            ManifoldType::FaceB => {
                let normal = xf_b.q.apply(pc.local_normal);
                let plane_point = xf_b.mul_vec2(pc.local_point);
                let clip_point = xf_a.mul_vec2(pc.local_points[index]);
                Self {
                    // Flip so the normal points from A to B
                    normal: -normal,
                    point: clip_point,
                    separation: (clip_point - plane_point).dot(normal) - pc.radius_a - pc.radius_b,
                }
            }
        }
    }
}

/// Contact solver over one island's position/velocity arrays.
pub struct ContactSolver {
    velocity_constraints: Vec<VelocityConstraint>,
    position_constraints: Vec<PositionConstraint>,
}

impl ContactSolver {
    /// Build constraints from island contact data. Velocity constraint
    /// masses and biases are computed against the current velocities.
    #[must_use]
    pub fn new(
        sources: &[ContactConstraintSource],
        positions: &[Position],
        velocities: &[Velocity],
        warm_start_scale: f32,
    ) -> Self {
        let mut solver = Self {
            velocity_constraints: Vec::with_capacity(sources.len()),
            position_constraints: Vec::with_capacity(sources.len()),
        };

        for src in sources {
            let manifold = &src.manifold;
            debug_assert!(manifold.point_count > 0);

            let mut vc = VelocityConstraint {
                points: [VelocityConstraintPoint::default(); MAX_MANIFOLD_POINTS],
                normal: Vec2::ZERO,
                index_a: src.index_a,
                index_b: src.index_b,
                inv_mass_a: src.inv_mass_a,
                inv_mass_b: src.inv_mass_b,
                inv_i_a: src.inv_i_a,
                inv_i_b: src.inv_i_b,
                friction: src.friction,
                restitution: src.restitution,
                tangent_speed: src.tangent_speed,
                point_count: manifold.point_count,
                contact_index: src.contact_index,
            };
            let mut pc = PositionConstraint {
                local_points: [Vec2::ZERO; MAX_MANIFOLD_POINTS],
                local_normal: manifold.local_normal,
                local_point: manifold.local_point,
                index_a: src.index_a,
                index_b: src.index_b,
                inv_mass_a: src.inv_mass_a,
                inv_mass_b: src.inv_mass_b,
                inv_i_a: src.inv_i_a,
                inv_i_b: src.inv_i_b,
                local_center_a: src.local_center_a,
                local_center_b: src.local_center_b,
                kind: manifold.kind,
                radius_a: src.radius_a,
                radius_b: src.radius_b,
                point_count: manifold.point_count,
            };

            for j in 0..manifold.point_count {
                // Warm-start impulses carried from the previous step;
                // scaled to zero on the first step after structural change
                vc.points[j].normal_impulse = warm_start_scale * manifold.points[j].normal_impulse;
                vc.points[j].tangent_impulse =
                    warm_start_scale * manifold.points[j].tangent_impulse;
                pc.local_points[j] = manifold.points[j].local_point;
            }

            solver.init_constraint(&mut vc, &pc, src, positions, velocities);
            solver.velocity_constraints.push(vc);
            solver.position_constraints.push(pc);
        }

        solver
    }

    fn init_constraint(
        &self,
        vc: &mut VelocityConstraint,
        pc: &PositionConstraint,
        src: &ContactConstraintSource,
        positions: &[Position],
        velocities: &[Velocity],
    ) {
        let pos_a = positions[vc.index_a];
        let pos_b = positions[vc.index_b];
        let vel_a = velocities[vc.index_a];
        let vel_b = velocities[vc.index_b];

        let xf_a = transform_of(&pos_a, pc.local_center_a);
        let xf_b = transform_of(&pos_b, pc.local_center_b);

        let world = crate::manifold::WorldManifold::new(
            &src.manifold,
            &xf_a,
            pc.radius_a,
            &xf_b,
            pc.radius_b,
        );

        vc.normal = world.normal;
        let tangent = vc.normal.right_perp();

        for j in 0..vc.point_count {
            let vcp = &mut vc.points[j];
            vcp.r_a = world.points[j] - pos_a.c;
            vcp.r_b = world.points[j] - pos_b.c;

            let rn_a = vcp.r_a.cross(vc.normal);
            let rn_b = vcp.r_b.cross(vc.normal);
            let k_normal = vc.inv_mass_a
                + vc.inv_mass_b
                + vc.inv_i_a * rn_a * rn_a
                + vc.inv_i_b * rn_b * rn_b;
            vcp.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

            let rt_a = vcp.r_a.cross(tangent);
            let rt_b = vcp.r_b.cross(tangent);
            let k_tangent = vc.inv_mass_a
                + vc.inv_mass_b
                + vc.inv_i_a * rt_a * rt_a
                + vc.inv_i_b * rt_b * rt_b;
            vcp.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

            // Restitution bias for fast approaches only
            vcp.velocity_bias = 0.0;
            let v_rel = vc.normal.dot(
                vel_b.v + Vec2::cross_sv(vel_b.w, vcp.r_b)
                    - vel_a.v
                    - Vec2::cross_sv(vel_a.w, vcp.r_a),
            );
            if v_rel < -VELOCITY_THRESHOLD {
                vcp.velocity_bias = -vc.restitution * v_rel;
            }
        }
    }

    /// Apply the carried impulses before iterating.
    pub fn warm_start(&mut self, velocities: &mut [Velocity]) {
        for vc in &self.velocity_constraints {
            let mut vel_a = velocities[vc.index_a];
            let mut vel_b = velocities[vc.index_b];

            let normal = vc.normal;
            let tangent = normal.right_perp();

            for j in 0..vc.point_count {
                let vcp = &vc.points[j];
                let p = normal * vcp.normal_impulse + tangent * vcp.tangent_impulse;
                vel_a.w -= vc.inv_i_a * vcp.r_a.cross(p);
                vel_a.v -= p * vc.inv_mass_a;
                vel_b.w += vc.inv_i_b * vcp.r_b.cross(p);
                vel_b.v += p * vc.inv_mass_b;
            }

            velocities[vc.index_a] = vel_a;
            velocities[vc.index_b] = vel_b;
        }
    }

    /// One velocity iteration: friction first, then normal impulses,
    /// both with accumulated clamping.
    pub fn solve_velocity_constraints(&mut self, velocities: &mut [Velocity]) {
        for vc in &mut self.velocity_constraints {
            let mut vel_a = velocities[vc.index_a];
            let mut vel_b = velocities[vc.index_b];

            let normal = vc.normal;
            let tangent = normal.right_perp();
            let friction = vc.friction;

            // Tangent (friction) impulses
            for j in 0..vc.point_count {
                let vcp = &mut vc.points[j];
                let dv = vel_b.v + Vec2::cross_sv(vel_b.w, vcp.r_b)
                    - vel_a.v
                    - Vec2::cross_sv(vel_a.w, vcp.r_a);

                let vt = dv.dot(tangent) - vc.tangent_speed;
                let mut lambda = vcp.tangent_mass * -vt;

                // Coulomb clamp against the accumulated normal impulse
                let max_friction = friction * vcp.normal_impulse;
                let new_impulse = (vcp.tangent_impulse + lambda).clamp(-max_friction, max_friction);
                lambda = new_impulse - vcp.tangent_impulse;
                vcp.tangent_impulse = new_impulse;

                let p = tangent * lambda;
                vel_a.v -= p * vc.inv_mass_a;
                vel_a.w -= vc.inv_i_a * vcp.r_a.cross(p);
                vel_b.v += p * vc.inv_mass_b;
                vel_b.w += vc.inv_i_b * vcp.r_b.cross(p);
            }

            // Normal impulses
            for j in 0..vc.point_count {
                let vcp = &mut vc.points[j];
                let dv = vel_b.v + Vec2::cross_sv(vel_b.w, vcp.r_b)
                    - vel_a.v
                    - Vec2::cross_sv(vel_a.w, vcp.r_a);

                let vn = dv.dot(normal);
                let mut lambda = -vcp.normal_mass * (vn - vcp.velocity_bias);

                // Accumulated impulse may never pull
                let new_impulse = (vcp.normal_impulse + lambda).max(0.0);
                lambda = new_impulse - vcp.normal_impulse;
                vcp.normal_impulse = new_impulse;

                let p = normal * lambda;
                vel_a.v -= p * vc.inv_mass_a;
                vel_a.w -= vc.inv_i_a * vcp.r_a.cross(p);
                vel_b.v += p * vc.inv_mass_b;
                vel_b.w += vc.inv_i_b * vcp.r_b.cross(p);
            }

            velocities[vc.index_a] = vel_a;
            velocities[vc.index_b] = vel_b;
        }
    }

    /// Final accumulated impulses for write-back into the manifolds.
    #[must_use]
    pub fn impulses(&self) -> Vec<SolvedImpulses> {
        self.velocity_constraints
            .iter()
            .map(|vc| {
                let mut s = SolvedImpulses {
                    count: vc.point_count,
                    contact_index: vc.contact_index,
                    ..Default::default()
                };
                for j in 0..vc.point_count {
                    s.normal[j] = vc.points[j].normal_impulse;
                    s.tangent[j] = vc.points[j].tangent_impulse;
                }
                s
            })
            .collect()
    }

    /// One NGS position iteration. Returns true when the worst
    /// penetration is within tolerance.
    pub fn solve_position_constraints(&self, positions: &mut [Position]) -> bool {
        self.position_pass(positions, BAUMGARTE, None)
    }

    /// TOI variant: only the two sub-stepped bodies move, with a more
    /// aggressive correction factor.
    pub fn solve_toi_position_constraints(
        &self,
        positions: &mut [Position],
        toi_index_a: usize,
        toi_index_b: usize,
    ) -> bool {
        self.position_pass(positions, TOI_BAUMGARTE, Some((toi_index_a, toi_index_b)))
    }

    fn position_pass(
        &self,
        positions: &mut [Position],
        baumgarte: f32,
        toi_pair: Option<(usize, usize)>,
    ) -> bool {
        let mut min_separation = 0.0f32;

        for pc in &self.position_constraints {
            let index_a = pc.index_a;
            let index_b = pc.index_b;

            // In the TOI pass, bodies outside the advancing pair have
            // infinite effective mass
            let (mass_a, inertia_a, mass_b, inertia_b) = match toi_pair {
                None => (pc.inv_mass_a, pc.inv_i_a, pc.inv_mass_b, pc.inv_i_b),
                Some((ta, tb)) => {
                    let a_moves = index_a == ta || index_a == tb;
                    let b_moves = index_b == ta || index_b == tb;
                    (
                        if a_moves { pc.inv_mass_a } else { 0.0 },
                        if a_moves { pc.inv_i_a } else { 0.0 },
                        if b_moves { pc.inv_mass_b } else { 0.0 },
                        if b_moves { pc.inv_i_b } else { 0.0 },
                    )
                }
            };

            let mut pos_a = positions[index_a];
            let mut pos_b = positions[index_b];

            for j in 0..pc.point_count {
                let xf_a = transform_of(&pos_a, pc.local_center_a);
                let xf_b = transform_of(&pos_b, pc.local_center_b);

                let psm = PositionSolverManifold::new(pc, &xf_a, &xf_b, j);
                let normal = psm.normal;
                let point = psm.point;
                let separation = psm.separation;

                let r_a = point - pos_a.c;
                let r_b = point - pos_b.c;

                min_separation = min_separation.min(separation);

                // Clamped Baumgarte correction toward the slop
                let c = (baumgarte * (separation + LINEAR_SLOP))
                    .clamp(-MAX_LINEAR_CORRECTION, 0.0);

                let rn_a = r_a.cross(normal);
                let rn_b = r_b.cross(normal);
                let k = mass_a + mass_b + inertia_a * rn_a * rn_a + inertia_b * rn_b * rn_b;

                let impulse = if k > 0.0 { -c / k } else { 0.0 };
                let p = normal * impulse;

                pos_a.c -= p * mass_a;
                pos_a.a -= inertia_a * r_a.cross(p);
                pos_b.c += p * mass_b;
                pos_b.a += inertia_b * r_b.cross(p);
            }

            positions[index_a] = pos_a;
            positions[index_b] = pos_b;
        }

        // Allow up to 3 slop of residual error; NGS cannot push all the
        // way to zero and should not try
        min_separation >= -3.0 * LINEAR_SLOP
    }
}

/// Body transform from solver position state.
#[inline]
fn transform_of(pos: &Position, local_center: Vec2) -> Transform {
    let q = Rot::from_angle(pos.a);
    Transform {
        p: pos.c - q.apply(local_center),
        q,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifold::{collide_polygons, Manifold};
    use crate::shape::PolygonShape;

    /// Box resting on a static box, manifold from the real narrow phase.
    fn resting_source(positions: &[Position]) -> ContactConstraintSource {
        let ground = PolygonShape::new_box(10.0, 1.0).unwrap();
        let falling = PolygonShape::new_box(0.5, 0.5).unwrap();
        let xf_a = Transform::new(positions[0].c, positions[0].a);
        let xf_b = Transform::new(positions[1].c, positions[1].a);

        let mut manifold = Manifold::default();
        collide_polygons(&mut manifold, &ground, &xf_a, &falling, &xf_b);
        assert!(manifold.point_count > 0, "Setup must produce contact");

        ContactConstraintSource {
            manifold,
            index_a: 0,
            index_b: 1,
            inv_mass_a: 0.0,
            inv_mass_b: 1.0,
            inv_i_a: 0.0,
            inv_i_b: 6.0,
            local_center_a: Vec2::ZERO,
            local_center_b: Vec2::ZERO,
            radius_a: ground.radius,
            radius_b: falling.radius,
            friction: 0.5,
            restitution: 0.0,
            tangent_speed: 0.0,
            contact_index: 0,
        }
    }

    #[test]
    fn test_normal_impulse_stops_approach() {
        let positions = vec![
            Position {
                c: Vec2::ZERO,
                a: 0.0,
            },
            Position {
                c: Vec2::new(0.0, 1.49),
                a: 0.0,
            },
        ];
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(0.0, -2.0),
                w: 0.0,
            },
        ];

        let src = resting_source(&positions);
        let mut solver = ContactSolver::new(&[src], &positions, &velocities, 1.0);
        solver.warm_start(&mut velocities);
        for _ in 0..8 {
            solver.solve_velocity_constraints(&mut velocities);
        }

        assert!(
            velocities[1].v.y > -0.05,
            "Downward approach must be absorbed, got {}",
            velocities[1].v.y
        );
        assert_eq!(velocities[0].v, Vec2::ZERO, "Static body never moves");
    }

    #[test]
    fn test_impulses_never_pull() {
        let positions = vec![
            Position {
                c: Vec2::ZERO,
                a: 0.0,
            },
            Position {
                c: Vec2::new(0.0, 1.49),
                a: 0.0,
            },
        ];
        // Bodies already separating
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(0.0, 3.0),
                w: 0.0,
            },
        ];

        let src = resting_source(&positions);
        let mut solver = ContactSolver::new(&[src], &positions, &velocities, 0.0);
        for _ in 0..8 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        for s in solver.impulses() {
            for j in 0..s.count {
                assert!(
                    s.normal[j] >= 0.0,
                    "Normal impulse must stay non-negative"
                );
            }
        }
        assert!(
            velocities[1].v.y >= 3.0 - 1e-4,
            "Separating motion must not be braked"
        );
    }

    #[test]
    fn test_friction_clamped_by_normal_impulse() {
        let positions = vec![
            Position {
                c: Vec2::ZERO,
                a: 0.0,
            },
            Position {
                c: Vec2::new(0.0, 1.49),
                a: 0.0,
            },
        ];
        // Pressing down and sliding sideways fast
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(10.0, -1.0),
                w: 0.0,
            },
        ];

        let src = resting_source(&positions);
        let friction = src.friction;
        let mut solver = ContactSolver::new(&[src], &positions, &velocities, 0.0);
        for _ in 0..10 {
            solver.solve_velocity_constraints(&mut velocities);
        }

        for s in solver.impulses() {
            for j in 0..s.count {
                assert!(
                    s.tangent[j].abs() <= friction * s.normal[j] + 1e-5,
                    "Coulomb cone violated: |{}| > {} * {}",
                    s.tangent[j],
                    friction,
                    s.normal[j]
                );
            }
        }
        assert!(
            velocities[1].v.x > 5.0,
            "Friction must slow, not stop, a fast slide in few iterations"
        );
    }

    #[test]
    fn test_position_solver_removes_overlap() {
        let mut positions = vec![
            Position {
                c: Vec2::ZERO,
                a: 0.0,
            },
            // Box overlapping the ground by 0.05
            Position {
                c: Vec2::new(0.0, 1.45),
                a: 0.0,
            },
        ];
        let velocities = vec![Velocity::default(), Velocity::default()];

        let src = resting_source(&positions);
        let solver = ContactSolver::new(&[src], &positions, &velocities, 0.0);
        let mut solved = false;
        for _ in 0..10 {
            if solver.solve_position_constraints(&mut positions) {
                solved = true;
                break;
            }
        }
        assert!(solved, "Position solver must converge on a simple overlap");
        assert!(
            positions[1].c.y > 1.45,
            "Penetrating body pushed out, got y={}",
            positions[1].c.y
        );
        assert_eq!(positions[0].c, Vec2::ZERO, "Static side must not sink");
    }

    #[test]
    fn test_restitution_bounces_fast_impacts_only() {
        let positions = vec![
            Position {
                c: Vec2::ZERO,
                a: 0.0,
            },
            Position {
                c: Vec2::new(0.0, 1.49),
                a: 0.0,
            },
        ];

        let mut src = resting_source(&positions);
        src.restitution = 0.8;

        // Fast approach: bounce expected
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(0.0, -5.0),
                w: 0.0,
            },
        ];
        let mut solver = ContactSolver::new(&[src.clone()], &positions, &velocities, 0.0);
        for _ in 0..8 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        assert!(
            velocities[1].v.y > 3.0,
            "Fast impact at e=0.8 must rebound, got {}",
            velocities[1].v.y
        );

        // Slow approach (below threshold): inelastic
        let mut velocities = vec![
            Velocity::default(),
            Velocity {
                v: Vec2::new(0.0, -0.5),
                w: 0.0,
            },
        ];
        let mut solver = ContactSolver::new(&[src], &positions, &velocities, 0.0);
        for _ in 0..8 {
            solver.solve_velocity_constraints(&mut velocities);
        }
        assert!(
            velocities[1].v.y.abs() < 0.1,
            "Slow impact must not bounce, got {}",
            velocities[1].v.y
        );
    }
}
