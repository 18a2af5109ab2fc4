//! Particle System
//!
//! Fluid-style particle simulation over flat parallel buffers. Particles
//! are plain indices into position/velocity/flags arrays rather than
//! objects, so the per-step passes stream through memory. Neighbour
//! discovery runs through a Voronoi grid partition instead of an O(n^2)
//! scan; particle-body coupling goes through the broad-phase tree.
//!
//! Features:
//! - Combinable behavior flags (water, spring, elastic, viscous, powder,
//!   tensile, color mixing, wall)
//! - Per-step contact lists with weights `1 - d/diameter`
//! - Pressure and damping relaxation, then type-specific passes
//! - Groups created as shape-filled lattices, with lazily recomputed
//!   aggregate statistics
//! - Zombie removal by swap-with-last compaction; external indices are
//!   invalidated every step
//!
//! Author: Moroya Sakamoto

use crate::body::{Body, BodyHandle, FixtureHandle};
use crate::broad_phase::BroadPhase;
use crate::callbacks::DestructionListener;
use crate::contact::unpack_proxy;
use crate::distance::{distance, DistanceInput, SimplexCache};
use crate::fixture::Fixture;
use crate::joint::SolverStep;
use crate::math::{Aabb, Rot, Transform, Vec2};
use crate::shape::{CircleShape, DistanceProxy, Shape};
use crate::voronoi::VoronoiDiagram;

// ============================================================================
// Flags
// ============================================================================

/// Particle behavior bitset. Flags combine freely: a particle can be both
/// springy and color-mixing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParticleFlags(pub u32);

impl ParticleFlags {
    /// Plain fluid particle.
    pub const WATER: Self = Self(0);
    /// Static barrier particle; velocity is zeroed every step.
    pub const WALL: Self = Self(1 << 0);
    /// Pairwise spring toward the creation-time rest distance.
    pub const SPRING: Self = Self(1 << 1);
    /// Triad shape matching toward the creation-time configuration.
    pub const ELASTIC: Self = Self(1 << 2);
    /// Pairwise velocity smoothing.
    pub const VISCOUS: Self = Self(1 << 3);
    /// Anti-clumping repulsion without cohesion.
    pub const POWDER: Self = Self(1 << 4);
    /// Surface-tension attraction.
    pub const TENSILE: Self = Self(1 << 5);
    /// Colors blend across contacts.
    pub const COLOR_MIXING: Self = Self(1 << 6);
    /// Marked for removal at end of step.
    pub const ZOMBIE: Self = Self(1 << 7);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl core::ops::BitOr for ParticleFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for ParticleFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// RGBA color, one byte per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParticleColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for ParticleColor {
    fn default() -> Self {
        Self {
            r: 255,
            g: 255,
            b: 255,
            a: 255,
        }
    }
}

impl ParticleColor {
    #[must_use]
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Move both colors toward each other by `strength/128` of their
    /// difference. Symmetric, so total channel value is conserved.
    pub fn mix(&mut self, other: &mut Self, strength: i32) {
        let mix = |a: &mut u8, b: &mut u8| {
            let d = (strength * (i32::from(*b) - i32::from(*a))) >> 7;
            *a = (i32::from(*a) + d) as u8;
            *b = (i32::from(*b) - d) as u8;
        };
        mix(&mut self.r, &mut other.r);
        mix(&mut self.g, &mut other.g);
        mix(&mut self.b, &mut other.b);
        mix(&mut self.a, &mut other.a);
    }
}

// ============================================================================
// Definitions and transient records
// ============================================================================

/// Prototype for a single particle.
#[derive(Clone, Copy, Debug)]
pub struct ParticleDef {
    pub flags: ParticleFlags,
    pub position: Vec2,
    pub velocity: Vec2,
    pub color: ParticleColor,
}

impl Default for ParticleDef {
    fn default() -> Self {
        Self {
            flags: ParticleFlags::WATER,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            color: ParticleColor::default(),
        }
    }
}

/// Prototype for a particle group: a shape filled with a lattice of
/// particles sharing flags, color, and initial rigid-body velocity.
#[derive(Clone, Debug)]
pub struct ParticleGroupDef {
    pub flags: ParticleFlags,
    pub position: Vec2,
    pub angle: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
    pub color: ParticleColor,
    /// Pair/triad strength for spring and elastic particles, in [0, 1].
    pub strength: f32,
    pub shape: Shape,
    pub user_data: u64,
}

impl ParticleGroupDef {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            flags: ParticleFlags::WATER,
            position: Vec2::ZERO,
            angle: 0.0,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            color: ParticleColor::default(),
            strength: 1.0,
            shape,
            user_data: 0,
        }
    }
}

/// Stable identifier for a particle group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParticleGroupHandle(pub u32);

pub(crate) const INVALID_GROUP: u32 = u32::MAX;

/// Aggregate state for a set of particles created together. Statistics
/// are recomputed lazily when a caller asks and the timestamp is stale.
#[derive(Clone, Debug)]
pub struct ParticleGroup {
    pub(crate) user_data: u64,
    pub(crate) timestamp: u64,
    pub(crate) mass: f32,
    pub(crate) center: Vec2,
    pub(crate) linear_velocity: Vec2,
    pub(crate) angular_velocity: f32,
}

impl ParticleGroup {
    pub fn user_data(&self) -> u64 {
        self.user_data
    }
}

/// Particle-particle contact, rebuilt every step.
#[derive(Clone, Copy, Debug)]
pub struct ParticleContact {
    pub index_a: usize,
    pub index_b: usize,
    /// 1 at zero separation, 0 at one diameter.
    pub weight: f32,
    /// Unit vector from a to b.
    pub normal: Vec2,
}

/// Particle-body contact, rebuilt every step.
#[derive(Clone, Copy, Debug)]
pub struct ParticleBodyContact {
    pub index: usize,
    pub body: BodyHandle,
    pub fixture: FixtureHandle,
    pub weight: f32,
    /// Unit vector from the fixture surface toward the particle.
    pub normal: Vec2,
    /// Effective mass for impulse exchange with the body.
    pub mass: f32,
}

/// Persistent spring between two particles.
#[derive(Clone, Copy, Debug)]
struct ParticlePair {
    index_a: usize,
    index_b: usize,
    strength: f32,
    distance: f32,
}

/// Persistent elastic triad; rest positions are relative to the triad
/// centroid at creation time.
#[derive(Clone, Copy, Debug)]
struct ParticleTriad {
    index_a: usize,
    index_b: usize,
    index_c: usize,
    strength: f32,
    pa: Vec2,
    pb: Vec2,
    pc: Vec2,
}

// ============================================================================
// Particle system
// ============================================================================

const DEFAULT_RADIUS: f32 = 1.0;
/// Lattice spacing as a fraction of the diameter.
const PARTICLE_STRIDE: f32 = 0.75;
const PRESSURE_STRENGTH: f32 = 0.05;
const DAMPING_STRENGTH: f32 = 1.0;
const ELASTIC_STRENGTH: f32 = 0.25;
const SPRING_STRENGTH: f32 = 0.25;
const VISCOUS_STRENGTH: f32 = 0.25;
const POWDER_STRENGTH: f32 = 0.5;
const MIN_POWDER_WEIGHT: f32 = 0.25;
const TENSILE_PRESSURE_STRENGTH: f32 = 0.2;
const TENSILE_NORMAL_STRENGTH: f32 = 0.2;
const COLOR_MIXING_STRENGTH: f32 = 0.5;

/// The particle world: parallel buffers plus the per-step scratch lists.
pub struct ParticleSystem {
    radius: f32,
    density: f32,

    count: usize,
    position: Vec<Vec2>,
    velocity: Vec<Vec2>,
    flags: Vec<ParticleFlags>,
    color: Vec<ParticleColor>,
    group: Vec<u32>,
    weight: Vec<f32>,
    /// Scalar scratch, reused across passes.
    accumulation: Vec<f32>,
    /// Vector scratch for the tensile pass.
    accumulation2: Vec<Vec2>,

    contacts: Vec<ParticleContact>,
    body_contacts: Vec<ParticleBodyContact>,
    pairs: Vec<ParticlePair>,
    triads: Vec<ParticleTriad>,

    groups: Vec<Option<ParticleGroup>>,
    group_free: Vec<u32>,

    /// Union of all live particle flags; gates the per-type passes.
    all_flags: ParticleFlags,
    timestamp: u64,
    diagram: VoronoiDiagram,
}

impl ParticleSystem {
    pub(crate) fn new() -> Self {
        Self {
            radius: DEFAULT_RADIUS,
            density: 1.0,
            count: 0,
            position: Vec::new(),
            velocity: Vec::new(),
            flags: Vec::new(),
            color: Vec::new(),
            group: Vec::new(),
            weight: Vec::new(),
            accumulation: Vec::new(),
            accumulation2: Vec::new(),
            contacts: Vec::new(),
            body_contacts: Vec::new(),
            pairs: Vec::new(),
            triads: Vec::new(),
            groups: Vec::new(),
            group_free: Vec::new(),
            all_flags: ParticleFlags::WATER,
            timestamp: 0,
            diagram: VoronoiDiagram::new(0),
        }
    }

    // =========== Configuration ===========

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        debug_assert!(radius > 0.0, "particle radius must be positive");
        self.radius = radius;
    }

    pub fn density(&self) -> f32 {
        self.density
    }

    pub fn set_density(&mut self, density: f32) {
        debug_assert!(density > 0.0, "particle density must be positive");
        self.density = density;
    }

    fn diameter(&self) -> f32 {
        2.0 * self.radius
    }

    /// Mass of one particle: density times the square of the lattice
    /// stride.
    pub fn particle_mass(&self) -> f32 {
        let stride = PARTICLE_STRIDE * self.diameter();
        self.density * stride * stride
    }

    fn inverse_particle_mass(&self) -> f32 {
        let m = self.particle_mass();
        if m > 0.0 {
            1.0 / m
        } else {
            0.0
        }
    }

    /// Velocity scale above which corrections are clamped: one radius per
    /// step.
    fn critical_velocity(&self, step: &SolverStep) -> f32 {
        self.radius * step.inv_dt
    }

    fn critical_pressure(&self, step: &SolverStep) -> f32 {
        let v = self.critical_velocity(step);
        self.density * v * v
    }

    // =========== Creation and destruction ===========

    /// Create one particle and return its index. The index is only valid
    /// until the next step compacts the buffers.
    pub fn create_particle(&mut self, def: &ParticleDef) -> usize {
        let index = self.count;
        self.position.push(def.position);
        self.velocity.push(def.velocity);
        self.flags.push(def.flags);
        self.color.push(def.color);
        self.group.push(INVALID_GROUP);
        self.weight.push(0.0);
        self.accumulation.push(0.0);
        self.accumulation2.push(Vec2::ZERO);
        self.count += 1;
        self.all_flags |= def.flags;
        index
    }

    /// Flag a particle for removal; the buffers compact at the end of the
    /// next step.
    pub fn destroy_particle(&mut self, index: usize) {
        if index < self.count {
            self.flags[index].insert(ParticleFlags::ZOMBIE);
            self.all_flags |= ParticleFlags::ZOMBIE;
        }
    }

    /// Flag every particle inside `shape` (at transform `xf`) for
    /// removal. Returns the number of particles flagged.
    pub fn destroy_particles_in_shape(&mut self, shape: &Shape, xf: &Transform) -> usize {
        let mut destroyed = 0;
        for i in 0..self.count {
            if shape.test_point(xf, self.position[i]) {
                self.flags[i].insert(ParticleFlags::ZOMBIE);
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            self.all_flags |= ParticleFlags::ZOMBIE;
        }
        destroyed
    }

    /// Fill `def.shape` with a lattice of particles and register them as
    /// one group. Spring and elastic flags also build the persistent
    /// pair/triad network from the lattice neighbour relation.
    pub fn create_particle_group(&mut self, def: &ParticleGroupDef) -> ParticleGroupHandle {
        let first = self.count;
        let stride = PARTICLE_STRIDE * self.diameter();
        let xf = Transform::new(def.position, def.angle);
        let identity = Transform::IDENTITY;

        let mut aabb = def.shape.compute_aabb(&identity, 0);
        for child in 1..def.shape.child_count() {
            aabb = aabb.union(&def.shape.compute_aabb(&identity, child));
        }

        let mut y = (aabb.lower.y / stride).floor() * stride;
        while y < aabb.upper.y {
            let mut x = (aabb.lower.x / stride).floor() * stride;
            while x < aabb.upper.x {
                let local = Vec2::new(x, y);
                if def.shape.test_point(&identity, local) {
                    let p = xf.mul_vec2(local);
                    let velocity = def.linear_velocity
                        + Vec2::cross_sv(def.angular_velocity, p - def.position);
                    let index = self.create_particle(&ParticleDef {
                        flags: def.flags,
                        position: p,
                        velocity,
                        color: def.color,
                    });
                    debug_assert_eq!(index, self.count - 1);
                }
                x += stride;
            }
            y += stride;
        }
        let last = self.count;

        let handle = self.allocate_group(ParticleGroup {
            user_data: def.user_data,
            timestamp: u64::MAX,
            mass: 0.0,
            center: Vec2::ZERO,
            linear_velocity: Vec2::ZERO,
            angular_velocity: 0.0,
        });
        for i in first..last {
            self.group[i] = handle.0;
        }

        if def
            .flags
            .intersects(ParticleFlags::SPRING | ParticleFlags::ELASTIC)
        {
            self.build_connections(first, last, def.flags, def.strength);
        }
        handle
    }

    fn allocate_group(&mut self, group: ParticleGroup) -> ParticleGroupHandle {
        if let Some(slot) = self.group_free.pop() {
            self.groups[slot as usize] = Some(group);
            ParticleGroupHandle(slot)
        } else {
            self.groups.push(Some(group));
            ParticleGroupHandle((self.groups.len() - 1) as u32)
        }
    }

    /// Build spring pairs and elastic triads over `[first, last)` from
    /// the Voronoi neighbour relation of the creation lattice.
    fn build_connections(&mut self, first: usize, last: usize, flags: ParticleFlags, strength: f32) {
        let mut diagram = VoronoiDiagram::new(last - first);
        for i in first..last {
            diagram.add_generator(self.position[i], i);
        }
        diagram.generate(self.radius);

        let spring = flags.contains(ParticleFlags::SPRING);
        let elastic = flags.contains(ParticleFlags::ELASTIC);
        let max_d = PARTICLE_STRIDE * self.diameter() * 2.0;

        let mut new_pairs: Vec<ParticlePair> = Vec::new();
        let mut new_triads: Vec<ParticleTriad> = Vec::new();
        diagram.get_nodes(|a, b, c| {
            let pa = self.position[a];
            let pb = self.position[b];
            let pc = self.position[c];
            if spring {
                for &(i, j) in &[(a, b), (b, c), (a, c)] {
                    let d = (self.position[j] - self.position[i]).length();
                    if d < max_d {
                        new_pairs.push(ParticlePair {
                            index_a: i.min(j),
                            index_b: i.max(j),
                            strength,
                            distance: d,
                        });
                    }
                }
            }
            if elastic {
                let dab = (pb - pa).length();
                let dbc = (pc - pb).length();
                let dca = (pa - pc).length();
                if dab < max_d && dbc < max_d && dca < max_d {
                    let mid = (pa + pb + pc) * (1.0 / 3.0);
                    new_triads.push(ParticleTriad {
                        index_a: a,
                        index_b: b,
                        index_c: c,
                        strength,
                        pa: pa - mid,
                        pb: pb - mid,
                        pc: pc - mid,
                    });
                }
            }
        });
        if spring {
            new_pairs.sort_by(|p, q| (p.index_a, p.index_b).cmp(&(q.index_a, q.index_b)));
            new_pairs.dedup_by_key(|p| (p.index_a, p.index_b));
            self.pairs.extend(new_pairs);
        }
        self.triads.extend(new_triads);
    }

    /// Move every particle of group `b` into group `a` and free `b`.
    pub fn join_particle_groups(&mut self, a: ParticleGroupHandle, b: ParticleGroupHandle) {
        if a == b
            || self.groups.get(a.0 as usize).map_or(true, Option::is_none)
            || self.groups.get(b.0 as usize).map_or(true, Option::is_none)
        {
            return;
        }
        for g in self.group.iter_mut().take(self.count) {
            if *g == b.0 {
                *g = a.0;
            }
        }
        self.groups[b.0 as usize] = None;
        self.group_free.push(b.0);
        if let Some(group) = self.groups[a.0 as usize].as_mut() {
            group.timestamp = u64::MAX;
        }
    }

    // =========== Accessors ===========

    pub fn particle_count(&self) -> usize {
        self.count
    }

    pub fn position_buffer(&self) -> &[Vec2] {
        &self.position[..self.count]
    }

    pub fn velocity_buffer(&self) -> &[Vec2] {
        &self.velocity[..self.count]
    }

    pub fn velocity_buffer_mut(&mut self) -> &mut [Vec2] {
        &mut self.velocity[..self.count]
    }

    pub fn flags_buffer(&self) -> &[ParticleFlags] {
        &self.flags[..self.count]
    }

    pub fn color_buffer(&self) -> &[ParticleColor] {
        &self.color[..self.count]
    }

    /// Per-particle group slot; `u32::MAX` when ungrouped.
    pub fn group_buffer(&self) -> &[u32] {
        &self.group[..self.count]
    }

    /// Contact-weight sums from the last step.
    pub fn weight_buffer(&self) -> &[f32] {
        &self.weight[..self.count]
    }

    /// Contacts generated during the last step.
    pub fn contacts(&self) -> &[ParticleContact] {
        &self.contacts
    }

    /// Body contacts generated during the last step.
    pub fn body_contacts(&self) -> &[ParticleBodyContact] {
        &self.body_contacts
    }

    pub fn group(&self, handle: ParticleGroupHandle) -> Option<&ParticleGroup> {
        self.groups.get(handle.0 as usize)?.as_ref()
    }

    /// Aggregate mass of a group, recomputing statistics if stale.
    pub fn group_mass(&mut self, handle: ParticleGroupHandle) -> Option<f32> {
        self.update_statistics(handle)?;
        Some(self.groups[handle.0 as usize].as_ref()?.mass)
    }

    /// Center of mass of a group, recomputing statistics if stale.
    pub fn group_center(&mut self, handle: ParticleGroupHandle) -> Option<Vec2> {
        self.update_statistics(handle)?;
        Some(self.groups[handle.0 as usize].as_ref()?.center)
    }

    /// Mass-averaged linear velocity of a group.
    pub fn group_linear_velocity(&mut self, handle: ParticleGroupHandle) -> Option<Vec2> {
        self.update_statistics(handle)?;
        Some(self.groups[handle.0 as usize].as_ref()?.linear_velocity)
    }

    /// Angular velocity of a group about its center of mass.
    pub fn group_angular_velocity(&mut self, handle: ParticleGroupHandle) -> Option<f32> {
        self.update_statistics(handle)?;
        Some(self.groups[handle.0 as usize].as_ref()?.angular_velocity)
    }

    /// Recompute a group's aggregate statistics when its timestamp is
    /// behind the system's.
    fn update_statistics(&mut self, handle: ParticleGroupHandle) -> Option<()> {
        let stamp = self.timestamp;
        let stale = {
            let group = self.groups.get(handle.0 as usize)?.as_ref()?;
            group.timestamp != stamp
        };
        if !stale {
            return Some(());
        }
        let m = self.particle_mass();
        let mut mass = 0.0;
        let mut center = Vec2::ZERO;
        let mut linear = Vec2::ZERO;
        for i in 0..self.count {
            if self.group[i] == handle.0 {
                mass += m;
                center += self.position[i] * m;
                linear += self.velocity[i] * m;
            }
        }
        if mass > 0.0 {
            center = center * (1.0 / mass);
            linear = linear * (1.0 / mass);
        }
        let mut inertia = 0.0;
        let mut angular_momentum = 0.0;
        for i in 0..self.count {
            if self.group[i] == handle.0 {
                let p = self.position[i] - center;
                let v = self.velocity[i] - linear;
                inertia += m * p.dot(p);
                angular_momentum += m * p.cross(v);
            }
        }
        let group = self.groups[handle.0 as usize].as_mut()?;
        group.timestamp = stamp;
        group.mass = mass;
        group.center = center;
        group.linear_velocity = linear;
        group.angular_velocity = if inertia > 0.0 {
            angular_momentum / inertia
        } else {
            0.0
        };
        Some(())
    }

    // =========== Step ===========

    pub(crate) fn solve(
        &mut self,
        step: &SolverStep,
        gravity: Vec2,
        bodies: &mut [Option<Body>],
        fixtures: &[Option<Fixture>],
        broad_phase: &BroadPhase,
        destruction: &mut dyn DestructionListener,
    ) {
        if self.count == 0 {
            return;
        }
        self.timestamp += 1;

        self.update_contacts();
        self.update_body_contacts(bodies, fixtures, broad_phase);
        self.compute_weights();

        // Gravity
        let grav = gravity * step.dt;
        for v in self.velocity.iter_mut().take(self.count) {
            *v += grav;
        }

        if self.all_flags.intersects(ParticleFlags::ELASTIC) {
            self.solve_elastic();
        }
        if self.all_flags.intersects(ParticleFlags::SPRING) {
            self.solve_spring();
        }
        if self.all_flags.intersects(ParticleFlags::TENSILE) {
            self.solve_tensile(step);
        }
        if self.all_flags.intersects(ParticleFlags::VISCOUS) {
            self.solve_viscous(bodies);
        }
        if self.all_flags.intersects(ParticleFlags::POWDER) {
            self.solve_powder(step);
        }
        self.solve_pressure(step, bodies);
        self.solve_damping(bodies);
        if self.all_flags.intersects(ParticleFlags::COLOR_MIXING) {
            self.solve_color_mixing();
        }
        if self.all_flags.intersects(ParticleFlags::WALL) {
            for i in 0..self.count {
                if self.flags[i].contains(ParticleFlags::WALL) {
                    self.velocity[i] = Vec2::ZERO;
                }
            }
        }

        // Integrate positions
        for i in 0..self.count {
            let v = self.velocity[i];
            self.position[i] += v * step.dt;
        }

        if self.all_flags.intersects(ParticleFlags::ZOMBIE) {
            self.solve_zombie(destruction);
        }
    }

    /// Rebuild the particle-particle contact list through the Voronoi
    /// partition.
    fn update_contacts(&mut self) {
        self.contacts.clear();
        if self.count < 2 {
            return;
        }
        self.diagram.clear();
        for i in 0..self.count {
            self.diagram.add_generator(self.position[i], i);
        }
        self.diagram.generate(self.radius);

        let diameter = self.diameter();
        let mut candidates: Vec<(usize, usize)> = Vec::with_capacity(self.count * 3);
        self.diagram.get_nodes(|a, b, c| {
            candidates.push((a.min(b), a.max(b)));
            candidates.push((b.min(c), b.max(c)));
            candidates.push((a.min(c), a.max(c)));
        });
        candidates.sort_unstable();
        candidates.dedup();

        for (a, b) in candidates {
            let d = self.position[b] - self.position[a];
            let dist_sq = d.length_squared();
            if dist_sq >= diameter * diameter || dist_sq <= 0.0 {
                continue;
            }
            let dist = dist_sq.sqrt();
            self.contacts.push(ParticleContact {
                index_a: a,
                index_b: b,
                weight: 1.0 - dist / diameter,
                normal: d * (1.0 / dist),
            });
        }
    }

    /// Rebuild the particle-body contact list by querying the broad-phase
    /// for fixtures near the particle cloud.
    fn update_body_contacts(
        &mut self,
        bodies: &[Option<Body>],
        fixtures: &[Option<Fixture>],
        broad_phase: &BroadPhase,
    ) {
        self.body_contacts.clear();
        let mut aabb = Aabb::new(self.position[0], self.position[0]);
        for p in self.position.iter().take(self.count).skip(1) {
            aabb.lower = aabb.lower.min(*p);
            aabb.upper = aabb.upper.max(*p);
        }
        let aabb = aabb.extend(self.diameter());

        let mut hits: Vec<(FixtureHandle, usize)> = Vec::new();
        broad_phase.query(&aabb, |proxy_id| {
            hits.push(unpack_proxy(broad_phase.user_data(proxy_id)));
            true
        });
        hits.sort_unstable_by_key(|(f, c)| (f.0, *c));
        hits.dedup();

        let inv_mass = self.inverse_particle_mass();
        let mass = self.particle_mass();
        for (fixture_handle, child) in hits {
            let Some(fixture) = fixtures.get(fixture_handle.0 as usize).and_then(Option::as_ref)
            else {
                continue;
            };
            if fixture.is_sensor() {
                continue;
            }
            let Some(body) = bodies.get(fixture.body().0 as usize).and_then(Option::as_ref)
            else {
                continue;
            };
            let xf = *body.transform();
            let fixture_aabb = fixture.compute_aabb(&xf, child).extend(self.radius);
            let proxy = DistanceProxy::from_shape(fixture.shape(), child);

            for i in 0..self.count {
                let p = self.position[i];
                if !fixture_aabb.contains(&Aabb::new(p, p)) {
                    continue;
                }
                let point = Shape::Circle(CircleShape {
                    position: Vec2::ZERO,
                    radius: 0.0,
                });
                let input = DistanceInput {
                    proxy_a: proxy,
                    proxy_b: DistanceProxy::from_shape(&point, 0),
                    transform_a: xf,
                    transform_b: Transform::new(p, 0.0),
                    use_radii: true,
                };
                let mut cache = SimplexCache::default();
                let output = distance(&mut cache, &input);
                if output.distance >= self.radius {
                    continue;
                }
                let mut normal = p - output.point_a;
                let len = normal.normalize_and_length();
                if len <= f32::EPSILON {
                    // Deep overlap: push out along the body-to-particle
                    // direction, falling back to up.
                    normal = p - body.world_center();
                    if normal.normalize_and_length() <= f32::EPSILON {
                        normal = Vec2::new(0.0, 1.0);
                    }
                }
                let rn = (p - body.world_center()).cross(normal);
                let inv_body = body.inv_mass + body.inv_inertia * rn * rn;
                let contact_mass = if inv_mass + inv_body > 0.0 {
                    1.0 / (inv_mass + inv_body)
                } else {
                    mass
                };
                self.body_contacts.push(ParticleBodyContact {
                    index: i,
                    body: fixture.body(),
                    fixture: fixture_handle,
                    weight: 1.0 - output.distance / self.radius,
                    normal,
                    mass: contact_mass,
                });
            }
        }
    }

    fn compute_weights(&mut self) {
        for w in self.weight.iter_mut().take(self.count) {
            *w = 0.0;
        }
        for c in &self.body_contacts {
            self.weight[c.index] += c.weight;
        }
        for c in &self.contacts {
            self.weight[c.index_a] += c.weight;
            self.weight[c.index_b] += c.weight;
        }
    }

    /// Relax density errors: pressure grows linearly with accumulated
    /// contact weight above the rest weight of one.
    fn solve_pressure(&mut self, step: &SolverStep, bodies: &mut [Option<Body>]) {
        let pressure_per_weight = PRESSURE_STRENGTH * self.critical_pressure(step);
        let max_pressure = 0.25 * self.critical_pressure(step);
        for i in 0..self.count {
            let w = self.weight[i];
            let h = pressure_per_weight * (w - 1.0).max(0.0);
            self.accumulation[i] = h.min(max_pressure);
        }
        let velocity_per_pressure = step.dt / (self.density * self.diameter());
        let inv_mass = self.inverse_particle_mass();

        for c in &self.body_contacts {
            let i = c.index;
            let h = self.accumulation[i] + pressure_per_weight * c.weight;
            let f = c.normal * (velocity_per_pressure * c.weight * c.mass * h);
            self.velocity[i] += f * inv_mass;
            if let Some(body) = bodies.get_mut(c.body.0 as usize).and_then(Option::as_mut) {
                body.apply_linear_impulse(-f, self.position[i]);
            }
        }
        for c in &self.contacts {
            let h = self.accumulation[c.index_a] + self.accumulation[c.index_b];
            let f = c.normal * (velocity_per_pressure * c.weight * h);
            self.velocity[c.index_a] -= f;
            self.velocity[c.index_b] += f;
        }
    }

    /// Kill approach velocity along contact normals.
    fn solve_damping(&mut self, bodies: &mut [Option<Body>]) {
        let inv_mass = self.inverse_particle_mass();
        for c in &self.body_contacts {
            let i = c.index;
            let Some(body) = bodies.get_mut(c.body.0 as usize).and_then(Option::as_mut) else {
                continue;
            };
            let v = body.velocity_at_world_point(self.position[i]) - self.velocity[i];
            let vn = v.dot(c.normal);
            if vn < 0.0 {
                let f = c.normal * (DAMPING_STRENGTH * c.weight * c.mass * vn);
                self.velocity[i] += f * inv_mass;
                body.apply_linear_impulse(-f, self.position[i]);
            }
        }
        for c in &self.contacts {
            let v = self.velocity[c.index_b] - self.velocity[c.index_a];
            let vn = v.dot(c.normal);
            if vn < 0.0 {
                let f = c.normal * (DAMPING_STRENGTH * c.weight * vn);
                self.velocity[c.index_a] += f;
                self.velocity[c.index_b] -= f;
            }
        }
    }

    /// Pairwise springs toward the creation-time rest distance.
    fn solve_spring(&mut self) {
        for pair in &self.pairs {
            let a = pair.index_a;
            let b = pair.index_b;
            let d = self.position[b] - self.position[a];
            let r1 = d.length();
            if r1 <= f32::EPSILON {
                continue;
            }
            let strength = SPRING_STRENGTH * pair.strength;
            let f = d * (strength * (r1 - pair.distance) / r1);
            self.velocity[a] += f;
            self.velocity[b] -= f;
        }
    }

    /// Shape matching: rotate each triad's rest configuration to best fit
    /// the current one, then steer the particles toward it.
    fn solve_elastic(&mut self) {
        for triad in &self.triads {
            let (a, b, c) = (triad.index_a, triad.index_b, triad.index_c);
            let mid = (self.position[a] + self.position[b] + self.position[c]) * (1.0 / 3.0);
            let pa = self.position[a] - mid;
            let pb = self.position[b] - mid;
            let pc = self.position[c] - mid;
            // Optimal rotation from rest to current, from the cross/dot
            // sums of corresponding point pairs.
            let mut s = triad.pa.cross(pa) + triad.pb.cross(pb) + triad.pc.cross(pc);
            let mut co = triad.pa.dot(pa) + triad.pb.dot(pb) + triad.pc.dot(pc);
            let norm = (s * s + co * co).sqrt();
            if norm <= f32::EPSILON {
                continue;
            }
            s /= norm;
            co /= norm;
            let r = Rot { s, c: co };
            let strength = ELASTIC_STRENGTH * triad.strength;
            self.velocity[a] += (r.apply(triad.pa) + mid - self.position[a]) * strength;
            self.velocity[b] += (r.apply(triad.pb) + mid - self.position[b]) * strength;
            self.velocity[c] += (r.apply(triad.pc) + mid - self.position[c]) * strength;
        }
    }

    /// Surface tension for tensile particles: pull toward the local
    /// density gradient so free surfaces minimize.
    fn solve_tensile(&mut self, step: &SolverStep) {
        for v in self.accumulation2.iter_mut().take(self.count) {
            *v = Vec2::ZERO;
        }
        let both = |flags: &[ParticleFlags], a: usize, b: usize| {
            flags[a].contains(ParticleFlags::TENSILE) && flags[b].contains(ParticleFlags::TENSILE)
        };
        for c in &self.contacts {
            if !both(&self.flags, c.index_a, c.index_b) {
                continue;
            }
            let w = (1.0 - c.weight) * c.weight;
            self.accumulation2[c.index_a] -= c.normal * w;
            self.accumulation2[c.index_b] += c.normal * w;
        }
        let critical = self.critical_velocity(step);
        let pressure_strength = TENSILE_PRESSURE_STRENGTH * critical;
        let normal_strength = TENSILE_NORMAL_STRENGTH * critical;
        let max_velocity = 0.5 * critical;
        for c in &self.contacts {
            if !both(&self.flags, c.index_a, c.index_b) {
                continue;
            }
            let h = self.weight[c.index_a] + self.weight[c.index_b];
            let s = self.accumulation2[c.index_b] - self.accumulation2[c.index_a];
            let fn_ = (pressure_strength * (h - 2.0) + normal_strength * s.dot(c.normal))
                .min(max_velocity)
                * c.weight;
            let f = c.normal * fn_;
            self.velocity[c.index_a] -= f;
            self.velocity[c.index_b] += f;
        }
    }

    /// Velocity smoothing for viscous particles, including against
    /// contacting bodies.
    fn solve_viscous(&mut self, bodies: &mut [Option<Body>]) {
        let inv_mass = self.inverse_particle_mass();
        for c in &self.body_contacts {
            let i = c.index;
            if !self.flags[i].contains(ParticleFlags::VISCOUS) {
                continue;
            }
            let Some(body) = bodies.get_mut(c.body.0 as usize).and_then(Option::as_mut) else {
                continue;
            };
            let v = body.velocity_at_world_point(self.position[i]) - self.velocity[i];
            let f = v * (VISCOUS_STRENGTH * c.weight * c.mass);
            self.velocity[i] += f * inv_mass;
            body.apply_linear_impulse(-f, self.position[i]);
        }
        for c in &self.contacts {
            if !self.flags[c.index_a].contains(ParticleFlags::VISCOUS)
                || !self.flags[c.index_b].contains(ParticleFlags::VISCOUS)
            {
                continue;
            }
            let v = self.velocity[c.index_b] - self.velocity[c.index_a];
            let f = v * (VISCOUS_STRENGTH * c.weight);
            self.velocity[c.index_a] += f;
            self.velocity[c.index_b] -= f;
        }
    }

    /// Anti-clumping repulsion for powder particles in close contact.
    fn solve_powder(&mut self, step: &SolverStep) {
        let strength = POWDER_STRENGTH * self.critical_velocity(step);
        for c in &self.contacts {
            if !self.flags[c.index_a].contains(ParticleFlags::POWDER)
                || !self.flags[c.index_b].contains(ParticleFlags::POWDER)
            {
                continue;
            }
            if c.weight > MIN_POWDER_WEIGHT {
                let f = c.normal * (strength * (c.weight - MIN_POWDER_WEIGHT));
                self.velocity[c.index_a] -= f;
                self.velocity[c.index_b] += f;
            }
        }
    }

    fn solve_color_mixing(&mut self) {
        let strength = (128.0 * COLOR_MIXING_STRENGTH) as i32;
        for c in &self.contacts {
            let (a, b) = (c.index_a, c.index_b);
            if self.flags[a].contains(ParticleFlags::COLOR_MIXING)
                && self.flags[b].contains(ParticleFlags::COLOR_MIXING)
            {
                let (left, right) = self.color.split_at_mut(b);
                left[a].mix(&mut right[0], strength);
            }
        }
    }

    /// Compact zombie particles out of the buffers by swapping each one
    /// with the current last particle. Pairs and triads touching a
    /// removed particle are dropped; survivors are remapped.
    fn solve_zombie(&mut self, destruction: &mut dyn DestructionListener) {
        // old index -> new index, usize::MAX when destroyed
        let mut new_index: Vec<usize> = (0..self.count).collect();
        let mut i = 0;
        while i < self.count {
            if self.flags[i].contains(ParticleFlags::ZOMBIE) {
                destruction.particle_destroyed(i);
                let last = self.count - 1;
                self.position.swap(i, last);
                self.velocity.swap(i, last);
                self.flags.swap(i, last);
                self.color.swap(i, last);
                self.group.swap(i, last);
                self.weight.swap(i, last);
                self.accumulation.swap(i, last);
                self.accumulation2.swap(i, last);
                // Mark the zombie dead before remapping the swapped-in
                // particle; when the zombie is already last the two
                // indices coincide and the dead mark must win.
                for n in new_index.iter_mut() {
                    if *n == i {
                        *n = usize::MAX;
                    } else if *n == last {
                        *n = i;
                    }
                }
                self.position.truncate(last);
                self.velocity.truncate(last);
                self.flags.truncate(last);
                self.color.truncate(last);
                self.group.truncate(last);
                self.weight.truncate(last);
                self.accumulation.truncate(last);
                self.accumulation2.truncate(last);
                self.count = last;
            } else {
                i += 1;
            }
        }

        self.pairs.retain_mut(|p| {
            let a = new_index[p.index_a];
            let b = new_index[p.index_b];
            if a == usize::MAX || b == usize::MAX {
                return false;
            }
            p.index_a = a.min(b);
            p.index_b = a.max(b);
            true
        });
        self.triads.retain_mut(|t| {
            let a = new_index[t.index_a];
            let b = new_index[t.index_b];
            let c = new_index[t.index_c];
            if a == usize::MAX || b == usize::MAX || c == usize::MAX {
                return false;
            }
            t.index_a = a;
            t.index_b = b;
            t.index_c = c;
            true
        });
        // Contact lists are rebuilt next step; drop stale entries now so
        // accessors never expose dead indices.
        self.contacts.clear();
        self.body_contacts.clear();

        // Recompute the live flag union.
        let mut all = ParticleFlags::WATER;
        for f in self.flags.iter().take(self.count) {
            all |= *f;
        }
        self.all_flags = all;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullDestructionListener;
    use crate::shape::PolygonShape;

    fn step_1_60() -> SolverStep {
        SolverStep {
            dt: 1.0 / 60.0,
            inv_dt: 60.0,
            dt_ratio: 1.0,
            velocity_iterations: 8,
            position_iterations: 3,
            warm_starting: true,
        }
    }

    fn solve_isolated(system: &mut ParticleSystem, step: &SolverStep, gravity: Vec2) {
        let mut bodies: Vec<Option<Body>> = Vec::new();
        let fixtures: Vec<Option<Fixture>> = Vec::new();
        let broad_phase = BroadPhase::new();
        let mut listener = NullDestructionListener;
        system.solve(step, gravity, &mut bodies, &fixtures, &broad_phase, &mut listener);
    }

    #[test]
    fn test_flags_combine() {
        let mut f = ParticleFlags::SPRING | ParticleFlags::COLOR_MIXING;
        assert!(f.contains(ParticleFlags::SPRING));
        assert!(f.contains(ParticleFlags::COLOR_MIXING));
        assert!(!f.contains(ParticleFlags::ZOMBIE));
        f.remove(ParticleFlags::SPRING);
        assert!(!f.contains(ParticleFlags::SPRING));
    }

    #[test]
    fn test_create_particle_grows_buffers() {
        let mut system = ParticleSystem::new();
        let i = system.create_particle(&ParticleDef {
            position: Vec2::new(1.0, 2.0),
            ..ParticleDef::default()
        });
        assert_eq!(i, 0);
        assert_eq!(system.particle_count(), 1);
        assert_eq!(system.position_buffer()[0], Vec2::new(1.0, 2.0));
        assert_eq!(system.weight_buffer().len(), 1);
    }

    #[test]
    fn test_gravity_integrates_into_velocity_and_position() {
        let mut system = ParticleSystem::new();
        system.create_particle(&ParticleDef::default());
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::new(0.0, -10.0));
        let v = system.velocity_buffer()[0];
        assert!((v.y + 10.0 * step.dt).abs() < 1e-6, "Gravity applied to velocity");
        let p = system.position_buffer()[0];
        assert!(p.y < 0.0, "Position integrated after velocity");
    }

    #[test]
    fn test_close_particles_generate_contact() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        system.create_particle(&ParticleDef::default());
        system.create_particle(&ParticleDef {
            position: Vec2::new(0.6, 0.0),
            ..ParticleDef::default()
        });
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        assert_eq!(system.contacts().len(), 1, "One overlapping pair");
        let c = system.contacts()[0];
        assert!((c.weight - (1.0 - 0.6 / 1.0)).abs() < 1e-5, "Weight is 1 - d/diameter");
        assert!((c.normal.x - 1.0).abs() < 1e-5, "Normal points from a to b");
    }

    #[test]
    fn test_pressure_pushes_overlapping_particles_apart() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        // Tight cluster so weights exceed the rest weight.
        for k in 0..5 {
            system.create_particle(&ParticleDef {
                position: Vec2::new(0.1 * k as f32, 0.0),
                ..ParticleDef::default()
            });
        }
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        let left = system.velocity_buffer()[0];
        let right = system.velocity_buffer()[4];
        assert!(left.x < 0.0, "Leftmost particle pushed left, got {}", left.x);
        assert!(right.x > 0.0, "Rightmost particle pushed right, got {}", right.x);
    }

    #[test]
    fn test_wall_particles_do_not_move() {
        let mut system = ParticleSystem::new();
        system.create_particle(&ParticleDef {
            flags: ParticleFlags::WALL,
            position: Vec2::new(3.0, 4.0),
            ..ParticleDef::default()
        });
        let step = step_1_60();
        for _ in 0..10 {
            solve_isolated(&mut system, &step, Vec2::new(0.0, -10.0));
        }
        assert_eq!(system.position_buffer()[0], Vec2::new(3.0, 4.0), "Wall particles are pinned");
    }

    #[test]
    fn test_zombie_compaction_preserves_survivors() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        for k in 0..4 {
            system.create_particle(&ParticleDef {
                position: Vec2::new(10.0 * k as f32, 0.0),
                ..ParticleDef::default()
            });
        }
        system.destroy_particle(1);
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        assert_eq!(system.particle_count(), 3, "One particle removed");
        let xs: Vec<f32> = system.position_buffer().iter().map(|p| p.x).collect();
        assert!(!xs.iter().any(|x| (*x - 10.0).abs() < 1.0), "Flagged particle is gone");
        for survivor in [0.0_f32, 20.0, 30.0] {
            assert!(
                xs.iter().any(|x| (*x - survivor).abs() < 1.0),
                "Survivor near x={survivor} kept"
            );
        }
    }

    #[test]
    fn test_zombie_notifies_destruction_listener() {
        struct Recorder {
            destroyed: usize,
        }
        impl DestructionListener for Recorder {
            fn particle_destroyed(&mut self, _index: usize) {
                self.destroyed += 1;
            }
        }
        let mut system = ParticleSystem::new();
        for _ in 0..3 {
            system.create_particle(&ParticleDef::default());
        }
        system.destroy_particle(0);
        system.destroy_particle(2);
        let mut bodies: Vec<Option<Body>> = Vec::new();
        let fixtures: Vec<Option<Fixture>> = Vec::new();
        let broad_phase = BroadPhase::new();
        let mut recorder = Recorder { destroyed: 0 };
        let step = step_1_60();
        system.solve(&step, Vec2::ZERO, &mut bodies, &fixtures, &broad_phase, &mut recorder);
        assert_eq!(recorder.destroyed, 2, "Listener saw both removals");
        assert_eq!(system.particle_count(), 1);
    }

    #[test]
    fn test_group_lattice_fills_shape() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let shape = Shape::Polygon(PolygonShape::new_box(2.0, 2.0).unwrap());
        let handle = system.create_particle_group(&ParticleGroupDef::new(shape));
        assert!(system.particle_count() > 9, "A 4x4 box holds a lattice of particles");
        for g in system.group_buffer() {
            assert_eq!(*g, handle.0, "All created particles belong to the group");
        }
        for p in system.position_buffer() {
            assert!(p.x.abs() <= 2.0 && p.y.abs() <= 2.0, "Lattice stays inside the shape");
        }
    }

    #[test]
    fn test_group_statistics_center_and_mass() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let shape = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let mut def = ParticleGroupDef::new(shape);
        def.position = Vec2::new(5.0, 0.0);
        def.linear_velocity = Vec2::new(2.0, 0.0);
        let handle = system.create_particle_group(&def);
        let n = system.particle_count() as f32;
        let mass = system.group_mass(handle).unwrap();
        assert!((mass - n * system.particle_mass()).abs() < 1e-4, "Group mass is count * particle mass");
        let center = system.group_center(handle).unwrap();
        assert!((center.x - 5.0).abs() < 0.5, "Center near the group origin, got {}", center.x);
        let v = system.group_linear_velocity(handle).unwrap();
        assert!((v.x - 2.0).abs() < 1e-5, "Uniform velocity is the average");
    }

    #[test]
    fn test_join_groups_merges_membership() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let box_shape = || Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let a = system.create_particle_group(&ParticleGroupDef::new(box_shape()));
        let mut def_b = ParticleGroupDef::new(box_shape());
        def_b.position = Vec2::new(10.0, 0.0);
        let b = system.create_particle_group(&def_b);
        system.join_particle_groups(a, b);
        assert!(system.group(b).is_none(), "Joined group is freed");
        for g in system.group_buffer() {
            assert_eq!(*g, a.0, "Every particle now belongs to the surviving group");
        }
    }

    #[test]
    fn test_destroy_particles_in_shape() {
        let mut system = ParticleSystem::new();
        system.create_particle(&ParticleDef {
            position: Vec2::new(0.0, 0.0),
            ..ParticleDef::default()
        });
        system.create_particle(&ParticleDef {
            position: Vec2::new(100.0, 0.0),
            ..ParticleDef::default()
        });
        let shape = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let flagged = system.destroy_particles_in_shape(&shape, &Transform::IDENTITY);
        assert_eq!(flagged, 1, "Only the particle inside the box is flagged");
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        assert_eq!(system.particle_count(), 1);
        assert!((system.position_buffer()[0].x - 100.0).abs() < 1.0);
    }

    #[test]
    fn test_spring_group_resists_stretch() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let shape = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let mut def = ParticleGroupDef::new(shape);
        def.flags = ParticleFlags::SPRING;
        system.create_particle_group(&def);
        assert!(!system.pairs.is_empty(), "Spring group builds pairs");
        // Stretch: move the first particle away from its neighbours.
        system.position[0] += Vec2::new(-1.0, 0.0);
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        assert!(
            system.velocity_buffer()[0].x > 0.0,
            "Stretched spring pulls the particle back, got {}",
            system.velocity_buffer()[0].x
        );
    }

    #[test]
    fn test_destroying_last_spring_particle_keeps_pairs_in_range() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let shape = Shape::Polygon(PolygonShape::new_box(1.0, 1.0).unwrap());
        let mut def = ParticleGroupDef::new(shape);
        def.flags = ParticleFlags::SPRING;
        system.create_particle_group(&def);
        let n = system.particle_count();
        assert!(!system.pairs.is_empty(), "Spring group builds pairs");

        // Removing the highest index makes the compaction swap a no-op;
        // the dead slot must still drop out of the remap.
        system.destroy_particle(n - 1);
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::new(0.0, -10.0));
        assert_eq!(system.particle_count(), n - 1);
        for pair in &system.pairs {
            assert!(
                pair.index_a < system.particle_count() && pair.index_b < system.particle_count(),
                "Pair ({}, {}) out of range after compacting to {}",
                pair.index_a,
                pair.index_b,
                system.particle_count()
            );
        }
        // The next spring pass walks the remapped pairs.
        solve_isolated(&mut system, &step, Vec2::new(0.0, -10.0));
        assert_eq!(system.particle_count(), n - 1);
    }

    #[test]
    fn test_elastic_group_builds_triads() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        let shape = Shape::Polygon(PolygonShape::new_box(1.5, 1.5).unwrap());
        let mut def = ParticleGroupDef::new(shape);
        def.flags = ParticleFlags::ELASTIC;
        system.create_particle_group(&def);
        assert!(!system.triads.is_empty(), "Elastic group builds triads");
    }

    #[test]
    fn test_color_mixing_conserves_channel_total() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        system.create_particle(&ParticleDef {
            flags: ParticleFlags::COLOR_MIXING,
            color: ParticleColor::new(0, 0, 0, 255),
            ..ParticleDef::default()
        });
        system.create_particle(&ParticleDef {
            flags: ParticleFlags::COLOR_MIXING,
            position: Vec2::new(0.5, 0.0),
            color: ParticleColor::new(200, 0, 0, 255),
            ..ParticleDef::default()
        });
        let before: i32 =
            i32::from(system.color_buffer()[0].r) + i32::from(system.color_buffer()[1].r);
        let step = step_1_60();
        solve_isolated(&mut system, &step, Vec2::ZERO);
        let c0 = system.color_buffer()[0];
        let c1 = system.color_buffer()[1];
        assert!(c0.r > 0, "Red bled into the black particle");
        assert_eq!(i32::from(c0.r) + i32::from(c1.r), before, "Channel total conserved");
    }

    #[test]
    fn test_particle_count_conserved_without_zombies() {
        let mut system = ParticleSystem::new();
        system.set_radius(0.5);
        for k in 0..20 {
            system.create_particle(&ParticleDef {
                position: Vec2::new(0.3 * k as f32, 0.0),
                ..ParticleDef::default()
            });
        }
        let step = step_1_60();
        for _ in 0..30 {
            solve_isolated(&mut system, &step, Vec2::new(0.0, -10.0));
        }
        assert_eq!(system.particle_count(), 20, "Stepping never changes the count");
    }
}
