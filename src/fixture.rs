//! Fixtures
//!
//! A fixture binds a shape to a body, carrying the non-geometric
//! material: density, friction, restitution, sensor flag, and collision
//! filter. Each fixture owns one broadphase proxy per shape child
//! (chains have one per segment).

use crate::body::BodyHandle;
use crate::math::{Aabb, Transform};
use crate::shape::{MassData, Shape};

/// Collision filtering data.
///
/// Two fixtures collide when their category/mask bits cross-match, or
/// unconditionally (never) when they share a positive (negative) group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Filter {
    /// What this fixture is (one-hot by convention)
    pub category_bits: u16,
    /// What this fixture collides with
    pub mask_bits: u16,
    /// Same positive group: always collide. Same negative group: never.
    pub group_index: i16,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            category_bits: 0x0001,
            mask_bits: 0xFFFF,
            group_index: 0,
        }
    }
}

impl Filter {
    /// Should fixtures with these filters generate contacts?
    #[must_use]
    pub fn should_collide(&self, other: &Filter) -> bool {
        if self.group_index == other.group_index && self.group_index != 0 {
            return self.group_index > 0;
        }
        (self.mask_bits & other.category_bits) != 0
            && (self.category_bits & other.mask_bits) != 0
    }
}

/// Fixture construction parameters.
#[derive(Clone, Debug)]
pub struct FixtureDef {
    pub shape: Shape,
    /// Mass per area (kg/m^2)
    pub density: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Sensors detect overlap but produce no collision response
    pub is_sensor: bool,
    pub filter: Filter,
    pub user_data: u64,
}

impl FixtureDef {
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            density: 1.0,
            friction: 0.2,
            restitution: 0.0,
            is_sensor: false,
            filter: Filter::default(),
            user_data: 0,
        }
    }
}

/// One broadphase proxy (a chain fixture carries several).
#[derive(Clone, Copy, Debug)]
pub(crate) struct FixtureProxy {
    /// Tight AABB at proxy creation/refresh time
    pub aabb: Aabb,
    /// Id in the broadphase tree
    pub proxy_id: u32,
    /// Shape child index
    pub child_index: usize,
}

/// A shape attached to a body.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub(crate) body: BodyHandle,
    pub(crate) shape: Shape,
    pub(crate) density: f32,
    pub(crate) friction: f32,
    pub(crate) restitution: f32,
    pub(crate) is_sensor: bool,
    pub(crate) filter: Filter,
    pub(crate) user_data: u64,
    pub(crate) proxies: Vec<FixtureProxy>,
}

impl Fixture {
    pub(crate) fn new(body: BodyHandle, def: &FixtureDef) -> Self {
        Self {
            body,
            shape: def.shape.clone(),
            density: def.density,
            friction: def.friction,
            restitution: def.restitution,
            is_sensor: def.is_sensor,
            filter: def.filter,
            user_data: def.user_data,
            proxies: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    #[must_use]
    pub fn density(&self) -> f32 {
        self.density
    }

    #[inline]
    #[must_use]
    pub fn friction(&self) -> f32 {
        self.friction
    }

    #[inline]
    #[must_use]
    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    #[inline]
    #[must_use]
    pub fn is_sensor(&self) -> bool {
        self.is_sensor
    }

    #[inline]
    #[must_use]
    pub fn filter(&self) -> Filter {
        self.filter
    }

    #[inline]
    #[must_use]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    /// Mass properties of the attached shape at this fixture's density.
    #[must_use]
    pub fn mass_data(&self) -> MassData {
        self.shape.compute_mass(self.density)
    }

    /// Tight AABB of one child at a transform.
    #[must_use]
    pub fn compute_aabb(&self, xf: &Transform, child: usize) -> Aabb {
        self.shape.compute_aabb(xf, child)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::CircleShape;

    #[test]
    fn test_default_filter_collides() {
        let a = Filter::default();
        let b = Filter::default();
        assert!(a.should_collide(&b));
    }

    #[test]
    fn test_category_mask_filtering() {
        let player = Filter {
            category_bits: 0x0002,
            mask_bits: 0x0004, // collides only with walls
            group_index: 0,
        };
        let wall = Filter {
            category_bits: 0x0004,
            mask_bits: 0xFFFF,
            group_index: 0,
        };
        let enemy = Filter {
            category_bits: 0x0008,
            mask_bits: 0xFFFF,
            group_index: 0,
        };
        assert!(player.should_collide(&wall));
        assert!(!player.should_collide(&enemy), "Mask excludes the enemy bit");
    }

    #[test]
    fn test_group_overrides_masks() {
        let mut a = Filter::default();
        let mut b = Filter::default();
        a.mask_bits = 0; // would never collide by mask
        b.mask_bits = 0;

        a.group_index = 3;
        b.group_index = 3;
        assert!(a.should_collide(&b), "Positive shared group forces collision");

        a.group_index = -3;
        b.group_index = -3;
        assert!(!a.should_collide(&b), "Negative shared group forbids collision");
    }

    #[test]
    fn test_fixture_mass_scales_with_density() {
        let shape = Shape::Circle(CircleShape::new(1.0).unwrap());
        let mut def = FixtureDef::new(shape);
        def.density = 2.0;
        let fixture = Fixture::new(BodyHandle(0), &def);
        let md = fixture.mass_data();
        assert!(
            (md.mass - 2.0 * core::f32::consts::PI).abs() < 1e-4,
            "mass = density * pi * r^2"
        );
    }
}
