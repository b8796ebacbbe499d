//! Geometry primitives used by acoustic zones.
//!
//! Zones are either axis-aligned boxes or spheres. Both answer two questions:
//! whether a point lies inside them, and how far a point is from their
//! boundary (zero for points inside).

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, GeometryResult};

/// Axis-aligned box described by its center and half-extents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Center of the box
    pub center: Vec3,
    /// Half of the box size on each axis
    pub half_extents: Vec3,
}

impl Aabb {
    /// Creates a validated box from center and half-extents.
    pub fn new(center: Vec3, half_extents: Vec3) -> GeometryResult<Self> {
        let aabb = Self {
            center,
            half_extents,
        };
        aabb.validate()?;
        Ok(aabb)
    }

    /// Creates a validated box spanning two opposite corners.
    pub fn from_corners(a: Vec3, b: Vec3) -> GeometryResult<Self> {
        let min = a.min(b);
        let max = a.max(b);
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    /// Minimum corner.
    #[must_use]
    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    /// Maximum corner.
    #[must_use]
    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    /// Checks the box has finite values and positive extents.
    pub fn validate(&self) -> GeometryResult<()> {
        if !self.center.is_finite() || !self.half_extents.is_finite() {
            return Err(GeometryError::NonFinite);
        }
        for (axis, value) in ['x', 'y', 'z'].into_iter().zip(self.half_extents.to_array()) {
            if value <= 0.0 {
                return Err(GeometryError::NonPositiveExtent { axis, value });
            }
        }
        Ok(())
    }

    /// Whether `point` lies inside or on the box.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        let d = (point - self.center).abs();
        d.cmple(self.half_extents).all()
    }

    /// Euclidean distance from `point` to the box (0 inside).
    #[must_use]
    pub fn distance_to(&self, point: Vec3) -> f32 {
        let outside = ((point - self.center).abs() - self.half_extents).max(Vec3::ZERO);
        outside.length()
    }

    /// Box volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        let size = self.half_extents * 2.0;
        size.x * size.y * size.z
    }
}

/// Sphere described by center and radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Center of the sphere
    pub center: Vec3,
    /// Sphere radius
    pub radius: f32,
}

impl Sphere {
    /// Creates a validated sphere.
    pub fn new(center: Vec3, radius: f32) -> GeometryResult<Self> {
        let sphere = Self { center, radius };
        sphere.validate()?;
        Ok(sphere)
    }

    /// Checks the sphere has finite values and a positive radius.
    pub fn validate(&self) -> GeometryResult<()> {
        if !self.center.is_finite() || !self.radius.is_finite() {
            return Err(GeometryError::NonFinite);
        }
        if self.radius <= 0.0 {
            return Err(GeometryError::NonPositiveRadius(self.radius));
        }
        Ok(())
    }

    /// Whether `point` lies inside or on the sphere.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }

    /// Euclidean distance from `point` to the sphere surface (0 inside).
    #[must_use]
    pub fn distance_to(&self, point: Vec3) -> f32 {
        (self.center.distance(point) - self.radius).max(0.0)
    }

    /// Sphere volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        4.0 / 3.0 * std::f32::consts::PI * self.radius.powi(3)
    }
}

/// Shape of an acoustic zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ZoneGeometry {
    /// Axis-aligned box.
    Box(Aabb),
    /// Sphere.
    Sphere(Sphere),
}

impl ZoneGeometry {
    /// Creates a validated box geometry from center and half-extents.
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> GeometryResult<Self> {
        Aabb::new(center, half_extents).map(Self::Box)
    }

    /// Creates a validated sphere geometry.
    pub fn sphere(center: Vec3, radius: f32) -> GeometryResult<Self> {
        Sphere::new(center, radius).map(Self::Sphere)
    }

    /// Checks the geometry is well formed.
    pub fn validate(&self) -> GeometryResult<()> {
        match self {
            Self::Box(aabb) => aabb.validate(),
            Self::Sphere(sphere) => sphere.validate(),
        }
    }

    /// Whether `point` lies inside the geometry.
    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        match self {
            Self::Box(aabb) => aabb.contains(point),
            Self::Sphere(sphere) => sphere.contains(point),
        }
    }

    /// Distance from `point` to the geometry boundary (0 inside).
    #[must_use]
    pub fn distance_to(&self, point: Vec3) -> f32 {
        match self {
            Self::Box(aabb) => aabb.distance_to(point),
            Self::Sphere(sphere) => sphere.distance_to(point),
        }
    }

    /// Center point of the geometry.
    #[must_use]
    pub const fn center(&self) -> Vec3 {
        match self {
            Self::Box(aabb) => aabb.center,
            Self::Sphere(sphere) => sphere.center,
        }
    }

    /// Enclosed volume.
    #[must_use]
    pub fn volume(&self) -> f32 {
        match self {
            Self::Box(aabb) => aabb.volume(),
            Self::Sphere(sphere) => sphere.volume(),
        }
    }

    /// Short shape name for logging.
    #[must_use]
    pub const fn shape_name(&self) -> &'static str {
        match self {
            Self::Box(_) => "box",
            Self::Sphere(_) => "sphere",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_box_contains_and_distance() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(10.0)).expect("valid box");
        assert!(aabb.contains(Vec3::new(10.0, -10.0, 0.0)));
        assert!(!aabb.contains(Vec3::new(10.1, 0.0, 0.0)));
        assert!(aabb.distance_to(Vec3::new(5.0, 5.0, 5.0)).abs() < f32::EPSILON);
        assert!((aabb.distance_to(Vec3::new(13.0, 0.0, 0.0)) - 3.0).abs() < 1e-5);
        // Corner distance is Euclidean, not per-axis.
        assert!((aabb.distance_to(Vec3::new(13.0, 14.0, 0.0)) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_box_from_corners() {
        let aabb = Aabb::from_corners(Vec3::splat(1000.0), Vec3::splat(-1000.0)).expect("box");
        assert_eq!(aabb.center, Vec3::ZERO);
        assert_eq!(aabb.half_extents, Vec3::splat(1000.0));
        assert_eq!(aabb.min(), Vec3::splat(-1000.0));
    }

    #[test]
    fn test_sphere_contains_and_distance() {
        let sphere = Sphere::new(Vec3::new(50.0, 0.0, 50.0), 30.0).expect("valid sphere");
        assert!(sphere.contains(Vec3::new(50.0, 0.0, 50.0)));
        assert!(sphere.contains(Vec3::new(80.0, 0.0, 50.0)));
        assert!(!sphere.contains(Vec3::new(81.0, 0.0, 50.0)));
        assert!((sphere.distance_to(Vec3::new(90.0, 0.0, 50.0)) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert_eq!(
            Aabb::new(Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0)),
            Err(GeometryError::NonPositiveExtent {
                axis: 'y',
                value: 0.0
            })
        );
        assert_eq!(
            Sphere::new(Vec3::ZERO, -2.0),
            Err(GeometryError::NonPositiveRadius(-2.0))
        );
        assert_eq!(
            ZoneGeometry::sphere(Vec3::new(f32::NAN, 0.0, 0.0), 1.0),
            Err(GeometryError::NonFinite)
        );
    }

    #[test]
    fn test_geometry_serde_tag() {
        let geometry = ZoneGeometry::sphere(Vec3::ONE, 3.0).expect("sphere");
        assert_eq!(geometry.shape_name(), "sphere");
        assert_eq!(geometry.center(), Vec3::ONE);
    }

    proptest! {
        #[test]
        fn prop_distance_zero_iff_contained(
            x in -50.0f32..50.0, y in -50.0f32..50.0, z in -50.0f32..50.0
        ) {
            let p = Vec3::new(x, y, z);
            let shapes = [
                ZoneGeometry::cuboid(Vec3::new(5.0, 0.0, -5.0), Vec3::new(20.0, 10.0, 15.0)),
                ZoneGeometry::sphere(Vec3::new(-3.0, 2.0, 1.0), 25.0),
            ];
            for shape in shapes {
                let shape = shape.expect("valid shape");
                let distance = shape.distance_to(p);
                prop_assert!(distance >= 0.0);
                if shape.contains(p) {
                    prop_assert!(distance <= 1e-4);
                }
                if distance > 1e-3 {
                    prop_assert!(!shape.contains(p));
                }
            }
        }
    }
}
