//! Geometry primitives shared by the device and motion models

use serde::{Deserialize, Serialize};

/// A point in 3D space
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn from_array(arr: [f64; 3]) -> Self {
        Self::new(arr[0], arr[1], arr[2])
    }

    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// A device position: 3D location plus pan and tilt of the head
///
/// Serialized as `{x, y, z, p, t}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point5 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(rename = "p")]
    pub pan: f64,
    #[serde(rename = "t")]
    pub tilt: f64,
}

impl Point5 {
    pub const fn new(x: f64, y: f64, z: f64, pan: f64, tilt: f64) -> Self {
        Self { x, y, z, pan, tilt }
    }

    pub fn from_array(arr: [f64; 5]) -> Self {
        Self::new(arr[0], arr[1], arr[2], arr[3], arr[4])
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.x, self.y, self.z, self.pan, self.tilt]
    }

    /// The translational part of the position
    pub fn location(&self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// Axis-aligned box bounding every point it has been extended with
///
/// A fresh box is degenerate (`lower` = +inf, `upper` = -inf) and only ever
/// grows. Once a point has been added, `lower <= upper` holds per component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lower: Point3,
    pub upper: Point3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// Create a degenerate box containing nothing
    pub const fn empty() -> Self {
        Self {
            lower: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            upper: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Build the smallest box containing all `points`
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut bbox = Self::empty();
        for p in points {
            bbox.extend(p);
        }
        bbox
    }

    /// Grow the box so it contains `point`
    pub fn extend(&mut self, point: &Point3) {
        self.lower = Point3::new(
            self.lower.x.min(point.x),
            self.lower.y.min(point.y),
            self.lower.z.min(point.z),
        );
        self.upper = Point3::new(
            self.upper.x.max(point.x),
            self.upper.y.max(point.y),
            self.upper.z.max(point.z),
        );
    }

    /// True until the first point has been added
    pub fn is_empty(&self) -> bool {
        self.lower.x > self.upper.x || self.lower.y > self.upper.y || self.lower.z > self.upper.z
    }

    /// Check whether `point` lies inside the box (inclusive on faces)
    pub fn contains(&self, point: &Point3) -> bool {
        !self.is_empty()
            && (self.lower.x..=self.upper.x).contains(&point.x)
            && (self.lower.y..=self.upper.y).contains(&point.y)
            && (self.lower.z..=self.upper.z).contains(&point.z)
    }

    pub fn is_finite(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite()
    }
}
