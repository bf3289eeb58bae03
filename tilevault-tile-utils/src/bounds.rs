use std::fmt;

use serde::{Deserialize, Serialize};

/// Latitude beyond which the spherical-Mercator projection degenerates.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Half the extent of the spherical-Mercator plane, in meters.
const HALF_MERCATOR_WORLD: f64 = 20_037_508.342_789_244;

/// Spatial reference system identifier.
///
/// Only the two systems this subsystem can derive coverage for get their own
/// variant; anything else is carried opaquely and rejected at coverage
/// derivation time (a per-layer configuration error, not a crash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Srs {
    /// Geographic WGS84, degrees, longitude first.
    Epsg4326,
    /// Spherical ("web") Mercator, meters.
    Epsg3857,
    /// Any other EPSG code. Coverage derivation for these is unsupported.
    Other(u32),
}

impl Srs {
    /// The numeric EPSG code.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Epsg4326 => 4326,
            Self::Epsg3857 => 3857,
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for Srs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code())
    }
}

/// An axis-aligned rectangle in the units of some [`Srs`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Smallest x ordinate (west).
    pub min_x: f64,
    /// Smallest y ordinate (south).
    pub min_y: f64,
    /// Largest x ordinate (east).
    pub max_x: f64,
    /// Largest y ordinate (north).
    pub max_y: f64,
}

impl BoundingBox {
    /// Creates a bounding box from its four ordinates.
    #[must_use]
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Width of the box, zero for degenerate boxes.
    #[must_use]
    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0)
    }

    /// Height of the box, zero for degenerate boxes.
    #[must_use]
    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.0)
    }

    /// Whether the box covers no area.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_x <= self.min_x || self.max_y <= self.min_y
    }

    /// Whether `other` overlaps this box by any area.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersection(other).is_empty()
    }

    /// The overlap of the two boxes; empty when they are disjoint.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        }
    }

    /// Grows the box by `margin` units on each side where the corresponding
    /// flag is set. Used for gutter expansion at metatile edges.
    #[must_use]
    pub fn expanded(
        &self,
        margin: f64,
        (left, bottom, right, top): (bool, bool, bool, bool),
    ) -> Self {
        Self {
            min_x: self.min_x - if left { margin } else { 0.0 },
            min_y: self.min_y - if bottom { margin } else { 0.0 },
            max_x: self.max_x + if right { margin } else { 0.0 },
            max_y: self.max_y + if top { margin } else { 0.0 },
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6},{:.6},{:.6},{:.6}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Projects a geographic (lon/lat, degrees) box onto the spherical-Mercator
/// plane. Latitudes are clamped to [`MAX_MERCATOR_LATITUDE`] first, so a
/// whole-world box maps onto the whole Mercator square instead of infinity.
#[must_use]
pub fn wgs84_to_mercator(bbox: &BoundingBox) -> BoundingBox {
    BoundingBox {
        min_x: lon_to_mercator(bbox.min_x),
        min_y: lat_to_mercator(bbox.min_y),
        max_x: lon_to_mercator(bbox.max_x),
        max_y: lat_to_mercator(bbox.max_y),
    }
}

fn lon_to_mercator(lon: f64) -> f64 {
    lon.clamp(-180.0, 180.0) * HALF_MERCATOR_WORLD / 180.0
}

fn lat_to_mercator(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let rad = (90.0 + lat).to_radians() / 2.0;
    rad.tan().ln() * HALF_MERCATOR_WORLD / std::f64::consts::PI
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn whole_world_maps_to_mercator_square() {
        let world = BoundingBox::new(-180.0, -90.0, 180.0, 90.0);
        let projected = wgs84_to_mercator(&world);
        assert_relative_eq!(projected.min_x, -HALF_MERCATOR_WORLD, epsilon = 1e-6);
        assert_relative_eq!(projected.max_x, HALF_MERCATOR_WORLD, epsilon = 1e-6);
        // The clamp keeps y finite and symmetric
        assert_relative_eq!(projected.min_y, -projected.max_y, epsilon = 1e-6);
        assert_relative_eq!(projected.max_y, HALF_MERCATOR_WORLD, epsilon = 1.0);
    }

    #[test]
    fn equator_maps_to_zero() {
        let line = BoundingBox::new(-10.0, 0.0, 10.0, 0.0);
        let projected = wgs84_to_mercator(&line);
        assert_relative_eq!(projected.min_y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(projected.max_y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn disjoint_boxes_do_not_intersect() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(2.0, 2.0, 3.0, 3.0);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn intersection_is_commutative() {
        let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
        let b = BoundingBox::new(1.0, 1.0, 3.0, 3.0);
        assert_eq!(a.intersection(&b), b.intersection(&a));
        assert_eq!(a.intersection(&b), BoundingBox::new(1.0, 1.0, 2.0, 2.0));
    }
}
