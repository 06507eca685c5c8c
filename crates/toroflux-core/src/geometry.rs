//! Torus surface geometry and angle/grid conversions.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Wrap an angle into `[0, 2π)`. NaN collapses to zero.
#[must_use]
pub fn wrap_angle(angle: f64) -> f64 {
    if !angle.is_finite() {
        return 0.0;
    }
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// Angle assigned to grid index `k` on a grid of `resolution` cells.
///
/// Follows linspace spacing over `[0, 2π]` inclusive, so index `0` and
/// index `resolution - 1` sit on the same angle.
#[must_use]
pub fn grid_angle(k: usize, resolution: usize) -> f64 {
    debug_assert!(resolution >= 2);
    k as f64 * TAU / (resolution - 1) as f64
}

/// Grid index that an angle projects onto.
#[must_use]
pub fn cell_index(angle: f64, resolution: usize) -> usize {
    debug_assert!(resolution >= 2);
    let scaled = wrap_angle(angle) / TAU * (resolution - 1) as f64;
    (scaled as usize) % resolution
}

/// Cartesian point in 3D space.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Major/minor radius pair describing the embedded torus.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TorusGeometry {
    /// Distance from the torus centre to the tube centre.
    pub major_radius: f64,
    /// Tube radius.
    pub minor_radius: f64,
}

impl Default for TorusGeometry {
    fn default() -> Self {
        Self {
            major_radius: 3.0,
            minor_radius: 1.0,
        }
    }
}

impl TorusGeometry {
    #[must_use]
    pub const fn new(major_radius: f64, minor_radius: f64) -> Self {
        Self {
            major_radius,
            minor_radius,
        }
    }

    /// Map toroidal angles `(u, v)` onto the embedded surface.
    #[must_use]
    pub fn torus_coords(&self, u: f64, v: f64) -> Point3 {
        let ring = self.major_radius + self.minor_radius * v.cos();
        Point3 {
            x: ring * u.cos(),
            y: ring * u.sin(),
            z: self.minor_radius * v.sin(),
        }
    }

    /// Recover `(u, v)` in `[0, 2π)` from a point on (or near) the surface.
    #[must_use]
    pub fn angles_from_point(&self, point: &Point3) -> (f64, f64) {
        let u = point.y.atan2(point.x);
        let planar = point.x.hypot(point.y);
        let v = point.z.atan2(planar - self.major_radius);
        (wrap_angle(u), wrap_angle(v))
    }
}
