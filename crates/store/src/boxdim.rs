//! Triclinic simulation box with Cartesian/fractional coordinate conversion.
//!
//! The box is defined by per-axis edge lengths centered on the origin plus
//! three tilt factors (xy, xz, yz). Lattice vectors follow the upper-triangular
//! convention:
//!
//! ```text
//! a1 = (Lx,      0,      0)
//! a2 = (xy*Ly,   Ly,     0)
//! a3 = (xz*Lz,   yz*Lz,  Lz)
//! ```
//!
//! Fractional coordinates are invariant under tilt, which is what makes them
//! the right frame for decomposition cut planes.

use serde::{Deserialize, Serialize};

/// A periodic, possibly skewed simulation box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxDim {
    /// Minimum corner (untilted frame).
    lo: [f64; 3],
    /// Edge lengths.
    l: [f64; 3],
    /// Tilt factor of a2 along x.
    xy: f64,
    /// Tilt factor of a3 along x.
    xz: f64,
    /// Tilt factor of a3 along y.
    yz: f64,
}

impl BoxDim {
    /// Box with the given edge lengths and tilt factors, centered on the
    /// origin.
    pub fn new(l: [f64; 3], xy: f64, xz: f64, yz: f64) -> Self {
        Self {
            lo: [-0.5 * l[0], -0.5 * l[1], -0.5 * l[2]],
            l,
            xy,
            xz,
            yz,
        }
    }

    /// Cubic box with edge length `l`, centered on the origin.
    pub fn cubic(l: f64) -> Self {
        Self::orthorhombic([l, l, l])
    }

    /// Orthorhombic box with the given edge lengths, centered on the origin.
    pub fn orthorhombic(l: [f64; 3]) -> Self {
        Self::new(l, 0.0, 0.0, 0.0)
    }

    /// Cubic box with edge length `l` and tilt factors `xy`, `xz`, `yz`.
    pub fn triclinic(l: f64, xy: f64, xz: f64, yz: f64) -> Self {
        Self::new([l, l, l], xy, xz, yz)
    }

    /// Edge length along `axis`.
    pub fn length(&self, axis: usize) -> f64 {
        self.l[axis]
    }

    /// Convert a Cartesian position into box-fractional coordinates.
    ///
    /// The result is not wrapped; positions outside the box map outside
    /// [0,1). Use [`wrap_fraction`](Self::wrap_fraction) afterwards when a
    /// canonical in-box fraction is required.
    pub fn make_fraction(&self, pos: [f64; 3]) -> [f64; 3] {
        let fz = (pos[2] - self.lo[2]) / self.l[2];
        let fy = (pos[1] - self.lo[1] - fz * self.yz * self.l[2]) / self.l[1];
        let fx = (pos[0] - self.lo[0] - fy * self.xy * self.l[1] - fz * self.xz * self.l[2])
            / self.l[0];
        [fx, fy, fz]
    }

    /// Convert box-fractional coordinates back into a Cartesian position.
    pub fn make_coordinates(&self, f: [f64; 3]) -> [f64; 3] {
        [
            self.lo[0] + f[0] * self.l[0] + f[1] * self.xy * self.l[1] + f[2] * self.xz * self.l[2],
            self.lo[1] + f[1] * self.l[1] + f[2] * self.yz * self.l[2],
            self.lo[2] + f[2] * self.l[2],
        ]
    }

    /// Wrap a fractional coordinate into [0,1) along every axis.
    pub fn wrap_fraction(&self, f: [f64; 3]) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (o, &fi) in out.iter_mut().zip(f.iter()) {
            let w = fi - fi.floor();
            // fi just below an integer can round to exactly 1.0
            *o = if w >= 1.0 { 0.0 } else { w };
        }
        out
    }

    /// Perpendicular distance between the two box faces normal to each axis.
    ///
    /// Under tilt this is smaller than the edge length; converting a
    /// Cartesian halo width into a fractional width must divide by this,
    /// not by `length`, or skewed boxes under-build their ghost layers.
    pub fn nearest_plane_distance(&self) -> [f64; 3] {
        let term = self.xy * self.yz - self.xz;
        [
            self.l[0] / (1.0 + self.xy * self.xy + term * term).sqrt(),
            self.l[1] / (1.0 + self.yz * self.yz).sqrt(),
            self.l[2],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_roundtrip_cubic() {
        let b = BoxDim::cubic(2.0);
        let pos = [0.25, -0.75, 0.9];
        let f = b.make_fraction(pos);
        assert!((f[0] - 0.625).abs() < 1e-12);
        assert!((f[1] - 0.125).abs() < 1e-12);
        assert!((f[2] - 0.95).abs() < 1e-12);
        let back = b.make_coordinates(f);
        for a in 0..3 {
            assert!((back[a] - pos[a]).abs() < 1e-12);
        }
    }

    #[test]
    fn fraction_roundtrip_triclinic() {
        let b = BoxDim::triclinic(1.0, 0.1, 0.2, 0.3);
        let f = [0.3, 0.7, 0.95];
        let pos = b.make_coordinates(f);
        let back = b.make_fraction(pos);
        for a in 0..3 {
            assert!((back[a] - f[a]).abs() < 1e-12, "axis {a}: {back:?} vs {f:?}");
        }
    }

    #[test]
    fn wrap_into_unit_interval() {
        let b = BoxDim::cubic(1.0);
        let w = b.wrap_fraction([1.25, -0.25, 1.0]);
        assert!((w[0] - 0.25).abs() < 1e-12);
        assert!((w[1] - 0.75).abs() < 1e-12);
        assert_eq!(w[2], 0.0);
        let w2 = b.wrap_fraction([0.0, 0.999999, -3.5]);
        assert_eq!(w2[0], 0.0);
        assert!(w2[1] < 1.0);
        assert!((w2[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn plane_distance_orthorhombic_equals_length() {
        let b = BoxDim::orthorhombic([2.0, 3.0, 4.0]);
        let d = b.nearest_plane_distance();
        assert!((d[0] - 2.0).abs() < 1e-12);
        assert!((d[1] - 3.0).abs() < 1e-12);
        assert!((d[2] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn plane_distance_shrinks_under_tilt() {
        let b = BoxDim::triclinic(1.0, 0.5, 0.0, 0.0);
        let d = b.nearest_plane_distance();
        assert!(d[0] < 1.0);
        assert!((d[2] - 1.0).abs() < 1e-12);
    }
}
