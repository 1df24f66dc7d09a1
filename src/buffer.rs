// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared visibility and (u,v,w) buffers.
//!
//! The engine allocates one read, one work and one resample buffer up
//! front; they are reused for every segment and never reallocated.

use ndarray::prelude::*;

use crate::c32;

/// A `[time, baseline, channel, polarisation]` tensor of complex
/// visibilities. The shape is identical for every segment of a scan.
#[derive(Debug, Clone)]
pub struct VisBuffer {
    pub data: Array4<c32>,
}

impl VisBuffer {
    /// Allocate a zeroed buffer of the given
    /// `(read_ints, n_bl, n_chan, n_pol)` shape.
    pub fn new(shape: (usize, usize, usize, usize)) -> VisBuffer {
        VisBuffer {
            data: Array4::zeros(shape),
        }
    }

    pub fn shape(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// True if every sample is exactly zero (e.g. the backend delivered
    /// nothing for this segment).
    pub fn all_zero(&self) -> bool {
        self.data.iter().all(|v| v.re == 0.0 && v.im == 0.0)
    }

    /// Copy another buffer's contents into this one. The shapes must
    /// match; the buffers are allocated once with a common shape.
    pub fn copy_from(&mut self, other: &VisBuffer) {
        self.data.assign(&other.data);
    }

    pub fn fill_zero(&mut self) {
        self.data.fill(c32::new(0.0, 0.0));
    }
}

/// Per-baseline (u,v,w), in wavelengths at the first channel of the
/// original frequency axis, with the measurement-set −1 sign convention
/// already applied.
#[derive(Debug, Clone)]
pub struct UvwBuffer {
    pub u: Array1<f32>,
    pub v: Array1<f32>,
    pub w: Array1<f32>,
}

impl UvwBuffer {
    pub fn new(n_bl: usize) -> UvwBuffer {
        UvwBuffer {
            u: Array1::zeros(n_bl),
            v: Array1::zeros(n_bl),
            w: Array1::zeros(n_bl),
        }
    }

    pub fn copy_from(&mut self, other: &UvwBuffer) {
        self.u.assign(&other.u);
        self.v.assign(&other.v);
        self.w.assign(&other.w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_detects_any_sample() {
        let mut buf = VisBuffer::new((2, 3, 4, 1));
        assert!(buf.all_zero());
        buf.data[[1, 2, 3, 0]] = c32::new(0.0, 1e-30);
        assert!(!buf.all_zero());
    }

    #[test]
    fn copy_preserves_contents() {
        let mut a = VisBuffer::new((2, 2, 2, 1));
        a.data[[0, 1, 0, 0]] = c32::new(3.0, -2.0);
        let mut b = VisBuffer::new((2, 2, 2, 1));
        b.copy_from(&a);
        assert_eq!(b.data[[0, 1, 0, 0]], c32::new(3.0, -2.0));
        a.fill_zero();
        assert_eq!(b.data[[0, 1, 0, 0]], c32::new(3.0, -2.0));
    }
}
