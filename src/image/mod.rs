// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Snapshot imaging: gridding, inverse FFT and peak extraction.

Visibilities are placed on a (u,v) grid by nearest-cell assignment with
Hermitian symmetry, per channel at `(u·ν_c/ν_0, v·ν_c/ν_0)`. The 2-D
inverse transform of the grid is the dirty image; after the quadrant swap
the phase centre sits at `(npix_x/2, npix_y/2)` and peak pixels convert to
direction cosines via [`calc_lm`].
 */

use std::sync::Arc;

use log::debug;
use ndarray::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::c32;

/// One image geometry with its cached inverse-FFT plans. Cheap to clone
/// into worker threads (the plans are reference counted).
#[derive(Clone)]
pub struct ImageGrid {
    pub npix_x: usize,
    pub npix_y: usize,
    pub uv_res: usize,
    ifft_x: Arc<dyn Fft<f32>>,
    ifft_y: Arc<dyn Fft<f32>>,
}

/// The most extreme pixel of a dirty image.
#[derive(Debug, Clone, Copy)]
pub struct ImagePeak {
    pub x: usize,
    pub y: usize,
    /// Signed pixel value; negative for an absorption-like extreme.
    pub value: f32,
    /// Standard deviation of the whole image.
    pub sigma: f32,
    /// `value / sigma`.
    pub snr: f32,
}

impl ImageGrid {
    pub fn new(npix_x: usize, npix_y: usize, uv_res: usize) -> ImageGrid {
        let mut planner = FftPlanner::new();
        ImageGrid {
            npix_x,
            npix_y,
            uv_res,
            ifft_x: planner.plan_fft_inverse(npix_x),
            ifft_y: planner.plan_fft_inverse(npix_y),
        }
    }

    /// Grid one integration (`[baseline, channel, pol]`, summed over
    /// polarisation) onto the (u,v) plane. Baselines falling outside the
    /// grid's half-extent are dropped.
    pub fn grid(
        &self,
        data: ArrayView3<c32>,
        u: &[f32],
        v: &[f32],
        freq_scale: &[f64],
    ) -> Array2<c32> {
        let mut grid = Array2::zeros((self.npix_x, self.npix_y));
        let (n_bl, n_chan, _) = data.dim();
        for bl in 0..n_bl {
            for c in 0..n_chan {
                let vis = data.slice(s![bl, c, ..]).sum();
                if vis.re == 0.0 && vis.im == 0.0 {
                    continue;
                }
                let fs = freq_scale[c];
                let cu = ((u[bl] as f64 * fs) / self.uv_res as f64).round() as isize;
                let cv = ((v[bl] as f64 * fs) / self.uv_res as f64).round() as isize;
                self.accumulate(&mut grid, cu, cv, vis);
            }
        }
        grid
    }

    /// Add `vis` at cell `(cu, cv)` and its conjugate at the Hermitian
    /// partner, keeping the dirty image real.
    fn accumulate(&self, grid: &mut Array2<c32>, cu: isize, cv: isize, vis: c32) {
        let half_x = (self.npix_x / 2) as isize;
        let half_y = (self.npix_y / 2) as isize;
        if cu.abs() >= half_x || cv.abs() >= half_y {
            return;
        }
        let wrap = |c: isize, n: usize| -> usize {
            let n = n as isize;
            (((c % n) + n) % n) as usize
        };
        grid[[wrap(cu, self.npix_x), wrap(cv, self.npix_y)]] += vis;
        grid[[wrap(-cu, self.npix_x), wrap(-cv, self.npix_y)]] += vis.conj();
    }

    /// Inverse 2-D transform of a gridded plane into a real dirty image
    /// with the phase centre at `(npix_x/2, npix_y/2)`.
    pub fn invert(&self, grid: Array2<c32>) -> Array2<f32> {
        let spectrum = fft2_in_place(grid, &self.ifft_x, &self.ifft_y);
        let (nx, ny) = spectrum.dim();
        let norm = 1.0 / (nx * ny) as f32;
        Array2::from_shape_fn((nx, ny), |(x, y)| {
            // Quadrant swap: pixel (nx/2, ny/2) takes the zero-phase term.
            let sx = (x + nx - nx / 2) % nx;
            let sy = (y + ny - ny / 2) % ny;
            spectrum[[sx, sy]].re * norm
        })
    }

    /// Grid and invert one integration.
    pub fn image(
        &self,
        data: ArrayView3<c32>,
        u: &[f32],
        v: &[f32],
        freq_scale: &[f64],
    ) -> Array2<f32> {
        self.invert(self.grid(data, u, v, freq_scale))
    }

    /// Like [`ImageGrid::grid`], but convolving each visibility with the
    /// w-projection kernel of its baseline's w bin.
    pub fn grid_w(
        &self,
        data: ArrayView3<c32>,
        u: &[f32],
        v: &[f32],
        freq_scale: &[f64],
        kernels: &WKernels,
    ) -> Array2<c32> {
        let mut grid = Array2::zeros((self.npix_x, self.npix_y));
        let (n_bl, n_chan, _) = data.dim();
        for bl in 0..n_bl {
            let ker = &kernels.kernels[kernels.bin_of_bl[bl]];
            let h = (ker.dim().0 / 2) as isize;
            for c in 0..n_chan {
                let vis = data.slice(s![bl, c, ..]).sum();
                if vis.re == 0.0 && vis.im == 0.0 {
                    continue;
                }
                let fs = freq_scale[c];
                let cu = ((u[bl] as f64 * fs) / self.uv_res as f64).round() as isize;
                let cv = ((v[bl] as f64 * fs) / self.uv_res as f64).round() as isize;
                for di in -h..=h {
                    for dj in -h..=h {
                        let k = ker[[(di + h) as usize, (dj + h) as usize]];
                        if k.norm() == 0.0 {
                            continue;
                        }
                        self.accumulate(&mut grid, cu + di, cv + dj, vis * k);
                    }
                }
            }
        }
        grid
    }

    /// Grid with w-kernels and invert one integration.
    pub fn image_w(
        &self,
        data: ArrayView3<c32>,
        u: &[f32],
        v: &[f32],
        freq_scale: &[f64],
        kernels: &WKernels,
    ) -> Array2<f32> {
        self.invert(self.grid_w(data, u, v, freq_scale, kernels))
    }
}

/// Unnormalised 2-D FFT (direction set by the plans): rows, then columns.
fn fft2_in_place(
    mut grid: Array2<c32>,
    fft_x: &Arc<dyn Fft<f32>>,
    fft_y: &Arc<dyn Fft<f32>>,
) -> Array2<c32> {
    // Rows are contiguous in standard layout; one call transforms all of
    // them.
    fft_y.process(grid.as_slice_mut().expect("grid is standard layout"));
    let mut t = grid.t().as_standard_layout().into_owned();
    fft_x.process(t.as_slice_mut().expect("transpose is standard layout"));
    t.t().as_standard_layout().into_owned()
}

/// Find the most extreme pixel. Ties are broken by magnitude, then by
/// lexicographic (x, y). Returns `None` for degenerate images (zero or
/// non-finite standard deviation), which suppresses the integration.
pub fn find_peak(im: &Array2<f32>) -> Option<ImagePeak> {
    let n = im.len() as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &v in im.iter() {
        if !v.is_finite() {
            return None;
        }
        sum += v as f64;
        sum_sq += (v as f64) * (v as f64);
    }
    let mean = sum / n;
    let sigma = (sum_sq / n - mean * mean).max(0.0).sqrt() as f32;
    if sigma == 0.0 || !sigma.is_finite() {
        return None;
    }

    let mut best: Option<(usize, usize, f32)> = None;
    for ((x, y), &v) in im.indexed_iter() {
        // Strictly-greater keeps the lexicographically first pixel on
        // magnitude ties (row-major iteration).
        if best.map_or(true, |(_, _, b)| v.abs() > b.abs()) {
            best = Some((x, y, v));
        }
    }
    best.map(|(x, y, value)| ImagePeak {
        x,
        y,
        value,
        sigma,
        snr: value / sigma,
    })
}

/// Convert an image pixel to direction cosines relative to the phase
/// centre.
pub fn calc_lm(npix_x: usize, npix_y: usize, uv_res: usize, x: usize, y: usize) -> (f64, f64) {
    let l = (npix_x as f64 / 2.0 - x as f64) / (npix_x * uv_res) as f64;
    let m = (npix_y as f64 / 2.0 - y as f64) / (npix_y * uv_res) as f64;
    (l, m)
}

/// The pixel (possibly fractional) at which a source at `(l, m)` peaks.
pub fn lm_to_pixel(
    npix_x: usize,
    npix_y: usize,
    uv_res: usize,
    l: f64,
    m: f64,
) -> (f64, f64) {
    let x = npix_x as f64 / 2.0 - l * (npix_x * uv_res) as f64;
    let y = npix_y as f64 / 2.0 - m * (npix_y * uv_res) as f64;
    (x, y)
}

/// Multiply `data` (`[time, baseline, channel, pol]`) by the phase ramp
/// that moves the phase centre to `(l, m)`.
pub fn phaseshift(
    data: &mut ArrayViewMut4<c32>,
    l: f64,
    m: f64,
    u: &[f32],
    v: &[f32],
    freq_scale: &[f64],
) {
    if l == 0.0 && m == 0.0 {
        return;
    }
    let (_, n_bl, n_chan, _) = data.dim();
    for bl in 0..n_bl {
        let ang0 = l * u[bl] as f64 + m * v[bl] as f64;
        for c in 0..n_chan {
            let phase = c32::from_polar(1.0, (-std::f64::consts::TAU * ang0 * freq_scale[c]) as f32);
            for vis in data.slice_mut(s![.., bl, c, ..]).iter_mut() {
                *vis *= phase;
            }
        }
    }
}

/// Image a single integration of a conditioned buffer; used for noise
/// monitoring and quick looks.
pub fn sample_image(
    data: ArrayView4<c32>,
    i: usize,
    u: &[f32],
    v: &[f32],
    freq_scale: &[f64],
    grid: &ImageGrid,
) -> Array2<f32> {
    grid.image(data.slice(s![i, .., .., ..]), u, v, freq_scale)
}

/// w-projection kernels for one segment, binned by baseline w.
pub struct WKernels {
    /// Kernel index per baseline.
    pub bin_of_bl: Vec<usize>,
    /// Square, odd-sized uv-domain kernels, one per occupied w bin, each
    /// normalised to unit total weight.
    pub kernels: Vec<Array2<c32>>,
}

/// Generate w-projection kernels from the baseline w distribution, binned
/// in `wres` steps. Each kernel is the uv-plane transform of the bin's
/// mid-w phase screen, truncated where it falls below `thresh` of its
/// peak and capped at `max_ksize` pixels on a side.
pub fn gen_uv_kernels(
    w: &[f32],
    wres: f64,
    npix: usize,
    uv_res: usize,
    thresh: f64,
    max_ksize: usize,
) -> WKernels {
    let w_min = w.iter().cloned().fold(f32::INFINITY, f32::min) as f64;
    let bin_of_bl: Vec<usize> = w
        .iter()
        .map(|&wi| ((wi as f64 - w_min) / wres).floor().max(0.0) as usize)
        .collect();

    let n_bins = bin_of_bl.iter().max().map_or(0, |&b| b + 1);
    let mut occupied: Vec<bool> = vec![false; n_bins];
    for &b in &bin_of_bl {
        occupied[b] = true;
    }

    let mut planner = FftPlanner::new();
    let fft: Arc<dyn Fft<f32>> = planner.plan_fft_forward(npix);

    let mut kernels: Vec<Array2<c32>> = Vec::with_capacity(n_bins);
    let mut kernel_index: Vec<usize> = vec![0; n_bins];
    for bin in 0..n_bins {
        if !occupied[bin] {
            continue;
        }
        let w_mid = w_min + (bin as f64 + 0.5) * wres;
        kernel_index[bin] = kernels.len();
        kernels.push(w_kernel(w_mid, npix, uv_res, thresh, max_ksize, &fft));
    }
    debug!(
        "Generated {} w kernels for {} baselines (wres {})",
        kernels.len(),
        w.len(),
        wres
    );

    WKernels {
        bin_of_bl: bin_of_bl.into_iter().map(|b| kernel_index[b]).collect(),
        kernels,
    }
}

/// The uv-domain kernel of the w phase screen
/// `exp(−2πi·w·(sqrt(1−l²−m²)−1))` sampled on the image grid.
fn w_kernel(
    w_mid: f64,
    npix: usize,
    uv_res: usize,
    thresh: f64,
    max_ksize: usize,
    fft: &Arc<dyn Fft<f32>>,
) -> Array2<c32> {
    // Phase screen with the image centre moved to index 0 so the
    // transform lands with its peak at the uv origin.
    let mut screen = Array2::zeros((npix, npix));
    for x in 0..npix {
        for y in 0..npix {
            let ix = (x + npix / 2) % npix;
            let iy = (y + npix / 2) % npix;
            let (l, m) = calc_lm(npix, npix, uv_res, x, y);
            let r2 = l * l + m * m;
            if r2 < 1.0 {
                let phase = -std::f64::consts::TAU * w_mid * ((1.0 - r2).sqrt() - 1.0);
                screen[[ix, iy]] = c32::from_polar(1.0, phase as f32);
            }
        }
    }

    let spectrum = fft2_in_place(screen, fft, fft);
    // Centre the uv kernel for cropping.
    let centred = Array2::from_shape_fn((npix, npix), |(x, y)| {
        spectrum[[(x + npix - npix / 2) % npix, (y + npix - npix / 2) % npix]]
    });

    let peak = centred
        .iter()
        .map(|v| v.norm())
        .fold(0.0f32, f32::max);
    let c = npix / 2;
    let max_h = (max_ksize / 2).min(c);
    // Smallest half-width containing everything above the truncation
    // threshold.
    let mut h = 0usize;
    for ((x, y), v) in centred.indexed_iter() {
        if v.norm() >= thresh as f32 * peak {
            let dx = (x as isize - c as isize).unsigned_abs();
            let dy = (y as isize - c as isize).unsigned_abs();
            h = h.max(dx.max(dy));
        }
    }
    let h = h.min(max_h);

    let mut kernel =
        centred.slice(s![c - h..=c + h, c - h..=c + h]).to_owned();
    let total = kernel.sum();
    if total.norm() > 0.0 {
        kernel.mapv_inplace(|v| v / total);
    }
    kernel
}
