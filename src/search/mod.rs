// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Searching one segment over the (DM, dt) grid.

For each trial pair the work buffer is copied into the resample buffer,
dedispersed in parallel over baseline blocks, then imaged in parallel
over integration chunks. Peaks above threshold become candidates with
their features evaluated in the declared order.
 */

use crossbeam_utils::atomic::AtomicCell;
use indexmap::IndexMap;
use log::{debug, info, warn};
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use thiserror::Error;

use crate::buffer::{UvwBuffer, VisBuffer};
use crate::c32;
use crate::constants::DEFAULT_WRES;
use crate::dedisperse::dedisperse_resample;
use crate::image::{
    calc_lm, find_peak, gen_uv_kernels, phaseshift, ImageGrid, ImagePeak, WKernels,
};
use crate::planner::{PipelineState, SegmentState};

/// Which search is run per integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SearchType {
    /// Single-stage imaging.
    Image1,
    /// Single-stage imaging plus spectrum/image statistics.
    Image1Stats,
    /// Single-stage imaging plus image cutout and spectrum snippets.
    Image1Snip,
    /// Two-stage: candidates re-imaged at full resolution.
    Image2,
    /// Two-stage with w-projection kernels in the second stage.
    Image2w,
}

/// A candidate feature, named as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeatureKind {
    Snr1,
    Immax1,
    L1,
    M1,
    Snr2,
    Immax2,
    L2,
    M2,
    Im40,
    Spec20,
    SpecStd,
    SpecSkew,
    SpecKurtosis,
    ImSkew,
    ImKurtosis,
}

/// A candidate's identity within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandKey {
    pub segment: usize,
    /// Integration index in the segment's (undownsampled) read frame.
    pub integration: usize,
    pub dm_idx: usize,
    pub dt_idx: usize,
    pub beam: usize,
}

/// One evaluated feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Scalar(f64),
    /// Image cutout.
    Image(Array2<f32>),
    /// Phase-shifted complex spectrum, `[time, channel, pol]`.
    Spectrum(Array3<c32>),
}

/// Candidates of one segment, keyed by identity, in detection order.
pub type CandMap = IndexMap<CandKey, Vec<FeatureValue>>;

#[derive(Error, Debug)]
pub enum SearchError {
    /// The cooperative stop signal fired; partial results must be
    /// discarded.
    #[error("Search cancelled at a (DM, dt) boundary")]
    Cancelled,
}

/// Search one conditioned segment. An all-zero work buffer yields an
/// empty map (soft skip).
pub fn search(
    state: &PipelineState,
    seg: &SegmentState,
    work: &VisBuffer,
    resamp: &mut VisBuffer,
    uvw: &UvwBuffer,
    stop: &AtomicCell<bool>,
) -> Result<CandMap, SearchError> {
    let mut cands = CandMap::new();
    if work.all_zero() {
        warn!(
            "Data for segment {} is all zeros. Moving on...",
            seg.segment
        );
        return Ok(cands);
    }

    let u = uvw.u.as_slice().expect("uvw buffers are contiguous");
    let v = uvw.v.as_slice().expect("uvw buffers are contiguous");
    let w = uvw.w.as_slice().expect("uvw buffers are contiguous");
    let freq_scale = state.freq_scale();
    let sample_time = state.sample_time_s();

    let grid1 = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let npix_full = state.npix_x_full.max(state.npix_y_full);
    let grid2 = match state.search_type {
        SearchType::Image2 => Some(ImageGrid::new(
            state.npix_x_full,
            state.npix_y_full,
            state.uv_res,
        )),
        SearchType::Image2w => Some(ImageGrid::new(npix_full, npix_full, state.uv_res)),
        _ => None,
    };
    // w kernels are built once per segment from the w distribution.
    let wkers: Option<WKernels> = (state.search_type == SearchType::Image2w)
        .then(|| gen_uv_kernels(w, DEFAULT_WRES, npix_full, state.uv_res, 0.05, 21));

    info!(
        "Searching in {} chunks with {} threads",
        state.n_chunk, state.n_thread
    );
    info!(
        "Dedispersing to max (DM, dt) of ({:.1}, {}) ...",
        state.dmarr.last(),
        state.dtarr.last()
    );

    for (dm_idx, &dm) in state.dmarr.iter().enumerate() {
        for (dt_idx, &dt) in state.dtarr.iter().enumerate() {
            if stop.load() {
                return Err(SearchError::Cancelled);
            }

            resamp.copy_from(work);
            let bl_chunk =
                (state.n_bl() + state.n_thread - 1) / state.n_thread.max(1);
            resamp
                .data
                .axis_chunks_iter_mut(Axis(1), bl_chunk.max(1))
                .into_par_iter()
                .for_each(|mut block| {
                    dedisperse_resample(&mut block, &state.freq_ghz, sample_time, dm, dt);
                });

            // Only the first segment owns the integrations before the
            // maximum sweep; later segments skip what their predecessor
            // already searched.
            let delay = state.data_delay[dm_idx];
            let n_skip_dm = if seg.segment != 0 {
                (state.max_data_delay() - delay) / dt
            } else {
                0
            };
            let search_ints = (state.read_ints.saturating_sub(delay) / dt)
                .saturating_sub(n_skip_dm);
            if search_ints == 0 {
                continue;
            }
            debug!(
                "Imaging {search_ints} ints from {n_skip_dm} for (DM, dt) = ({dm:.1}, {dt})"
            );

            let valid_end = n_skip_dm + search_ints;
            let resamp_view = resamp.data.view();
            let n_chunk = state.n_chunk.max(1);
            let chunk_maps: Vec<CandMap> = (0..n_chunk)
                .into_par_iter()
                .map(|k| {
                    let i0 = n_skip_dm + search_ints * k / n_chunk;
                    let i1 = n_skip_dm + search_ints * (k + 1) / n_chunk;
                    image_chunk(ImageArgs {
                        state,
                        seg,
                        resamp: resamp_view,
                        u,
                        v,
                        freq_scale: &freq_scale,
                        grid1: &grid1,
                        grid2: grid2.as_ref(),
                        wkers: wkers.as_ref(),
                        dm_idx,
                        dt_idx,
                        dt,
                        i0,
                        i1,
                        valid_end,
                    })
                })
                .collect();
            for map in chunk_maps {
                cands.extend(map);
            }
        }
    }

    info!(
        "Found {} cands in scan {} segment {} of {}.",
        cands.len(),
        state.scan_id,
        seg.segment,
        state.filename
    );
    Ok(cands)
}

struct ImageArgs<'a> {
    state: &'a PipelineState,
    seg: &'a SegmentState,
    resamp: ArrayView4<'a, c32>,
    u: &'a [f32],
    v: &'a [f32],
    freq_scale: &'a [f64],
    grid1: &'a ImageGrid,
    grid2: Option<&'a ImageGrid>,
    wkers: Option<&'a WKernels>,
    dm_idx: usize,
    dt_idx: usize,
    dt: usize,
    i0: usize,
    i1: usize,
    valid_end: usize,
}

/// Image one chunk of integrations for a single (DM, dt) trial.
/// Degenerate images (NaN, zero std) suppress the integration, never the
/// segment.
fn image_chunk(args: ImageArgs) -> CandMap {
    let ImageArgs {
        state,
        seg,
        resamp,
        u,
        v,
        freq_scale,
        grid1,
        grid2,
        wkers,
        dm_idx,
        dt_idx,
        dt,
        i0,
        i1,
        valid_end,
    } = args;

    let mut feat = CandMap::new();
    for i in i0..i1 {
        let data_i = resamp.slice(s![i, .., .., ..]);
        let im1 = grid1.image(data_i, u, v, freq_scale);
        let peak1 = match find_peak(&im1) {
            Some(p) => p,
            None => continue,
        };
        if (peak1.snr.abs() as f64) < state.sigma_image1 {
            continue;
        }
        let (l1, m1) = calc_lm(state.npix_x, state.npix_y, state.uv_res, peak1.x, peak1.y);

        // Second stage, if configured: re-image this one integration at
        // full resolution and gate on its SNR.
        let second: Option<(Array2<f32>, ImagePeak, f64, f64)> = match (grid2, wkers) {
            (Some(g2), None) => {
                let im2 = g2.image(data_i, u, v, freq_scale);
                match find_peak(&im2) {
                    Some(p2) => {
                        let (l2, m2) = calc_lm(g2.npix_x, g2.npix_y, g2.uv_res, p2.x, p2.y);
                        Some((im2, p2, l2, m2))
                    }
                    None => continue,
                }
            }
            (Some(g2), Some(kers)) => {
                let im2 = g2.image_w(data_i, u, v, freq_scale, kers);
                match find_peak(&im2) {
                    Some(p2) => {
                        let (l2, m2) = calc_lm(g2.npix_x, g2.npix_y, g2.uv_res, p2.x, p2.y);
                        Some((im2, p2, l2, m2))
                    }
                    None => continue,
                }
            }
            _ => None,
        };
        if let Some((_, p2, _, _)) = &second {
            if (p2.snr.abs() as f64) < state.sigma_image2 {
                info!(
                    "Almost...  Int={}, DM={:.1}, dt={}: SNR_im1={:.1}, SNR_im2={:.1}.",
                    i * dt,
                    state.dmarr[dm_idx],
                    dt,
                    peak1.snr,
                    p2.snr
                );
                continue;
            }
        }

        let key = CandKey {
            segment: seg.segment,
            integration: i * dt,
            dm_idx,
            dt_idx,
            beam: 0,
        };
        info!(
            "Got one!  Int={}, DM={:.1}, dt={}: SNR_im={:.1} @ ({:.2e},{:.2e}).",
            key.integration, state.dmarr[dm_idx], dt, peak1.snr, l1, m1
        );
        let features = extract_features(
            state, resamp, u, v, freq_scale, i, valid_end, &im1, peak1, l1, m1,
            second.as_ref(),
        );
        feat.insert(key, features);
    }
    feat
}

/// Evaluate the state's feature list in declared order.
#[allow(clippy::too_many_arguments)]
fn extract_features(
    state: &PipelineState,
    resamp: ArrayView4<c32>,
    u: &[f32],
    v: &[f32],
    freq_scale: &[f64],
    i: usize,
    valid_end: usize,
    im1: &Array2<f32>,
    peak1: ImagePeak,
    l1: f64,
    m1: f64,
    second: Option<&(Array2<f32>, ImagePeak, f64, f64)>,
) -> Vec<FeatureValue> {
    // The masked Stokes-I spectrum backs several statistics; compute it
    // at most once.
    let mut spec: Option<Vec<f64>> = None;
    let mut spec_values = |spec: &mut Option<Vec<f64>>| -> Vec<f64> {
        spec.get_or_insert_with(|| masked_spectrum(resamp, u, v, freq_scale, i, l1, m1))
            .clone()
    };

    state
        .features
        .iter()
        .map(|kind| match kind {
            FeatureKind::Snr1 => FeatureValue::Scalar(peak1.snr as f64),
            FeatureKind::Immax1 => FeatureValue::Scalar(peak1.value as f64),
            FeatureKind::L1 => FeatureValue::Scalar(l1),
            FeatureKind::M1 => FeatureValue::Scalar(m1),
            FeatureKind::Snr2 => {
                FeatureValue::Scalar(second.map_or(0.0, |(_, p, _, _)| p.snr as f64))
            }
            FeatureKind::Immax2 => {
                FeatureValue::Scalar(second.map_or(0.0, |(_, p, _, _)| p.value as f64))
            }
            FeatureKind::L2 => FeatureValue::Scalar(second.map_or(0.0, |(_, _, l, _)| *l)),
            FeatureKind::M2 => FeatureValue::Scalar(second.map_or(0.0, |(_, _, _, m)| *m)),
            FeatureKind::Im40 => {
                let (nx, ny) = im1.dim();
                let x0 = peak1.x.saturating_sub(20);
                let x1 = (peak1.x + 20).min(nx);
                let y0 = peak1.y.saturating_sub(20);
                let y1 = (peak1.y + 20).min(ny);
                FeatureValue::Image(im1.slice(s![x0..x1, y0..y1]).to_owned())
            }
            FeatureKind::Spec20 => {
                let t0 = i.saturating_sub(10);
                let t1 = (i + 10).min(valid_end);
                let mut cut = resamp.slice(s![t0..t1, .., .., ..]).to_owned();
                phaseshift(&mut cut.view_mut(), l1, m1, u, v, freq_scale);
                let window_spec = cut
                    .mean_axis(Axis(1))
                    .expect("baseline axis is never empty");
                FeatureValue::Spectrum(window_spec)
            }
            FeatureKind::SpecStd => {
                FeatureValue::Scalar(crate::math::std_dev(&spec_values(&mut spec)))
            }
            FeatureKind::SpecSkew => {
                FeatureValue::Scalar(crate::math::skewness(&spec_values(&mut spec)))
            }
            FeatureKind::SpecKurtosis => {
                FeatureValue::Scalar(crate::math::kurtosis(&spec_values(&mut spec)))
            }
            FeatureKind::ImSkew => {
                let flat: Vec<f64> = im1.iter().map(|&x| x as f64).collect();
                FeatureValue::Scalar(crate::math::skewness(&flat))
            }
            FeatureKind::ImKurtosis => {
                let flat: Vec<f64> = im1.iter().map(|&x| x as f64).collect();
                FeatureValue::Scalar(crate::math::kurtosis(&flat))
            }
        })
        .collect()
}

/// The single-integration Stokes-I spectrum phase-shifted to the
/// candidate position, with zero (flagged) samples excluded at every
/// reduction. Fully flagged channels drop out.
fn masked_spectrum(
    resamp: ArrayView4<c32>,
    u: &[f32],
    v: &[f32],
    freq_scale: &[f64],
    i: usize,
    l1: f64,
    m1: f64,
) -> Vec<f64> {
    let mut cut = resamp.slice(s![i..i + 1, .., .., ..]).to_owned();
    phaseshift(&mut cut.view_mut(), l1, m1, u, v, freq_scale);
    let (_, n_bl, n_chan, n_pol) = cut.dim();

    let mut spec = Vec::with_capacity(n_chan);
    for c in 0..n_chan {
        let mut bl_means = vec![];
        for bl in 0..n_bl {
            let (mut sum, mut count) = (c32::new(0.0, 0.0), 0usize);
            for p in 0..n_pol {
                let s = cut[[0, bl, c, p]];
                if s.re != 0.0 || s.im != 0.0 {
                    sum += s;
                    count += 1;
                }
            }
            if count > 0 {
                bl_means.push(sum / count as f32);
            }
        }
        if !bl_means.is_empty() {
            let mean = bl_means.iter().sum::<c32>() / bl_means.len() as f32;
            spec.push(mean.re as f64);
        }
    }
    spec
}

#[cfg(test)]
mod tests;
