// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Reading one segment of visibilities from the external backend.

The backend (measurement set, BDF, ...) is out of scope; the pipeline
only needs the [`VisSource`] capability. The segment reader handles
integration-window arithmetic, spectral-window wrap correction, read-time
downsampling, channel/baseline/polarisation selection, and casting (u,v,w)
to wavelengths.
 */

mod error;
pub use error::ReadError;

use hifitime::Epoch;
use itertools::Itertools;
use log::{info, warn};
use ndarray::prelude::*;

use crate::buffer::{UvwBuffer, VisBuffer};
use crate::c32;
use crate::constants::{SECONDS_PER_DAY, VEL_C};
use crate::context::ScanMetadata;
use crate::planner::PipelineState;

/// The capability an external visibility backend must supply. Raw data is
/// shaped `[time, baseline, channel, pol]` with all baselines, channels
/// and polarisations of the scan, channels in correlator (spw-listed)
/// order.
pub trait VisSource: Send + Sync {
    /// Read `read_ints` raw integrations starting `n_skip` integrations
    /// into the scan.
    fn read(&self, n_skip: usize, read_ints: usize) -> Result<Array4<c32>, ReadError>;

    /// Per-baseline (u, v, w) in metres at the given time.
    fn uvw_m(&self, time: Epoch) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), ReadError>;
}

/// Fill `vis` and `uvw` with one segment's conditioned-ready data. The
/// buffer shapes must match the planned state.
pub fn read_segment(
    state: &PipelineState,
    meta: &ScanMetadata,
    source: &dyn VisSource,
    segment: usize,
    vis: &mut VisBuffer,
    uvw: &mut UvwBuffer,
) -> Result<(), ReadError> {
    let (t0, t1) = state.segment_times[segment];
    // The raw integration count is fixed to segment 0 so every segment
    // delivers an identical shape.
    let (s0, s1) = state.segment_times[0];
    let raw_ints =
        (SECONDS_PER_DAY * (s1 - s0) / state.inttime_s).round() as usize;
    let n_skip =
        (SECONDS_PER_DAY * (t0 - state.start_time_mjd) / state.inttime_s).round() as usize;
    info!(
        "Reading segment {}/{}, MJD {:.6} to {:.6}",
        segment,
        state.n_segments - 1,
        t0,
        t1
    );

    let mut data = source.read(n_skip, raw_ints)?;
    let (nt, _, _, _) = data.dim();
    if nt != raw_ints {
        return Err(ReadError::ShortRead {
            expected: raw_ints,
            got: nt,
        });
    }

    roll_spws(meta, &mut data)?;
    let data = downsample(data, state.read_tdownsample, state.read_fdownsample);
    let data = select(state, meta, data)?;

    let (nt, n_bl, n_chan, n_pol) = data.dim();
    if nt < state.read_ints {
        return Err(ReadError::ShortRead {
            expected: state.read_ints,
            got: nt,
        });
    }
    if (n_bl, n_chan, n_pol) != (state.n_bl(), state.n_chan(), state.n_pol()) {
        return Err(ReadError::BadShape {
            expected: format!("{:?}", state.vis_shape()),
            got: format!("{:?}", data.dim()),
        });
    }
    vis.data.assign(&data.slice(s![..state.read_ints, .., .., ..]));

    // (u,v,w) at the segment midpoint is good enough for the whole
    // segment.
    let mid = Epoch::from_mjd_utc((t0 + t1) / 2.0);
    let (u_m, v_m, w_m) = source.uvw_m(mid)?;
    let kept = kept_baseline_indices(state, meta);
    if u_m.len() < kept.iter().copied().max().map_or(0, |m| m + 1) {
        return Err(ReadError::BadShape {
            expected: format!("{} baselines of uvw", meta.num_baselines()),
            got: format!("{}", u_m.len()),
        });
    }
    // Cast to wavelengths at the first original channel; the -1 keeps the
    // measurement-set sign convention.
    let to_lambda = (state.freq_orig_ghz[0] * 1e9 / VEL_C) * -1.0;
    for (i, &b) in kept.iter().enumerate() {
        uvw.u[i] = (u_m[b] * to_lambda) as f32;
        uvw.v[i] = (v_m[b] * to_lambda) as f32;
        uvw.w[i] = (w_m[b] * to_lambda) as f32;
    }
    Ok(())
}

/// If the concatenated spectral windows are not monotone in frequency,
/// detect the single wrap and rotate the channel axis so they are.
/// More than one wrap is ambiguous and fatal.
fn roll_spws(meta: &ScanMetadata, data: &mut Array4<c32>) -> Result<(), ReadError> {
    let ref_freqs: Vec<f64> = meta
        .spectral_windows
        .iter()
        .map(|spw| spw.ref_freq_hz)
        .collect();
    let jumps: Vec<usize> = ref_freqs
        .iter()
        .tuple_windows()
        .enumerate()
        .filter(|(_, (a, b))| b < a)
        .map(|(i, _)| i)
        .collect();
    match jumps.len() {
        0 => Ok(()),
        1 => {
            warn!("Spectral-window frequencies out of order: {ref_freqs:?}; rolling channels");
            let roll: usize = meta
                .spectral_windows
                .iter()
                .take(jumps[0] + 1)
                .map(|spw| spw.n_chan)
                .sum();
            let n_chan = data.dim().2;
            // Rotate left by `roll`: the first `roll` channels belong at
            // the end of the axis.
            let rolled_idx: Vec<usize> =
                (0..n_chan).map(|c| (c + roll) % n_chan).collect();
            let rolled = data.select(Axis(2), &rolled_idx);
            data.assign(&rolled);
            Ok(())
        }
        n => Err(ReadError::SpwOrderAmbiguous { n_jumps: n }),
    }
}

/// Block-average the time and frequency axes. Trailing samples that do
/// not fill a block are dropped.
fn downsample(data: Array4<c32>, tdown: usize, fdown: usize) -> Array4<c32> {
    if tdown <= 1 && fdown <= 1 {
        return data;
    }
    let (nt, n_bl, n_chan, n_pol) = data.dim();
    let (nt2, nc2) = (nt / tdown, n_chan / fdown);
    info!("Downsampling in time/freq by {tdown}/{fdown}");
    let mut out = Array4::zeros((nt2, n_bl, nc2, n_pol));
    for t in 0..nt2 {
        for c in 0..nc2 {
            let block = data.slice(s![
                t * tdown..(t + 1) * tdown,
                ..,
                c * fdown..(c + 1) * fdown,
                ..
            ]);
            let mean = block
                .sum_axis(Axis(0))
                .sum_axis(Axis(1))
                .mapv(|v| v / (tdown * fdown) as f32);
            out.slice_mut(s![t, .., c, ..]).assign(&mean);
        }
    }
    out
}

/// Select the planned channels, polarisations and baselines.
fn select(
    state: &PipelineState,
    meta: &ScanMetadata,
    data: Array4<c32>,
) -> Result<Array4<c32>, ReadError> {
    let pol_idx: Vec<usize> = state
        .pols
        .iter()
        .map(|p| {
            meta.polarisations
                .iter()
                .position(|q| q == p)
                .ok_or_else(|| ReadError::Backend(format!("polarisation {p} not in raw data")))
        })
        .collect::<Result<_, _>>()?;
    let bl_idx = kept_baseline_indices(state, meta);

    let data = data.select(Axis(1), &bl_idx);
    let data = data.select(Axis(2), &state.chans);
    Ok(data.select(Axis(3), &pol_idx))
}

/// Indices of the state's baselines within the metadata's full baseline
/// list.
fn kept_baseline_indices(state: &PipelineState, meta: &ScanMetadata) -> Vec<usize> {
    let ants: Vec<usize> = meta.antennas.iter().copied().collect();
    let all = ScanMetadata::baselines_for(&ants);
    all.iter()
        .enumerate()
        .filter(|(_, bl)| state.blarr.contains(bl))
        .map(|(i, _)| i)
        .collect()
}
