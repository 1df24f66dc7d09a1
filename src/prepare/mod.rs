// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Conditioning a freshly read segment: calibration, flagging, mean-time
subtraction, noise monitoring and optional re-phasing.

All steps mutate the read buffer in place while the engine holds its
lock. Calibration failures degrade gracefully (the segment is searched
uncalibrated); nothing here is fatal.
 */

use log::{debug, info, warn};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::buffer::{UvwBuffer, VisBuffer};
use crate::c32;
use crate::calibrate::Calibrator;
use crate::constants::NOISE_CHUNK_INTS;
use crate::flag;
use crate::image::{self, ImageGrid};
use crate::math::sigma_clip_bounds;
use crate::planner::{PipelineState, SegmentState};

/// Background subtraction applied per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TimeSub {
    None,
    Mean,
}

/// One noise-journal measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseRecord {
    pub segment: usize,
    pub noise_per_bl: f32,
    pub zero_fraction: f32,
    pub image_rms: f32,
}

/// Condition one segment in place. Returns the per-segment state slice
/// and any noise measurements.
pub fn condition(
    state: &PipelineState,
    mut calibrator: Option<&mut dyn Calibrator>,
    segment: usize,
    vis: &mut VisBuffer,
    uvw: &UvwBuffer,
) -> (SegmentState, Vec<NoiseRecord>) {
    // Calibration. A provider failure is recoverable: warn and search
    // uncalibrated.
    if let Some(cal) = calibrator.as_deref_mut() {
        let time = state.segment_mid_time(segment);
        let freqs_hz: Vec<f64> = state.freq_ghz.iter().map(|f| f * 1e9).collect();
        match cal.select(time, &freqs_hz, &state.blarr, &state.pols) {
            Ok(sols) => match sols.apply(&mut vis.data, &state.blarr) {
                Ok(()) => debug!("Applied calibration for segment {segment}"),
                Err(e) => {
                    warn!("Could not apply calibration solutions: {e}. Proceeding with no calibration applied.")
                }
            },
            Err(e) => {
                warn!("Could not load calibration solutions: {e}. Proceeding with no calibration applied.")
            }
        }
    } else {
        info!("Calibration not configured. Proceeding with no calibration applied.");
    }

    // Flagging.
    if !state.flaglist.is_empty() {
        info!("Flagging with flaglist: {:?}", state.flaglist);
        flag::flag_data(&mut vis.data, &state.spw_chan_ranges, &state.flaglist);
    } else {
        info!("No real-time flagging.");
    }

    // Mean visibility subtraction in time.
    match state.timesub {
        TimeSub::Mean => {
            info!("Subtracting mean visibility in time...");
            mean_subtract(&mut vis.data);
        }
        TimeSub::None => info!("No mean time subtraction."),
    }

    let noise = if state.save_noise {
        noise_records(state, segment, &vis.data, uvw)
    } else {
        vec![]
    };

    // Re-phasing.
    let (mut l0, mut m0) = (0.0, 0.0);
    if state.l1 != 0.0 || state.m1 != 0.0 {
        info!(
            "Rephasing data to (l, m)=({:.4}, {:.4}).",
            state.l1, state.m1
        );
        image::phaseshift(
            &mut vis.data.view_mut(),
            state.l1,
            state.m1,
            uvw.u.as_slice().expect("uvw buffers are contiguous"),
            uvw.v.as_slice().expect("uvw buffers are contiguous"),
            &state.freq_scale(),
        );
        l0 = state.l1;
        m0 = state.m1;
    }

    (SegmentState { segment, l0, m0 }, noise)
}

/// Subtract each baseline lane's time-mean. Zero samples are excluded
/// from the mean and stay zero, so flagged data remains flagged.
pub fn mean_subtract(data: &mut Array4<c32>) {
    let (_, n_bl, n_chan, n_pol) = data.dim();
    for bl in 0..n_bl {
        for c in 0..n_chan {
            for p in 0..n_pol {
                let mut lane = data.slice_mut(s![.., bl, c, p]);
                let (mut sum, mut count) = (c32::new(0.0, 0.0), 0usize);
                for v in lane.iter() {
                    if v.re != 0.0 || v.im != 0.0 {
                        sum += *v;
                        count += 1;
                    }
                }
                if count == 0 {
                    continue;
                }
                let mean = sum / count as f32;
                for v in lane.iter_mut() {
                    if v.re != 0.0 || v.im != 0.0 {
                        *v -= mean;
                    }
                }
            }
        }
    }
}

/// Per-baseline noise from the sigma-clipped imaginary part, which is
/// signal-free on axis.
pub fn estimate_noiseperbl(data: ArrayView4<c32>) -> f32 {
    let imag: Vec<f32> = data
        .mean_axis(Axis(2))
        .expect("channel axis is never empty")
        .iter()
        .map(|v| v.im)
        .collect();
    let (low, high) = sigma_clip_bounds(&imag, 3.0);
    let kept: Vec<f64> = imag
        .iter()
        .filter(|&&v| v > low && v < high)
        .map(|&v| v as f64)
        .collect();
    debug!(
        "Clipped to {}% of the data ({low:.3} to {high:.3}).",
        100 * kept.len() / imag.len().max(1)
    );
    crate::math::std_dev(&kept) as f32
}

/// Chunked noise measurements over the segment: clipped per-baseline
/// noise, zero fraction and a sample-image rms per window. At least one
/// measurement is always made.
fn noise_records(
    state: &PipelineState,
    segment: usize,
    data: &Array4<c32>,
    uvw: &UvwBuffer,
) -> Vec<NoiseRecord> {
    let n_ints = data.dim().0;
    let chunk = NOISE_CHUNK_INTS.min(n_ints).max(1);
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let freq_scale = state.freq_scale();

    let mut records = vec![];
    let mut r0 = 0;
    while r0 < n_ints {
        let r1 = (r0 + chunk).min(n_ints);
        let window = data.slice(s![r0..r1, .., .., ..]);
        let noise_per_bl = estimate_noiseperbl(window);
        let zero_fraction = window
            .iter()
            .filter(|v| v.re == 0.0 && v.im == 0.0)
            .count() as f32
            / window.len() as f32;
        let im = image::sample_image(
            data.view(),
            (r0 + r1) / 2,
            uvw.u.as_slice().expect("uvw buffers are contiguous"),
            uvw.v.as_slice().expect("uvw buffers are contiguous"),
            &freq_scale,
            &grid,
        );
        let vals: Vec<f64> = im.iter().map(|&v| v as f64).collect();
        records.push(NoiseRecord {
            segment,
            noise_per_bl,
            zero_fraction,
            image_rms: crate::math::std_dev(&vals) as f32,
        });
        r0 = r1;
    }
    records
}
