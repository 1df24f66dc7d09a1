// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time flagging.
//!
//! Each rule is an iterative sigma clip over one (spw, pol) block of the
//! visibility buffer: a per-unit amplitude statistic is formed along the
//! mode's axis, units deviating from the block mean by more than `sigma`
//! standard deviations are zeroed, and the loop repeats until fewer than
//! `convergence` new samples are clipped (capped at [`MAX_ITER`] rounds).

use log::info;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::c32;

/// Flagging never iterates more than this many times per block.
pub const MAX_ITER: usize = 10;

/// Which axis a rule's amplitude statistic is reduced over.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlagMode {
    /// Bad bandpass: clip whole channels.
    Badbp,
    /// Bad antenna pair: clip whole baselines.
    Badap,
    /// Ringing: clip whole integrations.
    Ring,
}

/// One flagging rule, applied per (spw, pol) block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlagRule {
    pub mode: FlagMode,
    pub sigma: f64,
    pub convergence: f64,
}

/// Apply every rule to every (spw, pol) block of `data`
/// (`[time, baseline, channel, pol]`). `spw_chan_ranges` gives each
/// spectral window's half-open range on the selected-channel axis.
/// Returns the total number of samples zeroed.
pub fn flag_data(
    data: &mut Array4<c32>,
    spw_chan_ranges: &[(usize, usize)],
    rules: &[FlagRule],
) -> usize {
    let n_pol = data.dim().3;
    let mut total = 0;
    for rule in rules {
        for &(c0, c1) in spw_chan_ranges {
            if c0 == c1 {
                continue;
            }
            for pol in 0..n_pol {
                let mut block = data.slice_mut(s![.., .., c0..c1, pol]);
                let n = flag_block(&mut block, rule);
                total += n;
                if n > 0 {
                    info!(
                        "Flagged {} samples with {} (sigma {}) in chans {}..{} pol {}",
                        n, rule.mode, rule.sigma, c0, c1, pol
                    );
                }
            }
        }
    }
    total
}

/// Clip one `[time, baseline, channel]` block in place. Returns the
/// number of samples zeroed.
pub(crate) fn flag_block(block: &mut ArrayViewMut3<c32>, rule: &FlagRule) -> usize {
    let axis = match rule.mode {
        FlagMode::Badbp => Axis(2),
        FlagMode::Badap => Axis(1),
        FlagMode::Ring => Axis(0),
    };

    let mut total_clipped = 0;
    for _ in 0..MAX_ITER {
        // Mean amplitude per unit along the reduction axis, ignoring
        // already-zeroed samples. A fully zero unit drops out of the
        // statistics.
        let stats: Vec<Option<f64>> = block
            .axis_iter(axis)
            .map(|unit| {
                let (mut sum, mut count) = (0.0, 0usize);
                for v in unit.iter() {
                    if v.re != 0.0 || v.im != 0.0 {
                        sum += v.norm() as f64;
                        count += 1;
                    }
                }
                (count > 0).then(|| sum / count as f64)
            })
            .collect();

        let live: Vec<f64> = stats.iter().filter_map(|s| *s).collect();
        if live.len() < 2 {
            break;
        }
        let mean = crate::math::mean(&live);
        let std = crate::math::std_dev(&live);
        if std == 0.0 {
            break;
        }

        let mut clipped = 0;
        for (i, stat) in stats.iter().enumerate() {
            if let Some(s) = stat {
                if (s - mean).abs() > rule.sigma * std {
                    let mut unit = block.index_axis_mut(axis, i);
                    for v in unit.iter_mut() {
                        if v.re != 0.0 || v.im != 0.0 {
                            *v = c32::new(0.0, 0.0);
                            clipped += 1;
                        }
                    }
                }
            }
        }

        total_clipped += clipped;
        if (clipped as f64) < rule.convergence || clipped == 0 {
            break;
        }
    }
    total_clipped
}
