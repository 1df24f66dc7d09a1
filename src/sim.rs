// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transient injection for end-to-end checks and mock detection runs.

use ndarray::prelude::*;

use crate::c32;
use crate::constants::TAU;
use crate::dedisperse::calc_delay;

/// Add a point-source transient to a visibility buffer
/// (`[time, baseline, channel, pol]`).
///
/// The pulse lands at integration `i` at the highest frequency and sweeps
/// to later times at lower frequencies following the trial-DM delay
/// model, so a matched dedispersion trial realigns it exactly. `l`, `m`
/// are direction cosines; `amp` is per-sample amplitude in data units;
/// `dt` is the pulse width in integrations.
#[allow(clippy::too_many_arguments)]
pub fn add_transient(
    data: &mut Array4<c32>,
    u: &[f32],
    v: &[f32],
    freq_ghz: &[f64],
    freq_scale: &[f64],
    inttime_s: f64,
    l: f64,
    m: f64,
    i: usize,
    amp: f64,
    dm: f64,
    dt: usize,
) {
    let (n_ints, n_bl, n_chan, n_pol) = data.dim();
    let delays = calc_delay(freq_ghz, inttime_s, dm);
    for c in 0..n_chan {
        for bl in 0..n_bl {
            let ang = (l * u[bl] as f64 + m * v[bl] as f64) * freq_scale[c];
            let vis = c32::from_polar(amp as f32, (TAU * ang) as f32);
            for t in i + delays[c]..(i + delays[c] + dt).min(n_ints) {
                for p in 0..n_pol {
                    data[[t, bl, c, p]] += vis;
                }
            }
        }
    }
}
