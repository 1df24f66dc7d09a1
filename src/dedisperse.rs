// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dedispersion and time resampling.
//!
//! Operates in place on the resample buffer, which the caller pre-fills
//! with a copy of the work buffer. Each channel's time axis is shifted
//! toward earlier time by its integer dispersion delay, then consecutive
//! `dt` integrations are averaged. Edges beyond the maximum delay are
//! zeroed; the caller must not image them.

use ndarray::prelude::*;

use crate::c32;
use crate::constants::K_DM;

/// Integer dispersion delay per channel \[samples\], relative to the
/// highest frequency. `freq_ghz` must be strictly increasing.
pub fn calc_delay(freq_ghz: &[f64], inttime_s: f64, dm: f64) -> Vec<usize> {
    let nu_max = *freq_ghz.last().expect("frequency axis is never empty");
    freq_ghz
        .iter()
        .map(|nu| {
            let tau = K_DM * dm * (nu.powi(-2) - nu_max.powi(-2));
            (tau / inttime_s).round() as usize
        })
        .collect()
}

/// The channel-0-relative delay at the maximum frequency: the number of
/// time samples the dispersion sweep spans.
pub fn max_delay(freq_ghz: &[f64], inttime_s: f64, dm: f64) -> usize {
    calc_delay(freq_ghz, inttime_s, dm)
        .into_iter()
        .max()
        .unwrap_or(0)
}

/// Dedisperse and resample `data` (`[time, baseline, channel, pol]`) in
/// place for one trial (dm, dt). With `dm == 0` and `dt == 1` this is the
/// identity.
pub fn dedisperse_resample(
    data: &mut ArrayViewMut4<c32>,
    freq_ghz: &[f64],
    inttime_s: f64,
    dm: f64,
    dt: usize,
) {
    debug_assert!(dt > 0);
    let n_ints = data.dim().0;
    let delays = calc_delay(freq_ghz, inttime_s, dm);

    for mut bl in data.axis_iter_mut(Axis(1)) {
        // bl: [time, channel, pol]
        let n_pol = bl.dim().2;
        for (c, &delay) in delays.iter().enumerate() {
            for p in 0..n_pol {
                let mut lane = bl.slice_mut(s![.., c, p]);
                let n_valid = n_ints.saturating_sub(delay) / dt;
                // Writing index i while reading from i*dt + k + delay is
                // safe ascending: the read index never precedes the write
                // index.
                for i in 0..n_valid {
                    let mut acc = c32::new(0.0, 0.0);
                    for k in 0..dt {
                        acc += lane[i * dt + k + delay];
                    }
                    lane[i] = acc / dt as f32;
                }
                for i in n_valid..n_ints {
                    lane[i] = c32::new(0.0, 0.0);
                }
            }
        }
    }
}
