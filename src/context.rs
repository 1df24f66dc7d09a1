// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Observation metadata handed in by the (external) data backend.

use hifitime::{Duration, Epoch};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use vec1::Vec1;

/// A J2000 sky position \[radians\].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RADec {
    pub ra_rad: f64,
    pub dec_rad: f64,
}

impl RADec {
    pub fn new(ra_rad: f64, dec_rad: f64) -> RADec {
        RADec { ra_rad, dec_rad }
    }
}

/// Instrumental polarisation of a correlation product.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum Pol {
    XX,
    XY,
    YX,
    YY,
    RR,
    RL,
    LR,
    LL,
}

/// One spectral window of the correlator setup. Channel centres run from
/// `ref_freq_hz` in steps of `chan_width_hz`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectralWindow {
    pub spw_id: usize,
    pub n_chan: usize,
    pub ref_freq_hz: f64,
    pub chan_width_hz: f64,
}

impl SpectralWindow {
    /// Channel centre frequencies \[Hz\].
    pub fn chan_freqs_hz(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.n_chan).map(move |i| self.ref_freq_hz + i as f64 * self.chan_width_hz)
    }
}

/// Immutable description of one scan of one observation. Produced by the
/// external metadata parser; everything the planner needs to lay out a
/// search.
#[derive(Debug, Clone)]
pub struct ScanMetadata {
    pub filename: String,
    pub scan_id: usize,
    pub source_name: String,
    pub phase_centre: RADec,

    /// Spectral windows in correlator order. This is the channel order of
    /// raw data from the backend; it need not be monotonic in frequency
    /// (see the segment reader's wrap handling).
    pub spectral_windows: Vec1<SpectralWindow>,

    /// Antenna identifiers in backend order.
    pub antennas: Vec1<usize>,

    /// Polarisation products in the raw data's order.
    pub polarisations: Vec1<Pol>,

    pub start_time: Epoch,
    pub integration_time: Duration,
    pub num_integrations: usize,
    pub dish_diameter_m: f64,
}

impl ScanMetadata {
    /// Scan start as MJD UTC days.
    pub fn start_time_mjd(&self) -> f64 {
        self.start_time.as_mjd_utc_days()
    }

    /// Integration time in seconds.
    pub fn inttime_s(&self) -> f64 {
        self.integration_time.to_seconds()
    }

    /// Cross-correlation baselines for the given antennas: lexicographic
    /// `(ants[i], ants[j])` pairs with `i < j`.
    pub fn baselines_for(ants: &[usize]) -> Vec<(usize, usize)> {
        let mut bls = Vec::with_capacity(ants.len() * (ants.len().saturating_sub(1)) / 2);
        for (i, &a) in ants.iter().enumerate() {
            for &b in &ants[i + 1..] {
                bls.push((a, b));
            }
        }
        bls
    }

    pub fn num_baselines(&self) -> usize {
        let n = self.antennas.len();
        n * (n - 1) / 2
    }

    /// Total raw channel count over all spectral windows.
    pub fn num_chans(&self) -> usize {
        self.spectral_windows.iter().map(|spw| spw.n_chan).sum()
    }

    /// Channel centre frequencies \[Hz\] over all spectral windows, in
    /// ascending spw reference-frequency order (the order the segment
    /// reader delivers after wrap correction).
    pub fn sorted_chan_freqs_hz(&self) -> Vec<f64> {
        let mut spws: Vec<&SpectralWindow> = self.spectral_windows.iter().collect();
        spws.sort_by(|a, b| a.ref_freq_hz.partial_cmp(&b.ref_freq_hz).unwrap());
        spws.iter().flat_map(|spw| spw.chan_freqs_hz()).collect()
    }
}

#[cfg(test)]
mod tests {
    use hifitime::Unit;

    use super::*;

    #[test]
    fn baselines_are_lexicographic() {
        let bls = ScanMetadata::baselines_for(&[1, 2, 5]);
        assert_eq!(bls, vec![(1, 2), (1, 5), (2, 5)]);
    }

    #[test]
    fn pol_round_trips_through_str() {
        use std::str::FromStr;
        assert_eq!(Pol::from_str("XX").unwrap(), Pol::XX);
        assert_eq!(Pol::RL.to_string(), "RL");
    }

    #[test]
    fn sorted_freqs_reorder_rolled_spws() {
        let spws = vec1::vec1![
            SpectralWindow {
                spw_id: 2,
                n_chan: 2,
                ref_freq_hz: 1.5e9,
                chan_width_hz: 1e6
            },
            SpectralWindow {
                spw_id: 0,
                n_chan: 2,
                ref_freq_hz: 1.3e9,
                chan_width_hz: 1e6
            },
        ];
        let meta = ScanMetadata {
            filename: "test.sdm".to_string(),
            scan_id: 1,
            source_name: "J0000+0000".to_string(),
            phase_centre: RADec::new(0.0, 0.0),
            spectral_windows: spws,
            antennas: vec1::vec1![0, 1],
            polarisations: vec1::vec1![Pol::XX],
            start_time: Epoch::from_mjd_utc(58000.0),
            integration_time: hifitime::Duration::from_f64(0.01, Unit::Second),
            num_integrations: 100,
            dish_diameter_m: 25.0,
        };
        let freqs = meta.sorted_chan_freqs_hz();
        assert!(freqs.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(freqs[0], 1.3e9);
    }
}
