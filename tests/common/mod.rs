// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A synthetic visibility backend for end-to-end tests.

use hifitime::{Duration, Epoch, Unit};
use ndarray::prelude::*;
use vec1::Vec1;

use burstpipe::c32;
use burstpipe::read::ReadError;
use burstpipe::{Pol, RADec, ScanMetadata, SpectralWindow, VisSource};

/// A fully in-memory scan with time-independent (u,v,w).
pub struct SynthScan {
    pub data: Array4<c32>,
    pub u_m: Vec<f64>,
    pub v_m: Vec<f64>,
    pub w_m: Vec<f64>,
}

impl SynthScan {
    pub fn zeros(meta: &ScanMetadata) -> SynthScan {
        let n_bl = meta.num_baselines();
        let n_chan: usize = meta.spectral_windows.iter().map(|s| s.n_chan).sum();
        SynthScan {
            data: Array4::zeros((
                meta.num_integrations,
                n_bl,
                n_chan,
                meta.polarisations.len(),
            )),
            u_m: uvw_metres(n_bl, 0),
            v_m: uvw_metres(n_bl, 1),
            w_m: uvw_metres(n_bl, 2),
        }
    }

    /// The engine's view of this scan's (u, v): metres cast to
    /// wavelengths at the first channel with the sign flip.
    pub fn uvw_lambda(&self, meta: &ScanMetadata) -> (Vec<f32>, Vec<f32>) {
        let f0 = meta.spectral_windows.first().ref_freq_hz;
        let factor = -f0 / 299_792_458.0;
        (
            self.u_m.iter().map(|&u| (u * factor) as f32).collect(),
            self.v_m.iter().map(|&v| (v * factor) as f32).collect(),
        )
    }
}

impl VisSource for SynthScan {
    fn read(&self, n_skip: usize, read_ints: usize) -> Result<Array4<c32>, ReadError> {
        if n_skip + read_ints > self.data.dim().0 {
            return Err(ReadError::Backend("read beyond scan".to_string()));
        }
        Ok(self
            .data
            .slice(s![n_skip..n_skip + read_ints, .., .., ..])
            .to_owned())
    }

    fn uvw_m(&self, _time: Epoch) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), ReadError> {
        Ok((self.u_m.clone(), self.v_m.clone(), self.w_m.clone()))
    }
}

pub fn uvw_metres(n_bl: usize, axis: usize) -> Vec<f64> {
    let mult = [97usize, 53, 29][axis];
    (0..n_bl)
        .map(|i| ((((i + 1) * mult) % 61) as f64 - 30.0) * 5.0)
        .collect()
}

/// A 10-antenna, single-spw L-band scan.
pub fn l_band_meta(n_chan: usize, n_ints: usize) -> ScanMetadata {
    ScanMetadata {
        filename: "synthetic.sdm".to_string(),
        scan_id: 1,
        source_name: "J0000+0000".to_string(),
        phase_centre: RADec::new(0.0, 0.5),
        spectral_windows: Vec1::try_from_vec(vec![SpectralWindow {
            spw_id: 0,
            n_chan,
            ref_freq_hz: 1.272e9,
            chan_width_hz: 4e6,
        }])
        .unwrap(),
        antennas: Vec1::try_from_vec((0..10).collect()).unwrap(),
        polarisations: Vec1::try_from_vec(vec![Pol::XX]).unwrap(),
        start_time: Epoch::from_mjd_utc(58000.0),
        integration_time: Duration::from_f64(0.01, Unit::Second),
        num_integrations: n_ints,
        dish_diameter_m: 25.0,
    }
}

/// Deterministic roughly-normal noise.
pub struct TestRng(u64);

impl TestRng {
    pub fn new(seed: u64) -> TestRng {
        TestRng(seed.max(1))
    }

    fn next_uniform(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    }

    pub fn next_gauss(&mut self) -> f32 {
        (0..12).map(|_| self.next_uniform()).sum()
    }
}

pub fn fill_noise(data: &mut Array4<c32>, sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    for v in data.iter_mut() {
        *v = c32::new(sigma * rng.next_gauss(), sigma * rng.next_gauss());
    }
}
