// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Synthetic backends and helpers shared by unit tests.

use hifitime::{Duration, Epoch, Unit};
use ndarray::prelude::*;
use vec1::Vec1;

use crate::c32;
use crate::context::{Pol, RADec, ScanMetadata, SpectralWindow};
use crate::params::Preferences;
use crate::planner::{self, PipelineState};
use crate::read::{ReadError, VisSource};

/// A fully in-memory scan: raw data plus time-independent (u,v,w).
pub(crate) struct SyntheticSource {
    pub data: Array4<c32>,
    pub u_m: Vec<f64>,
    pub v_m: Vec<f64>,
    pub w_m: Vec<f64>,
}

impl SyntheticSource {
    /// An all-zero scan matching the metadata's raw shape.
    pub(crate) fn zeros(meta: &ScanMetadata) -> SyntheticSource {
        let n_bl = meta.num_baselines();
        SyntheticSource {
            data: Array4::zeros((
                meta.num_integrations,
                n_bl,
                meta.num_chans(),
                meta.polarisations.len(),
            )),
            u_m: uvw_metres(n_bl, 0),
            v_m: uvw_metres(n_bl, 1),
            w_m: uvw_metres(n_bl, 2),
        }
    }

    /// No data at all; enough for planning, which only asks for (u,v,w).
    pub(crate) fn empty(meta: &ScanMetadata) -> SyntheticSource {
        let n_bl = meta.num_baselines();
        SyntheticSource {
            data: Array4::zeros((0, 0, 0, 0)),
            u_m: uvw_metres(n_bl, 0),
            v_m: uvw_metres(n_bl, 1),
            w_m: uvw_metres(n_bl, 2),
        }
    }
}

impl VisSource for SyntheticSource {
    fn read(&self, n_skip: usize, read_ints: usize) -> Result<Array4<c32>, ReadError> {
        let n_ints = self.data.dim().0;
        if n_skip + read_ints > n_ints {
            return Err(ReadError::Backend(format!(
                "requested ints {}..{} beyond scan of {}",
                n_skip,
                n_skip + read_ints,
                n_ints
            )));
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

/// Deterministic baseline coordinates \[m\], spread to ~±150 m.
pub(crate) fn uvw_metres(n_bl: usize, axis: usize) -> Vec<f64> {
    let mult = [97usize, 53, 29][axis];
    (0..n_bl)
        .map(|i| ((((i + 1) * mult) % 61) as f64 - 30.0) * 5.0)
        .collect()
}

/// A single-spw L-band scan description.
pub(crate) fn synth_meta(n_ants: usize, n_chan: usize, n_pol: usize, n_ints: usize) -> ScanMetadata {
    let pols = match n_pol {
        1 => vec![Pol::XX],
        2 => vec![Pol::XX, Pol::YY],
        _ => vec![Pol::XX, Pol::XY, Pol::YX, Pol::YY],
    };
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
        antennas: Vec1::try_from_vec((0..n_ants).collect()).unwrap(),
        polarisations: Vec1::try_from_vec(pols).unwrap(),
        start_time: Epoch::from_mjd_utc(58000.0),
        integration_time: Duration::from_f64(0.01, Unit::Second),
        num_integrations: n_ints,
        dish_diameter_m: 25.0,
    }
}

/// Preferences pinning the image geometry so tests are deterministic.
pub(crate) fn synth_prefs() -> Preferences {
    Preferences {
        uvres: 30,
        npix: 64,
        dmarr: vec![0.0, 50.0],
        nthread: 2,
        nchunk: 2,
        nsegments: 1,
        savecands: false,
        ..Default::default()
    }
}

/// A planned single-segment state over a synthetic scan.
pub(crate) fn planned_state(n_ants: usize, n_chan: usize, n_pol: usize) -> PipelineState {
    let meta = synth_meta(n_ants, n_chan, n_pol, 200);
    let source = SyntheticSource::zeros(&meta);
    planner::plan(&meta, &source, &synth_prefs()).unwrap()
}

/// A tiny deterministic generator for test noise: roughly standard
/// normal, from twelve summed uniforms.
pub(crate) struct TestRng(u64);

impl TestRng {
    pub(crate) fn new(seed: u64) -> TestRng {
        TestRng(seed.max(1))
    }

    fn next_uniform(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    }

    pub(crate) fn next_gauss(&mut self) -> f32 {
        (0..12).map(|_| self.next_uniform()).sum()
    }
}
