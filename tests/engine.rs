// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end engine runs against the synthetic backend.

mod common;

use crossbeam_utils::atomic::AtomicCell;
use hifitime::Epoch;
use ndarray::prelude::*;

use burstpipe::calibrate::{CalError, Calibrator, GainSolutions};
use burstpipe::image::{find_peak, ImageGrid};
use burstpipe::planner;
use burstpipe::sim::add_transient;
use burstpipe::{c64, CandidateSink, PipelineEngine, Pol, Preferences};

use common::{fill_noise, l_band_meta, SynthScan};

fn base_prefs(workdir: &std::path::Path) -> Preferences {
    Preferences {
        uvres: 30,
        npix: 64,
        dmarr: vec![0.0, 50.0],
        sigma_image1: 6.0,
        nthread: 2,
        nchunk: 2,
        nsegments: 2,
        workdir: Some(workdir.to_path_buf()),
        ..Default::default()
    }
}

/// Empty data: the engine searches every segment, finds nothing, and
/// still persists a state snapshot with an empty candidate list.
#[test]
fn empty_scan_persists_empty_records() {
    let dir = tempfile::tempdir().unwrap();
    let meta = l_band_meta(32, 240);
    let scan = SynthScan::zeros(&meta);
    let prefs = Preferences {
        savecands: true,
        savenoise: true,
        ..base_prefs(dir.path())
    };
    let state = planner::plan(&meta, &scan, &prefs).unwrap();
    let sink = CandidateSink::new(&state);

    let stop = AtomicCell::new(false);
    let engine = PipelineEngine::new(&state, &meta, &scan);
    let counts = engine.run(&[0, 1], &stop, false).unwrap();

    assert_eq!(counts.get(&0), Some(&0));
    assert_eq!(counts.get(&1), Some(&0));
    for segment in 0..2 {
        let contents = std::fs::read_to_string(sink.cands_path(segment)).unwrap();
        let mut lines = contents.lines();
        let snapshot: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(snapshot["segment"], segment);
        let cands: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(cands.as_array().unwrap().len(), 0);
        // The noise journal got at least one measurement.
        let noise = std::fs::read_to_string(sink.noise_path(segment)).unwrap();
        assert!(noise.lines().count() >= 1);
    }
}

/// A dispersed pulse at the segment boundary is owned by exactly one of
/// the two overlapping segments.
fn boundary_counts(pulse_raw_int: usize) -> (usize, usize) {
    let dir = tempfile::tempdir().unwrap();
    let meta = l_band_meta(64, 240);
    let mut scan = SynthScan::zeros(&meta);
    let prefs = Preferences {
        savecands: false,
        ..base_prefs(dir.path())
    };
    let state = planner::plan(&meta, &scan, &prefs).unwrap();
    assert_eq!(state.read_ints, 122);

    fill_noise(&mut scan.data, 0.1, 41);
    let (u, v) = scan.uvw_lambda(&meta);
    let freq_scale = state.freq_scale();

    // Calibrate the injection against the noise floor.
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let sigma_im = find_peak(&grid.image(
        scan.data.slice(s![50, .., .., ..]),
        &u,
        &v,
        &freq_scale,
    ))
    .unwrap()
    .sigma;
    let mut unit = Array4::zeros((1, state.n_bl(), state.n_chan(), 1));
    add_transient(
        &mut unit,
        &u,
        &v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        0.001,
        -0.002,
        0,
        1.0,
        0.0,
        1,
    );
    let peak_unit = find_peak(&grid.image(unit.slice(s![0, .., .., ..]), &u, &v, &freq_scale))
        .unwrap()
        .value;

    add_transient(
        &mut scan.data,
        &u,
        &v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        0.001,
        -0.002,
        pulse_raw_int,
        (10.0 * sigma_im / peak_unit) as f64,
        50.0,
        1,
    );

    let stop = AtomicCell::new(false);
    let engine = PipelineEngine::new(&state, &meta, &scan);
    let counts = engine.run(&[0, 1], &stop, false).unwrap();
    (counts[&0], counts[&1])
}

#[test]
fn boundary_pulse_is_owned_by_the_later_segment() {
    // Raw integration 118 sits in the overlap; the n_skip_dm policy
    // assigns it to segment 1 at the matching DM.
    assert_eq!(boundary_counts(118), (0, 1));
}

#[test]
fn interior_pulse_is_owned_by_its_own_segment() {
    assert_eq!(boundary_counts(100), (1, 0));
}

/// An existing candidate file makes the engine skip that segment
/// entirely.
#[test]
fn existing_candsfile_skips_the_segment() {
    let dir = tempfile::tempdir().unwrap();
    let meta = l_band_meta(32, 240);
    let scan = SynthScan::zeros(&meta);
    let prefs = Preferences {
        savecands: true,
        ..base_prefs(dir.path())
    };
    let state = planner::plan(&meta, &scan, &prefs).unwrap();
    let sink = CandidateSink::new(&state);
    std::fs::write(sink.cands_path(0), "occupied\n").unwrap();

    let stop = AtomicCell::new(false);
    let engine = PipelineEngine::new(&state, &meta, &scan);
    let counts = engine.run(&[0, 1], &stop, false).unwrap();

    assert_eq!(counts.get(&0), None);
    assert_eq!(counts.get(&1), Some(&0));
    // The pre-existing file is untouched.
    assert_eq!(std::fs::read_to_string(sink.cands_path(0)).unwrap(), "occupied\n");
    assert!(sink.cands_path(1).exists());
}

/// A raised stop flag terminates cleanly without writing anything.
#[test]
fn stop_flag_halts_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let meta = l_band_meta(32, 240);
    let scan = SynthScan::zeros(&meta);
    let prefs = Preferences {
        savecands: true,
        ..base_prefs(dir.path())
    };
    let state = planner::plan(&meta, &scan, &prefs).unwrap();
    let sink = CandidateSink::new(&state);

    let stop = AtomicCell::new(true);
    let engine = PipelineEngine::new(&state, &meta, &scan);
    let counts = engine.run(&[0, 1], &stop, false).unwrap();
    assert!(counts.is_empty());
    assert!(!sink.cands_path(0).exists());
}

/// A calibrator that scales everything; a broken one degrades
/// gracefully.
struct ScalingCal(f64);

impl Calibrator for ScalingCal {
    fn select(
        &mut self,
        _time: Epoch,
        freqs_hz: &[f64],
        _blarr: &[(usize, usize)],
        pols: &[Pol],
    ) -> Result<GainSolutions, CalError> {
        if self.0 <= 0.0 {
            return Err(CalError::Load("no solutions in table".to_string()));
        }
        // G[a]·conj(G[b]) = self.0 for every baseline.
        let g = self.0.sqrt();
        Ok(GainSolutions {
            antennas: (0..10).collect(),
            gains: Array3::from_elem((10, freqs_hz.len(), pols.len()), c64::new(g, 0.0)),
            flags: Array3::from_elem((10, freqs_hz.len(), pols.len()), false),
        })
    }
}

#[test]
fn broken_calibrator_degrades_gracefully() {
    let dir = tempfile::tempdir().unwrap();
    let meta = l_band_meta(32, 240);
    let mut scan = SynthScan::zeros(&meta);
    fill_noise(&mut scan.data, 0.1, 5);
    let prefs = Preferences {
        savecands: false,
        ..base_prefs(dir.path())
    };
    let state = planner::plan(&meta, &scan, &prefs).unwrap();

    let stop = AtomicCell::new(false);
    let mut broken = ScalingCal(0.0);
    let mut engine = PipelineEngine::new(&state, &meta, &scan);
    engine.calibrator = Some(&mut broken);
    // The run completes; the segments are searched uncalibrated.
    let counts = engine.run(&[0, 1], &stop, false).unwrap();
    assert_eq!(counts.len(), 2);
}
