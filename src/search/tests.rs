// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Searcher tests with synthetic visibilities.

use crossbeam_utils::atomic::AtomicCell;
use ndarray::prelude::*;

use super::*;
use crate::buffer::{UvwBuffer, VisBuffer};
use crate::image::{find_peak, ImageGrid};
use crate::params::Preferences;
use crate::planner::{self, SegmentState};
use crate::sim::add_transient;
use crate::tests::{synth_meta, synth_prefs, SyntheticSource, TestRng};

fn segment0() -> SegmentState {
    SegmentState {
        segment: 0,
        l0: 0.0,
        m0: 0.0,
    }
}

fn test_uvw(state: &PipelineState) -> UvwBuffer {
    let mut uvw = UvwBuffer::new(state.n_bl());
    for bl in 0..state.n_bl() {
        uvw.u[bl] = ((((bl + 1) * 97) % 61) as f32 - 30.0) * 20.0;
        uvw.v[bl] = ((((bl + 1) * 53) % 61) as f32 - 30.0) * 20.0;
        uvw.w[bl] = ((((bl + 1) * 29) % 61) as f32 - 30.0) * 2.0;
    }
    uvw
}

fn gaussian_noise(buf: &mut VisBuffer, sigma: f32, seed: u64) {
    let mut rng = TestRng::new(seed);
    for v in buf.data.iter_mut() {
        *v = crate::c32::new(sigma * rng.next_gauss(), sigma * rng.next_gauss());
    }
}

#[test]
fn all_zero_data_yields_no_candidates() {
    let state = crate::tests::planned_state(10, 32, 1);
    let work = VisBuffer::new(state.vis_shape());
    let mut resamp = VisBuffer::new(state.vis_shape());
    let uvw = test_uvw(&state);
    let stop = AtomicCell::new(false);
    let cands = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert!(cands.is_empty());
}

#[test]
fn cancellation_aborts_at_the_first_boundary() {
    let state = crate::tests::planned_state(10, 32, 1);
    let mut work = VisBuffer::new(state.vis_shape());
    work.data[[0, 0, 0, 0]] = crate::c32::new(1.0, 0.0);
    let mut resamp = VisBuffer::new(state.vis_shape());
    let uvw = test_uvw(&state);
    let stop = AtomicCell::new(true);
    assert!(matches!(
        search(&state, &segment0(), &work, &mut resamp, &uvw, &stop),
        Err(SearchError::Cancelled)
    ));
}

/// An 8σ dispersed pulse in Gaussian noise is recovered at its DM trial,
/// integration and position, and nowhere else.
#[test]
fn injected_transient_is_recovered_once() {
    let meta = synth_meta(10, 64, 1, 200);
    let source = SyntheticSource::zeros(&meta);
    let prefs = Preferences {
        dmarr: vec![0.0, 50.0, 100.0],
        dtarr: vec![1],
        sigma_image1: 6.0,
        ..synth_prefs()
    };
    let state = planner::plan(&meta, &source, &prefs).unwrap();
    assert_eq!(state.n_bl(), 45);

    let uvw = test_uvw(&state);
    let u = uvw.u.as_slice().unwrap();
    let v = uvw.v.as_slice().unwrap();
    let freq_scale = state.freq_scale();
    let (l, m) = (0.001, -0.002);

    // Calibrate the injection amplitude off the noise image: what does a
    // unit-amplitude source peak at, and what is the noise floor?
    let mut work = VisBuffer::new(state.vis_shape());
    gaussian_noise(&mut work, 0.1, 7);
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let sigma_im = find_peak(&grid.image(
        work.data.slice(s![100, .., .., ..]),
        u,
        v,
        &freq_scale,
    ))
    .unwrap()
    .sigma;
    let mut unit = VisBuffer::new((1, state.n_bl(), state.n_chan(), 1));
    add_transient(
        &mut unit.data, u, v, &state.freq_ghz, &freq_scale, state.inttime_s, l, m, 0, 1.0, 0.0,
        1,
    );
    let peak_unit = find_peak(&grid.image(unit.data.slice(s![0, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .value;

    // Inject at 10x the image noise, DM 50, integration 100.
    let amp = (10.0 * sigma_im / peak_unit) as f64;
    add_transient(
        &mut work.data,
        u,
        v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        l,
        m,
        100,
        amp,
        50.0,
        1,
    );

    let mut resamp = VisBuffer::new(state.vis_shape());
    let stop = AtomicCell::new(false);
    let cands = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();

    assert_eq!(cands.len(), 1, "keys: {:?}", cands.keys().collect::<Vec<_>>());
    let (key, features) = cands.first().unwrap();
    assert_eq!(
        *key,
        CandKey {
            segment: 0,
            integration: 100,
            dm_idx: 1,
            dt_idx: 0,
            beam: 0
        }
    );
    // Feature order is snr1, immax1, l1, m1.
    let snr1 = match features[0] {
        FeatureValue::Scalar(s) => s,
        _ => panic!("snr1 is a scalar"),
    };
    assert!(snr1 >= 7.0, "snr1 = {snr1}");
    let cell = 1.0 / (state.npix_x * state.uv_res) as f64;
    match (&features[2], &features[3]) {
        (FeatureValue::Scalar(l1), FeatureValue::Scalar(m1)) => {
            assert!((l1 - l).abs() <= 1.5 * cell, "l1 = {l1}");
            assert!((m1 - m).abs() <= 1.5 * cell, "m1 = {m1}");
        }
        _ => panic!("l1/m1 are scalars"),
    }
}

/// Pulse-width trials: a two-integration pulse is strongest at dt=2 and
/// keyed by its undownsampled integration.
#[test]
fn wide_pulse_found_at_matching_dt() {
    let meta = synth_meta(10, 32, 1, 200);
    let source = SyntheticSource::zeros(&meta);
    let prefs = Preferences {
        dmarr: vec![0.0],
        dtarr: vec![2],
        sigma_image1: 6.0,
        ..synth_prefs()
    };
    let state = planner::plan(&meta, &source, &prefs).unwrap();
    let uvw = test_uvw(&state);
    let u = uvw.u.as_slice().unwrap();
    let v = uvw.v.as_slice().unwrap();
    let freq_scale = state.freq_scale();

    let mut work = VisBuffer::new(state.vis_shape());
    gaussian_noise(&mut work, 0.1, 11);
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let sigma_im = find_peak(&grid.image(
        work.data.slice(s![50, .., .., ..]),
        u,
        v,
        &freq_scale,
    ))
    .unwrap()
    .sigma;
    let mut unit = VisBuffer::new((1, state.n_bl(), state.n_chan(), 1));
    add_transient(
        &mut unit.data, u, v, &state.freq_ghz, &freq_scale, state.inttime_s, 0.001, 0.001, 0,
        1.0, 0.0, 1,
    );
    let peak_unit = find_peak(&grid.image(unit.data.slice(s![0, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .value;

    // Per-integration amplitude 8x noise; dt=2 averaging keeps the full
    // amplitude while noise drops.
    let amp = (8.0 * sigma_im / peak_unit) as f64;
    add_transient(
        &mut work.data,
        u,
        v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        0.001,
        0.001,
        60,
        amp,
        0.0,
        2,
    );

    let mut resamp = VisBuffer::new(state.vis_shape());
    let stop = AtomicCell::new(false);
    let cands = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert_eq!(cands.len(), 1);
    let key = *cands.keys().next().unwrap();
    assert_eq!((key.integration, key.dt_idx), (60, 0));
}

/// Two-stage search: the full-resolution image gates candidates. Long
/// baselines that decohere the source live outside the first-stage grid
/// but inside the second.
#[test]
fn second_stage_rejects_what_it_cannot_confirm() {
    let meta = synth_meta(10, 32, 1, 200);
    let source = SyntheticSource::zeros(&meta);
    let prefs = Preferences {
        dmarr: vec![0.0],
        sigma_image1: 4.5,
        sigma_image2: 8.0,
        searchtype: SearchType::Image2,
        ..synth_prefs()
    };
    let mut state = planner::plan(&meta, &source, &prefs).unwrap();
    state.npix_x = 32;
    state.npix_y = 32;
    state.npix_x_full = 128;
    state.npix_y_full = 128;

    // 20 short baselines carry a coherent source; 25 long ones carry
    // random phases and only enter the full-resolution grid.
    let mut uvw = UvwBuffer::new(state.n_bl());
    let mut rng = TestRng::new(23);
    for bl in 0..state.n_bl() {
        if bl < 20 {
            uvw.u[bl] = ((((bl + 1) * 97) % 29) as f32 - 14.0) * 30.0;
            uvw.v[bl] = ((((bl + 1) * 53) % 29) as f32 - 14.0) * 30.0;
        } else {
            let sign = if bl % 2 == 0 { 1.0 } else { -1.0 };
            uvw.u[bl] = sign * (700.0 + (((bl * 37) % 29) as f32) * 35.0);
            uvw.v[bl] = -sign * (700.0 + (((bl * 41) % 29) as f32) * 35.0);
        }
    }
    let freq_scale = state.freq_scale();
    let (l, m) = (0.002, 0.001);
    let mut work = VisBuffer::new(state.vis_shape());
    let i0 = 70;
    for bl in 0..state.n_bl() {
        for (c, fs) in freq_scale.iter().enumerate() {
            let vis = if bl < 20 {
                let ang = (l * uvw.u[bl] as f64 + m * uvw.v[bl] as f64) * fs;
                crate::c32::from_polar(1.0, (crate::constants::TAU * ang) as f32)
            } else {
                // Strong incoherent power on the long baselines.
                crate::c32::from_polar(
                    8.0,
                    crate::constants::TAU as f32 * rng.next_gauss(),
                )
            };
            work.data[[i0, bl, c, 0]] = vis;
        }
    }

    let mut resamp = VisBuffer::new(state.vis_shape());
    let stop = AtomicCell::new(false);

    // First-stage-only control: the coherent source passes.
    let mut control = state.clone();
    control.search_type = SearchType::Image1;
    control.features = planner::features_for(SearchType::Image1);
    let found = search(&control, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert_eq!(found.len(), 1);

    // Two-stage: the decohered full-resolution image fails the σ2 gate.
    let rejected = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert!(
        rejected.is_empty(),
        "keys: {:?}",
        rejected.keys().collect::<Vec<_>>()
    );

    // Dropping σ2 lets the same candidate through with second-stage
    // features attached.
    let mut lenient = state.clone();
    lenient.sigma_image2 = 0.5;
    let accepted = search(&lenient, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert_eq!(accepted.len(), 1);
    let (_, features) = accepted.first().unwrap();
    assert_eq!(features.len(), 8);
}

/// Snippet features: the image cutout stays within bounds and the
/// spectrum window is clipped to the valid range.
#[test]
fn snippet_features_have_expected_shapes() {
    let meta = synth_meta(10, 32, 1, 200);
    let source = SyntheticSource::zeros(&meta);
    let prefs = Preferences {
        dmarr: vec![0.0],
        sigma_image1: 6.0,
        searchtype: SearchType::Image1Snip,
        ..synth_prefs()
    };
    let state = planner::plan(&meta, &source, &prefs).unwrap();
    let uvw = test_uvw(&state);
    let u = uvw.u.as_slice().unwrap();
    let v = uvw.v.as_slice().unwrap();
    let freq_scale = state.freq_scale();

    let mut work = VisBuffer::new(state.vis_shape());
    gaussian_noise(&mut work, 0.05, 3);
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let sigma_im = find_peak(&grid.image(work.data.slice(s![5, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .sigma;
    let mut unit = VisBuffer::new((1, state.n_bl(), state.n_chan(), 1));
    add_transient(
        &mut unit.data, u, v, &state.freq_ghz, &freq_scale, state.inttime_s, 0.003, 0.0, 0, 1.0,
        0.0, 1,
    );
    let peak_unit = find_peak(&grid.image(unit.data.slice(s![0, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .value;

    // Near the segment start so the spectrum window clips at 0.
    add_transient(
        &mut work.data,
        u,
        v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        0.003,
        0.0,
        5,
        (30.0 * sigma_im / peak_unit) as f64,
        0.0,
        1,
    );

    let mut resamp = VisBuffer::new(state.vis_shape());
    let stop = AtomicCell::new(false);
    let cands = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert_eq!(cands.len(), 1);
    let (key, features) = cands.first().unwrap();
    assert_eq!(key.integration, 5);

    match &features[4] {
        FeatureValue::Image(im) => {
            let (nx, ny) = im.dim();
            assert!(nx <= 40 && ny <= 40);
            assert!(nx > 0 && ny > 0);
        }
        other => panic!("im40 should be an image, got {other:?}"),
    }
    match &features[5] {
        FeatureValue::Spectrum(spec) => {
            let (nt, n_chan, n_pol) = spec.dim();
            // Window 5-10..5+10 clipped at 0 -> 15 integrations.
            assert_eq!(nt, 15);
            assert_eq!(n_chan, state.n_chan());
            assert_eq!(n_pol, 1);
            // The pulse integration carries the (rephased, real) source
            // flux; an empty integration does not.
            let band_mean = |t: usize| {
                spec.slice(s![t, .., 0]).iter().map(|v| v.re).sum::<f32>() / n_chan as f32
            };
            assert!(band_mean(5) > 4.0 * band_mean(12).abs());
        }
        other => panic!("spec20 should be a spectrum, got {other:?}"),
    }
}

/// Spectrum statistics are finite and the flat-spectrum source has small
/// skew.
#[test]
fn stats_features_are_populated() {
    let meta = synth_meta(10, 32, 1, 200);
    let source = SyntheticSource::zeros(&meta);
    let prefs = Preferences {
        dmarr: vec![0.0],
        sigma_image1: 6.0,
        searchtype: SearchType::Image1Stats,
        ..synth_prefs()
    };
    let state = planner::plan(&meta, &source, &prefs).unwrap();
    let uvw = test_uvw(&state);
    let u = uvw.u.as_slice().unwrap();
    let v = uvw.v.as_slice().unwrap();
    let freq_scale = state.freq_scale();

    let mut work = VisBuffer::new(state.vis_shape());
    gaussian_noise(&mut work, 0.05, 17);
    let grid = ImageGrid::new(state.npix_x, state.npix_y, state.uv_res);
    let sigma_im = find_peak(&grid.image(work.data.slice(s![80, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .sigma;
    let mut unit = VisBuffer::new((1, state.n_bl(), state.n_chan(), 1));
    add_transient(
        &mut unit.data, u, v, &state.freq_ghz, &freq_scale, state.inttime_s, -0.002, 0.001, 0,
        1.0, 0.0, 1,
    );
    let peak_unit = find_peak(&grid.image(unit.data.slice(s![0, .., .., ..]), u, v, &freq_scale))
        .unwrap()
        .value;
    add_transient(
        &mut work.data,
        u,
        v,
        &state.freq_ghz,
        &freq_scale,
        state.inttime_s,
        -0.002,
        0.001,
        80,
        (10.0 * sigma_im / peak_unit) as f64,
        0.0,
        1,
    );

    let mut resamp = VisBuffer::new(state.vis_shape());
    let stop = AtomicCell::new(false);
    let cands = search(&state, &segment0(), &work, &mut resamp, &uvw, &stop).unwrap();
    assert_eq!(cands.len(), 1);
    let (_, features) = cands.first().unwrap();
    assert_eq!(features.len(), 9);
    for f in features {
        match f {
            FeatureValue::Scalar(s) => assert!(s.is_finite()),
            other => panic!("image1stats features are scalars, got {other:?}"),
        }
    }
}
