// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Small numeric helpers shared by flagging, noise estimation and feature
//! extraction.

/// Iterative sigma clip. Returns the final `(low, high)` bounds; values
/// outside them are the clipped outliers. `sigma` is the clip level in
/// standard deviations.
pub(crate) fn sigma_clip_bounds(values: &[f32], sigma: f64) -> (f32, f32) {
    let mut low = f32::NEG_INFINITY;
    let mut high = f32::INFINITY;
    let mut n_kept = values.len();
    for _ in 0..10 {
        let kept = values.iter().copied().filter(|&v| v >= low && v <= high);
        let (mut sum, mut count) = (0.0f64, 0usize);
        for v in kept.clone() {
            sum += v as f64;
            count += 1;
        }
        if count == 0 {
            break;
        }
        let mean = sum / count as f64;
        let var = kept.map(|v| (v as f64 - mean).powi(2)).sum::<f64>() / count as f64;
        let std = var.sqrt();
        low = (mean - sigma * std) as f32;
        high = (mean + sigma * std) as f32;
        let new_kept = values.iter().filter(|&&v| v >= low && v <= high).count();
        if new_kept == n_kept {
            break;
        }
        n_kept = new_kept;
    }
    (low, high)
}

/// Central moment of order `p` about the supplied mean.
fn central_moment(values: &[f64], mean: f64, p: i32) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|&v| (v - mean).powi(p)).sum::<f64>() / values.len() as f64
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    central_moment(values, mean(values), 2).sqrt()
}

/// Biased sample skewness, `m3 / m2^(3/2)`.
pub(crate) fn skewness(values: &[f64]) -> f64 {
    let m = mean(values);
    let m2 = central_moment(values, m, 2);
    if m2 == 0.0 {
        return 0.0;
    }
    central_moment(values, m, 3) / m2.powf(1.5)
}

/// Biased sample excess kurtosis (Fisher), `m4 / m2² − 3`.
pub(crate) fn kurtosis(values: &[f64]) -> f64 {
    let m = mean(values);
    let m2 = central_moment(values, m, 2);
    if m2 == 0.0 {
        return 0.0;
    }
    central_moment(values, m, 4) / (m2 * m2) - 3.0
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub(crate) fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect(),
    }
}
