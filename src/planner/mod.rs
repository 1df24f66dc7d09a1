// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The planner: derive a consistent [`PipelineState`] from scan metadata and
user preferences.

The state is read-only once planning returns; the only per-segment
mutation (current segment index and phase-centre offset) lives in
[`SegmentState`], owned by the conditioner until hand-off.
 */

mod error;
pub use error::PlanError;

use std::path::PathBuf;

use hifitime::{Duration, Epoch, Unit};
use lazy_static::lazy_static;
use log::info;
use serde::{Deserialize, Serialize};
use vec1::Vec1;

use crate::constants::{MEM_HEADROOM, SECONDS_PER_DAY, VEL_C};
use crate::context::{Pol, ScanMetadata, SpectralWindow};
use crate::dedisperse;
use crate::flag::FlagRule;
use crate::params::Preferences;
use crate::prepare::TimeSub;
use crate::read::VisSource;
use crate::search::{FeatureKind, SearchType};

lazy_static! {
    /// All image sizes of the form 2^a·3^b with a ≤ 13, b ≤ 9, sorted.
    static ref IMAGE_SIZES: Vec<u64> = {
        let mut sizes = Vec::with_capacity(14 * 10);
        for a in 0..14u32 {
            for b in 0..10u32 {
                sizes.push(2u64.pow(a) * 3u64.pow(b));
            }
        }
        sizes.sort_unstable();
        sizes
    };
}

/// Everything the pipeline needs to search one scan. Immutable after
/// planning.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub filename: String,
    pub scan_id: usize,
    pub source_name: String,
    pub fileroot: String,
    pub workdir: PathBuf,

    pub start_time_mjd: f64,
    /// Raw correlator integration time \[s\].
    pub inttime_s: f64,
    /// Integrations in the scan after the initial skip.
    pub n_ints: usize,
    pub n_skip: usize,

    /// Frequency axis after downsampling, before channel selection
    /// \[GHz\].
    pub freq_orig_ghz: Vec<f64>,
    /// Selected channel indices into `freq_orig_ghz`.
    pub chans: Vec<usize>,
    /// Selected frequency axis \[GHz\]; strictly increasing.
    pub freq_ghz: Vec<f64>,
    /// Per spectral window, the half-open range it occupies on the
    /// selected channel axis.
    pub spw_chan_ranges: Vec<(usize, usize)>,

    /// Antennas searched (exclusions applied).
    pub ants: Vec<usize>,
    /// Lexicographically ordered cross baselines over `ants`.
    pub blarr: Vec<(usize, usize)>,
    pub pols: Vec<Pol>,

    pub dmarr: Vec1<f64>,
    pub dtarr: Vec1<usize>,
    /// Dispersion sweep per trial DM \[time samples\].
    pub data_delay: Vec<usize>,

    /// uv cell size \[wavelengths at the first original channel\].
    pub uv_res: usize,
    pub npix_x: usize,
    pub npix_y: usize,
    pub npix_x_full: usize,
    pub npix_y_full: usize,

    pub n_segments: usize,
    /// (start, stop) MJD per segment; adjacent segments overlap by
    /// `t_overlap_s`.
    pub segment_times: Vec1<(f64, f64)>,
    pub t_overlap_s: f64,
    pub t_segment_s: f64,
    /// Integrations delivered per segment, identical across segments.
    pub read_ints: usize,

    pub read_tdownsample: usize,
    pub read_fdownsample: usize,

    pub n_thread: usize,
    pub n_chunk: usize,

    pub search_type: SearchType,
    /// Candidate features, in emission order.
    pub features: Vec<FeatureKind>,
    pub sigma_image1: f64,
    pub sigma_image2: f64,

    pub timesub: TimeSub,
    pub flaglist: Vec<FlagRule>,
    pub gainfile: Option<PathBuf>,
    pub bpfile: Option<PathBuf>,
    pub save_cands: bool,
    pub save_noise: bool,

    /// Requested phase-centre offset applied by the conditioner.
    pub l1: f64,
    pub m1: f64,
}

/// The per-segment mutable slice of pipeline state, owned by the
/// conditioner until hand-off to the searcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmentState {
    pub segment: usize,
    /// Current phase-centre offset after any re-phasing.
    pub l0: f64,
    pub m0: f64,
}

impl PipelineState {
    pub fn n_ants(&self) -> usize {
        self.ants.len()
    }

    pub fn n_bl(&self) -> usize {
        self.blarr.len()
    }

    pub fn n_chan(&self) -> usize {
        self.freq_ghz.len()
    }

    pub fn n_pol(&self) -> usize {
        self.pols.len()
    }

    /// The common shape of the visibility buffers.
    pub fn vis_shape(&self) -> (usize, usize, usize, usize) {
        (self.read_ints, self.n_bl(), self.n_chan(), self.n_pol())
    }

    /// Effective time-sample interval after downsampling \[s\].
    pub fn sample_time_s(&self) -> f64 {
        self.inttime_s * self.read_tdownsample as f64
    }

    /// Per-channel `ν_c/ν_0` scale applied to (u, v) when gridding.
    pub fn freq_scale(&self) -> Vec<f64> {
        let f0 = self.freq_orig_ghz[0];
        self.freq_ghz.iter().map(|f| f / f0).collect()
    }

    pub fn max_data_delay(&self) -> usize {
        self.data_delay.iter().copied().max().unwrap_or(0)
    }

    /// Mid-time of a segment.
    pub fn segment_mid_time(&self, segment: usize) -> Epoch {
        let (t0, t1) = self.segment_times[segment];
        Epoch::from_mjd_utc((t0 + t1) / 2.0)
    }
}

/// Derive a consistent pipeline state. Fatal planning failures (memory,
/// degenerate selections) are reported as [`PlanError`].
pub fn plan(
    meta: &ScanMetadata,
    source: &dyn VisSource,
    prefs: &Preferences,
) -> Result<PipelineState, PlanError> {
    // Frequency axis: concatenated spw channels in ascending frequency
    // order, block-averaged by the read-time frequency downsampling.
    let fdown = prefs.read_fdownsample.max(1);
    let tdown = prefs.read_tdownsample.max(1);
    let raw_freqs_hz = meta.sorted_chan_freqs_hz();
    let freq_orig_ghz: Vec<f64> = raw_freqs_hz
        .chunks(fdown)
        .map(|chunk| chunk.iter().sum::<f64>() / chunk.len() as f64 / 1e9)
        .collect();
    if freq_orig_ghz.is_empty() {
        return Err(PlanError::NoChannels);
    }

    let mut chans: Vec<usize> = if prefs.chans.is_empty() {
        (0..freq_orig_ghz.len()).collect()
    } else {
        prefs.chans.clone()
    };
    // Spectral-window selection is channel selection over the windows'
    // downsampled ranges.
    if !prefs.spw.is_empty() {
        let spws = meta_spws_sorted(meta);
        let ranges = spw_downsampled_ranges(meta, fdown);
        chans.retain(|&c| {
            spws.iter()
                .zip(&ranges)
                .any(|(spw, &(lo, hi))| prefs.spw.contains(&spw.spw_id) && c >= lo && c < hi)
        });
    }
    let good = chans.windows(2).all(|w| w[1] > w[0])
        && chans.iter().all(|&c| c < freq_orig_ghz.len());
    if !good || chans.is_empty() {
        return Err(PlanError::BadChans {
            n_chan: freq_orig_ghz.len(),
        });
    }
    let freq_ghz: Vec<f64> = chans.iter().map(|&c| freq_orig_ghz[c]).collect();
    if !freq_ghz.windows(2).all(|w| w[1] > w[0]) {
        return Err(PlanError::FreqNotMonotonic);
    }
    let spw_chan_ranges = spw_chan_ranges(meta, fdown, &chans);

    // Antennas, baselines, polarisations.
    let ants: Vec<usize> = meta
        .antennas
        .iter()
        .filter(|&&a| !prefs.excludeants.contains(&a))
        .copied()
        .collect();
    if ants.len() < 2 {
        return Err(PlanError::NoAntennas);
    }
    let blarr = ScanMetadata::baselines_for(&ants);
    let pols: Vec<Pol> = if prefs.selectpol.is_empty() {
        meta.polarisations.iter().copied().collect()
    } else {
        meta.polarisations
            .iter()
            .filter(|&&p| prefs.selectpol.contains(&p))
            .copied()
            .collect()
    };
    if pols.is_empty() {
        return Err(PlanError::NoPols);
    }

    let inttime_s = meta.inttime_s();
    let sample_time_s = inttime_s * tdown as f64;
    let n_skip = prefs.nskip;
    let n_ints = meta.num_integrations.saturating_sub(n_skip);
    let start_time_mjd = meta.start_time_mjd();

    // uv extent at scan mid-time, in wavelengths at the first original
    // channel.
    let mid = meta.start_time
        + Duration::from_f64(
            inttime_s * meta.num_integrations as f64 / 2.0,
            Unit::Second,
        );
    let (u_m, v_m, _) = source.uvw_m(mid)?;
    let to_lambda = freq_orig_ghz[0] * 1e9 / VEL_C;
    let extent = |x: &[f64]| -> f64 {
        let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = x.iter().cloned().fold(f64::INFINITY, f64::min);
        (max - min) * to_lambda
    };
    let freq_stretch = freq_ghz.last().unwrap() / freq_orig_ghz[0];
    let urange = extent(&u_m) * freq_stretch;
    let vrange = extent(&v_m) * freq_stretch;

    // Image geometry.
    let uv_res = if prefs.uvres > 0 {
        prefs.uvres
    } else {
        // Default cell size from the dish diameter at the shortest
        // wavelength.
        let lambda_min = VEL_C / (freq_ghz.last().unwrap() * 1e9);
        (meta.dish_diameter_m / (lambda_min / 2.0)).round() as usize
    };
    let npix_x_full = image_size((prefs.uvoversample * urange).round() as u64, uv_res);
    let npix_y_full = image_size((prefs.uvoversample * vrange).round() as u64, uv_res);
    let (npix_x, npix_y) = if prefs.npix > 0 {
        (prefs.npix, prefs.npix)
    } else if prefs.npix_max > 0 {
        (
            npix_x_full.min(prefs.npix_max),
            npix_y_full.min(prefs.npix_max),
        )
    } else {
        (npix_x_full, npix_y_full)
    };
    let npix = npix_x.max(npix_y);

    // Trial grids.
    let dmarr = if prefs.dmarr.is_empty() {
        calc_dmgrid(
            &freq_ghz,
            sample_time_s,
            prefs.dm_maxloss,
            prefs.dm_pulsewidth,
            prefs.mindm,
            prefs.maxdm,
        )
    } else {
        prefs.dmarr.clone()
    };
    if !dmarr.windows(2).all(|w| w[1] > w[0]) {
        return Err(PlanError::BadDmarr);
    }
    let dmarr = Vec1::try_from_vec(dmarr).map_err(|_| PlanError::BadDmarr)?;
    let dtarr = if prefs.dtarr.is_empty() {
        vec![1]
    } else {
        prefs.dtarr.clone()
    };
    if dtarr.iter().any(|&dt| dt == 0) {
        return Err(PlanError::BadDtarr);
    }
    let dtarr = Vec1::try_from_vec(dtarr).map_err(|_| PlanError::BadDtarr)?;

    let data_delay: Vec<usize> = dmarr
        .iter()
        .map(|&dm| dedisperse::max_delay(&freq_ghz, sample_time_s, dm))
        .collect();
    let max_sweep = *data_delay.iter().max().unwrap();
    // Overlap covers the full sweep at the lowest frequency, an integer
    // count of samples by construction.
    let t_overlap_s = max_sweep as f64 * sample_time_s;

    // Threads and imaging chunks.
    let n_thread = if prefs.nthread > 0 {
        prefs.nthread
    } else {
        rayon::current_num_threads()
    };
    let mut n_chunk = if prefs.nchunk > 0 { prefs.nchunk } else { n_thread };

    // Segmentation, iterated against the memory limit.
    let n_bl = blarr.len();
    let n_chan = freq_ghz.len();
    let n_pol = pols.len();
    let fringe_time = calc_fringetime(uv_res, npix);
    let auto_nseg = |scale: f64| -> usize {
        let window = fringe_time - t_overlap_s;
        if window <= 0.0 {
            return n_ints.max(1);
        }
        (scale * inttime_s * n_ints as f64 / window)
            .floor()
            .max(1.0)
            .min(n_ints.max(1) as f64) as usize
    };

    let mut scale = prefs.scale_nsegments;
    let mut n_segments = if prefs.nsegments > 0 {
        prefs.nsegments
    } else {
        auto_nseg(scale)
    };
    let (mut segment_times, mut read_ints, mut t_segment_s) = calc_segment_times(
        start_time_mjd,
        inttime_s,
        n_skip,
        n_ints,
        t_overlap_s,
        n_segments,
        tdown,
    );

    if prefs.memory_limit > 0.0 {
        let mut attempts = 0;
        loop {
            let vismem = vis_memory_gb(read_ints, n_bl, n_chan, n_pol);
            if vismem <= prefs.memory_limit {
                break;
            }
            // A forced segment count cannot be grown, and once a scan is
            // one segment per integration there is nothing left to split.
            if prefs.nsegments > 0 || n_segments >= n_ints.max(1) || attempts >= 100 {
                return Err(PlanError::Infeasible {
                    vismem_gb: vismem,
                    limit_gb: prefs.memory_limit,
                    n_segments,
                });
            }
            attempts += 1;
            info!(
                "For nsegments={}, the pipeline would read {:.1} GB of visibilities and exceed the limit of {:.1} GB. Iterating to a better memory fit.",
                n_segments, vismem, prefs.memory_limit
            );
            scale *= vismem / prefs.memory_limit;
            n_segments = auto_nseg(scale);
            let recomputed = calc_segment_times(
                start_time_mjd,
                inttime_s,
                n_skip,
                n_ints,
                t_overlap_s,
                n_segments,
                tdown,
            );
            segment_times = recomputed.0;
            read_ints = recomputed.1;
            t_segment_s = recomputed.2;
        }

        // With the visibilities fitting, halve the imaging footprint until
        // the total fits too.
        while vis_memory_gb(read_ints, n_bl, n_chan, n_pol)
            + image_memory_gb(read_ints, n_chunk, n_thread, npix_x, npix_y)
            > prefs.memory_limit
            && read_ints / n_chunk > 0
        {
            info!(
                "Doubling nchunk from {} to fit in the {:.1} GB memory limit.",
                n_chunk, prefs.memory_limit
            );
            n_chunk *= 2;
        }
    }

    // A segment has to hold the full sweep plus the overlap or the
    // highest trial DM can never be searched.
    let overlap_ints = (t_overlap_s / sample_time_s).round() as usize;
    if read_ints < max_sweep + overlap_ints || read_ints == 0 {
        return Err(PlanError::SegmentTooShort {
            read_ints,
            need: max_sweep + overlap_ints,
        });
    }

    let segment_times =
        Vec1::try_from_vec(segment_times).expect("at least one segment is always planned");

    let fileroot = prefs.fileroot.clone().unwrap_or_else(|| {
        PathBuf::from(&meta.filename)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| meta.filename.clone())
    });
    let workdir = prefs.workdir.clone().unwrap_or_else(|| {
        PathBuf::from(&meta.filename)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    });

    let state = PipelineState {
        filename: meta.filename.clone(),
        scan_id: meta.scan_id,
        source_name: meta.source_name.clone(),
        fileroot,
        workdir,
        start_time_mjd,
        inttime_s,
        n_ints,
        n_skip,
        freq_orig_ghz,
        chans,
        freq_ghz,
        spw_chan_ranges,
        ants,
        blarr,
        pols,
        dmarr,
        dtarr,
        data_delay,
        uv_res,
        npix_x,
        npix_y,
        npix_x_full,
        npix_y_full,
        n_segments,
        segment_times,
        t_overlap_s,
        t_segment_s,
        read_ints,
        read_tdownsample: tdown,
        read_fdownsample: fdown,
        n_thread,
        n_chunk,
        search_type: prefs.searchtype,
        features: features_for(prefs.searchtype),
        sigma_image1: prefs.sigma_image1,
        sigma_image2: prefs.sigma_image2,
        timesub: prefs.timesub,
        flaglist: prefs.flaglist.clone(),
        gainfile: prefs.gainfile.clone(),
        bpfile: prefs.bpfile.clone(),
        save_cands: prefs.savecands,
        save_noise: prefs.savenoise,
        l1: prefs.l1,
        m1: prefs.m1,
    };
    log_summary(&state);
    Ok(state)
}

/// Candidate features emitted per search type, in order.
pub fn features_for(search_type: SearchType) -> Vec<FeatureKind> {
    use FeatureKind::*;
    match search_type {
        SearchType::Image1 => vec![Snr1, Immax1, L1, M1],
        SearchType::Image1Snip => vec![Snr1, Immax1, L1, M1, Im40, Spec20],
        SearchType::Image1Stats => vec![
            Snr1,
            Immax1,
            L1,
            M1,
            SpecStd,
            SpecSkew,
            SpecKurtosis,
            ImSkew,
            ImKurtosis,
        ],
        SearchType::Image2 | SearchType::Image2w => {
            vec![Snr1, Immax1, L1, M1, Snr2, Immax2, L2, M2]
        }
    }
}

/// The DM grid: monotone increasing trial DMs whose spacing bounds the
/// dispersion-smearing sensitivity loss by `maxloss`. `dt_us` is the
/// assumed intrinsic pulse width in microseconds. `maxdm == 0` yields the
/// single-trial grid `[0]`.
pub fn calc_dmgrid(
    freq_ghz: &[f64],
    sample_time_s: f64,
    maxloss: f64,
    dt_us: f64,
    mindm: f64,
    maxdm: f64,
) -> Vec<f64> {
    if maxdm == 0.0 || freq_ghz.len() < 2 {
        return vec![0.0];
    }

    let tsamp = sample_time_s * 1e6;
    let k = 8.3;
    let freq = freq_ghz.iter().sum::<f64>() / freq_ghz.len() as f64;
    let bw = 1e3 * (freq_ghz.last().unwrap() - freq_ghz.first().unwrap());
    let ch = 1e3 * (freq_ghz[1] - freq_ghz[0]);

    let w0_sq = |dm: f64| dt_us.powi(2) + tsamp.powi(2) + ((k * dm * ch) / freq.powi(3)).powi(2);
    let loss = |dm: f64, ddm: f64| {
        let w1_sq = w0_sq(dm) + ((k * ddm * bw) / freq.powi(3)).powi(2);
        1.0 - (w0_sq(dm).sqrt() / w1_sq.sqrt()).sqrt()
    };

    let mut grid = vec![mindm];
    let mut dm = mindm;
    while dm < maxdm {
        let ddm = (dm - grid.last().unwrap()) / 2.0;
        if loss(dm, ddm) > maxloss {
            grid.push(dm);
        }
        dm += 0.05;
    }
    grid
}

/// The smallest 2^a·3^b image size that covers `range` wavelengths at
/// `uv_res` per cell, clamped to the largest table entry.
pub fn image_size(range: u64, uv_res: usize) -> usize {
    let target = range / uv_res as u64;
    IMAGE_SIZES
        .iter()
        .find(|&&p| p > target)
        .copied()
        .unwrap_or(*IMAGE_SIZES.last().unwrap()) as usize
}

/// The largest time span over which one background subtraction and one uv
/// grid stay valid \[s\]. Assumes dec +90, which is conservative.
pub fn calc_fringetime(uv_res: usize, npix: usize) -> f64 {
    let maxbl = (uv_res * npix) as f64 / 2.0;
    0.5 * SECONDS_PER_DAY / (std::f64::consts::TAU * maxbl / 25.0)
}

/// The per-segment (start, stop) MJD table plus the fixed per-segment
/// integration count and span. Adjacent segments overlap by
/// `t_overlap_s`.
pub fn calc_segment_times(
    start_time_mjd: f64,
    inttime_s: f64,
    n_skip: usize,
    n_ints: usize,
    t_overlap_s: f64,
    n_segments: usize,
    read_tdownsample: usize,
) -> (Vec<(f64, f64)>, usize, f64) {
    let overlap_ints = t_overlap_s / inttime_s;
    let stops = crate::math::linspace(
        n_skip as f64 + overlap_ints,
        (n_skip + n_ints) as f64,
        n_segments + 1,
    );
    let stops = &stops[1..];
    let mut starts = Vec::with_capacity(n_segments);
    starts.push(n_skip as f64);
    starts.extend(stops[..n_segments - 1].iter().map(|s| s - overlap_ints));

    let times: Vec<(f64, f64)> = starts
        .iter()
        .zip(stops.iter())
        .map(|(&s0, &s1)| {
            (
                start_time_mjd + inttime_s * s0 / SECONDS_PER_DAY,
                start_time_mjd + inttime_s * s1 / SECONDS_PER_DAY,
            )
        })
        .collect();

    let total_time_read: f64 = times
        .iter()
        .map(|(t0, t1)| (t1 - t0) * SECONDS_PER_DAY)
        .sum();
    let read_ints = (total_time_read
        / (inttime_s * n_segments as f64 * read_tdownsample as f64))
        .round() as usize;
    let t_segment_s = total_time_read / n_segments as f64;
    (times, read_ints, t_segment_s)
}

/// Visibility memory per segment \[GB\], including the buffer copies.
pub fn vis_memory_gb(read_ints: usize, n_bl: usize, n_chan: usize, n_pol: usize) -> f64 {
    let to_gb = 8.0 / 1024f64.powi(3);
    MEM_HEADROOM * (read_ints * n_bl * n_chan * n_pol) as f64 * to_gb
}

/// Imaging memory per segment \[GB\].
pub fn image_memory_gb(
    read_ints: usize,
    n_chunk: usize,
    n_thread: usize,
    npix_x: usize,
    npix_y: usize,
) -> f64 {
    let to_gb = 8.0 / 1024f64.powi(3);
    (n_thread * (read_ints / n_chunk) * npix_x * npix_y) as f64 * to_gb
}

/// Expected thermal-noise false positives per segment.
pub fn calc_nfalse(state: &PipelineState) -> usize {
    let dt_factor: f64 = state.dtarr.iter().map(|&dt| 1.0 / dt as f64).sum();
    let n_trials = state.read_ints as f64
        * dt_factor
        * state.dmarr.len() as f64
        * (state.npix_x * state.npix_y) as f64;
    let q_frac = 1.0 - (libm::erf(state.sigma_image1 / 2f64.sqrt()) + 1.0) / 2.0;
    (q_frac * n_trials) as usize
}

fn meta_spws_sorted(meta: &ScanMetadata) -> Vec<&SpectralWindow> {
    let mut spws: Vec<&SpectralWindow> = meta.spectral_windows.iter().collect();
    spws.sort_by(|a, b| a.ref_freq_hz.partial_cmp(&b.ref_freq_hz).unwrap());
    spws
}

/// Each (frequency-sorted) spectral window's half-open range on the
/// downsampled, pre-selection channel axis.
fn spw_downsampled_ranges(meta: &ScanMetadata, fdown: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(meta.spectral_windows.len());
    let mut raw_start = 0;
    for spw in meta_spws_sorted(meta) {
        let raw_end = raw_start + spw.n_chan;
        ranges.push((raw_start / fdown, raw_end / fdown));
        raw_start = raw_end;
    }
    ranges
}

fn spw_chan_ranges(meta: &ScanMetadata, fdown: usize, chans: &[usize]) -> Vec<(usize, usize)> {
    spw_downsampled_ranges(meta, fdown)
        .into_iter()
        .map(|(lo, hi)| {
            // Positions on the selected channel axis that fall inside
            // this window.
            let first = chans.iter().position(|&c| c >= lo && c < hi);
            let count = chans.iter().filter(|&&c| c >= lo && c < hi).count();
            match first {
                Some(f) if count > 0 => (f, f + count),
                _ => (0, 0),
            }
        })
        .collect()
}

fn log_summary(state: &PipelineState) {
    info!("Pipeline summary:");
    info!(
        "\t Products saved with {} in {}",
        state.fileroot,
        state.workdir.display()
    );
    info!(
        "\t Using {} segment{} of {} ints ({:.1} s) with overlap of {:.1} s",
        state.n_segments,
        if state.n_segments == 1 { "" } else { "s" },
        state.read_ints,
        state.t_segment_s,
        state.t_overlap_s
    );
    if state.t_overlap_s > state.t_segment_s / 3.0 {
        info!(
            "\t\t Lots of segments needed, since the max DM sweep ({:.1} s) is close to the segment size ({:.2} s)",
            state.t_overlap_s, state.t_segment_s
        );
    }
    info!(
        "\t Downsampling in time/freq by {}/{} and skipping {} ints from the scan start.",
        state.read_tdownsample, state.read_fdownsample, state.n_skip
    );
    info!(
        "\t Search with {} and threshold {:.1}.",
        state.search_type, state.sigma_image1
    );
    info!(
        "\t Using {} DMs from {:.1} to {:.1} and dts {:?}.",
        state.dmarr.len(),
        state.dmarr.first(),
        state.dmarr.last(),
        state.dtarr
    );
    info!(
        "\t Using uvgrid npix=({},{}) and res={}.",
        state.npix_x, state.npix_y, state.uv_res
    );
    info!(
        "\t Expect {} thermal false positives per segment.",
        calc_nfalse(state)
    );
    let vismem = vis_memory_gb(state.read_ints, state.n_bl(), state.n_chan(), state.n_pol());
    let immem = image_memory_gb(
        state.read_ints,
        state.n_chunk,
        state.n_thread,
        state.npix_x,
        state.npix_y,
    );
    info!("\t Visibility memory usage is {vismem:.1} GB/segment");
    info!(
        "\t Imaging in {} chunk{} using a max of {immem:.1} GB/segment",
        state.n_chunk,
        if state.n_chunk == 1 { "" } else { "s" },
    );
    info!("\t Grand total memory usage: {:.1} GB/segment", vismem + immem);
}
