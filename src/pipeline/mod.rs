// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The segmented dataflow engine.

Two coarse stages run in parallel: a reader thread fills and conditions
the read buffer while the searcher sweeps the previous segment out of the
work buffer. The three shared buffers are allocated once and guarded by
mutexes; a "work buffer free" token closes the hand-off race between the
searcher releasing the work lock and the reader's next copy.
 */

mod error;
pub use error::PipelineError;

use std::sync::Mutex;
use std::thread;

use crossbeam_channel::bounded;
use crossbeam_utils::atomic::AtomicCell;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{error, info};
use scopeguard::defer_on_unwind;

use crate::buffer::{UvwBuffer, VisBuffer};
use crate::calibrate::Calibrator;
use crate::context::ScanMetadata;
use crate::planner::{PipelineState, SegmentState};
use crate::prepare::{self, NoiseRecord};
use crate::read::{self, VisSource};
use crate::search::{self, SearchError};
use crate::sink::{CandidateSink, SinkError};

/// Reborrows an `Option<&mut dyn Calibrator>` with a lifetime tied to
/// the reborrow itself rather than the original reference, so it can be
/// called repeatedly from within a loop.
fn reborrow_calibrator<'s, 'c: 's>(
    calibrator: &'s mut Option<&'c mut dyn Calibrator>,
) -> Option<&'s mut dyn Calibrator> {
    match calibrator {
        Some(c) => Some(&mut **c),
        None => None,
    }
}

/// One conditioned segment, ready to search.
struct Prepared {
    segment: usize,
    seg_state: SegmentState,
    noise: Vec<NoiseRecord>,
}

/// Runs the read → prepare → search pipeline over a scan's segments.
pub struct PipelineEngine<'a> {
    pub state: &'a PipelineState,
    pub meta: &'a ScanMetadata,
    pub source: &'a dyn VisSource,
    pub calibrator: Option<&'a mut dyn Calibrator>,
    pub sink: CandidateSink,
}

impl<'a> PipelineEngine<'a> {
    pub fn new(
        state: &'a PipelineState,
        meta: &'a ScanMetadata,
        source: &'a dyn VisSource,
    ) -> PipelineEngine<'a> {
        PipelineEngine {
            state,
            meta,
            source,
            calibrator: None,
            sink: CandidateSink::new(state),
        }
    }

    /// Process the given segments in order. Returns the candidate count
    /// per searched segment. A raised `stop` flag halts the reader before
    /// the next segment and the searcher at the next (DM, dt) boundary;
    /// in-flight results are discarded.
    pub fn run(
        self,
        segments: &[usize],
        stop: &AtomicCell<bool>,
        draw_progress_bar: bool,
    ) -> Result<IndexMap<usize, usize>, PipelineError> {
        let PipelineEngine {
            state,
            meta,
            source,
            mut calibrator,
            sink,
        } = self;
        info!(
            "Starting search of {}, scan {}, segments {:?}",
            state.filename, state.scan_id, segments
        );

        let shape = state.vis_shape();
        let n_bl = state.n_bl();
        let read_buf = Mutex::new((VisBuffer::new(shape), UvwBuffer::new(n_bl)));
        let work_buf = Mutex::new((VisBuffer::new(shape), UvwBuffer::new(n_bl)));
        let resamp_buf = Mutex::new(VisBuffer::new(shape));

        let (prepared_tx, prepared_rx) = bounded::<Prepared>(1);
        let (free_tx, free_rx) = bounded::<()>(1);
        // The work buffer starts out free.
        free_tx.send(()).expect("fresh channel has capacity");

        let progress = ProgressBar::with_draw_target(
            Some(segments.len() as u64),
            if draw_progress_bar {
                ProgressDrawTarget::stdout()
            } else {
                ProgressDrawTarget::hidden()
            },
        )
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:16}: [{wide_bar:.blue}] {pos:2}/{len:2} segments ({elapsed_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_message("Searching");

        // Track whether any thread hit trouble so the others can bail
        // early.
        let poisoned = AtomicCell::new(false);
        let poisoned = &poisoned;
        let (state_ref, read_buf, work_buf, resamp_buf) =
            (state, &read_buf, &work_buf, &resamp_buf);
        let sink_ref = &sink;

        let (reader_result, search_result) = thread::scope(|s| {
            // Reader + conditioner thread: one segment ahead of the
            // searcher.
            let reader = s.spawn(move || -> Result<(), PipelineError> {
                defer_on_unwind! { poisoned.store(true); }
                for &segment in segments {
                    if stop.load() {
                        info!("Stop requested; reader halting before segment {segment}");
                        break;
                    }
                    if poisoned.load() {
                        break;
                    }
                    if state_ref.save_cands && sink_ref.cands_path(segment).exists() {
                        error!(
                            "candsfile {} already exists. Skipping segment {segment}.",
                            sink_ref.cands_path(segment).display()
                        );
                        continue;
                    }

                    let mut read_guard = read_buf.lock().unwrap();
                    let (vis, uvw) = &mut *read_guard;
                    if let Err(e) =
                        read::read_segment(state_ref, meta, source, segment, vis, uvw)
                    {
                        poisoned.store(true);
                        return Err(e.into());
                    }
                    let (seg_state, noise) = prepare::condition(
                        state_ref,
                        reborrow_calibrator(&mut calibrator),
                        segment,
                        vis,
                        uvw,
                    );

                    // Wait until the searcher has drained the work
                    // buffer, then copy under both locks.
                    if free_rx.recv().is_err() {
                        break;
                    }
                    {
                        let mut work_guard = work_buf.lock().unwrap();
                        let (w_vis, w_uvw) = &mut *work_guard;
                        w_vis.copy_from(vis);
                        w_uvw.copy_from(uvw);
                    }
                    drop(read_guard);

                    if prepared_tx
                        .send(Prepared {
                            segment,
                            seg_state,
                            noise,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(())
            });

            // Searcher: holds the work lock for the whole (DM, dt) sweep
            // of a segment.
            let search_result = (|| -> Result<IndexMap<usize, usize>, PipelineError> {
                let mut counts = IndexMap::new();
                for prepared in prepared_rx.iter() {
                    let work_guard = work_buf.lock().unwrap();
                    let (w_vis, w_uvw) = &*work_guard;
                    let mut resamp_guard = resamp_buf.lock().unwrap();
                    let outcome = search::search(
                        state_ref,
                        &prepared.seg_state,
                        w_vis,
                        &mut resamp_guard,
                        w_uvw,
                        stop,
                    );
                    drop(resamp_guard);
                    drop(work_guard);
                    let cands = match outcome {
                        Ok(cands) => cands,
                        Err(SearchError::Cancelled) => {
                            info!(
                                "Search cancelled; discarding in-flight segment {}",
                                prepared.segment
                            );
                            break;
                        }
                    };
                    let _ = free_tx.send(());

                    if state_ref.save_noise {
                        sink_ref.save_noise(prepared.segment, &prepared.noise)?;
                    }
                    if state_ref.save_cands {
                        match sink_ref.save_cands(state_ref, &prepared.seg_state, &cands) {
                            Ok(()) => {}
                            Err(SinkError::CandsfileExists(path)) => {
                                error!("candsfile {path} already exists. Not overwriting.");
                            }
                            Err(e) => {
                                poisoned.store(true);
                                return Err(e.into());
                            }
                        }
                    }
                    counts.insert(prepared.segment, cands.len());
                    progress.inc(1);
                }
                Ok(counts)
            })();
            if search_result.is_err() {
                poisoned.store(true);
            }
            // Unblock a reader waiting on the hand-off before joining it.
            drop(free_tx);
            drop(prepared_rx);

            (reader.join().unwrap(), search_result)
        });

        progress.abandon();
        reader_result?;
        let counts = search_result?;
        info!(
            "Searched {} segment{}; {} candidates in total",
            counts.len(),
            if counts.len() == 1 { "" } else { "s" },
            counts.values().sum::<usize>()
        );
        Ok(counts)
    }
}
