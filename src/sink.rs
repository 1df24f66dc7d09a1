// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Persisting candidate and noise records.

A per-segment candidate file holds two sequential JSON documents: a state
snapshot, then the ordered candidate list. Noise measurements are
appended to a per-segment journal as JSON lines. The formats are opaque
to the rest of the pipeline but stable for downstream aggregation.
 */

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::planner::{PipelineState, SegmentState};
use crate::prepare::NoiseRecord;
use crate::search::CandMap;

/// Writes candidate and noise records for one scan.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    workdir: PathBuf,
    fileroot: String,
    scan_id: usize,
}

/// The state snapshot written ahead of each segment's candidates.
#[derive(Serialize)]
struct Snapshot<'a> {
    #[serde(flatten)]
    state: &'a PipelineState,
    segment: usize,
    l0: f64,
    m0: f64,
}

impl CandidateSink {
    pub fn new(state: &PipelineState) -> CandidateSink {
        CandidateSink {
            workdir: state.workdir.clone(),
            fileroot: state.fileroot.clone(),
            scan_id: state.scan_id,
        }
    }

    /// The candidate file for a segment.
    pub fn cands_path(&self, segment: usize) -> PathBuf {
        self.workdir.join(format!(
            "cands_{}_sc{}seg{}.json",
            self.fileroot, self.scan_id, segment
        ))
    }

    /// The noise journal for a segment.
    pub fn noise_path(&self, segment: usize) -> PathBuf {
        self.workdir.join(format!(
            "noise_{}_sc{}seg{}.json",
            self.fileroot, self.scan_id, segment
        ))
    }

    /// Persist one segment's candidates behind a state snapshot. An
    /// existing file is never overwritten.
    pub fn save_cands(
        &self,
        state: &PipelineState,
        seg: &SegmentState,
        cands: &CandMap,
    ) -> Result<(), SinkError> {
        let path = self.cands_path(seg.segment);
        if path.exists() {
            return Err(SinkError::CandsfileExists(path.display().to_string()));
        }
        let snapshot = Snapshot {
            state,
            segment: seg.segment,
            l0: seg.l0,
            m0: seg.m0,
        };
        // Keys are tuples, so the map is written as a record sequence.
        let records: Vec<_> = cands.iter().collect();

        let mut fh = OpenOptions::new().write(true).create_new(true).open(&path)?;
        serde_json::to_writer(&mut fh, &snapshot)?;
        fh.write_all(b"\n")?;
        serde_json::to_writer(&mut fh, &records)?;
        fh.write_all(b"\n")?;
        info!(
            "Saved {} candidates for segment {} to {}",
            cands.len(),
            seg.segment,
            path.display()
        );
        Ok(())
    }

    /// Append noise measurements to the segment's journal.
    pub fn save_noise(&self, segment: usize, records: &[NoiseRecord]) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.noise_path(segment);
        let mut fh = OpenOptions::new().create(true).append(true).open(&path)?;
        for record in records {
            serde_json::to_writer(&mut fh, record)?;
            fh.write_all(b"\n")?;
        }
        info!(
            "Wrote {} noise measurement{} to {}.",
            records.len(),
            if records.len() == 1 { "" } else { "s" },
            path.display()
        );
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    /// Refusing to overwrite an existing candidate record.
    #[error("candsfile {0} already exists")]
    CandsfileExists(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
