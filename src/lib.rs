// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time transient search pipeline core for radio interferometric
//! visibility data.
//!
//! A scan is split into overlapping time segments; each segment is read,
//! calibrated and conditioned, then swept over a (DM, dt) grid with
//! dedispersion, snapshot imaging and thresholding. Candidate detections
//! are emitted with image cutouts and spectra.

pub mod buffer;
pub mod calibrate;
pub(crate) mod constants;
pub mod context;
pub mod dedisperse;
pub(crate) mod error;
pub mod flag;
pub mod image;
pub(crate) mod math;
pub mod params;
pub mod pipeline;
pub mod planner;
pub mod prepare;
pub mod read;
pub mod search;
pub mod sim;
pub mod sink;

#[cfg(test)]
pub(crate) mod tests;

// Re-exports.
pub use buffer::{UvwBuffer, VisBuffer};
pub use calibrate::{CalError, Calibrator, GainSolutions};
pub use context::{Pol, RADec, ScanMetadata, SpectralWindow};
pub use error::BurstpipeError;
pub use params::Preferences;
pub use pipeline::PipelineEngine;
pub use planner::{PipelineState, PlanError, SegmentState};
pub use read::VisSource;
pub use search::{CandKey, CandMap, FeatureKind, FeatureValue, SearchType};
pub use sink::CandidateSink;

/// Single-precision complex visibility sample.
#[allow(non_camel_case_types)]
pub type c32 = num_complex::Complex<f32>;

/// Double-precision complex number, used wherever gain precision matters.
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;
