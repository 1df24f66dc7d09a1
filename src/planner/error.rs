// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors when planning a search.

use thiserror::Error;

use crate::read::ReadError;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Visibility reading requires {vismem_gb:.1} GB at nsegments {n_segments}, but the memory limit is {limit_gb:.1} GB")]
    Infeasible {
        vismem_gb: f64,
        limit_gb: f64,
        n_segments: usize,
    },

    #[error("No channels left after selection")]
    NoChannels,

    #[error("Channel selection must be strictly increasing and within 0..{n_chan}")]
    BadChans { n_chan: usize },

    #[error("The selected frequency axis is not strictly increasing")]
    FreqNotMonotonic,

    #[error("dtarr values must all be larger than 0")]
    BadDtarr,

    #[error("dmarr must be monotonically increasing")]
    BadDmarr,

    #[error("No antennas left after exclusions")]
    NoAntennas,

    #[error("No polarisations left after selection")]
    NoPols,

    #[error("Segments of {read_ints} integrations cannot cover the maximum dispersion sweep plus overlap ({need} integrations)")]
    SegmentTooShort { read_ints: usize, need: usize },

    #[error(transparent)]
    Source(#[from] ReadError),
}
