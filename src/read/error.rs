// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors when reading a segment of visibilities.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Spectral-window frequencies are out of order with {n_jumps} wraps; expected exactly one")]
    SpwOrderAmbiguous { n_jumps: usize },

    #[error("Backend delivered {got} integrations; expected {expected}")]
    ShortRead { expected: usize, got: usize },

    #[error("Backend data has shape {got}; expected {expected}")]
    BadShape { expected: String, got: String },

    #[error("Visibility backend error: {0}")]
    Backend(String),
}
