// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors from the running engine.

use thiserror::Error;

use crate::read::ReadError;
use crate::sink::SinkError;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Reader faults are fatal at the engine level.
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}
