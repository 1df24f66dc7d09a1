// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The single error type callers see.

use thiserror::Error;

use crate::params::ParamsError;
use crate::pipeline::PipelineError;
use crate::planner::PlanError;

#[derive(Error, Debug)]
pub enum BurstpipeError {
    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
