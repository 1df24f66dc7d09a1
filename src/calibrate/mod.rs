// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Code to handle applying calibration.

Parsing of calibration tables is the job of an external provider; the
pipeline only needs the [`Calibrator`] capability, which yields per
(antenna, channel, polarisation) complex gains and flags for a point in
time.
 */

use hifitime::Epoch;
use log::debug;
use ndarray::prelude::*;
use thiserror::Error;

use crate::context::Pol;
use crate::{c32, c64};

/// Complex gains and flags selected for one moment of one scan. The
/// antenna axis is described by `antennas`; channel and polarisation axes
/// must match the visibility buffer the solutions are applied to.
#[derive(Debug, Clone)]
pub struct GainSolutions {
    /// Antenna id per row of `gains`/`flags`.
    pub antennas: Vec<usize>,

    /// `[antenna, channel, pol]` multiplicative corrections.
    pub gains: Array3<c64>,

    /// `[antenna, channel, pol]`; a flagged endpoint zeroes the sample.
    pub flags: Array3<bool>,
}

impl GainSolutions {
    /// Multiply each visibility on baseline (a, b) by
    /// `G[a]·conj(G[b])`, zeroing samples whose endpoints are flagged.
    pub fn apply(
        &self,
        data: &mut Array4<c32>,
        blarr: &[(usize, usize)],
    ) -> Result<(), CalError> {
        let (_, n_bl, n_chan, n_pol) = data.dim();
        let (n_sol_ants, n_sol_chan, n_sol_pol) = self.gains.dim();
        if self.flags.dim() != self.gains.dim() {
            return Err(CalError::ShapeMismatch {
                expected: format!("{:?}", self.gains.dim()),
                got: format!("{:?}", self.flags.dim()),
            });
        }
        if n_sol_chan != n_chan || n_sol_pol != n_pol || n_bl != blarr.len() {
            return Err(CalError::ShapeMismatch {
                expected: format!("({n_sol_ants}, {n_chan}, {n_pol})"),
                got: format!("({n_sol_ants}, {n_sol_chan}, {n_sol_pol})"),
            });
        }

        // Antenna id -> solution row.
        let row = |ant: usize| -> Result<usize, CalError> {
            self.antennas
                .iter()
                .position(|&a| a == ant)
                .ok_or(CalError::MissingAntenna(ant))
        };
        let bl_rows: Vec<(usize, usize)> = blarr
            .iter()
            .map(|&(a, b)| Ok((row(a)?, row(b)?)))
            .collect::<Result<_, CalError>>()?;

        for (i_bl, &(ra, rb)) in bl_rows.iter().enumerate() {
            for c in 0..n_chan {
                for p in 0..n_pol {
                    let mut lane = data.slice_mut(s![.., i_bl, c, p]);
                    if self.flags[[ra, c, p]] || self.flags[[rb, c, p]] {
                        lane.fill(c32::new(0.0, 0.0));
                    } else {
                        let g = self.gains[[ra, c, p]] * self.gains[[rb, c, p]].conj();
                        for v in lane.iter_mut() {
                            let prod = c64::new(v.re as f64, v.im as f64) * g;
                            *v = c32::new(prod.re as f32, prod.im as f32);
                        }
                    }
                }
            }
        }
        debug!("Applied gains to {} baselines", blarr.len());
        Ok(())
    }
}

/// The capability an external calibration provider must supply.
pub trait Calibrator: Send {
    /// Select the best solutions for the given time, frequencies,
    /// baselines and polarisations.
    fn select(
        &mut self,
        time: Epoch,
        freqs_hz: &[f64],
        blarr: &[(usize, usize)],
        pols: &[Pol],
    ) -> Result<GainSolutions, CalError>;
}

#[derive(Error, Debug)]
pub enum CalError {
    /// The provider could not parse or select solutions. Recoverable: the
    /// conditioner proceeds uncalibrated.
    #[error("Could not load calibration solutions: {0}")]
    Load(String),

    #[error("No calibration solutions for antenna {0}")]
    MissingAntenna(usize),

    #[error("Gain solution shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
}
