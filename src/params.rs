// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! User preferences for a search.
//!
//! A [`Preferences`] is the parameter object the planner consumes; unset
//! numerics (0 or empty) invoke auto-planning. Preferences can be read
//! from a `.toml` or `.json` file.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    DEFAULT_DM_MAX_LOSS, DEFAULT_DM_PULSE_WIDTH, DEFAULT_SIGMA_IMAGE1, DEFAULT_SIGMA_IMAGE2,
};
use crate::context::Pol;
use crate::flag::FlagRule;
use crate::prepare::TimeSub;
use crate::search::SearchType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    /// Channel indices to keep after downsampling. Empty keeps all.
    pub chans: Vec<usize>,

    /// Spectral windows to keep. Empty keeps all.
    pub spw: Vec<usize>,

    /// Antennas excluded from all baselines.
    pub excludeants: Vec<usize>,

    /// Polarisation products to search. Empty keeps all in the data.
    pub selectpol: Vec<Pol>,

    /// Integrations to skip at the start of the scan.
    pub nskip: usize,

    /// Block-average factor applied to the time axis on read.
    pub read_tdownsample: usize,

    /// Block-average factor applied to the frequency axis on read.
    pub read_fdownsample: usize,

    /// Trial dispersion measures \[pc/cm³\]. Empty derives a grid from
    /// `maxdm`/`dm_maxloss`/`dm_pulsewidth`.
    pub dmarr: Vec<f64>,

    /// Trial pulse widths \[integration multiples\]. Empty means `[1]`.
    pub dtarr: Vec<usize>,

    pub mindm: f64,
    pub maxdm: f64,

    /// Sensitivity loss tolerated between adjacent trial DMs.
    pub dm_maxloss: f64,

    /// Assumed intrinsic pulse width for the DM grid \[µs\].
    pub dm_pulsewidth: f64,

    /// uv cell size \[wavelengths at the first channel\]. 0 = derive from
    /// the dish diameter.
    pub uvres: usize,

    /// Image size per axis. 0 = derive from the uv extent.
    pub npix: usize,

    /// Optional "do not exceed" cap on the derived image size.
    pub npix_max: usize,

    /// Oversampling factor applied to the uv extent when sizing images.
    pub uvoversample: f64,

    /// Worker threads for dedispersion and imaging. 0 = all cores.
    pub nthread: usize,

    /// Imaging work chunks per (DM, dt) pair. 0 = one per thread.
    pub nchunk: usize,

    /// Time segments per scan. 0 = derive from the fringe time.
    pub nsegments: usize,

    /// Multiplier on the derived segment count.
    pub scale_nsegments: f64,

    /// Peak memory target \[GB\]. 0 = unconstrained.
    pub memory_limit: f64,

    pub searchtype: SearchType,
    pub sigma_image1: f64,
    pub sigma_image2: f64,

    /// Background subtraction applied per segment.
    pub timesub: TimeSub,

    /// Flagging rules applied in order per (spw, pol) block.
    pub flaglist: Vec<FlagRule>,

    /// Gain calibration table. `None` searches uncalibrated data.
    pub gainfile: Option<PathBuf>,

    /// Bandpass table accompanying `gainfile`.
    pub bpfile: Option<PathBuf>,

    pub savecands: bool,
    pub savenoise: bool,

    /// Re-phase each segment to this direction-cosine offset before
    /// searching. (0, 0) leaves the phase centre alone.
    pub l1: f64,
    pub m1: f64,

    /// Base name for candidate and noise files. `None` uses the data
    /// file's name.
    pub fileroot: Option<String>,

    /// Directory for candidate and noise files. `None` uses the data
    /// file's directory.
    pub workdir: Option<PathBuf>,
}

impl Default for Preferences {
    fn default() -> Preferences {
        Preferences {
            chans: vec![],
            spw: vec![],
            excludeants: vec![],
            selectpol: vec![],
            nskip: 0,
            read_tdownsample: 1,
            read_fdownsample: 1,
            dmarr: vec![],
            dtarr: vec![],
            mindm: 0.0,
            maxdm: 0.0,
            dm_maxloss: DEFAULT_DM_MAX_LOSS,
            dm_pulsewidth: DEFAULT_DM_PULSE_WIDTH,
            uvres: 0,
            npix: 0,
            npix_max: 0,
            uvoversample: 1.0,
            nthread: 0,
            nchunk: 0,
            nsegments: 0,
            scale_nsegments: 1.0,
            memory_limit: 0.0,
            searchtype: SearchType::Image1,
            sigma_image1: DEFAULT_SIGMA_IMAGE1,
            sigma_image2: DEFAULT_SIGMA_IMAGE2,
            timesub: TimeSub::Mean,
            flaglist: vec![],
            gainfile: None,
            bpfile: None,
            savecands: true,
            savenoise: false,
            l1: 0.0,
            m1: 0.0,
            fileroot: None,
            workdir: None,
        }
    }
}

impl Preferences {
    /// Read preferences from a `.toml` or `.json` file, dispatching on the
    /// extension.
    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<Preferences, ParamsError> {
        let path = path.as_ref();
        debug!("Attempting to parse preference file {} ...", path.display());

        let mut contents = String::new();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match ext.as_deref() {
            Some("toml") => {
                debug!("Parsing toml file...");
                let mut fh = File::open(path)?;
                fh.read_to_string(&mut contents)?;
                toml::from_str(&contents).map_err(|e| ParamsError::TomlDecode {
                    file: path.display().to_string(),
                    err: e.to_string(),
                })
            }

            Some("json") => {
                debug!("Parsing json file...");
                let mut fh = File::open(path)?;
                fh.read_to_string(&mut contents)?;
                serde_json::from_str(&contents).map_err(|e| ParamsError::JsonDecode {
                    file: path.display().to_string(),
                    err: e.to_string(),
                })
            }

            _ => Err(ParamsError::UnrecognisedExt(path.display().to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("Preference file {0} doesn't have a recognised file extension! Valid extensions are .toml and .json")]
    UnrecognisedExt(String),

    #[error("Couldn't decode toml structure from {file}:\n{err}")]
    TomlDecode { file: String, err: String },

    #[error("Couldn't decode json structure from {file}:\n{err}")]
    JsonDecode { file: String, err: String },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
