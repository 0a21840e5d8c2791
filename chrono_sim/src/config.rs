//! Run settings.
//!
//! A run can be described by a JSON file:
//!
//! ```json
//! {
//!     "mesh_dir": "stl/inline-2x2",
//!     "trajectory_path": "rays/muons.txt",
//!     "settings": {
//!         "scale": 0.001,
//!         "policy": { "type": "disk", "radius_cut": 1168, "area_cut": 400000 },
//!         "proximity_tolerance": null,
//!         "threads": null,
//!         "chunk_size": 4096,
//!         "verbose": false
//!     }
//! }
//! ```
//!
//! Every field but `mesh_dir` and `trajectory_path` is optional. Unknown fields are errors.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, tile::TilePolicy, Float};

pub const DEFAULT_SCALE: Float = 0.001;
pub const DEFAULT_PROXIMITY_TOLERANCE: Float = 0.1;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Directory holding one mesh file per layer
    pub mesh_dir: PathBuf,
    pub trajectory_path: PathBuf,
    #[serde(default)]
    pub settings: Settings,
}

/// Everything that tunes a run, as opposed to what it runs on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Applied to mesh coordinates (mm -> m by default)
    pub scale: Float,
    pub policy: TilePolicy,
    /// Enables the centroid proximity pre-filter, see [`Tile::is_hit`](crate::tile::Tile::is_hit)
    pub proximity_tolerance: Option<Float>,
    /// Worker threads, rayon's default if `None`
    pub threads: Option<usize>,
    /// Rays traced between two hand-offs to the sink
    pub chunk_size: usize,
    /// Only affects logging
    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            policy: TilePolicy::default(),
            proximity_tolerance: None,
            threads: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            verbose: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(ConfigurationError::out_of_range(
                "scale",
                "a positive number",
                self.scale,
            ));
        }

        self.policy.validate()?;

        if let Some(tolerance) = self.proximity_tolerance {
            if !(tolerance.is_finite() && tolerance > 0.0) {
                return Err(ConfigurationError::out_of_range(
                    "proximity_tolerance",
                    "a positive number",
                    tolerance,
                ));
            }
        }

        if self.threads == Some(0) {
            return Err(ConfigurationError::out_of_range(
                "threads",
                "at least 1",
                0,
            ));
        }

        if self.chunk_size == 0 {
            return Err(ConfigurationError::out_of_range(
                "chunk_size",
                "at least 1",
                0,
            ));
        }

        Ok(())
    }
}

impl SimulationConfig {
    pub fn new(mesh_dir: impl Into<PathBuf>, trajectory_path: impl Into<PathBuf>) -> Self {
        Self {
            mesh_dir: mesh_dir.into(),
            trajectory_path: trajectory_path.into(),
            settings: Settings::default(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigurationError> {
        let file = File::open(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|source| ConfigurationError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.settings.validate()
    }
}
