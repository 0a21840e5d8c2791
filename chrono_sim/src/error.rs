//! Error types.
//!
//! Load, configuration and sink errors are fatal and abort a run before (or while) records
//! are produced. [`Degeneracy`] is different: it classifies a ray/layer pair that cannot be
//! evaluated and ends up inside the hit record instead of being propagated.

use std::{io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Any error that stops a simulation run.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to start worker threads: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A mesh or trajectory input could not be read.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("mesh directory {0} does not exist or is not a directory")]
    MissingDirectory(PathBuf),

    #[error("mesh directory {0} contains no mesh files")]
    EmptyDirectory(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed mesh {path}: {reason}")]
    MalformedMesh { path: PathBuf, reason: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedMesh {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// A trajectory line that isn't a valid ray record.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}:{line}: {kind}", .path.display())]
pub struct ParseError {
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("expected 12 fields, found {found}")]
    FieldCount { found: usize },

    #[error("invalid number `{token}`")]
    InvalidNumber { token: String },

    #[error("non-finite value `{token}`")]
    NonFinite { token: String },
}

/// Invalid or contradictory settings, detected before anything is loaded.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("{name} must be {expected}, got {value}")]
    OutOfRange {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("contradictory settings: {0}")]
    Contradictory(String),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigurationError {
    pub(crate) fn out_of_range(
        name: &'static str,
        expected: &'static str,
        value: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            name,
            expected,
            value: value.to_string(),
        }
    }
}

/// The output sink refused a record.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write hit record: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize hit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a ray/layer pair could not be evaluated geometrically.
///
/// Recorded as a non-hit, never raised.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Degeneracy {
    /// `momentum.z == 0`: the ray never reaches any z-plane.
    #[error("momentum is parallel to the layer plane")]
    ParallelMomentum,

    /// The projected point overflowed.
    #[error("projection onto the layer plane is not finite")]
    NonFiniteProjection,
}
