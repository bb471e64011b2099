//! Instrumentation error model.

use thiserror::Error;

pub type InstrumentationResult<T> = Result<T, InstrumentationError>;

/// Failures surfaced by module registration and configuration loading.
///
/// Patching itself never fails: a rejected module attribute write is logged
/// and tolerated.
#[derive(Debug, Error)]
pub enum InstrumentationError {
    /// A module was loaded at a version none of its definitions accept.
    #[error("module `{module}` version {version} is not supported")]
    UnsupportedVersion { module: String, version: String },

    /// A version or version range failed to parse.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    /// No definition was registered for the module.
    #[error("no instrumentation registered for module `{0}`")]
    UnknownModule(String),

    /// Configuration could not be read.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl InstrumentationError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
