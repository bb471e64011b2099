//! Error model of the callback library.

use thiserror::Error;

/// Result type used across the callback library model.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Errors of the callback library model.
///
/// A loaded namespace can only fail by rejecting an attribute write; callers
/// that treat the attribute as advisory are expected to log and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The module object refuses attribute assignment (e.g. it was frozen).
    #[error("cannot assign attribute `{attribute}` on immutable module `{module}`")]
    Immutable { module: String, attribute: String },
}

impl ModuleError {
    pub fn immutable(module: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Immutable {
            module: module.into(),
            attribute: attribute.into(),
        }
    }
}
