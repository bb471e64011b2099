//! Instrumentation configuration.

use serde::Deserialize;

use crate::error::{InstrumentationError, InstrumentationResult};

/// Environment variable toggling the instrumentation.
pub const ENABLED_ENV: &str = "CALLSCOPE_INSTRUMENTATION_ENABLED";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// When false, modules handed over by the host are left untouched.
    pub enabled: bool,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl InstrumentationConfig {
    pub fn from_env() -> InstrumentationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> InstrumentationResult<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENABLED_ENV) {
            config.enabled = parse_bool(&raw).ok_or_else(|| {
                InstrumentationError::config(format!(
                    "{ENABLED_ENV} must be a boolean, got `{raw}`"
                ))
            })?;
        }
        Ok(config)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
