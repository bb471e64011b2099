//! Loaded module namespaces exposing the `configure` slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::configure::ConfigureFn;
use crate::error::{ModuleError, ModuleResult};

/// Attribute name of the module-local "already patched" marker.
pub const PATCHED_ATTRIBUTE: &str = "patched";

/// A loaded module exposing the `configure` function slot and an optional
/// patched marker.
///
/// The host owns the module; instrumentations only swap the function held in
/// the slot and flip the marker.
pub trait TargetModule: Send + Sync {
    /// Module name used in diagnostics.
    fn name(&self) -> &str;

    /// Function currently held in the `configure` slot.
    fn configure(&self) -> ConfigureFn;

    /// Store `configure` in the slot.
    fn replace_configure(&self, configure: ConfigureFn);

    /// Module-local patched marker; a missing marker reads as `false`.
    fn patched_flag(&self) -> bool;

    /// Write the module-local patched marker. Fails when the module refuses
    /// attribute assignment.
    fn set_patched_flag(&self, value: bool) -> ModuleResult<()>;
}

/// In-process module namespace.
///
/// Once [`CallbacksModule::freeze`] is called, attribute writes are rejected
/// while the `configure` slot stays replaceable.
#[derive(Debug)]
pub struct CallbacksModule {
    name: String,
    configure: RwLock<ConfigureFn>,
    patched: RwLock<Option<bool>>,
    frozen: AtomicBool,
}

impl CallbacksModule {
    /// Module whose slot holds the library's own `configure`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_configure(name, ConfigureFn::library_default())
    }

    pub fn with_configure(name: impl Into<String>, configure: ConfigureFn) -> Self {
        Self {
            name: name.into(),
            configure: RwLock::new(configure),
            patched: RwLock::new(None),
            frozen: AtomicBool::new(false),
        }
    }

    /// Reject every later attribute write.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Raw marker value (`None` when it was never written).
    pub fn patched_attribute(&self) -> Option<bool> {
        *self.patched.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TargetModule for CallbacksModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self) -> ConfigureFn {
        self.configure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace_configure(&self, configure: ConfigureFn) {
        *self.configure.write().unwrap_or_else(PoisonError::into_inner) = configure;
    }

    fn patched_flag(&self) -> bool {
        self.patched_attribute().unwrap_or(false)
    }

    fn set_patched_flag(&self, value: bool) -> ModuleResult<()> {
        if self.is_frozen() {
            return Err(ModuleError::immutable(&self.name, PATCHED_ATTRIBUTE));
        }
        *self.patched.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
        Ok(())
    }
}
