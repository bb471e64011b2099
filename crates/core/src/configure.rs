//! The `configure` entry point as a swappable function object.
//!
//! The library assembles the handler set of every unit of work through one
//! function. Holding it as a [`ConfigureFn`] value lets an instrumentation
//! decorate it by composition and later restore the exact original.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::collection::Callbacks;
use crate::manager::CallbackManager;

/// Options accepted by `configure`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureOptions {
    pub verbose: bool,
}

/// Full argument list of `configure`.
///
/// `inheritable_handlers` is the first positional argument; everything after
/// it is passed through untouched by interceptors.
#[derive(Debug, Clone, Default)]
pub struct ConfigureArgs {
    pub inheritable_handlers: Callbacks,
    pub local_handlers: Callbacks,
    pub inheritable_tags: Vec<String>,
    pub local_tags: Vec<String>,
    pub inheritable_metadata: Map<String, Value>,
    pub local_metadata: Map<String, Value>,
    pub options: ConfigureOptions,
}

impl ConfigureArgs {
    pub fn new(inheritable_handlers: impl Into<Callbacks>) -> Self {
        Self {
            inheritable_handlers: inheritable_handlers.into(),
            ..Self::default()
        }
    }
}

/// What `configure` produces.
pub type Configured = Option<Arc<CallbackManager>>;

type ConfigureImpl = dyn Fn(ConfigureArgs) -> Configured + Send + Sync;

/// A callable `configure` implementation, possibly wrapping another one.
///
/// Clones are cheap and share identity; [`ConfigureFn::ptr_eq`] compares
/// identity, not behaviour.
#[derive(Clone)]
pub struct ConfigureFn {
    call: Arc<ConfigureImpl>,
    original: Option<Box<ConfigureFn>>,
}

impl ConfigureFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ConfigureArgs) -> Configured + Send + Sync + 'static,
    {
        Self {
            call: Arc::new(f),
            original: None,
        }
    }

    /// The library's own implementation ([`CallbackManager::configure`]).
    pub fn library_default() -> Self {
        Self::new(CallbackManager::configure)
    }

    pub fn call(&self, args: ConfigureArgs) -> Configured {
        (self.call)(args)
    }

    /// Decorate `self`. The wrapper receives the wrapped function and the
    /// argument list of each call.
    pub fn wrap<W>(&self, wrapper: W) -> ConfigureFn
    where
        W: Fn(&ConfigureFn, ConfigureArgs) -> Configured + Send + Sync + 'static,
    {
        let original = self.clone();
        let inner = original.clone();
        ConfigureFn {
            call: Arc::new(move |args| wrapper(&inner, args)),
            original: Some(Box::new(original)),
        }
    }

    pub fn is_wrapped(&self) -> bool {
        self.original.is_some()
    }

    /// The function this one wraps, if any.
    pub fn original(&self) -> Option<&ConfigureFn> {
        self.original.as_deref()
    }

    pub fn ptr_eq(&self, other: &ConfigureFn) -> bool {
        Arc::ptr_eq(&self.call, &other.call)
    }
}

impl Default for ConfigureFn {
    fn default() -> Self {
        Self::library_default()
    }
}

impl core::fmt::Debug for ConfigureFn {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConfigureFn")
            .field("wrapped", &self.is_wrapped())
            .finish()
    }
}
