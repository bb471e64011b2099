//! `callscope-instrumentation` — keeps a tracing observer in every handler
//! set assembled by the callback library.
//!
//! The host loads the library's manager module and calls the patch hook from
//! [`Instrumentation::init`]; from then on every call to the module's
//! `configure` runs its first argument through [`add_tracer_to_handlers`]
//! before reaching the original function.
//!
//! ```ignore
//! let instrumentation = CallbackInstrumentation::new(InstrumentationConfig::from_env()?);
//! let mut registry = ModuleRegistry::new();
//! registry.register(&instrumentation)?;
//! registry.load(MANAGER_MODULE, "0.1.4", module)?;
//! assert!(callscope_instrumentation::is_patched());
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod normalize;
pub mod observer;
pub mod patch_flag;
pub mod tracer;

pub use config::InstrumentationConfig;
pub use controller::{
    CallbackInstrumentation, INSTRUMENTATION_NAME, INSTRUMENTATION_VERSION, MANAGER_MODULE,
    MODULE_NAME, ModuleRef, SUPPORTED_VERSIONS,
};
pub use error::{InstrumentationError, InstrumentationResult};
pub use host::{Instrumentation, ModuleDefinition, ModuleRegistry, PatchHook, UnpatchHook};
pub use normalize::add_tracer_to_handlers;
pub use observer::TracingObserver;
pub use patch_flag::{PatchFlag, is_patched};
pub use tracer::{ActiveSpan, Attributes, FinishedSpan, InMemoryTracer, LogTracer, Tracer};
