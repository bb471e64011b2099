//! `callscope-core` — model of the callback pipeline library.
//!
//! Handlers, the three handler-collection shapes, the callback manager, the
//! `configure` entry point and the module namespace that exposes it. This
//! crate knows nothing about tracing; instrumentations build on it.

pub mod collection;
pub mod configure;
pub mod error;
pub mod handler;
pub mod id;
pub mod manager;
pub mod module;
pub mod run;

pub use collection::{Callbacks, HandlerList, HandlerManager};
pub use configure::{ConfigureArgs, ConfigureFn, ConfigureOptions, Configured};
pub use error::{ModuleError, ModuleResult};
pub use handler::{AsAny, CallbackHandler, HandlerRef, contains_handler, handler_is};
pub use id::RunId;
pub use manager::{CallbackManager, RunHandle};
pub use module::{CallbacksModule, PATCHED_ATTRIBUTE, TargetModule};
pub use run::{Run, RunKind};
