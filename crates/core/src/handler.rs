//! Callback handlers (observers of run lifecycle events).

use std::any::Any;
use std::sync::Arc;

use crate::run::Run;

/// Upcast helper so handler trait objects can be type-checked.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An observer registered to receive lifecycle events for a unit of work.
///
/// Every hook defaults to a no-op so handlers only implement what they care
/// about. Hooks take `&self`; handlers that keep state use interior mutability.
pub trait CallbackHandler: AsAny + Send + Sync {
    /// Human-readable handler name (diagnostics only).
    fn name(&self) -> &str;

    fn on_run_start(&self, _run: &Run) {}

    fn on_run_end(&self, _run: &Run) {}

    fn on_run_error(&self, _run: &Run, _error: &str) {}
}

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn CallbackHandler>;

/// Whether `handler` is an instance of `T`.
///
/// This is a type check, not a value comparison: two differently configured
/// instances of `T` both match.
pub fn handler_is<T: CallbackHandler>(handler: &HandlerRef) -> bool {
    (**handler).as_any().is::<T>()
}

/// Whether any handler in `handlers` is an instance of `T`.
pub fn contains_handler<T: CallbackHandler>(handlers: &[HandlerRef]) -> bool {
    handlers.iter().any(handler_is::<T>)
}
