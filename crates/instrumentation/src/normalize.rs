//! Merge the tracing observer into a handler collection.

use std::sync::Arc;

use callscope_core::{Callbacks, HandlerList, HandlerRef, handler_is};

use crate::observer::TracingObserver;
use crate::tracer::Tracer;

fn new_observer(tracer: &Arc<dyn Tracer>) -> HandlerRef {
    Arc::new(TracingObserver::new(tracer.clone()))
}

/// Return `handlers` with exactly one [`TracingObserver`] in it.
///
/// - absent: a new one-element list;
/// - list: the same list, with an observer appended when none is present;
/// - manager: the same manager, with an observer registered as inheritable
///   when its inheritable handlers hold none.
///
/// Presence is a type check: an observer built from another tracer counts.
pub fn add_tracer_to_handlers(tracer: &Arc<dyn Tracer>, handlers: Callbacks) -> Callbacks {
    match handlers {
        Callbacks::Absent => Callbacks::List(HandlerList::from_handlers([new_observer(tracer)])),
        Callbacks::List(list) => {
            list.push_if_absent(handler_is::<TracingObserver>, || new_observer(tracer));
            Callbacks::List(list)
        }
        Callbacks::Manager(manager) => {
            manager.add_handler_if_absent(
                &handler_is::<TracingObserver>,
                &|| new_observer(tracer),
                true,
            );
            Callbacks::Manager(manager)
        }
    }
}
