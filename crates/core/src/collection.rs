//! Handler collections: the three shapes a consumer may pass to `configure`.

use std::sync::{Arc, PoisonError, RwLock};

use crate::handler::HandlerRef;

/// Ordered, shared list of handlers.
///
/// Clones share the same underlying list, so a consumer that keeps a clone
/// observes in-place additions. `ptr_eq` tells whether two values are the same
/// list.
#[derive(Clone, Default)]
pub struct HandlerList {
    inner: Arc<RwLock<Vec<HandlerRef>>>,
}

impl HandlerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_handlers(handlers: impl IntoIterator<Item = HandlerRef>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(handlers.into_iter().collect())),
        }
    }

    /// Append a handler at the end of the list.
    pub fn push(&self, handler: HandlerRef) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents, in order.
    pub fn snapshot(&self) -> Vec<HandlerRef> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether any handler satisfies `predicate`, without copying the list.
    pub fn any(&self, predicate: impl FnMut(&HandlerRef) -> bool) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(predicate)
    }

    /// Append `make()` unless a handler already satisfies `present`.
    ///
    /// The scan and the append happen under one write lock, so concurrent
    /// callers sharing the list append at most one handler between them.
    /// Returns whether a handler was appended.
    pub fn push_if_absent(
        &self,
        present: impl FnMut(&HandlerRef) -> bool,
        make: impl FnOnce() -> HandlerRef,
    ) -> bool {
        let mut handlers = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(present) {
            return false;
        }
        handlers.push(make());
        true
    }

    /// Whether `self` and `other` are the same list (not merely equal).
    pub fn ptr_eq(&self, other: &HandlerList) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl core::fmt::Debug for HandlerList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<String> = self
            .snapshot()
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        f.debug_tuple("HandlerList").field(&names).finish()
    }
}

impl From<Vec<HandlerRef>> for HandlerList {
    fn from(handlers: Vec<HandlerRef>) -> Self {
        Self::from_handlers(handlers)
    }
}

/// An object that owns an ordered set of handlers and can register more.
pub trait HandlerManager: Send + Sync {
    /// Handlers propagated to child units of work, in registration order.
    fn inheritable_handlers(&self) -> Vec<HandlerRef>;

    /// Handlers attached to this unit of work, in registration order.
    fn handlers(&self) -> Vec<HandlerRef>;

    /// Register `handler`; when `inherit` is set it also propagates to children.
    fn add_handler(&self, handler: HandlerRef, inherit: bool);

    /// Register `make()` unless an inheritable handler already satisfies
    /// `present`. Returns whether a handler was registered.
    ///
    /// The default checks and registers in two steps; managers shared between
    /// threads override it to do both under one lock.
    fn add_handler_if_absent(
        &self,
        present: &dyn Fn(&HandlerRef) -> bool,
        make: &dyn Fn() -> HandlerRef,
        inherit: bool,
    ) -> bool {
        if self.inheritable_handlers().iter().any(present) {
            return false;
        }
        self.add_handler(make(), inherit);
        true
    }
}

/// The handler collection passed as the first argument of `configure`.
#[derive(Clone, Default)]
pub enum Callbacks {
    /// Nothing supplied.
    #[default]
    Absent,
    /// A plain ordered list of handlers.
    List(HandlerList),
    /// A manager that owns its handlers.
    Manager(Arc<dyn HandlerManager>),
}

impl Callbacks {
    pub fn is_absent(&self) -> bool {
        matches!(self, Callbacks::Absent)
    }

    pub fn as_list(&self) -> Option<&HandlerList> {
        match self {
            Callbacks::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_manager(&self) -> Option<&Arc<dyn HandlerManager>> {
        match self {
            Callbacks::Manager(manager) => Some(manager),
            _ => None,
        }
    }

    /// Handlers reachable through this collection (a manager contributes its
    /// inheritable handlers).
    pub fn handlers(&self) -> Vec<HandlerRef> {
        match self {
            Callbacks::Absent => Vec::new(),
            Callbacks::List(list) => list.snapshot(),
            Callbacks::Manager(manager) => manager.inheritable_handlers(),
        }
    }
}

impl core::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Callbacks::Absent => f.write_str("Absent"),
            Callbacks::List(list) => f.debug_tuple("List").field(list).finish(),
            Callbacks::Manager(manager) => f
                .debug_struct("Manager")
                .field("inheritable_handlers", &manager.inheritable_handlers().len())
                .finish(),
        }
    }
}

impl From<HandlerList> for Callbacks {
    fn from(list: HandlerList) -> Self {
        Callbacks::List(list)
    }
}

impl From<Vec<HandlerRef>> for Callbacks {
    fn from(handlers: Vec<HandlerRef>) -> Self {
        Callbacks::List(HandlerList::from_handlers(handlers))
    }
}

impl<M> From<Arc<M>> for Callbacks
where
    M: HandlerManager + 'static,
{
    fn from(manager: Arc<M>) -> Self {
        Callbacks::Manager(manager)
    }
}
