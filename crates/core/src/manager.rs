//! The library's callback manager and its `configure` entry point.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::collection::{Callbacks, HandlerManager};
use crate::configure::ConfigureArgs;
use crate::handler::HandlerRef;
use crate::id::RunId;
use crate::run::{Run, RunKind};

#[derive(Default, Clone)]
struct ManagerState {
    handlers: Vec<HandlerRef>,
    inheritable_handlers: Vec<HandlerRef>,
    tags: Vec<String>,
    inheritable_tags: Vec<String>,
    metadata: Map<String, Value>,
    inheritable_metadata: Map<String, Value>,
}

/// Owns the handlers, tags and metadata attached to a unit of work.
///
/// Inheritable state propagates to children created with [`CallbackManager::child`];
/// local state stays with this manager.
#[derive(Default)]
pub struct CallbackManager {
    parent_run_id: Option<RunId>,
    verbose: bool,
    state: RwLock<ManagerState>,
}

impl CallbackManager {
    pub fn new(parent_run_id: Option<RunId>) -> Self {
        Self {
            parent_run_id,
            ..Self::default()
        }
    }

    /// Assemble a manager from the `configure` argument list.
    ///
    /// - a handler list becomes the inheritable handlers of a fresh manager;
    /// - a manager is copied into a child that keeps its inheritable state;
    /// - local handlers, tags and metadata are then attached to the result.
    ///
    /// Returns `None` when nothing at all was supplied.
    pub fn configure(args: ConfigureArgs) -> Option<Arc<CallbackManager>> {
        let ConfigureArgs {
            inheritable_handlers,
            local_handlers,
            inheritable_tags,
            local_tags,
            inheritable_metadata,
            local_metadata,
            options,
        } = args;

        let nothing_supplied = inheritable_handlers.is_absent()
            && local_handlers.is_absent()
            && inheritable_tags.is_empty()
            && local_tags.is_empty()
            && inheritable_metadata.is_empty()
            && local_metadata.is_empty();
        if nothing_supplied {
            return None;
        }

        let mut manager = match &inheritable_handlers {
            Callbacks::Absent => CallbackManager::new(None),
            Callbacks::List(list) => {
                let manager = CallbackManager::new(None);
                for handler in list.snapshot() {
                    manager.add_handler(handler, true);
                }
                manager
            }
            Callbacks::Manager(parent) => {
                let manager = CallbackManager::new(None);
                for handler in parent.handlers() {
                    manager.add_handler(handler, false);
                }
                for handler in parent.inheritable_handlers() {
                    manager.add_inheritable_only(handler);
                }
                manager
            }
        };
        manager.verbose = options.verbose;

        for handler in local_handlers.handlers() {
            manager.add_handler(handler, false);
        }
        manager.add_tags(inheritable_tags, true);
        manager.add_tags(local_tags, false);
        manager.add_metadata(inheritable_metadata, true);
        manager.add_metadata(local_metadata, false);

        Some(Arc::new(manager))
    }

    pub fn parent_run_id(&self) -> Option<RunId> {
        self.parent_run_id
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn remove_handler(&self, handler: &HandlerRef) {
        let mut state = self.write();
        state.handlers.retain(|h| !Arc::ptr_eq(h, handler));
        state.inheritable_handlers.retain(|h| !Arc::ptr_eq(h, handler));
    }

    /// Replace every handler with `handlers`.
    pub fn set_handlers(&self, handlers: Vec<HandlerRef>, inherit: bool) {
        {
            let mut state = self.write();
            state.handlers.clear();
            state.inheritable_handlers.clear();
        }
        for handler in handlers {
            self.add_handler(handler, inherit);
        }
    }

    pub fn add_tags(&self, tags: impl IntoIterator<Item = String>, inherit: bool) {
        let mut state = self.write();
        for tag in tags {
            if state.tags.contains(&tag) {
                continue;
            }
            if inherit {
                state.inheritable_tags.push(tag.clone());
            }
            state.tags.push(tag);
        }
    }

    pub fn add_metadata(&self, metadata: Map<String, Value>, inherit: bool) {
        let mut state = self.write();
        for (key, value) in metadata {
            if inherit {
                state.inheritable_metadata.insert(key.clone(), value.clone());
            }
            state.metadata.insert(key, value);
        }
    }

    pub fn tags(&self) -> Vec<String> {
        self.read().tags.clone()
    }

    pub fn metadata(&self) -> Map<String, Value> {
        self.read().metadata.clone()
    }

    /// Manager for a child unit of work: carries only inheritable state.
    pub fn child(&self, parent_run_id: RunId) -> CallbackManager {
        let state = self.read();
        let inherited = ManagerState {
            handlers: state.inheritable_handlers.clone(),
            inheritable_handlers: state.inheritable_handlers.clone(),
            tags: state.inheritable_tags.clone(),
            inheritable_tags: state.inheritable_tags.clone(),
            metadata: state.inheritable_metadata.clone(),
            inheritable_metadata: state.inheritable_metadata.clone(),
        };
        CallbackManager {
            parent_run_id: Some(parent_run_id),
            verbose: self.verbose,
            state: RwLock::new(inherited),
        }
    }

    /// Start a run and notify every handler.
    pub fn start_run(&self, name: impl Into<String>, kind: RunKind) -> RunHandle {
        let (handlers, tags, metadata) = {
            let state = self.read();
            (
                state.handlers.clone(),
                state.tags.clone(),
                state.metadata.clone(),
            )
        };
        let mut run = Run::new(name, kind).with_parent(self.parent_run_id);
        run.tags = tags;
        run.metadata = metadata;

        for handler in &handlers {
            handler.on_run_start(&run);
        }
        RunHandle { run, handlers }
    }

    fn add_inheritable_only(&self, handler: HandlerRef) {
        let mut state = self.write();
        if !state.inheritable_handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            state.inheritable_handlers.push(handler);
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HandlerManager for CallbackManager {
    fn inheritable_handlers(&self) -> Vec<HandlerRef> {
        self.read().inheritable_handlers.clone()
    }

    fn handlers(&self) -> Vec<HandlerRef> {
        self.read().handlers.clone()
    }

    fn add_handler(&self, handler: HandlerRef, inherit: bool) {
        let mut state = self.write();
        if !state.handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            state.handlers.push(handler.clone());
        }
        if inherit && !state.inheritable_handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            state.inheritable_handlers.push(handler);
        }
    }

    fn add_handler_if_absent(
        &self,
        present: &dyn Fn(&HandlerRef) -> bool,
        make: &dyn Fn() -> HandlerRef,
        inherit: bool,
    ) -> bool {
        let mut state = self.write();
        if state.inheritable_handlers.iter().any(present) {
            return false;
        }
        let handler = make();
        state.handlers.push(handler.clone());
        if inherit {
            state.inheritable_handlers.push(handler);
        }
        true
    }
}

impl core::fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.read();
        f.debug_struct("CallbackManager")
            .field("parent_run_id", &self.parent_run_id)
            .field("handlers", &state.handlers.len())
            .field("inheritable_handlers", &state.inheritable_handlers.len())
            .field("tags", &state.tags)
            .finish()
    }
}

/// An in-flight run; finishing it notifies the handlers that saw it start.
pub struct RunHandle {
    run: Run,
    handlers: Vec<HandlerRef>,
}

impl RunHandle {
    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn end(self) {
        for handler in &self.handlers {
            handler.on_run_end(&self.run);
        }
    }

    pub fn error(self, error: &str) {
        for handler in &self.handlers {
            handler.on_run_error(&self.run, error);
        }
    }
}

impl core::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run", &self.run)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::collection::HandlerList;
    use crate::handler::CallbackHandler;

    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
    }

    impl CallbackHandler for Journal {
        fn name(&self) -> &str {
            "journal"
        }

        fn on_run_start(&self, run: &Run) {
            self.entries.lock().unwrap().push(format!("start:{}", run.name));
        }

        fn on_run_end(&self, run: &Run) {
            self.entries.lock().unwrap().push(format!("end:{}", run.name));
        }

        fn on_run_error(&self, run: &Run, error: &str) {
            self.entries
                .lock()
                .unwrap()
                .push(format!("error:{}:{error}", run.name));
        }
    }

    #[test]
    fn configure_with_nothing_returns_none() {
        assert!(CallbackManager::configure(ConfigureArgs::default()).is_none());
    }

    #[test]
    fn configure_list_makes_handlers_inheritable() {
        let journal: HandlerRef = Arc::new(Journal::default());
        let args = ConfigureArgs::new(HandlerList::from_handlers([journal.clone()]));

        let manager = CallbackManager::configure(args).unwrap();

        assert_eq!(manager.handlers().len(), 1);
        assert_eq!(manager.inheritable_handlers().len(), 1);
        assert!(Arc::ptr_eq(&manager.inheritable_handlers()[0], &journal));
    }

    #[test]
    fn configure_adds_local_state_without_inheriting_it() {
        let inherited: HandlerRef = Arc::new(Journal::default());
        let local: HandlerRef = Arc::new(Journal::default());
        let mut metadata = Map::new();
        metadata.insert("user".into(), json!("ada"));

        let args = ConfigureArgs {
            local_handlers: vec![local].into(),
            inheritable_tags: vec!["shared".into()],
            local_tags: vec!["mine".into()],
            local_metadata: metadata,
            ..ConfigureArgs::new(vec![inherited])
        };
        let manager = CallbackManager::configure(args).unwrap();

        assert_eq!(manager.handlers().len(), 2);
        assert_eq!(manager.inheritable_handlers().len(), 1);
        assert_eq!(manager.tags(), ["shared", "mine"]);

        let child = manager.child(RunId::new());
        assert_eq!(child.handlers().len(), 1);
        assert_eq!(child.tags(), ["shared"]);
        assert!(child.metadata().is_empty());
    }

    #[test]
    fn configure_from_manager_keeps_parent_handlers() {
        let parent = Arc::new(CallbackManager::new(None));
        parent.add_handler(Arc::new(Journal::default()), true);
        parent.add_handler(Arc::new(Journal::default()), false);

        let manager = CallbackManager::configure(ConfigureArgs::new(parent.clone())).unwrap();

        assert_eq!(manager.handlers().len(), 2);
        assert_eq!(manager.inheritable_handlers().len(), 1);
    }

    #[test]
    fn add_handler_is_idempotent_per_instance() {
        let manager = CallbackManager::new(None);
        let journal: HandlerRef = Arc::new(Journal::default());
        manager.add_handler(journal.clone(), true);
        manager.add_handler(journal.clone(), true);

        assert_eq!(manager.handlers().len(), 1);
        assert_eq!(manager.inheritable_handlers().len(), 1);

        manager.remove_handler(&journal);
        assert!(manager.handlers().is_empty());
        assert!(manager.inheritable_handlers().is_empty());
    }

    #[test]
    fn add_handler_if_absent_checks_inheritable_handlers() {
        let manager = CallbackManager::new(None);
        let local: HandlerRef = Arc::new(Journal::default());
        manager.add_handler(local, false);
        let is_journal = |h: &HandlerRef| h.name() == "journal";

        let make = || -> HandlerRef { Arc::new(Journal::default()) };

        assert!(manager.add_handler_if_absent(&is_journal, &make, true));
        assert!(!manager.add_handler_if_absent(&is_journal, &make, true));

        assert_eq!(manager.handlers().len(), 2);
        assert_eq!(manager.inheritable_handlers().len(), 1);
    }

    #[test]
    fn runs_notify_handlers_in_order() {
        let journal = Arc::new(Journal::default());
        let manager = CallbackManager::new(None);
        manager.add_handler(journal.clone(), true);

        manager.start_run("ok", RunKind::Chain).end();
        manager.start_run("bad", RunKind::Tool).error("boom");

        let entries = journal.entries.lock().unwrap().clone();
        assert_eq!(entries, ["start:ok", "end:ok", "start:bad", "error:bad:boom"]);
    }

    #[test]
    fn child_runs_point_at_their_parent() {
        let manager = CallbackManager::new(None);
        let parent = manager.start_run("parent", RunKind::Chain);
        let child = manager.child(parent.run().id);

        let handle = child.start_run("child", RunKind::Llm);
        assert_eq!(handle.run().parent_id, Some(parent.run().id));
    }
}
