//! Interception controller: wraps and unwraps the library's `configure`.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use callscope_core::TargetModule;

use crate::config::InstrumentationConfig;
use crate::error::InstrumentationResult;
use crate::host::{Instrumentation, ModuleDefinition};
use crate::normalize::add_tracer_to_handlers;
use crate::patch_flag::{PROCESS_PATCHED, PatchFlag};
use crate::tracer::{LogTracer, Tracer};

/// Name of the instrumented library, used in diagnostics.
pub const MODULE_NAME: &str = "callscope/callbacks";
/// Module the host loads and hands to the patch hook.
pub const MANAGER_MODULE: &str = "callscope/callbacks/manager";
/// Library versions this instrumentation accepts.
pub const SUPPORTED_VERSIONS: &[&str] = &["^0.1.0"];

pub const INSTRUMENTATION_NAME: &str = "callscope-instrumentation-callbacks";
pub const INSTRUMENTATION_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared handle to a loaded module.
pub type ModuleRef = Arc<dyn TargetModule>;

type TracerCell = Arc<RwLock<Arc<dyn Tracer>>>;

struct Inner {
    config: RwLock<InstrumentationConfig>,
    tracer: TracerCell,
    flag: &'static PatchFlag,
    modules: Mutex<Vec<ModuleRef>>,
}

/// Keeps a tracing observer in every handler set the library assembles.
///
/// Clones share state; the hooks returned by [`Instrumentation::init`] hold a
/// clone.
#[derive(Clone)]
pub struct CallbackInstrumentation {
    inner: Arc<Inner>,
}

impl CallbackInstrumentation {
    /// Instrumentation reporting spans through the `tracing` channel.
    pub fn new(config: InstrumentationConfig) -> Self {
        Self::with_tracer(
            config,
            Arc::new(LogTracer::new(INSTRUMENTATION_NAME, INSTRUMENTATION_VERSION)),
        )
    }

    pub fn with_tracer(config: InstrumentationConfig, tracer: Arc<dyn Tracer>) -> Self {
        Self::with_patch_flag(config, tracer, &PROCESS_PATCHED)
    }

    /// Instrumentation guarded by its own process-level flag instead of the
    /// one behind [`crate::is_patched`].
    pub fn with_patch_flag(
        config: InstrumentationConfig,
        tracer: Arc<dyn Tracer>,
        flag: &'static PatchFlag,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                tracer: Arc::new(RwLock::new(tracer)),
                flag,
                modules: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> InstrumentationConfig {
        self.inner
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Tracer used by observers created from now on.
    pub fn tracer(&self) -> Arc<dyn Tracer> {
        self.inner
            .tracer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap the tracer. Already-wrapped modules pick it up on their next call.
    pub fn set_tracer(&self, tracer: Arc<dyn Tracer>) {
        *self
            .inner
            .tracer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = tracer;
    }

    /// State of the flag guarding this instrumentation.
    pub fn is_patched(&self) -> bool {
        self.inner.flag.get()
    }

    /// Patch a module the host could not detect on its own (e.g. it was
    /// loaded before the instrumentation was registered).
    pub fn manually_instrument(&self, module: ModuleRef) {
        tracing::debug!("Manually instrumenting {}", MODULE_NAME);
        self.patch(module, None);
    }

    /// Wrap the module's `configure` so every call carries a tracing observer.
    ///
    /// No-op when either the module marker or the process flag says the
    /// library is already patched.
    pub fn patch(&self, module: ModuleRef, module_version: Option<&str>) -> ModuleRef {
        tracing::debug!("Applying patch for {}{}", MODULE_NAME, version_suffix(module_version));

        if module.patched_flag() || self.inner.flag.get() {
            return module;
        }

        let tracer = self.inner.tracer.clone();
        let wrapped = module.configure().wrap(move |original, mut args| {
            let current = tracer.read().unwrap_or_else(PoisonError::into_inner).clone();
            let handlers = std::mem::take(&mut args.inheritable_handlers);
            args.inheritable_handlers = add_tracer_to_handlers(&current, handlers);
            original.call(args)
        });
        module.replace_configure(wrapped);
        self.inner.flag.set(true);
        self.remember(&module);

        if let Err(err) = module.set_patched_flag(true) {
            tracing::warn!("Failed to set {} patched flag on the module: {}", MODULE_NAME, err);
        }

        module
    }

    /// Restore the module's original `configure` and clear both flags.
    pub fn unpatch(
        &self,
        module: Option<ModuleRef>,
        module_version: Option<&str>,
    ) -> Option<ModuleRef> {
        let module = module?;
        tracing::debug!("Removing patch for {}{}", MODULE_NAME, version_suffix(module_version));

        let current = module.configure();
        if let Some(original) = current.original() {
            module.replace_configure(original.clone());
        }
        self.inner.flag.set(false);

        if let Err(err) = module.set_patched_flag(false) {
            tracing::warn!("Failed to unset {} patched flag on the module: {}", MODULE_NAME, err);
        }

        Some(module)
    }

    /// Re-enable and patch every module this instrumentation has wrapped or
    /// been handed while disabled.
    pub fn enable(&self) {
        self.set_enabled(true);
        for module in self.modules() {
            self.patch(module, None);
        }
    }

    /// Unpatch every module this instrumentation has wrapped; later host loads
    /// are left untouched.
    pub fn disable(&self) {
        self.set_enabled(false);
        for module in self.modules() {
            self.unpatch(Some(module), None);
        }
    }

    fn set_enabled(&self, enabled: bool) {
        self.inner
            .config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .enabled = enabled;
    }

    fn modules(&self) -> Vec<ModuleRef> {
        self.inner
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, module: &ModuleRef) {
        let mut modules = self.inner.modules.lock().unwrap_or_else(PoisonError::into_inner);
        if !modules.iter().any(|m| Arc::ptr_eq(m, module)) {
            modules.push(module.clone());
        }
    }

    fn forget(&self, module: &ModuleRef) {
        self.inner
            .modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|m| !Arc::ptr_eq(m, module));
    }

    fn on_load(&self, module: ModuleRef, module_version: Option<&str>) -> ModuleRef {
        if !self.is_enabled() {
            tracing::debug!(
                "{} is disabled, leaving {} untouched",
                INSTRUMENTATION_NAME,
                MODULE_NAME
            );
            self.remember(&module);
            return module;
        }
        self.patch(module, module_version)
    }

    fn on_unload(
        &self,
        module: Option<ModuleRef>,
        module_version: Option<&str>,
    ) -> Option<ModuleRef> {
        let module = self.unpatch(module, module_version)?;
        self.forget(&module);
        Some(module)
    }
}

impl Instrumentation for CallbackInstrumentation {
    fn instrumentation_name(&self) -> &str {
        INSTRUMENTATION_NAME
    }

    fn instrumentation_version(&self) -> &str {
        INSTRUMENTATION_VERSION
    }

    fn init(&self) -> InstrumentationResult<Vec<ModuleDefinition>> {
        let on_load = self.clone();
        let on_unload = self.clone();
        let definition = ModuleDefinition::new(
            MANAGER_MODULE,
            SUPPORTED_VERSIONS,
            move |module, version| on_load.on_load(module, version),
            move |module, version| on_unload.on_unload(module, version),
        )?;
        Ok(vec![definition])
    }
}

impl core::fmt::Debug for CallbackInstrumentation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallbackInstrumentation")
            .field("config", &self.config())
            .field("patched", &self.is_patched())
            .field("modules", &self.modules().len())
            .finish()
    }
}

fn version_suffix(module_version: Option<&str>) -> String {
    module_version.map(|v| format!("@{v}")).unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use callscope_core::{
        AsAny, CallbacksModule, ConfigureArgs, ConfigureFn, Configured, HandlerList,
        HandlerManager, HandlerRef, RunKind, handler_is,
    };

    use super::*;
    use crate::observer::TracingObserver;
    use crate::tracer::InMemoryTracer;

    fn isolated(config: InstrumentationConfig) -> (CallbackInstrumentation, InMemoryTracer) {
        let tracer = InMemoryTracer::new();
        let flag: &'static PatchFlag = Box::leak(Box::new(PatchFlag::new()));
        let instrumentation =
            CallbackInstrumentation::with_patch_flag(config, Arc::new(tracer.clone()), flag);
        (instrumentation, tracer)
    }

    fn observers(handlers: &[HandlerRef]) -> usize {
        handlers
            .iter()
            .filter(|h| handler_is::<TracingObserver>(h))
            .count()
    }

    fn configured_observers(configured: &Configured) -> usize {
        observers(&configured.as_ref().unwrap().handlers())
    }

    #[test]
    fn patching_twice_wraps_once() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));

        instrumentation.patch(module.clone(), Some("0.1.0"));
        instrumentation.patch(module.clone(), Some("0.1.0"));

        let configure = module.configure();
        assert!(configure.is_wrapped());
        assert!(!configure.original().unwrap().is_wrapped());

        let configured = configure.call(ConfigureArgs::default());
        assert_eq!(configured_observers(&configured), 1);
        assert!(instrumentation.is_patched());
        assert_eq!(module.patched_attribute(), Some(true));
    }

    #[test]
    fn process_flag_guards_other_module_instances() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let first = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let second = Arc::new(CallbacksModule::new(MANAGER_MODULE));

        instrumentation.patch(first.clone(), None);
        instrumentation.patch(second.clone(), None);

        assert!(first.configure().is_wrapped());
        assert!(!second.configure().is_wrapped());
        assert_eq!(second.patched_attribute(), None);
    }

    #[test]
    fn unpatch_restores_the_original_function() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let original = module.configure();

        instrumentation.patch(module.clone(), None);
        let returned = instrumentation.unpatch(Some(module.clone()), Some("0.1.0"));

        assert!(returned.is_some());
        assert!(module.configure().ptr_eq(&original));
        assert!(!instrumentation.is_patched());
        assert_eq!(module.patched_attribute(), Some(false));
    }

    #[test]
    fn unpatch_without_module_is_a_no_op() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        instrumentation.patch(module.clone(), None);

        assert!(instrumentation.unpatch(None, None).is_none());
        assert!(instrumentation.is_patched());
        assert!(module.configure().is_wrapped());
    }

    #[test]
    fn unpatch_of_unwrapped_module_only_clears_flags() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let original = module.configure();
        module.set_patched_flag(true).unwrap();

        instrumentation.unpatch(Some(module.clone()), None);
        instrumentation.unpatch(Some(module.clone()), None);

        assert!(module.configure().ptr_eq(&original));
        assert!(!module.patched_flag());
        assert!(!instrumentation.is_patched());
    }

    #[test]
    fn module_marker_alone_blocks_patching() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        module.set_patched_flag(true).unwrap();

        instrumentation.patch(module.clone(), None);

        assert!(!module.configure().is_wrapped());
        assert!(!instrumentation.is_patched());
    }

    #[test]
    fn frozen_module_is_patched_and_unpatched_through_the_process_flag() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let original = module.configure();
        module.freeze();

        instrumentation.patch(module.clone(), None);
        assert!(instrumentation.is_patched());
        assert!(module.configure().is_wrapped());
        assert_eq!(module.patched_attribute(), None);

        instrumentation.patch(module.clone(), None);
        assert!(!module.configure().original().unwrap().is_wrapped());

        instrumentation.unpatch(Some(module.clone()), None);
        assert!(!instrumentation.is_patched());
        assert!(module.configure().ptr_eq(&original));

        instrumentation.patch(module.clone(), None);
        assert!(instrumentation.is_patched());
        assert!(module.configure().is_wrapped());
    }

    #[test]
    fn wrapper_only_rewrites_the_first_argument() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let seen: Arc<Mutex<Option<ConfigureArgs>>> = Arc::default();
        let sentinel = Arc::new(callscope_core::CallbackManager::new(None));

        let recorder = seen.clone();
        let result = sentinel.clone();
        let module = Arc::new(CallbacksModule::with_configure(
            MANAGER_MODULE,
            ConfigureFn::new(move |args| {
                *recorder.lock().unwrap() = Some(args);
                Some(result.clone())
            }),
        ));
        instrumentation.patch(module.clone(), None);

        let local = HandlerList::new();
        let configured = module.configure().call(ConfigureArgs {
            local_handlers: local.clone().into(),
            local_tags: vec!["local".into()],
            inheritable_tags: vec!["shared".into()],
            ..ConfigureArgs::default()
        });

        assert!(Arc::ptr_eq(&configured.unwrap(), &sentinel));
        let args = seen.lock().unwrap().take().unwrap();
        assert_eq!(observers(&args.inheritable_handlers.handlers()), 1);
        assert!(args.local_handlers.as_list().unwrap().ptr_eq(&local));
        assert!(local.is_empty());
        assert_eq!(args.local_tags, ["local"]);
        assert_eq!(args.inheritable_tags, ["shared"]);
    }

    #[test]
    fn reused_collection_gets_a_single_observer() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        instrumentation.patch(module.clone(), None);

        let list = HandlerList::new();
        let configure = module.configure();
        let first = configure.call(ConfigureArgs::new(list.clone()));
        let second = configure.call(ConfigureArgs::new(list.clone()));

        assert_eq!(observers(&list.snapshot()), 1);
        assert_eq!(configured_observers(&first), 1);
        assert_eq!(configured_observers(&second), 1);

        let manager = first.unwrap();
        configure.call(ConfigureArgs::new(manager.clone()));
        assert_eq!(observers(&manager.inheritable_handlers()), 1);
    }

    #[test]
    fn wrapper_reads_the_current_tracer() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        instrumentation.patch(module.clone(), None);

        let rotated: Arc<dyn Tracer> = Arc::new(InMemoryTracer::new());
        instrumentation.set_tracer(rotated.clone());

        let list = HandlerList::new();
        module.configure().call(ConfigureArgs::new(list.clone()));

        let handlers = list.snapshot();
        let observer = (*handlers[0])
            .as_any()
            .downcast_ref::<TracingObserver>()
            .unwrap();
        assert!(Arc::ptr_eq(observer.tracer(), &rotated));
        assert!(Arc::ptr_eq(&instrumentation.tracer(), &rotated));
    }

    #[test]
    fn configured_runs_produce_spans() {
        let (instrumentation, tracer) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        instrumentation.manually_instrument(module.clone());

        let manager = module.configure().call(ConfigureArgs::default()).unwrap();
        manager.start_run("summarize", RunKind::Chain).end();

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "summarize");
    }

    #[test]
    fn disable_and_enable_toggle_the_patch() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let original = module.configure();
        instrumentation.patch(module.clone(), None);

        instrumentation.disable();
        assert!(!instrumentation.is_enabled());
        assert!(!instrumentation.is_patched());
        assert!(module.configure().ptr_eq(&original));

        instrumentation.enable();
        assert!(instrumentation.is_enabled());
        assert!(instrumentation.is_patched());
        assert!(module.configure().is_wrapped());
    }

    #[test]
    fn only_wrapped_modules_are_tracked() {
        let (instrumentation, _) = isolated(InstrumentationConfig::default());
        let first = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        let alias = Arc::new(CallbacksModule::new(MANAGER_MODULE));

        instrumentation.manually_instrument(first.clone());
        instrumentation.patch(first.clone(), None);
        instrumentation.patch(alias.clone(), None);
        assert_eq!(instrumentation.modules().len(), 1);

        let marked = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        marked.set_patched_flag(true).unwrap();
        instrumentation.unpatch(Some(first.clone()), None);
        instrumentation.patch(marked.clone(), None);
        assert_eq!(instrumentation.modules().len(), 1);
        assert!(Arc::ptr_eq(
            &instrumentation.modules()[0],
            &(first.clone() as ModuleRef)
        ));
    }

    #[test]
    fn disabled_instrumentation_leaves_loaded_modules_alone() {
        let (instrumentation, _) = isolated(InstrumentationConfig { enabled: false });
        let definitions = instrumentation.init().unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name(), MANAGER_MODULE);

        let module = Arc::new(CallbacksModule::new(MANAGER_MODULE));
        definitions[0].patch(module.clone(), Some("0.1.2"));
        assert!(!module.configure().is_wrapped());

        instrumentation.enable();
        assert!(module.configure().is_wrapped());

        definitions[0].unpatch(Some(module.clone()), Some("0.1.2"));
        assert!(!module.configure().is_wrapped());

        // The unload hook forgets the module, so re-enabling leaves it alone.
        instrumentation.disable();
        instrumentation.enable();
        assert!(!module.configure().is_wrapped());
    }
}
