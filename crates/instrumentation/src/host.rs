//! Host framework integration: module definitions and the loader that fires
//! their hooks.
//!
//! An instrumentation describes which module it wants (name + accepted
//! version ranges) and how to patch/unpatch it. The host calls the patch hook
//! with the live module when a matching module loads, and the unpatch hook on
//! teardown.

use std::collections::HashMap;
use std::sync::Arc;

use semver::{Version, VersionReq};

use crate::controller::ModuleRef;
use crate::error::{InstrumentationError, InstrumentationResult};

pub type PatchHook = Arc<dyn Fn(ModuleRef, Option<&str>) -> ModuleRef + Send + Sync>;
pub type UnpatchHook =
    Arc<dyn Fn(Option<ModuleRef>, Option<&str>) -> Option<ModuleRef> + Send + Sync>;

/// A module an instrumentation wants to hook.
#[derive(Clone)]
pub struct ModuleDefinition {
    name: String,
    supported_versions: Vec<VersionReq>,
    patch: PatchHook,
    unpatch: UnpatchHook,
}

impl ModuleDefinition {
    pub fn new<P, U>(
        name: impl Into<String>,
        supported_versions: &[&str],
        patch: P,
        unpatch: U,
    ) -> InstrumentationResult<Self>
    where
        P: Fn(ModuleRef, Option<&str>) -> ModuleRef + Send + Sync + 'static,
        U: Fn(Option<ModuleRef>, Option<&str>) -> Option<ModuleRef> + Send + Sync + 'static,
    {
        let supported_versions = supported_versions
            .iter()
            .map(|range| VersionReq::parse(range))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.into(),
            supported_versions,
            patch: Arc::new(patch),
            unpatch: Arc::new(unpatch),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supported_versions(&self) -> &[VersionReq] {
        &self.supported_versions
    }

    pub fn supports(&self, version: &Version) -> bool {
        self.supported_versions.iter().any(|req| req.matches(version))
    }

    pub fn patch(&self, module: ModuleRef, version: Option<&str>) -> ModuleRef {
        (self.patch)(module, version)
    }

    pub fn unpatch(&self, module: Option<ModuleRef>, version: Option<&str>) -> Option<ModuleRef> {
        (self.unpatch)(module, version)
    }
}

impl core::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("supported_versions", &self.supported_versions)
            .finish()
    }
}

/// Something the host can register.
pub trait Instrumentation {
    fn instrumentation_name(&self) -> &str;

    fn instrumentation_version(&self) -> &str;

    /// Module definitions whose hooks the host should fire.
    fn init(&self) -> InstrumentationResult<Vec<ModuleDefinition>>;
}

struct LoadedModule {
    version: String,
    module: ModuleRef,
}

/// Minimal module loader: matches loads against registered definitions.
///
/// A name may be loaded more than once (e.g. two bundled copies); every
/// instance stays tracked until the name is unloaded.
#[derive(Default)]
pub struct ModuleRegistry {
    definitions: Vec<ModuleDefinition>,
    loaded: HashMap<String, Vec<LoadedModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, instrumentation: &dyn Instrumentation) -> InstrumentationResult<()> {
        let definitions = instrumentation.init()?;
        tracing::debug!(
            "Registering {}@{} ({} module definition(s))",
            instrumentation.instrumentation_name(),
            instrumentation.instrumentation_version(),
            definitions.len()
        );
        self.definitions.extend(definitions);
        Ok(())
    }

    /// Hand a freshly loaded module to every matching definition.
    ///
    /// Returns the module as left by the patch hooks.
    pub fn load(
        &mut self,
        name: &str,
        version: &str,
        module: ModuleRef,
    ) -> InstrumentationResult<ModuleRef> {
        let parsed = Version::parse(version)?;
        let mut matching = self.definitions.iter().filter(|d| d.name == name).peekable();
        if matching.peek().is_none() {
            return Err(InstrumentationError::UnknownModule(name.to_string()));
        }

        let supported: Vec<&ModuleDefinition> = matching.filter(|d| d.supports(&parsed)).collect();
        if supported.is_empty() {
            tracing::debug!("Skipping {}@{}: no definition accepts this version", name, version);
            return Err(InstrumentationError::UnsupportedVersion {
                module: name.to_string(),
                version: version.to_string(),
            });
        }

        let module = supported
            .into_iter()
            .fold(module, |module, definition| definition.patch(module, Some(version)));

        self.loaded
            .entry(name.to_string())
            .or_default()
            .push(LoadedModule {
                version: version.to_string(),
                module: module.clone(),
            });
        Ok(module)
    }

    /// Tear down every instance loaded under `name`, most recent first,
    /// firing the unpatch hooks for each.
    ///
    /// Returns the unloaded modules in load order.
    pub fn unload(&mut self, name: &str) -> Vec<ModuleRef> {
        let Some(instances) = self.loaded.remove(name) else {
            return Vec::new();
        };
        for LoadedModule { version, module } in instances.iter().rev() {
            for definition in self.definitions.iter().filter(|d| d.name == name) {
                definition.unpatch(Some(module.clone()), Some(version.as_str()));
            }
        }
        instances.into_iter().map(|l| l.module).collect()
    }

    /// Modules currently loaded under `name`, in load order.
    pub fn loaded(&self, name: &str) -> Vec<ModuleRef> {
        self.loaded
            .get(name)
            .map(|instances| instances.iter().map(|l| l.module.clone()).collect())
            .unwrap_or_default()
    }

    pub fn definitions(&self) -> &[ModuleDefinition] {
        &self.definitions
    }
}
