//! Mod entry points and the hooks the manager drives.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use minty_registry::manager::RegistryManager;
use minty_registry::phase::GameType;
use wasmtime::{Engine, Module};

use crate::archive::ModArchive;
use crate::manifest::{ModManifest, ModVersion};
use crate::ModError;

/// Identifier of the built-in engine mod.
pub const ENGINE_MOD_ID: &str = "minty_core";

/// Version the engine mod reports to dependency checks.
pub const ENGINE_VERSION: ModVersion = ModVersion::new(0, 1, 0);

/// Manifest of the built-in engine mod.
pub fn engine_manifest() -> ModManifest {
    ModManifest {
        identifier: ENGINE_MOD_ID.to_owned(),
        version: ENGINE_VERSION,
        name: "Minty Core".to_owned(),
        description: "Built-in engine content".to_owned(),
        authors: Vec::new(),
        is_root_mod: true,
        mod_dependencies: Vec::new(),
        external_dependencies: Vec::new(),
        archive_path: None,
    }
}

bitflags::bitflags! {
    /// Which lifecycle hooks a `process_registry` call runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LoadPhase: u8 {
        const PRE = 1 << 0;
        const MAIN = 1 << 1;
        const POST = 1 << 2;
        const ALL = Self::PRE.bits() | Self::MAIN.bits() | Self::POST.bits();
    }
}

// ---------------------------------------------------------------------------
// LoadContext
// ---------------------------------------------------------------------------

/// Isolation unit shared by a group of mods loaded together.
///
/// Owns the wasm engine and the modules compiled from the scope's archives.
/// The manager hands out `Arc<LoadContext>` clones; the context is
/// considered unloaded once every clone is gone. Anything a mod keeps from
/// its context (the handle itself, data hung off it) pins it, and with it
/// every compiled module.
pub struct LoadContext {
    name: String,
    engine: Engine,
    modules: BTreeMap<String, Module>,
}

impl LoadContext {
    /// An empty context with its own wasm engine. Fuel metering is enabled
    /// so hook calls can be bounded.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::Runtime`] if the engine cannot be created.
    pub fn new(name: impl Into<String>) -> Result<Self, ModError> {
        let mut config = wasmtime::Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config)
            .map_err(|e| ModError::Runtime(format!("failed to create wasm engine: {e:#}")))?;
        Ok(Self {
            name: name.into(),
            engine,
            modules: BTreeMap::new(),
        })
    }

    /// Name of the scope, e.g. `"root"` or `"game"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine every module of this context is compiled with.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile `bytes` (binary or text format) as the module of `identifier`,
    /// replacing any earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::InvalidModule`] if the bytes do not compile.
    pub fn compile(&mut self, identifier: &str, bytes: &[u8]) -> Result<(), ModError> {
        let module = Module::new(&self.engine, bytes).map_err(|e| ModError::InvalidModule {
            mod_id: identifier.to_owned(),
            reason: format!("{e:#}"),
        })?;
        tracing::debug!(
            context = %self.name,
            mod_id = identifier,
            size_bytes = bytes.len(),
            "mod module compiled"
        );
        self.modules.insert(identifier.to_owned(), module);
        Ok(())
    }

    /// The compiled module of `identifier`, if its archive shipped one.
    pub fn module(&self, identifier: &str) -> Option<&Module> {
        self.modules.get(identifier)
    }

    /// Identifiers with a compiled module, in order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mod
// ---------------------------------------------------------------------------

/// What a lifecycle hook gets to work with.
pub struct ModContext<'a> {
    pub(crate) mod_id: u16,
    pub(crate) manifest: &'a ModManifest,
    pub(crate) game_type: GameType,
    pub(crate) registry: &'a mut RegistryManager,
    pub(crate) archive: Option<&'a Arc<ModArchive>>,
    pub(crate) context: &'a Arc<LoadContext>,
}

impl<'a> ModContext<'a> {
    /// Numeric id assigned to this mod.
    pub fn mod_id(&self) -> u16 {
        self.mod_id
    }

    /// String identifier of this mod.
    pub fn string_id(&self) -> &str {
        &self.manifest.identifier
    }

    /// Manifest the mod was loaded from.
    pub fn manifest(&self) -> &ModManifest {
        self.manifest
    }

    /// Game type of the current load.
    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    /// The shared registry, for adding registries and object providers.
    pub fn registry(&mut self) -> &mut RegistryManager {
        &mut *self.registry
    }

    /// The archive the mod was loaded from. `None` for built-in mods.
    pub fn archive(&self) -> Option<&Arc<ModArchive>> {
        self.archive
    }

    /// A new handle to the load context. Holding it past unload keeps the
    /// context alive.
    pub fn load_context(&self) -> Arc<LoadContext> {
        Arc::clone(self.context)
    }
}

/// Entry point of a mod.
///
/// Hooks are called in load order, each for every mod in the scope before
/// the next hook starts. `pre_load` runs while mod ids are registered,
/// `load` while categories are open (add registries and providers here),
/// `post_load` after all objects exist.
pub trait Mod {
    fn pre_load(&mut self, _ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        Ok(())
    }

    fn load(&mut self, _ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        Ok(())
    }

    fn post_load(&mut self, _ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        Ok(())
    }

    /// Release everything obtained during loading. Called once, in reverse
    /// load order, before the instance is dropped.
    fn unload(&mut self) {}
}

// ---------------------------------------------------------------------------
// ModCatalog
// ---------------------------------------------------------------------------

/// Constructor for a mod instance.
pub type ModConstructor = Box<dyn Fn() -> Box<dyn Mod>>;

/// Table of host-side mod entry points, keyed by identifier.
///
/// An entry takes precedence over the mod's wasm module; mods without one
/// are driven through their module's exports.
#[derive(Default)]
pub struct ModCatalog {
    entries: BTreeMap<String, ModConstructor>,
}

impl fmt::Debug for ModCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

impl ModCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the constructor for `identifier`, replacing any previous one.
    pub fn register<M, F>(&mut self, identifier: &str, constructor: F)
    where
        M: Mod + 'static,
        F: Fn() -> M + 'static,
    {
        let previous = self.entries.insert(
            identifier.to_owned(),
            Box::new(move || Box::new(constructor()) as Box<dyn Mod>),
        );
        if previous.is_some() {
            tracing::warn!(mod_id = identifier, "mod entry point replaced");
        }
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<M, F>(mut self, identifier: &str, constructor: F) -> Self
    where
        M: Mod + 'static,
        F: Fn() -> M + 'static,
    {
        self.register(identifier, constructor);
        self
    }

    /// Whether `identifier` has a host-side entry point.
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Build a new instance of `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::MissingEntryPoint`] if no constructor is registered.
    pub fn instantiate(&self, identifier: &str) -> Result<Box<dyn Mod>, ModError> {
        self.entries
            .get(identifier)
            .map(|constructor| constructor())
            .ok_or_else(|| ModError::MissingEntryPoint(identifier.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;
    impl Mod for Empty {}

    #[test]
    fn catalog_instantiates_registered_mods() {
        let catalog = ModCatalog::new().with("a", || Empty);
        assert!(catalog.contains("a"));
        assert!(catalog.instantiate("a").is_ok());
        assert!(matches!(
            catalog.instantiate("b"),
            Err(ModError::MissingEntryPoint(id)) if id == "b"
        ));
    }

    #[test]
    fn context_rejects_modules_that_do_not_compile() {
        let mut context = LoadContext::new("root").unwrap();
        context.compile("good", b"(module)").unwrap();
        assert!(matches!(
            context.compile("bad", b"\0asm\x01\0\0\0garbage"),
            Err(ModError::InvalidModule { mod_id, .. }) if mod_id == "bad"
        ));
        assert!(context.module("good").is_some());
        assert!(context.module("bad").is_none());
        assert_eq!(context.modules().collect::<Vec<_>>(), ["good"]);
    }

    #[test]
    fn load_phase_all_covers_every_hook() {
        assert!(LoadPhase::ALL.contains(LoadPhase::PRE | LoadPhase::MAIN | LoadPhase::POST));
    }
}
