//! The mod manager: discovery, loading, registry processing and unloading.
//!
//! Mods load in two nested scopes. Root mods (plus the built-in engine mod)
//! form the root scope and stay loaded for the lifetime of the process; game
//! mods form a second scope on top that is loaded and unloaded per session.
//! Each scope owns one [`LoadContext`], which holds the modules compiled from
//! the scope's archives. A mod with a [`ModCatalog`] entry runs through it;
//! any other mod runs as a [`WasmMod`] over its module's exports.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use minty_registry::manager::RegistryManager;
use minty_registry::phase::{GameType, RegistryPhase};
use minty_registry::resources::ResourceSource;
use serde::{Deserialize, Serialize};

use crate::archive::ModArchive;
use crate::discovery::ManifestIndex;
use crate::graph::{build_mod_loading_graph, ModLoadGraph};
use crate::lifecycle::{engine_manifest, LoadContext, LoadPhase, Mod, ModCatalog, ModContext};
use crate::manifest::{ModManifest, ModVersion};
use crate::module::WasmMod;
use crate::ModError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Settings for mod discovery and unloading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModManagerConfig {
    /// Directories scanned by [`ModManager::search_mods`].
    pub mod_directories: Vec<PathBuf>,
    /// File extension of mod archives.
    pub archive_extension: String,
    /// File extension of the compiled module inside an archive.
    pub module_extension: String,
    /// How often an unloaded context is polled before giving up.
    pub max_unload_tries: u32,
    /// Pause between two polls of an unloaded context.
    pub unload_poll_interval_ms: u64,
    /// Fuel a wasm mod gets for each hook call.
    pub fuel_per_hook: u64,
}

impl Default for ModManagerConfig {
    fn default() -> Self {
        Self {
            mod_directories: vec![PathBuf::from("mods")],
            archive_extension: "mcmod".to_owned(),
            module_extension: "wasm".to_owned(),
            max_unload_tries: 10,
            unload_poll_interval_ms: 10,
            fuel_per_hook: 10_000_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Loaded state
// ---------------------------------------------------------------------------

struct LoadedMod {
    manifest: ModManifest,
    archive: Option<Arc<ModArchive>>,
    instance: Box<dyn Mod>,
    context: Arc<LoadContext>,
}

/// A group of mods loaded together.
struct ModScope {
    context: Arc<LoadContext>,
    /// Numeric mod ids in load order.
    mods: Vec<u16>,
}

/// A mod that has been resolved but not yet given an id.
struct PendingMod {
    manifest: ModManifest,
    archive: Option<Arc<ModArchive>>,
    instance: Box<dyn Mod>,
}

/// Outcome of [`ModManager::unload_mods`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnloadReport {
    /// Identifiers of the mods that were unloaded, in unload order.
    pub unloaded: Vec<String>,
    /// Load contexts that were still referenced after the last poll.
    pub leaked: Vec<String>,
}

impl UnloadReport {
    /// Whether every released load context was dropped.
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ModManager
// ---------------------------------------------------------------------------

/// Discovers, loads and unloads mods, and owns the [`RegistryManager`] they
/// register into.
pub struct ModManager {
    config: ModManagerConfig,
    catalog: ModCatalog,
    registry: RegistryManager,
    index: ManifestIndex,
    loaded: BTreeMap<u16, LoadedMod>,
    root_scope: Option<ModScope>,
    game_scope: Option<ModScope>,
    game_type: GameType,
}

impl std::fmt::Debug for ModManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModManager")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .field("known_manifests", &self.index.len())
            .field("loaded", &self.loaded_mods())
            .field("game_type", &self.game_type)
            .finish()
    }
}

impl ModManager {
    /// A manager with an empty registry and nothing loaded.
    pub fn new(config: ModManagerConfig, catalog: ModCatalog) -> Self {
        Self {
            config,
            catalog,
            registry: RegistryManager::new(),
            index: ManifestIndex::new(),
            loaded: BTreeMap::new(),
            root_scope: None,
            game_scope: None,
            game_type: GameType::default(),
        }
    }

    /// Settings this manager was created with.
    pub fn config(&self) -> &ModManagerConfig {
        &self.config
    }

    /// The registry loaded mods register into.
    pub fn registry(&self) -> &RegistryManager {
        &self.registry
    }

    /// Mutable access to the registry, e.g. for replication merges.
    pub fn registry_mut(&mut self) -> &mut RegistryManager {
        &mut self.registry
    }

    /// The host-side entry points, for registering mods before a load.
    pub fn catalog_mut(&mut self) -> &mut ModCatalog {
        &mut self.catalog
    }

    /// Every manifest found by [`search_mods`](Self::search_mods).
    pub fn manifests(&self) -> &ManifestIndex {
        &self.index
    }

    /// Game type of the last (or next) load.
    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    /// Game type used for the next load.
    pub fn set_game_type(&mut self, game_type: GameType) {
        self.game_type = game_type;
    }

    // -- discovery ----------------------------------------------------------

    /// Scan the configured directories plus `additional` for mod archives.
    ///
    /// Missing directories are skipped. Returns the number of manifests added.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::Io`] if an existing directory cannot be listed.
    /// Unreadable archives are skipped with a warning.
    pub fn search_mods(&mut self, additional: &[PathBuf]) -> Result<usize, ModError> {
        let dirs: Vec<PathBuf> = self
            .config
            .mod_directories
            .iter()
            .chain(additional)
            .cloned()
            .collect();

        let mut added = 0;
        for dir in dirs {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "mod directory does not exist");
                continue;
            }
            added += self.index.scan_directory(
                &dir,
                &self.config.archive_extension,
                &self.config.module_extension,
            )?;
        }
        tracing::info!(added, total = self.index.len(), "mod search finished");
        Ok(added)
    }

    // -- loading ------------------------------------------------------------

    /// Load the engine mod and the latest version of every root mod.
    ///
    /// # Errors
    ///
    /// - [`ModError::AlreadyLoaded`] if the root mods are loaded.
    /// - Graph errors ([`ModError::MissingDependency`],
    ///   [`ModError::CyclicDependency`]).
    /// - [`ModError::InvalidModule`] if an archive's module does not compile.
    /// - [`ModError::MissingEntryPoint`] if a mod has neither a catalog entry
    ///   nor a module exporting `load`.
    /// - [`ModError::HookFailed`] or [`ModError::Registry`] from the hooks.
    pub fn load_root_mods(&mut self) -> Result<(), ModError> {
        if self.root_scope.is_some() {
            return Err(ModError::AlreadyLoaded("root mods"));
        }
        let manifests = self.index.root_manifests();
        let graph = build_mod_loading_graph(&manifests, &BTreeMap::new(), true)?;
        let scope = self.load_scope("root", &graph)?;
        self.root_scope = Some(scope);
        self.process_registry(true, LoadPhase::ALL, self.game_type)
    }

    /// Load `manifests` as game mods on top of the root mods.
    ///
    /// # Errors
    ///
    /// [`ModError::RootModsNotLoaded`], [`ModError::AlreadyLoaded`],
    /// [`ModError::InvalidManifest`] for a root mod in `manifests`, and
    /// everything [`load_root_mods`](Self::load_root_mods) can return.
    pub fn load_game_mods(&mut self, manifests: &[ModManifest]) -> Result<(), ModError> {
        if self.root_scope.is_none() {
            return Err(ModError::RootModsNotLoaded);
        }
        if self.game_scope.is_some() {
            return Err(ModError::AlreadyLoaded("game mods"));
        }
        if let Some(root) = manifests.iter().find(|m| m.is_root_mod) {
            return Err(ModError::InvalidManifest {
                identifier: root.identifier.clone(),
                reason: "root mods cannot be loaded as game mods".to_owned(),
            });
        }

        let already_loaded: BTreeMap<String, ModVersion> = self
            .loaded
            .values()
            .map(|m| (m.manifest.identifier.clone(), m.manifest.version))
            .collect();
        let graph = build_mod_loading_graph(manifests, &already_loaded, false)?;
        let scope = self.load_scope("game", &graph)?;
        self.game_scope = Some(scope);
        self.process_registry(false, LoadPhase::ALL, self.game_type)
    }

    /// Compile and instantiate every mod of `graph`, then register all of
    /// them in one pass. Nothing is registered if any mod fails to compile or
    /// resolve.
    fn load_scope(&mut self, name: &str, graph: &ModLoadGraph) -> Result<ModScope, ModError> {
        let mut context = LoadContext::new(name)?;
        let mut resolved = Vec::with_capacity(graph.len());
        for identifier in graph.order() {
            let manifest = graph
                .manifest(identifier)
                .cloned()
                .unwrap_or_else(engine_manifest);
            let archive = match &manifest.archive_path {
                Some(path) => {
                    let archive = ModArchive::open(path, &self.config.module_extension)?;
                    context.compile(identifier, &archive.read_module()?)?;
                    Some(Arc::new(archive))
                }
                None => None,
            };
            resolved.push((manifest, archive));
        }

        let context = Arc::new(context);
        let mut pending = Vec::with_capacity(resolved.len());
        for (manifest, archive) in resolved {
            let instance = self.entry_point(&context, &manifest.identifier)?;
            pending.push(PendingMod {
                manifest,
                archive,
                instance,
            });
        }

        if self.registry.phase() != RegistryPhase::None {
            self.registry.set_phase(RegistryPhase::None)?;
        }
        self.registry.set_phase(RegistryPhase::Mods)?;

        let mut mods = Vec::with_capacity(pending.len());
        for entry in pending {
            let mod_id = self.registry.register_mod_id(&entry.manifest.identifier)?;
            if let Some(archive) = &entry.archive {
                self.registry
                    .set_resource_source(mod_id, Arc::clone(archive) as Arc<dyn ResourceSource>);
            }
            tracing::info!(
                mod_id,
                identifier = %entry.manifest.identifier,
                version = %entry.manifest.version,
                scope = name,
                "mod loaded"
            );
            self.loaded.insert(
                mod_id,
                LoadedMod {
                    manifest: entry.manifest,
                    archive: entry.archive,
                    instance: entry.instance,
                    context: Arc::clone(&context),
                },
            );
            mods.push(mod_id);
        }

        Ok(ModScope { context, mods })
    }

    /// The catalog entry of `identifier`, or else a [`WasmMod`] over its
    /// compiled module.
    fn entry_point(&self, context: &LoadContext, identifier: &str) -> Result<Box<dyn Mod>, ModError> {
        if self.catalog.contains(identifier) {
            return self.catalog.instantiate(identifier);
        }
        if context.module(identifier).is_none() {
            return Err(ModError::MissingEntryPoint(identifier.to_owned()));
        }
        let instance = WasmMod::new(context, identifier, self.config.fuel_per_hook)?;
        Ok(Box::new(instance))
    }

    /// Run the lifecycle hooks selected by `phases` for the root or game
    /// scope, in load order.
    ///
    /// `PRE` runs `pre_load` in the mods phase. `MAIN` opens categories, runs
    /// `load`, then registers objects through every registry. `POST` runs
    /// `post_load` once registration is closed. On failure the registry
    /// phase is reset; registered ids are kept.
    ///
    /// # Errors
    ///
    /// - [`ModError::NotLoaded`] if the selected scope is not loaded.
    /// - [`ModError::HookFailed`] if a hook fails, including wasm traps and
    ///   running out of fuel.
    /// - [`ModError::Registry`] for phase or registration errors.
    pub fn process_registry(
        &mut self,
        load_root_mods: bool,
        phases: LoadPhase,
        game_type: GameType,
    ) -> Result<(), ModError> {
        let scope = if load_root_mods {
            &self.root_scope
        } else {
            &self.game_scope
        };
        let Some(scope) = scope else {
            return Err(ModError::NotLoaded(if load_root_mods {
                "root mods"
            } else {
                "game mods"
            }));
        };
        let mods = scope.mods.clone();

        self.registry.set_game_type(game_type);
        let result = self.run_phases(&mods, phases, game_type);
        if result.is_err() {
            let _ = self.registry.set_phase(RegistryPhase::None);
        }
        result
    }

    fn run_phases(&mut self, mods: &[u16], phases: LoadPhase, game_type: GameType) -> Result<(), ModError> {
        if phases.intersects(LoadPhase::PRE | LoadPhase::MAIN)
            && self.registry.phase() == RegistryPhase::None
        {
            self.registry.set_phase(RegistryPhase::Mods)?;
        }

        if phases.contains(LoadPhase::PRE) {
            self.run_hook(mods, "pre_load", game_type, |m, ctx| m.pre_load(ctx))?;
        }

        if phases.contains(LoadPhase::MAIN) {
            self.registry.set_phase(RegistryPhase::Categories)?;
            self.run_hook(mods, "load", game_type, |m, ctx| m.load(ctx))?;
            self.registry.set_phase(RegistryPhase::Objects)?;
            let names: HashSet<String> = mods
                .iter()
                .filter_map(|id| self.loaded.get(id))
                .map(|m| m.manifest.identifier.clone())
                .collect();
            self.registry.process_registries(&names)?;
            self.registry.set_phase(RegistryPhase::None)?;
        }

        if phases.contains(LoadPhase::POST) {
            self.run_hook(mods, "post_load", game_type, |m, ctx| m.post_load(ctx))?;
        }
        Ok(())
    }

    fn run_hook<F>(
        &mut self,
        mods: &[u16],
        hook: &'static str,
        game_type: GameType,
        mut call: F,
    ) -> Result<(), ModError>
    where
        F: FnMut(&mut dyn Mod, &mut ModContext<'_>) -> Result<(), ModError>,
    {
        let Self {
            loaded, registry, ..
        } = self;

        for &mod_id in mods {
            let Some(entry) = loaded.get_mut(&mod_id) else {
                continue;
            };
            let mut ctx = ModContext {
                mod_id,
                manifest: &entry.manifest,
                game_type,
                registry: &mut *registry,
                archive: entry.archive.as_ref(),
                context: &entry.context,
            };
            tracing::trace!(mod_id, identifier = %entry.manifest.identifier, hook, "running mod hook");
            call(entry.instance.as_mut(), &mut ctx).map_err(|err| match err {
                ModError::HookFailed { .. } | ModError::Registry(_) => err,
                other => ModError::HookFailed {
                    mod_id: entry.manifest.identifier.clone(),
                    hook,
                    reason: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    // -- unloading ----------------------------------------------------------

    /// Unload the game mods, and the root mods too if `unload_root_mods`.
    ///
    /// Objects and registries of the removed mods are cleared, each mod's
    /// `unload` runs in reverse load order, and every released load context
    /// is polled until nothing references it any more.
    pub fn unload_mods(&mut self, unload_root_mods: bool) -> UnloadReport {
        let mut scopes = Vec::new();
        if let Some(scope) = self.game_scope.take() {
            scopes.push(scope);
        }
        if unload_root_mods {
            if let Some(scope) = self.root_scope.take() {
                scopes.push(scope);
            }
        }

        let mut report = UnloadReport::default();
        if scopes.is_empty() {
            return report;
        }

        let removed: HashSet<u16> = scopes.iter().flat_map(|s| s.mods.iter().copied()).collect();
        self.registry.clear(&removed);

        let mut released = Vec::with_capacity(scopes.len());
        for scope in scopes {
            for mod_id in scope.mods.iter().rev() {
                if let Some(mut loaded) = self.loaded.remove(mod_id) {
                    loaded.instance.unload();
                    tracing::info!(mod_id, identifier = %loaded.manifest.identifier, "mod unloaded");
                    report.unloaded.push(loaded.manifest.identifier.clone());
                }
            }
            let name = scope.context.name().to_owned();
            released.push((name, Arc::downgrade(&scope.context)));
        }

        for (name, context) in released {
            if !self.wait_for_unloading(&context) {
                tracing::warn!(
                    context = %name,
                    references = context.strong_count(),
                    tries = self.config.max_unload_tries,
                    "load context is still referenced after unloading"
                );
                report.leaked.push(name);
            }
        }

        if unload_root_mods && self.root_scope.is_none() {
            self.registry.reset();
        }
        report
    }

    /// Poll `context` until every strong reference is gone, at most
    /// `max_unload_tries` times. Returns whether it was released.
    pub fn wait_for_unloading(&self, context: &Weak<LoadContext>) -> bool {
        let interval = Duration::from_millis(self.config.unload_poll_interval_ms);
        for attempt in 0..self.config.max_unload_tries {
            if context.strong_count() == 0 {
                tracing::debug!(attempt, "load context released");
                return true;
            }
            std::thread::sleep(interval);
        }
        context.strong_count() == 0
    }

    // -- queries ------------------------------------------------------------

    /// `(mod id, identifier)` of every loaded mod.
    pub fn loaded_mods(&self) -> Vec<(u16, &str)> {
        self.loaded
            .iter()
            .map(|(&id, m)| (id, m.manifest.identifier.as_str()))
            .collect()
    }

    /// Whether a mod with this identifier is loaded.
    pub fn is_loaded(&self, identifier: &str) -> bool {
        self.loaded
            .values()
            .any(|m| m.manifest.identifier == identifier)
    }

    /// Manifest of the loaded mod `mod_id`.
    pub fn loaded_manifest(&self, mod_id: u16) -> Option<&ModManifest> {
        self.loaded.get(&mod_id).map(|m| &m.manifest)
    }

    /// A new handle to the load context of `mod_id`.
    pub fn load_context(&self, mod_id: u16) -> Option<Arc<LoadContext>> {
        self.loaded.get(&mod_id).map(|m| Arc::clone(&m.context))
    }

    /// Whether the root scope is loaded.
    pub fn root_mods_loaded(&self) -> bool {
        self.root_scope.is_some()
    }

    /// Whether the game scope is loaded.
    pub fn game_mods_loaded(&self) -> bool {
        self.game_scope.is_some()
    }
}
