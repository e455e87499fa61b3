//! The engine facade: wires configuration, logging, mods and descriptors.

use std::cell::{Ref, RefCell};
use std::path::Path;
use std::rc::Rc;

use minty_modding::lifecycle::{ModCatalog, ENGINE_MOD_ID};
use minty_modding::manager::{ModManager, UnloadReport};
use minty_modding::manifest::ModManifest;
use minty_registry::manager::RegistryManager;
use minty_render::descriptor::{DescriptorBackend, DescriptorSetManager};

use crate::config::EngineConfig;
use crate::core_mod::{CoreMod, SharedDescriptors};
use crate::logging::init_logging;
use crate::EngineError;

/// Owns every engine subsystem.
pub struct Engine<B: DescriptorBackend + 'static> {
    config: EngineConfig,
    mods: ModManager,
    descriptors: SharedDescriptors<B>,
}

impl<B: DescriptorBackend + 'static> std::fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("mods", &self.mods)
            .finish_non_exhaustive()
    }
}

impl<B: DescriptorBackend + 'static> Engine<B> {
    /// Build the engine. `catalog` lists the entry points of every mod that
    /// may be loaded; the engine mod is added to it here.
    pub fn new(config: EngineConfig, mut catalog: ModCatalog, backend: B) -> Self {
        init_logging(&config.log_filter);

        let descriptors: SharedDescriptors<B> = Rc::new(RefCell::new(DescriptorSetManager::new(
            backend,
            config.descriptors.clone(),
        )));
        let for_core = Rc::clone(&descriptors);
        catalog.register(ENGINE_MOD_ID, move || CoreMod::new(Rc::clone(&for_core)));

        let mut mods = ModManager::new(config.modding.clone(), catalog);
        mods.set_game_type(config.game_type);

        tracing::info!(game_type = ?config.game_type, "engine created");
        Self {
            config,
            mods,
            descriptors,
        }
    }

    /// [`new`](Self::new) with the configuration read from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid [`EngineConfig`].
    pub fn from_config_file(path: &Path, catalog: ModCatalog, backend: B) -> Result<Self, anyhow::Error> {
        let config = EngineConfig::from_file(path)?;
        Ok(Self::new(config, catalog, backend))
    }

    /// The configuration the engine was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The mod manager.
    pub fn mods(&self) -> &ModManager {
        &self.mods
    }

    /// Mutable access to the mod manager, e.g. to load game mods by manifest.
    pub fn mods_mut(&mut self) -> &mut ModManager {
        &mut self.mods
    }

    /// The registry manager the mods register into.
    pub fn registry(&self) -> &RegistryManager {
        self.mods.registry()
    }

    /// Borrow the descriptor set manager.
    ///
    /// # Panics
    ///
    /// Panics if the manager is currently borrowed mutably through
    /// [`shared_descriptors`](Self::shared_descriptors).
    pub fn descriptors(&self) -> Ref<'_, DescriptorSetManager<B>> {
        self.descriptors.borrow()
    }

    /// The shared handle, for code that needs to allocate sets.
    pub fn shared_descriptors(&self) -> SharedDescriptors<B> {
        Rc::clone(&self.descriptors)
    }

    /// Discover mods in the configured directories and load the root mods.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Mod`] if discovery or loading fails.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.mods.search_mods(&[])?;
        self.mods.load_root_mods()?;
        tracing::info!(mods = self.mods.loaded_mods().len(), "engine started");
        Ok(())
    }

    /// Load the latest known version of each of `identifiers` as game mods.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownMod`] if an identifier was never discovered.
    /// - [`EngineError::Mod`] if loading fails.
    pub fn load_game(&mut self, identifiers: &[&str]) -> Result<(), EngineError> {
        let manifests = identifiers
            .iter()
            .map(|id| {
                self.mods
                    .manifests()
                    .latest(id)
                    .cloned()
                    .ok_or_else(|| EngineError::UnknownMod((*id).to_owned()))
            })
            .collect::<Result<Vec<ModManifest>, _>>()?;
        self.mods.load_game_mods(&manifests)?;
        Ok(())
    }

    /// Unload the game mods, keeping the root mods.
    pub fn unload_game(&mut self) -> UnloadReport {
        self.mods.unload_mods(false)
    }

    /// Unload every mod.
    pub fn shutdown(&mut self) -> UnloadReport {
        let report = self.mods.unload_mods(true);
        tracing::info!(
            unloaded = report.unloaded.len(),
            leaked = report.leaked.len(),
            "engine shut down"
        );
        report
    }
}
