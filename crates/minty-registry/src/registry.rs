//! Registry handlers and object providers.
//!
//! A [`Registry`] owns the objects of one category (blocks, textures,
//! descriptor set layouts, ...). Mods contribute objects by adding
//! [`ObjectProvider`]s, which run during one [`ObjectRegistryPhase`] and
//! receive an [`ObjectRegistrar`] scoped to their registry's category.

use std::any::Any;

use crate::identification::Identification;
use crate::phase::ObjectRegistryPhase;
use crate::tables::IdTables;
use crate::RegistryError;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A handler that stores the objects of one category.
pub trait Registry: Any {
    /// String ids of the registries that must be processed before this one.
    fn required_registries(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called before any provider of `phase` runs.
    fn pre_register(&mut self, _phase: ObjectRegistryPhase) {}

    /// Called after every provider of `phase` has run.
    fn post_register(&mut self, _phase: ObjectRegistryPhase) {}

    /// Forget a single object.
    fn unregister(&mut self, id: Identification);

    /// Forget everything. Called when the registry itself is dropped.
    fn clear(&mut self);

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Deferred constructor for a registry, run in `process_registries`.
pub type RegistryFactory = Box<dyn FnOnce() -> Box<dyn Registry>>;

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Callback that registers a batch of objects.
pub type ProviderFn = Box<dyn FnMut(&mut ObjectRegistrar<'_>) -> Result<(), RegistryError>>;

/// An object provider contributed by a mod.
pub struct ObjectProvider {
    /// String id of the mod that contributed the provider.
    pub mod_string_id: String,
    /// String id of the registry the provider feeds.
    pub registry_string_id: String,
    /// The sub-phase the provider runs in.
    pub phase: ObjectRegistryPhase,
    pub(crate) callback: ProviderFn,
}

impl std::fmt::Debug for ObjectProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProvider")
            .field("mod_string_id", &self.mod_string_id)
            .field("registry_string_id", &self.registry_string_id)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ObjectRegistrar
// ---------------------------------------------------------------------------

/// View handed to a provider: object id registration for one
/// `(mod, category)` pair plus typed access to the target registry.
pub struct ObjectRegistrar<'a> {
    pub(crate) tables: &'a mut IdTables,
    pub(crate) registry: &'a mut dyn Registry,
    pub(crate) mod_id: u16,
    pub(crate) category_id: u16,
}

impl<'a> ObjectRegistrar<'a> {
    /// Register an object of the provider's mod in the registry's category.
    ///
    /// # Errors
    ///
    /// See [`IdTables::register_object_id`].
    pub fn register(
        &mut self,
        string_id: &str,
        file_name: Option<&str>,
    ) -> Result<Identification, RegistryError> {
        self.tables
            .register_object_id(self.mod_id, self.category_id, string_id, file_name)
    }

    /// The concrete registry, if it is a `T`.
    pub fn registry_mut<T: Registry>(&mut self) -> Option<&mut T> {
        self.registry.as_any_mut().downcast_mut::<T>()
    }

    /// Read access to every id table, e.g. to resolve objects registered by
    /// an earlier registry.
    pub fn tables(&self) -> &IdTables {
        self.tables
    }

    /// Numeric id of the mod that contributed the provider.
    pub fn mod_id(&self) -> u16 {
        self.mod_id
    }

    /// Category id of the registry being filled.
    pub fn category_id(&self) -> u16 {
        self.category_id
    }

    /// The object sub-phase the provider runs in.
    pub fn phase(&self) -> ObjectRegistryPhase {
        self.tables.object_phase()
    }
}
