//! Phase-driven registry processing.
//!
//! The [`RegistryManager`] owns the [`IdTables`], every [`Registry`] added by
//! mods and every [`ObjectProvider`]. A load cycle looks like:
//!
//! 1. `Mods`: mods map their string ids to numeric ids.
//! 2. `Categories`: mods add registries (each registry is a category) and
//!    object providers.
//! 3. `Objects`: [`process_registries`](RegistryManager::process_registries)
//!    instantiates the registries, orders them by their declared
//!    dependencies and runs the three object sub-phases.
//!
//! Unloading runs the same dependency order backwards in
//! [`clear`](RegistryManager::clear).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::identification::Identification;
use crate::phase::{GameType, ObjectRegistryPhase, RegistryPhase};
use crate::registry::{ObjectProvider, ObjectRegistrar, Registry, RegistryFactory};
use crate::resources::ResourceSource;
use crate::tables::IdTables;
use crate::RegistryError;

// ---------------------------------------------------------------------------
// RegistryEntry
// ---------------------------------------------------------------------------

struct RegistryEntry {
    string_id: String,
    owner_mod: u16,
    factory: Option<RegistryFactory>,
    instance: Option<Box<dyn Registry>>,
}

impl RegistryEntry {
    fn instantiate(&mut self) {
        if self.instance.is_none() {
            if let Some(factory) = self.factory.take() {
                self.instance = Some(factory());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RegistryManager
// ---------------------------------------------------------------------------

/// Owns the id tables, registries and object providers of a running engine.
#[derive(Default)]
pub struct RegistryManager {
    tables: IdTables,
    /// Keyed by category id.
    registries: BTreeMap<u16, RegistryEntry>,
    /// In insertion order.
    providers: Vec<ObjectProvider>,
    /// Mod that first registered each category id.
    category_owners: HashMap<u16, u16>,
    game_type: GameType,
}

impl std::fmt::Debug for RegistryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryManager")
            .field("tables", &self.tables)
            .field("registries", &self.registry_string_ids())
            .field("providers", &self.providers.len())
            .field("game_type", &self.game_type)
            .finish()
    }
}

impl RegistryManager {
    /// Create an empty manager in [`RegistryPhase::None`].
    pub fn new() -> Self {
        Self::default()
    }

    // -- state --------------------------------------------------------------

    /// Read access to the id tables.
    pub fn tables(&self) -> &IdTables {
        &self.tables
    }

    /// The current registration phase.
    pub fn phase(&self) -> RegistryPhase {
        self.tables.phase()
    }

    /// The current object sub-phase. `None` outside of
    /// [`process_registries`](Self::process_registries).
    pub fn object_phase(&self) -> ObjectRegistryPhase {
        self.tables.object_phase()
    }

    /// See [`IdTables::set_phase`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPhaseTransition`] unless `next` is the
    /// successor of the current phase or `None`.
    pub fn set_phase(&mut self, next: RegistryPhase) -> Result<(), RegistryError> {
        self.tables.set_phase(next)
    }

    /// Game type registries are filtered against in
    /// [`add_registry`](Self::add_registry).
    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    /// Game type used to filter registries added from now on.
    pub fn set_game_type(&mut self, game_type: GameType) {
        self.game_type = game_type;
    }

    // -- id registration ----------------------------------------------------

    /// See [`IdTables::register_mod_id`].
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Mods` phase.
    /// - [`RegistryError::IdSpaceExhausted`] when every id is taken.
    pub fn register_mod_id(&mut self, string_id: &str) -> Result<u16, RegistryError> {
        self.tables.register_mod_id(string_id)
    }

    /// Register a category on behalf of `owner_mod`.
    ///
    /// The first mod to register a category owns it; the category id is
    /// released by [`clear`](Self::clear) once its owner is removed.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Categories` phase.
    /// - [`RegistryError::UnknownMod`] if `owner_mod` has no id.
    /// - [`RegistryError::IdSpaceExhausted`] when every id is taken.
    pub fn register_category_id(
        &mut self,
        owner_mod: u16,
        string_id: &str,
        folder: Option<&str>,
    ) -> Result<u16, RegistryError> {
        self.tables
            .expect_phase("register_category_id", RegistryPhase::Categories)?;
        if self.tables.mod_string_id(owner_mod).is_none() {
            return Err(RegistryError::UnknownMod(owner_mod));
        }
        let category_id = self.tables.register_category_id(string_id, folder)?;
        self.category_owners.entry(category_id).or_insert(owner_mod);
        Ok(category_id)
    }

    /// Mod that owns `category_id`, if it was registered locally.
    pub fn category_owner(&self, category_id: u16) -> Option<u16> {
        self.category_owners.get(&category_id).copied()
    }

    /// See [`IdTables::register_object_id`].
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Objects` phase.
    /// - [`RegistryError::UnknownMod`] / [`RegistryError::UnknownCategory`]
    ///   for ids that were never registered.
    /// - [`RegistryError::MissingCategoryFolder`] when `file_name` is given
    ///   for a category without a resource folder.
    pub fn register_object_id(
        &mut self,
        mod_id: u16,
        category_id: u16,
        string_id: &str,
        file_name: Option<&str>,
    ) -> Result<Identification, RegistryError> {
        self.tables
            .register_object_id(mod_id, category_id, string_id, file_name)
    }

    /// Attach the resources of `mod_id`, used to validate file-backed objects.
    pub fn set_resource_source(&mut self, mod_id: u16, source: Arc<dyn ResourceSource>) {
        self.tables.set_resource_source(mod_id, source);
    }

    // -- replication --------------------------------------------------------

    /// Snapshot of the mod table, for sending to clients.
    pub fn mod_ids(&self) -> BTreeMap<String, u16> {
        self.tables.mod_ids()
    }

    /// Snapshot of the category table.
    pub fn category_ids(&self) -> BTreeMap<String, u16> {
        self.tables.category_ids()
    }

    /// Snapshot of the object table, keyed by `"mod:category:object"`.
    pub fn object_ids(&self) -> BTreeMap<String, Identification> {
        self.tables.object_ids()
    }

    /// Merge a mod table received from a server. See [`IdTables::set_mod_ids`].
    pub fn set_mod_ids(&mut self, ids: &BTreeMap<String, u16>) {
        self.tables.set_mod_ids(ids);
    }

    /// Merge a received category table. Merged categories have no owner.
    pub fn set_category_ids(&mut self, ids: &BTreeMap<String, u16>) {
        self.tables.set_category_ids(ids);
    }

    /// Merge a received object table.
    pub fn set_object_ids(&mut self, ids: &BTreeMap<String, Identification>) {
        self.tables.set_object_ids(ids);
    }

    // -- registries & providers ---------------------------------------------

    /// Add a registry owned by `mod_id` under the category `string_id`.
    ///
    /// The category id is assigned immediately and owned by `mod_id`;
    /// `factory` only runs inside
    /// [`process_registries`](Self::process_registries). Returns `Ok(None)`
    /// when `applicable` excludes the current game type.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Categories` phase.
    /// - [`RegistryError::UnknownMod`] if `mod_id` has no id.
    /// - [`RegistryError::DuplicateRegistry`] if the category already has a
    ///   registry.
    pub fn add_registry<R, F>(
        &mut self,
        mod_id: u16,
        string_id: &str,
        folder: Option<&str>,
        applicable: GameType,
        factory: F,
    ) -> Result<Option<u16>, RegistryError>
    where
        R: Registry,
        F: FnOnce() -> R + 'static,
    {
        self.tables
            .expect_phase("add_registry", RegistryPhase::Categories)?;

        if !self.game_type.accepts(applicable) {
            tracing::debug!(
                registry = string_id,
                applicable = ?applicable,
                game_type = ?self.game_type,
                "registry not applicable to current game type"
            );
            return Ok(None);
        }

        let category_id = self.register_category_id(mod_id, string_id, folder)?;
        if self.registries.contains_key(&category_id) {
            return Err(RegistryError::DuplicateRegistry(string_id.to_owned()));
        }

        self.registries.insert(
            category_id,
            RegistryEntry {
                string_id: string_id.to_owned(),
                owner_mod: mod_id,
                factory: Some(Box::new(move || Box::new(factory()) as Box<dyn Registry>)),
                instance: None,
            },
        );
        tracing::debug!(registry = string_id, category_id, mod_id, "registry added");
        Ok(Some(category_id))
    }

    /// Add an object provider for `registry_string_id`, run during `phase`
    /// for as long as `mod_string_id` is among the mods being loaded.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidProviderPhase`] for
    /// [`ObjectRegistryPhase::None`].
    pub fn add_object_provider<F>(
        &mut self,
        mod_string_id: &str,
        registry_string_id: &str,
        phase: ObjectRegistryPhase,
        provider: F,
    ) -> Result<(), RegistryError>
    where
        F: FnMut(&mut ObjectRegistrar<'_>) -> Result<(), RegistryError> + 'static,
    {
        if phase == ObjectRegistryPhase::None {
            return Err(RegistryError::InvalidProviderPhase {
                registry: registry_string_id.to_owned(),
            });
        }
        self.providers.push(ObjectProvider {
            mod_string_id: mod_string_id.to_owned(),
            registry_string_id: registry_string_id.to_owned(),
            phase,
            callback: Box::new(provider),
        });
        Ok(())
    }

    /// String ids of all registries, by category id.
    pub fn registry_string_ids(&self) -> Vec<&str> {
        self.registries
            .values()
            .map(|entry| entry.string_id.as_str())
            .collect()
    }

    /// Number of registries added, instantiated or not.
    pub fn registry_count(&self) -> usize {
        self.registries.len()
    }

    /// Number of object providers still held.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// The registry behind `string_id`, if it has been instantiated and is a `T`.
    pub fn registry_mut<T: Registry>(&mut self, string_id: &str) -> Option<&mut T> {
        let category_id = self.tables.category_id(string_id)?;
        self.registries
            .get_mut(&category_id)?
            .instance
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    // -- processing ---------------------------------------------------------

    /// Run every registry through the `Pre`, `Main` and `Post` sub-phases,
    /// invoking the providers of `mods_to_load`.
    ///
    /// Within a sub-phase every registry's `pre_register` runs (dependency
    /// order), then all providers, then every `post_register`. Missing or
    /// cyclic registry dependencies fail before any registry is called.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Objects` phase.
    /// - [`RegistryError::MissingRegistryDependency`] /
    ///   [`RegistryError::CyclicRegistryDependency`] for a bad registry graph.
    /// - Any error returned by a provider, which stops processing.
    pub fn process_registries(
        &mut self,
        mods_to_load: &HashSet<String>,
    ) -> Result<(), RegistryError> {
        self.tables
            .expect_phase("process_registries", RegistryPhase::Objects)?;

        for entry in self.registries.values_mut() {
            entry.instantiate();
        }

        let order = self.sorted_registries()?;
        tracing::debug!(
            order = ?order
                .iter()
                .map(|id| self.registries[id].string_id.as_str())
                .collect::<Vec<_>>(),
            "processing registries"
        );

        let result = self.run_object_phases(&order, mods_to_load);
        self.tables.set_object_phase(ObjectRegistryPhase::None);
        result
    }

    fn run_object_phases(
        &mut self,
        order: &[u16],
        mods_to_load: &HashSet<String>,
    ) -> Result<(), RegistryError> {
        let Self {
            tables,
            registries,
            providers,
            ..
        } = self;

        let known: HashSet<&str> = registries.values().map(|e| e.string_id.as_str()).collect();
        for provider in providers.iter() {
            if mods_to_load.contains(&provider.mod_string_id)
                && !known.contains(provider.registry_string_id.as_str())
            {
                tracing::warn!(
                    mod_id = %provider.mod_string_id,
                    registry = %provider.registry_string_id,
                    "object provider targets a registry that does not exist; skipping"
                );
            }
        }

        for phase in ObjectRegistryPhase::ACTIVE {
            tables.set_object_phase(phase);

            for category_id in order {
                if let Some(registry) = registries
                    .get_mut(category_id)
                    .and_then(|e| e.instance.as_mut())
                {
                    registry.pre_register(phase);
                }
            }

            for &category_id in order {
                let Some(entry) = registries.get_mut(&category_id) else {
                    continue;
                };
                let Some(registry) = entry.instance.as_mut() else {
                    continue;
                };
                for provider in providers.iter_mut().filter(|p| {
                    p.phase == phase
                        && p.registry_string_id == entry.string_id
                        && mods_to_load.contains(&p.mod_string_id)
                }) {
                    let mod_id = tables
                        .mod_id(&provider.mod_string_id)
                        .ok_or_else(|| RegistryError::UnknownModName(provider.mod_string_id.clone()))?;
                    let mut registrar = ObjectRegistrar {
                        tables: &mut *tables,
                        registry: &mut **registry,
                        mod_id,
                        category_id,
                    };
                    (provider.callback)(&mut registrar)?;
                }
            }

            for category_id in order {
                if let Some(registry) = registries
                    .get_mut(category_id)
                    .and_then(|e| e.instance.as_mut())
                {
                    registry.post_register(phase);
                }
            }
        }
        Ok(())
    }

    /// Dependency edges as category ids: `category -> required categories`.
    fn dependency_map(&self) -> Result<BTreeMap<u16, Vec<u16>>, RegistryError> {
        let mut deps = BTreeMap::new();
        for (&category_id, entry) in &self.registries {
            let required = entry
                .instance
                .as_ref()
                .map(|r| r.required_registries())
                .unwrap_or_default();
            let mut resolved = Vec::with_capacity(required.len());
            for name in required {
                match self.tables.category_id(&name) {
                    Some(id) if self.registries.contains_key(&id) => resolved.push(id),
                    _ => {
                        return Err(RegistryError::MissingRegistryDependency {
                            registry: entry.string_id.clone(),
                            dependency: name,
                        })
                    }
                }
            }
            deps.insert(category_id, resolved);
        }
        Ok(deps)
    }

    /// Kahn's algorithm over the registry graph. Ties are broken by the
    /// lowest category id so the order is reproducible.
    fn sorted_registries(&self) -> Result<Vec<u16>, RegistryError> {
        let deps = self.dependency_map()?;

        let mut remaining: HashMap<u16, usize> = HashMap::new();
        let mut dependents: HashMap<u16, Vec<u16>> = HashMap::new();
        for (&id, required) in &deps {
            remaining.insert(id, required.len());
            for &dep in required {
                dependents.entry(dep).or_default().push(id);
            }
        }

        let mut ready: BTreeSet<u16> = remaining
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(deps.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &dependent in dependents.get(&id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != deps.len() {
            let placed: HashSet<u16> = order.iter().copied().collect();
            let registries = deps
                .keys()
                .filter(|id| !placed.contains(id))
                .map(|id| self.registries[id].string_id.clone())
                .collect();
            return Err(RegistryError::CyclicRegistryDependency { registries });
        }
        Ok(order)
    }

    /// Registries ordered so that every registry comes after the ones that
    /// depend on it. Unresolvable edges are ignored here; teardown must not fail.
    fn teardown_order(&self) -> Vec<u16> {
        let mut dependents_left: BTreeMap<u16, usize> =
            self.registries.keys().map(|&id| (id, 0)).collect();
        let mut requires: BTreeMap<u16, Vec<u16>> = BTreeMap::new();
        for (&id, entry) in &self.registries {
            let required = entry
                .instance
                .as_ref()
                .map(|r| r.required_registries())
                .unwrap_or_default();
            for name in required {
                if let Some(dep) = self.tables.category_id(&name) {
                    if let Some(count) = dependents_left.get_mut(&dep) {
                        *count += 1;
                        requires.entry(id).or_default().push(dep);
                    }
                }
            }
        }

        // Repeatedly take a registry nobody depends on any more.
        let mut order = Vec::with_capacity(dependents_left.len());
        let mut pending: BTreeSet<u16> = dependents_left.keys().copied().collect();
        while !pending.is_empty() {
            let next = pending
                .iter()
                .copied()
                .find(|id| dependents_left[id] == 0)
                .unwrap_or_else(|| {
                    let first = pending.iter().copied().next().unwrap_or_default();
                    tracing::warn!(category_id = first, "cyclic registries during clear");
                    first
                });
            pending.remove(&next);
            for dep in requires.get(&next).map(Vec::as_slice).unwrap_or_default() {
                if let Some(count) = dependents_left.get_mut(dep) {
                    *count = count.saturating_sub(1);
                }
            }
            order.push(next);
        }
        order
    }

    // -- teardown -----------------------------------------------------------

    /// Remove everything contributed by `mods_to_remove`.
    ///
    /// Registries are visited dependents-first. Objects of removed mods are
    /// unregistered from every registry; registries owned by a removed mod
    /// are cleared and dropped together with their category id. Categories
    /// without a registry are dropped once their owning mod is removed.
    pub fn clear(&mut self, mods_to_remove: &HashSet<u16>) {
        for category_id in self.teardown_order() {
            let doomed: Vec<Identification> = self
                .tables
                .objects_in_category(category_id)
                .into_iter()
                .filter(|id| mods_to_remove.contains(&id.mod_id))
                .collect();

            let Some(entry) = self.registries.get_mut(&category_id) else {
                continue;
            };
            for id in &doomed {
                if let Some(registry) = entry.instance.as_mut() {
                    registry.unregister(*id);
                }
                self.tables.remove_object(*id);
            }

            if mods_to_remove.contains(&entry.owner_mod) {
                if let Some(registry) = entry.instance.as_mut() {
                    registry.clear();
                }
                let string_id = entry.string_id.clone();
                self.registries.remove(&category_id);
                self.tables.remove_category(category_id);
                self.category_owners.remove(&category_id);
                self.providers
                    .retain(|provider| provider.registry_string_id != string_id);
                tracing::debug!(registry = %string_id, category_id, "registry removed");
            }
        }

        let stray = self.tables.remove_objects_of_mods(mods_to_remove);
        if stray > 0 {
            tracing::debug!(count = stray, "removed objects without a registry");
        }

        let orphaned: Vec<u16> = self
            .category_owners
            .iter()
            .filter(|(_, owner)| mods_to_remove.contains(owner))
            .map(|(&category_id, _)| category_id)
            .collect();
        for category_id in orphaned {
            for id in self.tables.objects_in_category(category_id) {
                self.tables.remove_object(id);
            }
            self.tables.remove_category(category_id);
            self.category_owners.remove(&category_id);
            tracing::debug!(category_id, "category removed with its owning mod");
        }

        let tables = &self.tables;
        self.providers.retain(|provider| {
            tables
                .mod_id(&provider.mod_string_id)
                .map_or(true, |id| !mods_to_remove.contains(&id))
        });

        for &mod_id in mods_to_remove {
            self.tables.remove_mod(mod_id);
        }

        // Dropping back to `None` is always a legal transition.
        let _ = self.tables.set_phase(RegistryPhase::None);
    }

    /// Remove every mod, registry and object.
    pub fn reset(&mut self) {
        let all: HashSet<u16> = self.tables.mod_ids().into_values().collect();
        self.clear(&all);
        self.registries.clear();
        self.providers.clear();
        self.category_owners.clear();
        self.tables.clear_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recording {
        name: &'static str,
        requires: Vec<String>,
        log: Log,
        objects: Vec<Identification>,
    }

    impl Registry for Recording {
        fn required_registries(&self) -> Vec<String> {
            self.requires.clone()
        }
        fn pre_register(&mut self, phase: ObjectRegistryPhase) {
            self.log.borrow_mut().push(format!("{}.pre.{phase}", self.name));
        }
        fn post_register(&mut self, phase: ObjectRegistryPhase) {
            self.log.borrow_mut().push(format!("{}.post.{phase}", self.name));
        }
        fn unregister(&mut self, id: Identification) {
            self.objects.retain(|o| *o != id);
            self.log.borrow_mut().push(format!("{}.unregister", self.name));
        }
        fn clear(&mut self) {
            self.objects.clear();
            self.log.borrow_mut().push(format!("{}.clear", self.name));
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn recording(name: &'static str, requires: &[&str], log: &Log) -> impl FnOnce() -> Recording {
        let log = Rc::clone(log);
        let requires = requires.iter().map(|s| s.to_string()).collect();
        move || Recording {
            name,
            requires,
            log,
            objects: Vec::new(),
        }
    }

    fn manager_with_mod() -> (RegistryManager, u16) {
        let mut manager = RegistryManager::new();
        manager.set_phase(RegistryPhase::Mods).unwrap();
        let id = manager.register_mod_id("core").unwrap();
        manager.set_phase(RegistryPhase::Categories).unwrap();
        (manager, id)
    }

    fn mods(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn registry_chain_runs_in_dependency_order() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();

        // Added in reverse dependency order to make sure ids do not decide order.
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &["b"], &log))
            .unwrap();
        manager
            .add_registry(core, "b", None, GameType::LOCAL, recording("B", &["c"], &log))
            .unwrap();
        manager
            .add_registry(core, "c", None, GameType::LOCAL, recording("C", &[], &log))
            .unwrap();
        for name in ["a", "b", "c"] {
            let log = Rc::clone(&log);
            let upper = name.to_uppercase();
            for phase in ObjectRegistryPhase::ACTIVE {
                let log = Rc::clone(&log);
                let upper = upper.clone();
                manager
                    .add_object_provider("core", name, phase, move |reg| {
                        log.borrow_mut().push(format!("{upper}.provide.{}", reg.phase()));
                        Ok(())
                    })
                    .unwrap();
            }
        }

        manager.set_phase(RegistryPhase::Objects).unwrap();
        manager.process_registries(&mods(&["core"])).unwrap();

        let mut expected = Vec::new();
        for phase in ["pre", "main", "post"] {
            for step in ["pre", "provide", "post"] {
                for name in ["C", "B", "A"] {
                    expected.push(format!("{name}.{step}.{phase}"));
                }
            }
        }
        assert_eq!(*log.borrow(), expected);
        assert_eq!(manager.object_phase(), ObjectRegistryPhase::None);
    }

    #[test]
    fn cycle_fails_before_any_pre_register() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &["b"], &log))
            .unwrap();
        manager
            .add_registry(core, "b", None, GameType::LOCAL, recording("B", &["a"], &log))
            .unwrap();
        manager.set_phase(RegistryPhase::Objects).unwrap();

        let err = manager.process_registries(&mods(&["core"])).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicRegistryDependency { .. }));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn missing_dependency_is_fatal() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &["ghost"], &log))
            .unwrap();
        manager.set_phase(RegistryPhase::Objects).unwrap();

        let err = manager.process_registries(&mods(&["core"])).unwrap_err();
        assert!(
            matches!(err, RegistryError::MissingRegistryDependency { ref dependency, .. } if dependency == "ghost")
        );
    }

    #[test]
    fn add_registry_outside_categories_fails() {
        let log: Log = Rc::default();
        let mut manager = RegistryManager::new();
        let err = manager
            .add_registry(1, "a", None, GameType::LOCAL, recording("A", &[], &log))
            .unwrap_err();
        assert!(matches!(err, RegistryError::WrongPhase { .. }));
    }

    #[test]
    fn registry_filtered_by_game_type() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager.set_game_type(GameType::SERVER);
        let added = manager
            .add_registry(core, "hud", None, GameType::CLIENT, recording("H", &[], &log))
            .unwrap();
        assert_eq!(added, None);
        assert_eq!(manager.registry_count(), 0);
        assert_eq!(manager.tables().category_id("hud"), None);
    }

    #[test]
    fn duplicate_registry_is_rejected() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &[], &log))
            .unwrap();
        let err = manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &[], &log))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistry(_)));
    }

    #[test]
    fn providers_of_unlisted_mods_do_not_run() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &[], &log))
            .unwrap();
        manager
            .add_object_provider("other", "a", ObjectRegistryPhase::Main, |_| {
                panic!("provider of an unlisted mod must not run")
            })
            .unwrap();
        manager.set_phase(RegistryPhase::Objects).unwrap();
        manager.process_registries(&mods(&["core"])).unwrap();
    }

    #[test]
    fn provider_registers_into_typed_registry() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "a", None, GameType::LOCAL, recording("A", &[], &log))
            .unwrap();
        manager
            .add_object_provider("core", "a", ObjectRegistryPhase::Main, |reg| {
                let id = reg.register("thing", None)?;
                reg.registry_mut::<Recording>()
                    .expect("registry type")
                    .objects
                    .push(id);
                Ok(())
            })
            .unwrap();
        manager.set_phase(RegistryPhase::Objects).unwrap();
        manager.process_registries(&mods(&["core"])).unwrap();

        let id = manager.tables().object_id("core:a:thing").unwrap();
        let registry = manager.registry_mut::<Recording>("a").unwrap();
        assert_eq!(registry.objects, vec![id]);
    }

    #[test]
    fn clear_removes_owned_registries_dependents_first() {
        let log: Log = Rc::default();
        let (mut manager, core) = manager_with_mod();
        manager
            .add_registry(core, "base", None, GameType::LOCAL, recording("Base", &[], &log))
            .unwrap();
        manager
            .add_registry(core, "top", None, GameType::LOCAL, recording("Top", &["base"], &log))
            .unwrap();
        manager
            .add_object_provider("core", "base", ObjectRegistryPhase::Main, |reg| {
                reg.register("x", None).map(|_| ())
            })
            .unwrap();
        manager.set_phase(RegistryPhase::Objects).unwrap();
        manager.process_registries(&mods(&["core"])).unwrap();
        log.borrow_mut().clear();

        manager.clear(&HashSet::from([core]));

        assert_eq!(
            *log.borrow(),
            vec!["Top.clear", "Base.unregister", "Base.clear"]
        );
        assert_eq!(manager.registry_count(), 0);
        assert_eq!(manager.provider_count(), 0);
        assert!(manager.category_ids().is_empty());
        assert!(manager.object_ids().is_empty());
        assert!(manager.mod_ids().is_empty());
        assert_eq!(manager.phase(), RegistryPhase::None);
    }

    #[test]
    fn plain_category_leaves_with_its_owner() {
        let mut manager = RegistryManager::new();
        manager.set_phase(RegistryPhase::Mods).unwrap();
        let core = manager.register_mod_id("core").unwrap();
        let extra = manager.register_mod_id("extra").unwrap();
        manager.set_phase(RegistryPhase::Categories).unwrap();
        let blocks = manager.register_category_id(core, "blocks", None).unwrap();
        let gems = manager.register_category_id(extra, "gems", None).unwrap();
        // A second registration does not take over ownership.
        assert_eq!(manager.register_category_id(extra, "blocks", None).unwrap(), blocks);
        assert_eq!(manager.category_owner(blocks), Some(core));
        manager.set_phase(RegistryPhase::Objects).unwrap();
        manager.register_object_id(extra, gems, "ruby", None).unwrap();

        manager.clear(&HashSet::from([extra]));

        assert_eq!(manager.tables().category_id("blocks"), Some(blocks));
        assert_eq!(manager.tables().category_id("gems"), None);
        assert_eq!(manager.category_owner(gems), None);
        assert_eq!(manager.tables().object_count(), 0);

        manager.set_phase(RegistryPhase::Mods).unwrap();
        manager.set_phase(RegistryPhase::Categories).unwrap();
        // The freed id is handed out again.
        assert_eq!(manager.register_category_id(core, "tools", None).unwrap(), gems);
    }

    #[test]
    fn category_owner_must_be_registered() {
        let (mut manager, _) = manager_with_mod();
        assert!(matches!(
            manager.register_category_id(42, "blocks", None),
            Err(RegistryError::UnknownMod(42))
        ));
        assert_eq!(manager.tables().category_id("blocks"), None);
    }
}
