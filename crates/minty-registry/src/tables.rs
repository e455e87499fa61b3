//! String-to-numeric id tables and their phase gate.
//!
//! [`IdTables`] owns every mapping the registry manager hands out: mod ids,
//! category ids (plus their resource folders) and object
//! [`Identification`]s, together with the reverse lookups. Mutation is only
//! legal while the matching [`RegistryPhase`] is current; outside of that the
//! tables are read-only, which is the only synchronization they need.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::identification::{Identification, INVALID_ID};
use crate::phase::{ObjectRegistryPhase, RegistryPhase};
use crate::resources::{resource_path, ResourceSource};
use crate::RegistryError;

/// Bidirectional id tables gated by the current registration phase.
#[derive(Default)]
pub struct IdTables {
    phase: RegistryPhase,
    object_phase: ObjectRegistryPhase,

    mods: HashMap<String, u16>,
    mods_rev: HashMap<u16, String>,

    categories: HashMap<String, u16>,
    categories_rev: HashMap<u16, String>,
    category_folders: HashMap<u16, String>,

    /// Keyed by `"{mod}:{category}:{object}"`.
    objects: HashMap<String, Identification>,
    objects_rev: HashMap<Identification, String>,
    object_files: HashMap<Identification, String>,

    resources: HashMap<u16, Arc<dyn ResourceSource>>,
}

impl std::fmt::Debug for IdTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTables")
            .field("phase", &self.phase)
            .field("object_phase", &self.object_phase)
            .field("mods", &self.mods.len())
            .field("categories", &self.categories.len())
            .field("objects", &self.objects.len())
            .finish()
    }
}

/// Lowest id in `1..=u16::MAX` for which `taken` is false.
fn lowest_free(taken: impl Fn(u16) -> bool) -> Option<u16> {
    (INVALID_ID + 1..=u16::MAX).find(|&candidate| !taken(candidate))
}

impl IdTables {
    /// Empty tables in [`RegistryPhase::None`].
    pub fn new() -> Self {
        Self::default()
    }

    // -- phase --------------------------------------------------------------

    /// The current registration phase.
    pub fn phase(&self) -> RegistryPhase {
        self.phase
    }

    /// The current object sub-phase; only ever set inside `Objects`.
    pub fn object_phase(&self) -> ObjectRegistryPhase {
        self.object_phase
    }

    /// Advance to the successor phase, or drop back to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidPhaseTransition`] for any other
    /// target, including re-entering the current phase.
    pub fn set_phase(&mut self, next: RegistryPhase) -> Result<(), RegistryError> {
        if next != RegistryPhase::None && next != self.phase.successor() {
            return Err(RegistryError::InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(from = %self.phase, to = %next, "registry phase change");
        self.phase = next;
        if next != RegistryPhase::Objects {
            self.object_phase = ObjectRegistryPhase::None;
        }
        Ok(())
    }

    pub(crate) fn set_object_phase(&mut self, phase: ObjectRegistryPhase) {
        self.object_phase = phase;
    }

    pub(crate) fn expect_phase(
        &self,
        operation: &'static str,
        expected: RegistryPhase,
    ) -> Result<(), RegistryError> {
        if self.phase != expected {
            return Err(RegistryError::WrongPhase {
                operation,
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    // -- registration -------------------------------------------------------

    /// Map a mod string id to a numeric id. Idempotent.
    ///
    /// New ids take the lowest free value above [`INVALID_ID`].
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Mods` phase.
    /// - [`RegistryError::IdSpaceExhausted`] when all `u16` ids are taken.
    pub fn register_mod_id(&mut self, string_id: &str) -> Result<u16, RegistryError> {
        self.expect_phase("register_mod_id", RegistryPhase::Mods)?;

        if let Some(&existing) = self.mods.get(string_id) {
            return Ok(existing);
        }

        let id = lowest_free(|c| self.mods_rev.contains_key(&c)).ok_or_else(|| {
            RegistryError::IdSpaceExhausted {
                table: "mods".to_owned(),
            }
        })?;
        self.mods.insert(string_id.to_owned(), id);
        self.mods_rev.insert(id, string_id.to_owned());
        tracing::debug!(mod_id = id, string_id, "registered mod id");
        Ok(id)
    }

    /// Map a category string id to a numeric id. Idempotent; a folder given
    /// on a repeated call replaces a missing one.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Categories` phase.
    /// - [`RegistryError::IdSpaceExhausted`] when all `u16` ids are taken.
    pub fn register_category_id(
        &mut self,
        string_id: &str,
        folder: Option<&str>,
    ) -> Result<u16, RegistryError> {
        self.expect_phase("register_category_id", RegistryPhase::Categories)?;

        let id = match self.categories.get(string_id) {
            Some(&existing) => existing,
            None => {
                let id = lowest_free(|c| self.categories_rev.contains_key(&c)).ok_or_else(|| {
                    RegistryError::IdSpaceExhausted {
                        table: "categories".to_owned(),
                    }
                })?;
                self.categories.insert(string_id.to_owned(), id);
                self.categories_rev.insert(id, string_id.to_owned());
                tracing::debug!(category_id = id, string_id, "registered category id");
                id
            }
        };

        if let Some(folder) = folder {
            self.category_folders
                .entry(id)
                .or_insert_with(|| folder.to_owned());
        }
        Ok(id)
    }

    /// Register an object in the `(mod_id, category_id)` partition.
    ///
    /// When `file_name` is given the category must have a resource folder and
    /// the file is looked up in the mod's resources; a missing file is only
    /// reported as a warning.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::WrongPhase`] outside of the `Objects` phase.
    /// - [`RegistryError::UnknownMod`] / [`RegistryError::UnknownCategory`]
    ///   if either id is not in the tables.
    /// - [`RegistryError::MissingCategoryFolder`] if `file_name` is given and
    ///   the category has no resource folder.
    /// - [`RegistryError::IdSpaceExhausted`] when the partition is full.
    pub fn register_object_id(
        &mut self,
        mod_id: u16,
        category_id: u16,
        string_id: &str,
        file_name: Option<&str>,
    ) -> Result<Identification, RegistryError> {
        self.expect_phase("register_object_id", RegistryPhase::Objects)?;

        let mod_string = self
            .mods_rev
            .get(&mod_id)
            .ok_or(RegistryError::UnknownMod(mod_id))?;
        let category_string = self
            .categories_rev
            .get(&category_id)
            .ok_or(RegistryError::UnknownCategory(category_id))?;
        let key = format!("{mod_string}:{category_string}:{string_id}");

        if let Some(&existing) = self.objects.get(&key) {
            return Ok(existing);
        }

        let file_path = match file_name {
            Some(file_name) => {
                let folder = self.category_folders.get(&category_id).ok_or_else(|| {
                    RegistryError::MissingCategoryFolder {
                        category: category_string.clone(),
                        object: key.clone(),
                    }
                })?;
                Some(resource_path(folder, file_name))
            }
            None => None,
        };

        let object_id = lowest_free(|c| {
            self.objects_rev
                .contains_key(&Identification::new(mod_id, category_id, c))
        })
        .ok_or_else(|| RegistryError::IdSpaceExhausted {
            table: format!("objects of {mod_string}:{category_string}"),
        })?;
        let id = Identification::new(mod_id, category_id, object_id);

        if let Some(path) = file_path {
            let present = self
                .resources
                .get(&mod_id)
                .is_some_and(|source| source.contains_resource(&path));
            if !present {
                tracing::warn!(
                    object = %key,
                    path = %path,
                    "resource file for registered object not found in mod resources"
                );
            }
            self.object_files.insert(id, path);
        }

        self.objects.insert(key.clone(), id);
        self.objects_rev.insert(id, key);
        Ok(id)
    }

    /// Attach the resource source used to validate file-backed objects of a mod.
    pub fn set_resource_source(&mut self, mod_id: u16, source: Arc<dyn ResourceSource>) {
        self.resources.insert(mod_id, source);
    }

    // -- lookups ------------------------------------------------------------

    /// Numeric id of a mod.
    pub fn mod_id(&self, string_id: &str) -> Option<u16> {
        self.mods.get(string_id).copied()
    }

    /// String id of a mod; `None` for ids never handed out.
    pub fn mod_string_id(&self, mod_id: u16) -> Option<&str> {
        self.mods_rev.get(&mod_id).map(String::as_str)
    }

    /// Numeric id of a category.
    pub fn category_id(&self, string_id: &str) -> Option<u16> {
        self.categories.get(string_id).copied()
    }

    /// String id of a category.
    pub fn category_string_id(&self, category_id: u16) -> Option<&str> {
        self.categories_rev.get(&category_id).map(String::as_str)
    }

    /// Resource folder of a category, below `resources/`.
    pub fn category_folder(&self, category_id: u16) -> Option<&str> {
        self.category_folders.get(&category_id).map(String::as_str)
    }

    /// Look up an object by its full `"mod:category:object"` key.
    pub fn object_id(&self, full_string_id: &str) -> Option<Identification> {
        self.objects.get(full_string_id).copied()
    }

    /// Full `"mod:category:object"` key of an object.
    pub fn object_string_id(&self, id: Identification) -> Option<&str> {
        self.objects_rev.get(&id).map(String::as_str)
    }

    /// Archive-relative path of the object's backing file, if it has one.
    pub fn object_file(&self, id: Identification) -> Option<&str> {
        self.object_files.get(&id).map(String::as_str)
    }

    /// All registered objects in a category, sorted.
    pub fn objects_in_category(&self, category_id: u16) -> Vec<Identification> {
        let mut ids: Vec<Identification> = self
            .objects_rev
            .keys()
            .filter(|id| id.category_id == category_id)
            .copied()
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered objects across all partitions.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    // -- replication --------------------------------------------------------

    /// Snapshot of the mod table.
    pub fn mod_ids(&self) -> BTreeMap<String, u16> {
        self.mods.iter().map(|(k, &v)| (k.clone(), v)).collect()
    }

    /// Snapshot of the category table.
    pub fn category_ids(&self) -> BTreeMap<String, u16> {
        self.categories.iter().map(|(k, &v)| (k.clone(), v)).collect()
    }

    /// Snapshot of the object table.
    pub fn object_ids(&self) -> BTreeMap<String, Identification> {
        self.objects.iter().map(|(k, &v)| (k.clone(), v)).collect()
    }

    /// Merge a remote mod table. Existing entries are never overwritten.
    pub fn set_mod_ids(&mut self, ids: &BTreeMap<String, u16>) {
        merge_table(&mut self.mods, &mut self.mods_rev, ids, "mod");
    }

    /// Merge a remote category table. Existing entries are never overwritten.
    pub fn set_category_ids(&mut self, ids: &BTreeMap<String, u16>) {
        merge_table(
            &mut self.categories,
            &mut self.categories_rev,
            ids,
            "category",
        );
    }

    /// Merge a remote object table. Existing entries are never overwritten.
    pub fn set_object_ids(&mut self, ids: &BTreeMap<String, Identification>) {
        merge_table(&mut self.objects, &mut self.objects_rev, ids, "object");
    }

    // -- removal ------------------------------------------------------------

    pub(crate) fn remove_object(&mut self, id: Identification) {
        if let Some(key) = self.objects_rev.remove(&id) {
            self.objects.remove(&key);
        }
        self.object_files.remove(&id);
    }

    /// Drop every object owned by one of `mods`. Returns how many were removed.
    pub(crate) fn remove_objects_of_mods(&mut self, mods: &HashSet<u16>) -> usize {
        let doomed: Vec<Identification> = self
            .objects_rev
            .keys()
            .filter(|id| mods.contains(&id.mod_id))
            .copied()
            .collect();
        for id in &doomed {
            self.remove_object(*id);
        }
        doomed.len()
    }

    pub(crate) fn remove_category(&mut self, category_id: u16) {
        if let Some(key) = self.categories_rev.remove(&category_id) {
            self.categories.remove(&key);
        }
        self.category_folders.remove(&category_id);
    }

    pub(crate) fn remove_mod(&mut self, mod_id: u16) {
        if let Some(key) = self.mods_rev.remove(&mod_id) {
            self.mods.remove(&key);
        }
        self.resources.remove(&mod_id);
    }

    pub(crate) fn clear_all(&mut self) {
        *self = IdTables::default();
    }
}

fn merge_table<V>(
    forward: &mut HashMap<String, V>,
    reverse: &mut HashMap<V, String>,
    incoming: &BTreeMap<String, V>,
    kind: &str,
) where
    V: Copy + Eq + std::hash::Hash + std::fmt::Debug,
{
    for (key, &value) in incoming {
        if forward.contains_key(key) {
            continue;
        }
        if let Some(bound) = reverse.get(&value) {
            tracing::warn!(
                kind,
                key = %key,
                id = ?value,
                bound_to = %bound,
                "skipping remote id already bound to a different string id"
            );
            continue;
        }
        forward.insert(key.clone(), value);
        reverse.insert(value, key.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::StaticResources;

    fn tables_in(phase: RegistryPhase) -> IdTables {
        let mut tables = IdTables::new();
        let mut current = RegistryPhase::None;
        while current != phase {
            current = current.successor();
            tables.set_phase(current).unwrap();
        }
        tables
    }

    #[test]
    fn first_mod_id_is_not_sentinel() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let id = tables.register_mod_id("core").unwrap();
        assert_ne!(id, INVALID_ID);
        assert_eq!(id, 1);
    }

    #[test]
    fn mod_registration_is_idempotent() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let a = tables.register_mod_id("core").unwrap();
        let b = tables.register_mod_id("extra").unwrap();
        assert_eq!(tables.register_mod_id("core").unwrap(), a);
        assert_ne!(a, b);
    }

    #[test]
    fn allocation_fills_gaps() {
        let mut tables = tables_in(RegistryPhase::Mods);
        tables.register_mod_id("a").unwrap();
        let b = tables.register_mod_id("b").unwrap();
        tables.register_mod_id("c").unwrap();
        tables.remove_mod(b);
        assert_eq!(tables.register_mod_id("d").unwrap(), b);
    }

    #[test]
    fn category_registration_outside_categories_phase_fails() {
        for phase in [
            RegistryPhase::None,
            RegistryPhase::Mods,
            RegistryPhase::Objects,
        ] {
            let mut tables = tables_in(phase);
            let err = tables.register_category_id("blocks", None).unwrap_err();
            assert!(
                matches!(err, RegistryError::WrongPhase { actual, .. } if actual == phase),
                "expected WrongPhase in {phase}, got {err:?}"
            );
        }
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut tables = IdTables::new();
        let err = tables.set_phase(RegistryPhase::Objects).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPhaseTransition { .. }));
        tables.set_phase(RegistryPhase::Mods).unwrap();
        tables.set_phase(RegistryPhase::None).unwrap();
    }

    #[test]
    fn object_ids_are_dense_per_partition() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let m = tables.register_mod_id("core").unwrap();
        tables.set_phase(RegistryPhase::Categories).unwrap();
        let blocks = tables.register_category_id("blocks", None).unwrap();
        let items = tables.register_category_id("items", None).unwrap();
        tables.set_phase(RegistryPhase::Objects).unwrap();

        let stone = tables.register_object_id(m, blocks, "stone", None).unwrap();
        let dirt = tables.register_object_id(m, blocks, "dirt", None).unwrap();
        let pick = tables.register_object_id(m, items, "pick", None).unwrap();

        assert_eq!(stone, Identification::new(m, blocks, 1));
        assert_eq!(dirt, Identification::new(m, blocks, 2));
        assert_eq!(pick, Identification::new(m, items, 1));
        assert_eq!(tables.object_id("core:blocks:stone"), Some(stone));
        assert_eq!(tables.object_string_id(dirt), Some("core:blocks:dirt"));
    }

    #[test]
    fn file_without_folder_is_rejected() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let m = tables.register_mod_id("core").unwrap();
        tables.set_phase(RegistryPhase::Categories).unwrap();
        let c = tables.register_category_id("sounds", None).unwrap();
        tables.set_phase(RegistryPhase::Objects).unwrap();

        let err = tables
            .register_object_id(m, c, "boom", Some("boom.ogg"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingCategoryFolder { .. }));
    }

    #[test]
    fn missing_file_still_registers() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let m = tables.register_mod_id("core").unwrap();
        tables.set_resource_source(m, Arc::new(StaticResources::new(["resources/tex/a.png"])));
        tables.set_phase(RegistryPhase::Categories).unwrap();
        let c = tables.register_category_id("textures", Some("tex")).unwrap();
        tables.set_phase(RegistryPhase::Objects).unwrap();

        let id = tables
            .register_object_id(m, c, "missing", Some("absent.png"))
            .unwrap();
        assert!(id.is_valid());
        assert_eq!(tables.object_file(id), Some("resources/tex/absent.png"));
    }

    #[test]
    fn unknown_mod_or_category_is_rejected() {
        let mut tables = tables_in(RegistryPhase::Objects);
        assert!(matches!(
            tables.register_object_id(7, 1, "x", None),
            Err(RegistryError::UnknownMod(7))
        ));
    }

    #[test]
    fn merge_does_not_overwrite() {
        let mut tables = tables_in(RegistryPhase::Mods);
        tables.register_mod_id("core").unwrap();

        let mut remote = BTreeMap::new();
        remote.insert("core".to_owned(), 5);
        remote.insert("extra".to_owned(), 2);
        remote.insert("clash".to_owned(), 1);
        tables.set_mod_ids(&remote);

        assert_eq!(tables.mod_id("core"), Some(1));
        assert_eq!(tables.mod_id("extra"), Some(2));
        assert_eq!(tables.mod_id("clash"), None);
        // Registration after a merge reuses the replicated id.
        assert_eq!(tables.register_mod_id("extra").unwrap(), 2);
    }

    #[test]
    fn remove_objects_of_mods_only_touches_those_mods() {
        let mut tables = tables_in(RegistryPhase::Mods);
        let a = tables.register_mod_id("a").unwrap();
        let b = tables.register_mod_id("b").unwrap();
        tables.set_phase(RegistryPhase::Categories).unwrap();
        let c = tables.register_category_id("things", None).unwrap();
        tables.set_phase(RegistryPhase::Objects).unwrap();
        tables.register_object_id(a, c, "x", None).unwrap();
        let kept = tables.register_object_id(b, c, "y", None).unwrap();

        let removed = tables.remove_objects_of_mods(&HashSet::from([a]));
        assert_eq!(removed, 1);
        assert_eq!(tables.objects_in_category(c), vec![kept]);
    }
}
