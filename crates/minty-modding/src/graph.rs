//! Mod dependency graph and load order.

use std::collections::{BTreeMap, BTreeSet};

use crate::lifecycle::{ENGINE_MOD_ID, ENGINE_VERSION};
use crate::manifest::{ModManifest, ModVersion};
use crate::ModError;

/// A validated, acyclic mod graph with its load order.
#[derive(Debug, Clone)]
pub struct ModLoadGraph {
    /// Selected manifest per identifier. The engine vertex has no manifest.
    manifests: BTreeMap<String, ModManifest>,
    /// In-graph dependencies of each vertex.
    dependencies: BTreeMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl ModLoadGraph {
    /// Identifiers in load order: every mod comes after its dependencies.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Selected manifest of `identifier`. `None` for the engine vertex.
    pub fn manifest(&self, identifier: &str) -> Option<&ModManifest> {
        self.manifests.get(identifier)
    }

    /// Dependencies of `identifier` that are part of this graph.
    pub fn dependencies(&self, identifier: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(identifier)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Whether `identifier` is a vertex of the graph.
    pub fn contains(&self, identifier: &str) -> bool {
        self.dependencies.contains_key(identifier)
    }

    /// Number of vertices, the engine vertex included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Build the load graph for `manifests`.
///
/// When several versions of one mod are given, the highest wins. A
/// dependency is satisfied by a manifest in the set or by an entry of
/// `already_loaded`, in either case with a version at or above the declared
/// minimum. With `include_engine`, a synthetic [`ENGINE_MOD_ID`] vertex is
/// added and every other mod depends on it.
///
/// # Errors
///
/// - [`ModError::InvalidManifest`] if a manifest uses the engine identifier.
/// - [`ModError::MissingDependency`] if a dependency is absent or too old.
/// - [`ModError::CyclicDependency`] listing the mods left on a cycle.
pub fn build_mod_loading_graph(
    manifests: &[ModManifest],
    already_loaded: &BTreeMap<String, ModVersion>,
    include_engine: bool,
) -> Result<ModLoadGraph, ModError> {
    let mut selected: BTreeMap<String, ModManifest> = BTreeMap::new();
    for manifest in manifests {
        if manifest.identifier == ENGINE_MOD_ID {
            return Err(ModError::InvalidManifest {
                identifier: manifest.identifier.clone(),
                reason: "identifier is reserved for the engine".to_owned(),
            });
        }
        let replace = selected
            .get(&manifest.identifier)
            .map_or(true, |current| manifest.version > current.version);
        if replace {
            selected.insert(manifest.identifier.clone(), manifest.clone());
        }
    }

    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if include_engine {
        dependencies.insert(ENGINE_MOD_ID.to_owned(), BTreeSet::new());
    }

    for (identifier, manifest) in &selected {
        let mut edges = BTreeSet::new();
        if include_engine {
            edges.insert(ENGINE_MOD_ID.to_owned());
        }
        for dependency in &manifest.mod_dependencies {
            let in_graph = if dependency.identifier == ENGINE_MOD_ID && include_engine {
                Some(ENGINE_VERSION)
            } else {
                selected.get(&dependency.identifier).map(|m| m.version)
            };
            match (in_graph, already_loaded.get(&dependency.identifier)) {
                (Some(version), _) if version >= dependency.version => {
                    edges.insert(dependency.identifier.clone());
                }
                (_, Some(&loaded)) if loaded >= dependency.version => {}
                _ => {
                    return Err(ModError::MissingDependency {
                        mod_id: identifier.clone(),
                        dependency: dependency.identifier.clone(),
                        version: dependency.version,
                    })
                }
            }
        }
        dependencies.insert(identifier.clone(), edges);
    }

    let order = topological_order(&dependencies)?;
    tracing::debug!(order = ?order, "mod load order");

    Ok(ModLoadGraph {
        manifests: selected,
        dependencies,
        order,
    })
}

/// Kahn's algorithm. Among ready vertices the smallest identifier goes first.
fn topological_order(
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>, ModError> {
    let mut remaining: BTreeMap<&str, usize> = dependencies
        .iter()
        .map(|(id, deps)| (id.as_str(), deps.len()))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (id, deps) in dependencies {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(id.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.to_owned());
        for &dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if !remaining.is_empty() {
        return Err(ModError::CyclicDependency {
            mods: remaining.keys().map(|id| id.to_string()).collect(),
        });
    }
    Ok(order)
}
