//! Lookup of mod-bundled resource files.

use std::collections::BTreeSet;

/// Something that can answer whether a mod ships a given resource file.
///
/// Mod archives implement this; the registry manager only needs existence
/// checks when an object is registered with a backing file.
pub trait ResourceSource: Send + Sync {
    /// Whether `path` (archive-relative, `/`-separated) exists.
    fn contains_resource(&self, path: &str) -> bool;
}

/// A fixed, in-memory set of resource paths.
///
/// Used for built-in mods that ship their files with the engine and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticResources {
    paths: BTreeSet<String>,
}

impl StaticResources {
    /// A source containing exactly `paths`.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResourceSource for StaticResources {
    fn contains_resource(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

/// Archive-relative path of an object's backing file.
pub fn resource_path(folder: &str, file_name: &str) -> String {
    format!("resources/{folder}/{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resources_lookup() {
        let res = StaticResources::new(["resources/blocks/dirt.png"]);
        assert!(res.contains_resource(&resource_path("blocks", "dirt.png")));
        assert!(!res.contains_resource(&resource_path("blocks", "absent.png")));
    }
}
