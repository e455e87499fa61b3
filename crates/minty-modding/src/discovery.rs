//! Index of every mod manifest found on disk.

use std::collections::BTreeMap;
use std::path::Path;

use crate::archive::ModArchive;
use crate::manifest::{ModDependency, ModManifest, ModVersion};
use crate::ModError;

/// Manifests keyed by identifier; several versions of one mod may coexist.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    by_identifier: BTreeMap<String, Vec<ModManifest>>,
}

impl ManifestIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest. Returns `false` if that version was already indexed.
    pub fn insert(&mut self, manifest: ModManifest) -> bool {
        let versions = self
            .by_identifier
            .entry(manifest.identifier.clone())
            .or_default();
        if let Some(existing) = versions.iter().find(|m| m.version == manifest.version) {
            tracing::warn!(
                mod_id = %manifest.identifier,
                version = %manifest.version,
                kept = ?existing.archive_path,
                ignored = ?manifest.archive_path,
                "duplicate mod version ignored"
            );
            return false;
        }
        versions.push(manifest);
        versions.sort_by(|a, b| a.version.cmp(&b.version));
        true
    }

    /// Every indexed version of `identifier`, oldest first.
    pub fn versions(&self, identifier: &str) -> &[ModManifest] {
        self.by_identifier
            .get(identifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The manifest of exactly `identifier` at `version`.
    pub fn get(&self, identifier: &str, version: ModVersion) -> Option<&ModManifest> {
        self.versions(identifier)
            .iter()
            .find(|m| m.version == version)
    }

    /// Highest indexed version of `identifier`.
    pub fn latest(&self, identifier: &str) -> Option<&ModManifest> {
        self.versions(identifier).last()
    }

    /// Highest version satisfying `dependency`.
    pub fn resolve(&self, dependency: &ModDependency) -> Option<&ModManifest> {
        self.versions(&dependency.identifier)
            .iter()
            .rev()
            .find(|m| m.satisfies(dependency))
    }

    /// Latest version of every root mod.
    pub fn root_manifests(&self) -> Vec<ModManifest> {
        self.by_identifier
            .values()
            .filter_map(|versions| versions.last())
            .filter(|m| m.is_root_mod)
            .cloned()
            .collect()
    }

    /// Every indexed identifier, sorted.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.by_identifier.keys().map(String::as_str)
    }

    /// Number of indexed manifests across all versions.
    pub fn len(&self) -> usize {
        self.by_identifier.values().map(Vec::len).sum()
    }

    /// Whether nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }

    /// Scan `dir` (not recursively) for archives with `archive_extension` and
    /// index their manifests. Archives that fail to open are logged and
    /// skipped. Returns the number of manifests added.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::Io`] if `dir` cannot be listed.
    pub fn scan_directory(
        &mut self,
        dir: &Path,
        archive_extension: &str,
        module_extension: &str,
    ) -> Result<usize, ModError> {
        let read_dir = std::fs::read_dir(dir).map_err(|source| ModError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| ModError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let matches = path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(archive_extension));
            if matches {
                paths.push(path);
            }
        }
        paths.sort();

        let mut added = 0;
        for path in paths {
            match ModArchive::open(&path, module_extension) {
                Ok(archive) => {
                    if self.insert(archive.manifest().clone()) {
                        added += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable mod archive");
                }
            }
        }
        tracing::debug!(dir = %dir.display(), added, "scanned mod directory");
        Ok(added)
    }
}
