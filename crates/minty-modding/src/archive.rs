//! Mod archives.
//!
//! A mod archive is a zip file laid out as:
//!
//! ```text
//! manifest.json
//! <name>.<module extension>     exactly one, at the top level
//! resources/<folder>/<file>     optional
//! <external dependency paths>   as declared in the manifest
//! ```

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use minty_registry::resources::ResourceSource;
use zip::ZipArchive;

use crate::manifest::ModManifest;
use crate::ModError;

/// Name of the manifest entry inside every archive.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Upper bound for preallocating an entry; the size in a zip header is
/// whatever the archive claims.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// An opened, validated mod archive.
pub struct ModArchive {
    path: PathBuf,
    manifest: ModManifest,
    module_file: String,
    entries: BTreeSet<String>,
    zip: Mutex<ZipArchive<File>>,
}

impl std::fmt::Debug for ModArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModArchive")
            .field("path", &self.path)
            .field("mod", &self.manifest.label())
            .field("module_file", &self.module_file)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ModArchive {
    /// Open `path` and validate its layout.
    ///
    /// The returned manifest has `archive_path` set to `path`. The module is
    /// located but not read; see [`read_module`](Self::read_module).
    ///
    /// # Errors
    ///
    /// - [`ModError::Io`] / [`ModError::Zip`] if the file is not a readable zip.
    /// - [`ModError::InvalidArchive`] unless there is exactly one top-level
    ///   module, a manifest and every declared external dependency.
    /// - [`ModError::InvalidManifest`] if the manifest does not parse.
    pub fn open(path: &Path, module_extension: &str) -> Result<Self, ModError> {
        let file = File::open(path).map_err(|source| ModError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut zip = ZipArchive::new(file).map_err(|source| ModError::Zip {
            path: path.to_path_buf(),
            source,
        })?;

        let entries: BTreeSet<String> = zip
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(str::to_owned)
            .collect();

        let invalid = |reason: String| ModError::InvalidArchive {
            path: path.to_path_buf(),
            reason,
        };

        let modules: Vec<&String> = entries
            .iter()
            .filter(|name| !name.contains('/') && has_extension(name, module_extension))
            .collect();
        let module_file = match modules.as_slice() {
            [single] => (*single).clone(),
            [] => {
                return Err(invalid(format!(
                    "no top-level .{module_extension} module file"
                )))
            }
            several => {
                return Err(invalid(format!(
                    "expected one top-level .{module_extension} module file, found {}",
                    several.len()
                )))
            }
        };

        if !entries.contains(MANIFEST_FILE) {
            return Err(invalid(format!("missing {MANIFEST_FILE}")));
        }
        let manifest_bytes = read_entry(&mut zip, path, MANIFEST_FILE)?;
        let mut manifest = ModManifest::from_json(&manifest_bytes)?;
        manifest.archive_path = Some(path.to_path_buf());

        for dependency in &manifest.external_dependencies {
            if !entries.contains(&dependency.path) {
                return Err(invalid(format!(
                    "external dependency '{}' ({}) is not in the archive",
                    dependency.name, dependency.path
                )));
            }
        }

        tracing::debug!(
            path = %path.display(),
            mod_id = %manifest.identifier,
            version = %manifest.version,
            entries = entries.len(),
            "opened mod archive"
        );

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            module_file,
            entries,
            zip: Mutex::new(zip),
        })
    }

    /// Location of the archive on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The parsed `manifest.json`.
    pub fn manifest(&self) -> &ModManifest {
        &self.manifest
    }

    /// Name of the compiled module entry.
    pub fn module_file(&self) -> &str {
        &self.module_file
    }

    /// Every file entry, sorted. Directory entries are left out.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Whether the archive has a file entry named `file`.
    pub fn contains(&self, file: &str) -> bool {
        self.entries.contains(file)
    }

    /// Read one entry into memory.
    ///
    /// # Errors
    ///
    /// - [`ModError::FileNotFound`] if there is no such entry.
    /// - [`ModError::Zip`] / [`ModError::Io`] if the entry cannot be read.
    pub fn read_file(&self, file: &str) -> Result<Vec<u8>, ModError> {
        if !self.entries.contains(file) {
            return Err(ModError::FileNotFound {
                path: self.path.clone(),
                file: file.to_owned(),
            });
        }
        let mut zip = self
            .zip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        read_entry(&mut zip, &self.path, file)
    }

    /// The compiled module bytes.
    ///
    /// # Errors
    ///
    /// See [`read_file`](Self::read_file).
    pub fn read_module(&self) -> Result<Vec<u8>, ModError> {
        self.read_file(&self.module_file)
    }
}

impl ResourceSource for ModArchive {
    fn contains_resource(&self, path: &str) -> bool {
        self.entries.contains(path)
    }
}

fn read_entry(zip: &mut ZipArchive<File>, path: &Path, file: &str) -> Result<Vec<u8>, ModError> {
    let mut entry = zip.by_name(file).map_err(|source| ModError::Zip {
        path: path.to_path_buf(),
        source,
    })?;
    let mut bytes = Vec::with_capacity(preallocation(entry.size()));
    entry.read_to_end(&mut bytes).map_err(|source| ModError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(bytes)
}

fn preallocation(claimed_size: u64) -> usize {
    usize::try_from(claimed_size.min(MAX_PREALLOCATION)).unwrap_or(0)
}

fn has_extension(name: &str, extension: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
