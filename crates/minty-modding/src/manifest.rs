//! Mod manifests (`manifest.json`) and version handling.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModError;

// ---------------------------------------------------------------------------
// ModVersion
// ---------------------------------------------------------------------------

/// `major.minor.patch` version, ordered numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModVersion {
    /// A version from its three components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ModVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ModVersion {
    type Err = String;

    /// Missing trailing components default to zero (`"1.2"` is `1.2.0`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 3];
        let mut count = 0;
        for (i, part) in s.trim().split('.').enumerate() {
            if i >= 3 {
                return Err(format!("version '{s}' has more than three components"));
            }
            parts[i] = part
                .parse()
                .map_err(|_| format!("version component '{part}' of '{s}' is not a number"))?;
            count += 1;
        }
        if count == 0 {
            return Err("empty version".to_owned());
        }
        Ok(ModVersion::new(parts[0], parts[1], parts[2]))
    }
}

impl TryFrom<String> for ModVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModVersion> for String {
    fn from(value: ModVersion) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// A dependency on another mod, satisfied by any version at or above `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModDependency {
    pub identifier: String,
    #[serde(default)]
    pub version: ModVersion,
}

/// A native library shipped inside the mod archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExternalDependency {
    pub name: String,
    /// Archive-relative path of the library.
    pub path: String,
}

// ---------------------------------------------------------------------------
// ModManifest
// ---------------------------------------------------------------------------

/// Metadata describing one version of a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModManifest {
    pub identifier: String,
    pub version: ModVersion,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub is_root_mod: bool,
    #[serde(default)]
    pub mod_dependencies: Vec<ModDependency>,
    #[serde(default)]
    pub external_dependencies: Vec<ExternalDependency>,
    /// The archive this manifest was read from. Built-in mods have none.
    #[serde(skip)]
    pub archive_path: Option<PathBuf>,
}

impl ModManifest {
    /// Parse and validate a manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::InvalidManifest`] if the JSON does not parse or
    /// fails [`validate`](Self::validate).
    pub fn from_json(bytes: &[u8]) -> Result<Self, ModError> {
        let manifest: ModManifest =
            serde_json::from_slice(bytes).map_err(|e| ModError::InvalidManifest {
                identifier: "<unparsed>".to_owned(),
                reason: e.to_string(),
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Identifiers are lowercase `[a-z0-9_]+`; dependencies follow the same rule
    /// and a mod may not depend on itself.
    ///
    /// # Errors
    ///
    /// Returns [`ModError::InvalidManifest`] naming the first violation.
    pub fn validate(&self) -> Result<(), ModError> {
        let invalid = |reason: String| ModError::InvalidManifest {
            identifier: self.identifier.clone(),
            reason,
        };

        if !is_valid_identifier(&self.identifier) {
            return Err(invalid(format!(
                "identifier '{}' must be non-empty lowercase [a-z0-9_]",
                self.identifier
            )));
        }
        for dependency in &self.mod_dependencies {
            if !is_valid_identifier(&dependency.identifier) {
                return Err(invalid(format!(
                    "dependency identifier '{}' must be non-empty lowercase [a-z0-9_]",
                    dependency.identifier
                )));
            }
            if dependency.identifier == self.identifier {
                return Err(invalid("a mod cannot depend on itself".to_owned()));
            }
        }
        Ok(())
    }

    /// Whether this manifest satisfies `dependency`.
    pub fn satisfies(&self, dependency: &ModDependency) -> bool {
        self.identifier == dependency.identifier && self.version >= dependency.version
    }

    /// Human-readable `identifier@version`.
    pub fn label(&self) -> String {
        format!("{}@{}", self.identifier, self.version)
    }
}

pub(crate) fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
