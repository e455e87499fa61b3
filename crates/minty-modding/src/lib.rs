//! Minty Modding -- mod discovery, dependency ordering and load lifecycle.
//!
//! Mods ship as zip archives (`*.mcmod`) holding a `manifest.json`, one
//! compiled module and optional resources. The [`ModManager`](manager::ModManager)
//! finds archives, orders mods by their declared dependencies, drives their
//! lifecycle hooks against the shared
//! [`RegistryManager`](minty_registry::manager::RegistryManager) and tears
//! them down again. Each archive's module is compiled with wasmtime; mods
//! without a host-side entry point run through the module's exports.
//!
//! # Modules
//!
//! - [`manifest`]: `manifest.json` parsing and version ordering.
//! - [`archive`]: reading mod archives.
//! - [`discovery`]: the manifest index filled by directory scans.
//! - [`graph`]: the mod dependency graph and load order.
//! - [`lifecycle`]: the [`Mod`](lifecycle::Mod) trait, the entry-point catalog
//!   and load contexts.
//! - [`module`]: wasm mods and the host functions they import.
//! - [`manager`]: the [`ModManager`](manager::ModManager).

#![deny(unsafe_code)]

pub mod archive;
pub mod discovery;
pub mod graph;
pub mod lifecycle;
pub mod manager;
pub mod manifest;
pub mod module;

use std::path::PathBuf;

use minty_registry::RegistryError;

use crate::manifest::ModVersion;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while discovering, loading or unloading mods.
#[derive(Debug, thiserror::Error)]
pub enum ModError {
    /// Filesystem access failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The zip container could not be read.
    #[error("cannot read archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// The archive is readable but does not have the expected layout.
    #[error("invalid mod archive {path}: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    /// A manifest failed to parse or validate.
    #[error("invalid manifest for '{identifier}': {reason}")]
    InvalidManifest { identifier: String, reason: String },

    /// A declared dependency is not available in a sufficient version.
    #[error("mod '{mod_id}' requires '{dependency}' >= {version}, which is not available")]
    MissingDependency {
        mod_id: String,
        dependency: String,
        version: ModVersion,
    },

    /// The mod dependency graph has a cycle.
    #[error("cyclic mod dependency between [{}]", mods.join(", "))]
    CyclicDependency { mods: Vec<String> },

    /// A mod has neither a catalog entry nor a module exporting `load`.
    #[error("mod '{0}' has no entry point")]
    MissingEntryPoint(String),

    /// A mod's module failed to compile or instantiate.
    #[error("invalid module for mod '{mod_id}': {reason}")]
    InvalidModule { mod_id: String, reason: String },

    /// A wasm export trapped or ran out of fuel.
    #[error("module of mod '{mod_id}' trapped in {export}(): {reason}")]
    ModuleTrap {
        mod_id: String,
        export: &'static str,
        reason: String,
    },

    /// The wasm runtime could not be set up.
    #[error("wasm runtime error: {0}")]
    Runtime(String),

    /// A file was requested that the archive does not contain.
    #[error("file '{file}' not found in archive {path}")]
    FileNotFound { path: PathBuf, file: String },

    /// The requested mod set is already loaded.
    #[error("{0} are already loaded")]
    AlreadyLoaded(&'static str),

    /// Game mods need the root mods underneath them.
    #[error("root mods must be loaded before game mods")]
    RootModsNotLoaded,

    /// The requested mod set is not loaded.
    #[error("{0} are not loaded")]
    NotLoaded(&'static str),

    /// A lifecycle hook of a mod failed.
    #[error("mod '{mod_id}' failed during {hook}: {reason}")]
    HookFailed {
        mod_id: String,
        hook: &'static str,
        reason: String,
    },

    /// Id registration or registry processing failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::archive::ModArchive;
    pub use crate::discovery::ManifestIndex;
    pub use crate::graph::{build_mod_loading_graph, ModLoadGraph};
    pub use crate::lifecycle::{LoadContext, LoadPhase, Mod, ModCatalog, ModContext, ENGINE_MOD_ID};
    pub use crate::manager::{ModManager, ModManagerConfig, UnloadReport};
    pub use crate::manifest::{ExternalDependency, ModDependency, ModManifest, ModVersion};
    pub use crate::module::{ModHostState, QueuedObject, WasmMod};
    pub use crate::ModError;
}
