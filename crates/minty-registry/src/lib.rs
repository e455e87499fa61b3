//! Minty Registry -- stable numeric identities for mod-contributed objects.
//!
//! Mods refer to their content by string ids (`"core"`, `"blocks"`,
//! `"stone"`); the engine works with compact numeric
//! [`Identification`](identification::Identification)s. This crate assigns
//! those numbers across a phased load cycle and drives mod-supplied
//! registries through ordered object registration.
//!
//! # Modules
//!
//! - [`identification`]: the `(mod, category, object)` id triple.
//! - [`phase`]: registry phases, object sub-phases and game-type filtering.
//! - [`tables`]: the phase-gated string/numeric id tables.
//! - [`registry`]: the [`Registry`](registry::Registry) trait and object providers.
//! - [`manager`]: [`RegistryManager`](manager::RegistryManager), which orders
//!   registries by dependency and runs providers.
//! - [`resources`]: resource file lookup used by file-backed objects.
//!
//! # Example
//!
//! ```
//! use minty_registry::prelude::*;
//!
//! let mut registry = RegistryManager::new();
//! registry.set_phase(RegistryPhase::Mods).unwrap();
//! let core = registry.register_mod_id("core").unwrap();
//! registry.set_phase(RegistryPhase::Categories).unwrap();
//! let blocks = registry.register_category_id(core, "blocks", Some("blocks")).unwrap();
//! registry.set_phase(RegistryPhase::Objects).unwrap();
//! let stone = registry.register_object_id(core, blocks, "stone", None).unwrap();
//! assert_eq!(stone, Identification::new(1, 1, 1));
//! ```

#![deny(unsafe_code)]

pub mod identification;
pub mod manager;
pub mod phase;
pub mod registry;
pub mod resources;
pub mod tables;

use phase::RegistryPhase;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by id registration and registry processing.
///
/// All of them abort the current load cycle; nothing is rolled back.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A registration call was made outside the phase it belongs to.
    #[error("{operation} is only legal in the {expected} phase (current phase: {actual})")]
    WrongPhase {
        operation: &'static str,
        expected: RegistryPhase,
        actual: RegistryPhase,
    },

    /// A phase change skipped a phase or went backwards.
    #[error("invalid registry phase transition {from} -> {to}")]
    InvalidPhaseTransition {
        from: RegistryPhase,
        to: RegistryPhase,
    },

    /// A numeric mod id that was never registered.
    #[error("mod id {0} is not registered")]
    UnknownMod(u16),

    /// A mod string id that was never registered.
    #[error("mod '{0}' is not registered")]
    UnknownModName(String),

    /// A numeric category id that was never registered.
    #[error("category id {0} is not registered")]
    UnknownCategory(u16),

    /// An object was registered with a file, but its category has no folder.
    #[error("object '{object}' references a file, but category '{category}' has no resource folder")]
    MissingCategoryFolder { category: String, object: String },

    /// Every id in a table is taken.
    #[error("no free numeric id left in the {table} table")]
    IdSpaceExhausted { table: String },

    /// A registry with this string id already exists.
    #[error("registry '{0}' is already registered")]
    DuplicateRegistry(String),

    /// Providers must run in `Pre`, `Main` or `Post`.
    #[error("object provider for '{registry}' must target the pre, main or post sub-phase")]
    InvalidProviderPhase { registry: String },

    /// A registry requires another registry that does not exist.
    #[error("registry '{registry}' requires registry '{dependency}', which is not registered")]
    MissingRegistryDependency { registry: String, dependency: String },

    /// The registry dependency graph has a cycle.
    #[error("cyclic registry dependency between [{}]", registries.join(", "))]
    CyclicRegistryDependency { registries: Vec<String> },

    /// An object provider reported a failure of its own.
    #[error("object provider for '{registry}' failed: {reason}")]
    ProviderFailed { registry: String, reason: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::identification::{Identification, INVALID_ID};
    pub use crate::manager::RegistryManager;
    pub use crate::phase::{GameType, ObjectRegistryPhase, RegistryPhase};
    pub use crate::registry::{ObjectRegistrar, Registry};
    pub use crate::resources::{ResourceSource, StaticResources};
    pub use crate::tables::IdTables;
    pub use crate::RegistryError;
}
