//! Minty Engine -- ties the registry, modding and render crates together.
//!
//! [`Engine`](engine::Engine) owns the [`ModManager`](minty_modding::manager::ModManager)
//! and the descriptor set manager, and contributes the built-in
//! `minty_core` mod ([`CoreMod`](core_mod::CoreMod)) that every other mod
//! loads on top of.
//!
//! # Quick Start
//!
//! ```
//! use minty_engine::prelude::*;
//!
//! let mut config = EngineConfig::default();
//! config.modding.mod_directories.clear();
//!
//! let mut engine = Engine::new(config, ModCatalog::new(), HeadlessDescriptorBackend::new());
//! engine.start().unwrap();
//! assert!(engine.mods().is_loaded(ENGINE_MOD_ID));
//!
//! let report = engine.shutdown();
//! assert!(report.is_clean());
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod core_mod;
pub mod engine;
pub mod logging;

use minty_modding::ModError;
use minty_render::DescriptorError;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use minty_modding;
pub use minty_registry;
pub use minty_render;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the engine facade.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Mod(#[from] ModError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// No manifest with this identifier was discovered.
    #[error("no mod named '{0}' was found")]
    UnknownMod(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use minty_modding::prelude::*;
    pub use minty_registry::prelude::*;
    pub use minty_render::descriptor::*;
    pub use minty_render::DescriptorError;

    pub use crate::config::EngineConfig;
    pub use crate::core_mod::{CoreMod, DescriptorSetRegistry, SharedDescriptors, DESCRIPTOR_SET_REGISTRY};
    pub use crate::engine::Engine;
    pub use crate::logging::init_logging;
    pub use crate::EngineError;
}
