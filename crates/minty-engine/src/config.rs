//! Engine configuration.

use std::path::Path;

use anyhow::Context;
use minty_modding::manager::ModManagerConfig;
use minty_registry::phase::GameType;
use minty_render::descriptor::DescriptorPoolConfig;
use serde::{Deserialize, Serialize};

/// Top-level settings. Every field is optional in the JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Which side of a session this process plays. Default: local (both).
    pub game_type: GameType,
    /// `tracing` filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub modding: ModManagerConfig,
    pub descriptors: DescriptorPoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game_type: GameType::LOCAL,
            log_filter: "info".to_owned(),
            modding: ModManagerConfig::default(),
            descriptors: DescriptorPoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration. Missing sections take their defaults.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or unknown field types.
    pub fn from_json(json: &str) -> Result<Self, anyhow::Error> {
        serde_json::from_str(json).context("failed to parse engine config")
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed; the error names the path.
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("in {}", path.display()))
    }
}
