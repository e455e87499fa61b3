//! Registration phase state machines and game-type filtering.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RegistryPhase
// ---------------------------------------------------------------------------

/// Top-level registration phase. Exactly one is current at a time and the
/// order is `None -> Mods -> Categories -> Objects -> None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RegistryPhase {
    /// No registration in progress.
    #[default]
    None,
    /// Mod string ids are being mapped to numeric ids.
    Mods,
    /// Registries (categories) are being added.
    Categories,
    /// Objects are being registered through providers.
    Objects,
}

impl RegistryPhase {
    /// The phase that legally follows this one within a load cycle.
    pub fn successor(self) -> RegistryPhase {
        match self {
            RegistryPhase::None => RegistryPhase::Mods,
            RegistryPhase::Mods => RegistryPhase::Categories,
            RegistryPhase::Categories => RegistryPhase::Objects,
            RegistryPhase::Objects => RegistryPhase::None,
        }
    }
}

impl fmt::Display for RegistryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistryPhase::None => "none",
            RegistryPhase::Mods => "mods",
            RegistryPhase::Categories => "categories",
            RegistryPhase::Objects => "objects",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// ObjectRegistryPhase
// ---------------------------------------------------------------------------

/// Sub-phase of [`RegistryPhase::Objects`].
///
/// Every registry finishes a sub-phase before any registry enters the next
/// one, so objects registered in `Pre` can be referenced in `Main`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ObjectRegistryPhase {
    #[default]
    None,
    Pre,
    Main,
    Post,
}

impl ObjectRegistryPhase {
    /// The three active sub-phases, in execution order.
    pub const ACTIVE: [ObjectRegistryPhase; 3] = [
        ObjectRegistryPhase::Pre,
        ObjectRegistryPhase::Main,
        ObjectRegistryPhase::Post,
    ];
}

impl fmt::Display for ObjectRegistryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectRegistryPhase::None => "none",
            ObjectRegistryPhase::Pre => "pre",
            ObjectRegistryPhase::Main => "main",
            ObjectRegistryPhase::Post => "post",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// GameType
// ---------------------------------------------------------------------------

bitflags::bitflags! {
    /// Which side of a session a registry applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct GameType: u8 {
        const CLIENT = 0b01;
        const SERVER = 0b10;
        /// Single-process play: both client and server.
        const LOCAL = Self::CLIENT.bits() | Self::SERVER.bits();
    }
}

impl GameType {
    /// Whether something declared for `applicable` should be active in `self`.
    pub fn accepts(self, applicable: GameType) -> bool {
        self.intersects(applicable)
    }
}

impl Default for GameType {
    fn default() -> Self {
        GameType::LOCAL
    }
}
