//! Composite numeric identity for mod-contributed game objects.
//!
//! Every object a mod registers is addressed by an [`Identification`]: the
//! numeric id of the owning mod, the numeric id of the category (registry) it
//! belongs to, and a dense object id within that `(mod, category)` partition.
//! Numeric ids are assigned by the [`RegistryManager`](crate::manager::RegistryManager)
//! and are only stable for the lifetime of a load cycle, which is why the
//! string tables are replicated to network peers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved sentinel for every numeric id component.
pub const INVALID_ID: u16 = 0;

// ---------------------------------------------------------------------------
// Identification
// ---------------------------------------------------------------------------

/// Immutable `(mod, category, object)` triple.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Identification {
    /// Numeric id of the owning mod.
    pub mod_id: u16,
    /// Numeric id of the category the object is registered in.
    pub category_id: u16,
    /// Dense object id within the `(mod, category)` partition.
    pub object_id: u16,
}

impl Identification {
    /// The all-sentinel value meaning "unset".
    pub const INVALID: Identification = Identification {
        mod_id: INVALID_ID,
        category_id: INVALID_ID,
        object_id: INVALID_ID,
    };

    /// Build an identification from its three components.
    pub const fn new(mod_id: u16, category_id: u16, object_id: u16) -> Self {
        Self {
            mod_id,
            category_id,
            object_id,
        }
    }

    /// `false` only for the all-sentinel value.
    pub const fn is_valid(&self) -> bool {
        !(self.mod_id == INVALID_ID
            && self.category_id == INVALID_ID
            && self.object_id == INVALID_ID)
    }

    /// Pack into the low 48 bits of a `u64` (mod in the highest 16 bits).
    pub const fn to_u64(self) -> u64 {
        ((self.mod_id as u64) << 32) | ((self.category_id as u64) << 16) | self.object_id as u64
    }

    /// Inverse of [`to_u64`](Self::to_u64). Bits above 48 are ignored.
    pub const fn from_u64(raw: u64) -> Self {
        Self {
            mod_id: (raw >> 32) as u16,
            category_id: (raw >> 16) as u16,
            object_id: raw as u16,
        }
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Identification({}:{}:{})",
            self.mod_id, self.category_id, self.object_id
        )
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.mod_id, self.category_id, self.object_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
