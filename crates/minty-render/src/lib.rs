//! Minty Render -- GPU resource bookkeeping.
//!
//! Rendering itself lives behind the graphics backend; this crate owns the
//! parts of resource management that are pure bookkeeping and therefore
//! testable without a device. Currently that is descriptor sets: layouts are
//! registered by [`Identification`](minty_registry::identification::Identification)
//! and sets are carved out of growable per-layout pools.
//!
//! # Example
//!
//! ```
//! use minty_registry::identification::Identification;
//! use minty_render::descriptor::*;
//!
//! let mut descriptors =
//!     DescriptorSetManager::new(HeadlessDescriptorBackend::new(), DescriptorPoolConfig::default());
//! let id = Identification::new(1, 1, 1);
//! descriptors
//!     .add_descriptor_set_layout(
//!         id,
//!         vec![DescriptorBinding {
//!             binding: 0,
//!             descriptor_type: DescriptorType::CombinedImageSampler,
//!             descriptor_count: 1,
//!             stages: ShaderStages::FRAGMENT,
//!             flags: BindingFlags::empty(),
//!         }],
//!         LayoutCreateFlags::empty(),
//!     )
//!     .unwrap();
//! let set = descriptors.allocate_descriptor_set(id).unwrap();
//! descriptors.free_descriptor_set(set).unwrap();
//! ```

#![deny(unsafe_code)]

pub mod descriptor;

use descriptor::pool::LayoutKind;
use minty_registry::identification::Identification;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by descriptor layout and set management.
#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    /// A layout with this id is already registered.
    #[error("descriptor set layout {0} is already registered")]
    DuplicateLayout(Identification),

    /// No layout is registered under this id.
    #[error("descriptor set layout {0} is not registered")]
    UnknownLayout(Identification),

    /// The allocation method does not match the layout kind.
    #[error("descriptor set layout {id} is a {actual} layout, but a {expected} allocation was requested")]
    WrongLayoutKind {
        id: Identification,
        expected: LayoutKind,
        actual: LayoutKind,
    },

    /// External layouts have no pool to allocate from.
    #[error("descriptor set layout {0} is external; sets must be allocated by its owner")]
    ExternalLayout(Identification),

    /// The layout description is not usable for the requested kind.
    #[error("invalid descriptor set layout {id}: {reason}")]
    InvalidLayout { id: Identification, reason: String },

    /// More descriptors requested than the variable binding allows.
    #[error("variable descriptor count {requested} exceeds the bound {max} of layout {id}")]
    VariableCountTooLarge {
        id: Identification,
        requested: u32,
        max: u32,
    },

    /// Allocations must cost at least one unit.
    #[error("descriptor allocation count must be at least 1")]
    ZeroCount,

    /// A native call failed.
    #[error(transparent)]
    Backend(#[from] descriptor::backend::BackendError),
}
