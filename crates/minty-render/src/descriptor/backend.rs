//! The graphics-API seam for descriptor management.
//!
//! [`DescriptorBackend`] is the narrow set of native calls the descriptor
//! allocator needs: create/destroy layouts and pools, allocate/free sets.
//! Handles are opaque `u64`s so a Vulkan backend can store raw handles and
//! the [`HeadlessDescriptorBackend`](super::headless::HeadlessDescriptorBackend)
//! can store counters.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u64);

        impl $name {
            /// The null handle.
            pub const NULL: $name = $name(0);

            /// Whether this is [`Self::NULL`].
            pub fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }
    };
}

handle!(
    /// Native descriptor set layout.
    LayoutHandle
);
handle!(
    /// Native descriptor pool (one slab).
    PoolHandle
);
handle!(
    /// Native descriptor set.
    DescriptorSetHandle
);

// ---------------------------------------------------------------------------
// Layout description
// ---------------------------------------------------------------------------

/// Resource kind bound at a descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DescriptorType {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformBufferDynamic,
    StorageBufferDynamic,
    InputAttachment,
}

bitflags::bitflags! {
    /// Shader stages a binding is visible to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShaderStages: u32 {
        const VERTEX = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
        const ALL_GRAPHICS = Self::VERTEX.bits() | Self::FRAGMENT.bits();
    }
}

bitflags::bitflags! {
    /// Per-binding flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct BindingFlags: u32 {
        const UPDATE_AFTER_BIND = 1 << 0;
        const PARTIALLY_BOUND = 1 << 1;
        /// The binding's descriptor count is chosen per allocated set.
        const VARIABLE_DESCRIPTOR_COUNT = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Layout-level creation flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LayoutCreateFlags: u32 {
        const UPDATE_AFTER_BIND_POOL = 1 << 0;
    }
}

/// One binding of a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub descriptor_type: DescriptorType,
    /// Descriptors per set. For a variable-count binding this is the upper bound.
    pub descriptor_count: u32,
    pub stages: ShaderStages,
    pub flags: BindingFlags,
}

/// Everything needed to create a descriptor set layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDescription {
    pub bindings: Vec<DescriptorBinding>,
    pub flags: LayoutCreateFlags,
}

/// Pool capacity for one descriptor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub descriptor_type: DescriptorType,
    pub descriptor_count: u32,
}

/// Parameters for creating a descriptor pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolDescription {
    pub max_sets: u32,
    pub sizes: Vec<PoolSize>,
    /// Sets allocated from this pool may be freed individually.
    pub free_individual_sets: bool,
    pub update_after_bind: bool,
}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// A native call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{call} failed: {reason}")]
pub struct BackendError {
    pub call: &'static str,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// DescriptorBackend
// ---------------------------------------------------------------------------

/// Native descriptor calls.
pub trait DescriptorBackend {
    fn create_layout(&mut self, description: &LayoutDescription) -> Result<LayoutHandle, BackendError>;

    fn destroy_layout(&mut self, layout: LayoutHandle);

    fn create_pool(&mut self, description: &PoolDescription) -> Result<PoolHandle, BackendError>;

    /// Destroys the pool and every set still allocated from it.
    fn destroy_pool(&mut self, pool: PoolHandle);

    /// Allocate one set. `variable_count` is the descriptor count of the
    /// variable-count binding, if the layout has one.
    fn allocate_set(
        &mut self,
        pool: PoolHandle,
        layout: LayoutHandle,
        variable_count: Option<u32>,
    ) -> Result<DescriptorSetHandle, BackendError>;

    fn free_set(&mut self, pool: PoolHandle, set: DescriptorSetHandle) -> Result<(), BackendError>;
}
