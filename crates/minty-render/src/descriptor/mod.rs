//! Descriptor set layouts and slab-allocated descriptor sets.
//!
//! - [`backend`]: the native call seam and handle types.
//! - [`pool`]: [`ManagedDescriptorPool`], the per-layout slab allocator.
//! - [`manager`]: [`DescriptorSetManager`], layouts and sets by id.
//! - [`headless`]: a bookkeeping backend for runs without a GPU.

pub mod backend;
pub mod headless;
pub mod manager;
pub mod pool;

pub use backend::{
    BackendError, BindingFlags, DescriptorBackend, DescriptorBinding, DescriptorSetHandle,
    DescriptorType, LayoutCreateFlags, LayoutDescription, LayoutHandle, PoolDescription,
    PoolHandle, PoolSize, ShaderStages,
};
pub use headless::HeadlessDescriptorBackend;
pub use manager::DescriptorSetManager;
pub use pool::{DescriptorPoolConfig, LayoutKind, ManagedDescriptorPool, Slab};
