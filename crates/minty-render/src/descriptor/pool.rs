//! Growable per-layout descriptor pools.
//!
//! A [`ManagedDescriptorPool`] owns one descriptor set layout and any number
//! of native pools ("slabs"). Slabs are created lazily, never shrunk and only
//! destroyed together with the whole pool, so steady-state allocate/free
//! cycles never touch the driver's pool management.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::backend::{
    DescriptorBackend, DescriptorSetHandle, DescriptorType, LayoutCreateFlags, LayoutDescription,
    LayoutHandle, PoolDescription, PoolSize,
};
use crate::DescriptorError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing policy for managed pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorPoolConfig {
    /// Capacity of the first slab of every pool. Default: 100.
    pub sets_per_pool: u32,
    /// When a single request exceeds the current slab capacity, the capacity
    /// becomes `request * growth_factor`. Default: 12.
    pub growth_factor: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            sets_per_pool: 100,
            growth_factor: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// LayoutKind / Slab
// ---------------------------------------------------------------------------

/// How sets of a layout are allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutKind {
    /// Fixed descriptor counts; every set costs one unit of slab capacity.
    Normal,
    /// One variable-count binding; a set costs its descriptor count.
    Variable,
}

impl std::fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutKind::Normal => f.write_str("normal"),
            LayoutKind::Variable => f.write_str("variable"),
        }
    }
}

/// One native pool and its usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slab {
    pub handle: super::backend::PoolHandle,
    pub max_sets: u32,
    pub used_sets: u32,
}

impl Slab {
    /// Units of capacity left in this slab.
    pub fn remaining(&self) -> u32 {
        self.max_sets - self.used_sets
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedSet {
    count: u32,
    slab: usize,
}

// ---------------------------------------------------------------------------
// ManagedDescriptorPool
// ---------------------------------------------------------------------------

/// A descriptor set layout together with the slabs its sets live in.
#[derive(Debug)]
pub struct ManagedDescriptorPool {
    layout: LayoutHandle,
    description: LayoutDescription,
    kind: LayoutKind,
    sets_per_pool: u32,
    growth_factor: u32,
    slabs: Vec<Slab>,
    sets: HashMap<DescriptorSetHandle, TrackedSet>,
}

impl ManagedDescriptorPool {
    /// Create the native layout and an empty pool around it.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Backend`] if the layout cannot be created.
    pub fn new<B: DescriptorBackend>(
        backend: &mut B,
        description: LayoutDescription,
        kind: LayoutKind,
        config: &DescriptorPoolConfig,
    ) -> Result<Self, DescriptorError> {
        let layout = backend.create_layout(&description)?;
        Ok(Self {
            layout,
            description,
            kind,
            sets_per_pool: config.sets_per_pool.max(1),
            growth_factor: config.growth_factor.max(1),
            slabs: Vec::new(),
            sets: HashMap::new(),
        })
    }

    /// Native handle of the layout.
    pub fn layout(&self) -> LayoutHandle {
        self.layout
    }

    /// The bindings the layout was created from.
    pub fn description(&self) -> &LayoutDescription {
        &self.description
    }

    /// Whether sets are fixed-count or variable-count.
    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    /// Capacity new slabs are created with.
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    /// Every slab in creation order. Slabs are never released before
    /// [`dispose`](Self::dispose).
    pub fn slabs(&self) -> &[Slab] {
        &self.slabs
    }

    /// Number of live sets across all slabs.
    pub fn allocated_sets(&self) -> usize {
        self.sets.len()
    }

    /// Allocate a set costing `count` units of slab capacity.
    ///
    /// `variable_count` is forwarded to the backend for variable layouts.
    ///
    /// # Errors
    ///
    /// - [`DescriptorError::ZeroCount`] for `count == 0`.
    /// - [`DescriptorError::Backend`] if a new slab or the set cannot be
    ///   created.
    pub fn allocate<B: DescriptorBackend>(
        &mut self,
        backend: &mut B,
        count: u32,
        variable_count: Option<u32>,
    ) -> Result<DescriptorSetHandle, DescriptorError> {
        if count == 0 {
            return Err(DescriptorError::ZeroCount);
        }

        if count > self.sets_per_pool {
            let grown = count.saturating_mul(self.growth_factor);
            tracing::debug!(
                from = self.sets_per_pool,
                to = grown,
                "growing descriptor slab capacity"
            );
            self.sets_per_pool = grown;
        }

        let slab_index = match self.slabs.iter().position(|slab| slab.remaining() >= count) {
            Some(index) => index,
            None => self.create_slab(backend)?,
        };

        let slab = &mut self.slabs[slab_index];
        let set = backend.allocate_set(slab.handle, self.layout, variable_count)?;
        slab.used_sets += count;
        self.sets.insert(
            set,
            TrackedSet {
                count,
                slab: slab_index,
            },
        );
        Ok(set)
    }

    fn create_slab<B: DescriptorBackend>(&mut self, backend: &mut B) -> Result<usize, DescriptorError> {
        let max_sets = self.sets_per_pool;

        let mut per_type: BTreeMap<DescriptorType, u32> = BTreeMap::new();
        for binding in &self.description.bindings {
            let total = per_type.entry(binding.descriptor_type).or_default();
            *total = total.saturating_add(binding.descriptor_count.saturating_mul(max_sets));
        }
        let sizes = per_type
            .into_iter()
            .map(|(descriptor_type, descriptor_count)| PoolSize {
                descriptor_type,
                descriptor_count,
            })
            .collect();

        let handle = backend.create_pool(&PoolDescription {
            max_sets,
            sizes,
            free_individual_sets: true,
            update_after_bind: self
                .description
                .flags
                .contains(LayoutCreateFlags::UPDATE_AFTER_BIND_POOL),
        })?;

        self.slabs.push(Slab {
            handle,
            max_sets,
            used_sets: 0,
        });
        tracing::debug!(
            slab = self.slabs.len() - 1,
            max_sets,
            "created descriptor slab"
        );
        Ok(self.slabs.len() - 1)
    }

    /// Whether `set` was allocated from this pool.
    pub fn owns(&self, set: DescriptorSetHandle) -> bool {
        self.sets.contains_key(&set)
    }

    /// Return a set to its slab. Unknown sets are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Backend`] if the native free fails.
    pub fn free<B: DescriptorBackend>(
        &mut self,
        backend: &mut B,
        set: DescriptorSetHandle,
    ) -> Result<(), DescriptorError> {
        let Some(&tracked) = self.sets.get(&set) else {
            return Ok(());
        };
        let slab = &mut self.slabs[tracked.slab];
        backend.free_set(slab.handle, set)?;
        slab.used_sets -= tracked.count;
        self.sets.remove(&set);
        Ok(())
    }

    /// Destroy every slab and the layout.
    pub fn dispose<B: DescriptorBackend>(self, backend: &mut B) {
        for slab in &self.slabs {
            backend.destroy_pool(slab.handle);
        }
        backend.destroy_layout(self.layout);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
