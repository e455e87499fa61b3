//! Bookkeeping-only descriptor backend.
//!
//! Used when the engine runs without a GPU (headless servers, tests). It
//! enforces the same capacity rules a real driver would: a pool refuses
//! allocations beyond `max_sets`, freed sets must belong to the pool they are
//! returned to, and destroying a pool releases its sets.

use std::collections::{HashMap, HashSet};

use super::backend::{
    BackendError, DescriptorBackend, DescriptorSetHandle, LayoutDescription, LayoutHandle,
    PoolDescription, PoolHandle,
};

#[derive(Debug)]
struct HeadlessPool {
    description: PoolDescription,
    sets: HashSet<DescriptorSetHandle>,
}

/// A [`DescriptorBackend`] that only tracks handles.
#[derive(Debug, Default)]
pub struct HeadlessDescriptorBackend {
    next_handle: u64,
    layouts: HashMap<LayoutHandle, LayoutDescription>,
    pools: HashMap<PoolHandle, HeadlessPool>,
    refuse_pools: bool,
    pools_created: usize,
}

impl HeadlessDescriptorBackend {
    /// A backend with no objects that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `create_pool` call fail.
    pub fn refuse_pool_creation(&mut self, refuse: bool) {
        self.refuse_pools = refuse;
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Layouts created and not yet destroyed.
    pub fn live_layouts(&self) -> usize {
        self.layouts.len()
    }

    /// Pools created and not yet destroyed.
    pub fn live_pools(&self) -> usize {
        self.pools.len()
    }

    /// Total pools ever created, including destroyed ones.
    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    /// Sets allocated across all live pools.
    pub fn live_sets(&self) -> usize {
        self.pools.values().map(|p| p.sets.len()).sum()
    }

    /// Creation parameters of a live pool.
    pub fn pool_description(&self, pool: PoolHandle) -> Option<&PoolDescription> {
        self.pools.get(&pool).map(|p| &p.description)
    }

    /// Creation parameters of a live layout.
    pub fn layout_description(&self, layout: LayoutHandle) -> Option<&LayoutDescription> {
        self.layouts.get(&layout)
    }
}

impl DescriptorBackend for HeadlessDescriptorBackend {
    fn create_layout(&mut self, description: &LayoutDescription) -> Result<LayoutHandle, BackendError> {
        let handle = LayoutHandle(self.next());
        self.layouts.insert(handle, description.clone());
        Ok(handle)
    }

    fn destroy_layout(&mut self, layout: LayoutHandle) {
        self.layouts.remove(&layout);
    }

    fn create_pool(&mut self, description: &PoolDescription) -> Result<PoolHandle, BackendError> {
        if self.refuse_pools {
            return Err(BackendError {
                call: "create_pool",
                reason: "pool creation disabled".to_owned(),
            });
        }
        let handle = PoolHandle(self.next());
        self.pools.insert(
            handle,
            HeadlessPool {
                description: description.clone(),
                sets: HashSet::new(),
            },
        );
        self.pools_created += 1;
        Ok(handle)
    }

    fn destroy_pool(&mut self, pool: PoolHandle) {
        self.pools.remove(&pool);
    }

    fn allocate_set(
        &mut self,
        pool: PoolHandle,
        layout: LayoutHandle,
        _variable_count: Option<u32>,
    ) -> Result<DescriptorSetHandle, BackendError> {
        if !self.layouts.contains_key(&layout) {
            return Err(BackendError {
                call: "allocate_set",
                reason: format!("unknown layout {layout:?}"),
            });
        }
        let handle = DescriptorSetHandle(self.next_handle + 1);
        let state = self.pools.get_mut(&pool).ok_or_else(|| BackendError {
            call: "allocate_set",
            reason: format!("unknown pool {pool:?}"),
        })?;
        if state.sets.len() as u32 >= state.description.max_sets {
            return Err(BackendError {
                call: "allocate_set",
                reason: format!("pool {pool:?} is out of sets"),
            });
        }
        state.sets.insert(handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn free_set(&mut self, pool: PoolHandle, set: DescriptorSetHandle) -> Result<(), BackendError> {
        let removed = self
            .pools
            .get_mut(&pool)
            .is_some_and(|state| state.sets.remove(&set));
        if !removed {
            return Err(BackendError {
                call: "free_set",
                reason: format!("{set:?} was not allocated from {pool:?}"),
            });
        }
        Ok(())
    }
}
