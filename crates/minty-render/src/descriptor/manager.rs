//! Descriptor set layouts and allocation by [`Identification`].
//!
//! Every layout is registered under an id. Owned layouts get their own
//! [`ManagedDescriptorPool`] so pool sizing stays homogeneous per layout;
//! external layouts are created by foreign code and are only tracked so they
//! can be referenced by id.

use std::collections::HashMap;

use minty_registry::identification::Identification;

use super::backend::{
    BindingFlags, DescriptorBackend, DescriptorBinding, DescriptorSetHandle, LayoutCreateFlags,
    LayoutDescription, LayoutHandle,
};
use super::pool::{DescriptorPoolConfig, LayoutKind, ManagedDescriptorPool, Slab};
use crate::DescriptorError;

enum LayoutEntry {
    Managed(ManagedDescriptorPool),
    External(LayoutHandle),
}

/// Owns the descriptor backend and every registered layout.
pub struct DescriptorSetManager<B: DescriptorBackend> {
    backend: B,
    config: DescriptorPoolConfig,
    layouts: HashMap<Identification, LayoutEntry>,
    /// Which layout each live set was allocated for.
    set_owners: HashMap<DescriptorSetHandle, Identification>,
}

impl<B: DescriptorBackend> std::fmt::Debug for DescriptorSetManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorSetManager")
            .field("config", &self.config)
            .field("layouts", &self.layouts.len())
            .field("sets", &self.set_owners.len())
            .finish()
    }
}

impl<B: DescriptorBackend> DescriptorSetManager<B> {
    /// Create a manager with no layouts. Pools are created lazily on the
    /// first allocation of each layout.
    pub fn new(backend: B, config: DescriptorPoolConfig) -> Self {
        Self {
            backend,
            config,
            layouts: HashMap::new(),
            set_owners: HashMap::new(),
        }
    }

    /// The native backend every layout and pool lives in.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend, e.g. to create external layouts.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Pool sizing applied to every owned layout.
    pub fn config(&self) -> &DescriptorPoolConfig {
        &self.config
    }

    fn ensure_unique(&self, id: Identification) -> Result<(), DescriptorError> {
        if self.layouts.contains_key(&id) {
            return Err(DescriptorError::DuplicateLayout(id));
        }
        Ok(())
    }

    // -- layouts ------------------------------------------------------------

    /// Register a fixed-count layout and its pool.
    ///
    /// # Errors
    ///
    /// - [`DescriptorError::DuplicateLayout`] if `id` is taken.
    /// - [`DescriptorError::InvalidLayout`] if a binding is variable-count.
    /// - [`DescriptorError::Backend`] if the native layout cannot be created.
    pub fn add_descriptor_set_layout(
        &mut self,
        id: Identification,
        bindings: Vec<DescriptorBinding>,
        flags: LayoutCreateFlags,
    ) -> Result<LayoutHandle, DescriptorError> {
        self.ensure_unique(id)?;
        if let Some(binding) = bindings
            .iter()
            .find(|b| b.flags.contains(BindingFlags::VARIABLE_DESCRIPTOR_COUNT))
        {
            return Err(DescriptorError::InvalidLayout {
                id,
                reason: format!(
                    "binding {} is variable-count; use add_variable_descriptor_set_layout",
                    binding.binding
                ),
            });
        }

        let pool = ManagedDescriptorPool::new(
            &mut self.backend,
            LayoutDescription { bindings, flags },
            LayoutKind::Normal,
            &self.config,
        )?;
        let handle = pool.layout();
        self.layouts.insert(id, LayoutEntry::Managed(pool));
        tracing::debug!(%id, "descriptor set layout added");
        Ok(handle)
    }

    /// Register a layout with a single variable-count binding.
    ///
    /// The variable-count flag is forced onto `binding`.
    ///
    /// # Errors
    ///
    /// - [`DescriptorError::DuplicateLayout`] if `id` is taken.
    /// - [`DescriptorError::InvalidLayout`] for a zero upper bound.
    /// - [`DescriptorError::Backend`] if the native layout cannot be created.
    pub fn add_variable_descriptor_set_layout(
        &mut self,
        id: Identification,
        mut binding: DescriptorBinding,
        flags: LayoutCreateFlags,
    ) -> Result<LayoutHandle, DescriptorError> {
        self.ensure_unique(id)?;
        if binding.descriptor_count == 0 {
            return Err(DescriptorError::InvalidLayout {
                id,
                reason: "variable binding needs a non-zero upper bound".to_owned(),
            });
        }
        binding.flags |= BindingFlags::VARIABLE_DESCRIPTOR_COUNT;

        let pool = ManagedDescriptorPool::new(
            &mut self.backend,
            LayoutDescription {
                bindings: vec![binding],
                flags,
            },
            LayoutKind::Variable,
            &self.config,
        )?;
        let handle = pool.layout();
        self.layouts.insert(id, LayoutEntry::Managed(pool));
        tracing::debug!(%id, "variable descriptor set layout added");
        Ok(handle)
    }

    /// Track a layout owned by someone else. It is never destroyed here.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::DuplicateLayout`] if `id` is taken.
    pub fn add_external_descriptor_set_layout(
        &mut self,
        id: Identification,
        layout: LayoutHandle,
    ) -> Result<(), DescriptorError> {
        self.ensure_unique(id)?;
        self.layouts.insert(id, LayoutEntry::External(layout));
        tracing::debug!(%id, ?layout, "external descriptor set layout added");
        Ok(())
    }

    /// Native handle of a registered layout.
    pub fn layout(&self, id: Identification) -> Option<LayoutHandle> {
        self.layouts.get(&id).map(|entry| match entry {
            LayoutEntry::Managed(pool) => pool.layout(),
            LayoutEntry::External(handle) => *handle,
        })
    }

    /// Whether a layout of any kind is registered under `id`.
    pub fn contains_layout(&self, id: Identification) -> bool {
        self.layouts.contains_key(&id)
    }

    /// Number of registered layouts, external ones included.
    pub fn layout_count(&self) -> usize {
        self.layouts.len()
    }

    /// Slab usage of an owned layout. `None` for unknown or external layouts.
    pub fn slab_stats(&self, id: Identification) -> Option<&[Slab]> {
        match self.layouts.get(&id)? {
            LayoutEntry::Managed(pool) => Some(pool.slabs()),
            LayoutEntry::External(_) => None,
        }
    }

    // -- allocation ---------------------------------------------------------

    /// Allocate a set of a fixed-count layout.
    ///
    /// A new slab is created when every existing one is full.
    ///
    /// # Errors
    ///
    /// - [`DescriptorError::UnknownLayout`] / [`DescriptorError::ExternalLayout`]
    ///   if there is no owned layout under `id`.
    /// - [`DescriptorError::WrongLayoutKind`] for a variable layout.
    /// - [`DescriptorError::Backend`] if pool creation or allocation fails.
    pub fn allocate_descriptor_set(
        &mut self,
        id: Identification,
    ) -> Result<DescriptorSetHandle, DescriptorError> {
        let pool = Self::managed_pool(&mut self.layouts, id, LayoutKind::Normal)?;
        let set = pool.allocate(&mut self.backend, 1, None)?;
        self.set_owners.insert(set, id);
        Ok(set)
    }

    /// Allocate a set of a variable layout with `count` descriptors.
    ///
    /// # Errors
    ///
    /// - [`DescriptorError::UnknownLayout`] / [`DescriptorError::ExternalLayout`]
    ///   if there is no owned layout under `id`.
    /// - [`DescriptorError::WrongLayoutKind`] for a fixed-count layout.
    /// - [`DescriptorError::VariableCountTooLarge`] if `count` exceeds the
    ///   binding's upper bound, [`DescriptorError::ZeroCount`] for zero.
    /// - [`DescriptorError::Backend`] if pool creation or allocation fails.
    pub fn allocate_variable_descriptor_set(
        &mut self,
        id: Identification,
        count: u32,
    ) -> Result<DescriptorSetHandle, DescriptorError> {
        let pool = Self::managed_pool(&mut self.layouts, id, LayoutKind::Variable)?;
        let max = pool
            .description()
            .bindings
            .first()
            .map_or(0, |binding| binding.descriptor_count);
        if count > max {
            return Err(DescriptorError::VariableCountTooLarge {
                id,
                requested: count,
                max,
            });
        }
        let set = pool.allocate(&mut self.backend, count, Some(count))?;
        self.set_owners.insert(set, id);
        Ok(set)
    }

    fn managed_pool(
        layouts: &mut HashMap<Identification, LayoutEntry>,
        id: Identification,
        expected: LayoutKind,
    ) -> Result<&mut ManagedDescriptorPool, DescriptorError> {
        match layouts.get_mut(&id) {
            None => Err(DescriptorError::UnknownLayout(id)),
            Some(LayoutEntry::External(_)) => Err(DescriptorError::ExternalLayout(id)),
            Some(LayoutEntry::Managed(pool)) if pool.kind() != expected => {
                Err(DescriptorError::WrongLayoutKind {
                    id,
                    expected,
                    actual: pool.kind(),
                })
            }
            Some(LayoutEntry::Managed(pool)) => Ok(pool),
        }
    }

    /// Return a set. Sets this manager did not allocate (including the null
    /// handle) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Backend`] if the native free fails; the set
    /// stays tracked in that case.
    pub fn free_descriptor_set(&mut self, set: DescriptorSetHandle) -> Result<(), DescriptorError> {
        let Some(&id) = self.set_owners.get(&set) else {
            return Ok(());
        };
        if let Some(LayoutEntry::Managed(pool)) = self.layouts.get_mut(&id) {
            pool.free(&mut self.backend, set)?;
        }
        self.set_owners.remove(&set);
        Ok(())
    }

    // -- removal ------------------------------------------------------------

    /// Remove a layout. Owned layouts are destroyed with all their slabs and
    /// sets; external layouts are only forgotten.
    pub fn remove_descriptor_set_layout(&mut self, id: Identification) -> bool {
        let Some(entry) = self.layouts.remove(&id) else {
            return false;
        };
        self.set_owners.retain(|_, owner| *owner != id);
        if let LayoutEntry::Managed(pool) = entry {
            pool.dispose(&mut self.backend);
        }
        tracing::debug!(%id, "descriptor set layout removed");
        true
    }

    /// Remove every layout.
    pub fn clear(&mut self) {
        self.set_owners.clear();
        for (_, entry) in self.layouts.drain() {
            if let LayoutEntry::Managed(pool) = entry {
                pool.dispose(&mut self.backend);
            }
        }
    }
}

impl<B: DescriptorBackend> Drop for DescriptorSetManager<B> {
    fn drop(&mut self) {
        self.clear();
    }
}
