//! The built-in engine mod and the registries it owns.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use minty_modding::lifecycle::{Mod, ModContext, ENGINE_MOD_ID};
use minty_modding::ModError;
use minty_registry::identification::Identification;
use minty_registry::phase::{GameType, ObjectRegistryPhase};
use minty_registry::registry::Registry;
use minty_registry::RegistryError;
use minty_render::descriptor::{
    BindingFlags, DescriptorBackend, DescriptorBinding, DescriptorSetManager, DescriptorType,
    LayoutCreateFlags, LayoutHandle, ShaderStages,
};
use minty_render::DescriptorError;

/// String id of the descriptor set layout registry.
pub const DESCRIPTOR_SET_REGISTRY: &str = "descriptor_set";

/// Descriptor set manager shared between the engine and its registry.
pub type SharedDescriptors<B> = Rc<RefCell<DescriptorSetManager<B>>>;

// ---------------------------------------------------------------------------
// DescriptorSetRegistry
// ---------------------------------------------------------------------------

/// Registry for descriptor set layouts.
///
/// Object providers register an id and then hand the layout to this
/// registry; unregistering the object removes the layout from the
/// [`DescriptorSetManager`] again.
pub struct DescriptorSetRegistry<B: DescriptorBackend + 'static> {
    descriptors: SharedDescriptors<B>,
    layouts: BTreeSet<Identification>,
}

impl<B: DescriptorBackend + 'static> DescriptorSetRegistry<B> {
    /// An empty registry writing into `descriptors`.
    pub fn new(descriptors: SharedDescriptors<B>) -> Self {
        Self {
            descriptors,
            layouts: BTreeSet::new(),
        }
    }

    /// Layouts registered through this registry.
    pub fn layouts(&self) -> impl Iterator<Item = Identification> + '_ {
        self.layouts.iter().copied()
    }

    /// Add a fixed-count layout for the object `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ProviderFailed`] wrapping the
    /// [`DescriptorError`], which aborts registry processing.
    pub fn add_layout(
        &mut self,
        id: Identification,
        bindings: Vec<DescriptorBinding>,
        flags: LayoutCreateFlags,
    ) -> Result<LayoutHandle, RegistryError> {
        let handle = self
            .descriptors
            .borrow_mut()
            .add_descriptor_set_layout(id, bindings, flags)
            .map_err(provider_error)?;
        self.layouts.insert(id);
        Ok(handle)
    }

    /// Add a variable-count layout for the object `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ProviderFailed`] like
    /// [`add_layout`](Self::add_layout).
    pub fn add_variable_layout(
        &mut self,
        id: Identification,
        binding: DescriptorBinding,
        flags: LayoutCreateFlags,
    ) -> Result<LayoutHandle, RegistryError> {
        let handle = self
            .descriptors
            .borrow_mut()
            .add_variable_descriptor_set_layout(id, binding, flags)
            .map_err(provider_error)?;
        self.layouts.insert(id);
        Ok(handle)
    }

    /// Track a layout created outside the manager for the object `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ProviderFailed`] if `id` already has a layout.
    pub fn add_external_layout(
        &mut self,
        id: Identification,
        layout: LayoutHandle,
    ) -> Result<(), RegistryError> {
        self.descriptors
            .borrow_mut()
            .add_external_descriptor_set_layout(id, layout)
            .map_err(provider_error)?;
        self.layouts.insert(id);
        Ok(())
    }
}

fn provider_error(err: DescriptorError) -> RegistryError {
    RegistryError::ProviderFailed {
        registry: DESCRIPTOR_SET_REGISTRY.to_owned(),
        reason: err.to_string(),
    }
}

impl<B: DescriptorBackend + 'static> Registry for DescriptorSetRegistry<B> {
    fn unregister(&mut self, id: Identification) {
        if self.layouts.remove(&id) {
            self.descriptors.borrow_mut().remove_descriptor_set_layout(id);
        }
    }

    fn clear(&mut self) {
        let mut descriptors = self.descriptors.borrow_mut();
        for id in std::mem::take(&mut self.layouts) {
            descriptors.remove_descriptor_set_layout(id);
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// CoreMod
// ---------------------------------------------------------------------------

/// The `minty_core` mod. Always the first mod loaded.
///
/// It owns the engine-level registries and registers the engine's own
/// objects (the `sampled_texture` layout used for material textures).
pub struct CoreMod<B: DescriptorBackend + 'static> {
    descriptors: SharedDescriptors<B>,
}

impl<B: DescriptorBackend + 'static> CoreMod<B> {
    /// The engine mod, registering layouts into `descriptors`.
    pub fn new(descriptors: SharedDescriptors<B>) -> Self {
        Self { descriptors }
    }
}

impl<B: DescriptorBackend + 'static> Mod for CoreMod<B> {
    fn load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        let mod_id = ctx.mod_id();
        let descriptors = Rc::clone(&self.descriptors);
        let registry = ctx.registry();

        let added = registry.add_registry(
            mod_id,
            DESCRIPTOR_SET_REGISTRY,
            None,
            GameType::CLIENT,
            move || DescriptorSetRegistry::new(descriptors),
        )?;
        if added.is_none() {
            return Ok(());
        }

        registry.add_object_provider(
            ENGINE_MOD_ID,
            DESCRIPTOR_SET_REGISTRY,
            ObjectRegistryPhase::Main,
            |registrar| {
                let id = registrar.register("sampled_texture", None)?;
                if let Some(layouts) = registrar.registry_mut::<DescriptorSetRegistry<B>>() {
                    layouts.add_layout(
                        id,
                        vec![DescriptorBinding {
                            binding: 0,
                            descriptor_type: DescriptorType::CombinedImageSampler,
                            descriptor_count: 1,
                            stages: ShaderStages::FRAGMENT,
                            flags: BindingFlags::empty(),
                        }],
                        LayoutCreateFlags::empty(),
                    )?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    fn unload(&mut self) {
        tracing::debug!(
            layouts = self.descriptors.borrow().layout_count(),
            "core mod unloaded"
        );
    }
}
