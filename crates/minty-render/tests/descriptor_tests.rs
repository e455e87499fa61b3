//! Descriptor set manager behaviour against the headless backend.

use minty_registry::identification::Identification;
use minty_render::descriptor::*;
use minty_render::DescriptorError;
use proptest::prelude::*;

const TEXTURE: Identification = Identification::new(1, 1, 1);
const BINDLESS: Identification = Identification::new(1, 1, 2);
const GUI: Identification = Identification::new(1, 1, 3);

fn texture_binding() -> DescriptorBinding {
    DescriptorBinding {
        binding: 0,
        descriptor_type: DescriptorType::CombinedImageSampler,
        descriptor_count: 1,
        stages: ShaderStages::FRAGMENT,
        flags: BindingFlags::empty(),
    }
}

fn manager(sets_per_pool: u32) -> DescriptorSetManager<HeadlessDescriptorBackend> {
    DescriptorSetManager::new(
        HeadlessDescriptorBackend::new(),
        DescriptorPoolConfig {
            sets_per_pool,
            ..Default::default()
        },
    )
}

fn with_layouts(sets_per_pool: u32) -> DescriptorSetManager<HeadlessDescriptorBackend> {
    let mut descriptors = manager(sets_per_pool);
    descriptors
        .add_descriptor_set_layout(TEXTURE, vec![texture_binding()], LayoutCreateFlags::empty())
        .unwrap();
    descriptors
        .add_variable_descriptor_set_layout(
            BINDLESS,
            DescriptorBinding {
                descriptor_count: 1024,
                ..texture_binding()
            },
            LayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
        )
        .unwrap();
    descriptors
}

// -- slab accounting ---------------------------------------------------------

#[test]
fn m_allocations_fit_one_slab_and_the_next_opens_another() {
    let m = 8;
    let mut descriptors = with_layouts(m);
    for _ in 0..m {
        descriptors.allocate_descriptor_set(TEXTURE).unwrap();
    }
    assert_eq!(descriptors.slab_stats(TEXTURE).unwrap().len(), 1);

    descriptors.allocate_descriptor_set(TEXTURE).unwrap();
    assert_eq!(descriptors.slab_stats(TEXTURE).unwrap().len(), 2);
}

#[test]
fn variable_sets_consume_their_descriptor_count() {
    let mut descriptors = with_layouts(100);
    descriptors
        .allocate_variable_descriptor_set(BINDLESS, 60)
        .unwrap();
    descriptors
        .allocate_variable_descriptor_set(BINDLESS, 30)
        .unwrap();
    let slabs = descriptors.slab_stats(BINDLESS).unwrap();
    assert_eq!(slabs.len(), 1);
    assert_eq!(slabs[0].used_sets, 90);

    // 20 more do not fit in the remaining 10.
    descriptors
        .allocate_variable_descriptor_set(BINDLESS, 20)
        .unwrap();
    assert_eq!(descriptors.slab_stats(BINDLESS).unwrap().len(), 2);
}

#[test]
fn large_variable_request_grows_new_slabs() {
    let mut descriptors = with_layouts(10);
    descriptors
        .allocate_variable_descriptor_set(BINDLESS, 50)
        .unwrap();
    let slabs = descriptors.slab_stats(BINDLESS).unwrap();
    assert_eq!(slabs.len(), 1);
    assert_eq!(slabs[0].max_sets, 600);
    let pool = descriptors.backend().pool_description(slabs[0].handle).unwrap();
    assert!(pool.update_after_bind);
}

#[test]
fn variable_flag_is_forced() {
    let descriptors = with_layouts(10);
    let layout = descriptors.layout(BINDLESS).unwrap();
    let description = descriptors.backend().layout_description(layout).unwrap();
    assert!(description.bindings[0]
        .flags
        .contains(BindingFlags::VARIABLE_DESCRIPTOR_COUNT));
}

// -- kind checks -------------------------------------------------------------

#[test]
fn wrong_allocation_method_is_an_error() {
    let mut descriptors = with_layouts(10);
    assert!(matches!(
        descriptors.allocate_variable_descriptor_set(TEXTURE, 4),
        Err(DescriptorError::WrongLayoutKind { .. })
    ));
    assert!(matches!(
        descriptors.allocate_descriptor_set(BINDLESS),
        Err(DescriptorError::WrongLayoutKind { .. })
    ));
}

#[test]
fn variable_count_above_bound_is_rejected() {
    let mut descriptors = with_layouts(10);
    assert!(matches!(
        descriptors.allocate_variable_descriptor_set(BINDLESS, 1025),
        Err(DescriptorError::VariableCountTooLarge { max: 1024, .. })
    ));
}

#[test]
fn duplicate_layout_is_rejected() {
    let mut descriptors = with_layouts(10);
    assert!(matches!(
        descriptors.add_descriptor_set_layout(
            TEXTURE,
            vec![texture_binding()],
            LayoutCreateFlags::empty()
        ),
        Err(DescriptorError::DuplicateLayout(id)) if id == TEXTURE
    ));
    assert!(matches!(
        descriptors.add_external_descriptor_set_layout(BINDLESS, LayoutHandle(99)),
        Err(DescriptorError::DuplicateLayout(_))
    ));
}

#[test]
fn unknown_layout_is_rejected() {
    let mut descriptors = manager(10);
    assert!(matches!(
        descriptors.allocate_descriptor_set(TEXTURE),
        Err(DescriptorError::UnknownLayout(_))
    ));
}

// -- external layouts --------------------------------------------------------

#[test]
fn external_layouts_are_tracked_but_never_destroyed() {
    let mut descriptors = manager(10);
    let foreign = LayoutHandle(0xBEEF);
    descriptors
        .add_external_descriptor_set_layout(GUI, foreign)
        .unwrap();
    assert_eq!(descriptors.layout(GUI), Some(foreign));
    assert!(matches!(
        descriptors.allocate_descriptor_set(GUI),
        Err(DescriptorError::ExternalLayout(_))
    ));

    assert!(descriptors.remove_descriptor_set_layout(GUI));
    assert!(!descriptors.contains_layout(GUI));
    assert_eq!(descriptors.backend().live_layouts(), 0);
}

// -- freeing and removal -----------------------------------------------------

#[test]
fn freeing_null_or_twice_is_harmless() {
    let mut descriptors = with_layouts(10);
    descriptors
        .free_descriptor_set(DescriptorSetHandle::NULL)
        .unwrap();
    let set = descriptors.allocate_descriptor_set(TEXTURE).unwrap();
    descriptors.free_descriptor_set(set).unwrap();
    descriptors.free_descriptor_set(set).unwrap();
    assert_eq!(descriptors.slab_stats(TEXTURE).unwrap()[0].used_sets, 0);
}

#[test]
fn slabs_survive_frees() {
    let mut descriptors = with_layouts(2);
    let sets: Vec<_> = (0..4)
        .map(|_| descriptors.allocate_descriptor_set(TEXTURE).unwrap())
        .collect();
    for set in sets {
        descriptors.free_descriptor_set(set).unwrap();
    }
    assert_eq!(descriptors.slab_stats(TEXTURE).unwrap().len(), 2);
    assert_eq!(descriptors.backend().live_pools(), 2);
}

#[test]
fn remove_and_clear_dispose_owned_resources() {
    let mut descriptors = with_layouts(2);
    descriptors.allocate_descriptor_set(TEXTURE).unwrap();
    descriptors
        .allocate_variable_descriptor_set(BINDLESS, 1)
        .unwrap();
    assert_eq!(descriptors.backend().live_layouts(), 2);

    assert!(descriptors.remove_descriptor_set_layout(TEXTURE));
    assert!(!descriptors.remove_descriptor_set_layout(TEXTURE));
    assert_eq!(descriptors.backend().live_layouts(), 1);

    descriptors.clear();
    assert_eq!(descriptors.layout_count(), 0);
    assert_eq!(descriptors.backend().live_layouts(), 0);
    assert_eq!(descriptors.backend().live_pools(), 0);
}

#[test]
fn backend_failure_propagates() {
    let mut descriptors = with_layouts(2);
    descriptors.backend_mut().refuse_pool_creation(true);
    assert!(matches!(
        descriptors.allocate_descriptor_set(TEXTURE),
        Err(DescriptorError::Backend(_))
    ));
}

// -- properties --------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn used_count_tracks_allocations_minus_frees(k in 1usize..64, free_mask in prop::collection::vec(any::<bool>(), 64)) {
        let mut descriptors = with_layouts(64);
        let sets: Vec<_> = (0..k)
            .map(|_| descriptors.allocate_descriptor_set(TEXTURE).unwrap())
            .collect();
        let mut freed = 0u32;
        for (set, free) in sets.iter().zip(&free_mask) {
            if *free {
                descriptors.free_descriptor_set(*set).unwrap();
                freed += 1;
            }
        }
        let slabs = descriptors.slab_stats(TEXTURE).unwrap();
        prop_assert_eq!(slabs.len(), 1);
        prop_assert_eq!(slabs[0].used_sets, k as u32 - freed);
    }

    #[test]
    fn slab_count_is_minimal_for_unit_sets(m in 1u32..16, n in 1u32..64) {
        let mut descriptors = with_layouts(m);
        for _ in 0..n {
            descriptors.allocate_descriptor_set(TEXTURE).unwrap();
        }
        let expected = n.div_ceil(m) as usize;
        prop_assert_eq!(descriptors.slab_stats(TEXTURE).unwrap().len(), expected);
    }
}
