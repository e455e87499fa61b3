//! End-to-end registration scenarios: phases, file-backed objects and
//! id table replication between two managers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use minty_registry::prelude::*;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

// -- warning capture ---------------------------------------------------------

struct WarnCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Run `f` and return its result together with the number of warnings it logged.
fn count_warnings<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let counter = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&counter)));
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, counter.load(Ordering::SeqCst))
}

// -- scenarios ---------------------------------------------------------------

#[test]
fn core_blocks_scenario() {
    let mut registry = RegistryManager::new();

    registry.set_phase(RegistryPhase::Mods).unwrap();
    let core = registry.register_mod_id("core").unwrap();
    assert_eq!(core, 1);
    registry.set_resource_source(
        core,
        Arc::new(StaticResources::new(["resources/blocks/dirt.png"])),
    );

    registry.set_phase(RegistryPhase::Categories).unwrap();
    let blocks = registry
        .register_category_id(core, "blocks", Some("blocks"))
        .unwrap();
    assert_eq!(blocks, 1);

    registry.set_phase(RegistryPhase::Objects).unwrap();
    let stone = registry
        .register_object_id(core, blocks, "stone", None)
        .unwrap();
    assert_eq!(stone, Identification::new(1, 1, 1));

    let (dirt, warnings) =
        count_warnings(|| registry.register_object_id(core, blocks, "dirt_tex", Some("dirt.png")));
    assert!(dirt.unwrap().is_valid());
    assert_eq!(warnings, 0, "present file must not warn");

    let (missing, warnings) = count_warnings(|| {
        registry.register_object_id(core, blocks, "missing_tex", Some("absent.png"))
    });
    let missing = missing.unwrap();
    assert!(missing.is_valid());
    assert_eq!(warnings, 1, "absent file must warn exactly once");
    assert_eq!(
        registry.tables().object_file(missing),
        Some("resources/blocks/absent.png")
    );
}

#[test]
fn repeated_object_registration_returns_same_id() {
    let mut registry = RegistryManager::new();
    registry.set_phase(RegistryPhase::Mods).unwrap();
    let core = registry.register_mod_id("core").unwrap();
    registry.set_phase(RegistryPhase::Categories).unwrap();
    let blocks = registry.register_category_id(core, "blocks", None).unwrap();
    registry.set_phase(RegistryPhase::Objects).unwrap();

    let first = registry.register_object_id(core, blocks, "stone", None).unwrap();
    let second = registry.register_object_id(core, blocks, "stone", None).unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.tables().object_count(), 1);
}

#[test]
fn client_adopts_server_ids() {
    // Server registers in one order...
    let mut server = RegistryManager::new();
    server.set_phase(RegistryPhase::Mods).unwrap();
    let server_core = server.register_mod_id("core").unwrap();
    server.register_mod_id("extra").unwrap();
    server.set_phase(RegistryPhase::Categories).unwrap();
    server.register_category_id(server_core, "blocks", None).unwrap();
    server.set_phase(RegistryPhase::Objects).unwrap();
    let extra = server.tables().mod_id("extra").unwrap();
    let blocks = server.tables().category_id("blocks").unwrap();
    server.register_object_id(extra, blocks, "ore", None).unwrap();

    // ...the client receives the tables before registering in another order.
    let mut client = RegistryManager::new();
    client.set_mod_ids(&server.mod_ids());
    client.set_category_ids(&server.category_ids());
    client.set_object_ids(&server.object_ids());

    client.set_phase(RegistryPhase::Mods).unwrap();
    assert_eq!(client.register_mod_id("extra").unwrap(), extra);
    let client_core = client.register_mod_id("core").unwrap();
    client.set_phase(RegistryPhase::Categories).unwrap();
    assert_eq!(
        client.register_category_id(client_core, "blocks", None).unwrap(),
        blocks
    );
    client.set_phase(RegistryPhase::Objects).unwrap();
    let ore = client.register_object_id(extra, blocks, "ore", None).unwrap();

    assert_eq!(Some(ore), server.tables().object_id("extra:blocks:ore"));
    assert_eq!(client.mod_ids(), server.mod_ids());
    assert_eq!(client.object_ids(), server.object_ids());
}

#[test]
fn clear_keeps_other_mods() {
    let mut registry = RegistryManager::new();
    registry.set_phase(RegistryPhase::Mods).unwrap();
    let core = registry.register_mod_id("core").unwrap();
    let extra = registry.register_mod_id("extra").unwrap();
    registry.set_phase(RegistryPhase::Categories).unwrap();
    let blocks = registry.register_category_id(core, "blocks", None).unwrap();
    registry.set_phase(RegistryPhase::Objects).unwrap();
    let stone = registry.register_object_id(core, blocks, "stone", None).unwrap();
    registry.register_object_id(extra, blocks, "ore", None).unwrap();

    registry.clear(&HashSet::from([extra]));

    assert_eq!(registry.tables().mod_id("extra"), None);
    assert_eq!(registry.tables().mod_id("core"), Some(core));
    // Categories owned by a surviving mod stay registered.
    assert_eq!(registry.tables().category_id("blocks"), Some(blocks));
    assert_eq!(registry.tables().objects_in_category(blocks), vec![stone]);
    assert_eq!(registry.phase(), RegistryPhase::None);
}

#[test]
fn clear_drops_categories_of_removed_owner() {
    let mut registry = RegistryManager::new();
    registry.set_phase(RegistryPhase::Mods).unwrap();
    let core = registry.register_mod_id("core").unwrap();
    registry.set_phase(RegistryPhase::Categories).unwrap();
    registry.register_category_id(core, "blocks", Some("blocks")).unwrap();

    registry.clear(&HashSet::from([core]));

    assert!(registry.category_ids().is_empty());
    assert!(registry.mod_ids().is_empty());
}

#[test]
fn reset_empties_everything() {
    let mut registry = RegistryManager::new();
    registry.set_phase(RegistryPhase::Mods).unwrap();
    registry.register_mod_id("core").unwrap();
    registry.reset();
    assert!(registry.mod_ids().is_empty());
    assert_eq!(registry.phase(), RegistryPhase::None);
}
