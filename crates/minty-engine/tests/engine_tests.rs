//! Engine start/load/shutdown with descriptor layouts contributed by mods.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use minty_engine::prelude::*;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn write_archive(dir: &Path, name: &str, manifest: &str) {
    let mut writer = ZipWriter::new(File::create(dir.join(format!("{name}.mcmod"))).unwrap());
    writer
        .start_file("manifest.json", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(manifest.as_bytes()).unwrap();
    writer
        .start_file(format!("{name}.wasm"), SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"(module)").unwrap();
    writer.finish().unwrap();
}

fn mod_directory() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_archive(
        dir.path(),
        "ui",
        r#"{"Identifier": "ui", "Version": "1.0.0", "IsRootMod": true}"#,
    );
    write_archive(
        dir.path(),
        "hud",
        r#"{"Identifier": "hud", "Version": "0.3.0",
            "ModDependencies": [{"Identifier": "ui", "Version": "1.0.0"}]}"#,
    );
    dir
}

fn uniform(binding: u32) -> DescriptorBinding {
    DescriptorBinding {
        binding,
        descriptor_type: DescriptorType::UniformBuffer,
        descriptor_count: 1,
        stages: ShaderStages::ALL_GRAPHICS,
        flags: BindingFlags::empty(),
    }
}

/// Registers one fixed and one variable layout.
struct UiMod;

impl Mod for UiMod {
    fn load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        ctx.registry().add_object_provider(
            "ui",
            DESCRIPTOR_SET_REGISTRY,
            ObjectRegistryPhase::Main,
            |r| {
                let widget = r.register("widget", None)?;
                let atlas = r.register("atlas", None)?;
                if let Some(layouts) =
                    r.registry_mut::<DescriptorSetRegistry<HeadlessDescriptorBackend>>()
                {
                    layouts.add_layout(widget, vec![uniform(0)], LayoutCreateFlags::empty())?;
                    layouts.add_variable_layout(
                        atlas,
                        DescriptorBinding {
                            binding: 0,
                            descriptor_type: DescriptorType::CombinedImageSampler,
                            descriptor_count: 256,
                            stages: ShaderStages::FRAGMENT,
                            flags: BindingFlags::PARTIALLY_BOUND,
                        },
                        LayoutCreateFlags::empty(),
                    )?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}

struct HudMod;

impl Mod for HudMod {
    fn load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        ctx.registry().add_object_provider(
            "hud",
            DESCRIPTOR_SET_REGISTRY,
            ObjectRegistryPhase::Post,
            |r| {
                let overlay = r.register("overlay", None)?;
                if let Some(layouts) =
                    r.registry_mut::<DescriptorSetRegistry<HeadlessDescriptorBackend>>()
                {
                    layouts.add_layout(overlay, vec![uniform(0), uniform(1)], LayoutCreateFlags::empty())?;
                }
                Ok(())
            },
        )?;
        Ok(())
    }
}

fn engine(dir: &Path, game_type: GameType) -> Engine<HeadlessDescriptorBackend> {
    let mut config = EngineConfig::default();
    config.game_type = game_type;
    config.log_filter = "warn".to_owned();
    config.modding.mod_directories = vec![dir.to_path_buf()];
    config.modding.unload_poll_interval_ms = 1;
    let catalog = ModCatalog::new()
        .with("ui", || UiMod)
        .with("hud", || HudMod);
    Engine::new(config, catalog, HeadlessDescriptorBackend::new())
}

fn layout_id(engine: &Engine<HeadlessDescriptorBackend>, key: &str) -> Identification {
    engine.registry().tables().object_id(key).unwrap()
}

#[test]
fn root_mods_contribute_descriptor_layouts() {
    let dir = mod_directory();
    let mut engine = engine(dir.path(), GameType::LOCAL);
    engine.start().unwrap();

    assert_eq!(
        engine.mods().loaded_mods(),
        [(1, ENGINE_MOD_ID), (2, "ui")]
    );
    let sampled = layout_id(&engine, "minty_core:descriptor_set:sampled_texture");
    let widget = layout_id(&engine, "ui:descriptor_set:widget");
    let atlas = layout_id(&engine, "ui:descriptor_set:atlas");
    assert_eq!(sampled, Identification::new(1, 1, 1));
    assert_eq!(widget, Identification::new(2, 1, 1));
    assert_eq!(engine.descriptors().layout_count(), 3);

    let shared = engine.shared_descriptors();
    let mut descriptors = shared.borrow_mut();
    let set = descriptors.allocate_descriptor_set(widget).unwrap();
    let textures = descriptors.allocate_variable_descriptor_set(atlas, 64).unwrap();
    assert!(matches!(
        descriptors.allocate_descriptor_set(atlas),
        Err(DescriptorError::WrongLayoutKind { .. })
    ));
    descriptors.free_descriptor_set(set).unwrap();
    descriptors.free_descriptor_set(textures).unwrap();
}

#[test]
fn game_mod_layouts_leave_with_the_game() {
    let dir = mod_directory();
    let mut engine = engine(dir.path(), GameType::LOCAL);
    engine.start().unwrap();

    engine.load_game(&["hud"]).unwrap();
    let overlay = layout_id(&engine, "hud:descriptor_set:overlay");
    assert!(engine.descriptors().contains_layout(overlay));
    assert_eq!(engine.descriptors().backend().live_layouts(), 4);

    let report = engine.unload_game();
    assert_eq!(report.unloaded, ["hud"]);
    assert!(report.is_clean());
    assert!(!engine.descriptors().contains_layout(overlay));
    assert_eq!(engine.descriptors().layout_count(), 3);
    assert_eq!(engine.descriptors().backend().live_layouts(), 3);
}

#[test]
fn shutdown_releases_every_layout() {
    let dir = mod_directory();
    let mut engine = engine(dir.path(), GameType::LOCAL);
    engine.start().unwrap();
    engine.load_game(&["hud"]).unwrap();

    let report = engine.shutdown();
    assert_eq!(report.unloaded, ["hud", "ui", ENGINE_MOD_ID]);
    assert!(report.is_clean());
    assert_eq!(engine.descriptors().layout_count(), 0);
    assert_eq!(engine.descriptors().backend().live_layouts(), 0);
    assert_eq!(engine.descriptors().backend().live_pools(), 0);
    assert!(engine.mods().loaded_mods().is_empty());
}

#[test]
fn server_has_no_descriptor_registry() {
    let dir = mod_directory();
    let mut engine = engine(dir.path(), GameType::SERVER);
    engine.start().unwrap();

    assert!(engine.mods().is_loaded("ui"));
    assert_eq!(engine.registry().registry_count(), 0);
    assert_eq!(engine.descriptors().layout_count(), 0);
}

#[test]
fn unknown_game_mod() {
    let dir = mod_directory();
    let mut engine = engine(dir.path(), GameType::LOCAL);
    engine.start().unwrap();
    assert!(matches!(
        engine.load_game(&["nope"]),
        Err(EngineError::UnknownMod(id)) if id == "nope"
    ));
}

#[test]
fn engine_from_config_file() {
    let dir = mod_directory();
    let config_path = dir.path().join("engine.json");
    std::fs::write(
        &config_path,
        format!(
            r#"{{ "log_filter": "warn", "modding": {{ "mod_directories": [{:?}] }} }}"#,
            dir.path().display().to_string()
        ),
    )
    .unwrap();

    let catalog = ModCatalog::new().with("ui", || UiMod);
    let mut engine =
        Engine::from_config_file(&config_path, catalog, HeadlessDescriptorBackend::new()).unwrap();
    engine.start().unwrap();
    assert!(engine.mods().is_loaded("ui"));
}
