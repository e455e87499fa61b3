//! Mods driven by the WebAssembly module inside their archive.
//!
//! Every archive ships one compiled module. The manager compiles it into the
//! scope's [`LoadContext`]; a mod without a host-side entry point in the
//! [`ModCatalog`](crate::lifecycle::ModCatalog) is then run as a [`WasmMod`]
//! through the module's exports:
//!
//! - `load() -> ()`, required
//! - `pre_load() -> ()`, `post_load() -> ()`, `unload() -> ()`, optional
//!
//! # Host functions (import module `"minty"`)
//!
//! - `log(level: i32, msg_ptr: i32, msg_len: i32)`
//! - `mod_id() -> i32`
//! - `game_type() -> i32`
//! - `register_object(registry_ptr, registry_len, object_ptr, object_len, phase: i32) -> i32`
//!
//! `register_object` is only accepted while `load` runs. Objects are queued
//! and registered by an object provider once the registries are processed.
//! `phase` is `1` (pre), `2` (main) or `3` (post); the call returns `0` on
//! success and `-1` otherwise. String arguments must live in an exported
//! `memory`.

use std::collections::BTreeMap;

use minty_registry::phase::{GameType, ObjectRegistryPhase};
use wasmtime::{Caller, Linker, Store, Trap, TypedFunc};

use crate::lifecycle::{LoadContext, Mod, ModContext};
use crate::ModError;

/// Import module name of the host functions.
pub const HOST_MODULE: &str = "minty";

/// Export every wasm mod must provide.
pub const REQUIRED_EXPORT: &str = "load";

const HOOK_EXPORTS: [&str; 4] = ["pre_load", "load", "post_load", "unload"];

// ---------------------------------------------------------------------------
// ModHostState
// ---------------------------------------------------------------------------

/// An object a module asked to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedObject {
    pub registry: String,
    pub object: String,
    pub phase: ObjectRegistryPhase,
}

/// State held inside the wasmtime [`Store`] of a [`WasmMod`].
#[derive(Debug, Default)]
pub struct ModHostState {
    mod_id: u16,
    game_type: GameType,
    accepting_objects: bool,
    objects: Vec<QueuedObject>,
    host_calls: u32,
}

impl ModHostState {
    /// Objects queued by `register_object` and not yet handed to the registry.
    pub fn queued_objects(&self) -> &[QueuedObject] {
        &self.objects
    }

    /// Host function calls made since the module was instantiated.
    pub fn host_calls(&self) -> u32 {
        self.host_calls
    }
}

// ---------------------------------------------------------------------------
// WasmMod
// ---------------------------------------------------------------------------

/// A mod whose hooks are exports of its compiled module.
///
/// The instance lives in its own [`Store`]; the module and engine it was
/// created from stay owned by the [`LoadContext`]. Each hook call gets a
/// fresh fuel budget so a runaway module traps instead of hanging the load.
pub struct WasmMod {
    identifier: String,
    store: Store<ModHostState>,
    hooks: BTreeMap<&'static str, TypedFunc<(), ()>>,
    fuel_per_hook: u64,
}

impl std::fmt::Debug for WasmMod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmMod")
            .field("identifier", &self.identifier)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("fuel_per_hook", &self.fuel_per_hook)
            .field("host", self.store.data())
            .finish()
    }
}

impl WasmMod {
    /// Instantiate the module compiled for `identifier` in `context`.
    ///
    /// # Errors
    ///
    /// - [`ModError::MissingEntryPoint`] if `context` has no module for
    ///   `identifier` or the module does not export `load`.
    /// - [`ModError::InvalidModule`] if instantiation fails (e.g. an import
    ///   the host does not provide) or a hook export is not `() -> ()`.
    /// - [`ModError::Runtime`] if the store or linker cannot be set up.
    pub fn new(context: &LoadContext, identifier: &str, fuel_per_hook: u64) -> Result<Self, ModError> {
        let module = context
            .module(identifier)
            .ok_or_else(|| ModError::MissingEntryPoint(identifier.to_owned()))?;
        if module.get_export(REQUIRED_EXPORT).is_none() {
            return Err(ModError::MissingEntryPoint(identifier.to_owned()));
        }

        let mut store = Store::new(context.engine(), ModHostState::default());
        store
            .set_fuel(fuel_per_hook)
            .map_err(|e| ModError::Runtime(format!("failed to set fuel: {e:#}")))?;

        let mut linker = Linker::new(context.engine());
        register_host_api(&mut linker)
            .map_err(|e| ModError::Runtime(format!("failed to register host functions: {e:#}")))?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| ModError::InvalidModule {
                mod_id: identifier.to_owned(),
                reason: format!("{e:#}"),
            })?;

        let mut hooks = BTreeMap::new();
        for name in HOOK_EXPORTS {
            let Some(func) = instance.get_func(&mut store, name) else {
                continue;
            };
            let typed = func
                .typed::<(), ()>(&store)
                .map_err(|e| ModError::InvalidModule {
                    mod_id: identifier.to_owned(),
                    reason: format!("export '{name}' must have type () -> (): {e:#}"),
                })?;
            hooks.insert(name, typed);
        }

        tracing::debug!(
            mod_id = identifier,
            hooks = ?hooks.keys().collect::<Vec<_>>(),
            fuel_per_hook,
            "wasm mod instantiated"
        );

        Ok(Self {
            identifier: identifier.to_owned(),
            store,
            hooks,
            fuel_per_hook,
        })
    }

    /// Whether the module exports `hook`.
    pub fn has_hook(&self, hook: &str) -> bool {
        self.hooks.contains_key(hook)
    }

    /// State shared with the host functions.
    pub fn host_state(&self) -> &ModHostState {
        self.store.data()
    }

    fn enter(&mut self, ctx: &ModContext<'_>) {
        let state = self.store.data_mut();
        state.mod_id = ctx.mod_id();
        state.game_type = ctx.game_type();
    }

    /// Call `hook` if the module exports it, with a fresh fuel budget.
    fn call(&mut self, hook: &'static str) -> Result<(), ModError> {
        let Some(func) = self.hooks.get(hook).cloned() else {
            return Ok(());
        };
        self.store
            .set_fuel(self.fuel_per_hook)
            .map_err(|e| ModError::Runtime(format!("failed to set fuel: {e:#}")))?;

        let result = func.call(&mut self.store, ());
        result.map_err(|error| self.trap_error(hook, error))?;

        if let Ok(remaining) = self.store.get_fuel() {
            tracing::trace!(
                mod_id = %self.identifier,
                hook,
                fuel_consumed = self.fuel_per_hook.saturating_sub(remaining),
                "wasm hook completed"
            );
        }
        Ok(())
    }

    fn trap_error(&self, hook: &'static str, error: wasmtime::Error) -> ModError {
        let out_of_fuel = error
            .chain()
            .any(|cause| cause.downcast_ref::<Trap>() == Some(&Trap::OutOfFuel));
        let reason = if out_of_fuel {
            format!("ran out of fuel (budget: {} units)", self.fuel_per_hook)
        } else {
            format!("{error:#}")
        };
        ModError::ModuleTrap {
            mod_id: self.identifier.clone(),
            export: hook,
            reason,
        }
    }

    /// Hand queued objects to the registry, one provider per registry and
    /// sub-phase.
    fn add_queued_providers(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        let queued = std::mem::take(&mut self.store.data_mut().objects);
        let mut grouped: BTreeMap<(String, ObjectRegistryPhase), Vec<String>> = BTreeMap::new();
        for entry in queued {
            grouped
                .entry((entry.registry, entry.phase))
                .or_default()
                .push(entry.object);
        }

        for ((registry, phase), objects) in grouped {
            tracing::debug!(
                mod_id = %self.identifier,
                registry = %registry,
                %phase,
                count = objects.len(),
                "queued objects handed to registry"
            );
            ctx.registry()
                .add_object_provider(&self.identifier, &registry, phase, move |r| {
                    for object in &objects {
                        r.register(object, None)?;
                    }
                    Ok(())
                })?;
        }
        Ok(())
    }
}

impl Mod for WasmMod {
    fn pre_load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        self.enter(ctx);
        self.call("pre_load")
    }

    fn load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        self.enter(ctx);
        self.store.data_mut().accepting_objects = true;
        let result = self.call("load");
        self.store.data_mut().accepting_objects = false;
        result?;
        self.add_queued_providers(ctx)
    }

    fn post_load(&mut self, ctx: &mut ModContext<'_>) -> Result<(), ModError> {
        self.enter(ctx);
        self.call("post_load")
    }

    fn unload(&mut self) {
        if let Err(err) = self.call("unload") {
            tracing::warn!(mod_id = %self.identifier, error = %err, "wasm unload hook failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Host functions
// ---------------------------------------------------------------------------

fn register_host_api(linker: &mut Linker<ModHostState>) -> Result<(), wasmtime::Error> {
    linker.func_wrap(HOST_MODULE, "log", host_log)?;
    linker.func_wrap(HOST_MODULE, "mod_id", host_mod_id)?;
    linker.func_wrap(HOST_MODULE, "game_type", host_game_type)?;
    linker.func_wrap(HOST_MODULE, "register_object", host_register_object)?;
    Ok(())
}

/// Read a UTF-8 string from the module's exported `memory`.
fn read_wasm_string(caller: &mut Caller<'_, ModHostState>, ptr: i32, len: i32) -> Result<String, String> {
    let memory = caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| "module must export 'memory' to pass strings".to_owned())?;

    let data = memory.data(&caller);
    let range = usize::try_from(ptr)
        .ok()
        .zip(usize::try_from(len).ok())
        .and_then(|(start, len)| Some(start..start.checked_add(len)?))
        .filter(|range| range.end <= data.len())
        .ok_or_else(|| {
            format!(
                "string out of bounds: ptr={ptr}, len={len}, memory_size={}",
                data.len()
            )
        })?;

    String::from_utf8(data[range].to_vec())
        .map_err(|e| format!("string at ptr={ptr} len={len} is not valid UTF-8: {e}"))
}

/// `log(level: i32, msg_ptr: i32, msg_len: i32)`
fn host_log(mut caller: Caller<'_, ModHostState>, level: i32, msg_ptr: i32, msg_len: i32) {
    caller.data_mut().host_calls += 1;
    let mod_id = caller.data().mod_id;

    let msg = match read_wasm_string(&mut caller, msg_ptr, msg_len) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(mod_id, error = %e, "log: failed to read message");
            return;
        }
    };

    match level {
        0 => tracing::trace!(mod_id, source = "wasm", "{msg}"),
        1 => tracing::debug!(mod_id, source = "wasm", "{msg}"),
        2 => tracing::info!(mod_id, source = "wasm", "{msg}"),
        3 => tracing::warn!(mod_id, source = "wasm", "{msg}"),
        4 => tracing::error!(mod_id, source = "wasm", "{msg}"),
        _ => tracing::info!(mod_id, source = "wasm", level, "{msg}"),
    }
}

/// `mod_id() -> i32`
fn host_mod_id(mut caller: Caller<'_, ModHostState>) -> i32 {
    caller.data_mut().host_calls += 1;
    i32::from(caller.data().mod_id)
}

/// `game_type() -> i32`, the [`GameType`] bits.
fn host_game_type(mut caller: Caller<'_, ModHostState>) -> i32 {
    caller.data_mut().host_calls += 1;
    i32::from(caller.data().game_type.bits())
}

/// `register_object(registry_ptr, registry_len, object_ptr, object_len, phase) -> i32`
fn host_register_object(
    mut caller: Caller<'_, ModHostState>,
    registry_ptr: i32,
    registry_len: i32,
    object_ptr: i32,
    object_len: i32,
    phase: i32,
) -> i32 {
    caller.data_mut().host_calls += 1;
    let mod_id = caller.data().mod_id;

    if !caller.data().accepting_objects {
        tracing::warn!(mod_id, "register_object: objects can only be queued during load");
        return -1;
    }
    let phase = match phase {
        1 => ObjectRegistryPhase::Pre,
        2 => ObjectRegistryPhase::Main,
        3 => ObjectRegistryPhase::Post,
        other => {
            tracing::warn!(mod_id, phase = other, "register_object: unknown object phase");
            return -1;
        }
    };
    let strings = read_wasm_string(&mut caller, registry_ptr, registry_len).and_then(|registry| {
        read_wasm_string(&mut caller, object_ptr, object_len).map(|object| (registry, object))
    });
    let (registry, object) = match strings {
        Ok(strings) => strings,
        Err(e) => {
            tracing::warn!(mod_id, error = %e, "register_object: failed to read arguments");
            return -1;
        }
    };

    caller.data_mut().objects.push(QueuedObject {
        registry,
        object,
        phase,
    });
    0
}
