/// `sandbox/runtime.rs` — in-process Lua runtime behind the sandbox bridge
///
/// One worker thread owns every session. Commands arrive over an mpsc
/// channel and each carries its own oneshot reply, so responses can never
/// be matched to the wrong caller. A session owns one restricted VM, the
/// module class definitions of the current track and its live instances.
///
/// Module code runs under an instruction hook: once a request's budget is
/// spent the running chunk errors out, so one looping module cannot stall
/// the other sessions.
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use mlua::{Function, HookTriggers, Lua, Table, Value, VmState};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::{
    error::HostError,
    modules::capability::{validate_imports, ModuleHeader, RUNTIME_CLASSES, SDK_HELPERS},
    types::{now_ts_ms, ModuleData, ModuleRef, Track, MATRIX_METHOD},
};

use super::{
    api::{self, json_to_lua_value, lua_value_to_json, AssetBase},
    bridge::SandboxBridge,
    protocol::{ModuleSources, RpcResponse, SandboxRequest},
    vm,
};

pub const UNKNOWN_SESSION: &str = "UNKNOWN_SESSION";
pub const RUNTIME_STOPPED: &str = "SANDBOX_RUNTIME_STOPPED";
pub const RUNTIME_PANIC: &str = "SANDBOX_RUNTIME_PANIC";
pub const BUDGET_EXCEEDED: &str = "EXECUTION_BUDGET_EXCEEDED";

/// Instructions between two deadline checks.
const HOOK_INSTRUCTION_INTERVAL: u32 = 10_000;

/// Class members that are never reachable through `invokeOnInstance`.
const RESERVED_MEMBERS: &[&str] = &["new", "init", "extend", "destroy", MATRIX_METHOD];

#[derive(Debug, Error)]
enum RuntimeError {
    #[error("LUA_ERROR: {0}")]
    Lua(#[from] mlua::Error),
    #[error("{}: {0}", .0.code())]
    Host(#[from] HostError),
    #[error("{0}")]
    Rejected(String),
}

type RuntimeResult<T> = Result<T, RuntimeError>;

// ── Worker commands ───────────────────────────────────────────────────────────

enum Command {
    Ensure {
        reply: oneshot::Sender<Result<String, String>>,
    },
    Request {
        id: u64,
        token: String,
        request: SandboxRequest,
        reply: oneshot::Sender<RpcResponse>,
    },
    Destroy {
        token: String,
        reply: oneshot::Sender<()>,
    },
}

// ── Bridge handle ─────────────────────────────────────────────────────────────

pub struct LuaSandboxBridge {
    tx: mpsc::UnboundedSender<Command>,
    next_request_id: AtomicU64,
}

impl LuaSandboxBridge {
    /// Start the runtime worker. Each session VM is capped at `memory_limit`
    /// bytes and every request may run module code for at most `budget`.
    pub fn spawn(memory_limit: usize, budget: Duration) -> Result<Arc<Self>, HostError> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("sandbox-runtime".to_string())
            .spawn(move || run_worker(rx, memory_limit, budget))
            .map_err(|e| HostError::Io(format!("failed to start sandbox runtime: {e}")))?;
        log::info!(
            "[sandbox] runtime worker started (memory limit {memory_limit} bytes, budget {budget:?})"
        );
        Ok(Arc::new(Self {
            tx,
            next_request_id: AtomicU64::new(1),
        }))
    }
}

#[async_trait]
impl SandboxBridge for LuaSandboxBridge {
    async fn ensure(&self) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Ensure { reply })
            .map_err(|_| RUNTIME_STOPPED.to_string())?;
        rx.await.map_err(|_| RUNTIME_STOPPED.to_string())?
    }

    async fn request(&self, token: &str, request: SandboxRequest) -> RpcResponse {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Request {
            id,
            token: token.to_string(),
            request,
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return RpcResponse::failure(RUNTIME_STOPPED);
        }
        rx.await
            .unwrap_or_else(|_| RpcResponse::failure(RUNTIME_STOPPED))
    }

    async fn destroy(&self, token: &str) {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Destroy {
            token: token.to_string(),
            reply,
        };
        if self.tx.send(cmd).is_ok() {
            let _ = rx.await;
        }
    }
}

fn run_worker(mut rx: mpsc::UnboundedReceiver<Command>, memory_limit: usize, budget: Duration) {
    let mut sessions: HashMap<String, LuaSession> = HashMap::new();
    let mut counter: u64 = 0;

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Ensure { reply } => {
                counter += 1;
                let token = format!("sbx-{counter}-{}", now_ts_ms());
                let result = match LuaSession::new(memory_limit) {
                    Ok(session) => {
                        sessions.insert(token.clone(), session);
                        log::debug!("[sandbox] session {token} created");
                        Ok(token)
                    }
                    Err(e) => {
                        log::error!("[sandbox] failed to create session: {e}");
                        Err(e.to_string())
                    }
                };
                let _ = reply.send(result);
            }
            Command::Request {
                id,
                token,
                request,
                reply,
            } => {
                let kind = request.kind();
                let outcome = sessions.get_mut(&token).map(|session| {
                    session.arm(budget);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| session.handle(request)));
                    session.disarm();
                    outcome
                });
                let response = match outcome {
                    Some(Ok(response)) => response,
                    Some(Err(_)) => {
                        // The VM may be half-way through a call; drop it.
                        log::error!("[sandbox] #{id} {kind} panicked; dropping session {token}");
                        sessions.remove(&token);
                        RpcResponse::failure(RUNTIME_PANIC)
                    }
                    None => RpcResponse::failure(UNKNOWN_SESSION),
                };
                if !response.ok {
                    log::debug!(
                        "[sandbox] #{id} {kind} on {token} failed: {}",
                        response.error_text()
                    );
                }
                let _ = reply.send(response);
            }
            Command::Destroy { token, reply } => {
                if let Some(mut session) = sessions.remove(&token) {
                    session.arm(budget);
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| session.destroy_instances()));
                    log::debug!("[sandbox] session {token} destroyed");
                }
                let _ = reply.send(());
            }
        }
    }
    log::info!("[sandbox] runtime worker stopped");
}

// ── Session ───────────────────────────────────────────────────────────────────

struct Instance {
    module_type: String,
    class: Table,
    object: Table,
}

struct LuaSession {
    lua: Lua,
    classes: Table,
    sdk: Table,
    assets: AssetBase,
    /// End of the current request's budget; `None` between requests.
    deadline: Arc<Mutex<Option<Instant>>>,
    definitions: HashMap<String, Table>,
    instances: HashMap<String, Instance>,
}

impl LuaSession {
    fn new(memory_limit: usize) -> RuntimeResult<Self> {
        let lua = vm::create_sandboxed_vm(memory_limit)?;
        let classes = vm::load_runtime_classes(&lua)?;
        let assets: AssetBase = Arc::new(Mutex::new(String::new()));
        let sdk = api::build_sdk(&lua, assets.clone())?;

        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
        let watch = Arc::clone(&deadline);
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_INSTRUCTION_INTERVAL),
            move |_lua, _debug| {
                let current = *watch.lock().unwrap();
                match current {
                    Some(d) if Instant::now() >= d => Err(mlua::Error::runtime(BUDGET_EXCEEDED)),
                    _ => Ok(VmState::Continue),
                }
            },
        );

        Ok(Self {
            lua,
            classes,
            sdk,
            assets,
            deadline,
            definitions: HashMap::new(),
            instances: HashMap::new(),
        })
    }

    fn arm(&self, budget: Duration) {
        *self.deadline.lock().unwrap() = Some(Instant::now() + budget);
    }

    fn disarm(&self) {
        *self.deadline.lock().unwrap() = None;
    }

    fn handle(&mut self, request: SandboxRequest) -> RpcResponse {
        let result = match request {
            SandboxRequest::InitTrack {
                track,
                module_sources,
                assets_base_url,
            } => self
                .init_track(&track, &module_sources, assets_base_url)
                .map(|_| Map::new()),
            SandboxRequest::SetMatrixForInstance {
                instance_id,
                track,
                module_sources,
                assets_base_url,
                matrix_options,
            } => self
                .set_matrix(&instance_id, &track, &module_sources, assets_base_url, &matrix_options)
                .map(|_| Map::new()),
            SandboxRequest::InvokeOnInstance {
                instance_id,
                method_name,
                options,
            } => self
                .invoke(&instance_id, &method_name, &options)
                .map(|_| Map::new()),
            SandboxRequest::IntrospectModule {
                module_type,
                source_text,
                user_import_names,
            } => self.introspect(&module_type, &source_text, &user_import_names),
            SandboxRequest::DestroyTrack {} => {
                self.destroy_instances();
                Ok(Map::new())
            }
        };
        match result {
            Ok(data) => RpcResponse::ok_with(data),
            Err(e) => RpcResponse::failure(e.to_string()),
        }
    }

    fn set_assets_base(&self, base: String) {
        *self.assets.lock().unwrap() = base;
    }

    // ── Module evaluation ─────────────────────────────────────────────────

    /// Environment holding the safe base plus the validated imports.
    /// User imports bind to an already-loaded definition or an empty table.
    fn module_environment(&self, imports: &[String]) -> RuntimeResult<Table> {
        let env = vm::base_environment(&self.lua)?;
        for name in imports {
            let value: Value = if RUNTIME_CLASSES.contains(&name.as_str()) {
                self.classes.get(name.as_str())?
            } else if SDK_HELPERS.contains(&name.as_str()) {
                self.sdk.get(name.as_str())?
            } else if let Some(def) = self.definitions.get(name) {
                Value::Table(def.clone())
            } else {
                Value::Table(self.lua.create_table()?)
            };
            env.set(name.as_str(), value)?;
        }
        Ok(env)
    }

    fn evaluate(&self, module_type: &str, text: &str, extra: &[String]) -> RuntimeResult<(ModuleHeader, Table)> {
        let header = ModuleHeader::parse(text);
        let imports = validate_imports(module_type, &header.imports, extra)?;
        let env = self.module_environment(&imports)?;
        let value: Value = self
            .lua
            .load(text)
            .set_name(format!("={module_type}"))
            .set_environment(env)
            .eval()?;
        match value {
            Value::Table(def) => Ok((header, def)),
            _ => Err(RuntimeError::Rejected(format!(
                "MODULE_INVALID: {module_type} did not return a class table"
            ))),
        }
    }

    fn load_definition(&mut self, module_type: &str, sources: &ModuleSources) -> RuntimeResult<Table> {
        if let Some(def) = self.definitions.get(module_type) {
            return Ok(def.clone());
        }
        let text = sources.get(module_type).ok_or_else(|| {
            RuntimeError::Rejected(format!("MODULE_SOURCE_MISSING: {module_type}"))
        })?;
        // Other modules of the same track may be imported by name.
        let extra: Vec<String> = sources
            .keys()
            .filter(|k| k.as_str() != module_type)
            .cloned()
            .collect();
        let (_, def) = self.evaluate(module_type, text, &extra)?;
        self.definitions.insert(module_type.to_string(), def.clone());
        Ok(def)
    }

    // ── Instances ─────────────────────────────────────────────────────────

    fn build_instance(
        &self,
        module: &ModuleRef,
        class: &Table,
        data: Option<&ModuleData>,
        matrix: Option<&JsonValue>,
    ) -> RuntimeResult<Table> {
        let container = self.lua.create_table()?;
        container.set("id", module.id.as_str())?;
        container.set("type", module.module_type.as_str())?;

        let constructor = data.map(|d| d.constructor.as_slice()).unwrap_or_default();
        let matrix = match matrix {
            Some(m) => Some(m.clone()),
            None => constructor
                .iter()
                .filter(|c| c.is_matrix())
                .last()
                .map(|c| JsonValue::Object(c.static_options())),
        };
        if let Some(m) = &matrix {
            container.set("matrix", json_to_lua_value(&self.lua, m)?)?;
        }

        // Remaining constructor methods are replayed by the host once the
        // instance exists.
        let new_fn: Function = class.get("new")?;
        let object: Table = new_fn.call((class.clone(), container))?;
        Ok(object)
    }

    fn init_track(&mut self, track: &Track, sources: &ModuleSources, assets_base_url: String) -> RuntimeResult<()> {
        self.destroy_instances();
        self.definitions.clear();
        self.set_assets_base(assets_base_url);

        for module_type in track.module_types() {
            self.load_definition(&module_type, sources)?;
        }
        // Disabled refs get a hidden instance so re-enabling them needs no rebuild.
        for module in &track.modules {
            let class = self.load_definition(&module.module_type, sources)?;
            let object = self.build_instance(module, &class, track.modules_data.get(&module.id), None)?;
            if module.disabled {
                call_member(&object, "hide")?;
            }
            self.instances.insert(
                module.id.clone(),
                Instance {
                    module_type: module.module_type.clone(),
                    class,
                    object,
                },
            );
        }
        log::debug!(
            "[sandbox] track '{}' initialised with {} instance(s)",
            track.name,
            self.instances.len()
        );
        Ok(())
    }

    fn set_matrix(
        &mut self,
        instance_id: &str,
        track: &Track,
        sources: &ModuleSources,
        assets_base_url: String,
        matrix_options: &JsonValue,
    ) -> RuntimeResult<()> {
        let module = track
            .module_ref(instance_id)
            .ok_or_else(|| RuntimeError::Rejected(format!("INSTANCE_NOT_FOUND: {instance_id}")))?
            .clone();
        self.set_assets_base(assets_base_url);
        let class = self.load_definition(&module.module_type, sources)?;

        if let Some(old) = self.instances.remove(instance_id) {
            destroy_object(&old.object, instance_id);
        }
        let object = self.build_instance(
            &module,
            &class,
            track.modules_data.get(instance_id),
            Some(matrix_options),
        )?;
        self.instances.insert(
            instance_id.to_string(),
            Instance {
                module_type: module.module_type,
                class,
                object,
            },
        );
        Ok(())
    }

    fn invoke(&self, instance_id: &str, method_name: &str, options: &Map<String, JsonValue>) -> RuntimeResult<()> {
        let instance = self
            .instances
            .get(instance_id)
            .ok_or_else(|| RuntimeError::Rejected(format!("INSTANCE_NOT_FOUND: {instance_id}")))?;
        self.call_method(&instance.object, &instance.class, method_name, options)
            .map_err(|e| match e {
                RuntimeError::Rejected(msg) => {
                    RuntimeError::Rejected(format!("{msg} ({} on {instance_id})", instance.module_type))
                }
                other => other,
            })
    }

    /// Calls `object:method(options)` when `method` is declared by the class.
    fn call_method(
        &self,
        object: &Table,
        class: &Table,
        method: &str,
        options: &Map<String, JsonValue>,
    ) -> RuntimeResult<()> {
        if RESERVED_MEMBERS.contains(&method) || !declared_methods(class)?.iter().any(|m| m == method) {
            return Err(RuntimeError::Rejected(format!("METHOD_NOT_FOUND: {method}")));
        }
        let f: Value = object.get(method)?;
        let Value::Function(f) = f else {
            return Err(RuntimeError::Rejected(format!("METHOD_NOT_FOUND: {method}")));
        };
        let opts = json_to_lua_value(&self.lua, &JsonValue::Object(options.clone()))?;
        let _: Value = f.call((object.clone(), opts))?;
        Ok(())
    }

    fn introspect(
        &self,
        module_type: &str,
        source_text: &str,
        user_imports: &[String],
    ) -> RuntimeResult<Map<String, JsonValue>> {
        let (header, def) = self.evaluate(module_type, source_text, user_imports)?;

        let def_name: Option<String> = def.get("name").ok();
        let def_category: Option<String> = def.get("category").ok();
        let methods: Value = def.get("methods")?;

        let mut data = Map::new();
        data.insert(
            "name".to_string(),
            JsonValue::String(
                header
                    .name
                    .or(def_name)
                    .unwrap_or_else(|| module_type.to_string()),
            ),
        );
        data.insert(
            "category".to_string(),
            JsonValue::String(
                header
                    .category
                    .or(def_category)
                    .unwrap_or_else(|| "Uncategorized".to_string()),
            ),
        );
        let methods = match lua_value_to_json(methods) {
            JsonValue::Array(list) => JsonValue::Array(list),
            _ => JsonValue::Array(Vec::new()),
        };
        data.insert("methods".to_string(), methods);
        Ok(data)
    }

    fn destroy_instances(&mut self) {
        for (id, instance) in self.instances.drain() {
            destroy_object(&instance.object, &id);
        }
    }
}

/// Calls `object:member()` when the member is a function.
fn call_member(object: &Table, member: &str) -> mlua::Result<()> {
    let f: Value = object.get(member)?;
    if let Value::Function(f) = f {
        let _: Value = f.call(object.clone())?;
    }
    Ok(())
}

fn destroy_object(object: &Table, instance_id: &str) {
    if let Err(e) = call_member(object, "destroy") {
        log::warn!("[sandbox] destroy {instance_id} failed: {e}");
    }
}

/// Method names listed in the class `methods` table.
fn declared_methods(class: &Table) -> mlua::Result<Vec<String>> {
    let methods: Value = class.get("methods")?;
    let Value::Table(methods) = methods else {
        return Ok(Vec::new());
    };
    let mut names = Vec::new();
    for entry in methods.sequence_values::<Table>() {
        let name: Option<String> = entry?.get("name")?;
        names.extend(name);
    }
    Ok(names)
}
