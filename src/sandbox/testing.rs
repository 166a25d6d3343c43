/// `sandbox/testing.rs` — recording bridge for lifecycle and dispatch tests
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use super::{
    bridge::SandboxBridge,
    protocol::{RpcResponse, SandboxRequest},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub token: String,
    pub kind: &'static str,
    pub detail: String,
}

#[derive(Default)]
pub struct MockBridge {
    next_token: AtomicU64,
    ensure_calls: AtomicU64,
    fail_ensure: AtomicBool,
    calls: Mutex<Vec<Call>>,
    /// "start:<kind>:<detail>" / "end:<kind>:<detail>" in arrival order
    events: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, String>>,
    delays: Mutex<HashMap<&'static str, u64>>,
    init_gate: Mutex<Option<Arc<Semaphore>>>,
    destroyed: Mutex<Vec<String>>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_ensure(&self, fail: bool) {
        self.fail_ensure.store(fail, Ordering::SeqCst);
    }

    /// Make requests whose `<kind>:<detail>` equals `key` fail with `error`.
    pub fn fail_on(&self, key: &str, error: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), error.to_string());
    }

    /// Delay requests of `kind` (or `"ensure"`) by `ms`.
    pub fn delay(&self, kind: &'static str, ms: u64) {
        self.delays.lock().unwrap().insert(kind, ms);
    }

    /// Hold every `initTrack` until a permit is released.
    pub fn gate_init(&self) -> Arc<Semaphore> {
        let sem = Arc::new(Semaphore::new(0));
        *self.init_gate.lock().unwrap() = Some(sem.clone());
        sem
    }

    pub fn ensure_count(&self) -> u64 {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn details_of(&self, kind: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.detail)
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn destroyed_tokens(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
        self.events.lock().unwrap().clear();
    }
}

fn detail(request: &SandboxRequest) -> String {
    match request {
        SandboxRequest::InitTrack { track, .. } => track.name.clone(),
        SandboxRequest::SetMatrixForInstance { instance_id, .. } => instance_id.clone(),
        SandboxRequest::InvokeOnInstance {
            instance_id,
            method_name,
            ..
        } => format!("{instance_id}.{method_name}"),
        SandboxRequest::IntrospectModule { module_type, .. } => module_type.clone(),
        SandboxRequest::DestroyTrack {} => String::new(),
    }
}

#[async_trait]
impl SandboxBridge for MockBridge {
    async fn ensure(&self) -> Result<String, String> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get("ensure").copied();
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if self.fail_ensure.load(Ordering::SeqCst) {
            return Err("host refused".to_string());
        }
        let n = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tok-{n}"))
    }

    async fn request(&self, token: &str, request: SandboxRequest) -> RpcResponse {
        let kind = request.kind();
        let detail = detail(&request);
        let key = format!("{kind}:{detail}");
        self.calls.lock().unwrap().push(Call {
            token: token.to_string(),
            kind,
            detail: detail.clone(),
        });
        self.events.lock().unwrap().push(format!("start:{key}"));

        if kind == "initTrack" {
            let gate = self.init_gate.lock().unwrap().clone();
            if let Some(sem) = gate {
                if let Ok(permit) = sem.acquire().await {
                    permit.forget();
                }
            }
        }
        let delay = self.delays.lock().unwrap().get(kind).copied();
        if let Some(ms) = delay {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        self.events.lock().unwrap().push(format!("end:{key}"));
        let failure = self.failures.lock().unwrap().get(&key).cloned();
        if let Some(error) = failure {
            return RpcResponse::failure(error);
        }
        if let SandboxRequest::IntrospectModule { module_type, .. } = request {
            let mut data = Map::new();
            data.insert("name".to_string(), Value::String(module_type));
            data.insert("category".to_string(), Value::String("Test".to_string()));
            data.insert("methods".to_string(), Value::Array(Vec::new()));
            return RpcResponse::ok_with(data);
        }
        RpcResponse::ok()
    }

    async fn destroy(&self, token: &str) {
        self.destroyed.lock().unwrap().push(token.to_string());
    }
}
