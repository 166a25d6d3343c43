/// `modules/introspect.rs` — "what does module X export", memoized per mtime
///
/// Introspection runs on a dedicated sandbox session so it never disturbs
/// the active track. It never fails: problems come back as `ok: false`.
/// Only successful results are cached.
use std::{collections::HashMap, sync::Mutex};

use serde::Serialize;
use serde_json::Value;

use crate::sandbox::client::SandboxClient;

use super::{
    manifest,
    source::{cache_key, insert_pruned, module_mtime, ModuleSourceCache},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectionResult {
    pub module_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub mtime_ms: Option<i64>,
}

impl IntrospectionResult {
    fn failed(module_id: &str, error: impl Into<String>, mtime_ms: Option<i64>) -> Self {
        Self {
            module_id: module_id.to_string(),
            ok: false,
            name: None,
            category: None,
            methods: Vec::new(),
            error: Some(error.into()),
            mtime_ms,
        }
    }
}

pub struct IntrospectionCache {
    client: SandboxClient,
    entries: Mutex<HashMap<String, IntrospectionResult>>,
}

impl IntrospectionCache {
    pub fn new(client: SandboxClient) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn introspect_module(&self, sources: &ModuleSourceCache, module_id: &str) -> IntrospectionResult {
        let mtime = match sources.root() {
            Some(root) => module_mtime(root, module_id).await,
            None => None,
        };
        let key = cache_key(module_id, mtime);
        let cached = self.entries.lock().unwrap().get(&key).cloned();
        if let Some(hit) = cached {
            return hit;
        }

        let source = match sources.get(module_id).await {
            Ok(s) => s,
            Err(e) => return IntrospectionResult::failed(module_id, e.to_string(), mtime),
        };

        let extra = match sources.root() {
            Some(root) => manifest::extra_imports(root, module_id)
                .await
                .unwrap_or_else(|e| {
                    log::warn!("[modules] ignoring import manifest for {module_id}: {e}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let response = self
            .client
            .introspect_module(module_id, source.text.clone(), extra)
            .await;
        if !response.ok {
            log::warn!(
                "[modules] introspection of {module_id} failed: {}",
                response.error_text()
            );
            return IntrospectionResult::failed(module_id, response.error_text(), source.mtime_ms);
        }

        let text_field = |field: &str| {
            response
                .data
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let result = IntrospectionResult {
            module_id: module_id.to_string(),
            ok: true,
            name: text_field("name").or_else(|| Some(module_id.to_string())),
            category: text_field("category"),
            methods: response
                .data
                .get("methods")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            error: None,
            mtime_ms: source.mtime_ms,
        };
        let key = cache_key(module_id, source.mtime_ms);
        insert_pruned(&mut self.entries.lock().unwrap(), module_id, key, result.clone());
        result
    }

    pub fn invalidate(&self, module_id: &str) {
        let prefix = format!("{module_id}:");
        self.entries
            .lock()
            .unwrap()
            .retain(|k, _| !k.starts_with(&prefix));
    }

    /// Tear down the dedicated introspection session.
    pub async fn shutdown(&self) {
        self.client.destroy().await;
    }
}
