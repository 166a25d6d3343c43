/// `modules/source.rs` — module source loading, keyed by modification time
///
/// Workspace modules live at `<root>/modules/<id>.lua`. Bundled modules are
/// served when no workspace file exists; their cache key uses `na` as mtime.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::UNIX_EPOCH,
};

use serde::Serialize;

use crate::error::{HostError, HostResult};

use super::builtin;

pub const MODULE_EXTENSION: &str = "lua";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSource {
    pub module_id: String,
    pub text: String,
    pub mtime_ms: Option<i64>,
}

/// Bare identifier: a letter followed by letters/digits.
pub fn is_valid_module_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// `"<moduleId>:<mtimeMs|na>"`
pub fn cache_key(module_id: &str, mtime_ms: Option<i64>) -> String {
    match mtime_ms {
        Some(ms) => format!("{module_id}:{ms}"),
        None => format!("{module_id}:na"),
    }
}

/// Insert `value` under `key`, evicting every other entry for the same module id.
pub fn insert_pruned<V>(map: &mut HashMap<String, V>, module_id: &str, key: String, value: V) {
    let prefix = format!("{module_id}:");
    map.retain(|k, _| k == &key || !k.starts_with(&prefix));
    map.insert(key, value);
}

pub fn module_path(root: &Path, module_id: &str) -> PathBuf {
    root.join("modules")
        .join(format!("{module_id}.{MODULE_EXTENSION}"))
}

/// Modification time of a workspace module file, `None` when it does not exist.
pub async fn module_mtime(root: &Path, module_id: &str) -> Option<i64> {
    let meta = tokio::fs::metadata(module_path(root, module_id)).await.ok()?;
    let modified = meta.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}

pub struct ModuleSourceCache {
    root: Option<PathBuf>,
    entries: Mutex<HashMap<String, Arc<ModuleSource>>>,
}

impl ModuleSourceCache {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub async fn get(&self, module_id: &str) -> HostResult<Arc<ModuleSource>> {
        if !is_valid_module_id(module_id) {
            return Err(HostError::module_load(module_id, "invalid module id"));
        }

        let workspace = match &self.root {
            Some(root) => module_mtime(root, module_id).await.map(|m| (root, m)),
            None => None,
        };

        let Some((root, mtime)) = workspace else {
            return self.get_builtin(module_id);
        };

        let key = cache_key(module_id, Some(mtime));
        let cached = self.entries.lock().unwrap().get(&key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let path = module_path(root, module_id);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| HostError::module_load(module_id, format!("{}: {e}", path.display())))?;

        let record = Arc::new(ModuleSource {
            module_id: module_id.to_string(),
            text,
            mtime_ms: Some(mtime),
        });
        insert_pruned(
            &mut self.entries.lock().unwrap(),
            module_id,
            key,
            Arc::clone(&record),
        );
        log::debug!("[modules] loaded {module_id} (mtime {mtime})");
        Ok(record)
    }

    fn get_builtin(&self, module_id: &str) -> HostResult<Arc<ModuleSource>> {
        let key = cache_key(module_id, None);
        if let Some(hit) = self.entries.lock().unwrap().get(&key) {
            return Ok(Arc::clone(hit));
        }
        let text = builtin::source(module_id)
            .ok_or_else(|| HostError::module_load(module_id, "module source not found"))?;
        let record = Arc::new(ModuleSource {
            module_id: module_id.to_string(),
            text: text.to_string(),
            mtime_ms: None,
        });
        let mut entries = self.entries.lock().unwrap();
        insert_pruned(&mut entries, module_id, key, Arc::clone(&record));
        Ok(record)
    }

    /// Drop every cached version of `module_id`.
    pub fn invalidate(&self, module_id: &str) {
        let prefix = format!("{module_id}:");
        self.entries
            .lock()
            .unwrap()
            .retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}
