use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{error::HostError, types::Track};

pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RECONCILE_DEBOUNCE_MS: u64 = 150;
pub const DEFAULT_WORKSPACE_SETTLE_MS: u64 = 250;
pub const DEFAULT_SANDBOX_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    /// Project folder; module sources live under `<root>/modules/`.
    pub workspace_root: Option<PathBuf>,
    /// JSON file holding the track set (`[Track, ...]`).
    pub tracks_file: Option<PathBuf>,
    pub rpc_timeout_ms: u64,
    pub reconcile_debounce_ms: u64,
    pub workspace_settle_ms: u64,
    pub sandbox_memory_limit: usize,
    /// Track selected once the host is up.
    pub initial_track: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tracks_file: None,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            reconcile_debounce_ms: DEFAULT_RECONCILE_DEBOUNCE_MS,
            workspace_settle_ms: DEFAULT_WORKSPACE_SETTLE_MS,
            sandbox_memory_limit: DEFAULT_SANDBOX_MEMORY_LIMIT,
            initial_track: None,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
        let mut config: HostConfig = serde_json::from_str(&text)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;

        // Relative paths are resolved against the config file's folder.
        if let Some(base) = path.parent() {
            config.workspace_root = config.workspace_root.map(|p| resolve(base, p));
            config.tracks_file = config.tracks_file.map(|p| resolve(base, p));
        }
        Ok(config)
    }

    pub fn load_tracks(&self) -> Result<Vec<Track>, HostError> {
        let Some(path) = &self.tracks_file else {
            return Ok(Vec::new());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))
    }
}

fn resolve(base: &Path, p: PathBuf) -> PathBuf {
    if p.is_relative() {
        base.join(p)
    } else {
        p
    }
}
