/// `modules/manifest.rs` — user-declared extra import names
///
/// `<root>/modules/imports.json`: `{ "<moduleId>": ["Palette", ...] }`.
/// Names must be bare identifiers; anything else invalidates the entry.
use std::{collections::HashMap, path::Path};

use crate::error::{HostError, HostResult};

use super::source::is_valid_module_id;

pub const MANIFEST_FILE: &str = "imports.json";

pub async fn extra_imports(root: &Path, module_id: &str) -> HostResult<Vec<String>> {
    let path = root.join("modules").join(MANIFEST_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let manifest: HashMap<String, Vec<String>> = serde_json::from_str(&text)
        .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
    let names = manifest.get(module_id).cloned().unwrap_or_default();
    if let Some(bad) = names.iter().find(|n| !is_valid_module_id(n)) {
        return Err(HostError::Config(format!(
            "invalid import name '{bad}' declared for {module_id}"
        )));
    }
    Ok(names)
}
