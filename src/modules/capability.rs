/// `modules/capability.rs` — declared-import gate for module sources
///
/// A module declares its dependency surface in its header:
///
/// ```text
/// -- @module name: Grid
/// -- @module category: 2D
/// -- @module imports: ModuleBase, log, clamp
/// ```
///
/// Only declared, allowed names are bound in the module's environment.
use crate::error::{HostError, HostResult};

const HEADER_TAG: &str = "@module";

/// Runtime classes a module may extend.
pub const RUNTIME_CLASSES: &[&str] = &["ModuleBase", "BaseSceneModule"];

/// SDK helpers exposed by the runtime.
pub const SDK_HELPERS: &[&str] = &[
    "assetUrl", "log", "random", "randomInt", "clamp", "lerp", "json",
];

pub fn is_allowed(name: &str, extra: &[String]) -> bool {
    RUNTIME_CLASSES.contains(&name) || SDK_HELPERS.contains(&name) || extra.iter().any(|e| e == name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleHeader {
    pub name: Option<String>,
    pub category: Option<String>,
    pub imports: Vec<String>,
}

impl ModuleHeader {
    /// Reads `-- @module key: value` lines from the leading comment block.
    pub fn parse(text: &str) -> Self {
        let mut header = ModuleHeader::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(comment) = line.strip_prefix("--") else {
                break;
            };
            let Some(rest) = comment.trim().strip_prefix(HEADER_TAG) else {
                continue;
            };
            let Some((key, value)) = rest.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" if !value.is_empty() => header.name = Some(value.to_string()),
                "category" if !value.is_empty() => header.category = Some(value.to_string()),
                "imports" => header.imports.extend(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                _ => {}
            }
        }
        header
    }
}

/// Validates declared imports; returns them deduplicated in declaration order.
pub fn validate_imports(module_id: &str, imports: &[String], extra: &[String]) -> HostResult<Vec<String>> {
    if imports.is_empty() {
        return Err(HostError::CapabilityViolation {
            module_id: module_id.to_string(),
            reason: "module declares no imports".to_string(),
        });
    }
    let mut out: Vec<String> = Vec::with_capacity(imports.len());
    for name in imports {
        if !is_allowed(name, extra) {
            return Err(HostError::CapabilityViolation {
                module_id: module_id.to_string(),
                reason: format!("import '{name}' is not allowed"),
            });
        }
        if !out.contains(name) {
            out.push(name.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_header_until_code() {
        let h = ModuleHeader::parse(
            "-- @module name: Grid\n-- @module category: 2D\n-- @module imports: ModuleBase, log\n\nlocal x = 1\n-- @module imports: json\n",
        );
        assert_eq!(h.name.as_deref(), Some("Grid"));
        assert_eq!(h.category.as_deref(), Some("2D"));
        assert_eq!(h.imports, vec!["ModuleBase".to_string(), "log".to_string()]);
    }

    #[test]
    fn zero_imports_is_a_violation() {
        let err = validate_imports("Grid", &[], &[]).unwrap_err();
        assert_eq!(err.code(), "CAPABILITY_VIOLATION");
    }

    #[test]
    fn unknown_import_names_the_offender() {
        let imports = vec!["ModuleBase".to_string(), "os".to_string()];
        match validate_imports("Grid", &imports, &[]) {
            Err(HostError::CapabilityViolation { reason, .. }) => assert!(reason.contains("'os'")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn extra_allow_list_extends_the_fixed_one() {
        let imports = vec!["ModuleBase".to_string(), "Palette".to_string()];
        assert!(validate_imports("Grid", &imports, &[]).is_err());
        let ok = validate_imports("Grid", &imports, &["Palette".to_string()]).unwrap();
        assert_eq!(ok.len(), 2);
    }
}
