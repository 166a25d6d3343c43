use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Method name reserved for the structural (grid/layout) update.
pub const MATRIX_METHOD: &str = "matrix";

// ── Track model (mirrors the project config) ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub modules_data: BTreeMap<String, ModuleData>,
    /// channel number (as string) → source trigger key (MIDI note or OSC address)
    #[serde(default)]
    pub channel_mappings: BTreeMap<String, serde_json::Value>,
}

impl Track {
    /// Distinct module types, in first-seen order. Disabled modules count:
    /// they still get a (hidden) instance.
    pub fn module_types(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in &self.modules {
            if !out.contains(&m.module_type) {
                out.push(m.module_type.clone());
            }
        }
        out
    }

    pub fn module_ref(&self, instance_id: &str) -> Option<&ModuleRef> {
        self.modules.iter().find(|m| m.id == instance_id)
    }

    /// Equality used to decide whether a queued reload is worth executing.
    /// `disabled` flags are ignored: toggling a module is handled at dispatch.
    pub fn structurally_eq(&self, other: &Track) -> bool {
        if self.name != other.name
            || self.modules.len() != other.modules.len()
            || self.modules_data != other.modules_data
            || self.channel_mappings != other.channel_mappings
        {
            return false;
        }
        self.modules.iter().zip(other.modules.iter()).all(|(a, b)| {
            a.id == b.id && a.module_type == b.module_type && a.input_source == b.input_source
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRef {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleData {
    #[serde(default)]
    pub constructor: Vec<MethodCall>,
    /// channel number (as string) → methods scheduled for that channel
    #[serde(default)]
    pub methods: BTreeMap<String, Vec<MethodCall>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub name: String,
    #[serde(default)]
    pub options: Vec<MethodOption>,
}

impl MethodCall {
    pub fn is_matrix(&self) -> bool {
        self.name == MATRIX_METHOD
    }

    /// Option name → configured value, without random resolution.
    pub fn static_options(&self) -> serde_json::Map<String, serde_json::Value> {
        self.options
            .iter()
            .map(|o| (o.name.clone(), o.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodOption {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_range: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_values: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub no_repeat: bool,
}

// ── Host events (status broadcast + developer debug channel) ─────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    TrackActivated {
        name: String,
    },
    TrackDeactivated {
        name: String,
    },
    TrackFailed {
        name: String,
        error: String,
    },
    PreviewReady {
        module: String,
        request_id: Option<String>,
    },
    PreviewFailed {
        module: String,
        request_id: Option<String>,
        error: String,
    },
    DebugLog {
        level: String,
        message: String,
        timestamp: i64,
    },
}

pub fn now_ts_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
