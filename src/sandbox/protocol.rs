/// `sandbox/protocol.rs` — request/response shapes crossing the sandbox boundary
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Track;

pub const BRIDGE_UNAVAILABLE: &str = "SANDBOX_BRIDGE_UNAVAILABLE";
pub const SANDBOX_TIMEOUT: &str = "SANDBOX_TIMEOUT";

/// moduleType → source text
pub type ModuleSources = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "props", rename_all = "camelCase")]
pub enum SandboxRequest {
    #[serde(rename_all = "camelCase")]
    InitTrack {
        track: Track,
        module_sources: ModuleSources,
        assets_base_url: String,
    },
    #[serde(rename_all = "camelCase")]
    SetMatrixForInstance {
        instance_id: String,
        track: Track,
        module_sources: ModuleSources,
        assets_base_url: String,
        matrix_options: Value,
    },
    #[serde(rename_all = "camelCase")]
    InvokeOnInstance {
        instance_id: String,
        method_name: String,
        options: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    IntrospectModule {
        module_type: String,
        source_text: String,
        user_import_names: Vec<String>,
    },
    DestroyTrack {},
}

impl SandboxRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxRequest::InitTrack { .. } => "initTrack",
            SandboxRequest::SetMatrixForInstance { .. } => "setMatrixForInstance",
            SandboxRequest::InvokeOnInstance { .. } => "invokeOnInstance",
            SandboxRequest::IntrospectModule { .. } => "introspectModule",
            SandboxRequest::DestroyTrack {} => "destroyTrack",
        }
    }
}

/// `{token, type, props}` as sent to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub token: String,
    #[serde(flatten)]
    pub request: SandboxRequest,
}

/// `{ok, error?, ...payload}`; callers must check `ok` on every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn ok_with(data: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            data,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            data: Map::new(),
        }
    }

    pub fn error_text(&self) -> String {
        self.error.clone().unwrap_or_else(|| "unknown error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_type_and_props() {
        let env = RpcEnvelope {
            token: "t1".to_string(),
            request: SandboxRequest::InvokeOnInstance {
                instance_id: "g1".to_string(),
                method_name: "flash".to_string(),
                options: Map::new(),
            },
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["token"], "t1");
        assert_eq!(v["type"], "invokeOnInstance");
        assert_eq!(v["props"]["instanceId"], "g1");
        assert_eq!(v["props"]["methodName"], "flash");
    }

    #[test]
    fn response_keeps_payload_fields() {
        let r: RpcResponse =
            serde_json::from_str(r#"{ "ok": true, "name": "Grid", "methods": [] }"#).unwrap();
        assert!(r.ok);
        assert_eq!(r.data["name"], "Grid");
        assert!(!RpcResponse::failure("boom").ok);
    }
}
