/// `sandbox/client.rs` — one isolated-runtime session and typed requests on it
///
/// Session state machine: `NoSession -> Establishing -> Ready -> Disposed`.
/// `Disposed` is terminal: a disposed client never recreates a session.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{Map, Value};

use crate::{
    error::{HostError, HostResult},
    types::Track,
};

use super::{
    bridge::SandboxBridge,
    protocol::{ModuleSources, RpcResponse, SandboxRequest, BRIDGE_UNAVAILABLE, SANDBOX_TIMEOUT},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    Establishing,
    Ready(String),
    Disposed,
}

pub struct SandboxClient {
    bridge: Option<Arc<dyn SandboxBridge>>,
    phase: Mutex<SessionPhase>,
    /// Held while a session is being established so concurrent callers share it.
    establish: tokio::sync::Mutex<()>,
    timeout: Duration,
}

impl SandboxClient {
    pub fn new(bridge: Option<Arc<dyn SandboxBridge>>, timeout: Duration) -> Self {
        Self {
            bridge,
            phase: Mutex::new(SessionPhase::NoSession),
            establish: tokio::sync::Mutex::new(()),
            timeout,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.lock().unwrap().clone()
    }

    pub fn token(&self) -> Option<String> {
        match &*self.phase.lock().unwrap() {
            SessionPhase::Ready(token) => Some(token.clone()),
            _ => None,
        }
    }

    /// Settled outcome for the current phase, `None` if a session must be created.
    fn settled(&self) -> Option<HostResult<String>> {
        match &*self.phase.lock().unwrap() {
            SessionPhase::Ready(token) => Some(Ok(token.clone())),
            SessionPhase::Disposed => Some(Err(HostError::SandboxDisposed)),
            _ => None,
        }
    }

    pub async fn ensure_session(&self) -> HostResult<String> {
        if let Some(result) = self.settled() {
            return result;
        }
        let Some(bridge) = self.bridge.clone() else {
            return Err(HostError::SandboxUnavailable);
        };

        let _gate = self.establish.lock().await;
        if let Some(result) = self.settled() {
            return result;
        }
        *self.phase.lock().unwrap() = SessionPhase::Establishing;

        let token = match tokio::time::timeout(self.timeout, bridge.ensure()).await {
            Ok(Ok(token)) if !token.is_empty() => token,
            Ok(Ok(_)) => return Err(self.establish_failed("empty session token".to_string())),
            Ok(Err(e)) => return Err(self.establish_failed(e)),
            Err(_) => return Err(self.establish_failed("timed out".to_string())),
        };

        let disposed_meanwhile = {
            let mut phase = self.phase.lock().unwrap();
            if *phase == SessionPhase::Disposed {
                true
            } else {
                *phase = SessionPhase::Ready(token.clone());
                false
            }
        };
        if disposed_meanwhile {
            log::debug!("[sandbox] session {token} established after dispose; tearing down");
            bridge.destroy(&token).await;
            return Err(HostError::SandboxDisposed);
        }
        log::debug!("[sandbox] session ready: {token}");
        Ok(token)
    }

    fn establish_failed(&self, reason: String) -> HostError {
        let mut phase = self.phase.lock().unwrap();
        if *phase == SessionPhase::Disposed {
            return HostError::SandboxDisposed;
        }
        *phase = SessionPhase::NoSession;
        log::warn!("[sandbox] ensure failed: {reason}");
        HostError::SandboxEnsureFailed(reason)
    }

    /// Forward one request; failures come back as `{ok:false, error}`.
    pub async fn request(&self, request: SandboxRequest) -> RpcResponse {
        let Some(bridge) = self.bridge.clone() else {
            return RpcResponse::failure(BRIDGE_UNAVAILABLE);
        };
        let token = match self.ensure_session().await {
            Ok(token) => token,
            Err(e) => return RpcResponse::failure(e.code()),
        };
        let kind = request.kind();
        match tokio::time::timeout(self.timeout, bridge.request(&token, request)).await {
            Ok(response) => response,
            Err(_) => {
                log::warn!("[sandbox] {kind} timed out after {:?}", self.timeout);
                RpcResponse::failure(SANDBOX_TIMEOUT)
            }
        }
    }

    pub async fn init_track(
        &self,
        track: Track,
        module_sources: ModuleSources,
        assets_base_url: String,
    ) -> RpcResponse {
        self.request(SandboxRequest::InitTrack {
            track,
            module_sources,
            assets_base_url,
        })
        .await
    }

    pub async fn set_matrix_for_instance(
        &self,
        instance_id: &str,
        track: Track,
        module_sources: ModuleSources,
        assets_base_url: String,
        matrix_options: Value,
    ) -> RpcResponse {
        self.request(SandboxRequest::SetMatrixForInstance {
            instance_id: instance_id.to_string(),
            track,
            module_sources,
            assets_base_url,
            matrix_options,
        })
        .await
    }

    pub async fn invoke_on_instance(
        &self,
        instance_id: &str,
        method_name: &str,
        options: Map<String, Value>,
    ) -> RpcResponse {
        self.request(SandboxRequest::InvokeOnInstance {
            instance_id: instance_id.to_string(),
            method_name: method_name.to_string(),
            options,
        })
        .await
    }

    pub async fn introspect_module(
        &self,
        module_type: &str,
        source_text: String,
        user_import_names: Vec<String>,
    ) -> RpcResponse {
        self.request(SandboxRequest::IntrospectModule {
            module_type: module_type.to_string(),
            source_text,
            user_import_names,
        })
        .await
    }

    pub async fn destroy_track(&self) -> RpcResponse {
        self.request(SandboxRequest::DestroyTrack {}).await
    }

    /// Mark disposed and tear the session down. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock().unwrap(), SessionPhase::Disposed);
        let SessionPhase::Ready(token) = previous else {
            return;
        };
        let Some(bridge) = self.bridge.clone() else {
            return;
        };
        match tokio::time::timeout(self.timeout, bridge.request(&token, SandboxRequest::DestroyTrack {}))
            .await
        {
            Ok(r) if !r.ok => log::debug!("[sandbox] destroyTrack on {token}: {}", r.error_text()),
            Err(_) => log::debug!("[sandbox] destroyTrack on {token} timed out"),
            _ => {}
        }
        bridge.destroy(&token).await;
        log::debug!("[sandbox] session destroyed: {token}");
    }
}

/// Capability-scoped asset base for one session.
pub fn assets_base_url(token: &str) -> String {
    format!("nw-assets://app/{}/", urlencoding::encode(token))
}
