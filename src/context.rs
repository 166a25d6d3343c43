/// `context.rs` — shared host context
///
/// One `HostContext` is built at startup and handed (as `Arc`) to every
/// subsystem: config, module caches, the sandbox bridge and the host event
/// broadcast.
use std::{sync::Arc, time::Duration};

use tokio::sync::broadcast;

use crate::{
    config::HostConfig,
    modules::{introspect::IntrospectionCache, source::ModuleSourceCache},
    sandbox::{bridge::SandboxBridge, client::SandboxClient},
    types::{now_ts_ms, HostEvent},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct HostContext {
    pub config: HostConfig,
    pub sources: ModuleSourceCache,
    pub introspection: IntrospectionCache,
    bridge: Option<Arc<dyn SandboxBridge>>,
    events: broadcast::Sender<HostEvent>,
}

impl HostContext {
    pub fn new(config: HostConfig, bridge: Option<Arc<dyn SandboxBridge>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let timeout = Duration::from_millis(config.rpc_timeout_ms);
        Arc::new(Self {
            sources: ModuleSourceCache::new(config.workspace_root.clone()),
            introspection: IntrospectionCache::new(SandboxClient::new(bridge.clone(), timeout)),
            config,
            bridge,
            events,
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    /// A client with no session yet; each activation or preview gets its own.
    pub fn new_client(&self) -> SandboxClient {
        SandboxClient::new(self.bridge.clone(), self.rpc_timeout())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: HostEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Log and mirror the message on the developer debug channel.
    pub fn debug_log(&self, level: log::Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(level, "{message}");
        self.emit(HostEvent::DebugLog {
            level: level.as_str().to_lowercase(),
            message,
            timestamp: now_ts_ms(),
        });
    }
}
