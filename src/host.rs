/// `host.rs` — process wiring for the standalone host
///
/// Startup order:
///   1. sandbox runtime worker
///   2. shared context + track controller
///   3. track set, input reconciliation, initial track
///   4. newline-delimited JSON commands on stdin, host events on stdout
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    config::HostConfig,
    context::HostContext,
    error::HostError,
    input::{route_input_event, InputEvent, InputReconciler, SourceReconciler},
    sandbox::{bridge::SandboxBridge, runtime::LuaSandboxBridge},
    track::TrackController,
    types::{MethodOption, ModuleData},
};

/// Host-level commands accepted next to input events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum HostCommand {
    #[serde(rename_all = "camelCase")]
    PreviewModule {
        module: String,
        #[serde(default)]
        data: ModuleData,
        #[serde(default)]
        request_id: Option<String>,
    },
    PreviewMethod {
        module: String,
        method: String,
        #[serde(default)]
        options: Vec<MethodOption>,
    },
    ClearPreview,
    #[serde(rename_all = "camelCase")]
    ModuleChanged { module_id: String },
    #[serde(rename_all = "camelCase")]
    IntrospectModule { module_id: String },
    ReloadTracks,
    Status,
}

/// Transport drivers are external; the standalone host only reports the set.
struct LogReconciler;

#[async_trait]
impl SourceReconciler for LogReconciler {
    async fn reconcile_sources(&self, names: Vec<String>) {
        log::info!("[input] transports in use: {}", names.join(", "));
    }
}

pub struct Host {
    pub controller: TrackController,
    pub reconciler: Arc<InputReconciler>,
}

impl Host {
    pub fn new(config: HostConfig) -> Result<Self, HostError> {
        let bridge = LuaSandboxBridge::spawn(
            config.sandbox_memory_limit,
            Duration::from_millis(config.rpc_timeout_ms),
        )?;
        let debounce = Duration::from_millis(config.reconcile_debounce_ms);
        let ctx = HostContext::new(config, Some(bridge as Arc<dyn SandboxBridge>));
        Ok(Self {
            controller: TrackController::new(ctx),
            reconciler: InputReconciler::new(Arc::new(LogReconciler), debounce),
        })
    }

    /// Install the track set and select the configured initial track.
    pub async fn start(&self) -> Result<(), HostError> {
        self.load_tracks().await?;
        let initial = self.controller.context().config.initial_track.clone();
        if let Some(name) = initial {
            self.controller.select_track(&name).await;
        }
        Ok(())
    }

    async fn load_tracks(&self) -> Result<(), HostError> {
        let tracks = self.controller.context().config.load_tracks()?;
        log::info!("[startup] {} track(s) loaded", tracks.len());
        self.controller.set_tracks(tracks.clone()).await;
        self.reconciler.schedule(tracks);
        Ok(())
    }

    /// Handle one stdin line: an input event or a host command.
    pub async fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Ok(event) = serde_json::from_str::<InputEvent>(line) {
            route_input_event(&self.controller, event).await;
            return;
        }
        match serde_json::from_str::<HostCommand>(line) {
            Ok(command) => self.handle_command(command).await,
            Err(e) => log::warn!("[host] ignoring unrecognised line: {e}"),
        }
    }

    async fn handle_command(&self, command: HostCommand) {
        match command {
            HostCommand::PreviewModule {
                module,
                data,
                request_id,
            } => self.controller.preview_module(&module, data, request_id).await,
            HostCommand::PreviewMethod {
                module,
                method,
                options,
            } => {
                self.controller
                    .trigger_preview_method(&module, &method, options)
                    .await
            }
            HostCommand::ClearPreview => self.controller.clear_preview().await,
            HostCommand::ModuleChanged { module_id } => {
                self.controller.notify_module_changed(&module_id);
            }
            HostCommand::IntrospectModule { module_id } => {
                let ctx = self.controller.context();
                let result = ctx.introspection.introspect_module(&ctx.sources, &module_id).await;
                print_json(&result);
            }
            HostCommand::ReloadTracks => {
                if let Err(e) = self.load_tracks().await {
                    self.controller
                        .context()
                        .debug_log(log::Level::Error, format!("[host] reload failed: {e}"));
                }
            }
            HostCommand::Status => print_json(&self.controller.status()),
        }
    }

    pub async fn shutdown(&self) {
        self.controller.clear_preview().await;
        self.controller.deactivate().await;
        self.controller.context().introspection.shutdown().await;
        log::info!("[host] stopped");
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(text) => println!("{text}"),
        Err(e) => log::warn!("[host] failed to encode output: {e}"),
    }
}

/// Run the host until stdin closes.
pub async fn run(config_path: Option<&Path>) -> Result<(), HostError> {
    let config = match config_path {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    let host = Host::new(config)?;

    let mut events = host.controller.context().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_json(&event),
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(_) => {} // lagged, skip
            }
        }
    });
    host.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        host.handle_line(&line).await;
    }

    host.shutdown().await;
    Ok(())
}
