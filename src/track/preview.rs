/// `track/preview.rs` — single-module preview
///
/// A preview runs one module in its own session, interrupting the active
/// track until the preview is cleared. Every preview request bumps an
/// epoch; a flow that finds the epoch moved on cleans up its own session
/// and returns without reporting.
use std::{collections::BTreeMap, sync::Arc};

use crate::{
    error::HostError,
    sandbox::{
        client::{assets_base_url, SandboxClient},
        protocol::ModuleSources,
    },
    types::{HostEvent, MethodCall, MethodOption, ModuleData, ModuleRef, Track},
};

use super::controller::{FlowError, LoadedSession, TrackController};

/// Instance id of the synthetic module inside a preview track.
pub fn preview_instance_id(module: &str) -> String {
    format!("preview-{module}")
}

fn preview_track(module: &str, data: ModuleData) -> Track {
    let instance_id = preview_instance_id(module);
    Track {
        name: instance_id.clone(),
        modules: vec![ModuleRef {
            id: instance_id.clone(),
            module_type: module.to_string(),
            disabled: false,
            input_source: None,
        }],
        modules_data: BTreeMap::from([(instance_id, data)]),
        channel_mappings: BTreeMap::new(),
    }
}

impl TrackController {
    pub fn preview_module_name(&self) -> Option<String> {
        self.lock().preview.module.clone()
    }

    pub async fn preview_module(&self, module: &str, data: ModuleData, request_id: Option<String>) {
        let (epoch, replaced, interrupt) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.preview.epoch += 1;
            // Every preview gets a fresh session, even for the same module.
            inner.preview.session = None;
            let replaced = inner.preview.client.take();
            inner.preview.module = Some(module.to_string());

            // A load still reading sources has no client for `deactivate`
            // to find; retire it here along with anything queued behind it.
            if inner.loading.is_some() {
                inner.load_epoch += 1;
                inner.pending_name = None;
                inner.pending_reload = None;
            }

            let interrupt = if inner.preview.interrupted.is_none() {
                inner
                    .active
                    .as_ref()
                    .map(|a| a.track.name.clone())
                    .or_else(|| inner.loading.clone())
            } else {
                None
            };
            if interrupt.is_some() {
                inner.preview.interrupted = interrupt.clone();
            }
            (inner.preview.epoch, replaced, interrupt)
        };

        if let Some(client) = replaced {
            client.destroy().await;
        }
        if let Some(name) = interrupt {
            log::info!("[preview] interrupting track '{name}'");
            self.deactivate().await;
        }

        match self.start_preview(module, data, epoch).await {
            Ok(()) => {
                log::info!("[preview] '{module}' ready");
                self.ctx.emit(HostEvent::PreviewReady {
                    module: module.to_string(),
                    request_id,
                });
            }
            Err(FlowError::Superseded) => {
                log::debug!("[preview] '{module}' superseded");
            }
            Err(FlowError::Failed(e)) => {
                if self.lock().preview.epoch != epoch {
                    log::debug!("[preview] '{module}' failed after being superseded: {e}");
                    return;
                }
                self.ctx
                    .debug_log(log::Level::Error, format!("[preview] '{module}' failed: {e}"));
                self.clear_preview().await;
                self.ctx.emit(HostEvent::PreviewFailed {
                    module: module.to_string(),
                    request_id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn preview_current(&self, epoch: u64) -> Result<(), FlowError> {
        if self.lock().preview.epoch == epoch {
            Ok(())
        } else {
            Err(FlowError::Superseded)
        }
    }

    /// Superseded check after an await. A stale flow destroys its client
    /// unless the newer preview took it over.
    async fn settle_preview(&self, epoch: u64, client: &Arc<SandboxClient>) -> Result<(), FlowError> {
        let orphaned = {
            let inner = self.lock();
            if inner.preview.epoch == epoch {
                return Ok(());
            }
            !inner
                .preview
                .client
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, client))
        };
        if orphaned {
            client.destroy().await;
        }
        Err(FlowError::Superseded)
    }

    async fn start_preview(&self, module: &str, data: ModuleData, epoch: u64) -> Result<(), FlowError> {
        let source = self.ctx.sources.get(module).await;
        self.preview_current(epoch)?;
        let source = source?;

        let client = {
            let mut inner = self.lock();
            if inner.preview.epoch != epoch {
                return Err(FlowError::Superseded);
            }
            let c = Arc::new(self.ctx.new_client());
            inner.preview.client = Some(c.clone());
            c
        };

        let token = client.ensure_session().await;
        self.settle_preview(epoch, &client).await?;
        let base = assets_base_url(&token?);

        let track = preview_track(module, data);
        let mut module_sources = ModuleSources::new();
        module_sources.insert(module.to_string(), source.text.clone());

        let response = client
            .init_track(track.clone(), module_sources.clone(), base.clone())
            .await;
        self.settle_preview(epoch, &client).await?;
        if !response.ok {
            return Err(HostError::SandboxTrackInitFailed(response.error_text()).into());
        }

        let session = LoadedSession {
            client,
            track,
            module_sources,
            assets_base_url: base,
        };
        {
            let mut inner = self.lock();
            if inner.preview.epoch != epoch {
                return Err(FlowError::Superseded);
            }
            inner.preview.session = Some(session.clone());
        }
        self.run_constructors(&session).await;
        Ok(())
    }

    /// Drop the preview without restoring anything.
    pub(super) async fn teardown_preview(&self) {
        let client = {
            let mut inner = self.lock();
            if inner.preview.module.is_none() && inner.preview.client.is_none() {
                return;
            }
            inner.preview.epoch += 1;
            inner.preview.module = None;
            inner.preview.session = None;
            inner.preview.interrupted = None;
            inner.preview.client.take()
        };
        if let Some(client) = client {
            client.destroy().await;
        }
        log::debug!("[preview] torn down");
    }

    /// End the preview and reselect the track it interrupted.
    pub async fn clear_preview(&self) {
        let interrupted = self.lock().preview.interrupted.take();
        self.teardown_preview().await;
        if let Some(name) = interrupted {
            log::info!("[preview] restoring track '{name}'");
            self.select_track(&name).await;
        }
    }

    /// Invoke `method` on the previewed module. Ignored unless `module` is
    /// the current preview.
    pub async fn trigger_preview_method(&self, module: &str, method: &str, options: Vec<MethodOption>) {
        let session = {
            let inner = self.lock();
            if inner.preview.module.as_deref() != Some(module) {
                log::debug!("[preview] '{module}' is not being previewed; ignoring {method}");
                return;
            }
            inner.preview.session.clone()
        };
        let Some(session) = session else {
            log::debug!("[preview] '{module}' is not ready; ignoring {method}");
            return;
        };
        let call = MethodCall {
            name: method.to_string(),
            options,
        };
        let instance_id = preview_instance_id(module);
        if let Err(e) = self
            .execute_methods(&session, &[call], &instance_id, false, "preview")
            .await
        {
            log::warn!("[preview] {method} on '{module}' failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        modules::builtin,
        track::{
            testing::{call, harness, harness_with_root, module, track, wait_for_call, wait_for_calls},
            TrackPhase,
        },
    };

    #[tokio::test]
    async fn preview_then_clear_restores_interrupted_track() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;

        ctl.preview_module("Text", ModuleData::default(), Some("r1".to_string()))
            .await;
        assert!(ctl.active_track().is_none());
        assert_eq!(ctl.preview_module_name().as_deref(), Some("Text"));
        assert_eq!(
            bridge.details_of("initTrack"),
            vec!["A".to_string(), "preview-Text".to_string()]
        );

        ctl.clear_preview().await;
        assert!(ctl.preview_module_name().is_none());
        assert_eq!(ctl.active_track().map(|t| t.name).as_deref(), Some("A"));
        assert_eq!(ctl.phase(), TrackPhase::Active);
    }

    #[tokio::test]
    async fn later_preview_supersedes_earlier_one() {
        let (ctl, bridge) = harness(vec![]);
        let mut events = ctl.context().subscribe();
        let gate = bridge.gate_init();

        let first = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.preview_module("Grid", ModuleData::default(), Some("x".to_string())).await })
        };
        wait_for_call(&bridge, "initTrack").await;
        let second = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.preview_module("Text", ModuleData::default(), Some("y".to_string())).await })
        };
        wait_for_calls(&bridge, "initTrack", 2).await;

        gate.add_permits(10);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(ctl.preview_module_name().as_deref(), Some("Text"));
        let grid_token = bridge
            .calls()
            .into_iter()
            .find(|c| c.kind == "initTrack" && c.detail == "preview-Grid")
            .map(|c| c.token)
            .unwrap();
        assert!(bridge.destroyed_tokens().contains(&grid_token));

        let mut acked = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let HostEvent::PreviewReady { module, request_id } = event {
                acked.push((module, request_id));
            }
        }
        assert_eq!(acked, vec![("Text".to_string(), Some("y".to_string()))]);
    }

    #[tokio::test]
    async fn failed_preview_reports_request_id() {
        let (ctl, _bridge) = harness(vec![]);
        let mut events = ctl.context().subscribe();
        ctl.preview_module("Missing", ModuleData::default(), Some("r9".to_string()))
            .await;

        assert!(ctl.preview_module_name().is_none());
        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if let HostEvent::PreviewFailed { request_id, error, .. } = event {
                failed = Some((request_id, error));
            }
        }
        let (request_id, error) = failed.expect("preview failure event");
        assert_eq!(request_id.as_deref(), Some("r9"));
        assert!(error.contains("Missing"));
    }

    #[tokio::test]
    async fn trigger_only_reaches_current_preview() {
        let (ctl, bridge) = harness(vec![]);
        ctl.preview_module("Grid", ModuleData::default(), None).await;
        bridge.clear();

        ctl.trigger_preview_method("Text", "setText", Vec::new()).await;
        assert!(bridge.calls().is_empty());

        ctl.trigger_preview_method("Grid", "flash", call("flash", &[]).options)
            .await;
        assert_eq!(
            bridge.details_of("invokeOnInstance"),
            vec!["preview-Grid.flash".to_string()]
        );
    }

    #[tokio::test]
    async fn selecting_a_track_ends_the_preview() {
        let (ctl, bridge) = harness(vec![track("B", &[module("t1", "Text")])]);
        ctl.preview_module("Grid", ModuleData::default(), None).await;
        ctl.select_track("B").await;
        assert!(ctl.preview_module_name().is_none());
        assert_eq!(bridge.destroyed_tokens().len(), 1);
        assert_eq!(ctl.active_track().map(|t| t.name).as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn previewing_same_module_again_uses_a_fresh_session() {
        let (ctl, bridge) = harness(vec![]);
        ctl.preview_module("Grid", ModuleData::default(), None).await;
        ctl.preview_module("Grid", ModuleData::default(), None).await;

        assert_eq!(bridge.ensure_count(), 2);
        assert_eq!(bridge.destroyed_tokens(), vec!["tok-1".to_string()]);
        let tokens: Vec<String> = bridge
            .calls()
            .into_iter()
            .filter(|c| c.kind == "initTrack")
            .map(|c| c.token)
            .collect();
        assert_eq!(tokens, vec!["tok-1".to_string(), "tok-2".to_string()]);
    }

    #[tokio::test]
    async fn preview_stops_a_load_still_reading_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("modules")).unwrap();
        std::fs::write(dir.path().join("modules").join("Grid.lua"), builtin::GRID).unwrap();
        let (ctl, bridge) = harness_with_root(
            vec![track("A", &[module("g1", "Grid")])],
            Some(dir.path().to_path_buf()),
        );

        let loader = ctl.clone();
        let load = tokio::spawn(async move { loader.select_track("A").await });
        while ctl.phase() != TrackPhase::Loading {
            tokio::task::yield_now().await;
        }
        ctl.preview_module("Text", ModuleData::default(), None).await;
        load.await.unwrap();

        assert!(ctl.active_track().is_none());
        assert_eq!(ctl.phase(), TrackPhase::Idle);
        assert_eq!(ctl.preview_module_name().as_deref(), Some("Text"));
        assert!(!bridge.details_of("initTrack").contains(&"A".to_string()));
        let live = bridge.ensure_count() as usize - bridge.destroyed_tokens().len();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn preview_drops_selection_queued_behind_a_load() {
        let (ctl, bridge) = harness(vec![
            track("A", &[module("g1", "Grid")]),
            track("B", &[module("t1", "Text")]),
        ]);
        let gate = bridge.gate_init();
        let loader = ctl.clone();
        let load = tokio::spawn(async move { loader.select_track("A").await });
        wait_for_call(&bridge, "initTrack").await;
        ctl.select_track("B").await;
        assert_eq!(ctl.status().pending_track.as_deref(), Some("B"));

        let previewer = ctl.clone();
        let preview = tokio::spawn(async move {
            previewer.preview_module("Grid", ModuleData::default(), None).await
        });
        wait_for_calls(&bridge, "initTrack", 2).await;
        gate.add_permits(10);
        load.await.unwrap();
        preview.await.unwrap();

        assert_eq!(
            bridge.details_of("initTrack"),
            vec!["A".to_string(), "preview-Grid".to_string()]
        );
        assert!(ctl.active_track().is_none());
        assert!(ctl.status().pending_track.is_none());
        assert_eq!(ctl.preview_module_name().as_deref(), Some("Grid"));
        let live = bridge.ensure_count() as usize - bridge.destroyed_tokens().len();
        assert_eq!(live, 1);
    }
}
