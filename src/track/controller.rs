/// `track/controller.rs` — track activation state machine
///
/// `Idle -> Loading -> Active -> Deactivating -> Idle`
///
/// Only one load runs at a time. Selections that arrive while a load is in
/// flight collapse into a single pending slot (most recent wins); a reload
/// of the loading track is parked and applied afterwards if it changes
/// anything structural.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    context::HostContext,
    error::HostError,
    sandbox::{
        client::{assets_base_url, SandboxClient},
        protocol::ModuleSources,
    },
    types::{HostEvent, MethodCall, Track},
};

use super::dispatch::ChannelHandlerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackPhase {
    Idle,
    Loading,
    Active,
    Deactivating,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStatus {
    pub phase: TrackPhase,
    pub active_track: Option<String>,
    pub loading_track: Option<String>,
    pub pending_track: Option<String>,
    pub preview_module: Option<String>,
    pub instance_count: usize,
}

/// Everything needed to talk to one initialised sandbox session.
#[derive(Clone)]
pub struct LoadedSession {
    pub client: Arc<SandboxClient>,
    pub track: Track,
    pub module_sources: ModuleSources,
    pub assets_base_url: String,
}

/// Host-side placeholder for a module instance living in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub module_type: String,
}

#[derive(Default)]
pub(super) struct PreviewState {
    pub(super) epoch: u64,
    pub(super) module: Option<String>,
    pub(super) client: Option<Arc<SandboxClient>>,
    pub(super) session: Option<LoadedSession>,
    /// Track that was active (or loading) when the preview started.
    pub(super) interrupted: Option<String>,
}

#[derive(Default)]
pub(super) struct ControllerInner {
    pub(super) tracks: Vec<Track>,
    pub(super) active: Option<LoadedSession>,
    /// Session of the current activation, set before the track is Active.
    pub(super) client: Option<Arc<SandboxClient>>,
    pub(super) loading: Option<String>,
    pub(super) pending_name: Option<String>,
    pub(super) pending_reload: Option<Track>,
    pub(super) deactivating: bool,
    pub(super) load_epoch: u64,
    pub(super) instances: HashMap<String, InstanceRecord>,
    pub(super) handler_map: Option<Arc<ChannelHandlerMap>>,
    pub(super) matrix_overrides: HashMap<String, Value>,
    /// "instanceId:methodName" → option name → last value
    pub(super) no_repeat: HashMap<String, HashMap<String, Value>>,
    pub(super) preview: PreviewState,
    pub(super) changed_modules: HashSet<String>,
    pub(super) change_generation: u64,
}

impl ControllerInner {
    pub(super) fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.track.name.as_str())
    }

    fn find_track(&self, name: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.name == name)
    }

    fn upsert_track(&mut self, track: Track) {
        match self.tracks.iter_mut().find(|t| t.name == track.name) {
            Some(slot) => *slot = track,
            None => self.tracks.push(track),
        }
    }
}

/// Why a load or preview flow stopped early.
pub(super) enum FlowError {
    /// A newer flow took over; clean up silently.
    Superseded,
    Failed(HostError),
}

impl From<HostError> for FlowError {
    fn from(e: HostError) -> Self {
        FlowError::Failed(e)
    }
}

/// Show/hide calls owed to a live session after enable toggles.
pub(super) struct VisibilityUpdate {
    session: LoadedSession,
    changes: Vec<(String, bool)>,
}

/// `(instance id, now visible)` for refs whose `disabled` flag flipped.
/// Both tracks must be structurally equal, so refs line up by index.
fn visibility_changes(old: &Track, new: &Track) -> Vec<(String, bool)> {
    old.modules
        .iter()
        .zip(&new.modules)
        .filter(|(a, b)| a.disabled != b.disabled)
        .map(|(_, b)| (b.id.clone(), !b.disabled))
        .collect()
}

#[derive(Clone)]
pub struct TrackController {
    pub(super) ctx: Arc<HostContext>,
    pub(super) inner: Arc<Mutex<ControllerInner>>,
}

impl TrackController {
    pub fn new(ctx: Arc<HostContext>) -> Self {
        Self {
            ctx,
            inner: Arc::new(Mutex::new(ControllerInner::default())),
        }
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner.lock().unwrap()
    }

    pub fn context(&self) -> &Arc<HostContext> {
        &self.ctx
    }

    // ── Queries ───────────────────────────────────────────────────────────

    pub fn phase(&self) -> TrackPhase {
        let inner = self.lock();
        if inner.deactivating {
            TrackPhase::Deactivating
        } else if inner.loading.is_some() {
            TrackPhase::Loading
        } else if inner.active.is_some() {
            TrackPhase::Active
        } else {
            TrackPhase::Idle
        }
    }

    pub fn status(&self) -> TrackStatus {
        let phase = self.phase();
        let inner = self.lock();
        TrackStatus {
            phase,
            active_track: inner.active_name().map(str::to_string),
            loading_track: inner.loading.clone(),
            pending_track: inner.pending_name.clone(),
            preview_module: inner.preview.module.clone(),
            instance_count: inner.instances.len(),
        }
    }

    pub fn active_track(&self) -> Option<Track> {
        self.lock().active.as_ref().map(|a| a.track.clone())
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.lock().tracks.clone()
    }

    pub fn instances(&self) -> Vec<InstanceRecord> {
        let mut records: Vec<InstanceRecord> = self.lock().instances.values().cloned().collect();
        records.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        records
    }

    /// Last structural options applied to `instance_id` on the active track.
    pub fn matrix_override(&self, instance_id: &str) -> Option<Value> {
        self.lock().matrix_overrides.get(instance_id).cloned()
    }

    // ── Selection ─────────────────────────────────────────────────────────

    pub async fn select_track(&self, name: &str) {
        {
            let mut inner = self.lock();
            if let Some(loading) = inner.loading.clone() {
                if loading == name {
                    log::debug!("[track] '{name}' is already loading");
                } else {
                    log::debug!("[track] '{loading}' is loading; queueing '{name}'");
                    inner.pending_name = Some(name.to_string());
                }
                return;
            }
            if inner.active_name() == Some(name) {
                log::debug!("[track] '{name}' is already active");
                return;
            }
            inner.loading = Some(name.to_string());
        }

        self.teardown_preview().await;

        let mut next = Some(name.to_string());
        while let Some(current) = next.take() {
            self.load_track(&current).await;
            let (following, visibility) = self.next_load();
            if let Some(update) = visibility {
                self.apply_visibility(update).await;
            }
            next = following;
        }
    }

    /// Picks the next queued load or clears the loading flag. A parked reload
    /// that only toggles modules comes back as a visibility update.
    fn next_load(&self) -> (Option<String>, Option<VisibilityUpdate>) {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(pending) = inner.pending_name.take() {
            if inner.active_name() != Some(pending.as_str()) {
                inner.loading = Some(pending.clone());
                return (Some(pending), None);
            }
        }

        let mut visibility = None;
        if let Some(reload) = inner.pending_reload.take() {
            if let Some(active) = inner.active.as_mut() {
                if active.track.name == reload.name {
                    if !active.track.structurally_eq(&reload) {
                        log::info!("[track] applying queued reload of '{}'", reload.name);
                        inner.loading = Some(reload.name.clone());
                        return (Some(reload.name), None);
                    }
                    let changes = visibility_changes(&active.track, &reload);
                    active.track = reload;
                    inner.handler_map = None;
                    if !changes.is_empty() {
                        visibility = Some(VisibilityUpdate {
                            session: active.clone(),
                            changes,
                        });
                    }
                }
            }
        }

        inner.loading = None;
        (None, visibility)
    }

    async fn apply_visibility(&self, update: VisibilityUpdate) {
        for (id, visible) in &update.changes {
            let method = if *visible { "show" } else { "hide" };
            let response = update
                .session
                .client
                .invoke_on_instance(id, method, Map::new())
                .await;
            if response.ok {
                log::debug!("[track] {id} {}", if *visible { "enabled" } else { "disabled" });
            } else {
                log::warn!("[track] {method} on {id} failed: {}", response.error_text());
            }
        }
    }

    async fn load_track(&self, name: &str) {
        // A preview may have started between two queued loads.
        self.teardown_preview().await;
        let has_active = self.lock().active.is_some();
        if has_active {
            self.deactivate().await;
        }
        let epoch = {
            let mut inner = self.lock();
            inner.load_epoch += 1;
            inner.load_epoch
        };

        log::info!("[track] loading '{name}'");
        match self.activate(name, epoch).await {
            Ok(()) => {
                log::info!("[track] '{name}' active");
                self.ctx.emit(HostEvent::TrackActivated {
                    name: name.to_string(),
                });
            }
            Err(FlowError::Superseded) => {
                log::debug!("[track] activation of '{name}' was superseded");
            }
            Err(FlowError::Failed(e)) => {
                self.ctx
                    .debug_log(log::Level::Error, format!("[track] failed to activate '{name}': {e}"));
                self.ctx.emit(HostEvent::TrackFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
                self.deactivate().await;
            }
        }
    }

    fn ensure_current(&self, epoch: u64) -> Result<(), FlowError> {
        if self.lock().load_epoch == epoch {
            Ok(())
        } else {
            Err(FlowError::Superseded)
        }
    }

    async fn activate(&self, name: &str, epoch: u64) -> Result<(), FlowError> {
        let definition = self.lock().find_track(name).cloned();
        let track = definition.ok_or_else(|| HostError::TrackNotFound(name.to_string()))?;

        let mut module_sources = ModuleSources::new();
        for module_type in track.module_types() {
            let source = self.ctx.sources.get(&module_type).await;
            self.ensure_current(epoch)?;
            module_sources.insert(module_type, source?.text.clone());
        }

        let client = Arc::new(self.ctx.new_client());
        {
            let mut inner = self.lock();
            if inner.load_epoch != epoch {
                return Err(FlowError::Superseded);
            }
            inner.client = Some(client.clone());
        }

        let token = client.ensure_session().await;
        self.ensure_current(epoch)?;
        let base = assets_base_url(&token?);

        let response = client
            .init_track(track.clone(), module_sources.clone(), base.clone())
            .await;
        self.ensure_current(epoch)?;
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
            if inner.load_epoch != epoch {
                return Err(FlowError::Superseded);
            }
            inner.instances = session
                .track
                .modules
                .iter()
                .map(|m| {
                    (
                        m.id.clone(),
                        InstanceRecord {
                            instance_id: m.id.clone(),
                            module_type: m.module_type.clone(),
                        },
                    )
                })
                .collect();
            inner.handler_map = None;
            inner.matrix_overrides.clear();
            inner.active = Some(session.clone());
        }

        self.run_constructors(&session).await;
        Ok(())
    }

    /// Runs the non-structural constructor methods of every module, hidden
    /// ones included. Failures are logged; the instance stays usable.
    pub(super) async fn run_constructors(&self, session: &LoadedSession) {
        let jobs: Vec<(String, Vec<MethodCall>)> = session
            .track
            .modules
            .iter()
            .filter_map(|m| {
                let data = session.track.modules_data.get(&m.id)?;
                let calls: Vec<MethodCall> =
                    data.constructor.iter().filter(|c| !c.is_matrix()).cloned().collect();
                (!calls.is_empty()).then(|| (m.id.clone(), calls))
            })
            .collect();

        let results = join_all(jobs.iter().map(|(id, calls)| {
            self.invoke_all(session, calls, id, true, "constructor")
        }))
        .await;
        for ((id, _), result) in jobs.iter().zip(results) {
            if let Err(e) = result {
                log::warn!("[track] constructor of {id} failed: {e}");
            }
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Idempotent. Destroys the session and forgets every per-track cache.
    pub async fn deactivate(&self) {
        let (client, previous) = {
            let mut inner = self.lock();
            if inner.deactivating {
                log::debug!("[track] deactivate already in progress");
                return;
            }
            if inner.active.is_none() && inner.client.is_none() && inner.instances.is_empty() {
                return;
            }
            inner.deactivating = true;
            inner.load_epoch += 1;
            (
                inner.client.take(),
                inner.active.as_ref().map(|a| a.track.name.clone()),
            )
        };

        if let Some(client) = client {
            client.destroy().await;
        }

        {
            let mut inner = self.lock();
            for (id, record) in inner.instances.drain() {
                log::debug!("[track] released instance {id} ({})", record.module_type);
            }
            inner.handler_map = None;
            inner.matrix_overrides.clear();
            inner.no_repeat.clear();
            inner.active = None;
            inner.deactivating = false;
        }

        if let Some(name) = previous {
            log::info!("[track] '{name}' deactivated");
            self.ctx.emit(HostEvent::TrackDeactivated { name });
        }
    }

    // ── Definitions ───────────────────────────────────────────────────────

    /// Replace one track definition. Applied at once when it is the active
    /// track and differs structurally; parked while a load is running.
    pub async fn reload_track(&self, track: Track) {
        let (rebuild, visibility) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.upsert_track(track.clone());
            if inner.loading.is_some() {
                log::debug!("[track] load in progress; parking reload of '{}'", track.name);
                inner.pending_reload = Some(track.clone());
                (false, None)
            } else {
                match inner.active.as_mut() {
                    Some(active) if active.track.name == track.name => {
                        if active.track.structurally_eq(&track) {
                            let changes = visibility_changes(&active.track, &track);
                            active.track = track.clone();
                            inner.handler_map = None;
                            let update = (!changes.is_empty()).then(|| VisibilityUpdate {
                                session: active.clone(),
                                changes,
                            });
                            (false, update)
                        } else {
                            (true, None)
                        }
                    }
                    _ => (false, None),
                }
            }
        };

        if let Some(update) = visibility {
            self.apply_visibility(update).await;
        }
        if rebuild {
            log::info!("[track] reloading '{}'", track.name);
            self.deactivate().await;
            self.select_track(&track.name).await;
        }
    }

    /// Replace the whole track set (configuration load).
    pub async fn set_tracks(&self, tracks: Vec<Track>) {
        enum Follow {
            Nothing,
            Deactivate,
            Reload(Track),
        }

        let follow = {
            let mut inner = self.lock();
            inner.tracks = tracks;
            if let Some(loading) = inner.loading.clone() {
                inner.pending_reload = inner.find_track(&loading).cloned();
                Follow::Nothing
            } else {
                match inner.active_name() {
                    None => Follow::Nothing,
                    Some(name) => match inner.find_track(name) {
                        None => Follow::Deactivate,
                        Some(t) => Follow::Reload(t.clone()),
                    },
                }
            }
        };
        log::info!("[track] track set updated ({} tracks)", self.lock().tracks.len());

        match follow {
            Follow::Nothing => {}
            Follow::Deactivate => self.deactivate().await,
            Follow::Reload(track) => self.reload_track(track).await,
        }
    }

    /// A workspace module file changed. Caches are dropped now; the active
    /// track is reloaded once changes settle, if it uses the module.
    pub fn notify_module_changed(&self, module_id: &str) -> tokio::task::JoinHandle<()> {
        self.ctx.sources.invalidate(module_id);
        self.ctx.introspection.invalidate(module_id);

        let generation = {
            let mut inner = self.lock();
            inner.changed_modules.insert(module_id.to_string());
            inner.change_generation += 1;
            inner.change_generation
        };

        let controller = self.clone();
        let settle = Duration::from_millis(self.ctx.config.workspace_settle_ms);
        tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            let reload = {
                let mut inner = controller.lock();
                if inner.change_generation != generation {
                    return;
                }
                let changed = std::mem::take(&mut inner.changed_modules);
                inner
                    .active
                    .as_ref()
                    .filter(|a| {
                        a.track
                            .modules
                            .iter()
                            .any(|m| changed.contains(&m.module_type))
                    })
                    .map(|a| a.track.name.clone())
            };
            if let Some(name) = reload {
                log::info!("[track] module change affects '{name}'; reloading");
                controller.deactivate().await;
                controller.select_track(&name).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::testing::{call, harness, module, track, wait_for_call};

    #[tokio::test]
    async fn selecting_active_track_again_sends_nothing() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;
        assert_eq!(ctl.phase(), TrackPhase::Active);

        bridge.clear();
        ctl.select_track("A").await;
        assert!(bridge.calls().is_empty());
        assert_eq!(bridge.ensure_count(), 1);
    }

    #[tokio::test]
    async fn selections_during_load_coalesce_to_latest() {
        let (ctl, bridge) = harness(vec![
            track("A", &[module("g1", "Grid")]),
            track("B", &[module("t1", "Text")]),
            track("C", &[module("g2", "Grid")]),
        ]);
        let gate = bridge.gate_init();

        let loader = ctl.clone();
        let first = tokio::spawn(async move { loader.select_track("A").await });
        wait_for_call(&bridge, "initTrack").await;

        ctl.select_track("B").await;
        ctl.select_track("C").await;
        assert_eq!(ctl.status().pending_track.as_deref(), Some("C"));

        gate.add_permits(10);
        first.await.unwrap();

        assert_eq!(
            bridge.details_of("initTrack"),
            vec!["A".to_string(), "C".to_string()]
        );
        assert_eq!(ctl.active_track().map(|t| t.name).as_deref(), Some("C"));
        assert_eq!(ctl.phase(), TrackPhase::Active);
    }

    #[tokio::test]
    async fn unknown_track_leaves_controller_idle() {
        let (ctl, bridge) = harness(vec![]);
        let mut events = ctl.context().subscribe();
        ctl.select_track("Nope").await;

        assert_eq!(ctl.phase(), TrackPhase::Idle);
        assert!(bridge.calls().is_empty());
        let mut failed = false;
        while let Ok(event) = events.try_recv() {
            if let HostEvent::TrackFailed { name, error } = event {
                assert_eq!(name, "Nope");
                assert!(error.contains("track not found"));
                failed = true;
            }
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn init_failure_tears_down_session() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        bridge.fail_on("initTrack:A", "boom");
        ctl.select_track("A").await;

        assert_eq!(ctl.phase(), TrackPhase::Idle);
        assert!(ctl.active_track().is_none());
        assert!(ctl.instances().is_empty());
        assert_eq!(bridge.destroyed_tokens().len(), 1);
    }

    #[tokio::test]
    async fn activation_seeds_instance_records() {
        let (ctl, _bridge) = harness(vec![track(
            "A",
            &[module("g1", "Grid"), module("t1", "Text")],
        )]);
        ctl.select_track("A").await;
        let ids: Vec<String> = ctl.instances().into_iter().map(|r| r.instance_id).collect();
        assert_eq!(ids, vec!["g1".to_string(), "t1".to_string()]);
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;
        ctl.deactivate().await;
        ctl.deactivate().await;
        assert_eq!(ctl.phase(), TrackPhase::Idle);
        assert_eq!(bridge.destroyed_tokens().len(), 1);
        assert_eq!(bridge.details_of("destroyTrack").len(), 1);
    }

    #[tokio::test]
    async fn switching_tracks_destroys_previous_session() {
        let (ctl, bridge) = harness(vec![
            track("A", &[module("g1", "Grid")]),
            track("B", &[module("t1", "Text")]),
        ]);
        ctl.select_track("A").await;
        ctl.select_track("B").await;
        assert_eq!(ctl.active_track().map(|t| t.name).as_deref(), Some("B"));
        assert_eq!(bridge.destroyed_tokens(), vec!["tok-1".to_string()]);
    }

    #[tokio::test]
    async fn reload_toggles_visibility_but_rebuilds_on_structural_change() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;
        bridge.clear();

        let mut toggled = track("A", &[module("g1", "Grid")]);
        toggled.modules[0].disabled = true;
        ctl.reload_track(toggled).await;
        assert!(bridge.details_of("initTrack").is_empty());
        assert_eq!(bridge.details_of("invokeOnInstance"), vec!["g1.hide".to_string()]);
        assert!(ctl.active_track().unwrap().modules[0].disabled);

        ctl.reload_track(track("A", &[module("g1", "Grid")])).await;
        assert!(bridge.details_of("initTrack").is_empty());
        assert_eq!(
            bridge.details_of("invokeOnInstance"),
            vec!["g1.hide".to_string(), "g1.show".to_string()]
        );

        ctl.reload_track(track("A", &[module("g1", "Text")])).await;
        assert_eq!(bridge.details_of("initTrack"), vec!["A".to_string()]);
        assert_eq!(ctl.active_track().unwrap().modules[0].module_type, "Text");
    }

    #[tokio::test]
    async fn reload_during_load_is_applied_after() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        let gate = bridge.gate_init();
        let loader = ctl.clone();
        let first = tokio::spawn(async move { loader.select_track("A").await });
        wait_for_call(&bridge, "initTrack").await;

        ctl.reload_track(track("A", &[module("g1", "Text")])).await;
        gate.add_permits(10);
        first.await.unwrap();

        assert_eq!(bridge.details_of("initTrack").len(), 2);
        assert_eq!(ctl.active_track().unwrap().modules[0].module_type, "Text");
        assert_eq!(ctl.phase(), TrackPhase::Active);
    }

    #[tokio::test]
    async fn parked_toggle_is_applied_as_visibility_change() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        let gate = bridge.gate_init();
        let loader = ctl.clone();
        let first = tokio::spawn(async move { loader.select_track("A").await });
        wait_for_call(&bridge, "initTrack").await;

        let mut toggled = track("A", &[module("g1", "Grid")]);
        toggled.modules[0].disabled = true;
        ctl.reload_track(toggled).await;
        gate.add_permits(10);
        first.await.unwrap();

        assert_eq!(bridge.details_of("initTrack").len(), 1);
        assert_eq!(bridge.details_of("invokeOnInstance"), vec!["g1.hide".to_string()]);
        assert_eq!(ctl.phase(), TrackPhase::Active);
    }

    #[tokio::test]
    async fn constructors_run_for_disabled_modules() {
        let mut t = track("A", &[module("g1", "Grid")]);
        t.modules[0].disabled = true;
        t.modules_data.entry("g1".to_string()).or_default().constructor =
            vec![call("flash", &[])];
        let (ctl, bridge) = harness(vec![t]);
        ctl.select_track("A").await;
        assert_eq!(bridge.details_of("invokeOnInstance"), vec!["g1.flash".to_string()]);
    }

    #[tokio::test]
    async fn set_tracks_without_active_definition_deactivates() {
        let (ctl, _bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;
        ctl.set_tracks(vec![track("B", &[module("t1", "Text")])]).await;
        assert_eq!(ctl.phase(), TrackPhase::Idle);
        assert_eq!(ctl.tracks().len(), 1);
    }

    #[tokio::test]
    async fn module_change_reloads_only_affected_track() {
        let (ctl, bridge) = harness(vec![track("A", &[module("g1", "Grid")])]);
        ctl.select_track("A").await;
        bridge.clear();

        ctl.notify_module_changed("Orbit").await.unwrap();
        assert!(bridge.details_of("initTrack").is_empty());

        ctl.notify_module_changed("Grid").await.unwrap();
        assert_eq!(bridge.details_of("initTrack"), vec!["A".to_string()]);
        assert_eq!(ctl.phase(), TrackPhase::Active);
    }
}
