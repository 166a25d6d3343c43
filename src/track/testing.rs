/// `track/testing.rs` — controller fixtures shared by the track tests
use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use crate::{
    config::HostConfig,
    context::HostContext,
    sandbox::{bridge::SandboxBridge, testing::MockBridge},
    types::{MethodCall, MethodOption, ModuleData, ModuleRef, Track},
};

use super::TrackController;

pub fn harness(tracks: Vec<Track>) -> (TrackController, Arc<MockBridge>) {
    harness_with_root(tracks, None)
}

/// Like `harness`, but module sources are read from `root/modules` first.
pub fn harness_with_root(tracks: Vec<Track>, root: Option<PathBuf>) -> (TrackController, Arc<MockBridge>) {
    let bridge = MockBridge::new();
    let config = HostConfig {
        rpc_timeout_ms: 2_000,
        workspace_settle_ms: 10,
        reconcile_debounce_ms: 10,
        workspace_root: root,
        ..HostConfig::default()
    };
    let ctx = HostContext::new(config, Some(bridge.clone() as Arc<dyn SandboxBridge>));
    let controller = TrackController::new(ctx);
    controller.lock().tracks = tracks;
    (controller, bridge)
}

pub fn module(id: &str, module_type: &str) -> ModuleRef {
    ModuleRef {
        id: id.to_string(),
        module_type: module_type.to_string(),
        disabled: false,
        input_source: None,
    }
}

pub fn track(name: &str, modules: &[ModuleRef]) -> Track {
    Track {
        name: name.to_string(),
        modules: modules.to_vec(),
        modules_data: BTreeMap::new(),
        channel_mappings: BTreeMap::new(),
    }
}

pub fn call(name: &str, options: &[(&str, serde_json::Value)]) -> MethodCall {
    MethodCall {
        name: name.to_string(),
        options: options
            .iter()
            .map(|(n, v)| MethodOption {
                name: n.to_string(),
                value: v.clone(),
                random_range: None,
                random_values: None,
                no_repeat: false,
            })
            .collect(),
    }
}

/// Schedule `calls` on `channel` for `instance_id`.
pub fn on_channel(track: &mut Track, instance_id: &str, channel: &str, calls: Vec<MethodCall>) {
    track
        .modules_data
        .entry(instance_id.to_string())
        .or_insert_with(ModuleData::default)
        .methods
        .insert(channel.to_string(), calls);
}

/// Wait until the bridge has seen at least one request of `kind`.
pub async fn wait_for_call(bridge: &MockBridge, kind: &str) {
    wait_for_calls(bridge, kind, 1).await;
}

pub async fn wait_for_calls(bridge: &MockBridge, kind: &str, count: usize) {
    for _ in 0..400 {
        if bridge.details_of(kind).len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} {kind} request(s)");
}
