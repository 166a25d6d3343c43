/// `track/dispatch.rs` — channel trigger → module methods
///
/// A trigger names a numeric channel (`/Ableton/<n>`). Every enabled module
/// of the active track that schedules methods on that channel is a target.
/// Structural updates for all targets complete before any ordinary method
/// is invoked.
use std::{collections::BTreeMap, sync::Arc};

use futures_util::future::join_all;

use crate::{
    error::{HostError, HostResult},
    types::{MethodCall, Track},
};

use super::{controller::TrackController, methods::split_structural};

pub const CHANNEL_PATH_PREFIX: &str = "/Ableton/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandler {
    pub instance_id: String,
    pub module_type: String,
    /// `methods` key as written in the track, e.g. `"07"`.
    pub channel_key: String,
}

/// channel number → targets, in module order
pub type ChannelHandlerMap = BTreeMap<u32, Vec<ChannelHandler>>;

pub fn build_channel_handler_map(track: &Track) -> ChannelHandlerMap {
    let mut map = ChannelHandlerMap::new();
    for module in track.modules.iter().filter(|m| !m.disabled) {
        let Some(data) = track.modules_data.get(&module.id) else {
            continue;
        };
        for (key, methods) in &data.methods {
            if methods.is_empty() {
                continue;
            }
            let Ok(channel) = key.trim().parse::<u32>() else {
                log::debug!("[dispatch] {}: ignoring non-numeric channel '{key}'", module.id);
                continue;
            };
            map.entry(channel).or_default().push(ChannelHandler {
                instance_id: module.id.clone(),
                module_type: module.module_type.clone(),
                channel_key: key.clone(),
            });
        }
    }
    map
}

/// `/Ableton/<positive integer>` → channel number.
pub fn parse_channel_path(path: &str) -> HostResult<u32> {
    path.strip_prefix(CHANNEL_PATH_PREFIX)
        .filter(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|rest| rest.parse::<u32>().ok())
        .filter(|n| *n > 0)
        .ok_or_else(|| HostError::InvalidChannelPath(path.to_string()))
}

pub fn channel_path(channel: u32) -> String {
    format!("{CHANNEL_PATH_PREFIX}{channel}")
}

struct Target {
    instance_id: String,
    structural: Option<MethodCall>,
    ordinary: Vec<MethodCall>,
}

impl TrackController {
    /// Dispatch one trigger. Never fails: problems are logged and dropped.
    pub async fn handle_channel_message(&self, path: &str) {
        let channel = match parse_channel_path(path) {
            Ok(c) => c,
            Err(e) => {
                self.ctx.debug_log(log::Level::Warn, format!("[dispatch] {e}"));
                return;
            }
        };

        let (session, handlers) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if let Some(loading) = &inner.loading {
                log::debug!("[dispatch] channel {channel} dropped: '{loading}' is loading");
                return;
            }
            let Some(session) = inner.active.clone() else {
                log::debug!("[dispatch] channel {channel} dropped: no active track");
                return;
            };
            let map = inner
                .handler_map
                .get_or_insert_with(|| Arc::new(build_channel_handler_map(&session.track)))
                .clone();
            (session, map.get(&channel).cloned().unwrap_or_default())
        };

        let targets: Vec<Target> = handlers
            .iter()
            .filter_map(|h| {
                let methods = session
                    .track
                    .modules_data
                    .get(&h.instance_id)?
                    .methods
                    .get(&h.channel_key)?;
                let (structural, ordinary) = split_structural(methods);
                Some(Target {
                    instance_id: h.instance_id.clone(),
                    structural,
                    ordinary,
                })
            })
            .collect();
        if targets.is_empty() {
            log::debug!("[dispatch] channel {channel}: no handlers on '{}'", session.track.name);
            return;
        }
        let context = format!("channel {channel}");

        // Structural pass. A failed rebuild does not block ordinary methods.
        join_all(targets.iter().filter_map(|t| {
            t.structural
                .as_ref()
                .map(|m| self.apply_matrix(&session, &t.instance_id, m, &context))
        }))
        .await;

        join_all(targets.iter().map(|t| {
            self.invoke_all(&session, &t.ordinary, &t.instance_id, false, &context)
        }))
        .await;
    }
}
