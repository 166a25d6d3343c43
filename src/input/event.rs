/// `input/event.rs` — normalized input events from the transport layer
///
/// ```json
/// { "type": "track-selection", "data": { "source": "midi", "trackName": "Intro", "timestamp": 0 } }
/// { "type": "method-trigger",  "data": { "source": "osc", "address": "/go", "timestamp": 0 } }
/// ```
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Track;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum InputEvent {
    TrackSelection(TrackSelection),
    MethodTrigger(MethodTrigger),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSelection {
    pub source: String,
    pub track_name: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodTrigger {
    pub source: String,
    /// Explicit channel; skips the mapping lookup.
    #[serde(default)]
    pub channel: Option<u32>,
    /// MIDI note number.
    #[serde(default)]
    pub note: Option<i64>,
    /// OSC address.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl MethodTrigger {
    /// Channel this trigger targets on `track`, via its channel mappings
    /// when no explicit channel was given.
    pub fn resolve_channel(&self, track: Option<&Track>) -> Option<u32> {
        if let Some(channel) = self.channel {
            return Some(channel);
        }
        let track = track?;
        track
            .channel_mappings
            .iter()
            .filter(|(_, key)| self.matches(key))
            .filter_map(|(channel, _)| channel.trim().parse::<u32>().ok())
            .find(|n| *n > 0)
    }

    fn matches(&self, key: &Value) -> bool {
        if let Some(note) = self.note {
            let mapped = match key {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            if mapped == Some(note) {
                return true;
            }
        }
        match (&self.address, key) {
            (Some(address), Value::String(s)) => s == address,
            _ => false,
        }
    }
}
