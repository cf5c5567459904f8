//! Wire frames and frame parsing
//!
//! All frames are UTF-8 JSON objects. Control frames carry a `type`
//! discriminator; anything with `event_id` and `sequence` fields is a data
//! event. The protocol documentation's `type:"snapshot"` / `type:"delta"`
//! frame form is coerced into the canonical envelope (`event_type` inside
//! the object) here, so downstream code sees exactly one shape.
//!
//! Malformed frames parse to `None`; they are logged and dropped, never
//! propagated as errors.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::warn;
use types::event::{Channel, Event};
use types::sequence::Sequence;

/// Subscription parameters: canonically ordered string pairs.
pub type Params = BTreeMap<String, String>;

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Subscribe {
        channel: Channel,
        params: Params,
    },
    Unsubscribe {
        channel: Channel,
        params: Params,
    },
    /// Replay request: everything after `last_seq` on the stream.
    SnapshotSince {
        channel: Channel,
        params: Params,
        last_seq: u64,
    },
    Pong,
}

impl ClientFrame {
    pub fn to_json(&self) -> Value {
        match self {
            ClientFrame::Subscribe { channel, params } => json!({
                "action": "subscribe",
                "channel": channel.as_str(),
                "params": params,
            }),
            ClientFrame::Unsubscribe { channel, params } => json!({
                "action": "unsubscribe",
                "channel": channel.as_str(),
                "params": params,
            }),
            ClientFrame::SnapshotSince {
                channel,
                params,
                last_seq,
            } => {
                // params extended with last_seq, which rides as an integer
                let mut extended = Map::new();
                for (key, value) in params {
                    extended.insert(key.clone(), Value::String(value.clone()));
                }
                extended.insert("last_seq".to_string(), json!(last_seq));
                json!({
                    "action": "snapshot_since",
                    "channel": channel.as_str(),
                    "params": extended,
                })
            }
            ClientFrame::Pong => json!({"type": "pong"}),
        }
    }

    /// The frame as wire text.
    pub fn to_message(&self) -> String {
        self.to_json().to_string()
    }
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Connected {
        session_id: String,
    },
    Ping,
    Subscribed {
        channel: Channel,
        params: Params,
        snapshot_seq: Sequence,
    },
    Unsubscribed {
        channel: Channel,
        params: Params,
    },
    SnapshotSinceResponse {
        channel: Channel,
        from_seq: Sequence,
        to_seq: Sequence,
        events: Vec<Event>,
    },
    Error {
        code: String,
        message: String,
    },
    Event(Event),
}

#[derive(Deserialize)]
struct SubscribedFrame {
    channel: Channel,
    #[serde(default)]
    params: Params,
    snapshot_seq: Sequence,
}

#[derive(Deserialize)]
struct UnsubscribedFrame {
    channel: Channel,
    #[serde(default)]
    params: Params,
}

#[derive(Deserialize)]
struct SnapshotSinceResponseFrame {
    channel: Channel,
    from_seq: Sequence,
    to_seq: Sequence,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorFrame {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ConnectedFrame {
    session_id: String,
}

/// Parse one incoming frame. Returns `None` for malformed input.
pub fn parse_frame(text: &str) -> Option<ServerFrame> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    let frame_type = obj.get("type").and_then(Value::as_str).map(str::to_owned);
    let is_event = obj.contains_key("event_id") && obj.contains_key("sequence");

    match frame_type.as_deref() {
        Some("connected") => {
            let frame: ConnectedFrame = serde_json::from_value(value.clone()).ok()?;
            Some(ServerFrame::Connected {
                session_id: frame.session_id,
            })
        }
        Some("ping") => Some(ServerFrame::Ping),
        Some("subscribed") => {
            let frame: SubscribedFrame = serde_json::from_value(value.clone()).ok()?;
            Some(ServerFrame::Subscribed {
                channel: frame.channel,
                params: frame.params,
                snapshot_seq: frame.snapshot_seq,
            })
        }
        Some("unsubscribed") => {
            let frame: UnsubscribedFrame = serde_json::from_value(value.clone()).ok()?;
            Some(ServerFrame::Unsubscribed {
                channel: frame.channel,
                params: frame.params,
            })
        }
        Some("snapshot_since_response") => {
            let frame: SnapshotSinceResponseFrame = serde_json::from_value(value.clone()).ok()?;
            let mut events = Vec::with_capacity(frame.events.len());
            for entry in frame.events {
                match event_from_value(entry) {
                    Some(event) => events.push(event),
                    None => warn!(channel = %frame.channel, "dropping malformed event in replay batch"),
                }
            }
            Some(ServerFrame::SnapshotSinceResponse {
                channel: frame.channel,
                from_seq: frame.from_seq,
                to_seq: frame.to_seq,
                events,
            })
        }
        Some("error") => {
            let frame: ErrorFrame = serde_json::from_value(value.clone()).ok()?;
            Some(ServerFrame::Error {
                code: frame.code,
                message: frame.message,
            })
        }
        // Protocol-form events use type:"snapshot"/"delta"; envelope-form
        // events have no type at all. Both carry event_id + sequence.
        _ => {
            if is_event {
                event_from_value(value).map(ServerFrame::Event)
            } else {
                None
            }
        }
    }
}

/// Coerce a JSON object into the canonical event envelope.
///
/// A top-level `type` of `snapshot` or `delta` is rewritten to `event_type`
/// when the envelope field is absent.
fn event_from_value(value: Value) -> Option<Event> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        _ => return None,
    };

    if !obj.contains_key("event_type") {
        if let Some(kind) = obj.get("type").cloned() {
            obj.insert("event_type".to_string(), kind);
        }
    }
    obj.remove("type");

    serde_json::from_value(Value::Object(obj)).ok()
}
