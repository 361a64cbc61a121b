//! socket.io v1 frame codec
//!
//! Frames are `type:id:endpoint:data`:
//! 0 disconnect, 1 connect, 2 heartbeat, 3 message, 4 json, 5 event,
//! 6 ack, 7 error, 8 noop. An id with a trailing `+` asks for an ack with data.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Disconnect,
    Connect,
    Heartbeat,
    Message(String),
    Json(Value),
    Event {
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack(String),
    Error(String),
    Noop,
}

#[derive(Serialize, Deserialize)]
struct EventBody {
    name: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Parse one text frame. Returns None for frames that do not follow the format.
pub fn parse(frame: &str) -> Option<Frame> {
    let mut parts = frame.splitn(4, ':');
    let kind = parts.next()?;
    let id = parts.next().unwrap_or("");
    let _endpoint = parts.next().unwrap_or("");
    let data = parts.next().unwrap_or("");

    let parsed = match kind {
        "0" => Frame::Disconnect,
        "1" => Frame::Connect,
        "2" => Frame::Heartbeat,
        "3" => Frame::Message(data.to_string()),
        "4" => Frame::Json(serde_json::from_str(data).ok()?),
        "5" => {
            let body: EventBody = serde_json::from_str(data).ok()?;
            Frame::Event {
                ack_id: parse_ack_id(id),
                name: body.name,
                args: body.args,
            }
        }
        "6" => Frame::Ack(data.to_string()),
        "7" => Frame::Error(data.to_string()),
        "8" => Frame::Noop,
        _ => return None,
    };
    Some(parsed)
}

/// Numeric ack id from the id field, ignoring the `+` data marker.
fn parse_ack_id(id: &str) -> Option<u64> {
    let id = id.trim_end_matches('+');
    if id.is_empty() {
        return None;
    }
    id.parse().ok()
}

/// Encode an event frame with a single argument.
pub fn encode_event(name: &str, payload: &Value) -> String {
    let body = EventBody {
        name: name.to_string(),
        args: vec![payload.clone()],
    };
    // Serializing a String and a Vec<Value> cannot fail.
    let json = serde_json::to_string(&body).unwrap_or_default();
    format!("5:::{}", json)
}

/// Acknowledge an event that asked for one.
pub fn encode_ack(ack_id: u64) -> String {
    format!("6:::{}", ack_id)
}

pub const HEARTBEAT: &str = "2::";

impl Frame {
    /// Payload handed to listeners: the single argument, all arguments as an
    /// array when there are several, or null when there are none.
    pub fn event_payload(args: Vec<Value>) -> Value {
        match args.len() {
            0 => Value::Null,
            1 => args.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Array(args),
        }
    }
}
