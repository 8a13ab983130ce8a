//! JSON hub protocol framing.
//!
//! Every message is a JSON object terminated by the record separator `0x1E`.
//! A single websocket text message may carry several records.

use crate::{Error, Result};
use crashline_types::Inbound;
use serde_json::Value;

/// Terminates every hub record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// First record sent after the websocket opens.
pub const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";

/// Keep-alive record.
pub const PING: &str = "{\"type\":6}\u{1e}";

const INVOCATION: u64 = 1;
const PING_TYPE: u64 = 6;
const CLOSE: u64 = 7;

/// A decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake response; carries the server's error when it refused.
    Handshake { error: Option<String> },
    Event(Inbound),
    Ping,
    Close { error: Option<String> },
    /// A record this client has no use for (unknown target, completion, ...).
    Ignored,
}

/// Split a websocket text message into its records.
pub fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
}

/// Decode one record (without its separator).
pub fn decode(record: &str) -> Result<Frame> {
    let value: Value = serde_json::from_str(record).map_err(Error::InvalidJson)?;
    let Some(kind) = value.get("type") else {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Ok(Frame::Handshake { error });
    };
    match kind.as_u64() {
        Some(INVOCATION) => {
            let target = value
                .get("target")
                .and_then(Value::as_str)
                .ok_or(Error::UnexpectedResponse)?;
            let argument = value
                .get("arguments")
                .and_then(Value::as_array)
                .and_then(|arguments| arguments.first())
                .cloned()
                .unwrap_or(Value::Null);
            match Inbound::from_invocation(target, argument).map_err(Error::InvalidJson)? {
                Some(event) => Ok(Frame::Event(event)),
                None => {
                    tracing::debug!(hub_target = target, "ignoring unknown hub target");
                    Ok(Frame::Ignored)
                }
            }
        }
        Some(PING_TYPE) => Ok(Frame::Ping),
        Some(CLOSE) => Ok(Frame::Close {
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => Ok(Frame::Ignored),
    }
}
