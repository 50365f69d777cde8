//! Parameter decoding for the methods handled after `bind`.

use serde::Deserialize;
use serde_json::Value;

use crate::event::{Event, EventDecodeError, Halt, MulticastMessage};

/// Poll size used when the client names none.
pub(crate) const DEFAULT_POLL_MAX: u64 = 1 << 32;

#[derive(Debug, Deserialize)]
struct RawPoll {
    #[serde(default)]
    max_messages: Option<u64>,
    #[serde(default)]
    max_events: Option<u64>,
    #[serde(default, rename = "async")]
    asynchronous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PollParams {
    pub(crate) max_events: usize,
    pub(crate) asynchronous: bool,
}

pub(crate) fn poll(params: Value) -> Result<PollParams, String> {
    let raw: RawPoll = serde_json::from_value(params).map_err(|error| error.to_string())?;
    let max = raw
        .max_messages
        .or(raw.max_events)
        .unwrap_or(DEFAULT_POLL_MAX);
    if max == 0 {
        return Err("max_messages must be at least 1".to_owned());
    }
    Ok(PollParams {
        max_events: usize::try_from(max).unwrap_or(usize::MAX),
        asynchronous: raw.asynchronous,
    })
}

#[derive(Debug, Deserialize)]
struct RawSend {
    #[serde(default)]
    messages: Vec<Value>,
}

/// Why a `send` batch was refused before reaching the owner.
#[derive(Debug)]
pub(crate) enum SendRejection {
    Params(String),
    Endpoint(String),
}

pub(crate) fn send(params: Value) -> Result<Vec<MulticastMessage>, SendRejection> {
    let raw: RawSend =
        serde_json::from_value(params).map_err(|error| SendRejection::Params(error.to_string()))?;
    raw.messages
        .iter()
        .map(|value| match Event::from_json(value) {
            Ok(Event::Message(message)) => Ok(message),
            Ok(Event::Halt(_)) => Err(SendRejection::Params(
                "halt events cannot be sent; use the halt method".to_owned(),
            )),
            Err(EventDecodeError::Endpoint(error)) => {
                Err(SendRejection::Endpoint(error.to_string()))
            }
            Err(error) => Err(SendRejection::Params(error.to_string())),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawHalt {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) fn halt(params: Value) -> Result<Halt, String> {
    let raw: RawHalt = serde_json::from_value(params).map_err(|error| error.to_string())?;
    Ok(Halt::new(raw.code, raw.message))
}
