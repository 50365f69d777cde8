//! Endpoints and the events exchanged through `send` and `poll`.
//!
//! An [`Endpoint`] names a port on a device as `"device:port"`. Events are
//! either a [`MulticastMessage`] from a source endpoint or the terminal
//! [`Halt`]. On the wire an event is a JSON object whose optional `type`
//! member selects the variant; a missing `type` means `"msg"`.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised when parsing an endpoint from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointParseError {
    /// The text did not contain exactly one `:` separator.
    #[error("endpoint '{0}' must have the form device:port")]
    Separator(String),
    /// The device or port part was empty.
    #[error("endpoint '{0}' has an empty device or port")]
    EmptyPart(String),
}

/// A `device:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    device: String,
    port: String,
}

impl Endpoint {
    /// Builds an endpoint from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] when either part is empty or contains `:`.
    pub fn new(device: &str, port: &str) -> Result<Self, EndpointParseError> {
        format!("{device}:{port}").parse()
    }

    /// Rebuilds an endpoint from parts taken from existing endpoints.
    pub(crate) fn from_parts(device: String, port: String) -> Self {
        Self { device, port }
    }

    /// Device part.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Port part.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.split(':');
        let (Some(device), Some(port), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(EndpointParseError::Separator(text.to_owned()));
        };
        if device.is_empty() || port.is_empty() {
            return Err(EndpointParseError::EmptyPart(text.to_owned()));
        }
        Ok(Self {
            device: device.to_owned(),
            port: port.to_owned(),
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.device, self.port)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(D::Error::custom)
    }
}

/// A message multicast from a source endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MulticastMessage {
    /// Output endpoint the message was sent from.
    pub src: Endpoint,
    /// Optional payload; omitted from JSON when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl MulticastMessage {
    /// Creates a message. A `null` payload is treated as absent.
    #[must_use]
    pub fn new(src: Endpoint, data: Option<Value>) -> Self {
        Self {
            src,
            data: data.filter(|value| !value.is_null()),
        }
    }
}

/// The terminal event of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    /// Application-defined exit code.
    pub code: i64,
    /// Optional human-readable explanation.
    pub message: Option<String>,
}

impl Halt {
    /// Creates a halt event.
    #[must_use]
    pub fn new(code: i64, message: Option<String>) -> Self {
        Self { code, message }
    }
}

/// Errors raised when decoding an event from JSON.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The event was not a JSON object.
    #[error("event must be a JSON object")]
    NotAnObject,
    /// The `type` member named an unknown event kind.
    #[error("unknown event type '{0}'")]
    UnknownType(String),
    /// A member was missing or had the wrong JSON type.
    #[error("event member '{0}' is missing or malformed")]
    Field(&'static str),
    /// The `src` endpoint failed to parse.
    #[error(transparent)]
    Endpoint(#[from] EndpointParseError),
}

/// An event carried by `send` or returned by `poll`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A multicast message.
    Message(MulticastMessage),
    /// The terminal halt.
    Halt(Halt),
}

impl Event {
    /// Whether this is the terminal halt event.
    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }

    /// Encodes the event as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        match self {
            Self::Message(message) => {
                object.insert("src".to_owned(), Value::String(message.src.to_string()));
                if let Some(data) = &message.data {
                    object.insert("data".to_owned(), data.clone());
                }
            }
            Self::Halt(halt) => {
                object.insert("type".to_owned(), Value::from("halt"));
                object.insert("code".to_owned(), Value::from(halt.code));
                if let Some(text) = &halt.message {
                    object.insert("message".to_owned(), Value::from(text.as_str()));
                }
            }
        }
        Value::Object(object)
    }

    /// Decodes an event from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] when the value is not an object, names an
    /// unknown type, lacks a required member, or carries a bad endpoint.
    pub fn from_json(value: &Value) -> Result<Self, EventDecodeError> {
        let Value::Object(object) = value else {
            return Err(EventDecodeError::NotAnObject);
        };
        let kind = match object.get("type") {
            None => "msg",
            Some(Value::String(kind)) => kind.as_str(),
            Some(_) => return Err(EventDecodeError::Field("type")),
        };
        match kind {
            "msg" => {
                let src = object
                    .get("src")
                    .and_then(Value::as_str)
                    .ok_or(EventDecodeError::Field("src"))?
                    .parse()?;
                Ok(Self::Message(MulticastMessage::new(
                    src,
                    object.get("data").cloned(),
                )))
            }
            "halt" => {
                let code = object
                    .get("code")
                    .and_then(Value::as_i64)
                    .ok_or(EventDecodeError::Field("code"))?;
                let message = match object.get("message") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(text)) => Some(text.clone()),
                    Some(_) => return Err(EventDecodeError::Field("message")),
                };
                Ok(Self::Halt(Halt::new(code, message)))
            }
            other => Err(EventDecodeError::UnknownType(other.to_owned())),
        }
    }
}

impl From<MulticastMessage> for Event {
    fn from(message: MulticastMessage) -> Self {
        Self::Message(message)
    }
}

impl From<Halt> for Event {
    fn from(halt: Halt) -> Self {
        Self::Halt(halt)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

/// Whether any event in `events` is a halt.
#[must_use]
pub fn contains_halt(events: &[Event]) -> bool {
    events.iter().any(Event::is_halt)
}
