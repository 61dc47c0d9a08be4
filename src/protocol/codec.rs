//! Frame codec: one JSON object per text frame, keyed by its `type` tag.

use serde_json::Value;

use super::client_events::ClientEvent;
use super::event_type::{EventType, Origin};
use super::server_events::{RawEvent, ServerEvent};
use crate::{Error, Result};

/// Any event that can appear on the wire, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Client(ClientEvent),
    Server(ServerEvent),
}

impl Event {
    /// Decodes one frame.
    ///
    /// Unknown tags always succeed and produce [`ServerEvent::Unknown`]. A known
    /// tag whose required fields are missing or mistyped is a `MalformedEvent`.
    ///
    /// # Errors
    /// `Decode` if the frame is not a JSON object with a non-empty string `type`.
    #[allow(clippy::result_large_err)]
    pub fn decode(frame: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(frame).map_err(|err| Error::Decode(err.to_string()))?;
        let Value::Object(object) = value else {
            return Err(Error::Decode("frame is not a JSON object".to_string()));
        };
        let tag = match object.get("type") {
            Some(Value::String(tag)) if !tag.is_empty() => tag.clone(),
            Some(_) => return Err(Error::Decode("`type` must be a non-empty string".to_string())),
            None => return Err(Error::Decode("missing `type` field".to_string())),
        };

        let event_type = EventType::parse(&tag);
        if !event_type.is_known() {
            return Ok(Self::Server(ServerEvent::Unknown(RawEvent::from_object(
                object,
            ))));
        }

        let value = Value::Object(object);
        let malformed = |err: serde_json::Error| Error::MalformedEvent {
            event_type: event_type.clone(),
            reason: err.to_string(),
        };
        match event_type.origin() {
            Some(Origin::Client) => serde_json::from_value(value)
                .map(Self::Client)
                .map_err(malformed),
            _ => serde_json::from_value(value)
                .map(Self::Server)
                .map_err(malformed),
        }
    }

    /// Encodes to a JSON text frame. Total for every constructible event.
    ///
    /// # Errors
    /// Only if a payload contains a value JSON cannot represent (e.g. a NaN float).
    #[allow(clippy::result_large_err)]
    pub fn encode(&self) -> Result<String> {
        let frame = match self {
            Self::Client(event) => serde_json::to_string(event)?,
            Self::Server(ServerEvent::Unknown(raw)) => {
                serde_json::to_string(&Value::Object(raw.to_object()))?
            }
            Self::Server(event) => serde_json::to_string(event)?,
        };
        Ok(frame)
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Client(event) => event.event_type(),
            Self::Server(event) => event.event_type(),
        }
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Client(event) => event.event_id(),
            Self::Server(event) => event.event_id(),
        }
    }

    #[must_use]
    pub const fn origin(&self) -> Origin {
        match self {
            Self::Client(_) => Origin::Client,
            Self::Server(_) => Origin::Server,
        }
    }

    #[must_use]
    pub const fn as_server(&self) -> Option<&ServerEvent> {
        match self {
            Self::Server(event) => Some(event),
            Self::Client(_) => None,
        }
    }
}

impl From<ClientEvent> for Event {
    fn from(event: ClientEvent) -> Self {
        Self::Client(event)
    }
}

impl From<ServerEvent> for Event {
    fn from(event: ServerEvent) -> Self {
        Self::Server(event)
    }
}
