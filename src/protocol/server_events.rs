use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event_type::EventType;
use super::models::{ContentPart, Item, Response, Session};
use crate::error::ServerError;
use crate::{Error, Result};

/// Inbound events.
///
/// Known tags deserialize into typed variants. Tags this client does not
/// interpret are kept as [`RawEvent`] by the codec; the `Unknown` variant is
/// skipped by serde, so frames should go through [`Event`](super::codec::Event)
/// rather than `serde_json` directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        event_id: String,
        session: Session,
    },
    #[serde(rename = "conversation.created")]
    ConversationCreated {
        #[serde(default)]
        event_id: String,
        conversation: Conversation,
    },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted {
        #[serde(default)]
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared {
        #[serde(default)]
        event_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        #[serde(default)]
        event_id: String,
        audio_start_ms: u32,
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        #[serde(default)]
        event_id: String,
        audio_end_ms: u32,
        item_id: String,
    },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        event_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Item,
    },
    #[serde(rename = "conversation.item.retrieved")]
    ConversationItemRetrieved {
        #[serde(default)]
        event_id: String,
        item: Item,
    },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        #[serde(default)]
        event_id: String,
        item_id: String,
        content_index: u32,
        audio_end_ms: u32,
    },
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted {
        #[serde(default)]
        event_id: String,
        item_id: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        #[serde(default)]
        event_id: String,
        item_id: String,
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputAudioTranscriptionFailed {
        #[serde(default)]
        event_id: String,
        item_id: String,
        content_index: u32,
        error: ServerError,
    },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        event_id: String,
        response: Response,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        event_id: String,
        response: Response,
    },
    #[serde(rename = "response.output_item.added")]
    ResponseOutputItemAdded {
        #[serde(default)]
        event_id: String,
        response_id: String,
        output_index: u32,
        item: Item,
    },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        output_index: u32,
        item: Item,
    },
    #[serde(rename = "response.content_part.added")]
    ResponseContentPartAdded {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },
    #[serde(rename = "response.content_part.done")]
    ResponseContentPartDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        part: ContentPart,
    },
    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.text.done")]
    ResponseTextDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        text: String,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    ResponseAudioTranscriptDelta {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.audio_transcript.done")]
    ResponseAudioTranscriptDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        /// Base64-encoded audio bytes.
        delta: String,
    },
    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        call_id: String,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    ResponseFunctionCallArgumentsDone {
        #[serde(default)]
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments: String,
    },
    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        event_id: String,
        rate_limits: Vec<RateLimit>,
    },
    #[serde(skip)]
    Unknown(RawEvent),
}

macro_rules! server_event_meta {
    ($($variant:ident),* $(,)?) => {
        impl ServerEvent {
            #[must_use]
            pub fn event_type(&self) -> EventType {
                match self {
                    $(Self::$variant { .. } => EventType::$variant,)*
                    Self::Unknown(raw) => EventType::parse(&raw.event_type),
                }
            }

            #[must_use]
            pub fn event_id(&self) -> Option<&str> {
                match self {
                    $(Self::$variant { event_id, .. } => Some(event_id.as_str()),)*
                    Self::Unknown(raw) => raw.event_id.as_deref(),
                }
            }
        }
    };
}

server_event_meta!(
    Error,
    SessionCreated,
    SessionUpdated,
    ConversationCreated,
    InputAudioBufferCommitted,
    InputAudioBufferCleared,
    InputAudioBufferSpeechStarted,
    InputAudioBufferSpeechStopped,
    ConversationItemCreated,
    ConversationItemRetrieved,
    ConversationItemTruncated,
    ConversationItemDeleted,
    InputAudioTranscriptionCompleted,
    InputAudioTranscriptionFailed,
    ResponseCreated,
    ResponseDone,
    ResponseOutputItemAdded,
    ResponseOutputItemDone,
    ResponseContentPartAdded,
    ResponseContentPartDone,
    ResponseTextDelta,
    ResponseTextDone,
    ResponseAudioTranscriptDelta,
    ResponseAudioTranscriptDone,
    ResponseAudioDelta,
    ResponseAudioDone,
    ResponseFunctionCallArgumentsDelta,
    ResponseFunctionCallArgumentsDone,
    RateLimitsUpdated,
);

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    #[serde(default = "default_conversation_object")]
    pub object: String,
}

fn default_conversation_object() -> String {
    "realtime.conversation".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimit {
    pub name: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_seconds: f32,
}

/// Event with a tag the client does not interpret: the envelope plus every
/// other field as received.
///
/// The tag is never one with a typed [`ServerEvent`] variant, so an encoded
/// raw event decodes back to itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    event_id: Option<String>,
    event_type: String,
    fields: Map<String, Value>,
}

impl RawEvent {
    /// # Errors
    /// `InvalidEventType` for a blank tag, a wildcard, or a tag this client
    /// decodes into a typed event.
    #[allow(clippy::result_large_err)]
    pub fn new(
        event_type: impl Into<String>,
        event_id: Option<String>,
        mut fields: Map<String, Value>,
    ) -> Result<Self> {
        let event_type = event_type.into();
        if event_type.trim().is_empty() || !matches!(EventType::parse(&event_type), EventType::Other(_)) {
            return Err(Error::InvalidEventType(event_type));
        }
        fields.insert("type".to_string(), Value::String(event_type));
        if let Some(id) = event_id {
            fields.insert("event_id".to_string(), Value::String(id));
        }
        Ok(Self::from_object(fields))
    }

    /// Splits `event_id` and `type` out of a decoded JSON object whose tag
    /// has already been checked as unknown.
    pub(crate) fn from_object(mut object: Map<String, Value>) -> Self {
        let event_type = match object.remove("type") {
            Some(Value::String(tag)) => tag,
            _ => String::new(),
        };
        let event_id = match object.remove("event_id") {
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                object.insert("event_id".to_string(), other);
                None
            }
            None => None,
        };
        Self {
            event_id,
            event_type,
            fields: object,
        }
    }

    #[must_use]
    pub fn to_object(&self) -> Map<String, Value> {
        let mut object = self.fields.clone();
        object.insert("type".to_string(), Value::String(self.event_type.clone()));
        if let Some(id) = &self.event_id {
            object.insert("event_id".to_string(), Value::String(id.clone()));
        }
        object
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    /// Every field except `type` and a string `event_id`.
    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}
