use base64::Engine;
use serde::{Deserialize, Serialize};

use super::event_type::EventType;
use super::models::{Item, ResponseConfig, SessionConfig};

/// Fresh outbound event id: `event_` followed by a v4 UUID in simple form.
#[must_use]
pub fn new_event_id() -> String {
    format!("event_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionConfig>,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
        item: Box<Item>,
    },
    #[serde(rename = "conversation.item.retrieve")]
    ConversationItemRetrieve {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item_id: String,
    },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item_id: String,
        content_index: u32,
        audio_end_ms: u32,
    },
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        item_id: String,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Box<ResponseConfig>>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_id: Option<String>,
    },
}

macro_rules! client_event_ids {
    ($($variant:ident),*) => {
        impl ClientEvent {
            #[must_use]
            pub const fn event_type(&self) -> EventType {
                match self {
                    $(Self::$variant { .. } => EventType::$variant,)*
                }
            }

            #[must_use]
            pub fn event_id(&self) -> Option<&str> {
                match self {
                    $(Self::$variant { event_id, .. } => event_id.as_deref(),)*
                }
            }

            fn event_id_slot(&mut self) -> &mut Option<String> {
                match self {
                    $(Self::$variant { event_id, .. } => event_id,)*
                }
            }
        }
    };
}

client_event_ids!(
    SessionUpdate,
    InputAudioBufferAppend,
    InputAudioBufferCommit,
    InputAudioBufferClear,
    ConversationItemCreate,
    ConversationItemRetrieve,
    ConversationItemTruncate,
    ConversationItemDelete,
    ResponseCreate,
    ResponseCancel
);

impl ClientEvent {
    /// Stamps a fresh id unless the caller already supplied one, and returns it.
    pub fn ensure_event_id(&mut self) -> &str {
        self.event_id_slot().get_or_insert_with(new_event_id)
    }

    #[must_use]
    pub fn session_update(session: SessionConfig) -> Self {
        Self::SessionUpdate {
            event_id: None,
            session: Box::new(session),
        }
    }

    /// Base64-encodes raw audio bytes into an `input_audio_buffer.append`.
    #[must_use]
    pub fn append_audio(audio: &[u8]) -> Self {
        Self::InputAudioBufferAppend {
            event_id: None,
            audio: base64::engine::general_purpose::STANDARD.encode(audio),
        }
    }

    #[must_use]
    pub const fn commit_audio() -> Self {
        Self::InputAudioBufferCommit { event_id: None }
    }

    #[must_use]
    pub const fn clear_audio() -> Self {
        Self::InputAudioBufferClear { event_id: None }
    }

    #[must_use]
    pub fn create_item(item: Item) -> Self {
        Self::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(item),
        }
    }

    #[must_use]
    pub fn truncate_item(item_id: impl Into<String>, content_index: u32, audio_end_ms: u32) -> Self {
        Self::ConversationItemTruncate {
            event_id: None,
            item_id: item_id.into(),
            content_index,
            audio_end_ms,
        }
    }

    #[must_use]
    pub fn delete_item(item_id: impl Into<String>) -> Self {
        Self::ConversationItemDelete {
            event_id: None,
            item_id: item_id.into(),
        }
    }

    #[must_use]
    pub fn retrieve_item(item_id: impl Into<String>) -> Self {
        Self::ConversationItemRetrieve {
            event_id: None,
            item_id: item_id.into(),
        }
    }

    #[must_use]
    pub fn create_response(config: Option<ResponseConfig>) -> Self {
        Self::ResponseCreate {
            event_id: None,
            response: config.map(Box::new),
        }
    }

    #[must_use]
    pub const fn cancel_response() -> Self {
        Self::ResponseCancel {
            event_id: None,
            response_id: None,
        }
    }
}
