use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ArbitraryJson, ItemStatus, Role};

/// Conversation item as it travels inside `conversation.item.*` and
/// `response.output_item.*` events.
///
/// Manual (de)serialization keeps unknown item types as raw JSON while known
/// items stay strongly typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Message {
        id: Option<String>,
        status: Option<ItemStatus>,
        role: Role,
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        status: Option<ItemStatus>,
        call_id: String,
        output: String,
    },
    Unknown(ArbitraryJson),
}

impl Item {
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::Message {
            id: None,
            status: None,
            role: Role::User,
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            id: None,
            status: None,
            call_id: call_id.into(),
            output: output.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Message { id, .. }
            | Self::FunctionCall { id, .. }
            | Self::FunctionCallOutput { id, .. } => id.as_deref(),
            Self::Unknown(value) => value.get("id").and_then(ArbitraryJson::as_str),
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<ItemStatus> {
        match self {
            Self::Message { status, .. }
            | Self::FunctionCall { status, .. }
            | Self::FunctionCallOutput { status, .. } => *status,
            Self::Unknown(value) => value
                .get("status")
                .and_then(|status| ItemStatus::deserialize(status).ok()),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            Self::Message { role, .. } => Some(*role),
            _ => None,
        }
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Message { .. } => "message",
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::Unknown(value) => value
                .get("type")
                .and_then(ArbitraryJson::as_str)
                .unwrap_or("unknown"),
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemRepr {
    Message {
        id: Option<String>,
        status: Option<ItemStatus>,
        role: Role,
        #[serde(default)]
        content: Vec<ContentPart>,
    },
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        status: Option<ItemStatus>,
        call_id: String,
        output: String,
    },
}

impl From<ItemRepr> for Item {
    fn from(repr: ItemRepr) -> Self {
        match repr {
            ItemRepr::Message {
                id,
                status,
                role,
                content,
            } => Self::Message {
                id,
                status,
                role,
                content,
            },
            ItemRepr::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            } => Self::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            },
            ItemRepr::FunctionCallOutput {
                id,
                status,
                call_id,
                output,
            } => Self::FunctionCallOutput {
                id,
                status,
                call_id,
                output,
            },
        }
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Unknown(value) => value.serialize(serializer),
            Self::Message {
                id,
                status,
                role,
                content,
            } => {
                let mut state = serializer.serialize_struct("Item", 5)?;
                state.serialize_field("type", "message")?;
                if let Some(value) = id {
                    state.serialize_field("id", value)?;
                }
                if let Some(value) = status {
                    state.serialize_field("status", value)?;
                }
                state.serialize_field("role", role)?;
                state.serialize_field("content", content)?;
                state.end()
            }
            Self::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            } => {
                let mut state = serializer.serialize_struct("Item", 6)?;
                state.serialize_field("type", "function_call")?;
                if let Some(value) = id {
                    state.serialize_field("id", value)?;
                }
                if let Some(value) = status {
                    state.serialize_field("status", value)?;
                }
                state.serialize_field("name", name)?;
                state.serialize_field("call_id", call_id)?;
                state.serialize_field("arguments", arguments)?;
                state.end()
            }
            Self::FunctionCallOutput {
                id,
                status,
                call_id,
                output,
            } => {
                let mut state = serializer.serialize_struct("Item", 5)?;
                state.serialize_field("type", "function_call_output")?;
                if let Some(value) = id {
                    state.serialize_field("id", value)?;
                }
                if let Some(value) = status {
                    state.serialize_field("status", value)?;
                }
                state.serialize_field("call_id", call_id)?;
                state.serialize_field("output", output)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(serde::de::Error::custom("item must be a JSON object"));
        }
        match ItemRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Keeping item as raw JSON: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

/// One part of a message item's content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    InputText {
        text: String,
    },
    InputAudio {
        audio: Option<String>,
        transcript: Option<String>,
    },
    Text {
        text: String,
    },
    Audio {
        audio: Option<String>,
        transcript: Option<String>,
    },
    ItemReference {
        id: String,
    },
    Unknown(ArbitraryJson),
}

impl std::fmt::Display for ContentPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::InputText { .. } => "input_text",
            Self::InputAudio { .. } => "input_audio",
            Self::Text { .. } => "text",
            Self::Audio { .. } => "audio",
            Self::ItemReference { .. } => "item_reference",
            Self::Unknown(_) => "unknown",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPartRepr {
    InputText {
        text: String,
    },
    InputAudio {
        audio: Option<String>,
        transcript: Option<String>,
    },
    Text {
        text: String,
    },
    Audio {
        audio: Option<String>,
        transcript: Option<String>,
    },
    ItemReference {
        id: String,
    },
}

impl From<ContentPartRepr> for ContentPart {
    fn from(repr: ContentPartRepr) -> Self {
        match repr {
            ContentPartRepr::InputText { text } => Self::InputText { text },
            ContentPartRepr::InputAudio { audio, transcript } => {
                Self::InputAudio { audio, transcript }
            }
            ContentPartRepr::Text { text } => Self::Text { text },
            ContentPartRepr::Audio { audio, transcript } => Self::Audio { audio, transcript },
            ContentPartRepr::ItemReference { id } => Self::ItemReference { id },
        }
    }
}

fn serialize_audio_part<S>(
    serializer: S,
    tag: &'static str,
    audio: Option<&String>,
    transcript: Option<&String>,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut state = serializer.serialize_struct("ContentPart", 3)?;
    state.serialize_field("type", tag)?;
    if let Some(value) = audio {
        state.serialize_field("audio", value)?;
    }
    if let Some(value) = transcript {
        state.serialize_field("transcript", value)?;
    }
    state.end()
}

impl Serialize for ContentPart {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Unknown(value) => value.serialize(serializer),
            Self::InputText { text } | Self::Text { text } => {
                let tag = if matches!(self, Self::InputText { .. }) {
                    "input_text"
                } else {
                    "text"
                };
                let mut state = serializer.serialize_struct("ContentPart", 2)?;
                state.serialize_field("type", tag)?;
                state.serialize_field("text", text)?;
                state.end()
            }
            Self::InputAudio { audio, transcript } => {
                serialize_audio_part(serializer, "input_audio", audio.as_ref(), transcript.as_ref())
            }
            Self::Audio { audio, transcript } => {
                serialize_audio_part(serializer, "audio", audio.as_ref(), transcript.as_ref())
            }
            Self::ItemReference { id } => {
                let mut state = serializer.serialize_struct("ContentPart", 2)?;
                state.serialize_field("type", "item_reference")?;
                state.serialize_field("id", id)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ContentPart {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        match ContentPartRepr::deserialize(value.clone()) {
            Ok(repr) => Ok(repr.into()),
            Err(err) => {
                tracing::debug!("Keeping content part as raw JSON: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_item_type_is_preserved() {
        let raw = json!({"type": "mcp_call", "id": "item_9", "server_label": "x"});
        let item: Item = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(item, Item::Unknown(_)));
        assert_eq!(item.id(), Some("item_9"));
        assert_eq!(item.to_string(), "mcp_call");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn function_call_arguments_default_to_empty() {
        let item: Item = serde_json::from_value(json!({
            "type": "function_call",
            "id": "item_1",
            "status": "in_progress",
            "name": "get_weather",
            "call_id": "call_1"
        }))
        .unwrap();
        assert!(matches!(
            item,
            Item::FunctionCall { ref arguments, .. } if arguments.is_empty()
        ));
        assert_eq!(item.status(), Some(ItemStatus::InProgress));
    }

    #[test]
    fn user_text_serializes_without_empty_fields() {
        let value = serde_json::to_value(Item::user_text("hi")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": "hi"}]
            })
        );
    }
}
