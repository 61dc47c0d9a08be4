//! Closed set of event type tags plus the dispatcher's wildcard buckets.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Which side of the connection produces an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Client,
    Server,
}

impl Origin {
    /// The wildcard bucket that collects every event of this origin.
    #[must_use]
    pub const fn wildcard(self) -> EventType {
        match self {
            Self::Client => EventType::ClientAll,
            Self::Server => EventType::ServerAll,
        }
    }
}

macro_rules! event_types {
    (
        client { $($cvariant:ident => $ctag:literal,)* }
        server { $($svariant:ident => $stag:literal,)* }
        wildcard { $($wvariant:ident => $wtag:literal,)* }
    ) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($cvariant,)*
            $($svariant,)*
            $($wvariant,)*
            /// Any tag this client does not interpret.
            Other(String),
        }

        impl EventType {
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$cvariant => $ctag,)*
                    $(Self::$svariant => $stag,)*
                    $(Self::$wvariant => $wtag,)*
                    Self::Other(tag) => tag,
                }
            }

            /// Maps a wire tag to its variant; unrecognized tags become `Other`.
            #[must_use]
            pub fn parse(tag: &str) -> Self {
                match tag {
                    $($ctag => Self::$cvariant,)*
                    $($stag => Self::$svariant,)*
                    $($wtag => Self::$wvariant,)*
                    other => Self::Other(other.to_string()),
                }
            }

            /// Static origin classification. Wildcards have none; tags the client
            /// does not know are assumed to come from the server.
            #[must_use]
            pub const fn origin(&self) -> Option<Origin> {
                match self {
                    $(Self::$cvariant)|* => Some(Origin::Client),
                    $(Self::$wvariant)|* => None,
                    _ => Some(Origin::Server),
                }
            }
        }
    };
}

event_types! {
    client {
        SessionUpdate => "session.update",
        InputAudioBufferAppend => "input_audio_buffer.append",
        InputAudioBufferCommit => "input_audio_buffer.commit",
        InputAudioBufferClear => "input_audio_buffer.clear",
        ConversationItemCreate => "conversation.item.create",
        ConversationItemRetrieve => "conversation.item.retrieve",
        ConversationItemTruncate => "conversation.item.truncate",
        ConversationItemDelete => "conversation.item.delete",
        ResponseCreate => "response.create",
        ResponseCancel => "response.cancel",
    }
    server {
        Error => "error",
        SessionCreated => "session.created",
        SessionUpdated => "session.updated",
        ConversationCreated => "conversation.created",
        InputAudioBufferCommitted => "input_audio_buffer.committed",
        InputAudioBufferCleared => "input_audio_buffer.cleared",
        InputAudioBufferSpeechStarted => "input_audio_buffer.speech_started",
        InputAudioBufferSpeechStopped => "input_audio_buffer.speech_stopped",
        ConversationItemCreated => "conversation.item.created",
        ConversationItemRetrieved => "conversation.item.retrieved",
        ConversationItemTruncated => "conversation.item.truncated",
        ConversationItemDeleted => "conversation.item.deleted",
        InputAudioTranscriptionCompleted => "conversation.item.input_audio_transcription.completed",
        InputAudioTranscriptionFailed => "conversation.item.input_audio_transcription.failed",
        ResponseCreated => "response.created",
        ResponseDone => "response.done",
        ResponseOutputItemAdded => "response.output_item.added",
        ResponseOutputItemDone => "response.output_item.done",
        ResponseContentPartAdded => "response.content_part.added",
        ResponseContentPartDone => "response.content_part.done",
        ResponseTextDelta => "response.text.delta",
        ResponseTextDone => "response.text.done",
        ResponseAudioTranscriptDelta => "response.audio_transcript.delta",
        ResponseAudioTranscriptDone => "response.audio_transcript.done",
        ResponseAudioDelta => "response.audio.delta",
        ResponseAudioDone => "response.audio.done",
        ResponseFunctionCallArgumentsDelta => "response.function_call_arguments.delta",
        ResponseFunctionCallArgumentsDone => "response.function_call_arguments.done",
        RateLimitsUpdated => "rate_limits.updated",
    }
    wildcard {
        All => "*",
        ServerAll => "server.*",
        ClientAll => "client.*",
    }
}

impl EventType {
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        self.origin().is_none()
    }

    /// True for tags the client models with a typed payload.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_)) && !self.is_wildcard()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    /// Empty or whitespace-only tags are programmer errors.
    fn from_str(tag: &str) -> Result<Self> {
        if tag.trim().is_empty() || tag.chars().any(char::is_whitespace) {
            return Err(Error::InvalidEventType(tag.to_string()));
        }
        Ok(Self::parse(tag))
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        Self::parse(tag)
    }
}
