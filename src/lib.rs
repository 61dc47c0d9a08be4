#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Client for realtime conversational sessions over WebSocket.
//!
//! ```no_run
//! use oai_rt_session::{Realtime, handler};
//!
//! # async fn run() -> oai_rt_session::Result<()> {
//! let mut client = Realtime::builder().instructions("Answer briefly.").connect().await?;
//! client.on(
//!     "response.text.done",
//!     handler(|event| async move {
//!         println!("{event:?}");
//!         Ok(())
//!     }),
//! );
//! client.say("Hello!")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod transport;

pub use config::ClientConfig;
pub use error::{ApiErrorType, Error, Result, ServerError};
pub use protocol::client_events::ClientEvent;
pub use protocol::codec::Event;
pub use protocol::event_type::{EventType, Origin};
pub use protocol::models::{
    AudioFormat, ContentPart, Eagerness, InputAudioTranscription, Item, ItemStatus, MaxTokens,
    Modality, Response, ResponseConfig, ResponseStatus, Role, Session, SessionConfig, Temperature,
    Tool, ToolChoice, ToolChoiceMode, TurnDetection, Usage,
};
pub use protocol::server_events::{RawEvent, ServerEvent};
pub use sdk::{
    ConversationItem, EventHandler, ItemKind, OnceHandler, Realtime, RealtimeBuilder,
    RealtimeClient, SessionHandle, SubscriptionId, ToolCall, ToolOutcome, ToolRegistry,
    ToolResult, ToolSpec, handler, once_handler,
};
pub use transport::{ConnectionState, Transport, WsTransport};
