//! High-level session layer over the realtime protocol.
//!
//! [`RealtimeClient`] owns the connection lifecycle, subscriptions and tools;
//! each connection runs one event loop ([`session`]) that folds server events
//! into a [`ConversationStore`] and answers function calls from the
//! [`ToolRegistry`]. The wire types stay reachable through `crate::protocol`.

mod builder;
mod client;
pub mod conversation;
pub mod dispatcher;
mod handlers;
pub mod session;
mod tools;

pub use builder::{Realtime, RealtimeBuilder};
pub use client::RealtimeClient;
pub use conversation::{
    ConversationItem, ConversationStore, ItemDelta, ItemKind, ItemUpdate, ToolCallState,
};
pub use dispatcher::{Dispatcher, Subscriber, SubscriptionId};
pub use handlers::{BoxFuture, EventHandler, OnceHandler, handler, once_handler};
pub use session::{PendingWait, SessionHandle};
pub use tools::{
    BoxFuture as ToolFuture, ToolCall, ToolDefinition, ToolOutcome, ToolRegistry, ToolResult,
    ToolSpec, parse_arguments,
};
