use super::conversation::{ConversationItem, ItemKind};
use super::dispatcher::{Subscriber, SubscriptionId, SubscriptionIds};
use super::handlers::{EventHandler, OnceHandler};
use super::session::{self, SessionHandle, SessionSetup};
use super::tools::{ToolRegistry, ToolSpec};
use crate::config::ClientConfig;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::codec::Event;
use crate::protocol::event_type::EventType;
use crate::protocol::models::{ContentPart, Item, ResponseConfig, Role, SessionConfig, Tool};
use crate::protocol::server_events::ServerEvent;
use crate::protocol::validate::validate_client_event;
use crate::transport::{Transport, WsTransport};
use crate::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Session controller for one realtime connection at a time.
///
/// Persistent subscriptions, registered tools and the desired session
/// configuration live here and survive `disconnect`/`connect` cycles. The
/// connection itself (transport, conversation state, pending waits) belongs to
/// the event loop behind [`SessionHandle`] and is torn down on disconnect.
pub struct RealtimeClient {
    config: ClientConfig,
    initial_session: SessionConfig,
    tools: ToolRegistry,
    ids: SubscriptionIds,
    subscriptions: Vec<(SubscriptionId, EventType, EventHandler)>,
    pending_once: Vec<(SubscriptionId, EventType, OnceHandler)>,
    /// Last configuration acknowledged by the server.
    session: Option<SessionConfig>,
    handle: Option<SessionHandle>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.config.url)
            .field("model", &self.config.model)
            .field("tools", &self.tools)
            .field("subscriptions", &self.subscriptions.len())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RealtimeClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_tools(config, ToolRegistry::new())
    }

    #[must_use]
    pub fn with_tools(config: ClientConfig, tools: ToolRegistry) -> Self {
        Self {
            initial_session: config.session.clone(),
            config,
            tools,
            ids: SubscriptionIds::default(),
            subscriptions: Vec::new(),
            pending_once: Vec::new(),
            session: None,
            handle: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Configuration acknowledged by the server, if connected.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn handle(&self) -> Option<&SessionHandle> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(SessionHandle::is_connected)
    }

    /// Opens the WebSocket and negotiates the session.
    ///
    /// # Errors
    /// Configuration errors, handshake failures (`Authentication`, `Connection`),
    /// `HandshakeTimeout` when `session.created` never arrives, or the error of
    /// the initial `session.update`. An initial update the server never
    /// acknowledges is logged and leaves the `session.created` snapshot in place.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_disconnected()?;
        self.config.validate()?;
        let api_key = self.config.resolve_api_key()?;
        let transport = WsTransport::open(
            &self.config.url,
            &self.config.model,
            &api_key,
            &self.config.headers(),
        )
        .await?;
        self.connect_with(Box::new(transport)).await
    }

    /// Negotiates a session over an already open transport.
    ///
    /// # Errors
    /// Same as [`RealtimeClient::connect`], minus the transport handshake.
    pub async fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.ensure_disconnected()?;
        self.config.validate()?;

        let (created_tx, created_rx) = oneshot::channel();
        let mut subscriptions: Vec<(SubscriptionId, EventType, Subscriber)> = self
            .subscriptions
            .iter()
            .map(|(id, tag, handler)| (*id, tag.clone(), Subscriber::Persistent(Arc::clone(handler))))
            .collect();
        subscriptions.extend(
            self.pending_once
                .drain(..)
                .map(|(id, tag, handler)| (id, tag, Subscriber::Once(handler))),
        );
        subscriptions.push((
            self.ids.next_id(),
            EventType::SessionCreated,
            Subscriber::Waiter(created_tx),
        ));

        let handle = session::spawn(
            transport,
            SessionSetup {
                tools: self.tools.clone(),
                ids: self.ids.clone(),
                subscriptions,
                tool_timeout: self.config.tool_timeout,
                sample_rate: self.config.sample_rate,
                side_table_capacity: self.config.side_table_capacity,
            },
        );

        let timeout = self.config.handshake_timeout;
        let created = match tokio::time::timeout(timeout, created_rx).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => return Err(Error::ConnectionClosed),
            Err(_) => {
                tracing::warn!(?timeout, "no session.created, closing transport");
                handle.shutdown().await;
                return Err(Error::HandshakeTimeout(timeout));
            }
        };
        if let Event::Server(ServerEvent::SessionCreated { session, .. }) = created {
            tracing::info!(session_id = %session.id, model = ?session.model, "Realtime session created");
            self.session = Some(session.config);
        }
        self.handle = Some(handle);

        match self.update_session(SessionConfig::default()).await {
            Ok(()) => Ok(()),
            Err(Error::AckTimeout { timeout, .. }) => {
                tracing::warn!(?timeout, "initial session.update not acknowledged");
                Ok(())
            }
            Err(err) => {
                self.disconnect().await;
                Err(err)
            }
        }
    }

    /// Closes the connection. Conversation state is dropped and outstanding
    /// waits resolve to `None`; subscriptions and tools are kept for the next
    /// `connect`.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await;
            tracing::info!("Disconnected from realtime endpoint");
        }
        self.session = None;
    }

    /// Disconnects and drops subscriptions, tools and session changes made
    /// since construction.
    pub async fn reset(&mut self) {
        self.disconnect().await;
        self.subscriptions.clear();
        self.pending_once.clear();
        self.tools.clear();
        self.config.session = self.initial_session.clone();
    }

    /// Overlays `update` onto the desired configuration and, when connected,
    /// sends it and waits for `session.updated`.
    ///
    /// While disconnected the change is only recorded and applied on the next
    /// `connect`.
    ///
    /// # Errors
    /// `InvalidClientEvent` if the merged configuration would be rejected, in
    /// which case nothing is recorded. `AckTimeout` if the server does not
    /// acknowledge within the ack timeout; the acknowledged snapshot is left
    /// unchanged.
    pub async fn update_session(&mut self, update: SessionConfig) -> Result<()> {
        let next = self.config.session.merged(&update);
        let desired = self.desired_session(&next);
        let event = ClientEvent::session_update(desired.clone());
        validate_client_event(&event)?;
        let Some(handle) = self.handle.clone().filter(SessionHandle::is_connected) else {
            self.config.session = next;
            return Ok(());
        };

        let wait = handle.waiter(EventType::SessionUpdated)?;
        let event_id = handle.send(event)?;
        self.config.session = next;
        tracing::debug!(%event_id, "session.update sent");

        let timeout = self.config.ack_timeout;
        if wait.resolve(timeout).await.is_some() {
            let current = self.session.take().unwrap_or_default();
            self.session = Some(current.merged(&desired));
            tracing::debug!(%event_id, "session.update acknowledged");
            Ok(())
        } else if handle.is_connected() {
            Err(Error::AckTimeout {
                event_type: EventType::SessionUpdate,
                timeout,
            })
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    /// Subscribes for every event with `tag` until [`RealtimeClient::off`].
    pub fn on(&mut self, tag: impl Into<EventType>, handler: EventHandler) -> SubscriptionId {
        let tag = tag.into();
        let id = self.ids.next_id();
        if let Some(handle) = &self.handle {
            handle.subscribe_with(id, tag.clone(), Subscriber::Persistent(Arc::clone(&handler)));
        }
        self.subscriptions.push((id, tag, handler));
        id
    }

    /// Subscribes for the next event with `tag` only. Registered while
    /// disconnected, it is installed on the next `connect`.
    pub fn on_next(&mut self, tag: impl Into<EventType>, handler: OnceHandler) -> SubscriptionId {
        let tag = tag.into();
        let id = self.ids.next_id();
        match &self.handle {
            Some(handle) if handle.is_connected() => {
                handle.subscribe_with(id, tag, Subscriber::Once(handler));
            }
            _ => self.pending_once.push((id, tag, handler)),
        }
        id
    }

    pub fn off(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|(existing, _, _)| *existing != id);
        self.pending_once.retain(|(existing, _, _)| *existing != id);
        if let Some(handle) = &self.handle {
            handle.off(id);
        }
    }

    /// Next event with `tag`, or `None` on timeout or when not connected.
    pub async fn wait_for_next(&self, tag: impl Into<EventType>, timeout: Duration) -> Option<Event> {
        let handle = self.handle.as_ref()?;
        handle.wait_for_next(tag.into(), timeout).await
    }

    /// Sends a raw client event. Returns the event id it was sent with.
    ///
    /// # Errors
    /// `NotConnected`, or a validation error.
    #[allow(clippy::result_large_err)]
    pub fn send(&self, event: ClientEvent) -> Result<String> {
        self.connected()?.send(event)
    }

    /// Adds a user message and asks for a response.
    ///
    /// # Errors
    /// `NotConnected`, or a validation error.
    #[allow(clippy::result_large_err)]
    pub fn send_user_message(&self, content: Vec<ContentPart>) -> Result<()> {
        let handle = self.connected()?;
        handle.send(ClientEvent::create_item(Item::Message {
            id: None,
            status: None,
            role: Role::User,
            content,
        }))?;
        handle.create_response(None)
    }

    /// Text-only shorthand for [`RealtimeClient::send_user_message`].
    ///
    /// # Errors
    /// Same as [`RealtimeClient::send_user_message`].
    #[allow(clippy::result_large_err)]
    pub fn say(&self, text: impl Into<String>) -> Result<()> {
        self.send_user_message(vec![ContentPart::InputText { text: text.into() }])
    }

    /// Appends raw input audio. Empty chunks are ignored.
    ///
    /// # Errors
    /// `NotConnected`, or `InvalidClientEvent` for an oversized chunk.
    #[allow(clippy::result_large_err)]
    pub fn append_input_audio(&self, audio: &[u8]) -> Result<()> {
        if audio.is_empty() {
            return Ok(());
        }
        self.connected()?.append_input_audio(audio)
    }

    /// # Errors
    /// `NotConnected`.
    #[allow(clippy::result_large_err)]
    pub fn commit_input_audio(&self) -> Result<()> {
        self.connected()?.commit_input_audio()
    }

    /// # Errors
    /// `NotConnected`.
    #[allow(clippy::result_large_err)]
    pub fn clear_input_audio(&self) -> Result<()> {
        self.connected()?.clear_input_audio()
    }

    /// Commits captured input audio, if any, then requests a response.
    ///
    /// # Errors
    /// `NotConnected`, or a validation error.
    #[allow(clippy::result_large_err)]
    pub fn create_response(&self, config: Option<ResponseConfig>) -> Result<()> {
        self.connected()?.create_response(config)
    }

    /// Cancels the in-flight response.
    ///
    /// With an `item_id`, the assistant item being played is also truncated to
    /// the `played_bytes` the listener actually heard, and the item as stored
    /// before truncation is returned.
    ///
    /// # Errors
    /// `NotConnected`, or `InvalidClientEvent` if the item is unknown or is not
    /// an assistant message.
    #[allow(clippy::result_large_err)]
    pub fn cancel_response(
        &self,
        item_id: Option<&str>,
        played_bytes: usize,
    ) -> Result<Option<ConversationItem>> {
        let handle = self.connected()?;
        let Some(item_id) = item_id else {
            handle.send(ClientEvent::cancel_response())?;
            return Ok(None);
        };

        let item = handle
            .item(item_id)
            .ok_or_else(|| Error::InvalidClientEvent(format!("cannot cancel unknown item {item_id}")))?;
        if item.kind != ItemKind::Message || item.role != Some(Role::Assistant) {
            return Err(Error::InvalidClientEvent(format!(
                "item {item_id} is not an assistant message"
            )));
        }
        let content_index = match &item.raw {
            Item::Message { content, .. } => content
                .iter()
                .position(|part| matches!(part, ContentPart::Audio { .. }))
                .unwrap_or(0),
            _ => 0,
        };

        handle.send(ClientEvent::cancel_response())?;
        let audio_end_ms = self.played_ms(played_bytes);
        let content_index = u32::try_from(content_index).unwrap_or(u32::MAX);
        handle.send(ClientEvent::truncate_item(item_id, content_index, audio_end_ms))?;
        Ok(Some(item))
    }

    /// # Errors
    /// `NotConnected`, or `InvalidClientEvent` for an empty id.
    #[allow(clippy::result_large_err)]
    pub fn delete_item(&self, item_id: &str) -> Result<()> {
        self.send(ClientEvent::delete_item(item_id)).map(drop)
    }

    /// # Errors
    /// `NotConnected`, or `InvalidClientEvent` for an empty id.
    #[allow(clippy::result_large_err)]
    pub fn truncate_item(&self, item_id: &str, content_index: u32, audio_end_ms: u32) -> Result<()> {
        self.send(ClientEvent::truncate_item(item_id, content_index, audio_end_ms))
            .map(drop)
    }

    /// Asks the server to re-send an item; the reply arrives as
    /// `conversation.item.retrieved`.
    ///
    /// # Errors
    /// `NotConnected`, or `InvalidClientEvent` for an empty id.
    #[allow(clippy::result_large_err)]
    pub fn retrieve_item(&self, item_id: &str) -> Result<()> {
        self.send(ClientEvent::retrieve_item(item_id)).map(drop)
    }

    /// Conversation items in creation order; empty when not connected.
    #[must_use]
    pub fn items(&self) -> Vec<ConversationItem> {
        self.handle
            .as_ref()
            .map(SessionHandle::items)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<ConversationItem> {
        self.handle.as_ref()?.item(id)
    }

    /// Registers a tool; when connected the new definitions are pushed with
    /// `session.update`.
    ///
    /// # Errors
    /// Registration errors, or the `session.update` error.
    pub async fn add_tool<F, Fut>(&mut self, tool: Tool, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.tools.add(tool, handler)?;
        self.sync_tools().await
    }

    /// # Errors
    /// Same as [`RealtimeClient::add_tool`].
    pub async fn register_tool<T: ToolSpec>(&mut self, spec: T) -> Result<()> {
        self.tools.register(spec)?;
        self.sync_tools().await
    }

    /// Returns whether a tool with that name was registered.
    ///
    /// # Errors
    /// The `session.update` error when connected.
    pub async fn remove_tool(&mut self, name: &str) -> Result<bool> {
        if !self.tools.remove(name) {
            return Ok(false);
        }
        self.sync_tools().await?;
        Ok(true)
    }

    async fn sync_tools(&mut self) -> Result<()> {
        let Some(handle) = &self.handle else {
            return Ok(());
        };
        handle.set_tools(self.tools.clone());
        let tools = self.config.session.tools.clone().unwrap_or_default();
        self.update_session(SessionConfig {
            tools: Some(tools),
            ..SessionConfig::default()
        })
        .await
    }

    /// Desired configuration with registered tool definitions taking
    /// precedence over configured ones of the same name.
    fn desired_session(&self, session: &SessionConfig) -> SessionConfig {
        let mut session = session.clone();
        if self.tools.is_empty() {
            return session;
        }
        let mut tools = session.tools.take().unwrap_or_default();
        tools.retain(|tool| !self.tools.contains(tool.name()));
        tools.extend(self.tools.as_tools());
        session.tools = Some(tools);
        session
    }

    fn played_ms(&self, played_bytes: usize) -> u32 {
        let bytes = u64::try_from(played_bytes).unwrap_or(u64::MAX);
        let ms = bytes.saturating_mul(1000) / u64::from(self.config.sample_rate.max(1));
        u32::try_from(ms).unwrap_or(u32::MAX)
    }

    #[allow(clippy::result_large_err)]
    fn connected(&self) -> Result<&SessionHandle> {
        self.handle
            .as_ref()
            .filter(|handle| handle.is_connected())
            .ok_or(Error::NotConnected)
    }

    #[allow(clippy::result_large_err)]
    fn ensure_disconnected(&self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::Connection("already connected".to_string()));
        }
        Ok(())
    }
}
