//! Per-connection event loop.
//!
//! One task owns the transport, the dispatcher, the conversation store and a
//! copy of the tool registry. It alternates between commands from
//! [`SessionHandle`]s and inbound frames, so none of that state needs a lock.
//! Inbound frames are handled strictly in arrival order and every subscriber
//! for one event is awaited before the next frame is read.
//!
//! Handles never wait on the loop for reads. Connection state and the
//! conversation store are published through `watch` channels, so subscribers
//! and tool handlers can inspect them while the loop is awaiting them.

use super::conversation::{ConversationItem, ConversationStore};
use super::dispatcher::{Dispatcher, Subscriber, SubscriptionId, SubscriptionIds};
use super::handlers::{EventHandler, OnceHandler};
use super::tools::{ToolCall, ToolOutcome, ToolRegistry, parse_arguments};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::codec::Event;
use crate::protocol::event_type::EventType;
use crate::protocol::models::{Item, ResponseConfig};
use crate::protocol::server_events::ServerEvent;
use crate::protocol::validate::validate_client_event;
use crate::transport::{CLOSE_NORMAL, ConnectionState, Transport};
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

enum Command {
    Send(ClientEvent),
    Subscribe {
        id: SubscriptionId,
        tag: EventType,
        subscriber: Subscriber,
    },
    Unsubscribe(SubscriptionId),
    SetTools(ToolRegistry),
    AppendAudio {
        event: ClientEvent,
        audio: Vec<u8>,
    },
    CommitAudio,
    ClearAudio,
    CreateResponse(Option<ResponseConfig>),
    Reset,
    Shutdown(oneshot::Sender<()>),
}

/// Everything the event loop starts with.
pub struct SessionSetup {
    pub tools: ToolRegistry,
    pub ids: SubscriptionIds,
    /// Installed before the first frame is read.
    pub subscriptions: Vec<(SubscriptionId, EventType, Subscriber)>,
    pub tool_timeout: Duration,
    pub sample_rate: u32,
    pub side_table_capacity: usize,
}

/// Cheap, cloneable access to a running session.
///
/// Sends are fire-and-continue: they are queued behind the event currently
/// being dispatched, so they are safe to issue from inside a subscriber.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    conversation: watch::Receiver<ConversationStore>,
    ids: SubscriptionIds,
}

/// A registered `wait_for_next` that has not been awaited yet.
///
/// Registering before sending the request guarantees the reply cannot slip
/// past the waiter.
#[derive(Debug)]
pub struct PendingWait {
    id: SubscriptionId,
    receiver: oneshot::Receiver<Event>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PendingWait {
    /// Next matching event, or `None` on timeout or when the session ends.
    /// A timed-out wait is deregistered.
    pub async fn resolve(self, timeout: Duration) -> Option<Event> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(event)) => Some(event),
            Ok(Err(_)) => None,
            Err(_) => {
                let _ = self.commands.send(Command::Unsubscribe(self.id));
                None
            }
        }
    }
}

impl SessionHandle {
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Resolves once the session has ended, whether by `shutdown`, by the
    /// server closing, or by a transport failure.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Validates, stamps and queues an outbound event. Returns its event id.
    ///
    /// # Errors
    /// `NotConnected` once the transport is gone, or a validation error.
    #[allow(clippy::result_large_err)]
    pub fn send(&self, mut event: ClientEvent) -> Result<String> {
        self.ensure_connected()?;
        validate_client_event(&event)?;
        let id = event.ensure_event_id().to_string();
        self.command(Command::Send(event))?;
        Ok(id)
    }

    /// Queues an append and records the bytes as captured input audio.
    ///
    /// # Errors
    /// Same as [`SessionHandle::send`].
    #[allow(clippy::result_large_err)]
    pub fn append_input_audio(&self, audio: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let event = ClientEvent::append_audio(audio);
        validate_client_event(&event)?;
        self.command(Command::AppendAudio {
            event,
            audio: audio.to_vec(),
        })
    }

    /// Commits captured input audio and queues it for the next user item.
    ///
    /// # Errors
    /// `NotConnected` once the transport is gone.
    #[allow(clippy::result_large_err)]
    pub fn commit_input_audio(&self) -> Result<()> {
        self.ensure_connected()?;
        self.command(Command::CommitAudio)
    }

    /// # Errors
    /// `NotConnected` once the transport is gone.
    #[allow(clippy::result_large_err)]
    pub fn clear_input_audio(&self) -> Result<()> {
        self.ensure_connected()?;
        self.command(Command::ClearAudio)
    }

    /// Commits pending input audio, if any, then asks for a response.
    ///
    /// # Errors
    /// `NotConnected` once the transport is gone, or a validation error.
    #[allow(clippy::result_large_err)]
    pub fn create_response(&self, config: Option<ResponseConfig>) -> Result<()> {
        self.ensure_connected()?;
        validate_client_event(&ClientEvent::create_response(config.clone()))?;
        self.command(Command::CreateResponse(config))
    }

    pub fn on(&self, tag: EventType, handler: EventHandler) -> SubscriptionId {
        self.subscribe(tag, Subscriber::Persistent(handler))
    }

    pub fn on_next(&self, tag: EventType, handler: OnceHandler) -> SubscriptionId {
        self.subscribe(tag, Subscriber::Once(handler))
    }

    /// Registers `subscriber` under an id allocated here.
    pub fn subscribe(&self, tag: EventType, subscriber: Subscriber) -> SubscriptionId {
        let id = self.ids.next_id();
        self.subscribe_with(id, tag, subscriber);
        id
    }

    pub(crate) fn subscribe_with(&self, id: SubscriptionId, tag: EventType, subscriber: Subscriber) {
        if self
            .commands
            .send(Command::Subscribe {
                id,
                tag,
                subscriber,
            })
            .is_err()
        {
            tracing::debug!(?id, "subscription dropped, session has ended");
        }
    }

    pub fn off(&self, id: SubscriptionId) {
        let _ = self.commands.send(Command::Unsubscribe(id));
    }

    /// Registers a one-shot wait without awaiting it yet.
    ///
    /// # Errors
    /// `ConnectionClosed` if the event loop has exited.
    #[allow(clippy::result_large_err)]
    pub fn waiter(&self, tag: EventType) -> Result<PendingWait> {
        let (tx, receiver) = oneshot::channel();
        let id = self.ids.next_id();
        self.command(Command::Subscribe {
            id,
            tag,
            subscriber: Subscriber::Waiter(tx),
        })?;
        Ok(PendingWait {
            id,
            receiver,
            commands: self.commands.clone(),
        })
    }

    /// Next event with `tag`, or `None` if `timeout` elapses first or the
    /// session ends.
    pub async fn wait_for_next(&self, tag: EventType, timeout: Duration) -> Option<Event> {
        self.waiter(tag).ok()?.resolve(timeout).await
    }

    pub(crate) fn set_tools(&self, tools: ToolRegistry) {
        let _ = self.commands.send(Command::SetTools(tools));
    }

    /// Snapshot of the conversation, in creation order.
    #[must_use]
    pub fn items(&self) -> Vec<ConversationItem> {
        self.conversation.borrow().items().cloned().collect()
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<ConversationItem> {
        self.conversation.borrow().item(id).cloned()
    }

    /// Clears conversation state without touching the connection.
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Closes the transport and waits for the event loop to exit.
    pub async fn shutdown(&self) {
        let (respond, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(respond)).is_ok() {
            let _ = rx.await;
        }
    }

    #[allow(clippy::result_large_err)]
    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    #[allow(clippy::result_large_err)]
    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ConnectionClosed)
    }
}

/// Starts the event loop for an already connected transport.
#[must_use]
pub fn spawn(transport: Box<dyn Transport>, setup: SessionSetup) -> SessionHandle {
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (state_tx, state) = watch::channel(transport.state());
    let (store, conversation) = watch::channel(ConversationStore::new(
        setup.sample_rate,
        setup.side_table_capacity,
    ));
    let mut dispatcher = Dispatcher::with_ids(setup.ids.clone());
    for (id, tag, subscriber) in setup.subscriptions {
        dispatcher.insert(id, tag, subscriber);
    }

    let actor = SessionActor {
        transport,
        dispatcher,
        store,
        tools: setup.tools,
        input_audio: Vec::new(),
        tool_timeout: setup.tool_timeout,
        state: state_tx,
    };
    tokio::spawn(actor.run(command_rx));

    SessionHandle {
        commands,
        state,
        conversation,
        ids: setup.ids,
    }
}

struct SessionActor {
    transport: Box<dyn Transport>,
    dispatcher: Dispatcher,
    store: watch::Sender<ConversationStore>,
    tools: ToolRegistry,
    /// Input audio appended since the last commit or clear.
    input_audio: Vec<u8>,
    tool_timeout: Duration,
    state: watch::Sender<ConnectionState>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if !self.handle_command(command).await {
                                return;
                            }
                        }
                        None => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                frame = self.transport.next_frame() => {
                    match frame {
                        Some(Ok(frame)) => self.handle_frame(&frame).await,
                        Some(Err(err)) => {
                            tracing::warn!(error = %err, "transport failed");
                            if !self.transport.state().is_connected() {
                                self.finish();
                                return;
                            }
                        }
                        None => {
                            tracing::info!("Realtime session ended by transport");
                            self.finish();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Returns `false` once the loop should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send(event) => self.send_event(event).await,
            Command::Subscribe {
                id,
                tag,
                subscriber,
            } => self.dispatcher.insert(id, tag, subscriber),
            Command::Unsubscribe(id) => {
                self.dispatcher.off(id);
            }
            Command::SetTools(tools) => self.tools = tools,
            Command::AppendAudio { event, audio } => {
                self.input_audio.extend_from_slice(&audio);
                self.send_event(event).await;
            }
            Command::CommitAudio => self.commit_input_audio().await,
            Command::ClearAudio => {
                self.input_audio.clear();
                self.send_event(ClientEvent::clear_audio()).await;
            }
            Command::CreateResponse(config) => {
                self.commit_input_audio().await;
                self.send_event(ClientEvent::create_response(config)).await;
            }
            Command::Reset => {
                self.store.send_modify(ConversationStore::clear);
                self.input_audio.clear();
            }
            Command::Shutdown(respond) => {
                self.shutdown().await;
                let _ = respond.send(());
                return false;
            }
        }
        true
    }

    async fn handle_frame(&mut self, frame: &str) {
        let event = match Event::decode(frame) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "dropping inbound frame");
                return;
            }
        };

        if let Event::Server(server_event) = &event {
            let captured = matches!(
                server_event,
                ServerEvent::InputAudioBufferSpeechStopped { .. }
            )
            .then_some(self.input_audio.as_slice());
            let mut update = None;
            self.store.send_if_modified(|store| {
                update = store.apply(server_event, captured);
                update.is_some()
            });
            if let Some(update) = update {
                tracing::trace!(item_id = %update.item_id, delta = ?update.delta, "conversation updated");
            }
        }

        self.dispatcher.dispatch(&event).await;

        if let Event::Server(ServerEvent::ResponseOutputItemDone {
            item:
                Item::FunctionCall {
                    id,
                    name,
                    call_id,
                    arguments,
                    ..
                },
            ..
        }) = &event
        {
            self.run_tool(id.as_deref(), name, call_id, arguments).await;
        }
    }

    async fn run_tool(&mut self, item_id: Option<&str>, name: &str, call_id: &str, payload: &str) {
        let accumulated = {
            let store = self.store.borrow();
            item_id
                .and_then(|id| store.item(id))
                .and_then(|item| item.tool.as_ref())
                .map(|tool| tool.arguments.clone())
                .filter(|arguments| !arguments.is_empty())
        };
        let arguments = parse_arguments(accumulated.as_deref().unwrap_or(payload));

        tracing::debug!(tool = name, call_id, "invoking tool");
        let call = ToolCall {
            name: name.to_string(),
            call_id: call_id.to_string(),
            arguments,
        };
        let outcome = self.tools.invoke(call, self.tool_timeout).await;
        if let ToolOutcome::Failed(message) = &outcome {
            tracing::warn!(tool = name, call_id, error = %message, "tool call failed");
        }

        self.send_event(ClientEvent::create_item(Item::function_call_output(
            call_id,
            outcome.output(),
        )))
        .await;
        self.send_event(ClientEvent::create_response(None)).await;
    }

    async fn commit_input_audio(&mut self) {
        if self.input_audio.is_empty() {
            return;
        }
        self.send_event(ClientEvent::commit_audio()).await;
        let audio = std::mem::take(&mut self.input_audio);
        self.store.send_modify(|store| store.queue_input_audio(audio));
    }

    /// Writes an event and, once written, dispatches it under its client tag.
    async fn send_event(&mut self, mut event: ClientEvent) {
        event.ensure_event_id();
        let event = Event::Client(event);
        let frame = match event.encode() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(event_type = %event.event_type(), error = %err, "failed to encode outbound event");
                return;
            }
        };
        if let Err(err) = self.transport.send(frame).await {
            tracing::warn!(event_type = %event.event_type(), error = %err, "failed to send event");
            self.publish_state();
            return;
        }
        self.dispatcher.dispatch(&event).await;
    }

    fn publish_state(&self) {
        let _ = self.state.send_replace(self.transport.state());
    }

    async fn shutdown(&mut self) {
        let _ = self.state.send_replace(ConnectionState::Closing);
        self.transport
            .close(CLOSE_NORMAL, "client disconnect".to_string())
            .await;
        tracing::info!("Realtime session closed");
        self.finish();
    }

    fn finish(&mut self) {
        let _ = self.state.send_replace(ConnectionState::Closed);
        self.store.send_modify(ConversationStore::clear);
        self.dispatcher.clear();
        self.input_audio.clear();
    }
}
