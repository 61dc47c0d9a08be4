use oai_rt_session::transport::BoxFuture;
use oai_rt_session::{
    ClientConfig, ConnectionState, Error, EventType, ItemKind, RealtimeClient, Result,
    SessionConfig, Tool, ToolRegistry, Transport, handler,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

struct MockTransport {
    state: ConnectionState,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    closes: Arc<AtomicUsize>,
}

impl Transport for MockTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        let result = if self.state.is_connected() {
            self.outgoing.send(frame).map_err(|_| Error::ConnectionClosed)
        } else {
            Err(Error::NotConnected)
        };
        Box::pin(async move { result })
    }

    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(async move { self.incoming.recv().await.map(Ok) })
    }

    fn close(&mut self, _code: u16, _reason: String) -> BoxFuture<'_, ()> {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Box::pin(async {})
    }
}

/// The far end of a [`MockTransport`].
struct MockServer {
    frames: mpsc::UnboundedSender<String>,
    sent: mpsc::UnboundedReceiver<String>,
    closes: Arc<AtomicUsize>,
}

impl MockServer {
    fn push(&self, frame: Value) {
        self.frames.send(frame.to_string()).unwrap();
    }

    async fn next_sent(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.sent.recv())
            .await
            .expect("client sent nothing")
            .expect("transport dropped");
        serde_json::from_str(&frame).unwrap()
    }

    async fn expect(&mut self, tag: &str) -> Value {
        let frame = self.next_sent().await;
        assert_eq!(frame["type"], tag, "unexpected frame {frame}");
        frame
    }

    /// Reads the next `session.update` and acknowledges it.
    async fn ack_session_update(&mut self) -> Value {
        let update = self.expect("session.update").await;
        let mut session = update["session"].clone();
        session["id"] = json!("sess_1");
        self.push(json!({
            "type": "session.updated",
            "event_id": "evt_updated",
            "session": session
        }));
        update
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Logs go to the test writer; set `RUST_LOG=oai_rt_session=trace` to see frames.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mock() -> (MockTransport, MockServer) {
    init_tracing();
    let (frames, incoming) = mpsc::unbounded_channel();
    let (outgoing, sent) = mpsc::unbounded_channel();
    let closes = Arc::new(AtomicUsize::new(0));
    (
        MockTransport {
            state: ConnectionState::Connected,
            incoming,
            outgoing,
            closes: Arc::clone(&closes),
        },
        MockServer {
            frames,
            sent,
            closes,
        },
    )
}

fn config() -> ClientConfig {
    ClientConfig {
        api_key: Some("sk-test".to_string()),
        ..ClientConfig::default()
    }
}

fn session_created() -> Value {
    json!({
        "type": "session.created",
        "event_id": "evt_created",
        "session": {
            "id": "sess_1",
            "model": "gpt-4o-realtime-preview",
            "voice": "alloy",
            "modalities": ["text", "audio"]
        }
    })
}

async fn connect(client: &mut RealtimeClient) -> (MockServer, Value) {
    let (transport, mut server) = mock();
    server.push(session_created());
    let (result, update) = tokio::join!(
        client.connect_with(Box::new(transport)),
        server.ack_session_update()
    );
    result.unwrap();
    (server, update)
}

fn weather_tool() -> Tool {
    Tool::Function {
        name: "get_weather".to_string(),
        description: Some("Current weather".to_string()),
        parameters: json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }),
    }
}

fn function_call_done(arguments: &str) -> Value {
    json!({
        "type": "response.output_item.done",
        "event_id": "evt_fc",
        "response_id": "resp_1",
        "output_index": 0,
        "item": {
            "id": "fc_1",
            "type": "function_call",
            "status": "completed",
            "name": "get_weather",
            "call_id": "call_1",
            "arguments": arguments
        }
    })
}

#[tokio::test]
async fn connect_applies_configured_session() {
    let mut config = config();
    config.session.instructions = Some("be brief".to_string());
    let mut client = RealtimeClient::new(config);

    let (_server, update) = connect(&mut client).await;

    assert!(client.is_connected());
    assert_eq!(update["session"], json!({"instructions": "be brief"}));
    let session = client.session().unwrap();
    assert_eq!(session.instructions.as_deref(), Some("be brief"));
    assert_eq!(session.voice.as_deref(), Some("alloy"));
}

#[tokio::test(start_paused = true)]
async fn missing_session_created_times_out_and_closes() {
    let mut config = config();
    config.handshake_timeout = Duration::from_secs(1);
    let mut client = RealtimeClient::new(config);
    let (transport, server) = mock();

    let err = client.connect_with(Box::new(transport)).await.unwrap_err();

    assert!(matches!(err, Error::HandshakeTimeout(timeout) if timeout == Duration::from_secs(1)));
    assert_eq!(server.closes(), 1);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn transport_closing_during_handshake_fails_connect() {
    let mut client = RealtimeClient::new(config());
    let (transport, server) = mock();
    drop(server);

    let err = client.connect_with(Box::new(transport)).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_update_keeps_previous_snapshot() {
    let mut config = config();
    config.ack_timeout = Duration::from_millis(200);
    config.session.instructions = Some("be brief".to_string());
    let mut client = RealtimeClient::new(config);
    let (mut server, _) = connect(&mut client).await;

    let err = client
        .update_session(SessionConfig {
            instructions: Some("be verbose".to_string()),
            ..SessionConfig::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::AckTimeout { event_type: EventType::SessionUpdate, timeout }
            if timeout == Duration::from_millis(200)
    ));
    let sent = server.expect("session.update").await;
    assert_eq!(sent["session"]["instructions"], "be verbose");
    assert_eq!(
        client.session().unwrap().instructions.as_deref(),
        Some("be brief")
    );
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_initial_update_keeps_the_connection() {
    let mut config = config();
    config.ack_timeout = Duration::from_millis(200);
    config.session.instructions = Some("be brief".to_string());
    let mut client = RealtimeClient::new(config);
    let (transport, mut server) = mock();
    server.push(session_created());

    client.connect_with(Box::new(transport)).await.unwrap();

    server.expect("session.update").await;
    assert!(client.is_connected());
    assert_eq!(server.closes(), 0);
    let session = client.session().unwrap();
    assert_eq!(session.voice.as_deref(), Some("alloy"));
    assert_eq!(session.instructions, None);
}

#[tokio::test]
async fn rejected_update_is_not_recorded() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    let err = client
        .update_session(SessionConfig {
            modalities: Some(Vec::new()),
            ..SessionConfig::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidClientEvent(_)));
    assert_eq!(client.config().session.modalities, None);

    let (result, update) = tokio::join!(
        client.update_session(SessionConfig {
            voice: Some("verse".to_string()),
            ..SessionConfig::default()
        }),
        server.ack_session_update()
    );
    result.unwrap();
    assert_eq!(update["session"], json!({"voice": "verse"}));
    assert_eq!(client.session().unwrap().voice.as_deref(), Some("verse"));
}

#[tokio::test]
async fn rejected_update_while_disconnected_does_not_block_connect() {
    let mut client = RealtimeClient::new(config());
    let err = client
        .update_session(SessionConfig {
            modalities: Some(Vec::new()),
            ..SessionConfig::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidClientEvent(_)));

    let (_server, update) = connect(&mut client).await;
    assert_eq!(update["session"], json!({}));
    assert!(client.is_connected());
}

#[tokio::test]
async fn acknowledged_update_refreshes_snapshot() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    let (result, _) = tokio::join!(
        client.update_session(SessionConfig {
            voice: Some("verse".to_string()),
            ..SessionConfig::default()
        }),
        server.ack_session_update()
    );
    result.unwrap();
    assert_eq!(client.session().unwrap().voice.as_deref(), Some("verse"));
}

#[tokio::test]
async fn tool_call_is_answered_once() {
    let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let mut tools = ToolRegistry::new();
    tools
        .add(weather_tool(), move |args: Value| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(args);
                Ok::<_, Error>(json!("sunny"))
            }
        })
        .unwrap();
    let mut client = RealtimeClient::with_tools(config(), tools);
    let (mut server, update) = connect(&mut client).await;
    assert_eq!(update["session"]["tools"][0]["name"], "get_weather");

    server.push(function_call_done(r#"{"city":"NY"}"#));

    let output = server.expect("conversation.item.create").await;
    assert_eq!(
        output["item"],
        json!({"type": "function_call_output", "call_id": "call_1", "output": "sunny"})
    );
    server.expect("response.create").await;
    assert!(
        tokio::time::timeout(Duration::from_millis(50), server.sent.recv())
            .await
            .is_err()
    );
    assert_eq!(*calls.lock().unwrap(), vec![json!({"city": "NY"})]);
}

#[tokio::test]
async fn failing_tool_reports_error_output() {
    let mut tools = ToolRegistry::new();
    tools
        .add(weather_tool(), |_args: Value| async {
            Err::<Value, _>(Error::ToolExecution {
                name: "get_weather".to_string(),
                message: "backend down".to_string(),
            })
        })
        .unwrap();
    let mut client = RealtimeClient::with_tools(config(), tools);
    let (mut server, _) = connect(&mut client).await;

    server.push(function_call_done(r#"{"city":"NY"}"#));

    let output = server.expect("conversation.item.create").await;
    let payload: Value = serde_json::from_str(output["item"]["output"].as_str().unwrap()).unwrap();
    assert_eq!(payload, json!({"error": "backend down"}));
    server.expect("response.create").await;
}

#[tokio::test]
async fn unregistered_tool_still_gets_a_reply() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    server.push(function_call_done("{}"));

    let output = server.expect("conversation.item.create").await;
    assert_eq!(output["item"]["call_id"], "call_1");
    let payload: Value = serde_json::from_str(output["item"]["output"].as_str().unwrap()).unwrap();
    assert!(payload["error"].as_str().unwrap().contains("get_weather"));
    server.expect("response.create").await;
}

#[tokio::test(start_paused = true)]
async fn wait_for_next_honours_timeout() {
    let mut client = RealtimeClient::new(config());
    let (server, _) = connect(&mut client).await;

    let frames = server.frames.clone();
    let push_later = move || {
        let frames = frames.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let frame = json!({
                "type": "response.done",
                "event_id": "evt_done",
                "response": {"id": "resp_1", "status": "completed", "output": []}
            });
            frames.send(frame.to_string()).unwrap();
        });
    };

    push_later();
    let event = client
        .wait_for_next("response.done", Duration::from_millis(50))
        .await
        .expect("response.done within 50ms");
    assert_eq!(event.event_id(), Some("evt_done"));

    push_later();
    assert!(
        client
            .wait_for_next(EventType::ResponseDone, Duration::from_millis(5))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn disconnect_releases_waits_and_rejects_sends() {
    let mut client = RealtimeClient::new(config());
    let (server, _) = connect(&mut client).await;
    let wait = client
        .handle()
        .unwrap()
        .waiter(EventType::ResponseDone)
        .unwrap();

    client.disconnect().await;

    assert!(wait.resolve(Duration::from_secs(60)).await.is_none());
    assert_eq!(server.closes(), 1);
    assert!(!client.is_connected());
    assert!(client.session().is_none());
    assert!(matches!(client.say("hello"), Err(Error::NotConnected)));
    assert!(client.items().is_empty());
    assert!(
        client
            .wait_for_next(EventType::ResponseDone, Duration::from_millis(10))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn subscriptions_survive_reconnect() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    let mut client = RealtimeClient::new(config());
    client.on(
        EventType::SessionCreated,
        handler(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }),
    );

    let (_first, _) = connect(&mut client).await;
    client.disconnect().await;
    let (_second, _) = connect(&mut client).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn clients_do_not_share_state() {
    let mut first = RealtimeClient::new(config());
    let mut second = RealtimeClient::new(config());
    let (first_server, _) = connect(&mut first).await;
    let (_second_server, _) = connect(&mut second).await;

    let wait = first
        .handle()
        .unwrap()
        .waiter(EventType::ConversationItemCreated)
        .unwrap();
    first_server.push(json!({
        "type": "conversation.item.created",
        "event_id": "evt_item",
        "item": {"id": "msg_1", "type": "message", "role": "user", "content": []}
    }));
    wait.resolve(Duration::from_secs(5)).await.unwrap();

    assert_eq!(first.items().len(), 1);
    assert!(second.items().is_empty());
}

#[tokio::test]
async fn cancel_truncates_to_played_audio() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    let wait = client
        .handle()
        .unwrap()
        .waiter(EventType::ConversationItemCreated)
        .unwrap();
    server.push(json!({
        "type": "conversation.item.created",
        "event_id": "evt_item",
        "item": {
            "id": "asst_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}, {"type": "audio", "transcript": "hi"}]
        }
    }));
    wait.resolve(Duration::from_secs(5)).await.unwrap();

    let item = client
        .cancel_response(Some("asst_1"), 12_000)
        .unwrap()
        .unwrap();
    assert_eq!(item.id, "asst_1");

    server.expect("response.cancel").await;
    let truncate = server.expect("conversation.item.truncate").await;
    assert_eq!(truncate["item_id"], "asst_1");
    assert_eq!(truncate["content_index"], 1);
    assert_eq!(truncate["audio_end_ms"], 500);
}

#[tokio::test]
async fn cancel_rejects_non_assistant_items() {
    let mut client = RealtimeClient::new(config());
    let (server, _) = connect(&mut client).await;

    let wait = client
        .handle()
        .unwrap()
        .waiter(EventType::ConversationItemCreated)
        .unwrap();
    server.push(json!({
        "type": "conversation.item.created",
        "event_id": "evt_item",
        "item": {"id": "user_1", "type": "message", "role": "user", "content": []}
    }));
    wait.resolve(Duration::from_secs(5)).await.unwrap();

    assert!(matches!(
        client.cancel_response(Some("user_1"), 100),
        Err(Error::InvalidClientEvent(_))
    ));
    assert!(matches!(
        client.cancel_response(Some("missing"), 100),
        Err(Error::InvalidClientEvent(_))
    ));
}

#[tokio::test]
async fn transcript_arriving_before_item_is_kept() {
    let mut client = RealtimeClient::new(config());
    let (server, _) = connect(&mut client).await;

    let wait = client
        .handle()
        .unwrap()
        .waiter(EventType::ConversationItemCreated)
        .unwrap();
    server.push(json!({
        "type": "conversation.item.input_audio_transcription.completed",
        "event_id": "evt_tr",
        "item_id": "user_1",
        "content_index": 0,
        "transcript": "what's the weather"
    }));
    server.push(json!({
        "type": "conversation.item.created",
        "event_id": "evt_item",
        "item": {
            "id": "user_1",
            "type": "message",
            "role": "user",
            "content": [{"type": "input_audio"}]
        }
    }));
    wait.resolve(Duration::from_secs(5)).await.unwrap();

    let items = client.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, ItemKind::Message);
    assert_eq!(items[0].transcript, "what's the weather");
}

#[tokio::test]
async fn say_creates_item_then_response() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    client.say("hello").unwrap();

    let create = server.expect("conversation.item.create").await;
    assert_eq!(
        create["item"],
        json!({
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": "hello"}]
        })
    );
    let response = server.expect("response.create").await;
    assert!(response["event_id"].as_str().unwrap().starts_with("event_"));
}

#[tokio::test]
async fn adding_a_tool_while_connected_pushes_definitions() {
    let mut client = RealtimeClient::new(config());
    let (mut server, _) = connect(&mut client).await;

    let (result, update) = tokio::join!(
        client.add_tool(weather_tool(), |_args: Value| async {
            Ok::<_, Error>(json!("sunny"))
        }),
        server.ack_session_update()
    );
    result.unwrap();

    assert_eq!(update["session"]["tools"][0]["name"], "get_weather");
    assert!(client.tools().contains("get_weather"));
}
