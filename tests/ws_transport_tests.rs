use futures::{SinkExt, StreamExt};
use oai_rt_session::transport::CLOSE_NORMAL;
use oai_rt_session::{ConnectionState, Error, Realtime, Transport, WsTransport};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, accept_hdr_async};

#[derive(Debug, Default, Clone)]
struct Handshake {
    authorization: String,
    beta: String,
    query: String,
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
    (listener, address)
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within 5s")
            .expect("stream open")
            .expect("valid frame");
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

fn beta_header() -> Vec<(String, String)> {
    vec![("OpenAI-Beta".to_string(), "realtime=v1".to_string())]
}

#[tokio::test]
async fn transport_exchanges_frames_and_closes_once() {
    let (listener, address) = listener().await;
    let captured = Arc::new(Mutex::new(Handshake::default()));
    let capture = Arc::clone(&captured);

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_hdr_async(stream, move |req: &Request, response: Response| {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            *capture.lock().unwrap() = Handshake {
                authorization: header("authorization"),
                beta: header("openai-beta"),
                query: req.uri().query().unwrap_or_default().to_string(),
            };
            Ok(response)
        })
        .await
        .unwrap();

        ws.send(Message::Ping(vec![7, 7].into())).await.unwrap();
        ws.send(Message::Text(json!({"type": "session.created"}).to_string().into()))
            .await
            .unwrap();

        let pong = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(pong, Message::Pong(payload) if payload.as_ref() == [7, 7]));

        let inbound = next_text(&mut ws).await;
        assert_eq!(inbound["type"], "input_audio_buffer.clear");

        let close = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        let Message::Close(Some(frame)) = close else {
            panic!("expected close frame, got {close:?}");
        };
        assert_eq!(frame.code, CloseCode::Normal);
        assert_eq!(frame.reason.as_str(), "done");
    });

    let mut transport = WsTransport::open(&address, "gpt-test", "sk-test", &beta_header())
        .await
        .unwrap();
    assert_eq!(transport.state(), ConnectionState::Connected);

    let frame = transport.next_frame().await.unwrap().unwrap();
    assert_eq!(serde_json::from_str::<Value>(&frame).unwrap()["type"], "session.created");

    transport
        .send(json!({"type": "input_audio_buffer.clear"}).to_string())
        .await
        .unwrap();

    transport.close(CLOSE_NORMAL, "done".to_string()).await;
    transport.close(CLOSE_NORMAL, "again".to_string()).await;
    assert_eq!(transport.state(), ConnectionState::Closed);
    assert!(matches!(
        transport.send("{}".to_string()).await,
        Err(Error::NotConnected)
    ));
    assert!(transport.next_frame().await.is_none());

    server.await.unwrap();
    let handshake = captured.lock().unwrap().clone();
    assert_eq!(handshake.authorization, "Bearer sk-test");
    assert_eq!(handshake.beta, "realtime=v1");
    assert_eq!(handshake.query, "model=gpt-test");
}

#[tokio::test]
async fn server_close_ends_the_frame_stream() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    });

    let mut transport = WsTransport::open(&address, "gpt-test", "sk-test", &[])
        .await
        .unwrap();
    assert!(transport.next_frame().await.is_none());
    assert_eq!(transport.state(), ConnectionState::Closed);
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_handshake_is_an_authentication_error() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let result = accept_hdr_async(stream, |_req: &Request, _response: Response| {
            let response = tokio_tungstenite::tungstenite::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(Some("unauthorized".to_string()))
                .unwrap();
            Err(response)
        })
        .await;
        assert!(result.is_err());
    });

    let err = WsTransport::open(&address, "gpt-test", "wrong-key", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Authentication { status: 401 }));
    server.await.unwrap();
}

#[tokio::test]
async fn builder_connects_and_talks_over_websocket() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            json!({
                "type": "session.created",
                "event_id": "evt_1",
                "session": {"id": "sess_ws", "voice": "alloy"}
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

        let update = next_text(&mut ws).await;
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["instructions"], "be brief");
        let mut session = update["session"].clone();
        session["id"] = json!("sess_ws");
        ws.send(Message::Text(
            json!({"type": "session.updated", "event_id": "evt_2", "session": session})
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        assert_eq!(next_text(&mut ws).await["type"], "conversation.item.create");
        assert_eq!(next_text(&mut ws).await["type"], "response.create");

        let close = timeout(Duration::from_secs(5), ws.next()).await.unwrap().unwrap().unwrap();
        assert!(matches!(close, Message::Close(_)));
    });

    let mut client = Realtime::builder()
        .url(address)
        .api_key("sk-test")
        .instructions("be brief")
        .connect()
        .await
        .unwrap();
    assert!(client.is_connected());
    assert_eq!(client.session().unwrap().voice.as_deref(), Some("alloy"));

    client.say("hello").unwrap();
    // Both frames are queued; the close goes out after them.
    client.disconnect().await;
    assert!(!client.is_connected());

    server.await.unwrap();
}
