use super::{BoxFuture, ConnectionState, TRACE_LOG_MAX_BYTES, Transport, safe_truncate};
use crate::error::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport for one realtime session.
#[derive(Debug)]
pub struct WsTransport {
    stream: Option<WsStream>,
    state: ConnectionState,
}

impl WsTransport {
    /// Performs the WebSocket handshake.
    ///
    /// `model` is added as a query parameter unless `address` already carries
    /// one. `headers` are sent as-is next to the bearer credential.
    ///
    /// # Errors
    /// `Authentication` when the server answers 401/403, `Connection` for any
    /// other handshake failure, `Url`/`Header` for bad inputs.
    pub async fn open(
        address: &str,
        model: &str,
        api_key: &str,
        headers: &[(String, String)],
    ) -> Result<Self> {
        let mut url = Url::parse(address)?;
        if !url.query_pairs().any(|(key, _)| key == "model") {
            url.query_pairs_mut().append_pair("model", model);
        }

        let mut request = url.as_str().into_client_request()?;
        let request_headers = request.headers_mut();
        request_headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}"))?,
        );
        for (name, value) in headers {
            request_headers.insert(
                HeaderName::from_bytes(name.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }

        tracing::debug!(host = url.host_str().unwrap_or_default(), model, "opening realtime websocket");
        let (stream, response) = connect_async(request).await.map_err(map_connect_error)?;
        tracing::info!(status = response.status().as_u16(), "Connected to realtime endpoint");

        Ok(Self {
            stream: Some(stream),
            state: ConnectionState::Connected,
        })
    }

    fn fail(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Closed;
    }
}

fn map_connect_error(error: WsError) -> Error {
    match error {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if matches!(status, 401 | 403) {
                Error::Authentication { status }
            } else {
                Error::Connection(format!("websocket handshake failed with status {status}"))
            }
        }
        WsError::Io(error) => Error::Io(error),
        WsError::Url(error) => Error::Connection(format!("invalid realtime websocket URL: {error}")),
        other => Error::Connection(format!("websocket connect failed: {other}")),
    }
}

impl Transport for WsTransport {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.state != ConnectionState::Connected {
                return Err(Error::NotConnected);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::NotConnected);
            };
            tracing::trace!("Sending frame: {}", safe_truncate(&frame, TRACE_LOG_MAX_BYTES));
            if let Err(err) = stream.send(Message::Text(frame.into())).await {
                self.fail();
                return Err(err.into());
            }
            Ok(())
        })
    }

    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<String>>> {
        Box::pin(async move {
            loop {
                let stream = self.stream.as_mut()?;
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(
                            "Received frame: {}",
                            safe_truncate(text.as_str(), TRACE_LOG_MAX_BYTES)
                        );
                        return Some(Ok(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        tracing::debug!("Received Ping, sending Pong");
                        if let Err(err) = stream.send(Message::Pong(payload)).await {
                            self.fail();
                            return Some(Err(err.into()));
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        tracing::warn!(len = bytes.len(), "Ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "WebSocket connection closed by server");
                        self.fail();
                        return None;
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "WebSocket receive failed");
                        self.fail();
                        return Some(Err(err.into()));
                    }
                    None => {
                        self.fail();
                        return None;
                    }
                }
            }
        })
    }

    fn close(&mut self, code: u16, reason: String) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if matches!(self.state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            self.state = ConnectionState::Closing;
            if let Some(mut stream) = self.stream.take() {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.into(),
                };
                if let Err(err) = stream.close(Some(frame)).await {
                    tracing::debug!(error = %err, "close frame not delivered");
                }
            }
            self.state = ConnectionState::Closed;
            tracing::info!(code, "WebSocket connection closed");
        })
    }
}
