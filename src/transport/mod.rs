//! Duplex frame transport.
//!
//! The session event loop only ever talks to a [`Transport`]; [`ws::WsTransport`]
//! is the WebSocket implementation and tests substitute channel-backed fakes.

pub mod ws;

use crate::Result;
use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

pub use ws::WsTransport;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// Normal closure code sent on `disconnect`.
pub const CLOSE_NORMAL: u16 = 1000;

/// `Disconnected → Connecting → Connected → Closing → Closed`. Any transport
/// error jumps straight to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

pub trait Transport: Send {
    fn state(&self) -> ConnectionState;

    /// Writes one text frame.
    ///
    /// Fails with `NotConnected` before the handshake completes or after close.
    fn send(&mut self, frame: String) -> BoxFuture<'_, Result<()>>;

    /// Next inbound text frame, in arrival order. A transport error is yielded
    /// once as `Some(Err(_))`; afterwards, and after a close, this returns `None`.
    fn next_frame(&mut self) -> BoxFuture<'_, Option<Result<String>>>;

    /// Idempotent. Always succeeds locally; the close frame is best effort.
    fn close(&mut self, code: u16, reason: String) -> BoxFuture<'_, ()>;
}

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> Cow<'_, str> {
    if s.len() <= max_bytes {
        return Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}
