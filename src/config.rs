//! Client configuration.
//!
//! Everything a [`RealtimeClient`](crate::RealtimeClient) needs to open and run a
//! session lives in [`ClientConfig`]. The builder fills it in; the API key falls
//! back to `OPENAI_API_KEY` when not given explicitly.

use crate::protocol::models::{DEFAULT_MODEL, SessionConfig};
use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const PROTOCOL_HEADER: (&str, &str) = ("OpenAI-Beta", "realtime=v1");

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_SIDE_TABLE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Sent on the upgrade request in addition to auth and protocol headers.
    pub extra_headers: Vec<(String, String)>,
    /// Applied with `session.update` right after `session.created`.
    pub session: SessionConfig,
    pub handshake_timeout: Duration,
    pub ack_timeout: Duration,
    pub tool_timeout: Duration,
    pub sample_rate: u32,
    pub side_table_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            extra_headers: Vec::new(),
            session: SessionConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            sample_rate: DEFAULT_SAMPLE_RATE,
            side_table_capacity: DEFAULT_SIDE_TABLE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Returns the configured key, or the value of `OPENAI_API_KEY`. A blank
    /// configured key counts as unset.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if neither yields a non-blank key.
    #[allow(clippy::result_large_err)]
    pub fn resolve_api_key(&self) -> Result<String> {
        select_api_key(self.api_key.as_deref(), || std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| Error::InvalidConfig(format!("missing API key (set {API_KEY_ENV})")))
    }

    /// Header list sent with the upgrade request, protocol header first.
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(PROTOCOL_HEADER.0.to_string(), PROTOCOL_HEADER.1.to_string())];
        headers.extend(self.extra_headers.iter().cloned());
        headers
    }

    /// # Errors
    /// Returns `InvalidConfig` for zero timeouts, a zero sample rate or an empty side table.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidConfig("url cannot be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model cannot be empty".to_string()));
        }
        for (name, value) in [
            ("handshake_timeout", self.handshake_timeout),
            ("ack_timeout", self.ack_timeout),
            ("tool_timeout", self.tool_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be non-zero")));
            }
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".to_string()));
        }
        if self.side_table_capacity == 0 {
            return Err(Error::InvalidConfig(
                "side_table_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// First non-blank key: the explicit one, then the environment.
fn select_api_key(explicit: Option<&str>, env: impl FnOnce() -> Option<String>) -> Option<String> {
    explicit
        .filter(|key| !key.trim().is_empty())
        .map(str::to_string)
        .or_else(env)
        .filter(|key| !key.trim().is_empty())
}
