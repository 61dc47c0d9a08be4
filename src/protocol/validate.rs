//! Checks applied to outbound events before a frame is written.

use super::client_events::ClientEvent;
use super::models::{SessionConfig, Tool};
use crate::{Error, Result};

pub const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;

/// # Errors
/// `InvalidClientEvent` for oversized or non-base64 audio chunks, tools with
/// duplicate or empty names, and item references without an id.
#[allow(clippy::result_large_err)]
pub fn validate_client_event(event: &ClientEvent) -> Result<()> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio, .. } => {
            let size = estimate_base64_decoded_len(audio)?;
            if size > MAX_INPUT_AUDIO_CHUNK_BYTES {
                return Err(Error::InvalidClientEvent(format!(
                    "input_audio_buffer.append exceeds 15MB ({size} bytes)",
                )));
            }
        }
        ClientEvent::SessionUpdate { session, .. } => {
            validate_session_config(session.as_ref())?;
        }
        ClientEvent::ResponseCreate {
            response: Some(config),
            ..
        } => {
            if let Some(tools) = &config.tools {
                validate_tools(tools)?;
            }
        }
        ClientEvent::ConversationItemTruncate { item_id, .. }
        | ClientEvent::ConversationItemDelete { item_id, .. }
        | ClientEvent::ConversationItemRetrieve { item_id, .. } => {
            if item_id.is_empty() {
                return Err(Error::InvalidClientEvent(format!(
                    "{} requires an item_id",
                    event.event_type()
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_session_config(config: &SessionConfig) -> Result<()> {
    if let Some(tools) = &config.tools {
        validate_tools(tools)?;
    }
    if config.modalities.as_ref().is_some_and(Vec::is_empty) {
        return Err(Error::InvalidClientEvent(
            "session.update modalities cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
fn validate_tools(tools: &[Tool]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for tool in tools {
        let name = tool.name();
        if name.is_empty() {
            return Err(Error::InvalidClientEvent("tool name cannot be empty".to_string()));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidClientEvent(format!("duplicate tool name: {name}")));
        }
    }
    Ok(())
}

#[allow(clippy::result_large_err)]
pub(crate) fn estimate_base64_decoded_len(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 length".to_string(),
        ));
    }

    let mut padding = 0;
    let mut seen_padding = false;
    for &b in bytes {
        if b == b'=' {
            seen_padding = true;
            padding += 1;
            continue;
        }
        if seen_padding {
            return Err(Error::InvalidClientEvent(
                "input_audio_buffer.append invalid base64 padding".to_string(),
            ));
        }
        let is_valid = matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'+' | b'/'
        );
        if !is_valid {
            return Err(Error::InvalidClientEvent(
                "input_audio_buffer.append invalid base64 character".to_string(),
            ));
        }
    }

    if padding > 2 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 padding length".to_string(),
        ));
    }

    Ok(bytes.len() / 4 * 3 - padding)
}
