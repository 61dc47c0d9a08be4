//! Conversation state rebuilt from streamed server events.
//!
//! The store is a fold: [`ConversationStore::apply`] takes one server event and
//! updates the item it refers to. Deltas can arrive before the item they belong
//! to exists; those are parked in bounded side tables keyed by item id and
//! consumed once by `conversation.item.created`.

use crate::config::{DEFAULT_SAMPLE_RATE, DEFAULT_SIDE_TABLE_CAPACITY};
use crate::protocol::models::{ContentPart, Item, ItemStatus, Role};
use crate::protocol::server_events::ServerEvent;
use base64::Engine;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Message,
    FunctionCall,
    FunctionCallOutput,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallState {
    pub name: String,
    pub call_id: String,
    /// Accumulated argument JSON, possibly still incomplete.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    pub id: String,
    pub kind: ItemKind,
    pub role: Option<Role>,
    pub status: ItemStatus,
    pub audio: Vec<u8>,
    pub text: String,
    /// Empty until a transcript arrives; a single space means "received, but empty".
    pub transcript: String,
    pub tool: Option<ToolCallState>,
    pub output: Option<String>,
    /// Last payload seen from the server for this item.
    pub raw: Item,
}

impl ConversationItem {
    fn from_item(id: String, item: Item) -> Self {
        let mut text = String::new();
        let mut transcript = String::new();
        let (kind, role, status, tool, output) = match &item {
            Item::Message {
                role,
                status,
                content,
                ..
            } => {
                for part in content {
                    match part {
                        ContentPart::InputText { text: value } | ContentPart::Text { text: value } => {
                            text.push_str(value);
                        }
                        ContentPart::InputAudio {
                            transcript: Some(value),
                            ..
                        }
                        | ContentPart::Audio {
                            transcript: Some(value),
                            ..
                        } => transcript.push_str(value),
                        _ => {}
                    }
                }
                (ItemKind::Message, Some(*role), status.unwrap_or_default(), None, None)
            }
            Item::FunctionCall {
                name,
                call_id,
                arguments,
                ..
            } => (
                ItemKind::FunctionCall,
                None,
                ItemStatus::InProgress,
                Some(ToolCallState {
                    name: name.clone(),
                    call_id: call_id.clone(),
                    arguments: arguments.clone(),
                }),
                None,
            ),
            Item::FunctionCallOutput { output, .. } => (
                ItemKind::FunctionCallOutput,
                None,
                ItemStatus::Completed,
                None,
                Some(output.clone()),
            ),
            Item::Unknown(_) => (
                ItemKind::Other,
                None,
                item.status().unwrap_or_default(),
                None,
                None,
            ),
        };
        Self {
            id,
            kind,
            role,
            status,
            audio: Vec::new(),
            text,
            transcript,
            tool,
            output,
            raw: item,
        }
    }
}

/// What an applied event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemDelta {
    Created,
    Text(String),
    Transcript(String),
    /// Number of audio bytes appended.
    Audio(usize),
    Arguments(String),
    /// Audio length after the cut.
    Truncated(usize),
    Completed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUpdate {
    pub item_id: String,
    pub delta: ItemDelta,
}

impl ItemUpdate {
    fn new(item_id: &str, delta: ItemDelta) -> Self {
        Self {
            item_id: item_id.to_string(),
            delta,
        }
    }
}

/// Capacity-bounded map that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct SideTable<V> {
    name: &'static str,
    capacity: usize,
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V> SideTable<V> {
    #[must_use]
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: V) {
        if self.entries.insert(key.to_string(), value).is_none() {
            self.order.push_back(key.to_string());
            self.evict_overflow();
        }
    }

    pub fn entry_or_default(&mut self, key: &str) -> &mut V
    where
        V: Default,
    {
        if !self.entries.contains_key(key) {
            self.insert(key, V::default());
        }
        self.entries
            .entry(key.to_string())
            .or_default()
    }

    pub fn take(&mut self, key: &str) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|existing| existing != key);
        Some(value)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_overflow(&mut self) {
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::warn!(table = self.name, item_id = %oldest, "side table full, evicted oldest entry");
        }
    }
}

/// Deltas received for an item that has not been created yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingDeltas {
    pub text: String,
    pub transcript: String,
    /// From `input_audio_transcription.completed`; replaces `transcript` on creation.
    pub completed_transcript: Option<String>,
    pub audio: Vec<u8>,
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    sample_rate: u32,
    items: HashMap<String, ConversationItem>,
    order: Vec<String>,
    pending: SideTable<PendingDeltas>,
    speech_starts: SideTable<u32>,
    queued_input_audio: Option<Vec<u8>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, DEFAULT_SIDE_TABLE_CAPACITY)
    }
}

impl ConversationStore {
    #[must_use]
    pub fn new(sample_rate: u32, side_table_capacity: usize) -> Self {
        Self {
            sample_rate,
            items: HashMap::new(),
            order: Vec::new(),
            pending: SideTable::new("pending_deltas", side_table_capacity),
            speech_starts: SideTable::new("speech_starts", side_table_capacity),
            queued_input_audio: None,
        }
    }

    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ConversationItem> {
        self.items.get(id)
    }

    /// Items in creation order.
    pub fn items(&self) -> impl Iterator<Item = &ConversationItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub const fn pending(&self) -> &SideTable<PendingDeltas> {
        &self.pending
    }

    #[must_use]
    pub fn queued_input_audio(&self) -> Option<&[u8]> {
        self.queued_input_audio.as_deref()
    }

    /// Parks audio for the next user message item; replaces anything queued.
    pub fn queue_input_audio(&mut self, audio: Vec<u8>) {
        self.queued_input_audio = Some(audio);
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.pending.clear();
        self.speech_starts.clear();
        self.queued_input_audio = None;
    }

    /// Byte offset for a millisecond position: `ms * sample_rate / 1000`.
    #[must_use]
    pub fn byte_offset(&self, ms: u32) -> usize {
        let offset = u64::from(ms) * u64::from(self.sample_rate) / 1000;
        usize::try_from(offset).unwrap_or(usize::MAX)
    }

    /// Folds one server event into the store.
    ///
    /// `captured` is the input audio sent so far; it is only read for
    /// `input_audio_buffer.speech_stopped`.
    pub fn apply(&mut self, event: &ServerEvent, captured: Option<&[u8]>) -> Option<ItemUpdate> {
        match event {
            ServerEvent::ConversationItemCreated { item, .. } => self.item_created(item),
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
                ..
            } => self.item_truncated(item_id, *audio_end_ms),
            ServerEvent::ConversationItemDeleted { item_id, .. } => self.item_deleted(item_id),
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => self.transcription_completed(item_id, transcript),
            ServerEvent::ResponseTextDelta { item_id, delta, .. } => {
                self.append_text(item_id, delta)
            }
            ServerEvent::ResponseAudioTranscriptDelta { item_id, delta, .. } => {
                self.append_transcript(item_id, delta)
            }
            ServerEvent::ResponseAudioDelta { item_id, delta, .. } => {
                self.append_audio(item_id, delta)
            }
            ServerEvent::ResponseFunctionCallArgumentsDelta { item_id, delta, .. } => {
                self.append_arguments(item_id, delta)
            }
            ServerEvent::ResponseOutputItemDone { item, .. } => self.output_item_done(item),
            ServerEvent::InputAudioBufferSpeechStarted {
                item_id,
                audio_start_ms,
                ..
            } => {
                self.speech_starts.insert(item_id, *audio_start_ms);
                None
            }
            ServerEvent::InputAudioBufferSpeechStopped {
                item_id,
                audio_end_ms,
                ..
            } => {
                if let Some(captured) = captured {
                    self.speech_stopped(item_id, *audio_end_ms, captured);
                }
                None
            }
            _ => None,
        }
    }

    fn item_created(&mut self, item: &Item) -> Option<ItemUpdate> {
        let Some(id) = item.id().map(str::to_string) else {
            tracing::warn!(kind = %item, "conversation.item.created without an item id");
            return None;
        };
        if let Some(existing) = self.items.get_mut(&id) {
            existing.raw = item.clone();
            return None;
        }

        let mut entry = ConversationItem::from_item(id.clone(), item.clone());
        if let Some(pending) = self.pending.take(&id) {
            entry.text.push_str(&pending.text);
            entry.transcript.push_str(&pending.transcript);
            if let Some(transcript) = pending.completed_transcript {
                entry.transcript = transcript;
            }
            entry.audio.extend_from_slice(&pending.audio);
            if let Some(tool) = entry.tool.as_mut() {
                tool.arguments.push_str(&pending.arguments);
            }
        }
        if entry.kind == ItemKind::Message && entry.role == Some(Role::User) {
            if let Some(audio) = self.queued_input_audio.take() {
                entry.audio.extend_from_slice(&audio);
                entry.status = ItemStatus::Completed;
            }
        }

        self.items.insert(id.clone(), entry);
        self.order.push(id.clone());
        Some(ItemUpdate::new(&id, ItemDelta::Created))
    }

    fn item_truncated(&mut self, item_id: &str, audio_end_ms: u32) -> Option<ItemUpdate> {
        let cut = self.byte_offset(audio_end_ms);
        let Some(item) = self.items.get_mut(item_id) else {
            tracing::debug!(item_id, "truncate for unknown item");
            return None;
        };
        let retained = cut.min(item.audio.len());
        item.audio.truncate(retained);
        item.transcript.clear();
        Some(ItemUpdate::new(item_id, ItemDelta::Truncated(retained)))
    }

    fn item_deleted(&mut self, item_id: &str) -> Option<ItemUpdate> {
        self.pending.take(item_id);
        self.items.remove(item_id)?;
        self.order.retain(|id| id != item_id);
        Some(ItemUpdate::new(item_id, ItemDelta::Deleted))
    }

    fn transcription_completed(&mut self, item_id: &str, transcript: &str) -> Option<ItemUpdate> {
        let transcript = if transcript.is_empty() {
            " ".to_string()
        } else {
            transcript.to_string()
        };
        if let Some(item) = self.items.get_mut(item_id) {
            item.transcript.clone_from(&transcript);
            Some(ItemUpdate::new(item_id, ItemDelta::Transcript(transcript)))
        } else {
            self.pending.entry_or_default(item_id).completed_transcript = Some(transcript);
            None
        }
    }

    fn append_text(&mut self, item_id: &str, delta: &str) -> Option<ItemUpdate> {
        if let Some(item) = self.items.get_mut(item_id) {
            item.text.push_str(delta);
            return Some(ItemUpdate::new(item_id, ItemDelta::Text(delta.to_string())));
        }
        self.pending.entry_or_default(item_id).text.push_str(delta);
        None
    }

    fn append_transcript(&mut self, item_id: &str, delta: &str) -> Option<ItemUpdate> {
        if let Some(item) = self.items.get_mut(item_id) {
            item.transcript.push_str(delta);
            return Some(ItemUpdate::new(
                item_id,
                ItemDelta::Transcript(delta.to_string()),
            ));
        }
        self.pending.entry_or_default(item_id).transcript.push_str(delta);
        None
    }

    fn append_audio(&mut self, item_id: &str, delta: &str) -> Option<ItemUpdate> {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(delta) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(item_id, error = %err, "dropping undecodable audio delta");
                return None;
            }
        };
        let appended = bytes.len();
        if let Some(item) = self.items.get_mut(item_id) {
            item.audio.extend_from_slice(&bytes);
            return Some(ItemUpdate::new(item_id, ItemDelta::Audio(appended)));
        }
        self.pending.entry_or_default(item_id).audio.extend_from_slice(&bytes);
        None
    }

    fn append_arguments(&mut self, item_id: &str, delta: &str) -> Option<ItemUpdate> {
        if let Some(item) = self.items.get_mut(item_id) {
            let Some(tool) = item.tool.as_mut() else {
                tracing::warn!(item_id, "argument delta for an item that is not a function call");
                return None;
            };
            tool.arguments.push_str(delta);
            return Some(ItemUpdate::new(
                item_id,
                ItemDelta::Arguments(delta.to_string()),
            ));
        }
        self.pending.entry_or_default(item_id).arguments.push_str(delta);
        None
    }

    fn output_item_done(&mut self, item: &Item) -> Option<ItemUpdate> {
        let id = item.id()?;
        let Some(entry) = self.items.get_mut(id) else {
            tracing::debug!(item_id = id, "output item done for unknown item");
            return None;
        };
        entry.status = ItemStatus::Completed;
        if let (Some(tool), Item::FunctionCall { arguments, .. }) = (entry.tool.as_mut(), item) {
            if tool.arguments.is_empty() {
                tool.arguments.clone_from(arguments);
            }
        }
        entry.raw = item.clone();
        Some(ItemUpdate::new(id, ItemDelta::Completed))
    }

    fn speech_stopped(&mut self, item_id: &str, audio_end_ms: u32, captured: &[u8]) {
        let start_ms = self.speech_starts.take(item_id).unwrap_or(0);
        let end = self.byte_offset(audio_end_ms).min(captured.len());
        let start = self.byte_offset(start_ms).min(end);
        self.queued_input_audio = Some(captured[start..end].to_vec());
    }
}
