//! Message sink
//!
//! Where streamed content lands. `MessageStore` is the in-memory,
//! order-preserving implementation; it keeps at most `max_messages` and
//! trims from the front.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Stable identifier of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    /// Empty assistant message about to receive the stream for `id`
    pub fn streaming(id: MessageId) -> Self {
        Self {
            id,
            is_streaming: true,
            ..Self::new(Role::Assistant, "")
        }
    }
}

/// Destination for message content
pub trait MessageSink: Send + Sync {
    fn append(&self, message: ChatMessage);

    /// Replace the content of `id`. Returns false if no such message is held
    fn update(&self, id: MessageId, content: &str, is_streaming: bool) -> bool;

    fn get(&self, id: MessageId) -> Option<ChatMessage>;
}

/// Bounded in-memory message list
pub struct MessageStore {
    messages: Mutex<VecDeque<ChatMessage>>,
    max_messages: usize,
}

impl MessageStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            max_messages: max_messages.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// All held messages, oldest first
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().iter().cloned().collect()
    }
}

impl MessageSink for MessageStore {
    fn append(&self, message: ChatMessage) {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        while messages.len() > self.max_messages {
            if let Some(dropped) = messages.pop_front() {
                debug!("Message {} trimmed from store", dropped.id);
            }
        }
    }

    fn update(&self, id: MessageId, content: &str, is_streaming: bool) -> bool {
        let mut messages = self.messages.lock();
        match messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(content);
                message.is_streaming = is_streaming;
                true
            }
            None => false,
        }
    }

    fn get(&self, id: MessageId) -> Option<ChatMessage> {
        self.messages.lock().iter().find(|m| m.id == id).cloned()
    }
}
