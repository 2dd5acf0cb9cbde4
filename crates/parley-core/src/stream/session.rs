//! Per-stream session tracking

use std::time::{Duration, Instant};

use super::MessageId;

/// Runtime state of one streaming response
#[derive(Debug)]
pub struct StreamSession {
    pub message_id: MessageId,
    pub tag: String,
    /// Everything received so far; only ever grows
    pub content: String,
    /// Content items received
    pub chunk_count: usize,
    started: Instant,
}

impl StreamSession {
    pub fn new(message_id: MessageId, tag: &str) -> Self {
        Self {
            message_id,
            tag: tag.to_string(),
            content: String::new(),
            chunk_count: 0,
            started: Instant::now(),
        }
    }

    /// Append a content item and return the new chunk count
    pub fn push(&mut self, text: &str) -> usize {
        self.content.push_str(text);
        self.chunk_count += 1;
        self.chunk_count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the chunk just counted should produce a progress event
    pub fn at_progress_boundary(&self, batch: usize) -> bool {
        batch > 0 && self.chunk_count > 0 && self.chunk_count % batch == 0
    }
}
