//! Bus events
//!
//! The event set is closed: every category is a variant of [`EventPayload`]
//! and dispatch matches on [`EventKind`] rather than on runtime types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::StateValue;
use crate::stream::MessageId;

/// Event categories subscribers can register for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StateChanged,
    StateCleared,
    NormalToken,
    NormalResponseComplete,
    MachineTrimComplete,
    FullyInferableResponse,
    ParsingError,
    StreamStarted,
    StreamProgress,
    StreamCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::StateChanged,
        EventKind::StateCleared,
        EventKind::NormalToken,
        EventKind::NormalResponseComplete,
        EventKind::MachineTrimComplete,
        EventKind::FullyInferableResponse,
        EventKind::ParsingError,
        EventKind::StreamStarted,
        EventKind::StreamProgress,
        EventKind::StreamCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChanged => "state_changed",
            EventKind::StateCleared => "state_cleared",
            EventKind::NormalToken => "normal_token",
            EventKind::NormalResponseComplete => "normal_response_complete",
            EventKind::MachineTrimComplete => "machine_trim_complete",
            EventKind::FullyInferableResponse => "fully_inferable_response",
            EventKind::ParsingError => "parsing_error",
            EventKind::StreamStarted => "stream_started",
            EventKind::StreamProgress => "stream_progress",
            EventKind::StreamCompleted => "stream_completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by an event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A state key was set or removed
    StateChanged {
        key: String,
        old: Option<StateValue>,
        new: Option<StateValue>,
    },
    /// The state store was emptied
    StateCleared { removed: usize },
    /// Live token of the user-facing section
    NormalToken { token: String },
    /// The user-facing section is complete
    NormalResponseComplete { content: String },
    /// The machine trim section is complete and carries new information
    MachineTrimComplete { content: String },
    /// The machine trim section held nothing but inferable content
    FullyInferableResponse,
    /// The parser was driven incorrectly
    ParsingError { message: String },
    /// A stream was admitted for processing
    StreamStarted { message_id: MessageId, tag: String },
    /// Lightweight progress signal, batched
    StreamProgress {
        message_id: MessageId,
        chunk_count: usize,
        content_length: usize,
    },
    /// A stream was finalized
    StreamCompleted {
        message_id: MessageId,
        tag: String,
        success: bool,
        content_length: usize,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::StateChanged { .. } => EventKind::StateChanged,
            EventPayload::StateCleared { .. } => EventKind::StateCleared,
            EventPayload::NormalToken { .. } => EventKind::NormalToken,
            EventPayload::NormalResponseComplete { .. } => EventKind::NormalResponseComplete,
            EventPayload::MachineTrimComplete { .. } => EventKind::MachineTrimComplete,
            EventPayload::FullyInferableResponse => EventKind::FullyInferableResponse,
            EventPayload::ParsingError { .. } => EventKind::ParsingError,
            EventPayload::StreamStarted { .. } => EventKind::StreamStarted,
            EventPayload::StreamProgress { .. } => EventKind::StreamProgress,
            EventPayload::StreamCompleted { .. } => EventKind::StreamCompleted,
        }
    }
}

/// Immutable, source-tagged notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            source: source.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_payload() {
        let event = Event::new(
            "test",
            EventPayload::NormalToken {
                token: "hi".into(),
            },
        );
        assert_eq!(event.kind(), EventKind::NormalToken);
        assert_eq!(event.source, "test");

        let event = Event::new("test", EventPayload::FullyInferableResponse);
        assert_eq!(event.kind(), EventKind::FullyInferableResponse);
    }

    #[test]
    fn test_kind_names_are_unique() {
        let mut names: Vec<_> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let json = serde_json::to_value(EventPayload::StateCleared { removed: 2 }).unwrap();
        assert_eq!(json["type"], "state_cleared");
        assert_eq!(json["removed"], 2);
    }
}
