//! Streaming response handling
//!
//! An upstream producer yields [`StreamItem`]s; [`StreamProcessor`] drains
//! them into a [`MessageSink`] and keeps the event bus informed.

mod cancellation;
mod item;
mod processor;
mod session;
mod sink;

pub use cancellation::StreamCancellation;
pub use item::StreamItem;
pub use processor::{StreamOutcome, StreamProcessor};
pub use session::StreamSession;
pub use sink::{ChatMessage, MessageId, MessageSink, MessageStore, Role};
