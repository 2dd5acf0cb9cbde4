//! Parley core library
//!
//! Typed event bus, observable key/value state, streaming section parser
//! and stream processor for a chat assistant front end.

pub mod bus;
pub mod config;
pub mod error;
pub mod parser;
pub mod state;
pub mod stream;

pub use bus::{Event, EventBus, EventKind, EventPayload, SubscriptionHandle};
pub use config::{ConfigHandle, CoreConfig};
pub use error::{CoreError, ProviderError, Result};
pub use parser::{ParsedSections, ResponseParser, TrimSection};
pub use state::{StateBus, StateKey, StateValue};
pub use stream::{MessageId, MessageStore, StreamItem, StreamOutcome, StreamProcessor};
