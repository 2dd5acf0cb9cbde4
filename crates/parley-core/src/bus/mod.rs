//! Event bus
//!
//! Central hub for core events. One explicitly constructed [`EventBus`] is
//! passed to every component that publishes or listens.

mod event_bus;
mod events;

pub use event_bus::{EventBus, SubscriptionHandle, SubscriptionId};
pub use events::{Event, EventKind, EventPayload};
