//! `cadence-events`: in-process publish/subscribe for "entity changed"
//! notifications.
//!
//! Subscribers register for an `(EntityKind, EventKind)` pair under a unique
//! name. Publishing is fire-and-forget; `dispatch` awaits every matching
//! subscriber in registration order.

pub mod bus;
pub mod error;
pub mod types;

pub use bus::EventBus;
pub use error::{EventError, Result};
pub use types::{EntityEvent, EntityKind, EventKind, Subscriber, Subscription};
