//! Core infrastructure for tripwire.
//!
//! This crate provides the pieces the circuit breaker builds on but that do not
//! depend on it:
//! - [`Clock`] abstraction with a wall clock and a manually driven clock for tests
//! - Event system for observability

pub mod clock;
pub mod events;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use events::{BoxedEventListener, Event, EventListener, EventListeners, FnListener};
