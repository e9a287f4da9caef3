//! Event emitter boundary.
//!
//! The manager publishes through the [`EventSink`] trait; delivery to
//! connected observers is up to whoever holds a receiver.

pub mod events;

pub use events::{EventBroadcaster, EventSink, FanoutSink, JobEvent, RecordingSink};
