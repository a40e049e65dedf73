//! `billingflow-events`: event mechanics shared by the billing crates.
//!
//! Domain-agnostic: the event trait, envelopes, the pub/sub bus, and the
//! decide-then-apply helper for aggregates.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EnvelopeSequencer, EventEnvelope};
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
