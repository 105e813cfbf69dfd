//! Enrichment events module.
//!
//! Provides the event types a session emits after store changes and the sink
//! trait the presentation layer implements to subscribe to them.

mod enrichment_event;
mod sink;

pub use enrichment_event::*;
pub use sink::*;
