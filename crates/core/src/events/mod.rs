//! Change events module.
//!
//! Provides the change event type, the action kinds, and the sink trait the
//! interceptor fires events into after a transaction commits. Runtime adapters
//! implement the sink to hand events to their dispatch bus.

mod action;
mod change_event;
mod sink;

pub use action::*;
pub use change_event::*;
pub use sink::*;
