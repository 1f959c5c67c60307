//! Change event sink trait and implementations.

use std::sync::{Arc, Mutex};

use log::error;
use tokio::sync::mpsc;

use super::{Action, ChangeEvent};
use crate::errors::{Error, Result};

/// Trait for receiving change events.
///
/// The interceptor calls this once per entity per category after a commit.
/// Sinks are shared across threads; every thread completing a transaction
/// fires into the same sink.
///
/// # Design Rules
///
/// - `fire_event()` must be fast and non-blocking (no network calls, no DB writes)
/// - Implementations should queue events for async processing
/// - Delivery guarantees belong to whatever sits behind the sink
pub trait ChangeEventSink: Send + Sync {
    /// Fire a single change event.
    fn fire_event(&self, event: ChangeEvent) -> Result<()>;
}

/// No-op implementation for contexts that don't need events.
#[derive(Clone, Default)]
pub struct NoOpEventSink;

impl ChangeEventSink for NoOpEventSink {
    fn fire_event(&self, _event: ChangeEvent) -> Result<()> {
        Ok(())
    }
}

/// Mock sink for testing - collects fired events.
#[derive(Clone, Default)]
pub struct MockEventSink {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl MockEventSink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all collected events, in firing order.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns `(action, uuid)` pairs, in firing order.
    pub fn fired(&self) -> Vec<(Action, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.action, e.uuid.clone()))
            .collect()
    }

    /// Returns the actions fired for one entity, in firing order.
    pub fn actions_for(&self, uuid: &str) -> Vec<Action> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.uuid == uuid)
            .map(|e| e.action)
            .collect()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Returns the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Returns true if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl ChangeEventSink for MockEventSink {
    fn fire_event(&self, event: ChangeEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Sink that hands events to an async dispatch bus over an unbounded channel.
///
/// Sending never blocks, so it is safe to fire from inside a transaction
/// completion callback on a runtime thread.
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelEventSink {
    /// Creates the sink and the receiver the dispatch bus should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ChangeEventSink for ChannelEventSink {
    fn fire_event(&self, event: ChangeEvent) -> Result<()> {
        self.sender.send(event).map_err(|e| {
            error!(
                "Failed to send change event {} to dispatch queue",
                e.0.topic()
            );
            Error::SinkClosed
        })
    }
}
