//! Thread boundary between the eval engine and the editor
//!
//! The engine's worker publishes evaluation outcomes over a crossbeam
//! channel; the editor drains them at its own pace through
//! [`EngineBridge`]. Submissions travel the other way through the
//! engine's coalescing slot, not a channel, so only the latest snapshot
//! survives a burst of edits.

use crate::types::{PortDesc, PropertyResult};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::HashMap;
use std::time::Duration;

/// Channel capacity for events (engine -> editor)
const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Messages published after each evaluation pass
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Per-block outcome: errors, property results, port types
    BlockStatus {
        id: String,
        errors: Vec<String>,
        properties: HashMap<String, PropertyResult>,
        inputs: Vec<PortDesc>,
        outputs: Vec<PortDesc>,
    },

    /// A zone failed to build its runtime
    ZoneError { zone: String, error: String },

    /// One coalesced evaluation pass finished
    EvalDone { pass: u64 },
}

/// Editor-side handle for receiving engine events
pub struct EngineBridge {
    pub event_rx: Receiver<EngineEvent>,
}

impl EngineBridge {
    /// Create a bridge pair: `(bridge_for_editor, sender_for_engine)`
    pub fn new() -> (Self, Sender<EngineEvent>) {
        let (event_tx, event_rx) = bounded(EVENT_CHANNEL_CAPACITY);
        (Self { event_rx }, event_tx)
    }

    /// Drain all pending events
    pub fn drain(&self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Try to receive a single event without blocking
    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Block until the next event or timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Block until the next `EvalDone`, draining everything before it
    pub fn wait_eval_done(&self, timeout: Duration) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        let deadline = std::time::Instant::now() + timeout;
        while let Some(remaining) = deadline.checked_duration_since(std::time::Instant::now()) {
            match self.event_rx.recv_timeout(remaining) {
                Ok(event) => {
                    let done = matches!(event, EngineEvent::EvalDone { .. });
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_channel() {
        let (bridge, tx) = EngineBridge::new();
        tx.send(EngineEvent::EvalDone { pass: 1 }).unwrap();
        tx.send(EngineEvent::EvalDone { pass: 2 }).unwrap();

        assert_eq!(bridge.drain().len(), 2);
        assert!(bridge.try_recv().is_none());
    }

    #[test]
    fn test_wait_eval_done_stops_at_marker() {
        let (bridge, tx) = EngineBridge::new();
        tx.send(EngineEvent::ZoneError {
            zone: "z".to_string(),
            error: "down".to_string(),
        })
        .unwrap();
        tx.send(EngineEvent::EvalDone { pass: 1 }).unwrap();
        tx.send(EngineEvent::EvalDone { pass: 2 }).unwrap();

        let events = bridge.wait_eval_done(Duration::from_millis(100));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], EngineEvent::EvalDone { pass: 1 }));
    }
}
