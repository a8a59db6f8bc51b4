//! Unbounded FIFO shared between the receive loop and the poll loop

use crate::error::{BridgeError, Result};
use crate::types::Event;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Thread-safe event buffer
///
/// One producer (the receive loop) pushes, one consumer (the dispatcher)
/// pops. Insertion order is delivery order; nothing is reordered or
/// deduplicated.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the back
    pub fn push(&self, event: Event) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| BridgeError::Queue(format!("Failed to acquire queue lock: {}", e)))?;
        events.push_back(event);
        Ok(())
    }

    /// Take the oldest event without blocking
    pub fn pop(&self) -> Result<Option<Event>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| BridgeError::Queue(format!("Failed to acquire queue lock: {}", e)))?;
        Ok(events.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buffered events; a poisoned queue reports its last length
    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(events) => events.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drop every buffered event, returning how many were discarded
    pub fn clear(&self) -> usize {
        match self.events.lock() {
            Ok(mut events) => {
                let n = events.len();
                events.clear();
                n
            }
            Err(_) => 0,
        }
    }
}
