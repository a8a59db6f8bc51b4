//! Per-tick dispatch from the event queue to named triggers
//!
//! Each tick takes at most one event off the queue and fires at most one
//! trigger, which bounds per-tick work on the host's polling loop. A burst
//! of events drains over several ticks in arrival order.

use crate::queue::EventQueue;
use crate::types::{Event, Trigger};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Receives fired triggers
pub trait TriggerSink {
    fn fire(&mut self, trigger: Trigger, event: &Event);
}

impl<F> TriggerSink for F
where
    F: FnMut(Trigger, &Event),
{
    fn fire(&mut self, trigger: Trigger, event: &Event) {
        self(trigger, event)
    }
}

/// Forwards fired triggers to an async consumer
impl TriggerSink for mpsc::UnboundedSender<(Trigger, Event)> {
    fn fire(&mut self, trigger: Trigger, event: &Event) {
        if self.send((trigger, event.clone())).is_err() {
            tracing::debug!(trigger = %trigger, "Trigger receiver dropped");
        }
    }
}

/// Static mapping from wire event name to trigger
///
/// Fixed at construction. Names without a route go to the fallback trigger
/// when one is configured and are dropped otherwise.
#[derive(Debug, Clone)]
pub struct EventRouteTable {
    routes: HashMap<String, Trigger>,
    fallback: Option<Trigger>,
}

impl EventRouteTable {
    /// Empty table with no fallback
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: None,
        }
    }

    /// Route `name` to `trigger`
    pub fn with_route(mut self, name: impl Into<String>, trigger: Trigger) -> Self {
        self.routes.insert(name.into(), trigger);
        self
    }

    /// Route unrecognized names to `trigger`
    pub fn with_fallback(mut self, trigger: Trigger) -> Self {
        self.fallback = Some(trigger);
        self
    }

    /// Resolve an event name
    pub fn route(&self, name: &str) -> Option<Trigger> {
        self.routes.get(name).copied().or(self.fallback)
    }

    pub fn fallback(&self) -> Option<Trigger> {
        self.fallback
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for EventRouteTable {
    /// Every known event name routed to its trigger, no fallback
    fn default() -> Self {
        Trigger::ALL
            .iter()
            .fold(Self::empty(), |table, t| table.with_route(t.event_name(), *t))
    }
}

/// Drains the queue one event per tick
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    routes: EventRouteTable,
}

impl Dispatcher {
    pub fn new(routes: EventRouteTable) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &EventRouteTable {
        &self.routes
    }

    /// Dispatch at most one event; returns the trigger fired, if any
    pub fn tick(&self, queue: &EventQueue, sink: &mut dyn TriggerSink) -> Option<Trigger> {
        if queue.is_empty() {
            return None;
        }

        let event = match queue.pop() {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::warn!("Queue is not empty but failed to dequeue, skipping tick");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Queue is not empty but failed to dequeue, skipping tick");
                return None;
            }
        };

        match self.routes.route(event.name()) {
            Some(trigger) => {
                tracing::trace!(event = %event.name(), trigger = %trigger, "Dispatching event");
                sink.fire(trigger, &event);
                Some(trigger)
            }
            None => {
                tracing::debug!(event = %event.name(), "No route for event, dropping");
                None
            }
        }
    }
}
