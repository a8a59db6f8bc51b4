//! Host-facing facade
//!
//! `EventBridge` is what a host polling loop talks to: `start`/`stop`
//! control the connection, `is_active` reports liveness, and `on_update`
//! runs one tick (watchdog step, then at most one dispatched trigger).

use crate::config::BridgeConfig;
use crate::dispatcher::{Dispatcher, EventRouteTable, TriggerSink};
use crate::error::Result;
use crate::notify::Notifier;
use crate::queue::EventQueue;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Connector;
use crate::types::{ConnectionState, Notification, Trigger};
use crate::watchdog::AutoStarter;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};

pub struct EventBridge {
    supervisor: ConnectionSupervisor,
    dispatcher: Dispatcher,
    auto_starter: AutoStarter,
    auto_start: bool,
}

impl EventBridge {
    /// Build a bridge over the WebSocket transport
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let notifier = Notifier::new(config.notification_capacity);
        let supervisor =
            ConnectionSupervisor::new(&config, Arc::new(EventQueue::new()), notifier);
        Ok(Self::assemble(config, supervisor))
    }

    /// Build a bridge over a custom transport
    pub fn with_connector(config: BridgeConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let notifier = Notifier::new(config.notification_capacity);
        let supervisor = ConnectionSupervisor::with_connector(
            &config,
            connector,
            Arc::new(EventQueue::new()),
            notifier,
        );
        Ok(Self::assemble(config, supervisor))
    }

    fn assemble(config: BridgeConfig, supervisor: ConnectionSupervisor) -> Self {
        Self {
            supervisor,
            dispatcher: Dispatcher::default(),
            auto_starter: AutoStarter::new(
                Instant::now(),
                config.restart_debounce(),
                config.alive_grace(),
            ),
            auto_start: config.auto_start,
        }
    }

    /// Replace the route table
    pub fn with_routes(mut self, routes: EventRouteTable) -> Self {
        self.dispatcher = Dispatcher::new(routes);
        self
    }

    /// Open a new connection, force-resetting any previous one
    pub fn start(&self) -> Result<()> {
        self.supervisor.start()
    }

    /// Request the connection to stop; does not wait for it
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    pub fn is_active(&self) -> bool {
        self.supervisor.is_running()
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    pub fn set_auto_start(&mut self, enabled: bool) {
        self.auto_start = enabled;
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.supervisor.notifier().subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe_state()
    }

    /// Events received but not yet dispatched
    pub fn pending(&self) -> usize {
        self.supervisor.queue().len()
    }

    /// One polling tick: watchdog step (if enabled), then dispatch one event
    pub fn on_update(&mut self, now: Instant, sink: &mut dyn TriggerSink) -> Option<Trigger> {
        if self.auto_start {
            let supervisor = &self.supervisor;
            self.auto_starter.on_tick(
                now,
                || supervisor.is_running(),
                || {
                    if let Err(e) = supervisor.start() {
                        tracing::warn!(error = %e, "Auto-start failed");
                    }
                },
            );
        }

        self.dispatcher.tick(self.supervisor.queue(), sink)
    }
}
