//! # bsevent-bridge
//!
//! Resilient WebSocket event-ingestion bridge with auto-restart and per-tick
//! trigger dispatch.
//!
//! ## Overview
//!
//! A long-lived WebSocket connection to a game event source is read on a
//! background task. Complete messages are decoded into `Event`s and buffered
//! in an `EventQueue`; the host's polling loop drains one event per tick and
//! fires the matching named `Trigger`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bsevent_bridge::{BridgeConfig, Event, EventBridge, Trigger};
//! use std::time::Instant;
//!
//! # async fn example() -> bsevent_bridge::Result<()> {
//! let mut bridge = EventBridge::new(BridgeConfig::default())?;
//! bridge.start()?;
//!
//! let mut on_trigger = |trigger: Trigger, event: &Event| {
//!     println!("{} at {}", trigger, event.timestamp());
//! };
//! // Call once per frame from the host loop
//! bridge.on_update(Instant::now(), &mut on_trigger);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **FrameAssembler**: fragments to complete messages, with a fragment cap
//! - **EventDecoder**: `{event, time}` envelope to `Event`
//! - **EventQueue**: FIFO between the receive task and the poll loop
//! - **ConnectionSupervisor**: session lifecycle, cancellation, teardown
//! - **AutoStarter**: debounced restart watchdog
//! - **Dispatcher**: one event per tick through `EventRouteTable`

pub mod bridge;
pub mod config;
pub mod decoder;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod notify;
pub mod queue;
pub mod supervisor;
pub mod transport;
pub mod types;
pub mod watchdog;

// Re-export core types
pub use bridge::EventBridge;
pub use config::{BridgeConfig, DEFAULT_MAX_FRAGMENTS, DEFAULT_URL};
pub use decoder::{DecodeError, EventDecoder};
pub use dispatcher::{Dispatcher, EventRouteTable, TriggerSink};
pub use error::{BridgeError, Result};
pub use frame::{Assembled, Fragment, FrameAssembler, FrameSource};
pub use notify::Notifier;
pub use queue::EventQueue;
pub use supervisor::ConnectionSupervisor;
pub use transport::{Connector, FrameCounts, FrameTap, WsConnector, WsFrameSource};
pub use types::{ConnectionState, Event, Notification, Severity, Trigger};
pub use watchdog::AutoStarter;
