//! Core types for the bsevent bridge
//!
//! All types use camelCase JSON serialization for wire compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single decoded event from the remote source
///
/// Immutable once constructed. Produced by the decoder, consumed exactly
/// once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Event name as sent by the source (e.g., "noteCut", "pause")
    name: String,

    /// Source-defined timestamp; 0 when the source omitted it
    timestamp: i64,

    /// Remaining envelope fields, kept only when status forwarding is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<serde_json::Value>,
}

impl Event {
    /// Create an event without status payload
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            status: None,
        }
    }

    /// Attach an opaque status payload
    pub fn with_status(mut self, status: serde_json::Value) -> Self {
        self.status = Some(status);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn status(&self) -> Option<&serde_json::Value> {
        self.status.as_ref()
    }
}

/// Lifecycle state of the connection supervisor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Faulted,
}

impl ConnectionState {
    /// Whether a socket may be live in this state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Closing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Faulted => "faulted",
        };
        f.write_str(s)
    }
}

/// Named output trigger a consumer can react to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    Hello,
    SongStart,
    NoteCut,
    ObstacleEnter,
    ObstacleExit,
    NoteMissed,
    BombCut,
    BombMissed,
    Finished,
    Failed,
    SoftFailed,
    ScoreChanged,
    EnergyChanged,
    NoteSpawned,
    Other,
    BeatmapEvent,
    Pause,
    Resume,
    Menu,
}

impl Trigger {
    /// Every trigger, in declaration order
    pub const ALL: [Trigger; 19] = [
        Trigger::Hello,
        Trigger::SongStart,
        Trigger::NoteCut,
        Trigger::ObstacleEnter,
        Trigger::ObstacleExit,
        Trigger::NoteMissed,
        Trigger::BombCut,
        Trigger::BombMissed,
        Trigger::Finished,
        Trigger::Failed,
        Trigger::SoftFailed,
        Trigger::ScoreChanged,
        Trigger::EnergyChanged,
        Trigger::NoteSpawned,
        Trigger::Other,
        Trigger::BeatmapEvent,
        Trigger::Pause,
        Trigger::Resume,
        Trigger::Menu,
    ];

    /// Output name exposed to the host (e.g., "NoteCut")
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Hello => "Hello",
            Trigger::SongStart => "SongStart",
            Trigger::NoteCut => "NoteCut",
            Trigger::ObstacleEnter => "ObstacleEnter",
            Trigger::ObstacleExit => "ObstacleExit",
            Trigger::NoteMissed => "NoteMissed",
            Trigger::BombCut => "BombCut",
            Trigger::BombMissed => "BombMissed",
            Trigger::Finished => "Finished",
            Trigger::Failed => "Failed",
            Trigger::SoftFailed => "SoftFailed",
            Trigger::ScoreChanged => "ScoreChanged",
            Trigger::EnergyChanged => "EnergyChanged",
            Trigger::NoteSpawned => "NoteSpawned",
            Trigger::Other => "Other",
            Trigger::BeatmapEvent => "BeatmapEvent",
            Trigger::Pause => "Pause",
            Trigger::Resume => "Resume",
            Trigger::Menu => "Menu",
        }
    }

    /// Wire event name routed to this trigger (e.g., "noteCut")
    pub fn event_name(&self) -> &'static str {
        match self {
            Trigger::Hello => "hello",
            Trigger::SongStart => "songStart",
            Trigger::NoteCut => "noteCut",
            Trigger::ObstacleEnter => "obstacleEnter",
            Trigger::ObstacleExit => "obstacleExit",
            Trigger::NoteMissed => "noteMissed",
            Trigger::BombCut => "bombCut",
            Trigger::BombMissed => "bombMissed",
            Trigger::Finished => "finished",
            Trigger::Failed => "failed",
            Trigger::SoftFailed => "softFailed",
            Trigger::ScoreChanged => "scoreChanged",
            Trigger::EnergyChanged => "energyChanged",
            Trigger::NoteSpawned => "noteSpawned",
            Trigger::Other => "other",
            Trigger::BeatmapEvent => "beatmapEvent",
            Trigger::Pause => "pause",
            Trigger::Resume => "resume",
            Trigger::Menu => "menu",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

/// Human-readable start/stop/error notice for observability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub severity: Severity,

    /// Short header (e.g., "BsEvent", "BsEvent::transport")
    pub title: String,

    pub message: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,
}

impl Notification {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, message)
    }

    fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            timestamp: now_millis(),
        }
    }
}

/// Current time in Unix milliseconds
fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new("noteCut", 1234);
        assert_eq!(event.name(), "noteCut");
        assert_eq!(event.timestamp(), 1234);
        assert!(event.status().is_none());
    }

    #[test]
    fn test_event_with_status() {
        let event = Event::new("scoreChanged", 5).with_status(serde_json::json!({"score": 100}));
        assert_eq!(event.status().unwrap()["score"], 100);
    }

    #[test]
    fn test_event_serialization_skips_empty_status() {
        let json = serde_json::to_string(&Event::new("pause", 1)).unwrap();
        assert_eq!(json, r#"{"name":"pause","timestamp":1}"#);
    }

    #[test]
    fn test_connection_state_activity() {
        assert!(!ConnectionState::Idle.is_active());
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Open.is_active());
        assert!(ConnectionState::Closing.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert!(!ConnectionState::Faulted.is_active());
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_trigger_names_are_distinct() {
        let mut names: Vec<&str> = Trigger::ALL.iter().map(|t| t.event_name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Trigger::ALL.len());
    }

    #[test]
    fn test_trigger_display() {
        assert_eq!(Trigger::NoteCut.to_string(), "NoteCut");
        assert_eq!(Trigger::BeatmapEvent.event_name(), "beatmapEvent");
    }

    #[test]
    fn test_notification_severity() {
        let n = Notification::error("BsEvent::transport", "connection reset");
        assert_eq!(n.severity, Severity::Error);
        assert!(n.timestamp > 0);

        let json = serde_json::to_string(&Notification::info("BsEvent", "started")).unwrap();
        assert!(json.contains("\"severity\":\"info\""));
    }
}
