use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A lifecycle event for one camera's stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub camera_id: String,
    pub attempt: Option<u32>,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl StreamEvent {
    /// Create a new event stamped with the current time
    pub fn new(event_type: EventType, camera_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            severity: event_type.default_severity(),
            camera_id: camera_id.into(),
            attempt: None,
            message: None,
            details: None,
        }
    }

    /// Set the retry attempt this event belongs to
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Set a human readable description
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set event details as JSON
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Type of stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    StreamStarting,
    StreamConnected,
    StreamDisconnected,
    StreamReconnecting,
    StreamFailed,
    StreamStopped,
    CleanupWarning,
}

impl EventType {
    /// Get the default severity for this event type
    pub fn default_severity(self) -> Severity {
        match self {
            Self::StreamStarting => Severity::Info,
            Self::StreamConnected => Severity::Info,
            Self::StreamDisconnected => Severity::Warning,
            Self::StreamReconnecting => Severity::Info,
            Self::StreamFailed => Severity::Error,
            Self::StreamStopped => Severity::Info,
            Self::CleanupWarning => Severity::Warning,
        }
    }

    /// Get string representation for database storage
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamStarting => "StreamStarting",
            Self::StreamConnected => "StreamConnected",
            Self::StreamDisconnected => "StreamDisconnected",
            Self::StreamReconnecting => "StreamReconnecting",
            Self::StreamFailed => "StreamFailed",
            Self::StreamStopped => "StreamStopped",
            Self::CleanupWarning => "CleanupWarning",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "StreamStarting" => Some(Self::StreamStarting),
            "StreamConnected" => Some(Self::StreamConnected),
            "StreamDisconnected" => Some(Self::StreamDisconnected),
            "StreamReconnecting" => Some(Self::StreamReconnecting),
            "StreamFailed" => Some(Self::StreamFailed),
            "StreamStopped" => Some(Self::StreamStopped),
            "CleanupWarning" => Some(Self::CleanupWarning),
            _ => None,
        }
    }
}

/// How loudly an event is reported; mirrors the tracing level it is logged at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        [Self::Info, Self::Warning, Self::Error]
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s))
    }
}

/// A journaled event with its row ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    #[serde(flatten)]
    pub event: StreamEvent,
}
