use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::lifecycle::StreamStatus;
use crate::session::StreamSession;

/// Point-in-time copy of one session, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub camera_id: String,
    pub status: StreamStatus,
    pub public_url: String,
    pub quality: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Seconds since the session was created; absent once it has failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

/// Project a session into a snapshot. Reads state under one lock and
/// never triggers a transition.
pub fn snapshot(session: &StreamSession) -> StreamSnapshot {
    let lifecycle = session.lifecycle();
    let status = lifecycle.status();
    let uptime_secs = if status.is_terminal() || session.is_stopping() {
        None
    } else {
        Some(session.uptime().as_secs())
    };

    StreamSnapshot {
        camera_id: session.camera_id.clone(),
        status,
        public_url: session.public_url(),
        quality: session.quality.clone(),
        attempts: lifecycle.attempts(),
        max_attempts: lifecycle.max_attempts(),
        last_error: lifecycle.last_error().map(str::to_string),
        created_at: session.created_at,
        uptime_secs,
    }
}
