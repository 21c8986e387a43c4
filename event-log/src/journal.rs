use crate::error::JournalError;
use crate::event::{EventType, Severity, StoredEvent, StreamEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

const SELECT_COLUMNS: &str =
    "SELECT id, timestamp, event_type, severity, camera_id, attempt, message, details FROM stream_events";

/// Stream event journal backed by SQLite
pub struct EventJournal {
    conn: Connection,
}

impl EventJournal {
    /// Get the default database path
    pub fn default_path() -> Result<PathBuf, JournalError> {
        let data_dir = dirs::data_dir().ok_or(JournalError::NoDataDir)?;
        Ok(data_dir.join("camstream").join("events.db"))
    }

    /// Open the journal at the default path
    pub fn open() -> Result<Self, JournalError> {
        let path = Self::default_path()?;
        Self::open_at(&path)
    }

    /// Open the journal at a specific path
    pub fn open_at(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|source| JournalError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let journal = Self { conn };
        journal.init_schema()?;
        Ok(journal)
    }

    fn init_schema(&self) -> Result<(), JournalError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stream_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                camera_id TEXT NOT NULL,
                attempt INTEGER,
                message TEXT,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_stream_timestamp ON stream_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_stream_camera ON stream_events(camera_id);",
        )?;
        Ok(())
    }

    /// Record an event, returning its row ID
    pub fn log(&self, event: &StreamEvent) -> Result<i64, JournalError> {
        let details_json = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            "INSERT INTO stream_events
             (timestamp, event_type, severity, camera_id, attempt, message, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.severity.as_str(),
                event.camera_id,
                event.attempt,
                event.message,
                details_json,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent events across all cameras, newest first
    pub fn query_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, JournalError> {
        self.select("", params![limit])
    }

    /// Most recent events for one camera, newest first
    pub fn query_by_camera(&self, camera_id: &str, limit: usize) -> Result<Vec<StoredEvent>, JournalError> {
        self.select("WHERE camera_id = ?1", params![camera_id, limit])
    }

    fn select(&self, filter: &str, args: impl rusqlite::Params) -> Result<Vec<StoredEvent>, JournalError> {
        let limit_slot = if filter.is_empty() { "?1" } else { "?2" };
        let sql = format!(
            "{} {} ORDER BY timestamp DESC, id DESC LIMIT {}",
            SELECT_COLUMNS, filter, limit_slot
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, Self::read_row)?;

        let events = rows
            .filter_map(|row| match row {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Skipping unreadable journal row: {}", e);
                    None
                }
            })
            .collect();
        Ok(events)
    }

    /// Prune events older than the specified number of days
    pub fn prune_older_than(&self, days: u32) -> Result<usize, JournalError> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);

        let deleted = self.conn.execute(
            "DELETE FROM stream_events WHERE timestamp < ?",
            [cutoff.to_rfc3339()],
        )?;

        Ok(deleted)
    }

    /// Get the total number of events
    pub fn count(&self) -> Result<usize, JournalError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM stream_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// `None` for rows written with an event type this build does not know
    fn read_row(row: &rusqlite::Row) -> rusqlite::Result<Option<StoredEvent>> {
        let id: i64 = row.get("id")?;
        let recorded: String = row.get("timestamp")?;
        let kind: String = row.get("event_type")?;
        let level: String = row.get("severity")?;
        let details: Option<String> = row.get("details")?;

        let Some(event_type) = EventType::from_str(&kind) else {
            tracing::warn!(row_id = id, "Skipping journal row with unknown event type '{}'", kind);
            return Ok(None);
        };
        let severity = Severity::from_str(&level).unwrap_or_else(|| event_type.default_severity());

        Ok(Some(StoredEvent {
            id,
            event: StreamEvent {
                timestamp: DateTime::parse_from_rfc3339(&recorded)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                event_type,
                severity,
                camera_id: row.get("camera_id")?,
                attempt: row.get("attempt")?,
                message: row.get("message")?,
                details: details.and_then(|raw| serde_json::from_str(&raw).ok()),
            },
        }))
    }
}
