use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::event::StreamEvent;
use crate::journal::EventJournal;

/// Drain published stream events into the journal.
///
/// Runs on the blocking pool because SQLite writes are synchronous. The task
/// ends when every sender is dropped and returns the number of events written.
/// Write failures are logged and skipped; the journal is a best-effort sink.
pub fn spawn_journal_writer(
    journal: EventJournal,
    mut rx: broadcast::Receiver<StreamEvent>,
) -> JoinHandle<u64> {
    tokio::task::spawn_blocking(move || {
        let mut written = 0u64;
        loop {
            match rx.blocking_recv() {
                Ok(event) => match journal.log(&event) {
                    Ok(_) => written += 1,
                    Err(e) => {
                        tracing::warn!(camera_id = %event.camera_id, "Could not journal stream event: {}", e);
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Event journal fell behind, {} events dropped", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
        written
    })
}
