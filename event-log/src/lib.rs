//! Stream event journal for camstream
//!
//! Lifecycle events (connect, disconnect, reconnect, failure, stop, cleanup
//! warnings) are published by the stream supervisor and recorded here in an
//! SQLite journal for later diagnostics.

mod error;
mod event;
mod journal;
mod writer;

pub use error::JournalError;
pub use event::{EventType, Severity, StoredEvent, StreamEvent};
pub use journal::EventJournal;
pub use writer::spawn_journal_writer;
