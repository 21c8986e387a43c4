use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Event journal query failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cannot prepare journal directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open event journal at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("No user data directory; set journal_path in server.toml")]
    NoDataDir,

    #[error("Event details are not valid JSON: {0}")]
    Details(#[from] serde_json::Error),
}
