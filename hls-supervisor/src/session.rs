use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::args::TranscodeOptions;
use crate::backoff::RetryPolicy;
use crate::lifecycle::{Directive, Lifecycle, LifecycleEvent, StreamStatus};
use crate::error::StreamError;
use crate::output::OutputNamespace;

/// One camera's stream as seen by the registry.
///
/// Status is written only through [`StreamSession::apply`], which the owning
/// supervisor calls. The process handle lives inside the supervisor task and
/// is never reachable from here.
#[derive(Debug)]
pub struct StreamSession {
    pub camera_id: String,
    /// Source URL with the password masked
    pub source_redacted: String,
    pub output: OutputNamespace,
    /// Fixed for the session's lifetime
    pub quality: String,
    pub options: TranscodeOptions,
    pub created_at: DateTime<Utc>,
    started: Instant,
    lifecycle: RwLock<Lifecycle>,
    stop: CancellationToken,
}

impl StreamSession {
    pub fn new(
        camera_id: String,
        source_redacted: String,
        output: OutputNamespace,
        quality: String,
        options: TranscodeOptions,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            camera_id,
            source_redacted,
            output,
            quality,
            options,
            created_at: Utc::now(),
            started: Instant::now(),
            lifecycle: RwLock::new(Lifecycle::new(policy)),
            stop: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.lifecycle.read().status()
    }

    pub fn public_url(&self) -> String {
        self.output.public_url()
    }

    /// Copy of status, attempts, max attempts and last error taken under one lock
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.read().clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    pub(crate) fn apply(&self, event: LifecycleEvent) -> Result<(Directive, Lifecycle), StreamError> {
        let mut lifecycle = self.lifecycle.write();
        let directive = lifecycle.apply(event)?;
        Ok((directive, lifecycle.clone()))
    }

    /// Set the stop flag. Checked before every spawn attempt.
    pub(crate) fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}
