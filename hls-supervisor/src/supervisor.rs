use std::sync::Arc;
use std::time::Duration;

use event_log::{EventType, StreamEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StreamError;
use crate::launcher::{Invocation, Launcher, TranscoderProcess};
use crate::lifecycle::{Directive, Lifecycle, LifecycleEvent};
use crate::session::StreamSession;

/// How a watched process ended
enum Watch {
    /// Stop was requested and the process has been terminated
    Stopped,
    Exited(String),
}

/// Owns the transcoder process of one session: spawns it, watches it,
/// backs off and respawns until stopped or out of attempts.
pub struct Supervisor {
    session: Arc<StreamSession>,
    launcher: Arc<dyn Launcher>,
    invocation: Invocation,
    grace: Duration,
    events: broadcast::Sender<StreamEvent>,
}

impl Supervisor {
    pub fn new(
        session: Arc<StreamSession>,
        launcher: Arc<dyn Launcher>,
        invocation: Invocation,
        grace: Duration,
        events: broadcast::Sender<StreamEvent>,
    ) -> Self {
        Self {
            session,
            launcher,
            invocation,
            grace,
            events,
        }
    }

    /// Run the supervision loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let stop = self.session.stop_token();
        let camera_id = self.session.camera_id.as_str();

        loop {
            // Checked before every spawn; a stop during backoff ends here
            if stop.is_cancelled() {
                break;
            }

            tracing::info!(
                camera_id = %camera_id,
                quality = %self.session.quality,
                "Starting transcoder for {}",
                self.session.source_redacted
            );

            let failure = match self.launcher.launch(&self.invocation).await {
                Ok(process) => match self.watch(process, &stop).await {
                    Ok(Watch::Stopped) => break,
                    Ok(Watch::Exited(reason)) => LifecycleEvent::Exited(reason),
                    Err(e) => {
                        tracing::error!(camera_id = %camera_id, "Supervision aborted: {}", e);
                        break;
                    }
                },
                Err(e) => LifecycleEvent::SpawnFailed(e.to_string()),
            };

            if stop.is_cancelled() {
                break;
            }

            match self.handle_failure(failure, &stop).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(camera_id = %camera_id, "Supervision aborted: {}", e);
                    break;
                }
            }
        }

        tracing::debug!(camera_id = %camera_id, "Supervisor finished");
    }

    /// Wait for the process to exit, promoting the session once it has
    /// survived the grace period.
    async fn watch(
        &self,
        mut process: Box<dyn TranscoderProcess>,
        stop: &CancellationToken,
    ) -> Result<Watch, StreamError> {
        let grace = tokio::time::sleep(self.grace);
        tokio::pin!(grace);
        let mut promoted = false;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tracing::info!(camera_id = %self.session.camera_id, "Stopping transcoder");
                    process.terminate().await;
                    return Ok(Watch::Stopped);
                }
                exit = process.wait() => {
                    let reason = match exit {
                        Ok(exit) => exit.to_string(),
                        Err(e) => format!("lost track of transcoder: {}", e),
                    };
                    return Ok(Watch::Exited(reason));
                }
                _ = &mut grace, if !promoted => {
                    promoted = true;
                    self.session.apply(LifecycleEvent::GraceElapsed)?;
                    tracing::info!(
                        camera_id = %self.session.camera_id,
                        pid = process.id().unwrap_or_default(),
                        "Stream connected"
                    );
                    self.publish(StreamEvent::new(EventType::StreamConnected, &self.session.camera_id));
                }
            }
        }
    }

    /// Record a failed cycle. Returns `Ok(true)` when another attempt is due.
    async fn handle_failure(&self, failure: LifecycleEvent, stop: &CancellationToken) -> Result<bool, StreamError> {
        let camera_id = &self.session.camera_id;

        let (directive, state) = self.session.apply(failure)?;
        let reason = state.last_error().unwrap_or("unknown").to_string();
        tracing::warn!(
            camera_id = %camera_id,
            attempt = state.attempts(),
            max_attempts = state.max_attempts(),
            "Stream disconnected: {}",
            reason
        );
        self.publish(
            StreamEvent::new(EventType::StreamDisconnected, camera_id.as_str())
                .with_attempt(state.attempts())
                .with_message(reason.clone()),
        );

        let delay = match directive {
            Directive::RetryAfter(delay) => delay,
            Directive::GiveUp | Directive::Continue => {
                let (_, state) = self.session.apply(LifecycleEvent::RetriesExhausted)?;
                self.report_failed(&state);
                return Ok(false);
            }
        };

        self.session.apply(LifecycleEvent::BackoffStarted)?;
        tracing::info!(
            camera_id = %camera_id,
            attempt = state.attempts(),
            "Reconnecting in {:?}",
            delay
        );
        self.publish(
            StreamEvent::new(EventType::StreamReconnecting, camera_id.as_str())
                .with_attempt(state.attempts())
                .with_details(serde_json::json!({ "delay_ms": delay.as_millis() as u64 })),
        );

        tokio::select! {
            biased;
            _ = stop.cancelled() => return Ok(false),
            _ = tokio::time::sleep(delay) => {}
        }

        self.session.apply(LifecycleEvent::RetryDue)?;
        Ok(true)
    }

    fn report_failed(&self, state: &Lifecycle) {
        let last_error = state.last_error().unwrap_or("unknown").to_string();
        let failure = StreamError::PermanentFailure {
            attempts: state.attempts(),
            last_error,
        };
        tracing::error!(camera_id = %self.session.camera_id, "{}", failure);
        self.publish(
            StreamEvent::new(EventType::StreamFailed, self.session.camera_id.as_str())
                .with_attempt(state.attempts())
                .with_message(failure.to_string()),
        );
    }

    /// Best effort: nobody listening is fine
    fn publish(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}
