//! The authoritative table of active stream sessions.
//!
//! At most one session exists per camera id. Mutations for one id are
//! serialised through a per-id async mutex; different ids never contend.
//! DashMap guards are never held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use config_manager::{CameraConfig, StreamingConfig};
use dashmap::DashMap;
use event_log::{EventType, StreamEvent};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::args::{self, TranscodeOptions};
use crate::backoff::RetryPolicy;
use crate::error::StreamError;
use crate::launcher::{FfmpegLauncher, Invocation, Launcher};
use crate::lifecycle::StreamStatus;
use crate::output::{self, OutputNamespace};
use crate::quality::{self, QualityProfile};
use crate::session::StreamSession;
use crate::status::{self, StreamSnapshot};
use crate::supervisor::Supervisor;

/// Events buffered per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of a successful start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStarted {
    pub public_url: String,
    /// Quality actually in use (after fallback)
    pub quality: String,
    /// True when an already connected session was returned unchanged
    pub reused: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub success: bool,
    pub message: String,
}

struct SessionEntry {
    session: Arc<StreamSession>,
    task: JoinHandle<()>,
}

/// Constructed once at startup and shared by reference with request handlers.
pub struct StreamRegistry {
    config: StreamingConfig,
    policy: RetryPolicy,
    launcher: Arc<dyn Launcher>,
    sessions: DashMap<String, SessionEntry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamRegistry {
    pub fn new(config: StreamingConfig, launcher: Arc<dyn Launcher>) -> Result<Self, StreamError> {
        config.validate()?;
        let policy = RetryPolicy::from_config(&config.retry);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            policy,
            launcher,
            sessions: DashMap::new(),
            locks: DashMap::new(),
            events,
        })
    }

    /// Registry that runs the real transcoder binary
    pub fn with_ffmpeg(config: StreamingConfig) -> Result<Self, StreamError> {
        Self::new(config, Arc::new(FfmpegLauncher))
    }

    /// Receive every lifecycle event published from now on.
    ///
    /// Delivery is best effort: a slow receiver lags and loses events,
    /// publishers never wait.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Start streaming a camera with default transcode options.
    pub async fn start_stream(
        &self,
        camera_id: &str,
        camera: &CameraConfig,
        quality: Option<&str>,
    ) -> Result<StreamStarted, StreamError> {
        self.start_stream_with(camera_id, camera, quality, TranscodeOptions::default())
            .await
    }

    /// Start streaming a camera.
    ///
    /// A connected session for the same id is returned as is. A session
    /// in any other state is stopped and its files removed before the new
    /// one is created. Configuration is validated before anything is
    /// spawned or registered.
    pub async fn start_stream_with(
        &self,
        camera_id: &str,
        camera: &CameraConfig,
        quality: Option<&str>,
        options: TranscodeOptions,
    ) -> Result<StreamStarted, StreamError> {
        output::validate_camera_id(camera_id)?;
        camera.validate()?;
        options.validate()?;

        let requested = quality.unwrap_or(&self.config.default_quality);
        let profile = match quality::profile(requested) {
            Some(profile) => profile,
            None => {
                let fallback = quality::resolve(requested);
                tracing::warn!(
                    camera_id = %camera_id,
                    "Unknown quality '{}', using '{}'",
                    requested,
                    fallback.name
                );
                fallback
            }
        };

        let lock = self.lock_for(camera_id);
        let result = {
            let _guard = lock.lock().await;
            self.start_locked(camera_id, camera, profile, options).await
        };
        self.release_lock(camera_id, lock);
        result
    }

    async fn start_locked(
        &self,
        camera_id: &str,
        camera: &CameraConfig,
        profile: &'static QualityProfile,
        options: TranscodeOptions,
    ) -> Result<StreamStarted, StreamError> {
        let existing = self.sessions.get(camera_id).map(|entry| entry.session.clone());
        if let Some(session) = existing {
            if session.status() == StreamStatus::Connected {
                tracing::debug!(camera_id = %camera_id, "Stream already connected");
                return Ok(StreamStarted {
                    public_url: session.public_url(),
                    quality: session.quality.clone(),
                    reused: true,
                    message: "Stream already running".to_string(),
                });
            }

            tracing::info!(
                camera_id = %camera_id,
                status = %session.status(),
                "Replacing existing stream"
            );
            if let Some((_, entry)) = self.sessions.remove(camera_id) {
                self.teardown(entry).await;
            }
        }

        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        let namespace = OutputNamespace::new(
            &self.config.output_dir,
            &self.config.segment_prefix,
            camera_id,
            &self.config.public_base_url,
        );

        // Leftovers from a previous run
        let stale = namespace.cleanup().await;
        if stale.removed > 0 {
            tracing::debug!(camera_id = %camera_id, "Removed {} stale files", stale.removed);
        }
        self.report_cleanup_warnings(camera_id, &stale.warnings);

        let mut options = options;
        if options.playlist_size.is_none() {
            options.playlist_size = Some(self.config.playlist_size);
        }
        if options.rtsp_transport.is_none() {
            options.rtsp_transport = Some(self.config.rtsp_transport.clone());
        }

        let invocation = Invocation {
            camera_id: camera_id.to_string(),
            program: self.config.transcoder.clone(),
            args: args::build_args(&camera.rtsp_url(), &namespace.playlist_path(), profile.name, &options),
        };

        let session = Arc::new(StreamSession::new(
            camera_id.to_string(),
            camera.redacted_url(),
            namespace,
            profile.name.to_string(),
            options,
            self.policy.clone(),
        ));
        let public_url = session.public_url();

        tracing::info!(
            camera_id = %camera_id,
            quality = profile.name,
            "Starting stream {} -> {}",
            session.source_redacted,
            public_url
        );
        let _ = self.events.send(
            StreamEvent::new(EventType::StreamStarting, camera_id).with_details(serde_json::json!({
                "quality": profile.name,
                "source": session.source_redacted,
                "public_url": public_url,
            })),
        );

        let task = Supervisor::new(
            session.clone(),
            self.launcher.clone(),
            invocation,
            Duration::from_secs(self.config.connect_grace_secs),
            self.events.clone(),
        )
        .spawn();

        self.sessions
            .insert(camera_id.to_string(), SessionEntry { session, task });

        Ok(StreamStarted {
            public_url,
            quality: profile.name.to_string(),
            reused: false,
            message: "Stream started".to_string(),
        })
    }

    /// Stop a camera's stream in whatever state it is in.
    ///
    /// Cancels a pending reconnect, terminates the transcoder, removes the
    /// camera's files and drops the entry. Stopping an unknown id is not
    /// an error.
    pub async fn stop_stream(&self, camera_id: &str) -> StopOutcome {
        if let Err(e) = output::validate_camera_id(camera_id) {
            return StopOutcome {
                success: false,
                message: e.to_string(),
            };
        }

        let lock = self.lock_for(camera_id);
        let removed = {
            let _guard = lock.lock().await;
            match self.sessions.remove(camera_id) {
                Some((_, entry)) => {
                    self.teardown(entry).await;
                    true
                }
                None => false,
            }
        };
        self.release_lock(camera_id, lock);

        if removed {
            StopOutcome {
                success: true,
                message: format!("Stream for {} stopped", camera_id),
            }
        } else {
            StopOutcome {
                success: false,
                message: format!("No active stream for {}", camera_id),
            }
        }
    }

    pub fn snapshot(&self, camera_id: &str) -> Option<StreamSnapshot> {
        self.sessions
            .get(camera_id)
            .map(|entry| status::snapshot(&entry.session))
    }

    /// Snapshots of every session, ordered by camera id
    pub fn snapshots(&self) -> Vec<StreamSnapshot> {
        let mut all: Vec<StreamSnapshot> = self
            .sessions
            .iter()
            .map(|entry| status::snapshot(&entry.session))
            .collect();
        all.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        all
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session concurrently
    pub async fn shutdown(&self) {
        let ids = self.active_ids();
        if ids.is_empty() {
            return;
        }
        tracing::info!("Stopping {} streams", ids.len());
        futures::future::join_all(ids.iter().map(|id| self.stop_stream(id))).await;
    }

    fn lock_for(&self, camera_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(camera_id.to_string()).or_default().clone()
    }

    /// Forget the per-id lock once nobody else holds or waits on it
    fn release_lock(&self, camera_id: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(camera_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn teardown(&self, entry: SessionEntry) {
        let SessionEntry { session, task } = entry;
        let camera_id = session.camera_id.as_str();

        session.request_stop();
        if let Err(e) = task.await {
            tracing::warn!(camera_id = %camera_id, "Supervisor task ended abnormally: {}", e);
        }

        let report = session.output.cleanup().await;
        self.report_cleanup_warnings(camera_id, &report.warnings);

        tracing::info!(camera_id = %camera_id, removed = report.removed, "Stream stopped");
        let _ = self.events.send(
            StreamEvent::new(EventType::StreamStopped, camera_id)
                .with_details(serde_json::json!({ "removed_files": report.removed })),
        );
    }

    fn report_cleanup_warnings(&self, camera_id: &str, warnings: &[String]) {
        for warning in warnings {
            let warning = StreamError::FilesystemCleanup(warning.clone());
            tracing::warn!(camera_id = %camera_id, "{}", warning);
            let _ = self.events.send(
                StreamEvent::new(EventType::CleanupWarning, camera_id).with_message(warning.to_string()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use config_manager::RetryConfig;
    use tempfile::TempDir;

    use super::*;
    use crate::testing::{Behavior, FakeLauncher};

    fn config(dir: &Path) -> StreamingConfig {
        StreamingConfig {
            retry: RetryConfig {
                max_attempts: 5,
                initial_delay_ms: 1000,
                multiplier: 2.0,
                max_delay_ms: 30_000,
            },
            ..StreamingConfig::default().with_output_dir(dir)
        }
    }

    fn camera() -> CameraConfig {
        CameraConfig::new("192.168.1.100", 554, "/stream")
    }

    fn registry(dir: &Path, launcher: Arc<FakeLauncher>) -> StreamRegistry {
        StreamRegistry::new(config(dir), launcher).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_connected_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(temp_dir.path(), launcher.clone());

        let first = registry.start_stream("cam1", &camera(), Some("low")).await.unwrap();
        assert!(!first.reused);
        assert_eq!(first.public_url, "/hls/stream_cam1.m3u8");
        assert_eq!(first.quality, "low");

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(registry.snapshot("cam1").unwrap().status, StreamStatus::Connected);

        let second = registry.start_stream("cam1", &camera(), Some("high")).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.public_url, first.public_url);
        assert_eq!(second.quality, "low");
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_replaces_session_that_is_not_connected() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(temp_dir.path(), launcher.clone());

        registry.start_stream("cam1", &camera(), Some("low")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.snapshot("cam1").unwrap().status, StreamStatus::Connecting);

        let replaced = registry.start_stream("cam1", &camera(), Some("high")).await.unwrap();
        assert!(!replaced.reused);
        assert_eq!(replaced.quality, "high");
        assert_eq!(launcher.terminated(), 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(launcher.launches(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_after_max_attempts_and_stops_spawning() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::ExitAfter(Duration::from_millis(100)));
        let registry = registry(temp_dir.path(), launcher.clone());
        let mut events = registry.subscribe();

        registry.start_stream("cam1", &camera(), None).await.unwrap();

        // 1 + 2 + 4 + 8 seconds of backoff plus five short runs
        tokio::time::sleep(Duration::from_secs(60)).await;

        let snap = registry.snapshot("cam1").unwrap();
        assert_eq!(snap.status, StreamStatus::Failed);
        assert_eq!(snap.attempts, 5);
        assert_eq!(snap.uptime_secs, None);
        assert_eq!(
            snap.last_error.as_deref(),
            Some("exited with status 1: Connection refused")
        );
        assert_eq!(launcher.launches(), 5);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(launcher.launches(), 5);

        let mut types = Vec::new();
        while let Ok(event) = events.try_recv() {
            types.push(event.event_type);
        }
        assert_eq!(types.first(), Some(&EventType::StreamStarting));
        assert_eq!(types.last(), Some(&EventType::StreamFailed));
        assert_eq!(types.iter().filter(|t| **t == EventType::StreamDisconnected).count(), 5);
        assert_eq!(types.iter().filter(|t| **t == EventType::StreamReconnecting).count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_enters_backoff() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::FailSpawn);
        let registry = registry(temp_dir.path(), launcher.clone());

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let snap = registry.snapshot("cam1").unwrap();
        assert_eq!(snap.status, StreamStatus::Reconnecting);
        assert_eq!(snap.attempts, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = registry.snapshot("cam1").unwrap();
        assert_eq!(snap.status, StreamStatus::Failed);
        assert!(snap.last_error.unwrap().contains("not found"));
        assert_eq!(launcher.launches(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_reconnecting_prevents_respawn() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::ExitAfter(Duration::from_millis(100)));
        let registry = registry(temp_dir.path(), launcher.clone());

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.snapshot("cam1").unwrap().status, StreamStatus::Reconnecting);

        let outcome = registry.stop_stream("cam1").await;
        assert!(outcome.success);
        assert!(registry.snapshot("cam1").is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_removes_only_own_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(dir, launcher.clone());

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        registry.start_stream("cam10", &camera(), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        for name in ["stream_cam1.m3u8", "stream_cam1_000.ts", "stream_cam10.m3u8", "stream_cam10_000.ts"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }

        let outcome = registry.stop_stream("cam1").await;
        assert!(outcome.success);
        assert_eq!(launcher.terminated(), 1);

        assert!(!dir.join("stream_cam1.m3u8").exists());
        assert!(!dir.join("stream_cam1_000.ts").exists());
        assert!(dir.join("stream_cam10.m3u8").exists());
        assert!(dir.join("stream_cam10_000.ts").exists());

        assert_eq!(registry.active_ids(), vec!["cam10".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_camera_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path(), FakeLauncher::new(Behavior::RunForever));

        let outcome = registry.stop_stream("cam1").await;
        assert!(!outcome.success);

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        assert!(registry.stop_stream("cam1").await.success);
        assert!(!registry.stop_stream("cam1").await.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_configuration_registers_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(temp_dir.path(), launcher.clone());

        let no_port = CameraConfig::new("192.168.1.100", 0, "/stream");
        let err = registry.start_stream("cam1", &no_port, None).await.unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationInvalid(_)));

        let err = registry.start_stream("../cam", &camera(), None).await.unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationInvalid(_)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(registry.is_empty());
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_quality_falls_back_to_default() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path(), FakeLauncher::new(Behavior::RunForever));

        let started = registry.start_stream("cam1", &camera(), Some("ultra")).await.unwrap();
        assert_eq!(started.quality, "medium");
        assert_eq!(registry.snapshot("cam1").unwrap().quality, "medium");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(temp_dir.path(), launcher.clone());

        for id in ["cam1", "cam2", "cam3"] {
            registry.start_stream(id, &camera(), None).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.snapshots().len(), 3);
        assert_eq!(launcher.launches(), 3);

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(launcher.terminated(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stream_keeps_files_until_stopped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let launcher = FakeLauncher::new(Behavior::ExitAfter(Duration::from_millis(100)));
        let registry = registry(dir, launcher.clone());

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        std::fs::write(dir.join("stream_cam1_000.ts"), b"x").unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(registry.snapshot("cam1").unwrap().status, StreamStatus::Failed);
        assert!(dir.join("stream_cam1_000.ts").exists());

        let outcome = registry.stop_stream("cam1").await;
        assert!(outcome.success);
        assert!(!dir.join("stream_cam1_000.ts").exists());
        assert!(registry.snapshot("cam1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_invalid_ids_leaves_no_lock_entries() {
        let temp_dir = TempDir::new().unwrap();
        let registry = registry(temp_dir.path(), FakeLauncher::new(Behavior::RunForever));

        for i in 0..100 {
            let outcome = registry.stop_stream(&format!("../bogus id {}", i)).await;
            assert!(!outcome.success);
        }
        for i in 0..100 {
            assert!(!registry.stop_stream(&format!("cam{}", i)).await.success);
        }
        assert!(registry.locks.is_empty());

        registry.start_stream("cam1", &camera(), None).await.unwrap();
        assert!(registry.locks.is_empty());
        assert!(registry.stop_stream("cam1").await.success);
        assert!(registry.locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_scale_registers_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let launcher = FakeLauncher::new(Behavior::RunForever);
        let registry = registry(temp_dir.path(), launcher.clone());

        let options = TranscodeOptions::default().with_scale("1:1,movie=/etc/passwd");
        let err = registry
            .start_stream_with("cam1", &camera(), None, options)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::ConfigurationInvalid(_)));
        assert!(registry.is_empty());
        assert_eq!(launcher.launches(), 0);
    }
}
