use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::StreamError;

/// How long a terminated transcoder gets to flush before it is killed
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for the stderr reader after the process exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A fully built transcoder command line for one camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub camera_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// How a transcoder process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Last diagnostic line the process printed
    pub detail: Option<String>,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with status {}", code)?,
            (None, Some(signal)) => write!(f, "killed by signal {}", signal)?,
            (None, None) => write!(f, "exited")?,
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// A running transcoder owned by exactly one supervisor.
#[async_trait]
pub trait TranscoderProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. Must be cancel safe: the supervisor
    /// polls it inside `select!` and may call it again.
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Stop the process and reap it
    async fn terminate(&mut self);
}

/// Starts transcoder processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, invocation: &Invocation) -> Result<Box<dyn TranscoderProcess>, StreamError>;
}

/// Launches the transcoder as a child process via `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLauncher;

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<Box<dyn TranscoderProcess>, StreamError> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StreamError::ProcessSpawn(format!(
                        "{} not found - is it installed?",
                        invocation.program.display()
                    ))
                } else {
                    StreamError::ProcessSpawn(e.to_string())
                }
            })?;

        tracing::debug!(
            camera_id = %invocation.camera_id,
            pid = child.id().unwrap_or_default(),
            "Spawned {}",
            invocation.program.display()
        );

        let last_line = Arc::new(Mutex::new(None));
        let stderr_task = child.stderr.take().map(|stderr| {
            let camera_id = invocation.camera_id.clone();
            let last_line = last_line.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!(camera_id = %camera_id, "transcoder: {}", line);
                    *last_line.lock() = Some(line.to_string());
                }
            })
        });

        Ok(Box::new(FfmpegProcess {
            child,
            last_line,
            stderr_task,
        }))
    }
}

struct FfmpegProcess {
    child: Child,
    last_line: Arc<Mutex<Option<String>>>,
    stderr_task: Option<JoinHandle<()>>,
}

#[async_trait]
impl TranscoderProcess for FfmpegProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        let status = self.child.wait().await?;

        // Let the reader pick up the final diagnostic line
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(STDERR_DRAIN_TIMEOUT, task).await;
        }

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Ok(ProcessExit {
            code: status.code(),
            signal,
            detail: self.last_line.lock().clone(),
        })
    }

    async fn terminate(&mut self) {
        // SIGTERM first so the transcoder can finish the current segment
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        match tokio::time::timeout(TERMINATE_TIMEOUT, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("Transcoder ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            }
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}
