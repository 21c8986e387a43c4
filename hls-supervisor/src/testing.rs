//! Scripted launcher for supervision tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StreamError;
use crate::launcher::{Invocation, Launcher, ProcessExit, TranscoderProcess};

#[derive(Clone, Copy)]
pub enum Behavior {
    RunForever,
    ExitAfter(Duration),
    FailSpawn,
}

pub struct FakeLauncher {
    behavior: Behavior,
    launches: AtomicUsize,
    terminated: Arc<AtomicUsize>,
}

impl FakeLauncher {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            launches: AtomicUsize::new(0),
            terminated: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

struct FakeProcess {
    deadline: Option<Instant>,
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl TranscoderProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    async fn wait(&mut self) -> std::io::Result<ProcessExit> {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
        Ok(ProcessExit {
            code: Some(1),
            signal: None,
            detail: Some("Connection refused".to_string()),
        })
    }

    async fn terminate(&mut self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, _invocation: &Invocation) -> Result<Box<dyn TranscoderProcess>, StreamError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let deadline = match self.behavior {
            Behavior::RunForever => None,
            Behavior::ExitAfter(after) => Some(Instant::now() + after),
            Behavior::FailSpawn => {
                return Err(StreamError::ProcessSpawn("ffmpeg not found - is it installed?".to_string()))
            }
        };
        Ok(Box::new(FakeProcess {
            deadline,
            terminated: self.terminated.clone(),
        }))
    }
}
