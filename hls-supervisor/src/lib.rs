//! Per-camera RTSP to HLS transcoder supervision.
//!
//! Each started camera gets one supervised transcoder process that writes a
//! playlist and segments into a shared output directory. The supervisor
//! promotes the stream to connected after a grace period, reconnects with
//! exponential backoff when the process exits, and gives up after a bounded
//! number of consecutive failures.
//!
//! # Architecture
//!
//! ```text
//! HTTP control --> StreamRegistry --> Supervisor (one task per camera)
//!                       |                 |
//!                  StreamSession <--------+-- Launcher --> ffmpeg
//!                       |
//!                  StreamSnapshot
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use hls_supervisor::{StreamRegistry, routes::{control_router, ControlState}};
//! use config_manager::{CameraStore, StreamingConfig};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(StreamRegistry::with_ffmpeg(StreamingConfig::default())?);
//! let state = ControlState::new(registry.clone(), Arc::new(CameraStore::load()?));
//!
//! let app = Router::new().nest("/api", control_router(Arc::new(state)));
//! ```
//!
//! # Output layout
//!
//! | File | Description |
//! |------|-------------|
//! | `<output_dir>/<prefix>_<camera>.m3u8` | Live playlist |
//! | `<output_dir>/<prefix>_<camera>_<NNN>.ts` | Segments |

pub mod args;
pub mod backoff;
pub mod error;
pub mod launcher;
pub mod lifecycle;
pub mod output;
pub mod probe;
pub mod quality;
pub mod registry;
pub mod routes;
mod session;
pub mod status;
mod supervisor;

#[cfg(test)]
mod testing;

pub use args::{build_args, TranscodeOptions};
pub use backoff::RetryPolicy;
pub use error::StreamError;
pub use launcher::{FfmpegLauncher, Invocation, Launcher, ProcessExit, TranscoderProcess};
pub use lifecycle::StreamStatus;
pub use quality::QualityProfile;
pub use registry::{StopOutcome, StreamRegistry, StreamStarted};
pub use status::StreamSnapshot;
