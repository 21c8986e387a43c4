//! Configuration for the camstream daemon.
//!
//! - [`CameraConfig`] / [`CameraStore`]: where each camera lives and how to log in
//! - [`ServerConfig`] / [`StreamingConfig`] / [`RetryConfig`]: daemon, output and
//!   supervision settings loaded from `server.toml`

mod camera;
mod config;
mod error;
mod paths;

pub use camera::{CameraConfig, CameraEntry, CameraStore};
pub use config::{RetryConfig, ServerConfig, StreamingConfig};
pub use error::ConfigError;
pub use paths::{cameras_path, config_dir, ensure_config_dir, server_config_path, write_secure};
