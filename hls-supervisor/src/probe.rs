//! Reachability checks that never start a transcoder.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use config_manager::CameraConfig;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{timeout, Instant};

use crate::error::StreamError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of probing a camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    /// TCP connection to the camera succeeded
    pub reachable: bool,
    /// Status code of the RTSP `OPTIONS` reply, if one arrived
    pub rtsp_status: Option<u16>,
    pub latency_ms: u64,
    pub message: String,
}

/// Connect to the camera and ask for its RTSP options.
///
/// Only an invalid configuration is an error; an unreachable or silent
/// camera is reported in the [`ProbeReport`].
pub async fn test_connection(camera: &CameraConfig, limit: Duration) -> Result<ProbeReport, StreamError> {
    camera.validate()?;

    let address = format!("{}:{}", camera.ip, camera.port);
    let started = Instant::now();

    let mut stream = match timeout(limit, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Ok(unreachable(started, format!("Cannot connect to {}: {}", address, e))),
        Err(_) => return Ok(unreachable(started, format!("Timed out connecting to {}", address))),
    };

    // Credentials stay out of the request line
    let request = format!(
        "OPTIONS rtsp://{}:{}{} RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: camstream\r\n\r\n",
        camera.ip, camera.port, camera.path
    );

    let exchange = async {
        stream.write_all(request.as_bytes()).await?;
        let mut line = String::new();
        BufReader::new(&mut stream).read_line(&mut line).await?;
        Ok::<_, std::io::Error>(line)
    };

    let report = match timeout(limit, exchange).await {
        Ok(Ok(line)) => match parse_status_line(&line) {
            Some(code) => ProbeReport {
                reachable: true,
                rtsp_status: Some(code),
                latency_ms: elapsed_ms(started),
                message: format!("RTSP server answered {}", line.trim()),
            },
            None => ProbeReport {
                reachable: true,
                rtsp_status: None,
                latency_ms: elapsed_ms(started),
                message: "Port is open but did not answer as an RTSP server".to_string(),
            },
        },
        Ok(Err(e)) => ProbeReport {
            reachable: true,
            rtsp_status: None,
            latency_ms: elapsed_ms(started),
            message: format!("Connection dropped during RTSP handshake: {}", e),
        },
        Err(_) => ProbeReport {
            reachable: true,
            rtsp_status: None,
            latency_ms: elapsed_ms(started),
            message: "No RTSP response before timeout".to_string(),
        },
    };

    tracing::debug!(
        address = %address,
        reachable = report.reachable,
        status = ?report.rtsp_status,
        "Probe finished: {}",
        report.message
    );
    Ok(report)
}

/// Run `<binary> -version` and return the first line it prints.
pub async fn check_transcoder(binary: &Path) -> Result<String, StreamError> {
    let output = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StreamError::ProcessSpawn(format!("{} not found - is it installed?", binary.display()))
            } else {
                StreamError::ProcessSpawn(e.to_string())
            }
        })?;

    if !output.status.success() {
        return Err(StreamError::ProcessSpawn(format!(
            "{} -version failed with {}",
            binary.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// `RTSP/1.0 200 OK` -> `Some(200)`
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("RTSP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

fn unreachable(started: Instant, message: String) -> ProbeReport {
    ProbeReport {
        reachable: false,
        rtsp_status: None,
        latency_ms: elapsed_ms(started),
        message,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
