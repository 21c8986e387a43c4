use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config_manager::{CameraStore, ServerConfig};
use config_manager::{cameras_path, ensure_config_dir, server_config_path};
use event_log::{spawn_journal_writer, EventJournal, StoredEvent};
use hls_supervisor::probe;
use hls_supervisor::routes::{control_router, ControlState};
use hls_supervisor::StreamRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// How long the journal writer gets to flush after shutdown
const JOURNAL_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Central Node - camera stream supervisor
///
/// - Starts one transcoder per requested camera (RTSP in, HLS out)
/// - Reconnects dropped cameras with backoff and marks them failed when they stay down
/// - Serves a JSON control API for start/stop/status
#[derive(Parser)]
#[command(name = "central")]
#[command(about = "camstream central node - RTSP to HLS stream supervisor")]
struct Cli {
    /// Server config file (default: ~/.config/camstream/server.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera list (default: ~/.config/camstream/cameras.toml)
    #[arg(long)]
    cameras: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control API and supervise streams (default)
    Serve,
    /// Check that a configured camera answers RTSP
    Probe {
        /// Camera id from the camera list
        camera_id: String,
        /// Timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Check that the transcoder binary is installed
    Check,
    /// Write a default server config and an empty camera list
    Init {
        /// Overwrite an existing server config
        #[arg(long)]
        force: bool,
    },
    /// Show recent stream events from the journal
    Events {
        /// Only events for this camera
        #[arg(long)]
        camera: Option<String>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config.log_filter);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, cli.cameras).await,
        Command::Probe { camera_id, timeout } => {
            probe_camera(&camera_id, cli.cameras, Duration::from_secs(timeout)).await
        }
        Command::Check => check(&config).await,
        Command::Init { force } => init(cli.config, cli.cameras, force),
        Command::Events { camera, limit } => show_events(&config, camera.as_deref(), limit),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load_from(path)
            .with_context(|| format!("Could not load config from {}", path.display())),
        None if ServerConfig::exists() => ServerConfig::load().context("Could not load server config"),
        None => {
            eprintln!("No server config found, using defaults.");
            Ok(ServerConfig::default())
        }
    }
}

fn load_cameras(path: Option<PathBuf>) -> Result<CameraStore> {
    match path {
        Some(path) => CameraStore::load_from(&path)
            .with_context(|| format!("Could not load cameras from {}", path.display())),
        None => CameraStore::load().context("Could not load camera list"),
    }
}

fn open_journal(config: &ServerConfig) -> Result<EventJournal, event_log::JournalError> {
    match &config.journal_path {
        Some(path) => EventJournal::open_at(path),
        None => EventJournal::open(),
    }
}

/// RUST_LOG wins over the configured filter
fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn serve(config: ServerConfig, cameras_path: Option<PathBuf>) -> Result<()> {
    let cameras = load_cameras(cameras_path)?;

    println!("~ CAMSTREAM - Central Node ~");
    println!();
    println!("Output directory: {}", config.streaming.output_dir.display());
    println!("Public base URL:  {}", config.streaming.public_base_url);
    if cameras.is_empty() {
        println!("Known cameras:    none (streams need an inline camera)");
    } else {
        let ids: Vec<&str> = cameras.ids().collect();
        println!("Known cameras:    {} ({})", cameras.len(), ids.join(", "));
    }
    println!();

    if let Err(e) = probe::check_transcoder(&config.streaming.transcoder).await {
        tracing::warn!("{} (streams will fail until it is available)", e);
    }

    let registry = Arc::new(
        StreamRegistry::with_ffmpeg(config.streaming.clone()).context("Invalid streaming config")?,
    );

    // Journal is optional; streams run without it
    let journal_task = match open_journal(&config) {
        Ok(journal) => {
            match journal.prune_older_than(config.journal_retention_days) {
                Ok(0) => {}
                Ok(pruned) => tracing::info!("Pruned {} old journal events", pruned),
                Err(e) => tracing::warn!("Could not prune event journal: {}", e),
            }
            Some(spawn_journal_writer(journal, registry.subscribe()))
        }
        Err(e) => {
            tracing::warn!("Could not open event journal: {}", e);
            tracing::warn!("Stream events will only be logged");
            None
        }
    };

    let state = ControlState::new(registry.clone(), Arc::new(cameras));
    let app = control_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Could not bind control API to {}", config.bind_addr))?;
    tracing::info!("Control API listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Could not listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    tracing::info!("Shutting down");
    registry.shutdown().await;

    // Dropping the last registry handle closes the event channel
    drop(registry);
    if let Some(task) = journal_task {
        match tokio::time::timeout(JOURNAL_FLUSH_TIMEOUT, task).await {
            Ok(Ok(written)) => tracing::info!("Journal writer stopped after {} events", written),
            Ok(Err(e)) => tracing::warn!("Journal writer failed: {}", e),
            Err(_) => tracing::warn!("Journal writer did not finish in time"),
        }
    }

    Ok(())
}

async fn probe_camera(camera_id: &str, cameras_path: Option<PathBuf>, timeout: Duration) -> Result<()> {
    let cameras = load_cameras(cameras_path)?;
    let camera = cameras
        .get(camera_id)?
        .with_context(|| format!("Unknown camera '{}'", camera_id))?;

    println!("Probing {} ...", camera.redacted_url());
    let report = probe::test_connection(&camera, timeout).await?;

    println!("  Reachable:   {}", if report.reachable { "yes" } else { "no" });
    if let Some(status) = report.rtsp_status {
        println!("  RTSP status: {}", status);
    }
    println!("  Latency:     {} ms", report.latency_ms);
    println!("  {}", report.message);

    if !report.reachable {
        std::process::exit(1);
    }
    Ok(())
}

fn init(config: Option<PathBuf>, cameras: Option<PathBuf>, force: bool) -> Result<()> {
    if config.is_none() || cameras.is_none() {
        ensure_config_dir().context("Could not create config directory")?;
    }

    let config_path = match config {
        Some(path) => path,
        None => server_config_path()?,
    };
    if config_path.exists() && !force {
        println!("Keeping {} (use --force to overwrite)", config_path.display());
    } else {
        ServerConfig::default()
            .save_to(&config_path)
            .with_context(|| format!("Could not write {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
    }

    let camera_list = match cameras {
        Some(path) => path,
        None => cameras_path()?,
    };
    if camera_list.exists() {
        println!("Keeping {}", camera_list.display());
    } else {
        CameraStore::default()
            .save_to(&camera_list)
            .with_context(|| format!("Could not write {}", camera_list.display()))?;
        println!("Wrote {}", camera_list.display());
    }
    Ok(())
}

async fn check(config: &ServerConfig) -> Result<()> {
    let transcoder = &config.streaming.transcoder;
    match probe::check_transcoder(transcoder).await {
        Ok(version) => {
            println!("Transcoder: {}", transcoder.display());
            println!("  {}", version);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

fn show_events(config: &ServerConfig, camera: Option<&str>, limit: usize) -> Result<()> {
    let journal = open_journal(config).context("Could not open event journal")?;
    let events = match camera {
        Some(camera_id) => journal.query_by_camera(camera_id, limit)?,
        None => journal.query_recent(limit)?,
    };

    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    for stored in &events {
        println!("{}", format_event(stored));
    }
    Ok(())
}

fn format_event(stored: &StoredEvent) -> String {
    let event = &stored.event;
    let mut line = format!(
        "{}  {:<8} {:<20} {}",
        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
        event.severity.as_str(),
        event.event_type.as_str(),
        event.camera_id
    );
    if let Some(attempt) = event.attempt {
        line.push_str(&format!(" (attempt {})", attempt));
    }
    if let Some(message) = &event.message {
        line.push_str(&format!(": {}", message));
    }
    line
}
