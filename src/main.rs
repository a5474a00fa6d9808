//! ferrokv server binary
//!
//! Parses the command line, replays the append-only log if enabled, and runs
//! the event loop on the main thread until Ctrl+C.

use clap::Parser;
use ferrokv::config::{ServerConfig, DEFAULT_AOF_FILENAME, DEFAULT_PORT};
use ferrokv::persistence::{FsyncPolicy, DEFAULT_REWRITE_MIN_SIZE, DEFAULT_REWRITE_PERCENTAGE};
use ferrokv::reactor::{EventLoop, StopHandle};
use ferrokv::server::{Engine, Server};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ferrokv")]
#[command(version, about = "A single-threaded in-memory key-value server")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = ferrokv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Log writes to the append-only file and replay it at startup
    #[arg(long)]
    appendonly: bool,

    /// Path of the append-only file
    #[arg(long, default_value = DEFAULT_AOF_FILENAME)]
    aof_path: PathBuf,

    /// When to fsync the append-only file: always, everysec or no
    #[arg(long, default_value = "everysec", value_parser = parse_fsync)]
    fsync: FsyncPolicy,

    /// No automatic rewrite below this log size (bytes)
    #[arg(long, default_value_t = DEFAULT_REWRITE_MIN_SIZE)]
    rewrite_min_size: u64,

    /// Growth since the last rewrite (percent) that triggers a rewrite, 0 disables
    #[arg(long, default_value_t = DEFAULT_REWRITE_PERCENTAGE)]
    rewrite_percentage: u64,

    /// Server cron frequency (runs per second)
    #[arg(long, default_value_t = 10)]
    hz: u32,

    /// Maximum number of connected clients
    #[arg(long, default_value_t = 10_000)]
    max_clients: usize,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log_level: Option<String>,
}

fn parse_fsync(s: &str) -> Result<FsyncPolicy, String> {
    s.parse()
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig::builder()
            .host(self.host)
            .port(self.port)
            .appendonly(self.appendonly)
            .aof_path(self.aof_path)
            .fsync(self.fsync)
            .rewrite_min_size(self.rewrite_min_size)
            .rewrite_percentage(self.rewrite_percentage)
            .hz(self.hz)
            .max_clients(self.max_clients)
            .build()
    }
}

/// Stops the event loop on Ctrl+C.
///
/// The loop owns the main thread, so the signal is awaited on a small
/// current-thread runtime of its own.
fn spawn_ctrl_c_watcher(stop: StopHandle) -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown signal received, stopping server..."),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
                }
            });
            stop.stop();
        })?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = match &args.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = args.into_config();
    info!(version = ferrokv::VERSION, "ferrokv starting");

    let engine = Engine::open(&config)?;
    if let Some(aof) = engine.aof() {
        info!(path = %aof.path().display(), size = aof.current_size(), "Append only file loaded");
    }

    let mut server = Server::bind(config, engine)?;
    let mut el = EventLoop::new()?;
    server.install(&mut el)?;
    spawn_ctrl_c_watcher(el.stop_handle())?;

    info!("Ready to accept connections");
    el.run(&mut server);

    server.shutdown(&mut el)?;
    Ok(())
}
