//! ArrayBridge simulator plugin daemon
//!
//! Serves the in-memory reference backend over the plugin IPC socket. Two
//! ways in: standalone mode binds a listener at `<socket_root>/sim` and
//! serves any number of clients; `--fd` mode takes one pre-connected
//! socket from a supervising daemon, serves that single session and exits.

use std::os::fd::{FromRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use arraybridge::{
    Error, IpcConfig, PluginRunner, Result, SimArray, SimConfig, SOCKET_ROOT_ENV,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ArrayBridge simulator - reference storage array plugin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory where plugin IPC sockets live
    #[arg(long, env = SOCKET_ROOT_ENV, default_value = arraybridge::DEFAULT_SOCKET_ROOT)]
    socket_root: PathBuf,

    /// Serve one pre-connected socket file descriptor and exit
    #[arg(long)]
    fd: Option<RawFd>,

    /// How long simulated jobs take, in milliseconds
    #[arg(long, env = "ARRAYBRIDGE_SIM_JOB_MS", default_value = "100")]
    job_duration_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting ArrayBridge simulator plugin");
    info!("  Version: {}", arraybridge::VERSION);
    info!("  Socket root: {}", args.socket_root.display());
    info!("  Job duration: {}ms", args.job_duration_ms);

    let runner = PluginRunner::new(Arc::new(SimArray::new(SimConfig {
        job_duration: Duration::from_millis(args.job_duration_ms),
    })));

    match args.fd {
        Some(fd) => serve_fd(runner, fd).await,
        None => serve_listener(runner, &args).await,
    }
}

/// Serve one session on a socket handed over by a supervising daemon.
async fn serve_fd(runner: PluginRunner<SimArray>, fd: RawFd) -> Result<()> {
    // Safety: the supervisor passes us sole ownership of this descriptor.
    let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd) };
    std_stream
        .set_nonblocking(true)
        .map_err(|e| Error::PluginIpcFail(format!("Failed to prepare fd {fd}: {e}")))?;
    let stream = UnixStream::from_std(std_stream)
        .map_err(|e| Error::PluginIpcFail(format!("Failed to adopt fd {fd}: {e}")))?;

    info!(fd, "serving pre-connected session");
    runner.serve(stream).await
}

/// Bind `<socket_root>/sim` and serve clients until interrupted.
async fn serve_listener(runner: PluginRunner<SimArray>, args: &Args) -> Result<()> {
    std::fs::create_dir_all(&args.socket_root).map_err(|e| {
        Error::PluginIpcFail(format!(
            "Failed to create socket root '{}': {e}",
            args.socket_root.display()
        ))
    })?;

    let socket = IpcConfig::with_root(&args.socket_root).plugin_socket("sim");
    // A previous run may have left its socket behind.
    if socket.exists() {
        std::fs::remove_file(&socket).map_err(|e| {
            Error::PluginIpcFail(format!(
                "Failed to remove stale socket '{}': {e}",
                socket.display()
            ))
        })?;
    }

    let listener = UnixListener::bind(&socket).map_err(|e| {
        Error::PluginIpcFail(format!("Failed to bind '{}': {e}", socket.display()))
    })?;
    info!("Listening on {}", socket.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let runner = runner.clone();
                        tokio::spawn(async move {
                            if let Err(e) = runner.serve(stream).await {
                                error!("Session error: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Accept failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&socket);
    info!("Simulator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
