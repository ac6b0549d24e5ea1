//! Bootstrap: argument parsing, optional daemonization, signal installation,
//! and handing off to the supervisor.
//!
//! Forking happens, if at all, before the tokio runtime is started: forking
//! a process that already has a running multi-threaded async runtime only
//! duplicates the calling thread, not the runtime's worker threads, which is
//! unsound. So the listening socket is bound as a plain blocking-free std
//! socket first, the daemon fork (if requested) happens next, and only then
//! is the async runtime constructed and the socket registered with it.

use anyhow::Context;
use clap::Parser;
use daemonize::Daemonize;
use linelogd::{server, shutdown, LogStore, Shutdown};
use std::path::PathBuf;

/// A concurrent TCP append-and-echo log service.
#[derive(Debug, Parser)]
#[command(name = "linelogd", version, author)]
struct Cli {
    /// Detach from the controlling terminal and run as a background daemon.
    #[arg(short = 'd', long = "daemon")]
    daemon: bool,

    /// TCP port to listen on.
    #[arg(long, default_value_t = linelogd::DEFAULT_PORT)]
    port: u16,

    /// Path of the shared append-log.
    #[arg(long, default_value = linelogd::DEFAULT_LOG_PATH)]
    log_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = server::Config {
        port: cli.port,
        log_path: cli.log_path,
    };

    let listener = server::bind(&config).context("failed to bind listening socket")?;

    if cli.daemon {
        Daemonize::new()
            .working_directory("/")
            .start()
            .context("failed to daemonize")?;
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run(listener, config))
}

async fn run(listener: std::net::TcpListener, config: server::Config) -> anyhow::Result<()> {
    let listener =
        server::into_tokio_listener(listener).context("failed to register listener with runtime")?;

    // Installed here, synchronously, so a failure is startup-fatal and
    // reported before the supervisor ever starts accepting connections.
    let terminate = shutdown::install_terminate_signal().context("failed to install signal handling")?;

    let shutdown = Shutdown::new();
    let bridge_shutdown = shutdown.clone();
    tokio::spawn(shutdown::watch(bridge_shutdown, terminate));

    let log = LogStore::new(config.log_path);
    server::run(listener, log, shutdown).await;

    Ok(())
}
