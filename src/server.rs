//! The accept loop and supervisor.
//!
//! Owns the listening socket and the worker registry, spawns a
//! [`ConnectionWorker`] per accepted client, reaps finished ones
//! opportunistically, and drives the shutdown drain once the shutdown flag
//! is set.

use crate::connection::ConnectionWorker;
use crate::log_store::LogStore;
use crate::registry::{self, Registry};
use crate::shutdown::Shutdown;
use crate::{timestamp, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Listen backlog for the accepting socket. Tokio's `TcpListener::bind`
/// doesn't expose this directly, so the socket is built with `socket2` and
/// handed off to tokio once it's configured.
const LISTEN_BACKLOG: i32 = 10;

/// Runtime configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            log_path: PathBuf::from(crate::DEFAULT_LOG_PATH),
        }
    }
}

/// Binds the listening socket for `config`: IPv4, all local addresses,
/// address reuse enabled, backlog 10. Binding happens before any
/// daemonization so a failure here is reported to the original foreground
/// process.
///
/// Returns a plain `std::net::TcpListener` rather than tokio's, since
/// binding must happen before the daemon fork, and forking a process that
/// already has a multi-threaded tokio runtime running is unsound. The
/// caller hands this to [`into_tokio_listener`] once the async runtime has
/// started, after any daemonization.
pub fn bind(config: &Config) -> Result<std::net::TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

/// Registers a pre-bound, non-blocking std listener with the running tokio
/// runtime. Must be called from within an active runtime.
pub fn into_tokio_listener(listener: std::net::TcpListener) -> Result<TcpListener> {
    Ok(TcpListener::from_std(listener)?)
}

/// Runs the server: starts the timestamp producer, drives the accept loop
/// until `shutdown` is triggered, then drains every in-flight connection and
/// purges the log.
///
/// This is the supervisor's full lifecycle: accept, spawn, reap, and on
/// shutdown stop the producer, drain every outstanding connection, and
/// purge the log before returning.
pub async fn run(listener: TcpListener, log: LogStore, shutdown: Shutdown) {
    let registry = Registry::new();

    let producer = tokio::spawn(timestamp::run(log.clone(), shutdown.clone()));

    accept_loop(&listener, &log, &shutdown, &registry).await;

    info!("shutting down");

    // Stop the timestamp producer before draining workers.
    let _ = producer.await;

    registry.drain().await;

    drop(listener);

    if let Err(err) = log.purge().await {
        error!(%err, "failed to purge log during shutdown");
    }
}

/// Accepts connections until shutdown is requested. Each accept races
/// against the shutdown notification so a pending accept resolves promptly
/// once shutdown begins.
async fn accept_loop(
    listener: &TcpListener,
    log: &LogStore,
    shutdown: &Shutdown,
    registry: &Registry,
) {
    info!("accepting inbound connections");

    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = shutdown.notified() => {
                break;
            }
        };

        match accepted {
            Ok((socket, peer)) => {
                let completed = registry::new_completion_flag();
                let worker = ConnectionWorker::new(
                    socket,
                    peer,
                    log.clone(),
                    shutdown.clone(),
                    completed.clone(),
                );

                let handle = tokio::spawn(worker.run());
                registry.register(peer, completed, handle).await;
            }
            Err(err) => {
                if shutdown.is_set() {
                    break;
                }
                warn!(%err, "got error accepting inbound connection, trying again");
            }
        }

        registry.reap().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn bind_loopback() -> TcpListener {
        TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap()
    }

    #[tokio::test]
    async fn accepts_a_client_and_echoes_its_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogStore::new(dir.path().join("server-test-data"));
        let shutdown = Shutdown::new();
        let listener = bind_loopback().await;
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(run(listener, log, shutdown.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"hello\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");

        drop(client);
        shutdown.trigger();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn second_connection_sees_first_connections_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogStore::new(dir.path().join("server-test-data"));
        let shutdown = Shutdown::new();
        let listener = bind_loopback().await;
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(run(listener, log, shutdown.clone()));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"hello\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\n");
        drop(first);

        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"world\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = second.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello\nworld\n");
        drop(second);

        shutdown.trigger();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_connection_and_purges_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("server-test-data");
        let log = LogStore::new(log_path.clone());
        let shutdown = Shutdown::new();
        let listener = bind_loopback().await;
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(run(listener, log, shutdown.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"partial").await.unwrap();

        shutdown.trigger();
        server.await.unwrap();

        assert!(!log_path.exists());
    }
}
