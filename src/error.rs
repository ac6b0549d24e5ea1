use thiserror::Error;

/// Errors surfaced across the log store, connection workers and supervisor.
///
/// The wire protocol has no error channel: every variant here is reported to
/// the diagnostic sink and, depending on where it originates, either logged
/// and ignored (log I/O, shutdown path) or treated as fatal to the
/// originating task (connection I/O) or startup (socket setup).
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signal handling setup failed: {0}")]
    SignalSetup(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
