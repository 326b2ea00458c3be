//! Error types for mtls-gate

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for mtls-gate
pub type Result<T> = std::result::Result<T, Error>;

/// mtls-gate errors
///
/// Startup errors (`Config`, `Bootstrap`, `Tls`, `Bind`) are fatal and end the
/// process with a nonzero status. `Handshake` errors belong to a single
/// connection and never leave its task.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate bootstrap failed (missing CA, partial identity, generator failure)
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// Certificate or key could not be parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// TLS server configuration could not be built
    #[error("TLS error: {0}")]
    Tls(String),

    /// Per-connection handshake failure
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Listener could not bind
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener tried to bind
        addr: SocketAddr,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must abort startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Handshake(_))
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}
