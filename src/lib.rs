//! mtls-gate Library
//!
//! A minimal HTTPS server that requires and verifies client certificates.
//!
//! # Features
//!
//! - **Certificate bootstrap**: CA must be provided; the server key and
//!   certificate are generated (self-signed) when both are missing
//! - **mTLS gate**: TLS version bounds, cipher allow-list, client chain
//!   verification against the CA, per-connection authorization outcome
//! - **Two strictness modes**: reject untrusted clients at the handshake, or
//!   let the handshake complete and reject each request
//! - **Per-connection isolation**: one task per connection, handshake
//!   timeouts, failures contained and logged

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod inspect;
pub mod mtls;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
