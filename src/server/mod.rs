//! HTTPS listener
//!
//! One `tokio` task per accepted connection. The task owns the TLS handshake,
//! derives the connection's [`ConnectionInfo`](crate::mtls::ConnectionInfo)
//! and serves HTTP/1.1 or HTTP/2 on top of it. Nothing a single connection
//! does can stall the accept loop.

pub mod router;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::config::ServerSettings;
use crate::mtls::MtlsGate;
use crate::{Error, Result};

pub use router::{AuthenticatedPeer, REJECTION_MESSAGE, create_router, require_client_cert};

/// Pause after an accept error that is not about a single connection, such as
/// running out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(250);

/// mTLS HTTPS server
pub struct MtlsServer {
    listener: TcpListener,
    gate: Arc<MtlsGate>,
    router: Router,
    handshake_timeout: Option<Duration>,
}

impl MtlsServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn bind(settings: &ServerSettings, gate: MtlsGate) -> Result<Self> {
        let addr = settings.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;

        Ok(Self {
            listener,
            gate: Arc::new(gate),
            router: create_router(),
            handshake_timeout: settings.handshake_timeout,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS cannot report the address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be read.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(shutdown_signal()).await
    }

    /// Serve until `signal` resolves.
    ///
    /// Connections still in flight when the signal fires keep their tasks;
    /// only accepting stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be read.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        let acceptor = TlsAcceptor::from(self.gate.server_config());

        info!("Starting mTLS server on https://{addr}");
        info!(
            client_auth = %self.gate.client_auth(),
            handshake_timeout = ?self.handshake_timeout,
            "Client certificates are verified against the configured CA"
        );

        tokio::pin!(signal);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!(peer = %peer, "Accepted connection");
                            let connection = Connection {
                                acceptor: acceptor.clone(),
                                gate: Arc::clone(&self.gate),
                                router: self.router.clone(),
                                handshake_timeout: self.handshake_timeout,
                            };
                            tokio::spawn(connection.handle(stream, peer));
                        }
                        Err(e) => {
                            let backoff = accept_error_backoff(&e);
                            if backoff.is_zero() {
                                debug!(error = %e, "Connection failed before accept");
                            } else {
                                error!(error = %e, ?backoff, "Failed to accept connection");
                                tokio::time::sleep(backoff).await;
                            }
                        }
                    }
                }
                () = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// How long to wait before the next `accept()`.
///
/// Errors tied to one aborted connection are retried at once; anything else
/// tends to repeat immediately and would spin the loop.
fn accept_error_backoff(e: &io::Error) -> Duration {
    match e.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => Duration::ZERO,
        _ => ACCEPT_ERROR_BACKOFF,
    }
}

/// Everything a connection task needs, moved into the task.
struct Connection {
    acceptor: TlsAcceptor,
    gate: Arc<MtlsGate>,
    router: Router,
    handshake_timeout: Option<Duration>,
}

impl Connection {
    /// Run one connection to completion; every failure stays here.
    async fn handle(self, stream: TcpStream, peer: SocketAddr) {
        let tls = match self.accept_tls(stream).await {
            Ok(tls) => tls,
            Err(e) => {
                warn!(peer = %peer, error = %e, "TLS handshake failed");
                return;
            }
        };

        let info = Arc::new(self.gate.connection_info(tls.get_ref().1, peer));
        info!(
            peer = %peer,
            protocol = %info.tls.protocol,
            cipher = %info.tls.cipher,
            authorized = info.authorization.is_authorized(),
            subject = info.authorization.peer().map_or("-", |p| p.display_name()),
            "TLS handshake completed"
        );

        let router = self.router;
        let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
            request.extensions_mut().insert(Arc::clone(&info));
            router.clone().oneshot(request)
        });

        if let Err(e) = auto::Builder::new(TokioExecutor::new())
            .serve_connection(TokioIo::new(tls), service)
            .await
        {
            debug!(peer = %peer, error = %e, "Connection closed with error");
        }
    }

    async fn accept_tls(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
        let handshake = self.acceptor.accept(stream);
        let result = match self.handshake_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| Error::Handshake(format!("timed out after {limit:?}")))?,
            None => handshake.await,
        };
        result.map_err(|e| Error::Handshake(e.to_string()))
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
