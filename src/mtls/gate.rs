//! The mTLS gate: TLS server configuration plus per-connection authorization.
//!
//! Built once at startup from [`TlsSettings`] and a [`CertificateBundle`];
//! shared read-only by every connection task afterwards.
//!
//! ```text
//! TCP connection
//!   → TLS handshake        (rustls: version bounds, cipher allow-list,
//!                           client cert requested; rejected here in
//!                           `require` mode)
//!   → MtlsGate::authorize  (chain re-verified against the CA → Authorization)
//!   → ConnectionInfo       (attached to every request on the connection)
//!   → require_client_cert  (401 unless Authenticated)
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::ClientCertVerifier;
use rustls::{ProtocolVersion, ServerConfig, ServerConnection};
use serde::Serialize;
use tracing::debug;

use crate::mtls::bootstrap::CertificateBundle;
use crate::mtls::cert_manager::{build_root_store, load_crls, parse_certs, parse_private_key};
use crate::mtls::config::{ClientAuthMode, TlsSettings, cipher_suite_name};
use crate::mtls::identity::PeerCertificate;
use crate::mtls::verifier::DeferredClientVerifier;
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Authorization outcome
// ─────────────────────────────────────────────────────────────────────────────

/// Why a connection was not authenticated. Logged, never sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The client presented no certificate.
    NoCertificate,
    /// The chain does not verify against the trust anchor (unknown issuer,
    /// expired, revoked, wrong key usage, ...).
    Untrusted(String),
    /// The certificate verified but its fields could not be parsed.
    Malformed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCertificate => f.write_str("no client certificate presented"),
            Self::Untrusted(e) => write!(f, "untrusted client certificate: {e}"),
            Self::Malformed(e) => write!(f, "malformed client certificate: {e}"),
        }
    }
}

/// Terminal outcome of a connection: `Pending → {Authenticated, Rejected}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// The chain verified; the leaf's fields are available.
    Authenticated(PeerCertificate),
    /// The connection may not reach protected handlers.
    Rejected(RejectReason),
}

impl Authorization {
    /// Whether the peer was authenticated.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// The verified peer certificate, only when authenticated.
    #[must_use]
    pub fn peer(&self) -> Option<&PeerCertificate> {
        match self {
            Self::Authenticated(peer) => Some(peer),
            Self::Rejected(_) => None,
        }
    }
}

/// Everything known about one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Remote socket address.
    pub remote_addr: SocketAddr,
    /// Negotiated TLS parameters.
    pub tls: NegotiatedTls,
    /// Authorization outcome for this connection.
    pub authorization: Authorization,
}

/// Negotiated protocol version and cipher suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiatedTls {
    /// `TLSv1.2` / `TLSv1.3`.
    pub protocol: String,
    /// Cipher suite name, e.g. `TLS13_AES_256_GCM_SHA384`.
    pub cipher: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

/// TLS server configuration plus the verifier used for per-connection
/// authorization.
pub struct MtlsGate {
    server_config: Arc<ServerConfig>,
    verifier: Arc<dyn ClientCertVerifier>,
    client_auth: ClientAuthMode,
}

impl fmt::Debug for MtlsGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MtlsGate")
            .field("client_auth", &self.client_auth)
            .finish_non_exhaustive()
    }
}

impl MtlsGate {
    /// Build the rustls server configuration for mutual TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport policy is invalid, a PEM payload
    /// cannot be parsed, the CRL cannot be loaded, or the key does not match
    /// the certificate.
    pub fn new(settings: &TlsSettings, bundle: &CertificateBundle) -> Result<Self> {
        settings.validate()?;

        let server_certs = parse_certs(&bundle.cert_pem, &settings.cert.display().to_string())?;
        let server_key = parse_private_key(&bundle.key_pem, &settings.key.display().to_string())?;
        let ca_certs = parse_certs(&bundle.ca_pem, &settings.ca_cert.display().to_string())?;

        let provider = Arc::new(settings.crypto_provider()?);
        let root_store = Arc::new(build_root_store(&ca_certs)?);

        let mut builder =
            WebPkiClientVerifier::builder_with_provider(root_store, Arc::clone(&provider));
        if let Some(ref crl_path) = settings.crl_path {
            builder = builder.with_crls(load_crls(crl_path)?);
        }
        let verifier: Arc<dyn ClientCertVerifier> = builder
            .build()
            .map_err(|e| Error::Tls(format!("Failed to build client verifier: {e}")))?;

        let handshake_verifier: Arc<dyn ClientCertVerifier> = match settings.client_auth {
            ClientAuthMode::Require => Arc::clone(&verifier),
            ClientAuthMode::Request => Arc::new(DeferredClientVerifier::new(Arc::clone(&verifier))),
        };

        let mut server_config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&settings.protocol_versions())
            .map_err(|e| Error::Tls(format!("Protocol versions incompatible with cipher allow-list: {e}")))?
            .with_client_cert_verifier(handshake_verifier)
            .with_single_cert(server_certs, server_key)
            .map_err(|e| Error::Tls(format!("TLS config error (cert/key mismatch?): {e}")))?;

        // Prefer HTTP/2, fall back to HTTP/1.1
        server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        debug!(
            ca_cert = %settings.ca_cert.display(),
            client_auth = %settings.client_auth,
            min_version = %settings.min_version,
            max_version = %settings.max_version,
            cipher_suites = settings.cipher_suites.len(),
            crl = settings.crl_path.is_some(),
            "mTLS gate built"
        );

        Ok(Self {
            server_config: Arc::new(server_config),
            verifier,
            client_auth: settings.client_auth,
        })
    }

    /// The rustls configuration for the TLS acceptor.
    #[must_use]
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }

    /// The configured client-auth mode.
    #[must_use]
    pub fn client_auth(&self) -> ClientAuthMode {
        self.client_auth
    }

    /// Decide whether a presented chain (leaf first) is trusted right now.
    ///
    /// Runs the full chain verification regardless of what the handshake
    /// already checked.
    #[must_use]
    pub fn authorize(&self, chain: Option<&[CertificateDer<'_>]>) -> Authorization {
        let Some((leaf, intermediates)) = chain.and_then(|c| c.split_first()) else {
            return Authorization::Rejected(RejectReason::NoCertificate);
        };

        if let Err(e) = self
            .verifier
            .verify_client_cert(leaf, intermediates, UnixTime::now())
        {
            return Authorization::Rejected(RejectReason::Untrusted(e.to_string()));
        }

        match PeerCertificate::from_der(leaf) {
            Ok(peer) => Authorization::Authenticated(peer),
            Err(e) => Authorization::Rejected(RejectReason::Malformed(e.to_string())),
        }
    }

    /// Derive the connection's info from a completed handshake.
    #[must_use]
    pub fn connection_info(&self, conn: &ServerConnection, remote_addr: SocketAddr) -> ConnectionInfo {
        ConnectionInfo {
            remote_addr,
            tls: NegotiatedTls {
                protocol: conn
                    .protocol_version()
                    .map_or_else(|| "unknown".to_string(), protocol_name),
                cipher: conn
                    .negotiated_cipher_suite()
                    .map_or_else(|| "unknown".to_string(), |s| cipher_suite_name(&s)),
            },
            authorization: self.authorize(conn.peer_certificates()),
        }
    }
}

fn protocol_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
