//! Shared fixtures: a throwaway PKI, a running server and a raw HTTPS client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, IsCa, Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, RevocationReason,
    RevokedCertParams, SerialNumber, date_time_ymd,
};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme, SupportedProtocolVersion};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use mtls_gate::config::Config;
use mtls_gate::mtls::{ClientAuthMode, MtlsGate, RcgenGenerator, bootstrap};
use mtls_gate::server::MtlsServer;

pub const CA_NAME: &str = "mtls-gate Test CA";

// ─────────────────────────────────────────────────────────────────────────────
// PKI
// ─────────────────────────────────────────────────────────────────────────────

/// Client key and chain, ready for `with_client_auth_cert`.
pub struct ClientIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

pub struct Pki {
    pub ca_pem: String,
    issuer: Issuer<'static, KeyPair>,
}

fn params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params
}

fn identity(cert: &rcgen::Certificate, key: &KeyPair) -> ClientIdentity {
    ClientIdentity {
        chain: vec![cert.der().clone()],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
    }
}

impl Pki {
    pub fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut ca_params = params(CA_NAME);
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = ca_params.self_signed(&key).unwrap();
        Self {
            ca_pem: ca.pem(),
            issuer: Issuer::new(ca_params, key),
        }
    }

    /// A client certificate signed by the CA.
    pub fn client(&self, cn: &str) -> ClientIdentity {
        let key = KeyPair::generate().unwrap();
        let cert = params(cn).signed_by(&key, &self.issuer).unwrap();
        identity(&cert, &key)
    }

    /// A CA-signed client certificate with a fixed serial number.
    pub fn client_with_serial(&self, cn: &str, serial: u64) -> ClientIdentity {
        let key = KeyPair::generate().unwrap();
        let mut p = params(cn);
        p.serial_number = Some(SerialNumber::from(serial));
        let cert = p.signed_by(&key, &self.issuer).unwrap();
        identity(&cert, &key)
    }

    /// PEM CRL signed by the CA, revoking `serials`.
    pub fn crl_pem(&self, serials: &[u64]) -> String {
        let now = time::OffsetDateTime::now_utc();
        CertificateRevocationListParams {
            this_update: now - time::Duration::minutes(1),
            next_update: now + time::Duration::days(1),
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs: serials
                .iter()
                .map(|&serial| RevokedCertParams {
                    serial_number: SerialNumber::from(serial),
                    revocation_time: now - time::Duration::minutes(1),
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
                .collect(),
            key_identifier_method: KeyIdMethod::Sha256,
        }
        .signed_by(&self.issuer)
        .unwrap()
        .pem()
        .unwrap()
    }

    /// A CA-signed client certificate whose validity ended long ago.
    pub fn expired_client(&self, cn: &str) -> ClientIdentity {
        let key = KeyPair::generate().unwrap();
        let mut p = params(cn);
        p.not_before = date_time_ymd(2000, 1, 1);
        p.not_after = date_time_ymd(2001, 1, 1);
        let cert = p.signed_by(&key, &self.issuer).unwrap();
        identity(&cert, &key)
    }
}

/// A client certificate that does not chain to any configured CA.
pub fn self_signed_client(cn: &str) -> ClientIdentity {
    let key = KeyPair::generate().unwrap();
    let cert = params(cn).self_signed(&key).unwrap();
    identity(&cert, &key)
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub pki: Pki,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<mtls_gate::Result<()>>,
    _dir: TempDir,
}

/// Config pointing at `dir`, bound to an ephemeral loopback port.
pub fn test_config(dir: &Path, mode: ClientAuthMode) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.tls.key = dir.join("server.key");
    config.tls.cert = dir.join("server.crt");
    config.tls.ca_cert = dir.join("ca.crt");
    config.tls.client_auth = mode;
    config
}

impl TestServer {
    /// Bootstrap into a temp dir and serve in the background.
    pub async fn start(mode: ClientAuthMode, configure: impl FnOnce(&mut Config)) -> Self {
        Self::start_with(Pki::new(), mode, configure).await
    }

    /// Like [`TestServer::start`], trusting an existing `pki`.
    pub async fn start_with(
        pki: Pki,
        mode: ClientAuthMode,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ca.crt"), &pki.ca_pem).unwrap();

        let mut config = test_config(dir.path(), mode);
        configure(&mut config);
        config.validate().unwrap();

        let bundle = bootstrap(&config.tls, &config.bootstrap, &RcgenGenerator).unwrap();
        let gate = MtlsGate::new(&config.tls, &bundle).unwrap();
        let server = MtlsServer::bind(&config.server, gate).await.unwrap();
        let addr = server.local_addr().unwrap();

        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.serve_with_shutdown(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            pki,
            shutdown: Some(tx),
            handle,
            _dir: dir,
        }
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        (&mut self.handle).await.unwrap().unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Trusts any server certificate; the server side is what is under test.
#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

pub static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
pub static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];

pub fn client_config(
    identity: Option<ClientIdentity>,
    versions: &[&'static SupportedProtocolVersion],
) -> Arc<ClientConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .unwrap()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)));

    let config = match identity {
        Some(id) => builder.with_client_auth_cert(id.chain, id.key).unwrap(),
        None => builder.with_no_client_auth(),
    };
    Arc::new(config)
}

/// Response as seen by the client.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// `GET path` over a fresh mTLS connection.
///
/// `Err` means the connection never produced a response: handshake failure,
/// alert, reset or an empty stream.
pub async fn get(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
    path: &str,
) -> Result<HttpResponse, String> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| format!("connect: {e}"))?;
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = TlsConnector::from(config)
        .connect(server_name, stream)
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    tls.write_all(request.as_bytes())
        .await
        .map_err(|e| format!("write: {e}"))?;

    let mut raw = Vec::new();
    if let Err(e) = tls.read_to_end(&mut raw).await {
        if raw.is_empty() || e.kind() != std::io::ErrorKind::UnexpectedEof {
            return Err(format!("read: {e}"));
        }
    }
    if raw.is_empty() {
        return Err("empty response".into());
    }
    parse_response(&raw)
}

fn parse_response(raw: &[u8]) -> Result<HttpResponse, String> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| format!("malformed response: {text}"))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("malformed status line: {head}"))?;
    let body = serde_json::from_str(body).map_err(|e| format!("body is not JSON ({e}): {body}"))?;
    Ok(HttpResponse { status, body })
}
