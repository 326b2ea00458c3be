//! mTLS configuration types.
//!
//! Defines the YAML-deserialisable configuration for mutual TLS: server
//! identity paths, the CA trust anchor, optional CRL, the transport policy
//! (protocol bounds + cipher allow-list) and the bootstrap identity used when
//! no server key/certificate exists yet.
//!
//! # Example YAML
//!
//! ```yaml
//! tls:
//!   key:     "certs/server.key"
//!   cert:    "certs/server.crt"
//!   ca_cert: "certs/ca.crt"
//!   client_auth: require
//!   min_version: TLSv1.2
//!   max_version: TLSv1.3
//!   cipher_suites:
//!     - TLS13_AES_256_GCM_SHA384
//!     - TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
//! bootstrap:
//!   subject: localhost
//!   san_dns: ["localhost"]
//!   validity_days: 365
//! ```

use std::fmt;
use std::path::PathBuf;

use rustls::SupportedProtocolVersion;
use rustls::crypto::CryptoProvider;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// TLS settings
// ─────────────────────────────────────────────────────────────────────────────

/// TLS block: certificate paths, client-auth mode and transport policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Path to the PEM-encoded server private key.
    pub key: PathBuf,

    /// Path to the PEM-encoded server certificate (chain).
    pub cert: PathBuf,

    /// Path to the PEM-encoded CA certificate used to verify client certs.
    ///
    /// Never generated: it represents an externally managed trust root.
    pub ca_cert: PathBuf,

    /// Optional path to a PEM-encoded Certificate Revocation List.
    pub crl_path: Option<PathBuf>,

    /// Whether an untrusted client fails the handshake or only its requests.
    pub client_auth: ClientAuthMode,

    /// Lowest protocol version accepted.
    pub min_version: TlsVersion,

    /// Highest protocol version accepted.
    pub max_version: TlsVersion,

    /// Cipher suite allow-list, by IANA / rustls name.
    pub cipher_suites: Vec<String>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            key: PathBuf::from("certs/server.key"),
            cert: PathBuf::from("certs/server.crt"),
            ca_cert: PathBuf::from("certs/ca.crt"),
            crl_path: None,
            client_auth: ClientAuthMode::default(),
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_suites: default_cipher_suites(),
        }
    }
}

fn default_cipher_suites() -> Vec<String> {
    [
        "TLS13_AES_256_GCM_SHA384",
        "TLS13_AES_128_GCM_SHA256",
        "TLS13_CHACHA20_POLY1305_SHA256",
        "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

impl TlsSettings {
    /// Check paths and the transport policy without touching the filesystem.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("tls.key", &self.key),
            ("tls.cert", &self.cert),
            ("tls.ca_cert", &self.ca_cert),
        ] {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }

        if self.min_version > self.max_version {
            return Err(Error::Config(format!(
                "tls.min_version ({}) is above tls.max_version ({})",
                self.min_version, self.max_version
            )));
        }

        self.crypto_provider().map(|_| ())
    }

    /// Protocol versions inside `[min_version, max_version]`.
    #[must_use]
    pub fn protocol_versions(&self) -> Vec<&'static SupportedProtocolVersion> {
        [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (self.min_version..=self.max_version).contains(v))
            .map(TlsVersion::rustls_version)
            .collect()
    }

    /// The aws-lc-rs provider with its cipher suites narrowed to the allow-list.
    ///
    /// Order follows the allow-list, which is also the server's preference.
    pub fn crypto_provider(&self) -> Result<CryptoProvider> {
        if self.cipher_suites.is_empty() {
            return Err(Error::Config("tls.cipher_suites must not be empty".into()));
        }

        let mut provider = rustls::crypto::aws_lc_rs::default_provider();
        let available = std::mem::take(&mut provider.cipher_suites);

        let mut selected = Vec::with_capacity(self.cipher_suites.len());
        for name in &self.cipher_suites {
            let suite = available
                .iter()
                .find(|s| cipher_suite_name(s).eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| {
                    let known: Vec<String> = available.iter().map(cipher_suite_name).collect();
                    Error::Config(format!(
                        "Unknown cipher suite '{name}' (supported: {})",
                        known.join(", ")
                    ))
                })?;
            if !selected.contains(suite) {
                selected.push(*suite);
            }
        }

        provider.cipher_suites = selected;
        Ok(provider)
    }
}

/// Name of a rustls cipher suite as written in configuration.
#[must_use]
pub fn cipher_suite_name(suite: &rustls::SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

// ─────────────────────────────────────────────────────────────────────────────
// Client auth mode / protocol versions
// ─────────────────────────────────────────────────────────────────────────────

/// How strictly the transport layer enforces client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMode {
    /// Handshake fails unless the client presents a certificate chaining to the CA.
    #[default]
    Require,
    /// A certificate is always requested; untrusted or missing certificates
    /// complete the handshake and are rejected per request.
    Request,
}

impl fmt::Display for ClientAuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Require => f.write_str("require"),
            Self::Request => f.write_str("request"),
        }
    }
}

/// TLS protocol versions the server can be bounded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TlsVersion {
    /// TLS 1.2
    #[serde(rename = "TLSv1.2", alias = "1.2", alias = "tls1.2")]
    Tls12,
    /// TLS 1.3
    #[serde(rename = "TLSv1.3", alias = "1.3", alias = "tls1.3")]
    Tls13,
}

impl TlsVersion {
    fn rustls_version(self) -> &'static SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls12 => f.write_str("TLSv1.2"),
            Self::Tls13 => f.write_str("TLSv1.3"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bootstrap settings
// ─────────────────────────────────────────────────────────────────────────────

/// Identity used when the server key and certificate have to be generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Common Name of the generated self-signed certificate.
    pub subject: String,

    /// DNS Subject Alternative Names for the generated certificate.
    pub san_dns: Vec<String>,

    /// Validity of the generated certificate in days.
    pub validity_days: u32,

    /// External command producing the key/cert pair instead of the built-in
    /// generator. `{key}`, `{cert}`, `{subject}` and `{days}` are substituted.
    pub generate_command: Option<String>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            subject: "localhost".to_string(),
            san_dns: vec!["localhost".to_string()],
            validity_days: 365,
            generate_command: None,
        }
    }
}

impl BootstrapSettings {
    /// Reject an empty subject or a zero validity period.
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(Error::Config("bootstrap.subject must not be empty".into()));
        }
        if self.validity_days == 0 {
            return Err(Error::Config(
                "bootstrap.validity_days must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
