//! Mutual TLS: certificate bootstrap and the client-certificate gate.
//!
//! # Architecture
//!
//! ```text
//! startup
//!   → bootstrap()         (CA must exist; key+cert generated if both absent)
//!   → MtlsGate::new()     (rustls ServerConfig: versions, ciphers, client verifier)
//! per connection
//!   → TLS handshake       (require: untrusted clients fail here)
//!   → MtlsGate::authorize (chain re-verified → Authenticated | Rejected)
//!   → ConnectionInfo      (attached to every request on the connection)
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration types (`TlsSettings`, `BootstrapSettings`, …)
//! - [`bootstrap`]: load-or-generate of the three PEM artifacts
//! - [`cert_manager`]: PEM parsing and trust-store construction
//! - [`identity`]: X.509 field extraction (`PeerCertificate`)
//! - [`verifier`]: handshake verifier for `client_auth: request`
//! - [`gate`]: `MtlsGate`, `Authorization`, `ConnectionInfo`
//!
//! # Quick start
//!
//! ```yaml
//! tls:
//!   key:     "/etc/mtls-gate/server.key"
//!   cert:    "/etc/mtls-gate/server.crt"
//!   ca_cert: "/etc/mtls-gate/ca.crt"
//!   client_auth: require
//! ```

pub mod bootstrap;
pub mod cert_manager;
pub mod config;
pub mod gate;
pub mod identity;
pub mod verifier;

pub use bootstrap::{
    CertGenerator, CertificateBundle, CommandGenerator, GenerationRequest, RcgenGenerator,
    bootstrap, generator_for,
};
pub use cert_manager::{build_root_store, load_certs, parse_certs, parse_private_key};
pub use config::{BootstrapSettings, ClientAuthMode, TlsSettings, TlsVersion};
pub use gate::{Authorization, ConnectionInfo, MtlsGate, NegotiatedTls, RejectReason};
pub use identity::PeerCertificate;
