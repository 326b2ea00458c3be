//! PEM loading and trust-store construction.
//!
//! Provides:
//! - [`parse_certs`] / [`parse_private_key`]: PEM buffers to rustls DER types
//! - [`load_certs`] / [`load_crls`]: the same, straight from a file
//! - [`build_root_store`]: the trust anchor as a `rustls::RootCertStore`
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**.  DER is not
//! supported to keep operator tooling simple (openssl, cfssl, cert-manager all
//! default to PEM).

use std::fs;
use std::path::Path;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse every certificate in a PEM buffer.
///
/// `origin` names the buffer in error messages (usually its file path).
///
/// # Errors
///
/// Returns an error if a PEM block is malformed or there is no certificate.
pub fn parse_certs(pem: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Certificate(format!("Failed to parse certs from '{origin}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Certificate(format!(
            "No certificates found in '{origin}'"
        )));
    }

    Ok(certs)
}

/// Parse the first private key in a PEM buffer.
///
/// Supports RSA (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`), and EC keys.
/// Error messages never include key material.
pub fn parse_private_key(pem: &[u8], origin: &str) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| {
            Error::Certificate(format!("Failed to parse private key from '{origin}': {e}"))
        })?
        .ok_or_else(|| Error::Certificate(format!("No private key found in '{origin}'")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: file loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data, &path.display().to_string())
}

/// Load CRL entries from a PEM file.
pub fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::crls(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Certificate(format!(
                "Failed to parse CRL from '{}': {e}",
                path.display()
            ))
        })
}

/// Build the trust store from CA certificates.
///
/// # Errors
///
/// Returns an error if a certificate is not a usable trust anchor.
pub fn build_root_store(ca_certs: &[CertificateDer<'static>]) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    for cert in ca_certs {
        root_store
            .add(cert.clone())
            .map_err(|e| Error::Tls(format!("Failed to add CA cert to trust store: {e}")))?;
    }
    Ok(root_store)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| Error::Certificate(format!("Cannot read '{}': {e}", path.display())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(cn: &str) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let cert = CertificateParams::new(vec![cn.to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        (cert.pem(), key.serialize_pem())
    }

    #[test]
    fn parse_certs_reads_every_block() {
        let (a, _) = self_signed("a.local");
        let (b, _) = self_signed("b.local");
        let bundle = format!("{a}{b}");
        let certs = parse_certs(bundle.as_bytes(), "bundle").unwrap();
        assert_eq!(certs.len(), 2);
    }

    #[test]
    fn parse_certs_rejects_empty_input() {
        let err = parse_certs(b"", "empty.crt").unwrap_err();
        assert!(err.to_string().contains("No certificates found in 'empty.crt'"));
    }

    #[test]
    fn parse_private_key_reads_generated_key() {
        let (_, key_pem) = self_signed("server.local");
        let key = parse_private_key(key_pem.as_bytes(), "server.key").unwrap();
        assert!(!key.secret_der().is_empty());
    }

    #[test]
    fn parse_private_key_rejects_certificate_only_pem() {
        // GIVEN: a PEM buffer with a certificate and no key
        let (cert_pem, _) = self_signed("server.local");
        // WHEN: parsing it as a key
        let result = parse_private_key(cert_pem.as_bytes(), "cert_only.pem");
        // THEN: a clear error that does not echo file contents
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("No private key found"));
        assert!(!msg.contains("BEGIN"));
    }

    #[test]
    fn load_certs_returns_error_for_missing_file() {
        let result = load_certs(Path::new("/nonexistent/path/ca.crt"));
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("Cannot read"));
    }

    #[test]
    fn load_certs_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let (cert_pem, _) = self_signed("ca.local");
        let path = dir.path().join("ca.crt");
        fs::write(&path, cert_pem).unwrap();

        assert_eq!(load_certs(&path).unwrap().len(), 1);
    }

    #[test]
    fn load_crls_of_file_without_crl_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("none.crl");
        fs::write(&path, b"").unwrap();
        assert!(load_crls(&path).unwrap().is_empty());
    }

    #[test]
    fn root_store_holds_each_ca() {
        let (cert_pem, _) = self_signed("ca.local");
        let certs = parse_certs(cert_pem.as_bytes(), "ca").unwrap();
        let store = build_root_store(&certs).unwrap();
        assert_eq!(store.len(), 1);
    }
}
