//! Peer certificate field extraction.
//!
//! Parses an X.509 DER-encoded certificate and extracts the fields echoed
//! back to authorized clients: subject and issuer attributes, validity
//! window, serial number and SHA-256 fingerprint.
//!
//! # No unsafe
//!
//! `x509-parser` performs minimal `unsafe` internally for ASN.1 parsing;
//! this module itself contains no `unsafe` code and simply calls the safe
//! public API.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::time::ASN1Time;
use x509_parser::x509::X509Name;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Peer certificate
// ─────────────────────────────────────────────────────────────────────────────

/// Fields of a client's leaf certificate.
///
/// `subject` and `issuer` map short attribute names (`CN`, `O`, `OU`, `C`,
/// `ST`, `L`, `emailAddress`) to their values; repeated attributes are joined
/// with `", "`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerCertificate {
    /// Subject distinguished name attributes.
    pub subject: BTreeMap<String, String>,

    /// Issuer distinguished name attributes.
    pub issuer: BTreeMap<String, String>,

    /// Start of the validity window (RFC 3339, UTC).
    pub valid_from: String,

    /// End of the validity window (RFC 3339, UTC).
    pub valid_to: String,

    /// Serial number, uppercase hex.
    pub serial_number: String,

    /// SHA-256 of the DER encoding, colon-separated uppercase hex.
    #[serde(rename = "fingerprint256")]
    pub fingerprint_sha256: String,
}

impl PeerCertificate {
    /// Parse a DER-encoded certificate and extract its fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` if the certificate cannot be parsed.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Failed to parse client certificate: {e}")))?;

        let validity = cert.validity();
        Ok(Self {
            subject: name_attributes(cert.subject()),
            issuer: name_attributes(cert.issuer()),
            valid_from: format_time(validity.not_before),
            valid_to: format_time(validity.not_after),
            serial_number: hex::encode_upper(cert.raw_serial()),
            fingerprint_sha256: fingerprint(der),
        })
    }

    /// Subject Common Name, if any.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.subject.get("CN").map(String::as_str)
    }

    /// Human-readable label for logs: CN, else `"<unknown>"`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.common_name().unwrap_or("<unknown>")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Collect the well-known attributes of a distinguished name.
fn name_attributes(name: &X509Name<'_>) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    let mut push = |key: &str, values: Vec<&str>| {
        if !values.is_empty() {
            attrs.insert(key.to_owned(), values.join(", "));
        }
    };

    push("CN", name.iter_common_name().filter_map(|a| a.as_str().ok()).collect());
    push("O", name.iter_organization().filter_map(|a| a.as_str().ok()).collect());
    push(
        "OU",
        name.iter_organizational_unit()
            .filter_map(|a| a.as_str().ok())
            .collect(),
    );
    push("C", name.iter_country().filter_map(|a| a.as_str().ok()).collect());
    push(
        "ST",
        name.iter_state_or_province()
            .filter_map(|a| a.as_str().ok())
            .collect(),
    );
    push("L", name.iter_locality().filter_map(|a| a.as_str().ok()).collect());
    push(
        "emailAddress",
        name.iter_email().filter_map(|a| a.as_str().ok()).collect(),
    );

    attrs
}

fn format_time(time: ASN1Time) -> String {
    DateTime::<Utc>::from_timestamp(time.timestamp(), 0).map_or_else(
        || time.to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Colon-separated uppercase SHA-256 fingerprint of a DER blob.
pub(crate) fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
