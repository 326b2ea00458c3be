//! Offline diagnostics for the configured certificate files.
//!
//! Reads the files named in [`TlsSettings`] and reports what they contain.
//! Nothing is generated or modified, and the private key is only parsed to
//! confirm it is usable.

use std::fmt;
use std::path::{Path, PathBuf};

use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::time::ASN1Time;

use crate::mtls::cert_manager::read_file;
use crate::mtls::{PeerCertificate, TlsSettings, parse_certs, parse_private_key};

/// Report over the key, certificate and CA files.
#[derive(Debug)]
pub struct InspectionReport {
    /// Server private key.
    pub key: FileReport<()>,
    /// Server certificate chain.
    pub cert: FileReport<Vec<CertificateSummary>>,
    /// CA certificate(s).
    pub ca_cert: FileReport<Vec<CertificateSummary>>,
}

/// State of one file.
#[derive(Debug)]
pub enum FileReport<T> {
    /// The file does not exist.
    Missing(PathBuf),
    /// The file exists but could not be read or parsed.
    Invalid(PathBuf, String),
    /// The file parsed.
    Valid(PathBuf, T),
}

/// One certificate found in a PEM file.
#[derive(Debug, Clone)]
pub struct CertificateSummary {
    /// Extracted fields.
    pub certificate: PeerCertificate,
    /// `notAfter` is in the past.
    pub expired: bool,
    /// `notBefore` is in the future.
    pub not_yet_valid: bool,
}

impl<T> FileReport<T> {
    fn path(&self) -> &Path {
        match self {
            Self::Missing(p) | Self::Invalid(p, _) | Self::Valid(p, _) => p,
        }
    }

    /// The parsed contents, if any.
    pub fn contents(&self) -> Option<&T> {
        match self {
            Self::Valid(_, contents) => Some(contents),
            _ => None,
        }
    }
}

impl InspectionReport {
    /// Whether the server certificate's issuer is the subject of one of the
    /// CA certificates. `None` when either file is unusable.
    #[must_use]
    pub fn issuer_matches_ca(&self) -> Option<bool> {
        let leaf = self.cert.contents()?.first()?;
        let cas = self.ca_cert.contents()?;
        Some(
            cas.iter()
                .any(|ca| ca.certificate.subject == leaf.certificate.issuer),
        )
    }

    /// Every file present and parseable, no certificate outside its validity
    /// window.
    ///
    /// An issuer mismatch is not counted: a bootstrapped server certificate
    /// is self-signed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let certs_ok = |report: &FileReport<Vec<CertificateSummary>>| {
            report
                .contents()
                .is_some_and(|certs| certs.iter().all(|c| !c.expired && !c.not_yet_valid))
        };
        self.key.contents().is_some() && certs_ok(&self.cert) && certs_ok(&self.ca_cert)
    }
}

/// Inspect the files configured in `settings`.
#[must_use]
pub fn inspect(settings: &TlsSettings) -> InspectionReport {
    InspectionReport {
        key: inspect_file(&settings.key, |pem, origin| {
            parse_private_key(pem, origin).map(|_| ()).map_err(|e| e.to_string())
        }),
        cert: inspect_file(&settings.cert, summarize_pem),
        ca_cert: inspect_file(&settings.ca_cert, summarize_pem),
    }
}

fn inspect_file<T>(
    path: &Path,
    parse: impl FnOnce(&[u8], &str) -> std::result::Result<T, String>,
) -> FileReport<T> {
    let path_buf = path.to_path_buf();
    if !path.exists() {
        return FileReport::Missing(path_buf);
    }
    let pem = match read_file(path) {
        Ok(pem) => pem,
        Err(e) => return FileReport::Invalid(path_buf, e.to_string()),
    };
    match parse(&pem, &path.display().to_string()) {
        Ok(contents) => FileReport::Valid(path_buf, contents),
        Err(e) => FileReport::Invalid(path_buf, e),
    }
}

fn summarize_pem(pem: &[u8], origin: &str) -> std::result::Result<Vec<CertificateSummary>, String> {
    parse_certs(pem, origin)
        .map_err(|e| e.to_string())?
        .iter()
        .map(|der| summarize(der))
        .collect()
}

fn summarize(der: &[u8]) -> std::result::Result<CertificateSummary, String> {
    let certificate = PeerCertificate::from_der(der).map_err(|e| e.to_string())?;
    let (_, parsed) = X509Certificate::from_der(der).map_err(|e| e.to_string())?;
    let validity = parsed.validity();
    let now = ASN1Time::now();

    Ok(CertificateSummary {
        certificate,
        expired: validity.not_after < now,
        not_yet_valid: validity.not_before > now,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Display
// ─────────────────────────────────────────────────────────────────────────────

impl fmt::Display for InspectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_section(f, "Server key", &self.key, |f, _| writeln!(f, "  private key OK"))?;
        write_section(f, "Server certificate", &self.cert, |f, c| write_certs(f, c))?;
        write_section(f, "CA certificate", &self.ca_cert, |f, c| write_certs(f, c))?;

        match self.issuer_matches_ca() {
            Some(true) => writeln!(f, "Server certificate is issued by the configured CA"),
            Some(false) => writeln!(
                f,
                "Server certificate is NOT issued by the configured CA (self-signed or foreign issuer)"
            ),
            None => Ok(()),
        }
    }
}

fn write_section<T>(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    report: &FileReport<T>,
    body: impl FnOnce(&mut fmt::Formatter<'_>, &T) -> fmt::Result,
) -> fmt::Result {
    writeln!(f, "{title}: {}", report.path().display())?;
    match report {
        FileReport::Missing(_) => writeln!(f, "  missing"),
        FileReport::Invalid(_, e) => writeln!(f, "  invalid: {e}"),
        FileReport::Valid(_, contents) => body(f, contents),
    }
}

fn write_certs(f: &mut fmt::Formatter<'_>, certs: &[CertificateSummary]) -> fmt::Result {
    for summary in certs {
        let cert = &summary.certificate;
        writeln!(f, "  subject:     {}", format_name(&cert.subject))?;
        writeln!(f, "  issuer:      {}", format_name(&cert.issuer))?;
        writeln!(f, "  valid from:  {}", cert.valid_from)?;
        writeln!(f, "  valid to:    {}", cert.valid_to)?;
        writeln!(f, "  serial:      {}", cert.serial_number)?;
        writeln!(f, "  sha256:      {}", cert.fingerprint_sha256)?;
        if summary.expired {
            writeln!(f, "  status:      EXPIRED")?;
        } else if summary.not_yet_valid {
            writeln!(f, "  status:      NOT YET VALID")?;
        } else {
            writeln!(f, "  status:      valid")?;
        }
    }
    Ok(())
}

fn format_name(attrs: &std::collections::BTreeMap<String, String>) -> String {
    attrs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}
