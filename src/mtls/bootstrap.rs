//! Certificate bootstrap.
//!
//! Makes sure the server key, server certificate and CA certificate exist
//! before the gate is built:
//!
//! - a missing CA certificate is fatal; it is an externally managed trust
//!   root and is never generated,
//! - a missing key **and** certificate are generated as a self-signed pair,
//! - a key without a certificate (or the reverse) is fatal; an existing
//!   identity is never overwritten or half-regenerated.
//!
//! Generation goes through [`CertGenerator`]: [`RcgenGenerator`] works
//! in-process, [`CommandGenerator`] shells out (e.g. to `openssl`).

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::{debug, info, warn};

use crate::mtls::cert_manager::{parse_certs, parse_private_key, read_file};
use crate::mtls::config::{BootstrapSettings, TlsSettings};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// The three PEM payloads the gate is built from.
pub struct CertificateBundle {
    /// PEM-encoded server private key.
    pub key_pem: Vec<u8>,
    /// PEM-encoded server certificate chain.
    pub cert_pem: Vec<u8>,
    /// PEM-encoded CA certificate(s) used to verify clients.
    pub ca_pem: Vec<u8>,
    /// Whether the key/certificate pair was generated by this run.
    pub generated: bool,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("key_pem", &"<redacted>")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .field("generated", &self.generated)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generators
// ─────────────────────────────────────────────────────────────────────────────

/// What a generator has to produce.
#[derive(Debug)]
pub struct GenerationRequest<'a> {
    /// Where the private key must be written.
    pub key_path: &'a Path,
    /// Where the certificate must be written.
    pub cert_path: &'a Path,
    /// Common Name of the certificate.
    pub subject: &'a str,
    /// DNS Subject Alternative Names.
    pub san_dns: &'a [String],
    /// Validity period in days.
    pub validity_days: u32,
}

/// Produces a self-signed server key/certificate pair on disk.
pub trait CertGenerator {
    /// Write `request.key_path` and `request.cert_path`.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<()>;
}

/// In-process generator backed by `rcgen` (ECDSA P-256).
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenGenerator;

impl CertGenerator for RcgenGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<()> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Bootstrap(format!("Failed to generate server key: {e}")))?;

        let mut sans = request.san_dns.to_vec();
        if sans.is_empty() {
            sans.push(request.subject.to_string());
        }
        let mut params = CertificateParams::new(sans)
            .map_err(|e| Error::Bootstrap(format!("Invalid subject alternative name: {e}")))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, request.subject);
        params.distinguished_name = dn;

        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::minutes(5);
        params.not_after = now + time::Duration::days(i64::from(request.validity_days));

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| Error::Bootstrap(format!("Self-signed cert generation failed: {e}")))?;

        write_file(request.key_path, key_pair.serialize_pem().as_bytes(), true)?;
        write_file(request.cert_path, cert.pem().as_bytes(), false)
    }
}

/// Generator that runs an external command line.
///
/// The command is split shell-style; `{key}`, `{cert}`, `{subject}` and
/// `{days}` are substituted inside each argument.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    argv: Vec<String>,
}

impl CommandGenerator {
    /// Parse a command line such as
    /// `openssl req -x509 -newkey ec -pkeyopt ec_paramgen_curve:P-256 -nodes -keyout {key} -out {cert} -days {days} -subj /CN={subject}`.
    pub fn parse(command: &str) -> Result<Self> {
        let argv = shlex::split(command).ok_or_else(|| {
            Error::Config(format!("bootstrap.generate_command is not valid shell syntax: {command}"))
        })?;
        if argv.is_empty() {
            return Err(Error::Config("bootstrap.generate_command is empty".into()));
        }
        Ok(Self { argv })
    }

    fn render(&self, request: &GenerationRequest<'_>) -> Vec<String> {
        let key = request.key_path.display().to_string();
        let cert = request.cert_path.display().to_string();
        let days = request.validity_days.to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{key}", &key)
                    .replace("{cert}", &cert)
                    .replace("{subject}", request.subject)
                    .replace("{days}", &days)
            })
            .collect()
    }
}

impl CertGenerator for CommandGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<()> {
        let argv = self.render(request);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Config("bootstrap.generate_command is empty".into()))?;

        for path in [request.key_path, request.cert_path] {
            ensure_parent_dir(path)?;
        }

        debug!(program = %program, "Running certificate generation command");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Bootstrap(format!("Cannot run '{program}': {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Bootstrap(format!(
                "'{program}' exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        for path in [request.key_path, request.cert_path] {
            if !path.is_file() {
                return Err(Error::Bootstrap(format!(
                    "'{program}' succeeded but did not create '{}'",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Pick the generator configured in `settings`.
pub fn generator_for(settings: &BootstrapSettings) -> Result<Box<dyn CertGenerator>> {
    match settings.generate_command.as_deref() {
        Some(command) => Ok(Box::new(CommandGenerator::parse(command)?)),
        None => Ok(Box::new(RcgenGenerator)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bootstrap
// ─────────────────────────────────────────────────────────────────────────────

/// Ensure all three certificate artifacts exist and return their contents.
///
/// Running it again once the files exist changes nothing on disk.
pub fn bootstrap(
    tls: &TlsSettings,
    settings: &BootstrapSettings,
    generator: &dyn CertGenerator,
) -> Result<CertificateBundle> {
    if !exists(&tls.ca_cert)? {
        return Err(Error::Bootstrap(format!(
            "CA certificate '{}' not found; it is never generated and must be provided",
            tls.ca_cert.display()
        )));
    }

    let ca_pem = read_artifact(&tls.ca_cert)?;
    check_pem(|| parse_certs(&ca_pem, &tls.ca_cert.display().to_string()).map(|_| ()))?;

    let key_exists = exists(&tls.key)?;
    let cert_exists = exists(&tls.cert)?;

    let generated = match (key_exists, cert_exists) {
        (true, true) => false,
        (false, false) => {
            info!(
                subject = %settings.subject,
                key = %tls.key.display(),
                cert = %tls.cert.display(),
                "Server key and certificate missing, generating self-signed pair"
            );
            let request = GenerationRequest {
                key_path: &tls.key,
                cert_path: &tls.cert,
                subject: &settings.subject,
                san_dns: &settings.san_dns,
                validity_days: settings.validity_days,
            };
            if let Err(e) = generator.generate(&request) {
                // Both were absent, so anything present now is ours.
                discard_partial(&[&tls.key, &tls.cert]);
                return Err(e);
            }
            true
        }
        (true, false) => {
            return Err(Error::Bootstrap(format!(
                "Server key '{}' exists but certificate '{}' is missing; refusing to regenerate",
                tls.key.display(),
                tls.cert.display()
            )));
        }
        (false, true) => {
            return Err(Error::Bootstrap(format!(
                "Server certificate '{}' exists but key '{}' is missing; refusing to regenerate",
                tls.cert.display(),
                tls.key.display()
            )));
        }
    };

    let bundle = CertificateBundle {
        key_pem: read_artifact(&tls.key)?,
        cert_pem: read_artifact(&tls.cert)?,
        ca_pem,
        generated,
    };

    check_pem(|| parse_private_key(&bundle.key_pem, &tls.key.display().to_string()).map(|_| ()))?;
    check_pem(|| parse_certs(&bundle.cert_pem, &tls.cert.display().to_string()).map(|_| ()))?;

    debug!(?bundle, "Certificate bootstrap complete");
    Ok(bundle)
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn exists(path: &Path) -> Result<bool> {
    path.try_exists()
        .map_err(|e| Error::Bootstrap(format!("Cannot access '{}': {e}", path.display())))
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    read_file(path).map_err(|e| Error::Bootstrap(e.to_string()))
}

fn check_pem(parse: impl FnOnce() -> Result<()>) -> Result<()> {
    parse().map_err(|e| Error::Bootstrap(e.to_string()))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir).map_err(|e| {
            Error::Bootstrap(format!("Cannot create dir '{}': {e}", dir.display()))
        }),
        _ => Ok(()),
    }
}

/// Remove files left behind by a failed generation.
fn discard_partial(paths: &[&Path]) {
    for path in paths {
        if !path.is_file() {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => warn!(path = %path.display(), "Removed partially generated file"),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Cannot remove partially generated file"
            ),
        }
    }
}

/// Create `path` exclusively; private files get mode 0600 at creation.
fn write_file(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    ensure_parent_dir(path)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if private {
            options.mode(0o600);
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    options
        .open(path)
        .and_then(|mut file| file.write_all(contents))
        .map_err(|e| Error::Bootstrap(format!("Cannot write '{}': {e}", path.display())))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
