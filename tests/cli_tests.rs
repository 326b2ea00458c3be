//! Process-level tests: run the built binary and check its exit status.

use std::net::TcpListener;
use std::path::Path;
use std::process::{Command, Output};

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

fn write_config(dir: &Path, port: u16) -> std::path::PathBuf {
    let path = dir.join("gate.yaml");
    let yaml = format!(
        "server:\n  host: 127.0.0.1\n  port: {port}\ntls:\n  key: {key}\n  cert: {cert}\n  ca_cert: {ca}\n",
        key = dir.join("server.key").display(),
        cert = dir.join("server.crt").display(),
        ca = dir.join("ca.crt").display(),
    );
    std::fs::write(&path, yaml).unwrap();
    path
}

fn run(config: &Path, subcommand: &str) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mtls-gate"))
        .arg("--config")
        .arg(config)
        .arg(subcommand)
        .env_remove("MTLS_GATE_PORT")
        .env_remove("MTLS_GATE_HOST")
        .output()
        .unwrap()
}

fn combined(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn serve_without_ca_exits_nonzero_before_binding() {
    // GIVEN: no CA file, and the configured port already taken
    let dir = tempfile::tempdir().unwrap();
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = write_config(dir.path(), occupied.local_addr().unwrap().port());

    // WHEN: starting the server
    let output = run(&config, "serve");

    // THEN: it fails in bootstrap, never reaches bind, and writes nothing
    let log = combined(&output);
    assert!(!output.status.success(), "{log}");
    assert!(log.contains("Certificate bootstrap failed"), "{log}");
    assert!(!log.contains("Failed to bind"), "{log}");
    assert!(!dir.path().join("server.key").exists());
    assert!(!dir.path().join("server.crt").exists());
}

#[test]
fn bootstrap_subcommand_generates_pair_once() {
    // GIVEN: only a CA certificate
    let dir = tempfile::tempdir().unwrap();
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    std::fs::write(dir.path().join("ca.crt"), params.self_signed(&key).unwrap().pem()).unwrap();
    let config = write_config(dir.path(), 0);

    // WHEN: running bootstrap twice
    let first = run(&config, "bootstrap");
    let second = run(&config, "bootstrap");

    // THEN: both succeed; only the first generates
    assert!(first.status.success(), "{}", combined(&first));
    assert!(combined(&first).contains("Generated server key"));
    assert!(second.status.success(), "{}", combined(&second));
    assert!(combined(&second).contains("nothing generated"));
}
