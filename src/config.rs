//! Configuration management

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::mtls::{BootstrapSettings, TlsSettings};
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerSettings,
    /// Certificates, client-auth mode and transport policy
    pub tls: TlsSettings,
    /// Identity for a generated server certificate
    pub bootstrap: BootstrapSettings,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,
    /// Abandon a TLS handshake that has not completed within this duration
    #[serde(with = "humantime_serde::option")]
    pub handshake_timeout: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            handshake_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl ServerSettings {
    /// Socket address to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| Error::Config(format!("Invalid host '{}': {e}", self.host)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    /// Call [`Config::validate`] once any overrides have been applied.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MTLS_GATE_ prefix)
        figment = figment.merge(Env::prefixed("MTLS_GATE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.server.socket_addr()?;
        if self.server.handshake_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "server.handshake_timeout must be greater than zero".into(),
            ));
        }
        self.tls.validate()?;
        self.bootstrap.validate()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = |e: std::num::ParseIntError| format!("invalid duration '{s}': {e}");
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(invalid)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        } else if let Some(mins) = s.strip_suffix('m') {
            let mins = mins.parse::<u64>().map_err(invalid)?;
            mins.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("duration '{s}' is too large"))
        } else {
            // Assume seconds
            s.parse::<u64>().map(Duration::from_secs).map_err(invalid)
        }
    }

    /// `Option<Duration>` variant; `null` / absent means "no limit".
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration.
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration; accepts plain integers as seconds.
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the value is not a duration.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Raw {
                Secs(u64),
                Text(String),
            }

            match Option::<Raw>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Raw::Secs(secs)) => Ok(Some(Duration::from_secs(secs))),
                Some(Raw::Text(s)) => super::parse(&s)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
            }
        }
    }
}
