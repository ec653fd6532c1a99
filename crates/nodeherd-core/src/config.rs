//! Provisioner configuration
//!
//! Loaded once at startup from a YAML (or JSON) file and immutable
//! afterwards.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ProvisionError;

/// Identities never issued certificates, matched as regular expressions.
pub const DEFAULT_CERT_DENY_LIST: &[&str] = &[
    r"\.privileged\.mcollective$",
    r"\.privileged\.choria$",
    r"\.mcollective$",
    r"\.choria$",
];

/// Process-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of concurrent provisioning workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Discovery cycle period, e.g. `60s` or `5m`
    #[serde(
        default = "default_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,
    /// Path to the external helper program
    pub helper: PathBuf,
    /// Shared secret sent with privileged actions; empty = not enforced
    #[serde(default)]
    pub token: String,
    /// Drop the TLS requirement towards the broker
    #[serde(default)]
    pub insecure: bool,
    /// Site label attached to metrics
    #[serde(default = "default_site")]
    pub site: String,
    /// Component name matched against startup lifecycle events
    #[serde(default = "default_lifecycle_component")]
    pub lifecycle_component: String,
    /// Identities never issued certificates
    #[serde(default = "default_cert_deny_list")]
    pub cert_deny_list: Vec<String>,
    /// Port for the monitoring HTTP listener; 0 disables it
    #[serde(default)]
    pub monitor_port: u16,
    /// Broker the fabric connector dials
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default)]
    pub features: Features,
}

/// Optional behaviors
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    /// Whether the CSR step runs
    #[serde(default)]
    pub pki: bool,
}

fn default_workers() -> usize {
    2
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_site() -> String {
    "unknown".to_string()
}

fn default_lifecycle_component() -> String {
    "provisioner".to_string()
}

fn default_cert_deny_list() -> Vec<String> {
    DEFAULT_CERT_DENY_LIST
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_broker_url() -> String {
    "nats://localhost:4222".to_string()
}

impl Config {
    /// Load configuration from a YAML or JSON file
    ///
    /// # Errors
    /// Returns `ProvisionError::Config` if the file cannot be read, parsed
    /// or validated
    pub fn load(path: &Path) -> Result<Self, ProvisionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("could not read {}: {e}", path.display()))
        })?;

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ProvisionError::Config(format!("could not parse {}: {e}", path.display()))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Check startup invariants
    ///
    /// # Errors
    /// Returns `ProvisionError::Config` on the first violated invariant
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.workers == 0 {
            return Err(ProvisionError::Config(
                "workers must be a positive number".to_string(),
            ));
        }

        if self.helper.as_os_str().is_empty() {
            return Err(ProvisionError::Config("no helper configured".to_string()));
        }

        if self.interval.is_zero() {
            return Err(ProvisionError::Config(
                "interval must be a positive duration".to_string(),
            ));
        }

        // surfaces bad patterns at startup rather than mid-attempt
        DenyList::new(&self.cert_deny_list)?;

        Ok(())
    }

    /// Capacity of the bounded work queue; always at least `workers`.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.workers * 4
    }
}

/// Compiled certificate deny list
#[derive(Debug)]
pub struct DenyList {
    patterns: Vec<Regex>,
}

impl DenyList {
    /// Compile the configured patterns
    ///
    /// # Errors
    /// Returns `ProvisionError::Config` for an invalid pattern
    pub fn new(patterns: &[String]) -> Result<Self, ProvisionError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| ProvisionError::Config(format!("invalid deny pattern {p:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// The first pattern matching the identity, if any
    #[must_use]
    pub fn matched(&self, identity: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.is_match(identity))
            .map(Regex::as_str)
    }
}

fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn serialize_duration<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{}s", d.as_secs()))
}

/// Parse `300`, `300s`, `5m` or `1h` into a duration.
fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();

    let (number, multiplier) = match text.chars().last() {
        Some('s') => (&text[..text.len() - 1], 1),
        Some('m') => (&text[..text.len() - 1], 60),
        Some('h') => (&text[..text.len() - 1], 3600),
        Some(c) if c.is_ascii_digit() => (text, 1),
        _ => return Err(format!("invalid duration {text:?}")),
    };

    number
        .trim()
        .parse::<u64>()
        .map(|n| Duration::from_secs(n * multiplier))
        .map_err(|e| format!("invalid duration {text:?}: {e}"))
}
