//! Fabric client configuration
//!
//! The optional `--choria-config` file carries broker connection settings
//! that do not belong in the provisioner's own configuration, typically
//! the credentials the fabric client should present.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use nodeherd_core::Config;
use nodeherd_core::error::ProvisionError;
use nodeherd_fabric::nats::NatsOptions;

/// Settings for the broker connection
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FabricConfig {
    /// Broker URL; overrides the provisioner config when set
    #[serde(default)]
    pub url: Option<String>,
    /// NATS credentials file presented to the broker
    #[serde(default)]
    pub credentials: Option<PathBuf>,
}

impl FabricConfig {
    /// Load the fabric client settings, or defaults when no file is given
    ///
    /// # Errors
    /// Returns `ProvisionError::Config` if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Self, ProvisionError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("could not read {}: {e}", path.display()))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            ProvisionError::Config(format!("could not parse {}: {e}", path.display()))
        })
    }

    /// Combine with the provisioner config into connector options.
    #[must_use]
    pub fn connect_options(&self, config: &Config) -> NatsOptions {
        NatsOptions::new(self.url.clone().unwrap_or_else(|| config.broker_url.clone()))
            .insecure(config.insecure)
            .credentials(self.credentials.as_deref())
    }
}
