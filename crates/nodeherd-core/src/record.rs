//! Per-attempt node record
//!
//! Created when a worker dequeues an identity, mutated only by that worker,
//! and discarded when the attempt terminates.

use std::collections::HashMap;

use nodeherd_api::responses::CsrReply;

/// Minimum node version whose build carries the JWT action.
const JWT_MIN_VERSION: (u64, u64, u64) = (0, 19, 0);

/// Everything gathered about one node during one provisioning attempt
#[derive(Debug, Clone, Default)]
pub struct NodeRecord {
    /// Fabric-unique node identity
    pub identity: String,
    /// Shared secret sent with privileged actions
    pub token: String,
    /// Raw JSON of the `rpcutil#inventory` reply
    pub inventory: Option<String>,
    /// CSR and node-local SSL directory, when the PKI step ran
    pub csr: Option<CsrReply>,
    /// Raw provisioning JWT returned by the node
    pub jwt: Option<String>,
    /// Final configuration to push
    pub config: HashMap<String, String>,
    pub certificate: Option<String>,
    pub ca: Option<String>,
    pub deferred: bool,
    pub defer_reason: Option<String>,
}

impl NodeRecord {
    #[must_use]
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            token: token.into(),
            ..Self::default()
        }
    }

    /// Whether the node's build advertises the JWT action, read from the
    /// `version` field of its inventory reply.
    #[must_use]
    pub fn supports_jwt(&self) -> bool {
        let Some(inventory) = &self.inventory else {
            return false;
        };

        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(inventory) else {
            return false;
        };

        parsed["version"]
            .as_str()
            .and_then(parse_version)
            .is_some_and(|v| v >= JWT_MIN_VERSION)
    }
}

/// Parse a `major.minor.patch` version, ignoring any pre-release suffix.
fn parse_version(text: &str) -> Option<(u64, u64, u64)> {
    let core = text.split(['-', '+']).next()?;
    let mut parts = core.split('.');

    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;

    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_jwt_from_version() {
        let mut record = NodeRecord::new("n1.example.net", "");
        assert!(!record.supports_jwt(), "no inventory yet");

        record.inventory = Some(r#"{"version":"0.19.0","facts":{}}"#.to_string());
        assert!(record.supports_jwt());

        record.inventory = Some(r#"{"version":"0.18.9"}"#.to_string());
        assert!(!record.supports_jwt());

        record.inventory = Some(r#"{"version":"1.0.0-rc1"}"#.to_string());
        assert!(record.supports_jwt());

        record.inventory = Some(r#"{"facts":{"role":"web"}}"#.to_string());
        assert!(!record.supports_jwt(), "no version field");

        record.inventory = Some("not json".to_string());
        assert!(!record.supports_jwt());
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("0.19.0"), Some((0, 19, 0)));
        assert_eq!(parse_version("1.2"), Some((1, 2, 0)));
        assert_eq!(parse_version("2.0.1+meta"), Some((2, 0, 1)));
        assert_eq!(parse_version("devel"), None);
    }
}
