//! Request payloads for the node agent actions
//!
//! Field names are the wire contract; nodes in provisioning mode parse
//! these verbatim.

use serde::{Deserialize, Serialize};

/// `choria_provision#gencsr`
///
/// Only `cn` is filled by the orchestrator; the remaining subject fields
/// are part of the wire contract for other callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsrRequest {
    pub token: String,
    pub cn: String,
    #[serde(rename = "C", default, skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(rename = "L", default, skip_serializing_if = "String::is_empty")]
    pub locality: String,
    #[serde(rename = "O", default, skip_serializing_if = "String::is_empty")]
    pub organization: String,
    #[serde(rename = "OU", default, skip_serializing_if = "String::is_empty")]
    pub organizational_unit: String,
    #[serde(rename = "ST", default, skip_serializing_if = "String::is_empty")]
    pub state_name: String,
}

/// `choria_provision#configure`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub token: String,
    /// JSON-encoded map of configuration keys to string values.
    #[serde(rename = "config")]
    pub configuration: String,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub ca: String,
    #[serde(default)]
    pub ssldir: String,
}

/// `choria_provision#restart`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartRequest {
    pub token: String,
    pub splay: u32,
}

/// `choria_provision#jwt`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwtRequest {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_request_omits_empty_subject_fields() {
        let req = CsrRequest {
            token: "t".to_string(),
            cn: "node1.example.net".to_string(),
            ..CsrRequest::default()
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["token"], "t");
        assert_eq!(json["cn"], "node1.example.net");
        assert!(json.get("C").is_none());
        assert!(json.get("OU").is_none());
    }

    #[test]
    fn test_configure_request_field_names() {
        let req = ConfigureRequest {
            token: "t".to_string(),
            configuration: r#"{"identity":"n1"}"#.to_string(),
            certificate: "CERT".to_string(),
            ca: "CA".to_string(),
            ssldir: "/opt/ssl".to_string(),
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["config"], r#"{"identity":"n1"}"#);
        assert_eq!(json["ssldir"], "/opt/ssl");
    }
}
