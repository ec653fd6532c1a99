//! Request and reply envelopes carried over the fabric
//!
//! Every unicast action is wrapped in an [`RpcRequest`], every answer in an
//! [`RpcReply`] with an mcorpc-style status code. The envelope is what the
//! fabric adapter validates before an action payload is ever looked at.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while decoding an envelope.
#[derive(Error, Debug, Clone)]
pub enum EnvelopeError {
    #[error("invalid envelope JSON: {0}")]
    Malformed(String),
}

/// Request envelope published to a node (or broadcast to the subcollective).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub agent: String,
    pub action: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RpcRequest {
    pub fn new(agent: &str, action: &str, data: serde_json::Value) -> Self {
        Self {
            agent: agent.to_string(),
            action: action.to_string(),
            data,
        }
    }
}

/// Reply envelope received from a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReply {
    pub sender: String,
    pub statuscode: StatusCode,
    #[serde(default)]
    pub statusmsg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RpcReply {
    /// An OK reply carrying `data`, as a node would produce it.
    pub fn ok(sender: &str, data: serde_json::Value) -> Self {
        Self {
            sender: sender.to_string(),
            statuscode: StatusCode::Ok,
            statusmsg: String::new(),
            data,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.statuscode == StatusCode::Ok
    }

    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(payload).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

/// Action status codes, numeric on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    #[default]
    Ok,
    Aborted,
    UnknownAction,
    MissingData,
    InvalidData,
    UnknownError,
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Aborted => 1,
            Self::UnknownAction => 2,
            Self::MissingData => 3,
            Self::InvalidData => 4,
            Self::UnknownError => 5,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ok),
            1 => Some(Self::Aborted),
            2 => Some(Self::UnknownAction),
            3 => Some(Self::MissingData),
            4 => Some(Self::InvalidData),
            5 => Some(Self::UnknownError),
            _ => None,
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::from_u8(code).ok_or_else(|| D::Error::custom(format!("unknown status code {code}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_code_round_trip() {
        for code in 0..=5u8 {
            let status = StatusCode::from_u8(code).unwrap();
            assert_eq!(status.as_u8(), code);
        }
        assert!(StatusCode::from_u8(6).is_none());
    }

    #[test]
    fn test_reply_decode() {
        let raw = br#"{"sender":"n1.example.net","statuscode":0,"data":{"facts":{}}}"#;
        let reply = RpcReply::decode(raw).unwrap();

        assert!(reply.is_ok());
        assert_eq!(reply.sender, "n1.example.net");
        assert_eq!(reply.statusmsg, "");
    }

    #[test]
    fn test_reply_decode_aborted() {
        let raw = br#"{"sender":"n1","statuscode":1,"statusmsg":"not in provisioning mode"}"#;
        let reply = RpcReply::decode(raw).unwrap();

        assert!(!reply.is_ok());
        assert_eq!(reply.statuscode, StatusCode::Aborted);
        assert_eq!(reply.statusmsg, "not in provisioning mode");
    }

    #[test]
    fn test_reply_decode_rejects_unknown_code() {
        let raw = br#"{"sender":"n1","statuscode":99}"#;
        assert!(RpcReply::decode(raw).is_err());
    }

    #[test]
    fn test_request_round_trip() {
        let req = RpcRequest::new("choria_provision", "restart", json!({"splay": 1}));
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: RpcRequest = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back.agent, "choria_provision");
        assert_eq!(back.action, "restart");
        assert_eq!(back.data["splay"], 1);
    }
}
