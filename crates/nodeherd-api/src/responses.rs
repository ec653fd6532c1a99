//! Reply payloads for the node agent actions

use serde::{Deserialize, Serialize};

/// `choria_provision#gencsr` reply: the PEM request and the directory the
/// node stores its SSL material in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CsrReply {
    #[serde(default)]
    pub csr: String,
    #[serde(default)]
    pub ssldir: String,
}

/// `choria_provision#jwt` reply
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwtReply {
    #[serde(default)]
    pub jwt: String,
}

/// Generic free-text reply used by configure and restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionReply {
    #[serde(default)]
    pub message: String,
}
