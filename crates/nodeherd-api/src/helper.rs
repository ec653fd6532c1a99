//! Helper subprocess protocol
//!
//! The helper receives one JSON object on stdin and answers with one JSON
//! object on stdout. `inventory` is a string containing JSON (the raw
//! `rpcutil#inventory` reply), not an embedded object. Configuration values
//! must be strings; the typed map rejects anything else at decode time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::responses::CsrReply;

/// Input written to the helper's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperRequest {
    pub identity: String,
    /// Absent when the PKI feature is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr: Option<CsrReply>,
    pub inventory: String,
}

/// Output read from the helper's stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelperReply {
    #[serde(default)]
    pub defer: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub certificate: String,
    #[serde(default)]
    pub ca: String,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}
