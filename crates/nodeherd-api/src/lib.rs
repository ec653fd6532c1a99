//! nodeherd-api: Shared wire types
//!
//! Contains the node-agent RPC payloads, the transport reply envelope,
//! lifecycle events, and the helper subprocess protocol used across the
//! daemon and core crates.

pub mod envelope;
pub mod events;
pub mod helper;
pub mod requests;
pub mod responses;

pub use envelope::{RpcReply, RpcRequest, StatusCode};
pub use events::LifecycleEvent;
pub use helper::{HelperReply, HelperRequest};
pub use requests::{ConfigureRequest, CsrRequest, JwtRequest, RestartRequest};
pub use responses::{ActionReply, CsrReply, JwtReply};
