//! nodeherd-fabric: Transport layer for the messaging fabric
//!
//! Exposes the [`Connector`] seam the orchestrator core talks through, the
//! subject naming scheme, and a production NATS-backed connector.

pub mod error;
pub mod nats;
pub mod subject;
pub mod traits;

pub use error::FabricError;
pub use nats::NatsConnector;
pub use traits::{Connector, InboundMessage};
