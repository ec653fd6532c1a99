//! Subject naming for the provisioning subcollective
//!
//! The fabric's own wire protocol is supplied by the broker client; these
//! helpers only pin down where nodeherd publishes and listens.

/// Subcollective unconfigured nodes wait in.
pub const PROVISIONING_COLLECTIVE: &str = "provisioning";

/// Wildcard covering every lifecycle event kind and component.
pub const LIFECYCLE_EVENTS: &str = "choria.lifecycle.event.>";

/// Topic nodes publish registration data on while in provisioning mode.
pub const REGISTRATION: &str = "choria.provisioning_data";

/// Unicast subject for one node in a subcollective.
pub fn node_subject(collective: &str, identity: &str) -> String {
    format!("{collective}.node.{identity}")
}

/// Broadcast subject for an agent across a subcollective.
pub fn broadcast_subject(collective: &str, agent: &str) -> String {
    format!("{collective}.broadcast.agent.{agent}")
}

/// Broadcast discovery ping subject.
pub fn discovery_subject(collective: &str) -> String {
    broadcast_subject(collective, "discovery")
}

/// Topic a single lifecycle event kind is published on.
pub fn lifecycle_event_subject(kind: &str, component: &str) -> String {
    format!("choria.lifecycle.event.{kind}.{component}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_subject() {
        assert_eq!(
            node_subject(PROVISIONING_COLLECTIVE, "n1.example.net"),
            "provisioning.node.n1.example.net"
        );
    }

    #[test]
    fn test_discovery_subject() {
        assert_eq!(
            discovery_subject(PROVISIONING_COLLECTIVE),
            "provisioning.broadcast.agent.discovery"
        );
    }

    #[test]
    fn test_lifecycle_event_subject_matches_wildcard_prefix() {
        let subject = lifecycle_event_subject("startup", "provisioner");
        assert_eq!(subject, "choria.lifecycle.event.startup.provisioner");
        assert!(subject.starts_with(LIFECYCLE_EVENTS.trim_end_matches('>')));
    }
}
