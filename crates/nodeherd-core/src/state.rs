//! Provisioning state machine types

use std::fmt;

use serde::{Deserialize, Serialize};

/// States an attempt moves through
///
/// The sequence is linear; the JWT and CSR steps are skipped when the node
/// or configuration does not call for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionState {
    #[default]
    Start,
    FetchInventory,
    FetchJwt,
    FetchCsr,
    RunHelper,
    Configure,
    Restart,
    /// Attempt finished; node restarted into its final home
    Done,
    /// Helper asked to retry later; terminal but not an error
    Deferred,
    Failed,
}

impl ProvisionState {
    /// Check if transition to target state is valid
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        use ProvisionState::{
            Configure, Deferred, Done, Failed, FetchCsr, FetchInventory, FetchJwt, Restart,
            RunHelper, Start,
        };
        matches!(
            (self, target),
            (Start, FetchInventory)
                | (FetchInventory, FetchJwt | FetchCsr | RunHelper)
                | (FetchJwt, FetchCsr | RunHelper)
                | (FetchCsr, RunHelper)
                | (RunHelper, Configure | Deferred)
                | (Configure, Restart)
                | (Restart, Done)
                | (
                    FetchInventory | FetchJwt | FetchCsr | RunHelper | Configure | Restart,
                    Failed
                )
        )
    }

    /// Whether the attempt has ended
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Deferred | Self::Failed)
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::FetchInventory => "fetch_inventory",
            Self::FetchJwt => "fetch_jwt",
            Self::FetchCsr => "fetch_csr",
            Self::RunHelper => "run_helper",
            Self::Configure => "configure",
            Self::Restart => "restart",
            Self::Done => "done",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
