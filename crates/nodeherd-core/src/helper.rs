//! External helper invoker
//!
//! Spawns the configured helper, writes the node's identity, CSR and
//! inventory to its stdin as JSON and parses one JSON reply from stdout.
//! Exceeding the deadline kills the process.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use nodeherd_api::helper::{HelperReply, HelperRequest};

use crate::error::ProvisionError;
use crate::metrics::Metrics;
use crate::pause::PauseGate;
use crate::record::NodeRecord;

/// Hard deadline for one helper run.
pub const HELPER_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the helper; holds no state shared between invocations, so workers
/// may invoke it concurrently.
pub struct HelperInvoker {
    program: PathBuf,
    gate: PauseGate,
    metrics: Arc<Metrics>,
    deadline: Duration,
}

impl HelperInvoker {
    pub fn new(program: PathBuf, gate: PauseGate, metrics: Arc<Metrics>) -> Self {
        Self {
            program,
            gate,
            metrics,
            deadline: HELPER_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run the helper for one node record.
    pub async fn invoke(&self, record: &NodeRecord) -> Result<HelperReply, ProvisionError> {
        if self.gate.is_paused() {
            return Err(ProvisionError::Paused("helper".to_string()));
        }

        let start = Instant::now();
        let result = self.run(record).await;
        self.metrics.helper_time.observe(start.elapsed());

        if let Err(err) = &result {
            self.metrics.helper_errors.inc();
            warn!(identity = %record.identity, error = %err, "helper run failed");
        }

        result
    }

    async fn run(&self, record: &NodeRecord) -> Result<HelperReply, ProvisionError> {
        let request = HelperRequest {
            identity: record.identity.clone(),
            csr: record.csr.clone(),
            inventory: record.inventory.clone().unwrap_or_default(),
        };

        let input = serde_json::to_vec(&request)
            .map_err(|e| ProvisionError::Protocol(format!("could not encode helper input: {e}")))?;

        debug!(identity = %record.identity, helper = %self.program.display(), "running helper");

        let mut child = Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ProvisionError::Helper(format!(
                    "could not spawn {}: {e}",
                    self.program.display()
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProvisionError::Helper("could not open helper stdin".to_string()))?;
        stdin
            .write_all(&input)
            .await
            .map_err(|e| ProvisionError::Helper(format!("could not write helper input: {e}")))?;
        drop(stdin);

        // dropping the timed-out future drops the child, which kills it
        let output = timeout(self.deadline, child.wait_with_output())
            .await
            .map_err(|_| {
                ProvisionError::Helper(format!("timed out after {:?}", self.deadline))
            })?
            .map_err(|e| ProvisionError::Helper(format!("could not read helper output: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProvisionError::Helper(format!(
                "exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ProvisionError::Helper(format!("invalid helper output: {e}")))
    }
}
