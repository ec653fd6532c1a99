//! End-to-end provisioning flows against a scripted fabric and a real
//! helper script.

use std::collections::HashMap;
use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use kameo::Actor;
use kameo::actor::ActorRef;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use nodeherd_api::envelope::{RpcReply, RpcRequest, StatusCode};
use nodeherd_fabric::error::FabricError;
use nodeherd_fabric::subject;
use nodeherd_fabric::traits::{Connector, InboundMessage};

use nodeherd_core::config::{Config, DenyList};
use nodeherd_core::helper::HelperInvoker;
use nodeherd_core::host::{Host, Outcome};
use nodeherd_core::message::{Announce, AnnounceSource, GetStatus};
use nodeherd_core::metrics::Metrics;
use nodeherd_core::orchestrator::{Orchestrator, OrchestratorArgs};
use nodeherd_core::pause::PauseGate;
use nodeherd_core::rpc::RpcClient;
use nodeherd_core::shutdown::{Shutdown, ShutdownHandle, shutdown_pair};
use nodeherd_core::worker::{WorkerContext, spawn_workers};
use nodeherd_core::state::ProvisionState;
use nodeherd_core::{EventSource, ProvisionError};

// ============================================================================
// Scripted fabric
// ============================================================================

#[derive(Debug, Clone)]
struct RecordedCall {
    identity: String,
    target: String,
    data: Value,
}

#[derive(Default)]
struct MockFabric {
    calls: StdMutex<Vec<RecordedCall>>,
    /// Identities answering broadcast discovery
    discovery: StdMutex<Vec<String>>,
    /// Per-identity inventory reply data
    inventory: StdMutex<HashMap<String, Value>>,
    /// Remaining injected failures per (identity, target)
    fail: StdMutex<HashMap<(String, String), usize>>,
    /// Inventory calls block until this watch flips true
    hold_inventory: StdMutex<Option<watch::Receiver<bool>>>,
    /// Backplane stand-in: flip the gate after a successful inventory
    pause_after_inventory: StdMutex<Option<(PauseGate, Arc<Metrics>)>>,
    /// Subscribers by subject
    subscribers: StdMutex<HashMap<String, mpsc::UnboundedSender<InboundMessage>>>,
}

impl MockFabric {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_inventory(&self, identity: &str, data: Value) {
        self.inventory
            .lock()
            .unwrap()
            .insert(identity.to_string(), data);
    }

    fn set_discovery(&self, identities: &[&str]) {
        *self.discovery.lock().unwrap() =
            identities.iter().map(ToString::to_string).collect();
    }

    fn fail_times(&self, identity: &str, target: &str, times: usize) {
        self.fail
            .lock()
            .unwrap()
            .insert((identity.to_string(), target.to_string()), times);
    }

    fn calls_for(&self, identity: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.identity == identity)
            .cloned()
            .collect()
    }

    fn targets_for(&self, identity: &str) -> Vec<String> {
        self.calls_for(identity).iter().map(|c| c.target.clone()).collect()
    }

    fn emit(&self, subject: &str, payload: Value) {
        if let Some(tx) = self.subscribers.lock().unwrap().get(subject) {
            tx.send(InboundMessage {
                subject: subject.to_string(),
                payload: Bytes::from(serde_json::to_vec(&payload).unwrap()),
            })
            .unwrap();
        }
    }

    fn reply_message(reply: &RpcReply) -> InboundMessage {
        InboundMessage {
            subject: String::new(),
            payload: Bytes::from(serde_json::to_vec(reply).unwrap()),
        }
    }
}

#[async_trait]
impl Connector for MockFabric {
    async fn publish(&self, _subject: &str, _payload: Bytes) -> Result<(), FabricError> {
        Ok(())
    }

    async fn request_window(
        &self,
        subject: &str,
        payload: Bytes,
        _limit: usize,
        _window: Duration,
    ) -> Result<Vec<InboundMessage>, FabricError> {
        let request: RpcRequest = serde_json::from_slice(&payload).unwrap();

        if subject == subject::discovery_subject(subject::PROVISIONING_COLLECTIVE) {
            let replies = self
                .discovery
                .lock()
                .unwrap()
                .iter()
                .map(|identity| Self::reply_message(&RpcReply::ok(identity, Value::Null)))
                .collect();
            return Ok(replies);
        }

        let identity = subject
            .strip_prefix("provisioning.node.")
            .expect("unexpected subject")
            .to_string();
        let target = format!("{}#{}", request.agent, request.action);

        self.calls.lock().unwrap().push(RecordedCall {
            identity: identity.clone(),
            target: target.clone(),
            data: request.data.clone(),
        });

        if target == "rpcutil#inventory" {
            let hold = self.hold_inventory.lock().unwrap().clone();
            if let Some(mut rx) = hold {
                rx.wait_for(|released| *released).await.ok();
            }
        }

        {
            let mut fail = self.fail.lock().unwrap();
            if let Some(remaining) = fail.get_mut(&(identity.clone(), target.clone())) {
                if *remaining > 0 {
                    *remaining -= 1;
                    let reply = RpcReply {
                        sender: identity,
                        statuscode: StatusCode::Aborted,
                        statusmsg: "injected failure".to_string(),
                        data: Value::Null,
                    };
                    return Ok(vec![Self::reply_message(&reply)]);
                }
            }
        }

        let reply = match target.as_str() {
            "rpcutil#inventory" => {
                let data = self
                    .inventory
                    .lock()
                    .unwrap()
                    .get(&identity)
                    .cloned()
                    .unwrap_or_else(|| json!({"facts": {}}));
                let reply = RpcReply::ok(&identity, data);

                if let Some((gate, metrics)) =
                    self.pause_after_inventory.lock().unwrap().take()
                {
                    gate.set(true);
                    metrics.paused.set(1);
                }

                reply
            }
            "choria_provision#jwt" => RpcReply::ok(&identity, json!({"jwt": "ey.token"})),
            "choria_provision#gencsr" => RpcReply::ok(
                &identity,
                json!({"csr": "-----BEGIN CERTIFICATE REQUEST-----", "ssldir": "/opt/ssl"}),
            ),
            "choria_provision#configure" => {
                RpcReply::ok(&identity, json!({"message": "Wrote 3 lines"}))
            }
            "choria_provision#restart" => {
                RpcReply::ok(&identity, json!({"message": "Restarting after 1s"}))
            }
            _ => RpcReply {
                sender: identity,
                statuscode: StatusCode::UnknownAction,
                statusmsg: format!("unknown action {target}"),
                data: Value::Null,
            },
        };

        Ok(vec![Self::reply_message(&reply)])
    }

    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, InboundMessage>, FabricError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .insert(subject.to_string(), tx);

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        })
        .boxed())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn helper_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("helper.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{body}").unwrap();
    drop(file);

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

const HAPPY_HELPER: &str = r#"cat > /dev/null
echo '{"defer":false,"certificate":"C","ca":"A","configuration":{"identity":"n1.final","plugin.choria.server.provision":"false"}}'"#;

const DEFER_HELPER: &str = r#"cat > /dev/null
echo '{"defer":true,"msg":"facts not ready"}'"#;

fn make_config(helper: &std::path::Path, workers: usize, pki: bool, token: &str) -> Config {
    let yaml = format!(
        "helper: {}\nworkers: {workers}\ntoken: \"{token}\"\nsite: testing\nfeatures:\n  pki: {pki}\n",
        helper.display()
    );
    let config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.validate().unwrap();
    config
}

struct Stack {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    gate: PauseGate,
    shutdown: Shutdown,
    handle: ShutdownHandle,
    orchestrator: ActorRef<Orchestrator>,
    rpc: Arc<RpcClient>,
    helper: Arc<HelperInvoker>,
    deny: Arc<DenyList>,
    workers: Vec<JoinHandle<()>>,
}

fn build_stack(fabric: Arc<MockFabric>, config: Config) -> Stack {
    let config = Arc::new(config);
    let metrics = Metrics::new(&config.site);
    let gate = PauseGate::new();
    let (handle, shutdown) = shutdown_pair();

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity());
    let orchestrator = Orchestrator::spawn(OrchestratorArgs { queue: queue_tx });

    let connector: Arc<dyn Connector> = fabric.clone();
    let rpc = Arc::new(
        RpcClient::new(connector, gate.clone(), metrics.clone(), shutdown.clone())
            .with_timeout(Duration::from_millis(500)),
    );
    let helper = Arc::new(HelperInvoker::new(
        config.helper.clone(),
        gate.clone(),
        metrics.clone(),
    ));
    let deny = Arc::new(DenyList::new(&config.cert_deny_list).unwrap());

    let ctx = WorkerContext {
        config: config.clone(),
        rpc: rpc.clone(),
        helper: helper.clone(),
        deny: deny.clone(),
        metrics: metrics.clone(),
        gate: gate.clone(),
        shutdown: shutdown.clone(),
        orchestrator: orchestrator.clone(),
    };
    let workers = spawn_workers(ctx, queue_rx);

    Stack {
        config,
        metrics,
        gate,
        shutdown,
        handle,
        orchestrator,
        rpc,
        helper,
        deny,
        workers,
    }
}

impl Stack {
    fn host(&self, identity: &str) -> Host {
        Host::new(
            identity,
            self.rpc.clone(),
            self.helper.clone(),
            self.deny.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        )
    }

    async fn announce(&self, identity: &str) -> bool {
        self.orchestrator
            .ask(Announce {
                identity: identity.to_string(),
                source: AnnounceSource::Discovery,
            })
            .await
            .unwrap()
    }

    async fn in_flight(&self) -> usize {
        self.orchestrator.ask(GetStatus).await.unwrap().in_flight
    }

    async fn settle(&self) {
        for _ in 0..500 {
            if self.in_flight().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("attempts did not settle");
    }

    async fn stop(self) {
        self.handle.trigger();
        for worker in self.workers {
            worker.await.unwrap();
        }
        self.orchestrator.stop_gracefully().await.ok();
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_happy_path_with_pki() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    fabric.set_inventory("n1", json!({"facts": {"role": "web"}}));

    let stack = build_stack(fabric.clone(), make_config(&helper, 2, true, "t"));

    assert!(stack.announce("n1").await);
    stack.settle().await;

    assert_eq!(
        fabric.targets_for("n1"),
        vec![
            "rpcutil#inventory",
            "choria_provision#gencsr",
            "choria_provision#configure",
            "choria_provision#restart",
        ],
        "strict step order, no JWT without version support"
    );

    let calls = fabric.calls_for("n1");
    let configure = &calls[2].data;
    assert_eq!(configure["token"], "t");
    assert_eq!(configure["ssldir"], "/opt/ssl");
    assert_eq!(configure["ca"], "A");
    assert_eq!(configure["certificate"], "C");

    let pushed: HashMap<String, String> =
        serde_json::from_str(configure["config"].as_str().unwrap()).unwrap();
    assert_eq!(pushed["identity"], "n1.final");
    assert_eq!(pushed["plugin.choria.server.provision"], "false");

    let restart = &calls[3].data;
    assert_eq!(restart["splay"], 1);
    assert_eq!(restart["token"], "t");

    assert_eq!(stack.metrics.provisioned.get(), 1);
    assert_eq!(stack.metrics.provision_errors.get(), 0);

    stack.stop().await;
}

#[tokio::test]
async fn test_jwt_fetched_when_node_advertises_it() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    fabric.set_inventory("n1", json!({"version": "0.21.0", "facts": {}}));

    let stack = build_stack(fabric.clone(), make_config(&helper, 1, false, ""));

    assert!(stack.announce("n1").await);
    stack.settle().await;

    assert_eq!(
        fabric.targets_for("n1"),
        vec![
            "rpcutil#inventory",
            "choria_provision#jwt",
            "choria_provision#configure",
            "choria_provision#restart",
        ],
        "JWT runs, CSR skipped without the pki feature"
    );

    stack.stop().await;
}

#[tokio::test]
async fn test_deferral_stops_short_of_configure() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, DEFER_HELPER);

    let fabric = MockFabric::new();
    let stack = build_stack(fabric.clone(), make_config(&helper, 1, false, ""));

    assert!(stack.announce("n1").await);
    stack.settle().await;

    let targets = fabric.targets_for("n1");
    assert_eq!(targets, vec!["rpcutil#inventory"]);

    assert_eq!(stack.metrics.deferred.get(), 1);
    assert_eq!(stack.metrics.provisioned.get(), 0);
    assert_eq!(stack.metrics.provision_errors.get(), 0);

    // deferred identities become eligible again right away
    assert!(stack.announce("n1").await);
    stack.settle().await;

    stack.stop().await;
}

#[tokio::test]
async fn test_pause_mid_attempt_fails_next_rpc() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    let stack = build_stack(fabric.clone(), make_config(&helper, 1, true, ""));

    *fabric.pause_after_inventory.lock().unwrap() =
        Some((stack.gate.clone(), stack.metrics.clone()));

    let mut host = stack.host("n1");
    let err = host.provision().await.unwrap_err();
    assert!(err.is_paused());
    assert_eq!(host.state(), ProvisionState::Failed);

    assert!(stack.gate.is_paused());
    assert_eq!(stack.metrics.paused.get(), 1);

    let targets = fabric.targets_for("n1");
    assert_eq!(
        targets,
        vec!["rpcutil#inventory"],
        "the CSR call must be refused, nothing after it issued"
    );
    assert_eq!(stack.metrics.provision_errors.get(), 0);

    stack.stop().await;
}

#[tokio::test]
async fn test_deny_listed_identity_never_reaches_csr_or_helper() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    let stack = build_stack(fabric.clone(), make_config(&helper, 1, true, ""));

    assert!(stack.announce("admin.privileged.choria").await);
    stack.settle().await;

    assert_eq!(
        fabric.targets_for("admin.privileged.choria"),
        vec!["rpcutil#inventory"],
        "terminated before gencsr"
    );
    assert_eq!(stack.metrics.provision_errors.get(), 1);
    assert_eq!(stack.metrics.provisioned.get(), 0);

    stack.stop().await;
}

#[tokio::test]
async fn test_duplicate_announcements_yield_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    // slow helper keeps the attempt in flight while the duplicate arrives
    let helper = helper_script(&dir, "cat > /dev/null\nsleep 0.3\necho '{\"defer\":true}'");

    let fabric = MockFabric::new();
    let stack = build_stack(fabric.clone(), make_config(&helper, 2, false, ""));

    assert!(stack.announce("n1").await);
    wait_until("first attempt to start", || {
        !fabric.targets_for("n1").is_empty()
    })
    .await;

    assert!(!stack.announce("n1").await, "duplicate must be a no-op");
    stack.settle().await;

    let inventory_calls = fabric
        .targets_for("n1")
        .iter()
        .filter(|t| *t == "rpcutil#inventory")
        .count();
    assert_eq!(inventory_calls, 1, "exactly one attempt ran");

    stack.stop().await;
}

#[tokio::test]
async fn test_worker_cap_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    let (release_tx, release_rx) = watch::channel(false);
    *fabric.hold_inventory.lock().unwrap() = Some(release_rx);

    let stack = build_stack(fabric.clone(), make_config(&helper, 2, false, ""));

    let mut accepted = 0;
    for i in 0..10 {
        if stack.announce(&format!("n{i}")).await {
            accepted += 1;
        }
    }
    assert!(accepted >= 2, "at least the workers' share must queue");
    assert!(
        accepted <= stack.config.queue_capacity() + 2,
        "backpressure drops the overflow"
    );

    wait_until("both workers to go busy", || {
        stack.metrics.busy_workers.get() == 2
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        stack.metrics.busy_workers.get(),
        2,
        "never more workers than configured"
    );

    release_tx.send(true).unwrap();
    stack.settle().await;

    assert_eq!(stack.metrics.provisioned.get() as usize, accepted);
    assert_eq!(stack.metrics.busy_workers.get(), 0);

    stack.stop().await;
}

#[tokio::test]
async fn test_inventory_retries_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    fabric.fail_times("n1", "rpcutil#inventory", 2);

    let stack = build_stack(fabric.clone(), make_config(&helper, 1, false, ""));

    let mut host = stack.host("n1");
    let outcome = host.provision().await.unwrap();
    assert_eq!(outcome, Outcome::Provisioned);
    assert_eq!(host.state(), ProvisionState::Done);

    let inventory_calls = fabric
        .targets_for("n1")
        .iter()
        .filter(|t| *t == "rpcutil#inventory")
        .count();
    assert_eq!(inventory_calls, 3, "two failures plus the success");
    assert_eq!(stack.metrics.rpc_errors.get("rpcutil#inventory"), 2);

    stack.stop().await;
}

#[tokio::test]
async fn test_inventory_failure_exhausts_retries() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    fabric.fail_times("n1", "rpcutil#inventory", 99);

    let stack = build_stack(fabric.clone(), make_config(&helper, 1, false, ""));

    let mut host = stack.host("n1");
    let err = host.provision().await.unwrap_err();
    assert!(matches!(err, ProvisionError::Rpc { .. }));
    assert_eq!(host.state(), ProvisionState::Failed);

    let inventory_calls = fabric.targets_for("n1").len();
    assert_eq!(inventory_calls, 5, "fixed retry budget");

    stack.stop().await;
}

#[tokio::test]
async fn test_discovery_results_flow_into_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    fabric.set_discovery(&["n1", "n2"]);

    let stack = build_stack(fabric.clone(), make_config(&helper, 2, false, ""));

    let identities = stack.rpc.discover().await.unwrap();
    assert_eq!(identities, vec!["n1", "n2"]);

    for identity in identities {
        stack.announce(&identity).await;
    }
    stack.settle().await;

    assert_eq!(stack.metrics.provisioned.get(), 2);

    stack.stop().await;
}

#[tokio::test]
async fn test_event_source_accepts_matching_events_and_drops_others() {
    let dir = tempfile::tempdir().unwrap();
    let helper = helper_script(&dir, HAPPY_HELPER);

    let fabric = MockFabric::new();
    let stack = build_stack(fabric.clone(), make_config(&helper, 1, false, ""));

    let events = EventSource {
        connector: fabric.clone(),
        orchestrator: stack.orchestrator.clone(),
        gate: stack.gate.clone(),
        shutdown: stack.shutdown.clone(),
        metrics: stack.metrics.clone(),
        component: stack.config.lifecycle_component.clone(),
    };
    let events_task = events.spawn();

    wait_until("subscriptions to register", || {
        fabric.subscribers.lock().unwrap().len() == 2
    })
    .await;

    // startup event for the wrong component is dropped
    fabric.emit(
        subject::LIFECYCLE_EVENTS,
        json!({
            "protocol": "io.choria.lifecycle.v1.startup",
            "identity": "other",
            "component": "server",
        }),
    );
    // matching startup event is accepted
    fabric.emit(
        subject::LIFECYCLE_EVENTS,
        json!({
            "protocol": "io.choria.lifecycle.v1.startup",
            "identity": "n1",
            "component": "provisioner",
        }),
    );
    // registration data is accepted
    fabric.emit(subject::REGISTRATION, json!({"identity": "n2"}));

    wait_until("events to be accepted", || {
        stack.metrics.event_discovered.get() == 2
    })
    .await;

    stack.settle().await;
    assert_eq!(stack.metrics.provisioned.get(), 2);
    assert_eq!(
        fabric.targets_for("other"),
        Vec::<String>::new(),
        "mismatched component never provisioned"
    );

    // events arriving while paused are dropped without buffering
    stack.gate.set(true);
    fabric.emit(subject::REGISTRATION, json!({"identity": "n3"}));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stack.metrics.event_discovered.get(), 2);

    stack.gate.set(false);
    events_task.abort();
    stack.stop().await;
}
