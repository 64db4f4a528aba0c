//! The test sequencer RPC service.
//!
//! [`TestSequencer`] owns the node registry and the single "active sequence"
//! slot. `RegisterNode` may run many times concurrently; `RunTestSequence`
//! is serialized through the slot with newcomer-wins pre-emption:
//!
//! ```text
//! RunTestSequence ──► cancel residual traffic
//!                 ──► cancel + await whichever sequence holds the slot
//!                 ──► claim the slot
//!                 ──► per test: plan → configure → introduce → run traffic
//!                 ──► release the slot, wake waiters
//! ```
//!
//! A sequence is `Pending → Running → (Completed | Aborted-by-error |
//! Aborted-by-preemption)`. The cancel token is checked between tests only;
//! in-flight phase RPCs are never interrupted. The slot is released by a
//! drop-guard, so a handler future dropped on client disconnect can never
//! wedge later callers.

pub mod error;

pub use error::SequencerError;

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::credentials::ChannelCredentialsFactory;
use crate::fanout;
use crate::placement;
use crate::proto::tutti_v1::node_manager_client::NodeManagerClient;
use crate::proto::tutti_v1::test_sequencer_server;
use crate::proto::tutti_v1::{
    DistributedSystemDescription, NodeConfig, NodeRegistration, TestResult, TestSequence,
    TestSequenceResults,
};
use crate::registry::{NodeManagerStub, NodeRegistry};

/// Marks the sequence currently inside the critical section. At most one
/// exists process-wide.
struct ActiveSequence {
    /// Fired by a newcomer to pre-empt this sequence at its next checkpoint.
    cancel: CancellationToken,
    /// Single-shot latch newcomers await; never reused across sequences.
    done: CancellationToken,
}

/// Releases the active-sequence slot on every exit path.
///
/// The slot is cleared first, then the done latch fires, so awakened waiters
/// observe an empty slot on their first retry.
struct SequenceGuard<'a> {
    slot: &'a Mutex<Option<ActiveSequence>>,
    cancel: CancellationToken,
    done: CancellationToken,
}

impl SequenceGuard<'_> {
    fn preempted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SequenceGuard<'_> {
    fn drop(&mut self) {
        self.slot
            .lock()
            .expect("active sequence lock poisoned")
            .take();
        self.done.cancel();
    }
}

/// The sequencer core: node registry plus the sequence controller, served
/// over gRPC.
pub struct TestSequencer {
    registry: Arc<NodeRegistry>,
    active: Mutex<Option<ActiveSequence>>,
    channel_creds: Arc<dyn ChannelCredentialsFactory>,
}

impl TestSequencer {
    pub fn new(channel_creds: Arc<dyn ChannelCredentialsFactory>) -> Self {
        Self {
            registry: Arc::new(NodeRegistry::new()),
            active: Mutex::new(None),
            channel_creds,
        }
    }

    /// Shared handle to the node registry. The server owns the sequencer once
    /// serving starts; callers keep this for observability.
    pub fn registry(&self) -> Arc<NodeRegistry> {
        Arc::clone(&self.registry)
    }

    /// Open a lazily-connecting control channel to a node manager.
    fn open_node_stub(
        &self,
        registration: &NodeRegistration,
    ) -> Result<NodeManagerStub, SequencerError> {
        let scheme = if self.channel_creds.channel_tls().is_some() {
            "https"
        } else {
            "http"
        };
        let target = format!(
            "{scheme}://{}:{}",
            registration.hostname, registration.control_port
        );

        let mut endpoint = Endpoint::from_shared(target.clone()).map_err(|e| {
            warn!(target = %target, error = %e, "invalid node manager target");
            SequencerError::StubCreation {
                target: target.clone(),
            }
        })?;
        if let Some(tls) = self.channel_creds.channel_tls() {
            endpoint = endpoint.tls_config(tls).map_err(|e| {
                warn!(target = %target, error = %e, "channel TLS configuration rejected");
                SequencerError::StubCreation {
                    target: target.clone(),
                }
            })?;
        }
        Ok(NodeManagerClient::new(endpoint.connect_lazy()))
    }

    /// Pre-emption protocol: cancel whichever sequence holds the slot, await
    /// its done latch, and retry until the slot is free, then claim it.
    async fn begin_sequence(&self) -> SequenceGuard<'_> {
        loop {
            let predecessor = {
                let mut slot = self.active.lock().expect("active sequence lock poisoned");
                match slot.as_ref() {
                    Some(running) => {
                        running.cancel.cancel();
                        running.done.clone()
                    }
                    None => {
                        let cancel = CancellationToken::new();
                        let done = CancellationToken::new();
                        *slot = Some(ActiveSequence {
                            cancel: cancel.clone(),
                            done: done.clone(),
                        });
                        return SequenceGuard {
                            slot: &self.active,
                            cancel,
                            done,
                        };
                    }
                }
            };
            predecessor.cancelled().await;
        }
    }

    async fn do_run_test_sequence(
        &self,
        guard: &SequenceGuard<'_>,
        sequence: &TestSequence,
    ) -> Result<TestSequenceResults, SequencerError> {
        let mut results = TestSequenceResults::default();
        for (index, test) in sequence.tests.iter().enumerate() {
            if guard.preempted() {
                return Err(SequencerError::Preempted);
            }
            info!(test = index, total = sequence.tests.len(), "running test");
            let result = self.do_run_test(test).await?;
            results.test_results.push(result);
        }
        Ok(results)
    }

    /// Plan one test's placement, then drive the three forward phases.
    async fn do_run_test(
        &self,
        test: &DistributedSystemDescription,
    ) -> Result<TestResult, SequencerError> {
        let placement = placement::plan(test, self.registry.aliases())?;
        for (alias, services) in &placement {
            info!(node = %alias, services = ?services, "service placement");
        }

        let endpoints = fanout::configure_nodes(&self.registry, &placement, test).await?;
        fanout::introduce_peers(&self.registry, &placement, &endpoints).await?;
        let logs = fanout::run_traffic(&self.registry, &placement).await?;

        Ok(TestResult {
            traffic_config: Some(test.clone()),
            placement: Some(endpoints),
            service_logs: Some(logs),
        })
    }
}

#[tonic::async_trait]
impl test_sequencer_server::TestSequencer for TestSequencer {
    async fn register_node(
        &self,
        request: Request<NodeRegistration>,
    ) -> Result<Response<NodeConfig>, Status> {
        let registration = request.into_inner();
        if registration.hostname.is_empty() || registration.control_port <= 0 {
            return Err(SequencerError::InvalidRegistration.into());
        }

        let stub = self.open_node_stub(&registration)?;
        let hostname = registration.hostname.clone();
        let control_port = registration.control_port;
        let (node_id, node_alias) = self.registry.register(registration, stub);

        info!(
            node = %node_alias,
            target = %format!("{hostname}:{control_port}"),
            "connected to node manager"
        );
        Ok(Response::new(NodeConfig {
            node_id,
            node_alias,
        }))
    }

    async fn run_test_sequence(
        &self,
        request: Request<TestSequence>,
    ) -> Result<Response<TestSequenceResults>, Status> {
        let sequence = request.into_inner();
        info!(tests = sequence.tests.len(), "test sequence received");

        // Stop residual data-plane activity from any previous sequence before
        // contending for the slot.
        fanout::cancel_traffic(&self.registry).await;

        let guard = self.begin_sequence().await;
        let outcome = self.do_run_test_sequence(&guard, &sequence).await;
        drop(guard);

        match outcome {
            Ok(results) => Ok(Response::new(results)),
            Err(err) => Err(Status::aborted(err.to_string())),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::InsecureCredentials;
    use crate::proto::tutti_v1::test_sequencer_server::TestSequencer as _;
    use crate::proto::tutti_v1::ServiceSpec;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tonic::Code;

    fn sequencer() -> TestSequencer {
        TestSequencer::new(Arc::new(InsecureCredentials))
    }

    fn registration(hostname: &str, port: i32) -> Request<NodeRegistration> {
        Request::new(NodeRegistration {
            hostname: hostname.to_string(),
            control_port: port,
        })
    }

    // ── Registration handler ──────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_hostname_is_rejected() {
        let seq = sequencer();
        let status = seq.register_node(registration("", 1234)).await.unwrap_err();

        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), "Invalid Registration");
    }

    #[tokio::test]
    async fn non_positive_port_is_rejected() {
        let seq = sequencer();
        let status = seq.register_node(registration("h", 0)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);

        let status = seq.register_node(registration("h", -1)).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn unparseable_target_fails_with_unknown() {
        let seq = sequencer();
        // Whitespace cannot appear in a URI authority, so the endpoint for
        // this node cannot be constructed.
        let status = seq
            .register_node(registration("bad host", 1234))
            .await
            .unwrap_err();

        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "Could not create node stub.");
    }

    #[tokio::test]
    async fn repeated_registration_is_idempotent() {
        let seq = sequencer();
        let first = seq
            .register_node(registration("h", 1234))
            .await
            .unwrap()
            .into_inner();
        let second = seq
            .register_node(registration("h", 1234))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(first.node_id, 0);
        assert_eq!(first.node_alias, "node0");
        assert_eq!(first, second);
        assert_eq!(seq.registry().len(), 1);
    }

    // ── Sequence controller ───────────────────────────────────────────────────

    #[tokio::test]
    async fn sequence_with_no_services_aborts_with_planner_message() {
        let seq = sequencer();
        let sequence = TestSequence {
            tests: vec![DistributedSystemDescription::default()],
        };

        let status = seq
            .run_test_sequence(Request::new(sequence))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(status.message(), "No services defined.");
    }

    #[tokio::test]
    async fn sequence_without_nodes_aborts_with_placement_failure() {
        let seq = sequencer();
        let sequence = TestSequence {
            tests: vec![DistributedSystemDescription {
                services: vec![ServiceSpec {
                    server_type: "A".to_string(),
                    count: 1,
                }],
                ..Default::default()
            }],
        };

        let status = seq
            .run_test_sequence(Request::new(sequence))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(
            status.message(),
            "No idle node for placement of services: A/0"
        );
    }

    #[tokio::test]
    async fn newcomer_cancels_incumbent_and_waits_for_its_latch() {
        let seq = Arc::new(sequencer());
        let incumbent = seq.begin_sequence().await;
        assert!(!incumbent.preempted());

        let entered = Arc::new(AtomicBool::new(false));
        let contender = {
            let seq = Arc::clone(&seq);
            let entered = Arc::clone(&entered);
            tokio::spawn(async move {
                let _guard = seq.begin_sequence().await;
                entered.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            !entered.load(Ordering::SeqCst),
            "contender entered while the incumbent still held the slot"
        );
        assert!(incumbent.preempted(), "contender must cancel the incumbent");

        drop(incumbent);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender never entered")
            .unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn slot_is_free_again_after_guard_drop() {
        let seq = sequencer();
        let first = seq.begin_sequence().await;
        drop(first);

        // Must complete immediately; a leaked slot would hang here.
        let second = tokio::time::timeout(Duration::from_millis(100), seq.begin_sequence())
            .await
            .expect("slot was not released");
        assert!(!second.preempted());
    }
}
