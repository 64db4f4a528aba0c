//! Four-phase fan-out RPC driver.
//!
//! Every phase issues one RPC per participating node, all launched before any
//! reply is awaited, then drains every in-flight call before returning; no
//! reply is ever abandoned. Replies from nodes that succeeded are still
//! aggregated when others failed; any observed failure collapses the phase
//! into [`SequencerError::FanOut`] after the underlying statuses have been
//! logged per node.
//!
//! RunTraffic is the only phase with a side effect on the registry: each
//! target is flipped to busy under the write lock before dispatch and back to
//! idle as its reply lands. CancelTraffic mirrors that, but only targets
//! nodes currently marked busy and never propagates an error.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tonic::Status;
use tracing::{debug, error, info};

use crate::placement::Placement;
use crate::proto::tutti_v1::{
    CancelTrafficRequest, DistributedSystemDescription, NodeServiceConfig, RunTrafficRequest,
    ServiceEndpointMap, ServiceLogs,
};
use crate::registry::{NodeManagerStub, NodeRegistry};
use crate::sequencer::error::SequencerError;

/// Launch one worker per target, drain them all, and collect the replies.
///
/// The last failing status is remembered (and every failure logged); if any
/// worker failed the whole phase collapses to [`SequencerError::FanOut`].
async fn drive<R, F, Fut>(
    phase: &'static str,
    targets: Vec<(String, NodeManagerStub)>,
    call: F,
) -> Result<Vec<(String, R)>, SequencerError>
where
    R: Send + 'static,
    F: Fn(String, NodeManagerStub) -> Fut,
    Fut: Future<Output = Result<R, Status>> + Send + 'static,
{
    let mut in_flight = JoinSet::new();
    for (alias, stub) in targets {
        let rpc = call(alias.clone(), stub);
        in_flight.spawn(async move { (alias, rpc.await) });
    }

    let mut replies = Vec::with_capacity(in_flight.len());
    let mut last_failure: Option<Status> = None;
    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((alias, Ok(reply))) => {
                debug!(phase, node = %alias, "node RPC completed");
                replies.push((alias, reply));
            }
            Ok((alias, Err(status))) => {
                error!(
                    phase,
                    node = %alias,
                    code = ?status.code(),
                    message = status.message(),
                    "node RPC failed"
                );
                last_failure = Some(status);
            }
            Err(join_error) => {
                error!(phase, error = %join_error, "fan-out worker panicked");
                last_failure = Some(Status::internal(join_error.to_string()));
            }
        }
    }

    if last_failure.is_some() {
        return Err(SequencerError::FanOut);
    }
    Ok(replies)
}

/// Phase 1: push the test and each node's service list to every participant;
/// returns the union of their endpoint announcements.
pub async fn configure_nodes(
    registry: &NodeRegistry,
    placement: &Placement,
    test: &DistributedSystemDescription,
) -> Result<ServiceEndpointMap, SequencerError> {
    let targets = registry.stubs_for(placement.keys())?;
    let replies = drive("configure", targets, |alias, mut stub| {
        let request = NodeServiceConfig {
            traffic_config: Some(test.clone()),
            services: placement
                .get(&alias)
                .map(|services| services.iter().cloned().collect())
                .unwrap_or_default(),
        };
        async move {
            stub.configure_node(request)
                .await
                .map(tonic::Response::into_inner)
        }
    })
    .await?;

    let mut merged = ServiceEndpointMap::default();
    for (_alias, reply) in replies {
        merge_endpoint_maps(&mut merged, reply)?;
    }
    Ok(merged)
}

/// Phase 2: broadcast the merged endpoint map so every node can reach every
/// service instance. All-or-error; the acks carry no payload.
pub async fn introduce_peers(
    registry: &NodeRegistry,
    placement: &Placement,
    endpoints: &ServiceEndpointMap,
) -> Result<(), SequencerError> {
    info!(
        services = endpoints.service_endpoints.len(),
        "broadcasting service map"
    );
    let targets = registry.stubs_for(placement.keys())?;
    drive("introduce_peers", targets, |_alias, mut stub| {
        let request = endpoints.clone();
        async move { stub.introduce_peers(request).await.map(|_| ()) }
    })
    .await?;
    Ok(())
}

/// Phase 3: start traffic everywhere and collect the logs. Each node is
/// marked busy before its RPC is launched and idle again when the reply
/// arrives, success or not.
pub async fn run_traffic(
    registry: &Arc<NodeRegistry>,
    placement: &Placement,
) -> Result<ServiceLogs, SequencerError> {
    let targets = registry.stubs_for(placement.keys())?;
    registry.mark_busy(placement.keys());

    let registry_for_workers = Arc::clone(registry);
    let replies = drive("run_traffic", targets, move |alias, mut stub| {
        let registry = Arc::clone(&registry_for_workers);
        async move {
            let reply = stub.run_traffic(RunTrafficRequest {}).await;
            registry.set_idle(&alias, true);
            reply.map(tonic::Response::into_inner)
        }
    })
    .await?;

    let mut merged = ServiceLogs::default();
    for (_alias, reply) in replies {
        merge_service_logs(&mut merged, reply)?;
    }
    Ok(merged)
}

/// Stop whatever traffic is still running on busy nodes. Failures are logged
/// and swallowed; every targeted node is marked idle once its RPC completes.
pub async fn cancel_traffic(registry: &Arc<NodeRegistry>) {
    let targets = registry.busy_stubs();
    if targets.is_empty() {
        debug!("all nodes already idle");
        return;
    }

    let mut in_flight = JoinSet::new();
    for (alias, mut stub) in targets {
        info!(node = %alias, "node was busy, cancelling traffic");
        let registry = Arc::clone(registry);
        in_flight.spawn(async move {
            let reply = stub.cancel_traffic(CancelTrafficRequest {}).await;
            registry.set_idle(&alias, true);
            if let Err(status) = reply {
                error!(
                    node = %alias,
                    code = ?status.code(),
                    message = status.message(),
                    "cancelling traffic failed"
                );
            }
        });
    }
    while in_flight.join_next().await.is_some() {}
}

/// Set-union merge of endpoint announcements. Two nodes announcing different
/// endpoints for the same service instance is a conflict.
pub fn merge_endpoint_maps(
    acc: &mut ServiceEndpointMap,
    incoming: ServiceEndpointMap,
) -> Result<(), SequencerError> {
    for (service, endpoint) in incoming.service_endpoints {
        match acc.service_endpoints.get(&service) {
            Some(existing) if *existing != endpoint => {
                return Err(SequencerError::MergeConflict { key: service });
            }
            _ => {
                acc.service_endpoints.insert(service, endpoint);
            }
        }
    }
    Ok(())
}

/// Set-union merge of per-instance log payloads, same conflict rule.
pub fn merge_service_logs(
    acc: &mut ServiceLogs,
    incoming: ServiceLogs,
) -> Result<(), SequencerError> {
    for (instance, log) in incoming.instance_logs {
        match acc.instance_logs.get(&instance) {
            Some(existing) if *existing != log => {
                return Err(SequencerError::MergeConflict { key: instance });
            }
            _ => {
                acc.instance_logs.insert(instance, log);
            }
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::tutti_v1::node_manager_client::NodeManagerClient;
    use crate::proto::tutti_v1::{NodeRegistration, ServiceEndpoint, ServiceLog};
    use std::collections::BTreeSet;
    use tonic::transport::Endpoint;

    fn endpoint_map(entries: &[(&str, &str)]) -> ServiceEndpointMap {
        ServiceEndpointMap {
            service_endpoints: entries
                .iter()
                .map(|(service, address)| {
                    (
                        service.to_string(),
                        ServiceEndpoint {
                            endpoint_address: address.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn endpoint_merge_takes_the_union() {
        let mut acc = endpoint_map(&[("A/0", "h0:9000")]);
        merge_endpoint_maps(&mut acc, endpoint_map(&[("A/1", "h1:9000")])).unwrap();

        assert_eq!(acc.service_endpoints.len(), 2);
        assert_eq!(acc.service_endpoints["A/1"].endpoint_address, "h1:9000");
    }

    #[test]
    fn endpoint_merge_tolerates_identical_duplicates() {
        let mut acc = endpoint_map(&[("A/0", "h0:9000")]);
        merge_endpoint_maps(&mut acc, endpoint_map(&[("A/0", "h0:9000")])).unwrap();

        assert_eq!(acc.service_endpoints.len(), 1);
    }

    #[test]
    fn endpoint_merge_rejects_disagreeing_duplicates() {
        let mut acc = endpoint_map(&[("A/0", "h0:9000")]);
        let err =
            merge_endpoint_maps(&mut acc, endpoint_map(&[("A/0", "h1:9000")])).unwrap_err();

        assert!(matches!(err, SequencerError::MergeConflict { .. }));
    }

    #[test]
    fn log_merge_rejects_disagreeing_duplicates() {
        let log = |payload: &str| ServiceLog {
            log_contents: payload.as_bytes().to_vec(),
        };
        let mut acc = ServiceLogs::default();
        acc.instance_logs.insert("A/0".to_string(), log("one"));

        let mut incoming = ServiceLogs::default();
        incoming.instance_logs.insert("A/0".to_string(), log("two"));

        let err = merge_service_logs(&mut acc, incoming).unwrap_err();
        assert!(matches!(err, SequencerError::MergeConflict { .. }));
    }

    /// Registry whose single node points at a dead port: the lazy channel
    /// only fails once a phase actually dials it.
    fn dead_node_registry() -> Arc<NodeRegistry> {
        let registry = Arc::new(NodeRegistry::new());
        let stub =
            NodeManagerClient::new(Endpoint::from_static("http://127.0.0.1:1").connect_lazy());
        registry.register(
            NodeRegistration {
                hostname: "127.0.0.1".to_string(),
                control_port: 1,
            },
            stub,
        );
        registry
    }

    fn single_node_placement() -> Placement {
        let mut placement = Placement::new();
        placement.insert(
            "node0".to_string(),
            ["A/0".to_string()].into_iter().collect::<BTreeSet<_>>(),
        );
        placement
    }

    #[tokio::test]
    async fn failed_fan_out_collapses_to_unknown_grpc_error() {
        let registry = dead_node_registry();
        let err = configure_nodes(
            &registry,
            &single_node_placement(),
            &DistributedSystemDescription::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Unknown GRPC error");
    }

    #[tokio::test]
    async fn run_traffic_restores_idle_flags_on_failure() {
        let registry = dead_node_registry();
        let result = run_traffic(&registry, &single_node_placement()).await;

        assert!(result.is_err());
        assert!(
            registry.all_idle(),
            "idle flag must be restored even when the RPC fails"
        );
    }

    #[tokio::test]
    async fn cancel_traffic_skips_idle_nodes() {
        let registry = dead_node_registry();
        // No node is busy, so no RPC is attempted and nothing blocks.
        cancel_traffic(&registry).await;
        assert!(registry.all_idle());
    }
}
