/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Service-instance placement planner.
//!
//! A pure function from one test description plus a registry snapshot to a
//! per-node assignment. Every container involved is ordered (`BTreeMap` /
//! `BTreeSet`), so identical inputs always produce identical placements.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::proto::tutti_v1::DistributedSystemDescription;
use crate::sequencer::error::SequencerError;

/// node alias → service instances it must run.
///
/// Nodes mapped to an empty set still participate in Configure and
/// IntroducePeers so they learn the service map, but perform no work.
pub type Placement = BTreeMap<String, BTreeSet<String>>;

/// Expand the `services` list into instance names `"<server_type>/<index>"`.
fn service_instances(test: &DistributedSystemDescription) -> BTreeSet<String> {
    let mut instances = BTreeSet::new();
    for spec in &test.services {
        for index in 0..spec.count.max(0) {
            instances.insert(format!("{}/{}", spec.server_type, index));
        }
    }
    instances
}

/// Map every service instance of `test` onto an idle node.
///
/// Manual `node_service_bundles` are honored first and override automatic
/// placement; whatever remains is paired off instance-by-instance with the
/// remaining idle nodes, both in lexicographic order.
pub fn plan(
    test: &DistributedSystemDescription,
    idle: BTreeSet<String>,
) -> Result<Placement, SequencerError> {
    if test.services.is_empty() {
        return Err(SequencerError::NoServices);
    }

    let mut unplaced = service_instances(test);
    let mut idle = idle;
    let mut placement = Placement::new();

    // Manual bundles first. Each bundle consumes its node whether or not the
    // bundle lists any services.
    for (alias, bundle) in &test.node_service_bundles {
        for service in &bundle.services {
            if !unplaced.remove(service) {
                return Err(SequencerError::ServiceNotPlaceable {
                    service: service.clone(),
                });
            }
            placement
                .entry(alias.clone())
                .or_default()
                .insert(service.clone());
        }
        if !idle.remove(alias) {
            return Err(SequencerError::NodeNotIdle {
                node: alias.clone(),
            });
        }
    }

    if unplaced.is_empty() {
        info!("all services placed manually");
    } else {
        info!(
            remaining = unplaced.len(),
            "services left to place after manual bundles"
        );
    }

    // Automatic placement: one instance per idle node, both sides in order.
    while let Some(service) = unplaced.pop_first() {
        match idle.pop_first() {
            Some(alias) => {
                debug!(service = %service, node = %alias, "placed service");
                placement.entry(alias).or_default().insert(service);
            }
            None => {
                // Put it back so the error names every unplaced instance.
                unplaced.insert(service);
                break;
            }
        }
    }

    if !unplaced.is_empty() {
        let services = unplaced.into_iter().collect::<Vec<_>>().join(", ");
        return Err(SequencerError::NoIdleNode { services });
    }

    // Leftover idle nodes get empty entries so they still see the test.
    for alias in idle {
        placement.entry(alias).or_default();
    }

    Ok(placement)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
