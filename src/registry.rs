/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node membership registry.
//!
//! The registry owns every [`Node`] for the lifetime of the process. Fan-out
//! workers never borrow into it across an await: [`NodeManagerStub`] wraps a
//! tonic `Channel`, which is a cheap clone, so stubs are snapshotted out
//! under the read lock and the lock is released before any RPC is awaited.
//!
//! Aliases are `"node<k>"` with a strictly increasing ordinal that is never
//! reused. A repeated registration (identical request bytes) resolves to the
//! ordinal it was first assigned; the newest stub replaces the prior one.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use prost::Message;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::proto::tutti_v1::node_manager_client::NodeManagerClient;
use crate::proto::tutti_v1::NodeRegistration;
use crate::sequencer::error::SequencerError;

/// Client handle to one node manager's control surface.
pub type NodeManagerStub = NodeManagerClient<Channel>;

/// One registered node manager.
#[derive(Debug, Clone)]
pub struct Node {
    /// Original registration payload.
    pub registration: NodeRegistration,
    /// `"node<k>"` where k is the assignment ordinal.
    pub alias: String,
    /// Control-plane stub; replaced in place on re-registration.
    pub stub: NodeManagerStub,
    /// True iff no RunTraffic is in flight to this node.
    pub idle: bool,
}

#[derive(Default)]
struct RegistryInner {
    /// alias → node, iterated in alias order.
    nodes: BTreeMap<String, Node>,
    /// Canonical registration encoding → assigned ordinal.
    ordinals: HashMap<Vec<u8>, i32>,
}

/// Membership bookkeeping for every node manager that has registered.
#[derive(Default)]
pub struct NodeRegistry {
    inner: RwLock<RegistryInner>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a registration, or resolve it to its existing ordinal when the
    /// same request bytes were seen before. The idle flag of an existing
    /// entry is preserved across re-registration.
    pub fn register(
        &self,
        registration: NodeRegistration,
        stub: NodeManagerStub,
    ) -> (i32, String) {
        let fingerprint = registration.encode_to_vec();
        let mut inner = self.inner.write().expect("registry lock poisoned");

        let node_id = match inner.ordinals.get(&fingerprint).copied() {
            Some(id) => {
                info!(node_id = id, "got repeated registration for node{id}");
                id
            }
            None => {
                let id = inner.nodes.len() as i32;
                inner.ordinals.insert(fingerprint, id);
                id
            }
        };

        let alias = format!("node{node_id}");
        match inner.nodes.get_mut(&alias) {
            Some(node) => {
                node.registration = registration;
                node.stub = stub;
            }
            None => {
                inner.nodes.insert(
                    alias.clone(),
                    Node {
                        registration,
                        alias: alias.clone(),
                        stub,
                        idle: true,
                    },
                );
            }
        }

        (node_id, alias)
    }

    /// Snapshot of all registered aliases, in alias order.
    pub fn aliases(&self) -> BTreeSet<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.nodes.keys().cloned().collect()
    }

    /// Clone of the node record for `alias`, if registered.
    pub fn lookup(&self, alias: &str) -> Option<Node> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.nodes.get(alias).cloned()
    }

    /// Clone out the stubs for `aliases` under a single read lock.
    pub fn stubs_for<'a, I>(
        &self,
        aliases: I,
    ) -> Result<Vec<(String, NodeManagerStub)>, SequencerError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let inner = self.inner.read().expect("registry lock poisoned");
        aliases
            .into_iter()
            .map(|alias| {
                inner
                    .nodes
                    .get(alias)
                    .map(|node| (alias.clone(), node.stub.clone()))
                    .ok_or_else(|| SequencerError::UnregisteredNode {
                        node: alias.clone(),
                    })
            })
            .collect()
    }

    /// Stubs of every node currently marked busy.
    pub fn busy_stubs(&self) -> Vec<(String, NodeManagerStub)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .nodes
            .values()
            .filter(|node| !node.idle)
            .map(|node| (node.alias.clone(), node.stub.clone()))
            .collect()
    }

    /// Flip every alias in `aliases` to busy under one write lock.
    pub fn mark_busy<'a, I>(&self, aliases: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        for alias in aliases {
            if let Some(node) = inner.nodes.get_mut(alias) {
                node.idle = false;
            }
        }
    }

    pub fn set_idle(&self, alias: &str, idle: bool) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if let Some(node) = inner.nodes.get_mut(alias) {
            node.idle = idle;
            debug!(node = %alias, idle, "idle flag updated");
        }
    }

    /// True when no node has a RunTraffic in flight.
    pub fn all_idle(&self) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.nodes.values().all(|node| node.idle)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
