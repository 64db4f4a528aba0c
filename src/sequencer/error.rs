/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Structured error types for the test sequencer.
//!
//! One enum covers every failure the orchestration engine can produce. Each
//! variant carries its exact user-visible message and maps to a gRPC status
//! code:
//!
//! | Variant | gRPC status |
//! |---|---|
//! | `InvalidRegistration` | `InvalidArgument` |
//! | `StubCreation` | `Unknown` |
//! | `NoServices` | `InvalidArgument` |
//! | `ServiceNotPlaceable` / `NodeNotIdle` / `NoIdleNode` | `NotFound` |
//! | `UnregisteredNode` | `Internal` |
//! | `FanOut` / `MergeConflict` | `InvalidArgument` |
//! | `Preempted` | `Aborted` |
//!
//! Registration errors surface to the registering node with the code above.
//! Errors inside a running sequence are wrapped into `Aborted(<message>)` by
//! the controller, since `RunTestSequence` returns exactly one status per
//! call.

use thiserror::Error;
use tonic::{Code, Status};

#[derive(Debug, Error)]
pub enum SequencerError {
    /// Registration with an empty hostname or a non-positive control port.
    #[error("Invalid Registration")]
    InvalidRegistration,

    /// The transport target for a node manager could not be turned into a
    /// client channel. The offending target is carried for logging only.
    #[error("Could not create node stub.")]
    StubCreation { target: String },

    /// A test arrived with an empty `services` list.
    #[error("No services defined.")]
    NoServices,

    /// A bundle names a service instance the test does not define, or one an
    /// earlier bundle already placed.
    #[error("Service {service} was not found or already placed.")]
    ServiceNotPlaceable { service: String },

    /// A bundle names a node that is not registered, or one an earlier bundle
    /// already consumed.
    #[error("Node {node} was not found or not idle.")]
    NodeNotIdle { node: String },

    /// Automatic placement ran out of idle nodes.
    #[error("No idle node for placement of services: {services}")]
    NoIdleNode { services: String },

    /// A placement references an alias the registry does not know. Placements
    /// are planned from a registry snapshot and entries are never removed, so
    /// this indicates a logic error rather than bad input.
    #[error("node '{node}' is not registered")]
    UnregisteredNode { node: String },

    /// At least one node RPC in a fan-out failed. The underlying statuses are
    /// logged per node before the collapse.
    #[error("Unknown GRPC error")]
    FanOut,

    /// Two nodes reported different values for the same key while their
    /// replies were being merged.
    #[error("conflicting replies for key '{key}' during aggregation")]
    MergeConflict { key: String },

    /// A newer `RunTestSequence` call pre-empted this sequence.
    #[error("Cancelled by new test sequence.")]
    Preempted,
}

impl SequencerError {
    /// The gRPC status code this error maps to when surfaced directly.
    pub fn code(&self) -> Code {
        match self {
            SequencerError::InvalidRegistration
            | SequencerError::NoServices
            | SequencerError::FanOut
            | SequencerError::MergeConflict { .. } => Code::InvalidArgument,
            SequencerError::ServiceNotPlaceable { .. }
            | SequencerError::NodeNotIdle { .. }
            | SequencerError::NoIdleNode { .. } => Code::NotFound,
            SequencerError::StubCreation { .. } => Code::Unknown,
            SequencerError::UnregisteredNode { .. } => Code::Internal,
            SequencerError::Preempted => Code::Aborted,
        }
    }
}

impl From<SequencerError> for Status {
    fn from(err: SequencerError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}
