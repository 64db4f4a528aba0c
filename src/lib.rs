/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Tutti sequencer – central coordinator of the Tutti benchmarking harness.
//!
//! Node manager daemons register themselves; benchmark clients submit test
//! sequences. For each test the sequencer places service instances onto
//! registered nodes and drives every node through the four-phase protocol
//! (configure → introduce peers → run traffic → collect logs).
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── proto/          – generated gRPC/protobuf types & stubs
//! ├── config/         – YAML sequencer configuration
//! ├── credentials     – abstract server/channel credential factories
//! ├── registry        – node membership, stubs, idle flags
//! ├── placement       – service-instance → node planner
//! ├── fanout          – four-phase parallel RPC driver
//! ├── sequencer/      – RPC service: registration + sequence controller
//! └── server          – listener lifecycle (bind, serve, shutdown)
//! ```

pub mod config;
pub mod credentials;
pub mod fanout;
pub mod placement;
pub mod proto;
pub mod registry;
pub mod sequencer;
pub mod server;
