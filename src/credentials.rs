/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Credential factories for the sequencer's transport endpoints.
//!
//! Both factories are injected at construction time so the core never decides
//! security policy itself. Tests and single-host runs bind
//! [`InsecureCredentials`]; a production deployment supplies factories backed
//! by real TLS material.

use tonic::transport::{ClientTlsConfig, ServerTlsConfig};

/// Supplies TLS configuration for the sequencer's own listening socket.
pub trait ServerCredentialsFactory: Send + Sync {
    /// `None` means serve plaintext.
    fn server_tls(&self) -> Option<ServerTlsConfig>;
}

/// Supplies TLS configuration for outbound channels to node managers.
pub trait ChannelCredentialsFactory: Send + Sync {
    /// `None` means dial plaintext (`http://`); `Some` dials `https://`.
    fn channel_tls(&self) -> Option<ClientTlsConfig>;
}

/// Plaintext credentials for tests and trusted single-host deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureCredentials;

impl ServerCredentialsFactory for InsecureCredentials {
    fn server_tls(&self) -> Option<ServerTlsConfig> {
        None
    }
}

impl ChannelCredentialsFactory for InsecureCredentials {
    fn channel_tls(&self) -> Option<ClientTlsConfig> {
        None
    }
}
