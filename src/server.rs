/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Sequencer server lifecycle.
//!
//! [`SequencerServer`] owns the listening socket and the serve task.
//! `shutdown()` and `wait()` mirror the classic Shutdown/Wait pair; dropping
//! the owner fires the shutdown signal and detaches a drain task that joins
//! the serve task, so the listener is always fully closed even when `wait()`
//! was never called.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::info;

use crate::config::TestSequencerOpts;
use crate::credentials::ServerCredentialsFactory;
use crate::proto::tutti_v1::test_sequencer_server::TestSequencerServer;
use crate::sequencer::TestSequencer;

pub struct SequencerServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    serve_task: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl SequencerServer {
    /// Bind `[::]:<port>` and start serving `sequencer`.
    ///
    /// Port 0 binds an ephemeral port; the chosen address is available via
    /// [`local_addr`](Self::local_addr).
    pub async fn start(
        opts: &TestSequencerOpts,
        sequencer: TestSequencer,
        creds: Arc<dyn ServerCredentialsFactory>,
    ) -> anyhow::Result<Self> {
        let service_address = format!("[::]:{}", opts.port);
        let listener = TcpListener::bind(&service_address)
            .await
            .with_context(|| format!("cannot bind {service_address}"))?;
        let local_addr = listener
            .local_addr()
            .context("listener has no local address")?;

        let mut builder = Server::builder();
        if let Some(tls) = creds.server_tls() {
            builder = builder
                .tls_config(tls)
                .context("invalid server TLS configuration")?;
        }
        let router = builder.add_service(TestSequencerServer::new(sequencer));

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let incoming = TcpListenerStream::new(listener);
        let serve_task = tokio::spawn(async move {
            router
                .serve_with_incoming_shutdown(incoming, signal.cancelled_owned())
                .await
        });

        info!(address = %local_addr, "server listening");
        Ok(Self {
            local_addr,
            shutdown,
            serve_task: Some(serve_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to stop accepting and drain. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Wait until the serve task has fully stopped.
    pub async fn wait(&mut self) -> anyhow::Result<()> {
        if let Some(task) = self.serve_task.take() {
            task.await.context("serve task panicked")??;
        }
        Ok(())
    }
}

impl Drop for SequencerServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // Drop cannot await, so the drain half of the shutdown/wait pair is
        // handed to a detached task that joins the serve task after the
        // signal fires. Without a runtime there is nothing left to drain.
        if let Some(task) = self.serve_task.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = task.await;
                });
            }
        }
    }
}
