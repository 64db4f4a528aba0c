/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Tutti sequencer server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use tutti_sequencer::config::{self, TestSequencerOpts};
use tutti_sequencer::credentials::InsecureCredentials;
use tutti_sequencer::sequencer::TestSequencer;
use tutti_sequencer::server::SequencerServer;

#[derive(Debug, Parser)]
#[command(
    name = "tutti-sequencer",
    about = "Central coordinator of the Tutti benchmarking harness"
)]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen port; overrides the configuration file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let mut opts = match &args.config {
        Some(path) => config::load_from_file(path)?,
        None => TestSequencerOpts::default(),
    };
    if let Some(port) = args.port {
        opts.port = port;
    }

    let creds = Arc::new(InsecureCredentials);
    let sequencer = TestSequencer::new(creds.clone());
    let mut server = SequencerServer::start(&opts, sequencer, creds).await?;

    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down");
    server.shutdown();
    server.wait().await
}
