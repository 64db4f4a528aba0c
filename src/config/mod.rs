//! Sequencer configuration loading.
//!
//! The expected YAML structure is:
//! ```yaml
//! sequencer:
//!   port: 10000
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Port the sequencer listens on when none is configured.
pub const DEFAULT_PORT: u16 = 10000;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
///
/// This is kept private – callers work with [`TestSequencerOpts`] instead.
#[derive(Debug, Default, Deserialize)]
struct OptsFile {
    #[serde(default)]
    sequencer: OptsEntry,
}

#[derive(Debug, Default, Deserialize)]
struct OptsEntry {
    port: Option<u16>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Runtime options for the sequencer server.
#[derive(Debug, Clone)]
pub struct TestSequencerOpts {
    /// Listen port; the server binds `[::]:<port>`.
    pub port: u16,
}

impl Default for TestSequencerOpts {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Parse `path` into a [`TestSequencerOpts`].
///
/// Missing fields fall back to their defaults; a missing or structurally
/// invalid file is an error.
pub fn load_from_file(path: &Path) -> Result<TestSequencerOpts> {
    info!("Loading sequencer configuration from: {}", path.display());

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

    let file: OptsFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

    let port = match file.sequencer.port {
        Some(port) => port,
        None => {
            warn!("No port in configuration file, using default {DEFAULT_PORT}");
            DEFAULT_PORT
        }
    };

    let opts = TestSequencerOpts { port };
    info!(port = opts.port, "Successfully loaded sequencer configuration");
    Ok(opts)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
