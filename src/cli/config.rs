//! Conversion of CLI arguments into orchestrator components

use crate::cli::main_impl::Cli;
use crate::{
    backends::{CommandEngine, ScriptedEngine},
    config::{SegmentConfig, SegmentOptions},
    engine::RemovalEngine,
};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Builds the engine, configuration and per-call options for a CLI run
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Select the removal engine
    pub(crate) fn engine(cli: &Cli) -> Result<Arc<dyn RemovalEngine>> {
        if cli.simulate {
            return Ok(Arc::new(ScriptedEngine::simulated()));
        }
        let Some(program) = cli.engine_cmd.as_deref() else {
            anyhow::bail!("No engine configured. Use --engine-cmd PROGRAM or --simulate");
        };
        if program.trim().is_empty() {
            anyhow::bail!("--engine-cmd must not be empty");
        }
        Ok(Arc::new(
            CommandEngine::new(program).args(cli.engine_args.iter().cloned()),
        ))
    }

    /// Load the orchestration configuration
    pub(crate) fn segment_config(cli: &Cli) -> Result<SegmentConfig> {
        match &cli.config {
            Some(path) => SegmentConfig::load(Some(path.as_path()))
                .with_context(|| format!("Failed to load configuration from {}", path.display())),
            None => SegmentConfig::load(None).context("Failed to load default configuration"),
        }
    }

    pub(crate) fn options(cli: &Cli) -> SegmentOptions {
        match &cli.public_path {
            Some(public_path) => SegmentOptions::default().with_public_path(public_path.clone()),
            None => SegmentOptions::default(),
        }
    }
}
