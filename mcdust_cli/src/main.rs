#![allow(missing_docs)]

use anyhow::{Context, Result};
use clap::{Parser, ValueHint};
use mcdust::config::RunConfig;
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a Monte Carlo dust radiative transfer simulation.
#[derive(Parser)]
#[command(version, about)]
struct Opts {
    /// Path to the YAML run configuration.
    #[arg(value_hint = ValueHint::FilePath)]
    config: PathBuf,
    /// Directory receiving the instrument and dust output files.
    #[arg(default_value = ".", long, short, value_hint = ValueHint::DirPath)]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let text = fs::read_to_string(&opts.config)
        .with_context(|| format!("failed to read {}", opts.config.display()))?;
    let config: RunConfig =
        serde_yaml::from_str(&text).context("failed to parse the run configuration")?;

    let simulation = config.build()?;
    info!(
        "Simulating a {}D model with {:e} photon packages",
        simulation.dimension(),
        simulation.npackages()
    );
    simulation.run_stellar_emission()?;

    fs::create_dir_all(&opts.output)
        .with_context(|| format!("failed to create {}", opts.output.display()))?;
    simulation.write(&opts.output)?;
    Ok(())
}
