use std::io::{IsTerminal, Write};

use anyhow::{Context, Result};
use clap::Parser;
use metanorms_app::{Cli, TracingObserver, render};
use metanorms_core::{Harness, NullObserver};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.to_config();
    let mut harness = Harness::new(config.clone()).context("rejected configuration")?;

    info!(
        agents = config.num_agents,
        generations = config.num_generations,
        simulations = config.num_simulations,
        seed = ?config.rng_seed,
        "Starting meta-norms harness"
    );
    let runs = if cli.trace_generations {
        harness.run_with_observer(&mut TracingObserver)
    } else {
        harness.run_with_observer(&mut NullObserver)
    };
    info!(runs = runs.len(), "Harness finished");

    let stdout = std::io::stdout();
    let color = !cli.no_color && stdout.is_terminal();
    let report = render(cli.format, &config, &runs, color).context("failed to render report")?;
    let mut handle = stdout.lock();
    handle
        .write_all(report.as_bytes())
        .context("failed to write report")?;
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
