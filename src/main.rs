use std::path::PathBuf;
use std::thread;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use larmor_core::SimParams;
use larmor_core::config::load_namelists;
use larmor_sim::Communicator;
use larmor_sim::run::run_rank;

/// Relativistic electromagnetic particle-in-cell engine.
#[derive(Parser, Debug)]
#[command(name = "larmor", version, about)]
struct Cli {
    /// TOML namelists, merged in order
    #[arg(required = true)]
    namelists: Vec<PathBuf>,

    /// Initialize everything, then exit without running the time loop
    #[arg(long)]
    test_mode: bool,

    /// Number of simulated communicator ranks
    #[arg(long, default_value_t = 1)]
    ranks: usize,

    /// Output directory for diagnostics and checkpoints
    #[arg(long, default_value = "output")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if cli.ranks == 0 {
        bail!("--ranks must be at least 1");
    }

    let deck = load_namelists(&cli.namelists).context("reading namelists")?;
    let params = SimParams::resolve(&deck, cli.ranks).context("resolving configuration")?;
    info!(
        geometry = params.geometry.name(),
        patches = params.tot_patches,
        steps = params.n_time,
        species = params.species.len(),
        ranks = cli.ranks,
        "configuration resolved"
    );

    let comms = Communicator::world(cli.ranks);
    let results: Vec<anyhow::Result<usize>> = thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let params = params.clone();
                let out = cli.output.clone();
                scope.spawn(move || {
                    let rank = comm.rank();
                    run_rank(params, comm, out, cli.test_mode)
                        .with_context(|| format!("rank {rank} failed"))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("a rank panicked")),
            })
            .collect()
    });

    let mut last_step = 0;
    for result in results {
        last_step = result?;
    }
    info!(steps = last_step, "run complete");
    Ok(())
}
