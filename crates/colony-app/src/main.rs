use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colony_app::{RunOptions, build_simulation, load_config, run};
use colony_storage::{DEFAULT_META_FILE, MetaStore};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "colony-app",
    version,
    about = "Run the team colony simulation headless"
)]
struct Cli {
    /// JSON configuration file; defaults are used when absent or unusable.
    #[arg(long, env = "COLONY_CONFIG")]
    config: Option<PathBuf>,

    /// File holding the learned role weights across runs.
    #[arg(long, env = "COLONY_META", default_value = DEFAULT_META_FILE)]
    meta: PathBuf,

    /// Override the RNG seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of rounds to play; 0 keeps going until --max-ticks.
    #[arg(long, default_value_t = 1)]
    rounds: u64,

    /// Total tick budget across all rounds.
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Override the per-round tick limit.
    #[arg(long)]
    round_max_ticks: Option<u64>,

    /// Dump the final world snapshot as JSON.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref());
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    if let Some(cap) = cli.round_max_ticks {
        config.round_max_ticks = cap;
    }

    let store = MetaStore::new(&cli.meta);
    let mut sim = build_simulation(config, &store)?;
    info!(
        round = sim.meta().rounds,
        teams = sim.world().config().team_count,
        meta = %store.path().display(),
        "starting colony simulation"
    );

    let options = RunOptions {
        rounds: cli.rounds,
        max_ticks: cli.max_ticks,
        snapshot: cli.snapshot,
    };
    let summary = run(&mut sim, &options)?;
    for record in &summary.records {
        println!(
            "round {} ended at tick {}: {} ({})",
            record.round, record.tick.0, record.outcome, record.reason
        );
    }
    info!(
        ticks = summary.ticks,
        rounds = summary.records.len(),
        "run complete"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
