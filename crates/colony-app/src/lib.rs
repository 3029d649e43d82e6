//! Bootstrap plumbing for the headless colony runner.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use colony_core::{
    ColonyConfig, RoundRecord, Simulation, TeamId, WorldState, building_census,
};
use colony_storage::MetaStore;
use tracing::{info, trace, warn};

/// Read a JSON config file, without any fallback.
pub fn try_load_config(path: &Path) -> Result<ColonyConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ColonyConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("config {} rejected", path.display()))?;
    Ok(config)
}

/// Config from `path` when given and usable, defaults otherwise.
#[must_use]
pub fn load_config(path: Option<&Path>) -> ColonyConfig {
    let Some(path) = path else {
        return ColonyConfig::default();
    };
    match try_load_config(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = format!("{err:#}"), "falling back to default configuration");
            ColonyConfig::default()
        }
    }
}

/// Build a simulation persisting to `store`, retrying with defaults if `config` is rejected.
pub fn build_simulation(config: ColonyConfig, store: &MetaStore) -> Result<Simulation> {
    let meta = store.load(config.team_count, &config.learner);
    match Simulation::with_persistence(config, meta, Box::new(store.clone())) {
        Ok(sim) => Ok(sim),
        Err(err) => {
            warn!(%err, "configuration rejected; using defaults");
            let config = ColonyConfig::default();
            let meta = store.load(config.team_count, &config.learner);
            Simulation::with_persistence(config, meta, Box::new(store.clone()))
                .context("default configuration rejected")
        }
    }
}

/// Limits and outputs of one runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many round ends; `0` runs until `max_ticks`.
    pub rounds: u64,
    /// Hard cap on simulated ticks across all rounds.
    pub max_ticks: Option<u64>,
    /// Where to dump the final world snapshot as JSON.
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub records: Vec<RoundRecord>,
}

/// Step `sim` until the requested rounds have ended or the tick cap is hit.
pub fn run(sim: &mut Simulation, options: &RunOptions) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    loop {
        if options.rounds > 0 && summary.records.len() as u64 >= options.rounds {
            break;
        }
        if options.max_ticks.is_some_and(|cap| summary.ticks >= cap) {
            break;
        }
        let report = sim.step();
        summary.ticks += 1;
        trace!(
            tick = report.events.tick.0,
            spawned = report.events.spawned,
            deaths = report.events.deaths,
            "tick"
        );
        if let Some(record) = report.round_end {
            log_round(sim.world(), &record);
            summary.records.push(record);
        }
    }

    if let Some(path) = options.snapshot.as_deref() {
        write_snapshot(sim.world(), path)?;
    }
    Ok(summary)
}

fn log_round(world: &WorldState, record: &RoundRecord) {
    for (team, (survivors, tally)) in record.survivors.iter().zip(&record.tallies).enumerate() {
        let census = building_census(world, TeamId(team as u8));
        info!(
            round = record.round,
            team,
            survivors = survivors.total(),
            builds = tally.builds_completed,
            lost = tally.buildings_lost,
            deaths = tally.deaths,
            towers = census[0].1,
            farms = census[1].1,
            storages = census[2].1,
            walls = census[3].1,
            "team summary"
        );
    }
}

/// Write the world's presentation snapshot as pretty JSON.
pub fn write_snapshot(world: &WorldState, path: &Path) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(&world.snapshot()).context("failed to encode snapshot")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    info!(path = %path.display(), tick = world.tick().0, "snapshot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch(name: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_micros();
        std::env::temp_dir().join(format!(
            "colony_app_{name}_{}_{stamp}",
            std::process::id()
        ))
    }

    #[test]
    fn missing_or_invalid_config_falls_back() {
        assert_eq!(load_config(None), ColonyConfig::default());
        assert_eq!(
            load_config(Some(Path::new("/no/such/colony.json"))),
            ColonyConfig::default()
        );

        let path = scratch("invalid.json");
        fs::write(&path, r#"{"world_width": -4.0}"#).expect("fixture");
        assert!(try_load_config(&path).is_err());
        assert_eq!(load_config(Some(&path)), ColonyConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let path = scratch("partial.json");
        fs::write(&path, r#"{"world_width": 200.0, "rng_seed": 9}"#).expect("fixture");
        let config = load_config(Some(&path));
        assert_eq!(config.world_width, 200.0);
        assert_eq!(config.rng_seed, Some(9));
        assert_eq!(config.world_height, ColonyConfig::default().world_height);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn run_stops_at_the_requested_round_count() {
        let dir = scratch("run");
        let store = MetaStore::new(dir.join("meta.json"));
        let config = ColonyConfig {
            rng_seed: Some(5),
            round_max_ticks: 20,
            ..ColonyConfig::default()
        };
        let mut sim = build_simulation(config, &store).expect("simulation");
        let options = RunOptions {
            rounds: 3,
            max_ticks: Some(10_000),
            snapshot: Some(dir.join("snapshot.json")),
        };
        let summary = run(&mut sim, &options).expect("run");
        assert_eq!(summary.records.len(), 3);
        assert!(summary.ticks <= 60);
        assert_eq!(store.try_load(2).expect("meta saved").rounds, 3);

        let snapshot: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("snapshot.json")).expect("read"))
                .expect("json");
        assert!(snapshot["units"].is_array());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn tick_cap_bounds_an_endless_run() {
        let dir = scratch("cap");
        let store = MetaStore::new(dir.join("meta.json"));
        let mut sim = build_simulation(ColonyConfig::default(), &store).expect("simulation");
        let options = RunOptions {
            max_ticks: Some(25),
            ..RunOptions::default()
        };
        let summary = run(&mut sim, &options).expect("run");
        assert_eq!(summary.ticks, 25);
        assert!(summary.records.is_empty());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejected_config_rebuilds_with_defaults() {
        let dir = scratch("reject");
        let store = MetaStore::new(dir.join("meta.json"));
        let config = ColonyConfig {
            team_count: 0,
            ..ColonyConfig::default()
        };
        let sim = build_simulation(config, &store).expect("fallback simulation");
        assert_eq!(sim.world().config(), &ColonyConfig::default());
        let _ = fs::remove_dir_all(&dir);
    }
}
