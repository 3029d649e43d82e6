//! Round-end detection, outcome bookkeeping and world restarts.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

use crate::config::ColonyConfig;
use crate::learner::{MetaState, RoleWeights};
use crate::world::{TeamTally, TickEvents, WorldState, WorldStateError};
use crate::{BuildingKind, RoleCounts, TeamId, Tick};

/// Why a round ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    OneTeamLeft,
    AllTeamsEmpty,
    TimeLimit,
}

impl fmt::Display for RoundEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoundEndReason::OneTeamLeft => "one_team_left",
            RoundEndReason::AllTeamsEmpty => "all_teams_empty",
            RoundEndReason::TimeLimit => "time_limit",
        })
    }
}

/// Terminal result of a round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    Winner(TeamId),
    Draw,
}

impl RoundOutcome {
    #[must_use]
    pub const fn winner(self) -> Option<TeamId> {
        match self {
            RoundOutcome::Winner(team) => Some(team),
            RoundOutcome::Draw => None,
        }
    }
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundOutcome::Winner(team) => write!(f, "{team}"),
            RoundOutcome::Draw => f.write_str("draw"),
        }
    }
}

/// Lifecycle position of the current round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoundPhase {
    Running,
    /// The final board is still readable; the next step restarts.
    Ended(RoundEndReason),
    Restarting,
}

/// Everything known about a finished round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundRecord {
    pub round: u64,
    pub tick: Tick,
    pub reason: RoundEndReason,
    pub outcome: RoundOutcome,
    /// Non-reproducer survivors per team, by role.
    pub survivors: Vec<RoleCounts>,
    pub tallies: Vec<TeamTally>,
    /// Role weights after the learner ran.
    pub weights: Vec<RoleWeights>,
}

/// Sink invoked after every round end.
pub trait RoundPersistence: Send {
    fn on_round_end(&mut self, record: &RoundRecord, meta: &MetaState);
}

/// No-op persistence sink.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl RoundPersistence for NullPersistence {
    fn on_round_end(&mut self, _record: &RoundRecord, _meta: &MetaState) {}
}

/// Result of one [`Simulation::step`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub events: TickEvents,
    pub phase: RoundPhase,
    /// Present on the tick a round ended.
    pub round_end: Option<RoundRecord>,
}

/// Decide whether the board is terminal.
#[must_use]
pub fn evaluate(world: &WorldState) -> Option<(RoundEndReason, RoundOutcome)> {
    let survivors = world.survivor_counts();
    let alive: Vec<usize> = survivors
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(team, _)| team)
        .collect();
    let tick = world.tick().0;
    let config = world.config();

    if let [only] = alive.as_slice() {
        return Some((
            RoundEndReason::OneTeamLeft,
            RoundOutcome::Winner(TeamId(*only as u8)),
        ));
    }
    if alive.is_empty() && tick > config.draw_grace_ticks {
        return Some((RoundEndReason::AllTeamsEmpty, RoundOutcome::Draw));
    }
    if tick >= config.round_max_ticks {
        return Some((RoundEndReason::TimeLimit, time_limit_outcome(world, &survivors)));
    }
    None
}

/// Strictly most survivors wins; ties fall to non-home building count, else draw.
fn time_limit_outcome(world: &WorldState, survivors: &[u32]) -> RoundOutcome {
    let Some(&best) = survivors.iter().max() else {
        return RoundOutcome::Draw;
    };
    let leaders: Vec<usize> = (0..survivors.len())
        .filter(|&team| survivors[team] == best)
        .collect();
    if let [only] = leaders.as_slice() {
        return RoundOutcome::Winner(TeamId(*only as u8));
    }
    let structures: Vec<(usize, usize)> = leaders
        .iter()
        .map(|&team| (team, world.non_home_building_count(TeamId(team as u8))))
        .collect();
    let most = structures.iter().map(|&(_, count)| count).max().unwrap_or(0);
    let mut top = structures.iter().filter(|&&(_, count)| count == most);
    match (top.next(), top.next()) {
        (Some(&(team, _)), None) => RoundOutcome::Winner(TeamId(team as u8)),
        _ => RoundOutcome::Draw,
    }
}

/// Drives rounds end to end: ticks the world, detects round ends, runs the
/// learner and restarts.
pub struct Simulation {
    world: WorldState,
    meta: MetaState,
    persistence: Box<dyn RoundPersistence>,
    history: VecDeque<RoundRecord>,
    phase: RoundPhase,
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("world", &self.world)
            .field("meta", &self.meta)
            .field("phase", &self.phase)
            .field("history_len", &self.history.len())
            .finish()
    }
}

impl Simulation {
    /// Start a simulation with default meta state and no persistence.
    pub fn new(config: ColonyConfig) -> Result<Self, WorldStateError> {
        let meta = MetaState::default_for(config.team_count, &config.learner);
        Self::with_persistence(config, meta, Box::new(NullPersistence))
    }

    /// Start a simulation from loaded meta state and a persistence sink.
    ///
    /// Meta state that does not fit the configured team count is replaced by defaults.
    pub fn with_persistence(
        config: ColonyConfig,
        meta: MetaState,
        persistence: Box<dyn RoundPersistence>,
    ) -> Result<Self, WorldStateError> {
        let meta = meta.sanitized(config.team_count, &config.learner);
        let history_capacity = config.history_capacity;
        let mut world = WorldState::new(config)?;
        world.set_role_weights(meta.role_weights.clone());
        world.reset_round(meta.rounds);
        Ok(Self {
            world,
            meta,
            persistence,
            history: VecDeque::with_capacity(history_capacity),
            phase: RoundPhase::Running,
        })
    }

    /// Advance one tick, restarting first if the previous step ended a round.
    ///
    /// The report's phase is [`RoundPhase::Restarting`] on the first tick of a
    /// new round and [`RoundPhase::Ended`] on the tick a round finished.
    pub fn step(&mut self) -> StepReport {
        let restarted = matches!(self.phase, RoundPhase::Ended(_));
        if restarted {
            self.restart();
        }
        let events = self.world.step();
        let mut round_end = None;
        let mut phase = if restarted {
            RoundPhase::Restarting
        } else {
            RoundPhase::Running
        };
        if let Some((reason, outcome)) = evaluate(&self.world) {
            round_end = Some(self.finish_round(reason, outcome));
            self.phase = RoundPhase::Ended(reason);
            phase = self.phase;
        }
        StepReport {
            events,
            phase,
            round_end,
        }
    }

    fn finish_round(&mut self, reason: RoundEndReason, outcome: RoundOutcome) -> RoundRecord {
        let survivors = self.world.survivors_by_role();
        let learner = self.world.config().learner.clone();
        self.meta
            .record_round(outcome.winner(), &survivors, &learner, self.world.rng());

        let record = RoundRecord {
            round: self.world.round(),
            tick: self.world.tick(),
            reason,
            outcome,
            survivors,
            tallies: self.world.tallies().to_vec(),
            weights: self.meta.role_weights.clone(),
        };
        info!(
            round = record.round,
            %reason,
            %outcome,
            tick = record.tick.0,
            survivors = ?self.world.survivor_counts(),
            "round ended"
        );

        self.persistence.on_round_end(&record, &self.meta);
        if self.history.len() >= self.world.config().history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        record
    }

    /// Discard the finished board and populate the next round.
    fn restart(&mut self) {
        self.world.set_role_weights(self.meta.role_weights.clone());
        self.world.reset_round(self.meta.rounds);
        debug!(round = self.meta.rounds, "round restarted");
        self.phase = RoundPhase::Running;
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> RoundPhase {
        self.phase
    }

    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Mutable world access for scripted scenarios.
    pub fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    #[must_use]
    pub fn meta(&self) -> &MetaState {
        &self.meta
    }

    /// Iterate over retained round records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &RoundRecord> {
        self.history.iter()
    }
}

/// Non-home buildings per kind and team, used by round summaries.
#[must_use]
pub fn building_census(world: &WorldState, team: TeamId) -> [(BuildingKind, usize); 4] {
    [
        BuildingKind::Tower,
        BuildingKind::Farm,
        BuildingKind::Storage,
        BuildingKind::Wall,
    ]
    .map(|kind| (kind, world.building_count(team, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartingRoster;
    use crate::Position;
    use std::sync::{Arc, Mutex};

    fn quiet(config: ColonyConfig) -> ColonyConfig {
        ColonyConfig {
            rng_seed: Some(3),
            max_food: 0,
            max_resources: 0,
            food_spawn_chance_per_second: 0.0,
            resource_spawn_chance_per_second: 0.0,
            ..config
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<(RoundRecord, MetaState)>>>);

    impl RoundPersistence for Recorder {
        fn on_round_end(&mut self, record: &RoundRecord, meta: &MetaState) {
            if let Ok(mut calls) = self.0.lock() {
                calls.push((record.clone(), meta.clone()));
            }
        }
    }

    #[test]
    fn lone_survivor_team_wins_immediately() {
        let config = quiet(ColonyConfig {
            starting_roster: StartingRoster {
                defender: 1,
                ..StartingRoster::empty()
            },
            ..ColonyConfig::default()
        });
        let recorder = Recorder::default();
        let team_count = config.team_count;
        let mut sim = Simulation::with_persistence(
            config.clone(),
            MetaState::default_for(team_count, &config.learner),
            Box::new(recorder.clone()),
        )
        .expect("simulation");
        let second = sim
            .world()
            .units()
            .iter()
            .find(|(_, unit)| unit.team == TeamId(1))
            .map(|(id, _)| id)
            .expect("team 1 defender");
        sim.world_mut().unit_mut(second).expect("unit").health = 0.0;

        let report = sim.step();
        let record = report.round_end.expect("round ended");
        assert_eq!(report.phase, RoundPhase::Ended(RoundEndReason::OneTeamLeft));
        assert_eq!(record.outcome, RoundOutcome::Winner(TeamId(0)));
        assert_eq!(record.round, 0);
        assert_eq!(sim.meta().rounds, 1);
        for weights in &sim.meta().role_weights {
            assert!((weights.iter().sum::<f64>() - 10.0).abs() < 1e-9);
            assert!(weights.iter().all(|w| *w >= 0.0));
        }
        let calls = recorder.0.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.rounds, 1);
        drop(calls);

        // The final board stays readable until the next step.
        assert_eq!(sim.world().survivor_counts(), vec![1, 0]);
        assert_eq!(sim.step().phase, RoundPhase::Restarting);
        assert_eq!(sim.world().round(), 1);
        assert_eq!(sim.phase(), RoundPhase::Running);
        assert_eq!(sim.world().tick(), Tick(1));
    }

    #[test]
    fn empty_board_draws_only_after_grace() {
        let config = quiet(ColonyConfig {
            starting_roster: StartingRoster::empty(),
            reproduce_food_cost: 1_000.0,
            ..ColonyConfig::default()
        });
        let grace = config.draw_grace_ticks;
        let mut sim = Simulation::new(config).expect("simulation");
        for _ in 0..grace {
            assert!(sim.step().round_end.is_none());
        }
        let report = sim.step();
        let record = report.round_end.expect("draw");
        assert_eq!(record.reason, RoundEndReason::AllTeamsEmpty);
        assert_eq!(record.outcome, RoundOutcome::Draw);
        assert_eq!(record.tick, Tick(grace + 1));
    }

    #[test]
    fn time_limit_ties_break_on_building_count() {
        let config = quiet(ColonyConfig {
            starting_roster: StartingRoster {
                reproducer: 1,
                builder: 1,
                ..StartingRoster::empty()
            },
            round_max_ticks: 1,
            reproduction_interval_ticks: 1_000,
            ..ColonyConfig::default()
        });
        let mut sim = Simulation::new(config).expect("simulation");
        sim.world_mut()
            .place_building(TeamId(1), BuildingKind::Wall, Position::new(100.0, 20.0))
            .expect("wall");
        let report = sim.step();
        let record = report.round_end.expect("time limit");
        assert_eq!(record.reason, RoundEndReason::TimeLimit);
        assert_eq!(record.outcome, RoundOutcome::Winner(TeamId(1)));
    }

    #[test]
    fn time_limit_with_equal_boards_is_a_draw() {
        let config = quiet(ColonyConfig {
            starting_roster: StartingRoster {
                builder: 1,
                ..StartingRoster::empty()
            },
            round_max_ticks: 1,
            ..ColonyConfig::default()
        });
        let mut sim = Simulation::new(config).expect("simulation");
        let record = sim.step().round_end.expect("time limit");
        assert_eq!(record.outcome, RoundOutcome::Draw);
    }

    #[test]
    fn every_team_keeps_a_reproducer_across_round_ends() {
        let config = quiet(ColonyConfig {
            round_max_ticks: 20,
            history_capacity: 2,
            ..ColonyConfig::default()
        });
        let mut sim = Simulation::new(config).expect("simulation");
        let mut ended = 0;
        while ended < 3 {
            if sim.step().round_end.is_some() {
                ended += 1;
                sim.step();
                for team in 0..2 {
                    assert!(sim.world().has_reproducer_or_queued(TeamId(team)));
                }
            }
        }
        assert_eq!(sim.history().count(), 2);
        assert_eq!(sim.meta().rounds, 3);
    }

    #[test]
    fn census_counts_each_kind() {
        let mut world = WorldState::new(quiet(ColonyConfig {
            starting_roster: StartingRoster::empty(),
            ..ColonyConfig::default()
        }))
        .expect("world");
        world.place_building(TeamId(0), BuildingKind::Farm, Position::new(30.0, 30.0));
        world.place_building(TeamId(0), BuildingKind::Farm, Position::new(35.0, 30.0));
        let census = building_census(&world, TeamId(0));
        assert_eq!(census[1], (BuildingKind::Farm, 2));
        assert_eq!(census[0], (BuildingKind::Tower, 0));
        assert_eq!(building_census(&world, TeamId(1))[1], (BuildingKind::Farm, 0));
    }
}
