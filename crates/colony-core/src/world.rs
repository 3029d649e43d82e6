//! Round-scoped world state and the fixed-order tick pipeline.

use colony_index::UniformGridIndex;
use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
    rngs::SmallRng,
};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::{collections::HashSet, fmt};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::ColonyConfig;
use crate::entity::{Building, FoodItem, ResourceItem, RespawnEntry, Unit, UnitArena};
use crate::learner::RoleWeights;
use crate::{
    BuildingId, BuildingKind, FoodId, Position, ResourceId, ResourceKind, ResourceStock, Role,
    RoleCounts, TeamId, Tick, UnitId,
};

/// Errors that can occur when constructing world state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Per-team counters accumulated over one round.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamTally {
    pub spawned: u32,
    pub deaths: u32,
    pub builds_completed: u32,
    pub buildings_lost: u32,
    pub food_deposited: u32,
    pub resources_deposited: u32,
    pub salvage_taken: u32,
}

/// Events emitted after processing a world tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    pub spawned: usize,
    pub deaths: usize,
    pub food_respawned: bool,
    pub resource_respawned: bool,
}

/// Read-only unit entry of a [`WorldSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitView {
    pub position: Position,
    pub team: TeamId,
    pub role: Role,
    pub heading: f32,
    pub energy: f32,
    pub health: f32,
    pub carried_food: u32,
    pub carried: ResourceStock,
}

/// Read-only building entry of a [`WorldSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildingView {
    pub position: Position,
    pub team: TeamId,
    pub kind: BuildingKind,
    pub hit_points: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceStock>,
    pub queued_respawns: usize,
}

/// Everything a presentation layer needs to draw one frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldSnapshot {
    pub tick: Tick,
    pub round: u64,
    pub units: Vec<UnitView>,
    pub buildings: Vec<BuildingView>,
    pub foods: Vec<FoodItem>,
    pub resources: Vec<ResourceItem>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SpawnOrder {
    pub(crate) team: TeamId,
    pub(crate) role: Role,
}

/// Uniform integer offset in `-amount..=amount`.
pub(crate) fn int_jitter(rng: &mut SmallRng, amount: i32) -> f32 {
    if amount <= 0 {
        0.0
    } else {
        rng.random_range(-amount..=amount) as f32
    }
}

/// Weighted role draw; degenerate weights fall back to a uniform choice.
pub(crate) fn choose_role(weights: &RoleWeights, rng: &mut SmallRng) -> Role {
    let weighted = weights
        .iter()
        .all(|weight| weight.is_finite())
        .then(|| WeightedIndex::<f64>::new(weights.iter().copied()).ok())
        .flatten();
    match weighted {
        Some(dist) => Role::LEARNED[dist.sample(rng)],
        None => Role::LEARNED[rng.random_range(0..Role::LEARNED.len())],
    }
}

/// Aggregate world state for one round.
pub struct WorldState {
    pub(crate) config: ColonyConfig,
    pub(crate) tick: Tick,
    pub(crate) round: u64,
    pub(crate) rng: SmallRng,
    pub(crate) units: UnitArena,
    pub(crate) buildings: SlotMap<BuildingId, Building>,
    pub(crate) homes: Vec<BuildingId>,
    pub(crate) foods: SlotMap<FoodId, FoodItem>,
    pub(crate) resources: SlotMap<ResourceId, ResourceItem>,
    pub(crate) role_weights: Vec<RoleWeights>,
    pub(crate) tallies: Vec<TeamTally>,
    pub(crate) index: UniformGridIndex,
    pub(crate) pending_deaths: Vec<UnitId>,
    pub(crate) pending_spawns: Vec<SpawnOrder>,
    last_spawned: usize,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("tick", &self.tick)
            .field("round", &self.round)
            .field("unit_count", &self.units.len())
            .field("building_count", &self.buildings.len())
            .field("food_count", &self.foods.len())
            .field("resource_count", &self.resources.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a new world and populate round zero.
    pub fn new(config: ColonyConfig) -> Result<Self, WorldStateError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = UniformGridIndex::new(
            config.home_reach().max(config.collect_radius).max(1.0),
            config.world_width,
            config.world_height,
        );
        let role_weights = vec![config.learner.default_weights; config.team_count];
        let mut world = Self {
            config,
            tick: Tick::zero(),
            round: 0,
            rng,
            units: UnitArena::new(),
            buildings: SlotMap::with_key(),
            homes: Vec::new(),
            foods: SlotMap::with_key(),
            resources: SlotMap::with_key(),
            role_weights,
            tallies: Vec::new(),
            index,
            pending_deaths: Vec::new(),
            pending_spawns: Vec::new(),
            last_spawned: 0,
        };
        world.reset_round(0);
        Ok(world)
    }

    /// Discard every round-scoped collection and rebuild a fresh board.
    ///
    /// The RNG is kept, so seeded runs stay deterministic across rounds.
    pub fn reset_round(&mut self, round: u64) {
        self.clear_round_state();
        self.round = round;

        let team_count = self.config.team_count;
        let margin = self.config.resolved_home_margin();
        let width = self.config.world_width;
        let y = (self.config.world_height / 2.0).floor();
        for team in 0..team_count {
            let x = margin + (width - 2.0 * margin) * team as f32 / (team_count - 1) as f32;
            let home = Building::new(
                Position::new(x, y),
                TeamId(team as u8),
                BuildingKind::Home,
                &self.config,
            );
            let id = self.buildings.insert(home);
            self.homes.push(id);
        }

        let roster = self.config.starting_roster.entries();
        for team in 0..team_count {
            for &(role, count) in &roster {
                for _ in 0..count {
                    self.spawn_unit(TeamId(team as u8), role);
                }
            }
        }

        for _ in 0..self.config.max_food {
            self.scatter_food();
        }
        for _ in 0..self.config.max_resources {
            self.scatter_resource();
        }

        self.ensure_reproducers();
        // The starting roster is not a tick event.
        self.last_spawned = 0;
        debug!(
            round,
            units = self.units.len(),
            foods = self.foods.len(),
            resources = self.resources.len(),
            "world reset"
        );
    }

    fn clear_round_state(&mut self) {
        self.tick = Tick::zero();
        self.units.clear();
        self.buildings.clear();
        self.homes.clear();
        self.foods.clear();
        self.resources.clear();
        self.pending_deaths.clear();
        self.pending_spawns.clear();
        self.tallies = vec![TeamTally::default(); self.config.team_count];
    }

    /// Execute one simulation tick pipeline returning emitted events.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();

        let (food_respawned, resource_respawned) = self.stage_item_respawn();
        self.stage_buildings();
        self.stage_spawn_commit();
        self.ensure_reproducers();
        self.stage_reproduction(next_tick);
        self.stage_units();
        let deaths = self.stage_death_cleanup();

        self.tick = next_tick;
        let events = TickEvents {
            tick: self.tick,
            spawned: std::mem::take(&mut self.last_spawned),
            deaths,
            food_respawned,
            resource_respawned,
        };
        trace!(
            tick = self.tick.0,
            units = self.units.len(),
            buildings = self.buildings.len(),
            spawned = events.spawned,
            deaths,
            "tick complete"
        );
        events
    }

    pub(crate) fn stage_item_respawn(&mut self) -> (bool, bool) {
        let food_chance = self
            .config
            .per_tick_chance(self.config.food_spawn_chance_per_second);
        let food = self.foods.len() < self.config.max_food && self.rng.random_bool(food_chance);
        if food {
            self.scatter_food();
        }
        let resource_chance = self
            .config
            .per_tick_chance(self.config.resource_spawn_chance_per_second);
        let resource = self.resources.len() < self.config.max_resources
            && self.rng.random_bool(resource_chance);
        if resource {
            self.scatter_resource();
        }
        (food, resource)
    }

    pub(crate) fn stage_spawn_commit(&mut self) {
        if self.pending_spawns.is_empty() {
            return;
        }
        let orders = std::mem::take(&mut self.pending_spawns);
        for order in orders {
            self.spawn_unit(order.team, order.role);
        }
    }

    /// Queue a free reproducer respawn for every team lacking a living or queued one.
    pub(crate) fn ensure_reproducers(&mut self) {
        for team in 0..self.config.team_count {
            let team = TeamId(team as u8);
            if self.has_living_reproducer(team) {
                continue;
            }
            let Some(stores) = self
                .homes
                .get(team.index())
                .and_then(|&id| self.buildings.get_mut(id))
                .and_then(|home| home.stores.as_mut())
            else {
                debug!(%team, "team has no home; reproducer check skipped");
                continue;
            };
            if !stores.has_queued(Role::Reproducer) {
                stores.respawn_queue.push(RespawnEntry {
                    ticks_remaining: 0,
                    role: Role::Reproducer,
                });
            }
        }
    }

    pub(crate) fn stage_reproduction(&mut self, tick: Tick) {
        if tick.0 % u64::from(self.config.reproduction_interval_ticks) != 0 {
            return;
        }
        let populations = self.survivor_counts();
        let cost = self.config.reproduce_food_cost;
        for team in 0..self.config.team_count {
            let team_id = TeamId(team as u8);
            if populations[team] as usize >= self.config.max_team_population {
                continue;
            }
            let Some(stores) = self
                .homes
                .get(team)
                .and_then(|&id| self.buildings.get_mut(id))
                .and_then(|home| home.stores.as_mut())
            else {
                debug!(team = %team_id, "team has no home; reproduction skipped");
                continue;
            };
            if stores.food < cost {
                continue;
            }
            stores.food = (stores.food - cost).max(0.0);
            let role = choose_role(&self.role_weights[team], &mut self.rng);
            self.spawn_unit(team_id, role);
        }
    }

    pub(crate) fn stage_death_cleanup(&mut self) -> usize {
        if self.pending_deaths.is_empty() {
            return 0;
        }
        let dead: HashSet<UnitId> = self.pending_deaths.drain(..).collect();
        self.units.remove_many(&dead)
    }

    /// Spawn a fresh unit of `role` at its team's home.
    pub fn spawn_unit(&mut self, team: TeamId, role: Role) -> Option<UnitId> {
        let position = self.home(team)?.position;
        self.spawn_unit_at(team, role, position)
    }

    /// Spawn a fresh unit of `role` at an explicit position.
    pub fn spawn_unit_at(&mut self, team: TeamId, role: Role, position: Position) -> Option<UnitId> {
        let home = self.home_of(team)?;
        let heading = self.rng.random_range(0.0..std::f32::consts::TAU);
        let unit = Unit::new(position, team, role, home, heading, &self.config);
        self.tallies[team.index()].spawned += 1;
        self.last_spawned += 1;
        Some(self.units.insert(unit))
    }

    /// Place a non-home building directly (tests and scripted scenarios).
    pub fn place_building(
        &mut self,
        team: TeamId,
        kind: BuildingKind,
        position: Position,
    ) -> Option<BuildingId> {
        if kind.is_home() || team.index() >= self.config.team_count {
            return None;
        }
        Some(
            self.buildings
                .insert(Building::new(position, team, kind, &self.config)),
        )
    }

    pub fn spawn_food(&mut self, position: Position) -> FoodId {
        self.foods.insert(FoodItem { position })
    }

    pub fn spawn_resource(&mut self, position: Position, kind: ResourceKind) -> ResourceId {
        self.resources.insert(ResourceItem { position, kind })
    }

    fn scatter_position(&mut self) -> Position {
        let margin = self.config.item_margin;
        let max_x = (self.config.world_width as i32 - margin).max(margin);
        let max_y = (self.config.world_height as i32 - margin).max(margin);
        let x = self.rng.random_range(margin..=max_x);
        let y = self.rng.random_range(margin..=max_y);
        Position::new(x as f32, y as f32)
    }

    fn scatter_food(&mut self) {
        let position = self.scatter_position();
        self.spawn_food(position);
    }

    fn scatter_resource(&mut self) {
        let kind = ResourceKind::ALL[self.rng.random_range(0..ResourceKind::ALL.len())];
        let position = self.scatter_position();
        self.spawn_resource(position, kind);
    }

    /// Clamp a position into the world rectangle.
    pub(crate) fn clamp_to_world(&self, position: Position) -> Position {
        Position::new(
            position.x.clamp(0.0, self.config.world_width),
            position.y.clamp(0.0, self.config.world_height),
        )
    }

    /// Replace the per-team role weights used by reproduction.
    ///
    /// A vector of the wrong length resets every team to the configured defaults.
    pub fn set_role_weights(&mut self, weights: Vec<RoleWeights>) {
        if weights.len() == self.config.team_count {
            self.role_weights = weights;
        } else {
            debug!(
                expected = self.config.team_count,
                got = weights.len(),
                "role weight vector length mismatch; using defaults"
            );
            self.role_weights = vec![self.config.learner.default_weights; self.config.team_count];
        }
    }

    /// Non-reproducer survivors per team.
    #[must_use]
    pub fn survivor_counts(&self) -> Vec<u32> {
        self.survivors_by_role()
            .iter()
            .map(RoleCounts::total)
            .collect()
    }

    /// Non-reproducer survivors per team, split by role.
    #[must_use]
    pub fn survivors_by_role(&self) -> Vec<RoleCounts> {
        let mut counts = vec![RoleCounts::default(); self.config.team_count];
        for unit in self.units.as_slice() {
            if let Some(slot) = counts.get_mut(unit.team.index()) {
                slot.record(unit.role);
            }
        }
        counts
    }

    /// Whether `team` has a reproducer on the board.
    #[must_use]
    pub fn has_living_reproducer(&self, team: TeamId) -> bool {
        self.units
            .as_slice()
            .iter()
            .any(|unit| unit.team == team && unit.role.is_reproducer())
    }

    /// Whether `team` has a living reproducer or one waiting in its home queue.
    #[must_use]
    pub fn has_reproducer_or_queued(&self, team: TeamId) -> bool {
        self.has_living_reproducer(team)
            || self
                .home(team)
                .and_then(|home| home.stores.as_ref())
                .is_some_and(|stores| stores.has_queued(Role::Reproducer))
    }

    /// Count of `team`'s buildings of `kind`.
    #[must_use]
    pub fn building_count(&self, team: TeamId, kind: BuildingKind) -> usize {
        self.buildings
            .values()
            .filter(|building| building.team == team && building.kind == kind)
            .count()
    }

    /// Count of `team`'s buildings other than its home.
    #[must_use]
    pub fn non_home_building_count(&self, team: TeamId) -> usize {
        self.buildings
            .values()
            .filter(|building| building.team == team && !building.kind.is_home())
            .count()
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    /// Ticks processed since the round began.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Identifier of the round being played.
    #[must_use]
    pub const fn round(&self) -> u64 {
        self.round
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Read-only access to the unit arena.
    #[must_use]
    pub fn units(&self) -> &UnitArena {
        &self.units
    }

    #[must_use]
    pub fn unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn unit_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(id)
    }

    /// Iterate buildings in storage order.
    pub fn buildings(&self) -> impl Iterator<Item = (BuildingId, &Building)> + '_ {
        self.buildings.iter()
    }

    #[must_use]
    pub fn building(&self, id: BuildingId) -> Option<&Building> {
        self.buildings.get(id)
    }

    pub fn building_mut(&mut self, id: BuildingId) -> Option<&mut Building> {
        self.buildings.get_mut(id)
    }

    /// Handle of `team`'s home.
    #[must_use]
    pub fn home_of(&self, team: TeamId) -> Option<BuildingId> {
        self.homes
            .get(team.index())
            .copied()
            .filter(|id| self.buildings.contains_key(*id))
    }

    #[must_use]
    pub fn home(&self, team: TeamId) -> Option<&Building> {
        self.home_of(team).and_then(|id| self.buildings.get(id))
    }

    pub fn home_mut(&mut self, team: TeamId) -> Option<&mut Building> {
        let id = self.home_of(team)?;
        self.buildings.get_mut(id)
    }

    /// Food items lying in the world.
    pub fn foods(&self) -> impl Iterator<Item = (FoodId, &FoodItem)> + '_ {
        self.foods.iter()
    }

    /// Resource items lying in the world.
    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &ResourceItem)> + '_ {
        self.resources.iter()
    }

    #[must_use]
    pub fn food_count(&self) -> usize {
        self.foods.len()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Per-team counters for the current round.
    #[must_use]
    pub fn tallies(&self) -> &[TeamTally] {
        &self.tallies
    }

    #[must_use]
    pub fn role_weights(&self) -> &[RoleWeights] {
        &self.role_weights
    }

    /// Serializable copy of everything a renderer reads.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        let units = self
            .units
            .as_slice()
            .iter()
            .map(|unit| UnitView {
                position: unit.position,
                team: unit.team,
                role: unit.role,
                heading: unit.heading,
                energy: unit.energy,
                health: unit.health,
                carried_food: unit.carried_food,
                carried: unit.carried,
            })
            .collect();
        let buildings = self
            .buildings
            .values()
            .map(|building| BuildingView {
                position: building.position,
                team: building.team,
                kind: building.kind,
                hit_points: building.hit_points,
                food: building.stores.as_ref().map(|stores| stores.food),
                resources: building.stores.as_ref().map(|stores| stores.resources),
                queued_respawns: building
                    .stores
                    .as_ref()
                    .map_or(0, |stores| stores.respawn_queue.len()),
            })
            .collect();
        WorldSnapshot {
            tick: self.tick,
            round: self.round,
            units,
            buildings,
            foods: self.foods.values().copied().collect(),
            resources: self.resources.values().copied().collect(),
        }
    }
}
