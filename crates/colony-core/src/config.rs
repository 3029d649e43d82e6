//! Static tunables for a colony world.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

use crate::learner::LearnerConfig;
use crate::world::WorldStateError;
use crate::{BuildingKind, ResourceStock, Role};

/// Units spawned per team at round start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StartingRoster {
    pub scavenger: u32,
    pub builder: u32,
    pub defender: u32,
    pub attacker: u32,
    pub reproducer: u32,
}

impl Default for StartingRoster {
    fn default() -> Self {
        Self {
            scavenger: 6,
            builder: 4,
            defender: 2,
            attacker: 2,
            reproducer: 1,
        }
    }
}

impl StartingRoster {
    /// An empty roster; useful for hand-built test worlds.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            scavenger: 0,
            builder: 0,
            defender: 0,
            attacker: 0,
            reproducer: 0,
        }
    }

    /// `(role, count)` pairs in spawn order.
    #[must_use]
    pub const fn entries(&self) -> [(Role, u32); 5] {
        [
            (Role::Scavenger, self.scavenger),
            (Role::Builder, self.builder),
            (Role::Defender, self.defender),
            (Role::Attacker, self.attacker),
            (Role::Reproducer, self.reproducer),
        ]
    }
}

/// Per-role multipliers applied to the base energy decay. Reproducers never decay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoleDecay {
    pub scavenger: f32,
    pub builder: f32,
    pub defender: f32,
    pub attacker: f32,
}

impl Default for RoleDecay {
    fn default() -> Self {
        Self {
            scavenger: 1.0,
            builder: 1.0,
            defender: 1.0,
            attacker: 1.0,
        }
    }
}

impl RoleDecay {
    #[must_use]
    pub const fn multiplier(&self, role: Role) -> f32 {
        match role {
            Role::Scavenger => self.scavenger,
            Role::Builder => self.builder,
            Role::Defender => self.defender,
            Role::Attacker => self.attacker,
            Role::Reproducer => 0.0,
        }
    }
}

/// Resource cost of each building type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildCosts {
    pub tower: ResourceStock,
    pub farm: ResourceStock,
    pub storage: ResourceStock,
    pub wall: ResourceStock,
}

impl Default for BuildCosts {
    fn default() -> Self {
        Self {
            tower: ResourceStock::new(1, 2, 3),
            farm: ResourceStock::new(2, 0, 0),
            storage: ResourceStock::new(1, 3, 0),
            wall: ResourceStock::new(0, 2, 0),
        }
    }
}

impl BuildCosts {
    /// Cost of `kind`; homes are never built and cost nothing.
    #[must_use]
    pub const fn cost(&self, kind: BuildingKind) -> ResourceStock {
        match kind {
            BuildingKind::Home => ResourceStock::new(0, 0, 0),
            BuildingKind::Tower => self.tower,
            BuildingKind::Farm => self.farm,
            BuildingKind::Storage => self.storage,
            BuildingKind::Wall => self.wall,
        }
    }
}

/// Per-team cap on each buildable type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildingCaps {
    pub tower: usize,
    pub farm: usize,
    pub storage: usize,
    pub wall: usize,
}

impl Default for BuildingCaps {
    fn default() -> Self {
        Self {
            tower: 3,
            farm: 2,
            storage: 2,
            wall: 10,
        }
    }
}

impl BuildingCaps {
    #[must_use]
    pub const fn cap(&self, kind: BuildingKind) -> usize {
        match kind {
            BuildingKind::Home => 1,
            BuildingKind::Tower => self.tower,
            BuildingKind::Farm => self.farm,
            BuildingKind::Storage => self.storage,
            BuildingKind::Wall => self.wall,
        }
    }
}

/// Static configuration for a colony world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColonyConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Ticks per simulated second; converts per-second chances into per-tick trials.
    pub tick_rate: u32,
    /// Number of competing teams (one home each).
    pub team_count: usize,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Units spawned per team when a round starts.
    pub starting_roster: StartingRoster,
    /// Non-reproducer population above which reproduction pauses.
    pub max_team_population: usize,
    /// Delay before a dead non-reproducer is respawned.
    pub respawn_delay_ticks: u32,
    /// Delay before a dead reproducer is respawned.
    pub reproducer_respawn_delay_ticks: u32,
    /// Delay applied when a due respawn cannot be paid for.
    pub blocked_respawn_retry_ticks: u32,
    /// Home food paid per non-reproducer respawn.
    pub respawn_food_cost: f32,
    /// Home food paid per reproduction spawn.
    pub reproduce_food_cost: f32,
    /// Ticks between reproduction attempts.
    pub reproduction_interval_ticks: u32,
    /// Distance travelled per tick at full speed.
    pub base_speed: f32,
    /// Maximum heading change per tick, in radians.
    pub turn_rate: f32,
    /// Attackers move at this fraction of the base speed.
    pub attacker_speed_multiplier: f32,
    /// Distance from home at which wander waypoints are placed.
    pub forage_waypoint_distance: f32,
    /// Uniform integer jitter applied to the waypoint distance.
    pub forage_waypoint_jitter: i32,
    /// Ticks before an unreached waypoint is replaced.
    pub forage_timeout_ticks: u32,
    /// Distance at which a waypoint counts as reached.
    pub waypoint_arrival_radius: f32,
    /// Minimum distance between waypoints and the world edge.
    pub waypoint_margin: f32,
    /// Inset of the bouncing boundary from the world edge.
    pub bounce_pad: f32,
    /// Uniform heading jitter added after a boundary bounce.
    pub edge_bounce_jitter: f32,
    /// Tether radius as a fraction of the smaller world dimension.
    pub tether_fraction: f32,
    /// Base energy lost per tick.
    pub energy_decay: f32,
    /// Per-role multipliers on `energy_decay`.
    pub role_decay: RoleDecay,
    /// Health lost per tick while energy is exhausted.
    pub starvation_damage: f32,
    /// Energy of freshly spawned units.
    pub start_energy: f32,
    /// Health of freshly spawned units.
    pub start_health: f32,
    /// Energy below which any unit abandons its role and heads home.
    pub low_energy_threshold: f32,
    /// Maximum food eaten per tick.
    pub food_eat_per_tick: f32,
    /// Energy restored per unit of food.
    pub energy_per_food: f32,
    /// Food stockpile of a fresh home.
    pub home_start_food: f32,
    /// Cap on food items lying in the world.
    pub max_food: usize,
    /// Cap on resource items lying in the world.
    pub max_resources: usize,
    /// Per-second chance of a new scattered food item.
    pub food_spawn_chance_per_second: f64,
    /// Per-second chance of a new scattered resource item.
    pub resource_spawn_chance_per_second: f64,
    /// Minimum distance between scattered items and the world edge.
    pub item_margin: i32,
    /// Drawn radius of a home.
    pub home_radius: f32,
    /// Added to `home_radius` to form the "at home" reach.
    pub home_reach_margin: f32,
    /// Horizontal distance of the outer homes from the world edge; derived from the world size when unset.
    pub home_margin: Option<f32>,
    /// Tower targeting range.
    pub tower_range: f32,
    /// Ticks a tower waits after firing.
    pub tower_cooldown_ticks: u32,
    /// Health removed per tower shot.
    pub tower_damage: f32,
    /// Resource cost per building type.
    pub build_costs: BuildCosts,
    /// Per-team cap per building type.
    pub building_caps: BuildingCaps,
    /// Uniform integer offset of new buildings around home.
    pub build_jitter: i32,
    /// Minimum distance between new buildings and the world edge.
    pub build_margin: f32,
    /// Ticks between farm harvests.
    pub farm_yield_ticks: u32,
    /// Food items produced per harvest.
    pub farm_yield_amount: u32,
    /// Uniform integer offset of harvested food around the farm.
    pub farm_drop_jitter: i32,
    /// Fraction of a building's cost siphoned per attacker contact tick.
    pub salvage_rate: f32,
    /// Uniform integer offset of resources dropped by a dying unit.
    pub salvage_drop_jitter: i32,
    /// Health removed per tick by a defender in contact.
    pub defender_damage: f32,
    /// Health removed per tick by an attacker in contact with a unit.
    pub attacker_unit_damage: f32,
    /// Hit points removed per tick by an attacker in contact with a building.
    pub attacker_building_damage: f32,
    /// Pickup distance for food and resource items.
    pub collect_radius: f32,
    /// Contact distance for unit-versus-unit damage.
    pub melee_radius: f32,
    /// Contact distance for attacker-versus-building damage.
    pub siege_radius: f32,
    /// Defender patrol circle is `home_radius + patrol_offset`.
    pub patrol_offset: f32,
    /// Bearing advanced per tick along the patrol circle.
    pub patrol_step: f32,
    /// Safety cap on round length.
    pub round_max_ticks: u64,
    /// Ticks into a round before an all-empty board counts as a draw.
    pub draw_grace_ticks: u64,
    /// Maximum number of round records retained in memory.
    pub history_capacity: usize,
    /// Role-weight learning parameters.
    pub learner: LearnerConfig,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        let tick_rate = 30;
        Self {
            world_width: 128.0,
            world_height: 128.0,
            tick_rate,
            team_count: 2,
            rng_seed: None,
            starting_roster: StartingRoster::default(),
            max_team_population: 55,
            respawn_delay_ticks: 8 * tick_rate,
            reproducer_respawn_delay_ticks: 1,
            blocked_respawn_retry_ticks: tick_rate,
            respawn_food_cost: 2.0,
            reproduce_food_cost: 2.0,
            reproduction_interval_ticks: tick_rate,
            base_speed: 0.6,
            turn_rate: 0.08,
            attacker_speed_multiplier: 0.35,
            forage_waypoint_distance: 44.0,
            forage_waypoint_jitter: 8,
            forage_timeout_ticks: 4 * tick_rate,
            waypoint_arrival_radius: 20.0_f32.sqrt(),
            waypoint_margin: 4.0,
            bounce_pad: 0.0,
            edge_bounce_jitter: 0.25,
            tether_fraction: 99.0,
            energy_decay: 0.001,
            role_decay: RoleDecay::default(),
            starvation_damage: 0.01,
            start_energy: 1.0,
            start_health: 1.0,
            low_energy_threshold: 0.15,
            food_eat_per_tick: 0.25,
            energy_per_food: 0.6,
            home_start_food: 13.0,
            max_food: 40,
            max_resources: 50,
            food_spawn_chance_per_second: 0.30,
            resource_spawn_chance_per_second: 0.45,
            item_margin: 6,
            home_radius: 12.0,
            home_reach_margin: 2.0,
            home_margin: None,
            tower_range: 48.0,
            tower_cooldown_ticks: 24,
            tower_damage: 0.12,
            build_costs: BuildCosts::default(),
            building_caps: BuildingCaps::default(),
            build_jitter: 20,
            build_margin: 8.0,
            farm_yield_ticks: 6 * tick_rate,
            farm_yield_amount: 1,
            farm_drop_jitter: 10,
            salvage_rate: 0.5,
            salvage_drop_jitter: 2,
            defender_damage: 0.05,
            attacker_unit_damage: 0.06,
            attacker_building_damage: 0.08,
            collect_radius: 4.0,
            melee_radius: 5.0,
            siege_radius: 6.0,
            patrol_offset: 8.0,
            patrol_step: 0.1,
            round_max_ticks: 4 * 60 * u64::from(tick_rate),
            draw_grace_ticks: 8 * u64::from(tick_rate),
            history_capacity: 64,
            learner: LearnerConfig::default(),
        }
    }
}

impl ColonyConfig {
    /// Radius inside which a unit counts as being at its home.
    #[must_use]
    pub fn home_reach(&self) -> f32 {
        self.home_radius + self.home_reach_margin
    }

    /// Distance beyond which units are pulled back home.
    #[must_use]
    pub fn tether_radius(&self) -> f32 {
        self.world_width.min(self.world_height) * self.tether_fraction
    }

    /// Horizontal inset of the outermost homes.
    #[must_use]
    pub fn resolved_home_margin(&self) -> f32 {
        self.home_margin.unwrap_or_else(|| {
            if self.world_width.min(self.world_height) <= 128.0 {
                16.0
            } else {
                24.0
            }
        })
    }

    /// Per-tick probability for a per-second chance at the configured tick rate.
    #[must_use]
    pub fn per_tick_chance(&self, per_second: f64) -> f64 {
        (per_second / f64::from(self.tick_rate.max(1))).clamp(0.0, 1.0)
    }

    /// Movement speed for a freshly spawned unit of `role`.
    #[must_use]
    pub fn speed_for(&self, role: Role) -> f32 {
        match role {
            Role::Attacker => self.base_speed * self.attacker_speed_multiplier,
            _ => self.base_speed,
        }
    }

    /// Validates the configuration before a world is built from it.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        let floats = [
            self.world_width,
            self.world_height,
            self.base_speed,
            self.turn_rate,
            self.attacker_speed_multiplier,
            self.forage_waypoint_distance,
            self.waypoint_arrival_radius,
            self.waypoint_margin,
            self.bounce_pad,
            self.edge_bounce_jitter,
            self.tether_fraction,
            self.energy_decay,
            self.starvation_damage,
            self.start_energy,
            self.start_health,
            self.low_energy_threshold,
            self.food_eat_per_tick,
            self.energy_per_food,
            self.home_start_food,
            self.home_radius,
            self.home_reach_margin,
            self.tower_range,
            self.tower_damage,
            self.build_margin,
            self.salvage_rate,
            self.defender_damage,
            self.attacker_unit_damage,
            self.attacker_building_damage,
            self.collect_radius,
            self.melee_radius,
            self.siege_radius,
            self.patrol_offset,
            self.patrol_step,
            self.respawn_food_cost,
            self.reproduce_food_cost,
            self.role_decay.scavenger,
            self.role_decay.builder,
            self.role_decay.defender,
            self.role_decay.attacker,
        ];
        if floats.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(WorldStateError::InvalidConfig(
                "numeric tunables must be finite and non-negative",
            ));
        }
        if self.world_width <= 0.0 || self.world_height <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "world dimensions must be positive",
            ));
        }
        if self.tick_rate == 0 {
            return Err(WorldStateError::InvalidConfig("tick_rate must be non-zero"));
        }
        if self.team_count < 2 || self.team_count > usize::from(u8::MAX) {
            return Err(WorldStateError::InvalidConfig(
                "team_count must be between 2 and 255",
            ));
        }
        if !self.food_spawn_chance_per_second.is_finite()
            || !self.resource_spawn_chance_per_second.is_finite()
            || self.food_spawn_chance_per_second < 0.0
            || self.resource_spawn_chance_per_second < 0.0
        {
            return Err(WorldStateError::InvalidConfig(
                "spawn chances must be finite and non-negative",
            ));
        }
        if self.start_energy > 1.0 || self.start_health > 1.0 || self.start_health <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "start_energy must be in [0, 1] and start_health in (0, 1]",
            ));
        }
        if self.forage_waypoint_jitter < 0
            || self.build_jitter < 0
            || self.farm_drop_jitter < 0
            || self.salvage_drop_jitter < 0
            || self.item_margin < 0
        {
            return Err(WorldStateError::InvalidConfig(
                "jitters and item_margin must be non-negative",
            ));
        }
        let min_dim = self.world_width.min(self.world_height);
        let widest_margin = self
            .waypoint_margin
            .max(self.build_margin)
            .max(self.item_margin as f32)
            .max(self.bounce_pad);
        if widest_margin * 2.0 >= min_dim {
            return Err(WorldStateError::InvalidConfig(
                "edge margins must leave room inside the world",
            ));
        }
        let home_margin = self.resolved_home_margin();
        if !home_margin.is_finite() || home_margin < 0.0 || home_margin * 2.0 > self.world_width {
            return Err(WorldStateError::InvalidConfig(
                "home_margin must fit inside the world width",
            ));
        }
        if self.farm_yield_ticks == 0 || self.reproduction_interval_ticks == 0 {
            return Err(WorldStateError::InvalidConfig(
                "farm_yield_ticks and reproduction_interval_ticks must be non-zero",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        self.learner.validate()
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
