//! Core types shared across the colony workspace.
//!
//! The engine is split along the tick pipeline: [`world`] owns the round-scoped
//! collections, `behavior` and `buildings` resolve one tick of units and
//! buildings, [`round`] drives round ends and restarts, and [`learner`] tunes
//! the per-team role weights between rounds.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

mod behavior;
mod buildings;
pub mod config;
mod entity;
pub mod learner;
pub mod round;
pub mod world;

pub use config::{BuildCosts, BuildingCaps, ColonyConfig, RoleDecay, StartingRoster};
pub use entity::{
    Building, FoodItem, HomeStores, RespawnEntry, ResourceItem, Unit, UnitArena, Waypoint,
};
pub use learner::{LearnerConfig, MetaState, RoleWeights, normalize_weights, update_weights};
pub use round::{
    NullPersistence, RoundEndReason, RoundOutcome, RoundPersistence, RoundPhase, RoundRecord,
    Simulation, StepReport, building_census, evaluate,
};
pub use world::{
    BuildingView, TeamTally, TickEvents, UnitView, WorldSnapshot, WorldState, WorldStateError,
};

new_key_type! {
    /// Stable handle for units backed by a generational slot map.
    pub struct UnitId;
    /// Stable handle for buildings; units reference their home through it.
    pub struct BuildingId;
    /// Handle for a food item lying in the world.
    pub struct FoodId;
    /// Handle for a resource item lying in the world.
    pub struct ResourceId;
}

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle < -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle >= HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Simulation clock (ticks processed since the round began).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Continuous 2D position in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    /// Construct a new position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance to `other`.
    #[must_use]
    pub fn dist_sq(self, other: Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Bearing from `self` towards `other`, in radians.
    #[must_use]
    pub fn bearing_to(self, other: Position) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Team identifier; valid values are `0..config.team_count`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct TeamId(pub u8);

impl TeamId {
    /// Position of the team in per-team vectors.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team{}", self.0)
    }
}

/// Behavioral specialization of a unit; fixed for the unit's lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Scavenger,
    Builder,
    Defender,
    Attacker,
    Reproducer,
}

impl Role {
    /// Roles that count as population and carry a learned weight, in weight-vector order.
    pub const LEARNED: [Role; 4] = [Role::Scavenger, Role::Builder, Role::Defender, Role::Attacker];

    /// Slot of this role in a [`RoleWeights`] / [`RoleCounts`] vector.
    #[must_use]
    pub const fn learned_index(self) -> Option<usize> {
        match self {
            Role::Scavenger => Some(0),
            Role::Builder => Some(1),
            Role::Defender => Some(2),
            Role::Attacker => Some(3),
            Role::Reproducer => None,
        }
    }

    #[must_use]
    pub const fn is_reproducer(self) -> bool {
        matches!(self, Role::Reproducer)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Scavenger => "scavenger",
            Role::Builder => "builder",
            Role::Defender => "defender",
            Role::Attacker => "attacker",
            Role::Reproducer => "reproducer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Building categories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildingKind {
    Home,
    Tower,
    Farm,
    Storage,
    Wall,
}

impl BuildingKind {
    /// Order in which builders try to satisfy the per-team caps.
    pub const BUILD_PRIORITY: [BuildingKind; 3] =
        [BuildingKind::Tower, BuildingKind::Farm, BuildingKind::Storage];

    #[must_use]
    pub const fn is_home(self) -> bool {
        matches!(self, BuildingKind::Home)
    }
}

/// Raw material types gathered by builders and salvaged by attackers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Wood,
    Stone,
    Metal,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::Wood, ResourceKind::Stone, ResourceKind::Metal];

    const fn slot(self) -> usize {
        match self {
            ResourceKind::Wood => 0,
            ResourceKind::Stone => 1,
            ResourceKind::Metal => 2,
        }
    }
}

/// Whole-unit amounts per resource type. Used for carried goods, home
/// stockpiles and build costs alike, so it can never go negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceStock {
    pub wood: u32,
    pub stone: u32,
    pub metal: u32,
}

impl ResourceStock {
    /// Construct a stock from explicit amounts.
    #[must_use]
    pub const fn new(wood: u32, stone: u32, metal: u32) -> Self {
        Self { wood, stone, metal }
    }

    const fn as_array(self) -> [u32; 3] {
        [self.wood, self.stone, self.metal]
    }

    #[must_use]
    pub const fn get(&self, kind: ResourceKind) -> u32 {
        self.as_array()[kind.slot()]
    }

    fn slot_mut(&mut self, kind: ResourceKind) -> &mut u32 {
        match kind {
            ResourceKind::Wood => &mut self.wood,
            ResourceKind::Stone => &mut self.stone,
            ResourceKind::Metal => &mut self.metal,
        }
    }

    pub fn add(&mut self, kind: ResourceKind, amount: u32) {
        let slot = self.slot_mut(kind);
        *slot = slot.saturating_add(amount);
    }

    /// Add every component of `other`.
    pub fn merge(&mut self, other: ResourceStock) {
        for kind in ResourceKind::ALL {
            self.add(kind, other.get(kind));
        }
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.wood + self.stone + self.metal
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// True when every component of `cost` is available.
    #[must_use]
    pub fn covers(&self, cost: &ResourceStock) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.get(kind) >= cost.get(kind))
    }

    /// Subtract `cost` if affordable; leaves the stock untouched otherwise.
    pub fn try_debit(&mut self, cost: &ResourceStock) -> bool {
        if !self.covers(cost) {
            return false;
        }
        for kind in ResourceKind::ALL {
            *self.slot_mut(kind) -= cost.get(kind);
        }
        true
    }

    /// Components of `cost` not yet covered by this stock.
    #[must_use]
    pub fn shortfall(&self, cost: &ResourceStock) -> ResourceStock {
        ResourceStock {
            wood: cost.wood.saturating_sub(self.wood),
            stone: cost.stone.saturating_sub(self.stone),
            metal: cost.metal.saturating_sub(self.metal),
        }
    }

    /// Move the whole stock out, leaving zeros behind.
    pub fn take(&mut self) -> ResourceStock {
        std::mem::take(self)
    }

    /// Iterate `(kind, amount)` pairs in [`ResourceKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u32)> + '_ {
        ResourceKind::ALL.iter().map(|&kind| (kind, self.get(kind)))
    }
}

/// Per-role population counts in [`Role::LEARNED`] order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleCounts(pub [u32; 4]);

impl RoleCounts {
    pub fn record(&mut self, role: Role) {
        if let Some(slot) = role.learned_index() {
            self.0[slot] += 1;
        }
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }

    #[must_use]
    pub fn get(&self, role: Role) -> u32 {
        role.learned_index().map_or(0, |slot| self.0[slot])
    }
}
