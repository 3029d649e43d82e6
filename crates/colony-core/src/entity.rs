//! Entity records and the dense unit arena.

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::HashSet;

use crate::config::ColonyConfig;
use crate::{BuildingId, BuildingKind, Position, ResourceKind, ResourceStock, Role, TeamId, UnitId};

/// Temporary wander target with a countdown before it is replaced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    pub target: Position,
    pub ticks_left: u32,
}

/// A single autonomous unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unit {
    pub position: Position,
    pub team: TeamId,
    pub role: Role,
    /// Heading in radians.
    pub heading: f32,
    pub speed: f32,
    pub energy: f32,
    pub health: f32,
    pub carried_food: u32,
    pub carried: ResourceStock,
    pub waypoint: Option<Waypoint>,
    /// Home building of the unit's own team.
    pub home: BuildingId,
}

impl Unit {
    /// Spawn-state unit of `role` standing at `position`.
    #[must_use]
    pub fn new(
        position: Position,
        team: TeamId,
        role: Role,
        home: BuildingId,
        heading: f32,
        config: &ColonyConfig,
    ) -> Self {
        Self {
            position,
            team,
            role,
            heading,
            speed: config.speed_for(role),
            energy: config.start_energy,
            health: config.start_health,
            carried_food: 0,
            carried: ResourceStock::default(),
            waypoint: None,
            home,
        }
    }

    /// Whether the unit carries anything that should be brought home.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.carried_food > 0 || !self.carried.is_empty()
    }
}

/// Pending unit creation at a home.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RespawnEntry {
    pub ticks_remaining: u32,
    pub role: Role,
}

/// Stockpiles and respawn queue; present only on homes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HomeStores {
    pub food: f32,
    pub resources: ResourceStock,
    pub respawn_queue: Vec<RespawnEntry>,
}

impl HomeStores {
    #[must_use]
    pub fn new(food: f32) -> Self {
        Self {
            food: food.max(0.0),
            ..Self::default()
        }
    }

    /// Serve one bounded ration to a unit holding `energy`, returning its new energy.
    ///
    /// Eats `min(food_eat_per_tick, food)`; the stock never goes negative and the
    /// energy gain is capped at 1.0.
    pub fn serve_ration(&mut self, energy: f32, config: &ColonyConfig) -> f32 {
        if self.food <= 0.0 || energy >= 1.0 {
            return energy;
        }
        let eaten = config.food_eat_per_tick.min(self.food);
        self.food = (self.food - eaten).max(0.0);
        (energy + eaten * config.energy_per_food).min(1.0)
    }

    /// Whether a reproducer is already waiting in the queue.
    #[must_use]
    pub fn has_queued(&self, role: Role) -> bool {
        self.respawn_queue.iter().any(|entry| entry.role == role)
    }
}

/// A structure owned by a team.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Building {
    pub position: Position,
    pub team: TeamId,
    pub kind: BuildingKind,
    pub hit_points: f32,
    /// Stockpiles; `Some` exactly when `kind` is [`BuildingKind::Home`].
    pub stores: Option<HomeStores>,
    /// Ticks until a tower may fire again.
    pub cooldown: u32,
    /// Ticks accumulated towards the next farm harvest.
    pub farm_timer: u32,
}

impl Building {
    #[must_use]
    pub fn new(position: Position, team: TeamId, kind: BuildingKind, config: &ColonyConfig) -> Self {
        let stores = kind
            .is_home()
            .then(|| HomeStores::new(config.home_start_food));
        Self {
            position,
            team,
            kind,
            hit_points: 1.0,
            stores,
            cooldown: 0,
            farm_timer: 0,
        }
    }
}

/// Single-use food lying in the world.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FoodItem {
    pub position: Position,
}

/// Single-use raw material lying in the world.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ResourceItem {
    pub position: Position,
    pub kind: ResourceKind,
}

/// Dense unit storage with generational handles and stable iteration order.
#[derive(Debug, Clone, Default)]
pub struct UnitArena {
    slots: SlotMap<UnitId, usize>,
    handles: Vec<UnitId>,
    units: Vec<Unit>,
}

impl UnitArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true when no units are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Iterate over unit handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.handles.iter().copied()
    }

    /// Iterate `(handle, unit)` pairs in dense iteration order.
    pub fn iter(&self) -> impl Iterator<Item = (UnitId, &Unit)> + '_ {
        self.handles.iter().copied().zip(self.units.iter())
    }

    /// Units in dense iteration order.
    #[must_use]
    pub fn as_slice(&self) -> &[Unit] {
        &self.units
    }

    /// Handle stored at dense `index`.
    #[must_use]
    pub fn handle_at(&self, index: usize) -> Option<UnitId> {
        self.handles.get(index).copied()
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: UnitId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live unit.
    #[must_use]
    pub fn contains(&self, id: UnitId) -> bool {
        self.slots.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.index_of(id).map(|idx| &self.units[idx])
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        let idx = self.index_of(id)?;
        self.units.get_mut(idx)
    }

    /// Mutable access by dense index.
    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Unit> {
        self.units.get_mut(index)
    }

    /// Insert a new unit and return its handle.
    pub fn insert(&mut self, unit: Unit) -> UnitId {
        let index = self.units.len();
        self.units.push(unit);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove all units whose ids are contained in `dead`, preserving iteration order.
    pub fn remove_many(&mut self, dead: &HashSet<UnitId>) -> usize {
        if dead.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if dead.contains(&id) {
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.units.swap(read, write);
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.units.truncate(write);
        removed
    }

    /// Clear all stored units.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.handles.clear();
        self.units.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_unit(seed: u32) -> Unit {
        let config = ColonyConfig::default();
        Unit::new(
            Position::new(seed as f32, seed as f32 + 1.0),
            TeamId((seed % 2) as u8),
            Role::Scavenger,
            BuildingId::default(),
            0.0,
            &config,
        )
    }

    #[test]
    fn insert_allocates_unique_handles() {
        let mut arena = UnitArena::new();
        let a = arena.insert(sample_unit(0));
        let b = arena.insert(sample_unit(1));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn remove_many_preserves_order_and_indices() {
        let mut arena = UnitArena::new();
        let ids: Vec<_> = (0..5).map(|seed| arena.insert(sample_unit(seed))).collect();
        let dead: HashSet<_> = [ids[1], ids[3]].into_iter().collect();

        assert_eq!(arena.remove_many(&dead), 2);
        let survivors: Vec<_> = arena.iter_handles().collect();
        assert_eq!(survivors, vec![ids[0], ids[2], ids[4]]);
        assert_eq!(arena.index_of(ids[4]), Some(2));
        assert_eq!(arena.get(ids[4]).map(|u| u.position.x), Some(4.0));
        assert!(arena.get(ids[1]).is_none());

        let fresh = arena.insert(sample_unit(9));
        assert!(!dead.contains(&fresh), "generational handles are not reused");
    }

    #[test]
    fn serve_ration_never_overdraws() {
        let config = ColonyConfig::default();
        let mut stores = HomeStores::new(0.1);
        let energy = stores.serve_ration(0.5, &config);
        assert_eq!(stores.food, 0.0);
        assert!((energy - (0.5 + 0.1 * 0.6)).abs() < 1e-6);

        // Empty stock leaves energy untouched.
        assert_eq!(stores.serve_ration(0.2, &config), 0.2);
    }

    #[test]
    fn serve_ration_caps_energy() {
        let config = ColonyConfig::default();
        let mut stores = HomeStores::new(5.0);
        let energy = stores.serve_ration(0.95, &config);
        assert_eq!(energy, 1.0);
        assert!((stores.food - 4.75).abs() < 1e-6);
        assert_eq!(stores.serve_ration(1.0, &config), 1.0);
        assert!((stores.food - 4.75).abs() < 1e-6);
    }

    #[test]
    fn only_homes_have_stores() {
        let config = ColonyConfig::default();
        let home = Building::new(Position::default(), TeamId(0), BuildingKind::Home, &config);
        let farm = Building::new(Position::default(), TeamId(0), BuildingKind::Farm, &config);
        assert_eq!(home.stores.as_ref().map(|s| s.food), Some(13.0));
        assert!(farm.stores.is_none());
    }
}
