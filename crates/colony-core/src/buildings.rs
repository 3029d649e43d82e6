//! Tower combat, farm production and home upkeep for one tick.

use colony_index::NeighborhoodIndex;
use rayon::prelude::*;
use tracing::debug;

use crate::entity::{FoodItem, RespawnEntry};
use crate::world::{SpawnOrder, WorldState, int_jitter};
use crate::{BuildingId, BuildingKind, Position, TeamId, clamp01};

#[derive(Debug, Clone, Copy)]
struct TowerShot {
    tower: BuildingId,
    origin: Position,
    team: TeamId,
}

impl WorldState {
    /// Run every building stage. Units do not move here, so the index is built once.
    pub(crate) fn stage_buildings(&mut self) {
        let positions: Vec<(f32, f32)> = self
            .units
            .as_slice()
            .iter()
            .map(|unit| (unit.position.x, unit.position.y))
            .collect();
        let indexed = match self.index.rebuild(&positions) {
            Ok(()) => true,
            Err(err) => {
                debug!(%err, "unit index rebuild failed; skipping towers and feeding");
                false
            }
        };

        if indexed {
            self.stage_towers();
        }
        self.stage_farms();
        self.stage_homes(indexed);
    }

    /// Decrement cooldowns, pick targets in parallel, then apply damage in building order.
    pub(crate) fn stage_towers(&mut self) {
        let mut ready = Vec::new();
        for (id, building) in &mut self.buildings {
            if building.kind != BuildingKind::Tower {
                continue;
            }
            if building.cooldown > 0 {
                building.cooldown -= 1;
                continue;
            }
            ready.push(TowerShot {
                tower: id,
                origin: building.position,
                team: building.team,
            });
        }
        if ready.is_empty() {
            return;
        }

        let range_sq = self.config.tower_range * self.config.tower_range;
        let index = &self.index;
        let units = self.units.as_slice();
        let targets: Vec<Option<usize>> = ready
            .par_iter()
            .map(|shot| {
                index
                    .nearest_within(
                        (shot.origin.x, shot.origin.y),
                        range_sq,
                        &mut |idx| {
                            units.get(idx).is_some_and(|unit| {
                                unit.team != shot.team && !unit.role.is_reproducer()
                            })
                        },
                    )
                    .map(|(idx, _)| idx)
            })
            .collect();

        for (shot, target) in ready.iter().zip(targets) {
            let Some(target) = target else {
                continue;
            };
            if let Some(unit) = self.units.get_index_mut(target) {
                unit.health = clamp01(unit.health - self.config.tower_damage);
            }
            if let Some(tower) = self.buildings.get_mut(shot.tower) {
                tower.cooldown = self.config.tower_cooldown_ticks;
            }
        }
    }

    fn stage_farms(&mut self) {
        let yield_ticks = self.config.farm_yield_ticks;
        let spread = self.config.farm_drop_jitter;
        let (width, height) = (self.config.world_width, self.config.world_height);
        for building in self.buildings.values_mut() {
            if building.kind != BuildingKind::Farm {
                continue;
            }
            building.farm_timer += 1;
            if building.farm_timer < yield_ticks {
                continue;
            }
            building.farm_timer = 0;
            for _ in 0..self.config.farm_yield_amount {
                let dx = int_jitter(&mut self.rng, spread);
                let dy = int_jitter(&mut self.rng, spread);
                let position = Position::new(
                    (building.position.x + dx).clamp(0.0, width),
                    (building.position.y + dy).clamp(0.0, height),
                );
                self.foods.insert(FoodItem { position });
            }
        }
    }

    fn stage_homes(&mut self, indexed: bool) {
        let reach = self.config.home_reach();
        let reach_sq = reach * reach;
        for team in 0..self.homes.len() {
            let home_id = self.homes[team];
            let Some(home) = self.buildings.get_mut(home_id) else {
                debug!(team, "home missing; upkeep skipped");
                continue;
            };
            let (origin, owner) = (home.position, home.team);
            let Some(stores) = home.stores.as_mut() else {
                continue;
            };

            let queue = std::mem::take(&mut stores.respawn_queue);
            for entry in queue {
                if entry.ticks_remaining > 0 {
                    stores.respawn_queue.push(RespawnEntry {
                        ticks_remaining: entry.ticks_remaining - 1,
                        ..entry
                    });
                    continue;
                }
                if entry.role.is_reproducer() {
                    self.pending_spawns.push(SpawnOrder {
                        team: owner,
                        role: entry.role,
                    });
                    continue;
                }
                let cost = self.config.respawn_food_cost;
                if stores.food >= cost {
                    stores.food = (stores.food - cost).max(0.0);
                    self.pending_spawns.push(SpawnOrder {
                        team: owner,
                        role: entry.role,
                    });
                } else {
                    debug!(team = %owner, role = %entry.role, "respawn blocked on food");
                    stores.respawn_queue.push(RespawnEntry {
                        ticks_remaining: self.config.blocked_respawn_retry_ticks,
                        role: entry.role,
                    });
                }
            }

            if !indexed || stores.food <= 0.0 {
                continue;
            }
            let mut nearby = Vec::new();
            self.index
                .neighbors_within((origin.x, origin.y), reach_sq, &mut |idx, _| {
                    nearby.push(idx);
                });
            nearby.sort_unstable();
            for idx in nearby {
                if stores.food <= 0.0 {
                    break;
                }
                let Some(unit) = self.units.get_index_mut(idx) else {
                    continue;
                };
                if unit.team == owner {
                    unit.energy = stores.serve_ration(unit.energy, &self.config);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{ColonyConfig, StartingRoster};
    use crate::world::WorldState;
    use crate::{BuildingKind, Position, Role, TeamId};

    fn empty_world() -> WorldState {
        WorldState::new(ColonyConfig {
            rng_seed: Some(9),
            starting_roster: StartingRoster::empty(),
            max_food: 0,
            max_resources: 0,
            food_spawn_chance_per_second: 0.0,
            resource_spawn_chance_per_second: 0.0,
            ..ColonyConfig::default()
        })
        .expect("world")
    }

    fn home_food(world: &WorldState, team: u8) -> f32 {
        world
            .home(TeamId(team))
            .and_then(|b| b.stores.as_ref())
            .map(|s| s.food)
            .unwrap_or_default()
    }

    fn rebuild_index(world: &mut WorldState) {
        use colony_index::NeighborhoodIndex;
        let positions: Vec<(f32, f32)> = world
            .units()
            .as_slice()
            .iter()
            .map(|u| (u.position.x, u.position.y))
            .collect();
        world.index.rebuild(&positions).expect("rebuild");
    }

    #[test]
    fn tower_fires_once_then_waits_out_its_cooldown() {
        let mut world = empty_world();
        let spot = Position::new(64.0, 64.0);
        world
            .place_building(TeamId(0), BuildingKind::Tower, spot)
            .expect("tower");
        let enemy = world
            .spawn_unit_at(TeamId(1), Role::Scavenger, Position::new(74.0, 64.0))
            .expect("enemy");
        world.spawn_unit_at(TeamId(1), Role::Reproducer, Position::new(65.0, 64.0));
        rebuild_index(&mut world);

        let health = |world: &WorldState| world.unit(enemy).map(|u| u.health).unwrap_or(-1.0);

        world.stage_towers();
        assert!((health(&world) - 0.88).abs() < 1e-6);

        let cooldown = world.config().tower_cooldown_ticks;
        for _ in 0..cooldown {
            world.stage_towers();
            assert!((health(&world) - 0.88).abs() < 1e-6);
        }

        world.stage_towers();
        assert!((health(&world) - 0.76).abs() < 1e-6);
    }

    #[test]
    fn tower_ignores_targets_outside_range() {
        let mut world = empty_world();
        world
            .place_building(TeamId(0), BuildingKind::Tower, Position::new(20.0, 20.0))
            .expect("tower");
        let enemy = world
            .spawn_unit_at(TeamId(1), Role::Defender, Position::new(68.0, 20.0))
            .expect("enemy");
        rebuild_index(&mut world);
        world.stage_towers();
        assert_eq!(world.unit(enemy).map(|u| u.health), Some(1.0));
    }

    #[test]
    fn feeding_a_nearly_empty_home_transfers_only_what_is_left() {
        let mut world = empty_world();
        let home = world.home(TeamId(0)).map(|b| b.position).expect("home");
        let id = world
            .spawn_unit_at(TeamId(0), Role::Builder, home)
            .expect("unit");
        world.unit_mut(id).expect("unit").energy = 0.5;
        if let Some(stores) = world.home_mut(TeamId(0)).and_then(|b| b.stores.as_mut()) {
            stores.food = 0.1;
            stores.respawn_queue.clear();
        }

        world.stage_buildings();

        assert_eq!(home_food(&world, 0), 0.0);
        let energy = world.unit(id).map(|u| u.energy).unwrap_or_default();
        assert!((energy - 0.56).abs() < 1e-6);
    }

    #[test]
    fn feeding_skips_enemies_and_stops_when_stock_runs_out() {
        let mut world = empty_world();
        let home = world.home(TeamId(0)).map(|b| b.position).expect("home");
        let enemy = world
            .spawn_unit_at(TeamId(1), Role::Attacker, home)
            .expect("enemy");
        let first = world
            .spawn_unit_at(TeamId(0), Role::Builder, home)
            .expect("first");
        let second = world
            .spawn_unit_at(TeamId(0), Role::Builder, home)
            .expect("second");
        for id in [enemy, first, second] {
            world.unit_mut(id).expect("unit").energy = 0.2;
        }
        if let Some(stores) = world.home_mut(TeamId(0)).and_then(|b| b.stores.as_mut()) {
            stores.food = 0.25;
            stores.respawn_queue.clear();
        }

        world.stage_buildings();

        assert_eq!(world.unit(enemy).map(|u| u.energy), Some(0.2));
        assert!(world.unit(first).is_some_and(|u| (u.energy - 0.35).abs() < 1e-6));
        assert_eq!(world.unit(second).map(|u| u.energy), Some(0.2));
    }

    #[test]
    fn blocked_respawn_is_requeued_with_retry_delay() {
        let mut world = empty_world();
        if let Some(stores) = world.home_mut(TeamId(0)).and_then(|b| b.stores.as_mut()) {
            stores.food = 1.0;
            stores.respawn_queue = vec![crate::RespawnEntry {
                ticks_remaining: 0,
                role: Role::Scavenger,
            }];
        }

        world.stage_buildings();

        let queue = world
            .home(TeamId(0))
            .and_then(|b| b.stores.as_ref())
            .map(|s| s.respawn_queue.clone())
            .unwrap_or_default();
        assert_eq!(
            queue,
            vec![crate::RespawnEntry {
                ticks_remaining: 30,
                role: Role::Scavenger
            }]
        );
        assert_eq!(world.pending_spawns.len(), 1, "the other team's reproducer only");
        assert_eq!(home_food(&world, 0), 1.0);
    }

    #[test]
    fn farm_yields_food_on_schedule() {
        let mut world = empty_world();
        world
            .place_building(TeamId(0), BuildingKind::Farm, Position::new(40.0, 40.0))
            .expect("farm");
        let yield_ticks = world.config().farm_yield_ticks;
        for _ in 0..yield_ticks - 1 {
            world.stage_buildings();
        }
        assert_eq!(world.food_count(), 0);
        world.stage_buildings();
        assert_eq!(world.food_count(), 1);
        let (_, food) = world.foods().next().expect("food");
        assert!((food.position.x - 40.0).abs() <= 10.0);
    }
}
