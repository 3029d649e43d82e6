//! Per-unit decision, movement and interaction for one tick.

use ordered_float::OrderedFloat;
use rand::{Rng, rngs::SmallRng};
use std::f32::consts::{PI, TAU};
use tracing::debug;

use crate::config::ColonyConfig;
use crate::entity::{FoodItem, ResourceItem, RespawnEntry, Unit, Waypoint};
use crate::world::{WorldState, int_jitter};
use crate::{BuildingId, BuildingKind, FoodId, Position, ResourceId, ResourceStock, Role, UnitId};
use crate::{clamp01, wrap_signed_angle};

/// Rotate towards `target` by at most the turn rate, then advance along the heading.
pub(crate) fn steer_towards(
    unit: &mut Unit,
    target: Position,
    config: &ColonyConfig,
    rng: &mut SmallRng,
) {
    let desired = unit.position.bearing_to(target);
    let diff = wrap_signed_angle(desired - unit.heading);
    if diff.abs() > config.turn_rate {
        unit.heading = wrap_signed_angle(unit.heading + config.turn_rate.copysign(diff));
    } else {
        unit.heading = desired;
    }
    unit.position.x += unit.heading.cos() * unit.speed;
    unit.position.y += unit.heading.sin() * unit.speed;
    bounce(unit, config, rng);
}

/// Reflect off the padded world boundary.
fn bounce(unit: &mut Unit, config: &ColonyConfig, rng: &mut SmallRng) {
    let pad = config.bounce_pad;
    let max_x = config.world_width - pad;
    let max_y = config.world_height - pad;
    let mut bounced = false;
    if unit.position.x <= pad {
        unit.position.x = pad;
        unit.heading = PI - unit.heading;
        bounced = true;
    } else if unit.position.x >= max_x {
        unit.position.x = max_x;
        unit.heading = PI - unit.heading;
        bounced = true;
    }
    if unit.position.y <= pad {
        unit.position.y = pad;
        unit.heading = -unit.heading;
        bounced = true;
    } else if unit.position.y >= max_y {
        unit.position.y = max_y;
        unit.heading = -unit.heading;
        bounced = true;
    }
    if bounced {
        let jitter = config.edge_bounce_jitter;
        if jitter > 0.0 {
            unit.heading += rng.random_range(-jitter..=jitter);
        }
        unit.heading = wrap_signed_angle(unit.heading);
    }
}

/// Random wander target around `home`, kept inside the world margin.
fn pick_waypoint(home: Position, config: &ColonyConfig, rng: &mut SmallRng) -> Waypoint {
    let angle = rng.random_range(0.0..TAU);
    let radius = config.forage_waypoint_distance + int_jitter(rng, config.forage_waypoint_jitter);
    let margin = config.waypoint_margin;
    Waypoint {
        target: Position::new(
            (home.x + angle.cos() * radius).clamp(margin, config.world_width - margin),
            (home.y + angle.sin() * radius).clamp(margin, config.world_height - margin),
        ),
        ticks_left: config.forage_timeout_ticks,
    }
}

/// Salvage siphoned from a building of the given cost component.
fn salvage_amount(cost: u32, rate: f32) -> u32 {
    (cost as f32 * rate).round_ties_even().max(0.0) as u32
}

impl WorldState {
    /// Update every unit in arena order, then leave dead units for cleanup.
    pub(crate) fn stage_units(&mut self) {
        for index in 0..self.units.len() {
            self.update_unit(index);
        }
    }

    fn update_unit(&mut self, index: usize) {
        let Some(id) = self.units.handle_at(index) else {
            return;
        };
        let Some(mut unit) = self.units.as_slice().get(index).cloned() else {
            return;
        };

        let decay = self.config.energy_decay * self.config.role_decay.multiplier(unit.role);
        unit.energy = clamp01(unit.energy - decay);
        if !unit.role.is_reproducer() && unit.energy <= 0.0 {
            unit.health = clamp01(unit.health - self.config.starvation_damage);
        }

        if unit.health <= 0.0 {
            self.kill_unit(id, &unit);
        } else {
            match self.buildings.get(unit.home).map(|home| home.position) {
                Some(home) => self.act(&mut unit, home),
                None => debug!(team = %unit.team, "unit has no home; skipped"),
            }
        }

        if let Some(slot) = self.units.get_index_mut(index) {
            *slot = unit;
        }
    }

    fn kill_unit(&mut self, id: UnitId, unit: &Unit) {
        self.pending_deaths.push(id);
        self.tallies[unit.team.index()].deaths += 1;

        let delay = if unit.role.is_reproducer() {
            self.config.reproducer_respawn_delay_ticks
        } else {
            self.config.respawn_delay_ticks
        };
        match self
            .buildings
            .get_mut(unit.home)
            .and_then(|home| home.stores.as_mut())
        {
            Some(stores) => stores.respawn_queue.push(RespawnEntry {
                ticks_remaining: delay,
                role: unit.role,
            }),
            None => debug!(team = %unit.team, "dead unit has no home to respawn at"),
        }

        if unit.carried_food > 0 {
            self.foods.insert(FoodItem {
                position: unit.position,
            });
        }
        let spread = self.config.salvage_drop_jitter;
        for (kind, amount) in unit.carried.iter() {
            for _ in 0..amount {
                let dx = int_jitter(&mut self.rng, spread);
                let dy = int_jitter(&mut self.rng, spread);
                let position =
                    self.clamp_to_world(Position::new(unit.position.x + dx, unit.position.y + dy));
                self.resources.insert(ResourceItem { position, kind });
            }
        }
    }

    fn act(&mut self, unit: &mut Unit, home: Position) {
        if unit.energy < self.config.low_energy_threshold {
            self.head_home(unit, home);
            return;
        }
        let tether = self.config.tether_radius();
        if unit.position.dist_sq(home) > tether * tether {
            steer_towards(unit, home, &self.config, &mut self.rng);
            return;
        }
        match unit.role {
            Role::Scavenger => self.scavenger(unit, home),
            Role::Builder => self.builder(unit, home),
            Role::Defender => self.defender(unit, home),
            Role::Attacker => self.attacker(unit, home),
            Role::Reproducer => self.reproducer(unit, home),
        }
    }

    /// Move home; on arrival deposit everything carried and eat one ration.
    fn head_home(&mut self, unit: &mut Unit, home: Position) {
        steer_towards(unit, home, &self.config, &mut self.rng);
        let reach = self.config.home_reach();
        if unit.position.dist_sq(home) > reach * reach {
            return;
        }
        let Some(stores) = self
            .buildings
            .get_mut(unit.home)
            .and_then(|building| building.stores.as_mut())
        else {
            return;
        };
        let tally = &mut self.tallies[unit.team.index()];
        if unit.carried_food > 0 {
            stores.food += unit.carried_food as f32;
            tally.food_deposited += unit.carried_food;
            unit.carried_food = 0;
        }
        if unit.is_loaded() {
            let carried = unit.carried.take();
            tally.resources_deposited += carried.total();
            stores.resources.merge(carried);
        }
        unit.energy = stores.serve_ration(unit.energy, &self.config);
    }

    /// Follow the current waypoint, replacing it on arrival or timeout.
    fn wander(&mut self, unit: &mut Unit, home: Position) {
        let waypoint = match unit.waypoint {
            Some(waypoint) if waypoint.ticks_left > 0 => waypoint,
            _ => pick_waypoint(home, &self.config, &mut self.rng),
        };
        steer_towards(unit, waypoint.target, &self.config, &mut self.rng);
        unit.waypoint = Some(Waypoint {
            ticks_left: waypoint.ticks_left.saturating_sub(1),
            ..waypoint
        });
        let arrival = self.config.waypoint_arrival_radius;
        if unit.position.dist_sq(waypoint.target) < arrival * arrival {
            unit.waypoint = Some(pick_waypoint(home, &self.config, &mut self.rng));
        }
    }

    fn nearest_food(&self, from: Position) -> Option<(FoodId, Position)> {
        self.foods
            .iter()
            .map(|(id, food)| (id, food.position))
            .min_by_key(|(_, pos)| OrderedFloat(from.dist_sq(*pos)))
    }

    fn nearest_needed_resource(
        &self,
        from: Position,
        needed: &ResourceStock,
    ) -> Option<(ResourceId, Position)> {
        self.resources
            .iter()
            .filter(|(_, item)| needed.get(item.kind) > 0)
            .map(|(id, item)| (id, item.position))
            .min_by_key(|(_, pos)| OrderedFloat(from.dist_sq(*pos)))
    }

    /// Nearest living enemy non-reproducer, measured from `from`.
    fn nearest_enemy(&self, unit: &Unit, from: Position) -> Option<(usize, Position)> {
        self.units
            .as_slice()
            .iter()
            .enumerate()
            .filter(|(_, other)| {
                other.team != unit.team && !other.role.is_reproducer() && other.health > 0.0
            })
            .map(|(idx, other)| (idx, other.position))
            .min_by_key(|(_, pos)| OrderedFloat(from.dist_sq(*pos)))
    }

    fn damage_unit(&mut self, index: usize, amount: f32) {
        if let Some(target) = self.units.get_index_mut(index) {
            target.health = clamp01(target.health - amount);
        }
    }

    /// Chase `target`; deal `damage` while within melee range.
    fn strike(&mut self, unit: &mut Unit, target: (usize, Position), damage: f32) {
        steer_towards(unit, target.1, &self.config, &mut self.rng);
        let melee = self.config.melee_radius;
        if unit.position.dist_sq(target.1) < melee * melee {
            self.damage_unit(target.0, damage);
        }
    }

    fn scavenger(&mut self, unit: &mut Unit, home: Position) {
        if unit.carried_food > 0 {
            self.head_home(unit, home);
            return;
        }
        let Some((food_id, target)) = self.nearest_food(unit.position) else {
            self.wander(unit, home);
            return;
        };
        steer_towards(unit, target, &self.config, &mut self.rng);
        let collect = self.config.collect_radius;
        if unit.position.dist_sq(target) < collect * collect && self.foods.remove(food_id).is_some()
        {
            unit.carried_food += 1;
        }
    }

    /// First building type still under its per-team cap.
    fn build_plan(&self, unit: &Unit) -> Option<BuildingKind> {
        BuildingKind::BUILD_PRIORITY.into_iter().find(|&kind| {
            self.building_count(unit.team, kind) < self.config.building_caps.cap(kind)
        })
    }

    fn builder(&mut self, unit: &mut Unit, home: Position) {
        if !unit.carried.is_empty() {
            self.head_home(unit, home);
            return;
        }
        let Some(plan) = self.build_plan(unit) else {
            self.wander(unit, home);
            return;
        };
        let cost = self.config.build_costs.cost(plan);
        let stock = self
            .buildings
            .get(unit.home)
            .and_then(|building| building.stores.as_ref())
            .map(|stores| stores.resources)
            .unwrap_or_default();

        if !stock.covers(&cost) {
            let needed = stock.shortfall(&cost);
            match self.nearest_needed_resource(unit.position, &needed) {
                Some((resource_id, target)) => {
                    steer_towards(unit, target, &self.config, &mut self.rng);
                    let collect = self.config.collect_radius;
                    if unit.position.dist_sq(target) < collect * collect {
                        if let Some(item) = self.resources.remove(resource_id) {
                            unit.carried.add(item.kind, 1);
                        }
                    }
                }
                None => self.wander(unit, home),
            }
            return;
        }

        self.place_planned(unit, plan, home);
    }

    fn place_planned(&mut self, unit: &mut Unit, plan: BuildingKind, home: Position) {
        let cost = self.config.build_costs.cost(plan);
        let paid = self
            .buildings
            .get_mut(unit.home)
            .and_then(|building| building.stores.as_mut())
            .is_some_and(|stores| stores.resources.try_debit(&cost));
        if !paid {
            return;
        }
        let margin = self.config.build_margin;
        let dx = int_jitter(&mut self.rng, self.config.build_jitter);
        let dy = int_jitter(&mut self.rng, self.config.build_jitter);
        let position = Position::new(
            (home.x + dx).clamp(margin, self.config.world_width - margin),
            (home.y + dy).clamp(margin, self.config.world_height - margin),
        );
        if self.place_building(unit.team, plan, position).is_some() {
            self.tallies[unit.team.index()].builds_completed += 1;
        }
        unit.waypoint = None;
    }

    fn defender(&mut self, unit: &mut Unit, home: Position) {
        if let Some(target) = self.nearest_enemy(unit, home) {
            self.strike(unit, target, self.config.defender_damage);
            return;
        }
        let bearing = home.bearing_to(unit.position) + self.config.patrol_step;
        let radius = self.config.home_radius + self.config.patrol_offset;
        let target = Position::new(
            home.x + bearing.cos() * radius,
            home.y + bearing.sin() * radius,
        );
        steer_towards(unit, target, &self.config, &mut self.rng);
    }

    fn nearest_enemy_structure(&self, unit: &Unit) -> Option<(BuildingId, Position)> {
        self.buildings
            .iter()
            .filter(|(_, building)| building.team != unit.team && !building.kind.is_home())
            .map(|(id, building)| (id, building.position))
            .min_by_key(|(_, pos)| OrderedFloat(unit.position.dist_sq(*pos)))
    }

    fn attacker(&mut self, unit: &mut Unit, home: Position) {
        if !unit.carried.is_empty() {
            self.head_home(unit, home);
            return;
        }
        if let Some(target) = self.nearest_enemy(unit, unit.position) {
            self.strike(unit, target, self.config.attacker_unit_damage);
            return;
        }
        let Some((building_id, target)) = self.nearest_enemy_structure(unit) else {
            self.wander(unit, home);
            return;
        };
        steer_towards(unit, target, &self.config, &mut self.rng);
        let siege = self.config.siege_radius;
        if unit.position.dist_sq(target) < siege * siege {
            self.siege(unit, building_id);
        }
    }

    /// Siphon salvage from and damage an enemy building in contact.
    fn siege(&mut self, unit: &mut Unit, building_id: BuildingId) {
        let Some(building) = self.buildings.get_mut(building_id) else {
            return;
        };
        let cost = self.config.build_costs.cost(building.kind);
        let mut salvaged = 0;
        for (kind, amount) in cost.iter() {
            let salvage = salvage_amount(amount, self.config.salvage_rate);
            unit.carried.add(kind, salvage);
            salvaged += salvage;
        }
        self.tallies[unit.team.index()].salvage_taken += salvaged;

        building.hit_points -= self.config.attacker_building_damage;
        if building.hit_points <= 0.0 {
            let owner = building.team;
            self.buildings.remove(building_id);
            self.tallies[owner.index()].buildings_lost += 1;
        }
    }

    fn reproducer(&mut self, unit: &mut Unit, home: Position) {
        let reach = self.config.home_reach();
        if unit.position.dist_sq(home) > reach * reach {
            self.head_home(unit, home);
            return;
        }
        if let Some(stores) = self
            .buildings
            .get_mut(unit.home)
            .and_then(|building| building.stores.as_mut())
        {
            unit.energy = stores.serve_ration(unit.energy, &self.config);
        }
    }
}
