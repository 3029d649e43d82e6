use colony_core::{
    ColonyConfig, MetaState, Role, Simulation, StartingRoster, TeamId, Tick, WorldState,
};

fn seeded(seed: u64) -> ColonyConfig {
    ColonyConfig {
        rng_seed: Some(seed),
        ..ColonyConfig::default()
    }
}

#[test]
fn seeded_world_advances_deterministically() {
    let mut a = WorldState::new(seeded(0xC0FFEE)).expect("world a");
    let mut b = WorldState::new(seeded(0xC0FFEE)).expect("world b");
    for _ in 0..600 {
        let ea = a.step();
        let eb = b.step();
        assert_eq!(ea, eb);
    }
    assert_eq!(a.tick(), Tick(600));
    assert_eq!(a.snapshot(), b.snapshot());
}

#[test]
fn seeded_simulation_is_deterministic_across_round_ends() {
    let config = ColonyConfig {
        round_max_ticks: 150,
        ..seeded(21)
    };
    let mut a = Simulation::new(config.clone()).expect("sim a");
    let mut b = Simulation::new(config).expect("sim b");
    for _ in 0..700 {
        assert_eq!(a.step(), b.step());
    }
    assert_eq!(a.meta(), b.meta());
    assert!(a.meta().rounds >= 4);
    assert_eq!(a.world().snapshot(), b.world().snapshot());
}

#[test]
fn unit_and_stockpile_bounds_hold_every_tick() {
    let config = ColonyConfig {
        round_max_ticks: 900,
        ..seeded(99)
    };
    let mut sim = Simulation::new(config).expect("sim");
    for _ in 0..3_000 {
        sim.step();
        let world = sim.world();
        for (_, unit) in world.units().iter() {
            assert!((0.0..=1.0).contains(&unit.energy), "energy {}", unit.energy);
            assert!((0.0..=1.0).contains(&unit.health), "health {}", unit.health);
            let home = world.building(unit.home).expect("home exists");
            assert_eq!(home.team, unit.team);
            assert!(home.kind.is_home());
        }
        for (_, building) in world.buildings() {
            if let Some(stores) = building.stores.as_ref() {
                assert!(stores.food >= 0.0, "food {}", stores.food);
            }
        }
        for team in 0..2 {
            let homes = world
                .buildings()
                .filter(|(_, b)| b.team == TeamId(team) && b.kind.is_home())
                .count();
            assert_eq!(homes, 1);
        }
    }
}

#[test]
fn each_death_is_removed_exactly_once() {
    let mut world = WorldState::new(seeded(4)).expect("world");
    let mut removed = 0;
    for _ in 0..2_500 {
        removed += world.step().deaths;
    }
    let tallied: u32 = world.tallies().iter().map(|t| t.deaths).sum();
    assert_eq!(removed, tallied as usize);
}

#[test]
fn builds_match_structures_without_attackers() {
    let config = ColonyConfig {
        starting_roster: StartingRoster {
            attacker: 0,
            ..StartingRoster::default()
        },
        ..seeded(17)
    };
    let mut world = WorldState::new(config).expect("world");
    world.set_role_weights(vec![[5.0, 3.0, 2.0, 0.0]; 2]);
    for _ in 0..3_000 {
        world.step();
        assert!(world.units().iter().all(|(_, u)| u.role != Role::Attacker));
    }
    let mut total_builds = 0;
    for team in 0..2u8 {
        let built = world.tallies()[usize::from(team)].builds_completed as usize;
        assert_eq!(world.non_home_building_count(TeamId(team)), built);
        total_builds += built;
    }
    assert!(total_builds > 0, "builders placed at least one structure");
}

#[test]
fn learned_weights_stay_normalized_over_many_rounds() {
    let config = ColonyConfig {
        round_max_ticks: 40,
        ..seeded(8)
    };
    let meta = MetaState::default_for(2, &config.learner);
    let mut sim = Simulation::with_persistence(config, meta, Box::new(colony_core::NullPersistence))
        .expect("sim");
    let mut rounds = 0;
    while rounds < 25 {
        if let Some(record) = sim.step().round_end {
            rounds += 1;
            for weights in &record.weights {
                let sum: f64 = weights.iter().sum();
                assert!((sum - 10.0).abs() < 1e-9, "sum {sum}");
                assert!(weights.iter().all(|w| *w >= 0.0 && w.is_finite()));
            }
        }
    }
    assert_eq!(sim.meta().rounds, 25);
}

#[test]
fn snapshot_serializes_for_presentation() {
    let world = WorldState::new(seeded(1)).expect("world");
    let json = serde_json::to_value(world.snapshot()).expect("serialize");
    assert_eq!(json["tick"], 0);
    assert_eq!(json["units"].as_array().map(Vec::len), Some(30));
    assert_eq!(json["buildings"][0]["kind"], "home");
    assert!(json["buildings"][0]["food"].is_number());
}
