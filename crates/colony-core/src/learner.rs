//! Cross-round role-weight learning.
//!
//! After every round the winner's weights drift toward the composition of its
//! survivors while every other team only receives a small undirected shake.
//! Weights are renormalized to a fixed sum after every update so repeated rounds
//! can never drive them to zero, negative or unbounded values.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::world::WorldStateError;
use crate::{RoleCounts, TeamId};

/// Per-team weights in [`crate::Role::LEARNED`] order (scavenger, builder, defender, attacker).
pub type RoleWeights = [f64; 4];

/// Tunables of the weight update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearnerConfig {
    /// Every updated vector sums to this value.
    pub normalization_sum: f64,
    /// Weights used when no valid persisted state exists.
    pub default_weights: RoleWeights,
    /// Symmetric multiplicative jitter applied to every team on a draw.
    pub draw_jitter: f64,
    /// Floor applied to every weight on a draw.
    pub draw_floor: f64,
    /// Boost factor scaled by each role's share of the winner's survivors.
    pub win_boost: f64,
    /// Floor applied to the winner's boosted weights.
    pub win_floor: f64,
    /// Lower bound of the winner's multiplicative jitter.
    pub win_jitter_low: f64,
    /// Upper bound of the winner's multiplicative jitter.
    pub win_jitter_high: f64,
    /// Symmetric multiplicative jitter applied to losing teams.
    pub loss_jitter: f64,
    /// Floor applied to losing teams' weights.
    pub loss_floor: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            normalization_sum: 10.0,
            default_weights: [5.0, 2.0, 2.0, 1.0],
            draw_jitter: 0.03,
            draw_floor: 0.5,
            win_boost: 0.10,
            win_floor: 0.3,
            win_jitter_low: -0.02,
            win_jitter_high: 0.04,
            loss_jitter: 0.05,
            loss_floor: 0.3,
        }
    }
}

impl LearnerConfig {
    /// Rejects settings that could produce negative or non-finite weights.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        let values = [
            self.normalization_sum,
            self.draw_jitter,
            self.draw_floor,
            self.win_boost,
            self.win_floor,
            self.win_jitter_low,
            self.win_jitter_high,
            self.loss_jitter,
            self.loss_floor,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(WorldStateError::InvalidConfig(
                "learner parameters must be finite",
            ));
        }
        if self.normalization_sum <= 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "learner normalization_sum must be positive",
            ));
        }
        if self.draw_floor < 0.0 || self.win_floor < 0.0 || self.loss_floor < 0.0 {
            return Err(WorldStateError::InvalidConfig(
                "learner floors must be non-negative",
            ));
        }
        if !(0.0..1.0).contains(&self.draw_jitter)
            || !(0.0..1.0).contains(&self.loss_jitter)
            || self.win_jitter_low <= -1.0
            || self.win_jitter_low > self.win_jitter_high
            || self.win_boost < 0.0
        {
            return Err(WorldStateError::InvalidConfig(
                "learner jitters must keep multipliers positive",
            ));
        }
        if !weights_are_valid(&self.default_weights) {
            return Err(WorldStateError::InvalidConfig(
                "learner default_weights must be non-negative with a positive sum",
            ));
        }
        Ok(())
    }
}

fn weights_are_valid(weights: &RoleWeights) -> bool {
    weights.iter().all(|w| w.is_finite() && *w >= 0.0) && weights.iter().sum::<f64>() > 0.0
}

/// Scale `weights` to sum to `sum`; degenerate input maps to an even split.
#[must_use]
pub fn normalize_weights(weights: RoleWeights, sum: f64) -> RoleWeights {
    let total: f64 = weights.iter().sum();
    if total > 0.0 && total.is_finite() {
        weights.map(|w| w / total * sum)
    } else {
        [sum / 4.0; 4]
    }
}

fn jitter(rng: &mut impl Rng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.random_range(low..high)
    } else {
        low
    }
}

fn shake(
    weights: &RoleWeights,
    amplitude: f64,
    floor: f64,
    sum: f64,
    rng: &mut impl Rng,
) -> RoleWeights {
    let shaken = weights.map(|w| (w.max(0.0) * (1.0 + jitter(rng, -amplitude, amplitude))).max(floor));
    normalize_weights(shaken, sum)
}

/// Compute the next weight vectors from a finished round.
///
/// `winner` is `None` for a draw; a winner outside `weights` is treated as a
/// draw. `survivors` holds each team's surviving non-reproducer counts by role;
/// missing entries count as no survivors.
#[must_use]
pub fn update_weights(
    weights: &[RoleWeights],
    winner: Option<TeamId>,
    survivors: &[RoleCounts],
    config: &LearnerConfig,
    rng: &mut impl Rng,
) -> Vec<RoleWeights> {
    let sum = config.normalization_sum;
    let winner = winner.map(TeamId::index).filter(|&idx| idx < weights.len());
    let Some(winner) = winner else {
        return weights
            .iter()
            .map(|w| shake(w, config.draw_jitter, config.draw_floor, sum, rng))
            .collect();
    };

    weights
        .iter()
        .enumerate()
        .map(|(team, base)| {
            if team != winner {
                return shake(base, config.loss_jitter, config.loss_floor, sum, rng);
            }
            let counts = survivors.get(team).copied().unwrap_or_default();
            let total = match counts.total() {
                0 => 1.0,
                n => f64::from(n),
            };
            let mut boosted = [0.0; 4];
            for (slot, value) in boosted.iter_mut().enumerate() {
                let share = f64::from(counts.0[slot]) / total;
                let grown = (base[slot].max(0.0) * (1.0 + config.win_boost * share))
                    .max(config.win_floor);
                *value = grown * (1.0 + jitter(rng, config.win_jitter_low, config.win_jitter_high));
            }
            normalize_weights(boosted, sum)
        })
        .collect()
}

/// Round-persistent learning state: one weight vector per team plus a round counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaState {
    pub role_weights: Vec<RoleWeights>,
    pub rounds: u64,
}

impl MetaState {
    /// Fresh state for `team_count` teams.
    #[must_use]
    pub fn default_for(team_count: usize, config: &LearnerConfig) -> Self {
        Self {
            role_weights: vec![config.default_weights; team_count],
            rounds: 0,
        }
    }

    /// True when the state matches the team count and every vector is usable.
    #[must_use]
    pub fn is_valid_for(&self, team_count: usize) -> bool {
        self.role_weights.len() == team_count && self.role_weights.iter().all(weights_are_valid)
    }

    /// Returns `self` if usable for `team_count` teams, otherwise the default state.
    #[must_use]
    pub fn sanitized(self, team_count: usize, config: &LearnerConfig) -> Self {
        if self.is_valid_for(team_count) {
            self
        } else {
            Self::default_for(team_count, config)
        }
    }

    /// Fold a finished round into the state.
    pub fn record_round(
        &mut self,
        winner: Option<TeamId>,
        survivors: &[RoleCounts],
        config: &LearnerConfig,
        rng: &mut impl Rng,
    ) {
        self.role_weights = update_weights(&self.role_weights, winner, survivors, config, rng);
        self.rounds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn quiet() -> LearnerConfig {
        LearnerConfig {
            draw_jitter: 0.0,
            win_jitter_low: 0.0,
            win_jitter_high: 0.0,
            loss_jitter: 0.0,
            ..LearnerConfig::default()
        }
    }

    fn assert_normalized(weights: &RoleWeights) {
        assert!(weights.iter().all(|w| *w >= 0.0 && w.is_finite()), "{weights:?}");
        let sum: f64 = weights.iter().sum();
        assert!((sum - 10.0).abs() < 1e-9, "sum was {sum}");
    }

    #[test]
    fn normalize_handles_degenerate_input() {
        assert_eq!(normalize_weights([0.0; 4], 10.0), [2.5; 4]);
        assert_eq!(normalize_weights([f64::NAN, 1.0, 1.0, 1.0], 10.0), [2.5; 4]);
        assert_eq!(normalize_weights([1.0, 1.0, 2.0, 1.0], 10.0), [2.0, 2.0, 4.0, 2.0]);
    }

    #[test]
    fn winner_drifts_toward_surviving_roles() {
        let mut rng = SmallRng::seed_from_u64(1);
        let weights = vec![[5.0, 2.0, 2.0, 1.0]; 2];
        let survivors = [RoleCounts([4, 0, 0, 0]), RoleCounts([0, 0, 0, 0])];
        let next = update_weights(&weights, Some(TeamId(0)), &survivors, &quiet(), &mut rng);

        let winner = next[0];
        assert_normalized(&winner);
        assert!((winner[0] - 5.5 / 1.05).abs() < 1e-9);
        assert!(winner[1] < 2.0 && winner[2] < 2.0 && winner[3] < 1.0);

        // No jitter: the loser just renormalizes to itself.
        for (got, want) in next[1].iter().zip([5.0, 2.0, 2.0, 1.0]) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn winner_without_survivors_keeps_its_shape() {
        let mut rng = SmallRng::seed_from_u64(2);
        let weights = vec![[5.0, 2.0, 2.0, 1.0]; 2];
        let next = update_weights(&weights, Some(TeamId(1)), &[], &quiet(), &mut rng);
        for (got, want) in next[1].iter().zip([5.0, 2.0, 2.0, 1.0]) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn draw_floors_collapsed_weights() {
        let mut rng = SmallRng::seed_from_u64(3);
        let weights = vec![[10.0, 0.0, 0.0, 0.0]];
        let next = update_weights(&weights, None, &[], &quiet(), &mut rng);
        assert_normalized(&next[0]);
        assert!(next[0][1] > 0.0, "floor keeps every role selectable");
    }

    #[test]
    fn out_of_range_winner_is_a_draw() {
        let mut rng_a = SmallRng::seed_from_u64(4);
        let mut rng_b = SmallRng::seed_from_u64(4);
        let weights = vec![[5.0, 2.0, 2.0, 1.0]; 2];
        let config = LearnerConfig::default();
        let as_draw = update_weights(&weights, None, &[], &config, &mut rng_a);
        let bad_winner = update_weights(&weights, Some(TeamId(7)), &[], &config, &mut rng_b);
        assert_eq!(as_draw, bad_winner);
    }

    #[test]
    fn weights_stay_normalized_over_many_rounds() {
        let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
        let config = LearnerConfig::default();
        let mut meta = MetaState::default_for(3, &config);
        for round in 0..5_000u32 {
            let survivors: Vec<RoleCounts> = (0..3)
                .map(|_| RoleCounts([0u32; 4].map(|_| rng.random_range(0..6))))
                .collect();
            let winner = match round % 4 {
                0 => None,
                n => Some(TeamId((n - 1) as u8)),
            };
            meta.record_round(winner, &survivors, &config, &mut rng);
            for weights in &meta.role_weights {
                assert_normalized(weights);
            }
        }
        assert_eq!(meta.rounds, 5_000);
    }

    #[test]
    fn sanitize_replaces_mismatched_state() {
        let config = LearnerConfig::default();
        let wrong_teams = MetaState {
            role_weights: vec![[1.0; 4]],
            rounds: 9,
        };
        assert_eq!(
            wrong_teams.sanitized(2, &config),
            MetaState::default_for(2, &config)
        );

        let negative = MetaState {
            role_weights: vec![[1.0, -1.0, 1.0, 1.0], [1.0; 4]],
            rounds: 3,
        };
        assert!(!negative.is_valid_for(2));

        let fine = MetaState {
            role_weights: vec![[1.0; 4], [2.0; 4]],
            rounds: 3,
        };
        assert_eq!(fine.clone().sanitized(2, &config), fine);
    }

    #[test]
    fn validate_rejects_sign_flipping_jitter() {
        let config = LearnerConfig {
            loss_jitter: 1.5,
            ..LearnerConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(LearnerConfig::default().validate().is_ok());
    }
}
