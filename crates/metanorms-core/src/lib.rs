//! Core engine for the evolutionary meta-norms game.
//!
//! A population of agents plays a repeated, observable n-person Prisoner's
//! Dilemma. Defectors may be seen and punished, and observers who let a
//! defection slide may in turn be seen and meta-punished. Scores accumulated
//! over a generation drive replication, after which traits mutate by flipping
//! bits of their 3-bit genotype.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod agent;
pub mod evolution;
pub mod selection;
pub mod stage;

pub use agent::{Agent, TRAIT_BITS, TRAIT_LEVELS, TraitError, TraitLevel};
pub use evolution::{
    Evolution, EvolutionObserver, GenerationRecord, Harness, NullObserver, Population, RunSummary,
    TraitSummary, run_generation,
};
pub use selection::{mutate, replicate};
pub use stage::{GenerationTally, StageOutcome, run_stage};

/// Generation counter within one evolutionary run.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct Generation(pub u32);

impl Generation {
    /// Advances to the next generation.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Errors raised while validating a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Payoff and cost constants applied during a stage.
///
/// Costs are stored as non-positive numbers and added to scores directly,
/// the temptation as a non-negative gain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Payoffs {
    /// Gain credited to a defector.
    pub temptation_to_defect: f64,
    /// Loss suffered by every other agent, once per defector.
    pub hurt_suffered_by_others: f64,
    /// Loss suffered by a defector for each punisher.
    pub cost_of_being_punished: f64,
    /// Loss paid by a punisher for each punishment it hands out.
    pub enforcement_cost_punishment: f64,
    /// Loss suffered by a non-punisher for each meta-punisher.
    pub cost_of_being_meta_punished: f64,
    /// Loss paid by a meta-punisher for each meta-punishment.
    pub enforcement_cost_meta_punishment: f64,
}

impl Default for Payoffs {
    fn default() -> Self {
        Self {
            temptation_to_defect: 3.0,
            hurt_suffered_by_others: -1.0,
            cost_of_being_punished: -9.0,
            enforcement_cost_punishment: -2.0,
            cost_of_being_meta_punished: -9.0,
            enforcement_cost_meta_punishment: -2.0,
        }
    }
}

impl Payoffs {
    fn costs(&self) -> [f64; 5] {
        [
            self.hurt_suffered_by_others,
            self.cost_of_being_punished,
            self.enforcement_cost_punishment,
            self.cost_of_being_meta_punished,
            self.enforcement_cost_meta_punishment,
        ]
    }
}

/// Which flavour of the game a stage plays.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum GameVariant {
    /// Defection, observation and first-order punishment only.
    Norms,
    /// Adds meta-observation and meta-punishment of non-punishers.
    #[default]
    MetaNorms,
}

impl GameVariant {
    /// Whether the meta-observation and meta-punishment passes run.
    #[must_use]
    pub const fn has_meta_punishment(self) -> bool {
        matches!(self, Self::MetaNorms)
    }
}

/// How the mutation operator perturbs trait genotypes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MutationScheme {
    /// One trial per agent; on success, flip `bit` in all three traits.
    FixedBit { bit: u8 },
    /// One trial per agent, trait and bit position; each success flips one bit.
    EachBit,
}

impl Default for MutationScheme {
    fn default() -> Self {
        Self::FixedBit { bit: 0 }
    }
}

/// Static configuration for a meta-norms experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetaNormsConfig {
    /// Population size, held constant across generations.
    pub num_agents: usize,
    /// Stages played per generation before selection.
    pub games_per_generation: u32,
    /// Generations evolved per simulation run.
    pub num_generations: u32,
    /// Independent simulation runs performed by the harness.
    pub num_simulations: u32,
    /// Payoff and cost constants.
    pub payoffs: Payoffs,
    /// Probability that mutation fires (per agent or per bit, depending on scheme).
    pub mutation_probability: f64,
    /// Mutation operator.
    pub mutation: MutationScheme,
    /// Game flavour.
    pub variant: GameVariant,
    /// Optional RNG seed for reproducible experiments.
    pub rng_seed: Option<u64>,
}

impl Default for MetaNormsConfig {
    fn default() -> Self {
        Self {
            num_agents: 20,
            games_per_generation: 4,
            num_generations: 100,
            num_simulations: 5,
            payoffs: Payoffs::default(),
            mutation_probability: 0.01,
            mutation: MutationScheme::default(),
            variant: GameVariant::default(),
            rng_seed: None,
        }
    }
}

impl MetaNormsConfig {
    /// Checks every field, rejecting values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_agents == 0 {
            return Err(ConfigError::InvalidConfig("num_agents must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.mutation_probability) {
            return Err(ConfigError::InvalidConfig(
                "mutation_probability must lie in [0, 1]",
            ));
        }
        if let MutationScheme::FixedBit { bit } = self.mutation {
            if u32::from(bit) >= TRAIT_BITS {
                return Err(ConfigError::InvalidConfig(
                    "mutation bit must index one of the three trait bits",
                ));
            }
        }
        let temptation = self.payoffs.temptation_to_defect;
        if !temptation.is_finite() || temptation < 0.0 {
            return Err(ConfigError::InvalidConfig(
                "temptation_to_defect must be finite and non-negative",
            ));
        }
        if self
            .payoffs
            .costs()
            .iter()
            .any(|cost| !cost.is_finite() || *cost > 0.0)
        {
            return Err(ConfigError::InvalidConfig(
                "hurt, punishment, and enforcement costs must be finite and non-positive",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Mean and population standard deviation of `values`; `(0, 0)` when empty.
#[must_use]
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>()
        / count;
    (mean, variance.sqrt())
}
