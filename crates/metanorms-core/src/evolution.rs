//! Generation runner, evolution driver and multi-run harness.

use rand::{RngCore, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    ConfigError, Generation, MetaNormsConfig,
    agent::Agent,
    mean_and_std,
    selection::{mutate, replicate},
    stage::{GenerationTally, run_stage},
};

/// Mean and population standard deviation of each trait.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TraitSummary {
    pub mean_boldness: f64,
    pub mean_vengefulness: f64,
    pub mean_meta_vengefulness: f64,
    pub std_boldness: f64,
    pub std_vengefulness: f64,
    pub std_meta_vengefulness: f64,
}

impl TraitSummary {
    /// Summarize the trait values of `agents`.
    #[must_use]
    pub fn from_agents(agents: &[Agent]) -> Self {
        let (mean_boldness, std_boldness) = trait_column(agents, |agent| agent.boldness.value());
        let (mean_vengefulness, std_vengefulness) =
            trait_column(agents, |agent| agent.vengefulness.value());
        let (mean_meta_vengefulness, std_meta_vengefulness) =
            trait_column(agents, |agent| agent.meta_vengefulness.value());
        Self {
            mean_boldness,
            mean_vengefulness,
            mean_meta_vengefulness,
            std_boldness,
            std_vengefulness,
            std_meta_vengefulness,
        }
    }

    /// The six statistics as `(means..., std-devs...)`.
    #[must_use]
    pub const fn as_tuple(&self) -> (f64, f64, f64, f64, f64, f64) {
        (
            self.mean_boldness,
            self.mean_vengefulness,
            self.mean_meta_vengefulness,
            self.std_boldness,
            self.std_vengefulness,
            self.std_meta_vengefulness,
        )
    }
}

fn trait_column(agents: &[Agent], pick: impl Fn(&Agent) -> f64) -> (f64, f64) {
    let values: Vec<f64> = agents.iter().map(pick).collect();
    mean_and_std(&values)
}

/// Agents plus the scores they have accumulated in the current generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    agents: Vec<Agent>,
    scores: Vec<f64>,
}

impl Population {
    /// Population of `size` agents with uniformly drawn traits.
    pub fn random(size: usize, rng: &mut dyn RngCore) -> Self {
        let agents = (0..size).map(|_| Agent::random(&mut *rng)).collect();
        Self::from_agents(agents)
    }

    /// Wrap existing agents with zeroed scores.
    #[must_use]
    pub fn from_agents(agents: Vec<Agent>) -> Self {
        let scores = vec![0.0; agents.len()];
        Self { agents, scores }
    }

    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    #[must_use]
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    #[must_use]
    pub fn trait_summary(&self) -> TraitSummary {
        TraitSummary::from_agents(&self.agents)
    }

    fn replace_agents(&mut self, agents: Vec<Agent>) {
        assert_eq!(
            agents.len(),
            self.agents.len(),
            "population size is fixed across generations"
        );
        self.agents = agents;
        self.scores.iter_mut().for_each(|score| *score = 0.0);
    }
}

/// Play `games_per_generation` stages, accumulating deltas into the scores.
pub fn run_generation(
    population: &mut Population,
    config: &MetaNormsConfig,
    rng: &mut dyn RngCore,
) -> GenerationTally {
    let mut tally = GenerationTally::default();
    for _ in 0..config.games_per_generation {
        let outcome = run_stage(&population.agents, &config.payoffs, config.variant, rng);
        for (score, delta) in population.scores.iter_mut().zip(&outcome.deltas) {
            *score += delta;
        }
        tally.absorb(&outcome);
    }
    tally
}

/// Snapshot emitted after each generation's selection and mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub simulation: u32,
    /// Generation number after advancing (the first record carries 1).
    pub generation: Generation,
    pub tally: GenerationTally,
    /// Mean accumulated score before replication.
    pub score_mean: f64,
    /// Standard deviation of accumulated scores before replication.
    pub score_std: f64,
    /// Bits flipped by mutation.
    pub mutations: usize,
    /// Trait statistics of the population after mutation.
    pub traits: TraitSummary,
}

/// Hook invoked after every generation.
pub trait EvolutionObserver {
    fn on_generation(&mut self, record: &GenerationRecord);
}

/// No-op observer.
#[derive(Debug, Default)]
pub struct NullObserver;

impl EvolutionObserver for NullObserver {
    fn on_generation(&mut self, _record: &GenerationRecord) {}
}

/// One evolutionary run over a fixed-size population.
#[derive(Debug, Clone)]
pub struct Evolution {
    config: MetaNormsConfig,
    simulation: u32,
    generation: Generation,
    population: Population,
}

impl Evolution {
    /// Start a run from a uniformly random population.
    pub fn new(config: MetaNormsConfig, rng: &mut dyn RngCore) -> Result<Self, ConfigError> {
        config.validate()?;
        let population = Population::random(config.num_agents, rng);
        Ok(Self::from_parts(config, population))
    }

    /// Start a run from a supplied population.
    pub fn with_population(
        config: MetaNormsConfig,
        population: Population,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if population.len() != config.num_agents {
            return Err(ConfigError::InvalidConfig(
                "population size must match num_agents",
            ));
        }
        Ok(Self::from_parts(config, population))
    }

    fn from_parts(config: MetaNormsConfig, population: Population) -> Self {
        Self {
            config,
            simulation: 0,
            generation: Generation::default(),
            population,
        }
    }

    /// Tag emitted records with the harness run index.
    #[must_use]
    pub fn with_simulation_index(mut self, simulation: u32) -> Self {
        self.simulation = simulation;
        self
    }

    #[must_use]
    pub fn config(&self) -> &MetaNormsConfig {
        &self.config
    }

    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Run one generation of stages, then replicate and mutate.
    pub fn step(&mut self, rng: &mut dyn RngCore) -> GenerationRecord {
        let tally = run_generation(&mut self.population, &self.config, rng);
        let (score_mean, score_std) = mean_and_std(self.population.scores());

        let mut next = replicate(self.population.agents(), self.population.scores(), rng);
        let mutations = mutate(
            &mut next,
            self.config.mutation,
            self.config.mutation_probability,
            rng,
        );
        self.population.replace_agents(next);
        self.generation = self.generation.next();

        let traits = self.population.trait_summary();
        debug!(
            simulation = self.simulation,
            generation = self.generation.0,
            defections = tally.defections,
            punishments = tally.punishments,
            meta_punishments = tally.meta_punishments,
            mutations,
            mean_boldness = traits.mean_boldness,
            mean_vengefulness = traits.mean_vengefulness,
            "generation complete"
        );
        GenerationRecord {
            simulation: self.simulation,
            generation: self.generation,
            tally,
            score_mean,
            score_std,
            mutations,
            traits,
        }
    }

    /// Evolve for `num_generations`, returning the final trait statistics.
    pub fn run(
        &mut self,
        rng: &mut dyn RngCore,
        observer: &mut dyn EvolutionObserver,
    ) -> TraitSummary {
        for _ in 0..self.config.num_generations {
            let record = self.step(rng);
            observer.on_generation(&record);
        }
        self.population.trait_summary()
    }
}

/// Final statistics of one harness run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub simulation: u32,
    pub traits: TraitSummary,
}

/// Repeats independent evolutionary runs from one shared random source.
#[derive(Debug)]
pub struct Harness {
    config: MetaNormsConfig,
    rng: SmallRng,
}

impl Harness {
    /// Validate `config` and seed the shared source from it.
    pub fn new(config: MetaNormsConfig) -> Result<Self, ConfigError> {
        let rng = config.seeded_rng();
        Self::with_rng(config, rng)
    }

    /// Validate `config` and use an explicit source.
    pub fn with_rng(config: MetaNormsConfig, rng: SmallRng) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, rng })
    }

    #[must_use]
    pub fn config(&self) -> &MetaNormsConfig {
        &self.config
    }

    /// Run every simulation, discarding per-generation records.
    pub fn run(&mut self) -> Vec<RunSummary> {
        self.run_with_observer(&mut NullObserver)
    }

    /// Run every simulation, reporting each generation to `observer`.
    pub fn run_with_observer(&mut self, observer: &mut dyn EvolutionObserver) -> Vec<RunSummary> {
        let mut summaries = Vec::with_capacity(self.config.num_simulations as usize);
        for simulation in 0..self.config.num_simulations {
            let population = Population::random(self.config.num_agents, &mut self.rng);
            let mut evolution = Evolution::from_parts(self.config.clone(), population)
                .with_simulation_index(simulation);
            let traits = evolution.run(&mut self.rng, observer);
            info!(
                simulation,
                generations = self.config.num_generations,
                mean_boldness = traits.mean_boldness,
                mean_vengefulness = traits.mean_vengefulness,
                mean_meta_vengefulness = traits.mean_meta_vengefulness,
                "simulation finished"
            );
            summaries.push(RunSummary { simulation, traits });
        }
        summaries
    }
}
