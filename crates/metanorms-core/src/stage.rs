//! One stage of the observable dilemma: defection, observation, punishment,
//! meta-observation and meta-punishment.
//!
//! Every random draw is taken from the injected source in pass order, so a
//! seeded source reproduces a stage exactly.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{GameVariant, Payoffs, agent::Agent};

/// Score deltas and event counts produced by one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StageOutcome {
    /// Per-agent score change, indexed like the population.
    pub deltas: Vec<f64>,
    pub defections: usize,
    /// Observer/defector pairs where the defection was seen.
    pub observations: usize,
    pub punishments: usize,
    /// (meta-observer, non-punisher, defector) triples where the omission was seen.
    pub meta_observations: usize,
    pub meta_punishments: usize,
}

impl StageOutcome {
    /// Whether nobody defected this stage.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.defections == 0
    }
}

/// Event counts accumulated over the stages of a generation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationTally {
    pub stages: u32,
    pub defections: usize,
    pub observations: usize,
    pub punishments: usize,
    pub meta_observations: usize,
    pub meta_punishments: usize,
}

impl GenerationTally {
    /// Fold one stage's counts into the tally.
    pub fn absorb(&mut self, outcome: &StageOutcome) {
        self.stages += 1;
        self.defections += outcome.defections;
        self.observations += outcome.observations;
        self.punishments += outcome.punishments;
        self.meta_observations += outcome.meta_observations;
        self.meta_punishments += outcome.meta_punishments;
    }
}

/// Costs are stored as non-positive constants but always charged as losses.
fn loss(cost: f64) -> f64 {
    -cost.abs()
}

/// Relations recorded during a single stage.
///
/// Pair tables hold one row per defector, so a quiet stage allocates nothing
/// beyond the defection flags.
struct StageBoard {
    agents: usize,
    defects: Vec<bool>,
    defectors: Vec<usize>,
    // sees[row(defector)][observer]
    sees: Vec<bool>,
    // punishes[row(defector)][observer]
    punishes: Vec<bool>,
    slides: Vec<LetSlide>,
}

/// An observer who saw a defection and did not punish it, plus whoever saw
/// that omission.
struct LetSlide {
    non_punisher: usize,
    defector: usize,
    meta_observers: Vec<usize>,
}

impl StageBoard {
    fn new(agents: usize) -> Self {
        Self {
            agents,
            defects: vec![false; agents],
            defectors: Vec::new(),
            sees: Vec::new(),
            punishes: Vec::new(),
            slides: Vec::new(),
        }
    }

    /// Freeze the defector list and size the pair tables to it.
    fn seal_defectors(&mut self) {
        self.defectors = self
            .defects
            .iter()
            .enumerate()
            .filter_map(|(idx, defected)| defected.then_some(idx))
            .collect();
        let cells = self.defectors.len() * self.agents;
        self.sees = vec![false; cells];
        self.punishes = vec![false; cells];
    }

    fn pair(&self, row: usize, observer: usize) -> usize {
        row * self.agents + observer
    }

    /// Saw the defector in `row` defect but let it go unpunished.
    fn let_slide(&self, row: usize, observer: usize) -> bool {
        let pair = self.pair(row, observer);
        self.sees[pair] && !self.punishes[pair]
    }
}

/// Play one stage among `agents`, returning per-agent score deltas.
pub fn run_stage(
    agents: &[Agent],
    payoffs: &Payoffs,
    variant: GameVariant,
    rng: &mut dyn RngCore,
) -> StageOutcome {
    let count = agents.len();
    let mut board = StageBoard::new(count);
    let mut outcome = StageOutcome {
        deltas: vec![0.0; count],
        ..StageOutcome::default()
    };

    stage_defection(agents, payoffs, &mut board, &mut outcome, rng);
    let p_seen = rng.random::<f64>();
    stage_observation(p_seen, &mut board, &mut outcome, rng);
    stage_punishment(agents, payoffs, &mut board, &mut outcome, rng);
    if variant.has_meta_punishment() {
        stage_meta_observation(p_seen, &mut board, &mut outcome, rng);
        stage_meta_punishment(agents, payoffs, &board, &mut outcome, rng);
    }
    outcome
}

fn stage_defection(
    agents: &[Agent],
    payoffs: &Payoffs,
    board: &mut StageBoard,
    outcome: &mut StageOutcome,
    rng: &mut dyn RngCore,
) {
    for (idx, agent) in agents.iter().enumerate() {
        board.defects[idx] = agent.decides_defect(rng);
    }
    board.seal_defectors();

    let hurt = loss(payoffs.hurt_suffered_by_others);
    for &defector in &board.defectors {
        for (idx, delta) in outcome.deltas.iter_mut().enumerate() {
            if idx == defector {
                *delta += payoffs.temptation_to_defect;
            } else {
                *delta += hurt;
            }
        }
    }
    outcome.defections = board.defectors.len();
}

fn stage_observation(
    p_seen: f64,
    board: &mut StageBoard,
    outcome: &mut StageOutcome,
    rng: &mut dyn RngCore,
) {
    for row in 0..board.defectors.len() {
        let defector = board.defectors[row];
        for observer in 0..board.agents {
            if observer == defector {
                continue;
            }
            if rng.random::<f64>() < p_seen {
                let pair = board.pair(row, observer);
                board.sees[pair] = true;
                outcome.observations += 1;
            }
        }
    }
}

fn stage_punishment(
    agents: &[Agent],
    payoffs: &Payoffs,
    board: &mut StageBoard,
    outcome: &mut StageOutcome,
    rng: &mut dyn RngCore,
) {
    let punished = loss(payoffs.cost_of_being_punished);
    let enforcement = loss(payoffs.enforcement_cost_punishment);
    for row in 0..board.defectors.len() {
        let defector = board.defectors[row];
        for (observer, agent) in agents.iter().enumerate() {
            let pair = board.pair(row, observer);
            if !board.sees[pair] || !agent.decides_punish(rng) {
                continue;
            }
            outcome.deltas[defector] += punished;
            outcome.deltas[observer] += enforcement;
            board.punishes[pair] = true;
            outcome.punishments += 1;
        }
    }
}

fn stage_meta_observation(
    p_seen: f64,
    board: &mut StageBoard,
    outcome: &mut StageOutcome,
    rng: &mut dyn RngCore,
) {
    for row in 0..board.defectors.len() {
        let defector = board.defectors[row];
        for non_punisher in 0..board.agents {
            if !board.let_slide(row, non_punisher) {
                continue;
            }
            let mut meta_observers = Vec::new();
            for meta_observer in 0..board.agents {
                if meta_observer == defector || meta_observer == non_punisher {
                    continue;
                }
                if rng.random::<f64>() < p_seen {
                    meta_observers.push(meta_observer);
                    outcome.meta_observations += 1;
                }
            }
            board.slides.push(LetSlide {
                non_punisher,
                defector,
                meta_observers,
            });
        }
    }
}

fn stage_meta_punishment(
    agents: &[Agent],
    payoffs: &Payoffs,
    board: &StageBoard,
    outcome: &mut StageOutcome,
    rng: &mut dyn RngCore,
) {
    let meta_punished = loss(payoffs.cost_of_being_meta_punished);
    let enforcement = loss(payoffs.enforcement_cost_meta_punishment);
    // Slides are recorded defector-major, non-punisher-minor.
    for slide in &board.slides {
        debug_assert!(board.defects[slide.defector]);
        for &meta_observer in &slide.meta_observers {
            if !agents[meta_observer].decides_meta_punish(rng) {
                continue;
            }
            outcome.deltas[slide.non_punisher] += meta_punished;
            outcome.deltas[meta_observer] += enforcement;
            outcome.meta_punishments += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::TraitLevel;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use std::collections::VecDeque;

    const EPS: f64 = 1e-9;

    /// Replays a fixed list of uniform draws and counts how many were taken.
    struct ScriptedRng {
        draws: VecDeque<f64>,
        taken: usize,
    }

    impl ScriptedRng {
        fn new(draws: &[f64]) -> Self {
            Self {
                draws: draws.iter().copied().collect(),
                taken: 0,
            }
        }
    }

    impl RngCore for ScriptedRng {
        fn next_u32(&mut self) -> u32 {
            (self.next_u64() >> 32) as u32
        }

        // `random::<f64>()` keeps the top 53 bits of a u64.
        fn next_u64(&mut self) -> u64 {
            let draw = self.draws.pop_front().expect("script exhausted");
            self.taken += 1;
            ((draw * (1u64 << 53) as f64) as u64) << 11
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            for chunk in dst.chunks_mut(8) {
                let bytes = self.next_u64().to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
        }
    }

    fn agent(boldness: u8, vengefulness: u8, meta_vengefulness: u8) -> Agent {
        Agent::new(
            TraitLevel::new(boldness).expect("level"),
            TraitLevel::new(vengefulness).expect("level"),
            TraitLevel::new(meta_vengefulness).expect("level"),
        )
    }

    #[test]
    fn no_defectors_means_zero_delta() {
        let agents = vec![agent(0, 7, 7); 6];
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..20 {
            let outcome = run_stage(
                &agents,
                &Payoffs::default(),
                GameVariant::MetaNorms,
                &mut rng,
            );
            assert!(outcome.is_quiet());
            assert!(outcome.deltas.iter().all(|delta| *delta == 0.0));
            assert_eq!(outcome.observations, 0);
            assert_eq!(outcome.punishments, 0);
            assert_eq!(outcome.meta_observations, 0);
        }
    }

    #[test]
    fn lone_defector_without_punishers() {
        let agents = [agent(7, 0, 0), agent(0, 0, 0)];
        let payoffs = Payoffs::default();
        for seed in 0..32 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let outcome = run_stage(&agents, &payoffs, GameVariant::MetaNorms, &mut rng);
            assert_eq!(outcome.defections, 1);
            assert_eq!(outcome.punishments, 0);
            assert_eq!(outcome.meta_punishments, 0);
            assert!((outcome.deltas[0] - payoffs.temptation_to_defect).abs() < EPS);
            assert!((outcome.deltas[1] - payoffs.hurt_suffered_by_others).abs() < EPS);
        }
    }

    #[test]
    fn hurt_is_charged_once_per_defector() {
        let agents = [agent(7, 0, 0), agent(7, 0, 0), agent(7, 0, 0), agent(0, 0, 0)];
        let mut rng = SmallRng::seed_from_u64(5);
        let outcome = run_stage(
            &agents,
            &Payoffs::default(),
            GameVariant::MetaNorms,
            &mut rng,
        );
        assert_eq!(outcome.defections, 3);
        for delta in &outcome.deltas[..3] {
            assert!((delta - (3.0 - 2.0)).abs() < EPS);
        }
        assert!((outcome.deltas[3] + 3.0).abs() < EPS);
    }

    #[test]
    fn deltas_balance_against_event_counts() {
        let payoffs = Payoffs::default();
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let agents: Vec<Agent> = (0..12).map(|_| Agent::random(&mut rng)).collect();
        for _ in 0..50 {
            let outcome = run_stage(&agents, &payoffs, GameVariant::MetaNorms, &mut rng);
            let defections = outcome.defections as f64;
            let others = (agents.len() - 1) as f64;
            let expected = defections * payoffs.temptation_to_defect
                + defections * others * payoffs.hurt_suffered_by_others
                + outcome.punishments as f64
                    * (payoffs.cost_of_being_punished + payoffs.enforcement_cost_punishment)
                + outcome.meta_punishments as f64
                    * (payoffs.cost_of_being_meta_punished
                        + payoffs.enforcement_cost_meta_punishment);
            let total: f64 = outcome.deltas.iter().sum();
            assert!((total - expected).abs() < 1e-6);
            assert!(outcome.punishments <= outcome.observations);
            assert!(outcome.meta_punishments <= outcome.meta_observations);
        }
    }

    #[test]
    fn meta_punishment_targets_the_non_punisher() {
        // Agent 0 defects, agent 1 never punishes, agent 2 always meta-punishes.
        let agents = [agent(7, 0, 0), agent(0, 0, 0), agent(0, 0, 7)];
        let payoffs = Payoffs::default();
        let mut saw_meta_punishment = false;
        for seed in 0..200 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let outcome = run_stage(&agents, &payoffs, GameVariant::MetaNorms, &mut rng);
            let meta = outcome.meta_punishments as f64;
            saw_meta_punishment |= outcome.meta_punishments > 0;
            assert!((outcome.deltas[0] - 3.0).abs() < EPS);
            assert!((outcome.deltas[1] - (-1.0 - 9.0 * meta)).abs() < EPS);
            assert!((outcome.deltas[2] - (-1.0 - 2.0 * meta)).abs() < EPS);
        }
        assert!(saw_meta_punishment);
    }

    #[test]
    fn norms_variant_skips_meta_passes() {
        let agents = vec![agent(4, 3, 7); 8];
        let mut rng = SmallRng::seed_from_u64(77);
        for _ in 0..30 {
            let outcome = run_stage(&agents, &Payoffs::default(), GameVariant::Norms, &mut rng);
            assert_eq!(outcome.meta_observations, 0);
            assert_eq!(outcome.meta_punishments, 0);
        }
    }

    #[test]
    fn seeded_stage_is_reproducible() {
        let mut setup = SmallRng::seed_from_u64(3);
        let agents: Vec<Agent> = (0..10).map(|_| Agent::random(&mut setup)).collect();
        let run = |seed| {
            let mut rng = SmallRng::seed_from_u64(seed);
            run_stage(&agents, &Payoffs::default(), GameVariant::MetaNorms, &mut rng)
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn draws_follow_pass_order_through_meta_punishment() {
        let agents = [agent(4, 4, 4), agent(4, 4, 4), agent(4, 4, 4)];
        let mut rng = ScriptedRng::new(&[
            // defection: only agent 0 defects
            0.1, 0.9, 0.9, //
            // p_seen
            0.5, //
            // observation of agent 0 by agents 1 and 2
            0.2, 0.8, //
            // agent 1 saw it and declines to punish
            0.9, //
            // agent 2 sees the omission
            0.3, //
            // and meta-punishes agent 1
            0.2,
        ]);
        let outcome = run_stage(
            &agents,
            &Payoffs::default(),
            GameVariant::MetaNorms,
            &mut rng,
        );
        assert_eq!(rng.taken, 9);
        assert!(rng.draws.is_empty());
        assert_eq!(outcome.defections, 1);
        assert_eq!(outcome.observations, 1);
        assert_eq!(outcome.punishments, 0);
        assert_eq!(outcome.meta_observations, 1);
        assert_eq!(outcome.meta_punishments, 1);
        assert!((outcome.deltas[0] - 3.0).abs() < EPS);
        assert!((outcome.deltas[1] - (-1.0 - 9.0)).abs() < EPS);
        assert!((outcome.deltas[2] - (-1.0 - 2.0)).abs() < EPS);
    }

    #[test]
    fn punished_defection_leaves_nothing_to_meta_observe() {
        let agents = [agent(4, 4, 4), agent(4, 4, 4), agent(4, 4, 4)];
        let mut rng = ScriptedRng::new(&[0.1, 0.9, 0.9, 0.5, 0.2, 0.8, 0.1]);
        let outcome = run_stage(
            &agents,
            &Payoffs::default(),
            GameVariant::MetaNorms,
            &mut rng,
        );
        assert_eq!(rng.taken, 7);
        assert_eq!(outcome.punishments, 1);
        assert_eq!(outcome.meta_observations, 0);
        assert!((outcome.deltas[0] - (3.0 - 9.0)).abs() < EPS);
        assert!((outcome.deltas[1] - (-1.0 - 2.0)).abs() < EPS);
        assert!((outcome.deltas[2] + 1.0).abs() < EPS);
    }

    #[test]
    fn quiet_stage_draws_once_per_agent_plus_visibility() {
        let agents = vec![agent(0, 7, 7); 4];
        let mut rng = ScriptedRng::new(&[0.0, 0.5, 0.5, 0.5, 0.5]);
        let outcome = run_stage(
            &agents,
            &Payoffs::default(),
            GameVariant::MetaNorms,
            &mut rng,
        );
        assert!(outcome.is_quiet());
        assert_eq!(rng.taken, 5);
    }

    #[test]
    fn quiet_stage_scales_to_large_populations() {
        let agents = vec![agent(0, 7, 7); 5_000];
        let mut rng = SmallRng::seed_from_u64(2_000);
        for variant in [GameVariant::Norms, GameVariant::MetaNorms] {
            let outcome = run_stage(&agents, &Payoffs::default(), variant, &mut rng);
            assert!(outcome.is_quiet());
            assert_eq!(outcome.deltas.len(), agents.len());
        }
    }

    #[test]
    fn tally_accumulates_stage_counts() {
        let mut tally = GenerationTally::default();
        let outcome = StageOutcome {
            deltas: vec![0.0; 3],
            defections: 2,
            observations: 3,
            punishments: 1,
            meta_observations: 4,
            meta_punishments: 2,
        };
        tally.absorb(&outcome);
        tally.absorb(&outcome);
        assert_eq!(tally.stages, 2);
        assert_eq!(tally.defections, 4);
        assert_eq!(tally.observations, 6);
        assert_eq!(tally.punishments, 2);
        assert_eq!(tally.meta_observations, 8);
        assert_eq!(tally.meta_punishments, 4);
    }
}
