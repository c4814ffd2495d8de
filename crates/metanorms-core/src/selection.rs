//! Score-based replication and genotype mutation.

use rand::{Rng, RngCore};

use crate::{
    MutationScheme,
    agent::{Agent, TRAIT_BITS},
    mean_and_std,
};

/// Copies an agent with `score` contributes to the next generation.
///
/// More than one standard deviation below the mean is dropped, more than one
/// above is doubled, anything in between survives once.
#[must_use]
pub fn offspring_count(score: f64, mean: f64, std: f64) -> usize {
    if score < mean - std {
        0
    } else if score > mean + std {
        2
    } else {
        1
    }
}

/// Build the next population from `agents` and their accumulated `scores`.
///
/// The candidate list is repaired to exactly `agents.len()` entries by
/// duplicating or removing uniformly chosen candidates one at a time.
pub fn replicate(agents: &[Agent], scores: &[f64], rng: &mut dyn RngCore) -> Vec<Agent> {
    assert_eq!(
        agents.len(),
        scores.len(),
        "every agent needs exactly one score"
    );
    let target = agents.len();
    let (mean, std) = mean_and_std(scores);

    let mut candidates = Vec::with_capacity(target * 2);
    for (agent, &score) in agents.iter().zip(scores) {
        for _ in 0..offspring_count(score, mean, std) {
            candidates.push(*agent);
        }
    }
    // The top score is never below the mean, so somebody always survives.
    // Non-finite scores fail every band comparison and keep everyone once.
    assert!(
        target == 0 || !candidates.is_empty(),
        "at least one agent scores at or above the mean"
    );

    while candidates.len() < target {
        let idx = rng.random_range(0..candidates.len());
        candidates.push(candidates[idx]);
    }
    while candidates.len() > target {
        let idx = rng.random_range(0..candidates.len());
        candidates.remove(idx);
    }

    assert_eq!(
        candidates.len(),
        target,
        "replication must restore the population size"
    );
    candidates
}

/// Apply mutation in place, returning the number of bits flipped.
pub fn mutate(
    agents: &mut [Agent],
    scheme: MutationScheme,
    probability: f64,
    rng: &mut dyn RngCore,
) -> usize {
    let mut flips = 0;
    match scheme {
        MutationScheme::FixedBit { bit } => {
            let bit = u32::from(bit);
            for agent in agents.iter_mut() {
                if rng.random::<f64>() >= probability {
                    continue;
                }
                for trait_level in agent.traits_mut() {
                    *trait_level = trait_level.flip_bit(bit);
                    flips += 1;
                }
            }
        }
        MutationScheme::EachBit => {
            for agent in agents.iter_mut() {
                for bit in 0..TRAIT_BITS {
                    for trait_level in agent.traits_mut() {
                        if rng.random::<f64>() < probability {
                            *trait_level = trait_level.flip_bit(bit);
                            flips += 1;
                        }
                    }
                }
            }
        }
    }
    flips
}
