//! Agents and their quantized strategy traits.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of bits in a trait genotype.
pub const TRAIT_BITS: u32 = 3;
/// Number of distinct trait levels (`k / 7` for `k` in `0..=7`).
pub const TRAIT_LEVELS: u8 = 8;

const MAX_LEVEL: u8 = TRAIT_LEVELS - 1;

/// Errors raised when building trait levels from raw values.
#[derive(Debug, Error, PartialEq)]
pub enum TraitError {
    #[error("trait level {level} is outside 0..=7")]
    OutOfRange { level: u8 },
    #[error("trait value {value} is not one of the eight k/7 levels")]
    NotQuantized { value: f64 },
}

/// A trait value quantized to one of eight levels, stored as its 3-bit genotype.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct TraitLevel(u8);

impl TraitLevel {
    /// Level 0, a trait value of `0.0`.
    pub const MIN: Self = Self(0);
    /// Level 7, a trait value of `1.0`.
    pub const MAX: Self = Self(MAX_LEVEL);

    /// Construct a level from its genotype, rejecting anything above 7.
    pub fn new(level: u8) -> Result<Self, TraitError> {
        if level > MAX_LEVEL {
            return Err(TraitError::OutOfRange { level });
        }
        Ok(Self(level))
    }

    /// Recover the level whose real value is exactly `value`.
    pub fn from_value(value: f64) -> Result<Self, TraitError> {
        let scaled = value * f64::from(MAX_LEVEL);
        let rounded = scaled.round();
        if !(0.0..=f64::from(MAX_LEVEL)).contains(&rounded) || (scaled - rounded).abs() > 1e-9 {
            return Err(TraitError::NotQuantized { value });
        }
        Ok(Self(rounded as u8))
    }

    /// Draw a level uniformly from the eight possibilities.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        Self(rng.random_range(0..TRAIT_LEVELS))
    }

    /// Raw 3-bit genotype.
    #[must_use]
    pub const fn level(self) -> u8 {
        self.0
    }

    /// Real trait value in `[0, 1]`.
    #[must_use]
    pub fn value(self) -> f64 {
        f64::from(self.0) / f64::from(MAX_LEVEL)
    }

    /// State of bit `index` (0 is least significant).
    #[must_use]
    pub fn bit(self, index: u32) -> bool {
        assert!(index < TRAIT_BITS, "trait bit index {index} out of range");
        (self.0 >> index) & 1 == 1
    }

    /// Flip bit `index` of the genotype.
    #[must_use]
    pub fn flip_bit(self, index: u32) -> Self {
        assert!(index < TRAIT_BITS, "trait bit index {index} out of range");
        let flipped = self.0 ^ (1 << index);
        assert!(
            flipped <= MAX_LEVEL,
            "bit flip produced level {flipped} outside the 3-bit range"
        );
        Self(flipped)
    }
}

impl TryFrom<u8> for TraitLevel {
    type Error = TraitError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<TraitLevel> for u8 {
    fn from(level: TraitLevel) -> Self {
        level.0
    }
}

/// One strategy in the population.
///
/// Agents are plain values: replication copies them, so mutating one copy
/// never touches its siblings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Agent {
    /// Propensity to defect.
    pub boldness: TraitLevel,
    /// Propensity to punish an observed defector.
    pub vengefulness: TraitLevel,
    /// Propensity to punish an observed non-punisher.
    pub meta_vengefulness: TraitLevel,
}

impl Agent {
    #[must_use]
    pub const fn new(
        boldness: TraitLevel,
        vengefulness: TraitLevel,
        meta_vengefulness: TraitLevel,
    ) -> Self {
        Self {
            boldness,
            vengefulness,
            meta_vengefulness,
        }
    }

    /// Agent with every trait drawn uniformly from the eight levels.
    pub fn random(rng: &mut dyn RngCore) -> Self {
        let boldness = TraitLevel::random(rng);
        let vengefulness = TraitLevel::random(rng);
        let meta_vengefulness = TraitLevel::random(rng);
        Self::new(boldness, vengefulness, meta_vengefulness)
    }

    /// Defects iff an independent uniform draw falls below `boldness`.
    pub fn decides_defect(&self, rng: &mut dyn RngCore) -> bool {
        rng.random::<f64>() < self.boldness.value()
    }

    /// Punishes an observed defector iff a uniform draw falls below `vengefulness`.
    pub fn decides_punish(&self, rng: &mut dyn RngCore) -> bool {
        rng.random::<f64>() < self.vengefulness.value()
    }

    /// Punishes an observed non-punisher iff a uniform draw falls below `meta_vengefulness`.
    pub fn decides_meta_punish(&self, rng: &mut dyn RngCore) -> bool {
        rng.random::<f64>() < self.meta_vengefulness.value()
    }

    /// Traits in `(boldness, vengefulness, meta_vengefulness)` order.
    #[must_use]
    pub const fn traits(&self) -> [TraitLevel; 3] {
        [self.boldness, self.vengefulness, self.meta_vengefulness]
    }

    pub(crate) fn traits_mut(&mut self) -> [&mut TraitLevel; 3] {
        [
            &mut self.boldness,
            &mut self.vengefulness,
            &mut self.meta_vengefulness,
        ]
    }
}
