//! Injectable randomness.
//!
//! Message selection, search manoeuvres and snore intervals all draw from a
//! [`Randomness`] handed in by the caller, so a fixed seed replays the same
//! behaviour in tests.

use rand::prelude::*;
use rand::rngs::SmallRng;

/// Seedable random source.
pub struct Randomness {
    rng: SmallRng,
}

impl Randomness {
    /// Create a random source.
    ///
    /// A `seed` of 0 draws from OS entropy; any other value gives a
    /// reproducible sequence.
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Uniformly pick one element, `None` for an empty slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Fair coin flip.
    pub fn coin(&mut self) -> bool {
        self.rng.gen_bool(0.5)
    }

    /// Uniform integer in `low..=high`.
    pub fn between(&mut self, low: u64, high: u64) -> u64 {
        self.rng.gen_range(low..=high)
    }

    /// Derive an independent source, e.g. for a spawned task.
    pub fn fork(&mut self) -> Randomness {
        Randomness {
            rng: SmallRng::seed_from_u64(self.rng.next_u64()),
        }
    }
}
