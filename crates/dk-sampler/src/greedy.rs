use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::sampler::{Sampler, TokenDataArray};

/// Seed value meaning "draw from OS entropy".
pub const DEFAULT_SEED: u32 = u32::MAX;

/// Selects the highest-logit candidate.
#[derive(Debug, Clone, Default)]
pub struct Greedy;

impl Greedy {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for Greedy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        candidates.selected = candidates.argmax();
    }
}

/// Draws one candidate from the softmax of the remaining logits.
///
/// Every call seeds a fresh generator from `seed`, so the same candidates
/// always yield the same token. With `DEFAULT_SEED` each call is seeded
/// from OS entropy instead.
#[derive(Debug, Clone)]
pub struct Dist {
    seed: u32,
}

impl Dist {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    fn rng(&self) -> StdRng {
        if self.seed == DEFAULT_SEED {
            StdRng::from_entropy()
        } else {
            StdRng::seed_from_u64(self.seed as u64)
        }
    }
}

impl Sampler for Dist {
    fn name(&self) -> &str {
        "dist"
    }

    fn apply(&self, candidates: &mut TokenDataArray) {
        if candidates.is_empty() {
            return;
        }
        candidates.softmax();
        let weights = candidates.data.iter().map(|t| t.p);
        candidates.selected = match WeightedIndex::new(weights) {
            Ok(dist) => Some(dist.sample(&mut self.rng())),
            // all-zero or non-finite weights: fall back to the top candidate
            Err(_) => Some(0),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_selects_argmax() {
        let mut c = TokenDataArray::from_logits(&[0.0, 3.0, 1.0]);
        Greedy::new().apply(&mut c);
        assert_eq!(c.selected_token(), Some(1));
    }

    #[test]
    fn test_dist_same_seed_same_token() {
        let logits: Vec<f32> = (0..50).map(|i| (i as f32 * 0.37).sin()).collect();
        let draw = |seed| {
            let mut c = TokenDataArray::from_logits(&logits);
            Dist::new(seed).apply(&mut c);
            c.selected_token().unwrap()
        };
        for seed in [0, 1, 42, 12345] {
            assert_eq!(draw(seed), draw(seed));
        }
    }

    #[test]
    fn test_dist_follows_probabilities() {
        // one candidate carries essentially all the mass
        let mut c = TokenDataArray::from_logits(&[0.0, 50.0, 0.0]);
        Dist::new(7).apply(&mut c);
        assert_eq!(c.selected_token(), Some(1));
    }

    #[test]
    fn test_dist_entropy_seed_stays_in_range() {
        let mut c = TokenDataArray::from_logits(&[1.0, 1.0, 1.0]);
        Dist::new(DEFAULT_SEED).apply(&mut c);
        assert!(matches!(c.selected_token(), Some(0..=2)));
    }
}
