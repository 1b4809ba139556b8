//! Random selector implementation

use rand::Rng;

use super::Weighted;
use crate::{DubboError, Result};

/// Random selector - weight-proportional random selection. Stateless, so
/// there is no per-key bookkeeping to keep fair; uneven weights steer the
/// draw, equal weights degenerate to a uniform pick.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }

    /// Pick one candidate at random, proportionally to its weight.
    pub fn select<'a, T: Weighted>(&self, candidates: &'a [T]) -> Result<&'a T> {
        if candidates.is_empty() {
            return Err(DubboError::NoEndpoint);
        }

        let mut rng = rand::thread_rng();
        let first = candidates[0].weight();
        let same_weight = candidates.iter().all(|c| c.weight() == first);
        let total: u64 = candidates.iter().map(|c| c.weight() as u64).sum();

        if total > 0 && !same_weight {
            let mut offset = rng.gen_range(0..total);
            for candidate in candidates {
                let weight = candidate.weight() as u64;
                if offset < weight {
                    return Ok(candidate);
                }
                offset -= weight;
            }
        }

        Ok(&candidates[rng.gen_range(0..candidates.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Candidate {
        name: &'static str,
        weight: u32,
    }

    impl Weighted for Candidate {
        fn weight(&self) -> u32 {
            self.weight
        }
    }

    #[test]
    fn test_empty_candidates() {
        let selector = Random::new();
        let list: Vec<Candidate> = Vec::new();
        assert!(selector.select(&list).is_err());
    }

    #[test]
    fn test_single_candidate() {
        let selector = Random::new();
        let list = vec![Candidate {
            name: "a",
            weight: 1,
        }];
        for _ in 0..10 {
            assert_eq!(selector.select(&list).unwrap().name, "a");
        }
    }

    #[test]
    fn test_zero_weight_skipped_under_mixed_weights() {
        let selector = Random::new();
        let list = vec![
            Candidate {
                name: "a",
                weight: 0,
            },
            Candidate {
                name: "b",
                weight: 3,
            },
        ];
        for _ in 0..200 {
            assert_eq!(selector.select(&list).unwrap().name, "b");
        }
    }

    #[test]
    fn test_weighted_bias() {
        let selector = Random::new();
        let list = vec![
            Candidate {
                name: "a",
                weight: 9,
            },
            Candidate {
                name: "b",
                weight: 1,
            },
        ];
        let picks_a = (0..2000)
            .filter(|_| selector.select(&list).unwrap().name == "a")
            .count();
        // 9:1 weights; leave generous slack for randomness
        assert!(picks_a > 1500, "a picked {} times", picks_a);
    }
}
