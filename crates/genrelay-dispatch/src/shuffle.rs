//! Injectable randomness for candidate ordering.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Source of permutations for the server and token lists.
pub trait ShuffleSource: Send + Sync {
    /// A permutation of `0..len`.
    fn permutation(&self, len: usize) -> Vec<usize>;
}

/// Uniform random permutations.
#[derive(Debug)]
pub struct RandomShuffle {
    rng: Mutex<StdRng>,
}

impl RandomShuffle {
    /// Seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence from `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomShuffle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShuffleSource for RandomShuffle {
    fn permutation(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut *self.rng.lock());
        order
    }
}

/// Keeps the input order. Used where ordering must be deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityShuffle;

impl ShuffleSource for IdentityShuffle {
    fn permutation(&self, len: usize) -> Vec<usize> {
        (0..len).collect()
    }
}

/// Reorder `items` by a permutation from `source`.
///
/// A source that returns something other than a permutation of `0..len`
/// leaves the order unchanged.
pub fn apply<T: Clone>(source: &dyn ShuffleSource, items: &[T]) -> Vec<T> {
    let order = source.permutation(items.len());
    if !is_permutation(&order, items.len()) {
        tracing::warn!(len = items.len(), "shuffle source returned an invalid permutation");
        return items.to_vec();
    }
    order.into_iter().map(|i| items[i].clone()).collect()
}

fn is_permutation(order: &[usize], len: usize) -> bool {
    if order.len() != len {
        return false;
    }
    let mut seen = vec![false; len];
    for &i in order {
        match seen.get_mut(i) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Reverse;

    impl ShuffleSource for Reverse {
        fn permutation(&self, len: usize) -> Vec<usize> {
            (0..len).rev().collect()
        }
    }

    struct Broken;

    impl ShuffleSource for Broken {
        fn permutation(&self, len: usize) -> Vec<usize> {
            vec![0; len]
        }
    }

    #[test]
    fn identity_keeps_order() {
        assert_eq!(apply(&IdentityShuffle, &["a", "b", "c"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn custom_source_is_honored() {
        assert_eq!(apply(&Reverse, &[1, 2, 3]), vec![3, 2, 1]);
    }

    #[test]
    fn invalid_permutation_falls_back_to_input_order() {
        assert_eq!(apply(&Broken, &[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let a = RandomShuffle::seeded(7).permutation(16);
        let b = RandomShuffle::seeded(7).permutation(16);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input() {
        let empty: Vec<u8> = Vec::new();
        assert!(apply(&RandomShuffle::new(), &empty).is_empty());
    }

    proptest! {
        #[test]
        fn random_shuffle_yields_permutations(seed in any::<u64>(), len in 0usize..40) {
            let order = RandomShuffle::seeded(seed).permutation(len);
            prop_assert!(is_permutation(&order, len));
        }

        #[test]
        fn apply_preserves_multiset(seed in any::<u64>(), items in proptest::collection::vec(0u8..8, 0..20)) {
            let mut shuffled = apply(&RandomShuffle::seeded(seed), &items);
            let mut original = items.clone();
            shuffled.sort_unstable();
            original.sort_unstable();
            prop_assert_eq!(shuffled, original);
        }
    }
}
