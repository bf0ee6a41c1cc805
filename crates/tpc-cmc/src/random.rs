//! Pre-generated uniform random numbers
//!
//! Comparison pad draws dominate the estimator cost. A ring of uniform
//! values is filled once per worker from a seeded ChaCha stream and then
//! cycled, so the inner loop never touches a generator.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

/// Ring buffer of uniform values in [0, 1)
#[derive(Debug, Clone)]
pub struct RandomRing {
    values: Vec<f32>,
    cursor: usize,
}

impl RandomRing {
    /// Fill a ring of `size` values from `seed`
    pub fn new(size: usize, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let values = (0..size.max(1)).map(|_| rng.random::<f32>()).collect();
        Self { values, cursor: 0 }
    }

    /// Ring for worker `worker` derived from a base seed
    pub fn for_worker(size: usize, seed: u64, worker: usize) -> Self {
        Self::new(size, seed.wrapping_add(worker as u64))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Next uniform value
    #[inline]
    pub fn next_value(&mut self) -> f32 {
        let value = self.values[self.cursor];
        self.cursor += 1;
        if self.cursor == self.values.len() {
            self.cursor = 0;
        }
        value
    }

    /// Uniform index in `0..n`, `n` must be positive
    #[inline]
    pub fn next_index(&mut self, n: usize) -> usize {
        ((self.next_value() * n as f32) as usize).min(n - 1)
    }

    /// Uniform index in `0..n` skipping `exclude`, `n` must be at least 2
    #[inline]
    pub fn next_index_excluding(&mut self, n: usize, exclude: usize) -> usize {
        let index = self.next_index(n - 1);
        if index >= exclude { index + 1 } else { index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproducibility() {
        let mut a = RandomRing::new(64, 42);
        let mut b = RandomRing::new(64, 42);
        for _ in 0..200 {
            assert_eq!(a.next_value(), b.next_value());
        }
    }

    #[test]
    fn test_values_in_unit_interval() {
        let mut ring = RandomRing::new(1024, 7);
        for _ in 0..1024 {
            let v = ring.next_value();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn test_ring_wraps() {
        let mut ring = RandomRing::new(4, 1);
        let first: Vec<f32> = (0..4).map(|_| ring.next_value()).collect();
        let second: Vec<f32> = (0..4).map(|_| ring.next_value()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_index_excluding_never_hits_excluded() {
        let mut ring = RandomRing::new(512, 3);
        let mut seen = [false; 8];
        for _ in 0..512 {
            let index = ring.next_index_excluding(8, 5);
            assert_ne!(index, 5);
            seen[index] = true;
        }
        assert_eq!(seen.iter().filter(|&&s| s).count(), 7);
    }

    #[test]
    fn test_workers_get_different_streams() {
        let mut a = RandomRing::for_worker(16, 100, 0);
        let mut b = RandomRing::for_worker(16, 100, 1);
        let va: Vec<f32> = (0..16).map(|_| a.next_value()).collect();
        let vb: Vec<f32> = (0..16).map(|_| b.next_value()).collect();
        assert_ne!(va, vb);
    }
}
