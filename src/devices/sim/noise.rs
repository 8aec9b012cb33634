//! Seeded noise source for the simulated sensors

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from entropy; any other seed is reproducible
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    #[inline]
    pub fn gaussian(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f64 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Uniform in [0, 1)
    #[inline]
    pub fn uniform(&mut self) -> f64 {
        Uniform::new(0.0f64, 1.0).sample(&mut self.rng)
    }

    /// True with the given probability
    #[inline]
    pub fn chance(&mut self, probability: f64) -> bool {
        self.uniform() < probability
    }

    /// A range reading in mm: `true_mm` plus noise, clamped to `0..=max_mm`
    pub fn range_mm(&mut self, true_mm: f64, stddev: f64, max_mm: u16) -> u16 {
        (true_mm + self.gaussian(stddev))
            .round()
            .clamp(0.0, f64::from(max_mm)) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_seed() {
        let mut a = NoiseGenerator::new(7);
        let mut b = NoiseGenerator::new(7);
        for _ in 0..50 {
            assert_eq!(a.gaussian(3.0), b.gaussian(3.0));
        }
    }

    #[test]
    fn test_zero_stddev_is_exact() {
        let mut noise = NoiseGenerator::new(7);
        assert_eq!(noise.range_mm(1234.4, 0.0, 5000), 1234);
        assert_eq!(noise.range_mm(9000.0, 0.0, 5000), 5000);
        assert_eq!(noise.range_mm(-5.0, 0.0, 5000), 0);
    }

    #[test]
    fn test_chance_extremes() {
        let mut noise = NoiseGenerator::new(7);
        for _ in 0..20 {
            assert!(!noise.chance(0.0));
            assert!(noise.chance(1.0));
        }
    }
}
