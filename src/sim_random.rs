//! Seeded randomness.
//!
//! Every component that needs randomness owns its own `StdRng`, taken from
//! [`RngService`] under a fixed stream name. Streams are derived from a single
//! master seed, so a run is reproducible from `(seed, scenario)` alone and
//! adding draws to one component never shifts another component's sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RngStream {
    Network,
    Overlay,
    IdSpace,
    Address,
    Cluster,
    FailureDetection,
    Bandwidth,
    Latency,
    Churn,
    Interval,
}

impl RngStream {
    fn salt(&self) -> u64 {
        match self {
            RngStream::Network => 0x6e65_7477_6f72_6b00,
            RngStream::Overlay => 0x6f76_6572_6c61_7900,
            RngStream::IdSpace => 0x6964_7370_6163_6500,
            RngStream::Address => 0x6164_6472_6573_7300,
            RngStream::Cluster => 0x636c_7573_7465_7200,
            RngStream::FailureDetection => 0x6661_696c_7572_6500,
            RngStream::Bandwidth => 0x6277_6964_7468_0000,
            RngStream::Latency => 0x6c61_7465_6e63_7900,
            RngStream::Churn => 0x6368_7572_6e00_0000,
            RngStream::Interval => 0x696e_7465_7276_616c,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RngService {
    master: u64,
}

impl RngService {
    pub fn new(master: u64) -> Self {
        Self { master }
    }

    pub fn master_seed(&self) -> u64 {
        self.master
    }

    /// A fresh generator for `stream`. Asking twice for the same stream
    /// returns two generators producing the same sequence.
    pub fn stream(&self, stream: RngStream) -> StdRng {
        let mixed = self
            .master
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .rotate_left(17)
            ^ stream.salt();
        StdRng::seed_from_u64(mixed)
    }
}

/// Named distributions. All return whole ticks/ids/rates; negative samples
/// clamp to zero.
pub mod dist {
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Exp, Normal, Pareto, Poisson, Triangular};

    // upload capacity table unit
    pub const BIT_RATE: u64 = 250;

    /// Uniform in `[0, bound)`; 0 when `bound` is 0.
    pub fn uniform<R: Rng + ?Sized>(rng: &mut R, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            rng.gen_range(0..bound)
        }
    }

    /// Exponential with the given mean, floored.
    pub fn exp<R: Rng + ?Sized>(rng: &mut R, mean: f64) -> u64 {
        if mean <= 0.0 {
            return 0;
        }
        Exp::new(1.0 / mean)
            .map(|d| d.sample(rng))
            .map(to_ticks)
            .unwrap_or(0)
    }

    pub fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> u64 {
        Normal::new(mean, std_dev)
            .map(|d| d.sample(rng).round())
            .map(to_ticks)
            .unwrap_or(0)
    }

    /// Normal sample from a generator seeded with `seed`, so the same seed
    /// always yields the same value.
    pub fn normal_seeded(mean: f64, std_dev: f64, seed: u64) -> u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        normal(&mut rng, mean, std_dev)
    }

    pub fn poisson<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> u64 {
        Poisson::new(lambda)
            .map(|d| d.sample(rng))
            .map(to_ticks)
            .unwrap_or(0)
    }

    pub fn pareto<R: Rng + ?Sized>(rng: &mut R, scale: f64, shape: f64) -> u64 {
        Pareto::new(scale, shape)
            .map(|d| d.sample(rng))
            .map(to_ticks)
            .unwrap_or(0)
    }

    pub fn triangular<R: Rng + ?Sized>(rng: &mut R, min: f64, mode: f64, max: f64) -> u64 {
        Triangular::new(min, max, mode)
            .map(|d| d.sample(rng))
            .map(to_ticks)
            .unwrap_or(0)
    }

    /// Band index in `[0, 2 * clusters)`. With probability `density` the
    /// draw lands on an even (dense) band, picked uniformly among clusters;
    /// otherwise on one of the odd (sparse) bands in between.
    pub fn cluster<R: Rng + ?Sized>(rng: &mut R, clusters: u32, density: f64) -> usize {
        if clusters == 0 {
            return 0;
        }
        let c = rng.gen_range(0..clusters) as usize;
        if rng.gen_bool(density.clamp(0.0, 1.0)) {
            2 * c
        } else {
            2 * c + 1
        }
    }

    /// Upload capacity drawn from a measured residential broadband table.
    pub fn upload_capacity<R: Rng + ?Sized>(rng: &mut R) -> u64 {
        let mut r = rng.gen::<f64>() * 100.0;
        loop {
            if r <= 49.3 {
                return rng.gen_range(0..BIT_RATE);
            } else if r <= 68.0 {
                return BIT_RATE + rng.gen_range(0..BIT_RATE);
            } else if r <= 76.4 {
                return 2 * BIT_RATE + rng.gen_range(0..BIT_RATE);
            } else if r <= 81.6 {
                return (3 + rng.gen_range(0..16)) * BIT_RATE + rng.gen_range(0..BIT_RATE);
            } else if r <= 88.4 {
                return 20 * BIT_RATE;
            }
            // fold the open tail back over the table
            r = (100.0 - r) * 100.0 / 11.6;
        }
    }

    fn to_ticks(x: f64) -> u64 {
        if x.is_finite() && x > 0.0 {
            x as u64
        } else {
            0
        }
    }
}

/// Uniform index into a collection of `len` items.
pub fn pick_index<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some(rng.gen_range(0..len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_are_reproducible_and_independent() {
        let svc = RngService::new(99);
        let a: Vec<u64> = (0..5).map(|_| svc.stream(RngStream::Network).gen()).collect();
        let mut n1 = svc.stream(RngStream::Network);
        let mut n2 = svc.stream(RngStream::Network);
        let mut l = svc.stream(RngStream::Latency);
        let x: u64 = n1.gen();
        assert_eq!(x, n2.gen::<u64>());
        assert_ne!(x, l.gen::<u64>());
        assert_eq!(a[0], a[4]);

        let other = RngService::new(100);
        assert_ne!(x, other.stream(RngStream::Network).gen::<u64>());
    }

    #[test]
    fn test_uniform_bounds() {
        let mut rng = RngService::new(1).stream(RngStream::Latency);
        assert_eq!(dist::uniform(&mut rng, 0), 0);
        for _ in 0..200 {
            assert!(dist::uniform(&mut rng, 7) < 7);
        }
    }

    #[test]
    fn test_exp_mean_is_roughly_right() {
        let mut rng = RngService::new(2).stream(RngStream::Interval);
        assert_eq!(dist::exp(&mut rng, 0.0), 0);
        let n = 4000;
        let total: u64 = (0..n).map(|_| dist::exp(&mut rng, 100.0)).sum();
        let mean = total as f64 / n as f64;
        assert!(mean > 80.0 && mean < 120.0, "mean {}", mean);
    }

    #[test]
    fn test_normal_seeded_is_stable() {
        let a = dist::normal_seeded(10.0, 0.5, 42);
        let b = dist::normal_seeded(10.0, 0.5, 42);
        assert_eq!(a, b);
        assert!((8..=12).contains(&a));
    }

    #[test]
    fn test_cluster_band_range() {
        let mut rng = RngService::new(3).stream(RngStream::Cluster);
        for _ in 0..500 {
            assert!(dist::cluster(&mut rng, 4, 0.8) < 8);
        }
        assert_eq!(dist::cluster(&mut rng, 0, 0.8), 0);
        // density 1.0 only hits dense bands
        for _ in 0..100 {
            assert_eq!(dist::cluster(&mut rng, 3, 1.0) % 2, 0);
        }
    }

    #[test]
    fn test_upload_capacity_range() {
        let mut rng = RngService::new(4).stream(RngStream::Bandwidth);
        for _ in 0..1000 {
            assert!(dist::upload_capacity(&mut rng) <= 20 * dist::BIT_RATE);
        }
    }

    #[test]
    fn test_other_distributions_non_degenerate() {
        let mut rng = RngService::new(5).stream(RngStream::Churn);
        assert!((0..50).any(|_| dist::poisson(&mut rng, 4.0) > 0));
        assert!((0..50).all(|_| dist::pareto(&mut rng, 2.0, 3.0) >= 2));
        assert!((0..50).all(|_| dist::triangular(&mut rng, 1.0, 5.0, 9.0) <= 9));
        assert_eq!(dist::poisson(&mut rng, -1.0), 0);
    }

    #[test]
    fn test_pick_index() {
        let mut rng = RngService::new(6).stream(RngStream::Overlay);
        assert_eq!(pick_index(&mut rng, 0), None);
        assert!(pick_index(&mut rng, 3).unwrap() < 3);
    }
}
