//! Random durations for uptimes, downtimes, lifetimes and queue workloads
//!
//! Every generator is parameterized by its MEAN, not its rate, so the values
//! read straight from a scenario file. An infinite mean yields an infinite
//! duration (the event never happens).

use rand::Rng;
use rand_distr::{Distribution, Exp, Weibull};
use serde::Deserialize;

use crate::bk_interface::SimTime;

/// Exponential variate with the given mean
pub fn exp_rv<R: Rng + ?Sized>(rng: &mut R, mean: SimTime) -> SimTime {
    if mean.is_infinite() {
        return SimTime::INFINITY;
    }
    match Exp::new(1.0 / mean) {
        Ok(exp) => exp.sample(rng),
        Err(_) => SimTime::NAN,
    }
}

/// Weibull variate with the given shape and mean
///
/// The scale is `mean / Γ(1 + 1/shape)`. Shape 1 is the exponential case,
/// shape > 1 concentrates values around the mean, shape < 1 is heavy tailed.
pub fn weibull_rv<R: Rng + ?Sized>(rng: &mut R, shape: f64, mean: SimTime) -> SimTime {
    if mean.is_infinite() {
        return SimTime::INFINITY;
    }
    match Weibull::new(weibull_scale(shape, mean), shape) {
        Ok(w) => w.sample(rng),
        Err(_) => SimTime::NAN,
    }
}

pub fn weibull_scale(shape: f64, mean: SimTime) -> f64 {
    mean / gamma(1.0 + 1.0 / shape)
}

// Lanczos approximation (g = 7, n = 9), accurate to ~1e-15 for x > 0
const LANCZOS_G: f64 = 7.0;
const LANCZOS_COEF: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function for real arguments
pub fn gamma(x: f64) -> f64 {
    if x < 0.5 {
        // reflection formula
        std::f64::consts::PI / ((std::f64::consts::PI * x).sin() * gamma(1.0 - x))
    } else {
        let x = x - 1.0;
        let mut acc = LANCZOS_COEF[0];
        for (i, c) in LANCZOS_COEF.iter().enumerate().skip(1) {
            acc += c / (x + i as f64);
        }
        let t = x + LANCZOS_G + 0.5;
        (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * acc
    }
}

// ============================================================================
// Configurable variate
// ============================================================================

/// A duration distribution picked in the scenario file
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Variate {
    Exponential { mean: SimTime },
    Weibull { shape: f64, mean: SimTime },
    /// Always the same value, useful for controlled experiments
    Fixed { value: SimTime },
}

impl Variate {
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SimTime {
        match *self {
            Variate::Exponential { mean } => exp_rv(rng, mean),
            Variate::Weibull { shape, mean } => weibull_rv(rng, shape, mean),
            Variate::Fixed { value } => value,
        }
    }

    pub fn mean(&self) -> SimTime {
        match *self {
            Variate::Exponential { mean } | Variate::Weibull { mean, .. } => mean,
            Variate::Fixed { value } => value,
        }
    }

    /// Shape 1 Weibull is plain exponential
    pub fn with_shape(shape: Option<f64>, mean: SimTime) -> Self {
        match shape {
            Some(shape) if shape != 1.0 => Variate::Weibull { shape, mean },
            _ => Variate::Exponential { mean },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample_mean(mut f: impl FnMut() -> f64, count: usize) -> f64 {
        (0..count).map(|_| f()).sum::<f64>() / count as f64
    }

    #[test]
    fn test_gamma_known_values() {
        assert!((gamma(1.0) - 1.0).abs() < 1e-12);
        assert!((gamma(5.0) - 24.0).abs() < 1e-9);
        assert!((gamma(0.5) - std::f64::consts::PI.sqrt()).abs() < 1e-12);
        assert!((gamma(1.5) - std::f64::consts::PI.sqrt() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_exponential_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        let mean = sample_mean(|| exp_rv(&mut rng, 4.0), 200_000);
        assert!((mean - 4.0).abs() < 0.05, "mean was {}", mean);
    }

    #[test]
    fn test_weibull_mean_for_several_shapes() {
        let mut rng = StdRng::seed_from_u64(11);
        for shape in [0.5, 1.0, 2.0, 4.0] {
            let mean = sample_mean(|| weibull_rv(&mut rng, shape, 3.0), 200_000);
            // shape 0.5 has a heavy tail, allow more slack
            let tolerance = if shape < 1.0 { 0.15 } else { 0.05 };
            assert!(
                (mean - 3.0).abs() < tolerance,
                "shape {} gave mean {}",
                shape,
                mean
            );
        }
    }

    #[test]
    fn test_weibull_shape_one_is_exponential_scale() {
        assert!((weibull_scale(1.0, 5.0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_samples_are_non_negative() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            assert!(exp_rv(&mut rng, 1.0) >= 0.0);
            assert!(weibull_rv(&mut rng, 0.7, 1.0) >= 0.0);
        }
    }

    #[test]
    fn test_infinite_mean_never_happens() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(exp_rv(&mut rng, f64::INFINITY).is_infinite());
        assert!(weibull_rv(&mut rng, 2.0, f64::INFINITY).is_infinite());
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = StdRng::seed_from_u64(99);
        let mut b = StdRng::seed_from_u64(99);
        let xs: Vec<f64> = (0..100).map(|_| exp_rv(&mut a, 2.0)).collect();
        let ys: Vec<f64> = (0..100).map(|_| exp_rv(&mut b, 2.0)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_variate_from_yaml() {
        let v: Variate = serde_yaml::from_str("kind: weibull\nshape: 2.0\nmean: 10.0\n").unwrap();
        assert_eq!(v, Variate::Weibull { shape: 2.0, mean: 10.0 });
        assert_eq!(v.mean(), 10.0);

        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(Variate::Fixed { value: 3.0 }.sample(&mut rng), 3.0);
        assert_eq!(
            Variate::with_shape(Some(1.0), 2.0),
            Variate::Exponential { mean: 2.0 }
        );
    }
}
