use rand_distr::LogNormal;
use std::sync::atomic::{AtomicBool, AtomicU64};

/// Global seed for the current iteration; scenarios reseed this per run
/// so every randomized computation is reproducible
pub static RAND_SEED: AtomicU64 = AtomicU64::new(0);

/// When set, per-draw bandit sampling is logged (enabled via --verbose bandit)
pub static VERBOSE_BANDIT: AtomicBool = AtomicBool::new(false);

/// Total number of entity pipelines processed across all runs
pub static TOTAL_ENTITY_RUNS: AtomicU64 = AtomicU64::new(0);

/// Derive a stream-specific seed from the global RAND_SEED
///
/// # Arguments
/// * `salt` - A distinct constant per random stream so streams stay decorrelated
pub fn get_seed(salt: u64) -> u64 {
    RAND_SEED
        .load(std::sync::atomic::Ordering::Relaxed)
        .wrapping_mul(6364136223846793005)
        .wrapping_add(salt)
}

/// Round a value to the given number of decimal places, half up (away from zero)
///
/// A small epsilon absorbs binary representation error so that values which are
/// exactly at the half point in decimal round up as expected
pub fn round_half_up(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    let rounded = (value.abs() * factor + 0.5 + 1e-9).floor() / factor;
    if value < 0.0 {
        -rounded
    } else {
        rounded
    }
}

/// Round a value to the given number of decimal places, toward zero
pub fn round_toward_zero(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    let rounded = (value.abs() * factor + 1e-9).floor() / factor;
    if value < 0.0 {
        -rounded
    } else {
        rounded
    }
}

/// Round a budget down to a whole currency unit
pub fn floor_to_unit(value: f64) -> f64 {
    (value + 1e-9).floor()
}

/// Round a budget up to a whole currency unit
pub fn ceil_to_unit(value: f64) -> f64 {
    (value - 1e-9).ceil()
}

/// Convert mean and standard deviation to log-normal distribution parameters
///
/// For LogNormal(μ, σ):
/// - E[X] = exp(μ + σ²/2)
/// - Var[X] = (exp(σ²) - 1) * exp(2μ + σ²)
fn lognormal_from_mean_stddev(mean: f64, stddev: f64) -> (f64, f64) {
    let variance = stddev * stddev;
    let sigma_squared = (1.0 + variance / (mean * mean)).ln();
    let sigma = sigma_squared.sqrt();
    let mu = mean.ln() - sigma_squared / 2.0;
    (mu, sigma)
}

/// Create a log-normal distribution from mean and standard deviation
/// Used by scenarios to generate plausible spend data
pub fn lognormal_dist(mean: f64, stddev: f64) -> LogNormal<f64> {
    let (mu, sigma) = lognormal_from_mean_stddev(mean, stddev);
    LogNormal::new(mu, sigma).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(0.125, 2), 0.13);
        assert_eq!(round_half_up(0.124, 2), 0.12);
        assert_eq!(round_half_up(0.145, 2), 0.15);
        assert_eq!(round_half_up(1.0005, 3), 1.001);
    }

    #[test]
    fn test_round_half_up_idempotent() {
        let once = round_half_up(0.5678, 3);
        assert_eq!(round_half_up(once, 3), once);
        let once = round_half_up(12.345, 2);
        assert_eq!(round_half_up(once, 2), once);
    }

    #[test]
    fn test_round_toward_zero() {
        assert_eq!(round_toward_zero(0.129, 2), 0.12);
        assert_eq!(round_toward_zero(0.12, 2), 0.12);
    }

    #[test]
    fn test_unit_rounding() {
        assert_eq!(floor_to_unit(10.9), 10.0);
        assert_eq!(floor_to_unit(10.0), 10.0);
        assert_eq!(ceil_to_unit(10.1), 11.0);
        assert_eq!(ceil_to_unit(10.0), 10.0);
    }
}
