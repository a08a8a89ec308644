use rand::{Rng, SeedableRng, rngs::StdRng};

const MS_PER_DAY: i64 = 86_400_000;

/// Uncontrollable household draw: lighting, fridge, cooking.
///
/// `BaseLoad` follows a daily sinusoid with Gaussian noise. It is the part of
/// the measured whole-home power the controller can never shed.
///
/// # Examples
///
/// ```
/// use capacity_planner::devices::baseload::BaseLoad;
///
/// let mut load = BaseLoad::new(
///     0.8,  // base_kw - average draw
///     0.4,  // amp_kw - daily swing
///     0.0,  // phase_rad
///     0.0,  // noise_std_kw - no noise
///     42,   // seed
/// );
///
/// let noon = 12 * 3_600_000;
/// assert!(load.demand_kw(noon) >= 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct BaseLoad {
    /// Average draw in kilowatts.
    pub base_kw: f64,

    /// Amplitude of the daily swing in kilowatts.
    pub amp_kw: f64,

    /// Phase offset of the daily swing in radians.
    pub phase_rad: f64,

    /// Standard deviation of the Gaussian noise in kilowatts.
    pub noise_std_kw: f64,

    rng: StdRng,
}

impl BaseLoad {
    /// Creates a new base load generator.
    ///
    /// # Arguments
    ///
    /// * `base_kw` - Average draw in kilowatts
    /// * `amp_kw` - Amplitude of the daily swing in kilowatts
    /// * `phase_rad` - Phase offset in radians
    /// * `noise_std_kw` - Standard deviation of Gaussian noise in kilowatts
    /// * `seed` - Random seed for reproducible noise
    pub fn new(base_kw: f64, amp_kw: f64, phase_rad: f64, noise_std_kw: f64, seed: u64) -> Self {
        Self {
            base_kw,
            amp_kw,
            phase_rad,
            noise_std_kw,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the base draw at a wall-clock instant (epoch milliseconds).
    ///
    /// The result is never negative.
    pub fn demand_kw(&mut self, at_ms: i64) -> f64 {
        let day_pos = at_ms.rem_euclid(MS_PER_DAY) as f64 / MS_PER_DAY as f64; // [0,1)
        let angle = 2.0 * std::f64::consts::PI * day_pos + self.phase_rad;
        let noise = gaussian_noise(&mut self.rng, self.noise_std_kw);

        let kw = self.base_kw + self.amp_kw * angle.sin() + noise;
        kw.max(0.0)
    }
}

/// Gaussian noise via the Box-Muller transform.
///
/// Returns `0.0` when `std_dev` is not positive.
pub fn gaussian_noise(rng: &mut StdRng, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }

    let u1: f64 = rng.random::<f64>().clamp(1e-9, 1.0);
    let u2: f64 = rng.random::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    z0 * std_dev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demand_is_non_negative() {
        let mut load = BaseLoad::new(0.1, 1.0, 0.0, 0.5, 7);
        for hour in 0..48 {
            assert!(load.demand_kw(hour * 3_600_000) >= 0.0);
        }
    }

    #[test]
    fn without_noise_demand_follows_sinusoid() {
        let mut load = BaseLoad::new(1.0, 0.5, 0.0, 0.0, 0);
        assert!((load.demand_kw(0) - 1.0).abs() < 1e-9);
        // quarter day → sin(pi/2)
        assert!((load.demand_kw(MS_PER_DAY / 4) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn same_seed_is_deterministic() {
        let mut a = BaseLoad::new(1.0, 0.3, 0.2, 0.1, 99);
        let mut b = BaseLoad::new(1.0, 0.3, 0.2, 0.1, 99);
        for step in 0..10 {
            assert_eq!(a.demand_kw(step * 60_000), b.demand_kw(step * 60_000));
        }
    }
}
