//! Initial phase-space distributions
//!
//! Longitudinal: truncated Gaussian in (z, δ). Transverse: an action is
//! drawn from the selected family, split between x and y, and mapped to
//! phase space with the Twiss parameters of the first interaction point.

use crate::bunch::Bunch;
use crate::config::{Config, InteractionPoint, RingParameters, TransverseDistribution};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Normalized action beyond which Gaussian samples are rejected
const GAUSSIAN_TRUNCATION: f64 = 9.0;
/// Upper bracket for the Gaussian action solver
const GAUSSIAN_ACTION_LIMIT: f64 = 8.0;

/// Solve 1 − u − (1 + g)e^{−g} = 0 for g on [0, 8] by bisection
pub fn gaussian_action(u: f64) -> f64 {
    let f = |g: f64| 1.0 - u - (1.0 + g) * (-g).exp();
    let (mut lo, mut hi) = (0.0, GAUSSIAN_ACTION_LIMIT);
    while hi - lo > 1e-10 {
        let mid = 0.5 * (lo + hi);
        let value = f(mid);
        if value.abs() < 1e-12 {
            return mid;
        }
        if value < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Fill `bunch` with the configured initial distribution.
///
/// A single macro-particle (weak-strong tracking) is placed on the offsets.
pub fn populate(bunch: &mut Bunch, config: &Config, ring: &RingParameters, rng: &mut StdRng) {
    let offsets = config.bunch.offsets;
    let jitter = config.bunch.offset_jitter;
    let mut shift = [0.0; 6];
    for k in 0..6 {
        let r: f64 = rng.sample(StandardNormal);
        shift[k] = offsets[k] + jitter[k] * r;
    }

    if bunch.len() == 1 {
        bunch.x[0] = shift[0];
        bunch.px[0] = shift[1];
        bunch.y[0] = shift[2];
        bunch.py[0] = shift[3];
        bunch.z[0] = shift[4];
        bunch.pz[0] = shift[5];
        return;
    }

    sample_longitudinal(bunch, config, ring, rng);
    let ip = &config.lattice.interaction_points[0];
    sample_transverse(bunch, config, ip, rng);

    let d = ip.dispersion;
    for i in 0..bunch.len() {
        bunch.z[i] += shift[4];
        bunch.pz[i] += shift[5];
        let delta = bunch.pz[i];
        bunch.x[i] += shift[0] + d[0] * delta;
        bunch.px[i] += shift[1] + d[1] * delta;
        bunch.y[i] += shift[2] + d[2] * delta;
        bunch.py[i] += shift[3] + d[3] * delta;
    }
}

fn sample_longitudinal(bunch: &mut Bunch, config: &Config, ring: &RingParameters, rng: &mut StdRng) {
    let sigma_z = config.ring.bunch_length;
    let sigma_d = config.ring.energy_spread;
    let cut = config.bunch.cut_sigma;
    let mut i = 0;
    while i < bunch.len() {
        let a: f64 = rng.sample(StandardNormal);
        let b: f64 = rng.sample(StandardNormal);
        if a * a + b * b >= cut * cut {
            continue;
        }
        bunch.z[i] = a * sigma_z;
        bunch.pz[i] = b * sigma_d / (ring.beta * ring.beta);
        i += 1;
    }
}

fn sample_transverse(bunch: &mut Bunch, config: &Config, ip: &InteractionPoint, rng: &mut StdRng) {
    let emit_x = config.ring.emittance[0];
    let kappa = if emit_x > 0.0 { config.ring.emittance[1] / emit_x } else { 0.0 };
    let [alpha_x, alpha_y] = ip.alpha;
    let [beta_x, beta_y] = ip.beta;
    let size = [(config.ring.emittance[0] * beta_x).sqrt(), (config.ring.emittance[1] * beta_y).sqrt()];

    let mut i = 0;
    while i < bunch.len() {
        let u: f64 = rng.gen();
        let action = match config.bunch.distribution {
            TransverseDistribution::Kappa => 4.0 * emit_x,
            TransverseDistribution::Parabolic => 6.0 * emit_x * u.sqrt(),
            TransverseDistribution::Gaussian => 2.0 * emit_x * gaussian_action(u),
        };
        let split: f64 = rng.gen();
        let axax = action * split;
        let ayay = (action - axax) * kappa;
        let (ax, ay) = (axax.sqrt(), ayay.sqrt());
        let phase_x = 2.0 * PI * rng.gen::<f64>();
        let phase_y = 2.0 * PI * rng.gen::<f64>();

        let x = ax * beta_x.sqrt() * phase_x.cos();
        let y = ay * beta_y.sqrt() * phase_y.cos();

        if config.bunch.distribution == TransverseDistribution::Gaussian {
            let rx = if size[0] > 0.0 { x / size[0] } else { 0.0 };
            let ry = if size[1] > 0.0 { y / size[1] } else { 0.0 };
            if rx * rx + ry * ry > GAUSSIAN_TRUNCATION {
                continue;
            }
        }

        bunch.x[i] = x;
        bunch.y[i] = y;
        bunch.px[i] = -ax * (alpha_x * phase_x.cos() + phase_x.sin()) / beta_x.sqrt();
        bunch.py[i] = -ay * (alpha_y * phase_y.cos() + phase_y.sin()) / beta_y.sqrt();
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn config_with(distribution: TransverseDistribution, particles: usize) -> Config {
        let mut config = Config::default();
        config.bunch.distribution = distribution;
        config.bunch.macro_particles = particles;
        config
    }

    #[test]
    fn test_gaussian_action_solver() {
        assert!(gaussian_action(0.0) < 1e-6);
        // u = 1 − 2e^{−1} at g = 1
        let u = 1.0 - 2.0 * (-1.0f64).exp();
        assert!((gaussian_action(u) - 1.0).abs() < 1e-8);
        assert!(gaussian_action(0.999_999_999) <= GAUSSIAN_ACTION_LIMIT);
    }

    #[test]
    fn test_longitudinal_moments() {
        let config = config_with(TransverseDistribution::Gaussian, 20000);
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(11);
        let mut bunch = Bunch::new(0, 0, 20000, 1e10);
        populate(&mut bunch, &config, &ring, &mut rng);
        bunch.compute_statistics(config.lattice.interaction_points[0].beta).unwrap();
        let s = bunch.stats;
        // 3σ combined truncation trims the RMS by a few percent
        assert!((s.bunch_length / config.ring.bunch_length - 0.95).abs() < 0.05);
        assert!((s.energy_spread / config.ring.energy_spread - 0.95).abs() < 0.05);
        assert!(s.mean[4].abs() < 0.05 * config.ring.bunch_length);
    }

    #[test]
    fn test_transverse_emittance_scale() {
        for distribution in [
            TransverseDistribution::Gaussian,
            TransverseDistribution::Parabolic,
            TransverseDistribution::Kappa,
        ] {
            let config = config_with(distribution, 20000);
            let ring = config.ring_parameters();
            let mut rng = StdRng::seed_from_u64(5);
            let mut bunch = Bunch::new(0, 0, 20000, 1e10);
            populate(&mut bunch, &config, &ring, &mut rng);
            bunch.compute_statistics(config.lattice.interaction_points[0].beta).unwrap();
            let ratio = bunch.stats.emittance[0] / config.ring.emittance[0];
            assert!(ratio > 0.3 && ratio < 3.0, "{:?}: ratio {}", distribution, ratio);
            assert!(bunch.stats.mean[0].abs() < 0.05 * bunch.stats.rms_size[0]);
        }
    }

    #[test]
    fn test_single_particle_sits_on_offsets() {
        let mut config = config_with(TransverseDistribution::Gaussian, 1);
        config.bunch.offsets = [1e-4, 2e-6, -3e-5, 0.0, 1e-3, 1e-4];
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(1);
        let mut bunch = Bunch::new(0, 0, 1, 1e10);
        populate(&mut bunch, &config, &ring, &mut rng);
        assert_eq!(bunch.particle(0), config.bunch.offsets);
    }

    #[test]
    fn test_same_seed_same_distribution() {
        let config = config_with(TransverseDistribution::Parabolic, 100);
        let ring = config.ring_parameters();
        let mut a = Bunch::new(0, 0, 100, 1e10);
        let mut b = Bunch::new(0, 0, 100, 1e10);
        populate(&mut a, &config, &ring, &mut StdRng::seed_from_u64(42));
        populate(&mut b, &config, &ring, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.x, b.x);
        assert_eq!(a.pz, b.pz);
    }
}
