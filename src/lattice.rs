//! Single-particle ring optics
//!
//! - Linear transverse transfer between interaction points (Twiss matrices)
//! - Chromatic phase advance per particle
//! - Longitudinal drift through the ring
//! - Synchrotron radiation damping and quantum excitation
//! - Sinusoidal drive-mode kicks

use crate::bunch::Bunch;
use crate::config::{Config, DampingConfig, DriveConfig, InteractionPoint, RingParameters};
use crate::constants::C0;
use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use std::f64::consts::PI;

/// Twiss transfer matrix from (α1, β1) to (α2, β2) over phase advance μ (rad)
pub fn twiss_matrix(alpha1: f64, beta1: f64, alpha2: f64, beta2: f64, mu: f64) -> Matrix2<f64> {
    let (s, c) = mu.sin_cos();
    let root = (beta1 * beta2).sqrt();
    Matrix2::new(
        (beta2 / beta1).sqrt() * (c + alpha1 * s),
        root * s,
        -((1.0 + alpha1 * alpha2) * s + (alpha2 - alpha1) * c) / root,
        (beta1 / beta2).sqrt() * (c - alpha2 * s),
    )
}

/// One transverse plane of a lattice segment
#[derive(Debug, Clone)]
struct PlaneMap {
    alpha: [f64; 2],
    beta: [f64; 2],
    /// Dispersion and its derivative at entrance and exit
    eta: [f64; 2],
    eta_prime: [f64; 2],
    /// Phase advance (rad)
    mu: f64,
    /// Chromaticity scaled to the segment: dμ/dδ
    chroma: f64,
    matrix: Matrix2<f64>,
}

impl PlaneMap {
    fn apply(&self, u: &mut f64, pu: &mut f64, delta: f64) {
        let ub = *u - self.eta[0] * delta;
        let pb = *pu - self.eta_prime[0] * delta;
        let out = if self.chroma == 0.0 {
            self.matrix * Vector2::new(ub, pb)
        } else {
            let mu = self.mu + self.chroma * delta;
            twiss_matrix(self.alpha[0], self.beta[0], self.alpha[1], self.beta[1], mu) * Vector2::new(ub, pb)
        };
        *u = out[0] + self.eta[1] * delta;
        *pu = out[1] + self.eta_prime[1] * delta;
    }
}

#[derive(Debug, Clone)]
struct Segment {
    planes: [PlaneMap; 2],
}

/// Transverse maps between consecutive interaction points and the full turn
#[derive(Debug, Clone)]
pub struct TransverseMap {
    segments: Vec<Segment>,
    one_turn: Segment,
}

impl TransverseMap {
    pub fn new(config: &Config) -> Self {
        let ips = &config.lattice.interaction_points;
        let tunes = config.ring.tunes;
        let chroma = config.ring.chromaticity;
        let total: [f64; 2] = [
            ips.iter().map(|ip| ip.phase_advance[0]).sum(),
            ips.iter().map(|ip| ip.phase_advance[1]).sum(),
        ];

        let segments = (0..ips.len())
            .map(|k| {
                let from = &ips[k];
                let to = &ips[(k + 1) % ips.len()];
                let planes = [0, 1].map(|p| {
                    let fraction = if total[p] != 0.0 { from.phase_advance[p] / total[p] } else { 0.0 };
                    plane_map(from, to, p, 2.0 * PI * from.phase_advance[p], 2.0 * PI * chroma[p] * fraction)
                });
                Segment { planes }
            })
            .collect();

        let ip0 = &ips[0];
        let one_turn = Segment {
            planes: [0, 1].map(|p| plane_map(ip0, ip0, p, 2.0 * PI * tunes[p], 2.0 * PI * chroma[p])),
        };
        Self { segments, one_turn }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Transfer from interaction point `k` to the next one
    pub fn transfer_segment(&self, bunch: &mut Bunch, k: usize) {
        apply_segment(&self.segments[k], bunch);
    }

    /// Full-turn transfer starting and ending at the first interaction point
    pub fn transfer_turn(&self, bunch: &mut Bunch) {
        apply_segment(&self.one_turn, bunch);
    }
}

fn plane_map(from: &InteractionPoint, to: &InteractionPoint, p: usize, mu: f64, chroma: f64) -> PlaneMap {
    let alpha = [from.alpha[p], to.alpha[p]];
    let beta = [from.beta[p], to.beta[p]];
    PlaneMap {
        alpha,
        beta,
        eta: [from.dispersion[2 * p], to.dispersion[2 * p]],
        eta_prime: [from.dispersion[2 * p + 1], to.dispersion[2 * p + 1]],
        mu,
        chroma,
        matrix: twiss_matrix(alpha[0], beta[0], alpha[1], beta[1], mu),
    }
}

fn apply_segment(segment: &Segment, bunch: &mut Bunch) {
    let [mx, my] = &segment.planes;
    for i in 0..bunch.len() {
        if bunch.lost[i] {
            continue;
        }
        let delta = bunch.pz[i];
        mx.apply(&mut bunch.x[i], &mut bunch.px[i], delta);
        my.apply(&mut bunch.y[i], &mut bunch.py[i], delta);
    }
}

/// Longitudinal drift for one turn: z −= η·C·pz
pub fn longitudinal_drift(bunch: &mut Bunch, ring: &RingParameters) {
    let slip = ring.eta * ring.t0 * ring.beta * C0;
    for i in 0..bunch.len() {
        if !bunch.lost[i] {
            bunch.z[i] -= slip * bunch.pz[i];
        }
    }
}

/// Radiation damping and quantum excitation for one turn.
///
/// Transverse damping acts on the normalized momentum at the first
/// interaction point; excitation restores the natural emittance. A bunch
/// of one macro-particle is damped without noise.
pub fn synchrotron_radiation(
    bunch: &mut Bunch,
    config: &Config,
    damping: &DampingConfig,
    rng: &mut StdRng,
) {
    let ip = &config.lattice.interaction_points[0];
    let tau = config.ring.damping_turns;
    let excite = damping.excitation && bunch.len() > 1;

    if damping.transverse {
        for p in 0..2 {
            let decay = 1.0 - 2.0 / tau[p];
            let noise = 2.0 * (config.ring.emittance[p] / tau[p]).sqrt();
            let (alpha, beta) = (ip.alpha[p], ip.beta[p]);
            let root = beta.sqrt();
            for i in 0..bunch.len() {
                if bunch.lost[i] {
                    continue;
                }
                let (u, pu) = if p == 0 { (bunch.x[i], bunch.px[i]) } else { (bunch.y[i], bunch.py[i]) };
                let mut p_hat = (alpha * u + beta * pu) / root;
                p_hat *= decay;
                if excite {
                    let r: f64 = rng.sample(StandardNormal);
                    p_hat += noise * r;
                }
                let new_pu = (p_hat * root - alpha * u) / beta;
                if p == 0 {
                    bunch.px[i] = new_pu;
                } else {
                    bunch.py[i] = new_pu;
                }
            }
        }
    }

    if damping.longitudinal {
        let decay = 1.0 - 2.0 / tau[2];
        let noise = 2.0 * config.ring.energy_spread / tau[2].sqrt();
        for i in 0..bunch.len() {
            if bunch.lost[i] {
                continue;
            }
            if excite {
                let r: f64 = rng.sample(StandardNormal);
                bunch.pz[i] += noise * r;
            }
            bunch.pz[i] *= decay;
        }
    }
}

/// True while the drive is switched on for turn `turn`
pub fn drive_active(drive: &DriveConfig, turn: usize) -> bool {
    drive.enabled && drive.start < turn && turn < drive.end
}

/// Sinusoidal kick at the drive frequency, phased by the bunch arrival time
pub fn drive_kick(bunch: &mut Bunch, drive: &DriveConfig, ring: &RingParameters, turn: usize) {
    let t = turn as f64 * ring.t0 + bunch.harmonic as f64 * ring.t_rf;
    let kick = drive.amplitude * (2.0 * PI * drive.frequency * t).cos();
    match drive.plane {
        0 => bunch.kick(0.0, 0.0, kick / ring.energy / (ring.beta * ring.beta)),
        1 => bunch.kick(kick, 0.0, 0.0),
        _ => bunch.kick(0.0, kick, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn ring_with_ips(n: usize) -> Config {
        let mut config = Config::default();
        let tunes = config.ring.tunes;
        config.lattice.interaction_points = (0..n)
            .map(|k| InteractionPoint {
                alpha: [0.3 * k as f64, -0.2],
                beta: [5.0 + k as f64, 3.0 + 2.0 * k as f64],
                phase_advance: [tunes[0] / n as f64, tunes[1] / n as f64],
                ..InteractionPoint::default()
            })
            .collect();
        config
    }

    #[test]
    fn test_twiss_matrix_is_symplectic() {
        let m = twiss_matrix(0.4, 7.0, -1.2, 2.5, 1.3);
        assert!((m.determinant() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_segments_compose_to_one_turn() {
        let config = ring_with_ips(3);
        let map = TransverseMap::new(&config);
        let mut a = Bunch::new(0, 0, 1, 1.0);
        a.x[0] = 1e-4;
        a.px[0] = -2e-5;
        a.y[0] = 3e-5;
        a.py[0] = 1e-6;
        let mut b = a.clone();
        for k in 0..map.segment_count() {
            map.transfer_segment(&mut a, k);
        }
        map.transfer_turn(&mut b);
        assert!((a.x[0] - b.x[0]).abs() < 1e-15);
        assert!((a.px[0] - b.px[0]).abs() < 1e-15);
        assert!((a.y[0] - b.y[0]).abs() < 1e-15);
    }

    #[test]
    fn test_one_turn_preserves_courant_snyder_invariant() {
        let config = ring_with_ips(1);
        let map = TransverseMap::new(&config);
        let ip = &config.lattice.interaction_points[0];
        let (alpha, beta) = (ip.alpha[0], ip.beta[0]);
        let gamma = (1.0 + alpha * alpha) / beta;
        let invariant = |x: f64, p: f64| gamma * x * x + 2.0 * alpha * x * p + beta * p * p;
        let mut bunch = Bunch::new(0, 0, 1, 1.0);
        bunch.x[0] = 1e-4;
        let j0 = invariant(bunch.x[0], bunch.px[0]);
        for _ in 0..100 {
            map.transfer_turn(&mut bunch);
        }
        assert!((invariant(bunch.x[0], bunch.px[0]) - j0).abs() < 1e-12 * j0);
    }

    #[test]
    fn test_chromatic_phase_shift() {
        let mut config = ring_with_ips(1);
        config.ring.chromaticity = [2.0, 0.0];
        let map = TransverseMap::new(&config);
        let mut on = Bunch::new(0, 0, 1, 1.0);
        on.x[0] = 1e-4;
        let mut off = on.clone();
        off.pz[0] = 1e-3;
        map.transfer_turn(&mut on);
        map.transfer_turn(&mut off);
        assert!((on.x[0] - off.x[0]).abs() > 1e-9);
    }

    #[test]
    fn test_damping_without_excitation_shrinks_amplitude() {
        let config = ring_with_ips(1);
        let damping = DampingConfig { transverse: true, longitudinal: true, excitation: false };
        let map = TransverseMap::new(&config);
        let mut rng = StdRng::seed_from_u64(3);
        let mut bunch = Bunch::new(0, 0, 1, 1.0);
        bunch.x[0] = 1e-4;
        bunch.pz[0] = 1e-3;
        let tau = config.ring.damping_turns[0];
        let turns = tau as usize;
        for _ in 0..turns {
            map.transfer_turn(&mut bunch);
            synchrotron_radiation(&mut bunch, &config, &damping, &mut rng);
        }
        let ip = &config.lattice.interaction_points[0];
        let x_hat = bunch.x[0] / ip.beta[0].sqrt();
        let p_hat = (ip.alpha[0] * bunch.x[0] + ip.beta[0] * bunch.px[0]) / ip.beta[0].sqrt();
        let amplitude = (x_hat * x_hat + p_hat * p_hat).sqrt() * ip.beta[0].sqrt();
        // amplitude damping time τ: e^{-1} after τ turns
        assert!((amplitude / 1e-4 - (-1.0f64).exp()).abs() < 0.05);
        assert!(bunch.pz[0].abs() < 1e-3 * 0.2);
    }

    #[test]
    fn test_drive_window() {
        let drive = DriveConfig { enabled: true, start: 10, end: 20, ..DriveConfig::default() };
        assert!(!drive_active(&drive, 10));
        assert!(drive_active(&drive, 11));
        assert!(!drive_active(&drive, 20));
    }

    #[test]
    fn test_longitudinal_drift_direction() {
        let config = Config::default();
        let ring = config.ring_parameters();
        let mut bunch = Bunch::new(0, 0, 1, 1.0);
        bunch.pz[0] = 1e-3;
        longitudinal_drift(&mut bunch, &ring);
        // above transition a higher-energy particle falls behind
        assert!(bunch.z[0] < 0.0);
    }
}
