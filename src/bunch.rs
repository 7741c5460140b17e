//! Macro-particle ensemble of one bunch
//!
//! Phase-space coordinates are stored as separate arrays
//! (x, px, y, py, z, pz) with a survival mask. Lost particles keep
//! their slot so indices stay stable for the whole run; every
//! statistic and kick skips them.
//!
//! z > 0 is the bunch head (t = −z/c).

use crate::error::{Result, TrackError};
use serde::Serialize;

/// Padding applied to the survivor z range (m)
const Z_RANGE_PADDING: f64 = 1e-6;

/// Moments of the surviving particles
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BunchStats {
    /// Centroid [x, px, y, py, z, pz]
    pub mean: [f64; 6],
    /// RMS emittance from centered moments [x, y] (m·rad)
    pub emittance: [f64; 2],
    /// Emittance from uncentered moments, includes the orbit offset [x, y]
    pub effective_emittance: [f64; 2],
    /// sqrt(ε·β) [x, y] (m)
    pub rms_size: [f64; 2],
    /// sqrt(ε_eff·β) [x, y] (m)
    pub effective_size: [f64; 2],
    /// Centered RMS of z (m)
    pub bunch_length: f64,
    /// Centered RMS of pz
    pub energy_spread: f64,
    pub survivors: usize,
}

/// Longitudinal slicing of the surviving particles, head first
#[derive(Debug, Clone)]
pub struct LongitudinalBins {
    pub z_min: f64,
    pub z_max: f64,
    pub dz: f64,
    /// Particle indices per slice; slice 0 is the head
    pub indices: Vec<Vec<usize>>,
}

impl LongitudinalBins {
    /// z at the center of slice `k`
    pub fn center(&self, k: usize) -> f64 {
        self.z_max - (k as f64 + 0.5) * self.dz
    }

    /// Slice centres, head first
    pub fn centers(&self) -> Vec<f64> {
        (0..self.len()).map(|k| self.center(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Bunch {
    /// Position in fill order
    pub index: usize,
    /// Bucket index (harmonic number)
    pub harmonic: usize,
    /// Buckets to the next bunch in fill order (wrapping to the first)
    pub gap: usize,
    /// Bunch current (A)
    pub current: f64,
    /// Real electrons in the bunch
    pub electrons: f64,
    /// Real electrons per macro-particle
    pub macro_charge: f64,

    pub x: Vec<f64>,
    pub px: Vec<f64>,
    pub y: Vec<f64>,
    pub py: Vec<f64>,
    pub z: Vec<f64>,
    pub pz: Vec<f64>,
    pub lost: Vec<bool>,

    pub stats: BunchStats,
    /// Centroid z recorded at the end of the previous longitudinal step
    pub z_mean_last_turn: f64,
    /// Survivor z range from the last longitudinal step
    pub z_extent: (f64, f64),
    /// Time until the next bunch reaches the cavities (s)
    pub time_to_next: f64,
}

impl Bunch {
    pub fn new(index: usize, harmonic: usize, macro_particles: usize, electrons: f64) -> Self {
        Self {
            index,
            harmonic,
            gap: 0,
            current: 0.0,
            electrons,
            macro_charge: electrons / macro_particles as f64,
            x: vec![0.0; macro_particles],
            px: vec![0.0; macro_particles],
            y: vec![0.0; macro_particles],
            py: vec![0.0; macro_particles],
            z: vec![0.0; macro_particles],
            pz: vec![0.0; macro_particles],
            lost: vec![false; macro_particles],
            stats: BunchStats::default(),
            z_mean_last_turn: 0.0,
            z_extent: (0.0, 0.0),
            time_to_next: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Indices of surviving particles
    pub fn survivors(&self) -> impl Iterator<Item = usize> + '_ {
        self.lost.iter().enumerate().filter(|(_, &l)| !l).map(|(i, _)| i)
    }

    /// Recompute the moments over surviving particles. `beta` holds the Twiss
    /// beta functions [x, y] at the current observation point.
    pub fn compute_statistics(&mut self, beta: [f64; 2]) -> Result<()> {
        let mut n = 0usize;
        let mut sum = [0.0; 6];
        // uncentered second moments: xx, pxpx, xpx, yy, pypy, ypy, zz, pzpz
        let mut raw = [0.0; 8];
        for i in self.survivors() {
            let p = [self.x[i], self.px[i], self.y[i], self.py[i], self.z[i], self.pz[i]];
            for (s, v) in sum.iter_mut().zip(p) {
                *s += v;
            }
            raw[0] += p[0] * p[0];
            raw[1] += p[1] * p[1];
            raw[2] += p[0] * p[1];
            raw[3] += p[2] * p[2];
            raw[4] += p[3] * p[3];
            raw[5] += p[2] * p[3];
            raw[6] += p[4] * p[4];
            raw[7] += p[5] * p[5];
            n += 1;
        }
        if n == 0 {
            return Err(TrackError::NoSurvivors { bunch: self.index });
        }

        let nf = n as f64;
        let mean = sum.map(|s| s / nf);
        let raw = raw.map(|s| s / nf);

        let mut stats = BunchStats { mean, survivors: n, ..BunchStats::default() };
        for plane in 0..2 {
            let (u, p) = (mean[2 * plane], mean[2 * plane + 1]);
            let (uu, pp, up) = (raw[3 * plane], raw[3 * plane + 1], raw[3 * plane + 2]);
            let effective = (uu * pp - up * up).max(0.0).sqrt();
            let centered = ((uu - u * u) * (pp - p * p) - (up - u * p).powi(2)).max(0.0).sqrt();
            stats.emittance[plane] = centered;
            stats.effective_emittance[plane] = effective;
            stats.rms_size[plane] = (centered * beta[plane]).sqrt();
            stats.effective_size[plane] = (effective * beta[plane]).sqrt();
        }
        stats.bunch_length = (raw[6] - mean[4] * mean[4]).max(0.0).sqrt();
        stats.energy_spread = (raw[7] - mean[5] * mean[5]).max(0.0).sqrt();

        self.stats = stats;
        Ok(())
    }

    /// Flag particles outside the rectangular aperture [ax, ay]. Returns the
    /// number of particles lost in this call.
    pub fn mark_lost(&mut self, aperture: [f64; 2]) -> usize {
        let mut newly_lost = 0;
        for i in 0..self.len() {
            if self.lost[i] {
                continue;
            }
            let outside = self.x[i].abs() > aperture[0] || self.y[i].abs() > aperture[1];
            if outside || !self.x[i].is_finite() || !self.y[i].is_finite() {
                self.lost[i] = true;
                newly_lost += 1;
            }
        }
        newly_lost
    }

    /// Min and max z over survivors, padded by 1 µm
    pub fn z_range(&self) -> (f64, f64) {
        let (lo, hi) = self
            .survivors()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
                (lo.min(self.z[i]), hi.max(self.z[i]))
            });
        if lo > hi {
            return (-Z_RANGE_PADDING, Z_RANGE_PADDING);
        }
        (lo - Z_RANGE_PADDING, hi + Z_RANGE_PADDING)
    }

    /// Slice the survivors into `bins` equal z-slices between the padded
    /// z range, head first.
    pub fn bin_longitudinal(&self, bins: usize) -> LongitudinalBins {
        let (z_min, z_max) = self.z_range();
        let dz = (z_max - z_min) / bins as f64;
        let mut indices = vec![Vec::new(); bins];
        for i in self.survivors() {
            let k = (((z_max - self.z[i]) / dz) as usize).min(bins - 1);
            indices[k].push(i);
        }
        LongitudinalBins { z_min, z_max, dz, indices }
    }

    /// Apply the same momentum change to every surviving particle
    pub fn kick(&mut self, dpx: f64, dpy: f64, dpz: f64) {
        for i in 0..self.len() {
            if self.lost[i] {
                continue;
            }
            self.px[i] += dpx;
            self.py[i] += dpy;
            self.pz[i] += dpz;
        }
    }

    /// Phase-space coordinates of particle `i`
    pub fn particle(&self, i: usize) -> [f64; 6] {
        [self.x[i], self.px[i], self.y[i], self.py[i], self.z[i], self.pz[i]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn correlated_bunch(n: usize, offset: [f64; 2]) -> Bunch {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut bunch = Bunch::new(0, 0, n, 1e10);
        for i in 0..n {
            let a: f64 = normal.sample(&mut rng);
            let b: f64 = normal.sample(&mut rng);
            bunch.x[i] = 1e-4 * a + offset[0];
            bunch.px[i] = 1e-5 * (0.5 * a + b) + offset[1];
            bunch.y[i] = 2e-5 * b;
            bunch.py[i] = 3e-6 * a;
            bunch.z[i] = 3e-3 * a;
            bunch.pz[i] = 1e-3 * b;
        }
        bunch
    }

    #[test]
    fn test_emittance_invariant_under_offset() {
        let mut a = correlated_bunch(5000, [0.0, 0.0]);
        let mut b = correlated_bunch(5000, [3e-4, 2e-5]);
        a.compute_statistics([10.0, 5.0]).unwrap();
        b.compute_statistics([10.0, 5.0]).unwrap();
        let rel = (a.stats.emittance[0] - b.stats.emittance[0]).abs() / a.stats.emittance[0];
        assert!(rel < 1e-8, "relative change {}", rel);
        assert!(b.stats.effective_emittance[0] > b.stats.emittance[0]);
    }

    #[test]
    fn test_effective_emittance_identity() {
        // ε_eff² = (σxx + x̄²)(σpp + p̄²) − (σxp + x̄p̄)²
        let mut bunch = correlated_bunch(4000, [2e-4, -1e-5]);
        bunch.compute_statistics([1.0, 1.0]).unwrap();
        let n = bunch.len() as f64;
        let (xm, pm) = (bunch.stats.mean[0], bunch.stats.mean[1]);
        let sxx = bunch.x.iter().map(|x| (x - xm).powi(2)).sum::<f64>() / n;
        let spp = bunch.px.iter().map(|p| (p - pm).powi(2)).sum::<f64>() / n;
        let sxp = bunch.x.iter().zip(&bunch.px).map(|(x, p)| (x - xm) * (p - pm)).sum::<f64>() / n;
        let expected = ((sxx + xm * xm) * (spp + pm * pm) - (sxp + xm * pm).powi(2)).sqrt();
        let eff = bunch.stats.effective_emittance[0];
        assert!((eff - expected).abs() / expected < 1e-9);
        let rms = bunch.stats.emittance[0];
        let diff = eff * eff - rms * rms;
        let centroid = xm * xm * spp + pm * pm * sxx - 2.0 * xm * pm * sxp;
        assert!((diff - centroid).abs() < 1e-6 * eff * eff);
    }

    #[test]
    fn test_sizes_use_beta() {
        let mut bunch = correlated_bunch(2000, [0.0, 0.0]);
        bunch.compute_statistics([4.0, 9.0]).unwrap();
        let s = bunch.stats;
        assert!((s.rms_size[0] - (s.emittance[0] * 4.0).sqrt()).abs() < 1e-15);
        assert!((s.rms_size[1] - (s.emittance[1] * 9.0).sqrt()).abs() < 1e-15);
        assert!((s.bunch_length - 3e-3).abs() < 2e-4);
    }

    #[test]
    fn test_lost_particles_are_excluded() {
        let mut bunch = Bunch::new(0, 0, 4, 4.0);
        bunch.x = vec![1e-3, -1e-3, 0.5, 0.0];
        bunch.compute_statistics([1.0, 1.0]).unwrap();
        assert_eq!(bunch.stats.survivors, 4);

        assert_eq!(bunch.mark_lost([0.01, 0.01]), 1);
        assert_eq!(bunch.mark_lost([0.01, 0.01]), 0);
        bunch.compute_statistics([1.0, 1.0]).unwrap();
        assert_eq!(bunch.stats.survivors, 3);
        assert!(bunch.stats.mean[0].abs() < 1e-15);
        assert_eq!(bunch.len(), 4);

        bunch.kick(1.0, 0.0, 0.0);
        assert_eq!(bunch.px[2], 0.0);
        assert_eq!(bunch.px[0], 1.0);
    }

    #[test]
    fn test_no_survivors_is_an_error() {
        let mut bunch = Bunch::new(3, 0, 2, 2.0);
        bunch.x = vec![1.0, -1.0];
        bunch.mark_lost([0.01, 0.01]);
        let err = bunch.compute_statistics([1.0, 1.0]).unwrap_err();
        assert!(matches!(err, TrackError::NoSurvivors { bunch: 3 }));
    }

    #[test]
    fn test_binning_head_first() {
        let mut bunch = Bunch::new(0, 0, 3, 3.0);
        bunch.z = vec![-1e-3, 0.0, 1e-3];
        let bins = bunch.bin_longitudinal(4);
        assert_eq!(bins.indices[0], vec![2]);
        assert_eq!(bins.indices[3], vec![0]);
        assert!(bins.center(0) > bins.center(3));
        let total: usize = bins.indices.iter().map(Vec::len).sum();
        assert_eq!(total, 3);
    }
}
