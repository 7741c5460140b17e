//! Fill pattern and beam-level statistics

use crate::bunch::{Bunch, BunchStats};
use crate::config::{Config, RingParameters};
use crate::constants::ELECTRON_CHARGE;
use crate::distribution::populate;
use crate::error::Result;
use rand::rngs::StdRng;
use serde::Serialize;

/// Moments of one selected bunch, recorded every turn
#[derive(Debug, Clone, Serialize)]
pub struct TrackedBunch {
    pub bunch: usize,
    pub mean: [f64; 6],
    pub bunch_length: f64,
    pub energy_spread: f64,
    pub rms_size: [f64; 2],
    pub emittance: [f64; 2],
    pub effective_emittance: [f64; 2],
}

impl TrackedBunch {
    fn new(bunch: usize, stats: &BunchStats) -> Self {
        Self {
            bunch,
            mean: stats.mean,
            bunch_length: stats.bunch_length,
            energy_spread: stats.energy_spread,
            rms_size: stats.rms_size,
            emittance: stats.emittance,
            effective_emittance: stats.effective_emittance,
        }
    }
}

/// Beam statistics of one turn
#[derive(Debug, Clone, Serialize)]
pub struct TurnSummary {
    pub turn: usize,
    /// Real ions over all interaction points
    pub ion_charge: f64,
    /// Largest |centroid| over bunches [x, px, y, py, z, pz]
    pub max_centroid: [f64; 6],
    pub mean_centroid: [f64; 6],
    /// RMS over bunches of the centroids
    pub rms_centroid: [f64; 6],
    pub max_emittance: [f64; 2],
    pub max_size: [f64; 2],
    pub survivors: usize,
    pub tracked: Vec<TrackedBunch>,
}

#[derive(Debug, Clone)]
pub struct Beam {
    pub bunches: Vec<Bunch>,
}

impl Beam {
    /// Lay out the bunches of the fill pattern. Particles are not yet populated.
    pub fn new(config: &Config, ring: &RingParameters) -> Self {
        let harmonics = config.harmonic_numbers();
        let n = harmonics.len();
        let weights = if config.fill.charge_weights.is_empty() {
            vec![1.0; n]
        } else {
            config.fill.charge_weights.clone()
        };
        let total: f64 = weights.iter().sum();

        let bunches = harmonics
            .iter()
            .enumerate()
            .map(|(i, &h)| {
                let current = config.ring.current * weights[i] / total;
                let electrons = current * ring.t0 / ELECTRON_CHARGE;
                let mut bunch = Bunch::new(i, h, config.bunch.macro_particles, electrons);
                bunch.current = current;
                bunch.gap = if i + 1 < n {
                    harmonics[i + 1] - h
                } else {
                    harmonics[0] + ring.harmonic - h
                };
                bunch.time_to_next = bunch.gap as f64 * ring.t_rf;
                bunch
            })
            .collect();
        Self { bunches }
    }

    /// Draw every bunch's initial distribution from the shared generator
    pub fn populate(&mut self, config: &Config, ring: &RingParameters, rng: &mut StdRng) {
        for bunch in self.bunches.iter_mut() {
            populate(bunch, config, ring, rng);
        }
    }

    pub fn len(&self) -> usize {
        self.bunches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bunches.is_empty()
    }

    pub fn compute_statistics(&mut self, beta: [f64; 2]) -> Result<()> {
        for bunch in self.bunches.iter_mut() {
            bunch.compute_statistics(beta)?;
        }
        Ok(())
    }

    /// Largest RMS beam size over all bunches [x, y]
    pub fn max_rms_size(&self) -> [f64; 2] {
        self.bunches.iter().fold([0.0f64; 2], |acc, b| {
            [acc[0].max(b.stats.rms_size[0]), acc[1].max(b.stats.rms_size[1])]
        })
    }

    /// Flag particles outside the aperture in every bunch
    pub fn mark_lost(&mut self, aperture: [f64; 2]) -> usize {
        self.bunches.iter_mut().map(|b| b.mark_lost(aperture)).sum()
    }

    /// Aggregate the current statistics. `track` selects bunches recorded in full.
    pub fn summary(&self, turn: usize, ion_charge: f64, track: &[usize]) -> TurnSummary {
        let n = self.bunches.len().max(1) as f64;
        let mut summary = TurnSummary {
            turn,
            ion_charge,
            max_centroid: [0.0; 6],
            mean_centroid: [0.0; 6],
            rms_centroid: [0.0; 6],
            max_emittance: [0.0; 2],
            max_size: [0.0; 2],
            survivors: 0,
            tracked: Vec::with_capacity(track.len()),
        };
        for bunch in &self.bunches {
            let s = &bunch.stats;
            for k in 0..6 {
                summary.max_centroid[k] = summary.max_centroid[k].max(s.mean[k].abs());
                summary.mean_centroid[k] += s.mean[k] / n;
                summary.rms_centroid[k] += s.mean[k] * s.mean[k] / n;
            }
            for p in 0..2 {
                summary.max_emittance[p] = summary.max_emittance[p].max(s.emittance[p]);
                summary.max_size[p] = summary.max_size[p].max(s.rms_size[p]);
            }
            summary.survivors += s.survivors;
        }
        summary.rms_centroid = summary.rms_centroid.map(f64::sqrt);
        summary.tracked = track
            .iter()
            .filter_map(|&i| self.bunches.get(i).map(|b| TrackedBunch::new(i, &b.stats)))
            .collect();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainConfig;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gaps_wrap_around_the_ring() {
        let mut config = Config::default();
        config.fill.trains = vec![
            TrainConfig { start: 10, bunches: 3, gap: 1 },
            TrainConfig { start: 400, bunches: 1, gap: 0 },
        ];
        let ring = config.ring_parameters();
        let beam = Beam::new(&config, &ring);
        let gaps: Vec<usize> = beam.bunches.iter().map(|b| b.gap).collect();
        assert_eq!(gaps, vec![2, 2, 386, 410]);
        assert_eq!(gaps.iter().sum::<usize>(), config.ring.harmonic);
        assert!((beam.bunches[2].time_to_next - 386.0 * ring.t_rf).abs() < 1e-18);
    }

    #[test]
    fn test_single_bunch_gap_is_full_turn() {
        let config = Config::default();
        let ring = config.ring_parameters();
        let beam = Beam::new(&config, &ring);
        assert_eq!(beam.bunches[0].gap, config.ring.harmonic);
    }

    #[test]
    fn test_charge_weights() {
        let mut config = Config::default();
        config.fill.trains = vec![TrainConfig { start: 0, bunches: 2, gap: 0 }];
        config.fill.charge_weights = vec![1.0, 3.0];
        let ring = config.ring_parameters();
        let beam = Beam::new(&config, &ring);
        assert!((beam.bunches[0].current - 0.05).abs() < 1e-15);
        assert!((beam.bunches[1].current - 0.15).abs() < 1e-15);
        let total: f64 = beam.bunches.iter().map(|b| b.electrons).sum();
        let expected = config.ring.current * ring.t0 / ELECTRON_CHARGE;
        assert!((total - expected).abs() < 1e-9 * expected);
    }

    #[test]
    fn test_summary_aggregates() {
        let mut config = Config::default();
        config.fill.trains = vec![TrainConfig { start: 0, bunches: 2, gap: 0 }];
        config.bunch.macro_particles = 1;
        let ring = config.ring_parameters();
        let mut beam = Beam::new(&config, &ring);
        beam.bunches[0].x[0] = 3e-4;
        beam.bunches[1].x[0] = -1e-4;
        beam.compute_statistics([10.0, 10.0]).unwrap();
        let summary = beam.summary(7, 0.0, &[1]);
        assert_eq!(summary.turn, 7);
        assert!((summary.max_centroid[0] - 3e-4).abs() < 1e-18);
        assert!((summary.mean_centroid[0] - 1e-4).abs() < 1e-18);
        assert!((summary.rms_centroid[0] - 5e-8f64.sqrt()).abs() < 1e-15);
        assert_eq!(summary.survivors, 2);
        assert_eq!(summary.tracked.len(), 1);
        assert_eq!(summary.tracked[0].bunch, 1);
    }
}
