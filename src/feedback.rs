//! Bunch-by-bunch FIR feedback
//!
//! A FIFO keeps the bunch centroids (x, y, z) of the last
//! `taps + delay` turns. Each turn the filter runs over the oldest `taps`
//! entries and the result, scaled by loop gain and kicker strength, is
//! applied to every particle of the bunch.
//!
//! References:
//! - T. Nakamura et al., "Transverse bunch-by-bunch feedback system for the
//!   SPring-8 storage ring", EPAC 2004

use crate::bunch::Bunch;
use crate::config::{FeedbackConfig, RingParameters};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FirFeedback {
    /// Filter taps, newest turn first
    coefficients: Vec<f64>,
    gain: [f64; 3],
    strength: [f64; 3],
    limit: [f64; 3],
    /// Centroid history, oldest first; one [x, y, z] per bunch
    history: VecDeque<Vec<[f64; 3]>>,
    clamped: bool,
}

impl FirFeedback {
    pub fn new(config: &FeedbackConfig, bunch_count: usize) -> Self {
        let depth = config.coefficients.len() + config.delay;
        Self {
            coefficients: config.coefficients.clone(),
            gain: config.gain,
            strength: config.kick_strength,
            limit: config.kick_limit,
            history: std::iter::repeat(vec![[0.0; 3]; bunch_count]).take(depth).collect(),
            clamped: false,
        }
    }

    /// Whether any kick has hit the limit so far
    pub fn clamped(&self) -> bool {
        self.clamped
    }

    /// Push this turn's centroids and return the kicks [x, y, z] per bunch
    fn filter(&mut self, centroids: Vec<[f64; 3]>) -> Vec<[f64; 3]> {
        self.history.pop_front();
        self.history.push_back(centroids);

        let taps = self.coefficients.len();
        let bunch_count = self.history.back().map_or(0, Vec::len);
        let mut kicks = vec![[0.0; 3]; bunch_count];
        for (i, kick) in kicks.iter_mut().enumerate() {
            for (k, turn) in self.history.iter().take(taps).enumerate() {
                let c = self.coefficients[taps - k - 1];
                for p in 0..3 {
                    kick[p] += c * turn[i][p];
                }
            }
            for p in 0..3 {
                kick[p] *= self.gain[p] * self.strength[p];
                if kick[p].abs() > self.limit[p] {
                    kick[p] = kick[p].signum() * self.limit[p];
                    self.clamped = true;
                }
            }
        }
        kicks
    }

    /// Kick every bunch from its filtered centroid history. Statistics must
    /// be current.
    pub fn apply(&mut self, bunches: &mut [Bunch], ring: &RingParameters) {
        let was_clamped = self.clamped;
        let centroids = bunches
            .iter()
            .map(|b| [b.stats.mean[0], b.stats.mean[2], b.stats.mean[4]])
            .collect();
        let kicks = self.filter(centroids);
        for (bunch, kick) in bunches.iter_mut().zip(&kicks) {
            bunch.kick(kick[0], kick[1], kick[2] / (ring.beta * ring.beta));
        }
        if self.clamped && !was_clamped {
            warn!("FIR feedback kick reached the kick limit; further clamping is not reported");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn feedback(coefficients: Vec<f64>, delay: usize) -> FeedbackConfig {
        FeedbackConfig {
            enabled: true,
            coefficients,
            delay,
            gain: [1.0; 3],
            kick_strength: [1.0; 3],
            kick_limit: [1.0; 3],
        }
    }

    #[test]
    fn test_taps_weight_newest_first() {
        let mut fir = FirFeedback::new(&feedback(vec![1.0, 10.0, 100.0], 0), 1);
        assert_eq!(fir.filter(vec![[1.0, 0.0, 0.0]])[0][0], 1.0);
        // second turn: newest 2 × 1 plus previous 1 × 10
        assert_eq!(fir.filter(vec![[2.0, 0.0, 0.0]])[0][0], 12.0);
        assert_eq!(fir.filter(vec![[0.0, 0.0, 0.0]])[0][0], 120.0);
        assert_eq!(fir.filter(vec![[0.0, 0.0, 0.0]])[0][0], 200.0);
    }

    #[test]
    fn test_delay_shifts_response() {
        let mut fir = FirFeedback::new(&feedback(vec![1.0], 2), 1);
        assert_eq!(fir.filter(vec![[0.0, 5.0, 0.0]])[0][1], 0.0);
        assert_eq!(fir.filter(vec![[0.0, 0.0, 0.0]])[0][1], 0.0);
        assert_eq!(fir.filter(vec![[0.0, 0.0, 0.0]])[0][1], 5.0);
    }

    #[test]
    fn test_kick_is_clamped() {
        let mut config = feedback(vec![1.0], 0);
        config.gain = [-1.0, 1.0, 1.0];
        config.kick_limit = [1e-6, 1e-6, 1e-6];
        let mut fir = FirFeedback::new(&config, 2);
        let kicks = fir.filter(vec![[1e-3, 1e-9, 0.0], [0.0, 0.0, 0.0]]);
        assert_eq!(kicks[0][0], -1e-6);
        assert_eq!(kicks[0][1], 1e-9);
        assert!(fir.clamped());
    }

    #[test]
    fn test_apply_scales_energy_kick() {
        let config = Config::default();
        let ring = config.ring_parameters();
        let mut fir_config = feedback(vec![1.0], 0);
        fir_config.gain = [-0.1, -0.1, -0.1];
        let mut fir = FirFeedback::new(&fir_config, 1);
        let mut bunch = Bunch::new(0, 0, 2, 1e10);
        bunch.x = vec![1e-4, 3e-4];
        bunch.z = vec![1e-3, 1e-3];
        bunch.compute_statistics([10.0, 10.0]).unwrap();
        let mut bunches = vec![bunch];
        fir.apply(&mut bunches, &ring);
        assert!((bunches[0].px[0] + 2e-5).abs() < 1e-18);
        let expected = -1e-4 / (ring.beta * ring.beta);
        assert!((bunches[0].pz[1] - expected).abs() < 1e-15);
        assert!(!fir.clamped());
    }
}
