//! Coupled-bunch diagnostics
//!
//! Sampled turns feed three independent amplitude estimates per
//! coupled-bunch mode and plane (x, y, z):
//! - DFT across bunches of the normalized complex centroid signal
//! - IQ demodulation at each mode's betatron/synchrotron sideband
//! - Hilbert analytic signal of each bunch's centroid history, rebuilt into
//!   the same normalized signal at the end of the run
//!
//! Growth rates come from a least-squares line through log(amplitude).
//! When a drive is configured, the driven mode is followed by IQ
//! demodulation at the drive frequency.
//!
//! References:
//! - S. Wang et al., "Coupled bunch instability studies for Diamond-II",
//!   IPAC 2022, WEPOMS010

use crate::bunch::Bunch;
use crate::config::{Config, DriveConfig, FitWindow, RingParameters};
use crate::fft;
use num_complex::Complex64;
use serde::Serialize;
use std::f64::consts::PI;

/// Least-squares line y = a + b·x. Returns (a, b).
pub fn fit_line(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len().min(y.len()) as f64;
    if n < 2.0 {
        return (f64::NAN, f64::NAN);
    }
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxx += (xi - mx) * (xi - mx);
        sxy += (xi - mx) * (yi - my);
    }
    let slope = sxy / sxx;
    (my - slope * mx, slope)
}

/// Exponential rate (1/s) of `amplitudes` sampled every `interval` turns.
/// Non-positive samples are skipped; NaN when fewer than two remain.
pub fn growth_rate(amplitudes: &[f64], interval: usize, t0: f64) -> f64 {
    let (x, y): (Vec<f64>, Vec<f64>) = amplitudes
        .iter()
        .enumerate()
        .filter(|(_, &a)| a > 0.0 && a.is_finite())
        .map(|(n, &a)| ((n * interval) as f64, a.ln()))
        .unzip();
    fit_line(&x, &y).1 / t0
}

/// Normalized complex oscillation signal of one bunch rotated to the
/// observation point: (u/√β ∓ i(√β·p + α·u/√β))·e^{iφ}. The longitudinal
/// plane uses the + sign.
pub fn mode_signal(u: f64, p: f64, alpha: f64, beta: f64, phase: f64, longitudinal: bool) -> Complex64 {
    let sb = beta.sqrt();
    let partner = sb * p + alpha / sb * u;
    let sign = if longitudinal { 1.0 } else { -1.0 };
    Complex64::new(u / sb, sign * partner) * Complex64::from_polar(1.0, phase)
}

/// Amplitude and phase atan2(re, im) of each DFT bin
fn spectrum(signals: &[Complex64]) -> (Vec<f64>, Vec<f64>) {
    fft::fft(signals).iter().map(|c| (c.norm(), c.re.atan2(c.im))).unzip()
}

/// Average of u_i·e^{−i2πf·t_i}, uniform or sin²(iπ/N) weighted
pub fn iq_average(values: &[f64], times: &[f64], frequency: f64, windowed: bool) -> Complex64 {
    let n = values.len();
    let mut sum = Complex64::new(0.0, 0.0);
    let mut weights = 0.0;
    for (i, (&u, &t)) in values.iter().zip(times).enumerate() {
        let w = if windowed { (i as f64 * PI / n as f64).sin().powi(2) } else { 1.0 };
        sum += w * u * Complex64::from_polar(1.0, -2.0 * PI * frequency * t);
        weights += w;
    }
    if weights > 0.0 {
        sum / weights
    } else {
        sum
    }
}

/// Per-sample, per-mode histories for the three planes, indexed
/// [plane][sample][mode or bunch]
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoupledBunchHistory {
    pub turns: Vec<usize>,
    pub fft_amp: [Vec<Vec<f64>>; 3],
    pub fft_arg: [Vec<Vec<f64>>; 3],
    pub iq_amp: [Vec<Vec<f64>>; 3],
    pub iq_arg: [Vec<Vec<f64>>; 3],
    pub hilbert_amp: [Vec<Vec<f64>>; 3],
    pub hilbert_arg: [Vec<Vec<f64>>; 3],
    /// Bunch centroids
    pub centroids: [Vec<Vec<f64>>; 3],
    /// |analytic signal| per bunch
    pub envelope: [Vec<Vec<f64>>; 3],
}

impl CoupledBunchHistory {
    fn with_capacity(samples: usize) -> Self {
        let v = || std::array::from_fn(|_| Vec::with_capacity(samples));
        Self {
            turns: Vec::with_capacity(samples),
            fft_amp: v(),
            fft_arg: v(),
            iq_amp: v(),
            iq_arg: v(),
            hilbert_amp: v(),
            hilbert_arg: v(),
            centroids: v(),
            envelope: v(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeGrowth {
    pub mode: usize,
    /// Rates from the DFT amplitudes [x, y, z] (1/s)
    pub fft: [f64; 3],
    pub iq: [f64; 3],
    pub hilbert: [f64; 3],
    /// DFT amplitude at the last sample of the fit window
    pub amplitude: [f64; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct BunchGrowth {
    pub bunch: usize,
    pub harmonic: usize,
    /// Rate of the analytic-signal envelope [x, y, z] (1/s)
    pub rate: [f64; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthRateReport {
    pub window: FitWindow,
    pub samples: usize,
    pub modes: Vec<ModeGrowth>,
    pub bunches: Vec<BunchGrowth>,
}

impl GrowthRateReport {
    /// Dominant mode in `plane`: the one with the largest DFT amplitude at
    /// the end of the fit window.
    ///
    /// A fast mode leaks into every DFT bin through its mirror sideband, so
    /// slower bins fit to nearly the same rate late in the run.
    pub fn fastest(&self, plane: usize) -> Option<&ModeGrowth> {
        self.modes
            .iter()
            .filter(|m| m.amplitude[plane].is_finite())
            .max_by(|a, b| a.amplitude[plane].total_cmp(&b.amplitude[plane]))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriveModeReport {
    pub mode: usize,
    pub drive_frequency: f64,
    pub growth_rate: f64,
    pub mean_phase: f64,
    pub mode_frequency: f64,
    pub turns: Vec<usize>,
    pub amplitude: Vec<f64>,
    pub phase: Vec<f64>,
}

/// Everything the diagnostics hand back at the end of a run
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSummary {
    pub growth: Option<GrowthRateReport>,
    pub drive: Option<DriveModeReport>,
    pub history: Option<CoupledBunchHistory>,
}

#[derive(Debug, Clone)]
struct DriveSignal {
    config: DriveConfig,
    turns: Vec<usize>,
    amplitude: Vec<f64>,
    phase: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    harmonics: Vec<usize>,
    times: Vec<f64>,
    ring: RingParameters,
    tunes: [f64; 3],
    alpha: [f64; 3],
    beta: [f64; 3],
    interval: usize,
    window: FitWindow,
    cbm: Option<CoupledBunchHistory>,
    drive: Option<DriveSignal>,
}

impl Diagnostics {
    pub fn new(config: &Config, ring: &RingParameters) -> Self {
        let harmonics = config.harmonic_numbers();
        let times = harmonics.iter().map(|&h| h as f64 * ring.t_rf).collect();
        let ip = &config.lattice.interaction_points[0];
        let beta_z = if config.ring.energy_spread > 0.0 {
            config.ring.bunch_length / config.ring.energy_spread
        } else {
            1.0
        };
        let samples = config.run.turns / config.run.sample_interval + 1;
        Self {
            harmonics,
            times,
            ring: *ring,
            tunes: config.ring.tunes,
            alpha: [ip.alpha[0], ip.alpha[1], 0.0],
            beta: [ip.beta[0], ip.beta[1], beta_z],
            interval: config.run.sample_interval,
            window: config.run.fit_window(),
            cbm: config.run.coupled_bunch_modes.then(|| CoupledBunchHistory::with_capacity(samples)),
            drive: config.drive.enabled.then(|| DriveSignal {
                config: config.drive.clone(),
                turns: Vec::with_capacity(samples),
                amplitude: Vec::with_capacity(samples),
                phase: Vec::with_capacity(samples),
            }),
        }
    }

    /// Phase rotating bunch `i` to the observation point in `plane`
    fn rotation(&self, plane: usize, i: usize) -> f64 {
        -2.0 * PI * self.tunes[plane] * self.harmonics[i] as f64 / self.ring.harmonic as f64
    }

    /// Record one sampled turn. Statistics must be current.
    pub fn sample(&mut self, turn: usize, bunches: &[Bunch]) {
        let columns = |k: usize| bunches.iter().map(|b| b.stats.mean[k]).collect::<Vec<f64>>();
        let positions = [columns(0), columns(2), columns(4)];
        let momenta = [columns(1), columns(3), columns(5)];

        if let Some(drive) = self.drive.as_mut() {
            let plane = match drive.config.plane {
                0 => 2,
                1 => 0,
                _ => 1,
            };
            let iq = iq_average(
                &positions[plane],
                &self.times,
                drive.config.frequency,
                !drive.config.hardware_window,
            );
            drive.turns.push(turn);
            drive.amplitude.push(iq.norm());
            drive.phase.push(iq.arg());
        }

        let Some(mut history) = self.cbm.take() else {
            return;
        };
        let n = bunches.len();
        history.turns.push(turn);
        for plane in 0..3 {
            let signals: Vec<Complex64> = (0..n)
                .map(|i| {
                    mode_signal(
                        positions[plane][i],
                        momenta[plane][i],
                        self.alpha[plane],
                        self.beta[plane],
                        self.rotation(plane, i),
                        plane == 2,
                    )
                })
                .collect();
            let (amp, arg) = spectrum(&signals);
            history.fft_amp[plane].push(amp);
            history.fft_arg[plane].push(arg);

            let (amp, arg): (Vec<f64>, Vec<f64>) = (0..n)
                .map(|mode| {
                    let f = (mode as f64 + self.tunes[plane]) * self.ring.f0;
                    let iq = iq_average(&positions[plane], &self.times, f, false);
                    (iq.norm(), iq.arg())
                })
                .unzip();
            history.iq_amp[plane].push(amp);
            history.iq_arg[plane].push(arg);
            history.centroids[plane].push(positions[plane].clone());
        }
        self.cbm = Some(history);
    }

    /// Analytic signals of every bunch history, then the mode spectrum of
    /// the normalized analytic signals for every sample
    fn reconstruct(&self, history: &mut CoupledBunchHistory) {
        let samples = history.turns.len();
        let n = self.harmonics.len();
        for plane in 0..3 {
            let mut analytic = vec![vec![Complex64::new(0.0, 0.0); n]; samples];
            for i in 0..n {
                let series: Vec<f64> = history.centroids[plane].iter().map(|row| row[i]).collect();
                for (s, a) in fft::hilbert(&series).into_iter().enumerate() {
                    analytic[s][i] = a;
                }
            }
            let sb = self.beta[plane].sqrt();
            for row in &analytic {
                let signals: Vec<Complex64> = row
                    .iter()
                    .enumerate()
                    .map(|(i, a)| {
                        // position is the real part, the partner is −imag
                        let (u, q) = (a.re, -a.im);
                        let sign = if plane == 2 { 1.0 } else { -1.0 };
                        Complex64::new(u / sb, sign * q / sb)
                            * Complex64::from_polar(1.0, self.rotation(plane, i))
                    })
                    .collect();
                let (amp, arg) = spectrum(&signals);
                history.hilbert_amp[plane].push(amp);
                history.hilbert_arg[plane].push(arg);
                history.envelope[plane].push(row.iter().map(|a| a.norm()).collect());
            }
        }
    }

    /// Sample index range covered by the fit window
    fn window_range(&self, samples: usize) -> std::ops::Range<usize> {
        let start = (self.window.start / self.interval).min(samples);
        let end = (self.window.end / self.interval).min(samples);
        start..end
    }

    fn growth_report(&self, history: &CoupledBunchHistory) -> GrowthRateReport {
        let range = self.window_range(history.turns.len());
        let n = self.harmonics.len();
        let rate = |data: &[Vec<f64>], k: usize| {
            let series: Vec<f64> = data[range.clone()].iter().map(|row| row[k]).collect();
            growth_rate(&series, self.interval, self.ring.t0)
        };
        let modes = (0..n)
            .map(|mode| ModeGrowth {
                mode,
                fft: std::array::from_fn(|p| rate(&history.fft_amp[p], mode)),
                iq: std::array::from_fn(|p| rate(&history.iq_amp[p], mode)),
                hilbert: std::array::from_fn(|p| rate(&history.hilbert_amp[p], mode)),
                amplitude: std::array::from_fn(|p| {
                    range
                        .clone()
                        .last()
                        .map_or(f64::NAN, |s| history.fft_amp[p][s][mode])
                }),
            })
            .collect();
        let bunches = (0..n)
            .map(|i| BunchGrowth {
                bunch: i,
                harmonic: self.harmonics[i],
                rate: std::array::from_fn(|p| rate(&history.envelope[p], i)),
            })
            .collect();
        GrowthRateReport {
            window: self.window,
            samples: range.len(),
            modes,
            bunches,
        }
    }

    fn drive_report(&self, drive: &DriveSignal) -> DriveModeReport {
        let n = self.harmonics.len() as f64;
        let ratio = drive.config.frequency / (self.ring.f0 * n);
        let mode = ((ratio - ratio.floor()) * n).floor() as usize;
        let range = self.window_range(drive.amplitude.len());
        let phases = &drive.phase[range.clone()];
        let mean_phase = if phases.is_empty() {
            0.0
        } else {
            phases.iter().sum::<f64>() / phases.len() as f64
        };
        let spacing = self.ring.t_rf * self.ring.harmonic as f64 / n;
        DriveModeReport {
            mode,
            drive_frequency: drive.config.frequency,
            growth_rate: growth_rate(&drive.amplitude[range], self.interval, self.ring.t0),
            mean_phase,
            mode_frequency: mean_phase / (2.0 * PI * spacing),
            turns: drive.turns.clone(),
            amplitude: drive.amplitude.clone(),
            phase: drive.phase.clone(),
        }
    }

    /// Run the end-of-run analysis
    pub fn finish(mut self) -> DiagnosticsSummary {
        let drive = self.drive.as_ref().map(|d| self.drive_report(d));
        let (growth, history) = match self.cbm.take() {
            Some(mut history) => {
                self.reconstruct(&mut history);
                (Some(self.growth_report(&history)), Some(history))
            }
            None => (None, None),
        };
        DiagnosticsSummary { growth, drive, history }
    }
}
