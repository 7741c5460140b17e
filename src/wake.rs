//! Wakefields
//!
//! - Short-range: one bunch on a fixed slice grid spanning one RF bucket,
//!   convolved with a precomputed wake table either directly in time or
//!   through the matching impedance spectrum. Optional Gaussian smoothing
//!   of the slice charge spreads each slice over the kernel half-width, so
//!   with smoothing on a slice feels charge up to that many slices behind it.
//! - Long-range: rigid-bunch centroid kicks from the bunches of the last
//!   few turns, read from a fixed-length history.
//!
//! Wake functions take the lag behind the source (s, ≥ 0) and follow the
//! energy-loss sign convention: a positive longitudinal wake decelerates.

use crate::bunch::Bunch;
use crate::config::{
    LongRangeConfig, ResistiveWallSegment, ResonatorWake, RingParameters, ShortRangeConfig,
    ShortRangeMethod, SmoothingConfig, TabulatedWake, WakeChannel,
};
use crate::constants::{C0, ELECTRON_CHARGE, Z0};
use crate::error::{Result, TrackError};
use crate::fft;
use num_complex::Complex64;
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Wake of a broadband resonator at `lag` seconds behind the source.
///
/// The longitudinal wake at zero lag is half its limit from above.
pub fn resonator_wake(resonator: &ResonatorWake, lag: f64) -> f64 {
    if lag < 0.0 {
        return 0.0;
    }
    let omega = 2.0 * PI * resonator.frequency;
    let alpha = omega / (2.0 * resonator.quality);
    let rs = resonator.shunt_impedance;
    let damping = (-alpha * lag).exp();
    let discriminant = omega * omega - alpha * alpha;
    let (c, s, w) = if discriminant > 0.0 {
        let w = discriminant.sqrt();
        ((w * lag).cos(), (w * lag).sin(), w)
    } else {
        // overdamped resonator
        let w = (-discriminant).sqrt().max(f64::MIN_POSITIVE);
        ((w * lag).cosh(), (w * lag).sinh(), w)
    };
    match resonator.channel {
        WakeChannel::Longitudinal => {
            if lag == 0.0 {
                alpha * rs
            } else {
                2.0 * alpha * rs * damping * (c - alpha / w * s)
            }
        }
        _ => rs * omega * omega / (resonator.quality * w) * damping * s,
    }
}

/// Resistive-wall wake of one round chamber segment, [dipole, longitudinal].
/// Diverges at zero lag, so it is only used between bunches.
pub fn resistive_wall_wake(segment: &ResistiveWallSegment, lag: f64) -> [f64; 2] {
    if lag <= 0.0 {
        return [0.0, 0.0];
    }
    let b = segment.radius;
    let root = (Z0 / (PI * segment.conductivity)).sqrt();
    let dipole = -segment.length / (PI * b.powi(3)) * (C0 / lag).sqrt() * root;
    let longitudinal = -C0 * segment.length / (4.0 * PI * b) * root / (C0 * lag).powf(1.5);
    [dipole, longitudinal]
}

/// Linear interpolation in a tabulated wake, zero outside the table
fn tabulated_wake(table: &TabulatedWake, lag: f64) -> f64 {
    if lag < 0.0 || table.values.is_empty() || table.dt <= 0.0 {
        return 0.0;
    }
    let position = lag / table.dt;
    let k = position.floor() as usize;
    if k + 1 >= table.values.len() {
        return if k + 1 == table.values.len() && position == k as f64 { table.values[k] } else { 0.0 };
    }
    let frac = position - k as f64;
    table.values[k] * (1.0 - frac) + table.values[k + 1] * frac
}

/// Normalized Gaussian kernel of odd length
fn gaussian_kernel(smoothing: &SmoothingConfig) -> Vec<f64> {
    let window = smoothing.window.max(1) | 1;
    let center = (window / 2) as f64;
    let sigma = ((window - 1) as f64 / (2.0 * smoothing.alpha)).max(f64::MIN_POSITIVE);
    let mut kernel: Vec<f64> = (0..window)
        .map(|k| (-(k as f64 - center).powi(2) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= total);
    kernel
}

/// Smooth `profile` with edge padding and restore its sum
pub fn smooth_profile(profile: &[f64], kernel: &[f64]) -> Vec<f64> {
    if profile.is_empty() || kernel.len() < 2 {
        return profile.to_vec();
    }
    let half = kernel.len() / 2;
    let first = profile[0];
    let last = profile[profile.len() - 1];
    let mut padded = Vec::with_capacity(profile.len() + 2 * half);
    padded.extend(std::iter::repeat(first).take(half));
    padded.extend_from_slice(profile);
    padded.extend(std::iter::repeat(last).take(half));

    let full = fft::convolve(&padded, kernel);
    let mut smoothed: Vec<f64> = (0..profile.len()).map(|i| full[i + 2 * half]).collect();
    let before: f64 = profile.iter().sum();
    let after: f64 = smoothed.iter().sum();
    if after != 0.0 {
        let scale = before / after;
        smoothed.iter_mut().for_each(|v| *v *= scale);
    }
    smoothed
}

/// Charge and centroids of one bunch on the short-range slice grid
#[derive(Debug, Clone)]
pub struct SliceProfile {
    /// Slice charge (C), slice 0 at the head
    pub charge: Vec<f64>,
    pub x_mean: Vec<f64>,
    pub y_mean: Vec<f64>,
    /// Slice of each particle, None when lost or outside the bucket
    pub slice_of: Vec<Option<usize>>,
}

/// Per-channel wake potentials on the slice grid (V)
#[derive(Debug, Clone)]
pub struct WakePotentials {
    pub channels: [Vec<f64>; 5],
}

/// Precomputed short-range wake tables and their spectra
#[derive(Debug, Clone)]
pub struct ShortRangeWake {
    method: ShortRangeMethod,
    bins: usize,
    /// Slice length (m)
    pub dz: f64,
    /// Slice duration (s)
    pub dt: f64,
    half_length: f64,
    channels: Vec<WakeChannel>,
    tables: [Vec<f64>; 5],
    spectra: [Vec<Complex64>; 5],
    fft_len: usize,
    kernel: Option<Vec<f64>>,
    scale: f64,
}

impl ShortRangeWake {
    pub fn new(config: &ShortRangeConfig, ring: &RingParameters) -> Self {
        let bins = config.bins;
        let bucket = ring.rf_length * ring.beta;
        let dz = bucket / bins as f64;
        let dt = dz / (C0 * ring.beta);
        let fft_len = (2 * bins).next_power_of_two();

        let mut tables: [Vec<f64>; 5] = Default::default();
        let mut spectra: [Vec<Complex64>; 5] = Default::default();
        for &channel in &config.channels {
            let table: Vec<f64> = (0..bins)
                .map(|k| {
                    let lag = k as f64 * dt;
                    let resonant: f64 = config
                        .resonators
                        .iter()
                        .filter(|r| r.channel == channel)
                        .map(|r| resonator_wake(r, lag))
                        .sum();
                    let tabulated: f64 = config
                        .tabulated
                        .iter()
                        .filter(|t| t.channel == channel)
                        .map(|t| tabulated_wake(t, lag))
                        .sum();
                    resonant + tabulated
                })
                .collect();
            if config.method == ShortRangeMethod::Impedance {
                let mut padded = table.clone();
                padded.resize(fft_len, 0.0);
                spectra[channel.index()] = fft::fft_real(&padded);
            }
            tables[channel.index()] = table;
        }

        Self {
            method: config.method,
            bins,
            dz,
            dt,
            half_length: 0.5 * bucket,
            channels: config.channels.clone(),
            tables,
            spectra,
            fft_len,
            kernel: config.smoothing.as_ref().map(gaussian_kernel),
            scale: 1.0 / (ring.energy * ring.beta * ring.beta),
        }
    }

    /// Wake table of `channel`, one sample per slice step from zero lag
    pub fn table(&self, channel: WakeChannel) -> &[f64] {
        &self.tables[channel.index()]
    }

    /// Bin the survivors of `bunch` onto the bucket grid
    pub fn profile(&self, bunch: &Bunch) -> SliceProfile {
        let mut counts = vec![0.0; self.bins];
        let mut x_sum = vec![0.0; self.bins];
        let mut y_sum = vec![0.0; self.bins];
        let mut slice_of = vec![None; bunch.len()];
        for i in bunch.survivors() {
            let position = (self.half_length - bunch.z[i]) / self.dz;
            if !(position >= 0.0 && position < self.bins as f64) {
                continue;
            }
            let k = position as usize;
            counts[k] += 1.0;
            x_sum[k] += bunch.x[i];
            y_sum[k] += bunch.y[i];
            slice_of[i] = Some(k);
        }

        let mean = |sum: &[f64]| -> Vec<f64> {
            sum.iter()
                .zip(&counts)
                .map(|(s, &n)| if n > 0.0 { s / n } else { 0.0 })
                .collect()
        };
        let x_mean = mean(&x_sum);
        let y_mean = mean(&y_sum);

        let counts = match &self.kernel {
            Some(kernel) => smooth_profile(&counts, kernel),
            None => counts,
        };
        let per_particle = bunch.macro_charge * ELECTRON_CHARGE;
        let charge = counts.iter().map(|n| n * per_particle).collect();
        SliceProfile { charge, x_mean, y_mean, slice_of }
    }

    fn sources(&self, profile: &SliceProfile, channel: WakeChannel) -> Vec<f64> {
        match channel {
            WakeChannel::DipoleX => profile.charge.iter().zip(&profile.x_mean).map(|(q, x)| q * x).collect(),
            WakeChannel::DipoleY => profile.charge.iter().zip(&profile.y_mean).map(|(q, y)| q * y).collect(),
            _ => profile.charge.clone(),
        }
    }

    /// Wake potentials with the configured method
    pub fn potentials(&self, profile: &SliceProfile) -> WakePotentials {
        match self.method {
            ShortRangeMethod::TimeDomain => self.potentials_time_domain(profile),
            ShortRangeMethod::Impedance => self.potentials_impedance(profile),
        }
    }

    /// Direct causal sum V_i = −Σ_{j≤i} W((i−j)dt)·s_j
    pub fn potentials_time_domain(&self, profile: &SliceProfile) -> WakePotentials {
        let mut channels: [Vec<f64>; 5] = Default::default();
        let occupied: Vec<usize> = (0..self.bins).filter(|&k| profile.charge[k] != 0.0).collect();
        let (Some(&lo), Some(&hi)) = (occupied.first(), occupied.last()) else {
            for &channel in &self.channels {
                channels[channel.index()] = vec![0.0; self.bins];
            }
            return WakePotentials { channels };
        };

        for &channel in &self.channels {
            let table = &self.tables[channel.index()];
            let source = self.sources(profile, channel);
            let mut potential = vec![0.0; self.bins];
            for i in lo..self.bins {
                let mut v = 0.0;
                for j in lo..=i.min(hi) {
                    if source[j] == 0.0 {
                        continue;
                    }
                    v -= table[i - j] * source[j];
                }
                potential[i] = v;
            }
            channels[channel.index()] = potential;
        }
        WakePotentials { channels }
    }

    /// Zero-padded profile spectrum times the wake spectrum
    pub fn potentials_impedance(&self, profile: &SliceProfile) -> WakePotentials {
        let mut channels: [Vec<f64>; 5] = Default::default();
        for &channel in &self.channels {
            let mut source = self.sources(profile, channel);
            source.resize(self.fft_len, 0.0);
            let spectrum = fft::fft_real(&source);
            let product: Vec<Complex64> = spectrum
                .iter()
                .zip(&self.spectra[channel.index()])
                .map(|(a, b)| a * b)
                .collect();
            let response = fft::ifft(&product);
            channels[channel.index()] = response.iter().take(self.bins).map(|v| -v.re).collect();
        }
        WakePotentials { channels }
    }

    /// Bin, convolve and kick one bunch
    pub fn apply(&self, bunch: &mut Bunch) {
        let profile = self.profile(bunch);
        let potentials = self.potentials(&profile);
        let get = |channel: WakeChannel, k: usize| -> f64 {
            potentials.channels[channel.index()].get(k).copied().unwrap_or(0.0)
        };
        for i in 0..bunch.len() {
            let Some(k) = profile.slice_of[i] else {
                continue;
            };
            let x = bunch.x[i];
            let y = bunch.y[i];
            bunch.pz[i] += get(WakeChannel::Longitudinal, k) * self.scale;
            bunch.px[i] += (get(WakeChannel::DipoleX, k) + get(WakeChannel::QuadrupoleX, k) * x) * self.scale;
            bunch.py[i] += (get(WakeChannel::DipoleY, k) + get(WakeChannel::QuadrupoleY, k) * y) * self.scale;
        }
    }
}

/// Centroid and charge of one bunch at one turn
#[derive(Debug, Clone, Copy, Default)]
struct CentroidRecord {
    x: f64,
    y: f64,
    z: f64,
    electrons: f64,
}

/// Multi-turn bunch-to-bunch wake
#[derive(Debug, Clone)]
pub struct LongRangeWake {
    turns: usize,
    resonators: Vec<ResonatorWake>,
    walls: Vec<ResistiveWallSegment>,
    /// Oldest turn first
    history: VecDeque<Vec<CentroidRecord>>,
    scale: f64,
}

impl LongRangeWake {
    pub fn new(config: &LongRangeConfig, ring: &RingParameters, bunch_count: usize) -> Result<Self> {
        if let Some(r) = config
            .resonators
            .iter()
            .find(|r| matches!(r.channel, WakeChannel::QuadrupoleX | WakeChannel::QuadrupoleY))
        {
            return Err(TrackError::Unsupported(format!(
                "{:?} resonators act on rigid bunches only through dipole and longitudinal channels",
                r.channel
            )));
        }
        let history = (0..config.turns)
            .map(|_| vec![CentroidRecord::default(); bunch_count])
            .collect();
        Ok(Self {
            turns: config.turns,
            resonators: config.resonators.clone(),
            walls: config.resistive_wall.clone(),
            history,
            scale: 1.0 / (ring.energy * ring.beta * ring.beta),
        })
    }

    /// Summed wake [dipole x, dipole y, longitudinal] for a source at time
    /// offset `tau` relative to the witness (negative when the source leads)
    pub fn wake(&self, tau: f64) -> [f64; 3] {
        if tau > 0.0 {
            return [0.0; 3];
        }
        let lag = -tau;
        let mut w = [0.0; 3];
        for r in &self.resonators {
            let value = resonator_wake(r, lag);
            match r.channel {
                WakeChannel::DipoleX => w[0] += value,
                WakeChannel::DipoleY => w[1] += value,
                WakeChannel::Longitudinal => w[2] += value,
                _ => {}
            }
        }
        for segment in &self.walls {
            let [dipole, longitudinal] = resistive_wall_wake(segment, lag);
            w[0] += dipole;
            w[1] += dipole;
            w[2] += longitudinal;
        }
        w
    }

    /// Record this turn's centroids and kick every bunch with the summed
    /// wake of the bunches ahead of it. Statistics must be current.
    /// Returns the applied kicks [px, py, pz] per bunch.
    pub fn apply(&mut self, bunches: &mut [Bunch], ring: &RingParameters) -> Vec<[f64; 3]> {
        let current: Vec<CentroidRecord> = bunches
            .iter()
            .map(|b| CentroidRecord {
                x: b.stats.mean[0],
                y: b.stats.mean[2],
                z: b.stats.mean[4],
                electrons: b.stats.survivors as f64 * b.macro_charge,
            })
            .collect();
        self.history.pop_front();
        self.history.push_back(current);

        let n_bunches = bunches.len();
        let speed = C0 * ring.beta;
        let mut kicks = vec![[0.0; 3]; n_bunches];
        for j in 0..n_bunches {
            let witness = &bunches[j];
            let mut force = [0.0; 3];
            for n in 0..self.turns {
                let range = if n == 0 {
                    0..j
                } else if n == self.turns - 1 {
                    j..n_bunches
                } else {
                    0..n_bunches
                };
                let turn = &self.history[self.turns - 1 - n];
                for i in range {
                    let source = turn[i];
                    let buckets = bunches[i].harmonic as f64 - witness.harmonic as f64 - (n * ring.harmonic) as f64;
                    let tau = buckets * ring.t_rf + (witness.stats.mean[4] - source.z) / speed;
                    let w = self.wake(tau);
                    let charge = source.electrons * ELECTRON_CHARGE;
                    force[0] -= w[0] * charge * source.x;
                    force[1] -= w[1] * charge * source.y;
                    force[2] -= w[2] * charge;
                }
            }
            kicks[j] = force.map(|f| f * self.scale);
        }

        for (bunch, kick) in bunches.iter_mut().zip(&kicks) {
            bunch.kick(kick[0], kick[1], kick[2]);
        }
        kicks
    }
}
