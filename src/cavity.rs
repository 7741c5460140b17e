//! RF cavity beam loading
//!
//! Each resonant mode carries a beam-induced phasor `induced` that is kicked
//! by every passing charge (vb0 = −2π·f_res·Rs/Q0·q) and decays and rotates
//! between crossings. The real part of a phasor is the energy gain.
//!
//! References:
//! - P. B. Wilson, "Fundamental-mode rf design in e+e− storage ring factories", SLAC-PUB-6062
//! - F. Pedersen, "Beam loading effects in the CERN PS Booster", IEEE Trans. Nucl. Sci. 22 (1975)

use crate::bunch::Bunch;
use crate::config::{CavityConfig, Config, LongitudinalMethod, RingParameters};
use crate::constants::{C0, ELECTRON_CHARGE};
use crate::error::{Result, TrackError};
use num_complex::Complex64;
use serde::Serialize;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Filling times replayed by the warm-up
const WARM_UP_FILL_TIMES: f64 = 100.0;

/// One cavity resonant mode
#[derive(Debug, Clone)]
pub struct CavityMode {
    /// Resonant harmonic of the RF frequency
    pub harmonic: f64,
    /// Resonant frequency (Hz)
    pub frequency: f64,
    /// Generator drive frequency harmonic × f_rf (Hz)
    pub drive_frequency: f64,
    pub shunt_impedance: f64,
    pub q0: f64,
    pub loaded_q: f64,
    /// Filling time 2QL/ω_res (s)
    pub fill_time: f64,
    /// Detune angle ψ (rad)
    pub detune_angle: f64,
    pub required: Complex64,
    /// Beam-induced voltage phasor
    pub induced: Complex64,
    /// Generator voltage phasor at z = 0
    pub generator: Complex64,
    pub active: bool,
    pub cold_start: bool,
    pub feedback: bool,
}

impl CavityMode {
    pub fn new(config: &CavityConfig, ring: &RingParameters) -> Self {
        let drive_frequency = config.harmonic * ring.f_rf;
        let frequency = drive_frequency + config.detune;
        let loaded_q = config.q0 / (1.0 + config.coupling);
        let tan_psi = 2.0 * loaded_q * (frequency - drive_frequency) / frequency;
        Self {
            harmonic: config.harmonic,
            frequency,
            drive_frequency,
            shunt_impedance: config.shunt_impedance,
            q0: config.q0,
            loaded_q,
            fill_time: 2.0 * loaded_q / (2.0 * PI * frequency),
            detune_angle: tan_psi.atan(),
            required: Complex64::from_polar(config.voltage, config.phase),
            induced: Complex64::new(0.0, 0.0),
            generator: Complex64::new(0.0, 0.0),
            active: config.active,
            cold_start: config.cold_start,
            feedback: config.feedback,
        }
    }

    /// Voltage left behind by `electrons` crossing the cavity
    pub fn vb0(&self, electrons: f64) -> Complex64 {
        Complex64::new(
            -2.0 * PI * self.frequency * self.shunt_impedance / self.q0 * electrons * ELECTRON_CHARGE,
            0.0,
        )
    }

    /// Decay by exp(−dt/τF) and rotate by `phase`
    pub fn decay_rotate(&mut self, dt: f64, phase: f64) {
        self.induced *= Complex64::from_polar((-dt / self.fill_time).exp(), phase);
    }

    /// Lab-frame phase advance over `dt`
    pub fn lab_phase(&self, dt: f64) -> f64 {
        2.0 * PI * self.frequency * dt
    }

    /// Phase advance over `dt` relative to the drive, Δ·tan ψ
    pub fn detune_phase(&self, dt: f64) -> f64 {
        dt / self.fill_time * self.detune_angle.tan()
    }

    /// Generator voltage seen at longitudinal position `z`
    pub fn generator_at(&self, z: f64) -> Complex64 {
        self.generator * Complex64::from_polar(1.0, -2.0 * PI * self.drive_frequency * z / C0)
    }
}

/// Bunch-averaged voltages of one mode, refreshed at each crossing
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CavityReadout {
    /// Total cavity voltage at the bunch
    pub cavity: Complex64,
    /// Beam-induced voltage including the bunch's own charge
    pub induced: Complex64,
    pub generator: Complex64,
    /// Self-loss vb0/2
    pub self_loss: Complex64,
}

/// One row of the warm-up trace, recorded at each bunch passage
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WarmUpRow {
    /// Elapsed time in turns
    pub turn: f64,
    pub cavity_amp: f64,
    pub cavity_phase: f64,
    pub induced_amp: f64,
    pub induced_phase: f64,
    pub generator_amp: f64,
    pub generator_phase: f64,
}

/// Warm-up result and replay of one mode
#[derive(Debug, Clone, Serialize)]
pub struct WarmUpPage {
    pub required_amp: f64,
    pub required_phase: f64,
    pub frequency: f64,
    pub generator_amp: f64,
    pub generator_phase: f64,
    pub induced_amp: f64,
    pub induced_phase: f64,
    pub detune_angle: f64,
    pub turns: usize,
    pub rows: Vec<WarmUpRow>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmUpTrace {
    pub pages: Vec<WarmUpPage>,
}

/// Static potential well and equilibrium profile from the analytic method
#[derive(Debug, Clone, Default, Serialize)]
pub struct PotentialWell {
    /// Slice centres, ascending z
    pub z: Vec<f64>,
    /// Net RF force per slice (relative energy per turn)
    pub force: Vec<f64>,
    /// Normalized potential, zero at the minimum
    pub potential: Vec<f64>,
    /// Equilibrium density, unit sum
    pub analytic: Vec<f64>,
    /// Tracked density, unit sum
    pub tracked: Vec<f64>,
    pub analytic_centroid: f64,
    pub analytic_length: f64,
}

/// All cavity modes plus per-bunch readouts
#[derive(Debug, Clone)]
pub struct CavityBank {
    pub modes: Vec<CavityMode>,
    method: LongitudinalMethod,
    bins: usize,
    energy_loss: f64,
    /// Natural energy spread, for the equilibrium profile
    energy_spread: f64,
    /// Indexed [bunch][mode]
    pub readouts: Vec<Vec<CavityReadout>>,
    pub well: Option<PotentialWell>,
}

impl CavityBank {
    pub fn new(config: &Config, ring: &RingParameters) -> Self {
        let modes: Vec<CavityMode> = config.rf.cavities.iter().map(|c| CavityMode::new(c, ring)).collect();
        let readouts = vec![vec![CavityReadout::default(); modes.len()]; config.bunch_count()];
        Self {
            modes,
            method: config.rf.method,
            bins: config.rf.bins,
            energy_loss: config.ring.energy_loss,
            energy_spread: config.ring.energy_spread,
            readouts,
            well: None,
        }
    }

    pub fn method(&self) -> LongitudinalMethod {
        self.method
    }

    /// Build the steady-state induced voltage by replaying the fill pattern
    /// bucket by bucket, then set the generator to close the gap to the
    /// required voltage.
    pub fn warm_up(&mut self, bunches: &[Bunch], ring: &RingParameters) -> WarmUpTrace {
        let mut trace = WarmUpTrace::default();
        let buckets = ring.harmonic;
        let nb = bunches.len().max(1) as f64;

        for (m, mode) in self.modes.iter_mut().enumerate() {
            let turns = (WARM_UP_FILL_TIMES * mode.fill_time * ring.f0).ceil() as usize;
            let step = Complex64::from_polar(
                (-ring.t_rf / mode.fill_time).exp(),
                mode.detune_phase(ring.t_rf),
            );

            let mut induced = Complex64::new(0.0, 0.0);
            let mut steady = Complex64::new(0.0, 0.0);
            let mut self_loss = Complex64::new(0.0, 0.0);
            for n in 0..turns {
                let last = n + 1 == turns;
                let mut k = 0;
                for bucket in 0..buckets {
                    if k < bunches.len() && bunches[k].harmonic == bucket {
                        let vb0 = mode.vb0(bunches[k].electrons);
                        induced += vb0;
                        if last {
                            self_loss += vb0 / 2.0;
                        }
                        k += 1;
                    }
                    induced *= step;
                    if last {
                        steady += induced;
                    }
                }
            }
            let steady = steady / buckets as f64;

            mode.generator = mode.required - steady;
            mode.induced = if mode.cold_start { Complex64::new(0.0, 0.0) } else { steady };
            if !mode.active {
                mode.generator = Complex64::new(0.0, 0.0);
            }

            let self_loss = self_loss / nb;
            for readout in self.readouts.iter_mut() {
                readout[m] = CavityReadout {
                    cavity: mode.required,
                    induced: mode.induced,
                    generator: mode.generator,
                    self_loss,
                };
            }

            info!(
                mode = m,
                turns,
                generator_amp = mode.generator.norm(),
                generator_phase = mode.generator.arg(),
                induced_amp = steady.norm(),
                induced_phase = steady.arg(),
                detune_angle = mode.detune_angle,
                "Cavity warm-up complete"
            );
            trace.pages.push(replay(mode, bunches, ring, turns));
        }
        trace
    }

    /// Longitudinal RF kick for one bunch with the configured method.
    /// Bunches must be passed in fill order.
    pub fn kick(&mut self, bunch: &mut Bunch, ring: &RingParameters) -> Result<()> {
        if bunch.survivors().next().is_none() {
            return Err(TrackError::NoSurvivors { bunch: bunch.index });
        }
        match self.method {
            LongitudinalMethod::Rigid => self.kick_rigid(bunch, ring),
            LongitudinalMethod::BinByBin => self.kick_bin_by_bin(bunch, ring),
            LongitudinalMethod::AnalyticNoInstability => self.kick_analytic(bunch, ring),
        }
        Ok(())
    }

    fn kick_rigid(&mut self, bunch: &mut Bunch, ring: &RingParameters) {
        let bins = bunch.bin_longitudinal(self.bins);
        let scale = 1.0 / (ring.energy * ring.beta * ring.beta);
        let electrons = bunch.survivors().count() as f64 * bunch.macro_charge;

        for (m, mode) in self.modes.iter_mut().enumerate() {
            let vb0 = mode.vb0(electrons);
            let mut acc = Accumulator::default();
            for (k, slice) in bins.indices.iter().enumerate() {
                if slice.is_empty() {
                    continue;
                }
                let generator = mode.generator_at(bins.center(k));
                let cavity = mode.induced + generator;
                let mut dpz = (cavity.re + vb0.re / 2.0) * scale;
                if m == 0 {
                    dpz -= self.energy_loss * scale;
                }
                for &i in slice {
                    bunch.pz[i] += dpz;
                }
                acc.add(slice.len(), cavity, mode.induced + vb0, generator, vb0 / 2.0);
            }
            self.readouts[bunch.index][m] = acc.readout();

            let dt = bunch.time_to_next;
            mode.induced += vb0;
            mode.decay_rotate(dt, mode.lab_phase(dt));
        }
    }

    fn kick_bin_by_bin(&mut self, bunch: &mut Bunch, ring: &RingParameters) {
        let bins = bunch.bin_longitudinal(self.bins);
        let scale = 1.0 / (ring.energy * ring.beta * ring.beta);
        let dt_bin = bins.dz / (C0 * ring.beta);

        for (m, mode) in self.modes.iter_mut().enumerate() {
            let mut acc = Accumulator::default();
            for (k, slice) in bins.indices.iter().enumerate() {
                let generator = mode.generator_at(bins.center(k));
                let cavity = mode.induced + generator;
                let vb0 = mode.vb0(slice.len() as f64 * bunch.macro_charge);
                let mut dpz = (cavity.re + vb0.re / 2.0) * scale;
                if m == 0 {
                    dpz -= self.energy_loss * scale;
                }
                for &i in slice {
                    bunch.pz[i] += dpz;
                }
                acc.add(slice.len(), cavity, mode.induced + vb0, generator, vb0 / 2.0);

                mode.induced += vb0;
                mode.decay_rotate(dt_bin, mode.lab_phase(dt_bin));
            }
            self.readouts[bunch.index][m] = acc.readout();

            let dt = bunch.time_to_next;
            mode.decay_rotate(dt, mode.lab_phase(dt));
        }
    }

    fn kick_analytic(&mut self, bunch: &mut Bunch, ring: &RingParameters) {
        let bins = bunch.bin_longitudinal(self.bins);
        let nbins = bins.len();
        let scale = 1.0 / (ring.energy * ring.beta * ring.beta);
        let dt_bin = bins.dz / (C0 * ring.beta);
        let mut force = vec![0.0; nbins];

        for (m, mode) in self.modes.iter_mut().enumerate() {
            let omega = 2.0 * PI * mode.drive_frequency / (ring.beta * C0);
            let mut acc = Accumulator::default();
            for (k, slice) in bins.indices.iter().enumerate() {
                let cavity = mode.induced + mode.generator;
                let (amp, arg) = (cavity.norm(), cavity.arg());
                let vb0 = mode.vb0(slice.len() as f64 * bunch.macro_charge);

                force[k] += amp / ring.energy * ((-omega * bins.center(k) + arg).cos() - mode.required.arg().cos());
                if slice.is_empty() {
                    continue;
                }
                force[k] += vb0.re / 2.0 / ring.energy;

                for &i in slice {
                    let mut dpz = amp * (-omega * bunch.z[i] + arg).cos() + vb0.re / 2.0;
                    if m == 0 {
                        dpz -= self.energy_loss;
                    }
                    bunch.pz[i] += dpz * scale;
                }
                acc.add(slice.len(), cavity, mode.induced, mode.generator, vb0 / 2.0);

                mode.induced += vb0;
                mode.decay_rotate(dt_bin, mode.detune_phase(dt_bin));
            }
            self.readouts[bunch.index][m] = acc.readout();

            let dt = bunch.time_to_next;
            mode.decay_rotate(dt, mode.detune_phase(dt));
        }

        let counts: Vec<usize> = bins.indices.iter().map(Vec::len).collect();
        self.well = Some(potential_well(&bins.centers(), &force, &counts, bins.dz, self.energy_spread, ring));
    }

    /// Re-adjust active generators with voltage feedback so the bunch-averaged
    /// induced voltage plus generator meets the required voltage
    pub fn apply_feedback(&mut self) {
        if self.readouts.is_empty() {
            return;
        }
        let nb = self.readouts.len() as f64;
        for (m, mode) in self.modes.iter_mut().enumerate() {
            if !(mode.active && mode.feedback) {
                continue;
            }
            let mean: Complex64 = self.readouts.iter().map(|r| r[m].induced).sum::<Complex64>() / nb;
            mode.generator = mode.required - mean;
            debug!(mode = m, generator_amp = mode.generator.norm(), "Cavity feedback");
        }
    }
}

/// Set the time from each bunch to the next one in fill order, as seen by
/// the cavities. Statistics must be current.
pub fn update_bunch_spacing(bunches: &mut [Bunch], method: LongitudinalMethod, ring: &RingParameters) {
    let n = bunches.len();
    let speed = C0 * ring.beta;
    match method {
        LongitudinalMethod::Rigid if n == 1 => {
            let bunch = &mut bunches[0];
            let z = bunch.stats.mean[4];
            bunch.time_to_next = bunch.gap as f64 * ring.t_rf + (bunch.z_mean_last_turn - z) / speed;
            bunch.z_mean_last_turn = z;
        }
        LongitudinalMethod::BinByBin => {
            for bunch in bunches.iter_mut() {
                bunch.z_extent = bunch.z_range();
            }
            for i in 0..n {
                let next_head = bunches[(i + 1) % n].z_extent.1;
                let bunch = &mut bunches[i];
                bunch.time_to_next = bunch.gap as f64 * ring.t_rf + (bunch.z_extent.0 - next_head) / speed;
            }
        }
        _ => {
            for i in 0..n {
                let next = bunches[(i + 1) % n].stats.mean[4];
                let bunch = &mut bunches[i];
                bunch.time_to_next = bunch.gap as f64 * ring.t_rf + (bunch.stats.mean[4] - next) / speed;
            }
        }
    }
}

/// Charge-weighted averages over the slices of one bunch
#[derive(Default)]
struct Accumulator {
    count: usize,
    cavity: Complex64,
    induced: Complex64,
    generator: Complex64,
    self_loss: Complex64,
}

impl Accumulator {
    fn add(&mut self, n: usize, cavity: Complex64, induced: Complex64, generator: Complex64, self_loss: Complex64) {
        let w = n as f64;
        self.count += n;
        self.cavity += cavity * w;
        self.induced += induced * w;
        self.generator += generator * w;
        self.self_loss += self_loss * w;
    }

    fn readout(&self) -> CavityReadout {
        let n = self.count.max(1) as f64;
        CavityReadout {
            cavity: self.cavity / n,
            induced: self.induced / n,
            generator: self.generator / n,
            self_loss: self.self_loss / n,
        }
    }
}

/// Replay the fill bunch by bunch from an empty cavity, recording the
/// voltages at each passage
fn replay(mode: &CavityMode, bunches: &[Bunch], ring: &RingParameters, turns: usize) -> WarmUpPage {
    let mut rows = Vec::with_capacity(turns * bunches.len());
    let mut induced = Complex64::new(0.0, 0.0);
    let mut time = 0.0;
    for _ in 0..turns {
        for bunch in bunches {
            induced += mode.vb0(bunch.electrons);
            let dt = bunch.gap as f64 * ring.t_rf;
            time += dt;
            let cavity = induced + mode.generator;
            rows.push(WarmUpRow {
                turn: time * ring.f0,
                cavity_amp: cavity.norm(),
                cavity_phase: cavity.arg(),
                induced_amp: induced.norm(),
                induced_phase: induced.arg(),
                generator_amp: mode.generator.norm(),
                generator_phase: mode.generator.arg(),
            });
            induced *= Complex64::from_polar((-dt / mode.fill_time).exp(), mode.detune_phase(dt));
        }
    }
    WarmUpPage {
        required_amp: mode.required.norm(),
        required_phase: mode.required.arg(),
        frequency: mode.frequency,
        generator_amp: mode.generator.norm(),
        generator_phase: mode.generator.arg(),
        induced_amp: mode.induced.norm(),
        induced_phase: mode.induced.arg(),
        detune_angle: mode.detune_angle,
        turns,
        rows,
    }
}

/// Integrate the head-first slice forces from tail to head and derive the
/// equilibrium density exp(−Φ/(η·C·σδ²))
fn potential_well(
    centers: &[f64],
    force: &[f64],
    counts: &[usize],
    dz: f64,
    energy_spread: f64,
    ring: &RingParameters,
) -> PotentialWell {
    let z: Vec<f64> = centers.iter().rev().copied().collect();
    let force: Vec<f64> = force.iter().rev().copied().collect();
    let counts: Vec<usize> = counts.iter().rev().copied().collect();
    let n = z.len();

    let mut potential = vec![0.0; n];
    for k in 1..n {
        potential[k] = potential[k - 1] + 0.5 * (force[k - 1] + force[k]) * dz;
    }
    let min = potential.iter().copied().fold(f64::INFINITY, f64::min);
    let circumference = ring.t0 * ring.beta * C0;
    let norm = ring.eta * circumference * energy_spread * energy_spread;
    for p in potential.iter_mut() {
        *p = (*p - min) / norm;
    }

    let mut analytic: Vec<f64> = potential.iter().map(|p| (-p).exp()).collect();
    let total: f64 = analytic.iter().sum();
    if total > 0.0 {
        analytic.iter_mut().for_each(|v| *v /= total);
    }
    let tracked_total = counts.iter().sum::<usize>().max(1) as f64;
    let tracked = counts.iter().map(|&c| c as f64 / tracked_total).collect();

    let centroid: f64 = analytic.iter().zip(&z).map(|(w, z)| w * z).sum();
    let length = analytic
        .iter()
        .zip(&z)
        .map(|(w, z)| w * (z - centroid).powi(2))
        .sum::<f64>()
        .sqrt();

    PotentialWell {
        z,
        force,
        potential,
        analytic,
        tracked,
        analytic_centroid: centroid,
        analytic_length: length,
    }
}
