//! Run configuration
//!
//! A single JSON document describes the ring, the fill pattern, the
//! collective-effect sources and the run control. Every section has
//! serde defaults so partial files load. `Config::validate` rejects
//! inconsistent combinations before tracking starts, and
//! `RingParameters` holds the quantities derived once from the ring section.

use crate::constants::{C0, ELECTRON_MASS_EV};
use crate::error::{Result, TrackError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete simulation configuration. Immutable once loaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ring: RingConfig,
    pub fill: FillConfig,
    pub bunch: BunchConfig,
    pub lattice: LatticeConfig,
    pub ions: IonConfig,
    pub rf: RfConfig,
    pub wake: WakeConfig,
    pub feedback: FeedbackConfig,
    pub drive: DriveConfig,
    pub damping: DampingConfig,
    pub run: RunConfig,
}

impl Config {
    /// Parse and validate a JSON configuration string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Number of filled buckets
    pub fn bunch_count(&self) -> usize {
        self.fill.trains.iter().map(|t| t.bunches).sum()
    }

    /// Bucket indices of all bunches, in fill order
    pub fn harmonic_numbers(&self) -> Vec<usize> {
        let mut harmonics = Vec::with_capacity(self.bunch_count());
        for train in &self.fill.trains {
            for j in 0..train.bunches {
                harmonics.push(train.start + j * (train.gap + 1));
            }
        }
        harmonics
    }

    pub fn ring_parameters(&self) -> RingParameters {
        RingParameters::new(&self.ring)
    }

    /// Check cross-section consistency. Called by the loaders.
    pub fn validate(&self) -> Result<()> {
        let ring = &self.ring;
        if ring.energy <= ELECTRON_MASS_EV {
            return Err(TrackError::config("beam energy must exceed the electron rest energy"));
        }
        if ring.harmonic == 0 || ring.circumference <= 0.0 {
            return Err(TrackError::config("harmonic number and circumference must be positive"));
        }
        if ring.damping_turns.iter().any(|&t| t <= 2.0) {
            return Err(TrackError::config("damping times must be longer than two turns"));
        }
        if self.bunch.macro_particles == 0 {
            return Err(TrackError::config("bunches need at least one macro-particle"));
        }
        if !(self.bunch.cut_sigma.is_finite() && self.bunch.cut_sigma > 0.0) {
            return Err(TrackError::config("bunch.cut_sigma must be positive and finite"));
        }
        if !(self.ions.cut_sigma.is_finite() && self.ions.cut_sigma > 0.0) {
            return Err(TrackError::config("ions.cut_sigma must be positive and finite"));
        }

        let harmonics = self.harmonic_numbers();
        if harmonics.is_empty() {
            return Err(TrackError::config("fill pattern contains no bunches"));
        }
        if harmonics.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TrackError::config(
                "fill pattern buckets must be strictly increasing across trains",
            ));
        }
        if harmonics.iter().any(|&h| h >= ring.harmonic) {
            return Err(TrackError::config(format!(
                "fill pattern exceeds the harmonic number {}",
                ring.harmonic
            )));
        }
        if !self.fill.charge_weights.is_empty() && self.fill.charge_weights.len() != harmonics.len() {
            return Err(TrackError::config(format!(
                "{} charge weights given for {} bunches",
                self.fill.charge_weights.len(),
                harmonics.len()
            )));
        }
        if self.fill.charge_weights.iter().any(|&w| w < 0.0)
            || (!self.fill.charge_weights.is_empty() && self.fill.charge_weights.iter().sum::<f64>() <= 0.0)
        {
            return Err(TrackError::config("charge weights must be non-negative with a positive sum"));
        }

        if self.lattice.interaction_points.is_empty() {
            return Err(TrackError::config("at least one interaction point is required"));
        }

        for (i, cavity) in self.rf.cavities.iter().enumerate() {
            if !cavity.active && cavity.feedback {
                return Err(TrackError::config(format!(
                    "cavity {} is passive and cannot run with voltage feedback",
                    i
                )));
            }
            if cavity.q0 <= 0.0 || cavity.harmonic <= 0.0 {
                return Err(TrackError::config(format!(
                    "cavity {} needs a positive Q0 and harmonic",
                    i
                )));
            }
        }
        if self.rf.bins == 0 {
            return Err(TrackError::config("rf.bins must be positive"));
        }
        if self.rf.method == LongitudinalMethod::AnalyticNoInstability && harmonics.len() > 1 {
            return Err(TrackError::config(
                "the analytic no-instability method is single-bunch only",
            ));
        }

        if self.ions.enabled {
            if self.ions.species.is_empty() {
                return Err(TrackError::config("ion effects enabled without gas species"));
            }
            if self.ions.macro_ions_per_bunch == 0 {
                return Err(TrackError::config("ions.macro_ions_per_bunch must be positive"));
            }
        }

        let lr = &self.wake.long_range;
        if lr.enabled && lr.turns == 0 {
            return Err(TrackError::config("long-range wake needs at least one turn of history"));
        }
        let sr = &self.wake.short_range;
        if sr.enabled && sr.bins < 2 {
            return Err(TrackError::config("short-range wake needs at least two bins"));
        }

        if self.feedback.enabled && self.feedback.coefficients.is_empty() {
            return Err(TrackError::config("FIR feedback enabled without filter taps"));
        }

        if self.drive.enabled && !self.drive.hardware_window && harmonics.len() < 2 {
            return Err(TrackError::config(
                "windowed drive-mode IQ detection needs more than one bunch",
            ));
        }
        if self.drive.enabled && !(0..3).contains(&self.drive.plane) {
            return Err(TrackError::config("drive.plane must be 0 (z), 1 (x) or 2 (y)"));
        }

        let run = &self.run;
        if run.sample_interval == 0 {
            return Err(TrackError::config("run.sample_interval must be positive"));
        }
        if let Some(window) = run.growth_fit {
            if window.end <= window.start || window.end > run.turns {
                return Err(TrackError::config(format!(
                    "growth fit window [{}, {}) is outside 0..{}",
                    window.start, window.end, run.turns
                )));
            }
            if (window.end - window.start) / run.sample_interval < 2 {
                return Err(TrackError::config("growth fit window holds fewer than two samples"));
            }
        }
        if run.track_bunches.iter().any(|&b| b >= harmonics.len()) {
            return Err(TrackError::config("run.track_bunches refers to a missing bunch"));
        }
        Ok(())
    }
}

/// Ring-level beam and lattice parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Beam energy (eV)
    pub energy: f64,
    /// Circumference (m)
    pub circumference: f64,
    /// RF harmonic number (number of buckets)
    pub harmonic: usize,
    /// Momentum compaction factor
    pub momentum_compaction: f64,
    /// Phase slip factor; computed as αc − 1/γ² when absent
    pub slip_factor: Option<f64>,
    /// Betatron and synchrotron tunes [Qx, Qy, Qs]
    pub tunes: [f64; 3],
    /// Chromaticities [ξx, ξy]
    pub chromaticity: [f64; 2],
    /// Amplitude damping times in turns [τx, τy, τz]
    pub damping_turns: [f64; 3],
    /// Synchrotron radiation loss per turn (eV)
    pub energy_loss: f64,
    /// Natural emittances [εx, εy] (m·rad)
    pub emittance: [f64; 2],
    /// Natural relative energy spread
    pub energy_spread: f64,
    /// Natural bunch length (m)
    pub bunch_length: f64,
    /// Total beam current (A)
    pub current: f64,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            energy: 3.0e9,
            circumference: 480.0,
            harmonic: 800,
            momentum_compaction: 2.0e-4,
            slip_factor: None,
            tunes: [18.2, 8.3, 0.005],
            chromaticity: [0.0, 0.0],
            damping_turns: [7000.0, 7000.0, 3500.0],
            energy_loss: 5.0e5,
            emittance: [1.0e-9, 1.0e-11],
            energy_spread: 1.0e-3,
            bunch_length: 3.0e-3,
            current: 0.2,
        }
    }
}

/// Quantities derived from `RingConfig`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingParameters {
    pub gamma: f64,
    pub beta: f64,
    /// Revolution frequency (Hz)
    pub f0: f64,
    /// Revolution period (s)
    pub t0: f64,
    /// RF period (s)
    pub t_rf: f64,
    /// RF frequency (Hz)
    pub f_rf: f64,
    /// RF wavelength (m)
    pub rf_length: f64,
    pub eta: f64,
    pub harmonic: usize,
    pub energy: f64,
}

impl RingParameters {
    pub fn new(ring: &RingConfig) -> Self {
        let gamma = ring.energy / ELECTRON_MASS_EV;
        let beta = (1.0 - 1.0 / (gamma * gamma)).sqrt();
        let f0 = beta * C0 / ring.circumference;
        let t0 = 1.0 / f0;
        let t_rf = t0 / ring.harmonic as f64;
        let eta = ring
            .slip_factor
            .unwrap_or(ring.momentum_compaction - 1.0 / (gamma * gamma));
        Self {
            gamma,
            beta,
            f0,
            t0,
            t_rf,
            f_rf: 1.0 / t_rf,
            rf_length: t_rf * C0,
            eta,
            harmonic: ring.harmonic,
            energy: ring.energy,
        }
    }
}

/// One bunch train: `bunches` bunches starting at bucket `start`, separated by
/// `gap` empty buckets
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrainConfig {
    pub start: usize,
    pub bunches: usize,
    #[serde(default)]
    pub gap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FillConfig {
    pub trains: Vec<TrainConfig>,
    /// Relative charge per bunch; uniform when empty
    pub charge_weights: Vec<f64>,
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            trains: vec![TrainConfig { start: 0, bunches: 1, gap: 0 }],
            charge_weights: Vec::new(),
        }
    }
}

/// Transverse distribution family for the initial bunch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransverseDistribution {
    Gaussian,
    Parabolic,
    Kappa,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BunchConfig {
    /// Macro-particles per bunch. One selects the weak-strong ion model
    pub macro_particles: usize,
    pub distribution: TransverseDistribution,
    /// Initial offsets [x, px, y, py, z, pz]
    pub offsets: [f64; 6],
    /// RMS of a random per-bunch offset added to `offsets`
    pub offset_jitter: [f64; 6],
    /// Longitudinal truncation (σ)
    pub cut_sigma: f64,
}

impl Default for BunchConfig {
    fn default() -> Self {
        Self {
            macro_particles: 1000,
            distribution: TransverseDistribution::Gaussian,
            offsets: [0.0; 6],
            offset_jitter: [0.0; 6],
            cut_sigma: 3.0,
        }
    }
}

/// Optics and vacuum at one beam-ion interaction point
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionPoint {
    /// Twiss alpha [x, y]
    pub alpha: [f64; 2],
    /// Twiss beta [x, y] (m)
    pub beta: [f64; 2],
    /// Dispersion [ηx, ηx', ηy, ηy']
    pub dispersion: [f64; 4],
    /// Phase advance to the next point, in units of 2π
    pub phase_advance: [f64; 2],
    /// Length of ring represented by this point (m)
    pub interaction_length: f64,
    /// Residual gas pressure (Pa)
    pub pressure: f64,
    /// Gas temperature (K)
    pub temperature: f64,
}

impl Default for InteractionPoint {
    fn default() -> Self {
        Self {
            alpha: [0.0, 0.0],
            beta: [10.0, 10.0],
            dispersion: [0.0; 4],
            phase_advance: [18.2, 8.3],
            interaction_length: 480.0,
            pressure: 1.0e-7,
            temperature: 300.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeConfig {
    pub interaction_points: Vec<InteractionPoint>,
    /// Loss aperture [x, y] (m)
    pub aperture: [f64; 2],
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            interaction_points: vec![InteractionPoint::default()],
            aperture: [0.02, 0.01],
        }
    }
}

/// One residual gas component
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasSpecies {
    /// Ion mass number (e.g. 28 for CO)
    pub mass_number: f64,
    /// Fraction of the total pressure
    pub fraction: f64,
    /// Collisional ionization cross-section (m²)
    pub cross_section: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IonConfig {
    pub enabled: bool,
    pub species: Vec<GasSpecies>,
    /// Macro-ions generated per species per bunch passage
    pub macro_ions_per_bunch: usize,
    /// Transverse truncation of newly generated ions (σ)
    pub cut_sigma: f64,
    /// Ions farther than this many beam sizes are dropped
    pub loss_boundary: f64,
    /// Optional pipe aperture for ions [x, y] (m)
    pub aperture: Option<[f64; 2]>,
}

impl Default for IonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            species: vec![GasSpecies { mass_number: 28.0, fraction: 1.0, cross_section: 2.0e-22 }],
            macro_ions_per_bunch: 10,
            cut_sigma: 3.0,
            loss_boundary: 10.0,
            aperture: None,
        }
    }
}

/// Longitudinal tracking granularity for cavity beam loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongitudinalMethod {
    /// One phasor kick and decay step per bunch
    Rigid,
    /// One phasor kick and decay step per z-slice
    BinByBin,
    /// Static potential well with an analytic equilibrium profile
    AnalyticNoInstability,
}

/// One cavity resonant mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CavityConfig {
    /// Resonant harmonic of the RF frequency (1 = main, 3 = third harmonic)
    pub harmonic: f64,
    /// Shunt impedance Rs (Ohm)
    pub shunt_impedance: f64,
    /// Unloaded quality factor
    pub q0: f64,
    /// Coupling factor β
    pub coupling: f64,
    /// Detuning from harmonic × f_rf (Hz)
    pub detune: f64,
    /// Required total cavity voltage amplitude (V)
    pub voltage: f64,
    /// Required total cavity voltage phase (rad)
    pub phase: f64,
    /// Driven by a generator
    pub active: bool,
    /// Start tracking with an empty beam-induced phasor
    pub cold_start: bool,
    /// Re-adjust the generator each turn to hold the required voltage
    pub feedback: bool,
}

impl Default for CavityConfig {
    fn default() -> Self {
        Self {
            harmonic: 1.0,
            shunt_impedance: 5.0e6,
            q0: 3.0e4,
            coupling: 3.0,
            detune: 0.0,
            voltage: 1.5e6,
            // cos φ = U0/V for the default ring
            phase: 1.230_959_417_340_774_7,
            active: true,
            cold_start: false,
            feedback: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RfConfig {
    pub method: LongitudinalMethod,
    /// Longitudinal bins per bunch
    pub bins: usize,
    pub cavities: Vec<CavityConfig>,
}

impl Default for RfConfig {
    fn default() -> Self {
        Self {
            method: LongitudinalMethod::Rigid,
            bins: 50,
            cavities: vec![CavityConfig::default()],
        }
    }
}

/// Wake/impedance channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeChannel {
    Longitudinal,
    DipoleX,
    DipoleY,
    QuadrupoleX,
    QuadrupoleY,
}

impl WakeChannel {
    pub const ALL: [WakeChannel; 5] = [
        WakeChannel::Longitudinal,
        WakeChannel::DipoleX,
        WakeChannel::DipoleY,
        WakeChannel::QuadrupoleX,
        WakeChannel::QuadrupoleY,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Broadband resonator wake source
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResonatorWake {
    pub channel: WakeChannel,
    /// Shunt impedance (Ohm, or Ohm/m for transverse channels)
    pub shunt_impedance: f64,
    pub quality: f64,
    /// Resonant frequency (Hz)
    pub frequency: f64,
}

/// Round resistive-wall chamber segment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResistiveWallSegment {
    /// Length (m)
    pub length: f64,
    /// Pipe radius (m)
    pub radius: f64,
    /// Wall conductivity (S/m)
    pub conductivity: f64,
}

/// Wake sampled at uniform time steps behind the source, starting at zero lag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabulatedWake {
    pub channel: WakeChannel,
    /// Sample step (s)
    pub dt: f64,
    /// Wake values (V/C, or V/C/m)
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongRangeConfig {
    pub enabled: bool,
    /// Number of trailing turns kept in the wake history
    pub turns: usize,
    pub resonators: Vec<ResonatorWake>,
    pub resistive_wall: Vec<ResistiveWallSegment>,
}

impl Default for LongRangeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            turns: 10,
            resonators: Vec::new(),
            resistive_wall: Vec::new(),
        }
    }
}

/// Short-range wake convolution method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortRangeMethod {
    TimeDomain,
    Impedance,
}

/// Gaussian filter applied to the binned charge profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Kernel length in bins (odd)
    pub window: usize,
    /// Kernel width parameter; σ = (window − 1) / (2·alpha) bins
    pub alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { window: 51, alpha: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortRangeConfig {
    pub enabled: bool,
    pub method: ShortRangeMethod,
    /// Bins across one RF bucket
    pub bins: usize,
    /// Enabled channels
    pub channels: Vec<WakeChannel>,
    pub resonators: Vec<ResonatorWake>,
    pub tabulated: Vec<TabulatedWake>,
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for ShortRangeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            method: ShortRangeMethod::TimeDomain,
            bins: 2000,
            channels: vec![WakeChannel::Longitudinal],
            resonators: Vec::new(),
            tabulated: Vec::new(),
            smoothing: Some(SmoothingConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub long_range: LongRangeConfig,
    pub short_range: ShortRangeConfig,
}

/// Bunch-by-bunch FIR feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub enabled: bool,
    /// Filter taps, oldest turn last
    pub coefficients: Vec<f64>,
    /// Turns between pickup and kicker
    pub delay: usize,
    /// Loop gain [x, y, z]
    pub gain: [f64; 3],
    /// Kicker strength converting the filtered signal into a kick [x, y, z]
    pub kick_strength: [f64; 3],
    /// Kick limit [x (rad), y (rad), z (relative)]
    pub kick_limit: [f64; 3],
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coefficients: Vec::new(),
            delay: 0,
            gain: [0.0; 3],
            kick_strength: [1.0; 3],
            kick_limit: [1.0e-5, 1.0e-5, 1.0e-4],
        }
    }
}

/// External sinusoidal excitation of one coupled-bunch mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub enabled: bool,
    /// 0 = z, 1 = x, 2 = y
    pub plane: usize,
    /// Kick amplitude (rad transverse, V longitudinal)
    pub amplitude: f64,
    /// Drive frequency (Hz)
    pub frequency: f64,
    pub start: usize,
    pub end: usize,
    /// Uniform IQ averaging (otherwise sin² window over bunches)
    pub hardware_window: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            plane: 1,
            amplitude: 0.0,
            frequency: 0.0,
            start: 0,
            end: 0,
            hardware_window: true,
        }
    }
}

/// Synchrotron radiation damping and quantum excitation switches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DampingConfig {
    pub transverse: bool,
    pub longitudinal: bool,
    pub excitation: bool,
}

impl Default for DampingConfig {
    fn default() -> Self {
        Self {
            transverse: true,
            longitudinal: true,
            excitation: true,
        }
    }
}

/// Turn window used for growth-rate fits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitWindow {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub turns: usize,
    pub seed: u64,
    /// Turns between diagnostic samples and bunch snapshots
    pub sample_interval: usize,
    /// Turns between progress log lines
    pub log_interval: usize,
    /// Coupled-bunch mode diagnostics on sampled turns
    pub coupled_bunch_modes: bool,
    /// Fit window; defaults to the second half of the run
    pub growth_fit: Option<FitWindow>,
    /// Bunches whose centroids are recorded every turn
    pub track_bunches: Vec<usize>,
    /// Keep per-particle phase space in bunch snapshots
    pub particle_snapshots: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            turns: 1000,
            seed: 1,
            sample_interval: 1,
            log_interval: 100,
            coupled_bunch_modes: true,
            growth_fit: None,
            track_bunches: vec![0],
            particle_snapshots: false,
        }
    }
}

impl RunConfig {
    /// The configured fit window, or the second half of the run
    pub fn fit_window(&self) -> FitWindow {
        self.growth_fit.unwrap_or(FitWindow {
            start: self.turns / 2,
            end: self.turns,
        })
    }
}
