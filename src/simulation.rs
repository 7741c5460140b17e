//! Turn-by-turn driver
//!
//! `Simulation` owns every piece of mutable state: the beam, the cavity
//! bank, the ion clouds, the wake and feedback histories, the diagnostics
//! and the random generator. Each turn runs:
//!
//! 1. statistics
//! 2. ion interaction per interaction point with the transverse transfer
//!    between points (or the one-turn map when ions are off)
//! 3. bunch spacing, cavity kick and longitudinal drift
//! 4. long-range wake
//! 5. short-range wake
//! 6. FIR feedback
//! 7. radiation damping and excitation
//! 8. drive
//! 9. loss marking
//! 10. statistics and diagnostics

use crate::beam::{Beam, TurnSummary};
use crate::bunch::BunchStats;
use crate::cavity::{update_bunch_spacing, CavityBank, CavityReadout, PotentialWell, WarmUpTrace};
use crate::config::Config;
use crate::config::RingParameters;
use crate::diagnostics::{CoupledBunchHistory, Diagnostics, DriveModeReport, GrowthRateReport};
use crate::error::Result;
use crate::feedback::FirFeedback;
use crate::ion::{IonField, IonSnapshot};
use crate::lattice::{drive_active, drive_kick, longitudinal_drift, synchrotron_radiation, TransverseMap};
use crate::wake::{LongRangeWake, ShortRangeWake};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

/// One cavity mode seen by one bunch, in polar form
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CavitySample {
    pub mode: usize,
    pub cavity_amp: f64,
    pub cavity_phase: f64,
    pub induced_amp: f64,
    pub induced_phase: f64,
    pub generator_amp: f64,
    pub generator_phase: f64,
    /// Energy gain per turn from this mode, Re(cavity + self-loss) (eV)
    pub energy_gain: f64,
}

impl CavitySample {
    fn new(mode: usize, readout: &CavityReadout) -> Self {
        Self {
            mode,
            cavity_amp: readout.cavity.norm(),
            cavity_phase: readout.cavity.arg(),
            induced_amp: readout.induced.norm(),
            induced_phase: readout.induced.arg(),
            generator_amp: readout.generator.norm(),
            generator_phase: readout.generator.arg(),
            energy_gain: (readout.cavity + readout.self_loss).re,
        }
    }
}

/// Moments, cavity voltages and optionally the particles of one bunch
#[derive(Debug, Clone, Serialize)]
pub struct BunchSnapshot {
    pub turn: usize,
    pub bunch: usize,
    pub harmonic: usize,
    pub stats: BunchStats,
    pub cavity: Vec<CavitySample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub particles: Option<Vec<[f64; 6]>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IonSample {
    pub turn: usize,
    pub clouds: Vec<IonSnapshot>,
}

/// Everything a run produces
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub summaries: Vec<TurnSummary>,
    pub snapshots: Vec<BunchSnapshot>,
    pub ions: Vec<IonSample>,
    pub warm_up: WarmUpTrace,
    pub well: Option<PotentialWell>,
    pub growth: Option<GrowthRateReport>,
    pub drive: Option<DriveModeReport>,
    pub history: Option<CoupledBunchHistory>,
    /// Particles lost at the aperture over the run
    pub lost: usize,
}

pub struct Simulation {
    ring: RingParameters,
    rng: StdRng,
    beam: Beam,
    cavity: CavityBank,
    transverse: TransverseMap,
    ions: Option<IonField>,
    long_range: Option<LongRangeWake>,
    short_range: Option<ShortRangeWake>,
    feedback: Option<FirFeedback>,
    diagnostics: Diagnostics,
    report: RunReport,
}

impl Simulation {
    /// Build the beam and every collective-effect solver, then warm up the
    /// cavities with the fill pattern
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(config.run.seed);

        let mut beam = Beam::new(config, &ring);
        beam.populate(config, &ring, &mut rng);
        beam.compute_statistics(config.lattice.interaction_points[0].beta)?;
        for bunch in beam.bunches.iter_mut() {
            bunch.z_mean_last_turn = bunch.stats.mean[4];
        }

        let mut cavity = CavityBank::new(config, &ring);
        let warm_up = cavity.warm_up(&beam.bunches, &ring);

        let long_range = if config.wake.long_range.enabled {
            Some(LongRangeWake::new(&config.wake.long_range, &ring, beam.len())?)
        } else {
            None
        };

        info!(
            bunches = beam.len(),
            macro_particles = config.bunch.macro_particles,
            turns = config.run.turns,
            method = ?config.rf.method,
            "Simulation initialised"
        );

        Ok(Self {
            ring,
            rng,
            transverse: TransverseMap::new(config),
            ions: config.ions.enabled.then(|| IonField::new(config, &ring)),
            long_range,
            short_range: config
                .wake
                .short_range
                .enabled
                .then(|| ShortRangeWake::new(&config.wake.short_range, &ring)),
            feedback: config
                .feedback
                .enabled
                .then(|| FirFeedback::new(&config.feedback, beam.len())),
            diagnostics: Diagnostics::new(config, &ring),
            report: RunReport {
                summaries: Vec::with_capacity(config.run.turns),
                warm_up,
                ..RunReport::default()
            },
            beam,
            cavity,
        })
    }

    pub fn beam(&self) -> &Beam {
        &self.beam
    }

    pub fn cavity(&self) -> &CavityBank {
        &self.cavity
    }

    /// Advance the beam by one turn
    pub fn step(&mut self, config: &Config, turn: usize) -> Result<()> {
        let ips = &config.lattice.interaction_points;
        let ring = self.ring;
        self.beam.compute_statistics(ips[0].beta)?;

        match self.ions.as_mut() {
            Some(ions) => {
                for (k, ip) in ips.iter().enumerate() {
                    self.beam.compute_statistics(ip.beta)?;
                    let max_size = self.beam.max_rms_size();
                    for bunch in self.beam.bunches.iter_mut() {
                        ions.interact(k, bunch, &ring, max_size, &mut self.rng);
                    }
                    for bunch in self.beam.bunches.iter_mut() {
                        self.transverse.transfer_segment(bunch, k);
                    }
                }
            }
            None => {
                for bunch in self.beam.bunches.iter_mut() {
                    self.transverse.transfer_turn(bunch);
                }
            }
        }

        self.beam.compute_statistics(ips[0].beta)?;
        update_bunch_spacing(&mut self.beam.bunches, self.cavity.method(), &ring);
        for bunch in self.beam.bunches.iter_mut() {
            self.cavity.kick(bunch, &ring)?;
            longitudinal_drift(bunch, &ring);
        }
        self.cavity.apply_feedback();

        if let Some(wake) = self.long_range.as_mut() {
            self.beam.compute_statistics(ips[0].beta)?;
            wake.apply(&mut self.beam.bunches, &ring);
        }

        if let Some(wake) = self.short_range.as_ref() {
            for bunch in self.beam.bunches.iter_mut() {
                wake.apply(bunch);
            }
        }

        if let Some(fir) = self.feedback.as_mut() {
            self.beam.compute_statistics(ips[0].beta)?;
            fir.apply(&mut self.beam.bunches, &ring);
        }

        for bunch in self.beam.bunches.iter_mut() {
            synchrotron_radiation(bunch, config, &config.damping, &mut self.rng);
        }

        if drive_active(&config.drive, turn) {
            for bunch in self.beam.bunches.iter_mut() {
                drive_kick(bunch, &config.drive, &ring, turn);
            }
        }

        let lost = self.beam.mark_lost(config.lattice.aperture);
        if lost > 0 {
            warn!(turn, lost, "Particles lost at the aperture");
            self.report.lost += lost;
        }

        self.beam.compute_statistics(ips[0].beta)?;
        self.record(config, turn);
        Ok(())
    }

    fn record(&mut self, config: &Config, turn: usize) {
        let ion_charge = self.ions.as_ref().map_or(0.0, IonField::total_charge);
        let summary = self.beam.summary(turn, ion_charge, &config.run.track_bunches);
        debug!(
            turn,
            max_x = summary.max_centroid[0],
            max_y = summary.max_centroid[2],
            ion_charge,
            "Turn complete"
        );
        if config.run.log_interval > 0 && turn % config.run.log_interval == 0 {
            info!(
                turn,
                max_x = summary.max_centroid[0],
                max_y = summary.max_centroid[2],
                max_z = summary.max_centroid[4],
                survivors = summary.survivors,
                ion_charge,
                "Tracking progress"
            );
        }
        self.report.summaries.push(summary);

        if turn % config.run.sample_interval != 0 {
            return;
        }
        self.diagnostics.sample(turn, &self.beam.bunches);
        for &i in &config.run.track_bunches {
            let Some(bunch) = self.beam.bunches.get(i) else {
                continue;
            };
            let cavity = self.cavity.readouts[i]
                .iter()
                .enumerate()
                .map(|(m, r)| CavitySample::new(m, r))
                .collect();
            let particles = config
                .run
                .particle_snapshots
                .then(|| bunch.survivors().map(|k| bunch.particle(k)).collect());
            self.report.snapshots.push(BunchSnapshot {
                turn,
                bunch: i,
                harmonic: bunch.harmonic,
                stats: bunch.stats,
                cavity,
                particles,
            });
        }
        if let Some(ions) = self.ions.as_ref() {
            self.report.ions.push(IonSample { turn, clouds: ions.snapshot() });
        }
    }

    /// Close the run and assemble the report
    pub fn finish(self) -> RunReport {
        let mut report = self.report;
        let summary = self.diagnostics.finish();
        report.growth = summary.growth;
        report.drive = summary.drive;
        report.history = summary.history;
        report.well = self.cavity.well;
        info!(
            turns = report.summaries.len(),
            lost = report.lost,
            "Run complete"
        );
        report
    }
}

/// Track the configured beam for `config.run.turns` turns
pub fn run(config: &Config) -> Result<RunReport> {
    let mut simulation = Simulation::new(config)?;
    for turn in 0..config.run.turns {
        simulation.step(config, turn)?;
    }
    Ok(simulation.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> Config {
        let mut config = Config::default();
        config.bunch.macro_particles = 200;
        config.run.turns = 20;
        config.run.log_interval = 0;
        config.run.sample_interval = 5;
        config
    }

    #[test]
    fn test_run_records_every_turn() {
        let config = quick_config();
        let report = run(&config).unwrap();
        assert_eq!(report.summaries.len(), 20);
        assert_eq!(report.snapshots.len(), 4);
        assert_eq!(report.snapshots[1].turn, 5);
        assert_eq!(report.warm_up.pages.len(), 1);
        assert!(report.growth.is_some());
        assert!(report.drive.is_none());
    }

    #[test]
    fn test_same_seed_same_run() {
        let config = quick_config();
        let a = run(&config).unwrap();
        let b = run(&config).unwrap();
        let last_a = a.summaries.last().unwrap();
        let last_b = b.summaries.last().unwrap();
        assert_eq!(last_a.mean_centroid, last_b.mean_centroid);
        assert_eq!(last_a.max_emittance, last_b.max_emittance);
    }

    #[test]
    fn test_ions_accumulate_during_run() {
        let mut config = quick_config();
        config.ions.enabled = true;
        config.ions.loss_boundary = 1.0e6;
        config.run.turns = 3;
        let report = run(&config).unwrap();
        let charges: Vec<f64> = report.summaries.iter().map(|s| s.ion_charge).collect();
        assert!(charges[0] > 0.0);
        assert!(charges.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(report.ions.len(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = quick_config();
        config.run.sample_interval = 0;
        assert!(Simulation::new(&config).is_err());
    }

    #[test]
    fn test_particle_snapshots() {
        let mut config = quick_config();
        config.run.turns = 1;
        config.run.particle_snapshots = true;
        let report = run(&config).unwrap();
        let particles = report.snapshots[0].particles.as_ref().unwrap();
        assert_eq!(particles.len(), 200);
    }
}
