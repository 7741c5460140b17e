//! ringtrack: multi-bunch collective-effects tracking for electron storage rings
//!
//! This crate provides:
//! - Macro-particle bunches with radiation damping and a linear lattice
//! - Beam-ion interaction with Bassetti-Erskine fields
//! - RF cavity beam loading (rigid bunch, bin-by-bin, static potential well)
//! - Short-range and long-range wakefields
//! - Bunch-by-bunch FIR feedback and drive-mode excitation
//! - Coupled-bunch mode diagnostics and growth-rate fits
//!
//! Units are SI with energies in eV. Longitudinal position z is positive at
//! the bunch head; pz is the relative momentum deviation.

pub mod beam;
pub mod bunch;
pub mod cavity;
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod distribution;
pub mod error;
pub mod feedback;
pub mod fft;
pub mod field;
pub mod ion;
pub mod lattice;
pub mod output;
pub mod simulation;
pub mod wake;

pub use beam::{Beam, TurnSummary};
pub use bunch::{Bunch, BunchStats};
pub use cavity::{CavityBank, CavityMode, PotentialWell, WarmUpTrace};
pub use config::{Config, LongitudinalMethod, RingParameters, ShortRangeMethod, TransverseDistribution};
pub use diagnostics::{DriveModeReport, GrowthRateReport};
pub use error::{Result, TrackError};
pub use ion::{IonField, IonSnapshot};
pub use output::write_report;
pub use simulation::{run, BunchSnapshot, RunReport, Simulation};
