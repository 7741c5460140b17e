//! SDDS-style tables and JSON summary
//!
//! Every table is rendered from a minijinja template with a generation
//! timestamp header. Files written to the output directory:
//! - `turns.sdds`: beam statistics every turn
//! - `bunches.sdds`: sampled moments and cavity voltages of the tracked bunches
//! - `warmup.sdds`: cavity warm-up replay, one page per mode
//! - `growth.sdds`: coupled-bunch mode growth rates
//! - `drive.sdds`: driven-mode IQ history
//! - `ions.sdds`: ion cloud samples
//! - `potential_well.sdds`: analytic equilibrium profile
//! - `summary.json`

use crate::error::Result;
use crate::simulation::RunReport;
use minijinja::{context, Environment};
use serde::Serialize;
use std::path::{Path, PathBuf};

const TURNS_TEMPLATE: &str = r##"SDDS1
! ringtrack beam statistics, generated {{ timestamp }}
&column name=Turns, type=long &end
&column name=IonCharge, type=float &end
{%- for name in ["X", "PX", "Y", "PY", "Z", "PZ"] %}
&column name=Max{{ name }}, type=float &end
&column name=Mean{{ name }}, type=float &end
&column name=Rms{{ name }}, type=float &end
{%- endfor %}
&column name=MaxEmitX, units=m, type=float &end
&column name=MaxEmitY, units=m, type=float &end
&column name=MaxSizeX, units=m, type=float &end
&column name=MaxSizeY, units=m, type=float &end
&column name=Survivors, type=long &end
{%- for b in track %}
&column name=B{{ b }}X, units=m, type=float &end
&column name=B{{ b }}Y, units=m, type=float &end
&column name=B{{ b }}Z, units=m, type=float &end
&column name=B{{ b }}PX, type=float &end
&column name=B{{ b }}PY, type=float &end
&column name=B{{ b }}PZ, type=float &end
&column name=B{{ b }}SigmaZ, units=m, type=float &end
&column name=B{{ b }}SigmaDelta, type=float &end
&column name=B{{ b }}SizeX, units=m, type=float &end
&column name=B{{ b }}SizeY, units=m, type=float &end
&column name=B{{ b }}EmitX, units=m, type=float &end
&column name=B{{ b }}EmitY, units=m, type=float &end
{%- endfor %}
&data mode=ascii &end
! page number 1
{{ rows|length }}
{% for s in rows -%}
{{ s.turn }} {{ s.ion_charge }}{% for k in range(6) %} {{ s.max_centroid[k] }} {{ s.mean_centroid[k] }} {{ s.rms_centroid[k] }}{% endfor %} {{ s.max_emittance[0] }} {{ s.max_emittance[1] }} {{ s.max_size[0] }} {{ s.max_size[1] }} {{ s.survivors }}{% for b in s.tracked %} {{ b.mean[0] }} {{ b.mean[2] }} {{ b.mean[4] }} {{ b.mean[1] }} {{ b.mean[3] }} {{ b.mean[5] }} {{ b.bunch_length }} {{ b.energy_spread }} {{ b.rms_size[0] }} {{ b.rms_size[1] }} {{ b.emittance[0] }} {{ b.emittance[1] }}{% endfor %}
{% endfor %}"##;

const BUNCHES_TEMPLATE: &str = r##"SDDS1
! ringtrack tracked bunch samples, generated {{ timestamp }}
&column name=Turns, type=long &end
&column name=Bunch, type=long &end
&column name=Harmonic, type=long &end
&column name=X, units=m, type=float &end
&column name=Y, units=m, type=float &end
&column name=Z, units=m, type=float &end
&column name=PZ, type=float &end
&column name=EmitX, units=m, type=float &end
&column name=EmitY, units=m, type=float &end
&column name=EffEmitX, units=m, type=float &end
&column name=EffEmitY, units=m, type=float &end
&column name=SigmaZ, units=m, type=float &end
&column name=SigmaDelta, type=float &end
&column name=Survivors, type=long &end
{%- for m in range(modes) %}
&column name=M{{ m }}CavityAmp, units=V, type=float &end
&column name=M{{ m }}CavityPhase, units=rad, type=float &end
&column name=M{{ m }}InducedAmp, units=V, type=float &end
&column name=M{{ m }}InducedPhase, units=rad, type=float &end
&column name=M{{ m }}GeneratorAmp, units=V, type=float &end
&column name=M{{ m }}GeneratorPhase, units=rad, type=float &end
&column name=M{{ m }}EnergyGain, units=eV, type=float &end
{%- endfor %}
&data mode=ascii &end
! page number 1
{{ rows|length }}
{% for s in rows -%}
{{ s.turn }} {{ s.bunch }} {{ s.harmonic }} {{ s.stats.mean[0] }} {{ s.stats.mean[2] }} {{ s.stats.mean[4] }} {{ s.stats.mean[5] }} {{ s.stats.emittance[0] }} {{ s.stats.emittance[1] }} {{ s.stats.effective_emittance[0] }} {{ s.stats.effective_emittance[1] }} {{ s.stats.bunch_length }} {{ s.stats.energy_spread }} {{ s.stats.survivors }}{% for c in s.cavity %} {{ c.cavity_amp }} {{ c.cavity_phase }} {{ c.induced_amp }} {{ c.induced_phase }} {{ c.generator_amp }} {{ c.generator_phase }} {{ c.energy_gain }}{% endfor %}
{% endfor %}"##;

const WARMUP_TEMPLATE: &str = r##"SDDS1
! ringtrack cavity warm-up, generated {{ timestamp }}
&parameter name=RequiredAmp, units=V, type=float &end
&parameter name=RequiredPhase, units=rad, type=float &end
&parameter name=ResonantFrequency, units=Hz, type=float &end
&parameter name=GeneratorAmp, units=V, type=float &end
&parameter name=GeneratorPhase, units=rad, type=float &end
&parameter name=InducedAmp, units=V, type=float &end
&parameter name=InducedPhase, units=rad, type=float &end
&parameter name=DetuneAngle, units=rad, type=float &end
&parameter name=WarmUpTurns, type=long &end
&column name=Turns, type=float &end
&column name=CavityAmp, units=V, type=float &end
&column name=CavityPhase, units=rad, type=float &end
&column name=InducedAmp, units=V, type=float &end
&column name=InducedPhase, units=rad, type=float &end
&column name=GeneratorAmp, units=V, type=float &end
&column name=GeneratorPhase, units=rad, type=float &end
&data mode=ascii &end
{% for p in pages -%}
! page number {{ loop.index }}
{{ p.required_amp }}
{{ p.required_phase }}
{{ p.frequency }}
{{ p.generator_amp }}
{{ p.generator_phase }}
{{ p.induced_amp }}
{{ p.induced_phase }}
{{ p.detune_angle }}
{{ p.turns }}
{{ p.rows|length }}
{% for r in p.rows -%}
{{ r.turn }} {{ r.cavity_amp }} {{ r.cavity_phase }} {{ r.induced_amp }} {{ r.induced_phase }} {{ r.generator_amp }} {{ r.generator_phase }}
{% endfor -%}
{% endfor %}"##;

const GROWTH_TEMPLATE: &str = r##"SDDS1
! ringtrack coupled-bunch growth rates, generated {{ timestamp }}
&parameter name=FitStart, type=long &end
&parameter name=FitEnd, type=long &end
&parameter name=DataPointsForFit, type=long &end
&column name=Mode, type=long &end
{%- for est in ["FFT", "IQ", "Hilbert"] %}{% for plane in ["X", "Y", "Z"] %}
&column name=CBM{{ est }}GR{{ plane }}, units=1/s, type=float &end
{%- endfor %}{% endfor %}
&column name=BunchHarmonic, type=long &end
&column name=BGRX, units=1/s, type=float &end
&column name=BGRY, units=1/s, type=float &end
&column name=BGRZ, units=1/s, type=float &end
&data mode=ascii &end
! page number 1
{{ report.window.start }}
{{ report.window.end }}
{{ report.samples }}
{{ report.modes|length }}
{% for m in report.modes -%}
{% set b = report.bunches[loop.index0] -%}
{{ m.mode }} {{ m.fft[0] }} {{ m.fft[1] }} {{ m.fft[2] }} {{ m.iq[0] }} {{ m.iq[1] }} {{ m.iq[2] }} {{ m.hilbert[0] }} {{ m.hilbert[1] }} {{ m.hilbert[2] }} {{ b.harmonic }} {{ b.rate[0] }} {{ b.rate[1] }} {{ b.rate[2] }}
{% endfor %}"##;

const DRIVE_TEMPLATE: &str = r##"SDDS1
! ringtrack driven mode, generated {{ timestamp }}
&parameter name=ModeIndex, type=long &end
&parameter name=ModeDriveFre, units=Hz, type=float &end
&parameter name=ModeGrowthRate, units=1/s, type=float &end
&parameter name=ModePhase, units=rad, type=float &end
&parameter name=ModeFre, units=1/s, type=float &end
&column name=Turns, type=long &end
&column name=LogAmpIQ, type=float &end
&column name=PhaseIQ, units=rad, type=float &end
&data mode=ascii &end
! page number 1
{{ report.mode }}
{{ report.drive_frequency }}
{{ report.growth_rate }}
{{ report.mean_phase }}
{{ report.mode_frequency }}
{{ rows|length }}
{% for r in rows -%}
{{ r.turn }} {{ r.log_amp }} {{ r.phase }}
{% endfor %}"##;

const IONS_TEMPLATE: &str = r##"SDDS1
! ringtrack ion clouds, generated {{ timestamp }}
&column name=Turns, type=long &end
&column name=Point, type=long &end
&column name=Species, type=long &end
&column name=MassNumber, type=float &end
&column name=MacroIons, type=long &end
&column name=Ions, type=float &end
&column name=CentroidX, units=m, type=float &end
&column name=CentroidY, units=m, type=float &end
&column name=RmsX, units=m, type=float &end
&column name=RmsY, units=m, type=float &end
&data mode=ascii &end
! page number 1
{{ count }}
{% for s in samples -%}
{% for c in s.clouds -%}
{{ s.turn }} {{ c.point }} {{ c.species }} {{ c.mass_number }} {{ c.macro_ions }} {{ c.ions }} {{ c.centroid[0] }} {{ c.centroid[1] }} {{ c.rms[0] }} {{ c.rms[1] }}
{% endfor -%}
{% endfor %}"##;

const WELL_TEMPLATE: &str = r##"SDDS1
! ringtrack potential well, generated {{ timestamp }}
&parameter name=AnalyticCentroid, units=m, type=float &end
&parameter name=AnalyticLength, units=m, type=float &end
&column name=Z, units=m, type=float &end
&column name=Force, type=float &end
&column name=Potential, type=float &end
&column name=AnalyticDensity, type=float &end
&column name=TrackedDensity, type=float &end
&data mode=ascii &end
! page number 1
{{ well.analytic_centroid }}
{{ well.analytic_length }}
{{ well.z|length }}
{% for z in well.z -%}
{{ z }} {{ well.force[loop.index0] }} {{ well.potential[loop.index0] }} {{ well.analytic[loop.index0] }} {{ well.tracked[loop.index0] }}
{% endfor %}"##;

#[derive(Serialize)]
struct DriveRow {
    turn: usize,
    log_amp: f64,
    phase: f64,
}

/// Condensed run result for `summary.json`
#[derive(Serialize)]
struct Summary<'a> {
    generated: String,
    turns: usize,
    lost_particles: usize,
    final_turn: Option<&'a crate::beam::TurnSummary>,
    warm_up: Vec<WarmUpSummary>,
    growth: Option<&'a crate::diagnostics::GrowthRateReport>,
    drive_mode: Option<DriveSummary>,
    potential_well: Option<WellSummary>,
}

#[derive(Serialize)]
struct WarmUpSummary {
    mode: usize,
    generator_amp: f64,
    generator_phase: f64,
    induced_amp: f64,
    induced_phase: f64,
    detune_angle: f64,
    turns: usize,
}

#[derive(Serialize)]
struct DriveSummary {
    mode: usize,
    growth_rate: f64,
    mean_phase: f64,
    mode_frequency: f64,
}

#[derive(Serialize)]
struct WellSummary {
    analytic_centroid: f64,
    analytic_length: f64,
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("turns", TURNS_TEMPLATE)?;
    env.add_template("bunches", BUNCHES_TEMPLATE)?;
    env.add_template("warmup", WARMUP_TEMPLATE)?;
    env.add_template("growth", GROWTH_TEMPLATE)?;
    env.add_template("drive", DRIVE_TEMPLATE)?;
    env.add_template("ions", IONS_TEMPLATE)?;
    env.add_template("well", WELL_TEMPLATE)?;
    Ok(env)
}

fn write(dir: &Path, name: &str, contents: &str, written: &mut Vec<PathBuf>) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    written.push(path);
    Ok(())
}

/// Render every table of `report` into `dir`. Returns the files written.
pub fn write_report(report: &RunReport, track: &[usize], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let env = environment()?;
    let timestamp = chrono::Utc::now().to_rfc3339();
    let mut written = Vec::new();

    let turns = env.get_template("turns")?.render(context! {
        timestamp => &timestamp,
        track => track,
        rows => &report.summaries,
    })?;
    write(dir, "turns.sdds", &turns, &mut written)?;

    let modes = report.snapshots.first().map_or(0, |s| s.cavity.len());
    let bunches = env.get_template("bunches")?.render(context! {
        timestamp => &timestamp,
        modes => modes,
        rows => &report.snapshots,
    })?;
    write(dir, "bunches.sdds", &bunches, &mut written)?;

    let warmup = env.get_template("warmup")?.render(context! {
        timestamp => &timestamp,
        pages => &report.warm_up.pages,
    })?;
    write(dir, "warmup.sdds", &warmup, &mut written)?;

    if let Some(growth) = &report.growth {
        let table = env.get_template("growth")?.render(context! {
            timestamp => &timestamp,
            report => growth,
        })?;
        write(dir, "growth.sdds", &table, &mut written)?;
    }

    if let Some(drive) = &report.drive {
        let rows: Vec<DriveRow> = drive
            .turns
            .iter()
            .zip(drive.amplitude.iter().zip(&drive.phase))
            .map(|(&turn, (&amp, &phase))| DriveRow { turn, log_amp: amp.ln(), phase })
            .collect();
        let table = env.get_template("drive")?.render(context! {
            timestamp => &timestamp,
            report => drive,
            rows => rows,
        })?;
        write(dir, "drive.sdds", &table, &mut written)?;
    }

    if !report.ions.is_empty() {
        let count: usize = report.ions.iter().map(|s| s.clouds.len()).sum();
        let table = env.get_template("ions")?.render(context! {
            timestamp => &timestamp,
            count => count,
            samples => &report.ions,
        })?;
        write(dir, "ions.sdds", &table, &mut written)?;
    }

    if let Some(well) = &report.well {
        let table = env.get_template("well")?.render(context! {
            timestamp => &timestamp,
            well => well,
        })?;
        write(dir, "potential_well.sdds", &table, &mut written)?;
    }

    let summary = Summary {
        generated: timestamp.clone(),
        turns: report.summaries.len(),
        lost_particles: report.lost,
        final_turn: report.summaries.last(),
        warm_up: report
            .warm_up
            .pages
            .iter()
            .enumerate()
            .map(|(mode, p)| WarmUpSummary {
                mode,
                generator_amp: p.generator_amp,
                generator_phase: p.generator_phase,
                induced_amp: p.induced_amp,
                induced_phase: p.induced_phase,
                detune_angle: p.detune_angle,
                turns: p.turns,
            })
            .collect(),
        growth: report.growth.as_ref(),
        drive_mode: report.drive.as_ref().map(|d| DriveSummary {
            mode: d.mode,
            growth_rate: d.growth_rate,
            mean_phase: d.mean_phase,
            mode_frequency: d.mode_frequency,
        }),
        potential_well: report.well.as_ref().map(|w| WellSummary {
            analytic_centroid: w.analytic_centroid,
            analytic_length: w.analytic_length,
        }),
    };
    let json = serde_json::to_string_pretty(&summary)?;
    write(dir, "summary.json", &json, &mut written)?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, LongitudinalMethod};
    use crate::simulation::run;

    fn small_run(method: LongitudinalMethod) -> (Config, RunReport) {
        let mut config = Config::default();
        config.bunch.macro_particles = 100;
        config.rf.method = method;
        config.run.turns = 6;
        config.run.sample_interval = 2;
        config.run.log_interval = 0;
        let report = run(&config).unwrap();
        (config, report)
    }

    #[test]
    fn test_turn_table_layout() {
        let (config, report) = small_run(LongitudinalMethod::Rigid);
        let dir = tempfile::tempdir().unwrap();
        let written = write_report(&report, &config.run.track_bunches, dir.path()).unwrap();
        assert!(written.iter().any(|p| p.ends_with("turns.sdds")));

        let text = std::fs::read_to_string(dir.path().join("turns.sdds")).unwrap();
        assert!(text.starts_with("SDDS1\n"));
        let columns = text.lines().filter(|l| l.starts_with("&column")).count();
        // turn, ions, 18 centroid columns, 4 envelope columns, survivors, 12 per tracked bunch
        assert_eq!(columns, 1 + 1 + 18 + 4 + 1 + 12);
        let data: Vec<&str> = text.lines().skip_while(|l| !l.starts_with("! page")).skip(2).collect();
        assert_eq!(data.len(), 6);
        assert_eq!(data[0].split_whitespace().count(), columns);
    }

    #[test]
    fn test_summary_json_round_trip() {
        let (config, report) = small_run(LongitudinalMethod::Rigid);
        let dir = tempfile::tempdir().unwrap();
        write_report(&report, &config.run.track_bunches, dir.path()).unwrap();
        let json = std::fs::read_to_string(dir.path().join("summary.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["turns"], 6);
        assert_eq!(value["warm_up"].as_array().unwrap().len(), 1);
        assert!(value["potential_well"].is_null());
    }

    #[test]
    fn test_well_table_for_analytic_method() {
        let (config, report) = small_run(LongitudinalMethod::AnalyticNoInstability);
        let dir = tempfile::tempdir().unwrap();
        let written = write_report(&report, &config.run.track_bunches, dir.path()).unwrap();
        assert!(written.iter().any(|p| p.ends_with("potential_well.sdds")));
        let text = std::fs::read_to_string(dir.path().join("potential_well.sdds")).unwrap();
        let rows = text
            .lines()
            .filter(|l| !l.starts_with('&') && !l.starts_with('!'))
            .filter(|l| l.split_whitespace().count() == 5)
            .count();
        assert_eq!(rows, config.rf.bins);
    }
}
