//! Beam-ion interaction
//!
//! Every interaction point holds one ion cloud per residual-gas species.
//! For each passing bunch, in fill order, a cloud goes through:
//! generate → accumulate → RMS → mutual kicks → drift to the next bunch → cull.
//!
//! Both directions of the kick use the Bassetti-Erskine field of the source
//! treated as a bi-Gaussian; electrons and ions attract.

use crate::bunch::Bunch;
use crate::config::{Config, GasSpecies, IonConfig, RingParameters};
use crate::constants::{BOLTZMANN, C0, ELECTRON_MASS_EV, ELECTRON_RADIUS, PROTON_MASS_EV};
use crate::field::beam_field;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Serialize;

/// Macro-ions of one gas species at one interaction point
#[derive(Debug, Clone, Default)]
pub struct IonCloud {
    pub mass_number: f64,
    /// Ions created per electron and per metre of interaction length
    pub ionization_density: f64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub vx: Vec<f64>,
    pub vy: Vec<f64>,
    /// Last velocity kick received from a bunch (m/s)
    pub kick_x: Vec<f64>,
    pub kick_y: Vec<f64>,
    /// Real ions represented by each macro-ion
    pub weight: Vec<f64>,
    pub centroid: [f64; 2],
    pub rms: [f64; 2],
}

impl IonCloud {
    fn new(species: &GasSpecies, pressure: f64, temperature: f64) -> Self {
        let gas_density = pressure * species.fraction / (BOLTZMANN * temperature);
        Self {
            mass_number: species.mass_number,
            ionization_density: species.cross_section * gas_density,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Real ions in the cloud
    pub fn charge(&self) -> f64 {
        self.weight.iter().sum()
    }

    /// Append `macro_ions` Gaussian macro-ions around `center`, truncated at
    /// `cut` RMS, sharing `real_ions` between them
    fn generate(
        &mut self,
        real_ions: f64,
        macro_ions: usize,
        center: [f64; 2],
        size: [f64; 2],
        cut: f64,
        rng: &mut StdRng,
    ) {
        let weight = real_ions / macro_ions as f64;
        let mut created = 0;
        while created < macro_ions {
            let a: f64 = rng.sample(StandardNormal);
            let b: f64 = rng.sample(StandardNormal);
            if a * a + b * b > cut * cut {
                continue;
            }
            self.x.push(center[0] + a * size[0]);
            self.y.push(center[1] + b * size[1]);
            self.vx.push(0.0);
            self.vy.push(0.0);
            self.kick_x.push(0.0);
            self.kick_y.push(0.0);
            self.weight.push(weight);
            created += 1;
        }
    }

    /// Weighted centroid and RMS size
    fn update_moments(&mut self) {
        let total = self.charge();
        if self.is_empty() || total <= 0.0 {
            self.centroid = [0.0; 2];
            self.rms = [0.0; 2];
            return;
        }
        let mut mean = [0.0; 2];
        for i in 0..self.len() {
            mean[0] += self.weight[i] * self.x[i];
            mean[1] += self.weight[i] * self.y[i];
        }
        mean = mean.map(|m| m / total);
        let mut var = [0.0; 2];
        for i in 0..self.len() {
            var[0] += self.weight[i] * (self.x[i] - mean[0]).powi(2);
            var[1] += self.weight[i] * (self.y[i] - mean[1]).powi(2);
        }
        self.centroid = mean;
        self.rms = var.map(|v| (v / total).sqrt());
    }

    /// Drift for `dt` and drop ions outside the elliptical boundary or the aperture
    fn drift_and_cull(&mut self, dt: f64, boundary: [f64; 2], aperture: Option<[f64; 2]>) -> usize {
        for i in 0..self.len() {
            self.x[i] += self.vx[i] * dt;
            self.y[i] += self.vy[i] * dt;
        }
        let keep: Vec<bool> = (0..self.len())
            .map(|i| {
                let (x, y) = (self.x[i], self.y[i]);
                let inside = boundary[0] <= 0.0
                    || boundary[1] <= 0.0
                    || (x / boundary[0]).powi(2) + (y / boundary[1]).powi(2) <= 1.0;
                let in_pipe = aperture.map_or(true, |a| x.abs() <= a[0] && y.abs() <= a[1]);
                inside && in_pipe
            })
            .collect();
        let before = self.len();
        for v in [
            &mut self.x,
            &mut self.y,
            &mut self.vx,
            &mut self.vy,
            &mut self.kick_x,
            &mut self.kick_y,
            &mut self.weight,
        ] {
            let mut flags = keep.iter();
            v.retain(|_| *flags.next().unwrap_or(&false));
        }
        before - self.len()
    }
}

/// Ion clouds of one interaction point
#[derive(Debug, Clone)]
pub struct InteractionSite {
    pub interaction_length: f64,
    /// Twiss beta [x, y] at this point
    pub beta: [f64; 2],
    pub clouds: Vec<IonCloud>,
}

/// Summary of one ion cloud
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IonSnapshot {
    pub point: usize,
    pub species: usize,
    pub mass_number: f64,
    pub macro_ions: usize,
    pub ions: f64,
    pub centroid: [f64; 2],
    pub rms: [f64; 2],
}

/// All ion clouds of the ring
#[derive(Debug, Clone)]
pub struct IonField {
    pub sites: Vec<InteractionSite>,
    settings: IonConfig,
    /// Nominal beam emittance, for weak-strong sizes
    emittance: [f64; 2],
    gamma: f64,
}

impl IonField {
    pub fn new(config: &Config, ring: &RingParameters) -> Self {
        let sites = config
            .lattice
            .interaction_points
            .iter()
            .map(|ip| InteractionSite {
                interaction_length: ip.interaction_length,
                beta: ip.beta,
                clouds: config
                    .ions
                    .species
                    .iter()
                    .map(|s| IonCloud::new(s, ip.pressure, ip.temperature))
                    .collect(),
            })
            .collect();
        Self {
            sites,
            settings: config.ions.clone(),
            emittance: config.ring.emittance,
            gamma: ring.gamma,
        }
    }

    /// Pass `bunch` through the clouds at point `k`. The bunch statistics
    /// must be computed with the optics of this point. `max_size` is the
    /// largest RMS beam size over all bunches, for the loss boundary.
    pub fn interact(
        &mut self,
        k: usize,
        bunch: &mut Bunch,
        ring: &RingParameters,
        max_size: [f64; 2],
        rng: &mut StdRng,
    ) {
        let settings = &self.settings;
        let site = &mut self.sites[k];
        let electrons = bunch.stats.survivors as f64 * bunch.macro_charge;
        let center = [bunch.stats.mean[0], bunch.stats.mean[2]];
        let size = if bunch.len() == 1 {
            [
                (self.emittance[0] * site.beta[0]).sqrt(),
                (self.emittance[1] * site.beta[1]).sqrt(),
            ]
        } else {
            bunch.stats.rms_size
        };

        for cloud in site.clouds.iter_mut() {
            let real_ions = cloud.ionization_density * electrons * site.interaction_length;
            cloud.generate(real_ions, settings.macro_ions_per_bunch, center, size, settings.cut_sigma, rng);
        }
        for cloud in site.clouds.iter_mut() {
            cloud.update_moments();
        }

        // bunch field on the ions
        for cloud in site.clouds.iter_mut() {
            let coeff = 2.0 * electrons * ELECTRON_RADIUS * C0 * ELECTRON_MASS_EV / (PROTON_MASS_EV * cloud.mass_number);
            for i in 0..cloud.len() {
                let (ex, ey) = beam_field(cloud.x[i] - center[0], cloud.y[i] - center[1], size[0], size[1]);
                cloud.kick_x[i] = -coeff * ex;
                cloud.kick_y[i] = -coeff * ey;
                cloud.vx[i] += cloud.kick_x[i];
                cloud.vy[i] += cloud.kick_y[i];
            }
        }

        // ion field on the electrons
        for cloud in site.clouds.iter() {
            let ions = cloud.charge();
            if ions <= 0.0 {
                continue;
            }
            let coeff = 2.0 * ions * ELECTRON_RADIUS / self.gamma;
            for i in 0..bunch.len() {
                if bunch.lost[i] {
                    continue;
                }
                let (ex, ey) = beam_field(
                    bunch.x[i] - cloud.centroid[0],
                    bunch.y[i] - cloud.centroid[1],
                    cloud.rms[0],
                    cloud.rms[1],
                );
                bunch.px[i] -= coeff * ex;
                bunch.py[i] -= coeff * ey;
            }
        }

        let dt = bunch.gap as f64 * ring.t_rf;
        let boundary = max_size.map(|s| settings.loss_boundary * s);
        for cloud in site.clouds.iter_mut() {
            cloud.drift_and_cull(dt, boundary, settings.aperture);
        }
    }

    /// Real ions over all points and species
    pub fn total_charge(&self) -> f64 {
        self.sites.iter().flat_map(|s| &s.clouds).map(IonCloud::charge).sum()
    }

    pub fn snapshot(&self) -> Vec<IonSnapshot> {
        let mut snapshots = Vec::new();
        for (point, site) in self.sites.iter().enumerate() {
            for (species, cloud) in site.clouds.iter().enumerate() {
                snapshots.push(IonSnapshot {
                    point,
                    species,
                    mass_number: cloud.mass_number,
                    macro_ions: cloud.len(),
                    ions: cloud.charge(),
                    centroid: cloud.centroid,
                    rms: cloud.rms,
                });
            }
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::populate;
    use rand::SeedableRng;

    fn ion_config() -> Config {
        let mut config = Config::default();
        config.ions.enabled = true;
        config.ions.loss_boundary = 1.0e6;
        config.bunch.macro_particles = 2000;
        config
    }

    fn bunch_for(config: &Config, ring: &RingParameters, rng: &mut StdRng) -> Bunch {
        let mut bunch = Bunch::new(0, 0, config.bunch.macro_particles, 1.0e11);
        bunch.gap = 1;
        populate(&mut bunch, config, ring, rng);
        bunch.compute_statistics(config.lattice.interaction_points[0].beta).unwrap();
        bunch
    }

    #[test]
    fn test_generation_count() {
        let config = ion_config();
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(1);
        let mut field = IonField::new(&config, &ring);
        let mut bunch = bunch_for(&config, &ring, &mut rng);
        let size = bunch.stats.rms_size;
        field.interact(0, &mut bunch, &ring, size, &mut rng);

        let ip = &config.lattice.interaction_points[0];
        let gas = &config.ions.species[0];
        let expected = gas.cross_section * ip.pressure * gas.fraction / (BOLTZMANN * ip.temperature)
            * 1.0e11
            * ip.interaction_length;
        assert!((field.total_charge() - expected).abs() < 1e-9 * expected);
        assert_eq!(field.sites[0].clouds[0].len(), config.ions.macro_ions_per_bunch);
    }

    #[test]
    fn test_accumulation_is_monotonic() {
        let config = ion_config();
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(2);
        let mut field = IonField::new(&config, &ring);
        let mut bunch = bunch_for(&config, &ring, &mut rng);
        let size = bunch.stats.rms_size;
        let mut last = 0.0;
        for _ in 0..5 {
            field.interact(0, &mut bunch, &ring, size, &mut rng);
            let total = field.total_charge();
            assert!(total > last);
            last = total;
        }
    }

    #[test]
    fn test_culling_outside_boundary() {
        let mut cloud = IonCloud::default();
        for (x, y) in [(0.0, 0.0), (5e-3, 0.0), (0.0, 2e-3), (1e-3, 1e-3)] {
            cloud.x.push(x);
            cloud.y.push(y);
            cloud.vx.push(0.0);
            cloud.vy.push(0.0);
            cloud.kick_x.push(0.0);
            cloud.kick_y.push(0.0);
            cloud.weight.push(1.0);
        }
        let lost = cloud.drift_and_cull(0.0, [4e-3, 3e-3], None);
        assert_eq!(lost, 1);
        assert_eq!(cloud.x, vec![0.0, 0.0, 1e-3]);
        let lost = cloud.drift_and_cull(0.0, [4e-3, 3e-3], Some([1e-2, 1.5e-3]));
        assert_eq!(lost, 1);
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.weight.len(), 2);
    }

    #[test]
    fn test_drift_moves_ions() {
        let mut cloud = IonCloud::default();
        cloud.x.push(0.0);
        cloud.y.push(0.0);
        cloud.vx.push(100.0);
        cloud.vy.push(-50.0);
        cloud.kick_x.push(0.0);
        cloud.kick_y.push(0.0);
        cloud.weight.push(1.0);
        cloud.drift_and_cull(1e-6, [1.0, 1.0], None);
        assert!((cloud.x[0] - 1e-4).abs() < 1e-18);
        assert!((cloud.y[0] + 5e-5).abs() < 1e-18);
    }

    #[test]
    fn test_kicks_are_attractive() {
        let mut config = ion_config();
        config.bunch.macro_particles = 1;
        config.bunch.offsets = [2e-4, 0.0, 0.0, 0.0, 0.0, 0.0];
        let ring = config.ring_parameters();
        let mut rng = StdRng::seed_from_u64(3);
        let mut field = IonField::new(&config, &ring);

        // seed one ion cloud on axis
        let cloud = &mut field.sites[0].clouds[0];
        cloud.generate(1.0e6, 200, [0.0, 0.0], [5e-5, 5e-5], 3.0, &mut rng);
        cloud.update_moments();

        let mut bunch = Bunch::new(0, 0, 1, 1.0e10);
        populate(&mut bunch, &config, &ring, &mut rng);
        bunch.compute_statistics(config.lattice.interaction_points[0].beta).unwrap();
        field.interact(0, &mut bunch, &ring, [1e-4, 1e-5], &mut rng);

        // the electron at +x is pulled back toward the ions
        assert!(bunch.px[0] < 0.0);
        // ions left of the bunch centroid are pulled toward +x
        let cloud = &field.sites[0].clouds[0];
        let left: Vec<usize> = (0..cloud.len()).filter(|&i| cloud.x[i] < 1e-4).collect();
        assert!(!left.is_empty());
        assert!(left.iter().all(|&i| cloud.kick_x[i] > 0.0));
    }

    #[test]
    fn test_snapshot_per_site_and_species() {
        let mut config = ion_config();
        config.ions.species.push(GasSpecies { mass_number: 2.0, fraction: 0.5, cross_section: 3.0e-23 });
        let second = config.lattice.interaction_points[0].clone();
        config.lattice.interaction_points.push(second);
        let ring = config.ring_parameters();
        let field = IonField::new(&config, &ring);
        let snapshots = field.snapshot();
        assert_eq!(snapshots.len(), 4);
        assert_eq!(snapshots[3].point, 1);
        assert_eq!(snapshots[3].species, 1);
        assert_eq!(field.total_charge(), 0.0);
    }
}
