//! One particle population and its per-patch dynamics pipeline:
//! interpolate, ionize, radiate, decay, push, boundary-check, project.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use larmor_core::SimParams;
use larmor_core::config::{PartBoundary, PusherKind, SpeciesParams};
use larmor_fields::EmFields;

use crate::boundary::{self, BcEnergy, boost_momentum};
use crate::interp::Interpolator;
use crate::ionization::FieldIonization;
use crate::pair_production;
use crate::particles::Particles;
use crate::project::Projector;
use crate::pusher;
use crate::radiation;
use crate::tables::{PairProductionTables, RadiationTables};

/// Geometry of the owning patch as seen by the particle pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatchEnv {
    /// Patch bounds
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Global box bounds
    pub global_min: [f64; 3],
    pub global_max: [f64; 3],
    /// Whether this patch touches the global box edge per (axis, side)
    pub on_edge: [[bool; 2]; 3],
}

/// Reusable per-call scratch for one (patch, species) bin sweep.
#[derive(Debug, Default, Clone)]
pub struct DynamicsScratch {
    pub epart: Vec<f64>,
    pub bpart: Vec<f64>,
    pub invgf: Vec<f64>,
    pub iold: Vec<i32>,
    pub delta: Vec<f64>,
}

impl DynamicsScratch {
    fn resize(&mut self, n: usize, ndim: usize) {
        self.epart.resize(3 * n, 0.0);
        self.bpart.resize(3 * n, 0.0);
        self.invgf.resize(n, 0.0);
        self.iold.resize(ndim * n, 0);
        self.delta.resize(ndim * n, 0.0);
    }
}

/// Particles created for another species during a dynamics sweep, keyed by
/// the destination species index. The patch imports them after the sweep.
pub type Spawned = Vec<(usize, Particles)>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Species {
    pub params: SpeciesParams,
    pub particles: Particles,
    /// Energy ledgers for the scalar diagnostics
    pub nrj_bc_lost: f64,
    pub nrj_mw_lost: f64,
    pub nrj_new: f64,
    pub nrj_radiated: f64,
    /// Rest mass created by pair conversion (photon species only)
    pub nrj_converted: f64,
    #[serde(skip)]
    ionizer: Option<FieldIonization>,
    /// Monotonic id counter for tracked particles
    pub next_id: u64,
}

impl Species {
    pub fn new(params: &SpeciesParams, ndim: usize) -> Self {
        let ionizer = params
            .ionization
            .as_ref()
            .map(|ion| FieldIonization::new(ion.atomic_number));
        Self {
            particles: Particles::new(ndim, params.needs_mc_state(), params.tracked),
            params: params.clone(),
            nrj_bc_lost: 0.0,
            nrj_mw_lost: 0.0,
            nrj_new: 0.0,
            nrj_radiated: 0.0,
            nrj_converted: 0.0,
            ionizer,
            next_id: 0,
        }
    }

    /// Rebuild the transient operators after deserialization (restart or
    /// patch migration).
    pub fn rebuild_operators(&mut self) {
        self.ionizer = self
            .params
            .ionization
            .as_ref()
            .map(|ion| FieldIonization::new(ion.atomic_number));
    }

    pub fn is_frozen(&self, time_dual: f64) -> bool {
        time_dual < self.params.time_frozen
    }

    /// Load the initial (or moving-window refill) population of the cells
    /// `x_cell_range` of this patch.
    pub fn create_particles(
        &mut self,
        params: &SimParams,
        env: &PatchEnv,
        x_cell_range: std::ops::Range<usize>,
        patch_id: u64,
        rng: &mut ChaCha8Rng,
    ) {
        let Some(density) = self.params.density.clone() else {
            return;
        };
        let ppc = self.params.particles_per_cell;
        if ppc == 0 {
            return;
        }
        let ndim = params.ndim;
        let mut cells = [1usize; 3];
        cells[0] = x_cell_range.len();
        for axis in 1..ndim {
            cells[axis] = params.n_space[axis];
        }

        let mut center = [0.0f64; 3];
        for ix in x_cell_range.clone() {
            for iy in 0..cells[1] {
                for iz in 0..cells[2] {
                    let cell = [ix, iy, iz];
                    for axis in 0..ndim {
                        center[axis] =
                            env.min[axis] + (cell[axis] as f64 + 0.5) * params.cell_length[axis];
                    }
                    let n0 = density.value_at(&center[..ndim]);
                    if n0 <= 0.0 {
                        continue;
                    }
                    let weight = n0 / ppc as f64;
                    for k in 0..ppc {
                        let mut pos = [0.0f64; 3];
                        for axis in 0..ndim {
                            let frac = match self.params.position_initialization {
                                larmor_core::config::PositionInit::Regular => {
                                    // sub-lattice offset, decorrelated per axis
                                    let stride = [1usize, 3, 7][axis];
                                    ((k * stride + axis) % ppc) as f64 / ppc as f64 + 0.5 / ppc as f64
                                }
                                larmor_core::config::PositionInit::Random => {
                                    rng.gen_range(0.0f64..1.0)
                                }
                            };
                            pos[axis] = env.min[axis]
                                + (cell[axis] as f64 + frac) * params.cell_length[axis];
                        }
                        let momentum = self.sample_momentum(rng);
                        self.particles.push_back(
                            &pos[..ndim],
                            momentum,
                            weight,
                            self.params.charge.round() as i16,
                        );
                        let ipart = self.particles.len() - 1;
                        if self.particles.has_ids {
                            self.particles.id[ipart] = (patch_id << 40) | self.next_id;
                            self.next_id += 1;
                        }
                        self.nrj_new += boundary::particle_energy(&self.particles, ipart, &self.params);
                    }
                }
            }
        }
    }

    /// Maxwellian draw at the species temperature, boosted by the mean
    /// drift velocity.
    fn sample_momentum(&self, rng: &mut ChaCha8Rng) -> [f64; 3] {
        let mut p = [0.0f64; 3];
        for c in 0..3 {
            let sigma = self.params.thermal_momentum[c];
            if sigma > 0.0 {
                p[c] = Normal::new(0.0, sigma).unwrap().sample(rng);
            }
        }
        // fold the drift in through a temporary one-particle container
        let drift = self.params.mean_velocity;
        if drift.iter().any(|&v| v != 0.0) {
            let mut tmp = Particles::new(1, false, false);
            tmp.push_back(&[0.0], p, 1.0, 0);
            boost_momentum(&mut tmp, 0, drift);
            for c in 0..3 {
                p[c] = tmp.momentum[c][0];
            }
        }
        p
    }

    /// Full dynamics sweep over the bins of this species on one patch.
    #[allow(clippy::too_many_arguments)]
    pub fn dynamics(
        &mut self,
        em: &mut EmFields,
        interp: &Interpolator,
        proj: &Projector,
        scratch: &mut DynamicsScratch,
        env: &PatchEnv,
        params: &SimParams,
        rad_tables: &RadiationTables,
        pair_tables: &PairProductionTables,
        rng: &mut ChaCha8Rng,
        time_dual: f64,
        diag_flag: bool,
        spawned: &mut Spawned,
    ) {
        if self.is_frozen(time_dual) {
            if diag_flag {
                self.deposit_frozen_charge(em, proj);
            }
            return;
        }
        let ndim = params.ndim;
        let ispec = self.params.index;
        if diag_flag {
            em.ensure_species_fields(ispec);
        }

        let n_bins = self.particles.bmin.len().max(1);
        for bin in 0..n_bins {
            let (istart, iend) = if self.particles.bmin.is_empty() {
                (0, self.particles.len())
            } else {
                (self.particles.bmin[bin], self.particles.bmax[bin])
            };
            let n = iend - istart;
            if n == 0 {
                continue;
            }
            scratch.resize(n, ndim);

            interp.fields_at(
                em,
                &self.particles,
                istart,
                iend,
                &mut scratch.epart,
                &mut scratch.bpart,
                &mut scratch.iold,
                &mut scratch.delta,
            );

            if let Some(ionizer) = &self.ionizer {
                let target = self.params.ionization.as_ref().unwrap().electron_species;
                let mut electrons =
                    Particles::new(ndim, false, false);
                let events = ionizer.apply(
                    &mut self.particles,
                    istart,
                    iend,
                    &scratch.epart,
                    &self.params,
                    rng,
                    params.timestep,
                    &mut electrons,
                );
                for ev in &events {
                    proj.ionization_currents(
                        &mut em.jx,
                        &mut em.jy,
                        &mut em.jz,
                        &self.particles,
                        ev.ipart,
                        ev.jion,
                    );
                }
                if !electrons.is_empty() {
                    spawned.push((target, electrons));
                }
            }

            if self.params.mass > 0.0 {
                let mut photon_buffer = self
                    .params
                    .radiated_photon_species
                    .map(|_| Particles::new(ndim, true, false));
                let radiated = radiation::apply(
                    self.params.radiation_model,
                    &mut self.particles,
                    istart,
                    iend,
                    &scratch.epart,
                    &scratch.bpart,
                    &self.params,
                    rad_tables,
                    rng,
                    params.timestep,
                    photon_buffer.as_mut(),
                );
                if let Some(photons) = photon_buffer {
                    // energy carried by real photons stays in the system
                    let carried: f64 = (0..photons.len())
                        .map(|i| photons.weight[i] * photons.momentum_norm(i))
                        .sum();
                    self.nrj_radiated += radiated - carried;
                    if !photons.is_empty() {
                        spawned.push((self.params.radiated_photon_species.unwrap(), photons));
                    }
                } else {
                    self.nrj_radiated += radiated;
                }
            } else if let Some([ie, ip]) = self.params.pair_species {
                let mut electrons = Particles::new(ndim, true, false);
                let mut positrons = Particles::new(ndim, true, false);
                let converted = pair_production::apply(
                    &mut self.particles,
                    istart,
                    iend,
                    &scratch.epart,
                    &scratch.bpart,
                    pair_tables,
                    rng,
                    params.timestep,
                    &mut electrons,
                    &mut positrons,
                );
                self.nrj_converted += converted;
                if !electrons.is_empty() {
                    spawned.push((ie, electrons));
                }
                if !positrons.is_empty() {
                    spawned.push((ip, positrons));
                }
            }

            pusher::push(
                self.params.pusher,
                &mut self.particles,
                istart,
                iend,
                &scratch.epart,
                &scratch.bpart,
                &mut scratch.invgf,
                if self.params.mass > 0.0 {
                    1.0 / self.params.mass
                } else {
                    0.0
                },
                params.timestep,
            );

            self.apply_boundaries(env, params, istart, iend, rng);

            if self.params.mass > 0.0 || self.params.charge != 0.0 {
                let (jx, jy, jz, rho) = if diag_flag {
                    // diagnostic steps deposit into the per-species arrays
                    let [sjx, sjy, sjz, srho] = em.species_fields_mut(ispec);
                    (sjx, sjy, sjz, Some(srho))
                } else {
                    (&mut em.jx, &mut em.jy, &mut em.jz, None)
                };
                proj.currents(
                    jx,
                    jy,
                    jz,
                    rho,
                    &self.particles,
                    istart,
                    iend,
                    &scratch.invgf,
                    &scratch.iold,
                    &scratch.delta,
                );
            }
        }
    }

    fn deposit_frozen_charge(&mut self, em: &mut EmFields, proj: &Projector) {
        let ispec = self.params.index;
        em.ensure_species_fields(ispec);
        let rho = em.species_rho[ispec].as_mut().unwrap();
        proj.charge(rho, &self.particles, 0, self.particles.len());
    }

    /// Deposit charge only, used by the Poisson initialization.
    pub fn deposit_charge(&self, em: &mut EmFields, proj: &Projector) {
        proj.charge(&mut em.rho, &self.particles, 0, self.particles.len());
    }

    fn apply_boundaries(
        &mut self,
        env: &PatchEnv,
        params: &SimParams,
        istart: usize,
        iend: usize,
        rng: &mut ChaCha8Rng,
    ) {
        let mut energy = BcEnergy::default();
        for ipart in istart..iend {
            for axis in 0..params.ndim {
                for side in 0..2 {
                    if !env.on_edge[axis][side] {
                        continue;
                    }
                    let kind = self.params.bc[axis][side];
                    if kind == PartBoundary::Periodic {
                        continue;
                    }
                    let limit = if side == 0 {
                        env.global_min[axis]
                    } else {
                        env.global_max[axis]
                    };
                    let outside = if side == 0 {
                        self.particles.position[axis][ipart] < limit
                    } else {
                        self.particles.position[axis][ipart] >= limit
                    };
                    if !outside {
                        continue;
                    }
                    let kept = boundary::apply(
                        kind,
                        &mut self.particles,
                        ipart,
                        axis,
                        side,
                        limit,
                        &self.params,
                        rng,
                        &mut energy,
                    );
                    if !kept {
                        break;
                    }
                }
                if self.particles.weight[ipart] == 0.0 {
                    break;
                }
            }
        }
        self.nrj_bc_lost += energy.lost;
    }

    /// Append particles created for this species elsewhere in the patch.
    pub fn import_particles(&mut self, mut incoming: Particles, patch_id: u64) {
        for i in 0..incoming.len() {
            self.particles.push_from(&incoming, i);
            let ipart = self.particles.len() - 1;
            if self.particles.has_ids {
                self.particles.id[ipart] = (patch_id << 40) | self.next_id;
                self.next_id += 1;
            }
        }
        incoming.clear();
    }

    /// Compact removal markers and rebuild the bin partition.
    pub fn sort_particles(&mut self, env: &PatchEnv, params: &SimParams) {
        self.particles.compact_removed();
        let bin_length = params.clrw as f64 * params.cell_length[0];
        let n_bins = params.n_space[0] / params.clrw;
        self.particles.sort_into_bins(env.min[0], bin_length, n_bins);
    }

    /// Total kinetic energy of the population (photons: total energy).
    pub fn kinetic_energy(&self, cell_volume: f64) -> f64 {
        let mut acc = 0.0;
        for i in 0..self.particles.len() {
            acc += boundary::particle_energy(&self.particles, i, &self.params);
        }
        acc * cell_volume
    }

    /// Work estimate for the load balancer.
    pub fn load(&self, frozen_weight: f64, time_dual: f64) -> f64 {
        let factor = if self.is_frozen(time_dual) {
            frozen_weight
        } else {
            1.0
        };
        self.particles.len() as f64 * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::Namelist;
    use rand::SeedableRng;

    fn params() -> SimParams {
        let deck: Namelist = toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.1]
            grid_length = [3.2]
            timestep = 0.05
            simulation_time = 1.0
            number_of_patches = [1]
            em_boundary_conditions = [["periodic", "periodic"]]

            [[species]]
            name = "electrons"
            mass = 1.0
            charge = -1.0
            particles_per_cell = 4
            density = { shape = "constant", value = 2.0 }
            boundary_conditions = [["periodic", "periodic"]]
            "#,
        )
        .unwrap();
        SimParams::resolve(&deck, 1).unwrap()
    }

    fn env(params: &SimParams) -> PatchEnv {
        PatchEnv {
            min: [0.0; 3],
            max: [params.grid_length[0], 0.0, 0.0],
            global_min: [0.0; 3],
            global_max: [params.grid_length[0], 0.0, 0.0],
            on_edge: [[true, true], [false, false], [false, false]],
        }
    }

    #[test]
    fn loading_fills_every_cell_with_the_requested_weight() {
        let params = params();
        let env = env(&params);
        let mut sp = Species::new(&params.species[0], 1);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        sp.create_particles(&params, &env, 0..params.n_space[0], 0, &mut rng);
        assert_eq!(sp.particles.len(), 32 * 4);
        // total charge = density * volume * charge
        let total_w: f64 = sp.particles.weight.iter().sum();
        assert!((total_w - 2.0 * 32.0).abs() < 1e-9);
        // all particles inside the box
        for i in 0..sp.particles.len() {
            let x = sp.particles.position[0][i];
            assert!(x >= 0.0 && x < params.grid_length[0]);
        }
    }

    #[test]
    fn sorting_restores_bin_invariants_after_dynamics() {
        let params = params();
        let env = env(&params);
        let mut sp = Species::new(&params.species[0], 1);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        sp.create_particles(&params, &env, 0..params.n_space[0], 0, &mut rng);
        for i in 0..sp.particles.len() {
            sp.particles.momentum[0][i] = 0.3;
        }
        sp.sort_particles(&env, &params);
        assert!(sp.particles.bins_are_consistent(0.0, params.clrw as f64 * 0.1));
    }

    #[test]
    fn frozen_species_only_deposits_charge() {
        let params = params();
        let env = env(&params);
        let mut sp = Species::new(&params.species[0], 1);
        sp.params.time_frozen = 10.0;
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        sp.create_particles(&params, &env, 0..params.n_space[0], 0, &mut rng);
        sp.sort_particles(&env, &params);

        let mut em = EmFields::new(&params, 1);
        let interp = Interpolator::new(&params, [0; 3]);
        let proj = Projector::new(&params, [0; 3]);
        let mut scratch = DynamicsScratch::default();
        let rad = RadiationTables::build(&params.radiation);
        let pair = PairProductionTables::build(&params.pair_production);
        let mut spawned = Spawned::new();
        let x_before: Vec<f64> = sp.particles.position[0].clone();
        sp.dynamics(
            &mut em,
            &interp,
            &proj,
            &mut scratch,
            &env,
            &params,
            &rad,
            &pair,
            &mut rng,
            0.1,
            true,
            &mut spawned,
        );
        assert_eq!(sp.particles.position[0], x_before);
        let rho_total: f64 = em.species_rho[0].as_ref().unwrap().data().iter().sum();
        assert!((rho_total + 2.0 * 32.0).abs() < 1e-9);
        // no current was deposited
        assert!(em.jx.data().iter().all(|&v| v == 0.0));
    }
}
