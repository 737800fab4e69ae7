//! A patch: one rectangular subdomain with its fields, all species, the
//! neighbor tables and everything scheduled on it. Patches reference
//! their neighbors by Hilbert index only; the owner table resolves ranks.

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use larmor_core::rng::patch_rng;
use larmor_core::topology::{NO_NEIGHBOR, OwnerTable, PatchTopology};
use larmor_core::SimParams;
use larmor_fields::boundary::FieldBc;
use larmor_fields::em::apply_profile;
use larmor_fields::laser::Laser;
use larmor_fields::maxwell::MaxwellSolver;
use larmor_fields::poisson::PoissonScratch;
use larmor_fields::EmFields;
use larmor_particles::collisions::CollisionKernel;
use larmor_particles::interp::Interpolator;
use larmor_particles::project::Projector;
use larmor_particles::species::{DynamicsScratch, PatchEnv, Spawned};
use larmor_particles::Species;

#[derive(Serialize, Deserialize)]
pub struct Patch {
    pub hindex: u64,
    pub coords: [usize; 3],
    /// Global cell index of the first interior cell per axis
    pub cell_begin: [i64; 3],
    pub env: PatchEnv,
    /// Neighbor Hilbert indices per (axis, side); NO_NEIGHBOR at open edges
    pub neighbors: [[u64; 2]; 3],
    /// Ranks owning those neighbors, recomputed after load balancing
    pub neighbor_ranks: [[Option<usize>; 2]; 3],
    pub em: EmFields,
    pub species: Vec<Species>,
    pub field_bcs: Vec<FieldBc>,
    #[serde(skip)]
    pub poisson: Option<PoissonScratch>,
    /// Particles created during the last dynamics sweep, by species
    #[serde(skip)]
    pub pending_spawn: Spawned,
}

impl Patch {
    pub fn new(
        params: &SimParams,
        topology: &PatchTopology,
        owners: &OwnerTable,
        hindex: u64,
    ) -> Self {
        let coords = topology.coords_of(hindex);
        let mut env = PatchEnv {
            min: [0.0; 3],
            max: [0.0; 3],
            global_min: [0.0; 3],
            global_max: [0.0; 3],
            on_edge: [[false; 2]; 3],
        };
        let mut cell_begin = [0i64; 3];
        for axis in 0..params.ndim {
            env.min[axis] = params.patch_min(coords[axis], axis);
            env.max[axis] = env.min[axis] + params.patch_length[axis];
            env.global_max[axis] = params.grid_length[axis];
            for side in 0..2 {
                env.on_edge[axis][side] = topology.on_global_boundary(&coords, axis, side);
            }
            cell_begin[axis] = (coords[axis] * params.n_space[axis]) as i64;
        }

        let neighbors = topology.neighbor_table(hindex);

        let lasers: Vec<Laser> = params
            .lasers
            .iter()
            .map(|l| Laser::new(l.clone()))
            .collect();
        let field_bcs = FieldBc::for_patch(params, env.on_edge, &lasers);

        let mut em = EmFields::new(params, params.species.len());
        em.apply_external_fields(&params.external_fields, params, env.min);

        let mut species: Vec<Species> = params
            .species
            .iter()
            .map(|sp| Species::new(sp, params.ndim))
            .collect();
        let mut rng = patch_rng(params.seed, hindex, 0);
        for sp in &mut species {
            sp.create_particles(params, &env, 0..params.n_space[0], hindex, &mut rng);
            sp.sort_particles(&env, params);
        }

        let mut patch = Self {
            hindex,
            coords,
            cell_begin,
            env,
            neighbors,
            neighbor_ranks: [[None; 2]; 3],
            em,
            species,
            field_bcs,
            poisson: None,
            pending_spawn: Vec::new(),
        };
        patch.update_neighbor_ranks(owners);
        patch
    }

    /// Refresh the owner ranks of every neighbor after a balance step.
    pub fn update_neighbor_ranks(&mut self, owners: &OwnerTable) {
        for axis in 0..3 {
            for side in 0..2 {
                let nb = self.neighbors[axis][side];
                self.neighbor_ranks[axis][side] = if nb == NO_NEIGHBOR {
                    None
                } else {
                    Some(owners.owner_of(nb))
                };
            }
        }
    }

    /// The per-step deterministic generator of this patch.
    pub fn rng(&self, params: &SimParams, step: usize) -> ChaCha8Rng {
        patch_rng(params.seed, self.hindex, step as u64)
    }

    pub fn interpolator(&self, params: &SimParams) -> Interpolator {
        Interpolator::new(params, self.cell_begin)
    }

    pub fn projector(&self, params: &SimParams) -> Projector {
        Projector::new(params, self.cell_begin)
    }

    /// The particle phase of one step on this patch: collisions at their
    /// cadence, then interpolate/ionize/radiate/push/boundary/project for
    /// every unfrozen species.
    #[allow(clippy::too_many_arguments)]
    pub fn dynamics(
        &mut self,
        params: &SimParams,
        rad_tables: &larmor_particles::tables::RadiationTables,
        pair_tables: &larmor_particles::tables::PairProductionTables,
        time_dual: f64,
        step: usize,
        diag_flag: bool,
    ) {
        let mut rng = self.rng(params, step);
        self.em.restart_rho_j(diag_flag);

        self.apply_collisions(params, time_dual, step, &mut rng);

        let interp = self.interpolator(params);
        let proj = self.projector(params);
        let mut scratch = DynamicsScratch::default();
        let mut spawned = Spawned::new();
        for sp in &mut self.species {
            sp.dynamics(
                &mut self.em,
                &interp,
                &proj,
                &mut scratch,
                &self.env,
                params,
                rad_tables,
                pair_tables,
                &mut rng,
                time_dual,
                diag_flag,
                &mut spawned,
            );
        }
        self.pending_spawn.append(&mut spawned);

        self.apply_antennas(params, time_dual);
    }

    fn apply_collisions(
        &mut self,
        params: &SimParams,
        time_dual: f64,
        step: usize,
        rng: &mut ChaCha8Rng,
    ) {
        for cfg in &params.collisions {
            if step % cfg.every != 0 {
                continue;
            }
            let n_bins = params.n_space[0] / params.clrw;
            for &i1 in &cfg.species1 {
                for &i2 in &cfg.species2 {
                    let kernel = CollisionKernel {
                        coulomb_log: cfg.coulomb_log,
                        mass1: params.species[i1].mass,
                        mass2: params.species[i2].mass,
                        cell_volume: params.cell_volume * params.clrw as f64,
                    };
                    if i1 == i2 {
                        let sp = &mut self.species[i1];
                        if sp.is_frozen(time_dual) {
                            continue;
                        }
                        for bin in 0..n_bins.min(sp.particles.bmin.len()) {
                            kernel.collide_intra(&mut sp.particles, bin, params.timestep, rng);
                        }
                    } else {
                        let (lo, hi) = (i1.min(i2), i1.max(i2));
                        let (head, tail) = self.species.split_at_mut(hi);
                        let (a, b) = (&mut head[lo], &mut tail[0]);
                        let (pa, pb) = if i1 < i2 { (a, b) } else { (b, a) };
                        if pa.is_frozen(time_dual) || pb.is_frozen(time_dual) {
                            continue;
                        }
                        let bins = pa
                            .particles
                            .bmin
                            .len()
                            .min(pb.particles.bmin.len())
                            .min(n_bins);
                        for bin in 0..bins {
                            kernel.collide_inter(
                                &mut pa.particles,
                                &mut pb.particles,
                                bin,
                                params.timestep,
                                rng,
                            );
                        }
                    }
                }
            }
        }
    }

    /// Prescribed current sources, added after the particle deposition.
    fn apply_antennas(&mut self, params: &SimParams, time_dual: f64) {
        for antenna in &params.antennas {
            let amplitude = antenna.time_profile.value_at(time_dual);
            if amplitude == 0.0 {
                continue;
            }
            let field = match antenna.field.as_str() {
                "Jx" => &mut self.em.jx,
                "Jy" => &mut self.em.jy,
                _ => &mut self.em.jz,
            };
            let profile = &antenna.space_profile;
            apply_profile(field, params, self.env.min, |pos| {
                amplitude * profile.value_at(pos)
            });
        }
    }

    /// Import the particles created on this patch and received from the
    /// neighbors, then restore the bin invariants.
    pub fn finalize_and_sort(&mut self, params: &SimParams) {
        let hindex = self.hindex;
        for (target, particles) in std::mem::take(&mut self.pending_spawn) {
            self.species[target].import_particles(particles, hindex);
        }
        for sp in &mut self.species {
            sp.sort_particles(&self.env, params);
        }
    }

    /// Maxwell sub-steps on this patch.
    pub fn solve_maxwell(&mut self, solver: &MaxwellSolver) {
        self.em.save_magnetic_fields();
        solver.ampere(&mut self.em);
        solver.faraday(&mut self.em);
    }

    pub fn apply_field_bcs(&mut self, params: &SimParams, time_dual: f64) {
        let env_min = self.env.min;
        for bc in &mut self.field_bcs {
            bc.apply(&mut self.em, params, env_min, time_dual);
        }
    }

    /// Work estimate for the balancer.
    pub fn load(&self, params: &SimParams, time_dual: f64) -> f64 {
        let (cell_load, frozen_weight) = params
            .load_balancing
            .as_ref()
            .map(|lb| (lb.cell_load, lb.frozen_particle_load))
            .unwrap_or((1.0, 0.1));
        let mut cells = 1.0;
        for axis in 0..params.ndim {
            cells *= (params.n_space[axis] + 2 * params.oversize[axis]) as f64;
        }
        let mut load = cells * cell_load;
        for sp in &self.species {
            load += sp.load(frozen_weight, time_dual);
        }
        load
    }

    /// Finite-check of the hot fields, run by the periodic debug scan.
    pub fn check_finite(&self, step: usize) -> Result<(), larmor_core::Error> {
        for f in [&self.em.ex, &self.em.ey, &self.em.ez, &self.em.bx, &self.em.by, &self.em.bz] {
            if !f.all_finite() {
                return Err(larmor_core::Error::NonFinite {
                    quantity: f.kind.name(),
                    patch: self.hindex,
                    step,
                });
            }
        }
        for sp in &self.species {
            for c in 0..3 {
                if !sp.particles.momentum[c].iter().all(|v| v.is_finite()) {
                    return Err(larmor_core::Error::NonFinite {
                        quantity: "momentum",
                        patch: self.hindex,
                        step,
                    });
                }
            }
        }
        Ok(())
    }
}
