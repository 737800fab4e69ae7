//! The rank-level orchestrator: an ordered list of patches and one method
//! per phase of the PIC step. Patch loops are data-parallel; communicator
//! traffic happens between the parallel sections.

use rayon::prelude::*;
use tracing::{info, warn};

use larmor_core::SimParams;
use larmor_core::error::Error;
use larmor_core::topology::{OwnerTable, PatchTopology};
use larmor_fields::filter::binomial_pass;
use larmor_fields::maxwell::MaxwellSolver;
use larmor_fields::poisson::{PoissonScratch, center_e};
use larmor_particles::tables::{PairProductionTables, RadiationTables};

use crate::balance;
use crate::comm::Communicator;
use crate::exchange;
use crate::migrate;
use crate::patch::Patch;
use crate::sync::{self, FieldSel, SyncCtx};
use crate::window::MovingWindow;

pub struct PatchSet {
    pub params: SimParams,
    pub topology: PatchTopology,
    pub owners: OwnerTable,
    pub patches: Vec<Patch>,
    pub solver: MaxwellSolver,
    pub rad_tables: RadiationTables,
    pub pair_tables: PairProductionTables,
    pub window: Option<MovingWindow>,
    /// Per-species densities wanted by a diagnostic this step
    pub diag_flag: bool,
}

impl PatchSet {
    /// Build this rank's patches from scratch (fresh start).
    pub fn new(params: SimParams, comm: &Communicator) -> Self {
        let topology = PatchTopology::new(
            params.number_of_patches,
            params.ndim,
            params.periodic(),
        );
        let owners = balance::init_patch_count(&params, &topology, comm);
        let first = owners.first_of(comm.rank());
        let count = owners.count_of(comm.rank());
        let patches: Vec<Patch> = (first..first + count as u64)
            .map(|h| Patch::new(&params, &topology, &owners, h))
            .collect();
        info!(
            rank = comm.rank(),
            patches = count,
            "patch set ready"
        );
        let window = params
            .moving_window
            .as_ref()
            .map(|mw| MovingWindow::new(mw.time_start, mw.velocity_x));
        Self {
            solver: MaxwellSolver::new(&params),
            rad_tables: RadiationTables::build(&params.radiation),
            pair_tables: PairProductionTables::build(&params.pair_production),
            window,
            topology,
            owners,
            patches,
            params,
            diag_flag: false,
        }
    }

    /// Rebuild from a checkpoint blob (patches already deserialized).
    pub fn from_restart(
        params: SimParams,
        owners: OwnerTable,
        patches: Vec<Patch>,
        window_cells_moved: usize,
    ) -> Self {
        let topology = PatchTopology::new(
            params.number_of_patches,
            params.ndim,
            params.periodic(),
        );
        let mut window = params
            .moving_window
            .as_ref()
            .map(|mw| MovingWindow::new(mw.time_start, mw.velocity_x));
        if let Some(w) = &mut window {
            w.cells_moved = window_cells_moved;
        }
        Self {
            solver: MaxwellSolver::new(&params),
            rad_tables: RadiationTables::build(&params.radiation),
            pair_tables: PairProductionTables::build(&params.pair_production),
            window,
            topology,
            owners,
            patches,
            params,
            diag_flag: false,
        }
    }

    /// Does any diagnostic want per-species densities at `step`?
    pub fn needs_rho_js(&self, step: usize) -> bool {
        let due = |every: usize| every > 0 && step % every == 0;
        self.params.diags.fields.iter().any(|d| due(d.every))
            || self.params.diags.binning.iter().any(|d| due(d.every))
    }

    /// Phase 1: per-patch, per-species reset, interpolate, push, project.
    pub fn dynamics(&mut self, time_dual: f64, step: usize) {
        self.diag_flag = self.needs_rho_js(step);
        let params = &self.params;
        let rad = &self.rad_tables;
        let pair = &self.pair_tables;
        let diag_flag = self.diag_flag;
        self.patches
            .par_iter_mut()
            .for_each(|patch| patch.dynamics(params, rad, pair, time_dual, step, diag_flag));
    }

    /// Phase 2: migrate leaving particles across patches and ranks.
    pub fn exchange_particles(&mut self, comm: &mut Communicator) -> Result<(), Error> {
        let ctx = make_ctx(&self.params, &self.owners, comm);
        exchange::exchange_particles(&mut self.patches, comm, &ctx)
    }

    /// Phase 3: close the deposition across seams.
    pub fn sum_densities(&mut self, comm: &mut Communicator) -> Result<(), Error> {
        if self.diag_flag {
            self.patches
                .par_iter_mut()
                .for_each(|p| p.em.compute_total_rho_j());
        }
        let sels = sync::rho_j_fields();
        let ctx = make_ctx(&self.params, &self.owners, comm);
        sync::sum(&sels, &mut self.patches, comm, &ctx)?;
        if self.diag_flag {
            for ispec in 0..self.params.species.len() {
                let sels = sync::species_rho_j_fields(ispec);
                let ctx = make_ctx(&self.params, &self.owners, comm);
                sync::sum(&sels, &mut self.patches, comm, &ctx)?;
            }
        }
        Ok(())
    }

    /// Phase 4: integrate created/received particles, restore bins, and
    /// periodically reclaim container overhead.
    pub fn finalize_and_sort_particles(&mut self, step: usize) {
        let params = &self.params;
        self.patches
            .par_iter_mut()
            .for_each(|p| p.finalize_and_sort(params));
        if step % self.params.every_clean_particles_overhead == 0 {
            self.patches.par_iter_mut().for_each(|p| {
                for sp in &mut p.species {
                    for pos in &mut sp.particles.position {
                        pos.shrink_to_fit();
                    }
                }
            });
        }
    }

    /// Phase 5: filter currents, advance E and B, exchange B, apply field
    /// boundary conditions and center B for the next push.
    pub fn solve_maxwell(
        &mut self,
        comm: &mut Communicator,
        time_dual: f64,
    ) -> Result<(), Error> {
        for _ in 0..self.params.current_filter_passes {
            self.patches.par_iter_mut().for_each(|p| {
                binomial_pass(&mut p.em.jx);
                binomial_pass(&mut p.em.jy);
                binomial_pass(&mut p.em.jz);
            });
            let sels = sync::j_fields();
            let ctx = make_ctx(&self.params, &self.owners, comm);
            sync::exchange(&sels, &mut self.patches, comm, &ctx)?;
        }

        let solver = &self.solver;
        self.patches
            .par_iter_mut()
            .for_each(|p| p.solve_maxwell(solver));

        let sels = sync::b_fields();
        let ctx = make_ctx(&self.params, &self.owners, comm);
        sync::exchange_synchronized(&sels, &mut self.patches, comm, &ctx)?;

        let params = &self.params;
        self.patches.par_iter_mut().for_each(|p| {
            p.apply_field_bcs(params, time_dual);
            p.em.center_magnetic_fields();
        });
        Ok(())
    }

    /// Deposit the charge of every species into rho (Poisson init).
    pub fn compute_charge(&mut self, comm: &mut Communicator) -> Result<(), Error> {
        let params = &self.params;
        self.patches.par_iter_mut().for_each(|patch| {
            patch.em.rho.put_to(0.0);
            let proj = patch.projector(params);
            for sp in &patch.species {
                sp.deposit_charge(&mut patch.em, &proj);
            }
        });
        let sels = vec![FieldSel::Kind(larmor_fields::FieldKind::Rho)];
        let ctx = make_ctx(&self.params, &self.owners, comm);
        sync::sum(&sels, &mut self.patches, comm, &ctx)
    }

    /// Conjugate-gradient solve of the initial electrostatic field from a
    /// non-neutral rho. Converges when residual/nodes <= poisson_max_error.
    pub fn solve_poisson(&mut self, comm: &mut Communicator) -> Result<(), Error> {
        let params = self.params.clone();
        self.patches.par_iter_mut().for_each(|patch| {
            let mut cg = PoissonScratch::new(&params);
            cg.init(&patch.em);
            patch.poisson = Some(cg);
        });

        let mut nodes_global = 1.0f64;
        for axis in 0..params.ndim {
            nodes_global *= (params.n_space_global[axis] + 1) as f64;
        }

        let local: f64 = self
            .patches
            .iter()
            .map(|p| p.poisson.as_ref().unwrap().r_dot_r())
            .sum();
        let mut rnew = comm.all_reduce_sum(local);
        let mut ctrl = rnew / nodes_global;
        let mut iteration = 0;

        while ctrl > params.poisson_max_error && iteration < params.poisson_max_iteration {
            iteration += 1;

            let sels = vec![FieldSel::PoissonDirection];
            let ctx = make_ctx(&self.params, &self.owners, comm);
            sync::exchange(&sels, &mut self.patches, comm, &ctx)?;

            self.patches
                .par_iter_mut()
                .for_each(|p| p.poisson.as_mut().unwrap().compute_ap());
            let pap_local: f64 = self
                .patches
                .iter()
                .map(|p| p.poisson.as_ref().unwrap().p_dot_ap())
                .sum();
            let p_dot_ap = comm.all_reduce_sum(pap_local);

            let r_dot_r = rnew;
            self.patches
                .par_iter_mut()
                .for_each(|p| p.poisson.as_mut().unwrap().update_phi_and_r(r_dot_r, p_dot_ap));

            let local: f64 = self
                .patches
                .iter()
                .map(|p| p.poisson.as_ref().unwrap().r_dot_r())
                .sum();
            rnew = comm.all_reduce_sum(local);

            self.patches
                .par_iter_mut()
                .for_each(|p| p.poisson.as_mut().unwrap().update_p(rnew, r_dot_r));
            ctrl = rnew / nodes_global;
        }

        if ctrl > params.poisson_max_error {
            if comm.is_master() {
                warn!(
                    iteration,
                    ctrl, "Poisson solver did not converge within the iteration budget"
                );
            }
        } else if comm.is_master() {
            info!(iteration, ctrl, "Poisson solver converged");
        }

        self.patches.par_iter_mut().for_each(|p| {
            let cg = p.poisson.take().unwrap();
            cg.init_e(&mut p.em, &params);
        });
        let sels = sync::e_fields();
        let ctx = make_ctx(&self.params, &self.owners, comm);
        sync::exchange(&sels, &mut self.patches, comm, &ctx)?;

        let e_add = self.poisson_centering_offset(comm);
        self.patches
            .par_iter_mut()
            .for_each(|p| center_e(&mut p.em, e_add));
        Ok(())
    }

    /// The additive constant removed from the reconstructed E: boundary
    /// values in 1D/2D, volume averages in 3D.
    fn poisson_centering_offset(&self, comm: &Communicator) -> [f64; 3] {
        let params = &self.params;
        let offset = match params.ndim {
            1 => {
                let h_last = (self.topology.total_patches() - 1) as u64;
                let mut lo = 0.0;
                let mut hi = 0.0;
                for p in &self.patches {
                    if p.hindex == 0 {
                        lo = p.em.ex.at(p.em.ex.oversize[0], 0, 0);
                    }
                    if p.hindex == h_last {
                        let n = p.em.ex.dims[0];
                        hi = p.em.ex.at(n - 1 - p.em.ex.oversize[0], 0, 0);
                    }
                }
                let lo = comm.all_reduce_sum(lo);
                let hi = comm.all_reduce_sum(hi);
                [-0.5 * (lo + hi), 0.0, 0.0]
            }
            2 => {
                // the (xmin, ymax) and (xmax, ymin) corner patches
                let c1 = self
                    .topology
                    .index_of(&[0, params.number_of_patches[1] - 1]);
                let c2 = self
                    .topology
                    .index_of(&[params.number_of_patches[0] - 1, 0]);
                let mut ex1 = 0.0;
                let mut ey1 = 0.0;
                let mut ex2 = 0.0;
                let mut ey2 = 0.0;
                for p in &self.patches {
                    if p.hindex == c1 {
                        let ov = p.em.ex.oversize;
                        let jmax = p.em.ex.dims[1] - 1 - ov[1];
                        ex1 = p.em.ex.at(ov[0], jmax, 0);
                        let jmax = p.em.ey.dims[1] - 1 - ov[1];
                        ey1 = p.em.ey.at(ov[0], jmax, 0);
                    }
                    if p.hindex == c2 {
                        let ov = p.em.ex.oversize;
                        let imax = p.em.ex.dims[0] - 1 - ov[0];
                        ex2 = p.em.ex.at(imax, ov[1], 0);
                        let imax = p.em.ey.dims[0] - 1 - ov[0];
                        ey2 = p.em.ey.at(imax, ov[1], 0);
                    }
                }
                let ex1 = comm.all_reduce_sum(ex1);
                let ey1 = comm.all_reduce_sum(ey1);
                let ex2 = comm.all_reduce_sum(ex2);
                let ey2 = comm.all_reduce_sum(ey2);
                [-0.5 * (ex1 + ex2), -0.5 * (ey1 + ey2), 0.0]
            }
            _ => {
                let mut sums = [0.0f64; 3];
                let mut counts = [0.0f64; 3];
                for p in &self.patches {
                    for (c, f) in [&p.em.ex, &p.em.ey, &p.em.ez].into_iter().enumerate() {
                        let mut start = [0usize; 3];
                        let mut extent = [1usize; 3];
                        for a in 0..3 {
                            start[a] = f.oversize[a];
                            extent[a] = f.dims[a] - 2 * f.oversize[a];
                        }
                        for i in start[0]..start[0] + extent[0] {
                            for j in start[1]..start[1] + extent[1] {
                                for k in start[2]..start[2] + extent[2] {
                                    sums[c] += f.at(i, j, k);
                                    counts[c] += 1.0;
                                }
                            }
                        }
                    }
                }
                let sums = comm.all_reduce_sum_vec(&sums);
                let counts = comm.all_reduce_sum_vec(&counts);
                [
                    -sums[0] / counts[0],
                    -sums[1] / counts[1],
                    -sums[2] / counts[2],
                ]
            }
        };
        offset.map(|v| if v.is_finite() { v } else { 0.0 })
    }

    /// Moving-window phase: shift, refill the inlet, re-home the shifted
    /// particles and refresh the field ghosts.
    pub fn moving_window(
        &mut self,
        comm: &mut Communicator,
        time_dual: f64,
        step: usize,
    ) -> Result<(), Error> {
        let Some(window) = &mut self.window else {
            return Ok(());
        };
        let n_cells = window.advance(time_dual, &self.params);
        if n_cells == 0 {
            return Ok(());
        }
        let window = self.window.clone().unwrap();
        let params = &self.params;
        self.patches
            .par_iter_mut()
            .for_each(|p| window.shift_patch(p, params, n_cells, step));

        self.exchange_particles(comm)?;
        self.finalize_and_sort_particles(step);

        let mut sels = sync::e_fields();
        sels.extend(sync::b_fields());
        sels.extend(sync::b_centered_fields());
        let ctx = make_ctx(&self.params, &self.owners, comm);
        sync::exchange(&sels, &mut self.patches, comm, &ctx)?;
        Ok(())
    }

    /// Periodic balance phase: new counts, then patch migration.
    pub fn load_balance(
        &mut self,
        comm: &mut Communicator,
        time_dual: f64,
    ) -> Result<(), Error> {
        let new_owners = balance::recompute_patch_count(
            &self.patches,
            &self.params,
            &self.owners,
            comm,
            time_dual,
        )?;
        if new_owners.patch_count == self.owners.patch_count {
            return Ok(());
        }
        if comm.is_master() {
            info!(counts = ?new_owners.patch_count, "rebalancing patches");
        }
        let patches = std::mem::take(&mut self.patches);
        self.patches = migrate::exchange_patches(patches, &self.owners, &new_owners, comm)?;
        self.owners = new_owners;
        Ok(())
    }

    /// Sanity scan of the hot state, on a coarse cadence.
    pub fn check_finite(&self, step: usize) -> Result<(), Error> {
        for p in &self.patches {
            p.check_finite(step)?;
        }
        Ok(())
    }

    /// Global particle count, for the scalar diagnostics.
    pub fn particle_counts(&self) -> Vec<f64> {
        let mut counts = vec![0.0; self.params.species.len()];
        for p in &self.patches {
            for (i, sp) in p.species.iter().enumerate() {
                counts[i] += sp
                    .particles
                    .weight
                    .iter()
                    .filter(|&&w| w != 0.0)
                    .count() as f64;
            }
        }
        counts
    }
}

fn make_ctx<'a>(
    params: &'a SimParams,
    owners: &'a OwnerTable,
    comm: &Communicator,
) -> SyncCtx<'a> {
    SyncCtx {
        params,
        owners,
        rank: comm.rank(),
        first: owners.first_of(comm.rank()),
    }
}
