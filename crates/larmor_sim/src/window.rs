//! Moving window: once the window velocity has accumulated a whole cell,
//! every patch shifts its fields and particles backwards along x, fresh
//! plasma is loaded into the cells entering at xmax, and whatever falls
//! off the trailing edge is tallied as carried-out energy.

use serde::{Deserialize, Serialize};

use larmor_core::SimParams;
use larmor_core::rng::patch_rng;

use crate::patch::Patch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingWindow {
    pub time_start: f64,
    pub velocity: f64,
    /// Total cells the window has advanced since t = 0
    pub cells_moved: usize,
    residual: f64,
}

impl MovingWindow {
    pub fn new(time_start: f64, velocity: f64) -> Self {
        Self {
            time_start,
            velocity,
            cells_moved: 0,
            residual: 0.0,
        }
    }

    /// Whole cells to shift this step (usually 0).
    pub fn advance(&mut self, time_dual: f64, params: &SimParams) -> usize {
        if time_dual < self.time_start {
            return 0;
        }
        self.residual += self.velocity * params.timestep;
        let dx = params.cell_length[0];
        let n = (self.residual / dx).floor() as usize;
        if n > 0 {
            self.residual -= n as f64 * dx;
            self.cells_moved += n;
        }
        n
    }

    /// Shift one patch by `n_cells` and refill the inlet column on the
    /// patches touching xmax. Particle positions move with the grid; the
    /// trailing ones are dropped and their energy booked as window loss.
    pub fn shift_patch(&self, patch: &mut Patch, params: &SimParams, n_cells: usize, step: usize) {
        let shift = n_cells as f64 * params.cell_length[0];
        patch.em.shift_x(n_cells);

        for sp in &mut patch.species {
            let particles = &mut sp.particles;
            for i in 0..particles.len() {
                if particles.weight[i] == 0.0 {
                    continue;
                }
                particles.position[0][i] -= shift;
                if patch.env.on_edge[0][0] && particles.position[0][i] < patch.env.global_min[0] {
                    sp.nrj_mw_lost +=
                        larmor_particles::boundary::particle_energy(particles, i, &sp.params);
                    particles.weight[i] = 0.0;
                    particles.charge[i] = 0;
                }
            }
        }

        if patch.env.on_edge[0][1] {
            // fresh plasma enters through the right face
            let mut rng = patch_rng(params.seed, patch.hindex, (step as u64) | (1 << 48));
            let inlet = params.n_space[0] - n_cells..params.n_space[0];
            let env = patch.env;
            for sp in &mut patch.species {
                sp.create_particles(params, &env, inlet.clone(), patch.hindex, &mut rng);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::Namelist;

    #[test]
    fn advance_accumulates_fractional_cells() {
        let deck: Namelist = toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.1]
            grid_length = [1.6]
            timestep = 0.08
            simulation_time = 10.0
            number_of_patches = [1]
            em_boundary_conditions = [["silver-muller", "silver-muller"]]
            "#,
        )
        .unwrap();
        let params = larmor_core::SimParams::resolve(&deck, 1).unwrap();
        let mut window = MovingWindow::new(0.0, 1.0);
        // v dt = 0.08 per step against dx = 0.1
        let mut per_step_max = 0;
        for s in 0..100 {
            let n = window.advance(s as f64 * params.timestep, &params);
            per_step_max = per_step_max.max(n);
        }
        // never more than one cell at a time, and the total tracks v t / dx
        assert!(per_step_max <= 1);
        let expect = 100.0 * params.timestep * 1.0 / params.cell_length[0];
        assert!((window.cells_moved as f64 - expect).abs() <= 1.0);
    }
}
