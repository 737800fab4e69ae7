//! Yee-scheme Maxwell updates. One monomorphic loop nest per
//! dimensionality; the dispatch happens once at construction.

use serde::{Deserialize, Serialize};

use larmor_core::SimParams;

use crate::em::EmFields;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaxwellSolver {
    ndim: usize,
    dt: f64,
    dt_ov_d: [f64; 3],
}

impl MaxwellSolver {
    pub fn new(params: &SimParams) -> Self {
        let mut dt_ov_d = [0.0; 3];
        for i in 0..params.ndim {
            dt_ov_d[i] = params.timestep / params.cell_length[i];
        }
        Self {
            ndim: params.ndim,
            dt: params.timestep,
            dt_ov_d,
        }
    }

    /// Ampere step: E^{n+1} from E^n, B^{n+1/2} and J^{n+1/2}.
    pub fn ampere(&self, em: &mut EmFields) {
        match self.ndim {
            1 => self.ampere_1d(em),
            2 => self.ampere_2d(em),
            _ => self.ampere_3d(em),
        }
    }

    /// Faraday step: B^{n+3/2} from B^{n+1/2} and E^{n+1}.
    pub fn faraday(&self, em: &mut EmFields) {
        match self.ndim {
            1 => self.faraday_1d(em),
            2 => self.faraday_2d(em),
            _ => self.faraday_3d(em),
        }
    }

    fn ampere_1d(&self, em: &mut EmFields) {
        let dt = self.dt;
        let dtdx = self.dt_ov_d[0];
        let nx_p = em.ey.dims[0];

        for i in 0..em.ex.dims[0] {
            *em.ex.at_mut(i, 0, 0) -= dt * em.jx.at(i, 0, 0);
        }
        // dual node i sits half a cell below primal node i
        for i in 0..nx_p {
            *em.ey.at_mut(i, 0, 0) +=
                -dt * em.jy.at(i, 0, 0) - dtdx * (em.bz.at(i + 1, 0, 0) - em.bz.at(i, 0, 0));
            *em.ez.at_mut(i, 0, 0) +=
                -dt * em.jz.at(i, 0, 0) + dtdx * (em.by.at(i + 1, 0, 0) - em.by.at(i, 0, 0));
        }
    }

    fn faraday_1d(&self, em: &mut EmFields) {
        let dtdx = self.dt_ov_d[0];
        let nx_d = em.by.dims[0];
        for i in 1..nx_d - 1 {
            *em.by.at_mut(i, 0, 0) += dtdx * (em.ez.at(i, 0, 0) - em.ez.at(i - 1, 0, 0));
            *em.bz.at_mut(i, 0, 0) -= dtdx * (em.ey.at(i, 0, 0) - em.ey.at(i - 1, 0, 0));
        }
    }

    fn ampere_2d(&self, em: &mut EmFields) {
        let dt = self.dt;
        let dtdx = self.dt_ov_d[0];
        let dtdy = self.dt_ov_d[1];

        // Ex (d,p): dEx/dt = dBz/dy - Jx
        for i in 0..em.ex.dims[0] {
            for j in 0..em.ex.dims[1] - 1 {
                *em.ex.at_mut(i, j, 0) += -dt * em.jx.at(i, j, 0)
                    + dtdy * (em.bz.at(i, j + 1, 0) - em.bz.at(i, j, 0));
            }
        }
        // Ey (p,d): dEy/dt = -dBz/dx - Jy
        for i in 0..em.ey.dims[0] - 1 {
            for j in 0..em.ey.dims[1] {
                *em.ey.at_mut(i, j, 0) += -dt * em.jy.at(i, j, 0)
                    - dtdx * (em.bz.at(i + 1, j, 0) - em.bz.at(i, j, 0));
            }
        }
        // Ez (p,p): dEz/dt = dBy/dx - dBx/dy - Jz
        for i in 0..em.ez.dims[0] - 1 {
            for j in 0..em.ez.dims[1] - 1 {
                *em.ez.at_mut(i, j, 0) += -dt * em.jz.at(i, j, 0)
                    + dtdx * (em.by.at(i + 1, j, 0) - em.by.at(i, j, 0))
                    - dtdy * (em.bx.at(i, j + 1, 0) - em.bx.at(i, j, 0));
            }
        }
    }

    fn faraday_2d(&self, em: &mut EmFields) {
        let dtdx = self.dt_ov_d[0];
        let dtdy = self.dt_ov_d[1];

        // Bx (p,d): dBx/dt = -dEz/dy
        for i in 0..em.bx.dims[0] {
            for j in 1..em.bx.dims[1] - 1 {
                *em.bx.at_mut(i, j, 0) -= dtdy * (em.ez.at(i, j, 0) - em.ez.at(i, j - 1, 0));
            }
        }
        // By (d,p): dBy/dt = dEz/dx
        for i in 1..em.by.dims[0] - 1 {
            for j in 0..em.by.dims[1] {
                *em.by.at_mut(i, j, 0) += dtdx * (em.ez.at(i, j, 0) - em.ez.at(i - 1, j, 0));
            }
        }
        // Bz (d,d): dBz/dt = dEx/dy - dEy/dx
        for i in 1..em.bz.dims[0] - 1 {
            for j in 1..em.bz.dims[1] - 1 {
                *em.bz.at_mut(i, j, 0) += dtdy * (em.ex.at(i, j, 0) - em.ex.at(i, j - 1, 0))
                    - dtdx * (em.ey.at(i, j, 0) - em.ey.at(i - 1, j, 0));
            }
        }
    }

    fn ampere_3d(&self, em: &mut EmFields) {
        let dt = self.dt;
        let dtdx = self.dt_ov_d[0];
        let dtdy = self.dt_ov_d[1];
        let dtdz = self.dt_ov_d[2];

        // Ex (d,p,p)
        for i in 0..em.ex.dims[0] {
            for j in 0..em.ex.dims[1] - 1 {
                for k in 0..em.ex.dims[2] - 1 {
                    *em.ex.at_mut(i, j, k) += -dt * em.jx.at(i, j, k)
                        + dtdy * (em.bz.at(i, j + 1, k) - em.bz.at(i, j, k))
                        - dtdz * (em.by.at(i, j, k + 1) - em.by.at(i, j, k));
                }
            }
        }
        // Ey (p,d,p)
        for i in 0..em.ey.dims[0] - 1 {
            for j in 0..em.ey.dims[1] {
                for k in 0..em.ey.dims[2] - 1 {
                    *em.ey.at_mut(i, j, k) += -dt * em.jy.at(i, j, k)
                        - dtdx * (em.bz.at(i + 1, j, k) - em.bz.at(i, j, k))
                        + dtdz * (em.bx.at(i, j, k + 1) - em.bx.at(i, j, k));
                }
            }
        }
        // Ez (p,p,d)
        for i in 0..em.ez.dims[0] - 1 {
            for j in 0..em.ez.dims[1] - 1 {
                for k in 0..em.ez.dims[2] {
                    *em.ez.at_mut(i, j, k) += -dt * em.jz.at(i, j, k)
                        + dtdx * (em.by.at(i + 1, j, k) - em.by.at(i, j, k))
                        - dtdy * (em.bx.at(i, j + 1, k) - em.bx.at(i, j, k));
                }
            }
        }
    }

    fn faraday_3d(&self, em: &mut EmFields) {
        let dtdx = self.dt_ov_d[0];
        let dtdy = self.dt_ov_d[1];
        let dtdz = self.dt_ov_d[2];

        // Bx (p,d,d)
        for i in 0..em.bx.dims[0] {
            for j in 1..em.bx.dims[1] - 1 {
                for k in 1..em.bx.dims[2] - 1 {
                    *em.bx.at_mut(i, j, k) += -dtdy * (em.ez.at(i, j, k) - em.ez.at(i, j - 1, k))
                        + dtdz * (em.ey.at(i, j, k) - em.ey.at(i, j, k - 1));
                }
            }
        }
        // By (d,p,d)
        for i in 1..em.by.dims[0] - 1 {
            for j in 0..em.by.dims[1] {
                for k in 1..em.by.dims[2] - 1 {
                    *em.by.at_mut(i, j, k) += dtdx * (em.ez.at(i, j, k) - em.ez.at(i - 1, j, k))
                        - dtdz * (em.ex.at(i, j, k) - em.ex.at(i, j, k - 1));
                }
            }
        }
        // Bz (d,d,p)
        for i in 1..em.bz.dims[0] - 1 {
            for j in 1..em.bz.dims[1] - 1 {
                for k in 0..em.bz.dims[2] {
                    *em.bz.at_mut(i, j, k) += dtdy * (em.ex.at(i, j, k) - em.ex.at(i, j - 1, k))
                        - dtdx * (em.ey.at(i, j, k) - em.ey.at(i - 1, j, k));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::{Namelist, SimParams};

    fn params_1d() -> SimParams {
        let deck: Namelist = toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.1]
            grid_length = [1.6]
            timestep = 0.05
            simulation_time = 1.0
            number_of_patches = [1]
            em_boundary_conditions = [["periodic", "periodic"]]
            "#,
        )
        .unwrap();
        SimParams::resolve(&deck, 1).unwrap()
    }

    #[test]
    fn vacuum_fields_stay_zero() {
        let params = params_1d();
        let solver = MaxwellSolver::new(&params);
        let mut em = EmFields::new(&params, 0);
        solver.ampere(&mut em);
        solver.faraday(&mut em);
        assert!(em.ex.data().iter().all(|&v| v == 0.0));
        assert!(em.bz.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn uniform_current_drives_ex_linearly() {
        let params = params_1d();
        let solver = MaxwellSolver::new(&params);
        let mut em = EmFields::new(&params, 0);
        em.jx.put_to(2.0);
        solver.ampere(&mut em);
        // dEx/dt = -Jx with no curl in 1D
        for &v in em.ex.data() {
            assert!((v + params.timestep * 2.0).abs() < 1e-15);
        }
    }

    #[test]
    fn plane_wave_faraday_consistency() {
        // A uniform Ey must leave B untouched; a linear Ey ramp in x must
        // drive dBz/dt = -dEy/dx uniformly.
        let params = params_1d();
        let solver = MaxwellSolver::new(&params);
        let mut em = EmFields::new(&params, 0);
        for i in 0..em.ey.dims[0] {
            *em.ey.at_mut(i, 0, 0) = 3.0 * i as f64 * params.cell_length[0];
        }
        solver.faraday(&mut em);
        let dtdx = params.timestep / params.cell_length[0];
        for i in 1..em.bz.dims[0] - 1 {
            let expect = -dtdx * 3.0 * params.cell_length[0];
            assert!((em.bz.at(i, 0, 0) - expect).abs() < 1e-12);
        }
    }
}
