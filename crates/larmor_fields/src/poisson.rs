//! Per-patch pieces of the conjugate-gradient Poisson solve used to build
//! the initial electrostatic field from a non-neutral charge density.
//! Inner products are reduced across ranks by the orchestrator; the ghost
//! layers of the direction field `p` are exchanged between iterations.

use serde::{Deserialize, Serialize};

use larmor_core::SimParams;

use crate::em::EmFields;
use crate::field::{Field, FieldKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoissonScratch {
    pub phi: Field,
    pub residual: Field,
    /// CG search direction; its ghosts must be current before `compute_ap`
    pub direction: Field,
    pub ap: Field,
    ndim: usize,
    inv_d2: [f64; 3],
}

impl PoissonScratch {
    pub fn new(params: &SimParams) -> Self {
        let mk = |n| Field::new(FieldKind::Scratch(n), params.ndim, params.n_space, params.oversize);
        let mut inv_d2 = [0.0; 3];
        for i in 0..params.ndim {
            inv_d2[i] = 1.0 / (params.cell_length[i] * params.cell_length[i]);
        }
        Self {
            phi: mk(0),
            residual: mk(1),
            direction: mk(2),
            ap: mk(3),
            ndim: params.ndim,
            inv_d2,
        }
    }

    /// phi = 0, r = rho, p = r. Assumes rho ghosts have been summed.
    pub fn init(&mut self, em: &EmFields) {
        self.phi.put_to(0.0);
        self.residual.data_mut().copy_from_slice(em.rho.data());
        self.direction
            .data_mut()
            .copy_from_slice(self.residual.data());
    }

    /// Local contribution to r.r over the interior samples.
    pub fn r_dot_r(&self) -> f64 {
        self.residual.norm2_interior()
    }

    /// Ap = -Laplacian(p) on interior samples.
    pub fn compute_ap(&mut self) {
        let dims = self.direction.dims;
        let ov = self.direction.oversize;
        let ndim = self.ndim;
        let strides = [dims[1] * dims[2], dims[2], 1];
        let p = self.direction.data();
        let ap = self.ap.data_mut();
        let lo = |a: usize| if a < ndim { ov[a] } else { 0 };
        let hi = |a: usize| if a < ndim { dims[a] - ov[a] } else { dims[a] };
        for i in lo(0)..hi(0) {
            for j in lo(1)..hi(1) {
                for k in lo(2)..hi(2) {
                    let idx = (i * dims[1] + j) * dims[2] + k;
                    let mut acc = 0.0;
                    for a in 0..ndim {
                        acc += self.inv_d2[a]
                            * (2.0 * p[idx] - p[idx - strides[a]] - p[idx + strides[a]]);
                    }
                    ap[idx] = acc;
                }
            }
        }
    }

    /// Local contribution to p.Ap over the interior samples.
    pub fn p_dot_ap(&self) -> f64 {
        let dims = self.direction.dims;
        let ov = self.direction.oversize;
        let ndim = self.ndim;
        let mut acc = 0.0;
        let lo = |a: usize| if a < ndim { ov[a] } else { 0 };
        let hi = |a: usize| if a < ndim { dims[a] - ov[a] } else { dims[a] };
        let p = self.direction.data();
        let ap = self.ap.data();
        for i in lo(0)..hi(0) {
            for j in lo(1)..hi(1) {
                for k in lo(2)..hi(2) {
                    let idx = (i * dims[1] + j) * dims[2] + k;
                    acc += p[idx] * ap[idx];
                }
            }
        }
        acc
    }

    /// phi += alpha p ; r -= alpha Ap, with alpha = r.r / p.Ap.
    pub fn update_phi_and_r(&mut self, r_dot_r: f64, p_dot_ap: f64) {
        let alpha = r_dot_r / p_dot_ap;
        for ((phi, r), (p, ap)) in self
            .phi
            .data_mut()
            .iter_mut()
            .zip(self.residual.data_mut())
            .zip(self.direction.data().iter().zip(self.ap.data()))
        {
            *phi += alpha * p;
            *r -= alpha * ap;
        }
    }

    /// p = r + beta p, with beta = r_new.r_new / r_old.r_old.
    pub fn update_p(&mut self, rnew_dot_rnew: f64, rold_dot_rold: f64) {
        let beta = rnew_dot_rnew / rold_dot_rold;
        for (p, r) in self
            .direction
            .data_mut()
            .iter_mut()
            .zip(self.residual.data())
        {
            *p = r + beta * *p;
        }
    }

    /// Reconstruct E = -grad(phi) on the dual-staggered E samples.
    pub fn init_e(&self, em: &mut EmFields, params: &SimParams) {
        let phi = &self.phi;
        let dx = params.cell_length;
        for i in 1..em.ex.dims[0] {
            for j in 0..em.ex.dims[1] {
                for k in 0..em.ex.dims[2] {
                    *em.ex.at_mut(i, j, k) = (phi.at(i - 1, j, k) - phi.at(i, j, k)) / dx[0];
                }
            }
        }
        if self.ndim >= 2 {
            for i in 0..em.ey.dims[0] {
                for j in 1..em.ey.dims[1] {
                    for k in 0..em.ey.dims[2] {
                        *em.ey.at_mut(i, j, k) = (phi.at(i, j - 1, k) - phi.at(i, j, k)) / dx[1];
                    }
                }
            }
        }
        if self.ndim == 3 {
            for i in 0..em.ez.dims[0] {
                for j in 0..em.ez.dims[1] {
                    for k in 1..em.ez.dims[2] {
                        *em.ez.at_mut(i, j, k) = (phi.at(i, j, k - 1) - phi.at(i, j, k)) / dx[2];
                    }
                }
            }
        }
    }
}

/// Remove the global additive constant from the reconstructed E.
pub fn center_e(em: &mut EmFields, e_add: [f64; 3]) {
    for (field, add) in [
        (&mut em.ex, e_add[0]),
        (&mut em.ey, e_add[1]),
        (&mut em.ez, e_add[2]),
    ] {
        if add != 0.0 {
            for v in field.data_mut() {
                *v += add;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::Namelist;

    fn params_1d() -> SimParams {
        let deck: Namelist = toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.5]
            grid_length = [32.0]
            timestep = 0.2
            simulation_time = 1.0
            number_of_patches = [1]
            em_boundary_conditions = [["periodic", "periodic"]]
            "#,
        )
        .unwrap();
        SimParams::resolve(&deck, 1).unwrap()
    }

    // single-patch periodic ghost refresh for the CG direction field
    fn wrap_ghosts(f: &mut Field, n: usize, ov: usize) {
        for g in 0..ov {
            let v = f.at(n + g, 0, 0);
            *f.at_mut(g, 0, 0) = v;
            let v = f.at(ov + 1 + g, 0, 0);
            *f.at_mut(n + ov + 1 + g, 0, 0) = v;
        }
    }

    #[test]
    fn cg_solves_a_sine_charge_density() {
        // For rho = sin(kx), the solution of -lap(phi) = rho is
        // phi = sin(kx)/k_eff^2 with the discrete k_eff.
        let params = params_1d();
        let n = params.n_space[0];
        let ov = params.oversize[0];
        let dx = params.cell_length[0];
        let k = 2.0 * std::f64::consts::PI / params.grid_length[0];

        let mut em = EmFields::new(&params, 0);
        for i in 0..em.rho.dims[0] {
            let x = (i as f64 - ov as f64) * dx;
            *em.rho.at_mut(i, 0, 0) = (k * x).sin();
        }

        let mut cg = PoissonScratch::new(&params);
        cg.init(&em);
        let mut rr = cg.r_dot_r();
        for _ in 0..300 {
            wrap_ghosts(&mut cg.direction, n, ov);
            cg.compute_ap();
            let pap = cg.p_dot_ap();
            cg.update_phi_and_r(rr, pap);
            let rr_new = cg.r_dot_r();
            if rr_new / (n as f64) < 1e-20 {
                break;
            }
            cg.update_p(rr_new, rr);
            rr = rr_new;
        }

        // discrete eigenvalue of the 3-point Laplacian
        let k_eff2 = (2.0 - 2.0 * (k * dx).cos()) / (dx * dx);
        for i in ov..ov + n {
            let x = (i as f64 - ov as f64) * dx;
            let expect = (k * x).sin() / k_eff2;
            assert!(
                (cg.phi.at(i, 0, 0) - expect).abs() < 1e-8,
                "phi mismatch at node {i}"
            );
        }
    }
}
