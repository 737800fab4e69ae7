//! Field boundary conditions on the external faces of the global box.
//!
//! Periodic axes never construct a BC object: the neighbor table wraps
//! instead. The conditions below write the outermost samples that the
//! Faraday loops leave untouched.

use serde::{Deserialize, Serialize};

use larmor_core::SimParams;
use larmor_core::config::EmBoundary;

use crate::em::EmFields;
use crate::laser::Laser;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldBc {
    SilverMuller(SilverMullerBc),
    Reflective(ReflectiveBc),
}

impl FieldBc {
    /// Build the BC set for a patch from the faces it exposes to the
    /// global box edge. `on_edge[axis][side]` marks exposure.
    pub fn for_patch(
        params: &SimParams,
        on_edge: [[bool; 2]; 3],
        lasers: &[Laser],
    ) -> Vec<FieldBc> {
        let mut bcs = Vec::new();
        for axis in 0..params.ndim {
            for side in 0..2 {
                if !on_edge[axis][side] {
                    continue;
                }
                match params.em_bc[axis][side] {
                    EmBoundary::Periodic => {}
                    EmBoundary::SilverMuller => {
                        let attached = if axis == 0 {
                            lasers
                                .iter()
                                .filter(|l| l.params.side == side)
                                .cloned()
                                .collect()
                        } else {
                            Vec::new()
                        };
                        bcs.push(FieldBc::SilverMuller(SilverMullerBc::new(
                            params, axis, side, attached,
                        )));
                    }
                    EmBoundary::Reflective => {
                        bcs.push(FieldBc::Reflective(ReflectiveBc { axis, side }));
                    }
                }
            }
        }
        bcs
    }

    pub fn apply(&mut self, em: &mut EmFields, params: &SimParams, patch_min: [f64; 3], time_dual: f64) {
        match self {
            FieldBc::SilverMuller(bc) => bc.apply(em, params, patch_min, time_dual),
            FieldBc::Reflective(bc) => bc.apply(em),
        }
    }

}

/// First-order absorbing condition. The incoming characteristic is set to
/// the laser source (zero without one); the coefficients follow from the
/// ratio dt/dx on the boundary axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilverMullerBc {
    pub axis: usize,
    pub side: usize,
    alpha: f64,
    beta: f64,
    gamma: f64,
    delta: f64,
    pub lasers: Vec<Laser>,
}

impl SilverMullerBc {
    pub fn new(params: &SimParams, axis: usize, side: usize, lasers: Vec<Laser>) -> Self {
        let dt_ov_d = params.timestep / params.cell_length[axis];
        let transverse = if params.ndim > 1 && axis == 0 {
            params.timestep / params.cell_length[1]
        } else {
            0.0
        };
        Self {
            axis,
            side,
            alpha: 2.0 / (1.0 + dt_ov_d),
            beta: (dt_ov_d - 1.0) / (1.0 + dt_ov_d),
            gamma: 4.0 / (1.0 + dt_ov_d),
            delta: transverse / (1.0 + dt_ov_d),
            lasers,
        }
    }

    fn apply(&self, em: &mut EmFields, params: &SimParams, patch_min: [f64; 3], time_dual: f64) {
        match self.axis {
            0 => self.apply_x(em, params, patch_min, time_dual),
            1 => self.apply_y(em),
            _ => self.apply_z(em),
        }
    }

    fn apply_x(&self, em: &mut EmFields, params: &SimParams, patch_min: [f64; 3], time_dual: f64) {
        let (alpha, beta, gamma, delta) = (self.alpha, self.beta, self.gamma, self.delta);
        let sgn = if self.side == 0 { 1.0 } else { -1.0 };
        let nx_d = em.by.dims[0];
        let nx_p = em.ey.dims[0];
        let (ib, ib_in, ie) = if self.side == 0 {
            (0, 1, 0)
        } else {
            (nx_d - 1, nx_d - 2, nx_p - 1)
        };

        let ny = em.by.dims[1];
        let nz = em.by.dims[2];
        for j in 0..ny {
            for k in 0..nz {
                // transverse position of this boundary sample
                let mut pos = [0.0f64; 2];
                if params.ndim >= 2 {
                    pos[0] = patch_min[1]
                        + (j as f64 - params.oversize[1] as f64) * params.cell_length[1];
                }
                if params.ndim == 3 {
                    pos[1] = patch_min[2]
                        + (k as f64 - params.oversize[2] as f64) * params.cell_length[2];
                }
                let ndim_t = params.ndim - 1;
                let mut by_src = 0.0;
                let mut bz_src = 0.0;
                for laser in &self.lasers {
                    by_src += laser.amplitude_by(&pos[..ndim_t], time_dual);
                    bz_src += laser.amplitude_bz(&pos[..ndim_t], time_dual);
                }

                let oblique = if params.ndim >= 2 && j + 1 < em.bx.dims[1] {
                    delta * (em.bx.at(ie, j + 1, k) - em.bx.at(ie, j, k))
                } else {
                    0.0
                };

                let by = sgn * alpha * em.ez.at(ie, j, k)
                    + beta * em.by.at(ib_in, j, k)
                    + gamma * by_src
                    + sgn * oblique;
                let bz = -sgn * alpha * em.ey.at(ie, j, k)
                    + beta * em.bz.at(ib_in, j, k)
                    + gamma * bz_src;
                *em.by.at_mut(ib, j, k) = by;
                *em.bz.at_mut(ib, j, k) = bz;
            }
        }
    }

    fn apply_y(&self, em: &mut EmFields) {
        let (alpha, beta) = (self.alpha, self.beta);
        let sgn = if self.side == 0 { 1.0 } else { -1.0 };
        let ny_d = em.bx.dims[1];
        let ny_p = em.ex.dims[1];
        let (jb, jb_in, je) = if self.side == 0 {
            (0, 1, 0)
        } else {
            (ny_d - 1, ny_d - 2, ny_p - 1)
        };
        for i in 0..em.bx.dims[0] {
            for k in 0..em.bx.dims[2] {
                *em.bx.at_mut(i, jb, k) =
                    -sgn * alpha * em.ez.at(i, je, k) + beta * em.bx.at(i, jb_in, k);
            }
        }
        for i in 0..em.bz.dims[0] {
            for k in 0..em.bz.dims[2] {
                *em.bz.at_mut(i, jb, k) =
                    sgn * alpha * em.ex.at(i, je, k) + beta * em.bz.at(i, jb_in, k);
            }
        }
    }

    fn apply_z(&self, em: &mut EmFields) {
        let (alpha, beta) = (self.alpha, self.beta);
        let sgn = if self.side == 0 { 1.0 } else { -1.0 };
        let nz_d = em.bx.dims[2];
        let nz_p = em.ex.dims[2];
        let (kb, kb_in, ke) = if self.side == 0 {
            (0, 1, 0)
        } else {
            (nz_d - 1, nz_d - 2, nz_p - 1)
        };
        for i in 0..em.bx.dims[0] {
            for j in 0..em.bx.dims[1] {
                *em.bx.at_mut(i, j, kb) =
                    sgn * alpha * em.ey.at(i, j, ke) + beta * em.bx.at(i, j, kb_in);
            }
        }
        for i in 0..em.by.dims[0] {
            for j in 0..em.by.dims[1] {
                *em.by.at_mut(i, j, kb) =
                    -sgn * alpha * em.ex.at(i, j, ke) + beta * em.by.at(i, j, kb_in);
            }
        }
    }
}

/// Perfect conductor: tangential B ghost layers mirror the first interior
/// sample, the normal component vanishes on the wall. Applying it twice is
/// the same as applying it once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReflectiveBc {
    pub axis: usize,
    pub side: usize,
}

impl ReflectiveBc {
    fn apply(&self, em: &mut EmFields) {
        let (axis, side) = (self.axis, self.side);
        match axis {
            0 => {
                copy_edge_layers(&mut em.by, axis, side);
                copy_edge_layers(&mut em.bz, axis, side);
                zero_edge_layers(&mut em.bx, axis, side);
            }
            1 => {
                copy_edge_layers(&mut em.bx, axis, side);
                copy_edge_layers(&mut em.bz, axis, side);
                zero_edge_layers(&mut em.by, axis, side);
            }
            _ => {
                copy_edge_layers(&mut em.bx, axis, side);
                copy_edge_layers(&mut em.by, axis, side);
                zero_edge_layers(&mut em.bz, axis, side);
            }
        }
    }
}

fn copy_edge_layers(f: &mut crate::field::Field, axis: usize, side: usize) {
    let ov = f.oversize[axis];
    let n = f.dims[axis];
    let (src, ghosts): (usize, Vec<usize>) = if side == 0 {
        (ov, (0..ov).collect())
    } else {
        (n - 1 - ov, (n - ov..n).collect())
    };
    for g in ghosts {
        copy_plane(f, axis, src, g);
    }
}

fn zero_edge_layers(f: &mut crate::field::Field, axis: usize, side: usize) {
    let ov = f.oversize[axis];
    let n = f.dims[axis];
    let range: Vec<usize> = if side == 0 {
        (0..=ov).collect()
    } else {
        (n - 1 - ov..n).collect()
    };
    for g in range {
        set_plane(f, axis, g, 0.0);
    }
}

fn copy_plane(f: &mut crate::field::Field, axis: usize, src: usize, dst: usize) {
    let dims = f.dims;
    let mut idx = [0usize; 3];
    for a in 0..dims[pick(axis, 1)] {
        for b in 0..dims[pick(axis, 2)] {
            idx[pick(axis, 1)] = a;
            idx[pick(axis, 2)] = b;
            idx[axis] = src;
            let v = f.at(idx[0], idx[1], idx[2]);
            idx[axis] = dst;
            *f.at_mut(idx[0], idx[1], idx[2]) = v;
        }
    }
}

fn set_plane(f: &mut crate::field::Field, axis: usize, plane: usize, value: f64) {
    let dims = f.dims;
    let mut idx = [0usize; 3];
    for a in 0..dims[pick(axis, 1)] {
        for b in 0..dims[pick(axis, 2)] {
            idx[pick(axis, 1)] = a;
            idx[pick(axis, 2)] = b;
            idx[axis] = plane;
            *f.at_mut(idx[0], idx[1], idx[2]) = value;
        }
    }
}

// the two axes other than `axis`, in order
fn pick(axis: usize, which: usize) -> usize {
    match (axis, which) {
        (0, 1) => 1,
        (0, 2) => 2,
        (1, 1) => 0,
        (1, 2) => 2,
        (2, 1) => 0,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::{Namelist, SimParams};

    fn params_1d_sm() -> SimParams {
        let deck: Namelist = toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.1]
            grid_length = [1.6]
            timestep = 0.05
            simulation_time = 1.0
            number_of_patches = [1]
            em_boundary_conditions = [["silver-muller", "silver-muller"]]
            "#,
        )
        .unwrap();
        SimParams::resolve(&deck, 1).unwrap()
    }

    #[test]
    fn reflective_is_idempotent() {
        let params = params_1d_sm();
        let mut em = EmFields::new(&params, 0);
        for i in 0..em.by.dims[0] {
            *em.by.at_mut(i, 0, 0) = i as f64 + 1.0;
            *em.bz.at_mut(i, 0, 0) = 2.0 * i as f64 + 1.0;
        }
        let mut bc = FieldBc::Reflective(ReflectiveBc { axis: 0, side: 0 });
        bc.apply(&mut em, &params, [0.0; 3], 0.0);
        let once_by: Vec<f64> = em.by.data().to_vec();
        let once_bz: Vec<f64> = em.bz.data().to_vec();
        bc.apply(&mut em, &params, [0.0; 3], 0.0);
        assert_eq!(em.by.data(), &once_by[..]);
        assert_eq!(em.bz.data(), &once_bz[..]);
    }

    #[test]
    fn silver_muller_passes_outgoing_wave() {
        // A sampled right-moving wave (Ey = Bz) must satisfy the xmax
        // update identically: the condition only removes incoming waves.
        let params = params_1d_sm();
        let mut em = EmFields::new(&params, 0);
        let amp = 0.7;
        em.ey.put_to(amp);
        em.bz.put_to(amp);
        let mut bc = FieldBc::SilverMuller(SilverMullerBc::new(&params, 0, 1, Vec::new()));
        bc.apply(&mut em, &params, [0.0; 3], 0.0);
        let nx_d = em.bz.dims[0];
        assert!((em.bz.at(nx_d - 1, 0, 0) - amp).abs() < 1e-12);
    }
}
