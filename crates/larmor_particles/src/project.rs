//! Particle-to-grid current deposition (Esirkepov scheme).
//!
//! The longitudinal currents come from a prefix sum over the difference of
//! old and new shape functions, which closes the discrete continuity
//! equation to rounding error against the Yee divergence. Transverse
//! currents use the time-averaged shape. The old (index, residual) pairs
//! are the ones the interpolator recorded before the push.

use larmor_core::SimParams;
use larmor_fields::field::Field;

use crate::interp::{coeffs_order2, coeffs_order4};
use crate::particles::Particles;

// widest stencil: 5-point shape + 2 shift slots
const NS_MAX: usize = 7;

#[derive(Debug, Clone)]
pub struct Projector {
    ndim: usize,
    support: usize,
    dx_inv: [f64; 3],
    /// q w dx/dt factors per axis
    d_ov_dt: [f64; 3],
    oversize: [usize; 3],
    domain_begin: [i64; 3],
}

impl Projector {
    pub fn new(params: &SimParams, patch_cell_begin: [i64; 3]) -> Self {
        let mut dx_inv = [0.0; 3];
        let mut d_ov_dt = [0.0; 3];
        for i in 0..params.ndim {
            dx_inv[i] = 1.0 / params.cell_length[i];
            d_ov_dt[i] = params.cell_length[i] / params.timestep;
        }
        Self {
            ndim: params.ndim,
            support: params.order as usize + 1,
            dx_inv,
            d_ov_dt,
            oversize: params.oversize,
            domain_begin: patch_cell_begin,
        }
    }

    fn shape(&self, d: f64) -> [f64; 5] {
        let mut c = [0.0; 5];
        if self.support == 3 {
            c[..3].copy_from_slice(&coeffs_order2(d));
        } else {
            c = coeffs_order4(d);
        }
        c
    }

    // old and new shapes on the common ns-node window, plus the window's
    // first array index along each axis
    fn axis_shapes(
        &self,
        particles: &Particles,
        ipart: usize,
        i_in_slice: usize,
        n: usize,
        iold: &[i32],
        delta: &[f64],
        s0: &mut [[f64; NS_MAX]; 3],
        s1: &mut [[f64; NS_MAX]; 3],
        start: &mut [usize; 3],
    ) {
        let sp = self.support;
        let half = sp / 2;
        for axis in 0..self.ndim {
            let ipo = iold[axis * n + i_in_slice] as i64;
            let d0 = delta[axis * n + i_in_slice];
            let xn = particles.position[axis][ipart] * self.dx_inv[axis]
                - self.domain_begin[axis] as f64;
            let ip = xn.round() as i64 + self.oversize[axis] as i64;
            let d1 = xn - (ip - self.oversize[axis] as i64) as f64;
            let shift = (ip - ipo) as isize;

            s0[axis] = [0.0; NS_MAX];
            s1[axis] = [0.0; NS_MAX];
            let c0 = self.shape(d0);
            let c1 = self.shape(d1);
            for k in 0..sp {
                s0[axis][k + 1] = c0[k];
                let k1 = k as isize + 1 + shift;
                debug_assert!(k1 >= 0 && (k1 as usize) < sp + 2, "particle moved too far");
                s1[axis][k1 as usize] = c1[k];
            }
            start[axis] = (ipo - half as i64 - 1) as usize;
        }
    }

    /// Esirkepov deposition of one slice of particles. `rho` is given on
    /// diagnostic steps and receives the new-position charge density.
    #[allow(clippy::too_many_arguments)]
    pub fn currents(
        &self,
        jx: &mut Field,
        jy: &mut Field,
        jz: &mut Field,
        mut rho: Option<&mut Field>,
        particles: &Particles,
        istart: usize,
        iend: usize,
        invgf: &[f64],
        iold: &[i32],
        delta: &[f64],
    ) {
        let n = iend - istart;
        let ns = self.support + 2;
        let mut s0 = [[0.0; NS_MAX]; 3];
        let mut s1 = [[0.0; NS_MAX]; 3];
        let mut start = [0usize; 3];

        for i in 0..n {
            let ipart = istart + i;
            let q = particles.charge[ipart] as f64 * particles.weight[ipart];
            if q == 0.0 {
                continue;
            }
            self.axis_shapes(particles, ipart, i, n, iold, delta, &mut s0, &mut s1, &mut start);

            match self.ndim {
                1 => self.deposit_1d(
                    jx, jy, jz, rho.as_deref_mut(), &s0, &s1, start, q, particles, ipart, invgf[i], ns,
                ),
                2 => self.deposit_2d(
                    jx, jy, jz, rho.as_deref_mut(), &s0, &s1, start, q, particles, ipart, invgf[i], ns,
                ),
                _ => self.deposit_3d(
                    jx, jy, jz, rho.as_deref_mut(), &s0, &s1, start, q, particles, ipart, invgf[i], ns,
                ),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deposit_1d(
        &self,
        jx: &mut Field,
        jy: &mut Field,
        jz: &mut Field,
        rho: Option<&mut Field>,
        s0: &[[f64; NS_MAX]; 3],
        s1: &[[f64; NS_MAX]; 3],
        start: [usize; 3],
        q: f64,
        particles: &Particles,
        ipart: usize,
        invgf: f64,
        ns: usize,
    ) {
        let crx = q * self.d_ov_dt[0];
        let cry = q * particles.momentum[1][ipart] * invgf;
        let crz = q * particles.momentum[2][ipart] * invgf;

        let mut jx_acc = 0.0;
        for k in 0..ns {
            let wl = s0[0][k] - s1[0][k];
            let wt = 0.5 * (s0[0][k] + s1[0][k]);
            let idx = start[0] + k;
            *jy.at_mut(idx, 0, 0) += cry * wt;
            *jz.at_mut(idx, 0, 0) += crz * wt;
            *jx.at_mut(idx, 0, 0) += jx_acc;
            jx_acc += crx * wl;
        }
        if let Some(rho) = rho {
            for k in 0..ns {
                *rho.at_mut(start[0] + k, 0, 0) += q * s1[0][k];
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deposit_2d(
        &self,
        jx: &mut Field,
        jy: &mut Field,
        jz: &mut Field,
        rho: Option<&mut Field>,
        s0: &[[f64; NS_MAX]; 3],
        s1: &[[f64; NS_MAX]; 3],
        start: [usize; 3],
        q: f64,
        particles: &Particles,
        ipart: usize,
        invgf: f64,
        ns: usize,
    ) {
        let crx = q * self.d_ov_dt[0];
        let cry = q * self.d_ov_dt[1];
        let crz = q * particles.momentum[2][ipart] * invgf;
        let third = 1.0 / 3.0;

        let (sx0, sy0) = (&s0[0], &s0[1]);
        let mut dsx = [0.0; NS_MAX];
        let mut dsy = [0.0; NS_MAX];
        for k in 0..ns {
            dsx[k] = s1[0][k] - s0[0][k];
            dsy[k] = s1[1][k] - s0[1][k];
        }

        // prefix sums along the longitudinal axis of each current
        let mut jx_acc = [0.0; NS_MAX];
        for i in 0..ns {
            let mut jy_acc = 0.0;
            for j in 0..ns {
                let ii = start[0] + i;
                let jj = start[1] + j;
                *jx.at_mut(ii, jj, 0) += jx_acc[j];
                *jy.at_mut(ii, jj, 0) += jy_acc;
                let wx = dsx[i] * (sy0[j] + 0.5 * dsy[j]);
                let wy = dsy[j] * (sx0[i] + 0.5 * dsx[i]);
                jx_acc[j] -= crx * wx;
                jy_acc -= cry * wy;

                let wz = sx0[i] * sy0[j]
                    + 0.5 * dsx[i] * sy0[j]
                    + 0.5 * sx0[i] * dsy[j]
                    + third * dsx[i] * dsy[j];
                *jz.at_mut(ii, jj, 0) += crz * wz;
            }
        }
        if let Some(rho) = rho {
            for i in 0..ns {
                for j in 0..ns {
                    *rho.at_mut(start[0] + i, start[1] + j, 0) += q * s1[0][i] * s1[1][j];
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn deposit_3d(
        &self,
        jx: &mut Field,
        jy: &mut Field,
        jz: &mut Field,
        rho: Option<&mut Field>,
        s0: &[[f64; NS_MAX]; 3],
        s1: &[[f64; NS_MAX]; 3],
        start: [usize; 3],
        q: f64,
        _particles: &Particles,
        _ipart: usize,
        _invgf: f64,
        ns: usize,
    ) {
        let crx = q * self.d_ov_dt[0];
        let cry = q * self.d_ov_dt[1];
        let crz = q * self.d_ov_dt[2];
        let third = 1.0 / 3.0;

        let mut dsx = [0.0; NS_MAX];
        let mut dsy = [0.0; NS_MAX];
        let mut dsz = [0.0; NS_MAX];
        for k in 0..ns {
            dsx[k] = s1[0][k] - s0[0][k];
            dsy[k] = s1[1][k] - s0[1][k];
            dsz[k] = s1[2][k] - s0[2][k];
        }
        let (sx0, sy0, sz0) = (&s0[0], &s0[1], &s0[2]);

        let mut jx_acc = [[0.0; NS_MAX]; NS_MAX];
        let mut jy_acc = [[0.0; NS_MAX]; NS_MAX];
        let mut jz_acc = [[0.0; NS_MAX]; NS_MAX];
        for i in 0..ns {
            for j in 0..ns {
                for k in 0..ns {
                    let ii = start[0] + i;
                    let jj = start[1] + j;
                    let kk = start[2] + k;
                    *jx.at_mut(ii, jj, kk) += jx_acc[j][k];
                    *jy.at_mut(ii, jj, kk) += jy_acc[i][k];
                    *jz.at_mut(ii, jj, kk) += jz_acc[i][j];

                    let tyz = sy0[j] * sz0[k]
                        + 0.5 * dsy[j] * sz0[k]
                        + 0.5 * sy0[j] * dsz[k]
                        + third * dsy[j] * dsz[k];
                    let txz = sx0[i] * sz0[k]
                        + 0.5 * dsx[i] * sz0[k]
                        + 0.5 * sx0[i] * dsz[k]
                        + third * dsx[i] * dsz[k];
                    let txy = sx0[i] * sy0[j]
                        + 0.5 * dsx[i] * sy0[j]
                        + 0.5 * sx0[i] * dsy[j]
                        + third * dsx[i] * dsy[j];
                    jx_acc[j][k] -= crx * dsx[i] * tyz;
                    jy_acc[i][k] -= cry * dsy[j] * txz;
                    jz_acc[i][j] -= crz * dsz[k] * txy;
                }
            }
        }
        if let Some(rho) = rho {
            for i in 0..ns {
                for j in 0..ns {
                    for k in 0..ns {
                        *rho.at_mut(start[0] + i, start[1] + j, start[2] + k) +=
                            q * s1[0][i] * s1[1][j] * s1[2][k];
                    }
                }
            }
        }
    }

    /// Charge-only deposition from the current positions: frozen species
    /// and the Poisson initialization.
    pub fn charge(&self, rho: &mut Field, particles: &Particles, istart: usize, iend: usize) {
        let sp = self.support;
        let half = sp / 2;
        for ipart in istart..iend {
            let q = particles.charge[ipart] as f64 * particles.weight[ipart];
            if q == 0.0 {
                continue;
            }
            let mut c = [[0.0; 5]; 3];
            let mut start = [0usize; 3];
            for axis in 0..self.ndim {
                let xn = particles.position[axis][ipart] * self.dx_inv[axis]
                    - self.domain_begin[axis] as f64;
                let ip = xn.round();
                c[axis] = self.shape(xn - ip);
                start[axis] = (ip as i64 + self.oversize[axis] as i64 - half as i64) as usize;
            }
            match self.ndim {
                1 => {
                    for i in 0..sp {
                        *rho.at_mut(start[0] + i, 0, 0) += q * c[0][i];
                    }
                }
                2 => {
                    for i in 0..sp {
                        for j in 0..sp {
                            *rho.at_mut(start[0] + i, start[1] + j, 0) += q * c[0][i] * c[1][j];
                        }
                    }
                }
                _ => {
                    for i in 0..sp {
                        for j in 0..sp {
                            for k in 0..sp {
                                *rho.at_mut(start[0] + i, start[1] + j, start[2] + k) +=
                                    q * c[0][i] * c[1][j] * c[2][k];
                            }
                        }
                    }
                }
            }
        }
    }

    /// Deposit the energy-conservation current of a fresh ionization event
    /// with plain (non-Esirkepov) shapes on the proper staggering.
    pub fn ionization_currents(
        &self,
        jx: &mut Field,
        jy: &mut Field,
        jz: &mut Field,
        particles: &Particles,
        ipart: usize,
        jion: [f64; 3],
    ) {
        let w = particles.weight[ipart];
        let j_w = [jion[0] * w, jion[1] * w, jion[2] * w];
        for (c, field) in [(0, &mut *jx), (1, &mut *jy), (2, &mut *jz)] {
            let mut coeff = [[0.0; 5]; 3];
            let mut start = [0usize; 3];
            let half = self.support / 2;
            for axis in 0..self.ndim {
                let xn = particles.position[axis][ipart] * self.dx_inv[axis]
                    - self.domain_begin[axis] as f64;
                // component c is dual along its own axis
                let (center, d) = if axis == c {
                    let m = (xn + 0.5).round();
                    (m, xn - m + 0.5)
                } else {
                    let m = xn.round();
                    (m, xn - m)
                };
                coeff[axis] = self.shape(d);
                start[axis] = (center as i64 + self.oversize[axis] as i64 - half as i64) as usize;
            }
            let sp = self.support;
            match self.ndim {
                1 => {
                    for i in 0..sp {
                        *field.at_mut(start[0] + i, 0, 0) += coeff[0][i] * j_w[c];
                    }
                }
                2 => {
                    for i in 0..sp {
                        for j in 0..sp {
                            *field.at_mut(start[0] + i, start[1] + j, 0) +=
                                coeff[0][i] * coeff[1][j] * j_w[c];
                        }
                    }
                }
                _ => {
                    for i in 0..sp {
                        for j in 0..sp {
                            for k in 0..sp {
                                *field.at_mut(start[0] + i, start[1] + j, start[2] + k) +=
                                    coeff[0][i] * coeff[1][j] * coeff[2][k] * j_w[c];
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Interpolator;
    use larmor_core::config::Namelist;
    use larmor_fields::EmFields;

    fn params(geom: &str) -> SimParams {
        let deck: Namelist = toml::from_str(&format!(
            r#"
            [main]
            geometry = "{geom}"
            cell_length = {cells}
            grid_length = {lens}
            timestep = 0.04
            simulation_time = 1.0
            number_of_patches = {patches}
            em_boundary_conditions = {bcs}
            "#,
            geom = geom,
            cells = if geom == "1dcartesian" { "[0.1]" } else { "[0.1, 0.1]" },
            lens = if geom == "1dcartesian" { "[1.6]" } else { "[1.6, 1.6]" },
            patches = if geom == "1dcartesian" { "[1]" } else { "[1, 1]" },
            bcs = if geom == "1dcartesian" {
                r#"[["periodic", "periodic"]]"#
            } else {
                r#"[["periodic", "periodic"], ["periodic", "periodic"]]"#
            },
        ))
        .unwrap();
        SimParams::resolve(&deck, 1).unwrap()
    }

    /// Deposit rho at the old and new positions of a moving particle plus
    /// the Esirkepov currents, then check the discrete continuity equation
    /// cell by cell.
    fn continuity_residual(geom: &str, x0: Vec<f64>, v: [f64; 3]) -> f64 {
        let params = params(geom);
        let interp = Interpolator::new(&params, [0; 3]);
        let proj = Projector::new(&params, [0; 3]);
        let em_proto = EmFields::new(&params, 0);

        let mut p = Particles::new(params.ndim, false, false);
        p.push_back(&x0, [0.0; 3], 1.0, -1);

        let mut rho_old = em_proto.rho.clone();
        proj.charge(&mut rho_old, &p, 0, 1);

        // record old indices, then move ballistically
        let n = 1;
        let mut epart = vec![0.0; 3];
        let mut bpart = vec![0.0; 3];
        let mut iold = vec![0i32; params.ndim];
        let mut delta = vec![0.0; params.ndim];
        let em = EmFields::new(&params, 0);
        interp.fields_at(&em, &p, 0, n, &mut epart, &mut bpart, &mut iold, &mut delta);
        for axis in 0..params.ndim {
            p.position[axis][0] += v[axis] * params.timestep;
        }

        let mut jx = em_proto.jx.clone();
        let mut jy = em_proto.jy.clone();
        let mut jz = em_proto.jz.clone();
        let mut rho_new = em_proto.rho.clone();
        let invgf = [1.0];
        proj.currents(
            &mut jx,
            &mut jy,
            &mut jz,
            Some(&mut rho_new),
            &p,
            0,
            1,
            &invgf,
            &iold,
            &delta,
        );

        let dt = params.timestep;
        let mut worst = 0.0f64;
        let ov = params.oversize;
        match params.ndim {
            1 => {
                for i in 1..rho_new.dims[0] - 1 {
                    let drho = (rho_new.at(i, 0, 0) - rho_old.at(i, 0, 0)) / dt;
                    let div = (jx.at(i + 1, 0, 0) - jx.at(i, 0, 0)) / params.cell_length[0];
                    worst = worst.max((drho + div).abs());
                }
            }
            _ => {
                for i in ov[0] - 1..rho_new.dims[0] - ov[0] {
                    for j in ov[1] - 1..rho_new.dims[1] - ov[1] {
                        let drho = (rho_new.at(i, j, 0) - rho_old.at(i, j, 0)) / dt;
                        let div = (jx.at(i + 1, j, 0) - jx.at(i, j, 0)) / params.cell_length[0]
                            + (jy.at(i, j + 1, 0) - jy.at(i, j, 0)) / params.cell_length[1];
                        worst = worst.max((drho + div).abs());
                    }
                }
            }
        }
        worst
    }

    #[test]
    fn continuity_holds_in_1d_across_a_cell_boundary() {
        // moves from 0.744 to 0.756: the nearest node flips from 7 to 8
        let r = continuity_residual("1dcartesian", vec![0.744], [0.3, 0.1, 0.05]);
        assert!(r < 1e-12, "continuity residual {r}");
    }

    #[test]
    fn continuity_holds_in_1d_without_crossing() {
        let r = continuity_residual("1dcartesian", vec![0.51], [0.2, 0.0, 0.0]);
        assert!(r < 1e-12, "continuity residual {r}");
    }

    #[test]
    fn continuity_holds_in_2d_diagonal_motion() {
        let r = continuity_residual("2dcartesian", vec![0.744, 0.456], [0.3, -0.4, 0.0]);
        assert!(r < 1e-12, "continuity residual {r}");
    }

    #[test]
    fn total_deposited_charge_matches_particle_charge() {
        let params = params("2dcartesian");
        let proj = Projector::new(&params, [0; 3]);
        let mut p = Particles::new(2, false, false);
        p.push_back(&[0.63, 0.41], [0.0; 3], 2.5, -1);
        let em = EmFields::new(&params, 0);
        let mut rho = em.rho.clone();
        proj.charge(&mut rho, &p, 0, 1);
        let total: f64 = rho.data().iter().sum();
        assert!((total - (-2.5)).abs() < 1e-12);
    }
}
