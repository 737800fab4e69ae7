//! Particle pushers. Boris rotation or the Vay cross-field-exact update
//! for massive species, straight-line transport for photons. All of them
//! write the new inverse Lorentz factor into the scratch slice the
//! projector reads velocities from.

use larmor_core::config::PusherKind;

use crate::particles::Particles;

/// Advance momenta and positions of `[istart, iend)` with the interpolated
/// fields in `epart`/`bpart` (component-major: `[c * n + i]`, n = slice
/// particle count offset by istart).
#[allow(clippy::too_many_arguments)]
pub fn push(
    kind: PusherKind,
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    invgf: &mut [f64],
    one_over_mass: f64,
    dt: f64,
) {
    match kind {
        PusherKind::Boris => push_boris(
            particles,
            istart,
            iend,
            epart,
            bpart,
            invgf,
            one_over_mass,
            dt,
        ),
        PusherKind::Vay => push_vay(
            particles,
            istart,
            iend,
            epart,
            bpart,
            invgf,
            one_over_mass,
            dt,
        ),
        PusherKind::Photon => push_photon(particles, istart, iend, invgf, dt),
    }
}

#[allow(clippy::too_many_arguments)]
fn push_boris(
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    invgf: &mut [f64],
    one_over_mass: f64,
    dt: f64,
) {
    let n = iend - istart;
    let dts2 = 0.5 * dt;
    for i in 0..n {
        let ipart = istart + i;
        // the signed charge state rides on the particle (field ionization
        // raises it in place)
        let q_dts2 = particles.charge[ipart] as f64 * one_over_mass * dts2;

        let ex = epart[i];
        let ey = epart[n + i];
        let ez = epart[2 * n + i];
        let bx = bpart[i];
        let by = bpart[n + i];
        let bz = bpart[2 * n + i];

        // half electric kick
        let mut ux = particles.momentum[0][ipart] + q_dts2 * ex;
        let mut uy = particles.momentum[1][ipart] + q_dts2 * ey;
        let mut uz = particles.momentum[2][ipart] + q_dts2 * ez;

        // magnetic rotation at the half-kick energy
        let gamma_inv = 1.0 / (1.0 + ux * ux + uy * uy + uz * uz).sqrt();
        let tx = q_dts2 * bx * gamma_inv;
        let ty = q_dts2 * by * gamma_inv;
        let tz = q_dts2 * bz * gamma_inv;
        let t2 = tx * tx + ty * ty + tz * tz;
        let s = 2.0 / (1.0 + t2);

        let vx = ux + uy * tz - uz * ty;
        let vy = uy + uz * tx - ux * tz;
        let vz = uz + ux * ty - uy * tx;
        ux += s * (vy * tz - vz * ty);
        uy += s * (vz * tx - vx * tz);
        uz += s * (vx * ty - vy * tx);

        // second half electric kick
        ux += q_dts2 * ex;
        uy += q_dts2 * ey;
        uz += q_dts2 * ez;

        let inv = 1.0 / (1.0 + ux * ux + uy * uy + uz * uz).sqrt();
        particles.momentum[0][ipart] = ux;
        particles.momentum[1][ipart] = uy;
        particles.momentum[2][ipart] = uz;
        invgf[i] = inv;

        for axis in 0..particles.ndim {
            particles.position[axis][ipart] += dt * particles.momentum[axis][ipart] * inv;
        }
    }
}

// Vay (2008): reconstructs the new Lorentz factor from an invariant, so
// the E x B drift comes out exact for arbitrary field strength.
#[allow(clippy::too_many_arguments)]
fn push_vay(
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    invgf: &mut [f64],
    one_over_mass: f64,
    dt: f64,
) {
    let n = iend - istart;
    let dts2 = 0.5 * dt;
    for i in 0..n {
        let ipart = istart + i;
        let q_dts2 = particles.charge[ipart] as f64 * one_over_mass * dts2;

        let ex = epart[i];
        let ey = epart[n + i];
        let ez = epart[2 * n + i];
        let bx = bpart[i];
        let by = bpart[n + i];
        let bz = bpart[2 * n + i];

        let px = particles.momentum[0][ipart];
        let py = particles.momentum[1][ipart];
        let pz = particles.momentum[2][ipart];
        let gamma_inv = 1.0 / (1.0 + px * px + py * py + pz * pz).sqrt();

        // u' = u + q dt/m E + q dt/2m (v x B)
        let upx = px + 2.0 * q_dts2 * ex + q_dts2 * gamma_inv * (py * bz - pz * by);
        let upy = py + 2.0 * q_dts2 * ey + q_dts2 * gamma_inv * (pz * bx - px * bz);
        let upz = pz + 2.0 * q_dts2 * ez + q_dts2 * gamma_inv * (px * by - py * bx);

        let tx = q_dts2 * bx;
        let ty = q_dts2 * by;
        let tz = q_dts2 * bz;
        let t2 = tx * tx + ty * ty + tz * tz;
        let u_star = upx * tx + upy * ty + upz * tz;
        let gamma_p2 = 1.0 + upx * upx + upy * upy + upz * upz;
        let sigma = gamma_p2 - t2;
        let gamma_new2 =
            0.5 * (sigma + (sigma * sigma + 4.0 * (t2 + u_star * u_star)).sqrt());
        let inv = 1.0 / gamma_new2.sqrt();

        let tx_n = tx * inv;
        let ty_n = ty * inv;
        let tz_n = tz * inv;
        let s = 1.0 / (1.0 + tx_n * tx_n + ty_n * ty_n + tz_n * tz_n);
        let u_dot_t = upx * tx_n + upy * ty_n + upz * tz_n;

        let ux = s * (upx + u_dot_t * tx_n + upy * tz_n - upz * ty_n);
        let uy = s * (upy + u_dot_t * ty_n + upz * tx_n - upx * tz_n);
        let uz = s * (upz + u_dot_t * tz_n + upx * ty_n - upy * tx_n);

        let inv_final = 1.0 / (1.0 + ux * ux + uy * uy + uz * uz).sqrt();
        particles.momentum[0][ipart] = ux;
        particles.momentum[1][ipart] = uy;
        particles.momentum[2][ipart] = uz;
        invgf[i] = inv_final;

        for axis in 0..particles.ndim {
            particles.position[axis][ipart] += dt * particles.momentum[axis][ipart] * inv_final;
        }
    }
}

fn push_photon(particles: &mut Particles, istart: usize, iend: usize, invgf: &mut [f64], dt: f64) {
    for i in 0..iend - istart {
        let ipart = istart + i;
        let norm = particles.momentum_norm(ipart);
        let inv = if norm > 0.0 { 1.0 / norm } else { 0.0 };
        invgf[i] = inv;
        for axis in 0..particles.ndim {
            particles.position[axis][ipart] += dt * particles.momentum[axis][ipart] * inv;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_electron(px: f64) -> Particles {
        let mut p = Particles::new(2, false, false);
        p.push_back(&[0.0, 0.0], [px, 0.0, 0.0], 1.0, -1);
        p
    }

    #[test]
    fn boris_conserves_energy_in_pure_magnetic_field() {
        let mut p = one_electron(1.0);
        let epart = [0.0; 3];
        let bpart = [0.0, 0.0, 1.0];
        let mut invgf = [0.0];
        let p2_before = p.momentum_squared(0);
        for _ in 0..1000 {
            push(
                PusherKind::Boris,
                &mut p,
                0,
                1,
                &epart,
                &bpart,
                &mut invgf,
                1.0,
                0.01,
            );
        }
        let p2_after = p.momentum_squared(0);
        assert!((p2_before - p2_after).abs() < 1e-12);
    }

    #[test]
    fn boris_accelerates_along_e_field() {
        let mut p = one_electron(0.0);
        // E in +x pushes an electron (charge state -1) towards -x
        let epart = [2.0, 0.0, 0.0];
        let bpart = [0.0; 3];
        let mut invgf = [0.0];
        push(
            PusherKind::Boris,
            &mut p,
            0,
            1,
            &epart,
            &bpart,
            &mut invgf,
            1.0,
            0.5,
        );
        // dp = q E dt = -1
        assert!((p.momentum[0][0] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn vay_matches_boris_momentum_gain_in_pure_e_field() {
        let mut boris = one_electron(0.3);
        let mut vay = one_electron(0.3);
        let epart = [0.0, 1.5, 0.0];
        let bpart = [0.0; 3];
        let mut invgf = [0.0];
        for _ in 0..100 {
            push(PusherKind::Boris, &mut boris, 0, 1, &epart, &bpart, &mut invgf, 1.0, 0.02);
            push(PusherKind::Vay, &mut vay, 0, 1, &epart, &bpart, &mut invgf, 1.0, 0.02);
        }
        for c in 0..3 {
            assert!(
                (boris.momentum[c][0] - vay.momentum[c][0]).abs() < 1e-12,
                "component {c} disagrees"
            );
        }
    }

    #[test]
    fn vay_energy_error_stays_bounded_in_pure_magnetic_field() {
        // unlike Boris the Vay rotation is not exactly norm-preserving;
        // the per-step error is fourth order in the rotation angle
        let mut p = one_electron(2.0);
        let epart = [0.0; 3];
        let bpart = [0.3, -0.4, 1.0];
        let mut invgf = [0.0];
        let p2_before = p.momentum_squared(0);
        for _ in 0..500 {
            push(PusherKind::Vay, &mut p, 0, 1, &epart, &bpart, &mut invgf, 1.0, 0.01);
        }
        let drift = (p.momentum_squared(0) - p2_before).abs() / p2_before;
        assert!(drift < 1e-3, "energy drift {drift}");
    }

    #[test]
    fn photon_moves_at_light_speed() {
        let mut p = Particles::new(1, true, false);
        p.push_back(&[0.0], [5.0, 0.0, 0.0], 1.0, 0);
        let mut invgf = [0.0];
        push(PusherKind::Photon, &mut p, 0, 1, &[], &[], &mut invgf, 0.0, 0.25);
        assert!((p.position[0][0] - 0.25).abs() < 1e-15);
    }
}
