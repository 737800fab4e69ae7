//! Radiation reaction on a massive species.
//!
//! Three regimes act on the quantum parameter chi computed from the
//! interpolated fields: a deterministic Landau-Lifshitz friction (with or
//! without the quantum correction), the Niel stochastic correction, and a
//! discrete Monte-Carlo photon emission feeding a photon species.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use larmor_core::config::{RadiationModel, SpeciesParams};
use larmor_core::constants::SCHWINGER_E_FIELD;

use crate::particles::Particles;
use crate::tables::RadiationTables;

/// Lorentz-invariant quantum parameter of a massive particle.
#[allow(clippy::too_many_arguments)]
#[inline]
pub fn compute_chi(
    px: f64,
    py: f64,
    pz: f64,
    gamma: f64,
    ex: f64,
    ey: f64,
    ez: f64,
    bx: f64,
    by: f64,
    bz: f64,
) -> f64 {
    // |gamma E + p x B|^2 - (p.E)^2, all in units of the Schwinger field
    let fx = gamma * ex + py * bz - pz * by;
    let fy = gamma * ey + pz * bx - px * bz;
    let fz = gamma * ez + px * by - py * bx;
    let pdote = px * ex + py * ey + pz * ez;
    (fx * fx + fy * fy + fz * fz - pdote * pdote).abs().sqrt() / SCHWINGER_E_FIELD
}

/// Apply the configured model to `[istart, iend)`. Monte-Carlo emission
/// appends photons to `photon_buffer` when one is wired up. Returns the
/// energy radiated away by this slice.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    model: RadiationModel,
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    species: &SpeciesParams,
    tables: &RadiationTables,
    rng: &mut ChaCha8Rng,
    dt: f64,
    photon_buffer: Option<&mut Particles>,
) -> f64 {
    match model {
        RadiationModel::None => 0.0,
        RadiationModel::Ll => {
            continuous(particles, istart, iend, epart, bpart, species, tables, dt, false, None)
        }
        RadiationModel::Cll => {
            continuous(particles, istart, iend, epart, bpart, species, tables, dt, true, None)
        }
        RadiationModel::Niel => continuous(
            particles,
            istart,
            iend,
            epart,
            bpart,
            species,
            tables,
            dt,
            true,
            Some(rng),
        ),
        RadiationModel::Mc => monte_carlo(
            particles,
            istart,
            iend,
            epart,
            bpart,
            species,
            tables,
            rng,
            dt,
            photon_buffer,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn continuous(
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    species: &SpeciesParams,
    tables: &RadiationTables,
    dt: f64,
    quantum_corrected: bool,
    mut rng: Option<&mut ChaCha8Rng>,
) -> f64 {
    let n = iend - istart;
    let mass = species.mass;
    let mut radiated = 0.0;
    for i in 0..n {
        let ipart = istart + i;
        let px = particles.momentum[0][ipart];
        let py = particles.momentum[1][ipart];
        let pz = particles.momentum[2][ipart];
        let gamma = (1.0 + px * px + py * py + pz * pz).sqrt();
        let chi = compute_chi(
            px,
            py,
            pz,
            gamma,
            epart[i],
            epart[n + i],
            epart[2 * n + i],
            bpart[i],
            bpart[n + i],
            bpart[2 * n + i],
        );
        if chi < tables.minimum_chi_continuous {
            continue;
        }

        let g = if quantum_corrected {
            tables.g_factor.eval(chi)
        } else {
            1.0
        };
        let power = tables.power_coeff * chi * chi * g;
        // friction along the momentum direction
        let p_norm = (px * px + py * py + pz * pz).sqrt();
        let mut dp = power * dt;

        // Fokker-Planck spread on top of the drift
        if let Some(rng) = rng.as_deref_mut() {
            let h = tables.niel_h.eval(chi);
            let r: f64 = StandardNormal.sample(rng);
            dp -= (h * gamma).sqrt() * dt.sqrt() * r;
        }
        let dp = dp.min(p_norm - 1e-10);

        let scale = (p_norm - dp) / p_norm;
        particles.momentum[0][ipart] = px * scale;
        particles.momentum[1][ipart] = py * scale;
        particles.momentum[2][ipart] = pz * scale;

        let gamma_new = (1.0 + particles.momentum_squared(ipart)).sqrt();
        radiated += particles.weight[ipart] * mass * (gamma - gamma_new);
    }
    radiated
}

#[allow(clippy::too_many_arguments)]
fn monte_carlo(
    particles: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    species: &SpeciesParams,
    tables: &RadiationTables,
    rng: &mut ChaCha8Rng,
    dt: f64,
    mut photon_buffer: Option<&mut Particles>,
) -> f64 {
    debug_assert!(particles.has_quantum_state);
    let n = iend - istart;
    let mass = species.mass;
    let mut radiated = 0.0;
    for i in 0..n {
        let ipart = istart + i;
        let px = particles.momentum[0][ipart];
        let py = particles.momentum[1][ipart];
        let pz = particles.momentum[2][ipart];
        let gamma = (1.0 + px * px + py * py + pz * pz).sqrt();
        let chi = compute_chi(
            px,
            py,
            pz,
            gamma,
            epart[i],
            epart[n + i],
            epart[2 * n + i],
            bpart[i],
            bpart[n + i],
            bpart[2 * n + i],
        );
        particles.chi[ipart] = chi;
        if chi < tables.minimum_chi_discontinuous {
            continue;
        }

        // refresh the exhausted optical depth
        if particles.tau[ipart] <= 0.0 {
            let u: f64 = rng.gen_range(1e-12f64..1.0);
            particles.tau[ipart] = -u.ln();
        }
        let rate = tables.mc_rate.eval(chi) / gamma;
        particles.tau[ipart] -= rate * dt;
        if particles.tau[ipart] > 0.0 {
            continue;
        }
        particles.tau[ipart] = 0.0;

        // emission event: draw the photon energy fraction
        let u: f64 = rng.gen_range(0.0f64..1.0);
        let fraction = tables
            .photon_fraction
            .sample(chi, u)
            .min(1.0 - 1.5 / gamma)
            .max(0.0);
        if fraction <= 0.0 {
            continue;
        }
        let photon_energy = fraction * gamma;

        let p_norm = (px * px + py * py + pz * pz).sqrt();
        let scale = (p_norm - photon_energy).max(0.0) / p_norm;
        particles.momentum[0][ipart] = px * scale;
        particles.momentum[1][ipart] = py * scale;
        particles.momentum[2][ipart] = pz * scale;

        let w = particles.weight[ipart];
        let gamma_new = (1.0 + particles.momentum_squared(ipart)).sqrt();
        radiated += w * mass * (gamma - gamma_new);

        if let Some(buf) = photon_buffer.as_deref_mut() {
            let dir = [px / p_norm, py / p_norm, pz / p_norm];
            let mut pos = [0.0f64; 3];
            for axis in 0..particles.ndim {
                pos[axis] = particles.position[axis][ipart];
            }
            buf.push_back(
                &pos[..particles.ndim],
                [
                    photon_energy * dir[0],
                    photon_energy * dir[1],
                    photon_energy * dir[2],
                ],
                w,
                0,
            );
        }
    }
    radiated
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::{
        PartBoundary, PositionInit, PusherKind, RadiationReactionBlock,
    };
    use rand::SeedableRng;

    fn species(model: RadiationModel) -> SpeciesParams {
        SpeciesParams {
            index: 0,
            name: "electrons".into(),
            mass: 1.0,
            charge: -1.0,
            pusher: PusherKind::Boris,
            position_initialization: PositionInit::Regular,
            particles_per_cell: 1,
            density: None,
            mean_velocity: [0.0; 3],
            thermal_velocity: [0.0; 3],
            thermal_momentum: [0.0; 3],
            bc: [[PartBoundary::Periodic; 2]; 3],
            time_frozen: 0.0,
            radiation_model: model,
            radiated_photon_species: None,
            pair_species: None,
            ionization: None,
            tracked: false,
        }
    }

    fn tables() -> RadiationTables {
        RadiationTables::build(&RadiationReactionBlock {
            minimum_chi_continuous: 1e-4,
            minimum_chi_discontinuous: 1e-2,
            table_points: 128,
        })
    }

    #[test]
    fn chi_vanishes_for_motion_parallel_to_e() {
        // p parallel to E: the transverse force is the magnetic term only
        let chi = compute_chi(10.0, 0.0, 0.0, (101.0f64).sqrt(), 1.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        // (gamma^2 - p^2) E^2 = E^2: small but nonzero
        let expect = 1.0 / SCHWINGER_E_FIELD;
        assert!((chi - expect).abs() < 1e-18);
    }

    #[test]
    fn friction_reduces_momentum_and_tallies_energy() {
        let mut p = Particles::new(1, false, false);
        p.push_back(&[0.0], [1000.0, 0.0, 0.0], 2.0, -1);
        let sp = species(RadiationModel::Cll);
        // strong transverse B gives a large chi
        let epart = [0.0; 3];
        let bpart = [0.0, 0.0, 1000.0];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let before = p.momentum_norm(0);
        let radiated = apply(
            RadiationModel::Cll,
            &mut p,
            0,
            1,
            &epart,
            &bpart,
            &sp,
            &tables(),
            &mut rng,
            0.01,
            None,
        );
        let after = p.momentum_norm(0);
        assert!(after < before);
        assert!(radiated > 0.0);
        // energy lost by the particle equals the tally (weight 2)
        let g0 = (1.0 + before * before).sqrt();
        let g1 = (1.0 + after * after).sqrt();
        assert!((radiated - 2.0 * (g0 - g1)).abs() < 1e-9);
    }

    #[test]
    fn monte_carlo_emits_into_the_photon_buffer() {
        let mut p = Particles::new(1, true, false);
        p.push_back(&[0.5], [2000.0, 0.0, 0.0], 1.0, -1);
        let sp = species(RadiationModel::Mc);
        let epart = [0.0; 3];
        let bpart = [0.0, 0.0, 5000.0];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut photons = Particles::new(1, true, false);
        let mut radiated = 0.0;
        for _ in 0..2000 {
            radiated += apply(
                RadiationModel::Mc,
                &mut p,
                0,
                1,
                &epart,
                &bpart,
                &sp,
                &tables(),
                &mut rng,
                0.01,
                Some(&mut photons),
            );
            if !photons.is_empty() {
                break;
            }
        }
        assert!(!photons.is_empty(), "no photon emitted");
        // photon flies along the electron momentum
        assert!(photons.momentum[0][0] > 0.0);
        assert!((photons.momentum[1][0]).abs() < 1e-12);
        // electron energy loss matches the photon energy up to the
        // ultrarelativistic momentum/energy mismatch
        let eph = photons.momentum_norm(0);
        assert!((radiated - eph).abs() < 1e-3 * eph.max(1.0));
    }
}
