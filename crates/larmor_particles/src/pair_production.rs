//! Multiphoton Breit-Wheeler decay of photons into electron-positron
//! pairs, sampled against the tabulated cross-sections. Decayed photons
//! are weight-zeroed and compacted at the next sort.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use larmor_core::constants::SCHWINGER_E_FIELD;

use crate::particles::Particles;
use crate::tables::PairProductionTables;

/// Quantum parameter of a photon with momentum k and energy |k|.
#[allow(clippy::too_many_arguments)]
#[inline]
pub fn compute_chi_photon(
    kx: f64,
    ky: f64,
    kz: f64,
    gamma: f64,
    ex: f64,
    ey: f64,
    ez: f64,
    bx: f64,
    by: f64,
    bz: f64,
) -> f64 {
    let fx = gamma * ex + ky * bz - kz * by;
    let fy = gamma * ey + kz * bx - kx * bz;
    let fz = gamma * ez + kx * by - ky * bx;
    let kdote = kx * ex + ky * ey + kz * ez;
    (fx * fx + fy * fy + fz * fz - kdote * kdote).abs().sqrt() / SCHWINGER_E_FIELD
}

/// Advance the optical depth of the photons in `[istart, iend)` and decay
/// those whose depth ran out into pairs appended to the buffers. Returns
/// the photon energy converted into pairs.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    photons: &mut Particles,
    istart: usize,
    iend: usize,
    epart: &[f64],
    bpart: &[f64],
    tables: &PairProductionTables,
    rng: &mut ChaCha8Rng,
    dt: f64,
    electron_buffer: &mut Particles,
    positron_buffer: &mut Particles,
) -> f64 {
    debug_assert!(photons.has_quantum_state);
    let n = iend - istart;
    let mut converted = 0.0;
    for i in 0..n {
        let ipart = istart + i;
        if photons.weight[ipart] == 0.0 {
            continue;
        }
        let kx = photons.momentum[0][ipart];
        let ky = photons.momentum[1][ipart];
        let kz = photons.momentum[2][ipart];
        let gamma = (kx * kx + ky * ky + kz * kz).sqrt();
        // below 2 mc^2 no pair can form
        if gamma <= 2.0 {
            continue;
        }
        let chi = compute_chi_photon(
            kx,
            ky,
            kz,
            gamma,
            epart[i],
            epart[n + i],
            epart[2 * n + i],
            bpart[i],
            bpart[n + i],
            bpart[2 * n + i],
        );
        photons.chi[ipart] = chi;
        if chi < tables.minimum_chi_photon {
            continue;
        }

        if photons.tau[ipart] <= 0.0 {
            let u: f64 = rng.gen_range(1e-12f64..1.0);
            photons.tau[ipart] = -u.ln();
        }
        let rate = tables.decay_rate.eval(chi) / gamma;
        photons.tau[ipart] -= rate * dt;
        if photons.tau[ipart] > 0.0 {
            continue;
        }

        // decay: share the photon energy between the pair leptons
        let u: f64 = rng.gen_range(0.0f64..1.0);
        let f = tables.energy_fraction.sample(chi, u).clamp(0.05, 0.95);
        let w = photons.weight[ipart];
        let dir = [kx / gamma, ky / gamma, kz / gamma];
        let mut pos = [0.0f64; 3];
        for axis in 0..photons.ndim {
            pos[axis] = photons.position[axis][ipart];
        }

        for (lepton, charge, share) in [
            (&mut *electron_buffer, -1i16, f),
            (&mut *positron_buffer, 1i16, 1.0 - f),
        ] {
            let energy = (share * gamma).max(1.0 + 1e-12);
            let p_norm = (energy * energy - 1.0).max(0.0).sqrt();
            let samples = if charge < 0 {
                tables.sampling[0]
            } else {
                tables.sampling[1]
            };
            for _ in 0..samples {
                lepton.push_back(
                    &pos[..photons.ndim],
                    [p_norm * dir[0], p_norm * dir[1], p_norm * dir[2]],
                    w / samples as f64,
                    charge,
                );
            }
        }

        converted += w * gamma;
        // mark the photon for compaction
        photons.weight[ipart] = 0.0;
        photons.tau[ipart] = 0.0;
    }
    converted
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::PairProductionBlock;
    use rand::SeedableRng;

    fn tables() -> PairProductionTables {
        PairProductionTables::build(&PairProductionBlock {
            minimum_chi_photon: 1e-2,
            table_points: 128,
            pair_creation_sampling: [1, 1],
        })
    }

    #[test]
    fn hard_photon_in_strong_field_decays() {
        let mut photons = Particles::new(1, true, false);
        photons.push_back(&[0.3], [3000.0, 0.0, 0.0], 0.5, 0);
        let mut electrons = Particles::new(1, true, false);
        let mut positrons = Particles::new(1, true, false);
        let epart = [0.0; 3];
        let bpart = [0.0, 0.0, 8000.0];
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut converted = 0.0;
        for _ in 0..5000 {
            converted += apply(
                &mut photons,
                0,
                1,
                &epart,
                &bpart,
                &tables(),
                &mut rng,
                0.01,
                &mut electrons,
                &mut positrons,
            );
            if photons.weight[0] == 0.0 {
                break;
            }
        }
        assert_eq!(photons.weight[0], 0.0, "photon survived");
        assert_eq!(electrons.len(), 1);
        assert_eq!(positrons.len(), 1);
        // pair flies forward and carries about the photon energy
        assert!(electrons.momentum[0][0] > 0.0);
        assert!(positrons.momentum[0][0] > 0.0);
        let pair_energy = electrons.lor_fac(0) * 0.5 + positrons.lor_fac(0) * 0.5;
        assert!((pair_energy - converted).abs() / converted < 0.01);
        // dead photon disappears at compaction
        assert_eq!(photons.compact_removed(), 1);
    }

    #[test]
    fn soft_photon_never_decays() {
        let mut photons = Particles::new(1, true, false);
        photons.push_back(&[0.3], [1.5, 0.0, 0.0], 1.0, 0);
        let mut electrons = Particles::new(1, true, false);
        let mut positrons = Particles::new(1, true, false);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let converted = apply(
            &mut photons,
            0,
            1,
            &[1000.0, 0.0, 0.0],
            &[0.0; 3],
            &tables(),
            &mut rng,
            0.01,
            &mut electrons,
            &mut positrons,
        );
        assert_eq!(converted, 0.0);
        assert!(electrons.is_empty());
    }
}
