//! Particle boundary kernels for the external box faces.
//!
//! Every kernel returns whether the particle is kept; removed particles
//! are only marked (weight zeroed) and compacted during the next sort.
//! Kernels report the particle energy they destroyed so the scalar
//! accounting stays closed.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use larmor_core::config::{PartBoundary, SpeciesParams};
use larmor_core::constants::THERMAL_REDRAW_FACTOR;

use crate::particles::Particles;

/// Outcome bookkeeping of one boundary application.
#[derive(Debug, Default, Clone, Copy)]
pub struct BcEnergy {
    pub lost: f64,
}

/// Apply the species boundary on (axis, side) to particle `ipart`, which
/// was found beyond `limit`. Returns true when the particle survives.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    kind: PartBoundary,
    particles: &mut Particles,
    ipart: usize,
    axis: usize,
    side: usize,
    limit: f64,
    species: &SpeciesParams,
    rng: &mut ChaCha8Rng,
    energy: &mut BcEnergy,
) -> bool {
    match kind {
        PartBoundary::Periodic => true,
        PartBoundary::Reflective => {
            particles.position[axis][ipart] = 2.0 * limit - particles.position[axis][ipart];
            particles.momentum[axis][ipart] = -particles.momentum[axis][ipart];
            true
        }
        PartBoundary::Remove => {
            energy.lost += particle_energy(particles, ipart, species);
            particles.weight[ipart] = 0.0;
            particles.charge[ipart] = 0;
            false
        }
        PartBoundary::Stop => {
            energy.lost += particle_energy(particles, ipart, species);
            particles.position[axis][ipart] = limit;
            particles.momentum[0][ipart] = 0.0;
            particles.momentum[1][ipart] = 0.0;
            particles.momentum[2][ipart] = 0.0;
            true
        }
        PartBoundary::Thermalize => {
            thermalize(particles, ipart, axis, side, limit, species, rng, energy);
            true
        }
    }
}

/// Energy of one particle: w m (gamma - 1) for massive species, w |p| for
/// photons.
pub fn particle_energy(particles: &Particles, ipart: usize, species: &SpeciesParams) -> f64 {
    let w = particles.weight[ipart];
    if species.mass == 0.0 {
        w * particles.momentum_norm(ipart)
    } else {
        w * species.mass * (particles.lor_fac(ipart) - 1.0)
    }
}

#[allow(clippy::too_many_arguments)]
fn thermalize(
    particles: &mut Particles,
    ipart: usize,
    axis: usize,
    side: usize,
    limit: f64,
    species: &SpeciesParams,
    rng: &mut ChaCha8Rng,
    energy: &mut BcEnergy,
) {
    let before = particle_energy(particles, ipart, species);

    let gamma = particles.lor_fac(ipart);
    let v = particles.momentum_norm(ipart) / gamma;
    if v > THERMAL_REDRAW_FACTOR * species.thermal_velocity[0] {
        // redraw from the wall Maxwellian
        for c in 0..3 {
            if c == axis {
                // flux-weighted normal component, pointed back into the box
                let u: f64 = rng.gen_range(0.0f64..1.0);
                let magnitude = species.thermal_momentum[c] * (-(1.0 - u).ln()).sqrt();
                let sign = if side == 0 { 1.0 } else { -1.0 };
                particles.momentum[c][ipart] = sign * magnitude;
            } else {
                let sigma = species.thermal_momentum[c];
                if sigma > 0.0 {
                    let normal = Normal::new(0.0, sigma).unwrap();
                    particles.momentum[c][ipart] = normal.sample(rng);
                } else {
                    particles.momentum[c][ipart] = 0.0;
                }
            }
        }
        // fold the wall drift back in with a relativistic boost
        let drift = species.mean_velocity;
        boost_momentum(particles, ipart, drift);
    } else {
        particles.momentum[axis][ipart] = -particles.momentum[axis][ipart];
    }

    particles.position[axis][ipart] = 2.0 * limit - particles.position[axis][ipart];
    energy.lost += before - particle_energy(particles, ipart, species);
}

/// Lorentz-boost the particle momentum by a drift velocity `v` (composition
/// of the thermal draw with the mean flow).
pub fn boost_momentum(particles: &mut Particles, ipart: usize, v: [f64; 3]) {
    let v2 = v[0] * v[0] + v[1] * v[1] + v[2] * v[2];
    if v2 == 0.0 {
        return;
    }
    let g = 1.0 / (1.0 - v2).sqrt();
    let gm1 = g - 1.0;

    let l = [
        [
            1.0 + gm1 * v[0] * v[0] / v2,
            gm1 * v[0] * v[1] / v2,
            gm1 * v[0] * v[2] / v2,
        ],
        [
            gm1 * v[0] * v[1] / v2,
            1.0 + gm1 * v[1] * v[1] / v2,
            gm1 * v[1] * v[2] / v2,
        ],
        [
            gm1 * v[0] * v[2] / v2,
            gm1 * v[1] * v[2] / v2,
            1.0 + gm1 * v[2] * v[2] / v2,
        ],
    ];

    let p = [
        particles.momentum[0][ipart],
        particles.momentum[1][ipart],
        particles.momentum[2][ipart],
    ];
    let gp = (1.0 + p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    for row in 0..3 {
        particles.momentum[row][ipart] =
            gp * g * v[row] + l[row][0] * p[0] + l[row][1] * p[1] + l[row][2] * p[2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::config::{PositionInit, PusherKind, RadiationModel};
    use rand::SeedableRng;

    fn species() -> SpeciesParams {
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
            thermal_velocity: [0.01, 0.01, 0.01],
            thermal_momentum: [0.01, 0.01, 0.01],
            bc: [[PartBoundary::Periodic; 2]; 3],
            time_frozen: 0.0,
            radiation_model: RadiationModel::None,
            radiated_photon_species: None,
            pair_species: None,
            ionization: None,
            tracked: false,
        }
    }

    fn one(x: f64, px: f64) -> Particles {
        let mut p = Particles::new(1, false, false);
        p.push_back(&[x], [px, 0.0, 0.0], 1.0, -1);
        p
    }

    #[test]
    fn reflect_preserves_energy_and_flips_momentum() {
        let mut p = one(10.3, 0.7);
        let sp = species();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut e = BcEnergy::default();
        let before = particle_energy(&p, 0, &sp);
        let kept = apply(
            PartBoundary::Reflective,
            &mut p,
            0,
            0,
            1,
            10.0,
            &sp,
            &mut rng,
            &mut e,
        );
        assert!(kept);
        assert!((p.position[0][0] - 9.7).abs() < 1e-12);
        assert!((p.momentum[0][0] + 0.7).abs() < 1e-12);
        assert!((particle_energy(&p, 0, &sp) - before).abs() < 1e-12);
        assert_eq!(e.lost, 0.0);
    }

    #[test]
    fn stop_clamps_and_tallies_energy() {
        let mut p = one(10.3, 0.7);
        let sp = species();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut e = BcEnergy::default();
        let before = particle_energy(&p, 0, &sp);
        let kept = apply(
            PartBoundary::Stop,
            &mut p,
            0,
            0,
            1,
            10.0,
            &sp,
            &mut rng,
            &mut e,
        );
        assert!(kept);
        assert_eq!(p.position[0][0], 10.0);
        assert_eq!(p.momentum[0][0], 0.0);
        assert!((e.lost - before).abs() < 1e-12);
    }

    #[test]
    fn remove_marks_for_compaction() {
        let mut p = one(10.3, 0.7);
        let sp = species();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut e = BcEnergy::default();
        let kept = apply(
            PartBoundary::Remove,
            &mut p,
            0,
            0,
            1,
            10.0,
            &sp,
            &mut rng,
            &mut e,
        );
        assert!(!kept);
        assert_eq!(p.weight[0], 0.0);
        assert!(e.lost > 0.0);
        assert_eq!(p.compact_removed(), 1);
    }

    #[test]
    fn fast_particle_gets_thermalized_back_into_the_box() {
        let mut p = one(10.3, 0.9);
        let sp = species();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut e = BcEnergy::default();
        let kept = apply(
            PartBoundary::Thermalize,
            &mut p,
            0,
            0,
            1,
            10.0,
            &sp,
            &mut rng,
            &mut e,
        );
        assert!(kept);
        // momentum now thermal-scale and pointed inward (xmax wall)
        assert!(p.momentum[0][0] < 0.0);
        assert!(p.momentum[0][0].abs() < 0.1);
        assert!(p.position[0][0] < 10.0);
        // nearly all the kinetic energy was absorbed by the wall
        assert!(e.lost > 0.0);
    }

    #[test]
    fn slow_particle_is_only_reflected() {
        let mut p = one(10.05, 0.02);
        let mut sp = species();
        sp.thermal_velocity[0] = 0.05;
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut e = BcEnergy::default();
        apply(
            PartBoundary::Thermalize,
            &mut p,
            0,
            0,
            1,
            10.0,
            &sp,
            &mut rng,
            &mut e,
        );
        assert!((p.momentum[0][0] + 0.02).abs() < 1e-12);
        assert!(e.lost.abs() < 1e-12);
    }
}
