//! Patch-local binary Coulomb collisions.
//!
//! Particles of the two groups are paired at random inside each cluster
//! bin and scattered with the Nanbu-Perez cumulative small-angle kernel.
//! Weight mismatch is handled by rejection on the heavier macro-particle.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

use crate::particles::Particles;

/// Static description of one collision coupling.
#[derive(Debug, Clone)]
pub struct CollisionKernel {
    /// Fixed Coulomb logarithm; 0 selects the automatic estimate
    pub coulomb_log: f64,
    /// charge^2 * charge^2 / (m1 m2) prefactors are built per pair
    pub mass1: f64,
    pub mass2: f64,
    pub cell_volume: f64,
}

impl CollisionKernel {
    /// Scatter pairs drawn from the same container (intra-species).
    pub fn collide_intra(
        &self,
        particles: &mut Particles,
        bin: usize,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let (start, end) = (particles.bmin[bin], particles.bmax[bin]);
        let count = end - start;
        if count < 2 {
            return;
        }
        let mut order: Vec<usize> = (start..end).collect();
        shuffle(&mut order, rng);
        // odd leftover collides with the first of the shuffle
        let pairs = count / 2;
        for k in 0..pairs {
            let i1 = order[2 * k];
            let i2 = order[2 * k + 1];
            self.scatter_pair(particles, i1, i2, count, dt, rng);
        }
        if count % 2 == 1 {
            let i1 = order[count - 1];
            let i2 = order[0];
            self.scatter_pair(particles, i1, i2, count, dt, rng);
        }
    }

    /// Scatter pairs drawn from two different containers.
    #[allow(clippy::too_many_arguments)]
    pub fn collide_inter(
        &self,
        p1: &mut Particles,
        p2: &mut Particles,
        bin: usize,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let (s1, e1) = (p1.bmin[bin], p1.bmax[bin]);
        let (s2, e2) = (p2.bmin[bin], p2.bmax[bin]);
        let n1 = e1 - s1;
        let n2 = e2 - s2;
        if n1 == 0 || n2 == 0 {
            return;
        }
        let mut order1: Vec<usize> = (s1..e1).collect();
        let mut order2: Vec<usize> = (s2..e2).collect();
        shuffle(&mut order1, rng);
        shuffle(&mut order2, rng);
        // every particle of the larger group collides once
        let npairs = n1.max(n2);
        let density_count = n1.min(n2);
        for k in 0..npairs {
            let i1 = order1[k % n1];
            let i2 = order2[k % n2];
            self.scatter_pair_two(p1, i1, p2, i2, density_count, dt, rng);
        }
    }

    fn scatter_pair(
        &self,
        particles: &mut Particles,
        i1: usize,
        i2: usize,
        count: usize,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let (m1, m2) = (self.mass1, self.mass1);
        let (q1, q2) = (
            particles.charge[i1] as f64,
            particles.charge[i2] as f64,
        );
        let p_a = [
            particles.momentum[0][i1],
            particles.momentum[1][i1],
            particles.momentum[2][i1],
        ];
        let p_b = [
            particles.momentum[0][i2],
            particles.momentum[1][i2],
            particles.momentum[2][i2],
        ];
        let w_a = particles.weight[i1];
        let w_b = particles.weight[i2];
        if let Some((new_a, new_b)) = self.scatter(
            p_a, m1, q1, w_a, p_b, m2, q2, w_b, count, dt, rng,
        ) {
            for c in 0..3 {
                particles.momentum[c][i1] = new_a[c];
                particles.momentum[c][i2] = new_b[c];
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scatter_pair_two(
        &self,
        p1: &mut Particles,
        i1: usize,
        p2: &mut Particles,
        i2: usize,
        count: usize,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) {
        let q1 = p1.charge[i1] as f64;
        let q2 = p2.charge[i2] as f64;
        let a = [
            p1.momentum[0][i1],
            p1.momentum[1][i1],
            p1.momentum[2][i1],
        ];
        let b = [
            p2.momentum[0][i2],
            p2.momentum[1][i2],
            p2.momentum[2][i2],
        ];
        if let Some((new_a, new_b)) = self.scatter(
            a,
            self.mass1,
            q1,
            p1.weight[i1],
            b,
            self.mass2,
            q2,
            p2.weight[i2],
            count,
            dt,
            rng,
        ) {
            for c in 0..3 {
                p1.momentum[c][i1] = new_a[c];
                p2.momentum[c][i2] = new_b[c];
            }
        }
    }

    /// Nanbu-Perez scattering of one pair; `count` particles in the cell
    /// set the collision frequency. Returns the new momenta, or None for
    /// a null collision.
    #[allow(clippy::too_many_arguments)]
    fn scatter(
        &self,
        p_a: [f64; 3],
        m_a: f64,
        q_a: f64,
        w_a: f64,
        p_b: [f64; 3],
        m_b: f64,
        q_b: f64,
        w_b: f64,
        count: usize,
        dt: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<([f64; 3], [f64; 3])> {
        if q_a == 0.0 || q_b == 0.0 {
            return None;
        }
        // rejection keeps the effective collision rate right when the
        // macro-weights differ
        let w_max = w_a.max(w_b);
        let u: f64 = rng.gen_range(0.0f64..1.0);
        if u * w_max > w_a.min(w_b) {
            return None;
        }

        // non-relativistic COM construction with relativistic guards;
        // the relative velocity uses reduced momenta u = p/m
        let va = [p_a[0] / m_a, p_a[1] / m_a, p_a[2] / m_a];
        let vb = [p_b[0] / m_b, p_b[1] / m_b, p_b[2] / m_b];
        let rel = [va[0] - vb[0], va[1] - vb[1], va[2] - vb[2]];
        let v_rel2 = rel[0] * rel[0] + rel[1] * rel[1] + rel[2] * rel[2];
        if v_rel2 < 1e-20 {
            return None;
        }
        let v_rel = v_rel2.sqrt();
        let mu = m_a * m_b / (m_a + m_b);

        // density of the sparser group in this cell
        let density = count as f64 * w_max / self.cell_volume;
        let log_lambda = if self.coulomb_log > 0.0 {
            self.coulomb_log
        } else {
            // automatic estimate from the pair kinematics
            (1.0 + 4.0 * std::f64::consts::PI * mu * v_rel2 / density.cbrt().max(1e-12))
                .ln()
                .max(2.0)
        };

        // cumulative scattering parameter (Perez et al., small-angle limit)
        let q2 = q_a * q_a * q_b * q_b;
        let s = q2 * density * log_lambda * dt / (mu * mu * v_rel2 * v_rel).max(1e-30)
            / (4.0 * std::f64::consts::PI);

        // sample the deflection angle from the cumulative distribution
        let u: f64 = rng.gen_range(1e-12f64..1.0);
        let cos_chi = if s < 0.1 {
            1.0 + s * u.ln()
        } else if s < 6.0 {
            let inv_a = 0.0056958 + 0.9560202 * s - 0.508139 * s * s
                + 0.47913906 * s * s * s
                - 0.12788975 * s * s * s * s
                + 0.02389567 * s * s * s * s * s;
            let a = 1.0 / inv_a;
            (1.0 / a) * ((-a).exp() + 2.0 * u * a.sinh()).ln()
        } else {
            2.0 * u - 1.0
        };
        let cos_chi = cos_chi.clamp(-1.0, 1.0);
        let sin_chi = (1.0 - cos_chi * cos_chi).max(0.0).sqrt();
        let phi = Uniform::new(0.0, 2.0 * std::f64::consts::PI).sample(rng);

        // rotate the relative velocity by (chi, phi)
        let perp = (rel[0] * rel[0] + rel[1] * rel[1]).sqrt();
        let new_rel = if perp > 1e-14 * v_rel {
            [
                rel[0] * cos_chi + sin_chi / perp * (rel[0] * rel[2] * phi.cos() - v_rel * rel[1] * phi.sin()),
                rel[1] * cos_chi + sin_chi / perp * (rel[1] * rel[2] * phi.cos() + v_rel * rel[0] * phi.sin()),
                rel[2] * cos_chi - sin_chi * perp * phi.cos(),
            ]
        } else {
            // relative velocity along z: rotate about x/y directly
            [
                v_rel * sin_chi * phi.cos(),
                v_rel * sin_chi * phi.sin(),
                rel[2] * cos_chi,
            ]
        };

        let dv = [
            new_rel[0] - rel[0],
            new_rel[1] - rel[1],
            new_rel[2] - rel[2],
        ];
        Some((
            [
                p_a[0] + mu * dv[0],
                p_a[1] + mu * dv[1],
                p_a[2] + mu * dv[2],
            ],
            [
                p_b[0] - mu * dv[0],
                p_b[1] - mu * dv[1],
                p_b[2] - mu * dv[2],
            ],
        ))
    }
}

fn shuffle(v: &mut [usize], rng: &mut ChaCha8Rng) {
    for i in (1..v.len()).rev() {
        let j = rng.gen_range(0..=i);
        v.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn thermal_cloud(n: usize, spread: f64, seed: u64) -> Particles {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut p = Particles::new(1, false, false);
        for i in 0..n {
            let px = spread * (rng.gen_range(0.0f64..1.0) - 0.5);
            let py = spread * (rng.gen_range(0.0f64..1.0) - 0.5);
            let pz = spread * (rng.gen_range(0.0f64..1.0) - 0.5);
            p.push_back(&[0.1 * (i % 10) as f64], [px, py, pz], 1.0, -1);
        }
        p.bmin = vec![0];
        p.bmax = vec![n];
        p
    }

    #[test]
    fn intra_collisions_conserve_total_momentum() {
        let mut p = thermal_cloud(64, 0.1, 3);
        let before: [f64; 3] = [
            p.momentum[0].iter().sum(),
            p.momentum[1].iter().sum(),
            p.momentum[2].iter().sum(),
        ];
        let kernel = CollisionKernel {
            coulomb_log: 5.0,
            mass1: 1.0,
            mass2: 1.0,
            cell_volume: 1.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..50 {
            kernel.collide_intra(&mut p, 0, 0.1, &mut rng);
        }
        let after: [f64; 3] = [
            p.momentum[0].iter().sum(),
            p.momentum[1].iter().sum(),
            p.momentum[2].iter().sum(),
        ];
        for c in 0..3 {
            assert!(
                (before[c] - after[c]).abs() < 1e-10,
                "momentum component {c} drifted"
            );
        }
    }

    #[test]
    fn equal_mass_collisions_conserve_kinetic_energy() {
        let mut p = thermal_cloud(64, 0.1, 4);
        let energy = |p: &Particles| -> f64 {
            (0..p.len()).map(|i| p.momentum_squared(i)).sum()
        };
        let before = energy(&p);
        let kernel = CollisionKernel {
            coulomb_log: 5.0,
            mass1: 1.0,
            mass2: 1.0,
            cell_volume: 1.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        for _ in 0..50 {
            kernel.collide_intra(&mut p, 0, 0.1, &mut rng);
        }
        let after = energy(&p);
        // elastic in the non-relativistic COM: |v_rel| preserved
        assert!((before - after).abs() / before < 1e-6);
    }

    #[test]
    fn scattering_isotropizes_a_two_beam_cloud() {
        // two cold counter-streaming beams pick up transverse spread
        let mut p = Particles::new(1, false, false);
        for i in 0..128 {
            let px = if i % 2 == 0 { 0.2 } else { -0.2 };
            p.push_back(&[0.0], [px, 0.0, 0.0], 1.0, -1);
        }
        p.bmin = vec![0];
        p.bmax = vec![128];
        let kernel = CollisionKernel {
            coulomb_log: 10.0,
            mass1: 1.0,
            mass2: 1.0,
            cell_volume: 1e-4,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..100 {
            kernel.collide_intra(&mut p, 0, 0.05, &mut rng);
        }
        let transverse: f64 = (0..p.len())
            .map(|i| p.momentum[1][i].abs() + p.momentum[2][i].abs())
            .sum();
        assert!(transverse > 0.0, "no transverse spread developed");
    }
}
