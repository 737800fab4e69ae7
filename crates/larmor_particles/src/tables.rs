//! Opaque interpolation tables for the QED operators.
//!
//! The kernels only see log-spaced lookup tables; the built-in entries
//! come from standard analytic fits so a run needs no external data. The
//! table layer is also where externally computed tables would be loaded.

use serde::{Deserialize, Serialize};

use larmor_core::config::{PairProductionBlock, RadiationReactionBlock};
use larmor_core::constants::{ALPHA_FS, NORMALIZED_COMPTON_WAVELENGTH};

/// 1-D table, linear interpolation in log(x), clamped at both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTable {
    log_min: f64,
    log_max: f64,
    values: Vec<f64>,
}

impl LogTable {
    pub fn build(min: f64, max: f64, n: usize, f: impl Fn(f64) -> f64) -> Self {
        let log_min = min.ln();
        let log_max = max.ln();
        let values = (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                f((log_min + t * (log_max - log_min)).exp())
            })
            .collect();
        Self {
            log_min,
            log_max,
            values,
        }
    }

    pub fn eval(&self, x: f64) -> f64 {
        let n = self.values.len();
        let t = (x.ln() - self.log_min) / (self.log_max - self.log_min) * (n - 1) as f64;
        if t <= 0.0 {
            return self.values[0];
        }
        if t >= (n - 1) as f64 {
            return self.values[n - 1];
        }
        let i = t as usize;
        let frac = t - i as f64;
        self.values[i] * (1.0 - frac) + self.values[i + 1] * frac
    }
}

/// Per-chi inverse CDF rows for sampling an emission fraction in (0, 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverseCdfTable {
    log_chi_min: f64,
    log_chi_max: f64,
    /// rows[ichi][iu] = fraction at cumulative probability iu/(cols-1)
    rows: Vec<Vec<f64>>,
}

impl InverseCdfTable {
    pub fn build(
        chi_min: f64,
        chi_max: f64,
        rows: usize,
        cols: usize,
        spectrum: impl Fn(f64, f64) -> f64,
    ) -> Self {
        let log_chi_min = chi_min.ln();
        let log_chi_max = chi_max.ln();
        let mut table = Vec::with_capacity(rows);
        // fraction grid kept away from the endpoints
        let fgrid: Vec<f64> = (0..cols * 8)
            .map(|i| (i as f64 + 0.5) / (cols * 8) as f64)
            .collect();
        for r in 0..rows {
            let t = r as f64 / (rows - 1) as f64;
            let chi = (log_chi_min + t * (log_chi_max - log_chi_min)).exp();
            // build the CDF of the spectrum at this chi, then invert it
            let weights: Vec<f64> = fgrid.iter().map(|&f| spectrum(chi, f).max(0.0)).collect();
            let total: f64 = weights.iter().sum();
            let mut row = Vec::with_capacity(cols);
            let mut acc = 0.0;
            let mut k = 0;
            for c in 0..cols {
                let target = total * c as f64 / (cols - 1) as f64;
                while k < fgrid.len() - 1 && acc + weights[k] < target {
                    acc += weights[k];
                    k += 1;
                }
                row.push(fgrid[k]);
            }
            table.push(row);
        }
        Self {
            log_chi_min,
            log_chi_max,
            rows: table,
        }
    }

    /// Fraction at cumulative probability `u` for parameter `chi`.
    pub fn sample(&self, chi: f64, u: f64) -> f64 {
        let nrows = self.rows.len();
        let t = (chi.ln() - self.log_chi_min) / (self.log_chi_max - self.log_chi_min)
            * (nrows - 1) as f64;
        let r = (t.max(0.0) as usize).min(nrows - 1);
        let row = &self.rows[r];
        let s = u.clamp(0.0, 1.0) * (row.len() - 1) as f64;
        let i = (s as usize).min(row.len() - 2);
        let frac = s - i as f64;
        row[i] * (1.0 - frac) + row[i + 1] * frac
    }
}

/// Radiation-reaction tables: quantum correction, stochastic diffusion
/// coefficient, Monte-Carlo emission rate and photon-energy sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiationTables {
    pub g_factor: LogTable,
    pub niel_h: LogTable,
    /// gamma * dN_gamma/dt as a function of chi
    pub mc_rate: LogTable,
    pub photon_fraction: InverseCdfTable,
    pub minimum_chi_continuous: f64,
    pub minimum_chi_discontinuous: f64,
    /// Classical radiated-power prefactor P = coeff * chi^2 * g(chi)
    pub power_coeff: f64,
}

impl RadiationTables {
    pub fn build(block: &RadiationReactionBlock) -> Self {
        let n = block.table_points;
        let (chi_min, chi_max) = (1e-5, 1e3);
        // Ridgers fit of the quantum emissivity correction
        let g = |chi: f64| {
            (1.0 + 4.8 * (1.0 + chi) * (1.0 + 1.7 * chi).ln() + 2.44 * chi * chi).powf(-2.0 / 3.0)
        };
        // diffusion coefficient of the Fokker-Planck momentum spread
        let h = |chi: f64| {
            let g3 = 9.0 * 3.0f64.sqrt() / (4.0 * std::f64::consts::PI);
            g3 * chi * chi * chi / (1.0 + 4.5 * chi).cbrt()
        };
        // photon emission rate, times gamma
        let rate = |chi: f64| {
            let c = 5.0 * 3.0f64.sqrt() / 6.0 * ALPHA_FS / NORMALIZED_COMPTON_WAVELENGTH;
            c * chi / (1.0 + 1.5 * chi).cbrt()
        };
        // leading-order synchrotron-like photon spectrum in the energy
        // fraction f = gamma_photon/gamma
        let spectrum = |chi: f64, f: f64| {
            let xi = 2.0 * f / (3.0 * chi * (1.0 - f).max(1e-9));
            f.powf(-2.0 / 3.0) * (-xi).exp()
        };
        Self {
            g_factor: LogTable::build(chi_min, chi_max, n, g),
            niel_h: LogTable::build(chi_min, chi_max, n, h),
            mc_rate: LogTable::build(chi_min, chi_max, n, rate),
            photon_fraction: InverseCdfTable::build(chi_min, chi_max, n.min(64), 64, spectrum),
            minimum_chi_continuous: block.minimum_chi_continuous,
            minimum_chi_discontinuous: block.minimum_chi_discontinuous,
            power_coeff: 2.0 / 3.0 * ALPHA_FS * ALPHA_FS / NORMALIZED_COMPTON_WAVELENGTH,
        }
    }
}

/// Breit-Wheeler tables: photon decay rate and pair energy sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairProductionTables {
    /// gamma_photon * dN_pairs/dt as a function of chi_photon
    pub decay_rate: LogTable,
    pub energy_fraction: InverseCdfTable,
    pub minimum_chi_photon: f64,
    pub sampling: [u32; 2],
}

impl PairProductionTables {
    pub fn build(block: &PairProductionBlock) -> Self {
        let n = block.table_points;
        let (chi_min, chi_max) = (1e-3, 1e3);
        // Erber-style asymptotic fit of the pair production rate
        let rate = |chi: f64| {
            let c = 0.16 * ALPHA_FS / NORMALIZED_COMPTON_WAVELENGTH;
            let k = (8.0 / (3.0 * chi)).min(500.0);
            c * chi * (-k).exp() / (1.0 + 0.56 * chi).cbrt()
        };
        // energy sharing between the pair leptons, symmetric around 1/2
        // and flattening towards high chi
        let spectrum = |chi: f64, f: f64| {
            let u = (f - 0.5) * (f - 0.5);
            (-u * 8.0 / (0.3 + chi).min(4.0)).exp()
        };
        Self {
            decay_rate: LogTable::build(chi_min, chi_max, n, rate),
            energy_fraction: InverseCdfTable::build(chi_min, chi_max, n.min(64), 64, spectrum),
            minimum_chi_photon: block.minimum_chi_photon,
            sampling: block.pair_creation_sampling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_table_interpolates_and_clamps() {
        let t = LogTable::build(1e-3, 1e3, 256, |x| x * x);
        assert!((t.eval(1.0) - 1.0).abs() < 1e-2);
        assert!((t.eval(10.0) - 100.0).abs() / 100.0 < 0.05);
        // clamped outside the domain
        assert!((t.eval(1e-9) - t.eval(1e-3)).abs() < 1e-12);
    }

    #[test]
    fn g_factor_is_one_in_the_classical_limit() {
        let tables = RadiationTables::build(&RadiationReactionBlock {
            minimum_chi_continuous: 1e-3,
            minimum_chi_discontinuous: 1e-2,
            table_points: 256,
        });
        assert!((tables.g_factor.eval(1e-5) - 1.0).abs() < 1e-3);
        // strong quantum suppression at high chi
        assert!(tables.g_factor.eval(100.0) < 0.05);
    }

    #[test]
    fn inverse_cdf_rows_are_monotonic() {
        let t = InverseCdfTable::build(1e-2, 1e2, 16, 32, |_chi, f| (1.0 - f) * f);
        for u in [0.0, 0.2, 0.5, 0.9, 1.0] {
            let a = t.sample(0.1, u);
            assert!((0.0..=1.0).contains(&a));
        }
        let lo = t.sample(1.0, 0.1);
        let hi = t.sample(1.0, 0.9);
        assert!(lo < hi);
    }
}
