use serde::{Deserialize, Serialize};

use larmor_core::config::{LaserParams, LaserPolarization};

/// A laser attached to an x boundary. Its oscillation feeds the source
/// term of the Silver-Muller condition on that side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Laser {
    pub params: LaserParams,
    /// Set when a moving window passes the injection plane
    pub disabled: bool,
}

impl Laser {
    pub fn new(params: LaserParams) -> Self {
        Self {
            params,
            disabled: false,
        }
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }

    fn envelope(&self, transverse: &[f64], t: f64) -> f64 {
        if self.disabled {
            return 0.0;
        }
        let space = self
            .params
            .space_profile
            .as_ref()
            .map(|p| p.value_at(transverse))
            .unwrap_or(1.0);
        self.params.a0 * self.params.time_profile.value_at(t) * space
    }

    /// By contribution at the boundary (z-polarized part).
    pub fn amplitude_by(&self, transverse: &[f64], t: f64) -> f64 {
        let env = self.envelope(transverse, t);
        let phase = self.params.omega * t + self.params.phase;
        match self.params.polarization {
            LaserPolarization::Y => 0.0,
            LaserPolarization::Z => env * phase.sin(),
            LaserPolarization::Circular => env * phase.sin() / 2.0f64.sqrt(),
        }
    }

    /// Bz contribution at the boundary (y-polarized part).
    pub fn amplitude_bz(&self, transverse: &[f64], t: f64) -> f64 {
        let env = self.envelope(transverse, t);
        let phase = self.params.omega * t + self.params.phase;
        match self.params.polarization {
            LaserPolarization::Y => env * phase.sin(),
            LaserPolarization::Z => 0.0,
            LaserPolarization::Circular => env * phase.cos() / 2.0f64.sqrt(),
        }
    }

    /// Energy flux through the boundary for the scalar accounting, summed
    /// over one step: S = (E x B)_x with |E| = |B| for the injected wave.
    pub fn injected_energy_rate(&self, transverse: &[f64], t: f64) -> f64 {
        let by = self.amplitude_by(transverse, t);
        let bz = self.amplitude_bz(transverse, t);
        by * by + bz * bz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larmor_core::profile::TimeProfile;

    fn laser(pol: LaserPolarization) -> Laser {
        Laser::new(LaserParams {
            side: 0,
            a0: 2.0,
            omega: 1.0,
            polarization: pol,
            time_profile: TimeProfile::Constant { value: 1.0 },
            space_profile: None,
            phase: 0.0,
        })
    }

    #[test]
    fn y_polarization_drives_bz_only() {
        let l = laser(LaserPolarization::Y);
        let t = std::f64::consts::FRAC_PI_2;
        assert_eq!(l.amplitude_by(&[], t), 0.0);
        assert!((l.amplitude_bz(&[], t) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn circular_polarization_has_constant_intensity() {
        let l = laser(LaserPolarization::Circular);
        for &t in &[0.0, 0.3, 1.1, 2.9] {
            let by = l.amplitude_by(&[], t);
            let bz = l.amplitude_bz(&[], t);
            assert!((by * by + bz * bz - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn disabled_laser_is_silent() {
        let mut l = laser(LaserPolarization::Y);
        l.disable();
        assert_eq!(l.amplitude_bz(&[], 1.0), 0.0);
    }
}
