use serde::{Deserialize, Serialize};

/// Spatial shape evaluated at a position in box coordinates. Used for
/// densities, mean velocities, temperatures, external fields and the
/// transverse extent of lasers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SpatialProfile {
    Constant {
        value: f64,
    },
    /// Flat plateau with linear ramps on each side of axis `axis`.
    Trapezoidal {
        value: f64,
        #[serde(default)]
        axis: usize,
        xvacuum: f64,
        xplateau: f64,
        #[serde(default)]
        xslope1: f64,
        #[serde(default)]
        xslope2: f64,
    },
    /// exp(-(x-center)^2 / (2 sigma^2)) per axis, multiplied together.
    Gaussian {
        value: f64,
        center: Vec<f64>,
        sigma: Vec<f64>,
    },
    /// value * cos(2*pi*x/wavelength + phase) along one axis.
    Cosine {
        value: f64,
        #[serde(default)]
        axis: usize,
        wavelength: f64,
        #[serde(default)]
        phase: f64,
        #[serde(default)]
        base: f64,
    },
}

impl SpatialProfile {
    pub fn constant(value: f64) -> Self {
        SpatialProfile::Constant { value }
    }

    pub fn value_at(&self, pos: &[f64]) -> f64 {
        match self {
            SpatialProfile::Constant { value } => *value,
            SpatialProfile::Trapezoidal {
                value,
                axis,
                xvacuum,
                xplateau,
                xslope1,
                xslope2,
            } => {
                let x = pos[*axis];
                let p0 = xvacuum + xslope1;
                let p1 = xvacuum + xslope1 + xplateau;
                if x < *xvacuum || x > p1 + xslope2 {
                    0.0
                } else if x < p0 {
                    value * (x - xvacuum) / xslope1
                } else if x <= p1 {
                    *value
                } else {
                    value * (1.0 - (x - p1) / xslope2)
                }
            }
            SpatialProfile::Gaussian {
                value,
                center,
                sigma,
            } => {
                let mut v = *value;
                for (i, x) in pos.iter().enumerate() {
                    let c = center.get(i).copied().unwrap_or(0.0);
                    let s = sigma.get(i).copied().unwrap_or(f64::INFINITY);
                    if s.is_finite() {
                        let u = (x - c) / s;
                        v *= (-0.5 * u * u).exp();
                    }
                }
                v
            }
            SpatialProfile::Cosine {
                value,
                axis,
                wavelength,
                phase,
                base,
            } => base + value * (2.0 * std::f64::consts::PI * pos[*axis] / wavelength + phase).cos(),
        }
    }
}

/// Temporal envelope evaluated at the time-centered instant of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TimeProfile {
    Constant {
        #[serde(default = "one")]
        value: f64,
    },
    /// Gaussian centered on `center` with given full width at half maximum.
    Gaussian {
        #[serde(default = "one")]
        value: f64,
        center: f64,
        fwhm: f64,
    },
    /// sin^2 ramp up over `slope`, hold for `plateau`, sin^2 ramp down.
    SinSquared {
        #[serde(default = "one")]
        value: f64,
        #[serde(default)]
        start: f64,
        slope: f64,
        #[serde(default)]
        plateau: f64,
    },
}

fn one() -> f64 {
    1.0
}

impl TimeProfile {
    pub fn value_at(&self, t: f64) -> f64 {
        match self {
            TimeProfile::Constant { value } => *value,
            TimeProfile::Gaussian {
                value,
                center,
                fwhm,
            } => {
                let sigma2 = fwhm * fwhm / (8.0 * std::f64::consts::LN_2);
                value * (-(t - center) * (t - center) / (2.0 * sigma2)).exp()
            }
            TimeProfile::SinSquared {
                value,
                start,
                slope,
                plateau,
            } => {
                let u = t - start;
                if u < 0.0 || u > 2.0 * slope + plateau {
                    0.0
                } else if u < *slope {
                    let s = (0.5 * std::f64::consts::PI * u / slope).sin();
                    value * s * s
                } else if u <= slope + plateau {
                    *value
                } else {
                    let s = (0.5 * std::f64::consts::PI * (u - slope - plateau) / slope).sin();
                    value * (1.0 - s * s)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trapezoid_ramps_and_plateau() {
        let p = SpatialProfile::Trapezoidal {
            value: 2.0,
            axis: 0,
            xvacuum: 1.0,
            xplateau: 4.0,
            xslope1: 2.0,
            xslope2: 2.0,
        };
        assert_eq!(p.value_at(&[0.5]), 0.0);
        assert!((p.value_at(&[2.0]) - 1.0).abs() < 1e-12);
        assert_eq!(p.value_at(&[4.0]), 2.0);
        assert!((p.value_at(&[8.0]) - 1.0).abs() < 1e-12);
        assert_eq!(p.value_at(&[9.5]), 0.0);
    }

    #[test]
    fn sin_squared_envelope_is_flat_on_plateau() {
        let p = TimeProfile::SinSquared {
            value: 3.0,
            start: 0.0,
            slope: 10.0,
            plateau: 5.0,
        };
        assert_eq!(p.value_at(-1.0), 0.0);
        assert!((p.value_at(10.0) - 3.0).abs() < 1e-12);
        assert!((p.value_at(12.0) - 3.0).abs() < 1e-12);
        assert!((p.value_at(5.0) - 1.5).abs() < 1e-12);
        assert_eq!(p.value_at(26.0), 0.0);
    }
}
