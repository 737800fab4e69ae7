use serde::{Deserialize, Serialize};

/// Dimensionality of the simulation box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Geometry {
    #[serde(rename = "1dcartesian", alias = "1Dcartesian")]
    Cartesian1D,
    #[serde(rename = "2dcartesian", alias = "2Dcartesian")]
    Cartesian2D,
    #[serde(rename = "3dcartesian", alias = "3Dcartesian")]
    Cartesian3D,
    #[serde(rename = "amcylindrical", alias = "AMcylindrical")]
    AmCylindrical,
}

impl Geometry {
    pub fn ndim(self) -> usize {
        match self {
            Geometry::Cartesian1D => 1,
            Geometry::Cartesian2D | Geometry::AmCylindrical => 2,
            Geometry::Cartesian3D => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Geometry::Cartesian1D => "1dcartesian",
            Geometry::Cartesian2D => "2dcartesian",
            Geometry::Cartesian3D => "3dcartesian",
            Geometry::AmCylindrical => "amcylindrical",
        }
    }
}

/// Largest stable timestep for the Yee scheme: 1/sqrt(sum 1/dx_i^2).
pub fn cfl_limit(cell_length: &[f64]) -> f64 {
    let inv2: f64 = cell_length.iter().map(|dx| 1.0 / (dx * dx)).sum();
    1.0 / inv2.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cfl_limit_matches_hand_values() {
        assert!((cfl_limit(&[0.1]) - 0.1).abs() < 1e-12);
        let limit = cfl_limit(&[0.1, 0.1]);
        assert!((limit - 0.1 / 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn geometry_dims() {
        assert_eq!(Geometry::Cartesian1D.ndim(), 1);
        assert_eq!(Geometry::Cartesian3D.ndim(), 3);
    }
}
