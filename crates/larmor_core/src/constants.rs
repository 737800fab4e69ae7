// Normalized units: lengths in c/ω_r, times in 1/ω_r, momenta in m_e c,
// fields in m_e c ω_r / e. In these units c = 1 and the electron has
// mass 1 and charge -1.

/// Speed of light in normalized units
pub const C: f64 = 1.0;

/// Electron mass in normalized units
pub const ELECTRON_MASS: f64 = 1.0;

/// Fine structure constant
pub const ALPHA_FS: f64 = 0.007_297_352_569_3;

/// Normalized Schwinger field E_s = m_e c ω_r / e units, for the
/// 800 nm Ti:sapphire reference frequency
pub const SCHWINGER_E_FIELD: f64 = 5.659_070_27e5;

/// Normalized Compton wavelength ƛ_c ω_r / c at the same reference frequency
pub const NORMALIZED_COMPTON_WAVELENGTH: f64 = 3.032_467_6e-6;

/// Factor 3·v_thermal above which a thermalizing boundary redraws momenta
pub const THERMAL_REDRAW_FACTOR: f64 = 3.0;
