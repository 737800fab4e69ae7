use thiserror::Error;

/// Fatal configuration problems, all detected before the time loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read namelist `{path}`: {source}")]
    NamelistRead {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse namelist `{path}`: {message}")]
    NamelistParse { path: String, message: String },

    #[error("`{key}` has {got} components but geometry `{geometry}` needs {expected}")]
    DimensionMismatch {
        key: &'static str,
        geometry: String,
        got: usize,
        expected: usize,
    },

    #[error("number_of_patches[{axis}] = {value} is not a power of two")]
    PatchCountNotPowerOfTwo { axis: usize, value: usize },

    #[error("{total} patches cannot feed {ranks} ranks; every rank needs at least one")]
    TooFewPatches { total: usize, ranks: usize },

    #[error("grid size {cells} along axis {axis} is not divisible by {patches} patches")]
    GridNotDivisible {
        axis: usize,
        cells: usize,
        patches: usize,
    },

    #[error(
        "patch is {cells} cells long on axis {axis}; needs at least {min} for ghost depth {oversize}"
    )]
    PatchTooSmall {
        axis: usize,
        cells: usize,
        min: usize,
        oversize: usize,
    },

    #[error("timestep {timestep} violates the CFL limit {limit}")]
    CflViolated { timestep: f64, limit: f64 },

    #[error("species `{species}`: periodic field boundary on axis {axis} requires periodic particle boundaries")]
    PeriodicMismatch { species: String, axis: usize },

    #[error("interpolation_order must be 2 or 4, got {0}")]
    BadInterpolationOrder(u32),

    #[error("interpolation_order 4 is not supported in 3D")]
    FourthOrder3D,

    #[error("AM cylindrical geometry is not supported by this build")]
    AmCylindricalUnsupported,

    #[error("species `{species}` references unknown species `{target}` as {role}")]
    UnknownSpeciesRef {
        species: String,
        target: String,
        role: &'static str,
    },

    #[error("species `{0}` is massless but uses a non-photon pusher")]
    MasslessPusher(String),

    #[error("laser box_side must be xmin or xmax, got `{0}`")]
    BadLaserSide(String),

    #[error("`{key}` must be positive, got {value}")]
    NotPositive { key: &'static str, value: f64 },

    #[error("{0}")]
    Invalid(String),
}

/// Protocol failures in the inter-rank transport. All fatal.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("tag {tag} already has a posted receive on rank {rank}")]
    TagCollision { rank: usize, tag: u64 },

    #[error("message size mismatch on tag {tag}: expected {expected} bytes, got {got}")]
    SizeMismatch { tag: u64, expected: usize, got: usize },

    #[error("rank {0} is gone; channel disconnected")]
    Disconnected(usize),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("checkpoint `{path}` is not usable: {reason}")]
    BadCheckpoint { path: String, reason: String },

    #[error("non-finite {quantity} detected in patch {patch} at step {step}")]
    NonFinite {
        quantity: &'static str,
        patch: u64,
        step: usize,
    },

    #[error("particle moved {cells} cells in one step in patch {patch}; timestep too large")]
    ParticleEscaped { patch: u64, cells: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
