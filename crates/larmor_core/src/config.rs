//! Namelist blocks and their resolution into run parameters.
//!
//! A run is described by one or more TOML namelists given on the command
//! line. Later files override scalar keys of earlier ones and append to
//! list blocks. After merging, [`SimParams::resolve`] derives every
//! quantity the engine needs and performs the whole configuration check;
//! nothing after it is allowed to fail on user input.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{Geometry, cfl_limit};
use crate::profile::{SpatialProfile, TimeProfile};

// ---------------------------------------------------------------------------
// Raw namelist blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namelist {
    pub main: MainBlock,
    #[serde(default)]
    pub species: Vec<SpeciesBlock>,
    #[serde(default)]
    pub laser: Vec<LaserBlock>,
    #[serde(default)]
    pub external_field: Vec<ExternalFieldBlock>,
    #[serde(default)]
    pub antenna: Vec<AntennaBlock>,
    #[serde(default)]
    pub load_balancing: Option<LoadBalancingBlock>,
    #[serde(default)]
    pub collisions: Vec<CollisionsBlock>,
    #[serde(default)]
    pub radiation_reaction: Option<RadiationReactionBlock>,
    #[serde(default)]
    pub multiphoton_breit_wheeler: Option<PairProductionBlock>,
    #[serde(default)]
    pub moving_window: Option<MovingWindowBlock>,
    #[serde(default)]
    pub checkpoints: Option<CheckpointBlock>,
    #[serde(default)]
    pub diag_scalar: Option<DiagScalarBlock>,
    #[serde(default)]
    pub diag_fields: Vec<DiagFieldsBlock>,
    #[serde(default)]
    pub diag_track_particles: Vec<DiagTrackBlock>,
    #[serde(default)]
    pub diag_particle_binning: Vec<DiagBinningBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainBlock {
    pub geometry: Geometry,
    #[serde(default = "default_order")]
    pub interpolation_order: u32,
    pub cell_length: Vec<f64>,
    pub grid_length: Vec<f64>,
    pub timestep: f64,
    pub simulation_time: f64,
    pub number_of_patches: Vec<usize>,
    /// Two keywords per axis: [[xmin, xmax], [ymin, ymax], ...]
    pub em_boundary_conditions: Vec<[EmBoundary; 2]>,
    /// Cluster width in cells for particle bins; 0 selects one bin per patch
    #[serde(default)]
    pub clrw: usize,
    #[serde(default)]
    pub solve_poisson: bool,
    #[serde(default = "default_poisson_iter")]
    pub poisson_max_iteration: usize,
    #[serde(default = "default_poisson_err")]
    pub poisson_max_error: f64,
    #[serde(default)]
    pub current_filter_passes: usize,
    #[serde(default = "default_clean_every")]
    pub every_clean_particles_overhead: usize,
    #[serde(default)]
    pub random_seed: u64,
}

fn default_order() -> u32 {
    2
}
fn default_poisson_iter() -> usize {
    50_000
}
fn default_poisson_err() -> f64 {
    1e-14
}
fn default_clean_every() -> usize {
    20
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmBoundary {
    Periodic,
    #[serde(rename = "silver-muller", alias = "silver_muller")]
    SilverMuller,
    Reflective,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartBoundary {
    Periodic,
    Reflective,
    Remove,
    Stop,
    Thermalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PusherKind {
    Boris,
    Vay,
    Photon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiationModel {
    None,
    /// Landau-Lifshitz continuous friction
    Ll,
    /// Quantum-corrected Landau-Lifshitz
    Cll,
    /// Niel stochastic (Fokker-Planck) correction
    Niel,
    /// Discrete Monte-Carlo photon emission
    Mc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionInit {
    Regular,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesBlock {
    pub name: String,
    pub mass: f64,
    pub charge: f64,
    #[serde(default = "default_position_init")]
    pub position_initialization: PositionInit,
    #[serde(default)]
    pub particles_per_cell: usize,
    pub density: Option<SpatialProfile>,
    #[serde(default)]
    pub mean_velocity: Vec<f64>,
    #[serde(default)]
    pub thermal_velocity: Vec<f64>,
    pub boundary_conditions: Vec<[PartBoundary; 2]>,
    #[serde(default)]
    pub time_frozen: f64,
    #[serde(default = "default_radiation")]
    pub radiation_model: RadiationModel,
    /// Receives Monte-Carlo photons when radiation_model = "mc"
    pub radiated_photon_species: Option<String>,
    /// [electron-like, positron-like] pair species for photon decay
    pub multiphoton_breit_wheeler: Option<[String; 2]>,
    pub pusher: Option<PusherKind>,
    /// Atomic number for field ionization; absent means no ionization
    pub atomic_number: Option<u32>,
    pub ionization_electrons: Option<String>,
}

fn default_position_init() -> PositionInit {
    PositionInit::Regular
}
fn default_radiation() -> RadiationModel {
    RadiationModel::None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaserPolarization {
    Y,
    Z,
    Circular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserBlock {
    /// "xmin" or "xmax"
    pub box_side: String,
    pub a0: f64,
    #[serde(default = "one_f64")]
    pub omega: f64,
    #[serde(default = "default_polarization")]
    pub polarization: LaserPolarization,
    pub time_profile: TimeProfile,
    /// Transverse extent in 2D/3D; ignored in 1D
    pub space_profile: Option<SpatialProfile>,
    #[serde(default)]
    pub phase: f64,
}

fn one_f64() -> f64 {
    1.0
}
fn default_polarization() -> LaserPolarization {
    LaserPolarization::Y
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalFieldBlock {
    /// Ex, Ey, Ez, Bx, By or Bz
    pub field: String,
    pub profile: SpatialProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntennaBlock {
    /// Jx, Jy or Jz
    pub field: String,
    pub space_profile: SpatialProfile,
    pub time_profile: TimeProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingBlock {
    #[serde(default = "default_balance_every")]
    pub every: usize,
    #[serde(default = "one_f64")]
    pub cell_load: f64,
    #[serde(default = "default_frozen_load")]
    pub frozen_particle_load: f64,
    #[serde(default = "default_true")]
    pub initial_balance: bool,
}

fn default_balance_every() -> usize {
    150
}
fn default_frozen_load() -> f64 {
    0.1
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionsBlock {
    pub species1: Vec<String>,
    pub species2: Vec<String>,
    /// 0 requests the automatic Coulomb logarithm from the Debye length
    #[serde(default)]
    pub coulomb_log: f64,
    #[serde(default = "one_usize")]
    pub every: usize,
    #[serde(default)]
    pub ionizing: bool,
}

fn one_usize() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiationReactionBlock {
    /// Below this chi the particle does not radiate at all
    #[serde(default = "default_chi_floor")]
    pub minimum_chi_continuous: f64,
    /// Above this chi the Monte-Carlo model takes over from Niel/CLL
    #[serde(default = "default_chi_mc")]
    pub minimum_chi_discontinuous: f64,
    #[serde(default = "default_table_size")]
    pub table_points: usize,
}

fn default_chi_floor() -> f64 {
    1e-3
}
fn default_chi_mc() -> f64 {
    1e-2
}
fn default_table_size() -> usize {
    128
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairProductionBlock {
    #[serde(default = "default_chi_pair")]
    pub minimum_chi_photon: f64,
    #[serde(default = "default_table_size")]
    pub table_points: usize,
    /// Macro-pairs created per decay event, per species
    #[serde(default = "default_pair_sampling")]
    pub pair_creation_sampling: [u32; 2],
}

fn default_chi_pair() -> f64 {
    1e-2
}
fn default_pair_sampling() -> [u32; 2] {
    [1, 1]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingWindowBlock {
    #[serde(default)]
    pub time_start: f64,
    pub velocity_x: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointBlock {
    pub dump_every: usize,
    #[serde(default)]
    pub exit_after_dump: bool,
    /// Directory holding the checkpoint to restart from
    pub restart_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagScalarBlock {
    pub every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagFieldsBlock {
    pub every: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagTrackBlock {
    pub species: String,
    pub every: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinningAxisKind {
    X,
    Y,
    Z,
    Px,
    Py,
    Pz,
    Gamma,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinningAxis {
    pub kind: BinningAxisKind,
    pub min: f64,
    pub max: f64,
    pub bins: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagBinningBlock {
    pub species: Vec<String>,
    pub every: usize,
    pub axes: Vec<BinningAxis>,
}

// ---------------------------------------------------------------------------
// Namelist loading and merging
// ---------------------------------------------------------------------------

/// Read and merge namelists in order; later files override scalar keys and
/// append to array-of-table blocks.
pub fn load_namelists(paths: &[impl AsRef<Path>]) -> Result<Namelist, ConfigError> {
    let mut merged: Option<toml::Value> = None;
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::NamelistRead {
            path: path.display().to_string(),
            source,
        })?;
        let value: toml::Value = toml::from_str(&text).map_err(|e| ConfigError::NamelistParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        merged = Some(match merged {
            None => value,
            Some(mut base) => {
                merge_toml(&mut base, value);
                base
            }
        });
    }
    let merged = merged.ok_or_else(|| ConfigError::Invalid("no namelist given".into()))?;
    merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::NamelistParse {
            path: "<merged>".into(),
            message: e.to_string(),
        })
}

fn merge_toml(base: &mut toml::Value, other: toml::Value) {
    match (base, other) {
        (toml::Value::Table(b), toml::Value::Table(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge_toml(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (toml::Value::Array(b), toml::Value::Array(o)) => b.extend(o),
        (slot, v) => *slot = v,
    }
}

// ---------------------------------------------------------------------------
// Resolved parameters
// ---------------------------------------------------------------------------

/// Everything derived from the namelist, validated once at start-up and
/// immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    pub geometry: Geometry,
    pub ndim: usize,
    pub order: u32,
    pub cell_length: [f64; 3],
    pub cell_volume: f64,
    pub timestep: f64,
    pub n_time: usize,
    pub sim_time: f64,
    pub grid_length: [f64; 3],
    /// Global grid cells per axis
    pub n_space_global: [usize; 3],
    pub number_of_patches: [usize; 3],
    pub tot_patches: usize,
    /// Grid cells per patch per axis
    pub n_space: [usize; 3],
    pub patch_length: [f64; 3],
    /// Ghost-cell depth, identical for every field
    pub oversize: [usize; 3],
    /// Particle bin width in cells along x
    pub clrw: usize,
    pub em_bc: [[EmBoundary; 2]; 3],
    pub solve_poisson: bool,
    pub poisson_max_iteration: usize,
    pub poisson_max_error: f64,
    pub current_filter_passes: usize,
    pub every_clean_particles_overhead: usize,
    pub seed: u64,
    pub species: Vec<SpeciesParams>,
    pub lasers: Vec<LaserParams>,
    pub external_fields: Vec<ExternalFieldBlock>,
    pub antennas: Vec<AntennaBlock>,
    pub load_balancing: Option<LoadBalancingBlock>,
    pub collisions: Vec<CollisionsParams>,
    pub radiation: RadiationReactionBlock,
    pub pair_production: PairProductionBlock,
    pub moving_window: Option<MovingWindowBlock>,
    pub checkpoints: Option<CheckpointBlock>,
    pub diags: DiagParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesParams {
    pub index: usize,
    pub name: String,
    pub mass: f64,
    pub charge: f64,
    pub pusher: PusherKind,
    pub position_initialization: PositionInit,
    pub particles_per_cell: usize,
    pub density: Option<SpatialProfile>,
    pub mean_velocity: [f64; 3],
    pub thermal_velocity: [f64; 3],
    /// Thermal momentum spread m*v_th, used by the Maxwellian sampler
    pub thermal_momentum: [f64; 3],
    pub bc: [[PartBoundary; 2]; 3],
    pub time_frozen: f64,
    pub radiation_model: RadiationModel,
    pub radiated_photon_species: Option<usize>,
    pub pair_species: Option<[usize; 2]>,
    pub ionization: Option<IonizationParams>,
    /// Needs per-particle ids (referenced by a tracking diagnostic)
    pub tracked: bool,
}

impl SpeciesParams {
    /// Monte-Carlo models need per-particle chi and optical depth.
    pub fn needs_mc_state(&self) -> bool {
        matches!(
            self.radiation_model,
            RadiationModel::Niel | RadiationModel::Mc
        ) || self.pair_species.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IonizationParams {
    pub atomic_number: u32,
    pub electron_species: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserParams {
    /// 0 = xmin, 1 = xmax
    pub side: usize,
    pub a0: f64,
    pub omega: f64,
    pub polarization: LaserPolarization,
    pub time_profile: TimeProfile,
    pub space_profile: Option<SpatialProfile>,
    pub phase: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollisionsParams {
    pub species1: Vec<usize>,
    pub species2: Vec<usize>,
    pub intra: bool,
    pub coulomb_log: f64,
    pub every: usize,
    pub ionizing: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagParams {
    pub scalar_every: Option<usize>,
    pub fields: Vec<DiagFieldsBlock>,
    /// (species index, cadence)
    pub track: Vec<(usize, usize)>,
    pub binning: Vec<BinningParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinningParams {
    pub species: Vec<usize>,
    pub every: usize,
    pub axes: Vec<BinningAxis>,
}

impl SimParams {
    pub fn resolve(input: &Namelist, n_ranks: usize) -> Result<SimParams, ConfigError> {
        let main = &input.main;
        let geometry = main.geometry;
        if geometry == Geometry::AmCylindrical {
            return Err(ConfigError::AmCylindricalUnsupported);
        }
        let ndim = geometry.ndim();

        if main.interpolation_order != 2 && main.interpolation_order != 4 {
            return Err(ConfigError::BadInterpolationOrder(main.interpolation_order));
        }
        if main.interpolation_order == 4 && ndim == 3 {
            return Err(ConfigError::FourthOrder3D);
        }

        check_dim("cell_length", geometry, main.cell_length.len(), ndim)?;
        check_dim("grid_length", geometry, main.grid_length.len(), ndim)?;
        check_dim(
            "number_of_patches",
            geometry,
            main.number_of_patches.len(),
            ndim,
        )?;
        check_dim(
            "em_boundary_conditions",
            geometry,
            main.em_boundary_conditions.len(),
            ndim,
        )?;

        if main.timestep <= 0.0 {
            return Err(ConfigError::NotPositive {
                key: "timestep",
                value: main.timestep,
            });
        }
        let limit = cfl_limit(&main.cell_length);
        if main.timestep > limit {
            return Err(ConfigError::CflViolated {
                timestep: main.timestep,
                limit,
            });
        }

        let mut cell_length = [0.0f64; 3];
        let mut grid_length = [0.0f64; 3];
        let mut n_space_global = [1usize; 3];
        let mut number_of_patches = [1usize; 3];
        let mut cell_volume = 1.0;
        for i in 0..ndim {
            cell_length[i] = main.cell_length[i];
            if cell_length[i] <= 0.0 {
                return Err(ConfigError::NotPositive {
                    key: "cell_length",
                    value: cell_length[i],
                });
            }
            n_space_global[i] = (main.grid_length[i] / cell_length[i]).round() as usize;
            // snap grid_length onto a whole number of cells
            grid_length[i] = n_space_global[i] as f64 * cell_length[i];
            cell_volume *= cell_length[i];
            number_of_patches[i] = main.number_of_patches[i];
            if !number_of_patches[i].is_power_of_two() {
                return Err(ConfigError::PatchCountNotPowerOfTwo {
                    axis: i,
                    value: number_of_patches[i],
                });
            }
        }

        let tot_patches: usize = number_of_patches[..ndim].iter().product();
        if tot_patches < n_ranks {
            return Err(ConfigError::TooFewPatches {
                total: tot_patches,
                ranks: n_ranks,
            });
        }

        let oversize_each = main.interpolation_order as usize;
        let mut n_space = [1usize; 3];
        let mut patch_length = [0.0f64; 3];
        let mut oversize = [0usize; 3];
        for i in 0..ndim {
            if n_space_global[i] % number_of_patches[i] != 0 {
                return Err(ConfigError::GridNotDivisible {
                    axis: i,
                    cells: n_space_global[i],
                    patches: number_of_patches[i],
                });
            }
            n_space[i] = n_space_global[i] / number_of_patches[i];
            oversize[i] = oversize_each;
            if n_space[i] <= 2 * oversize[i] + 1 {
                return Err(ConfigError::PatchTooSmall {
                    axis: i,
                    cells: n_space[i],
                    min: 2 * oversize[i] + 2,
                    oversize: oversize[i],
                });
            }
            patch_length[i] = n_space[i] as f64 * cell_length[i];
        }

        let clrw = if main.clrw == 0 {
            n_space[0]
        } else {
            if n_space[0] % main.clrw != 0 {
                return Err(ConfigError::Invalid(format!(
                    "clrw = {} must divide the patch width {} cells",
                    main.clrw, n_space[0]
                )));
            }
            main.clrw
        };

        let mut em_bc = [[EmBoundary::Periodic; 2]; 3];
        for i in 0..ndim {
            em_bc[i] = main.em_boundary_conditions[i];
            // both sides of a periodic axis must agree
            if (em_bc[i][0] == EmBoundary::Periodic) != (em_bc[i][1] == EmBoundary::Periodic) {
                return Err(ConfigError::Invalid(format!(
                    "axis {i}: periodic field boundaries must be periodic on both sides"
                )));
            }
        }

        // the per-species exchange tag space holds ten species
        if input.species.len() > 10 {
            return Err(ConfigError::Invalid(format!(
                "at most 10 species are supported, got {}",
                input.species.len()
            )));
        }

        let find_species = |list: &[SpeciesBlock], name: &str| -> Option<usize> {
            list.iter().position(|s| s.name == name)
        };

        let tracked: Vec<&str> = input
            .diag_track_particles
            .iter()
            .map(|d| d.species.as_str())
            .collect();

        let mut species = Vec::with_capacity(input.species.len());
        for (index, s) in input.species.iter().enumerate() {
            check_dim(
                "boundary_conditions",
                geometry,
                s.boundary_conditions.len(),
                ndim,
            )?;
            let mut bc = [[PartBoundary::Periodic; 2]; 3];
            for i in 0..ndim {
                bc[i] = s.boundary_conditions[i];
                for side in 0..2 {
                    let em_periodic = em_bc[i][side] == EmBoundary::Periodic;
                    let part_periodic = bc[i][side] == PartBoundary::Periodic;
                    if em_periodic != part_periodic {
                        return Err(ConfigError::PeriodicMismatch {
                            species: s.name.clone(),
                            axis: i,
                        });
                    }
                }
            }

            let pusher = match s.pusher {
                Some(p) => p,
                None if s.mass == 0.0 => PusherKind::Photon,
                None => PusherKind::Boris,
            };
            if s.mass == 0.0 && pusher != PusherKind::Photon {
                return Err(ConfigError::MasslessPusher(s.name.clone()));
            }

            let radiated_photon_species = match (&s.radiation_model, &s.radiated_photon_species) {
                (RadiationModel::Mc, Some(name)) => Some(
                    find_species(&input.species, name).ok_or_else(|| {
                        ConfigError::UnknownSpeciesRef {
                            species: s.name.clone(),
                            target: name.clone(),
                            role: "radiated_photon_species",
                        }
                    })?,
                ),
                _ => None,
            };

            let pair_species = match &s.multiphoton_breit_wheeler {
                Some([e, p]) => {
                    let ie = find_species(&input.species, e).ok_or_else(|| {
                        ConfigError::UnknownSpeciesRef {
                            species: s.name.clone(),
                            target: e.clone(),
                            role: "multiphoton_breit_wheeler",
                        }
                    })?;
                    let ip = find_species(&input.species, p).ok_or_else(|| {
                        ConfigError::UnknownSpeciesRef {
                            species: s.name.clone(),
                            target: p.clone(),
                            role: "multiphoton_breit_wheeler",
                        }
                    })?;
                    Some([ie, ip])
                }
                None => None,
            };

            let ionization = match (&s.atomic_number, &s.ionization_electrons) {
                (Some(z), Some(name)) => Some(IonizationParams {
                    atomic_number: *z,
                    electron_species: find_species(&input.species, name).ok_or_else(|| {
                        ConfigError::UnknownSpeciesRef {
                            species: s.name.clone(),
                            target: name.clone(),
                            role: "ionization_electrons",
                        }
                    })?,
                }),
                (Some(_), None) => {
                    return Err(ConfigError::Invalid(format!(
                        "species `{}` has atomic_number but no ionization_electrons",
                        s.name
                    )));
                }
                _ => None,
            };

            let mut mean_velocity = [0.0f64; 3];
            let mut thermal_velocity = [0.0f64; 3];
            let mut thermal_momentum = [0.0f64; 3];
            for i in 0..3 {
                mean_velocity[i] = s.mean_velocity.get(i).copied().unwrap_or(0.0);
                thermal_velocity[i] = s.thermal_velocity.get(i).copied().unwrap_or(0.0);
                thermal_momentum[i] = s.mass * thermal_velocity[i];
            }

            species.push(SpeciesParams {
                index,
                name: s.name.clone(),
                mass: s.mass,
                charge: s.charge,
                pusher,
                position_initialization: s.position_initialization,
                particles_per_cell: s.particles_per_cell,
                density: s.density.clone(),
                mean_velocity,
                thermal_velocity,
                thermal_momentum,
                bc,
                time_frozen: s.time_frozen,
                radiation_model: s.radiation_model,
                radiated_photon_species,
                pair_species,
                ionization,
                tracked: tracked.contains(&s.name.as_str()),
            });
        }

        let mut lasers = Vec::with_capacity(input.laser.len());
        for l in &input.laser {
            let side = match l.box_side.as_str() {
                "xmin" => 0,
                "xmax" => 1,
                other => return Err(ConfigError::BadLaserSide(other.to_string())),
            };
            if em_bc[0][side] != EmBoundary::SilverMuller {
                return Err(ConfigError::Invalid(format!(
                    "laser on {} needs a silver-muller boundary there",
                    l.box_side
                )));
            }
            lasers.push(LaserParams {
                side,
                a0: l.a0,
                omega: l.omega,
                polarization: l.polarization,
                time_profile: l.time_profile.clone(),
                space_profile: l.space_profile.clone(),
                phase: l.phase,
            });
        }

        for f in &input.external_field {
            if !matches!(f.field.as_str(), "Ex" | "Ey" | "Ez" | "Bx" | "By" | "Bz") {
                return Err(ConfigError::Invalid(format!(
                    "external field `{}` is not one of Ex..Bz",
                    f.field
                )));
            }
        }
        for a in &input.antenna {
            if !matches!(a.field.as_str(), "Jx" | "Jy" | "Jz") {
                return Err(ConfigError::Invalid(format!(
                    "antenna field `{}` is not one of Jx..Jz",
                    a.field
                )));
            }
        }

        let mut collisions = Vec::with_capacity(input.collisions.len());
        for c in &input.collisions {
            let resolve_group = |names: &[String]| -> Result<Vec<usize>, ConfigError> {
                names
                    .iter()
                    .map(|n| {
                        find_species(&input.species, n).ok_or_else(|| {
                            ConfigError::UnknownSpeciesRef {
                                species: "collisions".into(),
                                target: n.clone(),
                                role: "collision group",
                            }
                        })
                    })
                    .collect()
            };
            let g1 = resolve_group(&c.species1)?;
            let g2 = resolve_group(&c.species2)?;
            let intra = g1 == g2;
            collisions.push(CollisionsParams {
                species1: g1,
                species2: g2,
                intra,
                coulomb_log: c.coulomb_log,
                every: c.every.max(1),
                ionizing: c.ionizing,
            });
        }

        let mut track = Vec::new();
        for d in &input.diag_track_particles {
            let idx = find_species(&input.species, &d.species).ok_or_else(|| {
                ConfigError::UnknownSpeciesRef {
                    species: "diag_track_particles".into(),
                    target: d.species.clone(),
                    role: "tracked species",
                }
            })?;
            track.push((idx, d.every));
        }

        let mut binning = Vec::new();
        for d in &input.diag_particle_binning {
            let sp: Result<Vec<usize>, ConfigError> = d
                .species
                .iter()
                .map(|n| {
                    find_species(&input.species, n).ok_or_else(|| ConfigError::UnknownSpeciesRef {
                        species: "diag_particle_binning".into(),
                        target: n.clone(),
                        role: "binned species",
                    })
                })
                .collect();
            binning.push(BinningParams {
                species: sp?,
                every: d.every,
                axes: d.axes.clone(),
            });
        }

        if input.moving_window.is_some() && em_bc[0][0] == EmBoundary::Periodic {
            return Err(ConfigError::Invalid(
                "a moving window cannot run with periodic x boundaries".into(),
            ));
        }

        let n_time = (main.simulation_time / main.timestep).ceil() as usize;

        Ok(SimParams {
            geometry,
            ndim,
            order: main.interpolation_order,
            cell_length,
            cell_volume,
            timestep: main.timestep,
            n_time,
            sim_time: main.simulation_time,
            grid_length,
            n_space_global,
            number_of_patches,
            tot_patches,
            n_space,
            patch_length,
            oversize,
            clrw,
            em_bc,
            solve_poisson: main.solve_poisson,
            poisson_max_iteration: main.poisson_max_iteration,
            poisson_max_error: main.poisson_max_error,
            current_filter_passes: main.current_filter_passes,
            every_clean_particles_overhead: main.every_clean_particles_overhead.max(1),
            seed: main.random_seed,
            species,
            lasers,
            external_fields: input.external_field.clone(),
            antennas: input.antenna.clone(),
            load_balancing: input.load_balancing.clone(),
            collisions,
            radiation: input
                .radiation_reaction
                .clone()
                .unwrap_or_else(default_radiation_block),
            pair_production: input
                .multiphoton_breit_wheeler
                .clone()
                .unwrap_or_else(default_pair_block),
            moving_window: input.moving_window.clone(),
            checkpoints: input.checkpoints.clone(),
            diags: DiagParams {
                scalar_every: input.diag_scalar.as_ref().map(|d| d.every),
                fields: input.diag_fields.clone(),
                track,
                binning,
            },
        })
    }

    /// Periodicity per axis as seen by the patch topology.
    pub fn periodic(&self) -> [bool; 3] {
        let mut p = [false; 3];
        for i in 0..self.ndim {
            p[i] = self.em_bc[i][0] == EmBoundary::Periodic;
        }
        p
    }

    /// Low edge of a patch along `axis` given its grid coordinate.
    pub fn patch_min(&self, patch_coord: usize, axis: usize) -> f64 {
        patch_coord as f64 * self.patch_length[axis]
    }
}

fn default_radiation_block() -> RadiationReactionBlock {
    RadiationReactionBlock {
        minimum_chi_continuous: default_chi_floor(),
        minimum_chi_discontinuous: default_chi_mc(),
        table_points: default_table_size(),
    }
}

fn default_pair_block() -> PairProductionBlock {
    PairProductionBlock {
        minimum_chi_photon: default_chi_pair(),
        table_points: default_table_size(),
        pair_creation_sampling: default_pair_sampling(),
    }
}

fn check_dim(
    key: &'static str,
    geometry: Geometry,
    got: usize,
    expected: usize,
) -> Result<(), ConfigError> {
    if got != expected {
        return Err(ConfigError::DimensionMismatch {
            key,
            geometry: geometry.name().to_string(),
            got,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_deck() -> Namelist {
        toml::from_str(
            r#"
            [main]
            geometry = "1dcartesian"
            cell_length = [0.1]
            grid_length = [102.4]
            timestep = 0.08
            simulation_time = 16.0
            number_of_patches = [32]
            em_boundary_conditions = [["periodic", "periodic"]]

            [[species]]
            name = "electrons"
            mass = 1.0
            charge = -1.0
            particles_per_cell = 8
            density = { shape = "constant", value = 1.0 }
            boundary_conditions = [["periodic", "periodic"]]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_grid_quantities() {
        let params = SimParams::resolve(&base_deck(), 4).unwrap();
        assert_eq!(params.n_space_global[0], 1024);
        assert_eq!(params.n_space[0], 32);
        assert_eq!(params.oversize[0], 2);
        assert_eq!(params.clrw, 32);
        assert_eq!(params.n_time, 200);
        assert_eq!(params.species.len(), 1);
        assert_eq!(params.species[0].pusher, PusherKind::Boris);
    }

    #[test]
    fn rejects_non_power_of_two_patches() {
        let mut deck = base_deck();
        deck.main.number_of_patches = vec![12];
        let err = SimParams::resolve(&deck, 1).unwrap_err();
        assert!(matches!(err, ConfigError::PatchCountNotPowerOfTwo { .. }));
    }

    #[test]
    fn rejects_cfl_violation() {
        let mut deck = base_deck();
        deck.main.timestep = 0.11;
        let err = SimParams::resolve(&deck, 1).unwrap_err();
        assert!(matches!(err, ConfigError::CflViolated { .. }));
    }

    #[test]
    fn rejects_periodic_mismatch() {
        let mut deck = base_deck();
        deck.species[0].boundary_conditions = vec![[PartBoundary::Remove, PartBoundary::Remove]];
        let err = SimParams::resolve(&deck, 1).unwrap_err();
        assert!(matches!(err, ConfigError::PeriodicMismatch { .. }));
    }

    #[test]
    fn rejects_more_ranks_than_patches() {
        let err = SimParams::resolve(&base_deck(), 64).unwrap_err();
        assert!(matches!(err, ConfigError::TooFewPatches { .. }));
    }

    #[test]
    fn merge_appends_species_and_overrides_scalars() {
        let mut a: toml::Value = toml::from_str(
            r#"
            [main]
            timestep = 0.08
            [[species]]
            name = "electrons"
            "#,
        )
        .unwrap();
        let b: toml::Value = toml::from_str(
            r#"
            [main]
            timestep = 0.05
            [[species]]
            name = "ions"
            "#,
        )
        .unwrap();
        merge_toml(&mut a, b);
        let main = a.get("main").unwrap();
        assert_eq!(main.get("timestep").unwrap().as_float(), Some(0.05));
        assert_eq!(a.get("species").unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let mut deck = base_deck();
        deck.main.cell_length = vec![0.1, 0.1];
        let err = SimParams::resolve(&deck, 1).unwrap_err();
        assert!(matches!(err, ConfigError::DimensionMismatch { .. }));
    }
}
