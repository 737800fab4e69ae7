pub mod boundary;
pub mod collisions;
pub mod interp;
pub mod ionization;
pub mod pair_production;
pub mod particles;
pub mod project;
pub mod pusher;
pub mod radiation;
pub mod species;
pub mod tables;

pub use particles::Particles;
pub use species::Species;
