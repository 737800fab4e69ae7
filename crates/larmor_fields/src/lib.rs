pub mod boundary;
pub mod em;
pub mod exchange;
pub mod field;
pub mod filter;
pub mod laser;
pub mod maxwell;
pub mod poisson;

pub use em::EmFields;
pub use field::{Field, FieldKind};
