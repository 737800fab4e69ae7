pub mod checkpoint;
pub mod diags;

pub use checkpoint::{RankCheckpoint, load_checkpoint, save_checkpoint};
pub use diags::{BinningDump, FieldDump, ScalarWriter, TrackDump};
