//! Versioned full-state checkpoints.
//!
//! Every rank writes one file per dump holding its serialized patches
//! plus the global tables needed to resume: the patch-count table, the
//! moving-window shift and the step counter. A run id ties the files of
//! one dump together.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use larmor_core::error::Error;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct RankCheckpoint {
    pub version: u32,
    pub run_id: Uuid,
    pub step: usize,
    pub rank: usize,
    pub n_ranks: usize,
    /// patch-to-rank assignment at dump time
    pub patch_count: Vec<usize>,
    /// moving-window cells already shifted
    pub window_cells_moved: usize,
    /// bincode blob of this rank's ordered patch list
    pub patches: Vec<u8>,
}

fn rank_file(dir: &Path, rank: usize) -> PathBuf {
    dir.join(format!("dump-rank{rank:04}.bin"))
}

pub fn save_checkpoint(dir: &Path, checkpoint: &RankCheckpoint) -> Result<(), Error> {
    fs::create_dir_all(dir)?;
    let data =
        bincode::serialize(checkpoint).map_err(|e| Error::Serialize(e.to_string()))?;
    fs::write(rank_file(dir, checkpoint.rank), data)?;
    Ok(())
}

pub fn load_checkpoint(dir: &Path, rank: usize) -> Result<RankCheckpoint, Error> {
    let path = rank_file(dir, rank);
    let data = fs::read(&path)?;
    let checkpoint: RankCheckpoint =
        bincode::deserialize(&data).map_err(|e| Error::BadCheckpoint {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(Error::BadCheckpoint {
            path: path.display().to_string(),
            reason: format!(
                "version {} but this build reads {}",
                checkpoint.version, CHECKPOINT_VERSION
            ),
        });
    }
    if checkpoint.rank != rank {
        return Err(Error::BadCheckpoint {
            path: path.display().to_string(),
            reason: format!("file belongs to rank {}", checkpoint.rank),
        });
    }
    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ck = RankCheckpoint {
            version: CHECKPOINT_VERSION,
            run_id: Uuid::new_v4(),
            step: 1234,
            rank: 1,
            n_ranks: 4,
            patch_count: vec![3, 3, 1, 1],
            window_cells_moved: 17,
            patches: vec![1, 2, 3, 4],
        };
        save_checkpoint(dir.path(), &ck).unwrap();
        let back = load_checkpoint(dir.path(), 1).unwrap();
        assert_eq!(back.step, 1234);
        assert_eq!(back.patch_count, vec![3, 3, 1, 1]);
        assert_eq!(back.patches, vec![1, 2, 3, 4]);
        assert_eq!(back.run_id, ck.run_id);
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(rank_file(dir.path(), 0), b"garbage").unwrap();
        let err = load_checkpoint(dir.path(), 0).unwrap_err();
        assert!(matches!(err, Error::BadCheckpoint { .. }));
    }

    #[test]
    fn wrong_rank_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ck = RankCheckpoint {
            version: CHECKPOINT_VERSION,
            run_id: Uuid::new_v4(),
            step: 0,
            rank: 2,
            n_ranks: 4,
            patch_count: vec![1; 4],
            window_cells_moved: 0,
            patches: Vec::new(),
        };
        save_checkpoint(dir.path(), &ck).unwrap();
        // read it back as if it were rank 2's slot under rank 0's name
        std::fs::rename(rank_file(dir.path(), 2), rank_file(dir.path(), 0)).unwrap();
        let err = load_checkpoint(dir.path(), 0).unwrap_err();
        assert!(matches!(err, Error::BadCheckpoint { .. }));
    }
}
