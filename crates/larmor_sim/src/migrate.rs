//! Patch migration after a balance step. A moving patch is serialized
//! whole (fields, particles, boundary and laser state) into one compound
//! message, shipped to its new owner and reconstructed there.

use larmor_core::error::Error;
use larmor_core::topology::OwnerTable;

use crate::comm::Communicator;
use crate::patch::Patch;

const MIGRATE_TAG: u64 = 1 << 60;

/// Realize a new ownership table: ship departing patches, receive
/// arriving ones, and return the rank's new ordered patch list with every
/// neighbor-rank table refreshed.
pub fn exchange_patches(
    patches: Vec<Patch>,
    old_owners: &OwnerTable,
    new_owners: &OwnerTable,
    comm: &mut Communicator,
) -> Result<Vec<Patch>, Error> {
    let rank = comm.rank();

    let mut kept: Vec<Patch> = Vec::new();
    for patch in patches {
        let new_owner = new_owners.owner_of(patch.hindex);
        if new_owner == rank {
            kept.push(patch);
        } else {
            let blob =
                bincode::serialize(&patch).map_err(|e| Error::Serialize(e.to_string()))?;
            comm.send(new_owner, MIGRATE_TAG | patch.hindex, blob)?;
        }
    }

    let new_first = new_owners.first_of(rank);
    let new_count = new_owners.count_of(rank);
    for h in new_first..new_first + new_count as u64 {
        let old_owner = old_owners.owner_of(h);
        if old_owner == rank {
            continue;
        }
        let blob = comm.recv(old_owner, MIGRATE_TAG | h)?;
        let mut patch: Patch =
            bincode::deserialize(&blob).map_err(|e| Error::Serialize(e.to_string()))?;
        for sp in &mut patch.species {
            sp.rebuild_operators();
        }
        kept.push(patch);
    }

    kept.sort_by_key(|p| p.hindex);
    for patch in &mut kept {
        patch.update_neighbor_ranks(new_owners);
    }
    debug_assert!(kept.len() == new_count);
    Ok(kept)
}
