//! Per-axis migration of particles leaving their patch.
//!
//! Axis by axis: every species' container is scanned for particles beyond
//! the patch bounds; they are packed into six direction-tagged buffers,
//! marked for compaction at home, and shipped to the neighbor (size first,
//! then payload). Same-rank neighbors skip the transport and append
//! directly. Arrivals are integrated before the next axis so diagonal
//! movers reach their corner patch in two hops.

use larmor_core::SimParams;
use larmor_core::error::{CommError, Error};
use larmor_core::topology::NO_NEIGHBOR;
use larmor_particles::Particles;

use crate::comm::Communicator;
use crate::patch::Patch;
use crate::sync::SyncCtx;

// particle messages live in their own tag space, far from field tags
fn particle_tag(sender: u64, ispec: usize, axis: usize, side: usize, size_msg: bool) -> u64 {
    (1u64 << 62)
        | (sender << 12)
        | ((ispec as u64) << 4)
        | ((axis as u64) << 2)
        | ((side as u64) << 1)
        | size_msg as u64
}

/// Run the full exchange over every axis for all species.
pub fn exchange_particles(
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
) -> Result<(), Error> {
    for axis in 0..ctx.params.ndim {
        exchange_axis(patches, comm, ctx, axis)?;
    }
    Ok(())
}

fn exchange_axis(
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
    axis: usize,
) -> Result<(), Error> {
    let n_species = ctx.params.species.len();
    // (destination local patch, species, particles)
    let mut local: Vec<(usize, usize, Particles)> = Vec::new();

    for p in 0..patches.len() {
        for ispec in 0..n_species {
            let packs = scan_and_extract(&mut patches[p], ctx.params, axis, ispec);
            for (side, pack) in packs.into_iter().enumerate() {
                let nb = patches[p].neighbors[axis][side];
                if nb == NO_NEIGHBOR {
                    continue;
                }
                let nb_rank = patches[p].neighbor_ranks[axis][side].unwrap();
                if nb_rank == ctx.rank {
                    if !pack.is_empty() {
                        local.push(((nb - ctx.first) as usize, ispec, pack));
                    }
                } else {
                    let count = pack.len() as u64;
                    let sender = patches[p].hindex;
                    comm.send(
                        nb_rank,
                        particle_tag(sender, ispec, axis, side, true),
                        count.to_le_bytes().to_vec(),
                    )?;
                    let payload = bincode::serialize(&pack)
                        .map_err(|e| Error::Serialize(e.to_string()))?;
                    comm.send(
                        nb_rank,
                        particle_tag(sender, ispec, axis, side, false),
                        payload,
                    )?;
                }
            }
        }
    }

    for (dest, ispec, pack) in local {
        append_arrivals(&mut patches[dest], ispec, pack);
    }

    for p in 0..patches.len() {
        for side in 0..2 {
            let nb = patches[p].neighbors[axis][side];
            if nb == NO_NEIGHBOR {
                continue;
            }
            let nb_rank = patches[p].neighbor_ranks[axis][side].unwrap();
            if nb_rank == ctx.rank {
                continue;
            }
            for ispec in 0..n_species {
                // the neighbor sent from its opposite side
                let size_tag = particle_tag(nb, ispec, axis, 1 - side, true);
                let count = u64::from_le_bytes(
                    comm.recv(nb_rank, size_tag)?
                        .try_into()
                        .map_err(|v: Vec<u8>| CommError::SizeMismatch {
                            tag: size_tag,
                            expected: 8,
                            got: v.len(),
                        })?,
                );
                let payload_tag = particle_tag(nb, ispec, axis, 1 - side, false);
                let payload = comm.recv(nb_rank, payload_tag)?;
                let pack: Particles = bincode::deserialize(&payload)
                    .map_err(|e| Error::Serialize(e.to_string()))?;
                if pack.len() as u64 != count {
                    return Err(CommError::SizeMismatch {
                        tag: payload_tag,
                        expected: count as usize,
                        got: pack.len(),
                    }
                    .into());
                }
                append_arrivals(&mut patches[p], ispec, pack);
            }
        }
    }
    Ok(())
}

/// Pull the particles beyond this patch's bounds along `axis` out of the
/// container (marked for compaction) into per-side packs, applying the
/// periodic box wrap where the neighbor table wraps around.
fn scan_and_extract(
    patch: &mut Patch,
    params: &SimParams,
    axis: usize,
    ispec: usize,
) -> [Particles; 2] {
    let has_q = patch.species[ispec].particles.has_quantum_state;
    let has_ids = patch.species[ispec].particles.has_ids;
    let mut packs = [
        Particles::new(params.ndim, has_q, has_ids),
        Particles::new(params.ndim, has_q, has_ids),
    ];
    let min = patch.env.min[axis];
    let max = patch.env.max[axis];
    let length = params.grid_length[axis];
    let particles = &mut patch.species[ispec].particles;

    for i in 0..particles.len() {
        if particles.weight[i] == 0.0 {
            continue;
        }
        let x = particles.position[axis][i];
        let side = if x < min {
            0
        } else if x >= max {
            1
        } else {
            continue;
        };
        if patch.neighbors[axis][side] == NO_NEIGHBOR {
            // non-periodic edge: the boundary kernel already handled it
            continue;
        }
        packs[side].push_from(particles, i);
        let last = packs[side].len() - 1;
        if patch.env.on_edge[axis][side] {
            // crossing the periodic seam
            if side == 0 {
                packs[side].position[axis][last] += length;
            } else {
                packs[side].position[axis][last] -= length;
            }
        }
        particles.weight[i] = 0.0;
        particles.charge[i] = 0;
    }
    packs
}

fn append_arrivals(patch: &mut Patch, ispec: usize, mut pack: Particles) {
    patch.species[ispec].particles.append(&mut pack);
}
