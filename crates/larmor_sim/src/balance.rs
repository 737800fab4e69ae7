//! Patch-to-rank load balancing.
//!
//! Each patch carries a work estimate (cells plus particles, frozen ones
//! discounted). The initial distribution is a greedy sweep over the curve
//! on the master rank; the periodic rebalance is a one-sided scan where
//! every rank trades whole patches with its curve neighbors towards the
//! global average, always keeping at least one patch.

use larmor_core::SimParams;
use larmor_core::error::Error;
use larmor_core::topology::{OwnerTable, PatchTopology};

use crate::comm::Communicator;
use crate::patch::Patch;

const BALANCE_TAG: u64 = 1 << 61;

/// Greedy initial assignment from profile-based load estimates.
pub fn init_patch_count(
    params: &SimParams,
    topology: &PatchTopology,
    comm: &Communicator,
) -> OwnerTable {
    let n_ranks = comm.n_ranks();
    let total = topology.total_patches();
    let balanced = params
        .load_balancing
        .as_ref()
        .map(|lb| lb.initial_balance)
        .unwrap_or(false);
    if !balanced {
        return OwnerTable::even(total, n_ranks);
    }

    let counts = if comm.is_master() {
        let loads: Vec<f64> = (0..total as u64)
            .map(|h| estimate_patch_load(params, topology, h))
            .collect();
        assign_greedy(&loads, n_ranks)
    } else {
        Vec::new()
    };
    OwnerTable::new(comm.broadcast(0, &counts))
}

/// Cheap pre-loading estimate: profile value at the patch center times
/// cells times particles per cell, plus the grid contribution.
fn estimate_patch_load(params: &SimParams, topology: &PatchTopology, hindex: u64) -> f64 {
    let coords = topology.coords_of(hindex);
    let mut center = [0.0f64; 3];
    let mut cells = 1.0;
    for axis in 0..params.ndim {
        center[axis] = params.patch_min(coords[axis], axis) + 0.5 * params.patch_length[axis];
        cells *= (params.n_space[axis] + 2 * params.oversize[axis]) as f64;
    }
    let (cell_load, frozen_weight) = params
        .load_balancing
        .as_ref()
        .map(|lb| (lb.cell_load, lb.frozen_particle_load))
        .unwrap_or((1.0, 0.1));

    let mut load = cells * cell_load;
    let cells_interior: f64 = (0..params.ndim)
        .map(|a| params.n_space[a] as f64)
        .product();
    for sp in &params.species {
        if let Some(density) = &sp.density {
            let n0 = density.value_at(&center[..params.ndim]);
            if n0 > 0.0 {
                let mut count = sp.particles_per_cell as f64 * cells_interior;
                if sp.time_frozen > 0.0 {
                    count *= frozen_weight;
                }
                load += count;
            }
        }
    }
    load
}

fn assign_greedy(loads: &[f64], n_ranks: usize) -> Vec<usize> {
    let n_patches = loads.len();
    let total: f64 = loads.iter().sum();
    let target = total / n_ranks as f64;

    let mut counts = vec![0usize; n_ranks];
    let mut r = 0;
    let mut ncur = 0usize;
    let mut lcur = 0.0;
    let mut tcur = target;
    for (h, &load) in loads.iter().enumerate() {
        lcur += load;
        ncur += 1;
        if r < n_ranks - 1 && (lcur > tcur || n_ranks - r >= n_patches - h) {
            let above = lcur - tcur;
            let below = tcur - (lcur - load);
            if above > below && ncur != 1 {
                counts[r] = ncur - 1;
                ncur = 1;
            } else {
                counts[r] = ncur;
                ncur = 0;
            }
            r += 1;
            tcur += target;
        }
    }
    counts[n_ranks - 1] = ncur;
    counts
}

/// One-sided scan rebalance: shift the split points with the left and
/// right curve neighbors towards the per-rank target.
pub fn recompute_patch_count(
    patches: &[Patch],
    params: &SimParams,
    owners: &OwnerTable,
    comm: &mut Communicator,
    time_dual: f64,
) -> Result<OwnerTable, Error> {
    let rank = comm.rank();
    let n_ranks = comm.n_ranks();

    let lp: Vec<f64> = patches.iter().map(|p| p.load(params, time_dual)).collect();
    let tload_loc: f64 = lp.iter().sum();
    let tscan = comm.scan_sum(tload_loc);
    let tload = comm.all_reduce_sum(tload_loc) / n_ranks as f64;

    // ship the per-patch detail to both curve neighbors
    if rank + 1 < n_ranks {
        comm.send_f64(rank + 1, BALANCE_TAG, &lp)?;
    }
    if rank > 0 {
        comm.send_f64(rank - 1, BALANCE_TAG | 1, &lp)?;
    }
    let lp_left = if rank > 0 {
        comm.recv_f64(rank - 1, BALANCE_TAG, owners.count_of(rank - 1))?
    } else {
        Vec::new()
    };
    let lp_right = if rank + 1 < n_ranks {
        comm.recv_f64(rank + 1, BALANCE_TAG | 1, owners.count_of(rank + 1))?
    } else {
        Vec::new()
    };

    let mut delta: isize = 0;

    if rank > 0 {
        // load carried by the ranks before me vs. where my range should start
        let mut tcur = tscan - tload_loc;
        let target = rank as f64 * tload;
        if tcur > target {
            // take patches from the left neighbor
            let mut j = lp_left.len() - 1;
            while (tcur - target).abs() > (tcur - lp_left[j] - target).abs() && j > 0 {
                tcur -= lp_left[j];
                j -= 1;
                delta += 1;
            }
        } else {
            // give my leading patches to the left neighbor
            let mut j = 0;
            while (tcur - target).abs() > (tcur + lp[j] - target).abs() && j < lp.len() - 1 {
                tcur += lp[j];
                j += 1;
                delta -= 1;
            }
        }
    }

    if rank + 1 < n_ranks {
        let mut tcur = tscan;
        let target = (rank + 1) as f64 * tload;
        if tcur < target {
            // take patches from the right neighbor
            let mut j = 0;
            while (tcur - target).abs() > (tcur + lp_right[j] - target).abs()
                && j < lp_right.len() - 1
            {
                tcur += lp_right[j];
                j += 1;
                delta += 1;
            }
        } else {
            // give my trailing patches to the right neighbor
            let mut j = lp.len() - 1;
            while (tcur - target).abs() > (tcur - lp[j] - target).abs() && j > 0 {
                tcur -= lp[j];
                j -= 1;
                delta -= 1;
            }
        }
    }

    let new_count = (owners.count_of(rank) as isize + delta).max(1) as usize;
    let counts: Vec<usize> = comm.all_gather(&new_count);
    Ok(OwnerTable::new(counts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_assignment_isolates_a_heavy_patch() {
        // 63 light patches and one heavy one on 4 ranks: the heavy patch
        // ends up alone on its rank
        let mut loads = vec![10.0; 64];
        loads[40] = 1_000_000.0;
        let counts = assign_greedy(&loads, 4);
        assert_eq!(counts.iter().sum::<usize>(), 64);
        assert!(counts.iter().all(|&c| c >= 1));
        // find the rank owning patch 40
        let mut start = 0;
        let mut owner_count = 0;
        for &c in &counts {
            if (start..start + c).contains(&40) {
                owner_count = c;
                break;
            }
            start += c;
        }
        assert_eq!(owner_count, 1, "heavy patch shares its rank: {counts:?}");
    }

    #[test]
    fn greedy_assignment_splits_uniform_loads_evenly() {
        let loads = vec![5.0; 64];
        let counts = assign_greedy(&loads, 4);
        assert_eq!(counts, vec![16, 16, 16, 16]);
    }
}
