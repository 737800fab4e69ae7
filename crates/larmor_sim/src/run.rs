//! The time loop of one rank: phase sequence, diagnostics cadence,
//! checkpoint dumps and the clean-exit poll.

use std::path::{Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use larmor_core::SimParams;
use larmor_core::error::Error;
use larmor_core::topology::OwnerTable;
use larmor_storage::{RankCheckpoint, checkpoint, load_checkpoint, save_checkpoint};

use crate::comm::Communicator;
use crate::diagnostics::Diagnostics;
use crate::patch::Patch;
use crate::patch_set::PatchSet;

// coarse cadence of the NaN scan
const FINITE_CHECK_EVERY: usize = 64;

/// Set up and run a rank to completion. Returns the last step executed.
pub fn run_rank(
    params: SimParams,
    mut comm: Communicator,
    out_dir: PathBuf,
    test_mode: bool,
) -> Result<usize, Error> {
    let (mut set, start_step) = match restart_dir(&params) {
        Some(dir) => restore(&params, &dir, &comm)?,
        None => (PatchSet::new(params.clone(), &comm), 0),
    };

    let mut diags = Diagnostics::new(out_dir.clone(), &comm)?;

    if start_step == 0 && params.solve_poisson {
        set.compute_charge(&mut comm)?;
        let rho_norm: f64 = set
            .patches
            .iter()
            .map(|p| p.em.rho.norm2_interior())
            .sum();
        if comm.all_reduce_sum(rho_norm) > 0.0 {
            set.solve_poisson(&mut comm)?;
        }
    }

    if test_mode {
        info!("test mode: initialization complete, exiting");
        return Ok(start_step);
    }

    diags.run_all(&set, &mut comm, start_step, start_step as f64 * params.timestep)?;

    let run_id = comm.broadcast(0, &Uuid::new_v4());
    let mut step = start_step;
    while step < params.n_time {
        // `step` is the state this iteration produces
        step += 1;
        let time_dual = (step as f64 - 0.5) * params.timestep;

        set.moving_window(&mut comm, time_dual, step)?;

        set.dynamics(time_dual, step);
        set.exchange_particles(&mut comm)?;
        set.sum_densities(&mut comm)?;
        set.finalize_and_sort_particles(step);
        set.solve_maxwell(&mut comm, time_dual)?;

        diags.run_all(&set, &mut comm, step, step as f64 * params.timestep)?;

        if let Some(lb) = &params.load_balancing
            && lb.every > 0
            && step % lb.every == 0
        {
            set.load_balance(&mut comm, time_dual)?;
        }

        if step % FINITE_CHECK_EVERY == 0 {
            set.check_finite(step)?;
        }

        let mut exit_requested = false;
        if let Some(ck) = &params.checkpoints
            && ck.dump_every > 0
            && step % ck.dump_every == 0
        {
            dump(&set, &comm, &out_dir, run_id, step)?;
            exit_requested = ck.exit_after_dump;
        }
        if comm.any(exit_requested) {
            info!(step, "exit requested after checkpoint dump");
            break;
        }
    }

    // final diagnostic flush on the cadence boundary is already done; make
    // sure every rank leaves together
    comm.barrier();
    Ok(step)
}

fn restart_dir(params: &SimParams) -> Option<PathBuf> {
    params
        .checkpoints
        .as_ref()
        .and_then(|ck| ck.restart_dir.as_ref())
        .map(PathBuf::from)
}

fn dump(
    set: &PatchSet,
    comm: &Communicator,
    out_dir: &Path,
    run_id: Uuid,
    step: usize,
) -> Result<(), Error> {
    let blob = bincode::serialize(&set.patches).map_err(|e| Error::Serialize(e.to_string()))?;
    let ck = RankCheckpoint {
        version: checkpoint::CHECKPOINT_VERSION,
        run_id,
        step,
        rank: comm.rank(),
        n_ranks: comm.n_ranks(),
        patch_count: set.owners.patch_count.clone(),
        window_cells_moved: set.window.as_ref().map(|w| w.cells_moved).unwrap_or(0),
        patches: blob,
    };
    save_checkpoint(&out_dir.join("checkpoint"), &ck)?;
    Ok(())
}

fn restore(
    params: &SimParams,
    dir: &Path,
    comm: &Communicator,
) -> Result<(PatchSet, usize), Error> {
    let ck = load_checkpoint(dir, comm.rank())?;
    if ck.n_ranks != comm.n_ranks() {
        return Err(Error::BadCheckpoint {
            path: dir.display().to_string(),
            reason: format!(
                "dumped from {} ranks, restarting on {}",
                ck.n_ranks,
                comm.n_ranks()
            ),
        });
    }
    let mut patches: Vec<Patch> =
        bincode::deserialize(&ck.patches).map_err(|e| Error::BadCheckpoint {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;
    let owners = OwnerTable::new(ck.patch_count.clone());
    for patch in &mut patches {
        for sp in &mut patch.species {
            sp.rebuild_operators();
        }
        patch.update_neighbor_ranks(&owners);
    }
    info!(rank = comm.rank(), step = ck.step, "restored from checkpoint");
    Ok((
        PatchSet::from_restart(params.clone(), owners, patches, ck.window_cells_moved),
        ck.step,
    ))
}
