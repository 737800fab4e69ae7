//! Bulk ghost-cell synchronization over all patches of a rank.
//!
//! For each axis: extract every donor window (snapshotting, so symmetric
//! sums read pre-exchange values), send the remote ones, apply the local
//! pairs by direct copy, then drain the expected receives. Copy mode
//! overwrites ghost layers; sum mode accumulates the overlap windows, the
//! closure of the Esirkepov deposition across seams.

use larmor_core::SimParams;
use larmor_core::error::Error;
use larmor_core::topology::{NO_NEIGHBOR, OwnerTable};
use larmor_fields::exchange::{
    ExchangeFamily, Window, copy_recv_window, copy_send_window, message_tag, sum_window,
};
use larmor_fields::field::{Field, FieldKind};

use crate::comm::Communicator;
use crate::patch::Patch;

/// Which field of a patch participates in an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldSel {
    Kind(FieldKind),
    SpeciesJx(usize),
    SpeciesJy(usize),
    SpeciesJz(usize),
    SpeciesRho(usize),
    /// CG direction field of the Poisson scratch
    PoissonDirection,
}

impl FieldSel {
    /// Field-kind used for tag derivation; species and scratch fields get
    /// distinct codes so concurrent exchanges never collide.
    fn tag_kind(self) -> FieldKind {
        match self {
            FieldSel::Kind(kind) => kind,
            FieldSel::PoissonDirection => FieldKind::Scratch(2),
            FieldSel::SpeciesJx(s) => FieldKind::Scratch(8 + 4 * s as u8),
            FieldSel::SpeciesJy(s) => FieldKind::Scratch(9 + 4 * s as u8),
            FieldSel::SpeciesJz(s) => FieldKind::Scratch(10 + 4 * s as u8),
            FieldSel::SpeciesRho(s) => FieldKind::Scratch(11 + 4 * s as u8),
        }
    }

    fn get<'a>(&self, patch: &'a Patch) -> &'a Field {
        match self {
            FieldSel::Kind(kind) => patch.em.field_by_kind(*kind),
            FieldSel::PoissonDirection => &patch.poisson.as_ref().unwrap().direction,
            FieldSel::SpeciesJx(s) => patch.em.species_jx[*s].as_ref().unwrap(),
            FieldSel::SpeciesJy(s) => patch.em.species_jy[*s].as_ref().unwrap(),
            FieldSel::SpeciesJz(s) => patch.em.species_jz[*s].as_ref().unwrap(),
            FieldSel::SpeciesRho(s) => patch.em.species_rho[*s].as_ref().unwrap(),
        }
    }

    fn get_mut<'a>(&self, patch: &'a mut Patch) -> &'a mut Field {
        match self {
            FieldSel::Kind(kind) => patch.em.field_by_kind_mut(*kind),
            FieldSel::PoissonDirection => &mut patch.poisson.as_mut().unwrap().direction,
            FieldSel::SpeciesJx(s) => patch.em.species_jx[*s].as_mut().unwrap(),
            FieldSel::SpeciesJy(s) => patch.em.species_jy[*s].as_mut().unwrap(),
            FieldSel::SpeciesJz(s) => patch.em.species_jz[*s].as_mut().unwrap(),
            FieldSel::SpeciesRho(s) => patch.em.species_rho[*s].as_mut().unwrap(),
        }
    }
}

pub struct SyncCtx<'a> {
    pub params: &'a SimParams,
    pub owners: &'a OwnerTable,
    pub rank: usize,
    /// First Hilbert index owned by this rank
    pub first: u64,
}

/// Direction-independent copy exchange, ascending axes. The default for
/// E, B, and the filtered currents.
pub fn exchange(
    sels: &[FieldSel],
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
) -> Result<(), Error> {
    for axis in 0..ctx.params.ndim {
        exchange_axis(sels, patches, comm, ctx, axis, false)?;
    }
    Ok(())
}

/// Fully synchronized copy exchange, descending axes (Z then Y then X)
/// with completion between axes, so corner ghost values propagate through
/// two hops. Used for B right after the Faraday step.
pub fn exchange_synchronized(
    sels: &[FieldSel],
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
) -> Result<(), Error> {
    for axis in (0..ctx.params.ndim).rev() {
        exchange_axis(sels, patches, comm, ctx, axis, false)?;
    }
    Ok(())
}

/// Additive exchange for the deposited currents and densities.
pub fn sum(
    sels: &[FieldSel],
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
) -> Result<(), Error> {
    for axis in 0..ctx.params.ndim {
        exchange_axis(sels, patches, comm, ctx, axis, true)?;
    }
    Ok(())
}

fn family(sum_mode: bool) -> ExchangeFamily {
    if sum_mode {
        ExchangeFamily::Sum
    } else {
        ExchangeFamily::Copy
    }
}

fn send_window(field: &Field, axis: usize, side: usize, sum_mode: bool) -> Window {
    if sum_mode {
        sum_window(field, axis, side)
    } else {
        copy_send_window(field, axis, side)
    }
}

fn recv_window(field: &Field, axis: usize, side: usize, sum_mode: bool) -> Window {
    if sum_mode {
        sum_window(field, axis, side)
    } else {
        copy_recv_window(field, axis, side)
    }
}

fn exchange_axis(
    sels: &[FieldSel],
    patches: &mut [Patch],
    comm: &mut Communicator,
    ctx: &SyncCtx,
    axis: usize,
    sum_mode: bool,
) -> Result<(), Error> {
    let fam = family(sum_mode);
    // (destination local patch, destination side, selector, payload)
    let mut local: Vec<(usize, usize, FieldSel, Vec<f64>)> = Vec::new();
    let mut buf = Vec::new();

    // extract and post every donor window
    for p in 0..patches.len() {
        for side in 0..2 {
            let nb = patches[p].neighbors[axis][side];
            if nb == NO_NEIGHBOR {
                continue;
            }
            let nb_rank = patches[p].neighbor_ranks[axis][side].unwrap();
            for sel in sels {
                let field = sel.get(&patches[p]);
                let w = send_window(field, axis, side, sum_mode);
                field.extract(&w, &mut buf);
                if nb_rank == ctx.rank {
                    local.push(((nb - ctx.first) as usize, 1 - side, *sel, buf.clone()));
                } else {
                    let tag = message_tag(patches[p].hindex, axis, side, sel.tag_kind(), fam);
                    comm.send_f64(nb_rank, tag, &buf)?;
                }
            }
        }
    }

    // same-rank pairs are plain copies into the snapshot
    for (dest, side, sel, payload) in local {
        let field = sel.get_mut(&mut patches[dest]);
        let w = recv_window(field, axis, side, sum_mode);
        if sum_mode {
            field.add_from(&w, &payload);
        } else {
            field.insert(&w, &payload);
        }
    }

    // drain the expected remote messages, deterministic order
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
            for sel in sels {
                let field = sel.get_mut(&mut patches[p]);
                let w = recv_window(field, axis, side, sum_mode);
                let tag = message_tag(nb, axis, 1 - side, sel.tag_kind(), fam);
                let payload = comm.recv_f64(nb_rank, tag, w.len())?;
                if sum_mode {
                    field.add_from(&w, &payload);
                } else {
                    field.insert(&w, &payload);
                }
            }
        }
    }
    Ok(())
}

/// Selector lists for the common exchanges.
pub fn e_fields() -> Vec<FieldSel> {
    vec![
        FieldSel::Kind(FieldKind::Ex),
        FieldSel::Kind(FieldKind::Ey),
        FieldSel::Kind(FieldKind::Ez),
    ]
}

pub fn b_fields() -> Vec<FieldSel> {
    vec![
        FieldSel::Kind(FieldKind::Bx),
        FieldSel::Kind(FieldKind::By),
        FieldSel::Kind(FieldKind::Bz),
    ]
}

pub fn b_centered_fields() -> Vec<FieldSel> {
    vec![
        FieldSel::Kind(FieldKind::BxM),
        FieldSel::Kind(FieldKind::ByM),
        FieldSel::Kind(FieldKind::BzM),
    ]
}

pub fn j_fields() -> Vec<FieldSel> {
    vec![
        FieldSel::Kind(FieldKind::Jx),
        FieldSel::Kind(FieldKind::Jy),
        FieldSel::Kind(FieldKind::Jz),
    ]
}

pub fn rho_j_fields() -> Vec<FieldSel> {
    vec![
        FieldSel::Kind(FieldKind::Jx),
        FieldSel::Kind(FieldKind::Jy),
        FieldSel::Kind(FieldKind::Jz),
        FieldSel::Kind(FieldKind::Rho),
    ]
}

pub fn species_rho_j_fields(ispec: usize) -> Vec<FieldSel> {
    vec![
        FieldSel::SpeciesJx(ispec),
        FieldSel::SpeciesJy(ispec),
        FieldSel::SpeciesJz(ispec),
        FieldSel::SpeciesRho(ispec),
    ]
}
