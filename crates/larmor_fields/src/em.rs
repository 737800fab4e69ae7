use serde::{Deserialize, Serialize};

use larmor_core::SimParams;
use larmor_core::config::ExternalFieldBlock;

use crate::field::{Field, FieldKind};

/// The electromagnetic state of one patch: the Yee fields, the centered
/// magnetic field used by the pusher, the current and charge densities,
/// and optional per-species densities for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmFields {
    pub ex: Field,
    pub ey: Field,
    pub ez: Field,
    pub bx: Field,
    pub by: Field,
    pub bz: Field,
    /// B at integer time, used by interpolation
    pub bx_m: Field,
    pub by_m: Field,
    pub bz_m: Field,
    pub jx: Field,
    pub jy: Field,
    pub jz: Field,
    pub rho: Field,
    /// Per-species currents and densities, allocated when a diagnostic
    /// needs them (diag_flag steps)
    pub species_jx: Vec<Option<Field>>,
    pub species_jy: Vec<Option<Field>>,
    pub species_jz: Vec<Option<Field>>,
    pub species_rho: Vec<Option<Field>>,
    ndim: usize,
    n_space: [usize; 3],
    oversize: [usize; 3],
    cell_volume: f64,
}

impl EmFields {
    pub fn new(params: &SimParams, n_species: usize) -> Self {
        let mk = |kind| Field::new(kind, params.ndim, params.n_space, params.oversize);
        Self {
            ex: mk(FieldKind::Ex),
            ey: mk(FieldKind::Ey),
            ez: mk(FieldKind::Ez),
            bx: mk(FieldKind::Bx),
            by: mk(FieldKind::By),
            bz: mk(FieldKind::Bz),
            bx_m: mk(FieldKind::BxM),
            by_m: mk(FieldKind::ByM),
            bz_m: mk(FieldKind::BzM),
            jx: mk(FieldKind::Jx),
            jy: mk(FieldKind::Jy),
            jz: mk(FieldKind::Jz),
            rho: mk(FieldKind::Rho),
            species_jx: (0..n_species).map(|_| None).collect(),
            species_jy: (0..n_species).map(|_| None).collect(),
            species_jz: (0..n_species).map(|_| None).collect(),
            species_rho: (0..n_species).map(|_| None).collect(),
            ndim: params.ndim,
            n_space: params.n_space,
            oversize: params.oversize,
            cell_volume: params.cell_volume,
        }
    }

    /// Zero J and rho ahead of a deposition phase. Per-species arrays are
    /// (re)allocated only on diagnostic steps.
    pub fn restart_rho_j(&mut self, diag_flag: bool) {
        self.jx.put_to(0.0);
        self.jy.put_to(0.0);
        self.jz.put_to(0.0);
        self.rho.put_to(0.0);
        if diag_flag {
            for ispec in 0..self.species_rho.len() {
                self.ensure_species_fields(ispec);
                for f in [
                    self.species_jx[ispec].as_mut(),
                    self.species_jy[ispec].as_mut(),
                    self.species_jz[ispec].as_mut(),
                    self.species_rho[ispec].as_mut(),
                ]
                .into_iter()
                .flatten()
                {
                    f.put_to(0.0);
                }
            }
        }
    }

    /// The four per-species deposition targets, split-borrowed for the
    /// projector: [Jx, Jy, Jz, rho].
    pub fn species_fields_mut(&mut self, ispec: usize) -> [&mut Field; 4] {
        [
            self.species_jx[ispec].as_mut().unwrap(),
            self.species_jy[ispec].as_mut().unwrap(),
            self.species_jz[ispec].as_mut().unwrap(),
            self.species_rho[ispec].as_mut().unwrap(),
        ]
    }

    pub fn ensure_species_fields(&mut self, ispec: usize) {
        let ndim = self.ndim;
        let n_space = self.n_space;
        let oversize = self.oversize;
        let mk = |kind| Some(Field::new(kind, ndim, n_space, oversize));
        if self.species_jx[ispec].is_none() {
            self.species_jx[ispec] = mk(FieldKind::Jx);
            self.species_jy[ispec] = mk(FieldKind::Jy);
            self.species_jz[ispec] = mk(FieldKind::Jz);
            self.species_rho[ispec] = mk(FieldKind::Rho);
        }
    }

    /// Fold the per-species densities into the totals after a diagnostic
    /// deposition. Closes the charge-conservation invariant cell-wise.
    pub fn compute_total_rho_j(&mut self) {
        for ispec in 0..self.species_rho.len() {
            if let Some(f) = &self.species_jx[ispec] {
                add_into(&mut self.jx, f);
            }
            if let Some(f) = &self.species_jy[ispec] {
                add_into(&mut self.jy, f);
            }
            if let Some(f) = &self.species_jz[ispec] {
                add_into(&mut self.jz, f);
            }
            if let Some(f) = &self.species_rho[ispec] {
                add_into(&mut self.rho, f);
            }
        }
    }

    /// Store B^{n+1/2} before Faraday advances it to B^{n+3/2}.
    pub fn save_magnetic_fields(&mut self) {
        self.bx_m.data_mut().copy_from_slice(self.bx.data());
        self.by_m.data_mut().copy_from_slice(self.by.data());
        self.bz_m.data_mut().copy_from_slice(self.bz.data());
    }

    /// B^{n+1} = (B^{n+1/2} + B^{n+3/2}) / 2, kept in the `_m` fields for
    /// the next push.
    pub fn center_magnetic_fields(&mut self) {
        for (m, b) in [
            (self.bx_m.data_mut(), self.bx.data()),
            (self.by_m.data_mut(), self.by.data()),
            (self.bz_m.data_mut(), self.bz.data()),
        ] {
            for (m, b) in m.iter_mut().zip(b) {
                *m = 0.5 * (*m + *b);
            }
        }
    }

    /// Apply profile-defined field overlays at initialization.
    pub fn apply_external_fields(
        &mut self,
        externals: &[ExternalFieldBlock],
        params: &SimParams,
        patch_min: [f64; 3],
    ) {
        for ext in externals {
            let field = match ext.field.as_str() {
                "Ex" => &mut self.ex,
                "Ey" => &mut self.ey,
                "Ez" => &mut self.ez,
                "Bx" => &mut self.bx,
                "By" => &mut self.by,
                "Bz" => &mut self.bz,
                _ => continue,
            };
            apply_profile(field, params, patch_min, |pos| ext.profile.value_at(pos));
        }
        // external B is also the starting centered field
        self.bx_m.data_mut().copy_from_slice(self.bx.data());
        self.by_m.data_mut().copy_from_slice(self.by.data());
        self.bz_m.data_mut().copy_from_slice(self.bz.data());
    }

    /// Interior electromagnetic energy of this patch.
    pub fn field_energy(&self) -> f64 {
        let mut total = 0.0;
        for f in [&self.ex, &self.ey, &self.ez, &self.bx, &self.by, &self.bz] {
            total += 0.5 * f.norm2_interior() * self.cell_volume;
        }
        total
    }

    /// Per-field interior energy, in a fixed order for the scalar diag.
    pub fn field_energies(&self) -> [(FieldKind, f64); 6] {
        [
            (FieldKind::Ex, 0.5 * self.ex.norm2_interior() * self.cell_volume),
            (FieldKind::Ey, 0.5 * self.ey.norm2_interior() * self.cell_volume),
            (FieldKind::Ez, 0.5 * self.ez.norm2_interior() * self.cell_volume),
            (FieldKind::Bx, 0.5 * self.bx.norm2_interior() * self.cell_volume),
            (FieldKind::By, 0.5 * self.by.norm2_interior() * self.cell_volume),
            (FieldKind::Bz, 0.5 * self.bz.norm2_interior() * self.cell_volume),
        ]
    }

    pub fn field_by_kind(&self, kind: FieldKind) -> &Field {
        match kind {
            FieldKind::Ex => &self.ex,
            FieldKind::Ey => &self.ey,
            FieldKind::Ez => &self.ez,
            FieldKind::Bx => &self.bx,
            FieldKind::By => &self.by,
            FieldKind::Bz => &self.bz,
            FieldKind::BxM => &self.bx_m,
            FieldKind::ByM => &self.by_m,
            FieldKind::BzM => &self.bz_m,
            FieldKind::Jx => &self.jx,
            FieldKind::Jy => &self.jy,
            FieldKind::Jz => &self.jz,
            FieldKind::Rho | FieldKind::Scratch(_) => &self.rho,
        }
    }

    pub fn field_by_kind_mut(&mut self, kind: FieldKind) -> &mut Field {
        match kind {
            FieldKind::Ex => &mut self.ex,
            FieldKind::Ey => &mut self.ey,
            FieldKind::Ez => &mut self.ez,
            FieldKind::Bx => &mut self.bx,
            FieldKind::By => &mut self.by,
            FieldKind::Bz => &mut self.bz,
            FieldKind::BxM => &mut self.bx_m,
            FieldKind::ByM => &mut self.by_m,
            FieldKind::BzM => &mut self.bz_m,
            FieldKind::Jx => &mut self.jx,
            FieldKind::Jy => &mut self.jy,
            FieldKind::Jz => &mut self.jz,
            FieldKind::Rho | FieldKind::Scratch(_) => &mut self.rho,
        }
    }

    /// Shift every field for a moving window advance of `nshift` cells.
    pub fn shift_x(&mut self, nshift: usize) {
        for f in self.all_fields_mut() {
            f.shift_x(nshift);
        }
    }

    fn all_fields_mut(&mut self) -> Vec<&mut Field> {
        let mut v: Vec<&mut Field> = vec![
            &mut self.ex,
            &mut self.ey,
            &mut self.ez,
            &mut self.bx,
            &mut self.by,
            &mut self.bz,
            &mut self.bx_m,
            &mut self.by_m,
            &mut self.bz_m,
            &mut self.jx,
            &mut self.jy,
            &mut self.jz,
            &mut self.rho,
        ];
        for f in self
            .species_jx
            .iter_mut()
            .chain(self.species_jy.iter_mut())
            .chain(self.species_jz.iter_mut())
            .chain(self.species_rho.iter_mut())
            .flatten()
        {
            v.push(f);
        }
        v
    }
}

fn add_into(total: &mut Field, part: &Field) {
    for (t, p) in total.data_mut().iter_mut().zip(part.data()) {
        *t += p;
    }
}

/// Evaluate a profile on every sample of a field, honoring its staggering.
pub fn apply_profile(
    field: &mut Field,
    params: &SimParams,
    patch_min: [f64; 3],
    profile: impl Fn(&[f64]) -> f64,
) {
    let ndim = field.ndim;
    let dims = field.dims;
    let dual = field.dual;
    let oversize = field.oversize;
    let mut pos = [0.0f64; 3];
    for i in 0..dims[0] {
        for j in 0..dims[1] {
            for k in 0..dims[2] {
                let idxs = [i, j, k];
                for axis in 0..ndim {
                    let half = if dual[axis] { -0.5 } else { 0.0 };
                    pos[axis] = patch_min[axis]
                        + (idxs[axis] as f64 - oversize[axis] as f64 + half)
                            * params.cell_length[axis];
                }
                *field.at_mut(i, j, k) += profile(&pos[..ndim]);
            }
        }
    }
}
