use serde::{Deserialize, Serialize};

/// Identity of a field on the Yee grid. The discriminant doubles as the
/// tag offset that keeps concurrent exchanges of different fields apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Ex,
    Ey,
    Ez,
    Bx,
    By,
    Bz,
    BxM,
    ByM,
    BzM,
    Jx,
    Jy,
    Jz,
    Rho,
    /// Poisson scratch and other short-lived fields
    Scratch(u8),
}

impl FieldKind {
    pub fn tag_offset(self) -> u64 {
        match self {
            FieldKind::Ex => 1,
            FieldKind::Ey => 2,
            FieldKind::Ez => 3,
            FieldKind::Bx => 4,
            FieldKind::By => 5,
            FieldKind::Bz => 6,
            FieldKind::BxM => 7,
            FieldKind::ByM => 8,
            FieldKind::BzM => 9,
            FieldKind::Jx => 10,
            FieldKind::Jy => 11,
            FieldKind::Jz => 12,
            FieldKind::Rho => 13,
            FieldKind::Scratch(n) => 16 + n as u64,
        }
    }

    /// Per-axis dual flags of the standard Yee placement.
    pub fn staggering(self) -> [bool; 3] {
        match self {
            FieldKind::Ex | FieldKind::Jx => [true, false, false],
            FieldKind::Ey | FieldKind::Jy => [false, true, false],
            FieldKind::Ez | FieldKind::Jz => [false, false, true],
            FieldKind::Bx | FieldKind::BxM => [false, true, true],
            FieldKind::By | FieldKind::ByM => [true, false, true],
            FieldKind::Bz | FieldKind::BzM => [true, true, false],
            FieldKind::Rho | FieldKind::Scratch(_) => [false, false, false],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldKind::Ex => "Ex",
            FieldKind::Ey => "Ey",
            FieldKind::Ez => "Ez",
            FieldKind::Bx => "Bx",
            FieldKind::By => "By",
            FieldKind::Bz => "Bz",
            FieldKind::BxM => "Bx_m",
            FieldKind::ByM => "By_m",
            FieldKind::BzM => "Bz_m",
            FieldKind::Jx => "Jx",
            FieldKind::Jy => "Jy",
            FieldKind::Jz => "Jz",
            FieldKind::Rho => "Rho",
            FieldKind::Scratch(_) => "scratch",
        }
    }
}

/// Dense N-D array of doubles on the staggered grid, ghost cells included.
///
/// Axis `i` holds `n_space[i] + 1 + dual[i] + 2*oversize[i]` samples
/// (1 for axes beyond the dimensionality). Data is row-major with x
/// slowest, matching the cluster-by-cluster particle deposition order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub kind: FieldKind,
    pub ndim: usize,
    /// Allocated samples per axis, ghosts included
    pub dims: [usize; 3],
    /// Per-axis dual flag, fixed at construction
    pub dual: [bool; 3],
    pub oversize: [usize; 3],
    data: Vec<f64>,
}

impl Field {
    pub fn new(kind: FieldKind, ndim: usize, n_space: [usize; 3], oversize: [usize; 3]) -> Self {
        let stag = kind.staggering();
        let mut dims = [1usize; 3];
        let mut dual = [false; 3];
        for i in 0..ndim {
            dual[i] = stag[i];
            dims[i] = n_space[i] + 1 + usize::from(dual[i]) + 2 * oversize[i];
        }
        let len = dims[0] * dims[1] * dims[2];
        Self {
            kind,
            ndim,
            dims,
            dual,
            oversize,
            data: vec![0.0; len],
        }
    }

    #[inline(always)]
    pub fn idx(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }

    #[inline(always)]
    pub fn at(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[self.idx(i, j, k)]
    }

    #[inline(always)]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut f64 {
        let idx = self.idx(i, j, k);
        &mut self.data[idx]
    }

    #[inline(always)]
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    #[inline(always)]
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn put_to(&mut self, value: f64) {
        self.data.iter_mut().for_each(|v| *v = value);
    }

    /// Number of interior samples along `axis` (what the patch owns).
    pub fn interior_len(&self, axis: usize) -> usize {
        self.dims[axis] - 2 * self.oversize[axis]
    }

    /// Shift data `nshift` samples towards negative x, zero-filling the
    /// vacated tail. The moving window uses this when the box advances.
    pub fn shift_x(&mut self, nshift: usize) {
        let plane = self.dims[1] * self.dims[2];
        let nx = self.dims[0];
        if nshift >= nx {
            self.put_to(0.0);
            return;
        }
        self.data.copy_within(nshift * plane.., 0);
        let tail = (nx - nshift) * plane;
        self.data[tail..].iter_mut().for_each(|v| *v = 0.0);
    }

    /// Sum of squares over a window: `start[i] .. start[i]+extent[i]`.
    pub fn norm2(&self, start: [usize; 3], extent: [usize; 3]) -> f64 {
        let mut acc = 0.0;
        for i in start[0]..start[0] + extent[0] {
            for j in start[1]..start[1] + extent[1] {
                let base = self.idx(i, j, start[2]);
                for v in &self.data[base..base + extent[2]] {
                    acc += v * v;
                }
            }
        }
        acc
    }

    /// Sum of squares over the interior samples only.
    pub fn norm2_interior(&self) -> f64 {
        let mut start = [0usize; 3];
        let mut extent = [1usize; 3];
        for i in 0..self.ndim {
            start[i] = self.oversize[i];
            extent[i] = self.dims[i] - 2 * self.oversize[i];
        }
        self.norm2(start, extent)
    }

    /// Copy this patch-local field's interior into a larger compound field
    /// at sample offset `offset` (ghost-free target).
    pub fn push_to(&self, global: &mut [f64], global_dims: [usize; 3], offset: [usize; 3]) {
        let mut extent = [1usize; 3];
        for i in 0..self.ndim {
            extent[i] = self.dims[i] - 2 * self.oversize[i];
        }
        for i in 0..extent[0] {
            for j in 0..extent[1] {
                for k in 0..extent[2] {
                    let src = self.idx(i + self.oversize[0], j + self.oversize[1], k + self.oversize[2]);
                    let dst = ((i + offset[0]) * global_dims[1] + (j + offset[1])) * global_dims[2]
                        + (k + offset[2]);
                    global[dst] = self.data[src];
                }
            }
        }
    }

    /// Inverse of [`Field::push_to`]: refill the interior from a compound
    /// field. Ghosts are left untouched and must be re-exchanged.
    pub fn pull_from(&mut self, global: &[f64], global_dims: [usize; 3], offset: [usize; 3]) {
        let mut extent = [1usize; 3];
        for i in 0..self.ndim {
            extent[i] = self.dims[i] - 2 * self.oversize[i];
        }
        for i in 0..extent[0] {
            for j in 0..extent[1] {
                for k in 0..extent[2] {
                    let dst = self.idx(i + self.oversize[0], j + self.oversize[1], k + self.oversize[2]);
                    let src = ((i + offset[0]) * global_dims[1] + (j + offset[1])) * global_dims[2]
                        + (k + offset[2]);
                    self.data[dst] = global[src];
                }
            }
        }
    }

    /// True when every sample is finite. Cheap enough for periodic debug
    /// asserts on the hot fields.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_follow_staggering() {
        let n = [8, 4, 1];
        let ov = [2, 2, 0];
        let ex = Field::new(FieldKind::Ex, 2, n, ov);
        let rho = Field::new(FieldKind::Rho, 2, n, ov);
        // dual in x gets one extra sample
        assert_eq!(ex.dims, [8 + 2 + 4, 4 + 1 + 4, 1]);
        assert_eq!(rho.dims, [8 + 1 + 4, 4 + 1 + 4, 1]);
    }

    #[test]
    fn shift_x_moves_data_left_and_zero_fills() {
        let mut f = Field::new(FieldKind::Rho, 1, [8, 1, 1], [2, 0, 0]);
        for i in 0..f.dims[0] {
            *f.at_mut(i, 0, 0) = i as f64;
        }
        f.shift_x(3);
        assert_eq!(f.at(0, 0, 0), 3.0);
        assert_eq!(f.at(f.dims[0] - 4, 0, 0), (f.dims[0] - 1) as f64);
        assert_eq!(f.at(f.dims[0] - 1, 0, 0), 0.0);
    }

    #[test]
    fn push_pull_roundtrip() {
        let mut local = Field::new(FieldKind::Rho, 2, [4, 4, 1], [2, 2, 0]);
        for i in 0..local.dims[0] {
            for j in 0..local.dims[1] {
                *local.at_mut(i, j, 0) = (i * 100 + j) as f64;
            }
        }
        let gdims = [11, 11, 1];
        let mut global = vec![0.0; gdims[0] * gdims[1]];
        local.push_to(&mut global, gdims, [3, 3, 0]);

        let mut back = Field::new(FieldKind::Rho, 2, [4, 4, 1], [2, 2, 0]);
        back.pull_from(&global, gdims, [3, 3, 0]);
        for i in 2..local.dims[0] - 2 {
            for j in 2..local.dims[1] - 2 {
                assert_eq!(back.at(i, j, 0), local.at(i, j, 0));
            }
        }
    }
}
