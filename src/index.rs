//! Index arithmetic for volumes stored with `x` varying fastest.
//!
//! Dimensions are always given in `[nx, ny, nz]` order. `ndarray` shapes are
//! the reverse, `(nz, ny, nx)`, so that a standard-layout `Array3` has `x`
//! contiguous in memory, which is what the real FFT along `x` needs.

#[allow(non_camel_case_types)] pub type Index3_u = [usize; 3];
#[allow(non_camel_case_types)] pub type BoxDim_u = [usize; 3];

/// `ndarray` shape of a volume with dimensions `[nx, ny, nz]`
#[inline]
pub fn shape_zyx([nx, ny, nz]: BoxDim_u) -> (usize, usize, usize) { (nz, ny, nx) }

/// Dimensions of the half-spectrum produced by a real-to-complex transform
/// along `x`: `[nx/2 + 1, ny, nz]`
#[inline]
pub fn half_spectrum([nx, ny, nz]: BoxDim_u) -> BoxDim_u { [nx / 2 + 1, ny, nz] }

#[inline]
pub fn n_elements([nx, ny, nz]: BoxDim_u) -> usize { nx * ny * nz }

/// Signed frequency of DFT bin `k` on an axis of length `n`: bins above `n/2`
/// represent negative frequencies.
#[inline]
pub fn signed_frequency(k: usize, n: usize) -> isize {
    if k <= n / 2 { k as isize } else { k as isize - n as isize }
}

/// Inverse of `signed_frequency`
#[inline]
pub fn wrap_frequency(f: isize, n: usize) -> usize { f.rem_euclid(n as isize) as usize }
