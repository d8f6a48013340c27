//! Element-wise operations applied by the solver between transforms.

use ndarray::{par_azip, ArrayView3, ArrayViewMut3};
use rayon::prelude::*;
use rustfft::num_complex::Complex32;

/// `spectrum ← spectrum · otf`: forward blur in the frequency domain
pub fn multiply_otf(spectrum: ArrayViewMut3<Complex32>, otf: ArrayView3<Complex32>) {
    par_azip!((s in spectrum, &h in otf) { *s *= h })
}

/// `spectrum ← spectrum · conj(otf)`: correlation with the PSF, which is the
/// adjoint of the forward blur
pub fn multiply_otf_conj(spectrum: ArrayViewMut3<Complex32>, otf: ArrayView3<Complex32>) {
    par_azip!((s in spectrum, &h in otf) { *s *= h.conj() })
}

/// `blurred ← observed / blurred`, except where `blurred < epsilon`: there the
/// quotient is meaningless, and the ratio is set to 1 so that the voxel is left
/// unchanged by this iteration.
pub fn guarded_ratio(observed: ArrayView3<f32>, blurred: ArrayViewMut3<f32>, epsilon: f32) {
    par_azip!((b in blurred, &d in observed) {
        *b = if *b < epsilon { 1.0 } else { d / *b }
    })
}

/// `next ← max(0, estimate · correction)`
pub fn update_estimate(estimate: ArrayView3<f32>, correction: ArrayView3<f32>, next: ArrayViewMut3<f32>) {
    par_azip!((n in next, &e in estimate, &c in correction) {
        *n = (e * c).max(0.0)
    })
}

/// Largest finite sample, or zero if there are none
pub fn max_value(data: ArrayView3<f32>) -> f32 {
    match data.as_slice() {
        Some(slice) => slice.par_iter().copied().filter(|v| v.is_finite()).reduce(|| 0.0, f32::max),
        None        => data.iter().copied().filter(|v| v.is_finite()).fold(0.0, f32::max),
    }
}
