//! Real-to-complex 3-D Fourier transforms.
//!
//! The forward transform is a real FFT along `x` (producing the half-spectrum
//! of `nx/2 + 1` bins) followed by complex FFTs along `y` and `z`. The inverse
//! undoes these in reverse order. Neither direction of the underlying 1-D
//! transforms is normalized, so the inverse multiplies by `1/N` where
//! `N = nx * ny * nz`: exactly once per forward/inverse pair.
//!
//! Lines along each axis are independent, so every pass is spread over the
//! `rayon` thread pool.

use std::sync::Arc;

use ndarray::{ArrayView3, ArrayViewMut3, Axis, Zip};
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{Fft, FftPlanner};
use rustfft::num_complex::Complex32;

use crate::error::{DeconvError, Result};
use crate::index::{BoxDim_u, half_spectrum, n_elements, shape_zyx};

/// Forward (R→C) and inverse (C→R) plans for one volume size. Created once per
/// run and shared by every transform of that run.
#[derive(Clone)]
pub struct FftPlans {
    dims: BoxDim_u,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    forward_y: Arc<dyn Fft<f32>>,
    inverse_y: Arc<dyn Fft<f32>>,
    forward_z: Arc<dyn Fft<f32>>,
    inverse_z: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for FftPlans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftPlans").field("dims", &self.dims).finish()
    }
}

impl FftPlans {

    pub fn new(dims: BoxDim_u) -> Result<Self> {
        if dims.iter().any(|&n| n == 0) {
            return Err(DeconvError::device("plan 3-D FFT", format!("zero-sized dimensions {dims:?}")))
        }
        let [nx, ny, nz] = dims;
        let mut real = RealFftPlanner::<f32>::new();
        let mut complex = FftPlanner::<f32>::new();
        Ok(Self {
            dims,
            r2c:       real.plan_fft_forward(nx),
            c2r:       real.plan_fft_inverse(nx),
            forward_y: complex.plan_fft_forward(ny),
            inverse_y: complex.plan_fft_inverse(ny),
            forward_z: complex.plan_fft_forward(nz),
            inverse_z: complex.plan_fft_inverse(nz),
        })
    }

    /// `[nx, ny, nz]` of the real side
    pub fn dims(&self) -> BoxDim_u { self.dims }

    /// `[nx/2 + 1, ny, nz]` of the complex side
    pub fn spectrum_dims(&self) -> BoxDim_u { half_spectrum(self.dims) }

    /// Unnormalized forward transform of `input` into `output`.
    pub fn forward(&self, input: ArrayView3<f32>, mut output: ArrayViewMut3<Complex32>) -> Result<()> {
        self.check("forward FFT input" , input.dim() , self.dims)?;
        self.check("forward FFT output", output.dim(), self.spectrum_dims())?;
        let nx = self.dims[0];
        let hx = self.spectrum_dims()[0];
        {
            let src = input .as_slice()    .ok_or_else(|| not_contiguous("forward FFT input"))?;
            let dst = output.as_slice_mut().ok_or_else(|| not_contiguous("forward FFT output"))?;
            let r2c = &self.r2c;
            src.par_chunks(nx)
                .zip(dst.par_chunks_mut(hx))
                .try_for_each_init(
                    || (vec![0.0; nx], r2c.make_scratch_vec()),
                    // realfft uses its input as scratch space, so work on a copy
                    |(line, scratch), (src, dst)| {
                        line.copy_from_slice(src);
                        r2c.process_with_scratch(line, dst, scratch)
                    })
                .map_err(|e| DeconvError::device("forward R2C along x", e))?;
        }
        transform_lanes(&mut output, Axis(1), &self.forward_y);
        transform_lanes(&mut output, Axis(0), &self.forward_z);
        Ok(())
    }

    /// Normalized inverse transform of `spectrum` into `output`. The contents
    /// of `spectrum` are destroyed.
    pub fn inverse(&self, mut spectrum: ArrayViewMut3<Complex32>, mut output: ArrayViewMut3<f32>) -> Result<()> {
        self.check("inverse FFT input" , spectrum.dim(), self.spectrum_dims())?;
        self.check("inverse FFT output", output  .dim(), self.dims)?;
        transform_lanes(&mut spectrum, Axis(0), &self.inverse_z);
        transform_lanes(&mut spectrum, Axis(1), &self.inverse_y);

        let nx = self.dims[0];
        let hx = self.spectrum_dims()[0];
        let scale = 1.0 / n_elements(self.dims) as f32;
        let src = spectrum.as_slice_mut().ok_or_else(|| not_contiguous("inverse FFT input"))?;
        let dst = output  .as_slice_mut().ok_or_else(|| not_contiguous("inverse FFT output"))?;
        let c2r = &self.c2r;
        src.par_chunks_mut(hx)
            .zip(dst.par_chunks_mut(nx))
            .try_for_each_init(
                || c2r.make_scratch_vec(),
                |scratch, (src, dst)| {
                    // The DC bin (and the Nyquist bin of even-length lines) of
                    // a real signal's spectrum is real; discard rounding noise.
                    src[0].im = 0.0;
                    if nx % 2 == 0 { src[hx - 1].im = 0.0 }
                    c2r.process_with_scratch(src, dst, scratch)?;
                    dst.iter_mut().for_each(|v| *v *= scale);
                    Ok::<(), realfft::FftError>(())
                })
            .map_err(|e| DeconvError::device("inverse C2R along x", e))
    }

    fn check(&self, what: &'static str, found: (usize, usize, usize), dims: BoxDim_u) -> Result<()> {
        if found == shape_zyx(dims) { return Ok(()) }
        let (nz, ny, nx) = found;
        Err(DeconvError::ShapeMismatch { what, dims, expected: n_elements(dims), found: nx * ny * nz })
    }
}

/// In-place complex FFT of every 1-D lane of `data` along `axis`
fn transform_lanes(data: &mut ArrayViewMut3<Complex32>, axis: Axis, fft: &Arc<dyn Fft<f32>>) {
    if data.len_of(axis) < 2 { return }
    Zip::from(data.lanes_mut(axis))
        .par_for_each(|mut lane| {
            let mut line = lane.to_vec();
            fft.process(&mut line);
            lane.iter_mut().zip(line).for_each(|(d, s)| *d = s);
        });
}

fn not_contiguous(what: &'static str) -> DeconvError {
    DeconvError::device("FFT", format!("{what} is not contiguous in memory"))
}
