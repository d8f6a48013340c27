//! Synthesis of the optical transfer function (OTF) on the target grid.
//!
//! The PSF is transformed at its own resolution, giving a template spectrum
//! of shape `(px/2 + 1, py, pz)`. The solver needs the OTF on the frequency
//! grid of the observed volume, `(nx/2 + 1, ny, nz)`, so the template is
//! resampled.
//!
//! Along an axis with `n` voxels of size `d`, DFT bin `k` (signed) stands for
//! the physical frequency `k / (n d)`. The same physical frequency falls on
//! template bin
//!
//! ```text
//! j = k / scale,    scale = (n / p) · (d_raw / d_psf)
//! ```
//!
//! which is generally fractional: the template is interpolated trilinearly
//! between neighbouring bins. Frequencies beyond the template's Nyquist limit
//! are handled according to `OutOfSupport`.

use std::path::Path;

use log::{debug, warn};
use ndarray::{Array3, ArrayView3, Zip};
use rustfft::num_complex::Complex32;
use serde::Deserialize;

use crate::device::{Device, DeviceBuffer};
use crate::error::{DeconvError, Result};
use crate::fft::FftPlans;
use crate::geometry::VolumeGeometry;
use crate::index::{BoxDim_u, half_spectrum, n_elements, shape_zyx, signed_frequency, wrap_frequency};
use crate::io::raw;
use crate::psf::{ConditionedPsf, geometric_center};

/// What to do with target frequencies which the PSF's grid cannot represent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfSupport {
    /// The OTF is zero there
    #[default]
    Zero,
    /// Repeat the value at the edge of the template
    Nearest,
}

/// Transform `psf` and resample its spectrum into a freshly allocated device
/// buffer shaped like the half-spectrum of `geometry`.
pub fn synthesize<D: Device>(
    device  : &D,
    psf     : &ConditionedPsf,
    geometry: &VolumeGeometry,
    policy  : OutOfSupport,
) -> Result<DeviceBuffer<Complex32>> {
    let mut otf = device.allocate::<Complex32>("otf", geometry.spectrum_dims())?;
    synthesize_into(psf, geometry, policy, &mut otf)?;
    device.synchronize()?;
    Ok(otf)
}

/// As `synthesize`, writing into an existing buffer, which must already have
/// the half-spectrum shape of `geometry`.
pub fn synthesize_into(
    psf     : &ConditionedPsf,
    geometry: &VolumeGeometry,
    policy  : OutOfSupport,
    otf     : &mut DeviceBuffer<Complex32>,
) -> Result<()> {
    let expected = geometry.spectrum_dims();
    if otf.dims() != expected {
        return Err(DeconvError::ShapeMismatch {
            what: "OTF buffer", dims: expected, expected: n_elements(expected), found: otf.len(),
        })
    }
    let template = template_spectrum(psf)?;
    resample(template.view(), psf.dims(), geometry, policy, otf);
    Ok(())
}

/// Spectrum of the PSF at its own resolution, normalized to unit gain at zero
/// frequency. The PSF's centre voxel is first rotated to the origin, so that
/// a centred PSF yields an OTF without a linear phase ramp.
pub fn template_spectrum(psf: &ConditionedPsf) -> Result<Array3<Complex32>> {
    let volume = psf.volume();
    let dims = volume.dims();
    let [px, py, pz] = dims;
    let [cx, cy, cz] = geometric_center(dims);
    let total: f64 = volume.data().iter().map(|&v| v as f64).sum();
    if !(total.is_finite() && total > 0.0) { return Err(DeconvError::ZeroIntensity) }
    let norm = (1.0 / total) as f32;

    let rotated = Array3::from_shape_fn(shape_zyx(dims), |(z, y, x)| {
        volume[[(x + cx) % px, (y + cy) % py, (z + cz) % pz]] * norm
    });
    let plans = FftPlans::new(dims)?;
    let mut template = Array3::zeros(shape_zyx(plans.spectrum_dims()));
    plans.forward(rotated.view(), template.view_mut())?;
    Ok(template)
}

/// Two neighbouring template bins and the weight of the second. On the half
/// `x` axis, `mirror` marks an `i1` that is only stored as its Hermitian
/// partner: the bin is read as `conj(T[-kz, -ky, i1])`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Tap { i0: usize, i1: usize, w: f32, mirror: bool }

/// Template taps for every target bin along one axis. `None` marks bins
/// outside the template's support under the `Zero` policy.
///
/// The support reaches the PSF grid's Nyquist frequency, `p/2` bins, which
/// for odd `p` lies halfway between the highest positive and the lowest
/// negative bin: the spectrum is periodic, so such frequencies interpolate
/// across the wrap.
///
/// `half` selects the `x` axis of a real transform, which only stores the
/// non-negative frequencies `0 ..= p/2`.
fn axis_taps(n: usize, p: usize, scale: f64, policy: OutOfSupport, half: bool) -> Vec<Option<Tap>> {
    let n_bins = if half { n / 2 + 1 } else { n };
    let limit = p as f64 / 2.0;
    let stored = p / 2;
    // Rounding must not push the last in-support bin outside
    let tolerance = 1e-9 * limit.max(1.0);
    (0..n_bins).map(|k| {
        let f = if half { k as isize } else { signed_frequency(k, n) };
        let mut j = f as f64 / scale;
        if j.abs() > limit + tolerance {
            match policy {
                OutOfSupport::Zero    => return None,
                OutOfSupport::Nearest => j = j.clamp(-limit, limit),
            }
        }
        let j = j.clamp(-limit, limit);
        let j0 = j.floor();
        let w = (j - j0) as f32;
        let (j0, j1) = (j0 as isize, j0 as isize + 1);
        Some(if half {
            let (i1, mirror) = match j1 as usize {
                j1 if j1 > stored => (p - j1, true),
                j1                => (j1, false),
            };
            Tap { i0: j0 as usize, i1, w, mirror }
        } else {
            Tap { i0: wrap_frequency(j0, p), i1: wrap_frequency(j1, p), w, mirror: false }
        })
    }).collect()
}

/// Per-axis frequency scale factors: `(n / p) · (d_raw / d_psf)`
pub fn frequency_scale(psf_dims: BoxDim_u, geometry: &VolumeGeometry) -> [f64; 3] {
    let n = geometry.dims();
    let ratio = geometry.voxel_ratio();
    [0, 1, 2].map(|i| (n[i] as f64 / psf_dims[i] as f64) * ratio[i] as f64)
}

fn resample(
    template: ArrayView3<Complex32>,
    psf_dims: BoxDim_u,
    geometry: &VolumeGeometry,
    policy  : OutOfSupport,
    otf     : &mut DeviceBuffer<Complex32>,
) {
    let [nx, ny, nz] = geometry.dims();
    let [px, py, pz] = psf_dims;
    let [sx, sy, sz] = frequency_scale(psf_dims, geometry);
    debug!("resampling OTF {:?} -> {:?}, frequency scale [{sx:.4}, {sy:.4}, {sz:.4}]",
           half_spectrum(psf_dims), geometry.spectrum_dims());

    let taps_x = axis_taps(nx, px, sx, policy, true);
    let taps_y = axis_taps(ny, py, sy, policy, false);
    let taps_z = axis_taps(nz, pz, sz, policy, false);

    let dropped = [&taps_x, &taps_y, &taps_z].iter()
        .map(|taps| taps.iter().filter(|t| t.is_none()).count())
        .collect::<Vec<_>>();
    if dropped.iter().any(|&d| d > 0) {
        warn!("target frequencies beyond the PSF's Nyquist limit set to zero (x, y, z bins: {dropped:?})");
    }

    let mut view = otf.view_mut();
    Zip::indexed(&mut view)
        .par_for_each(|(kz, ky, kx), out| {
            *out = match (taps_x[kx], taps_y[ky], taps_z[kz]) {
                (Some(tx), Some(ty), Some(tz)) => interpolate(&template, tx, ty, tz),
                _ => Complex32::new(0.0, 0.0),
            }
        });
}

fn interpolate(template: &ArrayView3<Complex32>, tx: Tap, ty: Tap, tz: Tap) -> Complex32 {
    let (pz, py, _) = template.dim();
    let mut acc = Complex32::new(0.0, 0.0);
    for (iz, wz) in [(tz.i0, 1.0 - tz.w), (tz.i1, tz.w)] {
        if wz == 0.0 { continue }
        for (iy, wy) in [(ty.i0, 1.0 - ty.w), (ty.i1, ty.w)] {
            if wy == 0.0 { continue }
            for (ix, wx, mirror) in [(tx.i0, 1.0 - tx.w, false), (tx.i1, tx.w, tx.mirror)] {
                if wx == 0.0 { continue }
                let bin = if mirror { template[[(pz - iz) % pz, (py - iy) % py, ix]].conj() }
                          else      { template[[iz, iy, ix]] };
                acc += bin * (wx * wy * wz);
            }
        }
    }
    acc
}

/// Write `|OTF|` as a raw `f32` stack of shape `(nx/2 + 1, ny, nz)`
pub fn write_magnitude(otf: &DeviceBuffer<Complex32>, path: &Path) -> Result<()> {
    raw::write(otf.view().iter().map(|c| c.norm()), path)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostDevice;
    use crate::geometry::GeometryBuilder;
    use crate::psf::condition;
    use crate::volume::Volume;
    use float_eq::assert_float_eq;
    use rstest::rstest;
    use units::{nm, isotropic};

    fn geometry(dims: BoxDim_u, raw_nm: f32, psf_nm: f32) -> VolumeGeometry {
        let [nx, ny, nz] = dims;
        GeometryBuilder::new()
            .set_resolution(isotropic(nm(raw_nm)), isotropic(nm(psf_nm))).unwrap()
            .set_volume_size(nx, ny, nz).unwrap()
            .build().unwrap()
    }

    fn centred_impulse(dims: BoxDim_u) -> ConditionedPsf {
        let mut v = Volume::zeros(dims);
        v[geometric_center(dims)] = 1.0;
        condition(v).unwrap()
    }

    fn gaussian_psf(dims: BoxDim_u, sigma: f64) -> ConditionedPsf {
        let c = geometric_center(dims).map(|c| c as f64);
        let v = Volume::from_fn(dims, |[x, y, z]| {
            let d2 = (x as f64 - c[0]).powi(2) + (y as f64 - c[1]).powi(2) + (z as f64 - c[2]).powi(2);
            (-d2 / (2.0 * sigma * sigma)).exp() as f32
        });
        condition(v).unwrap()
    }

    #[rstest(/**/  psf_dims  ,  target     , policy               ,
             case([16, 16, 16], [16, 16, 16], OutOfSupport::Zero   ),
             case([16, 16, 16], [32, 24, 20], OutOfSupport::Zero   ),
             case([ 9, 11, 13], [30, 22, 17], OutOfSupport::Zero   ),
             case([ 9,  9,  9], [32, 32, 32], OutOfSupport::Zero   ),
             case([15, 15, 15], [32, 32, 32], OutOfSupport::Zero   ),
             case([ 3,  5,  7], [12, 10,  9], OutOfSupport::Zero   ),
             case([ 8,  8,  8], [64, 64, 64], OutOfSupport::Zero   ),
             case([ 9, 11, 13], [30, 22, 17], OutOfSupport::Nearest),
    )]
    fn impulse_gives_unit_magnitude_otf(psf_dims: BoxDim_u, target: BoxDim_u, policy: OutOfSupport) {
        let device = HostDevice::new();
        let g = geometry(target, 100.0, 100.0);
        let otf = synthesize(&device, &centred_impulse(psf_dims), &g, policy).unwrap();
        assert_eq!(otf.dims(), half_spectrum(target));
        for c in otf.view().iter() {
            assert_float_eq!(c.norm(), 1.0, abs <= 1e-5);
        }
    }

    #[test]
    fn mirrored_bins_are_read_through_hermitian_symmetry() {
        use rustfft::num_complex::Complex64;
        let dims = [3, 5, 4];
        let v = Volume::from_fn(dims, |[x, y, z]| (1 + x + 2 * y * y + 3 * z * x) as f32);
        let plans = FftPlans::new(dims).unwrap();
        let mut half = Array3::zeros(shape_zyx(half_spectrum(dims)));
        plans.forward(v.array().view(), half.view_mut()).unwrap();

        let dft = |k: [usize; 3]| -> Complex64 {
            let mut acc = Complex64::new(0.0, 0.0);
            for ((z, y, x), &value) in v.array().indexed_iter() {
                let phase = [x, y, z].iter().zip(k).zip(dims)
                    .map(|((&i, k), n)| (i * k) as f64 / n as f64)
                    .sum::<f64>();
                acc += Complex64::from_polar(value as f64, -2.0 * std::f64::consts::PI * phase);
            }
            acc
        };
        let at = |i: usize| Tap { i0: i, i1: i, w: 0.0, mirror: false };
        // x bin 2 of 3 is not stored: it is the partner of bin 1
        let tx = Tap { i0: 0, i1: 1, w: 1.0, mirror: true };
        for ky in 0..5 {
            for kz in 0..4 {
                let got = interpolate(&half.view(), tx, at(ky), at(kz));
                let expected = dft([2, ky, kz]);
                assert_float_eq!(got.re as f64, expected.re, abs <= 1e-2);
                assert_float_eq!(got.im as f64, expected.im, abs <= 1e-2);
            }
        }
    }

    #[rstest(/**/  psf_dims  ,  target      , raw_nm, psf_nm,
             case([16, 16, 16], [  1,   1,   1], 100.0,  100.0),
             case([16, 16, 16], [128,  64,  32], 100.0,   50.0),
             case([32, 16,  8], [  7,  99,   3],  80.0,  200.0),
    )]
    fn otf_always_has_target_half_spectrum_shape(psf_dims: BoxDim_u, target: BoxDim_u, raw_nm: f32, psf_nm: f32) {
        let device = HostDevice::new();
        let g = geometry(target, raw_nm, psf_nm);
        let otf = synthesize(&device, &gaussian_psf(psf_dims, 1.5), &g, OutOfSupport::Zero).unwrap();
        assert_eq!(otf.dims(), [target[0] / 2 + 1, target[1], target[2]]);
        assert_eq!(otf.len(), g.complex_len());
    }

    #[test]
    fn same_grid_reproduces_template() {
        let device = HostDevice::new();
        let dims = [16, 12, 10];
        let psf = gaussian_psf(dims, 1.3);
        let template = template_spectrum(&psf).unwrap();
        let otf = synthesize(&device, &psf, &geometry(dims, 100.0, 100.0), OutOfSupport::Zero).unwrap();
        for (a, b) in template.iter().zip(otf.view().iter()) {
            assert_float_eq!(a.re, b.re, abs <= 1e-6);
            assert_float_eq!(a.im, b.im, abs <= 1e-6);
        }
        assert_float_eq!(otf.view()[[0, 0, 0]].re, 1.0, abs <= 1e-6);
    }

    // A Gaussian of width 2 PSF voxels of 50 nm is 100 nm wide; on a 100 nm
    // grid its OTF must match the analytic exp(-2 π² σ² f²)
    #[test]
    fn physical_frequencies_are_matched_across_voxel_sizes() {
        let device = HostDevice::new();
        let psf = gaussian_psf([32, 32, 32], 2.0);
        let otf = synthesize(&device, &psf, &geometry([32, 32, 32], 100.0, 50.0), OutOfSupport::Zero).unwrap();
        let view = otf.view();
        for k in 0..8 {
            let f = k as f64 / 32.0;  // cycles per target voxel
            let sigma = 1.0;          // in target voxels
            let expected = (-2.0 * std::f64::consts::PI.powi(2) * sigma * sigma * f * f).exp() as f32;
            assert_float_eq!(view[[0, 0, k]].re, expected, abs <= 2e-2);
        }
    }

    #[rstest(/**/ policy, zero_beyond_support,
             case(OutOfSupport::Zero   , true ),
             case(OutOfSupport::Nearest, false),
    )]
    fn out_of_support_policy(policy: OutOfSupport, zero_beyond_support: bool) {
        // Target voxels half the size of the PSF's: bins above n/4 have no
        // counterpart in the template.
        let device = HostDevice::new();
        let psf = gaussian_psf([16, 16, 16], 0.8);
        let otf = synthesize(&device, &psf, &geometry([16, 16, 16], 50.0, 100.0), policy).unwrap();
        let beyond = otf.view()[[0, 0, 6]];
        let edge   = otf.view()[[0, 0, 4]];
        if zero_beyond_support {
            assert_eq!(beyond, Complex32::new(0.0, 0.0));
        } else {
            assert_float_eq!(beyond.re, edge.re, abs <= 1e-6);
            assert!(beyond.re > 0.0);
        }
    }

    #[test]
    fn taps_interpolate_between_bins() {
        let taps = axis_taps(8, 16, 0.5, OutOfSupport::Zero, false);
        // k = 1 -> j = 2 exactly; k = 7 (f = -1) -> j = -2 -> bin 14
        assert_eq!(taps[1], Some(Tap { i0: 2, i1: 3, w: 0.0, mirror: false }));
        assert_eq!(taps[7], Some(Tap { i0: 14, i1: 15, w: 0.0, mirror: false }));
        let taps = axis_taps(8, 4, 4.0, OutOfSupport::Zero, true);
        // k = 2 -> j = 0.5
        assert_eq!(taps[2], Some(Tap { i0: 0, i1: 1, w: 0.5, mirror: false }));
    }

    #[test]
    fn odd_psf_support_reaches_nyquist() {
        // p = 3: bins 0, 1, -1; Nyquist at 1.5 sits across the wrap
        let taps = axis_taps(6, 3, 2.0, OutOfSupport::Zero, false);
        assert_eq!(taps[3], Some(Tap { i0: 1, i1: 2, w: 0.5, mirror: false }));
        assert_eq!(taps[4], Some(Tap { i0: 2, i1: 0, w: 0.0, mirror: false }));
        let taps = axis_taps(6, 3, 2.0, OutOfSupport::Zero, true);
        assert_eq!(taps[3], Some(Tap { i0: 1, i1: 1, w: 0.5, mirror: true }));
        // Beyond Nyquist is still out of support
        let taps = axis_taps(8, 3, 2.0, OutOfSupport::Zero, false);
        assert_eq!(taps[4], None);
    }

    #[test]
    fn wrong_buffer_shape_is_rejected() {
        let device = HostDevice::new();
        let g = geometry([16, 16, 16], 100.0, 100.0);
        let mut otf = device.allocate::<Complex32>("otf", [16, 16, 16]).unwrap();
        let err = synthesize_into(&centred_impulse([8, 8, 8]), &g, OutOfSupport::Zero, &mut otf).unwrap_err();
        assert!(matches!(err, DeconvError::ShapeMismatch { .. }));
    }
}
