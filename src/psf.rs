//! Conditioning of a measured point-spread function.
//!
//! A measured PSF sits on a background offset and is rarely centred in its
//! stack. Both would corrupt the OTF: the offset adds a spurious spike at zero
//! frequency, and an off-centre PSF shifts every restored volume. So, in this
//! order:
//!
//! 1. `remove_background`: subtract the level of the outermost shell of voxels,
//!    clamping at zero;
//!
//! 2. `find_centroid`: intensity-weighted centre of mass;
//!
//! 3. `align_center`: resample the stack so that the centroid lands on the
//!    geometric centre `(px/2, py/2, pz/2)`.
//!
//! `condition` runs all three and returns a `ConditionedPsf`, which is the
//! only thing the OTF synthesizer accepts.

use log::debug;
use ndarray::Zip;

use crate::error::{DeconvError, Result};
use crate::index::BoxDim_u;
use crate::volume::Volume;

/// Intensity-weighted centre of mass, in voxel coordinates `[x, y, z]`
pub type Centroid = [f64; 3];

/// A PSF which has been through `condition`
#[derive(Clone, Debug)]
pub struct ConditionedPsf {
    volume: Volume<f32>,
    background: f32,
    centroid: Centroid,
}

impl ConditionedPsf {
    pub fn volume(&self) -> &Volume<f32> { &self.volume }
    pub fn dims(&self) -> BoxDim_u { self.volume.dims() }

    /// Level which was subtracted from every voxel
    pub fn background(&self) -> f32 { self.background }

    /// Centroid before alignment
    pub fn original_centroid(&self) -> Centroid { self.centroid }

    pub fn into_volume(self) -> Volume<f32> { self.volume }
}

/// Run background removal, centroid estimation and recentring, in that order.
pub fn condition(mut psf: Volume<f32>) -> Result<ConditionedPsf> {
    let background = remove_background(&mut psf);
    let centroid = find_centroid(&psf)?;
    align_center(&mut psf, centroid);
    debug!("PSF {:?}: background {background:.3}, centroid {centroid:.3?} moved to {:?}",
           psf.dims(), geometric_center(psf.dims()));
    Ok(ConditionedPsf { volume: psf, background, centroid })
}

/// Estimate the background as the mean of the voxels on the faces of the
/// stack, subtract it everywhere and clamp at zero. Returns the level.
///
/// Axes with fewer than three voxels have no interior, so their faces are not
/// counted: on a thin stack the shell is the rim of the other axes. A stack
/// with no such axis at all is left untouched.
pub fn remove_background(psf: &mut Volume<f32>) -> f32 {
    let dims = psf.dims();
    let has_faces = dims.map(|n| n > 2);
    let on_shell = |p: [usize; 3]| {
        (0..3).any(|i| has_faces[i] && (p[i] == 0 || p[i] + 1 == dims[i]))
    };
    let (sum, count) = psf.array()
        .indexed_iter()
        .filter(|&((z, y, x), _)| on_shell([x, y, z]))
        .fold((0.0_f64, 0_usize), |(s, n), (_, &v)| (s + v as f64, n + 1));
    if count == 0 {
        debug!("PSF {dims:?} too thin to estimate a background");
        return 0.0
    }
    let background = (sum / count as f64) as f32;
    psf.view_mut().par_mapv_inplace(|v| (v - background).max(0.0));
    background
}

/// Intensity-weighted centre of mass. Fails if the volume holds no intensity.
pub fn find_centroid(psf: &Volume<f32>) -> Result<Centroid> {
    let (total, moments) = psf.array()
        .indexed_iter()
        .fold((0.0_f64, [0.0_f64; 3]), |(total, [mx, my, mz]), ((z, y, x), &v)| {
            let v = v as f64;
            (total + v, [mx + x as f64 * v, my + y as f64 * v, mz + z as f64 * v])
        });
    if !(total.is_finite() && total > 0.0) { return Err(DeconvError::ZeroIntensity) }
    Ok(moments.map(|m| m / total))
}

/// Geometric centre of a stack, `(px/2, py/2, pz/2)` in whole voxels
pub fn geometric_center([nx, ny, nz]: BoxDim_u) -> [usize; 3] { [nx / 2, ny / 2, nz / 2] }

/// Move the contents of `psf` so that `centroid` ends up at the geometric
/// centre. Sub-voxel shifts are resolved by trilinear interpolation; regions
/// uncovered by the shift are filled with zero (there is no wrap-around).
pub fn align_center(psf: &mut Volume<f32>, centroid: Centroid) {
    let dims = psf.dims();
    let center = geometric_center(dims);
    let shift: [f64; 3] = [0, 1, 2].map(|i| center[i] as f64 - centroid[i]);
    let source = psf.clone();
    Zip::indexed(psf.view_mut())
        .par_for_each(|(z, y, x), v| {
            let p = [x as f64 - shift[0], y as f64 - shift[1], z as f64 - shift[2]];
            *v = trilinear(&source, p);
        });
}

/// Sample `volume` at a fractional position; outside the stack reads zero.
fn trilinear(volume: &Volume<f32>, [x, y, z]: [f64; 3]) -> f32 {
    let dims = volume.dims();
    let (x0, fx) = split(x);
    let (y0, fy) = split(y);
    let (z0, fz) = split(z);
    let at = |ix: i64, iy: i64, iz: i64| -> f64 {
        let inside = |i: i64, n: usize| i >= 0 && (i as usize) < n;
        if inside(ix, dims[0]) && inside(iy, dims[1]) && inside(iz, dims[2]) {
            volume[[ix as usize, iy as usize, iz as usize]] as f64
        } else { 0.0 }
    };
    let mut acc = 0.0;
    for (dz, wz) in [(0, 1.0 - fz), (1, fz)] {
        if wz == 0.0 { continue }
        for (dy, wy) in [(0, 1.0 - fy), (1, fy)] {
            if wy == 0.0 { continue }
            for (dx, wx) in [(0, 1.0 - fx), (1, fx)] {
                if wx == 0.0 { continue }
                acc += wx * wy * wz * at(x0 + dx, y0 + dy, z0 + dz);
            }
        }
    }
    acc as f32
}

/// Integer part (towards -∞) and fraction
#[inline]
fn split(v: f64) -> (i64, f64) {
    let f = v.floor();
    (f as i64, v - f)
}
