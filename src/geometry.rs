//! The voxel grids involved in a deconvolution run.
//!
//! Two grids matter: the grid of the observed (raw) volume, which is also the
//! grid of the result, and the grid on which the PSF was measured. They share
//! nothing but the physical space they sample, so both voxel sizes are kept.

use units::{VoxelSize, nm_, voxel_ratio};

use crate::deconvolver::Phase;
use crate::error::{DeconvError, Result};
use crate::index::{BoxDim_u, half_spectrum, n_elements, shape_zyx};

/// Largest number of voxels accepted along any axis
pub const MAX_DIM: usize = 2048;

/// Dimensions and voxel sizes of a run. Only obtainable from a
/// `GeometryBuilder` which has validated every component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeGeometry {
    dims: BoxDim_u,
    raw_voxel: VoxelSize,
    psf_voxel: VoxelSize,
}

impl VolumeGeometry {

    /// Number of voxels in the observed volume, `[nx, ny, nz]`
    pub fn dims(&self) -> BoxDim_u { self.dims }

    pub fn raw_voxel_size(&self) -> VoxelSize { self.raw_voxel }
    pub fn psf_voxel_size(&self) -> VoxelSize { self.psf_voxel }

    /// Raw voxel size divided by PSF voxel size, per axis
    pub fn voxel_ratio(&self) -> [f32; 3] { voxel_ratio(self.raw_voxel, self.psf_voxel) }

    /// Element count of every real-valued buffer: `nx * ny * nz`
    pub fn real_len(&self) -> usize { n_elements(self.dims) }

    /// Element count of every complex buffer: `(nx/2 + 1) * ny * nz`
    pub fn complex_len(&self) -> usize { n_elements(self.spectrum_dims()) }

    /// `[nx/2 + 1, ny, nz]`
    pub fn spectrum_dims(&self) -> BoxDim_u { half_spectrum(self.dims) }

    pub fn shape(&self)          -> (usize, usize, usize) { shape_zyx(self.dims) }
    pub fn spectrum_shape(&self) -> (usize, usize, usize) { shape_zyx(self.spectrum_dims()) }
}

/// Collects the pieces of a `VolumeGeometry`, validating each one as it
/// arrives, so that errors are reported by the call which caused them.
#[derive(Clone, Debug, Default)]
pub struct GeometryBuilder {
    resolution: Option<(VoxelSize, VoxelSize)>,
    dims: Option<BoxDim_u>,
}

impl GeometryBuilder {

    pub fn new() -> Self { Self::default() }

    /// Record the voxel sizes of the observed volume and of the PSF.
    pub fn set_resolution(&mut self, raw: VoxelSize, psf: VoxelSize) -> Result<&mut Self> {
        check_voxel_size("raw", raw)?;
        check_voxel_size("PSF", psf)?;
        self.resolution = Some((raw, psf));
        Ok(self)
    }

    /// Record the number of voxels of the observed volume.
    pub fn set_volume_size(&mut self, nx: usize, ny: usize, nz: usize) -> Result<&mut Self> {
        let dims = [nx, ny, nz];
        if dims.iter().any(|&n| n > MAX_DIM) { return Err(DeconvError::SizeExceeded { dims }) }
        if dims.iter().any(|&n| n == 0)      { return Err(DeconvError::ZeroDimension(dims)) }
        self.dims = Some(dims);
        Ok(self)
    }

    pub fn has_resolution (&self) -> bool { self.resolution.is_some() }
    pub fn has_volume_size(&self) -> bool { self.dims      .is_some() }

    /// Finalize the geometry. Fails unless both setters have succeeded.
    pub fn build(&self) -> Result<VolumeGeometry> {
        match (self.resolution, self.dims) {
            (Some((raw_voxel, psf_voxel)), Some(dims)) => Ok(VolumeGeometry { dims, raw_voxel, psf_voxel }),
            _ => Err(DeconvError::Ordering {
                call: "finalize geometry",
                phase: Phase::Configuring,
                expected: "`set_resolution` and `set_volume_size` must both succeed first",
            }),
        }
    }
}

fn check_voxel_size(which: &'static str, size: VoxelSize) -> Result<()> {
    let nm = size.map(nm_);
    if nm.iter().all(|&d| d.is_finite() && d > 0.0) { Ok(()) }
    else { Err(DeconvError::NonPositiveVoxelSize { which, nm }) }
}
