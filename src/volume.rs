//! Host-side volumetric sample container.
//!
//! This is the boundary between the outside world (stacks of `u16` samples
//! on disk) and the numerical core, which only ever sees `f32`.

use std::path::Path;

use ndarray::{Array3, ArrayViewMut3};
use num_traits::Zero;

use crate::error::{DeconvError, Result};
use crate::index::{BoxDim_u, Index3_u, n_elements, shape_zyx};
use crate::io::raw::{self, Sample};

/// A 3-D stack of samples, `x` varying fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct Volume<T> {
    data: Array3<T>,
}

impl<T> Volume<T> {

    pub fn from_vec(dims: BoxDim_u, data: Vec<T>) -> Result<Self> {
        let expected = n_elements(dims);
        let found = data.len();
        Array3::from_shape_vec(shape_zyx(dims), data)
            .map(|data| Self { data })
            .map_err(|_| DeconvError::ShapeMismatch { what: "volume", dims, expected, found })
    }

    pub fn from_fn(dims: BoxDim_u, mut f: impl FnMut(Index3_u) -> T) -> Self {
        Self { data: Array3::from_shape_fn(shape_zyx(dims), |(z, y, x)| f([x, y, z])) }
    }

    /// `[nx, ny, nz]`
    pub fn dims(&self) -> BoxDim_u {
        let (nz, ny, nx) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Contiguous samples, `x` fastest
    pub fn data(&self) -> &[T] {
        self.data.as_slice().expect("volumes are always in standard layout")
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        self.data.as_slice_mut().expect("volumes are always in standard layout")
    }

    /// Samples as an array of shape `(nz, ny, nx)`
    pub fn array(&self) -> &Array3<T> { &self.data }

    /// Mutable view of shape `(nz, ny, nx)`. Only the samples can change
    /// through it, never the layout of the storage.
    pub fn view_mut(&mut self) -> ArrayViewMut3<'_, T> { self.data.view_mut() }

    pub fn into_vec(self) -> Vec<T> { self.data.into_raw_vec() }
}

impl<T: Clone + Zero> Volume<T> {
    pub fn zeros(dims: BoxDim_u) -> Self { Self { data: Array3::zeros(shape_zyx(dims)) } }
}

impl<T> core::ops::Index<Index3_u> for Volume<T> {
    type Output = T;
    #[inline]
    fn index(&self, [x, y, z]: Index3_u) -> &Self::Output { &self.data[[z, y, x]] }
}

impl<T> core::ops::IndexMut<Index3_u> for Volume<T> {
    #[inline]
    fn index_mut(&mut self, [x, y, z]: Index3_u) -> &mut Self::Output { &mut self.data[[z, y, x]] }
}

/// Type-converting constructor: any sample type which widens losslessly into
/// `f32` (`u8`, `u16`, `i16`, `f32`, ...)
impl<T: Copy + Into<f32>> From<&Volume<T>> for Volume<f32> {
    fn from(other: &Volume<T>) -> Self {
        Self { data: other.data.mapv(Into::into) }
    }
}

impl<T: Sample> Volume<T> {

    pub fn read_raw(path: &Path, dims: BoxDim_u) -> Result<Self> {
        let data = raw::read::<T>(path)?.collect::<std::io::Result<Vec<T>>>()?;
        Self::from_vec(dims, data)
    }

    pub fn write_raw(&self, path: &Path) -> Result<()> {
        raw::write(self.data().iter().copied(), path)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn indexing_is_x_fastest() {
        let v = Volume::from_fn([4, 3, 2], |[x, y, z]| (x + 10 * y + 100 * z) as u16);
        assert_eq!(v.dims(), [4, 3, 2]);
        assert_eq!(v[[3, 2, 1]], 123);
        assert_eq!(&v.data()[..5], &[0, 1, 2, 3, 10]);
    }

    #[test]
    fn reshaping_a_mutable_view_leaves_the_storage_contiguous() {
        let mut v = Volume::from_fn([4, 3, 2], |[x, y, z]| (x + 10 * y + 100 * z) as u16);
        {
            let mut view = v.view_mut();
            view.swap_axes(0, 2);
            view.invert_axis(ndarray::Axis(1));
            view[[3, 0, 1]] = 999; // x = 3, y = 2, z = 1
        }
        assert_eq!(v[[3, 2, 1]], 999);
        assert_eq!(v.data().len(), 24);
        assert_eq!(&v.data()[..5], &[0, 1, 2, 3, 10]);
    }

    #[test]
    fn wrong_sample_count_is_reported() {
        let result = Volume::from_vec([2, 2, 2], vec![0.0_f32; 7]);
        assert!(matches!(result, Err(DeconvError::ShapeMismatch { expected: 8, found: 7, .. })));
    }

    #[test]
    fn u16_stack_converts_to_float() {
        let stack = Volume::from_vec([3, 1, 1], vec![0_u16, 1, 65535]).unwrap();
        let float = Volume::<f32>::from(&stack);
        assert_eq!(float.data(), &[0.0, 1.0, 65535.0]);
    }

    #[test]
    fn raw_file_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("vol.raw");
        let original = Volume::from_fn([5, 4, 3], |[x, y, z]| (x * y + z) as f32 * 0.5);
        original.write_raw(&path)?;
        let reloaded = Volume::<f32>::read_raw(&path, [5, 4, 3])?;
        assert_eq!(original, reloaded);
        Ok(())
    }
}
