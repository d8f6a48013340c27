//! Richardson-Lucy deconvolution of 3-D volumes with a measured PSF.
//!
//! A run goes through [`Deconvolver`]: give it the voxel sizes of the
//! observed volume and of the PSF, the size of the observed volume and the PSF
//! itself; `initialize` it, and `process` as many observed volumes of that size
//! as needed.

pub mod config;
pub mod context;
pub mod deconvolver;
pub mod device;
pub mod error;
pub mod fft;
pub mod geometry;
pub mod index;
pub mod io;
pub mod kernels;
pub mod otf;
pub mod psf;
pub mod solver;
pub mod utils;
pub mod volume;

pub use deconvolver::{Deconvolver, Phase, Settings};
pub use device::{Device, HostDevice};
pub use error::{DeconvError, ErrorKind, Result};
pub use geometry::VolumeGeometry;
pub use otf::OutOfSupport;
pub use solver::RichardsonLucy;
pub use volume::Volume;
