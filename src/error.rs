//! Errors reported by the deconvolution pipeline.
//!
//! Every error belongs to one [`ErrorKind`], so that callers can decide
//! whether to fix their input and try again, or to give up on the run.

use thiserror::Error;

use crate::index::BoxDim_u;
use crate::geometry::MAX_DIM;
use crate::deconvolver::Phase;

#[derive(Debug, Error)]
pub enum DeconvError {

    #[error("volume size {dims:?} exceeds the maximum of {MAX_DIM} voxels per axis")]
    SizeExceeded { dims: BoxDim_u },

    #[error("volume dimensions must all be non-zero, got {0:?}")]
    ZeroDimension(BoxDim_u),

    #[error("{which} voxel size must be strictly positive and finite, got {nm:?} nm")]
    NonPositiveVoxelSize { which: &'static str, nm: [f32; 3] },

    #[error("{what} holds {found} samples, but dimensions {dims:?} require {expected}")]
    ShapeMismatch { what: &'static str, dims: BoxDim_u, expected: usize, found: usize },

    #[error("invalid setting `{name}` = {value}: {reason}")]
    InvalidSetting { name: &'static str, value: String, reason: &'static str },

    #[error("could not parse configuration: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("PSF has no intensity left after background removal: centroid is undefined")]
    ZeroIntensity,

    #[error("`{call}` is not allowed while {phase:?}: {expected}")]
    Ordering { call: &'static str, phase: Phase, expected: &'static str },

    #[error("device operation `{op}` failed: {reason}")]
    Device { op: &'static str, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid geometry or settings, reported at the offending call
    Configuration,
    /// Input data on which the algorithm is undefined
    DegenerateInput,
    /// Driver methods called in the wrong order
    Ordering,
    /// Allocation, plan or kernel failure; the run cannot continue
    Device,
    /// Reading or writing volumes
    Io,
}

impl ErrorKind {
    /// Fatal errors abort the whole run; all others can be corrected by the
    /// caller and the offending call repeated.
    pub fn is_fatal(self) -> bool { matches!(self, ErrorKind::Device) }
}

impl DeconvError {

    pub fn kind(&self) -> ErrorKind {
        use DeconvError::*;
        match self {
            SizeExceeded {..} | ZeroDimension(_) | NonPositiveVoxelSize {..} |
            ShapeMismatch {..} | InvalidSetting {..} |
            ConfigFile(_)                        => ErrorKind::Configuration,
            ZeroIntensity                        => ErrorKind::DegenerateInput,
            Ordering {..}                        => ErrorKind::Ordering,
            Device {..}                          => ErrorKind::Device,
            Io(_)                                => ErrorKind::Io,
        }
    }

    pub(crate) fn device(op: &'static str, reason: impl std::fmt::Display) -> Self {
        DeconvError::Device { op, reason: reason.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, DeconvError>;
