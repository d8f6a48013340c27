//! Device memory: owning buffer handles, host pinning, transfers.
//!
//! The numerical core never touches device memory directly. It asks a
//! [`Device`] for [`DeviceBuffer`]s, which release their memory when dropped,
//! and moves host data through a scoped [`Pinned`] registration.
//!
//! [`HostDevice`] executes everything in host memory on the `rayon` pool. It
//! keeps a ledger of allocated bytes and pinned regions, and can be given a
//! memory limit, so that allocation failure and cleanup are observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::trace;
use ndarray::{Array3, ArrayView3, ArrayViewMut3};
use num_traits::Zero;
use rayon::prelude::*;

use crate::error::{DeconvError, Result};
use crate::index::{BoxDim_u, n_elements, shape_zyx};

/// Identifies one allocation for the lifetime of its device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "#{}", self.0) }
}

pub trait Device {

    fn name(&self) -> &str;

    /// Allocate a zero-filled buffer holding `dims = [nx, ny, nz]` elements.
    fn allocate<T: Clone + Zero + Send + Sync>(&self, label: &'static str, dims: BoxDim_u) -> Result<DeviceBuffer<T>>;

    /// Register `host` for direct transfers. Registration lasts as long as
    /// the returned guard.
    fn pin<'h, T: Sync>(&self, host: &'h [T]) -> Result<Pinned<'h, T>>;

    /// Copy pinned host samples into `dst`, converting them to `f32`.
    fn upload<T: Copy + Into<f32> + Sync>(&self, src: &Pinned<T>, dst: &mut DeviceBuffer<f32>) -> Result<()>;

    /// Copy `src` into host memory.
    fn download(&self, src: &DeviceBuffer<f32>, dst: &mut [f32]) -> Result<()>;

    /// Block until all submitted work has completed.
    fn synchronize(&self) -> Result<()>;
}

// ----- Buffers -----------------------------------------------------------------------------

/// Owning handle to device memory. The memory is returned to the device when
/// the handle is dropped, whichever way control leaves its scope.
pub struct DeviceBuffer<T> {
    id: BufferId,
    label: &'static str,
    data: Array3<T>,
    _allocation: Allocation,
}

impl<T> DeviceBuffer<T> {
    pub fn id(&self) -> BufferId { self.id }
    pub fn label(&self) -> &'static str { self.label }

    /// `[nx, ny, nz]`
    pub fn dims(&self) -> BoxDim_u {
        let (nz, ny, nx) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn len(&self) -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    pub(crate) fn view    (&    self) -> ArrayView3   <'_, T> { self.data.view()     }
    pub(crate) fn view_mut(&mut self) -> ArrayViewMut3<'_, T> { self.data.view_mut() }
}

impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dims", &self.dims())
            .finish()
    }
}

/// Bytes charged to a ledger, refunded on drop
struct Allocation {
    bytes: usize,
    ledger: Arc<Ledger>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger.in_use .fetch_sub(self.bytes, Ordering::SeqCst);
        self.ledger.buffers.fetch_sub(1,          Ordering::SeqCst);
    }
}

// ----- Pinning -----------------------------------------------------------------------------

/// Scoped registration of a host region for device transfers. Unregisters
/// when dropped, including on early return and unwinding.
pub struct Pinned<'h, T> {
    host: &'h [T],
    ledger: Arc<Ledger>,
}

impl<'h, T> Pinned<'h, T> {
    pub fn len(&self) -> usize { self.host.len() }
    pub fn is_empty(&self) -> bool { self.host.is_empty() }
}

impl<'h, T> Drop for Pinned<'h, T> {
    fn drop(&mut self) {
        self.ledger.pinned.fetch_sub(1, Ordering::SeqCst);
        trace!("unpinned {} host samples", self.host.len());
    }
}

// ----- Host implementation ------------------------------------------------------------------

#[derive(Debug, Default)]
struct Ledger {
    limit: Option<usize>,
    in_use: AtomicUsize,
    buffers: AtomicUsize,
    pinned: AtomicUsize,
    downloads: AtomicUsize,
    next_id: AtomicU64,
}

impl Ledger {
    fn charge(&self, label: &'static str, bytes: usize) -> Result<()> {
        let limit = self.limit;
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let total = used.checked_add(bytes)?;
                match limit {
                    Some(limit) if total > limit => None,
                    _ => Some(total),
                }
            })
            .map(|_| ())
            .map_err(|used| DeconvError::device(
                "allocate",
                format!("`{label}` needs {bytes} bytes but {used} of {limit:?} are in use"),
            ))
    }
}

/// Runs device work in host memory
#[derive(Debug, Clone, Default)]
pub struct HostDevice {
    ledger: Arc<Ledger>,
}

impl HostDevice {

    pub fn new() -> Self { Self::default() }

    /// Refuse allocations which would take the total past `bytes`
    pub fn with_memory_limit(bytes: usize) -> Self {
        Self { ledger: Arc::new(Ledger { limit: Some(bytes), ..Ledger::default() }) }
    }

    /// Bytes currently held by live buffers
    pub fn in_use(&self) -> usize { self.ledger.in_use.load(Ordering::SeqCst) }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize { self.ledger.buffers.load(Ordering::SeqCst) }

    /// Number of host regions currently registered
    pub fn pinned_regions(&self) -> usize { self.ledger.pinned.load(Ordering::SeqCst) }

    /// Number of device-to-host copies made so far
    pub fn downloads(&self) -> usize { self.ledger.downloads.load(Ordering::SeqCst) }
}

impl Device for HostDevice {

    fn name(&self) -> &str { "host" }

    fn allocate<T: Clone + Zero + Send + Sync>(&self, label: &'static str, dims: BoxDim_u) -> Result<DeviceBuffer<T>> {
        let len = n_elements(dims);
        let bytes = len * std::mem::size_of::<T>();
        self.ledger.charge(label, bytes)?;
        // From here on, the charge is refunded if anything fails
        let allocation = Allocation { bytes, ledger: Arc::clone(&self.ledger) };
        self.ledger.buffers.fetch_add(1, Ordering::SeqCst);

        let mut storage = Vec::new();
        storage.try_reserve_exact(len).map_err(|e| DeconvError::device("allocate", format!("`{label}`: {e}")))?;
        storage.resize(len, T::zero());
        let data = Array3::from_shape_vec(shape_zyx(dims), storage)
            .map_err(|e| DeconvError::device("allocate", format!("`{label}`: {e}")))?;

        let id = BufferId(self.ledger.next_id.fetch_add(1, Ordering::SeqCst));
        trace!("allocated {label} {id}: {dims:?}, {bytes} bytes");
        Ok(DeviceBuffer { id, label, data, _allocation: allocation })
    }

    fn pin<'h, T: Sync>(&self, host: &'h [T]) -> Result<Pinned<'h, T>> {
        self.ledger.pinned.fetch_add(1, Ordering::SeqCst);
        trace!("pinned {} host samples", host.len());
        Ok(Pinned { host, ledger: Arc::clone(&self.ledger) })
    }

    fn upload<T: Copy + Into<f32> + Sync>(&self, src: &Pinned<T>, dst: &mut DeviceBuffer<f32>) -> Result<()> {
        check_transfer("upload", src.len(), dst)?;
        let mut view = dst.view_mut();
        let dst = view.as_slice_mut().ok_or_else(|| DeconvError::device("upload", "buffer is not contiguous"))?;
        dst.par_iter_mut()
            .zip(src.host.par_iter())
            .for_each(|(d, &s)| *d = s.into());
        Ok(())
    }

    fn download(&self, src: &DeviceBuffer<f32>, dst: &mut [f32]) -> Result<()> {
        check_transfer("download", dst.len(), src)?;
        let view = src.view();
        let src = view.as_slice().ok_or_else(|| DeconvError::device("download", "buffer is not contiguous"))?;
        dst.copy_from_slice(src);
        self.ledger.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn synchronize(&self) -> Result<()> { Ok(()) }
}

fn check_transfer<T>(op: &'static str, host_len: usize, buffer: &DeviceBuffer<T>) -> Result<()> {
    if host_len == buffer.len() { return Ok(()) }
    Err(DeconvError::device(op, format!(
        "host holds {host_len} samples, device buffer `{}` {:?} holds {}",
        buffer.label(), buffer.dims(), buffer.len()
    )))
}
