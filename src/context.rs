//! Device buffers and FFT plans owned by one deconvolution run.

use log::{debug, info};
use rustfft::num_complex::Complex32;

use crate::device::{BufferId, Device, DeviceBuffer, Pinned};
use crate::error::{DeconvError, Result};
use crate::fft::FftPlans;
use crate::geometry::VolumeGeometry;
use crate::index::n_elements;

/// Everything the solver touches between two host transfers.
///
/// All real buffers have `nx * ny * nz` elements, all complex ones
/// `(nx/2 + 1) * ny * nz`. Nothing is ever resized: a new geometry needs a new
/// context.
#[derive(Debug)]
pub struct IterationContext {
    pub(crate) geometry: VolumeGeometry,
    /// Observed volume, never modified after upload
    pub(crate) raw: DeviceBuffer<f32>,
    /// Current estimate
    pub(crate) input: DeviceBuffer<f32>,
    /// Next estimate
    pub(crate) output: DeviceBuffer<f32>,
    /// Spatial scratch: blurred estimate, then the ratio and its back-projection
    pub(crate) real_a: DeviceBuffer<f32>,
    /// Frequency-domain scratch
    pub(crate) complex_a: DeviceBuffer<Complex32>,
    /// Read-only once the context exists
    pub(crate) otf: DeviceBuffer<Complex32>,
    pub(crate) plans: FftPlans,
}

impl IterationContext {

    /// Allocate every buffer and plan for `geometry`, taking ownership of an
    /// already synthesized `otf`.
    ///
    /// Either everything is acquired or nothing is: if any step fails, the
    /// buffers obtained so far (and `otf`) are returned to the device before
    /// the error is.
    pub fn allocate<D: Device>(device: &D, geometry: &VolumeGeometry, otf: DeviceBuffer<Complex32>) -> Result<Self> {
        let dims = geometry.dims();
        let spectrum = geometry.spectrum_dims();
        if otf.dims() != spectrum {
            return Err(DeconvError::ShapeMismatch {
                what: "OTF", dims: spectrum, expected: n_elements(spectrum), found: otf.len(),
            })
        }
        let raw       = device.allocate::<f32>      ("raw"      , dims)?;
        let input     = device.allocate::<f32>      ("input"    , dims)?;
        let output    = device.allocate::<f32>      ("output"   , dims)?;
        let real_a    = device.allocate::<f32>      ("real_a"   , dims)?;
        let complex_a = device.allocate::<Complex32>("complex_a", spectrum)?;
        let plans = FftPlans::new(dims)?;
        device.synchronize()?;
        info!("allocated iteration context for {dims:?} on {} device", device.name());
        Ok(Self { geometry: *geometry, raw, input, output, real_a, complex_a, otf, plans })
    }

    pub fn geometry(&self) -> &VolumeGeometry { &self.geometry }

    /// Upload the observed volume and make it the initial estimate.
    pub fn load<D: Device, T: Copy + Into<f32> + Sync>(&mut self, device: &D, observed: &Pinned<T>) -> Result<()> {
        device.upload(observed, &mut self.raw)?;
        self.input.view_mut().assign(&self.raw.view());
        device.synchronize()?;
        debug!("loaded {} samples into {} and {}", observed.len(), self.raw.id(), self.input.id());
        Ok(())
    }

    /// Buffer holding the most recent estimate once a solver run has finished
    pub fn output(&self) -> &DeviceBuffer<f32> { &self.output }

    pub fn raw_id   (&self) -> BufferId { self.raw   .id() }
    pub fn input_id (&self) -> BufferId { self.input .id() }
    pub fn output_id(&self) -> BufferId { self.output.id() }

    /// Exchange the roles of the two estimate buffers
    pub(crate) fn swap_io(&mut self) { std::mem::swap(&mut self.input, &mut self.output); }

    /// Return every buffer to the device. Dropping the context does the same.
    pub fn release(self) {
        debug!("releasing iteration context for {:?}", self.geometry.dims());
    }
}
