//! The call surface of a deconvolution run.
//!
//! ```text
//! set_resolution ─┐
//!                 ├─ set_psf ── initialize ── process ── process ...
//! set_volume_size ┘
//! ```
//!
//! Calls made out of this order are refused with `DeconvError::Ordering`.

use std::path::PathBuf;

use log::{debug, info, warn};
use rustfft::num_complex::Complex32;
use units::VoxelSize;

use crate::context::IterationContext;
use crate::device::{Device, DeviceBuffer, HostDevice};
use crate::error::{DeconvError, Result};
use crate::geometry::{GeometryBuilder, VolumeGeometry};
use crate::index::n_elements;
use crate::otf::{self, OutOfSupport};
use crate::psf;
use crate::solver::RichardsonLucy;
use crate::volume::Volume;

/// Where a `Deconvolver` is in its life cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Geometry and PSF are being supplied
    Configuring,
    /// Context allocated, OTF in place
    Ready,
    /// Inside `process`
    Iterating,
    /// The last `process` completed; `process` may be called again
    Done,
}

/// Everything about a run except its geometry and PSF
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub solver: RichardsonLucy,
    pub out_of_support: OutOfSupport,
    /// Directory for the aligned PSF and `|OTF|` side files
    pub diagnostics: Option<PathBuf>,
}

pub struct Deconvolver<D: Device = HostDevice> {
    device: D,
    settings: Settings,
    builder: GeometryBuilder,
    /// Geometry for which `otf` was synthesized
    geometry: Option<VolumeGeometry>,
    otf: Option<DeviceBuffer<Complex32>>,
    context: Option<IterationContext>,
    phase: Phase,
}

impl Deconvolver<HostDevice> {
    pub fn on_host(settings: Settings) -> Self { Self::new(HostDevice::new(), settings) }
}

impl<D: Device> Deconvolver<D> {

    pub fn new(device: D, settings: Settings) -> Self {
        Self {
            device, settings,
            builder: GeometryBuilder::new(),
            geometry: None,
            otf: None,
            context: None,
            phase: Phase::Configuring,
        }
    }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn device(&self) -> &D { &self.device }
    pub fn settings(&self) -> &Settings { &self.settings }

    /// Geometry fixed by the last successful `set_psf`
    pub fn geometry(&self) -> Option<&VolumeGeometry> { self.geometry.as_ref() }

    pub fn set_resolution(&mut self, raw: VoxelSize, psf: VoxelSize) -> Result<()> {
        self.require_configuring("set_resolution")?;
        self.builder.set_resolution(raw, psf)?;
        self.invalidate_otf();
        Ok(())
    }

    pub fn set_volume_size(&mut self, nx: usize, ny: usize, nz: usize) -> Result<()> {
        self.require_configuring("set_volume_size")?;
        self.builder.set_volume_size(nx, ny, nz)?;
        self.invalidate_otf();
        Ok(())
    }

    /// Condition `psf` and synthesize the OTF for the current geometry.
    pub fn set_psf<T: Copy + Into<f32> + Sync>(&mut self, psf: &Volume<T>) -> Result<()> {
        self.require_configuring("set_psf")?;
        if !(self.builder.has_resolution() && self.builder.has_volume_size()) {
            return Err(DeconvError::Ordering {
                call: "set_psf", phase: self.phase,
                expected: "`set_resolution` and `set_volume_size` must both succeed first",
            })
        }
        let geometry = self.builder.build()?;
        let conditioned = psf::condition(Volume::<f32>::from(psf))?;
        if let Some(dir) = &self.settings.diagnostics {
            std::fs::create_dir_all(dir)?;
            conditioned.volume().write_raw(&dir.join("psf-aligned.raw"))?;
        }
        let otf = otf::synthesize(&self.device, &conditioned, &geometry, self.settings.out_of_support)?;
        if let Some(dir) = &self.settings.diagnostics {
            otf::write_magnitude(&otf, &dir.join("otf-magnitude.raw"))?;
            debug!("diagnostics written to {}", dir.display());
        }
        info!("OTF {:?} synthesized from PSF {:?}", otf.dims(), conditioned.dims());
        self.geometry = Some(geometry);
        self.otf = Some(otf);
        Ok(())
    }

    /// Allocate the iteration context and hand it the OTF.
    ///
    /// If allocation fails, everything acquired so far is released, including
    /// the OTF: the PSF has to be set again before retrying.
    pub fn initialize(&mut self) -> Result<()> {
        self.require_configuring("initialize")?;
        let (Some(geometry), Some(otf)) = (self.geometry, self.otf.take()) else {
            return Err(DeconvError::Ordering {
                call: "initialize", phase: self.phase, expected: "`set_psf` must succeed first",
            })
        };
        match IterationContext::allocate(&self.device, &geometry, otf) {
            Ok(context) => {
                self.context = Some(context);
                self.phase = Phase::Ready;
                info!("ready to deconvolve {:?}", geometry.dims());
                Ok(())
            }
            Err(e) => {
                self.geometry = None;
                warn!("initialization failed, OTF released: {e}");
                Err(e)
            }
        }
    }

    /// Deconvolve `input` into `output`. Only the final estimate leaves the
    /// device.
    pub fn process<T: Copy + Into<f32> + Sync>(&mut self, output: &mut Volume<f32>, input: &Volume<T>) -> Result<()> {
        self.execute(output, input, None)
    }

    /// As `process`, showing `observer` every intermediate estimate, with the
    /// 0-based iteration index. Each estimate is copied back to the host.
    pub fn process_with<T, F>(&mut self, output: &mut Volume<f32>, input: &Volume<T>, mut observer: F) -> Result<()>
    where
        T: Copy + Into<f32> + Sync,
        F: FnMut(usize, &Volume<f32>),
    {
        self.execute(output, input, Some(&mut observer))
    }

    fn execute<T>(
        &mut self,
        output  : &mut Volume<f32>,
        input   : &Volume<T>,
        observer: Option<&mut dyn FnMut(usize, &Volume<f32>)>,
    ) -> Result<()>
    where
        T: Copy + Into<f32> + Sync,
    {
        if !matches!(self.phase, Phase::Ready | Phase::Done) {
            return Err(DeconvError::Ordering {
                call: "process", phase: self.phase, expected: "`initialize` must succeed first",
            })
        }
        let Some(context) = self.context.as_mut() else {
            return Err(DeconvError::Ordering {
                call: "process", phase: self.phase, expected: "`initialize` must succeed first",
            })
        };
        let dims = context.geometry().dims();
        for (what, found) in [("input volume", input.dims()), ("output volume", output.dims())] {
            if found != dims {
                return Err(DeconvError::ShapeMismatch { what, dims, expected: n_elements(dims), found: n_elements(found) })
            }
        }

        {
            let pinned = self.device.pin(input.data())?;
            context.load(&self.device, &pinned)?;
        }

        self.phase = Phase::Iterating;
        let device = &self.device;
        let solver = &self.settings.solver;
        let run = match observer {
            None => solver.run(device, context),
            Some(observer) => {
                let mut scratch = Volume::zeros(dims);
                solver.run_with(device, context, &mut |iteration, estimate| {
                    device.download(estimate, scratch.data_mut())?;
                    observer(iteration, &scratch);
                    Ok(())
                })
            }
        };
        let finish = run.and_then(|()| device.download(context.output(), output.data_mut()));
        if let Err(e) = finish {
            // Device failures end the run: give back everything
            self.teardown();
            return Err(e)
        }
        self.phase = Phase::Done;
        Ok(())
    }

    /// Release the context and forget geometry and PSF
    pub fn teardown(&mut self) {
        if let Some(context) = self.context.take() { context.release() }
        self.otf = None;
        self.geometry = None;
        self.builder = GeometryBuilder::new();
        self.phase = Phase::Configuring;
    }

    fn require_configuring(&self, call: &'static str) -> Result<()> {
        match self.phase {
            Phase::Configuring => Ok(()),
            phase => Err(DeconvError::Ordering { call, phase, expected: "geometry and PSF are fixed once initialized" }),
        }
    }

    fn invalidate_otf(&mut self) {
        if self.otf.take().is_some() {
            debug!("geometry changed: OTF discarded, `set_psf` needed again");
        }
        self.geometry = None;
    }
}
