//! Richardson-Lucy iterations on an `IterationContext`.
//!
//! With observed data `d`, OTF `H` and current estimate `e`, one iteration is
//!
//! ```text
//! b  = F⁻¹[ F[e] · H ]
//! r  = d / b                      (1 where b < ε)
//! e' = max(0, e · F⁻¹[ F[r] · H* ])
//! ```
//!
//! `e` lives in `input`, `e'` is written to `output`, and the two swap roles
//! before the next iteration.

use std::time::Instant;

use log::{debug, info};

use crate::context::IterationContext;
use crate::device::{Device, DeviceBuffer};
use crate::error::{DeconvError, Result};
use crate::kernels;

/// Called after each iteration with the 0-based iteration index and the buffer
/// which has just received the new estimate.
pub type Observer<'a> = dyn FnMut(usize, &DeviceBuffer<f32>) -> Result<()> + 'a;

/// Solver settings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RichardsonLucy {
    iterations: usize,
    relative_epsilon: f32,
}

impl Default for RichardsonLucy {
    fn default() -> Self { Self { iterations: 10, relative_epsilon: 1e-6 } }
}

impl RichardsonLucy {

    pub fn new(iterations: usize, relative_epsilon: f32) -> Result<Self> {
        if iterations == 0 {
            return Err(DeconvError::InvalidSetting {
                name: "iterations", value: iterations.to_string(), reason: "at least one iteration is needed",
            })
        }
        if !(relative_epsilon.is_finite() && relative_epsilon >= 0.0) {
            return Err(DeconvError::InvalidSetting {
                name: "relative_epsilon", value: relative_epsilon.to_string(), reason: "must be finite and non-negative",
            })
        }
        Ok(Self { iterations, relative_epsilon })
    }

    pub fn iterations(&self) -> usize { self.iterations }
    pub fn relative_epsilon(&self) -> f32 { self.relative_epsilon }

    /// Absolute guard threshold for observed data whose largest sample is `max`
    pub fn epsilon(&self, max: f32) -> f32 { (self.relative_epsilon * max).max(f32::MIN_POSITIVE) }

    /// Iterate on data already loaded into `ctx`. On return, `ctx.output()`
    /// holds the final estimate.
    pub fn run<D: Device>(&self, device: &D, ctx: &mut IterationContext) -> Result<()> {
        self.run_with(device, ctx, &mut |_, _| Ok(()))
    }

    pub fn run_with<D: Device>(&self, device: &D, ctx: &mut IterationContext, observer: &mut Observer) -> Result<()> {
        let epsilon = self.epsilon(kernels::max_value(ctx.raw.view()));
        info!("Richardson-Lucy: {} iterations on {:?}, guard ε = {epsilon:e}",
              self.iterations, ctx.geometry.dims());
        let start = Instant::now();
        for iteration in 0..self.iterations {
            let t = Instant::now();
            step(ctx, epsilon)?;
            device.synchronize()?;
            observer(iteration, &ctx.output)?;
            debug!("iteration {:>3}: wrote {} in {:.1?}", iteration + 1, ctx.output.id(), t.elapsed());
            ctx.swap_io();
        }
        // The last estimate was swapped into `input`: bring it back
        ctx.swap_io();
        info!("Richardson-Lucy finished in {:.1?}", start.elapsed());
        Ok(())
    }
}

/// One iteration: `input` → `output`
fn step(ctx: &mut IterationContext, epsilon: f32) -> Result<()> {
    let IterationContext { raw, input, output, real_a, complex_a, otf, plans, .. } = ctx;
    plans.forward(input.view(), complex_a.view_mut())?;
    kernels::multiply_otf(complex_a.view_mut(), otf.view());
    plans.inverse(complex_a.view_mut(), real_a.view_mut())?;

    kernels::guarded_ratio(raw.view(), real_a.view_mut(), epsilon);

    plans.forward(real_a.view(), complex_a.view_mut())?;
    kernels::multiply_otf_conj(complex_a.view_mut(), otf.view());
    plans.inverse(complex_a.view_mut(), real_a.view_mut())?;

    kernels::update_estimate(input.view(), real_a.view(), output.view_mut());
    Ok(())
}
