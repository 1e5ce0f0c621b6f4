//! Distance-gated edge attenuation.
//!
//! Every message is scaled by a generalized Gaussian of its edge's physical
//! distance:
//!
//! ```text
//! w(d) = exp( -( d^2 / (2 sigma^2) )^beta )
//! ```
//!
//! - `sigma` sets the length scale: edges much longer than `sigma` are muted.
//! - `beta` sets how sharp the cut-off is. `beta = 1` is an ordinary Gaussian;
//!   large `beta` approaches a hard threshold at `d = sqrt(2) sigma`.
//!
//! `w(0) = 1` for every valid `sigma`, `beta`, and `w` never increases with
//! distance, so nearby neighbours always dominate the aggregation.
//!
//! Both scalars are trainable. They live in the caller's `VarMap` so the
//! optimizer updates them like any other weight; after each update
//! [`DistanceKernel::constrain`] projects them back into
//! `sigma in [0.002, 1]`, `beta in [1, 10]`.

use candle_core::{DType, Tensor, Var};
use candle_nn::{Init, VarBuilder};
use tracing::debug;

use crate::error::{Error, Result};
use crate::optim::Constrain;

/// Initial kernel bandwidth.
pub const SIGMA_INIT: f64 = 0.005;
/// Initial kernel sharpness.
pub const BETA_INIT: f64 = 4.0;
/// Admissible range for `sigma`.
pub const SIGMA_BOUNDS: (f64, f64) = (0.002, 1.0);
/// Admissible range for `beta`.
pub const BETA_BOUNDS: (f64, f64) = (1.0, 10.0);

/// Upper bound on `beta * ln(d^2 / 2 sigma^2)`. Past it the weight is 0 in
/// f32 anyway, and `exp` of the exponent stays finite.
const LOG_POWER_CEILING: f64 = 80.0;

/// Learned generalized-Gaussian distance kernel.
#[derive(Debug, Clone)]
pub struct DistanceKernel {
    sigma: Tensor,
    beta: Tensor,
}

impl DistanceKernel {
    /// Create the kernel, registering `sigma` and `beta` under `vb`.
    ///
    /// Existing values in the backing store (e.g. loaded weights) take
    /// precedence over the initial constants.
    pub fn new(vb: VarBuilder) -> Result<Self> {
        let sigma = vb.get_with_hints(1, "sigma", Init::Const(SIGMA_INIT))?;
        let beta = vb.get_with_hints(1, "beta", Init::Const(BETA_INIT))?;
        Ok(Self { sigma, beta })
    }

    /// Kernel with fixed, non-trainable parameters.
    pub fn from_values(sigma: f64, beta: f64, device: &candle_core::Device) -> Result<Self> {
        if !(sigma > 0.0 && beta > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "kernel parameters must be positive, got sigma={sigma} beta={beta}"
            )));
        }
        let sigma = Tensor::new(&[sigma as f32], device)?;
        let beta = Tensor::new(&[beta as f32], device)?;
        Ok(Self { sigma, beta })
    }

    /// Current bandwidth.
    pub fn sigma(&self) -> Result<f32> {
        scalar(&self.sigma)
    }

    /// Current sharpness exponent.
    pub fn beta(&self) -> Result<f32> {
        scalar(&self.beta)
    }

    /// Per-edge weights, same shape as `distance`.
    ///
    /// Zero distance is well defined: `0^beta = 0` so the weight is exactly 1.
    /// The power is taken as `exp(beta * ln x)` only where `x > 0`, and the
    /// exponent is capped, so gradients stay finite at `d = 0` and for edges
    /// far beyond `sigma`.
    pub fn weights(&self, distance: &Tensor) -> Result<Tensor> {
        let distance = distance.to_dtype(self.sigma.dtype())?;
        let two_sigma_sq = (self.sigma.sqr()? * 2.0)?;
        let scaled = distance.sqr()?.broadcast_div(&two_sigma_sq)?;

        let positive = scaled.gt(0f64)?;
        let safe = positive.where_cond(&scaled, &scaled.ones_like()?)?;
        let exponent = safe
            .log()?
            .broadcast_mul(&self.beta)?
            .minimum(LOG_POWER_CEILING)?;
        let powered = positive.where_cond(&exponent.exp()?, &scaled.zeros_like()?)?;
        Ok(powered.neg()?.exp()?)
    }
}

impl Constrain for DistanceKernel {
    /// Clamp `sigma` and `beta` into their admissible ranges.
    ///
    /// No-op for parameters not backed by a variable (fixed kernels, weights
    /// loaded read-only).
    /// A NaN parameter is reset to its initial value.
    fn constrain(&self) -> Result<()> {
        clamp_var("sigma", &self.sigma, SIGMA_BOUNDS, SIGMA_INIT)?;
        clamp_var("beta", &self.beta, BETA_BOUNDS, BETA_INIT)
    }
}

fn clamp_var(name: &str, param: &Tensor, (lo, hi): (f64, f64), reset: f64) -> Result<()> {
    if !param.is_variable() {
        return Ok(());
    }
    let current = scalar(param)? as f64;
    if (lo..=hi).contains(&current) {
        return Ok(());
    }
    let projected = if current.is_nan() {
        (param.ones_like()? * reset)?
    } else {
        param.clamp(lo, hi)?
    };
    Var::from_tensor(param)?.set(&projected.detach())?;
    debug!(param = name, from = current, lo, hi, "clamped kernel parameter");
    Ok(())
}

fn scalar(t: &Tensor) -> Result<f32> {
    Ok(t.to_dtype(DType::F32)?.flatten_all()?.get(0)?.to_scalar::<f32>()?)
}
