//! Normalization layers, resolvable by name.

use std::fmt;
use std::str::FromStr;

use candle_core::{Module, Result as CandleResult, Tensor};
use candle_nn::{layer_norm, rms_norm, LayerNorm, LayerNormConfig, RmsNorm, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which normalization follows a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Normalization {
    /// Layer normalization over the feature axis.
    #[default]
    Layer,
    /// Root-mean-square normalization (no centering).
    Rms,
    /// No normalization.
    Identity,
}

impl Normalization {
    pub fn name(&self) -> &'static str {
        match self {
            Normalization::Layer => "LayerNormalization",
            Normalization::Rms => "RMSNormalization",
            Normalization::Identity => "none",
        }
    }
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "layernormalization" | "layer_norm" | "layernorm" | "layer" => {
                Ok(Normalization::Layer)
            }
            "rmsnormalization" | "rms_norm" | "rmsnorm" | "rms" => Ok(Normalization::Rms),
            "none" | "identity" | "linear" => Ok(Normalization::Identity),
            other => Err(Error::UnknownNormalization(other.to_string())),
        }
    }
}

impl TryFrom<String> for Normalization {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Normalization> for String {
    fn from(value: Normalization) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Keyword arguments forwarded to the normalization layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormConfig {
    /// Variance epsilon (Keras default: 1e-3).
    pub epsilon: f64,
    /// Learn an additive offset (layer norm only).
    pub center: bool,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-3,
            center: true,
        }
    }
}

/// A resolved normalization layer.
#[derive(Debug, Clone)]
pub enum Norm {
    Layer(LayerNorm),
    Rms(RmsNorm),
    Identity,
}

impl Norm {
    /// Build the normalization for feature width `size`.
    pub fn new(
        kind: Normalization,
        size: usize,
        config: &NormConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        if config.epsilon <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "normalization epsilon must be positive, got {}",
                config.epsilon
            )));
        }
        let norm = match kind {
            Normalization::Layer => {
                let cfg = LayerNormConfig {
                    eps: config.epsilon,
                    remove_mean: true,
                    affine: config.center,
                };
                Norm::Layer(layer_norm(size, cfg, vb)?)
            }
            Normalization::Rms => Norm::Rms(rms_norm(size, config.epsilon, vb)?),
            Normalization::Identity => Norm::Identity,
        };
        Ok(norm)
    }
}

impl Module for Norm {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        match self {
            Norm::Layer(ln) => ln.forward(xs),
            Norm::Rms(rms) => rms.forward(xs),
            Norm::Identity => Ok(xs.clone()),
        }
    }
}
