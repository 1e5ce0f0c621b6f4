//! Activation functions, resolvable by name.
//!
//! Names follow the Keras spelling (`"gelu"`, `"relu"`, `"swish"`, ...) so
//! layer configs written for other frameworks carry over unchanged. Matching
//! is case-insensitive.

use std::fmt;
use std::str::FromStr;

use candle_core::{Module, Result as CandleResult, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Pointwise nonlinearity applied after the message and update transforms.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Activation {
    /// Exact GELU: `0.5 x (1 + erf(x / sqrt(2)))`.
    #[default]
    Gelu,
    /// Tanh approximation of GELU.
    GeluTanh,
    Relu,
    /// SiLU, a.k.a. swish.
    Silu,
    Sigmoid,
    Tanh,
    /// ELU with alpha = 1.
    Elu,
    /// Identity.
    Linear,
}

impl Activation {
    /// Canonical name, accepted back by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Gelu => "gelu",
            Activation::GeluTanh => "gelu_tanh",
            Activation::Relu => "relu",
            Activation::Silu => "silu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Elu => "elu",
            Activation::Linear => "linear",
        }
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gelu" => Ok(Activation::Gelu),
            "gelu_tanh" | "gelu_new" | "approximate_gelu" => Ok(Activation::GeluTanh),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "elu" => Ok(Activation::Elu),
            "linear" | "identity" | "none" => Ok(Activation::Linear),
            other => Err(Error::UnknownActivation(other.to_string())),
        }
    }
}

impl TryFrom<String> for Activation {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Activation> for String {
    fn from(value: Activation) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> CandleResult<Tensor> {
        match self {
            Activation::Gelu => xs.gelu_erf(),
            Activation::GeluTanh => xs.gelu(),
            Activation::Relu => xs.relu(),
            Activation::Silu => xs.silu(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs),
            Activation::Tanh => xs.tanh(),
            Activation::Elu => xs.elu(1.0),
            Activation::Linear => Ok(xs.clone()),
        }
    }
}
