//! Construction-time configuration for FGNN layers.
//!
//! Everything here is fixed for the lifetime of a layer. Defaults: GELU
//! activation, layer normalization, gated attention and no edge dropout.
//!
//! # Example
//!
//! ```rust
//! use fgnn_nn::config::FgnnConfig;
//! use fgnn_nn::activation::Activation;
//!
//! let config = FgnnConfig::new(96)
//!     .with_activation(Activation::Relu)
//!     .with_edge_dropout(0.1)
//!     .with_num_heads(8);
//! assert!(config.validate().is_ok());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;
use crate::error::{Error, Result};
use crate::norm::{NormConfig, Normalization};

/// Keyword arguments of the update-stage self-attention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Number of heads; must divide the layer's `filters`.
    pub num_heads: usize,
    /// Bias terms on the query/key/value/output projections.
    pub use_bias: bool,
    /// Clip scaled attention scores into `[lo, hi]` before the softmax.
    pub clip_scores_by_value: Option<(f64, f64)>,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            num_heads: 4,
            use_bias: true,
            clip_scores_by_value: None,
        }
    }
}

/// Configuration of one FGNN layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FgnnConfig {
    /// Message width and output node width.
    pub filters: usize,
    pub activation: Activation,
    pub normalization: Normalization,
    pub norm_kwargs: NormConfig,
    /// Probability of dropping a whole edge during training (`None` = off).
    pub random_edge_dropout: Option<f64>,
    /// Gated instead of plain self-attention in the update stage.
    pub use_gates: bool,
    pub att_layer_kwargs: AttentionConfig,
    /// Reserve node slot 0 as a class token outside the graph.
    pub class_token: bool,
}

impl Default for FgnnConfig {
    fn default() -> Self {
        Self {
            filters: 96,
            activation: Activation::Gelu,
            normalization: Normalization::Layer,
            norm_kwargs: NormConfig::default(),
            random_edge_dropout: None,
            use_gates: true,
            att_layer_kwargs: AttentionConfig::default(),
            class_token: false,
        }
    }
}

impl FgnnConfig {
    pub fn new(filters: usize) -> Self {
        Self {
            filters,
            ..Default::default()
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn with_norm_kwargs(mut self, norm_kwargs: NormConfig) -> Self {
        self.norm_kwargs = norm_kwargs;
        self
    }

    pub fn with_edge_dropout(mut self, rate: f64) -> Self {
        self.random_edge_dropout = Some(rate);
        self
    }

    pub fn with_gates(mut self, use_gates: bool) -> Self {
        self.use_gates = use_gates;
        self
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.att_layer_kwargs.num_heads = num_heads;
        self
    }

    pub fn with_attention(mut self, att_layer_kwargs: AttentionConfig) -> Self {
        self.att_layer_kwargs = att_layer_kwargs;
        self
    }

    pub fn with_class_token(mut self, class_token: bool) -> Self {
        self.class_token = class_token;
        self
    }

    /// Check the invariants that do not depend on input widths.
    pub fn validate(&self) -> Result<()> {
        if self.filters == 0 {
            return Err(Error::InvalidConfig("filters must be positive".into()));
        }
        let heads = self.att_layer_kwargs.num_heads;
        if heads == 0 || self.filters % heads != 0 {
            return Err(Error::InvalidConfig(format!(
                "filters ({}) must be a positive multiple of num_heads ({heads})",
                self.filters
            )));
        }
        if let Some(rate) = self.random_edge_dropout {
            if !(0.0..=1.0).contains(&rate) {
                return Err(Error::InvalidConfig(format!(
                    "random_edge_dropout must lie in [0, 1], got {rate}"
                )));
            }
        }
        if let Some((lo, hi)) = self.att_layer_kwargs.clip_scores_by_value {
            if lo > hi {
                return Err(Error::InvalidConfig(format!(
                    "clip_scores_by_value bounds are inverted: ({lo}, {hi})"
                )));
            }
        }
        Ok(())
    }
}

/// One entry of a [`StackConfig`]: a registered layer name plus its config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Registry key, e.g. `"FGNN"` or `"CTFGNN"`.
    pub layer: String,
    #[serde(flatten)]
    pub config: FgnnConfig,
}

/// A stack of FGNN layers sharing one graph structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    /// Node feature width fed to the first layer.
    pub node_dim: usize,
    /// Edge feature width fed to the first layer.
    pub edge_dim: usize,
    pub layers: Vec<LayerSpec>,
}

impl StackConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
