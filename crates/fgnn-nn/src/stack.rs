//! Sequential stacks of FGNN layers.
//!
//! Layers share the graph structure: each layer's output [`GraphState`] is the
//! next layer's input, so layer `k + 1` sees `filters_k` wide nodes and the
//! gated messages of layer `k` as its edge features.

use candle_nn::VarBuilder;
use tracing::info;

use crate::config::StackConfig;
use crate::conv::{Fgnn, GraphState};
use crate::error::{Error, Result};
use crate::optim::Constrain;
use crate::registry::LayerRegistry;

#[derive(Debug, Clone)]
pub struct FgnnStack {
    layers: Vec<Fgnn>,
}

impl FgnnStack {
    /// Build every layer of `config` through `registry`.
    ///
    /// Layer `i` stores its weights under `layer_{i}`.
    pub fn from_config(config: &StackConfig, registry: &LayerRegistry, vb: VarBuilder) -> Result<Self> {
        if config.layers.is_empty() {
            return Err(Error::InvalidConfig("stack needs at least one layer".into()));
        }
        let mut node_dim = config.node_dim;
        let mut edge_dim = config.edge_dim;
        let mut layers = Vec::with_capacity(config.layers.len());

        for (i, spec) in config.layers.iter().enumerate() {
            let layer = registry.build(
                &spec.layer,
                &spec.config,
                node_dim,
                edge_dim,
                vb.pp(format!("layer_{i}")),
            )?;
            node_dim = layer.filters();
            edge_dim = layer.filters();
            layers.push(layer);
        }

        info!(
            layers = layers.len(),
            output_dim = node_dim,
            "built fgnn stack"
        );
        Ok(Self { layers })
    }

    pub fn layers(&self) -> &[Fgnn] {
        &self.layers
    }

    /// Node width produced by the last layer.
    pub fn output_dim(&self) -> usize {
        self.layers.last().map(Fgnn::filters).unwrap_or(0)
    }

    pub fn forward(&self, state: &GraphState, train: bool) -> Result<GraphState> {
        let mut state = state.clone();
        for layer in &self.layers {
            state = layer.forward(&state, train)?;
        }
        Ok(state)
    }
}

impl Constrain for FgnnStack {
    fn constrain(&self) -> Result<()> {
        self.layers.constrain()
    }
}
