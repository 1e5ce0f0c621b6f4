//! Fingerprinting graph convolution (FGNN).
//!
//! A message-passing layer for graphs embedded in physical space, where every
//! edge carries a distance and nearby neighbours should dominate.
//!
//! # Message Passing Framework
//!
//! The layer follows the usual three phases, with a distance gate between
//! message and aggregation:
//!
//! ```text
//! m_ij  = NORM(ACT(W [h_i || h_j || e_ij]))          message, per edge (i -> j)
//! m_ij' = m_ij * exp(-(d_ij^2 / 2 sigma^2)^beta)       distance gate
//! a_j   = sum_{i : (i -> j)} m_ij'                     aggregate at destination
//! h_j'  = NORM(ACT(ATTN(h, a)_j))                      update over all nodes
//! ```
//!
//! 1. **Message** ([`EdgeUpdate`]): gather both endpoints of every edge
//!    (source first, then destination, exactly as listed in the edge index),
//!    append the edge's own features and project to `filters`.
//! 2. **Gate**: scale each message by the learned [`DistanceKernel`].
//! 3. **Aggregate**: sum gated messages by destination node. Duplicated edges
//!    (e.g. from augmentation) simply contribute twice.
//! 4. **Update** ([`NodeUpdate`]): multi-head self-attention over the node
//!    sequence, so the update is non-local even though messages are not.
//!
//! # Class Token
//!
//! With `class_token` set, node slot 0 is a global summary that takes no part
//! in the graph: edge indices address slots `1..N`, and the token re-joins the
//! sequence only for the update, where it attends to (and is attended by) all
//! graph nodes. Because the token has no aggregated message of its own, the
//! class-token layer fuses `[h || a]` through a dense projection first and
//! feeds the update a single sequence; the plain layer hands the update the
//! `(h, a)` pair directly. See [`NodeFusion`].
//!
//! # Batching
//!
//! All tensors carry a leading batch axis. Node indices are shifted by
//! `b * N` before gathering and aggregating, so index spaces of different
//! batch rows never overlap. N, E and B are read from the inputs on every
//! call; only feature widths are fixed at construction.

use candle_core::{DType, Module, Tensor, D};
use candle_nn::{linear, Linear, VarBuilder};
use tracing::{debug, trace};

use crate::activation::Activation;
use crate::attention::MultiHeadSelfAttention;
use crate::config::FgnnConfig;
use crate::error::{Error, Result};
use crate::kernel::DistanceKernel;
use crate::norm::Norm;
use crate::optim::Constrain;

/// Graph tensors passed between stacked layers.
///
/// | Field | Shape |
/// |-------|-------|
/// | `nodes` | (B, N, F) |
/// | `edge_features` | (B, E, Fe) |
/// | `distance` | (B, E, 1) or (B, E) |
/// | `edge_index` | (B, E, 2), integer, `[source, destination]` |
///
/// An FGNN layer returns the same structure with updated `nodes`, the gated
/// messages as `edge_features`, and `distance` / `edge_index` untouched.
#[derive(Debug, Clone)]
pub struct GraphState {
    pub nodes: Tensor,
    pub edge_features: Tensor,
    pub distance: Tensor,
    pub edge_index: Tensor,
}

impl GraphState {
    pub fn new(nodes: Tensor, edge_features: Tensor, distance: Tensor, edge_index: Tensor) -> Self {
        Self {
            nodes,
            edge_features,
            distance,
            edge_index,
        }
    }
}

/// Dense projection -> activation -> normalization.
#[derive(Debug, Clone)]
struct Transform {
    dense: Linear,
    activation: Activation,
    norm: Norm,
}

impl Module for Transform {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.dense.forward(xs)?;
        let h = self.activation.forward(&h)?;
        self.norm.forward(&h)
    }
}

/// Result of the edge stage.
#[derive(Debug, Clone)]
pub struct EdgeUpdateOutput {
    /// Distance-gated messages, (B, E, filters).
    pub messages: Tensor,
    /// Gated messages summed per destination node, (B, N, filters).
    pub aggregated: Tensor,
}

/// Edge stage: compute, gate and aggregate per-edge messages.
#[derive(Debug, Clone)]
pub struct EdgeUpdate {
    message: Transform,
    kernel: DistanceKernel,
    edge_dropout: Option<f64>,
    node_dim: usize,
    edge_dim: usize,
}

impl EdgeUpdate {
    /// Create the edge stage.
    ///
    /// # Arguments
    /// - `node_dim`: node feature width F
    /// - `edge_dim`: edge feature width Fe
    /// - `config`: filters, activation, normalization and edge dropout
    /// - `vb`: variable builder; `sigma` and `beta` are registered at its root
    pub fn new(
        node_dim: usize,
        edge_dim: usize,
        config: &FgnnConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let filters = config.filters;
        let message = Transform {
            dense: linear(2 * node_dim + edge_dim, filters, vb.pp("message"))?,
            activation: config.activation,
            norm: Norm::new(
                config.normalization,
                filters,
                &config.norm_kwargs,
                vb.pp("message_norm"),
            )?,
        };
        let kernel = DistanceKernel::new(vb)?;

        Ok(Self {
            message,
            kernel,
            edge_dropout: config.random_edge_dropout,
            node_dim,
            edge_dim,
        })
    }

    pub fn kernel(&self) -> &DistanceKernel {
        &self.kernel
    }

    /// Run the edge stage.
    ///
    /// `train` enables edge dropout; in evaluation mode every edge is kept.
    pub fn forward(
        &self,
        nodes: &Tensor,
        edge_features: &Tensor,
        distance: &Tensor,
        edge_index: &Tensor,
        train: bool,
    ) -> Result<EdgeUpdateOutput> {
        let (b, n, f) = nodes.dims3()?;
        check_dim(self.node_dim, f)?;
        let global = global_edge_index(edge_index, b, n)?;
        let e = global.dim(1)?;

        let (fb, fe_count, fe) = edge_features.dims3()?;
        check_dim(b, fb)?;
        check_dim(e, fe_count)?;
        check_dim(self.edge_dim, fe)?;
        let distance = per_edge_column(distance, b, e)?;
        trace!(batch = b, nodes = n, edges = e, "fgnn edge update");

        // (B, E, 2F): source features, then destination features.
        let endpoints = nodes
            .reshape((b * n, f))?
            .index_select(&global.flatten_all()?, 0)?
            .reshape((b, e, 2 * f))?;
        let inputs = Tensor::cat(&[&endpoints, &edge_features.to_dtype(nodes.dtype())?], D::Minus1)?;

        let messages = self.message.forward(&inputs)?;
        let messages = self.drop_edges(&messages, train)?;

        let weights = self.kernel.weights(&distance)?.to_dtype(messages.dtype())?;
        let messages = messages.broadcast_mul(&weights)?;

        let aggregated = segment_sum(&messages, &global, n)?;
        Ok(EdgeUpdateOutput {
            messages,
            aggregated,
        })
    }

    /// Drop whole edges: one keep/drop draw per edge, shared by its features
    /// and by every batch row.
    fn drop_edges(&self, messages: &Tensor, train: bool) -> Result<Tensor> {
        let rate = match self.edge_dropout {
            Some(rate) if train && rate > 0.0 => rate,
            _ => return Ok(messages.clone()),
        };
        if rate >= 1.0 {
            return Ok(messages.zeros_like()?);
        }
        let e = messages.dim(1)?;
        let keep = Tensor::rand(0f32, 1f32, (1, e, 1), messages.device())?
            .ge(rate)?
            .to_dtype(messages.dtype())?;
        let mask = (keep / (1.0 - rate))?;
        Ok(messages.broadcast_mul(&mask)?)
    }
}

/// Node stage: self-attention -> activation -> normalization.
#[derive(Debug, Clone)]
pub struct NodeUpdate {
    attention: MultiHeadSelfAttention,
    activation: Activation,
    norm: Norm,
}

impl NodeUpdate {
    /// Create the node stage.
    ///
    /// `query_dim` is the width of the node sequence fed to the attention;
    /// `value_dim` the width of the paired aggregated messages (equal to
    /// `query_dim` when the update receives a single fused sequence).
    pub fn new(
        query_dim: usize,
        value_dim: usize,
        config: &FgnnConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention = MultiHeadSelfAttention::new(
            query_dim,
            value_dim,
            config.filters,
            &config.att_layer_kwargs,
            config.use_gates,
            vb.pp("attention"),
        )?;
        let norm = Norm::new(
            config.normalization,
            config.filters,
            &config.norm_kwargs,
            vb.pp("update_norm"),
        )?;
        Ok(Self {
            attention,
            activation: config.activation,
            norm,
        })
    }

    /// Update `nodes`, optionally paired with their aggregated messages.
    pub fn forward(&self, nodes: &Tensor, aggregated: Option<&Tensor>) -> Result<Tensor> {
        let h = self.attention.forward(nodes, aggregated)?;
        let h = self.activation.forward(&h)?;
        Ok(self.norm.forward(&h)?)
    }

    pub fn attention(&self) -> &MultiHeadSelfAttention {
        &self.attention
    }
}

/// How node features and aggregated messages reach the update stage.
#[derive(Debug, Clone)]
pub enum NodeFusion {
    /// Pass `(nodes, aggregated)` to the attention as a pair.
    Paired,
    /// Slot 0 is a class token: fuse `[graph_nodes || aggregated]` with a
    /// dense projection, prepend the token, update the whole sequence.
    ClassToken { combine: Linear },
}

/// Fingerprinting graph layer.
///
/// Maps a [`GraphState`] to a new one: nodes (B, N, F) become (B, N, filters)
/// and edge features become the (B, E, filters) gated messages.
///
/// # Example
///
/// ```rust
/// use candle_core::{DType, Device, Tensor};
/// use candle_nn::{VarBuilder, VarMap};
/// use fgnn_nn::{Fgnn, FgnnConfig, GraphState};
///
/// let device = Device::Cpu;
/// let varmap = VarMap::new();
/// let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
/// let layer = Fgnn::new(8, 2, &FgnnConfig::new(16), vb)?;
///
/// let state = GraphState::new(
///     Tensor::randn(0f32, 1f32, (1, 4, 8), &device)?,
///     Tensor::randn(0f32, 1f32, (1, 3, 2), &device)?,
///     Tensor::new(&[[0.001f32, 0.004, 0.02]], &device)?,
///     Tensor::new(&[[[0i64, 1], [1, 2], [3, 2]]], &device)?,
/// );
/// let out = layer.forward(&state, false)?;
/// assert_eq!(out.nodes.dims(), &[1, 4, 16]);
/// # Ok::<(), fgnn_nn::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Fgnn {
    edge_update: EdgeUpdate,
    node_update: NodeUpdate,
    fusion: NodeFusion,
    config: FgnnConfig,
}

impl Fgnn {
    /// Create a layer for inputs with node width `node_dim` and edge width
    /// `edge_dim`.
    ///
    /// The class-token variant requires `node_dim == filters`, since the token
    /// is re-joined unprojected with the fused graph nodes.
    pub fn new(
        node_dim: usize,
        edge_dim: usize,
        config: &FgnnConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let filters = config.filters;

        let edge_update = EdgeUpdate::new(node_dim, edge_dim, config, vb.clone())?;
        let (fusion, node_update) = if config.class_token {
            if node_dim != filters {
                return Err(Error::DimensionMismatch {
                    expected: filters,
                    got: node_dim,
                });
            }
            let combine = linear(node_dim + filters, filters, vb.pp("combine"))?;
            let update = NodeUpdate::new(filters, filters, config, vb.clone())?;
            (NodeFusion::ClassToken { combine }, update)
        } else {
            let update = NodeUpdate::new(node_dim, filters, config, vb.clone())?;
            (NodeFusion::Paired, update)
        };

        debug!(
            node_dim,
            edge_dim,
            filters,
            class_token = config.class_token,
            gated = config.use_gates,
            edge_dropout = ?config.random_edge_dropout,
            "built fgnn layer"
        );

        Ok(Self {
            edge_update,
            node_update,
            fusion,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &FgnnConfig {
        &self.config
    }

    pub fn filters(&self) -> usize {
        self.config.filters
    }

    pub fn kernel(&self) -> &DistanceKernel {
        self.edge_update.kernel()
    }

    pub fn edge_update(&self) -> &EdgeUpdate {
        &self.edge_update
    }

    pub fn node_update(&self) -> &NodeUpdate {
        &self.node_update
    }

    pub fn has_class_token(&self) -> bool {
        matches!(self.fusion, NodeFusion::ClassToken { .. })
    }

    /// Forward pass. `train` enables edge dropout.
    pub fn forward(&self, state: &GraphState, train: bool) -> Result<GraphState> {
        let (class_token, graph_nodes) = match self.fusion {
            NodeFusion::Paired => (None, state.nodes.clone()),
            NodeFusion::ClassToken { .. } => {
                let n = state.nodes.dim(1)?;
                if n == 0 {
                    return Err(Error::DimensionMismatch { expected: 1, got: 0 });
                }
                (
                    Some(state.nodes.narrow(1, 0, 1)?),
                    state.nodes.narrow(1, 1, n - 1)?,
                )
            }
        };

        let EdgeUpdateOutput {
            messages,
            aggregated,
        } = self.edge_update.forward(
            &graph_nodes,
            &state.edge_features,
            &state.distance,
            &state.edge_index,
            train,
        )?;

        let nodes = match (&self.fusion, class_token) {
            (NodeFusion::ClassToken { combine }, Some(token)) => {
                let fused = combine.forward(&Tensor::cat(&[&graph_nodes, &aggregated], D::Minus1)?)?;
                let sequence = Tensor::cat(&[&token, &fused], 1)?;
                self.node_update.forward(&sequence, None)?
            }
            _ => self.node_update.forward(&graph_nodes, Some(&aggregated))?,
        };

        Ok(GraphState {
            nodes,
            edge_features: messages,
            distance: state.distance.clone(),
            edge_index: state.edge_index.clone(),
        })
    }
}

impl Constrain for Fgnn {
    fn constrain(&self) -> Result<()> {
        self.kernel().constrain()
    }
}

/// Validate `edge_index` (B, E, 2) against B and N and shift every index by
/// `b * N`, returning an i64 tensor of the same shape.
fn global_edge_index(edge_index: &Tensor, batch: usize, num_nodes: usize) -> Result<Tensor> {
    if !matches!(edge_index.dtype(), DType::U8 | DType::U32 | DType::I64) {
        return Err(Error::InvalidEdgeIndex(format!(
            "expected an integer dtype, got {:?}",
            edge_index.dtype()
        )));
    }
    let (b, e, pair) = edge_index.dims3()?;
    if pair != 2 {
        return Err(Error::InvalidEdgeIndex(format!(
            "last axis must hold (source, destination), got width {pair}"
        )));
    }
    check_dim(batch, b)?;
    let index = edge_index.to_dtype(DType::I64)?;
    if e > 0 {
        let flat = index.flatten_all()?;
        let lo = flat.min(0)?.to_scalar::<i64>()?;
        let hi = flat.max(0)?.to_scalar::<i64>()?;
        if lo < 0 || hi >= num_nodes as i64 {
            return Err(Error::InvalidEdgeIndex(format!(
                "indices must lie in [0, {num_nodes}), found range [{lo}, {hi}]"
            )));
        }
    }

    let offsets: Vec<i64> = (0..batch).map(|i| (i * num_nodes) as i64).collect();
    let offsets = Tensor::from_vec(offsets, (batch, 1, 1), edge_index.device())?;
    Ok(index.broadcast_add(&offsets)?)
}

/// Bring `distance` to (B, E, 1).
fn per_edge_column(distance: &Tensor, batch: usize, edges: usize) -> Result<Tensor> {
    let column = match distance.rank() {
        2 => distance.unsqueeze(2)?,
        3 if distance.dim(2)? == 1 => distance.clone(),
        _ => {
            return Err(Error::DimensionMismatch {
                expected: 1,
                got: distance.dims().last().copied().unwrap_or(0),
            })
        }
    };
    let (b, e, _) = column.dims3()?;
    check_dim(batch, b)?;
    check_dim(edges, e)?;
    Ok(column)
}

fn check_dim(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::DimensionMismatch { expected, got });
    }
    Ok(())
}

/// Sum (B, E, C) messages into (B, N, C) by destination, using the
/// batch-shifted index from [`global_edge_index`].
fn segment_sum(messages: &Tensor, global_index: &Tensor, num_nodes: usize) -> Result<Tensor> {
    let (b, e, c) = messages.dims3()?;
    let destination = global_index.narrow(2, 1, 1)?.flatten_all()?;
    let source = messages.reshape((b * e, c))?;
    let summed = Tensor::zeros((b * num_nodes, c), messages.dtype(), messages.device())?
        .index_add(&destination, &source, 0)?;
    Ok(summed.reshape((b, num_nodes, c))?)
}
