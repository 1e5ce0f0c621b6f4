//! Multi-head self-attention over the node sequence.
//!
//! Used as the node-update transform: every node attends to every other node
//! of the same graph, which makes the update non-local even though messages
//! only travel along edges.
//!
//! # Inputs
//!
//! The layer accepts either one tensor or a pair:
//!
//! | Call | Queries, keys | Values | Gate |
//! |------|---------------|--------|------|
//! | `forward(x, None)` | `x` | `x` | `x` |
//! | `forward(h, Some(m))` | `h` | `m` | `h` |
//!
//! With a pair `(node features, aggregated messages)` the attention pattern is
//! decided by node features while the content mixed across nodes is the
//! aggregated messages.
//!
//! # Gating
//!
//! The gated variant learns `g = sigmoid(W_g x)` and multiplies each head's
//! attention output by it before the heads are merged, so a node can suppress
//! (g -> 0) or pass (g -> 1) the attended signal feature by feature.

use candle_core::{Module, Tensor};
use candle_nn::{linear_b, Linear, VarBuilder};

use crate::config::AttentionConfig;
use crate::error::{Error, Result};

/// Scaled dot-product self-attention with optional per-feature gates.
#[derive(Debug, Clone)]
pub struct MultiHeadSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    combine: Linear,
    gate: Option<Linear>,
    num_heads: usize,
    head_dim: usize,
    query_dim: usize,
    value_dim: usize,
    clip_scores: Option<(f64, f64)>,
}

impl MultiHeadSelfAttention {
    /// Create the attention block.
    ///
    /// # Arguments
    /// - `query_dim`: width of the tensor queries, keys and gates are projected from
    /// - `value_dim`: width of the tensor values are projected from
    /// - `filters`: output width, split evenly across heads
    /// - `gated`: learn a sigmoid gate on the attention output
    pub fn new(
        query_dim: usize,
        value_dim: usize,
        filters: usize,
        config: &AttentionConfig,
        gated: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let num_heads = config.num_heads;
        if num_heads == 0 || filters % num_heads != 0 {
            return Err(Error::InvalidConfig(format!(
                "attention width {filters} is not divisible into {num_heads} heads"
            )));
        }
        let bias = config.use_bias;
        let query = linear_b(query_dim, filters, bias, vb.pp("query"))?;
        let key = linear_b(query_dim, filters, bias, vb.pp("key"))?;
        let value = linear_b(value_dim, filters, bias, vb.pp("value"))?;
        let combine = linear_b(filters, filters, bias, vb.pp("combine"))?;
        let gate = if gated {
            Some(linear_b(query_dim, filters, true, vb.pp("gate"))?)
        } else {
            None
        };

        Ok(Self {
            query,
            key,
            value,
            combine,
            gate,
            num_heads,
            head_dim: filters / num_heads,
            query_dim,
            value_dim,
            clip_scores: config.clip_scores_by_value,
        })
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Attend over the node axis of `x` (B, N, query_dim).
    ///
    /// `context`, if given, must be (B, N, value_dim) and supplies the values.
    pub fn forward(&self, x: &Tensor, context: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.forward_with_weights(x, context)?.0)
    }

    /// Like [`forward`](Self::forward), also returning the softmax attention
    /// map of shape (B, heads, N, N).
    pub fn forward_with_weights(
        &self,
        x: &Tensor,
        context: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let (b, n, width) = x.dims3()?;
        if width != self.query_dim {
            return Err(Error::DimensionMismatch {
                expected: self.query_dim,
                got: width,
            });
        }
        let values_from = context.unwrap_or(x);
        let (v_batch, v_nodes, v_width) = values_from.dims3()?;
        if (v_batch, v_nodes) != (b, n) {
            return Err(Error::DimensionMismatch {
                expected: b * n,
                got: v_batch * v_nodes,
            });
        }
        if v_width != self.value_dim {
            return Err(Error::DimensionMismatch {
                expected: self.value_dim,
                got: v_width,
            });
        }

        // (B, heads, N, head_dim)
        let q = self.split_heads(&self.query.forward(x)?, b, n)?;
        let k = self.split_heads(&self.key.forward(x)?, b, n)?;
        let v = self.split_heads(&self.value.forward(values_from)?, b, n)?;

        // (B, heads, N, N)
        let k_t = k.transpose(2, 3)?.contiguous()?;
        let mut scores = (q.matmul(&k_t)? / (self.head_dim as f64).sqrt())?;
        if let Some((lo, hi)) = self.clip_scores {
            scores = scores.clamp(lo, hi)?;
        }
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;

        let mut attended = weights.matmul(&v)?;
        if let Some(gate) = &self.gate {
            let g = candle_nn::ops::sigmoid(&gate.forward(x)?)?;
            attended = (attended * self.split_heads(&g, b, n)?)?;
        }

        let merged = attended
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, self.num_heads * self.head_dim))?;
        let out = self.combine.forward(&merged)?;
        Ok((out, weights))
    }

    fn split_heads(&self, t: &Tensor, b: usize, n: usize) -> Result<Tensor> {
        Ok(t
            .reshape((b, n, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }
}
