//! Fingerprinting graph neural network layers.
//!
//! `fgnn-nn` provides a distance-aware message-passing layer for graphs
//! embedded in space (particle trajectories, point clouds, molecules): edge
//! messages are attenuated by a learned kernel of the edge length, summed per
//! destination, and the nodes are then updated with (gated) self-attention.
//!
//! # Modules
//!
//! - [`conv`]: The FGNN layer, its edge and node stages, and [`GraphState`]
//! - [`kernel`]: Learned generalized-Gaussian distance kernel
//! - [`attention`]: Multi-head self-attention, plain or gated
//! - [`activation`], [`norm`]: Name-resolved activations and normalizations
//! - [`config`]: Serde-backed layer and stack configuration
//! - [`registry`]: Layer names (`"FGNN"`, `"CTFGNN"`) to constructors
//! - [`stack`]: Sequential layer stacks built from a [`config::StackConfig`]
//! - [`optim`]: Parameter clamping after optimizer steps
//!
//! # Example: Training Step
//!
//! ```rust,ignore
//! use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
//! use fgnn_nn::{optim::step_constrained, Fgnn, FgnnConfig};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let layer = Fgnn::new(node_dim, edge_dim, &FgnnConfig::new(96), vb)?;
//! let mut opt = AdamW::new(varmap.all_vars(), ParamsAdamW::default())?;
//!
//! let out = layer.forward(&graph, true)?;
//! let loss = out.nodes.sqr()?.mean_all()?;
//! step_constrained(&mut opt, &loss, &layer)?;  // keeps sigma, beta in range
//! ```

pub mod activation;
pub mod attention;
pub mod config;
pub mod conv;
pub mod error;
pub mod kernel;
pub mod norm;
pub mod optim;
pub mod registry;
pub mod stack;

pub use config::{AttentionConfig, FgnnConfig, StackConfig};
pub use conv::{Fgnn, GraphState};
pub use error::{Error, Result};
pub use registry::LayerRegistry;
pub use stack::FgnnStack;
