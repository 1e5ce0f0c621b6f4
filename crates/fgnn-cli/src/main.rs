//! FGNN CLI - build and smoke-run fingerprinting GNN layers.
//!
//! # Usage
//!
//! ```bash
//! # Run a two-layer stack from a JSON config on a random graph
//! fgnn forward --config stack.json --batch 4 --nodes 32 --edges 96
//!
//! # Single layer from flags, with edge dropout in training mode
//! fgnn forward --node-dim 8 --edge-dim 2 --filters 32 --edge-dropout 0.1 --train
//!
//! # Inspect kernel weights
//! fgnn kernel --sigma 0.005 --beta 4 0 0.002 0.005 0.01
//!
//! # List registered layers
//! fgnn layers
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{ensure, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::{Parser, Subcommand};
use fgnn_nn::activation::Activation;
use fgnn_nn::config::LayerSpec;
use fgnn_nn::kernel::{DistanceKernel, BETA_INIT, SIGMA_INIT};
use fgnn_nn::{FgnnConfig, FgnnStack, GraphState, LayerRegistry, StackConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fgnn")]
#[command(about = "Fingerprinting GNN layer toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a layer stack and run it on a random graph
    Forward {
        /// Stack configuration (JSON); overrides the layer flags below
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Input node feature width
        #[arg(long, default_value = "8")]
        node_dim: usize,

        /// Input edge feature width
        #[arg(long, default_value = "4")]
        edge_dim: usize,

        /// Registered layer name
        #[arg(long, default_value = "FGNN")]
        layer: String,

        /// Layer width
        #[arg(long, default_value = "32")]
        filters: usize,

        /// Number of stacked layers
        #[arg(long, default_value = "1")]
        depth: usize,

        /// Attention heads
        #[arg(long, default_value = "4")]
        heads: usize,

        /// Activation name (gelu, relu, swish, ...)
        #[arg(long, default_value = "gelu")]
        activation: String,

        /// Edge dropout rate
        #[arg(long)]
        edge_dropout: Option<f64>,

        /// Plain instead of gated attention
        #[arg(long)]
        no_gates: bool,

        /// Graphs per batch
        #[arg(long, default_value = "2")]
        batch: usize,

        /// Nodes per graph (including the class token, if any)
        #[arg(long, default_value = "16")]
        nodes: usize,

        /// Edges per graph
        #[arg(long, default_value = "48")]
        edges: usize,

        /// Largest sampled edge distance
        #[arg(long, default_value = "0.02")]
        max_distance: f32,

        /// Training mode (enables edge dropout)
        #[arg(long)]
        train: bool,
    },

    /// Print kernel weights for the given distances
    Kernel {
        /// Kernel bandwidth
        #[arg(long, default_value_t = SIGMA_INIT)]
        sigma: f64,

        /// Kernel sharpness
        #[arg(long, default_value_t = BETA_INIT)]
        beta: f64,

        /// Distances to evaluate
        #[arg(required = true)]
        distances: Vec<f32>,
    },

    /// List registered layer names
    Layers,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let registry = LayerRegistry::with_defaults();

    match cli.command {
        Commands::Forward {
            config,
            node_dim,
            edge_dim,
            layer,
            filters,
            depth,
            heads,
            activation,
            edge_dropout,
            no_gates,
            batch,
            nodes,
            edges,
            max_distance,
            train,
        } => {
            let stack_config = match config {
                Some(path) => StackConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load stack config {}", path.display()))?,
                None => {
                    let activation = Activation::from_str(&activation)?;
                    let mut layer_config = FgnnConfig::new(filters)
                        .with_activation(activation)
                        .with_num_heads(heads)
                        .with_gates(!no_gates);
                    if let Some(rate) = edge_dropout {
                        layer_config = layer_config.with_edge_dropout(rate);
                    }
                    StackConfig {
                        node_dim,
                        edge_dim,
                        layers: vec![
                            LayerSpec {
                                layer,
                                config: layer_config,
                            };
                            depth
                        ],
                    }
                }
            };
            cmd_forward(&registry, &stack_config, batch, nodes, edges, max_distance, train)
        }
        Commands::Kernel {
            sigma,
            beta,
            distances,
        } => cmd_kernel(sigma, beta, distances),
        Commands::Layers => {
            for name in registry.names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}

fn cmd_forward(
    registry: &LayerRegistry,
    config: &StackConfig,
    batch: usize,
    nodes: usize,
    edges: usize,
    max_distance: f32,
    train: bool,
) -> Result<()> {
    ensure!(batch > 0 && nodes > 0, "batch and nodes must be positive");
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    let stack = FgnnStack::from_config(config, registry, vb).context("Failed to build layer stack")?;

    // With a class token in slot 0, edges address slots 1..N.
    let token_slots = usize::from(stack.layers().iter().any(|l| l.has_class_token()));
    ensure!(
        nodes > token_slots,
        "a class-token stack needs at least one graph node besides the token"
    );
    let graph_nodes = nodes - token_slots;

    let state = random_graph(config, batch, nodes, graph_nodes, edges, max_distance, &device)?;
    info!(batch, nodes, edges, train, "running forward pass");
    let out = stack.forward(&state, train).context("Forward pass failed")?;

    println!("FGNN Stack");
    println!("==========");
    for (i, (layer, spec)) in stack.layers().iter().zip(&config.layers).enumerate() {
        println!(
            "Layer {i}: {:<7} filters={:<4} sigma={:.6} beta={:.4}",
            spec.layer,
            layer.filters(),
            layer.kernel().sigma()?,
            layer.kernel().beta()?,
        );
    }
    println!("Parameters:     {}", count_parameters(&varmap));
    println!("Nodes in:       {:?}", state.nodes.dims());
    println!("Nodes out:      {:?}", out.nodes.dims());
    println!("Edges out:      {:?}", out.edge_features.dims());
    Ok(())
}

fn random_graph(
    config: &StackConfig,
    batch: usize,
    nodes: usize,
    graph_nodes: usize,
    edges: usize,
    max_distance: f32,
    device: &Device,
) -> Result<GraphState> {
    let edge_index = Tensor::rand(0f32, graph_nodes as f32, (batch, edges, 2), device)?
        .floor()?
        .clamp(0f32, (graph_nodes - 1) as f32)?
        .to_dtype(DType::I64)?;
    Ok(GraphState::new(
        Tensor::randn(0f32, 1f32, (batch, nodes, config.node_dim), device)?,
        Tensor::randn(0f32, 1f32, (batch, edges, config.edge_dim), device)?,
        Tensor::rand(0f32, max_distance, (batch, edges, 1), device)?,
        edge_index,
    ))
}

fn count_parameters(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

fn cmd_kernel(sigma: f64, beta: f64, distances: Vec<f32>) -> Result<()> {
    let device = Device::Cpu;
    let kernel = DistanceKernel::from_values(sigma, beta, &device)?;
    let n = distances.len();
    let weights = kernel
        .weights(&Tensor::from_vec(distances.clone(), n, &device)?)?
        .to_vec1::<f32>()?;

    println!("distance\tweight");
    for (d, w) in distances.iter().zip(weights) {
        println!("{d:.6}\t{w:.6}");
    }
    Ok(())
}
