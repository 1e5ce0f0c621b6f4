//! Name-keyed layer constructors.
//!
//! Lets a configuration file refer to layers by name (`"FGNN"`, `"CTFGNN"`)
//! and lets downstream crates add their own variants without touching
//! [`crate::stack`].

use std::collections::HashMap;

use candle_nn::VarBuilder;

use crate::config::FgnnConfig;
use crate::conv::Fgnn;
use crate::error::{Error, Result};

/// Plain FGNN layer.
pub const FGNN: &str = "FGNN";
/// FGNN layer with a class token in node slot 0.
pub const CTFGNN: &str = "CTFGNN";

/// Builds a layer from its config and input widths `(node_dim, edge_dim)`.
pub type LayerBuilder =
    Box<dyn Fn(&FgnnConfig, usize, usize, VarBuilder) -> Result<Fgnn> + Send + Sync>;

#[derive(Default)]
pub struct LayerRegistry {
    builders: HashMap<String, LayerBuilder>,
}

impl LayerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `FGNN` and `CTFGNN`.
    ///
    /// Each name pins the `class_token` flag, whatever the config says.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(FGNN, |config, node_dim, edge_dim, vb| {
            let config = config.clone().with_class_token(false);
            Fgnn::new(node_dim, edge_dim, &config, vb)
        });
        registry.register(CTFGNN, |config, node_dim, edge_dim, vb| {
            let config = config.clone().with_class_token(true);
            Fgnn::new(node_dim, edge_dim, &config, vb)
        });
        registry
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, builder: F)
    where
        F: Fn(&FgnnConfig, usize, usize, VarBuilder) -> Result<Fgnn> + Send + Sync + 'static,
    {
        self.builders.insert(name.into(), Box::new(builder));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn build(
        &self,
        name: &str,
        config: &FgnnConfig,
        node_dim: usize,
        edge_dim: usize,
        vb: VarBuilder,
    ) -> Result<Fgnn> {
        let builder = self
            .builders
            .get(name)
            .ok_or_else(|| Error::UnknownLayer(name.to_string()))?;
        builder(config, node_dim, edge_dim, vb)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for LayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerRegistry")
            .field("names", &self.names())
            .finish()
    }
}
