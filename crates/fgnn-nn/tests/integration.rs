//! Integration tests for the FGNN layer.
//!
//! Covers the behaviour a model built on the layer relies on: output shapes,
//! message aggregation, batch isolation, edge dropout, the class-token
//! variant, and training with constrained kernel parameters.

use candle_core::{DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use fgnn_nn::optim::{step_constrained, Constrain};
use fgnn_nn::{Fgnn, FgnnConfig, GraphState};

fn random_graph(batch: usize, nodes: usize, device: &Device) -> GraphState {
    let edge_index = Tensor::new(
        &[[0i64, 1], [1, 2], [2, 0], [3, 2], [2, 3], [4, 1]],
        device,
    )
    .unwrap()
    .unsqueeze(0)
    .unwrap()
    .repeat((batch, 1, 1))
    .unwrap();
    GraphState::new(
        Tensor::randn(0f32, 1f32, (batch, nodes, 8), device).unwrap(),
        Tensor::randn(0f32, 1f32, (batch, 6, 3), device).unwrap(),
        Tensor::rand(0f32, 0.01f32, (batch, 6, 1), device).unwrap(),
        edge_index,
    )
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
    (a - b)
        .unwrap()
        .abs()
        .unwrap()
        .flatten_all()
        .unwrap()
        .max(0)
        .unwrap()
        .to_scalar::<f32>()
        .unwrap()
}

#[test]
fn test_forward_preserves_structure() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(12).with_num_heads(3), vb).unwrap();

    let state = random_graph(3, 5, &device);
    let out = layer.forward(&state, true).unwrap();

    assert_eq!(out.nodes.dims(), &[3, 5, 12]);
    assert_eq!(out.edge_features.dims(), &[3, 6, 12]);
    assert_eq!(
        out.distance.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
        state.distance.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    );
    assert_eq!(
        out.edge_index.to_vec3::<i64>().unwrap(),
        state.edge_index.to_vec3::<i64>().unwrap()
    );
}

#[test]
fn test_two_edges_sum_at_destination() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8), vb).unwrap();

    // 0 -> 2 and 1 -> 2; nodes 0, 1 and 3 receive nothing.
    let nodes = Tensor::randn(0f32, 1f32, (1, 4, 8), &device).unwrap();
    let edges = Tensor::randn(0f32, 1f32, (1, 2, 3), &device).unwrap();
    let distance = Tensor::new(&[[[0.001f32], [0.003]]], &device).unwrap();
    let edge_index = Tensor::new(&[[[0i64, 2], [1, 2]]], &device).unwrap();

    let out = layer
        .edge_update()
        .forward(&nodes, &edges, &distance, &edge_index, false)
        .unwrap();
    let messages = out.messages.squeeze(0).unwrap().to_vec2::<f32>().unwrap();
    let aggregated = out.aggregated.squeeze(0).unwrap().to_vec2::<f32>().unwrap();

    for c in 0..8 {
        let expected = messages[0][c] + messages[1][c];
        assert!((aggregated[2][c] - expected).abs() < 1e-5);
        for node in [0, 1, 3] {
            assert_eq!(aggregated[node][c], 0.0);
        }
    }
}

#[test]
fn test_duplicated_edge_counts_twice() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8), vb).unwrap();

    let nodes = Tensor::randn(0f32, 1f32, (1, 3, 8), &device).unwrap();
    let edge = Tensor::randn(0f32, 1f32, (1, 1, 3), &device).unwrap();
    let edges = Tensor::cat(&[&edge, &edge], 1).unwrap();
    let distance = Tensor::new(&[[0.002f32, 0.002]], &device).unwrap();
    let edge_index = Tensor::new(&[[[0i64, 1], [0, 1]]], &device).unwrap();

    let out = layer
        .edge_update()
        .forward(&nodes, &edges, &distance, &edge_index, false)
        .unwrap();
    let single = out.messages.narrow(1, 0, 1).unwrap().squeeze(1).unwrap();
    let received = out.aggregated.narrow(1, 1, 1).unwrap().squeeze(1).unwrap();
    assert!(max_abs_diff(&received, &(single * 2.0).unwrap()) < 1e-5);
}

#[test]
fn test_batch_elements_are_isolated() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8), vb).unwrap();

    let state = random_graph(2, 5, &device);
    let before = layer.forward(&state, false).unwrap();

    // Replace everything in batch element 1.
    let mut changed = state.clone();
    let fresh = random_graph(1, 5, &device);
    changed.nodes = Tensor::cat(&[&state.nodes.narrow(0, 0, 1).unwrap(), &fresh.nodes], 0).unwrap();
    changed.edge_features = Tensor::cat(
        &[&state.edge_features.narrow(0, 0, 1).unwrap(), &fresh.edge_features],
        0,
    )
    .unwrap();
    let after = layer.forward(&changed, false).unwrap();

    let row0 = |t: &Tensor| t.narrow(0, 0, 1).unwrap();
    assert!(max_abs_diff(&row0(&before.nodes), &row0(&after.nodes)) < 1e-6);
    assert!(max_abs_diff(&row0(&before.edge_features), &row0(&after.edge_features)) < 1e-6);
    assert!(max_abs_diff(&before.nodes.narrow(0, 1, 1).unwrap(), &after.nodes.narrow(0, 1, 1).unwrap()) > 1e-4);
}

#[test]
fn test_edge_dropout_modes() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

    // Same prefix, same varmap: all four layers share their weights.
    let plain = Fgnn::new(8, 3, &FgnnConfig::new(8), vb.clone()).unwrap();
    let zero = Fgnn::new(8, 3, &FgnnConfig::new(8).with_edge_dropout(0.0), vb.clone()).unwrap();
    let half = Fgnn::new(8, 3, &FgnnConfig::new(8).with_edge_dropout(0.5), vb.clone()).unwrap();
    let all = Fgnn::new(8, 3, &FgnnConfig::new(8).with_edge_dropout(1.0), vb).unwrap();

    let state = random_graph(2, 5, &device);
    let reference = plain.forward(&state, true).unwrap();

    // Rate 0 in training matches no dropout.
    let out = zero.forward(&state, true).unwrap();
    assert!(max_abs_diff(&out.nodes, &reference.nodes) < 1e-6);

    // Evaluation mode ignores the rate.
    let out = half.forward(&state, false).unwrap();
    assert!(max_abs_diff(&out.nodes, &reference.nodes) < 1e-6);

    // Rate 1 drops every message.
    let out = all.forward(&state, true).unwrap();
    let total = out.edge_features.abs().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
    assert_eq!(total, 0.0);

    // Each edge is either dropped or rescaled by 1 / (1 - rate), in every batch row alike.
    let dropped = half.forward(&state, true).unwrap().edge_features.to_vec3::<f32>().unwrap();
    let kept = reference.edge_features.to_vec3::<f32>().unwrap();
    for e in 0..6 {
        let is_dropped = dropped[0][e].iter().all(|v| *v == 0.0);
        for b in 0..2 {
            for (d, k) in dropped[b][e].iter().zip(&kept[b][e]) {
                let expected = if is_dropped { 0.0 } else { 2.0 * k };
                assert!((d - expected).abs() < 1e-5, "edge {e}, row {b}: {d} vs {expected}");
            }
        }
    }
}

#[test]
fn test_class_token_is_updated_outside_the_graph() {
    let device = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8).with_class_token(true), vb).unwrap();

    // Slot 0 is the token, slots 1..=5 are the graph nodes addressed by edge_index.
    let mut state = random_graph(1, 5, &device);
    let token = Tensor::ones((1, 1, 8), DType::F32, &device).unwrap();
    state.nodes = Tensor::cat(&[&token, &state.nodes], 1).unwrap();

    let out = layer.forward(&state, false).unwrap();
    assert_eq!(out.nodes.dims(), &[1, 6, 8]);
    assert!(max_abs_diff(&out.nodes.narrow(1, 0, 1).unwrap(), &token) > 1e-3);

    // New graph-node features do not change which edges exist.
    let mut perturbed = state.clone();
    perturbed.nodes = Tensor::cat(
        &[&token, &Tensor::randn(0f32, 1f32, (1, 5, 8), &device).unwrap()],
        1,
    )
    .unwrap();
    let out2 = layer.forward(&perturbed, false).unwrap();
    assert_eq!(
        out.edge_index.to_vec3::<i64>().unwrap(),
        out2.edge_index.to_vec3::<i64>().unwrap()
    );
    assert_eq!(
        out2.edge_index.to_vec3::<i64>().unwrap(),
        state.edge_index.to_vec3::<i64>().unwrap()
    );
}

#[test]
fn test_training_step_keeps_kernel_in_range() {
    let device = Device::Cpu;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8), vb).unwrap();

    let mut opt = AdamW::new(
        varmap.all_vars(),
        ParamsAdamW {
            lr: 0.05,
            ..Default::default()
        },
    )
    .unwrap();

    // Start outside the admissible range; one constrained step must fix it.
    varmap.set_one("sigma", Tensor::new(&[3.0f32], &device).unwrap()).unwrap();
    varmap.set_one("beta", Tensor::new(&[0.2f32], &device).unwrap()).unwrap();

    let state = random_graph(2, 5, &device);
    for _ in 0..3 {
        let out = layer.forward(&state, true).unwrap();
        let loss = out.nodes.sqr().unwrap().mean_all().unwrap();
        step_constrained(&mut opt, &loss, &layer).unwrap();

        let sigma = layer.kernel().sigma().unwrap();
        let beta = layer.kernel().beta().unwrap();
        assert!((0.002..=1.0).contains(&sigma), "sigma {sigma}");
        assert!((1.0..=10.0).contains(&beta), "beta {beta}");
    }

    // Idempotent once in range.
    let sigma = layer.kernel().sigma().unwrap();
    layer.constrain().unwrap();
    assert_eq!(layer.kernel().sigma().unwrap(), sigma);
}

fn assert_all_finite(t: &Tensor, what: &str) {
    for v in t.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
        assert!(v.is_finite(), "{what} contains {v}");
    }
}

#[test]
fn test_training_step_with_zero_and_far_edges() {
    let device = Device::Cpu;
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let layer = Fgnn::new(8, 3, &FgnnConfig::new(8), vb).unwrap();
    let mut opt = AdamW::new(varmap.all_vars(), ParamsAdamW::default()).unwrap();

    // Kernel parameters at the edge of the admissible range.
    varmap.set_one("sigma", Tensor::new(&[0.002f32], &device).unwrap()).unwrap();
    varmap.set_one("beta", Tensor::new(&[10.0f32], &device).unwrap()).unwrap();

    // A self-edge at distance 0 and an edge far beyond sigma.
    let mut state = random_graph(2, 5, &device);
    state.distance = Tensor::new(
        &[[0.0f32, 1.0, 0.001, 0.0, 0.5, 0.003], [0.0f32, 0.002, 2.0, 0.0, 0.0, 0.004]],
        &device,
    )
    .unwrap();

    for _ in 0..3 {
        let out = layer.forward(&state, true).unwrap();
        assert_all_finite(&out.nodes, "nodes");
        assert_all_finite(&out.edge_features, "messages");

        let loss = out.edge_features.sum_all().unwrap();
        step_constrained(&mut opt, &loss, &layer).unwrap();

        let sigma = layer.kernel().sigma().unwrap();
        let beta = layer.kernel().beta().unwrap();
        assert!(sigma.is_finite() && (0.002..=1.0).contains(&sigma), "sigma {sigma}");
        assert!(beta.is_finite() && (1.0..=10.0).contains(&beta), "beta {beta}");
    }

    for var in varmap.all_vars() {
        assert_all_finite(var.as_tensor(), "parameter");
    }
    let out = layer.forward(&state, false).unwrap();
    assert_all_finite(&out.nodes, "nodes after training");
}
