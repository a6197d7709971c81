use super::*;
use crate::autograd::{backward, sum, Context, ConvGeometry, Tensor};
use crate::nn::{BatchNorm2d, Conv2d, NodeInput, Relu};
use approx::assert_abs_diff_eq;
use proptest::prelude::*;

const UNIT: ConvGeometry = ConvGeometry {
    stride: 1,
    padding: 0,
};

fn ones_conv(oc: usize, ic: usize) -> Conv2d {
    let weight = Tensor::from_shape_vec(&[oc, ic, 1, 1], vec![1.0; oc * ic], true).unwrap();
    Conv2d::new(weight, UNIT).unwrap()
}

/// conv (oc x ic, 1x1, all-ones weight) -> bn -> relu
fn conv_bn_relu(oc: usize, ic: usize) -> (Network, LayerId, LayerId) {
    let mut net = Network::new();
    let conv = net.add_layer("conv", ones_conv(oc, ic)).unwrap();
    let bn = net.add_layer("bn", BatchNorm2d::new(oc)).unwrap();
    let relu = net.add_layer("relu", Relu).unwrap();
    net.sequential(NodeInput::Data, &[conv, bn, relu]).unwrap();
    (net, conv, bn)
}

#[test]
fn test_install_allocates_ones_mask() {
    // TEST_ID: PRN-001
    let (mut net, conv, bn) = conv_bn_relu(4, 2);
    let pruner = ChannelPruner::new(&mut net, conv, bn, None).unwrap();
    let mask = pruner.core().mask().unwrap();
    assert_eq!(
        mask,
        Mask::ones(4),
        "PRN-001 FALSIFIED: fresh pruner must keep every channel"
    );
    assert!(
        net.layer(bn).unwrap().mask_slot().is_some(),
        "PRN-001 FALSIFIED: mask output should be wrapped"
    );
    assert!(!pruner.core().is_shared());
}

#[test]
fn test_install_rejects_non_convolution() {
    let (mut net, _, bn) = conv_bn_relu(4, 2);
    let err = ChannelPruner::new(&mut net, bn, bn, None).unwrap_err();
    assert_eq!(err, PruneError::NotConvolution { layer: "bn".into() });
}

#[test]
fn test_install_rejects_mask_output_of_other_width() {
    // TEST_ID: PRN-006
    let mut net = Network::new();
    let conv = net.add_layer("conv", ones_conv(4, 1)).unwrap();
    let bn = net.add_layer("bn", BatchNorm2d::new(3)).unwrap();
    net.sequential(NodeInput::Data, &[conv, bn]).unwrap();

    let err = ChannelPruner::new(&mut net, conv, bn, None).unwrap_err();
    assert_eq!(
        err,
        PruneError::ShapeMismatch {
            expected: vec![4],
            actual: vec![3],
        },
        "PRN-006 FALSIFIED: a 4-channel mask cannot sit on a 3-channel norm"
    );
    assert!(
        net.layer(bn).unwrap().mask_slot().is_none(),
        "PRN-006 FALSIFIED: a rejected install must leave the layer unwrapped"
    );
}

#[test]
fn test_masked_output_zeroes_pruned_channels() {
    // TEST_ID: PRN-002
    let (mut net, conv, bn) = conv_bn_relu(3, 1);
    let pruner = ChannelPruner::new(&mut net, conv, bn, None).unwrap();
    let mask = Mask::from_keep(&[true, false, true]);
    pruner.core().set_mask(mask).unwrap();

    let x = Tensor::from_shape_vec(&[2, 1, 2, 2], vec![1.0; 8], false).unwrap();
    let y = net.forward(&x, &Context::evaluation()).unwrap();
    for b in 0..2 {
        for (c, expect_zero) in [(0, false), (1, true), (2, false)] {
            let plane = [[b, c, 0, 0], [b, c, 0, 1], [b, c, 1, 0], [b, c, 1, 1]];
            let plane_sum: f32 = plane.iter().map(|&i| y.data()[i]).sum();
            assert_eq!(
                plane_sum == 0.0,
                expect_zero,
                "PRN-002 FALSIFIED: channel {c} of sample {b}"
            );
        }
    }
}

#[test]
fn test_masked_channel_gets_no_weight_gradient() {
    let (mut net, conv, _) = conv_bn_relu(2, 1);
    let pruner = ChannelPruner::on_conv(&mut net, conv).unwrap();
    let mask = Mask::from_keep(&[false, true]);
    pruner.core().set_mask(mask).unwrap();

    let x = Tensor::from_shape_vec(&[1, 1, 1, 1], vec![2.0], false).unwrap();
    let y = net.forward(&x, &Context::new()).unwrap();
    let mut loss = sum(&y);
    backward(&mut loss, None);

    let weight = net.layer(conv).unwrap().weight().unwrap();
    let grad = weight.grad().expect("weight gradient");
    assert_abs_diff_eq!(grad[[0, 0, 0, 0]], 0.0);
    assert_abs_diff_eq!(grad[[1, 0, 0, 0]], 2.0, epsilon = 1e-3);
}

#[test]
fn test_reinstall_rebinds_instead_of_rewrapping() {
    // TEST_ID: PRN-003
    let (mut net, conv, bn) = conv_bn_relu(2, 1);
    let first = ChannelPruner::new(&mut net, conv, bn, None).unwrap();
    let mask = Mask::from_keep(&[false, true]);
    first.core().set_mask(mask).unwrap();
    let second = ChannelPruner::new(&mut net, conv, bn, None).unwrap();

    let slot = net.layer(bn).unwrap().mask_slot().unwrap().clone();
    assert!(
        slot.same_mask(second.core().slot()),
        "PRN-003 FALSIFIED: layer should read the newest slot"
    );
    assert!(!slot.same_mask(first.core().slot()));

    // One mask application: the newest all-ones mask keeps both channels
    let x = Tensor::from_shape_vec(&[1, 1, 1, 1], vec![1.0], false).unwrap();
    let y = net.forward(&x, &Context::evaluation()).unwrap();
    assert!(y.data().iter().all(|&v| v > 0.0));
}

#[test]
fn test_analyse_counts_removed_share() {
    // TEST_ID: PRN-004
    let (mut net, conv, _) = conv_bn_relu(4, 2);
    let pruner = ChannelPruner::on_conv(&mut net, conv).unwrap();
    let mask = Mask::from_keep(&[true, false, true, true]);
    pruner.core().set_mask(mask).unwrap();

    let analysis = pruner.analyse((5, 10)).unwrap();
    assert_eq!(analysis.pruned_channels, 1);
    assert_eq!(analysis.total_channels, 4);
    assert_eq!(
        (analysis.pruned_params, analysis.total_params),
        (2, 8),
        "PRN-004 FALSIFIED: params"
    );
    assert_eq!(
        (analysis.pruned_macs, analysis.total_macs),
        (100, 400),
        "PRN-004 FALSIFIED: MACs"
    );
    assert_abs_diff_eq!(analysis.param_sparsity(), 0.25);
}

#[test]
fn test_analyse_all_ones_mask_prunes_nothing() {
    let (mut net, conv, bn) = conv_bn_relu(4, 2);
    let pruner = ChannelPruner::new(&mut net, conv, bn, None).unwrap();
    let analysis = pruner.analyse((3, 3)).unwrap();
    assert_eq!(analysis.pruned_params, 0);
    assert_eq!(analysis.pruned_macs, 0);
    assert_eq!(analysis.total_macs, 3 * 3 * 4 * 2);
}

#[test]
fn test_base_pruner_has_no_default_rule() {
    let (mut net, conv, _) = conv_bn_relu(2, 1);
    let mut pruner = ChannelPruner::on_conv(&mut net, conv).unwrap();
    let err = pruner
        .default_prune(&net, &PruneArgs::default())
        .unwrap_err();
    assert_eq!(
        err,
        PruneError::Unimplemented {
            layer: "conv".into()
        }
    );
    assert_eq!(pruner.criterion(), Criterion::Manual);
    assert!(!pruner.detach(&net), "a manual pruner attaches no hook");
}

#[test]
fn test_set_mask_checks_length() {
    let (mut net, conv, _) = conv_bn_relu(2, 1);
    let pruner = ChannelPruner::on_conv(&mut net, conv).unwrap();
    let outcome = pruner.core().set_mask(Mask::ones(3));
    assert!(matches!(outcome, Err(PruneError::ShapeMismatch { .. })));
}

#[test]
fn test_shared_pruner_mirrors_source_after_binding() {
    // TEST_ID: PRN-005
    let mut net = Network::new();
    let a = net.add_layer("a", ones_conv(2, 1)).unwrap();
    let b = net.add_layer("b", ones_conv(2, 1)).unwrap();
    net.call(a, NodeInput::Data).unwrap();
    net.call(b, NodeInput::Data).unwrap();

    let source = ChannelPruner::on_conv(&mut net, a).unwrap();
    let mirror = ChannelPruner::new(&mut net, b, b, Some(a)).unwrap();
    assert!(mirror.core().is_shared());
    assert_eq!(
        mirror.core().mask(),
        Err(PruneError::UnresolvedShare { layer: "b".into() })
    );

    let x = Tensor::from_shape_vec(&[1, 1, 1, 1], vec![1.0], false).unwrap();
    assert!(
        matches!(
            net.forward(&x, &Context::evaluation()),
            Err(PruneError::UnresolvedShare { .. })
        ),
        "PRN-005 FALSIFIED: unresolved share must fail loudly"
    );

    mirror.core().bind_share(source.core()).unwrap();
    let mask = Mask::from_keep(&[true, false]);
    source.core().set_mask(mask).unwrap();
    assert_eq!(mirror.core().mask().unwrap(), source.core().mask().unwrap());
    assert_eq!(
        mirror.core().set_mask(Mask::ones(2)),
        Err(PruneError::SharedMaskMutation { layer: "b".into() }),
        "PRN-005 FALSIFIED: mirrors never own a mask"
    );
}

#[test]
fn test_layer_analysis_total() {
    let a = LayerAnalysis {
        pruned_params: 2,
        total_params: 8,
        pruned_macs: 100,
        total_macs: 400,
        ..Default::default()
    };
    let b = LayerAnalysis {
        pruned_params: 1,
        total_params: 4,
        pruned_macs: 50,
        total_macs: 200,
        ..Default::default()
    };
    let total = LayerAnalysis::total([&a, &b]);
    assert_abs_diff_eq!(total.param_sparsity(), 0.25);
    assert_abs_diff_eq!(total.mac_sparsity(), 0.25);
    assert_abs_diff_eq!(LayerAnalysis::default().param_sparsity(), 0.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_analyse_is_pure(
        keep in prop::collection::vec(any::<bool>(), 4),
        h in 1usize..8,
        w in 1usize..8,
    ) {
        let (mut net, conv, _) = conv_bn_relu(4, 3);
        let pruner = ChannelPruner::on_conv(&mut net, conv).unwrap();
        pruner.core().set_mask(Mask::from_keep(&keep)).unwrap();

        let first = pruner.analyse((h, w)).unwrap();
        let second = pruner.analyse((h, w)).unwrap();
        prop_assert_eq!(first, second);
        prop_assert_eq!(first.pruned_channels, keep.iter().filter(|&&k| !k).count());
        prop_assert!(first.pruned_macs <= first.total_macs);
        prop_assert_eq!(pruner.core().mask().unwrap().keep_flags(), keep);
    }
}
