use super::*;
use crate::autograd::{ConvGeometry, Tensor};
use crate::error::PruneError;
use crate::nn::{BatchNorm2d, Conv2d, LayerId, Network, NodeInput, Relu};

const UNIT: ConvGeometry = ConvGeometry {
    stride: 1,
    padding: 0,
};

fn conv(net: &mut Network, name: &str) -> LayerId {
    let weight = Tensor::from_shape_vec(&[2, 2, 1, 1], vec![1.0; 4], true).unwrap();
    let layer = Conv2d::new(weight, UNIT).unwrap();
    net.add_layer(name, layer).unwrap()
}

#[test]
fn test_symbol_mapper_skips_reused_layers() {
    // TEST_ID: GRAPH-001
    let mut net = Network::new();
    let c = conv(&mut net, "c");
    let relu = net.add_layer("relu", Relu).unwrap();
    let unused = net.add_layer("unused", Relu).unwrap();
    let a = net.call(c, NodeInput::Data).unwrap();
    let b = net.call(relu, a).unwrap();
    net.call(relu, b).unwrap();

    let mapper = layer_symbol_mapper(&net).unwrap();
    assert_eq!(mapper.get_right(&c).map(String::as_str), Some("c_fwd"));
    assert_eq!(mapper.get_left(&"c_fwd".to_string()), Some(&c));
    assert!(
        mapper.get_right(&relu).is_none(),
        "GRAPH-001 FALSIFIED: twice-invoked layer has no unique symbol"
    );
    assert!(mapper.get_right(&unused).is_none());
}

#[test]
fn test_pairs_follow_graph_not_declaration_order() {
    // TEST_ID: GRAPH-002
    let mut net = Network::new();
    // declared bn_b before bn_a, and conv_b before conv_a
    let bn_b = net.add_layer("bn_b", BatchNorm2d::new(2)).unwrap();
    let conv_b = conv(&mut net, "conv_b");
    let conv_a = conv(&mut net, "conv_a");
    let bn_a = net.add_layer("bn_a", BatchNorm2d::new(2)).unwrap();
    let relu = net.add_layer("relu", Relu).unwrap();
    let order = [conv_a, bn_a, relu, conv_b, bn_b];
    net.sequential(NodeInput::Data, &order).unwrap();

    let pairs = pair_conv_norm(&net, &[]).unwrap();
    assert_eq!(pairs.len(), 2);
    assert_eq!(
        pairs.get_right(&conv_a),
        Some(&bn_a),
        "GRAPH-002 FALSIFIED: conv_a feeds bn_a"
    );
    assert_eq!(pairs.get_right(&conv_b), Some(&bn_b));
    assert_eq!(pairs.get_left(&bn_b), Some(&conv_b));
}

#[test]
fn test_norm_on_input_has_no_ancestor() {
    let mut net = Network::new();
    let bn = net.add_layer("bn", BatchNorm2d::new(2)).unwrap();
    net.call(bn, NodeInput::Data).unwrap();
    assert_eq!(
        pair_conv_norm(&net, &[]).unwrap_err(),
        PruneError::NoConvAncestor { layer: "bn".into() }
    );
    assert!(
        pair_conv_norm(&net, &[bn]).unwrap().is_empty(),
        "excluded layers are never paired"
    );
}

#[test]
fn test_norm_after_sum_is_ambiguous() {
    // TEST_ID: GRAPH-003
    let mut net = Network::new();
    let a = conv(&mut net, "a");
    let b = conv(&mut net, "b");
    let bn = net.add_layer("bn", BatchNorm2d::new(2)).unwrap();
    let x = net.call(a, NodeInput::Data).unwrap();
    let y = net.call(b, NodeInput::Data).unwrap();
    let s = net.add(x, y).unwrap();
    net.call(bn, s).unwrap();

    match pair_conv_norm(&net, &[]) {
        Err(PruneError::AmbiguousPairing { layer, candidates }) => {
            assert_eq!(layer, "bn");
            assert_eq!(candidates, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("GRAPH-003 FALSIFIED: expected ambiguity, got {other:?}"),
    }
}

#[test]
fn test_conv_claimed_twice_is_ambiguous() {
    let mut net = Network::new();
    let c = conv(&mut net, "c");
    let bn1 = net.add_layer("bn1", BatchNorm2d::new(2)).unwrap();
    let bn2 = net.add_layer("bn2", BatchNorm2d::new(2)).unwrap();
    net.sequential(NodeInput::Data, &[c, bn1, bn2]).unwrap();

    assert!(matches!(
        pair_conv_norm(&net, &[]),
        Err(PruneError::AmbiguousPairing { .. })
    ));
    let pairs = pair_conv_norm(&net, &[bn2]).unwrap();
    assert_eq!(pairs.get_right(&c), Some(&bn1));
}

#[test]
fn test_unequal_distances_pick_nearest() {
    // a -> bn directly, b -> relu -> sum: a is one hop closer
    let mut net = Network::new();
    let a = conv(&mut net, "a");
    let b = conv(&mut net, "b");
    let relu = net.add_layer("relu", Relu).unwrap();
    let bn = net.add_layer("bn", BatchNorm2d::new(2)).unwrap();
    let x = net.call(a, NodeInput::Data).unwrap();
    let y = net.call(b, NodeInput::Data).unwrap();
    let r = net.call(relu, y).unwrap();
    let s = net.add(x, r).unwrap();
    net.call(bn, s).unwrap();

    let pairs = pair_conv_norm(&net, &[]).unwrap();
    assert_eq!(pairs.get_left(&bn), Some(&a));
}

#[test]
fn test_activation_after() {
    let mut net = Network::new();
    let c = conv(&mut net, "c");
    let bn = net.add_layer("bn", BatchNorm2d::new(2)).unwrap();
    let relu = net.add_layer("relu", Relu).unwrap();
    net.sequential(NodeInput::Data, &[c, bn, relu]).unwrap();

    assert_eq!(activation_after(&net, bn).unwrap(), Some(relu));
    assert_eq!(activation_after(&net, c).unwrap(), None);
    assert_eq!(activation_after(&net, relu).unwrap(), None);
}
