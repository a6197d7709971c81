use super::*;
use crate::autograd::{backward, sum, Context, ConvGeometry, Tensor};
use crate::error::PruneError;
use approx::assert_abs_diff_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::rc::Rc;

const UNIT: ConvGeometry = ConvGeometry {
    stride: 1,
    padding: 0,
};

fn scaled_conv(scale: f32, channels: usize) -> Conv2d {
    // 1x1 convolution multiplying every channel by `scale`
    let mut values = vec![0.0; channels * channels];
    for c in 0..channels {
        values[c * channels + c] = scale;
    }
    let weight = Tensor::from_shape_vec(&[channels, channels, 1, 1], values, true).unwrap();
    Conv2d::new(weight, UNIT).unwrap()
}

/// conv0 -> relu, conv1 on the same input, summed: a residual block in miniature
fn residual() -> (Network, LayerId, LayerId, LayerId) {
    let mut net = Network::new();
    let c0 = net.add_layer("c0", scaled_conv(2.0, 2)).unwrap();
    let relu = net.add_layer("relu", Relu).unwrap();
    let c1 = net.add_layer("c1", scaled_conv(3.0, 2)).unwrap();
    let a = net.call(c0, NodeInput::Data).unwrap();
    let r = net.call(relu, a).unwrap();
    let b = net.call(c1, NodeInput::Data).unwrap();
    net.add(r, b).unwrap();
    (net, c0, relu, c1)
}

#[test]
fn test_node_names_follow_invocation_count() {
    // TEST_ID: NET-001
    let mut net = Network::new();
    let relu = net.add_layer("relu", Relu).unwrap();
    let a = net.call(relu, NodeInput::Data).unwrap();
    let b = net.call(relu, a).unwrap();
    let s = net.add(a, b).unwrap();
    let names: Vec<&str> = net.nodes().iter().map(GraphNode::name).collect();
    assert_eq!(
        names,
        vec!["relu_fwd", "relu_fwd1", "add0"],
        "NET-001 FALSIFIED: symbolic names"
    );
    assert_eq!(net.nodes_of_layer(relu).len(), 2);
    assert_eq!(net.consumers(a), vec![b, s]);
    assert_eq!(net.node(s).unwrap().op(), NodeOp::Add);
}

#[test]
fn test_duplicate_layer_name_rejected() {
    let mut net = Network::new();
    net.add_layer("x", Relu).unwrap();
    assert_eq!(
        net.add_layer("x", Identity).unwrap_err(),
        PruneError::DuplicateLayer { name: "x".into() }
    );
}

#[test]
fn test_call_rejects_future_node() {
    let mut net = Network::new();
    let relu = net.add_layer("relu", Relu).unwrap();
    let dangling = {
        let mut other = Network::new();
        let r = other.add_layer("r", Relu).unwrap();
        other.call(r, NodeInput::Data).unwrap();
        other.call(r, NodeInput::Data).unwrap()
    };
    assert!(net.call(relu, dangling).is_err());
}

#[test]
fn test_residual_forward_values() {
    // TEST_ID: NET-002
    let (net, ..) = residual();
    let x = Tensor::from_shape_vec(&[1, 2, 1, 1], vec![1.0, -1.0], false).unwrap();
    let y = net.forward(&x, &Context::evaluation()).unwrap();
    // relu(2x) + 3x
    assert_abs_diff_eq!(y.data()[[0, 0, 0, 0]], 5.0);
    assert_abs_diff_eq!(y.data()[[0, 1, 0, 0]], -3.0);
}

#[test]
fn test_residual_backward_reaches_both_branches() {
    let (net, c0, _, c1) = residual();
    let x = Tensor::from_shape_vec(&[1, 2, 1, 1], vec![1.0, 1.0], false).unwrap();
    let y = net.forward(&x, &Context::new()).unwrap();
    let mut loss = sum(&y);
    backward(&mut loss, None);
    for conv in [c0, c1] {
        let grad = net.layer(conv).unwrap().weight().unwrap().grad();
        assert!(
            grad.is_some_and(|g| g.iter().any(|&v| v != 0.0)),
            "NET-002 FALSIFIED: branch lost its gradient"
        );
    }
}

#[test]
fn test_forward_hook_sees_output_and_mode() {
    // TEST_ID: NET-003
    let (net, c0, ..) = residual();
    let seen: Rc<RefCell<Vec<(Vec<usize>, bool)>>> = Rc::default();
    let sink = Rc::clone(&seen);
    let handle = net
        .register_forward_hook(c0, move |event| {
            let record = (event.output.shape().to_vec(), event.training);
            sink.borrow_mut().push(record);
        })
        .unwrap();

    let x = Tensor::zeros(&[3, 2, 4, 4]);
    net.forward(&x, &Context::evaluation()).unwrap();
    net.forward(&x, &Context::new()).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![(vec![3, 2, 4, 4], false), (vec![3, 2, 4, 4], true)]
    );

    assert!(net.remove_hook(handle));
    assert!(
        !net.remove_hook(handle),
        "NET-003 FALSIFIED: a hook detaches once"
    );
    net.forward(&x, &Context::evaluation()).unwrap();
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn test_scoped_hook_detaches_on_drop() {
    let (net, c0, ..) = residual();
    let calls = Rc::new(RefCell::new(0));
    let x = Tensor::zeros(&[1, 2, 1, 1]);
    {
        let sink = Rc::clone(&calls);
        let _guard = net
            .scoped_forward_hook(c0, move |_| *sink.borrow_mut() += 1)
            .unwrap();
        assert_eq!(net.hook_count(), 1);
        net.forward(&x, &Context::evaluation()).unwrap();
    }
    assert_eq!(net.hook_count(), 0);
    net.forward(&x, &Context::evaluation()).unwrap();
    assert_eq!(*calls.borrow(), 1);
}

#[test]
fn test_backward_hook_reports_gradient_of_output() {
    // TEST_ID: NET-004
    let (net, _, relu, _) = residual();
    let seen: Rc<RefCell<Vec<f32>>> = Rc::default();
    let sink = Rc::clone(&seen);
    net.register_backward_hook(relu, move |event| {
        let pairs = event.output.iter().zip(event.grad_output);
        sink.borrow_mut().extend(pairs.map(|(y, dy)| y * dy));
    })
    .unwrap();

    let x = Tensor::from_shape_vec(&[1, 2, 1, 1], vec![1.0, 2.0], false).unwrap();
    let y = net.forward(&x, &Context::evaluation()).unwrap();
    let mut loss = sum(&y);
    backward(&mut loss, None);
    // relu output is (2, 4); d(sum)/d(relu) is 1
    assert_eq!(
        *seen.borrow(),
        vec![2.0, 4.0],
        "NET-004 FALSIFIED: y * dy at the relu output"
    );
}

#[test]
fn test_wrap_layer_keeps_registration() {
    struct Doubling(Box<dyn Layer>);
    impl Layer for Doubling {
        fn forward(&self, x: &Tensor, ctx: &Context) -> crate::error::Result<Tensor> {
            let y = self.0.forward(x, ctx)?;
            crate::autograd::add(&y, &y)
        }
        fn kind(&self) -> LayerKind {
            self.0.kind()
        }
    }

    let mut net = Network::new();
    let relu = net.add_layer("relu", Relu).unwrap();
    net.call(relu, NodeInput::Data).unwrap();
    net.wrap_layer(relu, |inner| Box::new(Doubling(inner)))
        .unwrap();

    assert_eq!(net.find_layer("relu"), Some(relu));
    assert_eq!(net.layer(relu).unwrap().kind(), LayerKind::Activation);
    let x = Tensor::from_vec(vec![3.0, -1.0], false);
    let y = net.forward(&x, &Context::evaluation()).unwrap();
    assert_eq!(y.data().iter().copied().collect::<Vec<_>>(), vec![6.0, 0.0]);
}

#[test]
fn test_layers_of_kind_in_registration_order() {
    let (net, c0, _, c1) = residual();
    assert_eq!(net.layers_of_kind(LayerKind::Conv), vec![c0, c1]);
    assert!(net.layers_of_kind(LayerKind::Norm).is_empty());
}

#[test]
fn test_kaiming_uniform_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    let conv = Conv2d::kaiming_uniform(8, 3, 3, UNIT, &mut rng);
    let bound = (6.0f32 / 27.0).sqrt();
    assert_eq!(conv.weight_dims(), [8, 3, 3, 3]);
    let weight = conv.weight().unwrap();
    assert!(weight.data().iter().all(|v| v.abs() <= bound));
}

#[test]
fn test_batch_norm_rejects_wrong_length() {
    let bn = BatchNorm2d::new(3);
    let (mean, var) = (ndarray::Array1::zeros(2), ndarray::Array1::ones(3));
    assert!(bn.with_running_stats(mean, var).is_err());
}
