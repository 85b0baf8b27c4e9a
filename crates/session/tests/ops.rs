mod common;

use common::*;
use webnn_ep::BuildError;
use webnn_ep_core::{
    attr::AttributeValue,
    model::Model,
    node::Node,
    tensor::{Tensor, TensorElemType, TypedFixedShape},
};

const TANH_1: f32 = 0.761_594_2;

fn conv_model(pads: Vec<i64>, out_dims: &[usize]) -> Model {
    let mut model = Model::default();
    let x = input(&mut model, "x", &[1, 1, 3, 3]);
    let w = init(&mut model, "w", tensor(&[1, 1, 3, 3], vec![1.0; 9]));
    let y = output(&mut model, "y", out_dims);
    model.graph.add_node(
        Node::new("Conv")
            .with_name("conv".to_string())
            .with_ins(vec![x, w])
            .with_out(y)
            .with_attr("pads", pads),
    );
    model
}

#[test]
fn conv_same_padding() {
    init_logger();

    let model = conv_model(vec![1, 1, 1, 1], &[1, 1, 3, 3]);
    let x = tensor(&[1, 1, 3, 3], vec![1.0; 9]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[1, 1, 3, 3]);
    assert_close(
        &outputs[0],
        &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0],
    );
}

#[test]
fn conv_explicit_padding() {
    init_logger();

    // Padding only the top and left edges.
    let model = conv_model(vec![1, 1, 0, 0], &[1, 1, 2, 2]);
    let x = tensor(&[1, 1, 3, 3], vec![1.0; 9]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[1, 1, 2, 2]);
    assert_close(&outputs[0], &[4.0, 6.0, 6.0, 9.0]);
}

#[test]
fn conv_relu_fused() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[1, 1, 2, 2]);
    let w = init(&mut model, "w", tensor(&[1, 1, 1, 1], vec![2.0]));
    let b = init(&mut model, "b", tensor(&[1], vec![0.5]));
    let y = value(&mut model, "y", &[1, 1, 2, 2]);
    let z = output(&mut model, "z", &[1, 1, 2, 2]);
    model
        .graph
        .add_node(Node::new("Conv").with_ins(vec![x, w, b]).with_out(y));
    model.graph.add_node(Node::new("Relu").with_in(y).with_out(z));

    let x = tensor(&[1, 1, 2, 2], vec![-1.0, 2.0, -3.0, 4.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_close(&outputs[0], &[0.0, 4.5, 0.0, 8.5]);
}

#[test]
fn conv_transpose() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[1, 1, 2, 2]);
    let w = init(&mut model, "w", tensor(&[1, 1, 2, 2], vec![1.0; 4]));
    let y = output(&mut model, "y", &[1, 1, 3, 3]);
    model
        .graph
        .add_node(Node::new("ConvTranspose").with_ins(vec![x, w]).with_out(y));

    let x = tensor(&[1, 1, 2, 2], vec![1.0; 4]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_close(
        &outputs[0],
        &[1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0],
    );
}

fn conv_transpose_model(
    x_dims: &[usize],
    w: Tensor,
    y_dims: &[usize],
    attrs: Vec<(&str, AttributeValue)>,
) -> Model {
    let mut model = Model::default();
    let x = input(&mut model, "x", x_dims);
    let w = init(&mut model, "w", w);
    let y = output(&mut model, "y", y_dims);
    let mut node = Node::new("ConvTranspose").with_ins(vec![x, w]).with_out(y);
    for (name, attr) in attrs {
        node = node.with_attr(name, attr);
    }
    model.graph.add_node(node);
    model
}

#[test]
fn conv_transpose_channels_follow_filter_layout() {
    init_logger();

    // W is [C_in = 2, C_out = 3, 1, 1].
    let w = tensor(&[2, 3, 1, 1], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let model = conv_transpose_model(&[1, 2, 1, 1], w, &[1, 3, 1, 1], vec![]);
    let x = tensor(&[1, 2, 1, 1], vec![1.0, 2.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[1, 3, 1, 1]);
    assert_close(&outputs[0], &[9.0, 12.0, 15.0]);
}

#[test]
fn conv_transpose_grouped() {
    init_logger();

    // Two groups, each mapping one input channel to two output channels.
    let w = tensor(&[2, 2, 1, 1], vec![1.0, 2.0, 3.0, 4.0]);
    let model = conv_transpose_model(
        &[1, 2, 1, 1],
        w,
        &[1, 4, 1, 1],
        vec![("group", 2i64.into())],
    );
    let x = tensor(&[1, 2, 1, 1], vec![1.0, 2.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_close(&outputs[0], &[1.0, 2.0, 6.0, 8.0]);
}

#[test]
fn conv_transpose_output_padding() {
    init_logger();

    let model = conv_transpose_model(
        &[1, 1, 2, 2],
        tensor(&[1, 1, 1, 1], vec![1.0]),
        &[1, 1, 4, 4],
        vec![
            ("strides", vec![2i64, 2].into()),
            ("output_padding", vec![1i64, 1].into()),
        ],
    );
    let x = tensor(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[1, 1, 4, 4]);
    #[rustfmt::skip]
    let expected = [
        1.0, 0.0, 2.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        3.0, 0.0, 4.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
    ];
    assert_close(&outputs[0], &expected);
}

#[test]
fn conv_transpose_output_shape_centers_the_crop() {
    init_logger();

    // The full output is 5x5; output_shape keeps rows and columns 1..4.
    let model = conv_transpose_model(
        &[1, 1, 2, 2],
        tensor(&[1, 1, 3, 3], vec![1.0; 9]),
        &[1, 1, 3, 3],
        vec![
            ("strides", vec![2i64, 2].into()),
            ("output_shape", vec![3i64, 3].into()),
        ],
    );
    let x = tensor(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_close(&outputs[0], &[1.0, 3.0, 2.0, 4.0, 10.0, 6.0, 3.0, 7.0, 4.0]);
}

#[test]
fn conv_transpose_with_oversized_output_shape_is_not_claimed() {
    init_logger();

    let model = conv_transpose_model(
        &[1, 1, 2, 2],
        tensor(&[1, 1, 3, 3], vec![1.0; 9]),
        &[1, 1, 6, 6],
        vec![
            ("strides", vec![2i64, 2].into()),
            ("output_shape", vec![6i64, 6].into()),
        ],
    );

    let provider = webnn_ep::WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());
}

#[test]
fn batch_norm_then_concat() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[1, 2, 1, 1]);
    let scale = init(&mut model, "scale", tensor(&[2], vec![2.0, 3.0]));
    let bias = init(&mut model, "bias", tensor(&[2], vec![0.0, 1.0]));
    let mean = init(&mut model, "mean", tensor(&[2], vec![0.0, 1.0]));
    let var = init(&mut model, "var", tensor(&[2], vec![1.0, 1.0]));
    let y = value(&mut model, "y", &[1, 2, 1, 1]);
    let z = output(&mut model, "z", &[1, 4, 1, 1]);
    model.graph.add_node(
        Node::new("BatchNormalization")
            .with_ins(vec![x, scale, bias, mean, var])
            .with_out(y)
            .with_attr("epsilon", 0.0f32),
    );
    model.graph.add_node(
        Node::new("Concat")
            .with_ins(vec![y, x])
            .with_out(z)
            .with_attr("axis", -3i64),
    );

    let x = tensor(&[1, 2, 1, 1], vec![1.0, 2.0]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[1, 4, 1, 1]);
    assert_close(&outputs[0], &[2.0, 4.0, 1.0, 2.0]);
}

#[test]
fn gemm_with_bias_vector() {
    init_logger();

    let mut model = Model::default();
    let a = input(&mut model, "a", &[2, 3]);
    let b = init(&mut model, "b", tensor(&[3, 4], vec![1.0; 12]));
    let c = init(&mut model, "c", tensor(&[4], vec![1.0, 2.0, 3.0, 4.0]));
    let y = output(&mut model, "y", &[2, 4]);
    model
        .graph
        .add_node(Node::new("Gemm").with_ins(vec![a, b, c]).with_out(y));

    let a = tensor(&[2, 3], vec![1.0; 6]);
    let outputs = run_single_partition(&model, &[&a]);

    assert_close(&outputs[0], &[4.0, 5.0, 6.0, 7.0, 4.0, 5.0, 6.0, 7.0]);
}

#[test]
fn gemm_with_mismatched_bias_is_not_claimed() {
    init_logger();

    let mut model = Model::default();
    let a = input(&mut model, "a", &[2, 3]);
    let b = init(&mut model, "b", tensor(&[3, 4], vec![1.0; 12]));
    let c = init(&mut model, "c", tensor(&[3], vec![1.0; 3]));
    let y = output(&mut model, "y", &[2, 4]);
    model
        .graph
        .add_node(Node::new("Gemm").with_ins(vec![a, b, c]).with_out(y));

    let provider = webnn_ep::WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());
}

#[test]
fn matmul() {
    init_logger();

    let mut model = Model::default();
    let a = input(&mut model, "a", &[2, 2]);
    let b = init(&mut model, "b", tensor(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]));
    let y = output(&mut model, "y", &[2, 2]);
    model
        .graph
        .add_node(Node::new("MatMul").with_ins(vec![a, b]).with_out(y));

    let a = tensor(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]);
    let outputs = run_single_partition(&model, &[&a]);

    assert_close(&outputs[0], &[1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn range_of_constants() {
    init_logger();

    let mut model = Model::default();
    let start = init(&mut model, "start", tensor(&[], vec![0.0]));
    let limit = init(&mut model, "limit", tensor(&[], vec![5.0]));
    let delta = init(&mut model, "delta", tensor(&[], vec![1.0]));
    let y = output(&mut model, "y", &[5]);
    model.graph.add_node(
        Node::new("Range")
            .with_ins(vec![start, limit, delta])
            .with_out(y),
    );

    let outputs = run_single_partition(&model, &[]);

    assert_eq!(outputs[0].dims().as_slice(), &[5]);
    assert_close(&outputs[0], &[0.0, 1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn range_with_integer_output_is_not_claimed() {
    init_logger();

    let scalar = |v: i64| Tensor::new(Vec::<usize>::new().into(), vec![v]);
    let mut model = Model::default();
    let start = init(&mut model, "start", scalar(0));
    let limit = init(&mut model, "limit", scalar(4));
    let delta = init(&mut model, "delta", scalar(2));
    let y_shape = TypedFixedShape::new(vec![2].into(), TensorElemType::I64);
    let y = model.graph.values.new_val_named_and_shaped("y", y_shape);
    model.graph.outputs.push(y);
    model.graph.add_node(
        Node::new("Range")
            .with_ins(vec![start, limit, delta])
            .with_out(y),
    );

    let provider = webnn_ep::WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());

    let ids = model.graph.topo_sort_nodes();
    let err = provider.compile(&model, &ids).err().unwrap();
    insta::assert_snapshot!(err.to_string(), @"Tensor 'y' has unsupported type I64");
}

/// Single-direction GRU with zero weights. Only the candidate gate sees a
/// bias, so z = 0.5 and h_t = 0.5 * tanh(1) + 0.5 * h_{t-1}.
#[test]
fn gru_splits_packed_bias() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[2, 1, 1]);
    let w = init(&mut model, "w", tensor(&[1, 3, 1], vec![0.0; 3]));
    let r = init(&mut model, "r", tensor(&[1, 3, 1], vec![0.0; 3]));
    let b = init(
        &mut model,
        "b",
        tensor(&[1, 6], vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0]),
    );
    let lens = init(
        &mut model,
        "sequence_lens",
        Tensor::new(vec![1].into(), vec![2i32]),
    );
    let y = output(&mut model, "y", &[2, 1, 1, 1]);
    let y_h = output(&mut model, "y_h", &[1, 1, 1]);
    model.graph.add_node(
        Node::new("GRU")
            .with_ins(vec![x, w, r, b, lens])
            .with_outs(vec![y, y_h])
            .with_attr("hidden_size", 1i64),
    );

    let x = tensor(&[2, 1, 1], vec![0.0; 2]);
    let outputs = run_single_partition(&model, &[&x]);

    assert_eq!(outputs[0].dims().as_slice(), &[2, 1, 1, 1]);
    assert_eq!(outputs[1].dims().as_slice(), &[1, 1, 1]);
    assert_close(&outputs[0], &[0.5 * TANH_1, 0.75 * TANH_1]);
    assert_close(&outputs[1], &[0.75 * TANH_1]);
}

#[test]
fn gru_with_short_sequence_lens_is_not_claimed() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[3, 1, 1]);
    let w = init(&mut model, "w", tensor(&[1, 3, 1], vec![0.0; 3]));
    let r = init(&mut model, "r", tensor(&[1, 3, 1], vec![0.0; 3]));
    let lens = init(
        &mut model,
        "sequence_lens",
        Tensor::new(vec![1].into(), vec![2i32]),
    );
    let y = output(&mut model, "y", &[3, 1, 1, 1]);
    model.graph.add_node(
        Node::new("GRU")
            .with_name("gru".to_string())
            .with_ins(vec![x, w, r])
            .with_no_in()
            .with_in(lens)
            .with_out(y),
    );

    let provider = webnn_ep::WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());

    let ids = model.graph.topo_sort_nodes();
    let err = provider.compile(&model, &ids).err().unwrap();
    assert!(matches!(err, BuildError::Message(_)));
    insta::assert_snapshot!(err.to_string(), @"Something went wrong: GRU [gru] runs 2 steps but seq_length is 3");
}

#[test]
fn gru_with_unsupported_attributes_is_not_claimed() {
    init_logger();

    let provider = webnn_ep::WebNNExecutionProvider::default();
    let attrs: [(&str, AttributeValue); 4] = [
        ("clip", 1.0f32.into()),
        ("linear_before_reset", 1i64.into()),
        ("layout", 1i64.into()),
        ("activations", vec!["Sigmoid", "HardSigmoid"].into()),
    ];
    for (name, attr) in attrs {
        let mut model = Model::default();
        let x = input(&mut model, "x", &[1, 1, 1]);
        let w = init(&mut model, "w", tensor(&[1, 3, 1], vec![0.0; 3]));
        let r = init(&mut model, "r", tensor(&[1, 3, 1], vec![0.0; 3]));
        let y = output(&mut model, "y", &[1, 1, 1, 1]);
        model.graph.add_node(
            Node::new("GRU")
                .with_ins(vec![x, w, r])
                .with_out(y)
                .with_attr(name, attr),
        );
        assert!(provider.get_capability(&model).is_empty(), "{name}");
    }
}

#[test]
fn scalar_output_is_rank_zero() {
    init_logger();

    let mut model = Model::default();
    let x = input(&mut model, "x", &[]);
    let y = output(&mut model, "y", &[]);
    model.graph.add_node(Node::new("Sigmoid").with_in(x).with_out(y));

    let provider = webnn_ep::WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);
    let compiled = provider.compile(&model, &groups[0]).unwrap();
    assert!(compiled.is_scalar_output("y"));

    let x = Tensor::new(Vec::<usize>::new().into(), vec![0.0f32]);
    let outputs = provider.run(&compiled, &[&x]).unwrap();
    assert!(outputs[0].dims().is_empty());
    assert_eq!(outputs[0].elem_ty(), TensorElemType::F32);
    assert_close(&outputs[0], &[0.5]);
}
