mod common;

use std::sync::{Arc, Mutex};

use common::*;
use rustc_hash::FxHashMap;
use webnn_ep::{
    model_builder::ModelBuilder, subgraph::SubGraph, BuildError, PredictError, ProviderOptions,
    WebNNExecutionProvider,
};
use webnn_ep_backend::{
    reference::ReferenceBackend, Backend, BackendError, Context, ContextOptions,
    DevicePreference, PowerPreference,
};
use webnn_ep_core::{
    model::Model,
    node::Node,
    tensor::{Tensor, TensorElemType},
};

/// x -> Relu -> Softmax -> Tanh -> y
fn relu_softmax_tanh() -> Model {
    let mut model = Model::default();
    let x = input(&mut model, "x", &[1, 4]);
    let a = value(&mut model, "a", &[1, 4]);
    let b = value(&mut model, "b", &[1, 4]);
    let y = output(&mut model, "y", &[1, 4]);
    model
        .graph
        .add_node(Node::new("Relu").with_name("relu".to_string()).with_in(x).with_out(a));
    model.graph.add_node(
        Node::new("Softmax")
            .with_name("softmax".to_string())
            .with_in(a)
            .with_out(b),
    );
    model
        .graph
        .add_node(Node::new("Tanh").with_name("tanh".to_string()).with_in(b).with_out(y));
    model
}

fn relu_model(dims: &[usize]) -> Model {
    let mut model = Model::default();
    let x = input(&mut model, "x", dims);
    let y = output(&mut model, "y", dims);
    model.graph.add_node(Node::new("Relu").with_in(x).with_out(y));
    model
}

#[test]
fn unsupported_node_splits_partitions() {
    init_logger();

    let model = relu_softmax_tanh();
    let provider = WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);

    let ops = groups
        .iter()
        .map(|g| {
            g.iter()
                .map(|&n| model.graph.nodes[n].op_type.as_str())
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    assert_eq!(ops, vec![vec!["Relu"], vec!["Tanh"]]);

    // Partitioning is deterministic.
    assert_eq!(provider.get_capability(&model), groups);
}

#[test]
fn partitions_run_independently() {
    init_logger();

    let model = relu_softmax_tanh();
    let provider = WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);

    let relu = provider.compile(&model, &groups[0]).unwrap();
    assert_eq!(relu.inputs(), &["x".to_string()]);
    assert_eq!(relu.outputs(), &["a".to_string()]);
    let x = tensor(&[1, 4], vec![-1.0, 0.0, 1.0, 2.0]);
    let a = provider.run(&relu, &[&x]).unwrap();
    assert_close(&a[0], &[0.0, 0.0, 1.0, 2.0]);

    let tanh = provider.compile(&model, &groups[1]).unwrap();
    assert_eq!(tanh.inputs(), &["b".to_string()]);
    let b = tensor(&[1, 4], vec![0.0; 4]);
    let y = provider.run(&tanh, &[&b]).unwrap();
    assert_close(&y[0], &[0.0; 4]);
}

#[test]
fn unsupported_operator() {
    init_logger();

    let model = relu_softmax_tanh();
    let ids = model.graph.topo_sort_nodes();
    let provider = WebNNExecutionProvider::default();
    let err = provider.compile(&model, &ids).err().unwrap();

    assert!(matches!(err, BuildError::UnsupportedOperator { .. }));
    insta::assert_snapshot!(err.to_string(), @"Node [softmax], type [Softmax] is not supported");
}

#[test]
fn unsupported_data_type() {
    init_logger();

    let mut model = Model::default();
    let a = input(&mut model, "a", &[2, 2]);
    let b = init(&mut model, "b", Tensor::new(vec![2, 2].into(), vec![1i32; 4]));
    let y = output(&mut model, "y", &[2, 2]);
    model
        .graph
        .add_node(Node::new("MatMul").with_ins(vec![a, b]).with_out(y));

    let provider = WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());

    let ids = model.graph.topo_sort_nodes();
    let err = provider.compile(&model, &ids).err().unwrap();
    assert!(matches!(
        err,
        BuildError::UnsupportedDataType {
            elem_ty: TensorElemType::I32,
            ..
        }
    ));
    insta::assert_snapshot!(err.to_string(), @"Tensor 'b' has unsupported type I32");
}

#[test]
fn dynamic_dims() {
    init_logger();

    let mut model = Model::default();
    let x = model
        .graph
        .values
        .new_val_named_and_shaped("x", dynamic_shape(&[None, Some(2)]));
    let y = model
        .graph
        .values
        .new_val_named_and_shaped("y", dynamic_shape(&[None, Some(2)]));
    model.graph.inputs.push(x);
    model.graph.outputs.push(y);
    model.graph.add_node(Node::new("Relu").with_in(x).with_out(y));
    let ids = model.graph.topo_sort_nodes();

    let provider = WebNNExecutionProvider::default();
    assert!(provider.get_capability(&model).is_empty());
    assert!(matches!(
        provider.compile(&model, &ids),
        Err(BuildError::ShapeUnavailable(name)) if name == "x"
    ));

    let provider =
        WebNNExecutionProvider::new(ProviderOptions::new().with_dynamic_dims_as_one(true));
    let compiled = provider.compile(&model, &ids).unwrap();
    assert_eq!(compiled.input_output_info("x").unwrap().shape, vec![1, 2]);
    let x = tensor(&[1, 2], vec![-1.0, 1.0]);
    let outputs = provider.run(&compiled, &[&x]).unwrap();
    assert_close(&outputs[0], &[0.0, 1.0]);
}

#[test]
fn predict_checks_buffers() {
    init_logger();

    let model = relu_model(&[2, 2]);
    let provider = WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);
    let compiled = provider.compile(&model, &groups[0]).unwrap();

    let x = tensor(&[4], vec![0.0; 4]);
    assert!(matches!(
        provider.run(&compiled, &[&x]),
        Err(PredictError::ShapeMismatch { .. })
    ));

    let x = Tensor::new(vec![2, 2].into(), vec![0i64; 4]);
    assert!(matches!(
        provider.run(&compiled, &[&x]),
        Err(PredictError::UnsupportedDataType { .. })
    ));

    assert!(matches!(
        provider.run(&compiled, &[]),
        Err(PredictError::UnknownTensor(name)) if name == "x"
    ));

    let x = tensor(&[2, 2], vec![0.0; 4]);
    let mut unknown = tensor(&[2, 2], vec![0.0; 4]);
    let inputs = [("x", &x)].into_iter().collect::<FxHashMap<_, _>>();
    let mut outputs = [("z", &mut unknown)].into_iter().collect::<FxHashMap<_, _>>();
    assert!(matches!(
        compiled.predict(&inputs, &mut outputs),
        Err(PredictError::UnknownTensor(name)) if name == "z"
    ));
}

#[test]
fn concurrent_predict() {
    init_logger();

    let model = relu_model(&[1, 64]);
    let provider = WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);
    let compiled = provider.compile(&model, &groups[0]).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            let compiled = &compiled;
            s.spawn(move || {
                let noise = Tensor::rand::<f32>(vec![1, 64].into());
                let data = noise.data::<f32>().iter().map(|v| v - 0.5).collect::<Vec<_>>();
                let expected = data.iter().map(|&v| v.max(0.0)).collect::<Vec<_>>();
                let x = tensor(&[1, 64], data);
                for _ in 0..16 {
                    let mut y = Tensor::zeros::<f32>(vec![1, 64].into());
                    let inputs = [("x", &x)].into_iter().collect::<FxHashMap<_, _>>();
                    let mut outputs = [("y", &mut y)].into_iter().collect::<FxHashMap<_, _>>();
                    compiled.predict(&inputs, &mut outputs).unwrap();
                    assert_close(&y, &expected);
                }
            });
        }
    });
}

struct NoDevice;

impl Backend for NoDevice {
    fn create_context(&self, _: &ContextOptions) -> Result<Box<dyn Context>, BackendError> {
        Err(BackendError::ContextCreation("no device".into()))
    }
}

#[test]
fn context_failure_is_reported() {
    init_logger();

    let model = relu_model(&[1, 4]);
    let provider = WebNNExecutionProvider::with_backend(ProviderOptions::default(), NoDevice);
    let groups = provider.get_capability(&model);
    assert_eq!(groups.len(), 1);

    let err = provider.compile(&model, &groups[0]).err().unwrap();
    assert!(matches!(
        err,
        BuildError::Backend(BackendError::ContextCreation(_))
    ));
    insta::assert_snapshot!(err.to_string(), @"Backend: Failed to create context: no device");
}

/// Records the options each context is created with.
#[derive(Default, Clone)]
struct Recording(Arc<Mutex<Vec<ContextOptions>>>);

impl Backend for Recording {
    fn create_context(&self, options: &ContextOptions) -> Result<Box<dyn Context>, BackendError> {
        self.0.lock().unwrap().push(*options);
        ReferenceBackend::new().create_context(options)
    }
}

#[test]
fn preferences_reach_the_context() {
    init_logger();

    let model = relu_model(&[1, 4]);
    let recording = Recording::default();
    let options = ProviderOptions::from_flags(1, 2).unwrap();
    let provider = WebNNExecutionProvider::with_backend(options, recording.clone());
    let groups = provider.get_capability(&model);
    provider.compile(&model, &groups[0]).unwrap();

    assert_eq!(
        recording.0.lock().unwrap().as_slice(),
        &[ContextOptions {
            device_preference: DevicePreference::Gpu,
            power_preference: PowerPreference::LowPower,
        }]
    );
}

#[test]
fn subgraph_inputs_map_to_caller_positions() {
    init_logger();

    // y = Concat(b, a); the partition sees its inputs in first-use order.
    let mut model = Model::default();
    let a = input(&mut model, "a", &[1, 1]);
    let b = input(&mut model, "b", &[1, 1]);
    let y = output(&mut model, "y", &[1, 2]);
    model.graph.add_node(
        Node::new("Concat")
            .with_ins(vec![b, a])
            .with_out(y)
            .with_attr("axis", 1i64),
    );

    let subgraph = SubGraph::whole(&model);
    assert_eq!(subgraph.inputs(), &[b, a]);
    let compiled = ModelBuilder::new(&subgraph, &ReferenceBackend::new(), ProviderOptions::new())
        .and_then(ModelBuilder::compile)
        .unwrap();
    assert_eq!(compiled.inputs(), &["b".to_string(), "a".to_string()]);

    let provider = WebNNExecutionProvider::default();
    let groups = provider.get_capability(&model);
    let compiled = provider.compile(&model, &groups[0]).unwrap();
    let outputs = provider
        .run(&compiled, &[&tensor(&[1, 1], vec![2.0]), &tensor(&[1, 1], vec![1.0])])
        .unwrap();
    assert_close(&outputs[0], &[2.0, 1.0]);
}
