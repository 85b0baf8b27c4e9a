#![allow(dead_code)]

use webnn_ep_core::{
    dim::{Dimension, Dimensions},
    model::Model,
    tensor::{Tensor, TensorElemType, TypedFixedShape, TypedShape},
    value::ValueId,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn f32_shape(dims: &[usize]) -> TypedFixedShape {
    TypedFixedShape::new(dims.to_vec().into(), TensorElemType::F32)
}

pub fn dynamic_shape(dims: &[Option<usize>]) -> TypedShape {
    let dims = dims
        .iter()
        .map(|d| match d {
            Some(d) => Dimension::Fixed(*d),
            None => Dimension::Dynamic("N".into()),
        })
        .collect::<Vec<_>>();
    TypedShape::new(Dimensions::from(dims), TensorElemType::F32)
}

/// Adds a graph input.
pub fn input(model: &mut Model, name: &str, dims: &[usize]) -> ValueId {
    let v = model
        .graph
        .values
        .new_val_named_and_shaped(name, f32_shape(dims));
    model.graph.inputs.push(v);
    v
}

/// Adds an intermediate or output value.
pub fn value(model: &mut Model, name: &str, dims: &[usize]) -> ValueId {
    model
        .graph
        .values
        .new_val_named_and_shaped(name, f32_shape(dims))
}

pub fn output(model: &mut Model, name: &str, dims: &[usize]) -> ValueId {
    let v = value(model, name, dims);
    model.graph.outputs.push(v);
    v
}

pub fn init(model: &mut Model, name: &str, tensor: Tensor) -> ValueId {
    let v = model
        .graph
        .values
        .new_val_named_and_shaped(name, tensor.typed_shape());
    model.graph.inits.insert(v, tensor);
    v
}

pub fn tensor(dims: &[usize], data: Vec<f32>) -> Tensor {
    Tensor::new(dims.to_vec().into(), data)
}

pub fn assert_close(actual: &Tensor, expected: &[f32]) {
    assert!(
        actual.allclose(expected),
        "actual: {:?}, expected: {expected:?}",
        actual.data::<f32>()
    );
}

/// Claims the whole model as one partition, compiles it and runs it once.
pub fn run_single_partition(model: &Model, inputs: &[&Tensor]) -> Vec<Tensor> {
    let provider = webnn_ep::WebNNExecutionProvider::default();
    let groups = provider.get_capability(model);
    assert_eq!(groups.len(), 1, "expected one partition: {groups:?}");
    assert_eq!(groups[0].len(), model.graph.nodes.len());
    let compiled = provider.compile(model, &groups[0]).unwrap();
    provider.run(&compiled, inputs).unwrap()
}
