use prost::{DecodeError, Message};
use rustc_hash::FxHashMap;
use std::{borrow::Cow, fs, io, path::Path};
use thiserror::Error;

use crate::{
    attr::{AttributeValue, Attributes},
    dim::Dimension,
    fixed_dim::FixedDimensions,
    model::Model,
    node::Node,
    tensor::{Tensor, TensorElemType, TypedShape},
    value::ValueId,
};

use super::proto::{
    attribute_proto, tensor_proto::DataType, tensor_shape_proto::dimension::Value as DimValue,
    type_proto::Value::TensorType, AttributeProto, ModelProto, TensorProto, ValueInfoProto,
};

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("Model does not contain any graph")]
    NoGraph,

    #[error("Model is invalid: {0}")]
    InvalidModel(#[from] DecodeError),

    #[error("Model contains duplicated opsets")]
    DuplicateOpset,

    #[error("Model contains unknown opset")]
    UnknownOpsetVersion,

    #[error("Something went wrong: {0}")]
    Todo(Cow<'static, str>),
}

pub fn load_onnx(path: impl AsRef<Path>) -> Result<Model, ModelLoadError> {
    let model_proto = load_onnx_model_proto(path)?;
    load_onnx_from_model_proto(model_proto)
}

pub fn load_onnx_from_buffer(buf: &[u8]) -> Result<Model, ModelLoadError> {
    let model = ModelProto::decode(buf)?;
    load_onnx_from_model_proto(model)
}

pub fn load_onnx_model_proto(path: impl AsRef<Path>) -> Result<ModelProto, ModelLoadError> {
    let model = ModelProto::decode(&*fs::read(path)?)?;
    Ok(model)
}

pub fn load_onnx_from_model_proto(model_proto: ModelProto) -> Result<Model, ModelLoadError> {
    let graph = model_proto.graph.ok_or(ModelLoadError::NoGraph)?;
    let mut model = Model::default();
    let mut name_to_val: FxHashMap<String, ValueId> = FxHashMap::default();

    let mut opset_version = None;
    for opset_import in &model_proto.opset_import {
        match opset_import.domain.as_deref().unwrap_or_default() {
            "" | "ai.onnx" if opset_version.is_none() => {
                opset_version = Some(
                    opset_import
                        .version
                        .ok_or(ModelLoadError::UnknownOpsetVersion)?,
                )
            }
            "" | "ai.onnx" => return Err(ModelLoadError::DuplicateOpset),
            domain => log::debug!("Ignoring opset import for domain '{domain}'"),
        }
    }
    model.opset_version = opset_version.ok_or(ModelLoadError::UnknownOpsetVersion)?;

    // Load initializers.
    for init in graph.initializer.iter() {
        let name = init.name.clone().unwrap_or_default();
        let tensor = get_tensor(init)?;
        let val = *name_to_val
            .entry(name.clone())
            .or_insert_with(|| model.graph.values.new_val_named(name));
        model.graph.inits.insert(val, tensor);
    }

    // Load inputs, outputs and intermediate value annotations.
    for (i, infos) in [&graph.input, &graph.output, &graph.value_info]
        .into_iter()
        .enumerate()
    {
        for info in infos {
            let name = info.name.clone().unwrap_or_default();
            let shape = get_typed_shape(info)?;
            let val = *name_to_val
                .entry(name.clone())
                .or_insert_with(|| model.graph.values.new_val_named(name));
            if model.graph.values[val].shape.is_none() {
                model.graph.values[val].shape = shape;
            }

            match i {
                0 => model.graph.inputs.push(val),
                1 => model.graph.outputs.push(val),
                _ => {}
            }
        }
    }

    // Remove initializers from inputs if needed.
    model
        .graph
        .inputs
        .retain(|x| !model.graph.inits.contains_key(x));

    // Load nodes.
    for node in graph.node.iter() {
        let inputs = node
            .input
            .iter()
            .map(|input| {
                if input.is_empty() {
                    None
                } else {
                    Some(
                        *name_to_val
                            .entry(input.clone())
                            .or_insert_with(|| model.graph.values.new_val_named(input)),
                    )
                }
            })
            .collect();
        let outputs = node
            .output
            .iter()
            .map(|output| {
                *name_to_val
                    .entry(output.clone())
                    .or_insert_with(|| model.graph.values.new_val_named(output))
            })
            .collect();

        let mut attrs = Attributes::default();
        for attr in node.attribute.iter() {
            if let Some(value) = get_attribute_value(attr)? {
                attrs.insert(attr.name.clone().unwrap_or_default(), value);
            }
        }

        let op_type = node.op_type.clone().unwrap_or_default();
        let mut n = Node::new(op_type).with_name(node.name.clone());
        n.inputs = inputs;
        n.outputs = outputs;
        n.attrs = attrs;
        model.graph.add_node(n);
    }

    log::debug!(
        "Loaded model: opset={}, nodes={}, values={}, initializers={}",
        model.opset_version,
        model.graph.nodes.len(),
        model.graph.values.len(),
        model.graph.inits.len()
    );

    Ok(model)
}

fn get_typed_shape(info: &ValueInfoProto) -> Result<Option<TypedShape>, ModelLoadError> {
    let Some(TensorType(tensor)) = info.r#type.as_ref().and_then(|t| t.value.as_ref()) else {
        return Ok(None);
    };
    let Some(shape) = tensor.shape.as_ref() else {
        return Ok(None);
    };
    let elem_ty = match elem_type_of(tensor.elem_type.unwrap_or_default()) {
        Ok(ty) => ty,
        Err(e) => {
            log::debug!(
                "Value '{}' has no usable type: {e}",
                info.name.as_deref().unwrap_or_default()
            );
            return Ok(None);
        }
    };

    let dims: Vec<Dimension> = shape
        .dim
        .iter()
        .map(|d| match d.value.as_ref() {
            Some(DimValue::DimValue(i)) if *i >= 0 => Dimension::Fixed(*i as usize),
            Some(DimValue::DimParam(s)) => Dimension::Dynamic(s.clone()),
            _ => Dimension::Dynamic(String::new()),
        })
        .collect();

    Ok(Some(TypedShape::new(dims.into(), elem_ty)))
}

fn get_attribute_value(attr: &AttributeProto) -> Result<Option<AttributeValue>, ModelLoadError> {
    let as_string = |s: &[u8]| String::from_utf8_lossy(s).into_owned();

    let value = match attr.r#type {
        Some(attribute_proto::FLOAT) => attr.f.map(AttributeValue::Float),
        Some(attribute_proto::INT) => attr.i.map(AttributeValue::Int),
        Some(attribute_proto::STRING) => attr.s.as_deref().map(|s| as_string(s).into()),
        Some(attribute_proto::TENSOR) => match attr.t.as_ref() {
            Some(t) => Some(AttributeValue::Tensor(get_tensor(t)?)),
            None => None,
        },
        Some(attribute_proto::FLOATS) => Some(AttributeValue::Floats(attr.floats.clone())),
        Some(attribute_proto::INTS) => Some(AttributeValue::Ints(attr.ints.clone())),
        Some(attribute_proto::STRINGS) => Some(AttributeValue::Strings(
            attr.strings.iter().map(|s| as_string(s)).collect(),
        )),
        // Untyped attributes: infer the kind from the populated field.
        _ => {
            if let Some(f) = attr.f {
                Some(AttributeValue::Float(f))
            } else if let Some(i) = attr.i {
                Some(AttributeValue::Int(i))
            } else if let Some(s) = attr.s.as_deref() {
                Some(as_string(s).into())
            } else if let Some(t) = attr.t.as_ref() {
                Some(AttributeValue::Tensor(get_tensor(t)?))
            } else if !attr.floats.is_empty() {
                Some(AttributeValue::Floats(attr.floats.clone()))
            } else if !attr.ints.is_empty() {
                Some(AttributeValue::Ints(attr.ints.clone()))
            } else if !attr.strings.is_empty() {
                Some(AttributeValue::Strings(
                    attr.strings.iter().map(|s| as_string(s)).collect(),
                ))
            } else {
                None
            }
        }
    };

    if value.is_none() {
        log::debug!(
            "Skipping attribute '{}' of unsupported kind",
            attr.name.as_deref().unwrap_or_default()
        );
    }

    Ok(value)
}

fn get_tensor(tensor: &TensorProto) -> Result<Tensor, ModelLoadError> {
    let dims = FixedDimensions::from_i64(&tensor.dims);
    let raw = tensor.raw_data.as_deref().unwrap_or_default();
    let elem_ty = elem_type_of(tensor.data_type.unwrap_or_default())?;

    let t = match elem_ty {
        _ if !raw.is_empty() => Tensor::new_from_raw(dims, elem_ty, raw),
        TensorElemType::F32 => Tensor::new(dims, tensor.float_data.clone()),
        TensorElemType::I32 => Tensor::new(dims, tensor.int32_data.clone()),
        TensorElemType::I64 => Tensor::new(dims, tensor.int64_data.clone()),
        TensorElemType::Bool => Tensor::new(
            dims,
            tensor.int32_data.iter().map(|&x| x != 0).collect::<Vec<_>>(),
        ),
    };

    if !t.verify() {
        return Err(ModelLoadError::Todo(
            format!(
                "Tensor '{}' has {} elements but its shape is {:?}",
                tensor.name.as_deref().unwrap_or_default(),
                t.len(),
                t.dims()
            )
            .into(),
        ));
    }

    Ok(t)
}

fn elem_type_of(data_type: i32) -> Result<TensorElemType, ModelLoadError> {
    match DataType::from_i32(data_type) {
        Some(ty) => ty.try_into(),
        None => Err(ModelLoadError::Todo(
            format!("Unknown tensor data type: {data_type}").into(),
        )),
    }
}

impl TryFrom<DataType> for TensorElemType {
    type Error = ModelLoadError;

    fn try_from(ty: DataType) -> Result<Self, Self::Error> {
        match ty {
            DataType::Bool => Ok(TensorElemType::Bool),
            DataType::Int32 => Ok(TensorElemType::I32),
            DataType::Int64 => Ok(TensorElemType::I64),
            DataType::Float => Ok(TensorElemType::F32),
            ty => Err(ModelLoadError::Todo(
                format!("Unsupported tensor element type: {ty:?}").into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::proto::{
        tensor_shape_proto, type_proto, GraphProto, NodeProto, OperatorSetIdProto,
        TensorShapeProto, TypeProto,
    };

    fn value_info(name: &str, dims: &[Option<i64>]) -> ValueInfoProto {
        ValueInfoProto {
            name: Some(name.into()),
            r#type: Some(TypeProto {
                value: Some(TensorType(type_proto::Tensor {
                    elem_type: Some(DataType::Float as i32),
                    shape: Some(TensorShapeProto {
                        dim: dims
                            .iter()
                            .map(|d| tensor_shape_proto::Dimension {
                                value: Some(match d {
                                    Some(d) => DimValue::DimValue(*d),
                                    None => DimValue::DimParam("batch".into()),
                                }),
                            })
                            .collect(),
                    }),
                })),
            }),
        }
    }

    fn conv_relu_model() -> ModelProto {
        let weight = TensorProto {
            dims: vec![1, 1, 1, 1],
            data_type: Some(DataType::Float as i32),
            name: Some("w".into()),
            raw_data: Some(2.0f32.to_le_bytes().to_vec()),
            ..Default::default()
        };
        ModelProto {
            ir_version: Some(8),
            opset_import: vec![OperatorSetIdProto {
                domain: Some("".into()),
                version: Some(13),
            }],
            producer_name: None,
            graph: Some(GraphProto {
                node: vec![
                    NodeProto {
                        input: vec!["x".into(), "w".into(), "".into()],
                        output: vec!["y".into()],
                        name: Some("conv".into()),
                        op_type: Some("Conv".into()),
                        attribute: vec![AttributeProto {
                            name: Some("strides".into()),
                            ints: vec![1, 1],
                            r#type: Some(attribute_proto::INTS),
                            ..Default::default()
                        }],
                        domain: None,
                    },
                    NodeProto {
                        input: vec!["y".into()],
                        output: vec!["z".into()],
                        name: None,
                        op_type: Some("LeakyRelu".into()),
                        attribute: vec![AttributeProto {
                            name: Some("alpha".into()),
                            f: Some(0.1),
                            ..Default::default()
                        }],
                        domain: None,
                    },
                ],
                name: Some("g".into()),
                initializer: vec![weight],
                input: vec![
                    value_info("x", &[None, Some(1), Some(4), Some(4)]),
                    value_info("w", &[Some(1), Some(1), Some(1), Some(1)]),
                ],
                output: vec![value_info("z", &[None, Some(1), Some(4), Some(4)])],
                value_info: vec![],
            }),
        }
    }

    #[test]
    fn load_from_buffer() {
        let buf = conv_relu_model().encode_to_vec();
        let model = load_onnx_from_buffer(&buf).unwrap();
        let graph = &model.graph;

        assert_eq!(model.opset_version, 13);
        // Initializers listed as graph inputs are not graph inputs.
        assert_eq!(graph.inputs.len(), 1);
        assert_eq!(graph.outputs.len(), 1);
        assert_eq!(graph.inits.len(), 1);
        assert_eq!(graph.nodes.len(), 2);

        let x = graph.inputs[0];
        let shape = graph.values[x].shape.as_ref().unwrap();
        assert_eq!(format!("{:?}", shape.dims), "[batch, 1, 4, 4]");
        assert!(shape.elem_ty.is_f32());

        let order = graph.topo_sort_nodes();
        let conv = &graph.nodes[order[0]];
        assert_eq!(conv.op_type, "Conv");
        assert_eq!(conv.inputs.len(), 3);
        assert_eq!(conv.input(2), None);
        assert_eq!(conv.attrs.ints("strides"), Some(&[1i64, 1][..]));

        let w = graph.inits[&conv.input(1).unwrap()].data::<f32>();
        assert_eq!(w, &[2.0]);

        let relu = &graph.nodes[order[1]];
        assert_eq!(relu.attrs.float("alpha"), Some(0.1));
    }

    #[test]
    fn reject_missing_graph() {
        let buf = ModelProto {
            graph: None,
            ..conv_relu_model()
        }
        .encode_to_vec();
        assert!(matches!(
            load_onnx_from_buffer(&buf),
            Err(ModelLoadError::NoGraph)
        ));
    }

    #[test]
    fn reject_duplicate_opset() {
        let mut model = conv_relu_model();
        model.opset_import.push(OperatorSetIdProto {
            domain: Some("ai.onnx".into()),
            version: Some(13),
        });
        assert!(matches!(
            load_onnx_from_model_proto(model),
            Err(ModelLoadError::DuplicateOpset)
        ));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            load_onnx_from_buffer(&[0xff, 0xff, 0xff]),
            Err(ModelLoadError::InvalidModel(_))
        ));
    }
}
