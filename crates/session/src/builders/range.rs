use webnn_ep_backend::{FillSequenceOptions, OperandType};
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
    tensor::{Tensor, TensorElemType},
};

use super::{
    has_elem_type,
    utils::{input_value, to_u32},
    OpBuilder,
};
use crate::{
    helper::{get_elem_type, is_input_supported},
    model_builder::{ModelBuilder, SkipSets},
    BuildError,
};

/// Range over constant `start`, `limit` and `delta`, computed in float32 and
/// cast back to the input type.
pub struct RangeOpBuilder;

const SUPPORTED_TYPES: [TensorElemType; 3] =
    [TensorElemType::F32, TensorElemType::I32, TensorElemType::I64];

/// Number of elements `Range` produces. Never negative.
pub fn range_len(start: f32, limit: f32, delta: f32) -> usize {
    let len = ((limit - start) / delta).ceil();
    if len.is_finite() && len > 0.0 {
        len as usize
    } else {
        0
    }
}

/// First element of a scalar constant, widened to `f32`.
fn scalar_of(tensor: &Tensor) -> Option<f32> {
    match tensor.elem_ty() {
        TensorElemType::F32 => tensor.data::<f32>().first().copied(),
        TensorElemType::I32 => tensor.data::<i32>().first().map(|&v| v as f32),
        TensorElemType::I64 => tensor.data::<i64>().first().map(|&v| v as f32),
        TensorElemType::Bool => None,
    }
}

fn operand_type(ty: TensorElemType) -> Option<OperandType> {
    match ty {
        TensorElemType::F32 => Some(OperandType::Float32),
        TensorElemType::I32 => Some(OperandType::Int32),
        TensorElemType::I64 => Some(OperandType::Int64),
        TensorElemType::Bool => None,
    }
}

impl OpBuilder for RangeOpBuilder {
    fn add_initializers_to_skip(&self, node: &Node, skip: &mut SkipSets) {
        for input in node.present_inputs() {
            skip.skip_initializer(input);
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        _node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let mut scalars = [0f32; 3];
        let mut elem_ty = TensorElemType::F32;
        for (i, scalar) in scalars.iter_mut().enumerate() {
            let value = input_value(node, i)?;
            let tensor = model_builder.initializer(value).ok_or_else(|| {
                BuildError::Message(
                    format!("Range input '{}' must be constant", model_builder.value_name(value))
                        .into(),
                )
            })?;
            *scalar = scalar_of(tensor).ok_or_else(|| BuildError::UnsupportedDataType {
                name: model_builder.value_name(value),
                elem_ty: tensor.elem_ty(),
            })?;
            if i == 0 {
                elem_ty = tensor.elem_ty();
            }
        }
        let [start, limit, delta] = scalars;
        let Some(ty) = operand_type(elem_ty) else {
            return Err(BuildError::UnsupportedDataType {
                name: node.name_or_op().to_string(),
                elem_ty,
            });
        };

        let len = to_u32(range_len(start, limit, delta) as i64, "Range length")?;
        let builder = model_builder.builder();
        let output = builder.fill_sequence(
            OperandType::Float32,
            &[len],
            &FillSequenceOptions { start, delta },
        )?;
        let output = builder.cast(output, ty)?;
        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn has_supported_inputs(&self, model: &Model, node: &Node) -> bool {
        node.present_inputs().all(|input| {
            is_input_supported(model, input, &node.op_type)
                && has_elem_type(model, node, input, &SUPPORTED_TYPES)
        })
    }

    fn is_op_supported_impl(&self, model: &Model, node: &Node) -> bool {
        let name = node.name_or_op();
        if node.inputs.len() != 3 || node.present_inputs().count() != 3 {
            log::debug!("Range [{name}] need start limit and delta.");
            return false;
        }
        if !node
            .present_inputs()
            .all(|input| model.graph.inits.contains_key(&input))
        {
            log::debug!("Range [{name}] need inputs as initializer.");
            return false;
        }
        // The output takes the type of `start`. Boundary buffers are float32
        // and no translator consumes integral tensors.
        let output_ty = node.input(0).and_then(|start| get_elem_type(model, start));
        if output_ty != Some(TensorElemType::F32) {
            log::debug!("Range [{name}] output type {output_ty:?} is not supported.");
            return false;
        }
        true
    }
}

#[test]
fn lengths() {
    assert_eq!(range_len(0.0, 5.0, 1.0), 5);
    assert_eq!(range_len(5.0, 0.0, 1.0), 0);
    assert_eq!(range_len(0.0, 5.0, 2.0), 3);
    assert_eq!(range_len(5.0, 0.0, -2.0), 3);
    assert_eq!(range_len(0.0, 1.0, 0.0), 0);
}
