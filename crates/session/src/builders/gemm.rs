use webnn_ep_backend::GemmOptions;
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
};

use super::{utils::input_value, OpBuilder};
use crate::{helper::get_shape, model_builder::ModelBuilder, BuildError};

/// Gemm and MatMul.
pub struct GemmOpBuilder;

impl OpBuilder for GemmOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        _node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let a = model_builder.operand(input_value(node, 0)?)?;
        let b = model_builder.operand(input_value(node, 1)?)?;

        let output = if node.op_type == "MatMul" {
            model_builder.builder().matmul(a, b)?
        } else {
            let c = node
                .input(2)
                .map(|c| model_builder.operand(c))
                .transpose()?;
            let options = GemmOptions {
                c,
                alpha: node.attrs.float("alpha").unwrap_or(1.0),
                beta: node.attrs.float("beta").unwrap_or(1.0),
                a_transpose: node.attrs.int("transA").unwrap_or(0) == 1,
                b_transpose: node.attrs.int("transB").unwrap_or(0) == 1,
            };
            model_builder.builder().gemm(a, b, &options)?
        };

        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn is_op_supported_impl(&self, model: &Model, node: &Node) -> bool {
        if node.op_type != "Gemm" {
            return true;
        }

        let mut shapes = vec![];
        for (i, what) in [(0, "A"), (1, "B")] {
            let Some(shape) = node.input(i).and_then(|v| get_shape(model, v)) else {
                return false;
            };
            if shape.len() != 2 {
                log::debug!("{what} must be 2D");
                return false;
            }
            if shape.iter().product::<usize>() == 0 {
                log::debug!("{what} must be non-empty");
                return false;
            }
            shapes.push(shape);
        }
        let b_shape = &shapes[1];

        if let Some(c) = node.input(2) {
            let Some(c_shape) = get_shape(model, c) else {
                return false;
            };
            let Some(&c_size) = c_shape.last() else {
                log::debug!("C of Gemm is a scalar");
                return true;
            };
            let trans_b = node.attrs.int("transB").unwrap_or(0) == 1;
            let expected = if trans_b { b_shape[0] } else { b_shape[1] };
            if c_size != expected {
                log::debug!(
                    "C of Gemm must be a vector of b_shape[{}] b_shape: {b_shape:?} \
                     c_size: {c_size}",
                    if trans_b { 0 } else { 1 }
                );
                return false;
            }
        }

        true
    }
}
