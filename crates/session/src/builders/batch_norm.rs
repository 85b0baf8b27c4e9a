use webnn_ep_backend::BatchNormalizationOptions;
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
};

use super::{utils::input_value, OpBuilder};
use crate::{helper::get_shape, model_builder::ModelBuilder, BuildError};

/// Inference-mode BatchNormalization over NCHW inputs.
pub struct BatchNormalizationOpBuilder;

impl OpBuilder for BatchNormalizationOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let input = model_builder.operand(input_value(node, 0)?)?;
        let scale = model_builder.operand(input_value(node, 1)?)?;
        let bias = model_builder.operand(input_value(node, 2)?)?;
        let mean = model_builder.operand(input_value(node, 3)?)?;
        let variance = model_builder.operand(input_value(node, 4)?)?;

        let options = BatchNormalizationOptions {
            scale: Some(scale),
            bias: Some(bias),
            axis: 1,
            epsilon: node.attrs.float("epsilon").unwrap_or(1e-5),
            activation: model_builder.fusion().fused_activation(node_id),
        };
        let output = model_builder
            .builder()
            .batch_normalization(input, mean, variance, &options)?;
        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn is_op_supported_impl(&self, model: &Model, node: &Node) -> bool {
        if node.outputs.len() != 1 {
            log::debug!(
                "Your onnx model may be in training mode, please export it in test mode."
            );
            return false;
        }

        let Some(input_shape) = node.input(0).and_then(|x| get_shape(model, x)) else {
            return false;
        };
        if input_shape.len() != 4 {
            log::debug!(
                "BN only support 4d shape for now, input is {}d shape",
                input_shape.len()
            );
            return false;
        }

        if node.attrs.int("spatial").unwrap_or(1) != 1 {
            log::debug!("Non-spatial BN is not supported");
            return false;
        }

        for (i, what) in [(1, "Scale"), (2, "B"), (3, "Mean"), (4, "Var")] {
            let is_init = node
                .input(i)
                .map_or(false, |v| model.graph.inits.contains_key(&v));
            if !is_init {
                log::debug!("{what} of BN must be a constant initializer");
                return false;
            }
        }

        true
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        7
    }

    fn supports_fused_activation(&self) -> bool {
        true
    }
}
