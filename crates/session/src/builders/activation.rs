use webnn_ep_backend::Activation;
use webnn_ep_core::node::{Node, NodeId};

use super::{utils::input_value, OpBuilder};
use crate::{fusion::activation_of, model_builder::ModelBuilder, BuildError};

/// Relu, LeakyRelu, Sigmoid and Tanh.
pub struct ActivationOpBuilder;

impl OpBuilder for ActivationOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        _node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let x = input_value(node, 0)?;
        let input = model_builder.operand(x)?;

        // The producer already applies this activation.
        if model_builder.fusion().is_fused(x) {
            log::trace!("{} [{}] fused", node.op_type, node.name_or_op());
            model_builder.add_output_operand(node, 0, input);
            return Ok(());
        }

        let builder = model_builder.builder();
        let output = match activation_of(node) {
            Some(Activation::Relu) => builder.relu(input)?,
            Some(Activation::LeakyRelu { alpha }) => builder.leaky_relu(input, alpha)?,
            Some(Activation::Sigmoid) => builder.sigmoid(input)?,
            Some(Activation::Tanh) => builder.tanh(input)?,
            None => {
                return Err(BuildError::UnsupportedOperator {
                    node: node.name_or_op().to_string(),
                    op_type: node.op_type.clone(),
                })
            }
        };
        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        6
    }
}
