use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
};

use super::{
    utils::{handle_negative_axis, input_value, to_u32},
    OpBuilder,
};
use crate::{model_builder::ModelBuilder, BuildError};

pub struct ConcatOpBuilder;

impl OpBuilder for ConcatOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        _node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let rank = model_builder.shape(input_value(node, 0)?)?.len();
        let axis = handle_negative_axis(node.attrs.int("axis").unwrap_or(1), rank)?;

        let inputs = node
            .present_inputs()
            .map(|input| model_builder.operand(input))
            .collect::<Result<Vec<_>, _>>()?;
        let output = model_builder
            .builder()
            .concat(&inputs, to_u32(axis as i64, "axis")?)?;
        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn is_op_supported_impl(&self, _model: &Model, node: &Node) -> bool {
        let num_inputs = node.present_inputs().count();
        if num_inputs < 2 {
            log::debug!("Concat only support 2+ inputs, actual number of inputs: {num_inputs}");
            return false;
        }
        true
    }
}
