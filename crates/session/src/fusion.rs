//! Activation fusion. Planned once per compilation, before any node is
//! lowered, and read-only afterwards.

use rustc_hash::{FxHashMap, FxHashSet};
use webnn_ep_backend::{Activation, FusionOperator, GraphBuilder};
use webnn_ep_core::{
    node::{Node, NodeId},
    value::ValueId,
};

use crate::{builders::get_op_builder, subgraph::SubGraph, BuildError};

/// Activations that have a fusion operator counterpart.
pub const FUSIBLE_ACTIVATIONS: [&str; 4] = ["Relu", "LeakyRelu", "Sigmoid", "Tanh"];

/// Maps an activation node to the backend activation it stands for.
/// `LeakyRelu`'s `alpha` defaults to 0.
pub fn activation_of(node: &Node) -> Option<Activation> {
    match node.op_type.as_str() {
        "Relu" => Some(Activation::Relu),
        "LeakyRelu" => Some(Activation::LeakyRelu {
            alpha: node.attrs.float("alpha").unwrap_or(0.0),
        }),
        "Sigmoid" => Some(Activation::Sigmoid),
        "Tanh" => Some(Activation::Tanh),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct FusionPlan {
    /// Fusion operator of every activation node in the subgraph.
    activations: FxHashMap<NodeId, FusionOperator>,
    /// Producer node to the activation it absorbs.
    producers: FxHashMap<NodeId, FusionOperator>,
    /// Producer outputs whose activation is applied by the producer.
    fused_values: FxHashSet<ValueId>,
}

impl FusionPlan {
    pub fn new(subgraph: &SubGraph, builder: &mut dyn GraphBuilder) -> Result<Self, BuildError> {
        let mut plan = Self::default();
        let graph = subgraph.graph();
        let value_users = graph.get_value_users();
        let value_parents = graph.get_value_parents();

        for &node_id in subgraph.nodes() {
            let node = subgraph.node(node_id);
            let Some(activation) = activation_of(node) else {
                continue;
            };
            let handle = builder.activation(activation)?;
            plan.activations.insert(node_id, handle);

            let Some(input) = node.input(0) else {
                continue;
            };
            let Some(&producer_id) = value_parents.get(&input) else {
                continue;
            };
            if !subgraph.contains(producer_id) || plan.producers.contains_key(&producer_id) {
                continue;
            }
            let producer = subgraph.node(producer_id);
            if !get_op_builder(&producer.op_type).map_or(false, |b| b.supports_fused_activation())
            {
                continue;
            }
            if producer.outputs.len() != 1 {
                continue;
            }
            // The activation must be the only consumer, otherwise the
            // un-activated value is still needed.
            let sole_user = value_users
                .get(&input)
                .map_or(false, |users| users.len() == 1 && users.contains(&node_id));
            if !sole_user || graph.outputs.contains(&input) || subgraph.outputs().contains(&input)
            {
                continue;
            }

            log::trace!(
                "Node [{}] type [{}] fuses [{}] on '{}'",
                producer.name_or_op(),
                producer.op_type,
                node.op_type,
                subgraph.value_name(input)
            );
            plan.producers.insert(producer_id, handle);
            plan.fused_values.insert(input);
        }

        Ok(plan)
    }

    /// The activation `producer` must apply to its output, if any.
    pub fn fused_activation(&self, producer: NodeId) -> Option<FusionOperator> {
        self.producers.get(&producer).copied()
    }

    /// Whether the activation consuming `value` is applied by its producer.
    pub fn is_fused(&self, value: ValueId) -> bool {
        self.fused_values.contains(&value)
    }

    #[cfg(test)]
    pub fn activation(&self, node: NodeId) -> Option<FusionOperator> {
        self.activations.get(&node).copied()
    }

    pub fn num_fused(&self) -> usize {
        self.producers.len()
    }
}
