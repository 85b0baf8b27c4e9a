use rustc_hash::FxHashSet;
use webnn_ep_core::{
    graph::Graph,
    model::Model,
    node::{Node, NodeId},
    value::ValueId,
};

/// A view of one partition of a model: its nodes in topological order and
/// the values crossing its boundary.
pub struct SubGraph<'a> {
    model: &'a Model,
    nodes: Vec<NodeId>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    initializers: Vec<ValueId>,
}

impl<'a> SubGraph<'a> {
    pub fn new(model: &'a Model, nodes: &[NodeId]) -> Self {
        let graph = &model.graph;
        let members = nodes.iter().copied().collect::<FxHashSet<_>>();
        let nodes = model
            .topo_sort_nodes()
            .into_iter()
            .filter(|id| members.contains(id))
            .collect::<Vec<_>>();

        let produced = nodes
            .iter()
            .flat_map(|&id| graph.nodes[id].outputs.iter().copied())
            .collect::<FxHashSet<_>>();

        let mut inputs = vec![];
        let mut initializers = vec![];
        let mut seen = FxHashSet::default();
        for &id in &nodes {
            for input in graph.nodes[id].present_inputs() {
                if produced.contains(&input) || !seen.insert(input) {
                    continue;
                }
                if graph.inits.contains_key(&input) {
                    initializers.push(input);
                } else {
                    inputs.push(input);
                }
            }
        }

        let value_users = graph.get_value_users();
        let mut outputs = vec![];
        for &id in &nodes {
            for &output in &graph.nodes[id].outputs {
                let used_outside = value_users
                    .get(&output)
                    .map_or(false, |users| users.iter().any(|u| !members.contains(u)));
                if graph.outputs.contains(&output) || used_outside {
                    outputs.push(output);
                }
            }
        }

        Self {
            model,
            nodes,
            inputs,
            outputs,
            initializers,
        }
    }

    /// The whole model as a single partition.
    pub fn whole(model: &'a Model) -> Self {
        let nodes = model.graph.nodes.iter().map(|(id, _)| id).collect::<Vec<_>>();
        Self::new(model, &nodes)
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn graph(&self) -> &'a Graph {
        &self.model.graph
    }

    pub fn node(&self, id: NodeId) -> &'a Node {
        &self.model.graph.nodes[id]
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Non-constant values consumed but not produced, in order of first use.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Produced values that are model outputs or consumed outside.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Constants consumed by the partition.
    pub fn initializers(&self) -> &[ValueId] {
        &self.initializers
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn value_name(&self, id: ValueId) -> String {
        self.model.graph.values[id].display_name(id)
    }
}
