//! Read-only queries over the host graph used to decide which nodes can be
//! handed to the backend.

use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
    tensor::TensorElemType,
    value::ValueId,
};

use crate::builders::get_op_builder;

/// Returns the static shape of `value`. Initializers report their tensor
/// shape. `None` if the shape is not annotated or has a symbolic dimension.
pub fn get_shape(model: &Model, value: ValueId) -> Option<Vec<usize>> {
    if let Some(tensor) = model.graph.inits.get(&value) {
        return Some(tensor.dims().to_vec());
    }

    let val = &model.graph.values[value];
    let Some(shape) = val.shape.as_ref() else {
        log::debug!("'{}' has no shape", val.display_name(value));
        return None;
    };
    let Some(dims) = shape.dims.as_fixed_dims() else {
        log::debug!(
            "'{}' has dynamic shape {:?}",
            val.display_name(value),
            shape.dims
        );
        return None;
    };
    Some(dims.to_vec())
}

pub fn get_elem_type(model: &Model, value: ValueId) -> Option<TensorElemType> {
    if let Some(tensor) = model.graph.inits.get(&value) {
        return Some(tensor.elem_ty());
    }
    model.graph.values[value]
        .shape
        .as_ref()
        .map(|shape| shape.elem_ty)
}

pub fn is_initializer(model: &Model, value: ValueId) -> bool {
    model.graph.inits.contains_key(&value)
}

/// Whether `value` is fed by the caller rather than computed or stored.
pub fn is_graph_input(model: &Model, value: ValueId) -> bool {
    !is_initializer(model, value) && model.graph.inputs.contains(&value)
}

/// An input is supported if its shape is fully static.
pub fn is_input_supported(model: &Model, value: ValueId, parent: &str) -> bool {
    if get_shape(model, value).is_none() {
        log::debug!(
            "Input '{}' of {parent} has no static shape",
            model.graph.values[value].display_name(value)
        );
        return false;
    }
    true
}

pub fn is_node_supported(model: &Model, node: &Node) -> bool {
    let Some(op_builder) = get_op_builder(&node.op_type) else {
        log::debug!(
            "Node [{}] type [{}] has no builder",
            node.name_or_op(),
            node.op_type
        );
        return false;
    };
    op_builder.is_op_supported(model, node)
}

/// Groups runs of consecutive supported nodes, in topological order. Every
/// node belongs to at most one group.
pub fn get_supported_nodes(model: &Model) -> Vec<Vec<NodeId>> {
    let mut groups = vec![];
    let mut group = vec![];

    for node_id in model.topo_sort_nodes() {
        let node = &model.graph.nodes[node_id];
        let supported = is_node_supported(model, node);
        log::debug!(
            "Node [{}] type [{}] supported: {supported}",
            node.name_or_op(),
            node.op_type
        );
        if supported {
            group.push(node_id);
        } else if !group.is_empty() {
            groups.push(std::mem::take(&mut group));
        }
    }

    if !group.is_empty() {
        groups.push(group);
    }

    groups
}
