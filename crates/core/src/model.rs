use rustc_hash::{FxHashMap, FxHashSet};

use crate::{graph::Graph, node::NodeId, value::ValueId};

pub const DEFAULT_OPSET_VERSION: i64 = 19;

/// A host graph together with the default-domain opset it was authored for.
#[derive(Clone)]
pub struct Model {
    pub graph: Graph,
    pub opset_version: i64,
}

impl Model {
    pub fn new(graph: Graph, opset_version: i64) -> Self {
        Self {
            graph,
            opset_version,
        }
    }

    pub fn topo_sort_nodes(&self) -> Vec<NodeId> {
        self.graph.topo_sort_nodes()
    }

    pub fn get_value_users(&self) -> FxHashMap<ValueId, FxHashSet<NodeId>> {
        self.graph.get_value_users()
    }

    pub fn get_value_parents(&self) -> FxHashMap<ValueId, NodeId> {
        self.graph.get_value_parents()
    }
}

impl Default for Model {
    fn default() -> Self {
        Self {
            graph: Graph::default(),
            opset_version: DEFAULT_OPSET_VERSION,
        }
    }
}
