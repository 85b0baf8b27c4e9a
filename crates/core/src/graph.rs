use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    node::{Node, NodeArena, NodeId},
    tensor::Tensor,
    value::{ValueArena, ValueId},
};

#[derive(Default, Clone)]
pub struct Graph {
    pub nodes: NodeArena,
    pub values: ValueArena,
    pub inits: FxHashMap<ValueId, Tensor>,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
}

impl Graph {
    pub fn add_node(&mut self, node: Node) -> NodeId {
        self.nodes.alloc(node)
    }

    pub fn get_value_users(&self) -> FxHashMap<ValueId, FxHashSet<NodeId>> {
        let mut value_users: FxHashMap<ValueId, FxHashSet<NodeId>> = FxHashMap::default();

        for (node_id, node) in self.nodes.iter() {
            for input in node.present_inputs() {
                value_users.entry(input).or_default().insert(node_id);
            }
        }

        value_users
    }

    pub fn get_value_parents(&self) -> FxHashMap<ValueId, NodeId> {
        let mut value_parents = FxHashMap::default();

        for (node_id, node) in self.nodes.iter() {
            for &output in node.outputs.iter() {
                value_parents.insert(output, node_id);
            }
        }

        value_parents
    }

    /// Orders nodes so that every node comes after the producers of its
    /// inputs. Ties are broken by insertion order, so the result is stable.
    pub fn topo_sort_nodes(&self) -> Vec<NodeId> {
        let value_users = self.get_value_users();
        let value_parents = self.get_value_parents();

        let mut num_node_inputs = FxHashMap::default();
        let mut ready = std::collections::BTreeSet::new();

        for (id, node) in self.nodes.iter() {
            let deps = node
                .present_inputs()
                .filter(|input| value_parents.contains_key(input))
                .collect::<FxHashSet<_>>();
            num_node_inputs.insert(id, deps.len());
            if deps.is_empty() {
                ready.insert(id.index());
            }
        }

        let ids = self.nodes.iter().map(|(id, _)| id).collect::<Vec<_>>();
        let mut nodes = Vec::with_capacity(ids.len());

        while let Some(idx) = ready.pop_first() {
            let id = ids[idx];
            nodes.push(id);
            for output in self.nodes[id].outputs.iter() {
                let Some(users) = value_users.get(output) else {
                    continue;
                };
                for user in users {
                    let Some(n) = num_node_inputs.get_mut(user) else {
                        continue;
                    };
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(user.index());
                    }
                }
            }
        }

        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topo_sort_follows_dependencies() {
        let mut g = Graph::default();
        let x = g.values.new_val_named("x");
        let a = g.values.new_val_named("a");
        let b = g.values.new_val_named("b");
        let c = g.values.new_val_named("c");

        // Allocated in reverse dependency order.
        let add = g.add_node(Node::new("Add").with_ins(vec![a, b]).with_out(c));
        let relu = g.add_node(Node::new("Relu").with_in(x).with_out(a));
        let tanh = g.add_node(Node::new("Tanh").with_in(x).with_out(b));
        g.inputs.push(x);
        g.outputs.push(c);

        assert_eq!(g.topo_sort_nodes(), vec![relu, tanh, add]);
        assert_eq!(g.get_value_users()[&x].len(), 2);
        assert_eq!(g.get_value_parents()[&c], add);
    }

    #[test]
    fn topo_sort_skips_absent_inputs() {
        let mut g = Graph::default();
        let x = g.values.new_val_named("x");
        let y = g.values.new_val_named("y");
        let z = g.values.new_val_named("z");
        let n0 = g.add_node(Node::new("Relu").with_in(x).with_out(y));
        let n1 = g.add_node(Node::new("Op").with_in(y).with_no_in().with_out(z));
        assert_eq!(g.topo_sort_nodes(), vec![n0, n1]);
        assert_eq!(g.nodes[n1].input(1), None);
        assert_eq!(g.nodes[n1].input(0), Some(y));
    }
}
