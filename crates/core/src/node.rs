use id_arena::{Arena, Id};

use crate::{
    attr::{AttributeValue, Attributes},
    value::ValueId,
};

pub type NodeId = Id<Node>;
pub type NodeArena = Arena<Node>;

/// An operator instance of the host graph. Absent optional inputs are `None`.
#[derive(Debug, Clone)]
pub struct Node {
    pub op_type: String,
    pub name: Option<String>,
    pub inputs: Vec<Option<ValueId>>,
    pub outputs: Vec<ValueId>,
    pub attrs: Attributes,
}

impl Node {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: Attributes::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<Option<String>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_in(mut self, id: ValueId) -> Self {
        self.inputs.push(Some(id));
        self
    }

    /// Appends an absent optional input.
    pub fn with_no_in(mut self) -> Self {
        self.inputs.push(None);
        self
    }

    pub fn with_ins(mut self, ids: Vec<ValueId>) -> Self {
        self.inputs.extend(ids.into_iter().map(Some));
        self
    }

    pub fn with_out(mut self, id: ValueId) -> Self {
        self.outputs.push(id);
        self
    }

    pub fn with_outs(mut self, mut ids: Vec<ValueId>) -> Self {
        self.outputs.append(&mut ids);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attrs.insert(name, value);
        self
    }

    /// The `i`-th input, or `None` if it is absent or out of range.
    pub fn input(&self, i: usize) -> Option<ValueId> {
        self.inputs.get(i).copied().flatten()
    }

    /// Present inputs in order.
    pub fn present_inputs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.inputs.iter().filter_map(|x| *x)
    }

    pub fn name_or_op(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.op_type)
    }
}
