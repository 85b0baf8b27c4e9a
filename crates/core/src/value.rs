use std::ops::{Index, IndexMut};

use id_arena::{Arena, Id};

use crate::tensor::TypedShape;

pub type ValueId = Id<Value>;

/// A value flowing between nodes. Graph inputs, graph outputs and
/// initializers are all values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Value {
    pub name: Option<String>,
    pub shape: Option<TypedShape>,
}

#[derive(Debug, Default, Clone)]
pub struct ValueArena(Arena<Value>);

impl Value {
    /// Name used for diagnostics and backend operand registration.
    pub fn display_name(&self, id: ValueId) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("value_{}", id.index()))
    }
}

impl ValueArena {
    pub fn new_val(&mut self) -> ValueId {
        self.0.alloc(Value {
            name: None,
            shape: None,
        })
    }

    pub fn new_val_named(&mut self, name: impl Into<String>) -> ValueId {
        self.0.alloc(Value {
            name: Some(name.into()),
            shape: None,
        })
    }

    pub fn new_val_named_and_shaped(
        &mut self,
        name: impl Into<String>,
        shape: impl Into<TypedShape>,
    ) -> ValueId {
        self.0.alloc(Value {
            name: Some(name.into()),
            shape: Some(shape.into()),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &Value)> {
        self.0.iter()
    }

    /// Finds a value by name. Linear in the number of values.
    pub fn find_by_name(&self, name: &str) -> Option<ValueId> {
        self.0
            .iter()
            .find(|(_, v)| v.name.as_deref() == Some(name))
            .map(|(id, _)| id)
    }
}

impl Index<ValueId> for ValueArena {
    type Output = Value;

    fn index(&self, index: ValueId) -> &Self::Output {
        &self.0[index]
    }
}

impl IndexMut<ValueId> for ValueArena {
    fn index_mut(&mut self, index: ValueId) -> &mut Self::Output {
        &mut self.0[index]
    }
}

#[test]
fn lookup_values() {
    use crate::tensor::{TensorElemType, TypedFixedShape};

    let mut values = ValueArena::default();
    let a = values.new_val();
    let b = values.new_val_named("b");
    let c = values.new_val_named_and_shaped(
        "c",
        TypedFixedShape::new(vec![1, 3].into(), TensorElemType::F32),
    );
    assert_eq!(values.len(), 3);
    assert_eq!(values.find_by_name("b"), Some(b));
    assert_eq!(values.find_by_name("x"), None);
    assert_eq!(values[a].display_name(a), format!("value_{}", a.index()));
    assert_eq!(values[c].display_name(c), "c");
    assert!(values[c].shape.is_some());
}
