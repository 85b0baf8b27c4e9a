use rustc_hash::FxHashMap;

use crate::tensor::Tensor;

/// An attribute value attached to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(Tensor),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

/// Named attributes of a node. Getters return `None` when the attribute is
/// absent or has a different kind, so callers apply the operator default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(FxHashMap<String, AttributeValue>);

impl Attributes {
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.0.get(name)? {
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        match self.0.get(name)? {
            AttributeValue::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn ints(&self, name: &str) -> Option<&[i64]> {
        match self.0.get(name)? {
            AttributeValue::Ints(i) => Some(i),
            _ => None,
        }
    }

    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        match self.0.get(name)? {
            AttributeValue::Floats(f) => Some(f),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Option<&[String]> {
        match self.0.get(name)? {
            AttributeValue::Strings(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f32> for AttributeValue {
    fn from(f: f32) -> Self {
        Self::Float(f)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Tensor> for AttributeValue {
    fn from(t: Tensor) -> Self {
        Self::Tensor(t)
    }
}

impl From<Vec<f32>> for AttributeValue {
    fn from(f: Vec<f32>) -> Self {
        Self::Floats(f)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(i: Vec<i64>) -> Self {
        Self::Ints(i)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(s: Vec<String>) -> Self {
        Self::Strings(s)
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(s: Vec<&str>) -> Self {
        Self::Strings(s.into_iter().map(String::from).collect())
    }
}

#[test]
fn typed_getters() {
    let mut attrs = Attributes::default();
    attrs.insert("alpha", 0.5f32);
    attrs.insert("axis", -1i64);
    attrs.insert("auto_pad", "SAME_UPPER");
    attrs.insert("pads", vec![1i64, 1, 1, 1]);
    attrs.insert("activations", vec!["Sigmoid", "Tanh"]);

    assert_eq!(attrs.len(), 5);
    assert_eq!(attrs.float("alpha"), Some(0.5));
    assert_eq!(attrs.int("axis"), Some(-1));
    assert_eq!(attrs.string("auto_pad"), Some("SAME_UPPER"));
    assert_eq!(attrs.ints("pads"), Some(&[1i64, 1, 1, 1][..]));
    assert_eq!(attrs.strings("activations").map(|s| s.len()), Some(2));

    // Mismatched kinds behave as absent.
    assert_eq!(attrs.int("alpha"), None);
    assert_eq!(attrs.float("beta"), None);
    assert!(!attrs.contains("beta"));
}
