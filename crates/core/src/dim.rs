use std::fmt;

use crate::fixed_dim::FixedDimensions;

/// A dimension of a value's shape as annotated in the host graph.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Fixed(usize),
    Dynamic(String),
}

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Dimensions(pub Vec<Dimension>);

impl Dimension {
    pub fn as_fixed(&self) -> Option<usize> {
        match self {
            Self::Fixed(d) => Some(*d),
            Self::Dynamic(_) => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

impl Dimensions {
    pub fn new(dims: Vec<Dimension>) -> Self {
        Self(dims)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Dimension] {
        &self.0
    }

    pub fn is_fixed(&self) -> bool {
        self.0.iter().all(|d| !d.is_dynamic())
    }

    /// Returns the shape if every dimension is known.
    pub fn as_fixed_dims(&self) -> Option<FixedDimensions> {
        self.0
            .iter()
            .map(Dimension::as_fixed)
            .collect::<Option<Vec<_>>>()
            .map(FixedDimensions)
    }
}

impl From<Vec<Dimension>> for Dimensions {
    fn from(dims: Vec<Dimension>) -> Self {
        Self(dims)
    }
}

impl From<FixedDimensions> for Dimensions {
    fn from(dims: FixedDimensions) -> Self {
        Self(dims.0.into_iter().map(Dimension::Fixed).collect())
    }
}

impl fmt::Debug for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(d) => write!(f, "{d}"),
            Self::Dynamic(s) => write!(f, "{s}"),
        }
    }
}

impl fmt::Debug for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[test]
fn fixed_dims_of_static_shape() {
    let dims = Dimensions::from(FixedDimensions(vec![1, 3, 224, 224]));
    assert!(dims.is_fixed());
    assert_eq!(dims.as_fixed_dims(), Some(FixedDimensions(vec![1, 3, 224, 224])));
}

#[test]
fn fixed_dims_of_dynamic_shape() {
    let dims = Dimensions::new(vec![
        Dimension::Dynamic("batch".into()),
        Dimension::Fixed(3),
    ]);
    assert!(!dims.is_fixed());
    assert_eq!(dims.as_fixed_dims(), None);
    assert_eq!(format!("{dims:?}"), "[batch, 3]");
}
