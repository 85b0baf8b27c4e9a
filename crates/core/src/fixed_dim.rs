use std::{
    ops::{Deref, Index},
    slice::SliceIndex,
};

pub type FixedDimension = usize;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedDimensions(pub Vec<FixedDimension>);

impl std::fmt::Debug for FixedDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FixedDimensions {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_elems(&self) -> usize {
        self.0.iter().product()
    }

    pub fn as_slice(&self) -> &[FixedDimension] {
        self.0.as_slice()
    }

    pub fn from_i64(dims: &[i64]) -> Self {
        Self(dims.iter().map(|&x| x as FixedDimension).collect())
    }
}

impl<I> Index<I> for FixedDimensions
where
    I: SliceIndex<[FixedDimension]>,
{
    type Output = I::Output;

    fn index(&self, index: I) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<FixedDimension>> for FixedDimensions {
    fn from(v: Vec<FixedDimension>) -> FixedDimensions {
        FixedDimensions(v)
    }
}

impl Deref for FixedDimensions {
    type Target = Vec<usize>;
    fn deref(&self) -> &Vec<usize> {
        &self.0
    }
}

#[test]
fn total_elems() {
    assert_eq!(FixedDimensions(vec![1, 1, 28, 28]).total_elems(), 784)
}

#[test]
fn total_elems_of_scalar() {
    assert_eq!(FixedDimensions(vec![]).total_elems(), 1)
}

#[test]
fn total_elems_of_degenerate() {
    assert_eq!(FixedDimensions(vec![2, 0, 3]).total_elems(), 0)
}
