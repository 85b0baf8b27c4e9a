/// An opaque handle to a value in the graph under construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Operand(pub(crate) u32);

/// An opaque handle to an activation created by `GraphBuilder::activation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FusionOperator(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    Float32,
    Int32,
    Int64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperandDescriptor {
    pub ty: OperandType,
    pub dimensions: Vec<u32>,
}

impl Operand {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl OperandType {
    pub fn size(self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }
}

impl OperandDescriptor {
    pub fn new(ty: OperandType, dimensions: Vec<u32>) -> Self {
        Self { ty, dimensions }
    }

    pub fn float32(dimensions: Vec<u32>) -> Self {
        Self::new(OperandType::Float32, dimensions)
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn total_elems(&self) -> usize {
        self.dimensions.iter().map(|&d| d as usize).product()
    }

    pub fn byte_len(&self) -> usize {
        self.total_elems() * self.ty.size()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dimensions.iter().map(|&d| d as usize).collect()
    }
}

#[test]
fn descriptor_sizes() {
    let d = OperandDescriptor::new(OperandType::Int64, vec![2, 3]);
    assert_eq!(d.rank(), 2);
    assert_eq!(d.total_elems(), 6);
    assert_eq!(d.byte_len(), 48);
    assert_eq!(d.shape(), vec![2, 3]);
    assert_eq!(OperandDescriptor::float32(vec![4]).byte_len(), 16);
}
