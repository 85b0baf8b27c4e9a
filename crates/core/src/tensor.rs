use std::{cell::RefCell, fmt};

use crate::{
    dim::Dimensions,
    fixed_dim::FixedDimensions,
};
use rand::{distributions::Standard, prelude::Distribution, rngs::StdRng, Rng, SeedableRng};

thread_local!(static RNG: RefCell<StdRng> = RefCell::new(StdRng::from_entropy()));

/// A host-side tensor: a static shape plus typed element storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: FixedDimensions,
    data: TensorData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

/// Represents a type and shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypedFixedShape {
    pub dims: FixedDimensions,
    pub elem_ty: TensorElemType,
}

/// Represents a type and shape of a tensor. Some dimensions may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypedShape {
    pub dims: Dimensions,
    pub elem_ty: TensorElemType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorElemType {
    Bool,
    F32,
    I32,
    I64,
}

pub trait TensorElemTypeExt: PartialEq + PartialOrd + Copy + fmt::Debug {
    fn get_type() -> TensorElemType;
    fn zero() -> Self;
    fn close(a: Self, b: Self) -> bool;
    fn from_le_slice(bytes: &[u8]) -> Self;
    fn extend_le_bytes(self, out: &mut Vec<u8>);
    fn wrap(data: Vec<Self>) -> TensorData;
    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]>;
}

impl Tensor {
    pub fn new<T: TensorElemTypeExt>(dims: FixedDimensions, data: Vec<T>) -> Self {
        Self {
            dims,
            data: T::wrap(data),
        }
    }

    /// Decodes little-endian raw bytes (ONNX `raw_data` encoding).
    pub fn new_from_raw(dims: FixedDimensions, elem_ty: TensorElemType, raw: &[u8]) -> Self {
        fn decode<T: TensorElemTypeExt>(raw: &[u8]) -> Vec<T> {
            raw.chunks_exact(std::mem::size_of::<T>())
                .map(T::from_le_slice)
                .collect()
        }

        let data = match elem_ty {
            TensorElemType::Bool => TensorData::Bool(raw.iter().map(|&b| b != 0).collect()),
            TensorElemType::F32 => TensorData::F32(decode(raw)),
            TensorElemType::I32 => TensorData::I32(decode(raw)),
            TensorElemType::I64 => TensorData::I64(decode(raw)),
        };
        Self { dims, data }
    }

    pub fn zeros<T: TensorElemTypeExt>(dims: FixedDimensions) -> Self {
        let total_elems = dims.total_elems();
        Self::new(dims, vec![T::zero(); total_elems])
    }

    pub fn rand<T>(dims: FixedDimensions) -> Self
    where
        T: TensorElemTypeExt,
        Standard: Distribution<T>,
    {
        let total_elems = dims.total_elems();
        Self::new(
            dims,
            RNG.with(|r| {
                (&mut *r.borrow_mut())
                    .sample_iter(Standard)
                    .take(total_elems)
                    .collect::<Vec<T>>()
            }),
        )
    }

    pub fn seed_rng_from_u64(seed: u64) {
        RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed));
    }

    pub fn dims(&self) -> &FixedDimensions {
        &self.dims
    }

    pub fn elem_ty(&self) -> TensorElemType {
        match self.data {
            TensorData::Bool(_) => TensorElemType::Bool,
            TensorData::F32(_) => TensorElemType::F32,
            TensorData::I32(_) => TensorElemType::I32,
            TensorData::I64(_) => TensorElemType::I64,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::Bool(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Panics if `T` is not the element type of the tensor.
    pub fn data<T: TensorElemTypeExt>(&self) -> &[T] {
        assert_eq!(self.elem_ty(), T::get_type());
        self.try_data().unwrap_or_default()
    }

    pub fn try_data<T: TensorElemTypeExt>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    pub fn try_data_mut<T: TensorElemTypeExt>(&mut self) -> Option<&mut [T]> {
        T::slice_mut(&mut self.data)
    }

    /// Little-endian byte image of the elements.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        fn encode<T: TensorElemTypeExt>(data: &[T]) -> Vec<u8> {
            let mut out = Vec::with_capacity(std::mem::size_of_val(data));
            for &x in data {
                x.extend_le_bytes(&mut out);
            }
            out
        }

        match &self.data {
            TensorData::Bool(v) => v.iter().map(|&b| b as u8).collect(),
            TensorData::F32(v) => encode(v),
            TensorData::I32(v) => encode(v),
            TensorData::I64(v) => encode(v),
        }
    }

    /// Elements widened (or narrowed) to `f32`. `None` for boolean tensors.
    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match &self.data {
            TensorData::Bool(_) => None,
            TensorData::F32(v) => Some(v.clone()),
            TensorData::I32(v) => Some(v.iter().map(|&x| x as f32).collect()),
            TensorData::I64(v) => Some(v.iter().map(|&x| x as f32).collect()),
        }
    }

    pub fn allclose<T: TensorElemTypeExt>(&self, other: &[T]) -> bool {
        let Some(x) = self.try_data::<T>() else {
            return false;
        };
        if x.len() != other.len() {
            return false;
        }

        x.iter().zip(other.iter()).all(|(&x, &y)| T::close(x, y))
    }

    pub fn verify(&self) -> bool {
        self.len() == self.dims.total_elems()
    }

    pub fn typed_shape(&self) -> TypedFixedShape {
        TypedFixedShape::new(self.dims.clone(), self.elem_ty())
    }
}

impl TypedFixedShape {
    pub fn new(dims: FixedDimensions, elem_ty: TensorElemType) -> Self {
        Self { dims, elem_ty }
    }
}

impl TypedShape {
    pub fn new(dims: Dimensions, elem_ty: TensorElemType) -> Self {
        Self { dims, elem_ty }
    }
}

impl From<TypedFixedShape> for TypedShape {
    fn from(typed: TypedFixedShape) -> Self {
        Self {
            dims: typed.dims.into(),
            elem_ty: typed.elem_ty,
        }
    }
}

impl TensorElemType {
    pub fn size(&self) -> usize {
        match self {
            TensorElemType::Bool => std::mem::size_of::<u8>(),
            TensorElemType::F32 => std::mem::size_of::<f32>(),
            TensorElemType::I32 => std::mem::size_of::<i32>(),
            TensorElemType::I64 => std::mem::size_of::<i64>(),
        }
    }

    pub fn is_f32(&self) -> bool {
        matches!(self, Self::F32)
    }
}

macro_rules! impl_elem_type {
    ($ty:ty, $variant:ident, $zero:expr) => {
        impl TensorElemTypeExt for $ty {
            fn get_type() -> TensorElemType {
                TensorElemType::$variant
            }

            fn zero() -> Self {
                $zero
            }

            fn close(a: Self, b: Self) -> bool {
                a == b
            }

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_le_bytes(buf)
            }

            fn extend_le_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes())
            }

            fn wrap(data: Vec<Self>) -> TensorData {
                TensorData::$variant(data)
            }

            fn slice(data: &TensorData) -> Option<&[Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
                match data {
                    TensorData::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_elem_type!(i32, I32, 0);
impl_elem_type!(i64, I64, 0);

impl TensorElemTypeExt for f32 {
    fn get_type() -> TensorElemType {
        TensorElemType::F32
    }

    fn zero() -> Self {
        0f32
    }

    fn close(a: Self, b: Self) -> bool {
        let atol = 1e-5;
        let rtol = 1e-8;
        ((a - b).abs() <= (atol + rtol * b.abs()))
            || (a.is_infinite() && b.is_infinite() && a.is_sign_positive() == b.is_sign_positive())
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_le_bytes(buf)
    }

    fn extend_le_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes())
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::F32(data)
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl TensorElemTypeExt for bool {
    fn get_type() -> TensorElemType {
        TensorElemType::Bool
    }

    fn zero() -> Self {
        false
    }

    fn close(a: Self, b: Self) -> bool {
        a == b
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn extend_le_bytes(self, out: &mut Vec<u8>) {
        out.push(self as u8)
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::Bool(data)
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn slice_mut(data: &mut TensorData) -> Option<&mut [Self]> {
        match data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dump<T: fmt::Debug>(f: &mut fmt::Formatter<'_>, data: &[T]) -> fmt::Result {
            const MAX_ELEMS: usize = 10;
            if data.len() > MAX_ELEMS {
                write!(f, "[")?;
                for e in data[0..MAX_ELEMS / 2].iter() {
                    write!(f, "{e:?}, ")?;
                }
                write!(f, "...")?;
                for e in data[data.len() - MAX_ELEMS / 2..].iter() {
                    write!(f, ", {e:?}")?;
                }
                write!(f, "]")
            } else {
                write!(f, "{data:?}")
            }
        }

        write!(f, "Tensor({:?}, {:?}, ", self.dims, self.elem_ty())?;
        match &self.data {
            TensorData::F32(v) => dump(f, v)?,
            TensorData::I32(v) => dump(f, v)?,
            TensorData::I64(v) => dump(f, v)?,
            TensorData::Bool(v) => dump(f, v)?,
        }
        write!(f, ")")
    }
}

#[test]
fn dump_small_tensor() {
    let t = Tensor::new(vec![2, 2].into(), vec![1.0f32, 2.0, 3.0, 4.0]);
    insta::assert_snapshot!(t, @"Tensor([2, 2], F32, [1.0, 2.0, 3.0, 4.0])");
}

#[test]
fn dump_large_tensor() {
    let t = Tensor::new(vec![12].into(), (0..12i64).collect());
    insta::assert_snapshot!(t, @"Tensor([12], I64, [0, 1, 2, 3, 4, ..., 7, 8, 9, 10, 11])");
}

#[test]
fn create_tensors() {
    assert!(Tensor::zeros::<bool>(FixedDimensions(vec![1, 1, 28, 28])).verify());
    assert!(Tensor::zeros::<f32>(FixedDimensions(vec![1, 1, 28, 28])).verify());
    assert!(Tensor::zeros::<i32>(FixedDimensions(vec![1, 1, 28, 28])).verify());
    assert!(Tensor::zeros::<i64>(FixedDimensions(vec![1, 1, 28, 28])).verify());
    let t = Tensor::new(
        vec![4, 4].into(),
        vec![
            1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0,
            16.0,
        ],
    );
    assert!(t.verify());
    assert!(!Tensor::new(vec![3].into(), vec![1.0f32]).verify());
}

#[test]
fn raw_bytes_round_trip() {
    let t = Tensor::new(vec![3].into(), vec![1.5f32, -2.0, 1e-3]);
    let raw = t.to_le_bytes();
    assert_eq!(raw.len(), 12);
    assert_eq!(Tensor::new_from_raw(vec![3].into(), TensorElemType::F32, &raw), t);

    let t = Tensor::new(vec![2].into(), vec![7i64, -1]);
    assert_eq!(
        Tensor::new_from_raw(vec![2].into(), TensorElemType::I64, &t.to_le_bytes()),
        t
    );
}

#[test]
fn widen_to_f32() {
    let t = Tensor::new(vec![2].into(), vec![3i32, -4]);
    assert_eq!(t.to_f32_vec(), Some(vec![3.0, -4.0]));
    assert_eq!(Tensor::zeros::<bool>(vec![1].into()).to_f32_vec(), None);
}

#[test]
fn test_tensor_elem_type() {
    assert_eq!(TensorElemType::Bool.size(), 1);
    assert_eq!(TensorElemType::F32.size(), 4);
    assert_eq!(TensorElemType::I32.size(), 4);
    assert_eq!(TensorElemType::I64.size(), 8);
    assert!(TensorElemType::F32.is_f32());
    assert!(!TensorElemType::I64.is_f32());
}

#[test]
fn seeded_rand() {
    Tensor::seed_rng_from_u64(42);
    let x = Tensor::rand::<f32>(vec![3, 6, 2].into());
    let y = Tensor::rand::<f32>(vec![3, 6, 2].into());
    assert_eq!(x.elem_ty(), TensorElemType::F32);
    assert!(x.verify());
    assert_ne!(x, y);

    Tensor::seed_rng_from_u64(42);
    assert_eq!(Tensor::rand::<f32>(vec![3, 6, 2].into()), x);
}
