pub mod attr;
pub mod dim;
pub mod fixed_dim;
pub mod graph;
pub mod model;
pub mod node;
pub mod onnx;
pub mod tensor;
pub mod value;
