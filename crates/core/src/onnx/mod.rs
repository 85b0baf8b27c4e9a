pub mod load;
pub mod proto;

pub use load::{load_onnx, load_onnx_from_buffer, load_onnx_from_model_proto, ModelLoadError};
