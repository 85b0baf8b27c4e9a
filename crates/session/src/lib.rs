//! Lowers ONNX graphs onto a WebNN-style graph builder.
//!
//! [`provider::WebNNExecutionProvider`] partitions a [`Model`] into runs of
//! supported nodes, compiles each run through [`model_builder::ModelBuilder`]
//! and executes the resulting [`model::CompiledModel`]s.
//!
//! [`Model`]: webnn_ep_core::model::Model

pub mod builders;
pub mod fusion;
pub mod helper;
pub mod model;
pub mod model_builder;
pub mod options;
pub mod provider;
pub mod subgraph;

use std::borrow::Cow;

use thiserror::Error;
use webnn_ep_backend::BackendError;
use webnn_ep_core::tensor::TensorElemType;

pub use model::CompiledModel;
pub use options::ProviderOptions;
pub use provider::WebNNExecutionProvider;

/// Errors raised while compiling a subgraph.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Node [{node}], type [{op_type}] is not supported")]
    UnsupportedOperator { node: String, op_type: String },

    #[error("Tensor '{name}' has unsupported type {elem_ty:?}")]
    UnsupportedDataType {
        name: String,
        elem_ty: TensorElemType,
    },

    #[error("Shape of '{0}' is not available")]
    ShapeUnavailable(String),

    /// Context, builder or graph creation failed in the backend.
    #[error("Backend: {0}")]
    Backend(#[from] BackendError),

    /// A node consumed a value that has not been lowered yet.
    #[error("Operand of '{0}' is not registered")]
    MissingOperand(String),

    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}

/// Errors raised by a single inference call.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("Tensor '{name}' has unsupported type {elem_ty:?}")]
    UnsupportedDataType {
        name: String,
        elem_ty: TensorElemType,
    },

    #[error("Tensor '{name}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Unknown tensor '{0}'")]
    UnknownTensor(String),

    #[error("Backend: {0}")]
    Backend(#[from] BackendError),

    #[error("Something went wrong: {0}")]
    Message(Cow<'static, str>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid device flags: {0}")]
    DeviceFlags(u32),

    #[error("Invalid power flags: {0}")]
    PowerFlags(u32),
}
