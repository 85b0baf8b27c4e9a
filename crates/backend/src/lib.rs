//! A narrow neural-network graph builder interface, shaped after the WebNN
//! `MLContext` / `MLGraphBuilder` / `MLGraph` API, and a reference CPU
//! implementation of it.

pub mod operand;
pub mod options;
pub mod reference;

use std::borrow::Cow;

use thiserror::Error;

pub use operand::{FusionOperator, Operand, OperandDescriptor, OperandType};
pub use options::*;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Failed to create context: {0}")]
    ContextCreation(Cow<'static, str>),

    #[error("Failed to create graph builder: {0}")]
    BuilderCreation(Cow<'static, str>),

    #[error("Failed to build graph: {0}")]
    Build(Cow<'static, str>),

    #[error("Failed to compute graph: {0}")]
    Compute(Cow<'static, str>),

    #[error("Unknown operand: {0:?}")]
    InvalidOperand(Operand),

    #[error("Invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),
}

pub trait Backend {
    fn create_context(&self, options: &ContextOptions) -> Result<Box<dyn Context>, BackendError>;
}

pub trait Context {
    fn create_graph_builder(&self) -> Result<Box<dyn GraphBuilder>, BackendError>;
}

/// Records operations and returns opaque handles for their results. Every
/// operand handed to a builder method must come from the same builder.
pub trait GraphBuilder {
    /// `data` is the little-endian byte image of the elements.
    fn constant(&mut self, desc: &OperandDescriptor, data: &[u8])
        -> Result<Operand, BackendError>;

    fn input(&mut self, name: &str, desc: &OperandDescriptor) -> Result<Operand, BackendError>;

    /// Creates an activation that can be fused into another operation.
    fn activation(&mut self, activation: Activation) -> Result<FusionOperator, BackendError>;

    fn relu(&mut self, x: Operand) -> Result<Operand, BackendError>;

    fn leaky_relu(&mut self, x: Operand, alpha: f32) -> Result<Operand, BackendError>;

    fn sigmoid(&mut self, x: Operand) -> Result<Operand, BackendError>;

    fn tanh(&mut self, x: Operand) -> Result<Operand, BackendError>;

    fn batch_normalization(
        &mut self,
        x: Operand,
        mean: Operand,
        variance: Operand,
        options: &BatchNormalizationOptions,
    ) -> Result<Operand, BackendError>;

    fn concat(&mut self, inputs: &[Operand], axis: u32) -> Result<Operand, BackendError>;

    fn conv2d(
        &mut self,
        x: Operand,
        filter: Operand,
        options: &Conv2dOptions,
    ) -> Result<Operand, BackendError>;

    fn conv_transpose2d(
        &mut self,
        x: Operand,
        filter: Operand,
        options: &ConvTranspose2dOptions,
    ) -> Result<Operand, BackendError>;

    fn matmul(&mut self, a: Operand, b: Operand) -> Result<Operand, BackendError>;

    fn gemm(&mut self, a: Operand, b: Operand, options: &GemmOptions)
        -> Result<Operand, BackendError>;

    /// Returns `[final hidden state, hidden state sequence]`; the sequence is
    /// present only when `options.return_sequence` is set.
    fn gru(
        &mut self,
        x: Operand,
        weight: Operand,
        recurrent_weight: Operand,
        steps: u32,
        hidden_size: u32,
        options: &GruOptions,
    ) -> Result<Vec<Operand>, BackendError>;

    /// Splits `x` into `splits` equally sized parts along `axis`.
    fn split(&mut self, x: Operand, splits: u32, axis: u32) -> Result<Vec<Operand>, BackendError>;

    /// `out[i] = start + i * delta` over the flattened output.
    fn fill_sequence(
        &mut self,
        ty: OperandType,
        dimensions: &[u32],
        options: &FillSequenceOptions,
    ) -> Result<Operand, BackendError>;

    fn cast(&mut self, x: Operand, ty: OperandType) -> Result<Operand, BackendError>;

    /// Consumes the builder. Every output name must be unique.
    fn build(
        self: Box<Self>,
        outputs: &[(&str, Operand)],
    ) -> Result<Box<dyn Graph + Send>, BackendError>;
}

/// A compiled graph. Computation may use per-graph scratch storage, hence
/// `&mut self`.
pub trait Graph {
    /// Synchronously computes the graph. Buffers are float32 and addressed by
    /// the names given to `GraphBuilder::input` and `GraphBuilder::build`.
    fn compute(
        &mut self,
        inputs: &[(&str, &[f32])],
        outputs: &mut [(&str, &mut [f32])],
    ) -> Result<(), BackendError>;
}
