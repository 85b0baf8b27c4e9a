//! A straightforward CPU implementation of the builder interface. Values are
//! kept as `f32` arrays; integer-typed operands hold truncated values.

mod builder;
mod conv2d;
mod gemm;
mod graph;
mod gru;

pub use builder::ReferenceGraphBuilder;
pub use graph::ReferenceGraph;

use crate::{
    options::{ContextOptions, DevicePreference},
    Backend, BackendError, Context, GraphBuilder,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBackend;

#[derive(Debug, Clone, Copy)]
pub struct ReferenceContext {
    options: ContextOptions,
}

impl ReferenceBackend {
    pub const fn new() -> Self {
        Self
    }
}

impl ReferenceContext {
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }
}

impl Backend for ReferenceBackend {
    fn create_context(&self, options: &ContextOptions) -> Result<Box<dyn Context>, BackendError> {
        if options.device_preference == DevicePreference::Gpu {
            log::debug!("Reference backend has no GPU device; running on CPU");
        }
        Ok(Box::new(ReferenceContext { options: *options }))
    }
}

impl Context for ReferenceContext {
    fn create_graph_builder(&self) -> Result<Box<dyn GraphBuilder>, BackendError> {
        Ok(Box::new(ReferenceGraphBuilder::new()))
    }
}
