//! Per-operator translators. Each one decides whether a node can run on the
//! backend and emits the builder calls for it.

pub mod activation;
pub mod batch_norm;
pub mod concat;
pub mod conv;
pub mod gemm;
pub mod gru;
pub mod range;
pub mod utils;

use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
    tensor::TensorElemType,
    value::ValueId,
};

use crate::{
    fusion::FUSIBLE_ACTIVATIONS,
    helper::{get_elem_type, is_input_supported},
    model_builder::{ModelBuilder, SkipSets},
    BuildError,
};

pub const DEFAULT_MIN_OPSET: i64 = 1;
pub const DEFAULT_MAX_OPSET: i64 = 19;

pub trait OpBuilder: Send + Sync {
    /// Declares inputs this builder binds itself, so that they are not
    /// registered as ordinary constants or graph inputs.
    fn add_initializers_to_skip(&self, _node: &Node, _skip: &mut SkipSets) {}

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError>;

    /// Never panics or errors; rejections are logged.
    fn is_op_supported(&self, model: &Model, node: &Node) -> bool {
        if !self.has_supported_inputs(model, node) {
            return false;
        }
        if !self.has_supported_opset(model, node) {
            return false;
        }
        self.is_op_supported_impl(model, node)
    }

    fn is_op_supported_impl(&self, _model: &Model, _node: &Node) -> bool {
        true
    }

    /// Every present input must be static and float32.
    fn has_supported_inputs(&self, model: &Model, node: &Node) -> bool {
        node.present_inputs().all(|input| {
            is_input_supported(model, input, &node.op_type)
                && has_elem_type(model, node, input, &[TensorElemType::F32])
        })
    }

    fn has_supported_opset(&self, model: &Model, node: &Node) -> bool {
        let min = self.min_supported_opset(node);
        let max = self.max_supported_opset(node);
        if model.opset_version < min || model.opset_version > max {
            log::debug!(
                "{} [{}] is only supported for opset [{min}, {max}], model opset is {}",
                node.op_type,
                node.name_or_op(),
                model.opset_version
            );
            return false;
        }
        true
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        DEFAULT_MIN_OPSET
    }

    fn max_supported_opset(&self, _node: &Node) -> i64 {
        DEFAULT_MAX_OPSET
    }

    /// Whether the emitted operation can absorb a trailing activation.
    fn supports_fused_activation(&self) -> bool {
        false
    }
}

pub(crate) fn has_elem_type(
    model: &Model,
    node: &Node,
    input: ValueId,
    allowed: &[TensorElemType],
) -> bool {
    match get_elem_type(model, input) {
        Some(ty) if allowed.contains(&ty) => true,
        ty => {
            log::debug!(
                "{} [{}] input '{}' has unsupported type {ty:?}",
                node.op_type,
                node.name_or_op(),
                model.graph.values[input].display_name(input)
            );
            false
        }
    }
}

static ACTIVATION: activation::ActivationOpBuilder = activation::ActivationOpBuilder;
static BATCH_NORM: batch_norm::BatchNormalizationOpBuilder =
    batch_norm::BatchNormalizationOpBuilder;
static CONCAT: concat::ConcatOpBuilder = concat::ConcatOpBuilder;
static CONV: conv::ConvOpBuilder = conv::ConvOpBuilder;
static GEMM: gemm::GemmOpBuilder = gemm::GemmOpBuilder;
static GRU: gru::GruOpBuilder = gru::GruOpBuilder;
static RANGE: range::RangeOpBuilder = range::RangeOpBuilder;

/// The registry is built on first use and never mutated afterwards.
pub fn get_op_builders() -> &'static FxHashMap<&'static str, &'static dyn OpBuilder> {
    static OP_BUILDERS: OnceLock<FxHashMap<&'static str, &'static dyn OpBuilder>> = OnceLock::new();
    OP_BUILDERS.get_or_init(|| {
        let mut map: FxHashMap<&'static str, &'static dyn OpBuilder> = FxHashMap::default();
        for op_type in FUSIBLE_ACTIVATIONS {
            map.insert(op_type, &ACTIVATION);
        }
        map.insert("BatchNormalization", &BATCH_NORM);
        map.insert("Concat", &CONCAT);
        map.insert("Conv", &CONV);
        map.insert("ConvTranspose", &CONV);
        map.insert("Gemm", &GEMM);
        map.insert("MatMul", &GEMM);
        map.insert("GRU", &GRU);
        map.insert("Range", &RANGE);
        map
    })
}

pub fn get_op_builder(op_type: &str) -> Option<&'static dyn OpBuilder> {
    get_op_builders().get(op_type).copied()
}

#[test]
fn registry_lookup() {
    for op_type in [
        "Relu",
        "LeakyRelu",
        "Sigmoid",
        "Tanh",
        "BatchNormalization",
        "Concat",
        "Conv",
        "ConvTranspose",
        "Gemm",
        "MatMul",
        "GRU",
        "Range",
    ] {
        assert!(get_op_builder(op_type).is_some(), "{op_type}");
    }
    assert!(get_op_builder("Softmax").is_none());
    assert!(get_op_builder("Conv").unwrap().supports_fused_activation());
    assert!(!get_op_builder("Relu").unwrap().supports_fused_activation());
}
