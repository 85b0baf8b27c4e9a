//! Compiles one subgraph into a backend graph.
//!
//! The passes run in a fixed order: context and builder creation, skip
//! declaration, fusion planning, initializer registration, input
//! registration, node lowering in topological order, output registration
//! and finally the backend build.

use rustc_hash::{FxHashMap, FxHashSet};
use webnn_ep_backend::{Backend, GraphBuilder, Operand, OperandDescriptor};
use webnn_ep_core::{
    model::Model,
    node::Node,
    tensor::{Tensor, TensorElemType},
    value::ValueId,
};

use crate::{
    builders::get_op_builder,
    fusion::FusionPlan,
    helper,
    model::{CompiledModel, TensorInfo},
    options::ProviderOptions,
    subgraph::SubGraph,
    BuildError,
};

/// Values that a translator binds itself.
#[derive(Debug, Default)]
pub struct SkipSets {
    initializers: FxHashSet<ValueId>,
    inputs: FxHashSet<ValueId>,
}

impl SkipSets {
    pub fn skip_initializer(&mut self, value: ValueId) {
        self.initializers.insert(value);
    }

    pub fn skip_input(&mut self, value: ValueId) {
        self.inputs.insert(value);
    }

    pub fn is_initializer_skipped(&self, value: ValueId) -> bool {
        self.initializers.contains(&value)
    }

    pub fn is_input_skipped(&self, value: ValueId) -> bool {
        self.inputs.contains(&value)
    }
}

pub struct ModelBuilder<'a> {
    subgraph: &'a SubGraph<'a>,
    options: ProviderOptions,
    builder: Box<dyn GraphBuilder>,
    skip: SkipSets,
    fusion: FusionPlan,
    operands: FxHashMap<ValueId, Operand>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    scalar_outputs: FxHashSet<String>,
    info: FxHashMap<String, TensorInfo>,
}

impl<'a> ModelBuilder<'a> {
    /// Acquires a graph builder from `backend` and plans the subgraph.
    pub fn new(
        subgraph: &'a SubGraph<'a>,
        backend: &dyn Backend,
        options: ProviderOptions,
    ) -> Result<Self, BuildError> {
        let context = backend.create_context(&options.context_options())?;
        let mut builder = context.create_graph_builder()?;

        let mut skip = SkipSets::default();
        for &node_id in subgraph.nodes() {
            let node = subgraph.node(node_id);
            if let Some(op_builder) = get_op_builder(&node.op_type) {
                op_builder.add_initializers_to_skip(node, &mut skip);
            }
        }

        let fusion = FusionPlan::new(subgraph, builder.as_mut())?;

        Ok(Self {
            subgraph,
            options,
            builder,
            skip,
            fusion,
            operands: FxHashMap::default(),
            input_names: vec![],
            output_names: vec![],
            scalar_outputs: FxHashSet::default(),
            info: FxHashMap::default(),
        })
    }

    pub fn compile(mut self) -> Result<CompiledModel, BuildError> {
        log::debug!(
            "Compiling subgraph: {} nodes, {} inputs, {} outputs, {} fused activations",
            self.subgraph.nodes().len(),
            self.subgraph.inputs().len(),
            self.subgraph.outputs().len(),
            self.fusion.num_fused()
        );

        self.register_initializers()?;
        self.register_model_inputs()?;
        self.add_operations()?;
        let outputs = self.register_model_outputs()?;

        let named_outputs = outputs
            .iter()
            .map(|(name, operand)| (name.as_str(), *operand))
            .collect::<Vec<_>>();
        let graph = self.builder.build(&named_outputs)?;

        Ok(CompiledModel::new(
            graph,
            self.input_names,
            self.output_names,
            self.scalar_outputs,
            self.info,
        ))
    }

    fn register_initializers(&mut self) -> Result<(), BuildError> {
        let subgraph = self.subgraph;
        for &value in subgraph.initializers() {
            if self.skip.is_initializer_skipped(value) {
                continue;
            }
            let Some(tensor) = subgraph.graph().inits.get(&value) else {
                continue;
            };
            if tensor.elem_ty() != TensorElemType::F32 {
                return Err(BuildError::UnsupportedDataType {
                    name: subgraph.value_name(value),
                    elem_ty: tensor.elem_ty(),
                });
            }
            let desc = OperandDescriptor::float32(backend_dims(tensor.dims())?);
            let operand = self.builder.constant(&desc, &tensor.to_le_bytes())?;
            self.operands.insert(value, operand);
        }
        Ok(())
    }

    fn register_model_inputs(&mut self) -> Result<(), BuildError> {
        let subgraph = self.subgraph;
        for &value in subgraph.inputs() {
            if helper::is_initializer(subgraph.model(), value) || self.skip.is_input_skipped(value)
            {
                continue;
            }
            let name = subgraph.value_name(value);
            let info = self.tensor_info(value, &name)?;
            let desc = OperandDescriptor::float32(backend_dims(&info.shape)?);
            let operand = self.builder.input(&name, &desc)?;
            self.operands.insert(value, operand);
            self.input_names.push(name.clone());
            self.info.insert(name, info);
        }
        Ok(())
    }

    fn add_operations(&mut self) -> Result<(), BuildError> {
        let subgraph = self.subgraph;
        for &node_id in subgraph.nodes() {
            let node = subgraph.node(node_id);
            let Some(op_builder) = get_op_builder(&node.op_type) else {
                return Err(BuildError::UnsupportedOperator {
                    node: node.name_or_op().to_string(),
                    op_type: node.op_type.clone(),
                });
            };
            log::debug!("Lowering node [{}] type [{}]", node.name_or_op(), node.op_type);
            op_builder.add_to_model_builder(self, node_id, node)?;
        }
        Ok(())
    }

    fn register_model_outputs(&mut self) -> Result<Vec<(String, Operand)>, BuildError> {
        let subgraph = self.subgraph;
        let mut outputs = vec![];
        for &value in subgraph.outputs() {
            let name = subgraph.value_name(value);
            let info = self.tensor_info(value, &name)?;
            if info.shape.is_empty() {
                self.scalar_outputs.insert(name.clone());
            }
            outputs.push((name.clone(), self.operand(value)?));
            self.output_names.push(name.clone());
            self.info.insert(name, info);
        }
        Ok(outputs)
    }

    /// Type and caller-facing shape of a boundary value.
    fn tensor_info(&self, value: ValueId, name: &str) -> Result<TensorInfo, BuildError> {
        let val = &self.subgraph.graph().values[value];
        let Some(shape) = val.shape.as_ref() else {
            return Err(BuildError::ShapeUnavailable(name.to_string()));
        };
        if shape.elem_ty != TensorElemType::F32 {
            return Err(BuildError::UnsupportedDataType {
                name: name.to_string(),
                elem_ty: shape.elem_ty,
            });
        }
        let dims = shape
            .dims
            .as_slice()
            .iter()
            .map(|dim| match dim.as_fixed() {
                Some(d) => Ok(d),
                None if self.options.dynamic_dims_as_one() => {
                    log::debug!("Dynamic dimension {dim:?} of '{name}' is taken as 1");
                    Ok(1)
                }
                None => Err(BuildError::ShapeUnavailable(name.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TensorInfo {
            elem_ty: shape.elem_ty,
            shape: dims,
        })
    }

    pub fn builder(&mut self) -> &mut dyn GraphBuilder {
        self.builder.as_mut()
    }

    pub fn model(&self) -> &'a Model {
        self.subgraph.model()
    }

    pub fn fusion(&self) -> &FusionPlan {
        &self.fusion
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    pub fn operand(&self, value: ValueId) -> Result<Operand, BuildError> {
        self.operands
            .get(&value)
            .copied()
            .ok_or_else(|| BuildError::MissingOperand(self.subgraph.value_name(value)))
    }

    pub fn add_operand(&mut self, value: ValueId, operand: Operand) {
        self.operands.insert(value, operand);
    }

    /// Registers `operand` as the `i`-th output of `node`, if that output
    /// exists.
    pub fn add_output_operand(&mut self, node: &Node, i: usize, operand: Operand) {
        if let Some(&value) = node.outputs.get(i) {
            self.add_operand(value, operand);
        }
    }

    pub fn shape(&self, value: ValueId) -> Result<Vec<usize>, BuildError> {
        helper::get_shape(self.model(), value)
            .ok_or_else(|| BuildError::ShapeUnavailable(self.subgraph.value_name(value)))
    }

    pub fn initializer(&self, value: ValueId) -> Option<&'a Tensor> {
        self.model().graph.inits.get(&value)
    }

    pub fn value_name(&self, value: ValueId) -> String {
        self.subgraph.value_name(value)
    }
}

/// Backend operands need at least one dimension; scalars become `[1]`.
fn backend_dims(dims: &[usize]) -> Result<Vec<u32>, BuildError> {
    if dims.is_empty() {
        return Ok(vec![1]);
    }
    dims.iter()
        .map(|&d| {
            u32::try_from(d)
                .map_err(|_| BuildError::Message(format!("Dimension {d} is too large").into()))
        })
        .collect()
}

#[test]
fn scalar_dims_become_rank_one() {
    assert_eq!(backend_dims(&[]).unwrap(), vec![1]);
    assert_eq!(backend_dims(&[2, 3]).unwrap(), vec![2, 3]);
}
