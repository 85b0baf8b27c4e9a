use rustc_hash::FxHashMap;
use webnn_ep_backend::{reference::ReferenceBackend, Backend};
use webnn_ep_core::{model::Model, node::NodeId, tensor::Tensor};

use crate::{
    helper::get_supported_nodes, model::CompiledModel, model_builder::ModelBuilder,
    options::ProviderOptions, subgraph::SubGraph, BuildError, PredictError,
};

/// Claims the supported parts of a model and runs them on a backend.
pub struct WebNNExecutionProvider {
    options: ProviderOptions,
    backend: Box<dyn Backend + Send + Sync>,
}

impl WebNNExecutionProvider {
    /// A provider running on the reference CPU backend.
    pub fn new(options: ProviderOptions) -> Self {
        Self::with_backend(options, ReferenceBackend::new())
    }

    pub fn with_backend(
        options: ProviderOptions,
        backend: impl Backend + Send + Sync + 'static,
    ) -> Self {
        Self {
            options,
            backend: Box::new(backend),
        }
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    /// Partitions `model` into groups of supported nodes, in topological
    /// order.
    pub fn get_capability(&self, model: &Model) -> Vec<Vec<NodeId>> {
        let groups = get_supported_nodes(model);
        let num_supported = groups.iter().map(Vec::len).sum::<usize>();
        log::info!(
            "WebNN: {} partitions, {num_supported} of {} nodes supported",
            groups.len(),
            model.graph.nodes.len()
        );
        groups
    }

    /// Compiles one partition. The returned model takes its inputs in
    /// `SubGraph::inputs` order and produces outputs in `SubGraph::outputs`
    /// order when driven through [`Self::run`].
    pub fn compile(&self, model: &Model, nodes: &[NodeId]) -> Result<CompiledModel, BuildError> {
        let subgraph = SubGraph::new(model, nodes);
        let mut compiled =
            ModelBuilder::new(&subgraph, self.backend.as_ref(), self.options)?.compile()?;

        let input_map = subgraph
            .inputs()
            .iter()
            .enumerate()
            .map(|(i, &v)| (subgraph.value_name(v), i))
            .filter(|(name, _)| compiled.inputs().contains(name))
            .collect();
        let output_map = subgraph
            .outputs()
            .iter()
            .enumerate()
            .map(|(i, &v)| (subgraph.value_name(v), i))
            .collect();
        compiled.set_input_map(input_map);
        compiled.set_output_map(output_map);

        Ok(compiled)
    }

    /// Runs `model` on tensors ordered like its partition's inputs and
    /// returns its outputs in partition order.
    pub fn run(
        &self,
        model: &CompiledModel,
        inputs: &[&Tensor],
    ) -> Result<Vec<Tensor>, PredictError> {
        let mut input_tensors = FxHashMap::default();
        for name in model.inputs() {
            let tensor = model
                .input_map()
                .get(name)
                .and_then(|&i| inputs.get(i))
                .ok_or_else(|| PredictError::UnknownTensor(name.clone()))?;
            input_tensors.insert(name.as_str(), *tensor);
        }

        let mut outputs = model.alloc_outputs();
        {
            let mut output_tensors = model
                .outputs()
                .iter()
                .map(String::as_str)
                .zip(outputs.iter_mut())
                .collect::<FxHashMap<_, _>>();
            model.predict(&input_tensors, &mut output_tensors)?;
        }

        let mut ordered = outputs.into_iter().map(Some).collect::<Vec<_>>();
        let mut results = vec![None; ordered.len()];
        for (name, slot) in model.outputs().iter().zip(ordered.iter_mut()) {
            let Some(&i) = model.output_map().get(name) else {
                return Err(PredictError::UnknownTensor(name.clone()));
            };
            let Some(result) = results.get_mut(i) else {
                return Err(PredictError::UnknownTensor(name.clone()));
            };
            *result = slot.take();
        }
        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PredictError::Message("Output mapping is not a permutation".into()))
    }
}

impl Default for WebNNExecutionProvider {
    fn default() -> Self {
        Self::new(ProviderOptions::default())
    }
}
