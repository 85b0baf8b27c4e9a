use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};
use webnn_ep_backend::Graph;
use webnn_ep_core::tensor::{Tensor, TensorElemType};

use crate::PredictError;

/// Element type and caller-facing shape of a model input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    pub elem_ty: TensorElemType,
    pub shape: Vec<usize>,
}

/// A compiled subgraph. Inference calls on one model are serialized.
pub struct CompiledModel {
    graph: Mutex<Box<dyn Graph + Send>>,
    inputs: Vec<String>,
    outputs: Vec<String>,
    scalar_outputs: FxHashSet<String>,
    info: FxHashMap<String, TensorInfo>,
    input_map: FxHashMap<String, usize>,
    output_map: FxHashMap<String, usize>,
}

impl CompiledModel {
    pub fn new(
        graph: Box<dyn Graph + Send>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        scalar_outputs: FxHashSet<String>,
        info: FxHashMap<String, TensorInfo>,
    ) -> Self {
        let input_map = inputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let output_map = outputs
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            graph: Mutex::new(graph),
            inputs,
            outputs,
            scalar_outputs,
            info,
            input_map,
            output_map,
        }
    }

    /// Runs the model once. Every input must be given; outputs may be a
    /// subset of the model outputs. Buffers must be float32 and match the
    /// caller-facing shapes, where scalar outputs are rank 0.
    pub fn predict(
        &self,
        inputs: &FxHashMap<&str, &Tensor>,
        outputs: &mut FxHashMap<&str, &mut Tensor>,
    ) -> Result<(), PredictError> {
        let mut input_bufs = Vec::with_capacity(self.inputs.len());
        for name in &self.inputs {
            let tensor = inputs
                .get(name.as_str())
                .ok_or_else(|| PredictError::UnknownTensor(name.clone()))?;
            self.check(name, tensor)?;
            let Some(data) = tensor.try_data::<f32>() else {
                return Err(PredictError::UnsupportedDataType {
                    name: name.clone(),
                    elem_ty: tensor.elem_ty(),
                });
            };
            input_bufs.push((name.as_str(), data));
        }

        let mut output_bufs = Vec::with_capacity(outputs.len());
        for (&name, tensor) in outputs.iter_mut() {
            if !self.output_map.contains_key(name) {
                return Err(PredictError::UnknownTensor(name.to_string()));
            }
            self.check(name, tensor)?;
            let elem_ty = tensor.elem_ty();
            let Some(data) = tensor.try_data_mut::<f32>() else {
                return Err(PredictError::UnsupportedDataType {
                    name: name.to_string(),
                    elem_ty,
                });
            };
            output_bufs.push((name, data));
        }

        let mut graph = self
            .graph
            .lock()
            .map_err(|_| PredictError::Message("Graph lock is poisoned".into()))?;
        graph.compute(&input_bufs, &mut output_bufs)?;

        Ok(())
    }

    fn check(&self, name: &str, tensor: &Tensor) -> Result<(), PredictError> {
        let info = self
            .info
            .get(name)
            .ok_or_else(|| PredictError::UnknownTensor(name.to_string()))?;
        if tensor.elem_ty() != TensorElemType::F32 {
            return Err(PredictError::UnsupportedDataType {
                name: name.to_string(),
                elem_ty: tensor.elem_ty(),
            });
        }
        if tensor.dims().as_slice() != info.shape.as_slice() {
            return Err(PredictError::ShapeMismatch {
                name: name.to_string(),
                expected: info.shape.clone(),
                actual: tensor.dims().to_vec(),
            });
        }
        Ok(())
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn scalar_outputs(&self) -> &FxHashSet<String> {
        &self.scalar_outputs
    }

    pub fn is_scalar_output(&self, name: &str) -> bool {
        self.scalar_outputs.contains(name)
    }

    pub fn input_output_info(&self, name: &str) -> Option<&TensorInfo> {
        self.info.get(name)
    }

    /// Position of each input in the caller's input list.
    pub fn input_map(&self) -> &FxHashMap<String, usize> {
        &self.input_map
    }

    pub fn output_map(&self) -> &FxHashMap<String, usize> {
        &self.output_map
    }

    pub fn set_input_map(&mut self, input_map: FxHashMap<String, usize>) {
        self.input_map = input_map;
    }

    pub fn set_output_map(&mut self, output_map: FxHashMap<String, usize>) {
        self.output_map = output_map;
    }

    /// Allocates zeroed output tensors with caller-facing shapes, in
    /// `outputs()` order.
    pub fn alloc_outputs(&self) -> Vec<Tensor> {
        self.outputs
            .iter()
            .map(|name| {
                let shape = self
                    .info
                    .get(name)
                    .map(|info| info.shape.clone())
                    .unwrap_or_default();
                Tensor::zeros::<f32>(shape.into())
            })
            .collect()
    }
}
