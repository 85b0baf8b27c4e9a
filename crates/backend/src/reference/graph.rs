use ndarray::{concatenate, Array, ArrayD, ArrayViewD, Axis, IxDyn};
use rustc_hash::FxHashMap;

use super::{
    builder::Op,
    conv2d::{compute_conv2d, compute_conv_transpose2d},
    gemm::{compute_gemm, compute_matmul},
    gru::compute_gru,
};
use crate::{
    operand::{Operand, OperandDescriptor, OperandType},
    BackendError, Graph,
};

/// An interpreted graph. Intermediate values live in per-graph slots that
/// are overwritten by every `compute` call.
pub struct ReferenceGraph {
    descs: Vec<OperandDescriptor>,
    constants: FxHashMap<Operand, ArrayD<f32>>,
    inputs: FxHashMap<String, Operand>,
    outputs: Vec<(String, Operand)>,
    ops: Vec<Op>,
    slots: Vec<Option<ArrayD<f32>>>,
}

impl ReferenceGraph {
    pub(super) fn new(
        descs: Vec<OperandDescriptor>,
        constants: FxHashMap<Operand, ArrayD<f32>>,
        inputs: FxHashMap<String, Operand>,
        outputs: Vec<(String, Operand)>,
        ops: Vec<Op>,
    ) -> Self {
        let slots = vec![None; descs.len()];
        Self {
            descs,
            constants,
            inputs,
            outputs,
            ops,
            slots,
        }
    }

    fn value(&self, operand: Operand) -> Result<&ArrayD<f32>, BackendError> {
        if let Some(c) = self.constants.get(&operand) {
            return Ok(c);
        }
        self.slots
            .get(operand.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                BackendError::Compute(format!("Operand {operand:?} has no value").into())
            })
    }

    fn opt_value(&self, operand: Option<Operand>) -> Result<Option<&ArrayD<f32>>, BackendError> {
        operand.map(|o| self.value(o)).transpose()
    }

    fn eval(&self, op: &Op) -> Result<Vec<(Operand, ArrayD<f32>)>, BackendError> {
        let computed = match op {
            Op::Unary { x, activation, out } => {
                let act = *activation;
                vec![(*out, self.value(*x)?.mapv(|v| act.apply(v)))]
            }
            Op::BatchNormalization {
                x,
                mean,
                variance,
                scale,
                bias,
                axis,
                epsilon,
                activation,
                out,
            } => {
                let per_channel = |o: Operand| -> Result<Vec<f32>, BackendError> {
                    Ok(self.value(o)?.iter().copied().collect())
                };
                let mut y = self.value(*x)?.to_owned();
                let mean = per_channel(*mean)?;
                let variance = per_channel(*variance)?;
                let scale = scale.map(per_channel).transpose()?;
                let bias = bias.map(per_channel).transpose()?;
                for (c, mut lane) in y.axis_iter_mut(Axis(*axis)).enumerate() {
                    let m = mean[c];
                    let d = (variance[c] + epsilon).sqrt();
                    let s = scale.as_ref().map_or(1.0, |s| s[c]);
                    let b = bias.as_ref().map_or(0.0, |b| b[c]);
                    lane.mapv_inplace(|v| {
                        let v = (v - m) / d * s + b;
                        activation.map_or(v, |a| a.apply(v))
                    });
                }
                vec![(*out, y)]
            }
            Op::Concat { inputs, axis, out } => {
                let views = inputs
                    .iter()
                    .map(|&i| self.value(i).map(|v| v.view()))
                    .collect::<Result<Vec<ArrayViewD<f32>>, _>>()?;
                let y = concatenate(Axis(*axis), &views)
                    .map_err(|e| BackendError::Compute(e.to_string().into()))?;
                vec![(*out, y)]
            }
            Op::Conv2d {
                x,
                filter,
                bias,
                activation,
                params,
                out,
            } => {
                let y = compute_conv2d(
                    self.value(*x)?,
                    self.value(*filter)?,
                    self.opt_value(*bias)?,
                    *activation,
                    params,
                )?;
                vec![(*out, y)]
            }
            Op::ConvTranspose2d {
                x,
                filter,
                bias,
                activation,
                params,
                out,
            } => {
                let dims = &self.descs[out.index()].dimensions;
                let out_hw = if params.nhwc {
                    [dims[1] as usize, dims[2] as usize]
                } else {
                    [dims[2] as usize, dims[3] as usize]
                };
                let y = compute_conv_transpose2d(
                    self.value(*x)?,
                    self.value(*filter)?,
                    self.opt_value(*bias)?,
                    *activation,
                    params,
                    out_hw,
                )?;
                vec![(*out, y)]
            }
            Op::MatMul { a, b, out } => {
                vec![(*out, compute_matmul(self.value(*a)?, self.value(*b)?)?)]
            }
            Op::Gemm {
                a,
                b,
                c,
                alpha,
                beta,
                a_transpose,
                b_transpose,
                out,
            } => {
                let y = compute_gemm(
                    self.value(*a)?,
                    self.value(*b)?,
                    self.opt_value(*c)?,
                    *alpha,
                    *beta,
                    *a_transpose,
                    *b_transpose,
                )?;
                vec![(*out, y)]
            }
            Op::Gru {
                x,
                weight,
                recurrent_weight,
                bias,
                recurrent_bias,
                initial_hidden_state,
                params,
                outs,
            } => {
                let ys = compute_gru(
                    self.value(*x)?,
                    self.value(*weight)?,
                    self.value(*recurrent_weight)?,
                    self.opt_value(*bias)?,
                    self.opt_value(*recurrent_bias)?,
                    self.opt_value(*initial_hidden_state)?,
                    params,
                )?;
                outs.iter().copied().zip(ys).collect()
            }
            Op::Split { x, axis, outs } => {
                let x = self.value(*x)?;
                let size = x.shape()[*axis] / outs.len();
                outs.iter()
                    .copied()
                    .zip(x.axis_chunks_iter(Axis(*axis), size))
                    .map(|(o, chunk)| (o, chunk.as_standard_layout().into_owned()))
                    .collect()
            }
            Op::FillSequence { start, delta, out } => {
                let desc = &self.descs[out.index()];
                let data = (0..desc.total_elems())
                    .map(|i| start + i as f32 * delta)
                    .collect::<Vec<_>>();
                let y = Array::from_shape_vec(IxDyn(&desc.shape()), data)
                    .map_err(|e| BackendError::Compute(e.to_string().into()))?;
                vec![(*out, round_to(y, desc.ty))]
            }
            Op::Cast { x, ty, out } => {
                vec![(*out, round_to(self.value(*x)?.to_owned(), *ty))]
            }
        };
        Ok(computed)
    }
}

/// Integer operands are carried as `f32` holding truncated values.
fn round_to(mut x: ArrayD<f32>, ty: OperandType) -> ArrayD<f32> {
    match ty {
        OperandType::Float32 => x,
        OperandType::Int32 | OperandType::Int64 => {
            x.mapv_inplace(f32::trunc);
            x
        }
    }
}

impl Graph for ReferenceGraph {
    fn compute(
        &mut self,
        inputs: &[(&str, &[f32])],
        outputs: &mut [(&str, &mut [f32])],
    ) -> Result<(), BackendError> {
        self.slots.iter_mut().for_each(|s| *s = None);

        for &(name, data) in inputs {
            let operand = *self.inputs.get(name).ok_or_else(|| {
                BackendError::Compute(format!("Unknown input '{name}'").into())
            })?;
            let desc = &self.descs[operand.index()];
            if data.len() != desc.total_elems() {
                return Err(BackendError::Compute(
                    format!(
                        "Input '{name}' has {} elements, expected {:?}",
                        data.len(),
                        desc.dimensions
                    )
                    .into(),
                ));
            }
            let array = Array::from_shape_vec(IxDyn(&desc.shape()), data.to_vec())
                .map_err(|e| BackendError::Compute(e.to_string().into()))?;
            self.slots[operand.index()] = Some(array);
        }

        for i in 0..self.ops.len() {
            let results = self.eval(&self.ops[i])?;
            for (operand, value) in results {
                self.slots[operand.index()] = Some(value);
            }
        }

        for (name, buf) in outputs.iter_mut() {
            let name: &str = name;
            let operand = self
                .outputs
                .iter()
                .find(|(n, _)| n == name)
                .map(|&(_, o)| o)
                .ok_or_else(|| {
                    BackendError::Compute(format!("Unknown output '{name}'").into())
                })?;
            let value = self.value(operand)?;
            if value.len() != buf.len() {
                return Err(BackendError::Compute(
                    format!(
                        "Output '{name}' has {} elements, buffer holds {}",
                        value.len(),
                        buf.len()
                    )
                    .into(),
                ));
            }
            for (dst, src) in buf.iter_mut().zip(value.iter()) {
                *dst = *src;
            }
        }

        Ok(())
    }
}
