use ndarray::{Array, ArrayD, IxDyn};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    conv2d::{conv2d_shape, conv_transpose2d_shape, ConvParams},
    gemm::{gemm_shape, matmul_shape},
    graph::ReferenceGraph,
    gru::{gru_shapes, GruParams},
};
use crate::{
    operand::{FusionOperator, Operand, OperandDescriptor, OperandType},
    options::{
        Activation, BatchNormalizationOptions, Conv2dOptions, ConvTranspose2dOptions,
        FillSequenceOptions, GemmOptions, GruOptions,
    },
    BackendError, Graph, GraphBuilder,
};

/// A recorded operation. Operands index `ReferenceGraphBuilder::descs`.
#[derive(Debug, Clone)]
pub(super) enum Op {
    Unary {
        x: Operand,
        activation: Activation,
        out: Operand,
    },
    BatchNormalization {
        x: Operand,
        mean: Operand,
        variance: Operand,
        scale: Option<Operand>,
        bias: Option<Operand>,
        axis: usize,
        epsilon: f32,
        activation: Option<Activation>,
        out: Operand,
    },
    Concat {
        inputs: Vec<Operand>,
        axis: usize,
        out: Operand,
    },
    Conv2d {
        x: Operand,
        filter: Operand,
        bias: Option<Operand>,
        activation: Option<Activation>,
        params: ConvParams,
        out: Operand,
    },
    ConvTranspose2d {
        x: Operand,
        filter: Operand,
        bias: Option<Operand>,
        activation: Option<Activation>,
        params: ConvParams,
        out: Operand,
    },
    MatMul {
        a: Operand,
        b: Operand,
        out: Operand,
    },
    Gemm {
        a: Operand,
        b: Operand,
        c: Option<Operand>,
        alpha: f32,
        beta: f32,
        a_transpose: bool,
        b_transpose: bool,
        out: Operand,
    },
    Gru {
        x: Operand,
        weight: Operand,
        recurrent_weight: Operand,
        bias: Option<Operand>,
        recurrent_bias: Option<Operand>,
        initial_hidden_state: Option<Operand>,
        params: GruParams,
        outs: Vec<Operand>,
    },
    Split {
        x: Operand,
        axis: usize,
        outs: Vec<Operand>,
    },
    FillSequence {
        start: f32,
        delta: f32,
        out: Operand,
    },
    Cast {
        x: Operand,
        ty: OperandType,
        out: Operand,
    },
}

#[derive(Default)]
pub struct ReferenceGraphBuilder {
    descs: Vec<OperandDescriptor>,
    constants: FxHashMap<Operand, ArrayD<f32>>,
    inputs: FxHashMap<String, Operand>,
    activations: Vec<Activation>,
    ops: Vec<Op>,
}

fn to_dims(shape: &[usize]) -> Vec<u32> {
    shape.iter().map(|&d| d as u32).collect()
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, BackendError> {
    Err(BackendError::InvalidArgument(msg.into().into()))
}

impl ReferenceGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_operand(&mut self, desc: OperandDescriptor) -> Operand {
        let id = Operand(self.descs.len() as u32);
        self.descs.push(desc);
        id
    }

    fn desc(&self, operand: Operand) -> Result<&OperandDescriptor, BackendError> {
        self.descs
            .get(operand.index())
            .ok_or(BackendError::InvalidOperand(operand))
    }

    fn shape(&self, operand: Operand) -> Result<Vec<usize>, BackendError> {
        Ok(self.desc(operand)?.shape())
    }

    fn float32(&self, operand: Operand) -> Result<Vec<usize>, BackendError> {
        let desc = self.desc(operand)?;
        if desc.ty != OperandType::Float32 {
            return invalid(format!("Operand {operand:?} must be float32"));
        }
        Ok(desc.shape())
    }

    fn lookup_activation(&self, handle: FusionOperator) -> Result<Activation, BackendError> {
        self.activations
            .get(handle.0 as usize)
            .copied()
            .ok_or_else(|| {
                BackendError::InvalidArgument(format!("Unknown activation {handle:?}").into())
            })
    }

    fn fused(
        &self,
        activation: Option<FusionOperator>,
    ) -> Result<Option<Activation>, BackendError> {
        activation.map(|a| self.lookup_activation(a)).transpose()
    }

    fn unary(&mut self, x: Operand, activation: Activation) -> Result<Operand, BackendError> {
        let shape = self.float32(x)?;
        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::Unary { x, activation, out });
        Ok(out)
    }

    fn check_per_channel(
        &self,
        operand: Option<Operand>,
        channels: usize,
        what: &str,
    ) -> Result<(), BackendError> {
        if let Some(operand) = operand {
            let shape = self.float32(operand)?;
            if shape != [channels] {
                return invalid(format!("{what} must be [{channels}], got {shape:?}"));
            }
        }
        Ok(())
    }
}

impl GraphBuilder for ReferenceGraphBuilder {
    fn constant(
        &mut self,
        desc: &OperandDescriptor,
        data: &[u8],
    ) -> Result<Operand, BackendError> {
        if desc.dimensions.is_empty() {
            return invalid("Constant must have at least one dimension");
        }
        if data.len() != desc.byte_len() {
            return invalid(format!(
                "Constant of {:?} needs {} bytes, got {}",
                desc.dimensions,
                desc.byte_len(),
                data.len()
            ));
        }

        let values: Vec<f32> = match desc.ty {
            OperandType::Float32 => data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            OperandType::Int32 => data
                .chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f32)
                .collect(),
            OperandType::Int64 => data
                .chunks_exact(8)
                .map(|b| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(b);
                    i64::from_le_bytes(buf) as f32
                })
                .collect(),
        };
        let array = Array::from_shape_vec(IxDyn(&desc.shape()), values)
            .map_err(|e| BackendError::InvalidArgument(e.to_string().into()))?;

        let operand = self.new_operand(desc.clone());
        self.constants.insert(operand, array);
        Ok(operand)
    }

    fn input(&mut self, name: &str, desc: &OperandDescriptor) -> Result<Operand, BackendError> {
        if desc.dimensions.is_empty() {
            return invalid(format!("Input '{name}' must have at least one dimension"));
        }
        if self.inputs.contains_key(name) {
            return invalid(format!("Duplicate input name '{name}'"));
        }
        let operand = self.new_operand(desc.clone());
        self.inputs.insert(name.to_string(), operand);
        Ok(operand)
    }

    fn activation(&mut self, activation: Activation) -> Result<FusionOperator, BackendError> {
        self.activations.push(activation);
        Ok(FusionOperator(self.activations.len() as u32 - 1))
    }

    fn relu(&mut self, x: Operand) -> Result<Operand, BackendError> {
        self.unary(x, Activation::Relu)
    }

    fn leaky_relu(&mut self, x: Operand, alpha: f32) -> Result<Operand, BackendError> {
        self.unary(x, Activation::LeakyRelu { alpha })
    }

    fn sigmoid(&mut self, x: Operand) -> Result<Operand, BackendError> {
        self.unary(x, Activation::Sigmoid)
    }

    fn tanh(&mut self, x: Operand) -> Result<Operand, BackendError> {
        self.unary(x, Activation::Tanh)
    }

    fn batch_normalization(
        &mut self,
        x: Operand,
        mean: Operand,
        variance: Operand,
        options: &BatchNormalizationOptions,
    ) -> Result<Operand, BackendError> {
        let shape = self.float32(x)?;
        let axis = options.axis as usize;
        let Some(&channels) = shape.get(axis) else {
            return invalid(format!("Batch normalization axis {axis} is out of range"));
        };
        self.check_per_channel(Some(mean), channels, "Mean")?;
        self.check_per_channel(Some(variance), channels, "Variance")?;
        self.check_per_channel(options.scale, channels, "Scale")?;
        self.check_per_channel(options.bias, channels, "Bias")?;
        let activation = self.fused(options.activation)?;

        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::BatchNormalization {
            x,
            mean,
            variance,
            scale: options.scale,
            bias: options.bias,
            axis,
            epsilon: options.epsilon,
            activation,
            out,
        });
        Ok(out)
    }

    fn concat(&mut self, inputs: &[Operand], axis: u32) -> Result<Operand, BackendError> {
        let Some((&first, rest)) = inputs.split_first() else {
            return invalid("Concat needs at least one input");
        };
        let axis = axis as usize;
        let mut shape = self.float32(first)?;
        if axis >= shape.len() {
            return invalid(format!("Concat axis {axis} is out of range"));
        }
        for &input in rest {
            let s = self.float32(input)?;
            let compatible = s.len() == shape.len()
                && s.iter()
                    .zip(shape.iter())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return invalid(format!("Concat inputs {shape:?} and {s:?} are incompatible"));
            }
            shape[axis] += s[axis];
        }

        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::Concat {
            inputs: inputs.to_vec(),
            axis,
            out,
        });
        Ok(out)
    }

    fn conv2d(
        &mut self,
        x: Operand,
        filter: Operand,
        options: &Conv2dOptions,
    ) -> Result<Operand, BackendError> {
        let (params, shape) =
            conv2d_shape(&self.float32(x)?, &self.float32(filter)?, options)?;
        let channels = shape[if params.nhwc { 3 } else { 1 }];
        self.check_per_channel(options.bias, channels, "Convolution bias")?;
        let activation = self.fused(options.activation)?;

        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::Conv2d {
            x,
            filter,
            bias: options.bias,
            activation,
            params,
            out,
        });
        Ok(out)
    }

    fn conv_transpose2d(
        &mut self,
        x: Operand,
        filter: Operand,
        options: &ConvTranspose2dOptions,
    ) -> Result<Operand, BackendError> {
        let (params, shape) =
            conv_transpose2d_shape(&self.float32(x)?, &self.float32(filter)?, options)?;
        let channels = shape[if params.nhwc { 3 } else { 1 }];
        self.check_per_channel(options.bias, channels, "Transposed convolution bias")?;
        let activation = self.fused(options.activation)?;

        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::ConvTranspose2d {
            x,
            filter,
            bias: options.bias,
            activation,
            params,
            out,
        });
        Ok(out)
    }

    fn matmul(&mut self, a: Operand, b: Operand) -> Result<Operand, BackendError> {
        let shape = matmul_shape(&self.float32(a)?, &self.float32(b)?)?;
        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::MatMul { a, b, out });
        Ok(out)
    }

    fn gemm(
        &mut self,
        a: Operand,
        b: Operand,
        options: &GemmOptions,
    ) -> Result<Operand, BackendError> {
        let c_shape = options.c.map(|c| self.float32(c)).transpose()?;
        let shape = gemm_shape(
            &self.float32(a)?,
            &self.float32(b)?,
            c_shape.as_deref(),
            options.a_transpose,
            options.b_transpose,
        )?;
        let out = self.new_operand(OperandDescriptor::float32(to_dims(&shape)));
        self.ops.push(Op::Gemm {
            a,
            b,
            c: options.c,
            alpha: options.alpha,
            beta: options.beta,
            a_transpose: options.a_transpose,
            b_transpose: options.b_transpose,
            out,
        });
        Ok(out)
    }

    fn gru(
        &mut self,
        x: Operand,
        weight: Operand,
        recurrent_weight: Operand,
        steps: u32,
        hidden_size: u32,
        options: &GruOptions,
    ) -> Result<Vec<Operand>, BackendError> {
        let activations = match &options.activations {
            Some(handles) => handles
                .iter()
                .map(|&h| self.lookup_activation(h))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![Activation::Sigmoid, Activation::Tanh],
        };
        let params = GruParams {
            steps: steps as usize,
            hidden_size: hidden_size as usize,
            reset_after: options.reset_after,
            return_sequence: options.return_sequence,
            direction: options.direction,
            layout: options.layout,
            activations,
        };
        let shapes = gru_shapes(
            &self.float32(x)?,
            &self.float32(weight)?,
            &self.float32(recurrent_weight)?,
            &params,
        )?;

        let num_dirs = params.num_directions();
        let gates = 3 * params.hidden_size;
        for (bias, what) in [
            (options.bias, "GRU bias"),
            (options.recurrent_bias, "GRU recurrent bias"),
        ] {
            if let Some(bias) = bias {
                let shape = self.float32(bias)?;
                if shape != [num_dirs, gates] {
                    return invalid(format!("{what} must be [{num_dirs}, {gates}], got {shape:?}"));
                }
            }
        }
        if let Some(h0) = options.initial_hidden_state {
            let shape = self.float32(h0)?;
            if shape != shapes[0] {
                return invalid(format!(
                    "GRU initial hidden state must be {:?}, got {shape:?}",
                    shapes[0]
                ));
            }
        }

        let outs = shapes
            .iter()
            .map(|s| self.new_operand(OperandDescriptor::float32(to_dims(s))))
            .collect::<Vec<_>>();
        self.ops.push(Op::Gru {
            x,
            weight,
            recurrent_weight,
            bias: options.bias,
            recurrent_bias: options.recurrent_bias,
            initial_hidden_state: options.initial_hidden_state,
            params,
            outs: outs.clone(),
        });
        Ok(outs)
    }

    fn split(&mut self, x: Operand, splits: u32, axis: u32) -> Result<Vec<Operand>, BackendError> {
        let desc = self.desc(x)?.clone();
        let axis = axis as usize;
        let splits = splits as usize;
        let Some(&len) = desc.dimensions.get(axis) else {
            return invalid(format!("Split axis {axis} is out of range"));
        };
        if splits == 0 || len as usize % splits != 0 {
            return invalid(format!("Cannot split {len} into {splits} equal parts"));
        }

        let mut dims = desc.dimensions.clone();
        dims[axis] = len / splits as u32;
        let outs = (0..splits)
            .map(|_| self.new_operand(OperandDescriptor::new(desc.ty, dims.clone())))
            .collect::<Vec<_>>();
        self.ops.push(Op::Split {
            x,
            axis,
            outs: outs.clone(),
        });
        Ok(outs)
    }

    fn fill_sequence(
        &mut self,
        ty: OperandType,
        dimensions: &[u32],
        options: &FillSequenceOptions,
    ) -> Result<Operand, BackendError> {
        let out = self.new_operand(OperandDescriptor::new(ty, dimensions.to_vec()));
        self.ops.push(Op::FillSequence {
            start: options.start,
            delta: options.delta,
            out,
        });
        Ok(out)
    }

    fn cast(&mut self, x: Operand, ty: OperandType) -> Result<Operand, BackendError> {
        let dims = self.desc(x)?.dimensions.clone();
        let out = self.new_operand(OperandDescriptor::new(ty, dims));
        self.ops.push(Op::Cast { x, ty, out });
        Ok(out)
    }

    fn build(
        self: Box<Self>,
        outputs: &[(&str, Operand)],
    ) -> Result<Box<dyn Graph + Send>, BackendError> {
        if outputs.is_empty() {
            return Err(BackendError::Build("Graph has no outputs".into()));
        }
        let mut names = FxHashSet::default();
        for &(name, operand) in outputs {
            if !names.insert(name) {
                return Err(BackendError::Build(
                    format!("Duplicate output name '{name}'").into(),
                ));
            }
            if self.inputs.contains_key(name) {
                return Err(BackendError::Build(
                    format!("Output name '{name}' is also an input name").into(),
                ));
            }
            self.desc(operand)?;
        }

        log::debug!(
            "Building reference graph: {} operands, {} ops, {} inputs, {} outputs",
            self.descs.len(),
            self.ops.len(),
            self.inputs.len(),
            outputs.len()
        );

        let this = *self;
        Ok(Box::new(ReferenceGraph::new(
            this.descs,
            this.constants,
            this.inputs,
            outputs
                .iter()
                .map(|&(name, operand)| (name.to_string(), operand))
                .collect(),
            this.ops,
        )))
    }
}

/// Reads back the descriptor of an operand. Used by tests.
#[cfg(test)]
impl ReferenceGraphBuilder {
    pub(crate) fn descriptor(&self, operand: Operand) -> Option<&OperandDescriptor> {
        self.descs.get(operand.index())
    }
}
