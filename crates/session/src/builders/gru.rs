use webnn_ep_backend::{Activation, GruOptions, RecurrentNetworkDirection};
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
    tensor::{Tensor, TensorElemType},
};

use super::{
    has_elem_type,
    utils::{input_value, to_u32},
    OpBuilder,
};
use crate::{
    helper::{get_shape, is_input_supported},
    model_builder::{ModelBuilder, SkipSets},
    BuildError,
};

pub struct GruOpBuilder;

const SEQUENCE_LENS: usize = 4;
const UNSUPPORTED_ATTRS: [&str; 3] = ["activation_alpha", "activation_beta", "clip"];

fn activation_names(node: &Node) -> Vec<String> {
    node.attrs
        .strings("activations")
        .map(<[String]>::to_vec)
        .unwrap_or_else(|| vec!["Sigmoid".into(), "Tanh".into()])
}

fn activation_from_name(name: &str) -> Option<Activation> {
    match name {
        "Relu" => Some(Activation::Relu),
        "Sigmoid" => Some(Activation::Sigmoid),
        "Tanh" => Some(Activation::Tanh),
        _ => None,
    }
}

/// Sequence lengths of an integral constant.
fn sequence_lens(tensor: &Tensor) -> Option<Vec<i64>> {
    match tensor.elem_ty() {
        TensorElemType::I32 => Some(tensor.data::<i32>().iter().map(|&l| l as i64).collect()),
        TensorElemType::I64 => Some(tensor.data::<i64>().to_vec()),
        _ => None,
    }
}

impl OpBuilder for GruOpBuilder {
    fn add_initializers_to_skip(&self, node: &Node, skip: &mut SkipSets) {
        if let Some(lens) = node.input(SEQUENCE_LENS) {
            skip.skip_initializer(lens);
            skip.skip_input(lens);
        }
    }

    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        _node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let x = input_value(node, 0)?;
        let r = input_value(node, 2)?;
        let input = model_builder.operand(x)?;
        let weight = model_builder.operand(input_value(node, 1)?)?;
        let recurrent_weight = model_builder.operand(r)?;

        let input_shape = model_builder.shape(x)?;
        let seq_length = input_shape.first().copied().unwrap_or(0) as i64;
        let steps = node
            .input(SEQUENCE_LENS)
            .and_then(|v| model_builder.initializer(v))
            .and_then(sequence_lens)
            .and_then(|lens| lens.first().copied())
            .unwrap_or(seq_length);
        // Y keeps seq_length steps.
        if steps != seq_length {
            return Err(BuildError::Message(
                format!(
                    "GRU [{}] runs {steps} steps but seq_length is {seq_length}",
                    node.name_or_op()
                )
                .into(),
            ));
        }

        let recurrent_shape = model_builder.shape(r)?;
        let hidden_size = match node.attrs.int("hidden_size") {
            Some(hidden_size) => hidden_size,
            None => recurrent_shape.get(2).copied().unwrap_or(0) as i64,
        };

        let mut options = GruOptions::default();
        // ONNX packs [Wb, Rb] into one tensor.
        if let Some(b) = node.input(3) {
            let bias = model_builder.operand(b)?;
            let halves = model_builder.builder().split(bias, 2, 1)?;
            options.bias = halves.first().copied();
            options.recurrent_bias = halves.get(1).copied();
        }
        if let Some(h0) = node.input(5) {
            options.initial_hidden_state = Some(model_builder.operand(h0)?);
        }
        options.reset_after = node.attrs.int("linear_before_reset").unwrap_or(0) != 0;
        options.return_sequence = true;
        options.direction = match node.attrs.string("direction").unwrap_or("forward") {
            "reverse" => RecurrentNetworkDirection::Backward,
            "bidirectional" => RecurrentNetworkDirection::Both,
            _ => RecurrentNetworkDirection::Forward,
        };

        let mut activations = vec![];
        for name in activation_names(node) {
            let Some(activation) = activation_from_name(&name) else {
                return Err(BuildError::UnsupportedOperator {
                    node: node.name_or_op().to_string(),
                    op_type: format!("GRU activation {name}"),
                });
            };
            activations.push(model_builder.builder().activation(activation)?);
        }
        options.activations = Some(activations);

        let outputs = model_builder.builder().gru(
            input,
            weight,
            recurrent_weight,
            to_u32(steps, "GRU steps")?,
            to_u32(hidden_size, "GRU hidden_size")?,
            &options,
        )?;
        let (Some(&hidden), Some(&sequence)) = (outputs.first(), outputs.get(1)) else {
            return Err(BuildError::Message(
                format!("GRU [{}] produced {} outputs", node.name_or_op(), outputs.len()).into(),
            ));
        };
        // The backend returns [Y_h, Y]; ONNX orders them [Y, Y_h].
        model_builder.add_output_operand(node, 0, sequence);
        model_builder.add_output_operand(node, 1, hidden);
        Ok(())
    }

    fn has_supported_inputs(&self, model: &Model, node: &Node) -> bool {
        node.inputs.iter().enumerate().all(|(i, input)| {
            let Some(input) = *input else {
                return true;
            };
            if !is_input_supported(model, input, &node.op_type) {
                return false;
            }
            // sequence_lens is integral.
            i == SEQUENCE_LENS || has_elem_type(model, node, input, &[TensorElemType::F32])
        })
    }

    fn is_op_supported_impl(&self, model: &Model, node: &Node) -> bool {
        if let Some(lens) = node
            .input(SEQUENCE_LENS)
            .and_then(|v| model.graph.inits.get(&v))
        {
            let Some(lens) = sequence_lens(lens) else {
                log::debug!("GRU: sequence_lens must be integers");
                return false;
            };
            if lens.windows(2).any(|w| w[0] != w[1]) {
                log::debug!("GRU: values in sequence_lens should be the same.");
                return false;
            }
            // Y keeps seq_length steps.
            let seq_length = node
                .input(0)
                .and_then(|x| get_shape(model, x))
                .and_then(|shape| shape.first().copied());
            if let (Some(&len), Some(seq_length)) = (lens.first(), seq_length) {
                if len != seq_length as i64 {
                    log::debug!("GRU: sequence_lens {len} differs from seq_length {seq_length}.");
                    return false;
                }
            }
        }

        for attr in UNSUPPORTED_ATTRS {
            if node.attrs.contains(attr) {
                log::debug!("GRU unsupported attribute: {attr}");
                return false;
            }
        }

        let activations = activation_names(node);
        let direction = node.attrs.string("direction").unwrap_or("forward");
        if activations.len() == 4 && direction != "bidirectional" {
            log::debug!("GRU: a list of 4 activation functions must be bidirectional direction.");
            return false;
        }
        if let Some(name) = activations
            .iter()
            .find(|name| activation_from_name(name).is_none())
        {
            log::debug!("GRU unsupported activation: {name}");
            return false;
        }

        if node.attrs.int("linear_before_reset").unwrap_or(0) != 0 {
            log::debug!("GRU unsupported linear_before_reset = true.");
            return false;
        }
        if node.attrs.int("layout").unwrap_or(0) == 1 {
            log::debug!("GRU unsupported layout = 1, i.e. 'rzn' layout.");
            return false;
        }

        true
    }

    fn min_supported_opset(&self, _node: &Node) -> i64 {
        7
    }
}
