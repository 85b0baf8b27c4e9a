use webnn_ep_backend::{
    AutoPad, Conv2dOptions, ConvTranspose2dOptions, FilterOperandLayout, InputOperandLayout,
};
use webnn_ep_core::{
    model::Model,
    node::{Node, NodeId},
};

use super::{
    utils::{handle_auto_pad, input_value, ints_attr, to_u32, to_u32_array, AutoPadType},
    OpBuilder,
};
use crate::{helper::get_shape, model_builder::ModelBuilder, BuildError};

/// Conv and ConvTranspose on 2-D NCHW inputs.
pub struct ConvOpBuilder;

fn auto_pad_attr(node: &Node) -> Option<AutoPadType> {
    AutoPadType::from_attr(node.attrs.string("auto_pad").unwrap_or("NOTSET"))
}

fn spatial(shape: &[usize], node: &Node) -> Result<[usize; 2], BuildError> {
    match shape {
        &[_, _, h, w] => Ok([h, w]),
        _ => Err(BuildError::Message(
            format!("{} [{}] needs 4-D input and filter", node.op_type, node.name_or_op()).into(),
        )),
    }
}

/// Output size and `[h_begin, h_end, w_begin, w_end]` padding of a
/// ConvTranspose that carries `output_shape`. The total padding per axis is
/// `stride * (in - 1) + output_padding + (kernel - 1) * dilation + 1 - out`,
/// with the odd element at the end under SAME_UPPER and at the beginning
/// otherwise.
pub fn output_shape_padding(
    node: &Node,
    input_shape: &[usize],
    filter_shape: &[usize],
) -> Result<Option<([usize; 2], [usize; 4])>, BuildError> {
    let output_hw = match node.attrs.ints("output_shape") {
        Some(&[.., h, w]) => [h, w].map(|d| usize::try_from(d).ok()),
        Some(shape) => {
            return Err(BuildError::Message(
                format!("ConvTranspose output_shape {shape:?} is too short").into(),
            ))
        }
        None => return Ok(None),
    };
    let [Some(out_h), Some(out_w)] = output_hw else {
        return Err(BuildError::Message(
            format!("ConvTranspose output_shape {output_hw:?} must be non-negative").into(),
        ));
    };

    let input_hw = spatial(input_shape, node)?;
    let kernel_hw = spatial(filter_shape, node)?;
    let strides = ints_attr(node, "strides", [1, 1])?;
    let dilations = ints_attr(node, "dilations", [1, 1])?;
    let output_padding = ints_attr(node, "output_padding", [0, 0])?;
    let same_upper = auto_pad_attr(node) == Some(AutoPadType::SameUpper);

    let output = [out_h, out_w];
    let mut padding = [0; 4];
    for i in 0..2 {
        let full = strides[i] * input_hw[i].saturating_sub(1)
            + output_padding[i]
            + kernel_hw[i].saturating_sub(1) * dilations[i]
            + 1;
        let Some(total) = full.checked_sub(output[i]) else {
            return Err(BuildError::Message(
                format!(
                    "ConvTranspose [{}] output_shape {output:?} exceeds the full output",
                    node.name_or_op()
                )
                .into(),
            ));
        };
        let (begin, end) = if same_upper {
            (total / 2, total - total / 2)
        } else {
            (total - total / 2, total / 2)
        };
        padding[2 * i] = begin;
        padding[2 * i + 1] = end;
    }
    Ok(Some((output, padding)))
}

impl OpBuilder for ConvOpBuilder {
    fn add_to_model_builder(
        &self,
        model_builder: &mut ModelBuilder<'_>,
        node_id: NodeId,
        node: &Node,
    ) -> Result<(), BuildError> {
        let x = input_value(node, 0)?;
        let w = input_value(node, 1)?;
        let input = model_builder.operand(x)?;
        let filter = model_builder.operand(w)?;
        let bias = node
            .input(2)
            .map(|b| model_builder.operand(b))
            .transpose()?;
        let activation = model_builder.fusion().fused_activation(node_id);

        let strides = ints_attr(node, "strides", [1, 1])?;
        let dilations = ints_attr(node, "dilations", [1, 1])?;
        let pads = ints_attr(node, "pads", [0, 0, 0, 0])?;
        let groups = to_u32(node.attrs.int("group").unwrap_or(1), "group")?;
        let Some(auto_pad) = auto_pad_attr(node) else {
            return Err(BuildError::Message(
                format!("Conv [{}] has an unknown auto_pad", node.name_or_op()).into(),
            ));
        };
        // ONNX orders pads as [h_begin, w_begin, h_end, w_end].
        let padding = to_u32_array([pads[0], pads[2], pads[1], pads[3]])?;

        let input_shape = model_builder.shape(x)?;
        let filter_shape = model_builder.shape(w)?;

        let output = if node.op_type == "Conv" {
            let [kernel_h, kernel_w] = spatial(&filter_shape, node)?;
            let auto_pad = handle_auto_pad(
                &input_shape,
                kernel_h,
                kernel_w,
                &pads,
                &strides,
                &dilations,
                auto_pad,
            )?;
            let (auto_pad, padding) = match auto_pad {
                AutoPadType::SameUpper => (AutoPad::SameUpper, [0; 4]),
                AutoPadType::SameLower => (AutoPad::SameLower, [0; 4]),
                AutoPadType::Valid => (AutoPad::Explicit, [0; 4]),
                AutoPadType::NotSet => (AutoPad::Explicit, padding),
            };
            let options = Conv2dOptions {
                padding,
                strides: to_u32_array(strides)?,
                dilations: to_u32_array(dilations)?,
                auto_pad,
                groups,
                input_layout: InputOperandLayout::Nchw,
                filter_layout: FilterOperandLayout::Oihw,
                bias,
                activation,
            };
            model_builder.builder().conv2d(input, filter, &options)?
        } else {
            let output_padding = ints_attr(node, "output_padding", [0, 0])?;
            let (output_sizes, auto_pad, padding) =
                match output_shape_padding(node, &input_shape, &filter_shape)? {
                    Some((sizes, padding)) => (
                        Some(to_u32_array(sizes)?),
                        AutoPad::Explicit,
                        to_u32_array(padding)?,
                    ),
                    None => match auto_pad {
                        AutoPadType::SameUpper => (None, AutoPad::SameUpper, [0; 4]),
                        AutoPadType::SameLower => (None, AutoPad::SameLower, [0; 4]),
                        AutoPadType::Valid => (None, AutoPad::Explicit, [0; 4]),
                        AutoPadType::NotSet => (None, AutoPad::Explicit, padding),
                    },
                };
            let options = ConvTranspose2dOptions {
                padding,
                strides: to_u32_array(strides)?,
                dilations: to_u32_array(dilations)?,
                // Folded into the padding when output_shape is given.
                output_padding: if output_sizes.is_some() {
                    [0, 0]
                } else {
                    to_u32_array(output_padding)?
                },
                output_sizes,
                auto_pad,
                groups,
                input_layout: InputOperandLayout::Nchw,
                filter_layout: FilterOperandLayout::Iohw,
                bias,
                activation,
            };
            model_builder
                .builder()
                .conv_transpose2d(input, filter, &options)?
        };

        model_builder.add_output_operand(node, 0, output);
        Ok(())
    }

    fn is_op_supported_impl(&self, model: &Model, node: &Node) -> bool {
        let name = node.name_or_op();
        let Some(weight) = node.input(1) else {
            log::debug!("{} [{name}] has no weight", node.op_type);
            return false;
        };
        let Some(tensor) = model.graph.inits.get(&weight) else {
            log::debug!("The weight of {} [{name}] must be known", node.op_type);
            return false;
        };
        if tensor.dims().len() != 4 {
            log::debug!(
                "{} [{name}] dimension: {}. Only conv 2d is supported.",
                node.op_type,
                tensor.dims().len()
            );
            return false;
        }
        if auto_pad_attr(node).is_none() {
            log::debug!("{} [{name}] has an unknown auto_pad", node.op_type);
            return false;
        }
        if node.op_type == "ConvTranspose" {
            let Some(input_shape) = node.input(0).and_then(|x| get_shape(model, x)) else {
                log::debug!("ConvTranspose [{name}] input has no static shape");
                return false;
            };
            if let Err(e) = output_shape_padding(node, &input_shape, tensor.dims().as_slice()) {
                log::debug!("{e}");
                return false;
            }
        }
        true
    }

    fn supports_fused_activation(&self) -> bool {
        true
    }
}
