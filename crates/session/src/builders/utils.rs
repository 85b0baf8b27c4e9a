use webnn_ep_core::{node::Node, value::ValueId};

use crate::BuildError;

/// ONNX `auto_pad` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPadType {
    NotSet,
    Valid,
    SameUpper,
    SameLower,
}

impl AutoPadType {
    pub fn from_attr(s: &str) -> Option<Self> {
        match s {
            "NOTSET" | "" => Some(Self::NotSet),
            "VALID" => Some(Self::Valid),
            "SAME_UPPER" => Some(Self::SameUpper),
            "SAME_LOWER" => Some(Self::SameLower),
            _ => None,
        }
    }
}

/// The `i`-th input of `node`, which must be present.
pub fn input_value(node: &Node, i: usize) -> Result<ValueId, BuildError> {
    node.input(i).ok_or_else(|| {
        BuildError::Message(
            format!("{} [{}] has no input {i}", node.op_type, node.name_or_op()).into(),
        )
    })
}

/// Returns `(head, tail)` padding of one spatial axis for `auto_pad`.
pub fn compute_pad(
    in_size: usize,
    stride: usize,
    kernel: usize,
    dilation: usize,
    auto_pad: AutoPadType,
    explicit: (usize, usize),
) -> (usize, usize) {
    match auto_pad {
        AutoPadType::NotSet => explicit,
        AutoPadType::Valid => (0, 0),
        AutoPadType::SameUpper | AutoPadType::SameLower => {
            let out_size = (in_size + stride - 1) / stride;
            let dilated_kernel = (kernel - 1) * dilation + 1;
            let total = ((out_size - 1) * stride + dilated_kernel).saturating_sub(in_size);
            let head = if auto_pad == AutoPadType::SameLower {
                total - total / 2
            } else {
                total / 2
            };
            (head, total - head)
        }
    }
}

/// Tells whether explicit `pads` (`[h_begin, w_begin, h_end, w_end]`) can be
/// expressed as a same-padding mode. Returns `NotSet` if they cannot, in which
/// case the explicit values are used. All-zero pads stay explicit.
#[allow(clippy::too_many_arguments)]
pub fn handle_auto_pad(
    input_shape: &[usize],
    kernel_h: usize,
    kernel_w: usize,
    pads: &[usize; 4],
    strides: &[usize; 2],
    dilations: &[usize; 2],
    auto_pad: AutoPadType,
) -> Result<AutoPadType, BuildError> {
    if auto_pad != AutoPadType::NotSet {
        return Ok(auto_pad);
    }
    if pads.iter().all(|&p| p == 0) {
        return Ok(AutoPadType::NotSet);
    }
    let &[_, _, in_h, in_w] = input_shape else {
        return Err(BuildError::Message(
            format!("Convolution input must be 4-D, got {input_shape:?}").into(),
        ));
    };
    if strides.contains(&0) || dilations.contains(&0) || kernel_h == 0 || kernel_w == 0 {
        return Ok(AutoPadType::NotSet);
    }

    for candidate in [AutoPadType::SameUpper, AutoPadType::SameLower] {
        let (h_begin, h_end) =
            compute_pad(in_h, strides[0], kernel_h, dilations[0], candidate, (0, 0));
        let (w_begin, w_end) =
            compute_pad(in_w, strides[1], kernel_w, dilations[1], candidate, (0, 0));
        if [h_begin, w_begin, h_end, w_end] == *pads {
            return Ok(candidate);
        }
    }

    Ok(AutoPadType::NotSet)
}

/// Maps a possibly negative axis into `[0, rank)`.
pub fn handle_negative_axis(axis: i64, rank: usize) -> Result<usize, BuildError> {
    let rank = rank as i64;
    let normalized = if axis < 0 { axis + rank } else { axis };
    if normalized < 0 || normalized >= rank {
        return Err(BuildError::Message(
            format!("Axis {axis} is out of range for rank {rank}").into(),
        ));
    }
    Ok(normalized as usize)
}

pub fn to_u32(value: i64, what: &str) -> Result<u32, BuildError> {
    u32::try_from(value)
        .map_err(|_| BuildError::Message(format!("{what} must fit in u32, got {value}").into()))
}

/// Reads an `N`-element non-negative integer attribute.
pub fn ints_attr<const N: usize>(
    node: &Node,
    name: &str,
    default: [usize; N],
) -> Result<[usize; N], BuildError> {
    let Some(values) = node.attrs.ints(name) else {
        return Ok(default);
    };
    let mut out = [0; N];
    if values.len() != N {
        return Err(BuildError::Message(
            format!(
                "{} [{}] attribute '{name}' must have {N} values, got {values:?}",
                node.op_type,
                node.name_or_op()
            )
            .into(),
        ));
    }
    for (o, &v) in out.iter_mut().zip(values) {
        *o = usize::try_from(v).map_err(|_| {
            BuildError::Message(format!("Attribute '{name}' must be non-negative").into())
        })?;
    }
    Ok(out)
}

pub fn to_u32_array<const N: usize>(values: [usize; N]) -> Result<[u32; N], BuildError> {
    let mut out = [0; N];
    for (o, v) in out.iter_mut().zip(values) {
        *o = u32::try_from(v)
            .map_err(|_| BuildError::Message(format!("{v} does not fit in u32").into()))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pads_stay_explicit() {
        let auto_pad = handle_auto_pad(
            &[1, 1, 5, 5],
            3,
            3,
            &[0, 0, 0, 0],
            &[1, 1],
            &[1, 1],
            AutoPadType::NotSet,
        )
        .unwrap();
        assert_eq!(auto_pad, AutoPadType::NotSet);
    }

    #[test]
    fn same_pads_are_detected() {
        // 3x3 kernel, stride 1: one pixel on every side.
        let auto_pad = handle_auto_pad(
            &[1, 1, 5, 5],
            3,
            3,
            &[1, 1, 1, 1],
            &[1, 1],
            &[1, 1],
            AutoPadType::NotSet,
        )
        .unwrap();
        assert_eq!(auto_pad, AutoPadType::SameUpper);

        // 2x2 kernel, stride 1: total 1, placed at the end for SAME_UPPER.
        let upper = handle_auto_pad(
            &[1, 1, 4, 4],
            2,
            2,
            &[0, 0, 1, 1],
            &[1, 1],
            &[1, 1],
            AutoPadType::NotSet,
        )
        .unwrap();
        assert_eq!(upper, AutoPadType::SameUpper);

        let lower = handle_auto_pad(
            &[1, 1, 4, 4],
            2,
            2,
            &[1, 1, 0, 0],
            &[1, 1],
            &[1, 1],
            AutoPadType::NotSet,
        )
        .unwrap();
        assert_eq!(lower, AutoPadType::SameLower);

        // Asymmetric pads that match neither mode.
        let explicit = handle_auto_pad(
            &[1, 1, 4, 4],
            3,
            3,
            &[2, 0, 0, 0],
            &[1, 1],
            &[1, 1],
            AutoPadType::NotSet,
        )
        .unwrap();
        assert_eq!(explicit, AutoPadType::NotSet);
    }

    #[test]
    fn explicit_auto_pad_is_kept() {
        let auto_pad = handle_auto_pad(
            &[1, 1, 4, 4],
            3,
            3,
            &[0, 0, 0, 0],
            &[2, 2],
            &[1, 1],
            AutoPadType::SameLower,
        )
        .unwrap();
        assert_eq!(auto_pad, AutoPadType::SameLower);
    }

    #[test]
    fn pads_for_strided_same() {
        // ceil(5 / 2) = 3 outputs, (3 - 1) * 2 + 3 - 5 = 2 total.
        assert_eq!(
            compute_pad(5, 2, 3, 1, AutoPadType::SameUpper, (0, 0)),
            (1, 1)
        );
        // ceil(4 / 2) = 2 outputs, (2 - 1) * 2 + 3 - 4 = 1 total.
        assert_eq!(
            compute_pad(4, 2, 3, 1, AutoPadType::SameUpper, (0, 0)),
            (0, 1)
        );
        assert_eq!(
            compute_pad(4, 2, 3, 1, AutoPadType::SameLower, (0, 0)),
            (1, 0)
        );
        assert_eq!(compute_pad(4, 2, 3, 1, AutoPadType::Valid, (1, 1)), (0, 0));
        assert_eq!(compute_pad(4, 2, 3, 1, AutoPadType::NotSet, (1, 2)), (1, 2));
    }

    #[test]
    fn negative_axis() {
        assert_eq!(handle_negative_axis(-1, 4).unwrap(), 3);
        assert_eq!(handle_negative_axis(1, 4).unwrap(), 1);
        assert!(handle_negative_axis(4, 4).is_err());
        assert!(handle_negative_axis(-5, 4).is_err());
    }
}
