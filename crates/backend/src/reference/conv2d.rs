use ndarray::{Array4, ArrayD, ArrayView4, Ix4};

use crate::{
    options::{
        Activation, AutoPad, Conv2dOptions, ConvTranspose2dOptions, FilterOperandLayout,
        InputOperandLayout,
    },
    BackendError,
};

/// Convolution parameters with padding already resolved to explicit values.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ConvParams {
    /// `[beginning height, ending height, beginning width, ending width]`
    pub padding: [usize; 4],
    pub strides: [usize; 2],
    pub dilations: [usize; 2],
    pub groups: usize,
    pub nhwc: bool,
    pub filter_layout: FilterOperandLayout,
}

/// Positions of the O, I, H and W axes in a filter of the given layout.
fn filter_axes(layout: FilterOperandLayout) -> [usize; 4] {
    match layout {
        FilterOperandLayout::Oihw => [0, 1, 2, 3],
        FilterOperandLayout::Hwio => [3, 2, 0, 1],
        FilterOperandLayout::Ohwi => [0, 3, 1, 2],
        FilterOperandLayout::Ihwo => [3, 0, 1, 2],
        FilterOperandLayout::Iohw => [1, 0, 2, 3],
    }
}

fn nchw(input: &[usize], nhwc: bool) -> Result<[usize; 4], BackendError> {
    let &[n, a, b, c] = input else {
        return Err(BackendError::InvalidArgument(
            format!("Convolution input must be 4-D, got {input:?}").into(),
        ));
    };
    if input.contains(&0) {
        return Err(BackendError::InvalidArgument(
            format!("Convolution input must not be empty, got {input:?}").into(),
        ));
    }
    Ok(if nhwc { [n, c, a, b] } else { [n, a, b, c] })
}

fn filter_oihw(filter: &[usize], layout: FilterOperandLayout) -> Result<[usize; 4], BackendError> {
    if filter.len() != 4 || filter.contains(&0) {
        return Err(BackendError::InvalidArgument(
            format!("Convolution filter must be 4-D and non-empty, got {filter:?}").into(),
        ));
    }
    let [o, i, h, w] = filter_axes(layout);
    Ok([filter[o], filter[i], filter[h], filter[w]])
}

fn check_positive(what: &str, values: &[u32]) -> Result<(), BackendError> {
    if values.iter().any(|&v| v == 0) {
        return Err(BackendError::InvalidArgument(
            format!("{what} must be positive, got {values:?}").into(),
        ));
    }
    Ok(())
}

/// Splits the total padding of one spatial axis into `(begin, end)`.
fn same_padding(auto_pad: AutoPad, total: usize) -> (usize, usize) {
    let begin = match auto_pad {
        AutoPad::SameLower => total - total / 2,
        _ => total / 2,
    };
    (begin, total - begin)
}

fn resolve_padding(
    auto_pad: AutoPad,
    explicit: [u32; 4],
    totals: [usize; 2],
) -> [usize; 4] {
    match auto_pad {
        AutoPad::Explicit => explicit.map(|p| p as usize),
        _ => {
            let (hb, he) = same_padding(auto_pad, totals[0]);
            let (wb, we) = same_padding(auto_pad, totals[1]);
            [hb, he, wb, we]
        }
    }
}

fn output_dims(nhwc: bool, n: usize, c: usize, h: usize, w: usize) -> Vec<usize> {
    if nhwc {
        vec![n, h, w, c]
    } else {
        vec![n, c, h, w]
    }
}

/// Validates a convolution and computes its output shape.
pub(super) fn conv2d_shape(
    input: &[usize],
    filter: &[usize],
    options: &Conv2dOptions,
) -> Result<(ConvParams, Vec<usize>), BackendError> {
    check_positive("Strides", &options.strides)?;
    check_positive("Dilations", &options.dilations)?;
    check_positive("Groups", &[options.groups])?;

    let nhwc = options.input_layout == InputOperandLayout::Nhwc;
    let [n, c, ih, iw] = nchw(input, nhwc)?;
    let [oc, icpg, kh, kw] = filter_oihw(filter, options.filter_layout)?;
    let groups = options.groups as usize;
    if icpg * groups != c || oc % groups != 0 {
        return Err(BackendError::InvalidArgument(
            format!(
                "Convolution channels mismatch: input {c}, filter {oc}x{icpg}, groups {groups}"
            )
            .into(),
        ));
    }

    let strides = options.strides.map(|s| s as usize);
    let dilations = options.dilations.map(|d| d as usize);
    let ekh = (kh - 1) * dilations[0] + 1;
    let ekw = (kw - 1) * dilations[1] + 1;

    let totals = [
        ((ih + strides[0] - 1) / strides[0] - 1) * strides[0] + ekh,
        ((iw + strides[1] - 1) / strides[1] - 1) * strides[1] + ekw,
    ];
    let totals = [
        totals[0].saturating_sub(ih),
        totals[1].saturating_sub(iw),
    ];
    let padding = resolve_padding(options.auto_pad, options.padding, totals);

    let padded_h = ih + padding[0] + padding[1];
    let padded_w = iw + padding[2] + padding[3];
    if padded_h < ekh || padded_w < ekw {
        return Err(BackendError::InvalidArgument(
            "Convolution kernel is larger than the padded input".into(),
        ));
    }
    let oh = (padded_h - ekh) / strides[0] + 1;
    let ow = (padded_w - ekw) / strides[1] + 1;

    Ok((
        ConvParams {
            padding,
            strides,
            dilations,
            groups,
            nhwc,
            filter_layout: options.filter_layout,
        },
        output_dims(nhwc, n, oc, oh, ow),
    ))
}

/// Validates a transposed convolution and computes its output shape.
pub(super) fn conv_transpose2d_shape(
    input: &[usize],
    filter: &[usize],
    options: &ConvTranspose2dOptions,
) -> Result<(ConvParams, Vec<usize>), BackendError> {
    check_positive("Strides", &options.strides)?;
    check_positive("Dilations", &options.dilations)?;
    check_positive("Groups", &[options.groups])?;

    let nhwc = options.input_layout == InputOperandLayout::Nhwc;
    let [n, c, ih, iw] = nchw(input, nhwc)?;
    // For transposed filters the O/I letters of the layout name the
    // output-per-group and input channels respectively.
    let [ocpg, ic, kh, kw] = filter_oihw(filter, options.filter_layout)?;
    let groups = options.groups as usize;
    if ic != c || ic % groups != 0 {
        return Err(BackendError::InvalidArgument(
            format!("Transposed convolution channels mismatch: input {c}, filter {ic}").into(),
        ));
    }

    let strides = options.strides.map(|s| s as usize);
    let dilations = options.dilations.map(|d| d as usize);
    let output_padding = options.output_padding.map(|p| p as usize);
    let ekh = (kh - 1) * dilations[0] + 1;
    let ekw = (kw - 1) * dilations[1] + 1;
    let full_h = strides[0] * (ih - 1) + ekh;
    let full_w = strides[1] * (iw - 1) + ekw;

    let (padding, oh, ow) = match (options.output_sizes, options.auto_pad) {
        (Some([oh, ow]), AutoPad::Explicit) => {
            (options.padding.map(|p| p as usize), oh as usize, ow as usize)
        }
        (None, AutoPad::Explicit) => {
            let p = options.padding.map(|p| p as usize);
            let oh = (full_h + output_padding[0]).checked_sub(p[0] + p[1]);
            let ow = (full_w + output_padding[1]).checked_sub(p[2] + p[3]);
            let (Some(oh), Some(ow)) = (oh, ow) else {
                return Err(BackendError::InvalidArgument(
                    "Transposed convolution padding exceeds the output".into(),
                ));
            };
            (p, oh, ow)
        }
        (sizes, auto_pad) => {
            let [oh, ow] = sizes
                .map(|s| s.map(|s| s as usize))
                .unwrap_or([ih * strides[0], iw * strides[1]]);
            let totals = [
                (full_h + output_padding[0]).saturating_sub(oh),
                (full_w + output_padding[1]).saturating_sub(ow),
            ];
            (resolve_padding(auto_pad, [0; 4], totals), oh, ow)
        }
    };

    Ok((
        ConvParams {
            padding,
            strides,
            dilations,
            groups,
            nhwc,
            filter_layout: options.filter_layout,
        },
        output_dims(nhwc, n, ocpg * groups, oh, ow),
    ))
}

fn to_nchw(x: &ArrayD<f32>, nhwc: bool) -> Result<Array4<f32>, BackendError> {
    let x = x
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| BackendError::Compute(e.to_string().into()))?;
    Ok(if nhwc {
        x.permuted_axes([0, 3, 1, 2]).as_standard_layout().into_owned()
    } else {
        x.to_owned()
    })
}

fn filter_view<'a>(
    w: &'a ArrayD<f32>,
    layout: FilterOperandLayout,
) -> Result<ArrayView4<'a, f32>, BackendError> {
    let w = w
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|e| BackendError::Compute(e.to_string().into()))?;
    Ok(w.permuted_axes(filter_axes(layout)))
}

fn finish(
    mut out: Array4<f32>,
    bias: Option<&ArrayD<f32>>,
    activation: Option<Activation>,
    nhwc: bool,
) -> ArrayD<f32> {
    if let Some(bias) = bias {
        for (mut plane, &b) in out
            .axis_iter_mut(ndarray::Axis(1))
            .zip(bias.iter())
        {
            plane.mapv_inplace(|x| x + b);
        }
    }
    if let Some(act) = activation {
        out.mapv_inplace(|x| act.apply(x));
    }
    let out = if nhwc {
        out.permuted_axes([0, 2, 3, 1]).as_standard_layout().into_owned()
    } else {
        out
    };
    out.into_dyn()
}

pub(super) fn compute_conv2d(
    x: &ArrayD<f32>,
    w: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    activation: Option<Activation>,
    params: &ConvParams,
) -> Result<ArrayD<f32>, BackendError> {
    let x = to_nchw(x, params.nhwc)?;
    // Viewed as [out channels, in channels per group, kh, kw].
    let w = filter_view(w, params.filter_layout)?;

    let [batch, _, ih, iw] = [x.dim().0, x.dim().1, x.dim().2, x.dim().3];
    let [oc, icpg, kh, kw] = [w.dim().0, w.dim().1, w.dim().2, w.dim().3];
    let [pt, pb, pl, pr] = params.padding;
    let ekh = (kh - 1) * params.dilations[0] + 1;
    let ekw = (kw - 1) * params.dilations[1] + 1;
    let oh = (ih + pt + pb - ekh) / params.strides[0] + 1;
    let ow = (iw + pl + pr - ekw) / params.strides[1] + 1;
    let ocpg = oc / params.groups;

    let mut out = Array4::<f32>::zeros((batch, oc, oh, ow));
    for n in 0..batch {
        for o in 0..oc {
            let g = o / ocpg;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut sum = 0f32;
                    for i in 0..icpg {
                        let c = g * icpg + i;
                        for ky in 0..kh {
                            let y = (oy * params.strides[0] + ky * params.dilations[0])
                                .checked_sub(pt)
                                .filter(|&y| y < ih);
                            let Some(y) = y else { continue };
                            for kx in 0..kw {
                                let xx = (ox * params.strides[1] + kx * params.dilations[1])
                                    .checked_sub(pl)
                                    .filter(|&xx| xx < iw);
                                let Some(xx) = xx else { continue };
                                sum += x[[n, c, y, xx]] * w[[o, i, ky, kx]];
                            }
                        }
                    }
                    out[[n, o, oy, ox]] = sum;
                }
            }
        }
    }

    Ok(finish(out, bias, activation, params.nhwc))
}

pub(super) fn compute_conv_transpose2d(
    x: &ArrayD<f32>,
    w: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    activation: Option<Activation>,
    params: &ConvParams,
    out_hw: [usize; 2],
) -> Result<ArrayD<f32>, BackendError> {
    let x = to_nchw(x, params.nhwc)?;
    // Viewed as [out channels per group, in channels, kh, kw].
    let w = filter_view(w, params.filter_layout)?;

    let [batch, ic, ih, iw] = [x.dim().0, x.dim().1, x.dim().2, x.dim().3];
    let [ocpg, _, kh, kw] = [w.dim().0, w.dim().1, w.dim().2, w.dim().3];
    let icpg = ic / params.groups;
    let [oh, ow] = out_hw;
    let [pt, _, pl, _] = params.padding;

    let mut out = Array4::<f32>::zeros((batch, ocpg * params.groups, oh, ow));
    for n in 0..batch {
        for c in 0..ic {
            let g = c / icpg;
            for iy in 0..ih {
                for ix in 0..iw {
                    let v = x[[n, c, iy, ix]];
                    for o in 0..ocpg {
                        for ky in 0..kh {
                            let y = (iy * params.strides[0] + ky * params.dilations[0])
                                .checked_sub(pt)
                                .filter(|&y| y < oh);
                            let Some(y) = y else { continue };
                            for kx in 0..kw {
                                let xx = (ix * params.strides[1] + kx * params.dilations[1])
                                    .checked_sub(pl)
                                    .filter(|&xx| xx < ow);
                                let Some(xx) = xx else { continue };
                                out[[n, g * ocpg + o, y, xx]] += v * w[[o, c, ky, kx]];
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(finish(out, bias, activation, params.nhwc))
}
