use ndarray::{s, Array2, Array3, Array4, ArrayD, ArrayView2, Axis, Ix2, Ix3};

use crate::{
    options::{Activation, GruWeightLayout, RecurrentNetworkDirection},
    BackendError,
};

#[derive(Debug, Clone, PartialEq)]
pub(super) struct GruParams {
    pub steps: usize,
    pub hidden_size: usize,
    pub reset_after: bool,
    pub return_sequence: bool,
    pub direction: RecurrentNetworkDirection,
    pub layout: GruWeightLayout,
    /// Either `[f, g]` for every direction or `[f, g]` per direction.
    pub activations: Vec<Activation>,
}

impl GruParams {
    pub fn num_directions(&self) -> usize {
        match self.direction {
            RecurrentNetworkDirection::Both => 2,
            _ => 1,
        }
    }
}

/// Validates a GRU and returns the output shapes: the final hidden state and,
/// if requested, the hidden state sequence.
pub(super) fn gru_shapes(
    x: &[usize],
    weight: &[usize],
    recurrent_weight: &[usize],
    params: &GruParams,
) -> Result<Vec<Vec<usize>>, BackendError> {
    let invalid = |msg: String| Err(BackendError::InvalidArgument(msg.into()));

    let &[seq_len, batch, input_size] = x else {
        return invalid(format!("GRU input must be 3-D, got {x:?}"));
    };
    let num_dirs = params.num_directions();
    let h = params.hidden_size;
    if params.steps == 0 || params.steps > seq_len {
        return invalid(format!(
            "GRU steps ({}) must be in 1..={seq_len}",
            params.steps
        ));
    }
    if weight != [num_dirs, 3 * h, input_size] {
        return invalid(format!(
            "GRU weight must be [{num_dirs}, {}, {input_size}], got {weight:?}",
            3 * h
        ));
    }
    if recurrent_weight != [num_dirs, 3 * h, h] {
        return invalid(format!(
            "GRU recurrent weight must be [{num_dirs}, {}, {h}], got {recurrent_weight:?}",
            3 * h
        ));
    }
    if !matches!(params.activations.len(), 2 | 4) {
        return invalid(format!(
            "GRU takes 2 or 4 activations, got {}",
            params.activations.len()
        ));
    }

    let mut shapes = vec![vec![num_dirs, batch, h]];
    if params.return_sequence {
        shapes.push(vec![params.steps, num_dirs, batch, h]);
    }
    Ok(shapes)
}

fn as_ix<D: ndarray::Dimension>(
    x: &ArrayD<f32>,
) -> Result<ndarray::ArrayView<'_, f32, D>, BackendError> {
    x.view()
        .into_dimensionality::<D>()
        .map_err(|e| BackendError::Compute(e.to_string().into()))
}

pub(super) fn compute_gru(
    x: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    recurrent_weight: &ArrayD<f32>,
    bias: Option<&ArrayD<f32>>,
    recurrent_bias: Option<&ArrayD<f32>>,
    initial_hidden_state: Option<&ArrayD<f32>>,
    params: &GruParams,
) -> Result<Vec<ArrayD<f32>>, BackendError> {
    let x = as_ix::<Ix3>(x)?;
    let w = as_ix::<Ix3>(weight)?;
    let r = as_ix::<Ix3>(recurrent_weight)?;
    let bias = bias.map(as_ix::<Ix2>).transpose()?;
    let recurrent_bias = recurrent_bias.map(as_ix::<Ix2>).transpose()?;
    let h0 = initial_hidden_state.map(as_ix::<Ix3>).transpose()?;

    let num_dirs = params.num_directions();
    let batch = x.dim().1;
    let h = params.hidden_size;
    let (z_gate, r_gate) = match params.layout {
        GruWeightLayout::Zrn => (0..h, h..2 * h),
        GruWeightLayout::Rzn => (h..2 * h, 0..h),
    };
    let n_gate = 2 * h..3 * h;

    let mut final_state = Array3::<f32>::zeros((num_dirs, batch, h));
    let mut sequence = Array4::<f32>::zeros((params.steps, num_dirs, batch, h));

    for dir in 0..num_dirs {
        let backward = params.direction == RecurrentNetworkDirection::Backward || dir == 1;
        let (f, g) = match params.activations.as_slice() {
            [_, _, f, g] if dir == 1 => (*f, *g),
            [f, g, ..] => (*f, *g),
            _ => return Err(BackendError::Compute("GRU activations missing".into())),
        };

        let w = w.index_axis(Axis(0), dir);
        let r = r.index_axis(Axis(0), dir);
        let zeros = Array2::<f32>::zeros((1, 3 * h));
        let wb = bias.as_ref().map_or(zeros.row(0), |b| b.row(dir));
        let rb = recurrent_bias
            .as_ref()
            .map_or(zeros.row(0), |b| b.row(dir));

        let mut ht: Array2<f32> = match h0 {
            Some(h0) => h0.index_axis(Axis(0), dir).to_owned(),
            None => Array2::zeros((batch, h)),
        };

        let r_n = r.slice(s![n_gate.clone(), ..]);
        for step in 0..params.steps {
            let t = if backward { params.steps - 1 - step } else { step };
            let xt: ArrayView2<f32> = x.index_axis(Axis(0), t);

            let gx = xt.dot(&w.t()) + &wb;
            let gh = ht.dot(&r.t()) + &rb;

            let z = (&gx.slice(s![.., z_gate.clone()]) + &gh.slice(s![.., z_gate.clone()]))
                .mapv(|v| f.apply(v));
            let rt = (&gx.slice(s![.., r_gate.clone()]) + &gh.slice(s![.., r_gate.clone()]))
                .mapv(|v| f.apply(v));
            let n_in = if params.reset_after {
                &gx.slice(s![.., n_gate.clone()]) + &(&rt * &gh.slice(s![.., n_gate.clone()]))
            } else {
                let rh = &rt * &ht;
                &gx.slice(s![.., n_gate.clone()])
                    + &rh.dot(&r_n.t())
                    + &rb.slice(s![n_gate.clone()])
            };
            let n = n_in.mapv(|v| g.apply(v));

            ht = &n * &z.mapv(|v| 1.0 - v) + &z * &ht;
            sequence.slice_mut(s![t, dir, .., ..]).assign(&ht);
        }
        final_state.slice_mut(s![dir, .., ..]).assign(&ht);
    }

    let mut outputs = vec![final_state.into_dyn()];
    if params.return_sequence {
        outputs.push(sequence.into_dyn());
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    fn params(direction: RecurrentNetworkDirection, steps: usize) -> GruParams {
        GruParams {
            steps,
            hidden_size: 1,
            reset_after: true,
            return_sequence: true,
            direction,
            layout: GruWeightLayout::Zrn,
            activations: vec![Activation::Sigmoid, Activation::Tanh],
        }
    }

    #[test]
    fn shapes() {
        let p = params(RecurrentNetworkDirection::Both, 3);
        assert_eq!(
            gru_shapes(&[3, 2, 4], &[2, 3, 4], &[2, 3, 1], &p).unwrap(),
            vec![vec![2, 2, 1], vec![3, 2, 2, 1]]
        );
        assert!(gru_shapes(&[3, 2, 4], &[1, 3, 4], &[1, 3, 1], &p).is_err());
        let p = params(RecurrentNetworkDirection::Forward, 4);
        assert!(gru_shapes(&[3, 2, 4], &[1, 3, 4], &[1, 3, 1], &p).is_err());
    }

    #[test]
    fn zero_weights_halve_state() {
        // z = r = sigmoid(0) = 0.5 and n = tanh(0) = 0, so h_t = h_{t-1} / 2.
        let x = Array::zeros(IxDyn(&[2, 1, 1]));
        let w = Array::zeros(IxDyn(&[1, 3, 1]));
        let r = Array::zeros(IxDyn(&[1, 3, 1]));
        let h0 = Array::ones(IxDyn(&[1, 1, 1]));
        let out = compute_gru(
            &x,
            &w,
            &r,
            None,
            None,
            Some(&h0),
            &params(RecurrentNetworkDirection::Forward, 2),
        )
        .unwrap();
        assert_eq!(out[0].iter().copied().collect::<Vec<_>>(), vec![0.25]);
        assert_eq!(out[1].shape(), &[2, 1, 1, 1]);
        assert_eq!(out[1].iter().copied().collect::<Vec<_>>(), vec![0.5, 0.25]);
    }

    #[test]
    fn backward_fills_sequence_in_time_order() {
        let x = Array::zeros(IxDyn(&[2, 1, 1]));
        let w = Array::zeros(IxDyn(&[1, 3, 1]));
        let r = Array::zeros(IxDyn(&[1, 3, 1]));
        let h0 = Array::ones(IxDyn(&[1, 1, 1]));
        let out = compute_gru(
            &x,
            &w,
            &r,
            None,
            None,
            Some(&h0),
            &params(RecurrentNetworkDirection::Backward, 2),
        )
        .unwrap();
        assert_eq!(out[1].iter().copied().collect::<Vec<_>>(), vec![0.25, 0.5]);
    }

    #[test]
    fn input_drives_update_gate() {
        // With z saturated at 1 the state is carried over unchanged.
        let x = Array::from_shape_vec(IxDyn(&[1, 1, 1]), vec![1.0]).unwrap();
        let w = Array::from_shape_vec(IxDyn(&[1, 3, 1]), vec![100.0, 0.0, 0.0]).unwrap();
        let r = Array::zeros(IxDyn(&[1, 3, 1]));
        let h0 = Array::from_elem(IxDyn(&[1, 1, 1]), 0.75);
        let out = compute_gru(
            &x,
            &w,
            &r,
            None,
            None,
            Some(&h0),
            &params(RecurrentNetworkDirection::Forward, 1),
        )
        .unwrap();
        assert!((out[0][&[0, 0, 0][..]] - 0.75).abs() < 1e-6);
    }
}
