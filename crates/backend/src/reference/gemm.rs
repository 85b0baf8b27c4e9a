use ndarray::{Array, ArrayD, IxDyn};

use crate::BackendError;

/// Row-major single precision GEMM: `c = alpha * a * b + beta * c`.
/// `a` and `b` are addressed through explicit `(row, column)` strides so
/// transposed operands need no copy.
#[allow(clippy::too_many_arguments)]
pub(super) fn sgemm(
    m: usize,
    k: usize,
    n: usize,
    alpha: f32,
    a: &[f32],
    (rsa, csa): (usize, usize),
    b: &[f32],
    (rsb, csb): (usize, usize),
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) {
    assert!(m == 0 || k == 0 || a.len() > (m - 1) * rsa + (k - 1) * csa);
    assert!(k == 0 || n == 0 || b.len() > (k - 1) * rsb + (n - 1) * csb);
    assert!(m == 0 || n == 0 || c.len() >= (m - 1) * ldc + n);

    unsafe {
        matrixmultiply::sgemm(
            m,
            k,
            n,
            alpha,
            a.as_ptr(),
            rsa as isize,
            csa as isize,
            b.as_ptr(),
            rsb as isize,
            csb as isize,
            beta,
            c.as_mut_ptr(),
            ldc as isize,
            1,
        );
    }
}

/// Broadcasts two shapes numpy-style.
pub(super) fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let x = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let y = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        shape[i] = match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

pub(super) fn gemm_shape(
    a: &[usize],
    b: &[usize],
    c: Option<&[usize]>,
    a_transpose: bool,
    b_transpose: bool,
) -> Result<Vec<usize>, BackendError> {
    let (&[a0, a1], &[b0, b1]) = (a, b) else {
        return Err(BackendError::InvalidArgument(
            format!("Gemm operands must be 2-D, got {a:?} and {b:?}").into(),
        ));
    };
    let (m, k) = if a_transpose { (a1, a0) } else { (a0, a1) };
    let (kb, n) = if b_transpose { (b1, b0) } else { (b0, b1) };
    if k != kb {
        return Err(BackendError::InvalidArgument(
            format!("Gemm inner dimensions differ: {k} vs {kb}").into(),
        ));
    }
    if let Some(c) = c {
        if c.len() > 2 || broadcast_shapes(c, &[m, n]).as_deref() != Some(&[m, n][..]) {
            return Err(BackendError::InvalidArgument(
                format!("Gemm bias {c:?} is not broadcastable to [{m}, {n}]").into(),
            ));
        }
    }
    Ok(vec![m, n])
}

pub(super) fn compute_gemm(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    c: Option<&ArrayD<f32>>,
    alpha: f32,
    beta: f32,
    a_transpose: bool,
    b_transpose: bool,
) -> Result<ArrayD<f32>, BackendError> {
    let shape = gemm_shape(
        a.shape(),
        b.shape(),
        c.map(|c| c.shape()),
        a_transpose,
        b_transpose,
    )?;
    let (m, n) = (shape[0], shape[1]);
    let k = if a_transpose { a.shape()[0] } else { a.shape()[1] };

    let mut out = match c {
        Some(c) => {
            let c = c.broadcast(IxDyn(&shape)).ok_or_else(|| {
                BackendError::Compute("Gemm bias is not broadcastable".into())
            })?;
            c.mapv(|x| x * beta)
        }
        None => ArrayD::zeros(IxDyn(&shape)),
    };

    let a_data = a.iter().copied().collect::<Vec<f32>>();
    let b_data = b.iter().copied().collect::<Vec<f32>>();
    let a_strides = if a_transpose { (1, m) } else { (k, 1) };
    let b_strides = if b_transpose { (1, k) } else { (n, 1) };
    let out_data = out
        .as_slice_mut()
        .ok_or_else(|| BackendError::Compute("Gemm output is not contiguous".into()))?;
    sgemm(
        m, k, n, alpha, &a_data, a_strides, &b_data, b_strides, 1.0, out_data, n,
    );

    Ok(out)
}

pub(super) fn matmul_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, BackendError> {
    if a.is_empty() || b.is_empty() {
        return Err(BackendError::InvalidArgument(
            "MatMul operands must have at least one dimension".into(),
        ));
    }
    let a2 = if a.len() == 1 { vec![1, a[0]] } else { a.to_vec() };
    let b2 = if b.len() == 1 { vec![b[0], 1] } else { b.to_vec() };
    let (m, k) = (a2[a2.len() - 2], a2[a2.len() - 1]);
    let (kb, n) = (b2[b2.len() - 2], b2[b2.len() - 1]);
    if k != kb {
        return Err(BackendError::InvalidArgument(
            format!("MatMul inner dimensions differ: {a:?} x {b:?}").into(),
        ));
    }
    let mut shape = broadcast_shapes(&a2[..a2.len() - 2], &b2[..b2.len() - 2]).ok_or_else(|| {
        BackendError::InvalidArgument(
            format!("MatMul batch dimensions are not broadcastable: {a:?} x {b:?}").into(),
        )
    })?;
    if a.len() > 1 {
        shape.push(m);
    }
    if b.len() > 1 {
        shape.push(n);
    }
    Ok(shape)
}

pub(super) fn compute_matmul(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
) -> Result<ArrayD<f32>, BackendError> {
    let out_shape = matmul_shape(a.shape(), b.shape())?;

    let a2 = if a.ndim() == 1 { vec![1, a.len()] } else { a.shape().to_vec() };
    let b2 = if b.ndim() == 1 { vec![b.len(), 1] } else { b.shape().to_vec() };
    let (m, k) = (a2[a2.len() - 2], a2[a2.len() - 1]);
    let n = b2[b2.len() - 1];
    let batch = broadcast_shapes(&a2[..a2.len() - 2], &b2[..b2.len() - 2]).ok_or_else(|| {
        BackendError::Compute("MatMul batch dimensions are not broadcastable".into())
    })?;
    let num_batches = batch.iter().product::<usize>();

    let expand = |x: &ArrayD<f32>, x2: &[usize], rows: usize, cols: usize| {
        let x = x
            .view()
            .into_shape(IxDyn(x2))
            .map_err(|e| BackendError::Compute(e.to_string().into()))?;
        let target = batch.iter().copied().chain([rows, cols]).collect::<Vec<_>>();
        x.broadcast(IxDyn(&target))
            .map(|x| x.iter().copied().collect::<Vec<f32>>())
            .ok_or_else(|| BackendError::Compute("MatMul operand is not broadcastable".into()))
    };
    let a_data = expand(a, &a2, m, k)?;
    let b_data = expand(b, &b2, k, n)?;

    let mut out = vec![0f32; num_batches * m * n];
    for i in 0..num_batches {
        sgemm(
            m,
            k,
            n,
            1.0,
            &a_data[i * m * k..(i + 1) * m * k],
            (k, 1),
            &b_data[i * k * n..(i + 1) * k * n],
            (n, 1),
            0.0,
            &mut out[i * m * n..(i + 1) * m * n],
            n,
        );
    }

    Array::from_shape_vec(IxDyn(&out_shape), out)
        .map_err(|e| BackendError::Compute(e.to_string().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
        Array::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn broadcast() {
        assert_eq!(broadcast_shapes(&[4], &[2, 4]), Some(vec![2, 4]));
        assert_eq!(broadcast_shapes(&[2, 1], &[2, 4]), Some(vec![2, 4]));
        assert_eq!(broadcast_shapes(&[3], &[2, 4]), None);
        assert_eq!(broadcast_shapes(&[], &[2, 4]), Some(vec![2, 4]));
    }

    #[test]
    fn gemm_bias_legality() {
        assert_eq!(gemm_shape(&[2, 3], &[3, 4], Some(&[4]), false, false).unwrap(), vec![2, 4]);
        assert!(gemm_shape(&[2, 3], &[3, 4], Some(&[3]), false, false).is_err());
        assert!(gemm_shape(&[2, 3], &[4, 3], None, false, false).is_err());
        assert_eq!(gemm_shape(&[3, 2], &[4, 3], None, true, true).unwrap(), vec![2, 4]);
    }

    #[test]
    fn gemm_transposed_with_bias() {
        // a^T = [[1, 2], [3, 4]], b^T = [[1, 0], [0, 1]]
        let a = arr(&[2, 2], vec![1., 3., 2., 4.]);
        let b = arr(&[2, 2], vec![1., 0., 0., 1.]);
        let c = arr(&[2], vec![10., 20.]);
        let y = compute_gemm(&a, &b, Some(&c), 2.0, 0.5, true, true).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(
            y.iter().copied().collect::<Vec<_>>(),
            vec![7., 14., 11., 18.]
        );
    }

    #[test]
    fn matmul_batched_broadcast() {
        let a = arr(&[2, 1, 2], vec![1., 2., 3., 4.]);
        let b = arr(&[2, 1], vec![1., 1.]);
        let y = compute_matmul(&a, &b).unwrap();
        assert_eq!(y.shape(), &[2, 1, 1]);
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![3., 7.]);
    }

    #[test]
    fn matmul_vectors() {
        assert_eq!(matmul_shape(&[3], &[3]).unwrap(), Vec::<usize>::new());
        assert_eq!(matmul_shape(&[3], &[3, 2]).unwrap(), vec![2]);
        assert_eq!(matmul_shape(&[2, 3], &[3]).unwrap(), vec![2]);
        let y = compute_matmul(&arr(&[3], vec![1., 2., 3.]), &arr(&[3], vec![4., 5., 6.])).unwrap();
        assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![32.]);
    }
}
