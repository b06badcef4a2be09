//! Reference algorithms over host buffers.
//!
//! Every accelerator must agree with these functions; accelerator contexts
//! also call them directly for operators they do not implement.

use kn_tensor::prelude::*;
use kn_tensor::transfer::{Grid2, Grid2Mut};

type HostResult = Materialized<HostBuffer>;

fn check_kinds(left: ElementKind, right: ElementKind) -> Result<()> {
    if left != right {
        return Err(KnumError::TypeMismatch {
            expected: left,
            actual: right,
        });
    }
    Ok(())
}

/// Right operand index for output element `n`.
#[inline]
fn rhs_index(broadcast: bool, n: usize) -> usize {
    if broadcast {
        0
    } else {
        n
    }
}

/// Scalar Float semantics of `op`, shared with device interpreters.
pub fn float_op(op: BinaryOp) -> fn(f32, f32) -> f32 {
    match op {
        BinaryOp::Add => |x, y| x + y,
        BinaryOp::Sub => |x, y| x - y,
        BinaryOp::Mul => |x, y| x * y,
        BinaryOp::Div => |x, y| x / y,
        BinaryOp::Min => f32::min,
        BinaryOp::Max => f32::max,
    }
}

fn int_binary(op: BinaryOp, l: &[i32], r: &[i32], broadcast: bool) -> Result<Vec<i32>> {
    let f: fn(i32, i32) -> i32 = match op {
        BinaryOp::Add => i32::wrapping_add,
        BinaryOp::Sub => i32::wrapping_sub,
        BinaryOp::Mul => i32::wrapping_mul,
        BinaryOp::Min => std::cmp::min,
        BinaryOp::Max => std::cmp::max,
        BinaryOp::Div => {
            return l
                .iter()
                .enumerate()
                .map(|(n, &x)| match r[rhs_index(broadcast, n)] {
                    0 => Err(KnumError::DivisionByZero { index: n }),
                    y => Ok(x.wrapping_div(y)),
                })
                .collect();
        }
    };
    Ok(l
        .iter()
        .enumerate()
        .map(|(n, &x)| f(x, r[rhs_index(broadcast, n)]))
        .collect())
}

/// `left[n] op right[broadcast ? 0 : n]` for every element of `left`.
pub fn binary_op(op: BinaryOp, left: &HostResult, right: &HostResult) -> Result<HostResult> {
    check_kinds(left.kind(), right.kind())?;
    let broadcast = right.is_scalar_like();
    if !broadcast && !right.shape().matches(left.shape().extents()) {
        return Err(KnumError::ShapeMismatch(format!(
            "{op:?}: right operand {} is neither {} nor scalar-like",
            right.shape(),
            left.shape()
        )));
    }

    let data: HostBuffer = match (left.host(), right.host()) {
        (HostBuffer::Float(l), HostBuffer::Float(r)) => {
            let f = float_op(op);
            l.iter()
                .enumerate()
                .map(|(n, &x)| f(x, r[rhs_index(broadcast, n)]))
                .collect::<Vec<f32>>()
                .into()
        }
        (HostBuffer::Int(l), HostBuffer::Int(r)) => int_binary(op, l, r, broadcast)?.into(),
        (l, r) => {
            return Err(KnumError::TypeMismatch {
                expected: l.kind(),
                actual: r.kind(),
            })
        }
    };
    Materialized::new(left.shape().clone(), data)
}

/// Elementwise unary operation.
pub fn unary_op(op: UnaryOp, input: &HostResult) -> Result<HostResult> {
    let data: HostBuffer = match (op, input.host()) {
        (UnaryOp::Neg, HostBuffer::Float(d)) => d.iter().map(|&v| -v).collect::<Vec<f32>>().into(),
        (UnaryOp::Neg, HostBuffer::Int(d)) => {
            d.iter().map(|&v| v.wrapping_neg()).collect::<Vec<i32>>().into()
        }
    };
    Materialized::new(input.shape().clone(), data)
}

fn rank2(op: OpKind, shape: &Shape) -> Result<(usize, usize)> {
    match shape.extents() {
        [w, h] => Ok((*w, *h)),
        other => Err(KnumError::UnsupportedRank {
            op,
            expected: 2,
            actual: other.len(),
        }),
    }
}

fn pad_amounts(pads: &HostResult) -> Result<(usize, usize)> {
    match pads.host().as_i32()? {
        &[px, py] => {
            let px = usize::try_from(px);
            let py = usize::try_from(py);
            match (px, py) {
                (Ok(px), Ok(py)) => Ok((px, py)),
                _ => Err(KnumError::ShapeMismatch(
                    "pad amounts must be non-negative".into(),
                )),
            }
        }
        other => Err(KnumError::ShapeMismatch(format!(
            "rank-2 pad needs two amounts, got {}",
            other.len()
        ))),
    }
}

fn pad_grid<T: Copy + Default>(src: &[T], w: usize, h: usize, px: usize, py: usize) -> Result<Vec<T>> {
    let input = Grid2::new(&src[..], w, h)?;
    let (ow, oh) = (w + 2 * px, h + 2 * py);
    let mut data = vec![T::default(); ow * oh];
    let mut out = Grid2Mut::new(&mut data, ow, oh)?;
    for y in 0..h {
        for x in 0..w {
            out.set(x + px, y + py, input.get(x, y));
        }
    }
    Ok(data)
}

/// Zero padding of a rank-2 tensor; `pads` = `[pad_x, pad_y]`.
pub fn pad(input: &HostResult, pads: &HostResult) -> Result<HostResult> {
    let (w, h) = rank2(OpKind::Pad, input.shape())?;
    let (px, py) = pad_amounts(pads)?;
    let shape = Shape::new(vec![w + 2 * px, h + 2 * py])?;

    let data: HostBuffer = match input.host() {
        HostBuffer::Float(d) => pad_grid(&d[..], w, h, px, py)?.into(),
        HostBuffer::Int(d) => pad_grid(&d[..], w, h, px, py)?.into(),
    };
    Materialized::new(shape, data)
}

/// Check conv2d operands; returns the input width and height.
///
/// Shared with accelerator contexts so they reject exactly what the
/// reference rejects.
pub fn conv2d_geometry(input: &Shape, kernel: &Shape) -> Result<(usize, usize)> {
    let (w, h) = rank2(OpKind::Conv2d, input)?;
    if !kernel.matches(&[3, 3]) {
        return Err(KnumError::ShapeMismatch(format!(
            "conv2d needs a (3, 3) kernel, got {kernel}"
        )));
    }
    if w < 3 || h < 3 {
        return Err(KnumError::ShapeMismatch(format!(
            "conv2d input {input} is smaller than the kernel"
        )));
    }
    Ok((w, h))
}

/// Valid 3x3 convolution: `out(x, y) = sum in(x+dx, y+dy) * k(dx, dy)`.
///
/// Walks each output row with a sliding window that keeps the two left
/// columns of the three input rows, so every input cell is read once per row.
pub fn conv2d(input: &HostResult, kernel: &HostResult) -> Result<HostResult> {
    let (w, h) = conv2d_geometry(input.shape(), kernel.shape())?;
    check_kinds(input.kind(), kernel.kind())?;
    let (src, krn) = match (input.host(), kernel.host()) {
        (HostBuffer::Float(s), HostBuffer::Float(k)) => (s, k),
        _ => {
            return Err(KnumError::UnsupportedOperation {
                op: OpKind::Conv2d,
                kind: input.kind(),
            })
        }
    };

    let inp = Grid2::new(&src[..], w, h)?;
    let k = Grid2::new(&krn[..], 3, 3)?;
    let (ow, oh) = (w - 2, h - 2);
    let mut data = vec![0.0f32; ow * oh];
    let mut out = Grid2Mut::new(&mut data, ow, oh)?;

    let (am, bm, cm) = (k.get(0, 0), k.get(1, 0), k.get(2, 0));
    let (dm, em, fm) = (k.get(0, 1), k.get(1, 1), k.get(2, 1));
    let (gm, hm, im) = (k.get(0, 2), k.get(1, 2), k.get(2, 2));

    for y in 0..oh {
        let (mut a, mut b) = (inp.get(0, y), inp.get(1, y));
        let (mut d, mut e) = (inp.get(0, y + 1), inp.get(1, y + 1));
        let (mut g, mut hh) = (inp.get(0, y + 2), inp.get(1, y + 2));

        for x in 0..ow {
            let c = inp.get(x + 2, y);
            let f = inp.get(x + 2, y + 1);
            let i = inp.get(x + 2, y + 2);

            let v = a * am + b * bm + c * cm + d * dm + e * em + f * fm + g * gm + hh * hm + i * im;
            out.set(x, y, v);

            (a, d, g) = (b, e, hh);
            (b, e, hh) = (c, f, i);
        }
    }

    Materialized::new(Shape::new(vec![ow, oh])?, HostBuffer::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn floats(data: Vec<f32>, extents: &[usize]) -> HostResult {
        Materialized::new(Shape::new(extents.to_vec()).unwrap(), HostBuffer::from(data)).unwrap()
    }

    fn ints(data: Vec<i32>, extents: &[usize]) -> HostResult {
        Materialized::new(Shape::new(extents.to_vec()).unwrap(), HostBuffer::from(data)).unwrap()
    }

    /// Plain double sum, same accumulation order as the sliding window.
    fn conv2d_direct(src: &[f32], w: usize, h: usize, k: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity((w - 2) * (h - 2));
        for y in 0..h - 2 {
            for x in 0..w - 2 {
                let mut acc = 0.0f32;
                for dy in 0..3 {
                    for dx in 0..3 {
                        acc += src[(x + dx) + (y + dy) * w] * k[dx + dy * 3];
                    }
                }
                out.push(acc);
            }
        }
        out
    }

    #[test]
    fn test_binary_float_ops() {
        let l = floats(vec![-1.0, 1.0, -1.0, 1.0, 2.0, 2.0, 0.0, 0.0], &[8]);
        let r = floats(vec![1.0, -1.0, -1.0, 1.0, -2.0, 2.0, -1.0, 0.0], &[8]);
        let min = binary_op(BinaryOp::Min, &l, &r).unwrap();
        let max = binary_op(BinaryOp::Max, &l, &r).unwrap();
        assert_eq!(
            min.as_float_array().unwrap(),
            vec![-1.0, -1.0, -1.0, 1.0, -2.0, 2.0, -1.0, 0.0]
        );
        assert_eq!(
            max.as_float_array().unwrap(),
            vec![1.0, 1.0, -1.0, 1.0, 2.0, 2.0, 0.0, 0.0]
        );

        let a = floats(vec![1.0, 2.0, 3.0, 4.0], &[4]);
        let b = floats(vec![5.0, 6.0, 7.0, 8.0], &[4]);
        let sub = binary_op(BinaryOp::Sub, &a, &b).unwrap();
        assert_eq!(sub.as_float_array().unwrap(), vec![-4.0; 4]);
        let div = binary_op(BinaryOp::Div, &b, &a).unwrap();
        assert_eq!(div.as_float_array().unwrap(), vec![5.0, 3.0, 7.0 / 3.0, 2.0]);
    }

    #[test]
    fn test_binary_broadcast_matches_filled_operand() {
        let mut rng = rand::thread_rng();
        let data: Vec<f32> = (0..12).map(|_| rng.gen_range(-4.0..4.0)).collect();
        let s: f32 = rng.gen_range(0.5..2.0);
        let l = floats(data, &[3, 4]);
        let scalar = floats(vec![s], &[1]);
        let filled = floats(vec![s; 12], &[3, 4]);

        for op in BinaryOp::ALL {
            let a = binary_op(op, &l, &scalar).unwrap();
            let b = binary_op(op, &l, &filled).unwrap();
            assert_eq!(a.as_float_array().unwrap(), b.as_float_array().unwrap(), "{op:?}");
            assert_eq!(a.shape(), l.shape());
        }
    }

    #[test]
    fn test_binary_rejects_mismatch() {
        let l = floats(vec![1.0; 4], &[4]);
        let r = floats(vec![1.0; 2], &[2]);
        assert!(matches!(
            binary_op(BinaryOp::Add, &l, &r),
            Err(KnumError::ShapeMismatch(_))
        ));
        let i = ints(vec![1; 4], &[4]);
        assert!(matches!(
            binary_op(BinaryOp::Add, &l, &i),
            Err(KnumError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_binary_int_ops() {
        let l = ints(vec![7, -7, i32::MAX, 4], &[4]);
        let r = ints(vec![2, 2, 1, -4], &[4]);
        let add = binary_op(BinaryOp::Add, &l, &r).unwrap();
        assert_eq!(add.as_int_array().unwrap(), vec![9, -5, i32::MIN, 0]);
        let div = binary_op(BinaryOp::Div, &l, &r).unwrap();
        assert_eq!(div.as_int_array().unwrap(), vec![3, -3, i32::MAX, -1]);

        let zero = ints(vec![0], &[1]);
        assert_eq!(
            binary_op(BinaryOp::Div, &l, &zero).unwrap_err(),
            KnumError::DivisionByZero { index: 0 }
        );
    }

    #[test]
    fn test_unary_neg() {
        let x = floats(vec![1.0, -2.0, 0.5], &[3]);
        assert_eq!(
            unary_op(UnaryOp::Neg, &x).unwrap().as_float_array().unwrap(),
            vec![-1.0, 2.0, -0.5]
        );
        let i = ints(vec![3, i32::MIN], &[2]);
        assert_eq!(
            unary_op(UnaryOp::Neg, &i).unwrap().as_int_array().unwrap(),
            vec![-3, i32::MIN]
        );
    }

    #[test]
    fn test_pad_2x2() {
        let x = floats(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let pads = ints(vec![1, 1], &[2]);
        let out = pad(&x, &pads).unwrap();
        assert_eq!(out.shape().extents(), &[4, 4]);
        assert_eq!(
            out.as_float_array().unwrap(),
            vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 2.0, 0.0, //
                0.0, 3.0, 4.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ]
        );
    }

    #[test]
    fn test_pad_asymmetric_ints() {
        let x = ints(vec![1, 2, 3], &[3, 1]);
        let pads = ints(vec![0, 1], &[2]);
        let out = pad(&x, &pads).unwrap();
        assert_eq!(out.shape().extents(), &[3, 3]);
        assert_eq!(out.as_int_array().unwrap(), vec![0, 0, 0, 1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn test_pad_rejects_rank_and_amounts() {
        let x3 = floats(vec![0.0; 8], &[2, 2, 2]);
        let pads3 = ints(vec![1, 1, 1], &[3]);
        assert_eq!(
            pad(&x3, &pads3).unwrap_err(),
            KnumError::UnsupportedRank {
                op: OpKind::Pad,
                expected: 2,
                actual: 3,
            }
        );

        let x = floats(vec![0.0; 4], &[2, 2]);
        assert!(matches!(
            pad(&x, &ints(vec![-1, 1], &[2])),
            Err(KnumError::ShapeMismatch(_))
        ));
        assert!(matches!(
            pad(&x, &ints(vec![1], &[1])),
            Err(KnumError::ShapeMismatch(_))
        ));
        assert!(matches!(
            pad(&x, &floats(vec![1.0, 1.0], &[2])),
            Err(KnumError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_conv2d_known_kernels() {
        let padded = floats(
            vec![
                0.0, 0.0, 0.0, 0.0, //
                0.0, 1.0, 2.0, 0.0, //
                0.0, 3.0, 4.0, 0.0, //
                0.0, 0.0, 0.0, 0.0,
            ],
            &[4, 4],
        );
        let ramp = floats((1..=9).map(|v| v as f32).collect(), &[3, 3]);
        let identity = floats(vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0], &[3, 3]);
        let corner = floats(vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], &[3, 3]);

        let out = conv2d(&padded, &ramp).unwrap();
        assert_eq!(out.shape().extents(), &[2, 2]);
        assert_eq!(out.as_float_array().unwrap(), vec![77.0, 67.0, 47.0, 37.0]);
        assert_eq!(
            conv2d(&padded, &identity).unwrap().as_float_array().unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(
            conv2d(&padded, &corner).unwrap().as_float_array().unwrap(),
            vec![4.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_conv2d_sliding_window_matches_direct_sum() {
        let mut rng = rand::thread_rng();
        for (w, h) in [(3, 3), (7, 4), (5, 9)] {
            let src: Vec<f32> = (0..w * h).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let k: Vec<f32> = (0..9).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let expected = conv2d_direct(&src, w, h, &k);
            let out = conv2d(&floats(src, &[w, h]), &floats(k, &[3, 3])).unwrap();
            assert_eq!(out.shape().extents(), &[w - 2, h - 2]);
            assert_eq!(out.as_float_array().unwrap(), expected);
        }
    }

    #[test]
    fn test_conv2d_rejects_bad_operands() {
        let x = floats(vec![0.0; 16], &[4, 4]);
        assert!(matches!(
            conv2d(&x, &floats(vec![0.0; 4], &[2, 2])),
            Err(KnumError::ShapeMismatch(_))
        ));
        assert!(matches!(
            conv2d(&x, &floats(vec![0.0; 9], &[9])),
            Err(KnumError::ShapeMismatch(_))
        ));
        assert!(matches!(
            conv2d(&floats(vec![0.0; 27], &[3, 3, 3]), &floats(vec![0.0; 9], &[3, 3])),
            Err(KnumError::UnsupportedRank { op: OpKind::Conv2d, .. })
        ));
        assert_eq!(
            conv2d(&ints(vec![0; 16], &[4, 4]), &ints(vec![0; 9], &[3, 3])).unwrap_err(),
            KnumError::UnsupportedOperation {
                op: OpKind::Conv2d,
                kind: ElementKind::Int,
            }
        );
    }
}
