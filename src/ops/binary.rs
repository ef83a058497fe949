//! Broadcasting binary arithmetic.

use crate::const_eval::{Arith, arith};
use crate::context::InferContext;
use crate::dtype::{DataType, NUMBER_TYPES, ValueType};
use crate::error::InferError;
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{broadcast_shapes, check_dtype, fold_value};
use crate::shape::Dim;
use crate::tensor_type::TensorType;

/// Resolve the output value type of a binary operator.
///
/// Tensors must agree on element type. A bare number combined with a tensor
/// takes the tensor's type.
fn binary_dtype(op: &str, x: ValueType, y: ValueType) -> Result<ValueType, InferError> {
    let x_dt = check_dtype(op, "x", x, NUMBER_TYPES)?;
    let y_dt = check_dtype(op, "y", y, NUMBER_TYPES)?;
    match (x, y) {
        (ValueType::Tensor(_), ValueType::Tensor(_)) | (ValueType::Number(_), ValueType::Number(_))
            if x_dt != y_dt =>
        {
            Err(InferError::dtype(
                op,
                format!(
                    "the dtype of 'x' and 'y' must be the same, but got {} and {}",
                    x, y
                ),
            ))
        }
        (ValueType::Tensor(_), _) => Ok(x),
        (_, ValueType::Tensor(_)) => Ok(y),
        _ => Ok(x),
    }
}

/// Broadcast per-dimension bounds. Used to give dynamic outputs a shape
/// range.
fn broadcast_bounds(a: &[usize], b: &[usize]) -> Vec<usize> {
    let ndim = a.len().max(b.len());
    let (a_pad, b_pad) = (ndim - a.len(), ndim - b.len());
    (0..ndim)
        .map(|i| {
            let da = if i < a_pad { 1 } else { a[i - a_pad] };
            let db = if i < b_pad { 1 } else { b[i - b_pad] };
            match (da, db) {
                (1, d) | (d, 1) => d,
                (da, db) => da.max(db),
            }
        })
        .collect()
}

/// Return the per-element value range of an integer input, from its value
/// if constant, else its value bounds.
fn value_range(ty: &TensorType) -> Option<(Vec<i64>, Vec<i64>)> {
    if let Some(values) = ty.value_i64s() {
        return Some((values.clone(), values));
    }
    Some((ty.min_value()?.to_vec(), ty.max_value()?.to_vec()))
}

/// Propagate value ranges through integer arithmetic on scalars and vectors.
fn arith_value_range(op: Arith, x: &TensorType, y: &TensorType) -> Option<(Vec<i64>, Vec<i64>)> {
    let (x_min, x_max) = value_range(x)?;
    let (y_min, y_max) = value_range(y)?;
    let len = match (x_min.len(), y_min.len()) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        _ => return None,
    };
    let at = |v: &[i64], i: usize| if v.len() == 1 { v[0] } else { v[i] };

    let mut lo = Vec::with_capacity(len);
    let mut hi = Vec::with_capacity(len);
    for i in 0..len {
        let (a0, a1, b0, b1) = (at(&x_min, i), at(&x_max, i), at(&y_min, i), at(&y_max, i));
        let (l, h) = match op {
            Arith::Add => (a0.checked_add(b0)?, a1.checked_add(b1)?),
            Arith::Sub => (a0.checked_sub(b1)?, a1.checked_sub(b0)?),
            Arith::Mul => {
                let products = [
                    a0.checked_mul(b0)?,
                    a0.checked_mul(b1)?,
                    a1.checked_mul(b0)?,
                    a1.checked_mul(b1)?,
                ];
                (*products.iter().min()?, *products.iter().max()?)
            }
            Arith::Div => return None,
        };
        lo.push(l);
        hi.push(h);
    }
    Some((lo, hi))
}

fn infer_binary(
    op: &str,
    arith_op: Arith,
    inputs: &[TensorType],
    ctx: &InferContext,
) -> Result<InferOutput, InferError> {
    let [x, y] = inputs else {
        return Err(InferError::shape(op, "expected 2 inputs"));
    };
    let dtype = binary_dtype(op, x.dtype(), y.dtype())?;
    let shape = broadcast_shapes(op, x.shape(), y.shape())?;
    let mut output = TensorType::new(dtype, shape.clone());

    if let Some(dims) = shape.dims()
        && !shape.is_static()
        && let (Some(x_lo), Some(x_hi), Some(y_lo), Some(y_hi)) =
            (x.lower_dims(), x.upper_dims(), y.lower_dims(), y.upper_dims())
    {
        let mut lo = broadcast_bounds(&x_lo, &y_lo);
        let hi = broadcast_bounds(&x_hi, &y_hi);
        for i in 0..dims.len() {
            if let Dim::Known(size) = dims[i] {
                lo[i] = size;
            }
            lo[i] = lo[i].min(hi[i]);
        }
        output = output.with_shape_bounds(lo, hi)?;
    }

    let dt = dtype.elem().unwrap_or(DataType::Float32);
    if let (Some(xv), Some(yv)) = (x.value(), y.value()) {
        output = fold_value(op, ctx, output, || arith(arith_op, xv, yv)?.cast(dt))?;
    }

    if output.value().is_none()
        && dt.is_int()
        && let Some((lo, hi)) = arith_value_range(arith_op, x, y)
        && output.shape().num_elements().is_none_or(|n| n == lo.len())
    {
        output = output.with_value_bounds(lo, hi)?;
    }

    Ok(InferOutput::single(output))
}

macro_rules! binary_op {
    ($op:ident, $arith:expr) => {
        #[derive(Clone, Debug, Default)]
        pub struct $op {}

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_binary(stringify!($op), $arith, inputs, ctx)
            }
        }

        impl_operator!($op, ["x", "y"] -> ["output"], full);
    };
}

binary_op!(Add, Arith::Add);
binary_op!(Sub, Arith::Sub);
binary_op!(Mul, Arith::Mul);
binary_op!(Div, Arith::Div);

#[cfg(test)]
mod tests {
    use super::{Add, Div, Mul, Sub};
    use crate::dtype::{DataType, ValueType};
    use crate::error::InferError;
    use crate::operator::OperatorExt;
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;
    use crate::value::ConstValue;

    #[test]
    fn test_broadcast_and_dtype() {
        let x = TensorType::tensor(DataType::Float32, shape!(2, 1, 4));
        let y = TensorType::tensor(DataType::Float32, shape!(3, 1));
        let out = Add {}.infer_simple(&[x.clone(), y]).unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 3, 4));

        // Number combined with a tensor takes the tensor type.
        let out = Mul {}.infer_simple(&[x.clone(), TensorType::const_float(2.)]).unwrap();
        assert_eq!(out[0].dtype(), ValueType::Tensor(DataType::Float32));

        let y = TensorType::tensor(DataType::Int32, shape!(4));
        assert!(matches!(Sub {}.infer_simple(&[x.clone(), y]), Err(InferError::Dtype { .. })));

        let y = TensorType::tensor(DataType::Float32, shape!(3));
        assert!(matches!(Sub {}.infer_simple(&[x, y]), Err(InferError::Shape { .. })));
    }

    #[test]
    fn test_constant_folding() {
        let x = TensorType::tensor(DataType::Int32, Shape::fixed(&[2]))
            .with_value(ConstValue::int_vec(&[1, 2]))
            .unwrap();
        let y = TensorType::tensor(DataType::Int32, Shape::fixed(&[2]))
            .with_value(ConstValue::int_vec(&[10, 20]))
            .unwrap();
        let out = Add {}.infer_simple(&[x.clone(), y.clone()]).unwrap();
        assert_eq!(out[0].value(), Some(&ConstValue::int_vec(&[11, 22])));

        // Integer division is not folded.
        let out = Div {}.infer_simple(&[x, y]).unwrap();
        assert_eq!(out[0].value(), None);
    }

    #[test]
    fn test_dynamic_shape_bounds() {
        let x = TensorType::tensor(DataType::Float32, shape!(-1, 4))
            .with_shape_bounds(vec![1, 4], vec![8, 4])
            .unwrap();
        let y = TensorType::tensor(DataType::Float32, shape!(4));
        let out = Add {}.infer_simple(&[x, y]).unwrap();
        assert_eq!(out[0].shape(), &shape!(-1, 4));
        assert_eq!(out[0].min_shape(), Some([1, 4].as_slice()));
        assert_eq!(out[0].max_shape(), Some([8, 4].as_slice()));
    }

    #[test]
    fn test_value_range_propagation() {
        let x = TensorType::new(ValueType::Tensor(DataType::Int64), shape!(2))
            .with_value_bounds(vec![1, 2], vec![4, 8])
            .unwrap();
        let y = TensorType::const_ints(&[2], vec![3, 3]);
        let out = Add {}.infer_simple(&[x.clone(), y.clone()]).unwrap();
        assert_eq!(out[0].min_value(), Some([4, 5].as_slice()));
        assert_eq!(out[0].max_value(), Some([7, 11].as_slice()));

        let out = Sub {}.infer_simple(&[x, y]).unwrap();
        assert_eq!(out[0].min_value(), Some([-2, -1].as_slice()));
        assert_eq!(out[0].max_value(), Some([1, 5].as_slice()));
    }
}
