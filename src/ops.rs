//! Operator declarations and their shape/dtype inference.
//!
//! Operators are grouped by family. Each operator is a struct holding its
//! validated attributes, with a `new` constructor that fails with
//! [`ConfigError`](crate::ConfigError) and an implementation of one of the
//! inference contracts in [`operator`](crate::operator).

use smallvec::SmallVec;

use crate::context::InferContext;
use crate::dtype::{DataType, ValueType, type_list};
use crate::error::InferError;
use crate::operator::Operator;
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;
use crate::value::ConstValue;

mod binary;
mod concat;
mod generate;
mod layout;
mod loss;
mod nn;
mod optim;
mod pooling;
mod reduce;
mod scatter;
mod segment;
mod slice;
mod unary;

pub use binary::{Add, Div, Mul, Sub};
pub use concat::{Concat, Split, Stack};
pub use generate::{Fill, InvertPermutation, IsSubClass, Range, ScalarToArray, TupleToArray};
pub use layout::{
    BroadcastTo, Cast, ExpandDims, Rank, Reshape, Shape as ShapeOp, Size, Squeeze, Transpose,
    Unique,
};
pub use loss::{
    BCEWithLogitsLoss, KLDivLoss, KLDivLossGrad, Reduction, SmoothL1Loss, SmoothL1LossGrad,
};
pub(crate) use nn::channel_axis;
pub use nn::{
    BiasAdd, BiasAddGrad, Dropout2D, Dropout3D, InTopK, LRN, LRNGrad, Pad, PadMode, PadV3, Pdist,
    RandomCategorical,
};
pub use optim::{
    ApplyAdaMax, ApplyAdadelta, ApplyAdagradDA, ApplyAdamWithAmsgrad, ApplyFtrl, ApplyPowerSign,
    ApplyProximalAdagrad, ApplyProximalGradientDescent, OperandRole, Optimizer,
};
pub use pooling::{
    AdaptiveAvgPool2D, AdaptiveMaxPool2D, AdaptiveMaxPool3D, AvgPool, DataFormat, DeformableOffsets,
    MaxPool, MaxPool3DWithArgmax, PoolPadMode,
};
pub use reduce::{ArgMax, ReduceMax, ReduceMean, ReduceSum};
pub use scatter::{
    Gather, GatherNd, ScatterAdd, ScatterDiv, ScatterMax, ScatterMin, ScatterMul, ScatterNdAdd,
    ScatterNdSub, ScatterNdUpdate, ScatterSub, ScatterUpdate,
};
pub use segment::{
    SegmentMax, SegmentMean, SegmentMin, SegmentProd, SegmentSum, UnsortedSegmentMax,
    UnsortedSegmentMin, UnsortedSegmentProd, UnsortedSegmentSum,
};
pub use slice::StridedSlice;
pub use unary::{
    CeLU, Elu, FastGeLU, FastGeLUGrad, GeLU, HShrink, HShrinkGrad, HSigmoid, HSwish, HSwishGrad,
    LogSoftmax, RReLU, ReLU, ReLU6, SeLU, Sigmoid, SoftShrink, SoftShrinkGrad, Softmax, Softplus,
    SoftplusGrad, Softsign, Tanh, TanhGrad,
};

/// Operators which accept extra leading batch axes on every operand, given
/// by a `batch_rank` attribute.
///
/// Batching rules for these operators dispatch to a clone with
/// `batch_rank + 1` instead of rewriting the inputs.
pub trait BatchRankOp: Operator + Clone {
    fn batch_rank(&self) -> usize;

    /// Return a copy of this operator with a different batch rank.
    fn with_batch_rank(&self, batch_rank: usize) -> Self;
}

/// Axis list after normalization.
pub(crate) type Axes = SmallVec<[usize; 4]>;

/// Resolve an index given as a value in `[-len, len)` to a positive index in
/// `[0, len)`, or return `None` if the index is out of bounds.
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    if index < -len || index >= len {
        return None;
    }
    if index >= 0 {
        Some(index as usize)
    } else {
        Some((len + index) as usize)
    }
}

/// Resolve an axis given as a value in `[-ndim, ndim)` to the zero-based
/// dimension of a tensor with `ndim` dimensions.
pub(crate) fn resolve_axis(op: &str, axis: i64, ndim: usize) -> Result<usize, InferError> {
    resolve_index(ndim, axis).ok_or_else(|| {
        InferError::shape(
            op,
            format!(
                "the 'axis' must be in range [{}, {}), but got {}",
                -(ndim as i64),
                ndim,
                axis
            ),
        )
    })
}

/// Resolve a list of axes, rejecting duplicates after normalization.
pub(crate) fn resolve_axes(op: &str, axes: &[i64], ndim: usize) -> Result<Axes, InferError> {
    let mut resolved = Axes::with_capacity(axes.len());
    for &axis in axes {
        let axis = resolve_axis(op, axis, ndim)?;
        if resolved.contains(&axis) {
            return Err(InferError::shape(
                op,
                format!("the axes {:?} contain duplicate values", axes),
            ));
        }
        resolved.push(axis);
    }
    Ok(resolved)
}

/// Check that an input's element type is in `valid`.
pub(crate) fn check_dtype(
    op: &str,
    input: &str,
    dtype: ValueType,
    valid: &[DataType],
) -> Result<DataType, InferError> {
    match dtype.elem() {
        Some(dt) if valid.contains(&dt) => Ok(dt),
        _ => Err(InferError::dtype(
            op,
            format!(
                "the dtype of '{}' must be in [{}], but got {}",
                input,
                type_list(valid),
                dtype
            ),
        )),
    }
}

/// Check that an input is a tensor whose element type is in `valid`.
pub(crate) fn check_tensor_dtype(
    op: &str,
    input: &str,
    dtype: ValueType,
    valid: &[DataType],
) -> Result<DataType, InferError> {
    if !dtype.is_tensor() {
        return Err(InferError::dtype(
            op,
            format!("the '{}' must be a Tensor, but got {}", input, dtype),
        ));
    }
    check_dtype(op, input, dtype, valid)
}

/// Check that named inputs have the same element type and that it is in
/// `valid`.
pub(crate) fn check_same_dtype(
    op: &str,
    inputs: &[(&str, ValueType)],
    valid: &[DataType],
) -> Result<DataType, InferError> {
    let Some(&(first_name, first)) = inputs.first() else {
        return Err(InferError::dtype(op, "no inputs to check"));
    };
    let dt = check_dtype(op, first_name, first, valid)?;
    for &(name, dtype) in &inputs[1..] {
        if dtype.elem() != Some(dt) {
            return Err(InferError::dtype(
                op,
                format!(
                    "the dtype of '{}' must be the same as '{}' ({}), but got {}",
                    name, first_name, first, dtype
                ),
            ));
        }
    }
    Ok(dt)
}

/// Return true if two dimensions may be equal at runtime.
pub(crate) fn dims_compatible(a: Dim, b: Dim) -> bool {
    match (a, b) {
        (Dim::Known(a), Dim::Known(b)) => a == b,
        _ => true,
    }
}

/// Return true if two shapes may be equal at runtime.
pub(crate) fn shapes_compatible(a: &Shape, b: &Shape) -> bool {
    match (a.dims(), b.dims()) {
        (Some(a), Some(b)) => a.len() == b.len() && a.iter().zip(b).all(|(a, b)| dims_compatible(*a, *b)),
        _ => true,
    }
}

/// Check that `other` has the same shape as `first`.
pub(crate) fn check_same_shape(
    op: &str,
    first: (&str, &Shape),
    other: (&str, &Shape),
) -> Result<(), InferError> {
    if shapes_compatible(first.1, other.1) {
        Ok(())
    } else {
        Err(InferError::shape(
            op,
            format!(
                "the shape of '{}' must be the same as '{}' {}, but got {}",
                other.0, first.0, first.1, other.1
            ),
        ))
    }
}

/// Broadcast two shapes together following numpy rules.
///
/// An unknown dimension broadcast against a known size other than 1 takes
/// that size, since execution can only succeed if they match.
pub(crate) fn broadcast_shapes(op: &str, a: &Shape, b: &Shape) -> Result<Shape, InferError> {
    let (Some(a_dims), Some(b_dims)) = (a.dims(), b.dims()) else {
        return Ok(Shape::UnknownRank);
    };
    let ndim = a_dims.len().max(b_dims.len());
    let a_pad = ndim - a_dims.len();
    let b_pad = ndim - b_dims.len();

    let mut out = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let da = if i < a_pad { Dim::Known(1) } else { a_dims[i - a_pad] };
        let db = if i < b_pad { Dim::Known(1) } else { b_dims[i - b_pad] };
        let dim = match (da, db) {
            (x, y) if x == y => x,
            (Dim::Known(1), y) => y,
            (x, Dim::Known(1)) => x,
            (Dim::Unknown, Dim::Known(y)) => Dim::Known(y),
            (Dim::Known(x), Dim::Unknown) => Dim::Known(x),
            _ => {
                return Err(InferError::shape(
                    op,
                    format!("shapes {} and {} can not broadcast", a, b),
                ));
            }
        };
        out.push(dim);
    }
    Ok(Shape::new(out))
}

/// Read the constant integer elements of an input which must be known at
/// compile time.
pub(crate) fn require_ints(op: &str, input: &str, ty: &TensorType) -> Result<Vec<i64>, InferError> {
    ty.value_i64s()
        .ok_or_else(|| InferError::constant_required(op, input))
}

/// Read a constant integer scalar input.
pub(crate) fn require_int(op: &str, input: &str, ty: &TensorType) -> Result<i64, InferError> {
    ty.value()
        .and_then(|v| v.to_i64_scalar())
        .ok_or_else(|| InferError::constant_required(op, input))
}

/// Return the rank of an input, failing if it is not `expected`.
pub(crate) fn check_rank(op: &str, input: &str, shape: &Shape, expected: &[usize]) -> Result<(), InferError> {
    match shape.rank() {
        Some(rank) if !expected.contains(&rank) => Err(InferError::shape(
            op,
            format!(
                "the rank of '{}' must be in {:?}, but got {} with shape {}",
                input, expected, rank, shape
            ),
        )),
        _ => Ok(()),
    }
}

/// Give a dynamic output shape bounds derived from the input's bounds.
///
/// `map` transforms a per-dimension bound list of the input the same way the
/// operator transforms its shape.
pub(crate) fn carry_bounds(
    input: &TensorType,
    output: TensorType,
    map: impl Fn(&[usize]) -> Vec<usize>,
) -> Result<TensorType, InferError> {
    match (input.min_shape(), input.max_shape()) {
        (Some(min), Some(max)) if !output.shape().is_static() => {
            output.with_shape_bounds(map(min), map(max))
        }
        _ => Ok(output),
    }
}

/// Return a type with the shape and shape bounds of `input` but no value.
pub(crate) fn shaped_like(input: &TensorType, dtype: ValueType) -> Result<TensorType, InferError> {
    carry_bounds(input, TensorType::new(dtype, input.shape().clone()), |bounds| bounds.to_vec())
}

/// Attach a folded constant value to an output if its size permits.
///
/// `fold` is only called when the output shape is static and within the
/// context's folding limit. If it returns `None` the output has no value.
pub(crate) fn fold_value(
    op: &str,
    ctx: &InferContext,
    output: TensorType,
    fold: impl FnOnce() -> Option<ConstValue>,
) -> Result<TensorType, InferError> {
    let Some(len) = output.shape().num_elements() else {
        return Ok(output);
    };
    if !ctx.can_fold(len) {
        return Ok(output);
    }
    match fold() {
        Some(value) => {
            tracing::trace!(op, len, "folded constant");
            output.with_value(value)
        }
        None => Ok(output),
    }
}
