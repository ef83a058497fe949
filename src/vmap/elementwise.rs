//! Rules for elementwise operators and axis-wise activations.

use crate::error::VmapError;
use crate::operator::Operator;
use crate::ops::{LogSoftmax, Softmax, shapes_compatible};
use crate::vmap::{Backend, Batched, BatchedValues, VmapContext, with_dim};

/// Rule for operators applied independently to each element of their first
/// input. The batch axis is kept where it is. Other inputs, such as the
/// target type of `Cast`, must be unbatched.
pub(super) fn unary<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    cx.require_unbatched_tail(op, inputs)?;
    let dim = inputs.first().and_then(|x| x.dim);
    let values: Vec<_> = inputs.iter().map(|x| x.value.clone()).collect();
    Ok(with_dim(cx.call(op, &values)?, dim))
}

/// Rule for gradients of activations, which take two operands of the same
/// shape.
///
/// Operands batched along the same axis with the same shape are passed
/// through. Otherwise both are moved to the front, repeating an unbatched
/// operand, after which their shapes must agree.
pub(super) fn activation_grad<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [a, b] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    let backend = cx.backend();
    let (a_shape, b_shape) = (backend.shape(&a.value), backend.shape(&b.value));
    if a.dim == b.dim && a_shape == b_shape {
        let outputs = cx.call(op, &[a.value.clone(), b.value.clone()])?;
        return Ok(with_dim(outputs, a.dim));
    }

    let a = cx.bdim_at_front(a)?;
    let b = cx.bdim_at_front(b)?;
    let (a_shape, b_shape) = (backend.shape(&a), backend.shape(&b));
    if !shapes_compatible(&a_shape, &b_shape) {
        return Err(VmapError::inconsistent(
            cx.op_name(),
            format!(
                "the shapes of the batched operands must be the same, but got {} and {}",
                a_shape, b_shape
            ),
        ));
    }
    Ok(with_dim(cx.call(op, &[a, b])?, Some(0)))
}

/// Rule for broadcasting binary operators.
pub(super) fn binary<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, y] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    let (x_rank, y_rank) = (cx.rank(&x.value)?, cx.rank(&y.value)?);
    if x.dim == y.dim && x_rank == y_rank {
        let outputs = cx.call(op, &[x.value.clone(), y.value.clone()])?;
        return Ok(with_dim(outputs, x.dim));
    }

    // Move batch axes to the front, then align batched operands' ranks so
    // that their item dimensions broadcast against each other. Unbatched
    // operands broadcast against the batch axis as usual.
    let target_rank = cx.logical_rank(x)?.max(cx.logical_rank(y)?);
    let prepare = |v: &Batched<B::Value>| -> Result<B::Value, VmapError> {
        match v.dim {
            Some(_) => {
                let front = cx.bdim_at_front(v)?;
                cx.handle_broadcasting(front, cx.logical_rank(v)?, target_rank)
            }
            None => Ok(v.value.clone()),
        }
    };
    let values = [prepare(x)?, prepare(y)?];
    Ok(with_dim(cx.call(op, &values)?, Some(0)))
}

/// Map an axis of a batch item to the corresponding axis of the batched
/// value, whose batch axis is at `dim`.
fn remap_axis<B: Backend>(cx: &VmapContext<B>, axis: i64, rank: usize, dim: usize) -> Result<i64, VmapError> {
    let axis = cx.resolve_axis(axis, rank)?;
    let axis = if axis >= dim { axis + 1 } else { axis };
    Ok(axis as i64)
}

pub(super) fn softmax<B: Backend>(
    cx: &VmapContext<B>,
    op: &Softmax,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let Some(dim) = x.dim else {
        return unary(cx, op, inputs);
    };
    let rank = cx.logical_rank(x)?;
    let axis = op
        .axis
        .iter()
        .map(|&axis| remap_axis(cx, axis, rank, dim))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = cx.call(&Softmax { axis }, &[x.value.clone()])?;
    Ok(with_dim(outputs, Some(dim)))
}

pub(super) fn log_softmax<B: Backend>(
    cx: &VmapContext<B>,
    op: &LogSoftmax,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let Some(dim) = x.dim else {
        return unary(cx, op, inputs);
    };
    let axis = remap_axis(cx, op.axis, cx.logical_rank(x)?, dim)?;
    let outputs = cx.call(&LogSoftmax { axis }, &[x.value.clone()])?;
    Ok(with_dim(outputs, Some(dim)))
}
