//! Rules for reductions and operators which rearrange elements.
//!
//! These move the batch axis to the front and shift the operator's axes past
//! it.

use crate::error::VmapError;
use crate::operator::Operator;
use crate::ops::{ArgMax, Concat, Squeeze, Stack};
use crate::shape::Dim;
use crate::value::ConstValue;
use crate::vmap::{Backend, Batched, BatchedValues, VmapContext, with_dim};

/// Rule for reductions over a constant `axis` input.
pub(super) fn reduce<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, axis] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    cx.require_unbatched("axis", axis)?;
    let rank = cx.logical_rank(x)?;
    let x = cx.bdim_at_front(x)?;
    if rank == 0 {
        return Ok(vec![Batched::new(x, Some(0))]);
    }

    let axes = cx.ints(&axis.value, "axis")?;
    let axes: Vec<i64> = if axes.is_empty() {
        (1..=rank as i64).collect()
    } else {
        axes.iter()
            .map(|&axis| cx.resolve_axis(axis, rank).map(|a| a as i64 + 1))
            .collect::<Result<_, _>>()?
    };
    let out = cx.reduce(op, x, &axes)?;
    Ok(vec![Batched::new(out, Some(0))])
}

pub(super) fn arg_max<B: Backend>(
    cx: &VmapContext<B>,
    op: &ArgMax,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let axis = cx.resolve_axis(op.axis, cx.logical_rank(x)?)?;
    let batched_op = ArgMax {
        axis: axis as i64 + 1,
        output_type: op.output_type,
    };
    let x = cx.bdim_at_front(x)?;
    Ok(with_dim(cx.call(&batched_op, &[x])?, Some(0)))
}

pub(super) fn reshape<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, shape] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    cx.require_unbatched("input_shape", shape)?;
    let target = cx.ints(&shape.value, "input_shape")?;
    let target: Vec<i64> = [cx.axis_size() as i64].into_iter().chain(target).collect();
    let target = cx.backend().constant(ConstValue::int_vec(&target))?;
    let x = cx.bdim_at_front(x)?;
    Ok(with_dim(cx.call(op, &[x, target])?, Some(0)))
}

pub(super) fn expand_dims<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, axis] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    cx.require_unbatched("axis", axis)?;
    let pos = match cx.ints(&axis.value, "axis")?.as_slice() {
        [axis] => cx.resolve_insert_axis(*axis, cx.logical_rank(x)?)?,
        axes => {
            return Err(VmapError::unsupported(
                cx.op_name(),
                format!("the 'axis' must be a scalar, but got {:?}", axes),
            ));
        }
    };
    let axis = cx.backend().constant(ConstValue::int_scalar(pos as i64 + 1))?;
    let x = cx.bdim_at_front(x)?;
    Ok(with_dim(cx.call(op, &[x, axis])?, Some(0)))
}

pub(super) fn squeeze<B: Backend>(
    cx: &VmapContext<B>,
    op: &Squeeze,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let rank = cx.logical_rank(x)?;
    let x = cx.bdim_at_front(x)?;

    // Squeezing every size 1 axis is done with an explicit axis list, so
    // that a batch of size 1 is kept.
    let axis: Vec<i64> = if op.axis.is_empty() {
        let shape = cx.backend().shape(&x);
        let dims = shape.dims().unwrap_or_default();
        if dims[1..].contains(&Dim::Unknown) {
            return Err(VmapError::unsupported(
                cx.op_name(),
                format!("cannot squeeze all size 1 axes of dynamic shape {}", shape),
            ));
        }
        (1..dims.len())
            .filter(|&d| dims[d] == Dim::Known(1))
            .map(|d| d as i64)
            .collect()
    } else {
        op.axis
            .iter()
            .map(|&axis| cx.resolve_axis(axis, rank).map(|a| a as i64 + 1))
            .collect::<Result<_, _>>()?
    };
    if axis.is_empty() {
        return Ok(vec![Batched::new(x, Some(0))]);
    }
    Ok(with_dim(cx.call(&Squeeze { axis }, &[x])?, Some(0)))
}

pub(super) fn transpose<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, perm] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    cx.require_unbatched("input_perm", perm)?;
    let rank = cx.logical_rank(x)?;
    let perm = cx.ints(&perm.value, "input_perm")?;
    if perm.len() != rank {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "the length of 'input_perm' {:?} must be equal to the rank {} of 'input_x'",
                perm, rank
            ),
        ));
    }
    let perm: Vec<i64> = [0]
        .into_iter()
        .map(Ok)
        .chain(perm.iter().map(|&p| cx.resolve_axis(p, rank).map(|p| p as i64 + 1)))
        .collect::<Result<_, VmapError>>()?;
    let perm = cx.backend().constant(ConstValue::int_vec(&perm))?;
    let x = cx.bdim_at_front(x)?;
    Ok(with_dim(cx.call(op, &[x, perm])?, Some(0)))
}

/// Move every input of a variadic operator to the front, repeating
/// unbatched inputs.
fn all_to_front<B: Backend>(
    cx: &VmapContext<B>,
    inputs: &[Batched<B::Value>],
) -> Result<Vec<B::Value>, VmapError> {
    inputs.iter().map(|x| cx.bdim_at_front(x)).collect()
}

pub(super) fn concat<B: Backend>(
    cx: &VmapContext<B>,
    op: &Concat,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let Some(first) = inputs.first() else {
        return Err(cx.input_count_error(1, 0));
    };
    let axis = cx.resolve_axis(op.axis, cx.logical_rank(first)?)?;
    let values = all_to_front(cx, inputs)?;
    let batched_op = Concat {
        axis: axis as i64 + 1,
    };
    Ok(with_dim(cx.call(&batched_op, &values)?, Some(0)))
}

pub(super) fn stack<B: Backend>(
    cx: &VmapContext<B>,
    op: &Stack,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let Some(first) = inputs.first() else {
        return Err(cx.input_count_error(1, 0));
    };
    let axis = cx.resolve_insert_axis(op.axis, cx.logical_rank(first)?)?;
    let values = all_to_front(cx, inputs)?;
    let batched_op = Stack {
        axis: axis as i64 + 1,
    };
    Ok(with_dim(cx.call(&batched_op, &values)?, Some(0)))
}
