//! Rules for operators which accept leading batch axes through a
//! `batch_rank` attribute.
//!
//! Batching these moves every batch axis to the front and increments the
//! batch rank, so nested batching stacks further leading axes.

use crate::error::VmapError;
use crate::operator::Operator;
use crate::ops::{BatchRankOp, OperandRole, Optimizer};
use crate::vmap::{Backend, Batched, BatchedValues, VmapContext, input_name, with_dim};

/// Rule for in-place optimizer updates.
///
/// The variable and its accumulators are updated in place, so they must
/// all be batched along the leading axis. If the variable is unbatched, no
/// other operand may be batched, since every batch item would then update
/// the same variable in an undefined order.
pub(super) fn optimizer<B: Backend, Op: Optimizer>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    if inputs.len() != Op::ROLES.len() {
        return Err(cx.input_count_error(Op::ROLES.len(), inputs.len()));
    }
    let Some(var) = Op::ROLES
        .iter()
        .position(|&role| role == OperandRole::Var)
        .map(|i| &inputs[i])
    else {
        return Err(VmapError::Backend(format!("{} has no 'var' operand", op.name())));
    };

    match var.dim {
        None => {
            let (i, x) = inputs
                .iter()
                .enumerate()
                .find(|(_, x)| x.dim.is_some())
                .ok_or_else(|| VmapError::Backend("no operand is batched".to_string()))?;
            return Err(VmapError::inconsistent(
                cx.op_name(),
                format!(
                    "the 'var' is not batched but '{}' is batched at axis {:?}, so the update order is undefined",
                    input_name(op, i),
                    x.dim
                ),
            ));
        }
        Some(0) => {}
        Some(dim) => {
            return Err(VmapError::inconsistent(
                cx.op_name(),
                format!("the 'var' must be batched at axis 0, but got axis {}", dim),
            ));
        }
    }

    let mut values = Vec::with_capacity(inputs.len());
    for (i, (role, x)) in Op::ROLES.iter().zip(inputs).enumerate() {
        let value = match role {
            OperandRole::Var => x.value.clone(),
            OperandRole::Accum if x.dim == Some(0) => x.value.clone(),
            OperandRole::Accum => {
                return Err(VmapError::inconsistent(
                    cx.op_name(),
                    format!(
                        "the '{}' must be batched at axis 0 like 'var', but got {:?}",
                        input_name(op, i),
                        x.dim
                    ),
                ));
            }
            OperandRole::Grad => cx.bdim_at_front(x)?,
            // Without batch axes a scalar may be a single-element vector,
            // which must become a vector over the new batch axis.
            OperandRole::Scalar | OperandRole::Step
                if op.batch_rank() == 0 && cx.logical_rank(x)? == 1 =>
            {
                let value = cx.bdim_at_front(x)?;
                cx.reshape(value, &[cx.axis_size() as i64])?
            }
            OperandRole::Scalar | OperandRole::Step => cx.bdim_at_front(x)?,
        };
        values.push(value);
    }

    let batched_op = op.with_batch_rank(op.batch_rank() + 1);
    Ok(with_dim(cx.call(&batched_op, &values)?, Some(0)))
}

/// Rule for the unsorted segment reductions. The number of segments must be
/// the same for every batch item.
pub(super) fn unsorted_segment<B: Backend, Op: BatchRankOp>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, ids, num_segments] = inputs else {
        return Err(cx.input_count_error(3, inputs.len()));
    };
    cx.require_unbatched("num_segments", num_segments)?;
    let x = cx.bdim_at_front(x)?;
    let ids = cx.bdim_at_front(ids)?;
    let batched_op = op.with_batch_rank(op.batch_rank() + 1);
    let outputs = cx.call(&batched_op, &[x, ids, num_segments.value.clone()])?;
    Ok(with_dim(outputs, Some(0)))
}
