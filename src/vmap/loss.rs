//! Rules for losses with a `reduction` mode.
//!
//! Reducing a batched loss directly would also reduce over the batch axis,
//! so per-element losses are computed first and each batch item is reduced
//! separately.

use crate::error::VmapError;
use crate::operator::Operator;
use crate::ops::{BCEWithLogitsLoss, KLDivLoss, ReduceMean, ReduceSum, Reduction, SmoothL1Loss};
use crate::vmap::{Backend, Batched, BatchedValues, VmapContext};

/// Loss operators whose reduction mode can be changed.
pub(super) trait ReducedLoss: Operator + Sized {
    fn reduction(&self) -> Reduction;

    fn with_reduction(&self, reduction: Reduction) -> Self;
}

macro_rules! impl_reduced_loss {
    ($op:ident) => {
        impl ReducedLoss for $op {
            fn reduction(&self) -> Reduction {
                self.reduction
            }

            fn with_reduction(&self, reduction: Reduction) -> Self {
                let mut op = self.clone();
                op.reduction = reduction;
                op
            }
        }
    };
}

impl_reduced_loss!(KLDivLoss);
impl_reduced_loss!(SmoothL1Loss);
impl_reduced_loss!(BCEWithLogitsLoss);

/// Rule for losses. The first two operands have the shape of the loss and
/// are moved to the front. Further operands (the weights of
/// `BCEWithLogitsLoss`) broadcast against them.
pub(super) fn reduced_loss<B: Backend, Op: ReducedLoss>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let Some(first) = inputs.first() else {
        return Err(cx.input_count_error(op.input_names().len(), 0));
    };
    let rank = cx.logical_rank(first)?;

    let mut values = Vec::with_capacity(inputs.len());
    for (i, x) in inputs.iter().enumerate() {
        let value = match (i, x.dim) {
            (0 | 1, _) => cx.bdim_at_front(x)?,
            (_, Some(_)) => {
                let value = cx.bdim_at_front(x)?;
                cx.handle_broadcasting(value, cx.logical_rank(x)?, rank)?
            }
            (_, None) => x.value.clone(),
        };
        values.push(value);
    }

    let losses = cx.call_one(&op.with_reduction(Reduction::None), &values)?;
    let item_axes: Vec<i64> = (1..=rank as i64).collect();
    let out = match op.reduction() {
        Reduction::None => losses,
        Reduction::Mean => cx.reduce(&ReduceMean { keep_dims: false }, losses, &item_axes)?,
        Reduction::Sum => cx.reduce(&ReduceSum { keep_dims: false }, losses, &item_axes)?,
        Reduction::BatchMean if rank == 0 => losses,
        Reduction::BatchMean => {
            // Sum over everything but the first item axis, then average
            // over it.
            let sums = cx.reduce(&ReduceSum { keep_dims: false }, losses, &item_axes[1..])?;
            cx.reduce(&ReduceMean { keep_dims: false }, sums, &[1])?
        }
    };
    Ok(vec![Batched::new(out, Some(0))])
}
