//! Rules for neural network layers.

use crate::error::VmapError;
use crate::operator::Operator;
use crate::ops::{self, BiasAdd, BiasAddGrad, DeformableOffsets, InTopK, Pad, PadV3, channel_axis};
use crate::vmap::{Backend, Batched, BatchedValues, VmapContext, with_dim};

pub(super) fn bias_add<B: Backend>(
    cx: &VmapContext<B>,
    op: &BiasAdd,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, bias] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    let rank = cx.logical_rank(x)?;
    let channel = channel_axis(&op.data_format, rank) + 1;

    // Reshape the bias so it broadcasts along the channel axis of the
    // batched input.
    let mut shape = vec![1; rank + 1];
    shape[channel] = -1;
    let bias = match bias.dim {
        Some(_) => {
            shape[0] = cx.axis_size() as i64;
            let bias = cx.bdim_at_front(bias)?;
            cx.reshape(bias, &shape)?
        }
        None => cx.reshape(bias.value.clone(), &shape)?,
    };
    let x = cx.bdim_at_front(x)?;
    let out = cx.call_one(&ops::Add {}, &[x, bias])?;
    Ok(vec![Batched::new(out, Some(0))])
}

pub(super) fn bias_add_grad<B: Backend>(
    cx: &VmapContext<B>,
    op: &BiasAddGrad,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [dout] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let rank = cx.logical_rank(dout)?;
    let channel = channel_axis(&op.data_format, rank) + 1;
    let axes: Vec<i64> = (1..=rank).filter(|&d| d != channel).map(|d| d as i64).collect();
    let dout = cx.bdim_at_front(dout)?;
    let out = cx.reduce(&ops::ReduceSum { keep_dims: false }, dout, &axes)?;
    Ok(vec![Batched::new(out, Some(0))])
}

/// Rule for operators whose kernel expects a first input of rank `RANK`.
///
/// The batch axis of the first input is moved to the front and merged with
/// the item's leading axes if the batched rank exceeds `RANK`. The other
/// inputs must be unbatched.
pub(super) fn fixed_rank<B: Backend, Op: Operator, const RANK: usize>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let Some((x, rest)) = inputs.split_first() else {
        return Err(cx.input_count_error(op.input_names().len(), 0));
    };
    cx.require_unbatched_tail(op, inputs)?;
    let x = cx.bdim_at_front(x)?;
    let rest: Vec<_> = rest.iter().map(|v| v.value.clone()).collect();
    Ok(with_dim(cx.call_collapsed(op, x, RANK, &rest)?, Some(0)))
}

/// Rule for `DeformableOffsets`. The batch axis of both inputs is merged
/// into their leading axis.
pub(super) fn deformable_offsets<B: Backend>(
    cx: &VmapContext<B>,
    op: &DeformableOffsets,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, offsets] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    let x = cx.bdim_at_front(x)?;
    let offsets = cx.bdim_at_front(offsets)?;
    let x_dims = cx.dims(&x)?;
    let offset_dims = cx.dims(&offsets)?;
    if x_dims.len() != 5 || offset_dims.len() != 5 {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "the inputs must be batched rank 4 tensors, but got shapes {:?} and {:?}",
                x_dims, offset_dims
            ),
        ));
    }
    if x_dims[2..].contains(&-1) || offset_dims[2..].contains(&-1) {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "the channel and spatial dimensions must be static, but got shapes {:?} and {:?}",
                x_dims, offset_dims
            ),
        ));
    }

    let merged = |dims: &[i64]| -> Vec<i64> {
        [-1].into_iter().chain(dims[2..].iter().copied()).collect()
    };
    let x = cx.reshape(x, &merged(&x_dims))?;
    let offsets = cx.reshape(offsets, &merged(&offset_dims))?;
    let out = cx.call_one(op, &[x, offsets])?;

    let out_dims = cx.dims(&out)?;
    let n = if x_dims[1] >= 0 { x_dims[1] } else { offset_dims[1] };
    let shape: Vec<i64> = [cx.axis_size() as i64, n]
        .into_iter()
        .chain(out_dims[1..].iter().copied())
        .collect();
    if shape.iter().filter(|&&d| d == -1).count() > 1 {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!("cannot restore the leading axes of output shape {:?}", out_dims),
        ));
    }
    let out = cx.reshape(out, &shape)?;
    Ok(vec![Batched::new(out, Some(0))])
}

/// Rule for operators which accept any number of leading batch axes on
/// every input.
pub(super) fn all_at_front<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let values = inputs
        .iter()
        .map(|x| cx.bdim_at_front(x))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(with_dim(cx.call(op, &values)?, Some(0)))
}

pub(super) fn in_top_k<B: Backend>(
    cx: &VmapContext<B>,
    op: &InTopK,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x1, x2] = inputs else {
        return Err(cx.input_count_error(2, inputs.len()));
    };
    let x1 = cx.bdim_at_front(x1)?;
    let x2 = cx.bdim_at_front(x2)?;
    let classes = cx.dims(&x1)?.last().copied().unwrap_or(-1);
    let x1 = cx.reshape(x1, &[-1, classes])?;
    let x2 = cx.reshape(x2, &[-1])?;
    let out = cx.call_one(op, &[x1, x2])?;
    let out = cx.reshape(out, &[cx.axis_size() as i64, -1])?;
    Ok(vec![Batched::new(out, Some(0))])
}

/// Pad a batched tensor, leaving its batch axis unpadded.
pub(super) fn pad<B: Backend>(
    cx: &VmapContext<B>,
    op: &Pad,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x] = inputs else {
        return Err(cx.input_count_error(1, inputs.len()));
    };
    let Some(dim) = x.dim else {
        return Ok(with_dim(cx.call(op, &[x.value.clone()])?, None));
    };
    let mut paddings = op.paddings.clone();
    if dim > paddings.len() {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "the batch axis {} is out of range for {} paddings",
                dim,
                paddings.len()
            ),
        ));
    }
    paddings.insert(dim, [0, 0]);
    let outputs = cx.call(&Pad { paddings }, &[x.value.clone()])?;
    Ok(with_dim(outputs, Some(dim)))
}

/// Maximum number of trailing axes `PadV3` can pad when leading axes are
/// folded together.
const PAD_V3_MAX_PADDED_AXES: usize = 3;

pub(super) fn pad_v3<B: Backend>(
    cx: &VmapContext<B>,
    op: &PadV3,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let [x, paddings, ..] = inputs else {
        return Err(cx.input_count_error(op.input_names().len(), inputs.len()));
    };
    cx.require_unbatched("paddings", paddings)?;

    // The paddings apply to trailing axes, so they must not reach the batch
    // axis once it is moved to the front.
    let item_rank = cx.logical_rank(x)?;
    let padded_axes = match cx.dims(&paddings.value)?.as_slice() {
        [len] if *len >= 0 => *len as usize / 2,
        dims => {
            return Err(VmapError::unsupported(
                cx.op_name(),
                format!("the 'paddings' must have a static length, but got shape {:?}", dims),
            ));
        }
    };
    if padded_axes > item_rank {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "{} axes are padded but the input has rank {}",
                padded_axes, item_rank
            ),
        ));
    }
    if padded_axes > PAD_V3_MAX_PADDED_AXES && item_rank + 1 > 4 {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!(
                "at most {} axes can be padded for batched inputs of rank > 4, but got {}",
                PAD_V3_MAX_PADDED_AXES, padded_axes
            ),
        ));
    }
    fixed_rank::<B, PadV3, 4>(cx, op, inputs)
}

/// Rule for local response normalization and its gradient.
///
/// These normalize across the channel axis of `NCHW` inputs, so the batch
/// axis is moved to the back and merged with the last spatial axis.
pub(super) fn channels_last<B: Backend, Op: Operator>(
    cx: &VmapContext<B>,
    op: &Op,
    inputs: &[Batched<B::Value>],
) -> Result<BatchedValues<B>, VmapError> {
    let values = inputs
        .iter()
        .map(|x| cx.bdim_at_back(x))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(first) = values.first() else {
        return Err(cx.input_count_error(op.input_names().len(), 0));
    };
    let dims = cx.dims(first)?;
    let out_dim = dims.len() - 1;
    if dims.len() <= 4 {
        return Ok(with_dim(cx.call(op, &values)?, Some(out_dim)));
    }
    if dims.iter().filter(|&&d| d == -1).count() > 1 {
        return Err(VmapError::unsupported(
            cx.op_name(),
            format!("cannot merge the batch axis of dynamic shape {:?}", dims),
        ));
    }

    tracing::trace!(op = cx.op_name(), rank = dims.len(), "merge batch axis into last axis");
    let merged: Vec<i64> = dims[..3].iter().copied().chain([-1]).collect();
    let values = values
        .into_iter()
        .map(|v| cx.reshape(v, &merged))
        .collect::<Result<Vec<_>, _>>()?;
    let outputs = cx
        .call(op, &values)?
        .into_iter()
        .map(|v| cx.reshape(v, &dims))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(with_dim(outputs, Some(out_dim)))
}
