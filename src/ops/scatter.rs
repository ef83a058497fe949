//! Scatter and gather operators.
//!
//! Scatter operators share one shape law, parameterized by whether indices
//! address the first axis of `input_x` ([`ScatterLaw::Flat`]) or a prefix of
//! its axes ([`ScatterLaw::Nd`]).

use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::{ALL_TYPES, DataType, INDEX_TYPES, REAL_TYPES};
use crate::error::InferError;
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{check_dtype, check_same_dtype, dims_compatible, require_int, resolve_axis};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;

/// Which shape law relates `input_x`, `indices` and `updates`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScatterLaw {
    /// `updates.shape == indices.shape + x.shape[1:]`
    Flat,

    /// `updates.shape == indices.shape[:-1] + x.shape[indices.shape[-1]:]`
    Nd,
}

/// Return the shape `updates` must have, or `None` if it cannot be
/// determined statically.
fn expected_updates_shape(
    op: &str,
    law: ScatterLaw,
    x: &[Dim],
    indices: &[Dim],
) -> Result<Option<Vec<Dim>>, InferError> {
    match law {
        ScatterLaw::Flat => {
            if x.is_empty() {
                return Err(InferError::shape(op, "the 'input_x' must have rank >= 1"));
            }
            Ok(Some(indices.iter().chain(&x[1..]).copied().collect()))
        }
        ScatterLaw::Nd => {
            let Some((&last, prefix)) = indices.split_last() else {
                return Err(InferError::shape(op, "the 'indices' must have rank >= 1"));
            };
            let Dim::Known(depth) = last else {
                return Ok(None);
            };
            if depth > x.len() {
                return Err(InferError::shape(
                    op,
                    format!(
                        "the last dimension of 'indices' {} must not exceed the rank of 'input_x' {}",
                        depth,
                        x.len()
                    ),
                ));
            }
            Ok(Some(prefix.iter().chain(&x[depth..]).copied().collect()))
        }
    }
}

/// Check the shape law of a scatter operator and return the output type,
/// which is that of `input_x`.
pub(crate) fn infer_scatter(
    op: &str,
    law: ScatterLaw,
    valid: &[DataType],
    inputs: &[TensorType],
) -> Result<InferOutput, InferError> {
    let [x, indices, updates] = inputs else {
        return Err(InferError::shape(op, "expected 3 inputs"));
    };
    check_dtype(op, "indices", indices.dtype(), INDEX_TYPES)?;
    check_same_dtype(
        op,
        &[("input_x", x.dtype()), ("updates", updates.dtype())],
        valid,
    )?;

    if let (Some(x_dims), Some(idx_dims), Some(upd_dims)) =
        (x.shape().dims(), indices.shape().dims(), updates.shape().dims())
        && let Some(expected) = expected_updates_shape(op, law, x_dims, idx_dims)?
    {
        let matches = expected.len() == upd_dims.len()
            && expected
                .iter()
                .zip(upd_dims)
                .all(|(&a, &b)| dims_compatible(a, b));
        if !matches {
            return Err(InferError::shape(
                op,
                format!(
                    "the shape of 'updates' must be {} for 'input_x' {} and 'indices' {}, but got {}",
                    Shape::new(expected),
                    x.shape(),
                    indices.shape(),
                    updates.shape()
                ),
            ));
        }
    }

    Ok(InferOutput::single(x.clone()))
}

macro_rules! scatter_op {
    ($op:ident, $law:expr, $valid:expr) => {
        #[derive(Clone, Debug, Default)]
        pub struct $op {
            pub use_locking: bool,
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_scatter(stringify!($op), $law, $valid, inputs)
            }
        }

        impl_operator!(
            $op,
            ["input_x", "indices", "updates"] -> ["output"],
            full,
            attrs = |op| Attributes::from([("use_locking", AttrValue::Bool(op.use_locking))])
        );
    };
}

scatter_op!(ScatterUpdate, ScatterLaw::Flat, ALL_TYPES);
scatter_op!(ScatterAdd, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterSub, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterMul, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterDiv, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterMax, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterMin, ScatterLaw::Flat, REAL_TYPES);
scatter_op!(ScatterNdUpdate, ScatterLaw::Nd, ALL_TYPES);
scatter_op!(ScatterNdAdd, ScatterLaw::Nd, REAL_TYPES);
scatter_op!(ScatterNdSub, ScatterLaw::Nd, REAL_TYPES);

/// Gather slices of `input_params` along an axis given by a constant input.
#[derive(Clone, Debug, Default)]
pub struct Gather {}

impl InferTypes for Gather {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [params, indices, axis] = inputs else {
            return Err(InferError::shape("Gather", "expected 3 inputs"));
        };
        check_dtype("Gather", "input_indices", indices.dtype(), INDEX_TYPES)?;
        let axis = require_int("Gather", "axis", axis)?;
        let (Some(p_dims), Some(i_dims)) = (params.shape().dims(), indices.shape().dims()) else {
            return Ok(InferOutput::single(TensorType::new(params.dtype(), Shape::UnknownRank)));
        };
        let axis = resolve_axis("Gather", axis, p_dims.len())?;

        let out_dims: Vec<Dim> = p_dims[..axis]
            .iter()
            .chain(i_dims)
            .chain(&p_dims[axis + 1..])
            .copied()
            .collect();
        let mut output = TensorType::new(params.dtype(), Shape::new(out_dims));
        if !output.shape().is_static()
            && let (Some(p_lo), Some(p_hi), Some(i_lo), Some(i_hi)) = (
                params.lower_dims(),
                params.upper_dims(),
                indices.lower_dims(),
                indices.upper_dims(),
            )
        {
            let join = |p: &[usize], i: &[usize]| -> Vec<usize> {
                p[..axis].iter().chain(i).chain(&p[axis + 1..]).copied().collect()
            };
            output = output.with_shape_bounds(join(&p_lo, &i_lo), join(&p_hi, &i_hi))?;
        }
        Ok(InferOutput::single(output))
    }
}

impl_operator!(Gather, ["input_params", "input_indices", "axis"] -> ["output"], full);

/// Gather slices of `input_x` addressed by the last axis of `indices`.
#[derive(Clone, Debug, Default)]
pub struct GatherNd {}

impl InferTypes for GatherNd {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, indices] = inputs else {
            return Err(InferError::shape("GatherNd", "expected 2 inputs"));
        };
        check_dtype("GatherNd", "indices", indices.dtype(), INDEX_TYPES)?;
        let (Some(x_dims), Some(i_dims)) = (x.shape().dims(), indices.shape().dims()) else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
        };
        let shape = match expected_updates_shape("GatherNd", ScatterLaw::Nd, x_dims, i_dims)? {
            Some(dims) => Shape::new(dims),
            None => Shape::UnknownRank,
        };
        Ok(InferOutput::single(TensorType::new(x.dtype(), shape)))
    }
}

impl_operator!(GatherNd, ["input_x", "indices"] -> ["output"], full);
