//! Operators which change the shape, layout or element type of a tensor
//! without combining elements.

use crate::attrs::{AttrValue, Attributes};
use crate::const_eval;
use crate::context::InferContext;
use crate::dtype::{ALL_TYPES, DataType, INDEX_TYPES, TypeClass, ValueType};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{
    carry_bounds, check_dtype, fold_value, require_int, require_ints, resolve_axes, resolve_index,
};
use crate::shape::{Dim, Shape as SymShape};
use crate::tensor_type::TensorType;
use crate::value::ConstValue;

fn checked_product(dims: impl IntoIterator<Item = usize>) -> Option<usize> {
    dims.into_iter().try_fold(1usize, |n, d| n.checked_mul(d))
}

/// Resolve a target shape for `Reshape` against a static element count.
fn resolve_reshape(total: usize, target: &[i64]) -> Result<Vec<usize>, String> {
    let mut infer_pos = None;
    let mut known = 1usize;
    for (i, &dim) in target.iter().enumerate() {
        match dim {
            -1 if infer_pos.is_none() => infer_pos = Some(i),
            -1 => return Err(format!("the shape {:?} has more than one -1", target)),
            d if d >= 0 => {
                known = known
                    .checked_mul(d as usize)
                    .ok_or_else(|| format!("the size of shape {:?} overflows", target))?;
            }
            d => return Err(format!("the shape {:?} has invalid dimension {}", target, d)),
        }
    }

    let mut out: Vec<usize> = target.iter().map(|&d| d.max(0) as usize).collect();
    match infer_pos {
        Some(pos) => {
            if known == 0 || total % known != 0 {
                return Err(format!(
                    "the product of the known dimensions of {:?} must divide the input size {}",
                    target, total
                ));
            }
            out[pos] = total / known;
        }
        None if known != total => {
            return Err(format!(
                "the product of the shape {:?} is {} but the input size is {}",
                target, known, total
            ));
        }
        None => {}
    }
    Ok(out)
}

/// Reshape a tensor to the shape given by its second input.
///
/// The target may contain one `-1`, which is solved from the input's
/// element count.
#[derive(Clone, Debug, Default)]
pub struct Reshape {}

impl Reshape {
    fn infer_dynamic_target(x: &TensorType, shape: &TensorType) -> Result<TensorType, InferError> {
        // Value bounds give a bounded shape of known rank.
        if let (Some(lo), Some(hi)) = (shape.min_value(), shape.max_value()) {
            let dims = lo.iter().zip(hi).map(|(&lo, &hi)| {
                if lo == hi && lo >= 0 {
                    Dim::Known(lo as usize)
                } else {
                    Dim::Unknown
                }
            });
            let out = TensorType::new(x.dtype(), SymShape::new(dims));
            let min = lo.iter().map(|&v| v.max(0) as usize).collect();
            let max = hi.iter().map(|&v| v.max(0) as usize).collect();
            return out.with_shape_bounds(min, max);
        }
        let out_shape = match shape.shape().dims() {
            Some([Dim::Known(rank)]) => SymShape::unknown_dims(*rank),
            _ => SymShape::UnknownRank,
        };
        Ok(TensorType::new(x.dtype(), out_shape))
    }
}

impl InferTypes for Reshape {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, shape] = inputs else {
            return Err(InferError::shape("Reshape", "expected 2 inputs"));
        };
        check_dtype("Reshape", "input_shape", shape.dtype(), INDEX_TYPES)?;

        let Some(target) = shape.value_i64s() else {
            return Ok(InferOutput::single(Self::infer_dynamic_target(x, shape)?));
        };

        if let Some(total) = x.shape().num_elements() {
            let out_dims = resolve_reshape(total, &target)
                .map_err(|msg| InferError::shape("Reshape", msg))?;
            let output = TensorType::new(x.dtype(), SymShape::fixed(&out_dims));
            let output = match x.value() {
                Some(value) => fold_value("Reshape", ctx, output, || value.reshaped(&out_dims))?,
                None => output,
            };
            return Ok(InferOutput::single(output));
        }

        // Dynamic input. Without a -1 the target is the output shape.
        if target.iter().filter(|&&d| d == -1).count() > 1 || target.iter().any(|&d| d < -1) {
            return Err(InferError::shape(
                "Reshape",
                format!("invalid target shape {:?}", target),
            ));
        }
        let dims = target.iter().map(|&d| {
            if d >= 0 {
                Dim::Known(d as usize)
            } else {
                Dim::Unknown
            }
        });
        let output = TensorType::new(x.dtype(), SymShape::new(dims));

        let known = checked_product(target.iter().filter(|&&d| d >= 0).map(|&d| d as usize))
            .ok_or_else(|| {
                InferError::shape("Reshape", format!("the size of shape {:?} overflows", target))
            })?;
        let bounded = match (x.lower_dims(), x.upper_dims()) {
            (Some(lo), Some(hi)) if known > 0 => {
                let (Some(lo_total), Some(hi_total)) =
                    (checked_product(lo.iter().copied()), checked_product(hi.iter().copied()))
                else {
                    return Ok(InferOutput::single(output));
                };
                let solve = |total: usize| {
                    target
                        .iter()
                        .map(|&d| if d >= 0 { d as usize } else { total / known })
                        .collect::<Vec<_>>()
                };
                Some(output.clone().with_shape_bounds(solve(lo_total), solve(hi_total))?)
            }
            _ => None,
        };
        Ok(InferOutput::single(bounded.unwrap_or(output)))
    }
}

impl_operator!(Reshape, ["input_x", "input_shape"] -> ["output"], full);

/// Insert a dimension of size 1.
#[derive(Clone, Debug, Default)]
pub struct ExpandDims {}

impl InferTypes for ExpandDims {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, axis] = inputs else {
            return Err(InferError::shape("ExpandDims", "expected 2 inputs"));
        };
        let axis = require_int("ExpandDims", "axis", axis)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), SymShape::UnknownRank)));
        };
        let ndim = dims.len();
        let pos = resolve_index(ndim + 1, axis).ok_or_else(|| {
            InferError::shape(
                "ExpandDims",
                format!(
                    "the 'axis' must be in range [{}, {}], but got {}",
                    -(ndim as i64) - 1,
                    ndim,
                    axis
                ),
            )
        })?;

        let mut out_dims = dims.to_vec();
        out_dims.insert(pos, Dim::Known(1));
        let output = TensorType::new(x.dtype(), SymShape::new(out_dims));
        let output = carry_bounds(x, output, |bounds| {
            let mut bounds = bounds.to_vec();
            bounds.insert(pos, 1);
            bounds
        })?;
        let output = match (x.value(), output.shape().to_fixed()) {
            (Some(value), Some(out_shape)) => {
                fold_value("ExpandDims", ctx, output, || value.reshaped(&out_shape))?
            }
            _ => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(ExpandDims, ["input_x", "axis"] -> ["output"], full);

/// Remove dimensions of size 1.
///
/// An empty axis list removes every size-1 dimension.
#[derive(Clone, Debug, Default)]
pub struct Squeeze {
    pub axis: Vec<i64>,
}

impl InferTypes for Squeeze {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Squeeze", "expected 1 input"));
        };
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), SymShape::UnknownRank)));
        };

        let removed: Vec<usize> = if self.axis.is_empty() {
            if dims.iter().any(|d| !d.is_known()) {
                return Ok(InferOutput::single(TensorType::new(x.dtype(), SymShape::UnknownRank)));
            }
            (0..dims.len()).filter(|&i| dims[i] == Dim::Known(1)).collect()
        } else {
            let axes = resolve_axes("Squeeze", &self.axis, dims.len())?;
            for &axis in &axes {
                if let Dim::Known(size) = dims[axis]
                    && size != 1
                {
                    return Err(InferError::shape(
                        "Squeeze",
                        format!(
                            "cannot select an axis to squeeze out which has size not equal to one, axis {} of {}",
                            axis,
                            x.shape()
                        ),
                    ));
                }
            }
            axes.to_vec()
        };

        let keep = |i: &usize| !removed.contains(i);
        let out_dims = (0..dims.len()).filter(keep).map(|i| dims[i]);
        let output = TensorType::new(x.dtype(), SymShape::new(out_dims));
        let output = carry_bounds(x, output, |bounds| {
            (0..bounds.len()).filter(keep).map(|i| bounds[i]).collect()
        })?;
        let output = match (x.value(), output.shape().to_fixed()) {
            (Some(value), Some(out_shape)) => {
                fold_value("Squeeze", ctx, output, || value.reshaped(&out_shape))?
            }
            _ => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    Squeeze,
    ["input_x"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("axis", AttrValue::Ints(op.axis.clone()))])
);

/// Permute the dimensions of a tensor. The permutation must be constant.
#[derive(Clone, Debug, Default)]
pub struct Transpose {}

impl InferTypes for Transpose {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, perm] = inputs else {
            return Err(InferError::shape("Transpose", "expected 2 inputs"));
        };
        let perm = require_ints("Transpose", "input_perm", perm)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(
                x.dtype(),
                SymShape::unknown_dims(perm.len()),
            )));
        };
        if perm.len() != dims.len() {
            return Err(InferError::shape(
                "Transpose",
                format!(
                    "the length of 'input_perm' {:?} must be equal to the rank of 'input_x' {}",
                    perm,
                    x.shape()
                ),
            ));
        }
        let perm = resolve_axes("Transpose", &perm, dims.len())?;

        let output = TensorType::new(x.dtype(), SymShape::new(perm.iter().map(|&p| dims[p])));
        let output = carry_bounds(x, output, |bounds| perm.iter().map(|&p| bounds[p]).collect())?;
        let output = match x.value() {
            Some(value) => fold_value("Transpose", ctx, output, || {
                const_eval::transpose(value, &perm)
            })?,
            None => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(Transpose, ["input_x", "input_perm"] -> ["output"], full);

/// Broadcast a tensor to a target shape. `-1` entries keep the input's
/// size at that position.
#[derive(Clone, Debug)]
pub struct BroadcastTo {
    pub shape: Vec<i64>,
}

impl BroadcastTo {
    pub fn new(shape: Vec<i64>) -> Result<BroadcastTo, ConfigError> {
        if shape.is_empty() || shape.iter().any(|&d| d == 0 || d < -1) {
            return Err(ConfigError::OutOfRange {
                op: "BroadcastTo".into(),
                attr: "shape".into(),
                requirement: "a non-empty tuple of positive ints or -1".into(),
                got: format!("{:?}", shape),
            });
        }
        Ok(BroadcastTo { shape })
    }
}

impl InferTypes for BroadcastTo {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("BroadcastTo", "expected 1 input"));
        };
        let Some(dims) = x.shape().dims() else {
            let dims = self.shape.iter().map(|&d| {
                if d > 0 {
                    Dim::Known(d as usize)
                } else {
                    Dim::Unknown
                }
            });
            return Ok(InferOutput::single(TensorType::new(x.dtype(), SymShape::new(dims))));
        };
        let ndim = self.shape.len();
        if dims.len() > ndim {
            return Err(InferError::shape(
                "BroadcastTo",
                format!(
                    "the rank of 'input_x' {} must not exceed the length of 'shape' {:?}",
                    x.shape(),
                    self.shape
                ),
            ));
        }

        let pad = ndim - dims.len();
        let mut out = Vec::with_capacity(ndim);
        for (i, &target) in self.shape.iter().enumerate() {
            let src = if i < pad { None } else { Some(dims[i - pad]) };
            let dim = match (target, src) {
                (-1, Some(d)) => d,
                (-1, None) => {
                    return Err(InferError::shape(
                        "BroadcastTo",
                        format!("-1 in 'shape' {:?} at a position not in 'input_x'", self.shape),
                    ));
                }
                (t, Some(Dim::Known(d))) if d != 1 && d as i64 != t => {
                    return Err(InferError::shape(
                        "BroadcastTo",
                        format!("the input {} can not broadcast to {:?}", x.shape(), self.shape),
                    ));
                }
                (t, _) => Dim::Known(t as usize),
            };
            out.push(dim);
        }

        let output = TensorType::new(x.dtype(), SymShape::new(out));
        let output = carry_bounds(x, output, |bounds| {
            (0..ndim)
                .map(|i| match self.shape[i] {
                    -1 => bounds[i - pad],
                    t => t as usize,
                })
                .collect()
        })?;
        let output = match (x.value(), output.shape().to_fixed()) {
            (Some(value), Some(out_shape)) => fold_value("BroadcastTo", ctx, output, || {
                const_eval::broadcast_to(value, &out_shape)
            })?,
            _ => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    BroadcastTo,
    ["input_x"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("shape", AttrValue::Ints(op.shape.clone()))])
);

/// Return the shape of a tensor as a tuple.
///
/// The value is known when the shape is static. For dynamic shapes with
/// bounds, the result carries value bounds instead.
#[derive(Clone, Debug, Default)]
pub struct Shape {}

impl InferTypes for Shape {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Shape", "expected 1 input"));
        };
        let dtype = ValueType::Tuple(DataType::Int64);
        let Some(rank) = x.rank() else {
            return Ok(InferOutput::single(TensorType::new(dtype, SymShape::unknown_dims(1))));
        };
        let output = TensorType::new(dtype, SymShape::fixed(&[rank]));
        let output = if let Some(dims) = x.shape().to_fixed() {
            let values: Vec<i64> = dims.iter().map(|&d| d as i64).collect();
            output.with_value(ConstValue::int_vec(&values))?
        } else if let (Some(lo), Some(hi)) = (x.lower_dims(), x.upper_dims()) {
            let to_i64 = |v: Vec<usize>| v.into_iter().map(|d| d as i64).collect();
            output.with_value_bounds(to_i64(lo), to_i64(hi))?
        } else {
            output
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(Shape, ["input_x"] -> ["output"], full);

/// Return the rank of a tensor as a constant number.
#[derive(Clone, Debug, Default)]
pub struct Rank {}

impl InferTypes for Rank {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Rank", "expected 1 input"));
        };
        let rank = x
            .rank()
            .ok_or_else(|| InferError::constant_required("Rank", "input_x"))?;
        Ok(InferOutput::single(TensorType::const_int(rank as i64)))
    }
}

impl_operator!(Rank, ["input_x"] -> ["output"], full);

/// Return the element count of a tensor as a constant number.
#[derive(Clone, Debug, Default)]
pub struct Size {}

impl InferTypes for Size {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Size", "expected 1 input"));
        };
        if !x.shape().is_static() {
            return Err(InferError::constant_required("Size", "input_x"));
        }
        let size = x
            .shape()
            .num_elements()
            .filter(|&n| i64::try_from(n).is_ok())
            .ok_or_else(|| InferError::shape("Size", format!("the size of {} overflows", x.shape())))?;
        Ok(InferOutput::single(TensorType::const_int(size as i64)))
    }
}

impl_operator!(Size, ["input_x"] -> ["output"], full);

/// Convert the elements of a tensor or number to the type given by a
/// constant type object.
///
/// Records the source and destination types as the derived attributes
/// `SrcT` and `DstT`.
#[derive(Clone, Debug, Default)]
pub struct Cast {}

impl InferTypes for Cast {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, ty] = inputs else {
            return Err(InferError::shape("Cast", "expected 2 inputs"));
        };
        let src = check_dtype("Cast", "input_x", x.dtype(), ALL_TYPES)?;
        let dst = match ty.value().and_then(|v| v.type_class()) {
            Some(TypeClass::Exact(dt)) => dt,
            Some(other) => {
                return Err(InferError::dtype(
                    "Cast",
                    format!("the 'type' must be an element type, but got {}", other),
                ));
            }
            None => return Err(InferError::constant_required("Cast", "type")),
        };

        let output = TensorType::new(x.dtype().with_elem(dst), x.shape().clone());
        let output = carry_bounds(x, output, |bounds| bounds.to_vec())?;
        let output = match x.value() {
            Some(value) => fold_value("Cast", ctx, output, || value.cast(dst))?,
            None => output,
        };
        Ok(InferOutput::single(output)
            .with_derived("SrcT", src)
            .with_derived("DstT", dst))
    }
}

impl_operator!(Cast, ["input_x", "type"] -> ["output"], full);

/// Unique elements of a 1D tensor and the index of each input element in
/// the output. The output size depends on the data, so there is no static
/// inference.
#[derive(Clone, Debug, Default)]
pub struct Unique {}

impl_operator!(Unique, ["input_x"] -> ["output", "idx"], native);
