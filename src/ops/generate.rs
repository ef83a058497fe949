//! Operators which create tensors from compile-time values.

use crate::attrs::{AttrValue, Attributes};
use crate::const_eval;
use crate::context::InferContext;
use crate::dtype::{DataType, INDEX_TYPES, NUMBER_TYPES, TypeClass, ValueType};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{check_dtype, check_same_dtype, fold_value, require_ints};
use crate::shape::Shape;
use crate::tensor_type::TensorType;
use crate::validator::check_positive_int;
use crate::value::ConstValue;

/// Read the class denoted by a constant type object input.
fn require_type(op: &str, input: &str, ty: &TensorType) -> Result<TypeClass, InferError> {
    ty.value()
        .and_then(|v| v.type_class())
        .ok_or_else(|| InferError::constant_required(op, input))
}

/// Create a tensor of a given type and shape filled with a scalar.
#[derive(Clone, Debug, Default)]
pub struct Fill {}

impl InferTypes for Fill {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [ty, dims, value] = inputs else {
            return Err(InferError::shape("Fill", "expected 3 inputs"));
        };
        let dtype = match require_type("Fill", "type", ty)? {
            TypeClass::Exact(dt) => dt,
            other => {
                return Err(InferError::dtype(
                    "Fill",
                    format!("the 'type' must be an element type, but got {}", other),
                ));
            }
        };
        check_dtype("Fill", "value", value.dtype(), NUMBER_TYPES)?;
        if value.shape().num_elements().is_some_and(|n| n != 1) {
            return Err(InferError::shape(
                "Fill",
                format!("the 'value' must be a scalar, but got shape {}", value.shape()),
            ));
        }

        let Some(dims) = dims.value_i64s() else {
            let shape = match dims.shape().dims().and_then(|d| d.first()?.known()) {
                Some(rank) => Shape::unknown_dims(rank),
                None => Shape::UnknownRank,
            };
            return Ok(InferOutput::single(TensorType::tensor(dtype, shape)));
        };
        if let Some(d) = dims.iter().find(|&&d| d < 0) {
            return Err(InferError::shape(
                "Fill",
                format!("the 'dims' must be non-negative, but got {} in {:?}", d, dims),
            ));
        }
        let dims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();

        let output = TensorType::tensor(dtype, Shape::fixed(&dims));
        let output = match value.value() {
            Some(scalar) => fold_value("Fill", ctx, output, || {
                const_eval::fill(&dims, &scalar.cast(dtype)?)
            })?,
            None => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(Fill, ["type", "shape", "value"] -> ["output"], full);

/// Convert a constant tuple to a 1D tensor.
#[derive(Clone, Debug, Default)]
pub struct TupleToArray {}

impl InferTypes for TupleToArray {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("TupleToArray", "expected 1 input"));
        };
        let ValueType::Tuple(dt) = x.dtype() else {
            return Err(InferError::dtype(
                "TupleToArray",
                format!("the 'input_x' must be a tuple, but got {}", x.dtype()),
            ));
        };
        let value = x
            .value()
            .ok_or_else(|| InferError::constant_required("TupleToArray", "input_x"))?;
        if value.is_empty() {
            return Err(InferError::shape(
                "TupleToArray",
                "the 'input_x' must not be empty",
            ));
        }
        let output = TensorType::tensor(dt, x.shape().clone()).with_value(value.clone())?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(TupleToArray, ["input_x"] -> ["y"], full);

/// Convert a constant number to a 0D tensor.
#[derive(Clone, Debug, Default)]
pub struct ScalarToArray {}

impl InferTypes for ScalarToArray {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("ScalarToArray", "expected 1 input"));
        };
        let ValueType::Number(dt) = x.dtype() else {
            return Err(InferError::dtype(
                "ScalarToArray",
                format!("the 'input_x' must be a number, but got {}", x.dtype()),
            ));
        };
        let value = x
            .value()
            .ok_or_else(|| InferError::constant_required("ScalarToArray", "input_x"))?;
        let output = TensorType::tensor(dt, Shape::scalar()).with_value(value.clone())?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(ScalarToArray, ["input_x"] -> ["y"], full);

/// Compute the inverse of a constant permutation.
#[derive(Clone, Debug, Default)]
pub struct InvertPermutation {}

impl InferTypes for InvertPermutation {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("InvertPermutation", "expected 1 input"));
        };
        check_dtype("InvertPermutation", "input_x", x.dtype(), INDEX_TYPES)?;
        let perm = require_ints("InvertPermutation", "input_x", x)?;
        if x.rank() != Some(1) {
            return Err(InferError::shape(
                "InvertPermutation",
                format!("the 'input_x' must be 1D, but got shape {}", x.shape()),
            ));
        }

        let n = perm.len();
        let mut inverse = vec![-1i64; n];
        for (i, &p) in perm.iter().enumerate() {
            if p < 0 || p as usize >= n || inverse[p as usize] != -1 {
                return Err(InferError::shape(
                    "InvertPermutation",
                    format!(
                        "the 'input_x' must be a permutation of [0, {}), but got {:?}",
                        n, perm
                    ),
                ));
            }
            inverse[p as usize] = i as i64;
        }
        let output = TensorType::new(x.dtype(), x.shape().clone()).with_value(ConstValue::int_vec(&inverse))?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(InvertPermutation, ["input_x"] -> ["output"], full);

/// Check whether one type object denotes a subclass of another.
#[derive(Clone, Debug, Default)]
pub struct IsSubClass {}

impl InferTypes for IsSubClass {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [sub, sup] = inputs else {
            return Err(InferError::shape("IsSubClass", "expected 2 inputs"));
        };
        let sub = require_type("IsSubClass", "sub_type", sub)?;
        let sup = require_type("IsSubClass", "type_", sup)?;
        let output = TensorType::constant(
            ValueType::Number(DataType::Bool),
            ConstValue::bool_scalar(sub.is_subclass_of(sup)),
        )?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(IsSubClass, ["sub_type", "type_"] -> ["output"], full);

const RANGE_TYPES: &[DataType] = &[
    DataType::Int32,
    DataType::Int64,
    DataType::Float32,
    DataType::Float64,
];

/// Generate the sequence `start, start + delta, ...` up to `limit`.
///
/// The output length is bounded by `maxlen`.
#[derive(Clone, Debug)]
pub struct Range {
    pub maxlen: usize,
}

impl Range {
    pub fn new(maxlen: i64) -> Result<Range, ConfigError> {
        let maxlen = check_positive_int("Range", "maxlen", maxlen)?;
        Ok(Range { maxlen })
    }
}

impl Default for Range {
    fn default() -> Self {
        Range { maxlen: 1_000_000 }
    }
}

impl InferTypes for Range {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [start, limit, delta] = inputs else {
            return Err(InferError::shape("Range", "expected 3 inputs"));
        };
        let dt = check_same_dtype(
            "Range",
            &[
                ("start", start.dtype()),
                ("limit", limit.dtype()),
                ("delta", delta.dtype()),
            ],
            RANGE_TYPES,
        )?;
        for (name, input) in [("start", start), ("limit", limit), ("delta", delta)] {
            if input.shape().num_elements().is_some_and(|n| n != 1) {
                return Err(InferError::shape(
                    "Range",
                    format!("the '{}' must be a scalar, but got shape {}", name, input.shape()),
                ));
            }
        }

        let scalar = |t: &TensorType| t.value().and_then(|v| v.to_f64_scalar());
        let (Some(start), Some(limit), Some(delta)) = (scalar(start), scalar(limit), scalar(delta)) else {
            let output = TensorType::tensor(dt, Shape::unknown_dims(1))
                .with_shape_bounds(vec![0], vec![self.maxlen])?;
            return Ok(InferOutput::single(output));
        };

        if delta == 0.0 {
            return Err(InferError::shape("Range", "the 'delta' must not be 0"));
        }
        if (delta > 0.0 && start > limit) || (delta < 0.0 && start < limit) {
            return Err(InferError::shape(
                "Range",
                format!(
                    "the sign of 'delta' {} must agree with 'limit' - 'start' ({} - {})",
                    delta, limit, start
                ),
            ));
        }
        let len = ((limit - start) / delta).ceil() as usize;
        if len > self.maxlen {
            return Err(InferError::shape(
                "Range",
                format!("the output length {} exceeds 'maxlen' {}", len, self.maxlen),
            ));
        }

        let output = TensorType::tensor(dt, Shape::fixed(&[len]));
        let output = fold_value("Range", ctx, output, || {
            const_eval::range(start, limit, delta, dt.is_int())
        })?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    Range,
    ["start", "limit", "delta"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("maxlen", AttrValue::Int(op.maxlen as i64))])
);
