use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::{DataType, INDEX_TYPES, REAL_TYPES, ValueType, type_list};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{Axes, carry_bounds, check_dtype, check_tensor_dtype, resolve_axes, resolve_axis};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;

/// Remove or keep as size 1 the reduced positions of a dimension list.
fn reduce_list<T: Clone>(items: &[T], axes: &[usize], keep_dims: bool, one: T) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match (axes.contains(&i), keep_dims) {
            (false, _) => Some(item.clone()),
            (true, true) => Some(one.clone()),
            (true, false) => None,
        })
        .collect()
}

/// Read the axes of a reduction. An empty list reduces every axis.
fn reduce_axes(op: &str, axis: &TensorType, ndim: usize) -> Result<Option<Axes>, InferError> {
    check_dtype(op, "axis", axis.dtype(), INDEX_TYPES)?;
    let Some(axes) = axis.value_i64s() else {
        return Ok(None);
    };
    if axes.is_empty() {
        return Ok(Some((0..ndim).collect()));
    }
    resolve_axes(op, &axes, ndim).map(Some)
}

fn infer_reduce(
    op: &str,
    keep_dims: bool,
    inputs: &[TensorType],
) -> Result<InferOutput, InferError> {
    let [x, axis] = inputs else {
        return Err(InferError::shape(op, "expected 2 inputs"));
    };
    check_tensor_dtype(op, "x", x.dtype(), REAL_TYPES)?;

    let Some(dims) = x.shape().dims() else {
        return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
    };
    let Some(axes) = reduce_axes(op, axis, dims.len())? else {
        // Axes are only known at runtime. With `keep_dims` the rank is
        // preserved, otherwise it is unknown.
        let shape = if keep_dims {
            Shape::unknown_dims(dims.len())
        } else {
            Shape::UnknownRank
        };
        return Ok(InferOutput::single(TensorType::new(x.dtype(), shape)));
    };

    let out_shape = Shape::new(reduce_list(dims, &axes, keep_dims, Dim::Known(1)));
    let output = carry_bounds(x, TensorType::new(x.dtype(), out_shape), |bounds| {
        reduce_list(bounds, &axes, keep_dims, 1)
    })?;
    Ok(InferOutput::single(output))
}

macro_rules! reduce_op {
    ($op:ident) => {
        #[derive(Clone, Debug, Default)]
        pub struct $op {
            pub keep_dims: bool,
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_reduce(stringify!($op), self.keep_dims, inputs)
            }
        }

        impl_operator!(
            $op,
            ["input_x", "axis"] -> ["y"],
            full,
            attrs = |op| Attributes::from([("keep_dims", AttrValue::Bool(op.keep_dims))])
        );
    };
}

reduce_op!(ReduceSum);
reduce_op!(ReduceMean);
reduce_op!(ReduceMax);

/// Index of the maximum value along an axis.
#[derive(Clone, Debug)]
pub struct ArgMax {
    pub axis: i64,
    pub output_type: DataType,
}

impl ArgMax {
    pub fn new(axis: i64, output_type: DataType) -> Result<ArgMax, ConfigError> {
        if !INDEX_TYPES.contains(&output_type) {
            return Err(ConfigError::NotInSet {
                op: "ArgMax".into(),
                attr: "output_type".into(),
                allowed: type_list(INDEX_TYPES),
                got: output_type.to_string(),
            });
        }
        Ok(ArgMax { axis, output_type })
    }
}

impl Default for ArgMax {
    fn default() -> Self {
        ArgMax {
            axis: -1,
            output_type: DataType::Int32,
        }
    }
}

impl InferTypes for ArgMax {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("ArgMax", "expected 1 input"));
        };
        check_tensor_dtype("ArgMax", "x", x.dtype(), REAL_TYPES)?;
        let dtype = ValueType::Tensor(self.output_type);

        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(dtype, Shape::UnknownRank)));
        };
        let axis = resolve_axis("ArgMax", self.axis, dims.len())?;
        let out_dims = reduce_list(dims, &[axis], false, Dim::Known(1));
        let output = carry_bounds(x, TensorType::new(dtype, Shape::new(out_dims)), |bounds| {
            reduce_list(bounds, &[axis], false, 1)
        })?;
        Ok(InferOutput::single(output).with_derived("axis", axis as i64))
    }
}

impl_operator!(
    ArgMax,
    ["x"] -> ["output"],
    full,
    attrs = |op| Attributes::from([
        ("axis", AttrValue::Int(op.axis)),
        ("output_type", AttrValue::Type(op.output_type)),
    ])
);
