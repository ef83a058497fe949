use crate::attrs::{AttrValue, Attributes};
use crate::const_eval;
use crate::context::InferContext;
use crate::dtype::ALL_TYPES;
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{check_same_dtype, dims_compatible, fold_value, resolve_index};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;
use crate::validator::check_positive_int;
use crate::value::ConstValue;

fn axis_error(op: &str, axis: i64, lo: i64, hi: i64) -> InferError {
    InferError::shape(
        op,
        format!("the 'axis' must be in range [{}, {}), but got {}", lo, hi, axis),
    )
}

/// Check that inputs agree on element type and return the common rank, or
/// `None` if no input has a known rank.
fn common_rank(op: &str, inputs: &[TensorType]) -> Result<Option<usize>, InferError> {
    let names: Vec<String> = (0..inputs.len()).map(|i| format!("x[{}]", i)).collect();
    let dtypes: Vec<_> = names
        .iter()
        .zip(inputs)
        .map(|(name, x)| (name.as_str(), x.dtype()))
        .collect();
    check_same_dtype(op, &dtypes, ALL_TYPES)?;

    let mut rank = None;
    for (i, x) in inputs.iter().enumerate() {
        match (rank, x.rank()) {
            (None, Some(r)) => rank = Some(r),
            (Some(expected), Some(r)) if r != expected => {
                return Err(InferError::shape(
                    op,
                    format!(
                        "all inputs must have the same rank, but x[0] has rank {} and x[{}] has shape {}",
                        expected,
                        i,
                        x.shape()
                    ),
                ));
            }
            _ => {}
        }
    }
    Ok(rank)
}

/// Collect constant values of all inputs, if every input is constant.
fn all_values(inputs: &[TensorType]) -> Option<Vec<&ConstValue>> {
    inputs.iter().map(|x| x.value()).collect()
}

/// Intersect the shape bounds of inputs which must agree in shape, except
/// on `skip_axis`. Returns `None` if any input lacks bounds or they do not
/// overlap.
fn merge_bounds(inputs: &[TensorType], skip_axis: Option<usize>) -> Option<(Vec<usize>, Vec<usize>)> {
    let mut lo = inputs.first()?.lower_dims()?;
    let mut hi = inputs.first()?.upper_dims()?;
    for x in &inputs[1..] {
        let (x_lo, x_hi) = (x.lower_dims()?, x.upper_dims()?);
        for d in (0..lo.len()).filter(|&d| Some(d) != skip_axis) {
            lo[d] = lo[d].max(*x_lo.get(d)?);
            hi[d] = hi[d].min(*x_hi.get(d)?);
        }
    }
    lo.iter().zip(&hi).all(|(lo, hi)| lo <= hi).then_some((lo, hi))
}

/// Join tensors along an existing axis.
#[derive(Clone, Debug, Default)]
pub struct Concat {
    pub axis: i64,
}

impl InferTypes for Concat {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let Some(first) = inputs.first() else {
            return Err(InferError::shape("Concat", "expected at least 1 input"));
        };
        let Some(ndim) = common_rank("Concat", inputs)? else {
            return Ok(InferOutput::single(TensorType::new(first.dtype(), Shape::UnknownRank)));
        };
        if ndim == 0 {
            return Err(InferError::shape("Concat", "cannot concatenate scalars"));
        }
        let axis = resolve_index(ndim, self.axis)
            .ok_or_else(|| axis_error("Concat", self.axis, -(ndim as i64), ndim as i64))?;

        let mut out: Vec<Dim> = vec![Dim::Unknown; ndim];
        let mut axis_size = Some(0usize);
        for (i, x) in inputs.iter().enumerate() {
            let Some(dims) = x.shape().dims() else {
                axis_size = None;
                continue;
            };
            for (d, &dim) in dims.iter().enumerate() {
                if d == axis {
                    axis_size = axis_size.zip(dim.known()).map(|(a, b)| a + b);
                    continue;
                }
                if !dims_compatible(out[d], dim) {
                    return Err(InferError::shape(
                        "Concat",
                        format!(
                            "all inputs must have the same shape except on axis {}, but x[{}] has shape {}",
                            axis,
                            i,
                            x.shape()
                        ),
                    ));
                }
                if dim.is_known() {
                    out[d] = dim;
                }
            }
        }
        out[axis] = axis_size.map(Dim::Known).unwrap_or(Dim::Unknown);

        let mut output = TensorType::new(first.dtype(), Shape::new(out));
        if !output.shape().is_static()
            && let Some((mut lo, mut hi)) = merge_bounds(inputs, Some(axis))
        {
            lo[axis] = inputs.iter().filter_map(|x| x.lower_dims()).map(|b| b[axis]).sum();
            hi[axis] = inputs.iter().filter_map(|x| x.upper_dims()).map(|b| b[axis]).sum();
            output = output.with_shape_bounds(lo, hi)?;
        }

        if let Some(values) = all_values(inputs) {
            output = fold_value("Concat", ctx, output, || const_eval::concat(&values, axis))?;
        }
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    Concat,
    ["x"] -> ["output"],
    full,
    variadic = true,
    attrs = |op| Attributes::from([("axis", AttrValue::Int(op.axis))])
);

/// Join tensors of the same shape along a new axis.
#[derive(Clone, Debug, Default)]
pub struct Stack {
    pub axis: i64,
}

impl InferTypes for Stack {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let Some(first) = inputs.first() else {
            return Err(InferError::shape("Stack", "expected at least 1 input"));
        };
        let Some(ndim) = common_rank("Stack", inputs)? else {
            return Ok(InferOutput::single(TensorType::new(first.dtype(), Shape::UnknownRank)));
        };
        let axis = resolve_index(ndim + 1, self.axis)
            .ok_or_else(|| axis_error("Stack", self.axis, -(ndim as i64) - 1, ndim as i64 + 1))?;

        let mut dims: Vec<Dim> = vec![Dim::Unknown; ndim];
        for (i, x) in inputs.iter().enumerate() {
            let Some(x_dims) = x.shape().dims() else {
                continue;
            };
            for (d, &dim) in x_dims.iter().enumerate() {
                if !dims_compatible(dims[d], dim) {
                    return Err(InferError::shape(
                        "Stack",
                        format!(
                            "all inputs must have the same shape, but x[{}] has shape {}",
                            i,
                            x.shape()
                        ),
                    ));
                }
                if dim.is_known() {
                    dims[d] = dim;
                }
            }
        }
        dims.insert(axis, Dim::Known(inputs.len()));

        let mut output = TensorType::new(first.dtype(), Shape::new(dims));
        if !output.shape().is_static()
            && let Some((mut lo, mut hi)) = merge_bounds(inputs, None)
        {
            lo.insert(axis, inputs.len());
            hi.insert(axis, inputs.len());
            output = output.with_shape_bounds(lo, hi)?;
        }
        if let Some(values) = all_values(inputs) {
            output = fold_value("Stack", ctx, output, || const_eval::stack(&values, axis))?;
        }
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    Stack,
    ["x"] -> ["output"],
    full,
    variadic = true,
    attrs = |op| Attributes::from([("axis", AttrValue::Int(op.axis))])
);

/// Split a tensor into `output_num` equal parts along an axis.
///
/// Records the size of each part as the derived attribute `size_splits`,
/// with `-1` entries when the axis size is unknown.
#[derive(Clone, Debug)]
pub struct Split {
    pub axis: i64,
    pub output_num: usize,
}

impl Split {
    pub fn new(axis: i64, output_num: i64) -> Result<Split, ConfigError> {
        let output_num = check_positive_int("Split", "output_num", output_num)?;
        Ok(Split { axis, output_num })
    }
}

impl Default for Split {
    fn default() -> Self {
        Split {
            axis: 0,
            output_num: 1,
        }
    }
}

impl InferTypes for Split {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Split", "expected 1 input"));
        };
        let n = self.output_num;
        let Some(dims) = x.shape().dims() else {
            let outputs = vec![TensorType::new(x.dtype(), Shape::UnknownRank); n];
            return Ok(InferOutput::new(outputs).with_derived("size_splits", vec![-1i64; n]));
        };
        let axis = resolve_index(dims.len(), self.axis).ok_or_else(|| {
            axis_error("Split", self.axis, -(dims.len() as i64), dims.len() as i64)
        })?;

        let part = match dims[axis] {
            Dim::Known(size) if size % n != 0 => {
                return Err(InferError::shape(
                    "Split",
                    format!(
                        "the size {} of axis {} of 'input_x' must be divisible by 'output_num' {}",
                        size, axis, n
                    ),
                ));
            }
            Dim::Known(size) => Dim::Known(size / n),
            Dim::Unknown => Dim::Unknown,
        };
        let mut out_dims = dims.to_vec();
        out_dims[axis] = part;
        let output = TensorType::new(x.dtype(), Shape::new(out_dims));
        let output = match (x.lower_dims(), x.upper_dims()) {
            (Some(mut lo), Some(mut hi)) if !output.shape().is_static() => {
                lo[axis] /= n;
                hi[axis] /= n;
                output.with_shape_bounds(lo, hi)?
            }
            _ => output,
        };

        let size_splits = vec![part.to_i64(); n];
        Ok(InferOutput::new(vec![output; n]).with_derived("size_splits", size_splits))
    }
}

impl_operator!(
    Split,
    ["input_x"] -> ["output"],
    full,
    attrs = |op| Attributes::from([
        ("axis", AttrValue::Int(op.axis)),
        ("output_num", AttrValue::Int(op.output_num as i64)),
    ])
);

#[cfg(test)]
mod tests {
    use super::{Concat, Split, Stack};
    use crate::attrs::AttrValue;
    use crate::context::InferContext;
    use crate::dtype::DataType;
    use crate::error::InferError;
    use crate::operator::{OperatorExt, infer_operator};
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;
    use crate::value::ConstValue;

    #[test]
    fn test_concat() {
        let a = TensorType::tensor(DataType::Float32, shape!(2, 3));
        let b = TensorType::tensor(DataType::Float32, shape!(2, 5));
        let out = Concat { axis: -1 }.infer_simple(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 8));

        assert!(matches!(
            Concat { axis: 0 }.infer_simple(&[a.clone(), b.clone()]),
            Err(InferError::Shape { .. })
        ));
        assert!(Concat { axis: 2 }.infer_simple(&[a.clone(), b]).is_err());

        let c = TensorType::tensor(DataType::Int32, shape!(2, 3));
        assert!(matches!(
            Concat { axis: 1 }.infer_simple(&[a.clone(), c]),
            Err(InferError::Dtype { .. })
        ));

        let d = TensorType::tensor(DataType::Float32, shape!(-1, 4));
        let out = Concat { axis: 1 }.infer_simple(&[a, d]).unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 7));
    }

    #[test]
    fn test_concat_folds_value() {
        let a = TensorType::const_ints(&[2], vec![1, 2]);
        let b = TensorType::const_ints(&[1], vec![3]);
        let out = Concat { axis: 0 }.infer_simple(&[a, b]).unwrap();
        assert_eq!(out[0].value(), Some(&ConstValue::int_vec(&[1, 2, 3])));
    }

    #[test]
    fn test_stack() {
        let a = TensorType::tensor(DataType::Float32, shape!(2, 3));
        let out = Stack { axis: -1 }
            .infer_simple(&[a.clone(), a.clone(), a.clone()])
            .unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 3, 3));
        let out = Stack { axis: 0 }.infer_simple(&[a.clone(), a.clone()]).unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 2, 3));

        let b = TensorType::tensor(DataType::Float32, shape!(3, 2));
        assert!(Stack { axis: 0 }.infer_simple(&[a.clone(), b]).is_err());
        assert!(Stack { axis: 3 }.infer_simple(&[a]).is_err());

        let x = TensorType::const_ints(&[2], vec![1, 2]);
        let y = TensorType::const_ints(&[2], vec![3, 4]);
        let out = Stack { axis: 1 }.infer_simple(&[x, y]).unwrap();
        assert_eq!(out[0].value(), Some(&ConstValue::ints(&[2, 2], vec![1, 3, 2, 4])));
    }

    #[test]
    fn test_split() {
        let x = TensorType::tensor(DataType::Float32, shape!(4, 6));
        let op = Split::new(1, 3).unwrap();
        let out = infer_operator(&op, &[x.clone()], &InferContext::default())
            .unwrap()
            .unwrap();
        assert_eq!(out.outputs.len(), 3);
        assert!(out.outputs.iter().all(|o| o.shape() == &shape!(4, 2)));
        assert_eq!(out.derived.get("size_splits"), Some(&AttrValue::Ints(vec![2, 2, 2])));

        assert!(Split::new(0, 3).unwrap().infer_simple(&[x.clone()]).is_err());
        assert!(Split::new(0, 0).is_err());

        let x = TensorType::tensor(DataType::Float32, Shape::UnknownRank);
        let out = Split::new(0, 2).unwrap().infer_simple(&[x]).unwrap();
        assert_eq!(out.len(), 2);
    }
}
