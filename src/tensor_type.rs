use std::fmt;

use crate::dtype::{DataType, ValueType};
use crate::error::InferError;
use crate::shape::{Dim, Shape};
use crate::value::ConstValue;

/// Symbolic type of an operator input or output.
///
/// This combines the value kind and element type, the (possibly partially
/// unknown) shape, optional per-dimension bounds for unknown dimensions, an
/// optional constant value and optional per-element value bounds.
///
/// Values are immutable. Builders which attach bounds or a constant check
/// that the result is consistent and fail with [`InferError::InvalidType`]
/// otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorType {
    dtype: ValueType,
    shape: Shape,
    min_shape: Option<Vec<usize>>,
    max_shape: Option<Vec<usize>>,
    value: Option<ConstValue>,
    min_value: Option<Vec<i64>>,
    max_value: Option<Vec<i64>>,
}

impl TensorType {
    /// Create a type with no bounds or value.
    pub fn new(dtype: ValueType, shape: Shape) -> TensorType {
        TensorType {
            dtype,
            shape,
            min_shape: None,
            max_shape: None,
            value: None,
            min_value: None,
            max_value: None,
        }
    }

    /// Create a tensor type with element type `dtype`.
    pub fn tensor(dtype: DataType, shape: impl Into<Shape>) -> TensorType {
        TensorType::new(ValueType::Tensor(dtype), shape.into())
    }

    /// Create a constant whose shape is taken from `value`.
    ///
    /// Numbers must be scalars and tuples one-dimensional.
    pub fn constant(dtype: ValueType, value: ConstValue) -> Result<TensorType, InferError> {
        let shape = Shape::fixed(&value.shape());
        TensorType::new(dtype, shape).with_value(value)
    }

    /// Create a constant tensor of `int64` elements.
    pub fn const_ints(shape: &[usize], data: Vec<i64>) -> TensorType {
        TensorType {
            value: Some(ConstValue::ints(shape, data)),
            ..TensorType::tensor(DataType::Int64, Shape::fixed(shape))
        }
    }

    /// Create a constant tuple of `int64` numbers.
    pub fn const_tuple(values: &[i64]) -> TensorType {
        TensorType {
            value: Some(ConstValue::int_vec(values)),
            ..TensorType::new(ValueType::Tuple(DataType::Int64), Shape::fixed(&[values.len()]))
        }
    }

    /// Create a constant `int64` number.
    pub fn const_int(value: i64) -> TensorType {
        TensorType {
            value: Some(ConstValue::int_scalar(value)),
            ..TensorType::new(ValueType::Number(DataType::Int64), Shape::scalar())
        }
    }

    /// Create a constant `float32` number.
    pub fn const_float(value: f64) -> TensorType {
        TensorType {
            value: Some(ConstValue::float_scalar(value)),
            ..TensorType::new(ValueType::Number(DataType::Float32), Shape::scalar())
        }
    }

    /// Attach per-dimension bounds.
    ///
    /// Both bounds must have the shape's rank, `min <= max` must hold at
    /// every position and known dimensions must lie within their bounds.
    pub fn with_shape_bounds(
        mut self,
        min_shape: Vec<usize>,
        max_shape: Vec<usize>,
    ) -> Result<TensorType, InferError> {
        let Some(dims) = self.shape.dims() else {
            return Err(InferError::InvalidType(
                "shape bounds require a known rank".to_string(),
            ));
        };
        if min_shape.len() != dims.len() || max_shape.len() != dims.len() {
            return Err(InferError::InvalidType(format!(
                "shape bounds {:?}/{:?} do not match the rank of {}",
                min_shape, max_shape, self.shape
            )));
        }
        for (i, dim) in dims.iter().enumerate() {
            let (lo, hi) = (min_shape[i], max_shape[i]);
            let in_range = match dim {
                Dim::Known(size) => lo <= *size && *size <= hi,
                Dim::Unknown => lo <= hi,
            };
            if !in_range {
                return Err(InferError::InvalidType(format!(
                    "invalid bounds [{}, {}] for dimension {} of {}",
                    lo, hi, i, self.shape
                )));
            }
        }
        self.min_shape = Some(min_shape);
        self.max_shape = Some(max_shape);
        Ok(self)
    }

    /// Attach a constant value.
    ///
    /// The value must have the type's shape and an element storage matching
    /// its dtype.
    pub fn with_value(mut self, value: ConstValue) -> Result<TensorType, InferError> {
        if !value.matches(self.dtype) {
            return Err(InferError::InvalidType(format!(
                "constant does not match dtype {}",
                self.dtype
            )));
        }
        if self.shape != Shape::fixed(&value.shape()) {
            return Err(InferError::InvalidType(format!(
                "constant of shape {:?} does not match shape {}",
                value.shape(),
                self.shape
            )));
        }
        self.value = Some(value);
        Ok(self)
    }

    /// Attach per-element value bounds.
    pub fn with_value_bounds(
        mut self,
        min_value: Vec<i64>,
        max_value: Vec<i64>,
    ) -> Result<TensorType, InferError> {
        if min_value.len() != max_value.len() {
            return Err(InferError::InvalidType(
                "value bounds have different lengths".to_string(),
            ));
        }
        if let Some(n) = self.shape.num_elements()
            && n != min_value.len()
        {
            return Err(InferError::InvalidType(format!(
                "value bounds have {} elements but the shape {} has {}",
                min_value.len(),
                self.shape,
                n
            )));
        }
        if min_value.iter().zip(&max_value).any(|(lo, hi)| lo > hi) {
            return Err(InferError::InvalidType(format!(
                "min value {:?} exceeds max value {:?}",
                min_value, max_value
            )));
        }
        self.min_value = Some(min_value);
        self.max_value = Some(max_value);
        Ok(self)
    }

    pub fn dtype(&self) -> ValueType {
        self.dtype
    }

    /// Return the element type, if this is not a type object.
    pub fn elem(&self) -> Option<DataType> {
        self.dtype.elem()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.rank()
    }

    pub fn min_shape(&self) -> Option<&[usize]> {
        self.min_shape.as_deref()
    }

    pub fn max_shape(&self) -> Option<&[usize]> {
        self.max_shape.as_deref()
    }

    pub fn value(&self) -> Option<&ConstValue> {
        self.value.as_ref()
    }

    pub fn min_value(&self) -> Option<&[i64]> {
        self.min_value.as_deref()
    }

    pub fn max_value(&self) -> Option<&[i64]> {
        self.max_value.as_deref()
    }

    /// Return the constant value as integers.
    pub fn value_i64s(&self) -> Option<Vec<i64>> {
        self.value.as_ref()?.to_i64s()
    }

    /// Return true if the shape has an unknown rank or dimension.
    pub fn is_dynamic(&self) -> bool {
        !self.shape.is_static()
    }

    /// Return the effective upper bound for each dimension: the size if
    /// known, else the max shape entry.
    pub fn upper_dims(&self) -> Option<Vec<usize>> {
        let dims = self.shape.dims()?;
        dims.iter()
            .enumerate()
            .map(|(i, d)| d.known().or_else(|| self.max_shape.as_ref()?.get(i).copied()))
            .collect()
    }

    /// Return the effective lower bound for each dimension.
    pub fn lower_dims(&self) -> Option<Vec<usize>> {
        let dims = self.shape.dims()?;
        dims.iter()
            .enumerate()
            .map(|(i, d)| d.known().or_else(|| self.min_shape.as_ref()?.get(i).copied()))
            .collect()
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::TensorType;
    use crate::dtype::{DataType, ValueType};
    use crate::shape::{Shape, shape};
    use crate::value::ConstValue;

    #[test]
    fn test_shape_bounds_invariants() {
        let ty = TensorType::tensor(DataType::Float32, shape!(2, -1));
        let bounded = ty.clone().with_shape_bounds(vec![2, 1], vec![2, 8]).unwrap();
        assert_eq!(bounded.min_shape(), Some([2, 1].as_slice()));
        assert_eq!(bounded.upper_dims(), Some(vec![2, 8]));

        // Rank mismatch
        assert!(ty.clone().with_shape_bounds(vec![1], vec![8]).is_err());
        // min > max
        assert!(ty.clone().with_shape_bounds(vec![2, 9], vec![2, 8]).is_err());
        // Known dim outside its bounds
        assert!(ty.clone().with_shape_bounds(vec![3, 1], vec![3, 8]).is_err());
        // Unknown rank
        let ty = TensorType::tensor(DataType::Float32, Shape::UnknownRank);
        assert!(ty.with_shape_bounds(vec![], vec![]).is_err());
    }

    #[test]
    fn test_value_must_agree_with_type() {
        let ty = TensorType::tensor(DataType::Int32, Shape::fixed(&[2]));
        assert!(ty.clone().with_value(ConstValue::int_vec(&[1, 2])).is_ok());
        assert!(ty.clone().with_value(ConstValue::int_vec(&[1, 2, 3])).is_err());
        assert!(
            ty.with_value(ConstValue::floats(&[2], vec![1., 2.]))
                .is_err()
        );

        let ty = TensorType::constant(
            ValueType::Number(DataType::Float32),
            ConstValue::float_scalar(1.5),
        )
        .unwrap();
        assert_eq!(ty.shape(), &Shape::scalar());
    }

    #[test]
    fn test_value_bounds() {
        let ty = TensorType::new(ValueType::Tuple(DataType::Int64), shape!(3));
        assert!(
            ty.clone()
                .with_value_bounds(vec![1, 1, 1], vec![4, 4, 4])
                .is_ok()
        );
        assert!(ty.clone().with_value_bounds(vec![1], vec![4]).is_err());
        assert!(
            ty.with_value_bounds(vec![5, 1, 1], vec![4, 4, 4])
                .is_err()
        );
    }
}
