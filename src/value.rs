//! Compile-time constant values carried by symbolic types.

use rten_tensor::Tensor;
use rten_tensor::prelude::*;

use crate::dtype::{DataType, TypeClass, ValueType};

/// A concrete constant known at compile time.
///
/// Integer element types of every width are stored as `i64` and float types
/// as `f64`. The precise element type lives in the enclosing
/// [`TensorType`](crate::TensorType).
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
    Bool(Tensor<bool>),
    Int(Tensor<i64>),
    Float(Tensor<f64>),

    /// A type object, eg. the first input of `IsSubClass`.
    Type(TypeClass),
}

impl ConstValue {
    pub fn int_scalar(value: i64) -> ConstValue {
        ConstValue::Int(Tensor::from_scalar(value))
    }

    pub fn float_scalar(value: f64) -> ConstValue {
        ConstValue::Float(Tensor::from_scalar(value))
    }

    pub fn bool_scalar(value: bool) -> ConstValue {
        ConstValue::Bool(Tensor::from_scalar(value))
    }

    /// Create a 1D integer constant.
    pub fn int_vec(values: &[i64]) -> ConstValue {
        ConstValue::Int(Tensor::from_data(&[values.len()], values.to_vec()))
    }

    pub fn ints(shape: &[usize], data: Vec<i64>) -> ConstValue {
        ConstValue::Int(Tensor::from_data(shape, data))
    }

    pub fn floats(shape: &[usize], data: Vec<f64>) -> ConstValue {
        ConstValue::Float(Tensor::from_data(shape, data))
    }

    pub fn bools(shape: &[usize], data: Vec<bool>) -> ConstValue {
        ConstValue::Bool(Tensor::from_data(shape, data))
    }

    /// Return the shape of the constant. Type objects are scalars.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ConstValue::Bool(t) => t.shape().to_vec(),
            ConstValue::Int(t) => t.shape().to_vec(),
            ConstValue::Float(t) => t.shape().to_vec(),
            ConstValue::Type(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the elements as integers.
    ///
    /// Bools convert to 0/1. Floats convert only if every element is
    /// integral.
    pub fn to_i64s(&self) -> Option<Vec<i64>> {
        match self {
            ConstValue::Int(t) => Some(t.to_vec()),
            ConstValue::Bool(t) => Some(t.iter().map(|&b| b as i64).collect()),
            ConstValue::Float(t) => t
                .iter()
                .map(|&x| (x.fract() == 0.0).then_some(x as i64))
                .collect(),
            ConstValue::Type(_) => None,
        }
    }

    /// Return the elements as floats.
    pub fn to_f64s(&self) -> Option<Vec<f64>> {
        match self {
            ConstValue::Int(t) => Some(t.iter().map(|&x| x as f64).collect()),
            ConstValue::Bool(t) => Some(t.iter().map(|&b| b as i64 as f64).collect()),
            ConstValue::Float(t) => Some(t.to_vec()),
            ConstValue::Type(_) => None,
        }
    }

    /// Return the single element of a scalar or one-element integer constant.
    pub fn to_i64_scalar(&self) -> Option<i64> {
        match self.to_i64s()?.as_slice() {
            [x] => Some(*x),
            _ => None,
        }
    }

    pub fn to_f64_scalar(&self) -> Option<f64> {
        match self.to_f64s()?.as_slice() {
            [x] => Some(*x),
            _ => None,
        }
    }

    pub fn type_class(&self) -> Option<TypeClass> {
        match self {
            ConstValue::Type(class) => Some(*class),
            _ => None,
        }
    }

    /// Return true if this constant can hold elements of `dtype`.
    pub fn matches(&self, dtype: ValueType) -> bool {
        match (self, dtype.elem()) {
            (ConstValue::Type(_), None) => true,
            (ConstValue::Bool(_), Some(dt)) => dt.is_bool(),
            (ConstValue::Int(_), Some(dt)) => dt.is_int(),
            (ConstValue::Float(_), Some(dt)) => dt.is_float(),
            _ => false,
        }
    }

    /// Convert the elements to the storage used for `dtype`.
    ///
    /// Float to int conversion truncates towards zero, as a C cast does.
    /// Returns `None` for complex targets, which are never folded.
    pub fn cast(&self, dtype: DataType) -> Option<ConstValue> {
        let shape = self.shape();
        if dtype.is_bool() {
            let data = self.to_f64s()?.into_iter().map(|x| x != 0.0).collect();
            Some(ConstValue::bools(&shape, data))
        } else if dtype.is_int() {
            let data = match self {
                ConstValue::Float(t) => t.iter().map(|&x| wrap_int(x as i64, dtype)).collect(),
                _ => self
                    .to_i64s()?
                    .into_iter()
                    .map(|x| wrap_int(x, dtype))
                    .collect(),
            };
            Some(ConstValue::ints(&shape, data))
        } else if dtype.is_float() {
            Some(ConstValue::floats(&shape, self.to_f64s()?))
        } else {
            None
        }
    }

    /// Return a copy with the same elements and a new shape.
    ///
    /// The element count of `shape` must match.
    pub fn reshaped(&self, shape: &[usize]) -> Option<ConstValue> {
        if shape.iter().product::<usize>() != self.len() {
            return None;
        }
        Some(match self {
            ConstValue::Bool(t) => ConstValue::bools(shape, t.to_vec()),
            ConstValue::Int(t) => ConstValue::ints(shape, t.to_vec()),
            ConstValue::Float(t) => ConstValue::floats(shape, t.to_vec()),
            ConstValue::Type(_) => return None,
        })
    }
}

/// Wrap an integer into the range of a narrower integer type.
fn wrap_int(x: i64, dtype: DataType) -> i64 {
    match dtype {
        DataType::Int8 => x as i8 as i64,
        DataType::Int16 => x as i16 as i64,
        DataType::Int32 => x as i32 as i64,
        DataType::UInt8 => x as u8 as i64,
        DataType::UInt16 => x as u16 as i64,
        DataType::UInt32 => x as u32 as i64,
        _ => x,
    }
}

#[cfg(test)]
mod tests {
    use rten_tensor::Tensor;

    use super::ConstValue;
    use crate::dtype::{DataType, ValueType};

    #[test]
    fn test_const_value_conversions() {
        let value = ConstValue::floats(&[3], vec![1., 2., 3.]);
        assert_eq!(value.to_i64s(), Some(vec![1, 2, 3]));

        let value = ConstValue::floats(&[2], vec![1.5, 2.]);
        assert_eq!(value.to_i64s(), None);

        let value = ConstValue::bools(&[2], vec![true, false]);
        assert_eq!(value.to_i64s(), Some(vec![1, 0]));
        assert_eq!(ConstValue::int_scalar(7).to_i64_scalar(), Some(7));
    }

    #[test]
    fn test_const_value_cast() {
        let value = ConstValue::floats(&[3], vec![1.7, -1.7, 300.0]);
        assert_eq!(
            value.cast(DataType::Int32),
            Some(ConstValue::ints(&[3], vec![1, -1, 300]))
        );
        assert_eq!(
            value.cast(DataType::UInt8),
            Some(ConstValue::ints(&[3], vec![1, 255, 44]))
        );
        assert_eq!(
            ConstValue::int_vec(&[0, 2]).cast(DataType::Bool),
            Some(ConstValue::bools(&[2], vec![false, true]))
        );
        assert_eq!(ConstValue::int_vec(&[0, 2]).cast(DataType::Complex64), None);
    }

    #[test]
    fn test_const_value_matches() {
        let value = ConstValue::Int(Tensor::from_scalar(3));
        assert!(value.matches(ValueType::Number(DataType::Int64)));
        assert!(value.matches(ValueType::Tensor(DataType::UInt8)));
        assert!(!value.matches(ValueType::Tensor(DataType::Float32)));
        assert!(!value.matches(ValueType::Type));
    }

    #[test]
    fn test_reshaped() {
        let value = ConstValue::int_vec(&[1, 2, 3, 4]);
        let reshaped = value.reshaped(&[2, 2]).unwrap();
        assert_eq!(reshaped.shape(), vec![2, 2]);
        assert!(value.reshaped(&[3]).is_none());
    }
}
