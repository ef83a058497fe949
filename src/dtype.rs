//! Element types, value kinds and type-object classes.

use std::fmt;

/// Enum specifying the element type of a tensor or scalar.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DataType {
    /// Return the size of elements of this type in bytes.
    pub fn size(self) -> u8 {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn is_bool(self) -> bool {
        self == DataType::Bool
    }

    /// Return true for signed integer types.
    pub fn is_signed_int(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_unsigned_int(self) -> bool {
        matches!(
            self,
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
        )
    }

    /// Return true for signed or unsigned integer types.
    pub fn is_int(self) -> bool {
        self.is_signed_int() || self.is_unsigned_int()
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            DataType::Float16 | DataType::Float32 | DataType::Float64
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(self, DataType::Complex64 | DataType::Complex128)
    }

    /// Return the lowercase name used in diagnostics, eg. "float32".
    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
        }
    }

    /// Parse a name produced by [`DataType::name`].
    pub fn from_name(name: &str) -> Option<DataType> {
        ALL_TYPES.iter().copied().find(|dt| dt.name() == name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub const ALL_TYPES: &[DataType] = &[
    DataType::Bool,
    DataType::Int8,
    DataType::Int16,
    DataType::Int32,
    DataType::Int64,
    DataType::UInt8,
    DataType::UInt16,
    DataType::UInt32,
    DataType::UInt64,
    DataType::Float16,
    DataType::Float32,
    DataType::Float64,
    DataType::Complex64,
    DataType::Complex128,
];

pub const FLOAT_TYPES: &[DataType] = &[DataType::Float16, DataType::Float32, DataType::Float64];

pub const INDEX_TYPES: &[DataType] = &[DataType::Int32, DataType::Int64];

pub const INT_TYPES: &[DataType] = &[
    DataType::Int8,
    DataType::Int16,
    DataType::Int32,
    DataType::Int64,
    DataType::UInt8,
    DataType::UInt16,
    DataType::UInt32,
    DataType::UInt64,
];

/// Real number types (ints and floats, excluding bool and complex).
pub const REAL_TYPES: &[DataType] = &[
    DataType::Int8,
    DataType::Int16,
    DataType::Int32,
    DataType::Int64,
    DataType::UInt8,
    DataType::UInt16,
    DataType::UInt32,
    DataType::UInt64,
    DataType::Float16,
    DataType::Float32,
    DataType::Float64,
];

/// Numeric types including complex.
pub const NUMBER_TYPES: &[DataType] = &[
    DataType::Int8,
    DataType::Int16,
    DataType::Int32,
    DataType::Int64,
    DataType::UInt8,
    DataType::UInt16,
    DataType::UInt32,
    DataType::UInt64,
    DataType::Float16,
    DataType::Float32,
    DataType::Float64,
    DataType::Complex64,
    DataType::Complex128,
];

/// Format a dtype set as a comma separated list for error messages.
pub fn type_list(types: &[DataType]) -> String {
    types
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The kind of value an operator input or output holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ValueType {
    /// A tensor with the given element type.
    Tensor(DataType),

    /// A bare scalar number.
    Number(DataType),

    /// A compile-time sequence of numbers, eg. a shape tuple.
    Tuple(DataType),

    /// A type object. The class it denotes is carried in the value.
    Type,
}

impl ValueType {
    /// Return the element type, if this is not a type object.
    pub fn elem(self) -> Option<DataType> {
        match self {
            ValueType::Tensor(dt) | ValueType::Number(dt) | ValueType::Tuple(dt) => Some(dt),
            ValueType::Type => None,
        }
    }

    pub fn is_tensor(self) -> bool {
        matches!(self, ValueType::Tensor(_))
    }

    /// Return a value type of the same kind with a different element type.
    pub fn with_elem(self, dtype: DataType) -> ValueType {
        match self {
            ValueType::Tensor(_) => ValueType::Tensor(dtype),
            ValueType::Number(_) => ValueType::Number(dtype),
            ValueType::Tuple(_) => ValueType::Tuple(dtype),
            ValueType::Type => ValueType::Type,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(dt) => write!(f, "Tensor[{}]", dt),
            ValueType::Number(dt) => write!(f, "{}", dt),
            ValueType::Tuple(dt) => write!(f, "Tuple[{}]", dt),
            ValueType::Type => write!(f, "TypeType"),
        }
    }
}

/// A class of types, as denoted by a type object.
///
/// Classes form a small lattice: `Number` contains the category classes
/// (`Bool`, `Int`, `UInt`, `Float`, `Complex`), each of which contains the
/// exact element types of that category. `Tensor` and `Tuple` are separate
/// roots.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeClass {
    Number,
    Bool,
    Int,
    UInt,
    Float,
    Complex,
    Exact(DataType),
    Tensor,
    Tuple,
}

impl TypeClass {
    fn parent(self) -> Option<TypeClass> {
        match self {
            TypeClass::Exact(dt) => Some(if dt.is_bool() {
                TypeClass::Bool
            } else if dt.is_signed_int() {
                TypeClass::Int
            } else if dt.is_unsigned_int() {
                TypeClass::UInt
            } else if dt.is_float() {
                TypeClass::Float
            } else {
                TypeClass::Complex
            }),
            TypeClass::Bool
            | TypeClass::Int
            | TypeClass::UInt
            | TypeClass::Float
            | TypeClass::Complex => Some(TypeClass::Number),
            TypeClass::Number | TypeClass::Tensor | TypeClass::Tuple => None,
        }
    }

    /// Return true if `self` is `other` or a descendant of it.
    pub fn is_subclass_of(self, other: TypeClass) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class == other {
                return true;
            }
            current = class.parent();
        }
        false
    }
}

impl fmt::Display for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeClass::Number => write!(f, "Number"),
            TypeClass::Bool => write!(f, "Bool"),
            TypeClass::Int => write!(f, "Int"),
            TypeClass::UInt => write!(f, "UInt"),
            TypeClass::Float => write!(f, "Float"),
            TypeClass::Complex => write!(f, "Complex"),
            TypeClass::Exact(dt) => write!(f, "{}", dt),
            TypeClass::Tensor => write!(f, "Tensor"),
            TypeClass::Tuple => write!(f, "Tuple"),
        }
    }
}

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{DataType, TypeClass, ValueType};

    #[test]
    fn test_data_type_names_round_trip() {
        for dt in super::ALL_TYPES {
            assert_eq!(DataType::from_name(dt.name()), Some(*dt));
        }
        assert_eq!(DataType::from_name("float128"), None);
    }

    #[test]
    fn test_type_class_subclass() {
        #[derive(Debug)]
        struct Case {
            sub: TypeClass,
            parent: TypeClass,
            expected: bool,
        }

        let cases = [
            Case {
                sub: TypeClass::Exact(DataType::Int32),
                parent: TypeClass::Int,
                expected: true,
            },
            Case {
                sub: TypeClass::Exact(DataType::Int32),
                parent: TypeClass::Number,
                expected: true,
            },
            Case {
                sub: TypeClass::Exact(DataType::UInt8),
                parent: TypeClass::Int,
                expected: false,
            },
            Case {
                sub: TypeClass::Float,
                parent: TypeClass::Float,
                expected: true,
            },
            Case {
                sub: TypeClass::Number,
                parent: TypeClass::Float,
                expected: false,
            },
            Case {
                sub: TypeClass::Tensor,
                parent: TypeClass::Number,
                expected: false,
            },
        ];

        cases.test_each(|case| {
            assert_eq!(case.sub.is_subclass_of(case.parent), case.expected);
        });
    }

    #[test]
    fn test_value_type_with_elem() {
        let vt = ValueType::Tensor(DataType::Float32).with_elem(DataType::Int64);
        assert_eq!(vt, ValueType::Tensor(DataType::Int64));
        assert_eq!(vt.to_string(), "Tensor[int64]");
        assert_eq!(ValueType::Type.elem(), None);
    }
}
