//! Operator attribute values.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::dtype::DataType;

/// Value of a single operator attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Type(DataType),
}

/// Kind of an [`AttrValue`], used to describe the permitted types of an
/// attribute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttrKind {
    Bool,
    Int,
    Float,
    Str,
    Ints,
    Floats,
    Type,
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::Float(_) => AttrKind::Float,
            AttrValue::Str(_) => AttrKind::Str,
            AttrValue::Ints(_) => AttrKind::Ints,
            AttrValue::Floats(_) => AttrKind::Floats,
            AttrValue::Type(_) => AttrKind::Type,
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttrKind::Bool => "bool",
            AttrKind::Int => "int",
            AttrKind::Float => "float",
            AttrKind::Str => "str",
            AttrKind::Ints => "tuple[int]",
            AttrKind::Floats => "tuple[float]",
            AttrKind::Type => "dtype",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(x) => write!(f, "{}", x),
            AttrValue::Int(x) => write!(f, "{}", x),
            AttrValue::Float(x) => write!(f, "{}", x),
            AttrValue::Str(x) => write!(f, "{}", x),
            AttrValue::Ints(x) => write!(f, "{:?}", x),
            AttrValue::Floats(x) => write!(f, "{:?}", x),
            AttrValue::Type(x) => write!(f, "{}", x),
        }
    }
}

macro_rules! impl_from_for_attr {
    ($type:ty, $variant:ident) => {
        impl From<$type> for AttrValue {
            fn from(val: $type) -> AttrValue {
                AttrValue::$variant(val.into())
            }
        }
    };
}

impl_from_for_attr!(bool, Bool);
impl_from_for_attr!(i64, Int);
impl_from_for_attr!(f64, Float);
impl_from_for_attr!(&str, Str);
impl_from_for_attr!(String, Str);
impl_from_for_attr!(Vec<i64>, Ints);
impl_from_for_attr!(&[i64], Ints);
impl_from_for_attr!(Vec<f64>, Floats);
impl_from_for_attr!(DataType, Type);

/// Immutable map of attribute names to values.
///
/// Modification returns a new map via [`Attributes::with`]. This is used to
/// derive batch-aware operator clones and to record metadata computed during
/// inference without mutating the original operator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    values: FxHashMap<String, AttrValue>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this map with `name` set to `value`.
    pub fn with(&self, name: &str, value: impl Into<AttrValue>) -> Attributes {
        let mut values = self.values.clone();
        values.insert(name.to_string(), value.into());
        Attributes { values }
    }

    /// Return a copy of this map with every entry of `other` applied on top.
    pub fn merged(&self, other: &Attributes) -> Attributes {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Attributes { values }
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Return attribute names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.values.keys().map(|k| k.as_str()).collect();
        names.sort();
        names
    }
}

impl<const N: usize> From<[(&str, AttrValue); N]> for Attributes {
    fn from(entries: [(&str, AttrValue); N]) -> Attributes {
        Attributes {
            values: entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AttrValue, Attributes};

    #[test]
    fn test_with_does_not_modify_original() {
        let attrs = Attributes::from([("axis", AttrValue::Int(1))]);
        let updated = attrs.with("batch_rank", 2i64);
        assert_eq!(attrs.get("batch_rank"), None);
        assert_eq!(updated.get("batch_rank"), Some(&AttrValue::Int(2)));
        assert_eq!(updated.names(), vec!["axis", "batch_rank"]);
    }

    #[test]
    fn test_merged() {
        let base = Attributes::from([("a", AttrValue::Int(1)), ("b", AttrValue::Int(2))]);
        let extra = Attributes::from([("b", AttrValue::Str("x".into()))]);
        let merged = base.merged(&extra);
        assert_eq!(merged.get("a"), Some(&AttrValue::Int(1)));
        assert_eq!(merged.get("b"), Some(&AttrValue::Str("x".into())));
    }
}
