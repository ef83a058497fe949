use std::fmt;

use smallvec::SmallVec;

use crate::error::InferError;

/// Integer marker for a dimension whose size is unknown.
pub const UNKNOWN_DIM: i64 = -1;

/// Integer marker for a shape whose rank is unknown.
///
/// In the integer form a shape of unknown rank is written as `[UNKNOWN_RANK]`.
pub const UNKNOWN_RANK: i64 = -2;

/// Size of a single dimension.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

impl Dim {
    /// Return the size if known.
    pub fn known(self) -> Option<usize> {
        match self {
            Dim::Known(size) => Some(size),
            Dim::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Dim::Known(_))
    }

    /// Convert to the integer form, using [`UNKNOWN_DIM`] for unknown sizes.
    pub fn to_i64(self) -> i64 {
        match self {
            Dim::Known(size) => size as i64,
            Dim::Unknown => UNKNOWN_DIM,
        }
    }
}

impl From<usize> for Dim {
    fn from(size: usize) -> Dim {
        Dim::Known(size)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i64())
    }
}

/// Dimension list of a ranked shape.
pub type Dims = SmallVec<[Dim; 4]>;

/// Symbolic shape of a tensor.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Shape {
    /// Shape with known rank. Individual dimensions may be unknown.
    Ranked(Dims),

    /// Shape whose rank is unknown.
    UnknownRank,
}

impl Shape {
    /// Create a ranked shape from dimensions.
    pub fn new(dims: impl IntoIterator<Item = Dim>) -> Shape {
        Shape::Ranked(dims.into_iter().collect())
    }

    /// Create a fully static shape.
    pub fn fixed(dims: &[usize]) -> Shape {
        Shape::new(dims.iter().map(|&d| Dim::Known(d)))
    }

    /// Create a shape of the given rank where every dimension is unknown.
    pub fn unknown_dims(rank: usize) -> Shape {
        Shape::new(std::iter::repeat_n(Dim::Unknown, rank))
    }

    /// Shape of a scalar.
    pub fn scalar() -> Shape {
        Shape::Ranked(SmallVec::new())
    }

    /// Convert from the integer form used at the compiler boundary.
    ///
    /// Non-negative entries are sizes, [`UNKNOWN_DIM`] marks an unknown size
    /// and `[UNKNOWN_RANK]` denotes a shape of unknown rank.
    pub fn from_i64(dims: &[i64]) -> Result<Shape, InferError> {
        if dims == [UNKNOWN_RANK] {
            return Ok(Shape::UnknownRank);
        }
        let mut out = Dims::with_capacity(dims.len());
        for &dim in dims {
            match dim {
                d if d >= 0 => out.push(Dim::Known(d as usize)),
                UNKNOWN_DIM => out.push(Dim::Unknown),
                _ => {
                    return Err(InferError::InvalidType(format!(
                        "invalid dimension {} in shape {:?}",
                        dim, dims
                    )));
                }
            }
        }
        Ok(Shape::Ranked(out))
    }

    /// Convert to the integer form. See [`Shape::from_i64`].
    pub fn to_i64(&self) -> Vec<i64> {
        match self {
            Shape::Ranked(dims) => dims.iter().map(|d| d.to_i64()).collect(),
            Shape::UnknownRank => vec![UNKNOWN_RANK],
        }
    }

    /// Return the rank, if known.
    pub fn rank(&self) -> Option<usize> {
        self.dims().map(|d| d.len())
    }

    /// Return the dimensions, if the rank is known.
    pub fn dims(&self) -> Option<&[Dim]> {
        match self {
            Shape::Ranked(dims) => Some(dims),
            Shape::UnknownRank => None,
        }
    }

    /// Return true if the rank and every dimension are known.
    pub fn is_static(&self) -> bool {
        self.dims()
            .is_some_and(|dims| dims.iter().all(|d| d.is_known()))
    }

    /// Return the dimension sizes if the shape is static.
    pub fn to_fixed(&self) -> Option<Vec<usize>> {
        self.dims()?.iter().map(|d| d.known()).collect()
    }

    /// Return the element count if the shape is static and the count fits
    /// in a `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        self.to_fixed()?
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Shape {
        Shape::fixed(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Shape {
        Shape::fixed(&dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Ranked(dims) => {
                write!(f, "(")?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", dim)?;
                }
                if dims.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Shape::UnknownRank => write!(f, "[{}]", UNKNOWN_RANK),
        }
    }
}

/// Create a [`Shape`] from integer dimensions, where `-1` marks an unknown
/// dimension.
#[cfg(test)]
macro_rules! shape {
    () => {
        $crate::shape::Shape::scalar()
    };
    ($($dim:expr),+ $(,)?) => {
        $crate::shape::Shape::from_i64(&[$($dim as i64),+]).unwrap()
    };
}

#[cfg(test)]
pub(crate) use shape;

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{Dim, Shape, UNKNOWN_DIM, UNKNOWN_RANK};

    #[test]
    fn test_shape_integer_form() {
        #[derive(Debug)]
        struct Case {
            dims: Vec<i64>,
            rank: Option<usize>,
            is_static: bool,
        }

        let cases = [
            Case {
                dims: vec![2, 3],
                rank: Some(2),
                is_static: true,
            },
            Case {
                dims: vec![2, UNKNOWN_DIM],
                rank: Some(2),
                is_static: false,
            },
            Case {
                dims: vec![UNKNOWN_RANK],
                rank: None,
                is_static: false,
            },
            Case {
                dims: vec![],
                rank: Some(0),
                is_static: true,
            },
        ];

        cases.test_each(|case| {
            let shape = Shape::from_i64(&case.dims).unwrap();
            assert_eq!(shape.rank(), case.rank);
            assert_eq!(shape.is_static(), case.is_static);
            assert_eq!(shape.to_i64(), case.dims);
        });
    }

    #[test]
    fn test_shape_rejects_invalid_dims() {
        assert!(Shape::from_i64(&[2, -3]).is_err());
        assert!(Shape::from_i64(&[UNKNOWN_RANK, 2]).is_err());
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(shape!(2, -1, 3).to_string(), "(2, -1, 3)");
        assert_eq!(shape!(4).to_string(), "(4,)");
        assert_eq!(Shape::UnknownRank.to_string(), "[-2]");
    }

    #[test]
    fn test_num_elements() {
        assert_eq!(Shape::fixed(&[2, 3, 4]).num_elements(), Some(24));
        assert_eq!(Shape::new([Dim::Known(2), Dim::Unknown]).num_elements(), None);
        assert_eq!(Shape::scalar().num_elements(), Some(1));
        assert_eq!(Shape::fixed(&[1 << 32, 1 << 32, 2]).num_elements(), None);
    }
}
