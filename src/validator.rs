//! Construction-time validation of operator attributes.
//!
//! These checks run only in operator constructors. Every failure is a
//! [`ConfigError`] naming the operator, the attribute and the offending
//! value.

use std::fmt;

use crate::attrs::{AttrKind, AttrValue};
use crate::error::ConfigError;

/// Relation between a value and a bound.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rel {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Rel {
    fn holds<T: PartialOrd>(self, value: T, bound: T) -> bool {
        match self {
            Rel::Eq => value == bound,
            Rel::Ne => value != bound,
            Rel::Lt => value < bound,
            Rel::Le => value <= bound,
            Rel::Gt => value > bound,
            Rel::Ge => value >= bound,
        }
    }

    fn describe(self, bound: impl fmt::Display) -> String {
        let op = match self {
            Rel::Eq => "==",
            Rel::Ne => "!=",
            Rel::Lt => "<",
            Rel::Le => "<=",
            Rel::Gt => ">",
            Rel::Ge => ">=",
        };
        format!("{} {}", op, bound)
    }
}

/// Which ends of an interval are included.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Interval {
    /// `[lo, hi]`
    Closed,
    /// `(lo, hi)`
    Open,
    /// `[lo, hi)`
    ClosedOpen,
    /// `(lo, hi]`
    OpenClosed,
}

fn out_of_range(op: &str, attr: &str, requirement: String, got: impl fmt::Display) -> ConfigError {
    ConfigError::OutOfRange {
        op: op.to_string(),
        attr: attr.to_string(),
        requirement,
        got: got.to_string(),
    }
}

/// Check that an attribute value has one of the permitted kinds.
pub fn check_value_type<'a>(
    op: &str,
    attr: &str,
    value: &'a AttrValue,
    allowed: &[AttrKind],
) -> Result<&'a AttrValue, ConfigError> {
    if allowed.contains(&value.kind()) {
        return Ok(value);
    }
    Err(ConfigError::InvalidType {
        op: op.to_string(),
        attr: attr.to_string(),
        expected: allowed
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        got: format!("{} ({})", value.kind(), value),
    })
}

/// Check that `value <rel> bound` holds for an integer attribute.
pub fn check_int(op: &str, attr: &str, value: i64, rel: Rel, bound: i64) -> Result<i64, ConfigError> {
    if rel.holds(value, bound) {
        Ok(value)
    } else {
        Err(out_of_range(op, attr, rel.describe(bound), value))
    }
}

/// Check that an integer attribute is `> 0` and convert it to a size.
pub fn check_positive_int(op: &str, attr: &str, value: i64) -> Result<usize, ConfigError> {
    check_int(op, attr, value, Rel::Gt, 0).map(|v| v as usize)
}

/// Check that an integer attribute is `>= 0` and convert it to a size.
pub fn check_non_negative_int(op: &str, attr: &str, value: i64) -> Result<usize, ConfigError> {
    check_int(op, attr, value, Rel::Ge, 0).map(|v| v as usize)
}

/// Check that `value <rel> bound` holds for a float attribute.
pub fn check_float(op: &str, attr: &str, value: f64, rel: Rel, bound: f64) -> Result<f64, ConfigError> {
    if rel.holds(value, bound) {
        Ok(value)
    } else {
        Err(out_of_range(op, attr, rel.describe(bound), value))
    }
}

/// Check that an integer attribute lies in an interval.
pub fn check_int_range(
    op: &str,
    attr: &str,
    value: i64,
    lo: i64,
    hi: i64,
    interval: Interval,
) -> Result<i64, ConfigError> {
    check_range(op, attr, value, lo, hi, interval)
}

/// Check that a float attribute lies in an interval.
pub fn check_float_range(
    op: &str,
    attr: &str,
    value: f64,
    lo: f64,
    hi: f64,
    interval: Interval,
) -> Result<f64, ConfigError> {
    check_range(op, attr, value, lo, hi, interval)
}

fn check_range<T: PartialOrd + Copy + fmt::Display>(
    op: &str,
    attr: &str,
    value: T,
    lo: T,
    hi: T,
    interval: Interval,
) -> Result<T, ConfigError> {
    let (lo_ok, hi_ok, desc) = match interval {
        Interval::Closed => (value >= lo, value <= hi, format!("in [{}, {}]", lo, hi)),
        Interval::Open => (value > lo, value < hi, format!("in ({}, {})", lo, hi)),
        Interval::ClosedOpen => (value >= lo, value < hi, format!("in [{}, {})", lo, hi)),
        Interval::OpenClosed => (value > lo, value <= hi, format!("in ({}, {}]", lo, hi)),
    };
    if lo_ok && hi_ok {
        Ok(value)
    } else {
        Err(out_of_range(op, attr, desc, value))
    }
}

/// Check that a string attribute is one of `allowed`.
///
/// If `upper` is true the value is upper-cased before comparison and the
/// upper-cased form is returned.
pub fn check_string(
    op: &str,
    attr: &str,
    value: &str,
    allowed: &[&str],
    upper: bool,
) -> Result<String, ConfigError> {
    let value = if upper {
        value.to_uppercase()
    } else {
        value.to_string()
    };
    if allowed.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(ConfigError::NotInSet {
            op: op.to_string(),
            attr: attr.to_string(),
            allowed: allowed.join(", "),
            got: value,
        })
    }
}

/// Check an attribute that is either an int or a tuple of `N` ints, each
/// `>= min`, returning the tuple.
pub fn check_int_or_tuple<const N: usize>(
    op: &str,
    attr: &str,
    value: &AttrValue,
    min: i64,
) -> Result<[usize; N], ConfigError> {
    let requirement = || format!("an int >= {} or a tuple of {} such ints", min, N);
    match check_value_type(op, attr, value, &[AttrKind::Int, AttrKind::Ints])? {
        AttrValue::Int(x) if *x >= min => Ok([*x as usize; N]),
        AttrValue::Ints(xs) if xs.len() == N && xs.iter().all(|x| *x >= min) => {
            let mut out = [0; N];
            for (o, x) in out.iter_mut().zip(xs) {
                *o = *x as usize;
            }
            Ok(out)
        }
        other => Err(out_of_range(op, attr, requirement(), other)),
    }
}

/// Check an attribute that is either a positive int or a pair of positive
/// ints, returning the pair.
pub fn check_int_or_pair(op: &str, attr: &str, value: &AttrValue) -> Result<[usize; 2], ConfigError> {
    check_int_or_tuple(op, attr, value, 1)
}

/// Check that every element of an integer tuple is positive.
pub fn check_positive_ints(op: &str, attr: &str, values: &[i64]) -> Result<Vec<usize>, ConfigError> {
    if values.iter().all(|&x| x > 0) {
        Ok(values.iter().map(|&x| x as usize).collect())
    } else {
        Err(out_of_range(
            op,
            attr,
            "a tuple of positive ints".to_string(),
            format!("{:?}", values),
        ))
    }
}

/// Check that a tuple attribute has `len` elements.
pub fn check_len<T: fmt::Debug>(op: &str, attr: &str, values: &[T], len: usize) -> Result<(), ConfigError> {
    if values.len() == len {
        Ok(())
    } else {
        Err(out_of_range(
            op,
            attr,
            format!("a tuple of length {}", len),
            format!("{:?}", values),
        ))
    }
}

/// Check that `lower <= upper` for a pair of bound attributes.
pub fn check_lower_upper(
    op: &str,
    lower_name: &str,
    lower: f64,
    upper_name: &str,
    upper: f64,
) -> Result<(), ConfigError> {
    if lower <= upper {
        Ok(())
    } else {
        Err(ConfigError::Inconsistent {
            op: op.to_string(),
            message: format!(
                "the value of '{}' must be greater than or equal to '{}', but got {}: {}, {}: {}",
                upper_name, lower_name, upper_name, upper, lower_name, lower
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{
        Interval, Rel, check_float_range, check_int, check_int_or_pair, check_lower_upper,
        check_string, check_value_type,
    };
    use crate::attrs::{AttrKind, AttrValue};
    use crate::error::ConfigError;

    #[test]
    fn test_check_value_type() {
        let value = AttrValue::Str("same".into());
        assert!(check_value_type("MaxPool", "pad_mode", &value, &[AttrKind::Str]).is_ok());
        let err = check_value_type("MaxPool", "kernel_size", &value, &[AttrKind::Int, AttrKind::Ints])
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::InvalidType { .. }));
        assert!(err.to_string().contains("kernel_size"));
    }

    #[test]
    fn test_check_int() {
        #[derive(Debug)]
        struct Case {
            value: i64,
            rel: Rel,
            bound: i64,
            ok: bool,
        }

        let cases = [
            Case {
                value: 1,
                rel: Rel::Ge,
                bound: 1,
                ok: true,
            },
            Case {
                value: 0,
                rel: Rel::Ge,
                bound: 1,
                ok: false,
            },
            Case {
                value: 0,
                rel: Rel::Gt,
                bound: 0,
                ok: false,
            },
            Case {
                value: 3,
                rel: Rel::Eq,
                bound: 3,
                ok: true,
            },
            Case {
                value: 5,
                rel: Rel::Lt,
                bound: 4,
                ok: false,
            },
        ];

        cases.test_each(|case| {
            let result = check_int("Op", "attr", case.value, case.rel, case.bound);
            assert_eq!(result.is_ok(), case.ok);
        });
    }

    #[test]
    fn test_check_float_range() {
        assert!(check_float_range("Dropout2D", "keep_prob", 1.0, 0., 1., Interval::OpenClosed).is_ok());
        assert!(check_float_range("Dropout2D", "keep_prob", 0.0, 0., 1., Interval::OpenClosed).is_err());
        assert!(check_float_range("Op", "x", 0.5, 0., 1., Interval::Open).is_ok());
    }

    #[test]
    fn test_check_string_upper_cases() {
        assert_eq!(
            check_string("MaxPool", "pad_mode", "same", &["VALID", "SAME"], true).unwrap(),
            "SAME"
        );
        let err = check_string("MaxPool", "pad_mode", "bogus", &["VALID", "SAME"], true)
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::NotInSet {
                op: "MaxPool".into(),
                attr: "pad_mode".into(),
                allowed: "VALID, SAME".into(),
                got: "BOGUS".into(),
            }
        );
        // Case-sensitive check
        assert!(check_string("MaxPool", "data_format", "nchw", &["NCHW", "NHWC"], false).is_err());
    }

    #[test]
    fn test_check_int_or_pair() {
        #[derive(Debug)]
        struct Case {
            value: AttrValue,
            expected: Option<[usize; 2]>,
        }

        let cases = [
            Case {
                value: AttrValue::Int(3),
                expected: Some([3, 3]),
            },
            Case {
                value: AttrValue::Ints(vec![2, 4]),
                expected: Some([2, 4]),
            },
            Case {
                value: AttrValue::Int(0),
                expected: None,
            },
            Case {
                value: AttrValue::Ints(vec![2, 4, 1]),
                expected: None,
            },
            Case {
                value: AttrValue::Ints(vec![2, -1]),
                expected: None,
            },
            Case {
                value: AttrValue::Float(2.),
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let result = check_int_or_pair("AvgPool", "kernel_size", &case.value).ok();
            assert_eq!(result, case.expected);
        });
    }

    #[test]
    fn test_check_lower_upper() {
        assert!(check_lower_upper("RReLU", "lower", 0.1, "upper", 0.5).is_ok());
        let err = check_lower_upper("RReLU", "lower", 0.5, "upper", 0.1)
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Inconsistent { .. }));
    }
}
