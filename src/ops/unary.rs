//! Elementwise activations, their gradients and softmax.
//!
//! These operators use split inference: the output has the shape and dtype
//! of the first input, and only floating point inputs are accepted.

use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::{FLOAT_TYPES, ValueType};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferSplit, impl_operator};
use crate::ops::{check_same_dtype, check_same_shape, check_tensor_dtype, resolve_axes, resolve_axis};
use crate::shape::Shape;
use crate::validator::{Rel, check_float, check_lower_upper};

fn unary_dtype(op: &str, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
    check_tensor_dtype(op, "x", dtypes[0], FLOAT_TYPES)?;
    Ok(vec![dtypes[0]])
}

/// Declare split inference for an elementwise operator with one float input.
macro_rules! unary_float_op {
    ($op:ident $(, attrs = |$this:ident| $attrs:expr)?) => {
        impl InferSplit for $op {
            fn infer_shape(&self, shapes: &[Shape], _ctx: &InferContext) -> Result<Vec<Shape>, InferError> {
                Ok(vec![shapes[0].clone()])
            }

            fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
                unary_dtype(stringify!($op), dtypes)
            }
        }

        impl_operator!($op, ["x"] -> ["output"], split $(, attrs = |$this| $attrs)?);
    };
}

#[derive(Clone, Debug, Default)]
pub struct ReLU {}
unary_float_op!(ReLU);

#[derive(Clone, Debug, Default)]
pub struct ReLU6 {}
unary_float_op!(ReLU6);

#[derive(Clone, Debug)]
pub struct Elu {
    pub alpha: f64,
}

impl Elu {
    /// Only `alpha == 1.0` is supported by the kernels.
    pub fn new(alpha: f64) -> Result<Elu, ConfigError> {
        check_float("Elu", "alpha", alpha, Rel::Eq, 1.0)?;
        Ok(Elu { alpha })
    }
}

unary_float_op!(Elu, attrs = |op| Attributes::from([("alpha", AttrValue::Float(op.alpha))]));

#[derive(Clone, Debug)]
pub struct CeLU {
    pub alpha: f64,
}

impl CeLU {
    pub fn new(alpha: f64) -> Result<CeLU, ConfigError> {
        check_float("CeLU", "alpha", alpha, Rel::Ne, 0.0)?;
        Ok(CeLU { alpha })
    }
}

unary_float_op!(CeLU, attrs = |op| Attributes::from([("alpha", AttrValue::Float(op.alpha))]));

#[derive(Clone, Debug, Default)]
pub struct SeLU {}
unary_float_op!(SeLU);

#[derive(Clone, Debug, Default)]
pub struct HSigmoid {}
unary_float_op!(HSigmoid);

#[derive(Clone, Debug, Default)]
pub struct HSwish {}
unary_float_op!(HSwish);

#[derive(Clone, Debug, Default)]
pub struct Softplus {}
unary_float_op!(Softplus);

#[derive(Clone, Debug, Default)]
pub struct Softsign {}
unary_float_op!(Softsign);

#[derive(Clone, Debug)]
pub struct SoftShrink {
    pub lambd: f64,
}

impl SoftShrink {
    pub fn new(lambd: f64) -> Result<SoftShrink, ConfigError> {
        check_float("SoftShrink", "lambd", lambd, Rel::Ge, 0.0)?;
        Ok(SoftShrink { lambd })
    }
}

unary_float_op!(SoftShrink, attrs = |op| Attributes::from([("lambd", AttrValue::Float(op.lambd))]));

#[derive(Clone, Debug)]
pub struct HShrink {
    pub lambd: f64,
}

impl HShrink {
    pub fn new(lambd: f64) -> HShrink {
        HShrink { lambd }
    }
}

unary_float_op!(HShrink, attrs = |op| Attributes::from([("lambd", AttrValue::Float(op.lambd))]));

#[derive(Clone, Debug, Default)]
pub struct GeLU {}
unary_float_op!(GeLU);

#[derive(Clone, Debug, Default)]
pub struct FastGeLU {}
unary_float_op!(FastGeLU);

#[derive(Clone, Debug, Default)]
pub struct Tanh {}
unary_float_op!(Tanh);

#[derive(Clone, Debug, Default)]
pub struct Sigmoid {}
unary_float_op!(Sigmoid);

/// Randomized leaky ReLU. Negative slopes are sampled from `[lower, upper]`.
#[derive(Clone, Debug)]
pub struct RReLU {
    pub lower: f64,
    pub upper: f64,
}

impl RReLU {
    pub fn new(lower: f64, upper: f64) -> Result<RReLU, ConfigError> {
        check_lower_upper("RReLU", "lower", lower, "upper", upper)?;
        Ok(RReLU { lower, upper })
    }
}

impl Default for RReLU {
    fn default() -> Self {
        RReLU {
            lower: 1. / 8.,
            upper: 1. / 3.,
        }
    }
}

unary_float_op!(
    RReLU,
    attrs = |op| Attributes::from([
        ("lower", AttrValue::Float(op.lower)),
        ("upper", AttrValue::Float(op.upper)),
    ])
);

/// Softmax over one or more axes.
#[derive(Clone, Debug)]
pub struct Softmax {
    pub axis: Vec<i64>,
}

impl Softmax {
    pub fn new(axis: Vec<i64>) -> Result<Softmax, ConfigError> {
        if axis.is_empty() {
            return Err(ConfigError::OutOfRange {
                op: "Softmax".into(),
                attr: "axis".into(),
                requirement: "a non-empty tuple".into(),
                got: "()".into(),
            });
        }
        Ok(Softmax { axis })
    }
}

impl Default for Softmax {
    fn default() -> Self {
        Softmax { axis: vec![-1] }
    }
}

impl InferSplit for Softmax {
    fn infer_shape(&self, shapes: &[Shape], _ctx: &InferContext) -> Result<Vec<Shape>, InferError> {
        if let Some(rank) = shapes[0].rank() {
            resolve_axes("Softmax", &self.axis, rank)?;
        }
        Ok(vec![shapes[0].clone()])
    }

    fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
        unary_dtype("Softmax", dtypes)
    }
}

impl_operator!(
    Softmax,
    ["x"] -> ["output"],
    split,
    attrs = |op| Attributes::from([("axis", AttrValue::Ints(op.axis.clone()))])
);

#[derive(Clone, Debug)]
pub struct LogSoftmax {
    pub axis: i64,
}

impl Default for LogSoftmax {
    fn default() -> Self {
        LogSoftmax { axis: -1 }
    }
}

impl InferSplit for LogSoftmax {
    fn infer_shape(&self, shapes: &[Shape], _ctx: &InferContext) -> Result<Vec<Shape>, InferError> {
        if let Some(rank) = shapes[0].rank() {
            resolve_axis("LogSoftmax", self.axis, rank)?;
        }
        Ok(vec![shapes[0].clone()])
    }

    fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
        unary_dtype("LogSoftmax", dtypes)
    }
}

impl_operator!(
    LogSoftmax,
    ["logits"] -> ["output"],
    split,
    attrs = |op| Attributes::from([("axis", AttrValue::Int(op.axis))])
);

/// Declare split inference for an activation gradient. Both inputs must
/// have the same shape and float dtype, which the output takes.
macro_rules! grad_op {
    ($op:ident, [$a:literal, $b:literal] $(, attrs = |$this:ident| $attrs:expr)?) => {
        impl InferSplit for $op {
            fn infer_shape(&self, shapes: &[Shape], _ctx: &InferContext) -> Result<Vec<Shape>, InferError> {
                check_same_shape(stringify!($op), ($a, &shapes[0]), ($b, &shapes[1]))?;
                Ok(vec![shapes[0].clone()])
            }

            fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
                check_tensor_dtype(stringify!($op), $a, dtypes[0], FLOAT_TYPES)?;
                check_same_dtype(stringify!($op), &[($a, dtypes[0]), ($b, dtypes[1])], FLOAT_TYPES)?;
                Ok(vec![dtypes[0]])
            }
        }

        impl_operator!($op, [$a, $b] -> ["output"], split $(, attrs = |$this| $attrs)?);
    };
}

#[derive(Clone, Debug, Default)]
pub struct TanhGrad {}
grad_op!(TanhGrad, ["y", "dy"]);

#[derive(Clone, Debug, Default)]
pub struct SoftplusGrad {}
grad_op!(SoftplusGrad, ["gradients", "features"]);

#[derive(Clone, Debug, Default)]
pub struct FastGeLUGrad {}
grad_op!(FastGeLUGrad, ["dy", "x"]);

#[derive(Clone, Debug, Default)]
pub struct HSwishGrad {}
grad_op!(HSwishGrad, ["y_grad", "x"]);

#[derive(Clone, Debug)]
pub struct HShrinkGrad {
    pub lambd: f64,
}

grad_op!(
    HShrinkGrad,
    ["gradients", "features"],
    attrs = |op| Attributes::from([("lambd", AttrValue::Float(op.lambd))])
);

#[derive(Clone, Debug)]
pub struct SoftShrinkGrad {
    pub lambd: f64,
}

impl SoftShrinkGrad {
    pub fn new(lambd: f64) -> Result<SoftShrinkGrad, ConfigError> {
        check_float("SoftShrinkGrad", "lambd", lambd, Rel::Ge, 0.0)?;
        Ok(SoftShrinkGrad { lambd })
    }
}

grad_op!(
    SoftShrinkGrad,
    ["input_grad", "input_x"],
    attrs = |op| Attributes::from([("lambd", AttrValue::Float(op.lambd))])
);

#[cfg(test)]
mod tests {
    use super::{CeLU, Elu, FastGeLUGrad, LogSoftmax, RReLU, ReLU, SoftShrink, Softmax, TanhGrad};
    use crate::dtype::DataType;
    use crate::error::{ConfigError, InferError};
    use crate::operator::OperatorExt;
    use crate::shape::shape;
    use crate::tensor_type::TensorType;

    #[test]
    fn test_unary_keeps_shape_and_dtype() {
        let x = TensorType::tensor(DataType::Float16, shape!(2, -1, 3));
        let out = ReLU {}.infer_simple(&[x]).unwrap();
        assert_eq!(out[0], TensorType::tensor(DataType::Float16, shape!(2, -1, 3)));

        let x = TensorType::tensor(DataType::Int32, shape!(2));
        let err = ReLU {}.infer_simple(&[x]).err().unwrap();
        assert!(matches!(err, InferError::Dtype { .. }));
    }

    #[test]
    fn test_rrelu_lower_must_not_exceed_upper() {
        let err = RReLU::new(0.5, 0.1).err().unwrap();
        assert!(matches!(err, ConfigError::Inconsistent { ref op, .. } if op == "RReLU"));
        assert!(RReLU::new(0.1, 0.5).is_ok());
        assert!(RReLU::new(0.3, 0.3).is_ok());
    }

    #[test]
    fn test_activation_attrs_are_validated() {
        assert!(Elu::new(1.0).is_ok());
        assert!(Elu::new(0.5).is_err());
        assert!(CeLU::new(0.0).is_err());
        assert!(SoftShrink::new(-0.5).is_err());
    }

    #[test]
    fn test_softmax_axis_range() {
        let x = TensorType::tensor(DataType::Float32, shape!(2, 3));
        let op = Softmax::new(vec![-1, 0]).unwrap();
        assert!(op.infer_simple(&[x.clone()]).is_ok());

        let op = Softmax::new(vec![1, -1]).unwrap();
        assert!(op.infer_simple(&[x.clone()]).is_err());
        assert!(Softmax::new(vec![]).is_err());

        let op = LogSoftmax { axis: 2 };
        assert!(op.infer_simple(&[x]).is_err());
    }

    #[test]
    fn test_grad_shapes_must_match() {
        let y = TensorType::tensor(DataType::Float32, shape!(4, 5));
        let dy = TensorType::tensor(DataType::Float32, shape!(4, -1));
        let out = TanhGrad {}.infer_simple(&[y.clone(), dy]).unwrap();
        assert_eq!(out[0].shape(), &shape!(4, 5));

        let dy = TensorType::tensor(DataType::Float32, shape!(4, 6));
        assert!(matches!(
            FastGeLUGrad {}.infer_simple(&[y.clone(), dy]),
            Err(InferError::Shape { .. })
        ));

        let dy = TensorType::tensor(DataType::Float16, shape!(4, 5));
        assert!(matches!(
            TanhGrad {}.infer_simple(&[y, dy]),
            Err(InferError::Dtype { .. })
        ));
    }
}
