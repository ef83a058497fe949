//! In-place optimizer updates.
//!
//! Each operator reads a variable `var`, zero or more accumulators of the
//! same shape, a gradient and scalar hyperparameters, and returns the
//! updated variable and accumulators. With a non-zero `batch_rank` every
//! operand carries that many leading batch axes, so "scalar" hyperparameters
//! have shape `var.shape[..batch_rank]`.

use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::{FLOAT_TYPES, INDEX_TYPES, ValueType};
use crate::error::InferError;
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{BatchRankOp, check_dtype, check_same_dtype, check_same_shape, shapes_compatible, shaped_like};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;

/// Role of an optimizer operand.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandRole {
    /// The variable being updated.
    Var,

    /// State updated alongside the variable. Must be batched exactly like
    /// `var`.
    Accum,

    /// A tensor with the shape of `var` that is only read.
    Grad,

    /// A floating point hyperparameter.
    Scalar,

    /// An integer step counter.
    Step,
}

/// An optimizer update operator.
pub trait Optimizer: BatchRankOp {
    /// Role of each input, in input order. The outputs are the updated
    /// values of the leading inputs.
    const ROLES: &'static [OperandRole];
}

/// Check the shape of a scalar hyperparameter given the batch shape of
/// `var`.
fn check_scalar_shape(
    op: &str,
    name: &str,
    shape: &Shape,
    batch_shape: Option<&Shape>,
    batch_rank: usize,
) -> Result<(), InferError> {
    let ok = if batch_rank == 0 {
        // Scalars may also be passed as a single-element vector.
        match shape.dims() {
            Some([]) => true,
            Some([d]) => matches!(d, Dim::Known(1) | Dim::Unknown),
            Some(_) => false,
            None => true,
        }
    } else {
        match batch_shape {
            Some(expected) => shapes_compatible(expected, shape) && shape.rank().is_some_and(|r| r == batch_rank),
            None => true,
        }
    };
    if ok {
        Ok(())
    } else {
        let expected = batch_shape.cloned().unwrap_or_else(Shape::scalar);
        Err(InferError::shape(
            op,
            format!(
                "the shape of '{}' must be {} with batch rank {}, but got {}",
                name, expected, batch_rank, shape
            ),
        ))
    }
}

/// Shared inference of the optimizer updates.
fn infer_apply(
    op: &str,
    batch_rank: usize,
    names: &[&str],
    roles: &[OperandRole],
    n_outputs: usize,
    inputs: &[TensorType],
) -> Result<InferOutput, InferError> {
    if inputs.len() != roles.len() {
        return Err(InferError::shape(
            op,
            format!("expected {} inputs, but got {}", roles.len(), inputs.len()),
        ));
    }
    let var = &inputs[0];
    let float_operands: Vec<(&str, ValueType)> = names
        .iter()
        .zip(roles)
        .zip(inputs)
        .filter(|((_, role), _)| **role != OperandRole::Step)
        .map(|((name, _), input)| (*name, input.dtype()))
        .collect();
    check_same_dtype(op, &float_operands, FLOAT_TYPES)?;

    let batch_shape = match var.shape().dims() {
        Some(dims) if dims.len() < batch_rank => {
            return Err(InferError::shape(
                op,
                format!(
                    "the rank of 'var' {} must be at least the batch rank {}",
                    var.shape(),
                    batch_rank
                ),
            ));
        }
        Some(dims) => Some(Shape::new(dims[..batch_rank].iter().copied())),
        None => None,
    };

    for ((name, role), input) in names.iter().zip(roles).zip(inputs) {
        match role {
            OperandRole::Var => {}
            OperandRole::Accum | OperandRole::Grad => {
                check_same_shape(op, ("var", var.shape()), (name, input.shape()))?;
            }
            OperandRole::Scalar => {
                check_scalar_shape(op, name, input.shape(), batch_shape.as_ref(), batch_rank)?;
            }
            OperandRole::Step => {
                check_dtype(op, name, input.dtype(), INDEX_TYPES)?;
                check_scalar_shape(op, name, input.shape(), batch_shape.as_ref(), batch_rank)?;
            }
        }
    }

    let outputs = inputs[..n_outputs]
        .iter()
        .map(|input| shaped_like(input, var.dtype()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InferOutput::new(outputs))
}

macro_rules! optimizer_op {
    (
        $(#[$meta:meta])*
        $op:ident,
        [$($input:literal),*] -> [$($output:literal),*],
        [$($role:ident),*]
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default)]
        pub struct $op {
            pub use_locking: bool,

            /// Number of leading batch axes added by vmap.
            pub batch_rank: usize,
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_apply(
                    stringify!($op),
                    self.batch_rank,
                    &[$($input),*],
                    Self::ROLES,
                    [$($output),*].len(),
                    inputs,
                )
            }
        }

        impl BatchRankOp for $op {
            fn batch_rank(&self) -> usize {
                self.batch_rank
            }

            fn with_batch_rank(&self, batch_rank: usize) -> Self {
                $op {
                    batch_rank,
                    ..self.clone()
                }
            }
        }

        impl Optimizer for $op {
            const ROLES: &'static [OperandRole] = &[$(OperandRole::$role),*];
        }

        impl_operator!(
            $op,
            [$($input),*] -> [$($output),*],
            full,
            attrs = |op| Attributes::from([
                ("use_locking", AttrValue::Bool(op.use_locking)),
                ("batch_rank", AttrValue::Int(op.batch_rank as i64)),
            ])
        );
    };
}

optimizer_op!(
    /// AdaMax: Adam with the infinity norm.
    ApplyAdaMax,
    ["var", "m", "v", "beta1_power", "lr", "beta1", "beta2", "epsilon", "grad"] -> ["var", "m", "v"],
    [Var, Accum, Accum, Scalar, Scalar, Scalar, Scalar, Scalar, Grad]
);

optimizer_op!(
    ApplyAdadelta,
    ["var", "accum", "accum_update", "lr", "rho", "epsilon", "grad"] -> ["var", "accum", "accum_update"],
    [Var, Accum, Accum, Scalar, Scalar, Scalar, Grad]
);

optimizer_op!(
    /// Follow-the-regularized-leader. Only `var` is returned.
    ApplyFtrl,
    ["var", "accum", "linear", "grad", "lr", "l1", "l2", "lr_power"] -> ["var"],
    [Var, Accum, Accum, Grad, Scalar, Scalar, Scalar, Scalar]
);

optimizer_op!(
    ApplyProximalAdagrad,
    ["var", "accum", "lr", "l1", "l2", "grad"] -> ["var", "accum"],
    [Var, Accum, Scalar, Scalar, Scalar, Grad]
);

optimizer_op!(
    ApplyProximalGradientDescent,
    ["var", "alpha", "l1", "l2", "delta"] -> ["var"],
    [Var, Scalar, Scalar, Scalar, Grad]
);

optimizer_op!(
    ApplyPowerSign,
    ["var", "m", "lr", "logbase", "sign_decay", "beta", "grad"] -> ["var", "m"],
    [Var, Accum, Scalar, Scalar, Scalar, Scalar, Grad]
);

optimizer_op!(
    /// Adagrad dual averaging. `global_step` is an integer counter.
    ApplyAdagradDA,
    [
        "var",
        "gradient_accumulator",
        "gradient_squared_accumulator",
        "grad",
        "lr",
        "l1",
        "l2",
        "global_step"
    ] -> ["var", "gradient_accumulator", "gradient_squared_accumulator"],
    [Var, Accum, Accum, Grad, Scalar, Scalar, Scalar, Step]
);

/// Adam with the AMSGrad variant, keeping the maximum of past squared
/// gradients in `vhat`.
#[derive(Clone, Debug)]
pub struct ApplyAdamWithAmsgrad {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub use_locking: bool,
    pub batch_rank: usize,
}

impl Default for ApplyAdamWithAmsgrad {
    fn default() -> Self {
        ApplyAdamWithAmsgrad {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            use_locking: false,
            batch_rank: 0,
        }
    }
}

const AMSGRAD_INPUTS: &[&str] = &["var", "m", "v", "vhat", "beta1_power", "beta2_power", "lr", "grad"];

impl InferTypes for ApplyAdamWithAmsgrad {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        infer_apply(
            "ApplyAdamWithAmsgrad",
            self.batch_rank,
            AMSGRAD_INPUTS,
            Self::ROLES,
            4,
            inputs,
        )
    }
}

impl BatchRankOp for ApplyAdamWithAmsgrad {
    fn batch_rank(&self) -> usize {
        self.batch_rank
    }

    fn with_batch_rank(&self, batch_rank: usize) -> Self {
        ApplyAdamWithAmsgrad {
            batch_rank,
            ..self.clone()
        }
    }
}

impl Optimizer for ApplyAdamWithAmsgrad {
    const ROLES: &'static [OperandRole] = &[
        OperandRole::Var,
        OperandRole::Accum,
        OperandRole::Accum,
        OperandRole::Accum,
        OperandRole::Scalar,
        OperandRole::Scalar,
        OperandRole::Scalar,
        OperandRole::Grad,
    ];
}

impl_operator!(
    ApplyAdamWithAmsgrad,
    ["var", "m", "v", "vhat", "beta1_power", "beta2_power", "lr", "grad"] -> ["var", "m", "v", "vhat"],
    full,
    attrs = |op| Attributes::from([
        ("beta1", AttrValue::Float(op.beta1)),
        ("beta2", AttrValue::Float(op.beta2)),
        ("epsilon", AttrValue::Float(op.epsilon)),
        ("use_locking", AttrValue::Bool(op.use_locking)),
        ("batch_rank", AttrValue::Int(op.batch_rank as i64)),
    ])
);

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{ApplyAdaMax, ApplyAdagradDA, ApplyAdamWithAmsgrad, ApplyFtrl, Optimizer};
    use crate::dtype::{DataType, ValueType};
    use crate::error::InferError;
    use crate::operator::{Operator, OperatorExt};
    use crate::ops::BatchRankOp;
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;

    fn f32s(shape: Shape) -> TensorType {
        TensorType::tensor(DataType::Float32, shape)
    }

    #[test]
    fn test_apply_ada_max() {
        #[derive(Debug)]
        struct Case {
            batch_rank: usize,
            var: Shape,
            m: Shape,
            lr: Shape,
            ok: bool,
        }

        let cases = [
            Case {
                batch_rank: 0,
                var: shape!(3, 4),
                m: shape!(3, 4),
                lr: Shape::scalar(),
                ok: true,
            },
            Case {
                batch_rank: 0,
                var: shape!(3, 4),
                m: shape!(3, 4),
                lr: shape!(1),
                ok: true,
            },
            Case {
                batch_rank: 0,
                var: shape!(3, 4),
                m: shape!(3, 5),
                lr: Shape::scalar(),
                ok: false,
            },
            Case {
                batch_rank: 0,
                var: shape!(3, 4),
                m: shape!(3, 4),
                lr: shape!(3),
                ok: false,
            },
            Case {
                batch_rank: 1,
                var: shape!(2, 3, 4),
                m: shape!(2, 3, 4),
                lr: shape!(2),
                ok: true,
            },
            Case {
                batch_rank: 1,
                var: shape!(2, 3, 4),
                m: shape!(2, 3, 4),
                lr: Shape::scalar(),
                ok: false,
            },
        ];

        cases.test_each(|case| {
            let op = ApplyAdaMax::default().with_batch_rank(case.batch_rank);
            let var = f32s(case.var.clone());
            let m = f32s(case.m.clone());
            let lr = f32s(case.lr.clone());
            let inputs: Vec<TensorType> = ApplyAdaMax::ROLES
                .iter()
                .enumerate()
                .map(|(i, _)| match op.input_names()[i] {
                    "var" | "v" | "grad" => var.clone(),
                    "m" => m.clone(),
                    _ => lr.clone(),
                })
                .collect();
            let result = op.infer_simple(&inputs);
            if case.ok {
                let outputs = result.unwrap();
                assert_eq!(outputs.len(), 3);
                assert_eq!(outputs[0].shape(), &case.var);
            } else {
                assert!(matches!(result, Err(InferError::Shape { .. })));
            }
        });
    }

    #[test]
    fn test_apply_ftrl_returns_var() {
        let var = f32s(shape!(5));
        let s = TensorType::const_float(0.1);
        let inputs = [
            var.clone(),
            var.clone(),
            var.clone(),
            var.clone(),
            s.clone(),
            s.clone(),
            s.clone(),
            s,
        ];
        let out = ApplyFtrl::default().infer_simple(&inputs).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].shape(), &shape!(5));
    }

    #[test]
    fn test_apply_adagrad_da_step_dtype() {
        let var = f32s(shape!(5));
        let s = f32s(Shape::scalar());
        let step = TensorType::tensor(DataType::Int64, Shape::scalar());
        let mut inputs = vec![
            var.clone(),
            var.clone(),
            var.clone(),
            var.clone(),
            s.clone(),
            s.clone(),
            s.clone(),
            step,
        ];
        let out = ApplyAdagradDA::default().infer_simple(&inputs).unwrap();
        assert_eq!(out.len(), 3);

        inputs[7] = s.clone();
        assert!(matches!(
            ApplyAdagradDA::default().infer_simple(&inputs),
            Err(InferError::Dtype { .. })
        ));

        inputs[7] = TensorType::tensor(DataType::Int32, Shape::scalar());
        inputs[4] = TensorType::tensor(DataType::Float16, Shape::scalar());
        assert!(matches!(
            ApplyAdagradDA::default().infer_simple(&inputs),
            Err(InferError::Dtype { .. })
        ));
    }

    #[test]
    fn test_amsgrad_batch_rank_attr() {
        let op = ApplyAdamWithAmsgrad::default().with_batch_rank(2);
        assert_eq!(op.batch_rank(), 2);
        assert_eq!(op.beta2, 0.999);
        assert_eq!(
            op.attrs().get("batch_rank"),
            Some(&crate::attrs::AttrValue::Int(2))
        );

        let var = f32s(shape!(2, 3, 4));
        let s = f32s(shape!(2, 3));
        let inputs = [
            var.clone(),
            var.clone(),
            var.clone(),
            var.clone(),
            s.clone(),
            s.clone(),
            s,
            var,
        ];
        let out = op.infer_simple(&inputs).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[3].dtype(), ValueType::Tensor(DataType::Float32));
    }
}
