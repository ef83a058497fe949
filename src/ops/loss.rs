//! Loss functions and their gradients.

use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::FLOAT_TYPES;
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{broadcast_shapes, check_same_dtype, check_same_shape, shapes_compatible, shaped_like};
use crate::shape::Shape;
use crate::tensor_type::TensorType;
use crate::validator::{Rel, check_float, check_string};

/// How per-element losses are combined into the output.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Reduction {
    /// Return the per-element losses.
    None,
    #[default]
    Mean,
    Sum,
    /// Sum divided by the size of the first axis.
    BatchMean,
}

impl Reduction {
    pub fn parse(op: &str, value: &str, allowed: &[&str]) -> Result<Reduction, ConfigError> {
        match check_string(op, "reduction", value, allowed, false)?.as_str() {
            "none" => Ok(Reduction::None),
            "sum" => Ok(Reduction::Sum),
            "batchmean" => Ok(Reduction::BatchMean),
            _ => Ok(Reduction::Mean),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Reduction::None => "none",
            Reduction::Mean => "mean",
            Reduction::Sum => "sum",
            Reduction::BatchMean => "batchmean",
        }
    }

    fn attrs(self) -> Attributes {
        Attributes::from([("reduction", AttrValue::Str(self.name().into()))])
    }
}

const BASIC_REDUCTIONS: &[&str] = &["none", "mean", "sum"];

/// Return the loss output for per-element losses shaped like `x`.
fn loss_output(x: &TensorType, reduction: Reduction) -> Result<TensorType, InferError> {
    match reduction {
        Reduction::None => shaped_like(x, x.dtype()),
        _ => Ok(TensorType::new(x.dtype(), Shape::scalar())),
    }
}

/// Check that two same-shaped loss operands agree on dtype and shape.
fn check_operands(op: &str, a: (&str, &TensorType), b: (&str, &TensorType)) -> Result<(), InferError> {
    check_same_dtype(op, &[(a.0, a.1.dtype()), (b.0, b.1.dtype())], FLOAT_TYPES)?;
    check_same_shape(op, (a.0, a.1.shape()), (b.0, b.1.shape()))
}

/// Kullback-Leibler divergence between `labels` and the log-probabilities
/// `logits`.
#[derive(Clone, Debug, Default)]
pub struct KLDivLoss {
    pub reduction: Reduction,
}

impl KLDivLoss {
    pub fn new(reduction: &str) -> Result<KLDivLoss, ConfigError> {
        let allowed = ["none", "mean", "sum", "batchmean"];
        Ok(KLDivLoss {
            reduction: Reduction::parse("KLDivLoss", reduction, &allowed)?,
        })
    }
}

impl InferTypes for KLDivLoss {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [logits, labels] = inputs else {
            return Err(InferError::shape("KLDivLoss", "expected 2 inputs"));
        };
        check_operands("KLDivLoss", ("logits", logits), ("labels", labels))?;
        Ok(InferOutput::single(loss_output(logits, self.reduction)?))
    }
}

impl_operator!(
    KLDivLoss,
    ["logits", "labels"] -> ["output"],
    full,
    attrs = |op| op.reduction.attrs()
);

/// Gradient of [`KLDivLoss`] with respect to its input.
#[derive(Clone, Debug, Default)]
pub struct KLDivLossGrad {
    pub reduction: Reduction,
}

impl KLDivLossGrad {
    pub fn new(reduction: &str) -> Result<KLDivLossGrad, ConfigError> {
        let allowed = ["none", "mean", "sum", "batchmean"];
        Ok(KLDivLossGrad {
            reduction: Reduction::parse("KLDivLossGrad", reduction, &allowed)?,
        })
    }
}

impl InferTypes for KLDivLossGrad {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [grads, input, target] = inputs else {
            return Err(InferError::shape("KLDivLossGrad", "expected 3 inputs"));
        };
        check_operands("KLDivLossGrad", ("input", input), ("target", target))?;
        check_same_dtype(
            "KLDivLossGrad",
            &[("input", input.dtype()), ("grads", grads.dtype())],
            FLOAT_TYPES,
        )?;
        if self.reduction == Reduction::None {
            check_same_shape("KLDivLossGrad", ("input", input.shape()), ("grads", grads.shape()))?;
        }
        Ok(InferOutput::single(shaped_like(input, input.dtype())?))
    }
}

impl_operator!(
    KLDivLossGrad,
    ["grads", "input", "target"] -> ["output"],
    full,
    attrs = |op| op.reduction.attrs()
);

fn smooth_l1_attrs(beta: f64, reduction: Reduction) -> Attributes {
    reduction.attrs().with("beta", beta)
}

/// Huber-style loss which is quadratic below `beta` and linear above.
#[derive(Clone, Debug)]
pub struct SmoothL1Loss {
    pub beta: f64,
    pub reduction: Reduction,
}

impl SmoothL1Loss {
    pub fn new(beta: f64, reduction: &str) -> Result<SmoothL1Loss, ConfigError> {
        Ok(SmoothL1Loss {
            beta: check_float("SmoothL1Loss", "beta", beta, Rel::Gt, 0.)?,
            reduction: Reduction::parse("SmoothL1Loss", reduction, BASIC_REDUCTIONS)?,
        })
    }
}

impl Default for SmoothL1Loss {
    fn default() -> Self {
        SmoothL1Loss {
            beta: 1.0,
            reduction: Reduction::None,
        }
    }
}

impl InferTypes for SmoothL1Loss {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [prediction, target] = inputs else {
            return Err(InferError::shape("SmoothL1Loss", "expected 2 inputs"));
        };
        check_operands("SmoothL1Loss", ("prediction", prediction), ("target", target))?;
        Ok(InferOutput::single(loss_output(prediction, self.reduction)?))
    }
}

impl_operator!(
    SmoothL1Loss,
    ["prediction", "target"] -> ["output"],
    full,
    attrs = |op| smooth_l1_attrs(op.beta, op.reduction)
);

/// Gradient of [`SmoothL1Loss`] with respect to the prediction.
#[derive(Clone, Debug)]
pub struct SmoothL1LossGrad {
    pub beta: f64,
    pub reduction: Reduction,
}

impl SmoothL1LossGrad {
    pub fn new(beta: f64, reduction: &str) -> Result<SmoothL1LossGrad, ConfigError> {
        Ok(SmoothL1LossGrad {
            beta: check_float("SmoothL1LossGrad", "beta", beta, Rel::Gt, 0.)?,
            reduction: Reduction::parse("SmoothL1LossGrad", reduction, BASIC_REDUCTIONS)?,
        })
    }
}

impl Default for SmoothL1LossGrad {
    fn default() -> Self {
        SmoothL1LossGrad {
            beta: 1.0,
            reduction: Reduction::None,
        }
    }
}

impl InferTypes for SmoothL1LossGrad {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [prediction, target, dout] = inputs else {
            return Err(InferError::shape("SmoothL1LossGrad", "expected 3 inputs"));
        };
        check_operands("SmoothL1LossGrad", ("prediction", prediction), ("target", target))?;
        check_same_dtype(
            "SmoothL1LossGrad",
            &[("prediction", prediction.dtype()), ("dout", dout.dtype())],
            FLOAT_TYPES,
        )?;
        if self.reduction == Reduction::None {
            check_same_shape(
                "SmoothL1LossGrad",
                ("prediction", prediction.shape()),
                ("dout", dout.shape()),
            )?;
        }
        Ok(InferOutput::single(shaped_like(prediction, prediction.dtype())?))
    }
}

impl_operator!(
    SmoothL1LossGrad,
    ["prediction", "target", "dout"] -> ["output"],
    full,
    attrs = |op| smooth_l1_attrs(op.beta, op.reduction)
);

/// Binary cross entropy on logits with per-element and positive-class
/// weights. The weights must broadcast to the shape of `logits`.
#[derive(Clone, Debug, Default)]
pub struct BCEWithLogitsLoss {
    pub reduction: Reduction,
}

impl BCEWithLogitsLoss {
    pub fn new(reduction: &str) -> Result<BCEWithLogitsLoss, ConfigError> {
        Ok(BCEWithLogitsLoss {
            reduction: Reduction::parse("BCEWithLogitsLoss", reduction, BASIC_REDUCTIONS)?,
        })
    }
}

impl InferTypes for BCEWithLogitsLoss {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let op = "BCEWithLogitsLoss";
        let [logits, label, weight, pos_weight] = inputs else {
            return Err(InferError::shape(op, "expected 4 inputs"));
        };
        check_operands(op, ("logits", logits), ("label", label))?;
        check_same_dtype(
            op,
            &[
                ("logits", logits.dtype()),
                ("weight", weight.dtype()),
                ("pos_weight", pos_weight.dtype()),
            ],
            FLOAT_TYPES,
        )?;
        for (name, w) in [("weight", weight), ("pos_weight", pos_weight)] {
            let broadcast = broadcast_shapes(op, logits.shape(), w.shape())?;
            if !shapes_compatible(&broadcast, logits.shape()) {
                return Err(InferError::shape(
                    op,
                    format!(
                        "the shape of '{}' {} must broadcast to the shape of 'logits' {}",
                        name,
                        w.shape(),
                        logits.shape()
                    ),
                ));
            }
        }
        Ok(InferOutput::single(loss_output(logits, self.reduction)?))
    }
}

impl_operator!(
    BCEWithLogitsLoss,
    ["logits", "label", "weight", "pos_weight"] -> ["output"],
    full,
    attrs = |op| op.reduction.attrs()
);

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{BCEWithLogitsLoss, KLDivLoss, KLDivLossGrad, Reduction, SmoothL1Loss};
    use crate::dtype::DataType;
    use crate::error::{ConfigError, InferError};
    use crate::operator::OperatorExt;
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;

    #[test]
    fn test_kl_div_loss_reductions() {
        #[derive(Debug)]
        struct Case {
            reduction: &'static str,
            expected: Shape,
        }

        let cases = [
            Case {
                reduction: "none",
                expected: shape!(4, 3),
            },
            Case {
                reduction: "mean",
                expected: Shape::scalar(),
            },
            Case {
                reduction: "sum",
                expected: Shape::scalar(),
            },
            Case {
                reduction: "batchmean",
                expected: Shape::scalar(),
            },
        ];

        cases.test_each(|case| {
            let x = TensorType::tensor(DataType::Float32, shape!(4, 3));
            let op = KLDivLoss::new(case.reduction).unwrap();
            let out = op.infer_simple(&[x.clone(), x.clone()]).unwrap();
            assert_eq!(out[0].shape(), &case.expected);
        });
    }

    #[test]
    fn test_loss_operand_checks() {
        let x = TensorType::tensor(DataType::Float32, shape!(4, 3));
        let y = TensorType::tensor(DataType::Float32, shape!(4, 2));
        assert!(matches!(
            KLDivLoss::default().infer_simple(&[x.clone(), y]),
            Err(InferError::Shape { .. })
        ));
        let y = TensorType::tensor(DataType::Float16, shape!(4, 3));
        assert!(matches!(
            SmoothL1Loss::default().infer_simple(&[x.clone(), y]),
            Err(InferError::Dtype { .. })
        ));

        let grads = TensorType::tensor(DataType::Float32, Shape::scalar());
        let out = KLDivLossGrad::new("mean")
            .unwrap()
            .infer_simple(&[grads, x.clone(), x])
            .unwrap();
        assert_eq!(out[0].shape(), &shape!(4, 3));
    }

    #[test]
    fn test_reduction_sets() {
        assert_eq!(KLDivLoss::new("batchmean").unwrap().reduction, Reduction::BatchMean);
        assert!(matches!(
            SmoothL1Loss::new(1.0, "batchmean"),
            Err(ConfigError::NotInSet { .. })
        ));
        assert!(matches!(
            SmoothL1Loss::new(0.0, "none"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(BCEWithLogitsLoss::new("Mean").is_err());
    }

    #[test]
    fn test_bce_with_logits_loss() {
        let logits = TensorType::tensor(DataType::Float32, shape!(2, 3));
        let weight = TensorType::tensor(DataType::Float32, shape!(3));
        let op = BCEWithLogitsLoss::new("none").unwrap();
        let out = op
            .infer_simple(&[logits.clone(), logits.clone(), weight.clone(), weight.clone()])
            .unwrap();
        assert_eq!(out[0].shape(), &shape!(2, 3));

        let out = BCEWithLogitsLoss::new("sum")
            .unwrap()
            .infer_simple(&[logits.clone(), logits.clone(), weight.clone(), weight.clone()])
            .unwrap();
        assert_eq!(out[0].shape(), &Shape::scalar());

        // Weight broadcasts beyond the logits shape.
        let big = TensorType::tensor(DataType::Float32, shape!(5, 2, 3));
        assert!(op.infer_simple(&[logits.clone(), logits, big, weight]).is_err());
    }
}
