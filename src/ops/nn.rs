//! Neural network layers: bias, dropout, local response normalization,
//! padding and sampling.

use crate::attrs::{AttrValue, Attributes};
use crate::const_eval::{self, PadFill};
use crate::context::InferContext;
use crate::dtype::{DataType, FLOAT_TYPES, INDEX_TYPES, NUMBER_TYPES, REAL_TYPES, ValueType};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, Inference, Operator, impl_operator};
use crate::ops::{
    carry_bounds, check_dtype, check_rank, check_same_dtype, check_same_shape, check_tensor_dtype,
    dims_compatible, fold_value, shaped_like,
};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;
use crate::validator::{
    Interval, Rel, check_float, check_float_range, check_non_negative_int, check_string,
};
use crate::value::ConstValue;

/// Data formats accepted by [`BiasAdd`] and [`BiasAddGrad`].
const BIAS_FORMATS: &[&str] = &["NCHW", "NHWC", "NCDHW"];

/// Return the channel axis of a tensor of rank `ndim` in `data_format`.
pub(crate) fn channel_axis(data_format: &str, ndim: usize) -> usize {
    if data_format == "NHWC" {
        ndim.saturating_sub(1)
    } else {
        1
    }
}

fn check_bias_rank(op: &str, data_format: &str, shape: &Shape) -> Result<(), InferError> {
    let Some(rank) = shape.rank() else {
        return Ok(());
    };
    let ok = match data_format {
        "NCDHW" => rank == 5,
        "NHWC" => (2..=4).contains(&rank),
        _ => (2..=5).contains(&rank),
    };
    if ok {
        Ok(())
    } else {
        Err(InferError::shape(
            op,
            format!(
                "the rank of 'input_x' {} is not supported for data format {}",
                shape, data_format
            ),
        ))
    }
}

/// Add a rank-1 bias along the channel axis.
#[derive(Clone, Debug)]
pub struct BiasAdd {
    pub data_format: String,
}

impl BiasAdd {
    pub fn new(data_format: &str) -> Result<BiasAdd, ConfigError> {
        let data_format = check_string("BiasAdd", "data_format", data_format, BIAS_FORMATS, false)?;
        Ok(BiasAdd { data_format })
    }
}

impl Default for BiasAdd {
    fn default() -> Self {
        BiasAdd {
            data_format: "NCHW".into(),
        }
    }
}

impl InferTypes for BiasAdd {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, bias] = inputs else {
            return Err(InferError::shape("BiasAdd", "expected 2 inputs"));
        };
        check_tensor_dtype("BiasAdd", "input_x", x.dtype(), NUMBER_TYPES)?;
        check_same_dtype(
            "BiasAdd",
            &[("input_x", x.dtype()), ("bias", bias.dtype())],
            NUMBER_TYPES,
        )?;
        check_bias_rank("BiasAdd", &self.data_format, x.shape())?;
        check_rank("BiasAdd", "bias", bias.shape(), &[1])?;

        if let (Some(x_dims), Some([c])) = (x.shape().dims(), bias.shape().dims()) {
            let channels = x_dims[channel_axis(&self.data_format, x_dims.len())];
            if !dims_compatible(channels, *c) {
                return Err(InferError::shape(
                    "BiasAdd",
                    format!(
                        "the length of 'bias' {} must equal the channel dimension of 'input_x' {}",
                        bias.shape(),
                        x.shape()
                    ),
                ));
            }
        }
        Ok(InferOutput::single(shaped_like(x, x.dtype())?))
    }
}

impl_operator!(
    BiasAdd,
    ["input_x", "bias"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("data_format", AttrValue::Str(op.data_format.clone()))])
);

/// Gradient of [`BiasAdd`] with respect to the bias: a sum over every axis
/// except the channel axis.
#[derive(Clone, Debug)]
pub struct BiasAddGrad {
    pub data_format: String,
}

impl BiasAddGrad {
    pub fn new(data_format: &str) -> Result<BiasAddGrad, ConfigError> {
        let data_format =
            check_string("BiasAddGrad", "data_format", data_format, BIAS_FORMATS, false)?;
        Ok(BiasAddGrad { data_format })
    }
}

impl Default for BiasAddGrad {
    fn default() -> Self {
        BiasAddGrad {
            data_format: "NCHW".into(),
        }
    }
}

impl InferTypes for BiasAddGrad {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [dout] = inputs else {
            return Err(InferError::shape("BiasAddGrad", "expected 1 input"));
        };
        check_tensor_dtype("BiasAddGrad", "dout", dout.dtype(), NUMBER_TYPES)?;
        check_bias_rank("BiasAddGrad", &self.data_format, dout.shape())?;
        let channels = match dout.shape().dims() {
            Some(dims) => dims[channel_axis(&self.data_format, dims.len())],
            None => Dim::Unknown,
        };
        let output = TensorType::new(dout.dtype(), Shape::new([channels]));
        let output = carry_bounds(dout, output, |bounds| {
            vec![bounds[channel_axis(&self.data_format, bounds.len())]]
        })?;
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    BiasAddGrad,
    ["dout"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("data_format", AttrValue::Str(op.data_format.clone()))])
);

/// Shared inference of the channel dropout operators, which output the
/// dropped tensor and a boolean mask of the same shape.
fn infer_dropout(op: &str, rank: usize, inputs: &[TensorType]) -> Result<InferOutput, InferError> {
    let [x] = inputs else {
        return Err(InferError::shape(op, "expected 1 input"));
    };
    check_tensor_dtype(op, "x", x.dtype(), REAL_TYPES)?;
    check_rank(op, "x", x.shape(), &[rank])?;
    let output = shaped_like(x, x.dtype())?;
    let mask = shaped_like(x, ValueType::Tensor(DataType::Bool))?;
    Ok(InferOutput::new(vec![output, mask]))
}

macro_rules! dropout_op {
    ($op:ident, $rank:literal) => {
        #[derive(Clone, Debug)]
        pub struct $op {
            /// Probability that a channel is kept.
            pub keep_prob: f64,
        }

        impl $op {
            pub fn new(keep_prob: f64) -> Result<$op, ConfigError> {
                check_float_range(stringify!($op), "keep_prob", keep_prob, 0., 1., Interval::Closed)?;
                Ok($op { keep_prob })
            }
        }

        impl Default for $op {
            fn default() -> Self {
                $op { keep_prob: 0.5 }
            }
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_dropout(stringify!($op), $rank, inputs)
            }
        }

        impl_operator!(
            $op,
            ["x"] -> ["output", "mask"],
            full,
            attrs = |op| Attributes::from([("keep_prob", AttrValue::Float(op.keep_prob))])
        );
    };
}

dropout_op!(Dropout2D, 4);
dropout_op!(Dropout3D, 5);

/// Local response normalization across channels of an NCHW tensor.
#[derive(Clone, Debug)]
pub struct LRN {
    pub depth_radius: usize,
    pub bias: f64,
    pub alpha: f64,
    pub beta: f64,
    pub norm_region: String,
}

impl LRN {
    pub fn new(
        depth_radius: i64,
        bias: f64,
        alpha: f64,
        beta: f64,
        norm_region: &str,
    ) -> Result<LRN, ConfigError> {
        let depth_radius = check_non_negative_int("LRN", "depth_radius", depth_radius)?;
        let norm_region = check_string("LRN", "norm_region", norm_region, &["ACROSS_CHANNELS"], false)?;
        Ok(LRN {
            depth_radius,
            bias,
            alpha,
            beta,
            norm_region,
        })
    }

    fn lrn_attrs(&self) -> Attributes {
        Attributes::from([
            ("depth_radius", AttrValue::Int(self.depth_radius as i64)),
            ("bias", AttrValue::Float(self.bias)),
            ("alpha", AttrValue::Float(self.alpha)),
            ("beta", AttrValue::Float(self.beta)),
            ("norm_region", AttrValue::Str(self.norm_region.clone())),
        ])
    }
}

impl Default for LRN {
    fn default() -> Self {
        LRN {
            depth_radius: 5,
            bias: 1.0,
            alpha: 1.0,
            beta: 0.5,
            norm_region: "ACROSS_CHANNELS".into(),
        }
    }
}

impl InferTypes for LRN {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("LRN", "expected 1 input"));
        };
        check_tensor_dtype("LRN", "x", x.dtype(), FLOAT_TYPES)?;
        check_rank("LRN", "x", x.shape(), &[4])?;
        Ok(InferOutput::single(shaped_like(x, x.dtype())?))
    }
}

impl_operator!(LRN, ["x"] -> ["y"], full, attrs = |op| op.lrn_attrs());

/// Gradient of [`LRN`].
#[derive(Clone, Debug, Default)]
pub struct LRNGrad {
    pub lrn: LRN,
}

impl InferTypes for LRNGrad {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [grads, x, y] = inputs else {
            return Err(InferError::shape("LRNGrad", "expected 3 inputs"));
        };
        check_same_dtype(
            "LRNGrad",
            &[("grads", grads.dtype()), ("x", x.dtype()), ("y", y.dtype())],
            FLOAT_TYPES,
        )?;
        check_rank("LRNGrad", "grads", grads.shape(), &[4])?;
        check_same_shape("LRNGrad", ("grads", grads.shape()), ("x", x.shape()))?;
        check_same_shape("LRNGrad", ("grads", grads.shape()), ("y", y.shape()))?;
        Ok(InferOutput::single(shaped_like(grads, grads.dtype())?))
    }
}

impl_operator!(LRNGrad, ["grads", "x", "y"] -> ["output"], full, attrs = |op| op.lrn.lrn_attrs());

/// Test whether each target in `x2` is among the top `k` predictions in the
/// corresponding row of `x1`.
#[derive(Clone, Debug)]
pub struct InTopK {
    pub k: i64,
}

impl InTopK {
    pub fn new(k: i64) -> Result<InTopK, ConfigError> {
        Ok(InTopK { k })
    }
}

impl InferTypes for InTopK {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x1, x2] = inputs else {
            return Err(InferError::shape("InTopK", "expected 2 inputs"));
        };
        check_tensor_dtype("InTopK", "x1", x1.dtype(), &[DataType::Float16, DataType::Float32])?;
        check_tensor_dtype("InTopK", "x2", x2.dtype(), INDEX_TYPES)?;
        check_rank("InTopK", "x1", x1.shape(), &[2])?;
        check_rank("InTopK", "x2", x2.shape(), &[1])?;
        if let (Some(d1), Some(d2)) = (x1.shape().dims(), x2.shape().dims())
            && !dims_compatible(d1[0], d2[0])
        {
            return Err(InferError::shape(
                "InTopK",
                format!(
                    "the first dimension of 'x1' {} and 'x2' {} must be the same",
                    x1.shape(),
                    x2.shape()
                ),
            ));
        }
        Ok(InferOutput::single(shaped_like(x2, ValueType::Tensor(DataType::Bool))?))
    }
}

impl_operator!(
    InTopK,
    ["x1", "x2"] -> ["y"],
    full,
    attrs = |op| Attributes::from([("k", AttrValue::Int(op.k))])
);

/// Zero padding with a `(before, after)` amount for every axis.
#[derive(Clone, Debug, Default)]
pub struct Pad {
    pub paddings: Vec<[usize; 2]>,
}

impl Pad {
    pub fn new(paddings: &[[i64; 2]]) -> Result<Pad, ConfigError> {
        let paddings = paddings
            .iter()
            .map(|&[before, after]| {
                Ok([
                    check_non_negative_int("Pad", "paddings", before)?,
                    check_non_negative_int("Pad", "paddings", after)?,
                ])
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Pad { paddings })
    }

    fn padded(&self, bounds: &[usize]) -> Vec<usize> {
        bounds
            .iter()
            .zip(&self.paddings)
            .map(|(d, [b, e])| d + b + e)
            .collect()
    }
}

impl InferTypes for Pad {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Pad", "expected 1 input"));
        };
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(
                x.dtype(),
                Shape::unknown_dims(self.paddings.len()),
            )));
        };
        if dims.len() != self.paddings.len() {
            return Err(InferError::shape(
                "Pad",
                format!(
                    "the length of 'paddings' {} must equal the rank of 'input_x' {}",
                    self.paddings.len(),
                    x.shape()
                ),
            ));
        }
        let out_dims = dims.iter().zip(&self.paddings).map(|(d, [b, e])| match d {
            Dim::Known(d) => Dim::Known(d + b + e),
            Dim::Unknown => Dim::Unknown,
        });
        let output = TensorType::new(x.dtype(), Shape::new(out_dims));
        let output = carry_bounds(x, output, |bounds| self.padded(bounds))?;
        let output = match x.value() {
            Some(value) => fold_value("Pad", ctx, output, || {
                let pads: Vec<[i64; 2]> =
                    self.paddings.iter().map(|&[b, e]| [b as i64, e as i64]).collect();
                const_eval::pad(value, &pads, &PadFill::Constant(ConstValue::int_scalar(0)))
            })?,
            None => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    Pad,
    ["input_x"] -> ["output"],
    full,
    attrs = |op| {
        let flat: Vec<i64> = op.paddings.iter().flatten().map(|&p| p as i64).collect();
        Attributes::from([("paddings", AttrValue::Ints(flat))])
    }
);

/// Fill mode of [`PadV3`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PadMode {
    #[default]
    Constant,
    Reflect,
    Edge,
}

impl PadMode {
    pub fn name(self) -> &'static str {
        match self {
            PadMode::Constant => "constant",
            PadMode::Reflect => "reflect",
            PadMode::Edge => "edge",
        }
    }
}

/// Padding of the trailing axes with amounts given by a runtime input.
///
/// `paddings` holds `(before, after)` pairs starting from the last axis. In
/// constant mode a third input supplies the fill value.
#[derive(Clone, Debug, Default)]
pub struct PadV3 {
    pub mode: PadMode,
    pub paddings_contiguous: bool,
}

impl PadV3 {
    pub fn new(mode: &str, paddings_contiguous: bool) -> Result<PadV3, ConfigError> {
        let mode = match check_string("PadV3", "mode", mode, &["CONSTANT", "REFLECT", "EDGE"], true)?
            .as_str()
        {
            "REFLECT" => PadMode::Reflect,
            "EDGE" => PadMode::Edge,
            _ => PadMode::Constant,
        };
        Ok(PadV3 {
            mode,
            paddings_contiguous,
        })
    }

    /// Group the flat paddings into `(before, after)` pairs, pair `i`
    /// applying to axis `rank - 1 - i`.
    fn pairs(&self, paddings: &[i64]) -> Vec<[i64; 2]> {
        let n = paddings.len() / 2;
        (0..n)
            .map(|i| {
                if self.paddings_contiguous {
                    [paddings[2 * i], paddings[2 * i + 1]]
                } else {
                    [paddings[i], paddings[n + i]]
                }
            })
            .collect()
    }

    fn pad_dim(&self, dim: usize, [before, after]: [i64; 2]) -> Result<usize, InferError> {
        let d = dim as i64;
        if self.mode == PadMode::Reflect && (before >= d || after >= d) {
            return Err(InferError::shape(
                "PadV3",
                format!(
                    "in reflect mode the paddings ({}, {}) must be less than the dimension {}",
                    before, after, dim
                ),
            ));
        }
        let padded = d + before + after;
        if padded < 0 {
            return Err(InferError::shape(
                "PadV3",
                format!(
                    "the paddings ({}, {}) remove more than the dimension {}",
                    before, after, dim
                ),
            ));
        }
        Ok(padded as usize)
    }
}

impl InferTypes for PadV3 {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let (x, paddings, fill) = match (self.mode, inputs) {
            (PadMode::Constant, [x, paddings, value]) => {
                check_same_dtype("PadV3", &[("x", x.dtype()), ("constant_value", value.dtype())], NUMBER_TYPES)?;
                (x, paddings, value.value().cloned().map(PadFill::Constant))
            }
            (PadMode::Reflect, [x, paddings]) => (x, paddings, Some(PadFill::Reflect)),
            (PadMode::Edge, [x, paddings]) => (x, paddings, Some(PadFill::Edge)),
            _ => return Err(InferError::shape("PadV3", "unexpected number of inputs")),
        };
        check_tensor_dtype("PadV3", "x", x.dtype(), NUMBER_TYPES)?;
        check_dtype("PadV3", "paddings", paddings.dtype(), INDEX_TYPES)?;

        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
        };
        let Some(values) = paddings.value_i64s() else {
            return Ok(InferOutput::single(TensorType::new(
                x.dtype(),
                Shape::unknown_dims(dims.len()),
            )));
        };
        if values.len() % 2 != 0 || values.len() / 2 > dims.len() {
            return Err(InferError::shape(
                "PadV3",
                format!(
                    "the length of 'paddings' must be even and at most twice the rank of 'x' {}, but got {}",
                    x.shape(),
                    values.len()
                ),
            ));
        }

        let mut out_dims = dims.to_vec();
        let mut pads = vec![[0, 0]; dims.len()];
        for (i, pair) in self.pairs(&values).into_iter().enumerate() {
            let axis = dims.len() - 1 - i;
            pads[axis] = pair;
            if let Dim::Known(d) = dims[axis] {
                out_dims[axis] = Dim::Known(self.pad_dim(d, pair)?);
            }
        }
        let output = TensorType::new(x.dtype(), Shape::new(out_dims));
        let output = match (x.value(), fill) {
            (Some(value), Some(fill)) => {
                fold_value("PadV3", ctx, output, || const_eval::pad(value, &pads, &fill))?
            }
            _ => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl Operator for PadV3 {
    fn name(&self) -> &str {
        "PadV3"
    }

    fn input_names(&self) -> &'static [&'static str] {
        match self.mode {
            PadMode::Constant => &["x", "paddings", "constant_value"],
            PadMode::Reflect | PadMode::Edge => &["x", "paddings"],
        }
    }

    fn output_names(&self) -> &'static [&'static str] {
        &["y"]
    }

    fn attrs(&self) -> Attributes {
        Attributes::from([
            ("mode", AttrValue::Str(self.mode.name().into())),
            ("paddings_contiguous", AttrValue::Bool(self.paddings_contiguous)),
        ])
    }

    fn inference(&self) -> Inference<'_> {
        Inference::Full(self)
    }
}

/// Pairwise p-norm distance between the rows of the last two axes.
#[derive(Clone, Debug)]
pub struct Pdist {
    pub p: f64,
}

impl Pdist {
    pub fn new(p: f64) -> Result<Pdist, ConfigError> {
        check_float("Pdist", "p", p, Rel::Ge, 0.)?;
        Ok(Pdist { p })
    }
}

impl Default for Pdist {
    fn default() -> Self {
        Pdist { p: 2.0 }
    }
}

impl InferTypes for Pdist {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("Pdist", "expected 1 input"));
        };
        check_tensor_dtype("Pdist", "x", x.dtype(), FLOAT_TYPES)?;
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
        };
        if dims.len() < 2 {
            return Err(InferError::shape(
                "Pdist",
                format!("the rank of 'x' must be at least 2, but got {}", x.shape()),
            ));
        }
        let rows = dims[dims.len() - 2];
        let pairs = match rows {
            Dim::Known(n) => Dim::Known(n * n.saturating_sub(1) / 2),
            Dim::Unknown => Dim::Unknown,
        };
        let out_dims = dims[..dims.len() - 2].iter().copied().chain([pairs]);
        Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::new(out_dims))))
    }
}

impl_operator!(
    Pdist,
    ["x"] -> ["y"],
    full,
    attrs = |op| Attributes::from([("p", AttrValue::Float(op.p))])
);

/// Draw samples from a categorical distribution for each row of `logits`.
#[derive(Clone, Debug)]
pub struct RandomCategorical {
    pub dtype: DataType,
}

impl RandomCategorical {
    pub fn new(dtype: DataType) -> Result<RandomCategorical, ConfigError> {
        let valid = [DataType::Int16, DataType::Int32, DataType::Int64];
        if !valid.contains(&dtype) {
            return Err(ConfigError::NotInSet {
                op: "RandomCategorical".into(),
                attr: "dtype".into(),
                allowed: "int16, int32, int64".into(),
                got: dtype.to_string(),
            });
        }
        Ok(RandomCategorical { dtype })
    }
}

impl Default for RandomCategorical {
    fn default() -> Self {
        RandomCategorical {
            dtype: DataType::Int64,
        }
    }
}

impl InferTypes for RandomCategorical {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [logits, num_sample, seed] = inputs else {
            return Err(InferError::shape("RandomCategorical", "expected 3 inputs"));
        };
        check_tensor_dtype("RandomCategorical", "logits", logits.dtype(), FLOAT_TYPES)?;
        check_dtype("RandomCategorical", "num_sample", num_sample.dtype(), INDEX_TYPES)?;
        check_dtype("RandomCategorical", "seed", seed.dtype(), INDEX_TYPES)?;
        check_rank("RandomCategorical", "logits", logits.shape(), &[2])?;

        let samples = match num_sample.value().and_then(|v| v.to_i64_scalar()) {
            Some(n) if n <= 0 => {
                return Err(InferError::shape(
                    "RandomCategorical",
                    format!("the 'num_sample' must be positive, but got {}", n),
                ));
            }
            Some(n) => Dim::Known(n as usize),
            None => Dim::Unknown,
        };
        let batch = logits.shape().dims().map(|d| d[0]).unwrap_or(Dim::Unknown);
        let output = TensorType::new(ValueType::Tensor(self.dtype), Shape::new([batch, samples]));
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    RandomCategorical,
    ["logits", "num_sample", "seed"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("dtype", AttrValue::Type(op.dtype))])
);

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{
        BiasAdd, BiasAddGrad, Dropout2D, InTopK, LRN, Pad, PadV3, Pdist, RandomCategorical,
    };
    use crate::dtype::{DataType, ValueType};
    use crate::error::{ConfigError, InferError};
    use crate::operator::{Operator, OperatorExt};
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;
    use crate::value::ConstValue;

    #[test]
    fn test_bias_add() {
        #[derive(Debug)]
        struct Case {
            format: &'static str,
            x: Shape,
            bias: Shape,
            ok: bool,
        }

        let cases = [
            Case {
                format: "NCHW",
                x: shape!(2, 3, 4, 5),
                bias: shape!(3),
                ok: true,
            },
            Case {
                format: "NHWC",
                x: shape!(2, 4, 5, 3),
                bias: shape!(3),
                ok: true,
            },
            Case {
                format: "NCHW",
                x: shape!(2, 3, 4, 5),
                bias: shape!(5),
                ok: false,
            },
            Case {
                format: "NCDHW",
                x: shape!(2, 3, 4, 5),
                bias: shape!(3),
                ok: false,
            },
            Case {
                format: "NCHW",
                x: shape!(2, -1),
                bias: shape!(7),
                ok: true,
            },
        ];

        cases.test_each(|case| {
            let op = BiasAdd::new(case.format).unwrap();
            let x = TensorType::tensor(DataType::Float32, case.x.clone());
            let bias = TensorType::tensor(DataType::Float32, case.bias.clone());
            let result = op.infer_simple(&[x, bias]);
            if case.ok {
                assert_eq!(result.unwrap()[0].shape(), &case.x);
            } else {
                assert!(matches!(result, Err(InferError::Shape { .. })));
            }
        });

        assert!(matches!(
            BiasAdd::new("CHWN"),
            Err(ConfigError::NotInSet { .. })
        ));
    }

    #[test]
    fn test_bias_add_grad() {
        let dout = TensorType::tensor(DataType::Float32, shape!(2, 4, 5, 3));
        let out = BiasAddGrad::new("NHWC").unwrap().infer_simple(&[dout.clone()]).unwrap();
        assert_eq!(out[0].shape(), &shape!(3));
        let out = BiasAddGrad::default().infer_simple(&[dout]).unwrap();
        assert_eq!(out[0].shape(), &shape!(4));
    }

    #[test]
    fn test_dropout2d() {
        let x = TensorType::tensor(DataType::Float32, shape!(2, 3, 4, 5));
        let out = Dropout2D::new(0.8).unwrap().infer_simple(&[x]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].dtype(), ValueType::Tensor(DataType::Bool));
        assert_eq!(out[1].shape(), &shape!(2, 3, 4, 5));

        let x = TensorType::tensor(DataType::Float32, shape!(2, 3, 4));
        assert!(Dropout2D::default().infer_simple(&[x]).is_err());
        assert!(Dropout2D::new(1.5).is_err());
    }

    #[test]
    fn test_lrn() {
        let x = TensorType::tensor(DataType::Float32, shape!(1, 8, 4, 4));
        let out = LRN::default().infer_simple(&[x]).unwrap();
        assert_eq!(out[0].shape(), &shape!(1, 8, 4, 4));
        assert!(LRN::new(-1, 1., 1., 0.5, "ACROSS_CHANNELS").is_err());
        assert!(LRN::new(2, 1., 1., 0.5, "WITHIN_CHANNEL").is_err());
    }

    #[test]
    fn test_in_top_k() {
        let x1 = TensorType::tensor(DataType::Float32, shape!(4, 10));
        let x2 = TensorType::tensor(DataType::Int32, shape!(4));
        let out = InTopK::new(3).unwrap().infer_simple(&[x1.clone(), x2]).unwrap();
        assert_eq!(out[0].dtype(), ValueType::Tensor(DataType::Bool));
        assert_eq!(out[0].shape(), &shape!(4));

        let x2 = TensorType::tensor(DataType::Int32, shape!(5));
        assert!(InTopK::new(3).unwrap().infer_simple(&[x1, x2]).is_err());
    }

    #[test]
    fn test_pad() {
        let op = Pad::new(&[[1, 2], [0, 0]]).unwrap();
        let x = TensorType::tensor(DataType::Float32, shape!(3, 4));
        assert_eq!(op.infer_simple(&[x]).unwrap()[0].shape(), &shape!(6, 4));

        let x = TensorType::tensor(DataType::Float32, shape!(-1, 4))
            .with_shape_bounds(vec![1, 4], vec![8, 4])
            .unwrap();
        let out = op.infer_simple(&[x]).unwrap();
        assert_eq!(out[0].shape(), &shape!(-1, 4));
        assert_eq!(out[0].max_shape(), Some([11, 4].as_slice()));

        let x = TensorType::tensor(DataType::Float32, shape!(3));
        assert!(op.infer_simple(&[x]).is_err());
        assert!(Pad::new(&[[-1, 0]]).is_err());
    }

    #[test]
    fn test_pad_v3() {
        #[derive(Debug)]
        struct Case {
            mode: &'static str,
            contiguous: bool,
            paddings: Vec<i64>,
            expected: Option<Shape>,
        }

        let cases = [
            Case {
                mode: "constant",
                contiguous: true,
                paddings: vec![1, 2],
                expected: Some(shape!(1, 2, 4, 8)),
            },
            Case {
                mode: "constant",
                contiguous: true,
                paddings: vec![1, 2, 3, 0],
                expected: Some(shape!(1, 2, 7, 8)),
            },
            Case {
                mode: "constant",
                contiguous: false,
                paddings: vec![1, 3, 2, 0],
                expected: Some(shape!(1, 2, 7, 8)),
            },
            Case {
                mode: "reflect",
                contiguous: true,
                paddings: vec![4, 0],
                expected: Some(shape!(1, 2, 4, 9)),
            },
            Case {
                mode: "reflect",
                contiguous: true,
                paddings: vec![5, 0],
                expected: None,
            },
            Case {
                mode: "edge",
                contiguous: true,
                paddings: vec![1],
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let op = PadV3::new(case.mode, case.contiguous).unwrap();
            let x = TensorType::tensor(DataType::Float32, shape!(1, 2, 4, 5));
            let paddings = TensorType::const_ints(&[case.paddings.len()], case.paddings.clone());
            let mut inputs = vec![x, paddings];
            if op.input_names().len() == 3 {
                inputs.push(TensorType::const_float(0.));
            }
            let result = op.infer_simple(&inputs);
            match &case.expected {
                Some(expected) => assert_eq!(result.unwrap()[0].shape(), expected),
                None => assert!(matches!(result, Err(InferError::Shape { .. }))),
            }
        });
    }

    #[test]
    fn test_pad_folds_value() {
        let x = TensorType::const_ints(&[2, 2], vec![1, 2, 3, 4]);
        let out = Pad::new(&[[0, 1], [1, 0]]).unwrap().infer_simple(&[x.clone()]).unwrap();
        assert_eq!(
            out[0].value(),
            Some(&ConstValue::ints(&[3, 3], vec![0, 1, 2, 0, 3, 4, 0, 0, 0]))
        );

        #[derive(Debug)]
        struct Case {
            mode: &'static str,
            paddings: Vec<i64>,
            expected: ConstValue,
        }

        let cases = [
            Case {
                mode: "constant",
                paddings: vec![1, 0],
                expected: ConstValue::ints(&[2, 3], vec![9, 1, 2, 9, 3, 4]),
            },
            Case {
                mode: "edge",
                paddings: vec![0, 1, 1, 0],
                expected: ConstValue::ints(&[3, 3], vec![1, 2, 2, 1, 2, 2, 3, 4, 4]),
            },
            Case {
                mode: "reflect",
                paddings: vec![1, 1],
                expected: ConstValue::ints(&[2, 4], vec![2, 1, 2, 1, 4, 3, 4, 3]),
            },
            // Negative paddings crop
            Case {
                mode: "constant",
                paddings: vec![-1, 0],
                expected: ConstValue::ints(&[2, 1], vec![2, 4]),
            },
        ];

        cases.test_each(|case| {
            let op = PadV3::new(case.mode, true).unwrap();
            let n = case.paddings.len();
            let mut inputs = vec![x.clone(), TensorType::const_ints(&[n], case.paddings.clone())];
            if case.mode == "constant" {
                inputs.push(TensorType::const_int(9));
            }
            let out = op.infer_simple(&inputs).unwrap();
            assert_eq!(out[0].value(), Some(&case.expected));
        });
    }

    #[test]
    fn test_pad_v3_input_names() {
        assert_eq!(PadV3::new("CONSTANT", true).unwrap().input_names().len(), 3);
        assert_eq!(PadV3::new("reflect", true).unwrap().input_names().len(), 2);
        assert!(PadV3::new("wrap", true).is_err());
    }

    #[test]
    fn test_pdist() {
        let x = TensorType::tensor(DataType::Float32, shape!(3, 5, 4));
        let out = Pdist::default().infer_simple(&[x]).unwrap();
        assert_eq!(out[0].shape(), &shape!(3, 10));
        assert!(Pdist::new(-1.).is_err());
    }

    #[test]
    fn test_random_categorical() {
        let logits = TensorType::tensor(DataType::Float32, shape!(4, 10));
        let op = RandomCategorical::new(DataType::Int32).unwrap();
        let out = op
            .infer_simple(&[logits.clone(), TensorType::const_int(6), TensorType::const_int(0)])
            .unwrap();
        assert_eq!(out[0].shape(), &shape!(4, 6));
        assert_eq!(out[0].dtype(), ValueType::Tensor(DataType::Int32));

        assert!(op
            .infer_simple(&[logits, TensorType::const_int(0), TensorType::const_int(0)])
            .is_err());
        assert!(RandomCategorical::new(DataType::Float32).is_err());
    }
}
