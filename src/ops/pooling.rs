use crate::attrs::{AttrValue, Attributes};
use crate::context::{InferContext, TargetPlatform};
use crate::dtype::{DataType, FLOAT_TYPES, INDEX_TYPES, ValueType};
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, Inference, Operator, impl_operator};
use crate::ops::{carry_bounds, check_rank, check_same_dtype, check_tensor_dtype, dims_compatible};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;
use crate::validator::{check_int_or_pair, check_int_or_tuple, check_positive_int, check_string};

/// Memory layout of a 4D image tensor.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DataFormat {
    #[default]
    NCHW,
    NHWC,
}

impl DataFormat {
    pub fn parse(op: &str, value: &str) -> Result<DataFormat, ConfigError> {
        match check_string(op, "data_format", value, &["NCHW", "NHWC"], false)?.as_str() {
            "NHWC" => Ok(DataFormat::NHWC),
            _ => Ok(DataFormat::NCHW),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DataFormat::NCHW => "NCHW",
            DataFormat::NHWC => "NHWC",
        }
    }

    /// Return the height and width axes of a 4D tensor.
    fn spatial_axes(self) -> [usize; 2] {
        match self {
            DataFormat::NCHW => [2, 3],
            DataFormat::NHWC => [1, 2],
        }
    }
}

/// Padding strategy of a sliding window.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PoolPadMode {
    /// No padding. Windows which do not fit are dropped.
    #[default]
    Valid,

    /// Pad so that the output size is `ceil(input / stride)`.
    Same,
}

impl PoolPadMode {
    pub fn parse(op: &str, value: &str) -> Result<PoolPadMode, ConfigError> {
        match check_string(op, "pad_mode", value, &["VALID", "SAME"], true)?.as_str() {
            "SAME" => Ok(PoolPadMode::Same),
            _ => Ok(PoolPadMode::Valid),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PoolPadMode::Valid => "VALID",
            PoolPadMode::Same => "SAME",
        }
    }
}

/// Return the output size of a window of size `kernel` sliding over `size`
/// elements with `stride`.
fn pooled_size(size: usize, kernel: usize, stride: usize, pad_mode: PoolPadMode) -> Option<usize> {
    match pad_mode {
        PoolPadMode::Valid => size.checked_sub(kernel).map(|n| n / stride + 1),
        PoolPadMode::Same => Some(size.div_ceil(stride)),
    }
}

/// Shared inference of the 2D window pooling operators.
fn infer_pool2d(
    op: &str,
    kernel_size: [usize; 2],
    strides: [usize; 2],
    pad_mode: PoolPadMode,
    data_format: DataFormat,
    inputs: &[TensorType],
    ctx: &InferContext,
) -> Result<InferOutput, InferError> {
    let [x] = inputs else {
        return Err(InferError::shape(op, "expected 1 input"));
    };
    if data_format == DataFormat::NHWC && ctx.target != TargetPlatform::Gpu {
        return Err(InferError::Platform {
            op: op.to_string(),
            message: format!(
                "the 'NHWC' data format is only supported on GPU, but the target is {}",
                ctx.target
            ),
        });
    }
    check_tensor_dtype(op, "x", x.dtype(), FLOAT_TYPES)?;
    check_rank(op, "x", x.shape(), &[4])?;
    let Some(dims) = x.shape().dims() else {
        return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::unknown_dims(4))));
    };

    let axes = data_format.spatial_axes();
    let mut out_dims = dims.to_vec();
    for (i, axis) in axes.into_iter().enumerate() {
        if let Dim::Known(size) = dims[axis] {
            let pooled = pooled_size(size, kernel_size[i], strides[i], pad_mode).ok_or_else(|| {
                InferError::shape(
                    op,
                    format!(
                        "the kernel size {:?} is larger than the input {}",
                        kernel_size,
                        x.shape()
                    ),
                )
            })?;
            out_dims[axis] = Dim::Known(pooled);
        }
    }

    let output = TensorType::new(x.dtype(), Shape::new(out_dims));
    let output = carry_bounds(x, output, |bounds| {
        let mut out = bounds.to_vec();
        for (i, axis) in axes.into_iter().enumerate() {
            let size = bounds[axis].max(kernel_size[i]);
            out[axis] = pooled_size(size, kernel_size[i], strides[i], pad_mode).unwrap_or(1);
        }
        out
    })?;
    Ok(InferOutput::single(output))
}

macro_rules! pool2d_op {
    ($op:ident) => {
        #[derive(Clone, Debug)]
        pub struct $op {
            pub kernel_size: [usize; 2],
            pub strides: [usize; 2],
            pub pad_mode: PoolPadMode,
            pub data_format: DataFormat,
        }

        impl $op {
            pub fn new(
                kernel_size: impl Into<AttrValue>,
                strides: impl Into<AttrValue>,
                pad_mode: &str,
                data_format: &str,
            ) -> Result<$op, ConfigError> {
                let op = stringify!($op);
                Ok($op {
                    kernel_size: check_int_or_pair(op, "kernel_size", &kernel_size.into())?,
                    strides: check_int_or_pair(op, "strides", &strides.into())?,
                    pad_mode: PoolPadMode::parse(op, pad_mode)?,
                    data_format: DataFormat::parse(op, data_format)?,
                })
            }
        }

        impl Default for $op {
            fn default() -> Self {
                $op {
                    kernel_size: [1, 1],
                    strides: [1, 1],
                    pad_mode: PoolPadMode::Valid,
                    data_format: DataFormat::NCHW,
                }
            }
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_pool2d(
                    stringify!($op),
                    self.kernel_size,
                    self.strides,
                    self.pad_mode,
                    self.data_format,
                    inputs,
                    ctx,
                )
            }
        }

        impl_operator!(
            $op,
            ["x"] -> ["output"],
            full,
            attrs = |op| Attributes::from([
                ("kernel_size", AttrValue::Ints(op.kernel_size.map(|k| k as i64).to_vec())),
                ("strides", AttrValue::Ints(op.strides.map(|s| s as i64).to_vec())),
                ("pad_mode", AttrValue::Str(op.pad_mode.name().into())),
                ("data_format", AttrValue::Str(op.data_format.name().into())),
            ])
        );
    };
}

pool2d_op!(MaxPool);
pool2d_op!(AvgPool);

/// Validate an adaptive pooling output size. `None` keeps the input size.
fn check_output_size(op: &str, output_size: [Option<i64>; 2]) -> Result<[Option<usize>; 2], ConfigError> {
    let mut out = [None; 2];
    for (o, size) in out.iter_mut().zip(output_size) {
        *o = size
            .map(|s| check_positive_int(op, "output_size", s))
            .transpose()?;
    }
    Ok(out)
}

fn output_size_attr(output_size: [Option<usize>; 2]) -> AttrValue {
    AttrValue::Ints(
        output_size
            .map(|s| s.map(|s| s as i64).unwrap_or(-1))
            .to_vec(),
    )
}

/// Replace the last two dims of a rank 3 or 4 input with an adaptive output
/// size.
fn adaptive_output_shape(
    op: &str,
    x: &TensorType,
    output_size: [Option<usize>; 2],
) -> Result<Shape, InferError> {
    check_tensor_dtype(op, "x", x.dtype(), FLOAT_TYPES)?;
    check_rank(op, "x", x.shape(), &[3, 4])?;
    let Some(dims) = x.shape().dims() else {
        return Ok(Shape::UnknownRank);
    };
    let ndim = dims.len();
    let mut out_dims = dims.to_vec();
    for (i, size) in output_size.into_iter().enumerate() {
        if let Some(size) = size {
            out_dims[ndim - 2 + i] = Dim::Known(size);
        }
    }
    Ok(Shape::new(out_dims))
}

/// Average pooling to a fixed output size.
#[derive(Clone, Debug, Default)]
pub struct AdaptiveAvgPool2D {
    pub output_size: [Option<usize>; 2],
}

impl AdaptiveAvgPool2D {
    pub fn new(output_size: [Option<i64>; 2]) -> Result<AdaptiveAvgPool2D, ConfigError> {
        Ok(AdaptiveAvgPool2D {
            output_size: check_output_size("AdaptiveAvgPool2D", output_size)?,
        })
    }
}

impl InferTypes for AdaptiveAvgPool2D {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("AdaptiveAvgPool2D", "expected 1 input"));
        };
        let shape = adaptive_output_shape("AdaptiveAvgPool2D", x, self.output_size)?;
        Ok(InferOutput::single(TensorType::new(x.dtype(), shape)))
    }
}

impl_operator!(
    AdaptiveAvgPool2D,
    ["input_x"] -> ["output"],
    full,
    attrs = |op| Attributes::from([("output_size", output_size_attr(op.output_size))])
);

/// Max pooling to a fixed output size, optionally returning the argmax
/// indices.
#[derive(Clone, Debug, Default)]
pub struct AdaptiveMaxPool2D {
    pub output_size: [Option<usize>; 2],
    pub return_indices: bool,
}

impl AdaptiveMaxPool2D {
    pub fn new(output_size: [Option<i64>; 2], return_indices: bool) -> Result<AdaptiveMaxPool2D, ConfigError> {
        Ok(AdaptiveMaxPool2D {
            output_size: check_output_size("AdaptiveMaxPool2D", output_size)?,
            return_indices,
        })
    }
}

impl InferTypes for AdaptiveMaxPool2D {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x] = inputs else {
            return Err(InferError::shape("AdaptiveMaxPool2D", "expected 1 input"));
        };
        let shape = adaptive_output_shape("AdaptiveMaxPool2D", x, self.output_size)?;
        let mut outputs = vec![TensorType::new(x.dtype(), shape.clone())];
        if self.return_indices {
            outputs.push(TensorType::new(ValueType::Tensor(DataType::Int64), shape));
        }
        Ok(InferOutput::new(outputs))
    }
}

impl Operator for AdaptiveMaxPool2D {
    fn name(&self) -> &str {
        "AdaptiveMaxPool2D"
    }

    fn input_names(&self) -> &'static [&'static str] {
        &["input_x"]
    }

    fn output_names(&self) -> &'static [&'static str] {
        if self.return_indices {
            &["output", "argmax"]
        } else {
            &["output"]
        }
    }

    fn attrs(&self) -> Attributes {
        Attributes::from([
            ("output_size", output_size_attr(self.output_size)),
            ("return_indices", AttrValue::Bool(self.return_indices)),
        ])
    }

    fn inference(&self) -> Inference<'_> {
        Inference::Full(self)
    }
}

/// 3D adaptive max pooling. The output size is a runtime tensor, so the
/// output shape is only known after execution.
#[derive(Clone, Debug, Default)]
pub struct AdaptiveMaxPool3D {}

impl_operator!(AdaptiveMaxPool3D, ["x", "output_size"] -> ["y", "argmax"], native);

/// 3D max pooling over an NCDHW tensor returning values and argmax indices.
#[derive(Clone, Debug)]
pub struct MaxPool3DWithArgmax {
    pub ksize: [usize; 3],
    pub strides: [usize; 3],
    pub pads: [usize; 3],
    pub dilation: [usize; 3],
    pub ceil_mode: bool,
    pub argmax_type: DataType,
}

impl MaxPool3DWithArgmax {
    pub fn new(
        ksize: impl Into<AttrValue>,
        strides: impl Into<AttrValue>,
        pads: impl Into<AttrValue>,
        dilation: impl Into<AttrValue>,
        ceil_mode: bool,
        argmax_type: DataType,
    ) -> Result<MaxPool3DWithArgmax, ConfigError> {
        let op = "MaxPool3DWithArgmax";
        if !INDEX_TYPES.contains(&argmax_type) {
            return Err(ConfigError::NotInSet {
                op: op.into(),
                attr: "argmax_type".into(),
                allowed: "int32, int64".into(),
                got: argmax_type.to_string(),
            });
        }
        Ok(MaxPool3DWithArgmax {
            ksize: check_int_or_tuple(op, "ksize", &ksize.into(), 1)?,
            strides: check_int_or_tuple(op, "strides", &strides.into(), 1)?,
            pads: check_int_or_tuple(op, "pads", &pads.into(), 0)?,
            dilation: check_int_or_tuple(op, "dilation", &dilation.into(), 1)?,
            ceil_mode,
            argmax_type,
        })
    }

    /// Return the output size of spatial axis `i` for an input of `size`.
    fn pooled_size(&self, i: usize, size: usize) -> Option<usize> {
        let (k, s, p, d) = (self.ksize[i], self.strides[i], self.pads[i], self.dilation[i]);
        let span = (size + 2 * p).checked_sub(d * (k - 1) + 1)?;
        let mut out = if self.ceil_mode {
            span.div_ceil(s) + 1
        } else {
            span / s + 1
        };
        // The last window must start inside the input or left padding.
        if self.ceil_mode && (out - 1) * s >= size + p {
            out -= 1;
        }
        Some(out)
    }
}

impl InferTypes for MaxPool3DWithArgmax {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let op = "MaxPool3DWithArgmax";
        let [x] = inputs else {
            return Err(InferError::shape(op, "expected 1 input"));
        };
        check_tensor_dtype(op, "x", x.dtype(), FLOAT_TYPES)?;
        check_rank(op, "x", x.shape(), &[5])?;

        let shape = match x.shape().dims() {
            Some(dims) => {
                let mut out_dims = dims.to_vec();
                for i in 0..3 {
                    if let Dim::Known(size) = dims[2 + i] {
                        let pooled = self.pooled_size(i, size).ok_or_else(|| {
                            InferError::shape(
                                op,
                                format!(
                                    "the window {:?} with dilation {:?} does not fit the input {}",
                                    self.ksize,
                                    self.dilation,
                                    x.shape()
                                ),
                            )
                        })?;
                        out_dims[2 + i] = Dim::Known(pooled);
                    }
                }
                Shape::new(out_dims)
            }
            None => Shape::unknown_dims(5),
        };
        Ok(InferOutput::new(vec![
            TensorType::new(x.dtype(), shape.clone()),
            TensorType::new(ValueType::Tensor(self.argmax_type), shape),
        ]))
    }
}

impl_operator!(
    MaxPool3DWithArgmax,
    ["x"] -> ["output", "argmax"],
    full,
    attrs = |op| {
        let ints = |xs: [usize; 3]| AttrValue::Ints(xs.map(|x| x as i64).to_vec());
        Attributes::from([
            ("ksize", ints(op.ksize)),
            ("strides", ints(op.strides)),
            ("pads", ints(op.pads)),
            ("dilation", ints(op.dilation)),
            ("ceil_mode", AttrValue::Bool(op.ceil_mode)),
            ("argmax_type", AttrValue::Type(op.argmax_type)),
        ])
    }
);

/// Sample the input patches of a deformable convolution.
///
/// `offsets` has `deformable_groups * 3 * kh * kw` channels holding the x
/// and y offsets and the modulation mask of every kernel position, for each
/// output position. The output expands every output position into a
/// `kh x kw` patch, giving shape `(N, C, out_h * kh, out_w * kw)`.
#[derive(Clone, Debug)]
pub struct DeformableOffsets {
    /// Strides of the height and width axes.
    pub strides: [usize; 2],
    /// Padding as `[top, bottom, left, right]`.
    pub pads: [usize; 4],
    pub kernel_size: [usize; 2],
    /// Dilation of the height and width axes.
    pub dilations: [usize; 2],
    pub deformable_groups: usize,
}

impl DeformableOffsets {
    /// Create the operator from NCHW `strides` and `dilations` tuples of
    /// length 4, whose batch and channel entries must be 1.
    pub fn new(
        strides: impl Into<AttrValue>,
        pads: impl Into<AttrValue>,
        kernel_size: impl Into<AttrValue>,
        dilations: impl Into<AttrValue>,
        data_format: &str,
        deformable_groups: i64,
        modulated: bool,
    ) -> Result<DeformableOffsets, ConfigError> {
        let op = "DeformableOffsets";
        check_string(op, "data_format", data_format, &["NCHW"], false)?;
        if !modulated {
            return Err(ConfigError::OutOfRange {
                op: op.into(),
                attr: "modulated".into(),
                requirement: "true".into(),
                got: "false".into(),
            });
        }
        let spatial = |attr: &str, value: AttrValue| -> Result<[usize; 2], ConfigError> {
            match check_int_or_tuple::<4>(op, attr, &value, 1)? {
                [1, 1, h, w] => Ok([h, w]),
                values => Err(ConfigError::OutOfRange {
                    op: op.into(),
                    attr: attr.into(),
                    requirement: "1 for the N and C axes".into(),
                    got: format!("{:?}", values),
                }),
            }
        };
        Ok(DeformableOffsets {
            strides: spatial("strides", strides.into())?,
            pads: check_int_or_tuple(op, "pads", &pads.into(), 0)?,
            kernel_size: check_int_or_pair(op, "kernel_size", &kernel_size.into())?,
            dilations: spatial("dilations", dilations.into())?,
            deformable_groups: check_positive_int(op, "deformable_groups", deformable_groups)?,
        })
    }

    /// Return the number of output positions along spatial axis `i` of
    /// `size` elements.
    fn out_size(&self, i: usize, size: usize) -> Option<usize> {
        let (k, s, d) = (self.kernel_size[i], self.strides[i], self.dilations[i]);
        let padded = size + self.pads[2 * i] + self.pads[2 * i + 1];
        padded.checked_sub(d * (k - 1) + 1).map(|n| n / s + 1)
    }
}

impl Default for DeformableOffsets {
    fn default() -> Self {
        DeformableOffsets {
            strides: [1, 1],
            pads: [0; 4],
            kernel_size: [1, 1],
            dilations: [1, 1],
            deformable_groups: 1,
        }
    }
}

impl InferTypes for DeformableOffsets {
    fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
        let op = "DeformableOffsets";
        let [x, offsets] = inputs else {
            return Err(InferError::shape(op, "expected 2 inputs"));
        };
        check_same_dtype(op, &[("x", x.dtype()), ("offsets", offsets.dtype())], FLOAT_TYPES)?;
        check_rank(op, "x", x.shape(), &[4])?;
        check_rank(op, "offsets", offsets.shape(), &[4])?;

        let dims_or_unknown = |t: &TensorType| {
            t.shape()
                .dims()
                .map(|d| d.to_vec())
                .unwrap_or_else(|| vec![Dim::Unknown; 4])
        };
        let x_dims = dims_or_unknown(x);
        let offset_dims = dims_or_unknown(offsets);
        let [kh, kw] = self.kernel_size;

        if let Dim::Known(channels) = x_dims[1]
            && channels % self.deformable_groups != 0
        {
            return Err(InferError::shape(
                op,
                format!(
                    "the channels of 'x' {} must be divisible by 'deformable_groups' {}",
                    x.shape(),
                    self.deformable_groups
                ),
            ));
        }
        let offset_channels = Dim::Known(self.deformable_groups * 3 * kh * kw);
        if !dims_compatible(offset_dims[1], offset_channels) || !dims_compatible(x_dims[0], offset_dims[0]) {
            return Err(InferError::shape(
                op,
                format!(
                    "the 'offsets' must have shape ({}, {}, out_h, out_w) for 'x' {}, but got {}",
                    x_dims[0],
                    offset_channels,
                    x.shape(),
                    offsets.shape()
                ),
            ));
        }

        // Output positions come from the input size, or from the offsets if
        // the input size is unknown.
        let mut positions = [Dim::Unknown; 2];
        for i in 0..2 {
            let pos = match x_dims[2 + i] {
                Dim::Known(size) => Dim::Known(self.out_size(i, size).ok_or_else(|| {
                    InferError::shape(
                        op,
                        format!(
                            "the kernel {:?} with dilations {:?} does not fit the input {}",
                            self.kernel_size,
                            self.dilations,
                            x.shape()
                        ),
                    )
                })?),
                Dim::Unknown => offset_dims[2 + i],
            };
            if !dims_compatible(pos, offset_dims[2 + i]) {
                return Err(InferError::shape(
                    op,
                    format!(
                        "the spatial size of 'offsets' {} does not match {} output positions",
                        offsets.shape(),
                        pos
                    ),
                ));
            }
            positions[i] = pos;
        }

        let batch = match x_dims[0] {
            Dim::Unknown => offset_dims[0],
            n => n,
        };
        let expand = |pos: Dim, k: usize| match pos {
            Dim::Known(n) => Dim::Known(n * k),
            Dim::Unknown => Dim::Unknown,
        };
        let shape = Shape::new([
            batch,
            x_dims[1],
            expand(positions[0], kh),
            expand(positions[1], kw),
        ]);
        Ok(InferOutput::single(TensorType::new(x.dtype(), shape)))
    }
}

impl_operator!(
    DeformableOffsets,
    ["x", "offsets"] -> ["y"],
    full,
    attrs = |op| {
        let nchw = |[h, w]: [usize; 2]| AttrValue::Ints(vec![1, 1, h as i64, w as i64]);
        Attributes::from([
            ("strides", nchw(op.strides)),
            ("pads", AttrValue::Ints(op.pads.map(|p| p as i64).to_vec())),
            ("kernel_size", AttrValue::Ints(op.kernel_size.map(|k| k as i64).to_vec())),
            ("dilations", nchw(op.dilations)),
            ("data_format", AttrValue::Str("NCHW".into())),
            ("deformable_groups", AttrValue::Int(op.deformable_groups as i64)),
            ("modulated", AttrValue::Bool(true)),
        ])
    }
);

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::{
        AdaptiveAvgPool2D, AdaptiveMaxPool2D, AdaptiveMaxPool3D, AvgPool, DeformableOffsets,
        MaxPool, MaxPool3DWithArgmax,
    };
    use crate::attrs::AttrValue;
    use crate::context::{InferContext, TargetPlatform};
    use crate::dtype::{DataType, ValueType};
    use crate::error::{ConfigError, InferError};
    use crate::operator::{Operator, OperatorExt, infer_operator};
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;

    #[test]
    fn test_max_pool() {
        #[derive(Debug)]
        struct Case {
            kernel: i64,
            stride: i64,
            pad_mode: &'static str,
            input: Shape,
            expected: Option<Shape>,
        }

        let cases = [
            Case {
                kernel: 2,
                stride: 2,
                pad_mode: "valid",
                input: shape!(1, 3, 8, 8),
                expected: Some(shape!(1, 3, 4, 4)),
            },
            Case {
                kernel: 3,
                stride: 2,
                pad_mode: "VALID",
                input: shape!(1, 3, 8, 7),
                expected: Some(shape!(1, 3, 3, 3)),
            },
            Case {
                kernel: 3,
                stride: 2,
                pad_mode: "same",
                input: shape!(1, 3, 8, 7),
                expected: Some(shape!(1, 3, 4, 4)),
            },
            Case {
                kernel: 3,
                stride: 1,
                pad_mode: "valid",
                input: shape!(1, 3, -1, 2),
                expected: None,
            },
            Case {
                kernel: 2,
                stride: 1,
                pad_mode: "valid",
                input: shape!(1, 3, -1, 4),
                expected: Some(shape!(1, 3, -1, 3)),
            },
        ];

        cases.test_each(|case| {
            let op = MaxPool::new(case.kernel, case.stride, case.pad_mode, "NCHW").unwrap();
            let x = TensorType::tensor(DataType::Float32, case.input.clone());
            let result = op.infer_simple(&[x]);
            match &case.expected {
                Some(expected) => assert_eq!(result.unwrap()[0].shape(), expected),
                None => assert!(matches!(result, Err(InferError::Shape { .. }))),
            }
        });
    }

    #[test]
    fn test_max_pool_invalid_attrs() {
        assert!(matches!(
            MaxPool::new(1_i64, 1_i64, "bogus", "NCHW"),
            Err(ConfigError::NotInSet { .. })
        ));
        assert!(matches!(
            MaxPool::new(0_i64, 1_i64, "valid", "NCHW"),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            MaxPool::new("2", 1_i64, "valid", "NCHW"),
            Err(ConfigError::InvalidType { .. })
        ));
        assert!(MaxPool::new(1_i64, 1_i64, "valid", "NCDHW").is_err());
    }

    #[test]
    fn test_pool_nhwc_requires_gpu() {
        let op = AvgPool::new(vec![2_i64, 2], 2_i64, "valid", "NHWC").unwrap();
        let x = TensorType::tensor(DataType::Float32, shape!(1, 8, 8, 3));

        let result = op.infer_simple(&[x.clone()]);
        assert!(matches!(result, Err(InferError::Platform { .. })));

        let ctx = InferContext::for_target(TargetPlatform::Gpu);
        let out = op.infer_with(&[x], &ctx).unwrap();
        assert_eq!(out[0].shape(), &shape!(1, 4, 4, 3));
    }

    #[test]
    fn test_adaptive_pool_2d() {
        let x = TensorType::tensor(DataType::Float32, shape!(2, 3, 9, 9));
        let op = AdaptiveAvgPool2D::new([Some(3), None]).unwrap();
        assert_eq!(op.infer_simple(&[x.clone()]).unwrap()[0].shape(), &shape!(2, 3, 3, 9));

        let op = AdaptiveMaxPool2D::new([Some(2), Some(2)], true).unwrap();
        assert_eq!(op.output_names(), &["output", "argmax"]);
        let out = op.infer_simple(&[x.clone()]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].dtype(), ValueType::Tensor(DataType::Int64));
        assert_eq!(out[1].shape(), &shape!(2, 3, 2, 2));

        let op = AdaptiveMaxPool2D::new([Some(2), Some(2)], false).unwrap();
        assert_eq!(op.infer_simple(&[x]).unwrap().len(), 1);

        assert!(AdaptiveAvgPool2D::new([Some(0), None]).is_err());
        let x = TensorType::tensor(DataType::Float32, shape!(9, 9));
        assert!(AdaptiveAvgPool2D::default().infer_simple(&[x]).is_err());
    }

    #[test]
    fn test_adaptive_max_pool_3d_is_native() {
        let x = TensorType::tensor(DataType::Float32, shape!(1, 2, 4, 4, 4));
        let size = TensorType::const_ints(&[3], vec![2, 2, 2]);
        let result = infer_operator(&AdaptiveMaxPool3D {}, &[x, size], &InferContext::default());
        assert_eq!(result, Ok(None));
    }

    #[test]
    fn test_max_pool_3d_with_argmax() {
        let x = TensorType::tensor(DataType::Float32, shape!(1, 2, 8, 8, 8));
        let op = MaxPool3DWithArgmax::new(2_i64, 2_i64, 0_i64, 1_i64, false, DataType::Int64).unwrap();
        let out = op.infer_simple(&[x.clone()]).unwrap();
        assert_eq!(out[0].shape(), &shape!(1, 2, 4, 4, 4));
        assert_eq!(out[1].dtype(), ValueType::Tensor(DataType::Int64));

        // Ceil mode keeps a partial last window.
        let x = TensorType::tensor(DataType::Float32, shape!(1, 2, 7, 7, 7));
        let op = MaxPool3DWithArgmax::new(2_i64, 2_i64, 0_i64, 1_i64, true, DataType::Int32).unwrap();
        assert_eq!(op.infer_simple(&[x.clone()]).unwrap()[0].shape(), &shape!(1, 2, 4, 4, 4));
        let op = MaxPool3DWithArgmax::new(2_i64, 2_i64, 0_i64, 1_i64, false, DataType::Int32).unwrap();
        assert_eq!(op.infer_simple(&[x]).unwrap()[0].shape(), &shape!(1, 2, 3, 3, 3));

        assert!(MaxPool3DWithArgmax::new(2_i64, 2_i64, -1_i64, 1_i64, false, DataType::Int32).is_err());
        assert!(MaxPool3DWithArgmax::new(
            AttrValue::Ints(vec![2, 2]),
            2_i64,
            0_i64,
            1_i64,
            false,
            DataType::Int32
        )
        .is_err());
        assert!(MaxPool3DWithArgmax::new(2_i64, 2_i64, 0_i64, 1_i64, false, DataType::Float32).is_err());
    }

    #[test]
    fn test_deformable_offsets() {
        #[derive(Debug)]
        struct Case {
            strides: Vec<i64>,
            pads: Vec<i64>,
            kernel: i64,
            groups: i64,
            x: Shape,
            offsets: Shape,
            expected: Option<Shape>,
        }

        let cases = [
            Case {
                strides: vec![1, 1, 1, 1],
                pads: vec![1, 1, 1, 1],
                kernel: 3,
                groups: 1,
                x: shape!(2, 4, 5, 5),
                offsets: shape!(2, 27, 5, 5),
                expected: Some(shape!(2, 4, 15, 15)),
            },
            Case {
                strides: vec![1, 1, 2, 2],
                pads: vec![0, 0, 0, 0],
                kernel: 2,
                groups: 2,
                x: shape!(1, 2, 6, 7),
                offsets: shape!(1, 24, 3, 3),
                expected: Some(shape!(1, 2, 6, 6)),
            },
            // Output positions taken from the offsets.
            Case {
                strides: vec![1, 1, 1, 1],
                pads: vec![0, 0, 0, 0],
                kernel: 2,
                groups: 1,
                x: shape!(-1, 2, -1, 6),
                offsets: shape!(3, 12, 4, 5),
                expected: Some(shape!(3, 2, 8, 10)),
            },
            // Wrong number of offset channels
            Case {
                strides: vec![1, 1, 1, 1],
                pads: vec![0, 0, 0, 0],
                kernel: 2,
                groups: 1,
                x: shape!(1, 2, 6, 6),
                offsets: shape!(1, 13, 5, 5),
                expected: None,
            },
            // Offsets do not match the output positions
            Case {
                strides: vec![1, 1, 1, 1],
                pads: vec![0, 0, 0, 0],
                kernel: 2,
                groups: 1,
                x: shape!(1, 2, 6, 6),
                offsets: shape!(1, 12, 6, 5),
                expected: None,
            },
            // Channels not divisible by the groups
            Case {
                strides: vec![1, 1, 1, 1],
                pads: vec![0, 0, 0, 0],
                kernel: 1,
                groups: 3,
                x: shape!(1, 4, 6, 6),
                offsets: shape!(1, 9, 6, 6),
                expected: None,
            },
        ];

        cases.test_each(|case| {
            let op = DeformableOffsets::new(
                case.strides.clone(),
                case.pads.clone(),
                case.kernel,
                vec![1_i64, 1, 1, 1],
                "NCHW",
                case.groups,
                true,
            )
            .unwrap();
            let x = TensorType::tensor(DataType::Float32, case.x.clone());
            let offsets = TensorType::tensor(DataType::Float32, case.offsets.clone());
            let result = op.infer_simple(&[x, offsets]);
            match &case.expected {
                Some(expected) => assert_eq!(result.unwrap()[0].shape(), expected),
                None => assert!(matches!(result, Err(InferError::Shape { .. }))),
            }
        });
    }

    #[test]
    fn test_deformable_offsets_invalid_attrs() {
        let new = |strides: Vec<i64>, format: &str, modulated: bool| {
            DeformableOffsets::new(strides, 0_i64, 3_i64, 1_i64, format, 1, modulated)
        };
        assert!(new(vec![1, 1, 2, 2], "NCHW", true).is_ok());
        assert!(matches!(
            new(vec![2, 1, 1, 1], "NCHW", true),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            new(vec![1, 1, 1, 1], "NHWC", true),
            Err(ConfigError::NotInSet { .. })
        ));
        assert!(new(vec![1, 1, 1, 1], "NCHW", false).is_err());
    }
}
