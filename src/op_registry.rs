use rustc_hash::FxHashMap;

use crate::attrs::{AttrKind, AttrValue, Attributes};
use crate::dtype::DataType;
use crate::error::ConfigError;
use crate::operator::Operator;
use crate::ops;
use crate::validator::{check_len, check_non_negative_int, check_value_type};

type ReadOpFunction = dyn Fn(&AttrReader) -> Result<Box<dyn Operator>, ConfigError> + Send + Sync;

/// Registry used to construct operators from a name and attribute map, eg.
/// when a graph compiler lowers its own node representation.
///
/// New registries have no operators registered by default. To create a
/// registry with all built-in operators pre-registered, use
/// [`OpRegistry::with_all_ops`]. Alternatively create a new registry and
/// selectively register the required operators using
/// [`OpRegistry::register_op`].
#[derive(Default)]
pub struct OpRegistry {
    /// Map from operator name to construction function.
    ops: FxHashMap<&'static str, Box<ReadOpFunction>>,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> OpRegistry {
        OpRegistry {
            ops: FxHashMap::default(),
        }
    }

    /// Register the built-in implementation of an operator.
    ///
    /// ```
    /// use opshape::ops::{MaxPool, ReLU};
    /// use opshape::{AttrValue, Attributes, OpRegistry};
    ///
    /// let mut reg = OpRegistry::new();
    /// reg.register_op::<ReLU>();
    /// reg.register_op::<MaxPool>();
    ///
    /// let attrs = Attributes::new().with("kernel_size", AttrValue::Int(2));
    /// let op = reg.read_op("MaxPool", &attrs).unwrap();
    /// assert_eq!(op.name(), "MaxPool");
    /// ```
    pub fn register_op<Op: ReadOp>(&mut self) {
        self.ops.insert(Op::op_type(), Box::new(Op::read_boxed));
    }

    /// Construct an operator using the operators in the registry.
    ///
    /// Attributes which are not supplied take the operator's default value.
    pub fn read_op(&self, name: &str, attrs: &Attributes) -> Result<Box<dyn Operator>, ConfigError> {
        let read_fn = self.ops.get(name).ok_or_else(|| ConfigError::UnknownOperator {
            name: name.to_string(),
        })?;
        tracing::debug!(op = name, n_attrs = attrs.len(), "read operator");
        read_fn(&AttrReader::new(name, attrs))
    }

    /// Return the names of registered operators in sorted order.
    pub fn op_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort();
        names
    }

    /// Create a new registry with all built-in operators registered.
    pub fn with_all_ops() -> OpRegistry {
        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            ($($op:ident),* $(,)?) => {
                $(reg.register_op::<ops::$op>();)*
            };
        }

        // Activations
        register_op!(
            CeLU, Elu, FastGeLU, FastGeLUGrad, GeLU, HShrink, HShrinkGrad, HSigmoid, HSwish,
            HSwishGrad, LogSoftmax, RReLU, ReLU, ReLU6, SeLU, Sigmoid, SoftShrink, SoftShrinkGrad,
            Softmax, Softplus, SoftplusGrad, Softsign, Tanh, TanhGrad,
        );

        // Arithmetic and reductions
        register_op!(Add, ArgMax, Div, Mul, ReduceMax, ReduceMean, ReduceSum, Sub);

        // Layout, joining and slicing
        register_op!(
            BroadcastTo, Cast, Concat, ExpandDims, Rank, Reshape, ShapeOp, Size, Split, Squeeze,
            Stack, StridedSlice, Transpose, Unique,
        );

        // Generators
        register_op!(Fill, InvertPermutation, IsSubClass, Range, ScalarToArray, TupleToArray);

        // Scatter, gather and segments
        register_op!(
            Gather, GatherNd, ScatterAdd, ScatterDiv, ScatterMax, ScatterMin, ScatterMul,
            ScatterNdAdd, ScatterNdSub, ScatterNdUpdate, ScatterSub, ScatterUpdate, SegmentMax,
            SegmentMean, SegmentMin, SegmentProd, SegmentSum, UnsortedSegmentMax,
            UnsortedSegmentMin, UnsortedSegmentProd, UnsortedSegmentSum,
        );

        // Neural network layers
        register_op!(
            AdaptiveAvgPool2D, AdaptiveMaxPool2D, AdaptiveMaxPool3D, AvgPool, BiasAdd,
            BiasAddGrad, DeformableOffsets, Dropout2D, Dropout3D, InTopK, LRN, LRNGrad, MaxPool,
            MaxPool3DWithArgmax, Pad, PadV3, Pdist, RandomCategorical,
        );

        // Losses
        register_op!(BCEWithLogitsLoss, KLDivLoss, KLDivLossGrad, SmoothL1Loss, SmoothL1LossGrad);

        // Optimizers
        register_op!(
            ApplyAdaMax, ApplyAdadelta, ApplyAdagradDA, ApplyAdamWithAmsgrad, ApplyFtrl,
            ApplyPowerSign, ApplyProximalAdagrad, ApplyProximalGradientDescent,
        );

        reg
    }
}

/// Conversion of an attribute value to a Rust type.
pub trait FromAttr: Sized {
    /// Attribute kinds which can be converted.
    const KINDS: &'static [AttrKind];

    fn from_attr(value: &AttrValue) -> Option<Self>;
}

impl FromAttr for bool {
    const KINDS: &'static [AttrKind] = &[AttrKind::Bool];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Bool(x) => Some(*x),
            _ => None,
        }
    }
}

impl FromAttr for i64 {
    const KINDS: &'static [AttrKind] = &[AttrKind::Int];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Int(x) => Some(*x),
            _ => None,
        }
    }
}

impl FromAttr for f64 {
    const KINDS: &'static [AttrKind] = &[AttrKind::Float, AttrKind::Int];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Float(x) => Some(*x),
            AttrValue::Int(x) => Some(*x as f64),
            _ => None,
        }
    }
}

impl FromAttr for String {
    const KINDS: &'static [AttrKind] = &[AttrKind::Str];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Str(x) => Some(x.clone()),
            _ => None,
        }
    }
}

impl FromAttr for Vec<i64> {
    const KINDS: &'static [AttrKind] = &[AttrKind::Ints, AttrKind::Int];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Ints(x) => Some(x.clone()),
            AttrValue::Int(x) => Some(vec![*x]),
            _ => None,
        }
    }
}

impl FromAttr for DataType {
    const KINDS: &'static [AttrKind] = &[AttrKind::Type];

    fn from_attr(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Type(x) => Some(*x),
            _ => None,
        }
    }
}

/// Typed access to the attributes supplied for an operator.
pub struct AttrReader<'a> {
    op: &'a str,
    attrs: &'a Attributes,
}

impl<'a> AttrReader<'a> {
    pub fn new(op: &'a str, attrs: &'a Attributes) -> Self {
        AttrReader { op, attrs }
    }

    /// Get an optional attribute converted to `T`.
    pub fn get_as<T: FromAttr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        let Some(value) = self.attrs.get(name) else {
            return Ok(None);
        };
        check_value_type(self.op, name, value, T::KINDS)?;
        Ok(T::from_attr(value))
    }

    /// Get an attribute converted to `T`, or `default` if it is not set.
    pub fn get_or<T: FromAttr>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get_as(name)?.unwrap_or(default))
    }

    /// Get a required attribute converted to `T`.
    pub fn require<T: FromAttr>(&self, name: &str) -> Result<T, ConfigError> {
        self.get_as(name)?.ok_or_else(|| self.missing(name))
    }

    /// Get an attribute's raw value, or `default` if it is not set.
    pub fn value_or(&self, name: &str, default: AttrValue) -> AttrValue {
        self.attrs.get(name).cloned().unwrap_or(default)
    }

    /// Get a required attribute's raw value.
    pub fn require_value(&self, name: &str) -> Result<AttrValue, ConfigError> {
        self.attrs.get(name).cloned().ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> ConfigError {
        ConfigError::MissingAttr {
            op: self.op.to_string(),
            attr: name.to_string(),
        }
    }

    fn batch_rank(&self) -> Result<usize, ConfigError> {
        check_non_negative_int(self.op, "batch_rank", self.get_or("batch_rank", 0)?)
    }

    /// Read an adaptive pooling output size, where `-1` keeps the input
    /// size.
    fn output_size(&self) -> Result<[Option<i64>; 2], ConfigError> {
        let sizes: Vec<i64> = self.require("output_size")?;
        let sizes = match sizes.as_slice() {
            [size] => vec![*size; 2],
            _ => sizes,
        };
        check_len(self.op, "output_size", &sizes, 2)?;
        let size = |s: i64| (s != -1).then_some(s);
        Ok([size(sizes[0]), size(sizes[1])])
    }
}

/// Construct an operator from an attribute map.
pub trait ReadOp: Operator + Sized {
    /// Return the name under which the operator is registered.
    fn op_type() -> &'static str;

    fn read(attrs: &AttrReader) -> Result<Self, ConfigError>;

    fn read_boxed(attrs: &AttrReader) -> Result<Box<dyn Operator>, ConfigError> {
        let op = Self::read(attrs)?;
        Ok(Box::new(op))
    }
}

macro_rules! impl_read_op {
    ($op:ident as $name:expr) => {
        impl ReadOp for ops::$op {
            fn op_type() -> &'static str {
                $name
            }

            fn read(_attrs: &AttrReader) -> Result<Self, ConfigError> {
                Ok(ops::$op::default())
            }
        }
    };

    ($op:ident) => {
        impl_read_op!($op as stringify!($op));
    };

    ($op:ident, $read:expr) => {
        impl ReadOp for ops::$op {
            fn op_type() -> &'static str {
                stringify!($op)
            }

            fn read(attrs: &AttrReader) -> Result<Self, ConfigError> {
                $read(attrs)
            }
        }
    };
}

macro_rules! impl_read_default_ops {
    ($($op:ident),* $(,)?) => {
        $(impl_read_op!($op);)*
    };
}

impl_read_default_ops!(
    ReLU, ReLU6, SeLU, HSigmoid, HSwish, Softplus, Softsign, GeLU, FastGeLU, Tanh, Sigmoid,
    TanhGrad, SoftplusGrad, FastGeLUGrad, HSwishGrad, Add, Sub, Mul, Div, Reshape, ExpandDims,
    Transpose, Rank, Size, Cast, Unique, Fill, TupleToArray, ScalarToArray, InvertPermutation,
    IsSubClass, Gather, GatherNd, SegmentSum, SegmentMax, SegmentMin, SegmentMean, SegmentProd,
    AdaptiveMaxPool3D,
);
impl_read_op!(ShapeOp as "Shape");

impl_read_op!(Elu, |attrs: &AttrReader| ops::Elu::new(attrs.get_or("alpha", 1.0)?));
impl_read_op!(CeLU, |attrs: &AttrReader| ops::CeLU::new(attrs.get_or("alpha", 1.0)?));
impl_read_op!(SoftShrink, |attrs: &AttrReader| ops::SoftShrink::new(attrs.get_or("lambd", 0.5)?));
impl_read_op!(SoftShrinkGrad, |attrs: &AttrReader| {
    ops::SoftShrinkGrad::new(attrs.get_or("lambd", 0.5)?)
});
impl_read_op!(HShrink, |attrs: &AttrReader| Ok(ops::HShrink::new(
    attrs.get_or("lambd", 0.5)?
)));
impl_read_op!(HShrinkGrad, |attrs: &AttrReader| Ok(ops::HShrinkGrad {
    lambd: attrs.get_or("lambd", 0.5)?
}));
impl_read_op!(RReLU, |attrs: &AttrReader| {
    let default = ops::RReLU::default();
    ops::RReLU::new(
        attrs.get_or("lower", default.lower)?,
        attrs.get_or("upper", default.upper)?,
    )
});
impl_read_op!(Softmax, |attrs: &AttrReader| ops::Softmax::new(attrs.get_or("axis", vec![-1])?));
impl_read_op!(LogSoftmax, |attrs: &AttrReader| Ok(ops::LogSoftmax {
    axis: attrs.get_or("axis", -1)?
}));

macro_rules! impl_read_reduce {
    ($($op:ident),*) => {
        $(impl_read_op!($op, |attrs: &AttrReader| Ok(ops::$op {
            keep_dims: attrs.get_or("keep_dims", false)?,
        }));)*
    };
}

impl_read_reduce!(ReduceSum, ReduceMean, ReduceMax);

impl_read_op!(ArgMax, |attrs: &AttrReader| {
    ops::ArgMax::new(
        attrs.get_or("axis", -1)?,
        attrs.get_or("output_type", DataType::Int32)?,
    )
});

impl_read_op!(Squeeze, |attrs: &AttrReader| Ok(ops::Squeeze {
    axis: attrs.get_or("axis", Vec::new())?
}));
impl_read_op!(BroadcastTo, |attrs: &AttrReader| ops::BroadcastTo::new(attrs.require("shape")?));
impl_read_op!(Concat, |attrs: &AttrReader| Ok(ops::Concat {
    axis: attrs.get_or("axis", 0)?
}));
impl_read_op!(Stack, |attrs: &AttrReader| Ok(ops::Stack {
    axis: attrs.get_or("axis", 0)?
}));
impl_read_op!(Split, |attrs: &AttrReader| {
    ops::Split::new(attrs.get_or("axis", 0)?, attrs.get_or("output_num", 1)?)
});
impl_read_op!(StridedSlice, |attrs: &AttrReader| {
    ops::StridedSlice::new(
        attrs.get_or("begin_mask", 0)?,
        attrs.get_or("end_mask", 0)?,
        attrs.get_or("ellipsis_mask", 0)?,
        attrs.get_or("new_axis_mask", 0)?,
        attrs.get_or("shrink_axis_mask", 0)?,
    )
});
impl_read_op!(Range, |attrs: &AttrReader| ops::Range::new(attrs.get_or("maxlen", 1_000_000)?));

macro_rules! impl_read_locking {
    ($($op:ident),*) => {
        $(impl_read_op!($op, |attrs: &AttrReader| Ok(ops::$op {
            use_locking: attrs.get_or("use_locking", false)?,
        }));)*
    };
}

impl_read_locking!(
    ScatterUpdate,
    ScatterAdd,
    ScatterSub,
    ScatterMul,
    ScatterDiv,
    ScatterMax,
    ScatterMin,
    ScatterNdUpdate,
    ScatterNdAdd,
    ScatterNdSub
);

macro_rules! impl_read_batch_rank {
    ($($op:ident),*) => {
        $(impl_read_op!($op, |attrs: &AttrReader| Ok(ops::$op {
            batch_rank: attrs.batch_rank()?,
        }));)*
    };
}

impl_read_batch_rank!(
    UnsortedSegmentSum,
    UnsortedSegmentMin,
    UnsortedSegmentMax,
    UnsortedSegmentProd
);

impl_read_op!(BiasAdd, |attrs: &AttrReader| {
    ops::BiasAdd::new(&attrs.get_or("data_format", "NCHW".to_string())?)
});
impl_read_op!(BiasAddGrad, |attrs: &AttrReader| {
    ops::BiasAddGrad::new(&attrs.get_or("data_format", "NCHW".to_string())?)
});
impl_read_op!(Dropout2D, |attrs: &AttrReader| ops::Dropout2D::new(attrs.get_or("keep_prob", 0.5)?));
impl_read_op!(Dropout3D, |attrs: &AttrReader| ops::Dropout3D::new(attrs.get_or("keep_prob", 0.5)?));
impl_read_op!(LRN, |attrs: &AttrReader| {
    let default = ops::LRN::default();
    ops::LRN::new(
        attrs.get_or("depth_radius", default.depth_radius as i64)?,
        attrs.get_or("bias", default.bias)?,
        attrs.get_or("alpha", default.alpha)?,
        attrs.get_or("beta", default.beta)?,
        &attrs.get_or("norm_region", default.norm_region)?,
    )
});
impl_read_op!(LRNGrad, |attrs: &AttrReader| Ok(ops::LRNGrad {
    lrn: <ops::LRN as ReadOp>::read(attrs)?
}));
impl_read_op!(InTopK, |attrs: &AttrReader| ops::InTopK::new(attrs.require("k")?));
impl_read_op!(Pad, |attrs: &AttrReader| {
    let flat: Vec<i64> = attrs.require("paddings")?;
    if flat.len() % 2 != 0 {
        return Err(ConfigError::OutOfRange {
            op: "Pad".into(),
            attr: "paddings".into(),
            requirement: "a list of (before, after) pairs".into(),
            got: format!("{:?}", flat),
        });
    }
    let pairs: Vec<[i64; 2]> = flat.chunks_exact(2).map(|p| [p[0], p[1]]).collect();
    ops::Pad::new(&pairs)
});
impl_read_op!(PadV3, |attrs: &AttrReader| {
    ops::PadV3::new(
        &attrs.get_or("mode", "constant".to_string())?,
        attrs.get_or("paddings_contiguous", true)?,
    )
});
impl_read_op!(Pdist, |attrs: &AttrReader| ops::Pdist::new(attrs.get_or("p", 2.0)?));
impl_read_op!(RandomCategorical, |attrs: &AttrReader| {
    ops::RandomCategorical::new(attrs.get_or("dtype", DataType::Int64)?)
});

macro_rules! impl_read_pool2d {
    ($($op:ident),*) => {
        $(impl_read_op!($op, |attrs: &AttrReader| {
            ops::$op::new(
                attrs.value_or("kernel_size", AttrValue::Int(1)),
                attrs.value_or("strides", AttrValue::Int(1)),
                &attrs.get_or("pad_mode", "VALID".to_string())?,
                &attrs.get_or("data_format", "NCHW".to_string())?,
            )
        });)*
    };
}

impl_read_pool2d!(MaxPool, AvgPool);

impl_read_op!(AdaptiveAvgPool2D, |attrs: &AttrReader| {
    ops::AdaptiveAvgPool2D::new(attrs.output_size()?)
});
impl_read_op!(AdaptiveMaxPool2D, |attrs: &AttrReader| {
    ops::AdaptiveMaxPool2D::new(attrs.output_size()?, attrs.get_or("return_indices", false)?)
});
impl_read_op!(MaxPool3DWithArgmax, |attrs: &AttrReader| {
    ops::MaxPool3DWithArgmax::new(
        attrs.require_value("ksize")?,
        attrs.require_value("strides")?,
        attrs.value_or("pads", AttrValue::Int(0)),
        attrs.value_or("dilation", AttrValue::Int(1)),
        attrs.get_or("ceil_mode", false)?,
        attrs.get_or("argmax_type", DataType::Int64)?,
    )
});

impl_read_op!(DeformableOffsets, |attrs: &AttrReader| {
    ops::DeformableOffsets::new(
        attrs.require_value("strides")?,
        attrs.require_value("pads")?,
        attrs.require_value("kernel_size")?,
        attrs.value_or("dilations", AttrValue::Ints(vec![1, 1, 1, 1])),
        &attrs.get_or("data_format", "NCHW".to_string())?,
        attrs.get_or("deformable_groups", 1)?,
        attrs.get_or("modulated", true)?,
    )
});

impl_read_op!(KLDivLoss, |attrs: &AttrReader| {
    ops::KLDivLoss::new(&attrs.get_or("reduction", "mean".to_string())?)
});
impl_read_op!(KLDivLossGrad, |attrs: &AttrReader| {
    ops::KLDivLossGrad::new(&attrs.get_or("reduction", "mean".to_string())?)
});
impl_read_op!(SmoothL1Loss, |attrs: &AttrReader| {
    ops::SmoothL1Loss::new(
        attrs.get_or("beta", 1.0)?,
        &attrs.get_or("reduction", "none".to_string())?,
    )
});
impl_read_op!(SmoothL1LossGrad, |attrs: &AttrReader| {
    ops::SmoothL1LossGrad::new(
        attrs.get_or("beta", 1.0)?,
        &attrs.get_or("reduction", "none".to_string())?,
    )
});
impl_read_op!(BCEWithLogitsLoss, |attrs: &AttrReader| {
    ops::BCEWithLogitsLoss::new(&attrs.get_or("reduction", "mean".to_string())?)
});

macro_rules! impl_read_optimizer {
    ($($op:ident),*) => {
        $(impl_read_op!($op, |attrs: &AttrReader| Ok(ops::$op {
            use_locking: attrs.get_or("use_locking", false)?,
            batch_rank: attrs.batch_rank()?,
        }));)*
    };
}

impl_read_optimizer!(
    ApplyAdaMax,
    ApplyAdadelta,
    ApplyFtrl,
    ApplyProximalAdagrad,
    ApplyProximalGradientDescent,
    ApplyPowerSign,
    ApplyAdagradDA
);

impl_read_op!(ApplyAdamWithAmsgrad, |attrs: &AttrReader| {
    let default = ops::ApplyAdamWithAmsgrad::default();
    Ok(ops::ApplyAdamWithAmsgrad {
        beta1: attrs.get_or("beta1", default.beta1)?,
        beta2: attrs.get_or("beta2", default.beta2)?,
        epsilon: attrs.get_or("epsilon", default.epsilon)?,
        use_locking: attrs.get_or("use_locking", false)?,
        batch_rank: attrs.batch_rank()?,
    })
});

#[cfg(test)]
mod tests {
    use opshape_testing::TestCases;

    use super::OpRegistry;
    use crate::attrs::{AttrValue, Attributes};
    use crate::error::ConfigError;
    use crate::operator::Operator;
    use crate::dtype::DataType;
    use crate::ops::{
        AdaptiveMaxPool2D, ApplyAdaMax, BatchRankOp, DeformableOffsets, MaxPool,
        MaxPool3DWithArgmax, Pad, StridedSlice,
    };

    #[test]
    fn test_read_op_with_defaults() {
        let reg = OpRegistry::with_all_ops();
        let op = reg.read_op("Softmax", &Attributes::new()).unwrap();
        assert_eq!(op.name(), "Softmax");
        assert_eq!(op.attrs().get("axis"), Some(&AttrValue::Ints(vec![-1])));

        let op = reg.read_op("Shape", &Attributes::new()).unwrap();
        assert_eq!(op.name(), "Shape");
    }

    #[test]
    fn test_read_op_errors() {
        #[derive(Debug)]
        struct Case {
            name: &'static str,
            attrs: Attributes,
            expected: ConfigError,
        }

        let cases = [
            Case {
                name: "Conv2D",
                attrs: Attributes::new(),
                expected: ConfigError::UnknownOperator {
                    name: "Conv2D".into(),
                },
            },
            Case {
                name: "InTopK",
                attrs: Attributes::new(),
                expected: ConfigError::MissingAttr {
                    op: "InTopK".into(),
                    attr: "k".into(),
                },
            },
            Case {
                name: "Concat",
                attrs: Attributes::new().with("axis", "0"),
                expected: ConfigError::InvalidType {
                    op: "Concat".into(),
                    attr: "axis".into(),
                    expected: "int".into(),
                    got: "str (0)".into(),
                },
            },
            Case {
                name: "MaxPool",
                attrs: Attributes::new().with("pad_mode", "bogus"),
                expected: ConfigError::NotInSet {
                    op: "MaxPool".into(),
                    attr: "pad_mode".into(),
                    allowed: "VALID, SAME".into(),
                    got: "BOGUS".into(),
                },
            },
        ];

        cases.test_each(|case| {
            let reg = OpRegistry::with_all_ops();
            let err = reg.read_op(case.name, &case.attrs).err().unwrap();
            assert_eq!(err, case.expected);
        });
    }

    #[test]
    fn test_read_op_from_attrs() {
        // Constructing an operator from the attributes of another gives an
        // equivalent operator.
        let ops: Vec<Box<dyn Operator>> = vec![
            Box::new(MaxPool::new(vec![3_i64, 2], 2_i64, "same", "NCHW").unwrap()),
            Box::new(
                MaxPool3DWithArgmax::new(2_i64, 1_i64, 1_i64, 1_i64, true, DataType::Int32).unwrap(),
            ),
            Box::new(AdaptiveMaxPool2D::new([None, Some(4)], true).unwrap()),
            Box::new(Pad::new(&[[1, 2], [0, 3]]).unwrap()),
            Box::new(StridedSlice::new(1, 2, 0, 0, 4).unwrap()),
            Box::new(ApplyAdaMax::default().with_batch_rank(2)),
            Box::new(
                DeformableOffsets::new(vec![1_i64, 1, 2, 2], vec![1_i64, 0, 1, 0], 3_i64, 1_i64, "NCHW", 2, true)
                    .unwrap(),
            ),
        ];
        let reg = OpRegistry::with_all_ops();
        for op in ops {
            let read = reg.read_op(op.name(), &op.attrs()).unwrap();
            assert_eq!(read.attrs(), op.attrs(), "attrs differ for {}", op.name());
            assert_eq!(read.output_names(), op.output_names());
        }
    }

    #[test]
    fn test_register_op() {
        let mut reg = OpRegistry::new();
        reg.register_op::<MaxPool>();
        assert_eq!(reg.op_types(), ["MaxPool"]);
        assert!(reg.read_op("AvgPool", &Attributes::new()).is_err());
        assert!(OpRegistry::with_all_ops().op_types().len() > 100);
    }
}
