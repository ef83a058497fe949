//! The [`Operator`] trait for defining operators and the inference contracts
//! they implement.

use std::any::Any;
use std::fmt::Debug;

use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::ValueType;
use crate::error::InferError;
use crate::shape::Shape;
use crate::tensor_type::TensorType;

/// Result of full inference for one operator call.
#[derive(Clone, Debug, PartialEq)]
pub struct InferOutput {
    /// Symbolic type of each output.
    pub outputs: Vec<TensorType>,

    /// Attributes derived from the inputs which the compiler should record
    /// on the operator node, eg. `Cast`'s source and destination types.
    pub derived: Attributes,
}

impl InferOutput {
    pub fn new(outputs: Vec<TensorType>) -> Self {
        InferOutput {
            outputs,
            derived: Attributes::new(),
        }
    }

    /// Create a result with a single output.
    pub fn single(output: TensorType) -> Self {
        Self::new(vec![output])
    }

    /// Add a derived attribute.
    pub fn with_derived(mut self, name: &str, value: impl Into<AttrValue>) -> Self {
        self.derived = self.derived.with(name, value);
        self
    }
}

/// Inference which computes shape, dtype and optionally a constant value of
/// all outputs together.
pub trait InferTypes {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError>;
}

/// Inference with independent shape and dtype functions.
///
/// The compiler may call either function on its own, and each may fail
/// independently.
pub trait InferSplit {
    fn infer_shape(&self, shapes: &[Shape], ctx: &InferContext) -> Result<Vec<Shape>, InferError>;

    fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError>;
}

/// The inference contract an operator implements.
pub enum Inference<'a> {
    Full(&'a dyn InferTypes),
    Split(&'a dyn InferSplit),

    /// No static inference. Output types are only known once the native
    /// kernel has run.
    NativeOnly,
}

/// An operator declaration: named inputs and outputs, validated attributes
/// and an inference contract.
///
/// Operators are constructed with validated attributes and are immutable
/// afterwards. Attributes derived during inference are returned via
/// [`InferOutput::derived`] and recorded by an [`OpNode`].
pub trait Operator: Any + Debug {
    /// Return a display name for the operator.
    fn name(&self) -> &str;

    /// Names of the operator's inputs, in order.
    fn input_names(&self) -> &'static [&'static str];

    /// Names of the operator's outputs, in order.
    fn output_names(&self) -> &'static [&'static str];

    /// Return true if the operator accepts one or more inputs of the same
    /// kind instead of a fixed list (eg. `Concat`).
    fn is_variadic(&self) -> bool {
        false
    }

    /// Return the operator's attributes.
    fn attrs(&self) -> Attributes {
        Attributes::new()
    }

    fn inference(&self) -> Inference<'_>;
}

impl dyn Operator {
    /// Downcast this operator to a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}

fn check_input_count(op: &dyn Operator, count: usize) -> Result<(), InferError> {
    let names = op.input_names();
    let (ok, expected) = if op.is_variadic() {
        (count >= 1, "at least 1".to_string())
    } else {
        (count == names.len(), names.len().to_string())
    };
    if ok {
        Ok(())
    } else {
        Err(InferError::InputCount {
            op: op.name().to_string(),
            expected,
            got: count,
        })
    }
}

/// Run static inference for an operator.
///
/// Returns `None` for native-only operators. Split inference is assembled
/// into output types, carrying the first input's shape bounds over to
/// outputs which have the same shape.
pub fn infer_operator(
    op: &dyn Operator,
    inputs: &[TensorType],
    ctx: &InferContext,
) -> Result<Option<InferOutput>, InferError> {
    check_input_count(op, inputs.len())?;
    tracing::debug!(op = op.name(), n_inputs = inputs.len(), "infer");

    match op.inference() {
        Inference::Full(infer) => infer.infer(inputs, ctx).map(Some),
        Inference::Split(infer) => {
            let shapes: Vec<Shape> = inputs.iter().map(|i| i.shape().clone()).collect();
            let dtypes: Vec<ValueType> = inputs.iter().map(|i| i.dtype()).collect();
            let out_shapes = infer.infer_shape(&shapes, ctx)?;
            let out_dtypes = infer.infer_dtype(&dtypes)?;
            if out_shapes.len() != out_dtypes.len() {
                return Err(InferError::InvalidType(format!(
                    "{} inferred {} shapes but {} dtypes",
                    op.name(),
                    out_shapes.len(),
                    out_dtypes.len()
                )));
            }

            let mut outputs = Vec::with_capacity(out_shapes.len());
            for (shape, dtype) in out_shapes.into_iter().zip(out_dtypes) {
                let mut output = TensorType::new(dtype, shape);
                if let Some(first) = inputs.first()
                    && first.shape() == output.shape()
                    && let (Some(min), Some(max)) = (first.min_shape(), first.max_shape())
                {
                    output = output.with_shape_bounds(min.to_vec(), max.to_vec())?;
                }
                outputs.push(output);
            }
            Ok(Some(InferOutput::new(outputs)))
        }
        Inference::NativeOnly => {
            tracing::debug!(op = op.name(), "native-only operator, skipping inference");
            Ok(None)
        }
    }
}

/// An operator in a graph, together with the attributes recorded for it by
/// inference.
#[derive(Debug)]
pub struct OpNode {
    op: Box<dyn Operator>,
    derived: Attributes,
}

impl OpNode {
    pub fn new<Op: Operator>(op: Op) -> OpNode {
        Self::from_boxed(Box::new(op))
    }

    pub fn from_boxed(op: Box<dyn Operator>) -> OpNode {
        OpNode {
            op,
            derived: Attributes::new(),
        }
    }

    pub fn op(&self) -> &dyn Operator {
        self.op.as_ref()
    }

    /// Attributes recorded by previous inference calls.
    pub fn derived(&self) -> &Attributes {
        &self.derived
    }

    /// Return the operator's attributes with derived attributes applied.
    pub fn attrs(&self) -> Attributes {
        self.op.attrs().merged(&self.derived)
    }

    /// Run inference and record any derived attributes.
    ///
    /// Returns `None` for native-only operators.
    pub fn infer(
        &mut self,
        inputs: &[TensorType],
        ctx: &InferContext,
    ) -> Result<Option<Vec<TensorType>>, InferError> {
        let Some(output) = infer_operator(self.op.as_ref(), inputs, ctx)? else {
            return Ok(None);
        };
        if !output.derived.is_empty() {
            self.derived = self.derived.merged(&output.derived);
        }
        Ok(Some(output.outputs))
    }
}

/// Implement [`Operator`] for a type.
///
/// The inference mode is one of `full` ([`InferTypes`]), `split`
/// ([`InferSplit`]) or `native`.
macro_rules! impl_operator {
    (@mode $self:ident, full) => {
        $crate::operator::Inference::Full($self)
    };
    (@mode $self:ident, split) => {
        $crate::operator::Inference::Split($self)
    };
    (@mode $self:ident, native) => {
        $crate::operator::Inference::NativeOnly
    };

    (
        $op:ident,
        [$($input:literal),*] -> [$($output:literal),*],
        $mode:ident
        $(, variadic = $variadic:literal)?
        $(, attrs = |$this:ident| $attrs:expr)?
    ) => {
        impl $crate::operator::Operator for $op {
            fn name(&self) -> &str {
                stringify!($op)
            }

            fn input_names(&self) -> &'static [&'static str] {
                &[$($input),*]
            }

            fn output_names(&self) -> &'static [&'static str] {
                &[$($output),*]
            }

            $(
                fn is_variadic(&self) -> bool {
                    $variadic
                }
            )?

            $(
                fn attrs(&self) -> $crate::attrs::Attributes {
                    let $this = self;
                    $attrs
                }
            )?

            fn inference(&self) -> $crate::operator::Inference<'_> {
                impl_operator!(@mode self, $mode)
            }
        }
    };
}

pub(crate) use impl_operator;

/// Convenience methods that make it easier to run inference in tests.
#[cfg(test)]
pub trait OperatorExt: Operator {
    /// Run inference with the default context and return the outputs.
    fn infer_simple(&self, inputs: &[TensorType]) -> Result<Vec<TensorType>, InferError>
    where
        Self: Sized,
    {
        self.infer_with(inputs, &InferContext::default())
    }

    /// Run inference with a given context and return the outputs.
    fn infer_with(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<Vec<TensorType>, InferError>
    where
        Self: Sized,
    {
        let output = infer_operator(self, inputs, ctx)?;
        Ok(output.map(|o| o.outputs).unwrap_or_default())
    }
}

#[cfg(test)]
impl<O: Operator> OperatorExt for O {}

#[cfg(test)]
mod tests {
    use super::{InferOutput, InferSplit, InferTypes, OpNode, Operator, impl_operator, infer_operator};
    use crate::attrs::AttrValue;
    use crate::context::InferContext;
    use crate::dtype::{DataType, ValueType};
    use crate::error::InferError;
    use crate::shape::{Shape, shape};
    use crate::tensor_type::TensorType;

    #[derive(Debug)]
    struct Double;

    impl InferSplit for Double {
        fn infer_shape(&self, shapes: &[Shape], _ctx: &InferContext) -> Result<Vec<Shape>, InferError> {
            Ok(vec![shapes[0].clone()])
        }

        fn infer_dtype(&self, dtypes: &[ValueType]) -> Result<Vec<ValueType>, InferError> {
            Ok(vec![dtypes[0]])
        }
    }

    impl_operator!(Double, ["x"] -> ["y"], split);

    #[derive(Debug)]
    struct Tag;

    impl InferTypes for Tag {
        fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
            Ok(InferOutput::single(inputs[0].clone()).with_derived("seen", true))
        }
    }

    impl_operator!(Tag, ["x"] -> ["y"], full);

    #[derive(Debug)]
    struct Opaque;

    impl_operator!(Opaque, ["x"] -> ["y"], native);

    #[test]
    fn test_infer_operator_modes() {
        let ctx = InferContext::default();
        let x = TensorType::tensor(DataType::Float32, shape!(2, -1))
            .with_shape_bounds(vec![2, 1], vec![2, 4])
            .unwrap();

        let out = infer_operator(&Double, &[x.clone()], &ctx).unwrap().unwrap();
        assert_eq!(out.outputs[0].shape(), &shape!(2, -1));
        assert_eq!(out.outputs[0].max_shape(), Some([2, 4].as_slice()));

        let out = infer_operator(&Tag, &[x.clone()], &ctx).unwrap().unwrap();
        assert_eq!(out.derived.get("seen"), Some(&AttrValue::Bool(true)));

        assert_eq!(infer_operator(&Opaque, &[x.clone()], &ctx).unwrap(), None);
    }

    #[test]
    fn test_infer_operator_checks_input_count() {
        let ctx = InferContext::default();
        let x = TensorType::tensor(DataType::Float32, shape!(2));
        let err = infer_operator(&Double, &[x.clone(), x], &ctx).err().unwrap();
        assert_eq!(
            err,
            InferError::InputCount {
                op: "Double".into(),
                expected: "1".into(),
                got: 2,
            }
        );
    }

    #[test]
    fn test_op_node_records_derived_attrs() {
        let mut node = OpNode::new(Tag);
        assert!(node.attrs().is_empty());
        let x = TensorType::tensor(DataType::Float32, shape!(3));
        let outputs = node.infer(&[x], &InferContext::default()).unwrap().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(node.attrs().get("seen"), Some(&AttrValue::Bool(true)));
    }

    #[test]
    fn test_downcast() {
        let op: Box<dyn Operator> = Box::new(Tag);
        assert!(op.downcast_ref::<Tag>().is_some());
        assert!(op.downcast_ref::<Double>().is_none());
    }
}
