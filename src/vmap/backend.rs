use std::fmt::Debug;

use crate::context::InferContext;
use crate::dtype::{DataType, ValueType};
use crate::error::VmapError;
use crate::operator::{Operator, infer_operator};
use crate::shape::Shape;
use crate::tensor_type::TensorType;
use crate::value::ConstValue;

/// Evaluates the operators emitted by batching rules.
///
/// A backend may evaluate operators numerically, or symbolically as
/// [`SymbolicBackend`] does.
pub trait Backend {
    type Value: Clone + Debug;

    /// Return the shape of a value.
    fn shape(&self, value: &Self::Value) -> Shape;

    /// Return the elements of a value if it is a known integer constant.
    fn const_ints(&self, value: &Self::Value) -> Option<Vec<i64>>;

    /// Evaluate an operator.
    fn call(&self, op: &dyn Operator, inputs: &[Self::Value]) -> Result<Vec<Self::Value>, VmapError>;

    /// Create a constant value.
    fn constant(&self, value: ConstValue) -> Result<Self::Value, VmapError>;
}

/// Backend whose values are symbolic types. Operators are evaluated by
/// static inference, folding constants where the context allows it.
///
/// Native-only operators cannot be evaluated.
#[derive(Clone, Debug, Default)]
pub struct SymbolicBackend {
    ctx: InferContext,
}

impl SymbolicBackend {
    pub fn new(ctx: InferContext) -> Self {
        SymbolicBackend { ctx }
    }

    pub fn context(&self) -> &InferContext {
        &self.ctx
    }
}

impl Backend for SymbolicBackend {
    type Value = TensorType;

    fn shape(&self, value: &TensorType) -> Shape {
        value.shape().clone()
    }

    fn const_ints(&self, value: &TensorType) -> Option<Vec<i64>> {
        value.value_i64s()
    }

    fn call(&self, op: &dyn Operator, inputs: &[TensorType]) -> Result<Vec<TensorType>, VmapError> {
        match infer_operator(op, inputs, &self.ctx)? {
            Some(output) => Ok(output.outputs),
            None => Err(VmapError::Backend(format!(
                "operator '{}' has no static inference",
                op.name()
            ))),
        }
    }

    fn constant(&self, value: ConstValue) -> Result<TensorType, VmapError> {
        let dtype = match &value {
            ConstValue::Bool(_) => ValueType::Tensor(DataType::Bool),
            ConstValue::Int(_) => ValueType::Tensor(DataType::Int64),
            ConstValue::Float(_) => ValueType::Tensor(DataType::Float32),
            ConstValue::Type(_) => ValueType::Type,
        };
        Ok(TensorType::constant(dtype, value)?)
    }
}
