//! Batching rules which lift operators over an extra batch dimension.
//!
//! A rule receives each operator input paired with the axis along which it
//! is batched (or `None`) and returns each output paired with the axis along
//! which the result is batched. Rules are evaluated against a [`Backend`],
//! which supplies the values being transformed. [`SymbolicBackend`]
//! evaluates operators by running static inference, so applying a rule to
//! symbolic types gives the types of the batched computation.
//!
//! ```
//! use opshape::ops::ReLU;
//! use opshape::vmap::{Batched, SymbolicBackend, VmapRules};
//! use opshape::{DataType, TensorType};
//!
//! let rules = VmapRules::<SymbolicBackend>::with_all_rules();
//! let relu = ReLU {};
//! let rule = rules.get_vmap_rule(&relu, 4).unwrap();
//!
//! let x = TensorType::tensor(DataType::Float32, [3, 4, 5]);
//! let outputs = rule.apply(&SymbolicBackend::default(), &[Batched::new(x, Some(1))]).unwrap();
//! assert_eq!(outputs[0].dim, Some(1));
//! ```

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::error::{InferError, VmapError};
use crate::operator::Operator;
use crate::ops::{self, resolve_index};
use crate::shape::Dim;
use crate::value::ConstValue;

mod backend;
mod batch_rank;
mod elementwise;
mod layout;
mod loss;
mod nn;

pub use backend::{Backend, SymbolicBackend};

/// A value paired with the axis along which it is batched.
#[derive(Clone, Debug, PartialEq)]
pub struct Batched<V> {
    pub value: V,

    /// Batch axis, or `None` if the value is the same for every batch item.
    pub dim: Option<usize>,
}

impl<V> Batched<V> {
    pub fn new(value: V, dim: Option<usize>) -> Self {
        Batched { value, dim }
    }

    pub fn unbatched(value: V) -> Self {
        Batched { value, dim: None }
    }
}

/// Inputs or outputs of a batching rule.
pub type BatchedValues<B> = Vec<Batched<<B as Backend>::Value>>;

/// Type-erased batching rule, as stored in [`VmapRules`].
type RuleFunction<B> = dyn Fn(&VmapContext<B>, &dyn Operator, &[Batched<<B as Backend>::Value>]) -> Result<BatchedValues<B>, VmapError>
    + Send
    + Sync;

/// Batching rule for a concrete operator type.
pub type TypedRule<Op, B> =
    fn(&VmapContext<B>, &Op, &[Batched<<B as Backend>::Value>]) -> Result<BatchedValues<B>, VmapError>;

/// Registry of batching rules keyed by operator type.
pub struct VmapRules<B: Backend> {
    rules: FxHashMap<TypeId, Box<RuleFunction<B>>>,
}

impl<B: Backend + 'static> Default for VmapRules<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend + 'static> VmapRules<B> {
    /// Create an empty registry.
    pub fn new() -> Self {
        VmapRules {
            rules: FxHashMap::default(),
        }
    }

    /// Register the batching rule for operators of type `Op`, replacing any
    /// existing rule.
    pub fn register<Op: Operator>(&mut self, rule: TypedRule<Op, B>) {
        self.rules.insert(
            TypeId::of::<Op>(),
            Box::new(
                move |cx: &VmapContext<B>, op: &dyn Operator, inputs: &[Batched<B::Value>]| {
                    let op = op.downcast_ref::<Op>().ok_or_else(|| {
                        VmapError::Backend(format!("rule for {} applied to another operator", op.name()))
                    })?;
                    rule(cx, op, inputs)
                },
            ),
        );
    }

    /// Return true if a rule is registered for `op`.
    pub fn contains(&self, op: &dyn Operator) -> bool {
        self.rules.contains_key(&op_type_id(op))
    }

    /// Resolve the batching rule for `op` over a batch of `axis_size` items.
    pub fn get_vmap_rule<'a>(
        &'a self,
        op: &'a dyn Operator,
        axis_size: usize,
    ) -> Result<VmapRule<'a, B>, VmapError> {
        let rule = self.rules.get(&op_type_id(op)).ok_or_else(|| VmapError::NoRule {
            op: op.name().to_string(),
        })?;
        if axis_size == 0 {
            return Err(VmapError::unsupported(op.name(), "the batch size must be positive"));
        }
        tracing::debug!(op = op.name(), axis_size, "resolved vmap rule");
        Ok(VmapRule {
            op,
            axis_size,
            rule: rule.as_ref(),
        })
    }

    /// Create a registry with rules for all built-in operators that support
    /// batching.
    pub fn with_all_rules() -> Self {
        let mut rules = Self::new();

        macro_rules! register {
            ($rule:expr => $($op:ident),* $(,)?) => {
                $(rules.register::<ops::$op>($rule);)*
            };
        }

        register!(elementwise::unary =>
            Cast, CeLU, Elu, FastGeLU, GeLU, HShrink, HSigmoid, HSwish, ReLU, ReLU6, RReLU, SeLU,
            Sigmoid, SoftShrink, Softplus, Softsign, Tanh,
        );
        register!(elementwise::activation_grad =>
            FastGeLUGrad, HShrinkGrad, HSwishGrad, SoftShrinkGrad, SoftplusGrad, TanhGrad,
        );
        register!(elementwise::binary => Add, Div, Mul, Sub);
        register!(elementwise::softmax => Softmax);
        register!(elementwise::log_softmax => LogSoftmax);

        register!(layout::reduce => ReduceMax, ReduceMean, ReduceSum);
        register!(layout::arg_max => ArgMax);
        register!(layout::reshape => Reshape);
        register!(layout::expand_dims => ExpandDims);
        register!(layout::squeeze => Squeeze);
        register!(layout::transpose => Transpose);
        register!(layout::concat => Concat);
        register!(layout::stack => Stack);

        register!(nn::bias_add => BiasAdd);
        register!(nn::bias_add_grad => BiasAddGrad);
        register!(nn::fixed_rank::<B, _, 2> => RandomCategorical);
        register!(nn::fixed_rank::<B, _, 4> =>
            AdaptiveAvgPool2D, AdaptiveMaxPool2D, AvgPool, Dropout2D, MaxPool,
        );
        register!(nn::fixed_rank::<B, _, 5> => AdaptiveMaxPool3D, Dropout3D, MaxPool3DWithArgmax);
        register!(nn::deformable_offsets => DeformableOffsets);
        register!(nn::in_top_k => InTopK);
        register!(nn::pad => Pad);
        register!(nn::pad_v3 => PadV3);
        register!(nn::channels_last => LRN, LRNGrad);
        register!(nn::all_at_front => Pdist, KLDivLossGrad, SmoothL1LossGrad);

        register!(loss::reduced_loss => BCEWithLogitsLoss, KLDivLoss, SmoothL1Loss);

        register!(batch_rank::optimizer =>
            ApplyAdaMax, ApplyAdadelta, ApplyAdagradDA, ApplyAdamWithAmsgrad, ApplyFtrl,
            ApplyPowerSign, ApplyProximalAdagrad, ApplyProximalGradientDescent,
        );
        register!(batch_rank::unsorted_segment =>
            UnsortedSegmentMax, UnsortedSegmentMin, UnsortedSegmentProd, UnsortedSegmentSum,
        );

        rules
    }
}

fn op_type_id(op: &dyn Operator) -> TypeId {
    let op: &dyn std::any::Any = op;
    op.type_id()
}

/// A batching rule bound to an operator and batch size.
pub struct VmapRule<'a, B: Backend> {
    op: &'a dyn Operator,
    axis_size: usize,
    rule: &'a RuleFunction<B>,
}

impl<B: Backend> VmapRule<'_, B> {
    /// Apply the rule to batched inputs.
    ///
    /// If no input is batched, the operator is evaluated unchanged and every
    /// output is unbatched.
    pub fn apply(
        &self,
        backend: &B,
        inputs: &[Batched<B::Value>],
    ) -> Result<BatchedValues<B>, VmapError> {
        let cx = VmapContext::new(backend, self.op.name(), self.axis_size);
        cx.check_inputs(self.op, inputs)?;
        if let Some(outputs) = cx.general_preprocess(self.op, inputs)? {
            return Ok(outputs);
        }
        tracing::debug!(
            op = self.op.name(),
            axis_size = self.axis_size,
            dims = ?inputs.iter().map(|x| x.dim).collect::<Vec<_>>(),
            "apply vmap rule"
        );
        (self.rule)(&cx, self.op, inputs)
    }
}

/// Backend, operator name and batch size of a rule invocation, together
/// with the value rewrites shared by rules.
pub struct VmapContext<'a, B: Backend> {
    backend: &'a B,
    op: &'a str,
    axis_size: usize,
}

impl<'a, B: Backend> VmapContext<'a, B> {
    pub fn new(backend: &'a B, op: &'a str, axis_size: usize) -> Self {
        VmapContext {
            backend,
            op,
            axis_size,
        }
    }

    pub fn backend(&self) -> &B {
        self.backend
    }

    /// Name of the operator being batched, used in errors.
    pub fn op_name(&self) -> &str {
        self.op
    }

    pub fn axis_size(&self) -> usize {
        self.axis_size
    }

    fn check_inputs(&self, op: &dyn Operator, inputs: &[Batched<B::Value>]) -> Result<(), VmapError> {
        let expected = op.input_names().len();
        let count_ok = if op.is_variadic() {
            !inputs.is_empty()
        } else {
            inputs.len() == expected
        };
        if !count_ok {
            return Err(self.input_count_error(expected, inputs.len()));
        }

        for (i, input) in inputs.iter().enumerate() {
            let Some(dim) = input.dim else {
                continue;
            };
            let shape = self.backend.shape(&input.value);
            let Some(dims) = shape.dims() else {
                continue;
            };
            match dims.get(dim) {
                None => {
                    return Err(VmapError::inconsistent(
                        self.op,
                        format!(
                            "the source axis {} of '{}' is out of range for shape {}",
                            dim,
                            input_name(op, i),
                            shape
                        ),
                    ));
                }
                Some(Dim::Known(size)) if *size != self.axis_size => {
                    return Err(VmapError::inconsistent(
                        self.op,
                        format!(
                            "the size of axis {} of '{}' must be the batch size {}, but got {}",
                            dim,
                            input_name(op, i),
                            self.axis_size,
                            size
                        ),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn input_count_error(&self, expected: usize, got: usize) -> VmapError {
        InferError::InputCount {
            op: self.op.to_string(),
            expected: expected.to_string(),
            got,
        }
        .into()
    }

    /// Evaluate `op` directly if none of `inputs` is batched.
    ///
    /// Returns `None` if any input is batched, in which case the caller must
    /// apply the batching rule.
    pub fn general_preprocess(
        &self,
        op: &dyn Operator,
        inputs: &[Batched<B::Value>],
    ) -> Result<Option<BatchedValues<B>>, VmapError> {
        if inputs.iter().any(|x| x.dim.is_some()) {
            return Ok(None);
        }
        let values: Vec<_> = inputs.iter().map(|x| x.value.clone()).collect();
        let outputs = self.call(op, &values)?;
        Ok(Some(outputs.into_iter().map(Batched::unbatched).collect()))
    }

    /// Evaluate an operator using the backend.
    pub fn call(&self, op: &dyn Operator, inputs: &[B::Value]) -> Result<Vec<B::Value>, VmapError> {
        self.backend.call(op, inputs)
    }

    /// Evaluate an operator and return its first output.
    pub fn call_one(&self, op: &dyn Operator, inputs: &[B::Value]) -> Result<B::Value, VmapError> {
        self.call(op, inputs)?.into_iter().next().ok_or_else(|| {
            VmapError::Backend(format!("operator {} returned no outputs", op.name()))
        })
    }

    /// Return the rank of a value, which must be known.
    pub fn rank(&self, value: &B::Value) -> Result<usize, VmapError> {
        self.backend
            .shape(value)
            .rank()
            .ok_or_else(|| VmapError::unsupported(self.op, "the rank of batched inputs must be known"))
    }

    /// Return the rank of a batch item, excluding the batch axis.
    pub fn logical_rank(&self, x: &Batched<B::Value>) -> Result<usize, VmapError> {
        let rank = self.rank(&x.value)?;
        Ok(if x.dim.is_some() { rank - 1 } else { rank })
    }

    /// Return the dimensions of a value with `-1` for unknown sizes.
    pub fn dims(&self, value: &B::Value) -> Result<Vec<i64>, VmapError> {
        let shape = self.backend.shape(value);
        if shape.rank().is_none() {
            return Err(VmapError::unsupported(self.op, "the rank of batched inputs must be known"));
        }
        Ok(shape.to_i64())
    }

    /// Read a constant integer operand.
    pub fn ints(&self, value: &B::Value, operand: &str) -> Result<Vec<i64>, VmapError> {
        self.backend
            .const_ints(value)
            .ok_or_else(|| InferError::constant_required(self.op, operand).into())
    }

    fn int_vec(&self, values: &[i64]) -> Result<B::Value, VmapError> {
        self.backend.constant(ConstValue::int_vec(values))
    }

    /// Fail if a control operand is batched.
    pub fn require_unbatched(&self, operand: &str, x: &Batched<B::Value>) -> Result<(), VmapError> {
        match x.dim {
            Some(dim) => Err(VmapError::BatchedControlOperand {
                op: self.op.to_string(),
                operand: operand.to_string(),
                dim,
            }),
            None => Ok(()),
        }
    }

    /// Require every input after the first to be unbatched.
    pub fn require_unbatched_tail(
        &self,
        op: &dyn Operator,
        inputs: &[Batched<B::Value>],
    ) -> Result<(), VmapError> {
        for (i, x) in inputs.iter().enumerate().skip(1) {
            self.require_unbatched(input_name(op, i), x)?;
        }
        Ok(())
    }

    /// Reshape a value. The target may contain one `-1`.
    pub fn reshape(&self, value: B::Value, shape: &[i64]) -> Result<B::Value, VmapError> {
        let shape = self.int_vec(shape)?;
        self.call_one(&ops::Reshape {}, &[value, shape])
    }

    /// Move axis `from` of a value to position `to`.
    pub fn move_axis(&self, value: B::Value, from: usize, to: usize) -> Result<B::Value, VmapError> {
        if from == to {
            return Ok(value);
        }
        let rank = self.rank(&value)?;
        let mut perm: Vec<i64> = (0..rank as i64).filter(|&d| d != from as i64).collect();
        perm.insert(to, from as i64);
        tracing::trace!(op = self.op, from, to, "move batch axis");
        let perm = self.int_vec(&perm)?;
        self.call_one(&ops::Transpose {}, &[value, perm])
    }

    /// Repeat an unbatched value along a new leading batch axis.
    fn broadcast_batch(&self, value: B::Value) -> Result<B::Value, VmapError> {
        let rank = self.rank(&value)?;
        let axis = self.backend.constant(ConstValue::int_scalar(0))?;
        let value = self.call_one(&ops::ExpandDims {}, &[value, axis])?;
        let mut shape = vec![-1; rank + 1];
        shape[0] = self.axis_size as i64;
        self.call_one(&ops::BroadcastTo { shape }, &[value])
    }

    /// Return a value with its batch axis first. Unbatched values are
    /// repeated along a new leading axis of the batch size.
    pub fn bdim_at_front(&self, x: &Batched<B::Value>) -> Result<B::Value, VmapError> {
        match x.dim {
            Some(dim) => self.move_axis(x.value.clone(), dim, 0),
            None => self.broadcast_batch(x.value.clone()),
        }
    }

    /// Return a value with its batch axis last. Unbatched values are
    /// repeated along a new trailing axis of the batch size.
    pub fn bdim_at_back(&self, x: &Batched<B::Value>) -> Result<B::Value, VmapError> {
        let value = self.bdim_at_front(x)?;
        let rank = self.rank(&value)?;
        self.move_axis(value, 0, rank - 1)
    }

    /// Insert size 1 axes after the leading batch axis of a value whose
    /// batch items have rank `rank`, so that batch items have rank
    /// `target_rank` and broadcast against other operands of that rank.
    pub fn handle_broadcasting(
        &self,
        mut value: B::Value,
        rank: usize,
        target_rank: usize,
    ) -> Result<B::Value, VmapError> {
        for _ in rank..target_rank {
            let axis = self.backend.constant(ConstValue::int_scalar(1))?;
            value = self.call_one(&ops::ExpandDims {}, &[value, axis])?;
        }
        Ok(value)
    }

    /// Evaluate a reduction over `axes`, dropping the reduced axes.
    pub fn reduce(&self, op: &dyn Operator, value: B::Value, axes: &[i64]) -> Result<B::Value, VmapError> {
        if axes.is_empty() {
            return Ok(value);
        }
        let axes = self.int_vec(axes)?;
        self.call_one(op, &[value, axes])
    }

    /// Call an operator whose kernel expects inputs of rank `kernel_rank`
    /// with a first input whose batch axis is at the front.
    ///
    /// If the first input has a higher rank, its leading axes are folded
    /// into one before the call and unfolded from each output afterwards.
    /// The remaining inputs are passed unchanged.
    pub fn call_collapsed(
        &self,
        op: &dyn Operator,
        x: B::Value,
        kernel_rank: usize,
        rest: &[B::Value],
    ) -> Result<Vec<B::Value>, VmapError> {
        let rank = self.rank(&x)?;
        let mut inputs = Vec::with_capacity(rest.len() + 1);
        if rank <= kernel_rank {
            inputs.push(x);
            inputs.extend_from_slice(rest);
            return self.call(op, &inputs);
        }

        let dims = self.dims(&x)?;
        let (prefix, tail) = dims.split_at(rank + 1 - kernel_rank);
        if tail.contains(&-1) {
            return Err(VmapError::unsupported(
                self.op,
                format!(
                    "the trailing {} dimensions of the input must be static, but got shape {:?}",
                    kernel_rank - 1,
                    dims
                ),
            ));
        }
        tracing::trace!(op = self.op, rank, kernel_rank, "fold leading axes");
        let folded: Vec<i64> = [-1].into_iter().chain(tail.iter().copied()).collect();
        inputs.push(self.reshape(x, &folded)?);
        inputs.extend_from_slice(rest);

        let mut outputs = Vec::new();
        for output in self.call(op, &inputs)? {
            let out_dims = self.dims(&output)?;
            let shape: Vec<i64> = prefix.iter().chain(&out_dims[1..]).copied().collect();
            if shape.iter().filter(|&&d| d == -1).count() > 1 {
                return Err(VmapError::unsupported(
                    self.op,
                    format!("cannot restore the leading axes {:?} of the output", prefix),
                ));
            }
            outputs.push(self.reshape(output, &shape)?);
        }
        Ok(outputs)
    }

    /// Resolve an axis of a batch item with `rank` dimensions.
    pub fn resolve_axis(&self, axis: i64, rank: usize) -> Result<usize, VmapError> {
        Ok(ops::resolve_axis(self.op, axis, rank)?)
    }

    /// Resolve a position at which an axis can be inserted into a batch item
    /// with `rank` dimensions.
    pub fn resolve_insert_axis(&self, axis: i64, rank: usize) -> Result<usize, VmapError> {
        resolve_index(rank + 1, axis).ok_or_else(|| {
            InferError::shape(
                self.op,
                format!(
                    "the 'axis' must be in range [{}, {}], but got {}",
                    -(rank as i64) - 1,
                    rank,
                    axis
                ),
            )
            .into()
        })
    }
}

/// Tag every value with the same batch axis.
pub(crate) fn with_dim<V>(values: Vec<V>, dim: Option<usize>) -> Vec<Batched<V>> {
    values.into_iter().map(|v| Batched::new(v, dim)).collect()
}

/// Name of input `index`. Variadic inputs share the last name.
fn input_name(op: &dyn Operator, index: usize) -> &'static str {
    let names = op.input_names();
    names
        .get(index)
        .or(names.last())
        .copied()
        .unwrap_or("input")
}
