//! Error types for operator construction, inference and batching.
//!
//! The three enums correspond to the three phases in which an operator can
//! be rejected. [`ConfigError`] is only produced by constructors,
//! [`InferError`] only by shape/dtype inference and [`VmapError`] only while
//! resolving or applying a batching rule.

use thiserror::Error;

/// Invalid operator attribute detected at construction time.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The attribute value has a type outside the permitted set.
    #[error("for '{op}', the type of '{attr}' should be one of [{expected}], but got {got}")]
    InvalidType {
        op: String,
        attr: String,
        expected: String,
        got: String,
    },

    /// A numeric attribute failed a range or relation check.
    #[error("for '{op}', the '{attr}' must be {requirement}, but got {got}")]
    OutOfRange {
        op: String,
        attr: String,
        requirement: String,
        got: String,
    },

    /// A string attribute is not a member of the permitted set.
    #[error("for '{op}', the '{attr}' must be one of [{allowed}], but got '{got}'")]
    NotInSet {
        op: String,
        attr: String,
        allowed: String,
        got: String,
    },

    /// A combination of attributes is invalid, eg. `lower > upper`.
    #[error("for '{op}', {message}")]
    Inconsistent { op: String, message: String },

    /// A required attribute was not supplied.
    #[error("for '{op}', the required attribute '{attr}' is missing")]
    MissingAttr { op: String, attr: String },

    /// No operator with this name is registered.
    #[error("unknown operator '{name}'")]
    UnknownOperator { name: String },
}

/// Static shape, dtype or value inference failure.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum InferError {
    /// The operator was called with the wrong number of inputs.
    #[error("for '{op}', expected {expected} inputs, but got {got}")]
    InputCount {
        op: String,
        expected: String,
        got: usize,
    },

    /// A shape law was violated (rank, broadcast, reshape product, axis
    /// range, scatter/segment laws).
    #[error("for '{op}', {message}")]
    Shape { op: String, message: String },

    /// An operand dtype is outside the operator's valid set or does not
    /// agree with another operand.
    #[error("for '{op}', {message}")]
    Dtype { op: String, message: String },

    /// An input that must be known at compile time has no constant value.
    #[error("for '{op}', the input '{input}' must be a compile-time constant")]
    ConstantRequired { op: String, input: String },

    /// An index is outside the valid range of the indexed dimension.
    #[error("for '{op}', {message}")]
    Index { op: String, message: String },

    /// The operator configuration is not supported on the target platform.
    #[error("for '{op}', {message}")]
    Platform { op: String, message: String },

    /// Symbolic type bounds or constant values are inconsistent.
    #[error("invalid symbolic type: {0}")]
    InvalidType(String),
}

impl InferError {
    pub fn shape(op: &str, message: impl Into<String>) -> Self {
        InferError::Shape {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn dtype(op: &str, message: impl Into<String>) -> Self {
        InferError::Dtype {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn constant_required(op: &str, input: &str) -> Self {
        InferError::ConstantRequired {
            op: op.to_string(),
            input: input.to_string(),
        }
    }

    pub fn index(op: &str, message: impl Into<String>) -> Self {
        InferError::Index {
            op: op.to_string(),
            message: message.into(),
        }
    }
}

/// Failure to resolve or apply a batching rule.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VmapError {
    /// No batching rule is registered for the operator.
    #[error("operator '{op}' has no registered batching rule")]
    NoRule { op: String },

    /// A control operand (paddings, output size, seed, ...) carries a batch
    /// dimension.
    #[error("for '{op}', the source axis of '{operand}' must be None, but got {dim}")]
    BatchedControlOperand {
        op: String,
        operand: String,
        dim: usize,
    },

    /// Co-dependent operands of an in-place update are batched differently.
    #[error("for '{op}', {message}")]
    InconsistentBatching { op: String, message: String },

    /// An input has a rank, shape or attribute combination the rule cannot
    /// lower.
    #[error("for '{op}' vmap, {message}")]
    Unsupported { op: String, message: String },

    /// Inference of an operator emitted by the rule failed.
    #[error(transparent)]
    Infer(#[from] InferError),

    /// The backend failed to evaluate an operator.
    #[error("backend error: {0}")]
    Backend(String),
}

impl VmapError {
    pub fn unsupported(op: &str, message: impl Into<String>) -> Self {
        VmapError::Unsupported {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn inconsistent(op: &str, message: impl Into<String>) -> Self {
        VmapError::InconsistentBatching {
            op: op.to_string(),
            message: message.into(),
        }
    }
}
