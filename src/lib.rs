//! opshape describes tensor operators symbolically: what they accept, what
//! they produce and how they behave when lifted over an extra batch axis.
//!
//! It is intended to be embedded in a graph compiler, which calls into it
//! while lowering a computation graph. The library does not execute
//! operators on real data, except for folding small compile-time constants.
//!
//! # Operators
//!
//! Each operator in [`ops`] is a struct holding its validated attributes.
//! Constructors reject invalid attributes with a [`ConfigError`]:
//!
//! ```
//! use opshape::ops::RReLU;
//!
//! assert!(RReLU::new(0.1, 0.5).is_ok());
//! assert!(RReLU::new(0.5, 0.1).is_err());
//! ```
//!
//! Operators can also be created by name from an attribute map using an
//! [`OpRegistry`], which is how a compiler front-end usually builds them.
//!
//! # Shape and type inference
//!
//! Given the [`TensorType`]s of its inputs, [`infer_operator`] returns the
//! types of an operator's outputs, or an [`InferError`] if the inputs
//! violate the operator's shape or dtype rules. Dimensions may be unknown,
//! optionally with bounds, and small constant inputs are folded so that
//! shape-computing subgraphs produce known values.
//!
//! ```
//! use opshape::ops::Add;
//! use opshape::{DataType, InferContext, TensorType, infer_operator};
//!
//! let x = TensorType::tensor(DataType::Float32, [2, 1, 4]);
//! let y = TensorType::tensor(DataType::Float32, [3, 1]);
//! let out = infer_operator(&Add {}, &[x, y], &InferContext::default())
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(out.outputs[0].shape().to_fixed(), Some(vec![2, 3, 4]));
//! ```
//!
//! Inference behavior that depends on the compilation target, such as the
//! platforms on which a data layout is allowed, is configured through an
//! [`InferContext`].
//!
//! # Batching
//!
//! The [`vmap`] module contains batching rules, which rewrite an operator
//! applied to batched inputs into operators applied to the whole batch at
//! once.
//!
//! # Logging
//!
//! Inference and batching emit [`tracing`](https://docs.rs/tracing) events
//! at `debug` and `trace` level. Install a subscriber in the host
//! application to see them.

mod attrs;
mod context;
mod dtype;
mod env;
mod error;
mod op_registry;
mod operator;
mod shape;
mod tensor_type;
mod validator;
mod value;

pub mod const_eval;
pub mod ops;
pub mod vmap;

pub use attrs::{AttrKind, AttrValue, Attributes};
pub use context::{InferContext, TargetPlatform};
pub use dtype::{DataType, TypeClass, ValueType};
pub use error::{ConfigError, InferError, VmapError};
pub use op_registry::{AttrReader, FromAttr, OpRegistry, ReadOp};
pub use operator::{Inference, InferOutput, InferSplit, InferTypes, OpNode, Operator, infer_operator};
pub use shape::{Dim, Shape};
pub use tensor_type::TensorType;
pub use value::ConstValue;
