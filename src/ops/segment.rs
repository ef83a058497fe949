use crate::attrs::{AttrValue, Attributes};
use crate::context::InferContext;
use crate::dtype::{DataType, FLOAT_TYPES, INDEX_TYPES, REAL_TYPES};
use crate::error::InferError;
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{BatchRankOp, check_dtype, check_tensor_dtype, dims_compatible};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;

/// Check that the shape of `segment_ids` is a prefix of the shape of
/// `input_x` and has rank `batch_rank + 1`.
fn check_segment_ids(
    op: &str,
    x: &[Dim],
    ids: &[Dim],
    batch_rank: usize,
) -> Result<(), InferError> {
    if ids.len() != batch_rank + 1 {
        return Err(InferError::shape(
            op,
            format!(
                "the rank of 'segment_ids' must be {}, but got {}",
                batch_rank + 1,
                ids.len()
            ),
        ));
    }
    let is_prefix =
        ids.len() <= x.len() && ids.iter().zip(x).all(|(&a, &b)| dims_compatible(a, b));
    if !is_prefix {
        return Err(InferError::shape(
            op,
            format!(
                "the shape of 'segment_ids' {} must be a prefix of the shape of 'input_x' {}",
                Shape::new(ids.iter().copied()),
                Shape::new(x.iter().copied())
            ),
        ));
    }
    Ok(())
}

/// Shape law of the unsorted segment reductions.
///
/// The output is `segment_ids.shape[:batch_rank] + [num_segments] +
/// input_x.shape[segment_ids.rank:]`.
fn infer_unsorted_segment(
    op: &str,
    batch_rank: usize,
    ids_types: &[DataType],
    inputs: &[TensorType],
) -> Result<InferOutput, InferError> {
    let [x, ids, num_segments] = inputs else {
        return Err(InferError::shape(op, "expected 3 inputs"));
    };
    check_tensor_dtype(op, "input_x", x.dtype(), REAL_TYPES)?;
    check_dtype(op, "segment_ids", ids.dtype(), ids_types)?;
    check_dtype(op, "num_segments", num_segments.dtype(), INDEX_TYPES)?;

    let segments = match num_segments.value().and_then(|v| v.to_i64_scalar()) {
        Some(n) if n <= 0 => {
            return Err(InferError::shape(
                op,
                format!("the 'num_segments' must be positive, but got {}", n),
            ));
        }
        Some(n) => Dim::Known(n as usize),
        None => Dim::Unknown,
    };

    let (Some(x_dims), Some(id_dims)) = (x.shape().dims(), ids.shape().dims()) else {
        return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
    };
    check_segment_ids(op, x_dims, id_dims, batch_rank)?;

    let out_dims = id_dims[..batch_rank]
        .iter()
        .copied()
        .chain([segments])
        .chain(x_dims[id_dims.len()..].iter().copied());
    let output = TensorType::new(x.dtype(), Shape::new(out_dims));
    Ok(InferOutput::single(output))
}

macro_rules! unsorted_segment_op {
    ($op:ident, $ids_types:expr) => {
        #[derive(Clone, Debug, Default)]
        pub struct $op {
            /// Number of leading batch axes added by vmap.
            pub batch_rank: usize,
        }

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_unsorted_segment(stringify!($op), self.batch_rank, $ids_types, inputs)
            }
        }

        impl BatchRankOp for $op {
            fn batch_rank(&self) -> usize {
                self.batch_rank
            }

            fn with_batch_rank(&self, batch_rank: usize) -> Self {
                $op { batch_rank }
            }
        }

        impl_operator!(
            $op,
            ["input_x", "segment_ids", "num_segments"] -> ["output"],
            full,
            attrs = |op| Attributes::from([("batch_rank", AttrValue::Int(op.batch_rank as i64))])
        );
    };
}

unsorted_segment_op!(UnsortedSegmentSum, INDEX_TYPES);
unsorted_segment_op!(UnsortedSegmentMin, INDEX_TYPES);
unsorted_segment_op!(UnsortedSegmentMax, INDEX_TYPES);
unsorted_segment_op!(UnsortedSegmentProd, INDEX_TYPES);

/// Shape law of the sorted segment reductions.
///
/// The number of segments is `max(segment_ids) + 1`, which is only known
/// when `segment_ids` is constant.
fn infer_segment(op: &str, valid: &[DataType], inputs: &[TensorType]) -> Result<InferOutput, InferError> {
    let [x, ids] = inputs else {
        return Err(InferError::shape(op, "expected 2 inputs"));
    };
    check_tensor_dtype(op, "input_x", x.dtype(), valid)?;
    check_dtype(op, "segment_ids", ids.dtype(), INDEX_TYPES)?;

    let segments = match ids.value_i64s() {
        Some(values) => {
            let sorted = values.windows(2).all(|w| w[0] <= w[1]);
            if !sorted || values.first().is_some_and(|&v| v < 0) {
                return Err(InferError::shape(
                    op,
                    format!(
                        "the 'segment_ids' must be sorted and non-negative, but got {:?}",
                        values
                    ),
                ));
            }
            values.last().map(|&v| Dim::Known(v as usize + 1)).unwrap_or(Dim::Known(0))
        }
        None => Dim::Unknown,
    };

    let (Some(x_dims), Some(id_dims)) = (x.shape().dims(), ids.shape().dims()) else {
        return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
    };
    check_segment_ids(op, x_dims, id_dims, 0)?;

    let out_dims = [segments].into_iter().chain(x_dims[1..].iter().copied());
    Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::new(out_dims))))
}

macro_rules! segment_op {
    ($op:ident, $valid:expr) => {
        #[derive(Clone, Debug, Default)]
        pub struct $op {}

        impl InferTypes for $op {
            fn infer(&self, inputs: &[TensorType], _ctx: &InferContext) -> Result<InferOutput, InferError> {
                infer_segment(stringify!($op), $valid, inputs)
            }
        }

        impl_operator!($op, ["input_x", "segment_ids"] -> ["output"], full);
    };
}

segment_op!(SegmentSum, REAL_TYPES);
segment_op!(SegmentMax, REAL_TYPES);
segment_op!(SegmentMin, REAL_TYPES);
segment_op!(SegmentMean, FLOAT_TYPES);
segment_op!(SegmentProd, REAL_TYPES);
