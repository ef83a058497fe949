use crate::attrs::{AttrValue, Attributes};
use crate::const_eval;
use crate::context::InferContext;
use crate::dtype::INDEX_TYPES;
use crate::error::{ConfigError, InferError};
use crate::operator::{InferOutput, InferTypes, impl_operator};
use crate::ops::{check_dtype, fold_value};
use crate::shape::{Dim, Shape};
use crate::tensor_type::TensorType;
use crate::validator::check_non_negative_int;

/// How one output axis is produced from the input.
#[derive(Clone, Copy, Debug, PartialEq)]
enum AxisPlan {
    /// Pass input axis through unchanged.
    Full(usize),

    /// Slice an input axis with slice entry `pos`.
    Slice { axis: usize, pos: usize },

    /// Select one index of an input axis with slice entry `pos`. The axis is
    /// removed from the output.
    Shrink { axis: usize, pos: usize },

    /// Insert an axis of size 1.
    NewAxis,
}

/// Positions selected along one axis by a slice.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SliceRange {
    start: i64,
    len: usize,
    stride: i64,
}

impl SliceRange {
    fn indices(&self) -> Vec<usize> {
        (0..self.len as i64)
            .map(|i| (self.start + i * self.stride) as usize)
            .collect()
    }
}

/// Resolve `begin:end:stride` against an axis of size `dim`.
///
/// Negative indices count from the end. Out of range indices are clamped
/// and an empty range has length zero. Masked bounds select the whole axis
/// in the direction of the stride.
fn slice_range(
    dim: usize,
    begin: i64,
    end: i64,
    stride: i64,
    begin_masked: bool,
    end_masked: bool,
) -> SliceRange {
    let dim = dim as i64;
    let wrap = |x: i64| if x < 0 { x + dim } else { x };

    let (start, len) = if stride > 0 {
        let start = if begin_masked { 0 } else { wrap(begin).clamp(0, dim) };
        let end = if end_masked { dim } else { wrap(end).clamp(0, dim) };
        let len = if end > start {
            (end - start + stride - 1) / stride
        } else {
            0
        };
        (start, len)
    } else {
        let start = if begin_masked {
            dim - 1
        } else {
            wrap(begin).clamp(-1, dim - 1)
        };
        let end = if end_masked { -1 } else { wrap(end).clamp(-1, dim - 1) };
        let step = -stride;
        let len = if start > end {
            (start - end + step - 1) / step
        } else {
            0
        };
        (start, len)
    };
    SliceRange {
        start,
        len: len as usize,
        stride,
    }
}

/// Extract a strided slice of a tensor.
///
/// `begin`, `end` and `strides` are inputs. Bit `i` of each mask modifies
/// slice entry `i`: `begin_mask`/`end_mask` ignore the bound, `ellipsis_mask`
/// expands to as many whole axes as needed, `new_axis_mask` inserts a size 1
/// axis and `shrink_axis_mask` selects a single index and drops the axis.
#[derive(Clone, Debug, Default)]
pub struct StridedSlice {
    pub begin_mask: i64,
    pub end_mask: i64,
    pub ellipsis_mask: i64,
    pub new_axis_mask: i64,
    pub shrink_axis_mask: i64,
}

impl StridedSlice {
    pub fn new(
        begin_mask: i64,
        end_mask: i64,
        ellipsis_mask: i64,
        new_axis_mask: i64,
        shrink_axis_mask: i64,
    ) -> Result<StridedSlice, ConfigError> {
        for (name, mask) in [
            ("begin_mask", begin_mask),
            ("end_mask", end_mask),
            ("ellipsis_mask", ellipsis_mask),
            ("new_axis_mask", new_axis_mask),
            ("shrink_axis_mask", shrink_axis_mask),
        ] {
            check_non_negative_int("StridedSlice", name, mask)?;
        }
        if ellipsis_mask.count_ones() > 1 {
            return Err(ConfigError::OutOfRange {
                op: "StridedSlice".into(),
                attr: "ellipsis_mask".into(),
                requirement: "at most one bit set".into(),
                got: format!("{:#b}", ellipsis_mask),
            });
        }
        Ok(StridedSlice {
            begin_mask,
            end_mask,
            ellipsis_mask,
            new_axis_mask,
            shrink_axis_mask,
        })
    }

    fn has_masks(&self) -> bool {
        self.ellipsis_mask != 0 || self.new_axis_mask != 0 || self.shrink_axis_mask != 0
    }

    /// Map slice entries and remaining input axes to output axes.
    fn plan(&self, ndim: usize, spec_len: usize) -> Result<Vec<AxisPlan>, InferError> {
        let bit = |mask: i64, i: usize| i < 64 && (mask as u64 >> i) & 1 == 1;

        let mut plan = Vec::with_capacity(ndim + spec_len);
        let mut axis = 0;
        for pos in 0..spec_len {
            if bit(self.ellipsis_mask, pos) {
                let consumed_after = (pos + 1..spec_len)
                    .filter(|&k| !bit(self.new_axis_mask, k))
                    .count();
                let span = ndim.checked_sub(axis + consumed_after).ok_or_else(|| {
                    InferError::shape(
                        "StridedSlice",
                        format!("the slice has more entries than the input rank {}", ndim),
                    )
                })?;
                for _ in 0..span {
                    plan.push(AxisPlan::Full(axis));
                    axis += 1;
                }
            } else if bit(self.new_axis_mask, pos) {
                plan.push(AxisPlan::NewAxis);
            } else {
                if axis >= ndim {
                    return Err(InferError::shape(
                        "StridedSlice",
                        format!("the slice has more entries than the input rank {}", ndim),
                    ));
                }
                if bit(self.shrink_axis_mask, pos) {
                    plan.push(AxisPlan::Shrink { axis, pos });
                } else {
                    plan.push(AxisPlan::Slice { axis, pos });
                }
                axis += 1;
            }
        }
        while axis < ndim {
            plan.push(AxisPlan::Full(axis));
            axis += 1;
        }
        Ok(plan)
    }

    fn masked(mask: i64, pos: usize) -> bool {
        pos < 64 && (mask as u64 >> pos) & 1 == 1
    }

    /// Output size of an axis whose slice is not known at compile time.
    fn estimate(dim: Dim) -> Dim {
        match dim {
            Dim::Known(1) => Dim::Known(1),
            _ => Dim::Unknown,
        }
    }

    fn infer_dynamic(&self, dims: &[Dim], spec_len: Option<usize>) -> Result<Shape, InferError> {
        let Some(spec_len) = spec_len else {
            if self.has_masks() {
                return Ok(Shape::UnknownRank);
            }
            return Ok(Shape::new(dims.iter().map(|&d| Self::estimate(d))));
        };
        let plan = self.plan(dims.len(), spec_len)?;
        let out = plan.iter().filter_map(|item| match *item {
            AxisPlan::Full(axis) => Some(dims[axis]),
            AxisPlan::Slice { axis, .. } => Some(Self::estimate(dims[axis])),
            AxisPlan::Shrink { .. } => None,
            AxisPlan::NewAxis => Some(Dim::Known(1)),
        });
        Ok(Shape::new(out))
    }
}

impl InferTypes for StridedSlice {
    fn infer(&self, inputs: &[TensorType], ctx: &InferContext) -> Result<InferOutput, InferError> {
        let [x, begin, end, strides] = inputs else {
            return Err(InferError::shape("StridedSlice", "expected 4 inputs"));
        };
        for (name, input) in [("begin", begin), ("end", end), ("strides", strides)] {
            check_dtype("StridedSlice", name, input.dtype(), INDEX_TYPES)?;
        }
        let Some(dims) = x.shape().dims() else {
            return Ok(InferOutput::single(TensorType::new(x.dtype(), Shape::UnknownRank)));
        };

        let (Some(begin), Some(end), Some(strides)) =
            (begin.value_i64s(), end.value_i64s(), strides.value_i64s())
        else {
            let spec_len = [begin, end, strides]
                .iter()
                .find_map(|t| match t.shape().dims() {
                    Some([Dim::Known(n)]) => Some(*n),
                    _ => None,
                });
            let shape = self.infer_dynamic(dims, spec_len)?;
            return Ok(InferOutput::single(TensorType::new(x.dtype(), shape)));
        };

        if begin.len() != end.len() || begin.len() != strides.len() {
            return Err(InferError::shape(
                "StridedSlice",
                format!(
                    "the lengths of 'begin' {:?}, 'end' {:?} and 'strides' {:?} must be equal",
                    begin, end, strides
                ),
            ));
        }
        if let Some(pos) = strides.iter().position(|&s| s == 0) {
            return Err(InferError::shape(
                "StridedSlice",
                format!("the 'strides' must not contain 0, but strides[{}] is 0", pos),
            ));
        }

        let plan = self.plan(dims.len(), begin.len())?;
        let mut out_dims = Vec::with_capacity(plan.len());

        // Positions taken from each input axis, for folding. `None` once an
        // axis of unknown size is seen.
        let mut positions: Option<Vec<Vec<usize>>> = Some(Vec::with_capacity(dims.len()));

        for item in plan {
            match item {
                AxisPlan::Full(axis) => {
                    out_dims.push(dims[axis]);
                    let all = dims[axis].known().map(|d| (0..d).collect());
                    positions = positions.zip(all).map(|(mut p, a)| {
                        p.push(a);
                        p
                    });
                }
                AxisPlan::NewAxis => out_dims.push(Dim::Known(1)),
                AxisPlan::Slice { axis, pos } => {
                    let Dim::Known(dim) = dims[axis] else {
                        out_dims.push(Dim::Unknown);
                        positions = None;
                        continue;
                    };
                    let range = slice_range(
                        dim,
                        begin[pos],
                        end[pos],
                        strides[pos],
                        Self::masked(self.begin_mask, pos),
                        Self::masked(self.end_mask, pos),
                    );
                    out_dims.push(Dim::Known(range.len));
                    if let Some(p) = positions.as_mut() {
                        p.push(range.indices());
                    }
                }
                AxisPlan::Shrink { axis, pos } => {
                    if strides[pos] <= 0 {
                        return Err(InferError::index(
                            "StridedSlice",
                            format!(
                                "the stride of a shrunk axis must be positive, but got {}",
                                strides[pos]
                            ),
                        ));
                    }
                    let Dim::Known(dim) = dims[axis] else {
                        positions = None;
                        continue;
                    };
                    let index = begin[pos];
                    if index < -(dim as i64) || index >= dim as i64 {
                        return Err(InferError::index(
                            "StridedSlice",
                            format!(
                                "the 'begin' {} of shrunk axis {} must be in range [{}, {})",
                                index,
                                axis,
                                -(dim as i64),
                                dim
                            ),
                        ));
                    }
                    let index = if index < 0 { index + dim as i64 } else { index };
                    if let Some(p) = positions.as_mut() {
                        p.push(vec![index as usize]);
                    }
                }
            }
        }

        let output = TensorType::new(x.dtype(), Shape::new(out_dims));
        let output = match (x.value(), positions, output.shape().to_fixed()) {
            (Some(value), Some(positions), Some(out_shape)) => {
                fold_value("StridedSlice", ctx, output, || {
                    const_eval::gather_axes(value, &positions, &out_shape)
                })?
            }
            _ => output,
        };
        Ok(InferOutput::single(output))
    }
}

impl_operator!(
    StridedSlice,
    ["input_x", "begin", "end", "strides"] -> ["output"],
    full,
    attrs = |op| Attributes::from([
        ("begin_mask", AttrValue::Int(op.begin_mask)),
        ("end_mask", AttrValue::Int(op.end_mask)),
        ("ellipsis_mask", AttrValue::Int(op.ellipsis_mask)),
        ("new_axis_mask", AttrValue::Int(op.new_axis_mask)),
        ("shrink_axis_mask", AttrValue::Int(op.shrink_axis_mask)),
    ])
);
