//! Constant evaluator used by inference to fold outputs whose inputs are all
//! compile-time constants.
//!
//! Only the small set of operations needed by the folding operators is
//! supported. Each function returns `None` when it cannot fold, in which case
//! inference produces an output without a value.

use rten_tensor::Tensor;
use rten_tensor::prelude::*;

use crate::value::ConstValue;

/// Return row-major strides for a shape.
pub(crate) fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Apply a shape-changing function to the flat elements of a constant.
///
/// `$f` receives the shape and elements and returns the new shape and
/// elements, or `None`.
macro_rules! map_flat {
    ($value:expr, $f:expr) => {
        match $value {
            ConstValue::Bool(t) => {
                let (shape, data) = $f(t.shape(), t.to_vec())?;
                Some(ConstValue::bools(&shape, data))
            }
            ConstValue::Int(t) => {
                let (shape, data) = $f(t.shape(), t.to_vec())?;
                Some(ConstValue::ints(&shape, data))
            }
            ConstValue::Float(t) => {
                let (shape, data) = $f(t.shape(), t.to_vec())?;
                Some(ConstValue::floats(&shape, data))
            }
            ConstValue::Type(_) => None,
        }
    };
}

/// Collect the tensors of one variant from a list of constants, or return
/// `None` if the variants differ.
macro_rules! same_variant {
    ($values:expr, $variant:ident) => {
        $values
            .iter()
            .map(|v| match v {
                ConstValue::$variant(t) => Some(t),
                _ => None,
            })
            .collect::<Option<Vec<&Tensor<_>>>>()
    };
}

/// Permute the axes of a constant.
pub fn transpose(value: &ConstValue, perm: &[usize]) -> Option<ConstValue> {
    map_flat!(value, |shape: &[usize], data| transpose_flat(shape, data, perm))
}

fn transpose_flat<T: Copy>(
    shape: &[usize],
    data: Vec<T>,
    perm: &[usize],
) -> Option<(Vec<usize>, Vec<T>)> {
    if perm.len() != shape.len() {
        return None;
    }
    let in_strides = strides(shape);
    let out_shape: Vec<usize> = perm.iter().map(|&p| shape[p]).collect();
    let indices: Vec<Vec<usize>> = out_shape.iter().map(|&n| (0..n).collect()).collect();
    let perm_strides: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();
    Some((out_shape, gather_with_strides(&data, &indices, &perm_strides)))
}

/// Broadcast a constant to `shape` using numpy-style rules.
pub fn broadcast_to(value: &ConstValue, shape: &[usize]) -> Option<ConstValue> {
    map_flat!(value, |in_shape: &[usize], data| broadcast_flat(
        in_shape, data, shape
    ))
}

fn broadcast_flat<T: Copy>(
    in_shape: &[usize],
    data: Vec<T>,
    out_shape: &[usize],
) -> Option<(Vec<usize>, Vec<T>)> {
    if in_shape.len() > out_shape.len() {
        return None;
    }
    let pad = out_shape.len() - in_shape.len();
    let in_strides = strides(in_shape);
    let mut eff_strides = vec![0; out_shape.len()];
    for (i, &size) in in_shape.iter().enumerate() {
        let out_size = out_shape[pad + i];
        if size == out_size {
            eff_strides[pad + i] = in_strides[i];
        } else if size != 1 {
            return None;
        }
    }
    let indices: Vec<Vec<usize>> = out_shape.iter().map(|&n| (0..n).collect()).collect();
    Some((
        out_shape.to_vec(),
        gather_with_strides(&data, &indices, &eff_strides),
    ))
}

/// Select elements of a constant along every axis.
///
/// `indices[i]` lists the positions taken from axis `i`. The result has
/// shape `indices.map(len)` and is then reshaped to `out_shape`.
pub fn gather_axes(
    value: &ConstValue,
    indices: &[Vec<usize>],
    out_shape: &[usize],
) -> Option<ConstValue> {
    map_flat!(value, |shape: &[usize], data: Vec<_>| {
        if indices.len() != shape.len()
            || indices
                .iter()
                .zip(shape)
                .any(|(idx, &size)| idx.iter().any(|&i| i >= size))
        {
            return None;
        }
        let out = gather_with_strides(&data, indices, &strides(shape));
        if out.len() != out_shape.iter().product::<usize>() {
            return None;
        }
        Some((out_shape.to_vec(), out))
    })
}

/// Visit the cartesian product of `indices` in row-major order and read
/// `data[sum(index * stride)]` for each.
fn gather_with_strides<T: Copy>(data: &[T], indices: &[Vec<usize>], strides: &[usize]) -> Vec<T> {
    let total: usize = indices.iter().map(|idx| idx.len()).product();
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return out;
    }
    let ndim = indices.len();
    let mut pos = vec![0usize; ndim];
    for _ in 0..total {
        let offset: usize = (0..ndim).map(|i| indices[i][pos[i]] * strides[i]).sum();
        out.push(data[offset]);

        for i in (0..ndim).rev() {
            pos[i] += 1;
            if pos[i] < indices[i].len() {
                break;
            }
            pos[i] = 0;
        }
    }
    out
}

/// How [`pad`] fills positions outside the input.
#[derive(Clone, Debug, PartialEq)]
pub enum PadFill {
    /// Fill with a scalar constant.
    Constant(ConstValue),
    /// Repeat the nearest edge element.
    Edge,
    /// Mirror the input, excluding the edge element.
    Reflect,
}

/// Pad each axis of a constant by `(before, after)` elements.
///
/// Negative amounts crop the axis.
pub fn pad(value: &ConstValue, pads: &[[i64; 2]], fill: &PadFill) -> Option<ConstValue> {
    let shape = value.shape();
    if pads.len() != shape.len() {
        return None;
    }
    let sources = shape
        .iter()
        .zip(pads)
        .map(|(&size, &pad)| pad_sources(size, pad, fill))
        .collect::<Option<Vec<_>>>()?;
    let constant = match fill {
        PadFill::Constant(c) => Some(c),
        PadFill::Edge | PadFill::Reflect => None,
    };
    match value {
        ConstValue::Bool(t) => {
            let fill = constant.map(|c| c.to_i64_scalar().map(|x| x != 0));
            let (shape, data) = pad_flat(t.shape(), &t.to_vec(), &sources, fill)?;
            Some(ConstValue::bools(&shape, data))
        }
        ConstValue::Int(t) => {
            let fill = constant.map(|c| c.to_i64_scalar());
            let (shape, data) = pad_flat(t.shape(), &t.to_vec(), &sources, fill)?;
            Some(ConstValue::ints(&shape, data))
        }
        ConstValue::Float(t) => {
            let fill = constant.map(|c| c.to_f64_scalar());
            let (shape, data) = pad_flat(t.shape(), &t.to_vec(), &sources, fill)?;
            Some(ConstValue::floats(&shape, data))
        }
        ConstValue::Type(_) => None,
    }
}

/// Return the input position read by each output position of a padded
/// axis, or `None` where the fill value is used.
fn pad_sources(size: usize, [before, after]: [i64; 2], fill: &PadFill) -> Option<Vec<Option<usize>>> {
    let size = size as i64;
    let len = size + before + after;
    if len < 0 {
        return None;
    }
    (0..len)
        .map(|i| {
            let src = i - before;
            if (0..size).contains(&src) {
                return Some(Some(src as usize));
            }
            match fill {
                PadFill::Constant(_) => Some(None),
                PadFill::Edge if size > 0 => Some(Some(src.clamp(0, size - 1) as usize)),
                PadFill::Reflect if src > -size && src < 2 * size - 1 => {
                    let src = if src < 0 { -src } else { 2 * (size - 1) - src };
                    Some(Some(src as usize))
                }
                PadFill::Edge | PadFill::Reflect => None,
            }
        })
        .collect()
}

fn pad_flat<T: Copy>(
    shape: &[usize],
    data: &[T],
    sources: &[Vec<Option<usize>>],
    fill: Option<Option<T>>,
) -> Option<(Vec<usize>, Vec<T>)> {
    let in_strides = strides(shape);
    let out_shape: Vec<usize> = sources.iter().map(|s| s.len()).collect();
    let total: usize = out_shape.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut pos = vec![0usize; shape.len()];
    for _ in 0..total {
        let offset = pos
            .iter()
            .zip(sources)
            .zip(&in_strides)
            .map(|((&p, src), stride)| src[p].map(|s| s * stride))
            .sum::<Option<usize>>();
        match offset {
            Some(offset) => out.push(data[offset]),
            None => out.push(fill.flatten()?),
        }

        for i in (0..pos.len()).rev() {
            pos[i] += 1;
            if pos[i] < out_shape[i] {
                break;
            }
            pos[i] = 0;
        }
    }
    Some((out_shape, out))
}

/// Concatenate constants along an existing axis.
pub fn concat(values: &[&ConstValue], axis: usize) -> Option<ConstValue> {
    match values.first()? {
        ConstValue::Bool(_) => {
            let (shape, data) = concat_tensors(&same_variant!(values, Bool)?, axis)?;
            Some(ConstValue::bools(&shape, data))
        }
        ConstValue::Int(_) => {
            let (shape, data) = concat_tensors(&same_variant!(values, Int)?, axis)?;
            Some(ConstValue::ints(&shape, data))
        }
        ConstValue::Float(_) => {
            let (shape, data) = concat_tensors(&same_variant!(values, Float)?, axis)?;
            Some(ConstValue::floats(&shape, data))
        }
        ConstValue::Type(_) => None,
    }
}

fn concat_tensors<T: Copy>(parts: &[&Tensor<T>], axis: usize) -> Option<(Vec<usize>, Vec<T>)> {
    let first = parts.first()?.shape();
    if axis >= first.len() {
        return None;
    }
    for part in parts {
        let shape = part.shape();
        if shape.len() != first.len()
            || (0..first.len()).any(|i| i != axis && shape[i] != first[i])
        {
            return None;
        }
    }

    let outer: usize = first[..axis].iter().product();
    let inner: usize = first[axis + 1..].iter().product();
    let chunks: Vec<(usize, Vec<T>)> = parts
        .iter()
        .map(|p| (p.shape()[axis] * inner, p.to_vec()))
        .collect();

    let mut out_shape = first.to_vec();
    out_shape[axis] = parts.iter().map(|p| p.shape()[axis]).sum();
    let mut out = Vec::with_capacity(out_shape.iter().product());
    for o in 0..outer {
        for (chunk, data) in &chunks {
            out.extend_from_slice(&data[o * chunk..(o + 1) * chunk]);
        }
    }
    Some((out_shape, out))
}

/// Stack constants along a new axis.
pub fn stack(values: &[&ConstValue], axis: usize) -> Option<ConstValue> {
    let expanded: Vec<ConstValue> = values
        .iter()
        .map(|v| {
            let mut shape = v.shape();
            if axis > shape.len() {
                return None;
            }
            shape.insert(axis, 1);
            v.reshaped(&shape)
        })
        .collect::<Option<_>>()?;
    let refs: Vec<&ConstValue> = expanded.iter().collect();
    concat(&refs, axis)
}

/// Create a constant of `shape` where every element is the scalar `value`.
pub fn fill(shape: &[usize], value: &ConstValue) -> Option<ConstValue> {
    if value.len() != 1 {
        return None;
    }
    broadcast_to(&value.reshaped(&[])?, shape)
}

/// Elementwise arithmetic folded by the binary operators.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
}

/// Return the numpy-style broadcast of two static shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let ndim = a.len().max(b.len());
    let mut out = Vec::with_capacity(ndim);
    for i in 0..ndim {
        let da = if i + a.len() >= ndim { a[i + a.len() - ndim] } else { 1 };
        let db = if i + b.len() >= ndim { b[i + b.len() - ndim] } else { 1 };
        out.push(match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        });
    }
    Some(out)
}

/// Fold a binary arithmetic operator.
///
/// Integer division and integer overflow are not folded.
pub fn arith(op: Arith, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    let shape = broadcast_shapes(&a.shape(), &b.shape())?;
    match (a, b) {
        (ConstValue::Int(_), ConstValue::Int(_)) => {
            let (ConstValue::Int(x), ConstValue::Int(y)) =
                (broadcast_to(a, &shape)?, broadcast_to(b, &shape)?)
            else {
                return None;
            };
            let data = x
                .iter()
                .zip(y.iter())
                .map(|(&x, &y)| match op {
                    Arith::Add => x.checked_add(y),
                    Arith::Sub => x.checked_sub(y),
                    Arith::Mul => x.checked_mul(y),
                    Arith::Div => None,
                })
                .collect::<Option<Vec<_>>>()?;
            Some(ConstValue::ints(&shape, data))
        }
        (ConstValue::Float(_) | ConstValue::Int(_), ConstValue::Float(_) | ConstValue::Int(_)) => {
            let x = broadcast_to(&ConstValue::floats(&a.shape(), a.to_f64s()?), &shape)?;
            let y = broadcast_to(&ConstValue::floats(&b.shape(), b.to_f64s()?), &shape)?;
            let data = x
                .to_f64s()?
                .into_iter()
                .zip(y.to_f64s()?)
                .map(|(x, y)| match op {
                    Arith::Add => x + y,
                    Arith::Sub => x - y,
                    Arith::Mul => x * y,
                    Arith::Div => x / y,
                })
                .collect();
            Some(ConstValue::floats(&shape, data))
        }
        _ => None,
    }
}

/// Generate `start, start + delta, ...` up to but excluding `limit`.
pub fn range(start: f64, limit: f64, delta: f64, integral: bool) -> Option<ConstValue> {
    if delta == 0.0 {
        return None;
    }
    let len = ((limit - start) / delta).ceil().max(0.) as usize;
    if integral {
        let (start, delta) = (start as i64, delta as i64);
        let data = (0..len as i64).map(|i| start + i * delta).collect();
        Some(ConstValue::ints(&[len], data))
    } else {
        let data = (0..len).map(|i| start + i as f64 * delta).collect();
        Some(ConstValue::floats(&[len], data))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Arith, PadFill, arith, broadcast_to, concat, fill, gather_axes, pad, range, stack, transpose,
    };
    use crate::value::ConstValue;

    #[test]
    fn test_transpose() {
        let value = ConstValue::ints(&[2, 3], vec![1, 2, 3, 4, 5, 6]);
        let result = transpose(&value, &[1, 0]).unwrap();
        assert_eq!(result, ConstValue::ints(&[3, 2], vec![1, 4, 2, 5, 3, 6]));
    }

    #[test]
    fn test_broadcast_to() {
        let value = ConstValue::ints(&[2, 1], vec![1, 2]);
        let result = broadcast_to(&value, &[2, 2, 3]).unwrap();
        assert_eq!(
            result,
            ConstValue::ints(&[2, 2, 3], vec![1, 1, 1, 2, 2, 2, 1, 1, 1, 2, 2, 2])
        );
        assert!(broadcast_to(&value, &[3, 3]).is_none());
    }

    #[test]
    fn test_pad() {
        let value = ConstValue::floats(&[3], vec![1., 2., 3.]);
        let zero = PadFill::Constant(ConstValue::int_scalar(0));
        assert_eq!(
            pad(&value, &[[1, 2]], &zero).unwrap(),
            ConstValue::floats(&[6], vec![0., 1., 2., 3., 0., 0.])
        );
        assert_eq!(
            pad(&value, &[[2, 1]], &PadFill::Reflect).unwrap(),
            ConstValue::floats(&[6], vec![3., 2., 1., 2., 3., 2.])
        );
        assert_eq!(
            pad(&value, &[[2, -1]], &PadFill::Edge).unwrap(),
            ConstValue::floats(&[4], vec![1., 1., 1., 2.])
        );

        // Reflection wider than the axis
        assert!(pad(&value, &[[3, 0]], &PadFill::Reflect).is_none());
        assert!(pad(&value, &[[1, 0], [1, 0]], &zero).is_none());
    }

    #[test]
    fn test_concat_and_stack() {
        let a = ConstValue::ints(&[2, 1], vec![1, 2]);
        let b = ConstValue::ints(&[2, 2], vec![3, 4, 5, 6]);
        let result = concat(&[&a, &b], 1).unwrap();
        assert_eq!(result, ConstValue::ints(&[2, 3], vec![1, 3, 4, 2, 5, 6]));

        let x = ConstValue::int_vec(&[1, 2]);
        let y = ConstValue::int_vec(&[3, 4]);
        assert_eq!(
            stack(&[&x, &y], 0).unwrap(),
            ConstValue::ints(&[2, 2], vec![1, 2, 3, 4])
        );
        assert_eq!(
            stack(&[&x, &y], 1).unwrap(),
            ConstValue::ints(&[2, 2], vec![1, 3, 2, 4])
        );

        // Mixed element storage is not folded.
        let f = ConstValue::floats(&[2], vec![1., 2.]);
        assert!(concat(&[&x, &f], 0).is_none());
    }

    #[test]
    fn test_gather_axes() {
        let value = ConstValue::ints(&[3, 3], (0..9).collect());
        let result = gather_axes(&value, &[vec![2, 0], vec![1]], &[2, 1]).unwrap();
        assert_eq!(result, ConstValue::ints(&[2, 1], vec![7, 1]));
    }

    #[test]
    fn test_fill() {
        let result = fill(&[2, 2], &ConstValue::float_scalar(1.)).unwrap();
        assert_eq!(result, ConstValue::floats(&[2, 2], vec![1.; 4]));
    }

    #[test]
    fn test_arith() {
        let a = ConstValue::ints(&[2, 1], vec![1, 2]);
        let b = ConstValue::int_vec(&[10, 20]);
        assert_eq!(
            arith(Arith::Add, &a, &b).unwrap(),
            ConstValue::ints(&[2, 2], vec![11, 21, 12, 22])
        );
        assert!(arith(Arith::Div, &a, &b).is_none());

        let c = ConstValue::floats(&[2], vec![1., 4.]);
        assert_eq!(
            arith(Arith::Div, &c, &ConstValue::float_scalar(2.)).unwrap(),
            ConstValue::floats(&[2], vec![0.5, 2.])
        );
    }

    #[test]
    fn test_range() {
        assert_eq!(
            range(0., 10., 3., true).unwrap(),
            ConstValue::int_vec(&[0, 3, 6, 9])
        );
        assert_eq!(range(5., 0., 1., true).unwrap(), ConstValue::int_vec(&[]));
        assert!(range(0., 1., 0., false).is_none());
    }
}
