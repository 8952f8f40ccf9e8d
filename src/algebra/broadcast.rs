//! algebra::broadcast — NumPy-style batch broadcasting for core-rank routines.
//!
//! Purpose
//! -------
//! Every batched routine in [`crate::algebra::batched`] acts on a small
//! "core" block (a vector or a matrix) stored in the trailing axes of an
//! array, and loops over all leading "batch" axes. This module owns the
//! shape bookkeeping for that loop so the numerical kernels only ever see
//! plain `Ix1`/`Ix2` views.
//!
//! Key behaviors
//! -------------
//! - [`broadcast_shapes`] combines two batch shapes with the NumPy rules:
//!   shapes are aligned from the trailing end, missing axes count as 1 and
//!   size-1 axes stretch to match the other operand.
//! - [`zip_batches`] / [`map_batches`] broadcast the operands to the common
//!   batch shape, allocate the output and call a kernel once per batch
//!   position with the batch index for error context.
//!
//! Invariants & assumptions
//! ------------------------
//! - Core ranks are fixed per routine (1 for vectors, 2 for matrices, 0 for
//!   scalars). Operands with fewer axes than their core rank are rejected.
//! - Broadcasting never copies the inputs; only the output is allocated.
//!
//! Conventions
//! -----------
//! - An operand with no batch axes behaves as a single batch entry and is
//!   shared by every position of the other operand.
//! - Shape failures surface as [`LinalgError::RankTooLow`] or
//!   [`LinalgError::BroadcastMismatch`].
use crate::algebra::errors::{LinalgError, LinalgResult};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Axis, Dimension, IxDyn};

/// Broadcast two batch shapes against each other.
///
/// # Errors
/// [`LinalgError::BroadcastMismatch`] when an axis differs and neither side
/// has size 1.
pub fn broadcast_shapes(
    op: &'static str, left: &[usize], right: &[usize],
) -> LinalgResult<Vec<usize>> {
    let n = left.len().max(right.len());
    let (pad_l, pad_r) = (n - left.len(), n - right.len());
    let mut out = Vec::with_capacity(n);
    for k in 0..n {
        let l = if k < pad_l { 1 } else { left[k - pad_l] };
        let r = if k < pad_r { 1 } else { right[k - pad_r] };
        let dim = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => {
                return Err(LinalgError::BroadcastMismatch {
                    op,
                    left: left.to_vec(),
                    right: right.to_vec(),
                });
            }
        };
        out.push(dim);
    }
    Ok(out)
}

/// Split a shape into `(batch, core)` where `core` has `core_rank` axes.
pub fn split_core<'s>(
    op: &'static str, operand: &'static str, shape: &'s [usize], core_rank: usize,
) -> LinalgResult<(&'s [usize], &'s [usize])> {
    if shape.len() < core_rank {
        return Err(LinalgError::RankTooLow { op, operand, ndim: shape.len(), core: core_rank });
    }
    Ok(shape.split_at(shape.len() - core_rank))
}

/// Trailing `core_rank` axes of `shape`, owned.
pub fn core_shape(
    op: &'static str, operand: &'static str, shape: &[usize], core_rank: usize,
) -> LinalgResult<Vec<usize>> {
    Ok(split_core(op, operand, shape, core_rank)?.1.to_vec())
}

/// Broadcast a whole array (batch and core axes) to `shape`.
pub fn broadcast_to<'a>(
    op: &'static str, view: &'a ArrayViewD<'_, f64>, shape: &[usize],
) -> LinalgResult<ArrayViewD<'a, f64>> {
    view.broadcast(IxDyn(shape)).ok_or_else(|| LinalgError::BroadcastMismatch {
        op,
        left: view.shape().to_vec(),
        right: shape.to_vec(),
    })
}

/// Run `kernel` on every broadcast batch position of `(a, b)`.
///
/// # Arguments
/// - `a_core` / `b_core`: core ranks of the two operands.
/// - `out_core`: core shape of the output at each batch position.
/// - `kernel(index, a_block, b_block, out_block)`: writes one output block.
///
/// # Returns
/// An array of shape `batch ++ out_core`.
pub fn zip_batches<F>(
    op: &'static str, a: ArrayViewD<'_, f64>, a_core: usize, b: ArrayViewD<'_, f64>,
    b_core: usize, out_core: &[usize], mut kernel: F,
) -> LinalgResult<ArrayD<f64>>
where
    F: FnMut(&[usize], ArrayViewD<'_, f64>, ArrayViewD<'_, f64>, ArrayViewMutD<'_, f64>) -> LinalgResult<()>,
{
    let (a_batch, a_tail) = split_core(op, "left", a.shape(), a_core)?;
    let (b_batch, b_tail) = split_core(op, "right", b.shape(), b_core)?;
    let batch = broadcast_shapes(op, a_batch, b_batch)?;

    let a_shape: Vec<usize> = batch.iter().chain(a_tail).copied().collect();
    let b_shape: Vec<usize> = batch.iter().chain(b_tail).copied().collect();
    let out_shape: Vec<usize> = batch.iter().chain(out_core).copied().collect();
    let a_full = broadcast_to(op, &a, &a_shape)?;
    let b_full = broadcast_to(op, &b, &b_shape)?;

    let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));
    for index in ndarray::indices(IxDyn(&batch)) {
        let idx = index.slice();
        kernel(
            idx,
            batch_block(a_full.view(), idx),
            batch_block(b_full.view(), idx),
            batch_block_mut(out.view_mut(), idx),
        )?;
    }
    Ok(out)
}

/// Unary counterpart of [`zip_batches`].
pub fn map_batches<F>(
    op: &'static str, a: ArrayViewD<'_, f64>, a_core: usize, out_core: &[usize], mut kernel: F,
) -> LinalgResult<ArrayD<f64>>
where
    F: FnMut(&[usize], ArrayViewD<'_, f64>, ArrayViewMutD<'_, f64>) -> LinalgResult<()>,
{
    let (batch, _) = split_core(op, "operand", a.shape(), a_core)?;
    let batch = batch.to_vec();
    let out_shape: Vec<usize> = batch.iter().chain(out_core).copied().collect();

    let mut out = ArrayD::<f64>::zeros(IxDyn(&out_shape));
    for index in ndarray::indices(IxDyn(&batch)) {
        let idx = index.slice();
        kernel(idx, batch_block(a.view(), idx), batch_block_mut(out.view_mut(), idx))?;
    }
    Ok(out)
}

/// Sub-view at a batch position: drops one leading axis per index entry.
pub fn batch_block<'a>(view: ArrayViewD<'a, f64>, index: &[usize]) -> ArrayViewD<'a, f64> {
    index.iter().fold(view, |v, &i| v.index_axis_move(Axis(0), i))
}

fn batch_block_mut<'a>(view: ArrayViewMutD<'a, f64>, index: &[usize]) -> ArrayViewMutD<'a, f64> {
    index.iter().fold(view, |v, &i| v.index_axis_move(Axis(0), i))
}
