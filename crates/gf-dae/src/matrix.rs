//! Jacobian assembly sinks.
//!
//! Models never see the solver's matrix format; they emit `(row, col,
//! value)` contributions through [`MatrixSink`]. Contributions to the same
//! coordinate accumulate. The dense backing is `nalgebra::DMatrix`; the
//! [`Triplets`] buffer exists for chained models that need to re-map
//! columns before forwarding entries (a filter block whose input column is
//! only known to its container, for example).

use gf_core::{Real, NO_LOCATION};
use nalgebra::DMatrix;

pub trait MatrixSink {
    fn assign(&mut self, row: usize, col: usize, value: Real);

    /// Like `assign`, but silently drops the entry when the column is
    /// [`NO_LOCATION`] (an input that is not part of the state vector).
    fn assign_check_col(&mut self, row: usize, col: usize, value: Real) {
        if col != NO_LOCATION {
            self.assign(row, col, value);
        }
    }
}

impl MatrixSink for DMatrix<Real> {
    fn assign(&mut self, row: usize, col: usize, value: Real) {
        self[(row, col)] += value;
    }
}

/// Append-only `(row, col, value)` buffer.
#[derive(Clone, Debug, Default)]
pub struct Triplets {
    entries: Vec<(usize, usize, Real)>,
}

impl Triplets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, usize, Real)> {
        self.entries.iter()
    }
}

impl MatrixSink for Triplets {
    fn assign(&mut self, row: usize, col: usize, value: Real) {
        self.entries.push((row, col, value));
    }
}

/// Sentinel column for entries whose true column is only known to the
/// caller. Never a valid index; must be translated by a [`ColumnRemap`].
pub const REMAP_COLUMN: usize = usize::MAX - 1;

/// Sink adapter that translates [`REMAP_COLUMN`] entries to one or more
/// real columns, scaling by a chain-rule factor per target. Lets a
/// container chain a sub-model's input partials onto columns (and gains)
/// the sub-model cannot see.
pub struct ColumnRemap<'a> {
    inner: &'a mut dyn MatrixSink,
    targets: &'a [(usize, Real)],
}

impl<'a> ColumnRemap<'a> {
    pub fn new(inner: &'a mut dyn MatrixSink, targets: &'a [(usize, Real)]) -> Self {
        Self { inner, targets }
    }
}

impl MatrixSink for ColumnRemap<'_> {
    fn assign(&mut self, row: usize, col: usize, value: Real) {
        if col == REMAP_COLUMN {
            for &(target, factor) in self.targets {
                if target != NO_LOCATION {
                    self.inner.assign(row, target, value * factor);
                }
            }
        } else {
            self.inner.assign(row, col, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_sink_accumulates() {
        let mut m = DMatrix::<Real>::zeros(2, 2);
        m.assign(0, 1, 2.0);
        m.assign(0, 1, 0.5);
        m.assign(1, 0, -1.0);
        assert_eq!(m[(0, 1)], 2.5);
        assert_eq!(m[(1, 0)], -1.0);
        assert_eq!(m[(0, 0)], 0.0);
    }

    #[test]
    fn check_col_drops_unlocated_inputs() {
        let mut m = DMatrix::<Real>::zeros(2, 2);
        m.assign_check_col(0, NO_LOCATION, 5.0);
        m.assign_check_col(1, 1, 5.0);
        assert_eq!(m[(1, 1)], 5.0);
        assert_eq!(m.sum(), 5.0);
    }

    #[test]
    fn triplets_preserve_insertion_order() {
        let mut t = Triplets::new();
        t.assign(3, 0, 1.0);
        t.assign(1, 2, -2.0);
        let got: Vec<_> = t.iter().copied().collect();
        assert_eq!(got, vec![(3, 0, 1.0), (1, 2, -2.0)]);
        t.clear();
        assert!(t.is_empty());
    }

    #[test]
    fn column_remap_translates_and_scales() {
        let mut m = DMatrix::<Real>::zeros(3, 3);
        let targets = [(0, 2.0), (2, 1.0), (NO_LOCATION, 4.0)];
        let mut remap = ColumnRemap::new(&mut m, &targets);
        remap.assign(1, REMAP_COLUMN, 3.0);
        remap.assign(1, 1, -1.0);
        assert_eq!(m[(1, 0)], 6.0);
        assert_eq!(m[(1, 2)], 3.0);
        assert_eq!(m[(1, 1)], -1.0);
    }
}
