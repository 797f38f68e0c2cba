//! Raw and processed batch payloads.

use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::Array2;
use std::collections::BTreeMap;

/// A slice of the training permutation, as produced by the feeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    /// Position of the slice within one pass over the permutation.
    pub index: usize,
    pub triples: Vec<Triple>,
}

/// Positives aligned with their negatives.
///
/// `nh/nr/nt` hold `neg_rate` entries per positive, grouped by source:
/// negatives `[i * k, (i + 1) * k)` were derived from positive `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairwiseBatch {
    pub source_batch: usize,
    pub ph: Vec<usize>,
    pub pr: Vec<usize>,
    pub pt: Vec<usize>,
    pub nh: Vec<usize>,
    pub nr: Vec<usize>,
    pub nt: Vec<usize>,
}

impl PairwiseBatch {
    /// Negatives per positive.
    pub fn neg_rate(&self) -> usize {
        if self.ph.is_empty() {
            0
        } else {
            self.nh.len() / self.ph.len()
        }
    }

    pub fn positives(&self) -> impl Iterator<Item = Triple> + '_ {
        zip3(&self.ph, &self.pr, &self.pt)
    }

    pub fn negatives(&self) -> impl Iterator<Item = Triple> + '_ {
        zip3(&self.nh, &self.nr, &self.nt)
    }
}

/// Interleaved records: each positive (+1) followed by its negatives (-1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointwiseBatch {
    pub source_batch: usize,
    pub h: Vec<usize>,
    pub r: Vec<usize>,
    pub t: Vec<usize>,
    pub y: Vec<f32>,
}

impl PointwiseBatch {
    pub fn records(&self) -> impl Iterator<Item = (Triple, f32)> + '_ {
        zip3(&self.h, &self.r, &self.t).zip(self.y.iter().copied())
    }
}

/// Coordinate-format label matrix of shape `rows x cols`.
///
/// Entries written to the same coordinate are summed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseLabels {
    rows: usize,
    cols: usize,
    entries: BTreeMap<(usize, usize), f32>,
}

impl SparseLabels {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            entries: BTreeMap::new(),
        }
    }

    /// Add `value` at `(row, col)`.
    pub fn add(&mut self, row: usize, col: usize, value: f32) {
        debug_assert!(row < self.rows && col < self.cols);
        *self.entries.entry((row, col)).or_insert(0.0) += value;
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.entries.get(&(row, col)).copied().unwrap_or(0.0)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored coordinates.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f32)> + '_ {
        self.entries.iter().map(|(&k, &v)| (k, v))
    }

    /// Stored entries of one row, ordered by column.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.entries
            .range((row, 0)..(row, self.cols))
            .map(|(&(_, c), &v)| (c, v))
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::zeros((self.rows, self.cols));
        for (&(r, c), &v) in &self.entries {
            dense[[r, c]] = v;
        }
        dense
    }
}

/// Raw ids plus multi-label targets for both prediction directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionBatch {
    pub source_batch: usize,
    pub h: Vec<usize>,
    pub r: Vec<usize>,
    pub t: Vec<usize>,
    /// Row `i`: +1 for every valid tail of `(h[i], r[i])`, -1 for sampled non-tails.
    pub hr_t: SparseLabels,
    /// Row `i`: +1 for every valid head of `(t[i], r[i])`, -1 for sampled non-heads.
    pub tr_h: SparseLabels,
}

/// A training-ready batch for one of the three strategies.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingBatch {
    Pairwise(PairwiseBatch),
    Pointwise(PointwiseBatch),
    Projection(ProjectionBatch),
}

impl TrainingBatch {
    pub fn strategy(&self) -> TrainingStrategy {
        match self {
            Self::Pairwise(_) => TrainingStrategy::PairwiseBased,
            Self::Pointwise(_) => TrainingStrategy::PointwiseBased,
            Self::Projection(_) => TrainingStrategy::ProjectionBased,
        }
    }

    /// Index of the raw batch this was built from.
    pub fn source_batch(&self) -> usize {
        match self {
            Self::Pairwise(b) => b.source_batch,
            Self::Pointwise(b) => b.source_batch,
            Self::Projection(b) => b.source_batch,
        }
    }

    /// The positive triples carried by the batch.
    pub fn positives(&self) -> Vec<Triple> {
        match self {
            Self::Pairwise(b) => b.positives().collect(),
            Self::Pointwise(b) => b
                .records()
                .filter(|(_, y)| *y > 0.0)
                .map(|(t, _)| t)
                .collect(),
            Self::Projection(b) => zip3(&b.h, &b.r, &b.t).collect(),
        }
    }
}

fn zip3<'a>(h: &'a [usize], r: &'a [usize], t: &'a [usize]) -> impl Iterator<Item = Triple> + 'a {
    h.iter()
        .zip(r)
        .zip(t)
        .map(|((&h, &r), &t)| Triple::new(h, r, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_labels_merge_additively() {
        let mut labels = SparseLabels::new(2, 4);
        labels.add(0, 1, 1.0);
        labels.add(0, 1, -1.0);
        labels.add(1, 3, -1.0);
        assert_eq!(labels.nnz(), 2);
        assert_eq!(labels.get(0, 1), 0.0);
        assert_eq!(labels.get(1, 3), -1.0);
        assert_eq!(labels.get(1, 0), 0.0);

        let dense = labels.to_dense();
        assert_eq!(dense.shape(), &[2, 4]);
        assert_eq!(dense[[1, 3]], -1.0);
    }

    #[test]
    fn test_sparse_row_iteration() {
        let mut labels = SparseLabels::new(3, 5);
        labels.add(1, 4, 1.0);
        labels.add(1, 0, 1.0);
        labels.add(2, 2, 1.0);
        let row: Vec<_> = labels.row(1).collect();
        assert_eq!(row, vec![(0, 1.0), (4, 1.0)]);
        assert_eq!(labels.row(0).count(), 0);
    }

    #[test]
    fn test_pairwise_neg_rate() {
        let batch = PairwiseBatch {
            source_batch: 3,
            ph: vec![0, 1],
            pr: vec![0, 0],
            pt: vec![1, 2],
            nh: vec![5, 0, 6, 1],
            nr: vec![0, 0, 0, 0],
            nt: vec![1, 7, 2, 8],
        };
        assert_eq!(batch.neg_rate(), 2);
        let wrapped = TrainingBatch::Pairwise(batch);
        assert_eq!(wrapped.source_batch(), 3);
        assert_eq!(wrapped.positives(), vec![Triple::new(0, 0, 1), Triple::new(1, 0, 2)]);
    }
}
