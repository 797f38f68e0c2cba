//! TransE: relations as translations.
//!
//! ```text
//! h + r ≈ t  (if the triple is true)
//! ```
//!
//! The distance is `Σ|h + r - t|` (L1) or `Σ(h + r - t)²`, and the score is
//! its negation. Training minimises the margin ranking loss
//!
//! ```text
//! L = Σ_j max(0, d(pos_{j / k}) + margin - d(neg_j))
//! ```
//!
//! where negative `j` was corrupted from positive `j / k`.

use super::{check_ids, wrong_batch, KgeModel, Parameter};
use crate::batch::{PairwiseBatch, TrainingBatch};
use crate::error::Result;
use crate::store::KgMeta;
use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::{Array1, Array2};
use rand::RngCore;

const ENT: usize = 0;
const REL: usize = 1;

#[derive(Debug, Clone)]
pub struct TransE {
    dim: usize,
    margin: f32,
    l1: bool,
    params: Vec<Parameter>,
}

impl TransE {
    pub fn new(dim: usize, margin: f32, l1: bool) -> Self {
        Self {
            dim,
            margin,
            l1,
            params: Vec::new(),
        }
    }

    fn residual(&self, triple: Triple) -> Array1<f32> {
        let h = self.params[ENT].row(triple.head);
        let r = self.params[REL].row(triple.relation);
        let t = self.params[ENT].row(triple.tail);
        &h + &r - &t
    }

    fn distance(&self, residual: &Array1<f32>) -> f32 {
        if self.l1 {
            residual.iter().map(|x| x.abs()).sum()
        } else {
            residual.iter().map(|x| x * x).sum()
        }
    }

    /// d distance / d residual.
    fn distance_grad(&self, residual: &Array1<f32>) -> Array1<f32> {
        if self.l1 {
            residual.mapv(f32::signum)
        } else {
            residual.mapv(|x| 2.0 * x)
        }
    }

    fn pairwise_loss(&self, batch: &PairwiseBatch) -> Result<(f32, Vec<Array2<f32>>)> {
        check_ids(
            &[&batch.ph, &batch.pt, &batch.nh, &batch.nt],
            &[&batch.pr, &batch.nr],
            (self.num_entities(), self.num_relations()),
        )?;

        let mut grads: Vec<Array2<f32>> = self.params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
        let k = batch.neg_rate();
        if k == 0 {
            return Ok((0.0, grads));
        }

        let positives: Vec<Triple> = batch.positives().collect();
        let pos_residuals: Vec<Array1<f32>> = positives.iter().map(|&t| self.residual(t)).collect();
        let pos_dist: Vec<f32> = pos_residuals.iter().map(|v| self.distance(v)).collect();

        let mut loss = 0.0;
        for (j, neg) in batch.negatives().enumerate() {
            let i = j / k;
            let neg_residual = self.residual(neg);
            let violation = pos_dist[i] + self.margin - self.distance(&neg_residual);
            if violation <= 0.0 {
                continue;
            }
            loss += violation;

            let gp = self.distance_grad(&pos_residuals[i]);
            let gn = self.distance_grad(&neg_residual);
            accumulate(&mut grads, positives[i], &gp, 1.0);
            accumulate(&mut grads, neg, &gn, -1.0);
        }

        Ok((loss, grads))
    }
}

/// Push `sign * g` through `h + r - t`.
fn accumulate(grads: &mut [Array2<f32>], triple: Triple, g: &Array1<f32>, sign: f32) {
    grads[ENT].row_mut(triple.head).scaled_add(sign, g);
    grads[REL].row_mut(triple.relation).scaled_add(sign, g);
    grads[ENT].row_mut(triple.tail).scaled_add(-sign, g);
}

impl KgeModel for TransE {
    fn name(&self) -> &str {
        "TransE"
    }

    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()> {
        self.params = vec![
            Parameter::xavier("ent_embedding", meta.tot_entity, self.dim, rng)?,
            Parameter::xavier("rel_embedding", meta.tot_relation, self.dim, rng)?,
        ];
        Ok(())
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }

    fn loss_and_gradients(&self, batch: &TrainingBatch) -> Result<(f32, Vec<Array2<f32>>)> {
        match batch {
            TrainingBatch::Pairwise(b) => self.pairwise_loss(b),
            other => Err(wrong_batch(self.name(), TrainingStrategy::PairwiseBased, other)),
        }
    }

    fn score_triple(&self, triple: Triple) -> f32 {
        -self.distance(&self.residual(triple))
    }

    fn num_entities(&self) -> usize {
        self.params.first().map_or(0, |p| p.shape().0)
    }

    fn num_relations(&self) -> usize {
        self.params.get(REL).map_or(0, |p| p.shape().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::PointwiseBatch;
    use crate::error::Error;
    use crate::model::testing::{check_gradients, init};

    fn batch() -> TrainingBatch {
        TrainingBatch::Pairwise(PairwiseBatch {
            source_batch: 0,
            ph: vec![0, 2],
            pr: vec![0, 1],
            pt: vec![1, 3],
            nh: vec![4, 0, 2, 5],
            nr: vec![0, 0, 1, 1],
            nt: vec![1, 5, 0, 3],
        })
    }

    #[test]
    fn test_gradients_squared_l2() {
        let mut model = TransE::new(6, 10.0, false);
        init(&mut model, 6, 2);
        check_gradients(&model, &batch(), 2e-2);
    }

    #[test]
    fn test_gradients_l1() {
        let mut model = TransE::new(6, 10.0, true);
        init(&mut model, 6, 2);
        check_gradients(&model, &batch(), 2e-2);
    }

    #[test]
    fn test_satisfied_margin_gives_zero_loss() {
        let mut model = TransE::new(2, 0.5, true);
        init(&mut model, 3, 1);
        let p = model.parameters_mut();
        p[ENT].value = ndarray::array![[0.0, 0.0], [1.0, 0.0], [5.0, 5.0]];
        p[REL].value = ndarray::array![[1.0, 0.0]];

        let b = TrainingBatch::Pairwise(PairwiseBatch {
            source_batch: 0,
            ph: vec![0],
            pr: vec![0],
            pt: vec![1],
            nh: vec![0],
            nr: vec![0],
            nt: vec![2],
        });
        let (loss, grads) = model.loss_and_gradients(&b).unwrap();
        assert_eq!(loss, 0.0);
        assert!(grads.iter().all(|g| g.iter().all(|&x| x == 0.0)));
        assert!(model.score_triple(Triple::new(0, 0, 1)) > model.score_triple(Triple::new(0, 0, 2)));
    }

    #[test]
    fn test_rejects_other_strategies_and_bad_ids() {
        let mut model = TransE::new(2, 1.0, true);
        init(&mut model, 3, 1);
        let err = model
            .loss_and_gradients(&TrainingBatch::Pointwise(PointwiseBatch::default()))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));

        let bad = TrainingBatch::Pairwise(PairwiseBatch {
            source_batch: 0,
            ph: vec![7],
            pr: vec![0],
            pt: vec![1],
            nh: vec![0],
            nr: vec![0],
            nt: vec![2],
        });
        assert!(matches!(model.loss_and_gradients(&bad), Err(Error::EntityNotFound(7))));
    }
}
