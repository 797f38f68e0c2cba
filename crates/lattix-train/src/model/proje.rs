//! ProjE (pointwise): embedding projection against every entity.
//!
//! A combination operator merges the known entity and the relation, and the
//! result is projected onto all entity embeddings at once:
//!
//! ```text
//! c = tanh(d_e ⊙ e + d_r ⊙ r + b_c)
//! z = E c + b_p            (one logit per candidate entity)
//! ```
//!
//! The `(h, r) -> t` and `(t, r) -> h` directions have their own combination
//! operators and share the embeddings and `b_p`. The loss is binary
//! cross-entropy over the labeled coordinates of both label matrices: +1
//! entries are pulled towards `σ(z) = 1`, -1 entries towards 0.

use super::{check_ids, sigmoid, softplus, wrong_batch, KgeModel, Parameter};
use crate::batch::{ProjectionBatch, SparseLabels, TrainingBatch};
use crate::error::{Error, Result};
use crate::store::KgMeta;
use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::{Array1, Array2, ArrayView1};
use rand::RngCore;

const ENT: usize = 0;
const REL: usize = 1;
const BP: usize = 8;

/// Parameter indices of one direction's combination operator.
#[derive(Clone, Copy)]
struct Combination {
    de: usize,
    dr: usize,
    bc: usize,
}

const TAIL_DIRECTION: Combination = Combination { de: 2, dr: 3, bc: 4 };
const HEAD_DIRECTION: Combination = Combination { de: 5, dr: 6, bc: 7 };

#[derive(Debug, Clone)]
pub struct ProjEPointwise {
    dim: usize,
    lmbda: f32,
    params: Vec<Parameter>,
}

impl ProjEPointwise {
    pub fn new(dim: usize, lmbda: f32) -> Self {
        Self {
            dim,
            lmbda,
            params: Vec::new(),
        }
    }

    fn combine(&self, op: Combination, entity: usize, relation: usize) -> Array1<f32> {
        let p = &self.params;
        let a = &p[op.de].row(0) * &p[ENT].row(entity) + &p[op.dr].row(0) * &p[REL].row(relation) + p[op.bc].row(0);
        a.mapv(f32::tanh)
    }

    fn logit(&self, c: &Array1<f32>, candidate: usize) -> f32 {
        c.dot(&self.params[ENT].row(candidate)) + self.params[BP].value[[0, candidate]]
    }

    /// Logits of every entity as the missing end.
    fn project(&self, c: &Array1<f32>) -> Vec<f32> {
        let z = self.params[ENT].value.dot(c) + self.params[BP].row(0);
        z.to_vec()
    }

    /// Loss and gradients of one direction, accumulated into `grads`.
    fn direction_loss(
        &self,
        op: Combination,
        known: &[usize],
        relations: &[usize],
        labels: &SparseLabels,
        grads: &mut [Array2<f32>],
    ) -> f32 {
        let p = &self.params;
        let mut loss = 0.0;

        for (i, (&e, &r)) in known.iter().zip(relations).enumerate() {
            let c = self.combine(op, e, r);
            let mut dc = Array1::<f32>::zeros(self.dim);

            for (j, y) in labels.row(i) {
                let pos = y.max(0.0);
                let neg = (-y).max(0.0);
                if pos == 0.0 && neg == 0.0 {
                    continue;
                }
                let z = self.logit(&c, j);
                loss += softplus(-z) * pos + softplus(z) * neg;

                let s = sigmoid(z);
                let g = (s - 1.0) * pos + s * neg;
                dc.scaled_add(g, &p[ENT].row(j));
                grads[ENT].row_mut(j).scaled_add(g, &c);
                grads[BP][[0, j]] += g;
            }

            // back through tanh
            let da = &dc * &c.mapv(|x| 1.0 - x * x);
            let ent = p[ENT].row(e);
            let rel = p[REL].row(r);
            grads[op.de].row_mut(0).scaled_add(1.0, &(&da * &ent));
            grads[op.dr].row_mut(0).scaled_add(1.0, &(&da * &rel));
            grads[op.bc].row_mut(0).scaled_add(1.0, &da);
            grads[ENT].row_mut(e).scaled_add(1.0, &(&da * &p[op.de].row(0)));
            grads[REL].row_mut(r).scaled_add(1.0, &(&da * &p[op.dr].row(0)));
        }

        loss
    }

    fn projection_loss(&self, batch: &ProjectionBatch) -> Result<(f32, Vec<Array2<f32>>)> {
        check_ids(&[&batch.h, &batch.t], &[&batch.r], (self.num_entities(), self.num_relations()))?;
        for labels in [&batch.hr_t, &batch.tr_h] {
            let (rows, cols) = labels.shape();
            if rows != batch.h.len() || cols != self.num_entities() {
                return Err(Error::ShapeMismatch(format!(
                    "label matrix is {rows}x{cols}, expected {}x{}",
                    batch.h.len(),
                    self.num_entities()
                )));
            }
        }

        let mut grads: Vec<Array2<f32>> = self.params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
        let mut loss = self.direction_loss(TAIL_DIRECTION, &batch.h, &batch.r, &batch.hr_t, &mut grads);
        loss += self.direction_loss(HEAD_DIRECTION, &batch.t, &batch.r, &batch.tr_h, &mut grads);

        if self.lmbda > 0.0 {
            for op in [TAIL_DIRECTION, HEAD_DIRECTION] {
                for idx in [op.de, op.dr] {
                    let v: ArrayView1<'_, f32> = self.params[idx].row(0);
                    loss += self.lmbda * v.dot(&v);
                    grads[idx].row_mut(0).scaled_add(2.0 * self.lmbda, &v);
                }
            }
        }

        Ok((loss, grads))
    }
}

impl KgeModel for ProjEPointwise {
    fn name(&self) -> &str {
        "ProjE_pointwise"
    }

    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()> {
        let k = self.dim;
        self.params = vec![
            Parameter::xavier("ent_embedding", meta.tot_entity, k, rng)?,
            Parameter::xavier("rel_embedding", meta.tot_relation, k, rng)?,
            Parameter::xavier("de1", 1, k, rng)?,
            Parameter::xavier("dr1", 1, k, rng)?,
            Parameter::zeros("bc1", 1, k),
            Parameter::xavier("de2", 1, k, rng)?,
            Parameter::xavier("dr2", 1, k, rng)?,
            Parameter::zeros("bc2", 1, k),
            Parameter::zeros("bp", 1, meta.tot_entity),
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
            TrainingBatch::Projection(b) => self.projection_loss(b),
            other => Err(wrong_batch(self.name(), TrainingStrategy::ProjectionBased, other)),
        }
    }

    fn score_triple(&self, triple: Triple) -> f32 {
        let c = self.combine(TAIL_DIRECTION, triple.head, triple.relation);
        self.logit(&c, triple.tail)
    }

    fn num_entities(&self) -> usize {
        self.params.first().map_or(0, |p| p.shape().0)
    }

    fn num_relations(&self) -> usize {
        self.params.get(REL).map_or(0, |p| p.shape().0)
    }

    fn score_tails(&self, head: usize, relation: usize) -> Vec<f32> {
        self.project(&self.combine(TAIL_DIRECTION, head, relation))
    }

    fn score_heads(&self, relation: usize, tail: usize) -> Vec<f32> {
        self.project(&self.combine(HEAD_DIRECTION, tail, relation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{check_gradients, init};

    fn batch(n: usize) -> TrainingBatch {
        let mut hr_t = SparseLabels::new(2, n);
        hr_t.add(0, 1, 1.0);
        hr_t.add(0, 3, -1.0);
        hr_t.add(1, 2, 1.0);
        hr_t.add(1, 0, -1.0);
        let mut tr_h = SparseLabels::new(2, n);
        tr_h.add(0, 0, 1.0);
        tr_h.add(0, 4, -1.0);
        tr_h.add(1, 1, 1.0);
        TrainingBatch::Projection(ProjectionBatch {
            source_batch: 0,
            h: vec![0, 1],
            r: vec![0, 1],
            t: vec![1, 2],
            hr_t,
            tr_h,
        })
    }

    #[test]
    fn test_gradients() {
        let mut model = ProjEPointwise::new(4, 0.01);
        init(&mut model, 5, 2);
        check_gradients(&model, &batch(5), 2e-2);
    }

    #[test]
    fn test_directional_scores_match_single_logits() {
        let mut model = ProjEPointwise::new(3, 0.0);
        init(&mut model, 6, 2);
        let tails = model.score_tails(2, 1);
        assert_eq!(tails.len(), 6);
        assert!((tails[4] - model.score_triple(Triple::new(2, 1, 4))).abs() < 1e-5);
        assert_eq!(model.score_heads(1, 4).len(), 6);
    }

    #[test]
    fn test_rejects_mismatched_labels() {
        let mut model = ProjEPointwise::new(3, 0.0);
        init(&mut model, 6, 2);
        let err = model.loss_and_gradients(&batch(5)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }
}
