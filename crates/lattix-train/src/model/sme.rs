//! SME (linear): semantic matching energy.
//!
//! ```text
//! g_u = M1 h + M2 r + b_u
//! g_v = M3 r + M4 t + b_v
//! E(h, r, t) = g_u · g_v
//! ```
//!
//! Higher energy is more plausible. Loss: `Σ_j max(0, E(neg_j) + margin - E(pos_{j / k}))`.

use super::{check_ids, wrong_batch, KgeModel, Parameter};
use crate::batch::{PairwiseBatch, TrainingBatch};
use crate::error::Result;
use crate::store::KgMeta;
use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::{Array1, Array2, ArrayView1};
use rand::RngCore;

const ENT: usize = 0;
const REL: usize = 1;
const MU1: usize = 2;
const MU2: usize = 3;
const BU: usize = 4;
const MV1: usize = 5;
const MV2: usize = 6;
const BV: usize = 7;

#[derive(Debug, Clone)]
pub struct SmeLinear {
    dim: usize,
    margin: f32,
    params: Vec<Parameter>,
}

struct Energy {
    gu: Array1<f32>,
    gv: Array1<f32>,
    value: f32,
}

impl SmeLinear {
    pub fn new(dim: usize, margin: f32) -> Self {
        Self {
            dim,
            margin,
            params: Vec::new(),
        }
    }

    fn energy(&self, triple: Triple) -> Energy {
        let p = &self.params;
        let h = p[ENT].row(triple.head);
        let r = p[REL].row(triple.relation);
        let t = p[ENT].row(triple.tail);

        let gu = p[MU1].value.dot(&h) + p[MU2].value.dot(&r) + p[BU].row(0);
        let gv = p[MV1].value.dot(&r) + p[MV2].value.dot(&t) + p[BV].row(0);
        let value = gu.dot(&gv);
        Energy { gu, gv, value }
    }

    /// Add `w * dE/dθ` for one triple.
    fn backprop(&self, grads: &mut [Array2<f32>], triple: Triple, energy: &Energy, w: f32) {
        let p = &self.params;
        let h = p[ENT].row(triple.head);
        let r = p[REL].row(triple.relation);
        let t = p[ENT].row(triple.tail);
        let (gu, gv) = (&energy.gu, &energy.gv);

        add_outer(&mut grads[MU1], w, gv, h);
        add_outer(&mut grads[MU2], w, gv, r);
        grads[BU].row_mut(0).scaled_add(w, gv);
        add_outer(&mut grads[MV1], w, gu, r);
        add_outer(&mut grads[MV2], w, gu, t);
        grads[BV].row_mut(0).scaled_add(w, gu);

        let dh = p[MU1].value.t().dot(gv);
        let dr = p[MU2].value.t().dot(gv) + p[MV1].value.t().dot(gu);
        let dt = p[MV2].value.t().dot(gu);
        grads[ENT].row_mut(triple.head).scaled_add(w, &dh);
        grads[REL].row_mut(triple.relation).scaled_add(w, &dr);
        grads[ENT].row_mut(triple.tail).scaled_add(w, &dt);
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
        let pos_energy: Vec<Energy> = positives.iter().map(|&t| self.energy(t)).collect();

        let mut loss = 0.0;
        for (j, neg) in batch.negatives().enumerate() {
            let i = j / k;
            let neg_energy = self.energy(neg);
            let violation = neg_energy.value + self.margin - pos_energy[i].value;
            if violation <= 0.0 {
                continue;
            }
            loss += violation;
            self.backprop(&mut grads, neg, &neg_energy, 1.0);
            self.backprop(&mut grads, positives[i], &pos_energy[i], -1.0);
        }

        Ok((loss, grads))
    }
}

fn add_outer(target: &mut Array2<f32>, w: f32, a: &Array1<f32>, b: ArrayView1<'_, f32>) {
    for (i, &ai) in a.iter().enumerate() {
        target.row_mut(i).scaled_add(w * ai, &b);
    }
}

impl KgeModel for SmeLinear {
    fn name(&self) -> &str {
        "SMELinear"
    }

    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()> {
        let k = self.dim;
        self.params = vec![
            Parameter::xavier("ent_embedding", meta.tot_entity, k, rng)?,
            Parameter::xavier("rel_embedding", meta.tot_relation, k, rng)?,
            Parameter::xavier("mu1", k, k, rng)?,
            Parameter::xavier("mu2", k, k, rng)?,
            Parameter::xavier("bu", 1, k, rng)?,
            Parameter::xavier("mv1", k, k, rng)?,
            Parameter::xavier("mv2", k, k, rng)?,
            Parameter::xavier("bv", 1, k, rng)?,
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
        self.energy(triple).value
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
    use crate::model::testing::{check_gradients, init};

    #[test]
    fn test_gradients() {
        let mut model = SmeLinear::new(4, 50.0);
        init(&mut model, 5, 2);
        let batch = TrainingBatch::Pairwise(PairwiseBatch {
            source_batch: 0,
            ph: vec![0, 1],
            pr: vec![0, 1],
            pt: vec![2, 3],
            nh: vec![4, 1],
            nr: vec![0, 1],
            nt: vec![2, 0],
        });
        check_gradients(&model, &batch, 2e-2);
    }

    #[test]
    fn test_parameter_layout() {
        let mut model = SmeLinear::new(3, 1.0);
        init(&mut model, 7, 2);
        let shapes: Vec<_> = model.parameters().iter().map(|p| (p.name.as_str(), p.shape())).collect();
        assert_eq!(shapes[0], ("ent_embedding", (7, 3)));
        assert_eq!(shapes[4], ("bu", (1, 3)));
        assert_eq!(shapes[7], ("bv", (1, 3)));
        assert_eq!(model.score_tails(0, 1).len(), 7);
        assert_eq!(model.score_relations(0, 1).len(), 2);
    }
}
