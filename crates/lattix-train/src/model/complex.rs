//! ComplEx: complex-valued bilinear scoring.
//!
//! ```text
//! s(h, r, t) = Re(<h, r, conj(t)>)
//!            = Σ hr·rr·tr + hi·rr·ti + hr·ri·ti - hi·ri·tr
//! ```
//!
//! Trained pointwise on labels `y ∈ {+1, -1}`:
//!
//! ```text
//! L = mean(softplus(-y · s)) + λ · mean(|h|² + |r|² + |t|²)
//! ```

use super::{check_ids, sigmoid, softplus, wrong_batch, KgeModel, Parameter};
use crate::batch::{PointwiseBatch, TrainingBatch};
use crate::error::Result;
use crate::store::KgMeta;
use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::{Array1, Array2};
use rand::RngCore;

const ENT_RE: usize = 0;
const ENT_IM: usize = 1;
const REL_RE: usize = 2;
const REL_IM: usize = 3;

#[derive(Debug, Clone)]
pub struct Complex {
    dim: usize,
    lmbda: f32,
    params: Vec<Parameter>,
}

impl Complex {
    pub fn new(dim: usize, lmbda: f32) -> Self {
        Self {
            dim,
            lmbda,
            params: Vec::new(),
        }
    }

    fn pointwise_loss(&self, batch: &PointwiseBatch) -> Result<(f32, Vec<Array2<f32>>)> {
        check_ids(&[&batch.h, &batch.t], &[&batch.r], (self.num_entities(), self.num_relations()))?;

        let mut grads: Vec<Array2<f32>> = self.params.iter().map(|p| Array2::zeros(p.value.raw_dim())).collect();
        let n = batch.y.len();
        if n == 0 {
            return Ok((0.0, grads));
        }
        let inv_n = 1.0 / n as f32;
        let p = &self.params;

        let mut loss = 0.0;
        for (triple, y) in batch.records() {
            let Triple { head, relation, tail } = triple;
            let hr = p[ENT_RE].row(head);
            let hi = p[ENT_IM].row(head);
            let tr = p[ENT_RE].row(tail);
            let ti = p[ENT_IM].row(tail);
            let rr = p[REL_RE].row(relation);
            let ri = p[REL_IM].row(relation);

            let s = self.score_triple(triple);
            loss += softplus(-y * s) * inv_n;
            let dl_ds = -y * sigmoid(-y * s) * inv_n;

            let d_hr: Array1<f32> = &rr * &tr + &ri * &ti;
            let d_hi: Array1<f32> = &rr * &ti - &ri * &tr;
            let d_tr: Array1<f32> = &hr * &rr - &hi * &ri;
            let d_ti: Array1<f32> = &hi * &rr + &hr * &ri;
            let d_rr: Array1<f32> = &hr * &tr + &hi * &ti;
            let d_ri: Array1<f32> = &hr * &ti - &hi * &tr;

            grads[ENT_RE].row_mut(head).scaled_add(dl_ds, &d_hr);
            grads[ENT_IM].row_mut(head).scaled_add(dl_ds, &d_hi);
            grads[ENT_RE].row_mut(tail).scaled_add(dl_ds, &d_tr);
            grads[ENT_IM].row_mut(tail).scaled_add(dl_ds, &d_ti);
            grads[REL_RE].row_mut(relation).scaled_add(dl_ds, &d_rr);
            grads[REL_IM].row_mut(relation).scaled_add(dl_ds, &d_ri);

            if self.lmbda > 0.0 {
                let w = self.lmbda * inv_n;
                for (idx, row) in [(ENT_RE, head), (ENT_IM, head), (ENT_RE, tail), (ENT_IM, tail), (REL_RE, relation), (REL_IM, relation)] {
                    let v = p[idx].row(row);
                    loss += w * v.dot(&v);
                    grads[idx].row_mut(row).scaled_add(2.0 * w, &v);
                }
            }
        }

        Ok((loss, grads))
    }
}

impl KgeModel for Complex {
    fn name(&self) -> &str {
        "Complex"
    }

    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()> {
        self.params = vec![
            Parameter::xavier("ent_embeddings_real", meta.tot_entity, self.dim, rng)?,
            Parameter::xavier("ent_embeddings_img", meta.tot_entity, self.dim, rng)?,
            Parameter::xavier("rel_embeddings_real", meta.tot_relation, self.dim, rng)?,
            Parameter::xavier("rel_embeddings_img", meta.tot_relation, self.dim, rng)?,
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
            TrainingBatch::Pointwise(b) => self.pointwise_loss(b),
            other => Err(wrong_batch(self.name(), TrainingStrategy::PointwiseBased, other)),
        }
    }

    fn score_triple(&self, triple: Triple) -> f32 {
        let p = &self.params;
        let hr = p[ENT_RE].row(triple.head);
        let hi = p[ENT_IM].row(triple.head);
        let tr = p[ENT_RE].row(triple.tail);
        let ti = p[ENT_IM].row(triple.tail);
        let rr = p[REL_RE].row(triple.relation);
        let ri = p[REL_IM].row(triple.relation);

        (0..self.dim)
            .map(|k| hr[k] * rr[k] * tr[k] + hi[k] * rr[k] * ti[k] + hr[k] * ri[k] * ti[k] - hi[k] * ri[k] * tr[k])
            .sum()
    }

    fn num_entities(&self) -> usize {
        self.params.first().map_or(0, |p| p.shape().0)
    }

    fn num_relations(&self) -> usize {
        self.params.get(REL_RE).map_or(0, |p| p.shape().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{check_gradients, init};

    fn batch() -> TrainingBatch {
        TrainingBatch::Pointwise(PointwiseBatch {
            source_batch: 0,
            h: vec![0, 0, 3, 2, 2, 1],
            r: vec![0, 0, 0, 1, 1, 1],
            t: vec![1, 4, 1, 3, 0, 3],
            y: vec![1.0, -1.0, -1.0, 1.0, -1.0, -1.0],
        })
    }

    #[test]
    fn test_gradients() {
        let mut model = Complex::new(5, 0.0);
        init(&mut model, 5, 2);
        check_gradients(&model, &batch(), 2e-2);
    }

    #[test]
    fn test_gradients_with_regularisation() {
        let mut model = Complex::new(5, 0.1);
        init(&mut model, 5, 2);
        check_gradients(&model, &batch(), 2e-2);
    }

    #[test]
    fn test_score_is_real_part_of_trilinear_product() {
        let mut model = Complex::new(1, 0.0);
        init(&mut model, 2, 1);
        let p = model.parameters_mut();
        // h = 1 + 2i, r = 3 - 1i, t = 0.5 + 1i
        p[ENT_RE].value = ndarray::array![[1.0], [0.5]];
        p[ENT_IM].value = ndarray::array![[2.0], [1.0]];
        p[REL_RE].value = ndarray::array![[3.0]];
        p[REL_IM].value = ndarray::array![[-1.0]];
        // h * r = 5 + 5i; (5 + 5i) * conj(t) = (5 + 5i)(0.5 - 1i) = 7.5 - 2.5i
        let s = model.score_triple(Triple::new(0, 0, 1));
        assert!((s - 7.5).abs() < 1e-6, "score {s}");
    }
}
