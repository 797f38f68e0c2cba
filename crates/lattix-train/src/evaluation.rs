//! Rank-based evaluation of a model under training.
//!
//! # The link prediction task
//!
//! For a held-out triple `(h, r, t)`:
//! 1. **Tail prediction**: score every `(h, r, ?)` and rank the true tail
//! 2. **Head prediction**: score every `(?, r, t)` and rank the true head
//!
//! Ranks are *filtered*: candidates that form another known triple (from any
//! split) are skipped, so a correct prediction is never penalised for
//! ranking a different true fact higher.
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MR | [1, n] | Mean rank |
//! | MRR | (0, 1] | Mean reciprocal rank |
//! | Hits@k | [0, 1] | Fraction with rank <= k |
//!
//! The trainer talks to evaluation through the [`Evaluator`] trait.
//! [`RankEvaluator`] is the stock implementation.

use crate::config::TrainerConfig;
use crate::error::Result;
use crate::model::KgeModel;
use crate::store::KnowledgeGraphStore;
use crate::triple::{PositiveSet, Triple};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rank-based evaluation results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankMetrics {
    /// Mean Reciprocal Rank: E\[1/rank\]
    pub mrr: f64,
    /// Mean Rank: E\[rank\]
    pub mr: f64,
    /// Hits@1: P(rank = 1)
    pub hits_at_1: f64,
    /// Hits@3: P(rank <= 3)
    pub hits_at_3: f64,
    /// Hits@10: P(rank <= 10)
    pub hits_at_10: f64,
    /// Number of ranks aggregated
    pub num_triples: usize,
}

impl RankMetrics {
    /// Compute metrics from a list of ranks.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }

        let n = ranks.len() as f64;
        let hits = |k: usize| ranks.iter().filter(|&&r| r <= k).count() as f64 / n;

        Self {
            mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            mr: ranks.iter().map(|&r| r as f64).sum::<f64>() / n,
            hits_at_1: hits(1),
            hits_at_3: hits(3),
            hits_at_10: hits(10),
            num_triples: ranks.len(),
        }
    }

    /// Weighted merge of several runs.
    pub fn merge(metrics: &[Self]) -> Self {
        let total: usize = metrics.iter().map(|m| m.num_triples).sum();
        if total == 0 {
            return Self::default();
        }
        let total_f = total as f64;
        let weighted = |f: fn(&Self) -> f64| metrics.iter().map(|m| f(m) * m.num_triples as f64).sum::<f64>() / total_f;

        Self {
            mrr: weighted(|m| m.mrr),
            mr: weighted(|m| m.mr),
            hits_at_1: weighted(|m| m.hits_at_1),
            hits_at_3: weighted(|m| m.hits_at_3),
            hits_at_10: weighted(|m| m.hits_at_10),
            num_triples: total,
        }
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mrr, self.mr, self.hits_at_1, self.hits_at_3, self.hits_at_10, self.num_triples
        )
    }
}

/// Messages the trainer sends to an evaluator outside of `test`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluatorSignal {
    /// Training ended early; no further `test` calls follow.
    EarlyStop,
}

/// Accumulated loss of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f32,
}

/// Metrics of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub epoch: usize,
    pub head: RankMetrics,
    pub tail: RankMetrics,
    pub overall: RankMetrics,
}

/// Evaluation collaborator driven by the trainer.
pub trait Evaluator: Send {
    /// Rank the held-out triples with the model's current parameters.
    fn test(&mut self, model: &dyn KgeModel, epoch: usize) -> Result<RankMetrics>;

    fn notify(&mut self, signal: EvaluatorSignal);

    /// Persist the per-epoch losses.
    fn save_training_result(&mut self, records: &[EpochRecord]) -> Result<()>;

    /// Flush anything pending; called once when training ends.
    fn stop(&mut self) -> Result<()>;

    /// The `topk` most plausible heads of `(?, relation, tail)`.
    fn test_head_rank(&self, model: &dyn KgeModel, relation: usize, tail: usize, topk: usize) -> Vec<usize> {
        top_k(&model.score_heads(relation, tail), topk)
    }

    /// The `topk` most plausible tails of `(head, relation, ?)`.
    fn test_tail_rank(&self, model: &dyn KgeModel, head: usize, relation: usize, topk: usize) -> Vec<usize> {
        top_k(&model.score_tails(head, relation), topk)
    }

    /// The `topk` most plausible relations of `(head, ?, tail)`.
    fn test_rel_rank(&self, model: &dyn KgeModel, head: usize, tail: usize, topk: usize) -> Vec<usize> {
        top_k(&model.score_relations(head, tail), topk)
    }
}

/// Indices of the `k` highest scores, best first.
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order.truncate(k);
    order
}

/// Pessimistic rank of `target` among `scores`, skipping `excluded` candidates.
pub fn compute_rank(scores: &[f32], target: usize, excluded: impl Fn(usize) -> bool) -> usize {
    let target_score = scores[target];
    1 + scores
        .iter()
        .enumerate()
        .filter(|&(e, &s)| e != target && s > target_score && !excluded(e))
        .count()
}

/// Filtered link-prediction evaluator over a fixed set of held-out triples.
#[derive(Debug, Clone)]
pub struct RankEvaluator {
    triples: Vec<Triple>,
    known: PositiveSet,
    path_result: Option<PathBuf>,
    history: Vec<EvaluationRecord>,
    training_results: Vec<EpochRecord>,
    early_stopped: bool,
}

impl RankEvaluator {
    /// Evaluate on the test split, capped at `config.test_num` triples.
    pub fn new(store: &dyn KnowledgeGraphStore, config: &TrainerConfig) -> Self {
        let mut triples = store.triplets_test();
        if config.test_num > 0 {
            triples.truncate(config.test_num);
        }
        let known: PositiveSet = store
            .triplets_train()
            .into_iter()
            .chain(store.triplets_valid())
            .chain(store.triplets_test())
            .collect();
        Self::on_triples(triples, known, config.path_result.clone())
    }

    pub fn on_triples(triples: Vec<Triple>, known: PositiveSet, path_result: Option<PathBuf>) -> Self {
        Self {
            triples,
            known,
            path_result,
            history: Vec::new(),
            training_results: Vec::new(),
            early_stopped: false,
        }
    }

    pub fn history(&self) -> &[EvaluationRecord] {
        &self.history
    }

    pub fn training_results(&self) -> &[EpochRecord] {
        &self.training_results
    }

    pub fn early_stopped(&self) -> bool {
        self.early_stopped
    }

    pub fn rank_tail_filtered(&self, model: &dyn KgeModel, triple: Triple) -> usize {
        let scores = model.score_tails(triple.head, triple.relation);
        compute_rank(&scores, triple.tail, |e| self.known.contains(&triple.with_tail(e)))
    }

    pub fn rank_head_filtered(&self, model: &dyn KgeModel, triple: Triple) -> usize {
        let scores = model.score_heads(triple.relation, triple.tail);
        compute_rank(&scores, triple.head, |e| self.known.contains(&triple.with_head(e)))
    }

    /// Head and tail metrics over every held-out triple.
    pub fn evaluate(&self, model: &dyn KgeModel) -> (RankMetrics, RankMetrics) {
        let (head_ranks, tail_ranks): (Vec<usize>, Vec<usize>) = self
            .triples
            .par_iter()
            .map(|&t| (self.rank_head_filtered(model, t), self.rank_tail_filtered(model, t)))
            .unzip();
        (RankMetrics::from_ranks(&head_ranks), RankMetrics::from_ranks(&tail_ranks))
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let Some(dir) = &self.path_result else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file);
        std::fs::write(&path, serde_json::to_string_pretty(value)?)?;
        tracing::info!(path = %path.display(), "wrote results");
        Ok(())
    }
}

impl Evaluator for RankEvaluator {
    fn test(&mut self, model: &dyn KgeModel, epoch: usize) -> Result<RankMetrics> {
        let (head, tail) = self.evaluate(model);
        let overall = RankMetrics::merge(&[head.clone(), tail.clone()]);
        tracing::info!(epoch, head = %head.summary(), tail = %tail.summary(), "evaluation");
        self.history.push(EvaluationRecord {
            epoch,
            head,
            tail,
            overall: overall.clone(),
        });
        Ok(overall)
    }

    fn notify(&mut self, signal: EvaluatorSignal) {
        match signal {
            EvaluatorSignal::EarlyStop => {
                tracing::info!("evaluator received early stop");
                self.early_stopped = true;
            }
        }
    }

    fn save_training_result(&mut self, records: &[EpochRecord]) -> Result<()> {
        self.training_results = records.to_vec();
        self.write_json("training_results.json", &self.training_results)
    }

    fn stop(&mut self) -> Result<()> {
        self.write_json("evaluation_results.json", &self.history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KgeModel, TransE};
    use ndarray::array;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn test_from_ranks() {
        let m = RankMetrics::from_ranks(&[1, 2, 4, 20]);
        assert_eq!(m.num_triples, 4);
        assert!((m.mrr - (1.0 + 0.5 + 0.25 + 0.05) / 4.0).abs() < 1e-12);
        assert!((m.mr - 6.75).abs() < 1e-12);
        assert_eq!(m.hits_at_1, 0.25);
        assert_eq!(m.hits_at_3, 0.5);
        assert_eq!(m.hits_at_10, 0.75);
        assert_eq!(RankMetrics::from_ranks(&[]), RankMetrics::default());
    }

    #[test]
    fn test_merge_weights_by_count() {
        let a = RankMetrics::from_ranks(&[1]);
        let b = RankMetrics::from_ranks(&[2, 2, 2]);
        let m = RankMetrics::merge(&[a, b]);
        assert_eq!(m.num_triples, 4);
        assert!((m.mr - 1.75).abs() < 1e-12);
        assert_eq!(m.hits_at_1, 0.25);
    }

    #[test]
    fn test_filtered_rank_skips_known() {
        let scores = [0.9, 0.5, 0.8, 0.1];
        assert_eq!(compute_rank(&scores, 1, |_| false), 3);
        assert_eq!(compute_rank(&scores, 1, |e| e == 0), 2);
        assert_eq!(compute_rank(&scores, 0, |_| false), 1);
    }

    #[test]
    fn test_top_k() {
        assert_eq!(top_k(&[0.1, 0.7, -1.0, 0.3], 2), vec![1, 3]);
        assert_eq!(top_k(&[0.1], 5), vec![0]);
    }

    fn translation_model() -> TransE {
        // e0 + r0 = e1 exactly, e2 far away
        let mut model = TransE::new(2, 1.0, true);
        let meta = crate::store::KgMeta {
            tot_entity: 3,
            tot_relation: 1,
            ..Default::default()
        };
        model.def_parameters(&meta, &mut XorShiftRng::seed_from_u64(0)).unwrap();
        let p = model.parameters_mut();
        p[0].value = array![[0.0, 0.0], [1.0, 0.0], [4.0, 4.0]];
        p[1].value = array![[1.0, 0.0]];
        model
    }

    #[test]
    fn test_rank_evaluator_records_history() {
        let model = translation_model();
        let test = vec![Triple::new(0, 0, 1)];
        let dir = tempfile::tempdir().unwrap();
        let mut eval = RankEvaluator::on_triples(test.clone(), PositiveSet::new(&test), Some(dir.path().to_path_buf()));

        let overall = eval.test(&model, 3).unwrap();
        assert_eq!(overall.hits_at_1, 1.0);
        assert_eq!(eval.history().len(), 1);
        assert_eq!(eval.history()[0].epoch, 3);

        eval.save_training_result(&[EpochRecord { epoch: 0, loss: 1.5 }]).unwrap();
        eval.notify(EvaluatorSignal::EarlyStop);
        eval.stop().unwrap();
        assert!(eval.early_stopped());

        let saved: Vec<EpochRecord> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("training_results.json")).unwrap()).unwrap();
        assert_eq!(saved, vec![EpochRecord { epoch: 0, loss: 1.5 }]);
        assert!(dir.path().join("evaluation_results.json").exists());
    }

    #[test]
    fn test_interactive_ranks() {
        let model = translation_model();
        let eval = RankEvaluator::on_triples(vec![], PositiveSet::default(), None);
        assert_eq!(eval.test_tail_rank(&model, 0, 0, 1), vec![1]);
        assert_eq!(eval.test_head_rank(&model, 0, 1, 1), vec![0]);
        assert_eq!(eval.test_rel_rank(&model, 0, 1, 3), vec![0]);
    }
}
