//! Negative-sampling workers.
//!
//! A worker pulls [`RawBatch`]es, hands each to its [`BatchProcessor`] and
//! pushes the result downstream. Every processor owns an independent copy of
//! the positive set, bias table and indexes, read from the store when the
//! worker is built.

use super::feeder::POLL_INTERVAL;
use crate::batch::{PairwiseBatch, PointwiseBatch, ProjectionBatch, RawBatch, SparseLabels, TrainingBatch};
use crate::config::TrainerConfig;
use crate::error::Result;
use crate::sampler::NegativeSampler;
use crate::store::{CooccurrenceIndex, KnowledgeGraphStore};
use crate::strategy::TrainingStrategy;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Turns a raw positive batch into a training-ready batch.
pub trait BatchProcessor: Send {
    fn process(&mut self, raw: RawBatch) -> Result<TrainingBatch>;
}

/// Aligned positive/negative arrays, `neg_rate` negatives per positive.
#[derive(Debug)]
pub struct PairwiseProcessor {
    sampler: NegativeSampler,
    neg_rate: usize,
}

impl PairwiseProcessor {
    pub fn new(sampler: NegativeSampler, neg_rate: usize) -> Self {
        Self { sampler, neg_rate }
    }
}

impl BatchProcessor for PairwiseProcessor {
    fn process(&mut self, raw: RawBatch) -> Result<TrainingBatch> {
        let n = raw.triples.len();
        let k = self.neg_rate;
        let mut batch = PairwiseBatch {
            source_batch: raw.index,
            ph: Vec::with_capacity(n),
            pr: Vec::with_capacity(n),
            pt: Vec::with_capacity(n),
            nh: Vec::with_capacity(n * k),
            nr: Vec::with_capacity(n * k),
            nt: Vec::with_capacity(n * k),
        };

        for triple in raw.triples {
            batch.ph.push(triple.head);
            batch.pr.push(triple.relation);
            batch.pt.push(triple.tail);
            for _ in 0..k {
                let neg = self.sampler.corrupt(triple)?;
                batch.nh.push(neg.head);
                batch.nr.push(neg.relation);
                batch.nt.push(neg.tail);
            }
        }

        Ok(TrainingBatch::Pairwise(batch))
    }
}

/// One interleaved stream: positive (+1) then its negatives (-1).
#[derive(Debug)]
pub struct PointwiseProcessor {
    sampler: NegativeSampler,
    neg_rate: usize,
}

impl PointwiseProcessor {
    pub fn new(sampler: NegativeSampler, neg_rate: usize) -> Self {
        Self { sampler, neg_rate }
    }
}

impl BatchProcessor for PointwiseProcessor {
    fn process(&mut self, raw: RawBatch) -> Result<TrainingBatch> {
        let len = raw.triples.len() * (1 + self.neg_rate);
        let mut batch = PointwiseBatch {
            source_batch: raw.index,
            h: Vec::with_capacity(len),
            r: Vec::with_capacity(len),
            t: Vec::with_capacity(len),
            y: Vec::with_capacity(len),
        };

        for triple in raw.triples {
            batch.h.push(triple.head);
            batch.r.push(triple.relation);
            batch.t.push(triple.tail);
            batch.y.push(1.0);
            for _ in 0..self.neg_rate {
                let neg = self.sampler.corrupt(triple)?;
                batch.h.push(neg.head);
                batch.r.push(neg.relation);
                batch.t.push(neg.tail);
                batch.y.push(-1.0);
            }
        }

        Ok(TrainingBatch::Pointwise(batch))
    }
}

/// Sparse multi-label targets over the whole entity vocabulary.
///
/// Row `i` of `hr_t` marks every training tail of `(h_i, r_i)` with +1; row
/// `i` of `tr_h` marks every training head of `(t_i, r_i)`. With a nonzero
/// negative rate, ids from a per-batch candidate pool that are not valid for
/// the row are marked -1.
#[derive(Debug)]
pub struct ProjectionProcessor {
    sampler: NegativeSampler,
    hr_t: CooccurrenceIndex,
    tr_h: CooccurrenceIndex,
    neg_rate: usize,
    candidate_pool_size: usize,
}

impl ProjectionProcessor {
    pub fn new(
        sampler: NegativeSampler,
        hr_t: CooccurrenceIndex,
        tr_h: CooccurrenceIndex,
        neg_rate: usize,
        candidate_pool_size: usize,
    ) -> Self {
        Self {
            sampler,
            hr_t,
            tr_h,
            neg_rate,
            candidate_pool_size,
        }
    }
}

impl BatchProcessor for ProjectionProcessor {
    fn process(&mut self, raw: RawBatch) -> Result<TrainingBatch> {
        let rows = raw.triples.len();
        let cols = self.sampler.num_entities();
        let mut hr_t = SparseLabels::new(rows, cols);
        let mut tr_h = SparseLabels::new(rows, cols);

        let pool = if self.neg_rate > 0 {
            self.sampler.candidate_pool(self.candidate_pool_size)
        } else {
            Vec::new()
        };

        let mut h = Vec::with_capacity(rows);
        let mut r = Vec::with_capacity(rows);
        let mut t = Vec::with_capacity(rows);

        for (i, triple) in raw.triples.iter().enumerate() {
            h.push(triple.head);
            r.push(triple.relation);
            t.push(triple.tail);

            let tails = self.hr_t.get(&(triple.head, triple.relation));
            let heads = self.tr_h.get(&(triple.tail, triple.relation));

            for &tail in tails.into_iter().flatten() {
                hr_t.add(i, tail, 1.0);
            }
            for &head in heads.into_iter().flatten() {
                tr_h.add(i, head, 1.0);
            }

            for &candidate in &pool {
                if !tails.is_some_and(|s| s.contains(&candidate)) {
                    hr_t.add(i, candidate, -1.0);
                }
                if !heads.is_some_and(|s| s.contains(&candidate)) {
                    tr_h.add(i, candidate, -1.0);
                }
            }
        }

        Ok(TrainingBatch::Projection(ProjectionBatch {
            source_batch: raw.index,
            h,
            r,
            t,
            hr_t,
            tr_h,
        }))
    }
}

/// Build a processor for `strategy`, reading its own snapshot from `store`.
pub fn processor_for(
    strategy: TrainingStrategy,
    store: &dyn KnowledgeGraphStore,
    config: &TrainerConfig,
    seed: Option<u64>,
) -> Box<dyn BatchProcessor> {
    let sampler = NegativeSampler::from_store(store, config, seed);
    match strategy {
        TrainingStrategy::PairwiseBased => Box::new(PairwiseProcessor::new(sampler, config.neg_rate)),
        TrainingStrategy::PointwiseBased => Box::new(PointwiseProcessor::new(sampler, config.neg_rate)),
        TrainingStrategy::ProjectionBased => Box::new(ProjectionProcessor::new(
            sampler,
            store.hr_t_train(),
            store.tr_h_train(),
            config.neg_rate,
            config.candidate_pool_size,
        )),
    }
}

/// Worker thread body.
///
/// Exits when stopped, when either queue disconnects, or after forwarding the
/// first processing error.
pub(crate) fn run_worker(
    id: usize,
    mut processor: Box<dyn BatchProcessor>,
    raw_rx: Receiver<RawBatch>,
    processed_tx: Sender<Result<TrainingBatch>>,
    stop: Arc<AtomicBool>,
) {
    tracing::debug!(worker = id, "worker started");
    let mut produced = 0usize;

    'work: while !stop.load(Ordering::Acquire) {
        let raw = match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(raw) => raw,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let mut outcome = processor.process(raw);
        let failed = outcome.is_err();
        if let Err(e) = &outcome {
            tracing::error!(worker = id, error = %e, "worker failed to build a batch");
        }

        loop {
            match processed_tx.send_timeout(outcome, POLL_INTERVAL) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if stop.load(Ordering::Acquire) {
                        break 'work;
                    }
                    outcome = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => break 'work,
            }
        }

        if failed {
            break;
        }
        produced += 1;
    }

    tracing::debug!(worker = id, produced, "worker exiting");
}
