//! Asynchronous negative-sampling batch pipeline.
//!
//! ```text
//!  store ──► feeder ──raw queue──► worker 0..n ──processed queue──► next_batch()
//! ```
//!
//! One feeder thread slices a fixed permutation of the training triples into
//! raw batches. `num_process_gen` worker threads turn raw batches into
//! training batches for the selected [`TrainingStrategy`]. The two bounded
//! queues are the only state the threads share; a full queue suspends its
//! producer, so nothing is dropped under slow consumption.
//!
//! With more than one worker, processed batches may arrive out of raw order.
//!
//! # Shutdown
//!
//! [`Generator::stop`] raises a stop flag, drops the consumer end of the
//! processed queue and joins every thread. In-flight batches are discarded.
//! Dropping the generator stops it.

mod feeder;
mod worker;

pub use feeder::BatchFeeder;
pub use worker::{processor_for, BatchProcessor, PairwiseProcessor, PointwiseProcessor, ProjectionProcessor};

use crate::batch::TrainingBatch;
use crate::config::TrainerConfig;
use crate::error::{Error, Result};
use crate::sampler::seeded_rng;
use crate::store::KnowledgeGraphStore;
use crate::strategy::TrainingStrategy;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Producer/consumer pipeline of processed training batches.
pub struct Generator {
    strategy: TrainingStrategy,
    processed_rx: Option<Receiver<Result<TrainingBatch>>>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    number_of_batches: usize,
}

impl Generator {
    /// Spawn the feeder and `config.num_process_gen` workers.
    ///
    /// Fails before spawning anything if the training split cannot fill one
    /// batch or the configuration is invalid.
    pub fn new(
        config: &TrainerConfig,
        strategy: TrainingStrategy,
        store: Arc<dyn KnowledgeGraphStore>,
    ) -> Result<Self> {
        config.validate()?;

        let mut rng = seeded_rng(config.seed);
        let feeder = BatchFeeder::new(store.triplets_train(), config.batch_size, &mut rng)?;
        let number_of_batches = feeder.number_of_batches();

        let (raw_tx, raw_rx) = bounded(config.raw_queue_size);
        let (processed_tx, processed_rx) = bounded(config.processed_queue_size);
        let stop = Arc::new(AtomicBool::new(false));

        let mut generator = Self {
            strategy,
            processed_rx: Some(processed_rx),
            stop: Arc::clone(&stop),
            handles: Vec::with_capacity(config.num_process_gen + 1),
            number_of_batches,
        };

        let feeder_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("lattix-feeder".to_string())
            .spawn(move || feeder::run_feeder(feeder, raw_tx, feeder_stop))?;
        generator.handles.push(handle);

        for id in 0..config.num_process_gen {
            let worker_seed = config.seed.map(|s| s.wrapping_add(id as u64 + 1));
            let processor = worker::processor_for(strategy, store.as_ref(), config, worker_seed);
            let raw_rx = raw_rx.clone();
            let processed_tx = processed_tx.clone();
            let worker_stop = Arc::clone(&stop);
            // on failure the partially built generator is dropped, which stops what already runs
            let handle = thread::Builder::new()
                .name(format!("lattix-worker-{id}"))
                .spawn(move || worker::run_worker(id, processor, raw_rx, processed_tx, worker_stop))?;
            generator.handles.push(handle);
        }

        tracing::info!(
            strategy = %strategy,
            workers = config.num_process_gen,
            batch_size = config.batch_size,
            number_of_batches,
            "batch generator started"
        );
        Ok(generator)
    }

    /// Like [`Generator::new`] but with the strategy given by its tag.
    pub fn from_tag(config: &TrainerConfig, tag: &str, store: Arc<dyn KnowledgeGraphStore>) -> Result<Self> {
        let strategy: TrainingStrategy = tag.parse()?;
        Self::new(config, strategy, store)
    }

    pub fn strategy(&self) -> TrainingStrategy {
        self.strategy
    }

    /// Raw batches per pass over the training split.
    pub fn number_of_batches(&self) -> usize {
        self.number_of_batches
    }

    /// Block until the next processed batch is ready.
    ///
    /// Returns a worker's error if it failed building the batch, and
    /// [`Error::PipelineClosed`] once every worker has exited or after `stop`.
    pub fn next_batch(&self) -> Result<TrainingBatch> {
        let rx = self.processed_rx.as_ref().ok_or(Error::PipelineClosed)?;
        rx.recv().map_err(|_| Error::PipelineClosed)?
    }

    /// Like [`Generator::next_batch`], giving up after `timeout`.
    pub fn next_batch_timeout(&self, timeout: Duration) -> Result<TrainingBatch> {
        let rx = self.processed_rx.as_ref().ok_or(Error::PipelineClosed)?;
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(Error::PipelineStalled(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::PipelineClosed),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.processed_rx.is_none()
    }

    /// Stop every thread and wait for them. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.processed_rx.is_none() && self.handles.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::Release);
        self.processed_rx = None;

        let mut panicked = 0usize;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                panicked += 1;
            }
        }
        if panicked > 0 {
            tracing::warn!(panicked, "pipeline threads panicked before shutdown");
        }
        tracing::info!(strategy = %self.strategy, "batch generator stopped");
    }
}

impl Iterator for Generator {
    type Item = Result<TrainingBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Err(Error::PipelineClosed) => None,
            other => Some(other),
        }
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("strategy", &self.strategy)
            .field("threads", &self.handles.len())
            .field("number_of_batches", &self.number_of_batches)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KnowledgeGraph;
    use crate::triple::Triple;

    fn store(n: usize) -> Arc<dyn KnowledgeGraphStore> {
        let train = (0..n).map(|i| Triple::new(i % 50, i % 3, (i * 7 + 1) % 50)).collect();
        Arc::new(KnowledgeGraph::from_ids(50, 3, train, vec![], vec![]).unwrap())
    }

    #[test]
    fn test_pulls_and_stops() {
        let config = TrainerConfig::default().with_batch_size(10).with_workers(2).with_seed(4);
        let mut generator = Generator::new(&config, TrainingStrategy::PairwiseBased, store(40)).unwrap();
        assert_eq!(generator.number_of_batches(), 4);
        for _ in 0..6 {
            let batch = generator.next_batch().unwrap();
            assert_eq!(batch.strategy(), TrainingStrategy::PairwiseBased);
            assert!(batch.source_batch() < 4);
        }
        generator.stop();
        generator.stop();
        assert!(generator.is_stopped());
        assert!(matches!(generator.next_batch(), Err(Error::PipelineClosed)));
        assert!(generator.next().is_none());
    }

    #[test]
    fn test_unknown_tag_fails_fast() {
        let config = TrainerConfig::default().with_batch_size(10);
        let err = Generator::from_tag(&config, "listwise", store(40)).unwrap_err();
        assert!(matches!(err, Error::UnknownStrategy(_)));
    }
}
