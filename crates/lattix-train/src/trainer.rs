//! Epoch loop driving a model from the batch pipeline.
//!
//! ```text
//! Idle ──build_model──► Building ──► { TrainingEpoch ──► Evaluating }* ──► Stopped
//! ```
//!
//! Each step pulls exactly one processed batch, computes one loss/gradient
//! pair and applies one optimizer update. The optimizer is the only writer
//! of the model parameters.
//!
//! # Evaluation cadence
//!
//! Unless `full_test_flag` is set, the evaluator runs on epoch 0, on every
//! epoch divisible by `test_step` and on the last epoch. With
//! `full_test_flag` it runs on the last epoch only.
//!
//! # Example
//!
//! ```rust,ignore
//! use lattix_train::{KnowledgeGraph, Trainer, TrainerConfig, TransE};
//! use std::sync::Arc;
//!
//! let kg = KnowledgeGraph::from_tsv_files("train.tsv", "valid.tsv", "test.tsv")?;
//! let config = TrainerConfig::default().with_epochs(50).with_batch_size(256);
//! let model = TransE::new(config.hidden_size, config.margin, config.l1_flag);
//!
//! let mut trainer = Trainer::new(model, config, Arc::new(kg));
//! trainer.build_model()?;
//! let outcome = trainer.train_model()?;
//! ```

use crate::batch::TrainingBatch;
use crate::config::TrainerConfig;
use crate::early_stop::{Decision, EarlyStopping};
use crate::error::{Error, Result};
use crate::evaluation::{EpochRecord, Evaluator, EvaluatorSignal, RankEvaluator, RankMetrics};
use crate::export;
use crate::generator::Generator;
use crate::model::{model_from_config, KgeModel};
use crate::optimizer::{Optimizer, OptimizerKind};
use crate::sampler::seeded_rng;
use crate::store::KnowledgeGraphStore;
use crate::strategy::TrainingStrategy;
use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Building,
    TrainingEpoch,
    Evaluating,
    Stopped,
}

/// Summary of a finished `train_model` run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingOutcome {
    /// Accumulated loss of the last epoch run.
    pub final_loss: f32,
    pub epochs_run: usize,
    pub early_stopped: bool,
}

pub struct Trainer<M: KgeModel = Box<dyn KgeModel>> {
    model: M,
    config: TrainerConfig,
    store: Arc<dyn KnowledgeGraphStore>,
    strategy: TrainingStrategy,
    state: TrainerState,
    optimizer: Option<Optimizer>,
    generator: Option<Generator>,
    evaluator: Option<Box<dyn Evaluator>>,
    training_results: Vec<EpochRecord>,
    show_progress: bool,
}

impl Trainer<Box<dyn KgeModel>> {
    /// Trainer for the model named by `config.model_name`.
    pub fn from_config(config: TrainerConfig, store: Arc<dyn KnowledgeGraphStore>) -> Result<Self> {
        let model = model_from_config(&config)?;
        Ok(Self::new(model, config, store))
    }
}

impl<M: KgeModel> Trainer<M> {
    pub fn new(model: M, config: TrainerConfig, store: Arc<dyn KnowledgeGraphStore>) -> Self {
        let strategy = model.strategy();
        Self {
            model,
            config,
            store,
            strategy,
            state: TrainerState::Idle,
            optimizer: None,
            generator: None,
            evaluator: None,
            training_results: Vec::new(),
            show_progress: true,
        }
    }

    /// Replace the default [`RankEvaluator`].
    pub fn with_evaluator(mut self, evaluator: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Draw per-epoch progress bars (default: true).
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn strategy(&self) -> TrainingStrategy {
        self.strategy
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    /// Per-epoch accumulated losses, in epoch order.
    pub fn training_results(&self) -> &[EpochRecord] {
        &self.training_results
    }

    /// Create the optimizer and allocate the model parameters.
    pub fn build_model(&mut self) -> Result<()> {
        self.state = TrainerState::Building;
        self.config.validate()?;

        let kind: OptimizerKind = self.config.optimizer.parse()?;
        if kind.prefers_cpu_placement() {
            tracing::debug!(optimizer = %kind, "allocating parameters on the CPU");
        }
        self.optimizer = Some(Optimizer::new(kind, self.config.learning_rate));

        let mut rng = seeded_rng(self.config.seed);
        self.model.def_parameters(&self.store.meta(), &mut rng)?;

        self.config.summary();
        tracing::info!(
            model = self.model.name(),
            strategy = %self.strategy,
            parameters = self.model.parameters().len(),
            "model built"
        );
        Ok(())
    }

    fn ensure_built(&mut self) -> Result<()> {
        if self.optimizer.is_none() {
            self.build_model()?;
        }
        Ok(())
    }

    fn ensure_evaluator(&mut self) {
        if self.evaluator.is_none() {
            self.evaluator = Some(Box::new(RankEvaluator::new(self.store.as_ref(), &self.config)));
        }
    }

    fn start_generator(&mut self) -> Result<()> {
        let generator = Generator::new(&self.config, self.strategy, Arc::clone(&self.store))?;
        self.generator = Some(generator);
        Ok(())
    }

    fn stop_generator(&mut self) {
        if let Some(mut generator) = self.generator.take() {
            generator.stop();
        }
    }

    /// Train for `config.epochs` epochs or until early stopping triggers.
    pub fn train_model(&mut self) -> Result<TrainingOutcome> {
        self.ensure_built()?;
        self.start_generator()?;
        self.ensure_evaluator();

        if self.config.load_from_data {
            self.load_model()?;
        }

        let result = self.run_epochs(false);
        self.stop_generator();

        // epochs finished before a pipeline failure are still recorded
        let flushed = self.flush_evaluator();
        self.state = TrainerState::Stopped;
        let outcome = result?;
        flushed?;

        if self.config.save_model {
            self.save_model()?;
        }
        if self.config.export_embeddings {
            self.export_embeddings()?;
        }

        tracing::info!(
            epochs_run = outcome.epochs_run,
            final_loss = outcome.final_loss,
            early_stopped = outcome.early_stopped,
            "training finished"
        );
        Ok(outcome)
    }

    /// Train without progress output or periodic evaluation, then evaluate
    /// once and return the metrics.
    pub fn tune_model(&mut self) -> Result<RankMetrics> {
        self.ensure_built()?;
        self.start_generator()?;
        self.ensure_evaluator();

        let result = self.run_epochs(true);
        self.stop_generator();
        let outcome = result?;

        let last_epoch = outcome.epochs_run.saturating_sub(1);
        self.state = TrainerState::Evaluating;
        let metrics = match self.evaluator.as_mut() {
            Some(evaluator) => {
                let metrics = evaluator.test(&self.model, last_epoch)?;
                evaluator.stop()?;
                metrics
            }
            None => RankMetrics::default(),
        };
        self.state = TrainerState::Stopped;
        Ok(metrics)
    }

    fn flush_evaluator(&mut self) -> Result<()> {
        if let Some(evaluator) = self.evaluator.as_mut() {
            evaluator.save_training_result(&self.training_results)?;
            evaluator.stop()?;
        }
        Ok(())
    }

    fn run_epochs(&mut self, tuning: bool) -> Result<TrainingOutcome> {
        let mut early_stopping = EarlyStopping::from_config(&self.config);
        let mut outcome = TrainingOutcome {
            final_loss: f32::INFINITY,
            epochs_run: 0,
            early_stopped: false,
        };

        for epoch in 0..self.config.epochs {
            let loss = self.train_model_epoch(epoch, tuning)?;
            outcome.final_loss = loss;
            outcome.epochs_run = epoch + 1;

            if !tuning {
                self.test(epoch)?;
            }

            if early_stopping.observe(epoch, loss) == Decision::Stop {
                if let Some(evaluator) = self.evaluator.as_mut() {
                    evaluator.notify(EvaluatorSignal::EarlyStop);
                }
                outcome.early_stopped = true;
                break;
            }
        }

        Ok(outcome)
    }

    /// Batches per epoch: one pass over the training split, or the fixed
    /// debug count.
    pub fn batches_per_epoch(&self) -> usize {
        if self.config.debug {
            self.config.debug_batches
        } else {
            self.store.meta().tot_train_triples / self.config.batch_size
        }
    }

    /// Run one epoch and return its accumulated loss.
    pub fn train_model_epoch(&mut self, epoch: usize, tuning: bool) -> Result<f32> {
        self.state = TrainerState::TrainingEpoch;
        let num_batch = self.batches_per_epoch();

        let progress = if self.show_progress && !tuning {
            ProgressBar::new(num_batch as u64)
        } else {
            ProgressBar::hidden()
        };
        progress.set_message(format!("Epoch[{epoch}/{}]", self.config.epochs));

        let mut acc_loss = 0.0f32;
        for _ in 0..num_batch {
            let batch = self.generator.as_ref().ok_or(Error::PipelineClosed)?.next_batch()?;
            let loss = self.train_step(&batch)?;
            acc_loss += loss;
            progress.inc(1);
            progress.set_message(format!("Epoch[{epoch}/{}] loss {loss:.4} acc_loss {acc_loss:.4}", self.config.epochs));
        }
        progress.finish_and_clear();

        self.training_results.push(EpochRecord { epoch, loss: acc_loss });
        tracing::info!(epoch, loss = acc_loss, batches = num_batch, "epoch finished");
        Ok(acc_loss)
    }

    /// One gradient computation and one optimizer update.
    pub fn train_step(&mut self, batch: &TrainingBatch) -> Result<f32> {
        let (loss, grads) = self.model.loss_and_gradients(batch)?;
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| Error::Validation("build_model must run before training".into()))?;
        optimizer.apply(self.model.parameters_mut(), &grads)?;
        Ok(loss)
    }

    /// Whether `epoch` is an evaluation epoch.
    pub fn should_test(&self, epoch: usize) -> bool {
        let last = epoch + 1 == self.config.epochs;
        if !self.config.full_test_flag {
            epoch % self.config.test_step == 0 || epoch == 0 || last
        } else {
            last
        }
    }

    /// Evaluate if `epoch` is on the cadence.
    pub fn test(&mut self, epoch: usize) -> Result<Option<RankMetrics>> {
        if !self.should_test(epoch) {
            return Ok(None);
        }
        self.ensure_evaluator();
        self.state = TrainerState::Evaluating;
        let metrics = match self.evaluator.as_mut() {
            Some(evaluator) => Some(evaluator.test(&self.model, epoch)?),
            None => None,
        };
        self.state = TrainerState::TrainingEpoch;
        Ok(metrics)
    }

    pub fn save_model(&self) -> Result<PathBuf> {
        export::save_model(&self.model, &self.config.path_tmp)
    }

    /// Restore saved weights; `false` if none exist.
    pub fn load_model(&mut self) -> Result<bool> {
        self.ensure_built()?;
        export::load_model(&mut self.model, &self.config.path_tmp)
    }

    pub fn export_embeddings(&self) -> Result<PathBuf> {
        export::export_embeddings(&self.model, self.store.as_ref(), &self.config.path_embeddings)
    }

    /// The `topk` most plausible tails of `(head, relation, ?)` with labels.
    pub fn infer_tails(&mut self, head: usize, relation: usize, topk: usize) -> Result<Vec<(usize, String)>> {
        self.check_entity(head)?;
        self.check_relation(relation)?;
        self.ensure_evaluator();
        let tails = match self.evaluator.as_ref() {
            Some(evaluator) => evaluator.test_tail_rank(&self.model, head, relation, topk),
            None => Vec::new(),
        };

        let idx2ent = self.store.idx2entity();
        tracing::info!(
            head = label(&idx2ent, head),
            relation = label(&self.store.idx2relation(), relation),
            "inferred tails"
        );
        Ok(labeled(tails, &idx2ent, "predicted tail"))
    }

    /// The `topk` most plausible heads of `(?, relation, tail)` with labels.
    pub fn infer_heads(&mut self, relation: usize, tail: usize, topk: usize) -> Result<Vec<(usize, String)>> {
        self.check_entity(tail)?;
        self.check_relation(relation)?;
        self.ensure_evaluator();
        let heads = match self.evaluator.as_ref() {
            Some(evaluator) => evaluator.test_head_rank(&self.model, relation, tail, topk),
            None => Vec::new(),
        };

        let idx2ent = self.store.idx2entity();
        tracing::info!(
            tail = label(&idx2ent, tail),
            relation = label(&self.store.idx2relation(), relation),
            "inferred heads"
        );
        Ok(labeled(heads, &idx2ent, "predicted head"))
    }

    /// The `topk` most plausible relations of `(head, ?, tail)` with labels.
    pub fn infer_rels(&mut self, head: usize, tail: usize, topk: usize) -> Result<Vec<(usize, String)>> {
        self.check_entity(head)?;
        self.check_entity(tail)?;
        self.ensure_evaluator();
        let rels = match self.evaluator.as_ref() {
            Some(evaluator) => evaluator.test_rel_rank(&self.model, head, tail, topk),
            None => Vec::new(),
        };

        let idx2ent = self.store.idx2entity();
        tracing::info!(head = label(&idx2ent, head), tail = label(&idx2ent, tail), "inferred relations");
        Ok(labeled(rels, &self.store.idx2relation(), "predicted relation"))
    }

    fn check_entity(&self, id: usize) -> Result<()> {
        if id < self.model.num_entities() {
            Ok(())
        } else {
            Err(Error::EntityNotFound(id))
        }
    }

    fn check_relation(&self, id: usize) -> Result<()> {
        if id < self.model.num_relations() {
            Ok(())
        } else {
            Err(Error::RelationNotFound(id))
        }
    }
}

fn label(labels: &std::collections::BTreeMap<usize, String>, id: usize) -> &str {
    labels.get(&id).map_or("?", String::as_str)
}

fn labeled(
    ids: Vec<usize>,
    labels: &std::collections::BTreeMap<usize, String>,
    what: &str,
) -> Vec<(usize, String)> {
    ids.into_iter()
        .enumerate()
        .map(|(rank, id)| {
            let name = label(labels, id).to_string();
            tracing::info!(rank, id, label = %name, "{what}");
            (id, name)
        })
        .collect()
}
