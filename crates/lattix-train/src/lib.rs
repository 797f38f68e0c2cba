#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

//! Training loop and batch pipeline for knowledge graph embeddings.
//!
//! This crate trains embedding models on `(head, relation, tail)` triples:
//!
//! - [`Generator`] - a feeder thread and N worker threads that turn slices of
//!   the training split into negative-sampled batches
//! - [`NegativeSampler`] - head/tail corruption under the `uniform` or `bern`
//!   policy, never emitting a known positive
//! - [`Trainer`] - the epoch loop, evaluation cadence, early stopping,
//!   persistence and interactive inference
//! - [`KgeModel`] - models exposing named parameters, a loss with dense
//!   gradients and triple scores
//!
//! # Pipeline
//!
//! ```text
//!              raw queue (bounded)          processed queue (bounded)
//!   feeder ────────────────────► workers ───────────────────────────► trainer
//!   permutation slices           sample negatives / build labels      one batch per step
//! ```
//!
//! Both queues are bounded, so a slow consumer throttles the producers.
//! The feeder shuffles the training split once and then cycles through the
//! same permutation for the lifetime of the pipeline.
//!
//! # Training strategies
//!
//! | Strategy | Batch | Models |
//! |----------|-------|--------|
//! | `pairwise_based` | positives aligned with `neg_rate` negatives each | TransE, SMELinear |
//! | `pointwise_based` | interleaved records labeled +1 / -1 | Complex |
//! | `projection_based` | sparse multi-label targets per `(h, r)` and `(t, r)` | ProjE_pointwise |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use lattix_train::{KnowledgeGraph, Trainer, TrainerConfig};
//! use std::sync::Arc;
//!
//! lattix_train::logging::init();
//! let kg = KnowledgeGraph::from_tsv_files("train.tsv", "valid.tsv", "test.tsv")?;
//! let config = TrainerConfig::from_toml_file("train.toml")?;
//!
//! let mut trainer = Trainer::from_config(config, Arc::new(kg))?;
//! trainer.build_model()?;
//! let outcome = trainer.train_model()?;
//! println!("{} epochs, final loss {}", outcome.epochs_run, outcome.final_loss);
//! ```

pub mod batch;
pub mod config;
pub mod early_stop;
pub mod error;
pub mod evaluation;
pub mod export;
pub mod generator;
pub mod logging;
pub mod model;
pub mod optimizer;
pub mod sampler;
pub mod store;
pub mod strategy;
pub mod trainer;
pub mod triple;

pub use batch::{PairwiseBatch, PointwiseBatch, ProjectionBatch, RawBatch, SparseLabels, TrainingBatch};
pub use config::{SamplingMode, TrainerConfig};
pub use early_stop::{Decision, EarlyStopping};
pub use error::{CorruptionSide, Error, Result};
pub use evaluation::{EpochRecord, EvaluationRecord, Evaluator, EvaluatorSignal, RankEvaluator, RankMetrics};
pub use generator::{BatchProcessor, Generator};
pub use model::{model_from_config, Complex, KgeModel, Parameter, ProjEPointwise, SmeLinear, TransE};
pub use optimizer::{Optimizer, OptimizerKind};
pub use sampler::NegativeSampler;
pub use store::{KgMeta, KnowledgeGraph, KnowledgeGraphStore};
pub use strategy::TrainingStrategy;
pub use trainer::{Trainer, TrainerState, TrainingOutcome};
pub use triple::{PositiveSet, Triple};
