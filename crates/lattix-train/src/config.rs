//! Training configuration.
//!
//! Every option has a default so a config file only needs the fields it
//! changes:
//!
//! ```toml
//! model_name = "TransE"
//! batch_size = 256
//! neg_rate = 4
//! sampling = "bern"
//! optimizer = "adam"
//! patience = 3
//! early_stop_epoch = 5
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the corruption side is chosen for a negative sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Per-relation bias learned from head/tail cardinalities.
    Bern,
    /// Fair coin for every relation.
    #[default]
    Uniform,
}

/// Options recognized by the generator, trainer and exporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Model name; also selects the training strategy.
    pub model_name: String,
    /// Positive triples per batch (default: 128).
    pub batch_size: usize,
    /// Negative samples per positive (default: 1).
    pub neg_rate: usize,
    /// Number of sampling workers (default: 2).
    pub num_process_gen: usize,
    /// Corruption side selection (default: uniform).
    pub sampling: SamplingMode,
    /// Non-improving checkpoints tolerated before stopping; <= 0 disables early stopping.
    pub patience: i64,
    /// Epoch interval between early-stop checkpoints (default: 50).
    pub early_stop_epoch: usize,
    /// Epoch interval between evaluations (default: 10).
    pub test_step: usize,
    /// Cap on evaluated test triples, 0 evaluates all (default: 0).
    pub test_num: usize,
    /// Only evaluate after the last epoch (default: false).
    pub full_test_flag: bool,
    /// Number of training epochs (default: 100).
    pub epochs: usize,
    /// Optimizer name: sgd, rms, adam, adagrad or adadelta (default: adam).
    pub optimizer: String,
    /// Learning rate (default: 0.01).
    pub learning_rate: f32,
    /// Embedding dimension (default: 50).
    pub hidden_size: usize,
    /// Margin for pairwise ranking losses (default: 1.0).
    pub margin: f32,
    /// Use the L1 distance instead of squared L2 (default: true).
    pub l1_flag: bool,
    /// L2 regularization weight (default: 0.0).
    pub lmbda: f32,
    /// Run a fixed small number of batches per epoch (default: false).
    pub debug: bool,
    /// Batches per epoch in debug mode (default: 10).
    pub debug_batches: usize,
    /// Capacity of the raw batch queue (default: 10).
    pub raw_queue_size: usize,
    /// Capacity of the processed batch queue (default: 10).
    pub processed_queue_size: usize,
    /// Candidate entities drawn per batch for multiclass negatives (default: 100).
    pub candidate_pool_size: usize,
    /// Draws allowed per negative before giving up (default: 10_000).
    pub max_sampling_attempts: usize,
    /// Random seed; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Restore saved weights before training.
    pub load_from_data: bool,
    /// Persist weights after training.
    pub save_model: bool,
    /// Export embeddings after training.
    pub export_embeddings: bool,
    /// Directory for saved weights.
    pub path_tmp: PathBuf,
    /// Directory for exported embeddings.
    pub path_embeddings: PathBuf,
    /// Directory for training/evaluation result files; `None` keeps them in memory.
    pub path_result: Option<PathBuf>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            model_name: "TransE".to_string(),
            batch_size: 128,
            neg_rate: 1,
            num_process_gen: 2,
            sampling: SamplingMode::Uniform,
            patience: -1,
            early_stop_epoch: 50,
            test_step: 10,
            test_num: 0,
            full_test_flag: false,
            epochs: 100,
            optimizer: "adam".to_string(),
            learning_rate: 0.01,
            hidden_size: 50,
            margin: 1.0,
            l1_flag: true,
            lmbda: 0.0,
            debug: false,
            debug_batches: 10,
            raw_queue_size: 10,
            processed_queue_size: 10,
            candidate_pool_size: 100,
            max_sampling_attempts: 10_000,
            seed: None,
            load_from_data: false,
            save_model: false,
            export_embeddings: false,
            path_tmp: PathBuf::from("intermediate"),
            path_embeddings: PathBuf::from("embeddings"),
            path_result: None,
        }
    }
}

impl TrainerConfig {
    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_neg_rate(mut self, neg_rate: usize) -> Self {
        self.neg_rate = neg_rate;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.num_process_gen = n;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_optimizer(mut self, optimizer: impl Into<String>) -> Self {
        self.optimizer = optimizer.into();
        self
    }

    pub fn with_hidden_size(mut self, dim: usize) -> Self {
        self.hidden_size = dim;
        self
    }

    pub fn with_early_stopping(mut self, patience: i64, early_stop_epoch: usize) -> Self {
        self.patience = patience;
        self.early_stop_epoch = early_stop_epoch;
        self
    }

    pub fn with_test_step(mut self, test_step: usize) -> Self {
        self.test_step = test_step;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject options that would stall or divide by zero.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("batch_size", self.batch_size),
            ("num_process_gen", self.num_process_gen),
            ("early_stop_epoch", self.early_stop_epoch),
            ("test_step", self.test_step),
            ("raw_queue_size", self.raw_queue_size),
            ("processed_queue_size", self.processed_queue_size),
            ("candidate_pool_size", self.candidate_pool_size),
            ("max_sampling_attempts", self.max_sampling_attempts),
            ("hidden_size", self.hidden_size),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be > 0")));
            }
        }
        if self.debug && self.debug_batches == 0 {
            return Err(Error::Config("debug_batches must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    /// Whether early stopping is active at all.
    pub fn early_stopping_enabled(&self) -> bool {
        self.patience > 0
    }

    /// Log every option, sorted by name.
    pub fn summary(&self) {
        tracing::info!("---------------- SUMMARY ----------------");
        if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(self) {
            let width = fields.keys().map(String::len).max().unwrap_or(0);
            for (key, value) in fields {
                tracing::info!("{key:>width$} : {value}");
            }
        }
        tracing::info!("-----------------------------------------");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrainerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.raw_queue_size, 10);
        assert_eq!(config.processed_queue_size, 10);
        assert_eq!(config.candidate_pool_size, 100);
        assert!(!config.early_stopping_enabled());
    }

    #[test]
    fn test_builder() {
        let config = TrainerConfig::default()
            .with_batch_size(64)
            .with_neg_rate(3)
            .with_early_stopping(2, 5)
            .with_sampling(SamplingMode::Bern);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.neg_rate, 3);
        assert_eq!(config.patience, 2);
        assert_eq!(config.early_stop_epoch, 5);
        assert_eq!(config.sampling, SamplingMode::Bern);
        assert!(config.early_stopping_enabled());
    }

    #[test]
    fn test_parse_toml() {
        let config = TrainerConfig::from_toml_str(
            r#"
            model_name = "Complex"
            batch_size = 32
            sampling = "bern"
            optimizer = "adagrad"
            patience = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.model_name, "Complex");
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.sampling, SamplingMode::Bern);
        assert_eq!(config.optimizer, "adagrad");
        assert!(!config.early_stopping_enabled());
        assert_eq!(config.epochs, 100);
    }

    #[test]
    fn test_parse_rejects_unknown_sampling() {
        let err = TrainerConfig::from_toml_str(r#"sampling = "zipf""#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = TrainerConfig::default().with_test_step(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = TrainerConfig::default().with_batch_size(0);
        assert!(config.validate().is_err());
    }
}
