//! Embedding models trained by the pipeline.
//!
//! A model owns a list of named 2-D [`Parameter`]s and computes, for one
//! processed batch, the loss together with one dense gradient per parameter.
//! The optimizer then applies those gradients in place; nothing else mutates
//! the parameters.
//!
//! | Model | Strategy | Loss |
//! |-------|----------|------|
//! | [`TransE`] | pairwise | margin hinge on L1 / squared L2 distance |
//! | [`SmeLinear`] | pairwise | margin hinge on the linear matching energy |
//! | [`Complex`] | pointwise | softplus of `-y * score` |
//! | [`ProjEPointwise`] | projection | weighted binary cross-entropy |
//!
//! Scores follow one convention everywhere: higher means more plausible.

mod complex;
mod proje;
mod sme;
mod transe;

pub use complex::Complex;
pub use proje::ProjEPointwise;
pub use sme::SmeLinear;
pub use transe::TransE;

use crate::batch::TrainingBatch;
use crate::config::TrainerConfig;
use crate::error::{Error, Result};
use crate::store::KgMeta;
use crate::strategy::TrainingStrategy;
use crate::triple::Triple;
use ndarray::{Array2, ArrayView1};
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A named trainable tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Array2<f32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Array2<f32>) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Xavier (Glorot) normal initialisation.
    pub fn xavier(name: impl Into<String>, rows: usize, cols: usize, rng: &mut dyn RngCore) -> Result<Self> {
        let std = (2.0 / (rows + cols).max(1) as f32).sqrt();
        let normal = Normal::new(0.0f32, std).map_err(|e| Error::Validation(e.to_string()))?;
        let value = Array2::from_shape_simple_fn((rows, cols), || normal.sample(&mut *rng));
        Ok(Self::new(name, value))
    }

    pub fn zeros(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self::new(name, Array2::zeros((rows, cols)))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    #[inline]
    pub fn row(&self, i: usize) -> ArrayView1<'_, f32> {
        self.value.row(i)
    }
}

/// A knowledge graph embedding model.
pub trait KgeModel: Send + Sync {
    /// Model name; selects the training strategy and the export directory.
    fn name(&self) -> &str;

    fn strategy(&self) -> TrainingStrategy {
        TrainingStrategy::for_model_name(self.name())
    }

    /// Allocate and initialise every parameter for the given vocabulary.
    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()>;

    fn parameters(&self) -> &[Parameter];

    fn parameters_mut(&mut self) -> &mut [Parameter];

    /// Loss of `batch` and the gradient of that loss for every parameter,
    /// in the order of [`KgeModel::parameters`].
    fn loss_and_gradients(&self, batch: &TrainingBatch) -> Result<(f32, Vec<Array2<f32>>)>;

    /// Plausibility of a single triple.
    fn score_triple(&self, triple: Triple) -> f32;

    fn num_entities(&self) -> usize;

    fn num_relations(&self) -> usize;

    /// Scores of `(head, relation, e)` for every entity `e`.
    fn score_tails(&self, head: usize, relation: usize) -> Vec<f32> {
        (0..self.num_entities())
            .map(|t| self.score_triple(Triple::new(head, relation, t)))
            .collect()
    }

    /// Scores of `(e, relation, tail)` for every entity `e`.
    fn score_heads(&self, relation: usize, tail: usize) -> Vec<f32> {
        (0..self.num_entities())
            .map(|h| self.score_triple(Triple::new(h, relation, tail)))
            .collect()
    }

    /// Scores of `(head, r, tail)` for every relation `r`.
    fn score_relations(&self, head: usize, tail: usize) -> Vec<f32> {
        (0..self.num_relations())
            .map(|r| self.score_triple(Triple::new(head, r, tail)))
            .collect()
    }

    /// Overwrite parameters with `loaded`, matched by name and shape.
    fn set_parameters(&mut self, loaded: Vec<Parameter>) -> Result<()> {
        let params = self.parameters_mut();
        if loaded.len() != params.len() {
            return Err(Error::ShapeMismatch(format!(
                "expected {} parameters, got {}",
                params.len(),
                loaded.len()
            )));
        }
        for (param, new) in params.iter_mut().zip(loaded) {
            if param.name != new.name || param.shape() != new.shape() {
                return Err(Error::ShapeMismatch(format!(
                    "{} {:?} cannot be restored from {} {:?}",
                    param.name,
                    param.shape(),
                    new.name,
                    new.shape()
                )));
            }
            param.value = new.value;
        }
        Ok(())
    }
}

/// Build a model by name from the training options.
pub fn model_from_config(config: &TrainerConfig) -> Result<Box<dyn KgeModel>> {
    let dim = config.hidden_size;
    let model: Box<dyn KgeModel> = match config.model_name.to_ascii_lowercase().as_str() {
        "transe" => Box::new(TransE::new(dim, config.margin, config.l1_flag)),
        "smelinear" => Box::new(SmeLinear::new(dim, config.margin)),
        "complex" => Box::new(Complex::new(dim, config.lmbda)),
        "proje_pointwise" => Box::new(ProjEPointwise::new(dim, config.lmbda)),
        other => return Err(Error::Config(format!("unknown model: {other}"))),
    };
    Ok(model)
}

impl<M: KgeModel + ?Sized> KgeModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn strategy(&self) -> TrainingStrategy {
        (**self).strategy()
    }

    fn def_parameters(&mut self, meta: &KgMeta, rng: &mut dyn RngCore) -> Result<()> {
        (**self).def_parameters(meta, rng)
    }

    fn parameters(&self) -> &[Parameter] {
        (**self).parameters()
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        (**self).parameters_mut()
    }

    fn loss_and_gradients(&self, batch: &TrainingBatch) -> Result<(f32, Vec<Array2<f32>>)> {
        (**self).loss_and_gradients(batch)
    }

    fn score_triple(&self, triple: Triple) -> f32 {
        (**self).score_triple(triple)
    }

    fn num_entities(&self) -> usize {
        (**self).num_entities()
    }

    fn num_relations(&self) -> usize {
        (**self).num_relations()
    }

    fn score_tails(&self, head: usize, relation: usize) -> Vec<f32> {
        (**self).score_tails(head, relation)
    }

    fn score_heads(&self, relation: usize, tail: usize) -> Vec<f32> {
        (**self).score_heads(relation, tail)
    }

    fn score_relations(&self, head: usize, tail: usize) -> Vec<f32> {
        (**self).score_relations(head, tail)
    }
}

/// Reject entity/relation ids outside the allocated tables.
pub(crate) fn check_ids(entities: &[&[usize]], relations: &[&[usize]], meta: (usize, usize)) -> Result<()> {
    let (num_entities, num_relations) = meta;
    for ids in entities {
        if let Some(&bad) = ids.iter().find(|&&e| e >= num_entities) {
            return Err(Error::EntityNotFound(bad));
        }
    }
    for ids in relations {
        if let Some(&bad) = ids.iter().find(|&&r| r >= num_relations) {
            return Err(Error::RelationNotFound(bad));
        }
    }
    Ok(())
}

pub(crate) fn wrong_batch(model: &str, expected: TrainingStrategy, got: &TrainingBatch) -> Error {
    Error::ShapeMismatch(format!(
        "{model} trains on {expected} batches, got a {} batch",
        got.strategy()
    ))
}

/// `ln(1 + e^x)` without overflow.
#[inline]
pub(crate) fn softplus(x: f32) -> f32 {
    if x > 20.0 {
        x
    } else if x < -20.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    #[test]
    fn test_xavier_shape_and_scale() {
        let mut rng = XorShiftRng::seed_from_u64(1);
        let p = Parameter::xavier("w", 200, 50, &mut rng).unwrap();
        assert_eq!(p.shape(), (200, 50));
        let var = p.value.mapv(|x| x * x).mean().unwrap();
        let expected = 2.0 / 250.0;
        assert!((var - expected).abs() < expected * 0.2, "variance {var}");
    }

    #[test]
    fn test_stable_activations() {
        assert!((softplus(0.0) - 2f32.ln()).abs() < 1e-6);
        assert_eq!(softplus(100.0), 100.0);
        assert!(softplus(-100.0) >= 0.0);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(-100.0) >= 0.0);
        assert!(sigmoid(100.0) <= 1.0);
    }

    #[test]
    fn test_model_from_config() {
        let config = TrainerConfig::default().with_model_name("Complex");
        let model = model_from_config(&config).unwrap();
        assert_eq!(model.strategy(), TrainingStrategy::PointwiseBased);

        let config = TrainerConfig::default().with_model_name("DistMult");
        assert!(matches!(model_from_config(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_set_parameters_checks_shapes() {
        let mut model = TransE::new(4, 1.0, true);
        testing::init(&mut model, 5, 2);
        let saved = model.parameters().to_vec();
        assert!(model.set_parameters(saved.clone()).is_ok());

        let mut wrong = saved;
        wrong[0].value = Array2::zeros((3, 4));
        assert!(matches!(model.set_parameters(wrong), Err(Error::ShapeMismatch(_))));
    }
}
