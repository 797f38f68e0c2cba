//! Gradient-descent optimizers.
//!
//! Update rules and default hyperparameters follow the Keras optimizers:
//!
//! | Name | Update |
//! |------|--------|
//! | `sgd` | `θ -= lr · g` |
//! | `rms` | `v = ρv + (1-ρ)g²; θ -= lr · g / (√v + ε)` |
//! | `adam` | bias-corrected first/second moments |
//! | `adagrad` | `a += g²; θ -= lr · g / (√a + ε)` |
//! | `adadelta` | `a = ρa + (1-ρ)g²; Δ = √(d + ε)/√(a + ε) · g; d = ρd + (1-ρ)Δ²; θ -= lr · Δ` |

use crate::error::{Error, Result};
use crate::model::Parameter;
use ndarray::{Array2, Zip};
use std::fmt;
use std::str::FromStr;

const EPSILON: f32 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    Sgd,
    Rms,
    Adam,
    Adagrad,
    Adadelta,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sgd => "sgd",
            Self::Rms => "rms",
            Self::Adam => "adam",
            Self::Adagrad => "adagrad",
            Self::Adadelta => "adadelta",
        }
    }

    /// Adaptive optimizers whose parameters are allocated on the CPU.
    pub fn prefers_cpu_placement(&self) -> bool {
        matches!(self, Self::Rms | Self::Adagrad | Self::Adadelta)
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(Self::Sgd),
            "rms" => Ok(Self::Rms),
            "adam" => Ok(Self::Adam),
            "adagrad" => Ok(Self::Adagrad),
            "adadelta" => Ok(Self::Adadelta),
            other => Err(Error::UnknownOptimizer(other.to_string())),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-parameter optimizer state.
#[derive(Debug, Clone)]
struct Slots {
    first: Array2<f32>,
    second: Array2<f32>,
}

/// Applies gradients to parameters in place.
#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f32,
    step: i32,
    slots: Vec<Slots>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f32) -> Self {
        Self {
            kind,
            learning_rate,
            step: 0,
            slots: Vec::new(),
        }
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Number of updates applied so far.
    pub fn iterations(&self) -> i32 {
        self.step
    }

    fn init_slots(&mut self, params: &[Parameter]) {
        let initial = if self.kind == OptimizerKind::Adagrad { 0.1 } else { 0.0 };
        self.slots = params
            .iter()
            .map(|p| Slots {
                first: Array2::zeros(p.value.raw_dim()),
                second: Array2::from_elem(p.value.raw_dim(), initial),
            })
            .collect();
    }

    /// One update step: `params[i] -= f(grads[i])`.
    pub fn apply(&mut self, params: &mut [Parameter], grads: &[Array2<f32>]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} gradients for {} parameters",
                grads.len(),
                params.len()
            )));
        }
        for (p, g) in params.iter().zip(grads) {
            if p.value.dim() != g.dim() {
                return Err(Error::ShapeMismatch(format!(
                    "gradient {:?} for {} {:?}",
                    g.dim(),
                    p.name,
                    p.value.dim()
                )));
            }
        }
        if self.slots.len() != params.len() {
            self.init_slots(params);
        }

        self.step += 1;
        let lr = self.learning_rate;

        match self.kind {
            OptimizerKind::Sgd => {
                for (p, g) in params.iter_mut().zip(grads) {
                    p.value.scaled_add(-lr, g);
                }
            }
            OptimizerKind::Rms => {
                let rho = 0.9;
                for ((p, g), s) in params.iter_mut().zip(grads).zip(&mut self.slots) {
                    Zip::from(&mut p.value).and(g).and(&mut s.second).for_each(|w, &g, v| {
                        *v = rho * *v + (1.0 - rho) * g * g;
                        *w -= lr * g / (v.sqrt() + EPSILON);
                    });
                }
            }
            OptimizerKind::Adam => {
                let (beta1, beta2) = (0.9f32, 0.999f32);
                let t = self.step;
                let lr_t = lr * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));
                for ((p, g), s) in params.iter_mut().zip(grads).zip(&mut self.slots) {
                    Zip::from(&mut p.value)
                        .and(g)
                        .and(&mut s.first)
                        .and(&mut s.second)
                        .for_each(|w, &g, m, v| {
                            *m = beta1 * *m + (1.0 - beta1) * g;
                            *v = beta2 * *v + (1.0 - beta2) * g * g;
                            *w -= lr_t * *m / (v.sqrt() + EPSILON);
                        });
                }
            }
            OptimizerKind::Adagrad => {
                for ((p, g), s) in params.iter_mut().zip(grads).zip(&mut self.slots) {
                    Zip::from(&mut p.value).and(g).and(&mut s.second).for_each(|w, &g, a| {
                        *a += g * g;
                        *w -= lr * g / (a.sqrt() + EPSILON);
                    });
                }
            }
            OptimizerKind::Adadelta => {
                let rho = 0.95;
                for ((p, g), s) in params.iter_mut().zip(grads).zip(&mut self.slots) {
                    Zip::from(&mut p.value)
                        .and(g)
                        .and(&mut s.second)
                        .and(&mut s.first)
                        .for_each(|w, &g, acc, delta_acc| {
                            *acc = rho * *acc + (1.0 - rho) * g * g;
                            let delta = (*delta_acc + EPSILON).sqrt() / (*acc + EPSILON).sqrt() * g;
                            *delta_acc = rho * *delta_acc + (1.0 - rho) * delta * delta;
                            *w -= lr * delta;
                        });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quadratic_descent(kind: OptimizerKind, lr: f32, steps: usize) -> f32 {
        // minimise |w - 3|²
        let mut params = vec![Parameter::new("w", array![[0.0f32, 6.0]])];
        let mut opt = Optimizer::new(kind, lr);
        for _ in 0..steps {
            let grad = params[0].value.mapv(|w| 2.0 * (w - 3.0));
            opt.apply(&mut params, &[grad]).unwrap();
        }
        params[0].value.iter().map(|w| (w - 3.0).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_names() {
        for name in ["sgd", "rms", "adam", "adagrad", "adadelta"] {
            let kind: OptimizerKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
        let err = "lbfgs".parse::<OptimizerKind>().unwrap_err();
        assert_eq!(err.to_string(), "No support for lbfgs optimizer");
        assert!(OptimizerKind::Adagrad.prefers_cpu_placement());
        assert!(!OptimizerKind::Adam.prefers_cpu_placement());
    }

    #[test]
    fn test_sgd_step() {
        let mut params = vec![Parameter::new("w", array![[1.0f32, -1.0]])];
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.5);
        opt.apply(&mut params, &[array![[2.0, -2.0]]]).unwrap();
        assert_eq!(params[0].value, array![[0.0, 0.0]]);
        assert_eq!(opt.iterations(), 1);
    }

    #[test]
    fn test_adam_first_step_is_lr_sized() {
        let mut params = vec![Parameter::new("w", array![[0.0f32]])];
        let mut opt = Optimizer::new(OptimizerKind::Adam, 0.1);
        opt.apply(&mut params, &[array![[5.0]]]).unwrap();
        assert!((params[0].value[[0, 0]] + 0.1).abs() < 1e-4);
    }

    #[test]
    fn test_all_optimizers_descend() {
        assert!(quadratic_descent(OptimizerKind::Sgd, 0.1, 200) < 1e-3);
        assert!(quadratic_descent(OptimizerKind::Rms, 0.01, 2000) < 0.05);
        assert!(quadratic_descent(OptimizerKind::Adam, 0.01, 2000) < 0.05);
        assert!(quadratic_descent(OptimizerKind::Adagrad, 0.5, 2000) < 0.05);
        // adadelta with the Keras default step is slow; only check progress
        assert!(quadratic_descent(OptimizerKind::Adadelta, 1.0, 2000) < 3.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let mut params = vec![Parameter::new("w", array![[0.0f32, 0.0]])];
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.1);
        let err = opt.apply(&mut params, &[array![[1.0]]]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }
}
