//! Bounded-patience early stopping on the epoch loss.
//!
//! The loss is only inspected at checkpoints, every `early_stop_epoch`
//! epochs (`(epoch + 1) % early_stop_epoch == 0`), and is compared with the
//! loss seen at the previous checkpoint. A checkpoint that does not strictly
//! improve costs one unit of patience; once patience is spent, the next
//! non-improving checkpoint stops training. An improving checkpoint restores
//! the full patience.
//!
//! With `patience = P`, a run that never improves stops at its `(P + 1)`-th
//! non-improving checkpoint. `P <= 0` disables the policy.

use crate::config::TrainerConfig;

/// Outcome of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: i64,
    early_stop_epoch: usize,
    patience_left: i64,
    previous_loss: f32,
}

impl EarlyStopping {
    pub fn new(patience: i64, early_stop_epoch: usize) -> Self {
        Self {
            patience,
            early_stop_epoch: early_stop_epoch.max(1),
            patience_left: patience,
            previous_loss: f32::INFINITY,
        }
    }

    pub fn from_config(config: &TrainerConfig) -> Self {
        Self::new(config.patience, config.early_stop_epoch)
    }

    pub fn enabled(&self) -> bool {
        self.patience > 0
    }

    pub fn is_checkpoint(&self, epoch: usize) -> bool {
        (epoch + 1) % self.early_stop_epoch == 0
    }

    pub fn patience_left(&self) -> i64 {
        self.patience_left
    }

    /// Record the accumulated loss of `epoch`.
    pub fn observe(&mut self, epoch: usize, loss: f32) -> Decision {
        if !self.enabled() || !self.is_checkpoint(epoch) {
            return Decision::Continue;
        }

        let previous = self.previous_loss;
        self.previous_loss = loss;

        // NaN never counts as an improvement
        let improved = previous > loss;
        if improved {
            self.patience_left = self.patience;
            return Decision::Continue;
        }

        if self.patience_left > 0 {
            self.patience_left -= 1;
            tracing::info!(
                epoch,
                previous_loss = previous,
                loss,
                patience_left = self.patience_left,
                "loss did not improve at checkpoint"
            );
            Decision::Continue
        } else {
            tracing::info!(epoch, previous_loss = previous, loss, "patience exhausted, stopping early");
            Decision::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(policy: &mut EarlyStopping, losses: &[f32]) -> Option<usize> {
        losses
            .iter()
            .enumerate()
            .find(|&(epoch, &loss)| policy.observe(epoch, loss) == Decision::Stop)
            .map(|(epoch, _)| epoch)
    }

    #[test]
    fn test_constant_loss_stops_after_patience_plus_one_checkpoints() {
        let mut policy = EarlyStopping::new(2, 1);
        // first checkpoint improves on infinity, then three flat ones
        assert_eq!(run(&mut policy, &[1.0; 10]), Some(3));
    }

    #[test]
    fn test_only_checkpoints_are_inspected() {
        let mut policy = EarlyStopping::new(1, 5);
        let losses = [1.0f32; 20];
        // checkpoints at epochs 4, 9, 14: improve, flat (patience 0), flat (stop)
        assert_eq!(run(&mut policy, &losses), Some(14));
    }

    #[test]
    fn test_improvement_resets_patience() {
        let mut policy = EarlyStopping::new(1, 1);
        assert_eq!(policy.observe(0, 5.0), Decision::Continue);
        assert_eq!(policy.observe(1, 5.0), Decision::Continue);
        assert_eq!(policy.patience_left(), 0);
        assert_eq!(policy.observe(2, 4.0), Decision::Continue);
        assert_eq!(policy.patience_left(), 1);
        assert_eq!(policy.observe(3, 4.5), Decision::Continue);
        assert_eq!(policy.observe(4, 4.5), Decision::Stop);
    }

    #[test]
    fn test_compares_against_previous_checkpoint() {
        let mut policy = EarlyStopping::new(1, 2);
        // checkpoint losses: 10 (epoch 1), 9 (epoch 3); epoch 2 is ignored
        assert_eq!(policy.observe(1, 10.0), Decision::Continue);
        assert_eq!(policy.observe(2, 1.0), Decision::Continue);
        assert_eq!(policy.observe(3, 9.0), Decision::Continue);
        assert_eq!(policy.patience_left(), 1);
    }

    #[test]
    fn test_disabled() {
        for patience in [0, -1] {
            let mut policy = EarlyStopping::new(patience, 1);
            assert!(!policy.enabled());
            assert_eq!(run(&mut policy, &[1.0; 50]), None);
        }
    }
}
