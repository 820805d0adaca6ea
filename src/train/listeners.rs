//! Hooks into execution and training.

use super::config::TrainingConfig;
use crate::error::Result;
use crate::graph::{Graph, Operation, Value};
use crate::optimizers::GradientUpdater;
use tracing::info;

/// Snapshot handed to [`Listener::epoch_end`].
pub struct EpochEnd<'a> {
    /// Zero-based index of the epoch that just finished.
    pub epoch: usize,
    /// Minibatch updates completed so far (over all `fit` calls).
    pub iteration: usize,
    /// Mean loss of the epoch, one entry per loss variable.
    pub losses: &'a [f64],
    pub loss_variables: &'a [String],
    pub graph: &'a Graph,
    pub config: &'a TrainingConfig,
    pub updater: Option<&'a dyn GradientUpdater>,
}

/// Receives notifications during execution and training. Every method has a
/// no-op default.
pub trait Listener {
    fn epoch_start(&mut self, _epoch: usize) {}

    fn iteration_done(&mut self, _epoch: usize, _iteration: usize, _loss: f64) {}

    fn epoch_end(&mut self, _state: &EpochEnd<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after every executed op, including ops inside control flow bodies.
    fn op_executed(&mut self, _op: &Operation, _outputs: &[Value]) {}
}

/// Logs the minibatch loss every `frequency` iterations.
#[derive(Debug, Clone)]
pub struct ScoreListener {
    frequency: usize,
    last_loss: Option<f64>,
}

impl ScoreListener {
    pub fn new(frequency: usize) -> Self {
        Self {
            frequency: frequency.max(1),
            last_loss: None,
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }
}

impl Listener for ScoreListener {
    fn iteration_done(&mut self, epoch: usize, iteration: usize, loss: f64) {
        self.last_loss = Some(loss);
        if iteration % self.frequency == 0 {
            info!(epoch, iteration, loss, "score");
        }
    }

    fn epoch_end(&mut self, state: &EpochEnd<'_>) -> Result<()> {
        let total: f64 = state.losses.iter().sum();
        info!(epoch = state.epoch, loss = total, "epoch complete");
        Ok(())
    }
}
