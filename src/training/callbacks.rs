use log::{info, warn};

use super::{BatchEvent, EpochEvent, TrainingHistory};
use crate::{
    error::Result,
    graph::{VariableRegistry, VariableScope},
    model::Model,
};

/// Hooks invoked by `Model::fit`.
///
/// The model is handed to every hook so a callback can inspect it or call
/// `Model::request_stop`, callbacks never keep a reference to it.
pub trait Callback {
    fn on_train_begin(&mut self, _model: &mut Model) -> Result<()> {
        Ok(())
    }

    fn on_epoch_begin(&mut self, _model: &mut Model, _epoch: usize) -> Result<()> {
        Ok(())
    }

    fn on_train_batch_begin(
        &mut self,
        _model: &mut Model,
        _batch: usize,
        _batch_size: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn on_train_batch_end(&mut self, _model: &mut Model, _event: &BatchEvent) -> Result<()> {
        Ok(())
    }

    /// Called after each validation batch with its loss.
    fn on_test_batch_end(&mut self, _model: &mut Model, _batch: usize, _loss: f32) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self, _model: &mut Model, _event: &EpochEvent) -> Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self, _model: &mut Model, _history: &TrainingHistory) -> Result<()> {
        Ok(())
    }
}

/// The epoch value watched by `EarlyStopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monitor {
    Loss,
    ValLoss,
}

impl Monitor {
    fn pick(self, event: &EpochEvent) -> f32 {
        match self {
            Monitor::Loss => event.loss,
            Monitor::ValLoss => event.val_loss,
        }
    }
}

/// Stops training once the monitored loss stops improving.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
    min_delta: f32,
    patience: usize,
    restore_best_weights: bool,
    best: f32,
    wait: usize,
    best_weights: Option<VariableRegistry>,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    /// Creates a new `EarlyStopping`.
    ///
    /// # Arguments
    /// * `monitor` - The loss to watch.
    /// * `min_delta` - The minimum decrease that counts as an improvement.
    /// * `patience` - The amount of epochs without improvement before stopping.
    pub fn new(monitor: Monitor, min_delta: f32, patience: usize) -> Self {
        Self {
            monitor,
            min_delta: min_delta.abs(),
            patience,
            restore_best_weights: false,
            best: f32::INFINITY,
            wait: 0,
            best_weights: None,
            stopped_epoch: None,
        }
    }

    /// Restores the layer weights of the best epoch when training ends.
    ///
    /// The optimizer state keeps the values of the last training step.
    pub fn restore_best_weights(mut self) -> Self {
        self.restore_best_weights = true;
        self
    }

    /// The epoch training was stopped at, if it was.
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn best(&self) -> f32 {
        self.best
    }
}

impl Callback for EarlyStopping {
    fn on_train_begin(&mut self, _model: &mut Model) -> Result<()> {
        self.best = f32::INFINITY;
        self.wait = 0;
        self.best_weights = None;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(&mut self, model: &mut Model, event: &EpochEvent) -> Result<()> {
        let current = self.monitor.pick(event);
        if current.is_nan() {
            warn!("early stopping monitors {:?} which is not available", self.monitor);
            return Ok(());
        }

        if current < self.best - self.min_delta {
            self.best = current;
            self.wait = 0;
            if self.restore_best_weights {
                self.best_weights = Some(model.registry().clone());
            }
            return Ok(());
        }

        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(event.epoch);
            model.request_stop();
            info!("early stopping at epoch {}", event.epoch);
        }

        Ok(())
    }

    fn on_train_end(&mut self, model: &mut Model, _history: &TrainingHistory) -> Result<()> {
        if self.stopped_epoch.is_none() {
            return Ok(());
        }

        if let Some(best) = self.best_weights.take() {
            model
                .registry_mut()
                .copy_values_from(&best, VariableScope::LayerVariables)?;
            info!("restored the weights with {:?} {}", self.monitor, self.best);
        }

        Ok(())
    }
}

/// Stops training as soon as a batch loss is not finite.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminateOnNan;

impl Callback for TerminateOnNan {
    fn on_train_batch_end(&mut self, model: &mut Model, event: &BatchEvent) -> Result<()> {
        if !event.loss.is_finite() {
            warn!(
                "batch {} of epoch {} has loss {}, terminating training",
                event.batch, event.epoch, event.loss
            );
            model.request_stop();
        }

        Ok(())
    }
}
