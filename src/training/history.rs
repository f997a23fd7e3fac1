/// The outcome of a single training batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEvent {
    /// The epoch the batch belongs to, starting at 1.
    pub epoch: usize,
    /// The index of the batch inside its epoch, starting at 0.
    pub batch: usize,
    pub loss: f32,
    pub metrics: Vec<f32>,
}

/// The averages of a whole training epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochEvent {
    /// The epoch, starting at 1.
    pub epoch: usize,
    pub loss: f32,
    pub metrics: Vec<f32>,
    /// NaN when no validation dataset was given.
    pub val_loss: f32,
    /// NaN per metric when no validation dataset was given.
    pub val_metrics: Vec<f32>,
}

impl EpochEvent {
    pub fn has_validation(&self) -> bool {
        !self.val_loss.is_nan()
    }
}

/// Every batch and epoch event recorded while fitting a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    batches: Vec<BatchEvent>,
    epochs: Vec<EpochEvent>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_batch(&mut self, event: BatchEvent) {
        self.batches.push(event);
    }

    pub fn append_epoch(&mut self, event: EpochEvent) {
        self.epochs.push(event);
    }

    pub fn batches(&self) -> &[BatchEvent] {
        &self.batches
    }

    pub fn epochs(&self) -> &[EpochEvent] {
        &self.epochs
    }

    pub fn last_epoch(&self) -> Option<&EpochEvent> {
        self.epochs.last()
    }

    /// Returns the batch events of one epoch.
    pub fn batches_of(&self, epoch: usize) -> impl Iterator<Item = &BatchEvent> {
        self.batches.iter().filter(move |event| event.epoch == epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_by_epoch() {
        let mut history = TrainingHistory::new();
        for epoch in 1..=2 {
            for batch in 0..3 {
                history.append_batch(BatchEvent {
                    epoch,
                    batch,
                    loss: 1.,
                    metrics: Vec::new(),
                });
            }
        }

        assert_eq!(history.batches().len(), 6);
        assert_eq!(history.batches_of(2).count(), 3);
        assert!(history.last_epoch().is_none());
    }
}
