mod callbacks;
mod history;

use log::{debug, info, warn};
use ndarray::{Array1, Array2};

pub use callbacks::{Callback, EarlyStopping, Monitor, TerminateOnNan};
pub use history::{BatchEvent, EpochEvent, TrainingHistory};

use crate::{
    backend::argmax,
    dataset::{DataBatch, Dataset},
    error::{GraphErr, Result},
    graph::VariableScope,
    model::Model,
};

const DEFAULT_EPOCHS: usize = 5;
const DEFAULT_BATCH_SIZE: usize = 32;

/// The configuration of a `Model::fit` run.
pub struct FitOptions<'a> {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation: Option<&'a Dataset>,
    pub validation_batch_size: usize,
    pub callbacks: Vec<&'a mut dyn Callback>,
}

impl Default for FitOptions<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_EPOCHS, DEFAULT_BATCH_SIZE)
    }
}

impl<'a> FitOptions<'a> {
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        Self {
            epochs,
            batch_size,
            validation: None,
            validation_batch_size: batch_size,
            callbacks: Vec::new(),
        }
    }

    /// Evaluates the model on `dataset` after every epoch.
    pub fn with_validation(mut self, dataset: &'a Dataset, batch_size: usize) -> Self {
        self.validation = Some(dataset);
        self.validation_batch_size = batch_size;
        self
    }

    pub fn with_callback(mut self, callback: &'a mut dyn Callback) -> Self {
        self.callbacks.push(callback);
        self
    }
}

/// The batch averaged loss and metrics of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub metrics: Vec<f32>,
}

impl Model {
    /// Trains the model.
    ///
    /// Weights and optimizer state are initialized first unless they already are. Training stops
    /// early when a stop is requested, the check runs before every epoch and every batch.
    ///
    /// # Arguments
    /// * `train` - The training dataset.
    /// * `options` - Epochs, batch sizes, validation and callbacks.
    ///
    /// # Returns
    /// The history with an event per batch and per epoch.
    pub fn fit(&mut self, train: &Dataset, mut options: FitOptions<'_>) -> Result<TrainingHistory> {
        self.ensure_compiled("fit")?;
        if options.epochs == 0 || options.batch_size == 0 || options.validation_batch_size == 0 {
            return Err(GraphErr::InvalidArgument {
                reason: "epochs and batch sizes should be > 0".to_string(),
            });
        }

        self.sync_trainable_variables()?;
        let weights_init_required = !self.is_weights_initialized();
        let optimizer_init_required = !self.is_optimizer_initialized();
        if weights_init_required {
            self.initialize(VariableScope::LayerVariables, true)?;
        }
        if optimizer_init_required {
            self.initialize(VariableScope::OptimizerVariables, true)?;
        }

        self.clear_stop_request();
        for callback in options.callbacks.iter_mut() {
            callback.on_train_begin(self)?;
        }

        info!(
            "train begin: {} samples, {} epochs, batch size {}",
            train.x_size(),
            options.epochs,
            options.batch_size
        );

        let mut history = TrainingHistory::new();
        for epoch in 1..=options.epochs {
            if self.is_stop_requested() {
                warn!("training stopped before epoch {epoch}");
                break;
            }

            for callback in options.callbacks.iter_mut() {
                callback.on_epoch_begin(self, epoch)?;
            }

            let mut loss_sum = 0.;
            let mut metric_sums = vec![0.; self.metrics().len()];
            let mut count = 0;

            for (batch, data) in train.batch_iterator(options.batch_size).enumerate() {
                if self.is_stop_requested() {
                    break;
                }

                for callback in options.callbacks.iter_mut() {
                    callback.on_train_batch_begin(self, batch, data.size)?;
                }

                self.check_batch(&data)?;
                let (loss, metrics) = self.train_step(&data.x, &data.y)?;

                loss_sum += loss;
                for (sum, value) in metric_sums.iter_mut().zip(&metrics) {
                    *sum += value;
                }
                count += 1;

                let event = BatchEvent {
                    epoch,
                    batch,
                    loss,
                    metrics,
                };
                debug!("epoch {epoch} batch {batch} loss {loss}");

                for callback in options.callbacks.iter_mut() {
                    callback.on_train_batch_end(self, &event)?;
                }
                history.append_batch(event);
            }

            if count == 0 {
                break;
            }

            let n = count as f32;
            let (val_loss, val_metrics) = match options.validation {
                Some(validation) => {
                    let eval = self.evaluate_with(
                        validation,
                        options.validation_batch_size,
                        &mut options.callbacks,
                    )?;
                    (eval.loss, eval.metrics)
                }
                None => (f32::NAN, vec![f32::NAN; metric_sums.len()]),
            };

            let event = EpochEvent {
                epoch,
                loss: loss_sum / n,
                metrics: metric_sums.iter().map(|sum| sum / n).collect(),
                val_loss,
                val_metrics,
            };

            if event.has_validation() {
                info!(
                    "epoch {epoch}: loss {} metrics {:?} val loss {} val metrics {:?}",
                    event.loss, event.metrics, event.val_loss, event.val_metrics
                );
            } else {
                info!("epoch {epoch}: loss {} metrics {:?}", event.loss, event.metrics);
            }

            for callback in options.callbacks.iter_mut() {
                callback.on_epoch_end(self, &event)?;
            }
            history.append_epoch(event);
        }

        for callback in options.callbacks.iter_mut() {
            callback.on_train_end(self, &history)?;
        }

        info!("train end after {} epochs", history.epochs().len());
        Ok(history)
    }

    /// Evaluates the model on a dataset without modifying it.
    ///
    /// # Returns
    /// The loss and metrics averaged over the batches.
    pub fn evaluate(&mut self, dataset: &Dataset, batch_size: usize) -> Result<Evaluation> {
        self.evaluate_with(dataset, batch_size, &mut [])
    }

    fn evaluate_with(
        &mut self,
        dataset: &Dataset,
        batch_size: usize,
        callbacks: &mut [&mut dyn Callback],
    ) -> Result<Evaluation> {
        self.ensure_ready("evaluate")?;
        if batch_size == 0 || dataset.is_empty() {
            return Err(GraphErr::InvalidArgument {
                reason: "evaluation needs a non empty dataset and a batch size > 0".to_string(),
            });
        }

        let mut loss_sum = 0.;
        let mut metric_sums = vec![0.; self.metrics().len()];
        let mut count = 0;

        for (batch, data) in dataset.batch_iterator(batch_size).enumerate() {
            self.check_batch(&data)?;
            let (loss, metrics) = self.test_step(&data.x, &data.y)?;

            loss_sum += loss;
            for (sum, value) in metric_sums.iter_mut().zip(&metrics) {
                *sum += value;
            }
            count += 1;

            for callback in callbacks.iter_mut() {
                callback.on_test_batch_end(self, batch, loss)?;
            }
        }

        let n = count as f32;
        Ok(Evaluation {
            loss: loss_sum / n,
            metrics: metric_sums.iter().map(|sum| sum / n).collect(),
        })
    }

    /// Predicts the class of a single sample.
    pub fn predict(&mut self, sample: &[f32]) -> Result<usize> {
        let probabilities = self.predict_softly(sample)?;
        Ok(argmax(probabilities.view()))
    }

    /// Returns the model output for a single sample.
    pub fn predict_softly(&mut self, sample: &[f32]) -> Result<Array1<f32>> {
        self.ensure_ready("predict")?;
        let x = self.sample_batch(sample)?;
        let y = self.infer(&x)?;
        Ok(y.row(0).to_owned())
    }

    /// Predicts the class of every sample of a dataset.
    ///
    /// # Returns
    /// An error if the amount of samples isn't a multiple of `batch_size`.
    pub fn predict_batch(&mut self, dataset: &Dataset, batch_size: usize) -> Result<Vec<usize>> {
        self.ensure_ready("predict")?;
        if batch_size == 0 || dataset.x_size() % batch_size != 0 {
            return Err(GraphErr::BatchNotDivisible {
                size: dataset.x_size(),
                batch_size,
            });
        }

        let mut predictions = Vec::with_capacity(dataset.x_size());
        for data in dataset.batch_iterator(batch_size) {
            let y = self.infer(&data.x)?;
            predictions.extend(y.rows().into_iter().map(argmax));
        }

        Ok(predictions)
    }

    /// Predicts the class of a single sample and collects the intermediate activations.
    ///
    /// # Returns
    /// The class and the output of every hidden layer that applies an activation, in
    /// topological order.
    pub fn predict_and_get_activations(&mut self, sample: &[f32]) -> Result<(usize, Vec<Array2<f32>>)> {
        self.ensure_ready("predict")?;
        let x = self.sample_batch(sample)?;
        let mut outputs = self.forward_pass(&x, false)?;

        let y = outputs.pop().ok_or_else(|| GraphErr::InvalidArchitecture {
            reason: "the model has no layers".to_string(),
        })?;

        let activations = self
            .layers()
            .iter()
            .zip(outputs)
            .filter(|(layer, _)| layer.has_activation())
            .map(|(_, output)| output)
            .collect();

        Ok((argmax(y.row(0)), activations))
    }

    /// Fails unless the model is compiled and its weights are initialized.
    fn ensure_ready(&self, step: &'static str) -> Result<()> {
        self.ensure_compiled(step)?;
        if !self.is_weights_initialized() {
            return Err(GraphErr::NotInitialized {
                step: "init() or load_weights()",
            });
        }

        Ok(())
    }

    /// Checks a batch against the shapes computed at compile time.
    fn check_batch(&self, batch: &DataBatch) -> Result<()> {
        let features = self.input_size();
        if batch.x.ncols() != features {
            return Err(GraphErr::ShapeMismatch {
                what: "batch features".to_string(),
                expected: format!("[{}, {features}]", batch.size),
                got: format!("{:?}", batch.x.shape()),
            });
        }

        let labels = self.output_size();
        if batch.y.ncols() != labels {
            return Err(GraphErr::ShapeMismatch {
                what: "batch labels, the number of classes may be set incorrectly".to_string(),
                expected: format!("[{}, {labels}]", batch.size),
                got: format!("{:?}", batch.y.shape()),
            });
        }

        Ok(())
    }

    /// Wraps a single sample into a batch of one.
    fn sample_batch(&self, sample: &[f32]) -> Result<Array2<f32>> {
        let features = self.input_size();
        if sample.len() != features {
            return Err(GraphErr::ShapeMismatch {
                what: "sample".to_string(),
                expected: format!("{features} features"),
                got: format!("{} features", sample.len()),
            });
        }

        Array2::from_shape_vec((1, features), sample.to_vec()).map_err(|e| {
            GraphErr::InvalidArgument {
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{Activations, Losses, Metrics},
        layers::Layer,
        model::{CompileConfig, Sequential},
        optimizer::Sgd,
    };
    use ndarray::array;

    fn compiled() -> Model {
        let mut model = Sequential::of(vec![
            Layer::input(&[2]),
            Layer::dense(4, Activations::Tanh),
            Layer::dense(2, Activations::Softmax),
        ])
        .unwrap();
        model
            .compile(
                Sgd::new(0.1).unwrap(),
                Losses::MeanSquaredError,
                &[Metrics::Accuracy],
                CompileConfig::default(),
            )
            .unwrap();
        model
    }

    fn dataset() -> Dataset {
        Dataset::with_classes(array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]], &[0, 1, 1, 0], 2)
            .unwrap()
    }

    #[test]
    fn batch_and_epoch_events() {
        let mut model = compiled();
        let history = model.fit(&dataset(), FitOptions::new(3, 2)).unwrap();

        assert_eq!(history.batches().len(), 3 * 2);
        assert_eq!(history.epochs().len(), 3);

        for epoch in history.epochs() {
            let losses: Vec<f32> = history.batches_of(epoch.epoch).map(|b| b.loss).collect();
            let mean = losses.iter().sum::<f32>() / losses.len() as f32;
            assert!((epoch.loss - mean).abs() < 1e-6);
            assert!(epoch.val_loss.is_nan());
        }
    }

    #[test]
    fn fit_initializes_once() {
        let mut model = compiled();
        model.fit(&dataset(), FitOptions::new(1, 4)).unwrap();
        let bias = model.variable_value("dense_3_dense_bias").unwrap().clone();

        model.fit(&dataset(), FitOptions::new(1, 4)).unwrap();
        assert_ne!(model.variable_value("dense_3_dense_bias").unwrap(), &bias);
        assert!(model.is_optimizer_initialized());
    }

    #[test]
    fn evaluate_is_idempotent() {
        let mut model = compiled();
        model.init().unwrap();

        let first = model.evaluate(&dataset(), 3).unwrap();
        let second = model.evaluate(&dataset(), 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.metrics.len(), 1);
    }

    #[test]
    fn predict_needs_initialized_weights() {
        let mut model = compiled();
        let res = model.predict(&[0., 1.]);
        assert!(matches!(res, Err(GraphErr::NotInitialized { .. })));
    }

    #[test]
    fn predict_batch_must_divide() {
        let mut model = compiled();
        model.init().unwrap();

        let res = model.predict_batch(&dataset(), 3);
        assert!(matches!(
            res,
            Err(GraphErr::BatchNotDivisible {
                size: 4,
                batch_size: 3
            })
        ));

        let predictions = model.predict_batch(&dataset(), 2).unwrap();
        assert_eq!(predictions.len(), 4);
        assert_eq!(predictions[1], model.predict(&[0., 1.]).unwrap());
    }

    #[test]
    fn activations_of_hidden_layers() {
        let mut model = compiled();
        model.init().unwrap();

        let (class, activations) = model.predict_and_get_activations(&[1., 0.]).unwrap();
        assert!(class < 2);
        assert_eq!(activations.len(), 1);
        assert_eq!(activations[0].shape(), &[1, 4]);
    }

    #[test]
    fn wrong_label_width() {
        let mut model = compiled();
        let ds = Dataset::new(Array2::zeros((2, 2)), Array2::zeros((2, 3))).unwrap();

        let res = model.fit(&ds, FitOptions::new(1, 2));
        assert!(matches!(res, Err(GraphErr::ShapeMismatch { .. })));
    }

    #[test]
    fn stop_before_training() {
        struct StopAtBegin;

        impl Callback for StopAtBegin {
            fn on_train_begin(&mut self, model: &mut Model) -> Result<()> {
                model.request_stop();
                Ok(())
            }
        }

        let mut model = compiled();
        let mut stop = StopAtBegin;
        let history = model
            .fit(&dataset(), FitOptions::new(5, 2).with_callback(&mut stop))
            .unwrap();

        assert!(history.batches().is_empty());
        assert!(history.epochs().is_empty());
    }

    #[test]
    fn early_stopping() {
        let mut model = compiled();
        let mut early = EarlyStopping::new(Monitor::Loss, 10., 2);
        let history = model
            .fit(&dataset(), FitOptions::new(10, 4).with_callback(&mut early))
            .unwrap();

        assert_eq!(early.stopped_epoch(), Some(3));
        assert_eq!(history.epochs().len(), 3);
    }

    #[test]
    fn validation_loss() {
        let mut model = compiled();
        let ds = dataset();
        let history = model
            .fit(&ds, FitOptions::new(2, 2).with_validation(&ds, 4))
            .unwrap();

        let last = history.last_epoch().unwrap();
        assert!(last.has_validation());
        assert_eq!(last.val_metrics.len(), 1);
    }
}
