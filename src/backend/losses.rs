use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use super::activations::softmax;

const EPSILON: f32 = 1e-7;

/// The loss functions a model can be compiled with.
///
/// Every loss is reduced to the mean over all the elements of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Losses {
    MeanSquaredError,
    MeanAbsoluteError,
    BinaryCrossentropy,
    /// Expects one hot labels and treats the model output as unnormalized logits.
    SoftmaxCrossEntropyWithLogits,
    Hinge,
    Huber { delta: f32 },
}

impl Losses {
    /// Computes the loss of a batch of predictions.
    ///
    /// # Arguments
    /// * `y_pred` - The model's output.
    /// * `y` - The expected output.
    pub fn loss(&self, y_pred: &Array2<f32>, y: &Array2<f32>) -> f32 {
        let n = y_pred.len().max(1) as f32;

        match *self {
            Losses::MeanSquaredError => (y_pred - y).mapv(|e| e.powi(2)).sum() / n,
            Losses::MeanAbsoluteError => (y_pred - y).mapv(f32::abs).sum() / n,
            Losses::BinaryCrossentropy => {
                let mut total = 0.;
                Zip::from(y_pred).and(y).for_each(|&p, &y| {
                    let p = p.clamp(EPSILON, 1. - EPSILON);
                    total -= y * p.ln() + (1. - y) * (1. - p).ln();
                });
                total / n
            }
            Losses::SoftmaxCrossEntropyWithLogits => {
                let probs = softmax(y_pred);
                let mut total = 0.;
                Zip::from(&probs).and(y).for_each(|&p, &y| {
                    total -= y * p.max(EPSILON).ln();
                });
                total / y_pred.nrows().max(1) as f32
            }
            Losses::Hinge => {
                let mut total = 0.;
                Zip::from(y_pred).and(y).for_each(|&p, &y| {
                    total += (1. - signed(y) * p).max(0.);
                });
                total / n
            }
            Losses::Huber { delta } => {
                let mut total = 0.;
                Zip::from(y_pred).and(y).for_each(|&p, &y| {
                    let e = (p - y).abs();
                    total += if e <= delta {
                        0.5 * e * e
                    } else {
                        delta * e - 0.5 * delta * delta
                    };
                });
                total / n
            }
        }
    }

    /// Computes the gradient of the loss w.r.t. the model's output.
    pub fn gradient(&self, y_pred: &Array2<f32>, y: &Array2<f32>) -> Array2<f32> {
        let n = y_pred.len().max(1) as f32;

        match *self {
            Losses::MeanSquaredError => (y_pred - y) * (2. / n),
            Losses::MeanAbsoluteError => (y_pred - y).mapv(|e| e.signum() * step(e != 0.) / n),
            Losses::BinaryCrossentropy => Zip::from(y_pred).and(y).map_collect(|&p, &y| {
                let p = p.clamp(EPSILON, 1. - EPSILON);
                (p - y) / (p * (1. - p)) / n
            }),
            Losses::SoftmaxCrossEntropyWithLogits => {
                (softmax(y_pred) - y) / y_pred.nrows().max(1) as f32
            }
            Losses::Hinge => Zip::from(y_pred).and(y).map_collect(|&p, &y| {
                let y = signed(y);
                if 1. - y * p > 0. {
                    -y / n
                } else {
                    0.
                }
            }),
            Losses::Huber { delta } => (y_pred - y).mapv(|e| e.clamp(-delta, delta) / n),
        }
    }
}

/// Maps `{0, 1}` labels to `{-1, 1}`.
fn signed(y: f32) -> f32 {
    if y <= 0. {
        -1.
    } else {
        1.
    }
}

fn step(cond: bool) -> f32 {
    if cond {
        1.
    } else {
        0.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn numeric_gradient(loss: Losses, y_pred: &Array2<f32>, y: &Array2<f32>) -> Array2<f32> {
        let h = 1e-3;
        let mut grad = Array2::zeros(y_pred.dim());

        for ((i, j), g) in grad.indexed_iter_mut() {
            let mut plus = y_pred.clone();
            let mut minus = y_pred.clone();
            plus[[i, j]] += h;
            minus[[i, j]] -= h;
            *g = (loss.loss(&plus, y) - loss.loss(&minus, y)) / (2. * h);
        }

        grad
    }

    #[test]
    fn mse() {
        let y_pred = array![[1., 2.], [3., 4.]];
        let y = array![[1., 1.], [1., 1.]];
        assert_eq!(Losses::MeanSquaredError.loss(&y_pred, &y), 3.5);
    }

    #[test]
    fn gradients_match_numeric() {
        let y_pred = array![[0.2, -0.4, 0.9], [1.3, 0.1, -0.7]];
        let y = array![[0., 0., 1.], [1., 0., 0.]];

        for loss in [
            Losses::MeanSquaredError,
            Losses::SoftmaxCrossEntropyWithLogits,
            Losses::Huber { delta: 0.5 },
        ] {
            let analytic = loss.gradient(&y_pred, &y);
            let numeric = numeric_gradient(loss, &y_pred, &y);

            Zip::from(&analytic).and(&numeric).for_each(|a, n| {
                assert!((a - n).abs() < 1e-2, "{loss:?}: {a} vs {n}");
            });
        }
    }

    #[test]
    fn binary_crossentropy_is_finite_at_bounds() {
        let y_pred = array![[0., 1.]];
        let y = array![[1., 0.]];
        assert!(Losses::BinaryCrossentropy.loss(&y_pred, &y).is_finite());
    }
}
