use ndarray::{Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// The metrics a model can report besides its loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metrics {
    Accuracy,
    BinaryAccuracy,
    MeanAbsoluteError,
    MeanSquaredError,
    MeanSquaredLogarithmicError,
}

impl Metrics {
    /// Computes the metric over a batch of predictions.
    pub fn compute(&self, y_pred: &Array2<f32>, y: &Array2<f32>) -> f32 {
        let n = y_pred.len().max(1) as f32;

        match self {
            Metrics::Accuracy => {
                let hits = y_pred
                    .rows()
                    .into_iter()
                    .zip(y.rows())
                    .filter(|(p, y)| argmax(*p) == argmax(*y))
                    .count();
                hits as f32 / y_pred.nrows().max(1) as f32
            }
            Metrics::BinaryAccuracy => {
                let mut hits = 0;
                Zip::from(y_pred).and(y).for_each(|&p, &y| {
                    if (p > 0.5) == (y > 0.5) {
                        hits += 1;
                    }
                });
                hits as f32 / n
            }
            Metrics::MeanAbsoluteError => (y_pred - y).mapv(f32::abs).sum() / n,
            Metrics::MeanSquaredError => (y_pred - y).mapv(|e| e.powi(2)).sum() / n,
            Metrics::MeanSquaredLogarithmicError => {
                let mut total = 0.;
                Zip::from(y_pred).and(y).for_each(|&p, &y| {
                    total += ((p.max(0.) + 1.).ln() - (y.max(0.) + 1.).ln()).powi(2);
                });
                total / n
            }
        }
    }
}

pub(crate) fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, max), (i, &x)| {
            if x > max {
                (i, x)
            } else {
                (best, max)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn accuracy() {
        let y_pred = array![[0.1, 0.9], [0.8, 0.2], [0.3, 0.7], [0.6, 0.4]];
        let y = array![[0., 1.], [1., 0.], [1., 0.], [1., 0.]];
        assert_eq!(Metrics::Accuracy.compute(&y_pred, &y), 0.75);
    }

    #[test]
    fn mae() {
        let y_pred = array![[1., 3.]];
        let y = array![[2., 1.]];
        assert_eq!(Metrics::MeanAbsoluteError.compute(&y_pred, &y), 1.5);
    }
}
