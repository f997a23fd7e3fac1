use ndarray::{s, Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::error::{GraphErr, Result};

/// An in memory dataset of features and labels, one sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    x: Array2<f32>,
    y: Array2<f32>,
}

/// A batch of consecutive samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBatch {
    pub x: Array2<f32>,
    pub y: Array2<f32>,
    /// The amount of samples in the batch, smaller than the batch size for the last one.
    pub size: usize,
}

impl Dataset {
    /// Creates a new `Dataset`.
    ///
    /// # Arguments
    /// * `x` - The features, one sample per row.
    /// * `y` - The labels, one sample per row.
    ///
    /// # Returns
    /// An error if `x` and `y` hold a different amount of samples.
    pub fn new(x: Array2<f32>, y: Array2<f32>) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(GraphErr::ShapeMismatch {
                what: "dataset labels".to_string(),
                expected: format!("{} samples", x.nrows()),
                got: format!("{} samples", y.nrows()),
            });
        }

        Ok(Self { x, y })
    }

    /// Creates a new `Dataset` from flat row major buffers.
    pub fn from_flat(x: Vec<f32>, x_size: usize, y: Vec<f32>, y_size: usize) -> Result<Self> {
        let rows = if x_size == 0 { 0 } else { x.len() / x_size };
        let x = Array2::from_shape_vec((rows, x_size), x).map_err(|e| GraphErr::InvalidArgument {
            reason: format!("features don't split into rows of {x_size}: {e}"),
        })?;

        let rows = if y_size == 0 { 0 } else { y.len() / y_size };
        let y = Array2::from_shape_vec((rows, y_size), y).map_err(|e| GraphErr::InvalidArgument {
            reason: format!("labels don't split into rows of {y_size}: {e}"),
        })?;

        Self::new(x, y)
    }

    /// Creates a new `Dataset` with one hot encoded labels.
    ///
    /// # Arguments
    /// * `x` - The features, one sample per row.
    /// * `labels` - The class of every sample.
    /// * `classes` - The amount of classes.
    pub fn with_classes(x: Array2<f32>, labels: &[usize], classes: usize) -> Result<Self> {
        let mut y = Array2::zeros((labels.len(), classes));
        for (i, &label) in labels.iter().enumerate() {
            if label >= classes {
                return Err(GraphErr::InvalidArgument {
                    reason: format!("label {label} of sample {i} is not below {classes}"),
                });
            }
            y[[i, label]] = 1.;
        }

        Self::new(x, y)
    }

    /// The amount of samples.
    pub fn x_size(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x_size() == 0
    }

    /// The amount of features per sample.
    pub fn feature_size(&self) -> usize {
        self.x.ncols()
    }

    /// The amount of label values per sample.
    pub fn label_size(&self) -> usize {
        self.y.ncols()
    }

    pub fn x(&self) -> &Array2<f32> {
        &self.x
    }

    pub fn y(&self) -> &Array2<f32> {
        &self.y
    }

    /// Iterates the dataset in consecutive batches, the last one may be partial.
    pub fn batch_iterator(&self, batch_size: usize) -> BatchIterator<'_> {
        BatchIterator {
            dataset: self,
            batch_size: batch_size.max(1),
            cursor: 0,
        }
    }

    /// Splits the dataset in two.
    ///
    /// # Arguments
    /// * `ratio` - The share of samples that go to the first part, in `[0, 1]`.
    pub fn split(&self, ratio: f32) -> Result<(Dataset, Dataset)> {
        if !(0. ..=1.).contains(&ratio) {
            return Err(GraphErr::InvalidArgument {
                reason: format!("split ratio {ratio} should be in [0, 1]"),
            });
        }

        let at = (self.x_size() as f32 * ratio).round() as usize;
        let first = Dataset {
            x: self.x.slice(s![..at, ..]).to_owned(),
            y: self.y.slice(s![..at, ..]).to_owned(),
        };
        let second = Dataset {
            x: self.x.slice(s![at.., ..]).to_owned(),
            y: self.y.slice(s![at.., ..]).to_owned(),
        };

        Ok((first, second))
    }

    /// Returns a copy with the samples permuted, the same seed always yields the same order.
    pub fn shuffle(&self, seed: u64) -> Dataset {
        let mut indices: Vec<usize> = (0..self.x_size()).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(seed));

        Dataset {
            x: self.x.select(Axis(0), &indices),
            y: self.y.select(Axis(0), &indices),
        }
    }
}

/// Yields the batches of a `Dataset` in order.
#[derive(Debug, Clone)]
pub struct BatchIterator<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for BatchIterator<'_> {
    type Item = DataBatch;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.dataset.x_size();
        if self.cursor >= total {
            return None;
        }

        let end = (self.cursor + self.batch_size).min(total);
        let batch = DataBatch {
            x: self.dataset.x.slice(s![self.cursor..end, ..]).to_owned(),
            y: self.dataset.y.slice(s![self.cursor..end, ..]).to_owned(),
            size: end - self.cursor,
        };

        self.cursor = end;
        Some(batch)
    }
}
