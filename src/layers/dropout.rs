use ndarray::Array2;
use rand::{rngs::StdRng, Rng};

use crate::{
    error::{GraphErr, Result},
    shape::TensorShape,
};

/// Randomly zeroes a fraction of its inputs during training.
///
/// Kept values are scaled by `1 / (1 - rate)` so inference needs no rescaling.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    mask: Option<Array2<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `rate` - The fraction of inputs to drop, in `[0, 1)`.
    pub fn new(rate: f32) -> Self {
        Self { rate, mask: None }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub(super) fn compute_output_shape(&self, input: &TensorShape) -> Result<TensorShape> {
        if !(0. ..1.).contains(&self.rate) {
            return Err(GraphErr::InvalidArchitecture {
                reason: format!("the dropout rate should be in [0, 1) but got {}", self.rate),
            });
        }

        Ok(input.clone())
    }

    pub(super) fn forward(&mut self, x: &Array2<f32>, training: bool, rng: &mut StdRng) -> Array2<f32> {
        if !training || self.rate <= 0. {
            self.mask = None;
            return x.to_owned();
        }

        let keep = 1. - self.rate;
        let mask = Array2::from_shape_simple_fn(x.raw_dim(), || {
            if rng.random::<f32>() < keep {
                1. / keep
            } else {
                0.
            }
        });

        let y = x * &mask;
        self.mask = Some(mask);
        y
    }

    pub(super) fn backward(&self, delta: Array2<f32>) -> Array2<f32> {
        match &self.mask {
            Some(mask) => delta * mask,
            None => delta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn identity_at_inference() {
        let mut dropout = Dropout::new(0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let x = Array2::ones((2, 4));

        assert_eq!(dropout.forward(&x, false, &mut rng), x);
    }

    #[test]
    fn rate_is_checked() {
        let input = TensorShape::new(vec![4]);
        assert_eq!(Dropout::new(0.).compute_output_shape(&input).unwrap(), input);

        for rate in [1., 1.5, -0.1, f32::NAN] {
            let res = Dropout::new(rate).compute_output_shape(&input);
            assert!(matches!(res, Err(GraphErr::InvalidArchitecture { .. })));
        }
    }

    #[test]
    fn kept_values_are_scaled() {
        let mut dropout = Dropout::new(0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let y = dropout.forward(&Array2::ones((4, 16)), true, &mut rng);

        assert!(y.iter().all(|&v| v == 0. || v == 2.));
        assert!(y.iter().any(|&v| v == 0.));
    }
}
