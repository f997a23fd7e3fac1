use ndarray::Array2;

use crate::backend::Activations;

/// Applies an activation function to its input.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    activation: Activations,
    z: Array2<f32>,
    a: Array2<f32>,
}

impl ActivationLayer {
    pub fn new(activation: Activations) -> Self {
        Self {
            activation,
            z: Array2::zeros((0, 0)),
            a: Array2::zeros((0, 0)),
        }
    }

    pub fn activation(&self) -> Activations {
        self.activation
    }

    pub(super) fn forward(&mut self, x: &Array2<f32>) -> Array2<f32> {
        self.a = self.activation.forward(x);
        self.z = x.to_owned();
        self.a.clone()
    }

    pub(super) fn backward(&self, delta: Array2<f32>) -> Array2<f32> {
        self.activation.backward(&self.z, &self.a, delta)
    }
}
