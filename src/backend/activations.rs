use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

/// The activation functions a layer can apply to its output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activations {
    Linear,
    Sigmoid,
    Tanh,
    #[default]
    Relu,
    Relu6,
    Elu,
    Selu,
    Softplus,
    Softsign,
    Swish,
    HardSigmoid,
    Softmax,
}

use Activations::*;

impl Activations {
    /// Applies the activation to a single scalar.
    ///
    /// `Softmax` is not element-wise, it is handled row by row in `Activations::forward`.
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Linear | Softmax => x,
            Sigmoid => sigmoid(x),
            Tanh => x.tanh(),
            Relu => x.max(0.),
            Relu6 => x.clamp(0., 6.),
            Elu => {
                if x > 0. {
                    x
                } else {
                    x.exp() - 1.
                }
            }
            Selu => {
                if x > 0. {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * (x.exp() - 1.)
                }
            }
            Softplus => x.exp().ln_1p(),
            Softsign => x / (1. + x.abs()),
            Swish => x * sigmoid(x),
            HardSigmoid => (0.2 * x + 0.5).clamp(0., 1.),
        }
    }

    /// The derivative of the activation at `x`.
    pub fn df(&self, x: f32) -> f32 {
        match self {
            Linear | Softmax => 1.,
            Sigmoid => {
                let s = sigmoid(x);
                s * (1. - s)
            }
            Tanh => 1. - x.tanh().powi(2),
            Relu => step(x > 0.),
            Relu6 => step(x > 0. && x < 6.),
            Elu => {
                if x > 0. {
                    1.
                } else {
                    x.exp()
                }
            }
            Selu => {
                if x > 0. {
                    SELU_SCALE
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp()
                }
            }
            Softplus => sigmoid(x),
            Softsign => 1. / (1. + x.abs()).powi(2),
            Swish => {
                let s = sigmoid(x);
                s + x * s * (1. - s)
            }
            HardSigmoid => step(x > -2.5 && x < 2.5) * 0.2,
        }
    }

    /// Applies the activation to a batch of pre-activations.
    pub fn forward(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Linear => z.clone(),
            Softmax => softmax(z),
            act => z.mapv(|x| act.f(x)),
        }
    }

    /// Backpropagates `delta` through the activation.
    ///
    /// # Arguments
    /// * `z` - The pre-activations of the forward pass.
    /// * `a` - The activations of the forward pass.
    /// * `delta` - The gradient of the loss w.r.t. `a`.
    ///
    /// # Returns
    /// The gradient of the loss w.r.t. `z`.
    pub fn backward(&self, z: &Array2<f32>, a: &Array2<f32>, mut delta: Array2<f32>) -> Array2<f32> {
        match self {
            Linear => delta,
            Softmax => {
                let dot = (&delta * a).sum_axis(Axis(1)).insert_axis(Axis(1));
                delta -= &dot;
                delta *= a;
                delta
            }
            act => {
                Zip::from(&mut delta).and(z).for_each(|d, &z| *d *= act.df(z));
                delta
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

fn step(cond: bool) -> f32 {
    if cond {
        1.
    } else {
        0.
    }
}

/// Row-wise numerically stable softmax.
pub(crate) fn softmax(z: &Array2<f32>) -> Array2<f32> {
    let mut out = z.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let z = array![[1., 2., 3.], [0., 0., 0.]];
        let a = Softmax.forward(&z);

        for row in a.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
        assert!((a[[1, 0]] - 1. / 3.).abs() < 1e-6);
    }

    #[test]
    fn relu() {
        let z = array![[-1., 2.]];
        let a = Relu.forward(&z);
        assert_eq!(a, array![[0., 2.]]);

        let d = Relu.backward(&z, &a, array![[1., 1.]]);
        assert_eq!(d, array![[0., 1.]]);
    }

    #[test]
    fn sigmoid_derivative_matches_numeric() {
        let x = 0.3;
        let h = 1e-3;
        let numeric = (Sigmoid.f(x + h) - Sigmoid.f(x - h)) / (2. * h);
        assert!((Sigmoid.df(x) - numeric).abs() < 1e-3);
    }

    #[test]
    fn softmax_gradient_of_uniform_delta_is_zero() {
        let z = array![[0.5, -1., 2.]];
        let a = Softmax.forward(&z);
        let d = Softmax.backward(&z, &a, array![[1., 1., 1.]]);

        assert!(d.iter().all(|x| x.abs() < 1e-6));
    }
}
