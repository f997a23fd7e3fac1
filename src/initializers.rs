use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{GraphErr, Result};

/// The way a variable gets its first value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    Zeros,
    Ones,
    Constant { value: f32 },
    RandomUniform { min: f32, max: f32 },
    RandomNormal { mean: f32, std_dev: f32 },
    TruncatedNormal { mean: f32, std_dev: f32 },
    GlorotUniform,
    GlorotNormal,
    HeUniform,
    HeNormal,
    LeCunUniform,
    LeCunNormal,
}

impl Initializer {
    /// Generates a fresh value for a variable of the given shape.
    ///
    /// # Arguments
    /// * `shape` - The shape of the variable.
    /// * `rng` - The random number generator used by the random initializers.
    ///
    /// # Returns
    /// The generated tensor or an error if the resulting distribution is invalid.
    pub fn generate<R: Rng>(&self, shape: &[usize], rng: &mut R) -> Result<ArrayD<f32>> {
        let dim = IxDyn(shape);
        let (fan_in, fan_out) = fans(shape);

        let value = match *self {
            Initializer::Zeros => ArrayD::zeros(dim),
            Initializer::Ones => ArrayD::ones(dim),
            Initializer::Constant { value } => ArrayD::from_elem(dim, value),
            Initializer::RandomUniform { min, max } => sample(uniform(min, max)?, dim, rng),
            Initializer::RandomNormal { mean, std_dev } => {
                sample(normal(mean, std_dev)?, dim, rng)
            }
            Initializer::TruncatedNormal { mean, std_dev } => {
                let dist = normal(mean, std_dev)?;
                ArrayD::from_shape_simple_fn(dim, || loop {
                    let x = dist.sample(&mut *rng);
                    if (x - mean).abs() <= 2. * std_dev {
                        break x;
                    }
                })
            }
            Initializer::GlorotUniform => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                sample(uniform(-range, range)?, dim, rng)
            }
            Initializer::GlorotNormal => {
                let std_dev = (2. / (fan_in + fan_out) as f32).sqrt();
                sample(normal(0., std_dev)?, dim, rng)
            }
            Initializer::HeUniform => {
                let range = (6. / fan_in as f32).sqrt();
                sample(uniform(-range, range)?, dim, rng)
            }
            Initializer::HeNormal => {
                let std_dev = (2. / fan_in as f32).sqrt();
                sample(normal(0., std_dev)?, dim, rng)
            }
            Initializer::LeCunUniform => {
                let range = (3. / fan_in as f32).sqrt();
                sample(uniform(-range, range)?, dim, rng)
            }
            Initializer::LeCunNormal => {
                let std_dev = (1. / fan_in as f32).sqrt();
                sample(normal(0., std_dev)?, dim, rng)
            }
        };

        Ok(value)
    }
}

/// Computes the fan in and fan out of a variable shape.
///
/// Kernels are laid out as `[.., in, out]`, everything before the last two dimensions is treated
/// as the receptive field.
fn fans(shape: &[usize]) -> (usize, usize) {
    let (fan_in, fan_out) = match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [rest @ .., fan_in, fan_out] => {
            let receptive: usize = rest.iter().product();
            (fan_in * receptive, fan_out * receptive)
        }
    };

    (fan_in.max(1), fan_out.max(1))
}

fn uniform(low: f32, high: f32) -> Result<Uniform<f32>> {
    Uniform::new(low, high).map_err(|e| GraphErr::InvalidArgument {
        reason: format!("invalid uniform range [{low}, {high}): {e}"),
    })
}

fn normal(mean: f32, std_dev: f32) -> Result<Normal<f32>> {
    Normal::new(mean, std_dev).map_err(|e| GraphErr::InvalidArgument {
        reason: format!("invalid normal distribution ({mean}, {std_dev}): {e}"),
    })
}

fn sample<R: Rng, D: Distribution<f32>>(dist: D, dim: IxDyn, rng: &mut R) -> ArrayD<f32> {
    ArrayD::from_shape_simple_fn(dim, || dist.sample(&mut *rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn constant() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = Initializer::Constant { value: 0.5 }
            .generate(&[2, 3], &mut rng)
            .unwrap();

        assert_eq!(value.shape(), &[2, 3]);
        assert!(value.iter().all(|&x| x == 0.5));
    }

    #[test]
    fn glorot_within_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let value = Initializer::GlorotUniform
            .generate(&[4, 2], &mut rng)
            .unwrap();

        let range = (6f32 / 6.).sqrt();
        assert!(value.iter().all(|x| x.abs() <= range));
    }

    #[test]
    fn truncated() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = Initializer::TruncatedNormal {
            mean: 0.,
            std_dev: 1.,
        }
        .generate(&[64], &mut rng)
        .unwrap();

        assert!(value.iter().all(|x| x.abs() <= 2.));
    }

    #[test]
    fn seeded_is_deterministic() {
        let a = Initializer::HeNormal
            .generate(&[3, 3], &mut StdRng::seed_from_u64(1))
            .unwrap();
        let b = Initializer::HeNormal
            .generate(&[3, 3], &mut StdRng::seed_from_u64(1))
            .unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn invalid_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let res = Initializer::RandomUniform { min: 1., max: -1. }.generate(&[2], &mut rng);
        assert!(res.is_err());
    }
}
