use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// How raw gradients are clipped before an optimizer applies them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientClipping {
    #[default]
    NoClip,
    ClipByValue {
        min: f32,
        max: f32,
    },
    ClipByNorm {
        norm: f32,
    },
}

impl GradientClipping {
    /// Clips a gradient.
    pub fn clip(&self, mut gradient: ArrayD<f32>) -> ArrayD<f32> {
        match *self {
            GradientClipping::NoClip => {}
            GradientClipping::ClipByValue { min, max } => {
                gradient.mapv_inplace(|g| g.clamp(min, max));
            }
            GradientClipping::ClipByNorm { norm } => {
                let l2 = gradient.iter().map(|g| g * g).sum::<f32>().sqrt();
                if l2 > norm {
                    gradient *= norm / l2;
                }
            }
        }

        gradient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn by_value() {
        let g = arr1(&[-3., 0.5, 3.]).into_dyn();
        let clipped = GradientClipping::ClipByValue { min: -1., max: 1. }.clip(g);
        assert_eq!(clipped, arr1(&[-1., 0.5, 1.]).into_dyn());
    }

    #[test]
    fn by_norm() {
        let g = arr1(&[3., 4.]).into_dyn();
        let clipped = GradientClipping::ClipByNorm { norm: 1. }.clip(g);
        assert!((clipped[[0]] - 0.6).abs() < 1e-6);
        assert!((clipped[[1]] - 0.8).abs() < 1e-6);
    }
}
