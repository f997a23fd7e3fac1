use super::{require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{backend::GradientClipping, error::Result};

/// Plain stochastic gradient descent.
#[derive(Debug, Clone)]
pub struct Sgd {
    learning_rate: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl Sgd {
    /// Creates a new `Sgd` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    ///
    /// # Returns
    /// A new `Sgd` instance or an error if the learning rate is negative.
    pub fn new(learning_rate: f32) -> Result<Self> {
        require_learning_rate("SGD", learning_rate)?;

        Ok(Self {
            learning_rate,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        })
    }

    /// Sets the gradient clipping strategy.
    pub fn with_clipping(mut self, clipping: GradientClipping) -> Self {
        self.clipping = clipping;
        self
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self {
            learning_rate: 0.2,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn clipping(&self) -> GradientClipping {
        self.clipping
    }

    fn slots(&self) -> &Slots {
        &self.slots
    }

    fn slots_mut(&mut self) -> &mut Slots {
        &mut self.slots
    }

    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>> {
        Ok(variables
            .iter()
            .map(|variable| UpdateOp::Apply {
                variable: variable.clone(),
                clipping: self.clipping,
                rule: UpdateRule::GradientDescent {
                    lr: self.learning_rate,
                },
            })
            .collect())
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::Sgd {
            learning_rate: self.learning_rate,
            clipping: self.clipping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_learning_rate() {
        assert!(Sgd::new(-0.1).is_err());
    }

    #[test]
    fn one_op_per_variable() {
        let ops = Sgd::default()
            .apply_gradients(&["a".to_string(), "b".to_string()])
            .unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].variable(), "b");
    }
}
