use super::{require, require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const MOMENTUM: &str = "momentum";

/// Gradient descent with momentum, optionally with Nesterov's look ahead.
#[derive(Debug, Clone)]
pub struct Momentum {
    learning_rate: f32,
    momentum: f32,
    nesterov: bool,
    clipping: GradientClipping,
    slots: Slots,
}

impl Momentum {
    /// Creates a new `Momentum` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - The decay of the accumulated velocity.
    /// * `nesterov` - Whether to use Nesterov momentum.
    pub fn new(learning_rate: f32, momentum: f32, nesterov: bool) -> Result<Self> {
        require_learning_rate("Momentum", learning_rate)?;
        require("Momentum", momentum >= 0., || {
            format!("momentum {momentum} should be >= 0.0")
        })?;

        Ok(Self {
            learning_rate,
            momentum,
            nesterov,
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

impl Default for Momentum {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            momentum: 0.99,
            nesterov: true,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for Momentum {
    fn name(&self) -> &'static str {
        "Momentum"
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

    fn create_slots(&mut self, registry: &mut VariableRegistry, variables: &[String]) -> Result<()> {
        for variable in variables {
            self.slots
                .create_slot(registry, MOMENTUM, variable, Initializer::Zeros)?;
        }

        Ok(())
    }

    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>> {
        variables
            .iter()
            .map(|variable| {
                Ok(UpdateOp::Apply {
                    variable: variable.clone(),
                    clipping: self.clipping,
                    rule: UpdateRule::Momentum {
                        lr: self.learning_rate,
                        momentum: self.momentum,
                        nesterov: self.nesterov,
                        accum: self.slots.get_slot(variable, MOMENTUM)?.to_string(),
                    },
                })
            })
            .collect()
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::Momentum {
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            nesterov: self.nesterov,
            clipping: self.clipping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphErr;

    #[test]
    fn slots_must_exist() {
        let res = Momentum::default().apply_gradients(&["dense_1_dense_bias".to_string()]);
        assert!(matches!(res, Err(GraphErr::MissingSlot { .. })));
    }
}
