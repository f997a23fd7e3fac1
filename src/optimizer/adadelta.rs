use super::{require, require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const ACCUMULATOR: &str = "accum";
const ACCUMULATOR_UPDATE: &str = "accum_update";

/// Adadelta, adaptive learning rates from running averages of gradients and updates.
#[derive(Debug, Clone)]
pub struct AdaDelta {
    learning_rate: f32,
    rho: f32,
    epsilon: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl AdaDelta {
    /// Creates a new `AdaDelta` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `rho` - The decay rate of the running averages.
    /// * `epsilon` - Added to the denominator for numeric stability.
    pub fn new(learning_rate: f32, rho: f32, epsilon: f32) -> Result<Self> {
        require_learning_rate("Adadelta", learning_rate)?;
        require("Adadelta", rho >= 0., || format!("rho {rho} should be >= 0.0"))?;
        require("Adadelta", epsilon >= 0., || {
            format!("epsilon {epsilon} should be >= 0.0")
        })?;

        Ok(Self {
            learning_rate,
            rho,
            epsilon,
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

impl Default for AdaDelta {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            rho: 0.95,
            epsilon: 1e-8,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for AdaDelta {
    fn name(&self) -> &'static str {
        "Adadelta"
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
                .create_slot(registry, ACCUMULATOR, variable, Initializer::Zeros)?;
            self.slots
                .create_slot(registry, ACCUMULATOR_UPDATE, variable, Initializer::Zeros)?;
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
                    rule: UpdateRule::Adadelta {
                        lr: self.learning_rate,
                        rho: self.rho,
                        epsilon: self.epsilon,
                        accum: self.slots.get_slot(variable, ACCUMULATOR)?.to_string(),
                        accum_update: self
                            .slots
                            .get_slot(variable, ACCUMULATOR_UPDATE)?
                            .to_string(),
                    },
                })
            })
            .collect()
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::AdaDelta {
            learning_rate: self.learning_rate,
            rho: self.rho,
            epsilon: self.epsilon,
            clipping: self.clipping,
        }
    }
}
