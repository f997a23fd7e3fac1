use super::{require, require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const ACCUMULATOR: &str = "accumulator";

/// Adagrad, per parameter learning rates scaled by the accumulated squared gradients.
#[derive(Debug, Clone)]
pub struct AdaGrad {
    learning_rate: f32,
    initial_accumulator: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl AdaGrad {
    /// Creates a new `AdaGrad` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `initial_accumulator` - The starting value of the accumulators.
    pub fn new(learning_rate: f32, initial_accumulator: f32) -> Result<Self> {
        require_learning_rate("Adagrad", learning_rate)?;
        require("Adagrad", initial_accumulator > 0., || {
            format!("initial accumulator value {initial_accumulator} should be > 0.0")
        })?;

        Ok(Self {
            learning_rate,
            initial_accumulator,
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

impl Default for AdaGrad {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            initial_accumulator: 0.01,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for AdaGrad {
    fn name(&self) -> &'static str {
        "Adagrad"
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
        let initializer = Initializer::Constant {
            value: self.initial_accumulator,
        };

        for variable in variables {
            self.slots
                .create_slot(registry, ACCUMULATOR, variable, initializer)?;
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
                    rule: UpdateRule::Adagrad {
                        lr: self.learning_rate,
                        accum: self.slots.get_slot(variable, ACCUMULATOR)?.to_string(),
                    },
                })
            })
            .collect()
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::AdaGrad {
            learning_rate: self.learning_rate,
            initial_accumulator: self.initial_accumulator,
            clipping: self.clipping,
        }
    }
}
