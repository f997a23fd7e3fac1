use super::{require, require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const ACCUMULATOR: &str = "gradient_accumulator";
const LINEAR_ACCUMULATOR: &str = "linear_accumulator";

/// Follow the regularized leader.
#[derive(Debug, Clone)]
pub struct Ftrl {
    learning_rate: f32,
    l1_strength: f32,
    l2_strength: f32,
    learning_rate_power: f32,
    l2_shrinkage_strength: f32,
    initial_accumulator: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl Ftrl {
    /// Creates a new `Ftrl` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `l1_strength` - The L1 regularization strength.
    /// * `l2_strength` - The L2 regularization strength.
    /// * `learning_rate_power` - How the learning rate decreases during training, `<= 0`.
    /// * `l2_shrinkage_strength` - The L2 shrinkage regularization strength.
    /// * `initial_accumulator` - The starting value of the accumulators.
    pub fn new(
        learning_rate: f32,
        l1_strength: f32,
        l2_strength: f32,
        learning_rate_power: f32,
        l2_shrinkage_strength: f32,
        initial_accumulator: f32,
    ) -> Result<Self> {
        require_learning_rate("Ftrl", learning_rate)?;
        require("Ftrl", initial_accumulator >= 0., || {
            format!("initial accumulator value {initial_accumulator} should be >= 0.0")
        })?;
        require("Ftrl", l1_strength >= 0., || {
            format!("l1 regularization strength {l1_strength} should be >= 0.0")
        })?;
        require("Ftrl", l2_strength >= 0., || {
            format!("l2 regularization strength {l2_strength} should be >= 0.0")
        })?;
        require("Ftrl", learning_rate_power <= 0., || {
            format!("learning rate power {learning_rate_power} should be <= 0.0")
        })?;
        require("Ftrl", l2_shrinkage_strength >= 0., || {
            format!("l2 shrinkage regularization strength {l2_shrinkage_strength} should be >= 0.0")
        })?;

        Ok(Self {
            learning_rate,
            l1_strength,
            l2_strength,
            learning_rate_power,
            l2_shrinkage_strength,
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

impl Default for Ftrl {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            l1_strength: 0.,
            l2_strength: 0.,
            learning_rate_power: -0.5,
            l2_shrinkage_strength: 0.,
            initial_accumulator: 0.,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for Ftrl {
    fn name(&self) -> &'static str {
        "Ftrl"
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
            self.slots
                .create_slot(registry, LINEAR_ACCUMULATOR, variable, Initializer::Zeros)?;
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
                    rule: UpdateRule::Ftrl {
                        lr: self.learning_rate,
                        l1: self.l1_strength,
                        l2: self.l2_strength,
                        l2_shrinkage: self.l2_shrinkage_strength,
                        lr_power: self.learning_rate_power,
                        accum: self.slots.get_slot(variable, ACCUMULATOR)?.to_string(),
                        linear: self.slots.get_slot(variable, LINEAR_ACCUMULATOR)?.to_string(),
                    },
                })
            })
            .collect()
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::Ftrl {
            learning_rate: self.learning_rate,
            l1_strength: self.l1_strength,
            l2_strength: self.l2_strength,
            learning_rate_power: self.learning_rate_power,
            l2_shrinkage_strength: self.l2_shrinkage_strength,
            initial_accumulator: self.initial_accumulator,
            clipping: self.clipping,
        }
    }
}
