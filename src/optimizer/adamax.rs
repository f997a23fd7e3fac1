use super::{
    adam::validate, slots::FIRST_BETA_POWER, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule,
};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const FIRST_MOMENT: &str = "m";
const SECOND_MOMENT: &str = "v";

/// AdaMax, the infinity norm variant of Adam.
#[derive(Debug, Clone)]
pub struct Adamax {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl Adamax {
    /// Creates a new `Adamax` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Result<Self> {
        validate("Adamax", learning_rate, beta1, beta2, epsilon)?;

        Ok(Self {
            learning_rate,
            beta1,
            beta2,
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

impl Default for Adamax {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for Adamax {
    fn name(&self) -> &'static str {
        "Adamax"
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
                .create_slot(registry, FIRST_MOMENT, variable, Initializer::Zeros)?;
            self.slots
                .create_slot(registry, SECOND_MOMENT, variable, Initializer::Zeros)?;
        }

        self.slots.create_global(
            registry,
            FIRST_BETA_POWER,
            Initializer::Constant { value: self.beta1 },
        )?;

        Ok(())
    }

    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>> {
        let beta1_power = self.slots.get_global(FIRST_BETA_POWER)?.to_string();

        let mut ops = variables
            .iter()
            .map(|variable| {
                Ok(UpdateOp::Apply {
                    variable: variable.clone(),
                    clipping: self.clipping,
                    rule: UpdateRule::AdaMax {
                        lr: self.learning_rate,
                        beta1: self.beta1,
                        beta2: self.beta2,
                        epsilon: self.epsilon,
                        m: self.slots.get_slot(variable, FIRST_MOMENT)?.to_string(),
                        v: self.slots.get_slot(variable, SECOND_MOMENT)?.to_string(),
                        beta1_power: beta1_power.clone(),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;

        ops.push(UpdateOp::Scale {
            variable: beta1_power,
            factor: self.beta1,
        });

        Ok(ops)
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::Adamax {
            learning_rate: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            clipping: self.clipping,
        }
    }
}
