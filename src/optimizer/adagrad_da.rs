use super::{
    require, require_learning_rate, slots::GLOBAL_STEP, Optimizer, OptimizerSpec, Slots, UpdateOp,
    UpdateRule,
};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const ACCUMULATOR: &str = "gradient_accumulator";
const SQUARED_ACCUMULATOR: &str = "gradient_squared_accumulator";

/// Adagrad dual averaging, suited for sparse linear models.
#[derive(Debug, Clone)]
pub struct AdaGradDa {
    learning_rate: f32,
    initial_accumulator: f32,
    l1_strength: f32,
    l2_strength: f32,
    clipping: GradientClipping,
    slots: Slots,
}

impl AdaGradDa {
    /// Creates a new `AdaGradDa` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `initial_accumulator` - The starting value of the squared gradient accumulators.
    /// * `l1_strength` - The L1 regularization strength.
    /// * `l2_strength` - The L2 regularization strength.
    pub fn new(
        learning_rate: f32,
        initial_accumulator: f32,
        l1_strength: f32,
        l2_strength: f32,
    ) -> Result<Self> {
        require_learning_rate("AdagradDA", learning_rate)?;
        require("AdagradDA", initial_accumulator > 0., || {
            format!("initial accumulator value {initial_accumulator} should be > 0.0")
        })?;
        require("AdagradDA", l1_strength >= 0., || {
            format!("l1 strength {l1_strength} should be >= 0.0")
        })?;
        require("AdagradDA", l2_strength >= 0., || {
            format!("l2 strength {l2_strength} should be >= 0.0")
        })?;

        Ok(Self {
            learning_rate,
            initial_accumulator,
            l1_strength,
            l2_strength,
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

impl Default for AdaGradDa {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            initial_accumulator: 0.01,
            l1_strength: 0.01,
            l2_strength: 0.01,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for AdaGradDa {
    fn name(&self) -> &'static str {
        "AdagradDA"
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
            self.slots.create_slot(
                registry,
                SQUARED_ACCUMULATOR,
                variable,
                Initializer::Constant {
                    value: self.initial_accumulator,
                },
            )?;
        }

        self.slots
            .create_global(registry, GLOBAL_STEP, Initializer::Zeros)?;
        Ok(())
    }

    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>> {
        let global_step = self.slots.get_global(GLOBAL_STEP)?.to_string();

        // The step counter advances before the updates read it, the first update sees step 1.
        let mut ops = vec![UpdateOp::Increment {
            variable: global_step.clone(),
        }];

        for variable in variables {
            ops.push(UpdateOp::Apply {
                variable: variable.clone(),
                clipping: self.clipping,
                rule: UpdateRule::AdagradDa {
                    lr: self.learning_rate,
                    l1: self.l1_strength,
                    l2: self.l2_strength,
                    grad_accum: self.slots.get_slot(variable, ACCUMULATOR)?.to_string(),
                    grad_squared_accum: self
                        .slots
                        .get_slot(variable, SQUARED_ACCUMULATOR)?
                        .to_string(),
                    global_step: global_step.clone(),
                },
            });
        }

        Ok(ops)
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::AdaGradDa {
            learning_rate: self.learning_rate,
            initial_accumulator: self.initial_accumulator,
            l1_strength: self.l1_strength,
            l2_strength: self.l2_strength,
            clipping: self.clipping,
        }
    }
}
