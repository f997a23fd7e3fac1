use super::{require, require_learning_rate, Optimizer, OptimizerSpec, Slots, UpdateOp, UpdateRule};
use crate::{
    backend::GradientClipping, error::Result, graph::VariableRegistry, initializers::Initializer,
};

const RMS: &str = "rms";
const MOMENTUM: &str = "momentum";
const MG: &str = "mg";

/// RMSProp, optionally centered on the running mean of the gradient.
#[derive(Debug, Clone)]
pub struct RmsProp {
    learning_rate: f32,
    decay: f32,
    momentum: f32,
    epsilon: f32,
    centered: bool,
    clipping: GradientClipping,
    slots: Slots,
}

impl RmsProp {
    /// Creates a new `RmsProp` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `decay` - The discounting factor of the squared gradient average.
    /// * `momentum` - The momentum of the update.
    /// * `epsilon` - Added to the denominator for numeric stability.
    /// * `centered` - Whether to normalize by the estimated variance of the gradient.
    pub fn new(
        learning_rate: f32,
        decay: f32,
        momentum: f32,
        epsilon: f32,
        centered: bool,
    ) -> Result<Self> {
        require_learning_rate("RMSProp", learning_rate)?;
        require("RMSProp", momentum >= 0., || {
            format!("momentum {momentum} should be >= 0.0")
        })?;
        require("RMSProp", decay >= 0., || format!("decay {decay} should be >= 0.0"))?;
        require("RMSProp", epsilon >= 0., || {
            format!("epsilon {epsilon} should be >= 0.0")
        })?;

        Ok(Self {
            learning_rate,
            decay,
            momentum,
            epsilon,
            centered,
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

impl Default for RmsProp {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            decay: 0.9,
            momentum: 0.,
            epsilon: 1e-10,
            centered: false,
            clipping: GradientClipping::NoClip,
            slots: Slots::new(),
        }
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &'static str {
        "RMSProp"
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
                .create_slot(registry, RMS, variable, Initializer::Ones)?;
            self.slots
                .create_slot(registry, MOMENTUM, variable, Initializer::Zeros)?;
            if self.centered {
                self.slots
                    .create_slot(registry, MG, variable, Initializer::Zeros)?;
            }
        }

        Ok(())
    }

    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>> {
        variables
            .iter()
            .map(|variable| {
                let mg = if self.centered {
                    Some(self.slots.get_slot(variable, MG)?.to_string())
                } else {
                    None
                };

                Ok(UpdateOp::Apply {
                    variable: variable.clone(),
                    clipping: self.clipping,
                    rule: UpdateRule::RmsProp {
                        lr: self.learning_rate,
                        decay: self.decay,
                        momentum: self.momentum,
                        epsilon: self.epsilon,
                        rms: self.slots.get_slot(variable, RMS)?.to_string(),
                        mom: self.slots.get_slot(variable, MOMENTUM)?.to_string(),
                        mg,
                    },
                })
            })
            .collect()
    }

    fn spec(&self) -> OptimizerSpec {
        OptimizerSpec::RmsProp {
            learning_rate: self.learning_rate,
            decay: self.decay,
            momentum: self.momentum,
            epsilon: self.epsilon,
            centered: self.centered,
            clipping: self.clipping,
        }
    }
}
