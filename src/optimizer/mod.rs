mod adadelta;
mod adagrad;
mod adagrad_da;
mod adam;
mod adamax;
mod ftrl;
mod momentum;
mod rmsprop;
mod sgd;
mod slots;
pub mod update;

use std::fmt::Debug;

use log::debug;
use serde::{Deserialize, Serialize};

pub use adadelta::AdaDelta;
pub use adagrad::AdaGrad;
pub use adagrad_da::AdaGradDa;
pub use adam::Adam;
pub use adamax::Adamax;
pub use ftrl::Ftrl;
pub use momentum::Momentum;
pub use rmsprop::RmsProp;
pub use sgd::Sgd;
pub use slots::{is_optimizer_name, Slots, OPTIMIZER_PREFIX};
pub use update::{UpdateOp, UpdateRule};

use crate::{
    backend::GradientClipping,
    error::{GraphErr, Result},
    graph::VariableRegistry,
};

/// An optimization algorithm that turns gradients into variable updates.
///
/// Implementors only describe their slots and update rule, `compile` wires them together.
pub trait Optimizer: Debug {
    /// The algorithm's name.
    fn name(&self) -> &'static str;

    /// The clipping strategy every raw gradient is routed through.
    fn clipping(&self) -> GradientClipping;

    fn slots(&self) -> &Slots;

    fn slots_mut(&mut self) -> &mut Slots;

    /// Registers the auxiliary variables the algorithm needs for `variables`.
    fn create_slots(
        &mut self,
        _registry: &mut VariableRegistry,
        _variables: &[String],
    ) -> Result<()> {
        Ok(())
    }

    /// Builds the update ops for `variables`, every slot they need must already exist.
    fn apply_gradients(&self, variables: &[String]) -> Result<Vec<UpdateOp>>;

    /// Returns the configuration this optimizer was built from.
    fn spec(&self) -> OptimizerSpec;

    /// Creates the slots for `variables` and returns the ops that update them.
    ///
    /// # Arguments
    /// * `registry` - The registry the slot variables are added to.
    /// * `variables` - The trainable variables in gradient order.
    ///
    /// # Returns
    /// The update ops in the order they must run.
    fn compile(
        &mut self,
        registry: &mut VariableRegistry,
        variables: &[String],
    ) -> Result<Vec<UpdateOp>> {
        self.slots_mut().clear();
        self.create_slots(registry, variables)?;
        let ops = self.apply_gradients(variables)?;

        debug!(
            "compiled {} optimizer with {} update ops, clipping {:?}",
            self.name(),
            ops.len(),
            self.clipping()
        );
        Ok(ops)
    }
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Sgd {
        learning_rate: f32,
        clipping: GradientClipping,
    },
    Momentum {
        learning_rate: f32,
        momentum: f32,
        nesterov: bool,
        clipping: GradientClipping,
    },
    RmsProp {
        learning_rate: f32,
        decay: f32,
        momentum: f32,
        epsilon: f32,
        centered: bool,
        clipping: GradientClipping,
    },
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        clipping: GradientClipping,
    },
    Adamax {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        clipping: GradientClipping,
    },
    AdaGrad {
        learning_rate: f32,
        initial_accumulator: f32,
        clipping: GradientClipping,
    },
    AdaGradDa {
        learning_rate: f32,
        initial_accumulator: f32,
        l1_strength: f32,
        l2_strength: f32,
        clipping: GradientClipping,
    },
    AdaDelta {
        learning_rate: f32,
        rho: f32,
        epsilon: f32,
        clipping: GradientClipping,
    },
    Ftrl {
        learning_rate: f32,
        l1_strength: f32,
        l2_strength: f32,
        learning_rate_power: f32,
        l2_shrinkage_strength: f32,
        initial_accumulator: f32,
        clipping: GradientClipping,
    },
}

impl OptimizerSpec {
    /// Builds a fresh optimizer with empty slot state.
    pub fn build(&self) -> Result<Box<dyn Optimizer>> {
        let optimizer: Box<dyn Optimizer> = match *self {
            OptimizerSpec::Sgd {
                learning_rate,
                clipping,
            } => Box::new(Sgd::new(learning_rate)?.with_clipping(clipping)),
            OptimizerSpec::Momentum {
                learning_rate,
                momentum,
                nesterov,
                clipping,
            } => Box::new(Momentum::new(learning_rate, momentum, nesterov)?.with_clipping(clipping)),
            OptimizerSpec::RmsProp {
                learning_rate,
                decay,
                momentum,
                epsilon,
                centered,
                clipping,
            } => Box::new(
                RmsProp::new(learning_rate, decay, momentum, epsilon, centered)?
                    .with_clipping(clipping),
            ),
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                clipping,
            } => Box::new(Adam::new(learning_rate, beta1, beta2, epsilon)?.with_clipping(clipping)),
            OptimizerSpec::Adamax {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                clipping,
            } => Box::new(
                Adamax::new(learning_rate, beta1, beta2, epsilon)?.with_clipping(clipping),
            ),
            OptimizerSpec::AdaGrad {
                learning_rate,
                initial_accumulator,
                clipping,
            } => Box::new(AdaGrad::new(learning_rate, initial_accumulator)?.with_clipping(clipping)),
            OptimizerSpec::AdaGradDa {
                learning_rate,
                initial_accumulator,
                l1_strength,
                l2_strength,
                clipping,
            } => Box::new(
                AdaGradDa::new(learning_rate, initial_accumulator, l1_strength, l2_strength)?
                    .with_clipping(clipping),
            ),
            OptimizerSpec::AdaDelta {
                learning_rate,
                rho,
                epsilon,
                clipping,
            } => Box::new(AdaDelta::new(learning_rate, rho, epsilon)?.with_clipping(clipping)),
            OptimizerSpec::Ftrl {
                learning_rate,
                l1_strength,
                l2_strength,
                learning_rate_power,
                l2_shrinkage_strength,
                initial_accumulator,
                clipping,
            } => Box::new(
                Ftrl::new(
                    learning_rate,
                    l1_strength,
                    l2_strength,
                    learning_rate_power,
                    l2_shrinkage_strength,
                    initial_accumulator,
                )?
                .with_clipping(clipping),
            ),
        };

        Ok(optimizer)
    }
}

/// Fails with `InvalidHyperparameter` unless `cond` holds.
pub(crate) fn require(optimizer: &'static str, cond: bool, reason: impl FnOnce() -> String) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(GraphErr::InvalidHyperparameter {
            optimizer,
            reason: reason(),
        })
    }
}

/// Validates the learning rate every optimizer takes.
pub(crate) fn require_learning_rate(optimizer: &'static str, learning_rate: f32) -> Result<()> {
    require(optimizer, learning_rate >= 0., || {
        format!("learning rate {learning_rate} should be >= 0.0")
    })
}
