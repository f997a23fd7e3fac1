use log::debug;
use ndarray::{ArrayD, Zip};

use crate::{
    backend::GradientClipping,
    error::{GraphErr, Result},
    graph::{Gradients, VariableRegistry},
};

/// An update formula bound to the slot variables it reads and writes.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateRule {
    GradientDescent {
        lr: f32,
    },
    Momentum {
        lr: f32,
        momentum: f32,
        nesterov: bool,
        accum: String,
    },
    RmsProp {
        lr: f32,
        decay: f32,
        momentum: f32,
        epsilon: f32,
        rms: String,
        mom: String,
        mg: Option<String>,
    },
    Adam {
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        m: String,
        v: String,
        beta1_power: String,
        beta2_power: String,
    },
    AdaMax {
        lr: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
        m: String,
        v: String,
        beta1_power: String,
    },
    Adagrad {
        lr: f32,
        accum: String,
    },
    AdagradDa {
        lr: f32,
        l1: f32,
        l2: f32,
        grad_accum: String,
        grad_squared_accum: String,
        global_step: String,
    },
    Adadelta {
        lr: f32,
        rho: f32,
        epsilon: f32,
        accum: String,
        accum_update: String,
    },
    Ftrl {
        lr: f32,
        l1: f32,
        l2: f32,
        l2_shrinkage: f32,
        lr_power: f32,
        accum: String,
        linear: String,
    },
}

/// A single operation an optimizer emits when it is compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Applies the gradient of `variable` with the given rule.
    Apply {
        variable: String,
        clipping: GradientClipping,
        rule: UpdateRule,
    },
    /// Multiplies a scalar global variable by `factor`.
    Scale { variable: String, factor: f32 },
    /// Adds one to a scalar global variable.
    Increment { variable: String },
}

impl UpdateOp {
    /// The variable this op writes to.
    pub fn variable(&self) -> &str {
        match self {
            UpdateOp::Apply { variable, .. }
            | UpdateOp::Scale { variable, .. }
            | UpdateOp::Increment { variable } => variable,
        }
    }
}

/// Runs a list of update ops in order.
///
/// `Apply` ops whose variable belongs to a layer that is frozen by now are skipped.
///
/// # Arguments
/// * `ops` - The ops produced by `Optimizer::compile`.
/// * `registry` - The registry holding the variables and slots.
/// * `gradients` - The gradients of the current step.
///
/// # Returns
/// An error if a gradient is missing, has the wrong shape or a variable is unknown.
pub fn run(ops: &[UpdateOp], registry: &mut VariableRegistry, gradients: &Gradients) -> Result<()> {
    for op in ops {
        match op {
            UpdateOp::Apply {
                variable,
                clipping,
                rule,
            } => {
                let owner = registry.variable(variable)?.owner().map(str::to_string);
                if let Some(owner) = owner {
                    if registry.is_layer_trainable(&owner) == Some(false) {
                        continue;
                    }
                }

                let grad = gradients
                    .get(variable)
                    .ok_or_else(|| GraphErr::InvalidArgument {
                        reason: format!("no gradient was computed for '{variable}'"),
                    })?;

                let var = registry.value(variable)?;
                if var.shape() != grad.shape() {
                    return Err(GraphErr::ShapeMismatch {
                        what: format!("gradient of '{variable}'"),
                        expected: format!("{:?}", var.shape()),
                        got: format!("{:?}", grad.shape()),
                    });
                }

                let grad = clipping.clip(grad.clone());
                apply(rule, variable, registry, &grad)?;
            }
            UpdateOp::Scale { variable, factor } => {
                registry.value_mut(variable)?.mapv_inplace(|x| x * factor);
            }
            UpdateOp::Increment { variable } => {
                registry.value_mut(variable)?.mapv_inplace(|x| x + 1.);
            }
        }
    }

    debug!("applied {} update ops", ops.len());
    Ok(())
}

fn load(registry: &VariableRegistry, name: &str) -> Result<ArrayD<f32>> {
    Ok(registry.value(name)?.clone())
}

fn scalar(registry: &VariableRegistry, name: &str) -> Result<f32> {
    registry
        .value(name)?
        .first()
        .copied()
        .ok_or_else(|| GraphErr::ShapeMismatch {
            what: format!("global optimizer variable '{name}'"),
            expected: "a scalar".to_string(),
            got: "an empty tensor".to_string(),
        })
}

fn apply(
    rule: &UpdateRule,
    variable: &str,
    registry: &mut VariableRegistry,
    g: &ArrayD<f32>,
) -> Result<()> {
    let mut var = load(registry, variable)?;

    match rule {
        UpdateRule::GradientDescent { lr } => {
            var.scaled_add(-lr, g);
        }
        UpdateRule::Momentum {
            lr,
            momentum,
            nesterov,
            accum,
        } => {
            let mut acc = load(registry, accum)?;
            let (lr, momentum, nesterov) = (*lr, *momentum, *nesterov);

            Zip::from(&mut var)
                .and(&mut acc)
                .and(g)
                .for_each(|p, a, &g| {
                    *a = *a * momentum + g;
                    if nesterov {
                        *p -= lr * g + lr * momentum * *a;
                    } else {
                        *p -= lr * *a;
                    }
                });

            registry.assign(accum, acc)?;
        }
        UpdateRule::RmsProp {
            lr,
            decay,
            momentum,
            epsilon,
            rms,
            mom,
            mg,
        } => {
            let mut ms = load(registry, rms)?;
            let mut mo = load(registry, mom)?;
            let (lr, decay, momentum, eps) = (*lr, *decay, *momentum, *epsilon);

            match mg {
                Some(mg_name) => {
                    let mut mg = load(registry, mg_name)?;
                    Zip::from(&mut var)
                        .and(&mut ms)
                        .and(&mut mo)
                        .and(&mut mg)
                        .and(g)
                        .for_each(|p, ms, mo, mg, &g| {
                            *ms = decay * *ms + (1. - decay) * g * g;
                            *mg = decay * *mg + (1. - decay) * g;
                            *mo = momentum * *mo + lr * g / (*ms - *mg * *mg + eps).sqrt();
                            *p -= *mo;
                        });
                    registry.assign(mg_name, mg)?;
                }
                None => {
                    Zip::from(&mut var)
                        .and(&mut ms)
                        .and(&mut mo)
                        .and(g)
                        .for_each(|p, ms, mo, &g| {
                            *ms = decay * *ms + (1. - decay) * g * g;
                            *mo = momentum * *mo + lr * g / (*ms + eps).sqrt();
                            *p -= *mo;
                        });
                }
            }

            registry.assign(rms, ms)?;
            registry.assign(mom, mo)?;
        }
        UpdateRule::Adam {
            lr,
            beta1,
            beta2,
            epsilon,
            m,
            v,
            beta1_power,
            beta2_power,
        } => {
            let mut m_val = load(registry, m)?;
            let mut v_val = load(registry, v)?;
            let b1p = scalar(registry, beta1_power)?;
            let b2p = scalar(registry, beta2_power)?;
            let (b1, b2, eps) = (*beta1, *beta2, *epsilon);
            let lr_t = lr * (1. - b2p).sqrt() / (1. - b1p);

            Zip::from(&mut var)
                .and(&mut m_val)
                .and(&mut v_val)
                .and(g)
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1. - b1) * g;
                    *v = b2 * *v + (1. - b2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + eps);
                });

            registry.assign(m, m_val)?;
            registry.assign(v, v_val)?;
        }
        UpdateRule::AdaMax {
            lr,
            beta1,
            beta2,
            epsilon,
            m,
            v,
            beta1_power,
        } => {
            let mut m_val = load(registry, m)?;
            let mut v_val = load(registry, v)?;
            let b1p = scalar(registry, beta1_power)?;
            let (b1, b2, eps) = (*beta1, *beta2, *epsilon);
            let lr_t = lr / (1. - b1p);

            Zip::from(&mut var)
                .and(&mut m_val)
                .and(&mut v_val)
                .and(g)
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1. - b1) * g;
                    *v = (b2 * *v).max(g.abs());
                    *p -= lr_t * *m / (*v + eps);
                });

            registry.assign(m, m_val)?;
            registry.assign(v, v_val)?;
        }
        UpdateRule::Adagrad { lr, accum } => {
            let mut acc = load(registry, accum)?;
            let lr = *lr;

            Zip::from(&mut var)
                .and(&mut acc)
                .and(g)
                .for_each(|p, a, &g| {
                    *a += g * g;
                    *p -= lr * g / a.sqrt();
                });

            registry.assign(accum, acc)?;
        }
        UpdateRule::AdagradDa {
            lr,
            l1,
            l2,
            grad_accum,
            grad_squared_accum,
            global_step,
        } => {
            let mut acc = load(registry, grad_accum)?;
            let mut sq = load(registry, grad_squared_accum)?;
            let step = scalar(registry, global_step)?;
            let (lr, l1, l2) = (*lr, *l1, *l2);

            Zip::from(&mut var)
                .and(&mut acc)
                .and(&mut sq)
                .and(g)
                .for_each(|p, a, s, &g| {
                    *a += g;
                    *s += g * g;
                    let shrunk = if l1 > 0. {
                        a.signum() * (a.abs() - l1 * step).max(0.)
                    } else {
                        *a
                    };
                    *p = -lr * shrunk / (l2 * step * lr + s.sqrt());
                });

            registry.assign(grad_accum, acc)?;
            registry.assign(grad_squared_accum, sq)?;
        }
        UpdateRule::Adadelta {
            lr,
            rho,
            epsilon,
            accum,
            accum_update,
        } => {
            let mut acc = load(registry, accum)?;
            let mut acc_up = load(registry, accum_update)?;
            let (lr, rho, eps) = (*lr, *rho, *epsilon);

            Zip::from(&mut var)
                .and(&mut acc)
                .and(&mut acc_up)
                .and(g)
                .for_each(|p, a, u, &g| {
                    *a = rho * *a + (1. - rho) * g * g;
                    let update = (*u + eps).sqrt() / (*a + eps).sqrt() * g;
                    *u = rho * *u + (1. - rho) * update * update;
                    *p -= lr * update;
                });

            registry.assign(accum, acc)?;
            registry.assign(accum_update, acc_up)?;
        }
        UpdateRule::Ftrl {
            lr,
            l1,
            l2,
            l2_shrinkage,
            lr_power,
            accum,
            linear,
        } => {
            let mut acc = load(registry, accum)?;
            let mut lin = load(registry, linear)?;
            let (lr, l1, l2, shrinkage, power) = (*lr, *l1, *l2, *l2_shrinkage, *lr_power);

            Zip::from(&mut var)
                .and(&mut acc)
                .and(&mut lin)
                .and(g)
                .for_each(|p, a, l, &g| {
                    let shrunk_g = g + 2. * shrinkage * *p;
                    let new_a = *a + g * g;
                    let sigma = (new_a.powf(-power) - a.powf(-power)) / lr;
                    *l += shrunk_g - sigma * *p;

                    let quadratic = new_a.powf(-power) / lr + 2. * l2;
                    *p = if l.abs() > l1 && quadratic > 0. {
                        (l.signum() * l1 - *l) / quadratic
                    } else {
                        0.
                    };
                    *a = new_a;
                });

            registry.assign(accum, acc)?;
            registry.assign(linear, lin)?;
        }
    }

    registry.assign(variable, var)
}
