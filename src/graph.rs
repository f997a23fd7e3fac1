use std::collections::HashMap;

use log::debug;
use ndarray::ArrayD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    error::{GraphErr, Result},
    initializers::Initializer,
};

/// Gradients of the loss keyed by the name of the variable they belong to.
pub type Gradients = HashMap<String, ArrayD<f32>>;

/// What a registered variable is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    LayerParameter,
    OptimizerSlot,
}

/// A named tensor owned by a `VariableRegistry`.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    shape: Vec<usize>,
    role: VariableRole,
    owner: Option<String>,
    shadows: Option<String>,
    initializer: Initializer,
    value: Option<ArrayD<f32>>,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn role(&self) -> VariableRole {
        self.role
    }

    /// The layer this variable belongs to.
    ///
    /// Optimizer slots inherit the owner of the variable they shadow, global optimizer variables
    /// have no owner.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// The layer variable an optimizer slot shadows.
    pub fn shadows(&self) -> Option<&str> {
        self.shadows.as_deref()
    }

    pub fn initializer(&self) -> Initializer {
        self.initializer
    }

    pub fn is_initialized(&self) -> bool {
        self.value.is_some()
    }

    /// Returns the amount of scalars this variable holds.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Selects a subset of the registered variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    LayerVariables,
    OptimizerVariables,
}

impl VariableScope {
    fn contains(self, role: VariableRole) -> bool {
        matches!(
            (self, role),
            (VariableScope::LayerVariables, VariableRole::LayerParameter)
                | (VariableScope::OptimizerVariables, VariableRole::OptimizerSlot)
        )
    }
}

/// The single owner of every tensor a model holds.
///
/// Other components only ever refer to variables by name.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    layers: Vec<(String, bool)>,
}

impl VariableRegistry {
    /// Creates a new empty `VariableRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a layer so its variables can be classified as trainable or frozen.
    ///
    /// # Arguments
    /// * `name` - The layer's name.
    /// * `trainable` - Whether the layer starts trainable.
    pub fn register_layer(&mut self, name: &str, trainable: bool) {
        match self.layers.iter_mut().find(|(layer, _)| layer == name) {
            Some((_, flag)) => *flag = trainable,
            None => self.layers.push((name.to_string(), trainable)),
        }
    }

    /// Toggles the trainable flag of a registered layer.
    ///
    /// # Returns
    /// An error if the layer was never registered.
    pub fn set_layer_trainable(&mut self, name: &str, trainable: bool) -> Result<()> {
        let (_, flag) = self
            .layers
            .iter_mut()
            .find(|(layer, _)| layer == name)
            .ok_or_else(|| GraphErr::MissingLayer {
                name: name.to_string(),
            })?;

        *flag = trainable;
        Ok(())
    }

    /// Whether the given layer is trainable, `None` if it was never registered.
    pub fn is_layer_trainable(&self, name: &str) -> Option<bool> {
        self.layers
            .iter()
            .find(|(layer, _)| layer == name)
            .map(|&(_, trainable)| trainable)
    }

    /// Registers a new layer parameter.
    ///
    /// # Arguments
    /// * `layer` - The name of the owning layer.
    /// * `param` - The parameter's role inside the layer, e.g. `dense_kernel`.
    /// * `shape` - The variable's shape.
    /// * `initializer` - How the variable gets its first value.
    ///
    /// # Returns
    /// The derived variable name `<layer>_<param>`, or an error if it is already taken.
    pub fn add_layer_variable(
        &mut self,
        layer: &str,
        param: &str,
        shape: Vec<usize>,
        initializer: Initializer,
    ) -> Result<String> {
        let name = format!("{layer}_{param}");
        self.insert(Variable {
            name: name.clone(),
            shape,
            role: VariableRole::LayerParameter,
            owner: Some(layer.to_string()),
            shadows: None,
            initializer,
            value: None,
        })?;

        Ok(name)
    }

    /// Registers a non trainable optimizer variable.
    ///
    /// # Arguments
    /// * `name` - The full variable name.
    /// * `shape` - The variable's shape.
    /// * `shadows` - The layer variable this slot belongs to, `None` for global variables.
    /// * `initializer` - How the variable gets its first value.
    ///
    /// # Returns
    /// An error if the name is taken, the shadowed variable is unknown or the shapes differ.
    pub fn add_optimizer_variable(
        &mut self,
        name: &str,
        shape: Vec<usize>,
        shadows: Option<&str>,
        initializer: Initializer,
    ) -> Result<()> {
        let owner = match shadows {
            Some(shadowed) => {
                let var = self.variable(shadowed)?;
                if var.shape != shape {
                    return Err(GraphErr::ShapeMismatch {
                        what: format!("optimizer slot '{name}'"),
                        expected: format!("{:?}", var.shape),
                        got: format!("{shape:?}"),
                    });
                }

                var.owner.clone()
            }
            None => None,
        };

        self.insert(Variable {
            name: name.to_string(),
            shape,
            role: VariableRole::OptimizerSlot,
            owner,
            shadows: shadows.map(str::to_string),
            initializer,
            value: None,
        })
    }

    fn insert(&mut self, variable: Variable) -> Result<()> {
        if self.index.contains_key(&variable.name) {
            return Err(GraphErr::DuplicateVariable {
                name: variable.name,
            });
        }

        debug!("registered variable {} {:?}", variable.name, variable.shape);
        self.index
            .insert(variable.name.clone(), self.variables.len());
        self.variables.push(variable);
        Ok(())
    }

    /// Returns the layer variables of trainable layers in layer declaration order.
    pub fn trainable_variables(&self) -> Vec<String> {
        self.layer_variables_where(true)
    }

    /// Returns the layer variables of frozen layers in layer declaration order.
    pub fn frozen_variables(&self) -> Vec<String> {
        self.layer_variables_where(false)
    }

    fn layer_variables_where(&self, trainable: bool) -> Vec<String> {
        self.layers
            .iter()
            .filter(|&&(_, flag)| flag == trainable)
            .flat_map(|(layer, _)| {
                self.variables.iter().filter(move |var| {
                    var.role == VariableRole::LayerParameter
                        && var.owner.as_deref() == Some(layer.as_str())
                })
            })
            .map(|var| var.name.clone())
            .collect()
    }

    /// Returns every variable of the given scope in registration order.
    pub fn scoped(&self, scope: VariableScope) -> impl Iterator<Item = &Variable> {
        self.variables
            .iter()
            .filter(move |var| scope.contains(var.role))
    }

    /// Returns every registered variable in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Result<&Variable> {
        self.index
            .get(name)
            .map(|&i| &self.variables[i])
            .ok_or_else(|| GraphErr::MissingVariable {
                name: name.to_string(),
            })
    }

    fn variable_mut(&mut self, name: &str) -> Result<&mut Variable> {
        let i = *self.index.get(name).ok_or_else(|| GraphErr::MissingVariable {
            name: name.to_string(),
        })?;

        Ok(&mut self.variables[i])
    }

    /// Runs the initializers of every variable in the given scope.
    ///
    /// # Arguments
    /// * `scope` - Which variables to initialize.
    /// * `rng` - The random number generator used by random initializers.
    /// * `reinitialize` - Whether already initialized variables get a fresh value too.
    ///
    /// # Returns
    /// The amount of variables that were initialized.
    pub fn initialize<R: Rng>(
        &mut self,
        scope: VariableScope,
        rng: &mut R,
        reinitialize: bool,
    ) -> Result<usize> {
        let mut count = 0;

        for var in self.variables.iter_mut() {
            if !scope.contains(var.role) || (var.value.is_some() && !reinitialize) {
                continue;
            }

            var.value = Some(var.initializer.generate(&var.shape, rng)?);
            count += 1;
        }

        Ok(count)
    }

    /// Whether every variable in the given scope holds a value.
    pub fn is_initialized(&self, scope: VariableScope) -> bool {
        self.scoped(scope).all(Variable::is_initialized)
    }

    /// Returns the current value of a variable.
    ///
    /// # Returns
    /// An error if the variable is unknown or was never initialized.
    pub fn value(&self, name: &str) -> Result<&ArrayD<f32>> {
        let var = self.variable(name)?;
        var.value.as_ref().ok_or(GraphErr::NotInitialized {
            step: "the variable initializers",
        })
    }

    /// Returns a mutable reference to the current value of a variable.
    pub fn value_mut(&mut self, name: &str) -> Result<&mut ArrayD<f32>> {
        let var = self.variable_mut(name)?;
        var.value.as_mut().ok_or(GraphErr::NotInitialized {
            step: "the variable initializers",
        })
    }

    /// Overwrites the value of a variable.
    ///
    /// # Returns
    /// An error if the variable is unknown or the shapes differ.
    pub fn assign(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        let var = self.variable_mut(name)?;
        if var.shape != value.shape() {
            return Err(GraphErr::ShapeMismatch {
                what: format!("assignment to '{name}'"),
                expected: format!("{:?}", var.shape),
                got: format!("{:?}", value.shape()),
            });
        }

        var.value = Some(value);
        Ok(())
    }

    /// Copies the values of the variables in `scope` from another registry.
    ///
    /// Every layer variable must exist in `other`. Optimizer variables `other` never created are
    /// left untouched.
    ///
    /// # Returns
    /// The amount of variables that had no counterpart in `other`.
    pub fn copy_values_from(
        &mut self,
        other: &VariableRegistry,
        scope: VariableScope,
    ) -> Result<usize> {
        let mut missing = 0;

        for var in self.variables.iter_mut() {
            if !scope.contains(var.role) {
                continue;
            }

            let source = match other.variable(&var.name) {
                Ok(source) => source,
                Err(_) if var.role == VariableRole::OptimizerSlot => {
                    missing += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if source.shape != var.shape {
                return Err(GraphErr::ShapeMismatch {
                    what: format!("copy of '{}'", var.name),
                    expected: format!("{:?}", var.shape),
                    got: format!("{:?}", source.shape),
                });
            }

            var.value = source.value.clone();
        }

        Ok(missing)
    }

    /// Drops every optimizer variable.
    pub fn clear_optimizer_variables(&mut self) {
        self.variables
            .retain(|var| var.role != VariableRole::OptimizerSlot);
        self.index = self
            .variables
            .iter()
            .enumerate()
            .map(|(i, var)| (var.name.clone(), i))
            .collect();
    }
}
