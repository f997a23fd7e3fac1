use std::collections::BTreeMap;

use log::debug;

use crate::{
    error::{GraphErr, Result},
    graph::VariableRegistry,
    initializers::Initializer,
};

/// The prefix every optimizer variable name starts with.
pub const OPTIMIZER_PREFIX: &str = "optimizer";

pub(super) const FIRST_BETA_POWER: &str = "beta1_power";
pub(super) const SECOND_BETA_POWER: &str = "beta2_power";
pub(super) const GLOBAL_STEP: &str = "adagrad-da-global-step";

const GLOBALS: [&str; 3] = [FIRST_BETA_POWER, SECOND_BETA_POWER, GLOBAL_STEP];

/// Whether `name` follows the naming scheme of optimizer variables.
///
/// Slots are named `optimizer_<variable>-<slot>` and globals `optimizer_<global>`, a layer
/// variable whose layer name merely starts with `optimizer` matches neither.
pub fn is_optimizer_name(name: &str) -> bool {
    name.strip_prefix(OPTIMIZER_PREFIX)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| {
            GLOBALS.contains(&rest)
                || rest
                    .rsplit_once('-')
                    .is_some_and(|(var, slot)| !var.is_empty() && !slot.is_empty())
        })
}

/// The auxiliary state an optimizer keeps per trainable variable.
///
/// Slots are indexed by slot name first and by the shadowed variable's name second, the values
/// are the names of the slot variables inside the `VariableRegistry`.
#[derive(Debug, Clone, Default)]
pub struct Slots {
    slots: BTreeMap<String, BTreeMap<String, String>>,
    globals: BTreeMap<String, String>,
}

impl Slots {
    /// Creates a new empty `Slots`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the name of the slot variable for `variable`.
    pub fn create_name(variable: &str, slot: &str) -> String {
        format!("{OPTIMIZER_PREFIX}_{variable}-{slot}")
    }

    /// Creates a slot for a variable and registers it.
    ///
    /// # Arguments
    /// * `registry` - The registry the slot variable is added to.
    /// * `slot` - The slot's name, e.g. `m`.
    /// * `variable` - The name of the shadowed variable.
    /// * `initializer` - The slot's initializer.
    ///
    /// # Returns
    /// The name of the new slot variable.
    pub fn create_slot(
        &mut self,
        registry: &mut VariableRegistry,
        slot: &str,
        variable: &str,
        initializer: Initializer,
    ) -> Result<String> {
        let shape = registry.variable(variable)?.shape().to_vec();
        let name = Self::create_name(variable, slot);
        registry.add_optimizer_variable(&name, shape, Some(variable), initializer)?;

        debug!("created slot {name}");
        self.slots
            .entry(slot.to_string())
            .or_default()
            .insert(variable.to_string(), name.clone());

        Ok(name)
    }

    /// Creates a scalar variable shared by every variable the optimizer updates.
    ///
    /// # Returns
    /// The name of the new variable, `optimizer_<name>`.
    pub fn create_global(
        &mut self,
        registry: &mut VariableRegistry,
        name: &str,
        initializer: Initializer,
    ) -> Result<String> {
        let full_name = format!("{OPTIMIZER_PREFIX}_{name}");
        registry.add_optimizer_variable(&full_name, Vec::new(), None, initializer)?;

        self.globals.insert(name.to_string(), full_name.clone());
        Ok(full_name)
    }

    /// Looks up the slot variable of `variable`.
    ///
    /// # Returns
    /// The slot variable's name or a `MissingSlot` error, slots are never created lazily.
    pub fn get_slot(&self, variable: &str, slot: &str) -> Result<&str> {
        self.slots
            .get(slot)
            .and_then(|vars| vars.get(variable))
            .map(String::as_str)
            .ok_or_else(|| GraphErr::MissingSlot {
                variable: variable.to_string(),
                slot: slot.to_string(),
            })
    }

    /// Looks up a global optimizer variable.
    pub fn get_global(&self, name: &str) -> Result<&str> {
        self.globals
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| GraphErr::MissingSlot {
                variable: OPTIMIZER_PREFIX.to_string(),
                slot: name.to_string(),
            })
    }

    /// Returns the names of the slots created so far.
    pub fn slot_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.globals.is_empty()
    }

    /// Forgets every slot, the registry keeps the variables.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.globals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VariableRegistry {
        let mut registry = VariableRegistry::new();
        registry.register_layer("dense_1", true);
        registry
            .add_layer_variable("dense_1", "dense_kernel", vec![2, 2], Initializer::Ones)
            .unwrap();
        registry
            .add_layer_variable("dense_1", "dense_bias", vec![2], Initializer::Ones)
            .unwrap();
        registry
    }

    #[test]
    fn create_and_get() {
        let mut registry = registry();
        let mut slots = Slots::new();

        let name = slots
            .create_slot(&mut registry, "m", "dense_1_dense_kernel", Initializer::Zeros)
            .unwrap();

        assert_eq!(name, "optimizer_dense_1_dense_kernel-m");
        assert_eq!(slots.get_slot("dense_1_dense_kernel", "m").unwrap(), name);
        assert_eq!(
            registry.variable(&name).unwrap().shape(),
            &[2, 2]
        );
    }

    #[test]
    fn missing() {
        let mut registry = registry();
        let mut slots = Slots::new();
        slots
            .create_slot(&mut registry, "m", "dense_1_dense_kernel", Initializer::Zeros)
            .unwrap();

        let res = slots.get_slot("dense_1_dense_bias", "m");
        assert!(matches!(res, Err(GraphErr::MissingSlot { .. })));

        let res = slots.get_slot("dense_1_dense_kernel", "v");
        assert!(matches!(res, Err(GraphErr::MissingSlot { .. })));
    }

    #[test]
    fn optimizer_names() {
        assert!(is_optimizer_name("optimizer_dense_1_dense_kernel-m"));
        assert!(is_optimizer_name("optimizer_beta1_power"));
        assert!(is_optimizer_name("optimizer_adagrad-da-global-step"));

        assert!(!is_optimizer_name("optimizer_head_dense_kernel"));
        assert!(!is_optimizer_name("optimizers_dense_1_dense_kernel-m"));
        assert!(!is_optimizer_name("dense_1_dense_kernel"));
        assert!(!is_optimizer_name("optimizer_dense_1_dense_kernel-"));
    }

    #[test]
    fn global() {
        let mut registry = registry();
        let mut slots = Slots::new();

        let name = slots
            .create_global(&mut registry, "beta1_power", Initializer::Constant { value: 0.9 })
            .unwrap();

        assert_eq!(name, "optimizer_beta1_power");
        assert_eq!(slots.get_global("beta1_power").unwrap(), name);
        assert!(registry.variable(&name).unwrap().owner().is_none());
    }
}
