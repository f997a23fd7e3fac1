mod functional;
mod sequential;
mod summary;

use std::collections::HashSet;

use log::{debug, info};
use ndarray::{Array2, ArrayD};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

pub use functional::Functional;
pub use sequential::Sequential;
pub use summary::{LayerSummary, ModelSummary};

use crate::{
    backend::{Losses, Metrics},
    error::{GraphErr, Result},
    graph::{Gradients, VariableRegistry, VariableScope},
    layers::{Layer, LayerSpec},
    optimizer::{update, Optimizer, OptimizerSpec, UpdateOp},
    shape::TensorShape,
};

const DEFAULT_SEED: u64 = 12;

/// How the layers of a model are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Sequential,
    Functional,
}

/// The specification for the `Model` struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSpec {
    Sequential { layers: Vec<LayerSpec> },
    Functional { layers: Vec<LayerSpec> },
}

/// The configuration threaded through `Model::compile`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Seeds the weight initializers and stochastic layers.
    pub seed: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self { seed: DEFAULT_SEED }
    }
}

/// A trainable graph of layers.
///
/// The layers are kept in topological order, the first one is the only input and the last one
/// is the only output.
#[derive(Debug)]
pub struct Model {
    topology: Topology,
    layers: Vec<Layer>,
    inbound: Vec<Vec<usize>>,
    registry: VariableRegistry,
    optimizer: Option<Box<dyn Optimizer>>,
    update_ops: Vec<UpdateOp>,
    compiled_variables: Vec<String>,
    loss: Losses,
    metrics: Vec<Metrics>,
    config: CompileConfig,
    rng: StdRng,
    compiled: bool,
    weights_initialized: bool,
    optimizer_initialized: bool,
    stop_requested: bool,
    closed: bool,
}

impl Model {
    /// Creates a new uncompiled model from layers already sorted and resolved.
    fn new(topology: Topology, layers: Vec<Layer>, inbound: Vec<Vec<usize>>) -> Self {
        Self {
            topology,
            layers,
            inbound,
            registry: VariableRegistry::new(),
            optimizer: None,
            update_ops: Vec::new(),
            compiled_variables: Vec::new(),
            loss: Losses::MeanSquaredError,
            metrics: Vec::new(),
            config: CompileConfig::default(),
            rng: StdRng::seed_from_u64(DEFAULT_SEED),
            compiled: false,
            weights_initialized: false,
            optimizer_initialized: false,
            stop_requested: false,
            closed: false,
        }
    }

    /// Builds an uncompiled model from its specification.
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        match spec {
            ModelSpec::Sequential { layers } => {
                Sequential::of(layers.iter().map(Layer::from_spec).collect())
            }
            ModelSpec::Functional { layers } => {
                Functional::of(layers.iter().map(Layer::from_spec).collect())
            }
        }
    }

    /// Returns the specification this model can be rebuilt from.
    pub fn spec(&self) -> ModelSpec {
        let layers = self.layers.iter().map(Layer::spec).collect();
        match self.topology {
            Topology::Sequential => ModelSpec::Sequential { layers },
            Topology::Functional => ModelSpec::Functional { layers },
        }
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Looks up a layer by name.
    pub fn layer(&self, name: &str) -> Result<&Layer> {
        self.layers
            .iter()
            .find(|layer| layer.name() == name)
            .ok_or_else(|| GraphErr::MissingLayer {
                name: name.to_string(),
            })
    }

    pub fn input_layer(&self) -> &Layer {
        &self.layers[0]
    }

    pub fn output_layer(&self) -> &Layer {
        &self.layers[self.layers.len() - 1]
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut VariableRegistry {
        &mut self.registry
    }

    pub fn optimizer(&self) -> Option<&dyn Optimizer> {
        self.optimizer.as_deref()
    }

    pub fn loss(&self) -> Losses {
        self.loss
    }

    pub fn metrics(&self) -> &[Metrics] {
        &self.metrics
    }

    pub fn compile_config(&self) -> CompileConfig {
        self.config
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    pub fn is_weights_initialized(&self) -> bool {
        self.weights_initialized
    }

    pub fn is_optimizer_initialized(&self) -> bool {
        self.optimizer_initialized
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_weights_initialized(&mut self, initialized: bool) {
        self.weights_initialized = initialized;
    }

    pub(crate) fn set_optimizer_initialized(&mut self, initialized: bool) {
        self.optimizer_initialized = initialized;
    }

    /// Asks a running `fit` to stop at the next epoch or batch boundary.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }

    pub(crate) fn clear_stop_request(&mut self) {
        self.stop_requested = false;
    }

    /// Fails if the model was closed.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GraphErr::Closed);
        }

        Ok(())
    }

    /// Fails if the model is closed or not compiled.
    pub(crate) fn ensure_compiled(&self, step: &'static str) -> Result<()> {
        self.ensure_open()?;
        if !self.compiled {
            return Err(GraphErr::NotCompiled { step });
        }

        Ok(())
    }

    /// Compiles the model.
    ///
    /// # Arguments
    /// * `optimizer` - The optimization algorithm, its slots are created here.
    /// * `loss` - The loss function to minimize.
    /// * `metrics` - The metrics reported besides the loss.
    /// * `config` - Numeric configuration of the model.
    pub fn compile<O: Optimizer + 'static>(
        &mut self,
        optimizer: O,
        loss: Losses,
        metrics: &[Metrics],
        config: CompileConfig,
    ) -> Result<()> {
        self.compile_boxed(Box::new(optimizer), loss, metrics, config)
    }

    /// Compiles the model with an already boxed optimizer.
    ///
    /// Shapes are propagated from the input layer in topological order, every layer registers
    /// its variables and the optimizer creates its slots for the trainable ones.
    pub fn compile_boxed(
        &mut self,
        mut optimizer: Box<dyn Optimizer>,
        loss: Losses,
        metrics: &[Metrics],
        config: CompileConfig,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.compiled {
            return Err(GraphErr::AlreadyCompiled);
        }

        let output = self.output_layer();
        if !output.has_activation() {
            return Err(GraphErr::InvalidArchitecture {
                reason: format!(
                    "the output layer '{}' ({}) must declare an activation",
                    output.name(),
                    output.kind_name()
                ),
            });
        }

        let mut registry = VariableRegistry::new();
        let mut shapes: Vec<TensorShape> = Vec::with_capacity(self.layers.len());
        for (layer, inbound) in self.layers.iter_mut().zip(&self.inbound) {
            let inputs: Vec<TensorShape> = inbound.iter().map(|&i| shapes[i].clone()).collect();
            let shape = layer.build(&mut registry, &inputs)?;
            debug!("layer {} output shape {shape}", layer.name());
            shapes.push(shape);
        }

        let trainable = registry.trainable_variables();
        let update_ops = optimizer.compile(&mut registry, &trainable)?;

        self.registry = registry;
        self.update_ops = update_ops;
        self.compiled_variables = trainable;
        self.optimizer = Some(optimizer);
        self.loss = loss;
        self.metrics = metrics.to_vec();
        self.config = config;
        self.rng = StdRng::seed_from_u64(config.seed);
        self.compiled = true;
        self.weights_initialized = false;
        self.optimizer_initialized = false;

        info!(
            "compiled {:?} model with {} layers and {} variables",
            self.topology,
            self.layers.len(),
            self.registry.len()
        );
        Ok(())
    }

    /// Initializes whatever is not initialized yet, weights and optimizer state.
    pub fn init(&mut self) -> Result<()> {
        self.ensure_compiled("init")?;
        self.initialize(VariableScope::LayerVariables, false)?;
        self.initialize(VariableScope::OptimizerVariables, false)
    }

    /// Re-initializes every weight and every optimizer variable.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_compiled("reset")?;
        self.initialize(VariableScope::LayerVariables, true)?;
        self.initialize(VariableScope::OptimizerVariables, true)
    }

    /// Runs the initializers of a scope and sets the matching lifecycle flag.
    pub(crate) fn initialize(&mut self, scope: VariableScope, reinitialize: bool) -> Result<()> {
        let n = self.registry.initialize(scope, &mut self.rng, reinitialize)?;
        debug!("initialized {n} variables of {scope:?}");

        match scope {
            VariableScope::LayerVariables => self.weights_initialized = true,
            VariableScope::OptimizerVariables => self.optimizer_initialized = true,
        }

        Ok(())
    }

    /// Freezes or unfreezes a layer.
    ///
    /// Only future gradient applications are affected.
    pub fn set_layer_trainable(&mut self, name: &str, trainable: bool) -> Result<()> {
        self.ensure_open()?;
        let layer = self
            .layers
            .iter_mut()
            .find(|layer| layer.name() == name)
            .ok_or_else(|| GraphErr::MissingLayer {
                name: name.to_string(),
            })?;

        layer.set_trainable(trainable);
        if self.compiled {
            self.registry.set_layer_trainable(name, trainable)?;
        }

        Ok(())
    }

    pub fn freeze_layer(&mut self, name: &str) -> Result<()> {
        self.set_layer_trainable(name, false)
    }

    pub fn unfreeze_layer(&mut self, name: &str) -> Result<()> {
        self.set_layer_trainable(name, true)
    }

    /// Freezes every layer of the model.
    pub fn freeze(&mut self) -> Result<()> {
        let names: Vec<String> = self.layers.iter().map(|l| l.name().to_string()).collect();
        for name in names {
            self.freeze_layer(&name)?;
        }

        Ok(())
    }

    /// Rebuilds the optimizer ops when layers were unfrozen after compiling.
    ///
    /// Layers frozen after compiling keep their ops, `update::run` skips them. Rebuilding starts
    /// the optimizer state from scratch.
    pub(crate) fn sync_trainable_variables(&mut self) -> Result<bool> {
        let trainable = self.registry.trainable_variables();
        if trainable
            .iter()
            .all(|name| self.compiled_variables.contains(name))
        {
            return Ok(false);
        }

        let optimizer = self.optimizer.as_mut().ok_or(GraphErr::NotCompiled {
            step: "fit",
        })?;

        self.registry.clear_optimizer_variables();
        self.update_ops = optimizer.compile(&mut self.registry, &trainable)?;
        self.compiled_variables = trainable;
        self.optimizer_initialized = false;

        info!("rebuilt the optimizer state after layers were unfrozen");
        Ok(true)
    }

    /// Returns the value of a variable.
    pub fn variable_value(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.ensure_open()?;
        self.registry.value(name)
    }

    /// Overwrites the value of a variable.
    pub fn set_variable_value(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        self.ensure_open()?;
        self.registry.assign(name, value)
    }

    /// Returns the number of scalars a sample fed to the model holds.
    pub fn input_size(&self) -> usize {
        self.input_layer()
            .compute_output_shape(&[])
            .map(|shape| shape.num_elements())
            .unwrap_or_default()
    }

    /// Returns the number of scalars the model outputs per sample, zero before compiling.
    pub fn output_size(&self) -> usize {
        self.output_layer()
            .output_shape()
            .map(TensorShape::num_elements)
            .unwrap_or_default()
    }

    /// Runs a forward pass over the whole graph.
    ///
    /// # Returns
    /// The output of every layer in topological order.
    pub(crate) fn forward_pass(&mut self, x: &Array2<f32>, training: bool) -> Result<Vec<Array2<f32>>> {
        let mut outputs: Vec<Array2<f32>> = Vec::with_capacity(self.layers.len());

        for (layer, inbound) in self.layers.iter_mut().zip(&self.inbound) {
            let inputs: Vec<&Array2<f32>> = if inbound.is_empty() {
                vec![x]
            } else {
                inbound.iter().map(|&i| &outputs[i]).collect()
            };

            let y = layer.forward(&self.registry, &inputs, training, &mut self.rng)?;
            outputs.push(y);
        }

        Ok(outputs)
    }

    /// Backpropagates the gradient of the loss w.r.t. the model output.
    ///
    /// Must follow a `forward_pass` with `training` set.
    pub(crate) fn backward_pass(&mut self, delta: Array2<f32>) -> Result<Gradients> {
        let mut grads = Gradients::new();
        let mut deltas: Vec<Option<Array2<f32>>> = vec![None; self.layers.len()];
        if let Some(last) = deltas.last_mut() {
            *last = Some(delta);
        }

        for i in (0..self.layers.len()).rev() {
            let Some(delta) = deltas[i].take() else {
                continue;
            };

            let inbound_deltas = self.layers[i].backward(&self.registry, delta, &mut grads)?;
            for (&j, d) in self.inbound[i].iter().zip(inbound_deltas) {
                match &mut deltas[j] {
                    Some(acc) => *acc += &d,
                    slot => *slot = Some(d),
                }
            }
        }

        Ok(grads)
    }

    /// Runs one optimization step on a batch.
    ///
    /// # Returns
    /// The loss and the metric values of the batch, computed before the update.
    pub(crate) fn train_step(&mut self, x: &Array2<f32>, y: &Array2<f32>) -> Result<(f32, Vec<f32>)> {
        let outputs = self.forward_pass(x, true)?;
        let y_pred = outputs.last().ok_or_else(|| GraphErr::InvalidArchitecture {
            reason: "the model has no layers".to_string(),
        })?;

        let loss = self.loss.loss(y_pred, y);
        let metrics = self.metrics.iter().map(|m| m.compute(y_pred, y)).collect();
        let delta = self.loss.gradient(y_pred, y);

        let grads = self.backward_pass(delta)?;
        update::run(&self.update_ops, &mut self.registry, &grads)?;

        Ok((loss, metrics))
    }

    /// Runs a read only forward pass on a batch.
    pub(crate) fn test_step(&mut self, x: &Array2<f32>, y: &Array2<f32>) -> Result<(f32, Vec<f32>)> {
        let y_pred = self.infer(x)?;
        let loss = self.loss.loss(&y_pred, y);
        let metrics = self.metrics.iter().map(|m| m.compute(&y_pred, y)).collect();
        Ok((loss, metrics))
    }

    /// Returns the model output for a batch without touching any variable.
    pub(crate) fn infer(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        let mut outputs = self.forward_pass(x, false)?;
        outputs.pop().ok_or_else(|| GraphErr::InvalidArchitecture {
            reason: "the model has no layers".to_string(),
        })
    }

    /// Releases the model's variables, any later use fails.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        self.registry = VariableRegistry::new();
        self.optimizer = None;
        self.update_ops.clear();
        self.closed = true;
        debug!("closed model");
    }

    /// Creates a structurally independent copy of the model.
    ///
    /// # Arguments
    /// * `copy_weights` - Whether variable values, optimizer state included, are deep copied.
    ///
    /// # Returns
    /// The copy, compiled with a fresh optimizer of the same configuration if this model is
    /// compiled. When layers were unfrozen since this model was compiled the copy starts with
    /// a fresh optimizer state, as this model would on its next `fit`.
    pub fn copy(&self, copy_weights: bool) -> Result<Model> {
        self.ensure_open()?;

        let layers = self.layers.iter().map(Layer::unbuilt).collect();
        let mut copy = Model::new(self.topology, layers, self.inbound.clone());
        if !self.compiled {
            return Ok(copy);
        }

        let optimizer = self
            .optimizer_spec()
            .ok_or(GraphErr::NotCompiled { step: "copy" })?
            .build()?;
        copy.compile_boxed(optimizer, self.loss, &self.metrics, self.config)?;

        if copy_weights {
            copy.registry
                .copy_values_from(&self.registry, VariableScope::LayerVariables)?;
            // layers unfrozen since compiling have no slots to copy yet
            let missing = copy
                .registry
                .copy_values_from(&self.registry, VariableScope::OptimizerVariables)?;
            copy.weights_initialized = self.weights_initialized;
            copy.optimizer_initialized = self.optimizer_initialized && missing == 0;
        }

        Ok(copy)
    }

    pub fn optimizer_spec(&self) -> Option<OptimizerSpec> {
        self.optimizer.as_ref().map(|optimizer| optimizer.spec())
    }

    /// Describes every layer and counts trainable and frozen parameters.
    pub fn summary(&self) -> Result<ModelSummary> {
        self.ensure_compiled("summary")?;
        Ok(ModelSummary::of(self))
    }
}

/// Assigns `<kind>_<index + 1>` to unnamed layers and rejects duplicated names.
pub(crate) fn name_layers(layers: &mut [Layer]) -> Result<()> {
    for (i, layer) in layers.iter_mut().enumerate() {
        if layer.name().is_empty() {
            let name = format!("{}_{}", layer.kind_name(), i + 1);
            layer.set_name(name);
        }
    }

    let mut seen = HashSet::new();
    for layer in layers.iter() {
        if !seen.insert(layer.name()) {
            return Err(GraphErr::DuplicateLayerName {
                name: layer.name().to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::Activations, optimizer::Sgd};

    fn model() -> Model {
        Sequential::of(vec![
            Layer::input(&[3]),
            Layer::dense(4, Activations::Relu),
            Layer::dense(2, Activations::Softmax),
        ])
        .unwrap()
    }

    #[test]
    fn auto_names() {
        let model = model();
        let names: Vec<&str> = model.layers().iter().map(Layer::name).collect();
        assert_eq!(names, vec!["input_1", "dense_2", "dense_3"]);
    }

    #[test]
    fn compile_allocates_variables() {
        let mut model = model();
        model
            .compile(
                Sgd::default(),
                Losses::MeanSquaredError,
                &[Metrics::Accuracy],
                CompileConfig::default(),
            )
            .unwrap();

        assert!(model.is_compiled());
        assert!(!model.is_weights_initialized());
        assert_eq!(
            model.registry().trainable_variables(),
            vec![
                "dense_2_dense_kernel",
                "dense_2_dense_bias",
                "dense_3_dense_kernel",
                "dense_3_dense_bias"
            ]
        );
        assert_eq!(model.output_size(), 2);
    }

    #[test]
    fn compile_twice() {
        let mut model = model();
        let config = CompileConfig::default();
        model
            .compile(Sgd::default(), Losses::MeanSquaredError, &[], config)
            .unwrap();

        let res = model.compile(Sgd::default(), Losses::MeanSquaredError, &[], config);
        assert!(matches!(res, Err(GraphErr::AlreadyCompiled)));
    }

    #[test]
    fn output_must_have_activation() {
        let mut model = Sequential::of(vec![
            Layer::input(&[4]),
            Layer::dense(2, Activations::Relu),
            Layer::dropout(0.1),
        ])
        .unwrap();

        let res = model.compile(
            Sgd::default(),
            Losses::MeanSquaredError,
            &[],
            CompileConfig::default(),
        );
        assert!(matches!(res, Err(GraphErr::InvalidArchitecture { .. })));
    }

    #[test]
    fn dropout_rate_out_of_range() {
        let mut model = Sequential::of(vec![
            Layer::input(&[4]),
            Layer::dropout(1.),
            Layer::dense(2, Activations::Softmax),
        ])
        .unwrap();

        let res = model.compile(
            Sgd::default(),
            Losses::MeanSquaredError,
            &[],
            CompileConfig::default(),
        );
        assert!(
            matches!(res, Err(GraphErr::InvalidArchitecture { ref reason }) if reason.contains("dropout"))
        );
    }

    #[test]
    fn closed_model_is_unusable() {
        let mut model = model();
        model
            .compile(
                Sgd::default(),
                Losses::MeanSquaredError,
                &[],
                CompileConfig::default(),
            )
            .unwrap();
        model.init().unwrap();
        model.close();

        assert!(matches!(model.init(), Err(GraphErr::Closed)));
        assert!(matches!(
            model.variable_value("dense_2_dense_bias"),
            Err(GraphErr::Closed)
        ));
    }

    #[test]
    fn copy_does_not_alias() {
        let mut model = model();
        model
            .compile(
                Sgd::default(),
                Losses::MeanSquaredError,
                &[],
                CompileConfig::default(),
            )
            .unwrap();
        model.init().unwrap();

        let mut copy = model.copy(true).unwrap();
        assert_eq!(
            copy.variable_value("dense_3_dense_bias").unwrap(),
            model.variable_value("dense_3_dense_bias").unwrap()
        );

        copy.set_variable_value("dense_3_dense_bias", ArrayD::from_elem(vec![2], 7.))
            .unwrap();
        assert_ne!(
            copy.variable_value("dense_3_dense_bias").unwrap(),
            model.variable_value("dense_3_dense_bias").unwrap()
        );
    }

    #[test]
    fn freeze_moves_variables() {
        let mut model = model();
        model
            .compile(
                Sgd::default(),
                Losses::MeanSquaredError,
                &[],
                CompileConfig::default(),
            )
            .unwrap();

        model.freeze_layer("dense_2").unwrap();
        assert_eq!(
            model.registry().frozen_variables(),
            vec!["dense_2_dense_kernel", "dense_2_dense_bias"]
        );
        assert!(!model.layer("dense_2").unwrap().is_trainable());
    }
}
