mod activation;
mod dense;
mod dropout;
mod merge;

use ndarray::{Array2, ArrayD};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

pub use activation::ActivationLayer;
pub use dense::Dense;
pub use dropout::Dropout;
pub use merge::{Add, Concatenate};

use crate::{
    backend::Activations,
    error::{GraphErr, Result},
    graph::{Gradients, VariableRegistry},
    initializers::Initializer,
    shape::TensorShape,
};

/// The closed set of layer variants.
#[derive(Debug, Clone)]
pub enum LayerKind {
    Input(TensorShape),
    Dense(Dense),
    Activation(ActivationLayer),
    Flatten,
    Dropout(Dropout),
    Add(Add),
    Concatenate(Concatenate),
}

use LayerKind::*;

/// A named node of the model graph.
///
/// A layer refers to the layers feeding it by name only, it never owns them.
#[derive(Debug, Clone)]
pub struct Layer {
    name: String,
    inbound: Vec<String>,
    trainable: bool,
    output_shape: Option<TensorShape>,
    kind: LayerKind,
}

impl Layer {
    /// Creates a new unnamed trainable layer.
    pub fn new(kind: LayerKind) -> Self {
        Self {
            name: String::new(),
            inbound: Vec::new(),
            trainable: true,
            output_shape: None,
            kind,
        }
    }

    pub fn input(dims: &[usize]) -> Self {
        Self::new(Input(TensorShape::new(dims.to_vec())))
    }

    pub fn dense(units: usize, activation: Activations) -> Self {
        Self::new(Dense(Dense::new(units, activation)))
    }

    pub fn activation(activation: Activations) -> Self {
        Self::new(Activation(ActivationLayer::new(activation)))
    }

    pub fn flatten() -> Self {
        Self::new(Flatten)
    }

    pub fn dropout(rate: f32) -> Self {
        Self::new(Dropout(Dropout::new(rate)))
    }

    pub fn add() -> Self {
        Self::new(Add(Add::new()))
    }

    pub fn concatenate() -> Self {
        Self::new(Concatenate(Concatenate::new()))
    }

    /// Sets the layer's name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sets the layers feeding this one, only used by functional models.
    pub fn inbound(mut self, inbound: &[&str]) -> Self {
        self.inbound = inbound.iter().map(|name| name.to_string()).collect();
        self
    }

    /// Marks the layer as frozen.
    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn inbound_names(&self) -> &[String] {
        &self.inbound
    }

    pub(crate) fn set_inbound(&mut self, inbound: Vec<String>) {
        self.inbound = inbound;
    }

    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    pub(crate) fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// The lowercase name of the layer variant, used to generate layer names.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            Input(_) => "input",
            Dense(_) => "dense",
            Activation(_) => "activation",
            Flatten => "flatten",
            Dropout(_) => "dropout",
            Add(_) => "add",
            Concatenate(_) => "concatenate",
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, Input(_))
    }

    /// Whether the layer applies an activation to its output.
    pub fn has_activation(&self) -> bool {
        matches!(self.kind, Dense(_) | Activation(_))
    }

    /// The output shape computed at compile time.
    pub fn output_shape(&self) -> Option<&TensorShape> {
        self.output_shape.as_ref()
    }

    /// Returns the amount of parameters this layer has, zero before it is built.
    pub fn param_count(&self) -> usize {
        match &self.kind {
            Dense(dense) => dense.param_count(),
            _ => 0,
        }
    }

    /// Returns the names of the variables this layer registered.
    pub fn variables(&self) -> Vec<String> {
        match &self.kind {
            Dense(dense) => dense.variables(),
            _ => Vec::new(),
        }
    }

    /// Computes the output shape of the layer from the shapes of its inputs.
    ///
    /// This has no side effects and only depends on `inputs`.
    pub fn compute_output_shape(&self, inputs: &[TensorShape]) -> Result<TensorShape> {
        match &self.kind {
            Input(shape) => Ok(shape.clone()),
            Dense(dense) => dense.compute_output_shape(self.single(inputs)?),
            Activation(_) => Ok(self.single(inputs)?.clone()),
            Dropout(dropout) => dropout.compute_output_shape(self.single(inputs)?),
            Flatten => Ok(TensorShape::new(vec![self.single(inputs)?.num_elements()])),
            Add(add) => add.compute_output_shape(inputs),
            Concatenate(concat) => concat.compute_output_shape(inputs),
        }
    }

    /// Registers the layer's variables and stores its output shape.
    ///
    /// # Arguments
    /// * `registry` - The registry the variables are added to.
    /// * `inputs` - The shapes of the layer inputs.
    ///
    /// # Returns
    /// The output shape of the layer.
    pub fn build(
        &mut self,
        registry: &mut VariableRegistry,
        inputs: &[TensorShape],
    ) -> Result<TensorShape> {
        registry.register_layer(&self.name, self.trainable);

        let output = self.compute_output_shape(inputs)?;
        if let Dense(dense) = &mut self.kind {
            dense.build(&self.name, registry, &inputs[0])?;
        }

        self.output_shape = Some(output.clone());
        Ok(output)
    }

    /// Runs the forward pass of the layer.
    ///
    /// # Arguments
    /// * `registry` - The registry holding the layer's variables.
    /// * `inputs` - The outputs of the inbound layers, or the fed batch for input layers.
    /// * `training` - Whether this pass is followed by a backward pass.
    /// * `rng` - The random number generator used by stochastic layers.
    pub fn forward(
        &mut self,
        registry: &VariableRegistry,
        inputs: &[&Array2<f32>],
        training: bool,
        rng: &mut StdRng,
    ) -> Result<Array2<f32>> {
        match &mut self.kind {
            Input(shape) => {
                let x = single_input(&self.name, inputs)?;
                if x.ncols() != shape.num_elements() {
                    return Err(GraphErr::ShapeMismatch {
                        what: format!("input layer '{}'", self.name),
                        expected: format!("{} features per sample", shape.num_elements()),
                        got: format!("{} features per sample", x.ncols()),
                    });
                }
                Ok(x.to_owned())
            }
            Dense(dense) => dense.forward(registry, single_input(&self.name, inputs)?),
            Activation(act) => Ok(act.forward(single_input(&self.name, inputs)?)),
            Flatten => Ok(single_input(&self.name, inputs)?.to_owned()),
            Dropout(dropout) => Ok(dropout.forward(
                single_input(&self.name, inputs)?,
                training,
                rng,
            )),
            Add(add) => add.forward(inputs),
            Concatenate(concat) => concat.forward(inputs),
        }
    }

    /// Runs the backward pass of the layer, accumulating variable gradients into `grads`.
    ///
    /// # Returns
    /// The gradient of the loss w.r.t. each of the layer's inputs.
    pub fn backward(
        &mut self,
        registry: &VariableRegistry,
        delta: Array2<f32>,
        grads: &mut Gradients,
    ) -> Result<Vec<Array2<f32>>> {
        let deltas = match &mut self.kind {
            Input(_) | Flatten => vec![delta],
            Dense(dense) => vec![dense.backward(registry, delta, grads)?],
            Activation(act) => vec![act.backward(delta)],
            Dropout(dropout) => vec![dropout.backward(delta)],
            Add(add) => add.backward(delta),
            Concatenate(concat) => concat.backward(delta),
        };

        Ok(deltas)
    }

    /// Returns the configuration of this layer.
    pub fn spec(&self) -> LayerSpec {
        let config = match &self.kind {
            Input(shape) => LayerConfig::Input {
                dims: shape.dims().to_vec(),
            },
            Dense(dense) => LayerConfig::Dense {
                units: dense.units(),
                activation: dense.activation(),
                kernel_initializer: dense.kernel_initializer(),
                bias_initializer: dense.bias_initializer(),
                use_bias: dense.use_bias(),
            },
            Activation(act) => LayerConfig::Activation {
                activation: act.activation(),
            },
            Flatten => LayerConfig::Flatten,
            Dropout(dropout) => LayerConfig::Dropout {
                rate: dropout.rate(),
            },
            Add(_) => LayerConfig::Add,
            Concatenate(_) => LayerConfig::Concatenate,
        };

        LayerSpec {
            name: self.name.clone(),
            inbound: self.inbound.clone(),
            trainable: self.trainable,
            config,
        }
    }

    /// Builds an unbuilt layer from its configuration.
    pub fn from_spec(spec: &LayerSpec) -> Self {
        let kind = match &spec.config {
            LayerConfig::Input { dims } => Input(TensorShape::new(dims.clone())),
            LayerConfig::Dense {
                units,
                activation,
                kernel_initializer,
                bias_initializer,
                use_bias,
            } => Dense(
                Dense::new(*units, *activation)
                    .with_kernel_initializer(*kernel_initializer)
                    .with_bias_initializer(*bias_initializer)
                    .with_bias(*use_bias),
            ),
            LayerConfig::Activation { activation } => {
                Activation(ActivationLayer::new(*activation))
            }
            LayerConfig::Flatten => Flatten,
            LayerConfig::Dropout { rate } => Dropout(Dropout::new(*rate)),
            LayerConfig::Add => Add(Add::new()),
            LayerConfig::Concatenate => Concatenate(Concatenate::new()),
        };

        Self {
            name: spec.name.clone(),
            inbound: spec.inbound.clone(),
            trainable: spec.trainable,
            output_shape: None,
            kind,
        }
    }

    /// Returns an unbuilt copy of this layer with the same configuration.
    pub(crate) fn unbuilt(&self) -> Self {
        Self::from_spec(&self.spec())
    }

    fn single<'a>(&self, inputs: &'a [TensorShape]) -> Result<&'a TensorShape> {
        match inputs {
            [input] => Ok(input),
            _ => Err(GraphErr::InvalidArchitecture {
                reason: format!(
                    "layer '{}' expects exactly one input but got {}",
                    self.name,
                    inputs.len()
                ),
            }),
        }
    }
}

fn single_input<'a>(layer: &str, inputs: &[&'a Array2<f32>]) -> Result<&'a Array2<f32>> {
    match inputs {
        [input] => Ok(*input),
        _ => Err(GraphErr::InvalidArgument {
            reason: format!(
                "layer '{layer}' expects exactly one input but was fed {}",
                inputs.len()
            ),
        }),
    }
}

/// Adds `grad` to the gradient already accumulated for `variable`.
pub(crate) fn accumulate(grads: &mut Gradients, variable: &str, grad: ArrayD<f32>) {
    match grads.get_mut(variable) {
        Some(acc) => *acc += &grad,
        None => {
            grads.insert(variable.to_string(), grad);
        }
    }
}

/// The specification for the `Layer` struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default)]
    pub inbound: Vec<String>,
    pub trainable: bool,
    pub config: LayerConfig,
}

/// The specification for the `LayerKind` enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerConfig {
    Input {
        dims: Vec<usize>,
    },
    Dense {
        units: usize,
        activation: Activations,
        kernel_initializer: Initializer,
        bias_initializer: Initializer,
        use_bias: bool,
    },
    Activation {
        activation: Activations,
    },
    Flatten,
    Dropout {
        rate: f32,
    },
    Add,
    Concatenate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_shape() {
        let flatten = Layer::flatten();
        let shape = flatten
            .compute_output_shape(&[TensorShape::new(vec![4, 4, 2])])
            .unwrap();
        assert_eq!(shape.dims(), &[32]);
    }

    #[test]
    fn has_activation() {
        assert!(Layer::dense(3, Activations::Relu).has_activation());
        assert!(Layer::activation(Activations::Softmax).has_activation());
        assert!(!Layer::flatten().has_activation());
    }

    #[test]
    fn spec_round_trip() {
        let layer = Layer::dense(4, Activations::Tanh)
            .named("hidden")
            .inbound(&["input_1"])
            .frozen();

        let json = serde_json::to_string(&layer.spec()).unwrap();
        let spec: LayerSpec = serde_json::from_str(&json).unwrap();
        let rebuilt = Layer::from_spec(&spec);

        assert_eq!(rebuilt.name(), "hidden");
        assert_eq!(rebuilt.inbound_names(), &["input_1".to_string()]);
        assert!(!rebuilt.is_trainable());
        assert_eq!(rebuilt.spec(), layer.spec());
    }

    #[test]
    fn single_input_layers_reject_many() {
        let layer = Layer::activation(Activations::Relu).named("act");
        let res = layer.compute_output_shape(&[
            TensorShape::new(vec![2]),
            TensorShape::new(vec![2]),
        ]);
        assert!(matches!(res, Err(GraphErr::InvalidArchitecture { .. })));
    }
}
