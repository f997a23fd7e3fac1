use ndarray::{linalg, Array2, ArrayView1, ArrayView2, Axis, Ix1, Ix2};

use super::accumulate;
use crate::{
    backend::Activations,
    error::{GraphErr, Result},
    graph::{Gradients, VariableRegistry},
    initializers::Initializer,
    shape::TensorShape,
};

/// A densely connected layer, `a = activation(x · kernel + bias)`.
#[derive(Debug, Clone)]
pub struct Dense {
    units: usize,
    activation: Activations,
    kernel_initializer: Initializer,
    bias_initializer: Initializer,
    use_bias: bool,
    input_dim: usize,
    kernel: Option<String>,
    bias: Option<String>,

    // Forward metadata
    x: Array2<f32>,
    z: Array2<f32>,
    a: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer.
    ///
    /// # Arguments
    /// * `units` - The amount of outputs of the layer.
    /// * `activation` - The activation applied to the outputs.
    pub fn new(units: usize, activation: Activations) -> Self {
        let zeros = Array2::zeros((0, 0));

        Self {
            units,
            activation,
            kernel_initializer: Initializer::GlorotUniform,
            bias_initializer: Initializer::Zeros,
            use_bias: true,
            input_dim: 0,
            kernel: None,
            bias: None,
            x: zeros.clone(),
            z: zeros.clone(),
            a: zeros,
        }
    }

    pub fn with_kernel_initializer(mut self, initializer: Initializer) -> Self {
        self.kernel_initializer = initializer;
        self
    }

    pub fn with_bias_initializer(mut self, initializer: Initializer) -> Self {
        self.bias_initializer = initializer;
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn activation(&self) -> Activations {
        self.activation
    }

    pub fn kernel_initializer(&self) -> Initializer {
        self.kernel_initializer
    }

    pub fn bias_initializer(&self) -> Initializer {
        self.bias_initializer
    }

    pub fn use_bias(&self) -> bool {
        self.use_bias
    }

    /// Returns the amount of parameters this layer has, zero before it is built.
    pub fn param_count(&self) -> usize {
        if self.kernel.is_none() {
            return 0;
        }

        self.input_dim * self.units + if self.use_bias { self.units } else { 0 }
    }

    pub(super) fn variables(&self) -> Vec<String> {
        self.kernel.iter().chain(self.bias.iter()).cloned().collect()
    }

    pub(super) fn compute_output_shape(&self, input: &TensorShape) -> Result<TensorShape> {
        if input.rank() != 1 {
            return Err(GraphErr::InvalidArchitecture {
                reason: format!(
                    "a dense layer expects flat inputs but got {input}, add a flatten layer first"
                ),
            });
        }

        Ok(TensorShape::new(vec![self.units]))
    }

    /// Registers the kernel and bias of this layer.
    ///
    /// # Arguments
    /// * `layer` - The name of the layer owning this dense block.
    /// * `registry` - The registry the variables are added to.
    /// * `input` - The shape of the incoming samples.
    ///
    /// # Returns
    /// The output shape of the layer.
    pub(super) fn build(
        &mut self,
        layer: &str,
        registry: &mut VariableRegistry,
        input: &TensorShape,
    ) -> Result<TensorShape> {
        let output = self.compute_output_shape(input)?;
        self.input_dim = input.num_elements();

        self.kernel = Some(registry.add_layer_variable(
            layer,
            "dense_kernel",
            vec![self.input_dim, self.units],
            self.kernel_initializer,
        )?);

        if self.use_bias {
            self.bias = Some(registry.add_layer_variable(
                layer,
                "dense_bias",
                vec![self.units],
                self.bias_initializer,
            )?);
        }

        Ok(output)
    }

    pub(super) fn forward(
        &mut self,
        registry: &VariableRegistry,
        x: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (w, b) = self.view_params(registry)?;
        if x.ncols() != w.nrows() {
            return Err(GraphErr::ShapeMismatch {
                what: "dense layer input".to_string(),
                expected: format!("{} features", w.nrows()),
                got: format!("{} features", x.ncols()),
            });
        }

        let mut z = Array2::zeros((x.nrows(), self.units));
        linalg::general_mat_mul(1.0, x, &w, 0.0, &mut z);
        if let Some(b) = b {
            z += &b;
        }

        self.a = self.activation.forward(&z);
        self.x = x.to_owned();
        self.z = z;

        Ok(self.a.clone())
    }

    pub(super) fn backward(
        &mut self,
        registry: &VariableRegistry,
        delta: Array2<f32>,
        grads: &mut Gradients,
    ) -> Result<Array2<f32>> {
        let d = self.activation.backward(&self.z, &self.a, delta);
        let (w, _) = self.view_params(registry)?;

        let mut dw = Array2::zeros(w.raw_dim());
        linalg::general_mat_mul(1.0, &self.x.t(), &d, 0.0, &mut dw);

        if let Some(kernel) = &self.kernel {
            accumulate(grads, kernel, dw.into_dyn());
        }
        if let Some(bias) = &self.bias {
            accumulate(grads, bias, d.sum_axis(Axis(0)).into_dyn());
        }

        let mut dx = Array2::zeros((d.nrows(), w.nrows()));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut dx);

        Ok(dx)
    }

    /// Gives a view of the registered variables as the weights and biases of this layer.
    fn view_params<'a>(
        &self,
        registry: &'a VariableRegistry,
    ) -> Result<(ArrayView2<'a, f32>, Option<ArrayView1<'a, f32>>)> {
        let kernel = self.kernel.as_deref().ok_or(GraphErr::NotCompiled {
            step: "the dense layer forward pass",
        })?;

        let w = registry
            .value(kernel)?
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| shape_err(kernel, e))?;

        let b = match &self.bias {
            Some(bias) => Some(
                registry
                    .value(bias)?
                    .view()
                    .into_dimensionality::<Ix1>()
                    .map_err(|e| shape_err(bias, e))?,
            ),
            None => None,
        };

        Ok((w, b))
    }
}

fn shape_err(name: &str, e: ndarray::ShapeError) -> GraphErr {
    GraphErr::ShapeMismatch {
        what: format!("variable '{name}'"),
        expected: "a matching rank".to_string(),
        got: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayD};

    fn built() -> (Dense, VariableRegistry) {
        let mut registry = VariableRegistry::new();
        registry.register_layer("dense_1", true);

        let mut dense = Dense::new(2, Activations::Linear);
        dense
            .build("dense_1", &mut registry, &TensorShape::new(vec![3]))
            .unwrap();

        registry
            .assign(
                "dense_1_dense_kernel",
                array![[1., 0.], [0., 1.], [1., 1.]].into_dyn(),
            )
            .unwrap();
        registry
            .assign("dense_1_dense_bias", array![0.5, -0.5].into_dyn())
            .unwrap();

        (dense, registry)
    }

    #[test]
    fn param_count() {
        let (dense, _) = built();
        assert_eq!(dense.param_count(), 8);
    }

    #[test]
    fn forward() {
        let (mut dense, registry) = built();
        let y = dense.forward(&registry, &array![[1., 2., 3.]]).unwrap();
        assert_eq!(y, array![[4.5, 4.5]]);
    }

    #[test]
    fn backward() {
        let (mut dense, registry) = built();
        dense.forward(&registry, &array![[1., 2., 3.]]).unwrap();

        let mut grads = Gradients::new();
        let dx = dense
            .backward(&registry, array![[1., 2.]], &mut grads)
            .unwrap();

        assert_eq!(dx, array![[1., 2., 3.]]);
        assert_eq!(grads["dense_1_dense_bias"], array![1., 2.].into_dyn());
        assert_eq!(
            grads["dense_1_dense_kernel"],
            ArrayD::from_shape_vec(vec![3, 2], vec![1., 2., 2., 4., 3., 6.]).unwrap()
        );
    }

    #[test]
    fn rejects_non_flat_input() {
        let dense = Dense::new(2, Activations::Relu);
        let res = dense.compute_output_shape(&TensorShape::new(vec![2, 2]));
        assert!(matches!(res, Err(GraphErr::InvalidArchitecture { .. })));
    }
}
