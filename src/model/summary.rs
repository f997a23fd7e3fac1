use std::fmt;

use super::Model;
use crate::graph::VariableScope;

/// A row of the model summary.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub kind: &'static str,
    pub output_shape: String,
    pub params: usize,
    pub trainable: bool,
}

/// A description of a compiled model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub layers: Vec<LayerSummary>,
    pub trainable_params: usize,
    pub frozen_params: usize,
    pub optimizer_params: usize,
}

impl ModelSummary {
    pub(super) fn of(model: &Model) -> Self {
        let layers: Vec<LayerSummary> = model
            .layers()
            .iter()
            .map(|layer| LayerSummary {
                name: layer.name().to_string(),
                kind: layer.kind_name(),
                output_shape: layer
                    .output_shape()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                params: layer.param_count(),
                trainable: layer.is_trainable(),
            })
            .collect();

        let (trainable_params, frozen_params) =
            layers.iter().fold((0, 0), |(t, f), layer| {
                if layer.trainable {
                    (t + layer.params, f)
                } else {
                    (t, f + layer.params)
                }
            });

        let optimizer_params = model
            .registry()
            .scoped(VariableScope::OptimizerVariables)
            .map(|var| var.size())
            .sum();

        Self {
            layers,
            trainable_params,
            frozen_params,
            optimizer_params,
        }
    }

    pub fn total_params(&self) -> usize {
        self.trainable_params + self.frozen_params
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(72);
        writeln!(f, "{rule}")?;
        writeln!(f, "{:<28}{:<24}{:>20}", "Layer (type)", "Output shape", "Params")?;
        writeln!(f, "{rule}")?;

        for layer in &self.layers {
            let name = format!("{} ({})", layer.name, layer.kind);
            writeln!(f, "{name:<28}{:<24}{:>20}", layer.output_shape, layer.params)?;
        }

        writeln!(f, "{rule}")?;
        writeln!(f, "Total params: {}", self.total_params())?;
        writeln!(f, "Trainable params: {}", self.trainable_params)?;
        writeln!(f, "Frozen params: {}", self.frozen_params)?;
        write!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        backend::{Activations, Losses},
        layers::Layer,
        model::{CompileConfig, Sequential},
        optimizer::Adam,
    };

    #[test]
    fn counts_params() {
        let mut model = Sequential::of(vec![
            Layer::input(&[4]),
            Layer::dense(3, Activations::Relu).named("hidden").frozen(),
            Layer::dense(2, Activations::Softmax),
        ])
        .unwrap();
        model
            .compile(
                Adam::default(),
                Losses::SoftmaxCrossEntropyWithLogits,
                &[],
                CompileConfig::default(),
            )
            .unwrap();

        let summary = model.summary().unwrap();
        assert_eq!(summary.frozen_params, 4 * 3 + 3);
        assert_eq!(summary.trainable_params, 3 * 2 + 2);
        assert_eq!(summary.layers[1].output_shape, "[None, 3]");
        assert_eq!(summary.optimizer_params, 2 * (3 * 2 + 2) + 2);
        assert!(summary.to_string().contains("Total params: 23"));
    }
}
