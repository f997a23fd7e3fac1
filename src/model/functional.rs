use std::collections::{HashMap, VecDeque};

use log::debug;

use super::{name_layers, Model, Topology};
use crate::{
    error::{GraphErr, Result},
    layers::Layer,
};

/// Builds models whose layers form a directed acyclic graph.
pub struct Functional;

impl Functional {
    /// Creates an uncompiled model from layers wired by their inbound names.
    ///
    /// The layers may come in any order, they are sorted topologically.
    ///
    /// # Returns
    /// An error if there isn't exactly one input layer and one output layer, a name is repeated
    /// or unknown, the graph has a cycle, or a layer is not on a path from input to output.
    pub fn of(mut layers: Vec<Layer>) -> Result<Model> {
        if layers.is_empty() {
            return Err(GraphErr::InvalidArchitecture {
                reason: "the model should contain layers".to_string(),
            });
        }

        name_layers(&mut layers)?;
        let (layers, inbound) = sort(layers)?;

        debug!("created functional model with {} layers", layers.len());
        Ok(Model::new(Topology::Functional, layers, inbound))
    }

    /// Creates an uncompiled model stacking new layers on top of a pretrained one.
    ///
    /// The pretrained layers are copied unbuilt and frozen. The top layers without inbound names
    /// are chained, the first one to the pretrained output and each next one to the previous.
    /// Weights are not copied, they are loaded into the new model after compiling it.
    pub fn from_pretrained(pretrained: &Model, top: Vec<Layer>) -> Result<Model> {
        pretrained.ensure_open()?;

        let mut layers: Vec<Layer> = pretrained
            .layers()
            .iter()
            .map(|layer| {
                let mut layer = layer.unbuilt();
                layer.set_trainable(false);
                layer
            })
            .collect();

        let offset = layers.len();
        layers.extend(top);
        name_layers(&mut layers)?;

        let mut previous = pretrained.output_layer().name().to_string();
        for layer in layers[offset..].iter_mut() {
            if layer.inbound_names().is_empty() {
                layer.set_inbound(vec![previous]);
            }
            previous = layer.name().to_string();
        }

        Self::of(layers)
    }
}

/// Sorts the layers topologically and resolves their inbound names to indices.
fn sort(layers: Vec<Layer>) -> Result<(Vec<Layer>, Vec<Vec<usize>>)> {
    let n = layers.len();
    let positions: HashMap<&str, usize> = layers
        .iter()
        .enumerate()
        .map(|(i, layer)| (layer.name(), i))
        .collect();

    let inputs: Vec<usize> = (0..n).filter(|&i| layers[i].is_input()).collect();
    if inputs.len() != 1 {
        return Err(GraphErr::InvalidArchitecture {
            reason: format!("the model should contain one input layer, got {}", inputs.len()),
        });
    }

    let mut parents: Vec<Vec<usize>> = Vec::with_capacity(n);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, layer) in layers.iter().enumerate() {
        if layer.is_input() != layer.inbound_names().is_empty() {
            return Err(GraphErr::InvalidArchitecture {
                reason: format!(
                    "layer '{}' must have inbound layers unless it is the input",
                    layer.name()
                ),
            });
        }

        let mut resolved = Vec::with_capacity(layer.inbound_names().len());
        for name in layer.inbound_names() {
            let &j = positions
                .get(name.as_str())
                .ok_or_else(|| GraphErr::MissingLayer { name: name.clone() })?;
            resolved.push(j);
            children[j].push(i);
        }
        parents.push(resolved);
    }

    let outputs: Vec<usize> = (0..n).filter(|&i| children[i].is_empty()).collect();
    if outputs.len() != 1 {
        return Err(GraphErr::InvalidArchitecture {
            reason: format!("the model should have one output layer, got {}", outputs.len()),
        });
    }

    let mut pending: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = inputs.into_iter().collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = queue.pop_front() {
        order.push(i);
        for &child in &children[i] {
            pending[child] -= 1;
            if pending[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<&str> = (0..n)
            .filter(|i| !order.contains(i))
            .map(|i| layers[i].name())
            .collect();
        return Err(GraphErr::InvalidArchitecture {
            reason: format!("layers {stuck:?} are part of a cycle or unreachable from the input"),
        });
    }

    let mut rank = vec![0; n];
    for (r, &i) in order.iter().enumerate() {
        rank[i] = r;
    }

    let inbound = order
        .iter()
        .map(|&i| parents[i].iter().map(|&j| rank[j]).collect())
        .collect();

    let mut slots: Vec<Option<Layer>> = layers.into_iter().map(Some).collect();
    let sorted = order.iter().filter_map(|&i| slots[i].take()).collect();

    Ok((sorted, inbound))
}
