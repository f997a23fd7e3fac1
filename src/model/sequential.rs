use log::debug;

use super::{name_layers, Model, Topology};
use crate::{
    error::{GraphErr, Result},
    layers::Layer,
};

/// Builds models made of a linear stack of layers.
pub struct Sequential;

impl Sequential {
    /// Creates an uncompiled model feeding each layer into the next one.
    ///
    /// # Arguments
    /// * `layers` - The layers in order, the first one must be an input layer.
    ///
    /// # Returns
    /// An error if the stack is empty, does not start with an input layer, holds another input
    /// layer or repeats a layer name.
    pub fn of(mut layers: Vec<Layer>) -> Result<Model> {
        check_stack(&layers)?;
        name_layers(&mut layers)?;

        let mut inbound = Vec::with_capacity(layers.len());
        for i in 0..layers.len() {
            if i == 0 {
                layers[i].set_inbound(Vec::new());
                inbound.push(Vec::new());
            } else {
                let previous = layers[i - 1].name().to_string();
                layers[i].set_inbound(vec![previous]);
                inbound.push(vec![i - 1]);
            }
        }

        debug!("created sequential model with {} layers", layers.len());
        Ok(Model::new(Topology::Sequential, layers, inbound))
    }
}

fn check_stack(layers: &[Layer]) -> Result<()> {
    let Some(first) = layers.first() else {
        return Err(GraphErr::InvalidArchitecture {
            reason: "the model should contain layers".to_string(),
        });
    };

    if !first.is_input() {
        return Err(GraphErr::InvalidArchitecture {
            reason: "the model should start from an input layer".to_string(),
        });
    }

    if layers.len() < 2 {
        return Err(GraphErr::InvalidArchitecture {
            reason: "the model should contain at least one layer after the input".to_string(),
        });
    }

    if layers[1..].iter().any(Layer::is_input) {
        return Err(GraphErr::InvalidArchitecture {
            reason: "the model should contain a single input layer".to_string(),
        });
    }

    Ok(())
}
