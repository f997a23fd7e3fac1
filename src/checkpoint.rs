//! Saving and restoring models as a structure file plus one text file per variable.

use std::{
    fs,
    io::{BufWriter, ErrorKind, Write},
    path::Path,
};

use log::{debug, info};
use ndarray::{ArrayD, IxDyn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    backend::{Losses, Metrics},
    error::{GraphErr, Result},
    graph::{VariableRole, VariableScope},
    model::{CompileConfig, Model, ModelSpec},
    optimizer::{is_optimizer_name, OptimizerSpec, OPTIMIZER_PREFIX},
};

pub const GRAPH_FILE: &str = "graph.json";
pub const CONFIG_FILE: &str = "modelConfig.json";
pub const VARIABLE_NAMES_FILE: &str = "variableNames.txt";

const GRAPH_FORMATS: &str = "SavingFormat::GraphCustomVariables or SavingFormat::Graph";
const CONFIG_FORMATS: &str = "SavingFormat::ConfigCustomVariables";
const VARIABLE_FORMATS: &str =
    "SavingFormat::GraphCustomVariables or SavingFormat::ConfigCustomVariables";

/// What a checkpoint directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavingFormat {
    /// The graph plus the variable values.
    GraphCustomVariables,
    /// The graph alone.
    Graph,
    /// The layer configuration plus the variable values.
    ConfigCustomVariables,
}

impl SavingFormat {
    fn writes_variables(self) -> bool {
        !matches!(self, SavingFormat::Graph)
    }
}

/// How an existing checkpoint directory is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritingMode {
    FailIfExists,
    Override,
    Append,
}

/// The full graph of a compiled model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    pub model: ModelSpec,
    pub optimizer: OptimizerSpec,
    pub loss: Losses,
    pub metrics: Vec<Metrics>,
    pub config: CompileConfig,
    pub variables: Vec<VariableDef>,
}

/// A row of the variable table in `graph.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    pub shape: Vec<usize>,
    pub role: VariableRole,
    pub owner: Option<String>,
}

impl Model {
    /// Saves the model into a directory.
    ///
    /// # Arguments
    /// * `dir` - The checkpoint directory.
    /// * `format` - What gets written.
    /// * `save_optimizer_state` - Whether the optimizer variables are written besides the weights.
    /// * `mode` - What to do when `dir` already exists.
    pub fn save<P: AsRef<Path>>(
        &self,
        dir: P,
        format: SavingFormat,
        save_optimizer_state: bool,
        mode: WritingMode,
    ) -> Result<()> {
        let dir = dir.as_ref();
        self.ensure_compiled("save")?;
        if !self.is_weights_initialized() {
            return Err(GraphErr::NotInitialized {
                step: "init() or load_weights()",
            });
        }
        if save_optimizer_state && !self.is_optimizer_initialized() {
            return Err(GraphErr::NotInitialized {
                step: "fit() or init()",
            });
        }

        prepare_dir(dir, mode)?;

        match format {
            SavingFormat::GraphCustomVariables | SavingFormat::Graph => {
                write_json(&dir.join(GRAPH_FILE), &self.graph_def()?)?
            }
            SavingFormat::ConfigCustomVariables => write_json(&dir.join(CONFIG_FILE), &self.spec())?,
        }

        if format.writes_variables() {
            self.save_variables(dir, save_optimizer_state)?;
        }

        info!("saved model to {} as {format:?}", dir.display());
        Ok(())
    }

    /// Returns the graph of this compiled model.
    pub fn graph_def(&self) -> Result<GraphDef> {
        let optimizer = self
            .optimizer_spec()
            .ok_or(GraphErr::NotCompiled { step: "graph_def" })?;

        let variables = self
            .registry()
            .iter()
            .map(|var| VariableDef {
                name: var.name().to_string(),
                shape: var.shape().to_vec(),
                role: var.role(),
                owner: var.owner().map(str::to_string),
            })
            .collect();

        Ok(GraphDef {
            model: self.spec(),
            optimizer,
            loss: self.loss(),
            metrics: self.metrics().to_vec(),
            config: self.compile_config(),
            variables,
        })
    }

    /// Writes the manifest and one file per variable, layer variables first.
    fn save_variables(&self, dir: &Path, save_optimizer_state: bool) -> Result<()> {
        let registry = self.registry();
        let mut names = BufWriter::new(fs::File::create(dir.join(VARIABLE_NAMES_FILE))?);

        let mut scopes = vec![VariableScope::LayerVariables];
        if save_optimizer_state {
            scopes.push(VariableScope::OptimizerVariables);
        }

        for scope in scopes {
            for var in registry.scoped(scope) {
                let value = registry.value(var.name())?;
                writeln!(names, "{}", var.name())?;

                let mut file = BufWriter::new(fs::File::create(variable_path(dir, var.name()))?);
                let line = value
                    .iter()
                    .map(f32::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                file.write_all(line.as_bytes())?;
                file.flush()?;
            }
        }

        names.flush()?;
        Ok(())
    }

    /// Restores a compiled model from a graph checkpoint, weights are not loaded.
    pub fn load_graph<P: AsRef<Path>>(dir: P) -> Result<Model> {
        let dir = dir.as_ref();
        let def: GraphDef = read_json(&dir.join(GRAPH_FILE), GRAPH_FILE, GRAPH_FORMATS)?;

        let mut model = Model::from_spec(&def.model)?;
        model.compile_boxed(def.optimizer.build()?, def.loss, &def.metrics, def.config)?;

        for var in &def.variables {
            let registered = match (model.registry().variable(&var.name), var.role) {
                (Ok(registered), _) => registered,
                // slots of layers frozen after compiling are rebuilt on demand
                (Err(_), VariableRole::OptimizerSlot) => continue,
                (Err(e), VariableRole::LayerParameter) => return Err(e),
            };

            if registered.shape() != var.shape.as_slice() || registered.role() != var.role {
                return Err(GraphErr::MalformedCheckpoint {
                    file: GRAPH_FILE.to_string(),
                    reason: format!("variable '{}' doesn't match the rebuilt model", var.name),
                });
            }
        }

        info!("loaded graph from {}", dir.display());
        Ok(model)
    }

    /// Restores an uncompiled model from a config checkpoint.
    pub fn load_config<P: AsRef<Path>>(dir: P) -> Result<Model> {
        let dir = dir.as_ref();
        let spec: ModelSpec = read_json(&dir.join(CONFIG_FILE), CONFIG_FILE, CONFIG_FORMATS)?;

        let model = Model::from_spec(&spec)?;
        info!("loaded model config from {}", dir.display());
        Ok(model)
    }

    /// Loads the variable values of a checkpoint into this compiled model.
    ///
    /// Optimizer variables are skipped unless `load_optimizer_state` is set, and even then the
    /// ones shadowing variables of frozen layers are skipped. Variables of this model missing
    /// from the checkpoint are initialized, files not listed in the manifest are ignored.
    ///
    /// Every file is read before any variable is assigned, a failing load leaves the model as it
    /// was.
    ///
    /// # Returns
    /// An error if a listed variable is unknown to this model or its file is missing.
    pub fn load_weights<P: AsRef<Path>>(&mut self, dir: P, load_optimizer_state: bool) -> Result<()> {
        let dir = dir.as_ref();
        self.ensure_compiled("load_weights")?;

        let manifest = read_file(&dir.join(VARIABLE_NAMES_FILE), VARIABLE_NAMES_FILE)?;
        let frozen = self.registry().frozen_variables();
        let mut values = Vec::new();

        for name in manifest.lines().map(str::trim).filter(|name| !name.is_empty()) {
            if is_optimizer_variable(self, name) {
                if !load_optimizer_state {
                    continue;
                }
                if shadows_frozen(self, name, &frozen) {
                    debug!("skipped optimizer variable {name} of a frozen layer");
                    continue;
                }
            }

            let shape = self.registry().variable(name)?.shape().to_vec();
            let file = format!("{name}.txt");
            let text = read_file(&variable_path(dir, name), &file)?;
            values.push((name, parse_values(&text, &shape, &file)?));
        }

        // nothing is assigned unless every listed file parsed
        let loaded = values.len();
        for (name, value) in values {
            self.registry_mut().assign(name, value)?;
        }

        self.initialize(VariableScope::LayerVariables, false)?;
        if load_optimizer_state {
            self.initialize(VariableScope::OptimizerVariables, false)?;
        }

        info!("loaded {loaded} variables from {}", dir.display());
        Ok(())
    }
}

/// Whether a manifest entry holds optimizer state.
fn is_optimizer_variable(model: &Model, name: &str) -> bool {
    match model.registry().variable(name) {
        Ok(var) => var.role() == VariableRole::OptimizerSlot,
        Err(_) => is_optimizer_name(name),
    }
}

/// Whether an optimizer variable shadows a variable of a frozen layer.
///
/// Slots created for this model carry their owner. Slots of variables that were frozen when the
/// model was compiled were never created, they are recognized by the slot naming scheme.
fn shadows_frozen(model: &Model, name: &str, frozen: &[String]) -> bool {
    if let Ok(var) = model.registry().variable(name) {
        return var
            .owner()
            .and_then(|owner| model.registry().is_layer_trainable(owner))
            .is_some_and(|trainable| !trainable);
    }

    frozen
        .iter()
        .any(|var| name.starts_with(&format!("{OPTIMIZER_PREFIX}_{var}-")))
}

fn variable_path(dir: &Path, name: &str) -> std::path::PathBuf {
    dir.join(format!("{name}.txt"))
}

fn prepare_dir(dir: &Path, mode: WritingMode) -> Result<()> {
    match mode {
        WritingMode::FailIfExists => {
            if dir.exists() {
                return Err(GraphErr::CheckpointExists {
                    path: dir.display().to_string(),
                });
            }
        }
        WritingMode::Override => {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
        }
        WritingMode::Append => {}
    }

    fs::create_dir_all(dir)?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut file = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut file, value)?;
    file.flush()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(
    path: &Path,
    file: &str,
    formats: &'static str,
) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| missing_or_io(e, file, formats))?;
    Ok(serde_json::from_str(&text)?)
}

fn read_file(path: &Path, file: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| missing_or_io(e, file, VARIABLE_FORMATS))
}

fn missing_or_io(e: std::io::Error, file: &str, formats: &'static str) -> GraphErr {
    if e.kind() == ErrorKind::NotFound {
        GraphErr::MissingCheckpointFile {
            file: file.to_string(),
            formats,
        }
    } else {
        GraphErr::Io(e)
    }
}

/// Parses the whitespace separated values of a variable file.
fn parse_values(text: &str, shape: &[usize], file: &str) -> Result<ArrayD<f32>> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token.parse::<f32>().map_err(|e| GraphErr::MalformedCheckpoint {
                file: file.to_string(),
                reason: format!("'{token}' is not a number: {e}"),
            })
        })
        .collect::<Result<Vec<f32>>>()?;

    let expected: usize = shape.iter().product();
    if values.len() != expected {
        return Err(GraphErr::MalformedCheckpoint {
            file: file.to_string(),
            reason: format!("expected {expected} values but found {}", values.len()),
        });
    }

    ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| GraphErr::MalformedCheckpoint {
        file: file.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let value = parse_values("1 2.5\n-3 4e-2", &[2, 2], "x.txt").unwrap();
        assert_eq!(value.shape(), &[2, 2]);
        assert_eq!(value[[1, 1]], 0.04);

        let scalar = parse_values("0.9", &[], "beta.txt").unwrap();
        assert_eq!(scalar.ndim(), 0);

        let res = parse_values("1 2", &[3], "x.txt");
        assert!(matches!(res, Err(GraphErr::MalformedCheckpoint { .. })));

        let res = parse_values("1 nope", &[2], "x.txt");
        assert!(matches!(res, Err(GraphErr::MalformedCheckpoint { .. })));
    }

    #[test]
    fn float_text_round_trip() {
        for x in [0.1f32, -1.0e-7, 3.4028235e38, 1.17549435e-38, 0.333_333_34] {
            assert_eq!(x.to_string().parse::<f32>().unwrap(), x);
        }
    }
}
