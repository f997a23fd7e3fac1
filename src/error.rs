use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, GraphErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum GraphErr {
    DuplicateLayerName {
        name: String,
    },
    DuplicateVariable {
        name: String,
    },
    MissingVariable {
        name: String,
    },
    MissingLayer {
        name: String,
    },
    InvalidArchitecture {
        reason: String,
    },
    InvalidHyperparameter {
        optimizer: &'static str,
        reason: String,
    },
    InvalidArgument {
        reason: String,
    },
    AlreadyCompiled,
    NotCompiled {
        step: &'static str,
    },
    NotInitialized {
        step: &'static str,
    },
    Closed,
    ShapeMismatch {
        what: String,
        expected: String,
        got: String,
    },
    BatchNotDivisible {
        size: usize,
        batch_size: usize,
    },
    MissingSlot {
        variable: String,
        slot: String,
    },
    CheckpointExists {
        path: String,
    },
    MissingCheckpointFile {
        file: String,
        formats: &'static str,
    },
    MalformedCheckpoint {
        file: String,
        reason: String,
    },
    Io(io::Error),
    Json(serde_json::Error),
}

impl Display for GraphErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphErr::DuplicateLayerName { name } => write!(
                f,
                "The layer name '{name}' is used more than once, layer names must be unique"
            ),
            GraphErr::DuplicateVariable { name } => {
                write!(f, "A variable named '{name}' is already registered")
            }
            GraphErr::MissingVariable { name } => {
                write!(f, "No variable named '{name}' is registered in the model")
            }
            GraphErr::MissingLayer { name } => {
                write!(f, "No layer named '{name}' exists in the model")
            }
            GraphErr::InvalidArchitecture { reason } => {
                write!(f, "Invalid model architecture: {reason}")
            }
            GraphErr::InvalidHyperparameter { optimizer, reason } => {
                write!(f, "Invalid hyperparameter for the {optimizer} optimizer: {reason}")
            }
            GraphErr::InvalidArgument { reason } => write!(f, "Invalid argument: {reason}"),
            GraphErr::AlreadyCompiled => write!(f, "The model is already compiled"),
            GraphErr::NotCompiled { step } => write!(
                f,
                "The model is not compiled yet, compile it before calling {step}"
            ),
            GraphErr::NotInitialized { step } => write!(
                f,
                "The model weights are not initialized, run {step} first"
            ),
            GraphErr::Closed => write!(f, "The model was closed and can no longer be used"),
            GraphErr::ShapeMismatch {
                what,
                expected,
                got,
            } => write!(
                f,
                "There's a shape mismatch in {what}, expected {expected} but got {got}"
            ),
            GraphErr::BatchNotDivisible { size, batch_size } => write!(
                f,
                "The amount of samples must be a multiple of batch size, got {size} samples and a batch size of {batch_size}"
            ),
            GraphErr::MissingSlot { variable, slot } => write!(
                f,
                "The optimizer has no slot '{slot}' for variable '{variable}'"
            ),
            GraphErr::CheckpointExists { path } => write!(
                f,
                "The directory '{path}' already contains a saved model, choose another writing mode"
            ),
            GraphErr::MissingCheckpointFile { file, formats } => write!(
                f,
                "File '{file}' is not found. This file must be in the model directory. It is generated when saving the model with {formats}"
            ),
            GraphErr::MalformedCheckpoint { file, reason } => {
                write!(f, "The checkpoint file '{file}' is malformed: {reason}")
            }
            GraphErr::Io(e) => write!(f, "io error: {e}"),
            GraphErr::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl Error for GraphErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GraphErr::Io(e) => Some(e),
            GraphErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for GraphErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for GraphErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
