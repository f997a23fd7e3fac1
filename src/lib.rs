pub mod backend;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod initializers;
pub mod layers;
pub mod model;
pub mod optimizer;
pub mod shape;
pub mod training;

pub use checkpoint::{SavingFormat, WritingMode};
pub use dataset::{DataBatch, Dataset};
pub use error::{GraphErr, Result};
pub use graph::{VariableRegistry, VariableScope};
pub use layers::Layer;
pub use model::{CompileConfig, Functional, Model, Sequential};
pub use optimizer::{Optimizer, OptimizerSpec};
pub use shape::TensorShape;
pub use training::{Callback, Evaluation, FitOptions, TrainingHistory};
