//! The eager numeric backend: activations, losses, metrics and gradient clipping.

mod activations;
mod clip;
mod losses;
mod metrics;

pub use activations::Activations;
pub use clip::GradientClipping;
pub use losses::Losses;
pub use metrics::Metrics;

pub(crate) use metrics::argmax;
