use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The shape of a single sample flowing through the graph.
///
/// The batch dimension is never part of a `TensorShape`, it only becomes known once a batch is
/// fed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    /// Creates a new `TensorShape`.
    ///
    /// # Arguments
    /// * `dims` - The per sample dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Returns the per sample dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the amount of dimensions of a sample.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns the amount of scalars a single sample holds.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }
}

impl Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[None")?;
        for dim in &self.dims {
            write!(f, ", {dim}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements() {
        let shape = TensorShape::new(vec![28, 28, 1]);
        assert_eq!(shape.num_elements(), 784);
        assert_eq!(shape.to_string(), "[None, 28, 28, 1]");
    }
}
