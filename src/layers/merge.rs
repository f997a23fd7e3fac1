use ndarray::{concatenate, s, Array2, ArrayView2, Axis};

use crate::{
    error::{GraphErr, Result},
    shape::TensorShape,
};

/// Sums its inputs element-wise.
#[derive(Debug, Clone, Default)]
pub struct Add {
    inputs: usize,
}

impl Add {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn compute_output_shape(&self, inputs: &[TensorShape]) -> Result<TensorShape> {
        let first = inputs.first().ok_or_else(|| GraphErr::InvalidArchitecture {
            reason: "an add layer needs at least one input".to_string(),
        })?;

        if let Some(other) = inputs.iter().find(|shape| *shape != first) {
            return Err(GraphErr::ShapeMismatch {
                what: "add layer inputs".to_string(),
                expected: first.to_string(),
                got: other.to_string(),
            });
        }

        Ok(first.clone())
    }

    pub(super) fn forward(&mut self, inputs: &[&Array2<f32>]) -> Result<Array2<f32>> {
        let (first, rest) = inputs.split_first().ok_or_else(|| GraphErr::InvalidArgument {
            reason: "an add layer was fed no inputs".to_string(),
        })?;

        let mut sum = (*first).to_owned();
        for x in rest {
            sum += *x;
        }

        self.inputs = inputs.len();
        Ok(sum)
    }

    pub(super) fn backward(&self, delta: Array2<f32>) -> Vec<Array2<f32>> {
        vec![delta; self.inputs]
    }
}

/// Joins its flat inputs along the feature axis.
#[derive(Debug, Clone, Default)]
pub struct Concatenate {
    widths: Vec<usize>,
}

impl Concatenate {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn compute_output_shape(&self, inputs: &[TensorShape]) -> Result<TensorShape> {
        if inputs.is_empty() {
            return Err(GraphErr::InvalidArchitecture {
                reason: "a concatenate layer needs at least one input".to_string(),
            });
        }

        if let Some(shape) = inputs.iter().find(|shape| shape.rank() != 1) {
            return Err(GraphErr::InvalidArchitecture {
                reason: format!("a concatenate layer expects flat inputs but got {shape}"),
            });
        }

        Ok(TensorShape::new(vec![inputs
            .iter()
            .map(TensorShape::num_elements)
            .sum()]))
    }

    pub(super) fn forward(&mut self, inputs: &[&Array2<f32>]) -> Result<Array2<f32>> {
        let views: Vec<ArrayView2<f32>> = inputs.iter().map(|x| x.view()).collect();
        self.widths = views.iter().map(|x| x.ncols()).collect();

        concatenate(Axis(1), &views).map_err(|e| GraphErr::ShapeMismatch {
            what: "concatenate layer inputs".to_string(),
            expected: "the same batch size".to_string(),
            got: e.to_string(),
        })
    }

    pub(super) fn backward(&self, delta: Array2<f32>) -> Vec<Array2<f32>> {
        let mut start = 0;
        self.widths
            .iter()
            .map(|&width| {
                let part = delta.slice(s![.., start..start + width]).to_owned();
                start += width;
                part
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn add() {
        let mut add = Add::new();
        let a = array![[1., 2.]];
        let b = array![[3., 4.]];

        assert_eq!(add.forward(&[&a, &b]).unwrap(), array![[4., 6.]]);
        assert_eq!(add.backward(array![[1., 1.]]).len(), 2);
    }

    #[test]
    fn concatenate_round_trip() {
        let mut concat = Concatenate::new();
        let a = array![[1.], [2.]];
        let b = array![[3., 4.], [5., 6.]];

        let y = concat.forward(&[&a, &b]).unwrap();
        assert_eq!(y, array![[1., 3., 4.], [2., 5., 6.]]);

        let parts = concat.backward(y);
        assert_eq!(parts[0], a);
        assert_eq!(parts[1], b);
    }

    #[test]
    fn add_shapes_must_match() {
        let res = Add::new().compute_output_shape(&[
            TensorShape::new(vec![2]),
            TensorShape::new(vec![3]),
        ]);
        assert!(res.is_err());
    }
}
