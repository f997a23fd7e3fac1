#![allow(dead_code)]

use std::path::PathBuf;

use layer_graph::{
    backend::{Activations, Losses, Metrics},
    optimizer::Optimizer,
    CompileConfig, Dataset, Layer, Model, Sequential,
};
use ndarray::array;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh directory under the system temp dir, removed when dropped.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "layer-graph-{name}-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        Self(path)
    }

    pub fn path(&self) -> &PathBuf {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// The xor truth table with one hot labels.
pub fn xor() -> Dataset {
    Dataset::with_classes(
        array![[0., 0.], [0., 1.], [1., 0.], [1., 1.]],
        &[0, 1, 1, 0],
        2,
    )
    .unwrap()
}

pub fn classifier() -> Model {
    Sequential::of(vec![
        Layer::input(&[2]),
        Layer::dense(8, Activations::Tanh),
        Layer::dense(2, Activations::Softmax),
    ])
    .unwrap()
}

pub fn compiled<O: Optimizer + 'static>(optimizer: O) -> Model {
    let mut model = classifier();
    model
        .compile(
            optimizer,
            Losses::MeanSquaredError,
            &[Metrics::Accuracy],
            CompileConfig::default(),
        )
        .unwrap();
    model
}
