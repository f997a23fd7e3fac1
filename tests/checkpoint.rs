mod common;

use std::fs;

use layer_graph::{
    backend::{Activations, Losses, Metrics},
    checkpoint::{CONFIG_FILE, GRAPH_FILE, VARIABLE_NAMES_FILE},
    optimizer::{Adam, Momentum},
    CompileConfig, FitOptions, Functional, GraphErr, Layer, Model, SavingFormat, Sequential,
    WritingMode,
};

use common::{compiled, init_logger, xor, TempDir};

#[test]
fn graph_format_round_trip() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("graph-round-trip");

    let mut model = compiled(Adam::default());
    model.fit(&xor(), FitOptions::new(5, 2))?;
    let before = model.evaluate(&xor(), 2)?;

    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    )?;
    assert!(dir.path().join(GRAPH_FILE).exists());

    let mut restored = Model::load_graph(dir.path())?;
    assert!(restored.is_compiled());
    restored.load_weights(dir.path(), false)?;

    let after = restored.evaluate(&xor(), 2)?;
    assert_eq!(before, after);
    assert!(!restored.is_optimizer_initialized());

    Ok(())
}

#[test]
fn config_format_round_trip() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("config-round-trip");

    let mut model = compiled(Momentum::default());
    model.fit(&xor(), FitOptions::new(3, 4))?;
    let before = model.evaluate(&xor(), 4)?;

    model.save(
        dir.path(),
        SavingFormat::ConfigCustomVariables,
        false,
        WritingMode::Override,
    )?;
    assert!(dir.path().join(CONFIG_FILE).exists());

    let mut restored = Model::load_config(dir.path())?;
    assert!(!restored.is_compiled());
    restored.compile(
        Momentum::default(),
        Losses::MeanSquaredError,
        &[Metrics::Accuracy],
        CompileConfig::default(),
    )?;
    restored.load_weights(dir.path(), false)?;

    assert_eq!(before, restored.evaluate(&xor(), 4)?);
    Ok(())
}

#[test]
fn optimizer_state_skips_frozen_layers() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("optimizer-state");

    let mut model = compiled(Adam::default());
    model.fit(&xor(), FitOptions::new(4, 2))?;
    let before = model.evaluate(&xor(), 2)?;
    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        true,
        WritingMode::FailIfExists,
    )?;

    let manifest = fs::read_to_string(dir.path().join(VARIABLE_NAMES_FILE))?;
    assert!(manifest.lines().any(|l| l == "optimizer_dense_2_dense_kernel-m"));
    assert!(manifest.lines().any(|l| l == "optimizer_beta1_power"));

    let mut restored = Model::load_graph(dir.path())?;
    restored.freeze_layer("dense_2")?;
    restored.load_weights(dir.path(), true)?;

    assert_eq!(before, restored.evaluate(&xor(), 2)?);
    assert!(restored.is_optimizer_initialized());

    let frozen_slot = restored.variable_value("optimizer_dense_2_dense_kernel-m")?;
    assert!(frozen_slot.iter().all(|&x| x == 0.));
    assert_eq!(
        restored.variable_value("optimizer_dense_3_dense_kernel-m")?,
        model.variable_value("optimizer_dense_3_dense_kernel-m")?
    );
    assert_eq!(
        restored.variable_value("optimizer_beta1_power")?,
        model.variable_value("optimizer_beta1_power")?
    );

    let kernel = restored.variable_value("dense_2_dense_kernel")?.clone();
    restored.fit(&xor(), FitOptions::new(1, 2))?;
    assert_eq!(restored.variable_value("dense_2_dense_kernel")?, &kernel);

    Ok(())
}

#[test]
fn slots_missing_from_frozen_compile_are_skipped() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("frozen-compile");

    let mut model = compiled(Adam::default());
    model.fit(&xor(), FitOptions::new(2, 2))?;
    model.save(
        dir.path(),
        SavingFormat::ConfigCustomVariables,
        true,
        WritingMode::FailIfExists,
    )?;

    let mut restored = Model::load_config(dir.path())?;
    restored.freeze_layer("dense_2")?;
    restored.compile(
        Adam::default(),
        Losses::MeanSquaredError,
        &[Metrics::Accuracy],
        CompileConfig::default(),
    )?;
    assert!(!restored.registry().contains("optimizer_dense_2_dense_kernel-m"));

    restored.load_weights(dir.path(), true)?;
    assert_eq!(
        restored.variable_value("dense_2_dense_kernel")?,
        model.variable_value("dense_2_dense_kernel")?
    );

    Ok(())
}

#[test]
fn missing_files_are_named() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("missing-files");

    let mut model = compiled(Adam::default());
    model.init()?;
    model.save(dir.path(), SavingFormat::Graph, false, WritingMode::FailIfExists)?;

    let res = Model::load_config(dir.path());
    assert!(
        matches!(res, Err(GraphErr::MissingCheckpointFile { ref file, .. }) if file == CONFIG_FILE)
    );

    let res = model.load_weights(dir.path(), false);
    match res {
        Err(e @ GraphErr::MissingCheckpointFile { .. }) => {
            let msg = e.to_string();
            assert!(msg.contains(VARIABLE_NAMES_FILE));
            assert!(msg.contains("SavingFormat::GraphCustomVariables"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::Append,
    )?;
    fs::remove_file(dir.path().join("dense_3_dense_bias.txt"))?;
    let res = model.load_weights(dir.path(), false);
    assert!(
        matches!(res, Err(GraphErr::MissingCheckpointFile { ref file, .. }) if file == "dense_3_dense_bias.txt")
    );

    Ok(())
}

#[test]
fn writing_modes() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("writing-modes");

    let mut model = compiled(Adam::default());
    model.init()?;
    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    )?;

    let res = model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    );
    assert!(matches!(res, Err(GraphErr::CheckpointExists { .. })));

    fs::write(dir.path().join("stale.txt"), "1 2 3")?;
    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::Override,
    )?;
    assert!(!dir.path().join("stale.txt").exists());

    Ok(())
}

#[test]
fn unknown_variable_is_fatal() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("unknown-variable");

    let mut model = compiled(Adam::default());
    model.init()?;
    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    )?;

    let names = dir.path().join(VARIABLE_NAMES_FILE);
    let mut manifest = fs::read_to_string(&names)?;
    manifest.push_str("dense_9_dense_kernel\n");
    fs::write(&names, manifest)?;
    fs::write(dir.path().join("unlisted.txt"), "1")?;

    let mut restored = Model::load_graph(dir.path())?;
    let res = restored.load_weights(dir.path(), false);
    assert!(matches!(res, Err(GraphErr::MissingVariable { .. })));

    Ok(())
}

#[test]
fn transfer_learning_keeps_the_pretrained_weights() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("transfer-learning");

    let mut base = compiled(Adam::default());
    base.fit(&xor(), FitOptions::new(3, 2))?;
    base.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        true,
        WritingMode::FailIfExists,
    )?;

    let mut model = Functional::from_pretrained(
        &base,
        vec![Layer::dense(2, Activations::Softmax).named("head")],
    )?;
    model.compile(
        Adam::default(),
        Losses::MeanSquaredError,
        &[Metrics::Accuracy],
        CompileConfig::default(),
    )?;
    assert!(!model.registry().contains("optimizer_dense_2_dense_kernel-m"));

    model.load_weights(dir.path(), true)?;
    assert!(model.is_optimizer_initialized());
    assert_eq!(
        model.variable_value("optimizer_beta1_power")?,
        base.variable_value("optimizer_beta1_power")?
    );

    let pretrained = ["dense_2_dense_kernel", "dense_2_dense_bias", "dense_3_dense_kernel"];
    for name in pretrained {
        assert_eq!(model.variable_value(name)?, base.variable_value(name)?);
    }

    let head = model.variable_value("head_dense_kernel")?.clone();
    model.fit(&xor(), FitOptions::new(2, 2))?;

    for name in pretrained {
        assert_eq!(model.variable_value(name)?, base.variable_value(name)?);
    }
    assert_ne!(model.variable_value("head_dense_kernel")?, &head);

    Ok(())
}

#[test]
fn layers_named_like_the_optimizer_are_weights() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("optimizer-like-layer");

    let mut model = Sequential::of(vec![
        Layer::input(&[2]),
        Layer::dense(8, Activations::Tanh),
        Layer::dense(2, Activations::Softmax).named("optimizer_head"),
    ])?;
    model.compile(
        Adam::default(),
        Losses::MeanSquaredError,
        &[],
        CompileConfig::default(),
    )?;
    model.init()?;
    model.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    )?;

    let restored = Model::load_graph(dir.path())?;
    assert!(restored.registry().contains("optimizer_head_dense_kernel"));

    // the classifier has no layer called optimizer_head
    let mut other = compiled(Adam::default());
    let res = other.load_weights(dir.path(), false);
    assert!(
        matches!(res, Err(GraphErr::MissingVariable { ref name }) if name == "optimizer_head_dense_kernel")
    );

    Ok(())
}

#[test]
fn failed_load_leaves_weights_untouched() -> anyhow::Result<()> {
    init_logger();
    let dir = TempDir::new("failed-load");

    let mut trained = compiled(Adam::default());
    trained.fit(&xor(), FitOptions::new(3, 2))?;
    trained.save(
        dir.path(),
        SavingFormat::GraphCustomVariables,
        false,
        WritingMode::FailIfExists,
    )?;
    fs::write(dir.path().join("dense_3_dense_bias.txt"), "0.5 oops")?;

    let mut model = compiled(Adam::default());
    model.init()?;
    let kernel = model.variable_value("dense_2_dense_kernel")?.clone();
    assert_ne!(trained.variable_value("dense_2_dense_kernel")?, &kernel);

    let res = model.load_weights(dir.path(), false);
    assert!(
        matches!(res, Err(GraphErr::MalformedCheckpoint { ref file, .. }) if file == "dense_3_dense_bias.txt")
    );
    assert_eq!(model.variable_value("dense_2_dense_kernel")?, &kernel);

    Ok(())
}
