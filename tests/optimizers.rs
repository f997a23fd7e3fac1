mod common;

use layer_graph::{
    backend::GradientClipping,
    graph::Gradients,
    initializers::Initializer,
    optimizer::{
        update, AdaDelta, AdaGrad, AdaGradDa, Adam, Adamax, Ftrl, Momentum, Optimizer, RmsProp,
        Sgd,
    },
    FitOptions, OptimizerSpec, VariableRegistry, VariableScope,
};
use ndarray::ArrayD;
use rand::{rngs::StdRng, SeedableRng};

use common::{compiled, init_logger, xor};

fn twin_registry() -> (VariableRegistry, Vec<String>) {
    let mut registry = VariableRegistry::new();
    registry.register_layer("dense_1", true);
    let a = registry
        .add_layer_variable("dense_1", "dense_kernel", vec![3], Initializer::Ones)
        .unwrap();
    let b = registry
        .add_layer_variable("dense_1", "dense_bias", vec![3], Initializer::Ones)
        .unwrap();
    (registry, vec![a, b])
}

#[test]
fn slots_of_same_shaped_variables_are_isolated() -> anyhow::Result<()> {
    init_logger();
    let (mut registry, vars) = twin_registry();
    let mut optimizer = Momentum::new(0.1, 0.9, false)?;
    let ops = optimizer.compile(&mut registry, &vars)?;

    let mut rng = StdRng::seed_from_u64(0);
    registry.initialize(VariableScope::LayerVariables, &mut rng, false)?;
    registry.initialize(VariableScope::OptimizerVariables, &mut rng, false)?;

    let slot_a = optimizer.slots().get_slot(&vars[0], "momentum")?.to_string();
    let slot_b = optimizer.slots().get_slot(&vars[1], "momentum")?.to_string();
    assert_ne!(slot_a, slot_b);

    let mut gradients = Gradients::new();
    gradients.insert(vars[0].clone(), ArrayD::from_elem(vec![3], 1.));
    gradients.insert(vars[1].clone(), ArrayD::zeros(vec![3]));
    update::run(&ops, &mut registry, &gradients)?;

    assert!(registry.value(&slot_a)?.iter().all(|&x| x != 0.));
    assert!(registry.value(&slot_b)?.iter().all(|&x| x == 0.));
    assert!(registry.value(&vars[1])?.iter().all(|&x| x == 1.));

    Ok(())
}

#[test]
fn every_optimizer_trains() -> anyhow::Result<()> {
    init_logger();
    let optimizers: Vec<Box<dyn Fn() -> Box<dyn Optimizer>>> = vec![
        Box::new(|| Box::new(Sgd::default())),
        Box::new(|| Box::new(Momentum::default())),
        Box::new(|| Box::new(RmsProp::default())),
        Box::new(|| Box::new(Adam::default())),
        Box::new(|| Box::new(Adamax::default())),
        Box::new(|| Box::new(AdaGrad::default())),
        Box::new(|| Box::new(AdaGradDa::default())),
        Box::new(|| Box::new(AdaDelta::default())),
        Box::new(|| Box::new(Ftrl::default())),
    ];

    for make in optimizers {
        let mut model = common::classifier();
        let optimizer = make();
        let name = optimizer.name();
        model.compile_boxed(
            optimizer,
            layer_graph::backend::Losses::MeanSquaredError,
            &[],
            Default::default(),
        )?;
        model.init()?;

        let kernel = model.variable_value("dense_3_dense_kernel")?.clone();
        let history = model.fit(&xor(), FitOptions::new(2, 2))?;

        assert!(
            history.batches().iter().all(|b| b.loss.is_finite()),
            "{name} produced a non finite loss"
        );
        assert_ne!(
            model.variable_value("dense_3_dense_kernel")?,
            &kernel,
            "{name} did not update the weights"
        );
    }

    Ok(())
}

#[test]
fn adam_beta_powers_decay_per_step() -> anyhow::Result<()> {
    init_logger();
    let mut model = compiled(Adam::default());
    model.fit(&xor(), FitOptions::new(1, 1))?;

    let beta1_power = model.variable_value("optimizer_beta1_power")?;
    let expected = 0.9f32.powi(5);
    assert!((beta1_power.sum() - expected).abs() < 1e-6);

    Ok(())
}

#[test]
fn adagrad_da_counts_steps() -> anyhow::Result<()> {
    init_logger();
    let mut model = compiled(AdaGradDa::default());
    model.fit(&xor(), FitOptions::new(2, 2))?;

    let step = model.variable_value("optimizer_adagrad-da-global-step")?;
    assert_eq!(step.sum(), 4.);

    Ok(())
}

#[test]
fn clipping_survives_spec_round_trip() -> anyhow::Result<()> {
    let sgd = Sgd::new(0.1)?.with_clipping(GradientClipping::ClipByValue { min: -1., max: 1. });
    let spec = sgd.spec();
    let rebuilt = spec.build()?;

    assert_eq!(rebuilt.clipping(), GradientClipping::ClipByValue { min: -1., max: 1. });
    assert!(matches!(spec, OptimizerSpec::Sgd { .. }));

    Ok(())
}

#[test]
fn invalid_hyperparameters() {
    assert!(Sgd::new(-0.1).is_err());
    assert!(Adam::new(0.001, 1.5, 0.999, 1e-7).is_err());
    assert!(Ftrl::new(0.001, -1., 0., -0.5, 0., 0.).is_err());
}

#[test]
fn adagrad_accumulators_start_positive() -> anyhow::Result<()> {
    init_logger();
    assert!(AdaGrad::new(0.1, 0.).is_err());
    assert!(AdaGradDa::new(0.1, 0., 0., 0.).is_err());

    // a zero gradient before anything was accumulated
    let optimizers: Vec<Box<dyn Optimizer>> = vec![
        Box::new(AdaGrad::new(0.1, 1e-3)?),
        Box::new(AdaGradDa::new(0.1, 1e-3, 0., 0.)?),
    ];
    for mut optimizer in optimizers {
        let (mut registry, vars) = twin_registry();
        let ops = optimizer.compile(&mut registry, &vars)?;

        let mut rng = StdRng::seed_from_u64(0);
        registry.initialize(VariableScope::LayerVariables, &mut rng, false)?;
        registry.initialize(VariableScope::OptimizerVariables, &mut rng, false)?;

        let gradients: Gradients = vars
            .iter()
            .map(|var| (var.clone(), ArrayD::zeros(vec![3])))
            .collect();
        update::run(&ops, &mut registry, &gradients)?;

        for var in &vars {
            assert!(registry.value(var)?.iter().all(|x| x.is_finite()));
        }
    }

    Ok(())
}
