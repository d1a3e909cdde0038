use anyhow::{ensure, Result};
use feedforward::{
    dataset::{ArrayDataset, Batch, Dataset},
    error::CheckpointError,
    learn::{
        criterion::{Criterion, NllLoss},
        neural_network::{
            checkpoint::{load_checkpoint, save_checkpoint, Checkpoint},
            optimizer::SGD,
            Architecture, FitOptions, Network, NetworkTrainer,
        },
    },
};
use libtest_mimic::{Arguments, Trial};
use ndarray::{Array, Array1};
use rand::{distributions::Uniform, rngs::StdRng, Rng, SeedableRng};

fn main() {
    let args = Arguments::from_args();
    let tests = vec![
        trial("checkpoint_round_trip", checkpoint_round_trip),
        trial("layer_widths_match_architecture", layer_widths_match_architecture),
        trial("hidden_width_drift_fails", hidden_width_drift_fails),
        trial("missing_file_fails", missing_file_fails),
        trial("missing_field_fails", missing_field_fails),
        trial("seeded_runs_are_identical", seeded_runs_are_identical),
        trial("sgd_step_does_not_increase_loss", sgd_step_does_not_increase_loss),
    ];
    libtest_mimic::run(&args, tests).exit()
}

fn trial(name: &str, f: fn() -> Result<()>) -> Trial {
    Trial::test(name, move || Ok(f()?))
}

fn mnist_architecture(hidden_layer_sizes: &[usize], dropout: f32) -> Result<Architecture> {
    Architecture::builder()
        .input_size(784)
        .output_size(10)
        .hidden_layer_sizes(hidden_layer_sizes.iter().copied())
        .dropout(dropout)
        .build()
}

fn random_dataset(len: usize, seed: u64) -> Result<ArrayDataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels = Uniform::new(0f32, 1.);
    let inputs = Array::from_shape_simple_fn([len, 1, 28, 28], || rng.sample(pixels));
    let classes: Array1<usize> = (0..len).map(|_| rng.gen_range(0..10)).collect();
    ArrayDataset::new(inputs, classes)
}

fn checkpoint_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("checkpoint.json");
    let architecture = mnist_architecture(&[128, 64], 0.2)?;
    let mut network =
        Network::from_architecture_with_rng(architecture, &mut StdRng::seed_from_u64(0))?;
    let mut trainer = NetworkTrainer::from_network(network).with_seed(1);
    let dataset = random_dataset(64, 2)?;
    trainer.train_step(&dataset.sample(&(0..64).collect::<Vec<_>>()))?;
    network = trainer.into_network();
    save_checkpoint(&network, &path)?;
    let loaded = load_checkpoint(&path)?;
    ensure!(loaded.architecture() == network.architecture());
    ensure!(loaded.state_dict() == network.state_dict());
    ensure!(!loaded.is_training());
    network.eval();
    let x = dataset.inputs();
    ensure!(loaded.infer(&x)? == network.infer(&x)?);
    Ok(())
}

fn layer_widths_match_architecture() -> Result<()> {
    let cases: [&[usize]; 4] = [&[], &[10], &[512, 256, 128], &[3, 1, 7, 2]];
    for hidden_layer_sizes in cases {
        let architecture = Architecture::builder()
            .input_size(20)
            .output_size(4)
            .hidden_layer_sizes(hidden_layer_sizes.iter().copied())
            .build()?;
        let widths = architecture.widths();
        let network = Network::from_architecture(architecture)?;
        let expected: Vec<(usize, usize)> = widths.windows(2).map(|w| (w[0], w[1])).collect();
        ensure!(
            network.dense_dims() == expected,
            "{:?} != {expected:?}",
            network.dense_dims()
        );
        ensure!(network.parameters().len() == 2 * expected.len());
    }
    Ok(())
}

fn hidden_width_drift_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("checkpoint.json");
    let network = Network::from_architecture(mnist_architecture(&[128, 64], 0.)?)?;
    save_checkpoint(&network, &path)?;
    let mut value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    value["hidden_layer_sizes"] = serde_json::json!([128, 32]);
    std::fs::write(&path, serde_json::to_string(&value)?)?;
    let error = match load_checkpoint(&path) {
        Ok(_) => anyhow::bail!("Loaded a checkpoint with different hidden widths!"),
        Err(error) => error,
    };
    ensure!(
        error.downcast_ref::<CheckpointError>()
            == Some(&CheckpointError::ShapeMismatch {
                name: "hidden_layers.1.weight".into(),
                expected: vec![32, 128],
                found: vec![64, 128],
            }),
        "{error:?}"
    );
    let other = mnist_architecture(&[128, 32], 0.)?;
    ensure!(Checkpoint::new(&network, &other).is_err());
    Ok(())
}

fn missing_file_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("missing.json");
    let error = match load_checkpoint(&path) {
        Ok(_) => anyhow::bail!("Loaded a missing checkpoint!"),
        Err(error) => error,
    };
    ensure!(error.to_string().contains("missing.json"), "{error}");
    let io_error = error
        .root_cause()
        .downcast_ref::<std::io::Error>()
        .map(std::io::Error::kind);
    ensure!(io_error == Some(std::io::ErrorKind::NotFound), "{error:?}");
    Ok(())
}

fn missing_field_fails() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("checkpoint.json");
    let network = Network::from_architecture(mnist_architecture(&[16], 0.)?)?;
    let mut value = serde_json::to_value(Checkpoint::from_network(&network))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("output_size");
    }
    std::fs::write(&path, serde_json::to_string(&value)?)?;
    let error = match Checkpoint::load(&path) {
        Ok(_) => anyhow::bail!("Loaded a checkpoint without output_size!"),
        Err(error) => error,
    };
    ensure!(format!("{error:#}").contains("output_size"), "{error:#}");
    Ok(())
}

fn seeded_runs_are_identical() -> Result<()> {
    let train_set = random_dataset(96, 3)?;
    let validation_set = random_dataset(32, 4)?;
    let options = FitOptions::default()
        .epochs(2)
        .train_batch_size(16)
        .validation_interval(Some(4))
        .seed(5);
    let run = || -> Result<_> {
        let architecture = mnist_architecture(&[32, 16], 0.5)?;
        let network =
            Network::from_architecture_with_rng(architecture, &mut StdRng::seed_from_u64(6))?;
        let mut trainer = NetworkTrainer::from_network(network)
            .with_optimizer(SGD::builder().learning_rate(0.05).momentum(0.9).build()?);
        let reports = trainer.fit(&train_set, &validation_set, &options, |_| Ok(()))?;
        Ok((reports, trainer.into_network().state_dict()))
    };
    let (a, b) = (run()?, run()?);
    ensure!(a.0.len() == 3);
    ensure!(a == b);
    Ok(())
}

fn sgd_step_does_not_increase_loss() -> Result<()> {
    let architecture = mnist_architecture(&[128, 64], 0.)?;
    let network =
        Network::from_architecture_with_rng(architecture, &mut StdRng::seed_from_u64(7))?;
    let mut trainer = NetworkTrainer::from_network(network)
        .with_optimizer(SGD::builder().learning_rate(0.01).build()?);
    let dataset = random_dataset(64, 8)?;
    let Batch { inputs, classes } = dataset.sample(&(0..64).collect::<Vec<_>>());
    let batch = Batch::new(inputs, classes)?;
    let before = trainer.train_step(&batch)?;
    let output = trainer.network().infer(&batch.inputs)?;
    let after = NllLoss.eval(output.view(), batch.classes.view())?;
    ensure!(after <= before, "loss increased from {before} to {after}");
    Ok(())
}
