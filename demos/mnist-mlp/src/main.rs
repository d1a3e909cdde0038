use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use feedforward::{
    dataset::{
        mnist::{Mnist, MnistKind},
        Batch, Dataset,
    },
    learn::{
        neural_network::{
            checkpoint::{load_checkpoint, save_checkpoint},
            optimizer::{Adam, Optimizer, SGD},
            Activation, Architecture, FitOptions, Network, NetworkTrainer,
        },
        Predict,
    },
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    cell::Cell,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and run a multilayer perceptron on MNIST.")]
struct Cli {
    /// The folder containing the idx files.
    #[arg(long, global = true)]
    data: Option<PathBuf>,
    /// Use FashionMNIST.
    #[arg(long, global = true)]
    fashion: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trains a network and saves a checkpoint.
    Train(TrainArgs),
    /// Evaluates a checkpoint on the test set.
    Evaluate {
        #[arg(long, default_value = "mnist-mlp.json")]
        checkpoint: PathBuf,
        #[arg(long, default_value_t = 1_000)]
        batch_size: usize,
    },
    /// Prints the top classes of a test image.
    Predict {
        #[arg(long, default_value = "mnist-mlp.json")]
        checkpoint: PathBuf,
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OptimizerKind {
    Adam,
    Sgd,
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Comma separated hidden layer widths.
    #[arg(long, value_delimiter = ',', default_values_t = [512, 256, 128])]
    hidden: Vec<usize>,
    #[arg(long, value_enum, default_value_t = ActivationArg::Relu)]
    activation: ActivationArg,
    #[arg(long, default_value_t = 0.5)]
    dropout: f32,
    #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
    optimizer: OptimizerKind,
    #[arg(long, default_value_t = 0.001)]
    learning_rate: f32,
    /// Only used by sgd.
    #[arg(long, default_value_t = 0.)]
    momentum: f32,
    /// Fit options as JSON, overridden by the flags below.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Report every n steps, 0 reports once per epoch.
    #[arg(long)]
    validation_interval: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = "mnist-mlp.json")]
    checkpoint: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ActivationArg {
    Relu,
    Sigmoid,
}

impl From<ActivationArg> for Activation {
    fn from(activation: ActivationArg) -> Self {
        match activation {
            ActivationArg::Relu => Self::Relu,
            ActivationArg::Sigmoid => Self::Sigmoid,
        }
    }
}

impl TrainArgs {
    fn fit_options(&self) -> Result<FitOptions> {
        let mut options = if let Some(path) = self.config.as_ref() {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Unable to read config {path:?}!"))?;
            serde_json::from_str(&json).with_context(|| format!("Invalid config {path:?}!"))?
        } else {
            FitOptions::default()
        };
        if let Some(epochs) = self.epochs {
            options = options.epochs(epochs);
        }
        if let Some(batch_size) = self.batch_size {
            options = options.train_batch_size(batch_size);
        }
        if let Some(interval) = self.validation_interval {
            options = options.validation_interval((interval > 0).then_some(interval));
        }
        if let Some(seed) = self.seed {
            options = options.seed(seed);
        }
        Ok(options)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let kind = if cli.fashion {
        MnistKind::Fashion
    } else {
        MnistKind::Digits
    };
    let mut builder = Mnist::builder().kind(kind);
    if let Some(path) = cli.data.as_deref() {
        builder = builder.path(path);
    }
    let mnist = builder.build()?;
    match cli.command {
        Command::Train(args) => train(&mnist, &args),
        Command::Evaluate {
            checkpoint,
            batch_size,
        } => {
            let network = load_checkpoint(&checkpoint)?;
            let trainer = NetworkTrainer::from_network(network);
            let stats = trainer.evaluate(mnist.test(), batch_size)?;
            println!("test: {stats}");
            Ok(())
        }
        Command::Predict {
            checkpoint,
            index,
            top_k,
        } => predict(&mnist, &checkpoint, index, top_k),
    }
}

fn train(mnist: &Mnist, args: &TrainArgs) -> Result<()> {
    let options = args.fit_options()?;
    let architecture = Architecture::builder()
        .input_size(28 * 28)
        .output_size(10)
        .hidden_layer_sizes(args.hidden.iter().copied())
        .activation(args.activation.into())
        .dropout(args.dropout)
        .build()?;
    tracing::info!("architecture: {:?}", architecture.widths());
    let network = Network::from_architecture(architecture)?;
    let trainer = NetworkTrainer::from_network(network);
    let network = match args.optimizer {
        OptimizerKind::Adam => fit(
            trainer.with_optimizer(Adam::builder().learning_rate(args.learning_rate).build()?),
            mnist,
            &options,
        )?,
        OptimizerKind::Sgd => fit(
            trainer.with_optimizer(
                SGD::builder()
                    .learning_rate(args.learning_rate)
                    .momentum(args.momentum)
                    .build()?,
            ),
            mnist,
            &options,
        )?,
    };
    save_checkpoint(&network, &args.checkpoint)
}

/// Advances a progress bar for each training batch, restarting it each epoch.
struct Progress<'a, A> {
    dataset: &'a A,
    bar: ProgressBar,
    epoch: Cell<usize>,
}

impl<A: Dataset> Dataset for Progress<'_, A> {
    fn len(&self) -> usize {
        self.dataset.len()
    }
    fn sample(&self, indices: &[usize]) -> Batch {
        if self.bar.length() == Some(self.bar.position()) {
            self.epoch.set(self.epoch.get() + 1);
            self.bar.reset();
            self.bar.set_prefix(format!("epoch {}", self.epoch.get()));
        }
        self.bar.inc(1);
        self.dataset.sample(indices)
    }
}

fn fit<O: Optimizer>(
    mut trainer: NetworkTrainer<O>,
    mnist: &Mnist,
    options: &FitOptions,
) -> Result<Network> {
    let batch_size = options.train_batch_size.max(1);
    let steps_per_epoch = (mnist.train().len() + batch_size - 1) / batch_size;
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{bar:40}] {pos:>7}/{len:7} [eta: {eta}]")?
        .progress_chars("=> ");
    let bar = ProgressBar::new(steps_per_epoch as u64)
        .with_style(style)
        .with_prefix("epoch 1");
    let train_set = Progress {
        dataset: mnist.train(),
        bar: bar.clone(),
        epoch: Cell::new(1),
    };
    // reports are logged by the trainer
    trainer.fit(&train_set, mnist.test(), options, |_| Ok(()))?;
    bar.finish_and_clear();
    Ok(trainer.into_network())
}

fn predict(mnist: &Mnist, checkpoint: &Path, index: usize, top_k: usize) -> Result<()> {
    let test = mnist.test();
    if index >= test.len() {
        bail!("index {index} is out of range, the test set has {} images!", test.len());
    }
    let network = load_checkpoint(checkpoint)?;
    let batch = test.sample(&[index]);
    let predicted = network.predict(&batch.inputs)?;
    println!("image {index}: class {} predicted {}", batch.classes[0], predicted[0]);
    for (class, probability) in network
        .top_k(&batch.inputs, top_k)?
        .into_iter()
        .flatten()
    {
        println!("    {class}: {:.2}%", probability * 100.);
    }
    Ok(())
}
