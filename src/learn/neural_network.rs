/*!
# Example
A network with two hidden layers, trained for one epoch:
```no_run
# use feedforward::{
#     result::Result,
#     dataset::{ArrayDataset, train_test_split},
#     learn::neural_network::{Architecture, FitOptions, Network, NetworkTrainer},
# };
# fn main() -> Result<()> {
# let dataset: ArrayDataset = todo!();
let architecture = Architecture::builder()
    .input_size(784)
    .output_size(10)
    .hidden_layer_sizes([128, 64])
    .build()?;
let network = Network::from_architecture(architecture)?;
let (train_set, test_set) = train_test_split(&dataset, 0.1);
let mut trainer = NetworkTrainer::from_network(network);
let reports = trainer.fit(&train_set, &test_set, &FitOptions::default().epochs(1), |_| Ok(()))?;
# Ok(())
# }
```
*/
use crate::{
    dataset::{Batch, Dataset},
    error::ShapeError,
    learn::{
        criterion::{argmax, Accuracy, Criterion, NllLoss},
        Predict, Stats, Summarize, Summary, Test, Train,
    },
    result::Result,
};
use anyhow::{bail, ensure};
use ndarray::{Array, Array1, Array2, ArrayBase, ArrayD, Data, Dimension};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Parameters.
pub mod autograd;
use autograd::ParameterD;
/// Builders.
pub mod builders;
use builders::ArchitectureBuilder;
/// Checkpoints.
pub mod checkpoint;
/// Losses.
pub mod criterion;
use criterion::Loss;
/// Layers.
pub mod layer;
use layer::{Dense, Dropout, Layer, LogSoftmax, Relu, Sigmoid};
/// Optimizers.
pub mod optimizer;
use optimizer::{Optimizer, SGD};


/// The nonlinearity after each hidden layer.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// [`Relu`]
    #[default]
    Relu,
    /// [`Sigmoid`]
    Sigmoid,
}

/// The description of a [`Network`].
///
/// Built with [`Architecture::builder()`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    input_size: usize,
    output_size: usize,
    hidden_layer_sizes: Vec<usize>,
    activation: Activation,
    dropout: f32,
}

impl Architecture {
    /// Returns a builder for creating an [`Architecture`].
    pub fn builder() -> ArchitectureBuilder {
        ArchitectureBuilder::default()
    }
    /// The number of input features.
    pub fn input_size(&self) -> usize {
        self.input_size
    }
    /// The number of classes.
    pub fn output_size(&self) -> usize {
        self.output_size
    }
    /// The output widths of the hidden layers.
    pub fn hidden_layer_sizes(&self) -> &[usize] {
        &self.hidden_layer_sizes
    }
    /// The activation.
    pub fn activation(&self) -> Activation {
        self.activation
    }
    /// The dropout probability.
    pub fn dropout(&self) -> f32 {
        self.dropout
    }
    /// `[input_size, h1, .., hn, output_size]`.
    pub fn widths(&self) -> Vec<usize> {
        std::iter::once(self.input_size)
            .chain(self.hidden_layer_sizes.iter().copied())
            .chain(std::iter::once(self.output_size))
            .collect()
    }
    /// The name and shape of each parameter of a [`Network`] built from this architecture, in order.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let widths = self.widths();
        let mut shapes = Vec::with_capacity(2 * (widths.len() - 1));
        for (i, pair) in widths.windows(2).enumerate() {
            let (inputs, outputs) = (pair[0], pair[1]);
            let name = dense_name(i, widths.len() - 2);
            shapes.push((format!("{name}.weight"), vec![outputs, inputs]));
            shapes.push((format!("{name}.bias"), vec![outputs]));
        }
        shapes
    }
}

fn dense_name(index: usize, hidden_layers: usize) -> String {
    if index < hidden_layers {
        format!("hidden_layers.{index}")
    } else {
        "output".to_string()
    }
}

/// A feed-forward classifier.
///
/// For hidden widths `[h1, .., hn]` the layers are
/// ```text
/// Dense(input_size -> h1), activation, Dropout,
/// ..
/// Dense(h(n-1) -> hn), activation, Dropout,
/// Dense(hn -> output_size), LogSoftmax
/// ```
/// Dropout is omitted when the probability is 0. The output is log-probabilities over the classes.
///
/// # Modes
/// A network starts in training mode. [`.forward()`](Network::forward()) in training mode applies
/// dropout and caches for [`.backward()`](Network::backward()). Use [`.eval()`](Network::eval()) or
/// [`.infer()`](Network::infer()) for evaluation.
#[derive(Debug)]
pub struct Network {
    architecture: Architecture,
    layers: Vec<(String, Box<dyn Layer>)>,
    training: bool,
}

impl Network {
    /// Creates a network from `architecture`, initialized from entropy.
    ///
    /// **Errors**
    ///
    /// See [`.from_architecture_with_rng()`](Network::from_architecture_with_rng()).
    pub fn from_architecture(architecture: Architecture) -> Result<Self> {
        Self::from_architecture_with_rng(architecture, &mut StdRng::from_entropy())
    }
    /// Creates a network from `architecture`.
    ///
    /// Weights and dropout masks are derived from `rng`.
    ///
    /// **Errors**
    ///
    /// The architecture is invalid (it is validated by [`ArchitectureBuilder::build()`]).
    pub fn from_architecture_with_rng<R: Rng + ?Sized>(
        architecture: Architecture,
        rng: &mut R,
    ) -> Result<Self> {
        let widths = architecture.widths();
        ensure!(
            widths.iter().all(|width| *width > 0),
            "Architecture widths must be positive, found {widths:?}!"
        );
        let hidden_layers = architecture.hidden_layer_sizes.len();
        let mut layers: Vec<(String, Box<dyn Layer>)> = Vec::with_capacity(3 * hidden_layers + 2);
        for (i, pair) in widths.windows(2).enumerate() {
            let name = dense_name(i, hidden_layers);
            let dense = Dense::from_inputs_outputs_with_rng(pair[0], pair[1], rng)?;
            layers.push((name.clone(), Box::new(dense)));
            if i < hidden_layers {
                let activation: Box<dyn Layer> = match architecture.activation {
                    Activation::Relu => Box::<Relu>::default(),
                    Activation::Sigmoid => Box::<Sigmoid>::default(),
                };
                layers.push((format!("{name}.activation"), activation));
                if architecture.dropout > 0. {
                    let dropout = Dropout::with_rng(architecture.dropout, rng)?;
                    layers.push((format!("{name}.dropout"), Box::new(dropout)));
                }
            } else {
                layers.push((format!("{name}.log_softmax"), Box::<LogSoftmax>::default()));
            }
        }
        Ok(Self {
            architecture,
            layers,
            training: true,
        })
    }
    /// The architecture.
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }
    /// The names of the layers, in order.
    pub fn layer_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.layers.iter().map(|(name, _)| name.as_str())
    }
    /// `(inputs, outputs)` of each dense layer, in order, read from the weights.
    pub fn dense_dims(&self) -> Vec<(usize, usize)> {
        self.parameters()
            .into_iter()
            .filter(|(name, _)| name.ends_with(".weight"))
            .map(|(_, weight)| (weight.shape()[1], weight.shape()[0]))
            .collect()
    }
    /// Switches to training mode.
    pub fn train(&mut self) {
        self.training = true;
    }
    /// Switches to evaluation mode, disabling dropout.
    pub fn eval(&mut self) {
        self.training = false;
    }
    /// Whether in training mode.
    pub fn is_training(&self) -> bool {
        self.training
    }
    fn flatten<S, D>(&self, input: &ArrayBase<S, D>) -> Result<Array2<f32>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let input_size = self.architecture.input_size;
        let Some((batch_size, rest)) = input.shape().split_first() else {
            bail!("Network input must have a batch axis!");
        };
        let features: usize = rest.iter().product();
        if rest.is_empty() || features != input_size {
            let name = self.layers.first().map_or("input", |(name, _)| name.as_str());
            return Err(ShapeError::new(name, &[*batch_size, input_size], input.shape()).into());
        }
        Ok(Array::from_shape_vec(
            [*batch_size, features],
            input.iter().copied().collect(),
        )?)
    }
    /// Computes the forward pass.
    ///
    /// `input` has shape `[batch_size, ..]` and is flattened to `[batch_size, input_size]`. In training
    /// mode, caches for [`.backward()`](Network::backward()).
    ///
    /// Returns log-probabilities with shape `[batch_size, output_size]`.
    ///
    /// **Errors**
    ///
    /// The input has the wrong shape, see [`ShapeError`].
    pub fn forward<S, D>(&mut self, input: &ArrayBase<S, D>) -> Result<Array2<f32>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        if !self.training {
            return self.infer(input);
        }
        let mut x = self.flatten(input)?;
        for (_, layer) in self.layers.iter_mut() {
            x = layer.forward_train(x)?;
        }
        Ok(x)
    }
    /// Computes the forward pass in evaluation mode, without caching.
    ///
    /// **Errors**
    ///
    /// See [`.forward()`](Network::forward()).
    pub fn infer<S, D>(&self, input: &ArrayBase<S, D>) -> Result<Array2<f32>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let mut x = self.flatten(input)?;
        for (_, layer) in self.layers.iter() {
            x = layer.forward(x.view())?;
        }
        Ok(x)
    }
    /// Computes the backward pass, accumulating the gradients of the parameters.
    ///
    /// `output_grad` is the gradient of the loss with respect to the output of the last training
    /// [`.forward()`](Network::forward()). Returns the gradient with respect to the flattened input.
    ///
    /// **Errors**
    /// - There was no prior forward pass in training mode.
    /// - `output_grad` does not have the shape of the output.
    pub fn backward(&mut self, output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let mut dy = output_grad;
        for (_, layer) in self.layers.iter_mut().rev() {
            dy = layer.backward(dy)?;
        }
        Ok(dy)
    }
    /// Resets the gradients of all parameters.
    pub fn zero_grad(&mut self) {
        for (_, parameter) in self.parameters_mut() {
            parameter.zero_grad();
        }
    }
    /// The parameters, ie "hidden_layers.0.weight", in order.
    pub fn parameters(&self) -> Vec<(String, &ParameterD)> {
        self.layers
            .iter()
            .flat_map(|(layer_name, layer)| {
                layer
                    .parameters()
                    .into_iter()
                    .map(move |(name, parameter)| (format!("{layer_name}.{name}"), parameter))
            })
            .collect()
    }
    /// Mutable references to the parameters, in order.
    pub fn parameters_mut(&mut self) -> Vec<(String, &mut ParameterD)> {
        self.layers
            .iter_mut()
            .flat_map(|(layer_name, layer)| {
                let layer_name = layer_name.as_str();
                layer
                    .parameters_mut()
                    .into_iter()
                    .map(move |(name, parameter)| (format!("{layer_name}.{name}"), parameter))
            })
            .collect()
    }
    /// Updates the parameters with `optimizer`.
    ///
    /// Call after one or more backward passes.
    pub fn update<O: Optimizer>(&mut self, optimizer: &mut O) -> Result<()> {
        optimizer.update(&mut self.parameters_mut())
    }
    /// Copies the parameter values, keyed by name.
    pub fn state_dict(&self) -> BTreeMap<String, ArrayD<f32>> {
        self.parameters()
            .into_iter()
            .map(|(name, parameter)| (name, parameter.value().to_owned()))
            .collect()
    }
    /// Assigns the parameter values by name.
    ///
    /// The names must match exactly, and each value must have the shape of the parameter. Nothing
    /// is assigned on error.
    ///
    /// **Errors**
    ///
    /// See [`CheckpointError`](crate::error::CheckpointError).
    pub fn load_state_dict(&mut self, state_dict: &BTreeMap<String, ArrayD<f32>>) -> Result<()> {
        let shapes: Vec<(String, Vec<usize>)> = self
            .parameters()
            .into_iter()
            .map(|(name, parameter)| (name, parameter.shape().to_vec()))
            .collect();
        checkpoint::check_parameter_values(&shapes, state_dict)?;
        for (name, parameter) in self.parameters_mut() {
            if let Some(value) = state_dict.get(&name) {
                parameter.assign(value)?;
            }
        }
        Ok(())
    }
    /// The probability of each class, `exp(log_probs)`.
    ///
    /// **Errors**
    ///
    /// See [`.infer()`](Network::infer()).
    pub fn predict_proba<S, D>(&self, input: &ArrayBase<S, D>) -> Result<Array2<f32>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        Ok(self.infer(input)?.mapv(f32::exp))
    }
    /// The `k` most probable classes of each sample with their probabilities, most probable first.
    ///
    /// **Errors**
    ///
    /// See [`.infer()`](Network::infer()).
    pub fn top_k<S, D>(&self, input: &ArrayBase<S, D>, k: usize) -> Result<Vec<Vec<(usize, f32)>>>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let probs = self.predict_proba(input)?;
        Ok(probs
            .outer_iter()
            .map(|probs| {
                let mut classes: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
                classes.sort_by(|a, b| b.1.total_cmp(&a.1));
                classes.truncate(k);
                classes
            })
            .collect())
    }
}

impl<S: Data<Elem = f32>, D: Dimension> Predict<&ArrayBase<S, D>> for Network {
    fn predict(&self, input: &ArrayBase<S, D>) -> Result<Array1<usize>> {
        let output = self.infer(input)?;
        Ok(output.outer_iter().map(argmax).collect())
    }
}

/// Options for [`NetworkTrainer::fit()`].
///
/// Setters can be chained, ie `FitOptions::default().epochs(10).seed(0)`. Missing fields take their
/// defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// The number of passes over the training set. Default is 5.
    pub epochs: usize,
    /// Default is 64.
    pub train_batch_size: usize,
    /// Default is 64.
    pub test_batch_size: usize,
    /// Report every `validation_interval` steps, counted over all epochs. If `None`, report at the
    /// end of each epoch. Default is 40.
    pub validation_interval: Option<usize>,
    /// Whether to reshuffle the training set each epoch. Default is true.
    pub shuffle: bool,
    /// Reseeds the trainer's shuffling when set.
    pub seed: Option<u64>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 5,
            train_batch_size: 64,
            test_batch_size: 64,
            validation_interval: Some(40),
            shuffle: true,
            seed: None,
        }
    }
}

impl FitOptions {
    /// Sets `epochs`.
    pub fn epochs(self, epochs: usize) -> Self {
        Self { epochs, ..self }
    }
    /// Sets `train_batch_size`.
    pub fn train_batch_size(self, train_batch_size: usize) -> Self {
        Self {
            train_batch_size,
            ..self
        }
    }
    /// Sets `test_batch_size`.
    pub fn test_batch_size(self, test_batch_size: usize) -> Self {
        Self {
            test_batch_size,
            ..self
        }
    }
    /// Sets `validation_interval`.
    pub fn validation_interval(self, validation_interval: Option<usize>) -> Self {
        Self {
            validation_interval,
            ..self
        }
    }
    /// Sets `shuffle`.
    pub fn shuffle(self, shuffle: bool) -> Self {
        Self { shuffle, ..self }
    }
    /// Sets `seed`.
    pub fn seed(self, seed: impl Into<Option<u64>>) -> Self {
        Self {
            seed: seed.into(),
            ..self
        }
    }
    fn validate(&self) -> Result<()> {
        ensure!(self.train_batch_size > 0, "train_batch_size must be positive!");
        ensure!(self.test_batch_size > 0, "test_batch_size must be positive!");
        ensure!(
            self.validation_interval != Some(0),
            "validation_interval must be positive!"
        );
        Ok(())
    }
}

/// Progress reported by [`NetworkTrainer::fit()`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// The current epoch, starting at 1.
    pub epoch: usize,
    /// The total number of epochs.
    pub epochs: usize,
    /// The number of training steps so far.
    pub step: usize,
    /// The mean training loss of the steps since the previous report.
    pub train_loss: f32,
    /// Validation loss and accuracy.
    pub validation: Stats,
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "epoch: {}/{} step: {} train loss: {:.5}",
            self.epoch, self.epochs, self.step, self.train_loss
        )?;
        if let Some(loss) = self.validation.loss() {
            write!(f, " validation loss: {loss:.5}")?;
        }
        if let Some(accuracy) = self.validation.accuracy() {
            write!(f, " validation accuracy: {:.2}%", accuracy * 100.)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FitState {
    step: usize,
    loss_sum: f32,
    loss_steps: usize,
    reports: Vec<Report>,
}

/// Trains a [`Network`].
///
/// Each step is
/// ```text
/// zero_grad -> forward -> loss -> backward -> update
/// ```
/// with the optimizer `O` and the loss `L`.
#[derive(Debug)]
pub struct NetworkTrainer<O = SGD, L = NllLoss> {
    network: Network,
    optimizer: O,
    loss: L,
    rng: StdRng,
    summary: Summary,
}

impl NetworkTrainer {
    /// Creates a trainer with [`SGD`] and [`NllLoss`].
    pub fn from_network(network: Network) -> Self {
        Self {
            network,
            optimizer: SGD::default(),
            loss: NllLoss,
            rng: StdRng::from_entropy(),
            summary: Summary::default(),
        }
    }
}

impl<O, L> NetworkTrainer<O, L> {
    /// Replaces the optimizer.
    pub fn with_optimizer<O2>(self, optimizer: O2) -> NetworkTrainer<O2, L> {
        NetworkTrainer {
            network: self.network,
            optimizer,
            loss: self.loss,
            rng: self.rng,
            summary: self.summary,
        }
    }
    /// Replaces the loss.
    pub fn with_loss<L2>(self, loss: L2) -> NetworkTrainer<O, L2> {
        NetworkTrainer {
            network: self.network,
            optimizer: self.optimizer,
            loss,
            rng: self.rng,
            summary: self.summary,
        }
    }
    /// Seeds the generator used to shuffle the training set.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..self
        }
    }
    /// The network.
    pub fn network(&self) -> &Network {
        &self.network
    }
    /// Mutable reference to the network.
    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }
    /// Returns the network.
    pub fn into_network(self) -> Network {
        self.network
    }
    /// The optimizer.
    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }
}

impl<O: Optimizer, L: Loss> NetworkTrainer<O, L> {
    /// Performs one training step on `batch`.
    ///
    /// Switches the network to training mode. Returns the loss before the update.
    ///
    /// **Errors**
    ///
    /// The forward pass, loss, backward pass or update failed. The parameters may have been
    /// partially updated.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f32> {
        self.network.train();
        self.network.zero_grad();
        let output = self.network.forward(&batch.inputs)?;
        let (loss, output_grad) = self
            .loss
            .loss_backward(output.view(), batch.classes.view())?;
        self.network.backward(output_grad)?;
        self.network.update(&mut self.optimizer)?;
        Ok(loss)
    }
    /// Evaluates the network on `dataset` in evaluation mode.
    ///
    /// **Errors**
    ///
    /// See [`Test::test()`].
    pub fn evaluate<A: Dataset>(&self, dataset: &A, batch_size: usize) -> Result<Stats> {
        ensure!(batch_size > 0, "batch_size must be positive!");
        self.test(dataset.batches(batch_size))
    }
    /// Trains the network.
    ///
    /// For each epoch, iterates over the (reshuffled) training set. Every `validation_interval` steps,
    /// or at the end of each epoch if `None`, evaluates on `validation_set` and emits a [`Report`] to
    /// `on_report`. Returns all of the reports.
    ///
    /// **Errors**
    ///
    /// Invalid options, or any step, evaluation or `on_report` failed. Training stops at the first
    /// error.
    pub fn fit<A1, A2, F>(
        &mut self,
        train_set: &A1,
        validation_set: &A2,
        options: &FitOptions,
        mut on_report: F,
    ) -> Result<Vec<Report>>
    where
        A1: Dataset,
        A2: Dataset,
        F: FnMut(&Report) -> Result<()>,
    {
        options.validate()?;
        if let Some(seed) = options.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        tracing::debug!(
            "fit: {} train samples, {} validation samples, {options:?}",
            train_set.len(),
            validation_set.len(),
        );
        let mut state = FitState::default();
        for epoch in 1..=options.epochs {
            let mut batches = Some(if options.shuffle {
                train_set.shuffled_batches(options.train_batch_size, &mut self.rng)
            } else {
                train_set.batches(options.train_batch_size)
            });
            let mut summary = std::mem::take(&mut self.summary);
            let result = summary.run_epoch(|_| {
                let mut train = Stats::default();
                let mut test = Stats::default();
                for batch in batches.take().into_iter().flatten() {
                    let loss = self.train_step(&batch)?;
                    train = train.merge(Stats::new(batch.len(), Some(loss), None));
                    state.step += 1;
                    state.loss_sum += loss;
                    state.loss_steps += 1;
                    if let Some(interval) = options.validation_interval {
                        if state.step % interval == 0 {
                            test = self.report(
                                epoch,
                                validation_set,
                                options,
                                &mut state,
                                &mut on_report,
                            )?;
                        }
                    }
                }
                if options.validation_interval.is_none() {
                    test =
                        self.report(epoch, validation_set, options, &mut state, &mut on_report)?;
                }
                Ok((train, test))
            });
            self.summary = summary;
            result?;
            tracing::debug!("{}", self.summary);
        }
        self.network.eval();
        Ok(state.reports)
    }
    fn report<A: Dataset, F: FnMut(&Report) -> Result<()>>(
        &mut self,
        epoch: usize,
        validation_set: &A,
        options: &FitOptions,
        state: &mut FitState,
        on_report: &mut F,
    ) -> Result<Stats> {
        self.network.eval();
        let validation = self.evaluate(validation_set, options.test_batch_size);
        self.network.train();
        let validation = validation?;
        let train_loss = if state.loss_steps > 0 {
            state.loss_sum / state.loss_steps as f32
        } else {
            0.
        };
        let report = Report {
            epoch,
            epochs: options.epochs,
            step: state.step,
            train_loss,
            validation,
        };
        tracing::info!("{report}");
        on_report(&report)?;
        state.reports.push(report);
        state.loss_sum = 0.;
        state.loss_steps = 0;
        Ok(validation)
    }
}

impl<O: Optimizer, L: Loss> Train<Batch> for NetworkTrainer<O, L> {
    fn train_test<I1, I2>(&mut self, train_iter: I1, test_iter: I2) -> Result<(Stats, Stats)>
    where
        I1: IntoIterator<Item = Batch>,
        I2: IntoIterator<Item = Batch>,
    {
        let mut summary = std::mem::take(&mut self.summary);
        let mut train_iter = Some(train_iter);
        let mut test_iter = Some(test_iter);
        let result = summary.run_epoch(|_| {
            let mut train = Stats::default();
            for batch in train_iter.take().into_iter().flatten() {
                let loss = self.train_step(&batch)?;
                train = train.merge(Stats::new(batch.len(), Some(loss), None));
            }
            self.network.eval();
            let test = self.test(test_iter.take().into_iter().flatten());
            self.network.train();
            Ok((train, test?))
        });
        self.summary = summary;
        result
    }
}

impl<O, L> Test<Batch> for NetworkTrainer<O, L> {
    fn test<I>(&self, test_iter: I) -> Result<Stats>
    where
        I: IntoIterator<Item = Batch>,
    {
        let mut stats = Stats::default();
        for batch in test_iter {
            let output = self.network.infer(&batch.inputs)?;
            let loss = NllLoss.eval(output.view(), batch.classes.view())?;
            let correct = Accuracy.eval(output.view(), batch.classes.view())?;
            stats = stats.merge(Stats::new(batch.len(), Some(loss), Some(correct)));
        }
        Ok(stats)
    }
}

impl<O, L> Summarize for NetworkTrainer<O, L> {
    fn summarize(&self) -> Summary {
        self.summary.clone()
    }
}
