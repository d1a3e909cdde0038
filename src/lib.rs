/*!
# **feedforward**
Feed-forward classifiers trained with mini-batch gradient descent, plus checkpointing.

The crate composes a stack of dense layers into a [`Network`](learn::neural_network::Network)
that outputs log-probabilities, trains it with a [`NetworkTrainer`](learn::neural_network::NetworkTrainer),
and persists it as a [`Checkpoint`](learn::neural_network::checkpoint::Checkpoint).

# Example
```no_run
# use feedforward::{
#     result::Result,
#     dataset::{ArrayDataset, train_test_split},
#     learn::neural_network::{
#         checkpoint::{load_checkpoint, save_checkpoint},
#         optimizer::Adam,
#         Architecture, FitOptions, Network, NetworkTrainer,
#     },
# };
# fn main() -> Result<()> {
# let dataset: ArrayDataset = todo!();
let architecture = Architecture::builder()
    .input_size(784)
    .output_size(10)
    .hidden_layer_sizes([512, 256, 128])
    .dropout(0.5)
    .build()?;
let network = Network::from_architecture(architecture)?;
let (train_set, test_set) = train_test_split(&dataset, 1. / 7.);
let mut trainer = NetworkTrainer::from_network(network)
    .with_optimizer(Adam::builder().learning_rate(0.001).build()?);
trainer.fit(&train_set, &test_set, &FitOptions::default().epochs(2), |report| {
    println!("{report}");
    Ok(())
})?;
save_checkpoint(trainer.network(), "checkpoint.json")?;
let network = load_checkpoint("checkpoint.json")?;
# Ok(())
# }
```
*/
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(doc_cfg, feature(doc_cfg))]

/// Datasets.
pub mod dataset;
/// Errors.
pub mod error;
/// Machine learning.
pub mod learn;

/// Result.
pub mod result {
    /// [`anyhow::Result`].
    pub use anyhow::Result;
}
