use super::{Activation, Architecture, Network};
use crate::{error::CheckpointError, result::Result};
use anyhow::{ensure, Context};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// A persisted [`Network`].
///
/// Stores the [`Architecture`] fields and the value of each parameter by name. Every field is
/// required, and unknown fields are rejected.
///
/// Files are JSON. Values are written with enough precision to restore each `f32` exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Checkpoint {
    input_size: usize,
    output_size: usize,
    hidden_layer_sizes: Vec<usize>,
    activation: Activation,
    dropout: f32,
    parameter_values: BTreeMap<String, ArrayD<f32>>,
}

pub(super) fn check_parameter_values(
    shapes: &[(String, Vec<usize>)],
    values: &BTreeMap<String, ArrayD<f32>>,
) -> Result<(), CheckpointError> {
    for (name, shape) in shapes {
        let Some(value) = values.get(name) else {
            return Err(CheckpointError::MissingParameter { name: name.clone() });
        };
        if value.shape() != shape.as_slice() {
            return Err(CheckpointError::ShapeMismatch {
                name: name.clone(),
                expected: shape.clone(),
                found: value.shape().to_vec(),
            });
        }
    }
    if let Some(name) = values
        .keys()
        .find(|key| !shapes.iter().any(|(name, _)| name == *key))
    {
        return Err(CheckpointError::UnexpectedParameter { name: name.clone() });
    }
    Ok(())
}

impl Checkpoint {
    /// Captures the parameter values of `network`, described by `architecture`.
    ///
    /// **Errors**
    ///
    /// - `architecture` does not describe the parameters of `network`, see [`CheckpointError`].
    /// - `architecture` differs from the architecture of `network`, ie the activation or dropout.
    pub fn new(network: &Network, architecture: &Architecture) -> Result<Self> {
        let parameter_values = network.state_dict();
        check_parameter_values(&architecture.parameter_shapes(), &parameter_values)
            .context("Architecture does not match the network!")?;
        ensure!(
            architecture == network.architecture(),
            "Architecture {architecture:?} does not match the network {:?}!",
            network.architecture()
        );
        Ok(Self {
            input_size: architecture.input_size,
            output_size: architecture.output_size,
            hidden_layer_sizes: architecture.hidden_layer_sizes.clone(),
            activation: architecture.activation,
            dropout: architecture.dropout,
            parameter_values,
        })
    }
    /// Captures `network` with its own architecture.
    pub fn from_network(network: &Network) -> Self {
        let architecture = network.architecture();
        Self {
            input_size: architecture.input_size,
            output_size: architecture.output_size,
            hidden_layer_sizes: architecture.hidden_layer_sizes.clone(),
            activation: architecture.activation,
            dropout: architecture.dropout,
            parameter_values: network.state_dict(),
        }
    }
    /// The architecture.
    ///
    /// **Errors**
    ///
    /// The stored fields are not a valid architecture.
    pub fn architecture(&self) -> Result<Architecture> {
        Architecture::builder()
            .input_size(self.input_size)
            .output_size(self.output_size)
            .hidden_layer_sizes(self.hidden_layer_sizes.iter().copied())
            .activation(self.activation)
            .dropout(self.dropout)
            .build()
    }
    /// The stored parameter values.
    pub fn parameter_values(&self) -> &BTreeMap<String, ArrayD<f32>> {
        &self.parameter_values
    }
    /// Builds a network from the architecture and assigns the parameter values by name.
    ///
    /// The network is in evaluation mode.
    ///
    /// **Errors**
    /// - The architecture is invalid.
    /// - The parameter names or shapes do not match, see [`CheckpointError`]. Values are never
    ///   padded, truncated or reshaped.
    pub fn into_network(self) -> Result<Network> {
        let mut network = Network::from_architecture(self.architecture()?)?;
        network.load_state_dict(&self.parameter_values)?;
        network.eval();
        Ok(network)
    }
    /// Writes the checkpoint to `path`.
    ///
    /// **Errors**
    ///
    /// The file could not be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Unable to create checkpoint {path:?}!"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::info!(
            "Saved checkpoint {path:?}: {} parameters",
            self.parameter_values.len()
        );
        Ok(())
    }
    /// Reads a checkpoint from `path`.
    ///
    /// **Errors**
    /// - The file could not be opened.
    /// - The file is not a checkpoint, ie a field is missing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Unable to open checkpoint {path:?}!"))?;
        let checkpoint: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid checkpoint {path:?}!"))?;
        tracing::info!(
            "Loaded checkpoint {path:?}: {:?}",
            std::iter::once(checkpoint.input_size)
                .chain(checkpoint.hidden_layer_sizes.iter().copied())
                .chain(std::iter::once(checkpoint.output_size))
                .collect::<Vec<_>>()
        );
        Ok(checkpoint)
    }
}

/// Saves `network` to `path`.
///
/// See [`Checkpoint::save()`].
pub fn save_checkpoint(network: &Network, path: impl AsRef<Path>) -> Result<()> {
    Checkpoint::from_network(network).save(path)
}

/// Loads a network from `path`.
///
/// See [`Checkpoint::load()`] and [`Checkpoint::into_network()`].
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Network> {
    Checkpoint::load(path)?.into_network()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;

    fn network(hidden_layer_sizes: &[usize]) -> Network {
        let architecture = Architecture::builder()
            .input_size(6)
            .output_size(3)
            .hidden_layer_sizes(hidden_layer_sizes.iter().copied())
            .build()
            .unwrap();
        Network::from_architecture_with_rng(architecture, &mut StdRng::seed_from_u64(0)).unwrap()
    }

    #[test]
    fn new_checks_architecture() {
        let network = network(&[4]);
        let checkpoint = Checkpoint::new(&network, network.architecture()).unwrap();
        assert_eq!(checkpoint, Checkpoint::from_network(&network));
        let other = Architecture::builder()
            .input_size(6)
            .output_size(3)
            .hidden_layer_sizes([5])
            .build()
            .unwrap();
        let error = Checkpoint::new(&network, &other).unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CheckpointError>(),
            Some(CheckpointError::ShapeMismatch { name, .. }) if name == "hidden_layers.0.weight"
        ));
    }

    #[test]
    fn new_checks_activation_and_dropout() {
        let network = network(&[4]);
        let builder = Architecture::builder()
            .input_size(6)
            .output_size(3)
            .hidden_layer_sizes([4]);
        let sigmoid = builder.clone().activation(Activation::Sigmoid).build().unwrap();
        assert!(Checkpoint::new(&network, &sigmoid).is_err());
        let dropout = builder.dropout(0.5).build().unwrap();
        assert!(Checkpoint::new(&network, &dropout).is_err());
    }

    #[test]
    fn into_network_loads_values() {
        let network = network(&[4, 2]);
        let loaded = Checkpoint::from_network(&network).into_network().unwrap();
        assert!(!loaded.is_training());
        assert_eq!(loaded.state_dict(), network.state_dict());
    }

    #[test]
    fn into_network_missing_and_unexpected() {
        let network = network(&[4]);
        let mut checkpoint = Checkpoint::from_network(&network);
        let bias = checkpoint.parameter_values.remove("output.bias").unwrap();
        let error = checkpoint.clone().into_network().unwrap_err();
        assert_eq!(
            error.downcast_ref::<CheckpointError>(),
            Some(&CheckpointError::MissingParameter {
                name: "output.bias".into()
            })
        );
        checkpoint.parameter_values.insert("output.bias".into(), bias.clone());
        checkpoint.parameter_values.insert("output.scale".into(), bias);
        let error = checkpoint.into_network().unwrap_err();
        assert_eq!(
            error.downcast_ref::<CheckpointError>(),
            Some(&CheckpointError::UnexpectedParameter {
                name: "output.scale".into()
            })
        );
    }

    #[test]
    fn deserialize_requires_every_field() {
        let value = serde_json::to_value(Checkpoint::from_network(&network(&[]))).unwrap();
        for field in [
            "input_size",
            "output_size",
            "hidden_layer_sizes",
            "activation",
            "dropout",
            "parameter_values",
        ] {
            let mut value = value.clone();
            value.as_object_mut().unwrap().remove(field);
            let error = serde_json::from_value::<Checkpoint>(value).unwrap_err();
            assert!(error.to_string().contains(field), "{error}");
        }
        let mut value = value;
        value
            .as_object_mut()
            .unwrap()
            .insert("epoch".into(), json!(1));
        assert!(serde_json::from_value::<Checkpoint>(value).is_err());
    }
}
