use super::{Activation, Architecture};
use crate::result::Result;
use anyhow::ensure;

/// Builder for creating an [`Architecture`].
///
/// See [`Architecture::builder()`].
#[derive(Clone, Debug)]
pub struct ArchitectureBuilder {
    input_size: usize,
    output_size: usize,
    hidden_layer_sizes: Vec<usize>,
    activation: Activation,
    dropout: f32,
}

impl Default for ArchitectureBuilder {
    fn default() -> Self {
        Self {
            input_size: 0,
            output_size: 0,
            hidden_layer_sizes: Vec::new(),
            activation: Activation::default(),
            dropout: 0.,
        }
    }
}

impl ArchitectureBuilder {
    /// The number of input features. Inputs are flattened to this width.
    pub fn input_size(self, input_size: usize) -> Self {
        Self { input_size, ..self }
    }
    /// The number of classes.
    pub fn output_size(self, output_size: usize) -> Self {
        Self {
            output_size,
            ..self
        }
    }
    /// The output width of each hidden layer, in order. Defaults to none.
    pub fn hidden_layer_sizes(self, hidden_layer_sizes: impl IntoIterator<Item = usize>) -> Self {
        Self {
            hidden_layer_sizes: hidden_layer_sizes.into_iter().collect(),
            ..self
        }
    }
    /// The nonlinearity after each hidden layer. Defaults to [`Activation::Relu`].
    pub fn activation(self, activation: Activation) -> Self {
        Self { activation, ..self }
    }
    /// The dropout probability after each hidden layer. Defaults to 0.
    pub fn dropout(self, dropout: f32) -> Self {
        Self { dropout, ..self }
    }
    /// Builds the architecture.
    ///
    /// **Errors**
    /// - Any width is 0.
    /// - `dropout` is not in [0, 1).
    pub fn build(self) -> Result<Architecture> {
        let Self {
            input_size,
            output_size,
            hidden_layer_sizes,
            activation,
            dropout,
        } = self;
        ensure!(input_size > 0, "input_size must be positive!");
        ensure!(output_size > 0, "output_size must be positive!");
        ensure!(
            hidden_layer_sizes.iter().all(|size| *size > 0),
            "hidden_layer_sizes must be positive, found {hidden_layer_sizes:?}!"
        );
        ensure!(
            (0. ..1.).contains(&dropout),
            "dropout must be in [0, 1), found {dropout}!"
        );
        Ok(Architecture {
            input_size,
            output_size,
            hidden_layer_sizes,
            activation,
            dropout,
        })
    }
}
