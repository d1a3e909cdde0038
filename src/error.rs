use thiserror::Error;

/// A tensor did not have the shape an operation expected.
///
/// Returned (wrapped in [`anyhow::Error`]) by the forward and backward passes. Use
/// [`anyhow::Error::downcast_ref()`] to inspect it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{name}: expected shape {expected:?}, found {found:?}!")]
pub struct ShapeError {
    /// The layer, parameter or tensor that was checked.
    pub name: String,
    /// The expected shape.
    pub expected: Vec<usize>,
    /// The actual shape.
    pub found: Vec<usize>,
}

impl ShapeError {
    pub(crate) fn new(name: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        Self {
            name: name.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }
}

/// A checkpoint does not match the network it describes.
///
/// Loading never pads, truncates or reshapes parameters, any disagreement between
/// the stored values and the network built from the stored architecture is one of these.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// The network has a parameter the checkpoint does not.
    #[error("checkpoint is missing parameter {name:?}!")]
    MissingParameter {
        /// The parameter name.
        name: String,
    },
    /// The checkpoint has a parameter the network does not.
    #[error("checkpoint has unexpected parameter {name:?}!")]
    UnexpectedParameter {
        /// The parameter name.
        name: String,
    },
    /// A parameter is stored with a different shape.
    #[error("parameter {name:?} has shape {found:?} in the checkpoint, expected {expected:?}!")]
    ShapeMismatch {
        /// The parameter name.
        name: String,
        /// The shape of the parameter in the network.
        expected: Vec<usize>,
        /// The shape stored in the checkpoint.
        found: Vec<usize>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_error_display() {
        let error = ShapeError::new("hidden_layers.0", &[64, 784], &[64, 28, 28]);
        assert_eq!(
            error.to_string(),
            "hidden_layers.0: expected shape [64, 784], found [64, 28, 28]!"
        );
    }

    #[test]
    fn checkpoint_error_downcast() {
        let error = anyhow::Error::from(CheckpointError::MissingParameter {
            name: "output.bias".into(),
        });
        assert_eq!(
            error.downcast_ref::<CheckpointError>(),
            Some(&CheckpointError::MissingParameter {
                name: "output.bias".into()
            })
        );
    }
}
