#[cfg(doc)]
use super::autograd::Parameter;
use super::autograd::ParameterD;
use crate::{error::ShapeError, result::Result};
use anyhow::ensure;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Optimizer builders.
pub mod builder {
    use super::*;

    /// Builder for creating a [`SGD`].
    #[derive(Clone, Debug)]
    pub struct SGDBuilder {
        learning_rate: f32,
        momentum: f32,
    }

    impl SGDBuilder {
        pub(super) fn new() -> Self {
            Self {
                learning_rate: 0.01,
                momentum: 0.,
            }
        }
        /// Learning rate. Default is 0.01.
        pub fn learning_rate(self, learning_rate: f32) -> Self {
            Self {
                learning_rate,
                ..self
            }
        }
        /// Momentum. Default is 0.
        ///
        /// If `momentum` is greater than 0, a "velocity" tensor is kept for each [`Parameter`].
        pub fn momentum(self, momentum: f32) -> Self {
            Self { momentum, ..self }
        }
        /// Builds the optimizer.
        ///
        /// **Errors**
        /// - `learning_rate` is not in (0, 1].
        /// - `momentum` is not in [0, 1).
        pub fn build(self) -> Result<SGD> {
            let Self {
                learning_rate,
                momentum,
            } = self;
            ensure!(
                learning_rate > 0. && learning_rate <= 1.,
                "SGD learning_rate must be in (0, 1], found {learning_rate}!"
            );
            ensure!(
                (0. ..1.).contains(&momentum),
                "SGD momentum must be in [0, 1), found {momentum}!"
            );
            Ok(SGD {
                learning_rate,
                momentum,
                velocities: BTreeMap::new(),
            })
        }
    }

    /// Builder for creating an [`Adam`].
    #[derive(Clone, Debug)]
    pub struct AdamBuilder {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    }

    impl AdamBuilder {
        pub(super) fn new() -> Self {
            Self {
                learning_rate: 0.001,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }
        }
        /// Learning rate. Default is 0.001.
        pub fn learning_rate(self, learning_rate: f32) -> Self {
            Self {
                learning_rate,
                ..self
            }
        }
        /// Decay of the first moment. Default is 0.9.
        pub fn beta1(self, beta1: f32) -> Self {
            Self { beta1, ..self }
        }
        /// Decay of the second moment. Default is 0.999.
        pub fn beta2(self, beta2: f32) -> Self {
            Self { beta2, ..self }
        }
        /// Added to the denominator. Default is 1e-8.
        pub fn epsilon(self, epsilon: f32) -> Self {
            Self { epsilon, ..self }
        }
        /// Builds the optimizer.
        ///
        /// **Errors**
        /// - `learning_rate` is not in (0, 1].
        /// - `beta1` or `beta2` is not in [0, 1).
        /// - `epsilon` is not positive.
        pub fn build(self) -> Result<Adam> {
            let Self {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } = self;
            ensure!(
                learning_rate > 0. && learning_rate <= 1.,
                "Adam learning_rate must be in (0, 1], found {learning_rate}!"
            );
            for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                ensure!(
                    (0. ..1.).contains(&beta),
                    "Adam {name} must be in [0, 1), found {beta}!"
                );
            }
            ensure!(epsilon > 0., "Adam epsilon must be positive, found {epsilon}!");
            Ok(Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                moments: BTreeMap::new(),
            })
        }
    }
}
use builder::*;

/// Optimizer.
///
/// Updates [`Parameter`]s with their accumulated gradients. Parameters without a gradient are
/// skipped. State (ie velocity) is keyed by parameter name.
pub trait Optimizer {
    /// Updates the parameters.
    ///
    /// **Errors**
    ///
    /// The shape of a parameter does not match its state.
    fn update(&mut self, parameters: &mut [(String, &mut ParameterD)]) -> Result<()>;
}

fn check_state(name: &str, parameter: &ParameterD, state: &ArrayD<f32>) -> Result<()> {
    if parameter.shape() != state.shape() {
        return Err(ShapeError::new(name, state.shape(), parameter.shape()).into());
    }
    Ok(())
}

/// Stochastic Gradient Descent.
///
/// ```text
/// v = momentum * v + grad
/// value -= learning_rate * v
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SGD {
    learning_rate: f32,
    momentum: f32,
    velocities: BTreeMap<String, ArrayD<f32>>,
}

impl Default for SGD {
    /// Learning rate 0.01 without momentum.
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.,
            velocities: BTreeMap::new(),
        }
    }
}

impl SGD {
    /// Returns a builder for creating a [`SGD`].
    pub fn builder() -> SGDBuilder {
        SGDBuilder::new()
    }
    /// The learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
    /// The momentum.
    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for SGD {
    fn update(&mut self, parameters: &mut [(String, &mut ParameterD)]) -> Result<()> {
        let learning_rate = self.learning_rate;
        let momentum = self.momentum;
        for (name, parameter) in parameters.iter_mut() {
            let Some(grad) = parameter.grad().map(|grad| grad.to_owned()) else {
                continue;
            };
            if momentum > 0. {
                let velocity = self
                    .velocities
                    .entry(name.clone())
                    .or_insert_with(|| ArrayD::zeros(grad.raw_dim()));
                check_state(name, parameter, velocity)?;
                Zip::from(&mut *velocity)
                    .and(&grad)
                    .for_each(|v, g| *v = momentum * *v + g);
                parameter.value_mut().scaled_add(-learning_rate, &*velocity);
            } else {
                parameter.value_mut().scaled_add(-learning_rate, &grad);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Moments {
    step: i32,
    mean: ArrayD<f32>,
    variance: ArrayD<f32>,
}

/// Adam.
///
/// Adaptive moment estimation with bias correction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    moments: BTreeMap<String, Moments>,
}

impl Adam {
    /// Returns a builder for creating an [`Adam`].
    pub fn builder() -> AdamBuilder {
        AdamBuilder::new()
    }
    /// The learning rate.
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for Adam {
    fn update(&mut self, parameters: &mut [(String, &mut ParameterD)]) -> Result<()> {
        let Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            moments,
        } = self;
        let (learning_rate, beta1, beta2, epsilon) = (*learning_rate, *beta1, *beta2, *epsilon);
        for (name, parameter) in parameters.iter_mut() {
            let Some(grad) = parameter.grad().map(|grad| grad.to_owned()) else {
                continue;
            };
            let state = moments.entry(name.clone()).or_insert_with(|| Moments {
                step: 0,
                mean: ArrayD::zeros(grad.raw_dim()),
                variance: ArrayD::zeros(grad.raw_dim()),
            });
            check_state(name, parameter, &state.mean)?;
            state.step += 1;
            let mean_correction = 1. - beta1.powi(state.step);
            let variance_correction = 1. - beta2.powi(state.step);
            Zip::from(parameter.value_mut())
                .and(&mut state.mean)
                .and(&mut state.variance)
                .and(&grad)
                .for_each(|x, m, v, g| {
                    *m = beta1 * *m + (1. - beta1) * g;
                    *v = beta2 * *v + (1. - beta2) * g * g;
                    let m_hat = *m / mean_correction;
                    let v_hat = *v / variance_correction;
                    *x -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
                });
        }
        Ok(())
    }
}
