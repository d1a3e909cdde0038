use super::autograd::{Parameter, ParameterD};
use crate::{error::ShapeError, result::Result};
use anyhow::{bail, ensure};
use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Ix1, Ix2, Zip};
use rand::{distributions::Bernoulli, rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::fmt::Debug;

/// Layer.
///
/// A layer is a [`Forward`] transform that can also be run in training mode, where it caches what
/// its [`.backward()`](Layer::backward()) needs.
///
/// # Backward
/// [`.backward()`](Layer::backward()) takes the gradient of the loss with respect to the output of
/// the last [`.forward_train()`](Layer::forward_train()), accumulates the gradients of the parameters,
/// and returns the gradient with respect to the input. The cache is consumed, so each training forward
/// pass admits one backward pass.
pub trait Layer: Forward + Debug + Send + Sync + 'static {
    /// Computes the forward pass in training mode, caching for [`.backward()`](Layer::backward()).
    ///
    /// **Errors**
    ///
    /// See [`Forward::forward()`].
    fn forward_train(&mut self, input: Array2<f32>) -> Result<Array2<f32>>;
    /// Computes the backward pass.
    ///
    /// **Errors**
    /// - There was no prior training forward pass.
    /// - `output_grad` does not have the shape of the output.
    fn backward(&mut self, output_grad: Array2<f32>) -> Result<Array2<f32>>;
    /// The parameters, with names local to the layer.
    fn parameters(&self) -> Vec<(&'static str, &ParameterD)> {
        Vec::new()
    }
    /// Mutable references to the parameters, with names local to the layer.
    fn parameters_mut(&mut self) -> Vec<(&'static str, &mut ParameterD)> {
        Vec::new()
    }
}

/// A trait for the forward pass.
///
/// Inputs are 2 dimensional, `[batch_size, features]`.
pub trait Forward {
    /// Computes the forward pass, in evaluation mode.
    ///
    /// **Errors**
    ///
    /// Returns an error if the operation could not be performed, ie the input has the wrong shape.
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>>;
}

fn he_normal(inputs: usize) -> Result<Normal<f32>> {
    let std_dev = (2. / inputs.max(1) as f32).sqrt();
    Ok(Normal::new(0., std_dev)?)
}

fn no_cache(layer: &str) -> anyhow::Error {
    anyhow::anyhow!("{layer}: backward called without a training forward pass!")
}

fn check_grad(layer: &str, expected: &[usize], output_grad: &Array2<f32>) -> Result<()> {
    if output_grad.shape() != expected {
        return Err(ShapeError::new(layer, expected, output_grad.shape()).into());
    }
    Ok(())
}

/// Dense / fully connected layer.
///
/// Computes `input · weightᵀ + bias`.
#[derive(Debug)]
pub struct Dense {
    weight: ParameterD,
    bias: ParameterD,
    input: Option<Array2<f32>>,
}

impl Dense {
    /// Creates a new [`Dense`] for `inputs` and `outputs`.
    ///
    /// The weight is initialized with a normal distribution with std_dev = sqrt(2 / inputs). The bias
    /// is initialized with 0's.
    pub fn from_inputs_outputs_with_rng<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        rng: &mut R,
    ) -> Result<Self> {
        let distribution = he_normal(inputs)?;
        let weight = Array::from_shape_simple_fn([outputs, inputs], || distribution.sample(rng));
        Ok(Self {
            weight: Parameter::from(weight).into_dyn(),
            bias: Parameter::from(Array1::zeros(outputs)).into_dyn(),
            input: None,
        })
    }
    /// The number of inputs.
    pub fn inputs(&self) -> usize {
        self.weight.shape()[1]
    }
    /// The number of outputs.
    pub fn outputs(&self) -> usize {
        self.weight.shape()[0]
    }
}

impl Forward for Dense {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let inputs = self.inputs();
        if input.ncols() != inputs {
            return Err(ShapeError::new("Dense", &[input.nrows(), inputs], input.shape()).into());
        }
        let weight = self.weight.value().into_dimensionality::<Ix2>()?;
        let bias = self.bias.value().into_dimensionality::<Ix1>()?;
        Ok(input.dot(&weight.t()) + &bias)
    }
}

impl Layer for Dense {
    fn forward_train(&mut self, input: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.forward(input.view())?;
        self.input.replace(input);
        Ok(output)
    }
    fn backward(&mut self, output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let input = self.input.take().ok_or_else(|| no_cache("Dense"))?;
        check_grad("Dense", &[input.nrows(), self.outputs()], &output_grad)?;
        let weight_grad = output_grad.t().dot(&input).into_dyn();
        let bias_grad = output_grad.sum_axis(Axis(0)).into_dyn();
        self.weight.accumulate_grad(&weight_grad)?;
        self.bias.accumulate_grad(&bias_grad)?;
        let weight = self.weight.value().into_dimensionality::<Ix2>()?;
        Ok(output_grad.dot(&weight))
    }
    fn parameters(&self) -> Vec<(&'static str, &ParameterD)> {
        vec![("weight", &self.weight), ("bias", &self.bias)]
    }
    fn parameters_mut(&mut self) -> Vec<(&'static str, &mut ParameterD)> {
        vec![("weight", &mut self.weight), ("bias", &mut self.bias)]
    }
}

/// ReLU activation.
#[derive(Default, Debug)]
pub struct Relu {
    input: Option<Array2<f32>>,
}

impl Forward for Relu {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(input.mapv(|x| x.max(0.)))
    }
}

impl Layer for Relu {
    fn forward_train(&mut self, input: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.forward(input.view())?;
        self.input.replace(input);
        Ok(output)
    }
    fn backward(&mut self, mut output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let input = self.input.take().ok_or_else(|| no_cache("Relu"))?;
        check_grad("Relu", input.shape(), &output_grad)?;
        Zip::from(&mut output_grad).and(&input).for_each(|dy, x| {
            if *x <= 0. {
                *dy = 0.;
            }
        });
        Ok(output_grad)
    }
}

/// Sigmoid activation.
#[derive(Default, Debug)]
pub struct Sigmoid {
    output: Option<Array2<f32>>,
}

impl Forward for Sigmoid {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(input.mapv(|x| 1. / (1. + (-x).exp())))
    }
}

impl Layer for Sigmoid {
    fn forward_train(&mut self, input: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.forward(input.view())?;
        self.output.replace(output.clone());
        Ok(output)
    }
    fn backward(&mut self, mut output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.output.take().ok_or_else(|| no_cache("Sigmoid"))?;
        check_grad("Sigmoid", output.shape(), &output_grad)?;
        Zip::from(&mut output_grad)
            .and(&output)
            .for_each(|dy, y| *dy *= y * (1. - y));
        Ok(output_grad)
    }
}

/// Dropout.
///
/// In training mode, zeroes each element with probability `p` and scales the rest by `1 / (1 - p)`.
/// In evaluation mode it is the identity.
#[derive(Debug)]
pub struct Dropout {
    p: f32,
    rng: StdRng,
    mask: Option<Array2<f32>>,
}

impl Dropout {
    /// Creates a new [`Dropout`] with probability `p`, seeding its mask generator from `rng`.
    ///
    /// **Errors**
    ///
    /// `p` is not in [0, 1).
    pub fn with_rng<R: Rng + ?Sized>(p: f32, rng: &mut R) -> Result<Self> {
        ensure!((0. ..1.).contains(&p), "Dropout p must be in [0, 1), found {p}!");
        Ok(Self {
            p,
            rng: StdRng::seed_from_u64(rng.gen()),
            mask: None,
        })
    }
    /// The probability of an element being zeroed.
    pub fn p(&self) -> f32 {
        self.p
    }
}

impl Forward for Dropout {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(input.to_owned())
    }
}

impl Layer for Dropout {
    fn forward_train(&mut self, mut input: Array2<f32>) -> Result<Array2<f32>> {
        let keep = 1. - self.p;
        let bernoulli = Bernoulli::new(keep.into())?;
        let scale = 1. / keep;
        let rng = &mut self.rng;
        let mask = Array::from_shape_simple_fn(input.raw_dim(), || {
            if bernoulli.sample(rng) {
                scale
            } else {
                0.
            }
        });
        input *= &mask;
        self.mask.replace(mask);
        Ok(input)
    }
    fn backward(&mut self, mut output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let mask = self.mask.take().ok_or_else(|| no_cache("Dropout"))?;
        check_grad("Dropout", mask.shape(), &output_grad)?;
        output_grad *= &mask;
        Ok(output_grad)
    }
}

/// Log-softmax over the class axis.
///
/// Computed as `x - max(x) - ln(sum(exp(x - max(x))))` per row.
#[derive(Default, Debug)]
pub struct LogSoftmax {
    output: Option<Array2<f32>>,
}

impl Forward for LogSoftmax {
    fn forward(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        if input.ncols() == 0 {
            bail!("LogSoftmax: input has no classes!");
        }
        let mut output = input.to_owned();
        for mut row in output.outer_iter_mut() {
            let max = row.fold(f32::NEG_INFINITY, |m, x| m.max(*x));
            let log_sum = row.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
            row.mapv_inplace(|x| x - max - log_sum);
        }
        Ok(output)
    }
}

impl Layer for LogSoftmax {
    fn forward_train(&mut self, input: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.forward(input.view())?;
        self.output.replace(output.clone());
        Ok(output)
    }
    fn backward(&mut self, mut output_grad: Array2<f32>) -> Result<Array2<f32>> {
        let output = self.output.take().ok_or_else(|| no_cache("LogSoftmax"))?;
        check_grad("LogSoftmax", output.shape(), &output_grad)?;
        for (mut dy, y) in output_grad.outer_iter_mut().zip(output.outer_iter()) {
            let sum = dy.sum();
            Zip::from(&mut dy)
                .and(&y)
                .for_each(|dy, y| *dy -= y.exp() * sum);
        }
        Ok(output_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    fn dense() -> Dense {
        let mut dense =
            Dense::from_inputs_outputs_with_rng(3, 2, &mut StdRng::seed_from_u64(0)).unwrap();
        dense
            .weight
            .assign(&arr2(&[[1f32, 0., -1.], [0.5, 2., 0.]]).into_dyn())
            .unwrap();
        dense.bias.assign(&arr1(&[0.1f32, -0.2]).into_dyn()).unwrap();
        dense
    }

    #[test]
    fn dense_init() {
        let dense =
            Dense::from_inputs_outputs_with_rng(784, 128, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(dense.weight.shape(), &[128, 784]);
        assert_eq!(dense.bias.shape(), &[128]);
        assert!(dense.bias.value().iter().all(|x| *x == 0.));
        let weight = dense.weight.value();
        let mean = weight.mean().unwrap();
        let std_dev = weight.std(0.);
        assert!(mean.abs() < 0.01, "{mean}");
        assert_relative_eq!(std_dev, (2f32 / 784.).sqrt(), max_relative = 0.05);
    }

    #[test]
    fn dense_forward() {
        let dense = dense();
        let y = dense.forward(arr2(&[[1f32, 2., 3.]]).view()).unwrap();
        assert_relative_eq!(y, arr2(&[[-1.9f32, 4.3]]), epsilon = 1e-6);
        let error = dense.forward(arr2(&[[1f32, 2.]]).view()).unwrap_err();
        assert!(error.downcast_ref::<ShapeError>().is_some());
    }

    #[test]
    fn dense_backward() {
        let mut dense = dense();
        let x = arr2(&[[1f32, 2., 3.], [0., 1., 0.]]);
        dense.forward_train(x).unwrap();
        let dx = dense.backward(arr2(&[[1f32, 0.], [0., 1.]])).unwrap();
        assert_relative_eq!(dx, arr2(&[[1f32, 0., -1.], [0.5, 2., 0.]]));
        let weight_grad = dense.weight.grad().unwrap().into_dimensionality::<Ix2>().unwrap();
        assert_relative_eq!(weight_grad, arr2(&[[1f32, 2., 3.], [0., 1., 0.]]));
        let bias_grad = dense.bias.grad().unwrap().into_dimensionality::<Ix1>().unwrap();
        assert_relative_eq!(bias_grad, arr1(&[1f32, 1.]));
    }

    #[test]
    fn backward_without_forward() {
        let mut dense = dense();
        assert!(dense.backward(Array2::zeros([1, 2])).is_err());
        dense.forward(Array2::zeros([1, 3]).view()).unwrap();
        assert!(dense.backward(Array2::zeros([1, 2])).is_err());
        dense.forward_train(Array2::zeros([1, 3])).unwrap();
        dense.backward(Array2::zeros([1, 2])).unwrap();
        assert!(dense.backward(Array2::zeros([1, 2])).is_err());
    }

    #[test]
    fn relu() {
        let mut relu = Relu::default();
        let y = relu.forward_train(arr2(&[[-1f32, 0., 2.]])).unwrap();
        assert_eq!(y, arr2(&[[0f32, 0., 2.]]));
        let dx = relu.backward(arr2(&[[1f32, 1., 1.]])).unwrap();
        assert_eq!(dx, arr2(&[[0f32, 0., 1.]]));
    }

    #[test]
    fn sigmoid() {
        let mut sigmoid = Sigmoid::default();
        let y = sigmoid.forward_train(arr2(&[[0f32, 100., -100.]])).unwrap();
        assert_relative_eq!(y, arr2(&[[0.5f32, 1., 0.]]), epsilon = 1e-6);
        let dx = sigmoid.backward(arr2(&[[1f32, 1., 1.]])).unwrap();
        assert_relative_eq!(dx, arr2(&[[0.25f32, 0., 0.]]), epsilon = 1e-6);
    }

    #[test]
    fn dropout_train_eval() {
        let mut dropout = Dropout::with_rng(0.5, &mut StdRng::seed_from_u64(0)).unwrap();
        let x = Array2::ones([8, 64]);
        assert_eq!(dropout.forward(x.view()).unwrap(), x);
        let y = dropout.forward_train(x.clone()).unwrap();
        assert!(y.iter().all(|y| *y == 0. || *y == 2.));
        let zeros = y.iter().filter(|y| **y == 0.).count();
        assert!(zeros > 128 && zeros < 384, "{zeros}");
        let dx = dropout.backward(Array2::ones([8, 64])).unwrap();
        assert_eq!(dx, y);
    }

    #[test]
    fn dropout_invalid_p() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(Dropout::with_rng(1., &mut rng).is_err());
        assert!(Dropout::with_rng(-0.1, &mut rng).is_err());
        let mut dropout = Dropout::with_rng(0., &mut rng).unwrap();
        let x = arr2(&[[1f32, 2.]]);
        assert_eq!(dropout.forward_train(x.clone()).unwrap(), x);
    }

    #[test]
    fn log_softmax() {
        let mut log_softmax = LogSoftmax::default();
        let x = arr2(&[[1f32, 2., 3.], [1000., 1000., 1000.]]);
        let y = log_softmax.forward_train(x).unwrap();
        for row in y.outer_iter() {
            assert_relative_eq!(row.mapv(f32::exp).sum(), 1., epsilon = 1e-6);
        }
        assert_relative_eq!(y[[1, 0]], -(3f32.ln()), epsilon = 1e-6);
        let dx = log_softmax.backward(arr2(&[[0f32, 0., -1.], [-1., 0., 0.]])).unwrap();
        for row in dx.outer_iter() {
            assert_relative_eq!(row.sum(), 0., epsilon = 1e-6);
        }
        let p = y.row(0).mapv(f32::exp);
        assert_relative_eq!(dx[[0, 2]], p[2] - 1., epsilon = 1e-6);
        assert_relative_eq!(dx[[0, 0]], p[0], epsilon = 1e-6);
    }
}
