use crate::result::Result;
use anyhow::ensure;
use ndarray::{ArrayBase, ArrayView1, ArrayView2, Data, Ix1, Ix2};

/// Criterion.
///
/// Evaluates an `input` (typically the output of a model) against a `target`.
pub trait Criterion<X, T> {
    /// The output.
    type Output;
    /// Evaluates the criterion.
    ///
    /// **Errors**
    ///
    /// The input and target do not match, ie different batch sizes or out of range classes.
    fn eval(&self, input: X, target: T) -> Result<Self::Output>;
}

pub(crate) fn check_classes(input: ArrayView2<f32>, target: ArrayView1<usize>) -> Result<()> {
    ensure!(
        input.nrows() == target.len(),
        "input has {} samples, target has {}!",
        input.nrows(),
        target.len()
    );
    let classes = input.ncols();
    if let Some(class) = target.iter().find(|class| **class >= classes) {
        anyhow::bail!("class {class} out of range for {classes} classes!");
    }
    Ok(())
}

/// Accuracy.
///
/// The number of samples whose highest scoring class is the target.
#[derive(Default, Clone, Copy, Debug)]
pub struct Accuracy;

impl<S1: Data<Elem = f32>, S2: Data<Elem = usize>>
    Criterion<ArrayBase<S1, Ix2>, ArrayBase<S2, Ix1>> for Accuracy
{
    type Output = usize;
    fn eval(&self, input: ArrayBase<S1, Ix2>, target: ArrayBase<S2, Ix1>) -> Result<usize> {
        check_classes(input.view(), target.view())?;
        Ok(input
            .outer_iter()
            .zip(target.iter().copied())
            .filter(|(input, class)| argmax(input.view()) == *class)
            .count())
    }
}

pub(crate) fn argmax(input: ArrayView1<f32>) -> usize {
    let mut max = f32::NEG_INFINITY;
    let mut max_index = 0;
    for (i, x) in input.iter().copied().enumerate() {
        if x > max {
            max = x;
            max_index = i;
        }
    }
    max_index
}

/// Negative log likelihood loss.
///
/// The input is log-probabilities, ie the output of a
/// [`LogSoftmax`](super::neural_network::layer::LogSoftmax). The loss is the mean over the batch of
/// `-input[class]`.
#[derive(Default, Clone, Copy, Debug)]
pub struct NllLoss;

impl<S1: Data<Elem = f32>, S2: Data<Elem = usize>>
    Criterion<ArrayBase<S1, Ix2>, ArrayBase<S2, Ix1>> for NllLoss
{
    type Output = f32;
    fn eval(&self, input: ArrayBase<S1, Ix2>, target: ArrayBase<S2, Ix1>) -> Result<f32> {
        check_classes(input.view(), target.view())?;
        if target.is_empty() {
            return Ok(0.);
        }
        let sum: f32 = input
            .outer_iter()
            .zip(target.iter())
            .map(|(x, class)| -x[*class])
            .sum();
        Ok(sum / target.len() as f32)
    }
}

/// Cross entropy loss.
///
/// Applies log-softmax to raw scores, then [`NllLoss`]. Log-softmax is idempotent, so applying this
/// to log-probabilities is the same as [`NllLoss`].
#[derive(Default, Clone, Copy, Debug)]
pub struct CrossEntropyLoss;

impl<S1: Data<Elem = f32>, S2: Data<Elem = usize>>
    Criterion<ArrayBase<S1, Ix2>, ArrayBase<S2, Ix1>> for CrossEntropyLoss
{
    type Output = f32;
    fn eval(&self, input: ArrayBase<S1, Ix2>, target: ArrayBase<S2, Ix1>) -> Result<f32> {
        check_classes(input.view(), target.view())?;
        if target.is_empty() {
            return Ok(0.);
        }
        let sum: f32 = input
            .outer_iter()
            .zip(target.iter())
            .map(|(x, class)| {
                let m = x.fold(f32::NEG_INFINITY, |m, x| m.max(*x));
                let s: f32 = x.iter().map(|x| (x - m).exp()).sum();
                m + s.ln() - x[*class]
            })
            .sum();
        Ok(sum / target.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn accuracy() {
        let input = arr2(&[[0.1f32, 0.9], [0.8, 0.2], [0.3, 0.7]]);
        assert_eq!(Accuracy.eval(input.view(), arr1(&[1, 0, 0])).unwrap(), 2);
        assert!(Accuracy.eval(input.view(), arr1(&[1, 0])).is_err());
        assert!(Accuracy.eval(input, arr1(&[1, 0, 2])).is_err());
    }

    #[test]
    fn nll_loss() {
        let input = arr2(&[[0.5f32.ln(), 0.5f32.ln()], [0.25f32.ln(), 0.75f32.ln()]]);
        let loss = NllLoss.eval(input.view(), arr1(&[0, 1])).unwrap();
        assert_relative_eq!(loss, -(0.5f32.ln() + 0.75f32.ln()) / 2.);
        assert!(NllLoss.eval(input, arr1(&[0, 2])).is_err());
    }

    #[test]
    fn cross_entropy_matches_nll_on_log_probs() {
        let input = arr2(&[[0.2f32.ln(), 0.8f32.ln()], [0.6f32.ln(), 0.4f32.ln()]]);
        let target = arr1(&[1, 1]);
        let nll = NllLoss.eval(input.view(), target.view()).unwrap();
        let ce = CrossEntropyLoss.eval(input.view(), target.view()).unwrap();
        assert_relative_eq!(nll, ce, epsilon = 1e-6);
        let scores = arr2(&[[1f32, 1.]]);
        let ce = CrossEntropyLoss.eval(scores, arr1(&[0])).unwrap();
        assert_relative_eq!(ce, 2f32.ln(), epsilon = 1e-6);
    }
}
