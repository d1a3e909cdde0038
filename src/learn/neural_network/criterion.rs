use crate::{
    learn::criterion::{check_classes, Criterion, CrossEntropyLoss, NllLoss},
    result::Result,
};
use ndarray::{Array2, ArrayView1, ArrayView2, Zip};
use std::fmt::Debug;

/// A differentiable [`Criterion`] used to train a [`Network`](super::Network).
///
/// The input is the output of the network, log-probabilities.
pub trait Loss: Debug {
    /// Computes the loss and its gradient with respect to `input`.
    ///
    /// **Errors**
    ///
    /// See [`Criterion::eval()`].
    fn loss_backward(
        &self,
        input: ArrayView2<f32>,
        target: ArrayView1<usize>,
    ) -> Result<(f32, Array2<f32>)>;
}

impl Loss for NllLoss {
    fn loss_backward(
        &self,
        input: ArrayView2<f32>,
        target: ArrayView1<usize>,
    ) -> Result<(f32, Array2<f32>)> {
        let loss = self.eval(input, target)?;
        let mut grad = Array2::zeros(input.raw_dim());
        let scale = -1. / target.len().max(1) as f32;
        for (mut dx, class) in grad.outer_iter_mut().zip(target.iter()) {
            dx[*class] = scale;
        }
        Ok((loss, grad))
    }
}

impl Loss for CrossEntropyLoss {
    fn loss_backward(
        &self,
        input: ArrayView2<f32>,
        target: ArrayView1<usize>,
    ) -> Result<(f32, Array2<f32>)> {
        let loss = self.eval(input, target)?;
        check_classes(input, target)?;
        let scale = 1. / target.len().max(1) as f32;
        let mut grad = Array2::zeros(input.raw_dim());
        for ((x, class), mut dx) in input
            .outer_iter()
            .zip(target.iter())
            .zip(grad.outer_iter_mut())
        {
            let m = x.fold(f32::NEG_INFINITY, |m, x| m.max(*x));
            let s: f32 = x.iter().map(|x| (x - m).exp()).sum();
            Zip::from(&mut dx)
                .and(&x)
                .for_each(|dx, x| *dx = scale * (x - m).exp() / s);
            dx[*class] -= scale;
        }
        Ok((loss, grad))
    }
}
