use crate::{error::ShapeError, result::Result};
use ndarray::{Array, ArrayBase, ArrayView, ArrayViewMut, Data, Dimension, Ix1, Ix2, IxDyn};
use serde::{Deserialize, Serialize};

/// A trainable tensor with an explicit gradient accumulator.
///
/// The gradient always has the same shape as the value. [`.zero_grad()`](Parameter::zero_grad())
/// is called once per step, and backward passes [`.accumulate_grad()`](Parameter::accumulate_grad())
/// into it until the optimizer consumes it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Parameter<D: Dimension> {
    value: Array<f32, D>,
    #[serde(skip)]
    grad: Option<Array<f32, D>>,
}

/// Parameter with 1 dimension.
pub type Parameter1 = Parameter<Ix1>;
/// Parameter with 2 dimensions.
pub type Parameter2 = Parameter<Ix2>;
/// Parameter with dynamic dimensions.
pub type ParameterD = Parameter<IxDyn>;

impl<D: Dimension> From<Array<f32, D>> for Parameter<D> {
    fn from(value: Array<f32, D>) -> Self {
        Self { value, grad: None }
    }
}

impl<D: Dimension> Parameter<D> {
    /// The shape.
    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }
    /// The number of elements.
    pub fn len(&self) -> usize {
        self.value.len()
    }
    /// Whether the parameter has no elements.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
    /// A view of the value.
    pub fn value(&self) -> ArrayView<f32, D> {
        self.value.view()
    }
    /// A mutable view of the value.
    ///
    /// Used by optimizers and checkpoint loading.
    pub fn value_mut(&mut self) -> ArrayViewMut<f32, D> {
        self.value.view_mut()
    }
    /// The accumulated gradient.
    ///
    /// Returns `None` if nothing has been accumulated since the last [`.zero_grad()`](Parameter::zero_grad()).
    pub fn grad(&self) -> Option<ArrayView<f32, D>> {
        self.grad.as_ref().map(Array::view)
    }
    /// Resets the gradient.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
    /// Adds `grad` to the accumulated gradient.
    ///
    /// **Errors**
    ///
    /// `grad` does not have the shape of the value.
    pub fn accumulate_grad<S>(&mut self, grad: &ArrayBase<S, D>) -> Result<()>
    where
        S: Data<Elem = f32>,
    {
        if grad.shape() != self.value.shape() {
            return Err(ShapeError::new("grad", self.value.shape(), grad.shape()).into());
        }
        match self.grad.as_mut() {
            Some(acc) => *acc += grad,
            None => self.grad = Some(grad.to_owned()),
        }
        Ok(())
    }
    /// Sets the value, keeping the shape.
    ///
    /// **Errors**
    ///
    /// `value` has a different shape.
    pub fn assign<S>(&mut self, value: &ArrayBase<S, D>) -> Result<()>
    where
        S: Data<Elem = f32>,
    {
        if value.shape() != self.value.shape() {
            return Err(ShapeError::new("value", self.value.shape(), value.shape()).into());
        }
        self.value.assign(value);
        Ok(())
    }
    /// Converts into a dynamic dimensional parameter.
    pub fn into_dyn(self) -> ParameterD {
        Parameter {
            value: self.value.into_dyn(),
            grad: self.grad.map(Array::into_dyn),
        }
    }
}

impl ParameterD {
    /// Converts to dimension `D2`.
    ///
    /// **Errors**
    ///
    /// The number of dimensions does not match.
    pub fn into_dimensionality<D2: Dimension>(self) -> Result<Parameter<D2>> {
        Ok(Parameter {
            value: self.value.into_dimensionality()?,
            grad: self.grad.map(Array::into_dimensionality).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn accumulate_and_zero_grad() {
        let mut parameter = Parameter1::from(arr1(&[1f32, 2.]));
        assert!(parameter.grad().is_none());
        parameter.accumulate_grad(&arr1(&[0.5, 1.])).unwrap();
        parameter.accumulate_grad(&arr1(&[0.5, -1.])).unwrap();
        assert_eq!(parameter.grad().unwrap(), arr1(&[1f32, 0.]));
        parameter.zero_grad();
        assert!(parameter.grad().is_none());
        assert_eq!(parameter.value(), arr1(&[1f32, 2.]));
    }

    #[test]
    fn accumulate_grad_shape_mismatch() {
        let mut parameter = Parameter2::from(arr2(&[[1f32, 2.], [3., 4.]]));
        let error = parameter
            .accumulate_grad(&arr2(&[[1f32, 2., 3.]]))
            .unwrap_err();
        let error = error.downcast_ref::<ShapeError>().unwrap();
        assert_eq!(error.expected, [2, 2]);
        assert_eq!(error.found, [1, 3]);
    }

    #[test]
    fn assign_keeps_shape() {
        let mut parameter = Parameter1::from(arr1(&[0f32; 3]));
        parameter.assign(&arr1(&[1., 2., 3.])).unwrap();
        assert_eq!(parameter.value(), arr1(&[1f32, 2., 3.]));
        assert!(parameter.assign(&arr1(&[1., 2.])).is_err());
    }

    #[test]
    fn into_dyn_into_dimensionality() {
        let mut parameter = Parameter2::from(arr2(&[[1f32], [2.]]));
        parameter.accumulate_grad(&arr2(&[[1.], [1.]])).unwrap();
        let parameter = parameter.into_dyn();
        assert_eq!(parameter.shape(), &[2, 1]);
        let parameter = parameter.into_dimensionality::<Ix2>().unwrap();
        assert_eq!(parameter.grad().unwrap(), arr2(&[[1f32], [1.]]));
        assert!(parameter.into_dyn().into_dimensionality::<Ix1>().is_err());
    }
}
