use crate::nn::layers::nn_layers::{Layer, LayerResult};
use crate::utils::ArrayDynF;

/// Collapses every axis except the batch into one, so convolution outputs
/// can feed dense layers. The output is a copy, never a view.
pub struct FlattenLayer {
    name: String,
}

impl FlattenLayer {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

impl Layer for FlattenLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        if inputs.ndim() < 2 {
            anyhow::bail!("flatten expects a batch dimension, got shape {:?}", inputs.shape());
        }
        let batch = inputs.shape()[0];
        let flat = inputs.shape().iter().skip(1).product::<usize>();
        Ok(inputs.to_owned().into_shape((batch, flat))?.into_dyn())
    }

    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult {
        if in_grads.len() != inputs.len() || in_grads.shape()[0] != inputs.shape()[0] {
            anyhow::bail!(
                "gradient shape {:?} doesn't match flattened inputs {:?}",
                in_grads.shape(), inputs.shape()
            );
        }
        Ok(in_grads.to_owned().into_shape(inputs.raw_dim())?)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, stack, Axis};
    use ndarray_rand::rand_distr::Normal;
    use ndarray_rand::RandomExt;
    use crate::utils::{arrays_almost_equal, Array4F};
    use super::*;

    #[test]
    fn test_forward() {
        let mut layer = FlattenLayer::new("flatten");
        let inputs = stack![
            Axis(0),
            array![[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]
        ]
        .into_dyn();

        let outputs = layer.forward(&inputs).unwrap();
        let expected = array![[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]].into_dyn();
        assert_eq!(outputs, expected);
    }

    #[test]
    fn test_round_trip_restores_shape_and_values() {
        let dist = Normal::new(0.0, 1.0).unwrap();
        let inputs = Array4F::random((3, 2, 4, 5), &dist).into_dyn();

        let mut layer = FlattenLayer::new("flatten");
        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs.shape(), &[3, 40]);

        let back = layer.backward(&outputs, &inputs).unwrap();
        assert_eq!(back.shape(), inputs.shape());
        assert!(arrays_almost_equal(&inputs, &back));
    }

    #[test]
    fn test_backward_rejects_mismatched_length() {
        let mut layer = FlattenLayer::new("flatten");
        let inputs = Array4F::zeros((1, 2, 2, 2)).into_dyn();
        let bad_grad = array![[1.0, 2.0]].into_dyn();
        assert!(layer.backward(&bad_grad, &inputs).is_err());
    }
}
