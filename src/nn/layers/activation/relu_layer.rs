use crate::nn::layers::nn_layers::{Layer, LayerResult};
use crate::utils::ArrayDynF;

pub struct ReluLayer {
    name: String,
}

impl ReluLayer {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_owned() }
    }
}

impl Layer for ReluLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        Ok(inputs.mapv(|o| o.max(0.0)))
    }

    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult {
        if in_grads.shape() != inputs.shape() {
            anyhow::bail!(
                "gradient shape {:?} doesn't match input shape {:?}",
                in_grads.shape(), inputs.shape()
            );
        }

        // Gradient is routed where the pre-activation input was >= 0. The
        // inclusive boundary at exactly zero is a fixed convention.
        Ok(in_grads * &inputs.mapv(|o| if o >= 0.0 { 1.0 } else { 0.0 }))
    }
}
