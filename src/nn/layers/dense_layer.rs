use ndarray::{Axis, Ix2};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use crate::nn::layers::nn_layers::{param_key, EmptyLayerResult, Layer, LayerResult, ParamMap};
use crate::utils::{Array1F, Array2F, ArrayDynF, GenericResult};

#[derive(Clone)]
pub enum DenseInit {
    WeightsAndBiases(Array2F, Array1F),
    Random,
}

/// Fully-connected layer: `outputs = inputs . weights + biases`, with
/// weights shaped `(in_features, out_features)` and inputs shaped
/// `(batch, in_features)`.
pub struct DenseLayer {
    name: String,
    in_features: usize,
    out_features: usize,
    weights: Array2F,
    biases: Array1F,
    weights_grad: Array2F,
    biases_grad: Array1F,
}

impl DenseLayer {
    pub fn new(
        name: &str,
        in_features: usize,
        out_features: usize,
        init_mode: DenseInit,
    ) -> GenericResult<Self> {
        let (weights, biases) = match init_mode {
            DenseInit::WeightsAndBiases(w, b) => {
                if w.shape() != [in_features, out_features] || b.len() != out_features {
                    anyhow::bail!(
                        "dense init tensors {:?}/{:?} don't match ({}, {})",
                        w.shape(), b.shape(), in_features, out_features
                    );
                }
                (w, b)
            }
            DenseInit::Random => {
                let std_dev = (out_features as f64).powf(-0.5);
                let dist = Normal::new(0.0, std_dev)?;
                (
                    Array2F::random((in_features, out_features), dist),
                    Array1F::zeros(out_features),
                )
            }
        };

        Ok(Self {
            name: name.to_owned(),
            in_features,
            out_features,
            weights_grad: Array2F::zeros((in_features, out_features)),
            biases_grad: Array1F::zeros(out_features),
            weights,
            biases,
        })
    }

    pub fn weights(&self) -> &Array2F {
        &self.weights
    }

    pub fn biases(&self) -> &Array1F {
        &self.biases
    }
}

impl Layer for DenseLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn trainable(&self) -> bool {
        true
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        let inputs = inputs.view().into_dimensionality::<Ix2>()?;
        if inputs.shape()[1] != self.in_features {
            anyhow::bail!(
                "dense layer expects {} input features, got {}",
                self.in_features, inputs.shape()[1]
            );
        }

        let outputs = inputs.dot(&self.weights) + &self.biases;
        Ok(outputs.into_dyn())
    }

    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult {
        let inputs = inputs.view().into_dimensionality::<Ix2>()?;
        let grad = in_grads.view().into_dimensionality::<Ix2>()?;
        if grad.shape() != [inputs.shape()[0], self.out_features] {
            anyhow::bail!(
                "gradient shape {:?} doesn't match the forward output ({}, {})",
                grad.shape(), inputs.shape()[0], self.out_features
            );
        }

        self.weights_grad = inputs.t().dot(&grad);
        self.biases_grad = grad.sum_axis(Axis(0));

        let out_grads = grad.dot(&self.weights.t());
        Ok(out_grads.into_dyn())
    }

    fn update(&mut self, params: &ParamMap) -> EmptyLayerResult {
        for (key, value) in params {
            if key.contains("weights") {
                let weights: Array2F = value.to_owned().into_dimensionality()?;
                if weights.shape() != self.weights.shape() {
                    anyhow::bail!("updated weights have shape {:?}", weights.shape());
                }
                self.weights = weights;
            } else if key.contains("bias") {
                let biases: Array1F = value.to_owned().into_dimensionality()?;
                if biases.len() != self.out_features {
                    anyhow::bail!("updated biases have shape {:?}", biases.shape());
                }
                self.biases = biases;
            }
        }
        Ok(())
    }

    fn get_params(&self, prefix: &str) -> Option<(ParamMap, ParamMap)> {
        let mut params = ParamMap::new();
        params.insert(
            param_key(prefix, &self.name, "weights"),
            self.weights.clone().into_dyn(),
        );
        params.insert(
            param_key(prefix, &self.name, "bias"),
            self.biases.clone().into_dyn(),
        );

        let mut grads = ParamMap::new();
        grads.insert(
            param_key(prefix, &self.name, "weights"),
            self.weights_grad.clone().into_dyn(),
        );
        grads.insert(
            param_key(prefix, &self.name, "bias"),
            self.biases_grad.clone().into_dyn(),
        );

        Some((params, grads))
    }
}
