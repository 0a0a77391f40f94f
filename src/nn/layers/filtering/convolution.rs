use ndarray::Axis;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use crate::nn::layers::filtering::img2col::{col2img, img2col};
use crate::nn::layers::filtering::out_dims;
use crate::nn::layers::nn_layers::{param_key, EmptyLayerResult, Layer, LayerResult, ParamMap};
use crate::utils::{Array1F, Array2F, Array4F, ArrayDynF, GenericResult};

#[derive(Clone, Debug)]
pub struct ConvolutionConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
    pub pad: usize,
}

#[derive(Clone)]
pub enum ConvolutionInit {
    KernelAndBias(Array4F, Array1F),
    HeNormal,
}

/// 2D convolution over `(batch, in_channel, height, width)` inputs, computed
/// as a dense matrix product against the img2col patch matrix. Weights are
/// `(out_channel, in_channel, kernel_h, kernel_w)`, biases `(out_channel)`.
pub struct ConvolutionLayer {
    name: String,
    config: ConvolutionConfig,
    weights: Array4F,
    biases: Array1F,
    weights_grad: Array4F,
    biases_grad: Array1F,
}

impl ConvolutionLayer {
    pub fn new(
        name: &str,
        config: ConvolutionConfig,
        init_mode: ConvolutionInit,
    ) -> GenericResult<Self> {
        if config.stride == 0 {
            anyhow::bail!("convolution stride can't be zero");
        }
        if config.kernel_h == 0 || config.kernel_w == 0 {
            anyhow::bail!("convolution kernel can't be empty");
        }

        let kernel_shape = (
            config.out_channels,
            config.in_channels,
            config.kernel_h,
            config.kernel_w,
        );
        let (weights, biases) = match init_mode {
            ConvolutionInit::KernelAndBias(k, b) => {
                if k.dim() != kernel_shape || b.len() != config.out_channels {
                    anyhow::bail!(
                        "convolution init tensors {:?}/{:?} don't match {:?}",
                        k.shape(), b.shape(), kernel_shape
                    );
                }
                (k, b)
            }
            ConvolutionInit::HeNormal => {
                let fan_in = config.in_channels * config.kernel_h * config.kernel_w;
                let std_dev = (2.0 / fan_in as f64).sqrt();
                let dist = Normal::new(0.0, std_dev)?;
                (
                    Array4F::random(kernel_shape, dist),
                    Array1F::zeros(config.out_channels),
                )
            }
        };

        Ok(Self {
            name: name.to_owned(),
            weights_grad: Array4F::zeros(kernel_shape),
            biases_grad: Array1F::zeros(config.out_channels),
            config,
            weights,
            biases,
        })
    }

    pub fn weights(&self) -> &Array4F {
        &self.weights
    }

    fn checked_dims(&self, inputs: &Array4F) -> GenericResult<(usize, usize, usize, usize, usize, usize)> {
        let [batch, in_channels, in_h, in_w]: [usize; 4] = inputs.shape().try_into()?;
        if in_channels != self.config.in_channels {
            anyhow::bail!(
                "convolution expects {} input channels, got {}",
                self.config.in_channels, in_channels
            );
        }
        if in_h + 2 * self.config.pad < self.config.kernel_h
            || in_w + 2 * self.config.pad < self.config.kernel_w
        {
            anyhow::bail!(
                "convolution kernel {}x{} doesn't fit a padded {:?} input",
                self.config.kernel_h, self.config.kernel_w, inputs.shape()
            );
        }
        let (out_h, out_w) = out_dims(
            in_h, in_w,
            self.config.kernel_h, self.config.kernel_w,
            self.config.pad, self.config.stride,
        );
        Ok((batch, in_h, in_w, out_h, out_w, self.config.out_channels))
    }
}

impl Layer for ConvolutionLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn trainable(&self) -> bool {
        true
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        let ConvolutionConfig { kernel_h, kernel_w, stride, pad, .. } = self.config;
        let inputs: Array4F = inputs.to_owned().into_dimensionality()?;
        let (batch, _, _, out_h, out_w, out_channels) = self.checked_dims(&inputs)?;

        let cols = img2col(&inputs, kernel_h, kernel_w, pad, stride)?;
        let weights_rows = self
            .weights
            .clone()
            .into_shape((out_channels, cols.shape()[0]))?;

        let outputs = weights_rows.dot(&cols) + &self.biases.view().insert_axis(Axis(1));
        let outputs = outputs
            .into_shape((out_channels, out_h, out_w, batch))?
            .permuted_axes([3, 0, 1, 2]);
        Ok(outputs.as_standard_layout().to_owned().into_dyn())
    }

    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult {
        let ConvolutionConfig { in_channels, kernel_h, kernel_w, stride, pad, .. } = self.config;
        let inputs: Array4F = inputs.to_owned().into_dimensionality()?;
        let (batch, in_h, in_w, out_h, out_w, out_channels) = self.checked_dims(&inputs)?;

        let grad: Array4F = in_grads.to_owned().into_dimensionality()?;
        if grad.dim() != (batch, out_channels, out_h, out_w) {
            anyhow::bail!(
                "gradient shape {:?} doesn't match the forward output ({}, {}, {}, {})",
                grad.shape(), batch, out_channels, out_h, out_w
            );
        }

        self.biases_grad = grad
            .sum_axis(Axis(3))
            .sum_axis(Axis(2))
            .sum_axis(Axis(0));

        // Same (out_channel, out_h * out_w * batch) row layout the forward
        // pass produced before its final reshape.
        let grad_rows = grad
            .permuted_axes([1, 2, 3, 0])
            .as_standard_layout()
            .to_owned()
            .into_shape((out_channels, out_h * out_w * batch))?;

        let cols = img2col(&inputs, kernel_h, kernel_w, pad, stride)?;
        self.weights_grad = grad_rows
            .dot(&cols.t())
            .into_shape((out_channels, in_channels, kernel_h, kernel_w))?;

        let weights_rows = self
            .weights
            .clone()
            .into_shape((out_channels, in_channels * kernel_h * kernel_w))?;
        let out_cols: Array2F = weights_rows.t().dot(&grad_rows);

        let out_grads = col2img(
            &out_cols,
            [batch, in_channels, in_h, in_w],
            kernel_h, kernel_w, pad, stride,
        )?;
        Ok(out_grads.into_dyn())
    }

    fn update(&mut self, params: &ParamMap) -> EmptyLayerResult {
        for (key, value) in params {
            if key.contains("weights") {
                let weights: Array4F = value.to_owned().into_dimensionality()?;
                if weights.shape() != self.weights.shape() {
                    anyhow::bail!("updated weights have shape {:?}", weights.shape());
                }
                self.weights = weights;
            } else if key.contains("bias") {
                let biases: Array1F = value.to_owned().into_dimensionality()?;
                if biases.len() != self.config.out_channels {
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
