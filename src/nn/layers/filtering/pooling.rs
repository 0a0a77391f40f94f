use std::str::FromStr;
use ndarray::Axis;
use crate::nn::layers::filtering::img2col::{col2img, img2col};
use crate::nn::layers::filtering::out_dims;
use crate::nn::layers::nn_layers::{Layer, LayerResult};
use crate::utils::{Array1F, Array2F, Array4F, ArrayDynF, GenericResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolType {
    Max,
    Avg,
}

impl FromStr for PoolType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "max" => Ok(PoolType::Max),
            "avg" => Ok(PoolType::Avg),
            other => Err(anyhow::anyhow!("pool type '{}' is not supported", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolingConfig {
    pub pool_type: PoolType,
    pub pool_h: usize,
    pub pool_w: usize,
    pub stride: usize,
    pub pad: usize,
}

// Per-forward-call routing state, consumed by the next backward call.
enum PoolCache {
    Max { max_idx: Vec<usize> },
    Avg { columns: usize },
}

/// Max/avg pooling. Each channel is treated as an independent single-channel
/// image so the window extraction reuses img2col unchanged; the reduction
/// runs per column of the patch matrix.
///
/// The instance holds a single cache slot between forward and backward, so
/// forward/backward pairs must be strictly sequential per instance, and
/// backward consumes the slot of the matching forward call.
pub struct PoolingLayer {
    name: String,
    config: PoolingConfig,
    cache: Option<PoolCache>,
}

impl PoolingLayer {
    pub fn new(name: &str, config: PoolingConfig) -> GenericResult<Self> {
        if config.stride == 0 {
            anyhow::bail!("pooling stride can't be zero");
        }
        if config.pool_h == 0 || config.pool_w == 0 {
            anyhow::bail!("pooling window can't be empty");
        }
        Ok(Self {
            name: name.to_owned(),
            config,
            cache: None,
        })
    }
}

impl Layer for PoolingLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        let PoolingConfig { pool_type, pool_h, pool_w, stride, pad } = self.config;
        let inputs: Array4F = inputs.to_owned().into_dimensionality()?;
        let [batch, channels, in_h, in_w]: [usize; 4] = inputs.shape().try_into()?;
        if in_h + 2 * pad < pool_h || in_w + 2 * pad < pool_w {
            anyhow::bail!(
                "pooling window {}x{} doesn't fit a padded {:?} input",
                pool_h, pool_w, inputs.shape()
            );
        }
        let (out_h, out_w) = out_dims(in_h, in_w, pool_h, pool_w, pad, stride);

        let reshaped = inputs.into_shape((batch * channels, 1, in_h, in_w))?;
        let cols = img2col(&reshaped, pool_h, pool_w, pad, stride)?;

        let (outputs, cache) = match pool_type {
            PoolType::Max => {
                let mut max_idx = Vec::with_capacity(cols.ncols());
                let mut values = Array1F::zeros(cols.ncols());
                for (col, column) in cols.axis_iter(Axis(1)).enumerate() {
                    // First occurrence wins on ties.
                    let mut best = (0, f64::NEG_INFINITY);
                    for (row, &value) in column.iter().enumerate() {
                        if value > best.1 {
                            best = (row, value);
                        }
                    }
                    max_idx.push(best.0);
                    values[col] = best.1;
                }
                (values, PoolCache::Max { max_idx })
            }
            PoolType::Avg => {
                let values = cols
                    .mean_axis(Axis(0))
                    .ok_or_else(|| anyhow::anyhow!("pooling window can't be empty"))?;
                let columns = cols.ncols();
                (values, PoolCache::Avg { columns })
            }
        };
        self.cache = Some(cache);

        let outputs = outputs
            .into_shape((out_h, out_w, batch, channels))?
            .permuted_axes([2, 3, 0, 1]);
        Ok(outputs.as_standard_layout().to_owned().into_dyn())
    }

    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult {
        let PoolingConfig { pool_h, pool_w, stride, pad, .. } = self.config;
        let cache = self
            .cache
            .take()
            .ok_or_else(|| anyhow::anyhow!("pooling backward called before any forward"))?;

        let inputs: Array4F = inputs.to_owned().into_dimensionality()?;
        let [batch, channels, in_h, in_w]: [usize; 4] = inputs.shape().try_into()?;
        if in_h + 2 * pad < pool_h || in_w + 2 * pad < pool_w {
            anyhow::bail!(
                "pooling window {}x{} doesn't fit a padded {:?} input",
                pool_h, pool_w, inputs.shape()
            );
        }
        let (out_h, out_w) = out_dims(in_h, in_w, pool_h, pool_w, pad, stride);

        let grad: Array4F = in_grads.to_owned().into_dimensionality()?;
        if grad.dim() != (batch, channels, out_h, out_w) {
            anyhow::bail!(
                "gradient shape {:?} doesn't match the forward output ({}, {}, {}, {})",
                grad.shape(), batch, channels, out_h, out_w
            );
        }

        let window = pool_h * pool_w;
        let columns = out_h * out_w * batch * channels;
        // Same flattening the forward reduction used: out_h, out_w, batch,
        // channel, one upstream value per column.
        let grad_flat = grad
            .permuted_axes([2, 3, 0, 1])
            .as_standard_layout()
            .to_owned()
            .into_shape(columns)?;

        let mut cols = Array2F::zeros((window, columns));
        match cache {
            PoolCache::Max { max_idx } => {
                if max_idx.len() != columns {
                    anyhow::bail!(
                        "pooling cache holds {} columns but the inputs imply {}; \
                         backward must follow the matching forward",
                        max_idx.len(), columns
                    );
                }
                for (col, &row) in max_idx.iter().enumerate() {
                    cols[(row, col)] = grad_flat[col];
                }
            }
            PoolCache::Avg { columns: cached_columns } => {
                if cached_columns != columns {
                    anyhow::bail!(
                        "pooling cache holds {} columns but the inputs imply {}; \
                         backward must follow the matching forward",
                        cached_columns, columns
                    );
                }
                // The forward mean contributes 1/window per element.
                for (col, &value) in grad_flat.iter().enumerate() {
                    cols.column_mut(col).fill(value / window as f64);
                }
            }
        }

        let out_grads = col2img(
            &cols,
            [batch * channels, 1, in_h, in_w],
            pool_h, pool_w, pad, stride,
        )?;
        // The padding crop leaves a non-contiguous array; normalize before
        // reshaping back to (batch, channel, height, width).
        let out_grads = out_grads.as_standard_layout().to_owned();
        Ok(out_grads.into_shape((batch, channels, in_h, in_w))?.into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{array, stack, Axis};
    use crate::utils::{arrays_almost_equal, Array3F};
    use super::*;

    fn get_config(pool_type: PoolType) -> PoolingConfig {
        PoolingConfig {
            pool_type,
            pool_h: 2,
            pool_w: 2,
            stride: 2,
            pad: 0,
        }
    }

    fn create_inputs() -> ArrayDynF {
        let arr: Array3F = array![
            [
                [1.0, 2.0, 3.0, 4.0],
                [5.0, 6.0, 7.0, 8.0],
                [9.0, 10.0, 11.0, 12.0],
                [-8.0, 0.0, 0.0, 4.0]
            ],
            [
                [-1.0, 3.0, -5.0, 1.0],
                [2.0, 4.0, -99.0, 32.0],
                [16.0, 69.0, -69.0, 1.0],
                [-8.0, 0.0, 0.0, 4.0]
            ]
        ];
        stack![Axis(0), arr].into_dyn()
    }

    fn create_max_outputs() -> ArrayDynF {
        let result: Array3F = array![
            [
                [6.0, 8.0],
                [10.0, 12.0]
            ],
            [
                [4.0, 32.0],
                [69.0, 4.0]
            ]
        ];
        stack![Axis(0), result].into_dyn()
    }

    #[test]
    fn test_max_forward_2x2() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let outputs = layer.forward(&create_inputs()).unwrap();
        assert_eq!(create_max_outputs(), outputs);
    }

    #[test]
    fn test_max_backward_2x2() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let inputs = create_inputs();
        layer.forward(&inputs).unwrap();

        let grad = create_max_outputs() * -0.7;
        let expected: Array3F = array![
            [
                [0.0, 0.0, 0.0, 0.0],
                [0.0, -4.2, 0.0, -5.6],
                [0.0, -7.0, 0.0, -8.4],
                [0.0, 0.0, 0.0, 0.0]
            ],
            [
                [0.0, 0.0, 0.0, 0.0],
                [0.0, -2.8, 0.0, -22.4],
                [0.0, -48.3, 0.0, 0.0],
                [0.0, 0.0, 0.0, -2.8]
            ]
        ];
        let expected = stack![Axis(0), expected].into_dyn();

        let out_grads = layer.backward(&grad, &inputs).unwrap();
        assert!(arrays_almost_equal(&expected, &out_grads));
    }

    #[test]
    fn test_max_single_window_routes_to_argmax() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let inputs = stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn();

        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs, stack![Axis(0), array![[[4.0]]]].into_dyn());

        let grad = stack![Axis(0), array![[[1.0]]]].into_dyn();
        let out_grads = layer.backward(&grad, &inputs).unwrap();
        let expected = stack![Axis(0), array![[[0.0, 0.0], [0.0, 1.0]]]].into_dyn();
        assert_eq!(out_grads, expected);
    }

    #[test]
    fn test_max_ties_route_to_first_occurrence() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let inputs = stack![Axis(0), array![[[5.0, 5.0], [5.0, 5.0]]]].into_dyn();
        layer.forward(&inputs).unwrap();

        let grad = stack![Axis(0), array![[[2.0]]]].into_dyn();
        let out_grads = layer.backward(&grad, &inputs).unwrap();
        let expected = stack![Axis(0), array![[[2.0, 0.0], [0.0, 0.0]]]].into_dyn();
        assert_eq!(out_grads, expected);
    }

    #[test]
    fn test_avg_forward_and_backward() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Avg)).unwrap();
        let inputs = stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn();

        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs, stack![Axis(0), array![[[2.5]]]].into_dyn());

        let grad = stack![Axis(0), array![[[2.0]]]].into_dyn();
        let out_grads = layer.backward(&grad, &inputs).unwrap();
        let expected = stack![Axis(0), array![[[0.5, 0.5], [0.5, 0.5]]]].into_dyn();
        assert!(arrays_almost_equal(&expected, &out_grads));
    }

    #[test]
    fn test_max_forward_and_backward_with_padding() {
        // 2x2 windows at stride 2 with pad 1 tile the padded 4x4 plane, so
        // each window holds exactly one real pixel and the rest is padding.
        let config = PoolingConfig { pad: 1, ..get_config(PoolType::Max) };
        let mut layer = PoolingLayer::new("pooling", config).unwrap();
        let inputs = stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn();

        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs, stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn());

        let grad = stack![Axis(0), array![[[10.0, 20.0], [30.0, 40.0]]]].into_dyn();
        let out_grads = layer.backward(&grad, &inputs).unwrap();
        let expected = stack![Axis(0), array![[[10.0, 20.0], [30.0, 40.0]]]].into_dyn();
        assert!(arrays_almost_equal(&expected, &out_grads));
    }

    #[test]
    fn test_avg_backward_with_padding() {
        let config = PoolingConfig { pad: 1, ..get_config(PoolType::Avg) };
        let mut layer = PoolingLayer::new("pooling", config).unwrap();
        let inputs = stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn();
        layer.forward(&inputs).unwrap();

        // Each real pixel sits in one window of four cells; the other three
        // quarters of the spread gradient land in the cropped border.
        let grad = stack![Axis(0), array![[[4.0, 8.0], [12.0, 16.0]]]].into_dyn();
        let out_grads = layer.backward(&grad, &inputs).unwrap();
        let expected = stack![Axis(0), array![[[1.0, 2.0], [3.0, 4.0]]]].into_dyn();
        assert!(arrays_almost_equal(&expected, &out_grads));
    }

    #[test]
    fn test_backward_before_forward_fails() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let inputs = create_inputs();
        let grad = create_max_outputs();
        assert!(layer.backward(&grad, &inputs).is_err());
    }

    #[test]
    fn test_cache_is_consumed_by_backward() {
        let mut layer = PoolingLayer::new("pooling", get_config(PoolType::Max)).unwrap();
        let inputs = create_inputs();
        let grad = create_max_outputs();

        layer.forward(&inputs).unwrap();
        layer.backward(&grad, &inputs).unwrap();
        assert!(layer.backward(&grad, &inputs).is_err());
    }

    #[test]
    fn test_pool_type_from_str() {
        assert_eq!(PoolType::from_str("max").unwrap(), PoolType::Max);
        assert_eq!(PoolType::from_str("avg").unwrap(), PoolType::Avg);
        assert!(PoolType::from_str("median").is_err());
    }

    #[test]
    fn test_rejects_zero_stride() {
        let config = PoolingConfig { stride: 0, ..get_config(PoolType::Max) };
        assert!(PoolingLayer::new("pooling", config).is_err());
    }
}
