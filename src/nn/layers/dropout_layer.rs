use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use crate::nn::layers::nn_layers::{Layer, LayerResult};
use crate::utils::{ArrayDynF, GenericResult};

/// Inverted dropout: while training, each element is kept with probability
/// `1 - ratio` and scaled by `1 / (1 - ratio)`, so no rescaling is needed at
/// inference time. The mask is stored on the instance and reused verbatim by
/// the next backward call.
pub struct DropoutLayer {
    name: String,
    ratio: f64,
    seed: Option<u64>,
    training: bool,
    mask: Option<ArrayDynF>,
}

impl DropoutLayer {
    pub fn new(name: &str, ratio: f64, seed: Option<u64>) -> GenericResult<Self> {
        if !(0.0..1.0).contains(&ratio) {
            anyhow::bail!("dropout ratio must be in [0, 1), got {}", ratio);
        }
        Ok(Self {
            name: name.to_owned(),
            ratio,
            seed,
            training: true,
            mask: None,
        })
    }
}

impl Layer for DropoutLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mode(&mut self, training: bool) {
        self.training = training;
    }

    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult {
        if !self.training {
            self.mask = Some(ArrayDynF::ones(inputs.raw_dim()));
            return Ok(inputs.to_owned());
        }

        let ratio = self.ratio;
        let keep_scale = 1.0 / (1.0 - ratio);
        let dist = Uniform::new(0.0, 1.0);
        let mask = match self.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                ArrayDynF::random_using(inputs.raw_dim(), dist, &mut rng)
            }
            None => ArrayDynF::random(inputs.raw_dim(), dist),
        }
        .mapv_into(|o| if o < ratio { 0.0 } else { keep_scale });

        let outputs = inputs * &mask;
        self.mask = Some(mask);
        Ok(outputs)
    }

    fn backward(&mut self, in_grads: &ArrayDynF, _inputs: &ArrayDynF) -> LayerResult {
        let mask = self
            .mask
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("dropout backward called before any forward"))?;
        if mask.shape() != in_grads.shape() {
            anyhow::bail!(
                "gradient shape {:?} doesn't match the mask shape {:?} of the last forward",
                in_grads.shape(), mask.shape()
            );
        }
        Ok(in_grads * mask)
    }
}
