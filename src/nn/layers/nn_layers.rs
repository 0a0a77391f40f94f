use std::collections::HashMap;
use crate::utils::{ArrayDynF, GenericResult};

/// Map from `"{prefix}:{layer_name}/{role}"` to a tensor, used both for
/// exporting parameters/gradients and for feeding updated values back in.
pub type ParamMap = HashMap<String, ArrayDynF>;

pub type LayerResult = GenericResult<ArrayDynF>;
pub type EmptyLayerResult = GenericResult<()>;

/// Common contract for all computational layers.
///
/// The driving network calls `forward` on each layer in sequence, caching
/// every layer's input, then calls `backward` in reverse order with the
/// upstream gradient and the originally cached input. `backward` must
/// receive the exact `inputs` of the most recent `forward` call on the same
/// instance: layers with internal scratch state (pooling indices, dropout
/// mask) keep a single slot that is overwritten on every forward, so calls
/// cannot be interleaved across different inputs without re-running forward.
pub trait Layer {
    fn name(&self) -> &str;

    /// Whether this layer owns parameters that an optimizer can update.
    /// Fixed per layer type.
    fn trainable(&self) -> bool {
        false
    }

    /// Toggle training vs inference behavior. Only Dropout differs between
    /// the two modes.
    fn set_mode(&mut self, _training: bool) {}

    /// Compute outputs from `inputs`. May cache internal scratch state
    /// needed by `backward`, but never caches `inputs` itself.
    fn forward(&mut self, inputs: &ArrayDynF) -> LayerResult;

    /// Given the gradient w.r.t. this layer's outputs and the original
    /// forward inputs, return the gradient w.r.t. the inputs. Trainable
    /// layers also overwrite their stored parameter gradients.
    fn backward(&mut self, in_grads: &ArrayDynF, inputs: &ArrayDynF) -> LayerResult;

    /// Replace parameter tensors with the values in `params`, keyed by role
    /// (`weights` / `bias`). No-op for non-trainable layers.
    fn update(&mut self, _params: &ParamMap) -> EmptyLayerResult {
        Ok(())
    }

    /// Export current parameters and their latest gradients, keyed by
    /// `"{prefix}:{name}/{role}"`. `None` for non-trainable layers.
    fn get_params(&self, _prefix: &str) -> Option<(ParamMap, ParamMap)> {
        None
    }
}

pub fn param_key(prefix: &str, name: &str, role: &str) -> String {
    format!("{}:{}/{}", prefix, name, role)
}
