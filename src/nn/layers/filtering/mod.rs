use ndarray::s;
use crate::Array4F;

pub mod convolution;
pub mod img2col;
pub mod pooling;

pub(crate) fn pad4d(array: Array4F, padding: usize) -> Array4F {
    if padding == 0 {
        return array;
    }
    let shape = array.shape();
    let height = shape[2];
    let width = shape[3];
    let mut result = Array4F::zeros((
        shape[0],
        shape[1],
        height + 2 * padding,
        width + 2 * padding,
    ));
    let mut slice = result.slice_mut(s![
        ..,
        ..,
        padding..height + padding,
        padding..width + padding
    ]);
    slice.assign(&array);
    result
}

pub(crate) fn remove_padding_4d(array: Array4F, padding: usize) -> Array4F {
    if padding == 0 {
        return array;
    }
    let shape = array.shape();
    let height = shape[2] - padding;
    let width = shape[3] - padding;
    array.slice_move(s![.., .., padding..height, padding..width])
}

/// Output spatial size of a sliding window pass:
/// `⌊(in + 2*pad - kernel) / stride⌋ + 1`, per axis.
pub fn out_dims(
    in_height: usize,
    in_width: usize,
    kernel_h: usize,
    kernel_w: usize,
    pad: usize,
    stride: usize,
) -> (usize, usize) {
    (
        (in_height + 2 * pad - kernel_h) / stride + 1,
        (in_width + 2 * pad - kernel_w) / stride + 1,
    )
}
