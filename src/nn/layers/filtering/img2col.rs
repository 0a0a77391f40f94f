use std::ops::AddAssign;
use ndarray::parallel::prelude::*;
use ndarray::{concatenate, s, Axis};
use crate::nn::layers::filtering::{out_dims, pad4d, remove_padding_4d};
use crate::utils::{Array2F, Array4F, GenericResult};

/// Convert a batched image tensor into a matrix of sliding-window patches.
///
/// The input is zero-padded by `pad` on each side of height and width, then
/// every valid `(kernel_h, kernel_w)` window is flattened into one column.
/// Rows run channel-major over the patch (`channel * kernel_h * kernel_w`);
/// columns are ordered output row, then output column, then batch, so the
/// result has shape `(channel * kernel_h * kernel_w, out_h * out_w * batch)`.
pub fn img2col(
    inputs: &Array4F,
    kernel_h: usize,
    kernel_w: usize,
    pad: usize,
    stride: usize,
) -> GenericResult<Array2F> {
    if stride == 0 {
        anyhow::bail!("img2col stride can't be zero");
    }

    let inputs = pad4d(inputs.clone(), pad);
    let [batch, channels, height, width]: [usize; 4] = inputs.shape().try_into()?;
    if batch == 0 || height < kernel_h || width < kernel_w {
        anyhow::bail!(
            "img2col can't extract {}x{} windows from a padded {:?} input",
            kernel_h, kernel_w, inputs.shape()
        );
    }

    let (out_h, out_w) = out_dims(height, width, kernel_h, kernel_w, 0, stride);
    let rows = channels * kernel_h * kernel_w;

    // One (rows, batch) block per window position. Blocks land side by side
    // in position order, which is exactly the column order above.
    let mut blocks = Vec::with_capacity(out_h * out_w);
    (0..out_h * out_w)
        .into_par_iter()
        .map(|o| (o / out_w, o % out_w))
        .map(|(h, w)| {
            let h_offset = h * stride;
            let w_offset = w * stride;
            let patch = inputs.slice(s![
                ..,
                ..,
                h_offset..h_offset + kernel_h,
                w_offset..w_offset + kernel_w
            ]);
            let patch = patch.to_owned().into_shape((batch, rows)).unwrap();
            patch.reversed_axes()
        })
        .collect_into_vec(&mut blocks);

    let mut views = Vec::with_capacity(blocks.len());
    views.extend(blocks.iter().map(|o| o.view()));
    Ok(concatenate(Axis(1), &views)?)
}

/// Adjoint of `img2col`: scatter-accumulate a patch matrix back into image
/// layout. Each column is unflattened and ADDED to its window position in
/// the padded image, so gradients of overlapping windows sum; the padding
/// border is cropped before returning a tensor of `shape`.
pub fn col2img(
    cols: &Array2F,
    shape: [usize; 4],
    kernel_h: usize,
    kernel_w: usize,
    pad: usize,
    stride: usize,
) -> GenericResult<Array4F> {
    if stride == 0 {
        anyhow::bail!("col2img stride can't be zero");
    }

    let [batch, channels, height, width] = shape;
    if height + 2 * pad < kernel_h || width + 2 * pad < kernel_w {
        anyhow::bail!(
            "col2img can't place {}x{} windows into a padded {:?} image",
            kernel_h, kernel_w, shape
        );
    }
    let (out_h, out_w) = out_dims(height, width, kernel_h, kernel_w, pad, stride);
    let rows = channels * kernel_h * kernel_w;
    if cols.shape() != [rows, out_h * out_w * batch] {
        anyhow::bail!(
            "column matrix has shape {:?}, expected [{}, {}] for a {:?} image",
            cols.shape(), rows, out_h * out_w * batch, shape
        );
    }

    let mut padded = Array4F::zeros((batch, channels, height + 2 * pad, width + 2 * pad));
    for h in 0..out_h {
        for w in 0..out_w {
            let start = (h * out_w + w) * batch;
            let block = cols.slice(s![.., start..start + batch]);
            let patch = block
                .t()
                .to_owned()
                .into_shape((batch, channels, kernel_h, kernel_w))?;

            let h_offset = h * stride;
            let w_offset = w * stride;
            padded
                .slice_mut(s![
                    ..,
                    ..,
                    h_offset..h_offset + kernel_h,
                    w_offset..w_offset + kernel_w
                ])
                .add_assign(&patch);
        }
    }

    Ok(remove_padding_4d(padded, pad))
}
