use convnet::nn::layers::filtering::convolution::{ConvolutionConfig, ConvolutionInit, ConvolutionLayer};
use convnet::nn::layers::filtering::img2col::img2col;
use convnet::nn::layers::nn_layers::Layer;
use convnet::utils::Array4F;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;

use criterion::*;

fn criterion_benchmark(c: &mut Criterion) {
    let dist = Normal::new(0.0, 1.0).unwrap();
    let inputs = Array4F::random((16, 8, 28, 28), &dist);

    c.bench_function("img2col 28x28~8", |b| {
        b.iter(|| img2col(&inputs, 3, 3, 1, 1).unwrap())
    });

    let config = ConvolutionConfig {
        in_channels: 8,
        out_channels: 16,
        kernel_h: 3,
        kernel_w: 3,
        stride: 1,
        pad: 1,
    };
    let mut layer = ConvolutionLayer::new("conv", config, ConvolutionInit::HeNormal).unwrap();
    let inputs = inputs.into_dyn();

    c.bench_function("conv 28x28~16 forward", |b| {
        b.iter(|| layer.forward(&inputs).unwrap())
    });

    let grad = Array4F::random((16, 16, 28, 28), &dist).into_dyn();
    c.bench_function("conv 28x28~16 backward", |b| {
        b.iter(|| layer.backward(&grad, &inputs).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
