pub mod activation;
pub mod dense_layer;
pub mod dropout_layer;
pub mod filtering;
pub mod flatten_layer;
pub mod nn_layers;
