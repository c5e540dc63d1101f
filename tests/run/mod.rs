pub mod config_layers;
pub mod pipeline;
