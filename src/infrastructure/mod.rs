pub mod catalog;
pub mod config;
pub mod gpu;
pub mod wgml_engine;
