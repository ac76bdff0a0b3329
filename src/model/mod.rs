//! Toy model used to exercise the profiler.

pub mod config;
pub mod demo;

pub use config::SimpleModelConfig;
pub use demo::{simple_model, simple_model_seeded};
