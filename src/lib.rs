pub mod adapter;
pub mod config;
#[cfg(feature = "opencv")]
pub mod convert;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod hf;
pub mod launcher;
pub mod metrics;
pub mod model;
pub mod postprocess;
pub mod prediction;
pub mod preprocess;
pub mod progress;
pub mod reader;
pub mod sample;

pub use error::Result;
