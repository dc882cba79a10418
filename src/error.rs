use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CocosnetError {
    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCVError(#[from] opencv::Error),
    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Json deser error: {0}")]
    JsonDeserError(#[from] serde_json::Error),
    #[error("Hugging Face Hub error: {0}")]
    ApiError(#[from] hf_hub::api::sync::ApiError),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange { label: u32, num_classes: usize },
    #[error("Sample layout error: {0}")]
    SampleLayout(String),
    #[error("unknown tensor '{0}'")]
    UnknownTensor(String),
    #[error("{0} network has been released")]
    NetworkReleased(&'static str),
    #[error("Unsupported prediction: {0}")]
    UnsupportedPrediction(String),
}

impl CocosnetError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CocosnetError>;
