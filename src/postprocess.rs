use crate::dataset::Annotation;
use crate::error::{CocosnetError, Result};
use crate::prediction::{ImagePrediction, Prediction, PredictionValue};
use crate::sample::SampleMeta;
use image::imageops::{self, FilterType};
use image::RgbImage;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostprocessorConfig {
    /// bring the prediction to the size of its target
    ResizePrediction,
    /// bring the target to the size of its prediction
    ResizeTarget,
}

#[derive(Debug, Clone, Default)]
pub struct PostprocessingExecutor {
    processors: Vec<PostprocessorConfig>,
}

impl PostprocessingExecutor {
    pub fn new(processors: Vec<PostprocessorConfig>) -> Self {
        Self { processors }
    }

    pub fn has_processors(&self) -> bool {
        !self.processors.is_empty()
    }

    /// apply every processor in order to each (annotation, prediction) pair
    pub fn process_batch(
        &self,
        mut annotations: Vec<Annotation>,
        mut predictions: Vec<Prediction>,
        _meta: &[SampleMeta],
    ) -> Result<(Vec<Annotation>, Vec<Prediction>)> {
        if annotations.len() != predictions.len() {
            return Err(CocosnetError::SampleLayout(format!(
                "{} annotations for {} predictions",
                annotations.len(),
                predictions.len()
            )));
        }
        for processor in &self.processors {
            for (annotation, prediction) in annotations.iter_mut().zip(predictions.iter_mut()) {
                match processor {
                    PostprocessorConfig::ResizePrediction => {
                        let (width, height) = annotation.target()?.dimensions();
                        resize_prediction(prediction, width, height)?;
                    }
                    PostprocessorConfig::ResizeTarget => {
                        let image = prediction.image()?;
                        let (width, height) = (image.width, image.height);
                        let target = annotation.target()?;
                        if target.dimensions() != (width, height) {
                            debug!(
                                "resizing target of {} to {}x{}",
                                annotation.identifier, width, height
                            );
                            annotation.target =
                                Some(imageops::resize(target, width, height, FilterType::CatmullRom));
                        }
                    }
                }
            }
        }
        Ok((annotations, predictions))
    }
}

fn resize_prediction(prediction: &mut Prediction, width: u32, height: u32) -> Result<()> {
    let image = prediction.image()?;
    if (image.width, image.height) == (width, height) {
        return Ok(());
    }
    debug!(
        "resizing prediction of {} from {}x{} to {}x{}",
        prediction.identifier, image.width, image.height, width, height
    );
    let resized = imageops::resize(&image.to_image()?, width, height, FilterType::CatmullRom);
    prediction.value = PredictionValue::Image(ImagePrediction::from_image(resized));
    Ok(())
}

/// save a synthesized image, the format follows the file extension
pub fn save_image<P: AsRef<Path>>(image: &ImagePrediction, output_path: P) -> Result<()> {
    let image: RgbImage = image.to_image()?;
    image.save(output_path)?;
    Ok(())
}
