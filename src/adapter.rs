//! Adapters turn raw generator outputs into predictions

use crate::config::ComponentSpec;
use crate::error::{CocosnetError, Result};
use crate::launcher::NamedTensors;
use crate::prediction::{ImagePrediction, Prediction, PredictionValue};
use crate::sample::{SampleId, SampleMeta};
use candle_core::DType;
use image::RgbImage;
use serde_json::Value;

pub trait Adapter {
    fn name(&self) -> &'static str;

    /// the generator output this adapter reads
    fn set_output_blob(&mut self, output_blob: &str);

    fn process(
        &self,
        raw: &[NamedTensors],
        identifiers: &[SampleId],
        meta: &[SampleMeta],
    ) -> Result<Vec<Prediction>>;
}

/// keeps every output tensor as is
#[derive(Debug, Default)]
pub struct RawAdapter;

impl RawAdapter {
    fn from_spec(_spec: &ComponentSpec) -> Result<Box<dyn Adapter>> {
        Ok(Box::new(Self))
    }
}

impl Adapter for RawAdapter {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn set_output_blob(&mut self, _output_blob: &str) {}

    fn process(
        &self,
        raw: &[NamedTensors],
        identifiers: &[SampleId],
        _meta: &[SampleMeta],
    ) -> Result<Vec<Prediction>> {
        raw.iter()
            .zip(identifiers)
            .map(|(outputs, id)| Prediction::from_raw(id.clone(), outputs))
            .collect()
    }
}

/// converts a `(1, 3, H, W)` output in `[-1, 1]` back to an 8 bit RGB image
#[derive(Debug, Clone)]
pub struct ImageProcessingAdapter {
    output_blob: Option<String>,
    mean: f64,
    std: f64,
    reverse_channels: bool,
}

impl Default for ImageProcessingAdapter {
    fn default() -> Self {
        Self {
            output_blob: None,
            mean: 127.5,
            std: 127.5,
            reverse_channels: false,
        }
    }
}

impl ImageProcessingAdapter {
    fn from_spec(spec: &ComponentSpec) -> Result<Box<dyn Adapter>> {
        let defaults = Self::default();
        Ok(Box::new(Self {
            output_blob: spec.param("output_blob")?,
            mean: spec.param("mean")?.unwrap_or(defaults.mean),
            std: spec.param("std")?.unwrap_or(defaults.std),
            reverse_channels: spec.param("reverse_channels")?.unwrap_or(false),
        }))
    }

    fn to_image(&self, outputs: &NamedTensors) -> Result<ImagePrediction> {
        let output_blob = self
            .output_blob
            .as_deref()
            .ok_or_else(|| CocosnetError::config("image_processing adapter has no output blob"))?;
        let tensor = outputs
            .get(output_blob)
            .ok_or_else(|| CocosnetError::UnknownTensor(output_blob.to_string()))?;
        let (batch, channels, height, width) = tensor.dims4()?;
        if batch != 1 || channels != 3 {
            return Err(CocosnetError::ShapeMismatch(format!(
                "expected a (1, 3, H, W) image output, got {:?}",
                tensor.dims()
            )));
        }
        let mut pixels = tensor
            .squeeze(0)?
            .affine(self.std, self.mean)?
            .clamp(0f32, 255f32)?
            .round()?
            .permute((1, 2, 0))?
            .to_dtype(DType::U8)?
            .flatten_all()?
            .to_vec1::<u8>()?;
        if self.reverse_channels {
            pixels.chunks_exact_mut(3).for_each(|p| p.swap(0, 2));
        }
        let image = RgbImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
            CocosnetError::ShapeMismatch(format!("cannot build a {}x{} image", width, height))
        })?;
        Ok(ImagePrediction::from_image(image))
    }
}

impl Adapter for ImageProcessingAdapter {
    fn name(&self) -> &'static str {
        "image_processing"
    }

    fn set_output_blob(&mut self, output_blob: &str) {
        if self.output_blob.is_none() {
            self.output_blob = Some(output_blob.to_string());
        }
    }

    fn process(
        &self,
        raw: &[NamedTensors],
        identifiers: &[SampleId],
        _meta: &[SampleMeta],
    ) -> Result<Vec<Prediction>> {
        raw.iter()
            .zip(identifiers)
            .map(|(outputs, id)| -> Result<Prediction> {
                Ok(Prediction {
                    identifier: id.clone(),
                    value: PredictionValue::Image(self.to_image(outputs)?),
                })
            })
            .collect()
    }
}

type AdapterFactory = fn(&ComponentSpec) -> Result<Box<dyn Adapter>>;

const ADAPTERS: &[(&str, AdapterFactory)] = &[
    ("image_processing", ImageProcessingAdapter::from_spec),
    ("raw", RawAdapter::from_spec),
];

/// build the adapter named by a string or a `{"type": ...}` map
pub fn create_adapter(config: &Value) -> Result<Box<dyn Adapter>> {
    let spec = ComponentSpec::from_value("adapter", config)?;
    let (_, factory) = ADAPTERS
        .iter()
        .find(|(name, _)| *name == spec.kind)
        .ok_or_else(|| CocosnetError::config(format!("unknown adapter '{}'", spec.kind)))?;
    factory(&spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use serde_json::json;
    use std::collections::HashMap;

    fn outputs() -> NamedTensors {
        // red at -1, green at 0, blue at 1
        let data: Vec<f32> = [-1f32, 0., 1.]
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(4))
            .collect();
        let tensor = Tensor::from_vec(data, (1, 3, 2, 2), &Device::Cpu).unwrap();
        HashMap::from([("image".to_string(), tensor)])
    }

    fn ids() -> Vec<SampleId> {
        vec![SampleId(vec!["a".into()])]
    }

    #[test]
    fn test_image_processing_adapter() {
        let mut adapter = create_adapter(&json!("image_processing")).unwrap();
        assert_eq!(adapter.name(), "image_processing");
        adapter.set_output_blob("image");
        let predictions = adapter.process(&[outputs()], &ids(), &[]).unwrap();
        assert_eq!(predictions.len(), 1);
        let image = predictions[0].image().unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert_eq!(&image.pixels[..3], &[0, 128, 255]);
    }

    #[test]
    fn test_reverse_channels() {
        let mut adapter =
            create_adapter(&json!({"type": "image_processing", "reverse_channels": true})).unwrap();
        adapter.set_output_blob("image");
        let predictions = adapter.process(&[outputs()], &ids(), &[]).unwrap();
        assert_eq!(&predictions[0].image().unwrap().pixels[..3], &[255, 128, 0]);
    }

    #[test]
    fn test_configured_blob_wins() {
        let mut adapter =
            create_adapter(&json!({"type": "image_processing", "output_blob": "other"})).unwrap();
        adapter.set_output_blob("image");
        assert!(matches!(
            adapter.process(&[outputs()], &ids(), &[]),
            Err(CocosnetError::UnknownTensor(name)) if name == "other"
        ));
    }

    #[test]
    fn test_raw_adapter() {
        let adapter = create_adapter(&json!({"type": "raw"})).unwrap();
        let predictions = adapter.process(&[outputs()], &ids(), &[]).unwrap();
        assert!(matches!(predictions[0].value, PredictionValue::Raw { .. }));
    }

    #[test]
    fn test_unknown_adapter() {
        assert!(matches!(
            create_adapter(&json!("super_resolution")),
            Err(CocosnetError::ConfigError(_))
        ));
        assert!(create_adapter(&json!(3)).is_err());
    }
}
