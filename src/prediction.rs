use crate::error::{CocosnetError, Result};
use crate::launcher::NamedTensors;
use crate::sample::SampleId;
use candle_core::{DType, Device, Tensor};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// a tensor copied out of the device, so that it can be serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl StoredTensor {
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        Ok(Self {
            shape: tensor.dims().to_vec(),
            data: tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?,
        })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(self.data.clone(), self.shape.as_slice(), device)?)
    }
}

/// synthesized RGB image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePrediction {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImagePrediction {
    pub fn from_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }

    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or_else(|| {
            CocosnetError::ShapeMismatch(format!(
                "{} bytes cannot fill a {}x{} rgb image",
                self.pixels.len(),
                self.width,
                self.height
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionValue {
    Raw { outputs: BTreeMap<String, StoredTensor> },
    Image(ImagePrediction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub identifier: SampleId,
    pub value: PredictionValue,
}

impl Prediction {
    pub fn from_raw(identifier: SampleId, outputs: &NamedTensors) -> Result<Self> {
        let outputs = outputs
            .iter()
            .map(|(name, tensor)| -> Result<(String, StoredTensor)> {
                Ok((name.clone(), StoredTensor::from_tensor(tensor)?))
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            identifier,
            value: PredictionValue::Raw { outputs },
        })
    }

    pub fn image(&self) -> Result<&ImagePrediction> {
        match &self.value {
            PredictionValue::Image(image) => Ok(image),
            PredictionValue::Raw { .. } => Err(CocosnetError::UnsupportedPrediction(format!(
                "prediction for {} holds raw tensors, configure an image adapter",
                self.identifier
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_raw_prediction_keeps_shapes() -> Result<()> {
        let tensor = Tensor::arange(0f32, 6., &Device::Cpu)?.reshape((1, 2, 3))?;
        let outputs = HashMap::from([("out".to_string(), tensor)]);
        let prediction = Prediction::from_raw(SampleId(vec!["x".into()]), &outputs)?;
        let PredictionValue::Raw { outputs } = &prediction.value else {
            panic!("expected raw prediction");
        };
        assert_eq!(outputs["out"].shape, vec![1, 2, 3]);
        let restored = outputs["out"].to_tensor(&Device::Cpu)?;
        assert_eq!(restored.to_vec3::<f32>()?[0][1], vec![3., 4., 5.]);
        assert!(prediction.image().is_err());
        Ok(())
    }

    #[test]
    fn test_image_prediction_checks_size() {
        let bad = ImagePrediction {
            width: 2,
            height: 2,
            pixels: vec![0; 5],
        };
        assert!(bad.to_image().is_err());
    }
}
