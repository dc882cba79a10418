use crate::error::{CocosnetError, Result};
use crate::sample::{BgrImage, LabelMap};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use log::debug;

/// spatial size both stages are fed with
pub const INPUT_SIZE: usize = 256;

/// ADE20K classes, including the unlabeled class 0
pub const NUM_CLASSES: usize = 151;

const PIXEL_MEAN: f64 = 127.5;
const PIXEL_SCALE: f64 = 127.5;

/// resizes a semantic mask and expands it into a one-hot tensor of shape
/// `(1, num_classes, size, size)`
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct MaskPreprocessor {
    pub size: usize,
    pub num_classes: usize,
}

impl Default for MaskPreprocessor {
    fn default() -> Self {
        Self {
            size: INPUT_SIZE,
            num_classes: NUM_CLASSES,
        }
    }
}

impl MaskPreprocessor {
    pub fn process(&self, mask: &LabelMap, device: &Device) -> Result<Tensor> {
        let resized = resize_nearest(mask, self.size, self.size)?;
        let one_hot = scatter(&resized, self.num_classes, device)?;
        debug!(
            "mask {}x{} -> one-hot {:?}",
            mask.width(),
            mask.height(),
            one_hot.dims()
        );
        Ok(one_hot)
    }
}

/// converts a BGR image into a normalized `(3, size, size)` RGB tensor
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ImagePreprocessor {
    pub size: usize,
    pub mean: f64,
    pub scale: f64,
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            size: INPUT_SIZE,
            mean: PIXEL_MEAN,
            scale: PIXEL_SCALE,
        }
    }
}

impl ImagePreprocessor {
    pub fn process(&self, image: &BgrImage, device: &Device) -> Result<Tensor> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(CocosnetError::ShapeMismatch(format!(
                "cannot resize an empty {}x{} image",
                width, height
            )));
        }
        let size = self.size as u32;
        let rgb = image.to_rgb();
        let resized = image::imageops::resize(&rgb, size, size, FilterType::CatmullRom);
        let data = Tensor::from_vec(resized.into_raw(), (self.size, self.size, 3), device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?;
        let tensor = normalize(&data, self.mean, self.scale)?;
        debug!("image {}x{} -> tensor {:?}", width, height, tensor.dims());
        Ok(tensor)
    }
}

/// nearest neighbor resize, picking `floor(dst * src / dst_size)` for every axis
pub fn resize_nearest(mask: &LabelMap, width: usize, height: usize) -> Result<LabelMap> {
    let (src_w, src_h) = (mask.width(), mask.height());
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return Err(CocosnetError::ShapeMismatch(format!(
            "cannot resize a {}x{} mask to {}x{}",
            src_w, src_h, width, height
        )));
    }
    Ok(LabelMap::from_fn(width, height, |row, col| {
        let src_row = usize::min(row * src_h / height, src_h - 1);
        let src_col = usize::min(col * src_w / width, src_w - 1);
        mask.get(src_row, src_col)
    }))
}

/// one-hot encode a label map into `(1, num_classes, height, width)`
pub fn scatter(mask: &LabelMap, num_classes: usize, device: &Device) -> Result<Tensor> {
    let plane = mask.width() * mask.height();
    let mut data = vec![0f32; num_classes * plane];
    for (i, &label) in mask.labels().iter().enumerate() {
        let channel = label as usize;
        if channel >= num_classes {
            return Err(CocosnetError::LabelOutOfRange { label, num_classes });
        }
        data[channel * plane + i] = 1.0;
    }
    Ok(Tensor::from_vec(
        data,
        (1, num_classes, mask.height(), mask.width()),
        device,
    )?)
}

/// `(x - mean) / scale`
pub fn normalize(tensor: &Tensor, mean: f64, scale: f64) -> Result<Tensor> {
    Ok(tensor.affine(1.0 / scale, -mean / scale)?)
}

/// `x * scale + mean`, the inverse of [normalize]
pub fn denormalize(tensor: &Tensor, mean: f64, scale: f64) -> Result<Tensor> {
    Ok(tensor.affine(scale, mean)?)
}
