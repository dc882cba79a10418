//! Data read from one dataset entry, before and after preprocessing

use crate::error::{CocosnetError, Result};
use candle_core::Tensor;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// identifier of a sample: the file names of its data slots, in slot order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(pub Vec<String>);

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// semantic segmentation mask, one class label per pixel, row major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    width: usize,
    height: usize,
    labels: Vec<u32>,
}

impl LabelMap {
    pub fn new(width: usize, height: usize, labels: Vec<u32>) -> Result<Self> {
        if labels.len() != width * height {
            return Err(CocosnetError::ShapeMismatch(format!(
                "label map of {}x{} needs {} labels, got {}",
                width,
                height,
                width * height,
                labels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> u32) -> Self {
        let mut labels = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                labels.push(f(row, col));
            }
        }
        Self {
            width,
            height,
            labels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.labels[row * self.width + col]
    }
}

/// 8 bit, 3 channel image stored in blue-green-red order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl BgrImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CocosnetError::ShapeMismatch(format!(
                "bgr image of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image
            .pixels()
            .flat_map(|p| [p.0[2], p.0[1], p.0[0]])
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// swap the channel order back to red-green-blue
    pub fn to_rgb(&self) -> RgbImage {
        let data = self
            .data
            .chunks_exact(3)
            .flat_map(|p| [p[2], p[1], p[0]])
            .collect();
        // the buffer length is checked on construction
        RgbImage::from_raw(self.width, self.height, data).unwrap_or_default()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }
}

/// what a data slot of a sample is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Mask,
    Image,
}

impl SlotKind {
    /// even slots carry semantic masks, odd slots carry reference images
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::Mask
        } else {
            Self::Image
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mask => write!(f, "mask"),
            Self::Image => write!(f, "image"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum InputData {
    Mask(LabelMap),
    Image(BgrImage),
    Tensor(Tensor),
}

impl InputData {
    pub fn kind(&self) -> Option<SlotKind> {
        match self {
            Self::Mask(_) => Some(SlotKind::Mask),
            Self::Image(_) => Some(SlotKind::Image),
            Self::Tensor(_) => None,
        }
    }

    /// (width, height) of the raw data
    pub fn size(&self) -> Option<(u32, u32)> {
        match self {
            Self::Mask(mask) => Some((mask.width() as u32, mask.height() as u32)),
            Self::Image(image) => Some(image.dimensions()),
            Self::Tensor(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub identifier: SampleId,
    pub data: Vec<InputData>,
}

impl SampleData {
    /// check every slot holds the data its position calls for
    pub fn validate_layout(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(CocosnetError::SampleLayout(format!(
                "sample {} has no data",
                self.identifier
            )));
        }
        for (index, data) in self.data.iter().enumerate() {
            let expected = SlotKind::for_index(index);
            match data.kind() {
                Some(kind) if kind == expected => {}
                found => {
                    return Err(CocosnetError::SampleLayout(format!(
                        "slot {} of sample {} should be a {}, found {}",
                        index,
                        self.identifier,
                        expected,
                        found.map(|k| k.to_string()).unwrap_or("tensor".into())
                    )))
                }
            }
        }
        Ok(())
    }
}

/// bookkeeping threaded next to the tensors of one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub identifier: SampleId,
    /// (width, height) of the first slot before preprocessing
    pub image_size: Option<(u32, u32)>,
    pub input_shapes: Vec<Vec<usize>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data: Vec<InputData>) -> SampleData {
        SampleData {
            identifier: SampleId(vec!["a.png".into()]),
            data,
        }
    }

    #[test]
    fn test_bgr_rgb_swap() {
        let rgb = RgbImage::from_raw(1, 1, vec![10, 20, 30]).unwrap();
        let bgr = BgrImage::from_rgb(&rgb);
        assert_eq!(bgr.as_raw(), &[30, 20, 10]);
        assert_eq!(bgr.to_rgb(), rgb);
    }

    #[test]
    fn test_label_map_length_checked() {
        assert!(LabelMap::new(2, 2, vec![0, 1, 2]).is_err());
        let map = LabelMap::new(2, 1, vec![4, 5]).unwrap();
        assert_eq!(map.get(0, 1), 5);
    }

    #[test]
    fn test_validate_layout() {
        let mask = InputData::Mask(LabelMap::from_fn(2, 2, |_, _| 0));
        let image = InputData::Image(BgrImage::new(2, 2, vec![0; 12]).unwrap());
        assert!(sample(vec![mask.clone(), image.clone(), mask.clone()])
            .validate_layout()
            .is_ok());
        assert!(matches!(
            sample(vec![image, mask]).validate_layout(),
            Err(CocosnetError::SampleLayout(_))
        ));
        assert!(sample(vec![]).validate_layout().is_err());
    }
}
