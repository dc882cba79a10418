//! Data readers load the raw slots of a sample from the data source

use crate::config::ComponentSpec;
use crate::error::{CocosnetError, Result};
use crate::sample::{BgrImage, InputData, LabelMap, SampleData, SampleId, SlotKind};
use image::{DynamicImage, RgbImage};
use log::debug;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const DEFAULT_READER: &str = "image_reader";

pub trait DataReader {
    fn name(&self) -> &'static str;

    fn data_source(&self) -> &Path;

    fn read_mask(&self, path: &Path) -> Result<LabelMap>;

    fn read_image(&self, path: &Path) -> Result<BgrImage>;

    /// read every slot named by the identifier, masks on even slots, images on odd
    fn read(&self, identifier: &SampleId) -> Result<SampleData> {
        let data = identifier
            .0
            .iter()
            .enumerate()
            .map(|(index, name)| -> Result<InputData> {
                let path = self.data_source().join(name);
                debug!("reading {} slot {} from {:?}", SlotKind::for_index(index), index, path);
                Ok(match SlotKind::for_index(index) {
                    SlotKind::Mask => InputData::Mask(self.read_mask(&path)?),
                    SlotKind::Image => InputData::Image(self.read_image(&path)?),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SampleData {
            identifier: identifier.clone(),
            data,
        })
    }

    /// read the ground truth image of a sample
    fn read_target(&self, path: &Path) -> Result<RgbImage> {
        Ok(self.read_image(&self.data_source().join(path))?.to_rgb())
    }

    fn reset(&mut self) {}
}

/// reads slots with the `image` crate
#[derive(Debug, Clone)]
pub struct ImageReader {
    data_source: PathBuf,
}

impl ImageReader {
    pub fn new<P: Into<PathBuf>>(data_source: P) -> Self {
        Self {
            data_source: data_source.into(),
        }
    }
}

impl DataReader for ImageReader {
    fn name(&self) -> &'static str {
        DEFAULT_READER
    }

    fn data_source(&self) -> &Path {
        &self.data_source
    }

    fn read_mask(&self, path: &Path) -> Result<LabelMap> {
        let image = image::open(path)?;
        let (width, height) = (image.width() as usize, image.height() as usize);
        let labels = match image {
            DynamicImage::ImageLuma8(buf) => buf.into_raw().into_iter().map(u32::from).collect(),
            DynamicImage::ImageLuma16(buf) => buf.into_raw().into_iter().map(u32::from).collect(),
            other => {
                return Err(CocosnetError::SampleLayout(format!(
                    "mask {:?} must be 8 or 16 bit grayscale, found {:?}",
                    path,
                    other.color()
                )))
            }
        };
        LabelMap::new(width, height, labels)
    }

    fn read_image(&self, path: &Path) -> Result<BgrImage> {
        Ok(BgrImage::from_rgb(&image::open(path)?.to_rgb8()))
    }
}

/// reads slots with OpenCV's imread
#[cfg(feature = "opencv")]
#[derive(Debug, Clone)]
pub struct OpenCvReader {
    data_source: PathBuf,
}

#[cfg(feature = "opencv")]
impl OpenCvReader {
    pub fn new<P: Into<PathBuf>>(data_source: P) -> Self {
        Self {
            data_source: data_source.into(),
        }
    }

    fn imread(path: &Path, flags: i32) -> Result<opencv::core::Mat> {
        use opencv::prelude::MatTraitConst;
        let path_str = path.to_str().ok_or_else(|| {
            CocosnetError::config(format!("path {:?} is not valid unicode", path))
        })?;
        let mat = opencv::imgcodecs::imread(path_str, flags)?;
        if mat.empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("cannot read image {:?}", path),
            )
            .into());
        }
        Ok(mat)
    }
}

#[cfg(feature = "opencv")]
impl DataReader for OpenCvReader {
    fn name(&self) -> &'static str {
        "opencv_imread"
    }

    fn data_source(&self) -> &Path {
        &self.data_source
    }

    fn read_mask(&self, path: &Path) -> Result<LabelMap> {
        let mat = Self::imread(path, opencv::imgcodecs::IMREAD_UNCHANGED)?;
        crate::convert::mat_to_label_map(&mat)
    }

    fn read_image(&self, path: &Path) -> Result<BgrImage> {
        let mat = Self::imread(path, opencv::imgcodecs::IMREAD_COLOR)?;
        crate::convert::mat_to_bgr_image(&mat)
    }
}

/// build the reader named by a string or a `{"type": ...}` map
pub fn create_reader(config: Option<&Value>, data_source: &Path) -> Result<Box<dyn DataReader>> {
    let spec = match config {
        Some(value) => ComponentSpec::from_value("reader", value)?,
        None => ComponentSpec::from_value("reader", &Value::from(DEFAULT_READER))?,
    };
    let data_source = match spec.param::<PathBuf>("data_source")? {
        Some(path) if path.is_relative() => data_source.join(path),
        Some(path) => path,
        None => data_source.to_path_buf(),
    };
    match spec.kind.as_str() {
        DEFAULT_READER => Ok(Box::new(ImageReader::new(data_source))),
        #[cfg(feature = "opencv")]
        "opencv_imread" => Ok(Box::new(OpenCvReader::new(data_source))),
        other => Err(CocosnetError::config(format!("unknown reader '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma, Rgb};
    use serde_json::json;
    use tempdir::TempDir;

    #[test]
    fn test_read_sample() {
        let dir = TempDir::new("reader").unwrap();
        GrayImage::from_fn(4, 3, |x, y| Luma([(x + y) as u8 * 40]))
            .save(dir.path().join("mask.png"))
            .unwrap();
        RgbImage::from_pixel(5, 2, Rgb([1, 2, 3]))
            .save(dir.path().join("ref.png"))
            .unwrap();
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(2, 2, Luma([150]))
            .save(dir.path().join("ref_mask.png"))
            .unwrap();

        let reader = create_reader(Some(&json!("image_reader")), dir.path()).unwrap();
        let id = SampleId(vec!["mask.png".into(), "ref.png".into(), "ref_mask.png".into()]);
        let sample = reader.read(&id).unwrap();
        sample.validate_layout().unwrap();
        assert_eq!(sample.identifier, id);

        let InputData::Mask(mask) = &sample.data[0] else {
            panic!("slot 0 should be a mask");
        };
        assert_eq!((mask.width(), mask.height()), (4, 3));
        assert_eq!(mask.get(2, 3), 200);

        let InputData::Image(image) = &sample.data[1] else {
            panic!("slot 1 should be an image");
        };
        assert_eq!(image.dimensions(), (5, 2));
        assert_eq!(&image.as_raw()[..3], &[3, 2, 1]);

        let InputData::Mask(mask) = &sample.data[2] else {
            panic!("slot 2 should be a mask");
        };
        assert!(mask.labels().iter().all(|&l| l == 150));
    }

    #[test]
    fn test_color_mask_rejected() {
        let dir = TempDir::new("reader").unwrap();
        let path = dir.path().join("mask.png");
        RgbImage::from_pixel(4, 4, Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();
        let reader = ImageReader::new(dir.path());
        assert!(matches!(
            reader.read_mask(&path),
            Err(CocosnetError::SampleLayout(_))
        ));
        assert!(reader.read(&SampleId(vec!["mask.png".into()])).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new("reader").unwrap();
        let reader = create_reader(None, dir.path()).unwrap();
        assert_eq!(reader.name(), DEFAULT_READER);
        assert!(reader.read(&SampleId(vec!["nope.png".into()])).is_err());
    }

    #[test]
    fn test_reader_config() {
        let dir = TempDir::new("reader").unwrap();
        let reader =
            create_reader(Some(&json!({"type": "image_reader", "data_source": "sub"})), dir.path())
                .unwrap();
        assert_eq!(reader.data_source(), dir.path().join("sub"));

        assert!(matches!(
            create_reader(Some(&json!(42)), dir.path()),
            Err(CocosnetError::ConfigError(_))
        ));
        assert!(create_reader(Some(&json!("pillow_imread")), dir.path()).is_err());
    }
}
