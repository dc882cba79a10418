use crate::error::{CocosnetError, Result};
use crate::sample::{BgrImage, LabelMap};
use opencv::core::{self, Mat};
use opencv::prelude::*;

/// convert a single channel 8 or 16 bit mat to a label map, keeping raw values
pub fn mat_to_label_map(mat: &Mat) -> Result<LabelMap> {
    // deep copy so that the data is continuous
    let mat = mat.try_clone()?;
    if mat.channels() != 1 {
        return Err(CocosnetError::SampleLayout(format!(
            "mask must have a single channel, found {}",
            mat.channels()
        )));
    }
    let labels: Vec<u32> = match mat.depth() {
        core::CV_8U => mat.data_bytes()?.iter().map(|&v| v as u32).collect(),
        core::CV_16U => mat.data_typed::<u16>()?.iter().map(|&v| v as u32).collect(),
        depth => {
            return Err(CocosnetError::SampleLayout(format!(
                "unsupported mask depth {}",
                depth
            )))
        }
    };
    LabelMap::new(mat.cols() as usize, mat.rows() as usize, labels)
}

/// convert an 8 bit BGR mat, as returned by imread
pub fn mat_to_bgr_image(mat: &Mat) -> Result<BgrImage> {
    let mat = mat.try_clone()?;
    if mat.channels() != 3 || mat.depth() != core::CV_8U {
        return Err(CocosnetError::SampleLayout(format!(
            "expected an 8 bit 3 channel image, found {} channels of depth {}",
            mat.channels(),
            mat.depth()
        )));
    }
    BgrImage::new(
        mat.cols() as u32,
        mat.rows() as u32,
        mat.data_bytes()?.to_vec(),
    )
}
