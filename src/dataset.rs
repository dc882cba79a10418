//! Annotated dataset entries, iterated in batches

use crate::config::DatasetConfig;
use crate::error::{CocosnetError, Result};
use crate::reader::DataReader;
use crate::sample::{SampleData, SampleId};
use image::RgbImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub identifier: SampleId,
    /// ground truth image, relative to the data source
    pub target: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AnnotationFile {
    entries: Vec<AnnotationEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnnotationMetadata {
    /// (width, height) of the first data slot
    pub image_size: Option<(u32, u32)>,
    pub data_source: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Annotation {
    pub identifier: SampleId,
    pub target_path: PathBuf,
    pub target: Option<RgbImage>,
    pub metadata: AnnotationMetadata,
}

impl Annotation {
    pub fn new(entry: &AnnotationEntry) -> Self {
        Self {
            identifier: entry.identifier.clone(),
            target_path: entry.target.clone(),
            target: None,
            metadata: AnnotationMetadata::default(),
        }
    }

    pub fn target(&self) -> Result<&RgbImage> {
        self.target.as_ref().ok_or_else(|| {
            CocosnetError::SampleLayout(format!("target of {} is not loaded", self.identifier))
        })
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    annotation_path: Option<PathBuf>,
    entries: Vec<AnnotationEntry>,
    batch: usize,
}

impl Dataset {
    pub fn new(name: impl Into<String>, entries: Vec<AnnotationEntry>, batch: usize) -> Self {
        Self {
            name: name.into(),
            annotation_path: None,
            entries,
            batch: batch.max(1),
        }
    }

    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let entries = read_annotation(&config.annotation)?;
        info!(
            "dataset '{}' loaded with {} entries",
            config.name,
            entries.len()
        );
        let mut dataset = Self::new(config.name.clone(), entries, config.batch.unwrap_or(1));
        dataset.annotation_path = Some(config.annotation.clone());
        Ok(dataset)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    /// yields `(batch_input_ids, annotations)` in annotation order; the last batch
    /// may be short
    pub fn iter(&self) -> impl Iterator<Item = (Vec<usize>, Vec<Annotation>)> + '_ {
        let batch = self.batch;
        self.entries
            .chunks(batch)
            .enumerate()
            .map(move |(batch_id, chunk)| {
                let start = batch_id * batch;
                let ids = (start..start + chunk.len()).collect();
                let annotations = chunk.iter().map(Annotation::new).collect();
                (ids, annotations)
            })
    }

    /// record what reading the sample taught us and load its ground truth
    pub fn set_annotation_metadata(
        &self,
        annotation: &mut Annotation,
        sample: &SampleData,
        reader: &dyn DataReader,
    ) -> Result<()> {
        annotation.metadata.image_size = sample.data.first().and_then(|d| d.size());
        annotation.metadata.data_source = Some(reader.data_source().to_path_buf());
        if annotation.target.is_none() {
            debug!("loading target {:?}", annotation.target_path);
            annotation.target = Some(reader.read_target(&annotation.target_path)?);
        }
        Ok(())
    }

    /// re-read the annotation file, dropping any change made to the entries
    pub fn reset(&mut self, reload_annotation: bool) -> Result<()> {
        if let (true, Some(path)) = (reload_annotation, &self.annotation_path) {
            self.entries = read_annotation(path)?;
            debug!("dataset '{}' annotation reloaded", self.name);
        }
        Ok(())
    }
}

fn read_annotation(path: &Path) -> Result<Vec<AnnotationEntry>> {
    let file: AnnotationFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    Ok(file.entries)
}
