//! Runs a dataset through the two stage pipeline and scores the synthesized images

use crate::config::ModelConfig;
use crate::dataset::{Annotation, Dataset};
use crate::error::Result;
use crate::launcher::{create_launcher, Launcher};
use crate::metrics::{EvaluatedMetric, MetricMeta, MetricsExecutor};
use crate::model::CocosnetModel;
use crate::postprocess::PostprocessingExecutor;
use crate::prediction::Prediction;
use crate::preprocess::{ImagePreprocessor, MaskPreprocessor};
use crate::progress::ProgressReporter;
use crate::reader::{create_reader, DataReader};
use crate::sample::{InputData, SampleId, SampleMeta};
use candle_core::Tensor;
use log::{debug, info};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// what is kept over one pass of the dataset; annotations and predictions only when a
/// metric needs the whole run
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    pub annotations: Vec<Annotation>,
    pub predictions: Vec<Prediction>,
    pub metrics_results: Vec<EvaluatedMetric>,
}

impl ResultAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty() && self.predictions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingInfo {
    pub name: String,
    pub framework: String,
    pub device: String,
    pub tags: Vec<String>,
    pub dataset: String,
}

pub struct CocosnetEvaluator {
    launcher: Box<dyn Launcher>,
    reader: Box<dyn DataReader>,
    preprocessor_mask: MaskPreprocessor,
    preprocessor_image: ImagePreprocessor,
    postprocessor: PostprocessingExecutor,
    dataset: Dataset,
    metric_executor: MetricsExecutor,
    model: CocosnetModel,
    results: ResultAccumulator,
}

impl CocosnetEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        launcher: Box<dyn Launcher>,
        reader: Box<dyn DataReader>,
        preprocessor_mask: MaskPreprocessor,
        preprocessor_image: ImagePreprocessor,
        postprocessor: PostprocessingExecutor,
        dataset: Dataset,
        metric_executor: MetricsExecutor,
        model: CocosnetModel,
    ) -> Self {
        Self {
            launcher,
            reader,
            preprocessor_mask,
            preprocessor_image,
            postprocessor,
            dataset,
            metric_executor,
            model,
            results: ResultAccumulator::new(),
        }
    }

    pub fn from_configs(config: &ModelConfig) -> Result<Self> {
        let launcher_config = config.launcher()?;
        let dataset_config = config.dataset()?;

        let dataset = Dataset::load(dataset_config)?;
        let data_source = dataset_config
            .data_source
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let reader = create_reader(dataset_config.reader.as_ref(), &data_source)?;
        debug!("using reader '{}' on {:?}", reader.name(), reader.data_source());

        let launcher = create_launcher(launcher_config)?;
        let now = Instant::now();
        let model = CocosnetModel::load(&config.network_info, launcher.as_ref())?;
        info!("networks loaded in {:.3}s", now.elapsed().as_secs_f32());

        Ok(Self::new(
            launcher,
            reader,
            dataset_config.preprocessing_mask.clone().unwrap_or_default(),
            dataset_config.preprocessing_image.clone().unwrap_or_default(),
            PostprocessingExecutor::new(dataset_config.postprocessing.clone()),
            dataset,
            MetricsExecutor::new(&dataset_config.metrics),
            model,
        ))
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn model(&self) -> &CocosnetModel {
        &self.model
    }

    pub fn process_dataset(
        &mut self,
        stored_predictions: Option<&Path>,
        mut progress_reporter: Option<&mut ProgressReporter>,
        mut output_callback: Option<&mut dyn FnMut(&[Annotation], &[Prediction])>,
    ) -> Result<(&[Annotation], &[Prediction])> {
        if let Some(progress) = progress_reporter.as_deref_mut() {
            progress.reset(self.dataset.size());
        }
        let mut predictions_to_store = Vec::new();

        for (batch_id, (batch_input_ids, mut batch_annotation)) in
            self.dataset.iter().enumerate()
        {
            let (filled_inputs, batch_meta, batch_identifiers) =
                self.get_batch_input(&mut batch_annotation)?;
            let now = Instant::now();
            let batch_raw_predictions = self.model.predict(filled_inputs)?;
            debug!(
                "batch {} inferred in {:.3}s",
                batch_id,
                now.elapsed().as_secs_f32()
            );

            let batch_predictions = match self.model.generator.adapter() {
                Some(adapter) => {
                    adapter.process(&batch_raw_predictions, &batch_identifiers, &batch_meta)?
                }
                None => batch_raw_predictions
                    .iter()
                    .zip(&batch_identifiers)
                    .map(|(outputs, id)| Prediction::from_raw(id.clone(), outputs))
                    .collect::<Result<Vec<_>>>()?,
            };
            if stored_predictions.is_some() {
                predictions_to_store.extend(batch_predictions.iter().cloned());
            }

            let (annotations, predictions) =
                self.postprocessor
                    .process_batch(batch_annotation, batch_predictions, &batch_meta)?;
            self.metric_executor
                .update_metrics_on_batch(&batch_input_ids, &annotations, &predictions)?;

            if let Some(callback) = output_callback.as_deref_mut() {
                callback(&annotations, &predictions);
            }
            if self.metric_executor.need_store_predictions() {
                self.results.annotations.extend(annotations);
                self.results.predictions.extend(predictions);
            }

            if let Some(progress) = progress_reporter.as_deref_mut() {
                progress.update(batch_id, batch_input_ids.len());
            }
        }

        if let Some(progress) = progress_reporter {
            progress.finish();
        }
        if let Some(path) = stored_predictions {
            Self::store_predictions(path, &predictions_to_store)?;
        }
        Ok((
            self.results.annotations.as_slice(),
            self.results.predictions.as_slice(),
        ))
    }

    /// read, record metadata for and preprocess every sample of a batch
    fn get_batch_input(
        &self,
        batch_annotation: &mut [Annotation],
    ) -> Result<(Vec<Vec<Tensor>>, Vec<SampleMeta>, Vec<SampleId>)> {
        let batch_identifiers: Vec<SampleId> = batch_annotation
            .iter()
            .map(|a| a.identifier.clone())
            .collect();
        let mut filled_inputs = Vec::with_capacity(batch_annotation.len());
        let mut batch_meta = Vec::with_capacity(batch_annotation.len());

        for annotation in batch_annotation.iter_mut() {
            let sample = self.reader.read(&annotation.identifier)?;
            self.dataset
                .set_annotation_metadata(annotation, &sample, self.reader.as_ref())?;
            sample.validate_layout()?;

            let tensors = sample
                .data
                .iter()
                .map(|data| self.preprocess(data))
                .collect::<Result<Vec<_>>>()?;
            batch_meta.push(SampleMeta {
                identifier: sample.identifier.clone(),
                image_size: annotation.metadata.image_size,
                input_shapes: tensors.iter().map(|t| t.dims().to_vec()).collect(),
            });
            filled_inputs.push(tensors);
        }
        Ok((filled_inputs, batch_meta, batch_identifiers))
    }

    fn preprocess(&self, data: &InputData) -> Result<Tensor> {
        let device = self.launcher.device();
        match data {
            InputData::Mask(mask) => self.preprocessor_mask.process(mask, device),
            InputData::Image(image) => self.preprocessor_image.process(image, device),
            InputData::Tensor(tensor) => Ok(tensor.clone()),
        }
    }

    pub fn compute_metrics(
        &mut self,
        print_results: bool,
        ignore_results_formatting: bool,
    ) -> &[EvaluatedMetric] {
        self.results.metrics_results.clear();
        for (presenter, metric_result) in self.metric_executor.iterate_metrics() {
            if print_results {
                presenter.write_result(&metric_result, ignore_results_formatting);
            }
            self.results.metrics_results.push(metric_result);
        }
        &self.results.metrics_results
    }

    pub fn extract_metrics_results(
        &mut self,
        print_results: bool,
        ignore_results_formatting: bool,
    ) -> (Vec<f64>, Vec<MetricMeta>) {
        if self.results.metrics_results.is_empty() {
            self.compute_metrics(print_results, ignore_results_formatting);
        }
        let presenters = self.metric_executor.get_metric_presenters();
        presenters
            .iter()
            .zip(&self.results.metrics_results)
            .map(|(presenter, result)| presenter.extract_result(result))
            .unzip()
    }

    pub fn print_metrics_results(&mut self, ignore_results_formatting: bool) {
        if self.results.metrics_results.is_empty() {
            self.compute_metrics(true, ignore_results_formatting);
            return;
        }
        let presenters = self.metric_executor.get_metric_presenters();
        for (presenter, result) in presenters.iter().zip(&self.results.metrics_results) {
            presenter.write_result(result, ignore_results_formatting);
        }
    }

    pub fn metrics_results(&mut self) -> Vec<EvaluatedMetric> {
        if self.results.metrics_results.is_empty() {
            self.compute_metrics(false, false);
        }
        self.results.metrics_results.clone()
    }

    pub fn store_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, predictions)?;
        writer.flush()?;
        info!("{} predictions stored to {:?}", predictions.len(), path);
        Ok(())
    }

    pub fn load_stored_predictions(path: &Path) -> Result<Vec<Prediction>> {
        let predictions: Vec<Prediction> =
            serde_json::from_reader(BufReader::new(File::open(path)?))?;
        debug!("{} predictions loaded from {:?}", predictions.len(), path);
        Ok(predictions)
    }

    pub fn reset_progress(&self, progress_reporter: &mut ProgressReporter) {
        progress_reporter.reset(self.dataset.size());
    }

    /// drop all results and start over, keeping the loaded networks
    pub fn reset(&mut self) -> Result<()> {
        self.metric_executor.reset();
        self.results = ResultAccumulator::new();
        self.dataset.reset(self.postprocessor.has_processors())?;
        self.reader.reset();
        Ok(())
    }

    pub fn release(&mut self) {
        self.model.release();
        self.launcher.release();
    }

    pub fn get_processing_info(config: &ModelConfig) -> Result<ProcessingInfo> {
        let launcher = config.launcher()?;
        let dataset = config.dataset()?;
        Ok(ProcessingInfo {
            name: config.name.clone(),
            framework: launcher.framework.clone(),
            device: launcher.device.to_uppercase(),
            tags: launcher.tags.clone(),
            dataset: dataset.name.clone(),
        })
    }
}
