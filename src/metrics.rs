//! Full-reference image quality metrics, accumulated batch by batch

use crate::dataset::Annotation;
use crate::error::{CocosnetError, Result};
use crate::prediction::Prediction;
use image::RgbImage;
use log::{debug, info};
use serde::{Deserialize, Serialize};

const PEAK: f64 = 255.0;
/// reported for identical images, so that dataset means stay finite
pub const PSNR_CEILING: f64 = 100.0;
const SSIM_WINDOW: u32 = 8;
const SSIM_C1: f64 = (0.01 * PEAK) * (0.01 * PEAK);
const SSIM_C2: f64 = (0.03 * PEAK) * (0.03 * PEAK);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricConfig {
    Psnr,
    Ssim,
    Mae,
}

pub trait Metric {
    fn name(&self) -> &'static str;

    fn unit(&self) -> &'static str {
        ""
    }

    fn higher_is_better(&self) -> bool {
        true
    }

    /// whether the metric is computed over the whole run rather than per sample
    fn needs_all_predictions(&self) -> bool {
        false
    }

    fn evaluate(&self, target: &RgbImage, prediction: &RgbImage) -> Result<f64>;
}

fn check_sizes(target: &RgbImage, prediction: &RgbImage) -> Result<()> {
    if target.dimensions() != prediction.dimensions() {
        return Err(CocosnetError::ShapeMismatch(format!(
            "target is {:?} but prediction is {:?}, configure a resize postprocessor",
            target.dimensions(),
            prediction.dimensions()
        )));
    }
    Ok(())
}

/// peak signal to noise ratio, capped at [PSNR_CEILING]
#[derive(Debug, Default)]
pub struct Psnr;

impl Metric for Psnr {
    fn name(&self) -> &'static str {
        "psnr"
    }

    fn unit(&self) -> &'static str {
        "dB"
    }

    fn evaluate(&self, target: &RgbImage, prediction: &RgbImage) -> Result<f64> {
        check_sizes(target, prediction)?;
        let n = target.as_raw().len().max(1) as f64;
        let mse = target
            .as_raw()
            .iter()
            .zip(prediction.as_raw())
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            / n;
        if mse == 0.0 {
            return Ok(PSNR_CEILING);
        }
        Ok((10.0 * (PEAK * PEAK / mse).log10()).min(PSNR_CEILING))
    }
}

/// structural similarity over non-overlapping 8x8 box windows, averaged over channels
///
/// The usual definition slides an 11x11 gaussian window, so values are not comparable
/// with scores reported by other tools.
#[derive(Debug, Default)]
pub struct Ssim;

impl Ssim {
    fn window(target: &RgbImage, prediction: &RgbImage, channel: usize, x0: u32, y0: u32) -> f64 {
        let (width, height) = target.dimensions();
        let (x1, y1) = ((x0 + SSIM_WINDOW).min(width), (y0 + SSIM_WINDOW).min(height));
        let mut xs = Vec::with_capacity((SSIM_WINDOW * SSIM_WINDOW) as usize);
        let mut ys = Vec::with_capacity(xs.capacity());
        for y in y0..y1 {
            for x in x0..x1 {
                xs.push(target.get_pixel(x, y)[channel] as f64);
                ys.push(prediction.get_pixel(x, y)[channel] as f64);
            }
        }
        let n = xs.len() as f64;
        let mx = xs.iter().sum::<f64>() / n;
        let my = ys.iter().sum::<f64>() / n;
        let (mut vx, mut vy, mut cov) = (0.0, 0.0, 0.0);
        for (a, b) in xs.iter().zip(&ys) {
            vx += (a - mx) * (a - mx);
            vy += (b - my) * (b - my);
            cov += (a - mx) * (b - my);
        }
        let (vx, vy, cov) = (vx / n, vy / n, cov / n);
        ((2.0 * mx * my + SSIM_C1) * (2.0 * cov + SSIM_C2))
            / ((mx * mx + my * my + SSIM_C1) * (vx + vy + SSIM_C2))
    }
}

impl Metric for Ssim {
    fn name(&self) -> &'static str {
        "ssim"
    }

    fn evaluate(&self, target: &RgbImage, prediction: &RgbImage) -> Result<f64> {
        check_sizes(target, prediction)?;
        let (width, height) = target.dimensions();
        if width == 0 || height == 0 {
            return Err(CocosnetError::ShapeMismatch("cannot compare empty images".into()));
        }
        let mut total = 0.0;
        let mut count = 0usize;
        for channel in 0..3 {
            for y0 in (0..height).step_by(SSIM_WINDOW as usize) {
                for x0 in (0..width).step_by(SSIM_WINDOW as usize) {
                    total += Self::window(target, prediction, channel, x0, y0);
                    count += 1;
                }
            }
        }
        Ok(total / count as f64)
    }
}

/// mean absolute error in 8 bit intensity levels
#[derive(Debug, Default)]
pub struct Mae;

impl Metric for Mae {
    fn name(&self) -> &'static str {
        "mae"
    }

    fn higher_is_better(&self) -> bool {
        false
    }

    fn evaluate(&self, target: &RgbImage, prediction: &RgbImage) -> Result<f64> {
        check_sizes(target, prediction)?;
        let n = target.as_raw().len().max(1) as f64;
        Ok(target
            .as_raw()
            .iter()
            .zip(prediction.as_raw())
            .map(|(&a, &b)| (a as f64 - b as f64).abs())
            .sum::<f64>()
            / n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricMeta {
    pub name: String,
    pub unit: String,
    pub higher_is_better: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedMetric {
    pub name: String,
    /// mean over every evaluated sample, NaN when nothing was evaluated
    pub value: f64,
    pub evaluated_samples: usize,
    pub meta: MetricMeta,
}

/// prints a scalar metric value
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarPresenter;

impl ScalarPresenter {
    pub fn write_result(&self, result: &EvaluatedMetric, ignore_results_formatting: bool) {
        if ignore_results_formatting {
            info!("{}: {}", result.name, result.value);
        } else {
            info!(
                "{}: {:.2}{}",
                result.name,
                result.value,
                if result.meta.unit.is_empty() {
                    String::new()
                } else {
                    format!(" {}", result.meta.unit)
                }
            );
        }
    }

    pub fn extract_result(&self, result: &EvaluatedMetric) -> (f64, MetricMeta) {
        (result.value, result.meta.clone())
    }
}

struct MetricState {
    metric: Box<dyn Metric>,
    values: Vec<f64>,
}

fn create_metric(config: &MetricConfig) -> Box<dyn Metric> {
    match config {
        MetricConfig::Psnr => Box::new(Psnr),
        MetricConfig::Ssim => Box::new(Ssim),
        MetricConfig::Mae => Box::new(Mae),
    }
}

pub struct MetricsExecutor {
    metrics: Vec<MetricState>,
}

impl MetricsExecutor {
    pub fn new(configs: &[MetricConfig]) -> Self {
        Self::from_metrics(configs.iter().map(create_metric).collect())
    }

    pub fn from_metrics(metrics: Vec<Box<dyn Metric>>) -> Self {
        Self {
            metrics: metrics
                .into_iter()
                .map(|metric| MetricState {
                    metric,
                    values: Vec::new(),
                })
                .collect(),
        }
    }

    /// whether annotations and predictions must be kept until the end of the run
    pub fn need_store_predictions(&self) -> bool {
        self.metrics
            .iter()
            .any(|state| state.metric.needs_all_predictions())
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// evaluate every metric on each sample of the batch, returning the values per
    /// sample in metric order
    pub fn update_metrics_on_batch(
        &mut self,
        batch_input_ids: &[usize],
        annotations: &[Annotation],
        predictions: &[Prediction],
    ) -> Result<Vec<Vec<f64>>> {
        if self.metrics.is_empty() {
            return Ok(vec![Vec::new(); predictions.len()]);
        }
        let mut results = Vec::with_capacity(predictions.len());
        for ((input_id, annotation), prediction) in
            batch_input_ids.iter().zip(annotations).zip(predictions)
        {
            let target = annotation.target()?;
            let image = prediction.image()?.to_image()?;
            let mut sample = Vec::with_capacity(self.metrics.len());
            for state in &mut self.metrics {
                let value = state.metric.evaluate(target, &image)?;
                state.values.push(value);
                sample.push(value);
            }
            debug!("sample {} ({}): {:?}", input_id, prediction.identifier, sample);
            results.push(sample);
        }
        Ok(results)
    }

    pub fn get_metric_presenters(&self) -> Vec<ScalarPresenter> {
        vec![ScalarPresenter; self.metrics.len()]
    }

    pub fn iterate_metrics(&self) -> Vec<(ScalarPresenter, EvaluatedMetric)> {
        self.metrics
            .iter()
            .map(|state| {
                let evaluated_samples = state.values.len();
                let value = state.values.iter().sum::<f64>() / evaluated_samples as f64;
                let result = EvaluatedMetric {
                    name: state.metric.name().to_string(),
                    value,
                    evaluated_samples,
                    meta: MetricMeta {
                        name: state.metric.name().to_string(),
                        unit: state.metric.unit().to_string(),
                        higher_is_better: state.metric.higher_is_better(),
                    },
                };
                (ScalarPresenter, result)
            })
            .collect()
    }

    pub fn reset(&mut self) {
        for state in &mut self.metrics {
            state.values.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::AnnotationEntry;
    use crate::prediction::{ImagePrediction, PredictionValue};
    use crate::sample::SampleId;
    use float_cmp::approx_eq;
    use image::Rgb;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn gradient(offset: u8) -> RgbImage {
        RgbImage::from_fn(16, 16, |x, y| {
            let v = (x * 8 + y * 4) as u8;
            Rgb([v.saturating_add(offset), v, 255 - v])
        })
    }

    #[test]
    fn test_psnr() {
        let image = gradient(0);
        assert_eq!(Psnr.evaluate(&image, &image).unwrap(), PSNR_CEILING);
        // every red value off by one level: mse = 1 / 3
        let shifted = RgbImage::from_fn(4, 4, |_, _| Rgb([1, 0, 0]));
        let black = RgbImage::new(4, 4);
        let expected = 10.0 * (255.0f64 * 255.0 * 3.0).log10();
        assert!(approx_eq!(
            f64,
            Psnr.evaluate(&black, &shifted).unwrap(),
            expected,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn test_psnr_mean_stays_finite() {
        let mut executor = MetricsExecutor::new(&[MetricConfig::Psnr]);
        assert!(!executor.need_store_predictions());
        let (a0, p0) = pair(RgbImage::new(4, 4), RgbImage::new(4, 4));
        let (a1, p1) = pair(RgbImage::new(4, 4), RgbImage::from_pixel(4, 4, Rgb([50, 50, 50])));
        let per_sample = executor
            .update_metrics_on_batch(&[0, 1], &[a0, a1], &[p0, p1])
            .unwrap();
        let differing = 10.0 * (255.0f64 * 255.0 / 2500.0).log10();
        assert_eq!(per_sample[0][0], PSNR_CEILING);
        assert!(approx_eq!(f64, per_sample[1][0], differing, epsilon = 1e-9));

        let (_, psnr) = &executor.iterate_metrics()[0];
        assert!(psnr.value.is_finite());
        assert!(approx_eq!(
            f64,
            psnr.value,
            (PSNR_CEILING + differing) / 2.0,
            epsilon = 1e-9
        ));
    }

    #[test]
    fn test_ssim() {
        let image = gradient(0);
        assert!(approx_eq!(f64, Ssim.evaluate(&image, &image).unwrap(), 1.0, epsilon = 1e-12));
        let noisy = RgbImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let score = Ssim.evaluate(&image, &noisy).unwrap();
        assert!(score < 0.5);
    }

    #[test]
    fn test_mae() {
        let a = RgbImage::from_pixel(3, 3, Rgb([10, 20, 30]));
        let b = RgbImage::from_pixel(3, 3, Rgb([13, 17, 30]));
        assert!(approx_eq!(f64, Mae.evaluate(&a, &b).unwrap(), 2.0, ulps = 2));
        assert!(!Mae.higher_is_better());
        let small = RgbImage::new(2, 2);
        assert!(matches!(
            Mae.evaluate(&a, &small),
            Err(CocosnetError::ShapeMismatch(_))
        ));
    }

    fn pair(target: RgbImage, prediction: RgbImage) -> (Annotation, Prediction) {
        let id = SampleId(vec!["m.png".into(), "r.png".into()]);
        let mut annotation = Annotation::new(&AnnotationEntry {
            identifier: id.clone(),
            target: PathBuf::from("r.png"),
        });
        annotation.target = Some(target);
        let prediction = Prediction {
            identifier: id,
            value: PredictionValue::Image(ImagePrediction::from_image(prediction)),
        };
        (annotation, prediction)
    }

    #[test]
    fn test_executor_accumulates() {
        let mut executor = MetricsExecutor::new(&[MetricConfig::Mae, MetricConfig::Ssim]);
        let (a0, p0) = pair(RgbImage::new(8, 8), RgbImage::from_pixel(8, 8, Rgb([4, 4, 4])));
        let (a1, p1) = pair(RgbImage::new(8, 8), RgbImage::new(8, 8));
        let per_sample = executor
            .update_metrics_on_batch(&[0, 1], &[a0, a1], &[p0, p1])
            .unwrap();
        assert_eq!(per_sample.len(), 2);
        assert!(approx_eq!(f64, per_sample[0][0], 4.0, ulps = 2));
        assert!(approx_eq!(f64, per_sample[1][1], 1.0, ulps = 2));

        let results = executor.iterate_metrics();
        assert_eq!(results.len(), 2);
        let (presenter, mae) = &results[0];
        assert_eq!(mae.evaluated_samples, 2);
        let (value, meta) = presenter.extract_result(mae);
        assert!(approx_eq!(f64, value, 2.0, ulps = 2));
        assert_eq!(meta.name, "mae");
        assert_eq!(executor.get_metric_presenters().len(), 2);

        executor.reset();
        assert!(executor.iterate_metrics()[0].1.value.is_nan());
    }

    #[test]
    fn test_raw_prediction_rejected() {
        let mut executor = MetricsExecutor::new(&[MetricConfig::Psnr]);
        let (annotation, mut prediction) = pair(RgbImage::new(2, 2), RgbImage::new(2, 2));
        prediction.value = PredictionValue::Raw {
            outputs: BTreeMap::new(),
        };
        assert!(matches!(
            executor.update_metrics_on_batch(&[0], &[annotation], &[prediction]),
            Err(CocosnetError::UnsupportedPrediction(_))
        ));
    }

    #[test]
    fn test_metric_config() {
        let configs: Vec<MetricConfig> =
            serde_json::from_str(r#"[{"type": "psnr"}, {"type": "mae"}]"#).unwrap();
        assert_eq!(configs, vec![MetricConfig::Psnr, MetricConfig::Mae]);
        assert!(serde_json::from_str::<MetricConfig>(r#"{"type": "fid"}"#).is_err());
    }
}
