#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use cocosnet::config::ModelConfig;
use cocosnet::dataset::Annotation;
use cocosnet::evaluator::CocosnetEvaluator;
use cocosnet::postprocess::save_image;
use cocosnet::prediction::{Prediction, PredictionValue};
use cocosnet::progress::ProgressReporter;
use env_logger::Env;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, ValueEnum, Clone, Copy)]
enum DeviceType {
    Cpu,
    Gpu,
    #[cfg(feature = "metal")]
    Metal,
}

impl DeviceType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            #[cfg(feature = "metal")]
            Self::Metal => "metal",
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(help = "path to the evaluation config (JSON)")]
    config: PathBuf,

    #[arg(long, help = "store the adapted predictions to this JSON file")]
    stored_predictions: Option<PathBuf>,

    #[arg(long, help = "write every synthesized image under this directory")]
    output_dir: Option<PathBuf>,

    #[arg(
        long = "device",
        value_enum,
        help = "override the device of the configured launcher"
    )]
    device_type: Option<DeviceType>,

    #[arg(long, help = "whether to enable verbose mode")]
    verbose: bool,
}

fn output_file_name(prediction: &Prediction, index: usize) -> String {
    let stem = prediction
        .identifier
        .0
        .first()
        .and_then(|name| Path::new(name).file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sample".to_string());
    format!("{:05}_{}.png", index, stem)
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let env = Env::new().filter_or("COCOSNET_LOG", if args.verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);

    let mut config = ModelConfig::from_file(&args.config)
        .with_context(|| format!("failed to read config {:?}", args.config))?;
    if let Some(device_type) = args.device_type {
        for launcher in config.launchers.iter_mut() {
            launcher.device = device_type.as_str().to_string();
        }
    }
    let processing_info = CocosnetEvaluator::get_processing_info(&config)?;
    info!(
        "evaluating {} with {} on {} {:?}, dataset {}",
        processing_info.name,
        processing_info.framework,
        processing_info.device,
        processing_info.tags,
        processing_info.dataset
    );

    if let Some(output_dir) = &args.output_dir {
        std::fs::DirBuilder::new().recursive(true).create(output_dir)?;
        info!("generating output to {:?}", output_dir);
    }

    let mut evaluator = CocosnetEvaluator::from_configs(&config)?;
    let mut progress = ProgressReporter::new();

    let mut written = 0usize;
    let mut save_outputs = |_: &[Annotation], predictions: &[Prediction]| {
        let Some(output_dir) = &args.output_dir else {
            return;
        };
        for prediction in predictions {
            let PredictionValue::Image(image) = &prediction.value else {
                warn!("prediction for {} is not an image", prediction.identifier);
                continue;
            };
            let output_file = output_dir.join(output_file_name(prediction, written));
            match save_image(image, &output_file) {
                Ok(()) => debug!("image {:?} generated", output_file),
                Err(err) => warn!("cannot save {:?}: {}", output_file, err),
            }
            written += 1;
        }
    };

    let now = Instant::now();
    evaluator.process_dataset(
        args.stored_predictions.as_deref(),
        Some(&mut progress),
        Some(&mut save_outputs),
    )?;
    info!(
        "{} samples processed in {:.3}s",
        evaluator.dataset().size(),
        now.elapsed().as_secs_f32()
    );

    evaluator.print_metrics_results(false);
    evaluator.release();
    Ok(())
}
