//! Evaluation config, read from a JSON file

use crate::error::{CocosnetError, Result};
use crate::metrics::MetricConfig;
use crate::postprocess::PostprocessorConfig;
use crate::preprocess::{ImagePreprocessor, MaskPreprocessor};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

fn default_name() -> String {
    "cocosnet".to_string()
}

fn default_device() -> String {
    "cpu".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub network_info: NetworkInfo,
    pub launchers: Vec<LauncherConfig>,
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    pub correspondence: CorrespondenceInfo,
    pub generator: GeneratorInfo,
}

/// where a network's model definition and weights live
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub weights: Option<PathBuf>,
    /// Hugging Face Hub repo holding `model` and `weights`
    pub repo: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorrespondenceInfo {
    #[serde(flatten)]
    pub files: ModelFiles,
    /// network inputs fed by the data slots of a sample, in slot order
    pub inputs: Option<Vec<String>>,
    pub warped_reference: Option<String>,
    pub input_semantics: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorInfo {
    #[serde(flatten)]
    pub files: ModelFiles,
    pub input: Option<String>,
    pub output: Option<String>,
    pub adapter: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LauncherConfig {
    pub framework: String,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub reader: Option<Value>,
    pub data_source: Option<PathBuf>,
    pub annotation: PathBuf,
    pub batch: Option<usize>,
    pub preprocessing_mask: Option<MaskPreprocessor>,
    pub preprocessing_image: Option<ImagePreprocessor>,
    #[serde(default)]
    pub postprocessing: Vec<PostprocessorConfig>,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

/// a component picked by name, given either as `"name"` or `{"type": "name", ...}`
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub kind: String,
    pub params: Map<String, Value>,
}

impl ComponentSpec {
    pub fn from_value(what: &str, value: &Value) -> Result<Self> {
        match value {
            Value::String(kind) => Ok(Self {
                kind: kind.clone(),
                params: Map::new(),
            }),
            Value::Object(map) => {
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CocosnetError::config(format!("{} needs a 'type'", what)))?;
                let mut params = map.clone();
                params.remove("type");
                Ok(Self {
                    kind: kind.to_string(),
                    params,
                })
            }
            _ => Err(CocosnetError::config(format!(
                "{} should be dict or string",
                what
            ))),
        }
    }

    pub fn param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.params
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }
}

impl ModelConfig {
    /// read a config file, resolving relative paths against its directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for files in [
            &mut self.network_info.correspondence.files,
            &mut self.network_info.generator.files,
        ] {
            if files.repo.is_none() {
                resolve(&mut files.model);
                if let Some(weights) = files.weights.as_mut() {
                    resolve(weights);
                }
            }
        }
        for dataset in self.datasets.iter_mut() {
            resolve(&mut dataset.annotation);
            if let Some(data_source) = dataset.data_source.as_mut() {
                resolve(data_source);
            }
        }
    }

    pub fn launcher(&self) -> Result<&LauncherConfig> {
        self.launchers
            .first()
            .ok_or_else(|| CocosnetError::config("no launcher configured"))
    }

    pub fn dataset(&self) -> Result<&DatasetConfig> {
        self.datasets
            .first()
            .ok_or_else(|| CocosnetError::config("no dataset configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIG: &str = r#"{
        "network_info": {
            "correspondence": {"model": "corr.json", "warped_reference": "warp"},
            "generator": {"model": "gen.xml", "weights": "/models/gen.bin", "adapter": "image_processing"}
        },
        "launchers": [{"framework": "candle", "tags": ["fp32"]}],
        "datasets": [{
            "name": "ade20k",
            "annotation": "ade20k.json",
            "data_source": "images",
            "preprocessing_mask": {"num_classes": 10},
            "postprocessing": [{"type": "resize_prediction"}],
            "metrics": [{"type": "psnr"}, {"type": "ssim"}]
        }]
    }"#;

    #[test]
    fn test_config_from_json() {
        let mut config: ModelConfig = serde_json::from_str(CONFIG).unwrap();
        config.resolve_paths(Path::new("/data"));
        assert_eq!(config.name, "cocosnet");

        let corr = &config.network_info.correspondence;
        assert_eq!(corr.files.model, PathBuf::from("/data/corr.json"));
        assert_eq!(corr.files.weights, None);
        assert_eq!(corr.warped_reference.as_deref(), Some("warp"));

        let gen = &config.network_info.generator;
        assert_eq!(gen.files.weights, Some(PathBuf::from("/models/gen.bin")));
        assert_eq!(gen.adapter, Some(json!("image_processing")));

        let launcher = config.launcher().unwrap();
        assert_eq!(launcher.device, "cpu");
        assert_eq!(launcher.tags, vec!["fp32".to_string()]);

        let dataset = config.dataset().unwrap();
        assert_eq!(dataset.annotation, PathBuf::from("/data/ade20k.json"));
        assert_eq!(dataset.data_source, Some(PathBuf::from("/data/images")));
        let mask = dataset.preprocessing_mask.clone().unwrap();
        assert_eq!((mask.size, mask.num_classes), (256, 10));
        assert_eq!(dataset.postprocessing.len(), 1);
        assert_eq!(dataset.metrics.len(), 2);
    }

    #[test]
    fn test_component_spec() {
        let spec = ComponentSpec::from_value("reader", &json!("image_reader")).unwrap();
        assert_eq!(spec.kind, "image_reader");
        assert!(spec.params.is_empty());

        let spec = ComponentSpec::from_value(
            "adapter",
            &json!({"type": "image_processing", "reverse_channels": true}),
        )
        .unwrap();
        assert_eq!(spec.kind, "image_processing");
        assert_eq!(spec.param::<bool>("reverse_channels").unwrap(), Some(true));
        assert_eq!(spec.param::<f64>("mean").unwrap(), None);

        assert!(matches!(
            ComponentSpec::from_value("reader", &json!(["image_reader"])),
            Err(CocosnetError::ConfigError(_))
        ));
        assert!(ComponentSpec::from_value("reader", &json!({"kind": "x"})).is_err());
    }
}
