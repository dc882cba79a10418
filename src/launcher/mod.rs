//! Inference engine seam: a [Launcher] loads networks, an [ExecutableNetwork] runs them

mod graph;

use crate::config::LauncherConfig;
use crate::error::{CocosnetError, Result};
use candle_core::{Device, Tensor};
pub use graph::{GraphDefinition, GraphNetwork, NodeDef, Op, TensorDecl};
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// tensors keyed by the layer name a network declares
pub type NamedTensors = HashMap<String, Tensor>;

#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    /// unknown until inference for outputs
    pub shape: Option<Vec<usize>>,
}

impl fmt::Display for TensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            Some(shape) => write!(f, "{} {:?}", self.name, shape),
            None => write!(f, "{} [?]", self.name),
        }
    }
}

/// a loaded network ready for inference
pub trait ExecutableNetwork {
    /// declared inputs, in declaration order
    fn inputs(&self) -> &[TensorInfo];

    /// declared outputs, in declaration order
    fn outputs(&self) -> &[TensorInfo];

    fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors>;
}

pub trait Launcher {
    fn device(&self) -> &Device;

    fn load_network(&self, model: &Path, weights: &Path) -> Result<Box<dyn ExecutableNetwork>>;

    fn release(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Cuda(usize),
    #[cfg(feature = "metal")]
    Metal,
}

impl DeviceType {
    /// parse `cpu`, `gpu`, `cuda`, `cuda:N` or `metal`, ignoring case
    pub fn parse(device: &str) -> Result<Self> {
        let device = device.trim().to_ascii_lowercase();
        match device.as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Cuda(0)),
            #[cfg(feature = "metal")]
            "metal" => Ok(Self::Metal),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| CocosnetError::config(format!("bad cuda ordinal '{}'", ordinal))),
                None => Err(CocosnetError::config(format!(
                    "unsupported device '{}'",
                    other
                ))),
            },
        }
    }
}

impl TryInto<Device> for DeviceType {
    type Error = candle_core::Error;

    fn try_into(self) -> std::result::Result<Device, Self::Error> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda(ordinal) => Device::new_cuda(ordinal),
            #[cfg(feature = "metal")]
            Self::Metal => Device::new_metal(0),
        }
    }
}

/// runs [GraphNetwork]s on a candle device
#[derive(Debug)]
pub struct CandleLauncher {
    device: Device,
}

impl CandleLauncher {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    fn from_config(config: &LauncherConfig) -> Result<Box<dyn Launcher>> {
        let device: Device = DeviceType::parse(&config.device)?.try_into()?;
        debug!("using device {:?}", device);
        Ok(Box::new(Self::new(device)))
    }
}

impl Launcher for CandleLauncher {
    fn device(&self) -> &Device {
        &self.device
    }

    fn load_network(&self, model: &Path, weights: &Path) -> Result<Box<dyn ExecutableNetwork>> {
        Ok(Box::new(GraphNetwork::load(model, weights, &self.device)?))
    }

    fn release(&mut self) {
        info!("releasing launcher on {:?}", self.device);
        self.device = Device::Cpu;
    }
}

type LauncherFactory = fn(&LauncherConfig) -> Result<Box<dyn Launcher>>;

const LAUNCHERS: &[(&str, LauncherFactory)] = &[("candle", CandleLauncher::from_config)];

/// look up the launcher registered for `framework`
pub fn create_launcher(config: &LauncherConfig) -> Result<Box<dyn Launcher>> {
    let (_, factory) = LAUNCHERS
        .iter()
        .find(|(name, _)| *name == config.framework)
        .ok_or_else(|| {
            CocosnetError::config(format!("unknown launcher framework '{}'", config.framework))
        })?;
    factory(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parse() {
        assert_eq!(DeviceType::parse("CPU").unwrap(), DeviceType::Cpu);
        assert_eq!(DeviceType::parse("gpu").unwrap(), DeviceType::Cuda(0));
        assert_eq!(DeviceType::parse("cuda:2").unwrap(), DeviceType::Cuda(2));
        assert!(DeviceType::parse("cuda:x").is_err());
        assert!(DeviceType::parse("tpu").is_err());
    }

    #[test]
    fn test_create_launcher() {
        let config = LauncherConfig {
            framework: "candle".into(),
            device: "cpu".into(),
            tags: vec![],
        };
        let launcher = create_launcher(&config).unwrap();
        assert!(launcher.device().is_cpu());

        let config = LauncherConfig {
            framework: "dlsdk".into(),
            ..config
        };
        assert!(matches!(
            create_launcher(&config),
            Err(CocosnetError::ConfigError(_))
        ));
    }
}
