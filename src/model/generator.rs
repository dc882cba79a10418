use super::StageNetwork;
use crate::adapter::{create_adapter, Adapter};
use crate::config::GeneratorInfo;
use crate::error::Result;
use crate::hf::automatic_model_search;
use crate::launcher::{ExecutableNetwork, Launcher, NamedTensors};
use candle_core::Tensor;
use std::collections::HashMap;

/// synthesizes the output image from warped reference and input semantics
pub struct GeneratorNetwork {
    network: StageNetwork,
    input_blob: String,
    output_blob: String,
    adapter: Option<Box<dyn Adapter>>,
}

impl GeneratorNetwork {
    pub const DEFAULT_MODEL_SUFFIX: &'static str = "gen";

    pub fn load(info: &GeneratorInfo, launcher: &dyn Launcher) -> Result<Self> {
        let (model, weights) = automatic_model_search(&info.files)?;
        let network = Self::new(info, launcher.load_network(&model, &weights)?)?;
        network.print_input_output_info();
        Ok(network)
    }

    pub fn new(info: &GeneratorInfo, exec_network: Box<dyn ExecutableNetwork>) -> Result<Self> {
        let network = StageNetwork::new(Self::DEFAULT_MODEL_SUFFIX, exec_network);
        let input_blob = network.select_layer("input", info.input.as_deref(), network.inputs())?;
        let output_blob =
            network.select_layer("output", info.output.as_deref(), network.outputs())?;
        let mut adapter = info.adapter.as_ref().map(create_adapter).transpose()?;
        if let Some(adapter) = adapter.as_mut() {
            adapter.set_output_blob(&output_blob);
        }
        Ok(Self {
            network,
            input_blob,
            output_blob,
            adapter,
        })
    }

    pub fn adapter(&self) -> Option<&dyn Adapter> {
        self.adapter.as_deref()
    }

    pub fn output_blob(&self) -> &str {
        &self.output_blob
    }

    pub fn fit_to_input(&self, input: Tensor) -> NamedTensors {
        HashMap::from([(self.input_blob.clone(), input)])
    }

    pub fn predict(&self, input: Tensor) -> Result<NamedTensors> {
        self.network.infer(&self.fit_to_input(input))
    }

    pub fn print_input_output_info(&self) {
        self.network.print_input_output_info();
    }

    pub fn release(&mut self) {
        self.network.release();
    }
}
