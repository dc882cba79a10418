use super::StageNetwork;
use crate::config::CorrespondenceInfo;
use crate::error::{CocosnetError, Result};
use crate::hf::automatic_model_search;
use crate::launcher::{ExecutableNetwork, Launcher, NamedTensors};
use candle_core::Tensor;
use std::collections::HashMap;

/// warps the reference image onto the layout of the input semantics
pub struct CorrespondenceNetwork {
    network: StageNetwork,
    /// network input fed by each data slot of a sample
    slot_inputs: Vec<String>,
    key_of_warped_reference: String,
    key_of_input_semantics: String,
}

impl CorrespondenceNetwork {
    pub const DEFAULT_MODEL_SUFFIX: &'static str = "corr";

    pub fn load(info: &CorrespondenceInfo, launcher: &dyn Launcher) -> Result<Self> {
        let (model, weights) = automatic_model_search(&info.files)?;
        let network = Self::new(info, launcher.load_network(&model, &weights)?)?;
        network.print_input_output_info();
        Ok(network)
    }

    pub fn new(info: &CorrespondenceInfo, exec_network: Box<dyn ExecutableNetwork>) -> Result<Self> {
        let network = StageNetwork::new(Self::DEFAULT_MODEL_SUFFIX, exec_network);
        let key_of_warped_reference = network.select_layer(
            "warped reference",
            info.warped_reference.as_deref(),
            network.outputs(),
        )?;
        let key_of_input_semantics = network.select_layer(
            "input semantics",
            info.input_semantics.as_deref(),
            network.inputs(),
        )?;
        let slot_inputs = match &info.inputs {
            Some(names) => {
                for name in names {
                    network.select_layer("slot", Some(name.as_str()), network.inputs())?;
                }
                names.clone()
            }
            None => network.inputs().iter().map(|i| i.name.clone()).collect(),
        };
        if !slot_inputs.contains(&key_of_input_semantics) {
            return Err(CocosnetError::config(format!(
                "input semantics '{}' is not fed by any data slot",
                key_of_input_semantics
            )));
        }
        Ok(Self {
            network,
            slot_inputs,
            key_of_warped_reference,
            key_of_input_semantics,
        })
    }

    pub fn key_of_warped_reference(&self) -> &str {
        &self.key_of_warped_reference
    }

    pub fn key_of_input_semantics(&self) -> &str {
        &self.key_of_input_semantics
    }

    /// bind the preprocessed slots of one sample to the network inputs, adding the
    /// batch axis to unbatched image tensors
    pub fn fit_to_input(&self, data: Vec<Tensor>) -> Result<NamedTensors> {
        if data.len() != self.slot_inputs.len() {
            return Err(CocosnetError::SampleLayout(format!(
                "correspondence network takes {} data slots, got {}",
                self.slot_inputs.len(),
                data.len()
            )));
        }
        self.slot_inputs
            .iter()
            .zip(data)
            .map(|(name, tensor)| -> Result<(String, Tensor)> {
                let tensor = if tensor.rank() == 3 {
                    tensor.unsqueeze(0)?
                } else {
                    tensor
                };
                Ok((name.clone(), tensor))
            })
            .collect()
    }

    pub fn inputs_info_for_meta(&self) -> HashMap<String, Option<Vec<usize>>> {
        self.network
            .inputs()
            .iter()
            .map(|i| (i.name.clone(), i.shape.clone()))
            .collect()
    }

    pub fn predict(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
        self.network.infer(inputs)
    }

    pub fn print_input_output_info(&self) {
        self.network.print_input_output_info();
    }

    pub fn release(&mut self) {
        self.network.release();
    }
}
