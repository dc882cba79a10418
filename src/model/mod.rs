//! The CoCosNet pipeline: a correspondence network warps the reference image onto the
//! input semantics, a generator synthesizes the final image from both

mod correspondence;
mod generator;

use crate::config::NetworkInfo;
use crate::error::{CocosnetError, Result};
use crate::launcher::{ExecutableNetwork, Launcher, NamedTensors, TensorInfo};
use candle_core::Tensor;
pub use correspondence::CorrespondenceNetwork;
pub use generator::GeneratorNetwork;
use log::{info, warn};

/// an executable network owned by one stage, dropped on release
pub(crate) struct StageNetwork {
    suffix: &'static str,
    exec_network: Option<Box<dyn ExecutableNetwork>>,
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
}

impl StageNetwork {
    pub(crate) fn new(suffix: &'static str, exec_network: Box<dyn ExecutableNetwork>) -> Self {
        let inputs = exec_network.inputs().to_vec();
        let outputs = exec_network.outputs().to_vec();
        Self {
            suffix,
            exec_network: Some(exec_network),
            inputs,
            outputs,
        }
    }

    pub(crate) fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    pub(crate) fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    pub(crate) fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
        self.exec_network
            .as_ref()
            .ok_or(CocosnetError::NetworkReleased(self.suffix))?
            .infer(inputs)
    }

    /// pick the layer named in the config, or the first declared one
    pub(crate) fn select_layer(
        &self,
        role: &str,
        configured: Option<&str>,
        declared: &[TensorInfo],
    ) -> Result<String> {
        match configured {
            Some(name) if declared.iter().any(|t| t.name == name) => Ok(name.to_string()),
            Some(name) => Err(CocosnetError::config(format!(
                "{} network does not declare {} layer '{}'",
                self.suffix, role, name
            ))),
            None => {
                let first = declared.first().ok_or_else(|| {
                    CocosnetError::config(format!("{} network declares no {} layer", self.suffix, role))
                })?;
                warn!(
                    "{} - no {} layer configured, using first declared '{}'",
                    self.suffix, role, first.name
                );
                Ok(first.name.clone())
            }
        }
    }

    pub(crate) fn print_input_output_info(&self) {
        info!("{} - Input info:", self.suffix);
        for input in &self.inputs {
            info!("\tLayer {}", input);
        }
        info!("{} - Output info:", self.suffix);
        for output in &self.outputs {
            info!("\tLayer {}", output);
        }
    }

    pub(crate) fn release(&mut self) {
        if self.exec_network.take().is_some() {
            info!("{} - network released", self.suffix);
        }
    }
}

/// join the warped reference and the input semantics along the channel axis
pub fn concat_channels(warped_reference: &Tensor, input_semantics: &Tensor) -> Result<Tensor> {
    let (a, b) = (warped_reference.dims(), input_semantics.dims());
    let compatible = a.len() == 4 && b.len() == 4 && a[0] == b[0] && a[2..] == b[2..];
    if !compatible {
        return Err(CocosnetError::ShapeMismatch(format!(
            "cannot concatenate warped reference {:?} with input semantics {:?} on axis 1",
            a, b
        )));
    }
    Ok(Tensor::cat(&[warped_reference, input_semantics], 1)?)
}

pub struct CocosnetModel {
    pub correspondence: CorrespondenceNetwork,
    pub generator: GeneratorNetwork,
}

impl CocosnetModel {
    pub fn new(correspondence: CorrespondenceNetwork, generator: GeneratorNetwork) -> Self {
        Self {
            correspondence,
            generator,
        }
    }

    pub fn load(network_info: &NetworkInfo, launcher: &dyn Launcher) -> Result<Self> {
        let correspondence = CorrespondenceNetwork::load(&network_info.correspondence, launcher)?;
        let generator = GeneratorNetwork::load(&network_info.generator, launcher)?;
        Ok(Self::new(correspondence, generator))
    }

    /// run both stages for every sample, one sample at a time
    pub fn predict(&self, inputs: Vec<Vec<Tensor>>) -> Result<Vec<NamedTensors>> {
        let mut results = Vec::with_capacity(inputs.len());
        for sample in inputs {
            let feed = self.correspondence.fit_to_input(sample)?;
            let corr_out = self.correspondence.predict(&feed)?;
            let warped_reference = corr_out
                .get(self.correspondence.key_of_warped_reference())
                .ok_or_else(|| {
                    CocosnetError::UnknownTensor(
                        self.correspondence.key_of_warped_reference().to_string(),
                    )
                })?;
            let input_semantics = feed
                .get(self.correspondence.key_of_input_semantics())
                .ok_or_else(|| {
                    CocosnetError::UnknownTensor(
                        self.correspondence.key_of_input_semantics().to_string(),
                    )
                })?;
            let gen_input = concat_channels(warped_reference, input_semantics)?;
            results.push(self.generator.predict(gen_input)?);
        }
        Ok(results)
    }

    pub fn print_input_output_info(&self) {
        self.correspondence.print_input_output_info();
        self.generator.print_input_output_info();
    }

    pub fn release(&mut self) {
        self.correspondence.release();
        self.generator.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CorrespondenceInfo, GeneratorInfo, ModelFiles};
    use candle_core::{DType, Device};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;

    /// echoes a chosen input back under the output name, recording every call
    pub(crate) struct EchoNetwork {
        pub(crate) inputs: Vec<TensorInfo>,
        pub(crate) outputs: Vec<TensorInfo>,
        pub(crate) echo: String,
        pub(crate) calls: Rc<RefCell<Vec<Vec<usize>>>>,
    }

    impl EchoNetwork {
        pub(crate) fn new(inputs: &[&str], output: &str, echo: &str) -> Self {
            Self {
                inputs: inputs
                    .iter()
                    .map(|name| TensorInfo {
                        name: name.to_string(),
                        shape: None,
                    })
                    .collect(),
                outputs: vec![TensorInfo {
                    name: output.to_string(),
                    shape: None,
                }],
                echo: echo.to_string(),
                calls: Rc::default(),
            }
        }
    }

    impl ExecutableNetwork for EchoNetwork {
        fn inputs(&self) -> &[TensorInfo] {
            &self.inputs
        }

        fn outputs(&self) -> &[TensorInfo] {
            &self.outputs
        }

        fn infer(&self, inputs: &NamedTensors) -> Result<NamedTensors> {
            let tensor = inputs
                .get(&self.echo)
                .ok_or_else(|| CocosnetError::UnknownTensor(self.echo.clone()))?;
            self.calls.borrow_mut().push(tensor.dims().to_vec());
            Ok(HashMap::from([(self.outputs[0].name.clone(), tensor.clone())]))
        }
    }

    pub(crate) fn files() -> ModelFiles {
        ModelFiles {
            model: PathBuf::from("net.json"),
            weights: None,
            repo: None,
        }
    }

    pub(crate) fn correspondence_info() -> CorrespondenceInfo {
        CorrespondenceInfo {
            files: files(),
            inputs: None,
            warped_reference: None,
            input_semantics: None,
        }
    }

    pub(crate) fn generator_info() -> GeneratorInfo {
        GeneratorInfo {
            files: files(),
            input: None,
            output: None,
            adapter: None,
        }
    }

    fn model() -> (CocosnetModel, Rc<RefCell<Vec<Vec<usize>>>>) {
        let corr = EchoNetwork::new(
            &["input_semantics", "reference_image", "reference_semantics"],
            "warped_reference",
            "reference_image",
        );
        let gen = EchoNetwork::new(&["features"], "fake_image", "features");
        let calls = gen.calls.clone();
        let correspondence =
            CorrespondenceNetwork::new(&correspondence_info(), Box::new(corr)).unwrap();
        let generator = GeneratorNetwork::new(&generator_info(), Box::new(gen)).unwrap();
        (CocosnetModel::new(correspondence, generator), calls)
    }

    fn sample(tag: f64) -> Vec<Tensor> {
        let mask = Tensor::zeros((1, 4, 8, 8), DType::F32, &Device::Cpu).unwrap();
        let image = (Tensor::ones((3, 8, 8), DType::F32, &Device::Cpu).unwrap() * tag).unwrap();
        vec![mask.clone(), image, mask]
    }

    #[test]
    fn test_predict_concatenates_stages() {
        let (model, calls) = model();
        let results = model.predict(vec![sample(0.5)]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(calls.borrow().as_slice(), &[vec![1, 7, 8, 8]]);

        let fake = &results[0]["fake_image"];
        let warped = fake.narrow(1, 0, 3).unwrap();
        assert_eq!(warped.mean_all().unwrap().to_scalar::<f32>().unwrap(), 0.5);
    }

    #[test]
    fn test_predict_keeps_sample_order() {
        let (model, _) = model();
        let results = model
            .predict(vec![sample(1.), sample(2.), sample(3.)])
            .unwrap();
        let tags: Vec<f32> = results
            .iter()
            .map(|r| {
                r["fake_image"]
                    .narrow(1, 0, 3)
                    .unwrap()
                    .mean_all()
                    .unwrap()
                    .to_scalar::<f32>()
                    .unwrap()
            })
            .collect();
        assert_eq!(tags, vec![1., 2., 3.]);
    }

    #[test]
    fn test_concat_spatial_mismatch() {
        let warped = Tensor::zeros((1, 3, 16, 16), DType::F32, &Device::Cpu).unwrap();
        let semantics = Tensor::zeros((1, 151, 8, 8), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            concat_channels(&warped, &semantics),
            Err(CocosnetError::ShapeMismatch(_))
        ));
        let flat = Tensor::zeros((3, 16, 16), DType::F32, &Device::Cpu).unwrap();
        assert!(concat_channels(&flat, &warped).is_err());
        let joined = concat_channels(&warped, &warped).unwrap();
        assert_eq!(joined.dims(), &[1, 6, 16, 16]);
    }

    #[test]
    fn test_predict_after_release() {
        let (mut model, _) = model();
        model.release();
        assert!(matches!(
            model.predict(vec![sample(1.)]),
            Err(CocosnetError::NetworkReleased("corr"))
        ));
    }

    #[test]
    fn test_stage_error_aborts_batch() {
        let (model, calls) = model();
        let mut short = sample(1.);
        short.pop();
        assert!(model.predict(vec![sample(1.), short]).is_err());
        assert_eq!(calls.borrow().len(), 1);
    }
}
