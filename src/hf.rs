//! Model file lookup, on local disk or on the HuggingFace Hub

use crate::config::ModelFiles;
use crate::error::Result;
use hf_hub::api::sync::ApiBuilder;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};

/// weights sit next to the model definition unless configured otherwise
pub fn weights_for(path: &Path) -> PathBuf {
    let mut weights = path.to_path_buf();
    match path.extension().and_then(|e| e.to_str()) {
        Some("xml") => {
            weights.set_extension("bin");
        }
        Some("json") => {
            weights.set_extension("safetensors");
        }
        _ => {}
    }
    weights
}

/// resolve (model, weights) paths for a network
pub fn automatic_model_search(files: &ModelFiles) -> Result<(PathBuf, PathBuf)> {
    if let Some(repo) = &files.repo {
        return fetch_from_hub(repo, files);
    }
    let model = files.model.clone();
    let weights = weights_for(files.weights.as_deref().unwrap_or(&model));
    for path in [&model, &weights] {
        if !path.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("model file {:?} not found", path),
            )
            .into());
        }
    }
    debug!("using model {:?} with weights {:?}", model, weights);
    Ok((model, weights))
}

fn fetch_from_hub(repo_name: &str, files: &ModelFiles) -> Result<(PathBuf, PathBuf)> {
    let api = ApiBuilder::new().with_progress(true).build()?;
    let repo = api.model(repo_name.to_string());
    debug!("using model from HuggingFace repo '{}'", repo_name);
    let model_name = files.model.to_string_lossy();
    let model = repo.get(&model_name)?;
    debug!("using model file '{}'", model_name);
    let weights_name = weights_for(files.weights.as_deref().unwrap_or(&files.model));
    let weights_name = weights_name.to_string_lossy();
    let weights = repo.get(&weights_name)?;
    debug!("using weights file '{}'", weights_name);
    Ok((model, weights))
}
