//! `vigil check`: validate configuration and reference data without
//! touching the camera.

use crate::config::Config;
use anyhow::Result;
use serde_json::{json, Value};
use vigil_core::{ReferenceFile, ReferenceSet};
use vigil_vision::{DETECTOR_MODEL_FILE, EMBEDDER_MODEL_FILE};

pub fn summarize(config: &Config) -> Result<Value> {
    let file = ReferenceFile::read(&config.reference_path)?;
    let model = file.model.clone();
    let recorded_at = file.recorded_at;
    let set = ReferenceSet::from_vectors(file.embeddings)?;

    let detector = config.model_dir.join(DETECTOR_MODEL_FILE);
    let embedder = config.model_dir.join(EMBEDDER_MODEL_FILE);

    Ok(json!({
        "mode": config.mode.as_str(),
        "face_selection": config.face_selection,
        "tolerance": config.tolerance,
        "timeout_seconds": config.timeout_seconds,
        "required_consecutive_ok": config.required_consecutive_ok,
        "sampling_interval_seconds": config.sampling_interval_seconds,
        "camera_device": config.camera_device,
        "reference": {
            "path": config.reference_path.display().to_string(),
            "model": model,
            "recorded_at": recorded_at.to_rfc3339(),
            "count": set.len(),
            "dim": set.dim(),
        },
        "models": {
            "detector": { "path": detector.display().to_string(), "present": detector.exists() },
            "embedder": { "path": embedder.display().to_string(), "present": embedder.exists() },
        },
    }))
}
