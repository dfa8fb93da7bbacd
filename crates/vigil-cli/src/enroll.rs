//! `vigil enroll`: record reference embeddings of the user.
//!
//! Every face seen during the recording window contributes one embedding,
//! so the camera should see only the user being enrolled.

use crate::config::Config;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use vigil_core::{Face, ReferenceFile, UserInterrupt};
use vigil_hw::{Camera, Frame};
use vigil_vision::crop::face_crop;
use vigil_vision::{FaceAnalyzer, ARCFACE_MODEL_VERSION};

pub struct EnrollOptions {
    pub seconds: u64,
    pub save_faces: bool,
}

pub async fn enroll(config: Config, options: EnrollOptions) -> Result<()> {
    let stop = UserInterrupt::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("stopping recording early");
                stop.raise();
            }
        });
    }

    let reference_path = config.reference_path.clone();
    let file = tokio::task::spawn_blocking(move || record(&config, &options, &stop))
        .await
        .context("recording task panicked")??;

    file.write(&reference_path)?;
    println!(
        "Saved {} reference embeddings to {}",
        file.embeddings.len(),
        reference_path.display()
    );
    Ok(())
}

fn record(config: &Config, options: &EnrollOptions, stop: &UserInterrupt) -> Result<ReferenceFile> {
    let camera = Camera::open(&config.camera_device)?;
    let mut analyzer = FaceAnalyzer::load(&config.model_dir)?;
    let photo_dir = options.save_faces.then_some(config.enroll.photo_dir.as_path());
    if let Some(dir) = photo_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut recording = Recording::default();
    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    println!("Recording for {}s, look at the camera (Ctrl+C to stop early)", options.seconds);

    while Instant::now() < deadline && !stop.take() {
        let frame = match camera.capture() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed, ending recording");
                break;
            }
        };
        let faces = match analyzer.analyze(&frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "analysis failed");
                continue;
            }
        };
        recording.add(&faces);
        if let Some(dir) = photo_dir {
            save_crops(dir, &frame, &faces);
        }
        tracing::info!(faces = faces.len(), total = recording.len(), "frame recorded");
    }

    recording.finish()
}

/// Embeddings gathered during one enrollment.
#[derive(Debug, Default)]
struct Recording {
    embeddings: Vec<Vec<f32>>,
    skipped: usize,
}

impl Recording {
    /// Keep every face whose embedding can be normalized.
    fn add(&mut self, faces: &[Face]) {
        for face in faces {
            if face.embedding.normalized().is_none() {
                self.skipped += 1;
                tracing::warn!(bbox = ?face.bbox, skipped = self.skipped, "skipping degenerate embedding");
                continue;
            }
            self.embeddings.push(face.embedding.values.clone());
        }
    }

    fn len(&self) -> usize {
        self.embeddings.len()
    }

    fn finish(self) -> Result<ReferenceFile> {
        if self.embeddings.is_empty() {
            bail!("no faces found");
        }
        if self.skipped > 0 {
            tracing::warn!(skipped = self.skipped, kept = self.embeddings.len(), "degenerate embeddings dropped");
        }
        Ok(ReferenceFile::new(
            Some(ARCFACE_MODEL_VERSION.to_string()),
            self.embeddings,
        ))
    }
}

fn save_crops(dir: &Path, frame: &Frame, faces: &[Face]) {
    for face in faces {
        let Some(crop) = face_crop(frame, &face.bbox, false) else {
            continue;
        };
        let path = photo_path(dir, Local::now());
        if let Err(e) = crop.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to save face crop");
        }
    }
}

fn photo_path(dir: &Path, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("face_{}.png", at.format("%Y%m%d_%H%M%S_%6f")))
}
