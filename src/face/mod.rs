//! Face detection and 1:1 verification.
//!
//! The heavy lifting is done by a [`FaceEngine`]; this module only decides
//! what its answers mean for a login.

mod metric;
mod onnx;

pub use metric::*;
pub use onnx::{OnnxConfig, OnnxEngine};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageReader, RgbImage};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, FaceError>;

#[derive(thiserror::Error, Debug)]
pub enum FaceError {
    #[error("cannot read image {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Face could not be detected in {0}")]
    NoFace(String),
    #[error("cannot load model {path}: {message}")]
    Model { path: PathBuf, message: String },
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("face engine is unavailable")]
    Poisoned,
}

/// A face found on an image, in pixels.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl Detection {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

/// Backend able to find faces and turn them into embeddings.
pub trait FaceEngine: Send + Sync {
    /// Find every face on `image`.
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Embedding of the face found at `face`.
    fn represent(&self, image: &RgbImage, face: &Detection) -> Result<Vec<f32>>;
}

/// Decode an image by its content, whatever its extension says.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|source| FaceError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let image = reader.decode().map_err(|source| FaceError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(image.to_rgb8())
}

/// Result of a 1:1 comparison.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Verification {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
    pub metric: DistanceMetric,
}

impl Verification {
    /// Similarity shown to users, in percent.
    pub fn similarity(&self) -> f32 {
        ((1.0 - self.distance) * 100.0).max(0.0)
    }
}

/// Compare captures with reference photos.
#[derive(Clone)]
pub struct FaceVerifier {
    engine: Arc<dyn FaceEngine>,
    metric: DistanceMetric,
    threshold: f32,
}

impl FaceVerifier {
    pub fn new(
        engine: Arc<dyn FaceEngine>,
        metric: DistanceMetric,
        threshold: Option<f32>,
    ) -> Self {
        Self {
            engine,
            metric,
            threshold: threshold.unwrap_or_else(|| metric.default_threshold()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether exactly one face is visible on the image.
    ///
    /// Any failure counts as "no".
    pub fn single_face_present(&self, path: &Path) -> bool {
        let faces = load_image(path).and_then(|image| self.engine.detect(&image));

        match faces {
            Ok(faces) => faces.len() == 1,
            Err(err) => {
                tracing::error!(error = %err, "face detection error");
                false
            },
        }
    }

    fn embeddings(&self, path: &Path) -> Result<Vec<Vec<f32>>> {
        let image = load_image(path)?;
        let faces = self.engine.detect(&image)?;
        if faces.is_empty() {
            return Err(FaceError::NoFace(path.display().to_string()));
        }

        faces
            .iter()
            .map(|face| self.engine.represent(&image, face))
            .collect()
    }

    /// Verify whether `probe` and `reference` show the same person.
    ///
    /// The closest pair of faces across both images decides.
    pub fn verify(&self, probe: &Path, reference: &Path) -> Result<Verification> {
        let probes = self.embeddings(probe)?;
        let references = self.embeddings(reference)?;

        let mut distance = f32::INFINITY;
        for a in &probes {
            for b in &references {
                if a.len() != b.len() {
                    return Err(FaceError::Output(format!(
                        "embedding length mismatch ({} vs {})",
                        a.len(),
                        b.len()
                    )));
                }
                distance = distance.min(self.metric.distance(a, b));
            }
        }

        let verification = Verification {
            verified: distance <= self.threshold,
            distance,
            threshold: self.threshold,
            metric: self.metric,
        };
        tracing::debug!(?verification, "face verification done");

        Ok(verification)
    }
}
