//! ONNX Runtime backend.
//!
//! Detection uses an UltraFace-style network (`scores [1, N, 2]`,
//! `boxes [1, N, 4]` as normalized corners). Recognition uses an
//! ArcFace-style network fed with aligned square crops.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use serde::{Deserialize, Serialize};

use super::{Detection, FaceEngine, FaceError, Result};

/// Model files and their pre/post-processing knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    /// Face detection network.
    pub detector: PathBuf,
    /// Face embedding network.
    pub recognizer: PathBuf,
    /// Detector input as `[width, height]`.
    pub detector_input: [u32; 2],
    /// Side of the square crop fed to the recognizer.
    pub recognizer_input: u32,
    /// Minimum face score.
    pub detection_confidence: f32,
    /// Overlap above which two detections are the same face.
    pub nms_iou: f32,
    pub scores_output: String,
    pub boxes_output: String,
    /// Worker threads for each session.
    pub threads: usize,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/version-RFB-320.onnx"),
            recognizer: PathBuf::from("models/w600k_r50.onnx"),
            detector_input: [320, 240],
            recognizer_input: 112,
            detection_confidence: 0.7,
            nms_iou: 0.3,
            scores_output: "scores".into(),
            boxes_output: "boxes".into(),
            threads: 2,
        }
    }
}

/// [`FaceEngine`] running both networks on ONNX Runtime.
pub struct OnnxEngine {
    config: OnnxConfig,
    detector: Mutex<Session>,
    recognizer: Mutex<Session>,
}

fn open_session(path: &Path, threads: usize) -> Result<Session> {
    let model = |err: &dyn std::fmt::Display| FaceError::Model {
        path: path.to_path_buf(),
        message: err.to_string(),
    };

    tracing::debug!(path = %path.display(), "loading onnx model");
    Session::builder()
        .map_err(|e| model(&e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| model(&e))?
        .with_intra_threads(threads)
        .map_err(|e| model(&e))?
        .commit_from_file(path)
        .map_err(|e| model(&e))
}

/// Name of the first input of a model.
fn first_input<'a>(mut names: impl Iterator<Item = &'a str>, model: &str) -> Result<String> {
    names
        .next()
        .map(str::to_owned)
        .ok_or_else(|| FaceError::Output(format!("{model} has no input")))
}

impl OnnxEngine {
    /// Load both models.
    pub fn new(config: OnnxConfig) -> Result<Self> {
        let detector = open_session(&config.detector, config.threads)?;
        let recognizer = open_session(&config.recognizer, config.threads)?;

        tracing::info!(
            detector = %config.detector.display(),
            recognizer = %config.recognizer.display(),
            "face models loaded"
        );

        Ok(Self {
            config,
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceEngine for OnnxEngine {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let [width, height] = self.config.detector_input;
        let resized = imageops::resize(image, width, height, FilterType::Triangle);
        let data = to_tensor(&resized, 127.0, 128.0);
        let shape = [1, 3, height as i64, width as i64];

        let mut session = self.detector.lock().map_err(|_| FaceError::Poisoned)?;
        let input_name = first_input(session.inputs.iter().map(|i| i.name.as_str()), "detector")?;
        let input = Value::from_array((shape.to_vec(), data))?;
        let outputs = session.run(ort::inputs![input_name => input])?;

        let scores = outputs
            .get(&self.config.scores_output)
            .ok_or_else(|| FaceError::Output(format!("missing `{}`", self.config.scores_output)))?;
        let boxes = outputs
            .get(&self.config.boxes_output)
            .ok_or_else(|| FaceError::Output(format!("missing `{}`", self.config.boxes_output)))?;
        let (_, scores) = scores.try_extract_tensor::<f32>()?;
        let (_, boxes) = boxes.try_extract_tensor::<f32>()?;

        let candidates = decode_detections(
            scores,
            boxes,
            image.width() as f32,
            image.height() as f32,
            self.config.detection_confidence,
        )?;
        let faces = non_max_suppression(candidates, self.config.nms_iou);
        tracing::debug!(faces = faces.len(), "faces detected");

        Ok(faces)
    }

    fn represent(&self, image: &RgbImage, face: &Detection) -> Result<Vec<f32>> {
        let side = self.config.recognizer_input;
        let crop = face_crop(image, face);
        let resized = imageops::resize(&crop, side, side, FilterType::Triangle);
        let data = to_tensor(&resized, 127.5, 127.5);
        let shape = [1, 3, side as i64, side as i64];

        let mut session = self.recognizer.lock().map_err(|_| FaceError::Poisoned)?;
        let input_name =
            first_input(session.inputs.iter().map(|i| i.name.as_str()), "recognizer")?;
        let input = Value::from_array((shape.to_vec(), data))?;
        let outputs = session.run(ort::inputs![input_name => input])?;

        let (_, embedding) = outputs
            .iter()
            .next()
            .ok_or_else(|| FaceError::Output("recognizer has no output".into()))?;
        let (_, embedding) = embedding.try_extract_tensor::<f32>()?;
        if embedding.is_empty() {
            return Err(FaceError::Output("empty embedding".into()));
        }

        Ok(embedding.to_vec())
    }
}

/// NCHW planar RGB, `(value - mean) / std`.
fn to_tensor(image: &RgbImage, mean: f32, std: f32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (pixel[c] as f32 - mean) / std;
        }
    }

    data
}

/// Turn raw detector output into boxes in image pixels.
fn decode_detections(
    scores: &[f32],
    boxes: &[f32],
    width: f32,
    height: f32,
    confidence: f32,
) -> Result<Vec<Detection>> {
    if scores.len() % 2 != 0 || boxes.len() % 4 != 0 || scores.len() / 2 != boxes.len() / 4 {
        return Err(FaceError::Output(format!(
            "{} scores do not match {} box coordinates",
            scores.len(),
            boxes.len()
        )));
    }

    Ok(scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(score, _)| score[1] > confidence)
        .map(|(score, b)| Detection {
            x1: (b[0] * width).clamp(0.0, width),
            y1: (b[1] * height).clamp(0.0, height),
            x2: (b[2] * width).clamp(0.0, width),
            y2: (b[3] * height).clamp(0.0, height),
            confidence: score[1],
        })
        .filter(|d| d.area() > 0.0)
        .collect())
}

/// Keep the best box of each overlapping group.
fn non_max_suppression(mut candidates: Vec<Detection>, iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou) {
            kept.push(candidate);
        }
    }
    kept
}

/// Square crop centered on the face, clamped to the image.
fn face_crop(image: &RgbImage, face: &Detection) -> RgbImage {
    let (width, height) = image.dimensions();
    let side = face.width().max(face.height()).max(1.0);
    let cx = (face.x1 + face.x2) / 2.0;
    let cy = (face.y1 + face.y2) / 2.0;

    let x = (cx - side / 2.0).max(0.0) as u32;
    let y = (cy - side / 2.0).max(0.0) as u32;
    let x = x.min(width.saturating_sub(1));
    let y = y.min(height.saturating_sub(1));
    let w = (side as u32).clamp(1, width - x);
    let h = (side as u32).clamp(1, height - y);

    imageops::crop_imm(image, x, y, w, h).to_image()
}
