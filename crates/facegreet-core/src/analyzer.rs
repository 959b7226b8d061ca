//! The face detection + descriptor capability consumed by the rest of the crate.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Detects faces in an image and computes a descriptor for each.
///
/// Treated as opaque and possibly slow. Implementations may fail per call.
pub trait FaceAnalyzer {
    /// Every face in the image, highest detection confidence first.
    fn detect_all(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzeError>;

    /// The most confident face, or `None` when the image contains no face.
    fn detect_single(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzeError> {
        Ok(self.detect_all(image)?.into_iter().next())
    }
}

impl<A: FaceAnalyzer + ?Sized> FaceAnalyzer for Box<A> {
    fn detect_all(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzeError> {
        (**self).detect_all(image)
    }

    fn detect_single(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzeError> {
        (**self).detect_single(image)
    }
}

/// SCRFD detection + ArcFace descriptors over ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub const DETECTOR_FILE: &'static str = "det_10g.onnx";
    pub const RECOGNIZER_FILE: &'static str = "w600k_r50.onnx";

    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzeError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }

    /// Load both models from their standard file names inside `model_dir`.
    pub fn load_from_dir(model_dir: &Path) -> Result<Self, AnalyzeError> {
        let scrfd = model_dir.join(Self::DETECTOR_FILE);
        let arcface = model_dir.join(Self::RECOGNIZER_FILE);
        Self::load(&scrfd.to_string_lossy(), &arcface.to_string_lossy())
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect_all(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzeError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            // SCRFD boxes without keypoints cannot be aligned.
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let descriptor = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, descriptor });
        }
        Ok(faces)
    }

    fn detect_single(&mut self, image: &RgbImage) -> Result<Option<DetectedFace>, AnalyzeError> {
        let Some(bbox) = self
            .detector
            .detect(image)?
            .into_iter()
            .find(|b| b.landmarks.is_some())
        else {
            return Ok(None);
        };
        let descriptor = self.recognizer.extract(image, &bbox)?;
        Ok(Some(DetectedFace { bbox, descriptor }))
    }
}
