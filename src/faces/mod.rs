//! Face detection and person clustering.

pub mod clustering;
pub mod engine;

pub use clustering::FaceClusterer;
pub use engine::{DetectedFace, FaceEngine, NoFaceEngine};

#[cfg(feature = "onnx-models")]
pub use engine::OnnxFaceEngine;
