//! Face detection backends.
//!
//! Detection is a capability behind the `FaceEngine` trait: the pipeline only
//! needs "zero or more regions with embeddings" per image. `OnnxFaceEngine`
//! (feature `onnx-models`) runs UltraFace for detection and ArcFace for
//! 512-dim embeddings; `NoFaceEngine` is the stand-in when no detection
//! backend is configured and simply reports no faces.

use anyhow::Result;
use image::DynamicImage;

use crate::store::FaceBox;

/// A detected face: normalized bounding box plus its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    /// Bounding box with all coordinates in [0,1]
    pub bbox: FaceBox,
    /// L2-normalized embedding
    pub embedding: Vec<f32>,
    /// Detection confidence (0-1)
    pub confidence: f32,
}

pub trait FaceEngine: Send + Sync {
    fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>>;
}

/// No detection backend configured: every image yields zero faces. Zero
/// faces is a normal outcome, so the rest of the pipeline is unaffected.
pub struct NoFaceEngine;

impl FaceEngine for NoFaceEngine {
    fn detect(&self, _img: &DynamicImage) -> Result<Vec<DetectedFace>> {
        Ok(Vec::new())
    }
}

#[cfg(feature = "onnx-models")]
pub use onnx::OnnxFaceEngine;

#[cfg(feature = "onnx-models")]
mod onnx {
    use super::{DetectedFace, FaceEngine};
    use crate::store::FaceBox;
    use anyhow::{anyhow, Result};
    use image::{DynamicImage, GenericImageView};
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    /// Face detection model (UltraFace - lightweight and fast)
    static DETECTION_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();
    /// Face embedding model (ArcFace - generates 512-dim embeddings)
    static EMBEDDING_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

    /// Get the models directory path
    fn get_models_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not find local data directory"))?;
        let models_dir = data_dir.join("pixvault").join("models");
        std::fs::create_dir_all(&models_dir)?;
        Ok(models_dir)
    }

    /// Download a model file if it doesn't exist
    fn ensure_model(filename: &str, url: &str) -> Result<PathBuf> {
        let models_dir = get_models_dir()?;
        let model_path = models_dir.join(filename);

        if !model_path.exists() {
            tracing::info!(model = %filename, "Downloading model...");
            let response = ureq::get(url)
                .call()
                .map_err(|e| anyhow!("Failed to download model: {}", e))?;

            let mut file = std::fs::File::create(&model_path)?;
            std::io::copy(&mut response.into_reader(), &mut file)?;
            tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
        }

        Ok(model_path)
    }

    fn init_detection_model() -> Result<()> {
        if DETECTION_MODEL.get().is_some() {
            return Ok(());
        }

        // UltraFace model for detection (320x240 version - fast)
        let detection_model_path = ensure_model(
            "ultraface-320.onnx",
            "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx"
        )?;

        let detection_session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&detection_model_path)?;

        let _ = DETECTION_MODEL.set(Mutex::new(detection_session));
        Ok(())
    }

    fn init_embedding_model() -> Result<()> {
        if EMBEDDING_MODEL.get().is_some() {
            return Ok(());
        }

        // ArcFace model for embeddings
        let embedding_model_path = ensure_model(
            "arcface-resnet100.onnx",
            "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx"
        )?;

        let embedding_session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&embedding_model_path)?;

        let _ = EMBEDDING_MODEL.set(Mutex::new(embedding_session));
        Ok(())
    }

    /// UltraFace detection + ArcFace embeddings via ONNX Runtime.
    pub struct OnnxFaceEngine;

    impl OnnxFaceEngine {
        /// Load (downloading if needed) both models.
        pub fn new() -> Result<Self> {
            init_detection_model()?;
            init_embedding_model()?;
            Ok(Self)
        }
    }

    impl FaceEngine for OnnxFaceEngine {
        fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>> {
            let mut detection_model = DETECTION_MODEL
                .get()
                .ok_or_else(|| anyhow!("Detection model not initialized"))?
                .lock()
                .map_err(|e| anyhow!("Failed to lock detection model: {}", e))?;

            let face_boxes = run_ultraface_detection(&mut detection_model, img)?;

            if face_boxes.is_empty() {
                return Ok(Vec::new());
            }

            let mut embedding_model = EMBEDDING_MODEL
                .get()
                .ok_or_else(|| anyhow!("Embedding model not initialized"))?
                .lock()
                .map_err(|e| anyhow!("Failed to lock embedding model: {}", e))?;

            let mut detected = Vec::new();
            for (bbox, confidence) in face_boxes {
                if bbox.w <= 0.0 || bbox.h <= 0.0 {
                    continue;
                }

                let face_crop = crop_face(img, &bbox);
                let embedding = run_arcface_embedding(&mut embedding_model, &face_crop)?;

                detected.push(DetectedFace {
                    bbox,
                    embedding,
                    confidence,
                });
            }

            Ok(detected)
        }
    }

    /// Run UltraFace detection model; boxes come back normalized to [0,1]
    fn run_ultraface_detection(
        session: &mut Session,
        img: &DynamicImage,
    ) -> Result<Vec<(FaceBox, f32)>> {
        const INPUT_WIDTH: u32 = 320;
        const INPUT_HEIGHT: u32 = 240;
        const CONFIDENCE_THRESHOLD: f32 = 0.7;
        const NMS_THRESHOLD: f32 = 0.3;

        // Resize image to model input size (use Triangle/bilinear for speed)
        let resized =
            img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        // Convert to tensor (NCHW format, normalized)
        let mut input_data = vec![0.0f32; (3 * INPUT_HEIGHT * INPUT_WIDTH) as usize];

        for y in 0..INPUT_HEIGHT as usize {
            for x in 0..INPUT_WIDTH as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                let idx = y * INPUT_WIDTH as usize + x;
                input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
                input_data[INPUT_HEIGHT as usize * INPUT_WIDTH as usize + idx] =
                    (pixel[1] as f32 - 127.0) / 128.0;
                input_data[2 * INPUT_HEIGHT as usize * INPUT_WIDTH as usize + idx] =
                    (pixel[2] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
            input_data.into_boxed_slice(),
        ))?;

        let outputs = session.run(ort::inputs!["input" => input_tensor])?;

        // UltraFace outputs: scores [1, anchors, 2] and boxes [1, anchors, 4]
        let scores_value = outputs
            .get("scores")
            .ok_or_else(|| anyhow!("No scores output"))?;
        let boxes_value = outputs
            .get("boxes")
            .ok_or_else(|| anyhow!("No boxes output"))?;

        let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
        let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

        let mut face_boxes = Vec::new();
        let num_anchors = scores_shape[1] as usize;

        for i in 0..num_anchors {
            let confidence = scores_data[i * 2 + 1]; // Face confidence (class 1)

            if confidence > CONFIDENCE_THRESHOLD {
                let x1 = boxes_data[i * 4].clamp(0.0, 1.0);
                let y1 = boxes_data[i * 4 + 1].clamp(0.0, 1.0);
                let x2 = boxes_data[i * 4 + 2].clamp(0.0, 1.0);
                let y2 = boxes_data[i * 4 + 3].clamp(0.0, 1.0);

                let bbox = FaceBox {
                    x: x1,
                    y: y1,
                    w: (x2 - x1).max(0.0),
                    h: (y2 - y1).max(0.0),
                };

                face_boxes.push((bbox, confidence));
            }
        }

        Ok(nms(face_boxes, NMS_THRESHOLD))
    }

    /// Non-maximum suppression to remove overlapping detections
    fn nms(mut boxes: Vec<(FaceBox, f32)>, threshold: f32) -> Vec<(FaceBox, f32)> {
        // Sort by confidence descending
        boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut keep = Vec::new();
        let mut suppressed = vec![false; boxes.len()];

        for i in 0..boxes.len() {
            if suppressed[i] {
                continue;
            }

            keep.push(boxes[i]);

            for j in (i + 1)..boxes.len() {
                if suppressed[j] {
                    continue;
                }

                if compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                    suppressed[j] = true;
                }
            }
        }

        keep
    }

    /// Compute Intersection over Union between two normalized boxes
    fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
        let x1 = a.x.max(b.x);
        let y1 = a.y.max(b.y);
        let x2 = (a.x + a.w).min(b.x + b.w);
        let y2 = (a.y + a.h).min(b.y + b.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = a.w * a.h + b.w * b.h - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Crop face region from image with padding
    fn crop_face(img: &DynamicImage, bbox: &FaceBox) -> DynamicImage {
        let (img_width, img_height) = img.dimensions();

        // Add 20% padding around the face
        let padding_x = bbox.w * 0.2;
        let padding_y = bbox.h * 0.2;

        let x = ((bbox.x - padding_x).max(0.0) * img_width as f32) as u32;
        let y = ((bbox.y - padding_y).max(0.0) * img_height as f32) as u32;
        let w = (((bbox.w + padding_x * 2.0) * img_width as f32) as u32).min(img_width - x);
        let h = (((bbox.h + padding_y * 2.0) * img_height as f32) as u32).min(img_height - y);

        img.crop_imm(x, y, w.max(1), h.max(1))
    }

    /// Run ArcFace embedding model
    fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>> {
        const INPUT_SIZE: u32 = 112;

        let resized =
            face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();

        // Convert to tensor (NCHW format, ArcFace normalization)
        let mut input_data = vec![0.0f32; (3 * INPUT_SIZE * INPUT_SIZE) as usize];

        for y in 0..INPUT_SIZE as usize {
            for x in 0..INPUT_SIZE as usize {
                let pixel = rgb.get_pixel(x as u32, y as u32);
                let idx = y * INPUT_SIZE as usize + x;
                input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
                input_data[INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                    (pixel[1] as f32 - 127.5) / 127.5;
                input_data[2 * INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                    (pixel[2] as f32 - 127.5) / 127.5;
            }
        }

        let input_tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input_data.into_boxed_slice(),
        ))?;

        // ArcFace ONNX model uses "data" as input name
        let outputs = session.run(ort::inputs!["data" => input_tensor])?;

        let embedding_output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("No embedding output"))?;

        let (_embedding_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

        // L2 normalization
        let embedding_vec: Vec<f32> = embedding_data.to_vec();
        let norm: f32 = embedding_vec.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm > 0.0 {
            Ok(embedding_vec.iter().map(|x| x / norm).collect())
        } else {
            Ok(embedding_vec)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_no_face_engine_reports_zero_faces() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(32, 32));
        let faces = NoFaceEngine.detect(&img).unwrap();
        assert!(faces.is_empty());
    }
}
