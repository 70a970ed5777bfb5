//! Semantic image embeddings.
//!
//! One fixed dimensionality per deployment. `PerceptualEmbedder` is the
//! default provider: the image's DCT perceptual hash bits padded to the
//! configured dimension and L2-normalized. It captures coarse visual
//! structure, costs nothing at inference time, and needs no model files.
//! Deployments wanting real semantic search enable the `onnx-models` feature
//! and use `ClipEmbedder` instead.

use anyhow::{anyhow, Result};
use image::DynamicImage;

/// Produces one fixed-dimension vector per image.
pub trait ImageEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn model_name(&self) -> &str;
    fn embed(&self, img: &DynamicImage) -> Result<Vec<f32>>;
}

/// Perceptual-hash embedding: 256 DCT bits as 0/1 components, zero-padded to
/// the configured dimension, L2-normalized.
pub struct PerceptualEmbedder {
    dimension: usize,
}

impl PerceptualEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl ImageEmbedder for PerceptualEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "perceptual"
    }

    fn embed(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        use img_hash::HasherConfig;

        let thumbnail = img.thumbnail(64, 64);
        let hasher = HasherConfig::new()
            .hash_size(16, 16)
            .preproc_dct()
            .to_hasher();

        let rgba = thumbnail.to_rgba8();
        let (width, height) = rgba.dimensions();
        let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
            .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

        let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

        let mut vector = vec![0.0f32; self.dimension];
        for (i, slot) in vector.iter_mut().enumerate().take(hash.as_bytes().len() * 8) {
            let bit = (hash.as_bytes()[i / 8] >> (i % 8)) & 1;
            *slot = bit as f32;
        }

        Ok(l2_normalize(vector))
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(feature = "onnx-models")]
pub use clip::ClipEmbedder;

#[cfg(feature = "onnx-models")]
mod clip {
    //! CLIP visual encoder via ONNX Runtime.

    use super::{l2_normalize, ImageEmbedder};
    use anyhow::{anyhow, Result};
    use image::DynamicImage;
    use ort::session::{builder::GraphOptimizationLevel, Session};
    use ort::value::Tensor;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    /// CLIP ViT-B/32 visual encoder
    static VISUAL_MODEL: OnceLock<Mutex<Session>> = OnceLock::new();

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
            tracing::info!(model = %filename, "Downloading CLIP model...");
            let response = ureq::get(url)
                .call()
                .map_err(|e| anyhow!("Failed to download model: {}", e))?;

            let mut file = std::fs::File::create(&model_path)?;
            std::io::copy(&mut response.into_reader(), &mut file)?;
            tracing::info!(model = %filename, path = ?model_path, "CLIP model downloaded");
        }

        Ok(model_path)
    }

    fn init_visual_model() -> Result<()> {
        if VISUAL_MODEL.get().is_some() {
            return Ok(());
        }

        // Qdrant's CLIP ViT-B/32 visual encoder (ONNX)
        let model_path = ensure_model(
            "clip-vit-b32-vision.onnx",
            "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx",
        )?;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)?;

        let _ = VISUAL_MODEL.set(Mutex::new(session));
        Ok(())
    }

    /// CLIP ViT-B/32 image embeddings (512-dimensional).
    pub struct ClipEmbedder;

    impl ClipEmbedder {
        pub fn new() -> Result<Self> {
            init_visual_model()?;
            Ok(Self)
        }
    }

    impl ImageEmbedder for ClipEmbedder {
        fn dimension(&self) -> usize {
            512
        }

        fn model_name(&self) -> &str {
            "clip-vit-b32"
        }

        fn embed(&self, img: &DynamicImage) -> Result<Vec<f32>> {
            const INPUT_SIZE: u32 = 224;

            let mut model = VISUAL_MODEL
                .get()
                .ok_or_else(|| anyhow!("Visual model not initialized"))?
                .lock()
                .map_err(|e| anyhow!("Failed to lock model: {}", e))?;

            let resized =
                img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
            let rgb = resized.to_rgb8();

            // CLIP normalization constants (ImageNet stats)
            let mean = [0.48145466, 0.4578275, 0.40821073];
            let std = [0.26862954, 0.26130258, 0.27577711];

            // Convert to tensor (NCHW format, normalized)
            let mut input_data = vec![0.0f32; (3 * INPUT_SIZE * INPUT_SIZE) as usize];

            for y in 0..INPUT_SIZE as usize {
                for x in 0..INPUT_SIZE as usize {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    let idx = y * INPUT_SIZE as usize + x;

                    input_data[idx] = ((pixel[0] as f32 / 255.0) - mean[0]) / std[0];
                    input_data[INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                        ((pixel[1] as f32 / 255.0) - mean[1]) / std[1];
                    input_data[2 * INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                        ((pixel[2] as f32 / 255.0) - mean[2]) / std[2];
                }
            }

            let input_tensor = Tensor::from_array((
                [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
                input_data.into_boxed_slice(),
            ))?;

            let outputs = model.run(ort::inputs!["pixel_values" => input_tensor])?;

            let embedding_output = outputs
                .iter()
                .next()
                .ok_or_else(|| anyhow!("No embedding output"))?;

            let (_shape, embedding_data) = embedding_output.1.try_extract_tensor::<f32>()?;

            Ok(l2_normalize(embedding_data.to_vec()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn gradient(seed: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(96, 96, move |x, y| {
            image::Rgb([
                (x as u8).wrapping_mul(seed),
                (y as u8).wrapping_add(seed),
                ((x + y) % 256) as u8,
            ])
        }))
    }

    #[test]
    fn test_dimension_and_normalization() {
        let embedder = PerceptualEmbedder::new(512);
        let vector = embedder.embed(&gradient(3)).unwrap();

        assert_eq!(vector.len(), 512);
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm was {}", norm);
    }

    #[test]
    fn test_deterministic() {
        let embedder = PerceptualEmbedder::new(512);
        let a = embedder.embed(&gradient(3)).unwrap();
        let b = embedder.embed(&gradient(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_content_gets_distinct_vectors() {
        let embedder = PerceptualEmbedder::new(512);
        let a = embedder.embed(&gradient(3)).unwrap();
        let b = embedder.embed(&gradient(7)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_small_dimension_truncates() {
        let embedder = PerceptualEmbedder::new(64);
        let vector = embedder.embed(&gradient(3)).unwrap();
        assert_eq!(vector.len(), 64);
    }
}
