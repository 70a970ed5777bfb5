//! Content signatures for duplicate detection.
//!
//! The checksum is computed over the canonical decoded pixel buffer, not the
//! uploaded container bytes, so the same visual content hashes identically
//! whether it arrives as PNG, BMP, or any other lossless re-encoding. The
//! perceptual hash is a 64-bit DCT signature compared by Hamming distance.

use anyhow::anyhow;
use image::DynamicImage;
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone)]
pub struct ContentSignature {
    /// Hex SHA-256 over width, height and the raw RGB8 buffer
    pub checksum: String,
    /// Base64 64-bit DCT hash
    pub perceptual_hash: String,
}

/// Decode an upload into pixels. Undecodable bytes are a validation failure;
/// the pipeline never starts for them.
pub fn decode_image(bytes: &[u8]) -> PipelineResult<DynamicImage> {
    image::load_from_memory(bytes)
        .map_err(|e| PipelineError::Validation(format!("undecodable image: {}", e)))
}

/// Compute both signatures from decoded pixel data.
pub fn compute_signature(img: &DynamicImage) -> PipelineResult<ContentSignature> {
    Ok(ContentSignature {
        checksum: canonical_checksum(img),
        perceptual_hash: perceptual_hash(img)
            .map_err(|e| PipelineError::Validation(format!("perceptual hash failed: {}", e)))?,
    })
}

/// SHA-256 over the canonical decoded form. Dimensions are hashed first so
/// two buffers that happen to share bytes at different shapes cannot collide.
fn canonical_checksum(img: &DynamicImage) -> String {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut hasher = Sha256::new();
    hasher.update(width.to_be_bytes());
    hasher.update(height.to_be_bytes());
    hasher.update(rgb.as_raw());

    format!("{:x}", hasher.finalize())
}

fn perceptual_hash(img: &DynamicImage) -> anyhow::Result<String> {
    use img_hash::HasherConfig;

    // Small thumbnail first; thumbnail() preserves aspect ratio and is much
    // faster than resize for large inputs
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new()
        .hash_size(8, 8)
        .preproc_dct()
        .to_hasher();

    // Convert thumbnail to img_hash's image format
    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();

    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

    Ok(hash.to_base64())
}

/// Hamming distance between two base64 perceptual hashes.
pub fn hamming_distance(hash1: &str, hash2: &str) -> PipelineResult<u32> {
    use img_hash::ImageHash;

    let h1 = ImageHash::<Box<[u8]>>::from_base64(hash1)
        .map_err(|e| PipelineError::Validation(format!("invalid perceptual hash: {:?}", e)))?;
    let h2 = ImageHash::<Box<[u8]>>::from_base64(hash2)
        .map_err(|e| PipelineError::Validation(format!("invalid perceptual hash: {:?}", e)))?;

    Ok(h1.dist(&h2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    fn checkerboard(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        }))
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_undecodable_bytes_rejected() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_checksum_independent_of_container() {
        let img = gradient(96, 64);
        let png = decode_image(&encode(&img, ImageFormat::Png)).unwrap();
        let bmp = decode_image(&encode(&img, ImageFormat::Bmp)).unwrap();

        let sig_png = compute_signature(&png).unwrap();
        let sig_bmp = compute_signature(&bmp).unwrap();

        assert_eq!(sig_png.checksum, sig_bmp.checksum);
        assert_eq!(sig_png.perceptual_hash, sig_bmp.perceptual_hash);
    }

    #[test]
    fn test_checksum_sensitive_to_content_and_shape() {
        let a = compute_signature(&gradient(96, 64)).unwrap();
        let b = compute_signature(&checkerboard(96, 64)).unwrap();
        assert_ne!(a.checksum, b.checksum);

        // Same pixel stream reshaped must not collide
        let wide = compute_signature(&gradient(128, 32)).unwrap();
        let tall = compute_signature(&gradient(32, 128)).unwrap();
        assert_ne!(wide.checksum, tall.checksum);
    }

    #[test]
    fn test_hamming_distance_identity() {
        let sig = compute_signature(&gradient(96, 64)).unwrap();
        assert_eq!(
            hamming_distance(&sig.perceptual_hash, &sig.perceptual_hash).unwrap(),
            0
        );
    }

    #[test]
    fn test_dissimilar_content_is_distant() {
        let a = compute_signature(&gradient(96, 64)).unwrap();
        let b = compute_signature(&checkerboard(96, 64)).unwrap();
        let dist = hamming_distance(&a.perceptual_hash, &b.perceptual_hash).unwrap();
        assert!(dist > 10, "expected > 10 bits, got {}", dist);
    }

    #[test]
    fn test_resize_keeps_perceptual_hash_close() {
        // Smooth ramps only; no wrapping discontinuities for the resample to move
        let original = DynamicImage::ImageRgb8(RgbImage::from_fn(256, 192, |x, y| {
            image::Rgb([x as u8, ((y * 255) / 191) as u8, 128])
        }));
        let resized = original.resize_exact(250, 188, image::imageops::FilterType::Triangle);

        let a = compute_signature(&original).unwrap();
        let b = compute_signature(&resized).unwrap();

        assert_ne!(a.checksum, b.checksum);
        let dist = hamming_distance(&a.perceptual_hash, &b.perceptual_hash).unwrap();
        assert!(dist <= 10, "expected <= 10 bits, got {}", dist);
    }

    #[test]
    fn test_invalid_hash_string_rejected() {
        assert!(hamming_distance("???", "???").is_err());
    }
}
