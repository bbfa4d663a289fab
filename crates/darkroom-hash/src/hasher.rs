//! Canonical pixel hashing.

use darkroom_core::{ContentFingerprint, Error, Result};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Domain separator for the canonical encoding. Bump when the encoding changes.
const CANONICAL_TAG: &[u8] = b"darkroom-rgba8-v1";
/// Domain separator for the raw-bytes fallback.
const RAW_TAG: &[u8] = b"darkroom-raw-v1";

/// Decoder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HasherConfig {
    #[serde(default = "default_max_dimension")]
    pub max_width: u32,
    #[serde(default = "default_max_dimension")]
    pub max_height: u32,
    #[serde(default = "default_max_alloc")]
    pub max_alloc_bytes: u64,
}

fn default_max_dimension() -> u32 {
    16_384
}

fn default_max_alloc() -> u64 {
    1024 * 1024 * 1024
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_dimension(),
            max_height: default_max_dimension(),
            max_alloc_bytes: default_max_alloc(),
        }
    }
}

/// Which path produced a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    /// Hash of oriented RGBA8 pixels.
    Canonical,
    /// Canonicalisation failed; hash of the raw input bytes.
    RawFallback,
}

/// A fingerprint plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprinted {
    pub fingerprint: ContentFingerprint,
    pub mode: HashMode,
    pub width: u32,
    pub height: u32,
}

/// Computes [`ContentFingerprint`]s from encoded images.
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    config: HasherConfig,
}

impl ContentHasher {
    pub fn new(config: HasherConfig) -> Self {
        Self { config }
    }

    /// Fingerprint `raw` by its decoded pixels.
    ///
    /// Returns [`Error::Decode`] when the input is not a readable image.
    pub fn fingerprint(&self, raw: &[u8]) -> Result<ContentFingerprint> {
        Ok(self.fingerprint_with_outcome(raw)?.fingerprint)
    }

    /// Like [`fingerprint`](Self::fingerprint) but also reports the hashing path.
    pub fn fingerprint_with_outcome(&self, raw: &[u8]) -> Result<Fingerprinted> {
        let mut reader = ImageReader::new(Cursor::new(raw))
            .with_guessed_format()
            .map_err(|e| Error::Decode(format!("Failed to sniff format: {}", e)))?;
        reader.limits(self.limits());

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| Error::Decode(e.to_string()))?;

        let orientation = decoder.orientation();
        let image = DynamicImage::from_decoder(decoder).map_err(|e| Error::Decode(e.to_string()))?;
        let decoded = (image.width(), image.height());

        let canonical = match orientation {
            Ok(orientation) => canonical_digest(image, orientation),
            Err(e) => Err(format!("orientation metadata unreadable: {}", e)),
        };
        Ok(settle(raw, canonical, decoded))
    }

    fn limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.config.max_width);
        limits.max_image_height = Some(self.config.max_height);
        limits.max_alloc = Some(self.config.max_alloc_bytes);
        limits
    }
}

/// Oriented digest plus the oriented width and height.
type Canonical = std::result::Result<(ContentFingerprint, u32, u32), String>;

fn canonical_digest(mut image: DynamicImage, orientation: Orientation) -> Canonical {
    panic::catch_unwind(AssertUnwindSafe(move || {
        image.apply_orientation(orientation);
        let rgba = image.into_rgba8();

        let mut hasher = Sha256::new();
        hasher.update(CANONICAL_TAG);
        hasher.update(rgba.width().to_le_bytes());
        hasher.update(rgba.height().to_le_bytes());
        hasher.update(rgba.as_raw());
        (
            ContentFingerprint::from_digest(&hasher.finalize()),
            rgba.width(),
            rgba.height(),
        )
    }))
    .map_err(|_| "panic while canonicalising pixels".to_string())
}

/// Picks the canonical result, or falls back to the raw bytes with the
/// decoded (unoriented) dimensions.
fn settle(raw: &[u8], canonical: Canonical, decoded: (u32, u32)) -> Fingerprinted {
    match canonical {
        Ok((fingerprint, width, height)) => {
            debug!(fingerprint = %fingerprint.short(), width, height, "Fingerprinted image");
            Fingerprinted {
                fingerprint,
                mode: HashMode::Canonical,
                width,
                height,
            }
        }
        Err(reason) => {
            warn!(
                reason = %reason,
                "Canonicalisation failed, fingerprinting raw bytes; equivalent images may miss cache"
            );
            Fingerprinted {
                fingerprint: raw_fingerprint(raw),
                mode: HashMode::RawFallback,
                width: decoded.0,
                height: decoded.1,
            }
        }
    }
}

/// Fingerprint of the undecoded input bytes.
pub fn raw_fingerprint(raw: &[u8]) -> ContentFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(RAW_TAG);
    hasher.update(raw);
    ContentFingerprint::from_digest(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::{CompressionType, FilterType, PngEncoder};
    use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage, RgbaImage};
    use pretty_assertions::assert_eq;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    /// Big-endian TIFF block with an orientation entry and a camera make.
    fn exif(orientation: u16) -> Vec<u8> {
        let mut exif = b"MM\0*".to_vec();
        exif.extend_from_slice(&8u32.to_be_bytes());
        exif.extend_from_slice(&2u16.to_be_bytes());
        // Make, ASCII, inline
        exif.extend_from_slice(&0x010fu16.to_be_bytes());
        exif.extend_from_slice(&2u16.to_be_bytes());
        exif.extend_from_slice(&4u32.to_be_bytes());
        exif.extend_from_slice(b"Cam\0");
        // Orientation, SHORT
        exif.extend_from_slice(&0x0112u16.to_be_bytes());
        exif.extend_from_slice(&3u16.to_be_bytes());
        exif.extend_from_slice(&1u32.to_be_bytes());
        exif.extend_from_slice(&orientation.to_be_bytes());
        exif.extend_from_slice(&[0, 0]);
        exif.extend_from_slice(&0u32.to_be_bytes());
        exif
    }

    fn png_with_exif(image: &RgbImage, exif: Vec<u8>) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = PngEncoder::new(&mut buf);
        encoder.set_exif_metadata(exif).unwrap();
        encoder
            .write_image(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
            .unwrap();
        buf
    }

    #[test]
    fn test_same_pixels_different_container() {
        let image = gradient(64, 48);
        let hasher = ContentHasher::default();

        let png = hasher.fingerprint(&encode(&image, ImageFormat::Png)).unwrap();
        let bmp = hasher.fingerprint(&encode(&image, ImageFormat::Bmp)).unwrap();
        assert_eq!(png, bmp);
    }

    #[test]
    fn test_same_pixels_different_encoder_settings() {
        let image = gradient(32, 32);
        let hasher = ContentHasher::default();

        let mut fast = Vec::new();
        PngEncoder::new_with_quality(&mut fast, CompressionType::Fast, FilterType::NoFilter)
            .write_image(image.as_raw(), 32, 32, ExtendedColorType::Rgb8)
            .unwrap();
        let mut best = Vec::new();
        PngEncoder::new_with_quality(&mut best, CompressionType::Best, FilterType::Paeth)
            .write_image(image.as_raw(), 32, 32, ExtendedColorType::Rgb8)
            .unwrap();
        assert_ne!(fast, best);

        assert_eq!(
            hasher.fingerprint(&fast).unwrap(),
            hasher.fingerprint(&best).unwrap()
        );
    }

    #[test]
    fn test_opaque_alpha_matches_rgb() {
        let rgb = gradient(16, 16);
        let rgba = RgbaImage::from_fn(16, 16, |x, y| {
            let p = rgb.get_pixel(x, y);
            image::Rgba([p[0], p[1], p[2], 255])
        });
        let mut rgba_png = Vec::new();
        rgba.write_to(&mut Cursor::new(&mut rgba_png), ImageFormat::Png)
            .unwrap();

        let hasher = ContentHasher::default();
        assert_eq!(
            hasher.fingerprint(&encode(&rgb, ImageFormat::Png)).unwrap(),
            hasher.fingerprint(&rgba_png).unwrap()
        );
    }

    #[test]
    fn test_different_pixels_differ() {
        let hasher = ContentHasher::default();
        let a = gradient(16, 16);
        let mut b = a.clone();
        b.put_pixel(3, 3, Rgb([0, 0, 0]));
        assert_ne!(
            hasher.fingerprint(&encode(&a, ImageFormat::Png)).unwrap(),
            hasher.fingerprint(&encode(&b, ImageFormat::Png)).unwrap()
        );
    }

    #[test]
    fn test_outcome_reports_canonical_mode() {
        let hasher = ContentHasher::default();
        let outcome = hasher
            .fingerprint_with_outcome(&encode(&gradient(20, 10), ImageFormat::Png))
            .unwrap();
        assert_eq!(outcome.mode, HashMode::Canonical);
        assert_eq!((outcome.width, outcome.height), (20, 10));
        assert_eq!(outcome.fingerprint.as_str().len(), 64);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let hasher = ContentHasher::default();
        let err = hasher.fingerprint(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_limits_reject_oversized() {
        let hasher = ContentHasher::new(HasherConfig {
            max_width: 8,
            ..Default::default()
        });
        let err = hasher
            .fingerprint(&encode(&gradient(16, 4), ImageFormat::Png))
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_raw_fingerprint_is_distinct_from_canonical() {
        let bytes = encode(&gradient(8, 8), ImageFormat::Png);
        let canonical = ContentHasher::default().fingerprint(&bytes).unwrap();
        assert_ne!(raw_fingerprint(&bytes), canonical);
        assert_eq!(raw_fingerprint(&bytes), raw_fingerprint(&bytes));
    }

    #[test]
    fn test_orientation_tag_matches_rotated_pixels() {
        let stored = gradient(8, 4);
        let tagged = png_with_exif(&stored, exif(6));
        let rotated = encode(&image::imageops::rotate90(&stored), ImageFormat::Png);

        let hasher = ContentHasher::default();
        let from_tag = hasher.fingerprint_with_outcome(&tagged).unwrap();
        let from_pixels = hasher.fingerprint_with_outcome(&rotated).unwrap();

        assert_eq!(from_tag.mode, HashMode::Canonical);
        assert_eq!(from_tag.fingerprint, from_pixels.fingerprint);
        assert_ne!(
            from_tag.fingerprint,
            hasher.fingerprint(&encode(&stored, ImageFormat::Png)).unwrap()
        );
    }

    #[test]
    fn test_outcome_reports_oriented_dimensions() {
        let hasher = ContentHasher::default();
        let outcome = hasher
            .fingerprint_with_outcome(&png_with_exif(&gradient(8, 4), exif(6)))
            .unwrap();
        assert_eq!((outcome.width, outcome.height), (4, 8));

        let upright = hasher
            .fingerprint_with_outcome(&png_with_exif(&gradient(8, 4), exif(1)))
            .unwrap();
        assert_eq!((upright.width, upright.height), (8, 4));
    }

    #[test]
    fn test_metadata_does_not_change_fingerprint() {
        let image = gradient(12, 9);
        let plain = encode(&image, ImageFormat::Png);
        let annotated = png_with_exif(&image, exif(1));
        assert_ne!(plain, annotated);

        let hasher = ContentHasher::default();
        assert_eq!(
            hasher.fingerprint(&plain).unwrap(),
            hasher.fingerprint(&annotated).unwrap()
        );
    }

    #[test]
    fn test_failed_canonicalisation_falls_back_to_raw_bytes() {
        let bytes = encode(&gradient(8, 4), ImageFormat::Png);
        let outcome = settle(&bytes, Err("no pixels".to_string()), (8, 4));

        assert_eq!(outcome.mode, HashMode::RawFallback);
        assert_eq!(outcome.fingerprint, raw_fingerprint(&bytes));
        assert_eq!((outcome.width, outcome.height), (8, 4));
        assert_ne!(
            outcome.fingerprint,
            ContentHasher::default().fingerprint(&bytes).unwrap()
        );
    }

    #[test]
    fn test_raw_fallback_is_byte_sensitive() {
        let a = encode(&gradient(8, 8), ImageFormat::Png);
        let b = encode(&gradient(8, 8), ImageFormat::Bmp);
        let fa = settle(&a, Err("x".into()), (8, 8)).fingerprint;
        let fb = settle(&b, Err("x".into()), (8, 8)).fingerprint;
        assert_ne!(fa, fb);
    }
}
