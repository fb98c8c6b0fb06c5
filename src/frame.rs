//! Frames and per-frame image helpers.
//!
//! - `Frame`: one decoded image plus its read-order index. Owned by exactly one
//!   frame stream from the moment it leaves the capture lock until it is
//!   encoded, then dropped.
//! - Cropping by detection box, JPEG encoding, and multipart chunk framing.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, RgbImage};

use crate::geometry::BoundingBox;

/// Boundary marker of the multipart stream. Must match the HTTP content type.
pub const MJPEG_BOUNDARY: &str = "frame";

/// JPEG quality for streamed frames and snaps.
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

const CHUNK_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const CHUNK_TRAILER: &[u8] = b"\r\n";

pub struct Frame {
    /// 1-based position in device read order.
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Copy out the pixels under `bbox`, clipped to the image. `None` when the
/// clipped region has zero width or height.
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (x, y, w, h) = bbox.crop_rect(image.width(), image.height())?;
    Some(image::imageops::crop_imm(image, x, y, w, h).to_image())
}

pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("cannot encode an empty image"));
    }
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Wrap one encoded image as a `multipart/x-mixed-replace` part.
pub fn mjpeg_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(CHUNK_HEADER.len() + jpeg.len() + CHUNK_TRAILER.len());
    chunk.extend_from_slice(CHUNK_HEADER);
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(CHUNK_TRAILER);
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn chunk_framing_is_exact() {
        let chunk = mjpeg_chunk(b"JPEGDATA");
        assert_eq!(
            chunk,
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEGDATA\r\n".to_vec()
        );
    }

    #[test]
    fn crop_copies_region_and_skips_empty() {
        let mut image = RgbImage::new(20, 10);
        image.put_pixel(5, 3, Rgb([9, 8, 7]));
        let cropped = crop(&image, &BoundingBox::new(5, 3, 8, 9)).expect("non-empty crop");
        assert_eq!(cropped.dimensions(), (3, 6));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([9, 8, 7]));

        assert!(crop(&image, &BoundingBox::new(20, 0, 25, 10)).is_none());
        assert!(crop(&image, &BoundingBox::new(4, 4, 4, 8)).is_none());
    }

    #[test]
    fn encodes_jpeg_with_soi_marker() -> Result<()> {
        let image = RgbImage::from_pixel(16, 16, Rgb([200, 10, 10]));
        let jpeg = encode_jpeg(&image, DEFAULT_JPEG_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(encode_jpeg(&RgbImage::new(0, 4), 90).is_err());
        Ok(())
    }
}
