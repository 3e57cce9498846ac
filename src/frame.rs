//! Encoded frame snapshots.
//!
//! A `Frame` is a point-in-time JPEG copy of what the camera was showing.
//! It holds no reference into the live stream and is owned by exactly one
//! submission: there is no `Clone`, so a frame cannot outlive or be shared
//! beyond the upload that consumes it.
//!
//! ```compile_fail
//! let frame = hue_watch::Frame::from_jpeg(vec![0xFF, 0xD8, 0xFF, 0xD9], 1, 1);
//! let copy = frame.clone();
//! ```

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::CaptureError;

/// Default JPEG quality, matching a 0.9 canvas export.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// MIME type of every encoded frame.
pub const FRAME_CONTENT_TYPE: &str = "image/jpeg";

/// Raw RGB24 pixels read from a capture stream.
#[derive(Debug)]
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl CapturedImage {
    /// Expected byte length for an RGB24 image of these dimensions.
    pub fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
    }

    /// True when the buffer holds a complete RGB24 image.
    pub fn is_complete(&self) -> bool {
        self.width > 0
            && self.height > 0
            && Self::expected_len(self.width, self.height) == Some(self.pixels.len())
    }
}

/// Encoded JPEG snapshot plus its dimensions.
#[derive(Debug)]
pub struct Frame {
    jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Encode an RGB24 image as JPEG at the given quality (1..=100).
    pub fn encode(image: &CapturedImage, quality: u8) -> Result<Self, CaptureError> {
        if !image.is_complete() {
            return Err(CaptureError::Encode(format!(
                "incomplete {}x{} image ({} bytes)",
                image.width,
                image.height,
                image.pixels.len()
            )));
        }
        let mut jpeg = Vec::with_capacity(image.pixels.len() / 8);
        JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
            .encode(
                &image.pixels,
                image.width,
                image.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|err| CaptureError::Encode(err.to_string()))?;
        Ok(Self::from_jpeg(jpeg, image.width, image.height))
    }

    /// Wrap bytes that are already JPEG encoded.
    pub fn from_jpeg(jpeg: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            jpeg,
            width,
            height,
        }
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn len(&self) -> usize {
        self.jpeg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }

    /// Consume the frame, yielding the encoded bytes.
    pub fn into_jpeg(self) -> Vec<u8> {
        self.jpeg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> CapturedImage {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgb);
        }
        CapturedImage {
            pixels,
            width,
            height,
        }
    }

    #[test]
    fn encodes_jpeg_with_source_dimensions() -> anyhow::Result<()> {
        let frame = Frame::encode(&solid(32, 24, [40, 160, 60]), DEFAULT_JPEG_QUALITY)?;
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(&frame.jpeg()[..2], &[0xFF, 0xD8]);
        assert_eq!(&frame.jpeg()[frame.len() - 2..], &[0xFF, 0xD9]);

        let decoded = image::load_from_memory(frame.jpeg())?;
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
        Ok(())
    }

    #[test]
    fn rejects_truncated_pixel_buffer() {
        let mut image = solid(8, 8, [0, 0, 0]);
        image.pixels.truncate(10);
        let err = Frame::encode(&image, DEFAULT_JPEG_QUALITY).unwrap_err();
        assert_eq!(err.code(), "encode_failed");
    }
}
