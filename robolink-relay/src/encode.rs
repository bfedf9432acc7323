//! Frame encoding for the viewer transport.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::source::StreamError;

/// Encode a frame as JPEG and wrap it in standard base64.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<String, StreamError> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode_image(frame)
        .map_err(|e| StreamError::Encode(e.to_string()))?;
    Ok(STANDARD.encode(jpeg))
}

/// [`encode_frame`] on the blocking pool.
pub async fn encode_frame_blocking(frame: RgbImage, quality: u8) -> Result<String, StreamError> {
    tokio::task::spawn_blocking(move || encode_frame(&frame, quality))
        .await
        .map_err(|e| StreamError::Encode(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_base64_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, image::Rgb([200, 30, 30]));
        let encoded = encode_frame(&frame, 70).unwrap();

        let jpeg = STANDARD.decode(&encoded).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_quality_changes_size() {
        let frame = RgbImage::from_fn(64, 64, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8]));
        let low = encode_frame(&frame, 10).unwrap();
        let high = encode_frame(&frame, 95).unwrap();
        assert!(low.len() < high.len());
    }

    #[tokio::test]
    async fn test_blocking_encode() {
        let frame = RgbImage::new(4, 4);
        let encoded = encode_frame_blocking(frame, 70).await.unwrap();
        assert!(!encoded.is_empty());
    }
}
