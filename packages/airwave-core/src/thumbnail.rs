//! Thumbnail proxy: fetches the current track's artwork and re-encodes it
//! as PNG on demand.
//!
//! The engine caches one thumbnail URL per source; this module turns that
//! URL into PNG bytes for the client. SoundCloud covers are additionally
//! resized to a square with cover fit, since the upstream renditions vary.

use std::io::Cursor;

use image::imageops::FilterType;
use image::ImageFormat;

use crate::error::{AirwaveError, AirwaveResult};
use crate::protocol_constants::THUMBNAIL_COVER_SIZE;

/// Decodes arbitrary upstream image bytes and re-encodes them as PNG,
/// optionally cover-fitting into a square of `cover` pixels.
pub fn recode_png(bytes: &[u8], cover: Option<u32>) -> AirwaveResult<Vec<u8>> {
    let mut img = image::load_from_memory(bytes)
        .map_err(|e| AirwaveError::Upstream(format!("unreadable thumbnail image: {e}")))?;

    if let Some(size) = cover {
        img = img.resize_to_fill(size, size, FilterType::Lanczos3);
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| AirwaveError::Internal(format!("PNG encode failed: {e}")))?;
    Ok(out.into_inner())
}

/// Fetches a thumbnail URL and returns it as PNG bytes.
pub async fn fetch_png(
    http: &reqwest::Client,
    url: &str,
    cover_fit: bool,
) -> AirwaveResult<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| AirwaveError::Upstream(format!("thumbnail fetch failed: {e}")))?;
    if !response.status().is_success() {
        return Err(AirwaveError::Upstream(format!(
            "thumbnail upstream answered {}",
            response.status()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AirwaveError::Upstream(format!("thumbnail body unreadable: {e}")))?;

    recode_png(&bytes, cover_fit.then_some(THUMBNAIL_COVER_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn recodes_to_png_without_resizing() {
        let png = recode_png(&sample_jpeg(64, 48), None).unwrap();
        assert_eq!(&png[..4], &PNG_MAGIC);
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn cover_fit_produces_a_square() {
        let png = recode_png(&sample_jpeg(640, 360), Some(256)).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (256, 256));
    }

    #[test]
    fn garbage_input_is_an_upstream_error() {
        let err = recode_png(b"not an image", None).unwrap_err();
        assert!(matches!(err, AirwaveError::Upstream(_)));
    }
}
