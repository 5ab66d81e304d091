use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tracing::{debug, warn};

use crate::errors::{LesionSegError, Result};
use crate::traits::ImageSource;

/// Reference timeout for fetching a source image.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Single-attempt HTTP(S) image download.
#[derive(Debug, Clone)]
pub struct HttpImageSource {
    client: reqwest::Client,
}

impl HttpImageSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LesionSegError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    async fn download(&self, url: &str) -> std::result::Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<RgbImage> {
        debug!(%url, "fetching image");
        let bytes = self.download(url).await.map_err(|e| {
            warn!(%url, error = %e, "image fetch failed");
            LesionSegError::ImageFetch {
                url: url.to_string(),
                source: Box::new(e),
            }
        })?;
        decode_image(&bytes)
    }
}

/// Decode any supported raster format into an RGB buffer.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| LesionSegError::ImageDecode {
        reason: e.to_string(),
        source: Some(Box::new(e)),
    })?;
    let rgb = image.into_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(LesionSegError::ImageDecode {
            reason: "image has no pixels".to_string(),
            source: None,
        });
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_decode_png() -> Result<()> {
        let source = RgbImage::from_pixel(12, 7, Rgb([9, 8, 7]));
        let decoded = decode_image(&encode(&source, ImageFormat::Png))?;
        assert_eq!(decoded, source);
        Ok(())
    }

    #[test]
    fn test_decode_jpeg_dimensions() -> Result<()> {
        let source = RgbImage::from_pixel(33, 21, Rgb([200, 100, 50]));
        let decoded = decode_image(&encode(&source, ImageFormat::Jpeg))?;
        assert_eq!(decoded.dimensions(), (33, 21));
        Ok(())
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode_image(b"<html>not an image</html>").unwrap_err();
        assert!(matches!(err, LesionSegError::ImageDecode { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_malformed_url_is_fetch_error() -> Result<()> {
        let source = HttpImageSource::new(DEFAULT_FETCH_TIMEOUT)?;
        let err = source.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, LesionSegError::ImageFetch { ref url, .. } if url == "not a url"));
        Ok(())
    }
}
