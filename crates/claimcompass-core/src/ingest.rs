//! Image Ingestion & Normalization
//!
//! Turns an uploaded file or a remote URL into the compact, bounded JPEG the
//! vision model receives: decode, force RGB, shrink to fit 1024x1024,
//! re-encode at quality 85, base64 for transport.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::debug;

use claimcompass_tools::{FetchError, ImageFetcher};

/// Longest side allowed after normalization
pub const MAX_DIMENSION: u32 = 1024;
pub const JPEG_QUALITY: u8 = 85;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("Failed to download image: {0}")]
    FetchFailed(String),
    #[error("Failed to process image: {0}")]
    DecodeFailed(String),
    #[error("Failed to process image: {0}")]
    EncodeFailed(String),
}

/// A file part received in a multipart form.
#[derive(Debug, Clone, Default)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    /// Browsers send an empty, unnamed part when no file was picked.
    fn is_empty(&self) -> bool {
        self.file_name.as_deref().unwrap_or_default().is_empty() && self.bytes.is_empty()
    }
}

/// Where the image for one request comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Upload {
        bytes: Vec<u8>,
        content_type: String,
    },
    RemoteUrl(String),
}

impl ImageSource {
    /// Pick the single image source for a request.
    ///
    /// Exactly one of `file` and `image_url` must be given, and an upload must
    /// declare an `image/*` content type.
    pub fn select(
        file: Option<UploadedFile>,
        image_url: Option<String>,
    ) -> Result<Self, IngestError> {
        let file = file.filter(|f| !f.is_empty());
        let image_url = image_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        match (file, image_url) {
            (None, None) => Err(IngestError::InvalidInput(
                "Either file upload or image URL is required".to_string(),
            )),
            (Some(_), Some(_)) => Err(IngestError::InvalidInput(
                "Please provide either a file or URL, not both".to_string(),
            )),
            (Some(file), None) => match file.content_type {
                Some(content_type) if is_image_content_type(&content_type) => {
                    Ok(ImageSource::Upload {
                        bytes: file.bytes,
                        content_type,
                    })
                }
                _ => Err(IngestError::InvalidInput("File must be an image".to_string())),
            },
            (None, Some(url)) => Ok(ImageSource::RemoteUrl(url)),
        }
    }

    /// Raw image bytes, downloading them first for a URL source.
    pub async fn into_bytes(self, fetcher: &ImageFetcher) -> Result<Vec<u8>, IngestError> {
        match self {
            ImageSource::Upload {
                bytes,
                content_type,
            } => {
                debug!("Using uploaded image ({}, {} bytes)", content_type, bytes.len());
                Ok(bytes)
            }
            ImageSource::RemoteUrl(url) => match fetcher.fetch(&url).await {
                Ok(fetched) => Ok(fetched.bytes),
                Err(e @ FetchError::NotAnImage { .. }) => Err(IngestError::InvalidInput(
                    format!("Failed to download image: {}", e),
                )),
                Err(e) => Err(IngestError::FetchFailed(e.to_string())),
            },
        }
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type.trim().to_ascii_lowercase().starts_with("image/")
}

/// Decode, bound and re-encode image bytes, returning base64 JPEG.
///
/// CPU-bound; callers on the async runtime should use `spawn_blocking`.
pub fn normalize(bytes: &[u8]) -> Result<String, IngestError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| IngestError::DecodeFailed(e.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    let rgb = bound_size(decoded.into_rgb8());
    let jpeg = encode_jpeg(&rgb)?;

    debug!(
        "Normalized image {}x{} -> {}x{} ({} bytes JPEG)",
        width,
        height,
        rgb.width(),
        rgb.height(),
        jpeg.len()
    );

    Ok(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

/// Largest size with the same aspect ratio that fits in `max` x `max`.
///
/// The longer side becomes exactly `max`; the shorter side is rounded and
/// never drops below 1.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let scale = |short: u32, long: u32| -> u32 {
        let scaled = (short as u64 * max as u64 + long as u64 / 2) / long as u64;
        (scaled as u32).clamp(1, max)
    };

    if width >= height {
        (max, scale(height, width))
    } else {
        (scale(width, height), max)
    }
}

fn bound_size(img: RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return img;
    }

    let (new_width, new_height) = fit_within(width, height, MAX_DIMENSION);
    image::imageops::resize(&img, new_width, new_height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &RgbImage) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    img.write_with_encoder(encoder)
        .map_err(|e| IngestError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn make_png(width: u32, height: u32) -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([200, 30, 30]),
        )))
    }

    fn decode_output(encoded: &str) -> DynamicImage {
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
        image::load_from_memory(&jpeg).unwrap()
    }

    fn upload(content_type: Option<&str>) -> UploadedFile {
        UploadedFile {
            file_name: Some("car.png".to_string()),
            content_type: content_type.map(str::to_string),
            bytes: vec![1, 2, 3],
        }
    }

    // ── fit_within ──

    #[test]
    fn test_fit_landscape() {
        assert_eq!(fit_within(2048, 1000, 1024), (1024, 500));
        assert_eq!(fit_within(3000, 2000, 1024), (1024, 683));
    }

    #[test]
    fn test_fit_portrait() {
        assert_eq!(fit_within(1000, 4000, 1024), (256, 1024));
    }

    #[test]
    fn test_fit_square_and_extreme() {
        assert_eq!(fit_within(5000, 5000, 1024), (1024, 1024));
        assert_eq!(fit_within(100_000, 10, 1024), (1024, 1));
    }

    // ── normalize ──

    #[test]
    fn test_normalize_downscales_oversized() {
        let out = decode_output(&normalize(&make_png(2400, 1600)).unwrap());
        assert!(out.width() <= MAX_DIMENSION && out.height() <= MAX_DIMENSION);
        assert_eq!(out.width(), 1024);
        let ratio = out.width() as f32 / out.height() as f32;
        assert!((ratio - 1.5).abs() < 0.01, "aspect ratio drifted: {ratio}");
    }

    #[test]
    fn test_normalize_one_side_oversized() {
        let out = decode_output(&normalize(&make_png(600, 1500)).unwrap());
        assert_eq!((out.width(), out.height()), (410, 1024));
    }

    #[test]
    fn test_normalize_keeps_small_image_size() {
        let out = decode_output(&normalize(&make_png(640, 480)).unwrap());
        assert_eq!((out.width(), out.height()), (640, 480));
    }

    #[test]
    fn test_normalize_exact_bound_untouched() {
        let out = decode_output(&normalize(&make_png(1024, 1024)).unwrap());
        assert_eq!((out.width(), out.height()), (1024, 1024));
    }

    #[test]
    fn test_normalize_converts_rgba() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(32, 16, Rgba([0, 0, 255, 128])));
        let out = decode_output(&normalize(&png_bytes(rgba)).unwrap());
        assert_eq!(out.color(), image::ColorType::Rgb8);
        assert_eq!((out.width(), out.height()), (32, 16));
    }

    #[test]
    fn test_normalize_output_reencodes() {
        // A normalized image must itself be valid normalizer input
        let first = normalize(&make_png(1500, 900)).unwrap();
        let jpeg = base64::engine::general_purpose::STANDARD
            .decode(&first)
            .unwrap();
        let second = decode_output(&normalize(&jpeg).unwrap());
        assert_eq!((second.width(), second.height()), (1024, 614));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let err = normalize(b"definitely not an image").unwrap_err();
        assert!(matches!(err, IngestError::DecodeFailed(_)));
        assert!(err.to_string().starts_with("Failed to process image: "));
    }

    // ── source selection ──

    #[test]
    fn test_select_neither() {
        let err = ImageSource::select(None, None).unwrap_err();
        assert_eq!(err.to_string(), "Either file upload or image URL is required");
    }

    #[test]
    fn test_select_both() {
        let err = ImageSource::select(
            Some(upload(Some("image/png"))),
            Some("http://example.com/car.jpg".to_string()),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Please provide either a file or URL, not both");
    }

    #[test]
    fn test_select_blank_inputs_count_as_absent() {
        let blank_file = UploadedFile::default();
        let err = ImageSource::select(Some(blank_file), Some("   ".to_string())).unwrap_err();
        assert_eq!(err.to_string(), "Either file upload or image URL is required");
    }

    #[test]
    fn test_select_upload_requires_image_type() {
        for content_type in [None, Some("text/plain"), Some("application/pdf")] {
            let err = ImageSource::select(Some(upload(content_type)), None).unwrap_err();
            assert_eq!(err.to_string(), "File must be an image");
        }
    }

    #[test]
    fn test_select_upload() {
        let source = ImageSource::select(Some(upload(Some("image/jpeg"))), None).unwrap();
        assert!(matches!(source, ImageSource::Upload { ref content_type, .. } if content_type == "image/jpeg"));
    }

    #[test]
    fn test_select_url_trims() {
        let source = ImageSource::select(None, Some(" http://x/car.jpg ".to_string())).unwrap();
        assert!(matches!(source, ImageSource::RemoteUrl(ref u) if u == "http://x/car.jpg"));
    }

    #[test]
    fn test_is_image_content_type() {
        assert!(is_image_content_type("image/png"));
        assert!(is_image_content_type("IMAGE/JPEG"));
        assert!(!is_image_content_type("text/html"));
        assert!(!is_image_content_type(""));
    }

    // ── loading bytes ──

    #[tokio::test]
    async fn test_into_bytes_upload_passthrough() {
        let fetcher = ImageFetcher::new().unwrap();
        let source = ImageSource::select(Some(upload(Some("image/png"))), None).unwrap();
        assert_eq!(source.into_bytes(&fetcher).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_into_bytes_url_errors() {
        use axum::{http::header, http::StatusCode, routing::get, Router};

        let app = Router::new()
            .route(
                "/page",
                get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<html></html>") }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = ImageFetcher::new().unwrap();

        let err = ImageSource::RemoteUrl(format!("http://{}/page", addr))
            .into_bytes(&fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidInput(_)));
        assert_eq!(
            err.to_string(),
            "Failed to download image: URL does not point to an image"
        );

        let err = ImageSource::RemoteUrl(format!("http://{}/missing", addr))
            .into_bytes(&fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::FetchFailed(_)));
        assert!(err.to_string().contains("404"));
    }
}
