//! Image transformer - shrinks an image to fit a bounding box
//!
//! Decodes the source, scales it down preserving aspect ratio so that both
//! sides fit the configured maximum, and re-encodes it in the source format.
//! Images that already fit are passed through untouched.
//!
//! Decoding is guarded by a pixel-count limit read from the image header, so
//! hostile headers are refused before any pixel buffer is allocated.

use bytes::Bytes;
use image::imageops::FilterType;
use image::io::{Limits, Reader as ImageReader};
use image::{DynamicImage, ImageError, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::errors::ErrorKind;

/// Worst-case bytes per decoded pixel (16-bit RGBA).
const MAX_BYTES_PER_PIXEL: u64 = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("unsupported image: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt image: {0}")]
    CorruptImage(String),
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            TransformError::CorruptImage(_) => ErrorKind::CorruptImage,
        }
    }
}

impl From<ImageError> for TransformError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Unsupported(_) | ImageError::Limits(_) => {
                TransformError::UnsupportedFormat(err.to_string())
            }
            other => TransformError::CorruptImage(other.to_string()),
        }
    }
}

/// Configuration for derivative generation
#[derive(Clone, Debug)]
pub struct TransformConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Largest decoded image accepted, in pixels.
    pub max_pixels: u64,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
            max_pixels: 8192 * 8192,
            jpeg_quality: 85,
        }
    }
}

/// A generated derivative.
#[derive(Debug, Clone)]
pub struct Derivative {
    pub bytes: Bytes,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// False when the source already fit and was passed through unchanged.
    pub resized: bool,
}

impl Derivative {
    pub fn content_type(&self) -> &'static str {
        mime_for(self.format)
    }
}

pub struct ImageTransformer {
    config: TransformConfig,
}

impl ImageTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    /// Produce a derivative of `data` bounded by the configured dimensions.
    ///
    /// The format is sniffed from the content; `extension` is only consulted
    /// for formats without a magic number. CPU heavy, so async callers should
    /// go through [`ImageTransformer::resize_async`].
    pub fn resize(&self, data: &[u8], extension: Option<&str>) -> Result<Derivative, TransformError> {
        let format = image::guess_format(data)
            .ok()
            .or_else(|| extension.and_then(ImageFormat::from_extension))
            .ok_or_else(|| {
                TransformError::UnsupportedFormat("could not determine image format".to_string())
            })?;

        let (orig_w, orig_h) = self.reader(data, format).into_dimensions()?;
        let pixels = orig_w as u64 * orig_h as u64;
        if pixels > self.config.max_pixels {
            return Err(TransformError::UnsupportedFormat(format!(
                "{}x{} exceeds the limit of {} pixels",
                orig_w, orig_h, self.config.max_pixels
            )));
        }

        let img = self.reader(data, format).decode()?;
        debug!(
            original_width = orig_w,
            original_height = orig_h,
            format = ?format,
            "decoded source image"
        );

        let (new_w, new_h) = fit_within(orig_w, orig_h, self.config.max_width, self.config.max_height);
        if (new_w, new_h) == (orig_w, orig_h) {
            debug!("image already within max dimensions, passing through");
            return Ok(Derivative {
                bytes: Bytes::copy_from_slice(data),
                format,
                width: orig_w,
                height: orig_h,
                resized: false,
            });
        }

        let resized = img.resize_exact(new_w, new_h, FilterType::Triangle);
        let (bytes, out_format) = self.encode(&resized, format)?;

        debug!(
            width = new_w,
            height = new_h,
            size = bytes.len(),
            "derivative generated"
        );

        Ok(Derivative {
            bytes,
            format: out_format,
            width: new_w,
            height: new_h,
            resized: true,
        })
    }

    /// Run [`ImageTransformer::resize`] on the blocking thread pool.
    pub async fn resize_async(
        self: Arc<Self>,
        data: Bytes,
        extension: Option<String>,
    ) -> Result<Derivative, TransformError> {
        tokio::task::spawn_blocking(move || self.resize(&data, extension.as_deref()))
            .await
            .map_err(|e| TransformError::CorruptImage(format!("transform task failed: {e}")))?
    }

    fn reader<'a>(&self, data: &'a [u8], format: ImageFormat) -> ImageReader<Cursor<&'a [u8]>> {
        let mut limits = Limits::default();
        limits.max_alloc = Some(self.config.max_pixels.saturating_mul(MAX_BYTES_PER_PIXEL));
        let mut reader = ImageReader::with_format(Cursor::new(data), format);
        reader.limits(limits);
        reader
    }

    /// Encode in `format`, falling back to JPEG when no encoder exists for it.
    fn encode(&self, img: &DynamicImage, format: ImageFormat) -> Result<(Bytes, ImageFormat), TransformError> {
        let jpeg = ImageOutputFormat::Jpeg(self.config.jpeg_quality);
        let (output, out_format) = match format {
            ImageFormat::Jpeg => (jpeg, ImageFormat::Jpeg),
            other => match ImageOutputFormat::from(other) {
                ImageOutputFormat::Unsupported(_) => (jpeg, ImageFormat::Jpeg),
                supported => (supported, other),
            },
        };

        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        let written = if out_format == ImageFormat::Jpeg {
            DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut cursor, output)
        } else {
            img.write_to(&mut cursor, output)
        };
        written.map_err(|e| {
            TransformError::UnsupportedFormat(format!("failed to encode {:?}: {e}", out_format))
        })?;

        Ok((Bytes::from(buf), out_format))
    }
}

/// Largest dimensions with the same aspect ratio as `width`x`height` that
/// fit inside `max_width`x`max_height`. Never enlarges.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let (w, h) = (width as u64, height as u64);
    let (mw, mh) = (max_width as u64, max_height as u64);
    if w * mh >= h * mw {
        // width is the binding side
        let scaled = ((h * mw * 2 + w) / (2 * w)).clamp(1, mh);
        (max_width, scaled as u32)
    } else {
        let scaled = ((w * mh * 2 + h) / (2 * h)).clamp(1, mw);
        (scaled as u32, max_height)
    }
}

/// MIME type stored alongside a derivative of the given format.
pub fn mime_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::Tiff => "image/tiff",
        ImageFormat::Ico => "image/x-icon",
        ImageFormat::Tga => "image/x-tga",
        ImageFormat::Avif => "image/avif",
        _ => "application/octet-stream",
    }
}
