use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Longest edge of the copies sent to the vision model.
pub const RESIZED_IMAGE_DIMENSION: u32 = 512;

/// A downscaled, re-encoded upload.
pub struct ResizedImage {
    pub bytes: Vec<u8>,
    /// Format of the original upload, e.g. "png".
    pub source_type: String,
    pub width: u32,
    pub height: u32,
}

/// Decode `data`, fit it inside a 512x512 box and re-encode as JPEG.
/// Images already within bounds are re-encoded without scaling.
pub fn resize_for_classification(data: &[u8]) -> Result<ResizedImage, ResizeError> {
    let format = image::guess_format(data).map_err(|_| ResizeError::UnsupportedFormat)?;
    let decoded = image::load_from_memory_with_format(data, format)?;

    let scaled = if decoded.width() > RESIZED_IMAGE_DIMENSION
        || decoded.height() > RESIZED_IMAGE_DIMENSION
    {
        decoded.resize(
            RESIZED_IMAGE_DIMENSION,
            RESIZED_IMAGE_DIMENSION,
            FilterType::Lanczos3,
        )
    } else {
        decoded
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());
    let mut bytes = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;

    Ok(ResizedImage {
        bytes,
        source_type: format.extensions_str().first().copied().unwrap_or("bin").to_string(),
        width: rgb.width(),
        height: rgb.height(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ResizeError {
    #[error("Unsupported or unrecognised image format")]
    UnsupportedFormat,

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
}
