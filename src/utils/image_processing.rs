use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};
use snafu::prelude::*;

use crate::pixel::NormalizedRaster;

#[derive(Debug, Snafu)]
pub enum Error {
    /// Raster of {width}x{height} with {channels} channel(s) does not match its {len} bytes
    InvalidRaster {
        width: u32,
        height: u32,
        channels: u8,
        len: usize,
    },

    /// JPEG encoding failed
    Encode { source: image::ImageError },

    /// Could not decode image
    Decode { source: image::ImageError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Default JPEG quality, matching the converter's default
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Wrap a normalized raster into an `image` buffer without copying channel layout
pub fn raster_to_image(raster: NormalizedRaster) -> Result<DynamicImage> {
    let NormalizedRaster {
        width,
        height,
        channels,
        data,
    } = raster;
    let len = data.len();

    let image = match channels {
        1 => GrayImage::from_raw(width, height, data).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, data).map(DynamicImage::ImageRgb8),
        _ => None,
    };

    image.context(InvalidRasterSnafu {
        width,
        height,
        channels,
        len,
    })
}

/// Encode an image as baseline JPEG at `quality` (clamped to 1-100)
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut output, quality.clamp(1, 100));

    // the JPEG encoder only takes L8 and Rgb8
    match image {
        DynamicImage::ImageLuma8(img) => img.write_with_encoder(encoder),
        DynamicImage::ImageRgb8(img) => img.write_with_encoder(encoder),
        other if other.color().has_color() => other.to_rgb8().write_with_encoder(encoder),
        other => other.to_luma8().write_with_encoder(encoder),
    }
    .context(EncodeSnafu)?;

    Ok(output)
}

/// Normalize, wrap and encode in one go
pub fn raster_to_jpeg(raster: NormalizedRaster, quality: u8) -> Result<Vec<u8>> {
    let image = raster_to_image(raster)?;
    encode_jpeg(&image, quality)
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context(DecodeSnafu)
}

/// Largest size with the same aspect ratio as `width`x`height` that fits in
/// `max_width`x`max_height`. Never upscales; never returns a zero dimension.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width.max(1), height.max(1));
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }

    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (new_width, new_height)
}

/// Downscale with a Lanczos3 filter so the image fits in the given box
pub fn resize_to_fit(image: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = fit_within(image.width(), image.height(), max_width, max_height);
    if (width, height) == (image.width(), image.height()) {
        return image;
    }
    image.resize_exact(width, height, image::imageops::FilterType::Lanczos3)
}

/// Grayscale images stay single-channel, anything else is flattened to RGB
pub fn flatten_for_jpeg(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image,
        other if other.color().has_color() => DynamicImage::ImageRgb8(other.to_rgb8()),
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    }
}
