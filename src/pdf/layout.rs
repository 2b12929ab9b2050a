//! Page geometry, page rendering and the byte-size model used for planning.
//!
//! Every page holds one image, scaled uniformly to fit the image box and
//! centered in it, with its caption centered underneath. The image is
//! re-encoded at the page's pixel resolution, so a page's byte cost is the
//! size of that re-encoded JPEG plus the PDF objects wrapping it.

use std::path::Path;

use lopdf::content::{Content, Operation};
use lopdf::Object;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::utils::image_processing;

use super::{ReadPageSnafu, RenderPageSnafu, Result, SerializeSnafu};

/// Bytes shared by every document: header, catalog, page tree, font,
/// cross-reference table and trailer
pub const DOCUMENT_OVERHEAD: u64 = 1024;

/// Bytes added per page on top of its image and content stream: page,
/// XObject and stream dictionaries, object headers, xref entries and the
/// page tree's Kids entry. Calibrated against lopdf output, rounded up.
pub const PAGE_OBJECT_OVERHEAD: u64 = 1024;

pub const POINTS_PER_INCH: f64 = 72.0;

/// Resource name of the page image
pub const IMAGE_RESOURCE: &str = "Im0";
/// Resource name of the caption font
pub const FONT_RESOURCE: &str = "F1";

/// Fixed page geometry, in PDF points unless noted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageLayout {
    pub page_width: f64,
    pub page_height: f64,
    /// Margin on all four sides
    pub margin: f64,
    pub caption_font_size: f64,
    /// Space between the image and the caption
    pub caption_gap: f64,
    /// Pixel density of the re-encoded page image
    pub dpi: f64,
    /// JPEG quality of the re-encoded page image
    pub jpeg_quality: u8,
}

impl Default for PageLayout {
    /// A4 portrait
    fn default() -> Self {
        PageLayout {
            page_width: 595.0,
            page_height: 842.0,
            margin: 36.0,
            caption_font_size: 10.0,
            caption_gap: 8.0,
            dpi: 150.0,
            jpeg_quality: 85,
        }
    }
}

/// Rectangle in PDF user space (origin bottom-left)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Image re-encoded for a page
#[derive(Debug, Clone)]
pub struct PageImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub grayscale: bool,
}

impl PageLayout {
    fn caption_band(&self) -> f64 {
        self.caption_font_size + self.caption_gap
    }

    /// Area available to the image: inside the margins, above the caption band
    pub fn image_box(&self) -> Rect {
        let bottom = self.margin + self.caption_band();
        Rect {
            x: self.margin,
            y: bottom,
            width: (self.page_width - 2.0 * self.margin).max(1.0),
            height: (self.page_height - self.margin - bottom).max(1.0),
        }
    }

    /// Image box size in pixels at the layout's DPI
    pub fn image_box_pixels(&self) -> (u32, u32) {
        let image_box = self.image_box();
        let to_pixels = |points: f64| ((points * self.dpi / POINTS_PER_INCH).floor() as u32).max(1);
        (to_pixels(image_box.width), to_pixels(image_box.height))
    }

    /// Where an image of `width`x`height` pixels lands: uniformly scaled to
    /// fit the image box and centered in it
    pub fn place_image(&self, width: u32, height: u32) -> Rect {
        let image_box = self.image_box();
        let (width, height) = (width.max(1) as f64, height.max(1) as f64);
        let scale = f64::min(image_box.width / width, image_box.height / height);
        let (placed_width, placed_height) = (width * scale, height * scale);

        Rect {
            x: image_box.x + (image_box.width - placed_width) / 2.0,
            y: image_box.y + (image_box.height - placed_height) / 2.0,
            width: placed_width,
            height: placed_height,
        }
    }

    /// Baseline origin of a caption centered under `image`
    pub fn caption_origin(&self, image: &Rect, caption: &str) -> (f64, f64) {
        // Helvetica averages roughly half an em per glyph
        let text_width = caption.chars().count() as f64 * self.caption_font_size * 0.5;
        let x = (self.page_width - text_width) / 2.0;
        let y = image.y - self.caption_gap - self.caption_font_size * 0.8;
        (x.max(self.margin), y.max(self.margin))
    }

    /// Decode a JPEG from disk and re-encode it at page resolution
    pub fn render(&self, source: &Path) -> Result<PageImage> {
        let bytes = std::fs::read(source).context(ReadPageSnafu {
            path: source.display().to_string(),
        })?;
        let render_err = || RenderPageSnafu {
            path: source.display().to_string(),
        };

        let image = image_processing::decode_image(&bytes).with_context(|_| render_err())?;
        let (max_width, max_height) = self.image_box_pixels();
        let image = image_processing::flatten_for_jpeg(image_processing::resize_to_fit(
            image, max_width, max_height,
        ));

        let jpeg = image_processing::encode_jpeg(&image, self.jpeg_quality)
            .with_context(|_| render_err())?;

        Ok(PageImage {
            jpeg,
            width: image.width(),
            height: image.height(),
            grayscale: !image.color().has_color(),
        })
    }

    /// Content stream drawing the image and its caption
    pub fn content_stream(&self, image_width: u32, image_height: u32, caption: &str) -> Result<Vec<u8>> {
        let placed = self.place_image(image_width, image_height);
        let (caption_x, caption_y) = self.caption_origin(&placed, caption);
        let pt = |v: f64| Object::Integer(v.round() as i64);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        pt(placed.width),
                        0.into(),
                        0.into(),
                        pt(placed.height),
                        pt(placed.x),
                        pt(placed.y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new(
                    "Tf",
                    vec![
                        Object::Name(FONT_RESOURCE.as_bytes().to_vec()),
                        pt(self.caption_font_size),
                    ],
                ),
                Operation::new("Td", vec![pt(caption_x), pt(caption_y)]),
                Operation::new("Tj", vec![Object::string_literal(caption_text(caption))]),
                Operation::new("ET", vec![]),
            ],
        };

        content.encode().context(SerializeSnafu)
    }

    /// Estimated serialized size of one page holding `image`
    pub fn page_cost(&self, image: &PageImage, caption: &str) -> Result<u64> {
        let content = self.content_stream(image.width, image.height, caption)?;
        Ok(image.jpeg.len() as u64 + content.len() as u64 + PAGE_OBJECT_OVERHEAD)
    }
}

/// Caption bytes in WinAnsiEncoding, which matches Latin-1 for printable
/// characters; anything outside it becomes '?'
fn caption_text(caption: &str) -> Vec<u8> {
    caption
        .chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}
