use std::path::{Path, PathBuf};

use serde::Serialize;

use super::layout::PageLayout;
use super::Result;

/// A page ready to be planned into a document.
///
/// Holds only metadata; the re-encoded image is produced again by the
/// writer, so a large batch never keeps all page images in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPage {
    /// JPEG file the page is rendered from
    pub source: PathBuf,
    pub caption: String,
    /// Pixel size of the re-encoded page image
    pub width: u32,
    pub height: u32,
    /// Bytes this page adds to a document
    pub estimated_size: u64,
}

impl RenderedPage {
    /// Render `source` once at page resolution to measure its cost.
    /// The caption defaults to the file name.
    pub fn prepare(source: &Path, layout: &PageLayout) -> Result<Self> {
        let caption = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::prepare_with_caption(source, caption, layout)
    }

    pub fn prepare_with_caption(source: &Path, caption: String, layout: &PageLayout) -> Result<Self> {
        let image = layout.render(source)?;
        let estimated_size = layout.page_cost(&image, &caption)?;
        Ok(RenderedPage {
            source: source.to_path_buf(),
            caption,
            width: image.width,
            height: image.height,
            estimated_size,
        })
    }
}
