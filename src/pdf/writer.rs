//! Serialization of a document plan to a PDF file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use lopdf::{dictionary, Document, Object, Stream};
use snafu::prelude::*;
use tracing::debug;

use super::layout::{PageLayout, FONT_RESOURCE, IMAGE_RESOURCE};
use super::plan::PdfDocumentPlan;
use super::{IoSnafu, Result};

/// Turns a document plan into a file.
pub trait DocumentWriter {
    /// Write `plan` to `path`, returning the number of bytes written
    fn write_document(&mut self, plan: &PdfDocumentPlan, path: &Path) -> Result<u64>;
}

/// lopdf-backed writer: one page per image, the image embedded as a
/// DCT-encoded XObject with its caption set in Helvetica underneath
#[derive(Debug, Clone, Default)]
pub struct PdfWriter {
    layout: PageLayout,
}

impl PdfWriter {
    pub fn new(layout: PageLayout) -> Self {
        PdfWriter { layout }
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    fn build(&self, plan: &PdfDocumentPlan) -> Result<Document> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let media_box = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(self.layout.page_width.round() as i64),
            Object::Integer(self.layout.page_height.round() as i64),
        ];

        let mut kids = Vec::with_capacity(plan.pages.len());
        for page in &plan.pages {
            let image = self.layout.render(&page.source)?;
            let color_space = if image.grayscale { "DeviceGray" } else { "DeviceRGB" };

            let image_dict = dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(image.width as i64),
                "Height" => Object::Integer(image.height as i64),
                "ColorSpace" => color_space,
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            };
            let image_id = doc.add_object(Stream::new(image_dict, image.jpeg));

            let content = self
                .layout
                .content_stream(image.width, image.height, &page.caption)?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));

            let resources = dictionary! {
                "Font" => dictionary! {
                    FONT_RESOURCE => Object::Reference(font_id),
                },
                "XObject" => dictionary! {
                    IMAGE_RESOURCE => Object::Reference(image_id),
                },
            };

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => media_box.clone(),
                "Contents" => Object::Reference(content_id),
                "Resources" => resources,
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(count),
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        Ok(doc)
    }
}

impl DocumentWriter for PdfWriter {
    fn write_document(&mut self, plan: &PdfDocumentPlan, path: &Path) -> Result<u64> {
        let mut doc = self.build(plan)?;
        let io_err = || IoSnafu {
            path: path.display().to_string(),
        };

        let file = File::create(path).with_context(|_| io_err())?;
        let mut out = BufWriter::new(file);
        let saved = doc.save_to(&mut out).and_then(|_| out.flush());
        drop(out);
        if let Err(e) = saved {
            // the file was created above, so a partial document is ours to remove
            let _ = std::fs::remove_file(path);
            return Err(e).with_context(|_| io_err());
        }

        let bytes = std::fs::metadata(path).with_context(|_| io_err())?.len();
        debug!(
            "Wrote {} ({} pages, {} bytes, estimated {})",
            path.display(),
            plan.pages.len(),
            bytes,
            plan.estimated_size
        );
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::layout::DOCUMENT_OVERHEAD;
    use crate::pdf::page::tests::write_jpeg;
    use crate::pdf::page::RenderedPage;
    use crate::pdf::plan::plan_documents;

    #[test]
    fn test_write_document_produces_readable_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PageLayout::default();
        let pages: Vec<_> = [(64, 64), (300, 120), (40, 200)]
            .iter()
            .enumerate()
            .map(|(i, &(w, h))| {
                let path = write_jpeg(dir.path(), &format!("img_{i}.jpg"), w, h);
                RenderedPage::prepare(&path, &layout).unwrap()
            })
            .collect();

        let plans = plan_documents(pages, u64::MAX, DOCUMENT_OVERHEAD);
        assert_eq!(plans.len(), 1);

        let out = dir.path().join("scan_part_001.pdf");
        let mut writer = PdfWriter::new(layout);
        let bytes = writer.write_document(&plans[0], &out).unwrap();

        let header = std::fs::read(&out).unwrap();
        assert!(header.starts_with(b"%PDF-1.5"));
        assert_eq!(bytes, header.len() as u64);
        assert!(bytes <= plans[0].estimated_size);

        let loaded = Document::load(&out).unwrap();
        assert_eq!(loaded.get_pages().len(), 3);
    }

    #[test]
    fn test_write_document_fails_for_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let plan = PdfDocumentPlan {
            part_number: 1,
            pages: vec![crate::pdf::page::tests::sized_page("gone.jpg", 10)],
            estimated_size: 10,
        };
        let mut writer = PdfWriter::default();
        assert!(writer
            .write_document(&plan, &dir.path().join("x_part_001.pdf"))
            .is_err());
        assert!(!dir.path().join("x_part_001.pdf").exists());
    }
}
