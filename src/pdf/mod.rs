//! Size-bounded PDF assembly.
//!
//! Converted JPEGs become one page each; pages are packed in order into as
//! few documents as possible so that no document exceeds the configured
//! ceiling, except a document made of a single oversized page. Documents are
//! written as soon as their plan closes.

pub mod layout;
pub mod page;
pub mod plan;
pub mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Report};
use tracing::{info, warn};

use crate::observer::ConversionObserver;
use crate::utils::image_processing;

pub use layout::{PageLayout, DOCUMENT_OVERHEAD, PAGE_OBJECT_OVERHEAD};
pub use page::RenderedPage;
pub use plan::{plan_documents, DocumentPlanner, PdfDocumentPlan};
pub use writer::{DocumentWriter, PdfWriter};

pub const MEGABYTE: u64 = 1024 * 1024;
pub const DEFAULT_MAX_DOCUMENT_SIZE: u64 = 512 * MEGABYTE;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Could not read page image {path}
    ReadPage { path: String, source: std::io::Error },
    /// Could not render page image {path}
    RenderPage {
        path: String,
        source: image_processing::Error,
    },
    /// Could not serialize PDF document
    Serialize { source: lopdf::Error },
    /// Could not write {path}
    Io { path: String, source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DocumentStatus {
    Written { bytes: u64 },
    Failed { reason: String },
}

/// One finalized output document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdfDocument {
    pub part_number: usize,
    pub path: PathBuf,
    pub page_count: usize,
    pub estimated_size: u64,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

impl PdfDocument {
    pub fn is_written(&self) -> bool {
        matches!(self.status, DocumentStatus::Written { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyReport {
    pub documents: Vec<PdfDocument>,
    /// Inputs that could not be turned into a page, with the reason
    pub skipped_pages: Vec<(PathBuf, String)>,
}

impl AssemblyReport {
    pub fn written(&self) -> usize {
        self.documents.iter().filter(|d| d.is_written()).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.written()
    }

    pub fn page_count(&self) -> usize {
        self.documents.iter().map(|d| d.page_count).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfOptions {
    pub max_document_size: u64,
    /// Prefix of the output file names; the input directory name when unset
    pub name_prefix: Option<String>,
    pub layout: PageLayout,
}

impl Default for PdfOptions {
    fn default() -> Self {
        PdfOptions {
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            name_prefix: None,
            layout: PageLayout::default(),
        }
    }
}

impl PdfOptions {
    pub fn name_prefix_for(&self, input_dir: &Path) -> String {
        self.name_prefix
            .clone()
            .unwrap_or_else(|| default_name_prefix(input_dir))
    }
}

/// Name of the input directory, used to name documents by default
pub fn default_name_prefix(input_dir: &Path) -> String {
    input_dir
        .canonicalize()
        .ok()
        .as_deref()
        .unwrap_or(input_dir)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "dicom".to_string())
}

/// `{prefix}_part_001.pdf`, `{prefix}_part_002.pdf`, ...
pub fn document_file_name(prefix: &str, part_number: usize) -> String {
    format!("{}_part_{:03}.pdf", prefix, part_number)
}

/// Prepare pages for every JPEG, in order. Images that cannot be decoded
/// are reported and left out.
pub fn prepare_pages<'a>(
    sources: impl IntoIterator<Item = &'a Path>,
    layout: &PageLayout,
) -> (Vec<RenderedPage>, Vec<(PathBuf, String)>) {
    let mut pages = Vec::new();
    let mut skipped = Vec::new();
    for source in sources {
        match RenderedPage::prepare(source, layout) {
            Ok(page) => pages.push(page),
            Err(e) => {
                let reason = Report::from_error(e).to_string();
                warn!("Leaving {} out of the PDF: {}", source.display(), reason);
                skipped.push((source.to_path_buf(), reason));
            }
        }
    }
    (pages, skipped)
}

/// Plans and writes documents into one output directory
pub struct PdfAssembler<W: DocumentWriter> {
    writer: W,
    output_dir: PathBuf,
}

impl PdfAssembler<PdfWriter> {
    pub fn with_layout(layout: PageLayout, output_dir: impl Into<PathBuf>) -> Self {
        PdfAssembler::new(PdfWriter::new(layout), output_dir)
    }
}

impl<W: DocumentWriter> PdfAssembler<W> {
    pub fn new(writer: W, output_dir: impl Into<PathBuf>) -> Self {
        PdfAssembler {
            writer,
            output_dir: output_dir.into(),
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Pack `pages` in order into documents of at most
    /// `max_bytes_per_document` estimated bytes each.
    ///
    /// A document that fails to write is reported as failed and assembly
    /// goes on with the next plan. Writers clean up files they created.
    pub fn assemble(
        &mut self,
        pages: Vec<RenderedPage>,
        max_bytes_per_document: u64,
        name_prefix: &str,
        observer: &mut dyn ConversionObserver,
    ) -> AssemblyReport {
        let mut report = AssemblyReport::default();
        let mut planner = DocumentPlanner::new(max_bytes_per_document, DOCUMENT_OVERHEAD);

        for page in pages {
            if let Some(plan) = planner.push(page) {
                let document = self.finalize(plan, name_prefix);
                observer.on_document_finalized(&document);
                report.documents.push(document);
            }
        }
        if let Some(plan) = planner.finish() {
            let document = self.finalize(plan, name_prefix);
            observer.on_document_finalized(&document);
            report.documents.push(document);
        }

        info!(
            "Assembled {} pages into {} documents ({} failed)",
            report.page_count(),
            report.documents.len(),
            report.failed()
        );
        report
    }

    fn finalize(&mut self, plan: PdfDocumentPlan, name_prefix: &str) -> PdfDocument {
        let path = self
            .output_dir
            .join(document_file_name(name_prefix, plan.part_number));

        let status = match self.writer.write_document(&plan, &path) {
            Ok(bytes) => {
                info!(
                    "Wrote {} ({} pages, {} bytes)",
                    path.display(),
                    plan.pages.len(),
                    bytes
                );
                DocumentStatus::Written { bytes }
            }
            Err(e) => {
                let reason = Report::from_error(e).to_string();
                warn!("Failed to write {}: {}", path.display(), reason);
                DocumentStatus::Failed { reason }
            }
        };

        PdfDocument {
            part_number: plan.part_number,
            path,
            page_count: plan.pages.len(),
            estimated_size: plan.estimated_size,
            status,
        }
    }
}
