#![deny(clippy::all)]

//! DICOM to JPEG conversion with optional, size-bounded PDF assembly.
//!
//! - [`pixel`] turns decoded samples into an 8-bit raster
//! - [`object`] opens DICOM files and decodes their pixel data
//! - [`convert`] runs a batch of files through both and writes JPEGs
//! - [`pdf`] packs the JPEGs into PDF documents under a size ceiling
//! - [`diagnose`] explains why a file would (not) convert

pub mod convert;
pub mod diagnose;
pub mod object;
pub mod observer;
pub mod pdf;
pub mod pixel;
pub mod utils;

pub use convert::{
    convert_all, convert_file, BatchSummary, ConversionOutcome, ConversionStatus, ConvertOptions,
    FrameSelection,
};
pub use diagnose::{diagnose, DicomDiagnosis};
pub use observer::{ConversionObserver, NoopObserver};
pub use pdf::{AssemblyReport, PageLayout, PdfAssembler, PdfDocument, PdfOptions, RenderedPage};
pub use pixel::{normalize, NormalizedRaster, RawPixelBuffer, WindowPreset, WindowingParameters};
pub use utils::dicom_tags;
