//! Progress observer injected into the batch driver and the PDF assembler.
//!
//! The library never touches a progress bar or a global logger state for
//! progress; a front end implements [`ConversionObserver`] and forwards the
//! events wherever it likes (the `dcm2jpeg` binary drives an indicatif bar).

use crate::convert::ConversionOutcome;
use crate::pdf::PdfDocument;

/// Receives one call per processed input file and one per finalized document.
///
/// All methods default to no-ops so implementors only override what they need.
pub trait ConversionObserver {
    /// Called once before the first input is processed
    fn on_batch_start(&mut self, total_files: usize) {
        let _ = total_files;
    }

    /// Called after each input, whatever its status
    fn on_file_processed(&mut self, outcome: &ConversionOutcome) {
        let _ = outcome;
    }

    /// Called after each document plan is closed and written (or failed)
    fn on_document_finalized(&mut self, document: &PdfDocument) {
        let _ = document;
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConversionObserver for NoopObserver {}
