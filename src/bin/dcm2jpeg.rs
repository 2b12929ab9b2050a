//! Convert a folder of DICOM files to JPEG, optionally bundling the result
//! into size-bounded PDF documents.
//!
//! ```bash
//! # convert every DICOM file in ./study into ./study/converted_jpegs
//! dcm2jpeg ./study
//!
//! # every frame of a cine loop, then PDFs of at most 100 MB
//! dcm2jpeg ./cine --all-frames --pdf --pdf-max-size-mb 100
//!
//! # explain why a file comes out blank
//! dcm2jpeg ./study/IM0001 --diagnose
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use dicom2jpeg::convert::{self, BatchSummary, ConversionOutcome, ConvertOptions, FrameSelection};
use dicom2jpeg::diagnose::{diagnose, DicomDiagnosis};
use dicom2jpeg::observer::ConversionObserver;
use dicom2jpeg::pdf::{self, AssemblyReport, PdfAssembler, PdfDocument, PdfOptions, MEGABYTE};
use dicom2jpeg::utils::find_dicom_files;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use snafu::{prelude::*, Report, Whatever};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Convert DICOM images to JPEG
#[derive(Parser, Debug)]
#[command(name = "dcm2jpeg")]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of DICOM files, or a single DICOM file
    input: PathBuf,

    /// Name of the output folder, created inside the input directory
    #[arg(short, long, default_value = "converted_jpegs")]
    output: String,

    /// JPEG quality (1-100)
    #[arg(short, long, default_value_t = 95)]
    quality: u8,

    /// Frame to export from multi-frame files (0-based)
    #[arg(long, default_value_t = 0)]
    frame: u32,

    /// Export every frame of multi-frame files
    #[arg(long, conflicts_with = "frame")]
    all_frames: bool,

    /// Descend into subdirectories
    #[arg(short, long)]
    recursive: bool,

    /// Bundle the converted JPEGs into PDF documents
    #[arg(long)]
    pdf: bool,

    /// Size ceiling of each PDF document, in MB
    #[arg(long, default_value_t = 512)]
    pdf_max_size_mb: u64,

    /// File name prefix of the PDF documents (defaults to the input folder name)
    #[arg(long)]
    pdf_prefix: Option<String>,

    /// Write a JSON report of the run to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Inspect the input files instead of converting them
    #[arg(long)]
    diagnose: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct RunReport<'a> {
    summary: &'a BatchSummary,
    pdf: Option<&'a AssemblyReport>,
}

/// Forwards conversion events to a progress bar
struct ProgressObserver {
    enabled: bool,
    bar: Option<ProgressBar>,
}

impl ProgressObserver {
    fn new(enabled: bool) -> Self {
        ProgressObserver { enabled, bar: None }
    }

    fn start(&mut self, len: usize) {
        if !self.enabled {
            return;
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {wide_msg}")
        {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(480));
        self.bar = Some(bar);
    }

    fn finish(&self, message: String) {
        if let Some(bar) = self.bar.as_ref() {
            bar.finish_with_message(message);
        }
    }
}

impl ConversionObserver for ProgressObserver {
    fn on_batch_start(&mut self, total_files: usize) {
        self.start(total_files);
    }

    fn on_file_processed(&mut self, outcome: &ConversionOutcome) {
        if let Some(bar) = self.bar.as_ref() {
            if let Some(name) = outcome.source.file_name() {
                bar.set_message(name.to_string_lossy().into_owned());
            }
            bar.inc(1);
        }
    }

    fn on_document_finalized(&mut self, document: &PdfDocument) {
        if let Some(bar) = self.bar.as_ref() {
            if let Some(name) = document.path.file_name() {
                bar.set_message(name.to_string_lossy().into_owned());
            }
            bar.inc(document.page_count as u64);
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Use RUST_LOG env var if set, otherwise use verbose flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("warn")
        }
    });
    let _ = tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .finish(),
    );

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", Report::from_error(e));
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Whatever> {
    ensure_whatever!(
        args.input.exists(),
        "Input path {} does not exist",
        args.input.display()
    );

    let (input_dir, inputs) = if args.input.is_dir() {
        let output_dir = args.input.join(&args.output);
        let inputs = find_dicom_files(&args.input, args.recursive, Some(&output_dir));
        (args.input.clone(), inputs)
    } else {
        let parent = args
            .input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf();
        (parent, vec![args.input.clone()])
    };

    if args.diagnose {
        for path in &inputs {
            print_diagnosis(&diagnose(path));
        }
        return Ok(ExitCode::SUCCESS);
    }

    ensure_whatever!(
        !inputs.is_empty(),
        "No DICOM files found in {}",
        input_dir.display()
    );

    let output_dir = input_dir.join(&args.output);
    std::fs::create_dir_all(&output_dir).with_whatever_context(|_| {
        format!("Could not create output folder {}", output_dir.display())
    })?;

    let options = ConvertOptions {
        jpeg_quality: args.quality,
        frame_index: args.frame,
        frame_selection: if args.all_frames {
            FrameSelection::All
        } else {
            FrameSelection::First
        },
    };

    info!(
        "Converting {} files from {} into {}",
        inputs.len(),
        input_dir.display(),
        output_dir.display()
    );

    let mut observer = ProgressObserver::new(!args.verbose);
    let summary = convert::convert_all(&inputs, &options, &output_dir, &mut observer)
        .whatever_context("Invalid conversion options")?;
    observer.finish(format!(
        "{} converted, {} skipped, {} failed",
        summary.succeeded(),
        summary.skipped(),
        summary.failed()
    ));

    print_summary(&summary);

    let assembly = if args.pdf && summary.succeeded() > 0 {
        let pdf_options = PdfOptions {
            max_document_size: args.pdf_max_size_mb.saturating_mul(MEGABYTE),
            name_prefix: args.pdf_prefix.clone(),
            ..Default::default()
        };
        Some(assemble_pdfs(&summary, &pdf_options, &input_dir, &output_dir, !args.verbose))
    } else {
        None
    };

    if let Some(report_path) = &args.report {
        let report = RunReport {
            summary: &summary,
            pdf: assembly.as_ref(),
        };
        let json = serde_json::to_string_pretty(&report).whatever_context("Could not serialize report")?;
        std::fs::write(report_path, json).with_whatever_context(|_| {
            format!("Could not write report {}", report_path.display())
        })?;
        info!("Report written to {}", report_path.display());
    }

    if summary.succeeded() == 0 {
        warn!("No files were converted");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn assemble_pdfs(
    summary: &BatchSummary,
    options: &PdfOptions,
    input_dir: &Path,
    output_dir: &Path,
    show_progress: bool,
) -> AssemblyReport {
    let prefix = options.name_prefix_for(input_dir);
    let (pages, skipped_pages) = pdf::prepare_pages(summary.output_files(), &options.layout);

    let mut observer = ProgressObserver::new(show_progress);
    observer.start(pages.len());
    let mut assembler = PdfAssembler::with_layout(options.layout.clone(), output_dir);
    let mut report = assembler.assemble(pages, options.max_document_size, &prefix, &mut observer);
    report.skipped_pages = skipped_pages;
    observer.finish(format!("{} documents", report.documents.len()));

    for document in &report.documents {
        match &document.status {
            pdf::DocumentStatus::Written { bytes } => println!(
                "PDF {}: {} pages, {:.1} MB",
                document.path.display(),
                document.page_count,
                *bytes as f64 / MEGABYTE as f64
            ),
            pdf::DocumentStatus::Failed { reason } => {
                println!("PDF {} failed: {}", document.path.display(), reason)
            }
        }
    }
    report
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "Converted {} of {} files ({} skipped, {} failed)",
        summary.succeeded(),
        summary.outcomes.len(),
        summary.skipped(),
        summary.failed()
    );
    for outcome in summary.outcomes.iter().filter(|o| !o.is_success()) {
        println!(
            "  {:?} {}: {}",
            outcome.status,
            outcome.source.display(),
            outcome.reason.as_deref().unwrap_or("")
        );
    }
}

fn print_diagnosis(diagnosis: &DicomDiagnosis) {
    println!("{}", diagnosis.path.display());
    if let Some(header) = &diagnosis.header {
        let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        let show_num = |value: Option<u32>| value.map_or_else(|| "-".to_string(), |v| v.to_string());
        println!("  Modality:            {}", show(&header.modality));
        println!("  Manufacturer:        {}", show(&header.manufacturer));
        println!("  SOP Class UID:       {}", header.sop_class_uid);
        println!(
            "  Transfer Syntax:     {} ({}){}",
            header.transfer_syntax_uid,
            header.transfer_syntax_name.as_deref().unwrap_or("unknown"),
            if header.is_compressed() { ", compressed" } else { "" }
        );
        println!(
            "  Size:                {}x{}, {} frame(s)",
            show_num(header.columns),
            show_num(header.rows),
            header.number_of_frames
        );
        println!(
            "  Bits:                {:?} allocated, {:?} stored, representation {:?}",
            header.bits_allocated, header.bits_stored, header.pixel_representation
        );
        println!("  Photometric:         {}", show(&header.photometric_interpretation));
        if let Some(preset) = header.windowing.as_ref().and_then(|w| w.presets.first()) {
            println!("  Window:              center {} / width {}", preset.center, preset.width);
        }
    }
    for warning in &diagnosis.warnings {
        println!("  warning: {}", warning);
    }
    match &diagnosis.error {
        Some(error) => println!("  not convertible: {}", error),
        None => println!("  convertible"),
    }
}
