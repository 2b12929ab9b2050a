//! Batch driver: DICOM files in, one JPEG per file (or per frame) out.
//!
//! Every input is handled independently. A failure in one file is recorded
//! in its [`ConversionOutcome`] and the batch moves on.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use snafu::Report;
use tracing::{info, warn};

use crate::object;
use crate::observer::ConversionObserver;
use crate::pixel;
use crate::utils::image_processing;

#[derive(Debug, Snafu)]
pub enum Error {
    /// JPEG quality {quality} is outside 1-100
    InvalidQuality { quality: u8 },

    /// Could not load DICOM file
    Load { source: object::Error },

    /// Could not normalize frame {frame}
    Normalize { frame: u32, source: pixel::Error },

    /// Could not encode frame {frame} as JPEG
    Encoding {
        frame: u32,
        source: image_processing::Error,
    },

    /// Could not write {path}
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which frames of a multi-frame dataset get exported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameSelection {
    /// Only the frame at `frame_index` (the first frame unless overridden)
    #[default]
    First,
    /// Every frame, one JPEG each
    All,
}

/// Conversion settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Frame exported in `First` mode (0-based)
    pub frame_index: u32,
    pub frame_selection: FrameSelection,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            jpeg_quality: image_processing::DEFAULT_JPEG_QUALITY,
            frame_index: 0,
            frame_selection: FrameSelection::First,
        }
    }
}

impl ConvertOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=100).contains(&self.jpeg_quality),
            InvalidQualitySnafu {
                quality: self.jpeg_quality
            }
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Success,
    Skipped,
    Failed,
}

/// Result of converting one input file
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutcome {
    pub source: PathBuf,
    pub status: ConversionStatus,
    /// Human readable cause, set for skipped and failed inputs
    pub reason: Option<String>,
    /// Written JPEG files: one, or one per frame with [`FrameSelection::All`]
    pub outputs: Vec<PathBuf>,
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ConversionStatus::Success
    }
}

/// All outcomes of one batch, in input order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<ConversionOutcome>,
}

impl BatchSummary {
    fn count(&self, status: ConversionStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(ConversionStatus::Success)
    }

    pub fn skipped(&self) -> usize {
        self.count(ConversionStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ConversionStatus::Failed)
    }

    /// Every written JPEG in conversion order
    pub fn output_files(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .flat_map(|o| o.outputs.iter().map(PathBuf::as_path))
    }
}

fn source_stem(source: &Path) -> String {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

/// Output file name: `{stem}.jpg`, or `{stem}_frame_{NNN}.jpg` (1-based) per frame
pub fn output_file_name(source: &Path, frame: Option<u32>) -> String {
    output_name(&source_stem(source), frame)
}

fn output_name(stem: &str, frame: Option<u32>) -> String {
    match frame {
        Some(index) => format!("{}_frame_{:03}.jpg", stem, index + 1),
        None => format!("{}.jpg", stem),
    }
}

/// Convert a single DICOM file, writing its JPEG(s) into `output_dir`.
///
/// Nothing is left on disk unless every selected frame was encoded and
/// written.
pub fn convert_file(
    source: &Path,
    options: &ConvertOptions,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    convert_file_as(source, &source_stem(source), options, output_dir)
}

fn convert_file_as(
    source: &Path,
    stem: &str,
    options: &ConvertOptions,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let loaded = object::load_image(source).context(LoadSnafu)?;
    let frames = loaded.buffer.number_of_frames.max(1);

    let selected: Vec<u32> = match options.frame_selection {
        FrameSelection::First => vec![options.frame_index],
        FrameSelection::All => (0..frames).collect(),
    };

    let mut encoded = Vec::with_capacity(selected.len());
    for &frame in &selected {
        let raster = pixel::normalize(&loaded.buffer, loaded.windowing.as_ref(), frame)
            .context(NormalizeSnafu { frame })?;

        if raster.width < 10 || raster.height < 10 {
            warn!(
                "Image is very small: {}x{} ({})",
                raster.width,
                raster.height,
                source.display()
            );
        }

        let jpeg = image_processing::raster_to_jpeg(raster, options.jpeg_quality)
            .context(EncodingSnafu { frame })?;

        let name = match options.frame_selection {
            FrameSelection::First => output_name(stem, None),
            FrameSelection::All => output_name(stem, Some(frame)),
        };
        encoded.push((output_dir.join(name), jpeg));
    }
    // the decoded buffer is released before anything is written
    drop(loaded);

    if frames > 1 && options.frame_selection == FrameSelection::First {
        info!(
            "Converted frame {} of {} from multi-frame {}",
            options.frame_index + 1,
            frames,
            source.display()
        );
    }

    let mut written = Vec::with_capacity(encoded.len());
    for (path, jpeg) in encoded {
        if let Err(e) = std::fs::write(&path, &jpeg) {
            for partial in &written {
                let _ = std::fs::remove_file(partial);
            }
            return Err(e).context(IoSnafu {
                path: path.display().to_string(),
            });
        }
        info!("Converted to JPEG: {} ({} bytes)", path.display(), jpeg.len());
        written.push(path);
    }
    Ok(written)
}

fn unique_stem(stem: &str, claimed: &HashSet<String>) -> String {
    if !claimed.contains(stem) {
        return stem.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", stem, n))
        .find(|candidate| !claimed.contains(candidate))
        .unwrap_or_else(|| stem.to_string())
}

fn is_skippable(error: &Error) -> bool {
    matches!(
        error,
        Error::Load {
            source: object::Error::NotSupported | object::Error::MissingPixelData
        }
    )
}

/// Convert every input in order, one outcome per input.
///
/// Only an invalid configuration fails the call; per-file errors end up in
/// the returned summary and never stop the batch.
pub fn convert_all(
    inputs: &[PathBuf],
    options: &ConvertOptions,
    output_dir: &Path,
    observer: &mut dyn ConversionObserver,
) -> Result<BatchSummary> {
    options.validate()?;
    observer.on_batch_start(inputs.len());

    let mut summary = BatchSummary {
        outcomes: Vec::with_capacity(inputs.len()),
    };
    // stems already written in this batch; same-named files from
    // different folders get a numeric suffix
    let mut claimed_stems = HashSet::new();

    for source in inputs {
        let stem = unique_stem(&source_stem(source), &claimed_stems);
        let outcome = match convert_file_as(source, &stem, options, output_dir) {
            Ok(outputs) => {
                claimed_stems.insert(stem);
                ConversionOutcome {
                    source: source.clone(),
                    status: ConversionStatus::Success,
                    reason: None,
                    outputs,
                }
            }
            Err(e) => {
                let status = if is_skippable(&e) {
                    ConversionStatus::Skipped
                } else {
                    ConversionStatus::Failed
                };
                let reason = Report::from_error(e).to_string();
                warn!("Error converting {}: {}", source.display(), reason);
                ConversionOutcome {
                    source: source.clone(),
                    status,
                    reason: Some(reason),
                    outputs: Vec::new(),
                }
            }
        };

        observer.on_file_processed(&outcome);
        summary.outcomes.push(outcome);
    }

    info!(
        "Batch complete: {} converted, {} skipped, {} failed",
        summary.succeeded(),
        summary.skipped(),
        summary.failed()
    );
    Ok(summary)
}
