//! Pre-flight inspection of a single DICOM file.
//!
//! Reports what would happen if the file went through the converter, plus
//! the oddities that usually explain a blank or useless JPEG.

use std::path::{Path, PathBuf};

use serde::Serialize;
use snafu::Report;
use tracing::debug;

use crate::object::{self, ImageHeader};
use crate::pixel::{self, RawPixelBuffer};

/// Images narrower or shorter than this are flagged as very small
pub const SMALL_IMAGE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct DicomDiagnosis {
    pub path: PathBuf,
    pub header: Option<ImageHeader>,
    /// Size of the raster frame 0 normalizes to
    pub output_size: Option<(u32, u32)>,
    pub warnings: Vec<String>,
    /// Why the file cannot be converted, if it cannot
    pub error: Option<String>,
    pub convertible: bool,
}

impl DicomDiagnosis {
    fn failed(path: &Path, header: Option<ImageHeader>, warnings: Vec<String>, error: String) -> Self {
        DicomDiagnosis {
            path: path.to_path_buf(),
            header,
            output_size: None,
            warnings,
            error: Some(error),
            convertible: false,
        }
    }
}

/// Inspect `path` and test-normalize its first frame. Never fails; problems
/// end up in `error` and `warnings`.
pub fn diagnose(path: &Path) -> DicomDiagnosis {
    let obj = match object::open(path) {
        Ok(obj) => obj,
        Err(e) => return DicomDiagnosis::failed(path, None, Vec::new(), Report::from_error(e).to_string()),
    };

    let header = object::read_header(&obj);
    let mut warnings = header_warnings(&header);

    let buffer = match object::decode(&obj, &header) {
        Ok(buffer) => buffer,
        Err(e) => {
            if header.is_compressed() {
                warnings.push(format!(
                    "Compressed transfer syntax {} could not be decoded; the file may need transcoding to an uncompressed syntax first",
                    header
                        .transfer_syntax_name
                        .as_deref()
                        .unwrap_or(&header.transfer_syntax_uid)
                ));
            }
            let error = Report::from_error(e).to_string();
            return DicomDiagnosis::failed(path, Some(header), warnings, error);
        }
    };
    drop(obj);

    if is_constant(&buffer) {
        warnings.push("All pixel values are identical; the image will be uniformly gray".to_string());
    }

    match pixel::normalize(&buffer, header.windowing.as_ref(), 0) {
        Ok(raster) => {
            debug!(
                "{} normalizes to {}x{} ({} channels)",
                path.display(),
                raster.width,
                raster.height,
                raster.channels
            );
            DicomDiagnosis {
                path: path.to_path_buf(),
                header: Some(header),
                output_size: Some((raster.width, raster.height)),
                warnings,
                error: None,
                convertible: true,
            }
        }
        Err(e) => DicomDiagnosis::failed(path, Some(header), warnings, Report::from_error(e).to_string()),
    }
}

fn header_warnings(header: &ImageHeader) -> Vec<String> {
    let mut warnings = Vec::new();

    if let (Some(rows), Some(columns)) = (header.rows, header.columns) {
        if rows == 1 || columns == 1 {
            warnings.push(format!("Image is a single line ({}x{})", columns, rows));
        }
        if rows < SMALL_IMAGE_THRESHOLD || columns < SMALL_IMAGE_THRESHOLD {
            warnings.push(format!("Image is very small ({}x{})", columns, rows));
        }
    }

    if header.number_of_frames > 1 {
        warnings.push(format!(
            "Multi-frame image ({} frames); only one frame is converted unless all frames are requested",
            header.number_of_frames
        ));
    }

    if !header.has_pixel_data {
        warnings.push("No pixel data element".to_string());
    }

    warnings
}

/// Whether every sample of frame 0 holds the same value
fn is_constant(buffer: &RawPixelBuffer) -> bool {
    let sample_len = usize::from(buffer.bits_allocated / 8).max(1);
    let frame = &buffer.data[..buffer.frame_len().min(buffer.data.len())];
    let mut samples = frame.chunks_exact(sample_len);
    match samples.next() {
        Some(first) => samples.all(|s| s == first),
        None => false,
    }
}
