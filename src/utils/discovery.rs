use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// File extensions treated as DICOM without looking inside
pub const DICOM_EXTENSIONS: &[&str] = &["dcm", "dicom", "dic"];

/// Part 10 files carry "DICM" right after the 128-byte preamble
fn has_dicm_preamble(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| {
            f.seek(SeekFrom::Start(128))?;
            f.read_exact(&mut magic)
        })
        .map(|_| &magic == b"DICM")
        .unwrap_or(false)
}

/// Whether `path` looks like a DICOM file: a known extension, or no
/// extension and a DICM preamble
pub fn is_dicom_candidate(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) => DICOM_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known)),
        None => has_dicm_preamble(path),
    }
}

/// Collect DICOM candidates under `dir`, ordered by file name.
///
/// `exclude` (typically the output folder) is never descended into.
pub fn find_dicom_files(dir: &Path, recursive: bool, exclude: Option<&Path>) -> Vec<PathBuf> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    WalkDir::new(dir)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !exclude.is_some_and(|ex| entry.path() == ex))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_dicom_candidate(path))
        .collect()
}
