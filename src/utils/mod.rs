pub mod dicom_tags;
pub mod discovery;
pub mod image_processing;

// Re-export commonly used items
pub use dicom_tags::*;
pub use discovery::{find_dicom_files, is_dicom_candidate};
