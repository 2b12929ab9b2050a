//! DICOM loading: opens a file, decodes its pixel data and hands the
//! normalizer a [`RawPixelBuffer`] plus the dataset's window presets.

use std::ffi::OsStr;
use std::path::Path;

use dicom_dictionary_std::tags;
use dicom_encoding::TransferSyntaxIndex;
use dicom_object::{open_file, DefaultDicomObject, InMemDicomObject};
use dicom_pixeldata::PixelDecoder;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use serde::Serialize;
use snafu::prelude::*;
use tracing::debug;

use crate::pixel::{
    Photometric, PixelRepresentation, PlanarConfiguration, RawPixelBuffer, Rescale, WindowPreset,
    WindowingParameters,
};
use crate::utils::{read_f64, read_multi_f64, read_str, read_u16, read_u32, tag_name};

#[derive(Debug, Snafu)]
pub enum Error {
    /// DICOMDIR file not supported
    NotSupported,

    /// Could not open DICOM file {path}
    ReadFile {
        path: String,
        source: Box<dicom_object::ReadError>,
    },

    /// No pixel data found
    MissingPixelData,

    /// Missing attribute {name}
    MissingAttribute { name: String },

    /// Could not decode pixel data (transfer syntax {transfer_syntax})
    DecodePixelData {
        transfer_syntax: String,
        source: dicom_pixeldata::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Uncompressed transfer syntaxes; anything else needs a codec
const NATIVE_TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",   // Implicit VR Little Endian
    "1.2.840.10008.1.2.1", // Explicit VR Little Endian
    "1.2.840.10008.1.2.2", // Explicit VR Big Endian
];

pub fn is_compressed(transfer_syntax_uid: &str) -> bool {
    !NATIVE_TRANSFER_SYNTAXES.contains(&transfer_syntax_uid)
}

/// Descriptive header attributes, read without touching pixel data
#[derive(Debug, Clone, Serialize)]
pub struct ImageHeader {
    pub modality: Option<String>,
    pub manufacturer: Option<String>,
    pub sop_class_uid: String,
    pub transfer_syntax_uid: String,
    pub transfer_syntax_name: Option<String>,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub bits_allocated: Option<u16>,
    pub bits_stored: Option<u16>,
    pub pixel_representation: Option<u16>,
    pub photometric_interpretation: Option<String>,
    pub number_of_frames: u32,
    pub windowing: Option<WindowingParameters>,
    pub has_pixel_data: bool,
}

impl ImageHeader {
    pub fn is_compressed(&self) -> bool {
        is_compressed(&self.transfer_syntax_uid)
    }
}

/// A decoded image ready for normalization
#[derive(Debug)]
pub struct LoadedImage {
    pub header: ImageHeader,
    pub buffer: RawPixelBuffer,
    pub windowing: Option<WindowingParameters>,
}

/// Open a DICOM file, refusing DICOMDIR
pub fn open(path: &Path) -> Result<DefaultDicomObject> {
    ensure!(
        path.file_name() != Some(OsStr::new("DICOMDIR")),
        NotSupportedSnafu
    );

    open_file(path)
        .map_err(Box::from)
        .context(ReadFileSnafu {
            path: path.display().to_string(),
        })
}

/// Window presets paired from WindowCenter / WindowWidth, in file order
pub fn read_windowing(obj: &InMemDicomObject) -> Option<WindowingParameters> {
    let centers = read_multi_f64(obj, tags::WINDOW_CENTER);
    let widths = read_multi_f64(obj, tags::WINDOW_WIDTH);

    let presets: Vec<WindowPreset> = centers
        .into_iter()
        .zip(widths)
        .map(|(center, width)| WindowPreset { center, width })
        .collect();

    (!presets.is_empty()).then_some(WindowingParameters { presets })
}

fn read_rescale(obj: &InMemDicomObject) -> Option<Rescale> {
    let slope = read_f64(obj, tags::RESCALE_SLOPE);
    let intercept = read_f64(obj, tags::RESCALE_INTERCEPT);
    if slope.is_none() && intercept.is_none() {
        return None;
    }
    Some(Rescale {
        slope: slope.unwrap_or(1.0),
        intercept: intercept.unwrap_or(0.0),
    })
}

pub fn read_header(obj: &DefaultDicomObject) -> ImageHeader {
    let meta = obj.meta();
    let transfer_syntax_uid = meta.transfer_syntax.trim_end_matches('\0').to_string();
    let transfer_syntax_name = TransferSyntaxRegistry
        .get(&transfer_syntax_uid)
        .map(|ts| ts.name().to_string());

    ImageHeader {
        modality: read_str(obj, tags::MODALITY),
        manufacturer: read_str(obj, tags::MANUFACTURER),
        sop_class_uid: meta
            .media_storage_sop_class_uid
            .trim_end_matches('\0')
            .to_string(),
        transfer_syntax_uid,
        transfer_syntax_name,
        rows: read_u32(obj, tags::ROWS),
        columns: read_u32(obj, tags::COLUMNS),
        bits_allocated: read_u16(obj, tags::BITS_ALLOCATED),
        bits_stored: read_u16(obj, tags::BITS_STORED),
        pixel_representation: read_u16(obj, tags::PIXEL_REPRESENTATION),
        photometric_interpretation: read_str(obj, tags::PHOTOMETRIC_INTERPRETATION),
        number_of_frames: read_u32(obj, tags::NUMBER_OF_FRAMES).unwrap_or(1),
        windowing: read_windowing(obj),
        has_pixel_data: obj.element(tags::PIXEL_DATA).is_ok(),
    }
}

/// Decode the pixel data of an opened object into a [`RawPixelBuffer`]
pub fn decode(obj: &DefaultDicomObject, header: &ImageHeader) -> Result<RawPixelBuffer> {
    ensure!(header.has_pixel_data, MissingPixelDataSnafu);
    for (tag, present) in [
        (tags::ROWS, header.rows.is_some()),
        (tags::COLUMNS, header.columns.is_some()),
    ] {
        ensure!(present, MissingAttributeSnafu { name: tag_name(tag) });
    }

    let decoded = obj.decode_pixel_data().context(DecodePixelDataSnafu {
        transfer_syntax: header
            .transfer_syntax_name
            .clone()
            .unwrap_or_else(|| header.transfer_syntax_uid.clone()),
    })?;

    let pixel_representation = match read_u16(obj, tags::PIXEL_REPRESENTATION) {
        Some(1) => PixelRepresentation::Signed,
        _ => PixelRepresentation::Unsigned,
    };

    // decoders of encapsulated syntaxes always emit interleaved samples
    let planar_configuration = match read_u16(obj, tags::PLANAR_CONFIGURATION) {
        Some(1) if !header.is_compressed() => PlanarConfiguration::Planar,
        _ => PlanarConfiguration::Interleaved,
    };

    let photometric_interpretation = Photometric::parse(decoded.photometric_interpretation().as_str());

    let rescale = match photometric_interpretation {
        Photometric::Rgb => None,
        _ => read_rescale(obj),
    };

    Ok(RawPixelBuffer {
        rows: decoded.rows(),
        columns: decoded.columns(),
        samples_per_pixel: decoded.samples_per_pixel(),
        bits_allocated: decoded.bits_allocated(),
        bits_stored: decoded.bits_stored(),
        pixel_representation,
        number_of_frames: decoded.number_of_frames(),
        photometric_interpretation,
        planar_configuration,
        rescale,
        data: decoded.data().to_vec(),
    })
}

/// Open and decode a DICOM file in one step
pub fn load_image(path: &Path) -> Result<LoadedImage> {
    let obj = open(path)?;
    let header = read_header(&obj);

    debug!("DICOM SOP Class UID: {}", header.sop_class_uid);
    debug!("Transfer Syntax UID: {}", header.transfer_syntax_uid);
    debug!(
        "Photometric Interpretation: {}",
        header.photometric_interpretation.as_deref().unwrap_or("Unknown")
    );
    debug!(
        "Bits Allocated/Stored: {:?}/{:?}, Pixel Representation: {:?}, Frames: {}",
        header.bits_allocated,
        header.bits_stored,
        header.pixel_representation,
        header.number_of_frames
    );

    let buffer = decode(&obj, &header)?;
    let windowing = header.windowing.clone();

    Ok(LoadedImage {
        header,
        buffer,
        windowing,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::uids;
    use dicom_object::meta::FileMetaTableBuilder;
    use std::path::PathBuf;

    /// Options for a synthetic DICOM fixture
    pub(crate) struct Fixture {
        pub rows: u16,
        pub columns: u16,
        pub frames: u32,
        pub photometric: &'static str,
        pub signed: bool,
        pub window: Option<(&'static str, &'static str)>,
        pub samples: Vec<u16>,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Fixture {
                rows: 4,
                columns: 4,
                frames: 1,
                photometric: "MONOCHROME2",
                signed: false,
                window: None,
                samples: (0..16).map(|i| i * 256).collect(),
            }
        }
    }

    impl Fixture {
        /// Write a 16-bit grayscale Part 10 file into `dir`
        pub(crate) fn write(&self, dir: &Path, name: &str) -> PathBuf {
            let mut elements = vec![
                DataElement::new(
                    tags::SOP_CLASS_UID,
                    VR::UI,
                    dicom_value!(Str, uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
                ),
                DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, "2.25.1")),
                DataElement::new(tags::MODALITY, VR::CS, dicom_value!(Str, "OT")),
                DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
                DataElement::new(
                    tags::PHOTOMETRIC_INTERPRETATION,
                    VR::CS,
                    dicom_value!(Str, self.photometric),
                ),
                DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(self.rows)),
                DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns)),
                DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
                DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
                DataElement::new(
                    tags::PIXEL_REPRESENTATION,
                    VR::US,
                    PrimitiveValue::from(if self.signed { 1_u16 } else { 0_u16 }),
                ),
                DataElement::new(
                    tags::PIXEL_DATA,
                    VR::OW,
                    PrimitiveValue::U16(self.samples.iter().copied().collect()),
                ),
            ];
            if self.frames > 1 {
                elements.push(DataElement::new(
                    tags::NUMBER_OF_FRAMES,
                    VR::IS,
                    dicom_value!(Str, self.frames.to_string()),
                ));
            }
            if let Some((center, width)) = self.window {
                elements.push(DataElement::new(
                    tags::WINDOW_CENTER,
                    VR::DS,
                    dicom_value!(Str, center),
                ));
                elements.push(DataElement::new(
                    tags::WINDOW_WIDTH,
                    VR::DS,
                    dicom_value!(Str, width),
                ));
            }

            let obj = InMemDicomObject::from_element_iter(elements)
                .with_meta(
                    FileMetaTableBuilder::new()
                        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                        .media_storage_sop_class_uid(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
                        .media_storage_sop_instance_uid("2.25.1"),
                )
                .unwrap();

            let path = dir.join(name);
            obj.write_to_file(&path).unwrap();
            path
        }
    }

    #[test]
    fn test_load_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = Fixture {
            window: Some(("40\\300", "400\\1500")),
            ..Default::default()
        }
        .write(dir.path(), "ct.dcm");

        let loaded = load_image(&path).unwrap();
        assert_eq!((loaded.buffer.rows, loaded.buffer.columns), (4, 4));
        assert_eq!(loaded.buffer.bits_allocated, 16);
        assert_eq!(loaded.buffer.number_of_frames, 1);
        assert_eq!(
            loaded.buffer.photometric_interpretation,
            Photometric::Monochrome2
        );
        assert_eq!(loaded.buffer.data.len(), 32);
        assert_eq!(loaded.header.modality.as_deref(), Some("OT"));
        assert!(!loaded.header.is_compressed());

        let windowing = loaded.windowing.unwrap();
        assert_eq!(
            windowing.presets,
            vec![
                WindowPreset { center: 40.0, width: 400.0 },
                WindowPreset { center: 300.0, width: 1500.0 },
            ]
        );
    }

    #[test]
    fn test_signed_representation() {
        let dir = tempfile::tempdir().unwrap();
        let path = Fixture {
            signed: true,
            ..Default::default()
        }
        .write(dir.path(), "signed.dcm");

        let loaded = load_image(&path).unwrap();
        assert_eq!(
            loaded.buffer.pixel_representation,
            PixelRepresentation::Signed
        );
    }

    #[test]
    fn test_dicomdir_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("DICOMDIR");
        std::fs::write(&path, b"whatever").unwrap();
        assert!(matches!(load_image(&path), Err(Error::NotSupported)));
    }

    #[test]
    fn test_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.dcm");
        std::fs::write(&path, vec![0x42u8; 300]).unwrap();
        assert!(matches!(load_image(&path), Err(Error::ReadFile { .. })));
    }

    #[test]
    fn test_is_compressed() {
        assert!(!is_compressed("1.2.840.10008.1.2.1"));
        assert!(is_compressed("1.2.840.10008.1.2.4.50"));
        assert!(is_compressed("1.2.840.10008.1.2.5"));
    }
}
