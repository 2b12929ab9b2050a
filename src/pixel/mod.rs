//! Pixel normalization: turns a decoded DICOM pixel payload into an 8-bit raster.
//!
//! The normalizer handles:
//! - 8, 16 and 32-bit samples, signed or unsigned
//! - `bits_stored` narrower than `bits_allocated` (out-of-range samples are clipped)
//! - modality rescale (slope/intercept)
//! - VOI windowing from the first usable window preset, or min/max scaling
//! - MONOCHROME1 inversion
//! - RGB passthrough, interleaved or planar
//! - frame selection from multi-frame payloads

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    /// Unsupported pixel format: {detail}
    UnsupportedPixelFormat { detail: String },

    /// Empty pixel data: {detail}
    EmptyPixelData { detail: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pixel representation (0028,0103)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelRepresentation {
    Unsigned,
    Signed,
}

/// Photometric interpretation (0028,0004), reduced to what the normalizer understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Photometric {
    /// Minimum sample renders as white
    Monochrome1,
    /// Minimum sample renders as black
    Monochrome2,
    Rgb,
    Other(String),
}

impl Photometric {
    pub fn parse(value: &str) -> Self {
        match value.trim().trim_end_matches('\0').to_uppercase().as_str() {
            "MONOCHROME1" => Photometric::Monochrome1,
            "MONOCHROME2" => Photometric::Monochrome2,
            "RGB" => Photometric::Rgb,
            other => Photometric::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Photometric::Monochrome1 => "MONOCHROME1",
            Photometric::Monochrome2 => "MONOCHROME2",
            Photometric::Rgb => "RGB",
            Photometric::Other(s) => s,
        }
    }
}

/// Planar configuration (0028,0006) for multi-sample pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanarConfiguration {
    /// R1 G1 B1 R2 G2 B2 ...
    Interleaved,
    /// R1 R2 ... G1 G2 ... B1 B2 ...
    Planar,
}

/// Modality LUT as a linear transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

/// Decoded pixel payload of one DICOM instance.
///
/// `data` holds little-endian samples, frames stored back to back.
#[derive(Debug, Clone)]
pub struct RawPixelBuffer {
    pub rows: u32,
    pub columns: u32,
    pub samples_per_pixel: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub pixel_representation: PixelRepresentation,
    pub number_of_frames: u32,
    pub photometric_interpretation: Photometric,
    pub planar_configuration: PlanarConfiguration,
    pub rescale: Option<Rescale>,
    pub data: Vec<u8>,
}

impl RawPixelBuffer {
    fn bytes_per_sample(&self) -> usize {
        (self.bits_allocated / 8) as usize
    }

    /// Size in bytes of one frame
    pub fn frame_len(&self) -> usize {
        self.rows as usize
            * self.columns as usize
            * self.samples_per_pixel as usize
            * self.bytes_per_sample()
    }

    fn effective_bits_stored(&self) -> u16 {
        if self.bits_stored == 0 || self.bits_stored > self.bits_allocated {
            self.bits_allocated
        } else {
            self.bits_stored
        }
    }
}

/// A single window (VOI) preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowPreset {
    pub center: f64,
    pub width: f64,
}

/// Window presets carried by a dataset, in file order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowingParameters {
    pub presets: Vec<WindowPreset>,
}

impl WindowingParameters {
    pub fn single(center: f64, width: f64) -> Self {
        WindowingParameters {
            presets: vec![WindowPreset { center, width }],
        }
    }

    /// First preset with a positive width
    pub fn first_usable(&self) -> Option<WindowPreset> {
        self.presets
            .iter()
            .copied()
            .find(|p| p.width > 0.0 && p.center.is_finite() && p.width.is_finite())
    }
}

/// Canonical 8-bit raster, 1 (grayscale) or 3 (RGB, interleaved) channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRaster {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl NormalizedRaster {
    pub fn is_grayscale(&self) -> bool {
        self.channels == 1
    }
}

/// Sample value emitted for every pixel of a frame with no contrast
pub const MID_GRAY: u8 = 128;

/// Normalize one frame of `buffer` into an 8-bit raster.
///
/// Windowing uses the first usable preset from `windowing`; without one,
/// samples are scaled from the frame's own min/max.
pub fn normalize(
    buffer: &RawPixelBuffer,
    windowing: Option<&WindowingParameters>,
    frame_index: u32,
) -> Result<NormalizedRaster> {
    check_format(buffer)?;

    ensure!(
        buffer.rows > 0 && buffer.columns > 0 && !buffer.data.is_empty(),
        EmptyPixelDataSnafu {
            detail: format!(
                "{}x{} image with {} bytes of pixel data",
                buffer.columns,
                buffer.rows,
                buffer.data.len()
            ),
        }
    );

    let frames = buffer.number_of_frames.max(1);
    ensure!(
        frame_index < frames,
        EmptyPixelDataSnafu {
            detail: format!("frame {} out of range (0-{})", frame_index, frames - 1),
        }
    );

    let frame_len = buffer.frame_len();
    let start = frame_index as usize * frame_len;
    let end = start + frame_len;
    ensure!(
        end <= buffer.data.len(),
        EmptyPixelDataSnafu {
            detail: format!(
                "frame {} needs bytes {}..{} but buffer holds {}",
                frame_index,
                start,
                end,
                buffer.data.len()
            ),
        }
    );

    let samples = read_samples(buffer, &buffer.data[start..end]);

    let data = match buffer.photometric_interpretation {
        Photometric::Rgb => rgb_to_u8(buffer, &samples),
        Photometric::Monochrome1 | Photometric::Monochrome2 => {
            let values = apply_rescale(&samples, buffer.rescale);
            let inverted = buffer.photometric_interpretation == Photometric::Monochrome1;
            grayscale_to_u8(&values, windowing, inverted)
        }
        Photometric::Other(ref name) => {
            return UnsupportedPixelFormatSnafu {
                detail: format!("photometric interpretation {}", name),
            }
            .fail()
        }
    };

    Ok(NormalizedRaster {
        width: buffer.columns,
        height: buffer.rows,
        channels: if buffer.samples_per_pixel == 3 { 3 } else { 1 },
        data,
    })
}

fn check_format(buffer: &RawPixelBuffer) -> Result<()> {
    ensure!(
        matches!(buffer.bits_allocated, 8 | 16 | 32),
        UnsupportedPixelFormatSnafu {
            detail: format!("bits allocated {}", buffer.bits_allocated),
        }
    );

    match (&buffer.photometric_interpretation, buffer.samples_per_pixel) {
        (Photometric::Monochrome1 | Photometric::Monochrome2, 1) => Ok(()),
        (Photometric::Rgb, 3) => Ok(()),
        (photometric, samples) => UnsupportedPixelFormatSnafu {
            detail: format!(
                "photometric interpretation {} with {} samples per pixel",
                photometric.as_str(),
                samples
            ),
        }
        .fail(),
    }
}

/// Decode the raw words of one frame into sample values.
///
/// Signed samples keep only their low `bits_stored` bits and are
/// sign-extended from there, whatever the decoder left in the high bits.
/// Unsigned samples are clipped to `[0, 2^bits_stored - 1]`.
fn read_samples(buffer: &RawPixelBuffer, frame: &[u8]) -> Vec<i64> {
    let bits_stored = buffer.effective_bits_stored() as u32;
    let signed = buffer.pixel_representation == PixelRepresentation::Signed;

    let words: Box<dyn Iterator<Item = u64> + '_> = match buffer.bits_allocated {
        8 => Box::new(frame.iter().map(|&b| b as u64)),
        16 => Box::new(
            frame
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]) as u64),
        ),
        _ => Box::new(
            frame
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64),
        ),
    };

    if signed {
        let shift = 64 - bits_stored;
        words
            .map(|w| ((w << shift) as i64) >> shift)
            .collect()
    } else {
        let hi = (1i64 << bits_stored) - 1;
        words.map(|w| (w as i64).min(hi)).collect()
    }
}

fn apply_rescale(samples: &[i64], rescale: Option<Rescale>) -> Vec<f64> {
    match rescale {
        Some(Rescale { slope, intercept }) if slope.is_finite() && intercept.is_finite() => {
            samples
                .iter()
                .map(|&v| v as f64 * slope + intercept)
                .collect()
        }
        _ => samples.iter().map(|&v| v as f64).collect(),
    }
}

fn to_u8(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 255.0).round() as u8
}

fn grayscale_to_u8(
    values: &[f64],
    windowing: Option<&WindowingParameters>,
    inverted: bool,
) -> Vec<u8> {
    let (lower, range) = match windowing.and_then(WindowingParameters::first_usable) {
        Some(WindowPreset { center, width }) => {
            tracing::debug!("Applying window: center={}, width={}", center, width);
            (center - width / 2.0, width)
        }
        None => {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            tracing::debug!("Pixel range before normalization: {} to {}", min, max);

            if max <= min {
                tracing::debug!("All pixels have the same value, emitting mid-gray frame");
                return vec![MID_GRAY; values.len()];
            }
            (min, max - min)
        }
    };

    values
        .iter()
        .map(|&v| {
            let out = to_u8((v - lower) / range * 255.0);
            if inverted {
                255 - out
            } else {
                out
            }
        })
        .collect()
}

fn rgb_to_u8(buffer: &RawPixelBuffer, samples: &[i64]) -> Vec<u8> {
    let bits_stored = buffer.effective_bits_stored() as u32;
    let scale = if bits_stored <= 8 {
        1.0
    } else {
        255.0 / ((1u64 << bits_stored) - 1) as f64
    };
    let cast = |v: i64| to_u8(v as f64 * scale);

    match buffer.planar_configuration {
        PlanarConfiguration::Interleaved => samples.iter().map(|&v| cast(v)).collect(),
        PlanarConfiguration::Planar => {
            let plane = samples.len() / 3;
            let mut out = Vec::with_capacity(samples.len());
            for i in 0..plane {
                for channel in 0..3 {
                    out.push(cast(samples[channel * plane + i]));
                }
            }
            out
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn gray_u16(
        rows: u32,
        columns: u32,
        frames: u32,
        photometric: Photometric,
        samples: &[u16],
    ) -> RawPixelBuffer {
        RawPixelBuffer {
            rows,
            columns,
            samples_per_pixel: 1,
            bits_allocated: 16,
            bits_stored: 16,
            pixel_representation: PixelRepresentation::Unsigned,
            number_of_frames: frames,
            photometric_interpretation: photometric,
            planar_configuration: PlanarConfiguration::Interleaved,
            rescale: None,
            data: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    #[test]
    fn windowing_is_monotonic_for_monochrome2() {
        let samples: Vec<u16> = (0..64).map(|i| i * 64).collect();
        let buffer = gray_u16(8, 8, 1, Photometric::Monochrome2, &samples);
        let windowing = WindowingParameters::single(2000.0, 1500.0);

        let raster = normalize(&buffer, Some(&windowing), 0).unwrap();

        assert_eq!(raster.channels, 1);
        assert!(raster.data.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(raster.data[0], 0);
        assert_eq!(*raster.data.last().unwrap(), 255);
    }

    #[test]
    fn window_formula_matches_linear_transform() {
        let buffer = gray_u16(1, 3, 1, Photometric::Monochrome2, &[40, 240, 440]);
        let windowing = WindowingParameters::single(240.0, 400.0);

        let raster = normalize(&buffer, Some(&windowing), 0).unwrap();

        // lower edge 40: 0, center: 127.5 rounds to 128, upper edge: 255
        assert_eq!(raster.data, vec![0, 128, 255]);
    }

    #[test]
    fn first_usable_preset_wins() {
        let windowing = WindowingParameters {
            presets: vec![
                WindowPreset { center: 10.0, width: 0.0 },
                WindowPreset { center: 40.0, width: 400.0 },
                WindowPreset { center: 300.0, width: 1500.0 },
            ],
        };
        assert_eq!(
            windowing.first_usable(),
            Some(WindowPreset { center: 40.0, width: 400.0 })
        );
    }

    #[test]
    fn monochrome1_is_inverse_of_monochrome2() {
        let samples: Vec<u16> = vec![3, 900, 17, 4095, 2048, 1, 600, 1200, 77];
        let mono2 = gray_u16(3, 3, 1, Photometric::Monochrome2, &samples);
        let mono1 = gray_u16(3, 3, 1, Photometric::Monochrome1, &samples);

        for windowing in [None, Some(WindowingParameters::single(1024.0, 2048.0))] {
            let a = normalize(&mono2, windowing.as_ref(), 0).unwrap();
            let b = normalize(&mono1, windowing.as_ref(), 0).unwrap();
            let expected: Vec<u8> = a.data.iter().map(|v| 255 - v).collect();
            assert_eq!(b.data, expected);
        }
    }

    #[test]
    fn constant_frame_is_mid_gray() {
        for (rows, columns) in [(1, 1), (4, 7), (32, 32)] {
            let samples = vec![812u16; (rows * columns) as usize];
            let buffer = gray_u16(rows, columns, 1, Photometric::Monochrome2, &samples);
            let raster = normalize(&buffer, None, 0).unwrap();
            assert!(raster.data.iter().all(|&v| v == MID_GRAY));
            assert_eq!((raster.width, raster.height), (columns, rows));
        }
    }

    #[test]
    fn frame_zero_matches_single_frame_buffer() {
        let frame0: Vec<u16> = (0..12).map(|i| i * 100).collect();
        let frame1: Vec<u16> = (0..12).map(|i| 5000 - i * 7).collect();
        let frame2 = vec![9u16; 12];
        let all: Vec<u16> = [frame0.clone(), frame1, frame2].concat();

        let multi = gray_u16(3, 4, 3, Photometric::Monochrome2, &all);
        let single = gray_u16(3, 4, 1, Photometric::Monochrome2, &frame0);

        assert_eq!(
            normalize(&multi, None, 0).unwrap(),
            normalize(&single, None, 0).unwrap()
        );
        let windowing = WindowingParameters::single(600.0, 800.0);
        assert_eq!(
            normalize(&multi, Some(&windowing), 0).unwrap(),
            normalize(&single, Some(&windowing), 0).unwrap()
        );
    }

    #[test]
    fn later_frames_are_selectable() {
        let all: Vec<u16> = [vec![0u16; 4], vec![0, 10, 20, 30]].concat();
        let multi = gray_u16(2, 2, 2, Photometric::Monochrome2, &all);

        let raster = normalize(&multi, None, 1).unwrap();
        assert_eq!(raster.data, vec![0, 85, 170, 255]);
    }

    #[test]
    fn frame_index_out_of_range_is_empty_pixel_data() {
        let buffer = gray_u16(2, 2, 2, Photometric::Monochrome2, &[0; 8]);
        let err = normalize(&buffer, None, 2).unwrap_err();
        assert!(matches!(err, Error::EmptyPixelData { .. }));
    }

    #[test]
    fn truncated_buffer_is_empty_pixel_data() {
        let buffer = gray_u16(4, 4, 1, Photometric::Monochrome2, &[1, 2, 3]);
        assert!(matches!(
            normalize(&buffer, None, 0),
            Err(Error::EmptyPixelData { .. })
        ));

        let empty = gray_u16(0, 0, 1, Photometric::Monochrome2, &[]);
        assert!(matches!(
            normalize(&empty, None, 0),
            Err(Error::EmptyPixelData { .. })
        ));
    }

    #[test]
    fn unsupported_formats_are_rejected() {
        let mut buffer = gray_u16(2, 2, 1, Photometric::Monochrome2, &[0; 4]);
        buffer.bits_allocated = 12;
        assert!(matches!(
            normalize(&buffer, None, 0),
            Err(Error::UnsupportedPixelFormat { .. })
        ));

        let palette = gray_u16(2, 2, 1, Photometric::parse("PALETTE COLOR"), &[0; 4]);
        assert!(matches!(
            normalize(&palette, None, 0),
            Err(Error::UnsupportedPixelFormat { .. })
        ));

        let mut odd_samples = gray_u16(2, 2, 1, Photometric::Rgb, &[0; 4]);
        odd_samples.samples_per_pixel = 1;
        assert!(matches!(
            normalize(&odd_samples, None, 0),
            Err(Error::UnsupportedPixelFormat { .. })
        ));
    }

    #[test]
    fn signed_samples_are_reinterpreted() {
        let values: [i16; 4] = [-1000, -1, 0, 1000];
        let mut buffer = gray_u16(
            2,
            2,
            1,
            Photometric::Monochrome2,
            &values.map(|v| v as u16),
        );
        buffer.pixel_representation = PixelRepresentation::Signed;

        let raster = normalize(&buffer, None, 0).unwrap();
        // read as unsigned, -1 (0xFFFF) would be the brightest sample
        assert_eq!(raster.data, vec![0, 127, 128, 255]);
    }

    #[test]
    fn signed_samples_are_sign_extended_from_bits_stored() {
        // -2048, -1, 2047 in 12 bits, high bits left clear
        let mut buffer = gray_u16(1, 3, 1, Photometric::Monochrome2, &[0x0800, 0x0FFF, 0x07FF]);
        buffer.bits_stored = 12;
        buffer.pixel_representation = PixelRepresentation::Signed;
        assert_eq!(normalize(&buffer, None, 0).unwrap().data, vec![0, 127, 255]);

        // same values with the high bits already extended
        let mut extended = gray_u16(1, 3, 1, Photometric::Monochrome2, &[0xF800, 0xFFFF, 0x07FF]);
        extended.bits_stored = 12;
        extended.pixel_representation = PixelRepresentation::Signed;
        assert_eq!(normalize(&extended, None, 0).unwrap().data, vec![0, 127, 255]);
    }

    #[test]
    fn signed_samples_of_every_width() {
        let mut bytes8 = gray_u16(1, 4, 1, Photometric::Monochrome2, &[0; 4]);
        bytes8.bits_allocated = 8;
        bytes8.bits_stored = 8;
        bytes8.pixel_representation = PixelRepresentation::Signed;
        bytes8.data = vec![0x80, 0xFF, 0x00, 0x7F];
        assert_eq!(normalize(&bytes8, None, 0).unwrap().data, vec![0, 127, 128, 255]);

        let mut bytes32 = gray_u16(1, 3, 1, Photometric::Monochrome2, &[0; 3]);
        bytes32.bits_allocated = 32;
        bytes32.bits_stored = 32;
        bytes32.pixel_representation = PixelRepresentation::Signed;
        bytes32.data = [-100_000i32, 0, 100_000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(normalize(&bytes32, None, 0).unwrap().data, vec![0, 128, 255]);
    }

    #[test]
    fn samples_outside_bits_stored_are_clipped() {
        // 12 bits stored: 0x0FFF is the ceiling, 0xF000 is corrupt
        let mut buffer = gray_u16(1, 3, 1, Photometric::Monochrome2, &[0, 0x0FFF, 0xF000]);
        buffer.bits_stored = 12;

        let raster = normalize(&buffer, None, 0).unwrap();
        assert_eq!(raster.data, vec![0, 255, 255]);
    }

    #[test]
    fn rescale_is_applied_before_windowing() {
        let mut buffer = gray_u16(1, 2, 1, Photometric::Monochrome2, &[0, 2048]);
        buffer.rescale = Some(Rescale {
            slope: 1.0,
            intercept: -1024.0,
        });
        // soft tissue window in Hounsfield units
        let windowing = WindowingParameters::single(40.0, 400.0);

        let raster = normalize(&buffer, Some(&windowing), 0).unwrap();
        assert_eq!(raster.data, vec![0, 255]);
    }

    #[test]
    fn rgb_bypasses_windowing_and_inversion() {
        let buffer = RawPixelBuffer {
            rows: 1,
            columns: 2,
            samples_per_pixel: 3,
            bits_allocated: 8,
            bits_stored: 8,
            pixel_representation: PixelRepresentation::Unsigned,
            number_of_frames: 1,
            photometric_interpretation: Photometric::Rgb,
            planar_configuration: PlanarConfiguration::Interleaved,
            rescale: None,
            data: vec![10, 20, 30, 200, 100, 0],
        };
        let windowing = WindowingParameters::single(0.0, 1.0);

        let raster = normalize(&buffer, Some(&windowing), 0).unwrap();
        assert_eq!(raster.channels, 3);
        assert_eq!(raster.data, vec![10, 20, 30, 200, 100, 0]);
    }

    #[test]
    fn planar_rgb_is_interleaved() {
        let buffer = RawPixelBuffer {
            rows: 1,
            columns: 2,
            samples_per_pixel: 3,
            bits_allocated: 8,
            bits_stored: 8,
            pixel_representation: PixelRepresentation::Unsigned,
            number_of_frames: 1,
            photometric_interpretation: Photometric::Rgb,
            planar_configuration: PlanarConfiguration::Planar,
            rescale: None,
            data: vec![1, 2, 3, 4, 5, 6],
        };

        let raster = normalize(&buffer, None, 0).unwrap();
        assert_eq!(raster.data, vec![1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn wide_rgb_is_scaled_from_native_range() {
        let samples: Vec<u16> = vec![0, 0x0FFF, 0x0800];
        let mut buffer = gray_u16(1, 1, 1, Photometric::Rgb, &samples);
        buffer.samples_per_pixel = 3;
        buffer.bits_stored = 12;

        let raster = normalize(&buffer, None, 0).unwrap();
        assert_eq!(raster.data, vec![0, 255, 128]);
    }

    #[test]
    fn degenerate_geometry_passes_through() {
        let buffer = gray_u16(1, 5, 1, Photometric::Monochrome2, &[0, 1, 2, 3, 4]);
        let raster = normalize(&buffer, None, 0).unwrap();
        assert_eq!((raster.width, raster.height), (5, 1));
        assert_eq!(raster.data.len(), 5);
    }

    #[test]
    fn photometric_parsing() {
        assert_eq!(Photometric::parse("MONOCHROME1"), Photometric::Monochrome1);
        assert_eq!(Photometric::parse("monochrome2 "), Photometric::Monochrome2);
        assert_eq!(Photometric::parse("RGB\0"), Photometric::Rgb);
        assert_eq!(
            Photometric::parse("YBR_FULL"),
            Photometric::Other("YBR_FULL".to_string())
        );
    }
}
