//! Frame codec for the O3D byte stream.
//!
//! The camera answers every image request with one fixed-size frame per
//! requested image:
//!
//! - 94 metadata values, then
//! - a 50 x 64 pixel grid in row-major order,
//!
//! all encoded as big-endian IEEE-754 single-precision floats.
//!
//! - `ImageKind`: which image a frame carries, with its command letter.
//! - `MetaField`: the documented metadata slots.
//! - `decode_frame()` / `encode_frame()`: pure byte <-> value conversion.
//! - `DecodedImage`: a decoded frame tagged with its kind.

use std::fmt;

use crate::error::{O3dError, Result};

/// Number of metadata values at the head of every frame.
pub const META_COUNT: usize = 94;

/// Pixel columns per image.
pub const WIDTH: usize = 64;

/// Pixel rows per image.
pub const HEIGHT: usize = 50;

/// Pixels per image.
pub const PIXEL_COUNT: usize = WIDTH * HEIGHT;

/// Size of one frame on the wire.
pub const FRAME_BYTES: usize = (META_COUNT + PIXEL_COUNT) * 4;

/// Row-major pixel grid; `pixels[row][col]`.
pub type PixelGrid = Vec<[f32; WIDTH]>;

// ----------------------------------------------------------------------------
// ImageKind: what a frame contains
// ----------------------------------------------------------------------------

/// Image kinds the camera can stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageKind {
    /// Radial distance.
    Distance,
    /// Amplitude / intensity.
    Amplitude,
    /// X cartesian component.
    XComponent,
    /// Y cartesian component.
    YComponent,
    /// Z cartesian component.
    ZComponent,
    /// X component of the surface normal.
    XNormal,
    /// Y component of the surface normal.
    YNormal,
    /// Z component of the surface normal.
    ZNormal,
}

impl ImageKind {
    /// Every image kind, in command-letter order.
    pub const ALL: [ImageKind; 8] = [
        ImageKind::Distance,
        ImageKind::Amplitude,
        ImageKind::XComponent,
        ImageKind::YComponent,
        ImageKind::ZComponent,
        ImageKind::XNormal,
        ImageKind::YNormal,
        ImageKind::ZNormal,
    ];

    /// Lowercase command letter requesting this image.
    pub const fn code(self) -> char {
        match self {
            ImageKind::Distance => 'd',
            ImageKind::Amplitude => 'i',
            ImageKind::XComponent => 'x',
            ImageKind::YComponent => 'y',
            ImageKind::ZComponent => 'z',
            ImageKind::XNormal => 'e',
            ImageKind::YNormal => 'f',
            ImageKind::ZNormal => 'g',
        }
    }

    /// Inverse of [`ImageKind::code`]. Case-insensitive, so the
    /// synchronized form of a command letter maps back too.
    pub fn from_code(code: char) -> Option<Self> {
        let code = code.to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Image type id the device reports in the metadata block.
    pub const fn type_id(self) -> u8 {
        match self {
            ImageKind::Distance => 1,
            ImageKind::Amplitude => 3,
            ImageKind::XNormal => 5,
            ImageKind::YNormal => 6,
            ImageKind::ZNormal => 7,
            ImageKind::XComponent => 8,
            ImageKind::YComponent => 9,
            ImageKind::ZComponent => 10,
        }
    }

    /// Inverse of [`ImageKind::type_id`].
    pub fn from_type_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.type_id() == id)
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageKind::Distance => "distance",
            ImageKind::Amplitude => "amplitude",
            ImageKind::XComponent => "x",
            ImageKind::YComponent => "y",
            ImageKind::ZComponent => "z",
            ImageKind::XNormal => "x-normal",
            ImageKind::YNormal => "y-normal",
            ImageKind::ZNormal => "z-normal",
        };
        f.write_str(name)
    }
}

// ----------------------------------------------------------------------------
// MetaField: documented metadata slots
// ----------------------------------------------------------------------------

/// Documented positions in the metadata block. The remaining slots are
/// device-internal; they are kept in [`DecodedImage::metadata`] as-is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaField {
    /// Payload size in bytes.
    DataSize,
    /// Metadata block size in bytes.
    HeaderSize,
    /// Image type id, see [`ImageKind::type_id`].
    ImageType,
    /// Frame format version.
    Version,
    /// Sampling mode the frame was taken with.
    SamplingMode,
    /// Illumination mode.
    IlluminationMode,
    /// Modulation frequency mode.
    FrequencyMode,
    /// Maximum resolvable distance.
    UnambiguousRange,
    /// On-device evaluation time.
    EvaluationTime,
    /// Integration time of the first exposure.
    IntegrationTimeExp0,
    /// Integration time of the second exposure.
    IntegrationTimeExp1,
    /// Capture time, whole seconds.
    TimestampSeconds,
    /// Capture time, microsecond part.
    TimestampMicros,
    /// Median filter setting.
    MedianFilter,
    /// Mean filter setting.
    MeanFilter,
    /// Device error code for this frame.
    ErrorCode,
    /// Trigger mode in effect.
    CurrentTriggerMode,
    /// Device uptime clock.
    DeviceTime,
}

impl MetaField {
    /// Position of this field in the metadata block.
    pub const fn index(self) -> usize {
        match self {
            MetaField::DataSize => 0,
            MetaField::HeaderSize => 1,
            MetaField::ImageType => 2,
            MetaField::Version => 3,
            MetaField::SamplingMode => 4,
            MetaField::IlluminationMode => 5,
            MetaField::FrequencyMode => 6,
            MetaField::UnambiguousRange => 7,
            MetaField::EvaluationTime => 8,
            MetaField::IntegrationTimeExp0 => 9,
            MetaField::IntegrationTimeExp1 => 10,
            MetaField::TimestampSeconds => 11,
            MetaField::TimestampMicros => 12,
            MetaField::MedianFilter => 13,
            MetaField::MeanFilter => 14,
            MetaField::ErrorCode => 19,
            MetaField::CurrentTriggerMode => 23,
            MetaField::DeviceTime => 28,
        }
    }
}

// ----------------------------------------------------------------------------
// Codec
// ----------------------------------------------------------------------------

/// Values decoded from one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameData {
    pub metadata: [f32; META_COUNT],
    pub pixels: PixelGrid,
    /// Smallest pixel folded against an initial 0.0.
    pub min: f32,
    /// Largest pixel folded against an initial 0.0.
    pub max: f32,
}

/// Decode one wire frame.
///
/// Fails with [`O3dError::MalformedFrame`] unless `buf` is exactly
/// [`FRAME_BYTES`] long. Min/max start at 0.0 and are folded over the grid
/// in row-major order with non-strict comparisons.
pub fn decode_frame(buf: &[u8]) -> Result<FrameData> {
    if buf.len() != FRAME_BYTES {
        return Err(O3dError::MalformedFrame {
            len: buf.len(),
            expected: FRAME_BYTES,
        });
    }

    let mut values = buf
        .chunks_exact(4)
        .map(|b| f32::from_be_bytes([b[0], b[1], b[2], b[3]]));

    let mut metadata = [0f32; META_COUNT];
    for (slot, value) in metadata.iter_mut().zip(values.by_ref()) {
        *slot = value;
    }

    let mut pixels: PixelGrid = vec![[0f32; WIDTH]; HEIGHT];
    let mut min = 0f32;
    let mut max = 0f32;
    for row in pixels.iter_mut() {
        for (cell, value) in row.iter_mut().zip(values.by_ref()) {
            *cell = value;
            if value <= min {
                min = value;
            }
            if value >= max {
                max = value;
            }
        }
    }

    Ok(FrameData {
        metadata,
        pixels,
        min,
        max,
    })
}

/// Encode metadata and a pixel grid into the wire layout.
///
/// `pixels` must hold exactly [`HEIGHT`] rows.
pub fn encode_frame(metadata: &[f32; META_COUNT], pixels: &[[f32; WIDTH]]) -> Result<Vec<u8>> {
    if pixels.len() != HEIGHT {
        return Err(O3dError::MalformedFrame {
            len: (META_COUNT + pixels.len() * WIDTH) * 4,
            expected: FRAME_BYTES,
        });
    }
    let mut out = Vec::with_capacity(FRAME_BYTES);
    for value in metadata.iter().chain(pixels.iter().flatten()) {
        out.extend_from_slice(&value.to_be_bytes());
    }
    Ok(out)
}

// ----------------------------------------------------------------------------
// DecodedImage
// ----------------------------------------------------------------------------

/// One decoded image as returned by an acquire call.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    pub kind: ImageKind,
    pub metadata: [f32; META_COUNT],
    pub pixels: PixelGrid,
    pub min: f32,
    pub max: f32,
}

impl DecodedImage {
    /// Decode one frame buffer as an image of `kind`.
    pub fn decode(kind: ImageKind, buf: &[u8]) -> Result<Self> {
        let FrameData {
            metadata,
            pixels,
            min,
            max,
        } = decode_frame(buf)?;
        Ok(Self {
            kind,
            metadata,
            pixels,
            min,
            max,
        })
    }

    /// Raw metadata value of a named field.
    pub fn meta(&self, field: MetaField) -> f32 {
        self.metadata[field.index()]
    }

    /// Maximum distance the current modulation frequency can resolve.
    pub fn unambiguous_range(&self) -> f32 {
        self.meta(MetaField::UnambiguousRange)
    }

    /// Pixel at `row`/`col`, or `None` outside the grid.
    pub fn pixel(&self, row: usize, col: usize) -> Option<f32> {
        self.pixels.get(row).and_then(|r| r.get(col)).copied()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
