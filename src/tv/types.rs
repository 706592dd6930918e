//! Frame decoder data types

use super::DecoderError;

/// Bytes per RGBA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Fixed raster size of a decoder instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    width: usize,
    height: usize,
}

impl Geometry {
    /// Validate a raster size. Zero-sized or overflowing rasters are rejected.
    pub fn new(width: usize, height: usize) -> Result<Self, DecoderError> {
        let valid = width > 0
            && height > 0
            && width
                .checked_mul(height)
                .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
                .is_some();
        if !valid {
            return Err(DecoderError::InvalidGeometry { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixels per frame
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    /// Size of one RGBA8 frame in bytes
    pub fn rgba_len(&self) -> usize {
        self.pixels() * BYTES_PER_PIXEL
    }
}

/// Tunables that may be swapped between `input()` calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderParams {
    /// Samples below this amplitude are sync pulses
    pub sync_level: f32,
    /// Amplitude mapped to intensity 0
    pub black_level: f32,
    /// Amplitude range mapped onto 0..=255
    pub span: f32,
    /// Expose the raw, continuously written buffer instead of aligned frames
    pub live_view: bool,
    /// Skip samples to correct large vertical drift
    pub auto_sync: bool,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            sync_level: -0.058,
            black_level: -0.032,
            span: 0.110,
            live_view: false,
            auto_sync: true,
        }
    }
}

/// Sync position estimated at a frame boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncOffset {
    /// Column with the most sync hits
    pub x: usize,
    /// Row with the most sync hits
    pub y: usize,
    /// `x + y * width`, the rotation applied to the aligned frame
    pub linear: usize,
    /// Whether a phase-correcting skip was scheduled
    pub skip_scheduled: bool,
}

/// Result of asking the decoder for something to display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAttempt<'a> {
    /// Non-live mode with no completed frame since the last read
    NoFrameYet,
    /// Live mode: the raw buffer as it is being written, sync pulses in red
    Live(&'a [u8]),
    /// Non-live mode: a completed, sync-aligned frame
    FrameReady(&'a [u8]),
}

impl<'a> FrameAttempt<'a> {
    /// Pixel data offered by this attempt, if any
    pub fn pixels(&self) -> Option<&'a [u8]> {
        match *self {
            FrameAttempt::NoFrameYet => None,
            FrameAttempt::Live(px) | FrameAttempt::FrameReady(px) => Some(px),
        }
    }
}

/// Running decoder counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub samples_processed: u64,
    pub samples_skipped: u64,
    pub sync_hits: u64,
    pub frames_completed: u64,
    pub skips_scheduled: u64,
    pub last_offset: Option<SyncOffset>,
}
