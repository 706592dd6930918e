//! SATV line-scan frame decoder
//!
//! Turns a demodulated amplitude stream into raster frames:
//! 1. Map each sample to a gray pixel and write it at the raster cursor
//! 2. Count sync pulses (samples below the sync level) per column and per row
//! 3. At each frame boundary, take the histogram peaks as the sync offset
//! 4. Publish a copy of the frame rotated so the sync pulse sits at the origin
//! 5. Optionally skip samples to pull the raster phase back into line

mod decoder;
mod error;
mod types;

pub use decoder::FrameDecoder;
pub use error::DecoderError;
pub use types::{DecoderParams, DecoderStats, FrameAttempt, Geometry, SyncOffset};
