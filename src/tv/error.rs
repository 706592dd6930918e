//! Decoder error types

/// Errors raised while setting up a frame decoder
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecoderError {
    #[error("invalid raster geometry {width}x{height}: both dimensions must be positive")]
    InvalidGeometry { width: usize, height: usize },
}
