//! SATV Capture - line-scan video decoding with automatic sync tracking
//!
//! Decodes a demodulated SATV signal into raster frames:
//! 1. Read raw samples from file (u8/s8/s16/f32, real or I/Q)
//! 2. FM-demodulate I/Q input to amplitude
//! 3. Draw samples into a raster and histogram the sync pulses
//! 4. Align each completed frame on its sync pulse, skipping samples to
//!    correct drift
//! 5. Hand frames to the consumer and optionally record them

pub mod capture;
pub mod config;
pub mod demod;
pub mod recorder;
pub mod source;
pub mod tv;
